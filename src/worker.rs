//! Background load generation.
//!
//! A load worker is a forked process that writes one zeroed buffer to a raw
//! block device until it is told to stop. Running out of space on the device
//! is expected in a tight write loop: the device is closed and reopened and
//! writing resumes at the start. Any other write error ends the worker with
//! that errno as its exit status.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::K2Error;
use crate::ionice::{set_own_io_priority, IoPriority};
use crate::process::{
    block_termination_signals, fork_process, set_nice, set_process_name, terminate,
    unblock_termination_signals, wait_pid, ExitState,
};
use crate::utils::{create_ctrlc_handler, ExitFlag};

pub mod prelude {
    pub use super::{
        RawTarget,
        RawBlockDevice,
        LoadConfig,
        LoadOutcome,
        LoadReport,
        WorkerSpec,
        WorkerDescriptor,
        LoadWorker,
        run_load,
        worker_main,
        spawn_worker,
    };
}

/// Something the load loop can open for writing, typically a raw block device.
/// Dropping the writer closes it.
pub trait RawTarget {
    type Writer: Write;

    fn open(&self) -> std::io::Result<Self::Writer>;

    fn describe(&self) -> String;
}

#[derive(Debug)]
#[derive(Clone)]
pub struct RawBlockDevice {
    path: PathBuf,
    append: bool,
}

impl RawBlockDevice {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        RawBlockDevice { path: path.into(), append: false }
    }

    /// `/dev/<disk>`
    pub fn for_disk(disk: &str) -> Self {
        RawBlockDevice::new(format!("/dev/{disk}"))
    }

    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }
}

impl RawTarget for RawBlockDevice {
    type Writer = std::fs::File;

    fn open(&self) -> std::io::Result<std::fs::File> {
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .append(self.append)
            .custom_flags(libc::O_SYNC)
            .open(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug)]
#[derive(Clone)]
pub struct LoadConfig {
    pub block_size: usize,
    /// Pause after every successful write.
    pub throttle: Duration,
    /// Stop after this many successful writes; `None` runs until cancelled.
    pub max_writes: Option<u64>,
}

#[derive(Debug)]
pub enum LoadOutcome {
    /// Cancellation was observed.
    Drained,
    /// `max_writes` was reached.
    Completed,
    OpenFailed(std::io::Error),
    Fault(std::io::Error),
}

#[derive(Debug)]
pub struct LoadReport {
    pub writes: u64,
    pub bytes: u64,
    pub restarts: u64,
    pub outcome: LoadOutcome,
}

impl LoadReport {
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            LoadOutcome::Drained | LoadOutcome::Completed => 0,
            LoadOutcome::OpenFailed(err) | LoadOutcome::Fault(err) => {
                err.raw_os_error().filter(|code| *code != 0).unwrap_or(1)
            },
        }
    }

    pub fn into_result(self) -> Result<LoadReport, K2Error> {
        match self.outcome {
            LoadOutcome::Fault(err) => Err(K2Error::WriteFault(err)),
            _ => Ok(self),
        }
    }
}

fn is_device_full(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOSPC)
}

/// Write `buffer` to `target` until cancelled, `max_writes` is reached or a
/// non-recoverable error occurs. The target is closed before returning.
pub fn run_load<T: RawTarget>(target: &T, buffer: &[u8], config: &LoadConfig, exit: &ExitFlag) -> LoadReport {
    let mut report = LoadReport { writes: 0, bytes: 0, restarts: 0, outcome: LoadOutcome::Completed };

    let mut writer = match target.open() {
        Ok(writer) => writer,
        Err(err) => {
            error!("Could not open raw device file {}: {err}", target.describe());
            report.outcome = LoadOutcome::OpenFailed(err);
            return report;
        },
    };

    debug!("Writing {} byte blocks to {}", buffer.len(), target.describe());

    let outcome = loop {
        if exit.is_exit() {
            break LoadOutcome::Drained;
        }

        if config.max_writes.is_some_and(|max| report.writes >= max) {
            break LoadOutcome::Completed;
        }

        let full = match writer.write(buffer) {
            Ok(0) if !buffer.is_empty() => {
                Some(std::io::Error::from_raw_os_error(libc::ENOSPC))
            },
            Ok(written) => {
                report.writes += 1;
                report.bytes += written as u64;
                None
            },
            Err(err) if is_device_full(&err) => Some(err),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                error!("Write to {} failed: {err}", target.describe());
                break LoadOutcome::Fault(err);
            },
        };

        if let Some(err) = full {
            debug!("{} full after {} bytes ({err}), reopening", target.describe(), report.bytes);
            report.restarts += 1;

            drop(writer);
            writer = match target.open() {
                Ok(writer) => writer,
                Err(err) => {
                    error!("Could not reopen raw device file {}: {err}", target.describe());
                    report.outcome = LoadOutcome::Fault(err);
                    return report;
                },
            };
            continue;
        }

        if !config.throttle.is_zero() {
            std::thread::sleep(config.throttle);
        }
    };

    drop(writer);
    report.outcome = outcome;
    report
}

#[derive(Debug)]
#[derive(Clone)]
pub struct WorkerSpec {
    pub index: usize,
    pub priority: IoPriority,
    /// CPU nice level; `None` keeps the inherited one.
    pub nice: Option<i32>,
    pub load: LoadConfig,
}

#[derive(Debug)]
#[derive(Clone, Copy)]
#[derive(PartialEq, Eq)]
pub struct WorkerDescriptor {
    pub index: usize,
    pub pid: u32,
    pub priority: IoPriority,
}

/// Body of a load worker process; returns its exit status.
///
/// SIGINT/SIGTERM blocked by the parent across fork are unblocked once the
/// handlers are in place, so an early termination request still drains.
pub fn worker_main<T: RawTarget>(spec: &WorkerSpec, target: &T) -> i32 {
    let exit = match create_ctrlc_handler() {
        Ok(exit) => exit,
        Err(err) => {
            error!("Worker {} could not install signal handlers: {err}", spec.index);
            return 1;
        },
    };

    if let Err(err) = unblock_termination_signals() {
        error!("Worker {} could not unblock signals: {err}", spec.index);
        return 1;
    }

    let name = format!("k2-load-{}", spec.index);
    if let Err(err) = set_process_name(&name) {
        warn!("Could not set process name {name}: {err}");
    }

    if let Some(nice) = spec.nice {
        if let Err(err) = set_nice(0, nice) {
            warn!("{name}: could not set nice level {nice}: {err}");
        }
    }

    if let Err(err) = set_own_io_priority(spec.priority) {
        warn!("{name}: {}", K2Error::from(err));
    }

    let buffer = vec![0u8; spec.load.block_size];
    let report = run_load(target, &buffer, &spec.load, &exit);
    drop(buffer);

    info!("{name} ({}) stopped after {} writes, {} restarts: {:?}",
        std::process::id(), report.writes, report.restarts, report.outcome);

    report.exit_code()
}

/// Parent side handle of a forked load worker.
///
/// A worker that was never reaped is terminated and reaped on drop.
#[derive(Debug)]
pub struct LoadWorker {
    descriptor: WorkerDescriptor,
    exit: Option<ExitState>,
}

pub fn spawn_worker<T: RawTarget>(spec: &WorkerSpec, target: &T) -> Result<LoadWorker, K2Error> {
    let mask = block_termination_signals().map_err(K2Error::Spawn)?;
    let forked = fork_process(|| worker_main(spec, target));
    if let Err(err) = mask.restore() {
        warn!("Could not restore signal mask: {err}");
    }
    let pid = forked?;

    info!("Starting background load on pid {pid} with I/O priority {}", spec.priority);

    Ok(LoadWorker {
        descriptor: WorkerDescriptor { index: spec.index, pid, priority: spec.priority },
        exit: None,
    })
}

impl LoadWorker {
    pub fn descriptor(&self) -> &WorkerDescriptor {
        &self.descriptor
    }

    pub fn pid(&self) -> u32 {
        self.descriptor.pid
    }

    pub fn is_reaped(&self) -> bool {
        self.exit.is_some()
    }

    pub fn terminate(&self) -> Result<(), std::io::Error> {
        if self.exit.is_some() {
            return Ok(());
        }

        terminate(self.descriptor.pid)
    }

    pub fn wait(&mut self) -> Result<ExitState, std::io::Error> {
        if let Some(state) = self.exit {
            return Ok(state);
        }

        let state = wait_pid(self.descriptor.pid)?;
        self.exit = Some(state);
        Ok(state)
    }
}

impl Drop for LoadWorker {
    fn drop(&mut self) {
        if self.exit.is_none() {
            let _ = self.terminate();
            let _ = self.wait();
        }
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;
    use crate::utils::ExitTrigger;

    #[derive(Debug)]
    #[derive(Clone, Copy)]
    #[derive(PartialEq, Eq)]
    pub enum Event {
        Open,
        Write,
        Close,
    }

    pub enum Step {
        Ok,
        Fail(i32),
        Cancel,
    }

    /// Target whose writes follow a script; an exhausted script keeps
    /// succeeding. Records open/write/close events in order.
    #[derive(Clone, Default)]
    pub struct ScriptedTarget {
        pub script: Rc<RefCell<VecDeque<Step>>>,
        pub events: Rc<RefCell<Vec<Event>>>,
        pub trigger: Rc<RefCell<Option<ExitTrigger>>>,
        pub open_error: Option<i32>,
    }

    pub struct ScriptedWriter(ScriptedTarget);

    impl ScriptedTarget {
        pub fn new(steps: Vec<Step>) -> Self {
            let target = ScriptedTarget::default();
            target.script.borrow_mut().extend(steps);
            target
        }

        pub fn cancelling(steps: Vec<Step>, trigger: ExitTrigger) -> Self {
            let target = ScriptedTarget::new(steps);
            *target.trigger.borrow_mut() = Some(trigger);
            target
        }

        pub fn count(&self, event: Event) -> usize {
            self.events.borrow().iter().filter(|e| **e == event).count()
        }
    }

    impl RawTarget for ScriptedTarget {
        type Writer = ScriptedWriter;

        fn open(&self) -> std::io::Result<ScriptedWriter> {
            if let Some(errno) = self.open_error {
                return Err(std::io::Error::from_raw_os_error(errno));
            }

            self.events.borrow_mut().push(Event::Open);
            Ok(ScriptedWriter(self.clone()))
        }

        fn describe(&self) -> String {
            "scripted".to_owned()
        }
    }

    impl Write for ScriptedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.events.borrow_mut().push(Event::Write);

            let step = self.0.script.borrow_mut().pop_front();
            match step {
                None | Some(Step::Ok) => Ok(buf.len()),
                Some(Step::Fail(errno)) => Err(std::io::Error::from_raw_os_error(errno)),
                Some(Step::Cancel) => {
                    if let Some(trigger) = self.0.trigger.borrow().as_ref() {
                        trigger.trigger();
                    }
                    Ok(buf.len())
                },
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Drop for ScriptedWriter {
        fn drop(&mut self) {
            self.0.events.borrow_mut().push(Event::Close);
        }
    }
}
