//! Foreground/background benchmark against the k2 scheduler.
//!
//! The harness registers its own process as a periodic task, forks a set of
//! load workers with their own I/O priorities, runs a bounded foreground write
//! loop and tears everything down in a fixed order: signal every worker, reap
//! every worker, unregister the task, release the foreground buffer. The same
//! teardown runs after a normal finish, after SIGINT/SIGTERM and on drop, and
//! does its work only once.

use std::str::FromStr;
use std::time::Duration;

use log::{error, info, warn};
use rand::{Rng, SeedableRng};

use crate::error::K2Error;
use crate::ionice::{set_own_io_priority, IoClass, IoLevel, IoPriority};
use crate::k2::{K2Client, K2Connector};
use crate::process::{block_termination_signals, set_nice, ExitState, SignalMask};
use crate::utils::{create_ctrlc_handler, ExitFlag};
use crate::worker::{run_load, spawn_worker, LoadConfig, LoadReport, LoadWorker, RawTarget, WorkerDescriptor, WorkerSpec};

pub mod prelude {
    pub use super::{
        PriorityPolicy,
        HarnessConfig,
        HarnessReport,
        Harness,
        parse_priority_list,
    };
}

/// Highest nice level.
pub const NICE_MAX_PRIORITY: i32 = -20;

/// How load workers get their I/O priorities.
#[derive(Debug)]
#[derive(Clone)]
#[derive(PartialEq, Eq)]
pub enum PriorityPolicy {
    /// Best-effort with level `index % 8`.
    ByIndex,
    Uniform(IoPriority),
    /// Cycled when there are more workers than entries.
    Explicit(Vec<IoPriority>),
    Random { seed: u64 },
}

impl PriorityPolicy {
    pub fn assign(&self, count: usize) -> Vec<IoPriority> {
        let by_index = |index: usize| IoPriority::best_effort(IoLevel::ALL[index % IoLevel::ALL.len()]);

        match self {
            PriorityPolicy::ByIndex => (0..count).map(by_index).collect(),
            PriorityPolicy::Uniform(priority) => vec![*priority; count],
            PriorityPolicy::Explicit(priorities) if priorities.is_empty() => (0..count).map(by_index).collect(),
            PriorityPolicy::Explicit(priorities) => priorities.iter().copied().cycle().take(count).collect(),
            PriorityPolicy::Random { seed } => {
                const CLASSES: [IoClass; 3] = [IoClass::RealTime, IoClass::BestEffort, IoClass::Idle];

                let mut rand = rand::rngs::StdRng::seed_from_u64(*seed);
                (0..count)
                    .map(|_| {
                        let class = CLASSES[rand.random_range(0..CLASSES.len())];
                        let level = match class {
                            IoClass::Idle => IoLevel::L0,
                            _ => IoLevel::ALL[rand.random_range(0..IoLevel::ALL.len())],
                        };
                        IoPriority::new(class, level)
                    })
                    .collect()
            },
        }
    }
}

/// `by-index`, `random[:<seed>]`, `uniform:<priority>` or a priority list.
impl FromStr for PriorityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s == "by-index" {
            return Ok(PriorityPolicy::ByIndex);
        }

        if s == "random" {
            return Ok(PriorityPolicy::Random { seed: rand::random() });
        }

        if let Some(seed) = s.strip_prefix("random:") {
            let seed = seed.parse::<u64>()
                .map_err(|err| format!("Invalid seed \"{seed}\": {err}"))?;
            return Ok(PriorityPolicy::Random { seed });
        }

        if let Some(priority) = s.strip_prefix("uniform:") {
            let priority = priority.parse::<IoPriority>().map_err(|err| err.to_string())?;
            return Ok(PriorityPolicy::Uniform(priority));
        }

        parse_priority_list(s).map(PriorityPolicy::Explicit)
    }
}

/// Comma separated priorities, e.g. `be:4,rt:0,rt:3`.
pub fn parse_priority_list(s: &str) -> Result<Vec<IoPriority>, String> {
    use nom::Parser;
    use nom::bytes::complete::*;
    use nom::character::complete::*;
    use nom::combinator::*;
    use nom::multi::*;

    let item_parser = map_res(
        take_while1::<_, &str, ()>(|c: char| c != ','),
        IoPriority::from_str
    );
    let separator_parser = map((tag(","), multispace0), |_| ());
    let mut parser = all_consuming(separated_list1(separator_parser, item_parser));

    Ok(parser.parse(s.trim()).map_err(|_| format!("Invalid priority list \"{s}\""))?.1)
}

#[derive(Debug)]
#[derive(Clone)]
pub struct HarnessConfig {
    /// Block device name without `/dev/`, e.g. `nvme0n1`.
    pub disk: String,
    pub num_workers: usize,
    pub worker_block_size: usize,
    pub worker_throttle: Duration,
    pub foreground_block_size: usize,
    pub iterations: u64,
    /// Sampling interval the harness registers itself with.
    pub task_interval: Duration,
    pub write_pause: Duration,
    pub settle_time: Duration,
    pub priorities: PriorityPolicy,
    pub foreground_priority: Option<IoPriority>,
    pub nice: Option<i32>,
    /// Give worker `i` the CPU nice level `i`.
    pub worker_nice: bool,
    /// Abort instead of running unregistered when registration fails.
    pub require_registration: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            disk: "nvme0n1".to_owned(),
            num_workers: 8,
            worker_block_size: 1024 << 5,
            worker_throttle: Duration::from_nanos(100),
            foreground_block_size: 1024 << 8,
            iterations: 1024,
            task_interval: Duration::from_secs(10),
            write_pause: Duration::ZERO,
            settle_time: Duration::from_secs(3),
            priorities: PriorityPolicy::ByIndex,
            foreground_priority: None,
            nice: Some(NICE_MAX_PRIORITY),
            worker_nice: true,
            require_registration: false,
        }
    }
}

#[derive(Debug)]
pub struct HarnessReport {
    pub foreground: LoadReport,
    pub workers: Vec<(WorkerDescriptor, Option<ExitState>)>,
    pub registered: bool,
    pub interrupted: bool,
}

impl HarnessReport {
    pub fn exit_code(&self) -> i32 {
        self.foreground.exit_code()
    }
}

pub struct Harness<C: K2Connector, T: RawTarget> {
    config: HarnessConfig,
    client: K2Client<C>,
    target: T,
    pid: u32,
    exit: Option<ExitFlag>,
    signal_mask: Option<SignalMask>,
    workers: Vec<LoadWorker>,
    foreground: Option<Vec<u8>>,
    registered: bool,
    torn_down: bool,
}

impl<C: K2Connector, T: RawTarget> Harness<C, T> {
    pub fn new(config: HarnessConfig, client: K2Client<C>, target: T) -> Self {
        Harness {
            config,
            client,
            target,
            pid: std::process::id(),
            exit: None,
            signal_mask: None,
            workers: Vec::new(),
            foreground: None,
            registered: false,
            torn_down: false,
        }
    }

    /// Use `exit` instead of installing SIGINT/SIGTERM handlers in `run`.
    pub fn with_exit_flag(mut self, exit: ExitFlag) -> Self {
        self.exit = Some(exit);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn workers(&self) -> Vec<WorkerDescriptor> {
        self.workers.iter().map(|worker| *worker.descriptor()).collect()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn run(&mut self) -> Result<HarnessReport, Box<dyn std::error::Error>> {
        self.start()?;

        // Handlers are installed after forking so the workers start with
        // their own, independent ones. A signal that arrived since
        // registration is delivered once the mask is restored.
        let exit = match self.exit.clone() {
            Some(exit) => exit,
            None => {
                let exit = create_ctrlc_handler()?;
                self.exit = Some(exit.clone());
                exit
            },
        };

        if let Some(mask) = self.signal_mask.take() {
            mask.restore()?;
        }

        let foreground = self.run_foreground(&exit);

        if !exit.is_exit() && !self.config.settle_time.is_zero() {
            exit.wait_timeout(self.config.settle_time);
        }

        let interrupted = exit.is_exit();
        if interrupted {
            warn!("Process terminating gracefully");
        }

        let registered = self.registered;
        let workers = self.teardown();

        Ok(HarnessReport { foreground, workers, registered, interrupted })
    }

    /// Raise own priorities, register the periodic task and fork the workers.
    pub fn start(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(nice) = self.config.nice {
            if let Err(err) = set_nice(0, nice) {
                warn!("Could not set nice level {nice}: {err}");
            }
        }

        if let Some(priority) = self.config.foreground_priority {
            if let Err(err) = set_own_io_priority(priority) {
                warn!("{}", K2Error::from(err));
            }
        }

        match self.client.get_version() {
            Ok(version) => info!("k2 version is {version}"),
            Err(err) => warn!("{err}"),
        }
        match self.client.get_active_devices() {
            Ok(devices) => info!("k2 is active on {devices}"),
            Err(err) => warn!("{err}"),
        }

        // Held until run() has handlers, so a termination request can no
        // longer skip the unregistration.
        if self.signal_mask.is_none() {
            self.signal_mask = Some(block_termination_signals()?);
        }

        let interval_ns = i64::try_from(self.config.task_interval.as_nanos()).unwrap_or(i64::MAX);
        match self.client.register_task(&self.config.disk, self.pid as libc::pid_t, interval_ns) {
            Ok(()) => self.registered = true,
            Err(err) if self.config.require_registration => return Err(err.into()),
            Err(err) => error!("{err}"),
        }

        let priorities = self.config.priorities.assign(self.config.num_workers);
        for (index, priority) in priorities.into_iter().enumerate() {
            let spec = WorkerSpec {
                index,
                priority,
                nice: self.config.worker_nice.then(|| index.min(19) as i32),
                load: LoadConfig {
                    block_size: self.config.worker_block_size,
                    throttle: self.config.worker_throttle,
                    max_writes: None,
                },
            };

            match spawn_worker(&spec, &self.target) {
                Ok(worker) => self.workers.push(worker),
                Err(err) => {
                    error!("Fork failed: {err}");
                    self.teardown();
                    return Err(err.into());
                },
            }
        }

        Ok(())
    }

    fn run_foreground(&mut self, exit: &ExitFlag) -> LoadReport {
        let load = LoadConfig {
            block_size: self.config.foreground_block_size,
            throttle: self.config.write_pause,
            max_writes: Some(self.config.iterations),
        };

        let buffer = self.foreground.insert(vec![0u8; load.block_size]);
        let report = run_load(&self.target, buffer, &load, exit);

        info!("Foreground issued {} writes ({} bytes, {} restarts)", report.writes, report.bytes, report.restarts);
        report
    }

    /// Stop and reap all workers, then unregister the task and free the
    /// foreground buffer. Only the first call does anything.
    pub fn teardown(&mut self) -> Vec<(WorkerDescriptor, Option<ExitState>)> {
        if self.torn_down {
            return Vec::new();
        }
        self.torn_down = true;

        for worker in self.workers.iter() {
            if let Err(err) = worker.terminate() {
                warn!("Could not signal worker {}: {err}", worker.pid());
            }
        }

        let mut states = Vec::with_capacity(self.workers.len());
        for mut worker in self.workers.drain(..) {
            let state = match worker.wait() {
                Ok(state) => {
                    if !state.success() {
                        warn!("Worker {} {state}", worker.pid());
                    }
                    Some(state)
                },
                Err(err) => {
                    warn!("Could not reap worker {}: {err}", worker.pid());
                    None
                },
            };
            states.push((*worker.descriptor(), state));
        }

        if self.registered {
            if let Err(err) = self.client.unregister_task(&self.config.disk, self.pid as libc::pid_t) {
                error!("{err}");
            }
            self.registered = false;
        }

        self.foreground = None;
        self.signal_mask = None;
        states
    }
}

impl<C: K2Connector, T: RawTarget> Drop for Harness<C, T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;
    use std::time::Instant;

    use super::*;
    use crate::error::K2Error;
    use crate::ioctl::{Command, IoctlRequest, K2Channel};
    use crate::k2::fake::FakeConnector;
    use crate::process::{fork_process, terminate, wait_pid};
    use crate::utils::exit_channel;
    use crate::worker::{LoadOutcome, RawBlockDevice};
    use crate::worker::scripted::*;

    fn config() -> HarnessConfig {
        HarnessConfig {
            disk: "nvme0n1".to_owned(),
            num_workers: 0,
            foreground_block_size: 512,
            iterations: 16,
            task_interval: Duration::from_millis(5),
            settle_time: Duration::ZERO,
            nice: None,
            ..HarnessConfig::default()
        }
    }

    #[test]
    fn by_index_policy_cycles_levels() {
        let assigned = PriorityPolicy::ByIndex.assign(10);

        assert_eq!(assigned.len(), 10);
        assert_eq!(assigned[0], IoPriority::best_effort(IoLevel::L0));
        assert_eq!(assigned[7], IoPriority::best_effort(IoLevel::L7));
        assert_eq!(assigned[9], IoPriority::best_effort(IoLevel::L1));
    }

    #[test]
    fn explicit_policy_is_cycled() {
        let list = parse_priority_list("be:4, rt:0,rt:3").unwrap();
        let assigned = PriorityPolicy::Explicit(list).assign(4);

        assert_eq!(assigned, vec![
            IoPriority::best_effort(IoLevel::L4),
            IoPriority::realtime(IoLevel::L0),
            IoPriority::realtime(IoLevel::L3),
            IoPriority::best_effort(IoLevel::L4),
        ]);
    }

    #[test]
    fn random_policy_is_reproducible() {
        let first = PriorityPolicy::Random { seed: 42 }.assign(32);
        let second = PriorityPolicy::Random { seed: 42 }.assign(32);

        assert_eq!(first, second);
        assert!(first.iter().all(|prio| prio.encode().is_ok()));
        assert!(first.iter().all(|prio| prio.class != IoClass::None));
    }

    #[test]
    fn policy_from_str() {
        assert_eq!("by-index".parse::<PriorityPolicy>().unwrap(), PriorityPolicy::ByIndex);
        assert_eq!("random:7".parse::<PriorityPolicy>().unwrap(), PriorityPolicy::Random { seed: 7 });
        assert_eq!(
            "uniform:rt:2".parse::<PriorityPolicy>().unwrap(),
            PriorityPolicy::Uniform(IoPriority::realtime(IoLevel::L2))
        );
        assert_eq!(
            "idle,be:1".parse::<PriorityPolicy>().unwrap(),
            PriorityPolicy::Explicit(vec![IoPriority::idle(), IoPriority::best_effort(IoLevel::L1)])
        );
        assert!("random:x".parse::<PriorityPolicy>().is_err());
    }

    #[test]
    fn bad_priority_list_is_rejected() {
        assert!(parse_priority_list("").is_err());
        assert!(parse_priority_list("be:4,,rt:1").is_err());
        assert!(parse_priority_list("be:9").is_err());
    }

    #[test]
    fn run_registers_writes_and_unregisters() {
        let driver = FakeConnector::managing(&["nvme0n1"]);
        let target = ScriptedTarget::new(vec![]);
        let (_trigger, exit) = exit_channel();

        let mut harness = Harness::new(config(), K2Client::new(driver.clone()), target.clone())
            .with_exit_flag(exit);
        let report = harness.run().unwrap();

        assert!(report.registered);
        assert!(!report.interrupted);
        assert!(matches!(report.foreground.outcome, LoadOutcome::Completed));
        assert_eq!(report.foreground.writes, 16);
        assert_eq!(report.exit_code(), 0);
        assert!(!harness.is_registered());

        let driver = driver.0.borrow();
        assert!(driver.registrations.is_empty());
        assert_eq!(driver.dispatches, vec![
            Command::GetVersion,
            Command::GetActiveDevices,
            Command::RegisterPeriodicTask,
            Command::UnregisterPeriodicTask,
        ]);
    }

    #[test]
    fn teardown_runs_once() {
        let driver = FakeConnector::managing(&["nvme0n1"]);
        let (_trigger, exit) = exit_channel();

        let mut harness = Harness::new(config(), K2Client::new(driver.clone()), ScriptedTarget::new(vec![]))
            .with_exit_flag(exit);
        harness.run().unwrap();
        harness.teardown();
        drop(harness);

        let unregisters = driver.0.borrow().dispatches.iter()
            .filter(|command| **command == Command::UnregisterPeriodicTask)
            .count();
        assert_eq!(unregisters, 1);
    }

    #[test]
    fn cancellation_stops_foreground_and_still_unregisters() {
        let driver = FakeConnector::managing(&["nvme0n1"]);
        let (trigger, exit) = exit_channel();
        let target = ScriptedTarget::cancelling(vec![Step::Ok, Step::Cancel], trigger);

        let mut harness = Harness::new(config(), K2Client::new(driver.clone()), target)
            .with_exit_flag(exit);
        let report = harness.run().unwrap();

        assert!(report.interrupted);
        assert!(matches!(report.foreground.outcome, LoadOutcome::Drained));
        assert_eq!(report.foreground.writes, 2);
        assert!(driver.0.borrow().registrations.is_empty());
    }

    #[test]
    fn failed_registration_is_not_fatal_by_default() {
        let driver = FakeConnector::managing(&["nvme0n1"]);
        driver.0.borrow_mut().reject = Some((Command::RegisterPeriodicTask, libc::EINVAL));
        let (_trigger, exit) = exit_channel();

        let mut harness = Harness::new(config(), K2Client::new(driver.clone()), ScriptedTarget::new(vec![]))
            .with_exit_flag(exit);
        let report = harness.run().unwrap();

        assert!(!report.registered);
        assert_eq!(report.foreground.writes, 16);
        assert!(!driver.0.borrow().dispatches.contains(&Command::UnregisterPeriodicTask));
    }

    #[test]
    fn required_registration_aborts() {
        let driver = FakeConnector::managing(&["sda"]);
        let (_trigger, exit) = exit_channel();
        let target = ScriptedTarget::new(vec![]);

        let mut harness = Harness::new(
            HarnessConfig { require_registration: true, ..config() },
            K2Client::new(driver.clone()),
            target.clone(),
        ).with_exit_flag(exit);

        assert!(harness.run().is_err());
        assert_eq!(target.count(Event::Open), 0);
    }

    #[test]
    fn foreground_fault_is_reported_after_teardown() {
        let driver = FakeConnector::managing(&["nvme0n1"]);
        let (_trigger, exit) = exit_channel();
        let target = ScriptedTarget::new(vec![Step::Ok, Step::Fail(libc::EIO)]);

        let mut harness = Harness::new(config(), K2Client::new(driver.clone()), target)
            .with_exit_flag(exit);
        let report = harness.run().unwrap();

        assert_eq!(report.exit_code(), libc::EIO);
        assert!(driver.0.borrow().registrations.is_empty());
    }

    /// Appends every dispatched command to a file, so a forked harness can
    /// be followed from the parent.
    #[derive(Clone)]
    struct JournalConnector {
        path: PathBuf,
        register_pause: Duration,
    }

    impl K2Connector for JournalConnector {
        type Channel = JournalConnector;

        fn connect(&self) -> Result<JournalConnector, K2Error> {
            Ok(self.clone())
        }

        fn release(&self, _channel: JournalConnector) -> Result<(), K2Error> {
            Ok(())
        }
    }

    impl K2Channel for JournalConnector {
        fn dispatch(&mut self, request: &mut IoctlRequest) -> Result<(), K2Error> {
            let mut journal = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .unwrap();
            writeln!(journal, "{:?}", request.command()).unwrap();

            match request.command() {
                Command::GetVersion => request.set_string_param("k2-journal")?,
                Command::GetActiveDevices => request.set_string_param("nvme0n1")?,
                Command::RegisterPeriodicTask => std::thread::sleep(self.register_pause),
                _ => (),
            }

            Ok(())
        }
    }

    fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + deadline;
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn sigterm_during_registration_still_unregisters() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("journal");
        let disk = dir.path().join("disk");
        std::fs::write(&disk, b"").unwrap();

        let connector = JournalConnector { path: journal.clone(), register_pause: Duration::from_millis(800) };
        let config = HarnessConfig {
            num_workers: 2,
            worker_block_size: 512,
            worker_throttle: Duration::from_millis(1),
            iterations: 100_000,
            write_pause: Duration::from_millis(1),
            ..config()
        };

        let pid = fork_process(|| {
            let mut harness = Harness::new(config, K2Client::new(connector), RawBlockDevice::new(&disk));
            match harness.run() {
                Ok(report) if report.interrupted
                    && report.workers.len() == 2
                    && report.workers.iter().all(|(_, state)| *state == Some(ExitState::Exited(0))) => 0,
                Ok(_) => 2,
                Err(_) => 1,
            }
        }).unwrap();

        wait_for(Duration::from_secs(10), || {
            std::fs::read_to_string(&journal).unwrap_or_default().contains("RegisterPeriodicTask")
        });
        terminate(pid).unwrap();

        assert_eq!(wait_pid(pid).unwrap(), ExitState::Exited(0));

        let journal = std::fs::read_to_string(&journal).unwrap();
        let commands: Vec<_> = journal.lines().collect();
        assert_eq!(commands.last(), Some(&"UnregisterPeriodicTask"));
        assert_eq!(commands.iter().filter(|command| **command == "UnregisterPeriodicTask").count(), 1);
    }

    /// File-backed target that leaves a `pid-<pid>` marker for every process
    /// opening it. The foreground waits for the workers' markers first.
    struct MarkingTarget {
        dir: PathBuf,
        device: RawBlockDevice,
        parent: u32,
        workers: usize,
    }

    fn worker_pids(dir: &Path, parent: u32) -> Vec<u32> {
        std::fs::read_dir(dir).unwrap()
            .filter_map(|entry| entry.unwrap().file_name().to_str()?.strip_prefix("pid-")?.parse().ok())
            .filter(|pid| *pid != parent)
            .collect()
    }

    impl RawTarget for MarkingTarget {
        type Writer = std::fs::File;

        fn open(&self) -> std::io::Result<std::fs::File> {
            let pid = std::process::id();
            std::fs::write(self.dir.join(format!("pid-{pid}")), b"")?;

            if pid == self.parent {
                wait_for(Duration::from_secs(10), || worker_pids(&self.dir, self.parent).len() >= self.workers);
            }

            self.device.open()
        }

        fn describe(&self) -> String {
            self.device.describe()
        }
    }

    #[test]
    fn workers_are_reaped_before_unregistration() {
        let dir = tempfile::tempdir().unwrap();
        let disk = dir.path().join("disk");
        std::fs::write(&disk, b"").unwrap();

        let parent = std::process::id();
        let target = MarkingTarget {
            dir: dir.path().to_owned(),
            device: RawBlockDevice::new(&disk),
            parent,
            workers: 2,
        };

        let alive_at_unregister = Rc::new(RefCell::new(None));
        let driver = FakeConnector::managing(&["nvme0n1"]);
        {
            let alive = alive_at_unregister.clone();
            let dir = dir.path().to_owned();
            driver.0.borrow_mut().on_dispatch = Some(Box::new(move |command| {
                if command == Command::UnregisterPeriodicTask {
                    let running: Vec<u32> = worker_pids(&dir, parent).into_iter()
                        .filter(|pid| Path::new(&format!("/proc/{pid}")).exists())
                        .collect();
                    *alive.borrow_mut() = Some(running);
                }
            }));
        }

        let (_trigger, exit) = exit_channel();
        let config = HarnessConfig {
            num_workers: 2,
            worker_block_size: 512,
            worker_throttle: Duration::from_millis(1),
            iterations: 64,
            ..config()
        };

        let mut harness = Harness::new(config, K2Client::new(driver.clone()), target)
            .with_exit_flag(exit);
        let report = harness.run().unwrap();

        assert_eq!(report.foreground.writes, 64);
        assert_eq!(report.workers.len(), 2);
        for (worker, state) in report.workers.iter() {
            assert_eq!(*state, Some(ExitState::Exited(0)), "worker {}", worker.pid);
        }

        assert_eq!(worker_pids(dir.path(), parent).len(), 2);
        assert_eq!(*alive_at_unregister.borrow(), Some(vec![]));

        let driver = driver.0.borrow();
        assert!(driver.registrations.is_empty());
        assert_eq!(driver.dispatches.last(), Some(&Command::UnregisterPeriodicTask));
    }
}
