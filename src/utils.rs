use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub mod prelude {
    pub use super::{
        init_logging,
        is_batch_test,
        set_batch_test,
        create_ctrlc_handler,
        exit_channel,
        ExitFlag,
        ExitTrigger,
        batch_test_header,
        batch_test_result_skippable,
        batch_test_success,
        batch_test_skipped,
        batch_test_failure,
        Skippable,
    };
}

/// Set and non-empty.
pub fn is_env_var_set(var: &str) -> bool {
    std::env::var(var).is_ok_and(|value| !value.is_empty())
}

/// Debug output when `verbose` is set or `DEBUG` is non-empty.
pub fn init_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    use simplelog::*;

    let level =
        if verbose || is_env_var_set("DEBUG") {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };

    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Error)
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();

    TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto)?;
    Ok(())
}

pub unsafe fn set_batch_test() {
    std::env::set_var("BATCH_TEST", "1");
}

pub fn is_batch_test() -> bool {
    is_env_var_set("BATCH_TEST")
}

/// Receiving end of a cancellation request. Once a request has been seen the
/// flag stays set for every clone.
#[derive(Clone)]
pub struct ExitFlag {
    ch: crossbeam::channel::Receiver<()>,
    latched: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct ExitTrigger {
    ch: crossbeam::channel::Sender<()>,
}

impl ExitTrigger {
    pub fn trigger(&self) {
        let _ = self.ch.try_send(());
    }
}

pub fn exit_channel() -> (ExitTrigger, ExitFlag) {
    let (send, recv) = crossbeam::channel::bounded(1);

    (ExitTrigger { ch: send }, ExitFlag { ch: recv, latched: Arc::new(AtomicBool::new(false)) })
}

impl ExitFlag {
    pub fn is_exit(&self) -> bool {
        use crossbeam::channel::TryRecvError::*;

        if self.latched.load(Ordering::Acquire) {
            return true;
        }

        match self.ch.try_recv() {
            Ok(()) => {
                self.latched.store(true, Ordering::Release);
                true
            },
            Err(Empty) | Err(Disconnected) => false,
        }
    }

    /// Sleep for `timeout` unless cancellation arrives first. Returns whether
    /// cancellation was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_exit() {
            return true;
        }

        crossbeam::channel::select! {
            recv(self.ch) -> msg => match msg {
                Ok(()) => {
                    self.latched.store(true, Ordering::Release);
                    true
                },
                Err(_) => {
                    std::thread::sleep(timeout);
                    false
                },
            },
            recv(crossbeam::channel::after(timeout)) -> _ => false,
        }
    }
}

/// SIGINT and SIGTERM only send on the channel; whoever holds the flag does
/// the cleanup.
pub fn create_ctrlc_handler() -> Result<ExitFlag, Box<dyn std::error::Error>> {
    let (trigger, flag) = exit_channel();

    ctrlc::set_handler(move || { trigger.trigger(); })?;
    Ok(flag)
}

#[derive(Clone, Copy)]
enum Tone {
    Green,
    Red,
    Yellow,
}

/// `label` in colour when `TERM_COLORS` is set.
fn paint(tone: Tone, label: &str) -> String {
    if !is_env_var_set("TERM_COLORS") {
        return label.to_owned();
    }

    let code = match tone {
        Tone::Green => 32,
        Tone::Red => 31,
        Tone::Yellow => 33,
    };
    format!("\x1b[{code}m{label}\x1b[0m")
}

pub fn batch_test_success() {
    println!("{}", paint(Tone::Green, "Success ✔"));
}

pub fn batch_test_failure<E: std::fmt::Display>(err: E) {
    println!("{}", paint(Tone::Red, "Failure ✖"));
    println!("{} {err}", paint(Tone::Red, "    Reason:"));
}

pub fn batch_test_skipped<T: std::fmt::Display>(msg: T) {
    println!("{}", paint(Tone::Yellow, "Skipped ⛒"));
    println!("{} {msg}", paint(Tone::Yellow, "    Reason:"));
}

/// Prints `[category] name: ` without a newline; `BATCH_TEST_CUSTOM_NAME`
/// overrides the name.
pub fn batch_test_header(test_name: &str, test_category: &str) {
    let name = std::env::var("BATCH_TEST_CUSTOM_NAME")
        .ok()
        .filter(|custom| !custom.is_empty())
        .unwrap_or_else(|| test_name.to_owned());

    print!("[{test_category}] {name}: ");
    let _ = std::io::stdout().flush();
}

/// In batch mode a failure is only reported, so the next check still runs.
fn batch_outcome<T>(result: Result<T, Box<dyn std::error::Error>>) -> Result<(), Box<dyn std::error::Error>> {
    match result {
        Err(_) if is_batch_test() => Ok(()),
        other => other.map(|_| ()),
    }
}

pub fn batch_test_result_skippable<T>(result: Result<Skippable<T, Box<dyn std::error::Error>>, Box<dyn std::error::Error>>) -> Result<(), Box<dyn std::error::Error>> {
    match &result {
        Ok(Skippable::Result(_)) => batch_test_success(),
        Ok(Skippable::Skipped(reason)) => batch_test_skipped(reason),
        Err(err) => batch_test_failure(err),
    }

    batch_outcome(result)
}

/// A check that may not apply on this machine, e.g. because the driver is
/// missing or the caller lacks privileges.
pub enum Skippable<T, E> {
    Result(T),
    Skipped(E)
}
