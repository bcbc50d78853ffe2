use std::ffi::CString;

use log::debug;

use crate::error::K2Error;

pub mod prelude {
    pub use super::{
        ExitState,
        fork_process,
        send_signal,
        terminate,
        wait_pid,
        set_nice,
        get_nice,
        SignalMask,
        block_termination_signals,
        unblock_termination_signals,
        set_process_name,
        get_process_name,
        current_pid,
    };
}

/// How a reaped child ended.
#[derive(Debug)]
#[derive(Clone, Copy)]
#[derive(PartialEq, Eq)]
pub enum ExitState {
    Exited(i32),
    Signaled(i32),
}

impl ExitState {
    pub fn success(&self) -> bool {
        matches!(self, ExitState::Exited(0))
    }
}

impl std::fmt::Display for ExitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitState::Exited(code) => write!(f, "exited with status {code}"),
            ExitState::Signaled(sig) => write!(f, "killed by signal {sig}"),
        }
    }
}

pub fn current_pid() -> u32 {
    std::process::id()
}

/// Fork the calling process. The child runs `child` and exits with the
/// returned status; only the parent returns, with the child's pid.
///
/// Must be called before the parent spawns any thread: only the forking
/// thread survives in the child.
pub fn fork_process<F>(child: F) -> Result<u32, K2Error>
    where F: FnOnce() -> i32
{
    let pid = unsafe { libc::fork() };

    if pid < 0 {
        return Err(K2Error::Spawn(std::io::Error::last_os_error()));
    }

    if pid == 0 {
        let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(child))
            .unwrap_or(101);
        std::process::exit(code);
    }

    debug!("Forked pid {pid}");
    Ok(pid as u32)
}

pub fn send_signal(pid: u32, signal: libc::c_int) -> Result<(), std::io::Error> {
    let res = unsafe { libc::kill(pid as libc::pid_t, signal) };

    if res < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub fn terminate(pid: u32) -> Result<(), std::io::Error> {
    send_signal(pid, libc::SIGTERM)?;

    debug!("Sent SIGTERM to pid {pid}");
    Ok(())
}

/// Block until `pid` exits. Retries on EINTR.
pub fn wait_pid(pid: u32) -> Result<ExitState, std::io::Error> {
    let mut status: libc::c_int = 0;

    loop {
        let res = unsafe { libc::waitpid(pid as libc::pid_t, &mut status as *mut libc::c_int, 0) };
        if res >= 0 {
            break;
        }

        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }

    let state =
        if libc::WIFEXITED(status) {
            ExitState::Exited(libc::WEXITSTATUS(status))
        } else {
            ExitState::Signaled(libc::WTERMSIG(status))
        };

    debug!("Reaped pid {pid}: {state}");
    Ok(state)
}

/// `setpriority(PRIO_PROCESS, pid, nice)`; pid 0 is the caller.
pub fn set_nice(pid: u32, nice: i32) -> Result<(), std::io::Error> {
    let res = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, nice) };

    if res < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Nice level of `pid`; pid 0 is the caller.
pub fn get_nice(pid: u32) -> Result<i32, std::io::Error> {
    // -1 is a valid nice level, errno tells it apart from a failure.
    let res = unsafe {
        *libc::__errno_location() = 0;
        libc::getpriority(libc::PRIO_PROCESS, pid as libc::id_t)
    };

    match std::io::Error::last_os_error() {
        err if res == -1 && err.raw_os_error().is_some_and(|code| code != 0) => Err(err),
        _ => Ok(res),
    }
}

fn termination_set() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGTERM);
        set
    }
}

fn change_mask(how: libc::c_int, set: &libc::sigset_t, previous: Option<&mut libc::sigset_t>) -> Result<(), std::io::Error> {
    let previous = previous.map_or(std::ptr::null_mut(), |previous| previous as *mut libc::sigset_t);

    let res = unsafe { libc::pthread_sigmask(how, set, previous) };
    if res != 0 {
        Err(std::io::Error::from_raw_os_error(res))
    } else {
        Ok(())
    }
}

/// SIGINT/SIGTERM held pending on the calling thread until the previous mask
/// is restored, explicitly or on drop. Children forked meanwhile inherit the
/// blocked mask.
pub struct SignalMask {
    previous: Option<libc::sigset_t>,
}

pub fn block_termination_signals() -> Result<SignalMask, std::io::Error> {
    let mut previous: libc::sigset_t = unsafe { std::mem::zeroed() };
    change_mask(libc::SIG_BLOCK, &termination_set(), Some(&mut previous))?;

    debug!("SIGINT/SIGTERM blocked");
    Ok(SignalMask { previous: Some(previous) })
}

impl SignalMask {
    /// Pending signals are delivered as soon as this returns.
    pub fn restore(mut self) -> Result<(), std::io::Error> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> Result<(), std::io::Error> {
        match self.previous.take() {
            Some(previous) => change_mask(libc::SIG_SETMASK, &previous, None),
            None => Ok(()),
        }
    }
}

impl Drop for SignalMask {
    fn drop(&mut self) {
        let _ = self.restore_inner();
    }
}

/// Undo a mask inherited across fork.
pub fn unblock_termination_signals() -> Result<(), std::io::Error> {
    change_mask(libc::SIG_UNBLOCK, &termination_set(), None)
}

/// Name of the calling thread as shown in `/proc/<pid>/comm`. The kernel
/// keeps at most 15 bytes.
pub fn set_process_name(name: &str) -> Result<(), std::io::Error> {
    let name = CString::new(name)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;

    let res = unsafe { libc::prctl(libc::PR_SET_NAME, name.as_ptr() as libc::c_ulong, 0, 0, 0) };

    if res < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub fn get_process_name(pid: u32) -> Result<String, std::io::Error> {
    Ok(std::fs::read_to_string(format!("/proc/{pid}/comm"))?.trim().to_string())
}
