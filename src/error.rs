use crate::ioctl::Command;

pub mod prelude {
    pub use super::{
        K2Error,
        UnavailableReason,
    };
}

/// Why the control device (or a raw block device) could not be opened.
#[derive(Debug)]
#[derive(Clone, Copy)]
#[derive(PartialEq, Eq)]
pub enum UnavailableReason {
    NotFound,
    PermissionDenied,
    Busy,
    Other,
}

impl UnavailableReason {
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ENOENT) | Some(libc::ENODEV) | Some(libc::ENXIO) => UnavailableReason::NotFound,
            Some(libc::EACCES) | Some(libc::EPERM) => UnavailableReason::PermissionDenied,
            Some(libc::EBUSY) => UnavailableReason::Busy,
            _ => UnavailableReason::Other,
        }
    }
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::NotFound => write!(f, "not found"),
            UnavailableReason::PermissionDenied => write!(f, "permission denied"),
            UnavailableReason::Busy => write!(f, "busy"),
            UnavailableReason::Other => write!(f, "unavailable"),
        }
    }
}

#[derive(Debug)]
pub enum K2Error {
    DeviceUnavailable {
        path: String,
        reason: UnavailableReason,
        source: std::io::Error,
    },
    HandleInvalid(std::io::Error),
    CommandRejected {
        command: Command,
        source: std::io::Error,
    },
    NameTooLong {
        name: String,
        max: usize,
    },
    InvalidInterval(i64),
    DeviceFull(std::io::Error),
    WriteFault(std::io::Error),
    PriorityRejected(std::io::Error),
    Spawn(std::io::Error),
}

impl K2Error {
    pub fn device_unavailable(path: &str, source: std::io::Error) -> Self {
        K2Error::DeviceUnavailable {
            path: path.to_owned(),
            reason: UnavailableReason::from_io(&source),
            source,
        }
    }

    /// The underlying OS error, if this failure came from a syscall.
    pub fn os_error(&self) -> Option<&std::io::Error> {
        match self {
            K2Error::DeviceUnavailable { source, .. } => Some(source),
            K2Error::CommandRejected { source, .. } => Some(source),
            K2Error::HandleInvalid(err)
            | K2Error::DeviceFull(err)
            | K2Error::WriteFault(err)
            | K2Error::PriorityRejected(err)
            | K2Error::Spawn(err) => Some(err),
            K2Error::NameTooLong { .. } | K2Error::InvalidInterval(_) => None,
        }
    }

    /// Process exit status for this error: the raw errno when there is one,
    /// 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        self.os_error()
            .and_then(|err| err.raw_os_error())
            .filter(|code| *code != 0)
            .unwrap_or(1)
    }
}

impl std::fmt::Display for K2Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            K2Error::DeviceUnavailable { path, reason, source }
                => write!(f, "Could not open {path} ({reason}): {source}"),
            K2Error::HandleInvalid(err)
                => write!(f, "Could not close device handle: {err}"),
            K2Error::CommandRejected { command, source }
                => write!(f, "ioctl {command} failed: {source}"),
            K2Error::NameTooLong { name, max }
                => write!(f, "Name \"{name}\" does not fit the {max} byte ioctl buffer"),
            K2Error::InvalidInterval(interval)
                => write!(f, "Interval must be a positive number of nanoseconds, got {interval}"),
            K2Error::DeviceFull(err)
                => write!(f, "Device full: {err}"),
            K2Error::WriteFault(err)
                => write!(f, "Write fault: {err}"),
            K2Error::PriorityRejected(err)
                => write!(f, "Priority change rejected: {err}"),
            K2Error::Spawn(err)
                => write!(f, "Could not fork worker process: {err}"),
        }
    }
}

impl std::error::Error for K2Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.os_error().map(|err| err as &(dyn std::error::Error + 'static))
    }
}
