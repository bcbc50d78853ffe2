use std::os::fd::{AsFd, AsRawFd, IntoRawFd, OwnedFd};

use log::debug;

use crate::error::K2Error;
use crate::ioctl::{dispatch, IoctlRequest, K2Channel};

pub mod prelude {
    pub use super::{
        DeviceHandle,
        K2_IOSCHED_DEV,
    };
}

pub const K2_IOSCHED_DEV: &str = "/dev/k2-iosched";

/// An open file descriptor on the k2 control device.
///
/// The descriptor is private to the process that opened it; a forked child
/// must open its own.
#[derive(Debug)]
pub struct DeviceHandle {
    fd: Option<OwnedFd>,
    path: String,
}

impl DeviceHandle {
    pub fn open(path: &str) -> Result<DeviceHandle, K2Error> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| K2Error::device_unavailable(path, err))?;

        debug!("Opened {path} as fd {}", file.as_raw_fd());

        Ok(DeviceHandle { fd: Some(OwnedFd::from(file)), path: path.to_owned() })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Close the descriptor and report the result of `close(2)`.
    pub fn close(mut self) -> Result<(), K2Error> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<(), K2Error> {
        let fd = match self.fd.take() {
            Some(fd) => fd.into_raw_fd(),
            None => return Err(K2Error::HandleInvalid(std::io::Error::from_raw_os_error(libc::EBADF))),
        };

        let res = unsafe { libc::close(fd) };
        if res < 0 {
            return Err(K2Error::HandleInvalid(std::io::Error::last_os_error()));
        }

        debug!("Closed {} (fd {fd})", self.path);
        Ok(())
    }
}

impl K2Channel for DeviceHandle {
    fn dispatch(&mut self, request: &mut IoctlRequest) -> Result<(), K2Error> {
        let fd = self.fd.as_ref()
            .ok_or_else(|| K2Error::HandleInvalid(std::io::Error::from_raw_os_error(libc::EBADF)))?;

        dispatch(fd.as_fd(), request)
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if self.fd.is_some() {
            if let Err(err) = self.close_inner() {
                log::warn!("{err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnavailableReason;

    #[test]
    fn missing_node_is_not_found() {
        match DeviceHandle::open("/dev/k2-iosched-does-not-exist") {
            Err(K2Error::DeviceUnavailable { reason, path, .. }) => {
                assert_eq!(reason, UnavailableReason::NotFound);
                assert_eq!(path, "/dev/k2-iosched-does-not-exist");
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn open_then_close() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_owned();

        let handle = DeviceHandle::open(&path).unwrap();
        assert!(handle.is_open());
        assert_eq!(handle.path(), path);
        handle.close().unwrap();
    }

    #[test]
    fn ioctl_on_regular_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut handle = DeviceHandle::open(file.path().to_str().unwrap()).unwrap();

        let mut request = IoctlRequest::new(crate::ioctl::Command::GetVersion, None).unwrap();
        match handle.dispatch(&mut request) {
            Err(K2Error::CommandRejected { source, .. }) => assert_eq!(source.raw_os_error(), Some(libc::ENOTTY)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
