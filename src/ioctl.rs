//! Request encoding for the k2 control device.
//!
//! Every command travels through the same fixed `k2_ioctl` struct. The struct
//! carries two pointers to caller-owned buffers (block device name and a
//! generic string parameter) plus scalar in/out fields. An [`IoctlRequest`]
//! owns both buffers for exactly one call and is zero-filled on construction,
//! so nothing from a previous command can reach the driver.

use std::os::fd::{AsRawFd, BorrowedFd};

use libc::{c_char, pid_t};

use crate::error::K2Error;

pub mod prelude {
    pub use super::{
        Command as IoctlCommand,
        IoctlRequest,
        K2Channel,
        K2_IOCTL_BLK_DEV_NAME_LENGTH,
        K2_IOCTL_CHAR_PARAM_LENGTH,
    };
}

/// Size of the block device name buffer, NUL terminator included.
pub const K2_IOCTL_BLK_DEV_NAME_LENGTH: usize = 32;
/// Size of the generic string parameter buffer, NUL terminator included.
pub const K2_IOCTL_CHAR_PARAM_LENGTH: usize = 4096;

const K2_IOC_MAGIC: u8 = b'k';

/// Kernel side layout of `struct k2_ioctl`.
#[repr(C)]
#[derive(Debug)]
pub struct RawK2Ioctl {
    pub blk_dev: *mut c_char,
    pub string_param: *mut c_char,
    pub task_pid: pid_t,
    pub interval_ns: i64,
    pub u32_param: u32,
}

// _IOWR(type, nr, size) from asm-generic/ioctl.h
const fn iowr(nr: u8) -> u64 {
    const IOC_NRSHIFT: u64 = 0;
    const IOC_TYPESHIFT: u64 = 8;
    const IOC_SIZESHIFT: u64 = 16;
    const IOC_DIRSHIFT: u64 = 30;
    const IOC_READ_WRITE: u64 = 3;

    (IOC_READ_WRITE << IOC_DIRSHIFT)
        | ((std::mem::size_of::<RawK2Ioctl>() as u64) << IOC_SIZESHIFT)
        | ((K2_IOC_MAGIC as u64) << IOC_TYPESHIFT)
        | ((nr as u64) << IOC_NRSHIFT)
}

pub const K2_IOC_GET_VERSION: u64 = iowr(1);
pub const K2_IOC_GET_DEVICES: u64 = iowr(2);
pub const K2_IOC_REGISTER_PERIODIC_TASK: u64 = iowr(3);
pub const K2_IOC_UNREGISTER_PERIODIC_TASK: u64 = iowr(4);
pub const K2_IOC_UNREGISTER_ALL_PERIODIC_TASKS: u64 = iowr(5);
pub const K2_IOC_CURRENT_INFLIGHT_LATENCY: u64 = iowr(6);

#[derive(Debug)]
#[derive(Clone, Copy)]
#[derive(PartialEq, Eq, Hash)]
pub enum Command {
    GetVersion,
    GetActiveDevices,
    RegisterPeriodicTask,
    UnregisterPeriodicTask,
    UnregisterAllPeriodicTasks,
    CurrentInflightLatency,
}

impl Command {
    pub fn request_code(self) -> u64 {
        match self {
            Command::GetVersion => K2_IOC_GET_VERSION,
            Command::GetActiveDevices => K2_IOC_GET_DEVICES,
            Command::RegisterPeriodicTask => K2_IOC_REGISTER_PERIODIC_TASK,
            Command::UnregisterPeriodicTask => K2_IOC_UNREGISTER_PERIODIC_TASK,
            Command::UnregisterAllPeriodicTasks => K2_IOC_UNREGISTER_ALL_PERIODIC_TASKS,
            Command::CurrentInflightLatency => K2_IOC_CURRENT_INFLIGHT_LATENCY,
        }
    }

    /// Whether the command addresses a specific block device.
    pub fn needs_device(self) -> bool {
        !matches!(self, Command::GetVersion | Command::GetActiveDevices)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::GetVersion => "get version",
            Command::GetActiveDevices => "get active devices",
            Command::RegisterPeriodicTask => "register periodic task",
            Command::UnregisterPeriodicTask => "unregister periodic task",
            Command::UnregisterAllPeriodicTasks => "unregister all periodic tasks",
            Command::CurrentInflightLatency => "current inflight latency",
        };

        write!(f, "{name}")
    }
}

/// One request/response exchange with the driver.
#[derive(Debug)]
pub struct IoctlRequest {
    command: Command,
    blk_dev: Box<[u8]>,
    string_param: Box<[u8]>,
    pub task_pid: pid_t,
    pub interval_ns: i64,
    pub u32_param: u32,
}

impl IoctlRequest {
    pub fn new(command: Command, device: Option<&str>) -> Result<Self, K2Error> {
        let mut request = IoctlRequest {
            command,
            blk_dev: vec![0u8; K2_IOCTL_BLK_DEV_NAME_LENGTH].into_boxed_slice(),
            string_param: vec![0u8; K2_IOCTL_CHAR_PARAM_LENGTH].into_boxed_slice(),
            task_pid: 0,
            interval_ns: 0,
            u32_param: 0,
        };

        if let Some(device) = device {
            copy_c_str(&mut request.blk_dev, device)?;
        }

        Ok(request)
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn device_name(&self) -> String {
        decode_c_str(&self.blk_dev)
    }

    pub fn string_param(&self) -> String {
        decode_c_str(&self.string_param)
    }

    /// Fill the string parameter, as the driver does on output.
    pub fn set_string_param(&mut self, value: &str) -> Result<(), K2Error> {
        self.string_param.fill(0);
        copy_c_str(&mut self.string_param, value)
    }

    fn as_raw(&mut self) -> RawK2Ioctl {
        RawK2Ioctl {
            blk_dev: self.blk_dev.as_mut_ptr() as *mut c_char,
            string_param: self.string_param.as_mut_ptr() as *mut c_char,
            task_pid: self.task_pid,
            interval_ns: self.interval_ns,
            u32_param: self.u32_param,
        }
    }

    fn absorb(&mut self, raw: &RawK2Ioctl) {
        self.task_pid = raw.task_pid;
        self.interval_ns = raw.interval_ns;
        self.u32_param = raw.u32_param;
    }
}

/// Anything a request can be dispatched through. Implemented by the device
/// handle; tests substitute an in-memory driver.
pub trait K2Channel {
    fn dispatch(&mut self, request: &mut IoctlRequest) -> Result<(), K2Error>;
}

/// Issue the ioctl for `request` on `fd`. Output fields are copied back into
/// the request on success.
pub fn dispatch(fd: BorrowedFd<'_>, request: &mut IoctlRequest) -> Result<(), K2Error> {
    let command = request.command;
    let mut raw = request.as_raw();

    let res = unsafe {
        libc::ioctl(
            fd.as_raw_fd(),
            command.request_code() as libc::Ioctl,
            &mut raw as *mut RawK2Ioctl,
        )
    };

    if res < 0 {
        return Err(K2Error::CommandRejected {
            command,
            source: std::io::Error::last_os_error(),
        });
    }

    request.absorb(&raw);
    Ok(())
}

fn copy_c_str(buffer: &mut [u8], value: &str) -> Result<(), K2Error> {
    let bytes = value.as_bytes();
    if bytes.len() >= buffer.len() {
        return Err(K2Error::NameTooLong { name: value.to_owned(), max: buffer.len() - 1 });
    }

    buffer[..bytes.len()].copy_from_slice(bytes);
    buffer[bytes.len()] = 0;
    Ok(())
}

fn decode_c_str(buffer: &[u8]) -> String {
    match std::ffi::CStr::from_bytes_until_nul(buffer) {
        Ok(c_str) => c_str.to_string_lossy().into_owned(),
        Err(_) => String::from_utf8_lossy(buffer).into_owned(),
    }
}
