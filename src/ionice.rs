//! I/O scheduling class and level of a process.
//!
//! See https://www.kernel.org/doc/html/latest/block/ioprio.html

use std::str::FromStr;

use libc::{syscall, SYS_ioprio_get, SYS_ioprio_set};

pub mod prelude {
    pub use super::{
        IoClass,
        IoLevel,
        IoPriority,
        IoPrioError,
        set_io_priority,
        get_io_priority,
        set_own_io_priority,
        get_own_io_priority,
    };
}

const IOPRIO_WHO_PROCESS: libc::c_int = 1;
pub const IOPRIO_CLASS_SHIFT: u32 = 13;
const IOPRIO_PRIO_MASK: i32 = (1 << IOPRIO_CLASS_SHIFT) - 1;
const IOPRIO_CLASS_MASK: i32 = 0x07;

#[derive(Debug)]
#[derive(Clone, Copy)]
#[derive(PartialEq, Eq, Hash)]
pub enum IoClass {
    None,
    RealTime,
    BestEffort,
    Idle,
    NA,
}

impl IoClass {
    pub fn from_raw(class: i32) -> Self {
        match class {
            0 => IoClass::None,
            1 => IoClass::RealTime,
            2 => IoClass::BestEffort,
            3 => IoClass::Idle,
            _ => IoClass::NA,
        }
    }

    pub fn as_raw(self) -> Option<i32> {
        match self {
            IoClass::None => Some(0),
            IoClass::RealTime => Some(1),
            IoClass::BestEffort => Some(2),
            IoClass::Idle => Some(3),
            IoClass::NA => None,
        }
    }
}

impl std::fmt::Display for IoClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IoClass::None => "none",
            IoClass::RealTime => "realtime",
            IoClass::BestEffort => "best-effort",
            IoClass::Idle => "idle",
            IoClass::NA => "N/A",
        };

        write!(f, "{name}")
    }
}

impl FromStr for IoClass {
    type Err = IoPrioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(IoClass::None),
            "rt" | "realtime" | "1" => Ok(IoClass::RealTime),
            "be" | "best-effort" | "2" => Ok(IoClass::BestEffort),
            "idle" | "3" => Ok(IoClass::Idle),
            other => Err(IoPrioError::ParseError(format!("Unknown I/O class \"{other}\""))),
        }
    }
}

/// Level within a class, 0 is the highest.
#[derive(Debug)]
#[derive(Clone, Copy)]
#[derive(PartialEq, Eq, Hash)]
pub enum IoLevel {
    L0,
    L1,
    L2,
    L3,
    L4,
    L5,
    L6,
    L7,
    NA,
}

impl IoLevel {
    pub const ALL: [IoLevel; 8] = [
        IoLevel::L0, IoLevel::L1, IoLevel::L2, IoLevel::L3,
        IoLevel::L4, IoLevel::L5, IoLevel::L6, IoLevel::L7,
    ];

    pub fn from_raw(level: i32) -> Self {
        usize::try_from(level).ok()
            .and_then(|level| IoLevel::ALL.get(level).copied())
            .unwrap_or(IoLevel::NA)
    }

    pub fn as_raw(self) -> Option<i32> {
        IoLevel::ALL.iter()
            .position(|level| *level == self)
            .map(|pos| pos as i32)
    }
}

impl std::fmt::Display for IoLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_raw() {
            Some(level) => write!(f, "{level}"),
            None => write!(f, "N/A"),
        }
    }
}

#[derive(Debug)]
#[derive(Clone, Copy)]
#[derive(PartialEq, Eq, Hash)]
pub struct IoPriority {
    pub class: IoClass,
    pub level: IoLevel,
}

impl IoPriority {
    pub fn new(class: IoClass, level: IoLevel) -> Self {
        IoPriority { class, level }
    }

    pub fn best_effort(level: IoLevel) -> Self {
        IoPriority::new(IoClass::BestEffort, level)
    }

    pub fn realtime(level: IoLevel) -> Self {
        IoPriority::new(IoClass::RealTime, level)
    }

    pub fn idle() -> Self {
        IoPriority::new(IoClass::Idle, IoLevel::L0)
    }

    /// `IOPRIO_PRIO_VALUE(class, level)`.
    pub fn encode(self) -> Result<i32, IoPrioError> {
        let class = self.class.as_raw().ok_or(IoPrioError::Unencodable(self))?;
        let level = self.level.as_raw().ok_or(IoPrioError::Unencodable(self))?;

        Ok((class << IOPRIO_CLASS_SHIFT) | level)
    }

    pub fn decode(ioprio: i32) -> Self {
        IoPriority {
            class: IoClass::from_raw((ioprio >> IOPRIO_CLASS_SHIFT) & IOPRIO_CLASS_MASK),
            level: IoLevel::from_raw(ioprio & IOPRIO_PRIO_MASK),
        }
    }
}

impl std::fmt::Display for IoPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.class, self.level)
    }
}

/// Parses `<class>[:<level>]`, e.g. `rt:0`, `be:4`, `idle`. A missing level
/// means level 0.
impl FromStr for IoPriority {
    type Err = IoPrioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use nom::Parser;
        use nom::bytes::complete::*;
        use nom::character::complete::*;
        use nom::combinator::*;
        use nom::sequence::*;

        let class_parser = map_res(
            take_while1::<_, &str, ()>(|c: char| c.is_ascii_alphanumeric() || c == '-'),
            IoClass::from_str
        );
        let level_parser = map_res(preceded(tag(":"), digit1), |s: &str| s.parse::<i32>());
        let mut parser = all_consuming((class_parser, opt(level_parser)));

        let (class, level) = parser.parse(s.trim())
            .map_err(|_| IoPrioError::ParseError(format!("Invalid I/O priority \"{s}\"")))?.1;

        let level = match level {
            Some(raw) => match IoLevel::from_raw(raw) {
                IoLevel::NA => return Err(IoPrioError::ParseError(format!("I/O level {raw} out of range 0-7"))),
                level => level,
            },
            None => IoLevel::L0,
        };

        Ok(IoPriority { class, level })
    }
}

#[derive(Debug)]
pub enum IoPrioError {
    SyscallError(std::io::Error),
    Unencodable(IoPriority),
    ParseError(String),
}

impl std::fmt::Display for IoPrioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "I/O priority error: ")?;

        match self {
            IoPrioError::SyscallError(error)
                => write!(f, "Syscall error: {error}"),
            IoPrioError::Unencodable(prio)
                => write!(f, "Cannot encode {prio}"),
            IoPrioError::ParseError(msg)
                => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for IoPrioError {}

impl From<IoPrioError> for crate::error::K2Error {
    fn from(value: IoPrioError) -> Self {
        match value {
            IoPrioError::SyscallError(err) => crate::error::K2Error::PriorityRejected(err),
            other => crate::error::K2Error::PriorityRejected(
                std::io::Error::new(std::io::ErrorKind::InvalidInput, other.to_string())),
        }
    }
}

/// Pid 0 addresses the calling process.
pub fn set_io_priority(pid: u32, priority: IoPriority) -> Result<(), IoPrioError> {
    let ioprio = priority.encode()?;

    let res = unsafe {
        syscall(
            SYS_ioprio_set,
            IOPRIO_WHO_PROCESS          as libc::c_int,
            pid                         as libc::pid_t,
            ioprio                      as libc::c_int,
        )
    };

    if res < 0 {
        Err(IoPrioError::SyscallError(std::io::Error::last_os_error()))
    } else {
        Ok(())
    }
}

pub fn get_io_priority(pid: u32) -> Result<IoPriority, IoPrioError> {
    let res = unsafe {
        syscall(
            SYS_ioprio_get,
            IOPRIO_WHO_PROCESS          as libc::c_int,
            pid                         as libc::pid_t,
        )
    };

    if res < 0 {
        Err(IoPrioError::SyscallError(std::io::Error::last_os_error()))
    } else {
        Ok(IoPriority::decode(res as i32))
    }
}

pub fn set_own_io_priority(priority: IoPriority) -> Result<(), IoPrioError> {
    set_io_priority(0, priority)
}

pub fn get_own_io_priority() -> Result<IoPriority, IoPrioError> {
    get_io_priority(0)
}
