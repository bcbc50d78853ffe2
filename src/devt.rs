//! Translation of `major:minor` device numbers to the kernel's internal
//! `dev_t` (see kdev_t.h). Trace filters on the benchmarked device match
//! against this value.

use std::str::FromStr;

pub mod prelude {
    pub use super::DevT;
}

pub const MINORBITS: u32 = 20;
pub const MINORMASK: u32 = (1 << MINORBITS) - 1;
const MAJOR_MAX: u32 = (1 << (32 - MINORBITS)) - 1;

#[derive(Debug)]
#[derive(Clone, Copy)]
#[derive(PartialEq, Eq)]
pub struct DevT {
    pub major: u32,
    pub minor: u32,
}

impl DevT {
    pub fn new(major: u32, minor: u32) -> Result<DevT, String> {
        if major > MAJOR_MAX {
            return Err(format!("Major number {major} exceeds {MAJOR_MAX}"));
        }
        if minor > MINORMASK {
            return Err(format!("Minor number {minor} exceeds {MINORMASK}"));
        }

        Ok(DevT { major, minor })
    }

    /// `MKDEV(major, minor)`.
    pub fn to_kernel(self) -> u32 {
        (self.major << MINORBITS) | self.minor
    }

    pub fn from_kernel(dev: u32) -> DevT {
        DevT { major: dev >> MINORBITS, minor: dev & MINORMASK }
    }
}

impl std::fmt::Display for DevT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

impl FromStr for DevT {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use nom::Parser;
        use nom::bytes::complete::*;
        use nom::character::complete::*;
        use nom::combinator::*;

        let number_parser = || map_res(digit1::<&str, ()>, |s: &str| s.parse::<u32>());
        let mut parser = all_consuming((number_parser(), tag(":"), number_parser()));

        let (major, _, minor) = parser.parse(s.trim())
            .map_err(|_| format!("Expected <major>:<minor>, got \"{s}\""))?.1;

        DevT::new(major, minor)
    }
}
