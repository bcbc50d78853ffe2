pub mod error;
pub mod ioctl;
pub mod device;
pub mod k2;
pub mod ionice;
pub mod process;
pub mod worker;
pub mod harness;
pub mod devt;
pub mod utils;

pub mod prelude {
    pub use super::error::prelude::*;
    pub use super::ioctl::prelude::*;
    pub use super::device::prelude::*;
    pub use super::k2::prelude::*;
    pub use super::ionice::prelude::*;
    pub use super::process::prelude::*;
    pub use super::worker::prelude::*;
    pub use super::harness::prelude::*;
    pub use super::devt::prelude::*;
    pub use super::utils::prelude::*;
}
