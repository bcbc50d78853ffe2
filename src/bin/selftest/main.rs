mod priorities;
mod registry;

use k2_test_suite::prelude::*;

#[derive(clap::Args, Debug, Clone)]
pub struct CommonArgs {
    /// block device name, e.g. nvme0n1
    #[arg(short = 'd', long = "device", env = "K2_DEVICE", default_value = "nvme0n1", value_name = "name")]
    pub device: String,

    /// k2 control device
    #[arg(long = "control-dev", env = "K2_CONTROL_DEV", default_value = K2_IOSCHED_DEV, value_name = "path")]
    pub control_dev: String,

    /// debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

#[derive(clap::Parser, Debug)]
#[command(about, long_about = None)]
pub enum Command {
    /// Run all self tests
    #[command(name = "all", verbatim_doc_comment)]
    All(priorities::MyArgs),

    /// Register/unregister round trip
    ///
    /// Registers a periodic task, checks that the device is listed as
    /// active and unregisters the task twice. Both unregistrations must
    /// succeed.
    #[command(name = "roundtrip", verbatim_doc_comment)]
    Roundtrip(registry::MyArgs),

    /// Unregister without registration
    ///
    /// Unregistering a task, or all tasks, of a device that has none must
    /// succeed.
    #[command(name = "unreg-noop", verbatim_doc_comment)]
    UnregNoop(registry::MyArgs),

    /// Per-worker I/O priorities
    ///
    /// Forks three load workers (best-effort level 4 and two realtime
    /// levels) and checks that each one reports its own I/O priority.
    /// Requires CAP_SYS_ADMIN for the realtime class.
    #[command(name = "priorities", verbatim_doc_comment)]
    Priorities(priorities::MyArgs),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = <Command as clap::Parser>::parse();

    use Command::*;

    match args {
        All(args) => {
            init_logging(args.common.verbose)?;
            unsafe { set_batch_test(); }

            let registry_args = registry::MyArgs { common: args.common.clone(), pid: None };
            registry::batch_roundtrip(&registry_args)?;
            registry::batch_unreg_noop(&registry_args)?;
            priorities::batch_runner(&args)
        },
        Roundtrip(args) => {
            init_logging(args.common.verbose)?;
            registry::batch_roundtrip(&args)
        },
        UnregNoop(args) => {
            init_logging(args.common.verbose)?;
            registry::batch_unreg_noop(&args)
        },
        Priorities(args) => {
            init_logging(args.common.verbose)?;
            priorities::batch_runner(&args)
        },
    }
}

/// Skip when the driver is not loaded.
pub fn require_driver(client: &K2Client) -> Result<Option<String>, Box<dyn std::error::Error>> {
    match client.get_version() {
        Ok(_) => Ok(None),
        Err(K2Error::DeviceUnavailable { path, reason: UnavailableReason::NotFound, .. }) =>
            Ok(Some(format!("{path} not found, is the k2 module loaded?"))),
        Err(err) => Err(err.into()),
    }
}
