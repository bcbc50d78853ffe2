use k2_test_suite::prelude::*;

use crate::{require_driver, CommonArgs};

/// Interval the round trip registers with.
const ROUNDTRIP_INTERVAL_NS: i64 = 5_000_000;

#[derive(clap::Parser, Debug)]
pub struct MyArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// task pid, defaults to this process
    #[arg(short = 'p', long = "pid", value_name = "pid: i32")]
    pub pid: Option<i32>,
}

impl MyArgs {
    fn pid(&self) -> libc::pid_t {
        self.pid.unwrap_or(current_pid() as libc::pid_t)
    }
}

pub fn batch_roundtrip(args: &MyArgs) -> Result<(), Box<dyn std::error::Error>> {
    batch_test_header("register_roundtrip", "registry");

    batch_test_result_skippable(roundtrip(args))
}

pub fn batch_unreg_noop(args: &MyArgs) -> Result<(), Box<dyn std::error::Error>> {
    batch_test_header("unregister_noop", "registry");

    batch_test_result_skippable(unreg_noop(args))
}

fn roundtrip(args: &MyArgs) -> Result<Skippable<(), Box<dyn std::error::Error>>, Box<dyn std::error::Error>> {
    let client = K2Client::with_device(&args.common.control_dev);
    if let Some(reason) = require_driver(&client)? {
        return Ok(Skippable::Skipped(reason.into()));
    }

    let device = &args.common.device;
    let pid = args.pid();

    client.register_task(device, pid, ROUNDTRIP_INTERVAL_NS)?;

    let listed = client.get_active_devices()
        .map(|devices| devices.split_whitespace().any(|dev| dev == device));

    // Unregister before reporting so a failed check leaves nothing behind.
    client.unregister_task(device, pid)?;

    if !listed? {
        Err(format!("{device} is not listed as active after registering pid {pid}"))?;
    }

    client.unregister_task(device, pid)
        .map_err(|err| format!("Repeated unregister failed: {err}"))?;

    Ok(Skippable::Result(()))
}

fn unreg_noop(args: &MyArgs) -> Result<Skippable<(), Box<dyn std::error::Error>>, Box<dyn std::error::Error>> {
    let client = K2Client::with_device(&args.common.control_dev);
    if let Some(reason) = require_driver(&client)? {
        return Ok(Skippable::Skipped(reason.into()));
    }

    let device = &args.common.device;
    let pid = args.pid();

    client.unregister_task(device, pid)?;
    client.unregister_task(device, pid)?;
    client.unregister_all_tasks(device)?;

    Ok(Skippable::Result(()))
}
