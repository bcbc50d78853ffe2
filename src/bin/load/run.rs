use std::time::Duration;

use k2_test_suite::prelude::*;

#[derive(clap::Parser, Debug)]
pub struct MyArgs {
    /// block device name, e.g. nvme0n1
    #[arg(short = 'd', long = "device", env = "K2_DEVICE", default_value = "nvme0n1", value_name = "name")]
    pub device: String,

    /// k2 control device
    #[arg(long = "control-dev", env = "K2_CONTROL_DEV", default_value = K2_IOSCHED_DEV, value_name = "path")]
    pub control_dev: String,

    /// number of background workers
    #[arg(short = 'n', long = "workers", default_value = "8", value_name = "usize")]
    pub num_workers: usize,

    /// background write size
    #[arg(long = "worker-block-size", default_value = "32768", value_name = "bytes: usize")]
    pub worker_block_size: usize,

    /// pause after every background write
    #[arg(long = "worker-throttle", default_value = "100", value_name = "ns: u64")]
    pub worker_throttle_ns: u64,

    /// foreground write size
    #[arg(short = 'b', long = "block-size", default_value = "262144", value_name = "bytes: usize")]
    pub block_size: usize,

    /// number of foreground writes
    #[arg(short = 'i', long = "iterations", default_value = "1024", value_name = "u64")]
    pub iterations: u64,

    /// periodic task interval
    #[arg(short = 'I', long = "interval", default_value = "10000000000", value_name = "ns: u64")]
    pub interval_ns: u64,

    /// pause after every foreground write
    #[arg(short = 'w', long = "write-pause", default_value = "0", value_name = "us: u64")]
    pub write_pause_us: u64,

    /// wait before stopping the workers
    #[arg(short = 's', long = "settle", default_value = "3000", value_name = "ms: u64")]
    pub settle_ms: u64,

    /// worker priorities: by-index, random[:seed], uniform:<prio> or a list like rt:0,be:4,idle
    #[arg(short = 'p', long = "priorities", default_value = "by-index", value_name = "policy")]
    pub priorities: PriorityPolicy,

    /// I/O priority of the foreground loop, e.g. rt:0
    #[arg(long = "foreground-priority", value_name = "class[:level]")]
    pub foreground_priority: Option<IoPriority>,

    /// nice level of this process
    #[arg(long = "nice", default_value = "-20", allow_negative_numbers = true, value_name = "i32")]
    pub nice: i32,

    /// keep the current nice level
    #[arg(long = "keep-nice")]
    pub keep_nice: bool,

    /// leave the workers' nice levels alone instead of giving worker i level i
    #[arg(long = "no-worker-nice")]
    pub no_worker_nice: bool,

    /// open the block device with O_APPEND
    #[arg(long = "append")]
    pub append: bool,

    /// abort when the periodic task cannot be registered
    #[arg(long = "require-registration")]
    pub require_registration: bool,

    /// debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl MyArgs {
    fn harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            disk: self.device.clone(),
            num_workers: self.num_workers,
            worker_block_size: self.worker_block_size,
            worker_throttle: Duration::from_nanos(self.worker_throttle_ns),
            foreground_block_size: self.block_size,
            iterations: self.iterations,
            task_interval: Duration::from_nanos(self.interval_ns),
            write_pause: Duration::from_micros(self.write_pause_us),
            settle_time: Duration::from_millis(self.settle_ms),
            priorities: self.priorities.clone(),
            foreground_priority: self.foreground_priority,
            nice: (!self.keep_nice).then_some(self.nice),
            worker_nice: !self.no_worker_nice,
            require_registration: self.require_registration,
        }
    }
}

pub fn main(args: MyArgs) -> Result<i32, Box<dyn std::error::Error>> {
    init_logging(args.verbose)?;

    let target = RawBlockDevice::for_disk(&args.device).with_append(args.append);
    let client = K2Client::with_device(&args.control_dev);

    let mut harness = Harness::new(args.harness_config(), client, target);
    let report = harness.run()?;

    for (worker, state) in report.workers.iter() {
        match state {
            Some(state) => log::info!("k2-load-{} ({}, {}) {state}", worker.index, worker.pid, worker.priority),
            None => log::warn!("k2-load-{} ({}) was not reaped", worker.index, worker.pid),
        }
    }

    log::info!("{} foreground writes, {} bytes, {} restarts{}",
        report.foreground.writes, report.foreground.bytes, report.foreground.restarts,
        if report.interrupted { " (interrupted)" } else { "" });

    Ok(report.exit_code())
}
