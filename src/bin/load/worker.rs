use std::time::Duration;

use k2_test_suite::prelude::*;

#[derive(clap::Parser, Debug)]
pub struct MyArgs {
    /// block device name, e.g. nvme0n1
    #[arg(short = 'd', long = "device", env = "K2_DEVICE", default_value = "nvme0n1", value_name = "name")]
    pub device: String,

    /// worker index, used in the process name
    #[arg(long = "index", default_value = "0", value_name = "usize")]
    pub index: usize,

    /// I/O priority, e.g. be:4
    #[arg(short = 'p', long = "priority", default_value = "be:0", value_name = "class[:level]")]
    pub priority: IoPriority,

    /// CPU nice level, unchanged if not given
    #[arg(long = "nice", allow_negative_numbers = true, value_name = "i32")]
    pub nice: Option<i32>,

    /// write size
    #[arg(short = 'b', long = "block-size", default_value = "32768", value_name = "bytes: usize")]
    pub block_size: usize,

    /// pause after every write
    #[arg(long = "throttle", default_value = "100", value_name = "ns: u64")]
    pub throttle_ns: u64,

    /// stop after this many writes
    #[arg(long = "max-writes", value_name = "u64")]
    pub max_writes: Option<u64>,

    /// open the block device with O_APPEND
    #[arg(long = "append")]
    pub append: bool,

    /// debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

pub fn main(args: MyArgs) -> Result<i32, Box<dyn std::error::Error>> {
    init_logging(args.verbose)?;

    let spec = WorkerSpec {
        index: args.index,
        priority: args.priority,
        nice: args.nice,
        load: LoadConfig {
            block_size: args.block_size,
            throttle: Duration::from_nanos(args.throttle_ns),
            max_writes: args.max_writes,
        },
    };
    let target = RawBlockDevice::for_disk(&args.device).with_append(args.append);

    Ok(worker_main(&spec, &target))
}
