use k2_test_suite::prelude::*;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Register a periodic task
    #[value(name = "reg")]
    Register,

    /// Unregister a periodic task
    #[value(name = "unreg")]
    Unregister,

    /// Unregister all periodic tasks of a device
    #[value(name = "unreg_all")]
    UnregisterAll,
}

/// Register or unregister periodic tasks with the k2 I/O scheduler
#[derive(clap::Parser, Debug)]
#[command(about, long_about = None)]
pub struct MyArgs {
    /// operation to perform
    #[arg(short = 'm', long = "mode", value_enum)]
    pub mode: Mode,

    /// block device name, e.g. nvme0n1
    #[arg(short = 'd', long = "device", value_name = "name")]
    pub device: String,

    /// task pid, required by reg and unreg
    #[arg(short = 'p', long = "pid", value_name = "pid: i32")]
    pub pid: Option<i32>,

    /// sampling interval, required by reg
    #[arg(short = 'i', long = "interval", value_name = "ns: i64", allow_negative_numbers = true)]
    pub interval_ns: Option<i64>,

    /// k2 control device
    #[arg(long = "control-dev", env = "K2_CONTROL_DEV", default_value = K2_IOSCHED_DEV, value_name = "path")]
    pub control_dev: String,

    /// debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

fn usage_error(msg: &str) -> ! {
    use clap::CommandFactory;

    let mut cmd = MyArgs::command();
    let _ = cmd.error(clap::error::ErrorKind::MissingRequiredArgument, msg).print();
    std::process::exit(1);
}

fn run(args: &MyArgs) -> Result<(), K2Error> {
    let client = K2Client::with_device(&args.control_dev);

    match args.mode {
        Mode::Register => {
            let (Some(pid), Some(interval_ns)) = (args.pid, args.interval_ns) else {
                usage_error("--mode reg requires --pid and --interval");
            };
            client.register_task(&args.device, pid, interval_ns)
        },
        Mode::Unregister => {
            let Some(pid) = args.pid else {
                usage_error("--mode unreg requires --pid");
            };
            client.unregister_task(&args.device, pid)
        },
        Mode::UnregisterAll => client.unregister_all_tasks(&args.device),
    }
}

fn main() {
    use clap::error::ErrorKind;

    let args = match <MyArgs as clap::Parser>::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            std::process::exit(code);
        },
    };

    if let Err(err) = init_logging(args.verbose) {
        eprintln!("{err}");
    }

    if let Err(err) = run(&args) {
        log::error!("{err}");
        std::process::exit(err.exit_code());
    }
}
