mod ionice;

use k2_test_suite::prelude::*;

#[derive(clap::Parser, Debug)]
pub struct DeviceArgs {
    /// block device name, e.g. nvme0n1
    #[arg(env = "K2_DEVICE", default_value = "nvme0n1", value_name = "name")]
    pub device: String,
}

#[derive(clap::Parser, Debug)]
pub struct DevTArgs {
    /// device number as major:minor, e.g. 259:0
    #[arg(value_name = "major:minor")]
    pub dev: DevT,
}

#[derive(clap::Parser, Debug)]
#[command(about, long_about = None)]
pub struct MyArgs {
    /// k2 control device
    #[arg(long = "control-dev", env = "K2_CONTROL_DEV", default_value = K2_IOSCHED_DEV, global = true, value_name = "path")]
    pub control_dev: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Print the k2 scheduler version
    #[command(name = "version", verbatim_doc_comment)]
    Version,

    /// Print the devices managed by k2
    #[command(name = "devices", verbatim_doc_comment)]
    Devices,

    /// Print the current in-flight latency of a device
    #[command(name = "inflight-latency", verbatim_doc_comment)]
    InflightLatency(DeviceArgs),

    /// Print the I/O priority of a process
    #[command(name = "ionice-get", verbatim_doc_comment)]
    IoniceGet(ionice::GetArgs),

    /// Change the I/O priority of a process
    #[command(name = "ionice-set", verbatim_doc_comment)]
    IoniceSet(ionice::SetArgs),

    /// Translate major:minor to the kernel's internal dev_t
    ///
    /// The printed value is what block layer tracepoints report in their
    /// dev field, e.g. for filtering events of the benchmarked device.
    #[command(name = "dev-t", verbatim_doc_comment)]
    DevNumber(DevTArgs),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = <MyArgs as clap::Parser>::parse();

    init_logging(false)?;

    let client = K2Client::with_device(&args.control_dev);

    use Command::*;

    let result = match args.command {
        Version => client.get_version().map(|version| println!("{version}")),
        Devices => client.get_active_devices().map(|devices| println!("{devices}")),
        InflightLatency(args) => client.get_inflight_latency(&args.device)
            .map(|latency| println!("{latency}")),
        IoniceGet(args) => ionice::get(args),
        IoniceSet(args) => ionice::set(args),
        DevNumber(args) => {
            println!("{}", args.dev.to_kernel());
            Ok(())
        },
    };

    if let Err(err) = result {
        log::error!("{err}");
        std::process::exit(err.exit_code());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn control_dev_is_accepted_around_the_subcommand() {
        let before = MyArgs::try_parse_from(["k2-tools", "--control-dev", "/tmp/k2", "version"]).unwrap();
        assert_eq!(before.control_dev, "/tmp/k2");
        assert!(matches!(before.command, Command::Version));

        let after = MyArgs::try_parse_from(["k2-tools", "inflight-latency", "sda", "--control-dev", "/tmp/k2"]).unwrap();
        assert_eq!(after.control_dev, "/tmp/k2");
        assert!(matches!(after.command, Command::InflightLatency(DeviceArgs { ref device }) if device == "sda"));
    }

    #[test]
    fn arguments_are_consistent() {
        use clap::CommandFactory;

        MyArgs::command().debug_assert();
    }
}
