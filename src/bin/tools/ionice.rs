use k2_test_suite::prelude::*;

#[derive(clap::Parser, Debug)]
pub struct GetArgs {
    /// process pid, defaults to this process
    #[arg(short = 'p', long = "pid", value_name = "PID")]
    pub pid: Option<u32>,
}

#[derive(clap::Parser, Debug)]
pub struct SetArgs {
    /// process pid, defaults to this process
    #[arg(short = 'p', long = "pid", value_name = "PID")]
    pub pid: Option<u32>,

    /// scheduling class: none, rt, be, idle or 0-3
    #[arg(short = 'c', long = "class", value_name = "class")]
    pub class: IoClass,

    /// priority level within the class
    #[arg(short = 'n', long = "level", default_value = "0", value_parser = clap::value_parser!(i32).range(0..=7), value_name = "0-7")]
    pub level: i32,
}

pub fn get(args: GetArgs) -> Result<(), K2Error> {
    let priority =
        match args.pid {
            Some(pid) => get_io_priority(pid)?,
            None => get_own_io_priority()?,
        };

    println!("{priority}");
    Ok(())
}

pub fn set(args: SetArgs) -> Result<(), K2Error> {
    let priority = IoPriority::new(args.class, IoLevel::from_raw(args.level));

    match args.pid {
        Some(pid) => set_io_priority(pid, priority)?,
        None => set_own_io_priority(priority)?,
    }

    log::info!("I/O priority of {} set to {priority}", args.pid.unwrap_or_else(current_pid));
    Ok(())
}
