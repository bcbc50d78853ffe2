use std::time::{Duration, Instant};

use k2_test_suite::prelude::*;

use crate::CommonArgs;

#[derive(clap::Parser, Debug)]
pub struct MyArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// file the workers write to; never point this at a disk with data on it
    #[arg(short = 't', long = "target", default_value = "/dev/null", value_name = "path")]
    pub target: String,

    /// how long to wait for the workers to apply their priorities
    #[arg(long = "timeout", default_value = "2000", value_name = "ms: u64")]
    pub timeout_ms: u64,
}

pub fn batch_runner(args: &MyArgs) -> Result<(), Box<dyn std::error::Error>> {
    batch_test_header("worker_priorities", "ionice");

    batch_test_result_skippable(main(args))
}

fn assigned_priorities() -> Vec<IoPriority> {
    vec![
        IoPriority::best_effort(IoLevel::L4),
        IoPriority::realtime(IoLevel::L1),
        IoPriority::realtime(IoLevel::L5),
    ]
}

pub fn main(args: &MyArgs) -> Result<Skippable<(), Box<dyn std::error::Error>>, Box<dyn std::error::Error>> {
    if unsafe { libc::geteuid() } != 0 {
        return Ok(Skippable::Skipped("the realtime I/O class requires root".into()));
    }

    let target = RawBlockDevice::new(&args.target);

    let workers: Vec<LoadWorker> = assigned_priorities().into_iter()
        .enumerate()
        .map(|(index, priority)| {
            let spec = WorkerSpec {
                index,
                priority,
                nice: None,
                load: LoadConfig { block_size: 4096, throttle: Duration::from_millis(1), max_writes: None },
            };
            spawn_worker(&spec, &target)
        })
        .collect::<Result<_, _>>()?;

    let checked = check_priorities(&workers, Duration::from_millis(args.timeout_ms));

    let mut failed = Vec::new();
    for mut worker in workers {
        worker.terminate()?;
        let state = worker.wait()?;
        if !state.success() {
            failed.push(format!("worker {} {state}", worker.pid()));
        }
    }

    checked?;
    if !failed.is_empty() {
        Err(failed.join(", "))?;
    }

    Ok(Skippable::Result(()))
}

/// Poll every worker until it reports the priority it was assigned.
fn check_priorities(workers: &[LoadWorker], timeout: Duration) -> Result<(), Box<dyn std::error::Error>> {
    for worker in workers {
        let expected = worker.descriptor().priority;
        let deadline = Instant::now() + timeout;

        loop {
            let actual = get_io_priority(worker.pid())?;
            if actual == expected {
                break;
            }

            if Instant::now() >= deadline {
                Err(format!("worker {} has I/O priority {actual}, expected {expected}", worker.pid()))?;
            }

            std::thread::sleep(Duration::from_millis(10));
        }
    }

    Ok(())
}
