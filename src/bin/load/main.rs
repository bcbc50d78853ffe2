mod run;
mod worker;

#[derive(clap::Parser, Debug)]
#[command(about, long_about = None)]
pub enum Command {
    /// Foreground/background benchmark
    ///
    /// Registers this process as a periodic task on the given device, forks
    /// a set of background writers with their own I/O priorities and runs a
    /// bounded foreground write loop. Workers are stopped and reaped and the
    /// task is unregistered when the loop ends or on Ctrl+C.
    #[command(name = "run", verbatim_doc_comment)]
    Run(run::MyArgs),

    /// Single load worker
    ///
    /// Runs one background writer in the foreground, without forking,
    /// until Ctrl+C. Exits with the errno of a fatal write error.
    #[command(name = "worker", verbatim_doc_comment)]
    Worker(worker::MyArgs),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = <Command as clap::Parser>::parse();

    use Command::*;

    let code = match args {
        Run(args) => run::main(args)?,
        Worker(args) => worker::main(args)?,
    };

    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}
