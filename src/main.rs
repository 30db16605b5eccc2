//! The repeater controller.
//!
//! ```text
//! repeater -v -l
//! ```
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use repeater::config::Config;
use repeater::controller::{CancellationToken, Controller};
use repeater::lock::LockFile;
use repeater::pins::PinController;
use repeater::port::PortDevice;
use repeater::ppdev::Parport;
use repeater::sequencer::{ProcessRunner, Sequencer};

#[derive(clap::Parser, Debug)]
#[command(about = "The repeater controller.")]
struct Opt {
    /// Clutter the screen.
    #[arg(short = 'v')]
    verbose: bool,

    /// Log to syslog.
    #[arg(short = 'l')]
    syslog: bool,
}

fn main() -> Result<()> {
    let opt = match Opt::try_parse() {
        Ok(opt) => opt,
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayHelp => {
            // Asking for help doesn't run the controller, so it's a failure.
            eprint!("{}", e.render());
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };
    repeater::logging::init(opt.verbose, opt.syslog)?;
    info!("Starting: repeater, version {}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    let dev = Parport::open(&config.device).context("Can't access parallel port")?;
    let port = PortDevice::open(Box::new(dev), Box::new(LockFile::new(&config.lock_file)))
        .context("Can't claim parallel port")?;
    let seq = Sequencer::new(Box::new(ProcessRunner), &config.courtesy, &config.ider);
    let mut ctl = Controller::new(
        PinController::new(port),
        seq,
        config.timing.clone(),
        Instant::now(),
    );

    let cancel = CancellationToken::new();
    let c = cancel.clone();
    ctrlc::set_handler(move || {
        c.cancel();
    })
    .context("setting signal handler")?;

    ctl.run(&cancel);
    ctl.shutdown();
    info!("Exiting");
    Ok(())
}
