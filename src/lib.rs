/*! This crate is the control core of an amateur radio repeater
controller.

It is written for IRLP style interface boards, which hang off a PC
parallel port. The board brings the receiver's COS (carrier operated
squelch) and a DTMF decoder in on the status lines, and the data lines
drive the transmitter PTT, an audio muter, CTCSS encoder, a cooling fan
and a couple of auxiliary outputs.

# Architecture overview

Every 5ms the controller samples the port, runs all the timers, and
writes back whatever output changes that implies.

```text
   [ Parport (ppdev ioctls) ]   [ LockFile (flock) ]
              ↓                        ↓
          [ PortDevice: claim / read / modify / release ]
              ↓                        ↑
          [ Controller::tick ] → [ PinController ]
              ↓
          [ Sequencer: "courtesy" and "ider" helper programs ]
```

The courtesy tone and the station ID are played by external programs.
The controller only decides when to start them, and keeps the
transmitter keyed until they exit.

# Example

Driving the controller against simulated hardware:

```
use std::time::{Duration, Instant};
use repeater::config::Timing;
use repeater::controller::Controller;
use repeater::pins::PinController;
use repeater::port::PortDevice;
use repeater::sequencer::Sequencer;
use repeater::sim::{SimDevice, SimLock, SimRunner};

let (dev, port) = SimDevice::new();
let (runner, _jobs) = SimRunner::new();
let port_dev = PortDevice::open(Box::new(dev), Box::new(SimLock::new()))?;
let seq = Sequencer::new(Box::new(runner), "courtesy", "ider");
let start = Instant::now();
let mut ctl = Controller::new(PinController::new(port_dev), seq, Timing::default(), start);

port.set_carrier(true);
ctl.tick(start + Duration::from_millis(5));
assert!(ctl.state().keyed);
# Ok::<(), repeater::Error>(())
```
 */
pub mod config;
pub mod controller;
pub mod lock;
pub mod logging;
pub mod pins;
pub mod port;
pub mod ppdev;
pub mod sequencer;
pub mod sim;

/// Repeater error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Plain IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The port device could not be opened.
    #[error("can't open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A ppdev ioctl failed.
    #[error("{op}: {errno}")]
    Ioctl {
        op: &'static str,
        #[source]
        errno: nix::errno::Errno,
    },

    /// Opening or locking the lock file failed.
    #[error("lock file {path}: {source}")]
    Lock {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A helper program could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Anything else.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create error from message.
    pub fn msg(msg: impl Into<String>) -> Self {
        Self::Msg(msg.into())
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/* vim: textwidth=80
 */
