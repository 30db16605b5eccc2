//! Courtesy tone and ID helper programs.
//!
//! The audio is played by external programs. They're started without
//! waiting, and reaped with a non-blocking check on every tick, so the
//! control loop never stalls on them.
use std::fmt;
use std::process::{Child, Command, Stdio};

use log::{info, warn};

use crate::{Error, Result};

/// Sequence slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Courtesy tone after a transmission.
    Courtesy,
    /// Station identification.
    Id,
}

impl Slot {
    /// All slots.
    pub const ALL: [Slot; 2] = [Slot::Courtesy, Slot::Id];

    fn index(self) -> usize {
        match self {
            Slot::Courtesy => 0,
            Slot::Id => 1,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Slot::Courtesy => "courtesy",
            Slot::Id => "id",
        })
    }
}

/// Result of polling a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// The program exited since the last poll. Reported once.
    Completed,
    /// The program is still running.
    Running,
    /// Nothing running.
    Idle,
}

/// A started program.
pub trait Job: Send {
    /// Process ID, for logging.
    fn id(&self) -> u32;

    /// Non-blocking check for exit. Reaps the process if it has exited.
    fn try_finished(&mut self) -> Result<bool>;

    /// Kill and reap.
    fn stop(&mut self) -> Result<()>;
}

/// Starts programs.
pub trait Runner: Send {
    /// Start `program` with no arguments, without waiting for it.
    fn start(&mut self, program: &str) -> Result<Box<dyn Job>>;
}

/// Runs programs as child processes.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl Runner for ProcessRunner {
    fn start(&mut self, program: &str) -> Result<Box<dyn Job>> {
        let child = Command::new(program)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| Error::Spawn {
                program: program.to_string(),
                source,
            })?;
        Ok(Box::new(ChildJob { child }))
    }
}

struct ChildJob {
    child: Child,
}

impl Job for ChildJob {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_finished(&mut self) -> Result<bool> {
        match self.child.try_wait()? {
            Some(status) => {
                if !status.success() {
                    // Not acted on, the audio is gone either way.
                    info!("Script: [{}] {status}", self.child.id());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn stop(&mut self) -> Result<()> {
        // Fails if the child has already exited; the wait still reaps it.
        let _ = self.child.kill();
        self.child.wait()?;
        Ok(())
    }
}

/// At most one live program per slot.
pub struct Sequencer {
    runner: Box<dyn Runner>,
    programs: [String; 2],
    live: [Option<Box<dyn Job>>; 2],
}

impl Sequencer {
    /// Create sequencer with a program for each slot.
    pub fn new(runner: Box<dyn Runner>, courtesy: &str, ider: &str) -> Self {
        Self {
            runner,
            programs: [courtesy.to_string(), ider.to_string()],
            live: [None, None],
        }
    }

    /// Program bound to a slot.
    #[must_use]
    pub fn program(&self, slot: Slot) -> &str {
        &self.programs[slot.index()]
    }

    /// True if the slot has a program that has not been reaped.
    #[must_use]
    pub fn is_live(&self, slot: Slot) -> bool {
        self.live[slot.index()].is_some()
    }

    /// Start the slot's program, unless it's already running.
    ///
    /// Returns true if a program was started.
    pub fn trigger(&mut self, slot: Slot) -> Result<bool> {
        let i = slot.index();
        if self.live[i].is_some() {
            return Ok(false);
        }
        let job = self.runner.start(&self.programs[i])?;
        info!("Script: [{}] {}", job.id(), self.programs[i]);
        self.live[i] = Some(job);
        Ok(true)
    }

    /// Check the slot without blocking.
    pub fn poll(&mut self, slot: Slot) -> SlotStatus {
        let i = slot.index();
        let Some(job) = self.live[i].as_mut() else {
            return SlotStatus::Idle;
        };
        let done = match job.try_finished() {
            Ok(done) => done,
            Err(e) => {
                // A job we can't check would hold the transmitter forever.
                warn!("Script: [{}] can't be checked, stopping it: {e}", job.id());
                if let Err(e) = job.stop() {
                    warn!("Script: [{}] stop failed: {e}", job.id());
                }
                true
            }
        };
        if !done {
            return SlotStatus::Running;
        }
        info!("Script: [{}] exited", job.id());
        self.live[i] = None;
        SlotStatus::Completed
    }

    /// Kill and reap all live programs.
    pub fn stop_all(&mut self) {
        for slot in Slot::ALL {
            if let Some(mut job) = self.live[slot.index()].take() {
                info!("Script: [{}] stopping {slot}", job.id());
                if let Err(e) = job.stop() {
                    warn!("Script: [{}] stop failed: {e}", job.id());
                }
            }
        }
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.stop_all();
    }
}
