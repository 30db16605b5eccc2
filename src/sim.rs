//! Simulated hardware and helper programs.
//!
//! Really only useful for tests. Each simulated part comes with a hook that
//! shares its state, so a test can set inputs, inject failures, and look at
//! what the controller did.
use std::sync::{Arc, Mutex, MutexGuard};

use crate::lock::Lock;
use crate::port::{DATA_LINK_KEY, Device, STATUS_COS, STATUS_DTMF_MASK};
use crate::sequencer::{Job, Runner};
use crate::{Error, Result};

fn ioctl_err(op: &'static str) -> Error {
    Error::Ioctl {
        op,
        errno: nix::errno::Errno::EIO,
    }
}

#[derive(Debug, Default)]
struct PortState {
    status: u8,
    data: u8,
    claimed: bool,
    claims: usize,
    writes: usize,
    fail_claims: usize,
    fail_releases: usize,
    fail_reads: usize,
    fail_writes: usize,
}

/// Simulated port.
pub struct SimDevice {
    inner: Arc<Mutex<PortState>>,
}

impl SimDevice {
    /// Create a port with all lines low, and a hook into it.
    pub fn new() -> (Self, PortHook) {
        let inner = Arc::new(Mutex::new(PortState::default()));
        (
            Self {
                inner: inner.clone(),
            },
            PortHook { inner },
        )
    }

    fn state(&self) -> MutexGuard<'_, PortState> {
        self.inner.lock().unwrap()
    }

    fn check_claimed(s: &PortState, op: &'static str) -> Result<()> {
        if !s.claimed {
            return Err(Error::msg(format!("{op} on unclaimed port")));
        }
        Ok(())
    }
}

impl Device for SimDevice {
    fn claim(&mut self) -> Result<()> {
        let mut s = self.state();
        if s.claimed {
            return Err(Error::msg("port claimed twice"));
        }
        if s.fail_claims > 0 {
            s.fail_claims -= 1;
            return Err(ioctl_err("PPCLAIM"));
        }
        s.claimed = true;
        s.claims += 1;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut s = self.state();
        Self::check_claimed(&s, "PPRELEASE")?;
        s.claimed = false;
        if s.fail_releases > 0 {
            s.fail_releases -= 1;
            return Err(ioctl_err("PPRELEASE"));
        }
        Ok(())
    }

    fn read_status(&mut self) -> Result<u8> {
        let mut s = self.state();
        Self::check_claimed(&s, "PPRSTATUS")?;
        if s.fail_reads > 0 {
            s.fail_reads -= 1;
            return Err(ioctl_err("PPRSTATUS"));
        }
        Ok(s.status)
    }

    fn read_data(&mut self) -> Result<u8> {
        let s = self.state();
        Self::check_claimed(&s, "PPRDATA")?;
        Ok(s.data)
    }

    fn write_data(&mut self, value: u8) -> Result<()> {
        let mut s = self.state();
        Self::check_claimed(&s, "PPWDATA")?;
        if s.fail_writes > 0 {
            s.fail_writes -= 1;
            return Err(ioctl_err("PPWDATA"));
        }
        s.data = value;
        s.writes += 1;
        Ok(())
    }
}

/// Hook into a [`SimDevice`].
#[derive(Clone)]
pub struct PortHook {
    inner: Arc<Mutex<PortState>>,
}

impl PortHook {
    fn state(&self) -> MutexGuard<'_, PortState> {
        self.inner.lock().unwrap()
    }

    /// Set or clear receiver carrier.
    pub fn set_carrier(&self, on: bool) {
        let mut s = self.state();
        if on {
            s.status |= STATUS_COS;
        } else {
            s.status &= !STATUS_COS;
        }
    }

    /// Set DTMF decoder code, 0-15.
    pub fn set_dtmf(&self, code: u8) {
        let mut s = self.state();
        s.status = (s.status & !STATUS_DTMF_MASK) | ((code << 3) & STATUS_DTMF_MASK);
    }

    /// Set or clear the remote link key request.
    pub fn set_link_key(&self, on: bool) {
        let mut s = self.state();
        if on {
            s.data |= DATA_LINK_KEY;
        } else {
            s.data &= !DATA_LINK_KEY;
        }
    }

    /// Overwrite the data register.
    pub fn set_data(&self, data: u8) {
        self.state().data = data;
    }

    /// Current data register.
    #[must_use]
    pub fn data(&self) -> u8 {
        self.state().data
    }

    /// Number of successful data register writes.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.state().writes
    }

    /// Number of successful claims.
    #[must_use]
    pub fn claims(&self) -> usize {
        self.state().claims
    }

    /// True if the port is claimed right now.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.state().claimed
    }

    /// Fail the next `n` claims.
    pub fn fail_claims(&self, n: usize) {
        self.state().fail_claims = n;
    }

    /// Fail the next `n` releases.
    pub fn fail_releases(&self, n: usize) {
        self.state().fail_releases = n;
    }

    /// Fail the next `n` status reads.
    pub fn fail_reads(&self, n: usize) {
        self.state().fail_reads = n;
    }

    /// Fail the next `n` writes.
    pub fn fail_writes(&self, n: usize) {
        self.state().fail_writes = n;
    }
}

#[derive(Debug, Default)]
struct LockState {
    held: bool,
    locks: usize,
}

/// In-process stand-in for the lock file. Clones share the lock.
///
/// Locking it twice is an error rather than a deadlock.
#[derive(Clone, Default)]
pub struct SimLock {
    inner: Arc<Mutex<LockState>>,
}

impl SimLock {
    /// Create unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if held.
    #[must_use]
    pub fn held(&self) -> bool {
        self.inner.lock().unwrap().held
    }

    /// Number of times the lock was taken.
    #[must_use]
    pub fn locks(&self) -> usize {
        self.inner.lock().unwrap().locks
    }
}

impl Lock for SimLock {
    fn lock(&mut self) -> Result<()> {
        let mut s = self.inner.lock().unwrap();
        if s.held {
            return Err(Error::msg("lock taken twice"));
        }
        s.held = true;
        s.locks += 1;
        Ok(())
    }

    fn unlock(&mut self) -> Result<()> {
        let mut s = self.inner.lock().unwrap();
        if !s.held {
            return Err(Error::msg("unlock of lock not held"));
        }
        s.held = false;
        Ok(())
    }
}

#[derive(Debug)]
struct SimProc {
    program: String,
    finished: bool,
    stopped: bool,
    reaped: bool,
}

#[derive(Debug, Default)]
struct Procs {
    procs: Vec<SimProc>,
    fail_starts: bool,
    fail_checks: bool,
}

/// Simulated program runner. Programs run until the test finishes them.
pub struct SimRunner {
    inner: Arc<Mutex<Procs>>,
}

impl SimRunner {
    /// Create runner and a hook into it.
    pub fn new() -> (Self, JobsHook) {
        let inner = Arc::new(Mutex::new(Procs::default()));
        (
            Self {
                inner: inner.clone(),
            },
            JobsHook { inner },
        )
    }
}

impl Runner for SimRunner {
    fn start(&mut self, program: &str) -> Result<Box<dyn Job>> {
        let mut p = self.inner.lock().unwrap();
        if p.fail_starts {
            return Err(Error::Spawn {
                program: program.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        p.procs.push(SimProc {
            program: program.to_string(),
            finished: false,
            stopped: false,
            reaped: false,
        });
        Ok(Box::new(SimJob {
            index: p.procs.len() - 1,
            inner: self.inner.clone(),
        }))
    }
}

struct SimJob {
    index: usize,
    inner: Arc<Mutex<Procs>>,
}

impl Job for SimJob {
    fn id(&self) -> u32 {
        1000 + self.index as u32
    }

    fn try_finished(&mut self) -> Result<bool> {
        let p = self.inner.lock().unwrap();
        if p.fail_checks {
            return Err(Error::Io(std::io::ErrorKind::Other.into()));
        }
        Ok(p.procs[self.index].finished)
    }

    fn stop(&mut self) -> Result<()> {
        let mut p = self.inner.lock().unwrap();
        let j = &mut p.procs[self.index];
        j.finished = true;
        j.stopped = true;
        Ok(())
    }
}

impl Drop for SimJob {
    fn drop(&mut self) {
        if let Ok(mut p) = self.inner.lock() {
            p.procs[self.index].reaped = true;
        }
    }
}

/// Hook into a [`SimRunner`].
#[derive(Clone)]
pub struct JobsHook {
    inner: Arc<Mutex<Procs>>,
}

impl JobsHook {
    /// Number of times `program` was started.
    #[must_use]
    pub fn started(&self, program: &str) -> usize {
        let p = self.inner.lock().unwrap();
        p.procs.iter().filter(|j| j.program == program).count()
    }

    /// Number of `program` instances not yet reaped.
    #[must_use]
    pub fn live(&self, program: &str) -> usize {
        let p = self.inner.lock().unwrap();
        p.procs
            .iter()
            .filter(|j| j.program == program && !j.reaped)
            .count()
    }

    /// Make all running instances of `program` exit.
    pub fn finish(&self, program: &str) {
        let mut p = self.inner.lock().unwrap();
        for j in p.procs.iter_mut().filter(|j| j.program == program) {
            j.finished = true;
        }
    }

    /// Number of `program` instances that were killed.
    #[must_use]
    pub fn stopped(&self, program: &str) -> usize {
        let p = self.inner.lock().unwrap();
        p.procs
            .iter()
            .filter(|j| j.program == program && j.stopped)
            .count()
    }

    /// Make exit checks fail, or not.
    pub fn fail_checks(&self, fail: bool) {
        self.inner.lock().unwrap().fail_checks = fail;
    }

    /// Make starts fail, or not.
    pub fn fail_starts(&self, fail: bool) {
        self.inner.lock().unwrap().fail_starts = fail;
    }
}
