//! Locked access to the I/O port.
//!
//! All access goes through claim → operation → release. The claim takes the
//! inter-process [`Lock`] first, so a pin toggling tool running at the same
//! time can't interleave with a read-modify-write cycle of ours.
use log::warn;

use crate::Result;
use crate::lock::Lock;

/// Status register bit: carrier present (COS).
///
/// The port inverts the Busy line in hardware, so the bit is already
/// active high here even though COS is active low on the wire.
pub const STATUS_COS: u8 = 0x80;

/// Status register bits carrying the DTMF decoder output Q1-Q4.
pub const STATUS_DTMF_MASK: u8 = 0x78;
const STATUS_DTMF_SHIFT: u32 = 3;

/// Data register bit: remote link key request. Driven by the IRLP software,
/// which shares the data register with us.
pub const DATA_LINK_KEY: u8 = 0x02;

/// Raw port access.
///
/// Implementations do no locking of their own. Use through [`PortDevice`].
pub trait Device: Send {
    /// Claim exclusive access to the port.
    fn claim(&mut self) -> Result<()>;

    /// Release the port.
    fn release(&mut self) -> Result<()>;

    /// Read the status (input) register.
    fn read_status(&mut self) -> Result<u8>;

    /// Read back the data (output) register.
    fn read_data(&mut self) -> Result<u8>;

    /// Write the data (output) register.
    fn write_data(&mut self, value: u8) -> Result<()>;
}

/// Both port registers, read under one claim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Status register: inputs from the radio.
    pub status: u8,

    /// Data register: link key input, and our own outputs.
    pub data: u8,
}

impl Snapshot {
    /// Create from the two raw bytes, status first.
    #[must_use]
    pub fn from_bytes(b: [u8; 2]) -> Self {
        Self {
            status: b[0],
            data: b[1],
        }
    }

    /// Raw bytes, status first.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 2] {
        [self.status, self.data]
    }

    /// True if the receiver has a carrier.
    #[must_use]
    pub fn carrier(&self) -> bool {
        self.status & STATUS_COS != 0
    }

    /// DTMF decoder code, 0-15. Zero means no digit.
    #[must_use]
    pub fn dtmf(&self) -> u8 {
        (self.status & STATUS_DTMF_MASK) >> STATUS_DTMF_SHIFT
    }

    /// True if the remote link asks for the transmitter.
    #[must_use]
    pub fn link_key(&self) -> bool {
        self.data & DATA_LINK_KEY != 0
    }
}

/// Port device with the claim/release discipline.
pub struct PortDevice {
    dev: Box<dyn Device>,
    lock: Box<dyn Lock>,
}

impl PortDevice {
    /// Take over an opened device, and check that it can be claimed at all.
    pub fn open(dev: Box<dyn Device>, lock: Box<dyn Lock>) -> Result<Self> {
        let mut p = Self { dev, lock };
        p.claim()?;
        p.release()?;
        Ok(p)
    }

    /// Take the lock, then claim the device.
    ///
    /// If the device claim fails the lock is dropped again.
    pub fn claim(&mut self) -> Result<()> {
        self.lock.lock()?;
        if let Err(e) = self.dev.claim() {
            if let Err(ue) = self.lock.unlock() {
                warn!("Unlock after failed claim: {ue}");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Release the device, and then the lock.
    ///
    /// The lock is released even if the device release fails. The first
    /// error is returned.
    pub fn release(&mut self) -> Result<()> {
        let rel = self.dev.release();
        let unl = self.lock.unlock();
        rel.and(unl)
    }

    /// Run `f` with the port claimed.
    fn claimed<T>(&mut self, f: impl FnOnce(&mut dyn Device) -> Result<T>) -> Result<T> {
        self.claim()?;
        let ret = f(self.dev.as_mut());
        if let Err(e) = self.release() {
            warn!("Release failed: {e}");
        }
        ret
    }

    /// Read both registers.
    pub fn read(&mut self) -> Result<Snapshot> {
        self.claimed(|d| {
            let status = d.read_status()?;
            let data = d.read_data()?;
            Ok(Snapshot { status, data })
        })
    }

    /// Write the data register.
    pub fn write(&mut self, value: u8) -> Result<()> {
        self.claimed(|d| d.write_data(value))
    }

    /// Read-modify-write of the data register under one claim.
    ///
    /// Returns the value written.
    pub fn modify(&mut self, f: impl FnOnce(u8) -> u8) -> Result<u8> {
        self.claimed(|d| {
            let out = f(d.read_data()?);
            d.write_data(out)?;
            Ok(out)
        })
    }
}
