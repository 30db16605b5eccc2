//! Named output pins and inputs of the interface board.
//!
//! Data register, as wired on the IRLP board:
//!
//! ```text
//! Bit   Mask   Purpose            Active
//! D0    0x01   link key (unused)  low
//! D1    0x02   link key           high   (input to us, driven by IRLP)
//! D2    0x04   KEY   (AUX1)       high
//! D3    0x08   MUTE  (AUX2)       low
//! D4    0x10   CTCSS (AUX3)       low
//! D5    0x20   FAN   (AUX4)       high
//! D6    0x40   AUX5               high
//! D7    0x80   force key (unused) high
//! ```
use std::fmt;
use std::ops::RangeInclusive;

use log::debug;

use crate::Result;
use crate::port::{PortDevice, Snapshot};

/// DTMF codes that count as "a digit is being decoded".
///
/// The decoder field is only four bits, so 16 and 17 never occur.
pub const DTMF_BUSY: RangeInclusive<u8> = 1..=17;

/// Electrical level that means "on".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// On is a set bit.
    ActiveHigh,
    /// On is a cleared bit.
    ActiveLow,
}

/// Output lines of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputPin {
    /// Transmitter PTT.
    Key,
    /// Receiver audio muter.
    Mute,
    /// CTCSS encoder.
    Ctcss,
    /// Cooling fan.
    Fan,
    /// AUX4. Same line as the fan.
    Aux4,
    /// AUX5.
    Aux5,
}

impl OutputPin {
    /// All output pins.
    pub const ALL: [OutputPin; 6] = [
        OutputPin::Key,
        OutputPin::Mute,
        OutputPin::Ctcss,
        OutputPin::Fan,
        OutputPin::Aux4,
        OutputPin::Aux5,
    ];

    /// Data register bit.
    #[must_use]
    pub fn mask(self) -> u8 {
        match self {
            OutputPin::Key => 0x04,
            OutputPin::Mute => 0x08,
            OutputPin::Ctcss => 0x10,
            OutputPin::Fan | OutputPin::Aux4 => 0x20,
            OutputPin::Aux5 => 0x40,
        }
    }

    /// Polarity of the line.
    #[must_use]
    pub fn polarity(self) -> Polarity {
        match self {
            OutputPin::Mute | OutputPin::Ctcss => Polarity::ActiveLow,
            OutputPin::Key | OutputPin::Fan | OutputPin::Aux4 | OutputPin::Aux5 => {
                Polarity::ActiveHigh
            }
        }
    }

    /// Name of the pin.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            OutputPin::Key => "key",
            OutputPin::Mute => "mute",
            OutputPin::Ctcss => "ctcss",
            OutputPin::Fan => "fan",
            OutputPin::Aux4 => "aux4",
            OutputPin::Aux5 => "aux5",
        }
    }

    /// Data register value with this pin turned logically on or off. All
    /// other bits are left alone.
    #[must_use]
    pub fn apply(self, data: u8, on: bool) -> u8 {
        let high = on == (self.polarity() == Polarity::ActiveHigh);
        if high {
            data | self.mask()
        } else {
            data & !self.mask()
        }
    }

    /// Logical state of this pin in a data register value.
    #[must_use]
    pub fn is_on(self, data: u8) -> bool {
        let high = data & self.mask() != 0;
        high == (self.polarity() == Polarity::ActiveHigh)
    }
}

impl fmt::Display for OutputPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded inputs for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inputs {
    /// Receiver carrier.
    pub carrier: bool,
    /// DTMF decoder code.
    pub dtmf: u8,
    /// Remote link asks for the transmitter.
    pub link_key: bool,
}

impl Inputs {
    /// Decode a port snapshot.
    #[must_use]
    pub fn decode(s: &Snapshot) -> Self {
        Self {
            carrier: s.carrier(),
            dtmf: s.dtmf(),
            link_key: s.link_key(),
        }
    }

    /// True if a DTMF digit is being decoded.
    #[must_use]
    pub fn dtmf_busy(&self) -> bool {
        DTMF_BUSY.contains(&self.dtmf)
    }

    /// Carrier or link key.
    #[must_use]
    pub fn active(&self) -> bool {
        self.carrier || self.link_key
    }
}

/// Drives named pins through the port.
///
/// The on/off helpers return the new logical state, so callers can do
/// `keyed = pins.key()?`.
pub struct PinController {
    port: PortDevice,
}

impl PinController {
    /// Create controller on an opened port.
    pub fn new(port: PortDevice) -> Self {
        Self { port }
    }

    /// Read and decode the inputs.
    pub fn read_inputs(&mut self) -> Result<Inputs> {
        Ok(Inputs::decode(&self.port.read()?))
    }

    /// Turn a pin logically on or off.
    pub fn set_pin(&mut self, pin: OutputPin, on: bool) -> Result<()> {
        debug!("Doing: {pin} {}", if on { "on" } else { "off" });
        self.port.modify(|d| pin.apply(d, on))?;
        Ok(())
    }

    fn switch(&mut self, pin: OutputPin, on: bool) -> Result<bool> {
        self.set_pin(pin, on)?;
        Ok(on)
    }

    /// Key the transmitter.
    pub fn key(&mut self) -> Result<bool> {
        self.switch(OutputPin::Key, true)
    }

    /// Unkey the transmitter.
    pub fn unkey(&mut self) -> Result<bool> {
        self.switch(OutputPin::Key, false)
    }

    /// Mute receiver audio.
    pub fn mute(&mut self) -> Result<bool> {
        self.switch(OutputPin::Mute, true)
    }

    /// Unmute receiver audio.
    pub fn unmute(&mut self) -> Result<bool> {
        self.switch(OutputPin::Mute, false)
    }

    pub fn ctcss_on(&mut self) -> Result<bool> {
        self.switch(OutputPin::Ctcss, true)
    }

    pub fn ctcss_off(&mut self) -> Result<bool> {
        self.switch(OutputPin::Ctcss, false)
    }

    pub fn fan_on(&mut self) -> Result<bool> {
        self.switch(OutputPin::Fan, true)
    }

    pub fn fan_off(&mut self) -> Result<bool> {
        self.switch(OutputPin::Fan, false)
    }

    pub fn aux4_on(&mut self) -> Result<bool> {
        self.switch(OutputPin::Aux4, true)
    }

    pub fn aux4_off(&mut self) -> Result<bool> {
        self.switch(OutputPin::Aux4, false)
    }

    pub fn aux5_on(&mut self) -> Result<bool> {
        self.switch(OutputPin::Aux5, true)
    }

    pub fn aux5_off(&mut self) -> Result<bool> {
        self.switch(OutputPin::Aux5, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{PortHook, SimDevice, SimLock};

    fn pins() -> Result<(PinController, PortHook)> {
        let (dev, hook) = SimDevice::new();
        let port = PortDevice::open(Box::new(dev), Box::new(SimLock::new()))?;
        Ok((PinController::new(port), hook))
    }

    #[test]
    fn polarity_table() {
        assert_eq!(OutputPin::Key.apply(0, true), 0x04);
        assert_eq!(OutputPin::Key.apply(0xFF, false), 0xFB);
        assert_eq!(OutputPin::Mute.apply(0xFF, true), 0xF7);
        assert_eq!(OutputPin::Mute.apply(0, false), 0x08);
        assert_eq!(OutputPin::Ctcss.apply(0xFF, true), 0xEF);
        assert_eq!(OutputPin::Fan.apply(0, true), 0x20);
        assert_eq!(OutputPin::Aux4.apply(0, true), 0x20);
        assert_eq!(OutputPin::Aux5.apply(0, true), 0x40);
        for pin in OutputPin::ALL {
            assert!(pin.is_on(pin.apply(0x00, true)), "{pin}");
            assert!(pin.is_on(pin.apply(0xFF, true)), "{pin}");
            assert!(!pin.is_on(pin.apply(0x00, false)), "{pin}");
            assert!(!pin.is_on(pin.apply(0xFF, false)), "{pin}");
        }
    }

    #[test]
    fn on_off_restores_other_bits() -> Result<()> {
        for start in [0x00u8, 0x5A, 0xA5, 0xFF, 0x02] {
            for pin in OutputPin::ALL {
                let (mut p, hook) = pins()?;
                hook.set_data(start);
                p.set_pin(pin, true)?;
                p.set_pin(pin, false)?;
                let got = hook.data();
                assert_eq!(got & !pin.mask(), start & !pin.mask(), "{pin} from {start:#04x}");
            }
        }
        Ok(())
    }

    #[test]
    fn link_key_bit_preserved() -> Result<()> {
        let (mut p, hook) = pins()?;
        hook.set_link_key(true);
        assert!(p.key()?);
        assert!(p.read_inputs()?.link_key);
        assert!(!p.unkey()?);
        assert!(p.read_inputs()?.link_key);
        Ok(())
    }

    #[test]
    fn helpers() -> Result<()> {
        let (mut p, hook) = pins()?;
        assert!(p.key()?);
        assert!(p.mute()?);
        assert!(p.fan_on()?);
        assert!(p.ctcss_on()?);
        assert!(p.aux5_on()?);
        let d = hook.data();
        for pin in [OutputPin::Key, OutputPin::Mute, OutputPin::Fan, OutputPin::Ctcss, OutputPin::Aux5] {
            assert!(pin.is_on(d), "{pin}: {d:#04x}");
        }
        assert!(!p.unkey()?);
        assert!(!p.unmute()?);
        assert!(!p.fan_off()?);
        assert!(!p.ctcss_off()?);
        assert!(!p.aux5_off()?);
        assert!(p.aux4_on()?);
        assert!(OutputPin::Fan.is_on(hook.data()));
        assert!(!p.aux4_off()?);
        assert_eq!(hook.data(), 0x18);
        Ok(())
    }

    #[test]
    fn failed_write_is_error() -> Result<()> {
        let (mut p, hook) = pins()?;
        hook.fail_writes(1);
        assert!(p.key().is_err());
        assert!(!OutputPin::Key.is_on(hook.data()));
        assert!(p.key()?);
        Ok(())
    }

    #[test]
    fn dtmf_range() {
        let mut i = Inputs::default();
        assert!(!i.dtmf_busy());
        for code in 1..=15 {
            i.dtmf = code;
            assert!(i.dtmf_busy());
        }
        // Can't come off a 4-bit decoder, but still count as busy.
        assert!(DTMF_BUSY.contains(&16));
        assert!(DTMF_BUSY.contains(&17));
        assert!(!DTMF_BUSY.contains(&18));
        i.dtmf = 17;
        assert!(i.dtmf_busy());
    }
}
