//! Controller configuration.
//!
//! The timing and the hardware mapping are fixed. Only the paths to the
//! device, the lock file, and the helper programs can be overridden, through
//! the environment.
use std::path::PathBuf;
use std::time::Duration;

/// Default port device.
pub const DEFAULT_DEVICE: &str = "/dev/parport0";

/// Default lock file. Shared with the other IRLP tools that claim the port.
pub const DEFAULT_LOCK_FILE: &str = "/tmp/irlp-lockfile-parport0";

/// Program that plays the courtesy tone.
pub const DEFAULT_COURTESY: &str = "courtesy";

/// Program that plays the station ID.
pub const DEFAULT_IDER: &str = "ider";

/// Timer settings of the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Poll period.
    pub poll: Duration,

    /// Time from last activity to unkey.
    pub hang: Duration,

    /// Keyups shorter than this are dropped without hang time.
    pub short_key: Duration,

    /// Fan keeps running this long after the transmitter dropped.
    pub fan_delay: Duration,

    /// Audio stays muted this long after the last DTMF digit.
    pub mute: Duration,

    /// Courtesy tone delay after local carrier drops.
    pub courtesy: Duration,

    /// Courtesy tone delay after the remote link drops. Shorter, because the
    /// link software holds the key a while on its own.
    pub courtesy_link: Duration,

    /// Required repeat interval of the station ID.
    pub id_interval: Duration,

    /// How long a pending ID waits for a gap in traffic before it is forced.
    pub id_yield: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(5),
            hang: Duration::from_millis(3000),
            short_key: Duration::from_millis(10),
            fan_delay: Duration::from_millis(300_000),
            mute: Duration::from_millis(1000),
            courtesy: Duration::from_millis(1000),
            courtesy_link: Duration::from_millis(300),
            id_interval: Duration::from_millis(1_200_000),
            id_yield: Duration::from_millis(480_000),
        }
    }
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port device node.
    pub device: PathBuf,

    /// Advisory lock file serializing port claims.
    pub lock_file: PathBuf,

    /// Courtesy tone program.
    pub courtesy: String,

    /// Station ID program.
    pub ider: String,

    /// Timers.
    pub timing: Timing,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.into(),
            lock_file: DEFAULT_LOCK_FILE.into(),
            courtesy: DEFAULT_COURTESY.into(),
            ider: DEFAULT_IDER.into(),
            timing: Timing::default(),
        }
    }
}

impl Config {
    /// Defaults, with overrides from `REPEATER_DEVICE`, `REPEATER_LOCKFILE`,
    /// `REPEATER_COURTESY` and `REPEATER_IDER`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let get = |k: &str| lookup(k).filter(|v| !v.is_empty());
        if let Some(v) = get("REPEATER_DEVICE") {
            cfg.device = v.into();
        }
        if let Some(v) = get("REPEATER_LOCKFILE") {
            cfg.lock_file = v.into();
        }
        if let Some(v) = get("REPEATER_COURTESY") {
            cfg.courtesy = v;
        }
        if let Some(v) = get("REPEATER_IDER") {
            cfg.ider = v;
        }
        cfg
    }
}
