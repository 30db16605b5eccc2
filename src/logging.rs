//! Log output: console, syslog, both, or neither.
//!
//! Everything logs through the `log` macros. Console output goes through
//! `stderrlog`, syslog through libc. Failures to log are ignored, the
//! control loop must never stop because of them.
use std::ffi::{CStr, CString};

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::{Error, Result};

const IDENT: &CStr = c"repeater";

struct Syslog;

impl Syslog {
    fn open() -> Self {
        // SAFETY: IDENT is 'static, as openlog() requires.
        unsafe {
            libc::openlog(
                IDENT.as_ptr(),
                libc::LOG_NDELAY | libc::LOG_PID,
                libc::LOG_DAEMON,
            )
        };
        Self
    }

    fn priority(level: Level) -> libc::c_int {
        match level {
            Level::Error => libc::LOG_ERR,
            Level::Warn => libc::LOG_WARNING,
            Level::Info => libc::LOG_INFO,
            Level::Debug | Level::Trace => libc::LOG_DEBUG,
        }
    }

    fn write(&self, level: Level, msg: &str) {
        let Ok(msg) = CString::new(msg.replace('\0', " ")) else {
            return;
        };
        // SAFETY: Both strings are NUL terminated and outlive the call. The
        // message is passed as an argument, never as the format.
        unsafe { libc::syslog(Self::priority(level), c"%s".as_ptr(), msg.as_ptr()) };
    }
}

impl Drop for Syslog {
    fn drop(&mut self) {
        // SAFETY: No arguments, and harmless if never opened.
        unsafe { libc::closelog() };
    }
}

/// Fans log records out to the enabled outputs.
struct Logger {
    console: Option<stderrlog::StdErrLog>,
    syslog: Option<Syslog>,
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.syslog.is_some() || self.console.as_ref().is_some_and(|c| c.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        if let Some(c) = &self.console {
            c.log(record);
        }
        if let Some(s) = &self.syslog
            && record.level() <= Level::Debug
        {
            s.write(record.level(), &record.args().to_string());
        }
    }

    fn flush(&self) {
        if let Some(c) = &self.console {
            c.flush();
        }
    }
}

/// Set up logging.
///
/// `verbose` prints timestamped lines to the console, `syslog` sends them
/// to the system log as the daemon facility.
pub fn init(verbose: bool, syslog: bool) -> Result<()> {
    let console = verbose.then(|| {
        let mut c = stderrlog::new();
        c.module("repeater")
            .verbosity(3usize)
            .timestamp(stderrlog::Timestamp::Second);
        c
    });
    let level = if verbose || syslog {
        LevelFilter::Debug
    } else {
        LevelFilter::Off
    };
    let logger = Logger {
        console,
        syslog: syslog.then(Syslog::open),
    };
    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| Error::msg(format!("setting up logging: {e}")))?;
    log::set_max_level(level);
    Ok(())
}
