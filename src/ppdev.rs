//! Linux parallel port device, `/dev/parportN`, through the ppdev ioctls.
use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use log::debug;

use crate::port::Device;
use crate::{Error, Result};

mod ioctl {
    // From linux/ppdev.h.
    nix::ioctl_read!(pprstatus, b'p', 0x81, u8);
    nix::ioctl_read!(pprdata, b'p', 0x85, u8);
    nix::ioctl_write_ptr!(ppwdata, b'p', 0x86, u8);
    nix::ioctl_none!(ppclaim, b'p', 0x8b);
    nix::ioctl_none!(pprelease, b'p', 0x8c);
}

/// An opened ppdev node.
pub struct Parport {
    file: File,
}

impl Parport {
    /// Open the device read/write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening {}", path.display());
        let file = File::options()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::Open {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self { file })
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

fn check(op: &'static str, r: nix::Result<libc::c_int>) -> Result<()> {
    r.map(|_| ()).map_err(|errno| Error::Ioctl { op, errno })
}

impl Device for Parport {
    fn claim(&mut self) -> Result<()> {
        // SAFETY: fd is an open ppdev node; PPCLAIM takes no argument.
        check("PPCLAIM", unsafe { ioctl::ppclaim(self.fd()) })
    }

    fn release(&mut self) -> Result<()> {
        // SAFETY: fd is an open ppdev node; PPRELEASE takes no argument.
        check("PPRELEASE", unsafe { ioctl::pprelease(self.fd()) })
    }

    fn read_status(&mut self) -> Result<u8> {
        let mut v = 0u8;
        // SAFETY: the kernel writes one byte into a local we own.
        check("PPRSTATUS", unsafe { ioctl::pprstatus(self.fd(), &mut v) })?;
        Ok(v)
    }

    fn read_data(&mut self) -> Result<u8> {
        let mut v = 0u8;
        // SAFETY: the kernel writes one byte into a local we own.
        check("PPRDATA", unsafe { ioctl::pprdata(self.fd(), &mut v) })?;
        Ok(v)
    }

    fn write_data(&mut self, value: u8) -> Result<()> {
        // SAFETY: the kernel reads one byte from a local we own.
        check("PPWDATA", unsafe { ioctl::ppwdata(self.fd(), &value) })
    }
}
