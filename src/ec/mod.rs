//! Embedded controller register access.
//!
//! All backends speak the same byte/word register interface; the word
//! operations default to two byte transfers in little-endian order so only
//! backends with native word support need to override them.

use crate::types::EcAccessMode;
use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

mod acpi;
mod debug;
mod dev_port;
mod dummy;
mod ec_sys;

pub use acpi::AcpiEc;
pub use debug::EcDebug;
pub use dev_port::DevPortEc;
pub use dummy::DummyEc;
pub use ec_sys::EcSys;

pub trait EcBackend: Send {
    fn read_byte(&mut self, register: u8) -> Result<u8>;

    fn write_byte(&mut self, register: u8, value: u8) -> Result<()>;

    fn read_word(&mut self, register: u8) -> Result<u16> {
        let lo = self.read_byte(register)?;
        let hi = self.read_byte(register.wrapping_add(1))?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn write_word(&mut self, register: u8, value: u16) -> Result<()> {
        let [lo, hi] = value.to_le_bytes();
        self.write_byte(register, lo)?;
        self.write_byte(register.wrapping_add(1), hi)
    }
}

/// Open the backend for a specific access mode.
pub fn open(mode: EcAccessMode) -> Result<Box<dyn EcBackend>> {
    match mode {
        EcAccessMode::EcSys => Ok(Box::new(EcSys::open()?)),
        EcAccessMode::AcpiEc => Ok(Box::new(AcpiEc::open()?)),
        EcAccessMode::DevPort => Ok(Box::new(DevPortEc::open()?)),
        EcAccessMode::Dummy => Ok(Box::new(DummyEc::new())),
    }
}

/// Probe order for auto-detection. The dummy backend is never auto-selected.
const DETECT_ORDER: [EcAccessMode; 3] = [
    EcAccessMode::EcSys,
    EcAccessMode::AcpiEc,
    EcAccessMode::DevPort,
];

/// Try each real backend in order and return the first one that opens and
/// answers a probe read. Register 0 is safe to read on every EC.
pub fn detect() -> Result<(EcAccessMode, Box<dyn EcBackend>)> {
    for mode in DETECT_ORDER {
        match open(mode) {
            Ok(mut backend) => match backend.read_byte(0) {
                Ok(_) => {
                    debug!("EC auto-detection selected {}", mode);
                    return Ok((mode, backend));
                }
                Err(err) => warn!("EC backend {} failed probe read: {:#}", mode, err),
            },
            Err(err) => debug!("EC backend {} not available: {:#}", mode, err),
        }
    }
    bail!("no working embedded controller backend found (tried ec_sys, acpi_ec, dev_port)");
}

/// Load a kernel module if it is not already present. Several backends need
/// this before their device node exists.
fn modprobe(args: &[&str]) -> Result<()> {
    let status = std::process::Command::new("modprobe")
        .args(args)
        .status()
        .with_context(|| format!("failed to run modprobe {}", args.join(" ")))?;
    if !status.success() {
        bail!("modprobe {} exited with {}", args.join(" "), status);
    }
    Ok(())
}
