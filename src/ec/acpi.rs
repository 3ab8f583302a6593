//! EC access through the ACPI EC character device.

use super::EcBackend;
use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::FileExt;
use std::path::Path;

const ACPI_EC_PATH: &str = "/dev/ec";

/// Register access via `/dev/ec`, provided by the `acpi_ec` module.
pub struct AcpiEc {
    dev: fs::File,
}

impl AcpiEc {
    pub fn open() -> Result<Self> {
        if !Path::new(ACPI_EC_PATH).exists() {
            super::modprobe(&["acpi_ec"]).context("could not load acpi_ec kernel module")?;
        }
        let dev = fs::File::options()
            .read(true)
            .write(true)
            .open(ACPI_EC_PATH)
            .with_context(|| format!("could not open {}", ACPI_EC_PATH))?;
        Ok(Self { dev })
    }
}

impl EcBackend for AcpiEc {
    fn read_byte(&mut self, register: u8) -> Result<u8> {
        let mut byte = [0u8];
        self.dev
            .read_exact_at(&mut byte, register as u64)
            .with_context(|| format!("acpi_ec: failed to read register 0x{:02X}", register))?;
        Ok(byte[0])
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        self.dev
            .write_all_at(&[value], register as u64)
            .with_context(|| format!("acpi_ec: failed to write register 0x{:02X}", register))
    }
}
