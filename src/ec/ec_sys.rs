//! EC access through the `ec_sys` debugfs interface.

use super::EcBackend;
use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::FileExt;
use std::path::Path;

const EC_SYS_PATH: &str = "/sys/kernel/debug/ec/ec0/io";

/// Memory-mapped EC register file exposed by the `ec_sys` kernel module.
pub struct EcSys {
    io: fs::File,
}

impl EcSys {
    pub fn open() -> Result<Self> {
        if !Path::new(EC_SYS_PATH).exists() {
            super::modprobe(&["ec_sys", "write_support=1"])
                .context("could not load ec_sys kernel module")?;
        }
        let io = fs::File::options()
            .read(true)
            .write(true)
            .open(EC_SYS_PATH)
            .with_context(|| format!("could not open {}", EC_SYS_PATH))?;
        Ok(Self { io })
    }
}

impl EcBackend for EcSys {
    fn read_byte(&mut self, register: u8) -> Result<u8> {
        let mut byte = [0u8];
        self.io
            .read_exact_at(&mut byte, register as u64)
            .with_context(|| format!("ec_sys: failed to read register 0x{:02X}", register))?;
        Ok(byte[0])
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        self.io
            .write_all_at(&[value], register as u64)
            .with_context(|| format!("ec_sys: failed to write register 0x{:02X}", register))
    }
}
