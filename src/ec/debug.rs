//! Transparent tracing wrapper around another EC backend.

use super::EcBackend;
use anyhow::Result;
use tracing::debug;

pub struct EcDebug {
    inner: Box<dyn EcBackend>,
}

impl EcDebug {
    pub fn new(inner: Box<dyn EcBackend>) -> Self {
        Self { inner }
    }
}

impl EcBackend for EcDebug {
    fn read_byte(&mut self, register: u8) -> Result<u8> {
        let result = self.inner.read_byte(register);
        debug!("EC read_byte(0x{:02X}) -> {:?}", register, result);
        result
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        let result = self.inner.write_byte(register, value);
        debug!(
            "EC write_byte(0x{:02X}, 0x{:02X}) -> {:?}",
            register, value, result
        );
        result
    }

    fn read_word(&mut self, register: u8) -> Result<u16> {
        let result = self.inner.read_word(register);
        debug!("EC read_word(0x{:02X}) -> {:?}", register, result);
        result
    }

    fn write_word(&mut self, register: u8, value: u16) -> Result<()> {
        let result = self.inner.write_word(register, value);
        debug!(
            "EC write_word(0x{:02X}, 0x{:04X}) -> {:?}",
            register, value, result
        );
        result
    }
}
