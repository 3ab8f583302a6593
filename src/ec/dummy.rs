//! No-op backend for running against no hardware at all. Reads return
//! zero, writes are discarded. Useful with `--readonly` testing.

use super::EcBackend;
use anyhow::Result;

#[derive(Default)]
pub struct DummyEc;

impl DummyEc {
    pub fn new() -> Self {
        Self
    }
}

impl EcBackend for DummyEc {
    fn read_byte(&mut self, _register: u8) -> Result<u8> {
        Ok(0)
    }

    fn write_byte(&mut self, _register: u8, _value: u8) -> Result<()> {
        Ok(())
    }
}
