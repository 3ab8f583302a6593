//! EC access through raw port I/O on `/dev/port`, using the classic
//! 0x66/0x62 command/data handshake.

use super::EcBackend;
use anyhow::{Context, Result, bail};
use std::fs;
use std::os::unix::fs::FileExt;
use std::time::{Duration, Instant};

const DEV_PORT_PATH: &str = "/dev/port";

const COMMAND_PORT: u64 = 0x66;
const DATA_PORT: u64 = 0x62;

const EC_COMMAND_READ: u8 = 0x80;
const EC_COMMAND_WRITE: u8 = 0x81;

/// Status register bits on the command port.
const EC_STATUS_OUTPUT_BUFFER_FULL: u8 = 0x01;
const EC_STATUS_INPUT_BUFFER_FULL: u8 = 0x02;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(250);
const MAX_RETRIES: u32 = 3;

pub struct DevPortEc {
    port: fs::File,
}

impl DevPortEc {
    pub fn open() -> Result<Self> {
        let port = fs::File::options()
            .read(true)
            .write(true)
            .open(DEV_PORT_PATH)
            .with_context(|| format!("could not open {}", DEV_PORT_PATH))?;
        Ok(Self { port })
    }

    fn inb(&self, port: u64) -> Result<u8> {
        let mut byte = [0u8];
        self.port
            .read_exact_at(&mut byte, port)
            .with_context(|| format!("dev_port: failed to read port 0x{:02X}", port))?;
        Ok(byte[0])
    }

    fn outb(&self, port: u64, value: u8) -> Result<()> {
        self.port
            .write_all_at(&[value], port)
            .with_context(|| format!("dev_port: failed to write port 0x{:02X}", port))
    }

    /// Poll the status port until `bit` reaches the wanted state.
    fn wait_status(&self, bit: u8, set: bool) -> Result<()> {
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        loop {
            let status = self.inb(COMMAND_PORT)?;
            if ((status & bit) != 0) == set {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!(
                    "dev_port: timeout waiting for EC status bit 0x{:02X} to become {}",
                    bit,
                    if set { "set" } else { "clear" }
                );
            }
            std::thread::sleep(Duration::from_micros(500));
        }
    }

    fn wait_write(&self) -> Result<()> {
        self.wait_status(EC_STATUS_INPUT_BUFFER_FULL, false)
    }

    fn wait_read(&self) -> Result<()> {
        self.wait_status(EC_STATUS_OUTPUT_BUFFER_FULL, true)
    }

    fn try_read_byte(&self, register: u8) -> Result<u8> {
        self.wait_write()?;
        self.outb(COMMAND_PORT, EC_COMMAND_READ)?;
        self.wait_write()?;
        self.outb(DATA_PORT, register)?;
        self.wait_read()?;
        self.inb(DATA_PORT)
    }

    fn try_write_byte(&self, register: u8, value: u8) -> Result<()> {
        self.wait_write()?;
        self.outb(COMMAND_PORT, EC_COMMAND_WRITE)?;
        self.wait_write()?;
        self.outb(DATA_PORT, register)?;
        self.wait_write()?;
        self.outb(DATA_PORT, value)
    }
}

impl EcBackend for DevPortEc {
    fn read_byte(&mut self, register: u8) -> Result<u8> {
        let mut last_err = None;
        for _ in 0..MAX_RETRIES {
            match self.try_read_byte(register) {
                Ok(value) => return Ok(value),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("dev_port: read failed")))
            .with_context(|| format!("dev_port: failed to read register 0x{:02X}", register))
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        let mut last_err = None;
        for _ in 0..MAX_RETRIES {
            match self.try_write_byte(register, value) {
                Ok(()) => return Ok(()),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("dev_port: write failed")))
            .with_context(|| format!("dev_port: failed to write register 0x{:02X}", register))
    }
}
