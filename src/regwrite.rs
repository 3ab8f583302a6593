//! Register pokes surrounding fan control: some models need EC registers
//! set up before manual fan control works, some need them refreshed around
//! every speed write, and some need them restored on shutdown.

use crate::ec::EcBackend;
use crate::model::{RegisterWriteConfig, RegisterWriteMode, RegisterWriteOccasion};
use anyhow::{Context, Result};
use tracing::{debug, warn};

const RESET_ATTEMPTS: u32 = 3;

/// Apply one masked write.
pub fn apply(
    ec: &mut dyn EcBackend,
    register: u8,
    value: u8,
    mode: RegisterWriteMode,
) -> Result<()> {
    match mode {
        RegisterWriteMode::Set => ec.write_byte(register, value),
        RegisterWriteMode::And => {
            let current = ec.read_byte(register)?;
            ec.write_byte(register, current & value)
        }
        RegisterWriteMode::Or => {
            let current = ec.read_byte(register)?;
            ec.write_byte(register, current | value)
        }
    }
    .with_context(|| format!("register write 0x{:02X} failed", register))
}

/// Apply every configuration that is due: all of them when initializing,
/// otherwise only the ones tied to fan-speed writes.
pub fn apply_all(
    ec: &mut dyn EcBackend,
    configs: &[RegisterWriteConfig],
    initializing: bool,
) -> Result<()> {
    for config in configs {
        if initializing || config.write_occasion == RegisterWriteOccasion::OnWriteFanSpeed {
            debug!(
                "Applying register write 0x{:02X} ({})",
                config.register, config.description
            );
            apply(ec, config.register, config.value, config.write_mode)?;
        }
    }
    Ok(())
}

/// Restore every register that asked for it. Each reset is attempted a few
/// times; the last error (if any) is reported after all registers were
/// tried.
pub fn reset_all(ec: &mut dyn EcBackend, configs: &[RegisterWriteConfig]) -> Result<()> {
    let mut last_err = None;
    for config in configs {
        if !config.reset_required {
            continue;
        }
        let mut config_err = None;
        for attempt in 1..=RESET_ATTEMPTS {
            match apply(ec, config.register, config.reset_value, config.reset_write_mode) {
                Ok(()) => {
                    config_err = None;
                    break;
                }
                Err(err) => {
                    warn!(
                        "Register reset 0x{:02X} attempt {}/{} failed: {:#}",
                        config.register, attempt, RESET_ATTEMPTS, err
                    );
                    config_err = Some(err);
                }
            }
        }
        if let Some(err) = config_err {
            warn!("Giving up on register reset 0x{:02X}", config.register);
            last_err = Some(err);
        }
    }
    match last_err {
        Some(err) => Err(err).context("register reset incomplete"),
        None => Ok(()),
    }
}
