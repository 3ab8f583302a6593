/// Shared types used across the daemon, the control server and its clients
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a fan is being driven. The critical-temperature override is tracked
/// separately on the fan so the previous mode survives a critical episode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FanMode {
    Auto,  // Speed follows the temperature threshold curve
    Fixed, // Speed pinned to a requested percentage
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanMode::Auto => write!(f, "Auto"),
            FanMode::Fixed => write!(f, "Fixed"),
        }
    }
}

impl std::str::FromStr for FanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(FanMode::Auto),
            "fixed" => Ok(FanMode::Fixed),
            _ => Err(format!("Invalid fan mode: {}", s)),
        }
    }
}

/// Which embedded-controller access path to use.
///
/// The serialized names are the canonical config strings; the aliases keep
/// older service configs readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EcAccessMode {
    #[serde(rename = "ec_sys", alias = "ec_sys_linux")]
    EcSys,
    #[serde(rename = "acpi_ec", alias = "ec_acpi")]
    AcpiEc,
    #[serde(rename = "dev_port", alias = "ec_linux")]
    DevPort,
    #[serde(rename = "dummy")]
    Dummy,
}

impl fmt::Display for EcAccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcAccessMode::EcSys => write!(f, "ec_sys"),
            EcAccessMode::AcpiEc => write!(f, "acpi_ec"),
            EcAccessMode::DevPort => write!(f, "dev_port"),
            EcAccessMode::Dummy => write!(f, "dummy"),
        }
    }
}

impl std::str::FromStr for EcAccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ec_sys" | "ec_sys_linux" => Ok(EcAccessMode::EcSys),
            "acpi_ec" | "ec_acpi" => Ok(EcAccessMode::AcpiEc),
            "dev_port" | "ec_linux" => Ok(EcAccessMode::DevPort),
            "dummy" => Ok(EcAccessMode::Dummy),
            _ => Err(format!("Invalid embedded controller type: {}", s)),
        }
    }
}

/// How multiple temperature sensors bound to one fan are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TempAlgorithm {
    #[default]
    Average,
    Min,
    Max,
}

impl fmt::Display for TempAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TempAlgorithm::Average => write!(f, "Average"),
            TempAlgorithm::Min => write!(f, "Min"),
            TempAlgorithm::Max => write!(f, "Max"),
        }
    }
}
