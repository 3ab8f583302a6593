//! Notebook model configuration: which EC registers drive which fan, the
//! temperature threshold curve per fan, and register pokes that have to
//! happen around fan-speed writes.

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Default threshold table substituted when a fan configuration carries no
/// thresholds of its own. Tuples are (UpThreshold, DownThreshold, FanSpeed).
const DEFAULT_THRESHOLDS: [(i32, i32, f64); 6] = [
    (0, 0, 0.0),
    (60, 48, 10.0),
    (63, 55, 20.0),
    (66, 59, 50.0),
    (68, 63, 70.0),
    (71, 67, 100.0),
];

/// Legacy variant of the default table, selected by
/// `LegacyTemperatureThresholdsBehaviour`.
const LEGACY_DEFAULT_THRESHOLDS: [(i32, i32, f64); 6] = [
    (60, 0, 0.0),
    (63, 48, 10.0),
    (66, 55, 20.0),
    (68, 59, 50.0),
    (71, 63, 70.0),
    (75, 67, 100.0),
];

fn default_poll_interval() -> u64 {
    3000
}

fn default_critical_temperature() -> i32 {
    75
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ModelConfig {
    pub notebook_model: String,
    pub author: String,
    /// Control loop period in milliseconds.
    pub ec_poll_interval: u64,
    /// Degrees Celsius at which every fan is forced to 100%.
    pub critical_temperature: i32,
    /// If true, fan speeds are 16-bit little-endian values spanning the
    /// register and the register after it.
    pub read_write_words: bool,
    pub legacy_temperature_thresholds_behaviour: bool,
    pub fan_configurations: Vec<FanConfiguration>,
    pub register_write_configurations: Vec<RegisterWriteConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            notebook_model: String::new(),
            author: String::new(),
            ec_poll_interval: default_poll_interval(),
            critical_temperature: default_critical_temperature(),
            read_write_words: false,
            legacy_temperature_thresholds_behaviour: false,
            fan_configurations: Vec::new(),
            register_write_configurations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct FanConfiguration {
    pub fan_display_name: String,
    pub read_register: u8,
    pub write_register: u8,
    pub min_speed_value: u16,
    pub max_speed_value: u16,
    pub independent_read_min_max_values: bool,
    pub min_speed_value_read: u16,
    pub max_speed_value_read: u16,
    pub reset_required: bool,
    pub fan_speed_reset_value: u16,
    pub temperature_thresholds: Vec<TemperatureThreshold>,
    pub fan_speed_percentage_overrides: Vec<FanSpeedPercentageOverride>,
}

impl FanConfiguration {
    /// Min/max pair used when decoding a value read back from the EC.
    pub fn read_range(&self) -> (u16, u16) {
        if self.independent_read_min_max_values {
            (self.min_speed_value_read, self.max_speed_value_read)
        } else {
            (self.min_speed_value, self.max_speed_value)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct TemperatureThreshold {
    pub up_threshold: i32,
    pub down_threshold: i32,
    pub fan_speed: f64,
}

impl TemperatureThreshold {
    fn new(up: i32, down: i32, speed: f64) -> Self {
        Self {
            up_threshold: up,
            down_threshold: down,
            fan_speed: speed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverrideTargetOperation {
    Read,
    Write,
    #[default]
    ReadWrite,
}

impl OverrideTargetOperation {
    pub fn applies_to_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    pub fn applies_to_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }
}

/// Pins a specific raw register value to a specific percentage, bypassing
/// linear interpolation in one or both directions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct FanSpeedPercentageOverride {
    pub fan_speed_percentage: f64,
    pub fan_speed_value: u16,
    pub target_operation: OverrideTargetOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegisterWriteMode {
    #[default]
    Set,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegisterWriteOccasion {
    #[default]
    OnInitialization,
    OnWriteFanSpeed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct RegisterWriteConfig {
    pub register: u8,
    pub value: u8,
    pub reset_required: bool,
    pub reset_value: u8,
    pub write_mode: RegisterWriteMode,
    pub reset_write_mode: RegisterWriteMode,
    pub write_occasion: RegisterWriteOccasion,
    pub description: String,
}

impl ModelConfig {
    /// Load a model configuration file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read model config {:?}", path))?;
        let mut config: ModelConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse model config {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("invalid model config {:?}", path))?;
        info!(
            "Loaded model config for {:?} ({} fans)",
            config.notebook_model,
            config.fan_configurations.len()
        );
        Ok(config)
    }

    /// Normalize defaults and check cross-field invariants. Must run before
    /// the configuration is handed to a fan.
    pub fn validate(&mut self) -> Result<()> {
        ensure!(self.ec_poll_interval > 0, "EcPollInterval must be positive");

        let default_table: Vec<TemperatureThreshold> =
            if self.legacy_temperature_thresholds_behaviour {
                LEGACY_DEFAULT_THRESHOLDS
                    .iter()
                    .map(|&(u, d, s)| TemperatureThreshold::new(u, d, s))
                    .collect()
            } else {
                DEFAULT_THRESHOLDS
                    .iter()
                    .map(|&(u, d, s)| TemperatureThreshold::new(u, d, s))
                    .collect()
            };

        for (i, fan) in self.fan_configurations.iter_mut().enumerate() {
            if fan.fan_display_name.is_empty() {
                fan.fan_display_name = format!("Fan #{}", i);
            }

            ensure!(
                fan.min_speed_value != fan.max_speed_value,
                "FanConfigurations[{}]: MinSpeedValue == MaxSpeedValue ({})",
                i,
                fan.min_speed_value
            );
            if fan.independent_read_min_max_values {
                ensure!(
                    fan.min_speed_value_read != fan.max_speed_value_read,
                    "FanConfigurations[{}]: MinSpeedValueRead == MaxSpeedValueRead ({})",
                    i,
                    fan.min_speed_value_read
                );
            }
            if !self.read_write_words {
                let limit = u8::MAX as u16;
                ensure!(
                    fan.min_speed_value <= limit && fan.max_speed_value <= limit,
                    "FanConfigurations[{}]: speed values exceed one byte but ReadWriteWords is false",
                    i
                );
            }

            if !fan.reset_required {
                fan.fan_speed_reset_value = 0;
            }

            if fan.temperature_thresholds.is_empty() {
                fan.temperature_thresholds = default_table.clone();
            }
            fan.temperature_thresholds
                .sort_by_key(|t| t.up_threshold);
            for (j, t) in fan.temperature_thresholds.iter().enumerate() {
                ensure!(
                    t.up_threshold >= t.down_threshold,
                    "FanConfigurations[{}].TemperatureThresholds[{}]: UpThreshold {} < DownThreshold {}",
                    i,
                    j,
                    t.up_threshold,
                    t.down_threshold
                );
                ensure!(
                    (0.0..=100.0).contains(&t.fan_speed),
                    "FanConfigurations[{}].TemperatureThresholds[{}]: FanSpeed {} out of range",
                    i,
                    j,
                    t.fan_speed
                );
                if j > 0 && fan.temperature_thresholds[j - 1].up_threshold == t.up_threshold {
                    bail!(
                        "FanConfigurations[{}]: duplicate UpThreshold {}",
                        i,
                        t.up_threshold
                    );
                }
            }

            for (j, o) in fan.fan_speed_percentage_overrides.iter().enumerate() {
                ensure!(
                    (0.0..=100.0).contains(&o.fan_speed_percentage),
                    "FanConfigurations[{}].FanSpeedPercentageOverrides[{}]: percentage {} out of range",
                    i,
                    j,
                    o.fan_speed_percentage
                );
            }
        }

        for cfg in self.register_write_configurations.iter_mut() {
            if !cfg.reset_required {
                cfg.reset_value = 0;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_fan() -> FanConfiguration {
        FanConfiguration {
            min_speed_value: 0,
            max_speed_value: 255,
            ..Default::default()
        }
    }

    #[test]
    fn empty_thresholds_get_default_table() {
        let mut config = ModelConfig {
            fan_configurations: vec![minimal_fan()],
            ..Default::default()
        };
        config.validate().unwrap();
        let thresholds = &config.fan_configurations[0].temperature_thresholds;
        assert_eq!(thresholds.len(), DEFAULT_THRESHOLDS.len());
        assert_eq!(thresholds[0].up_threshold, 0);
        assert_eq!(thresholds[5].up_threshold, 71);
        assert_eq!(thresholds[5].fan_speed, 100.0);
    }

    #[test]
    fn empty_thresholds_get_legacy_table_when_selected() {
        let mut config = ModelConfig {
            legacy_temperature_thresholds_behaviour: true,
            fan_configurations: vec![minimal_fan()],
            ..Default::default()
        };
        config.validate().unwrap();
        let thresholds = &config.fan_configurations[0].temperature_thresholds;
        let expected: Vec<(i32, i32, f64)> = LEGACY_DEFAULT_THRESHOLDS.to_vec();
        let got: Vec<(i32, i32, f64)> = thresholds
            .iter()
            .map(|t| (t.up_threshold, t.down_threshold, t.fan_speed))
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn equal_min_max_is_rejected() {
        let mut config = ModelConfig {
            fan_configurations: vec![FanConfiguration {
                min_speed_value: 100,
                max_speed_value: 100,
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("MinSpeedValue == MaxSpeedValue"), "{err}");
    }

    #[test]
    fn duplicate_up_thresholds_are_rejected() {
        let mut fan = minimal_fan();
        fan.temperature_thresholds = vec![
            TemperatureThreshold::new(50, 40, 10.0),
            TemperatureThreshold::new(50, 45, 20.0),
        ];
        let mut config = ModelConfig {
            fan_configurations: vec![fan],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn reset_value_forced_to_zero_without_reset_required() {
        let mut fan = minimal_fan();
        fan.fan_speed_reset_value = 0xFF;
        let mut config = ModelConfig {
            fan_configurations: vec![fan],
            register_write_configurations: vec![RegisterWriteConfig {
                register: 0x10,
                value: 1,
                reset_value: 0xAA,
                ..Default::default()
            }],
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.fan_configurations[0].fan_speed_reset_value, 0);
        assert_eq!(config.register_write_configurations[0].reset_value, 0);
    }

    #[test]
    fn default_display_name_uses_fan_index() {
        let mut config = ModelConfig {
            fan_configurations: vec![minimal_fan(), minimal_fan()],
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.fan_configurations[0].fan_display_name, "Fan #0");
        assert_eq!(config.fan_configurations[1].fan_display_name, "Fan #1");
    }

    #[test]
    fn word_sized_speeds_require_read_write_words() {
        let mut config = ModelConfig {
            fan_configurations: vec![FanConfiguration {
                min_speed_value: 0,
                max_speed_value: 0x1FFF,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.read_write_words = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_pascal_case_document() {
        let json = r#"{
            "NotebookModel": "Example NB",
            "Author": "someone",
            "EcPollInterval": 1000,
            "CriticalTemperature": 90,
            "ReadWriteWords": false,
            "FanConfigurations": [{
                "FanDisplayName": "CPU fan",
                "ReadRegister": 46,
                "WriteRegister": 47,
                "MinSpeedValue": 0,
                "MaxSpeedValue": 255,
                "TemperatureThresholds": [
                    {"UpThreshold": 0, "DownThreshold": 0, "FanSpeed": 0},
                    {"UpThreshold": 60, "DownThreshold": 50, "FanSpeed": 100}
                ]
            }],
            "RegisterWriteConfigurations": [{
                "Register": 147,
                "Value": 20,
                "WriteMode": "Set",
                "WriteOccasion": "OnInitialization",
                "ResetRequired": true,
                "ResetValue": 4,
                "ResetWriteMode": "Set",
                "Description": "Select manual fan control"
            }]
        }"#;
        let mut config: ModelConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.notebook_model, "Example NB");
        assert_eq!(config.fan_configurations[0].write_register, 47);
        assert_eq!(
            config.register_write_configurations[0].write_occasion,
            RegisterWriteOccasion::OnInitialization
        );
        assert_eq!(config.register_write_configurations[0].reset_value, 4);
    }
}
