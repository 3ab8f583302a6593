//! Persisted service state: which model config is selected, which EC access
//! path to use, and the last requested per-fan target speeds.

use crate::types::{EcAccessMode, TempAlgorithm};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Sentinel stored in `TargetFanSpeeds` for a fan in auto mode.
pub const TARGET_SPEED_AUTO: f64 = -1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceConfig {
    /// Base name of the model configuration file to load.
    pub selected_config_id: String,
    /// Forces a specific EC backend instead of auto-detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_controller_type: Option<EcAccessMode>,
    /// One entry per fan: -1.0 selects auto mode, 0..=100 a fixed percentage.
    #[serde(default)]
    pub target_fan_speeds: Vec<f64>,
    #[serde(default)]
    pub fan_temperature_sources: Vec<FanTemperatureSourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FanTemperatureSourceConfig {
    pub fan_index: usize,
    #[serde(rename = "TemperatureAlgorithmType", default)]
    pub algorithm: TempAlgorithm,
    /// hwmon device names whose temperature inputs feed this fan.
    #[serde(default)]
    pub sensors: Vec<String>,
}

impl ServiceConfig {
    /// Load the service configuration, clamping out-of-range target speeds.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read service config {:?}", path))?;
        let mut config: ServiceConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse service config {:?}", path))?;

        for speed in config.target_fan_speeds.iter_mut() {
            let clamped = clamp_target_speed(*speed);
            if clamped != *speed {
                warn!(
                    "TargetFanSpeeds entry {} out of range, clamping to {}",
                    speed, clamped
                );
                *speed = clamped;
            }
        }

        info!("Loaded service config from {:?}: {:?}", path, config);
        Ok(config)
    }

    /// Save the configuration, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory {:?}", parent))?;
        }
        let content =
            serde_json::to_string_pretty(self).context("failed to serialize service config")?;
        fs::write(path, content)
            .with_context(|| format!("failed to write service config {:?}", path))?;
        info!("Saved service config to {:?}", path);
        Ok(())
    }
}

/// Valid targets are the auto sentinel or a percentage; anything else snaps
/// to the nearest valid value.
pub fn clamp_target_speed(speed: f64) -> f64 {
    if speed < 0.0 && speed != TARGET_SPEED_AUTO {
        TARGET_SPEED_AUTO
    } else if speed > 100.0 {
        100.0
    } else {
        speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        let config = ServiceConfig {
            selected_config_id: "Example NB".to_string(),
            embedded_controller_type: Some(EcAccessMode::EcSys),
            target_fan_speeds: vec![50.0, TARGET_SPEED_AUTO],
            fan_temperature_sources: vec![FanTemperatureSourceConfig {
                fan_index: 0,
                algorithm: TempAlgorithm::Max,
                sensors: vec!["coretemp".to_string()],
            }],
        };
        config.save(&path).unwrap();
        let reloaded = ServiceConfig::load(&path).unwrap();
        assert_eq!(reloaded.selected_config_id, config.selected_config_id);
        assert_eq!(reloaded.embedded_controller_type, Some(EcAccessMode::EcSys));
        assert_eq!(reloaded.target_fan_speeds, vec![50.0, -1.0]);
        assert_eq!(reloaded.fan_temperature_sources.len(), 1);
        assert_eq!(
            reloaded.fan_temperature_sources[0].algorithm,
            TempAlgorithm::Max
        );
    }

    #[test]
    fn out_of_range_targets_are_clamped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        fs::write(
            &path,
            r#"{"SelectedConfigId": "x", "TargetFanSpeeds": [150.0, -7.5, 30.0]}"#,
        )
        .unwrap();
        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.target_fan_speeds, vec![100.0, TARGET_SPEED_AUTO, 30.0]);
    }

    #[test]
    fn legacy_backend_names_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        fs::write(
            &path,
            r#"{"SelectedConfigId": "x", "EmbeddedControllerType": "ec_sys_linux"}"#,
        )
        .unwrap();
        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.embedded_controller_type, Some(EcAccessMode::EcSys));

        // The canonical name is what gets written back.
        config.save(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"ec_sys\""), "{written}");
    }

    #[test]
    fn missing_optional_fields_default() {
        let config: ServiceConfig = serde_json::from_str(r#"{"SelectedConfigId": "x"}"#).unwrap();
        assert!(config.embedded_controller_type.is_none());
        assert!(config.target_fan_speeds.is_empty());
        assert!(config.fan_temperature_sources.is_empty());
    }
}
