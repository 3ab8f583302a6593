//! Per-fan temperature sources: each fan aggregates a set of hwmon sensors
//! and smooths the result before it reaches the fan's threshold logic.

use crate::filter::TemperatureFilter;
use crate::sensors::Sensor;
use crate::service_config::FanTemperatureSourceConfig;
use crate::types::TempAlgorithm;
use anyhow::{Result, bail};
use tracing::warn;

pub struct FanTempCtl {
    fan_index: usize,
    algorithm: TempAlgorithm,
    sensors: Vec<Sensor>,
    filter: TemperatureFilter,
}

impl FanTempCtl {
    pub fn new(
        fan_index: usize,
        algorithm: TempAlgorithm,
        sensors: Vec<Sensor>,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            fan_index,
            algorithm,
            sensors,
            filter: TemperatureFilter::new(poll_interval_ms, poll_interval_ms),
        }
    }

    /// Read and aggregate all bound sensors, then smooth the result.
    /// Individual sensor failures are tolerated as long as one sensor reads.
    pub fn update(&mut self) -> Result<f64> {
        let mut readings = Vec::with_capacity(self.sensors.len());
        for sensor in &self.sensors {
            match sensor.read() {
                Ok(value) => readings.push(value),
                Err(err) => warn!(
                    "Fan {}: sensor {} failed: {:#}",
                    self.fan_index, sensor.name, err
                ),
            }
        }
        if readings.is_empty() {
            bail!("fan {}: all temperature sensors failed", self.fan_index);
        }

        let aggregated = match self.algorithm {
            TempAlgorithm::Average => readings.iter().sum::<f64>() / readings.len() as f64,
            TempAlgorithm::Min => readings.iter().copied().fold(f64::INFINITY, f64::min),
            TempAlgorithm::Max => readings.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        };
        Ok(self.filter.filtered(aggregated))
    }
}

/// Bind each fan to its configured temperature sources. Fans without an
/// entry fall back to averaging every discovered sensor.
pub fn bind_sources(
    fan_count: usize,
    sources: &[FanTemperatureSourceConfig],
    discovered: &[Sensor],
    poll_interval_ms: u64,
) -> Result<Vec<FanTempCtl>> {
    let mut controllers = Vec::with_capacity(fan_count);

    for fan_index in 0..fan_count {
        let config = sources.iter().find(|s| s.fan_index == fan_index);
        let (algorithm, sensors) = match config {
            Some(config) if !config.sensors.is_empty() => {
                let mut selected = Vec::new();
                for wanted in &config.sensors {
                    let matches: Vec<Sensor> = discovered
                        .iter()
                        .filter(|s| s.name == *wanted)
                        .cloned()
                        .collect();
                    if matches.is_empty() {
                        bail!("fan {}: no hwmon sensor named {:?}", fan_index, wanted);
                    }
                    selected.extend(matches);
                }
                (config.algorithm, selected)
            }
            Some(config) => (config.algorithm, discovered.to_vec()),
            None => (TempAlgorithm::Average, discovered.to_vec()),
        };
        controllers.push(FanTempCtl::new(
            fan_index,
            algorithm,
            sensors,
            poll_interval_ms,
        ));
    }

    Ok(controllers)
}
