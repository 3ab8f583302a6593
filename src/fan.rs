//! Per-fan control state: mode, speed encoding, threshold hysteresis and
//! deferred EC register writes.

use crate::ec::EcBackend;
use crate::model::FanConfiguration;
use crate::types::FanMode;
use anyhow::{Context, Result};

fn percent_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < f64::EPSILON
}

pub struct Fan {
    config: FanConfiguration,
    critical_temperature: f64,
    read_write_words: bool,
    mode: FanMode,
    requested_speed: f64,
    target_speed: f64,
    current_speed: f64,
    critical: bool,
    threshold_index: usize,
    pending_write: Option<u16>,
    last_temperature: f64,
}

impl Fan {
    /// The configuration must have been validated; in particular the
    /// threshold table is non-empty and sorted by `UpThreshold`.
    pub fn new(config: FanConfiguration, critical_temperature: i32, read_write_words: bool) -> Self {
        Self {
            config,
            critical_temperature: critical_temperature as f64,
            read_write_words,
            mode: FanMode::Auto,
            requested_speed: 0.0,
            target_speed: 0.0,
            current_speed: 0.0,
            critical: false,
            threshold_index: 0,
            pending_write: None,
            last_temperature: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.fan_display_name
    }

    pub fn mode(&self) -> FanMode {
        self.mode
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn target_speed(&self) -> f64 {
        self.target_speed
    }

    pub fn requested_speed(&self) -> f64 {
        self.requested_speed
    }

    pub fn current_speed(&self) -> f64 {
        self.current_speed
    }

    pub fn last_temperature(&self) -> f64 {
        self.last_temperature
    }

    /// Number of steps in the threshold curve.
    pub fn speed_steps(&self) -> usize {
        self.config.temperature_thresholds.len()
    }

    pub fn set_auto(&mut self) {
        self.mode = FanMode::Auto;
        let step = self.threshold_index;
        self.update_target(step);
    }

    pub fn set_fixed(&mut self, percent: f64) {
        self.mode = FanMode::Fixed;
        self.requested_speed = percent.clamp(0.0, 100.0);
        let step = self.threshold_index;
        self.update_target(step);
    }

    /// Feed a new (already aggregated and filtered) temperature. Updates the
    /// critical flag, walks the threshold curve and stages a register write.
    pub fn set_temperature(&mut self, temperature: f64) {
        self.last_temperature = temperature;
        self.critical = temperature >= self.critical_temperature;
        let step = self.select_threshold(temperature);
        self.update_target(step);
    }

    /// Hysteretic walk over the threshold table. Returns the step whose
    /// speed applies this cycle; the stored index is the state for the
    /// next cycle (the two differ only in the hold case below).
    ///
    /// Rising: leave the current step once its up-threshold is reached and
    /// climb while the next step's down-threshold has also been reached.
    /// Falling: leave once the temperature drops below the current step's
    /// down-threshold and land on the highest step whose up-threshold is
    /// still reached. Below every up-threshold, the current speed is held
    /// for one more cycle and the walk restarts from the lowest step.
    fn select_threshold(&mut self, temperature: f64) -> usize {
        let table = &self.config.temperature_thresholds;
        if table.is_empty() {
            self.threshold_index = 0;
            return 0;
        }
        let mut idx = self.threshold_index.min(table.len() - 1);

        if temperature >= table[idx].up_threshold as f64 {
            while idx + 1 < table.len()
                && temperature >= table[idx].up_threshold as f64
                && temperature >= table[idx + 1].down_threshold as f64
            {
                idx += 1;
            }
            self.threshold_index = idx;
            idx
        } else if temperature < table[idx].down_threshold as f64 {
            match table
                .iter()
                .rposition(|t| t.up_threshold as f64 <= temperature)
            {
                Some(lower) => {
                    self.threshold_index = lower;
                    lower
                }
                None => {
                    self.threshold_index = 0;
                    idx
                }
            }
        } else {
            self.threshold_index = idx;
            idx
        }
    }

    fn update_target(&mut self, step: usize) {
        self.target_speed = if self.critical {
            100.0
        } else if self.mode == FanMode::Auto {
            self.config
                .temperature_thresholds
                .get(step)
                .map(|t| t.fan_speed)
                .unwrap_or(0.0)
        } else {
            self.requested_speed
        };
        self.pending_write = Some(self.encode_speed(self.target_speed));
    }

    /// percent -> raw register value. Overrides win over interpolation.
    pub fn encode_speed(&self, percent: f64) -> u16 {
        for o in &self.config.fan_speed_percentage_overrides {
            if o.target_operation.applies_to_write() && percent_eq(o.fan_speed_percentage, percent)
            {
                return o.fan_speed_value;
            }
        }
        let min = self.config.min_speed_value as f64;
        let max = self.config.max_speed_value as f64;
        let raw = min + (percent / 100.0) * (max - min);
        raw.round().clamp(min.min(max), min.max(max)) as u16
    }

    /// raw register value -> percent, using the read-side range.
    pub fn decode_speed(&self, raw: u16) -> f64 {
        for o in &self.config.fan_speed_percentage_overrides {
            if o.target_operation.applies_to_read() && o.fan_speed_value == raw {
                return o.fan_speed_percentage;
            }
        }
        let (min, max) = self.config.read_range();
        let (min, max) = (min as f64, max as f64);
        (((raw as f64 - min) / (max - min)) * 100.0).clamp(0.0, 100.0)
    }

    /// Write the staged speed value, if any. The value stays pending when
    /// the write fails so the next flush retries it.
    pub fn ec_flush(&mut self, ec: &mut dyn EcBackend) -> Result<()> {
        if let Some(raw) = self.pending_write {
            self.write_raw(ec, raw)
                .with_context(|| format!("{}: failed to write fan speed", self.name()))?;
            self.pending_write = None;
        }
        Ok(())
    }

    /// Read back the current speed from the EC and decode it.
    pub fn update_current_speed(&mut self, ec: &mut dyn EcBackend) -> Result<()> {
        let raw = if self.read_write_words {
            ec.read_word(self.config.read_register)
        } else {
            ec.read_byte(self.config.read_register).map(u16::from)
        }
        .with_context(|| format!("{}: failed to read fan speed", self.name()))?;
        self.current_speed = self.decode_speed(raw);
        Ok(())
    }

    /// Hand fan control back to the firmware, when the model requires it.
    pub fn ec_reset(&mut self, ec: &mut dyn EcBackend) -> Result<()> {
        if self.config.reset_required {
            self.write_raw(ec, self.config.fan_speed_reset_value)
                .with_context(|| format!("{}: failed to reset fan", self.name()))?;
        }
        Ok(())
    }

    fn write_raw(&self, ec: &mut dyn EcBackend, raw: u16) -> Result<()> {
        if self.read_write_words {
            ec.write_word(self.config.write_register, raw)
        } else {
            ec.write_byte(self.config.write_register, raw as u8)
        }
    }
}
