//! Exponential moving-average smoothing for temperature readings.

/// First-order low-pass filter. With the time constant equal to the sample
/// interval, a step input reaches ~63% of its final value after one sample.
#[derive(Debug, Clone)]
pub struct TemperatureFilter {
    alpha: f64,
    state: Option<f64>,
}

impl TemperatureFilter {
    /// `interval_ms` is the sampling period, `time_constant_ms` the desired
    /// 63% step-response time.
    pub fn new(interval_ms: u64, time_constant_ms: u64) -> Self {
        let ratio = interval_ms as f64 / time_constant_ms.max(1) as f64;
        Self {
            alpha: 1.0 - (-ratio).exp(),
            state: None,
        }
    }

    /// Feed one sample and return the smoothed value. The first sample
    /// initializes the filter.
    pub fn filtered(&mut self, sample: f64) -> f64 {
        let next = match self.state {
            None => sample,
            Some(prev) => prev + self.alpha * (sample - prev),
        };
        self.state = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_the_filter() {
        let mut filter = TemperatureFilter::new(1000, 1000);
        assert_eq!(filter.filtered(42.0), 42.0);
    }

    #[test]
    fn step_reaches_63_percent_after_one_interval() {
        let mut filter = TemperatureFilter::new(1000, 1000);
        filter.filtered(0.0);
        let after_one = filter.filtered(100.0);
        assert!((after_one - 63.2).abs() < 0.1, "got {after_one}");
    }

    #[test]
    fn converges_towards_constant_input() {
        let mut filter = TemperatureFilter::new(1000, 1000);
        filter.filtered(0.0);
        let mut value = 0.0;
        for _ in 0..20 {
            value = filter.filtered(80.0);
        }
        assert!((value - 80.0).abs() < 0.01, "got {value}");
    }

    #[test]
    fn reset_clears_the_state() {
        let mut filter = TemperatureFilter::new(1000, 1000);
        filter.filtered(90.0);
        filter.reset();
        assert_eq!(filter.filtered(10.0), 10.0);
    }
}
