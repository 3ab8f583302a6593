//! Service core: staged initialization, the periodic control loop and
//! shutdown cleanup. All runtime state lives in one `Service` value that
//! the control server shares through a mutex.

use crate::control::{self, FanTempCtl};
use crate::ec::{self, EcBackend, EcDebug};
use crate::fan::Fan;
use crate::model::ModelConfig;
use crate::protocol::{FanStatus, SpeedSelection, StatusReply};
use crate::sensors::{self, Sensor};
use crate::service_config::{ServiceConfig, TARGET_SPEED_AUTO};
use crate::types::FanMode;
use anyhow::{Context, Result, bail, ensure};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Consecutive control-loop failures tolerated before the daemon gives up.
pub const MAX_LOOP_FAILURES: u32 = 100;

/// A fan whose measured speed drifts this far from its target forces the
/// initialization register writes to be replayed.
const RE_INIT_DEVIATION: f64 = 15.0;

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Directory holding model configuration files.
    pub config_dir: PathBuf,
    /// Path of the persisted service configuration.
    pub service_config_path: PathBuf,
    /// Never write to the EC; sensors and status stay live.
    pub read_only: bool,
    /// Log every EC register operation.
    pub debug_ec: bool,
}

pub struct Service {
    pub model_config: ModelConfig,
    pub service_config: ServiceConfig,
    service_config_path: PathBuf,
    fans: Vec<Fan>,
    controllers: Vec<FanTempCtl>,
    ec: Box<dyn EcBackend>,
    read_only: bool,
}

impl Service {
    /// Run the full initialization pipeline: service config, model config,
    /// EC backend, sensors, then assembly. Fails fast; effects already
    /// applied to the EC are rolled back by `assemble`.
    pub fn init(opts: &ServiceOptions) -> Result<Self> {
        let service_config = ServiceConfig::load(&opts.service_config_path)?;

        let model_path = opts
            .config_dir
            .join(format!("{}.json", service_config.selected_config_id));
        let model_config = ModelConfig::load(&model_path)?;

        let backend = match service_config.embedded_controller_type {
            Some(mode) => {
                info!("Using configured EC backend {}", mode);
                ec::open(mode)?
            }
            None => {
                let (mode, backend) = ec::detect()?;
                info!("Auto-detected EC backend {}", mode);
                backend
            }
        };
        let backend: Box<dyn EcBackend> = if opts.debug_ec {
            Box::new(EcDebug::new(backend))
        } else {
            backend
        };

        let sensors = sensors::discover()?;

        Self::assemble(
            model_config,
            service_config,
            opts.service_config_path.clone(),
            backend,
            &sensors,
            opts.read_only,
        )
    }

    /// Build the service from already-loaded configuration and an open EC
    /// backend. Register writes already applied are reset if a later stage
    /// fails.
    pub fn assemble(
        model_config: ModelConfig,
        service_config: ServiceConfig,
        service_config_path: PathBuf,
        mut ec: Box<dyn EcBackend>,
        sensors: &[Sensor],
        read_only: bool,
    ) -> Result<Self> {
        let mut fans: Vec<Fan> = model_config
            .fan_configurations
            .iter()
            .cloned()
            .map(|cfg| {
                Fan::new(
                    cfg,
                    model_config.critical_temperature,
                    model_config.read_write_words,
                )
            })
            .collect();
        apply_target_speeds(&mut fans, &service_config.target_fan_speeds);

        if !read_only {
            if let Err(err) = crate::regwrite::apply_all(
                &mut *ec,
                &model_config.register_write_configurations,
                true,
            ) {
                let _ = crate::regwrite::reset_all(
                    &mut *ec,
                    &model_config.register_write_configurations,
                );
                return Err(err).context("failed to apply initialization register writes");
            }
        }

        let controllers = match control::bind_sources(
            fans.len(),
            &service_config.fan_temperature_sources,
            sensors,
            model_config.ec_poll_interval,
        ) {
            Ok(controllers) => controllers,
            Err(err) => {
                if !read_only {
                    for fan in &mut fans {
                        let _ = fan.ec_reset(&mut *ec);
                    }
                    let _ = crate::regwrite::reset_all(
                        &mut *ec,
                        &model_config.register_write_configurations,
                    );
                }
                return Err(err).context("failed to bind temperature sources");
            }
        };

        info!(
            "Service initialized: {} fans, read_only={}",
            fans.len(),
            read_only
        );
        Ok(Self {
            model_config,
            service_config,
            service_config_path,
            fans,
            controllers,
            ec,
            read_only,
        })
    }

    pub fn fans(&self) -> &[Fan] {
        &self.fans
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.model_config.ec_poll_interval)
    }

    /// One control-loop iteration: read back speeds, replay register writes
    /// if a fan drifted, refresh temperatures and flush staged speed values.
    pub fn tick(&mut self) -> Result<()> {
        let mut re_init_required = false;
        for fan in &mut self.fans {
            fan.update_current_speed(&mut *self.ec)?;
            if (fan.current_speed() - fan.target_speed()).abs() > RE_INIT_DEVIATION {
                re_init_required = true;
            }
        }

        if !self.read_only {
            crate::regwrite::apply_all(
                &mut *self.ec,
                &self.model_config.register_write_configurations,
                re_init_required,
            )?;
        }

        for (fan, ctl) in self.fans.iter_mut().zip(self.controllers.iter_mut()) {
            let temperature = ctl.update()?;
            fan.set_temperature(temperature);
            if !self.read_only {
                fan.ec_flush(&mut *self.ec)?;
            }
        }
        Ok(())
    }

    /// Apply a control command to one fan, or to all of them.
    pub fn set_fan_speed(&mut self, fan: Option<usize>, speed: SpeedSelection) -> Result<()> {
        let indices: Vec<usize> = match fan {
            Some(index) => {
                ensure!(index < self.fans.len(), "Fan: Invalid value");
                vec![index]
            }
            None => (0..self.fans.len()).collect(),
        };

        for index in indices {
            let fan = &mut self.fans[index];
            match speed {
                SpeedSelection::Auto => fan.set_auto(),
                SpeedSelection::Fixed(percent) => fan.set_fixed(percent),
            }
            if !self.read_only {
                fan.ec_flush(&mut *self.ec)?;
            }
        }

        self.write_target_speeds_to_config()
    }

    /// Mirror the runtime fan modes into the persisted service config.
    pub fn write_target_speeds_to_config(&mut self) -> Result<()> {
        self.service_config.target_fan_speeds = self
            .fans
            .iter()
            .map(|fan| match fan.mode() {
                FanMode::Auto => TARGET_SPEED_AUTO,
                FanMode::Fixed => fan.requested_speed(),
            })
            .collect();
        self.service_config.save(&self.service_config_path)
    }

    /// Consistent snapshot of the whole service for status replies. The
    /// caller holds the service lock, so no tick can interleave.
    pub fn status(&self) -> StatusReply {
        StatusReply {
            pid: std::process::id(),
            selected_config_id: self.service_config.selected_config_id.clone(),
            read_only: self.read_only,
            fans: self
                .fans
                .iter()
                .map(|fan| FanStatus {
                    name: fan.name().to_string(),
                    temperature: fan.last_temperature(),
                    auto_mode: fan.mode() == FanMode::Auto,
                    critical: fan.is_critical(),
                    current_speed: fan.current_speed(),
                    target_speed: fan.target_speed(),
                    requested_speed: fan.requested_speed(),
                    speed_steps: fan.speed_steps(),
                })
                .collect(),
        }
    }

    /// Hand the hardware back to the firmware. Runs on shutdown, after the
    /// control loop and server have stopped.
    pub fn cleanup(&mut self) {
        if self.read_only {
            return;
        }
        for fan in &mut self.fans {
            if let Err(err) = fan.ec_reset(&mut *self.ec) {
                warn!("{:#}", err);
            }
        }
        if let Err(err) = crate::regwrite::reset_all(
            &mut *self.ec,
            &self.model_config.register_write_configurations,
        ) {
            warn!("Failed to reset register writes: {:#}", err);
        }
        info!("Service cleanup complete");
    }
}

/// Restore persisted targets: negative entries select auto, everything else
/// a fixed percentage. Extra entries are ignored.
fn apply_target_speeds(fans: &mut [Fan], targets: &[f64]) {
    for (fan, &target) in fans.iter_mut().zip(targets) {
        if target < 0.0 {
            fan.set_auto();
        } else {
            fan.set_fixed(target);
        }
    }
}

/// Periodic control loop. Returns `Ok` on a requested shutdown and `Err`
/// after too many consecutive failed iterations.
pub fn run_loop(service: &Mutex<Service>, quit: &AtomicBool) -> Result<()> {
    let mut failures: u32 = 0;
    while !quit.load(Ordering::SeqCst) {
        let sleep_for = {
            let mut svc = service.lock().unwrap();
            match svc.tick() {
                Ok(()) => {
                    failures = 0;
                    svc.poll_interval()
                }
                Err(err) => {
                    failures += 1;
                    warn!(
                        "Control loop iteration failed ({} consecutive): {:#}",
                        failures, err
                    );
                    if failures >= MAX_LOOP_FAILURES {
                        bail!(
                            "giving up after {} consecutive control loop failures",
                            failures
                        );
                    }
                    Duration::from_millis(10)
                }
            }
        };
        sleep_until_quit(sleep_for, quit);
    }
    info!("Control loop stopped");
    Ok(())
}

/// Sleep in short steps so a shutdown request is honored promptly.
fn sleep_until_quit(total: Duration, quit: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !quit.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ec::DummyEc;
    use crate::model::{FanConfiguration, TemperatureThreshold};
    use anyhow::anyhow;
    use std::fs;

    struct FailingEc;

    impl EcBackend for FailingEc {
        fn read_byte(&mut self, _register: u8) -> Result<u8> {
            Err(anyhow!("EC unreachable"))
        }

        fn write_byte(&mut self, _register: u8, _value: u8) -> Result<()> {
            Err(anyhow!("EC unreachable"))
        }
    }

    fn test_model(fan_count: usize) -> ModelConfig {
        let mut config = ModelConfig {
            notebook_model: "Test NB".to_string(),
            ec_poll_interval: 100,
            critical_temperature: 90,
            fan_configurations: (0..fan_count)
                .map(|i| FanConfiguration {
                    read_register: 0x10 + i as u8,
                    write_register: 0x20 + i as u8,
                    min_speed_value: 0,
                    max_speed_value: 255,
                    temperature_thresholds: vec![
                        TemperatureThreshold {
                            up_threshold: 0,
                            down_threshold: 0,
                            fan_speed: 0.0,
                        },
                        TemperatureThreshold {
                            up_threshold: 60,
                            down_threshold: 50,
                            fan_speed: 100.0,
                        },
                    ],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        config.validate().unwrap();
        config
    }

    fn test_sensor(dir: &tempfile::TempDir, millidegrees: i64) -> Sensor {
        let path = dir.path().join("temp1_input");
        fs::write(&path, format!("{}\n", millidegrees)).unwrap();
        Sensor {
            name: "coretemp".to_string(),
            path,
        }
    }

    fn test_service(fan_count: usize, targets: Vec<f64>, dir: &tempfile::TempDir) -> Service {
        let sensors = vec![test_sensor(dir, 40000)];
        let service_config = ServiceConfig {
            selected_config_id: "Test NB".to_string(),
            embedded_controller_type: None,
            target_fan_speeds: targets,
            fan_temperature_sources: Vec::new(),
        };
        Service::assemble(
            test_model(fan_count),
            service_config,
            dir.path().join("service.json"),
            Box::new(DummyEc::new()),
            &sensors,
            false,
        )
        .unwrap()
    }

    #[test]
    fn persisted_targets_restore_fan_modes() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(2, vec![50.0, TARGET_SPEED_AUTO], &dir);
        assert_eq!(service.fans()[0].mode(), FanMode::Fixed);
        assert_eq!(service.fans()[0].requested_speed(), 50.0);
        assert_eq!(service.fans()[1].mode(), FanMode::Auto);
    }

    #[test]
    fn tick_updates_temperature_and_speeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = test_service(1, Vec::new(), &dir);
        service.tick().unwrap();
        let status = service.status();
        assert_eq!(status.fans[0].temperature, 40.0);
        assert!(status.fans[0].auto_mode);
    }

    #[test]
    fn set_fan_speed_persists_targets() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = test_service(2, Vec::new(), &dir);

        service
            .set_fan_speed(Some(0), SpeedSelection::Fixed(42.0))
            .unwrap();

        let persisted = ServiceConfig::load(&dir.path().join("service.json")).unwrap();
        assert_eq!(persisted.target_fan_speeds, vec![42.0, TARGET_SPEED_AUTO]);
    }

    #[test]
    fn set_fan_speed_rejects_bad_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = test_service(1, Vec::new(), &dir);
        let err = service
            .set_fan_speed(Some(5), SpeedSelection::Auto)
            .unwrap_err();
        assert_eq!(err.to_string(), "Fan: Invalid value");
    }

    #[test]
    fn set_fan_speed_without_index_applies_to_all_fans() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = test_service(2, vec![10.0, 20.0], &dir);
        service
            .set_fan_speed(None, SpeedSelection::Auto)
            .unwrap();
        assert!(service.fans().iter().all(|f| f.mode() == FanMode::Auto));
    }

    #[test]
    fn loop_gives_up_after_repeated_failures() {
        let dir = tempfile::tempdir().unwrap();
        let sensors = vec![test_sensor(&dir, 40000)];
        let service_config = ServiceConfig {
            selected_config_id: "Test NB".to_string(),
            embedded_controller_type: None,
            target_fan_speeds: Vec::new(),
            fan_temperature_sources: Vec::new(),
        };
        let service = Service::assemble(
            test_model(1),
            service_config,
            dir.path().join("service.json"),
            Box::new(FailingEc),
            &sensors,
            false,
        )
        .unwrap();

        let service = Mutex::new(service);
        let quit = AtomicBool::new(false);
        let err = run_loop(&service, &quit).unwrap_err();
        assert!(
            err.to_string().contains("consecutive control loop failures"),
            "{err}"
        );
    }
}
