//! Discovery and reading of hwmon temperature sensors.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

const HWMON_NAME_GLOB: &str = "/sys/class/hwmon/hwmon*/name";

/// One `tempN_input` file belonging to a named hwmon device.
#[derive(Debug, Clone)]
pub struct Sensor {
    /// Contents of the hwmon device's `name` file, e.g. "coretemp".
    pub name: String,
    /// Path to the `tempN_input` file.
    pub path: PathBuf,
}

impl Sensor {
    /// Read the sensor in degrees Celsius. The kernel reports millidegrees.
    pub fn read(&self) -> Result<f64> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read sensor {:?}", self.path))?;
        let millidegrees: i64 = content
            .trim()
            .parse()
            .with_context(|| format!("sensor {:?} returned non-numeric data", self.path))?;
        Ok(millidegrees as f64 / 1000.0)
    }
}

/// Enumerate every temperature input under /sys/class/hwmon.
pub fn discover() -> Result<Vec<Sensor>> {
    discover_in(HWMON_NAME_GLOB)
}

fn discover_in(name_glob: &str) -> Result<Vec<Sensor>> {
    let mut sensors = Vec::new();

    let paths = glob::glob(name_glob).context("invalid hwmon glob pattern")?;
    for name_path in paths.filter_map(Result::ok) {
        let Some(hwmon_dir) = name_path.parent() else {
            continue;
        };
        let Ok(name) = fs::read_to_string(&name_path) else {
            continue;
        };
        let name = name.trim().to_string();

        let input_glob = hwmon_dir.join("temp*_input");
        let inputs = glob::glob(&input_glob.to_string_lossy())
            .context("invalid temperature input glob pattern")?;
        for input in inputs.filter_map(Result::ok) {
            debug!("Discovered sensor {} at {:?}", name, input);
            sensors.push(Sensor {
                name: name.clone(),
                path: input,
            });
        }
    }

    if sensors.is_empty() {
        bail!("no hwmon temperature sensors found");
    }
    info!("Discovered {} hwmon temperature inputs", sensors.len());
    Ok(sensors)
}
