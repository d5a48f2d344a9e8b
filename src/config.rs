use crate::ble::BulbAddress;
use crate::error::{ControllerError, Result};
use crate::presence::RadarSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_FILE_ENV: &str = "HUE_PRESENCE_CONFIG";

/// Furthest distance the radar can be configured to sense, in meters.
pub const MAX_SENSOR_RANGE_M: f32 = 9.0;

/// Longest output latency the radar accepts, in seconds.
pub const MAX_SENSOR_LATENCY_S: f32 = 1638.375;

/// Split one `.env` line into key and value. Values may contain spaces and
/// may be wrapped in single or double quotes.
fn parse_dotenv_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let mut value = value.trim();
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        value = &value[1..value.len() - 1];
    }
    Some((key, value))
}

/// Load variables from `.env` in the working directory. Variables already
/// set in the environment win.
///
/// Must run before any other thread exists, so call it from `main` before
/// the async runtime is built.
pub fn load_dotenv() {
    let Ok(content) = fs::read_to_string(Path::new(".env")) else {
        return;
    };

    for (key, value) in content.lines().filter_map(parse_dotenv_line) {
        if std::env::var_os(key).is_none() {
            // SAFETY: single-threaded, the runtime is built after this returns
            unsafe { std::env::set_var(key, value) };
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bulbs to control.
    pub targets: Vec<BulbAddress>,
    pub sensor: SensorConfig,
    pub policy: PolicyConfig,
    pub ble: BleConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Where the detection range starts, in meters.
    pub range_start_m: f32,
    /// Where the detection range ends, in meters (max 9).
    pub range_end_m: f32,
    /// How long the sensor waits before reporting presence, in seconds.
    pub presence_latency_s: f32,
    /// How long the sensor waits before reporting absence, in seconds.
    pub absence_latency_s: f32,
    /// After a restart the sensor under-reports presence for this long.
    pub resume_window_ms: u64,
    pub resume_sample_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub command_delay_ms: u64,
    /// Serial device the radar is attached to. Simulated when absent.
    /// The line must already be set to 115200 8N1, e.g.
    /// `stty -F /dev/ttyAMA0 115200 cs8 -cstopb -parenb raw`.
    pub serial_port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Stop controlling a bulb once something else switches it, and resume
    /// when that bulb is switched again. Useful in bedrooms.
    pub pause_on_external_control: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Simultaneous client links the BLE controller supports.
    pub max_connections: usize,
    /// How long one scan may run; 0 scans until a target is found.
    pub scan_window_ms: u64,
    pub connect_timeout_ms: u64,
    /// Pause between control loop iterations.
    pub loop_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            targets: vec![
                BulbAddress::new([0xfe, 0x2e, 0x97, 0x4e, 0x16, 0xba]),
                BulbAddress::new([0xfe, 0x2e, 0x97, 0x4e, 0x16, 0xbb]),
            ],
            sensor: SensorConfig::default(),
            policy: PolicyConfig::default(),
            ble: BleConfig::default(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            range_start_m: 0.0,
            range_end_m: 6.0,
            presence_latency_s: 0.0,
            absence_latency_s: 15.0,
            resume_window_ms: 5000,
            resume_sample_interval_ms: 100,
            read_timeout_ms: 5000,
            command_delay_ms: 1000,
            serial_port: None,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            pause_on_external_control: true,
        }
    }
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            max_connections: 3,
            scan_window_ms: 30_000,
            connect_timeout_ms: 5000,
            loop_interval_ms: 50,
        }
    }
}

impl SensorConfig {
    pub fn resume_window(&self) -> Duration {
        Duration::from_millis(self.resume_window_ms)
    }

    pub fn resume_sample_interval(&self) -> Duration {
        Duration::from_millis(self.resume_sample_interval_ms)
    }

    pub fn radar_settings(&self) -> RadarSettings {
        RadarSettings {
            command_delay: Duration::from_millis(self.command_delay_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

impl BleConfig {
    pub fn scan_window(&self) -> Option<Duration> {
        (self.scan_window_ms > 0).then(|| Duration::from_millis(self.scan_window_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }
}

impl Config {
    /// Defaults, then the JSON file named by `HUE_PRESENCE_CONFIG`, then
    /// individual environment overrides.
    pub fn load() -> Result<Self> {
        let config = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };
        config.with_env_overrides()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply individual environment variable overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(addresses) = std::env::var("BULB_ADDRESSES") {
            self.targets = addresses
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse::<BulbAddress>())
                .collect::<std::result::Result<Vec<_>, _>>()?;
        }
        if let Ok(start) = std::env::var("SENSOR_RANGE_START")
            && let Ok(v) = start.parse()
        {
            self.sensor.range_start_m = v;
        }
        if let Ok(end) = std::env::var("SENSOR_RANGE_END")
            && let Ok(v) = end.parse()
        {
            self.sensor.range_end_m = v;
        }
        if let Ok(latency) = std::env::var("SENSOR_PRESENCE_LATENCY")
            && let Ok(v) = latency.parse()
        {
            self.sensor.presence_latency_s = v;
        }
        if let Ok(latency) = std::env::var("SENSOR_ABSENCE_LATENCY")
            && let Ok(v) = latency.parse()
        {
            self.sensor.absence_latency_s = v;
        }
        if let Ok(window) = std::env::var("SENSOR_RESUME_WINDOW_MS")
            && let Ok(v) = window.parse()
        {
            self.sensor.resume_window_ms = v;
        }
        if let Ok(port) = std::env::var("RADAR_SERIAL_PORT") {
            self.sensor.serial_port = Some(port);
        }
        if let Ok(pause) = std::env::var("PAUSE_ON_EXTERNAL_CONTROL")
            && let Ok(v) = pause.parse()
        {
            self.policy.pause_on_external_control = v;
        }
        if let Ok(max) = std::env::var("BLE_MAX_CONNECTIONS")
            && let Ok(v) = max.parse()
        {
            self.ble.max_connections = v;
        }
        if let Ok(window) = std::env::var("BLE_SCAN_WINDOW_MS")
            && let Ok(v) = window.parse()
        {
            self.ble.scan_window_ms = v;
        }

        Ok(self)
    }

    /// Reject configurations the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "at least one bulb address is required".into(),
            ));
        }
        for (i, address) in self.targets.iter().enumerate() {
            if self.targets[..i].contains(address) {
                return Err(ControllerError::InvalidConfig(format!(
                    "bulb {address} is listed more than once"
                )));
            }
        }
        if self.ble.max_connections < self.targets.len() {
            return Err(ControllerError::InvalidConfig(format!(
                "{} bulbs configured but only {} BLE connections available",
                self.targets.len(),
                self.ble.max_connections
            )));
        }

        let sensor = &self.sensor;
        let in_range = |m: f32| (0.0..=MAX_SENSOR_RANGE_M).contains(&m);
        if !in_range(sensor.range_start_m)
            || !in_range(sensor.range_end_m)
            || sensor.range_end_m <= sensor.range_start_m
        {
            return Err(ControllerError::InvalidConfig(format!(
                "sensor range {}m - {}m must lie within 0m - {}m",
                sensor.range_start_m, sensor.range_end_m, MAX_SENSOR_RANGE_M
            )));
        }
        let valid_latency = |s: f32| (0.0..=MAX_SENSOR_LATENCY_S).contains(&s);
        if !valid_latency(sensor.presence_latency_s) || !valid_latency(sensor.absence_latency_s) {
            return Err(ControllerError::InvalidConfig(format!(
                "sensor latencies must lie within 0s - {MAX_SENSOR_LATENCY_S}s"
            )));
        }
        if sensor.read_timeout_ms == 0 {
            return Err(ControllerError::InvalidConfig(
                "sensor read timeout must be positive".into(),
            ));
        }
        if sensor.resume_sample_interval_ms == 0 {
            return Err(ControllerError::InvalidConfig(
                "resume sample interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.targets[0].to_string(), "fe:2e:97:4e:16:ba");
        assert!(config.policy.pause_on_external_control);
        assert_eq!(config.sensor.range_end_m, 6.0);
        assert_eq!(config.sensor.absence_latency_s, 15.0);
        assert_eq!(config.ble.scan_window(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_pool_smaller_than_targets_rejected() {
        let mut config = Config::default();
        config.ble.max_connections = 1;
        assert!(matches!(
            config.validate(),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_targets_rejected() {
        let mut config = Config::default();
        config.targets.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.targets[1] = config.targets[0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_sensor_rejected() {
        let mut config = Config::default();
        config.sensor.range_end_m = 9.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sensor.range_start_m = 6.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sensor.absence_latency_s = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sensor.read_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_sensor_values_rejected() {
        let mut config = Config::default();
        config.sensor.range_start_m = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sensor.range_end_m = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sensor.presence_latency_s = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sensor.absence_latency_s = f32::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_dotenv_line() {
        assert_eq!(
            parse_dotenv_line("RADAR_SERIAL_PORT=/dev/ttyAMA0"),
            Some(("RADAR_SERIAL_PORT", "/dev/ttyAMA0"))
        );
        assert_eq!(
            parse_dotenv_line("  NAME = living room lamp "),
            Some(("NAME", "living room lamp"))
        );
        assert_eq!(parse_dotenv_line("QUOTED=\"a b\""), Some(("QUOTED", "a b")));
        assert_eq!(parse_dotenv_line("SINGLE='x'"), Some(("SINGLE", "x")));
        assert_eq!(parse_dotenv_line("LONE=\""), Some(("LONE", "\"")));
        assert_eq!(parse_dotenv_line("# comment"), None);
        assert_eq!(parse_dotenv_line(""), None);
        assert_eq!(parse_dotenv_line("no equals sign"), None);
        assert_eq!(parse_dotenv_line("=value"), None);
    }

    #[test]
    fn test_scan_window_zero_means_unbounded() {
        let mut config = Config::default();
        config.ble.scan_window_ms = 0;
        assert_eq!(config.ble.scan_window(), None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "targets": ["aa:bb:cc:dd:ee:01"],
            "policy": { "pause_on_external_control": false }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.targets.len(), 1);
        assert!(!config.policy.pause_on_external_control);
        assert_eq!(config.sensor, SensorConfig::default());
        assert_eq!(config.ble.max_connections, 3);
    }

    #[test]
    fn test_json_with_bad_address_rejected() {
        let json = r#"{ "targets": ["not-a-mac"] }"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }
}
