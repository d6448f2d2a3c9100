use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::metering_p1::registry::{ReferenceConfig, WindowMode};
use crate::mqtt::reconnect::ReconnectPolicy;

const CONFIG_ENV: &str = "P1_CONFIG";
const CONFIG_PATHS: [&str; 3] = [
    "config/p1mqtt.yaml",
    "p1mqtt.yaml",
    "/usr/local/etc/p1_smartmeter.yaml",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration file found, tried {0:?}")]
    NotFound(Vec<String>),
    #[error("Could not read config file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("Could not parse config file: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("OBIS reference {0} sets both average and count")]
    ConflictingWindows(String),
    #[error("OBIS reference {0} has a window of 0")]
    ZeroWindow(String),
    #[error("OBIS reference {0} has value_field 0, fields are counted from 1")]
    InvalidValueField(String),
    #[error("No serial device configured")]
    MissingSerialDevice,
}

fn mqtt_port_default() -> u16 { 1883 }
fn mqtt_client_name_default() -> String { "smartmeter".to_string() }
fn mqtt_keep_alive_default() -> u64 { 45 }
fn mqtt_reconnect_delay_default() -> u64 { 10 }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default="mqtt_port_default")]
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
    #[serde(default="mqtt_keep_alive_default")]
    pub keep_alive: u64,
    pub topic_base: String,
    #[serde(default="mqtt_reconnect_delay_default")]
    pub reconnect_delay: u64,
    pub max_reconnect_attempts: Option<u32>,
}

impl MqttConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_secs(self.reconnect_delay),
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

fn serial_baudrate_default() -> u32 { 115200 }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SerialConfig {
    pub device: String,
    #[serde(default="serial_baudrate_default")]
    pub baudrate: u32,
}

/// One entry of the `obis` table as written in the config file
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct ObisConfig {
    pub value_field: Option<usize>,
    #[serde(default)]
    pub publish: bool,
    pub mqtt_topic: Option<String>,
    pub average: Option<u32>,
    pub count: Option<u32>,
}

impl ObisConfig {
    /// Validate the entry and resolve its defaults
    pub fn resolve(&self, reference: &str) -> Result<ReferenceConfig, ConfigError> {
        let value_field = self.value_field.unwrap_or(1);
        if value_field == 0 {
            return Err(ConfigError::InvalidValueField(reference.to_string()));
        }

        let window = match (self.average, self.count) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingWindows(reference.to_string())),
            (Some(0), None) | (None, Some(0)) => return Err(ConfigError::ZeroWindow(reference.to_string())),
            (Some(n), None) => WindowMode::Average(n),
            (None, Some(m)) => WindowMode::Count(m),
            (None, None) => WindowMode::Immediate,
        };

        if self.publish && self.mqtt_topic.is_none() {
            warn!("OBIS reference {} is set to publish, but is missing the key mqtt_topic", reference);
        }

        Ok(ReferenceConfig {
            value_field,
            publish: self.publish,
            topic_suffix: self.mqtt_topic.clone(),
            window,
        })
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub debug: bool,
    pub mqtt: MqttConfig,
    pub serial: SerialConfig,
    #[serde(default)]
    pub obis: HashMap<String, ObisConfig>,
}

impl Config {
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let c: Config = serde_yml::from_str(contents)?;
        if c.serial.device.trim().is_empty() {
            return Err(ConfigError::MissingSerialDevice);
        }
        Ok(c)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading config from {}", path.display());
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Config::from_str(&contents)
    }

    /// Look for the config in `$P1_CONFIG` first, then in the default places
    pub fn load() -> Result<Self, ConfigError> {
        let path = find_config_file()?;
        Config::from_file(&path)
    }

    /// Resolve the whole `obis` table, failing on the first invalid entry
    pub fn references(&self) -> Result<HashMap<String, ReferenceConfig>, ConfigError> {
        let mut resolved = HashMap::new();
        for (reference, entry) in self.obis.iter() {
            resolved.insert(reference.clone(), entry.resolve(reference)?);
        }
        Ok(resolved)
    }
}

fn find_config_file() -> Result<PathBuf, ConfigError> {
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(p));
    }

    for candidate in CONFIG_PATHS.iter() {
        let p = Path::new(candidate);
        if p.is_file() {
            return Ok(p.to_path_buf());
        }
    }

    Err(ConfigError::NotFound(CONFIG_PATHS.iter().map(|p| p.to_string()).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"
debug: true
mqtt:
  host: broker.local
  user: smartmeter
  pass: secret
  topic_base: meter
serial:
  device: /dev/ttyUSB0
obis:
  "1-0:1.7.0":
    publish: true
    mqtt_topic: power
    average: 10
  "0-1:24.2.1":
    value_field: 2
    publish: true
    mqtt_topic: gas
  "1-0:32.7.0":
    publish: false
    count: 5
"#;

    #[test]
    fn test_defaults() {
        let c = Config::from_str(EXAMPLE).unwrap();
        assert!(c.debug);
        assert_eq!(c.mqtt.port, 1883);
        assert_eq!(c.mqtt.client_name, "smartmeter");
        assert_eq!(c.mqtt.keep_alive, 45);
        assert_eq!(c.mqtt.reconnect_delay, 10);
        assert_eq!(c.mqtt.max_reconnect_attempts, None);
        assert_eq!(c.serial.baudrate, 115200);

        let policy = c.mqtt.reconnect_policy();
        assert_eq!(policy.delay, Duration::from_secs(10));
        assert_eq!(policy.max_attempts, None);
    }

    #[test]
    fn test_resolve_references() {
        let refs = Config::from_str(EXAMPLE).unwrap().references().unwrap();
        assert_eq!(refs.len(), 3);

        let power = &refs["1-0:1.7.0"];
        assert_eq!(power.value_field, 1);
        assert_eq!(power.window, WindowMode::Average(10));
        assert_eq!(power.topic_suffix.as_deref(), Some("power"));

        let gas = &refs["0-1:24.2.1"];
        assert_eq!(gas.value_field, 2);
        assert_eq!(gas.window, WindowMode::Immediate);

        let voltage = &refs["1-0:32.7.0"];
        assert!(!voltage.publish);
        assert_eq!(voltage.window, WindowMode::Count(5));
    }

    #[test]
    fn test_conflicting_windows_rejected() {
        let entry = ObisConfig {
            publish: true,
            mqtt_topic: Some("power".to_string()),
            average: Some(3),
            count: Some(3),
            ..Default::default()
        };
        assert!(matches!(entry.resolve("1-0:1.7.0"), Err(ConfigError::ConflictingWindows(_))));
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let zero_window = ObisConfig { count: Some(0), ..Default::default() };
        assert!(matches!(zero_window.resolve("x"), Err(ConfigError::ZeroWindow(_))));

        let zero_field = ObisConfig { value_field: Some(0), ..Default::default() };
        assert!(matches!(zero_field.resolve("x"), Err(ConfigError::InvalidValueField(_))));
    }

    #[test]
    fn test_missing_topic_is_not_fatal() {
        let entry = ObisConfig { publish: true, ..Default::default() };
        let resolved = entry.resolve("1-0:1.7.0").unwrap();
        assert!(resolved.publish);
        assert!(resolved.topic_suffix.is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();
        let c = Config::from_file(file.path()).unwrap();
        assert_eq!(c.mqtt.host, "broker.local");
        assert_eq!(c.serial.device, "/dev/ttyUSB0");

        let missing = Config::from_file(Path::new("/nonexistent/p1mqtt.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(Config::from_str("mqtt: ["), Err(ConfigError::Parse(_))));
        let no_device = EXAMPLE.replace("/dev/ttyUSB0", "\"\"");
        assert!(matches!(Config::from_str(&no_device), Err(ConfigError::MissingSerialDevice)));
    }
}
