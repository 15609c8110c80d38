//! Reader configuration
//!
//! Loaded from `meter-reader-config.json`. Keys are camelCase.
//!
//! ```json
//! {
//!   "devices": { "heat": { "serialPort": "/dev/ttyUSB0", "readTimeoutMs": 500 } },
//!   "mqtt": {
//!     "host": "broker.local", "port": 1883, "user": "", "pass": "",
//!     "interval": 60, "prefix": "home/meters",
//!     "notifications": [ { "id": "heat-energy", "device": "heat", "register": 60 } ]
//!   },
//!   "http": { "bind": "0.0.0.0:80" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::MeterClient;
use crate::protocol::{ProtocolError, DEFAULT_TIMEOUT_MS};

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "meter-reader-config.json";

/// Device name used for the single-port legacy form
pub const DEFAULT_DEVICE: &str = "default";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderConfig {
    /// Meters by device name
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,

    /// Legacy single serial port; becomes device "default"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_port: Option<String>,

    /// MQTT publishing, disabled when absent
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,

    /// HTTP API settings
    #[serde(default)]
    pub http: HttpConfig,
}

/// One meter on one serial port
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Serial port name
    pub serial_port: String,

    /// Read timeout in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// MQTT broker and published registers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// User name (empty for anonymous)
    #[serde(default)]
    pub user: String,

    /// Password
    #[serde(default)]
    pub pass: String,

    /// Registers to publish
    #[serde(default)]
    pub notifications: Vec<Notification>,

    /// Publish interval in seconds
    #[serde(rename = "interval")]
    pub publish_interval: u64,

    /// Topic prefix
    #[serde(default)]
    pub prefix: String,
}

fn default_mqtt_port() -> u16 {
    1883
}

/// A named register on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Reading identifier, used as topic segment and display name
    pub id: String,

    /// Device name
    #[serde(default)]
    pub device: String,

    /// Register to read
    pub register: i16,
}

/// HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:80".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl DeviceConfig {
    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl MqttConfig {
    /// Publish interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval)
    }

    /// Topic for `path` under the reading `id`, with stray slashes trimmed
    pub fn topic(&self, id: &str, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.prefix.trim_matches('/'),
            id.trim_matches('/'),
            path.trim_matches('/')
        )
    }
}

impl ReaderConfig {
    /// Parse and validate configuration from JSON text
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        let mut config: ReaderConfig =
            serde_json::from_str(json).map_err(|e| ProtocolError::Config(e.to_string()))?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ProtocolError> {
        let json = fs::read_to_string(path).map_err(|e| {
            ProtocolError::Config(format!("unable to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Resolve a config path; relative paths are taken from the executable's directory
    pub fn resolve_path(path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(path)))
            .unwrap_or_else(|| path.to_path_buf())
    }

    /// Fold the legacy form into `devices` and default notification devices
    fn normalize(&mut self) {
        if let Some(port) = self.serial_port.take() {
            self.devices
                .entry(DEFAULT_DEVICE.to_string())
                .or_insert(DeviceConfig {
                    serial_port: port,
                    read_timeout_ms: DEFAULT_TIMEOUT_MS,
                });
        }

        if self.devices.len() == 1 {
            if let (Some(name), Some(mqtt)) = (self.devices.keys().next(), self.mqtt.as_mut()) {
                for notification in &mut mqtt.notifications {
                    if notification.device.is_empty() {
                        notification.device = name.clone();
                    }
                }
            }
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.devices.is_empty() {
            return Err(ProtocolError::Config("no serial port provided".to_string()));
        }

        for (name, device) in &self.devices {
            if device.serial_port.is_empty() {
                return Err(ProtocolError::Config(format!(
                    "device {} has no serial port",
                    name
                )));
            }
        }

        if let Some(mqtt) = &self.mqtt {
            if mqtt.publish_interval == 0 {
                return Err(ProtocolError::Config(
                    "mqtt interval must be at least one second".to_string(),
                ));
            }
            for notification in &mqtt.notifications {
                if !self.devices.contains_key(&notification.device) {
                    return Err(ProtocolError::UnknownDevice(notification.device.clone()));
                }
            }
        }

        Ok(())
    }

    /// Registers exposed through the HTTP index and MQTT
    pub fn notifications(&self) -> &[Notification] {
        self.mqtt
            .as_ref()
            .map(|m| m.notifications.as_slice())
            .unwrap_or(&[])
    }

    /// Build one client per configured device
    pub fn clients(&self) -> BTreeMap<String, MeterClient> {
        self.devices
            .iter()
            .map(|(name, device)| {
                (
                    name.clone(),
                    MeterClient::new(device.serial_port.clone(), device.read_timeout()),
                )
            })
            .collect()
    }
}
