//! # Configuration Management Module
//!
//! Typed configuration for the bridge, merged from four layers in fixed precedence:
//! CLI args > Environment > Config file > Defaults.
//!
//! ## Configuration Structure
//!
//! - [`ModemConfig`] - Serial device, baud rate and SIM PIN
//! - [`MqttConfig`] - Broker address, credentials, client id and topic prefix
//! - [`LoggingConfig`] - Log level and sinks
//! - [`ReassemblyConfig`] - Expiry of partially received multi-part messages
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sms2mqtt::config::{Config, ConfigOverlay};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let env = ConfigOverlay::from_env(|key| std::env::var(key).ok())?;
//!     let (config, source) =
//!         Config::resolve("config.toml", &env, &ConfigOverlay::default()).await?;
//!     source.log();
//!     println!("Modem: {} @ {}", config.modem.device, config.modem.baud_rate);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [modem]
//! device = "/dev/ttyUSB2"
//! baud_rate = 115200
//! # pin_code = "1234"
//!
//! [mqtt]
//! host = "localhost"
//! port = 1883
//! prefix = "sms"
//! client_id = "simplesms2mqtt"
//!
//! [logging]
//! level = "info"
//! stdout = true
//! ```
//!
//! Every section and key is optional; missing values fall back to the defaults.
//!
//! ## Environment Integration
//!
//! | Variable | Field |
//! |---|---|
//! | `MOBILE_DEVICE` | `modem.device` |
//! | `MOBILE_BAUDRATE` | `modem.baud_rate` |
//! | `MOBILE_PIN_CODE` | `modem.pin_code` |
//! | `MQTT_CLIENT_ID` | `mqtt.client_id` |
//! | `MQTT_PREFIX` | `mqtt.prefix` |
//! | `MQTT_HOST` | `mqtt.host` |
//! | `MQTT_PORT` | `mqtt.port` |
//! | `MQTT_USERNAME` | `mqtt.username` |
//! | `MQTT_PASSWORD` | `mqtt.password` |
//! | `LOG_FILE` | `logging.file` |
//! | `LOG_LEVEL` | `logging.level` |
//! | `LOG_STDOUT` | `logging.stdout` |

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub modem: ModemConfig,
    pub mqtt: MqttConfig,
    pub logging: LoggingConfig,
    pub reassembly: ReassemblyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    pub device: String,
    pub baud_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_code: Option<String>,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            device: "/dev/mobile".to_string(),
            baud_rate: 115200,
            pin_code: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub client_id: String,
    /// Topic prefix. May be empty, in which case topics start with `/`.
    pub prefix: String,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            client_id: "simplesms2mqtt".to_string(),
            prefix: "sms".to_string(),
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            keep_alive_secs: 45,
        }
    }
}

impl MqttConfig {
    /// Username and password, only when both are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Also write log lines to standard output
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            stdout: false,
        }
    }
}

impl LoggingConfig {
    /// Parse `level` case-insensitively. Unknown names fall back to `Info`.
    pub fn level_filter(&self) -> log::LevelFilter {
        match self.level.to_ascii_lowercase().as_str() {
            "off" => log::LevelFilter::Off,
            "error" | "critical" => log::LevelFilter::Error,
            "warn" | "warning" => log::LevelFilter::Warn,
            "debug" => log::LevelFilter::Debug,
            "trace" => log::LevelFilter::Trace,
            _ => log::LevelFilter::Info,
        }
    }
}

/// Bounds on how long a partial multi-part message may wait for its missing parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    pub max_age_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

impl ReassemblyConfig {
    /// At least one second, so a part can wait for its siblings.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        // tokio::time::interval panics on a zero period
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// One override layer. `None` leaves the underlying value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverlay {
    pub mobile_device: Option<String>,
    pub mobile_baudrate: Option<u32>,
    pub mobile_pin_code: Option<String>,
    pub mqtt_client_id: Option<String>,
    pub mqtt_prefix: Option<String>,
    pub mqtt_host: Option<String>,
    pub mqtt_port: Option<u16>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub log_file: Option<String>,
    pub log_level: Option<String>,
    pub log_stdout: Option<bool>,
}

impl ConfigOverlay {
    /// Build the environment layer through `lookup` (normally `std::env::var`).
    /// Empty values are treated as unset.
    pub fn from_env<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let overlay = ConfigOverlay {
            mobile_device: get("MOBILE_DEVICE"),
            mobile_baudrate: get("MOBILE_BAUDRATE")
                .map(|v| parse_number("MOBILE_BAUDRATE", &v))
                .transpose()?,
            mobile_pin_code: get("MOBILE_PIN_CODE"),
            mqtt_client_id: get("MQTT_CLIENT_ID"),
            // an empty prefix is meaningful
            mqtt_prefix: lookup("MQTT_PREFIX"),
            mqtt_host: get("MQTT_HOST"),
            mqtt_port: get("MQTT_PORT")
                .map(|v| parse_number("MQTT_PORT", &v))
                .transpose()?,
            mqtt_username: get("MQTT_USERNAME"),
            mqtt_password: get("MQTT_PASSWORD"),
            log_file: get("LOG_FILE"),
            log_level: get("LOG_LEVEL"),
            log_stdout: get("LOG_STDOUT")
                .map(|v| parse_flag("LOG_STDOUT", &v))
                .transpose()?,
        };
        Ok(overlay)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

/// Where the file layer of a resolved configuration came from.
///
/// Configuration is resolved before logging exists, so callers report it with
/// [`ConfigSource::log`] once the logger is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(String),
    Defaults { missing: String },
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("Loaded configuration from {}", path),
            ConfigSource::Defaults { missing } => {
                warn!("Config file {} doesn't exist, using defaults", missing)
            }
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub async fn load(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
        Self::from_toml(path, &content)
    }

    pub fn from_toml(path: &str, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub async fn load_or_default(path: &str) -> Result<(Self, ConfigSource), ConfigError> {
        match Self::load(path).await {
            Ok(config) => Ok((config, ConfigSource::File(path.to_string()))),
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok((
                    Config::default(),
                    ConfigSource::Defaults {
                        missing: path.to_string(),
                    },
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Defaults < file < environment < CLI.
    pub async fn resolve(
        path: &str,
        env: &ConfigOverlay,
        cli: &ConfigOverlay,
    ) -> Result<(Self, ConfigSource), ConfigError> {
        let (config, source) = Self::load_or_default(path).await?;
        Ok((config.apply(env).apply(cli), source))
    }

    /// Apply one override layer on top of this configuration.
    pub fn apply(mut self, overlay: &ConfigOverlay) -> Self {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        fn set_opt<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *slot = value.clone();
            }
        }

        set(&mut self.modem.device, &overlay.mobile_device);
        set(&mut self.modem.baud_rate, &overlay.mobile_baudrate);
        set_opt(&mut self.modem.pin_code, &overlay.mobile_pin_code);
        set(&mut self.mqtt.client_id, &overlay.mqtt_client_id);
        set(&mut self.mqtt.prefix, &overlay.mqtt_prefix);
        set(&mut self.mqtt.host, &overlay.mqtt_host);
        set(&mut self.mqtt.port, &overlay.mqtt_port);
        set_opt(&mut self.mqtt.username, &overlay.mqtt_username);
        set_opt(&mut self.mqtt.password, &overlay.mqtt_password);
        set_opt(&mut self.logging.file, &overlay.log_file);
        set(&mut self.logging.level, &overlay.log_level);
        set(&mut self.logging.stdout, &overlay.log_stdout);
        self
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(&Config::default())?;
        fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = Config::default();
        assert_eq!(config.modem.device, "/dev/mobile");
        assert_eq!(config.modem.baud_rate, 115200);
        assert_eq!(config.mqtt.client_id, "simplesms2mqtt");
        assert_eq!(config.mqtt.prefix, "sms");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.stdout);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml("inline", "[mqtt]\nhost = \"broker.lan\"\n").unwrap();
        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.modem, ModemConfig::default());
    }

    #[test]
    fn test_bad_file_is_error() {
        let err = Config::from_toml("inline", "[mqtt]\nport = \"nope\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overlay_parses_typed_values() {
        let overlay = ConfigOverlay::from_env(env_of(&[
            ("MOBILE_BAUDRATE", "9600"),
            ("MQTT_PORT", "8883"),
            ("LOG_STDOUT", "true"),
            ("MQTT_HOST", ""),
        ]))
        .unwrap();
        assert_eq!(overlay.mobile_baudrate, Some(9600));
        assert_eq!(overlay.mqtt_port, Some(8883));
        assert_eq!(overlay.log_stdout, Some(true));
        assert_eq!(overlay.mqtt_host, None);
    }

    #[test]
    fn test_env_overlay_rejects_garbage_port() {
        let err = ConfigOverlay::from_env(env_of(&[("MQTT_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "MQTT_PORT", .. }));
    }

    #[test]
    fn test_empty_prefix_from_env_is_kept() {
        let overlay = ConfigOverlay::from_env(env_of(&[("MQTT_PREFIX", "")])).unwrap();
        let config = Config::default().apply(&overlay);
        assert_eq!(config.mqtt.prefix, "");
    }

    #[test]
    fn test_later_layer_wins() {
        let env = ConfigOverlay {
            mqtt_host: Some("env-host".into()),
            mqtt_port: Some(1884),
            ..Default::default()
        };
        let cli = ConfigOverlay {
            mqtt_host: Some("cli-host".into()),
            ..Default::default()
        };
        let config = Config::default().apply(&env).apply(&cli);
        assert_eq!(config.mqtt.host, "cli-host");
        assert_eq!(config.mqtt.port, 1884);
    }

    #[test]
    fn test_credentials_need_both_halves() {
        let mut mqtt = MqttConfig::default();
        assert_eq!(mqtt.credentials(), None);
        mqtt.username = Some("user".into());
        assert_eq!(mqtt.credentials(), None);
        mqtt.password = Some(String::new());
        assert_eq!(mqtt.credentials(), None);
        mqtt.password = Some("secret".into());
        assert_eq!(mqtt.credentials(), Some(("user", "secret")));
    }

    #[test]
    fn test_level_filter_names() {
        let mut logging = LoggingConfig::default();
        assert_eq!(logging.level_filter(), log::LevelFilter::Info);
        logging.level = "DEBUG".into();
        assert_eq!(logging.level_filter(), log::LevelFilter::Debug);
        logging.level = "warning".into();
        assert_eq!(logging.level_filter(), log::LevelFilter::Warn);
        logging.level = "verbose".into();
        assert_eq!(logging.level_filter(), log::LevelFilter::Info);
    }

    #[test]
    fn test_default_serializes_round_trip() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back = Config::from_toml("inline", &text).unwrap();
        assert_eq!(back, Config::default());
    }

    #[test]
    fn test_zero_max_age_is_raised_to_one_second() {
        let reassembly = ReassemblyConfig {
            max_age_secs: 0,
            sweep_interval_secs: 0,
        };
        assert_eq!(reassembly.max_age(), Duration::from_secs(1));
        assert_eq!(reassembly.sweep_interval(), Duration::from_secs(1));
    }
}
