//! Configuration module for rxchain
//!
//! This module handles receiver configuration including:
//! - The TOML configuration file (devices, profiles, logging)
//! - The layered runtime property store ([`PropertyStore`])
//!
//! # Config Location
//!
//! The configuration file is read from the platform config directory:
//! - **Linux**: `~/.config/rxchain/receiver.toml`
//! - **macOS**: `~/Library/Application Support/rxchain/receiver.toml`
//! - **Windows**: `%APPDATA%\rxchain\receiver.toml`
//!
//! # Example
//!
//! ```toml
//! version = 1
//!
//! [logging]
//! level = "info"
//!
//! [[devices]]
//! id = "rtl"
//! name = "RTL-SDR"
//! live_keys = ["rf_gain"]
//! command = [
//!     { program = "rtl_sdr", args = [{ option = "-f", key = "tuner_freq" }, { option = "-s", key = "samp_rate" }, "-"] },
//!     { program = "nc", args = ["-l", "127.0.0.1", "{port}"] },
//! ]
//!
//! [[devices.profiles]]
//! id = "2m"
//! name = "2m band"
//! center_freq = 145000000
//! samp_rate = 2400000
//! rf_gain = 30
//! ```

pub mod layers;

pub use layers::{value_as_u64, ConfigChanges, Layer, Properties, PropertyStore, SubscriptionId};

use crate::device::command::CommandTemplate;
use crate::error::{Result, RxError};
use crate::types::Format;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application directory name under the platform config dir
pub const APP_DIR: &str = "rxchain";

/// Configuration filename
pub const CONFIG_FILE: &str = "receiver.toml";

/// Default startup retry budget
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 10;

/// Default fixed delay between startup attempts in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 15_000;

/// Default number of readiness probe attempts
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 1000;

/// Default interval between readiness probe attempts in milliseconds
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 100;

/// Default readiness probe connect timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;

/// Default wait between SIGTERM and SIGKILL in seconds
pub const DEFAULT_STOP_GRACE_SECS: u64 = 10;

// ==================== Config Directory ====================

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_DIR))
}

/// Get the path of the default configuration file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Receiver Config ====================

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiverConfig {
    /// Version for future migration support
    #[serde(default = "default_config_version")]
    pub version: u32,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

fn default_config_version() -> u32 {
    1
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            version: 1,
            logging: LoggingConfig::default(),
            devices: Vec::new(),
        }
    }
}

impl ReceiverConfig {
    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RxError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Load a configuration file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No configuration at {}, using defaults", path.display());
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load configuration, using defaults: {}", e);
            Self::default()
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: ReceiverConfig = toml::from_str(content)
            .map_err(|e| RxError::Config(format!("Failed to parse configuration: {}", e)))?;
        for warning in config.validate() {
            tracing::warn!("{}", warning);
        }
        Ok(config)
    }

    /// Save the configuration, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RxError::Config(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| RxError::Config(format!("Failed to write {}: {}", path.display(), e)))
    }

    pub fn device(&self, id: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Non-fatal problems (duplicate ids, profile warnings)
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (i, device) in self.devices.iter().enumerate() {
            if self.devices[..i].iter().any(|d| d.id == device.id) {
                warnings.push(format!("Duplicate device id \"{}\"", device.id));
            }
            warnings.extend(device.validate_profiles());
        }
        warnings
    }
}

// ==================== Logging ====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

// ==================== Device ====================

/// Startup retry policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// Fixed delay before the next attempt; it does not grow with the attempt count
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Readiness probe and shutdown timing of the capture process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartupConfig {
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,

    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

fn default_probe_attempts() -> u32 {
    DEFAULT_PROBE_ATTEMPTS
}

fn default_probe_interval_ms() -> u64 {
    DEFAULT_PROBE_INTERVAL_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_stop_grace_secs() -> u64 {
    DEFAULT_STOP_GRACE_SECS
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            probe_attempts: DEFAULT_PROBE_ATTEMPTS,
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            stop_grace_secs: DEFAULT_STOP_GRACE_SECS,
        }
    }
}

impl StartupConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// One capture device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Keep the capture process running without clients
    #[serde(default)]
    pub always_on: bool,

    /// Sample format served on the capture port
    #[serde(default)]
    pub format: Format,

    /// Capture command template
    #[serde(default)]
    pub command: CommandTemplate,

    /// Properties a running capture process accepts without restart
    #[serde(default)]
    pub live_keys: Vec<String>,

    /// Device-level properties (lowest priority layer)
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub startup: StartupConfig,

    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
}

fn default_true() -> bool {
    true
}

impl DeviceConfig {
    pub fn new(id: impl Into<String>, command: CommandTemplate) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            always_on: false,
            format: Format::default(),
            command,
            live_keys: Vec::new(),
            properties: BTreeMap::new(),
            retry: RetryConfig::default(),
            startup: StartupConfig::default(),
            profiles: Vec::new(),
        }
    }

    pub fn with_profile(mut self, profile: ProfileConfig) -> Self {
        self.profiles.push(profile);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Warnings for profiles that cannot tune the device sensibly
    pub fn validate_profiles(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for profile in &self.profiles {
            let lookup = |key: &str| -> Option<f64> {
                profile
                    .properties()
                    .get(key)
                    .or_else(|| self.properties.get(key))
                    .and_then(Value::as_f64)
            };
            let Some(center_freq) = lookup("center_freq") else {
                warnings.push(format!(
                    "Device \"{}\": profile \"{}\" does not specify a center_freq",
                    self.id, profile.id
                ));
                continue;
            };
            let Some(samp_rate) = lookup("samp_rate") else {
                warnings.push(format!(
                    "Device \"{}\": profile \"{}\" does not specify a samp_rate",
                    self.id, profile.id
                ));
                continue;
            };
            if let Some(start_freq) = lookup("start_freq") {
                let half = samp_rate / 2.0;
                if start_freq < center_freq - half || start_freq > center_freq + half {
                    warnings.push(format!(
                        "Device \"{}\": start_freq for profile \"{}\" is out of range",
                        self.id, profile.id
                    ));
                }
            }
        }
        warnings
    }
}

// ==================== Profile ====================

/// Named tuning preset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_freq: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samp_rate: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rf_gain: Option<Value>,

    /// Any other tuning parameter (`lfo_offset`, `start_freq`, `ppm`, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ProfileConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            center_freq: None,
            samp_rate: None,
            rf_gain: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_center_freq(mut self, freq: u64) -> Self {
        self.center_freq = Some(freq);
        self
    }

    pub fn with_samp_rate(mut self, rate: u32) -> Self {
        self.samp_rate = Some(rate);
        self
    }

    pub fn with_rf_gain(mut self, gain: impl Into<Value>) -> Self {
        self.rf_gain = Some(gain.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// All tuning values of this profile as a flat map
    pub fn properties(&self) -> Properties {
        let mut props: Properties = self.extra.clone();
        props.insert("name".to_string(), Value::from(self.display_name()));
        if let Some(freq) = self.center_freq {
            props.insert("center_freq".to_string(), Value::from(freq));
        }
        if let Some(rate) = self.samp_rate {
            props.insert("samp_rate".to_string(), Value::from(rate));
        }
        if let Some(gain) = &self.rf_gain {
            props.insert("rf_gain".to_string(), gain.clone());
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::command::{ArgSpec, CommandSpec};

    fn sample() -> &'static str {
        r#"
            [logging]
            level = "debug"

            [[devices]]
            id = "rtl"
            name = "RTL-SDR"
            live_keys = ["rf_gain"]
            command = [{ program = "rtl_sdr", args = [{ option = "-f", key = "tuner_freq" }, "-"] }]

            [devices.retry]
            delay_ms = 500

            [[devices.profiles]]
            id = "2m"
            name = "2m band"
            center_freq = 145000000
            samp_rate = 2400000
            lfo_offset = 100
        "#
    }

    #[test]
    fn test_parse_sample() {
        let config = ReceiverConfig::parse(sample()).unwrap();
        assert_eq!(config.version, 1);
        assert_eq!(config.logging.level, "debug");
        let device = config.device("rtl").unwrap();
        assert!(device.enabled);
        assert!(!device.always_on);
        assert_eq!(device.format, Format::ComplexFloat);
        assert_eq!(device.retry.max_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(device.retry.delay(), Duration::from_millis(500));
        assert_eq!(device.startup, StartupConfig::default());
        assert_eq!(
            device.command.commands()[0].args[0],
            ArgSpec::Option {
                option: "-f".to_string(),
                key: "tuner_freq".to_string()
            }
        );

        let profile = &device.profiles[0];
        assert_eq!(profile.center_freq, Some(145_000_000));
        assert_eq!(profile.extra.get("lfo_offset"), Some(&Value::from(100)));
    }

    #[test]
    fn test_profile_validation() {
        let device = DeviceConfig::new("dev", CommandTemplate::single(CommandSpec::new("true")))
            .with_profile(ProfileConfig::new("a", "no freq").with_samp_rate(48_000))
            .with_profile(ProfileConfig::new("b", "no rate").with_center_freq(1_000_000))
            .with_profile(
                ProfileConfig::new("c", "bad start")
                    .with_center_freq(1_000_000)
                    .with_samp_rate(100_000)
                    .with_extra("start_freq", 1_200_000),
            )
            .with_profile(
                ProfileConfig::new("d", "ok")
                    .with_center_freq(1_000_000)
                    .with_samp_rate(100_000)
                    .with_extra("start_freq", 1_010_000),
            );
        let warnings = device.validate_profiles();
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("center_freq"));
        assert!(warnings[1].contains("samp_rate"));
        assert!(warnings[2].contains("out of range"));
    }

    #[test]
    fn test_device_properties_fill_profile_gaps() {
        let device = DeviceConfig::new("dev", CommandTemplate::default())
            .with_property("samp_rate", 2_048_000)
            .with_profile(ProfileConfig::new("a", "A").with_center_freq(100_000_000));
        assert!(device.validate_profiles().is_empty());
    }

    #[test]
    fn test_profile_properties() {
        let profile = ProfileConfig::new("a", "")
            .with_center_freq(7)
            .with_rf_gain("auto");
        let props = profile.properties();
        assert_eq!(props.get("name"), Some(&Value::from("a")));
        assert_eq!(props.get("center_freq"), Some(&Value::from(7u64)));
        assert_eq!(props.get("rf_gain"), Some(&Value::from("auto")));
        assert!(!props.contains_key("samp_rate"));
    }

    #[test]
    fn test_duplicate_device_ids() {
        let mut config = ReceiverConfig::default();
        config.devices.push(DeviceConfig::new("a", CommandTemplate::default()));
        config.devices.push(DeviceConfig::new("a", CommandTemplate::default()));
        assert_eq!(config.validate().len(), 1);
    }
}
