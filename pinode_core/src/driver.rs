//! Driver utilities for PINODE
//!
//! Common lifecycle status for hardware backends, plus the static gateway
//! configuration (YAML/TOML) that describes which devices to build.
//!
//! # Philosophy
//!
//! Hardware backends are simple structs with direct methods (`init`, `read`,
//! `write_pin`, `shutdown`). Only the gateway-facing [`Device`](crate::core::Device)
//! is a trait, because the scheduler and dispatcher must treat every device alike.
//!
//! # Example configuration
//!
//! ```yaml
//! gateway:
//!   home_dir: /var/lib/pinode
//!   gpio:
//!     backend: rppal
//!     board_mode: BCM
//!   i2c_backend: linux
//!
//! devices:
//!   gpio1:
//!     kind: gpio_input
//!     pin: 17
//!     edge: both
//!     bouncetime: 200
//!   bmp:
//!     kind: bmp085
//!     i2c_bus: 1
//!     i2c_address: 0x77
//!     poll:
//!       temperature: 60
//! ```

use crate::error::{PinodeError, PinodeResult};
use crate::scheduling::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Driver status for lifecycle tracking
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DriverStatus {
    /// Driver has not been initialized yet
    #[default]
    Uninitialized,
    /// Driver is ready to operate
    Ready,
    /// Driver is actively running/streaming
    Running,
    /// Driver encountered an error
    Error(String),
    /// Driver has been shut down
    Shutdown,
}

impl DriverStatus {
    /// Ready or Running
    pub fn is_operational(&self) -> bool {
        matches!(self, DriverStatus::Ready | DriverStatus::Running)
    }
}

impl std::fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::Error(msg) => write!(f, "Error: {}", msg),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// GPIO pin numbering scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BoardMode {
    /// Broadcom channel numbers
    Bcm,
    /// Physical header pin numbers
    #[default]
    Board,
}

impl std::fmt::Display for BoardMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bcm => write!(f, "BCM"),
            Self::Board => write!(f, "BOARD"),
        }
    }
}

// ============================================================================
// Gateway Configuration (YAML/TOML support)
// ============================================================================

/// Process-wide GPIO settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioSettings {
    /// Backend identifier ("simulation", "rppal")
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Pin numbering used by every GPIO device
    #[serde(default)]
    pub board_mode: BoardMode,
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            board_mode: BoardMode::default(),
        }
    }
}

/// Settings shared by every device in the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Root directory for the filesystem sink
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,

    #[serde(default)]
    pub gpio: GpioSettings,

    /// I2C backend identifier ("simulation", "linux")
    #[serde(default = "default_backend")]
    pub i2c_backend: String,

    /// Bounded wait for a shared-bus lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Deadline for all device lanes to acknowledge shutdown
    #[serde(default = "default_shutdown_deadline_ms")]
    pub shutdown_deadline_ms: u64,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            gpio: GpioSettings::default(),
            i2c_backend: default_backend(),
            lock_timeout_ms: default_lock_timeout_ms(),
            shutdown_deadline_ms: default_shutdown_deadline_ms(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl GatewaySettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_millis(self.shutdown_deadline_ms)
    }
}

/// Configuration for a single device instance
///
/// # Example YAML
///
/// ```yaml
/// kind: gpio_output
/// pin: 18
/// state: false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device family ("gpio_input", "gpio_output", "gpio_pwm", "bmp085", "bno055", "camera")
    pub kind: String,

    /// Backend override for this device (camera only)
    #[serde(default)]
    pub backend: Option<String>,

    /// Enable/disable the device (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// GPIO pin in the gateway's board mode
    #[serde(default)]
    pub pin: Option<u8>,

    /// I2C bus number
    #[serde(default)]
    pub i2c_bus: Option<u8>,

    /// I2C device address
    #[serde(default)]
    pub i2c_address: Option<u8>,

    /// Device path (for cameras, etc.)
    #[serde(default)]
    pub device: Option<String>,

    /// Poll interval overrides in seconds, keyed by value name. Zero disables polling.
    #[serde(default)]
    pub poll: HashMap<String, f64>,

    /// Additional device-specific options
    #[serde(flatten)]
    pub options: HashMap<String, serde_yaml::Value>,
}

fn default_enabled() -> bool {
    true
}

fn default_backend() -> String {
    "simulation".to_string()
}

fn default_home_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

fn default_shutdown_deadline_ms() -> u64 {
    10_000
}

impl DeviceConfig {
    /// Create a config of the given kind with everything else defaulted
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            backend: None,
            enabled: true,
            pin: None,
            i2c_bus: None,
            i2c_address: None,
            device: None,
            poll: HashMap::new(),
            options: HashMap::new(),
        }
    }

    /// Create a GPIO device config
    pub fn gpio(kind: &str, pin: u8) -> Self {
        Self {
            pin: Some(pin),
            ..Self::new(kind)
        }
    }

    /// Create an I2C device config
    pub fn i2c(kind: &str, bus: u8, address: u8) -> Self {
        Self {
            i2c_bus: Some(bus),
            i2c_address: Some(address),
            ..Self::new(kind)
        }
    }

    /// Builder-style option setter
    pub fn with_option<V: Into<serde_yaml::Value>>(mut self, key: &str, value: V) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// Builder-style poll override
    pub fn with_poll(mut self, value: &str, seconds: f64) -> Self {
        self.poll.insert(value.to_string(), seconds);
        self
    }

    /// Pin number, or a config error naming the device
    pub fn require_pin(&self, device: &str) -> PinodeResult<u8> {
        self.pin
            .ok_or_else(|| PinodeError::config(format!("Device '{}' requires a 'pin'", device)))
    }

    /// Resolved poll interval for a value: override first, then the descriptor default.
    pub fn poll_interval(&self, value: &str, default: Option<Duration>) -> Option<Duration> {
        match self.poll.get(value) {
            Some(secs) if *secs <= 0.0 => None,
            Some(secs) => Some(Duration::from_secs_f64(*secs)),
            None => default,
        }
    }

    /// Get an option value as a string
    pub fn get_option(&self, key: &str) -> Option<String> {
        self.options.get(key).and_then(|v| match v {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    /// Get an option value as i64
    pub fn get_option_i64(&self, key: &str) -> Option<i64> {
        self.options.get(key).and_then(|v| v.as_i64())
    }

    /// Get an option value as u64
    pub fn get_option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(|v| v.as_u64())
    }

    /// Get an option value as f64
    pub fn get_option_f64(&self, key: &str) -> Option<f64> {
        self.options.get(key).and_then(|v| v.as_f64())
    }

    /// Get an option value as bool
    pub fn get_option_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(|v| v.as_bool())
    }
}

/// Full gateway configuration file
///
/// # Example TOML
///
/// ```toml
/// [gateway]
/// home_dir = "/var/lib/pinode"
///
/// [devices.camera]
/// kind = "camera"
/// warmup_ms = 2000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Map of device id -> device config
    #[serde(default)]
    pub devices: HashMap<String, DeviceConfig>,
}

impl GatewayConfig {
    /// Create a new empty config
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from a file (auto-detect format)
    pub fn from_file<P: AsRef<Path>>(path: P) -> PinodeResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PinodeError::config(format!(
                "Failed to read gateway config {}: {}",
                path.display(),
                e
            ))
        })?;

        let extension = path.extension().and_then(|s| s.to_str());
        match extension {
            Some("toml") => Self::from_toml(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_yaml(&contents).or_else(|_| Self::from_toml(&contents)),
        }
    }

    /// Parse config from YAML string
    pub fn from_yaml(contents: &str) -> PinodeResult<Self> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|e| PinodeError::config(format!("Failed to parse gateway YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse config from TOML string
    pub fn from_toml(contents: &str) -> PinodeResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| PinodeError::config(format!("Failed to parse gateway TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the runtime cannot honour
    pub fn validate(&self) -> PinodeResult<()> {
        self.gateway.scheduler.validate()?;
        if self.gateway.lock_timeout_ms == 0 {
            return Err(PinodeError::config("lock_timeout_ms must be greater than zero"));
        }
        for (name, device) in &self.devices {
            if name.is_empty() {
                return Err(PinodeError::config("Device ids must not be empty"));
            }
            if device.kind.is_empty() {
                return Err(PinodeError::config(format!(
                    "Device '{}' has no kind",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Get a device config by id
    pub fn get_device(&self, name: &str) -> PinodeResult<&DeviceConfig> {
        self.devices
            .get(name)
            .ok_or_else(|| PinodeError::config(format!("Device '{}' not found in config", name)))
    }

    /// Add a device config
    pub fn add_device(&mut self, name: &str, config: DeviceConfig) {
        self.devices.insert(name.to_string(), config);
    }

    /// Enabled devices, sorted by id so startup order is stable
    pub fn enabled_devices(&self) -> Vec<(&str, &DeviceConfig)> {
        let mut devices: Vec<_> = self
            .devices
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(n, c)| (n.as_str(), c))
            .collect();
        devices.sort_by(|a, b| a.0.cmp(b.0));
        devices
    }

    /// Standard search locations, most specific first
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("pinode.yaml"),
            PathBuf::from("pinode.yml"),
            PathBuf::from("pinode.toml"),
        ];
        if let Some(config_dir) = dirs::config_dir() {
            let pinode_dir = config_dir.join("pinode");
            paths.push(pinode_dir.join("pinode.yaml"));
            paths.push(pinode_dir.join("pinode.toml"));
        }
        paths
    }

    /// Find and load config from standard search paths
    pub fn find_and_load() -> PinodeResult<Self> {
        for path in Self::search_paths() {
            if path.exists() {
                log::info!("Loading gateway config from {}", path.display());
                return Self::from_file(&path);
            }
        }

        Err(PinodeError::config(
            "No gateway config file found in standard locations",
        ))
    }

    /// Save config to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PinodeResult<()> {
        let path = path.as_ref();
        let extension = path.extension().and_then(|s| s.to_str());

        let contents = match extension {
            Some("toml") => toml::to_string_pretty(self)
                .map_err(|e| PinodeError::config(format!("Failed to serialize TOML: {}", e)))?,
            _ => serde_yaml::to_string(self)
                .map_err(|e| PinodeError::config(format!("Failed to serialize YAML: {}", e)))?,
        };

        std::fs::write(path, contents)
            .map_err(|e| PinodeError::config(format!("Failed to write gateway config: {}", e)))
    }
}
