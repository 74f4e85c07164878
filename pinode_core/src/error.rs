//! Unified error handling for PINODE
//!
//! Hardware backends report raw `Driver` or `Io` failures. Devices convert
//! those at their boundary into the gateway taxonomy (`ResourceUnavailable`,
//! `ReadError`, `WriteError`, ...) so the scheduler and dispatcher only ever
//! see classified errors.

use thiserror::Error;

/// Main error type for PINODE operations
#[derive(Debug, Error)]
pub enum PinodeError {
    /// Hardware absent, unreachable, or bus lock timed out. Retried on the next poll.
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// A single read failed (timeout, malformed response)
    #[error("Read error on '{value}': {message}")]
    ReadError { value: String, message: String },

    /// A single write failed at the hardware level
    #[error("Write error on '{value}': {message}")]
    WriteError { value: String, message: String },

    /// Wrong type or out-of-range input
    #[error("Invalid value for '{value}': {message}")]
    InvalidValue { value: String, message: String },

    /// No such value on the addressed device
    #[error("Unknown value: {0}")]
    UnknownValue(String),

    /// No such device in the gateway
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Operation on a device that is not open
    #[error("Device '{0}' is not ready")]
    DeviceNotReady(String),

    /// Conflicting state-machine transition
    #[error("Device '{device}' is busy: {message}")]
    DeviceBusy { device: String, message: String },

    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Raw backend failure, not yet classified by a device
    #[error("Driver error: {0}")]
    Driver(String),

    /// Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Feature not available errors
    #[error("Feature not available: {0}")]
    FeatureNotAvailable(String),
}

/// Convenience type alias for Results using PinodeError
pub type PinodeResult<T> = Result<T, PinodeError>;

// Implement conversions from common error types
impl From<serde_json::Error> for PinodeError {
    fn from(err: serde_json::Error) -> Self {
        PinodeError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PinodeError {
    fn from(err: toml::de::Error) -> Self {
        PinodeError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<serde_yaml::Error> for PinodeError {
    fn from(err: serde_yaml::Error) -> Self {
        PinodeError::Config(format!("YAML error: {}", err))
    }
}

impl From<anyhow::Error> for PinodeError {
    fn from(err: anyhow::Error) -> Self {
        PinodeError::Driver(format!("{:#}", err))
    }
}

// Helper methods
impl PinodeError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        PinodeError::Config(msg.into())
    }

    /// Create a driver error
    pub fn driver<S: Into<String>>(msg: S) -> Self {
        PinodeError::Driver(msg.into())
    }

    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        PinodeError::ResourceUnavailable(msg.into())
    }

    pub fn read<S: Into<String>, T: Into<String>>(value: S, message: T) -> Self {
        PinodeError::ReadError {
            value: value.into(),
            message: message.into(),
        }
    }

    pub fn write<S: Into<String>, T: Into<String>>(value: S, message: T) -> Self {
        PinodeError::WriteError {
            value: value.into(),
            message: message.into(),
        }
    }

    pub fn invalid<S: Into<String>, T: Into<String>>(value: S, message: T) -> Self {
        PinodeError::InvalidValue {
            value: value.into(),
            message: message.into(),
        }
    }

    pub fn busy<S: Into<String>, T: Into<String>>(device: S, message: T) -> Self {
        PinodeError::DeviceBusy {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Convert a raw backend failure into a read failure for `value`.
    ///
    /// Already-classified errors pass through untouched.
    pub fn into_read(self, value: &str) -> Self {
        match self {
            PinodeError::Driver(message) => PinodeError::read(value, message),
            PinodeError::Io(err) => PinodeError::read(value, err.to_string()),
            other => other,
        }
    }

    /// Convert a raw backend failure into a write failure for `value`.
    pub fn into_write(self, value: &str) -> Self {
        match self {
            PinodeError::Driver(message) => PinodeError::write(value, message),
            PinodeError::Io(err) => PinodeError::write(value, err.to_string()),
            other => other,
        }
    }

    /// Convert a raw backend failure seen while acquiring hardware.
    pub fn into_unavailable(self) -> Self {
        match self {
            PinodeError::Driver(message) => PinodeError::ResourceUnavailable(message),
            PinodeError::Io(err) => PinodeError::ResourceUnavailable(err.to_string()),
            other => other,
        }
    }

    /// Only unreachable hardware is worth retrying on a later tick
    pub fn is_retryable(&self) -> bool {
        matches!(self, PinodeError::ResourceUnavailable(_))
    }

    /// Caller or configuration mistakes, rejected synchronously
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            PinodeError::InvalidValue { .. }
                | PinodeError::UnknownValue(_)
                | PinodeError::UnknownDevice(_)
                | PinodeError::DeviceNotReady(_)
        )
    }
}
