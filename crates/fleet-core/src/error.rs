//! Error types for the fleet core
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for fleet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the fleet system
#[derive(Error, Debug)]
pub enum Error {
    /// A version string is not three dot-separated integers
    #[error("Invalid version format: {0}")]
    InvalidVersionFormat(String),

    /// Device must be online for the requested operation
    #[error("Device offline: {0}")]
    DeviceOffline(String),

    /// An update is already in flight for the device
    #[error("OTA already in progress: {0}")]
    OtaAlreadyInProgress(String),

    /// Device access has been revoked
    #[error("Device blocked: {0}")]
    DeviceBlocked(String),

    /// No device record for the identifier
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A device record already exists for the identifier
    #[error("Device already registered: {0}")]
    DeviceAlreadyRegistered(String),

    /// Identifier is empty or not alphanumeric
    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    /// The production firmware is on the rollback block list
    #[error("Firmware version blocked: {0}")]
    FirmwareVersionBlocked(String),

    /// Firmware artifact store timed out or failed
    #[error("Artifact store unavailable: {0}")]
    ArtifactStoreUnavailable(String),

    /// Network policy service call failed
    #[error("Policy service error: {0}")]
    PolicyService(String),

    /// Telemetry payload or topic could not be interpreted
    #[error("Malformed telemetry on {topic}: {reason}")]
    MalformedTelemetry {
        /// Topic the message arrived on
        topic: String,
        /// Why it was rejected
        reason: String,
    },

    /// Concurrent write detected on a device record
    #[error("Storage conflict on device {device_id}: expected revision {expected}")]
    StorageConflict {
        /// Device whose record changed underneath the writer
        device_id: String,
        /// Revision the writer based its update on
        expected: u64,
    },

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Pub/sub transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bounded external call exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an invalid version error
    pub fn invalid_version(msg: impl Into<String>) -> Self {
        Self::InvalidVersionFormat(msg.into())
    }

    /// Create a device offline error
    pub fn device_offline(device_id: impl Into<String>) -> Self {
        Self::DeviceOffline(device_id.into())
    }

    /// Create an OTA-in-progress error
    pub fn ota_in_progress(device_id: impl Into<String>) -> Self {
        Self::OtaAlreadyInProgress(device_id.into())
    }

    /// Create a device blocked error
    pub fn device_blocked(device_id: impl Into<String>) -> Self {
        Self::DeviceBlocked(device_id.into())
    }

    /// Create a "device not found" error
    pub fn device_not_found(device_id: impl Into<String>) -> Self {
        Self::DeviceNotFound(device_id.into())
    }

    /// Create an artifact store error
    pub fn artifact_store(msg: impl Into<String>) -> Self {
        Self::ArtifactStoreUnavailable(msg.into())
    }

    /// Create a policy service error
    pub fn policy(msg: impl Into<String>) -> Self {
        Self::PolicyService(msg.into())
    }

    /// Create a malformed telemetry error
    pub fn malformed(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedTelemetry {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage conflict error
    pub fn conflict(device_id: impl Into<String>, expected: u64) -> Self {
        Self::StorageConflict {
            device_id: device_id.into(),
            expected,
        }
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Whether the error came from a concurrent write and may succeed on retry
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StorageConflict { .. })
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
