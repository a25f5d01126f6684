//! Device identity and state record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ota::OtaRecordId;
use crate::error::{Error, Result};

/// Normalized device identifier (uppercase ASCII alphanumeric)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Normalize and validate a raw identifier
    ///
    /// Surrounding whitespace is trimmed and letters are uppercased, so
    /// `"aa11"` and `" AA11 "` name the same device.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(Error::InvalidDeviceId("empty identifier".to_string()));
        }
        if !normalized.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::InvalidDeviceId(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// OTA lifecycle status
///
/// Shared by device records and OTA history records. `Idle` only appears on
/// devices and `Queued` only on history records. Literals reported by
/// firmware that are not in the canonical set are kept verbatim in
/// [`OtaStatus::Unrecognized`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OtaStatus {
    #[default]
    Idle,
    Queued,
    Started,
    InProgress,
    Progress,
    Success,
    Failed,
    Unrecognized(String),
}

impl OtaStatus {
    /// Interpret a wire literal; never fails
    pub fn from_literal(literal: &str) -> Self {
        match literal {
            "IDLE" => Self::Idle,
            "QUEUED" => Self::Queued,
            "STARTED" => Self::Started,
            "IN_PROGRESS" => Self::InProgress,
            "PROGRESS" => Self::Progress,
            "SUCCESS" => Self::Success,
            "FAILED" => Self::Failed,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "IDLE",
            Self::Queued => "QUEUED",
            Self::Started => "STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Progress => "PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Unrecognized(literal) => literal,
        }
    }

    /// An update has been issued and has not reached a terminal state
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Started | Self::InProgress | Self::Progress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for OtaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for OtaStatus {
    fn from(value: String) -> Self {
        Self::from_literal(&value)
    }
}

impl From<OtaStatus> for String {
    fn from(status: OtaStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Authoritative state of one physical device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: DeviceId,
    pub name: String,
    /// Owning account, as known to the identity layer
    pub owner: String,

    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    /// When the watchdog or an administrator last took the device offline
    #[serde(default)]
    pub offline_at: Option<DateTime<Utc>>,

    pub led_state: bool,
    pub blocked: bool,

    pub firmware_version: String,
    pub target_version: Option<String>,
    pub ota_status: OtaStatus,
    pub current_ota_id: Option<OtaRecordId>,

    pub last_heap: Option<f64>,
    pub last_temp: Option<f64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency counter, bumped by the store on every write
    #[serde(default)]
    pub revision: u64,
}

impl Device {
    /// A freshly registered, never-seen device
    pub fn new(
        device_id: DeviceId,
        name: impl Into<String>,
        owner: impl Into<String>,
        firmware_version: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            device_id,
            name: name.into(),
            owner: owner.into(),
            online: false,
            last_seen: None,
            offline_at: None,
            led_state: false,
            blocked: false,
            firmware_version: firmware_version.into(),
            target_version: None,
            ota_status: OtaStatus::Idle,
            current_ota_id: None,
            last_heap: None,
            last_temp: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Silent for longer than `threshold` as of `now`
    ///
    /// Devices that were never seen are not stale; they were never online.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        match self.last_seen {
            Some(seen) => now.signed_duration_since(seen) > threshold,
            None => false,
        }
    }
}
