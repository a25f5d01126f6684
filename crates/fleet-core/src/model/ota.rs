//! OTA history records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::device::{DeviceId, OtaStatus};

/// Identifier of one update attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OtaRecordId(Uuid);

impl OtaRecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OtaRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OtaRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One firmware update attempt (audit trail, never deleted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtaRecord {
    pub id: OtaRecordId,
    pub device_id: DeviceId,
    pub from_version: String,
    pub to_version: String,
    pub status: OtaStatus,
    pub reason: Option<String>,
    /// Account that requested the update, if known
    #[serde(default)]
    pub triggered_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OtaRecord {
    /// Record for an update that has just been issued
    pub fn started(
        device_id: DeviceId,
        from_version: impl Into<String>,
        to_version: impl Into<String>,
        triggered_by: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OtaRecordId::new(),
            device_id,
            from_version: from_version.into(),
            to_version: to_version.into(),
            status: OtaStatus::Started,
            reason: None,
            triggered_by,
            created_at: now,
            updated_at: now,
        }
    }
}
