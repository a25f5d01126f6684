//! Audit trail entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::{DeviceId, OtaStatus};

/// Audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityAction {
    DeviceRegistered,
    DeviceBlocked,
    DeviceUnblocked,
    DeviceOffline,
    LedOn,
    LedOff,
    OtaStarted,
    OtaProgress,
    OtaSuccess,
    OtaFailed,
}

impl ActivityAction {
    /// Audit action for a device-reported OTA status, if it has one
    pub fn for_ota_status(status: &OtaStatus) -> Option<Self> {
        match status {
            OtaStatus::Started => Some(Self::OtaStarted),
            OtaStatus::InProgress | OtaStatus::Progress => Some(Self::OtaProgress),
            OtaStatus::Success => Some(Self::OtaSuccess),
            OtaStatus::Failed => Some(Self::OtaFailed),
            _ => None,
        }
    }
}

/// One audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub action: ActivityAction,
    pub device_id: Option<DeviceId>,
    /// Who performed the action; `None` for device- or system-originated events
    pub actor: Option<String>,
    pub meta: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn device(action: ActivityAction, device_id: &DeviceId) -> Self {
        Self {
            action,
            device_id: Some(device_id.clone()),
            actor: None,
            meta: None,
            at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}
