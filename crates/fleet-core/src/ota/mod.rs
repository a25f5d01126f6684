//! OTA orchestration
//!
//! The orchestrator decides update eligibility and issues updates. It is
//! write-once per attempt: completion and failure arrive later as
//! `ota/status` telemetry and are reconciled by the state machine.
//!
//! ## Issuing an update
//!
//! ```text
//! 1. preconditions   exists, not blocked, online, no update in flight
//! 2. artifact store  version, block list, signed URL   (nothing written yet)
//! 3. OTA record      created STARTED
//! 4. device          IN_PROGRESS + target + record link (CAS, retried)
//!                    on failure: record -> FAILED
//! 5. publish URL     devices/<ID>/ota
//!                    on failure: device -> FAILED, record -> FAILED
//! ```

pub mod cache;

pub use cache::CachedArtifactStore;

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::activity::ActivityRecorder;
use crate::error::{Error, Result};
use crate::model::{ActivityAction, ActivityEntry, Device, DeviceId, OtaRecord, OtaRecordId, OtaStatus};
use crate::state::{Edit, Modified, modify_device};
use crate::telemetry::ota_topic;
use crate::traits::{ArtifactStore, DeviceStore, OtaStore, Transport};
use crate::version::is_newer;

/// Answer to "is there newer firmware for this device?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheck {
    pub update_available: bool,
    pub latest_version: String,
}

/// An update that has been handed to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStarted {
    pub firmware_url: String,
    pub target_version: String,
    pub ota_id: OtaRecordId,
}

pub struct OtaOrchestrator {
    devices: Arc<dyn DeviceStore>,
    records: Arc<dyn OtaStore>,
    artifacts: Arc<dyn ArtifactStore>,
    transport: Arc<dyn Transport>,
    activity: ActivityRecorder,
    enforce_blocked_versions: bool,
    max_conflict_retries: usize,
}

impl OtaOrchestrator {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        records: Arc<dyn OtaStore>,
        artifacts: Arc<dyn ArtifactStore>,
        transport: Arc<dyn Transport>,
        activity: ActivityRecorder,
        enforce_blocked_versions: bool,
        max_conflict_retries: usize,
    ) -> Self {
        Self {
            devices,
            records,
            artifacts,
            transport,
            activity,
            enforce_blocked_versions,
            max_conflict_retries,
        }
    }

    /// Compare the device's firmware with production
    ///
    /// Pure query. A production version on the block list is never offered
    /// when block enforcement is on.
    pub async fn check_update(&self, device: &Device) -> Result<UpdateCheck> {
        let latest = self.artifacts.production_version().await?;
        let mut update_available = is_newer(&device.firmware_version, &latest)?;

        if update_available && self.enforce_blocked_versions {
            let blocked = self.artifacts.blocked_versions().await?;
            if blocked.contains(&latest) {
                warn!(
                    "Production firmware {} is blocked; not offering it to {}",
                    latest, device.device_id
                );
                update_available = false;
            }
        }

        Ok(UpdateCheck {
            update_available,
            latest_version: latest,
        })
    }

    /// Issue an update to the production firmware
    ///
    /// `triggered_by` is recorded on the OTA record and in the audit trail.
    pub async fn start_update(
        &self,
        device_id: &DeviceId,
        triggered_by: Option<&str>,
    ) -> Result<UpdateStarted> {
        let device = self
            .devices
            .get_device(device_id)
            .await?
            .ok_or_else(|| Error::device_not_found(device_id.as_str()))?;
        check_can_start(&device)?;

        let target = self.artifacts.production_version().await?;
        if self.enforce_blocked_versions {
            let blocked = self.artifacts.blocked_versions().await?;
            if blocked.contains(&target) {
                return Err(Error::FirmwareVersionBlocked(target));
            }
        }
        let firmware_url = self.artifacts.signed_firmware_url().await?;

        let record = OtaRecord::started(
            device_id.clone(),
            device.firmware_version.clone(),
            target.clone(),
            triggered_by.map(str::to_string),
        );
        self.records.create_record(&record).await?;

        if let Err(e) = self.link_device(device_id, &target, record.id).await {
            self.fail_record(&record.id, format!("device update failed: {}", e))
                .await;
            return Err(e);
        }

        if let Err(e) = self
            .transport
            .publish(&ota_topic(device_id), firmware_url.as_bytes())
            .await
        {
            error!("Failed to publish OTA command to {}: {}", device_id, e);
            self.unlink_device(device_id, record.id).await;
            self.fail_record(&record.id, format!("publish failed: {}", e))
                .await;
            return Err(match e {
                Error::Transport(_) => e,
                other => Error::transport(other.to_string()),
            });
        }

        info!(
            "OTA {} started for {}: {} -> {}",
            record.id, device_id, record.from_version, target
        );

        let mut entry = ActivityEntry::device(ActivityAction::OtaStarted, device_id).with_meta(json!({
            "ota_id": record.id.to_string(),
            "from": record.from_version,
            "to": target,
        }));
        if let Some(actor) = triggered_by {
            entry = entry.with_actor(actor);
        }
        self.activity.record(entry).await;

        Ok(UpdateStarted {
            firmware_url,
            target_version: target,
            ota_id: record.id,
        })
    }

    /// Mark the device IN_PROGRESS, re-checking preconditions on every attempt
    async fn link_device(&self, device_id: &DeviceId, target: &str, ota_id: OtaRecordId) -> Result<()> {
        let modified = modify_device(
            self.devices.as_ref(),
            device_id,
            self.max_conflict_retries,
            |device| {
                if let Err(e) = check_can_start(device) {
                    return Ok(Edit::Skip(Some(e)));
                }
                device.ota_status = OtaStatus::InProgress;
                device.target_version = Some(target.to_string());
                device.current_ota_id = Some(ota_id);
                Ok(Edit::Commit(None))
            },
        )
        .await?;

        match modified {
            Modified::Committed(..) => Ok(()),
            Modified::Skipped(_, Some(e)) => Err(e),
            Modified::Skipped(_, None) => Err(Error::Other("device update skipped".to_string())),
            Modified::NotFound => Err(Error::device_not_found(device_id.as_str())),
        }
    }

    /// Undo `link_device` after the command could not be delivered
    async fn unlink_device(&self, device_id: &DeviceId, ota_id: OtaRecordId) {
        let result = modify_device(
            self.devices.as_ref(),
            device_id,
            self.max_conflict_retries,
            |device| {
                if device.current_ota_id != Some(ota_id) || !device.ota_status.is_in_flight() {
                    return Ok(Edit::Skip(()));
                }
                device.ota_status = OtaStatus::Failed;
                device.target_version = None;
                Ok(Edit::Commit(()))
            },
        )
        .await;

        if let Err(e) = result {
            error!("Failed to roll back OTA state of {}: {}", device_id, e);
        }
    }

    async fn fail_record(&self, ota_id: &OtaRecordId, reason: String) {
        match self
            .records
            .update_record_status(ota_id, OtaStatus::Failed, Some(reason))
            .await
        {
            Ok(_) => {}
            Err(e) => error!("Failed to mark OTA record {} as FAILED: {}", ota_id, e),
        }
    }
}

fn check_can_start(device: &Device) -> Result<()> {
    if device.blocked {
        return Err(Error::device_blocked(device.device_id.as_str()));
    }
    if !device.online {
        return Err(Error::device_offline(device.device_id.as_str()));
    }
    if device.ota_status.is_in_flight() {
        return Err(Error::ota_in_progress(device.device_id.as_str()));
    }
    Ok(())
}
