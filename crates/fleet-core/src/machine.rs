//! Device state machine
//!
//! Applies telemetry to device records. The transition rules are plain
//! functions over `&mut Device`; [`DeviceStateMachine`] runs them inside the
//! store's optimistic read-modify-write loop so concurrent messages for the
//! same device never lose an update.
//!
//! ## Rules
//!
//! - Every telemetry category sets `online = true` and `last_seen = now`.
//! - `health` overwrites `firmware_version`, `last_heap` and `last_temp`
//!   when present (an empty `fw` is ignored).
//! - `status` sets `led_state` for the literals `ON` / `OFF` only.
//! - `ota/status` stores the literal verbatim. `SUCCESS` with a target
//!   commits the target as the running firmware and clears it.
//! - Going offline never touches `ota_status`; a device that drops off the
//!   network mid-flash is not failed by silence.
//! - Blocked devices are never modified by telemetry.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityRecorder;
use crate::error::Result;
use crate::model::{ActivityAction, ActivityEntry, Device, DeviceId, OtaRecordId, OtaStatus};
use crate::state::{Edit, Modified, modify_device};
use crate::telemetry::HealthReport;
use crate::traits::{DeviceStore, OtaStore};

/// A decoded telemetry message
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Health(HealthReport),
    Status { led: Option<bool> },
    OtaStatus(OtaStatus),
}

pub fn apply_health(device: &mut Device, report: &HealthReport, now: DateTime<Utc>) {
    touch(device, now);
    if let Some(fw) = report.fw.as_deref().map(str::trim).filter(|fw| !fw.is_empty()) {
        device.firmware_version = fw.to_string();
    }
    if let Some(heap) = report.heap {
        device.last_heap = Some(heap);
    }
    if let Some(temp) = report.temp {
        device.last_temp = Some(temp);
    }
}

pub fn apply_status(device: &mut Device, led: Option<bool>, now: DateTime<Utc>) {
    touch(device, now);
    if let Some(on) = led {
        device.led_state = on;
    }
}

/// Returns the version committed by a `SUCCESS`, if any
pub fn apply_ota_status(
    device: &mut Device,
    status: &OtaStatus,
    now: DateTime<Utc>,
) -> Option<String> {
    touch(device, now);
    device.ota_status = status.clone();
    if *status == OtaStatus::Success {
        if let Some(target) = device.target_version.take() {
            device.firmware_version = target.clone();
            return Some(target);
        }
    }
    None
}

pub fn mark_offline(device: &mut Device, now: DateTime<Utc>) {
    device.online = false;
    device.offline_at = Some(now);
}

fn touch(device: &mut Device, now: DateTime<Utc>) {
    device.online = true;
    device.last_seen = Some(now);
}

/// What a successfully applied message changed
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub device: Device,
    /// The device was offline before this message
    pub came_online: bool,
    /// New LED state, when the message changed it
    pub led_changed: Option<bool>,
    pub ota: Option<OtaProgress>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OtaProgress {
    pub status: OtaStatus,
    /// Record the status was forwarded to
    pub ota_id: Option<OtaRecordId>,
    pub committed_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    UnknownDevice,
    Blocked,
    Applied(Transition),
}

#[derive(Debug, Default)]
struct Effect {
    came_online: bool,
    led_changed: Option<bool>,
    committed_version: Option<String>,
}

pub struct DeviceStateMachine {
    devices: Arc<dyn DeviceStore>,
    ota: Arc<dyn OtaStore>,
    activity: ActivityRecorder,
    max_conflict_retries: usize,
}

impl DeviceStateMachine {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        ota: Arc<dyn OtaStore>,
        activity: ActivityRecorder,
        max_conflict_retries: usize,
    ) -> Self {
        Self {
            devices,
            ota,
            activity,
            max_conflict_retries,
        }
    }

    pub async fn apply(&self, device_id: &DeviceId, event: &TelemetryEvent) -> Result<ApplyOutcome> {
        self.apply_at(device_id, event, Utc::now()).await
    }

    /// Apply `event` as if it arrived at `now`
    pub async fn apply_at(
        &self,
        device_id: &DeviceId,
        event: &TelemetryEvent,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        let modified = modify_device(
            self.devices.as_ref(),
            device_id,
            self.max_conflict_retries,
            |device| {
                if device.blocked {
                    return Ok(Edit::Skip(Effect::default()));
                }
                let mut effect = Effect {
                    came_online: !device.online,
                    ..Effect::default()
                };
                match event {
                    TelemetryEvent::Health(report) => apply_health(device, report, now),
                    TelemetryEvent::Status { led } => {
                        let before = device.led_state;
                        apply_status(device, *led, now);
                        if device.led_state != before {
                            effect.led_changed = Some(device.led_state);
                        }
                    }
                    TelemetryEvent::OtaStatus(status) => {
                        effect.committed_version = apply_ota_status(device, status, now);
                    }
                }
                Ok(Edit::Commit(effect))
            },
        )
        .await?;

        let (device, effect) = match modified {
            Modified::NotFound => return Ok(ApplyOutcome::UnknownDevice),
            Modified::Skipped(..) => return Ok(ApplyOutcome::Blocked),
            Modified::Committed(device, effect) => (device, effect),
        };

        if effect.came_online {
            info!("Device {} is online", device_id);
        }

        if let Some(on) = effect.led_changed {
            let action = if on {
                ActivityAction::LedOn
            } else {
                ActivityAction::LedOff
            };
            self.activity
                .record(ActivityEntry::device(action, device_id).with_meta(json!({ "source": "telemetry" })))
                .await;
        }

        let ota = match event {
            TelemetryEvent::OtaStatus(status) => Some(
                self.forward_ota_status(&device, status, effect.committed_version)
                    .await,
            ),
            _ => None,
        };

        Ok(ApplyOutcome::Applied(Transition {
            device,
            came_online: effect.came_online,
            led_changed: effect.led_changed,
            ota,
        }))
    }

    /// Mirror a device-reported status onto the linked OTA record
    ///
    /// The device write has already happened; a failure here is logged and
    /// leaves the record behind, it does not undo the device transition.
    async fn forward_ota_status(
        &self,
        device: &Device,
        status: &OtaStatus,
        committed_version: Option<String>,
    ) -> OtaProgress {
        let ota_id = device.current_ota_id;

        if let Some(id) = ota_id {
            match self.ota.update_record_status(&id, status.clone(), None).await {
                Ok(Some(_)) => debug!("OTA record {} -> {}", id, status),
                Ok(None) => warn!(
                    "Device {} links OTA record {} which does not exist",
                    device.device_id, id
                ),
                Err(e) => error!("Failed to update OTA record {}: {}", id, e),
            }
        }

        if let Some(version) = &committed_version {
            info!("Device {} now runs firmware {}", device.device_id, version);
        }

        if let Some(action) = ActivityAction::for_ota_status(status) {
            let mut meta = json!({ "status": status.as_str() });
            if let Some(id) = ota_id {
                meta["ota_id"] = json!(id.to_string());
            }
            if let Some(version) = &committed_version {
                meta["version"] = json!(version);
            }
            self.activity
                .record(ActivityEntry::device(action, &device.device_id).with_meta(meta))
                .await;
        }

        OtaProgress {
            status: status.clone(),
            ota_id,
            committed_version,
        }
    }
}
