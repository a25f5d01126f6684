// # Store Tables
//
// Plain in-memory tables shared by every store implementation. All
// optimistic-concurrency and conditional-write rules live here so the
// memory and file stores cannot drift apart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Error;
use crate::model::{Device, DeviceId, OtaRecord, OtaRecordId, OtaStatus};
use crate::traits::LivenessSnapshot;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreTables {
    pub devices: HashMap<DeviceId, Device>,
    /// Insertion order
    pub ota_records: Vec<OtaRecord>,
}

impl StoreTables {
    pub fn get(&self, device_id: &DeviceId) -> Option<Device> {
        self.devices.get(device_id).cloned()
    }

    pub fn insert(&mut self, device: &Device) -> Result<Device, Error> {
        if self.devices.contains_key(&device.device_id) {
            return Err(Error::DeviceAlreadyRegistered(device.device_id.to_string()));
        }
        let mut stored = device.clone();
        stored.revision = 1;
        self.devices.insert(stored.device_id.clone(), stored.clone());
        Ok(stored)
    }

    pub fn update(&mut self, device: &Device) -> Result<Device, Error> {
        let current = self
            .devices
            .get_mut(&device.device_id)
            .ok_or_else(|| Error::device_not_found(device.device_id.as_str()))?;

        if current.revision != device.revision {
            return Err(Error::conflict(device.device_id.as_str(), device.revision));
        }

        let mut stored = device.clone();
        stored.revision = current.revision + 1;
        stored.updated_at = Utc::now();
        *current = stored.clone();
        Ok(stored)
    }

    pub fn all(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    pub fn by_owner(&self, owner: &str) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .values()
            .filter(|d| d.owner == owner)
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    pub fn online_snapshot(&self) -> Vec<LivenessSnapshot> {
        self.devices
            .values()
            .filter(|d| d.online)
            .filter_map(|d| {
                d.last_seen.map(|last_seen| LivenessSnapshot {
                    device_id: d.device_id.clone(),
                    last_seen,
                })
            })
            .collect()
    }

    pub fn mark_offline(
        &mut self,
        device_ids: &[DeviceId],
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<DeviceId> {
        let mut demoted = Vec::with_capacity(device_ids.len());
        for device_id in device_ids {
            let Some(device) = self.devices.get_mut(device_id) else {
                continue;
            };
            let still_stale = device.last_seen.is_some_and(|seen| seen < cutoff);
            if device.online && still_stale {
                device.online = false;
                device.offline_at = Some(now);
                device.revision += 1;
                device.updated_at = now;
                demoted.push(device_id.clone());
            }
        }
        demoted
    }

    pub fn create_record(&mut self, record: &OtaRecord) -> Result<(), Error> {
        if self.ota_records.iter().any(|r| r.id == record.id) {
            return Err(Error::storage(format!("OTA record {} already exists", record.id)));
        }
        self.ota_records.push(record.clone());
        Ok(())
    }

    pub fn get_record(&self, id: &OtaRecordId) -> Option<OtaRecord> {
        self.ota_records.iter().find(|r| r.id == *id).cloned()
    }

    pub fn update_record_status(
        &mut self,
        id: &OtaRecordId,
        status: OtaStatus,
        reason: Option<String>,
    ) -> Option<OtaRecord> {
        let record = self.ota_records.iter_mut().find(|r| r.id == *id)?;
        record.status = status;
        if reason.is_some() {
            record.reason = reason;
        }
        record.updated_at = Utc::now();
        Some(record.clone())
    }

    pub fn history(&self, device_id: &DeviceId) -> Vec<OtaRecord> {
        let mut records: Vec<OtaRecord> = self
            .ota_records
            .iter()
            .rev()
            .filter(|r| r.device_id == *device_id)
            .cloned()
            .collect();
        // Stable sort keeps reverse insertion order for equal timestamps
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}
