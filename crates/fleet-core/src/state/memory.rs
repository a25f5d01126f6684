// # Memory Store
//
// In-memory implementation of DeviceStore, OtaStore and ActivityLog.
//
// ## Purpose
//
// Provides a fast store that doesn't persist across restarts. Useful for
// testing, demos, and deployments where the fleet is re-registered on boot.
//
// ## Crash Behavior
//
// - All devices, OTA history and audit entries are lost on restart
// - Devices must be registered again before telemetry is accepted

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::tables::StoreTables;
use crate::Error;
use crate::model::{ActivityEntry, Device, DeviceId, OtaRecord, OtaRecordId, OtaStatus};
use crate::traits::{ActivityLog, DeviceStore, LivenessSnapshot, OtaStore};

/// In-memory store implementation
///
/// Every table sits behind one `RwLock`, so each trait call is atomic with
/// respect to every other call on the same store.
///
/// # Example
///
/// ```rust,no_run
/// use fleet_core::model::{Device, DeviceId};
/// use fleet_core::state::MemoryStore;
/// use fleet_core::traits::DeviceStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new();
///     let id = DeviceId::parse("AA11")?;
///
///     store.insert_device(&Device::new(id.clone(), "lamp", "alice", "1.0.0")).await?;
///     assert!(store.get_device(&id).await?.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryTables>>,
}

#[derive(Debug, Default)]
struct MemoryTables {
    tables: StoreTables,
    activity: Vec<ActivityEntry>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered devices
    pub async fn device_count(&self) -> usize {
        self.inner.read().await.tables.devices.len()
    }

    /// Every audit entry, oldest first
    pub async fn all_activity(&self) -> Vec<ActivityEntry> {
        self.inner.read().await.activity.clone()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<Device>, Error> {
        Ok(self.inner.read().await.tables.get(device_id))
    }

    async fn insert_device(&self, device: &Device) -> Result<Device, Error> {
        self.inner.write().await.tables.insert(device)
    }

    async fn update_device(&self, device: &Device) -> Result<Device, Error> {
        self.inner.write().await.tables.update(device)
    }

    async fn list_devices(&self) -> Result<Vec<Device>, Error> {
        Ok(self.inner.read().await.tables.all())
    }

    async fn list_devices_by_owner(&self, owner: &str) -> Result<Vec<Device>, Error> {
        Ok(self.inner.read().await.tables.by_owner(owner))
    }

    async fn list_online(&self) -> Result<Vec<LivenessSnapshot>, Error> {
        Ok(self.inner.read().await.tables.online_snapshot())
    }

    async fn mark_offline(
        &self,
        device_ids: &[DeviceId],
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeviceId>, Error> {
        Ok(self
            .inner
            .write()
            .await
            .tables
            .mark_offline(device_ids, cutoff, now))
    }

    async fn flush(&self) -> Result<(), Error> {
        // No-op for memory store (nothing to persist)
        Ok(())
    }
}

#[async_trait]
impl OtaStore for MemoryStore {
    async fn create_record(&self, record: &OtaRecord) -> Result<(), Error> {
        self.inner.write().await.tables.create_record(record)
    }

    async fn get_record(&self, id: &OtaRecordId) -> Result<Option<OtaRecord>, Error> {
        Ok(self.inner.read().await.tables.get_record(id))
    }

    async fn update_record_status(
        &self,
        id: &OtaRecordId,
        status: OtaStatus,
        reason: Option<String>,
    ) -> Result<Option<OtaRecord>, Error> {
        Ok(self
            .inner
            .write()
            .await
            .tables
            .update_record_status(id, status, reason))
    }

    async fn history(&self, device_id: &DeviceId) -> Result<Vec<OtaRecord>, Error> {
        Ok(self.inner.read().await.tables.history(device_id))
    }
}

#[async_trait]
impl ActivityLog for MemoryStore {
    async fn append(&self, entry: &ActivityEntry) -> Result<(), Error> {
        self.inner.write().await.activity.push(entry.clone());
        Ok(())
    }

    async fn entries_for(&self, device_id: &DeviceId) -> Result<Vec<ActivityEntry>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .activity
            .iter()
            .filter(|e| e.device_id.as_ref() == Some(device_id))
            .cloned()
            .collect())
    }
}
