// # Device Store Trait
//
// Defines the interface for durable per-device state.
//
// ## Purpose
//
// The device store is the authoritative record of every registered device:
// liveness, actuator state, running firmware and the in-flight update link.
// Every other component reads and writes through it.
//
// ## Concurrency
//
// Writes are optimistic. Each `Device` carries a `revision`; `update_device`
// only succeeds when the stored revision still matches, otherwise it fails
// with `Error::StorageConflict` and the caller re-reads and re-applies.
// The bulk offline transition re-checks its predicate per device at write
// time, so it never needs a revision.
//
// ## Implementations
//
// - In-memory: `MemoryStore`
// - File-based: `FileStore` (JSON with atomic writes)

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Device, DeviceId};

/// Minimal projection used by the offline sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessSnapshot {
    pub device_id: DeviceId,
    pub last_seen: DateTime<Utc>,
}

/// Trait for device store implementations
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage (files, databases, etc.)
/// - ✅ Implement locking/concurrency control for thread safety
/// - ✅ Cache state in memory for performance (with explicit flush)
///
/// ## Forbidden Capabilities
/// - ❌ Decide state transitions (owned by `DeviceStateMachine`)
/// - ❌ Publish commands (owned by `OtaOrchestrator` / `DeviceAdmin`)
/// - ❌ Spawn background tasks without clear lifecycle
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Get a device by identifier
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Device))`: The current record
    /// - `Ok(None)`: No such device
    /// - `Err(Error)`: Storage error
    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<Device>, crate::Error>;

    /// Insert a new device record
    ///
    /// # Returns
    ///
    /// - `Ok(Device)`: The stored record (revision assigned by the store)
    /// - `Err(Error::DeviceAlreadyRegistered)`: A record with this id exists
    async fn insert_device(&self, device: &Device) -> Result<Device, crate::Error>;

    /// Replace a device record if nobody else wrote it first
    ///
    /// The write is accepted only if the stored revision equals
    /// `device.revision`. The returned record carries the new revision.
    ///
    /// # Returns
    ///
    /// - `Ok(Device)`: The stored record
    /// - `Err(Error::StorageConflict)`: The record changed since it was read
    /// - `Err(Error::DeviceNotFound)`: The record does not exist
    async fn update_device(&self, device: &Device) -> Result<Device, crate::Error>;

    /// List every device
    async fn list_devices(&self) -> Result<Vec<Device>, crate::Error>;

    /// List the devices belonging to one owner
    async fn list_devices_by_owner(&self, owner: &str) -> Result<Vec<Device>, crate::Error>;

    /// Snapshot of devices currently online with a known `last_seen`
    async fn list_online(&self) -> Result<Vec<LivenessSnapshot>, crate::Error>;

    /// Bulk transition of stale devices to offline
    ///
    /// For each listed device, the store sets `online = false` and
    /// `offline_at = now` only if the device is still online and its
    /// `last_seen` is strictly before `cutoff`. Devices that reported in since
    /// the snapshot are left alone.
    ///
    /// # Returns
    ///
    /// The identifiers actually demoted.
    async fn mark_offline(
        &self,
        device_ids: &[DeviceId],
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeviceId>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
