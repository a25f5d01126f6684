// # Activity Log Trait
//
// Sink for the audit trail. Implementations may fail; callers never see
// those failures because every write goes through `ActivityRecorder`,
// which swallows and reports them on its own channel.

use async_trait::async_trait;

use crate::model::{ActivityEntry, DeviceId};

/// Trait for audit trail storage
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Append one entry
    async fn append(&self, entry: &ActivityEntry) -> Result<(), crate::Error>;

    /// Entries for a device, oldest first
    async fn entries_for(&self, device_id: &DeviceId) -> Result<Vec<ActivityEntry>, crate::Error>;
}
