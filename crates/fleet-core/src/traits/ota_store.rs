// # OTA Store Trait
//
// Append-mostly history of firmware update attempts. Records are created
// when an update is issued, updated in place as the device reports
// progress, and never deleted.

use async_trait::async_trait;

use crate::model::{DeviceId, OtaRecord, OtaRecordId, OtaStatus};

/// Trait for OTA history storage
///
/// Implementations must be thread-safe and usable across async tasks.
#[async_trait]
pub trait OtaStore: Send + Sync {
    /// Store a new record
    async fn create_record(&self, record: &OtaRecord) -> Result<(), crate::Error>;

    /// Fetch one record
    async fn get_record(&self, id: &OtaRecordId) -> Result<Option<OtaRecord>, crate::Error>;

    /// Update the status (and optionally the reason) of a record in place
    ///
    /// # Returns
    ///
    /// - `Ok(Some(OtaRecord))`: The updated record
    /// - `Ok(None)`: No record with this id
    async fn update_record_status(
        &self,
        id: &OtaRecordId,
        status: OtaStatus,
        reason: Option<String>,
    ) -> Result<Option<OtaRecord>, crate::Error>;

    /// All records for a device, newest first
    async fn history(&self, device_id: &DeviceId) -> Result<Vec<OtaRecord>, crate::Error>;
}
