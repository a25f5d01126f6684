// # Network Policy Service Trait
//
// The privileged side-system that grants and revokes a device's broker
// credentials and topic permissions. The core only notifies it; calls go
// through `PolicyNotifier`, which owns queueing, deadlines and retries.

use async_trait::async_trait;

use crate::model::DeviceId;

/// Trait for network policy service implementations
///
/// Both operations must be idempotent: provisioning an existing identity
/// and revoking an absent one succeed.
#[async_trait]
pub trait PolicyService: Send + Sync {
    /// Grant credentials and topic permissions to a device
    async fn provision(&self, device_id: &DeviceId) -> Result<(), crate::Error>;

    /// Remove credentials and topic permissions from a device
    async fn revoke(&self, device_id: &DeviceId) -> Result<(), crate::Error>;

    /// Service name (for logging/debugging)
    fn service_name(&self) -> &'static str;
}
