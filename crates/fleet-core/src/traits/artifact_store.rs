// # Firmware Artifact Store Trait
//
// Read-only oracle over the firmware object store: which version is in
// production, where to download it, and which versions must never be
// rolled out again.
//
// Implementations perform a single request per call. Caching and deadlines
// are layered on by `CachedArtifactStore`.

use async_trait::async_trait;
use std::collections::HashSet;

/// Trait for firmware artifact store implementations
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS calls to the artifact endpoint only
/// - ✅ Parse the endpoint's responses
///
/// ## Forbidden Capabilities
/// - ❌ Cache results (owned by `CachedArtifactStore`)
/// - ❌ Retry (a failure surfaces as `ArtifactStoreUnavailable`)
/// - ❌ Decide update eligibility (owned by `OtaOrchestrator`)
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Version string of the current production firmware
    async fn production_version(&self) -> Result<String, crate::Error>;

    /// Time-limited download URL for the production firmware binary
    async fn signed_firmware_url(&self) -> Result<String, crate::Error>;

    /// Versions that must not be installed
    ///
    /// A store with no block list returns an empty set.
    async fn blocked_versions(&self) -> Result<HashSet<String>, crate::Error>;

    /// Store name (for logging/debugging)
    fn store_name(&self) -> &'static str;
}
