// # HTTP Artifact Store
//
// This crate provides the firmware metadata client for the fleet engine.
//
// ## Purpose
//
// Firmware binaries live in an object store that is fronted by a small
// metadata service. This client asks that service three questions:
//
// - Which version is in production? (`GET {base}/version.txt`, plain text)
// - Which versions must never be rolled out? (`GET {base}/blocked_versions.json`)
// - Where can a device download the binary? (`GET {base}/firmware/url?ttl=N`)
//
// ## Trust Level: Untrusted
//
// - One HTTP request per call, no retries (callers decide)
// - No caching: `CachedArtifactStore` in fleet-core owns that
// - Every failure maps to `Error::ArtifactStoreUnavailable`
//
// ## Security
//
// Signed URLs grant download access until they expire and are never logged.

use async_trait::async_trait;
use fleet_core::traits::ArtifactStore;
use fleet_core::{Error, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// Default HTTP timeout for metadata requests
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default lifetime of a signed firmware URL (5 minutes)
pub const DEFAULT_URL_TTL_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
struct BlockedVersions {
    #[serde(default)]
    blocked_versions: Vec<String>,
}

#[derive(Deserialize)]
struct SignedUrl {
    url: String,
}

/// Firmware metadata client
#[derive(Debug, Clone)]
pub struct HttpArtifactStore {
    /// Base URL without trailing slash
    base_url: String,

    /// Requested lifetime of signed URLs (in seconds)
    url_ttl_secs: u64,

    client: reqwest::Client,
}

impl HttpArtifactStore {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// `Error::Config` if `base_url` is not an http(s) URL or `url_ttl_secs`
    /// is zero.
    pub fn new(base_url: impl Into<String>, url_ttl_secs: u64) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::config(format!(
                "Artifact store URL must start with http:// or https://, got {:?}",
                base_url
            )));
        }
        if url_ttl_secs == 0 {
            return Err(Error::config("Signed firmware URL TTL must be > 0"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            url_ttl_secs,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn version_url(&self) -> String {
        format!("{}/version.txt", self.base_url)
    }

    fn blocked_url(&self) -> String {
        format!("{}/blocked_versions.json", self.base_url)
    }

    fn signed_url_endpoint(&self) -> String {
        format!("{}/firmware/url?ttl={}", self.base_url, self.url_ttl_secs)
    }

    async fn get(&self, url: &str, what: &str) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::artifact_store(format!("{} request failed: {}", what, e)))
    }
}

fn status_error(what: &str, status: StatusCode) -> Error {
    match status.as_u16() {
        401 | 403 => Error::artifact_store(format!("{}: access denied ({})", what, status)),
        404 => Error::artifact_store(format!("{}: not found", what)),
        500..=599 => Error::artifact_store(format!("{}: server error (transient) {}", what, status)),
        _ => Error::artifact_store(format!("{}: unexpected status {}", what, status)),
    }
}

/// Parse the body of `version.txt`
fn parse_version_text(body: &str) -> Result<String> {
    let version = body.trim();
    if version.is_empty() {
        return Err(Error::artifact_store("production version file is empty"));
    }
    Ok(version.to_string())
}

/// Parse the body of `blocked_versions.json`
fn parse_blocked(body: &str) -> Result<HashSet<String>> {
    let parsed: BlockedVersions = serde_json::from_str(body)
        .map_err(|e| Error::artifact_store(format!("invalid blocked version list: {}", e)))?;
    Ok(parsed
        .blocked_versions
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn production_version(&self) -> Result<String> {
        let response = self.get(&self.version_url(), "production version").await?;
        if !response.status().is_success() {
            return Err(status_error("production version", response.status()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::artifact_store(format!("Failed to read version file: {}", e)))?;
        let version = parse_version_text(&body)?;
        tracing::debug!("Production firmware version is {}", version);
        Ok(version)
    }

    async fn signed_firmware_url(&self) -> Result<String> {
        let response = self.get(&self.signed_url_endpoint(), "signed URL").await?;
        if !response.status().is_success() {
            return Err(status_error("signed URL", response.status()));
        }

        let signed: SignedUrl = response
            .json()
            .await
            .map_err(|e| Error::artifact_store(format!("Failed to parse signed URL response: {}", e)))?;
        if signed.url.is_empty() {
            return Err(Error::artifact_store("signed URL response is empty"));
        }
        tracing::debug!("Obtained signed firmware URL (ttl {}s)", self.url_ttl_secs);
        Ok(signed.url)
    }

    async fn blocked_versions(&self) -> Result<HashSet<String>> {
        let response = self.get(&self.blocked_url(), "blocked versions").await?;

        // No list published means nothing is blocked
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("No blocked version list published");
            return Ok(HashSet::new());
        }
        if !response.status().is_success() {
            return Err(status_error("blocked versions", response.status()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::artifact_store(format!("Failed to read blocked version list: {}", e)))?;
        parse_blocked(&body)
    }

    fn store_name(&self) -> &'static str {
        "http"
    }
}
