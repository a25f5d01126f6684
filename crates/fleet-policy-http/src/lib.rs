// # HTTP Policy Service
//
// This crate provides the network policy client for the fleet engine.
//
// ## Purpose
//
// Each device gets a broker identity (`esp32_<ID>`) allowed to write its
// own telemetry topics and read its own command topics, nothing else.
// Registration and unblocking provision that identity; blocking revokes it.
//
// ## API
//
// - Provision: `POST {base}/devices/{id}/provision` with the topic grants
// - Revoke: `DELETE {base}/devices/{id}`
//
// Both are idempotent on the server: `409 Conflict` on provision and
// `404 Not Found` on revoke mean the desired state already holds and are
// treated as success.
//
// ## Trust Level: Untrusted
//
// - One HTTP request per call; `PolicyNotifier` in fleet-core owns retries
// - Bearer token never appears in logs or `Debug` output
//
// ## Dry-Run Mode
//
// With `dry_run` set the client logs what it would send and succeeds
// without touching the network. Development brokers usually run without
// access control, so this is the default outside production.

use async_trait::async_trait;
use fleet_core::model::DeviceId;
use fleet_core::traits::PolicyService;
use fleet_core::{Error, Result};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

/// Default HTTP timeout for policy requests
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Broker identity prefix for device accounts
const DEVICE_USER_PREFIX: &str = "esp32_";

/// Topic grants for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceGrant {
    pub username: String,
    /// Topics the device may publish to
    pub write: Vec<String>,
    /// Topics the device may subscribe to
    pub read: Vec<String>,
}

impl DeviceGrant {
    pub fn for_device(device_id: &DeviceId) -> Self {
        let base = format!("devices/{}", device_id);
        Self {
            username: format!("{}{}", DEVICE_USER_PREFIX, device_id),
            write: vec![
                format!("{}/status", base),
                format!("{}/health", base),
                format!("{}/ota/status", base),
            ],
            read: vec![format!("{}/command", base), format!("{}/ota", base)],
        }
    }
}

pub struct HttpPolicyService {
    /// Base URL without trailing slash
    base_url: String,

    /// ⚠️ NEVER log this value
    token: String,

    client: reqwest::Client,

    dry_run: bool,
}

// Custom Debug implementation that hides the token
impl std::fmt::Debug for HttpPolicyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPolicyService")
            .field("base_url", &self.base_url)
            .field("token", &"<REDACTED>")
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl HttpPolicyService {
    /// Create a new policy client
    ///
    /// # Errors
    ///
    /// `Error::Config` if the URL is not http(s) or the token is empty.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, dry_run: bool) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::config(format!(
                "Policy service URL must start with http:// or https://, got {:?}",
                base_url
            )));
        }

        let token = token.into();
        if token.trim().is_empty() {
            return Err(Error::config("Policy service token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            token,
            client,
            dry_run,
        })
    }

    /// Client that only logs (no network access)
    pub fn new_dry_run(base_url: impl Into<String>) -> Result<Self> {
        Self::new(base_url, "dry-run", true)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn device_url(&self, device_id: &DeviceId) -> String {
        format!("{}/devices/{}", self.base_url, device_id)
    }

    fn provision_url(&self, device_id: &DeviceId) -> String {
        format!("{}/provision", self.device_url(device_id))
    }
}

/// Map a non-success status, treating `already` as success
fn check_status(what: &str, status: StatusCode, already: StatusCode, body: String) -> Result<()> {
    if status.is_success() || status == already {
        return Ok(());
    }
    Err(match status.as_u16() {
        401 | 403 => Error::policy(format!(
            "{}: authentication failed (invalid token or insufficient permissions), status {}",
            what, status
        )),
        429 => Error::policy(format!("{}: rate limited, status {}", what, status)),
        500..=599 => Error::policy(format!("{}: server error (transient) {} - {}", what, status, body)),
        _ => Error::policy(format!("{}: unexpected status {} - {}", what, status, body)),
    })
}

#[async_trait]
impl PolicyService for HttpPolicyService {
    async fn provision(&self, device_id: &DeviceId) -> Result<()> {
        let grant = DeviceGrant::for_device(device_id);
        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would provision {} (write {:?}, read {:?})",
                grant.username,
                grant.write,
                grant.read
            );
            return Ok(());
        }

        let response = self
            .client
            .post(self.provision_url(device_id))
            .bearer_auth(&self.token)
            .json(&grant)
            .send()
            .await
            .map_err(|e| Error::policy(format!("provision request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        check_status("provision", status, StatusCode::CONFLICT, body)?;
        tracing::info!("Provisioned broker access for {}", device_id);
        Ok(())
    }

    async fn revoke(&self, device_id: &DeviceId) -> Result<()> {
        if self.dry_run {
            tracing::info!("[DRY-RUN] Would revoke {}{}", DEVICE_USER_PREFIX, device_id);
            return Ok(());
        }

        let response = self
            .client
            .delete(self.device_url(device_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::policy(format!("revoke request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        check_status("revoke", status, StatusCode::NOT_FOUND, body)?;
        tracing::info!("Revoked broker access for {}", device_id);
        Ok(())
    }

    fn service_name(&self) -> &'static str {
        "http"
    }
}
