//! Test doubles and common utilities for contract tests
//!
//! The doubles record what the engine asks of its collaborators and can be
//! told to fail, so tests can check both behavior and failure atomicity.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_core::error::{Error, Result};
use fleet_core::model::{ActivityEntry, Device, DeviceId, OtaRecord, OtaRecordId, OtaStatus};
use fleet_core::state::MemoryStore;
use fleet_core::traits::{
    ActivityLog, ArtifactStore, DeviceStore, InboundMessage, LivenessSnapshot, OtaStore, PolicyService,
    TelemetrySource, Transport,
};
use fleet_core::{Collaborators, FleetConfig, FleetEngine, FleetEvent};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::Stream;

// ── Telemetry sources ───────────────────────────────────────────────────

/// A telemetry source the test feeds by hand
pub struct ControlledTelemetrySource {
    engine_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
}

impl ControlledTelemetrySource {
    pub fn new() -> (Self, mpsc::UnboundedSender<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                engine_rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl TelemetrySource for ControlledTelemetrySource {
    fn messages(&self) -> Pin<Box<dyn Stream<Item = InboundMessage> + Send + 'static>> {
        let rx = self
            .engine_rx
            .lock()
            .unwrap()
            .take()
            .expect("messages() can only be called once");
        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }
}

/// A telemetry source that never yields
pub struct IdleTelemetrySource;

impl TelemetrySource for IdleTelemetrySource {
    fn messages(&self) -> Pin<Box<dyn Stream<Item = InboundMessage> + Send + 'static>> {
        Box::pin(tokio_stream::pending())
    }
}

// ── Transport ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingTransport {
    published: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

impl RecordingTransport {
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::transport("broker connection lost"));
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), String::from_utf8_lossy(payload).into_owned()));
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "recording"
    }
}

// ── Artifact store ──────────────────────────────────────────────────────

pub struct ScriptedArtifactStore {
    pub version: Mutex<String>,
    pub blocked: Mutex<HashSet<String>>,
    pub fail: AtomicBool,
    pub hang: AtomicBool,
    pub url_calls: AtomicUsize,
}

impl ScriptedArtifactStore {
    pub fn new(version: &str) -> Self {
        Self {
            version: Mutex::new(version.to_string()),
            blocked: Mutex::new(HashSet::new()),
            fail: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            url_calls: AtomicUsize::new(0),
        }
    }

    async fn gate(&self) -> Result<()> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::artifact_store("503 from object store"));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for ScriptedArtifactStore {
    async fn production_version(&self) -> Result<String> {
        self.gate().await?;
        Ok(self.version.lock().unwrap().clone())
    }

    async fn signed_firmware_url(&self) -> Result<String> {
        self.gate().await?;
        let n = self.url_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://firmware.example/esp32.bin?X-Signature={n}"))
    }

    async fn blocked_versions(&self) -> Result<HashSet<String>> {
        self.gate().await?;
        Ok(self.blocked.lock().unwrap().clone())
    }

    fn store_name(&self) -> &'static str {
        "scripted"
    }
}

// ── Policy service ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingPolicyService {
    calls: Mutex<Vec<String>>,
}

impl RecordingPolicyService {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PolicyService for RecordingPolicyService {
    async fn provision(&self, device_id: &DeviceId) -> Result<()> {
        self.calls.lock().unwrap().push(format!("provision {device_id}"));
        Ok(())
    }

    async fn revoke(&self, device_id: &DeviceId) -> Result<()> {
        self.calls.lock().unwrap().push(format!("revoke {device_id}"));
        Ok(())
    }

    fn service_name(&self) -> &'static str {
        "recording"
    }
}

// ── Store with fault injection ──────────────────────────────────────────

/// MemoryStore wrapper with switchable failures and latency
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub fail_create_record: AtomicBool,
    pub fail_update_device: AtomicBool,
    pub fail_activity: AtomicBool,
    /// Added to every `list_online` call
    pub list_online_delay: Mutex<Duration>,
    pub flush_count: AtomicUsize,
    pub list_online_calls: AtomicUsize,
}

impl FaultyStore {
    pub fn flush_count(&self) -> usize {
        self.flush_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceStore for FaultyStore {
    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<Device>> {
        self.inner.get_device(device_id).await
    }

    async fn insert_device(&self, device: &Device) -> Result<Device> {
        self.inner.insert_device(device).await
    }

    async fn update_device(&self, device: &Device) -> Result<Device> {
        if self.fail_update_device.load(Ordering::SeqCst) {
            return Err(Error::storage("database unavailable"));
        }
        self.inner.update_device(device).await
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        self.inner.list_devices().await
    }

    async fn list_devices_by_owner(&self, owner: &str) -> Result<Vec<Device>> {
        self.inner.list_devices_by_owner(owner).await
    }

    async fn list_online(&self) -> Result<Vec<LivenessSnapshot>> {
        self.list_online_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_online_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.inner.list_online().await
    }

    async fn mark_offline(
        &self,
        device_ids: &[DeviceId],
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeviceId>> {
        self.inner.mark_offline(device_ids, cutoff, now).await
    }

    async fn flush(&self) -> Result<()> {
        self.flush_count.fetch_add(1, Ordering::SeqCst);
        self.inner.flush().await
    }
}

#[async_trait]
impl OtaStore for FaultyStore {
    async fn create_record(&self, record: &OtaRecord) -> Result<()> {
        if self.fail_create_record.load(Ordering::SeqCst) {
            return Err(Error::storage("ota table locked"));
        }
        self.inner.create_record(record).await
    }

    async fn get_record(&self, id: &OtaRecordId) -> Result<Option<OtaRecord>> {
        self.inner.get_record(id).await
    }

    async fn update_record_status(
        &self,
        id: &OtaRecordId,
        status: OtaStatus,
        reason: Option<String>,
    ) -> Result<Option<OtaRecord>> {
        self.inner.update_record_status(id, status, reason).await
    }

    async fn history(&self, device_id: &DeviceId) -> Result<Vec<OtaRecord>> {
        self.inner.history(device_id).await
    }
}

#[async_trait]
impl ActivityLog for FaultyStore {
    async fn append(&self, entry: &ActivityEntry) -> Result<()> {
        if self.fail_activity.load(Ordering::SeqCst) {
            return Err(Error::storage("audit table full"));
        }
        self.inner.append(entry).await
    }

    async fn entries_for(&self, device_id: &DeviceId) -> Result<Vec<ActivityEntry>> {
        self.inner.entries_for(device_id).await
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

pub struct Fleet {
    pub engine: Arc<FleetEngine>,
    pub events: mpsc::Receiver<FleetEvent>,
    pub store: Arc<FaultyStore>,
    pub transport: Arc<RecordingTransport>,
    pub artifacts: Arc<ScriptedArtifactStore>,
    pub policy: Arc<RecordingPolicyService>,
}

impl Fleet {
    /// Drain every event emitted so far
    pub fn drain_events(&mut self) -> Vec<FleetEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn device(&self, raw: &str) -> Device {
        self.engine
            .get_device(&id(raw))
            .await
            .unwrap()
            .expect("device exists")
    }
}

/// Engine over in-memory doubles, production version "1.1.0"
pub fn fleet() -> Fleet {
    fleet_with_config(test_config())
}

pub fn fleet_with_config(config: FleetConfig) -> Fleet {
    let store = Arc::new(FaultyStore::default());
    let transport = Arc::new(RecordingTransport::default());
    let artifacts = Arc::new(ScriptedArtifactStore::new("1.1.0"));
    let policy = Arc::new(RecordingPolicyService::default());

    let collaborators = Collaborators::with_store(
        store.clone(),
        transport.clone(),
        artifacts.clone(),
        policy.clone(),
    );
    let (engine, events) = FleetEngine::new(collaborators, config).expect("engine construction succeeds");

    Fleet {
        engine: Arc::new(engine),
        events,
        store,
        transport,
        artifacts,
        policy,
    }
}

/// Defaults with caching off so tests see artifact changes immediately
pub fn test_config() -> FleetConfig {
    let mut config = FleetConfig::default();
    config.ota.cache_ttl_secs = 0;
    config.policy.retry_delay_secs = 0;
    config
}

pub fn id(raw: &str) -> DeviceId {
    DeviceId::parse(raw).unwrap()
}

/// Register a device and bring it online with a health report
pub async fn online_device(fleet: &Fleet, raw: &str, fw: &str) -> Device {
    fleet
        .engine
        .register_device(&id(raw), "test device", "alice")
        .await
        .unwrap();
    let payload = format!(r#"{{"fw":"{fw}"}}"#);
    fleet
        .engine
        .route(&format!("devices/{raw}/health"), payload.as_bytes())
        .await;
    fleet.device(raw).await
}
