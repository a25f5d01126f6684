//! Minimal embedding example for fleet-core
//!
//! Runs the engine in-process over the bundled `MemoryStore` and toy
//! collaborators: a channel stands in for the broker, a fixed version for
//! the firmware store. The application drives the whole lifecycle.

use fleet_core::model::DeviceId;
use fleet_core::traits::{ArtifactStore, InboundMessage, PolicyService, TelemetrySource, Transport};
use fleet_core::{Collaborators, FleetConfig, FleetEngine, MemoryStore, Result};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Telemetry fed by the application through a channel
struct ChannelSource {
    rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
}

impl ChannelSource {
    fn new() -> (Self, mpsc::UnboundedSender<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx: Mutex::new(Some(rx)) }, tx)
    }
}

impl TelemetrySource for ChannelSource {
    fn messages(&self) -> Pin<Box<dyn Stream<Item = InboundMessage> + Send + 'static>> {
        match self.rx.lock().ok().and_then(|mut rx| rx.take()) {
            Some(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
            None => Box::pin(tokio_stream::empty()),
        }
    }
}

/// Prints commands instead of sending them
struct PrintingTransport;

#[async_trait::async_trait]
impl Transport for PrintingTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        println!("[Publish] {} <- {}", topic, String::from_utf8_lossy(payload));
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "printing"
    }
}

/// Fixed production firmware
struct StaticArtifacts {
    version: String,
}

#[async_trait::async_trait]
impl ArtifactStore for StaticArtifacts {
    async fn production_version(&self) -> Result<String> {
        Ok(self.version.clone())
    }

    async fn signed_firmware_url(&self) -> Result<String> {
        Ok(format!("https://firmware.local/esp32/{}.bin", self.version))
    }

    async fn blocked_versions(&self) -> Result<HashSet<String>> {
        Ok(HashSet::new())
    }

    fn store_name(&self) -> &'static str {
        "static"
    }
}

/// Accepts every policy change
struct OpenPolicy;

#[async_trait::async_trait]
impl PolicyService for OpenPolicy {
    async fn provision(&self, device_id: &DeviceId) -> Result<()> {
        println!("[Policy] provision {}", device_id);
        Ok(())
    }

    async fn revoke(&self, device_id: &DeviceId) -> Result<()> {
        println!("[Policy] revoke {}", device_id);
        Ok(())
    }

    fn service_name(&self) -> &'static str {
        "open"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::WARN).init();
    println!("=== Embedded fleet-core Example ===\n");

    let collaborators = Collaborators::with_store(
        Arc::new(MemoryStore::new()),
        Arc::new(PrintingTransport),
        Arc::new(StaticArtifacts {
            version: "1.1.0".to_string(),
        }),
        Arc::new(OpenPolicy),
    );

    println!("1. Creating engine...");
    let (engine, mut event_rx) = FleetEngine::new(collaborators, FleetConfig::default())?;
    let engine = Arc::new(engine);

    let event_listener = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("[Event] {:?}", event);
        }
    });

    println!("2. Starting engine in background...");
    let (source, telemetry) = ChannelSource::new();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let runner = engine.clone();
    let engine_handle =
        tokio::spawn(async move { runner.run_with_shutdown(&source, Some(shutdown_rx)).await });

    println!("3. Registering a device and letting it report in...");
    let device_id = DeviceId::parse("0C5D32DD2568")?;
    engine.register_device(&device_id, "porch light", "alice").await?;

    let topic = |suffix: &str| format!("devices/{}/{}", device_id, suffix);
    let _ = telemetry.send(InboundMessage::new(topic("health"), br#"{"fw":"1.0.0"}"#.to_vec()));
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    println!("4. Rolling out firmware...");
    let check = engine.check_update(&device_id).await?;
    println!("   update available: {} ({})", check.update_available, check.latest_version);
    if check.update_available {
        let started = engine.start_update(&device_id, Some("alice")).await?;
        println!("   update {} started", started.ota_id);
        let _ = telemetry.send(InboundMessage::new(topic("ota/status"), b"SUCCESS".to_vec()));
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    if let Some(device) = engine.get_device(&device_id).await? {
        println!("   now running {} ({:?})", device.firmware_version, device.ota_status);
    }

    println!("\n5. Stopping engine...");
    let _ = shutdown_tx.send(());
    match engine_handle.await {
        Ok(result) => result?,
        Err(e) => eprintln!("Engine task failed: {}", e),
    }

    // The listener ends once the engine (and its event sender) is dropped
    drop(engine);
    let _ = tokio::time::timeout(tokio::time::Duration::from_millis(100), event_listener).await;

    println!("\n=== Embedding Successful ===");
    Ok(())
}
