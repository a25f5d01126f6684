//! Core fleet engine
//!
//! The FleetEngine wires every component over shared collaborators and is
//! the single entry point for the process around it:
//! - Inbound telemetry via [`FleetEngine::route`] or the run loop
//! - Commands: registration, blocking, LED, firmware updates
//! - Read-only queries for the HTTP layer
//! - Lifecycle: sweep scheduler, policy queue, store flush
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ TelemetrySource │─── InboundMessage ───┐
//! └─────────────────┘                      │
//!                                          ▼
//!                                 ┌─────────────────┐        ┌───────────┐
//!   commands / queries ─────────▶ │   FleetEngine   │ ─────▶ │  Events   │
//!                                 └─────────────────┘        └───────────┘
//!                                          │
//!        ┌───────────────┬─────────────────┼──────────────┬──────────────┐
//!        ▼               ▼                 ▼              ▼              ▼
//!  TelemetryRouter  OtaOrchestrator   DeviceAdmin   SweepScheduler  PolicyNotifier
//!        │               │                 │              │
//!        ▼               ▼                 ▼              ▼
//!  DeviceStateMachine ───┴──── DeviceStore / OtaStore ─── OfflineWatchdog
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tracing::{error, info};

use crate::activity::ActivityRecorder;
use crate::admin::DeviceAdmin;
use crate::config::FleetConfig;
use crate::error::{Error, Result};
use crate::events::{EventSink, FleetEvent};
use crate::machine::{DeviceStateMachine, Transition};
use crate::model::{ActivityEntry, Device, DeviceId, OtaRecord, OtaStatus};
use crate::ota::{CachedArtifactStore, OtaOrchestrator, UpdateCheck, UpdateStarted};
use crate::policy::{PolicyNotifier, PolicyStats};
use crate::scheduler::{SchedulerStats, SweepScheduler};
use crate::telemetry::{RouteOutcome, RouterStatsSnapshot, TelemetryRouter};
use crate::traits::{
    ActivityLog, ArtifactStore, DeviceStore, InboundMessage, OtaStore, PolicyService, TelemetrySource,
    Transport,
};
use crate::watchdog::{OfflineWatchdog, SweepReport};

/// Largest page the admin listing returns
pub const MAX_PAGE_SIZE: usize = 100;

/// External capabilities the engine is built over
#[derive(Clone)]
pub struct Collaborators {
    pub devices: Arc<dyn DeviceStore>,
    pub ota_records: Arc<dyn OtaStore>,
    pub activity: Arc<dyn ActivityLog>,
    pub transport: Arc<dyn Transport>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub policy: Arc<dyn PolicyService>,
}

impl Collaborators {
    /// Use one store for devices, OTA history and the audit trail
    pub fn with_store<S>(
        store: Arc<S>,
        transport: Arc<dyn Transport>,
        artifacts: Arc<dyn ArtifactStore>,
        policy: Arc<dyn PolicyService>,
    ) -> Self
    where
        S: DeviceStore + OtaStore + ActivityLog + 'static,
    {
        Self {
            devices: store.clone(),
            ota_records: store.clone(),
            activity: store,
            transport,
            artifacts,
            policy,
        }
    }
}

/// One page of the admin device listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePage {
    pub devices: Vec<Device>,
    pub total: usize,
    /// 1-based
    pub page: usize,
    pub limit: usize,
}

/// Summary row for an owner's dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardRow {
    pub device_id: DeviceId,
    pub name: String,
    pub online: bool,
    pub firmware_version: String,
    pub ota_status: OtaStatus,
    pub last_seen: Option<chrono::DateTime<chrono::Utc>>,
    pub blocked: bool,
}

impl From<&Device> for DashboardRow {
    fn from(device: &Device) -> Self {
        Self {
            device_id: device.device_id.clone(),
            name: device.name.clone(),
            online: device.online,
            firmware_version: device.firmware_version.clone(),
            ota_status: device.ota_status.clone(),
            last_seen: device.last_seen,
            blocked: device.blocked,
        }
    }
}

/// Operational counters across components
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FleetStats {
    pub router: RouterStatsSnapshot,
    pub scheduler: SchedulerStats,
    pub policy: PolicyStats,
    pub activity_failures: u64,
}

/// Core fleet engine
///
/// ## Lifecycle
///
/// 1. Create with [`FleetEngine::new()`] inside a tokio runtime
/// 2. Feed telemetry with [`FleetEngine::run()`] or [`FleetEngine::route()`]
/// 3. On shutdown the engine stops the scheduler (letting a running sweep
///    finish), drains the policy queue and flushes the stores
pub struct FleetEngine {
    devices: Arc<dyn DeviceStore>,
    ota_records: Arc<dyn OtaStore>,
    activity_log: Arc<dyn ActivityLog>,
    recorder: ActivityRecorder,
    router: TelemetryRouter,
    orchestrator: OtaOrchestrator,
    admin: DeviceAdmin,
    watchdog: Arc<OfflineWatchdog>,
    scheduler: SweepScheduler,
    policy: Arc<PolicyNotifier>,
    events: EventSink,
}

impl FleetEngine {
    /// Create a new fleet engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields fleet events
    pub fn new(
        collaborators: Collaborators,
        config: FleetConfig,
    ) -> Result<(Self, mpsc::Receiver<FleetEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);
        let events = EventSink::new(tx);
        let retries = config.engine.max_conflict_retries;

        let Collaborators {
            devices,
            ota_records,
            activity,
            transport,
            artifacts,
            policy,
        } = collaborators;

        let recorder = ActivityRecorder::new(activity.clone());
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(CachedArtifactStore::new(
            artifacts,
            config.ota.artifact_timeout(),
            config.ota.cache_ttl(),
        ));
        let policy = Arc::new(PolicyNotifier::spawn(policy, &config.policy));

        let machine = Arc::new(DeviceStateMachine::new(
            devices.clone(),
            ota_records.clone(),
            recorder.clone(),
            retries,
        ));
        let router = TelemetryRouter::new(machine);

        let orchestrator = OtaOrchestrator::new(
            devices.clone(),
            ota_records.clone(),
            artifacts,
            transport.clone(),
            recorder.clone(),
            config.ota.enforce_blocked_versions,
            retries,
        );

        let admin = DeviceAdmin::new(
            devices.clone(),
            transport,
            policy.clone(),
            recorder.clone(),
            config.engine.default_firmware_version.clone(),
            retries,
        );

        let watchdog = Arc::new(OfflineWatchdog::new(
            devices.clone(),
            recorder.clone(),
            config.watchdog.offline_threshold(),
        ));
        let scheduler = SweepScheduler::new(watchdog.clone(), config.watchdog.sweep_interval(), events.clone());

        let engine = Self {
            devices,
            ota_records,
            activity_log: activity,
            recorder,
            router,
            orchestrator,
            admin,
            watchdog,
            scheduler,
            policy,
            events,
        };

        Ok((engine, rx))
    }

    // ── Telemetry ────────────────────────────────────────────────────────

    /// Route one inbound message; never fails
    pub async fn route(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        let outcome = self.router.route(topic, payload).await;
        if let RouteOutcome::Applied(transition) = &outcome {
            self.emit_transition(transition);
        }
        outcome
    }

    pub async fn handle_message(&self, message: InboundMessage) -> RouteOutcome {
        self.route(&message.topic, &message.payload).await
    }

    fn emit_transition(&self, transition: &Transition) {
        let device_id = &transition.device.device_id;

        if transition.came_online {
            self.events.emit(FleetEvent::DeviceOnline {
                device_id: device_id.clone(),
            });
        }

        let Some(ota) = &transition.ota else {
            return;
        };
        let event = match (&ota.status, &ota.committed_version) {
            (OtaStatus::Success, Some(version)) => FleetEvent::OtaCompleted {
                device_id: device_id.clone(),
                ota_id: ota.ota_id,
                version: version.clone(),
            },
            (OtaStatus::Success, None) => FleetEvent::OtaCompleted {
                device_id: device_id.clone(),
                ota_id: ota.ota_id,
                version: transition.device.firmware_version.clone(),
            },
            (OtaStatus::Failed, _) => FleetEvent::OtaFailed {
                device_id: device_id.clone(),
                ota_id: ota.ota_id,
            },
            (status, _) => FleetEvent::OtaProgress {
                device_id: device_id.clone(),
                status: status.clone(),
            },
        };
        self.events.emit(event);
    }

    // ── Firmware updates ─────────────────────────────────────────────────

    pub async fn check_update(&self, device_id: &DeviceId) -> Result<UpdateCheck> {
        let device = self.require_device(device_id).await?;
        self.orchestrator.check_update(&device).await
    }

    pub async fn start_update(&self, device_id: &DeviceId, triggered_by: Option<&str>) -> Result<UpdateStarted> {
        let started = self.orchestrator.start_update(device_id, triggered_by).await?;
        self.events.emit(FleetEvent::OtaStarted {
            device_id: device_id.clone(),
            ota_id: started.ota_id,
            target_version: started.target_version.clone(),
        });
        Ok(started)
    }

    // ── Administration ───────────────────────────────────────────────────

    pub async fn register_device(&self, device_id: &DeviceId, name: &str, owner: &str) -> Result<Device> {
        self.admin.register_device(device_id, name, owner).await
    }

    pub async fn set_blocked(&self, device_id: &DeviceId, blocked: bool, actor: Option<&str>) -> Result<Device> {
        self.admin.set_blocked(device_id, blocked, actor).await
    }

    pub async fn toggle_block(&self, device_id: &DeviceId, actor: Option<&str>) -> Result<Device> {
        self.admin.toggle_block(device_id, actor).await
    }

    pub async fn send_led_command(&self, device_id: &DeviceId, on: bool, actor: Option<&str>) -> Result<()> {
        self.admin.send_led_command(device_id, on, actor).await
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub async fn get_device(&self, device_id: &DeviceId) -> Result<Option<Device>> {
        self.devices.get_device(device_id).await
    }

    pub async fn list_devices_by_owner(&self, owner: &str) -> Result<Vec<Device>> {
        self.devices.list_devices_by_owner(owner).await
    }

    /// Admin listing, newest registration first
    ///
    /// `page` is 1-based; `page` 0 is treated as 1 and `limit` is clamped
    /// to `1..=MAX_PAGE_SIZE`.
    pub async fn list_devices(&self, page: usize, limit: usize) -> Result<DevicePage> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let mut all = self.devices.list_devices().await?;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = all.len();
        let devices = all
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        Ok(DevicePage {
            devices,
            total,
            page,
            limit,
        })
    }

    /// OTA attempts for a device, newest first
    pub async fn ota_history(&self, device_id: &DeviceId) -> Result<Vec<OtaRecord>> {
        self.ota_records.history(device_id).await
    }

    /// Audit entries for a device, oldest first
    pub async fn activity(&self, device_id: &DeviceId) -> Result<Vec<ActivityEntry>> {
        self.activity_log.entries_for(device_id).await
    }

    /// Summary of an owner's devices, newest registration first
    pub async fn dashboard(&self, owner: &str) -> Result<Vec<DashboardRow>> {
        let mut devices = self.devices.list_devices_by_owner(owner).await?;
        devices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(devices.iter().map(DashboardRow::from).collect())
    }

    pub fn stats(&self) -> FleetStats {
        FleetStats {
            router: self.router.stats(),
            scheduler: self.scheduler.stats(),
            policy: self.policy.stats(),
            activity_failures: self.recorder.failures(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Run one offline sweep now, outside the timer
    pub async fn sweep_now(&self) -> Result<SweepReport> {
        let report = self.watchdog.sweep().await?;
        if report.marked_offline > 0 {
            self.events.emit(FleetEvent::DevicesOffline {
                device_ids: report.demoted.clone(),
            });
        }
        self.events.emit(FleetEvent::SweepCompleted {
            checked: report.checked,
            marked_offline: report.marked_offline,
        });
        Ok(report)
    }

    /// Run until SIGINT
    pub async fn run(&self, source: &dyn TelemetrySource) -> Result<()> {
        self.run_internal(source, None).await
    }

    /// Run until `shutdown_rx` fires (or SIGINT when `None`)
    pub async fn run_with_shutdown(
        &self,
        source: &dyn TelemetrySource,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(source, shutdown_rx).await
    }

    async fn run_internal(
        &self,
        source: &dyn TelemetrySource,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.events.emit(FleetEvent::Started);
        self.scheduler.start();

        let mut messages = source.messages();
        let shutdown = async {
            match shutdown_rx {
                Some(rx) => {
                    // A dropped sender counts as a shutdown request
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for CTRL-C: {}", e);
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(message) = messages.next() => {
                    self.handle_message(message).await;
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown("Shutdown signal").await
    }

    /// Stop background work and flush the stores
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self, reason: &str) -> Result<()> {
        self.scheduler.stop().await;
        self.policy.shutdown().await;

        let flushed = self.devices.flush().await;
        self.events.emit(FleetEvent::Stopped {
            reason: reason.to_string(),
        });

        match flushed {
            Ok(()) => {
                info!("State flushed, engine stopped");
                Ok(())
            }
            Err(e) => {
                error!("Failed to flush state on shutdown: {}", e);
                Err(e)
            }
        }
    }

    async fn require_device(&self, device_id: &DeviceId) -> Result<Device> {
        self.devices
            .get_device(device_id)
            .await?
            .ok_or_else(|| Error::device_not_found(device_id.as_str()))
    }
}
