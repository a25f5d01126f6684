// # Telemetry Router
//
// Demultiplexes inbound broker messages by topic and hands them to the
// device state machine.
//
// `route` never returns an error. Unrelated topics, unknown devices,
// blocked devices and malformed payloads are dropped (and counted); a
// storage failure is logged. One bad message must not stall the others.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

use super::payload::{HealthReport, decode_led, decode_ota_status};
use super::topic::{TelemetryCategory, parse_topic};
use crate::Error;
use crate::machine::{ApplyOutcome, DeviceStateMachine, TelemetryEvent, Transition};
use crate::model::DeviceId;

/// Result of routing one message
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Not device telemetry
    Ignored,
    /// Telemetry-shaped topic with an unusable device segment
    MalformedTopic,
    UnknownDevice(DeviceId),
    Blocked(DeviceId),
    Applied(Transition),
    /// The state write failed
    Failed(DeviceId),
}

/// Counters for operational visibility
#[derive(Debug, Default)]
pub struct RouterStats {
    applied: AtomicU64,
    unknown_device: AtomicU64,
    blocked: AtomicU64,
    malformed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub applied: u64,
    pub unknown_device: u64,
    pub blocked: u64,
    /// Bad topics plus bad health payloads
    pub malformed: u64,
    pub failed: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            unknown_device: self.unknown_device.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct TelemetryRouter {
    machine: Arc<DeviceStateMachine>,
    stats: RouterStats,
}

impl TelemetryRouter {
    pub fn new(machine: Arc<DeviceStateMachine>) -> Self {
        Self {
            machine,
            stats: RouterStats::default(),
        }
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Route one inbound message
    pub async fn route(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        let parsed = match parse_topic(topic) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => {
                debug!("Ignoring message on unrelated topic {}", topic);
                return RouteOutcome::Ignored;
            }
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("{}", e);
                return RouteOutcome::MalformedTopic;
            }
        };

        let event = self.decode(topic, parsed.category, payload);
        let device_id = parsed.device_id;

        match self.machine.apply(&device_id, &event).await {
            Ok(ApplyOutcome::Applied(transition)) => {
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
                RouteOutcome::Applied(transition)
            }
            Ok(ApplyOutcome::UnknownDevice) => {
                self.stats.unknown_device.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping {} telemetry from unknown device {}", parsed.category.as_str(), device_id);
                RouteOutcome::UnknownDevice(device_id)
            }
            Ok(ApplyOutcome::Blocked) => {
                self.stats.blocked.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping {} telemetry from blocked device {}", parsed.category.as_str(), device_id);
                RouteOutcome::Blocked(device_id)
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!("Failed to apply {} telemetry for {}: {}", parsed.category.as_str(), device_id, e);
                RouteOutcome::Failed(device_id)
            }
        }
    }

    fn decode(&self, topic: &str, category: TelemetryCategory, payload: &[u8]) -> TelemetryEvent {
        match category {
            TelemetryCategory::Health => match HealthReport::decode(payload) {
                Ok(report) => TelemetryEvent::Health(report),
                Err(reason) => {
                    // Liveness is still recorded; only the fields are dropped
                    self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                    warn!("{}", Error::malformed(topic, reason));
                    TelemetryEvent::Health(HealthReport::default())
                }
            },
            TelemetryCategory::Status => TelemetryEvent::Status {
                led: decode_led(payload),
            },
            TelemetryCategory::OtaStatus => TelemetryEvent::OtaStatus(decode_ota_status(payload)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityRecorder;
    use crate::model::Device;
    use crate::state::MemoryStore;
    use crate::traits::DeviceStore;

    async fn router() -> (TelemetryRouter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let machine = DeviceStateMachine::new(
            store.clone(),
            store.clone(),
            ActivityRecorder::new(store.clone()),
            3,
        );
        (TelemetryRouter::new(Arc::new(machine)), store)
    }

    async fn register(store: &MemoryStore, raw: &str) -> DeviceId {
        let id = DeviceId::parse(raw).unwrap();
        store
            .insert_device(&Device::new(id.clone(), "lamp", "alice", "1.0.0"))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn lowercase_topic_reaches_uppercase_device() {
        let (router, store) = router().await;
        let id = register(&store, "AA11").await;

        let outcome = router.route("devices/aa11/status", b"ON").await;

        assert!(matches!(outcome, RouteOutcome::Applied(_)));
        let device = store.get_device(&id).await.unwrap().unwrap();
        assert!(device.online);
        assert!(device.led_state);
    }

    #[tokio::test]
    async fn malformed_health_still_marks_liveness() {
        let (router, store) = router().await;
        let id = register(&store, "AA11").await;

        let outcome = router.route("devices/AA11/health", b"{not json").await;

        assert!(matches!(outcome, RouteOutcome::Applied(_)));
        let device = store.get_device(&id).await.unwrap().unwrap();
        assert!(device.online);
        assert_eq!(device.firmware_version, "1.0.0");
        assert_eq!(router.stats().malformed, 1);
    }

    #[tokio::test]
    async fn unknown_device_is_counted() {
        let (router, store) = router().await;

        let outcome = router.route("devices/BEEF/health", br#"{"fw":"2.0.0"}"#).await;

        assert_eq!(outcome, RouteOutcome::UnknownDevice(DeviceId::parse("BEEF").unwrap()));
        assert_eq!(router.stats().unknown_device, 1);
        assert_eq!(store.device_count().await, 0);
    }

    #[tokio::test]
    async fn unrelated_and_malformed_topics_are_dropped() {
        let (router, _store) = router().await;

        assert_eq!(router.route("devices/AA11", b"x").await, RouteOutcome::Ignored);
        assert_eq!(router.route("devices/AA11/command", b"LED_ON").await, RouteOutcome::Ignored);
        assert_eq!(router.route("devices/A-1/status", b"ON").await, RouteOutcome::MalformedTopic);
        assert_eq!(router.stats().malformed, 1);
    }
}
