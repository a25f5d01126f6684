//! Telemetry Routing Contract Tests
//!
//! Verifies that inbound telemetry only ever touches registered, unblocked
//! devices, and that malformed traffic is absorbed without side effects.

mod common;

use common::*;
use fleet_core::FleetEvent;
use fleet_core::model::OtaStatus;
use fleet_core::telemetry::RouteOutcome;
use fleet_core::traits::DeviceStore;

#[tokio::test]
async fn health_report_brings_device_online() {
    let mut fleet = fleet();
    fleet.engine.register_device(&id("AA11"), "lamp", "alice").await.unwrap();

    let outcome = fleet
        .engine
        .route("devices/AA11/health", br#"{"fw":"1.0.4","heap":183000,"temp":41.5}"#)
        .await;

    assert!(matches!(outcome, RouteOutcome::Applied(_)));
    let device = fleet.device("AA11").await;
    assert!(device.online);
    assert!(device.last_seen.is_some());
    assert_eq!(device.firmware_version, "1.0.4");
    assert_eq!(device.last_heap, Some(183000.0));
    assert_eq!(device.last_temp, Some(41.5));

    let events = fleet.drain_events();
    assert!(events.contains(&FleetEvent::DeviceOnline { device_id: id("AA11") }));
}

#[tokio::test]
async fn unknown_device_is_never_created() {
    let fleet = fleet();

    let outcome = fleet.engine.route("devices/ZZ99/health", br#"{"fw":"1.0.0"}"#).await;

    assert_eq!(outcome, RouteOutcome::UnknownDevice(id("ZZ99")));
    assert!(fleet.engine.get_device(&id("ZZ99")).await.unwrap().is_none());
    assert_eq!(fleet.store.inner.device_count().await, 0);
    assert_eq!(fleet.engine.stats().router.unknown_device, 1);
}

#[tokio::test]
async fn blocked_device_state_is_frozen() {
    let fleet = fleet();
    online_device(&fleet, "AA11", "1.0.0").await;
    let blocked = fleet.engine.set_blocked(&id("AA11"), true, Some("root")).await.unwrap();

    let messages: [(&str, &[u8]); 3] = [
        ("devices/AA11/health", br#"{"fw":"9.9.9"}"#),
        ("devices/AA11/status", b"ON"),
        ("devices/AA11/ota/status", b"SUCCESS"),
    ];
    for (topic, payload) in messages {
        let outcome = fleet.engine.route(topic, payload).await;
        assert_eq!(outcome, RouteOutcome::Blocked(id("AA11")));
    }

    let after = fleet.device("AA11").await;
    assert_eq!(after, blocked);
    assert!(!after.online);
    assert_eq!(fleet.engine.stats().router.blocked, 3);
}

#[tokio::test]
async fn status_payload_drives_led_state() {
    let fleet = fleet();
    online_device(&fleet, "AA11", "1.0.0").await;

    fleet.engine.route("devices/AA11/status", b"ON").await;
    assert!(fleet.device("AA11").await.led_state);

    // Surrounding whitespace is tolerated, other text is not a state
    fleet.engine.route("devices/AA11/status", b" OFF\n").await;
    assert!(!fleet.device("AA11").await.led_state);

    fleet.engine.route("devices/AA11/status", b"on").await;
    let device = fleet.device("AA11").await;
    assert!(!device.led_state);
    assert!(device.online);
}

#[tokio::test]
async fn malformed_health_still_counts_as_heartbeat() {
    let fleet = fleet();
    fleet.engine.register_device(&id("AA11"), "lamp", "alice").await.unwrap();

    let outcome = fleet.engine.route("devices/AA11/health", b"{not json").await;

    assert!(matches!(outcome, RouteOutcome::Applied(_)));
    let device = fleet.device("AA11").await;
    assert!(device.online);
    assert_eq!(device.firmware_version, "1.0.0");
    assert_eq!(fleet.engine.stats().router.malformed, 1);
}

#[tokio::test]
async fn unrelated_and_malformed_topics_are_dropped() {
    let fleet = fleet();
    fleet.engine.register_device(&id("AA11"), "lamp", "alice").await.unwrap();

    assert_eq!(fleet.engine.route("devices/AA11/command", b"LED_ON").await, RouteOutcome::Ignored);
    assert_eq!(fleet.engine.route("weather/today", b"rain").await, RouteOutcome::Ignored);
    assert_eq!(
        fleet.engine.route("devices/AA-11/health", b"{}").await,
        RouteOutcome::MalformedTopic
    );

    let device = fleet.device("AA11").await;
    assert!(!device.online);
    assert_eq!(device.revision, 1);
}

#[tokio::test]
async fn unrecognized_ota_literal_is_stored_verbatim() {
    let fleet = fleet();
    online_device(&fleet, "AA11", "1.0.0").await;

    fleet.engine.route("devices/AA11/ota/status", b"DOWNLOADING").await;

    let device = fleet.device("AA11").await;
    assert_eq!(device.ota_status, OtaStatus::Unrecognized("DOWNLOADING".into()));
    assert_eq!(device.firmware_version, "1.0.0");
}

#[tokio::test]
async fn storage_failure_is_absorbed() {
    let fleet = fleet();
    online_device(&fleet, "AA11", "1.0.0").await;
    fleet.store.fail_update_device.store(true, std::sync::atomic::Ordering::SeqCst);

    let outcome = fleet.engine.route("devices/AA11/status", b"ON").await;

    assert_eq!(outcome, RouteOutcome::Failed(id("AA11")));
    assert!(!fleet.store.inner.get_device(&id("AA11")).await.unwrap().unwrap().led_state);
    assert_eq!(fleet.engine.stats().router.failed, 1);
}
