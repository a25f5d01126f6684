//! Offline Watchdog Contract Tests
//!
//! Verifies the offline threshold boundary and that a sweep never demotes a
//! device that reported in after the sweep took its snapshot.

mod common;

use chrono::{Duration, Utc};
use common::*;
use fleet_core::FleetEvent;
use fleet_core::model::ActivityAction;
use fleet_core::traits::DeviceStore;

/// Pretend the device was last heard from `secs` seconds ago
async fn age(fleet: &Fleet, raw: &str, secs: i64) {
    let mut device = fleet.device(raw).await;
    device.last_seen = Some(Utc::now() - Duration::seconds(secs));
    fleet.store.inner.update_device(&device).await.unwrap();
}

#[tokio::test]
async fn only_devices_past_threshold_are_demoted() {
    let mut fleet = fleet();
    online_device(&fleet, "AA01", "1.0.0").await;
    online_device(&fleet, "AA02", "1.0.0").await;
    age(&fleet, "AA01", 61).await;
    age(&fleet, "AA02", 59).await;
    fleet.drain_events();

    let report = fleet.engine.sweep_now().await.unwrap();

    assert_eq!(report.checked, 2);
    assert_eq!(report.marked_offline, 1);
    assert_eq!(report.demoted, vec![id("AA01")]);

    let demoted = fleet.device("AA01").await;
    assert!(!demoted.online);
    assert!(demoted.offline_at.is_some());
    assert!(fleet.device("AA02").await.online);

    let audit = fleet.engine.activity(&id("AA01")).await.unwrap();
    assert_eq!(audit.last().map(|e| e.action.clone()), Some(ActivityAction::DeviceOffline));

    let events = fleet.drain_events();
    assert!(events.contains(&FleetEvent::DevicesOffline {
        device_ids: vec![id("AA01")],
    }));
    assert!(events.contains(&FleetEvent::SweepCompleted {
        checked: 2,
        marked_offline: 1,
    }));
}

#[tokio::test]
async fn offline_and_never_seen_devices_are_not_touched() {
    let fleet = fleet();
    fleet.engine.register_device(&id("AA01"), "never seen", "alice").await.unwrap();
    online_device(&fleet, "AA02", "1.0.0").await;
    age(&fleet, "AA02", 3600).await;
    fleet.engine.sweep_now().await.unwrap();
    let offline = fleet.device("AA02").await;

    let report = fleet.engine.sweep_now().await.unwrap();

    assert_eq!(report.checked, 0);
    assert_eq!(report.marked_offline, 0);
    assert_eq!(fleet.device("AA02").await, offline);
    assert_eq!(fleet.device("AA01").await.revision, 1);
}

#[tokio::test]
async fn sweep_over_empty_fleet_is_a_no_op() {
    let fleet = fleet();

    let report = fleet.engine.sweep_now().await.unwrap();

    assert_eq!(report.checked, 0);
    assert!(report.demoted.is_empty());
}

#[tokio::test]
async fn heartbeat_after_snapshot_wins() {
    let fleet = fleet();
    online_device(&fleet, "AA01", "1.0.0").await;
    age(&fleet, "AA01", 120).await;

    // The sweep's view of the world, taken before the device reports in
    let snapshot = fleet.store.list_online().await.unwrap();
    let now = Utc::now();
    let cutoff = now - Duration::seconds(60);
    assert!(snapshot[0].last_seen <= cutoff);

    fleet.engine.route("devices/AA01/health", b"{}").await;

    let demoted = fleet
        .store
        .mark_offline(&[id("AA01")], cutoff, now)
        .await
        .unwrap();

    assert!(demoted.is_empty());
    assert!(fleet.device("AA01").await.online);
}

#[tokio::test]
async fn demoted_device_comes_back_on_next_report() {
    let mut fleet = fleet();
    online_device(&fleet, "AA01", "1.0.0").await;
    age(&fleet, "AA01", 61).await;
    fleet.engine.sweep_now().await.unwrap();
    fleet.drain_events();

    fleet.engine.route("devices/AA01/status", b"ON").await;

    let device = fleet.device("AA01").await;
    assert!(device.online);
    assert!(device.led_state);
    assert!(fleet.drain_events().contains(&FleetEvent::DeviceOnline { device_id: id("AA01") }));
}
