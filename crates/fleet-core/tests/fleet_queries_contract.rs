//! Fleet Query Contract Tests
//!
//! Read-only views used by the HTTP layer: paging, per-owner dashboards and
//! the audit trail.

mod common;

use common::*;
use fleet_core::engine::MAX_PAGE_SIZE;
use fleet_core::model::{ActivityAction, OtaStatus};
use std::time::Duration;

async fn register_spaced(fleet: &Fleet, devices: &[(&str, &str)]) {
    for (raw, owner) in devices {
        fleet.engine.register_device(&id(raw), "lamp", owner).await.unwrap();
        // Distinct registration timestamps
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn admin_listing_pages_newest_first() {
    let fleet = fleet();
    register_spaced(&fleet, &[("AA01", "alice"), ("AA02", "bob"), ("AA03", "alice")]).await;

    let first = fleet.engine.list_devices(1, 2).await.unwrap();
    assert_eq!(first.total, 3);
    assert_eq!(first.page, 1);
    let ids: Vec<&str> = first.devices.iter().map(|d| d.device_id.as_str()).collect();
    assert_eq!(ids, vec!["AA03", "AA02"]);

    let second = fleet.engine.list_devices(2, 2).await.unwrap();
    let ids: Vec<&str> = second.devices.iter().map(|d| d.device_id.as_str()).collect();
    assert_eq!(ids, vec!["AA01"]);

    let past_end = fleet.engine.list_devices(5, 2).await.unwrap();
    assert!(past_end.devices.is_empty());
    assert_eq!(past_end.total, 3);
}

#[tokio::test]
async fn admin_listing_clamps_arguments() {
    let fleet = fleet();
    register_spaced(&fleet, &[("AA01", "alice")]).await;

    let page = fleet.engine.list_devices(0, 0).await.unwrap();
    assert_eq!(page.page, 1);
    assert_eq!(page.limit, 1);
    assert_eq!(page.devices.len(), 1);

    let page = fleet.engine.list_devices(1, 10_000).await.unwrap();
    assert_eq!(page.limit, MAX_PAGE_SIZE);
}

#[tokio::test]
async fn dashboard_shows_only_the_owners_devices() {
    let fleet = fleet();
    register_spaced(&fleet, &[("AA01", "alice"), ("AA02", "bob"), ("AA03", "alice")]).await;
    fleet.engine.route("devices/AA03/health", br#"{"fw":"1.0.7"}"#).await;

    let rows = fleet.engine.dashboard("alice").await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].device_id, id("AA03"));
    assert!(rows[0].online);
    assert_eq!(rows[0].firmware_version, "1.0.7");
    assert_eq!(rows[1].device_id, id("AA01"));
    assert!(!rows[1].online);
    assert_eq!(rows[1].ota_status, OtaStatus::Idle);

    assert!(fleet.engine.dashboard("carol").await.unwrap().is_empty());
    assert_eq!(fleet.engine.list_devices_by_owner("bob").await.unwrap().len(), 1);
}

#[tokio::test]
async fn audit_trail_follows_device_lifecycle() {
    let fleet = fleet();
    online_device(&fleet, "AA11", "1.0.0").await;
    fleet.engine.send_led_command(&id("AA11"), true, Some("alice")).await.unwrap();
    fleet.engine.route("devices/AA11/status", b"ON").await;
    fleet.engine.toggle_block(&id("AA11"), Some("root")).await.unwrap();
    fleet.engine.toggle_block(&id("AA11"), Some("root")).await.unwrap();

    let audit = fleet.engine.activity(&id("AA11")).await.unwrap();
    let actions: Vec<ActivityAction> = audit.iter().map(|e| e.action.clone()).collect();

    assert_eq!(
        actions,
        vec![
            ActivityAction::DeviceRegistered,
            ActivityAction::LedOn,
            ActivityAction::LedOn,
            ActivityAction::DeviceBlocked,
            ActivityAction::DeviceUnblocked,
        ]
    );
    assert_eq!(audit[1].actor.as_deref(), Some("alice"));
    assert_eq!(audit[3].actor.as_deref(), Some("root"));
}

#[tokio::test]
async fn audit_failure_does_not_fail_the_command() {
    let fleet = fleet();
    online_device(&fleet, "AA11", "1.0.0").await;
    fleet.store.fail_activity.store(true, std::sync::atomic::Ordering::SeqCst);

    fleet.engine.send_led_command(&id("AA11"), false, None).await.unwrap();
    fleet.engine.set_blocked(&id("AA11"), true, None).await.unwrap();

    assert!(fleet.device("AA11").await.blocked);
    assert_eq!(fleet.engine.stats().activity_failures, 2);
}

#[tokio::test]
async fn led_command_is_published_on_command_topic() {
    let fleet = fleet();
    online_device(&fleet, "AA11", "1.0.0").await;

    fleet.engine.send_led_command(&id("AA11"), true, None).await.unwrap();
    fleet.engine.send_led_command(&id("AA11"), false, None).await.unwrap();

    let published = fleet.transport.published();
    assert_eq!(
        published,
        vec![
            ("devices/AA11/command".to_string(), "LED_ON".to_string()),
            ("devices/AA11/command".to_string(), "LED_OFF".to_string()),
        ]
    );
    // The stored state only follows the device's own report
    assert!(!fleet.device("AA11").await.led_state);
}
