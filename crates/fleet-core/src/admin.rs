//! Device administration commands
//!
//! Registration, blocking and LED control. These are the commands the
//! external HTTP layer issues on behalf of users and administrators; all
//! identity and authorization checks happen before they get here.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::activity::ActivityRecorder;
use crate::error::{Error, Result};
use crate::machine;
use crate::model::{ActivityAction, ActivityEntry, Device, DeviceId};
use crate::policy::PolicyNotifier;
use crate::state::{Edit, Modified, modify_device};
use crate::telemetry::command_topic;
use crate::traits::{DeviceStore, Transport};

pub const LED_ON: &str = "LED_ON";
pub const LED_OFF: &str = "LED_OFF";

pub struct DeviceAdmin {
    devices: Arc<dyn DeviceStore>,
    transport: Arc<dyn Transport>,
    policy: Arc<PolicyNotifier>,
    activity: ActivityRecorder,
    default_firmware_version: String,
    max_conflict_retries: usize,
}

impl DeviceAdmin {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        transport: Arc<dyn Transport>,
        policy: Arc<PolicyNotifier>,
        activity: ActivityRecorder,
        default_firmware_version: impl Into<String>,
        max_conflict_retries: usize,
    ) -> Self {
        Self {
            devices,
            transport,
            policy,
            activity,
            default_firmware_version: default_firmware_version.into(),
            max_conflict_retries,
        }
    }

    /// Register a device and grant it broker access
    pub async fn register_device(&self, device_id: &DeviceId, name: &str, owner: &str) -> Result<Device> {
        let device = Device::new(
            device_id.clone(),
            name.trim(),
            owner,
            self.default_firmware_version.clone(),
        );
        let stored = self.devices.insert_device(&device).await?;

        info!("Registered device {} for {}", device_id, owner);
        self.policy.provision(device_id);
        self.activity
            .record(
                ActivityEntry::device(ActivityAction::DeviceRegistered, device_id)
                    .with_actor(owner)
                    .with_meta(json!({ "name": stored.name })),
            )
            .await;

        Ok(stored)
    }

    /// Set the block flag
    ///
    /// Blocking takes the device offline and revokes its broker access;
    /// unblocking re-provisions it. Setting the flag it already has is a
    /// no-op apart from re-sending the policy command.
    pub async fn set_blocked(&self, device_id: &DeviceId, blocked: bool, actor: Option<&str>) -> Result<Device> {
        self.write_block(device_id, |_| blocked, actor).await
    }

    /// Flip the block flag
    pub async fn toggle_block(&self, device_id: &DeviceId, actor: Option<&str>) -> Result<Device> {
        self.write_block(device_id, |current| !current, actor).await
    }

    async fn write_block(
        &self,
        device_id: &DeviceId,
        next: impl Fn(bool) -> bool,
        actor: Option<&str>,
    ) -> Result<Device> {
        let now = Utc::now();
        let modified = modify_device(
            self.devices.as_ref(),
            device_id,
            self.max_conflict_retries,
            |device| {
                let blocked = next(device.blocked);
                if blocked == device.blocked {
                    return Ok(Edit::Skip(blocked));
                }
                device.blocked = blocked;
                if blocked && device.online {
                    machine::mark_offline(device, now);
                }
                Ok(Edit::Commit(blocked))
            },
        )
        .await?;

        let (device, blocked, changed) = match modified {
            Modified::NotFound => return Err(Error::device_not_found(device_id.as_str())),
            Modified::Committed(device, blocked) => (device, blocked, true),
            Modified::Skipped(device, blocked) => (device, blocked, false),
        };

        if blocked {
            self.policy.revoke(device_id);
        } else {
            self.policy.provision(device_id);
        }

        if changed {
            let action = if blocked {
                ActivityAction::DeviceBlocked
            } else {
                ActivityAction::DeviceUnblocked
            };
            info!("Device {} {}", device_id, if blocked { "blocked" } else { "unblocked" });
            let mut entry = ActivityEntry::device(action, device_id);
            if let Some(actor) = actor {
                entry = entry.with_actor(actor);
            }
            self.activity.record(entry).await;
        }

        Ok(device)
    }

    /// Switch the device LED
    ///
    /// The stored `led_state` is not touched; it follows the device's own
    /// `status` report.
    pub async fn send_led_command(&self, device_id: &DeviceId, on: bool, actor: Option<&str>) -> Result<()> {
        let device = self
            .devices
            .get_device(device_id)
            .await?
            .ok_or_else(|| Error::device_not_found(device_id.as_str()))?;

        if device.blocked {
            return Err(Error::device_blocked(device_id.as_str()));
        }
        if !device.online {
            return Err(Error::device_offline(device_id.as_str()));
        }

        let payload = if on { LED_ON } else { LED_OFF };
        self.transport
            .publish(&command_topic(device_id), payload.as_bytes())
            .await?;

        let action = if on {
            ActivityAction::LedOn
        } else {
            ActivityAction::LedOff
        };
        let mut entry = ActivityEntry::device(action, device_id).with_meta(json!({ "source": "command" }));
        if let Some(actor) = actor {
            entry = entry.with_actor(actor);
        }
        self.activity.record(entry).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::state::MemoryStore;
    use crate::traits::{ActivityLog, PolicyService};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        published: Mutex<Vec<(String, String)>>,
        policy: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), String::from_utf8_lossy(payload).into_owned()));
            Ok(())
        }
        fn transport_name(&self) -> &'static str {
            "recorder"
        }
    }

    #[async_trait]
    impl PolicyService for Recorder {
        async fn provision(&self, id: &DeviceId) -> Result<()> {
            self.policy.lock().unwrap().push(format!("provision {id}"));
            Ok(())
        }
        async fn revoke(&self, id: &DeviceId) -> Result<()> {
            self.policy.lock().unwrap().push(format!("revoke {id}"));
            Ok(())
        }
        fn service_name(&self) -> &'static str {
            "recorder"
        }
    }

    fn setup() -> (DeviceAdmin, Arc<MemoryStore>, Arc<Recorder>, Arc<PolicyNotifier>) {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(Recorder::default());
        let notifier = Arc::new(PolicyNotifier::spawn(recorder.clone(), &PolicyConfig::default()));
        let admin = DeviceAdmin::new(
            store.clone(),
            recorder.clone(),
            notifier.clone(),
            ActivityRecorder::new(store.clone()),
            "1.0.0",
            3,
        );
        (admin, store, recorder, notifier)
    }

    fn id() -> DeviceId {
        DeviceId::parse("AA11").unwrap()
    }

    #[tokio::test]
    async fn register_provisions_and_audits() {
        let (admin, store, recorder, notifier) = setup();

        let device = admin.register_device(&id(), " desk lamp ", "alice").await.unwrap();
        notifier.shutdown().await;

        assert_eq!(device.name, "desk lamp");
        assert_eq!(device.firmware_version, "1.0.0");
        assert!(!device.online);
        assert_eq!(*recorder.policy.lock().unwrap(), vec!["provision AA11"]);
        let audit = store.entries_for(&id()).await.unwrap();
        assert_eq!(audit[0].action, ActivityAction::DeviceRegistered);

        let err = admin.register_device(&id(), "again", "alice").await.unwrap_err();
        assert!(matches!(err, Error::DeviceAlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn blocking_takes_device_offline_and_revokes() {
        let (admin, store, recorder, notifier) = setup();
        admin.register_device(&id(), "lamp", "alice").await.unwrap();
        let mut device = store.get_device(&id()).await.unwrap().unwrap();
        device.online = true;
        device.last_seen = Some(Utc::now());
        store.update_device(&device).await.unwrap();

        let blocked = admin.toggle_block(&id(), Some("root")).await.unwrap();
        assert!(blocked.blocked);
        assert!(!blocked.online);
        assert!(blocked.offline_at.is_some());

        let unblocked = admin.toggle_block(&id(), Some("root")).await.unwrap();
        assert!(!unblocked.blocked);
        assert!(!unblocked.online);

        notifier.shutdown().await;
        assert_eq!(
            *recorder.policy.lock().unwrap(),
            vec!["provision AA11", "revoke AA11", "provision AA11"]
        );
    }

    #[tokio::test]
    async fn led_command_requires_online_unblocked_device() {
        let (admin, store, recorder, _notifier) = setup();
        admin.register_device(&id(), "lamp", "alice").await.unwrap();

        let err = admin.send_led_command(&id(), true, None).await.unwrap_err();
        assert!(matches!(err, Error::DeviceOffline(_)));

        let mut device = store.get_device(&id()).await.unwrap().unwrap();
        device.online = true;
        store.update_device(&device).await.unwrap();

        admin.send_led_command(&id(), true, Some("alice")).await.unwrap();
        assert_eq!(
            *recorder.published.lock().unwrap(),
            vec![("devices/AA11/command".to_string(), "LED_ON".to_string())]
        );

        admin.set_blocked(&id(), true, None).await.unwrap();
        let err = admin.send_led_command(&id(), false, None).await.unwrap_err();
        assert!(matches!(err, Error::DeviceBlocked(_)));
    }
}
