//! Offline watchdog
//!
//! One sweep reads a snapshot of online devices, picks those silent for
//! longer than the threshold, and demotes them with a single bulk store
//! call. The store re-checks staleness per device at write time, so a
//! heartbeat that lands between snapshot and write keeps its device online.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::activity::ActivityRecorder;
use crate::error::Result;
use crate::model::{ActivityAction, ActivityEntry, DeviceId};
use crate::traits::DeviceStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Online devices considered
    pub checked: usize,
    pub marked_offline: usize,
    pub demoted: Vec<DeviceId>,
}

pub struct OfflineWatchdog {
    devices: Arc<dyn DeviceStore>,
    activity: ActivityRecorder,
    threshold: chrono::Duration,
}

impl OfflineWatchdog {
    pub fn new(devices: Arc<dyn DeviceStore>, activity: ActivityRecorder, threshold: chrono::Duration) -> Self {
        Self {
            devices,
            activity,
            threshold,
        }
    }

    pub fn threshold(&self) -> chrono::Duration {
        self.threshold
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep as of `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let online = self.devices.list_online().await?;
        let checked = online.len();

        let stale: Vec<DeviceId> = online
            .into_iter()
            .filter(|snapshot| now.signed_duration_since(snapshot.last_seen) > self.threshold)
            .map(|snapshot| snapshot.device_id)
            .collect();

        if stale.is_empty() {
            debug!("Sweep checked {} online devices, none stale", checked);
            return Ok(SweepReport {
                checked,
                ..SweepReport::default()
            });
        }

        let cutoff = now - self.threshold;
        let demoted = self.devices.mark_offline(&stale, cutoff, now).await?;

        if demoted.len() < stale.len() {
            debug!(
                "{} stale devices reported in before the bulk write",
                stale.len() - demoted.len()
            );
        }

        for device_id in &demoted {
            info!("Device {} is offline", device_id);
            self.activity
                .record(ActivityEntry::device(ActivityAction::DeviceOffline, device_id))
                .await;
        }

        Ok(SweepReport {
            checked,
            marked_offline: demoted.len(),
            demoted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Device;
    use crate::state::MemoryStore;
    use crate::traits::ActivityLog;

    async fn insert(store: &MemoryStore, raw: &str, online: bool, last_seen: Option<DateTime<Utc>>) -> DeviceId {
        let id = DeviceId::parse(raw).unwrap();
        let mut device = Device::new(id.clone(), raw, "alice", "1.0.0");
        device.online = online;
        device.last_seen = last_seen;
        store.insert_device(&device).await.unwrap();
        id
    }

    fn watchdog(store: &Arc<MemoryStore>) -> OfflineWatchdog {
        OfflineWatchdog::new(
            store.clone(),
            ActivityRecorder::new(store.clone()),
            chrono::Duration::seconds(60),
        )
    }

    #[tokio::test]
    async fn demotes_only_devices_past_threshold() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let stale = insert(&store, "AA11", true, Some(now - chrono::Duration::seconds(61))).await;
        let fresh = insert(&store, "BB22", true, Some(now - chrono::Duration::seconds(59))).await;
        let offline = insert(&store, "CC33", false, Some(now - chrono::Duration::seconds(600))).await;
        let _never = insert(&store, "DD44", true, None).await;

        let report = watchdog(&store).sweep_at(now).await.unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.marked_offline, 1);
        assert_eq!(report.demoted, vec![stale.clone()]);

        let stale_device = store.get_device(&stale).await.unwrap().unwrap();
        assert!(!stale_device.online);
        assert_eq!(stale_device.offline_at, Some(now));
        assert!(store.get_device(&fresh).await.unwrap().unwrap().online);
        assert!(store.get_device(&offline).await.unwrap().unwrap().offline_at.is_none());

        let audit = store.entries_for(&stale).await.unwrap();
        assert_eq!(audit[0].action, ActivityAction::DeviceOffline);
    }

    #[tokio::test]
    async fn sweep_with_nobody_online_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        insert(&store, "AA11", false, Some(Utc::now())).await;

        let report = watchdog(&store).sweep().await.unwrap();

        assert_eq!(report, SweepReport::default());
    }
}
