//! Audit trail recording
//!
//! Every component writes audit entries through [`ActivityRecorder`]. The
//! recorder never fails: an `ActivityLog` error is logged at `error`,
//! counted, and otherwise swallowed so it cannot abort the operation being
//! recorded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

use crate::model::ActivityEntry;
use crate::traits::ActivityLog;

#[derive(Clone)]
pub struct ActivityRecorder {
    log: Arc<dyn ActivityLog>,
    failures: Arc<AtomicU64>,
}

impl ActivityRecorder {
    pub fn new(log: Arc<dyn ActivityLog>) -> Self {
        Self {
            log,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append an entry, reporting failures only through logs and the counter
    pub async fn record(&self, entry: ActivityEntry) {
        if let Err(e) = self.log.append(&entry).await {
            self.failures.fetch_add(1, Ordering::Relaxed);
            error!(
                action = ?entry.action,
                device = ?entry.device_id.as_ref().map(|id| id.as_str()),
                "Failed to record activity: {}",
                e
            );
        }
    }

    /// Number of entries that could not be written
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ActivityRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRecorder")
            .field("failures", &self.failures())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::model::{ActivityAction, DeviceId};
    use crate::state::MemoryStore;
    use async_trait::async_trait;

    struct BrokenLog;

    #[async_trait]
    impl ActivityLog for BrokenLog {
        async fn append(&self, _entry: &ActivityEntry) -> Result<(), Error> {
            Err(Error::storage("disk full"))
        }

        async fn entries_for(&self, _id: &DeviceId) -> Result<Vec<ActivityEntry>, Error> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn failures_are_swallowed_and_counted() {
        let recorder = ActivityRecorder::new(Arc::new(BrokenLog));
        let id = DeviceId::parse("AA11").unwrap();

        tokio_test::block_on(async {
            recorder
                .record(ActivityEntry::device(ActivityAction::LedOn, &id))
                .await;
            recorder
                .record(ActivityEntry::device(ActivityAction::LedOff, &id))
                .await;
        });

        assert_eq!(recorder.failures(), 2);
    }

    #[tokio::test]
    async fn entries_reach_the_log() {
        let store = Arc::new(MemoryStore::new());
        let recorder = ActivityRecorder::new(store.clone());
        let id = DeviceId::parse("AA11").unwrap();

        recorder
            .record(ActivityEntry::device(ActivityAction::DeviceRegistered, &id).with_actor("admin"))
            .await;

        let entries = store.all_activity().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actor.as_deref(), Some("admin"));
        assert_eq!(recorder.failures(), 0);
    }
}
