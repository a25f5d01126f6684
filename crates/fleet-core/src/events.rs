//! Events emitted for external monitoring

use tokio::sync::mpsc;
use tracing::warn;

use crate::model::{DeviceId, OtaRecordId, OtaStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEvent {
    /// A device sent telemetry after being offline (or never seen)
    DeviceOnline { device_id: DeviceId },

    /// The watchdog demoted silent devices
    DevicesOffline { device_ids: Vec<DeviceId> },

    OtaStarted {
        device_id: DeviceId,
        ota_id: OtaRecordId,
        target_version: String,
    },

    /// The device reported SUCCESS and now runs `version`
    OtaCompleted {
        device_id: DeviceId,
        ota_id: Option<OtaRecordId>,
        version: String,
    },

    OtaFailed {
        device_id: DeviceId,
        ota_id: Option<OtaRecordId>,
    },

    /// Device reported a status that is neither success nor failure
    OtaProgress {
        device_id: DeviceId,
        status: OtaStatus,
    },

    SweepCompleted { checked: usize, marked_offline: usize },

    /// A timer tick found the previous sweep still running
    SweepSkipped,

    Started,

    Stopped { reason: String },
}

/// Non-blocking sender side of the event channel
///
/// A full channel drops the event with a warning instead of stalling the
/// component that produced it.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<FleetEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<FleetEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: FleetEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    "Event channel full, dropping {:?}. Consider increasing event_channel_capacity.",
                    event
                );
            }
            // Nobody is listening; that is allowed
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
