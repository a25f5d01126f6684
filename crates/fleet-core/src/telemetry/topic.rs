//! Topic layout
//!
//! Inbound: `devices/<ID>/health`, `devices/<ID>/status`, `devices/<ID>/ota/status`.
//! Outbound: `devices/<ID>/command`, `devices/<ID>/ota`.

use crate::error::{Error, Result};
use crate::model::DeviceId;

pub const TOPIC_PREFIX: &str = "devices";

/// Subscription filters covering every inbound category
pub const TELEMETRY_FILTERS: [&str; 3] = [
    "devices/+/health",
    "devices/+/status",
    "devices/+/ota/status",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryCategory {
    Health,
    Status,
    OtaStatus,
}

impl TelemetryCategory {
    fn from_segments(segments: &[&str]) -> Option<Self> {
        match segments {
            ["health"] => Some(Self::Health),
            ["status"] => Some(Self::Status),
            ["ota", "status"] => Some(Self::OtaStatus),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::Status => "status",
            Self::OtaStatus => "ota/status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryTopic {
    pub device_id: DeviceId,
    pub category: TelemetryCategory,
}

/// Parse an inbound topic
///
/// - `Ok(Some(_))`: device telemetry
/// - `Ok(None)`: unrelated traffic (wrong prefix, too few segments, or a
///   category this core does not consume such as our own `command`)
/// - `Err(MalformedTelemetry)`: a telemetry-shaped topic whose device
///   segment is not a valid identifier
pub fn parse_topic(topic: &str) -> Result<Option<TelemetryTopic>> {
    let segments: Vec<&str> = topic.split('/').collect();
    let [prefix, raw_id, rest @ ..] = segments.as_slice() else {
        return Ok(None);
    };
    if *prefix != TOPIC_PREFIX || rest.is_empty() {
        return Ok(None);
    }
    let Some(category) = TelemetryCategory::from_segments(rest) else {
        return Ok(None);
    };

    let device_id = DeviceId::parse(raw_id)
        .map_err(|_| Error::malformed(topic, format!("invalid device id {:?}", raw_id)))?;

    Ok(Some(TelemetryTopic {
        device_id,
        category,
    }))
}

pub fn command_topic(device_id: &DeviceId) -> String {
    format!("{}/{}/command", TOPIC_PREFIX, device_id)
}

pub fn ota_topic(device_id: &DeviceId) -> String {
    format!("{}/{}/ota", TOPIC_PREFIX, device_id)
}
