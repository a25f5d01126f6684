//! Inbound telemetry: topic layout, payload decoding and routing

pub mod payload;
pub mod router;
pub mod topic;

pub use payload::HealthReport;
pub use router::{RouteOutcome, RouterStatsSnapshot, TelemetryRouter};
pub use topic::{TELEMETRY_FILTERS, TelemetryCategory, TelemetryTopic, command_topic, ota_topic, parse_topic};
