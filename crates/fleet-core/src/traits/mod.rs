//! Core traits for the fleet system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`DeviceStore`]: Authoritative per-device state
//! - [`OtaStore`]: Firmware update history
//! - [`ActivityLog`]: Audit trail sink
//! - [`Transport`] / [`TelemetrySource`]: Pub/sub connection
//! - [`ArtifactStore`]: Firmware version and download oracle
//! - [`PolicyService`]: Broker credential provisioning

pub mod activity_log;
pub mod artifact_store;
pub mod device_store;
pub mod ota_store;
pub mod policy_service;
pub mod transport;

pub use activity_log::ActivityLog;
pub use artifact_store::ArtifactStore;
pub use device_store::{DeviceStore, LivenessSnapshot};
pub use ota_store::OtaStore;
pub use policy_service::PolicyService;
pub use transport::{InboundMessage, TelemetrySource, Transport};
