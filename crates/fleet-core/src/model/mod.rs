//! Data model: devices, OTA history and audit entries

pub mod activity;
pub mod device;
pub mod ota;

pub use activity::{ActivityAction, ActivityEntry};
pub use device::{Device, DeviceId, OtaStatus};
pub use ota::{OtaRecord, OtaRecordId};
