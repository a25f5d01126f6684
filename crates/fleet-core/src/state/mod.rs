// # Store Implementations
//
// Each store implements DeviceStore, OtaStore and ActivityLog over one
// set of tables, so a single instance can be shared by every component.

pub mod cas;
pub mod file;
pub mod memory;
mod tables;

pub use cas::{Edit, Modified, modify_device};
pub use file::FileStore;
pub use memory::MemoryStore;
