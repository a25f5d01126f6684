// # fleet-core
//
// Core library for the device fleet state synchronization and OTA engine.
//
// ## Architecture Overview
//
// Devices publish telemetry over a pub/sub broker and receive commands and
// firmware updates on the same connection. This library owns everything
// between the broker and the database:
// - **TelemetryRouter**: Demultiplexes inbound topics to the state machine
// - **DeviceStateMachine**: Applies telemetry to device records (CAS + retry)
// - **OtaOrchestrator**: Decides eligibility and issues firmware updates
// - **OfflineWatchdog** / **SweepScheduler**: Demote silent devices
// - **DeviceAdmin** / **PolicyNotifier**: Registration, blocking, LED control
// - **FleetEngine**: Wires the above over injected collaborators
//
// ## Seams
//
// Storage, the broker connection, the firmware artifact store and the
// network policy service are traits (see [`traits`]); concrete
// implementations live in their own crates or in [`state`].
//
// ## Design Principles
//
// 1. **Library-First**: The daemon is a thin wrapper; everything runs embedded
// 2. **No lost updates**: Every device write is compare-and-swap on a revision
// 3. **Telemetry never fails**: Bad messages are logged, counted and dropped
// 4. **Bounded waits**: Every external call has a deadline

pub mod activity;
pub mod admin;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod machine;
pub mod model;
pub mod ota;
pub mod policy;
pub mod scheduler;
pub mod state;
pub mod telemetry;
pub mod traits;
pub mod version;
pub mod watchdog;

// Re-export core types for convenience
pub use config::{FleetConfig, StateStoreConfig};
pub use engine::{Collaborators, FleetEngine};
pub use error::{Error, Result};
pub use events::FleetEvent;
pub use model::{Device, DeviceId, OtaRecord, OtaStatus};
pub use state::{FileStore, MemoryStore};
pub use traits::{ActivityLog, ArtifactStore, DeviceStore, OtaStore, PolicyService, TelemetrySource, Transport};
pub use version::is_newer;
