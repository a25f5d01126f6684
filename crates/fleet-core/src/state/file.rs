// # File Store
//
// File-based implementation of DeviceStore, OtaStore and ActivityLog with
// crash recovery.
//
// ## Purpose
//
// Keeps the fleet registry, OTA history and audit trail across daemon
// restarts.
//
// ## Crash Recovery
//
// - Atomic writes: every mutation rewrites the state file via temp + rename
// - Automatic backup: the previous good state is kept as `.backup`
// - Recovery: a state file that fails to parse is replaced by its backup
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "tables": {
//     "devices": { "AA11": { "device_id": "AA11", "revision": 4, ... } },
//     "ota_records": [ { "id": "…", "device_id": "AA11", ... } ]
//   }
// }
// ```
//
// The audit trail is append-only JSON lines next to the state file
// (`fleet.json` → `fleet.activity.jsonl`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use super::tables::StoreTables;
use crate::Error;
use crate::model::{ActivityEntry, Device, DeviceId, OtaRecord, OtaRecordId, OtaStatus};
use crate::traits::{ActivityLog, DeviceStore, LivenessSnapshot, OtaStore};

/// State file format version
const STATE_FILE_VERSION: &str = "1.0";

/// File-based store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use fleet_core::model::{Device, DeviceId};
/// use fleet_core::state::FileStore;
/// use fleet_core::traits::DeviceStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStore::new("/var/lib/fleet/fleet.json").await?;
///     let id = DeviceId::parse("AA11")?;
///
///     // Written to disk before the call returns
///     store.insert_device(&Device::new(id.clone(), "lamp", "alice", "1.0.0")).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    activity_path: PathBuf,
    /// Always equal to the last state written to disk
    tables: Arc<RwLock<StoreTables>>,
    /// Serializes appends to the activity file
    activity_lock: Mutex<()>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFileFormat {
    version: String,
    tables: StoreTables,
}

#[derive(Serialize)]
struct StateFileRef<'a> {
    version: &'a str,
    tables: &'a StoreTables,
}

impl FileStore {
    /// Create or load a file store
    ///
    /// Creates parent directories if needed. A missing state file starts
    /// an empty fleet; a corrupted one is recovered from its backup.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let tables = Self::load_with_recovery(&path).await?;
        let activity_path = Self::activity_path(&path);

        Ok(Self {
            path,
            activity_path,
            tables: Arc::new(RwLock::new(tables)),
            activity_lock: Mutex::new(()),
        })
    }

    async fn load_with_recovery(path: &Path) -> Result<StoreTables, Error> {
        match Self::load(path).await {
            Ok(tables) => {
                tracing::debug!("Loaded state file: {} devices", tables.devices.len());
                Ok(tables)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "State file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty state.");
                    return Ok(StoreTables::default());
                }

                match Self::load(&backup_path).await {
                    Ok(tables) => {
                        tracing::info!(
                            "Recovered state from backup: {} devices",
                            tables.devices.len()
                        );
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore state file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(tables)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unreadable: {}. Starting with empty state.",
                            backup_err
                        );
                        Ok(StoreTables::default())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<StoreTables, Error> {
        if !path.exists() {
            tracing::debug!("State file does not exist: {}", path.display());
            return Ok(StoreTables::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::storage(format!("Failed to read state file {}: {}", path.display(), e))
        })?;

        let state_file: StateFileFormat = serde_json::from_str(&content)?;

        if state_file.version != STATE_FILE_VERSION {
            tracing::warn!(
                "State file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STATE_FILE_VERSION,
                state_file.version
            );
        }

        Ok(state_file.tables)
    }

    /// Serialize `tables` and atomically replace the state file
    async fn persist(&self, tables: &StoreTables) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(&StateFileRef {
            version: STATE_FILE_VERSION,
            tables,
        })?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::storage(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::storage(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.flush().await.map_err(|e| {
                Error::storage(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::storage(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("State written to file: {}", self.path.display());
        Ok(())
    }

    /// Apply a mutation to a copy, write the copy, then publish it
    ///
    /// A failed write leaves both the file and the visible tables as they
    /// were, so an `Err` always means nothing changed.
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut StoreTables) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut guard = self.tables.write().await;
        let mut next = guard.clone();
        let out = op(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    fn activity_path(path: &Path) -> PathBuf {
        let mut activity = path.to_path_buf();
        activity.set_extension("activity.jsonl");
        activity
    }

    async fn read_activity(&self) -> Result<Vec<ActivityEntry>, Error> {
        if !self.activity_path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.activity_path).await?;
        let mut entries = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ActivityEntry>(line) {
                Ok(entry) => entries.push(entry),
                // A torn final line after a crash is expected; skip it
                Err(e) => tracing::warn!(
                    "Skipping unreadable activity line {} in {}: {}",
                    n + 1,
                    self.activity_path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }

    /// Force immediate write to disk
    pub async fn sync(&self) -> Result<(), Error> {
        let guard = self.tables.read().await;
        self.persist(&guard).await
    }
}

#[async_trait]
impl DeviceStore for FileStore {
    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<Device>, Error> {
        Ok(self.tables.read().await.get(device_id))
    }

    async fn insert_device(&self, device: &Device) -> Result<Device, Error> {
        self.mutate(|t| t.insert(device)).await
    }

    async fn update_device(&self, device: &Device) -> Result<Device, Error> {
        self.mutate(|t| t.update(device)).await
    }

    async fn list_devices(&self) -> Result<Vec<Device>, Error> {
        Ok(self.tables.read().await.all())
    }

    async fn list_devices_by_owner(&self, owner: &str) -> Result<Vec<Device>, Error> {
        Ok(self.tables.read().await.by_owner(owner))
    }

    async fn list_online(&self) -> Result<Vec<LivenessSnapshot>, Error> {
        Ok(self.tables.read().await.online_snapshot())
    }

    async fn mark_offline(
        &self,
        device_ids: &[DeviceId],
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeviceId>, Error> {
        let mut guard = self.tables.write().await;
        let mut next = guard.clone();
        let demoted = next.mark_offline(device_ids, cutoff, now);
        if demoted.is_empty() {
            return Ok(demoted);
        }
        self.persist(&next).await?;
        *guard = next;
        Ok(demoted)
    }

    /// Every mutation is written through, so this only rewrites the file
    async fn flush(&self) -> Result<(), Error> {
        self.sync().await
    }
}

#[async_trait]
impl OtaStore for FileStore {
    async fn create_record(&self, record: &OtaRecord) -> Result<(), Error> {
        self.mutate(|t| t.create_record(record)).await
    }

    async fn get_record(&self, id: &OtaRecordId) -> Result<Option<OtaRecord>, Error> {
        Ok(self.tables.read().await.get_record(id))
    }

    async fn update_record_status(
        &self,
        id: &OtaRecordId,
        status: OtaStatus,
        reason: Option<String>,
    ) -> Result<Option<OtaRecord>, Error> {
        self.mutate(|t| Ok(t.update_record_status(id, status, reason)))
            .await
    }

    async fn history(&self, device_id: &DeviceId) -> Result<Vec<OtaRecord>, Error> {
        Ok(self.tables.read().await.history(device_id))
    }
}

#[async_trait]
impl ActivityLog for FileStore {
    async fn append(&self, entry: &ActivityEntry) -> Result<(), Error> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.activity_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.activity_path)
            .await
            .map_err(|e| {
                Error::storage(format!(
                    "Failed to open activity file {}: {}",
                    self.activity_path.display(),
                    e
                ))
            })?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn entries_for(&self, device_id: &DeviceId) -> Result<Vec<ActivityEntry>, Error> {
        let _guard = self.activity_lock.lock().await;
        Ok(self
            .read_activity()
            .await?
            .into_iter()
            .filter(|e| e.device_id.as_ref() == Some(device_id))
            .collect())
    }
}
