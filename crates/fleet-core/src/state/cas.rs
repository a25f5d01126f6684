// # Read-Modify-Write
//
// Optimistic update loop over `DeviceStore::update_device`. The edit
// closure is re-run against a fresh read after every `StorageConflict`, so
// it must be a pure function of the device it is given.

use tracing::debug;

use crate::Error;
use crate::model::{Device, DeviceId};
use crate::traits::DeviceStore;

/// Decision returned by an edit closure
#[derive(Debug)]
pub enum Edit<T> {
    /// Write the modified device
    Commit(T),
    /// Leave the stored device untouched
    Skip(T),
}

/// Outcome of [`modify_device`]
#[derive(Debug)]
pub enum Modified<T> {
    /// No device with this id
    NotFound,
    /// The edit was written; carries the stored record
    Committed(Device, T),
    /// The edit chose not to write; carries the record it saw
    Skipped(Device, T),
}

/// Apply `edit` to a device, retrying on concurrent writes
///
/// The edit runs at most `max_conflict_retries + 1` times. If every attempt
/// loses the race the last `StorageConflict` is returned.
pub async fn modify_device<T, F>(
    store: &dyn DeviceStore,
    device_id: &DeviceId,
    max_conflict_retries: usize,
    mut edit: F,
) -> Result<Modified<T>, Error>
where
    F: FnMut(&mut Device) -> Result<Edit<T>, Error>,
{
    let mut attempt = 0;
    loop {
        let Some(mut device) = store.get_device(device_id).await? else {
            return Ok(Modified::NotFound);
        };

        match edit(&mut device)? {
            Edit::Skip(out) => return Ok(Modified::Skipped(device, out)),
            Edit::Commit(out) => match store.update_device(&device).await {
                Ok(stored) => return Ok(Modified::Committed(stored, out)),
                Err(e) if e.is_conflict() && attempt < max_conflict_retries => {
                    attempt += 1;
                    debug!(
                        "Write conflict on {}, retrying ({}/{})",
                        device_id, attempt, max_conflict_retries
                    );
                }
                Err(e) => return Err(e),
            },
        }
    }
}
