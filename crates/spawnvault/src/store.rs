//! Persistence hand-off.
//!
//! The runtime only produces and consumes [`SpawnerSnapshot`]s; how they
//! are stored belongs to the host.

use parking_lot::Mutex;
use spawnvault_shared::SpawnerId;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{SpawnerError, SpawnerResult};
use crate::spawner::SpawnerSnapshot;

/// Host persistence backend.
pub trait SpawnerStore: Send + Sync {
    /// Every stored spawner.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::Store` if the backend cannot be read.
    fn load_all(&self) -> SpawnerResult<Vec<SpawnerSnapshot>>;

    /// Upserts a batch of spawners.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::Store` if nothing was written.
    fn save_all(&self, snapshots: &[SpawnerSnapshot]) -> SpawnerResult<()>;

    /// Forgets a removed spawner.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::Store` on backend failure.
    fn delete(&self, id: SpawnerId) -> SpawnerResult<()>;
}

/// Snapshots kept in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<BTreeMap<SpawnerId, SpawnerSnapshot>>,
    failures_left: AtomicU32,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored snapshot of one spawner.
    #[must_use]
    pub fn get(&self, id: SpawnerId) -> Option<SpawnerSnapshot> {
        self.snapshots.lock().get(&id).cloned()
    }

    /// Number of stored spawners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    /// True if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }

    /// Makes the next `count` writes (saves or deletes) fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> SpawnerResult<()> {
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            Err(SpawnerError::Store("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl SpawnerStore for MemoryStore {
    fn load_all(&self) -> SpawnerResult<Vec<SpawnerSnapshot>> {
        Ok(self.snapshots.lock().values().cloned().collect())
    }

    fn save_all(&self, snapshots: &[SpawnerSnapshot]) -> SpawnerResult<()> {
        self.injected_failure()?;
        let mut stored = self.snapshots.lock();
        for snapshot in snapshots {
            stored.insert(snapshot.config.id, snapshot.clone());
        }
        Ok(())
    }

    fn delete(&self, id: SpawnerId) -> SpawnerResult<()> {
        self.injected_failure()?;
        self.snapshots.lock().remove(&id);
        Ok(())
    }
}
