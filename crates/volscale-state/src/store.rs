//! StateStore — redb-backed persistence for volume records and events.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing). Writes are transactional, so every persisted lifecycle
//! transition is atomic.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    ///
    /// An unreadable or corrupt database is an error here — the daemon
    /// refuses to start rather than risk duplicate resize requests.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(VOLUMES).map_err(map_err!(Table))?;
        txn.open_table(EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Volumes ────────────────────────────────────────────────────

    /// Insert or update a volume record.
    pub fn put_volume(&self, record: &VolumeRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(VOLUMES).map_err(map_err!(Table))?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(volume = %record.id, lifecycle = ?record.lifecycle, "volume record stored");
        Ok(())
    }

    /// Get a volume record by provider id.
    pub fn get_volume(&self, volume_id: &str) -> StateResult<Option<VolumeRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VOLUMES).map_err(map_err!(Table))?;
        match table.get(volume_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: VolumeRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all tracked volumes.
    pub fn list_volumes(&self) -> StateResult<Vec<VolumeRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VOLUMES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: VolumeRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Delete a volume record. Returns true if it existed. Records are
    /// never deleted by the daemon itself; this is an operator tool.
    pub fn delete_volume(&self, volume_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(VOLUMES).map_err(map_err!(Table))?;
            existed = table.remove(volume_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(volume = %volume_id, existed, "volume record deleted");
        Ok(existed)
    }

    // ── Events ─────────────────────────────────────────────────────

    /// Append a scaling event.
    pub fn append_event(&self, event: &ScalingEvent) -> StateResult<()> {
        let key = event.table_key();
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Recent events for a volume. Keys sort by volume id, so a range
    /// scan from the prefix touches only this volume's rows.
    pub fn list_events_for_volume(
        &self,
        volume_id: &str,
        limit: usize,
    ) -> StateResult<Vec<ScalingEvent>> {
        let prefix = format!("{volume_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let event: ScalingEvent =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(event);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }
}
