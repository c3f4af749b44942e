//! Expression side-store
//!
//! A narrow storage capability used to bound peak memory: a resolved
//! container's expression batch can be serialised out and dropped, keyed
//! by the container's id, then reloaded on demand. The core depends only
//! on the [`ExpressionStore`] trait and is agnostic to the format.
//!
//! Two implementations ship: [`SqliteStore`] (one blob per container) and
//! [`MemoryStore`] for tests.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::Result;
use crate::entity::EntityId;
use crate::entity::expression::ExpressionBatch;

/// Storage capability for evicted expression batches
pub trait ExpressionStore {
    /// Persist a container's batch, replacing any previous blob
    fn put(&mut self, container: EntityId, batch: &ExpressionBatch) -> Result<()>;

    /// Load a container's batch; `None` when nothing was stored
    fn get(&mut self, container: EntityId) -> Result<Option<ExpressionBatch>>;
}

/// SQL to create the batches table
const CREATE_BATCHES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS expression_batches (
    container_id INTEGER PRIMARY KEY,
    batch BLOB NOT NULL
)
"#;

/// SQLite-backed expression store: one JSON blob per container id
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates if it doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute(CREATE_BATCHES_TABLE, [])?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(CREATE_BATCHES_TABLE, [])?;
        Ok(Self { conn })
    }
}

impl ExpressionStore for SqliteStore {
    fn put(&mut self, container: EntityId, batch: &ExpressionBatch) -> Result<()> {
        let blob = serde_json::to_vec(batch)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO expression_batches (container_id, batch) VALUES (?1, ?2)",
            params![container.0, blob],
        )?;
        Ok(())
    }

    fn get(&mut self, container: EntityId) -> Result<Option<ExpressionBatch>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT batch FROM expression_batches WHERE container_id = ?1",
                params![container.0],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            Some(bytes) => {
                let mut batch: ExpressionBatch = serde_json::from_slice(&bytes)?;
                batch.reindex();
                Ok(Some(batch))
            }
            None => Ok(None),
        }
    }
}

/// In-memory expression store
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: HashMap<EntityId, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExpressionStore for MemoryStore {
    fn put(&mut self, container: EntityId, batch: &ExpressionBatch) -> Result<()> {
        self.blobs.insert(container, serde_json::to_vec(batch)?);
        Ok(())
    }

    fn get(&mut self, container: EntityId) -> Result<Option<ExpressionBatch>> {
        match self.blobs.get(&container) {
            Some(bytes) => {
                let mut batch: ExpressionBatch = serde_json::from_slice(bytes)?;
                batch.reindex();
                Ok(Some(batch))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::expression::{ExprId, Expression};
    use crate::name::GenericName;

    fn sample_batch(container: EntityId) -> ExpressionBatch {
        let mut batch = ExpressionBatch::new();
        let mut left = Expression::new(ExprId(10), container);
        left.set_identifier(GenericName::new("foo"));
        let mut top = Expression::new(ExprId(11), container);
        top.set_dot(true);
        top.set_call(true);
        top.set_identifier(GenericName::new("bar"));
        batch.push(left);
        batch.push(top);
        batch.set_parent(ExprId(10), ExprId(11));
        batch
    }

    #[test]
    fn test_sqlite_roundtrip_preserves_links() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let container = EntityId(1);
        store.put(container, &sample_batch(container)).unwrap();

        let reloaded = store.get(container).unwrap().unwrap();
        assert_eq!(reloaded.len(), 2);
        let left = reloaded.get(ExprId(10)).unwrap();
        assert_eq!(left.parent(), Some(ExprId(11)));
        let top = reloaded.get(ExprId(11)).unwrap();
        assert_eq!(top.deduce_type_based_id(), Some(ExprId(10)));
        assert!(top.is_dot() && top.is_call());
        assert_eq!(top.container(), container);
    }

    #[test]
    fn test_sqlite_missing_batch_is_none() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get(EntityId(42)).unwrap().is_none());
    }

    #[test]
    fn test_sqlite_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batches.db");
        let container = EntityId(7);
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.put(container, &sample_batch(container)).unwrap();
        }
        let mut store = SqliteStore::open(&path).unwrap();
        assert!(store.get(container).unwrap().is_some());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        let container = EntityId(3);
        store.put(container, &sample_batch(container)).unwrap();
        let reloaded = store.get(container).unwrap().unwrap();
        assert_eq!(reloaded.ids(), vec![ExprId(10), ExprId(11)]);
    }
}
