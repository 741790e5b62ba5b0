//! Persisted document vectors, keyed by `(story, part_index)`.
use crate::{StoreError, StoreResult};
use log::info;
use rusqlite::{params, Connection, OpenFlags};
use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS embeddings (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    story      INTEGER,
    part_index INTEGER,
    embedding  BLOB,
    UNIQUE (story, part_index)
);
"#;

/// Vectors loaded from the store: a flat row-major array of `len` vectors of
/// `dim` floats each, with the owning story id attached per row.
#[derive(Debug, Clone, Default)]
pub struct VectorSet {
    pub dim: usize,
    pub ids: Vec<u64>,
    pub vectors: Vec<f32>,
}

impl VectorSet {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn vector(&self, row: usize) -> &[f32] {
        &self.vectors[row * self.dim..(row + 1) * self.dim]
    }
}

/// The embedding store. Derived state: everything here can be regenerated
/// from the catalog, and writes are last-writer-wins on the unique key.
pub struct EmbeddingStore {
    conn: Mutex<Connection>,
}

impl EmbeddingStore {
    /// Open (or create) the embedding store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!("Opening embedding store {path:?}");
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the store read-only.
    pub fn open_read_only(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Lock)
    }

    /// Write a batch of parts. Replaces any previous vector for the same
    /// `(story, part_index)`; the batch commits as a unit.
    pub fn upsert_parts(&self, parts: &[(u64, u32, Vec<f32>)]) -> StoreResult<()> {
        let mut guard = self.lock()?;
        let tx = guard.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO embeddings (story, part_index, embedding)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (story, part_index, vector) in parts {
                stmt.execute(params![
                    *story as i64,
                    *part_index as i64,
                    vector_to_blob(vector)
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Distinct stories that have at least one part.
    pub fn embedded_story_ids(&self) -> StoreResult<Vec<u64>> {
        let guard = self.lock()?;
        let mut stmt = guard.prepare_cached("SELECT DISTINCT story FROM embeddings")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0).map(|id| id as u64))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Largest story id with a persisted part, the resume pointer for
    /// catchup.
    pub fn last_story(&self) -> StoreResult<Option<u64>> {
        let guard = self.lock()?;
        let max: Option<i64> =
            guard.query_row("SELECT MAX(story) FROM embeddings", [], |row| row.get(0))?;
        Ok(max.map(|id| id as u64))
    }

    /// Total part count and distinct story count.
    pub fn counts(&self) -> StoreResult<(u64, u64)> {
        let guard = self.lock()?;
        let (total, stories): (i64, i64) = guard.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT story) FROM embeddings",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total as u64, stories as u64))
    }

    /// Load every vector in insertion (`id`) order.
    pub fn load_all(&self) -> StoreResult<VectorSet> {
        self.load_where("", &[])
    }

    /// Load the vectors of a single story.
    pub fn load_story(&self, story: u64) -> StoreResult<VectorSet> {
        self.load_where(
            "WHERE story = ?1",
            &[rusqlite::types::Value::Integer(story as i64)],
        )
    }

    fn load_where(
        &self,
        constraint: &str,
        params: &[rusqlite::types::Value],
    ) -> StoreResult<VectorSet> {
        let guard = self.lock()?;
        let sql = format!("SELECT story, embedding FROM embeddings {constraint} ORDER BY id");
        let mut stmt = guard.prepare(&sql)?;

        let mut set = VectorSet::default();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter().cloned()))?;
        while let Some(row) = rows.next()? {
            let story = row.get::<_, i64>(0)? as u64;
            let blob: Vec<u8> = row.get(1)?;
            let vector = blob_to_vector(&blob);

            if set.dim == 0 {
                set.dim = vector.len();
            } else if vector.len() != set.dim {
                return Err(StoreError::Dimension {
                    expected: set.dim,
                    actual: vector.len(),
                });
            }

            set.ids.push(story);
            set.vectors.extend_from_slice(&vector);
        }
        Ok(set)
    }

    /// Check that a story exists in the catalog for every embedded story.
    /// Used by startup sanity logging; the catalog is the source of truth.
    pub fn orphan_stories(&self, catalog_ids: &std::collections::HashSet<u64>) -> StoreResult<Vec<u64>> {
        Ok(self
            .embedded_story_ids()?
            .into_iter()
            .filter(|id| !catalog_ids.contains(id))
            .collect())
    }
}

/// Raw little-endian f32 bytes, the same layout the index consumes.
fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
