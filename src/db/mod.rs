//! Persistent vector store using SQLite and sqlite-vec.
//!
//! Each store lives in its own directory and owns everything inside it.
//! Entries get stable `INTEGER PRIMARY KEY` ids; vectors sit in a `vec0`
//! virtual table keyed by the same id.
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use sqlite_vec::sqlite3_vec_init;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use thiserror::Error;
use tracing::{debug, info};

pub mod entries;
pub mod models;
pub mod search;

/// File inside the persist directory that holds the index.
pub const STORE_FILE: &str = "index.sqlite3";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    source_path TEXT NOT NULL,
    title TEXT NOT NULL,
    page INTEGER,
    section TEXT,
    url TEXT,
    content_type TEXT NOT NULL,
    fingerprint TEXT,
    position INTEGER NOT NULL,
    content TEXT NOT NULL,
    indexed_at DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entries_source_path ON entries(source_path);

-- A row exists only once every chunk of the source is in `entries`.
CREATE TABLE IF NOT EXISTS sources (
    source_path TEXT PRIMARY KEY,
    fingerprint TEXT,
    chunks INTEGER NOT NULL,
    completed_at DATETIME NOT NULL
);
"#;

/// Errors from vector store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The persist path is missing, corrupt or belongs to an incompatible
    /// store. Never papered over with an empty in-memory store.
    #[error("vector store unavailable at {}: {reason}", path.display())]
    Unavailable { path: PathBuf, reason: String },

    #[error("vector has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Zero-length or non-finite vectors have no cosine distance.
    #[error("invalid vector: {0}")]
    InvalidVector(&'static str),

    #[error("store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

fn unavailable(path: &Path, reason: impl ToString) -> StoreError {
    StoreError::Unavailable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// How [`VectorStore::init`] treats the database it is handed.
#[derive(Clone, Copy)]
enum Mode {
    /// Create missing tables and record the dimension.
    Create(usize),
    /// Existing store only; the recorded dimension must match.
    Write(usize),
    ReadOnly,
}

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Handle to one persisted vector index.
///
/// Writes need `&mut self` and a single writer per persist directory.
/// Searches take `&self`; concurrent readers each open their own handle
/// with [`VectorStore::open_read_only`].
pub struct VectorStore {
    pub(crate) conn: Connection,
    path: PathBuf,
    dimensions: usize,
}

impl VectorStore {
    /// Open the store in `dir`, creating it if absent.
    ///
    /// Fails with [`StoreError::Unavailable`] when `dir` cannot hold a
    /// store, the index file is not a database, or the index was built
    /// with a different vector dimension.
    pub fn open<P: AsRef<Path>>(dir: P, dimensions: usize) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        info!("Opening vector store: {}", dir.display());

        if dimensions == 0 {
            return Err(unavailable(dir, "vector dimension must be positive"));
        }
        fs::create_dir_all(dir).map_err(|e| unavailable(dir, e))?;

        init_sqlite_vec();
        let conn = Connection::open(dir.join(STORE_FILE)).map_err(|e| unavailable(dir, e))?;
        Self::init(conn, dir, Mode::Create(dimensions))
    }

    /// Open an existing store for writing. Never creates anything, so a
    /// wrong path fails with [`StoreError::Unavailable`].
    pub fn open_existing<P: AsRef<Path>>(dir: P, dimensions: usize) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        let file = dir.join(STORE_FILE);
        if !file.is_file() {
            return Err(unavailable(dir, "no index found"));
        }

        init_sqlite_vec();
        let conn = Connection::open_with_flags(
            &file,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| unavailable(dir, e))?;
        Self::init(conn, dir, Mode::Write(dimensions))
    }

    /// Open an existing store for searching only. Never creates anything.
    pub fn open_read_only<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        let file = dir.join(STORE_FILE);
        if !file.is_file() {
            return Err(unavailable(dir, "no index found"));
        }

        init_sqlite_vec();
        let conn = Connection::open_with_flags(
            &file,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| unavailable(dir, e))?;
        Self::init(conn, dir, Mode::ReadOnly)
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory(dimensions: usize) -> Result<Self, StoreError> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn, Path::new(":memory:"), Mode::Create(dimensions))
    }

    fn init(conn: Connection, dir: &Path, mode: Mode) -> Result<Self, StoreError> {
        let vec_version: String = conn
            .query_row("SELECT vec_version()", [], |row| row.get(0))
            .map_err(|e| unavailable(dir, e))?;
        debug!("sqlite-vec version: {}", vec_version);

        if let Mode::Create(dimensions) = mode {
            conn.execute_batch(SCHEMA_SQL)
                .map_err(|e| unavailable(dir, e))?;
            conn.execute(
                "INSERT OR IGNORE INTO store_meta (key, value) VALUES ('dimensions', ?)",
                params![dimensions.to_string()],
            )
            .map_err(|e| unavailable(dir, e))?;
        }

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| unavailable(dir, e))?;
        let stored: usize = stored
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| unavailable(dir, "index has no recorded vector dimension"))?;

        if let Mode::Create(dimensions) | Mode::Write(dimensions) = mode {
            if stored != dimensions {
                return Err(unavailable(
                    dir,
                    format!("index holds {stored}-dimensional vectors, configured {dimensions}"),
                ));
            }
            if let Mode::Write(_) = mode {
                // Stores from earlier versions lack the `sources` table.
                conn.execute_batch(SCHEMA_SQL)
                    .map_err(|e| unavailable(dir, e))?;
            }
            conn.execute_batch(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS vec_entries USING vec0(embedding FLOAT[{stored}]);"
            ))
            .map_err(|e| unavailable(dir, e))?;
        }

        info!(
            "Vector store ready: {} ({} dimensions)",
            dir.display(),
            stored
        );

        Ok(Self {
            conn,
            path: dir.to_path_buf(),
            dimensions: stored,
        })
    }

    /// Persist directory of this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dimension every stored vector has.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// A vector must have the store's dimension and a finite, non-zero norm.
    pub(crate) fn check_vector(&self, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::InvalidVector("non-finite component"));
        }
        if vector.iter().all(|v| *v == 0.0) {
            return Err(StoreError::InvalidVector("zero vector"));
        }
        Ok(())
    }
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_init() {
        let store = VectorStore::open_in_memory(8).expect("Failed to open in-memory store");

        let tables: usize = store
            .conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('store_meta', 'entries', 'sources', 'vec_entries');",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
        assert_eq!(store.dimensions(), 8);
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = tempdir().unwrap();
        let persist = dir.path().join("legal");

        let store = VectorStore::open(&persist, 4).unwrap();
        assert!(persist.join(STORE_FILE).is_file());
        drop(store);

        let reopened = VectorStore::open(&persist, 4).unwrap();
        assert_eq!(reopened.dimensions(), 4);
        assert_eq!(reopened.path(), persist.as_path());
    }

    #[test]
    fn test_corrupt_index_is_unavailable() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(STORE_FILE),
            "this is definitely not an sqlite database file, just some text bytes".repeat(8),
        )
        .unwrap();

        let err = VectorStore::open(dir.path(), 4).err().unwrap();
        assert!(matches!(err, StoreError::Unavailable { .. }), "got {err}");
    }

    #[test]
    fn test_persist_path_is_a_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("settlement");
        fs::write(&file, "x").unwrap();

        let err = VectorStore::open(&file, 4).err().unwrap();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }

    #[test]
    fn test_dimension_change_is_unavailable() {
        let dir = tempdir().unwrap();
        drop(VectorStore::open(dir.path(), 4).unwrap());

        let err = VectorStore::open(dir.path(), 8).err().unwrap();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }

    #[test]
    fn test_read_only_requires_existing_index() {
        let dir = tempdir().unwrap();
        let err = VectorStore::open_read_only(dir.path()).err().unwrap();
        assert!(matches!(err, StoreError::Unavailable { .. }));
        assert!(!dir.path().join(STORE_FILE).exists());

        drop(VectorStore::open(dir.path(), 4).unwrap());
        let reader = VectorStore::open_read_only(dir.path()).unwrap();
        assert_eq!(reader.dimensions(), 4);
    }

    #[test]
    fn test_open_existing_never_creates() {
        let dir = tempdir().unwrap();
        let persist = dir.path().join("legal");

        let err = VectorStore::open_existing(&persist, 4).err().unwrap();
        assert!(matches!(err, StoreError::Unavailable { .. }));
        assert!(!persist.exists());

        drop(VectorStore::open(&persist, 4).unwrap());
        let store = VectorStore::open_existing(&persist, 4).unwrap();
        assert_eq!(store.dimensions(), 4);
        drop(store);

        let err = VectorStore::open_existing(&persist, 8).err().unwrap();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }

    #[test]
    fn test_check_vector() {
        let store = VectorStore::open_in_memory(3).unwrap();
        assert!(store.check_vector(&[0.0, 0.5, 0.0]).is_ok());
        assert!(matches!(
            store.check_vector(&[0.0, 0.0, 0.0]),
            Err(StoreError::InvalidVector(_))
        ));
        assert!(matches!(
            store.check_vector(&[f32::NAN, 1.0, 0.0]),
            Err(StoreError::InvalidVector(_))
        ));
        assert!(matches!(
            store.check_vector(&[1.0, 0.0]),
            Err(StoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_serialize_vector() {
        let vec = vec![1.0, 2.0, -3.5];
        let bytes = serialize_vector(&vec);
        assert_eq!(bytes.len(), 12);

        // 1.0f32 in hex: 0x3f800000 -> little endian: 00 00 80 3f
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        // 2.0f32 in hex: 0x40000000 -> little endian: 00 00 00 40
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x40]);
        // -3.5f32 in hex: 0xc0600000 -> little endian: 00 00 60 c0
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
    }
}
