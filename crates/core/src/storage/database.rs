use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, Transaction};

use crate::error::{IndexError, Result};

/// Layout version stored in `PRAGMA user_version`.
pub const LAYOUT_VERSION: i32 = 1;

const MAX_IDLE_READERS: usize = 8;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS index_catalog (
        index_id TEXT PRIMARY KEY
    ) WITHOUT ROWID;

    CREATE TABLE IF NOT EXISTS inverted (
        index_id TEXT NOT NULL,
        key TEXT NOT NULL,
        packets BLOB NOT NULL,
        PRIMARY KEY (index_id, key)
    ) WITHOUT ROWID;

    CREATE TABLE IF NOT EXISTS forward (
        index_id TEXT NOT NULL,
        file_id INTEGER NOT NULL,
        keys BLOB NOT NULL,
        PRIMARY KEY (index_id, file_id)
    ) WITHOUT ROWID;

    CREATE TABLE IF NOT EXISTS stamps (
        index_id TEXT NOT NULL,
        path TEXT NOT NULL,
        file_id INTEGER NOT NULL,
        mtime INTEGER NOT NULL,
        length INTEGER NOT NULL,
        version INTEGER,
        PRIMARY KEY (index_id, path)
    ) WITHOUT ROWID;

    CREATE TABLE IF NOT EXISTS definition_versions (
        index_id TEXT PRIMARY KEY,
        version INTEGER NOT NULL
    ) WITHOUT ROWID;

    CREATE TABLE IF NOT EXISTS file_paths (
        file_id INTEGER PRIMARY KEY,
        path TEXT NOT NULL UNIQUE
    );
";

const DROP_ALL: &str = "
    DROP TABLE IF EXISTS index_catalog;
    DROP TABLE IF EXISTS inverted;
    DROP TABLE IF EXISTS forward;
    DROP TABLE IF EXISTS stamps;
    DROP TABLE IF EXISTS definition_versions;
    DROP TABLE IF EXISTS file_paths;
";

/// One store file. Mutations go through a single writer connection inside
/// [`Database::write`]; reads borrow a connection from a small pool so they
/// never wait on the writer.
pub struct Database {
    path: PathBuf,
    writer: Option<Mutex<Connection>>,
    readers: Mutex<Vec<Connection>>,
}

impl Database {
    /// Opens (or creates) a writable store. A store written with another
    /// layout version is wiped and recreated.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            ",
        )?;

        let found: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if found != 0 && found != LAYOUT_VERSION {
            tracing::warn!(
                "Store {} has layout version {} (expected {}). Rebuilding.",
                path.display(),
                found,
                LAYOUT_VERSION
            );
            conn.execute_batch(DROP_ALL)?;
        }
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", LAYOUT_VERSION)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(Mutex::new(conn)),
            readers: Mutex::new(Vec::new()),
        })
    }

    /// Opens an existing store without ever writing to it. Fails on a
    /// missing file or a foreign layout version.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Self::read_only_connection(path)?;
        let found: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if found != LAYOUT_VERSION {
            return Err(IndexError::LayoutMismatch {
                found,
                expected: LAYOUT_VERSION,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer: None,
            readers: Mutex::new(vec![conn]),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.writer.is_none()
    }

    /// Runs `f` inside one transaction. The transaction commits when `f`
    /// succeeds and rolls back in full when it fails.
    pub fn write<R>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<R>) -> Result<R> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| IndexError::ReadOnly(self.path.display().to_string()))?;
        let mut conn = writer.lock();
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::error!("Rollback failed on {}: {}", self.path.display(), rollback);
                }
                Err(e)
            }
        }
    }

    /// Runs `f` on a pooled read connection. Reads only see committed data.
    pub fn read<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let pooled = self.readers.lock().pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => self.open_reader()?,
        };
        let result = f(&conn);
        let mut idle = self.readers.lock();
        if idle.len() < MAX_IDLE_READERS {
            idle.push(conn);
        }
        result
    }

    /// Folds the write-ahead log back into the main file.
    pub fn checkpoint(&self) -> Result<()> {
        let Some(writer) = self.writer.as_ref() else {
            return Ok(());
        };
        writer
            .lock()
            .query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
        Ok(())
    }

    /// Switches the store to a rollback journal so it can later be opened
    /// read-only without `-wal`/`-shm` side files.
    pub(crate) fn seal(&self) -> Result<()> {
        self.readers.lock().clear();
        let Some(writer) = self.writer.as_ref() else {
            return Ok(());
        };
        let conn = writer.lock();
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        conn.query_row("PRAGMA journal_mode = DELETE", [], |_| Ok(()))?;
        Ok(())
    }

    fn open_reader(&self) -> Result<Connection> {
        if self.is_read_only() {
            return Self::read_only_connection(&self.path);
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            "
            PRAGMA busy_timeout = 5000;
            PRAGMA query_only = ON;
            ",
        )?;
        Ok(conn)
    }

    fn read_only_connection(path: &Path) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA query_only = ON;")?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("store.db")).unwrap();

        let result: Result<()> = db.write(|tx| {
            tx.execute("INSERT INTO index_catalog (index_id) VALUES ('a')", [])?;
            Err(IndexError::Config("boom".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM index_catalog", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_foreign_layout_is_wiped_locally_and_refused_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE legacy (x INTEGER); PRAGMA user_version = 99;")
                .unwrap();
        }
        assert!(matches!(
            Database::open_read_only(&path),
            Err(IndexError::LayoutMismatch { found: 99, .. })
        ));

        let db = Database::open(&path).unwrap();
        db.write(|tx| {
            tx.execute("INSERT INTO index_catalog (index_id) VALUES ('a')", [])?;
            Ok(())
        })
        .unwrap();
        db.seal().unwrap();
        drop(db);

        let shared = Database::open_read_only(&path).unwrap();
        assert!(shared.is_read_only());
        assert!(matches!(shared.write(|_| Ok(())), Err(IndexError::ReadOnly(_))));
    }
}
