//! Per-(index, path) modification stamps used to skip unchanged files.
//!
//! A stamp is a heuristic: two different contents can share an mtime and a
//! length. It never decides what a query returns.

use keyindex_api::FileId;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub file_id: FileId,
    pub mtime: i64,
    pub length: u64,
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct StampStore<'c> {
    conn: &'c Connection,
}

impl<'c> StampStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, index_id: &str, path: &str) -> Result<Option<Stamp>> {
        Ok(self
            .conn
            .query_row(
                "SELECT file_id, mtime, length, version FROM stamps WHERE index_id = ?1 AND path = ?2",
                params![index_id, path],
                |row| {
                    Ok(Stamp {
                        file_id: FileId::new(row.get(0)?),
                        mtime: row.get(1)?,
                        length: row.get::<_, i64>(2)? as u64,
                        version: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    /// True only if a stamp exists and matches exactly; with
    /// `expected_version` the stored version must match too.
    pub fn is_up_to_date(
        &self,
        index_id: &str,
        path: &str,
        mtime: i64,
        length: u64,
        expected_version: Option<u32>,
    ) -> Result<bool> {
        let Some(stamp) = self.get(index_id, path)? else {
            return Ok(false);
        };
        let version_ok = match expected_version {
            Some(expected) => stamp.version == Some(expected),
            None => true,
        };
        Ok(stamp.mtime == mtime && stamp.length == length && version_ok)
    }

    pub fn update(&self, index_id: &str, path: &str, stamp: Stamp) -> Result<()> {
        self.conn.execute(
            "INSERT INTO stamps (index_id, path, file_id, mtime, length, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (index_id, path) DO UPDATE SET
                file_id = excluded.file_id, mtime = excluded.mtime,
                length = excluded.length, version = excluded.version",
            params![
                index_id,
                path,
                stamp.file_id.raw(),
                stamp.mtime,
                stamp.length as i64,
                stamp.version
            ],
        )?;
        Ok(())
    }

    pub fn remove(&self, index_id: &str, path: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM stamps WHERE index_id = ?1 AND path = ?2",
            params![index_id, path],
        )?;
        Ok(())
    }

    /// Ids of the indexes holding a stamp for `path`.
    pub fn indexes_of(&self, path: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT index_id FROM stamps WHERE path = ?1")?;
        let ids = stmt
            .query_map(params![path], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Forgets a path for every index.
    pub fn remove_path(&self, path: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM stamps WHERE path = ?1", params![path])?;
        Ok(())
    }

    pub fn clear_index(&self, index_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM stamps WHERE index_id = ?1", params![index_id])?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM stamps", [])?;
        Ok(())
    }

    /// Every path stamped under any index, sorted.
    pub fn known_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT path FROM stamps ORDER BY path")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    /// Paths stamped under one index, sorted.
    pub fn paths_of_index(&self, index_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM stamps WHERE index_id = ?1 ORDER BY path")?;
        let paths = stmt
            .query_map(params![index_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    /// Stamped files whose path starts with `prefix`, with the id they were
    /// last indexed under. Deleted folders are resolved through this.
    pub fn files_under(&self, prefix: &str) -> Result<Vec<(FileId, String)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT file_id, path FROM stamps WHERE path >= ?1 ORDER BY path",
        )?;
        let mut rows = stmt.query(params![prefix])?;
        let mut files = Vec::new();
        while let Some(row) = rows.next()? {
            let path: String = row.get(1)?;
            if !path.starts_with(prefix) {
                break;
            }
            files.push((FileId::new(row.get(0)?), path));
        }
        Ok(files)
    }
}
