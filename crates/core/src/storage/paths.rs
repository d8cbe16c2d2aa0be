use keyindex_api::FileId;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;

/// File id to path registry. Shared stores carry one so that their results
/// can be resolved back to paths without the file system that produced them.
#[derive(Debug, Clone, Copy)]
pub struct PathRegistry<'c> {
    conn: &'c Connection,
}

impl<'c> PathRegistry<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn path_of(&self, file_id: FileId) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT path FROM file_paths WHERE file_id = ?1",
                params![file_id.raw()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn id_of(&self, path: &str) -> Result<Option<FileId>> {
        let raw: Option<u32> = self
            .conn
            .query_row(
                "SELECT file_id FROM file_paths WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(FileId::new))
    }

    /// Returns the id registered for `path`, assigning the next sequential
    /// id (starting at 1) the first time a path is seen.
    pub fn id_for(&self, path: &str) -> Result<FileId> {
        if let Some(id) = self.id_of(path)? {
            return Ok(id);
        }
        let next: u32 = self.conn.query_row(
            "SELECT COALESCE(MAX(file_id), 0) + 1 FROM file_paths",
            [],
            |row| row.get(0),
        )?;
        self.conn.execute(
            "INSERT INTO file_paths (file_id, path) VALUES (?1, ?2)",
            params![next, path],
        )?;
        Ok(FileId::new(next))
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM file_paths", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
