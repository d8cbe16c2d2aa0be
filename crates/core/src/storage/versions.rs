use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;

/// Last schema version seen for each index id.
#[derive(Debug, Clone, Copy)]
pub struct DefinitionVersionStore<'c> {
    conn: &'c Connection,
}

impl<'c> DefinitionVersionStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn stored_version(&self, index_id: &str) -> Result<Option<u32>> {
        Ok(self
            .conn
            .query_row(
                "SELECT version FROM definition_versions WHERE index_id = ?1",
                params![index_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn put_version(&self, index_id: &str, version: u32) -> Result<()> {
        self.conn.execute(
            "INSERT INTO definition_versions (index_id, version) VALUES (?1, ?2)
             ON CONFLICT (index_id) DO UPDATE SET version = excluded.version",
            params![index_id, version],
        )?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM definition_versions", [])?;
        Ok(())
    }
}
