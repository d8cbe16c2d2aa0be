//! Forward and inverted maps of one index id.
//!
//! `inverted`: key -> packet list, kept sorted by key for prefix scans.
//! `forward`: file id -> keys that file currently contributes.
//!
//! Mutators must only run inside the engine's write transaction; readers get
//! owned copies.

use std::collections::{BTreeMap, BTreeSet};

use keyindex_api::FileId;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::storage::packet::{self, Packet};

#[derive(Debug, Clone, Copy)]
pub struct IndexStorage<'c> {
    conn: &'c Connection,
    index_id: &'c str,
}

impl<'c> IndexStorage<'c> {
    /// Registers the index id in the store (idempotent) and returns its maps.
    pub fn create(conn: &'c Connection, index_id: &'c str) -> Result<Self> {
        conn.execute(
            "INSERT OR IGNORE INTO index_catalog (index_id) VALUES (?1)",
            params![index_id],
        )?;
        Ok(Self { conn, index_id })
    }

    /// Opens the maps of an index id that already exists in the store.
    /// Never creates anything, so it is safe on read-only stores.
    pub fn open_existing(conn: &'c Connection, index_id: &'c str) -> Result<Option<Self>> {
        let found = conn
            .query_row(
                "SELECT 1 FROM index_catalog WHERE index_id = ?1",
                params![index_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.map(|()| Self { conn, index_id }))
    }

    /// Empties the maps of every index id in the store. The catalog is kept.
    pub fn clear_all(conn: &Connection) -> Result<()> {
        conn.execute_batch("DELETE FROM inverted; DELETE FROM forward;")?;
        Ok(())
    }

    pub fn index_id(&self) -> &str {
        self.index_id
    }

    pub fn get_forward_keys(&self, file_id: FileId) -> Result<BTreeSet<String>> {
        let raw: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT keys FROM forward WHERE index_id = ?1 AND file_id = ?2",
                params![self.index_id, file_id.raw()],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(bytes) => Ok(rmp_serde::from_slice(&bytes)?),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Replaces the forward entry. An empty key set removes it.
    pub fn put_forward(&self, file_id: FileId, keys: &BTreeSet<String>) -> Result<()> {
        if keys.is_empty() {
            return self.remove_forward(file_id);
        }
        let encoded = rmp_serde::to_vec(keys)?;
        self.conn.execute(
            "INSERT INTO forward (index_id, file_id, keys) VALUES (?1, ?2, ?3)
             ON CONFLICT (index_id, file_id) DO UPDATE SET keys = excluded.keys",
            params![self.index_id, file_id.raw(), encoded],
        )?;
        Ok(())
    }

    pub fn remove_forward(&self, file_id: FileId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM forward WHERE index_id = ?1 AND file_id = ?2",
            params![self.index_id, file_id.raw()],
        )?;
        Ok(())
    }

    /// Appends an encoded packet to the key's list. A packet already stored
    /// for the same file id is replaced, so a key never holds two packets of
    /// one file.
    pub fn put_inverted(&self, key: &str, encoded_packet: &[u8]) -> Result<()> {
        let file_id = packet::peek_file_id(encoded_packet)?;
        let existing = self.raw_packets(key)?.unwrap_or_default();
        let mut list = packet::without_file(&existing, file_id)?.unwrap_or(existing);
        packet::append_frame(&mut list, encoded_packet);
        self.conn.execute(
            "INSERT INTO inverted (index_id, key, packets) VALUES (?1, ?2, ?3)
             ON CONFLICT (index_id, key) DO UPDATE SET packets = excluded.packets",
            params![self.index_id, key, list],
        )?;
        Ok(())
    }

    /// Drops the file's packet from the key, deleting the key once its list
    /// is empty. Returns whether anything was removed.
    pub fn remove_inverted_by_file_id(&self, key: &str, file_id: FileId) -> Result<bool> {
        let Some(existing) = self.raw_packets(key)? else {
            return Ok(false);
        };
        let Some(kept) = packet::without_file(&existing, file_id)? else {
            return Ok(false);
        };
        if kept.is_empty() {
            self.conn.execute(
                "DELETE FROM inverted WHERE index_id = ?1 AND key = ?2",
                params![self.index_id, key],
            )?;
        } else {
            self.conn.execute(
                "UPDATE inverted SET packets = ?3 WHERE index_id = ?1 AND key = ?2",
                params![self.index_id, key, kept],
            )?;
        }
        Ok(true)
    }

    /// Exact-match lookup.
    pub fn get_values(&self, key: &str) -> Result<Vec<Packet>> {
        match self.raw_packets(key)? {
            Some(list) => Ok(packet::decode_list(&list)?),
            None => Ok(Vec::new()),
        }
    }

    /// Streams every key starting with `prefix` in key order until `visit`
    /// returns `false`. Returns `false` if the scan was stopped early.
    pub fn for_each_prefix(
        &self,
        prefix: &str,
        mut visit: impl FnMut(&str, Vec<Packet>) -> Result<bool>,
    ) -> Result<bool> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT key, packets FROM inverted WHERE index_id = ?1 AND key >= ?2 ORDER BY key",
        )?;
        let mut rows = stmt.query(params![self.index_id, prefix])?;
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            if !key.starts_with(prefix) {
                break;
            }
            let list: Vec<u8> = row.get(1)?;
            if !visit(&key, packet::decode_list(&list)?)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn search_prefix(&self, prefix: &str) -> Result<BTreeMap<String, Vec<Packet>>> {
        let mut out = BTreeMap::new();
        self.for_each_prefix(prefix, |key, packets| {
            out.insert(key.to_string(), packets);
            Ok(true)
        })?;
        Ok(out)
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute(
            "DELETE FROM inverted WHERE index_id = ?1",
            params![self.index_id],
        )?;
        self.conn.execute(
            "DELETE FROM forward WHERE index_id = ?1",
            params![self.index_id],
        )?;
        Ok(())
    }

    /// Best-effort probe; storage errors read as "no data".
    pub fn has_any_data(&self) -> bool {
        self.conn
            .query_row(
                "SELECT 1 FROM inverted WHERE index_id = ?1 LIMIT 1",
                params![self.index_id],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .unwrap_or(false)
    }

    pub fn has_indexed(&self, file_id: FileId) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM forward WHERE index_id = ?1 AND file_id = ?2",
                params![self.index_id, file_id.raw()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Removes the file from this index: every packet it owns and its
    /// forward entry. Returns the keys it contributed.
    pub fn remove_file(&self, file_id: FileId) -> Result<BTreeSet<String>> {
        let old_keys = self.get_forward_keys(file_id)?;
        for key in &old_keys {
            self.remove_inverted_by_file_id(key, file_id)?;
        }
        self.remove_forward(file_id)?;
        Ok(old_keys)
    }

    /// Replaces everything the file contributes with `entries` (already
    /// sorted, unique keys). Old packets go first so forward and inverted
    /// always agree.
    pub fn replace_file(&self, file_id: FileId, entries: &[(String, Vec<u8>)]) -> Result<()> {
        self.remove_file(file_id)?;
        let mut keys = BTreeSet::new();
        for (key, value) in entries {
            let encoded = Packet::new(file_id, value.clone()).encode();
            self.put_inverted(key, &encoded)?;
            keys.insert(key.clone());
        }
        self.put_forward(file_id, &keys)
    }

    fn raw_packets(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .conn
            .query_row(
                "SELECT packets FROM inverted WHERE index_id = ?1 AND key = ?2",
                params![self.index_id, key],
                |row| row.get(0),
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    fn keys_with_packets_for(storage: &IndexStorage<'_>, file_id: FileId) -> BTreeSet<String> {
        storage
            .search_prefix("")
            .unwrap()
            .into_iter()
            .filter(|(_, packets)| packets.iter().any(|p| p.file_id == file_id))
            .map(|(key, _)| key)
            .collect()
    }

    #[test]
    fn test_replace_file_keeps_forward_and_inverted_in_sync() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("store.db")).unwrap();
        let a = FileId::new(1);
        let b = FileId::new(2);

        db.write(|tx| {
            let storage = IndexStorage::create(tx, "words")?;
            storage.replace_file(a, &[("Hello".to_string(), b"a".to_vec()), ("Shared".to_string(), b"a".to_vec())])?;
            storage.replace_file(b, &[("Shared".to_string(), b"b".to_vec())])?;
            storage.replace_file(a, &[("Other".to_string(), b"a2".to_vec())])?;
            Ok(())
        })
        .unwrap();

        db.read(|conn| {
            let storage = IndexStorage::open_existing(conn, "words")?.expect("index exists");
            assert_eq!(storage.get_forward_keys(a)?, keys_with_packets_for(&storage, a));
            assert_eq!(storage.get_forward_keys(b)?, keys_with_packets_for(&storage, b));
            assert!(storage.get_values("Hello")?.is_empty());

            let shared = storage.get_values("Shared")?;
            assert_eq!(shared, vec![Packet::new(b, b"b".to_vec())]);
            assert_eq!(storage.get_values("Other")?, vec![Packet::new(a, b"a2".to_vec())]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_put_inverted_keeps_one_packet_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("store.db")).unwrap();
        let id = FileId::new(5);

        db.write(|tx| {
            let storage = IndexStorage::create(tx, "words")?;
            storage.put_inverted("K", &Packet::new(id, b"1".to_vec()).encode())?;
            storage.put_inverted("K", &Packet::new(id, b"2".to_vec()).encode())?;
            assert_eq!(storage.get_values("K")?, vec![Packet::new(id, b"2".to_vec())]);

            assert!(storage.remove_inverted_by_file_id("K", id)?);
            assert!(!storage.remove_inverted_by_file_id("K", id)?);
            assert!(!storage.has_any_data());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_prefix_scan_is_ordered_and_stoppable() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("store.db")).unwrap();
        let id = FileId::new(1);

        db.write(|tx| {
            let storage = IndexStorage::create(tx, "words")?;
            let other = IndexStorage::create(tx, "other")?;
            for key in ["List", "LinkedList", "Lisp", "Map", "Li\u{10FFFF}x"] {
                storage.put_inverted(key, &Packet::new(id, Vec::new()).encode())?;
            }
            other.put_inverted("Lint", &Packet::new(id, Vec::new()).encode())?;
            Ok(())
        })
        .unwrap();

        db.read(|conn| {
            let storage = IndexStorage::open_existing(conn, "words")?.expect("index exists");
            let keys: Vec<String> = storage.search_prefix("Li")?.into_keys().collect();
            assert_eq!(keys, vec!["LinkedList", "Lisp", "List", "Li\u{10FFFF}x"]);

            let mut seen = Vec::new();
            let completed = storage.for_each_prefix("Li", |key, _| {
                seen.push(key.to_string());
                Ok(seen.len() < 2)
            })?;
            assert!(!completed);
            assert_eq!(seen, vec!["LinkedList", "Lisp"]);

            assert!(IndexStorage::open_existing(conn, "missing")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_clear_only_touches_one_index() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("store.db")).unwrap();
        let id = FileId::new(3);

        db.write(|tx| {
            let words = IndexStorage::create(tx, "words")?;
            let exts = IndexStorage::create(tx, "exts")?;
            words.replace_file(id, &[("A".to_string(), Vec::new())])?;
            exts.replace_file(id, &[("java".to_string(), Vec::new())])?;

            words.clear()?;
            assert!(!words.has_any_data());
            assert!(!words.has_indexed(id)?);
            assert!(exts.has_any_data());
            assert!(exts.has_indexed(id)?);
            Ok(())
        })
        .unwrap();
    }
}
