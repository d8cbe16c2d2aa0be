//! Read-only prebuilt stores mounted next to the local one.
//!
//! A shared store is an ordinary store file that was sealed after being
//! written by [`SharedIndexBuilder`]. It must carry its own id to path
//! registry, since the files it describes usually do not exist locally.

mod builder;

pub use builder::SharedIndexBuilder;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use keyindex_api::FileId;
use parking_lot::RwLock;

use crate::error::Result;
use crate::storage::{Database, IndexStorage, PathRegistry};

pub(crate) struct SharedStore {
    ordinal: usize,
    path: PathBuf,
    db: Database,
    attached: RwLock<BTreeSet<String>>,
}

impl SharedStore {
    /// Opens the store at `path` (already canonical) and attaches every
    /// definition id it has data for.
    pub fn open<'a>(
        ordinal: usize,
        path: PathBuf,
        definition_ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let db = Database::open_read_only(&path)?;
        let registered = db.read(|conn| Ok(PathRegistry::new(conn).len()?))?;
        if registered == 0 {
            return Err(crate::error::IndexError::Config(format!(
                "{} has no file path registry",
                path.display()
            )));
        }

        let store = Self {
            ordinal,
            path,
            db,
            attached: RwLock::new(BTreeSet::new()),
        };
        for index_id in definition_ids {
            store.attach(index_id);
        }
        Ok(store)
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Starts serving `index_id` from this store if it has any data for it.
    /// Failures leave the index detached.
    pub fn attach(&self, index_id: &str) -> bool {
        let present = self.db.read(|conn| {
            Ok(IndexStorage::open_existing(conn, index_id)?
                .is_some_and(|storage| storage.has_any_data()))
        });
        match present {
            Ok(true) => {
                self.attached.write().insert(index_id.to_string());
                true
            }
            Ok(false) => {
                self.attached.write().remove(index_id);
                false
            }
            Err(e) => {
                tracing::debug!(
                    "Shared index {} cannot serve '{}': {}",
                    self.path.display(),
                    index_id,
                    e
                );
                self.attached.write().remove(index_id);
                false
            }
        }
    }

    pub fn serves(&self, index_id: &str) -> bool {
        self.attached.read().contains(index_id)
    }

    /// Re-encodes an id read from this store into the global namespace.
    pub fn global_id(&self, local: FileId) -> FileId {
        FileId::shared(self.ordinal, local)
    }

    pub fn path_of(&self, local: FileId) -> Option<String> {
        match self.db.read(|conn| PathRegistry::new(conn).path_of(local)) {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!("Path lookup failed in {}: {}", self.path.display(), e);
                None
            }
        }
    }
}
