use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use keyindex_api::{
    DefinitionRef, FileId, FileObject, FileRef, FileSystem, IndexFilter, ProgressSnapshot,
};
use keyindex_ingest::RequestCoalescer;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::IndexingConfig;
use crate::error::Result;
use crate::manager::extract::PreparedFile;
use crate::manager::progress::ProgressTracker;
use crate::shared::SharedStore;
use crate::storage::{Database, DefinitionVersionStore, IndexStorage, Stamp, StampStore};

/// Everything guarded by the engine lock. Queries only hold it shared long
/// enough to copy out what they need; applying a batch, clearing an index or
/// registering a definition holds it exclusively.
#[derive(Default)]
pub(crate) struct EngineState {
    pub definitions: Vec<DefinitionRef>,
}

impl EngineState {
    pub fn definition(&self, index_id: &str) -> Option<&DefinitionRef> {
        self.definitions.iter().find(|d| d.id() == index_id)
    }

    pub fn is_current(&self, index_id: &str, version: u32) -> bool {
        self.definition(index_id)
            .is_some_and(|definition| definition.version() == version)
    }
}

/// What registering a definition did to its stored data. Each variant
/// carries the paths a backfill would cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Registration {
    /// Stored version matches; nothing was touched.
    Current,
    /// Never seen by this store. Carries every path known to any index.
    New { known_paths: Vec<String> },
    /// Stored under another version; the old data was dropped. Carries the
    /// paths the old version had covered.
    VersionChanged { from: u32, covered_paths: Vec<String> },
}

/// Background extraction jobs in flight. Flushers park on it instead of
/// polling while only extraction is running.
#[derive(Default)]
pub(crate) struct BulkJobs {
    active: Mutex<usize>,
    idle: Condvar,
}

impl BulkJobs {
    pub fn begin(&self) {
        *self.active.lock() += 1;
    }

    pub fn end(&self) {
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.idle.notify_all();
        }
    }

    pub fn active(&self) -> usize {
        *self.active.lock()
    }

    /// Blocks until no job is running.
    pub fn wait_idle(&self) {
        let mut active = self.active.lock();
        while *active > 0 {
            self.idle.wait(&mut active);
        }
    }
}

pub(crate) struct Engine {
    pub config: IndexingConfig,
    pub db: Database,
    pub fs: Arc<dyn FileSystem>,
    pub filter: Option<Arc<dyn IndexFilter>>,
    pub state: RwLock<EngineState>,
    /// Mounted shared stores in ordinal order. Lock order: `state` first.
    pub shared: RwLock<Vec<Arc<SharedStore>>>,
    pub pending: RequestCoalescer<FileRef>,
    pub progress: ProgressTracker,
    pub bulk_jobs: BulkJobs,
    pub disposed: AtomicBool,
    pub pool: rayon::ThreadPool,
}

impl Engine {
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn definitions(&self) -> Vec<DefinitionRef> {
        self.state.read().definitions.clone()
    }

    pub fn definition(&self, index_id: &str) -> Option<DefinitionRef> {
        self.state.read().definition(index_id).cloned()
    }

    /// Mounted stores currently serving `index_id`.
    pub fn shared_serving(&self, index_id: &str) -> Vec<Arc<SharedStore>> {
        self.shared
            .read()
            .iter()
            .filter(|store| store.serves(index_id))
            .cloned()
            .collect()
    }

    pub fn shared_store(&self, ordinal: usize) -> Option<Arc<SharedStore>> {
        self.shared.read().get(ordinal).cloned()
    }

    pub fn is_indexable(&self, file: &dyn FileObject) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|filter| filter.is_indexable(file))
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.progress.snapshot(self.pending.len())
    }

    pub fn notify_progress(&self) {
        let snapshot = self.snapshot();
        self.progress.notify(&snapshot);
    }

    /// Records the definition's version and drops its data when the version
    /// moved. Runs under the engine lock so no query sees a half-cleared
    /// index.
    pub fn register_definition(&self, definition: DefinitionRef) -> Result<Registration> {
        let mut state = self.state.write();
        let index_id = definition.id().to_string();
        let version = definition.version();

        let registration = self.db.write(|tx| {
            let storage = IndexStorage::create(tx, &index_id)?;
            let versions = DefinitionVersionStore::new(tx);
            let stored = versions.stored_version(&index_id)?;
            if stored == Some(version) {
                return Ok(Registration::Current);
            }
            let stamps = StampStore::new(tx);
            let covered_paths = stamps.paths_of_index(&index_id)?;
            storage.clear()?;
            stamps.clear_index(&index_id)?;
            versions.put_version(&index_id, version)?;
            Ok(match stored {
                Some(from) => Registration::VersionChanged {
                    from,
                    covered_paths,
                },
                None => Registration::New {
                    known_paths: stamps.known_paths()?,
                },
            })
        })?;

        for store in self.shared.read().iter() {
            store.attach(&index_id);
        }
        state.definitions.retain(|d| d.id() != index_id);
        state.definitions.push(definition);
        Ok(registration)
    }

    /// Writes prepared files in one transaction. Outputs produced by a
    /// definition version that is no longer registered are dropped.
    pub fn apply(&self, files: &[PreparedFile]) -> Result<usize> {
        let state = self.state.write();
        self.db.write(|tx| {
            let stamps = StampStore::new(tx);
            for file in files {
                for output in &file.outputs {
                    if !state.is_current(&output.index_id, output.version) {
                        tracing::debug!(
                            "Dropping stale '{}' v{} output for {}",
                            output.index_id,
                            output.version,
                            file.path
                        );
                        continue;
                    }
                    let storage = IndexStorage::create(tx, &output.index_id)?;
                    if output.retired {
                        storage.remove_file(file.file_id)?;
                        stamps.remove(&output.index_id, &file.path)?;
                        continue;
                    }
                    storage.replace_file(file.file_id, &output.entries)?;
                    stamps.update(
                        &output.index_id,
                        &file.path,
                        Stamp {
                            file_id: file.file_id,
                            mtime: file.mtime,
                            length: file.length,
                            version: Some(output.version),
                        },
                    )?;
                }
            }
            Ok(files.len())
        })
    }

    /// Removes files from every registered index and forgets their stamps.
    pub fn remove(&self, targets: &[(FileId, String)]) -> Result<usize> {
        let state = self.state.write();
        self.db.write(|tx| {
            let stamps = StampStore::new(tx);
            for (file_id, path) in targets {
                for definition in &state.definitions {
                    if let Some(storage) = IndexStorage::open_existing(tx, definition.id())? {
                        storage.remove_file(*file_id)?;
                    }
                }
                stamps.remove_path(path)?;
            }
            Ok(targets.len())
        })
    }

    /// Drops every local index, stamp and recorded version.
    pub fn clear_local(&self) -> Result<()> {
        let _state = self.state.write();
        self.db.write(|tx| {
            IndexStorage::clear_all(tx)?;
            StampStore::new(tx).clear()?;
            DefinitionVersionStore::new(tx).clear()?;
            Ok(())
        })
    }

    /// Files to drop when `file` goes away: the file itself, plus everything
    /// stamped below it when it is (or was) a folder.
    pub fn removal_targets(&self, file: &dyn FileObject) -> Vec<(FileId, String)> {
        let mut targets = Vec::new();
        if file.id().is_local() {
            targets.push((file.id(), file.path().to_string()));
        }
        if file.exists() && !file.is_folder() {
            return targets;
        }

        let prefix = format!("{}/", file.path().trim_end_matches('/'));
        match self
            .db
            .read(|conn| StampStore::new(conn).files_under(&prefix))
        {
            Ok(nested) => targets.extend(nested),
            Err(e) => tracing::warn!("Cannot list files under {}: {}", prefix, e),
        }
        targets
    }
}
