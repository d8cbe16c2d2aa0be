//! The coordinator: owns the local store, the definition registry, the
//! mounted shared stores and the single writer thread.

mod engine;
mod extract;
mod progress;
mod query;
mod update;
mod writer;

pub use progress::ListenerId;

pub(crate) use extract::collect_files;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use keyindex_api::{
    DefinitionRef, FileId, FileSystem, IndexDefinition, IndexFilter, ProgressListener,
    ProgressSnapshot,
};
use keyindex_ingest::{RequestCoalescer, WritePipeline};
use parking_lot::RwLock;

use crate::config::{IndexingConfig, VersionBumpPolicy};
use crate::error::Result;
use crate::shared::SharedStore;
use crate::storage::{Database, IndexStorage};

use engine::{BulkJobs, Engine, EngineState, Registration};
use progress::ProgressTracker;
use writer::{IndexWriter, WriteTask};

pub struct IndexManagerBuilder {
    cache_dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    config: IndexingConfig,
    filter: Option<Arc<dyn IndexFilter>>,
}

impl IndexManagerBuilder {
    pub fn config(mut self, config: IndexingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn filter(mut self, filter: impl IndexFilter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn build(self) -> Result<IndexManager> {
        let store_path = self.cache_dir.join(&self.config.store_file_name);
        let db = Database::open(&store_path)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.extraction_parallelism.max(1))
            .thread_name(|i| format!("keyindex-extract-{i}"))
            .panic_handler(|_| tracing::error!("Extraction worker panicked"))
            .build()?;

        let engine = Arc::new(Engine {
            progress: ProgressTracker::new(self.config.progress_batch_interval),
            db,
            fs: self.fs,
            filter: self.filter,
            state: RwLock::new(EngineState::default()),
            shared: RwLock::new(Vec::new()),
            pending: RequestCoalescer::new(),
            bulk_jobs: BulkJobs::default(),
            disposed: AtomicBool::new(false),
            pool,
            config: self.config,
        });
        let writer = Arc::new(IndexWriter::new(Arc::clone(&engine)));
        let pipeline = Arc::new(WritePipeline::start(writer, engine.config.pipeline())?);

        let manager = IndexManager { engine, pipeline };
        for path in manager.engine.config.shared_index_paths.clone() {
            manager.mount_shared_index(&path);
        }
        tracing::info!("Opened index store {}", store_path.display());
        Ok(manager)
    }
}

/// Incremental, persistent key to value indexing over the files of one
/// [`FileSystem`].
///
/// Mutations are queued and applied by one writer thread; queries read
/// committed state and never wait for queued work. Call
/// [`IndexManager::flush`] to wait for it.
pub struct IndexManager {
    engine: Arc<Engine>,
    pipeline: Arc<WritePipeline<WriteTask>>,
}

impl IndexManager {
    pub fn builder(cache_dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> IndexManagerBuilder {
        IndexManagerBuilder {
            cache_dir: cache_dir.into(),
            fs,
            config: IndexingConfig::default(),
            filter: None,
        }
    }

    pub fn open(
        cache_dir: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        config: IndexingConfig,
    ) -> Result<Self> {
        Self::builder(cache_dir, fs).config(config).build()
    }

    pub fn config(&self) -> &IndexingConfig {
        &self.engine.config
    }

    pub fn store_path(&self) -> &Path {
        self.engine.db.path()
    }

    pub fn register<D: IndexDefinition>(&self, definition: D) -> Result<()> {
        self.register_dyn(Arc::new(definition))
    }

    /// Registers (or replaces) a definition.
    ///
    /// A version different from the stored one clears the index before this
    /// returns. An id this store has never seen is backfilled in the
    /// background over every file already indexed by other definitions.
    pub fn register_dyn(&self, definition: DefinitionRef) -> Result<()> {
        if self.engine.is_disposed() {
            return Err(crate::error::IndexError::Disposed);
        }
        let registration = self.engine.register_definition(Arc::clone(&definition))?;
        match registration {
            Registration::Current => {
                tracing::debug!("Registered index '{}' v{}", definition.id(), definition.version());
            }
            Registration::New { known_paths } => {
                tracing::info!("Registered new index '{}' v{}", definition.id(), definition.version());
                self.schedule_backfill(definition, known_paths);
            }
            Registration::VersionChanged {
                from,
                covered_paths,
            } => {
                tracing::info!(
                    "Index '{}' changed version {} -> {}; cleared stored entries",
                    definition.id(),
                    from,
                    definition.version()
                );
                if self.engine.config.version_bump_policy == VersionBumpPolicy::Backfill {
                    self.schedule_backfill(definition, covered_paths);
                }
            }
        }
        Ok(())
    }

    pub fn registered_index_ids(&self) -> Vec<String> {
        self.engine
            .state
            .read()
            .definitions
            .iter()
            .map(|d| d.id().to_string())
            .collect()
    }

    /// Mounts a prebuilt store read-only. Returns whether a new store was
    /// mounted; bad or already mounted paths are skipped.
    pub fn mount_shared_index(&self, path: &Path) -> bool {
        if self.engine.is_disposed() {
            return false;
        }
        let canonical = match path.canonicalize() {
            Ok(canonical) if canonical.is_file() => canonical,
            Ok(_) | Err(_) => {
                tracing::debug!("Shared index {} does not exist; skipping", path.display());
                return false;
            }
        };

        let started = Instant::now();
        // held across the mount so a concurrent registration attaches to it
        let state = self.engine.state.read();
        let mut shared = self.engine.shared.write();
        if shared.iter().any(|store| store.path() == canonical) {
            return false;
        }
        if shared.len() >= FileId::MAX_SHARED_STORES {
            tracing::warn!(
                "Not mounting {}: {} shared indexes already mounted",
                canonical.display(),
                FileId::MAX_SHARED_STORES
            );
            return false;
        }

        let ordinal = shared.len();
        let definition_ids: Vec<String> =
            state.definitions.iter().map(|d| d.id().to_string()).collect();
        match SharedStore::open(ordinal, canonical, definition_ids.iter().map(String::as_str)) {
            Ok(store) => {
                tracing::info!(
                    "Mounted shared index {} as #{} in {} ms",
                    store.path().display(),
                    store.ordinal(),
                    started.elapsed().as_millis()
                );
                shared.push(Arc::new(store));
                true
            }
            Err(e) => {
                tracing::debug!("Failed to mount shared index {}: {}", path.display(), e);
                false
            }
        }
    }

    pub fn shared_store_count(&self) -> usize {
        self.engine.shared.read().len()
    }

    /// Whether the local store holds entries of `index_id` for `file_id`.
    pub fn has_indexed(&self, index_id: &str, file_id: FileId) -> Result<bool> {
        if !file_id.is_local() {
            return Ok(false);
        }
        self.engine.db.read(|conn| {
            match IndexStorage::open_existing(conn, index_id)? {
                Some(storage) => storage.has_indexed(file_id),
                None => Ok(false),
            }
        })
    }

    /// Adds a listener and immediately hands it the current snapshot.
    pub fn add_progress_listener(&self, listener: Arc<dyn ProgressListener>) -> ListenerId {
        let snapshot = self.engine.snapshot();
        ProgressTracker::deliver(listener.as_ref(), &snapshot);
        self.engine.progress.add(listener)
    }

    pub fn remove_progress_listener(&self, id: ListenerId) -> bool {
        self.engine.progress.remove(id)
    }

    pub fn progress_snapshot(&self) -> ProgressSnapshot {
        self.engine.snapshot()
    }

    /// Paths of queued single-file updates in submission order, without the
    /// file currently being indexed.
    pub fn queued_file_paths(&self, limit: usize) -> Vec<String> {
        let current = self.engine.progress.current_file();
        self.engine
            .pending
            .keys_in_order(limit.saturating_add(1))
            .into_iter()
            .filter(|path| current.as_deref() != Some(path.as_str()))
            .take(limit)
            .collect()
    }

    pub fn is_disposed(&self) -> bool {
        self.engine.is_disposed()
    }

    /// Stops accepting work, lets the writer drain (bounded by the drain
    /// timeout) and closes the mounted stores. Safe to call more than once.
    pub fn dispose(&self) {
        if self.engine.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained = self.pipeline.shutdown();
        let cancelled = self.engine.pending.cancel_all();
        let closed = {
            let mut shared = self.engine.shared.write();
            let closed = shared.len();
            shared.clear();
            closed
        };
        self.engine.progress.clear_listeners();

        if drained {
            tracing::info!(
                "Index manager disposed ({} shared indexes closed, {} pending requests cancelled)",
                closed,
                cancelled
            );
        } else {
            tracing::warn!(
                "Index manager disposed before the writer drained ({} pending requests cancelled)",
                cancelled
            );
        }
    }
}

impl Drop for IndexManager {
    fn drop(&mut self) {
        self.dispose();
    }
}
