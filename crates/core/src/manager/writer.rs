use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use keyindex_api::{FileId, FileRef};
use keyindex_ingest::{CommitSink, Completer, IngestError, Outcome, PendingUnit};
use parking_lot::Mutex;

use crate::error::Result;
use crate::manager::engine::Engine;
use crate::manager::extract::{Preparation, PreparedFile, prepare_file};

/// Work applied by the writer thread, in submission order.
pub(crate) enum WriteTask {
    /// A coalesced single-file update. The file is read when the writer
    /// dispatches it, so the latest submission wins.
    Request(Arc<PendingUnit<FileRef>>),
    /// Files already extracted on the worker pool.
    Batch {
        files: Vec<PreparedFile>,
        group: Arc<BatchGroup>,
    },
    Remove {
        targets: Vec<(FileId, String)>,
        completer: Completer,
    },
    InvalidateAll(Completer),
}

/// Tracks the batches of one bulk submission and resolves its handle once
/// the last of them is done.
pub(crate) struct BatchGroup {
    remaining: AtomicUsize,
    committed: AtomicBool,
    failed: AtomicBool,
    completer: Mutex<Option<Completer>>,
}

impl BatchGroup {
    pub fn new(batches: usize, completer: Completer) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(batches),
            committed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            completer: Mutex::new(Some(completer)),
        })
    }

    pub fn finish(&self, outcome: Outcome) {
        match outcome {
            Outcome::Committed => self.committed.store(true, Ordering::Release),
            Outcome::RolledBack | Outcome::Cancelled => self.failed.store(true, Ordering::Release),
            Outcome::Skipped => {}
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let overall = if self.failed.load(Ordering::Acquire) {
            Outcome::RolledBack
        } else if self.committed.load(Ordering::Acquire) {
            Outcome::Committed
        } else {
            Outcome::Skipped
        };
        if let Some(completer) = self.completer.lock().take() {
            completer.complete(overall);
        }
    }
}

/// The engine side of the write pipeline.
pub(crate) struct IndexWriter {
    engine: Arc<Engine>,
}

impl IndexWriter {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    fn run_request(&self, unit: &PendingUnit<FileRef>, taken: bool) -> Result<usize> {
        if !taken {
            // cancelled by a cache invalidation while queued
            return Ok(0);
        }
        let engine = &self.engine;
        let file = unit.latest();
        engine.progress.start(Some(file.path()), 1);

        let definitions = engine.definitions();
        let result = match prepare_file(
            engine,
            &file,
            &definitions,
            engine.config.skip_unchanged_files,
        ) {
            Preparation::Ready(prepared) => engine
                .apply(std::slice::from_ref(&prepared))
                .map(|n| (n, Outcome::Committed)),
            Preparation::Missing => engine
                .remove(&engine.removal_targets(file.as_ref()))
                .map(|n| (n, Outcome::Committed)),
            Preparation::UpToDate | Preparation::Ignored => Ok((0, Outcome::Skipped)),
        };

        if engine.progress.finish(1) {
            engine.notify_progress();
        }
        match result {
            Ok((applied, outcome)) => {
                unit.complete(outcome);
                Ok(applied)
            }
            Err(e) => {
                unit.complete(Outcome::RolledBack);
                Err(e)
            }
        }
    }

    fn run_batch(&self, files: Vec<PreparedFile>, group: &BatchGroup) -> Result<usize> {
        let engine = &self.engine;
        let count = files.len();
        engine.progress.dequeue(count);
        engine.progress.start(None, count);

        let result = engine.apply(&files);

        if engine.progress.finish(count) {
            engine.notify_progress();
        }
        group.finish(if result.is_ok() {
            Outcome::Committed
        } else {
            Outcome::RolledBack
        });
        result
    }

    fn run_remove(&self, targets: &[(FileId, String)], completer: Completer) -> Result<usize> {
        match self.engine.remove(targets) {
            Ok(removed) => {
                completer.complete(Outcome::Committed);
                Ok(removed)
            }
            Err(e) => {
                completer.complete(Outcome::RolledBack);
                Err(e)
            }
        }
    }

    fn run_invalidate(&self, completer: Completer) -> Result<usize> {
        let result = self.engine.clear_local();
        completer.complete(if result.is_ok() {
            Outcome::Committed
        } else {
            Outcome::RolledBack
        });
        self.engine.notify_progress();
        result.map(|()| 0)
    }
}

impl CommitSink<WriteTask> for IndexWriter {
    fn commit_batch(&self, seq: u64, task: WriteTask) -> std::result::Result<usize, IngestError> {
        let result = match task {
            WriteTask::Request(unit) => {
                let taken = self.engine.pending.take(&unit);
                self.run_request(&unit, taken)
            }
            WriteTask::Batch { files, group } => self.run_batch(files, &group),
            WriteTask::Remove { targets, completer } => self.run_remove(&targets, completer),
            WriteTask::InvalidateAll(completer) => self.run_invalidate(completer),
        };
        result.map_err(|e| IngestError::Commit(format!("task {seq}: {e}")))
    }

    fn checkpoint(&self) -> std::result::Result<(), IngestError> {
        self.engine
            .db
            .checkpoint()
            .map_err(|e| IngestError::Storage(e.to_string()))
    }
}
