use std::sync::Arc;
use std::time::Instant;

use keyindex_api::{DefinitionRef, FileEvent, FileRef};
use keyindex_ingest::{CompletionHandle, Completer, Outcome, WritePipeline, completion};
use rayon::prelude::*;

use crate::error::{IndexError, Result};
use crate::manager::IndexManager;
use crate::manager::engine::Engine;
use crate::manager::extract::{Preparation, collect_files, needs_indexing, prepare_file};
use crate::manager::writer::{BatchGroup, WriteTask};

/// Keeps the bulk job counter honest even if a job panics.
struct BulkJobGuard<'a>(&'a Engine);

impl Drop for BulkJobGuard<'_> {
    fn drop(&mut self) {
        self.0.bulk_jobs.end();
    }
}

impl IndexManager {
    /// Queues `file` for re-indexing without waiting. Folders are walked.
    pub fn update_file(&self, file: &FileRef) {
        let _ = self.update_file_async(file);
    }

    /// Queues `file` and returns a handle that resolves once the writer has
    /// applied it. Rapid repeated calls for one path share a handle until
    /// the writer picks the work up.
    pub fn update_file_async(&self, file: &FileRef) -> CompletionHandle {
        if self.engine.is_disposed() {
            return CompletionHandle::completed(Outcome::Cancelled);
        }
        if file.is_folder() {
            return self.update_files_async(std::slice::from_ref(file));
        }
        if !file.exists() {
            return self.remove_file_async(file);
        }
        let definitions = self.engine.definitions();
        if !needs_indexing(&self.engine, file.as_ref(), &definitions) {
            return CompletionHandle::completed(Outcome::Skipped);
        }

        let (unit, is_new) = self.engine.pending.submit(file.path(), Arc::clone(file));
        let handle = unit.handle();
        if is_new {
            if let Err(e) = self.pipeline.submit(WriteTask::Request(Arc::clone(&unit))) {
                tracing::warn!("Cannot queue {}: {}", file.path(), e);
                self.engine.pending.take(&unit);
                unit.complete(Outcome::Cancelled);
            }
        }
        handle
    }

    /// Indexes many files (folders are walked) on the extraction pool and
    /// hands the results to the writer in batches. The handle resolves after
    /// the last batch.
    pub fn update_files_async(&self, files: &[FileRef]) -> CompletionHandle {
        if self.engine.is_disposed() {
            return CompletionHandle::completed(Outcome::Cancelled);
        }
        let roots = files.to_vec();
        let (completer, handle) = completion();
        self.spawn_bulk(move |engine, pipeline| {
            let mut collected = Vec::new();
            for root in &roots {
                collect_files(root, &mut collected);
            }
            let definitions = engine.definitions();
            let check_stamps = engine.config.skip_unchanged_files;
            index_files(engine, pipeline, collected, &definitions, check_stamps, completer);
        });
        handle
    }

    /// Initial scan of the given roots.
    pub fn process_roots(&self, roots: &[FileRef]) -> CompletionHandle {
        tracing::info!("Scanning {} roots", roots.len());
        self.update_files_async(roots)
    }

    pub fn remove_file(&self, file: &FileRef) {
        let _ = self.remove_file_async(file);
    }

    /// Drops `file` (and for folders, everything indexed below it) from every
    /// registered index.
    pub fn remove_file_async(&self, file: &FileRef) -> CompletionHandle {
        if self.engine.is_disposed() {
            return CompletionHandle::completed(Outcome::Cancelled);
        }
        let targets = self.engine.removal_targets(file.as_ref());
        if targets.is_empty() {
            return CompletionHandle::completed(Outcome::Skipped);
        }
        let (completer, handle) = completion();
        if let Err(e) = self.pipeline.submit(WriteTask::Remove { targets, completer }) {
            tracing::warn!("Cannot queue removal of {}: {}", file.path(), e);
        }
        handle
    }

    /// Applies one file system notification.
    pub fn handle_event(&self, event: FileEvent) {
        match event {
            FileEvent::Created(file) | FileEvent::Changed(file) => self.update_file(&file),
            FileEvent::Deleted(file) => self.remove_file(&file),
            FileEvent::Renamed { old, new } => {
                if let Some(old) = old {
                    if old.id().is_valid() && old.id() != new.id() {
                        self.remove_file(&old);
                    }
                }
                self.update_file(&new);
            }
        }
    }

    /// Drops pending requests and everything stored locally: entries, stamps
    /// and recorded versions. Shared stores are untouched.
    pub fn invalidate_local_caches(&self) -> CompletionHandle {
        if self.engine.is_disposed() {
            return CompletionHandle::completed(Outcome::Cancelled);
        }
        let cancelled = self.engine.pending.cancel_all();
        self.engine.progress.reset();
        tracing::info!(
            "Invalidating local caches ({} pending requests dropped)",
            cancelled
        );

        let (completer, handle) = completion();
        if let Err(e) = self.pipeline.submit(WriteTask::InvalidateAll(completer)) {
            tracing::warn!("Cannot queue cache invalidation: {}", e);
        }
        handle
    }

    /// Blocks until every queued update, bulk job and backfill has been
    /// applied and checkpointed. Returns immediately when nothing is queued.
    pub fn flush(&self) -> Result<()> {
        if self.engine.is_disposed() {
            return Ok(());
        }
        let budget = self.engine.config.flush_retry_budget.max(1);
        let mut rounds = 0;
        loop {
            if self.is_drained() {
                return Ok(());
            }
            let writer_idle =
                self.pipeline.stats().outstanding() == 0 && self.engine.pending.is_empty();
            if writer_idle && self.engine.bulk_jobs.active() > 0 {
                // only extraction is running; its batches are not queued yet
                self.engine.bulk_jobs.wait_idle();
                continue;
            }
            if rounds == budget {
                return Err(IndexError::DidNotDrain(budget));
            }
            self.pipeline.flush()?;
            rounds += 1;
        }
    }

    fn is_drained(&self) -> bool {
        self.engine.pending.is_empty()
            && self.engine.bulk_jobs.active() == 0
            && self.pipeline.stats().outstanding() == 0
            && !self.engine.progress.is_busy()
    }

    /// Runs only `definition` over `paths` in the background, without
    /// consulting stamps.
    pub(crate) fn schedule_backfill(&self, definition: DefinitionRef, paths: Vec<String>) {
        if paths.is_empty() {
            return;
        }
        self.spawn_bulk(move |engine, pipeline| {
            let files: Vec<FileRef> = paths.iter().filter_map(|path| engine.fs.find(path)).collect();
            tracing::info!(
                "Backfilling index '{}' over {} known files",
                definition.id(),
                files.len()
            );
            let (completer, _handle) = completion();
            index_files(engine, pipeline, files, &[definition], false, completer);
        });
    }

    fn spawn_bulk<F>(&self, job: F)
    where
        F: FnOnce(&Engine, &WritePipeline<WriteTask>) + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let pipeline = Arc::clone(&self.pipeline);
        engine.bulk_jobs.begin();
        self.engine.pool.spawn(move || {
            let _guard = BulkJobGuard(&engine);
            job(&engine, &pipeline);
        });
    }
}

/// Extracts `files` in parallel, one traversal batch at a time, and queues
/// each batch for the writer.
fn index_files(
    engine: &Engine,
    pipeline: &WritePipeline<WriteTask>,
    files: Vec<FileRef>,
    definitions: &[DefinitionRef],
    check_stamps: bool,
    completer: Completer,
) {
    if files.is_empty() {
        completer.complete(Outcome::Skipped);
        return;
    }
    let started = Instant::now();
    let total = files.len();
    let batch_size = engine.config.batch_size();
    let group = BatchGroup::new(files.len().div_ceil(batch_size), completer);
    let mut remaining = files.len();
    engine.progress.enqueue(remaining);

    for chunk in files.chunks(batch_size) {
        if engine.is_disposed() {
            break;
        }
        let prepared: Vec<_> = chunk
            .par_iter()
            .filter_map(|file| match prepare_file(engine, file, definitions, check_stamps) {
                Preparation::Ready(prepared) => Some(prepared),
                _ => None,
            })
            .collect();
        remaining -= chunk.len();

        if engine.progress.skip(chunk.len() - prepared.len()) {
            engine.notify_progress();
        }
        if prepared.is_empty() {
            group.finish(Outcome::Skipped);
            continue;
        }

        let count = prepared.len();
        let task = WriteTask::Batch {
            files: prepared,
            group: Arc::clone(&group),
        };
        if let Err(e) = pipeline.submit(task) {
            tracing::warn!("Stopping bulk indexing: {}", e);
            engine.progress.dequeue(count + remaining);
            return;
        }
    }
    engine.progress.dequeue(remaining);
    tracing::debug!(
        "Extracted {} files in {} ms",
        total,
        started.elapsed().as_millis()
    );
}
