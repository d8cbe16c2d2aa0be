use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::IngestError;
use crate::traits::CommitSink;
use crate::types::{PipelineConfig, PipelineState, PipelineStats};

enum QueueEntry<T> {
    Batch { seq: u64, batch: T },
    Barrier(oneshot::Sender<()>),
}

/// Bounded FIFO of batches applied one at a time by a dedicated writer
/// thread.
///
/// Submitting blocks while the queue is full. A failed batch is logged and
/// skipped; the writer keeps going. [`WritePipeline::flush`] returns once
/// everything submitted before it has been applied and checkpointed.
pub struct WritePipeline<T: Send + 'static> {
    tx: Sender<QueueEntry<T>>,
    state: Arc<AtomicU8>,
    stats: Arc<PipelineStats>,
    done_rx: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: PipelineConfig,
}

impl<T: Send + 'static> WritePipeline<T> {
    pub fn start<S>(sink: Arc<S>, config: PipelineConfig) -> Result<Self, IngestError>
    where
        S: CommitSink<T> + ?Sized + 'static,
    {
        let (tx, rx) = bounded::<QueueEntry<T>>(config.queue_capacity.max(1));
        let (done_tx, done_rx) = bounded::<()>(1);
        let state = Arc::new(AtomicU8::new(PipelineState::Running.as_u8()));
        let stats = Arc::new(PipelineStats::default());

        let worker = {
            let state = Arc::clone(&state);
            let stats = Arc::clone(&stats);
            let poll = config.poll_interval();
            std::thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(move || {
                    writer_loop(rx, sink.as_ref(), &state, &stats, poll);
                    state.store(PipelineState::Stopped.as_u8(), Ordering::Release);
                    let _ = done_tx.send(());
                })?
        };

        Ok(Self {
            tx,
            state,
            stats,
            done_rx,
            worker: Mutex::new(Some(worker)),
            config,
        })
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    /// Enqueues a batch, blocking while the queue is full.
    pub fn submit(&self, batch: T) -> Result<u64, IngestError> {
        if self.state() != PipelineState::Running {
            return Err(IngestError::Closed("writer is not accepting work".to_string()));
        }
        let seq = self.stats.submitted.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(QueueEntry::Batch { seq, batch }).is_err() {
            self.stats.failed.fetch_add(1, Ordering::AcqRel);
            return Err(IngestError::Closed("writer thread has exited".to_string()));
        }
        Ok(seq)
    }

    /// Blocks until every batch submitted before this call has been applied
    /// and the sink has checkpointed.
    pub fn flush(&self) -> Result<(), IngestError> {
        if self.state() == PipelineState::Stopped {
            return Err(IngestError::Closed("writer thread has exited".to_string()));
        }
        let (barrier_tx, barrier_rx) = oneshot::channel();
        self.tx
            .send(QueueEntry::Barrier(barrier_tx))
            .map_err(|_| IngestError::Closed("writer thread has exited".to_string()))?;
        futures::executor::block_on(barrier_rx)
            .map_err(|_| IngestError::Closed("flush barrier dropped".to_string()))
    }

    /// Stops accepting work and waits (bounded by the configured drain
    /// timeout) for the writer to empty the queue. Returns whether the writer
    /// finished in time. Calling it again is a no-op.
    pub fn shutdown(&self) -> bool {
        let _ = self.state.compare_exchange(
            PipelineState::Running.as_u8(),
            PipelineState::Draining.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        let Some(worker) = self.worker.lock().take() else {
            return true;
        };

        match self.done_rx.recv_timeout(self.config.drain_timeout()) {
            Ok(()) => {
                if worker.join().is_err() {
                    tracing::error!("writer thread panicked during shutdown");
                }
                true
            }
            Err(_) => {
                tracing::warn!(
                    queued = self.tx.len(),
                    timeout_ms = self.config.drain_timeout_ms,
                    "writer did not drain before timeout"
                );
                false
            }
        }
    }
}

impl<T: Send + 'static> Drop for WritePipeline<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn writer_loop<T, S>(
    rx: Receiver<QueueEntry<T>>,
    sink: &S,
    state: &AtomicU8,
    stats: &PipelineStats,
    poll: std::time::Duration,
) where
    S: CommitSink<T> + ?Sized,
{
    loop {
        match rx.recv_timeout(poll) {
            Ok(QueueEntry::Batch { seq, batch }) => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| sink.commit_batch(seq, batch)));
                match result {
                    Ok(Ok(applied)) => {
                        stats.committed.fetch_add(1, Ordering::AcqRel);
                        tracing::debug!(seq, applied, "batch committed");
                    }
                    Ok(Err(e)) => {
                        stats.failed.fetch_add(1, Ordering::AcqRel);
                        tracing::warn!(seq, error = %e, "batch rolled back");
                    }
                    Err(_) => {
                        stats.failed.fetch_add(1, Ordering::AcqRel);
                        tracing::error!(seq, "batch panicked; work of this batch is lost");
                    }
                }
            }
            Ok(QueueEntry::Barrier(done)) => {
                stats.barriers.fetch_add(1, Ordering::AcqRel);
                if let Err(e) = sink.checkpoint() {
                    tracing::warn!(error = %e, "checkpoint at flush barrier failed");
                }
                let _ = done.send(());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if PipelineState::from_u8(state.load(Ordering::Acquire)) != PipelineState::Running
            && rx.is_empty()
        {
            break;
        }
    }

    if let Err(e) = sink.checkpoint() {
        tracing::warn!(error = %e, "final checkpoint failed");
    }
    tracing::debug!("writer thread exiting");
}
