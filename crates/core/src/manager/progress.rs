use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use keyindex_api::{ProgressListener, ProgressSnapshot};
use parking_lot::{Mutex, RwLock};

/// Handle returned by [`crate::IndexManager::add_progress_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Queue counters plus the listeners interested in them.
pub(crate) struct ProgressTracker {
    queued: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicU64,
    since_report: AtomicUsize,
    interval: usize,
    current: Mutex<Option<String>>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ProgressListener>)>>,
    next_listener: AtomicU64,
}

impl ProgressTracker {
    pub fn new(interval: usize) -> Self {
        Self {
            queued: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            since_report: AtomicUsize::new(0),
            interval: interval.max(1),
            current: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn add(&self, listener: Arc<dyn ProgressListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(candidate, _)| *candidate != id);
        listeners.len() != before
    }

    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
    }

    pub fn enqueue(&self, files: usize) {
        self.queued.fetch_add(files, Ordering::AcqRel);
    }

    pub fn dequeue(&self, files: usize) {
        saturating_sub(&self.queued, files);
    }

    /// Files handed to the writer.
    pub fn start(&self, current: Option<&str>, files: usize) {
        self.running.fetch_add(files, Ordering::AcqRel);
        *self.current.lock() = current.map(str::to_string);
    }

    /// Files the writer is done with. Returns whether listeners are due an
    /// update.
    pub fn finish(&self, files: usize) -> bool {
        saturating_sub(&self.running, files);
        self.current.lock().take();
        self.record_completed(files)
    }

    /// Files that were settled without reaching the writer.
    pub fn skip(&self, files: usize) -> bool {
        self.dequeue(files);
        self.record_completed(files)
    }

    pub fn is_busy(&self) -> bool {
        self.queued.load(Ordering::Acquire) > 0 || self.running.load(Ordering::Acquire) > 0
    }

    pub fn current_file(&self) -> Option<String> {
        self.current.lock().clone()
    }

    pub fn reset(&self) {
        self.queued.store(0, Ordering::Release);
        self.running.store(0, Ordering::Release);
        self.completed.store(0, Ordering::Release);
        self.since_report.store(0, Ordering::Release);
        self.current.lock().take();
    }

    /// `pending` counts coalesced requests that are not in a batch yet.
    pub fn snapshot(&self, pending: usize) -> ProgressSnapshot {
        ProgressSnapshot {
            queued_files: self.queued.load(Ordering::Acquire) + pending,
            running_files: self.running.load(Ordering::Acquire),
            completed_files: self.completed.load(Ordering::Acquire),
            current_file: self.current_file(),
        }
    }

    pub fn notify(&self, snapshot: &ProgressSnapshot) {
        let listeners: Vec<Arc<dyn ProgressListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            Self::deliver(listener.as_ref(), snapshot);
        }
    }

    /// Calls one listener, containing any panic it raises.
    pub fn deliver(listener: &dyn ProgressListener, snapshot: &ProgressSnapshot) {
        if panic::catch_unwind(AssertUnwindSafe(|| listener.on_progress(snapshot))).is_err() {
            tracing::warn!("Progress listener panicked; ignoring");
        }
    }

    fn record_completed(&self, files: usize) -> bool {
        if files == 0 {
            return false;
        }
        self.completed.fetch_add(files as u64, Ordering::AcqRel);
        let seen = self.since_report.fetch_add(files, Ordering::AcqRel) + files;
        if seen >= self.interval {
            self.since_report.store(0, Ordering::Release);
            return true;
        }
        !self.is_busy()
    }
}

fn saturating_sub(counter: &AtomicUsize, amount: usize) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
        Some(value.saturating_sub(amount))
    });
}
