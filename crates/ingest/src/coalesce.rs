use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use crate::completion::{CompletionHandle, Completer, Outcome, completion};

/// One coalesced unit of pending work for a key.
///
/// Resubmitting the key while the unit is still queued replaces the payload
/// in place and bumps [`PendingUnit::version`]; every submitter shares the
/// unit's completion handle.
pub struct PendingUnit<T> {
    key: String,
    order: u64,
    version: AtomicU64,
    payload: Mutex<T>,
    completer: Mutex<Option<Completer>>,
    handle: CompletionHandle,
}

impl<T: Clone> PendingUnit<T> {
    fn new(key: String, order: u64, payload: T) -> Self {
        let (completer, handle) = completion();
        Self {
            key,
            order,
            version: AtomicU64::new(1),
            payload: Mutex::new(payload),
            completer: Mutex::new(Some(completer)),
            handle,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Position in submission order, used for queue listings.
    pub fn order(&self) -> u64 {
        self.order
    }

    /// Number of submissions merged into this unit.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// The payload of the most recent submission.
    pub fn latest(&self) -> T {
        self.payload.lock().clone()
    }

    pub fn handle(&self) -> CompletionHandle {
        self.handle.clone()
    }

    /// Resolves the shared handle. Later calls are ignored.
    pub fn complete(&self, outcome: Outcome) {
        if let Some(completer) = self.completer.lock().take() {
            completer.complete(outcome);
        }
    }

    fn replace(&self, payload: T) {
        *self.payload.lock() = payload;
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}

/// Per-key table of work that has been submitted but not yet picked up by
/// the writer.
pub struct RequestCoalescer<T> {
    pending: DashMap<String, Arc<PendingUnit<T>>>,
    next_order: AtomicU64,
}

impl<T> Default for RequestCoalescer<T> {
    fn default() -> Self {
        Self {
            pending: DashMap::new(),
            next_order: AtomicU64::new(0),
        }
    }
}

impl<T: Clone> RequestCoalescer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers work for `key`. Returns the unit carrying it and whether the
    /// unit is new; only new units need to be queued by the caller.
    pub fn submit(&self, key: &str, payload: T) -> (Arc<PendingUnit<T>>, bool) {
        match self.pending.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                let unit = Arc::clone(entry.get());
                unit.replace(payload);
                (unit, false)
            }
            Entry::Vacant(entry) => {
                let order = self.next_order.fetch_add(1, Ordering::AcqRel);
                let unit = Arc::new(PendingUnit::new(key.to_string(), order, payload));
                entry.insert(Arc::clone(&unit));
                (unit, true)
            }
        }
    }

    /// Removes `unit` from the table if it is still the pending unit for its
    /// key. After this returns, a new submission for the key starts a new unit,
    /// so the payload read afterwards is final for this unit.
    pub fn take(&self, unit: &Arc<PendingUnit<T>>) -> bool {
        self.pending
            .remove_if(unit.key(), |_, current| Arc::ptr_eq(current, unit))
            .is_some()
    }

    pub fn get(&self, key: &str) -> Option<Arc<PendingUnit<T>>> {
        self.pending.get(key).map(|unit| Arc::clone(unit.value()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending keys in submission order.
    pub fn keys_in_order(&self, limit: usize) -> Vec<String> {
        let mut keys: Vec<(u64, String)> = self
            .pending
            .iter()
            .map(|unit| (unit.order(), unit.key().to_string()))
            .collect();
        keys.sort_unstable_by_key(|(order, _)| *order);
        keys.into_iter().take(limit).map(|(_, key)| key).collect()
    }

    /// Drops every pending unit, resolving their handles as cancelled.
    pub fn cancel_all(&self) -> usize {
        let keys: Vec<String> = self.pending.iter().map(|unit| unit.key().to_string()).collect();
        let mut cancelled = 0;
        for key in keys {
            if let Some((_, unit)) = self.pending.remove(&key) {
                unit.complete(Outcome::Cancelled);
                cancelled += 1;
            }
        }
        cancelled
    }
}
