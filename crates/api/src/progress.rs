use serde::Serialize;

/// Point-in-time view of the indexing queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// Files waiting for the writer.
    pub queued_files: usize,
    /// Files handed to the writer whose batch has not finished.
    pub running_files: usize,
    /// Files processed since open (or the last cache invalidation).
    pub completed_files: u64,
    pub current_file: Option<String>,
}

impl ProgressSnapshot {
    pub fn is_idle(&self) -> bool {
        self.queued_files == 0 && self.running_files == 0
    }
}

pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressSnapshot) + Send + Sync,
{
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self(snapshot)
    }
}
