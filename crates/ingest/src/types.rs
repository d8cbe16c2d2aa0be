use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
    pub drain_timeout_ms: u64,
    pub thread_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            poll_interval_ms: 100,
            drain_timeout_ms: 30_000,
            thread_name: "keyindex-writer".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// `Running` accepts work; `Draining` refuses new work while the writer
/// empties the queue; `Stopped` means the writer thread has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Draining,
    Stopped,
}

impl PipelineState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            PipelineState::Running => 0,
            PipelineState::Draining => 1,
            PipelineState::Stopped => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Running,
            1 => PipelineState::Draining,
            _ => PipelineState::Stopped,
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub(crate) submitted: AtomicU64,
    pub(crate) committed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) barriers: AtomicU64,
}

impl PipelineStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    pub fn barriers(&self) -> u64 {
        self.barriers.load(Ordering::Acquire)
    }

    /// Batches submitted but not yet committed or rolled back.
    pub fn outstanding(&self) -> u64 {
        self.submitted()
            .saturating_sub(self.committed() + self.failed())
    }
}
