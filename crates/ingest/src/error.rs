use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("pipeline closed: {0}")]
    Closed(String),
    #[error("commit failed: {0}")]
    Commit(String),
    #[error("storage failed: {0}")]
    Storage(String),
    #[error("failed to spawn writer thread: {0}")]
    Spawn(#[from] std::io::Error),
}
