use crate::error::IngestError;

/// Receiving end of a [`crate::WritePipeline`].
///
/// Only the writer thread calls into a sink, so implementations may assume
/// mutations never race with each other.
pub trait CommitSink<T>: Send + Sync {
    /// Applies one batch atomically. An error means nothing of the batch was
    /// kept; the pipeline logs it and moves on to the next entry.
    fn commit_batch(&self, seq: u64, batch: T) -> Result<usize, IngestError>;

    /// Makes everything committed so far durable. Called for flush barriers
    /// and once more when the writer exits.
    fn checkpoint(&self) -> Result<(), IngestError> {
        Ok(())
    }
}
