//! Domain-neutral write machinery: a bounded queue drained by one dedicated
//! writer thread, flush barriers, and per-key request coalescing.

pub mod coalesce;
pub mod completion;
pub mod error;
pub mod pipeline;
pub mod traits;
pub mod types;

pub use coalesce::{PendingUnit, RequestCoalescer};
pub use completion::{CompletionHandle, Completer, Outcome, completion};
pub use error::IngestError;
pub use pipeline::WritePipeline;
pub use traits::CommitSink;
pub use types::{PipelineConfig, PipelineState, PipelineStats};
