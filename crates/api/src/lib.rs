//! Collaborator-facing types of the keyindex engine.
//!
//! Everything an index definition, a file system backend or a query caller
//! needs to talk to the engine lives here; the engine itself is in
//! `keyindex-core`.

pub mod definition;
pub mod error;
pub mod event;
pub mod file;
pub mod filter;
pub mod memory;
pub mod progress;
pub mod scope;

pub use definition::{
    DefinitionRef, DynIndexDefinition, ExtractionInput, IndexDefinition, SerializedEntries,
};
pub use error::{ExtractionError, ExtractionResult};
pub use event::FileEvent;
pub use file::{FileId, FileObject, FileRef, FileSystem};
pub use filter::IndexFilter;
pub use memory::MemoryFileSystem;
pub use progress::{ProgressListener, ProgressSnapshot};
pub use scope::{AllFiles, AnyOf, FileSet, LocalFiles, SearchScope, SharedFiles};
