//! Incremental, persistent key to value indexing.
//!
//! Definitions map files to `(key, value)` entries; the [`IndexManager`]
//! keeps a forward map (file -> keys) and an inverted map (key -> packets)
//! per definition in a local store, re-extracts files only when they change,
//! and federates read-only shared stores into every query.

pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod shared;
pub mod storage;
pub mod vfs;

pub use config::{IndexingConfig, VersionBumpPolicy, default_cache_dir};
pub use error::{IndexError, Result};
pub use manager::{IndexManager, IndexManagerBuilder, ListenerId};
pub use shared::SharedIndexBuilder;

pub use keyindex_ingest::{CompletionHandle, Outcome};
