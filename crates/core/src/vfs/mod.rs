//! Disk-backed [`keyindex_api::FileSystem`] and a notify-based watcher that
//! turns disk changes into [`keyindex_api::FileEvent`]s.

mod local;
mod watch;

pub use local::{LocalFile, LocalFileSystem};
pub use watch::{FsWatcher, spawn_watch, translate};
