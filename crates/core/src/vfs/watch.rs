use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use keyindex_api::FileEvent;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, Result};
use crate::manager::IndexManager;
use crate::vfs::LocalFileSystem;

const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(500);

pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl FsWatcher {
    pub fn new(root: &Path) -> notify::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await? {
                Ok(event) => return Some(event),
                Err(e) => tracing::warn!("File watcher error: {}", e),
            }
        }
    }
}

/// Maps one notify event onto the engine's file events.
pub fn translate(event: &Event, fs: &LocalFileSystem) -> Vec<FileEvent> {
    let existing_or_deleted = |path: &PathBuf| {
        let file = fs.file(path);
        if file.exists() {
            FileEvent::Changed(file)
        } else {
            FileEvent::Deleted(file)
        }
    };

    match &event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|path| FileEvent::Created(fs.file(path)))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            vec![FileEvent::Renamed {
                old: fs.lookup(&event.paths[0]),
                new: fs.file(&event.paths[1]),
            }]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .map(|path| FileEvent::Deleted(fs.file(path)))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .map(|path| FileEvent::Created(fs.file(path)))
            .collect(),
        EventKind::Modify(_) | EventKind::Any => {
            event.paths.iter().map(existing_or_deleted).collect()
        }
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|path| FileEvent::Deleted(fs.file(path)))
            .collect(),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}

/// Watches `root` and feeds debounced changes to `manager` until `cancel`
/// fires or the manager is dropped. Must be called inside a tokio runtime.
pub fn spawn_watch(
    manager: &Arc<IndexManager>,
    fs: LocalFileSystem,
    root: PathBuf,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let mut watcher = FsWatcher::new(&root)
        .map_err(|e| IndexError::Io(std::io::Error::other(e.to_string())))?;
    let manager: Weak<IndexManager> = Arc::downgrade(manager);

    Ok(tokio::spawn(async move {
        tracing::info!("Started watching {}", root.display());
        // latest event per path
        let mut pending: BTreeMap<String, FileEvent> = BTreeMap::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                }
                event = watcher.next_event() => {
                    match event {
                        Some(event) => {
                            for file_event in translate(&event, &fs) {
                                pending.insert(file_event.file().path().to_string(), file_event);
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(DEBOUNCE_INTERVAL), if !pending.is_empty() => {
                    let Some(manager) = manager.upgrade() else {
                        break;
                    };
                    if manager.is_disposed() {
                        break;
                    }
                    tracing::info!("Detected changes in {} files. Updating...", pending.len());
                    for (_, file_event) in std::mem::take(&mut pending) {
                        manager.handle_event(file_event);
                    }
                }
            }
        }
        tracing::info!("File watcher task ended for {}", root.display());
    }))
}
