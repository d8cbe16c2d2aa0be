use crate::file::FileRef;

/// File system change as reported by a watcher backend.
///
/// Events only decide whether a path gets resubmitted; they never touch
/// storage directly.
#[derive(Debug, Clone)]
pub enum FileEvent {
    Created(FileRef),
    Changed(FileRef),
    Deleted(FileRef),
    Renamed { old: Option<FileRef>, new: FileRef },
}

impl FileEvent {
    /// The file the event is about; the new side for renames.
    pub fn file(&self) -> &FileRef {
        match self {
            FileEvent::Created(file) | FileEvent::Changed(file) | FileEvent::Deleted(file) => file,
            FileEvent::Renamed { new, .. } => new,
        }
    }
}
