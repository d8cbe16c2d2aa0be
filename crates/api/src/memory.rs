//! In-memory file system backend, used by tests and by embedders that feed
//! editor buffers straight into the engine.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::file::{FileId, FileObject, FileRef, FileSystem};

#[derive(Default)]
struct Registry {
    by_path: BTreeMap<String, Arc<MemoryFile>>,
    by_id: HashMap<FileId, Arc<MemoryFile>>,
}

struct Shared {
    registry: RwLock<Registry>,
    next_id: AtomicU32,
    clock: AtomicI64,
}

/// Files live until deleted; a deleted path written again gets a fresh id.
#[derive(Clone)]
pub struct MemoryFileSystem {
    shared: Arc<Shared>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry::default()),
                next_id: AtomicU32::new(1),
                clock: AtomicI64::new(1_000),
            }),
        }
    }

    /// Creates or overwrites a file, creating missing parent folders.
    /// Every write advances the modification time.
    pub fn write(&self, path: &str, content: impl Into<Vec<u8>>) -> FileRef {
        let path = normalize(path);
        let content = content.into();
        let modified = self.tick();

        if let Some(parent) = parent_of(&path) {
            self.ensure_folder(parent);
        }

        let mut registry = self.shared.registry.write();
        if let Some(existing) = registry.by_path.get(&path) {
            if !existing.folder {
                let mut state = existing.state.write();
                state.content = content;
                state.modified = modified;
                return existing.clone();
            }
        }
        let file = self.allocate(&path, false, content, modified);
        registry.by_path.insert(path, file.clone());
        registry.by_id.insert(file.id, file.clone());
        file
    }

    pub fn folder(&self, path: &str) -> FileRef {
        self.ensure_folder(&normalize(path))
    }

    /// Marks a file (and for folders, everything below it) as deleted.
    /// Returns the removed file so callers can report the deletion.
    pub fn delete(&self, path: &str) -> Option<FileRef> {
        let path = normalize(path);
        let mut registry = self.shared.registry.write();
        let file = registry.by_path.remove(&path)?;
        file.state.write().exists = false;

        if file.folder {
            let prefix = format!("{path}/");
            let nested: Vec<String> = registry
                .by_path
                .range(prefix.clone()..)
                .take_while(|(p, _)| p.starts_with(&prefix))
                .map(|(p, _)| p.clone())
                .collect();
            for p in nested {
                if let Some(child) = registry.by_path.remove(&p) {
                    child.state.write().exists = false;
                }
            }
        }
        Some(file as FileRef)
    }

    /// Moves a file to a new path. The moved file gets a new id, as a fresh
    /// entry in a path-keyed registry would.
    pub fn rename(&self, from: &str, to: &str) -> Option<(FileRef, FileRef)> {
        let content = self.find(from)?.content().unwrap_or_default();
        let old = self.delete(from)?;
        let new = self.write(to, content);
        Some((old, new))
    }

    pub fn len(&self) -> usize {
        self.shared.registry.read().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_folder(&self, path: &str) -> FileRef {
        if let Some(existing) = self.shared.registry.read().by_path.get(path) {
            return existing.clone();
        }
        if let Some(parent) = parent_of(path) {
            self.ensure_folder(parent);
        }
        let modified = self.tick();
        let mut registry = self.shared.registry.write();
        if let Some(existing) = registry.by_path.get(path) {
            return existing.clone();
        }
        let folder = self.allocate(path, true, Vec::new(), modified);
        registry.by_path.insert(path.to_string(), folder.clone());
        registry.by_id.insert(folder.id, folder.clone());
        folder
    }

    fn allocate(&self, path: &str, folder: bool, content: Vec<u8>, modified: i64) -> Arc<MemoryFile> {
        Arc::new(MemoryFile {
            id: FileId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed)),
            path: path.to_string(),
            folder,
            owner: Arc::downgrade(&self.shared),
            state: RwLock::new(FileState {
                content,
                modified,
                exists: true,
            }),
        })
    }

    fn tick(&self) -> i64 {
        self.shared.clock.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl FileSystem for MemoryFileSystem {
    fn find(&self, path: &str) -> Option<FileRef> {
        let file: FileRef = self.shared.registry.read().by_path.get(&normalize(path))?.clone();
        Some(file)
    }

    fn find_by_id(&self, id: FileId) -> Option<FileRef> {
        let file: FileRef = self.shared.registry.read().by_id.get(&id)?.clone();
        Some(file)
    }
}

struct FileState {
    content: Vec<u8>,
    modified: i64,
    exists: bool,
}

pub struct MemoryFile {
    id: FileId,
    path: String,
    folder: bool,
    owner: Weak<Shared>,
    state: RwLock<FileState>,
}

impl fmt::Debug for MemoryFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryFile")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("folder", &self.folder)
            .finish()
    }
}

impl MemoryFile {
    fn check_exists(&self) -> io::Result<()> {
        if self.state.read().exists {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, self.path.clone()))
        }
    }
}

impl FileObject for MemoryFile {
    fn id(&self) -> FileId {
        self.id
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn exists(&self) -> bool {
        self.state.read().exists
    }

    fn is_folder(&self) -> bool {
        self.folder
    }

    fn last_modified(&self) -> io::Result<i64> {
        self.check_exists()?;
        Ok(self.state.read().modified)
    }

    fn length(&self) -> io::Result<u64> {
        self.check_exists()?;
        Ok(self.state.read().content.len() as u64)
    }

    fn content(&self) -> io::Result<Vec<u8>> {
        self.check_exists()?;
        Ok(self.state.read().content.clone())
    }

    fn children(&self) -> io::Result<Vec<FileRef>> {
        if !self.folder {
            return Ok(Vec::new());
        }
        self.check_exists()?;
        let Some(owner) = self.owner.upgrade() else {
            return Ok(Vec::new());
        };
        let prefix = format!("{}/", self.path.trim_end_matches('/'));
        let registry = owner.registry.read();
        Ok(registry
            .by_path
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter(|(p, _)| !p[prefix.len()..].contains('/'))
            .map(|(_, file)| file.clone() as FileRef)
            .collect())
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_creates_parents_and_lists_children() {
        let fs = MemoryFileSystem::new();
        let a = fs.write("/src/A.java", "class A {}");
        fs.write("/src/pkg/B.java", "class B {}");

        let src = fs.find("/src").expect("parent folder");
        assert!(src.is_folder());
        let names: Vec<String> = src
            .children()
            .unwrap()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["A.java".to_string(), "pkg".to_string()]);
        assert_eq!(a.extension(), Some("java"));
        assert_eq!(fs.find_by_id(a.id()).unwrap().path(), "/src/A.java");
    }

    #[test]
    fn test_rewrite_keeps_id_and_advances_mtime() {
        let fs = MemoryFileSystem::new();
        let first = fs.write("/A.txt", "one");
        let before = first.last_modified().unwrap();
        let second = fs.write("/A.txt", "three");

        assert_eq!(first.id(), second.id());
        assert!(second.last_modified().unwrap() > before);
        assert_eq!(first.length().unwrap(), 5);
    }

    #[test]
    fn test_delete_and_rename() {
        let fs = MemoryFileSystem::new();
        let file = fs.write("/dir/old.txt", "x");
        let (old, new) = fs.rename("/dir/old.txt", "/dir/new.txt").unwrap();

        assert_eq!(old.id(), file.id());
        assert!(!file.exists());
        assert_ne!(old.id(), new.id());
        assert!(fs.find("/dir/old.txt").is_none());
        assert!(file.content().is_err());

        fs.delete("/dir");
        assert!(!new.exists());
        assert!(fs.find("/dir/new.txt").is_none());
    }
}
