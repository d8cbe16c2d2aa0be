use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::UNIX_EPOCH;

use dashmap::DashMap;
use keyindex_api::{FileId, FileObject, FileRef, FileSystem};
use walkdir::WalkDir;

struct Registry {
    ids: DashMap<String, FileId>,
    paths: DashMap<FileId, PathBuf>,
    next_id: AtomicU32,
}

impl Registry {
    fn id_for(&self, key: &str, path: &Path) -> FileId {
        *self.ids.entry(key.to_string()).or_insert_with(|| {
            let id = FileId::new(self.next_id.fetch_add(1, Ordering::AcqRel));
            self.paths.insert(id, path.to_path_buf());
            id
        })
    }
}

/// Files on disk. Ids are handed out per path on first sight and stay
/// stable for the lifetime of this value, including after deletion.
#[derive(Clone)]
pub struct LocalFileSystem {
    registry: Arc<Registry>,
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFileSystem {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                ids: DashMap::new(),
                paths: DashMap::new(),
                next_id: AtomicU32::new(1),
            }),
        }
    }

    pub fn file(&self, path: &Path) -> FileRef {
        let key = path_key(path);
        let id = self.registry.id_for(&key, path);
        Arc::new(LocalFile {
            id,
            key,
            fs_path: path.to_path_buf(),
            registry: Arc::clone(&self.registry),
        })
    }

    /// A file that was seen before, even if it is gone now.
    pub fn lookup(&self, path: &Path) -> Option<FileRef> {
        self.registry
            .ids
            .contains_key(&path_key(path))
            .then(|| self.file(path))
    }

    /// Every regular file below `root`, in file name order.
    pub fn files_under(&self, root: &Path) -> Vec<FileRef> {
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| self.file(entry.path()))
            .collect()
    }
}

impl FileSystem for LocalFileSystem {
    fn find(&self, path: &str) -> Option<FileRef> {
        let fs_path = Path::new(path);
        if fs_path.exists() {
            return Some(self.file(fs_path));
        }
        self.lookup(fs_path)
    }

    fn find_by_id(&self, id: FileId) -> Option<FileRef> {
        let path = self.registry.paths.get(&id)?.value().clone();
        Some(self.file(&path))
    }
}

pub struct LocalFile {
    id: FileId,
    key: String,
    fs_path: PathBuf,
    registry: Arc<Registry>,
}

impl LocalFile {
    pub fn fs_path(&self) -> &Path {
        &self.fs_path
    }
}

impl fmt::Debug for LocalFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFile")
            .field("id", &self.id)
            .field("path", &self.key)
            .finish()
    }
}

impl FileObject for LocalFile {
    fn id(&self) -> FileId {
        self.id
    }

    fn path(&self) -> &str {
        &self.key
    }

    fn exists(&self) -> bool {
        self.fs_path.exists()
    }

    fn is_folder(&self) -> bool {
        self.fs_path.is_dir()
    }

    fn last_modified(&self) -> io::Result<i64> {
        let modified = std::fs::metadata(&self.fs_path)?.modified()?;
        let since_epoch = modified.duration_since(UNIX_EPOCH).map_err(io::Error::other)?;
        Ok(since_epoch.as_millis() as i64)
    }

    fn length(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.fs_path)?.len())
    }

    fn content(&self) -> io::Result<Vec<u8>> {
        std::fs::read(&self.fs_path)
    }

    fn children(&self) -> io::Result<Vec<FileRef>> {
        if !self.is_folder() {
            return Ok(Vec::new());
        }
        let mut children = Vec::new();
        for entry in WalkDir::new(&self.fs_path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            let key = path_key(entry.path());
            let id = self.registry.id_for(&key, entry.path());
            children.push(Arc::new(LocalFile {
                id,
                key,
                fs_path: entry.into_path(),
                registry: Arc::clone(&self.registry),
            }) as FileRef);
        }
        Ok(children)
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
