//! Query scopes: predicates over file ids that restrict query results.

use std::collections::HashSet;

use crate::file::FileId;

pub trait SearchScope: Send + Sync {
    fn contains(&self, file_id: FileId) -> bool;
}

impl<F> SearchScope for F
where
    F: Fn(FileId) -> bool + Send + Sync,
{
    fn contains(&self, file_id: FileId) -> bool {
        self(file_id)
    }
}

/// Every file, local or shared.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllFiles;

impl SearchScope for AllFiles {
    fn contains(&self, _file_id: FileId) -> bool {
        true
    }
}

/// Only files of the local store.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

impl SearchScope for LocalFiles {
    fn contains(&self, file_id: FileId) -> bool {
        !file_id.is_shared()
    }
}

/// Only files coming from mounted shared stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedFiles;

impl SearchScope for SharedFiles {
    fn contains(&self, file_id: FileId) -> bool {
        file_id.is_shared()
    }
}

/// An explicit set of files.
#[derive(Debug, Clone, Default)]
pub struct FileSet(HashSet<FileId>);

impl FileSet {
    pub fn insert(&mut self, file_id: FileId) -> bool {
        self.0.insert(file_id)
    }
}

impl FromIterator<FileId> for FileSet {
    fn from_iter<I: IntoIterator<Item = FileId>>(iter: I) -> Self {
        FileSet(iter.into_iter().collect())
    }
}

impl SearchScope for FileSet {
    fn contains(&self, file_id: FileId) -> bool {
        self.0.contains(&file_id)
    }
}

/// Union of several scopes.
#[derive(Default)]
pub struct AnyOf(Vec<Box<dyn SearchScope>>);

impl AnyOf {
    pub fn new(scopes: Vec<Box<dyn SearchScope>>) -> Self {
        AnyOf(scopes)
    }

    pub fn with(mut self, scope: impl SearchScope + 'static) -> Self {
        self.0.push(Box::new(scope));
        self
    }
}

impl SearchScope for AnyOf {
    fn contains(&self, file_id: FileId) -> bool {
        self.0.iter().any(|scope| scope.contains(file_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_scopes() {
        let local = FileId::new(5);
        let shared = FileId::shared(0, FileId::new(5));

        assert!(AllFiles.contains(local) && AllFiles.contains(shared));
        assert!(LocalFiles.contains(local) && !LocalFiles.contains(shared));
        assert!(!SharedFiles.contains(local) && SharedFiles.contains(shared));

        let set: FileSet = [local].into_iter().collect();
        assert!(set.contains(local));
        assert!(!set.contains(FileId::new(6)));

        let union = AnyOf::default().with(set).with(|id: FileId| id.raw() == 6);
        assert!(union.contains(local));
        assert!(union.contains(FileId::new(6)));
        assert!(!union.contains(FileId::new(7)));
    }
}
