use crate::file::FileObject;

/// Optional collaborator deciding whether a file may be indexed at all,
/// e.g. a runtime image that only exports some of its packages.
///
/// Without a filter every supported file is indexable.
pub trait IndexFilter: Send + Sync {
    fn is_indexable(&self, file: &dyn FileObject) -> bool;
}

impl<F> IndexFilter for F
where
    F: Fn(&dyn FileObject) -> bool + Send + Sync,
{
    fn is_indexable(&self, file: &dyn FileObject) -> bool {
        self(file)
    }
}
