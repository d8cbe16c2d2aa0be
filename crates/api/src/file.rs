use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::Arc;

/// Stable integer identity of a file inside one store's namespace.
///
/// Local ids are handed out by the file system backend and must stay below
/// `0x8000_0000`. Ids coming out of a mounted shared store are re-encoded at
/// query time: top bit set, the next seven bits carry the mount ordinal and
/// the low 24 bits carry the id inside that shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(u32);

impl FileId {
    pub const INVALID: FileId = FileId(0);

    const SHARED_FLAG: u32 = 0x8000_0000;
    const ORDINAL_MASK: u32 = 0x7F;
    const LOCAL_MASK: u32 = 0x00FF_FFFF;

    /// Upper bound on simultaneously mounted shared stores.
    pub const MAX_SHARED_STORES: usize = 128;

    /// Largest id a shared store may hand out; it has to fit the low 24 bits.
    pub const MAX_SHARED_LOCAL: u32 = Self::LOCAL_MASK;

    pub const fn new(raw: u32) -> Self {
        FileId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// True for ids that can be written into a local store.
    pub fn is_local(self) -> bool {
        self.is_valid() && !self.is_shared()
    }

    pub fn is_shared(self) -> bool {
        self.0 & Self::SHARED_FLAG != 0
    }

    /// Encodes `local` (an id inside shared store number `ordinal`) into the
    /// global namespace.
    pub fn shared(ordinal: usize, local: FileId) -> Self {
        let ordinal = (ordinal as u32) & Self::ORDINAL_MASK;
        FileId(Self::SHARED_FLAG | (ordinal << 24) | (local.0 & Self::LOCAL_MASK))
    }

    pub fn shared_ordinal(self) -> Option<usize> {
        self.is_shared()
            .then(|| ((self.0 >> 24) & Self::ORDINAL_MASK) as usize)
    }

    pub fn shared_local_id(self) -> Option<FileId> {
        self.is_shared().then(|| FileId(self.0 & Self::LOCAL_MASK))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.shared_ordinal(), self.shared_local_id()) {
            (Some(ordinal), Some(local)) => write!(f, "shared#{ordinal}:{}", local.0),
            _ => write!(f, "{}", self.0),
        }
    }
}

/// A file as seen by the engine. Backends decide where the bytes come from.
pub trait FileObject: Send + Sync + fmt::Debug {
    fn id(&self) -> FileId;

    /// Absolute, `/`-separated path. Used as the staleness and coalescing key.
    fn path(&self) -> &str;

    fn name(&self) -> &str {
        let path = self.path();
        path.rsplit(['/', '\\']).next().unwrap_or(path)
    }

    fn extension(&self) -> Option<&str> {
        let name = self.name();
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => Some(ext),
            _ => None,
        }
    }

    fn exists(&self) -> bool;

    fn is_folder(&self) -> bool;

    /// Modification time in milliseconds since the epoch.
    fn last_modified(&self) -> io::Result<i64>;

    fn length(&self) -> io::Result<u64>;

    fn content(&self) -> io::Result<Vec<u8>>;

    fn text(&self) -> io::Result<String> {
        String::from_utf8(self.content()?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn children(&self) -> io::Result<Vec<FileRef>> {
        Ok(Vec::new())
    }
}

pub type FileRef = Arc<dyn FileObject>;

/// Resolves paths and ids back to file objects.
pub trait FileSystem: Send + Sync {
    fn find(&self, path: &str) -> Option<FileRef>;

    fn find_by_id(&self, id: FileId) -> Option<FileRef>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_id_encoding() {
        let id = FileId::shared(3, FileId::new(7));
        assert!(id.is_shared());
        assert!(!id.is_local());
        assert_eq!(id.shared_ordinal(), Some(3));
        assert_eq!(id.shared_local_id(), Some(FileId::new(7)));
        assert_eq!(id.raw(), 0x8300_0007);
    }

    #[test]
    fn test_largest_shared_local_id_survives_encoding() {
        let local = FileId::new(FileId::MAX_SHARED_LOCAL);
        assert_eq!(FileId::shared(5, local).shared_local_id(), Some(local));
    }

    #[test]
    fn test_shared_id_truncates_to_field_widths() {
        let id = FileId::shared(129, FileId::new(0x0123_4567));
        assert_eq!(id.shared_ordinal(), Some(1));
        assert_eq!(id.shared_local_id(), Some(FileId::new(0x0023_4567)));
    }

    #[test]
    fn test_local_ids() {
        assert!(!FileId::INVALID.is_valid());
        assert!(FileId::new(42).is_local());
        assert_eq!(FileId::new(42).shared_ordinal(), None);
        assert_eq!(FileId::new(42).to_string(), "42");
        assert_eq!(FileId::shared(0, FileId::new(9)).to_string(), "shared#0:9");
    }
}
