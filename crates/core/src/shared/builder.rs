use std::path::{Path, PathBuf};
use std::sync::Arc;

use keyindex_api::{
    DefinitionRef, ExtractionInput, FileId, FileRef, IndexDefinition, SerializedEntries,
};

use crate::error::{IndexError, Result};
use crate::storage::{Database, DefinitionVersionStore, IndexStorage, PathRegistry};

/// Writes a store that other installations can mount read-only.
///
/// Files get sequential ids starting at 1 in the order they are added, and
/// the id to path registry is written alongside the index data. A store holds
/// at most [`FileId::MAX_SHARED_LOCAL`] files.
pub struct SharedIndexBuilder {
    db: Database,
    definitions: Vec<DefinitionRef>,
    files: usize,
    max_file_id: u32,
}

impl SharedIndexBuilder {
    /// Starts a fresh store at `path`, replacing any file already there.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(Self {
            db: Database::open(path)?,
            definitions: Vec::new(),
            files: 0,
            max_file_id: FileId::MAX_SHARED_LOCAL,
        })
    }

    pub fn with_definition<D: IndexDefinition>(mut self, definition: D) -> Self {
        self.add_definition(Arc::new(definition));
        self
    }

    pub fn add_definition(&mut self, definition: DefinitionRef) {
        self.definitions.retain(|d| d.id() != definition.id());
        self.definitions.push(definition);
    }

    /// Indexes `files` (folders are walked) in one transaction. Returns how
    /// many files were written. Fails without writing anything if a file
    /// would get an id past the shared id range.
    pub fn add_files(&mut self, files: &[FileRef]) -> Result<usize> {
        let mut collected = Vec::new();
        for file in files {
            crate::manager::collect_files(file, &mut collected);
        }

        let extracted: Vec<(String, Vec<(&DefinitionRef, SerializedEntries)>)> = collected
            .iter()
            .map(|file| {
                let outputs = self
                    .definitions
                    .iter()
                    .filter(|definition| definition.supports(file.as_ref()))
                    .map(|definition| {
                        let entries = definition
                            .map_serialized(file.as_ref(), &ExtractionInput::None)
                            .unwrap_or_else(|e| {
                                tracing::warn!(
                                    "Index '{}' failed on {}: {}",
                                    definition.id(),
                                    file.path(),
                                    e
                                );
                                Vec::new()
                            });
                        (definition, entries)
                    })
                    .collect();
                (file.path().to_string(), outputs)
            })
            .collect();

        let definitions = &self.definitions;
        let max_file_id = self.max_file_id;
        let written = self.db.write(|tx| {
            let registry = PathRegistry::new(tx);
            let versions = DefinitionVersionStore::new(tx);
            for definition in definitions {
                IndexStorage::create(tx, definition.id())?;
                versions.put_version(definition.id(), definition.version())?;
            }
            for (path, outputs) in &extracted {
                let file_id: FileId = registry.id_for(path)?;
                if file_id.raw() > max_file_id {
                    return Err(IndexError::Config(format!(
                        "Shared index cannot hold more than {max_file_id} files ({path})"
                    )));
                }
                for (definition, entries) in outputs {
                    IndexStorage::create(tx, definition.id())?.replace_file(file_id, entries)?;
                }
            }
            Ok(extracted.len())
        })?;
        self.files += written;
        Ok(written)
    }

    pub fn file_count(&self) -> usize {
        self.files
    }

    /// Seals the store for read-only mounting and returns its path.
    pub fn finish(self) -> Result<PathBuf> {
        self.db.seal()?;
        tracing::info!(
            "Built shared index {} ({} files, {} indexes)",
            self.db.path().display(),
            self.files,
            self.definitions.len()
        );
        Ok(self.db.path().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use keyindex_api::definition::utf8;
    use keyindex_api::{ExtractionResult, FileObject, MemoryFileSystem};

    struct PathIndex;

    impl IndexDefinition for PathIndex {
        type Value = String;

        fn id(&self) -> &str {
            "paths"
        }

        fn version(&self) -> u32 {
            1
        }

        fn supports(&self, _file: &dyn FileObject) -> bool {
            true
        }

        fn map(
            &self,
            file: &dyn FileObject,
            _input: &ExtractionInput,
        ) -> ExtractionResult<HashMap<String, String>> {
            Ok(HashMap::from([(file.path().to_string(), file.path().to_string())]))
        }

        fn serialize_value(&self, value: &String) -> ExtractionResult<Vec<u8>> {
            Ok(utf8::encode(value))
        }

        fn deserialize_value(&self, bytes: &[u8]) -> ExtractionResult<String> {
            utf8::decode(bytes)
        }
    }

    #[test]
    fn test_add_files_refuses_ids_past_the_shared_range() {
        let dir = tempfile::tempdir().unwrap();
        let fs = MemoryFileSystem::new();
        let mut builder = SharedIndexBuilder::create(&dir.path().join("lib.db"))
            .unwrap()
            .with_definition(PathIndex);
        builder.max_file_id = 2;

        let first = [fs.write("/lib/A.java", "a"), fs.write("/lib/B.java", "b")];
        assert_eq!(builder.add_files(&first).unwrap(), 2);

        let overflow = [fs.write("/lib/C.java", "c")];
        assert!(matches!(builder.add_files(&overflow), Err(IndexError::Config(_))));
        assert_eq!(builder.file_count(), 2);
        // rolled back: the registry still ends at the last id that fit
        let registered = builder.db.read(|conn| PathRegistry::new(conn).len()).unwrap();
        assert_eq!(registered, 2);

        // re-adding known paths reuses their ids
        assert_eq!(builder.add_files(&first).unwrap(), 2);
        let path = builder.finish().unwrap();
        assert!(path.exists());
    }
}
