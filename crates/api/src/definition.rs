use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ExtractionError, ExtractionResult};
use crate::file::FileObject;

/// Helper payload handed to [`IndexDefinition::map`].
///
/// Bulk indexing reads the bytes of some file kinds once and shares them
/// between every definition that supports the file.
#[derive(Debug, Clone, Default)]
pub enum ExtractionInput {
    #[default]
    None,
    Bytes(Arc<[u8]>),
}

impl ExtractionInput {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            ExtractionInput::None => None,
            ExtractionInput::Bytes(bytes) => Some(bytes),
        }
    }

    /// The precomputed bytes if present, otherwise the file's content.
    pub fn bytes_or_read(&self, file: &dyn FileObject) -> ExtractionResult<Arc<[u8]>> {
        match self {
            ExtractionInput::Bytes(bytes) => Ok(Arc::clone(bytes)),
            ExtractionInput::None => file
                .content()
                .map(Arc::from)
                .map_err(|e| ExtractionError::io(file.path(), e)),
        }
    }
}

/// A pluggable extraction rule.
///
/// Keys are always strings; values are whatever the definition wants as long
/// as it can turn them into bytes and back.
pub trait IndexDefinition: Send + Sync + 'static {
    type Value: Send + 'static;

    fn id(&self) -> &str;

    /// Schema version. Changing it clears every entry stored under [`Self::id`].
    fn version(&self) -> u32;

    fn supports(&self, file: &dyn FileObject) -> bool;

    fn map(
        &self,
        file: &dyn FileObject,
        input: &ExtractionInput,
    ) -> ExtractionResult<HashMap<String, Self::Value>>;

    fn serialize_value(&self, value: &Self::Value) -> ExtractionResult<Vec<u8>>;

    fn deserialize_value(&self, bytes: &[u8]) -> ExtractionResult<Self::Value>;
}

/// `(key, serialized value)` pairs produced by one file, sorted by key.
pub type SerializedEntries = Vec<(String, Vec<u8>)>;

/// Object-safe view of an [`IndexDefinition`], used by the engine to keep
/// definitions with different value types in one registry.
pub trait DynIndexDefinition: Send + Sync {
    fn id(&self) -> &str;

    fn version(&self) -> u32;

    fn supports(&self, file: &dyn FileObject) -> bool;

    fn map_serialized(
        &self,
        file: &dyn FileObject,
        input: &ExtractionInput,
    ) -> ExtractionResult<SerializedEntries>;

    fn deserialize_any(&self, bytes: &[u8]) -> ExtractionResult<Box<dyn Any + Send>>;

    fn value_type_id(&self) -> TypeId;

    fn value_type_name(&self) -> &'static str;
}

impl<D: IndexDefinition> DynIndexDefinition for D {
    fn id(&self) -> &str {
        IndexDefinition::id(self)
    }

    fn version(&self) -> u32 {
        IndexDefinition::version(self)
    }

    fn supports(&self, file: &dyn FileObject) -> bool {
        IndexDefinition::supports(self, file)
    }

    fn map_serialized(
        &self,
        file: &dyn FileObject,
        input: &ExtractionInput,
    ) -> ExtractionResult<SerializedEntries> {
        let mut entries = self
            .map(file, input)?
            .into_iter()
            .map(|(key, value)| Ok((key, self.serialize_value(&value)?)))
            .collect::<ExtractionResult<SerializedEntries>>()?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    fn deserialize_any(&self, bytes: &[u8]) -> ExtractionResult<Box<dyn Any + Send>> {
        Ok(Box::new(self.deserialize_value(bytes)?))
    }

    fn value_type_id(&self) -> TypeId {
        TypeId::of::<D::Value>()
    }

    fn value_type_name(&self) -> &'static str {
        std::any::type_name::<D::Value>()
    }
}

pub type DefinitionRef = Arc<dyn DynIndexDefinition>;

/// UTF-8 value codec for definitions whose values are plain strings.
pub mod utf8 {
    use crate::error::{ExtractionError, ExtractionResult};

    pub fn encode(value: &str) -> Vec<u8> {
        value.as_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> ExtractionResult<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| ExtractionError::Codec(e.to_string()))
    }
}
