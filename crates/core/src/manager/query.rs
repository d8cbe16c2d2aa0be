use std::any::{Any, TypeId};
use std::collections::BTreeMap;

use keyindex_api::{AllFiles, DefinitionRef, FileId, SearchScope};

use crate::error::{IndexError, Result};
use crate::manager::IndexManager;
use crate::storage::{Database, IndexStorage, Packet};

enum Lookup<'a> {
    Exact(&'a str),
    Prefix(&'a str),
}

type Visit<'v> = dyn FnMut(&str, FileId, Box<dyn Any + Send>) -> bool + 'v;

impl IndexManager {
    /// Feeds every `(file, value)` stored under `key` to `processor`, local
    /// store first, then each mounted shared store. Stops as soon as the
    /// processor returns `false`; the return value says whether it ran to
    /// the end.
    pub fn process_values<V: 'static>(
        &self,
        index_id: &str,
        key: &str,
        scope: &dyn SearchScope,
        mut processor: impl FnMut(FileId, V) -> bool,
    ) -> Result<bool> {
        self.scan::<V>(index_id, Lookup::Exact(key), scope, &mut |_, file_id, value| {
            downcast(value).is_none_or(|value| processor(file_id, value))
        })
    }

    /// Like [`IndexManager::process_values`] for every key starting with
    /// `prefix`, in key order within each store.
    pub fn process_prefix<V: 'static>(
        &self,
        index_id: &str,
        prefix: &str,
        scope: &dyn SearchScope,
        mut processor: impl FnMut(FileId, V) -> bool,
    ) -> Result<bool> {
        self.scan::<V>(index_id, Lookup::Prefix(prefix), scope, &mut |_, file_id, value| {
            downcast(value).is_none_or(|value| processor(file_id, value))
        })
    }

    pub fn process_prefix_with_keys<V: 'static>(
        &self,
        index_id: &str,
        prefix: &str,
        scope: &dyn SearchScope,
        mut processor: impl FnMut(&str, FileId, V) -> bool,
    ) -> Result<bool> {
        self.scan::<V>(index_id, Lookup::Prefix(prefix), scope, &mut |key, file_id, value| {
            downcast(value).is_none_or(|value| processor(key, file_id, value))
        })
    }

    /// Every value stored under `key`, across all files.
    pub fn search<V: 'static>(&self, index_id: &str, key: &str) -> Result<Vec<V>> {
        let mut values = Vec::new();
        self.process_values(index_id, key, &AllFiles, |_, value: V| {
            values.push(value);
            true
        })?;
        Ok(values)
    }

    /// Values grouped by key for every key starting with `prefix`.
    pub fn search_prefix<V: 'static>(
        &self,
        index_id: &str,
        prefix: &str,
    ) -> Result<BTreeMap<String, Vec<V>>> {
        let mut grouped: BTreeMap<String, Vec<V>> = BTreeMap::new();
        self.process_prefix_with_keys(index_id, prefix, &AllFiles, |key, _, value: V| {
            grouped.entry(key.to_string()).or_default().push(value);
            true
        })?;
        Ok(grouped)
    }

    /// Path of a local or shared file id.
    pub fn get_file_path(&self, file_id: FileId) -> Option<String> {
        match (file_id.shared_ordinal(), file_id.shared_local_id()) {
            (Some(ordinal), Some(local)) => self.engine.shared_store(ordinal)?.path_of(local),
            _ => self
                .engine
                .fs
                .find_by_id(file_id)
                .map(|file| file.path().to_string()),
        }
    }

    fn scan<V: 'static>(
        &self,
        index_id: &str,
        lookup: Lookup<'_>,
        scope: &dyn SearchScope,
        visit: &mut Visit<'_>,
    ) -> Result<bool> {
        if self.engine.is_disposed() {
            return Ok(true);
        }
        // copied out so no engine lock is held while callbacks run
        let Some(definition) = self.engine.definition(index_id) else {
            return Ok(true);
        };
        let shared = self.engine.shared_serving(index_id);
        if definition.value_type_id() != TypeId::of::<V>() {
            return Err(IndexError::ValueTypeMismatch {
                index_id: index_id.to_string(),
                stored: definition.value_type_name(),
                requested: std::any::type_name::<V>(),
            });
        }

        let local = scan_store(
            &self.engine.db,
            &definition,
            &lookup,
            &mut |file_id| scope.contains(file_id).then_some(file_id),
            visit,
        )?;
        if !local {
            return Ok(false);
        }

        for store in &shared {
            let scanned = scan_store(
                store.db(),
                &definition,
                &lookup,
                &mut |local_id| {
                    let global = store.global_id(local_id);
                    scope.contains(global).then_some(global)
                },
                visit,
            );
            match scanned {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(e) => tracing::warn!(
                    "Skipping shared index {} for '{}': {}",
                    store.path().display(),
                    index_id,
                    e
                ),
            }
        }
        Ok(true)
    }
}

/// Streams matching packets of one store. `resolve` maps a stored file id
/// into the caller's namespace, or drops it when out of scope.
fn scan_store(
    db: &Database,
    definition: &DefinitionRef,
    lookup: &Lookup<'_>,
    resolve: &mut dyn FnMut(FileId) -> Option<FileId>,
    visit: &mut Visit<'_>,
) -> Result<bool> {
    db.read(|conn| {
        let Some(storage) = IndexStorage::open_existing(conn, definition.id())? else {
            return Ok(true);
        };
        let mut emit = |key: &str, packets: Vec<Packet>| -> Result<bool> {
            for packet in packets {
                let Some(file_id) = resolve(packet.file_id) else {
                    continue;
                };
                let value = match definition.deserialize_any(&packet.value) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(
                            "Unreadable '{}' value for key '{}' in {}: {}",
                            definition.id(),
                            key,
                            file_id,
                            e
                        );
                        continue;
                    }
                };
                if !visit(key, file_id, value) {
                    return Ok(false);
                }
            }
            Ok(true)
        };
        match lookup {
            Lookup::Exact(key) => {
                let packets = storage.get_values(key)?;
                emit(*key, packets)
            }
            Lookup::Prefix(prefix) => storage.for_each_prefix(*prefix, emit),
        }
    })
}

/// Values were type-checked against the definition before the scan, so a
/// failed downcast only happens if a definition lies about its value type.
fn downcast<V: 'static>(value: Box<dyn Any + Send>) -> Option<V> {
    match value.downcast::<V>() {
        Ok(value) => Some(*value),
        Err(_) => {
            tracing::warn!("Dropping value that is not a {}", std::any::type_name::<V>());
            None
        }
    }
}
