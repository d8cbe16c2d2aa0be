use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use keyindex_api::{DefinitionRef, ExtractionInput, FileId, FileObject, FileRef, SerializedEntries};

use crate::manager::engine::Engine;
use crate::storage::StampStore;

pub(crate) struct DefinitionOutput {
    pub index_id: String,
    pub version: u32,
    pub entries: SerializedEntries,
    /// The definition no longer covers the file; its entries and stamp go.
    pub retired: bool,
}

/// A file whose entries were extracted outside the engine lock and are
/// ready to be written.
pub(crate) struct PreparedFile {
    pub file_id: FileId,
    pub path: String,
    pub mtime: i64,
    pub length: u64,
    pub outputs: Vec<DefinitionOutput>,
}

pub(crate) enum Preparation {
    Ready(PreparedFile),
    /// Every supporting definition already has a matching stamp.
    UpToDate,
    /// Folder, not local, unreadable metadata, or filtered out and
    /// unsupported with nothing left to clean up.
    Ignored,
    /// The file no longer exists.
    Missing,
}

/// Runs the stale definitions among `definitions` over `file`.
///
/// A definition that fails (or panics) contributes no entries; its stamp is
/// still written so the file is not retried until it changes again.
/// Definitions stamped for a file they no longer cover (filtered out or not
/// supported anymore) get a retiring output.
pub(crate) fn prepare_file(
    engine: &Engine,
    file: &FileRef,
    definitions: &[DefinitionRef],
    check_stamps: bool,
) -> Preparation {
    if !file.exists() {
        return Preparation::Missing;
    }
    let Some(target) = indexable(engine, file.as_ref(), definitions) else {
        return Preparation::Ignored;
    };

    let path = file.path();
    let stale = if check_stamps {
        stale_definitions(engine, target.supporting, path, target.mtime, target.length)
    } else {
        target.supporting
    };
    if stale.is_empty() && target.retired.is_empty() {
        return Preparation::UpToDate;
    }

    let input = if stale.is_empty() {
        ExtractionInput::None
    } else {
        extraction_input(engine, file.as_ref())
    };
    let mut outputs: Vec<DefinitionOutput> = stale
        .into_iter()
        .map(|definition| {
            let extracted = panic::catch_unwind(AssertUnwindSafe(|| {
                definition.map_serialized(file.as_ref(), &input)
            }));
            let entries = match extracted {
                Ok(Ok(entries)) => entries,
                Ok(Err(e)) => {
                    tracing::warn!("Index '{}' failed on {}: {}", definition.id(), path, e);
                    Vec::new()
                }
                Err(_) => {
                    tracing::error!("Index '{}' panicked on {}", definition.id(), path);
                    Vec::new()
                }
            };
            DefinitionOutput {
                index_id: definition.id().to_string(),
                version: definition.version(),
                entries,
                retired: false,
            }
        })
        .collect();
    outputs.extend(target.retired.into_iter().map(|definition| DefinitionOutput {
        index_id: definition.id().to_string(),
        version: definition.version(),
        entries: Vec::new(),
        retired: true,
    }));

    Preparation::Ready(PreparedFile {
        file_id: file.id(),
        path: path.to_string(),
        mtime: target.mtime,
        length: target.length,
        outputs,
    })
}

/// Cheap pre-check used before queueing: true when some supporting
/// definition would re-extract `file` or some entries must be retired.
pub(crate) fn needs_indexing(engine: &Engine, file: &dyn FileObject, definitions: &[DefinitionRef]) -> bool {
    let Some(target) = indexable(engine, file, definitions) else {
        return false;
    };
    if !target.retired.is_empty() || !engine.config.skip_unchanged_files {
        return true;
    }
    !stale_definitions(engine, target.supporting, file.path(), target.mtime, target.length)
        .is_empty()
}

/// Walks `root` depth first, collecting the existing non-folder files.
pub(crate) fn collect_files(root: &FileRef, out: &mut Vec<FileRef>) {
    if !root.exists() {
        return;
    }
    if !root.is_folder() {
        out.push(Arc::clone(root));
        return;
    }
    match root.children() {
        Ok(children) => {
            for child in &children {
                collect_files(child, out);
            }
        }
        Err(e) => tracing::warn!("Cannot list {}: {}", root.path(), e),
    }
}

struct Target<'d> {
    supporting: Vec<&'d DefinitionRef>,
    retired: Vec<&'d DefinitionRef>,
    mtime: i64,
    length: u64,
}

fn indexable<'d>(
    engine: &Engine,
    file: &dyn FileObject,
    definitions: &'d [DefinitionRef],
) -> Option<Target<'d>> {
    if file.is_folder() || !file.id().is_local() {
        return None;
    }
    let included = engine.is_indexable(file);
    let (supporting, others): (Vec<&DefinitionRef>, Vec<&DefinitionRef>) = definitions
        .iter()
        .partition(|definition| included && definition.supports(file));
    let retired = if others.is_empty() {
        Vec::new()
    } else {
        stamped(engine, others, file.path())
    };
    if supporting.is_empty() && retired.is_empty() {
        return None;
    }
    match (file.last_modified(), file.length()) {
        (Ok(mtime), Ok(length)) => Some(Target {
            supporting,
            retired,
            mtime,
            length,
        }),
        (Err(e), _) | (_, Err(e)) => {
            tracing::debug!("Cannot stat {}: {}", file.path(), e);
            None
        }
    }
}

/// The subset of `definitions` that still holds a stamp for `path`.
fn stamped<'d>(engine: &Engine, definitions: Vec<&'d DefinitionRef>, path: &str) -> Vec<&'d DefinitionRef> {
    match engine.db.read(|conn| StampStore::new(conn).indexes_of(path)) {
        Ok(ids) => definitions
            .into_iter()
            .filter(|definition| ids.iter().any(|id| id == definition.id()))
            .collect(),
        Err(e) => {
            tracing::warn!("Stamp lookup failed for {}: {}", path, e);
            Vec::new()
        }
    }
}

fn stale_definitions<'d>(
    engine: &Engine,
    supporting: Vec<&'d DefinitionRef>,
    path: &str,
    mtime: i64,
    length: u64,
) -> Vec<&'d DefinitionRef> {
    let checked = engine.db.read(|conn| {
        let stamps = StampStore::new(conn);
        let mut stale = Vec::new();
        for definition in &supporting {
            let current = stamps.is_up_to_date(
                definition.id(),
                path,
                mtime,
                length,
                Some(definition.version()),
            )?;
            if !current {
                stale.push(*definition);
            }
        }
        Ok(stale)
    });
    match checked {
        Ok(stale) => stale,
        Err(e) => {
            tracing::warn!("Stamp lookup failed for {}: {}", path, e);
            supporting
        }
    }
}

/// Reads the bytes once for file kinds configured as precomputed, so every
/// definition shares them.
fn extraction_input(engine: &Engine, file: &dyn FileObject) -> ExtractionInput {
    if !engine.config.precomputes(file.extension()) {
        return ExtractionInput::None;
    }
    match file.content() {
        Ok(bytes) => ExtractionInput::Bytes(Arc::from(bytes)),
        Err(e) => {
            tracing::debug!("Cannot pre-read {}: {}", file.path(), e);
            ExtractionInput::None
        }
    }
}
