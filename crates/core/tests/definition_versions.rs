mod common;

use std::sync::atomic::Ordering;

use common::*;
use keyindex_api::{FileSystem, MemoryFileSystem};
use keyindex_core::{IndexingConfig, VersionBumpPolicy};

fn index_sources(dir: &std::path::Path, fs: &MemoryFileSystem) {
    let manager = open_manager(dir, fs, test_config());
    manager.register(WordIndex::new(1).0).unwrap();
    manager.process_roots(&[fs.folder("/src")]).wait();
    manager.flush().unwrap();
    assert_eq!(manager.search::<String>(WORD_INDEX, "Hello").unwrap().len(), 1);
    manager.dispose();
}

#[test]
fn version_bump_clears_entries_before_register_returns() {
    let dir = tempfile::tempdir().unwrap();
    let fs = MemoryFileSystem::new();
    fs.write("/src/A.java", "class Hello");
    index_sources(dir.path(), &fs);

    let manager = open_manager(dir.path(), &fs, test_config());
    let (words, calls) = WordIndex::new(2);
    manager.register(words).unwrap();
    assert!(manager.search::<String>(WORD_INDEX, "Hello").unwrap().is_empty());

    manager.flush().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // the cleared stamp makes the untouched file stale again
    let a = fs.find("/src/A.java").unwrap();
    manager.update_file_async(&a).wait();
    assert_eq!(
        manager.search::<String>(WORD_INDEX, "Hello").unwrap(),
        vec!["/src/A.java".to_string()]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn backfill_policy_reindexes_covered_files_after_a_bump() {
    let dir = tempfile::tempdir().unwrap();
    let fs = MemoryFileSystem::new();
    fs.write("/src/A.java", "class Hello");
    fs.write("/src/B.java", "class World");
    index_sources(dir.path(), &fs);

    let config = IndexingConfig {
        version_bump_policy: VersionBumpPolicy::Backfill,
        ..test_config()
    };
    let manager = open_manager(dir.path(), &fs, config);
    let (words, calls) = WordIndex::new(2);
    manager.register(words).unwrap();
    manager.flush().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(manager.search::<String>(WORD_INDEX, "Hello").unwrap().len(), 1);
    assert_eq!(manager.search::<String>(WORD_INDEX, "World").unwrap().len(), 1);
}

#[test]
fn new_definition_backfills_without_rerunning_others() {
    let dir = tempfile::tempdir().unwrap();
    let fs = MemoryFileSystem::new();
    fs.write("/src/A.java", "class A");
    fs.write("/src/B.java", "class B");
    fs.write("/src/notes.txt", "class Notes");
    let manager = open_manager(dir.path(), &fs, test_config());
    let (words, word_calls) = WordIndex::new(1);
    manager.register(words).unwrap();
    manager.process_roots(&[fs.folder("/src")]).wait();
    manager.flush().unwrap();
    assert_eq!(word_calls.load(Ordering::SeqCst), 3);

    let (extensions, ext_calls) = ExtensionIndex::new();
    manager.register(extensions).unwrap();
    manager.flush().unwrap();

    assert_eq!(ext_calls.load(Ordering::SeqCst), 3);
    assert_eq!(word_calls.load(Ordering::SeqCst), 3);
    assert_eq!(manager.search::<u64>(EXT_INDEX, "java").unwrap(), vec![7, 7]);
    assert_eq!(manager.search::<u64>(EXT_INDEX, "txt").unwrap(), vec![11]);

    let mut ids = manager.registered_index_ids();
    ids.sort();
    assert_eq!(ids, vec![EXT_INDEX.to_string(), WORD_INDEX.to_string()]);
}

#[test]
fn registering_the_same_version_keeps_entries() {
    let dir = tempfile::tempdir().unwrap();
    let fs = MemoryFileSystem::new();
    fs.write("/src/A.java", "class Hello");
    let manager = open_manager(dir.path(), &fs, test_config());
    manager.register(WordIndex::new(1).0).unwrap();
    manager.process_roots(&[fs.folder("/src")]).wait();
    manager.flush().unwrap();

    let (again, calls) = WordIndex::new(1);
    manager.register(again).unwrap();
    manager.flush().unwrap();
    assert_eq!(manager.search::<String>(WORD_INDEX, "Hello").unwrap().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    manager.register(WordIndex::new(3).0).unwrap();
    assert!(manager.search::<String>(WORD_INDEX, "Hello").unwrap().is_empty());
}
