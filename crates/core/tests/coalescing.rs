mod common;

use std::sync::atomic::Ordering;

use common::*;
use keyindex_api::MemoryFileSystem;
use keyindex_core::Outcome;

#[test]
fn rapid_updates_share_one_handle_and_apply_the_latest_content() {
    let dir = tempfile::tempdir().unwrap();
    let fs = MemoryFileSystem::new();
    let manager = open_manager(dir.path(), &fs, test_config());
    let (gate_index, gate) = gate();
    let (words, calls) = WordIndex::new(1);
    manager.register(gate_index).unwrap();
    manager.register(words).unwrap();

    let blocker = manager.update_file_async(&fs.write("/block.gate", "hold"));
    gate.wait_until_blocked();

    let first = manager.update_file_async(&fs.write("/src/A.java", "class One"));
    let second = manager.update_file_async(&fs.write("/src/A.java", "class Two"));
    assert!(first.same_as(&second));
    assert!(!first.is_done());
    assert_eq!(manager.queued_file_paths(10), vec!["/src/A.java".to_string()]);

    gate.open();
    assert_eq!(blocker.wait(), Outcome::Committed);
    assert_eq!(second.wait(), Outcome::Committed);
    assert_eq!(first.wait(), Outcome::Committed);
    manager.flush().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(manager.search::<String>(WORD_INDEX, "One").unwrap().is_empty());
    assert_eq!(
        manager.search::<String>(WORD_INDEX, "Two").unwrap(),
        vec!["/src/A.java".to_string()]
    );
}

#[test]
fn update_after_dispatch_starts_a_new_unit() {
    let dir = tempfile::tempdir().unwrap();
    let fs = MemoryFileSystem::new();
    let manager = open_manager(dir.path(), &fs, test_config());
    manager.register(WordIndex::new(1).0).unwrap();

    let first = manager.update_file_async(&fs.write("/src/A.java", "class One"));
    assert_eq!(first.wait(), Outcome::Committed);
    let second = manager.update_file_async(&fs.write("/src/A.java", "class Two"));
    assert!(!first.same_as(&second));
    assert_eq!(second.wait(), Outcome::Committed);
    assert_eq!(manager.search::<String>(WORD_INDEX, "Two").unwrap().len(), 1);
}

#[test]
fn queued_paths_follow_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let fs = MemoryFileSystem::new();
    let manager = open_manager(dir.path(), &fs, test_config());
    let (gate_index, gate) = gate();
    manager.register(gate_index).unwrap();
    manager.register(WordIndex::new(1).0).unwrap();

    manager.update_file(&fs.write("/block.gate", "hold"));
    gate.wait_until_blocked();
    for name in ["C", "A", "B"] {
        manager.update_file(&fs.write(&format!("/src/{name}.java"), format!("class {name}")));
    }

    assert_eq!(
        manager.queued_file_paths(2),
        vec!["/src/C.java".to_string(), "/src/A.java".to_string()]
    );
    let snapshot = manager.progress_snapshot();
    assert_eq!(snapshot.current_file.as_deref(), Some("/block.gate"));
    assert_eq!(snapshot.queued_files, 3);
    assert_eq!(snapshot.running_files, 1);

    gate.open();
    manager.flush().unwrap();
    assert!(manager.queued_file_paths(10).is_empty());
    assert!(manager.progress_snapshot().is_idle());
}

#[test]
fn invalidation_cancels_pending_requests_and_clears_local_data() {
    let dir = tempfile::tempdir().unwrap();
    let fs = MemoryFileSystem::new();
    let manager = open_manager(dir.path(), &fs, test_config());
    let (gate_index, gate) = gate();
    manager.register(gate_index).unwrap();
    manager.register(WordIndex::new(1).0).unwrap();

    let indexed = fs.write("/src/Old.java", "class Old");
    manager.update_file_async(&indexed).wait();

    manager.update_file(&fs.write("/block.gate", "hold"));
    gate.wait_until_blocked();
    let pending = manager.update_file_async(&fs.write("/src/New.java", "class New"));

    let invalidated = manager.invalidate_local_caches();
    assert_eq!(pending.wait(), Outcome::Cancelled);
    assert!(manager.queued_file_paths(10).is_empty());

    gate.open();
    assert_eq!(invalidated.wait(), Outcome::Committed);
    manager.flush().unwrap();

    assert!(manager.search::<String>(WORD_INDEX, "Old").unwrap().is_empty());
    assert!(manager.search::<String>(WORD_INDEX, "New").unwrap().is_empty());
    assert!(!manager.has_indexed(WORD_INDEX, indexed.id()).unwrap());

    // stamps went with the entries
    assert_eq!(manager.update_file_async(&indexed).wait(), Outcome::Committed);
    assert_eq!(manager.search::<String>(WORD_INDEX, "Old").unwrap().len(), 1);
}
