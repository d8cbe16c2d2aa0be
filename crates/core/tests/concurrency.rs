mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use common::*;
use keyindex_api::MemoryFileSystem;
use keyindex_core::Outcome;

#[test]
fn readers_never_observe_a_half_replaced_file() {
    let dir = tempfile::tempdir().unwrap();
    let fs = MemoryFileSystem::new();
    let manager = Arc::new(open_manager(dir.path(), &fs, test_config()));
    manager.register(WordIndex::new(1).0).unwrap();
    manager.update_file_async(&fs.write("/src/A.java", "class V1")).wait();

    let done = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicUsize::new(0));
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let done = Arc::clone(&done);
            let reads = Arc::clone(&reads);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let grouped = manager.search_prefix::<String>(WORD_INDEX, "V").unwrap();
                    let owners = grouped
                        .iter()
                        .filter(|(key, _)| key.as_str() == "V1" || key.as_str() == "V2")
                        .flat_map(|(_, paths)| paths.iter())
                        .filter(|path| path.as_str() == "/src/A.java")
                        .count();
                    assert_eq!(owners, 1, "saw {grouped:?}");
                    reads.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for round in 0..60 {
        let content = if round % 2 == 0 { "class V2" } else { "class V1" };
        let outcome = manager
            .update_file_async(&fs.write("/src/A.java", content))
            .wait();
        assert_eq!(outcome, Outcome::Committed);
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().expect("reader panicked");
    }

    assert!(reads.load(Ordering::Relaxed) > 0);
    assert_eq!(
        manager.search::<String>(WORD_INDEX, "V1").unwrap(),
        vec!["/src/A.java".to_string()]
    );
    assert!(manager.search::<String>(WORD_INDEX, "V2").unwrap().is_empty());
}

#[test]
fn updates_from_many_threads_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let fs = MemoryFileSystem::new();
    let manager = Arc::new(open_manager(dir.path(), &fs, test_config()));
    manager.register(WordIndex::new(1).0).unwrap();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let manager = Arc::clone(&manager);
            let fs = fs.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    manager.update_file(&fs.write(&format!("/t{t}/F{i}.java"), format!("class T{t}x{i}")));
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().expect("writer panicked");
    }
    manager.flush().unwrap();

    let all = manager.search_prefix::<String>(WORD_INDEX, "T").unwrap();
    assert_eq!(all.len(), 100);
    assert_eq!(all["T3x24"], vec!["/t3/F24.java".to_string()]);
}
