//! Concurrency tests: many writers against one store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use pvfs_config::testing::TestEnvironment;
use pvfs_store::{FileAttributes, FsRecords};

#[test]
fn test_concurrent_children_inserts_are_not_lost() {
    let env = TestEnvironment::new().unwrap();
    let store = Arc::new(FsRecords::open(&env.config).unwrap());
    let root = store.find_or_create_root("file:///concurrent").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    store
                        .create_child(root, &format!("f-{}-{}", t, i), FileAttributes::file(i, 0))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let ids = store.list_ids(root).unwrap();
    assert_eq!(ids.len(), 400);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert!(store.check_sanity().unwrap().is_empty());
    store.close().unwrap();
}

#[test]
fn test_mod_counts_monotonic_under_writers() {
    let env = TestEnvironment::new().unwrap();
    let store = Arc::new(FsRecords::open(&env.config).unwrap());
    let id = store.create_record().unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..500u64 {
                    store.set_length(id, i * 4 + t).unwrap();
                    store.set_timestamp(id, i).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let store = store.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut last = 0;
            let mut last_global = 0;
            while !done.load(Ordering::Acquire) {
                let current = store.mod_count(id).unwrap();
                let global = store.global_mod_count();
                assert!(current >= last);
                assert!(global >= last_global);
                last = current;
                last_global = global;
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    reader.join().unwrap();
    store.close().unwrap();
}

#[test]
fn test_force_while_writing() {
    let env = TestEnvironment::new().unwrap();
    let store = Arc::new(FsRecords::open(&env.config).unwrap());
    let root = store.find_or_create_root("file:///force").unwrap();

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 0..200 {
                store
                    .create_child(root, &format!("n{}", i), FileAttributes::file(0, 0))
                    .unwrap();
            }
        })
    };
    for _ in 0..20 {
        store.force().unwrap();
    }
    writer.join().unwrap();
    store.close().unwrap();

    let store = FsRecords::open(&env.config).unwrap();
    assert_eq!(store.list_ids(root).unwrap().len(), 200);
    store.close().unwrap();
}
