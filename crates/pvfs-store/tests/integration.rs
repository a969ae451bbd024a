//! End-to-end lifecycle tests for the record store: persistence across
//! sessions, recycling, corruption handling and rebuilds.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use pvfs_config::testing::TestEnvironment;
use pvfs_store::attributes::AttributeKey;
use pvfs_store::layout::RecordField;
use pvfs_store::records::RecordTable;
use pvfs_store::recovery::{read_marker, write_marker, CORRUPTION_MARKER_FILE};
use pvfs_store::{
    ConnectionState, CorruptionNotice, ErrorCategory, FileAttributes, FsRecords, ListResult, Severity, StoreError,
};

fn open(env: &TestEnvironment) -> FsRecords {
    FsRecords::open(&env.config).unwrap()
}

#[test]
fn test_roots_and_children_survive_restart() {
    let env = TestEnvironment::new().unwrap();
    let (root, child) = {
        let store = open(&env);
        let root = store.find_or_create_root("file:///project").unwrap();
        assert_eq!(store.find_or_create_root("file:///project").unwrap(), root);
        let child = store.create_child(root, "Cargo.toml", FileAttributes::file(120, 42)).unwrap();
        store
            .update_children(root, |list| Ok(list.mark_complete(true)))
            .unwrap();
        store.close().unwrap();
        (root, child)
    };

    let store = open(&env);
    let roots = store.list_roots().unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].id, root);
    assert_eq!(store.root_url(root).unwrap().as_deref(), Some("file:///project"));

    let list = store.list(root).unwrap();
    assert!(list.is_complete());
    assert_eq!(list.ids(), vec![child]);
    assert_eq!(store.name(child).unwrap().as_deref(), Some("Cargo.toml"));
    assert_eq!(store.length(child).unwrap(), 120);
    assert_eq!(store.files_with_name("Cargo.toml"), vec![child]);
    assert_eq!(store.path(child).unwrap(), "file:///project/Cargo.toml");
    store.close().unwrap();
}

#[test]
fn test_deleted_ids_recycled_only_after_clean_restart() {
    let env = TestEnvironment::new().unwrap();
    let deleted = {
        let store = open(&env);
        let id = store.create_record().unwrap();
        store.write_content(id, b"payload").unwrap();
        store.delete_record(id).unwrap();
        let next = store.create_record().unwrap();
        assert_ne!(next, id);
        store.close().unwrap();
        id
    };

    let store = open(&env);
    assert_eq!(store.free_records(), vec![deleted]);
    assert_eq!(store.create_record().unwrap(), deleted);
    let record = store.record(deleted).unwrap();
    assert!(record.is_blank());
    assert!(!record.is_deleted());
    assert_eq!(store.connection().records().error_count(), 0);
    store.close().unwrap();
}

#[test]
fn test_deleting_listed_child_survives_clean_restart() {
    let env = TestEnvironment::new().unwrap();
    let (root, deleted, kept) = {
        let store = open(&env);
        let root = store.find_or_create_root("file:///del").unwrap();
        let deleted = store.create_child(root, "a.txt", FileAttributes::file(3, 1)).unwrap();
        let kept = store.create_child(root, "b.txt", FileAttributes::file(4, 1)).unwrap();
        store.delete_record(deleted).unwrap();
        assert_eq!(store.list_ids(root).unwrap(), vec![kept]);
        assert!(store.files_with_name("a.txt").is_empty());
        store.close().unwrap();
        (root, deleted, kept)
    };

    let store = open(&env);
    assert_eq!(store.list(root).unwrap().ids(), vec![kept]);
    assert_eq!(store.connection().state(), ConnectionState::Open);
    assert_eq!(store.connection().records().error_count(), 0);
    assert!(read_marker(&env.store_root).is_none());

    // The purged slot comes back blank and unlisted.
    assert_eq!(store.free_records(), vec![deleted]);
    let reused = store.create_child(root, "c.txt", FileAttributes::file(5, 1)).unwrap();
    assert_eq!(reused, deleted);
    assert_eq!(store.list_ids(root).unwrap(), vec![reused, kept]);
    assert!(store.check_sanity().unwrap().is_empty());
    store.close().unwrap();
}

#[test]
fn test_deleting_a_root_drops_it_from_the_roots_table() {
    let env = TestEnvironment::new().unwrap();
    {
        let store = open(&env);
        let gone = store.find_or_create_root("file:///gone").unwrap();
        store.find_or_create_root("file:///stays").unwrap();
        store.delete_record(gone).unwrap();
        store.close().unwrap();
    }
    let store = open(&env);
    let urls: Vec<_> = store
        .list_roots()
        .unwrap()
        .iter()
        .map(|r| store.root_url(r.id).unwrap().unwrap().to_string())
        .collect();
    assert_eq!(urls, vec!["file:///stays".to_string()]);
    assert!(store.check_sanity().unwrap().is_empty());
    store.close().unwrap();
}

#[test]
fn test_unclean_restart_does_not_recycle() {
    let env = TestEnvironment::new().unwrap();
    let deleted = {
        let store = open(&env);
        let id = store.create_record().unwrap();
        store.set_length(id, 99).unwrap();
        store.delete_record(id).unwrap();
        store.force().unwrap();
        // Crash: nothing runs after the last flush.
        std::mem::forget(store);
        id
    };

    let store = open(&env);
    assert!(!store.connection().records().was_closed_properly());
    assert!(store.free_records().is_empty());
    let fresh = store.create_record().unwrap();
    assert_ne!(fresh, deleted);
    assert!(store.record(fresh).unwrap().is_blank());
    assert_eq!(store.connection().records().error_count(), 0);
    assert!(read_marker(&env.store_root).is_none());
    store.close().unwrap();

    // The clean close purged the slot; now it is recycled.
    let store = open(&env);
    assert_eq!(store.free_records(), vec![deleted]);
    assert_eq!(store.create_record().unwrap(), deleted);
    assert_eq!(store.connection().records().error_count(), 0);
    store.close().unwrap();
}

#[test]
fn test_dirty_recycled_slot_is_cleaned_and_reported() {
    let env = TestEnvironment::new().unwrap();
    let deleted = {
        let store = open(&env);
        let id = store.create_record().unwrap();
        store.delete_record(id).unwrap();
        store.close().unwrap();
        id
    };
    {
        // Stray write into the purged slot, as if a crashed writer got there
        let table = RecordTable::open(&env.store_root).unwrap();
        table.write_field(deleted, RecordField::Length, 42).unwrap();
        table.flush().unwrap();
    }

    let store = open(&env);
    let notices = Arc::new(AtomicU32::new(0));
    let seen = notices.clone();
    store
        .connection()
        .errors()
        .set_listener(Arc::new(move |notice: &CorruptionNotice| {
            assert_eq!(notice.category, ErrorCategory::ReusedRecordNotClean);
            seen.fetch_add(1, Ordering::SeqCst);
        }));
    assert_eq!(store.free_records(), vec![deleted]);

    assert_eq!(store.create_record().unwrap(), deleted);
    assert!(store.record(deleted).unwrap().is_blank());
    assert_eq!(store.length(deleted).unwrap(), 0);
    assert_eq!(notices.load(Ordering::SeqCst), 1);
    assert_eq!(store.connection().records().error_count(), 1);
    assert!(env.store_root.join(CORRUPTION_MARKER_FILE).exists());
    store.close().unwrap();

    // The marker forces a rebuild: the next session starts empty.
    let store = open(&env);
    assert!(read_marker(&env.store_root).is_none());
    assert_eq!(store.connection().records().max_allocated_id(), 1);
    assert_eq!(store.connection().records().error_count(), 0);
    store.close().unwrap();
}

#[test]
fn test_unclean_shutdown_is_recovered() {
    let env = TestEnvironment::new().unwrap();
    let root = {
        let store = open(&env);
        let root = store.find_or_create_root("file:///crash").unwrap();
        store.close().unwrap();
        root
    };
    {
        let table = RecordTable::open(&env.store_root).unwrap();
        table.set_connected(true);
        table.flush().unwrap();
    }

    let store = open(&env);
    assert_eq!(store.connection().state(), ConnectionState::Open);
    assert_eq!(store.find_root("file:///crash").unwrap(), Some(root));
    store.close().unwrap();
}

#[test]
fn test_version_mismatch_rebuilds() {
    let env = TestEnvironment::new().unwrap();
    {
        let store = open(&env);
        store.find_or_create_root("file:///old").unwrap();
        store.close().unwrap();
    }
    {
        let table = RecordTable::open(&env.store_root).unwrap();
        table.set_version(99).unwrap();
        table.flush().unwrap();
    }

    let store = open(&env);
    assert!(store.list_roots().unwrap().is_empty());
    assert!(store.find_root("file:///old").unwrap().is_none());
    store.close().unwrap();
}

#[test]
fn test_damaged_header_rebuilds() {
    let env = TestEnvironment::new().unwrap();
    {
        let store = open(&env);
        store.create_record().unwrap();
        store.close().unwrap();
    }
    let path = env.store_root.join("records.dat");
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();

    let store = open(&env);
    assert_eq!(store.connection().records().max_allocated_id(), 1);
    store.close().unwrap();
}

#[test]
fn test_marker_forces_rebuild() {
    let env = TestEnvironment::new().unwrap();
    {
        let store = open(&env);
        store.find_or_create_root("file:///m").unwrap();
        store.close().unwrap();
    }
    write_marker(&env.store_root, ErrorCategory::Unrecognized, "test").unwrap();

    let store = open(&env);
    assert!(store.list_roots().unwrap().is_empty());
    assert!(read_marker(&env.store_root).is_none());
    store.close().unwrap();
}

#[test]
fn test_corrupted_children_reported_at_runtime() {
    let env = TestEnvironment::new().unwrap();
    let store = open(&env);
    let root = store.find_or_create_root("file:///bad").unwrap();
    // count 1, then a delta pointing far past the last record
    store
        .connection()
        .attributes()
        .write(root, AttributeKey::CHILDREN, &[1, 0xF0, 0x0F])
        .unwrap();

    let err = store.list(root).unwrap_err();
    assert_eq!(err.corruption_category(), Some(ErrorCategory::ChildrenCorrupted));
    assert_eq!(store.connection().state(), ConnectionState::Corrupted);
    assert_eq!(store.connection().records().error_count(), 1);
    assert!(read_marker(&env.store_root).unwrap().contains("children-corrupted"));
    store.close().unwrap();
}

#[test]
fn test_repeated_faults_escalate() {
    let mut env = TestEnvironment::new().unwrap();
    env.config.errors.restart_threshold = 1;
    let store = open(&env);
    let fault = StoreError::corrupted(ErrorCategory::Unrecognized, "synthetic");

    assert_eq!(store.handle_error(&fault).unwrap().severity, Severity::ConsiderRestart);
    assert_eq!(store.handle_error(&fault).unwrap().severity, Severity::RestartNow);
    assert!(store
        .handle_error(&StoreError::InvalidArgument("caller".into()))
        .is_none());
    store.close().unwrap();
}

#[test]
fn test_merge_keeps_ids_across_case_only_rename() {
    let env = TestEnvironment::new().unwrap();
    let store = open(&env);
    let root = store.find_or_create_root("file:///case").unwrap();
    let readme = store.create_child(root, "readme.md", FileAttributes::file(1, 1)).unwrap();
    let cached = store.list(root).unwrap();

    // A fresh scan of the directory sees the file under a new case.
    let renamed = store.connection().names().intern("README.md").unwrap();
    let scanned = store.create_record().unwrap();
    let fresh = ListResult::new(0, vec![pvfs_store::ChildInfo::new(scanned, renamed)], true);

    let names = store.connection().names();
    let merged = cached.merge(&fresh, false, |id| names.get(id));
    assert_eq!(merged.ids(), vec![readme]);
    assert_eq!(merged.children()[0].name_id, renamed);
    assert!(merged.is_complete());

    let saved = store.update_children(root, |_| Ok(merged.clone())).unwrap();
    assert_eq!(saved.ids(), vec![readme]);
    assert!(!store.is_stale(root, &saved).unwrap());
    store.close().unwrap();
}

#[test]
fn test_move_children_reparents() {
    let env = TestEnvironment::new().unwrap();
    let store = open(&env);
    let root = store.find_or_create_root("file:///mv").unwrap();
    let from = store.create_child(root, "from", FileAttributes::directory(0)).unwrap();
    let to = store.create_child(root, "to", FileAttributes::directory(0)).unwrap();
    let a = store.create_child(from, "a", FileAttributes::file(0, 0)).unwrap();
    let b = store.create_child(from, "b", FileAttributes::file(0, 0)).unwrap();

    assert_eq!(store.move_children(from, to).unwrap(), 2);
    assert!(store.list_ids(from).unwrap().is_empty());
    assert_eq!(store.list_ids(to).unwrap(), vec![a, b]);
    assert_eq!(store.parent(a).unwrap(), to);
    assert_eq!(store.path(b).unwrap(), "file:///mv/to/b");
    assert!(store.check_sanity().unwrap().is_empty());
    store.close().unwrap();
}

#[test]
fn test_bounded_init_attempts() {
    let mut env = TestEnvironment::new().unwrap();
    // A file where the store directory should be makes every attempt fail.
    let blocked = env.store_root.join("blocked");
    std::fs::write(&blocked, b"not a directory").unwrap();
    env.config.storage.root = blocked;
    env.config.storage.max_init_attempts = 2;

    match FsRecords::open(&env.config) {
        Err(StoreError::InitFailed { attempts, .. }) => assert_eq!(attempts, 2),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("store opened on a regular file"),
    }
}
