use std::sync::Arc;
use std::thread;
use std::time::Instant;

use pvfs_cas::ContentStore;
use tempfile::TempDir;

#[test]
fn stress_test_mass_store() {
    // Quick stress test for CI
    const BLOB_COUNT: usize = 1000;

    let temp = TempDir::new().unwrap();
    let cas = ContentStore::open(temp.path()).unwrap();

    let start = Instant::now();
    for i in 0..BLOB_COUNT {
        // Alternating content to test dedup (50% unique)
        let content = if i % 2 == 0 {
            format!("content unique {}", i)
        } else {
            "shared content".to_string()
        };
        cas.store(content.as_bytes()).unwrap();
    }
    println!("Storing took: {:?}", start.elapsed());

    // 500 unique blobs + 1 shared blob
    assert_eq!(cas.stats().blob_count, 501);
}

#[test]
fn concurrent_store_of_identical_bytes_yields_one_id() {
    let temp = TempDir::new().unwrap();
    let cas = Arc::new(ContentStore::open(temp.path()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cas = Arc::clone(&cas);
            thread::spawn(move || {
                let mut ids = Vec::new();
                for i in 0..50 {
                    ids.push(cas.store(format!("blob {}", i).as_bytes()).unwrap());
                    ids.push(cas.store(format!("private {} {}", t, i).as_bytes()).unwrap());
                }
                ids
            })
        })
        .collect();

    let results: Vec<Vec<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Shared blobs got the same id in every thread
    for ids in &results[1..] {
        for i in 0..50 {
            assert_eq!(ids[i * 2], results[0][i * 2]);
        }
    }
    assert_eq!(cas.len(), 50 + 8 * 50);

    for i in 0..50 {
        let id = results[0][i * 2];
        assert_eq!(cas.read(id).unwrap(), format!("blob {}", i).as_bytes());
    }
}
