use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pvfs_cas::ContentStore;
use tempfile::TempDir;

fn bench_cas_store_dedup(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let cas = ContentStore::open(temp.path()).unwrap();
    let data = vec![0u8; 1024 * 10]; // 10KB

    // Same bytes every iteration: measures the hash + dedup lookup path
    c.bench_function("cas_store_dedup_10kb", |b| {
        b.iter(|| cas.store(black_box(&data)).unwrap())
    });
}

fn bench_cas_store_unique(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let cas = ContentStore::open(temp.path()).unwrap();
    let mut counter = 0u64;

    c.bench_function("cas_store_unique_1kb", |b| {
        b.iter(|| {
            counter += 1;
            let mut data = vec![0u8; 1024];
            data[..8].copy_from_slice(&counter.to_le_bytes());
            cas.store(black_box(&data)).unwrap()
        })
    });
}

fn bench_cas_read(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let cas = ContentStore::open(temp.path()).unwrap();
    let data = vec![0u8; 1024 * 10]; // 10KB
    let id = cas.store(&data).unwrap();

    c.bench_function("cas_read_10kb", |b| {
        b.iter(|| cas.read(black_box(id)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_cas_store_dedup,
    bench_cas_store_unique,
    bench_cas_read
);
criterion_main!(benches);
