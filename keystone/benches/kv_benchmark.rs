use criterion::{black_box, criterion_group, criterion_main, Criterion};
use keystone::kvstore::KvStore;
use tempfile::TempDir;

fn setup_store() -> (std::sync::Arc<KvStore>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = KvStore::open(dir.path().join("bench.db"), dir.path().join("bench.wal")).unwrap();
    store.create_table("bench", 4).unwrap();
    for k in 0..1000 {
        store.put("bench", k, &format!("value-{k}")).unwrap();
    }
    (store, dir)
}

fn benchmark_put(c: &mut Criterion) {
    let (store, _dir) = setup_store();
    let mut key = 1000;
    c.bench_function("put", |b| {
        b.iter(|| {
            key += 1;
            store.put("bench", black_box(key), "benched").unwrap();
        })
    });
}

fn benchmark_get(c: &mut Criterion) {
    let (store, _dir) = setup_store();
    c.bench_function("get", |b| {
        b.iter(|| store.get("bench", black_box(512)).unwrap())
    });
}

criterion_group!(benches, benchmark_put, benchmark_get);
criterion_main!(benches);
