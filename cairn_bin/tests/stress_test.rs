use std::sync::Arc;
use std::thread;

use keystone::kvstore::KvStore;
use tempfile::tempdir;

#[test]
fn concurrent_writers_do_not_lose_records() {
    let dir = tempdir().unwrap();
    let store =
        KvStore::open(dir.path().join("stress.db"), dir.path().join("stress.wal")).unwrap();
    store.create_table("stress", 3).unwrap();

    const WORKERS: i32 = 4;
    const RECORDS: i32 = 50;

    let mut handles = Vec::new();
    for worker in 0..WORKERS {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for j in 0..RECORDS {
                let key = worker * RECORDS + j;
                store
                    .put("stress", key, &format!("value{key}"))
                    .expect("concurrent put");
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for key in 0..WORKERS * RECORDS {
        assert_eq!(
            store.get("stress", key).unwrap().as_deref(),
            Some(format!("value{key}").as_str())
        );
    }
    assert_eq!(
        store.catalog().get("stress").unwrap().row_count,
        WORKERS * RECORDS
    );
    store.close().unwrap();
}

#[test]
fn concurrent_readers_and_writers_on_separate_tables() {
    let dir = tempdir().unwrap();
    let store = KvStore::open(dir.path().join("mixed.db"), dir.path().join("mixed.wal")).unwrap();
    store.create_table("left", 2).unwrap();
    store.create_table("right", 2).unwrap();
    for k in 0..50 {
        store.put("left", k, "seed").unwrap();
    }

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for k in 0..50 {
                store.put("right", k, "fresh").expect("writer put");
            }
        })
    };
    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for k in 0..50 {
                assert_eq!(store.get("left", k).unwrap().as_deref(), Some("seed"));
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    store.close().unwrap();
}
