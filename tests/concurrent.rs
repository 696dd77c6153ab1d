//! Concurrent stores and lookups through shared mounts. Each thread owns
//! a disjoint key range, so every lookup must return exactly what that
//! thread stored, regardless of interleaving.

use std::sync::Arc;
use std::thread;

use grovekv::{Store, StoreOptions, Value};
use tempfile::tempdir;

#[test]
fn concurrent_store_then_lookup_across_two_mounts() {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::new(StoreOptions::default()));
    store
        .create_and_mount_volume(dir.path(), "left", "/left")
        .unwrap();
    store
        .create_and_mount_volume(dir.path(), "right", "/right")
        .unwrap();

    const THREADS: u32 = 4;
    const KEYS_PER_THREAD: u32 = 1000;

    let mut handles = Vec::new();
    for thread_id in 0..THREADS {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..KEYS_PER_THREAD {
                let side = if (thread_id + i) % 2 == 0 { "left" } else { "right" };
                let path = format!("/{side}/t{thread_id}/k{i:04}");
                let value = Value::U64(((thread_id as u64) << 32) | i as u64);
                store.store(&path, value, None).unwrap();
            }
            for i in 0..KEYS_PER_THREAD {
                let side = if (thread_id + i) % 2 == 0 { "left" } else { "right" };
                let path = format!("/{side}/t{thread_id}/k{i:04}");
                let expected = Value::U64(((thread_id as u64) << 32) | i as u64);
                assert_eq!(store.lookup(&path).unwrap(), Some(expected), "{path}");
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn concurrent_overwrites_of_one_key_settle_on_a_single_value() {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::new(StoreOptions::default()));
    store
        .create_and_mount_volume(dir.path(), "only", "/")
        .unwrap();

    let mut handles = Vec::new();
    for thread_id in 0..4u64 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..250u64 {
                store
                    .store("/contended", Value::U64(thread_id * 1000 + i), None)
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // some thread's final write won; it must be one of the last values
    let value = store.lookup("/contended").unwrap().unwrap();
    match value {
        Value::U64(v) => assert_eq!(v % 1000, 249),
        other => panic!("unexpected value {other:?}"),
    }
}

#[test]
fn concurrent_readers_do_not_block_each_other() {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::new(StoreOptions::default()));
    store
        .create_and_mount_volume(dir.path(), "shared", "/")
        .unwrap();
    for i in 0..100u32 {
        store
            .store(&format!("/data/k{i:03}"), Value::U32(i), None)
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                for i in 0..100u32 {
                    assert_eq!(
                        store.lookup(&format!("/data/k{i:03}")).unwrap(),
                        Some(Value::U32(i))
                    );
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}
