//! Store-level behavior across mounts: placement, overlap resolution,
//! unmount visibility, recursive erase, and volume lifecycle.

use grovekv::{delete_volume, Store, StoreError, StoreOptions, Value};
use tempfile::tempdir;

fn new_store() -> Store {
    Store::new(StoreOptions::default())
}

#[test]
fn store_and_lookup_through_root_mount() {
    let dir = tempdir().unwrap();
    let store = new_store();
    store
        .create_and_mount_volume(dir.path(), "main", "/")
        .unwrap();

    store.store("/hello", Value::from("world"), None).unwrap();

    assert_eq!(store.lookup("/hello").unwrap(), Some(Value::from("world")));
    assert_eq!(store.lookup("/absent").unwrap(), None);
}

#[test]
fn mutating_an_unmounted_namespace_fails() {
    let store = new_store();

    let err = store.store("/k", Value::U8(1), None).unwrap_err();

    assert!(matches!(
        StoreError::from_report(&err),
        Some(StoreError::NoVolumeMounted(_))
    ));
    assert_eq!(store.lookup("/k").unwrap(), None);
}

#[test]
fn unmount_invalidates_reads_and_remount_restores_them() {
    let dir = tempdir().unwrap();
    let store = new_store();
    let id = store
        .create_and_mount_volume(dir.path(), "main", "/")
        .unwrap();
    store.store("/hello", Value::from("world"), None).unwrap();

    store.unmount_volume(id).unwrap();
    assert_eq!(store.lookup("/hello").unwrap(), None);

    store.mount_volume(dir.path(), "main", "/").unwrap();
    assert_eq!(store.lookup("/hello").unwrap(), Some(Value::from("world")));
}

#[test]
fn deeper_mount_owns_entries_under_its_prefix() {
    let dir = tempdir().unwrap();
    let store = new_store();
    let v1 = store
        .create_and_mount_volume(dir.path(), "deep", "/foo/bar")
        .unwrap();
    store
        .create_and_mount_volume(dir.path(), "shallow", "/foo")
        .unwrap();

    store
        .store("/foo/bar/hello", Value::from("world"), None)
        .unwrap();
    assert_eq!(
        store.lookup("/foo/bar/hello").unwrap(),
        Some(Value::from("world"))
    );

    // the key lived in the deeper mount, so it vanishes with it even
    // though the shallow mount still covers the path
    store.unmount_volume(v1).unwrap();
    assert_eq!(store.lookup("/foo/bar/hello").unwrap(), None);
}

#[test]
fn kind_collision_is_reported() {
    let dir = tempdir().unwrap();
    let store = new_store();
    store
        .create_and_mount_volume(dir.path(), "main", "/")
        .unwrap();
    store.store("/d/k", Value::U8(1), None).unwrap();

    let err = store.store("/d/k/x", Value::U8(2), None).unwrap_err();

    assert!(matches!(
        StoreError::from_report(&err),
        Some(StoreError::KindMismatch { .. })
    ));
}

#[test]
fn dir_entries_union_all_contributing_volumes() {
    let dir = tempdir().unwrap();
    let store = new_store();
    // mounted alone so its keys land in it
    let inner = store
        .create_and_mount_volume(dir.path(), "inner", "/foo")
        .unwrap();
    store.store("/foo/from-inner", Value::U8(1), None).unwrap();
    store.unmount_volume(inner).unwrap();

    store
        .create_and_mount_volume(dir.path(), "outer", "/")
        .unwrap();
    store.store("/foo/from-outer", Value::U8(2), None).unwrap();
    store.mount_volume(dir.path(), "inner", "/foo").unwrap();

    let mut names: Vec<String> = store
        .get_dir_entries("/foo")
        .unwrap()
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    names.sort();

    assert_eq!(names, vec!["from-inner", "from-outer"]);
    assert_eq!(store.lookup("/foo/from-inner").unwrap(), Some(Value::U8(1)));
    assert_eq!(store.lookup("/foo/from-outer").unwrap(), Some(Value::U8(2)));
}

#[test]
fn erase_key_removes_only_the_cached_key() {
    let dir = tempdir().unwrap();
    let store = new_store();
    store
        .create_and_mount_volume(dir.path(), "main", "/")
        .unwrap();
    store.store("/a/k1", Value::U8(1), None).unwrap();
    store.store("/a/k2", Value::U8(2), None).unwrap();

    store.erase_key("/a/k1").unwrap();

    assert_eq!(store.lookup("/a/k1").unwrap(), None);
    assert_eq!(store.lookup("/a/k2").unwrap(), Some(Value::U8(2)));
}

#[test]
fn recursive_erase_spans_every_contributing_volume() {
    let dir = tempdir().unwrap();
    let store = new_store();

    // populate v1 alone so /foo content lands in it
    let v1 = store
        .create_and_mount_volume(dir.path(), "v1", "/")
        .unwrap();
    store.store("/foo/key1", Value::from("a"), None).unwrap();
    store.store("/foo/bar/key1", Value::from("b"), None).unwrap();
    store.unmount_volume(v1).unwrap();

    // populate v2, mounted at /foo, with the remaining keys
    store
        .create_and_mount_volume(dir.path(), "v2", "/foo")
        .unwrap();
    store.store("/foo/key2", Value::from("c"), None).unwrap();
    store.store("/foo/bar/key2", Value::from("d"), None).unwrap();

    // both mounted: /foo has content in both volumes
    let v1 = store.mount_volume(dir.path(), "v1", "/").unwrap();
    assert_eq!(store.lookup("/foo/key1").unwrap(), Some(Value::from("a")));
    assert_eq!(store.lookup("/foo/key2").unwrap(), Some(Value::from("c")));

    store.erase_dir_recursive("/foo").unwrap();

    for path in ["/foo/key1", "/foo/key2", "/foo/bar/key1", "/foo/bar/key2"] {
        assert_eq!(store.lookup(path).unwrap(), None, "{path}");
    }

    // the erase went to disk on every volume, not just the cache
    let v2 = store
        .mount_volumes_info()
        .iter()
        .find(|info| info.volume_name == "v2")
        .map(|info| info.id)
        .unwrap();
    store.unmount_volume(v1).unwrap();
    store.unmount_volume(v2).unwrap();
    store.mount_volume(dir.path(), "v1", "/").unwrap();
    store.mount_volume(dir.path(), "v2", "/foo").unwrap();
    for path in ["/foo/key1", "/foo/key2", "/foo/bar/key1", "/foo/bar/key2"] {
        assert_eq!(store.lookup(path).unwrap(), None, "{path}");
    }
}

#[test]
fn many_overlapping_mounts_preserve_every_key() {
    let dir = tempdir().unwrap();
    let store = new_store();
    const VOLUMES: usize = 100;
    const KEYS_PER_VOLUME: usize = 100;

    // fill each volume while it is the only mount at /foo
    for volume in 0..VOLUMES {
        let name = format!("vol{volume:03}");
        let id = store
            .create_and_mount_volume(dir.path(), &name, "/foo")
            .unwrap();
        for key in 0..KEYS_PER_VOLUME {
            store
                .store(
                    &format!("/foo/key-{volume:03}-{key:03}"),
                    Value::U32((volume * KEYS_PER_VOLUME + key) as u32),
                    None,
                )
                .unwrap();
        }
        store.unmount_volume(id).unwrap();
    }

    // remount everything in the same order; the union must be complete
    for volume in 0..VOLUMES {
        let name = format!("vol{volume:03}");
        store.mount_volume(dir.path(), &name, "/foo").unwrap();
    }

    let listing = store.get_dir_entries("/foo").unwrap().unwrap();
    assert_eq!(listing.len(), VOLUMES * KEYS_PER_VOLUME);
    for volume in 0..VOLUMES {
        for key in 0..KEYS_PER_VOLUME {
            assert_eq!(
                store
                    .lookup(&format!("/foo/key-{volume:03}-{key:03}"))
                    .unwrap(),
                Some(Value::U32((volume * KEYS_PER_VOLUME + key) as u32))
            );
        }
    }
}

#[test]
fn mount_info_reports_all_mounts() {
    let dir = tempdir().unwrap();
    let store = new_store();
    store
        .create_and_mount_volume(dir.path(), "a", "/")
        .unwrap();
    store
        .create_and_mount_volume(dir.path(), "b", "/data")
        .unwrap();

    let info = store.mount_volumes_info();

    assert_eq!(info.len(), 2);
    assert_eq!(info[0].volume_name, "a");
    assert_eq!(info[0].mount_path, "");
    assert_eq!(info[1].volume_name, "b");
    assert_eq!(info[1].mount_path, "/data");
}

#[test]
fn delete_volume_removes_the_file_triplet() {
    let dir = tempdir().unwrap();
    let store = new_store();
    let id = store
        .create_and_mount_volume(dir.path(), "gone", "/")
        .unwrap();
    store.unmount_volume(id).unwrap();

    delete_volume(dir.path(), "gone").unwrap();

    assert!(!dir.path().join("gone.phkvsmain").exists());
    assert!(!dir.path().join("gone.phkvsstm").exists());
    assert!(!dir.path().join("gone.phkvsbig").exists());
    assert!(delete_volume(dir.path(), "gone").is_err());
}

#[test]
fn creating_an_existing_volume_fails() {
    let dir = tempdir().unwrap();
    let store = new_store();
    store
        .create_and_mount_volume(dir.path(), "dup", "/")
        .unwrap();

    let err = store
        .create_and_mount_volume(dir.path(), "dup", "/other")
        .unwrap_err();

    assert!(matches!(
        StoreError::from_report(&err),
        Some(StoreError::InvalidFile { .. })
    ));
}

#[test]
fn mounting_a_missing_volume_fails() {
    let dir = tempdir().unwrap();
    let store = new_store();

    let err = store.mount_volume(dir.path(), "nothing", "/").unwrap_err();

    assert!(matches!(
        StoreError::from_report(&err),
        Some(StoreError::InvalidFile { .. })
    ));
}
