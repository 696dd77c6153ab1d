//! Volume engine at scale: large key counts, non-inline keys and values,
//! and persistence across reopen.

use grovekv::storage::{BigFileStorage, SlotFileStorage, StdFile};
use grovekv::{Value, Volume};
use tempfile::tempdir;

fn create_volume(dir: &std::path::Path) -> Volume {
    Volume::create(
        Box::new(StdFile::create(dir.join("v.phkvsmain")).unwrap()),
        SlotFileStorage::create(Box::new(StdFile::create(dir.join("v.phkvsstm")).unwrap()))
            .unwrap(),
        BigFileStorage::create(Box::new(StdFile::create(dir.join("v.phkvsbig")).unwrap()))
            .unwrap(),
    )
    .unwrap()
}

fn open_volume(dir: &std::path::Path) -> Volume {
    Volume::open(
        Box::new(StdFile::open(dir.join("v.phkvsmain")).unwrap()),
        SlotFileStorage::open(Box::new(StdFile::open(dir.join("v.phkvsstm")).unwrap())).unwrap(),
        BigFileStorage::open(Box::new(StdFile::open(dir.join("v.phkvsbig")).unwrap())).unwrap(),
    )
    .unwrap()
}

#[test]
fn ten_thousand_keys_roundtrip() {
    let dir = tempdir().unwrap();
    let mut volume = create_volume(dir.path());

    for i in 0..10_000u32 {
        volume
            .store(&format!("/bulk/key-{i:05}"), Value::U32(i), 0)
            .unwrap();
    }
    for i in 0..10_000u32 {
        assert_eq!(
            volume.lookup(&format!("/bulk/key-{i:05}")).unwrap(),
            Some(Value::U32(i)),
            "key-{i:05}"
        );
    }

    let listing = volume.get_dir_entries("/bulk").unwrap().unwrap();
    assert_eq!(listing.len(), 10_000);
}

#[test]
fn erasing_everything_leaves_an_empty_root() {
    let dir = tempdir().unwrap();
    let mut volume = create_volume(dir.path());
    for i in 0..1000u32 {
        volume
            .store(&format!("/wipe/k{i}"), Value::U32(i), 0)
            .unwrap();
    }

    volume.erase_dir_recursive("/wipe").unwrap();

    assert!(volume.get_dir_entries("/").unwrap().unwrap().is_empty());
    assert_eq!(volume.lookup("/wipe/k0").unwrap(), None);
}

#[test]
fn non_inline_keys_and_values_roundtrip() {
    let dir = tempdir().unwrap();
    let mut volume = create_volume(dir.path());

    // 17 bytes is the first non-inline length for both keys and values
    let key17 = format!("/{}", "k".repeat(17));
    let key300 = format!("/{}", "q".repeat(300));
    let value17 = Value::Bytes(vec![7u8; 17]);
    let value16 = Value::Bytes(vec![6u8; 16]);
    let text = Value::from("a".repeat(17));

    volume.store(&key17, value17.clone(), 0).unwrap();
    volume.store(&key300, value16.clone(), 0).unwrap();
    volume.store("/text", text.clone(), 0).unwrap();

    assert_eq!(volume.lookup(&key17).unwrap(), Some(value17));
    assert_eq!(volume.lookup(&key300).unwrap(), Some(value16));
    assert_eq!(volume.lookup("/text").unwrap(), Some(text));
}

#[test]
fn mixed_directory_tree_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let mut volume = create_volume(dir.path());
        for branch in ["a", "b", "c"] {
            for i in 0..200u32 {
                volume
                    .store(
                        &format!("/{branch}/sub/k{i:03}"),
                        Value::Bytes(vec![i as u8; (i as usize % 300) + 1]),
                        0,
                    )
                    .unwrap();
            }
        }
    }

    let mut volume = open_volume(dir.path());

    for branch in ["a", "b", "c"] {
        for i in 0..200u32 {
            assert_eq!(
                volume.lookup(&format!("/{branch}/sub/k{i:03}")).unwrap(),
                Some(Value::Bytes(vec![i as u8; (i as usize % 300) + 1]))
            );
        }
    }
}
