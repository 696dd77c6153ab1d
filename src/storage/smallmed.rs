//! # SMFS — Slot-Classed Small Object Storage
//!
//! Allocates byte sequences of 1 to 256 bytes in size-classed slots with
//! 8-byte granularity. Payloads of 8 bytes or less share the smallest
//! class, so slot sizes run 16, 24, …, 256 across 31 classes.
//!
//! ## File Layout
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  -----------------------------------------
//! 0       4     magic "SMFS"
//! 4       4     version {u16 major, u16 minor} = {1, 0}
//! 8       248   freelist heads, one u64 per class
//! 256     ...   slot payloads, placed by freelist or tail
//! ```
//!
//! Each free slot stores the offset of the next free slot of its class in
//! its first 8 bytes, giving one LIFO freelist per class with the head
//! persisted in the header. Offset 0 is the header and never a valid slot.
//!
//! ## Caller Contract
//!
//! `overwrite` and `free_slot` take the exact prior payload size; passing
//! the wrong size files the slot under the wrong class and corrupts the
//! freelist. The tests pin this down with a tracking wrapper that detects
//! double frees and size mismatches.

use eyre::Result;
use zerocopy::IntoBytes;

use super::file::{read_u64_at, write_u64_at, RandomAccessFile};
use super::headers::{SlotFileHeader, SLOT_HEADER_SIZE};
use crate::error::StoreError;

pub const SLOT_SIZE_INCREMENT: usize = 8;
pub const SLOT_CLASS_COUNT: usize = 31;
/// Largest payload SMFS accepts; anything bigger belongs in BGFS.
pub const MAX_SLOT_DATA_SIZE: usize = (SLOT_CLASS_COUNT + 1) * SLOT_SIZE_INCREMENT;

fn slot_class(size: usize) -> Result<usize> {
    if size == 0 || size > MAX_SLOT_DATA_SIZE {
        return Err(StoreError::SizeTooBig(size).into());
    }
    if size <= SLOT_SIZE_INCREMENT {
        return Ok(0);
    }
    Ok(size / SLOT_SIZE_INCREMENT - 1 - usize::from(size % SLOT_SIZE_INCREMENT == 0))
}

fn slot_size_for_class(class: usize) -> usize {
    (class + 2) * SLOT_SIZE_INCREMENT
}

fn head_field_offset(class: usize) -> u64 {
    (8 + class * 8) as u64
}

pub struct SlotFileStorage {
    file: Box<dyn RandomAccessFile>,
    free_heads: [u64; SLOT_CLASS_COUNT],
}

impl std::fmt::Debug for SlotFileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotFileStorage")
            .field("file", &"<dyn RandomAccessFile>")
            .field("free_heads", &self.free_heads)
            .finish()
    }
}

impl SlotFileStorage {
    /// Initializes a fresh SMFS file; the file must be empty.
    pub fn create(mut file: Box<dyn RandomAccessFile>) -> Result<Self> {
        let size = file.seek_end()?;
        if size != 0 {
            return Err(StoreError::InvalidFile {
                path: file.path().to_path_buf(),
                reason: format!("SMFS create requires an empty file, size is {size}"),
            }
            .into());
        }
        file.seek(0)?;
        file.write(SlotFileHeader::new().as_bytes())?;
        Ok(Self {
            file,
            free_heads: [0; SLOT_CLASS_COUNT],
        })
    }

    /// Opens an existing SMFS file, validating magic and version.
    pub fn open(mut file: Box<dyn RandomAccessFile>) -> Result<Self> {
        let size = file.seek_end()?;
        if size < SLOT_HEADER_SIZE as u64 {
            return Err(StoreError::InvalidFile {
                path: file.path().to_path_buf(),
                reason: format!("SMFS file size {size} is smaller than the header"),
            }
            .into());
        }
        let mut bytes = [0u8; SLOT_HEADER_SIZE];
        file.seek(0)?;
        file.read(&mut bytes)?;
        let header = SlotFileHeader::from_bytes(&bytes, file.path())?;
        Ok(Self {
            file,
            free_heads: header.free_heads(),
        })
    }

    /// Writes `bytes` into a slot of its class and returns the slot offset.
    pub fn allocate_and_write(&mut self, bytes: &[u8]) -> Result<u64> {
        let class = slot_class(bytes.len())?;
        let offset = if self.free_heads[class] != 0 {
            let slot = self.free_heads[class];
            let next = read_u64_at(self.file.as_mut(), slot)?;
            write_u64_at(self.file.as_mut(), head_field_offset(class), next)?;
            self.free_heads[class] = next;
            slot
        } else {
            self.file.seek_end()?
        };
        self.file.seek(offset)?;
        self.file.write(bytes)?;

        let padding = slot_size_for_class(class) - bytes.len();
        if padding != 0 {
            let zeros = [0u8; MAX_SLOT_DATA_SIZE];
            self.file.write(&zeros[..padding])?;
        }
        Ok(offset)
    }

    /// Updates a slot in place when the class is unchanged; otherwise frees
    /// the old slot and allocates a new one. Returns the slot offset the
    /// payload now lives at.
    pub fn overwrite(&mut self, offset: u64, old_size: usize, bytes: &[u8]) -> Result<u64> {
        self.check_offset(offset, "overwrite")?;
        let old_class = slot_class(old_size)?;
        let new_class = slot_class(bytes.len())?;
        if old_class == new_class {
            self.file.seek(offset)?;
            self.file.write(bytes)?;
            return Ok(offset);
        }
        self.free_slot(offset, old_size)?;
        self.allocate_and_write(bytes)
    }

    /// Raw read of `out.len()` bytes at a slot offset.
    pub fn read(&mut self, offset: u64, out: &mut [u8]) -> Result<()> {
        self.check_offset(offset, "read")?;
        self.file.seek(offset)?;
        self.file.read(out)
    }

    /// Pushes a slot onto its class freelist.
    pub fn free_slot(&mut self, offset: u64, size: usize) -> Result<()> {
        self.check_offset(offset, "free_slot")?;
        let class = slot_class(size)?;
        write_u64_at(self.file.as_mut(), offset, self.free_heads[class])?;
        self.free_heads[class] = offset;
        write_u64_at(self.file.as_mut(), head_field_offset(class), offset)
    }

    fn check_offset(&self, offset: u64, location: &'static str) -> Result<()> {
        if offset < SLOT_HEADER_SIZE as u64 {
            return Err(StoreError::InvalidOffset { offset, location }.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StdFile;
    use std::collections::HashMap;

    fn fresh_storage() -> (SlotFileStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let file = StdFile::create(dir.path().join("slots.phkvsstm")).unwrap();
        (SlotFileStorage::create(Box::new(file)).unwrap(), dir)
    }

    /// Mirrors the allocator's contract on the caller side: remembers the
    /// size passed at allocation and flags double frees and wrong-size
    /// frees that would silently corrupt the real freelists.
    struct TrackingStorage {
        inner: SlotFileStorage,
        live: HashMap<u64, usize>,
    }

    impl TrackingStorage {
        fn new(inner: SlotFileStorage) -> Self {
            Self {
                inner,
                live: HashMap::new(),
            }
        }

        fn allocate_and_write(&mut self, bytes: &[u8]) -> u64 {
            let offset = self.inner.allocate_and_write(bytes).unwrap();
            assert!(
                self.live.insert(offset, bytes.len()).is_none(),
                "allocator returned a live slot at {offset}"
            );
            offset
        }

        fn overwrite(&mut self, offset: u64, old_size: usize, bytes: &[u8]) -> u64 {
            let recorded = self.live.remove(&offset).expect("overwrite of freed slot");
            assert_eq!(recorded, old_size, "overwrite with wrong prior size");
            let new_offset = self.inner.overwrite(offset, old_size, bytes).unwrap();
            assert!(self.live.insert(new_offset, bytes.len()).is_none());
            new_offset
        }

        fn free_slot(&mut self, offset: u64, size: usize) {
            let recorded = self.live.remove(&offset).expect("double free");
            assert_eq!(recorded, size, "free with wrong prior size");
            self.inner.free_slot(offset, size).unwrap();
        }
    }

    #[test]
    fn class_derivation_matches_slot_table() {
        assert_eq!(slot_class(1).unwrap(), 0);
        assert_eq!(slot_class(8).unwrap(), 0);
        assert_eq!(slot_class(9).unwrap(), 0);
        assert_eq!(slot_class(16).unwrap(), 0);
        assert_eq!(slot_class(17).unwrap(), 1);
        assert_eq!(slot_class(24).unwrap(), 1);
        assert_eq!(slot_class(25).unwrap(), 2);
        assert_eq!(slot_class(255).unwrap(), 30);
        assert_eq!(slot_class(256).unwrap(), 30);
        assert_eq!(slot_size_for_class(0), 16);
        assert_eq!(slot_size_for_class(30), 256);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let err = slot_class(257).unwrap_err();

        assert!(matches!(
            StoreError::from_report(&err),
            Some(StoreError::SizeTooBig(257))
        ));
    }

    #[test]
    fn every_slot_size_roundtrips() {
        let (mut storage, _dir) = fresh_storage();

        for size in 1..=MAX_SLOT_DATA_SIZE {
            let payload: Vec<u8> = (0..size).map(|i| (i * 7 % 256) as u8).collect();
            let offset = storage.allocate_and_write(&payload).unwrap();

            let mut out = vec![0u8; size];
            storage.read(offset, &mut out).unwrap();
            assert_eq!(out, payload, "size {size}");
        }
    }

    #[test]
    fn first_allocation_lands_after_header() {
        let (mut storage, _dir) = fresh_storage();

        let offset = storage.allocate_and_write(&[1u8; 8]).unwrap();

        assert_eq!(offset, SLOT_HEADER_SIZE as u64);
    }

    #[test]
    fn overwrite_within_class_keeps_offset() {
        let (mut storage, _dir) = fresh_storage();
        let offset = storage.allocate_and_write(&[1u8; 8]).unwrap();

        let same = storage.overwrite(offset, 8, &[2u8; 16]).unwrap();

        assert_eq!(same, offset);
        let mut out = [0u8; 16];
        storage.read(offset, &mut out).unwrap();
        assert_eq!(out, [2u8; 16]);
    }

    #[test]
    fn overwrite_across_class_moves_and_recycles() {
        let (mut storage, _dir) = fresh_storage();
        let first = storage.allocate_and_write(&[1u8; 16]).unwrap();

        let moved = storage.overwrite(first, 16, &[3u8; 17]).unwrap();
        assert_ne!(moved, first);

        // the class-0 slot freed by the move is handed back next
        assert_eq!(storage.allocate_and_write(&[4u8; 8]).unwrap(), first);
    }

    #[test]
    fn freelist_is_lifo_per_class() {
        let (mut storage, _dir) = fresh_storage();
        let a = storage.allocate_and_write(&[1u8; 20]).unwrap();
        let b = storage.allocate_and_write(&[2u8; 20]).unwrap();
        let small = storage.allocate_and_write(&[3u8; 4]).unwrap();

        storage.free_slot(a, 20).unwrap();
        storage.free_slot(b, 20).unwrap();
        storage.free_slot(small, 4).unwrap();

        assert_eq!(storage.allocate_and_write(&[4u8; 18]).unwrap(), b);
        assert_eq!(storage.allocate_and_write(&[5u8; 18]).unwrap(), a);
        assert_eq!(storage.allocate_and_write(&[6u8; 2]).unwrap(), small);
    }

    #[test]
    fn reopen_preserves_class_freelists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slots.phkvsstm");
        let freed;
        {
            let file = StdFile::create(&path).unwrap();
            let mut storage = SlotFileStorage::create(Box::new(file)).unwrap();
            freed = storage.allocate_and_write(&[1u8; 40]).unwrap();
            storage.free_slot(freed, 40).unwrap();
        }

        let file = StdFile::open(&path).unwrap();
        let mut storage = SlotFileStorage::open(Box::new(file)).unwrap();

        assert_eq!(storage.allocate_and_write(&[2u8; 33]).unwrap(), freed);
    }

    #[test]
    fn offset_inside_header_is_rejected() {
        let (mut storage, _dir) = fresh_storage();

        let err = storage.read(0, &mut [0u8; 1]).unwrap_err();

        assert!(matches!(
            StoreError::from_report(&err),
            Some(StoreError::InvalidOffset { .. })
        ));
    }

    #[test]
    fn tracking_wrapper_walks_class_boundaries() {
        let (storage, _dir) = fresh_storage();
        let mut tracked = TrackingStorage::new(storage);

        let o1 = tracked.allocate_and_write(&[1u8; 8]);
        let o2 = tracked.overwrite(o1, 8, &[2u8; 16]);
        assert_eq!(o2, o1);

        let o3 = tracked.overwrite(o2, 16, &[3u8; 17]);
        assert_ne!(o3, o1);

        // the freed class-0 slot is observable through reuse
        let o4 = tracked.allocate_and_write(&[4u8; 5]);
        assert_eq!(o4, o1);

        tracked.free_slot(o3, 17);
        tracked.free_slot(o4, 5);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn tracking_wrapper_catches_double_free() {
        let (storage, _dir) = fresh_storage();
        let mut tracked = TrackingStorage::new(storage);
        let offset = tracked.allocate_and_write(&[1u8; 8]);

        tracked.free_slot(offset, 8);
        tracked.free_slot(offset, 8);
    }

    #[test]
    #[should_panic(expected = "wrong prior size")]
    fn tracking_wrapper_catches_size_mismatch() {
        let (storage, _dir) = fresh_storage();
        let mut tracked = TrackingStorage::new(storage);
        let offset = tracked.allocate_and_write(&[1u8; 30]);

        tracked.free_slot(offset, 8);
    }
}
