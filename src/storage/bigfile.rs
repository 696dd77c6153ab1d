//! # BGFS — Page-Chained Blob Storage
//!
//! Stores byte sequences of arbitrary length as singly linked chains of
//! 512-byte pages. Each page starts with the little-endian absolute offset
//! of the next page in the chain (0 terminates), leaving 504 payload bytes.
//!
//! ## File Layout
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  -----------------------------------------
//! 0       4     magic "BGFS"
//! 4       4     version {u16 major, u16 minor} = {1, 0}
//! 8       8     first free page offset (0 = none)
//! 16      496   reserved, zero
//! 512     ...   page stream
//! ```
//!
//! The file size is a multiple of 512 at all times. Offset 0 is the header
//! page and is never a valid chain offset.
//!
//! ## Free Space
//!
//! Freed chains are threaded into a LIFO freelist that reuses the next
//! pointer slot of each free page. `free` walks the chain to its tail,
//! links the tail to the old freelist head, and installs the chain head as
//! the new freelist head, so the whole chain is recycled in one splice.
//!
//! ## Thread Safety
//!
//! Not thread-safe on its own; the owning volume is serialized by the
//! store's per-volume operation sequencer.

use eyre::Result;
use tracing::trace;
use zerocopy::IntoBytes;

use super::file::{read_u64_at, write_u64_at, RandomAccessFile};
use super::headers::{BigFileHeader, BIGFILE_HEADER_SIZE};
use crate::error::StoreError;

pub const PAGE_FULL_SIZE: u64 = 512;
pub const PAGE_DATA_SIZE: usize = 504;

const FIRST_FREE_FIELD_OFFSET: u64 = 8;

pub struct BigFileStorage {
    file: Box<dyn RandomAccessFile>,
    first_free_page: u64,
}

impl std::fmt::Debug for BigFileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigFileStorage")
            .field("file", &"<dyn RandomAccessFile>")
            .field("first_free_page", &self.first_free_page)
            .finish()
    }
}

impl BigFileStorage {
    /// Initializes a fresh BGFS file; the file must be empty.
    pub fn create(mut file: Box<dyn RandomAccessFile>) -> Result<Self> {
        let size = file.seek_end()?;
        if size != 0 {
            return Err(StoreError::InvalidFile {
                path: file.path().to_path_buf(),
                reason: format!("BGFS create requires an empty file, size is {size}"),
            }
            .into());
        }
        let mut page = [0u8; PAGE_FULL_SIZE as usize];
        page[..BIGFILE_HEADER_SIZE].copy_from_slice(BigFileHeader::new().as_bytes());
        file.seek(0)?;
        file.write(&page)?;
        Ok(Self {
            file,
            first_free_page: 0,
        })
    }

    /// Opens an existing BGFS file, validating magic, version, and size.
    pub fn open(mut file: Box<dyn RandomAccessFile>) -> Result<Self> {
        let size = file.seek_end()?;
        if size == 0 || size % PAGE_FULL_SIZE != 0 {
            return Err(StoreError::InvalidFile {
                path: file.path().to_path_buf(),
                reason: format!("BGFS file size {size} is not a positive multiple of 512"),
            }
            .into());
        }
        let mut bytes = [0u8; BIGFILE_HEADER_SIZE];
        file.seek(0)?;
        file.read(&mut bytes)?;
        let header = BigFileHeader::from_bytes(&bytes, file.path())?;
        Ok(Self {
            file,
            first_free_page: header.first_free_page(),
        })
    }

    /// Writes `bytes` into a fresh page chain and returns the offset of its
    /// first page.
    pub fn allocate_and_write(&mut self, bytes: &[u8]) -> Result<u64> {
        let mut tail_size = 0u64;
        let first = self.allocate_page(&mut tail_size)?;
        trace!(offset = first, len = bytes.len(), "bgfs allocate");

        let mut current = first;
        let mut rest = bytes;
        loop {
            let mut next = 0u64;
            let take = if rest.len() > PAGE_DATA_SIZE {
                next = self.allocate_page(&mut tail_size)?;
                PAGE_DATA_SIZE
            } else {
                rest.len()
            };
            self.write_page(current, next, &rest[..take])?;
            rest = &rest[take..];
            if next == 0 {
                return Ok(first);
            }
            current = next;
        }
    }

    /// Replaces the contents of an existing chain in place, growing or
    /// shrinking it as needed. Freed tail pages go back to the freelist.
    pub fn overwrite(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.check_offset(offset, "overwrite")?;

        let mut tail_size = 0u64;
        let mut current = offset;
        let mut next = 0u64;
        let mut past_old_chain = false;
        let mut rest = bytes;
        loop {
            if !past_old_chain {
                next = read_u64_at(self.file.as_mut(), current)?;
            }
            let last_page = rest.len() <= PAGE_DATA_SIZE;
            let take = if last_page {
                rest.len()
            } else {
                if past_old_chain {
                    next = self.allocate_page(&mut tail_size)?;
                } else if next == 0 {
                    next = self.allocate_page(&mut tail_size)?;
                    past_old_chain = true;
                }
                PAGE_DATA_SIZE
            };
            self.write_page(current, if last_page { 0 } else { next }, &rest[..take])?;
            rest = &rest[take..];
            if last_page {
                break;
            }
            current = next;
        }
        if !past_old_chain && next != 0 {
            self.free(next)?;
        }
        Ok(())
    }

    /// Reads from a chain until `out` is filled; trailing pages are
    /// ignored.
    pub fn read(&mut self, offset: u64, out: &mut [u8]) -> Result<()> {
        self.check_offset(offset, "read")?;
        let mut current = offset;
        let mut filled = 0;
        while filled < out.len() {
            self.check_offset(current, "read chain")?;
            let mut page = [0u8; PAGE_FULL_SIZE as usize];
            self.file.seek(current)?;
            self.file.read(&mut page)?;
            let next = u64::from_le_bytes(page[..8].try_into().expect("8-byte slice"));
            let take = (out.len() - filled).min(PAGE_DATA_SIZE);
            out[filled..filled + take].copy_from_slice(&page[8..8 + take]);
            filled += take;
            current = next;
        }
        Ok(())
    }

    /// Returns a whole chain to the freelist.
    pub fn free(&mut self, offset: u64) -> Result<()> {
        self.check_offset(offset, "free")?;
        trace!(offset, "bgfs free chain");
        if self.first_free_page != 0 {
            let mut tail = offset;
            loop {
                let next = read_u64_at(self.file.as_mut(), tail)?;
                if next == 0 {
                    break;
                }
                tail = next;
            }
            write_u64_at(self.file.as_mut(), tail, self.first_free_page)?;
        }
        self.first_free_page = offset;
        write_u64_at(
            self.file.as_mut(),
            FIRST_FREE_FIELD_OFFSET,
            self.first_free_page,
        )
    }

    fn allocate_page(&mut self, tail_size: &mut u64) -> Result<u64> {
        if self.first_free_page != 0 {
            let page = self.first_free_page;
            self.first_free_page = read_u64_at(self.file.as_mut(), page)?;
            write_u64_at(
                self.file.as_mut(),
                FIRST_FREE_FIELD_OFFSET,
                self.first_free_page,
            )?;
            return Ok(page);
        }
        if *tail_size == 0 {
            *tail_size = self.file.seek_end()?;
        } else {
            *tail_size += PAGE_FULL_SIZE;
        }
        Ok(*tail_size)
    }

    fn write_page(&mut self, offset: u64, next: u64, data: &[u8]) -> Result<()> {
        let mut page = [0u8; PAGE_FULL_SIZE as usize];
        page[..8].copy_from_slice(&next.to_le_bytes());
        page[8..8 + data.len()].copy_from_slice(data);
        self.file.seek(offset)?;
        self.file.write(&page)
    }

    fn check_offset(&self, offset: u64, location: &'static str) -> Result<()> {
        if offset == 0 || offset % PAGE_FULL_SIZE != 0 {
            return Err(StoreError::InvalidOffset { offset, location }.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StdFile;

    fn fresh_storage() -> (BigFileStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let file = StdFile::create(dir.path().join("blobs.phkvsbig")).unwrap();
        (BigFileStorage::create(Box::new(file)).unwrap(), dir)
    }

    fn file_size(storage: &mut BigFileStorage) -> u64 {
        storage.file.seek_end().unwrap()
    }

    #[test]
    fn create_writes_full_header_page() {
        let (mut storage, _dir) = fresh_storage();

        assert_eq!(file_size(&mut storage), 512);
    }

    #[test]
    fn single_page_chain_starts_at_512() {
        let (mut storage, _dir) = fresh_storage();

        let offset = storage.allocate_and_write(&[0xAA; 504]).unwrap();

        assert_eq!(offset, 512);
        assert_eq!(file_size(&mut storage), 1024);
    }

    #[test]
    fn payload_one_past_page_takes_two_pages() {
        let (mut storage, _dir) = fresh_storage();
        storage.allocate_and_write(&[0xAA; 504]).unwrap();

        let offset = storage.allocate_and_write(&[0xBB; 505]).unwrap();

        assert_eq!(offset, 1024);
        assert_eq!(file_size(&mut storage), 2048);

        let mut out = vec![0u8; 505];
        storage.read(offset, &mut out).unwrap();
        assert_eq!(out, vec![0xBB; 505]);
    }

    #[test]
    fn large_chain_roundtrips() {
        let (mut storage, _dir) = fresh_storage();
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

        let offset = storage.allocate_and_write(&payload).unwrap();
        let mut out = vec![0u8; payload.len()];
        storage.read(offset, &mut out).unwrap();

        assert_eq!(out, payload);
        assert_eq!(file_size(&mut storage) % 512, 0);
    }

    #[test]
    fn overwrite_shorter_frees_tail_for_reuse() {
        let (mut storage, _dir) = fresh_storage();
        let offset = storage.allocate_and_write(&[1u8; 1500]).unwrap();
        let size_before = file_size(&mut storage);

        storage.overwrite(offset, &[2u8; 300]).unwrap();
        let mut out = vec![0u8; 300];
        storage.read(offset, &mut out).unwrap();
        assert_eq!(out, vec![2u8; 300]);

        // two freed tail pages satisfy the next two-page allocation
        let reused = storage.allocate_and_write(&[3u8; 600]).unwrap();
        assert!(reused < size_before);
        assert_eq!(file_size(&mut storage), size_before);
    }

    #[test]
    fn overwrite_longer_extends_chain() {
        let (mut storage, _dir) = fresh_storage();
        let offset = storage.allocate_and_write(&[1u8; 100]).unwrap();

        let payload: Vec<u8> = (0..2000u32).map(|i| (i % 239) as u8).collect();
        storage.overwrite(offset, &payload).unwrap();

        let mut out = vec![0u8; payload.len()];
        storage.read(offset, &mut out).unwrap();
        assert_eq!(out, payload);
        assert_eq!(file_size(&mut storage) % 512, 0);
    }

    #[test]
    fn freed_chain_is_reused_lifo() {
        let (mut storage, _dir) = fresh_storage();
        let first = storage.allocate_and_write(&[1u8; 100]).unwrap();
        let second = storage.allocate_and_write(&[2u8; 100]).unwrap();

        storage.free(first).unwrap();
        storage.free(second).unwrap();

        assert_eq!(storage.allocate_and_write(&[3u8; 100]).unwrap(), second);
        assert_eq!(storage.allocate_and_write(&[4u8; 100]).unwrap(), first);
    }

    #[test]
    fn misaligned_offset_is_rejected() {
        let (mut storage, _dir) = fresh_storage();
        storage.allocate_and_write(&[1u8; 10]).unwrap();

        let err = storage.read(513, &mut [0u8; 4]).unwrap_err();

        assert!(matches!(
            StoreError::from_report(&err),
            Some(StoreError::InvalidOffset { .. })
        ));
    }

    #[test]
    fn zero_offset_is_rejected() {
        let (mut storage, _dir) = fresh_storage();

        assert!(storage.free(0).is_err());
    }

    #[test]
    fn reopen_preserves_freelist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs.phkvsbig");
        let freed;
        {
            let file = StdFile::create(&path).unwrap();
            let mut storage = BigFileStorage::create(Box::new(file)).unwrap();
            freed = storage.allocate_and_write(&[7u8; 100]).unwrap();
            storage.free(freed).unwrap();
        }

        let file = StdFile::open(&path).unwrap();
        let mut storage = BigFileStorage::open(Box::new(file)).unwrap();

        assert_eq!(storage.allocate_and_write(&[8u8; 100]).unwrap(), freed);
    }

    #[test]
    fn open_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.phkvsbig");
        std::fs::write(&path, [0u8; 100]).unwrap();

        let err = BigFileStorage::open(Box::new(StdFile::open(&path).unwrap())).unwrap_err();

        assert!(matches!(
            StoreError::from_report(&err),
            Some(StoreError::InvalidFile { .. })
        ));
    }
}
