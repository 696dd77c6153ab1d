//! # File Header Definitions
//!
//! Type-safe, zerocopy-based headers for the three volume file formats.
//! Every file begins with a four-byte ASCII magic and a `{major, minor}`
//! version pair; the rest of the header carries the format's allocator
//! state.
//!
//! | Format | Magic | Header size | Allocator state |
//! |--------|--------|-------------|-----------------|
//! | BGFS | `BGFS` | 16 (padded to 512) | first free page |
//! | SMFS | `SMFS` | 256 | 31 per-class freelist heads |
//! | PHVL | `PHVL` | 24 | head-node and body-node freelists |
//!
//! All multi-byte fields are little-endian via `zerocopy`'s byte-order
//! types, so headers can be read straight off unaligned file buffers. Each
//! `from_bytes` validator checks magic and version and raises
//! `StoreError::InvalidFile` on mismatch.

use std::path::Path;

use eyre::Result;
use zerocopy::little_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::StoreError;

pub const BIGFILE_MAGIC: &[u8; 4] = b"BGFS";
pub const SLOT_MAGIC: &[u8; 4] = b"SMFS";
pub const VOLUME_MAGIC: &[u8; 4] = b"PHVL";

pub const BIGFILE_HEADER_SIZE: usize = 16;
pub const SLOT_HEADER_SIZE: usize = 256;
pub const VOLUME_HEADER_SIZE: usize = 24;

const SLOT_CLASS_COUNT: usize = 31;

/// `{major, minor}` format version pair.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileVersion {
    major: U16,
    minor: U16,
}

impl FileVersion {
    pub const CURRENT: FileVersion = FileVersion {
        major: U16::new(1),
        minor: U16::new(0),
    };

    pub fn major(&self) -> u16 {
        self.major.get()
    }

    pub fn minor(&self) -> u16 {
        self.minor.get()
    }
}

fn invalid_file(path: &Path, reason: String) -> eyre::Report {
    StoreError::InvalidFile {
        path: path.to_path_buf(),
        reason,
    }
    .into()
}

fn check_magic_and_version(
    path: &Path,
    format: &str,
    magic: &[u8; 4],
    expected_magic: &[u8; 4],
    version: FileVersion,
) -> Result<()> {
    if magic != expected_magic {
        return Err(invalid_file(
            path,
            format!(
                "bad {} magic {:02x?}, expected {:02x?}",
                format, magic, expected_magic
            ),
        ));
    }
    if version != FileVersion::CURRENT {
        return Err(invalid_file(
            path,
            format!(
                "unsupported {} version {}.{}, expected {}.{}",
                format,
                version.major(),
                version.minor(),
                FileVersion::CURRENT.major(),
                FileVersion::CURRENT.minor()
            ),
        ));
    }
    Ok(())
}

/// Header of a BGFS page-chain file.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BigFileHeader {
    magic: [u8; 4],
    version: FileVersion,
    first_free_page: U64,
}

const _: () = assert!(std::mem::size_of::<BigFileHeader>() == BIGFILE_HEADER_SIZE);

impl BigFileHeader {
    pub fn new() -> Self {
        Self {
            magic: *BIGFILE_MAGIC,
            version: FileVersion::CURRENT,
            first_free_page: U64::new(0),
        }
    }

    pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
        if bytes.len() < BIGFILE_HEADER_SIZE {
            return Err(invalid_file(
                path,
                format!("BGFS header truncated at {} bytes", bytes.len()),
            ));
        }
        let header = Self::read_from_bytes(&bytes[..BIGFILE_HEADER_SIZE])
            .map_err(|e| invalid_file(path, format!("unreadable BGFS header: {e:?}")))?;
        check_magic_and_version(path, "BGFS", &header.magic, BIGFILE_MAGIC, header.version)?;
        Ok(header)
    }

    pub fn first_free_page(&self) -> u64 {
        self.first_free_page.get()
    }

    pub fn set_first_free_page(&mut self, offset: u64) {
        self.first_free_page = U64::new(offset);
    }
}

impl Default for BigFileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Header of an SMFS slot-class file.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SlotFileHeader {
    magic: [u8; 4],
    version: FileVersion,
    free_heads: [U64; SLOT_CLASS_COUNT],
}

const _: () = assert!(std::mem::size_of::<SlotFileHeader>() == SLOT_HEADER_SIZE);

impl SlotFileHeader {
    pub fn new() -> Self {
        Self {
            magic: *SLOT_MAGIC,
            version: FileVersion::CURRENT,
            free_heads: [U64::new(0); SLOT_CLASS_COUNT],
        }
    }

    pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
        if bytes.len() < SLOT_HEADER_SIZE {
            return Err(invalid_file(
                path,
                format!("SMFS header truncated at {} bytes", bytes.len()),
            ));
        }
        let header = Self::read_from_bytes(&bytes[..SLOT_HEADER_SIZE])
            .map_err(|e| invalid_file(path, format!("unreadable SMFS header: {e:?}")))?;
        check_magic_and_version(path, "SMFS", &header.magic, SLOT_MAGIC, header.version)?;
        Ok(header)
    }

    pub fn free_head(&self, class: usize) -> u64 {
        self.free_heads[class].get()
    }

    pub fn free_heads(&self) -> [u64; SLOT_CLASS_COUNT] {
        let mut heads = [0u64; SLOT_CLASS_COUNT];
        for (slot, head) in heads.iter_mut().zip(self.free_heads.iter()) {
            *slot = head.get();
        }
        heads
    }
}

impl Default for SlotFileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Header of a PHVL volume main file.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct VolumeFileHeader {
    magic: [u8; 4],
    version: FileVersion,
    first_free_head_node: U64,
    first_free_node: U64,
}

const _: () = assert!(std::mem::size_of::<VolumeFileHeader>() == VOLUME_HEADER_SIZE);

impl VolumeFileHeader {
    pub fn new() -> Self {
        Self {
            magic: *VOLUME_MAGIC,
            version: FileVersion::CURRENT,
            first_free_head_node: U64::new(0),
            first_free_node: U64::new(0),
        }
    }

    pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
        if bytes.len() < VOLUME_HEADER_SIZE {
            return Err(invalid_file(
                path,
                format!("PHVL header truncated at {} bytes", bytes.len()),
            ));
        }
        let header = Self::read_from_bytes(&bytes[..VOLUME_HEADER_SIZE])
            .map_err(|e| invalid_file(path, format!("unreadable PHVL header: {e:?}")))?;
        check_magic_and_version(path, "PHVL", &header.magic, VOLUME_MAGIC, header.version)?;
        Ok(header)
    }

    pub fn first_free_head_node(&self) -> u64 {
        self.first_free_head_node.get()
    }

    pub fn first_free_node(&self) -> u64 {
        self.first_free_node.get()
    }
}

impl Default for VolumeFileHeader {
    fn default() -> Self {
        Self::new()
    }
}
