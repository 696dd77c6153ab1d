//! # Storage Layer
//!
//! This module provides the two external allocators that back a volume, and
//! the random-access file abstraction they are built on.
//!
//! ## File Formats
//!
//! A volume owns three side-car files; the two managed here are:
//!
//! - **BGFS** (`bigfile`): blobs of 257 bytes and above, stored as singly
//!   linked chains of 512-byte pages. The first 8 bytes of every page hold
//!   the absolute offset of the next page (0 terminates the chain), leaving
//!   504 payload bytes per page.
//! - **SMFS** (`smallmed`): payloads of 1 to 256 bytes, stored in
//!   size-classed slots with 8-byte granularity and one LIFO freelist per
//!   class.
//!
//! The third format (PHVL, the skip-list main file) lives in the `volume`
//! module and consumes both of these for external keys, values, and node
//! forward-pointer arrays.
//!
//! ## I/O Model
//!
//! All access goes through the `RandomAccessFile` trait: explicit absolute
//! seeks plus whole-buffer reads and writes, with short transfers surfaced
//! as errors. Files grow at the tail in format-specific increments
//! (512-byte pages for BGFS, slot sizes for SMFS), so there is no page
//! mapping layer; positioned I/O over a plain file handle is the whole
//! substrate.
//!
//! ## Durability
//!
//! Allocator state (freelist heads) is persisted in the file headers on
//! every mutation, so a cleanly closed file reopens with its free space
//! intact. There is no journaling; torn writes are out of scope.

mod bigfile;
mod file;
mod headers;
mod smallmed;

pub use bigfile::{BigFileStorage, PAGE_DATA_SIZE, PAGE_FULL_SIZE};
pub use file::{read_u64_at, write_u64_at, RandomAccessFile, StdFile};
pub use headers::{
    BigFileHeader, FileVersion, SlotFileHeader, VolumeFileHeader, BIGFILE_HEADER_SIZE,
    BIGFILE_MAGIC, SLOT_HEADER_SIZE, SLOT_MAGIC, VOLUME_HEADER_SIZE, VOLUME_MAGIC,
};
pub use smallmed::{
    SlotFileStorage, MAX_SLOT_DATA_SIZE, SLOT_CLASS_COUNT, SLOT_SIZE_INCREMENT,
};
