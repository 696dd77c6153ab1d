//! # GroveKV — Embedded Hierarchical Key/Value Store
//!
//! GroveKV is an embedded, persistent key/value store whose keys form
//! POSIX-style paths and whose values are tagged scalars, strings, or byte
//! blobs with optional expiration. Storage is organized into **volumes** —
//! independently mountable units of three side-car files — which are
//! mounted at path prefixes inside one logical namespace and resolved
//! across overlapping mounts.
//!
//! ## Quick Start
//!
//! ```no_run
//! use grovekv::{Store, StoreOptions, Value};
//!
//! # fn main() -> eyre::Result<()> {
//! let store = Store::new(StoreOptions::default());
//! store.create_and_mount_volume("./data".as_ref(), "main", "/")?;
//!
//! store.store("/greeting/hello", Value::from("world"), None)?;
//! assert_eq!(store.lookup("/greeting/hello")?, Some(Value::from("world")));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │        Store façade (store)              │  mounts, sequencing,
//! ├──────────────────────────────────────────┤  multi-volume resolution
//! │  Directory cache + LRU pool (cache)      │  epoch-tracked mirror
//! ├──────────────────────────────────────────┤
//! │  Volume engine — PHVL (volume)           │  on-disk skip lists,
//! ├──────────────────────────────────────────┤  placement, expiry
//! │  BGFS / SMFS allocators (storage)        │  page chains, slot classes
//! ├──────────────────────────────────────────┤
//! │  Cursor codec (encoding)                 │  little-endian records
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## On-Disk Formats
//!
//! A volume named `N` in directory `D` owns three files, created, opened,
//! and deleted together:
//!
//! - `D/N.phkvsmain` — PHVL: the directory tree as per-directory skip
//!   lists with two node freelists.
//! - `D/N.phkvsstm` — SMFS: size-classed slots for payloads of 1–256
//!   bytes.
//! - `D/N.phkvsbig` — BGFS: 512-byte page chains for larger payloads.
//!
//! Every multi-byte integer on disk is little-endian; floats travel as
//! their raw IEEE-754 bit patterns.
//!
//! ## Concurrency
//!
//! The store is safe to share across threads. Operations are blocking;
//! each volume applies its operations in the exact order their tickets
//! were issued, and a monotonic cache epoch invalidates cached state
//! whenever the mount topology changes or a volume operation fails.
//!
//! Crash consistency is out of scope: there is no journal, and each file
//! is owned by a single process.

mod cache;

pub mod encoding;
pub mod error;
pub mod storage;
pub mod store;
pub mod types;
pub mod volume;

pub use error::StoreError;
pub use store::{delete_volume, Store, StoreOptions, VolumeId, VolumeInfo};
pub use types::{DirEntry, EntryKind, Value};
pub use volume::Volume;
