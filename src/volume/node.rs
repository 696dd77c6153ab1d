//! # Skip-List Node Records
//!
//! Directories are bounded-fanout skip lists whose nodes are paged into the
//! volume main file.
//!
//! ## Body Node (666 bytes)
//!
//! ```text
//! Offset  Size    Description
//! ------  ------  ---------------------------------------
//! 0       1       height (number of forward pointers, 1…16)
//! 1       8       nexts field (see below)
//! 9       1       entry count (0…16)
//! 10      16×41   entry records, unused slots zero
//! ```
//!
//! ## Head Node (9 bytes)
//!
//! The height byte and nexts field only. Directory heads are allocated at
//! the maximum height so every descent starts from level 15.
//!
//! ## Nexts Field
//!
//! A node of height 1 stores its single forward pointer directly in the
//! nexts field. Taller nodes store their `height × 8` byte pointer array as
//! an SMFS allocation and keep the SMFS offset in the field; pointer
//! updates rewrite the array in place through SMFS `overwrite`.

use smallvec::SmallVec;

use super::entry::{Entry, ENTRY_BIN_SIZE};

pub(crate) const ENTRIES_PER_NODE: usize = 16;
pub(crate) const MAX_LIST_HEIGHT: usize = 16;

/// Serialized body node: height + nexts field + count + entry records.
pub(crate) const NODE_BIN_SIZE: usize = 1 + 8 + 1 + ENTRIES_PER_NODE * ENTRY_BIN_SIZE;
/// Serialized head node: height + nexts field.
pub(crate) const HEAD_BIN_SIZE: usize = 1 + 8;

pub(crate) type NextsVec = SmallVec<[u64; MAX_LIST_HEIGHT]>;

#[derive(Debug)]
pub(crate) struct SkipListNode {
    pub nexts: NextsVec,
    /// SMFS offset of the externalized pointer array; 0 when height is 1
    /// or the node has not been stored yet.
    pub nexts_offset: u64,
    pub entries: Vec<Entry>,
}

impl SkipListNode {
    pub fn with_height(height: usize) -> Self {
        let mut nexts = NextsVec::new();
        nexts.resize(height, 0);
        Self {
            nexts,
            nexts_offset: 0,
            entries: Vec::new(),
        }
    }

    pub fn height(&self) -> usize {
        self.nexts.len()
    }

    /// Index of the first entry whose name is not less than `name`.
    pub fn lower_bound(&self, name: &str) -> usize {
        self.entries
            .partition_point(|entry| entry.key.name.as_str() < name)
    }
}
