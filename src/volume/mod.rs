//! # Volume Engine (PHVL)
//!
//! A volume is the key/value engine over three files: the PHVL main file
//! holding the directory tree, plus the SMFS and BGFS side-cars for
//! external keys, values, and skip-list pointer arrays.
//!
//! ## Main File Layout
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  -----------------------------------------
//! 0       4     magic "PHVL"
//! 4       4     version {u16 major, u16 minor} = {1, 0}
//! 8       8     head-node freelist (0 = empty)
//! 16      8     body-node freelist (0 = empty)
//! 24      9     root skip-list head (padded to a node slot)
//! 690     ...   head and body node records
//! ```
//!
//! Each directory is its own skip list: a 9-byte head record at maximum
//! height plus 666-byte body records holding up to 16 sorted entries each.
//! Directory entries point at their child list's head, forming the tree.
//!
//! Freed records are threaded into two freelists (one for heads, one for
//! bodies) through their first 8 bytes; the freelist heads live in the
//! file header and are persisted on every change, so free space survives
//! a clean close.
//!
//! ## Traversal
//!
//! `find_path` descends by each candidate node's *last* key and records
//! the predecessor per level, which is what insert and erase need to
//! splice. Point lookups descend by *first* key and finish with a binary
//! search inside one node. Both walks fetch only a node's pointer array
//! and one edge key until the final node is loaded in full.
//!
//! The most recent successfully resolved directory is cached as
//! `(path prefix, head offset)`, so runs of operations against one
//! directory skip the per-segment descent. Recursive erase invalidates
//! the cache.
//!
//! ## Expiration
//!
//! Keys may carry an absolute wall-clock expiration in milliseconds.
//! Lookups and listings filter expired entries; the records themselves
//! are reclaimed only by an explicit erase.

mod entry;
mod node;
mod paths;
mod rng;

pub use paths::{split_dir_path, split_key_path, PathAndKey};

use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::Result;
use tracing::debug;
use zerocopy::IntoBytes;

use crate::encoding::{ByteReader, ByteWriter};
use crate::error::StoreError;
use crate::storage::{
    read_u64_at, write_u64_at, BigFileStorage, RandomAccessFile, SlotFileStorage,
    VolumeFileHeader, VOLUME_HEADER_SIZE,
};
use crate::types::{DirEntry, EntryKind, Value};

use entry::{
    decode_inline_bytes, decode_inline_str, encode_inline_bytes, encode_inline_window,
    is_inline_key_len, is_inline_value_len, is_slot_len, Entry, KeySlot, ValueSlot,
    ENTRY_BIN_SIZE, FLAG_DIR, FLAG_INLINE_KEY, FLAG_INLINE_VALUE, FLAG_VALUE_TYPE_MASK,
    INLINE_SIZE,
};
use node::{NextsVec, SkipListNode, ENTRIES_PER_NODE, HEAD_BIN_SIZE, MAX_LIST_HEIGHT, NODE_BIN_SIZE};
use rng::TowerRng;

/// Offset of the root directory's skip-list head.
const ROOT_LIST_OFFSET: u64 = VOLUME_HEADER_SIZE as u64;
const FREE_HEAD_NODE_FIELD: u64 = 8;
const FREE_NODE_FIELD: u64 = 16;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EdgeKey {
    First,
    Last,
}

pub struct Volume {
    main: Box<dyn RandomAccessFile>,
    slots: SlotFileStorage,
    blobs: BigFileStorage,
    first_free_head_node: u64,
    first_free_node: u64,
    last_dir: String,
    last_dir_head: u64,
    rng: TowerRng,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("main", &"<dyn RandomAccessFile>")
            .field("slots", &self.slots)
            .field("blobs", &self.blobs)
            .field("first_free_head_node", &self.first_free_head_node)
            .field("first_free_node", &self.first_free_node)
            .field("last_dir", &self.last_dir)
            .field("last_dir_head", &self.last_dir_head)
            .field("rng", &self.rng)
            .finish()
    }
}

impl Volume {
    /// Initializes a fresh volume; the main file must be empty.
    pub fn create(
        mut main: Box<dyn RandomAccessFile>,
        slots: SlotFileStorage,
        blobs: BigFileStorage,
    ) -> Result<Self> {
        let size = main.seek_end()?;
        if size != 0 {
            return Err(StoreError::InvalidFile {
                path: main.path().to_path_buf(),
                reason: format!("volume create requires an empty main file, size is {size}"),
            }
            .into());
        }

        // header plus the root head record padded to a full node slot
        let mut buf = [0u8; VOLUME_HEADER_SIZE + NODE_BIN_SIZE];
        buf[..VOLUME_HEADER_SIZE].copy_from_slice(VolumeFileHeader::new().as_bytes());
        main.seek(0)?;
        main.write(&buf)?;

        let mut volume = Self {
            main,
            slots,
            blobs,
            first_free_head_node: 0,
            first_free_node: 0,
            last_dir: String::new(),
            last_dir_head: 0,
            rng: TowerRng::seeded(),
        };
        let mut root = SkipListNode::with_height(MAX_LIST_HEIGHT);
        volume.store_head_node(ROOT_LIST_OFFSET, &mut root)?;
        Ok(volume)
    }

    /// Opens an existing volume, validating magic and version.
    pub fn open(
        mut main: Box<dyn RandomAccessFile>,
        slots: SlotFileStorage,
        blobs: BigFileStorage,
    ) -> Result<Self> {
        let size = main.seek_end()?;
        if size < (VOLUME_HEADER_SIZE + HEAD_BIN_SIZE) as u64 {
            return Err(StoreError::InvalidFile {
                path: main.path().to_path_buf(),
                reason: format!("volume main file size {size} is smaller than the header"),
            }
            .into());
        }
        let mut bytes = [0u8; VOLUME_HEADER_SIZE];
        main.seek(0)?;
        main.read(&mut bytes)?;
        let header = VolumeFileHeader::from_bytes(&bytes, main.path())?;
        Ok(Self {
            first_free_head_node: header.first_free_head_node(),
            first_free_node: header.first_free_node(),
            main,
            slots,
            blobs,
            last_dir: String::new(),
            last_dir_head: 0,
            rng: TowerRng::seeded(),
        })
    }

    /// Stores a value under a key path, creating intermediate directories.
    /// `expires_at_ms` is an absolute wall-clock instant; 0 means never.
    pub fn store(&mut self, key_path: &str, value: Value, expires_at_ms: u64) -> Result<()> {
        let parsed = split_key_path(key_path)?;
        let dir_prefix = &key_path[..key_path.len() - parsed.key.len()];

        let offset = if self.last_dir_head != 0 && dir_prefix == self.last_dir {
            self.last_dir_head
        } else {
            let mut offset = ROOT_LIST_OFFSET;
            for dir in &parsed.dirs {
                match self.list_lookup(offset, *dir)? {
                    Some(found) => {
                        if found.kind != EntryKind::Dir {
                            return Err(StoreError::KindMismatch {
                                name: (*dir).to_string(),
                                existing: found.kind.as_str(),
                                attempted: EntryKind::Dir.as_str(),
                            }
                            .into());
                        }
                        offset = found.child_head_offset()?;
                    }
                    None => {
                        let child = self.create_head_node()?;
                        self.list_insert(offset, Entry::new_dir((*dir).to_string(), child))?;
                        offset = child;
                    }
                }
            }
            self.last_dir.clear();
            self.last_dir.push_str(dir_prefix);
            self.last_dir_head = offset;
            offset
        };

        self.list_insert(
            offset,
            Entry::new_key(parsed.key.to_string(), value, expires_at_ms),
        )
    }

    /// Fetches the value under a key path; expired keys read as absent.
    pub fn lookup(&mut self, key_path: &str) -> Result<Option<Value>> {
        let parsed = match split_key_path(key_path) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(None),
        };
        let dir_prefix = &key_path[..key_path.len() - parsed.key.len()];

        let offset = if self.last_dir_head != 0 && dir_prefix == self.last_dir {
            self.last_dir_head
        } else {
            match self.follow_path(&parsed.dirs)? {
                None => return Ok(None),
                Some(offset) => {
                    self.last_dir.clear();
                    self.last_dir.push_str(dir_prefix);
                    self.last_dir_head = offset;
                    offset
                }
            }
        };

        match self.list_lookup(offset, parsed.key)? {
            None => Ok(None),
            Some(found) => {
                if found.kind != EntryKind::Key {
                    return Ok(None);
                }
                if found.expires_at_ms != 0 && found.expires_at_ms < now_ms() {
                    return Ok(None);
                }
                Ok(Some(found.value.value))
            }
        }
    }

    /// Removes a key entry; absent keys and unreachable paths are no-ops.
    pub fn erase_key(&mut self, key_path: &str) -> Result<()> {
        let parsed = match split_key_path(key_path) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(()),
        };
        let offset = match self.follow_path(&parsed.dirs)? {
            None => return Ok(()),
            Some(offset) => offset,
        };
        self.list_erase(offset, EntryKind::Key, parsed.key)
    }

    /// Removes a directory and everything beneath it. A path with no
    /// segments ("/") clears the volume's root directory.
    pub fn erase_dir_recursive(&mut self, dir_path: &str) -> Result<()> {
        self.last_dir.clear();
        self.last_dir_head = 0;

        let parsed = match split_key_path(dir_path) {
            Ok(parsed) => parsed,
            Err(_) => return self.clear_root(),
        };
        let offset = match self.follow_path(&parsed.dirs)? {
            None => return Ok(()),
            Some(offset) => offset,
        };
        match self.list_lookup(offset, parsed.key)? {
            None => Ok(()),
            Some(found) => {
                if found.kind != EntryKind::Dir {
                    return Err(StoreError::KindMismatch {
                        name: parsed.key.to_string(),
                        existing: found.kind.as_str(),
                        attempted: EntryKind::Dir.as_str(),
                    }
                    .into());
                }
                self.list_erase_recursive(found.child_head_offset()?)?;
                self.list_erase(offset, EntryKind::Dir, parsed.key)
            }
        }
    }

    /// Lists a directory, omitting expired keys. `None` when the path does
    /// not resolve to a directory.
    pub fn get_dir_entries(&mut self, dir_path: &str) -> Result<Option<Vec<DirEntry>>> {
        let dirs = split_dir_path(dir_path);
        let offset = match self.follow_path(&dirs)? {
            None => return Ok(None),
            Some(offset) => offset,
        };
        let mut entries = Vec::new();
        self.list_get_content(offset, &mut entries)?;
        Ok(Some(entries))
    }

    #[cfg(test)]
    pub(crate) fn reseed_rng(&mut self, seed: u64) {
        self.rng = TowerRng::with_seed(seed);
    }

    /// Renders the directory tree with node offsets and heights.
    pub fn dump(&mut self) -> Result<String> {
        let mut out = String::new();
        self.dump_list(ROOT_LIST_OFFSET, 0, &mut out)?;
        Ok(out)
    }

    fn dump_list(&mut self, head_offset: u64, indent: usize, out: &mut String) -> Result<()> {
        let head = self.load_head_node(head_offset)?;
        let mut offset = head.nexts[0];
        while offset != 0 {
            let node = self.load_node(offset)?;
            let _ = writeln!(out, "{:indent$}node@{offset} height {}: [", "", node.height());
            for item in &node.entries {
                match item.kind {
                    EntryKind::Key => {
                        let _ = writeln!(out, "{:indent$}  '{}',", "", item.key.name);
                    }
                    EntryKind::Dir => {
                        let _ = writeln!(out, "{:indent$}  '{}': {{", "", item.key.name);
                        self.dump_list(item.child_head_offset()?, indent + 4, out)?;
                        let _ = writeln!(out, "{:indent$}  }},", "");
                    }
                }
            }
            let _ = writeln!(out, "{:indent$}]", "");
            offset = node.nexts[0];
        }
        Ok(())
    }

    // ---- skip-list operations ----

    fn follow_path(&mut self, dirs: &[&str]) -> Result<Option<u64>> {
        let mut offset = ROOT_LIST_OFFSET;
        for dir in dirs {
            match self.list_lookup(offset, *dir)? {
                None => return Ok(None),
                Some(found) => {
                    if found.kind != EntryKind::Dir {
                        return Err(StoreError::KindMismatch {
                            name: (*dir).to_string(),
                            existing: found.kind.as_str(),
                            attempted: EntryKind::Dir.as_str(),
                        }
                        .into());
                    }
                    offset = found.child_head_offset()?;
                }
            }
        }
        Ok(Some(offset))
    }

    /// Predecessor node per level for `key`, descending by last keys.
    fn find_path(&mut self, head_offset: u64, key: &str) -> Result<[u64; MAX_LIST_HEIGHT]> {
        let head = self.load_head_node(head_offset)?;
        let mut current_nexts = head.nexts;
        let mut offset = head_offset;
        let mut path = [head_offset; MAX_LIST_HEIGHT];
        for level in (0..current_nexts.len()).rev() {
            while level < current_nexts.len() && current_nexts[level] != 0 {
                let (next_nexts, last_key) =
                    self.load_nexts_and_edge_key(current_nexts[level], EdgeKey::Last)?;
                if key > last_key.as_str() {
                    offset = current_nexts[level];
                    current_nexts = next_nexts;
                } else {
                    break;
                }
            }
            path[level] = offset;
        }
        Ok(path)
    }

    fn list_lookup(&mut self, head_offset: u64, key: &str) -> Result<Option<Entry>> {
        let head = self.load_head_node(head_offset)?;
        let mut current_nexts = head.nexts;
        let mut node_offset = current_nexts[0];
        for level in (0..current_nexts.len()).rev() {
            while level < current_nexts.len() && current_nexts[level] != 0 {
                let (next_nexts, first_key) =
                    self.load_nexts_and_edge_key(current_nexts[level], EdgeKey::First)?;
                if key >= first_key.as_str() {
                    node_offset = current_nexts[level];
                    current_nexts = next_nexts;
                } else {
                    break;
                }
            }
        }
        if node_offset == 0 {
            return Ok(None);
        }
        let node = self.load_node(node_offset)?;
        let index = node.lower_bound(key);
        if index >= node.entries.len() || node.entries[index].key.name != key {
            return Ok(None);
        }
        let mut entries = node.entries;
        Ok(Some(entries.swap_remove(index)))
    }

    fn list_insert(&mut self, head_offset: u64, entry: Entry) -> Result<()> {
        let path = self.find_path(head_offset, &entry.key.name)?;

        let pred = self.load_head_node(path[0])?;
        let mut node_offset = pred.nexts[0];
        if node_offset == 0 && path[0] != head_offset {
            node_offset = path[0];
        }

        if node_offset == 0 {
            // empty list: the first body node carries the entry alone
            let new_offset = self.allocate_node()?;
            let height = self.rng.tower_height(MAX_LIST_HEIGHT);
            let mut new_node = SkipListNode::with_height(height);
            for level in 0..height {
                let mut pred_node = self.load_head_node(path[level])?;
                new_node.nexts[level] = pred_node.nexts[level];
                pred_node.nexts[level] = new_offset;
                self.store_head_node(path[level], &mut pred_node)?;
            }
            new_node.entries.push(entry);
            return self.store_node(new_offset, &mut new_node);
        }

        let mut node = self.load_node(node_offset)?;
        debug!(
            key = %entry.key.name,
            node = node_offset,
            first = %node.entries.first().map(|e| e.key.name.as_str()).unwrap_or(""),
            last = %node.entries.last().map(|e| e.key.name.as_str()).unwrap_or(""),
            "skip-list insert"
        );

        let index = node.lower_bound(&entry.key.name);
        if index < node.entries.len() && node.entries[index].key.name == entry.key.name {
            let existing = &mut node.entries[index];
            if existing.kind != entry.kind {
                return Err(StoreError::KindMismatch {
                    name: entry.key.name,
                    existing: existing.kind.as_str(),
                    attempted: entry.kind.as_str(),
                }
                .into());
            }
            // keep the existing key slot so an external name allocation is
            // reused rather than leaked
            existing.expires_at_ms = entry.expires_at_ms;
            existing.value.prev_len = existing.value.value.payload_len();
            existing.value.value = entry.value.value;
            return self.store_node(node_offset, &mut node);
        }

        if node.entries.len() < ENTRIES_PER_NODE {
            node.entries.insert(index, entry);
            return self.store_node(node_offset, &mut node);
        }

        // full node: split the upper half into a new node at random height
        let new_offset = self.allocate_node()?;
        let height = self.rng.tower_height(MAX_LIST_HEIGHT);
        let mut new_node = SkipListNode::with_height(height);
        debug!(new_node = new_offset, height, "skip-list split");

        if index == node.entries.len() {
            new_node.entries.push(entry);
        } else {
            let middle = node.entries.len() / 2;
            new_node.entries = node.entries.split_off(middle);
            if index >= middle {
                new_node.entries.insert(index - middle, entry);
            } else {
                node.entries.insert(index, entry);
            }
        }

        for level in 0..height {
            let mut pred_node = self.load_head_node(path[level])?;
            if pred_node.nexts[level] == node_offset || path[level] == node_offset {
                // the path already runs through the split node at this
                // level, so the new node threads behind it
                new_node.nexts[level] = node.nexts[level];
                node.nexts[level] = new_offset;
            } else {
                new_node.nexts[level] = pred_node.nexts[level];
                pred_node.nexts[level] = new_offset;
                self.store_head_node(path[level], &mut pred_node)?;
            }
        }
        self.store_node(node_offset, &mut node)?;
        self.store_node(new_offset, &mut new_node)
    }

    fn list_erase(&mut self, head_offset: u64, kind: EntryKind, key: &str) -> Result<()> {
        let path = self.find_path(head_offset, key)?;
        let pred = self.load_head_node(path[0])?;
        let node_offset = pred.nexts[0];
        if node_offset == 0 {
            return Ok(());
        }
        let mut node = self.load_node(node_offset)?;
        let index = node.lower_bound(key);
        if index >= node.entries.len() || node.entries[index].key.name != key {
            return Ok(());
        }
        if node.entries[index].kind != kind {
            return Err(StoreError::KindMismatch {
                name: key.to_string(),
                existing: node.entries[index].kind.as_str(),
                attempted: kind.as_str(),
            }
            .into());
        }
        let erased = node.entries.remove(index);
        self.free_entry(&erased)?;

        if node.entries.is_empty() {
            for level in 0..node.height() {
                let mut pred_node = self.load_head_node(path[level])?;
                pred_node.nexts[level] = node.nexts[level];
                self.store_head_node(path[level], &mut pred_node)?;
            }
            if node.height() > 1 {
                self.slots.free_slot(node.nexts_offset, node.height() * 8)?;
            }
            self.free_node(node_offset)
        } else {
            self.store_node(node_offset, &mut node)
        }
    }

    fn list_erase_recursive(&mut self, head_offset: u64) -> Result<()> {
        let head = self.load_head_node(head_offset)?;
        if head.height() > 1 {
            self.slots.free_slot(head.nexts_offset, head.height() * 8)?;
        }
        let mut offset = head.nexts[0];
        while offset != 0 {
            let node = self.load_node(offset)?;
            for item in &node.entries {
                if item.kind == EntryKind::Dir {
                    self.list_erase_recursive(item.child_head_offset()?)?;
                }
                self.free_entry(item)?;
            }
            if node.height() > 1 {
                self.slots.free_slot(node.nexts_offset, node.height() * 8)?;
            }
            self.free_node(offset)?;
            offset = node.nexts[0];
        }
        self.free_head_node(head_offset)
    }

    /// Empties the root directory in place, keeping the root head and its
    /// pointer array.
    fn clear_root(&mut self) -> Result<()> {
        let mut head = self.load_head_node(ROOT_LIST_OFFSET)?;
        let mut offset = head.nexts[0];
        while offset != 0 {
            let node = self.load_node(offset)?;
            for item in &node.entries {
                if item.kind == EntryKind::Dir {
                    self.list_erase_recursive(item.child_head_offset()?)?;
                }
                self.free_entry(item)?;
            }
            if node.height() > 1 {
                self.slots.free_slot(node.nexts_offset, node.height() * 8)?;
            }
            self.free_node(offset)?;
            offset = node.nexts[0];
        }
        for next in head.nexts.iter_mut() {
            *next = 0;
        }
        self.store_head_node(ROOT_LIST_OFFSET, &mut head)
    }

    fn list_get_content(&mut self, head_offset: u64, out: &mut Vec<DirEntry>) -> Result<()> {
        let head = self.load_head_node(head_offset)?;
        let now = now_ms();
        let mut offset = head.nexts[0];
        while offset != 0 {
            let node = self.load_node(offset)?;
            for item in &node.entries {
                if item.expires_at_ms != 0 && item.expires_at_ms < now {
                    continue;
                }
                out.push(DirEntry {
                    kind: item.kind,
                    name: item.key.name.clone(),
                });
            }
            offset = node.nexts[0];
        }
        Ok(())
    }

    // ---- node allocation ----

    fn allocate_head_node(&mut self) -> Result<u64> {
        if self.first_free_head_node != 0 {
            let offset = self.first_free_head_node;
            self.first_free_head_node = read_u64_at(self.main.as_mut(), offset)?;
            write_u64_at(
                self.main.as_mut(),
                FREE_HEAD_NODE_FIELD,
                self.first_free_head_node,
            )?;
            return Ok(offset);
        }
        self.main.seek_end()
    }

    /// Allocates and initializes an empty directory head at full height.
    fn create_head_node(&mut self) -> Result<u64> {
        let offset = self.allocate_head_node()?;
        let mut head = SkipListNode::with_height(MAX_LIST_HEIGHT);
        self.store_head_node(offset, &mut head)?;
        Ok(offset)
    }

    fn free_head_node(&mut self, offset: u64) -> Result<()> {
        write_u64_at(self.main.as_mut(), offset, self.first_free_head_node)?;
        self.first_free_head_node = offset;
        write_u64_at(self.main.as_mut(), FREE_HEAD_NODE_FIELD, offset)
    }

    fn allocate_node(&mut self) -> Result<u64> {
        if self.first_free_node != 0 {
            let offset = self.first_free_node;
            self.first_free_node = read_u64_at(self.main.as_mut(), offset)?;
            write_u64_at(self.main.as_mut(), FREE_NODE_FIELD, self.first_free_node)?;
            return Ok(offset);
        }
        self.main.seek_end()
    }

    fn free_node(&mut self, offset: u64) -> Result<()> {
        write_u64_at(self.main.as_mut(), offset, self.first_free_node)?;
        self.first_free_node = offset;
        write_u64_at(self.main.as_mut(), FREE_NODE_FIELD, offset)
    }

    // ---- node serialization ----

    fn load_node(&mut self, offset: u64) -> Result<SkipListNode> {
        let mut buf = [0u8; NODE_BIN_SIZE];
        self.main.seek(offset)?;
        self.main.read(&mut buf)?;
        let mut input = ByteReader::new(&buf);

        let height = self.read_height(&mut input)?;
        let (nexts, nexts_offset) = self.load_nexts(&mut input, height)?;
        let count = input.read_u8()? as usize;
        if count > ENTRIES_PER_NODE {
            return Err(StoreError::CorruptData(format!(
                "node at {offset} claims {count} entries"
            ))
            .into());
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(self.load_entry(&mut input)?);
        }
        Ok(SkipListNode {
            nexts,
            nexts_offset,
            entries,
        })
    }

    fn load_head_node(&mut self, offset: u64) -> Result<SkipListNode> {
        let mut buf = [0u8; HEAD_BIN_SIZE];
        self.main.seek(offset)?;
        self.main.read(&mut buf)?;
        let mut input = ByteReader::new(&buf);

        let height = self.read_height(&mut input)?;
        let (nexts, nexts_offset) = self.load_nexts(&mut input, height)?;
        Ok(SkipListNode {
            nexts,
            nexts_offset,
            entries: Vec::new(),
        })
    }

    fn read_height(&mut self, input: &mut ByteReader<'_>) -> Result<usize> {
        let height = input.read_u8()? as usize;
        if height == 0 || height > MAX_LIST_HEIGHT {
            return Err(StoreError::CorruptData(format!("node height {height}")).into());
        }
        Ok(height)
    }

    fn store_node(&mut self, offset: u64, node: &mut SkipListNode) -> Result<()> {
        let mut buf = [0u8; NODE_BIN_SIZE];
        let mut out = ByteWriter::new(&mut buf);
        out.write_u8(node.height() as u8)?;
        node.nexts_offset = self.store_nexts(&mut out, node.nexts_offset, &node.nexts)?;
        out.write_u8(node.entries.len() as u8)?;
        for item in node.entries.iter_mut() {
            self.store_entry(&mut out, item)?;
        }
        out.fill((ENTRIES_PER_NODE - node.entries.len()) * ENTRY_BIN_SIZE)?;

        self.main.seek(offset)?;
        self.main.write(&buf)
    }

    fn store_head_node(&mut self, offset: u64, node: &mut SkipListNode) -> Result<()> {
        let mut buf = [0u8; HEAD_BIN_SIZE];
        let mut out = ByteWriter::new(&mut buf);
        out.write_u8(node.height() as u8)?;
        node.nexts_offset = self.store_nexts(&mut out, node.nexts_offset, &node.nexts)?;

        self.main.seek(offset)?;
        self.main.write(&buf)
    }

    fn load_nexts(
        &mut self,
        input: &mut ByteReader<'_>,
        height: usize,
    ) -> Result<(NextsVec, u64)> {
        let mut nexts = NextsVec::new();
        if height == 1 {
            nexts.push(input.read_u64()?);
            return Ok((nexts, 0));
        }
        let nexts_offset = input.read_u64()?;
        let mut raw = [0u8; MAX_LIST_HEIGHT * 8];
        self.slots.read(nexts_offset, &mut raw[..height * 8])?;
        for level in 0..height {
            nexts.push(u64::from_le_bytes(
                raw[level * 8..level * 8 + 8].try_into().expect("8 bytes"),
            ));
        }
        Ok((nexts, nexts_offset))
    }

    fn store_nexts(
        &mut self,
        out: &mut ByteWriter<'_>,
        nexts_offset: u64,
        nexts: &[u64],
    ) -> Result<u64> {
        if nexts.len() == 1 {
            out.write_u64(nexts[0])?;
            return Ok(nexts_offset);
        }
        let mut raw = [0u8; MAX_LIST_HEIGHT * 8];
        for (level, next) in nexts.iter().enumerate() {
            raw[level * 8..level * 8 + 8].copy_from_slice(&next.to_le_bytes());
        }
        let bytes = &raw[..nexts.len() * 8];
        let new_offset = if nexts_offset != 0 {
            self.slots.overwrite(nexts_offset, bytes.len(), bytes)?
        } else {
            self.slots.allocate_and_write(bytes)?
        };
        out.write_u64(new_offset)?;
        Ok(new_offset)
    }

    /// Fetches a node's pointer array and one boundary key without
    /// materializing its entries.
    fn load_nexts_and_edge_key(
        &mut self,
        offset: u64,
        which: EdgeKey,
    ) -> Result<(NextsVec, String)> {
        let mut buf = [0u8; NODE_BIN_SIZE];
        self.main.seek(offset)?;
        self.main.read(&mut buf)?;
        let mut input = ByteReader::new(&buf);

        let height = self.read_height(&mut input)?;
        let (nexts, _) = self.load_nexts(&mut input, height)?;
        let count = input.read_u8()? as usize;
        if count == 0 || count > ENTRIES_PER_NODE {
            return Err(StoreError::CorruptData(format!(
                "node at {offset} claims {count} entries"
            ))
            .into());
        }
        if which == EdgeKey::Last {
            input.skip((count - 1) * ENTRY_BIN_SIZE)?;
        }
        let key = self.load_entry_key(&mut input)?;
        Ok((nexts, key))
    }

    // ---- entry serialization ----

    fn store_entry(&mut self, out: &mut ByteWriter<'_>, item: &mut Entry) -> Result<()> {
        let mut flags = 0u8;
        if item.kind == EntryKind::Dir {
            flags |= FLAG_DIR;
        }
        if is_inline_key_len(item.key.name.len()) {
            flags |= FLAG_INLINE_KEY;
        }
        if is_inline_value_len(item.value.value.payload_len()) {
            flags |= FLAG_INLINE_VALUE;
        }
        flags |= item.value.value.type_index();
        out.write_u8(flags)?;
        out.write_u64(item.expires_at_ms)?;
        self.store_key(out, &mut item.key)?;
        self.store_value(out, &mut item.value)
    }

    fn load_entry(&mut self, input: &mut ByteReader<'_>) -> Result<Entry> {
        let flags = input.read_u8()?;
        let kind = if flags & FLAG_DIR != 0 {
            EntryKind::Dir
        } else {
            EntryKind::Key
        };
        let expires_at_ms = input.read_u64()?;
        let key = self.load_key(input, flags & FLAG_INLINE_KEY != 0)?;
        let value = self.load_value(
            input,
            flags & FLAG_VALUE_TYPE_MASK,
            flags & FLAG_INLINE_VALUE != 0,
        )?;
        Ok(Entry {
            kind,
            expires_at_ms,
            key,
            value,
        })
    }

    /// Decodes only the key name of an entry record, consuming all 41
    /// bytes.
    fn load_entry_key(&mut self, input: &mut ByteReader<'_>) -> Result<String> {
        let flags = input.read_u8()?;
        input.skip(8)?;
        let key = self.load_key(input, flags & FLAG_INLINE_KEY != 0)?;
        input.skip(INLINE_SIZE)?;
        Ok(key.name)
    }

    fn store_key(&mut self, out: &mut ByteWriter<'_>, key: &mut KeySlot) -> Result<()> {
        let len = key.name.len();
        if is_inline_key_len(len) {
            return out.write_array(&encode_inline_window(key.name.as_bytes()));
        }
        if key.offset == 0 {
            key.offset = if is_slot_len(len) {
                self.slots.allocate_and_write(key.name.as_bytes())?
            } else {
                self.blobs.allocate_and_write(key.name.as_bytes())?
            };
        }
        out.write_u64(len as u64)?;
        out.write_u64(key.offset)
    }

    fn load_key(&mut self, input: &mut ByteReader<'_>, inline: bool) -> Result<KeySlot> {
        if inline {
            let window: [u8; INLINE_SIZE] = input.read_array()?;
            return Ok(KeySlot {
                name: decode_inline_str(&window)?,
                offset: 0,
            });
        }
        let len = input.read_u64()? as usize;
        let offset = input.read_u64()?;
        let mut raw = vec![0u8; len];
        if is_slot_len(len) {
            self.slots.read(offset, &mut raw)?;
        } else {
            self.blobs.read(offset, &mut raw)?;
        }
        let name = String::from_utf8(raw)
            .map_err(|e| StoreError::CorruptData(format!("key name is not valid UTF-8: {e}")))?;
        Ok(KeySlot { name, offset })
    }

    fn store_value(&mut self, out: &mut ByteWriter<'_>, info: &mut ValueSlot) -> Result<()> {
        let start = out.remaining();
        let ValueSlot {
            value,
            offset,
            prev_len,
        } = info;
        match value {
            Value::U8(v) => out.write_u8(*v)?,
            Value::U16(v) => out.write_u16(*v)?,
            Value::U32(v) => out.write_u32(*v)?,
            Value::U64(v) => out.write_u64(*v)?,
            Value::F32(v) => out.write_f32(*v)?,
            Value::F64(v) => out.write_f64(*v)?,
            Value::Str(s) => store_value_payload(
                &mut self.slots,
                &mut self.blobs,
                out,
                offset,
                *prev_len,
                s.as_bytes(),
                false,
            )?,
            Value::Bytes(b) => store_value_payload(
                &mut self.slots,
                &mut self.blobs,
                out,
                offset,
                *prev_len,
                b,
                true,
            )?,
        }
        let written = start - out.remaining();
        if written < INLINE_SIZE {
            out.fill(INLINE_SIZE - written)?;
        }
        Ok(())
    }

    fn load_value(
        &mut self,
        input: &mut ByteReader<'_>,
        type_index: u8,
        inline: bool,
    ) -> Result<ValueSlot> {
        let start = input.remaining();
        let slot = match Value::check_type_index(type_index)? {
            0 => ValueSlot::new(Value::U8(input.read_u8()?)),
            1 => ValueSlot::new(Value::U16(input.read_u16()?)),
            2 => ValueSlot::new(Value::U32(input.read_u32()?)),
            3 => ValueSlot::new(Value::U64(input.read_u64()?)),
            4 => ValueSlot::new(Value::F32(input.read_f32()?)),
            5 => ValueSlot::new(Value::F64(input.read_f64()?)),
            6 => self.load_value_payload(input, inline, false)?,
            _ => self.load_value_payload(input, inline, true)?,
        };
        let consumed = start - input.remaining();
        if consumed < INLINE_SIZE {
            input.skip(INLINE_SIZE - consumed)?;
        }
        Ok(slot)
    }

    fn load_value_payload(
        &mut self,
        input: &mut ByteReader<'_>,
        inline: bool,
        is_bytes: bool,
    ) -> Result<ValueSlot> {
        if inline {
            let window: [u8; INLINE_SIZE] = input.read_array()?;
            let value = if is_bytes {
                Value::Bytes(decode_inline_bytes(&window)?)
            } else {
                Value::Str(decode_inline_str(&window)?)
            };
            return Ok(ValueSlot::new(value));
        }
        let len = input.read_u64()? as usize;
        let offset = input.read_u64()?;
        let mut raw = vec![0u8; len];
        if is_slot_len(len) {
            self.slots.read(offset, &mut raw)?;
        } else {
            self.blobs.read(offset, &mut raw)?;
        }
        let value = if is_bytes {
            Value::Bytes(raw)
        } else {
            Value::Str(String::from_utf8(raw).map_err(|e| {
                StoreError::CorruptData(format!("string value is not valid UTF-8: {e}"))
            })?)
        };
        Ok(ValueSlot {
            value,
            offset,
            prev_len: len,
        })
    }

    /// Releases an entry's external allocations: the key's, and for key
    /// entries the value's as well.
    fn free_entry(&mut self, item: &Entry) -> Result<()> {
        let key_len = item.key.name.len();
        if is_inline_key_len(key_len) {
            // inline, nothing external
        } else if is_slot_len(key_len) {
            self.slots.free_slot(item.key.offset, key_len)?;
        } else {
            self.blobs.free(item.key.offset)?;
        }
        if item.kind == EntryKind::Key {
            let len = item.value.value.payload_len();
            if is_inline_value_len(len) {
                // inline, nothing external
            } else if is_slot_len(len) {
                self.slots.free_slot(item.value.offset, len)?;
            } else {
                self.blobs.free(item.value.offset)?;
            }
        }
        Ok(())
    }
}

/// Writes a string/bytes payload into its placement class, migrating the
/// external allocation when an overwrite changes class.
#[allow(clippy::too_many_arguments)]
fn store_value_payload(
    slots: &mut SlotFileStorage,
    blobs: &mut BigFileStorage,
    out: &mut ByteWriter<'_>,
    offset: &mut u64,
    prev_len: usize,
    bytes: &[u8],
    length_prefixed: bool,
) -> Result<()> {
    let old_size = prev_len;
    let new_size = bytes.len();
    if old_size != 0
        && (is_inline_value_len(old_size) != is_inline_value_len(new_size)
            || is_slot_len(old_size) != is_slot_len(new_size))
    {
        if is_inline_value_len(old_size) {
            // inline, nothing external to release
        } else if is_slot_len(old_size) {
            slots.free_slot(*offset, old_size)?;
        } else {
            blobs.free(*offset)?;
        }
        *offset = 0;
    }
    if is_inline_value_len(new_size) {
        let window = if length_prefixed {
            encode_inline_bytes(bytes)
        } else {
            encode_inline_window(bytes)
        };
        return out.write_array(&window);
    }
    if is_slot_len(new_size) {
        *offset = if *offset != 0 {
            slots.overwrite(*offset, old_size, bytes)?
        } else {
            slots.allocate_and_write(bytes)?
        };
    } else if *offset != 0 {
        blobs.overwrite(*offset, bytes)?;
    } else {
        *offset = blobs.allocate_and_write(bytes)?;
    }
    out.write_u64(new_size as u64)?;
    out.write_u64(*offset)
}
