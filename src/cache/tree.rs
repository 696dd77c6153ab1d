//! # Directory Cache Tree
//!
//! An in-memory tree mirroring a subset of the directory entries visible
//! across all mounted volumes. Nodes come from the priority LRU pool and
//! are addressed by arena index; a directory node holds an ordered child
//! map, a key node holds the cached value and the volume it belongs to.
//!
//! ## Freshness
//!
//! Every node records the store's cache epoch at the time it was last
//! refreshed. A node is fresh iff its epoch equals the store's current
//! epoch; any mount-topology change or volume-visible failure bumps the
//! epoch and thereby invalidates the whole cache at once. Stale nodes are
//! not removed eagerly — they are refreshed in place by the next cache
//! fill that walks them, or age out of the LRU pool.
//!
//! ## Lookup Outcomes
//!
//! `find` walks a directory path and reports:
//! - `Found(idx)` — every walked node is a fresh, complete directory.
//! - `NotFound` — a fresh complete directory proves a segment's absence.
//! - `Inconsistent` — a walked node is stale or incomplete; the caller
//!   should fill the cache and retry.
//! - `LogicError` — the walk hit a key node where a directory was needed.

use crate::cache::pool::{CachePool, DirPayload, NodePayload, NIL};
use crate::store::VolumeId;
use crate::types::{DirEntry, EntryKind, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FindOutcome {
    Found(u32),
    NotFound,
    Inconsistent,
    LogicError,
}

pub(crate) struct DirCache {
    pool: CachePool,
    root: u32,
}

impl DirCache {
    pub fn new(capacity: usize) -> Self {
        let mut pool = CachePool::new(capacity);
        let root = pool.allocate(0).expect("fresh pool always yields a node");
        {
            let node = pool.node_mut(root);
            node.name = String::new();
            node.parent = NIL;
            node.epoch = 0;
            node.payload = NodePayload::Dir(DirPayload::new());
        }
        pool.pin(root);
        Self { pool, root }
    }

    pub fn root(&self) -> u32 {
        self.root
    }

    pub fn init_dir_node(&mut self, idx: u32, name: String, parent: u32, epoch: u32) {
        let node = self.pool.node_mut(idx);
        node.name = name;
        node.parent = parent;
        node.epoch = epoch;
        node.payload = NodePayload::Dir(DirPayload::new());
    }

    pub fn init_key_node(
        &mut self,
        idx: u32,
        name: String,
        value: Value,
        volume_id: VolumeId,
        parent: u32,
        epoch: u32,
    ) {
        let node = self.pool.node_mut(idx);
        node.name = name;
        node.parent = parent;
        node.epoch = epoch;
        node.payload = NodePayload::Key { value, volume_id };
    }

    /// A fresh, complete directory node — the state a cache fill leaves a
    /// walked directory in.
    pub fn is_fresh_complete_dir(&self, idx: u32, epoch: u32) -> bool {
        let node = self.pool.node(idx);
        if node.epoch != epoch {
            return false;
        }
        matches!(&node.payload, NodePayload::Dir(dir) if dir.cache_complete)
    }

    pub fn is_fresh_key(&self, idx: u32, epoch: u32) -> bool {
        let node = self.pool.node(idx);
        node.epoch == epoch && matches!(node.payload, NodePayload::Key { .. })
    }

    pub fn is_dir(&self, idx: u32) -> bool {
        self.pool.node(idx).is_dir()
    }

    pub fn dir_child(&self, idx: u32, name: &str) -> Option<u32> {
        match &self.pool.node(idx).payload {
            NodePayload::Dir(dir) => dir.children.get(name).copied(),
            NodePayload::Key { .. } => None,
        }
    }

    /// Fresh children of a directory as a listing, in name order.
    pub fn dir_listing(&self, idx: u32, epoch: u32) -> Vec<DirEntry> {
        let mut listing = Vec::new();
        if let NodePayload::Dir(dir) = &self.pool.node(idx).payload {
            for (name, &child) in &dir.children {
                let node = self.pool.node(child);
                if node.epoch != epoch {
                    continue;
                }
                listing.push(DirEntry {
                    kind: if node.is_dir() {
                        EntryKind::Dir
                    } else {
                        EntryKind::Key
                    },
                    name: name.clone(),
                });
            }
        }
        listing
    }

    pub fn key_value(&self, idx: u32) -> Option<(&Value, VolumeId)> {
        match &self.pool.node(idx).payload {
            NodePayload::Key { value, volume_id } => Some((value, *volume_id)),
            NodePayload::Dir(_) => None,
        }
    }

    pub fn set_key_value(&mut self, idx: u32, value: Value) {
        if let NodePayload::Key { value: slot, .. } = &mut self.pool.node_mut(idx).payload {
            *slot = value;
        }
    }

    pub fn touch(&mut self, idx: u32) {
        self.pool.touch(idx);
    }

    pub fn allocate(&mut self, prio: u8) -> Option<u32> {
        self.pool.allocate(prio)
    }

    pub fn insert_child(&mut self, dir_idx: u32, name: String, child_idx: u32) {
        if let NodePayload::Dir(dir) = &mut self.pool.node_mut(dir_idx).payload {
            dir.children.insert(name, child_idx);
        }
    }

    /// Brings a stale directory node into the current epoch without
    /// discarding its (stale) children; it stays incomplete until the
    /// surrounding fill marks it done.
    pub fn refresh_stale_dir(&mut self, idx: u32, epoch: u32) {
        let node = self.pool.node_mut(idx);
        if node.epoch == epoch {
            return;
        }
        node.epoch = epoch;
        if let NodePayload::Dir(dir) = &mut node.payload {
            dir.cache_complete = false;
        }
    }

    /// Marks a directory refreshed at the given epoch.
    pub fn mark_dir_filled(&mut self, idx: u32, epoch: u32, overlapping: bool) {
        let node = self.pool.node_mut(idx);
        node.epoch = epoch;
        if let NodePayload::Dir(dir) = &mut node.payload {
            dir.cache_complete = true;
            dir.overlapping_dir = overlapping;
        }
    }

    /// Walks `path` through fresh complete directories.
    pub fn find(&mut self, path: &[&str], epoch: u32) -> FindOutcome {
        let mut node = self.root;
        for item in path {
            if let Some(outcome) = self.check_walkable_dir(node, epoch) {
                return outcome;
            }
            match self.dir_child(node, *item) {
                None => return FindOutcome::NotFound,
                Some(child) => node = child,
            }
            self.pool.touch(node);
        }
        if let Some(outcome) = self.check_walkable_dir(node, epoch) {
            return outcome;
        }
        FindOutcome::Found(node)
    }

    fn check_walkable_dir(&self, idx: u32, epoch: u32) -> Option<FindOutcome> {
        let node = self.pool.node(idx);
        if node.epoch != epoch {
            return Some(FindOutcome::Inconsistent);
        }
        match &node.payload {
            NodePayload::Key { .. } => Some(FindOutcome::LogicError),
            NodePayload::Dir(dir) if !dir.cache_complete => Some(FindOutcome::Inconsistent),
            NodePayload::Dir(_) => None,
        }
    }

    /// Inserts or updates a key entry along `dirs`, creating directory
    /// nodes as needed. Gives up silently when the pool cannot allocate —
    /// the affected directory simply stays incomplete.
    pub fn store_key(
        &mut self,
        dirs: &[&str],
        key: &str,
        value: &Value,
        volume_id: VolumeId,
        prio: u8,
        epoch: u32,
    ) {
        let mut node = self.root;
        for item in dirs {
            if !self.is_dir(node) {
                return;
            }
            self.pool.touch(node);
            match self.dir_child(node, *item) {
                Some(child) => node = child,
                None => {
                    let Some(child) = self.pool.allocate(prio) else {
                        return;
                    };
                    self.init_dir_node(child, (*item).to_string(), node, epoch);
                    self.insert_child(node, (*item).to_string(), child);
                    node = child;
                }
            }
        }
        if !self.is_dir(node) {
            return;
        }
        match self.dir_child(node, key) {
            Some(existing) => {
                if let NodePayload::Key { value: slot, .. } =
                    &mut self.pool.node_mut(existing).payload
                {
                    *slot = value.clone();
                }
            }
            None => {
                let Some(child) = self.pool.allocate(prio) else {
                    return;
                };
                self.init_key_node(
                    child,
                    key.to_string(),
                    value.clone(),
                    volume_id,
                    node,
                    epoch,
                );
                self.insert_child(node, key.to_string(), child);
            }
        }
    }

    /// Frees a node and its whole subtree back to the pool.
    pub fn free_subtree(&mut self, idx: u32) {
        let children: Vec<u32> = match &mut self.pool.node_mut(idx).payload {
            NodePayload::Dir(dir) => {
                let children = dir.children.values().copied().collect();
                dir.children.clear();
                children
            }
            NodePayload::Key { .. } => Vec::new(),
        };
        for child in children {
            self.free_subtree(child);
        }
        self.pool.free(idx);
    }

    /// Removes a child from a directory and frees it; empty non-root
    /// directories are pruned from their parents in turn.
    pub fn erase_child(&mut self, dir_idx: u32, child_idx: u32) {
        let name = self.pool.node(child_idx).name.clone();
        if let NodePayload::Dir(dir) = &mut self.pool.node_mut(dir_idx).payload {
            dir.children.remove(&name);
        }
        self.free_subtree(child_idx);

        if dir_idx == self.root {
            return;
        }
        let now_empty = match &self.pool.node(dir_idx).payload {
            NodePayload::Dir(dir) => dir.children.is_empty(),
            NodePayload::Key { .. } => false,
        };
        if now_empty {
            let parent = self.pool.node(dir_idx).parent;
            if parent != NIL {
                self.erase_child(parent, dir_idx);
            }
        }
    }

    pub fn parent_of(&self, idx: u32) -> u32 {
        self.pool.node(idx).parent
    }
}
