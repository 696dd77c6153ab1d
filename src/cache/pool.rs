//! # Priority LRU Pool
//!
//! A fixed-capacity arena of cache nodes. Every node is in exactly one
//! place: the free list, or one of the priority LRU lists. Lists are
//! intrusive, linked through `prev`/`next` indices inside the nodes, so
//! membership changes are O(1) and nothing is allocated after the arena
//! reaches capacity.
//!
//! ## Eviction
//!
//! `allocate` prefers, in order: a free node, growing the arena up to
//! capacity, and finally evicting the least recently used node from the
//! *highest numbered* non-empty priority list — higher priority value
//! means cheaper to evict. Before an evicted node is handed out it is
//! detached from its cache parent and the parent's directory is marked
//! incomplete, so the tree never points at a recycled slot; a detached
//! directory also orphans its children for the same reason.
//!
//! The store uses two priorities: 0 for nodes under uniquely mounted
//! prefixes, 1 for nodes in overlapping-mount regions.
//!
//! ## Pinning
//!
//! The cache root must outlive every eviction cycle, so the tree pins it:
//! a pinned node leaves the LRU lists permanently and `touch`/`free`
//! ignore it.

use std::collections::BTreeMap;

use crate::store::VolumeId;
use crate::types::Value;

pub(crate) const PRIORITY_COUNT: usize = 2;
pub(crate) const NIL: u32 = u32::MAX;

const PINNED: u8 = u8::MAX;

#[derive(Debug)]
pub(crate) struct DirPayload {
    pub children: BTreeMap<String, u32>,
    pub cache_complete: bool,
    pub overlapping_dir: bool,
}

impl DirPayload {
    pub fn new() -> Self {
        Self {
            children: BTreeMap::new(),
            cache_complete: false,
            overlapping_dir: false,
        }
    }
}

#[derive(Debug)]
pub(crate) enum NodePayload {
    Dir(DirPayload),
    Key { value: Value, volume_id: VolumeId },
}

#[derive(Debug)]
pub(crate) struct CacheNode {
    prev: u32,
    next: u32,
    prio: u8,
    pub name: String,
    pub parent: u32,
    pub epoch: u32,
    pub payload: NodePayload,
}

impl CacheNode {
    fn vacant() -> Self {
        Self {
            prev: NIL,
            next: NIL,
            prio: 0,
            name: String::new(),
            parent: NIL,
            epoch: 0,
            payload: NodePayload::Dir(DirPayload::new()),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.payload, NodePayload::Dir(_))
    }
}

#[derive(Clone, Copy)]
struct LruList {
    head: u32,
    tail: u32,
}

impl LruList {
    const EMPTY: LruList = LruList {
        head: NIL,
        tail: NIL,
    };
}

pub(crate) struct CachePool {
    nodes: Vec<CacheNode>,
    capacity: usize,
    free_head: u32,
    lists: [LruList; PRIORITY_COUNT],
}

impl CachePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: Vec::new(),
            capacity: capacity.max(1),
            free_head: NIL,
            lists: [LruList::EMPTY; PRIORITY_COUNT],
        }
    }

    pub fn node(&self, idx: u32) -> &CacheNode {
        &self.nodes[idx as usize]
    }

    pub fn node_mut(&mut self, idx: u32) -> &mut CacheNode {
        &mut self.nodes[idx as usize]
    }

    /// Hands out a node at the given priority, evicting if necessary.
    /// `None` only when the pool is exhausted and every list is empty.
    pub fn allocate(&mut self, prio: u8) -> Option<u32> {
        if prio as usize >= PRIORITY_COUNT {
            return None;
        }
        if self.free_head != NIL {
            let idx = self.free_head;
            self.free_head = self.nodes[idx as usize].next;
            self.nodes[idx as usize].next = NIL;
            self.nodes[idx as usize].prio = prio;
            self.push_back(idx);
            return Some(idx);
        }
        if self.nodes.len() < self.capacity {
            let idx = self.nodes.len() as u32;
            self.nodes.push(CacheNode::vacant());
            self.nodes[idx as usize].prio = prio;
            self.push_back(idx);
            return Some(idx);
        }
        for list_prio in (0..PRIORITY_COUNT).rev() {
            let victim = self.lists[list_prio].head;
            if victim == NIL {
                continue;
            }
            self.detach_evicted(victim);
            self.unlink(victim);
            self.nodes[victim as usize].prio = prio;
            self.push_back(victim);
            return Some(victim);
        }
        None
    }

    /// Moves a node to the most-recently-used end of its list.
    pub fn touch(&mut self, idx: u32) {
        if self.nodes[idx as usize].prio == PINNED {
            return;
        }
        self.unlink(idx);
        self.push_back(idx);
    }

    /// Returns a node to the free list. The caller must already have
    /// detached it from the cache tree.
    pub fn free(&mut self, idx: u32) {
        if self.nodes[idx as usize].prio == PINNED {
            return;
        }
        self.unlink(idx);
        let node = &mut self.nodes[idx as usize];
        node.parent = NIL;
        node.prev = NIL;
        node.next = self.free_head;
        self.free_head = idx;
    }

    /// Removes a node from LRU rotation permanently.
    pub fn pin(&mut self, idx: u32) {
        self.unlink(idx);
        self.nodes[idx as usize].prio = PINNED;
    }

    fn unlink(&mut self, idx: u32) {
        let (prev, next, prio) = {
            let node = &self.nodes[idx as usize];
            (node.prev, node.next, node.prio)
        };
        if prio == PINNED {
            return;
        }
        if prev != NIL {
            self.nodes[prev as usize].next = next;
        } else if self.lists[prio as usize].head == idx {
            self.lists[prio as usize].head = next;
        }
        if next != NIL {
            self.nodes[next as usize].prev = prev;
        } else if self.lists[prio as usize].tail == idx {
            self.lists[prio as usize].tail = prev;
        }
        let node = &mut self.nodes[idx as usize];
        node.prev = NIL;
        node.next = NIL;
    }

    fn push_back(&mut self, idx: u32) {
        let prio = self.nodes[idx as usize].prio as usize;
        let tail = self.lists[prio].tail;
        self.nodes[idx as usize].prev = tail;
        self.nodes[idx as usize].next = NIL;
        if tail != NIL {
            self.nodes[tail as usize].next = idx;
        } else {
            self.lists[prio].head = idx;
        }
        self.lists[prio].tail = idx;
    }

    /// The reuse notification: unhook the victim from its parent (whose
    /// listing is thereby incomplete) and orphan any children so no index
    /// keeps pointing at the recycled slot.
    fn detach_evicted(&mut self, idx: u32) {
        let parent = self.nodes[idx as usize].parent;
        if parent != NIL {
            let name = self.nodes[idx as usize].name.clone();
            if let NodePayload::Dir(dir) = &mut self.nodes[parent as usize].payload {
                dir.children.remove(&name);
                dir.cache_complete = false;
            }
            self.nodes[idx as usize].parent = NIL;
        }
        let children: Vec<u32> = match &mut self.nodes[idx as usize].payload {
            NodePayload::Dir(dir) => {
                let children = dir.children.values().copied().collect();
                dir.children.clear();
                children
            }
            NodePayload::Key { .. } => Vec::new(),
        };
        for child in children {
            self.nodes[child as usize].parent = NIL;
        }
    }

    #[cfg(test)]
    fn list_len(&self, prio: u8) -> usize {
        let mut count = 0;
        let mut idx = self.lists[prio as usize].head;
        while idx != NIL {
            count += 1;
            idx = self.nodes[idx as usize].next;
        }
        count
    }
}
