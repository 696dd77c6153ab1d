//! In-memory directory cache: a fixed-capacity priority LRU pool of nodes
//! and the path-keyed tree built from them.

mod pool;
mod tree;

pub(crate) use pool::{CachePool, CacheNode, DirPayload, NodePayload, NIL, PRIORITY_COUNT};
pub(crate) use tree::{DirCache, FindOutcome};
