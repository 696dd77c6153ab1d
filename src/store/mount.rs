//! # Mount Registry & Path Resolver
//!
//! Volumes are mounted at path prefixes inside the store's namespace. The
//! registry keeps two views of the same set of mounts:
//!
//! - `volumes`: a flat id → mount map for direct addressing, and
//! - a `MountTree` keyed by path segment, where each node carries the
//!   mounts rooted exactly there plus a count of mounts somewhere below
//!   it (`child_mounts`), which the cache uses to detect overlapping
//!   regions.
//!
//! Resolution of a key path collects every mount whose mount path is a
//! prefix of the path, walking the tree from the root; results are
//! ordered by ascending `VolumeId`, and the lowest id wins write
//! placement among overlapping mounts.
//!
//! Mount paths are stored canonically: the root mount is the empty
//! string, everything else is `/seg/seg` with no trailing separator, so
//! the mount-local remainder of a path is always `path[mount_len..]`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

use crate::volume::Volume;

/// Monotonic identifier assigned at mount time.
pub type VolumeId = u32;

/// Description of one mounted volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub volume_dir: PathBuf,
    pub volume_name: String,
    pub mount_path: String,
    pub id: VolumeId,
}

/// The volume plus the executed side of its operation sequencer, guarded
/// by one mutex so volume I/O is serialized with ticket accounting.
pub(crate) struct VolumeGate {
    pub volume: Volume,
    pub last_executed: u32,
    pub abort: bool,
}

pub(crate) struct MountPoint {
    pub id: VolumeId,
    /// Canonical mount path: "" for the root, "/a/b" otherwise.
    pub mount_path: String,
    pub volume_dir: PathBuf,
    pub volume_name: String,
    /// Last ticket handed out; bumped only under the registry lock.
    pub op_assigned: AtomicU32,
    pub gate: Mutex<VolumeGate>,
    pub gate_cond: Condvar,
}

impl MountPoint {
    /// The part of a canonical path below this mount.
    pub fn local_path<'a>(&self, full_path: &'a str) -> &'a str {
        &full_path[self.mount_path.len()..]
    }
}

#[derive(Default)]
pub(crate) struct MountTree {
    pub mounts: BTreeMap<VolumeId, Arc<MountPoint>>,
    pub subdirs: BTreeMap<String, MountTree>,
    /// Mounts registered strictly below this node.
    pub child_mounts: usize,
}

pub(crate) struct MountRegistry {
    pub tree: MountTree,
    pub volumes: HashMap<VolumeId, Arc<MountPoint>>,
    last_volume_id: VolumeId,
}

/// Canonical form of a mount path: "" for the root, "/a/b" otherwise.
pub(crate) fn canonical_mount_path(segments: &[&str]) -> String {
    let mut path = String::new();
    for segment in segments {
        path.push('/');
        path.push_str(segment);
    }
    path
}

impl MountRegistry {
    pub fn new() -> Self {
        Self {
            tree: MountTree::default(),
            volumes: HashMap::new(),
            last_volume_id: 0,
        }
    }

    /// Registers a volume at a mount path and returns its mount handle.
    pub fn register(
        &mut self,
        mount_segments: &[&str],
        volume: Volume,
        volume_dir: PathBuf,
        volume_name: String,
    ) -> Arc<MountPoint> {
        self.last_volume_id += 1;
        let mount = Arc::new(MountPoint {
            id: self.last_volume_id,
            mount_path: canonical_mount_path(mount_segments),
            volume_dir,
            volume_name,
            op_assigned: AtomicU32::new(0),
            gate: Mutex::new(VolumeGate {
                volume,
                last_executed: 0,
                abort: false,
            }),
            gate_cond: Condvar::new(),
        });
        self.volumes.insert(mount.id, Arc::clone(&mount));

        let mut node = &mut self.tree;
        for segment in mount_segments {
            node.child_mounts += 1;
            node = node.subdirs.entry((*segment).to_string()).or_default();
        }
        node.mounts.insert(mount.id, Arc::clone(&mount));
        mount
    }

    /// Removes a mount by id; returns its handle so in-flight operations
    /// can drain before the volume closes.
    pub fn unmount(&mut self, id: VolumeId) -> Option<Arc<MountPoint>> {
        let mount = self.volumes.remove(&id)?;
        let segments: Vec<&str> = mount
            .mount_path
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        Self::erase_from_tree(&mut self.tree, &segments, 0, id);
        Some(mount)
    }

    fn erase_from_tree(node: &mut MountTree, segments: &[&str], depth: usize, id: VolumeId) {
        if depth == segments.len() {
            node.mounts.remove(&id);
            return;
        }
        let Some(subtree) = node.subdirs.get_mut(segments[depth]) else {
            return;
        };
        Self::erase_from_tree(subtree, segments, depth + 1, id);
        node.child_mounts -= 1;
        if subtree.mounts.is_empty() && subtree.subdirs.is_empty() {
            node.subdirs.remove(segments[depth]);
        }
    }

    /// Every mount whose mount path prefixes `segments`, ordered by
    /// ascending id.
    pub fn find_by_path(&self, segments: &[&str]) -> Vec<Arc<MountPoint>> {
        let mut found = Vec::new();
        let mut node = Some(&self.tree);
        let mut depth = 0;
        while let Some(tree) = node {
            found.extend(tree.mounts.values().cloned());
            if depth < segments.len() {
                node = tree.subdirs.get(segments[depth]);
                depth += 1;
            } else {
                node = None;
            }
        }
        found.sort_by_key(|mount| mount.id);
        found
    }

    pub fn info(&self) -> Vec<VolumeInfo> {
        let mut info: Vec<VolumeInfo> = self
            .volumes
            .values()
            .map(|mount| VolumeInfo {
                volume_dir: mount.volume_dir.clone(),
                volume_name: mount.volume_name.clone(),
                mount_path: mount.mount_path.clone(),
                id: mount.id,
            })
            .collect();
        info.sort_by_key(|entry| entry.id);
        info
    }
}
