//! # Store Façade
//!
//! The process-wide entry point: a namespace of mounted volumes behind a
//! coherence-tracked directory cache and per-volume operation sequencers.
//!
//! ## Orchestration
//!
//! Every public operation follows the same shape: split the path, consult
//! the cache under the cache lock (filling it from the mounted volumes
//! when a walked node is stale or incomplete), decide which volume owns
//! the operation, draw an operation ticket while the cache lock is still
//! held, then release the locks and execute on the volume under its
//! sequencer. Per volume, effects land in exact ticket order; across
//! volumes no ordering is promised.
//!
//! ## Locks
//!
//! - the cache lock guards the directory cache and its LRU pool;
//! - the registry lock guards the mount tree, the id map, and ticket
//!   assignment;
//! - each mount's gate serializes volume I/O and executed-ticket state.
//!
//! Acquisition order is cache → registry → gate; the gate is never held
//! while taking either of the others.
//!
//! ## Cache Epoch
//!
//! A single atomic epoch invalidates the cache wholesale: every mount and
//! unmount bumps it, as does any volume operation that fails (so cached
//! reads re-verify against disk afterwards). Cached nodes record the
//! epoch they were refreshed at and are ignored once it moves on.

mod mount;
mod sequencer;

pub use mount::{VolumeId, VolumeInfo};
pub(crate) use mount::{MountPoint, MountRegistry, MountTree};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::Result;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cache::{DirCache, FindOutcome, NIL};
use crate::error::StoreError;
use crate::storage::{BigFileStorage, SlotFileStorage, StdFile};
use crate::types::{DirEntry, EntryKind, Value};
use crate::volume::{split_dir_path, split_key_path, Volume};

/// Store construction options.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Maximum number of directory-cache nodes.
    pub cache_pool_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cache_pool_size: 16_384,
        }
    }
}

impl StoreOptions {
    pub fn with_cache_pool_size(mut self, cache_pool_size: usize) -> Self {
        self.cache_pool_size = cache_pool_size;
        self
    }
}

fn main_file_path(volume_dir: &Path, volume_name: &str) -> PathBuf {
    volume_dir.join(format!("{volume_name}.phkvsmain"))
}

fn stm_file_path(volume_dir: &Path, volume_name: &str) -> PathBuf {
    volume_dir.join(format!("{volume_name}.phkvsstm"))
}

fn big_file_path(volume_dir: &Path, volume_name: &str) -> PathBuf {
    volume_dir.join(format!("{volume_name}.phkvsbig"))
}

/// Removes the three files of an unmounted volume.
pub fn delete_volume(volume_dir: &Path, volume_name: &str) -> Result<()> {
    for path in [
        main_file_path(volume_dir, volume_name),
        stm_file_path(volume_dir, volume_name),
        big_file_path(volume_dir, volume_name),
    ] {
        std::fs::remove_file(&path).map_err(|e| StoreError::InvalidFile {
            path: path.clone(),
            reason: format!("cannot delete volume file: {e}"),
        })?;
    }
    Ok(())
}

fn canonical_path(segments: &[&str], key: Option<&str>) -> String {
    let mut path = String::new();
    for segment in segments {
        path.push('/');
        path.push_str(segment);
    }
    if let Some(key) = key {
        path.push('/');
        path.push_str(key);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

fn to_expiration_ms(expires: Option<SystemTime>) -> u64 {
    expires
        .map(|at| {
            at.duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0)
        })
        .unwrap_or(0)
}

pub struct Store {
    cache: Mutex<DirCache>,
    registry: Mutex<MountRegistry>,
    epoch: AtomicU32,
}

impl Store {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            cache: Mutex::new(DirCache::new(options.cache_pool_size)),
            registry: Mutex::new(MountRegistry::new()),
            epoch: AtomicU32::new(0),
        }
    }

    fn current_epoch(&self) -> u32 {
        self.epoch.load(Ordering::Acquire)
    }

    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::Release);
    }

    // ---- volume lifecycle ----

    /// Creates a volume's file triplet and mounts it at `mount_path`.
    pub fn create_and_mount_volume(
        &self,
        volume_dir: &Path,
        volume_name: &str,
        mount_path: &str,
    ) -> Result<VolumeId> {
        if !volume_dir.exists() {
            std::fs::create_dir_all(volume_dir).map_err(StoreError::Io)?;
        }
        let main = main_file_path(volume_dir, volume_name);
        let stm = stm_file_path(volume_dir, volume_name);
        let big = big_file_path(volume_dir, volume_name);
        for path in [&main, &stm, &big] {
            if path.exists() {
                return Err(StoreError::InvalidFile {
                    path: path.clone(),
                    reason: "volume file already exists".into(),
                }
                .into());
            }
        }
        let volume = Volume::create(
            Box::new(StdFile::create(&main)?),
            SlotFileStorage::create(Box::new(StdFile::create(&stm)?))?,
            BigFileStorage::create(Box::new(StdFile::create(&big)?))?,
        )?;
        self.finish_mount(volume, volume_dir, volume_name, mount_path)
    }

    /// Opens an existing volume triplet and mounts it at `mount_path`.
    pub fn mount_volume(
        &self,
        volume_dir: &Path,
        volume_name: &str,
        mount_path: &str,
    ) -> Result<VolumeId> {
        let main = main_file_path(volume_dir, volume_name);
        let stm = stm_file_path(volume_dir, volume_name);
        let big = big_file_path(volume_dir, volume_name);
        for path in [&main, &stm, &big] {
            if !path.exists() {
                return Err(StoreError::InvalidFile {
                    path: path.clone(),
                    reason: "volume file does not exist".into(),
                }
                .into());
            }
        }
        let volume = Volume::open(
            Box::new(StdFile::open(&main)?),
            SlotFileStorage::open(Box::new(StdFile::open(&stm)?))?,
            BigFileStorage::open(Box::new(StdFile::open(&big)?))?,
        )?;
        self.finish_mount(volume, volume_dir, volume_name, mount_path)
    }

    fn finish_mount(
        &self,
        volume: Volume,
        volume_dir: &Path,
        volume_name: &str,
        mount_path: &str,
    ) -> Result<VolumeId> {
        let segments = split_dir_path(mount_path);
        let mut registry = self.registry.lock();
        self.bump_epoch();
        let mount = registry.register(
            &segments,
            volume,
            volume_dir.to_path_buf(),
            volume_name.to_string(),
        );
        info!(id = mount.id, mount_path, volume_name, "volume mounted");
        Ok(mount.id)
    }

    /// Unmounts a volume, draining its in-flight operations first.
    /// Unknown ids are ignored.
    pub fn unmount_volume(&self, id: VolumeId) -> Result<()> {
        let mount = {
            let mut registry = self.registry.lock();
            let Some(mount) = registry.unmount(id) else {
                return Ok(());
            };
            self.bump_epoch();
            mount
        };
        let mut gate = mount.gate.lock();
        mount.wait_pending_ops(&mut gate);
        info!(id, "volume unmounted");
        Ok(())
    }

    /// Snapshot of all mounts, ordered by id.
    pub fn mount_volumes_info(&self) -> Vec<VolumeInfo> {
        self.registry.lock().info()
    }

    // ---- key/value operations ----

    /// Stores a value, creating intermediate directories. With several
    /// overlapping mounts the lowest-id mount owns the write.
    pub fn store(&self, key_path: &str, value: Value, expires: Option<SystemTime>) -> Result<()> {
        let parsed = split_key_path(key_path)?;
        let expires_at_ms = to_expiration_ms(expires);
        let full = canonical_path(&parsed.dirs, Some(parsed.key));

        // fast path: the key is cached, so its owning volume is known
        let mut target: Option<(Arc<MountPoint>, u32)> = None;
        {
            let mut cache = self.cache.lock();
            let mut outcome = cache.find(&parsed.dirs, self.current_epoch());
            if outcome == FindOutcome::Inconsistent {
                self.fill_cache(&mut cache, &parsed.dirs)?;
                outcome = cache.find(&parsed.dirs, self.current_epoch());
            }
            if let FindOutcome::Found(dir_idx) = outcome {
                if let Some(key_idx) = cache.dir_child(dir_idx, parsed.key) {
                    if cache.is_dir(key_idx) {
                        return Err(StoreError::KindMismatch {
                            name: parsed.key.to_string(),
                            existing: EntryKind::Dir.as_str(),
                            attempted: EntryKind::Key.as_str(),
                        }
                        .into());
                    }
                    let volume_id = cache
                        .key_value(key_idx)
                        .map(|(_, id)| id)
                        .expect("non-dir cache node holds a key");
                    cache.set_key_value(key_idx, value.clone());
                    cache.touch(key_idx);
                    let registry = self.registry.lock();
                    if let Some(mount) = registry.volumes.get(&volume_id) {
                        target = Some((Arc::clone(mount), mount.acquire_op_seq()));
                    }
                }
            }
        }
        if let Some((mount, seq)) = target {
            let local = mount.local_path(&full).to_string();
            return self.run_sequenced(&mount, seq, move |volume| {
                volume.store(&local, value, expires_at_ms)
            });
        }

        // slow path: resolve the owning volume from the mount topology
        let (mount, seq) = {
            let mut cache = self.cache.lock();
            let registry = self.registry.lock();
            let mut segments = parsed.dirs.clone();
            segments.push(parsed.key);
            let found = registry.find_by_path(&segments);
            if found.is_empty() {
                return Err(StoreError::NoVolumeMounted(full).into());
            }
            let prio: u8 = if found.len() > 1 { 0 } else { 1 };
            let mount = Arc::clone(&found[0]);
            cache.store_key(
                &parsed.dirs,
                parsed.key,
                &value,
                mount.id,
                prio,
                self.current_epoch(),
            );
            let seq = mount.acquire_op_seq();
            (mount, seq)
        };
        let local = mount.local_path(&full).to_string();
        self.run_sequenced(&mount, seq, move |volume| {
            volume.store(&local, value, expires_at_ms)
        })
    }

    /// Fetches the value under a key path across all contributing mounts.
    pub fn lookup(&self, key_path: &str) -> Result<Option<Value>> {
        let Ok(parsed) = split_key_path(key_path) else {
            return Ok(None);
        };
        let full = canonical_path(&parsed.dirs, Some(parsed.key));

        {
            let mut cache = self.cache.lock();
            let mut outcome = cache.find(&parsed.dirs, self.current_epoch());
            if outcome == FindOutcome::Inconsistent {
                self.fill_cache(&mut cache, &parsed.dirs)?;
                outcome = cache.find(&parsed.dirs, self.current_epoch());
            }
            match outcome {
                FindOutcome::Found(dir_idx) => {
                    let epoch = self.current_epoch();
                    if let Some(key_idx) = cache.dir_child(dir_idx, parsed.key) {
                        if cache.is_fresh_key(key_idx, epoch) {
                            cache.touch(key_idx);
                            let value = cache
                                .key_value(key_idx)
                                .map(|(value, _)| value.clone())
                                .expect("fresh key node holds a value");
                            return Ok(Some(value));
                        }
                    }
                    // a fresh complete directory proves absence
                    return Ok(None);
                }
                FindOutcome::NotFound => return Ok(None),
                FindOutcome::LogicError => {
                    return Err(StoreError::KindMismatch {
                        name: full,
                        existing: EntryKind::Key.as_str(),
                        attempted: EntryKind::Dir.as_str(),
                    }
                    .into())
                }
                FindOutcome::Inconsistent => {}
            }
        }

        // the cache could not be completed (pool pressure); poll every
        // contributing volume in mount order, each under its sequencer
        let mounts = {
            let registry = self.registry.lock();
            let mut segments = parsed.dirs.clone();
            segments.push(parsed.key);
            registry.find_by_path(&segments)
        };
        for mount in mounts {
            let seq = {
                let _registry = self.registry.lock();
                mount.acquire_op_seq()
            };
            let local = mount.local_path(&full).to_string();
            let found = self.run_sequenced(&mount, seq, move |volume| volume.lookup(&local))?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Erases a cached key from its owning volume. Keys that are not in
    /// the cache are left untouched (no on-disk scan is performed).
    pub fn erase_key(&self, key_path: &str) -> Result<()> {
        let Ok(parsed) = split_key_path(key_path) else {
            return Ok(());
        };
        let full = canonical_path(&parsed.dirs, Some(parsed.key));

        let mut target: Option<(Arc<MountPoint>, u32)> = None;
        {
            let mut cache = self.cache.lock();
            let mut outcome = cache.find(&parsed.dirs, self.current_epoch());
            if outcome == FindOutcome::Inconsistent {
                self.fill_cache(&mut cache, &parsed.dirs)?;
                outcome = cache.find(&parsed.dirs, self.current_epoch());
            }
            if let FindOutcome::Found(dir_idx) = outcome {
                let epoch = self.current_epoch();
                if let Some(key_idx) = cache.dir_child(dir_idx, parsed.key) {
                    if cache.is_fresh_key(key_idx, epoch) {
                        let volume_id = cache
                            .key_value(key_idx)
                            .map(|(_, id)| id)
                            .expect("fresh key node holds a value");
                        let registry = self.registry.lock();
                        if let Some(mount) = registry.volumes.get(&volume_id) {
                            target = Some((Arc::clone(mount), mount.acquire_op_seq()));
                        }
                        drop(registry);
                        cache.erase_child(dir_idx, key_idx);
                    }
                }
            }
        }
        if let Some((mount, seq)) = target {
            let local = mount.local_path(&full).to_string();
            self.run_sequenced(&mount, seq, move |volume| volume.erase_key(&local))?;
        }
        Ok(())
    }

    /// Removes a directory and everything beneath it from every
    /// contributing volume.
    pub fn erase_dir_recursive(&self, dir_path: &str) -> Result<()> {
        let segments = split_dir_path(dir_path);
        let full = canonical_path(&segments, None);

        let plan: Vec<(Arc<MountPoint>, u32)> = {
            let mut cache = self.cache.lock();
            let mut outcome = cache.find(&segments, self.current_epoch());
            if outcome == FindOutcome::Inconsistent {
                self.fill_cache(&mut cache, &segments)?;
                outcome = cache.find(&segments, self.current_epoch());
            }
            match outcome {
                FindOutcome::Found(idx) if idx != cache.root() => {
                    let parent = cache.parent_of(idx);
                    if parent != NIL {
                        cache.erase_child(parent, idx);
                    } else {
                        cache.free_subtree(idx);
                    }
                }
                FindOutcome::LogicError => {
                    return Err(StoreError::KindMismatch {
                        name: full,
                        existing: EntryKind::Key.as_str(),
                        attempted: EntryKind::Dir.as_str(),
                    }
                    .into())
                }
                _ => {}
            }

            let registry = self.registry.lock();
            let found = registry.find_by_path(&segments);
            if found.is_empty() {
                return Err(StoreError::NoVolumeMounted(full).into());
            }
            found
                .into_iter()
                .map(|mount| {
                    let seq = mount.acquire_op_seq();
                    (mount, seq)
                })
                .collect()
        };

        let mut first_error = None;
        for (mount, seq) in plan {
            let local = mount.local_path(&full).to_string();
            let result =
                self.run_sequenced(&mount, seq, move |volume| volume.erase_dir_recursive(&local));
            if let Err(error) = result {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Lists a directory as the union of every contributing volume's
    /// entries. `None` when no such directory is visible.
    pub fn get_dir_entries(&self, dir_path: &str) -> Result<Option<Vec<DirEntry>>> {
        let segments = split_dir_path(dir_path);

        let mut cache = self.cache.lock();
        let mut outcome = cache.find(&segments, self.current_epoch());
        if outcome == FindOutcome::Inconsistent {
            self.fill_cache(&mut cache, &segments)?;
            outcome = cache.find(&segments, self.current_epoch());
        }
        let epoch = self.current_epoch();
        match outcome {
            FindOutcome::Found(idx) => Ok(Some(cache.dir_listing(idx, epoch))),
            FindOutcome::NotFound => Ok(None),
            FindOutcome::LogicError => Err(StoreError::KindMismatch {
                name: canonical_path(&segments, None),
                existing: EntryKind::Key.as_str(),
                attempted: EntryKind::Dir.as_str(),
            }
            .into()),
            FindOutcome::Inconsistent => {
                // the pool could not hold the whole listing; report what is
                // cached if the path still resolves to a directory
                let mut node = cache.root();
                for segment in &segments {
                    match cache.dir_child(node, *segment) {
                        Some(child) if cache.is_dir(child) => node = child,
                        _ => return Ok(None),
                    }
                }
                Ok(Some(cache.dir_listing(node, epoch)))
            }
        }
    }

    // ---- internals ----

    fn run_sequenced<R>(
        &self,
        mount: &MountPoint,
        seq: u32,
        op: impl FnOnce(&mut Volume) -> Result<R>,
    ) -> Result<R> {
        let result = mount.execute_in_sequence(seq, op);
        if result.is_err() {
            // cached reads must re-verify against disk after a failure
            self.bump_epoch();
        }
        result
    }

    /// Walks the mount tree and the cache tree in lockstep along `path`,
    /// refreshing every stale directory from all contributing volumes —
    /// every mount whose mount path prefixes the directory, in ascending
    /// id order so the lowest mount claims shared keys. Partial fills are
    /// allowed: when the pool cannot allocate, the directory is left
    /// incomplete and the walk stops.
    fn fill_cache(&self, cache: &mut DirCache, path: &[&str]) -> Result<()> {
        let registry = self.registry.lock();
        let epoch = self.current_epoch();
        debug!(?path, "cache fill");

        let mut mount_node: Option<&MountTree> = Some(&registry.tree);
        let mut prefix_mounts: Vec<Arc<MountPoint>> = Vec::new();
        let mut cache_idx = cache.root();
        let mut full_path = String::from("/");

        for depth in 0..=path.len() {
            let child_mounts = mount_node.map_or(0, |node| node.child_mounts);
            if let Some(tree_node) = mount_node {
                prefix_mounts.extend(tree_node.mounts.values().cloned());
                prefix_mounts.sort_by_key(|mount| mount.id);
            }
            cache.touch(cache_idx);
            if !cache.is_fresh_complete_dir(cache_idx, epoch) {
                if !cache.is_dir(cache_idx) {
                    // a key sits where the path needs a directory; the
                    // caller's retry will surface this as a logic error
                    return Ok(());
                }
                let prio: u8 = if child_mounts > 1 { 1 } else { 0 };
                for mount in &prefix_mounts {
                    if !self.fill_dir_from_mount(cache, cache_idx, mount, &full_path, prio, epoch)? {
                        return Ok(());
                    }
                }
                cache.mark_dir_filled(cache_idx, epoch, child_mounts > 1);
            }

            if depth < path.len() {
                let item = path[depth];
                mount_node = mount_node.and_then(|node| node.subdirs.get(item));
                let next_child_mounts = mount_node.map_or(0, |node| node.child_mounts);
                match cache.dir_child(cache_idx, item) {
                    Some(child) => {
                        if !cache.is_dir(child) {
                            return Ok(());
                        }
                        cache_idx = child;
                    }
                    None => {
                        let prio: u8 = if next_child_mounts > 1 { 1 } else { 0 };
                        let Some(child) = cache.allocate(prio) else {
                            return Ok(());
                        };
                        cache.init_dir_node(child, item.to_string(), cache_idx, epoch);
                        cache.insert_child(cache_idx, item.to_string(), child);
                        cache_idx = child;
                    }
                }
                full_path.push_str(item);
                full_path.push('/');
            }
        }
        Ok(())
    }

    /// Merges one mounted volume's listing of `full_path` into a cache
    /// directory. Returns `false` when the pool ran dry mid-fill.
    fn fill_dir_from_mount(
        &self,
        cache: &mut DirCache,
        cache_idx: u32,
        mount: &Arc<MountPoint>,
        full_path: &str,
        prio: u8,
        epoch: u32,
    ) -> Result<bool> {
        let mut gate = mount.gate.lock();
        mount.wait_pending_ops(&mut gate);
        let local = mount.local_path(full_path);
        let Some(entries) = gate.volume.get_dir_entries(local)? else {
            return Ok(true);
        };
        for dir_entry in entries {
            let existing = cache.dir_child(cache_idx, &dir_entry.name);
            match dir_entry.kind {
                EntryKind::Dir => match existing {
                    Some(node) => {
                        if !cache.is_dir(node) {
                            cache.init_dir_node(node, dir_entry.name.clone(), cache_idx, epoch);
                        } else {
                            cache.refresh_stale_dir(node, epoch);
                        }
                    }
                    None => {
                        let Some(node) = cache.allocate(prio) else {
                            return Ok(false);
                        };
                        cache.init_dir_node(node, dir_entry.name.clone(), cache_idx, epoch);
                        cache.insert_child(cache_idx, dir_entry.name, node);
                    }
                },
                EntryKind::Key => {
                    if let Some(node) = existing {
                        if cache.is_fresh_key(node, epoch) {
                            continue;
                        }
                    }
                    let key_path = format!("{local}/{}", dir_entry.name);
                    let Some(value) = gate.volume.lookup(&key_path)? else {
                        // expired between listing and lookup
                        continue;
                    };
                    match existing {
                        Some(node) => {
                            cache.init_key_node(
                                node,
                                dir_entry.name.clone(),
                                value,
                                mount.id,
                                cache_idx,
                                epoch,
                            );
                        }
                        None => {
                            let Some(node) = cache.allocate(prio) else {
                                return Ok(false);
                            };
                            cache.init_key_node(
                                node,
                                dir_entry.name.clone(),
                                value,
                                mount.id,
                                cache_idx,
                                epoch,
                            );
                            cache.insert_child(cache_idx, dir_entry.name, node);
                        }
                    }
                }
            }
        }
        Ok(true)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}
