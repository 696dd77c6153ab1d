//! # Key Path Splitting
//!
//! Keys are addressed by POSIX-style paths. `split_dir_path` breaks a path
//! into its non-empty segments; `split_key_path` additionally peels off the
//! final segment as the key name and rejects paths that do not name one
//! (empty paths and paths with an empty trailing segment).
//!
//! Leading, trailing, and doubled separators are tolerated everywhere a
//! directory is being named: `/a//b/` and `a/b` both yield `[a, b]`.

use eyre::Result;

use crate::error::StoreError;

/// Directory segments plus the trailing key name.
#[derive(Debug, PartialEq, Eq)]
pub struct PathAndKey<'a> {
    pub dirs: Vec<&'a str>,
    pub key: &'a str,
}

/// Splits a directory path into its non-empty segments.
pub fn split_dir_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

/// Splits a key path into `(directory segments, key name)`.
///
/// Fails with `InvalidPath` when the path has no non-empty segments or ends
/// with a separator, since neither names a key.
pub fn split_key_path(path: &str) -> Result<PathAndKey<'_>> {
    let mut dirs = split_dir_path(path);
    if dirs.is_empty() || path.ends_with('/') {
        return Err(StoreError::InvalidPath(path.to_string()).into());
    }
    let key = dirs.pop().expect("non-empty segment list");
    Ok(PathAndKey { dirs, key })
}
