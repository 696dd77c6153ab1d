//! # Error Kinds
//!
//! This module defines the typed failure classes raised by the engine. All
//! fallible operations return `eyre::Result`; the variants below are attached
//! as the report's root cause so callers can recover the kind with
//! `report.downcast_ref::<StoreError>()` when they need to branch on it.
//!
//! ## Variant Map
//!
//! | Variant | Raised by |
//! |---------|-----------|
//! | InvalidFile | open/create of any of the three volume files |
//! | InvalidOffset | BGFS page offsets, SMFS slot offsets, file seeks |
//! | InvalidPath | empty key paths or empty trailing segments |
//! | KindMismatch | key/dir collisions on insert, erase, or traversal |
//! | SizeTooBig | SMFS payloads above the 256-byte slot maximum |
//! | OutOfRange | codec cursor over/under-runs (internal) |
//! | NoVolumeMounted | mutating operations on uncovered paths |
//! | Io | short reads/writes and any other file-level failure |
//! | CorruptData | invariant violations while decoding on-disk records |

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid file '{}': {reason}", .path.display())]
    InvalidFile { path: PathBuf, reason: String },

    #[error("invalid offset {offset} in {location}")]
    InvalidOffset { offset: u64, location: &'static str },

    #[error("invalid path '{0}': path and key component must be non-empty")]
    InvalidPath(String),

    #[error("entry '{name}' is a {existing}, cannot be replaced by a {attempted}")]
    KindMismatch {
        name: String,
        existing: &'static str,
        attempted: &'static str,
    },

    #[error("payload of {0} bytes exceeds the slot storage maximum")]
    SizeTooBig(usize),

    #[error("{op} of {requested} bytes with {available} bytes remaining")]
    OutOfRange {
        op: &'static str,
        requested: usize,
        available: usize,
    },

    #[error("no volume mounted for path '{0}'")]
    NoVolumeMounted(String),

    #[error("i/o failure")]
    Io(#[from] std::io::Error),

    #[error("corrupt data: {0}")]
    CorruptData(String),
}

impl StoreError {
    /// Extracts the `StoreError` kind from an error report, if the report
    /// was rooted in one.
    pub fn from_report(report: &eyre::Report) -> Option<&StoreError> {
        report.downcast_ref::<StoreError>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_survives_eyre_roundtrip() {
        let report: eyre::Report = StoreError::SizeTooBig(300).into();

        let kind = StoreError::from_report(&report);

        assert!(matches!(kind, Some(StoreError::SizeTooBig(300))));
    }

    #[test]
    fn kind_survives_added_context() {
        use eyre::WrapErr;

        let result: eyre::Result<()> = Err(StoreError::InvalidPath("".into()).into());
        let report = result.wrap_err("while storing").unwrap_err();

        assert!(matches!(
            StoreError::from_report(&report),
            Some(StoreError::InvalidPath(_))
        ));
    }
}
