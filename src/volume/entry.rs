//! # Directory Entry Records
//!
//! Every directory entry occupies a fixed 41-byte record inside a skip-list
//! node:
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  -----------------------------------------
//! 0       1     flag byte (see below)
//! 1       8     expiration, absolute wall-clock ms (0 = never)
//! 9       16    key slot: inline window, or {len u64, offset u64}
//! 25      16    value slot: inline window, or {len u64, offset u64}
//! ```
//!
//! Flag byte:
//!
//! ```text
//! bit 7     1 = directory entry, 0 = key entry
//! bit 6     1 = key is inline
//! bit 5     1 = value is inline
//! bit 4     reserved, zero
//! bits 3..0 value type index (Value::type_index)
//! ```
//!
//! ## Placement Rules
//!
//! Keys are inline up to 16 bytes; values strictly below 16 bytes (the
//! inline bytes form reserves a leading length byte). Longer payloads go to
//! SMFS up to 256 bytes and to BGFS beyond, with the record storing
//! `{length, external offset}` instead of the payload.
//!
//! ## Inline Windows
//!
//! - Strings: the payload zero-padded to 16 bytes; a 16-byte key uses the
//!   full window with no terminator.
//! - Bytes: a length byte (0…15) followed by the payload.
//! - Scalars: little-endian bytes zero-padded to 16.
//!
//! A directory entry's value is the child skip-list head offset, carried as
//! an inline `U64`.

use eyre::Result;

use crate::error::StoreError;
use crate::storage::MAX_SLOT_DATA_SIZE;
use crate::types::{EntryKind, Value};

/// Inline payload window inside an entry record.
pub(crate) const INLINE_SIZE: usize = 16;
/// Serialized entry record size: flags + expiration + key + value.
pub(crate) const ENTRY_BIN_SIZE: usize = 1 + 8 + INLINE_SIZE + INLINE_SIZE;

pub(crate) const FLAG_DIR: u8 = 0x80;
pub(crate) const FLAG_INLINE_KEY: u8 = 0x40;
pub(crate) const FLAG_INLINE_VALUE: u8 = 0x20;
pub(crate) const FLAG_VALUE_TYPE_MASK: u8 = 0x0F;

pub(crate) fn is_inline_key_len(len: usize) -> bool {
    len <= INLINE_SIZE
}

pub(crate) fn is_inline_value_len(len: usize) -> bool {
    len < INLINE_SIZE
}

pub(crate) fn is_slot_len(len: usize) -> bool {
    len <= MAX_SLOT_DATA_SIZE
}

/// Key name plus the offset of its external allocation, if any.
#[derive(Debug, Clone)]
pub(crate) struct KeySlot {
    pub name: String,
    pub offset: u64,
}

impl KeySlot {
    pub fn new(name: String) -> Self {
        Self { name, offset: 0 }
    }
}

/// Value plus its external placement bookkeeping. `prev_len` carries the
/// length of the payload the entry held before an overwrite, which decides
/// whether the external allocation can be updated in place or must move.
#[derive(Debug, Clone)]
pub(crate) struct ValueSlot {
    pub value: Value,
    pub offset: u64,
    pub prev_len: usize,
}

impl ValueSlot {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            offset: 0,
            prev_len: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub kind: EntryKind,
    pub expires_at_ms: u64,
    pub key: KeySlot,
    pub value: ValueSlot,
}

impl Entry {
    pub fn new_key(name: String, value: Value, expires_at_ms: u64) -> Self {
        Self {
            kind: EntryKind::Key,
            expires_at_ms,
            key: KeySlot::new(name),
            value: ValueSlot::new(value),
        }
    }

    pub fn new_dir(name: String, child_head_offset: u64) -> Self {
        Self {
            kind: EntryKind::Dir,
            expires_at_ms: 0,
            key: KeySlot::new(name),
            value: ValueSlot::new(Value::U64(child_head_offset)),
        }
    }

    /// Child skip-list head offset of a directory entry.
    pub fn child_head_offset(&self) -> Result<u64> {
        match self.value.value {
            Value::U64(offset) => Ok(offset),
            ref other => Err(StoreError::CorruptData(format!(
                "directory entry '{}' carries a {:?} value instead of a head offset",
                self.key.name, other
            ))
            .into()),
        }
    }
}

/// Zero-padded inline window for strings and keys.
pub(crate) fn encode_inline_window(payload: &[u8]) -> [u8; INLINE_SIZE] {
    let mut window = [0u8; INLINE_SIZE];
    window[..payload.len()].copy_from_slice(payload);
    window
}

/// Inline string: bytes up to the first zero, or the full window.
pub(crate) fn decode_inline_str(window: &[u8; INLINE_SIZE]) -> Result<String> {
    let end = window.iter().position(|&b| b == 0).unwrap_or(INLINE_SIZE);
    String::from_utf8(window[..end].to_vec()).map_err(|e| {
        StoreError::CorruptData(format!("inline string is not valid UTF-8: {e}")).into()
    })
}

/// Length-prefixed inline window for byte payloads (length 0…15).
pub(crate) fn encode_inline_bytes(payload: &[u8]) -> [u8; INLINE_SIZE] {
    let mut window = [0u8; INLINE_SIZE];
    window[0] = payload.len() as u8;
    window[1..1 + payload.len()].copy_from_slice(payload);
    window
}

pub(crate) fn decode_inline_bytes(window: &[u8; INLINE_SIZE]) -> Result<Vec<u8>> {
    let len = window[0] as usize;
    if len >= INLINE_SIZE {
        return Err(StoreError::CorruptData(format!(
            "inline byte vector claims length {len}"
        ))
        .into());
    }
    Ok(window[1..1 + len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_string_window_roundtrips() {
        let window = encode_inline_window(b"hello");

        assert_eq!(decode_inline_str(&window).unwrap(), "hello");
    }

    #[test]
    fn full_width_string_has_no_terminator() {
        let window = encode_inline_window(b"exactly16bytes!!");

        assert_eq!(decode_inline_str(&window).unwrap(), "exactly16bytes!!");
    }

    #[test]
    fn inline_bytes_window_roundtrips() {
        let payload = [1u8, 2, 3, 4, 5];
        let window = encode_inline_bytes(&payload);

        assert_eq!(decode_inline_bytes(&window).unwrap(), payload);
    }

    #[test]
    fn empty_inline_bytes_roundtrip() {
        let window = encode_inline_bytes(&[]);

        assert_eq!(decode_inline_bytes(&window).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn corrupt_inline_bytes_length_is_rejected() {
        let mut window = [0u8; INLINE_SIZE];
        window[0] = 16;

        let err = decode_inline_bytes(&window).unwrap_err();

        assert!(matches!(
            StoreError::from_report(&err),
            Some(StoreError::CorruptData(_))
        ));
    }

    #[test]
    fn placement_thresholds() {
        assert!(is_inline_key_len(16));
        assert!(!is_inline_key_len(17));
        assert!(is_inline_value_len(15));
        assert!(!is_inline_value_len(16));
        assert!(is_slot_len(256));
        assert!(!is_slot_len(257));
    }

    #[test]
    fn dir_entry_exposes_child_offset() {
        let entry = Entry::new_dir("sub".into(), 690);

        assert_eq!(entry.child_head_offset().unwrap(), 690);
    }
}
