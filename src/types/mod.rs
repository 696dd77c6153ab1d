//! Runtime value and directory-entry types shared across the engine.

mod value;

pub use value::{DirEntry, EntryKind, Value};
