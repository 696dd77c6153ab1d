//! Little-endian cursor codec over contiguous byte slices.

mod buffer;

pub use buffer::{ByteReader, ByteWriter};
