//! # Bounds-Checked Binary Cursors
//!
//! `ByteReader` and `ByteWriter` are thin views over a byte slice used to
//! decode and encode every on-disk record in the engine: file headers are
//! handled by zerocopy structs, but entry records and skip-list nodes
//! interleave fixed and variable content and are assembled field by field
//! through these cursors.
//!
//! All multi-byte integers are little-endian. Floats travel as the raw
//! little-endian bit pattern of their IEEE-754 representation; no textual
//! or normalized form is ever produced.
//!
//! Every operation checks the remaining window first and fails with
//! `StoreError::OutOfRange` before touching the slice, so a failed call has
//! no partial effect on the cursor position.
//!
//! ## Usage
//!
//! ```
//! use grovekv::encoding::{ByteReader, ByteWriter};
//!
//! let mut buf = [0u8; 12];
//! let mut out = ByteWriter::new(&mut buf);
//! out.write_u32(0xDEAD_BEEF).unwrap();
//! out.write_u64(42).unwrap();
//!
//! let mut input = ByteReader::new(&buf);
//! assert_eq!(input.read_u32().unwrap(), 0xDEAD_BEEF);
//! assert_eq!(input.read_u64().unwrap(), 42);
//! ```

use eyre::Result;

use crate::error::StoreError;

fn out_of_range(op: &'static str, requested: usize, available: usize) -> eyre::Report {
    StoreError::OutOfRange {
        op,
        requested,
        available,
    }
    .into()
}

/// Read cursor over an immutable byte slice.
pub struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(out_of_range("read", n, self.buf.len()));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes(bytes.try_into().expect("2-byte slice")))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take(N)?;
        Ok(bytes.try_into().expect("N-byte slice"))
    }

    /// Fills `out` entirely from the cursor.
    pub fn read_into(&mut self, out: &mut [u8]) -> Result<()> {
        let bytes = self.take(out.len())?;
        out.copy_from_slice(bytes);
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if n > self.buf.len() {
            return Err(out_of_range("skip", n, self.buf.len()));
        }
        self.buf = &self.buf[n..];
        Ok(())
    }
}

/// Write cursor over a mutable byte slice.
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes still writable.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn claim(&mut self, n: usize) -> Result<&mut [u8]> {
        if n > self.remaining() {
            return Err(out_of_range("write", n, self.remaining()));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&mut self.buf[start..start + n])
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.claim(1)?[0] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.claim(2)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.claim(4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.claim(8)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_u32(value.to_bits())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_u64(value.to_bits())
    }

    pub fn write_array<const N: usize>(&mut self, value: &[u8; N]) -> Result<()> {
        self.claim(N)?.copy_from_slice(value);
        Ok(())
    }

    pub fn write_from(&mut self, src: &[u8]) -> Result<()> {
        self.claim(src.len())?.copy_from_slice(src);
        Ok(())
    }

    /// Writes `n` zero bytes.
    pub fn fill(&mut self, n: usize) -> Result<()> {
        self.claim(n)?.fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn unsigned_roundtrip_all_widths() {
        let mut buf = [0u8; 15];
        let mut out = ByteWriter::new(&mut buf);
        out.write_u8(0xAB).unwrap();
        out.write_u16(0xCDEF).unwrap();
        out.write_u32(0x0123_4567).unwrap();
        out.write_u64(0x89AB_CDEF_0123_4567).unwrap();
        assert_eq!(out.remaining(), 0);

        let mut input = ByteReader::new(&buf);
        assert_eq!(input.read_u8().unwrap(), 0xAB);
        assert_eq!(input.read_u16().unwrap(), 0xCDEF);
        assert_eq!(input.read_u32().unwrap(), 0x0123_4567);
        assert_eq!(input.read_u64().unwrap(), 0x89AB_CDEF_0123_4567);
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn encoding_is_little_endian() {
        let mut buf = [0u8; 4];
        ByteWriter::new(&mut buf).write_u32(0x0102_0304).unwrap();

        assert_eq!(buf, [0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn floats_roundtrip_bit_exact() {
        let mut buf = [0u8; 12];
        let mut out = ByteWriter::new(&mut buf);
        out.write_f32(5.0).unwrap();
        out.write_f64(-6.25).unwrap();

        let mut input = ByteReader::new(&buf);
        assert_eq!(input.read_f32().unwrap(), 5.0);
        assert_eq!(input.read_f64().unwrap(), -6.25);
    }

    #[test]
    fn nan_bit_pattern_is_preserved() {
        let pattern = 0x7FC0_DEAD_u32;
        let mut buf = [0u8; 4];
        ByteWriter::new(&mut buf)
            .write_f32(f32::from_bits(pattern))
            .unwrap();

        let got = ByteReader::new(&buf).read_f32().unwrap();

        assert_eq!(got.to_bits(), pattern);
    }

    #[test]
    fn read_past_end_fails_without_consuming() {
        let buf = [1u8, 2, 3];
        let mut input = ByteReader::new(&buf);

        let err = input.read_u32().unwrap_err();

        assert!(matches!(
            StoreError::from_report(&err),
            Some(StoreError::OutOfRange { .. })
        ));
        assert_eq!(input.remaining(), 3);
        assert_eq!(input.read_u16().unwrap(), 0x0201);
    }

    #[test]
    fn write_past_end_fails_without_consuming() {
        let mut buf = [0u8; 3];
        let mut out = ByteWriter::new(&mut buf);

        let err = out.write_u64(1).unwrap_err();

        assert!(matches!(
            StoreError::from_report(&err),
            Some(StoreError::OutOfRange { .. })
        ));
        assert_eq!(out.remaining(), 3);
    }

    #[test]
    fn skip_and_fill_move_cursors() {
        let mut buf = [0xFFu8; 8];
        let mut out = ByteWriter::new(&mut buf);
        out.fill(4).unwrap();
        out.write_u32(7).unwrap();

        let mut input = ByteReader::new(&buf);
        input.skip(4).unwrap();
        assert_eq!(input.read_u32().unwrap(), 7);
    }

    #[test]
    fn read_into_and_array_roundtrip() {
        let buf = [9u8, 8, 7, 6, 5];
        let mut input = ByteReader::new(&buf);

        let head: [u8; 2] = input.read_array().unwrap();
        let mut tail = [0u8; 3];
        input.read_into(&mut tail).unwrap();

        assert_eq!(head, [9, 8]);
        assert_eq!(tail, [7, 6, 5]);
    }
}
