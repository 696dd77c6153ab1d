//! # Random-Access File Adapter
//!
//! The engine consumes files through the `RandomAccessFile` trait: absolute
//! seeks plus whole-buffer transfers at the current position. The contract
//! is deliberately strict:
//!
//! - `seek` fails when the target lies beyond the current end of file, so a
//!   corrupt stored offset cannot silently create a sparse hole.
//! - `read` and `write` transfer the entire buffer or fail; a short
//!   transfer is an error, never a truncated success.
//! - `seek_end` reports the file size and leaves the cursor at the end,
//!   which is how every allocator appends.
//!
//! `StdFile` is the production implementation over `std::fs::File`. The
//! trait seam exists so tests can interpose tracking or fault-injecting
//! wrappers without touching the allocators.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

use crate::error::StoreError;

pub trait RandomAccessFile: Send {
    /// Moves the cursor to an absolute offset; fails if `offset` exceeds
    /// the current file size.
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Moves the cursor to the end of the file and returns the file size.
    fn seek_end(&mut self) -> Result<u64>;

    /// Fills `buf` from the current position.
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Writes all of `buf` at the current position.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// File path, for diagnostics only.
    fn path(&self) -> &Path;
}

/// `RandomAccessFile` over a platform file handle.
pub struct StdFile {
    file: File,
    path: PathBuf,
    size: u64,
}

impl StdFile {
    /// Creates a new empty file; fails if the path already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to create file '{}'", path.display()))?;
        Ok(Self {
            file,
            path,
            size: 0,
        })
    }

    /// Opens an existing file for read/write access.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open file '{}'", path.display()))?;
        let size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();
        Ok(Self { file, path, size })
    }
}

impl RandomAccessFile for StdFile {
    fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.size {
            return Err(StoreError::InvalidOffset {
                offset,
                location: "seek past end of file",
            }
            .into());
        }
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(StoreError::Io)
            .wrap_err_with(|| format!("seek({}) in '{}'", offset, self.path.display()))?;
        Ok(())
    }

    fn seek_end(&mut self) -> Result<u64> {
        let size = self
            .file
            .seek(SeekFrom::End(0))
            .map_err(StoreError::Io)
            .wrap_err_with(|| format!("seek_end in '{}'", self.path.display()))?;
        self.size = size;
        Ok(size)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file
            .read_exact(buf)
            .map_err(StoreError::Io)
            .wrap_err_with(|| {
                format!(
                    "short read of {} bytes from '{}'",
                    buf.len(),
                    self.path.display()
                )
            })
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.file
            .write_all(buf)
            .map_err(StoreError::Io)
            .wrap_err_with(|| {
                format!(
                    "short write of {} bytes to '{}'",
                    buf.len(),
                    self.path.display()
                )
            })?;
        let pos = self
            .file
            .stream_position()
            .map_err(StoreError::Io)
            .wrap_err("stream_position after write")?;
        if pos > self.size {
            self.size = pos;
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads a little-endian u64 at an absolute offset, restoring nothing.
pub fn read_u64_at(file: &mut dyn RandomAccessFile, offset: u64) -> Result<u64> {
    let mut bytes = [0u8; 8];
    file.seek(offset)?;
    file.read(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

/// Writes a little-endian u64 at an absolute offset.
pub fn write_u64_at(file: &mut dyn RandomAccessFile, offset: u64, value: u64) -> Result<()> {
    file.seek(offset)?;
    file.write(&value.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> (StdFile, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let file = StdFile::create(dir.path().join(name)).unwrap();
        (file, dir)
    }

    #[test]
    fn create_rejects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        StdFile::create(&path).unwrap();

        assert!(StdFile::create(&path).is_err());
    }

    #[test]
    fn write_then_read_roundtrips() {
        let (mut file, _dir) = temp_file("rw");

        file.write(b"hello world").unwrap();
        file.seek(6).unwrap();
        let mut buf = [0u8; 5];
        file.read(&mut buf).unwrap();

        assert_eq!(&buf, b"world");
    }

    #[test]
    fn seek_past_end_is_rejected() {
        let (mut file, _dir) = temp_file("seek");
        file.write(&[0u8; 16]).unwrap();

        let err = file.seek(17).unwrap_err();

        assert!(matches!(
            StoreError::from_report(&err),
            Some(StoreError::InvalidOffset { .. })
        ));
        file.seek(16).unwrap();
    }

    #[test]
    fn short_read_is_an_error() {
        let (mut file, _dir) = temp_file("short");
        file.write(&[1u8; 4]).unwrap();
        file.seek(0).unwrap();

        let mut buf = [0u8; 8];
        assert!(file.read(&mut buf).is_err());
    }

    #[test]
    fn seek_end_reports_size() {
        let (mut file, _dir) = temp_file("size");
        file.write(&[0u8; 100]).unwrap();

        assert_eq!(file.seek_end().unwrap(), 100);
    }

    #[test]
    fn u64_at_helpers_roundtrip() {
        let (mut file, _dir) = temp_file("u64");
        file.write(&[0u8; 32]).unwrap();

        write_u64_at(&mut file, 8, 0xFEED_FACE_CAFE_BEEF).unwrap();

        assert_eq!(read_u64_at(&mut file, 8).unwrap(), 0xFEED_FACE_CAFE_BEEF);
    }
}
