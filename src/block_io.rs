//! Positioned block file access.
//!
//! [`BlockFile`] is the lowest layer of the stream stack: blocking,
//! positioned reads and writes over a plain file, with a cache hint the
//! implementation may forward to the OS. All positions are 64-bit byte
//! offsets. Failures surface as `io::Error` with the OS error code attached;
//! the stream layer wraps them.
//!
//! # Scope
//! - No buffering; callers move whole blocks.
//! - No concurrency; one accessor owns one descriptor.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Access-pattern hint forwarded to the OS page cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheHint {
    /// Data will be read or written front to back.
    Sequential,
    /// No particular access pattern.
    Normal,
}

/// Blocking positioned file accessor.
#[derive(Debug)]
pub struct BlockFile {
    file: File,
}

impl BlockFile {
    /// Opens an existing file for reading.
    pub fn open_read(path: &Path, hint: CacheHint) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let accessor = Self { file };
        accessor.apply_hint(hint);
        Ok(accessor)
    }

    /// Creates (or truncates) a file for writing.
    pub fn open_write(path: &Path, hint: CacheHint) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let accessor = Self { file };
        accessor.apply_hint(hint);
        Ok(accessor)
    }

    /// Opens a file for reading and writing.
    ///
    /// With `create_if_missing`, a missing file is created empty; callers can
    /// distinguish the two cases through [`BlockFile::len`].
    pub fn open_read_write(
        path: &Path,
        create_if_missing: bool,
        hint: CacheHint,
    ) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create_if_missing)
            .open(path)?;
        let accessor = Self { file };
        accessor.apply_hint(hint);
        Ok(accessor)
    }

    /// Moves the file cursor to an absolute byte offset.
    pub fn seek(&mut self, offset: u64) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Reads exactly `buf.len()` bytes at the current position.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.file.read_exact(buf)
    }

    /// Writes all of `buf` at the current position.
    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.file.write_all(buf)
    }

    /// Current file length in bytes.
    pub fn len(&self) -> std::io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Closes the file, releasing the descriptor.
    ///
    /// Dropping the accessor closes it as well; this form exists for callers
    /// that want the close to be a visible lifecycle point.
    pub fn close(self) {
        drop(self);
    }

    #[cfg(target_os = "linux")]
    fn apply_hint(&self, hint: CacheHint) {
        use std::os::unix::io::AsRawFd;

        let advice = match hint {
            CacheHint::Sequential => libc::POSIX_FADV_SEQUENTIAL,
            CacheHint::Normal => libc::POSIX_FADV_NORMAL,
        };
        // Advisory only; a failure here changes nothing about correctness.
        unsafe {
            libc::posix_fadvise(self.file.as_raw_fd(), 0, 0, advice);
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn apply_hint(&self, _hint: CacheHint) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.bin");

        let mut w = BlockFile::open_write(&path, CacheHint::Sequential).unwrap();
        w.write_all(b"0123456789").unwrap();
        w.close();

        let mut r = BlockFile::open_read(&path, CacheHint::Normal).unwrap();
        r.seek(4).unwrap();
        let mut buf = [0u8; 3];
        r.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"456");
        assert_eq!(r.len().unwrap(), 10);
    }

    #[test]
    fn open_read_missing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.bin");
        assert!(BlockFile::open_read(&path, CacheHint::Normal).is_err());
    }

    #[test]
    fn open_read_write_creates_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rw.bin");

        assert!(BlockFile::open_read_write(&path, false, CacheHint::Normal).is_err());
        let f = BlockFile::open_read_write(&path, true, CacheHint::Normal).unwrap();
        assert_eq!(f.len().unwrap(), 0);
    }
}
