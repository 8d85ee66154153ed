//! Bidirectional stream access over one cached block.
//!
//! [`RwStream`] keeps a single block in memory and tags it dirty on any
//! write, flushing before another block is cached and again at close. Writes
//! past the current payload extend it; reads past the current payload raise
//! end-of-stream. Opening an existing file validates the header and
//! immediately rewrites it unclean, so a crash mid-session is visible to
//! strict readers; a missing file is created empty.
//!
//! # Invariants
//! - `fill == min(block_size, size - number * block_size)` for the cached
//!   block
//! - `offset <= size` at all times
//! - The header on disk is unclean while the stream is open

use std::io;
use std::path::Path;

use crate::block_io::{BlockFile, CacheHint};
use crate::errors::StreamError;
use crate::serial::{Serial, Sink, Source};

use super::header::{StreamHeader, HEADER_AREA};
use super::BLOCK_SIZE;

/// Read/write stream with a dirty-tracked block cache.
#[derive(Debug)]
pub struct RwStream {
    file: BlockFile,
    block: Vec<u8>,
    block_size: usize,
    fill: usize,
    number: Option<u64>,
    dirty: bool,
    offset: u64,
    size: u64,
    open: bool,
}

impl RwStream {
    /// Opens `path` for combined reading and writing, creating it if absent.
    ///
    /// With `require_clean_close`, an existing file whose header is unclean
    /// is rejected; pass `false` to take over an interrupted stream.
    pub fn open(path: &Path, require_clean_close: bool) -> Result<Self, StreamError> {
        Self::open_with_block_size(path, require_clean_close, BLOCK_SIZE)
    }

    /// Opens with an explicit buffering block size.
    ///
    /// # Panics
    /// Panics if `block_size` is zero.
    pub fn open_with_block_size(
        path: &Path,
        require_clean_close: bool,
        block_size: usize,
    ) -> Result<Self, StreamError> {
        assert!(block_size > 0, "block size must be positive");
        let mut file = BlockFile::open_read_write(path, true, CacheHint::Sequential)?;
        let size = if file.len()? > 0 {
            let header = StreamHeader::read_from(&mut file)?;
            if require_clean_close {
                header.verify_clean()?;
            }
            header.payload_size
        } else {
            0
        };
        // Mark the file in-use; close restores the clean bit.
        StreamHeader {
            payload_size: size,
            clean_close: false,
        }
        .write_to(&mut file)?;
        Ok(Self {
            file,
            block: vec![0; block_size],
            block_size,
            fill: 0,
            number: None,
            dirty: false,
            offset: 0,
            size,
            open: true,
        })
    }

    /// Current read/write position within the payload.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Current payload size, including unflushed writes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// True if `bytes` more can be read at the current position.
    #[inline]
    #[must_use]
    pub fn can_read(&self, bytes: u64) -> bool {
        self.offset + bytes <= self.size
    }

    /// Serializes one item at the current position.
    pub fn serialize<T: Serial>(&mut self, item: &T) -> Result<(), StreamError> {
        debug_assert!(self.open, "serialize on closed stream");
        item.serialize(self).map_err(StreamError::from)
    }

    /// Reads one item at the current position.
    pub fn unserialize<T: Serial>(&mut self) -> Result<T, StreamError> {
        debug_assert!(self.open, "unserialize on closed stream");
        T::unserialize(self).map_err(StreamError::from_read)
    }

    /// Flushes the dirty block and rewrites the header cleanly closed.
    ///
    /// Idempotent; the destructor calls this if the caller did not.
    pub fn close(&mut self) -> Result<(), StreamError> {
        if !self.open {
            return Ok(());
        }
        self.flush_dirty()?;
        StreamHeader {
            payload_size: self.size,
            clean_close: true,
        }
        .write_to(&mut self.file)?;
        self.open = false;
        Ok(())
    }

    fn flush_dirty(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let number = self.number.expect("dirty block must be cached");
        self.file
            .seek(HEADER_AREA as u64 + number * self.block_size as u64)?;
        self.file.write_all(&self.block[..self.fill])?;
        self.dirty = false;
        Ok(())
    }

    fn cache_block(&mut self, number: u64) -> io::Result<()> {
        if self.number == Some(number) {
            return Ok(());
        }
        self.flush_dirty()?;
        let start = number * self.block_size as u64;
        let fill = self.size.saturating_sub(start).min(self.block_size as u64) as usize;
        if fill > 0 {
            self.file.seek(HEADER_AREA as u64 + start)?;
            self.file.read_exact(&mut self.block[..fill])?;
        }
        self.fill = fill;
        self.number = Some(number);
        Ok(())
    }
}

impl Sink for RwStream {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            let number = self.offset / self.block_size as u64;
            self.cache_block(number)?;
            let idx = (self.offset % self.block_size as u64) as usize;
            let take = rest.len().min(self.block_size - idx);
            self.block[idx..idx + take].copy_from_slice(&rest[..take]);
            rest = &rest[take..];
            self.fill = self.fill.max(idx + take);
            self.dirty = true;
            self.offset += take as u64;
            self.size = self.size.max(self.offset);
        }
        Ok(())
    }
}

impl Source for RwStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if self.offset + buf.len() as u64 > self.size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past stream payload",
            ));
        }
        let mut filled = 0;
        while filled < buf.len() {
            let number = self.offset / self.block_size as u64;
            self.cache_block(number)?;
            let idx = (self.offset % self.block_size as u64) as usize;
            let take = (buf.len() - filled).min(self.fill - idx);
            buf[filled..filled + take].copy_from_slice(&self.block[idx..idx + take]);
            filled += take;
            self.offset += take as u64;
        }
        Ok(())
    }
}

impl Drop for RwStream {
    fn drop(&mut self) {
        if self.open {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_reopen_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rw.bin");

        {
            let mut stream = RwStream::open_with_block_size(&path, true, 32).unwrap();
            for i in 0..20u64 {
                stream.serialize(&i).unwrap();
            }
            stream.close().unwrap();
        }

        let mut stream = RwStream::open_with_block_size(&path, true, 32).unwrap();
        assert_eq!(stream.size(), 160);
        for i in 0..20u64 {
            assert!(stream.can_read(8));
            assert_eq!(stream.unserialize::<u64>().unwrap(), i);
        }
        assert!(!stream.can_read(1));
    }

    #[test]
    fn read_past_size_is_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");

        let mut stream = RwStream::open(&path, true).unwrap();
        stream.serialize(&1u32).unwrap();
        stream.close().unwrap();

        let mut stream = RwStream::open(&path, true).unwrap();
        stream.unserialize::<u32>().unwrap();
        assert!(matches!(
            stream.unserialize::<u32>(),
            Err(StreamError::EndOfStream)
        ));
    }

    #[test]
    fn writes_extend_the_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extend.bin");

        {
            let mut stream = RwStream::open_with_block_size(&path, true, 16).unwrap();
            stream.serialize(&1u64).unwrap();
            stream.close().unwrap();
        }
        {
            // Read the existing item, then append past the old size.
            let mut stream = RwStream::open_with_block_size(&path, true, 16).unwrap();
            assert_eq!(stream.unserialize::<u64>().unwrap(), 1);
            stream.serialize(&2u64).unwrap();
            stream.serialize(&3u64).unwrap();
            assert_eq!(stream.size(), 24);
            stream.close().unwrap();
        }

        let mut stream = RwStream::open_with_block_size(&path, true, 16).unwrap();
        assert_eq!(stream.unserialize::<u64>().unwrap(), 1);
        assert_eq!(stream.unserialize::<u64>().unwrap(), 2);
        assert_eq!(stream.unserialize::<u64>().unwrap(), 3);
    }

    #[test]
    fn open_while_unclean_rejected_unless_lenient() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unclean.bin");

        let stream = RwStream::open(&path, true).unwrap();
        // Simulate a crash: the on-disk header is still unclean.
        std::mem::forget(stream);

        assert!(matches!(
            RwStream::open(&path, true),
            Err(StreamError::Format {
                detail: "Stream was not closed properly"
            })
        ));
        assert!(RwStream::open(&path, false).is_ok());
    }
}
