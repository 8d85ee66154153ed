//! Sequential stream reader.
//!
//! The reader validates the header on open, memorizes the payload size, and
//! serves reads out of one buffered block, fetching the next block (full or
//! the short final one) on underflow. `can_read` is the payload-size
//! predicate: true iff the consumed offset is strictly below the header's
//! payload size. Reading past the payload raises end-of-stream.

use std::io;
use std::path::Path;

use crate::block_io::{BlockFile, CacheHint};
use crate::errors::StreamError;
use crate::serial::{Serial, Source};

use super::header::{StreamHeader, HEADER_AREA};
use super::BLOCK_SIZE;

/// Block-buffered sequential stream reader.
#[derive(Debug)]
pub struct StreamReader {
    file: BlockFile,
    payload: u64,
    block: Vec<u8>,
    block_size: usize,
    next_block: u64,
    pos: usize,
    consumed: u64,
}

impl StreamReader {
    /// Opens a stream, rejecting files that were not closed cleanly.
    pub fn open(path: &Path) -> Result<Self, StreamError> {
        Self::open_inner(path, BLOCK_SIZE, true)
    }

    /// Opens a stream without requiring a clean close.
    ///
    /// Useful for inspecting the salvageable prefix of an interrupted
    /// stream; the header's payload size still bounds all reads.
    pub fn open_lenient(path: &Path) -> Result<Self, StreamError> {
        Self::open_inner(path, BLOCK_SIZE, false)
    }

    /// Opens a stream with an explicit buffering block size.
    pub fn open_with_block_size(path: &Path, block_size: usize) -> Result<Self, StreamError> {
        Self::open_inner(path, block_size, true)
    }

    fn open_inner(
        path: &Path,
        block_size: usize,
        require_clean_close: bool,
    ) -> Result<Self, StreamError> {
        assert!(block_size > 0, "block size must be positive");
        let mut file = BlockFile::open_read(path, CacheHint::Sequential)?;
        let header = StreamHeader::read_from(&mut file)?;
        if require_clean_close {
            header.verify_clean()?;
        }
        Ok(Self {
            file,
            payload: header.payload_size,
            block: Vec::with_capacity(block_size),
            block_size,
            next_block: 0,
            pos: 0,
            consumed: 0,
        })
    }

    /// True while payload bytes remain.
    #[inline]
    #[must_use]
    pub fn can_read(&self) -> bool {
        self.consumed < self.payload
    }

    /// Payload bytes consumed so far.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.consumed
    }

    /// Total payload bytes recorded in the header.
    #[inline]
    #[must_use]
    pub fn payload_size(&self) -> u64 {
        self.payload
    }

    /// Reads one item from the stream.
    ///
    /// # Errors
    /// `StreamError::EndOfStream` if the item's encoding would extend past
    /// the payload; `StreamError::Io` on underlying failures.
    pub fn unserialize<T: Serial>(&mut self) -> Result<T, StreamError> {
        T::unserialize(self).map_err(StreamError::from_read)
    }

    fn fetch_next_block(&mut self) -> io::Result<()> {
        let from = self.next_block * self.block_size as u64;
        debug_assert!(from < self.payload, "fetch past payload");
        let fill = (self.payload - from).min(self.block_size as u64) as usize;
        self.block.resize(fill, 0);
        self.file.seek(HEADER_AREA as u64 + from)?;
        self.file.read_exact(&mut self.block)?;
        self.next_block += 1;
        self.pos = 0;
        Ok(())
    }
}

impl Source for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if self.consumed + buf.len() as u64 > self.payload {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past stream payload",
            ));
        }
        let mut filled = 0;
        while filled < buf.len() {
            if self.pos == self.block.len() {
                self.fetch_next_block()?;
            }
            let take = (buf.len() - filled).min(self.block.len() - self.pos);
            buf[filled..filled + take].copy_from_slice(&self.block[self.pos..self.pos + take]);
            self.pos += take;
            filled += take;
        }
        self.consumed += buf.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamWriter;

    fn write_items(path: &Path, block_size: usize, items: &[u64]) {
        let mut writer = StreamWriter::create_with_block_size(path, block_size).unwrap();
        for item in items {
            writer.serialize(item).unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn reads_across_short_final_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.bin");
        let items: Vec<u64> = (0..50).collect();
        // 48-byte blocks: 6 items each, final block short.
        write_items(&path, 48, &items);

        let mut reader = StreamReader::open_with_block_size(&path, 48).unwrap();
        for expected in &items {
            assert!(reader.can_read());
            assert_eq!(reader.unserialize::<u64>().unwrap(), *expected);
        }
        assert!(!reader.can_read());
        assert_eq!(reader.offset(), reader.payload_size());
    }

    #[test]
    fn reader_block_size_independent_of_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.bin");
        let items: Vec<u64> = (0..100).collect();
        write_items(&path, 64, &items);

        let mut reader = StreamReader::open_with_block_size(&path, 24).unwrap();
        for expected in &items {
            assert_eq!(reader.unserialize::<u64>().unwrap(), *expected);
        }
    }

    #[test]
    fn read_past_payload_is_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eos.bin");
        write_items(&path, 4096, &[1, 2]);

        let mut reader = StreamReader::open(&path).unwrap();
        reader.unserialize::<u64>().unwrap();
        reader.unserialize::<u64>().unwrap();
        assert!(!reader.can_read());
        assert!(matches!(
            reader.unserialize::<u64>(),
            Err(StreamError::EndOfStream)
        ));
    }

    #[test]
    fn empty_stream_reads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        write_items(&path, 4096, &[]);

        let reader = StreamReader::open(&path).unwrap();
        assert!(!reader.can_read());
        assert_eq!(reader.payload_size(), 0);
    }
}
