//! Append-only stream writer.
//!
//! The writer opens with a header marked unclean, buffers serialized bytes
//! into one block, and flushes full blocks behind the header area. Closing
//! flushes the short final block and rewrites the header with the true
//! payload size and the clean-close bit set. A writer dropped without a
//! close leaves the unclean header in place, which strict readers reject.

use std::io;
use std::path::Path;

use crate::block_io::{BlockFile, CacheHint};
use crate::errors::StreamError;
use crate::serial::{Serial, Sink};

use super::header::{StreamHeader, HEADER_AREA};
use super::BLOCK_SIZE;

/// Block-buffered append-only stream writer.
#[derive(Debug)]
pub struct StreamWriter {
    file: BlockFile,
    block: Vec<u8>,
    block_size: usize,
    blocks_written: u64,
    payload: u64,
    open: bool,
}

impl StreamWriter {
    /// Creates a stream file at `path` with the default block size.
    pub fn create(path: &Path) -> Result<Self, StreamError> {
        Self::create_with_block_size(path, BLOCK_SIZE)
    }

    /// Creates a stream file with an explicit block size.
    ///
    /// The block size tunes buffering only; readers may use a different one.
    ///
    /// # Panics
    /// Panics if `block_size` is zero.
    pub fn create_with_block_size(path: &Path, block_size: usize) -> Result<Self, StreamError> {
        assert!(block_size > 0, "block size must be positive");
        let mut file = BlockFile::open_write(path, CacheHint::Sequential)?;
        StreamHeader::new().write_to(&mut file)?;
        Ok(Self {
            file,
            block: Vec::with_capacity(block_size),
            block_size,
            blocks_written: 0,
            payload: 0,
            open: true,
        })
    }

    /// Serializes one item into the stream.
    pub fn serialize<T: Serial>(&mut self, item: &T) -> Result<(), StreamError> {
        debug_assert!(self.open, "serialize on closed writer");
        item.serialize(self).map_err(StreamError::from)
    }

    /// Payload bytes accepted so far, including the buffered block.
    #[inline]
    #[must_use]
    pub fn payload_size(&self) -> u64 {
        self.payload + self.block.len() as u64
    }

    /// Total file bytes once closed: header area plus payload.
    #[inline]
    #[must_use]
    pub fn file_size(&self) -> u64 {
        HEADER_AREA as u64 + self.payload_size()
    }

    /// Flushes the buffered block and rewrites the header as cleanly closed.
    ///
    /// Idempotent; the destructor calls this if the caller did not.
    pub fn close(&mut self) -> Result<(), StreamError> {
        if !self.open {
            return Ok(());
        }
        if !self.block.is_empty() {
            self.flush_block()?;
        }
        let header = StreamHeader {
            payload_size: self.payload,
            clean_close: true,
        };
        header.write_to(&mut self.file)?;
        self.open = false;
        Ok(())
    }

    fn flush_block(&mut self) -> io::Result<()> {
        debug_assert!(self.block.len() <= self.block_size);
        let offset = HEADER_AREA as u64 + self.blocks_written * self.block_size as u64;
        self.file.seek(offset)?;
        self.file.write_all(&self.block)?;
        self.blocks_written += 1;
        self.payload += self.block.len() as u64;
        self.block.clear();
        Ok(())
    }
}

impl Sink for StreamWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            let room = self.block_size - self.block.len();
            let take = rest.len().min(room);
            self.block.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.block.len() == self.block_size {
                self.flush_block()?;
            }
        }
        Ok(())
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if self.open {
            let _ = self.close();
        }
    }
}
