//! Stream file header.
//!
//! Every stream file starts with a fixed header area: the packed header
//! fields followed by `0x42` padding up to a 4096-byte boundary. The payload
//! begins immediately after the header area.
//!
//! # Field layout
//! Little-endian, packed:
//! - `magic` (u64)
//! - `version` (u64)
//! - `payload_size` (u64)
//! - `clean_close` (u8): 1 iff the producer closed the stream cleanly

use crate::block_io::BlockFile;
use crate::errors::StreamError;

/// Magic constant identifying a stream file.
pub const STREAM_MAGIC: u64 = 0xfa34_0f49_edba_da67;

/// Current stream format version.
pub const STREAM_VERSION: u64 = 1;

/// Bytes the header area occupies on disk; the payload starts here.
pub const HEADER_AREA: usize = 4096;

/// Packed size of the encoded header fields.
const ENCODED_LEN: usize = 8 + 8 + 8 + 1;

/// Filler for the unused remainder of the header area.
const PADDING_BYTE: u8 = 0x42;

const _: () = assert!(ENCODED_LEN <= HEADER_AREA);

/// Decoded stream header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    /// Total payload bytes following the header area.
    pub payload_size: u64,
    /// Whether the producer flushed everything and rewrote the header.
    pub clean_close: bool,
}

impl StreamHeader {
    /// Creates a header for a freshly opened stream.
    #[must_use]
    pub fn new() -> Self {
        Self {
            payload_size: 0,
            clean_close: false,
        }
    }

    /// Encodes the full header area, padding included.
    #[must_use]
    pub fn encode_area(&self) -> Box<[u8; HEADER_AREA]> {
        let mut area = Box::new([PADDING_BYTE; HEADER_AREA]);
        area[0..8].copy_from_slice(&STREAM_MAGIC.to_le_bytes());
        area[8..16].copy_from_slice(&STREAM_VERSION.to_le_bytes());
        area[16..24].copy_from_slice(&self.payload_size.to_le_bytes());
        area[24] = u8::from(self.clean_close);
        area
    }

    /// Decodes and validates header fields.
    ///
    /// # Errors
    /// Returns `StreamError::Format` when the magic, version, or clean-close
    /// byte is invalid. A clean-close byte of 0 is valid here; strictness
    /// about unclean streams belongs to the reader.
    pub fn decode(bytes: &[u8]) -> Result<Self, StreamError> {
        if bytes.len() < ENCODED_LEN {
            return Err(StreamError::Format {
                detail: "Stream header truncated",
            });
        }
        let magic = u64::from_le_bytes(bytes[0..8].try_into().expect("8-byte slice"));
        if magic != STREAM_MAGIC {
            return Err(StreamError::Format {
                detail: "Bad header magic",
            });
        }
        let version = u64::from_le_bytes(bytes[8..16].try_into().expect("8-byte slice"));
        if version < STREAM_VERSION {
            return Err(StreamError::Format {
                detail: "Stream version too old",
            });
        }
        if version > STREAM_VERSION {
            return Err(StreamError::Format {
                detail: "Stream version too new",
            });
        }
        let payload_size = u64::from_le_bytes(bytes[16..24].try_into().expect("8-byte slice"));
        let clean_close = match bytes[24] {
            0 => false,
            1 => true,
            _ => {
                return Err(StreamError::Format {
                    detail: "Bad clean-close byte",
                })
            }
        };
        Ok(Self {
            payload_size,
            clean_close,
        })
    }

    /// Fails unless the stream was closed cleanly.
    pub fn verify_clean(&self) -> Result<(), StreamError> {
        if self.clean_close {
            Ok(())
        } else {
            Err(StreamError::Format {
                detail: "Stream was not closed properly",
            })
        }
    }

    /// Reads and validates the header from the start of `file`.
    pub fn read_from(file: &mut BlockFile) -> Result<Self, StreamError> {
        let mut bytes = [0u8; ENCODED_LEN];
        file.seek(0)?;
        file.read_exact(&mut bytes)
            .map_err(StreamError::from_read)?;
        Self::decode(&bytes)
    }

    /// Writes the full header area to the start of `file`.
    pub fn write_to(&self, file: &mut BlockFile) -> Result<(), StreamError> {
        file.seek(0)?;
        file.write_all(self.encode_area().as_slice())?;
        Ok(())
    }
}

impl Default for StreamHeader {
    fn default() -> Self {
        Self::new()
    }
}
