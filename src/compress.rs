//! Payload compression for large batches
//!
//! LZ4 block format with the uncompressed length prepended. Payloads under
//! the threshold, or that do not shrink, are passed through untouched.

use crate::error::{Result, ShipError};
use bytes::Bytes;

/// Content coding of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Lz4,
}

impl Encoding {
    /// Value for the `Content-Encoding` header, if any
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            Self::Identity => None,
            Self::Lz4 => Some("lz4"),
        }
    }
}

/// A payload ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compressed {
    pub encoding: Encoding,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    threshold: usize,
}

impl Compressor {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn compress(&self, input: &[u8]) -> Compressed {
        if input.len() < self.threshold {
            return Self::identity(input);
        }
        let packed = lz4_flex::compress_prepend_size(input);
        if packed.len() >= input.len() {
            return Self::identity(input);
        }
        Compressed {
            encoding: Encoding::Lz4,
            bytes: Bytes::from(packed),
        }
    }

    pub fn decompress(&self, payload: &Compressed) -> Result<Vec<u8>> {
        match payload.encoding {
            Encoding::Identity => Ok(payload.bytes.to_vec()),
            Encoding::Lz4 => lz4_flex::decompress_size_prepended(&payload.bytes).map_err(|e| {
                ShipError::Decompress {
                    reason: e.to_string(),
                }
            }),
        }
    }

    pub fn decompress_to_string(&self, payload: &Compressed) -> Result<String> {
        let raw = self.decompress(payload)?;
        String::from_utf8(raw).map_err(|e| ShipError::Decompress {
            reason: e.to_string(),
        })
    }

    fn identity(input: &[u8]) -> Compressed {
        Compressed {
            encoding: Encoding::Identity,
            bytes: Bytes::copy_from_slice(input),
        }
    }
}
