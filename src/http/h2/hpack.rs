//! HPACK header compression
//!
//! Thin stateful wrappers over the `hpack` crate. Each direction of a
//! connection owns one dynamic table, so a connection keeps exactly one
//! [`HeaderEncoder`] and one [`HeaderDecoder`] for its whole life.
//!
//! The crate's encoder always indexes into a 4096-byte table and cannot be
//! resized. When the peer advertises a smaller SETTINGS_HEADER_TABLE_SIZE
//! the encoder empties the peer's table with a size update to zero and
//! sends every later field as a literal without indexing.

use super::error::{Error, Result};
use super::DEFAULT_HEADER_TABLE_SIZE;
use std::panic::{self, AssertUnwindSafe};

/// Header field as raw name/value bytes
pub type HeaderField = (Vec<u8>, Vec<u8>);

/// Dynamic table size update pattern (RFC 7541 Section 6.3)
const SIZE_UPDATE: u8 = 0x20;

/// Literal header field without indexing, new name (RFC 7541 Section 6.2.2)
const LITERAL_NOT_INDEXED: u8 = 0x00;

/// Encode an HPACK prefix integer
fn encode_integer(buf: &mut Vec<u8>, value: usize, prefix_bits: u8, pattern: u8) {
    let max = (1usize << prefix_bits) - 1;
    if value < max {
        buf.push(pattern | value as u8);
        return;
    }
    buf.push(pattern | max as u8);
    let mut remaining = value - max;
    while remaining >= 128 {
        buf.push(0x80 | (remaining & 0x7f) as u8);
        remaining >>= 7;
    }
    buf.push(remaining as u8);
}

/// Decode an HPACK prefix integer; `None` when truncated or oversized
fn decode_integer(buf: &[u8], prefix_bits: u8) -> Option<(usize, usize)> {
    let first = *buf.first()?;
    let max = (1usize << prefix_bits) - 1;
    let value = usize::from(first) & max;
    if value < max {
        return Some((value, 1));
    }
    let mut value = max;
    let mut shift = 0u32;
    for (i, &b) in buf[1..].iter().enumerate() {
        value = value.checked_add(usize::from(b & 0x7f).checked_shl(shift)?)?;
        if b & 0x80 == 0 {
            return Some((value, i + 2));
        }
        shift += 7;
        if shift > 28 {
            return None;
        }
    }
    None
}

fn encode_string(buf: &mut Vec<u8>, data: &[u8]) {
    encode_integer(buf, data.len(), 7, 0x00);
    buf.extend_from_slice(data);
}

/// Encoder for outbound header blocks
pub struct HeaderEncoder {
    inner: ::hpack::Encoder<'static>,
    /// The peer's table is smaller than the crate's; never index
    literal_only: bool,
    /// A size update to zero must open the next block
    pending_size_update: bool,
}

impl HeaderEncoder {
    pub fn new() -> Self {
        HeaderEncoder {
            inner: ::hpack::Encoder::new(),
            literal_only: false,
            pending_size_update: false,
        }
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE
    pub fn set_max_table_size(&mut self, size: u32) {
        if size < DEFAULT_HEADER_TABLE_SIZE && !self.literal_only {
            self.literal_only = true;
            self.pending_size_update = true;
        }
    }

    /// Encode one header block
    ///
    /// Blocks must reach the wire in the order they were encoded.
    pub fn encode<'a, I>(&mut self, fields: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        if self.literal_only {
            return Ok(self.encode_literals(fields));
        }

        let tuples: Vec<(&[u8], &[u8])> = fields
            .into_iter()
            .map(|(name, value)| (name.as_bytes(), value.as_bytes()))
            .collect();

        let mut block = Vec::new();
        self.inner
            .encode_into(tuples, &mut block)
            .map_err(|e| Error::Internal(format!("HPACK encode error: {}", e)))?;
        Ok(block)
    }

    fn encode_literals<'a, I>(&mut self, fields: I) -> Vec<u8>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut block = Vec::new();
        if self.pending_size_update {
            encode_integer(&mut block, 0, 5, SIZE_UPDATE);
            self.pending_size_update = false;
        }
        for (name, value) in fields {
            block.push(LITERAL_NOT_INDEXED);
            encode_string(&mut block, name.as_bytes());
            encode_string(&mut block, value.as_bytes());
        }
        block
    }
}

impl Default for HeaderEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder for inbound header blocks
pub struct HeaderDecoder {
    inner: ::hpack::Decoder<'static>,
    /// SETTINGS_HEADER_TABLE_SIZE advertised to the peer
    max_table_size: usize,
}

impl HeaderDecoder {
    pub fn new() -> Self {
        Self::with_max_table_size(DEFAULT_HEADER_TABLE_SIZE)
    }

    pub fn with_max_table_size(size: u32) -> Self {
        HeaderDecoder {
            inner: ::hpack::Decoder::new(),
            max_table_size: size as usize,
        }
    }

    /// Decode one complete header block; failure leaves the dynamic table
    /// unusable and is always a connection error
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>> {
        self.check_size_updates(block)?;

        // The crate panics on some malformed integers
        let inner = &mut self.inner;
        match panic::catch_unwind(AssertUnwindSafe(|| inner.decode(block))) {
            Ok(Ok(fields)) => Ok(fields),
            Ok(Err(e)) => Err(Error::Compression(format!("HPACK decode error: {:?}", e))),
            Err(_) => Err(Error::Compression("HPACK decode error: malformed block".to_string())),
        }
    }

    /// Size updates may only open a block and never exceed the advertised size
    fn check_size_updates(&self, block: &[u8]) -> Result<()> {
        let mut rest = block;
        while let Some(&first) = rest.first() {
            if first & 0xe0 != SIZE_UPDATE {
                break;
            }
            let (size, used) = decode_integer(rest, 5).ok_or_else(|| {
                Error::Compression("HPACK decode error: truncated table size update".to_string())
            })?;
            if size > self.max_table_size {
                return Err(Error::Compression(format!(
                    "HPACK decode error: table size update {} above {}",
                    size, self.max_table_size
                )));
            }
            rest = &rest[used..];
        }
        Ok(())
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new()
    }
}
