//! Chunked transfer encoding support
//!
//! This module provides encoding and decoding for HTTP chunked transfer encoding.
//! The encoder frames response flushes; the decoder is driven by the request
//! parser with whatever bytes the transport delivered.

use super::{Error, Result, CRLF};
use std::io::Write;

/// Maximum length of a chunk-size line (size plus extensions)
const MAX_CHUNK_LINE: usize = 4096;

/// Chunked encoder
///
/// Encodes data in HTTP chunked transfer encoding format
pub struct ChunkedEncoder<W: Write> {
    writer: W,
}

impl<W: Write> ChunkedEncoder<W> {
    /// Create a new chunked encoder
    pub fn new(writer: W) -> Self {
        ChunkedEncoder { writer }
    }

    /// Write a chunk of data; empty chunks are skipped since they would end the body
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        write!(self.writer, "{:X}{}", data.len(), CRLF)?;
        self.writer.write_all(data)?;
        self.writer.write_all(CRLF.as_bytes())?;

        Ok(())
    }

    /// Write the final chunk (0-sized chunk)
    pub fn finish(&mut self) -> Result<()> {
        write!(self.writer, "0{}{}", CRLF, CRLF)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Consume the encoder and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Chunked decoder
///
/// Decodes HTTP chunked transfer encoding format. Every byte handed to
/// [`ChunkedDecoder::decode`] is consumed; partial size lines are buffered
/// internally.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecoderState,
    chunk_size: usize,
    chunk_read: usize,
    line: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData,
    ChunkEnd,
    Trailer,
    Complete,
}

impl ChunkedDecoder {
    /// Create a new chunked decoder
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            chunk_size: 0,
            chunk_read: 0,
            line: Vec::new(),
        }
    }

    /// Decode input, appending chunk data to `output`
    ///
    /// Returns the number of input bytes consumed. Bytes past the end of the
    /// encoded body are left unconsumed.
    pub fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<usize> {
        let mut pos = 0;

        while pos < input.len() {
            match self.state {
                DecoderState::ChunkSize => {
                    let Some(line) = self.take_line(input, &mut pos)? else {
                        break;
                    };
                    let size_str = line.split(';').next().unwrap_or_default().trim();
                    self.chunk_size = usize::from_str_radix(size_str, 16)
                        .map_err(|_| Error::InvalidChunkSize(size_str.to_string()))?;
                    self.chunk_read = 0;
                    self.state = if self.chunk_size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::ChunkData
                    };
                }

                DecoderState::ChunkData => {
                    let remaining = self.chunk_size - self.chunk_read;
                    let to_copy = remaining.min(input.len() - pos);
                    output.extend_from_slice(&input[pos..pos + to_copy]);
                    pos += to_copy;
                    self.chunk_read += to_copy;

                    if self.chunk_read == self.chunk_size {
                        self.state = DecoderState::ChunkEnd;
                    }
                }

                DecoderState::ChunkEnd => {
                    let Some(line) = self.take_line(input, &mut pos)? else {
                        break;
                    };
                    if !line.is_empty() {
                        return Err(Error::Protocol("Expected CRLF after chunk".to_string()));
                    }
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    // Trailer headers are skipped up to the empty line
                    let Some(line) = self.take_line(input, &mut pos)? else {
                        break;
                    };
                    if line.is_empty() {
                        self.state = DecoderState::Complete;
                    }
                }

                DecoderState::Complete => break,
            }
        }

        Ok(pos)
    }

    /// Accumulate one line, accepting CRLF or bare LF endings
    fn take_line(&mut self, input: &[u8], pos: &mut usize) -> Result<Option<String>> {
        match input[*pos..].iter().position(|&b| b == b'\n') {
            Some(offset) => {
                self.line.extend_from_slice(&input[*pos..*pos + offset]);
                *pos += offset + 1;
                if self.line.last() == Some(&b'\r') {
                    self.line.pop();
                }
                let line = String::from_utf8_lossy(&self.line).into_owned();
                self.line.clear();
                Ok(Some(line))
            }
            None => {
                self.line.extend_from_slice(&input[*pos..]);
                *pos = input.len();
                if self.line.len() > MAX_CHUNK_LINE {
                    return Err(Error::InvalidChunkSize("chunk line too long".to_string()));
                }
                Ok(None)
            }
        }
    }

    /// Check if decoding is complete
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }

    /// Reset the decoder for reuse
    pub fn reset(&mut self) {
        self.state = DecoderState::ChunkSize;
        self.chunk_size = 0;
        self.chunk_read = 0;
        self.line.clear();
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode complete chunked body from bytes
pub fn decode_chunked_body(input: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ChunkedDecoder::new();
    let mut output = Vec::new();
    decoder.decode(input, &mut output)?;

    if !decoder.is_complete() {
        return Err(Error::Protocol("Incomplete chunked body".to_string()));
    }

    Ok(output)
}

/// Encode data as chunked body
pub fn encode_chunked_body(data: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    let mut encoder = ChunkedEncoder::new(&mut output);

    for chunk in data.chunks(chunk_size) {
        encoder.write_chunk(chunk)?;
    }

    encoder.finish()?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_two_flushes() {
        let mut output = Vec::new();
        let mut encoder = ChunkedEncoder::new(&mut output);

        encoder.write_chunk(b"A").unwrap();
        encoder.write_chunk(b"BC").unwrap();
        encoder.finish().unwrap();

        assert_eq!(output, b"1\r\nA\r\n2\r\nBC\r\n0\r\n\r\n");
    }

    #[test]
    fn test_encode_uppercase_hex() {
        let data = vec![b'x'; 255];
        let mut output = Vec::new();
        ChunkedEncoder::new(&mut output).write_chunk(&data).unwrap();
        assert!(output.starts_with(b"FF\r\n"));
    }

    #[test]
    fn test_empty_chunks_ignored() {
        let mut output = Vec::new();
        let mut encoder = ChunkedEncoder::new(&mut output);

        encoder.write_chunk(b"").unwrap();
        encoder.write_chunk(b"Hello").unwrap();
        encoder.write_chunk(b"").unwrap();
        encoder.finish().unwrap();

        assert_eq!(output, b"5\r\nHello\r\n0\r\n\r\n");
    }

    #[test]
    fn test_decode_multiple_chunks() {
        let input = b"5\r\nHello\r\n5\r\nWorld\r\n0\r\n\r\n";
        let output = decode_chunked_body(input).unwrap();
        assert_eq!(output, b"HelloWorld");
    }

    #[test]
    fn test_decode_with_extension_and_trailer() {
        let input = b"5;extension=value\r\nHello\r\n0\r\nX-Trailer: yes\r\n\r\n";
        let output = decode_chunked_body(input).unwrap();
        assert_eq!(output, b"Hello");
    }

    #[test]
    fn test_decode_bare_lf() {
        let output = decode_chunked_body(b"3\nabc\n0\n\n").unwrap();
        assert_eq!(output, b"abc");
    }

    #[test]
    fn test_decode_byte_at_a_time() {
        let input = b"A\r\n0123456789\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();
        let mut output = Vec::new();

        for byte in input.iter() {
            assert_eq!(decoder.decode(std::slice::from_ref(byte), &mut output).unwrap(), 1);
        }

        assert!(decoder.is_complete());
        assert_eq!(output, b"0123456789");
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let input = b"1\r\nA\r\n0\r\n\r\nGET /";
        let mut decoder = ChunkedDecoder::new();
        let mut output = Vec::new();
        let consumed = decoder.decode(input, &mut output).unwrap();
        assert_eq!(&input[consumed..], b"GET /");
    }

    #[test]
    fn test_invalid_chunk_size() {
        assert!(matches!(
            decode_chunked_body(b"zz\r\n"),
            Err(Error::InvalidChunkSize(_))
        ));
    }

    #[test]
    fn test_encode_chunked_body_helper() {
        let data = b"Hello, World!";
        let output = encode_chunked_body(data, 5).unwrap();
        assert_eq!(decode_chunked_body(&output).unwrap(), data);
    }
}
