//! HTTP/2 frame encoding and decoding
//!
//! Frames are written as a 9-byte header (24-bit length, type, flags,
//! 31-bit stream id) followed by the payload. Readers accept any frame up to
//! the advertised local maximum and silently skip frame types they do not
//! know, as RFC 7540 Section 4.1 requires.

use super::error::{Error, Result};
use super::frames::*;
use crate::http::{HttpSession, SessionOps};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};
use tracing::trace;

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Maximum frame payload size (16MB - 1)
pub const MAX_FRAME_SIZE: usize = 0x00FFFFFF;

/// Decoded frame header with the raw type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: usize,
    pub kind: u8,
    pub flags: FrameFlags,
    pub stream_id: u32,
}

impl FrameHeader {
    /// Known frame type, or `None` for extension frames
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.kind)
    }
}

/// Frame codec for encoding/decoding HTTP/2 frames
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame header
    pub fn encode_header(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        length: usize,
    ) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;
        header[3] = frame_type.as_u8();
        header[4] = flags.as_u8();
        header[5..9].copy_from_slice(&(stream_id & 0x7FFFFFFF).to_be_bytes());

        header
    }

    /// Decode a frame header; the reserved stream id bit is ignored
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
        let length = ((bytes[0] as usize) << 16)
            | ((bytes[1] as usize) << 8)
            | (bytes[2] as usize);
        let stream_id = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7FFFFFFF;

        FrameHeader {
            length,
            kind: bytes[3],
            flags: FrameFlags::from_u8(bytes[4]),
            stream_id,
        }
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let mut payload_len = frame.data.len();
        let mut flags = FrameFlags::empty();

        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }

        let padding_len = if let Some(pad_len) = frame.padding {
            flags.set(FrameFlags::PADDED);
            payload_len += 1 + pad_len as usize;
            pad_len
        } else {
            0
        };

        buf.put_slice(&Self::encode_header(FrameType::Data, flags, frame.stream_id, payload_len));
        if frame.padding.is_some() {
            buf.put_u8(padding_len);
        }
        buf.put_slice(&frame.data);
        buf.put_bytes(0, padding_len as usize);

        buf.freeze()
    }

    /// Encode a single HEADERS frame
    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let mut payload_len = frame.header_block.len();
        let mut flags = FrameFlags::empty();

        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }
        if frame.priority.is_some() {
            flags.set(FrameFlags::PRIORITY);
            payload_len += 5;
        }

        buf.put_slice(&Self::encode_header(
            FrameType::Headers,
            flags,
            frame.stream_id,
            payload_len,
        ));
        if let Some(priority) = &frame.priority {
            put_priority(&mut buf, priority);
        }
        buf.put_slice(&frame.header_block);

        buf.freeze()
    }

    /// Encode a CONTINUATION frame
    pub fn encode_continuation_frame(frame: &ContinuationFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.header_block.len());
        buf.put_slice(&Self::encode_header(
            FrameType::Continuation,
            flags,
            frame.stream_id,
            frame.header_block.len(),
        ));
        buf.put_slice(&frame.header_block);
        buf.freeze()
    }

    /// Encode a complete header block as HEADERS plus as many CONTINUATION
    /// frames as `max_frame_size` requires
    pub fn encode_header_block(
        stream_id: u32,
        block: &[u8],
        end_stream: bool,
        max_frame_size: usize,
    ) -> Bytes {
        let max = max_frame_size.max(1);
        let mut chunks = block.chunks(max);
        let first = chunks.next().unwrap_or(&[]);
        let mut rest = chunks.peekable();

        let frames = 1 + block.len() / max;
        let mut buf = BytesMut::with_capacity(block.len() + FRAME_HEADER_SIZE * frames);
        let headers = HeadersFrame::new(
            stream_id,
            Bytes::copy_from_slice(first),
            end_stream,
            rest.peek().is_none(),
        );
        buf.put_slice(&Self::encode_headers_frame(&headers));

        while let Some(chunk) = rest.next() {
            let last = rest.peek().is_none();
            let cont = ContinuationFrame::new(stream_id, Bytes::copy_from_slice(chunk), last);
            buf.put_slice(&Self::encode_continuation_frame(&cont));
        }

        buf.freeze()
    }

    /// Encode a SETTINGS frame
    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let (flags, payload) = if frame.ack {
            (FrameFlags::from_u8(FrameFlags::ACK), Bytes::new())
        } else {
            (FrameFlags::empty(), frame.settings.encode())
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.put_slice(&Self::encode_header(FrameType::Settings, flags, 0, payload.len()));
        buf.put_slice(&payload);
        buf.freeze()
    }

    /// Encode a PING frame
    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);
        buf.put_slice(&Self::encode_header(FrameType::Ping, flags, 0, 8));
        buf.put_slice(&frame.data);
        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let payload_len = 8 + frame.debug_data.len();

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(FrameType::Goaway, FrameFlags::empty(), 0, payload_len));
        buf.put_u32(frame.last_stream_id & 0x7FFFFFFF);
        buf.put_u32(frame.error_code.as_u32());
        buf.put_slice(&frame.debug_data);
        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(
            FrameType::WindowUpdate,
            FrameFlags::empty(),
            frame.stream_id,
            4,
        ));
        buf.put_u32(frame.size_increment & 0x7FFFFFFF);
        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(
            FrameType::RstStream,
            FrameFlags::empty(),
            frame.stream_id,
            4,
        ));
        buf.put_u32(frame.error_code.as_u32());
        buf.freeze()
    }

    /// Encode a PRIORITY frame
    pub fn encode_priority_frame(frame: &PriorityFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 5);
        buf.put_slice(&Self::encode_header(
            FrameType::Priority,
            FrameFlags::empty(),
            frame.stream_id,
            5,
        ));
        put_priority(&mut buf, &frame.priority);
        buf.freeze()
    }

    /// Write encoded frames to any writer
    pub fn write_frame<W: Write>(writer: &mut W, frame_data: &[u8]) -> io::Result<()> {
        writer.write_all(frame_data)?;
        writer.flush()
    }

    /// Read one raw frame from any reader
    pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<(FrameHeader, Bytes)> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        reader.read_exact(&mut header)?;
        let header = Self::decode_header(&header);

        let mut payload = vec![0u8; header.length];
        reader.read_exact(&mut payload)?;

        Ok((header, Bytes::from(payload)))
    }

    /// Read the next frame of a known type from a session
    ///
    /// Frames longer than `max_frame_size` are a FRAME_SIZE_ERROR. Unknown
    /// frame types are read and dropped.
    pub fn read_frame_from_session<S: SessionOps>(
        session: &mut HttpSession<S>,
        max_frame_size: usize,
    ) -> Result<Frame> {
        loop {
            let mut raw = [0u8; FRAME_HEADER_SIZE];
            session.read_exact(&mut raw).map_err(from_session_error)?;
            let header = Self::decode_header(&raw);

            if header.length > max_frame_size {
                return Err(Error::FrameSize(format!(
                    "Frame of {} bytes exceeds maximum {}",
                    header.length, max_frame_size
                )));
            }

            let mut payload = vec![0u8; header.length];
            session.read_exact(&mut payload).map_err(from_session_error)?;

            match header.frame_type() {
                Some(frame_type) => {
                    let payload = Bytes::from(payload);
                    return Ok(Frame::new(frame_type, header.flags, header.stream_id, payload));
                }
                None => {
                    trace!(
                        kind = header.kind,
                        length = header.length,
                        "skipping unknown frame type"
                    );
                }
            }
        }
    }
}

fn put_priority(buf: &mut BytesMut, priority: &PrioritySpec) {
    let mut dep = priority.stream_dependency & 0x7FFFFFFF;
    if priority.exclusive {
        dep |= 0x80000000;
    }
    buf.put_u32(dep);
    buf.put_u8(priority.weight);
}

fn from_session_error(err: crate::http::Error) -> Error {
    match err {
        crate::http::Error::Timeout => Error::Timeout,
        crate::http::Error::ConnectionClosed => Error::ConnectionClosed,
        crate::http::Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Error::ConnectionClosed
        }
        other => Error::Http(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::{ErrorCode, SettingsBuilder};
    use crate::http::session::from_tcp_stream;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn test_encode_decode_header() {
        let flags = FrameFlags::from_u8(FrameFlags::END_STREAM | FrameFlags::END_HEADERS);
        let header = FrameCodec::encode_header(FrameType::Headers, flags, 42, 1234);
        let decoded = FrameCodec::decode_header(&header);

        assert_eq!(decoded.frame_type(), Some(FrameType::Headers));
        assert_eq!(decoded.flags, flags);
        assert_eq!(decoded.stream_id, 42);
        assert_eq!(decoded.length, 1234);
    }

    #[test]
    fn test_reserved_bit_masked() {
        let raw = [0, 0, 0, 0x8, 0, 0x80, 0, 0, 3];
        let decoded = FrameCodec::decode_header(&raw);
        assert_eq!(decoded.stream_id, 3);
        assert_eq!(decoded.kind, 0x8);
    }

    #[test]
    fn test_encode_data_frame() {
        let frame = DataFrame::new(1, Bytes::from("Hello"), true);
        let encoded = FrameCodec::encode_data_frame(&frame);

        assert_eq!(encoded[0..3], [0, 0, 5]);
        assert_eq!(encoded[3], FrameType::Data.as_u8());
        assert_eq!(encoded[4], FrameFlags::END_STREAM);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 1]);
        assert_eq!(&encoded[9..], b"Hello");
    }

    #[test]
    fn test_encode_data_frame_with_padding() {
        let frame = DataFrame::new(1, Bytes::from("Hi"), false).with_padding(10);
        let encoded = FrameCodec::encode_data_frame(&frame);

        // 1 (pad length) + 2 (data) + 10 (padding)
        assert_eq!(encoded[0..3], [0, 0, 13]);
        assert_eq!(encoded[4] & FrameFlags::PADDED, FrameFlags::PADDED);
        assert_eq!(encoded[9], 10);
        assert_eq!(&encoded[10..12], b"Hi");
        assert_eq!(&encoded[12..22], &[0u8; 10]);
    }

    #[test]
    fn test_header_block_split_into_continuations() {
        let block = vec![7u8; 25];
        let encoded = FrameCodec::encode_header_block(1, &block, true, 10);

        let mut cursor = io::Cursor::new(encoded.to_vec());
        let (first, payload) = FrameCodec::read_frame(&mut cursor).unwrap();
        assert_eq!(first.frame_type(), Some(FrameType::Headers));
        assert!(first.flags.is_end_stream());
        assert!(!first.flags.is_end_headers());
        assert_eq!(payload.len(), 10);

        let (second, _) = FrameCodec::read_frame(&mut cursor).unwrap();
        assert_eq!(second.frame_type(), Some(FrameType::Continuation));
        assert!(!second.flags.is_end_headers());

        let (third, payload) = FrameCodec::read_frame(&mut cursor).unwrap();
        assert_eq!(third.frame_type(), Some(FrameType::Continuation));
        assert!(third.flags.is_end_headers());
        assert_eq!(payload.len(), 5);
    }

    #[test]
    fn test_small_header_block_single_frame() {
        let encoded = FrameCodec::encode_header_block(3, b"abc", false, 16384);
        assert_eq!(encoded.len(), FRAME_HEADER_SIZE + 3);
        assert_eq!(encoded[4], FrameFlags::END_HEADERS);
    }

    #[test]
    fn test_encode_settings_frame() {
        let settings = SettingsBuilder::new()
            .header_table_size(8192)
            .enable_push(false)
            .initial_window_size(65535)
            .build()
            .unwrap();

        let encoded = FrameCodec::encode_settings_frame(&SettingsFrame::new(settings));
        assert_eq!(encoded[3], FrameType::Settings.as_u8());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 0]);
        assert_eq!(encoded[0..3], [0, 0, 18]);

        let ack = FrameCodec::encode_settings_frame(&SettingsFrame::ack());
        assert_eq!(ack[0..3], [0, 0, 0]);
        assert_eq!(ack[4], FrameFlags::ACK);
    }

    #[test]
    fn test_encode_control_frames() {
        let ping = FrameCodec::encode_ping_frame(&PingFrame::ack([1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(ping[0..3], [0, 0, 8]);
        assert_eq!(ping[4], FrameFlags::ACK);
        assert_eq!(&ping[9..17], &[1, 2, 3, 4, 5, 6, 7, 8]);

        let update = FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(42, 1000));
        assert_eq!(&update[5..9], &[0, 0, 0, 42]);
        assert_eq!(u32::from_be_bytes([update[9], update[10], update[11], update[12]]), 1000);

        let goaway = FrameCodec::encode_goaway_frame(&GoawayFrame::new(
            7,
            ErrorCode::ProtocolError,
            Bytes::from_static(b"bad"),
        ));
        assert_eq!(goaway[0..3], [0, 0, 11]);
        assert_eq!(&goaway[9..17], &[0, 0, 0, 7, 0, 0, 0, 1]);
    }

    #[test]
    fn test_read_from_session_skips_unknown_types() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        let mut session = from_tcp_stream(server);

        client.write_all(&[0, 0, 2, 0xfa, 0, 0, 0, 0, 0, 0xde, 0xad]).unwrap();
        client
            .write_all(&FrameCodec::encode_ping_frame(&PingFrame::new([9; 8])))
            .unwrap();

        let frame = FrameCodec::read_frame_from_session(&mut session, 16384).unwrap();
        assert_eq!(frame.frame_type, FrameType::Ping);
        assert_eq!(&frame.payload[..], &[9; 8]);

        let big = FrameCodec::encode_header(FrameType::Data, FrameFlags::empty(), 1, 20000);
        client.write_all(&big).unwrap();
        let err = FrameCodec::read_frame_from_session(&mut session, 16384).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FrameSizeError);

        drop(client);
    }
}
