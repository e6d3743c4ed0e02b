//! HTTP/2 frame types and utilities
//!
//! This module defines the frame types specified in RFC 7540 Section 6,
//! along with the payload checks applied to inbound frames. Padding and
//! priority fields are stripped while parsing.

use super::error::{Error, ErrorCode, Result};
use super::settings::Settings;
use bytes::{Buf, Bytes};
use std::fmt;

/// HTTP/2 frame types (RFC 7540 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// DATA frame (0x0) - Conveys arbitrary, variable-length sequences of octets
    Data = 0x0,
    /// HEADERS frame (0x1) - Opens a stream and carries header block fragment
    Headers = 0x1,
    /// PRIORITY frame (0x2) - Specifies sender-advised priority of a stream
    Priority = 0x2,
    /// RST_STREAM frame (0x3) - Allows immediate termination of a stream
    RstStream = 0x3,
    /// SETTINGS frame (0x4) - Conveys configuration parameters
    Settings = 0x4,
    /// PUSH_PROMISE frame (0x5) - Never valid from a client
    PushPromise = 0x5,
    /// PING frame (0x6) - Mechanism for measuring round-trip time
    Ping = 0x6,
    /// GOAWAY frame (0x7) - Initiates shutdown of connection
    Goaway = 0x7,
    /// WINDOW_UPDATE frame (0x8) - Implements flow control
    WindowUpdate = 0x8,
    /// CONTINUATION frame (0x9) - Continues sequence of header block fragments
    Continuation = 0x9,
}

impl FrameType {
    /// Convert frame type to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create frame type from u8
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }

    /// Get frame type name
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// HTTP/2 frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Create empty flags
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Create from u8
    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Get raw u8 value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Check if a flag is set
    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// END_STREAM flag (0x1)
    pub const END_STREAM: u8 = 0x1;

    /// ACK flag (0x1) - used for SETTINGS and PING
    pub const ACK: u8 = 0x1;

    /// END_HEADERS flag (0x4)
    pub const END_HEADERS: u8 = 0x4;

    /// PADDED flag (0x8)
    pub const PADDED: u8 = 0x8;

    /// PRIORITY flag (0x20)
    pub const PRIORITY: u8 = 0x20;

    /// Check if END_STREAM is set
    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    /// Check if ACK is set
    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    /// Check if END_HEADERS is set
    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    /// Check if PADDED is set
    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    /// Check if PRIORITY is set
    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// Generic HTTP/2 frame of a known type
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame type
    pub frame_type: FrameType,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream ID
    pub stream_id: u32,
    /// Frame payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(frame_type: FrameType, flags: FrameFlags, stream_id: u32, payload: Bytes) -> Self {
        Frame {
            frame_type,
            flags,
            stream_id,
            payload,
        }
    }

    /// Get payload size
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Remove the pad length byte and trailing padding of a PADDED frame
fn strip_padding(frame: &Frame) -> Result<Bytes> {
    let mut payload = frame.payload.clone();
    if !frame.flags.is_padded() {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::FrameSize(format!(
            "{} frame too short for pad length",
            frame.frame_type.name()
        )));
    }
    let pad_len = payload.get_u8() as usize;
    if pad_len > payload.len() {
        return Err(Error::Protocol(format!(
            "Padding {} exceeds {} payload",
            pad_len,
            frame.frame_type.name()
        )));
    }
    payload.truncate(payload.len() - pad_len);
    Ok(payload)
}

/// DATA frame (RFC 7540 Section 6.1)
#[derive(Debug, Clone)]
pub struct DataFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Data payload
    pub data: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl DataFrame {
    /// Create a new DATA frame
    pub fn new(stream_id: u32, data: Bytes, end_stream: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            end_stream,
            padding: None,
        }
    }

    /// Set padding
    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Parse an inbound DATA frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        Ok(DataFrame::new(
            frame.stream_id,
            strip_padding(frame)?,
            frame.flags.is_end_stream(),
        ))
    }
}

/// HEADERS frame (RFC 7540 Section 6.2)
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// END_HEADERS flag
    pub end_headers: bool,
    /// Priority information (if PRIORITY flag is set)
    pub priority: Option<PrioritySpec>,
}

impl HeadersFrame {
    /// Create a new HEADERS frame
    pub fn new(stream_id: u32, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
            priority: None,
        }
    }

    /// Set priority
    pub fn with_priority(mut self, priority: PrioritySpec) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Parse an inbound HEADERS frame, stripping padding and priority
    pub fn parse(frame: &Frame) -> Result<Self> {
        let mut block = strip_padding(frame)?;
        let priority = if frame.flags.is_priority() {
            if block.len() < 5 {
                return Err(Error::FrameSize("HEADERS too short for priority".to_string()));
            }
            Some(PrioritySpec::decode(&mut block))
        } else {
            None
        };

        Ok(HeadersFrame {
            stream_id: frame.stream_id,
            header_block: block,
            end_stream: frame.flags.is_end_stream(),
            end_headers: frame.flags.is_end_headers(),
            priority,
        })
    }
}

/// Priority specification (RFC 7540 Section 6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    /// Stream dependency
    pub stream_dependency: u32,
    /// Exclusive flag
    pub exclusive: bool,
    /// Weight (1-256)
    pub weight: u8,
}

impl PrioritySpec {
    /// Create a new priority specification
    pub fn new(stream_dependency: u32, exclusive: bool, weight: u8) -> Self {
        PrioritySpec {
            stream_dependency,
            exclusive,
            weight,
        }
    }

    fn decode(buf: &mut Bytes) -> Self {
        let dep = buf.get_u32();
        let weight = buf.get_u8();
        PrioritySpec {
            stream_dependency: dep & 0x7FFF_FFFF,
            exclusive: dep & 0x8000_0000 != 0,
            weight,
        }
    }
}

/// PRIORITY frame (RFC 7540 Section 6.3)
#[derive(Debug, Clone, Copy)]
pub struct PriorityFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Priority specification
    pub priority: PrioritySpec,
}

impl PriorityFrame {
    /// Parse an inbound PRIORITY frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.stream_id == 0 {
            return Err(Error::Protocol("PRIORITY on stream 0".to_string()));
        }
        if frame.payload.len() != 5 {
            return Err(Error::stream(
                frame.stream_id,
                ErrorCode::FrameSizeError,
                "PRIORITY payload must be 5 bytes",
            ));
        }
        let mut payload = frame.payload.clone();
        Ok(PriorityFrame {
            stream_id: frame.stream_id,
            priority: PrioritySpec::decode(&mut payload),
        })
    }
}

/// RST_STREAM frame (RFC 7540 Section 6.4)
#[derive(Debug, Clone, Copy)]
pub struct RstStreamFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Error code
    pub error_code: ErrorCode,
}

impl RstStreamFrame {
    pub fn new(stream_id: u32, error_code: ErrorCode) -> Self {
        RstStreamFrame {
            stream_id,
            error_code,
        }
    }

    /// Parse an inbound RST_STREAM frame; unknown codes read as INTERNAL_ERROR
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.stream_id == 0 {
            return Err(Error::Protocol("RST_STREAM on stream 0".to_string()));
        }
        if frame.payload.len() != 4 {
            return Err(Error::FrameSize("RST_STREAM payload must be 4 bytes".to_string()));
        }
        let code = frame.payload.clone().get_u32();
        Ok(RstStreamFrame {
            stream_id: frame.stream_id,
            error_code: ErrorCode::from_u32(code).unwrap_or(ErrorCode::InternalError),
        })
    }
}

/// SETTINGS frame (RFC 7540 Section 6.5)
#[derive(Debug, Clone)]
pub struct SettingsFrame {
    /// ACK flag
    pub ack: bool,
    /// Settings parameters
    pub settings: Settings,
}

impl SettingsFrame {
    /// Create a new SETTINGS frame
    pub fn new(settings: Settings) -> Self {
        SettingsFrame {
            ack: false,
            settings,
        }
    }

    /// Create a SETTINGS ACK frame
    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            settings: Settings::default(),
        }
    }

    /// Parse an inbound SETTINGS frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.stream_id != 0 {
            return Err(Error::Protocol("SETTINGS on a stream".to_string()));
        }
        if frame.flags.is_ack() {
            if !frame.payload.is_empty() {
                return Err(Error::FrameSize("SETTINGS ACK with payload".to_string()));
            }
            return Ok(SettingsFrame::ack());
        }
        Ok(SettingsFrame::new(Settings::decode(&frame.payload)?))
    }
}

/// PING frame (RFC 7540 Section 6.7)
#[derive(Debug, Clone, Copy)]
pub struct PingFrame {
    /// ACK flag
    pub ack: bool,
    /// Opaque data (8 bytes)
    pub data: [u8; 8],
}

impl PingFrame {
    /// Create a new PING frame
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    /// Create a PING ACK frame
    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }

    /// Parse an inbound PING frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.stream_id != 0 {
            return Err(Error::Protocol("PING on a stream".to_string()));
        }
        let data: [u8; 8] = frame
            .payload
            .as_ref()
            .try_into()
            .map_err(|_| Error::FrameSize("PING payload must be 8 bytes".to_string()))?;
        Ok(PingFrame {
            ack: frame.flags.is_ack(),
            data,
        })
    }
}

/// GOAWAY frame (RFC 7540 Section 6.8)
#[derive(Debug, Clone)]
pub struct GoawayFrame {
    /// Last stream ID
    pub last_stream_id: u32,
    /// Error code
    pub error_code: ErrorCode,
    /// Debug data
    pub debug_data: Bytes,
}

impl GoawayFrame {
    /// Create a new GOAWAY frame
    pub fn new(last_stream_id: u32, error_code: ErrorCode, debug_data: Bytes) -> Self {
        GoawayFrame {
            last_stream_id,
            error_code,
            debug_data,
        }
    }

    /// Parse an inbound GOAWAY frame
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.stream_id != 0 {
            return Err(Error::Protocol("GOAWAY on a stream".to_string()));
        }
        if frame.payload.len() < 8 {
            return Err(Error::FrameSize("GOAWAY payload too short".to_string()));
        }
        let mut payload = frame.payload.clone();
        let last_stream_id = payload.get_u32() & 0x7FFF_FFFF;
        let code = payload.get_u32();
        Ok(GoawayFrame {
            last_stream_id,
            error_code: ErrorCode::from_u32(code).unwrap_or(ErrorCode::InternalError),
            debug_data: payload,
        })
    }
}

/// WINDOW_UPDATE frame (RFC 7540 Section 6.9)
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    /// Stream ID (0 for connection-level)
    pub stream_id: u32,
    /// Window size increment
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    /// Create a new WINDOW_UPDATE frame
    pub fn new(stream_id: u32, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }

    /// Parse an inbound WINDOW_UPDATE frame; a zero increment is a protocol error
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.payload.len() != 4 {
            return Err(Error::FrameSize("WINDOW_UPDATE payload must be 4 bytes".to_string()));
        }
        let size_increment = frame.payload.clone().get_u32() & 0x7FFF_FFFF;
        if size_increment == 0 {
            return Err(Error::Protocol("WINDOW_UPDATE increment of 0".to_string()));
        }
        Ok(WindowUpdateFrame {
            stream_id: frame.stream_id,
            size_increment,
        })
    }
}

/// CONTINUATION frame (RFC 7540 Section 6.10)
#[derive(Debug, Clone)]
pub struct ContinuationFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_HEADERS flag
    pub end_headers: bool,
}

impl ContinuationFrame {
    pub fn new(stream_id: u32, header_block: Bytes, end_headers: bool) -> Self {
        ContinuationFrame {
            stream_id,
            header_block,
            end_headers,
        }
    }

    /// Parse an inbound CONTINUATION frame
    pub fn parse(frame: &Frame) -> Self {
        ContinuationFrame::new(
            frame.stream_id,
            frame.payload.clone(),
            frame.flags.is_end_headers(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(frame_type: FrameType, flags: u8, stream_id: u32, payload: &[u8]) -> Frame {
        Frame::new(
            frame_type,
            FrameFlags::from_u8(flags),
            stream_id,
            Bytes::copy_from_slice(payload),
        )
    }

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::Data.as_u8(), 0x0);
        assert_eq!(FrameType::Continuation.as_u8(), 0x9);
        assert_eq!(FrameType::from_u8(0x9), Some(FrameType::Continuation));
        assert_eq!(FrameType::from_u8(0xff), None);
        assert_eq!(FrameType::WindowUpdate.to_string(), "WINDOW_UPDATE (0x8)");
    }

    #[test]
    fn test_frame_flags() {
        let mut flags = FrameFlags::empty();
        assert!(!flags.is_end_stream());

        flags.set(FrameFlags::END_STREAM);
        flags.set(FrameFlags::END_HEADERS);
        assert!(flags.is_end_stream());
        assert!(flags.is_end_headers());
        assert!(!flags.is_padded());
    }

    #[test]
    fn test_data_padding_stripped() {
        let flags = FrameFlags::PADDED | FrameFlags::END_STREAM;
        let f = frame(FrameType::Data, flags, 1, b"\x02hi\0\0");
        let data = DataFrame::parse(&f).unwrap();
        assert_eq!(&data.data[..], b"hi");
        assert!(data.end_stream);

        let bad = frame(FrameType::Data, FrameFlags::PADDED, 1, b"\x09hi");
        assert_eq!(DataFrame::parse(&bad).unwrap_err().code(), ErrorCode::ProtocolError);
    }

    #[test]
    fn test_headers_priority_stripped() {
        let mut payload = vec![0x80, 0, 0, 3, 15];
        payload.extend_from_slice(b"block");
        let flags = FrameFlags::PRIORITY | FrameFlags::END_HEADERS;
        let f = frame(FrameType::Headers, flags, 5, &payload);

        let headers = HeadersFrame::parse(&f).unwrap();
        assert_eq!(&headers.header_block[..], b"block");
        assert!(headers.end_headers);
        assert_eq!(headers.priority, Some(PrioritySpec::new(3, true, 15)));
    }

    #[test]
    fn test_window_update_zero_increment() {
        let f = frame(FrameType::WindowUpdate, 0, 0, &[0, 0, 0, 0]);
        assert_eq!(WindowUpdateFrame::parse(&f).unwrap_err().code(), ErrorCode::ProtocolError);

        let f = frame(FrameType::WindowUpdate, 0, 0, &[0, 0]);
        assert_eq!(WindowUpdateFrame::parse(&f).unwrap_err().code(), ErrorCode::FrameSizeError);

        let f = frame(FrameType::WindowUpdate, 0, 3, &[0, 0, 1, 0]);
        assert_eq!(WindowUpdateFrame::parse(&f).unwrap().size_increment, 256);
    }

    #[test]
    fn test_ping_and_settings_checks() {
        let ping = frame(FrameType::Ping, 0, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(PingFrame::parse(&ping).unwrap().data, [1, 2, 3, 4, 5, 6, 7, 8]);

        let short = frame(FrameType::Ping, 0, 0, &[1, 2, 3]);
        assert_eq!(PingFrame::parse(&short).unwrap_err().code(), ErrorCode::FrameSizeError);

        let on_stream = frame(FrameType::Settings, 0, 1, &[]);
        assert_eq!(SettingsFrame::parse(&on_stream).unwrap_err().code(), ErrorCode::ProtocolError);

        let ack_payload = frame(FrameType::Settings, FrameFlags::ACK, 0, &[0, 1, 0, 0, 0, 0]);
        assert_eq!(
            SettingsFrame::parse(&ack_payload).unwrap_err().code(),
            ErrorCode::FrameSizeError
        );
    }

    #[test]
    fn test_goaway_parse() {
        let f = frame(FrameType::Goaway, 0, 0, &[0, 0, 0, 7, 0, 0, 0, 1, b'x']);
        let goaway = GoawayFrame::parse(&f).unwrap();
        assert_eq!(goaway.last_stream_id, 7);
        assert_eq!(goaway.error_code, ErrorCode::ProtocolError);
        assert_eq!(&goaway.debug_data[..], b"x");
    }
}
