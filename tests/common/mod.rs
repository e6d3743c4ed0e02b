//! Shared helpers for integration tests
//!
//! Starts a server on an ephemeral loopback port and provides a minimal
//! HTTP/2 client built from the crate's frame codec and the `hpack` crate.

#![allow(dead_code)]

use bytes::Bytes;
use httpd_core::http::h2::codec::FrameHeader;
use httpd_core::http::h2::frames::*;
use httpd_core::http::h2::{ErrorCode, FrameCodec, Settings, CONNECTION_PREFACE};
use httpd_core::http::{HttpServer, ServerConfigBuilder, ServerHandle};
use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

/// Start a server on 127.0.0.1 with an ephemeral port
pub fn start(builder: ServerConfigBuilder) -> ServerHandle {
    let config = builder.address("127.0.0.1").port(0).build().unwrap();
    HttpServer::new(config).spawn().unwrap()
}

/// Send raw bytes and read until the server closes
pub fn raw_exchange(handle: &ServerHandle, request: &[u8]) -> String {
    use std::io::Write;

    let mut stream = TcpStream::connect(handle.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(request).unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

/// Frame read by the test client
#[derive(Debug)]
pub struct RawFrame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl RawFrame {
    pub fn frame_type(&self) -> Option<FrameType> {
        self.header.frame_type()
    }

    pub fn is(&self, frame_type: FrameType) -> bool {
        self.frame_type() == Some(frame_type)
    }

    pub fn as_frame(&self) -> Frame {
        Frame::new(
            self.frame_type().unwrap(),
            self.header.flags,
            self.header.stream_id,
            self.payload.clone(),
        )
    }
}

/// Response collected from one stream
#[derive(Debug, Default)]
pub struct H2Response {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub data_frames: Vec<usize>,
}

impl H2Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn status(&self) -> Option<&str> {
        self.header(":status")
    }
}

/// Minimal HTTP/2 client speaking prior knowledge over cleartext TCP
pub struct H2Client {
    pub stream: TcpStream,
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
}

impl H2Client {
    /// Connect and send the preface without any SETTINGS
    pub fn connect_raw(handle: &ServerHandle) -> Self {
        let stream = TcpStream::connect(handle.local_addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut client = H2Client {
            stream,
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
        };
        client.send(CONNECTION_PREFACE);
        client
    }

    /// Connect, exchange SETTINGS and consume the server's SETTINGS ACK
    pub fn connect(handle: &ServerHandle, settings: Settings) -> Self {
        let mut client = Self::connect_raw(handle);
        client.send(&FrameCodec::encode_settings_frame(&SettingsFrame::new(settings)));

        let mut server_settings = false;
        let mut acked = false;
        while !(server_settings && acked) {
            let frame = client.read_frame();
            assert!(frame.is(FrameType::Settings), "unexpected {:?}", frame.header);
            if frame.header.flags.is_ack() {
                acked = true;
            } else {
                server_settings = true;
                client.send(&FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
            }
        }
        client
    }

    pub fn send(&mut self, bytes: &[u8]) {
        FrameCodec::write_frame(&mut self.stream, bytes).unwrap();
    }

    pub fn read_frame(&mut self) -> RawFrame {
        let (header, payload) = FrameCodec::read_frame(&mut self.stream).unwrap();
        RawFrame { header, payload }
    }

    /// Read frames until one of the given type arrives
    pub fn read_until(&mut self, frame_type: FrameType) -> RawFrame {
        loop {
            let frame = self.read_frame();
            if frame.is(frame_type) {
                return frame;
            }
        }
    }

    pub fn encode_headers(&mut self, fields: &[(&str, &str)]) -> Vec<u8> {
        self.encoder
            .encode(fields.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())))
    }

    pub fn request_headers(&mut self, method: &str, path: &str, extra: &[(&str, &str)]) -> Vec<u8> {
        let mut fields = vec![
            (":method", method),
            (":scheme", "http"),
            (":path", path),
            (":authority", "localhost"),
        ];
        fields.extend_from_slice(extra);
        self.encode_headers(&fields)
    }

    pub fn send_headers(&mut self, stream_id: u32, block: Vec<u8>, end_stream: bool) {
        let frame = HeadersFrame::new(stream_id, Bytes::from(block), end_stream, true);
        self.send(&FrameCodec::encode_headers_frame(&frame));
    }

    pub fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) {
        let frame = DataFrame::new(stream_id, Bytes::copy_from_slice(data), end_stream);
        self.send(&FrameCodec::encode_data_frame(&frame));
    }

    pub fn send_window_update(&mut self, stream_id: u32, increment: u32) {
        let frame = WindowUpdateFrame::new(stream_id, increment);
        self.send(&FrameCodec::encode_window_update_frame(&frame));
    }

    pub fn decode_headers(&mut self, block: &[u8]) -> Vec<(String, String)> {
        self.decoder
            .decode(block)
            .unwrap()
            .into_iter()
            .map(|(n, v)| {
                (
                    String::from_utf8(n).unwrap(),
                    String::from_utf8(v).unwrap(),
                )
            })
            .collect()
    }

    /// Collect the response on `stream_id` until END_STREAM
    ///
    /// Frames for other streams and connection-level frames are skipped.
    pub fn read_response(&mut self, stream_id: u32) -> H2Response {
        let mut response = H2Response::default();
        let mut block = Vec::new();
        loop {
            let frame = self.read_frame();
            if frame.header.stream_id != stream_id {
                assert!(
                    !frame.is(FrameType::Goaway),
                    "GOAWAY while waiting for stream {}",
                    stream_id
                );
                continue;
            }
            match frame.frame_type() {
                Some(FrameType::Headers) | Some(FrameType::Continuation) => {
                    block.extend_from_slice(&frame.payload);
                    if frame.header.flags.is_end_headers() {
                        let fields = self.decode_headers(&block);
                        response.headers.extend(fields);
                        block.clear();
                    }
                }
                Some(FrameType::Data) => {
                    response.data_frames.push(frame.payload.len());
                    response.body.extend_from_slice(&frame.payload);
                }
                Some(FrameType::RstStream) => {
                    let rst = RstStreamFrame::parse(&frame.as_frame()).unwrap();
                    panic!("stream {} reset with {}", stream_id, rst.error_code);
                }
                _ => {}
            }
            if frame.header.flags.is_end_stream()
                && matches!(
                    frame.frame_type(),
                    Some(FrameType::Headers) | Some(FrameType::Data)
                )
            {
                return response;
            }
        }
    }

    /// Read until GOAWAY and return its error code
    pub fn read_goaway(&mut self) -> (u32, ErrorCode) {
        let frame = self.read_until(FrameType::Goaway);
        let goaway = GoawayFrame::parse(&frame.as_frame()).unwrap();
        (goaway.last_stream_id, goaway.error_code)
    }
}
