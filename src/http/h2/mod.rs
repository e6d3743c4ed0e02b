//! HTTP/2 server protocol
//!
//! The server side of RFC 7540 on top of the session operations
//! abstraction, so the same code runs over cleartext TCP (prior knowledge
//! or a sniffed preface) and over TLS after ALPN selected `h2`.
//!
//! # Architecture
//!
//! - [`frames`] and [`codec`]: typed frames and their wire encoding
//! - [`hpack`]: per-connection header compression state (via the `hpack` crate)
//! - [`stream`]: the stream state machine and the stream table
//! - [`flow_control`]: connection and stream windows
//! - [`session`]: the connection actor that ties them together and hands
//!   each request to the shared dispatcher on its own thread
//!
//! Server push is not supported: `SETTINGS_ENABLE_PUSH` is advertised as 0
//! and a client PUSH_PROMISE is a connection error.
//!
//! # Examples
//!
//! ```no_run
//! use httpd_core::http::dispatch::Dispatcher;
//! use httpd_core::http::h2::H2Connection;
//! use httpd_core::http::session::from_tcp_stream;
//! use httpd_core::http::{FilterChain, H2Config, Routes};
//! use std::net::TcpListener;
//! use std::sync::Arc;
//!
//! let listener = TcpListener::bind("127.0.0.1:8080").unwrap();
//! let (tcp, _) = listener.accept().unwrap();
//!
//! let dispatcher = Dispatcher::new(Arc::new(Routes::new()), Arc::new(FilterChain::new()));
//! H2Connection::new(from_tcp_stream(tcp), dispatcher, H2Config::default())
//!     .server_name("localhost")
//!     .run()
//!     .unwrap();
//! ```

pub mod codec;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod hpack;
pub mod session;
pub mod settings;
pub mod stream;

pub use codec::{FrameCodec, FrameHeader};
pub use error::{Error, ErrorCode, Result};
pub use frames::{Frame, FrameFlags, FrameType};
pub use session::{H2Connection, StreamSink};
pub use settings::{Settings, SettingsBuilder};
pub use stream::{H2Stream, StreamId, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
