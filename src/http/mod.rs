//! HTTP/1.1 and HTTP/2 server engine
//!
//! This module holds the protocol layers of the server: the incremental
//! HTTP/1.1 request parser and response writer, the HTTP/2 session machinery
//! in [`h2`], and the filter/routing pipeline shared by both.
//!
//! # Architecture
//!
//! All I/O goes through the session operations abstraction so the same code
//! serves plain and encrypted connections:
//!
//! - `SessionOps` trait defines operations (poll, read, write, flush, close)
//! - `HttpSession` adds timeouts, pushback and exact reads on top of it
//! - `FdSessionOps` and `tls::TlsSessionOps` are the two transports
//!
//! A request travels through [`parser::RequestParser`] (or an HTTP/2 stream),
//! the [`filter::FilterChain`], a [`router::Router`] handler, and finally a
//! [`response::ResponseSink`] that frames the bytes for its protocol.
//!
//! # Examples
//!
//! ```no_run
//! use httpd_core::http::{HttpServer, Method, Routes, ServerConfig};
//!
//! let mut routes = Routes::new();
//! routes.add(Method::Get, "/hello", |_req, resp| {
//!     resp.set_header("Content-Type", "text/plain");
//!     resp.append_body(b"Hello, world");
//! });
//!
//! let config = ServerConfig::builder()
//!     .name("localhost")
//!     .port(8080)
//!     .routes(routes)
//!     .build()
//!     .unwrap();
//!
//! let handle = HttpServer::new(config).spawn().unwrap();
//! handle.join();
//! ```

pub mod chunked;
pub mod compression;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod filter;
pub mod h2;
pub mod headers;
pub mod message;
pub mod multipart;
pub mod parser;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod session;
pub mod tls;
pub mod url;
pub mod writer;

pub use compression::ContentCompression;
pub use config::{H2Config, Http1Config, ServerConfig, ServerConfigBuilder};
pub use connection::Http1Connection;
pub use filter::{
    FilterChain, FilterPriority, RequestFilter, RequestFilterResult, ResponseFilter,
    ResponseFilterResult,
};
pub use headers::Headers;
pub use message::{Method, Status, Version};
pub use parser::{ParseError, RequestParser};
pub use request::Request;
pub use response::{Response, ResponseSink};
pub use router::{Handler, Router, Routes};
pub use server::{HttpServer, ServerHandle};
pub use session::{FdSessionOps, HttpSession, SessionOps};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The exchange was cut short by a filter halt or a failed write.
    #[error("Response aborted")]
    Aborted,
}

/// Maximum size of a request header block (request line included)
pub const MAX_HEADER_SIZE: usize = 8 * 1024;

/// Size of a single transport read
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
