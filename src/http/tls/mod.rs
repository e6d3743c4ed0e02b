//! TLS support for server connections
//!
//! TLS plugs into the session operations abstraction:
//!
//! 1. `TlsConfig` holds the server context (versions, ciphers, certificates, ALPN)
//! 2. `TlsSessionOps` implements the `SessionOps` trait for encrypted I/O
//! 3. The HTTP/1.1 and HTTP/2 code runs unchanged on top of it
//!
//! The ALPN result of the handshake decides between HTTP/1.1 and HTTP/2.
//! Without a configured certificate a built-in self-signed one is used.
//!
//! # Examples
//!
//! ```no_run
//! use httpd_core::http::tls::{ClientVerify, TlsConfig, TlsVersion};
//! use std::net::TcpListener;
//!
//! let tls_config = TlsConfig::server()
//!     .cert_file("server.pem")
//!     .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
//!     .client_verify(ClientVerify::None)
//!     .alpn(&["h2", "http/1.1"])
//!     .build()
//!     .unwrap();
//!
//! let listener = TcpListener::bind("127.0.0.1:8443").unwrap();
//! let (tcp_stream, _) = listener.accept().unwrap();
//! let tls_session = tls_config.accept(tcp_stream).unwrap();
//! assert!(tls_session.alpn_protocol().is_some());
//! ```

pub mod builtin_cert;
pub mod config;
pub mod session;

pub use config::{ClientVerify, TlsConfig, TlsConfigBuilder, TlsError, TlsVersion, DEFAULT_ALPN};
pub use session::TlsSessionOps;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
