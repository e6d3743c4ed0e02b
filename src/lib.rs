//! httpd-core - embeddable HTTP/1.1 and HTTP/2 server engine
//!
//! The crate accepts connections, speaks HTTP/1.1 (with keep-alive and
//! chunked responses) or HTTP/2 (negotiated through TLS ALPN or detected
//! from the cleartext preface), runs requests through a prioritized filter
//! chain and hands them to registered handlers.

pub mod http;
pub mod logging;
