//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O.

use super::config::{TlsConfig, TlsError};
use crate::http::session::{poll_fd, PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{Ssl, SslStream};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use tracing::debug;

/// TLS session operations
///
/// Wraps an OpenSSL stream after a completed server handshake.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    alpn: Option<String>,
    version: &'static str,
    failed: bool,
}

impl TlsSessionOps {
    /// Accept a client connection with TLS (perform handshake)
    pub fn accept(
        tcp_stream: TcpStream,
        config: &TlsConfig,
    ) -> std::result::Result<Self, TlsError> {
        let ssl = Ssl::new(&config.ctx)?;

        let stream = ssl
            .accept(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Accept failed: {}", e)))?;

        let alpn = stream
            .ssl()
            .selected_alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned());
        let version = stream.ssl().version_str();
        debug!(version, alpn = ?alpn, "TLS handshake complete");

        Ok(TlsSessionOps {
            stream,
            alpn,
            version,
            failed: false,
        })
    }

    /// Protocol negotiated through ALPN, if any
    pub fn alpn_protocol(&self) -> Option<&str> {
        self.alpn.as_deref()
    }

    /// Negotiated protocol version, e.g. `TLSv1.3`
    pub fn version(&self) -> &str {
        self.version
    }

    /// Check if TLS failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }

    fn fail(&mut self, e: io::Error) -> Error {
        if e.kind() != io::ErrorKind::WouldBlock {
            self.failed = true;
        }
        Error::Io(e)
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // Decrypted bytes already buffered inside OpenSSL never show up on the fd
        let wants_read = matches!(events, PollEvents::Read | PollEvents::Both);
        if wants_read && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }
        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn flush(&mut self) -> HttpResult<()> {
        match self.stream.flush() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn close(&mut self) -> HttpResult<()> {
        if !self.failed {
            // close_notify is best effort; the peer may already be gone
            let _ = self.stream.shutdown();
        }

        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.get_ref().peer_addr().ok()
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.stream.get_ref().as_raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tls::TlsVersion;
    use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
    use std::net::TcpListener;
    use std::thread;

    fn connect(addr: SocketAddr, alpn: &[u8]) -> SslStream<TcpStream> {
        let mut builder = SslConnector::builder(SslMethod::tls_client()).unwrap();
        builder.set_verify(SslVerifyMode::NONE);
        builder.set_alpn_protos(alpn).unwrap();
        let connector = builder.build();

        let tcp = TcpStream::connect(addr).unwrap();
        connector.connect("example.com", tcp).unwrap()
    }

    #[test]
    fn test_tls_handshake_and_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = TlsConfig::server().version(TlsVersion::Tls13).build().unwrap();

        let server = thread::spawn(move || {
            let (tcp, _) = listener.accept().unwrap();
            let mut session = config.accept(tcp).unwrap();
            assert_eq!(session.version(), "TLSv1.3");
            assert_eq!(session.alpn_protocol(), Some("http/1.1"));

            let mut buf = [0u8; 5];
            let mut read = 0;
            while read < 5 {
                assert!(session.poll(PollEvents::Read, Some(Duration::from_secs(5))).unwrap());
                read += session.read(&mut buf[read..]).unwrap();
            }
            assert_eq!(&buf, b"Hello");

            session.write(b"World").unwrap();
            session.flush().unwrap();
            session.close().unwrap();
        });

        let mut client = connect(addr, b"\x08http/1.1");
        client.write_all(b"Hello").unwrap();

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"World");

        server.join().unwrap();
    }

    #[test]
    fn test_alpn_selects_h2() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = TlsConfig::server().build().unwrap();

        let server = thread::spawn(move || {
            let (tcp, _) = listener.accept().unwrap();
            let session = config.accept(tcp).unwrap();
            session.alpn_protocol().map(str::to_string)
        });

        let client = connect(addr, b"\x02h2\x08http/1.1");
        assert_eq!(client.ssl().selected_alpn_protocol(), Some(&b"h2"[..]));
        assert_eq!(server.join().unwrap(), Some("h2".to_string()));
    }
}
