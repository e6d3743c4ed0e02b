//! HTTP/1.1 response writer
//!
//! [`Http1Sink`] serializes a [`Response`](super::Response) onto an
//! [`HttpSession`]: status line, headers and a fixed-length or chunked body.
//! The header block is held back and prepended to the first body write so a
//! small response leaves in a single write.

use super::chunked::ChunkedEncoder;
use super::{Headers, HttpSession, ResponseSink, Result, SessionOps, Status, Version, CRLF};
use tracing::{debug, trace};

/// Decide keep-alive from the request's `Connection` header and version
pub fn wants_keep_alive(version: Version, connection: Option<&str>) -> bool {
    match connection {
        Some(value) => value.trim().eq_ignore_ascii_case("keep-alive"),
        None => version == Version::Http11,
    }
}

/// Render a status line such as `HTTP/1.1 200 OK\r\n`
pub fn status_line(version: Version, status: Status) -> String {
    format!(
        "HTTP/{}.{} {} {}{}",
        version.major(),
        version.minor(),
        status.code(),
        status.reason_phrase(),
        CRLF
    )
}

/// Response sink writing HTTP/1.x to a session
pub struct Http1Sink<'a, S: SessionOps> {
    session: &'a mut HttpSession<S>,
    version: Version,
    keep_alive: bool,
    chunked: bool,
    pending: Vec<u8>,
}

impl<'a, S: SessionOps> Http1Sink<'a, S> {
    pub fn new(session: &'a mut HttpSession<S>, version: Version, keep_alive: bool) -> Self {
        Http1Sink {
            session,
            version,
            keep_alive,
            chunked: false,
            pending: Vec::new(),
        }
    }

    fn write_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let buf = std::mem::take(&mut self.pending);
        trace!(bytes = buf.len(), "writing response bytes");
        self.session.write_all(&buf)
    }
}

impl<S: SessionOps> ResponseSink for Http1Sink<'_, S> {
    fn frame_headers(&mut self, headers: &mut Headers, streaming: bool, body_len: usize) {
        if let Some(value) = headers.get("connection") {
            if value.trim().eq_ignore_ascii_case("close") {
                self.keep_alive = false;
            }
        } else if self.keep_alive {
            headers.insert("Connection", "Keep-Alive");
        }

        if streaming {
            self.chunked = true;
            headers.remove("content-length");
            headers.set("Transfer-Encoding", "chunked");
        } else if !headers.contains("content-length") {
            headers.insert("Content-Length", body_len.to_string());
        }
    }

    fn send_head(&mut self, status: Status, headers: &Headers, end_stream: bool) -> Result<()> {
        self.pending
            .extend_from_slice(status_line(self.version, status).as_bytes());
        self.pending.extend_from_slice(headers.to_string().as_bytes());
        self.pending.extend_from_slice(CRLF.as_bytes());

        if end_stream && !self.chunked {
            self.write_pending()?;
        }
        Ok(())
    }

    fn send_body(&mut self, data: &[u8], _end_stream: bool) -> Result<()> {
        if self.chunked {
            ChunkedEncoder::new(&mut self.pending).write_chunk(data)?;
        } else {
            self.pending.extend_from_slice(data);
        }
        self.write_pending()
    }

    fn finish(&mut self) -> Result<()> {
        if self.chunked {
            ChunkedEncoder::new(&mut self.pending).finish()?;
        }
        self.write_pending()
    }

    fn abort(&mut self) {
        debug!("HTTP/1 response aborted");
        self.pending.clear();
        self.keep_alive = false;
    }
}
