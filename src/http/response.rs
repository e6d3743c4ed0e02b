//! Protocol-agnostic response
//!
//! A [`Response`] buffers status, headers and body until it is flushed.
//! Flushing frames the headers for the wire protocol, runs the response
//! filters and hands the bytes to a [`ResponseSink`]: the HTTP/1.1 writer or
//! an HTTP/2 stream.

use super::{FilterChain, Headers, Request, ResponseFilterResult, Result, Error, Status};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Protocol side of a response
pub trait ResponseSink {
    /// Add the framing headers this protocol needs before filters see them
    fn frame_headers(&mut self, headers: &mut Headers, streaming: bool, body_len: usize);

    /// Emit the status and headers
    fn send_head(&mut self, status: Status, headers: &Headers, end_stream: bool) -> Result<()>;

    /// Emit body bytes
    fn send_body(&mut self, data: &[u8], end_stream: bool) -> Result<()>;

    /// Terminate the body
    fn finish(&mut self) -> Result<()>;

    /// Give up on the exchange
    fn abort(&mut self);
}

/// An outgoing HTTP response
pub struct Response<'a> {
    status: Status,
    headers: Headers,
    body: Vec<u8>,
    streaming: bool,
    headers_written: bool,
    finished: bool,
    aborted: bool,
    request: Option<Arc<Request>>,
    filters: Arc<FilterChain>,
    sink: Box<dyn ResponseSink + 'a>,
}

impl<'a> Response<'a> {
    /// Create a `200 OK` response writing to `sink`
    pub fn new(sink: Box<dyn ResponseSink + 'a>, filters: Arc<FilterChain>) -> Self {
        Response {
            status: Status::OK,
            headers: Headers::new(),
            body: Vec::new(),
            streaming: false,
            headers_written: false,
            finished: false,
            aborted: false,
            request: None,
            filters,
            sink,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status) {
        if self.headers_written {
            debug!(status = status.code(), "status change after headers were written");
            return;
        }
        self.status = status;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Append a header entry; duplicates are kept
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.headers_written {
            debug!("header added after headers were written");
            return;
        }
        self.headers.insert(name, value);
    }

    /// Replace all entries of a header
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.headers_written {
            debug!("header set after headers were written");
            return;
        }
        self.headers.set(name, value);
    }

    /// Remove a header, returning how many entries were dropped
    pub fn remove_header(&mut self, name: &str) -> usize {
        if self.headers_written {
            return 0;
        }
        self.headers.remove(name)
    }

    /// Whether the headers have gone through the filters and out
    pub fn headers_written(&self) -> bool {
        self.headers_written
    }

    /// Pending body bytes
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn append_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Send the body incrementally on every [`Response::push`]
    pub fn set_streaming(&mut self, streaming: bool) {
        if self.headers_written {
            return;
        }
        self.streaming = streaming;
    }

    /// The request being answered, once routing has begun
    pub fn request(&self) -> Option<&Request> {
        self.request.as_deref()
    }

    pub(crate) fn attach_request(&mut self, request: Arc<Request>) {
        self.request = Some(request);
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Flush pending body bytes of a streaming response
    ///
    /// Buffered responses are sent as a whole by [`Response::completed`].
    pub fn push(&mut self) -> Result<()> {
        if !self.streaming || self.finished {
            return Ok(());
        }
        self.flush(false)
    }

    /// Send whatever is left and terminate the response; later calls do nothing
    pub fn completed(&mut self) -> Result<()> {
        if self.finished {
            return if self.aborted { Err(Error::Aborted) } else { Ok(()) };
        }
        self.finished = true;
        self.flush(true)
    }

    /// Abandon the response without terminating it; the protocol layer
    /// drops the connection (HTTP/1) or resets the stream (HTTP/2)
    pub fn cancel(&mut self) {
        if !self.finished {
            let _ = self.abort();
        }
    }

    fn flush(&mut self, last: bool) -> Result<()> {
        if self.aborted {
            return Err(Error::Aborted);
        }

        let filters = Arc::clone(&self.filters);
        let first = !self.headers_written;

        if first {
            self.sink
                .frame_headers(&mut self.headers, self.streaming, self.body.len());
            if filters.run_headers(self) == ResponseFilterResult::Halt {
                debug!("response filter halted in header phase");
                return self.abort();
            }
            self.headers_written = true;
        }

        if !self.body.is_empty() && filters.run_body(self) == ResponseFilterResult::Halt {
            debug!("response filter halted in body phase");
            return self.abort();
        }

        let body = std::mem::take(&mut self.body);
        let sent = self.send(first, last, &body);
        if sent.is_err() {
            return self.abort();
        }
        Ok(())
    }

    fn send(&mut self, first: bool, last: bool, body: &[u8]) -> Result<()> {
        if first {
            self.sink
                .send_head(self.status, &self.headers, last && body.is_empty())?;
        }
        if !body.is_empty() {
            self.sink.send_body(body, last)?;
        }
        if last {
            self.sink.finish()?;
        }
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        self.aborted = true;
        self.finished = true;
        self.body.clear();
        self.sink.abort();
        Err(Error::Aborted)
    }
}

impl fmt::Debug for Response<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("streaming", &self.streaming)
            .field("headers_written", &self.headers_written)
            .field("finished", &self.finished)
            .finish()
    }
}
