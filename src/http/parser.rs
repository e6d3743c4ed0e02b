//! Incremental HTTP/1.1 request parser
//!
//! [`RequestParser::feed`] accepts arbitrarily fragmented input and drives a
//! byte-level state machine. Each state accumulates bytes and flushes them
//! into the [`Request`] under construction when it ends: the URL becomes path
//! segments plus a query string, a field becomes the pending header name, a
//! value is stored under that name and body bytes go to the body buffer or a
//! multipart reader.

use super::chunked::ChunkedDecoder;
use super::multipart::MultipartReader;
use super::url::parse_uri;
use super::{Method, Request, Status, Version, MAX_HEADER_SIZE};
use tracing::trace;

/// Request-level parse failures, each mapped to an error response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Request header block too large")]
    RequestEntityTooLarge,

    #[error("Request timed out")]
    RequestTimeout,
}

impl ParseError {
    /// Response status sent for this error
    pub fn status(&self) -> Status {
        match self {
            ParseError::BadRequest(_) => Status::BAD_REQUEST,
            ParseError::RequestEntityTooLarge => Status::REQUEST_ENTITY_TOO_LARGE,
            ParseError::RequestTimeout => Status::REQUEST_TIMEOUT,
        }
    }
}

/// What happened while consuming one slice of input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseEvents {
    /// Bytes of the slice that belong to the current request
    pub consumed: usize,
    /// The header block ended during this call
    pub headers_complete: bool,
    /// The request carried `Expect: 100-continue`
    pub expect_continue: bool,
    /// The request is complete and can be taken
    pub message_complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    None,
    MessageBegin,
    Url,
    Version,
    HeaderField,
    HeaderValue,
    HeadersComplete,
    Body,
    MessageComplete,
}

#[derive(Debug)]
enum BodyKind {
    Empty,
    Length(usize),
    Chunked(ChunkedDecoder),
}

/// Byte-driven HTTP/1.1 request parser
#[derive(Debug)]
pub struct RequestParser {
    state: ParserState,
    request: Request,
    buffer: Vec<u8>,
    field: String,
    value: Vec<u8>,
    value_started: bool,
    pending_header: bool,
    saw_cr: bool,
    header_bytes: usize,
    max_header_size: usize,
    body: BodyKind,
    is_multipart: bool,
}

impl RequestParser {
    /// Create a parser with the default 8 KiB header limit
    pub fn new() -> Self {
        Self::with_max_header_size(MAX_HEADER_SIZE)
    }

    /// Create a parser with a custom header block limit
    pub fn with_max_header_size(max_header_size: usize) -> Self {
        RequestParser {
            state: ParserState::None,
            request: Request::new(),
            buffer: Vec::new(),
            field: String::new(),
            value: Vec::new(),
            value_started: false,
            pending_header: false,
            saw_cr: false,
            header_bytes: 0,
            max_header_size,
            body: BodyKind::Empty,
            is_multipart: false,
        }
    }

    /// Whether no byte of a request has been seen yet
    pub fn is_idle(&self) -> bool {
        self.state == ParserState::None
    }

    /// Whether a complete request is ready to be taken
    pub fn is_complete(&self) -> bool {
        self.state == ParserState::MessageComplete
    }

    /// The request under construction
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Take the parsed request and reset for the next one
    pub fn take_request(&mut self) -> Request {
        let request = std::mem::take(&mut self.request);
        self.reset();
        request
    }

    /// Reset the parser, discarding any partial request
    pub fn reset(&mut self) {
        let max_header_size = self.max_header_size;
        *self = Self::with_max_header_size(max_header_size);
    }

    /// Consume input
    ///
    /// Stops at the end of a request; bytes beyond `consumed` belong to the
    /// next request on the connection.
    pub fn feed(&mut self, data: &[u8]) -> Result<ParseEvents, ParseError> {
        let mut events = ParseEvents::default();
        let mut pos = 0;

        while pos < data.len() {
            match self.state {
                ParserState::MessageComplete => break,
                ParserState::Body => {
                    pos += self.feed_body(&data[pos..])?;
                    if self.state == ParserState::MessageComplete {
                        events.message_complete = true;
                    }
                }
                _ => {
                    let byte = data[pos];
                    pos += 1;
                    self.header_bytes += 1;
                    if self.header_bytes > self.max_header_size {
                        return Err(ParseError::RequestEntityTooLarge);
                    }
                    self.step(byte)?;

                    if self.state == ParserState::HeadersComplete {
                        events.headers_complete = true;
                        events.expect_continue = self.expects_continue();
                        self.begin_body()?;
                        if self.state == ParserState::MessageComplete {
                            events.message_complete = true;
                        }
                    }
                }
            }
        }

        events.consumed = pos;
        Ok(events)
    }

    fn step(&mut self, byte: u8) -> Result<(), ParseError> {
        if self.saw_cr {
            self.saw_cr = false;
            if byte != b'\n' {
                return Err(bad_request("CR not followed by LF"));
            }
        } else if byte == b'\r' {
            self.saw_cr = true;
            return Ok(());
        }

        match self.state {
            ParserState::None => {
                // Stray line endings between keep-alive requests are skipped
                if byte != b'\n' {
                    self.state = ParserState::MessageBegin;
                    self.buffer.push(byte);
                }
            }
            ParserState::MessageBegin => match byte {
                b' ' => {
                    let method = String::from_utf8_lossy(&self.buffer).into_owned();
                    let method = Method::from_str(&method)
                        .map_err(|_| bad_request(format!("Unknown method {}", method)))?;
                    self.request.set_method(method);
                    self.buffer.clear();
                    self.state = ParserState::Url;
                }
                b'\n' => return Err(bad_request("Truncated request line")),
                _ => self.buffer.push(byte),
            },
            ParserState::Url => match byte {
                b' ' => {
                    if self.buffer.is_empty() {
                        return Err(bad_request("Empty request target"));
                    }
                    let target = String::from_utf8_lossy(&self.buffer).into_owned();
                    let (components, query) = parse_uri(&target);
                    self.request.set_target(components, query);
                    self.buffer.clear();
                    self.state = ParserState::Version;
                }
                b'\n' => return Err(bad_request("Missing protocol version")),
                _ => self.buffer.push(byte),
            },
            ParserState::Version => match byte {
                b'\n' => {
                    let version = String::from_utf8_lossy(&self.buffer).into_owned();
                    let version = match Version::from_str(version.trim_end()) {
                        Ok(v @ (Version::Http10 | Version::Http11)) => v,
                        _ => return Err(bad_request(format!("Unsupported version {}", version))),
                    };
                    self.request.set_version(version);
                    self.buffer.clear();
                    self.state = ParserState::HeaderField;
                }
                _ => self.buffer.push(byte),
            },
            ParserState::HeaderField => self.step_field(byte)?,
            ParserState::HeaderValue => match byte {
                b'\n' => {
                    self.pending_header = true;
                    self.state = ParserState::HeaderField;
                }
                b' ' | b'\t' if !self.value_started => {}
                _ => {
                    self.value_started = true;
                    self.value.push(byte);
                }
            },
            ParserState::HeadersComplete | ParserState::Body | ParserState::MessageComplete => {}
        }

        Ok(())
    }

    fn step_field(&mut self, byte: u8) -> Result<(), ParseError> {
        let line_start = self.buffer.is_empty();

        if line_start {
            match byte {
                b'\n' => {
                    self.flush_header();
                    self.state = ParserState::HeadersComplete;
                    return Ok(());
                }
                b' ' | b'\t' if self.pending_header => {
                    // Folded continuation of the previous value
                    self.pending_header = false;
                    self.value_started = true;
                    self.value.push(byte);
                    self.state = ParserState::HeaderValue;
                    return Ok(());
                }
                b' ' | b'\t' => return Err(bad_request("Whitespace before header name")),
                _ => self.flush_header(),
            }
        }

        match byte {
            b':' => {
                if self.buffer.is_empty() {
                    return Err(bad_request("Empty header name"));
                }
                self.field = String::from_utf8_lossy(&self.buffer).into_owned();
                self.buffer.clear();
                self.value.clear();
                self.value_started = false;
                self.state = ParserState::HeaderValue;
            }
            b'\n' => return Err(bad_request("Header line without a colon")),
            _ => self.buffer.push(byte),
        }
        Ok(())
    }

    fn flush_header(&mut self) {
        if !self.pending_header {
            return;
        }
        self.pending_header = false;

        while matches!(self.value.last(), Some(b' ' | b'\t')) {
            self.value.pop();
        }
        let value = String::from_utf8_lossy(&self.value).into_owned();
        let name = std::mem::take(&mut self.field);
        trace!(header = %name, "parsed header");
        self.request.add_header(name, value);
        self.value.clear();
    }

    fn expects_continue(&self) -> bool {
        self.request
            .header("expect")
            .map(|v| v.eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false)
    }

    fn begin_body(&mut self) -> Result<(), ParseError> {
        let chunked = self
            .request
            .header("transfer-encoding")
            .map(|te| te.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);

        self.body = if chunked {
            BodyKind::Chunked(ChunkedDecoder::new())
        } else if let Some(length) = self.request.header("content-length") {
            let length: usize = length
                .trim()
                .parse()
                .map_err(|_| bad_request(format!("Invalid Content-Length {}", length)))?;
            if length == 0 {
                BodyKind::Empty
            } else {
                BodyKind::Length(length)
            }
        } else {
            BodyKind::Empty
        };

        self.is_multipart = self
            .request
            .header("content-type")
            .map(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
            .unwrap_or(false);

        self.state = match self.body {
            BodyKind::Empty => ParserState::MessageComplete,
            _ => ParserState::Body,
        };
        Ok(())
    }

    fn feed_body(&mut self, data: &[u8]) -> Result<usize, ParseError> {
        match &mut self.body {
            BodyKind::Empty => {
                self.state = ParserState::MessageComplete;
                Ok(0)
            }
            BodyKind::Length(remaining) => {
                let n = (*remaining).min(data.len());
                *remaining -= n;
                let done = *remaining == 0;
                self.deliver_body(&data[..n])?;
                if done {
                    self.state = ParserState::MessageComplete;
                }
                Ok(n)
            }
            BodyKind::Chunked(decoder) => {
                let mut decoded = Vec::new();
                let consumed = decoder
                    .decode(data, &mut decoded)
                    .map_err(|e| bad_request(e.to_string()))?;
                let done = decoder.is_complete();
                self.deliver_body(&decoded)?;
                if done {
                    self.state = ParserState::MessageComplete;
                }
                Ok(consumed)
            }
        }
    }

    fn deliver_body(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        if bytes.is_empty() {
            return Ok(());
        }
        if !self.is_multipart {
            self.request.append_body(bytes);
            return Ok(());
        }

        if !self.request.is_multipart() {
            let content_type = self.request.header("content-type").unwrap_or_default();
            let reader =
                MultipartReader::new(content_type).map_err(|e| bad_request(e.to_string()))?;
            self.request.set_multipart(reader);
        }
        if let Some(reader) = self.request.multipart_mut() {
            reader
                .add_to_buffer(bytes)
                .map_err(|e| bad_request(e.to_string()))?;
        }
        Ok(())
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

fn bad_request(reason: impl Into<String>) -> ParseError {
    ParseError::BadRequest(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Result<Request, ParseError> {
        let mut parser = RequestParser::new();
        let events = parser.feed(input)?;
        assert!(events.message_complete, "request incomplete");
        Ok(parser.take_request())
    }

    #[test]
    fn test_simple_get() {
        let request = parse_all(b"GET /index.html?x=1 HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();
        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.path(), "/index.html");
        assert_eq!(request.query_string(), "x=1");
        assert_eq!(request.version(), Version::Http11);
        assert_eq!(request.header("host"), Some("a"));
    }

    #[test]
    fn test_bare_lf_accepted() {
        let request = parse_all(b"GET / HTTP/1.0\nHost: a\n\n").unwrap();
        assert_eq!(request.version(), Version::Http10);
        assert_eq!(request.header("Host"), Some("a"));
    }

    #[test]
    fn test_header_folding() {
        let request = parse_all(
            b"GET / HTTP/1.1\r\nX-Foo: bar\r\n bar\r\nX-Bar: foo\r\n  foo\r\nX-Empty:\r\n\r\n",
        )
        .unwrap();
        assert_eq!(request.header("x-foo"), Some("bar bar"));
        assert_eq!(request.header("x-bar"), Some("foo  foo"));
        assert_eq!(request.header("x-empty"), Some(""));
    }

    #[test]
    fn test_ows_trimmed() {
        let request = parse_all(b"GET / HTTP/1.1\r\nX-Pad: \t value \t\r\n\r\n").unwrap();
        assert_eq!(request.header("x-pad"), Some("value"));
    }

    #[test]
    fn test_repeated_headers_joined() {
        let request = parse_all(
            b"GET / HTTP/1.1\r\nCookie: a=1\r\nAccept: x\r\nCookie: b=2\r\nAccept: y\r\n\r\n",
        )
        .unwrap();
        assert_eq!(request.header("cookie"), Some("a=1; b=2"));
        assert_eq!(request.header("accept"), Some("x, y"));
    }

    #[test]
    fn test_byte_at_a_time() {
        let input = b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let mut parser = RequestParser::new();
        let mut complete = false;
        for byte in input.iter() {
            let events = parser.feed(std::slice::from_ref(byte)).unwrap();
            complete |= events.message_complete;
        }
        assert!(complete);
        let request = parser.take_request();
        assert_eq!(request.post_body_bytes(), Some(&b"hello"[..]));
        assert!(parser.is_idle());
    }

    #[test]
    fn test_chunked_body() {
        let request = parse_all(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n1\r\nA\r\n2\r\nBC\r\n0\r\n\r\n",
        )
        .unwrap();
        assert_eq!(request.post_body_bytes(), Some(&b"ABC"[..]));
    }

    #[test]
    fn test_consumed_stops_at_message_end() {
        let input = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let mut parser = RequestParser::new();
        let events = parser.feed(input).unwrap();
        assert!(events.message_complete);
        assert_eq!(events.consumed, 19);
        assert_eq!(parser.take_request().path(), "/a");

        let events = parser.feed(&input[19..]).unwrap();
        assert!(events.message_complete);
        assert_eq!(parser.take_request().path(), "/b");
    }

    #[test]
    fn test_expect_continue() {
        let mut parser = RequestParser::new();
        let events = parser
            .feed(b"POST / HTTP/1.1\r\nExpect: 100-Continue\r\nContent-Length: 2\r\n\r\n")
            .unwrap();
        assert!(events.headers_complete);
        assert!(events.expect_continue);
        assert!(!events.message_complete);

        let events = parser.feed(b"ok").unwrap();
        assert!(events.message_complete);
    }

    #[test]
    fn test_lone_cr_is_bad_request() {
        let mut parser = RequestParser::new();
        let err = parser.feed(b"GET / HTTP/1.1\r\nX-A: b\rc\r\n\r\n").unwrap_err();
        assert!(matches!(err, ParseError::BadRequest(_)));
        assert_eq!(err.status(), Status::BAD_REQUEST);
    }

    #[test]
    fn test_unknown_method_and_version() {
        let mut parser = RequestParser::new();
        assert!(matches!(
            parser.feed(b"BREW / HTTP/1.1\r\n\r\n"),
            Err(ParseError::BadRequest(_))
        ));

        let mut parser = RequestParser::new();
        assert!(matches!(
            parser.feed(b"GET / HTTP/3.0\r\n\r\n"),
            Err(ParseError::BadRequest(_))
        ));
    }

    #[test]
    fn test_invalid_content_length() {
        let mut parser = RequestParser::new();
        assert!(matches!(
            parser.feed(b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n"),
            Err(ParseError::BadRequest(_))
        ));
    }

    #[test]
    fn test_oversized_header_block() {
        let mut input = b"GET / HTTP/1.1\r\nX-Big: ".to_vec();
        input.extend(std::iter::repeat(b'a').take(MAX_HEADER_SIZE));
        input.extend_from_slice(b"\r\n\r\n");

        let mut parser = RequestParser::new();
        let err = parser.feed(&input).unwrap_err();
        assert_eq!(err, ParseError::RequestEntityTooLarge);
        assert_eq!(err.status().code(), 413);
    }

    #[test]
    fn test_multipart_body() {
        let body = b"--xx\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nv\r\n--xx--\r\n";
        let mut input = format!(
            "POST /up HTTP/1.1\r\n\
             Content-Type: multipart/form-data; boundary=xx\r\n\
             Content-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        input.extend_from_slice(body);

        let request = parse_all(&input).unwrap();
        assert!(request.post_body_bytes().is_none());
        assert_eq!(
            request.post_params(),
            vec![("f".to_string(), "v".to_string())]
        );
    }
}
