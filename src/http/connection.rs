//! HTTP/1.1 connection loop
//!
//! [`Http1Connection`] reads a session in chunks, feeds the
//! [`RequestParser`] and dispatches each complete request while the
//! connection stays keep-alive. A cleartext connection may instead open
//! with the HTTP/2 preface, in which case the session is handed back to the
//! caller for the HTTP/2 engine.

use super::dispatch::Dispatcher;
use super::h2::CONNECTION_PREFACE;
use super::parser::ParseError;
use super::writer::{wants_keep_alive, Http1Sink};
use super::{
    Error, FilterChain, Http1Config, HttpSession, Request, RequestParser, Response, Result,
    SessionOps, Version,
};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace};

const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// How an HTTP/1.1 connection ended
pub enum ConnectionOutcome<S: SessionOps> {
    /// The connection is closed
    Closed,
    /// The client sent the HTTP/2 preface; the session continues as HTTP/2
    /// with the preface already consumed
    H2Preface(HttpSession<S>),
}

/// Whether the connection continues after an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    KeepAlive,
    Close,
}

/// One HTTP/1.1 client connection
pub struct Http1Connection<S: SessionOps> {
    session: HttpSession<S>,
    dispatcher: Dispatcher,
    config: Http1Config,
    parser: RequestParser,
    server_name: String,
    detect_h2c: bool,
}

impl<S: SessionOps> Http1Connection<S> {
    pub fn new(session: HttpSession<S>, dispatcher: Dispatcher, config: Http1Config) -> Self {
        Http1Connection {
            session,
            dispatcher,
            parser: RequestParser::with_max_header_size(config.max_header_size),
            config,
            server_name: String::new(),
            detect_h2c: false,
        }
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Look for the HTTP/2 prior-knowledge preface before the first request
    pub fn detect_h2c(mut self, detect: bool) -> Self {
        self.detect_h2c = detect;
        self
    }

    /// Serve requests until the connection closes or turns out to be HTTP/2
    pub fn run(mut self) -> Result<ConnectionOutcome<S>> {
        self.session.set_timeout(Some(self.config.read_timeout));

        if self.detect_h2c {
            match self.sniff_preface() {
                Ok(true) => {
                    debug!(peer = ?self.session.peer_addr(), "HTTP/2 prior-knowledge preface");
                    return Ok(ConnectionOutcome::H2Preface(self.session));
                }
                Ok(false) => {}
                Err(Error::Timeout) | Err(Error::ConnectionClosed) => {
                    self.close();
                    return Ok(ConnectionOutcome::Closed);
                }
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }

        let result = self.serve_requests();
        self.close();
        result.map(|()| ConnectionOutcome::Closed)
    }

    /// Consume the HTTP/2 preface if the connection starts with it;
    /// otherwise push the bytes seen back for the parser
    fn sniff_preface(&mut self) -> Result<bool> {
        let mut seen = Vec::with_capacity(CONNECTION_PREFACE.len());
        let mut buf = [0u8; 24];
        while seen.len() < CONNECTION_PREFACE.len() {
            let want = CONNECTION_PREFACE.len() - seen.len();
            let n = self.session.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            seen.extend_from_slice(&buf[..n]);
            if !CONNECTION_PREFACE.starts_with(&seen) {
                break;
            }
        }

        if seen == CONNECTION_PREFACE {
            return Ok(true);
        }
        if seen.is_empty() {
            return Err(Error::ConnectionClosed);
        }
        self.session.unread(&seen);
        Ok(false)
    }

    fn serve_requests(&mut self) -> Result<()> {
        let mut buf = vec![0u8; self.config.read_chunk_size];
        loop {
            let n = match self.session.try_read(&mut buf)? {
                Some(n) => n,
                None => match self.session.read(&mut buf[..1]) {
                    Ok(n) => n,
                    Err(Error::Timeout) => return self.on_timeout(),
                    Err(e) => return Err(e),
                },
            };

            if n == 0 {
                trace!(idle = self.parser.is_idle(), "peer closed connection");
                return Ok(());
            }

            if self.process(&buf[..n])? == Flow::Close {
                return Ok(());
            }

            if n < buf.len() {
                thread::yield_now();
            }
        }
    }

    fn process(&mut self, mut data: &[u8]) -> Result<Flow> {
        while !data.is_empty() {
            let events = match self.parser.feed(data) {
                Ok(events) => events,
                Err(e) => {
                    self.send_error(&e)?;
                    return Ok(Flow::Close);
                }
            };

            if events.expect_continue {
                trace!("sending 100 Continue");
                self.session.write_all(CONTINUE_RESPONSE)?;
            }

            data = &data[events.consumed..];

            if self.parser.is_complete() {
                let request = self.parser.take_request();
                if self.serve(request) == Flow::Close {
                    return Ok(Flow::Close);
                }
            } else if events.consumed == 0 {
                break;
            }
        }
        Ok(Flow::KeepAlive)
    }

    fn serve(&mut self, mut request: Request) -> Flow {
        request.set_remote_addr(self.session.peer_addr());
        request.set_server_name(self.server_name.clone());

        let version = request.version();
        let keep_alive = wants_keep_alive(version, request.header("connection"));
        debug!(
            method = %request.method(),
            path = %request.path(),
            version = %version,
            keep_alive,
            "HTTP/1 request"
        );

        let sink = Http1Sink::new(&mut self.session, version, keep_alive);
        let mut response = Response::new(Box::new(sink), Arc::clone(self.dispatcher.filters()));
        let outcome = self.dispatcher.dispatch(request, &mut response);

        if keep_alive && !outcome.aborted && !outcome.close {
            Flow::KeepAlive
        } else {
            Flow::Close
        }
    }

    fn on_timeout(&mut self) -> Result<()> {
        if self.parser.is_idle() {
            trace!("idle keep-alive connection timed out");
            return Ok(());
        }
        debug!("request timed out");
        self.send_error(&ParseError::RequestTimeout)
    }

    /// Answer a broken request; filters do not see error responses
    fn send_error(&mut self, error: &ParseError) -> Result<()> {
        let status = error.status();
        debug!(status = status.code(), error = %error, "rejecting request");

        let sink = Http1Sink::new(&mut self.session, Version::Http11, false);
        let mut response = Response::new(Box::new(sink), Arc::new(FilterChain::new()));
        response.set_status(status);
        response.set_header("Content-Type", "text/plain");
        response.set_header("Connection", "close");
        response.set_body(status.reason_phrase());
        response.completed()
    }

    fn close(&mut self) {
        if let Err(e) = self.session.close() {
            trace!(error = %e, "close after HTTP/1 connection");
        }
    }
}
