//! HTTP/2 server connection
//!
//! One [`H2Connection`] drives one client connection with three threads:
//!
//! - a reader that pulls whole frames off the transport and queues them,
//! - a writer that drains the outbound queue (PING ACKs first),
//! - the processing loop on the calling thread, which owns the HPACK
//!   decoder and applies every inbound frame to the connection state.
//!
//! Each request is served on its own thread through a [`StreamSink`], which
//! blocks on the window condition variable whenever flow control runs dry.
//! The stream map, flow control windows and peer settings live under one
//! mutex; the HPACK encoder lives with the outbound queue so header blocks
//! are encoded in wire order.

use super::codec::FrameCodec;
use super::error::{Error, ErrorCode, Result};
use super::flow_control::ConnectionFlowControl;
use super::frames::*;
use super::hpack::{HeaderDecoder, HeaderEncoder, HeaderField};
use super::settings::Settings;
use super::stream::{StreamId, StreamManager};
use super::{CONNECTION_PREFACE, DEFAULT_INITIAL_WINDOW_SIZE};
use crate::http::dispatch::Dispatcher;
use crate::http::multipart::MultipartReader;
use crate::http::session::{poll_fd, PollEvents};
use crate::http::url::parse_uri;
use crate::http::{
    Error as HttpError, H2Config, Headers, HttpSession, Method, Request, Response, ResponseSink,
    Result as HttpResult, SessionOps, Status, Version,
};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// How long the reader holds the transport while waiting for input when
/// the transport has no descriptor to wait on
const POLL_SLICE: Duration = Duration::from_millis(5);

/// How long the reader waits on the descriptor between closed checks
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Response headers that are meaningless in HTTP/2
const CONNECTION_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Event handed from the reader to the processing loop
#[derive(Debug)]
enum Inbound {
    Frame(Frame),
    /// No frame arrived within the idle timeout
    Timeout,
    /// The transport is gone; a connection error is answered with GOAWAY
    Closed(Option<Error>),
}

#[derive(Default)]
struct InboundQueue {
    items: Mutex<VecDeque<Inbound>>,
    ready: Condvar,
}

impl InboundQueue {
    fn push(&self, item: Inbound) {
        lock(&self.items).push_back(item);
        self.ready.notify_one();
    }

    fn pop(&self) -> Inbound {
        let mut items = lock(&self.items);
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = self.ready.wait(items).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Connection state shared with the stream exchanges
struct SharedState {
    streams: StreamManager,
    flow: ConnectionFlowControl,
    peer: Settings,
    closed: bool,
}

struct QueuedFrame {
    bytes: Bytes,
    /// Set on the frame carrying a stream's END_STREAM
    completes_stream: Option<StreamId>,
}

struct Outbound {
    encoder: HeaderEncoder,
    urgent: VecDeque<QueuedFrame>,
    normal: VecDeque<QueuedFrame>,
    /// No more frames are accepted; the writer drains and exits
    closing: bool,
    /// The writer must stop even if frames are left
    stopped: bool,
}

impl Outbound {
    fn is_empty(&self) -> bool {
        self.urgent.is_empty() && self.normal.is_empty()
    }
}

struct Shared {
    state: Mutex<SharedState>,
    window_cv: Condvar,
    outbound: Mutex<Outbound>,
    outbound_cv: Condvar,
}

impl Shared {
    fn enqueue(&self, bytes: Bytes, completes_stream: Option<StreamId>, urgent: bool) -> bool {
        let mut out = lock(&self.outbound);
        if out.closing || out.stopped {
            return false;
        }
        let frame = QueuedFrame {
            bytes,
            completes_stream,
        };
        if urgent {
            out.urgent.push_back(frame);
        } else {
            out.normal.push_back(frame);
        }
        drop(out);
        self.outbound_cv.notify_all();
        true
    }

    fn send_rst(&self, stream_id: StreamId, code: ErrorCode) {
        let frame = RstStreamFrame::new(stream_id, code);
        self.enqueue(FrameCodec::encode_rst_stream_frame(&frame), None, false);
    }

    /// Mark the connection closed and wake every waiter
    fn shutdown(&self) {
        lock(&self.state).closed = true;
        self.window_cv.notify_all();
        lock(&self.outbound).closing = true;
        self.outbound_cv.notify_all();
    }

    fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Waiting for the client's first SETTINGS
    Setup,
    Active,
}

/// What the processing loop does after a frame
enum Next {
    Continue,
    Shutdown,
}

/// Server side of one HTTP/2 connection
pub struct H2Connection<S: SessionOps + Send + 'static> {
    transport: Arc<Mutex<HttpSession<S>>>,
    dispatcher: Dispatcher,
    config: H2Config,
    server_name: String,
    preface_received: bool,
}

impl<S: SessionOps + Send + 'static> H2Connection<S> {
    pub fn new(session: HttpSession<S>, dispatcher: Dispatcher, config: H2Config) -> Self {
        H2Connection {
            transport: Arc::new(Mutex::new(session)),
            dispatcher,
            config,
            server_name: String::new(),
            preface_received: false,
        }
    }

    /// Name reported to handlers through [`Request::server_name`]
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// The client preface was already consumed, as when it was sniffed on
    /// a cleartext connection
    pub fn preface_received(mut self, received: bool) -> Self {
        self.preface_received = received;
        self
    }

    /// Serve the connection until either side ends it
    pub fn run(self) -> Result<()> {
        let peer = lock(&self.transport).peer_addr();

        if !self.preface_received {
            let mut preface = [0u8; 24];
            let read = lock(&self.transport).read_exact(&mut preface);
            match read {
                Ok(()) if preface[..] == CONNECTION_PREFACE[..] => {}
                Ok(()) => {
                    // Not HTTP/2 at all, so no GOAWAY either
                    let _ = lock(&self.transport).close();
                    return Err(Error::Protocol("Invalid connection preface".to_string()));
                }
                Err(e) => {
                    let _ = lock(&self.transport).close();
                    return Err(e.into());
                }
            }
        }

        let local = self.config.settings.clone();
        let shared = Arc::new(Shared {
            state: Mutex::new(SharedState {
                streams: StreamManager::new(
                    local.get_max_concurrent_streams(),
                    DEFAULT_INITIAL_WINDOW_SIZE,
                    local.get_initial_window_size(),
                ),
                flow: ConnectionFlowControl::new(),
                peer: Settings::new(),
                closed: false,
            }),
            window_cv: Condvar::new(),
            outbound: Mutex::new(Outbound {
                encoder: HeaderEncoder::new(),
                urgent: VecDeque::new(),
                normal: VecDeque::new(),
                closing: false,
                stopped: false,
            }),
            outbound_cv: Condvar::new(),
        });
        let queue = Arc::new(InboundQueue::default());

        shared.enqueue(
            FrameCodec::encode_settings_frame(&SettingsFrame::new(local.clone())),
            None,
            false,
        );

        let writer = spawn_writer(Arc::clone(&shared), Arc::clone(&self.transport))?;
        let reader = match spawn_reader(
            Arc::clone(&shared),
            Arc::clone(&queue),
            Arc::clone(&self.transport),
            local.get_max_frame_size() as usize,
            self.config.idle_timeout,
        ) {
            Ok(reader) => reader,
            Err(e) => {
                shared.shutdown();
                lock(&shared.outbound).stopped = true;
                shared.outbound_cv.notify_all();
                let _ = writer.join();
                return Err(e);
            }
        };

        debug!(peer = ?peer, "HTTP/2 connection established");

        let mut processor = Processor {
            shared: Arc::clone(&shared),
            decoder: HeaderDecoder::with_max_table_size(local.get_header_table_size()),
            state: SessionState::Setup,
            continuation: None,
            discarded: None,
            dispatcher: self.dispatcher.clone(),
            peer,
            server_name: self.server_name.clone(),
            exchanges: Vec::new(),
        };
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| processor.run(&queue))) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(peer = ?peer, "HTTP/2 processing loop panicked");
                processor.go_away(ErrorCode::InternalError, "internal error");
                Err(Error::Internal("processing loop panicked".to_string()))
            }
        };

        // Teardown: wake waiters, drain queued frames (bounded), stop threads
        shared.shutdown();
        {
            let out = lock(&shared.outbound);
            let (mut out, _) = shared
                .outbound_cv
                .wait_timeout_while(out, self.config.drain_timeout, |o| !o.is_empty() && !o.stopped)
                .unwrap_or_else(PoisonError::into_inner);
            out.stopped = true;
        }
        shared.outbound_cv.notify_all();

        let _ = writer.join();
        let _ = reader.join();
        if let Err(e) = lock(&self.transport).close() {
            trace!(error = %e, "close after HTTP/2 teardown");
        }

        let reset = lock(&shared.state).streams.reset_all();
        for exchange in processor.exchanges.drain(..) {
            let _ = exchange.join();
        }
        debug!(peer = ?peer, reset, "HTTP/2 connection closed");

        outcome
    }
}

fn spawn_writer<S: SessionOps + Send + 'static>(
    shared: Arc<Shared>,
    transport: Arc<Mutex<HttpSession<S>>>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("h2-writer".to_string())
        .spawn(move || write_loop(&shared, &transport))?;
    Ok(handle)
}

fn write_loop<S: SessionOps>(shared: &Shared, transport: &Mutex<HttpSession<S>>) {
    loop {
        let batch: Vec<QueuedFrame> = {
            let mut out = lock(&shared.outbound);
            while out.is_empty() && !out.closing && !out.stopped {
                out = shared.outbound_cv.wait(out).unwrap_or_else(PoisonError::into_inner);
            }
            if out.stopped || out.is_empty() {
                // Nothing left to drain
                out.stopped = true;
                drop(out);
                shared.outbound_cv.notify_all();
                return;
            }
            let mut batch: Vec<QueuedFrame> = out.urgent.drain(..).collect();
            batch.extend(out.normal.drain(..));
            batch
        };

        let mut bytes = BytesMut::with_capacity(batch.iter().map(|f| f.bytes.len()).sum());
        for frame in &batch {
            bytes.extend_from_slice(&frame.bytes);
        }

        let written = lock(transport).write_all(&bytes);
        if let Err(e) = written {
            debug!(error = %e, "HTTP/2 write failed");
            shared.shutdown();
            lock(&shared.outbound).stopped = true;
            shared.outbound_cv.notify_all();
            return;
        }

        let completed: Vec<StreamId> = batch.iter().filter_map(|f| f.completes_stream).collect();
        if !completed.is_empty() {
            let mut state = lock(&shared.state);
            for id in completed {
                state.streams.remove_stream(id);
                trace!(stream_id = id, "stream complete");
            }
            drop(state);
            shared.window_cv.notify_all();
        }
        // Lets the teardown drain wait observe an empty queue
        shared.outbound_cv.notify_all();
    }
}

fn spawn_reader<S: SessionOps + Send + 'static>(
    shared: Arc<Shared>,
    queue: Arc<InboundQueue>,
    transport: Arc<Mutex<HttpSession<S>>>,
    max_frame_size: usize,
    idle_timeout: Duration,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("h2-reader".to_string())
        .spawn(move || {
            let last = read_loop(&shared, &queue, &transport, max_frame_size, idle_timeout);
            queue.push(last);
        })?;
    Ok(handle)
}

/// Read frames until the connection ends; returns the final event
fn read_loop<S: SessionOps>(
    shared: &Shared,
    queue: &InboundQueue,
    transport: &Mutex<HttpSession<S>>,
    max_frame_size: usize,
    idle_timeout: Duration,
) -> Inbound {
    let mut last_frame = Instant::now();
    let fd = lock(transport).raw_fd();
    // With a descriptor the transport is only held for a non-blocking check
    let slice = if fd.is_some() { Duration::ZERO } else { POLL_SLICE };
    loop {
        if shared.is_closed() {
            return Inbound::Closed(None);
        }

        let mut session = lock(transport);
        match session.poll_read(Some(slice)) {
            Ok(true) => {}
            Ok(false) => {
                drop(session);
                if last_frame.elapsed() >= idle_timeout {
                    return Inbound::Timeout;
                }
                match fd {
                    Some(fd) => {
                        let _ = poll_fd(fd, PollEvents::Read, Some(IDLE_WAIT));
                    }
                    None => thread::yield_now(),
                }
                continue;
            }
            Err(e) => return Inbound::Closed(Some(e.into())),
        }

        let read = FrameCodec::read_frame_from_session(&mut *session, max_frame_size);
        drop(session);

        match read {
            Ok(frame) => {
                last_frame = Instant::now();
                trace!(
                    frame_type = frame.frame_type.name(),
                    stream_id = frame.stream_id,
                    length = frame.payload.len(),
                    "frame received"
                );
                queue.push(Inbound::Frame(frame));
            }
            Err(Error::ConnectionClosed) => return Inbound::Closed(None),
            Err(e @ Error::FrameSize(_)) => return Inbound::Closed(Some(e)),
            Err(e) => {
                debug!(error = %e, "HTTP/2 read failed");
                return Inbound::Closed(None);
            }
        }
    }
}

/// Header block whose stream was rejected before END_HEADERS
struct DiscardedBlock {
    block: Vec<u8>,
    /// Stream error answered once the block is decoded
    error: Error,
}

/// Processing loop state; lives on the connection thread
struct Processor {
    shared: Arc<Shared>,
    decoder: HeaderDecoder,
    state: SessionState,
    /// Stream whose header block is still open
    continuation: Option<StreamId>,
    /// Header block of a rejected stream, decoded only to keep HPACK in sync
    discarded: Option<DiscardedBlock>,
    dispatcher: Dispatcher,
    peer: Option<SocketAddr>,
    server_name: String,
    exchanges: Vec<JoinHandle<()>>,
}

impl Processor {
    fn run(&mut self, queue: &InboundQueue) -> Result<()> {
        loop {
            match queue.pop() {
                Inbound::Frame(frame) => match self.handle_frame(frame) {
                    Ok(Next::Continue) => {}
                    Ok(Next::Shutdown) => return Ok(()),
                    Err(e) => match e.stream_id() {
                        Some(stream_id) => self.reset_stream(stream_id, e.code(), &e),
                        None => {
                            self.go_away(e.code(), &e.to_string());
                            return Err(e);
                        }
                    },
                },
                Inbound::Timeout => {
                    info!(peer = ?self.peer, "HTTP/2 connection idle, closing");
                    self.go_away(ErrorCode::NoError, "idle timeout");
                    return Ok(());
                }
                Inbound::Closed(None) => return Ok(()),
                Inbound::Closed(Some(e)) => {
                    self.go_away(e.code(), &e.to_string());
                    return Err(e);
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<Next> {
        match self.continuation {
            Some(id) if frame.frame_type != FrameType::Continuation || frame.stream_id != id => {
                return Err(Error::Protocol(format!(
                    "Expected CONTINUATION on stream {}, got {} on stream {}",
                    id,
                    frame.frame_type.name(),
                    frame.stream_id
                )));
            }
            None if frame.frame_type == FrameType::Continuation => {
                return Err(Error::Protocol(format!(
                    "CONTINUATION on stream {} outside a header block",
                    frame.stream_id
                )));
            }
            _ => {}
        }

        if self.state == SessionState::Setup
            && (frame.frame_type != FrameType::Settings || frame.flags.is_ack())
        {
            return Err(Error::Protocol(format!(
                "{} before the client SETTINGS",
                frame.frame_type.name()
            )));
        }

        match frame.frame_type {
            FrameType::Settings => self.on_settings(&frame),
            FrameType::Ping => self.on_ping(&frame),
            FrameType::Goaway => {
                let goaway = GoawayFrame::parse(&frame)?;
                info!(
                    peer = ?self.peer,
                    last_stream_id = goaway.last_stream_id,
                    code = %goaway.error_code,
                    debug = %String::from_utf8_lossy(&goaway.debug_data),
                    "client sent GOAWAY"
                );
                return Ok(Next::Shutdown);
            }
            FrameType::WindowUpdate => self.on_window_update(&frame),
            FrameType::Headers => self.on_headers(&frame),
            FrameType::Continuation => self.on_continuation(&frame),
            FrameType::Data => self.on_data(&frame),
            FrameType::Priority => PriorityFrame::parse(&frame).map(|_| ()),
            FrameType::RstStream => self.on_rst_stream(&frame),
            FrameType::PushPromise => Err(Error::Protocol("PUSH_PROMISE from client".to_string())),
        }?;

        Ok(Next::Continue)
    }

    fn on_settings(&mut self, frame: &Frame) -> Result<()> {
        let settings = SettingsFrame::parse(frame)?;
        if settings.ack {
            trace!("SETTINGS acknowledged");
            return Ok(());
        }

        {
            let mut state = lock(&self.shared.state);
            if let Some(size) = settings.settings.initial_window_size {
                state.streams.update_send_initial_size(size)?;
            }
            state.peer.merge(&settings.settings);
        }
        self.shared.window_cv.notify_all();

        if let Some(size) = settings.settings.header_table_size {
            // Applied before the ACK so later response blocks respect it
            lock(&self.shared.outbound).encoder.set_max_table_size(size);
        }

        self.shared.enqueue(
            FrameCodec::encode_settings_frame(&SettingsFrame::ack()),
            None,
            false,
        );
        if self.state == SessionState::Setup {
            debug!(peer = ?self.peer, "HTTP/2 session active");
            self.state = SessionState::Active;
        }
        Ok(())
    }

    fn on_ping(&mut self, frame: &Frame) -> Result<()> {
        let ping = PingFrame::parse(frame)?;
        if !ping.ack {
            self.shared
                .enqueue(FrameCodec::encode_ping_frame(&PingFrame::ack(ping.data)), None, true);
        }
        Ok(())
    }

    fn on_window_update(&mut self, frame: &Frame) -> Result<()> {
        let update = WindowUpdateFrame::parse(frame)?;
        {
            let mut state = lock(&self.shared.state);
            if update.stream_id == 0 {
                state.flow.increase_send_window(update.size_increment)?;
            } else if let Some(stream) = state.streams.get_stream_mut(update.stream_id) {
                stream
                    .flow_control_mut()
                    .increase_send_window(update.size_increment)
                    .map_err(|e| {
                        Error::stream(update.stream_id, ErrorCode::FlowControlError, e.to_string())
                    })?;
            } else {
                trace!(stream_id = update.stream_id, "WINDOW_UPDATE for a finished stream");
            }
        }
        self.shared.window_cv.notify_all();
        Ok(())
    }

    fn on_headers(&mut self, frame: &Frame) -> Result<()> {
        if frame.stream_id == 0 {
            return Err(Error::Protocol("HEADERS on stream 0".to_string()));
        }
        let headers = HeadersFrame::parse(frame)?;
        let id = headers.stream_id;

        let rejected = {
            let mut state = lock(&self.shared.state);
            let received = if state.streams.get_stream(id).is_some() {
                match state.streams.get_stream_mut(id) {
                    Some(stream) => stream.receive_headers(&headers),
                    None => Ok(()),
                }
            } else {
                state
                    .streams
                    .open(id)
                    .and_then(|stream| stream.receive_headers(&headers))
            };
            match received {
                Ok(()) => None,
                Err(e) if e.stream_id().is_some() => Some(e),
                Err(e) => return Err(e),
            }
        };

        if let Some(error) = rejected {
            debug!(stream_id = id, error = %error, "discarding header block");
            if headers.end_headers {
                self.decoder.decode(&headers.header_block)?;
                return Err(error);
            }
            self.discarded = Some(DiscardedBlock {
                block: headers.header_block.to_vec(),
                error,
            });
            self.continuation = Some(id);
            return Ok(());
        }

        if headers.end_headers {
            self.complete_headers(id)
        } else {
            self.continuation = Some(id);
            Ok(())
        }
    }

    fn on_continuation(&mut self, frame: &Frame) -> Result<()> {
        let cont = ContinuationFrame::parse(frame);
        let id = cont.stream_id;

        if let Some(discarded) = self.discarded.as_mut() {
            discarded.block.extend_from_slice(&cont.header_block);
            if cont.end_headers {
                self.continuation = None;
                if let Some(discarded) = self.discarded.take() {
                    self.decoder.decode(&discarded.block)?;
                    return Err(discarded.error);
                }
            }
            return Ok(());
        }

        {
            let mut state = lock(&self.shared.state);
            let stream = state
                .streams
                .get_stream_mut(id)
                .ok_or_else(|| Error::Protocol(format!("CONTINUATION for unknown stream {}", id)))?;
            stream.receive_continuation(&cont)?;
        }

        if cont.end_headers {
            self.continuation = None;
            self.complete_headers(id)?;
        }
        Ok(())
    }

    /// Decode a finished header block and dispatch if the request is complete
    fn complete_headers(&mut self, id: StreamId) -> Result<()> {
        let (block, trailers) = {
            let mut state = lock(&self.shared.state);
            match state.streams.get_stream_mut(id) {
                Some(stream) => (stream.take_header_block(), stream.is_trailers()),
                None => return Ok(()),
            }
        };

        // Decoding failures are connection errors even for trailers
        let fields = self.decoder.decode(&block)?;
        if trailers {
            trace!(stream_id = id, count = fields.len(), "trailers ignored");
        } else {
            let request = self.build_request(id, fields)?;
            let mut state = lock(&self.shared.state);
            if let Some(stream) = state.streams.get_stream_mut(id) {
                stream.set_request(request);
            }
        }

        self.maybe_dispatch(id)
    }

    fn build_request(&self, id: StreamId, fields: Vec<HeaderField>) -> Result<Request> {
        let malformed = |reason: String| Error::stream(id, ErrorCode::ProtocolError, reason);

        let mut request = Request::new();
        request.set_version(Version::Http2);
        request.set_remote_addr(self.peer);
        request.set_server_name(self.server_name.clone());

        let mut method = None;
        let mut path = None;
        for (name, value) in fields {
            let name = String::from_utf8_lossy(&name).into_owned();
            let value = String::from_utf8_lossy(&value).into_owned();
            match name.as_str() {
                ":method" => {
                    method = Some(Method::from_str(&value).map_err(|e| malformed(e.to_string()))?)
                }
                ":path" => path = Some(value),
                ":authority" => request.set_header("Host", value),
                ":scheme" => {}
                other if other.starts_with(':') => {
                    return Err(malformed(format!("Unknown pseudo-header {}", other)));
                }
                _ => request.add_header(name, value),
            }
        }

        let (Some(method), Some(path)) = (method, path) else {
            return Err(malformed("Missing :method or :path".to_string()));
        };
        request.set_method(method);
        let (components, query) = parse_uri(&path);
        request.set_target(components, query);

        let multipart = request
            .header("content-type")
            .filter(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
            .map(str::to_string);
        if let Some(content_type) = multipart {
            let reader = MultipartReader::new(&content_type).map_err(|e| malformed(e.to_string()))?;
            request.set_multipart(reader);
        }

        Ok(request)
    }

    fn on_data(&mut self, frame: &Frame) -> Result<()> {
        if frame.stream_id == 0 {
            return Err(Error::Protocol("DATA on stream 0".to_string()));
        }
        let data = DataFrame::parse(frame)?;
        let id = data.stream_id;
        let wire_len = frame.payload.len();

        let mut updates = Vec::new();
        let result = {
            let mut state = lock(&self.shared.state);
            state.flow.consume_recv_window(wire_len)?;
            if let Some(increment) = state.flow.should_send_window_update() {
                state.flow.send_window_update(increment)?;
                updates.push(WindowUpdateFrame::new(0, increment));
            }

            match state.streams.get_stream_mut(id) {
                None => Err(Error::stream(id, ErrorCode::StreamClosed, "DATA on unknown stream")),
                Some(stream) => stream.receive_data(&data, wire_len).map(|()| {
                    if !data.end_stream {
                        if let Some(increment) = stream.flow_control().should_send_window_update() {
                            if stream.flow_control_mut().send_window_update(increment).is_ok() {
                                updates.push(WindowUpdateFrame::new(id, increment));
                            }
                        }
                    }
                }),
            }
        };

        for update in &updates {
            self.shared
                .enqueue(FrameCodec::encode_window_update_frame(update), None, false);
        }
        result?;

        if data.end_stream {
            self.maybe_dispatch(id)?;
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, frame: &Frame) -> Result<()> {
        let rst = RstStreamFrame::parse(frame)?;
        let removed = lock(&self.shared.state).streams.remove_stream(rst.stream_id);
        if let Some(mut stream) = removed {
            stream.reset();
            debug!(stream_id = rst.stream_id, code = %rst.error_code, "stream reset by client");
        }
        self.shared.window_cv.notify_all();
        Ok(())
    }

    fn maybe_dispatch(&mut self, id: StreamId) -> Result<()> {
        let request = {
            let mut state = lock(&self.shared.state);
            match state.streams.get_stream_mut(id) {
                Some(stream) => stream.take_request_for_dispatch(),
                None => None,
            }
        };
        let Some(request) = request else {
            return Ok(());
        };

        debug!(stream_id = id, method = %request.method(), path = %request.path(), "dispatching");

        let shared = Arc::clone(&self.shared);
        let dispatcher = self.dispatcher.clone();
        let handle = thread::Builder::new()
            .name(format!("h2-stream-{}", id))
            .spawn(move || {
                let sink = StreamSink::new(shared, id);
                let mut response = Response::new(Box::new(sink), Arc::clone(dispatcher.filters()));
                let outcome = dispatcher.dispatch(request, &mut response);
                if outcome.aborted {
                    debug!(stream_id = id, "exchange aborted");
                }
            })?;

        self.exchanges.retain(|h| !h.is_finished());
        self.exchanges.push(handle);
        Ok(())
    }

    fn reset_stream(&mut self, id: StreamId, code: ErrorCode, reason: &Error) {
        debug!(stream_id = id, code = %code, reason = %reason, "resetting stream");
        if let Some(mut stream) = lock(&self.shared.state).streams.remove_stream(id) {
            stream.reset();
        }
        self.shared.window_cv.notify_all();
        self.shared.send_rst(id, code);
    }

    fn go_away(&mut self, code: ErrorCode, reason: &str) {
        let last_stream_id = lock(&self.shared.state).streams.last_stream_id();
        if code == ErrorCode::NoError {
            debug!(peer = ?self.peer, last_stream_id, "sending GOAWAY");
        } else {
            warn!(peer = ?self.peer, code = %code, reason, "connection error, sending GOAWAY");
        }
        let debug_data = Bytes::copy_from_slice(reason.as_bytes());
        let frame = GoawayFrame::new(last_stream_id, code, debug_data);
        self.shared
            .enqueue(FrameCodec::encode_goaway_frame(&frame), None, false);
    }
}

/// Response sink writing one HTTP/2 stream
///
/// Refers to its stream by id only; a stream that disappears from the map
/// (reset or connection closed) turns every later write into an abort.
pub struct StreamSink {
    shared: Arc<Shared>,
    stream_id: StreamId,
    end_stream_sent: bool,
}

impl StreamSink {
    fn new(shared: Arc<Shared>, stream_id: StreamId) -> Self {
        StreamSink {
            shared,
            stream_id,
            end_stream_sent: false,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Wait until some send window is open and take up to `want` bytes of it
    fn reserve(&self, want: usize, end_stream: bool) -> HttpResult<usize> {
        let mut state = lock(&self.shared.state);
        loop {
            if state.closed {
                return Err(HttpError::ConnectionClosed);
            }
            let max_frame = state.peer.get_max_frame_size() as i64;
            let conn_window = state.flow.send_window().size();
            let stream = state
                .streams
                .get_stream(self.stream_id)
                .ok_or(HttpError::Aborted)?;
            let available = conn_window
                .min(stream.flow_control().send_window().size())
                .min(max_frame);

            if available > 0 {
                let granted = (available as usize).min(want);
                state.flow.consume_send_window(granted);
                let stream = state
                    .streams
                    .get_stream_mut(self.stream_id)
                    .ok_or(HttpError::Aborted)?;
                stream
                    .send_data(granted, end_stream && granted == want)
                    .map_err(|_| HttpError::Aborted)?;
                return Ok(granted);
            }

            trace!(stream_id = self.stream_id, "waiting for send window");
            state = self
                .shared
                .window_cv
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn queue_data(&mut self, data: &[u8], end_stream: bool) -> HttpResult<()> {
        let frame = DataFrame::new(self.stream_id, Bytes::copy_from_slice(data), end_stream);
        let completes = end_stream.then_some(self.stream_id);
        if !self
            .shared
            .enqueue(FrameCodec::encode_data_frame(&frame), completes, false)
        {
            return Err(HttpError::ConnectionClosed);
        }
        if end_stream {
            self.end_stream_sent = true;
        }
        Ok(())
    }
}

impl ResponseSink for StreamSink {
    fn frame_headers(&mut self, headers: &mut Headers, streaming: bool, body_len: usize) {
        for name in CONNECTION_HEADERS {
            headers.remove(name);
        }
        if !streaming && !headers.contains("content-length") {
            headers.insert("Content-Length", body_len.to_string());
        }
    }

    fn send_head(&mut self, status: Status, headers: &Headers, end_stream: bool) -> HttpResult<()> {
        let max_frame = {
            let mut state = lock(&self.shared.state);
            if state.closed {
                return Err(HttpError::ConnectionClosed);
            }
            let max_frame = state.peer.get_max_frame_size() as usize;
            let stream = state
                .streams
                .get_stream_mut(self.stream_id)
                .ok_or(HttpError::Aborted)?;
            stream.send_headers(end_stream).map_err(|_| HttpError::Aborted)?;
            max_frame
        };

        let code = status.code().to_string();
        let lowered: Vec<(String, &str)> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .filter(|(name, _)| !CONNECTION_HEADERS.contains(&name.as_str()))
            .collect();
        let fields = std::iter::once((":status", code.as_str()))
            .chain(lowered.iter().map(|(name, value)| (name.as_str(), *value)));

        let mut out = lock(&self.shared.outbound);
        if out.closing || out.stopped {
            return Err(HttpError::ConnectionClosed);
        }
        let block = out
            .encoder
            .encode(fields)
            .map_err(|e| HttpError::Protocol(e.to_string()))?;
        let bytes = FrameCodec::encode_header_block(self.stream_id, &block, end_stream, max_frame);
        out.normal.push_back(QueuedFrame {
            bytes,
            completes_stream: end_stream.then_some(self.stream_id),
        });
        drop(out);
        self.shared.outbound_cv.notify_all();

        if end_stream {
            self.end_stream_sent = true;
        }
        Ok(())
    }

    fn send_body(&mut self, data: &[u8], end_stream: bool) -> HttpResult<()> {
        let mut remaining = data;
        while !remaining.is_empty() {
            let granted = self.reserve(remaining.len(), end_stream)?;
            let (chunk, rest) = remaining.split_at(granted);
            remaining = rest;
            self.queue_data(chunk, end_stream && remaining.is_empty())?;
        }
        Ok(())
    }

    fn finish(&mut self) -> HttpResult<()> {
        if self.end_stream_sent {
            return Ok(());
        }
        {
            let mut state = lock(&self.shared.state);
            let stream = state
                .streams
                .get_stream_mut(self.stream_id)
                .ok_or(HttpError::Aborted)?;
            stream.send_data(0, true).map_err(|_| HttpError::Aborted)?;
        }
        self.queue_data(&[], true)
    }

    fn abort(&mut self) {
        if self.end_stream_sent {
            return;
        }
        self.end_stream_sent = true;
        if let Some(mut stream) = lock(&self.shared.state).streams.remove_stream(self.stream_id) {
            stream.reset();
            self.shared.send_rst(self.stream_id, ErrorCode::Cancel);
        }
        self.shared.window_cv.notify_all();
    }
}
