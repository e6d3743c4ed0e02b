//! HTTP/2 stream management
//!
//! This module implements the server side of the stream lifecycle from
//! RFC 7540 Section 5.1. Streams are opened by client HEADERS frames only;
//! the session refers to them by id and never hands out references that
//! outlive the stream map lock.

use super::error::{Error, ErrorCode, Result};
use super::flow_control::StreamFlowControl;
use super::frames::{ContinuationFrame, DataFrame, HeadersFrame, PrioritySpec};
use crate::http::Request;
use std::collections::HashMap;

/// Stream ID type
pub type StreamId = u32;

/// Stream state as defined in RFC 7540 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// HTTP/2 stream
#[derive(Debug)]
pub struct H2Stream {
    id: StreamId,
    state: StreamState,
    flow_control: StreamFlowControl,
    priority: Option<PrioritySpec>,
    /// Header block fragments awaiting END_HEADERS
    header_block: Vec<u8>,
    end_of_headers: bool,
    /// END_STREAM arrived on a HEADERS frame whose block is still open
    pending_end_stream: bool,
    /// The current header block is a trailer section
    trailers: bool,
    request: Option<Request>,
    dispatched: bool,
    end_stream_sent: bool,
}

impl H2Stream {
    /// Create a new idle stream
    pub fn new(id: StreamId) -> Self {
        Self::with_window_sizes(
            id,
            super::DEFAULT_INITIAL_WINDOW_SIZE,
            super::DEFAULT_INITIAL_WINDOW_SIZE,
        )
    }

    /// Create a new stream with specified window sizes
    pub fn with_window_sizes(id: StreamId, send_size: u32, recv_size: u32) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            flow_control: StreamFlowControl::with_initial_sizes(id, send_size, recv_size),
            priority: None,
            header_block: Vec::new(),
            end_of_headers: false,
            pending_end_stream: false,
            trailers: false,
            request: None,
            dispatched: false,
            end_stream_sent: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn flow_control(&self) -> &StreamFlowControl {
        &self.flow_control
    }

    pub fn flow_control_mut(&mut self) -> &mut StreamFlowControl {
        &mut self.flow_control
    }

    pub fn priority(&self) -> Option<&PrioritySpec> {
        self.priority.as_ref()
    }

    pub fn set_priority(&mut self, priority: PrioritySpec) {
        self.priority = Some(priority);
    }

    /// Check if the header block has ended
    pub fn end_of_headers(&self) -> bool {
        self.end_of_headers
    }

    /// Check if the completed header block was a trailer section
    pub fn is_trailers(&self) -> bool {
        self.trailers
    }

    /// Take the accumulated header block once END_HEADERS arrived
    pub fn take_header_block(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.header_block)
    }

    /// Request built from the decoded header block
    pub fn request_mut(&mut self) -> Option<&mut Request> {
        self.request.as_mut()
    }

    pub fn set_request(&mut self, request: Request) {
        self.request = Some(request);
    }

    /// True once headers are complete and the client finished sending
    pub fn ready_for_dispatch(&self) -> bool {
        !self.dispatched
            && self.end_of_headers
            && self.request.is_some()
            && matches!(self.state, StreamState::HalfClosedRemote | StreamState::Closed)
    }

    /// Hand the request over for dispatch; a stream is dispatched once
    pub fn take_request_for_dispatch(&mut self) -> Option<Request> {
        if !self.ready_for_dispatch() {
            return None;
        }
        self.dispatched = true;
        self.request.take()
    }

    pub fn end_stream_sent(&self) -> bool {
        self.end_stream_sent
    }

    /// Process an inbound HEADERS frame
    ///
    /// A second HEADERS frame on an open stream carries trailers and must
    /// end the stream.
    pub fn receive_headers(&mut self, frame: &HeadersFrame) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = StreamState::Open;
            }
            StreamState::Open if self.end_of_headers => {
                if !frame.end_stream {
                    return Err(Error::stream(
                        self.id,
                        ErrorCode::ProtocolError,
                        "trailers without END_STREAM",
                    ));
                }
                self.trailers = true;
            }
            _ => {
                return Err(Error::stream(
                    self.id,
                    ErrorCode::StreamClosed,
                    format!("HEADERS in state {:?}", self.state),
                ));
            }
        }

        if let Some(priority) = frame.priority {
            self.priority = Some(priority);
        }

        self.header_block.extend_from_slice(&frame.header_block);
        self.end_of_headers = frame.end_headers;
        self.pending_end_stream = frame.end_stream;
        if self.end_of_headers {
            self.apply_pending_end_stream();
        }

        Ok(())
    }

    /// Process a CONTINUATION frame; only valid inside an open header block
    pub fn receive_continuation(&mut self, frame: &ContinuationFrame) -> Result<()> {
        if self.end_of_headers || self.state != StreamState::Open {
            return Err(Error::Protocol(format!(
                "CONTINUATION on stream {} outside a header block",
                self.id
            )));
        }

        self.header_block.extend_from_slice(&frame.header_block);
        if frame.end_headers {
            self.end_of_headers = true;
            self.apply_pending_end_stream();
        }
        Ok(())
    }

    fn apply_pending_end_stream(&mut self) {
        if self.pending_end_stream {
            self.pending_end_stream = false;
            self.remote_closed();
        }
    }

    fn remote_closed(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }

    /// Process an inbound DATA frame, appending it to the request body
    ///
    /// The connection window must already have been debited.
    pub fn receive_data(&mut self, frame: &DataFrame, wire_len: usize) -> Result<()> {
        if !self.state.can_receive() || !self.end_of_headers {
            return Err(Error::stream(
                self.id,
                ErrorCode::StreamClosed,
                format!("DATA in state {:?}", self.state),
            ));
        }

        if self.flow_control.consume_recv_window(wire_len).is_err() {
            return Err(Error::stream(
                self.id,
                ErrorCode::FlowControlError,
                "DATA exceeds the stream window",
            ));
        }

        if let Some(request) = self.request.as_mut() {
            if let Some(reader) = request.multipart_mut() {
                reader.add_to_buffer(&frame.data)?;
            } else {
                request.append_body(&frame.data);
            }
        }

        if frame.end_stream {
            self.remote_closed();
        }

        Ok(())
    }

    /// Record that response HEADERS went out
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::StreamClosed(self.id));
        }
        if end_stream {
            self.local_closed();
        }
        Ok(())
    }

    /// Take send window for `data_len` bytes, returning what was granted
    pub fn send_data(&mut self, data_len: usize, end_stream: bool) -> Result<usize> {
        if !self.state.can_send() {
            return Err(Error::StreamClosed(self.id));
        }

        let granted = self.flow_control.consume_send_window(data_len);
        if end_stream && granted == data_len {
            self.local_closed();
        }
        Ok(granted)
    }

    fn local_closed(&mut self) {
        self.end_stream_sent = true;
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// Close the stream
    pub fn close(&mut self) {
        self.state = StreamState::Closed;
    }

    /// Reset the stream (RST_STREAM sent or received)
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
        self.header_block.clear();
        self.request = None;
        self.end_of_headers = false;
        self.pending_end_stream = false;
    }
}

/// Stream manager
///
/// Holds the streams of one connection and enforces client stream id
/// ordering and the local concurrency limit.
#[derive(Debug)]
pub struct StreamManager {
    streams: HashMap<StreamId, H2Stream>,
    /// Highest client stream id seen so far
    last_stream_id: StreamId,
    max_concurrent_streams: Option<u32>,
    /// Initial send window from the peer's SETTINGS
    send_window: u32,
    /// Initial receive window from our SETTINGS
    recv_window: u32,
}

impl StreamManager {
    pub fn new(max_concurrent_streams: Option<u32>, send_window: u32, recv_window: u32) -> Self {
        StreamManager {
            streams: HashMap::new(),
            last_stream_id: 0,
            max_concurrent_streams,
            send_window,
            recv_window,
        }
    }

    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    /// Highest stream id the client has opened, reported in GOAWAY
    pub fn last_stream_id(&self) -> StreamId {
        self.last_stream_id
    }

    /// Open a stream for a client HEADERS frame
    ///
    /// Even or non-increasing ids are connection errors; exceeding the
    /// concurrency limit refuses only this stream.
    pub fn open(&mut self, stream_id: StreamId) -> Result<&mut H2Stream> {
        if stream_id % 2 == 0 || stream_id <= self.last_stream_id {
            return Err(Error::Protocol(format!(
                "Invalid client stream id {} (last {})",
                stream_id, self.last_stream_id
            )));
        }
        self.last_stream_id = stream_id;

        if let Some(max) = self.max_concurrent_streams {
            if self.active_stream_count() >= max as usize {
                return Err(Error::stream(
                    stream_id,
                    ErrorCode::RefusedStream,
                    "concurrent stream limit reached",
                ));
            }
        }

        let stream = H2Stream::with_window_sizes(stream_id, self.send_window, self.recv_window);
        Ok(self.streams.entry(stream_id).or_insert(stream))
    }

    pub fn get_stream(&self, stream_id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&stream_id)
    }

    pub fn get_stream_mut(&mut self, stream_id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&stream_id)
    }

    pub fn remove_stream(&mut self, stream_id: StreamId) -> Option<H2Stream> {
        self.streams.remove(&stream_id)
    }

    /// Apply a new peer SETTINGS_INITIAL_WINDOW_SIZE to every stream
    pub fn update_send_initial_size(&mut self, new_size: u32) -> Result<()> {
        self.send_window = new_size;
        for stream in self.streams.values_mut() {
            stream.flow_control_mut().update_send_initial_size(new_size)?;
        }
        Ok(())
    }

    pub fn active_stream_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed())
            .count()
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }

    /// Reset and drop every stream, returning how many were live
    pub fn reset_all(&mut self) -> usize {
        let count = self.streams.len();
        for stream in self.streams.values_mut() {
            stream.reset();
        }
        self.streams.clear();
        count
    }
}
