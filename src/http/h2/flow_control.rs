//! HTTP/2 flow control
//!
//! This module implements flow control as defined in RFC 7540 Section 5.2.
//!
//! Each connection and each stream carries a pair of windows. The send
//! window is credited by the peer's WINDOW_UPDATE frames and debited by our
//! DATA frames; the receive window is debited by the peer's DATA frames and
//! credited again by the WINDOW_UPDATE frames we send back.

use super::error::{Error, Result};
use super::settings::MAX_WINDOW_SIZE;
use super::DEFAULT_INITIAL_WINDOW_SIZE;

/// Flow control window
///
/// The current size can go negative when SETTINGS shrinks the initial size
/// after data was already sent.
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    initial_size: u32,
    current_size: i64,
}

impl FlowControlWindow {
    /// Create a new flow control window with default size
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Create a new flow control window with specified initial size
    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current_size: initial_size as i64,
        }
    }

    /// Get current window size
    pub fn size(&self) -> i64 {
        self.current_size
    }

    /// Get initial window size
    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Check if window has available capacity
    pub fn has_capacity(&self) -> bool {
        self.current_size > 0
    }

    /// Check if window can send specified amount
    pub fn can_send(&self, amount: usize) -> bool {
        self.current_size >= amount as i64
    }

    /// Take up to `amount` bytes of capacity, returning what was granted
    pub fn consume(&mut self, amount: usize) -> usize {
        if amount == 0 || self.current_size <= 0 {
            return 0;
        }

        let granted = std::cmp::min(amount as i64, self.current_size) as usize;
        self.current_size -= granted as i64;
        granted
    }

    /// Debit inbound data; more than the window allows is a flow control error
    pub fn receive(&mut self, amount: usize) -> Result<()> {
        if amount as i64 > self.current_size {
            return Err(Error::FlowControl(format!(
                "Received {} bytes with only {} left in the window",
                amount, self.current_size
            )));
        }
        self.current_size -= amount as i64;
        Ok(())
    }

    /// Credit the window (WINDOW_UPDATE), returning the new size
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::Protocol(
                "Window update increment must be non-zero".to_string(),
            ));
        }

        let new_size = self.current_size + increment as i64;
        if new_size > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "Window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }

        self.current_size = new_size;
        Ok(self.current_size)
    }

    /// Apply a new SETTINGS_INITIAL_WINDOW_SIZE by shifting the current size
    /// by the difference from the old initial size
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        let diff = new_initial_size as i64 - self.initial_size as i64;
        let new_current = self.current_size + diff;

        if new_current > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "New window size {} exceeds maximum (2^31-1)",
                new_current
            )));
        }

        self.initial_size = new_initial_size;
        self.current_size = new_current;
        Ok(())
    }

    /// Increment that restores the window once it fell below half its
    /// initial size
    pub fn pending_update(&self) -> Option<u32> {
        let initial = self.initial_size as i64;
        if self.current_size < initial / 2 {
            Some((initial - self.current_size) as u32)
        } else {
            None
        }
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection-level flow control
#[derive(Debug, Default)]
pub struct ConnectionFlowControl {
    send_window: FlowControlWindow,
    recv_window: FlowControlWindow,
}

impl ConnectionFlowControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with specified initial window sizes
    pub fn with_initial_sizes(send_size: u32, recv_size: u32) -> Self {
        ConnectionFlowControl {
            send_window: FlowControlWindow::with_initial_size(send_size),
            recv_window: FlowControlWindow::with_initial_size(recv_size),
        }
    }

    pub fn send_window(&self) -> &FlowControlWindow {
        &self.send_window
    }

    pub fn recv_window(&self) -> &FlowControlWindow {
        &self.recv_window
    }

    /// Check if we can send data on the connection
    pub fn can_send(&self, amount: usize) -> bool {
        self.send_window.can_send(amount)
    }

    /// Consume send window for outbound data
    pub fn consume_send_window(&mut self, amount: usize) -> usize {
        self.send_window.consume(amount)
    }

    /// Increase send window from WINDOW_UPDATE
    pub fn increase_send_window(&mut self, increment: u32) -> Result<i64> {
        self.send_window.increase(increment)
    }

    /// Debit the receive window for an inbound DATA frame
    pub fn consume_recv_window(&mut self, amount: usize) -> Result<()> {
        self.recv_window.receive(amount)
    }

    /// WINDOW_UPDATE increment to send, if the receive window ran low
    pub fn should_send_window_update(&self) -> Option<u32> {
        self.recv_window.pending_update()
    }

    /// Record a WINDOW_UPDATE we sent
    pub fn send_window_update(&mut self, increment: u32) -> Result<i64> {
        self.recv_window.increase(increment)
    }
}

/// Stream-level flow control
#[derive(Debug)]
pub struct StreamFlowControl {
    stream_id: u32,
    send_window: FlowControlWindow,
    recv_window: FlowControlWindow,
}

impl StreamFlowControl {
    pub fn new(stream_id: u32) -> Self {
        Self::with_initial_sizes(
            stream_id,
            DEFAULT_INITIAL_WINDOW_SIZE,
            DEFAULT_INITIAL_WINDOW_SIZE,
        )
    }

    /// Create with specified initial window sizes
    pub fn with_initial_sizes(stream_id: u32, send_size: u32, recv_size: u32) -> Self {
        StreamFlowControl {
            stream_id,
            send_window: FlowControlWindow::with_initial_size(send_size),
            recv_window: FlowControlWindow::with_initial_size(recv_size),
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn send_window(&self) -> &FlowControlWindow {
        &self.send_window
    }

    pub fn recv_window(&self) -> &FlowControlWindow {
        &self.recv_window
    }

    /// Check if we can send data on this stream
    pub fn can_send(&self, amount: usize) -> bool {
        self.send_window.can_send(amount)
    }

    /// Consume send window for outbound data
    pub fn consume_send_window(&mut self, amount: usize) -> usize {
        self.send_window.consume(amount)
    }

    /// Increase send window from WINDOW_UPDATE
    pub fn increase_send_window(&mut self, increment: u32) -> Result<i64> {
        self.send_window.increase(increment)
    }

    /// Peer changed SETTINGS_INITIAL_WINDOW_SIZE
    pub fn update_send_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        self.send_window.update_initial_size(new_initial_size)
    }

    /// Debit the receive window for an inbound DATA frame
    pub fn consume_recv_window(&mut self, amount: usize) -> Result<()> {
        self.recv_window.receive(amount)
    }

    /// WINDOW_UPDATE increment to send, if the receive window ran low
    pub fn should_send_window_update(&self) -> Option<u32> {
        self.recv_window.pending_update()
    }

    /// Record a WINDOW_UPDATE we sent
    pub fn send_window_update(&mut self, increment: u32) -> Result<i64> {
        self.recv_window.increase(increment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::ErrorCode;

    #[test]
    fn test_flow_control_window_basic() {
        let window = FlowControlWindow::new();
        assert_eq!(window.size(), DEFAULT_INITIAL_WINDOW_SIZE as i64);
        assert!(window.has_capacity());
    }

    #[test]
    fn test_flow_control_window_consume() {
        let mut window = FlowControlWindow::with_initial_size(100);
        assert_eq!(window.consume(50), 50);
        assert_eq!(window.size(), 50);

        assert_eq!(window.consume(60), 50);
        assert_eq!(window.size(), 0);
        assert_eq!(window.consume(10), 0);
    }

    #[test]
    fn test_flow_control_window_increase() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.consume(50);
        window.increase(100).unwrap();
        assert_eq!(window.size(), 150);

        assert_eq!(window.increase(0).unwrap_err().code(), ErrorCode::ProtocolError);
    }

    #[test]
    fn test_flow_control_window_overflow() {
        let mut window = FlowControlWindow::with_initial_size(0x7FFFFFFF);
        assert_eq!(window.increase(1).unwrap_err().code(), ErrorCode::FlowControlError);
    }

    #[test]
    fn test_flow_control_window_update_initial_size() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.consume(50);

        window.update_initial_size(200).unwrap();
        assert_eq!(window.initial_size(), 200);
        assert_eq!(window.size(), 150);

        // Shrinking below what was already sent leaves the window negative
        window.consume(150);
        window.update_initial_size(100).unwrap();
        assert_eq!(window.size(), -100);
        assert!(!window.has_capacity());
    }

    #[test]
    fn test_receive_beyond_window() {
        let mut flow_control = ConnectionFlowControl::with_initial_sizes(100, 100);
        flow_control.consume_recv_window(100).unwrap();
        let err = flow_control.consume_recv_window(1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FlowControlError);
    }

    #[test]
    fn test_stream_flow_control() {
        let mut flow_control = StreamFlowControl::new(42);
        assert_eq!(flow_control.stream_id(), 42);

        assert!(flow_control.can_send(1000));
        assert_eq!(flow_control.consume_send_window(1000), 1000);

        flow_control.consume_recv_window(1000).unwrap();
        assert_eq!(
            flow_control.recv_window().size(),
            (DEFAULT_INITIAL_WINDOW_SIZE - 1000) as i64
        );
    }

    #[test]
    fn test_should_send_window_update() {
        let mut flow_control = ConnectionFlowControl::with_initial_sizes(100, 100);
        assert_eq!(flow_control.should_send_window_update(), None);

        flow_control.consume_recv_window(60).unwrap();
        assert_eq!(flow_control.should_send_window_update(), Some(60));

        flow_control.send_window_update(60).unwrap();
        assert_eq!(flow_control.should_send_window_update(), None);
    }
}
