//! Outbound message queue: buffers caller-submitted messages while the
//! session is disconnected, flushed in FIFO order on reconnect.

use std::{collections::VecDeque, time::Instant};

use crate::frame::Frame;

/// A queued outbound payload plus its enqueue timestamp (diagnostics
/// only; never used for ordering or expiry).
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub frame: Frame,
    pub enqueued_at: Instant,
}

impl OutboundMessage {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            enqueued_at: Instant::now(),
        }
    }
}

/// FIFO queue of outbound messages.
///
/// Append-only while the session is not `Open`; strictly drained
/// oldest-first once it is. The drain loop lives in the session driver:
/// it peeks the front, attempts the send, and pops only on success, so
/// a mid-flush disconnect leaves the failed message and the unsent tail
/// queued rather than losing them or resending the sent head.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: VecDeque<OutboundMessage>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self {
            messages: VecDeque::new(),
        }
    }

    /// Append a message; O(1), always succeeds.
    pub fn push(&mut self, message: OutboundMessage) {
        self.messages.push_back(message);
    }

    /// Peek the oldest queued message.
    pub fn front(&self) -> Option<&OutboundMessage> {
        self.messages.front()
    }

    /// Remove the oldest queued message after a successful send.
    pub fn pop(&mut self) -> Option<OutboundMessage> {
        self.messages.pop_front()
    }

    /// Put a message back at the head (a send that was handed to the
    /// transport but rejected).
    pub fn push_front(&mut self, message: OutboundMessage) {
        self.messages.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop all queued messages (session stop).
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
