//! Single-byte delimited framing.
//!
//! A frame is `StartByte payload EndByte`. There is no escaping, so a payload
//! can never contain either delimiter.

use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    InMessage,
}

/// Outcome of feeding one byte to the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// StartByte seen; `discarded` bytes of an unfinished frame were dropped
    Started { discarded: usize },
    /// Byte appended to the current frame
    Buffered,
    /// EndByte closed a frame
    Complete(Bytes),
    /// Byte outside any frame
    Stray(u8),
    /// EndByte without a preceding StartByte
    Ignored,
}

#[derive(Debug)]
pub struct FrameDecoder {
    state: FrameState,
    buffer: BytesMut,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: FrameState::Idle,
            buffer: BytesMut::with_capacity(256),
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Bytes buffered for the frame in progress
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one byte. StartByte is matched before EndByte, so equal
    /// delimiters never complete a frame.
    pub fn push(&mut self, byte: u8, start: u8, end: u8) -> FrameEvent {
        if byte == start {
            let discarded = self.buffer.len();
            self.buffer.clear();
            self.state = FrameState::InMessage;
            return FrameEvent::Started { discarded };
        }

        if byte == end {
            return match self.state {
                FrameState::InMessage => {
                    self.state = FrameState::Idle;
                    FrameEvent::Complete(self.buffer.split().freeze())
                }
                FrameState::Idle => FrameEvent::Ignored,
            };
        }

        match self.state {
            FrameState::InMessage => {
                self.buffer.put_u8(byte);
                FrameEvent::Buffered
            }
            FrameState::Idle => FrameEvent::Stray(byte),
        }
    }
}

/// Wrap a payload in the tenant's delimiters.
pub fn encode_frame(start: u8, payload: &[u8], end: u8) -> Bytes {
    let mut frame = BytesMut::with_capacity(payload.len() + 2);
    frame.put_u8(start);
    frame.extend_from_slice(payload);
    frame.put_u8(end);
    frame.freeze()
}
