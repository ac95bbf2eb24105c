//! Outbound byte queue with a single serialized drain.
//!
//! The queue only decides *what* to write next; issuing the write and
//! waiting for it is the caller's job. The `sending` flag is set while a
//! chunk handed out by [`SendQueue::begin_drain`] or
//! [`SendQueue::complete_write`] is in flight, and no further chunk is
//! handed out until that write is reported back.

use bytes::{Bytes, BytesMut};

use crate::transfer::chunker::split_next_chunk;

/// FIFO buffer of bytes waiting to be written in chunks.
#[derive(Debug)]
pub struct SendQueue {
    buffer: BytesMut,
    packet_size: usize,
    sending: bool,
}

impl SendQueue {
    /// Create an empty queue that hands out chunks of at most `packet_size` bytes.
    pub fn new(packet_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            packet_size,
            sending: false,
        }
    }

    /// Copy `data` onto the tail of the queue.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes not yet handed out.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if there are no bytes left to hand out.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Check if a write is currently outstanding.
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// Chunk size this queue hands out.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Start a drain if none is running.
    ///
    /// Returns the first chunk to write, or `None` when a drain is already in
    /// progress or there is nothing to send.
    pub fn begin_drain(&mut self) -> Option<Bytes> {
        if self.sending {
            return None;
        }

        let chunk = split_next_chunk(&mut self.buffer, self.packet_size)?;
        self.sending = true;
        Some(chunk)
    }

    /// Record a successful write and hand out the next chunk.
    ///
    /// Returns `None` and ends the drain once the queue is empty.
    pub fn complete_write(&mut self) -> Option<Bytes> {
        debug_assert!(self.sending, "write completed with no drain running");

        let next = split_next_chunk(&mut self.buffer, self.packet_size);
        if next.is_none() {
            self.sending = false;
        }
        next
    }

    /// Record a failed write.
    ///
    /// Everything still queued is dropped and the drain ends. Returns the
    /// number of bytes discarded.
    pub fn fail_write(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.sending = false;
        discarded
    }

    /// Drop all queued bytes and forget any outstanding write.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.sending = false;
    }
}
