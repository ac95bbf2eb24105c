//! Outbound chunked transfer.
//!
//! This module contains:
//! - Chunking of byte streams into characteristic-sized writes
//! - The send queue that serializes those writes

pub mod chunker;
pub mod send_queue;

pub use chunker::split_next_chunk;
pub use send_queue::SendQueue;
