//! Splitting byte streams into characteristic-sized chunks.
//!
//! Every chunk is `size` bytes long except possibly the last, which holds
//! whatever remains. Empty input produces no chunks.

use bytes::{Bytes, BytesMut};

/// Remove the head chunk from `buffer`.
///
/// The remainder stays in `buffer` without being copied. Returns `None`
/// when the buffer is empty.
///
/// `size` must be non-zero; [`CommunicatorConfig::validate`] rejects a zero
/// packet size before it can reach here.
///
/// [`CommunicatorConfig::validate`]: crate::config::CommunicatorConfig::validate
pub fn split_next_chunk(buffer: &mut BytesMut, size: usize) -> Option<Bytes> {
    debug_assert!(size > 0, "chunk size must be positive");

    if buffer.is_empty() {
        return None;
    }

    let len = size.min(buffer.len());
    Some(buffer.split_to(len).freeze())
}
