//! Application callback registration.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

use crate::error::Error;

/// Receives every inbound notification payload, unmodified.
pub type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Receives transfer failures and peripheral-initiated disconnects.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

/// The data and error callback slots of a session.
///
/// Each slot holds at most one callback; setting it again replaces the
/// previous one. Callbacks are invoked outside the slot lock, so a callback
/// may itself replace a slot.
#[derive(Default)]
pub(crate) struct CallbackSlots {
    data: RwLock<Option<DataCallback>>,
    error: RwLock<Option<ErrorCallback>>,
}

impl CallbackSlots {
    pub(crate) fn set_data(&self, callback: DataCallback) {
        *self.data.write() = Some(callback);
    }

    pub(crate) fn set_error(&self, callback: ErrorCallback) {
        *self.error.write() = Some(callback);
    }

    pub(crate) fn dispatch_data(&self, data: &[u8]) {
        let callback = self.data.read().clone();
        match callback {
            Some(callback) => callback(data),
            None => trace!("No data callback set, dropping {} bytes", data.len()),
        }
    }

    pub(crate) fn dispatch_error(&self, error: &Error) {
        let callback = self.error.read().clone();
        match callback {
            Some(callback) => callback(error),
            None => trace!("No error callback set, dropping: {}", error),
        }
    }
}
