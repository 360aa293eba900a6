use std::error::Error as StdError;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Error type produced by user-implemented hooks (`Agent::step`,
/// `Trainer::train`, `Model::save_to`, ...).
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// First unrecoverable error observed by any runtime thread.
///
/// The message carries the full source chain of the original error so the
/// launcher can report the cause after the runtime has been torn down.
#[derive(Debug, Clone, Error)]
#[error("'{thread}' thread failed: {message}")]
pub struct FatalError {
    pub thread: String,
    pub message: String,
}

impl FatalError {
    pub fn new(thread: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            thread: thread.into(),
            message: message.into(),
        }
    }

    /// Builds a fatal error from a hook failure, flattening the source chain.
    pub fn from_hook(thread: impl Into<String>, err: &DynError) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::new(thread, message)
    }
}

/// Write-once slot shared by every runtime thread; the first error wins.
#[derive(Debug, Clone, Default)]
pub struct FatalSlot {
    inner: Arc<Mutex<Option<FatalError>>>,
}

impl FatalSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `error` if the slot is empty. Returns true when this call won.
    pub fn store(&self, error: FatalError) -> bool {
        let mut guard = self.inner.lock().unwrap();
        if guard.is_some() {
            return false;
        }
        *guard = Some(error);
        true
    }

    pub fn get(&self) -> Option<FatalError> {
        self.inner.lock().unwrap().clone()
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }
}
