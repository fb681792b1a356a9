//! Cancellation handling for graceful Ctrl+C shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag.
///
/// Clones observe the same flag. Long-running stages poll
/// [`CancelToken::is_cancelled`] between units of work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Reset the flag (for re-use between runs).
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Register the Ctrl+C handler.
///
/// When Ctrl+C is pressed, the returned token is cancelled. In-flight work
/// finishes; no new work is started.
pub fn register_handler() -> CancelToken {
    let token = CancelToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::warn!("Interrupted; finishing in-flight oracle calls");
        handler_token.cancel();
    }) {
        log::debug!("Could not register Ctrl+C handler: {}", e);
    }
    token
}
