//! Cooperative cancellation for in-flight events.
//!
//! The core provides the MECHANISM (a shared token); hooks and the
//! dispatcher provide the POLICY (when to check it). The dispatcher checks
//! the token before starting each hook; transition hooks observe it at
//! their next step boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared cancellation flag. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the token. Returns `true` if the state changed.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
