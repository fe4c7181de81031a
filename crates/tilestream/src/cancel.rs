//! Cooperative cancellation shared between a tile and its load pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A flag set by the foreground when a tile is disposed.
///
/// Clones share the same flag. Background stages check it between steps and
/// the engine is expected to check it between records.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancellationToken::new();
        let shared = token.clone();
        assert!(!shared.is_cancelled());

        token.cancel();
        assert!(shared.is_cancelled());

        // Cancelling again is harmless.
        shared.cancel();
        assert!(token.is_cancelled());
    }
}
