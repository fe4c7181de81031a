//! Background task spawning.
//!
//! The foreground owns the resident tile set and never blocks; everything
//! that touches the network, the disk or the engine runs on the Tokio
//! runtime behind this handle.

use std::future::Future;

use tokio::runtime::Handle;

/// Spawns load tasks onto a Tokio runtime.
///
/// Tasks return `()`. Results travel back to the foreground over
/// `async_channel`s and are drained with `try_recv`.
#[derive(Debug, Clone)]
pub struct TaskSpawner {
    handle: Handle,
}

impl TaskSpawner {
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawner for the runtime the caller is running on, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Spawn a background task that runs to completion.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.handle.spawn(future));
    }
}
