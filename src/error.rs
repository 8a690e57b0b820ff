//! Error type shared by the context, the loop-control object and the managed loop.

use std::io;

use thiserror::Error;

/// Errors surfaced by `orbit`.
///
/// Only construction and ownership failures are reported this way. Rejected
/// scheduling calls are not errors: they return `None`.
#[derive(Debug, Error)]
pub enum LoopError {
    /// The operating system refused to spawn the loop thread.
    #[error("failed to spawn loop thread: {0}")]
    Spawn(#[source] io::Error),

    /// The context could not create its wake-up primitive.
    #[error("failed to create context poller: {0}")]
    Poller(#[source] io::Error),

    /// The loop thread exited before it signalled readiness.
    #[error("loop thread exited before becoming ready")]
    Startup,

    /// The context is owned by another thread and cannot be run here.
    #[error("context is owned by another thread")]
    ContextBusy,
}
