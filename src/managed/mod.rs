//! Managed background loops.
//!
//! A [`ManagedLoop`] owns a dedicated thread running its own
//! [`Context`](crate::Context) and [`MainLoop`](crate::MainLoop):
//! - [`core`]: the owning handle, scheduling and teardown,
//! - [`worker`]: the body of the loop thread,
//! - [`builder`]: thread configuration.

mod builder;
mod core;
mod worker;

pub use builder::LoopBuilder;
pub use self::core::ManagedLoop;

use std::sync::atomic::AtomicBool;

/// State shared between a [`ManagedLoop`] and its thread.
pub(crate) struct Shared {
    /// Set once teardown has begun or the loop has exited; no source is
    /// scheduled through the handle afterwards.
    pub(crate) stopping: AtomicBool,
}
