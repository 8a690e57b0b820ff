//! Scheduling context and sources.
//!
//! This module implements the per-loop registry of pending work.
//! The context is responsible for:
//! - accepting idle and timeout sources from any thread,
//! - ordering ready sources by priority,
//! - blocking its owner thread until work is due,
//! - running destroy notifiers when sources go away.
//!
//! A context does nothing on its own; a [`MainLoop`](crate::MainLoop)
//! iterates it on the thread that owns it.

mod core;
mod poller;
mod source;
mod timer;

pub use self::core::Context;
pub use source::{Callback, DestroyNotify, Priority, Source, SourceAction, SourceId};
