//! # Orbit
//!
//! **Orbit** provides managed background event loops for the **Nebula** ecosystem.
//!
//! A [`ManagedLoop`] owns a dedicated thread running an independent scheduling
//! [`Context`]. Any thread can schedule work onto it:
//!
//! - **Idle sources** run as soon as nothing more urgent is ready
//! - **Timeout sources** run repeatedly at a fixed interval
//!
//! All callbacks run on the loop thread, one at a time, so they never need to
//! synchronize with each other. Construction blocks until the loop thread is
//! ready; dropping the handle stops the loop and joins the thread.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use orbit::{ManagedLoop, SourceAction};
//! use std::time::Duration;
//!
//! let managed = ManagedLoop::new()?;
//!
//! managed.schedule_once(|| {
//!     println!("running on the loop thread");
//!     SourceAction::Remove
//! });
//!
//! managed.schedule_repeating(Duration::from_millis(500), || {
//!     println!("tick");
//!     SourceAction::Continue
//! });
//! ```
//!
//! ## Modules
//!
//! - [`context`] — Scheduling context, sources and priorities
//! - [`managed`] — The managed loop and its builder
//!
//! ## Logging
//!
//! Events are emitted through [`tracing`] under the `orbit::loop` target.
//! The crate never installs a subscriber.

mod error;
mod log;
mod main_loop;

pub mod context;
pub mod managed;

pub use context::{Callback, Context, DestroyNotify, Priority, Source, SourceAction, SourceId};
pub use error::LoopError;
pub use main_loop::MainLoop;
pub use managed::{LoopBuilder, ManagedLoop};
