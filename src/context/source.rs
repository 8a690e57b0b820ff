//! Sources: units of work attached to a [`Context`](super::Context).
//!
//! A source pairs a callback with a readiness rule (idle or timeout), a
//! priority and an optional destroy notifier. Whatever the callback needs is
//! captured by the closure itself; the destroy notifier is told when the
//! source leaves its context for good.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

/// Callback invoked each time a source is dispatched.
pub type Callback = Box<dyn FnMut() -> SourceAction + Send + 'static>;

/// Notifier invoked exactly once when an attached source is destroyed.
pub type DestroyNotify = Box<dyn FnOnce() + Send + 'static>;

/// What a callback wants to happen to its source after it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAction {
    /// Keep the source attached; it becomes eligible again.
    Continue,
    /// Detach and destroy the source.
    Remove,
}

/// Dispatch priority. Lower values are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(i32);

impl Priority {
    /// Reserved for shutdown; runs before anything else that is ready.
    pub const URGENT: Self = Self(i32::MIN);

    pub const HIGH: Self = Self(-100);

    /// Default priority of timeout sources.
    pub const DEFAULT: Self = Self(0);

    pub const HIGH_IDLE: Self = Self(100);

    /// Default priority of idle sources.
    pub const DEFAULT_IDLE: Self = Self(200);

    pub const LOW: Self = Self(300);

    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// Opaque identifier of an attached source.
///
/// Ids are never zero and are not reused while the source they name is still
/// attached to its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(NonZeroU32);

impl SourceId {
    pub(crate) fn new(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    /// Raw numeric value, for logging or interop.
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Readiness rule of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceKind {
    /// Ready on every iteration.
    Idle,
    /// Ready once `interval` has elapsed since it was attached or last dispatched.
    Timeout { interval: Duration },
}

/// A source that has not been attached yet.
///
/// # Examples
///
/// ```rust,ignore
/// let source = Source::timeout(Duration::from_millis(10), || SourceAction::Continue)
///     .with_priority(Priority::HIGH)
///     .with_destroy(Box::new(|| println!("gone")));
///
/// let id = context.attach(source);
/// ```
pub struct Source {
    pub(crate) kind: SourceKind,
    pub(crate) priority: Priority,
    pub(crate) callback: Callback,
    pub(crate) destroy: Option<DestroyNotify>,
}

impl Source {
    /// Creates an idle source with [`Priority::DEFAULT_IDLE`].
    pub fn idle<F>(callback: F) -> Self
    where
        F: FnMut() -> SourceAction + Send + 'static,
    {
        Self {
            kind: SourceKind::Idle,
            priority: Priority::DEFAULT_IDLE,
            callback: Box::new(callback),
            destroy: None,
        }
    }

    /// Creates a timeout source firing every `interval`, with [`Priority::DEFAULT`].
    pub fn timeout<F>(interval: Duration, callback: F) -> Self
    where
        F: FnMut() -> SourceAction + Send + 'static,
    {
        Self {
            kind: SourceKind::Timeout { interval },
            priority: Priority::DEFAULT,
            callback: Box::new(callback),
            destroy: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the notifier run once the source is destroyed.
    pub fn with_destroy(mut self, destroy: DestroyNotify) -> Self {
        self.destroy = Some(destroy);
        self
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("destroy", &self.destroy.is_some())
            .finish_non_exhaustive()
    }
}
