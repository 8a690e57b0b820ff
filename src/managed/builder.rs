use super::ManagedLoop;
use crate::error::LoopError;

/// Default name given to loop threads.
const DEFAULT_THREAD_NAME: &str = "orbit-loop";

/// Builder for configuring and creating a [`ManagedLoop`].
///
/// # Examples
///
/// ```rust,ignore
/// let managed = LoopBuilder::new()
///     .thread_name("media-loop")
///     .stack_size(256 * 1024)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct LoopBuilder {
    /// Name of the loop thread.
    pub(crate) thread_name: String,

    /// Stack size of the loop thread, platform default if unset.
    pub(crate) stack_size: Option<usize>,
}

impl LoopBuilder {
    /// Creates a builder with the default thread name and stack size.
    pub fn new() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            stack_size: None,
        }
    }

    /// Sets the name of the loop thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Sets the stack size of the loop thread, in bytes.
    ///
    /// # Panics
    ///
    /// Panics if `size == 0`.
    pub fn stack_size(mut self, size: usize) -> Self {
        assert!(size > 0, "stack_size must be > 0");

        self.stack_size = Some(size);
        self
    }

    /// Spawns the loop thread and waits until its context is ready.
    ///
    /// # Errors
    ///
    /// See [`ManagedLoop::new`].
    pub fn build(self) -> Result<ManagedLoop, LoopError> {
        ManagedLoop::with_builder(self)
    }
}

impl Default for LoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let builder = LoopBuilder::default();

        assert_eq!(builder.thread_name, "orbit-loop");
        assert_eq!(builder.stack_size, None);
    }

    #[test]
    fn setters_override_defaults() {
        let builder = LoopBuilder::new().thread_name("io").stack_size(64 * 1024);

        assert_eq!(builder.thread_name, "io");
        assert_eq!(builder.stack_size, Some(64 * 1024));
    }

    #[test]
    #[should_panic(expected = "stack_size must be > 0")]
    fn zero_stack_size_panics() {
        let _ = LoopBuilder::new().stack_size(0);
    }
}
