//! Loop-control object.

use crate::context::Context;
use crate::error::LoopError;
use crate::log::TARGET;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Runs a [`Context`] until asked to quit.
///
/// `MainLoop` is a cheap handle: clones control the same loop, so one clone
/// can block in [`run`](Self::run) while another, on any thread, calls
/// [`quit`](Self::quit).
#[derive(Clone, Debug)]
pub struct MainLoop {
    inner: Arc<LoopInner>,
}

#[derive(Debug)]
struct LoopInner {
    context: Context,
    running: AtomicBool,
}

impl MainLoop {
    /// Creates a loop bound to `context`. The loop is not running.
    pub fn new(context: &Context) -> Self {
        Self {
            inner: Arc::new(LoopInner {
                context: context.clone(),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Iterates the context until [`quit`](Self::quit) is called.
    ///
    /// The loop is marked running on entry, so a `quit` issued before `run`
    /// starts has no effect on it. Quit requests are only observed between
    /// iterations: a callback that is running when `quit` is called finishes
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::ContextBusy`] if another thread owns the context.
    pub fn run(&self) -> Result<(), LoopError> {
        let context = &self.inner.context;

        if !context.acquire() {
            return Err(LoopError::ContextBusy);
        }

        self.inner.running.store(true, Ordering::Release);

        while self.inner.running.load(Ordering::Acquire) {
            context.iteration(true);
        }

        context.release();

        Ok(())
    }

    /// Asks the loop to stop. Safe to call from any thread.
    pub fn quit(&self) {
        tracing::trace!(target: TARGET, "quit requested");

        self.inner.running.store(false, Ordering::Release);
        self.inner.context.wakeup();
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Source, SourceAction};

    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn quit_from_callback_stops_run() {
        let context = Context::new().unwrap();
        let main_loop = MainLoop::new(&context);

        let handle = main_loop.clone();
        context.attach(Source::idle(move || {
            handle.quit();
            SourceAction::Remove
        }));

        main_loop.run().unwrap();
        assert!(!main_loop.is_running());
    }

    #[test]
    fn quit_from_other_thread_wakes_blocked_run() {
        let context = Context::new().unwrap();
        let main_loop = MainLoop::new(&context);

        let runner = main_loop.clone();
        let worker = thread::spawn(move || runner.run());

        while !main_loop.is_running() {
            thread::sleep(Duration::from_millis(1));
        }

        main_loop.quit();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn run_fails_on_foreign_owned_context() {
        let context = Context::new().unwrap();
        assert!(context.acquire());

        let main_loop = MainLoop::new(&context);
        let result = thread::spawn(move || main_loop.run()).join().unwrap();

        assert!(matches!(result, Err(LoopError::ContextBusy)));
        context.release();
    }

    #[test]
    fn run_dispatches_timeouts_until_quit() {
        let context = Context::new().unwrap();
        let main_loop = MainLoop::new(&context);
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = ticks.clone();
        let handle = main_loop.clone();
        context.attach(Source::timeout(Duration::from_millis(1), move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                handle.quit();
                return SourceAction::Remove;
            }
            SourceAction::Continue
        }));

        main_loop.run().unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(!context.is_owner());
    }
}
