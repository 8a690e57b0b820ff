use super::builder::LoopBuilder;
use super::worker::{self, Ready};
use super::Shared;
use crate::context::{Context, DestroyNotify, Priority, Source, SourceAction, SourceId};
use crate::error::LoopError;
use crate::log::{self, TARGET};
use crate::main_loop::MainLoop;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// A background event loop.
///
/// `ManagedLoop` is responsible for:
/// - spawning a dedicated thread that owns a [`Context`] and runs a [`MainLoop`] on it,
/// - letting any thread schedule idle and timeout callbacks onto that thread,
/// - tearing the thread down deterministically.
///
/// Construction does not return until the loop thread has created its
/// context, so sources can be scheduled immediately. Every callback runs on
/// the loop thread, one at a time.
///
/// Dropping the handle shuts the loop down; see [`shutdown`](Self::shutdown).
///
/// # Examples
///
/// ```rust,ignore
/// let managed = ManagedLoop::new()?;
///
/// managed.schedule_repeating(Duration::from_millis(100), || {
///     println!("tick");
///     SourceAction::Continue
/// });
/// ```
pub struct ManagedLoop {
    /// Instance id used in log events.
    id: u64,

    /// Stopping flag shared with the loop thread.
    shared: Arc<Shared>,

    /// Context created by the loop thread.
    context: Context,

    /// Loop running on the loop thread.
    main_loop: MainLoop,

    /// Join handle of the loop thread, taken on shutdown.
    thread: Mutex<Option<JoinHandle<()>>>,

    thread_id: ThreadId,
}

impl ManagedLoop {
    /// Spawns a loop thread with the default configuration.
    ///
    /// # Errors
    ///
    /// - [`LoopError::Spawn`] if the thread cannot be created
    /// - [`LoopError::Poller`] if the context cannot be created
    /// - [`LoopError::Startup`] if the thread dies before becoming ready
    pub fn new() -> Result<Self, LoopError> {
        LoopBuilder::new().build()
    }

    pub(crate) fn with_builder(builder: LoopBuilder) -> Result<Self, LoopError> {
        let id = log::next_instance_id();
        let shared = Arc::new(Shared {
            stopping: AtomicBool::new(false),
        });

        let (gate, ready) = mpsc::channel();

        let mut thread = thread::Builder::new().name(builder.thread_name);
        if let Some(size) = builder.stack_size {
            thread = thread.stack_size(size);
        }

        let worker_shared = shared.clone();
        let handle = thread
            .spawn(move || worker::run(id, worker_shared, gate))
            .map_err(LoopError::Spawn)?;

        // Ready gate: nothing touches the context before the thread has
        // published it.
        let Ready { context, main_loop } = match ready.recv() {
            Ok(Ok(ready)) => ready,
            Ok(Err(error)) => {
                join_failed_start(id, handle);
                return Err(error);
            }
            Err(_) => {
                join_failed_start(id, handle);
                return Err(LoopError::Startup);
            }
        };

        let thread_id = handle.thread().id();
        tracing::debug!(target: TARGET, id, ?thread_id, "loop ready");

        Ok(Self {
            id,
            shared,
            context,
            main_loop,
            thread: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// The context the loop thread iterates.
    ///
    /// Sources attached to it directly bypass the stopping check performed
    /// by the `schedule_*` methods.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The loop running on the loop thread.
    pub fn main_loop(&self) -> &MainLoop {
        &self.main_loop
    }

    /// Id of the loop thread.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Returns `true` once shutdown has begun or the loop has exited.
    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::Acquire)
    }

    /// Schedules `callback` to run on the loop thread as soon as nothing more
    /// urgent is ready.
    ///
    /// The callback is dispatched again on every iteration for as long as it
    /// returns [`SourceAction::Continue`].
    ///
    /// Returns `None` without scheduling anything if the loop is stopping;
    /// `destroy` is then dropped without being called. Otherwise `destroy`
    /// runs exactly once, when the source is removed or the loop shuts down.
    pub fn schedule_once_full<F>(
        &self,
        priority: Priority,
        callback: F,
        destroy: Option<DestroyNotify>,
    ) -> Option<SourceId>
    where
        F: FnMut() -> SourceAction + Send + 'static,
    {
        self.schedule(Source::idle(callback).with_priority(priority), destroy)
    }

    /// [`schedule_once_full`](Self::schedule_once_full) with
    /// [`Priority::DEFAULT_IDLE`] and no destroy notifier.
    pub fn schedule_once<F>(&self, callback: F) -> Option<SourceId>
    where
        F: FnMut() -> SourceAction + Send + 'static,
    {
        self.schedule_once_full(Priority::DEFAULT_IDLE, callback, None)
    }

    /// Schedules `callback` to run on the loop thread every `interval`, until
    /// it returns [`SourceAction::Remove`] or the loop shuts down.
    ///
    /// The next run is due `interval` after the iteration that dispatched
    /// the previous one. Rejection and `destroy` behave as in
    /// [`schedule_once_full`](Self::schedule_once_full).
    pub fn schedule_repeating_full<F>(
        &self,
        priority: Priority,
        interval: Duration,
        callback: F,
        destroy: Option<DestroyNotify>,
    ) -> Option<SourceId>
    where
        F: FnMut() -> SourceAction + Send + 'static,
    {
        self.schedule(
            Source::timeout(interval, callback).with_priority(priority),
            destroy,
        )
    }

    /// [`schedule_repeating_full`](Self::schedule_repeating_full) with
    /// [`Priority::DEFAULT`] and no destroy notifier.
    pub fn schedule_repeating<F>(&self, interval: Duration, callback: F) -> Option<SourceId>
    where
        F: FnMut() -> SourceAction + Send + 'static,
    {
        self.schedule_repeating_full(Priority::DEFAULT, interval, callback, None)
    }

    fn schedule(&self, source: Source, destroy: Option<DestroyNotify>) -> Option<SourceId> {
        // Advisory: a source attached while shutdown begins may be destroyed
        // without ever running.
        if self.is_stopping() {
            return None;
        }

        let source = match destroy {
            Some(destroy) => source.with_destroy(destroy),
            None => source,
        };

        Some(self.context.attach(source))
    }

    /// Stops the loop and waits for its thread to exit.
    ///
    /// This performs the following steps:
    /// 1. Marks the instance stopping, so `schedule_*` calls return `None`
    /// 2. Posts an [`Priority::URGENT`] source that quits the loop
    /// 3. Joins the loop thread, unless called from the loop thread itself
    ///
    /// Pending sources never run after step 2; their destroy notifiers run
    /// on the loop thread as it exits. Calling this more than once is harmless.
    pub fn shutdown(&self) {
        tracing::debug!(target: TARGET, id = self.id, "Dispose");

        if !self.shared.stopping.swap(true, Ordering::AcqRel) {
            let main_loop = self.main_loop.clone();

            let quit = Source::idle(move || {
                tracing::info!(target: TARGET, "Exiting main loop");
                main_loop.quit();
                SourceAction::Remove
            })
            .with_priority(Priority::URGENT);

            self.context.attach(quit);
        }

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(handle) = handle else {
            return;
        };

        // A thread cannot join itself: when shutdown comes from a callback the
        // handle is dropped and the thread exits once the callback returns.
        if thread::current().id() == self.thread_id {
            return;
        }

        if handle.join().is_err() {
            tracing::error!(target: TARGET, id = self.id, "loop thread panicked");
        }
    }
}

fn join_failed_start(id: u64, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        tracing::error!(target: TARGET, id, "loop thread panicked during startup");
    }
}

impl Drop for ManagedLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ManagedLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedLoop")
            .field("id", &self.id)
            .field("thread_id", &self.thread_id)
            .field("stopping", &self.is_stopping())
            .finish_non_exhaustive()
    }
}
