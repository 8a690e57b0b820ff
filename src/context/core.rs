use super::poller::Poller;
use super::source::{Callback, DestroyNotify, Priority, Source, SourceAction, SourceId, SourceKind};
use super::timer::TimerEntry;
use crate::error::LoopError;
use crate::log::TARGET;

use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// A scheduling context.
///
/// The context is the registry of attached [`Source`]s that a loop iterates.
/// It is responsible for:
/// - accepting sources from any thread,
/// - deciding which sources are ready and in which order they run,
/// - blocking its owner until the next timer or until woken,
/// - destroying sources and running their destroy notifiers.
///
/// `Context` is a cheap handle; clones refer to the same context.
///
/// Only the thread that owns the context (see [`acquire`](Self::acquire))
/// iterates it, so every callback runs on that thread, one at a time.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    /// Source registry and scheduling state.
    state: Mutex<State>,

    /// Wakeable wait used while nothing is ready.
    poller: Poller,
}

struct State {
    /// Attached sources by id.
    sources: BTreeMap<SourceId, Entry>,

    /// Sources ready to run, ordered by priority then attach order.
    ready: BTreeSet<(Priority, SourceId)>,

    /// Min-heap of pending timeout deadlines.
    timers: BinaryHeap<TimerEntry>,

    /// Next raw id to hand out.
    next_id: u32,

    /// Thread currently owning the context, with its acquire depth.
    owner: Option<Owner>,

    /// Set once the context has been closed.
    closed: bool,
}

struct Owner {
    thread: ThreadId,
    depth: usize,
}

struct Entry {
    kind: SourceKind,
    priority: Priority,

    /// `None` while the callback is being dispatched.
    callback: Option<Callback>,
    destroy: Option<DestroyNotify>,

    /// Current expiration of a timeout source; `None` for idle sources and
    /// while a timeout source is being dispatched.
    deadline: Option<Instant>,
}

/// A source that left the registry.
///
/// Its callback and notifier are released only after the state lock is
/// dropped, since either may re-enter the context.
struct Retired {
    callback: Option<Callback>,
    destroy: Option<DestroyNotify>,
}

impl Retired {
    fn notify(self) {
        drop(self.callback);

        if let Some(destroy) = self.destroy {
            destroy();
        }
    }
}

impl Context {
    /// Creates a new, unowned context with no sources.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::Poller`] if the wake-up primitive cannot be created.
    pub fn new() -> Result<Self, LoopError> {
        let poller = Poller::new().map_err(LoopError::Poller)?;

        let state = State {
            sources: BTreeMap::new(),
            ready: BTreeSet::new(),
            timers: BinaryHeap::new(),
            next_id: 1,
            owner: None,
            closed: false,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                poller,
            }),
        })
    }

    /// Attaches a source and returns its id.
    ///
    /// Safe to call from any thread, including from a callback running on
    /// the owner thread. A blocked owner is woken so the new source is taken
    /// into account immediately.
    ///
    /// If the context has already been closed the source is destroyed right
    /// away: its destroy notifier runs on the calling thread and the returned
    /// id is never found by [`contains_source`](Self::contains_source).
    pub fn attach(&self, source: Source) -> SourceId {
        let Source {
            kind,
            priority,
            callback,
            destroy,
        } = source;

        let mut state = self.inner.lock();
        let id = state.allocate_id();

        if state.closed {
            drop(state);

            tracing::debug!(target: TARGET, %id, "attach on closed context");
            Retired {
                callback: Some(callback),
                destroy,
            }
            .notify();

            return id;
        }

        let deadline = match kind {
            SourceKind::Idle => {
                state.ready.insert((priority, id));
                None
            }
            SourceKind::Timeout { interval } => state.arm(id, Instant::now(), interval),
        };

        state.sources.insert(
            id,
            Entry {
                kind,
                priority,
                callback: Some(callback),
                destroy,
                deadline,
            },
        );
        drop(state);

        tracing::trace!(target: TARGET, %id, priority = priority.value(), "source attached");
        self.inner.poller.wake();

        id
    }

    /// Detaches and destroys the source `id`.
    ///
    /// Returns `false` if no such source is attached. The destroy notifier
    /// runs on the calling thread before this returns.
    pub fn remove_source(&self, id: SourceId) -> bool {
        let retired = {
            let mut state = self.inner.lock();

            match state.sources.remove(&id) {
                Some(entry) => {
                    state.ready.remove(&(entry.priority, id));
                    Retired {
                        callback: entry.callback,
                        destroy: entry.destroy,
                    }
                }
                None => return false,
            }
        };

        tracing::trace!(target: TARGET, %id, "source removed");
        retired.notify();

        true
    }

    /// Returns `true` while the source `id` is attached.
    pub fn contains_source(&self, id: SourceId) -> bool {
        self.inner.lock().sources.contains_key(&id)
    }

    /// Returns `true` if some source is ready to be dispatched now.
    pub fn pending(&self) -> bool {
        let mut state = self.inner.lock();
        state.promote_expired(Instant::now());

        !state.ready.is_empty()
    }

    /// Runs a single iteration of the context.
    ///
    /// The iteration:
    /// 1. Moves expired timeout sources to the ready set
    /// 2. If nothing is ready and `may_block` is set, waits for the next
    ///    deadline or a wake-up
    /// 3. Dispatches every ready source of the most urgent priority
    ///
    /// Returns `true` if at least one source was dispatched. Returns `false`
    /// without doing anything if another thread owns the context.
    pub fn iteration(&self, may_block: bool) -> bool {
        if !self.acquire() {
            return false;
        }

        let dispatched = self.iterate(may_block);
        self.release();

        dispatched
    }

    /// Tries to become the owner of the context.
    ///
    /// Succeeds if the context is unowned or already owned by the calling
    /// thread; ownership is counted, so each successful call must be
    /// balanced by a [`release`](Self::release).
    pub fn acquire(&self) -> bool {
        let current = thread::current().id();
        let mut state = self.inner.lock();

        if let Some(owner) = state.owner.as_mut() {
            if owner.thread != current {
                return false;
            }

            owner.depth += 1;
            return true;
        }

        state.owner = Some(Owner {
            thread: current,
            depth: 1,
        });

        true
    }

    /// Releases one level of ownership taken by [`acquire`](Self::acquire).
    ///
    /// Has no effect when called by a thread that does not own the context.
    pub fn release(&self) {
        let current = thread::current().id();
        let mut state = self.inner.lock();

        let Some(owner) = state.owner.as_mut() else {
            return;
        };

        if owner.thread != current {
            return;
        }

        owner.depth -= 1;
        if owner.depth == 0 {
            state.owner = None;
        }
    }

    /// Returns `true` if the calling thread owns the context.
    pub fn is_owner(&self) -> bool {
        let current = thread::current().id();

        self.inner
            .lock()
            .owner
            .as_ref()
            .is_some_and(|owner| owner.thread == current)
    }

    /// Interrupts a blocking iteration, from any thread.
    pub fn wakeup(&self) {
        self.inner.poller.wake();
    }

    /// Destroys every attached source.
    ///
    /// Each destroy notifier runs once, on the calling thread. Sources
    /// attached afterwards are destroyed immediately.
    pub fn close(&self) {
        let retired: Vec<Retired> = {
            let mut state = self.inner.lock();

            state.closed = true;
            state.ready.clear();
            state.timers.clear();

            std::mem::take(&mut state.sources)
                .into_values()
                .map(|entry| Retired {
                    callback: entry.callback,
                    destroy: entry.destroy,
                })
                .collect()
        };

        tracing::debug!(target: TARGET, sources = retired.len(), "context closed");

        for source in retired {
            source.notify();
        }

        self.inner.poller.wake();
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    fn iterate(&self, may_block: bool) -> bool {
        let mut state = self.inner.lock();
        state.promote_expired(Instant::now());

        if state.ready.is_empty() && may_block {
            let timeout = state.next_timeout(Instant::now());
            drop(state);

            if let Err(error) = self.inner.poller.wait(timeout) {
                tracing::warn!(target: TARGET, %error, "poller wait failed");
            }

            state = self.inner.lock();
            state.promote_expired(Instant::now());
        }

        let batch = state.take_batch();
        drop(state);

        if batch.is_empty() {
            return false;
        }

        self.dispatch(batch);
        true
    }

    /// Dispatches a batch of ready sources with the state lock released
    /// around every callback.
    fn dispatch(&self, batch: Vec<SourceId>) {
        let now = Instant::now();

        for id in batch {
            // Removed by an earlier callback of the batch, or already being
            // dispatched further up the stack.
            let Some(mut callback) = self.inner.lock().take_callback(id) else {
                continue;
            };

            let action = callback();

            let retired = self.inner.lock().finish_dispatch(id, callback, action, now);

            if let Some(retired) = retired {
                tracing::trace!(target: TARGET, %id, "source finished");
                retired.notify();
            }
        }
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();

        f.debug_struct("Context")
            .field("sources", &state.sources.len())
            .field("ready", &state.ready.len())
            .field("owned", &state.owner.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);

        for entry in std::mem::take(&mut state.sources).into_values() {
            Retired {
                callback: entry.callback,
                destroy: entry.destroy,
            }
            .notify();
        }
    }
}

impl State {
    /// Hands out the next id that does not name a live source.
    fn allocate_id(&mut self) -> SourceId {
        loop {
            let raw = self.next_id;
            self.next_id = self.next_id.checked_add(1).unwrap_or(1);

            if let Some(raw) = NonZeroU32::new(raw) {
                let id = SourceId::new(raw);

                if !self.sources.contains_key(&id) {
                    return id;
                }
            }
        }
    }

    /// Moves timeout sources whose deadline has passed into the ready set.
    fn promote_expired(&mut self, now: Instant) {
        while let Some(timer) = self.timers.peek() {
            if timer.deadline > now {
                break;
            }

            let Some(timer) = self.timers.pop() else {
                break;
            };

            if let Some(entry) = self.sources.get(&timer.id) {
                if entry.deadline == Some(timer.deadline) {
                    self.ready.insert((entry.priority, timer.id));
                }
            }
        }
    }

    /// Pushes the next deadline of timeout `id`, `interval` after `now`.
    ///
    /// An interval too large to be represented never expires and gets no
    /// heap entry.
    fn arm(&mut self, id: SourceId, now: Instant, interval: Duration) -> Option<Instant> {
        let deadline = now.checked_add(interval)?;
        self.timers.push(TimerEntry { deadline, id });
        Some(deadline)
    }

    /// Time until the earliest live deadline, `None` if there is none.
    ///
    /// Entries left behind by removed or re-armed sources are dropped here.
    fn next_timeout(&mut self, now: Instant) -> Option<Duration> {
        while let Some(timer) = self.timers.peek() {
            let live = self
                .sources
                .get(&timer.id)
                .is_some_and(|entry| entry.deadline == Some(timer.deadline));

            if live {
                return Some(timer.deadline.saturating_duration_since(now));
            }

            self.timers.pop();
        }

        None
    }

    /// Removes and returns all ready sources sharing the most urgent priority.
    fn take_batch(&mut self) -> Vec<SourceId> {
        let Some(&(best, _)) = self.ready.first() else {
            return Vec::new();
        };

        let mut batch = Vec::new();

        while let Some(&(priority, id)) = self.ready.first() {
            if priority != best {
                break;
            }

            self.ready.pop_first();
            batch.push(id);
        }

        batch
    }

    fn take_callback(&mut self, id: SourceId) -> Option<Callback> {
        let entry = self.sources.get_mut(&id)?;

        if matches!(entry.kind, SourceKind::Timeout { .. }) {
            entry.deadline = None;
        }

        entry.callback.take()
    }

    /// Puts a dispatched callback back, or retires its source.
    fn finish_dispatch(
        &mut self,
        id: SourceId,
        callback: Callback,
        action: SourceAction,
        now: Instant,
    ) -> Option<Retired> {
        let Some(entry) = self.sources.get_mut(&id) else {
            // Removed while its callback was running.
            return Some(Retired {
                callback: Some(callback),
                destroy: None,
            });
        };

        if action == SourceAction::Remove {
            let entry = self.sources.remove(&id)?;

            return Some(Retired {
                callback: Some(callback),
                destroy: entry.destroy,
            });
        }

        entry.callback = Some(callback);

        match entry.kind {
            SourceKind::Idle => {
                self.ready.insert((entry.priority, id));
            }
            SourceKind::Timeout { interval } => {
                let deadline = self.arm(id, now, interval);
                if let Some(entry) = self.sources.get_mut(&id) {
                    entry.deadline = deadline;
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn context() -> Context {
        Context::new().unwrap()
    }

    #[test]
    fn ids_are_non_zero_and_distinct() {
        let ctx = context();

        let a = ctx.attach(Source::idle(|| SourceAction::Remove));
        let b = ctx.attach(Source::idle(|| SourceAction::Remove));

        assert_ne!(a.get(), 0);
        assert_ne!(a, b);
    }

    #[test]
    fn id_allocation_skips_live_ids_on_wrap() {
        let ctx = context();
        let first = ctx.attach(Source::idle(|| SourceAction::Continue));
        assert_eq!(first.get(), 1);

        ctx.inner.lock().next_id = u32::MAX;

        let last = ctx.attach(Source::idle(|| SourceAction::Continue));
        let wrapped = ctx.attach(Source::idle(|| SourceAction::Continue));

        assert_eq!(last.get(), u32::MAX);
        assert_eq!(wrapped.get(), 2);
    }

    #[test]
    fn idle_source_runs_once_then_disappears() {
        let ctx = context();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let id = ctx.attach(Source::idle(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            SourceAction::Remove
        }));

        assert!(ctx.contains_source(id));
        assert!(ctx.iteration(false));
        assert!(!ctx.iteration(false));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!ctx.contains_source(id));
    }

    #[test]
    fn continuing_idle_source_fires_every_iteration() {
        let ctx = context();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        ctx.attach(Source::idle(move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                SourceAction::Continue
            } else {
                SourceAction::Remove
            }
        }));

        while ctx.iteration(false) {}

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn most_urgent_priority_runs_first() {
        let ctx = context();
        let (tx, rx) = mpsc::channel();

        for (name, priority) in [
            ("low", Priority::LOW),
            ("high", Priority::HIGH),
            ("idle", Priority::DEFAULT_IDLE),
        ] {
            let tx = tx.clone();
            ctx.attach(
                Source::idle(move || {
                    tx.send(name).unwrap();
                    SourceAction::Remove
                })
                .with_priority(priority),
            );
        }

        while ctx.iteration(false) {}

        let order: Vec<_> = rx.try_iter().collect();
        assert_eq!(order, vec!["high", "idle", "low"]);
    }

    #[test]
    fn equal_priorities_run_in_attach_order_within_one_iteration() {
        let ctx = context();
        let (tx, rx) = mpsc::channel();

        for n in 0..4 {
            let tx = tx.clone();
            ctx.attach(Source::idle(move || {
                tx.send(n).unwrap();
                SourceAction::Remove
            }));
        }

        assert!(ctx.iteration(false));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn timeout_waits_for_its_deadline() {
        let ctx = context();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        ctx.attach(Source::timeout(Duration::from_millis(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            SourceAction::Remove
        }));

        assert!(!ctx.pending());
        assert!(!ctx.iteration(false));

        let start = Instant::now();
        while !ctx.iteration(true) {}

        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_source_runs_destroy_once() {
        let ctx = context();
        let destroyed = Arc::new(AtomicUsize::new(0));

        let counter = destroyed.clone();
        let id = ctx.attach(
            Source::timeout(Duration::from_secs(60), || SourceAction::Continue).with_destroy(
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            ),
        );

        assert!(ctx.remove_source(id));
        assert!(!ctx.remove_source(id));
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unrepresentable_interval_never_expires() {
        let ctx = context();

        let id = ctx.attach(Source::timeout(Duration::MAX, || SourceAction::Continue));

        assert!(ctx.contains_source(id));
        assert!(!ctx.pending());
        assert!(!ctx.iteration(false));
        assert!(ctx.inner.lock().timers.is_empty());
        assert_eq!(ctx.inner.lock().next_timeout(Instant::now()), None);
    }

    #[test]
    fn removed_timeout_does_not_bound_the_wait() {
        let ctx = context();

        let removed = ctx.attach(Source::timeout(Duration::from_secs(1), || {
            SourceAction::Continue
        }));
        ctx.attach(Source::timeout(Duration::from_secs(60), || {
            SourceAction::Continue
        }));
        assert!(ctx.remove_source(removed));

        let timeout = ctx.inner.lock().next_timeout(Instant::now());

        assert!(timeout.is_some_and(|timeout| timeout > Duration::from_secs(30)));
        assert_eq!(ctx.inner.lock().timers.len(), 1);
    }

    #[test]
    fn close_destroys_sources_and_rejects_late_ones() {
        let ctx = context();
        let destroyed = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = destroyed.clone();
            ctx.attach(
                Source::idle(|| SourceAction::Continue).with_destroy(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }

        ctx.close();
        assert_eq!(destroyed.load(Ordering::SeqCst), 3);

        let counter = destroyed.clone();
        let late = ctx.attach(Source::idle(|| SourceAction::Continue).with_destroy(Box::new(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )));

        assert!(ctx.is_closed());
        assert!(!ctx.contains_source(late));
        assert_eq!(destroyed.load(Ordering::SeqCst), 4);
        assert!(!ctx.iteration(false));
    }

    #[test]
    fn ownership_is_reentrant_and_thread_affine() {
        let ctx = context();

        assert!(ctx.acquire());
        assert!(ctx.acquire());
        assert!(ctx.is_owner());

        let other = ctx.clone();
        let stolen = thread::spawn(move || other.acquire()).join().unwrap();
        assert!(!stolen);

        ctx.release();
        assert!(ctx.is_owner());
        ctx.release();
        assert!(!ctx.is_owner());

        let other = ctx.clone();
        let acquired = thread::spawn(move || {
            let ok = other.acquire();
            other.release();
            ok
        })
        .join()
        .unwrap();
        assert!(acquired);
    }

    #[test]
    fn iteration_refuses_foreign_owned_context() {
        let ctx = context();
        ctx.attach(Source::idle(|| SourceAction::Remove));

        let other = ctx.clone();
        let (owned_tx, owned_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let holder = thread::spawn(move || {
            assert!(other.acquire());
            owned_tx.send(()).unwrap();
            done_rx.recv().unwrap();
            other.release();
        });

        owned_rx.recv().unwrap();
        assert!(!ctx.iteration(false));

        done_tx.send(()).unwrap();
        holder.join().unwrap();

        assert!(ctx.iteration(false));
    }

    #[test]
    fn wakeup_unblocks_waiting_iteration() {
        let ctx = context();
        let other = ctx.clone();

        let waiter = thread::spawn(move || {
            let start = Instant::now();
            other.iteration(true);
            start.elapsed()
        });

        thread::sleep(Duration::from_millis(20));
        ctx.wakeup();

        assert!(waiter.join().unwrap() < Duration::from_secs(5));
    }
}
