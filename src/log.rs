//! Process-wide logging target for the loop machinery.
//!
//! Every event emitted by this crate goes through the `tracing` facade under a
//! single target, so a subscriber can enable or silence the whole crate with one
//! directive (`RUST_LOG=orbit::loop=debug`). Instances are told apart by a
//! numeric id recorded on a span rather than by per-instance logger state.

use std::sync::atomic::{AtomicU64, Ordering};

/// Target used by every event in this crate.
pub(crate) const TARGET: &str = "orbit::loop";

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Returns a fresh, process-unique instance id for log correlation.
pub(crate) fn next_instance_id() -> u64 {
    NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)
}

/// Span entered by a loop thread for its whole lifetime.
pub(crate) fn loop_span(id: u64) -> tracing::Span {
    tracing::info_span!(target: TARGET, "managed_loop", id)
}
