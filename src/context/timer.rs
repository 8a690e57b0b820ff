use super::source::SourceId;

use std::cmp::Ordering;
use std::time::Instant;

/// An entry in the context timer queue.
///
/// `TimerEntry` records that the timeout source `id` expires at
/// `deadline`. Entries are stored in a binary heap ordered by deadline.
///
/// Entries are never removed from the heap when their source is removed or
/// re-armed; a popped entry is only honoured if the source still exists and
/// its current deadline matches.
pub(crate) struct TimerEntry {
    /// The time at which the source becomes ready.
    pub(crate) deadline: Instant,

    /// Source the deadline belongs to.
    pub(crate) id: SourceId,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline.eq(&other.deadline) && self.id.eq(&other.id)
    }
}

impl Ord for TimerEntry {
    /// Reversed so that a `BinaryHeap<TimerEntry>` pops the earliest
    /// deadline first; ties go to the older source.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
