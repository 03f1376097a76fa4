//! T-state scheduler: a min-heap of deadline-ordered events.
//!
//! Every subsystem that needs to act at a future T-state (frame boundary,
//! tape edge, FDC timeout, debugger time-breakpoint, periodic timer)
//! schedules an event here instead of polling every tick. Cancellation is
//! lazy: a cancelled event is tombstoned in place and skipped when popped,
//! since the heap supports no efficient random-access removal.

use crate::Ticks;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Entry<K> {
    deadline: Ticks,
    seq: u64,
    kind: Option<K>,
}

impl<K> PartialEq for Entry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl<K> Eq for Entry<K> {}

impl<K> PartialOrd for Entry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Entry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) pops the smallest deadline first.
        // Sequence number breaks ties deterministically but relative order
        // among equal deadlines is not a guarantee consumers may rely on.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A min-heap of `(deadline, kind)` events keyed by T-state.
///
/// `K` is the event payload type — typically a tagged enum owned by the
/// machine that carries whatever data the handler needs (controller id,
/// drive index, and so on). There is no separate "kind" discriminant: two
/// events are considered the same type for cancellation purposes according
/// to the predicate passed to [`Scheduler::cancel_where`].
pub struct Scheduler<K> {
    heap: BinaryHeap<Entry<K>>,
    next_seq: u64,
}

impl<K> Scheduler<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Insert an event. `deadline` must be `>= now` at the moment of
    /// insertion; the caller is responsible for that invariant.
    pub fn schedule(&mut self, deadline: Ticks, kind: K) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            deadline,
            seq,
            kind: Some(kind),
        });
    }

    /// Tombstone every queued event whose kind matches `predicate`.
    ///
    /// Matching entries are not removed from the heap; they are skipped
    /// silently when popped by [`Scheduler::run_until`].
    pub fn cancel_where<F: Fn(&K) -> bool>(&mut self, predicate: F) {
        let rebuilt: BinaryHeap<Entry<K>> = self
            .heap
            .drain()
            .map(|mut e| {
                if e.kind.as_ref().is_some_and(&predicate) {
                    e.kind = None;
                }
                e
            })
            .collect();
        self.heap = rebuilt;
    }

    /// Pop and dispatch every non-cancelled event with `deadline <= now`,
    /// in deadline order, calling `handler` for each. A handler may
    /// schedule further events; they are honoured within the same call if
    /// their own deadline is `<= now`.
    pub fn run_until<F: FnMut(K)>(&mut self, now: Ticks, mut handler: F) {
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry must exist");
            if let Some(kind) = entry.kind {
                handler(kind);
            }
        }
    }

    /// Rebase every remaining deadline by subtracting `frame_length`,
    /// called once a simulated frame completes. Relative order is
    /// preserved; deadlines may go negative conceptually but `Ticks` is
    /// unsigned, so callers must ensure `frame_length` never exceeds the
    /// smallest remaining deadline, which holds because the frame event
    /// itself is always the next thing popped at a frame boundary.
    pub fn end_of_frame(&mut self, frame_length: Ticks) {
        let rebased: BinaryHeap<Entry<K>> = self
            .heap
            .drain()
            .map(|e| Entry {
                deadline: e.deadline - frame_length,
                seq: e.seq,
                kind: e.kind,
            })
            .collect();
        self.heap = rebased;
    }

    /// Remove every queued event (used on machine reset).
    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// True if no live (non-tombstoned) events remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.iter().all(|e| e.kind.is_none())
    }

    /// Number of entries in the heap, including tombstones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

impl<K> Default for Scheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}
