//! Fire-and-forget delayed continuations plus the generation guard that stands in for
//! cancellation. Nothing scheduled here is ever removed early; loops invalidate their pending
//! continuations by bumping their generation instead.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

use crate::layout::HandlerId;
use crate::time::PanelClock;

/// Which recurring behavior a continuation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoopId {
    AutoCycle(HandlerId),
    Poll(HandlerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Continuation {
    pub target: LoopId,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scheduled {
    due: Duration,
    seq: u64,
    continuation: Continuation,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Time-ordered queue of continuations. Ties fire in scheduling order.
#[derive(Debug, Default)]
pub struct DeferredQueue {
    clock: PanelClock,
    pending: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn schedule(&mut self, delay: Duration, continuation: Continuation) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Reverse(Scheduled { due: self.clock.now() + delay, seq, continuation }));
    }

    pub fn advance(&mut self, dt: Duration) {
        self.clock.advance(dt);
    }

    /// Pops the next continuation whose due time has passed.
    pub fn pop_due(&mut self) -> Option<Continuation> {
        let now = self.clock.now();
        match self.pending.peek() {
            Some(Reverse(next)) if next.due <= now => self.pending.pop().map(|Reverse(s)| s.continuation),
            _ => None,
        }
    }

    pub fn pending_for(&self, target: LoopId) -> usize {
        self.pending.iter().filter(|Reverse(s)| s.continuation.target == target).count()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Per-loop guard state. `start`/`stop` each bump the generation, so whatever was scheduled
/// under an older generation turns into a no-op when it fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecurringLoop {
    running: bool,
    generation: u64,
    scheduled_generation: Option<u64>,
}

impl RecurringLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn scheduled_generation(&self) -> Option<u64> {
        self.scheduled_generation
    }

    /// Starts (or restarts) the loop and returns the continuation the caller must schedule.
    pub fn start(&mut self, target: LoopId) -> Continuation {
        self.running = true;
        self.generation += 1;
        self.scheduled_generation = Some(self.generation);
        Continuation { target, generation: self.generation }
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.generation += 1;
        self.scheduled_generation = None;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.running && generation == self.generation
    }

    /// Called when a continuation fires. Returns `false` for stale continuations, which the
    /// caller drops without running the loop body.
    pub fn accept(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.scheduled_generation = None;
        true
    }

    /// Continuation for the next period, or `None` once the loop was stopped.
    pub fn reschedule(&mut self, target: LoopId) -> Option<Continuation> {
        if !self.running {
            return None;
        }
        self.scheduled_generation = Some(self.generation);
        Some(Continuation { target, generation: self.generation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: LoopId = LoopId::AutoCycle(HandlerId(0));

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    #[test]
    fn queue_releases_continuations_in_due_order() {
        let mut queue = DeferredQueue::new();
        queue.schedule(secs(5), Continuation { target: TARGET, generation: 2 });
        queue.schedule(secs(1), Continuation { target: TARGET, generation: 1 });
        assert!(queue.pop_due().is_none(), "nothing due yet");
        queue.advance(secs(5));
        assert_eq!(queue.pop_due().map(|c| c.generation), Some(1));
        assert_eq!(queue.pop_due().map(|c| c.generation), Some(2));
        assert!(queue.is_empty());
    }

    #[test]
    fn stop_invalidates_pending_continuation() {
        let mut guard = RecurringLoop::new();
        let pending = guard.start(TARGET);
        guard.stop();
        assert!(!guard.accept(pending.generation));
        assert_eq!(guard.scheduled_generation(), None);
    }

    #[test]
    fn restart_leaves_only_the_newest_generation_live() {
        let mut guard = RecurringLoop::new();
        let first = guard.start(TARGET);
        guard.stop();
        let second = guard.start(TARGET);
        assert!(!guard.accept(first.generation), "old continuation must no-op");
        assert!(guard.accept(second.generation));
        let next = guard.reschedule(TARGET).expect("still running");
        assert_eq!(next.generation, second.generation, "reschedule keeps the generation");
    }
}
