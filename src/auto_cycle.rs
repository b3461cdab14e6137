use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;
use std::time::Duration;

use crate::layout::{FolderDef, HandlerId};
use crate::scheduler::{Continuation, LoopId, RecurringLoop};

const MIN_INTERVAL_SECS: f32 = 0.5;

/// Periodic random selection for an exclusive folder, skipping recently shown entries.
#[derive(Debug, Clone)]
pub struct AutoCycle {
    handler: HandlerId,
    interval: Duration,
    history: VecDeque<usize>,
    history_len: usize,
    start_enabled: bool,
    guard: RecurringLoop,
}

impl AutoCycle {
    pub fn for_folder(folder: &FolderDef) -> Option<Self> {
        let config = folder.auto_cycle.as_ref()?;
        Some(Self {
            handler: folder.id,
            interval: Duration::from_secs_f32(config.interval_secs.max(MIN_INTERVAL_SECS)),
            history: VecDeque::with_capacity(config.history),
            history_len: config.history,
            start_enabled: config.start_enabled,
            guard: RecurringLoop::new(),
        })
    }

    pub fn handler(&self) -> HandlerId {
        self.handler
    }

    pub fn loop_id(&self) -> LoopId {
        LoopId::AutoCycle(self.handler)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn start_enabled(&self) -> bool {
        self.start_enabled
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    pub fn generation(&self) -> u64 {
        self.guard.generation()
    }

    pub fn start(&mut self) -> Continuation {
        self.guard.start(self.loop_id())
    }

    pub fn stop(&mut self) {
        self.guard.stop();
    }

    pub fn accept(&mut self, generation: u64) -> bool {
        self.guard.accept(generation)
    }

    pub fn reschedule(&mut self) -> Option<Continuation> {
        self.guard.reschedule(self.loop_id())
    }

    pub fn history(&self) -> impl Iterator<Item = usize> + '_ {
        self.history.iter().copied()
    }

    /// Chooses among `candidates`, preferring ones outside the recent history. Falls back to any
    /// candidate when history covers them all.
    pub fn pick(&mut self, candidates: &[usize], rng: &mut impl Rng) -> Option<usize> {
        let fresh: Vec<usize> = candidates.iter().copied().filter(|local| !self.history.contains(local)).collect();
        let pool = if fresh.is_empty() { candidates } else { fresh.as_slice() };
        let choice = *pool.choose(rng)?;
        self.remember(choice);
        Some(choice)
    }

    fn remember(&mut self, local: usize) {
        if self.history_len == 0 {
            return;
        }
        while self.history.len() >= self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(local);
    }
}
