use bitflags::bitflags;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{PollingConfig, StatusClassConfig};
use crate::layout::{FolderDef, HandlerId};
use crate::scheduler::{Continuation, LoopId, RecurringLoop};

/// Share of the current backoff added on top as random jitter.
const BACKOFF_JITTER_FRACTION: f32 = 0.2;

bitflags! {
    /// Failure classes a fetch error can belong to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusClasses: u8 {
        const TRANSPORT = 1 << 0;
        const RATE_LIMITED = 1 << 1;
        const CLIENT_ERROR = 1 << 2;
        const SERVER_ERROR = 1 << 3;
    }
}

impl StatusClasses {
    pub fn from_config(classes: &[StatusClassConfig]) -> Self {
        classes.iter().fold(StatusClasses::empty(), |acc, class| {
            acc | match class {
                StatusClassConfig::Transport => StatusClasses::TRANSPORT,
                StatusClassConfig::RateLimited => StatusClasses::RATE_LIMITED,
                StatusClassConfig::ClientError => StatusClasses::CLIENT_ERROR,
                StatusClassConfig::ServerError => StatusClasses::SERVER_ERROR,
            }
        })
    }

    /// Classifies a failure code. Non-positive codes mean the request never got an HTTP answer.
    pub fn classify(status: i32) -> Self {
        match status {
            i32::MIN..=0 => StatusClasses::TRANSPORT,
            429 => StatusClasses::RATE_LIMITED,
            400..=499 => StatusClasses::CLIENT_ERROR,
            500..=599 => StatusClasses::SERVER_ERROR,
            _ => StatusClasses::empty(),
        }
    }
}

/// Pulls the first integer that follows `"key":` in a loosely JSON-shaped payload. Anything that
/// does not look like an integer after the colon is skipped rather than treated as an error.
pub fn extract_metric(payload: &str, key: &str) -> Option<i64> {
    let needle = format!("\"{key}\"");
    let mut search_from = 0;
    while let Some(found) = payload[search_from..].find(&needle) {
        let after_key = search_from + found + needle.len();
        search_from = after_key;
        let rest = payload[after_key..].trim_start();
        let Some(rest) = rest.strip_prefix(':') else {
            continue;
        };
        let rest = rest.trim_start();
        let digits_start = usize::from(rest.starts_with('-'));
        let digits_len = rest[digits_start..].bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits_len == 0 {
            continue;
        }
        if let Ok(value) = rest[..digits_start + digits_len].parse::<i64>() {
            return Some(value);
        }
    }
    None
}

/// Replicated result of the latest poll for one metrics folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsState {
    /// Indexed like the folder's entries; `None` shows the placeholder.
    pub values: Vec<Option<i64>>,
    pub failing: bool,
    pub last_status: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub id: u64,
    pub handler: HandlerId,
    pub generation: u64,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success(String),
    Error(i32),
}

/// One-shot request/response collaborator. Responses come back through `Panel::complete_fetch`.
pub trait FetchTransport {
    fn send(&mut self, request: FetchRequest);
}

/// Transport that only records requests; the host (or a test) answers them later.
#[derive(Debug, Default)]
pub struct QueuedTransport {
    requests: Vec<FetchRequest>,
}

impl QueuedTransport {
    pub fn take(&mut self) -> Vec<FetchRequest> {
        std::mem::take(&mut self.requests)
    }

    pub fn pending(&self) -> &[FetchRequest] {
        &self.requests
    }
}

impl FetchTransport for QueuedTransport {
    fn send(&mut self, request: FetchRequest) {
        self.requests.push(request);
    }
}

/// Delay bookkeeping between polls.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    base: f32,
    jitter: f32,
    min: f32,
    max: f32,
    initial_backoff: f32,
    growth: f32,
    max_backoff: f32,
    backoff_on: StatusClasses,
    backoff: f32,
    consecutive_errors: u32,
}

impl PollBackoff {
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            base: config.base_interval_secs.max(0.0),
            jitter: config.jitter_fraction.clamp(0.0, 1.0),
            min: config.min_interval_secs.max(0.0),
            max: config.max_interval_secs.max(config.min_interval_secs.max(0.0)),
            initial_backoff: config.initial_backoff_secs.max(0.0),
            growth: config.growth_factor.max(1.0),
            max_backoff: config.max_backoff_secs.max(0.0),
            backoff_on: StatusClasses::from_config(&config.backoff_on),
            backoff: 0.0,
            consecutive_errors: 0,
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn current_backoff_secs(&self) -> f32 {
        self.backoff
    }

    /// `base * (1 ± jitter)`, clamped to the configured interval window.
    pub fn jittered_base(&self, rng: &mut impl Rng) -> Duration {
        let spread = rng.gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f32((self.base * (1.0 + spread)).clamp(self.min, self.max))
    }

    pub fn on_success(&mut self, rng: &mut impl Rng) -> Duration {
        self.consecutive_errors = 0;
        self.backoff = 0.0;
        self.jittered_base(rng)
    }

    pub fn on_failure(&mut self, status: i32, rng: &mut impl Rng) -> Duration {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if !self.backoff_on.intersects(StatusClasses::classify(status)) {
            return self.jittered_base(rng);
        }
        self.backoff = (self.backoff * self.growth).max(self.initial_backoff).min(self.max_backoff);
        let extra = rng.gen_range(0.0..=BACKOFF_JITTER_FRACTION) * self.backoff;
        Duration::from_secs_f32(self.backoff + extra)
    }
}

/// Poll loop for one external-metrics folder.
#[derive(Debug, Clone)]
pub struct MetricsPoller {
    handler: HandlerId,
    target: String,
    keys: Vec<Option<String>>,
    preserve_last_good: bool,
    backoff: PollBackoff,
    guard: RecurringLoop,
    in_flight: Option<(u64, u64)>,
    state: MetricsState,
}

impl MetricsPoller {
    pub fn for_folder(folder: &FolderDef) -> Option<Self> {
        let config = folder.polling.as_ref()?;
        Some(Self {
            handler: folder.id,
            target: config.target.clone(),
            keys: folder.entries.iter().map(|entry| entry.metric.clone()).collect(),
            preserve_last_good: config.preserve_last_good,
            backoff: PollBackoff::new(config),
            guard: RecurringLoop::new(),
            in_flight: None,
            state: MetricsState { values: vec![None; folder.entries.len()], failing: false, last_status: None },
        })
    }

    pub fn handler(&self) -> HandlerId {
        self.handler
    }

    pub fn loop_id(&self) -> LoopId {
        LoopId::Poll(self.handler)
    }

    pub fn state(&self) -> &MetricsState {
        &self.state
    }

    pub fn backoff(&self) -> &PollBackoff {
        &self.backoff
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight.map(|(id, _)| id)
    }

    pub fn start(&mut self) -> Continuation {
        self.in_flight = None;
        self.guard.start(self.loop_id())
    }

    pub fn stop(&mut self) {
        self.in_flight = None;
        self.guard.stop();
    }

    pub fn accept(&mut self, generation: u64) -> bool {
        self.guard.accept(generation)
    }

    pub fn reschedule(&mut self) -> Option<Continuation> {
        self.guard.reschedule(self.loop_id())
    }

    pub fn passive_delay(&self, rng: &mut impl Rng) -> Duration {
        self.backoff.jittered_base(rng)
    }

    /// Builds the request for the current generation and remembers it as in flight.
    pub fn begin_fetch(&mut self, request_id: u64) -> FetchRequest {
        let generation = self.guard.generation();
        self.in_flight = Some((request_id, generation));
        FetchRequest { id: request_id, handler: self.handler, generation, target: self.target.clone() }
    }

    /// Folds a response into the state. Returns the delay before the next poll, or `None` when
    /// the response belongs to an older generation or an unknown request.
    pub fn complete(&mut self, request: u64, generation: u64, result: FetchResult, rng: &mut impl Rng) -> Option<Duration> {
        if self.in_flight != Some((request, generation)) || !self.guard.is_current(generation) {
            return None;
        }
        self.in_flight = None;
        let delay = match result {
            FetchResult::Success(payload) => {
                self.state.values = self
                    .keys
                    .iter()
                    .map(|key| key.as_deref().and_then(|key| extract_metric(&payload, key)))
                    .collect();
                self.state.failing = false;
                self.state.last_status = None;
                self.backoff.on_success(rng)
            }
            FetchResult::Error(status) => {
                if !self.preserve_last_good {
                    self.state.values.iter_mut().for_each(|value| *value = None);
                }
                self.state.failing = true;
                self.state.last_status = Some(status);
                self.backoff.on_failure(status, rng)
            }
        };
        Some(delay)
    }

    pub fn receive_state(&mut self, state: MetricsState) {
        self.state = state;
        self.state.values.resize(self.keys.len(), None);
    }
}
