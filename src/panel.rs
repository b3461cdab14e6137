use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::authority::{AuthorityTable, ObjectId, ParticipantId};
use crate::auto_cycle::AutoCycle;
use crate::compose;
use crate::events::{EventBus, PanelEvent};
use crate::handler::{ButtonRole, Handler, HandlerState, PanelServices, SelectOutcome, NAVIGATION_BUTTONS};
use crate::layout::{EntryKey, HandlerId, PanelLayout, SliderId};
use crate::metrics::{FetchRequest, FetchResult, FetchTransport, MetricsPoller};
use crate::presets::PanelPreset;
use crate::replication::{Outbox, ReplicationMessage, RevisionLedger, StatePayload, StateSnapshot};
use crate::resources::{ResourceSink, SceneMirror};
use crate::scheduler::{Continuation, DeferredQueue, LoopId};
use crate::slider::{Slider, SliderState};

/// Floor for any loop delay so a misconfigured zero interval cannot spin inside one `advance`.
const MIN_LOOP_DELAY: Duration = Duration::from_millis(100);

/// What one grid button should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonView {
    pub label: String,
    pub interactable: bool,
    pub active: bool,
}

/// Shared bookkeeping handed to handlers and sliders while they mutate.
#[derive(Debug)]
struct PanelCore {
    layout: Arc<PanelLayout>,
    authority: AuthorityTable,
    ledger: RevisionLedger,
    outbox: Outbox,
    events: EventBus,
    dirty: BTreeSet<HandlerId>,
    refresh_requested: bool,
}

impl PanelServices for PanelCore {
    fn layout(&self) -> &PanelLayout {
        &self.layout
    }

    fn request_display_refresh(&mut self) {
        self.refresh_requested = true;
    }

    fn ensure_local_authority(&mut self, object: ObjectId) {
        if let Some(change) = self.authority.ensure_local(object) {
            self.outbox.push(ReplicationMessage::Ownership { object, owner: change.owner, term: change.term });
            self.events.push(PanelEvent::OwnershipTaken { object, previous: change.previous });
        }
    }

    fn push_state(&mut self, object: ObjectId, payload: StatePayload) {
        let writer = self.authority.local();
        let revision = self.ledger.next_revision(object, writer);
        self.outbox.push(ReplicationMessage::State(StateSnapshot { object, revision, writer, payload }));
    }

    fn mark_dirty(&mut self, handler: HandlerId) {
        self.dirty.insert(handler);
    }

    fn emit(&mut self, event: PanelEvent) {
        self.events.push(event);
    }
}

/// One participant's copy of the panel: folders, sliders, background loops, and the scene they
/// drive. Every mutation ends with the dirty handlers re-projected onto the sink.
pub struct Panel<S: ResourceSink = SceneMirror> {
    core: PanelCore,
    handlers: Vec<Handler>,
    sliders: Vec<Slider>,
    pollers: BTreeMap<HandlerId, MetricsPoller>,
    cycles: BTreeMap<HandlerId, AutoCycle>,
    queue: DeferredQueue,
    fetches: Vec<FetchRequest>,
    next_request: u64,
    rng: StdRng,
    sink: S,
    active_folder: HandlerId,
}

impl<S: ResourceSink> Panel<S> {
    pub fn new(layout: Arc<PanelLayout>, local: ParticipantId, master: ParticipantId, sink: S) -> Self {
        let mut handlers: Vec<Handler> = layout.folders().iter().map(|folder| Handler::new(folder, &sink)).collect();
        settle_authored_pairs(&layout, &mut handlers);
        let sliders = layout.sliders().iter().map(Slider::new).collect();
        let pollers = layout
            .folders()
            .iter()
            .filter_map(MetricsPoller::for_folder)
            .map(|poller| (poller.handler(), poller))
            .collect();
        let cycles =
            layout.folders().iter().filter_map(AutoCycle::for_folder).map(|cycle| (cycle.handler(), cycle)).collect();
        let rng = match layout.seed() {
            Some(seed) => StdRng::seed_from_u64(seed ^ u64::from(local.0).rotate_left(32)),
            None => StdRng::from_entropy(),
        };
        let active_folder = layout.default_folder();
        let core = PanelCore {
            authority: AuthorityTable::new(local, master),
            ledger: RevisionLedger::default(),
            outbox: Outbox::default(),
            events: EventBus::default(),
            dirty: handlers.iter().map(Handler::id).collect(),
            refresh_requested: true,
            layout,
        };
        let mut panel = Self {
            core,
            handlers,
            sliders,
            pollers,
            cycles,
            queue: DeferredQueue::new(),
            fetches: Vec::new(),
            next_request: 0,
            rng,
            sink,
            active_folder,
        };
        panel.start_loops();
        panel.apply_all();
        panel
    }

    fn start_loops(&mut self) {
        for poller in self.pollers.values_mut() {
            let continuation = poller.start();
            self.queue.schedule(Duration::ZERO, continuation);
        }
        let handlers: Vec<HandlerId> = self.cycles.keys().copied().collect();
        for handler in handlers {
            self.maybe_start_cycle(handler);
        }
    }

    /// Starts an auto-cycle flagged to run from the outset, but only on the participant holding
    /// the folder and only if it never ran here before.
    fn maybe_start_cycle(&mut self, handler: HandlerId) {
        let Some(cycle) = self.cycles.get_mut(&handler) else {
            return;
        };
        if !cycle.start_enabled() || cycle.generation() != 0 {
            return;
        }
        if !self.core.authority.is_local_owner(ObjectId::Handler(handler)) {
            return;
        }
        let continuation = cycle.start();
        self.queue.schedule(cycle.interval(), continuation);
    }

    fn apply_all(&mut self) {
        self.core.dirty.extend(self.handlers.iter().map(Handler::id));
        self.flush_effects();
        for slider in &self.sliders {
            slider.apply(&mut self.sink);
        }
        let metrics: Vec<HandlerId> = self.pollers.keys().copied().collect();
        for handler in metrics {
            self.apply_metrics(handler);
        }
    }

    pub fn local(&self) -> ParticipantId {
        self.core.authority.local()
    }

    pub fn layout(&self) -> &Arc<PanelLayout> {
        &self.core.layout
    }

    pub fn authority(&self) -> &AuthorityTable {
        &self.core.authority
    }

    pub fn scene(&self) -> &S {
        &self.sink
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn handler(&self, id: HandlerId) -> Option<&Handler> {
        self.handlers.get(id.index())
    }

    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    pub fn handler_states(&self) -> Vec<HandlerState> {
        self.handlers.iter().map(|handler| handler.state().clone()).collect()
    }

    pub fn slider(&self, id: SliderId) -> Option<&Slider> {
        self.sliders.iter().find(|slider| slider.id() == id)
    }

    pub fn sliders(&self) -> &[Slider] {
        &self.sliders
    }

    pub fn poller(&self, id: HandlerId) -> Option<&MetricsPoller> {
        self.pollers.get(&id)
    }

    pub fn auto_cycle(&self, id: HandlerId) -> Option<&AutoCycle> {
        self.cycles.get(&id)
    }

    pub fn active_folder(&self) -> HandlerId {
        self.active_folder
    }

    pub fn now(&self) -> Duration {
        self.queue.now()
    }

    pub fn scheduled_for(&self, target: LoopId) -> usize {
        self.queue.pending_for(target)
    }

    pub fn events(&self) -> impl Iterator<Item = &PanelEvent> {
        self.core.events.iter()
    }

    pub fn drain_events(&mut self) -> Vec<PanelEvent> {
        self.core.events.drain()
    }

    /// Returns `true` once per batch of changes that affect the grid.
    pub fn take_refresh_request(&mut self) -> bool {
        std::mem::take(&mut self.core.refresh_requested)
    }

    // ----- input --------------------------------------------------------------------------

    /// Routes a grid press to the folder on screen.
    pub fn press(&mut self, button: usize) -> bool {
        let active = self.active_folder;
        let Some(handler) = self.handlers.get(active.index()) else {
            return false;
        };
        match ButtonRole::resolve(button, handler.folder().items_per_page) {
            Some(ButtonRole::Entry(_)) => self.select(active, button),
            Some(ButtonRole::Back) => {
                let default_folder = self.core.current_default_folder();
                self.open_folder(default_folder)
            }
            Some(ButtonRole::PagePrev) => self.change_page(active, -1),
            Some(ButtonRole::PageIndicator | ButtonRole::PageNext) => self.change_page(active, 1),
            None => false,
        }
    }

    pub fn select(&mut self, handler: HandlerId, button: usize) -> bool {
        let Some(target) = self.handlers.get_mut(handler.index()) else {
            return false;
        };
        let outcome = target.on_select(button, &mut self.core);
        self.finish_selection(outcome)
    }

    /// Toggles an entry by its index in the folder, independent of paging.
    pub fn toggle(&mut self, entry: EntryKey) -> bool {
        let Some(target) = self.handlers.get_mut(entry.handler.index()) else {
            return false;
        };
        let outcome = target.toggle_entry(entry.local, &mut self.core);
        self.finish_selection(outcome)
    }

    fn finish_selection(&mut self, outcome: SelectOutcome) -> bool {
        self.apply_pair_clears(&outcome);
        self.flush_effects();
        outcome.changed
    }

    fn apply_pair_clears(&mut self, outcome: &SelectOutcome) {
        for member in &outcome.pair_clears {
            if let Some(other) = self.handlers.get_mut(member.handler.index()) {
                other.clear_entry(member.local, &mut self.core);
            }
        }
    }

    pub fn change_page(&mut self, handler: HandlerId, direction: i32) -> bool {
        match self.handlers.get_mut(handler.index()) {
            Some(target) => target.on_page_change(direction, &mut self.core),
            None => false,
        }
    }

    pub fn open_folder(&mut self, folder: HandlerId) -> bool {
        if folder.index() >= self.handlers.len() {
            log::warn!("[panel] cannot open unknown folder #{}", folder.0);
            return false;
        }
        self.active_folder = folder;
        self.core.request_display_refresh();
        true
    }

    /// Labels and states for every button of the folder on screen, navigation row included.
    pub fn display(&self) -> Vec<ButtonView> {
        let Some(handler) = self.handlers.get(self.active_folder.index()) else {
            return Vec::new();
        };
        let buttons = handler.folder().items_per_page + NAVIGATION_BUTTONS;
        (0..buttons)
            .map(|button| ButtonView {
                label: handler.label(button),
                interactable: handler.is_interactable(button),
                active: handler.is_active(button),
            })
            .collect()
    }

    pub fn set_slider(&mut self, id: SliderId, value: f32) -> bool {
        let Some(slider) = self.sliders.iter_mut().find(|slider| slider.id() == id) else {
            return false;
        };
        let changed = slider.set_value(value, &mut self.core);
        if changed {
            slider.apply(&mut self.sink);
        }
        changed
    }

    /// Returns every folder and slider to its initial state. Effects are re-applied even for
    /// folders that were already at their initial state.
    pub fn reset_all(&mut self) {
        for handler in self.handlers.iter_mut() {
            handler.restore_initial_state(&mut self.core);
        }
        for slider in self.sliders.iter_mut() {
            slider.restore_initial_state(&mut self.core);
            slider.apply(&mut self.sink);
        }
        self.core.events.push(PanelEvent::PanelReset);
        self.flush_effects();
    }

    // ----- background loops ---------------------------------------------------------------

    pub fn set_auto_cycle(&mut self, handler: HandlerId, enabled: bool) -> bool {
        let Some(cycle) = self.cycles.get_mut(&handler) else {
            return false;
        };
        if enabled {
            let continuation = cycle.start();
            self.queue.schedule(cycle.interval(), continuation);
        } else {
            cycle.stop();
        }
        true
    }

    pub fn set_polling(&mut self, handler: HandlerId, enabled: bool) -> bool {
        let Some(poller) = self.pollers.get_mut(&handler) else {
            return false;
        };
        if enabled {
            let continuation = poller.start();
            self.queue.schedule(Duration::ZERO, continuation);
        } else {
            poller.stop();
        }
        true
    }

    /// Moves panel time forward and runs every continuation that came due.
    pub fn advance(&mut self, dt: Duration) {
        self.queue.advance(dt);
        while let Some(continuation) = self.queue.pop_due() {
            self.run_continuation(continuation);
        }
        self.flush_effects();
    }

    fn run_continuation(&mut self, continuation: Continuation) {
        match continuation.target {
            LoopId::AutoCycle(handler) => self.run_auto_cycle(handler, continuation.generation),
            LoopId::Poll(handler) => self.run_poll(handler, continuation.generation),
        }
    }

    fn stale(&mut self, target: LoopId, generation: u64) {
        self.core.events.push(PanelEvent::StaleContinuation { target, generation });
    }

    fn run_auto_cycle(&mut self, handler: HandlerId, generation: u64) {
        let Some(cycle) = self.cycles.get_mut(&handler) else {
            return;
        };
        if !cycle.accept(generation) {
            self.stale(LoopId::AutoCycle(handler), generation);
            return;
        }
        let candidates: Vec<usize> = self
            .handlers
            .get(handler.index())
            .map(|target| target.inactive_entries(&self.core.layout).collect())
            .unwrap_or_default();
        let pick = cycle.pick(&candidates, &mut self.rng);
        let interval = cycle.interval();
        let next = cycle.reschedule();

        if let (Some(local), Some(target)) = (pick, self.handlers.get_mut(handler.index())) {
            let outcome = target.toggle_entry(local, &mut self.core);
            if outcome.changed {
                self.core.events.push(PanelEvent::AutoCycled { handler, entry: local });
            }
            self.apply_pair_clears(&outcome);
        }
        if let Some(next) = next {
            self.queue.schedule(interval.max(MIN_LOOP_DELAY), next);
        }
    }

    fn run_poll(&mut self, handler: HandlerId, generation: u64) {
        let Some(poller) = self.pollers.get_mut(&handler) else {
            return;
        };
        if !poller.accept(generation) {
            self.stale(LoopId::Poll(handler), generation);
            return;
        }
        if self.core.authority.is_local_owner(ObjectId::Metrics(handler)) {
            self.next_request += 1;
            let request = poller.begin_fetch(self.next_request);
            log::debug!("[metrics] request #{} to {} for folder #{}", request.id, request.target, handler.0);
            self.fetches.push(request);
            return;
        }
        let delay = poller.passive_delay(&mut self.rng);
        if let Some(next) = poller.reschedule() {
            self.queue.schedule(delay.max(MIN_LOOP_DELAY), next);
        }
    }

    pub fn pending_fetches(&self) -> &[FetchRequest] {
        &self.fetches
    }

    pub fn take_fetch_requests(&mut self) -> Vec<FetchRequest> {
        std::mem::take(&mut self.fetches)
    }

    /// Hands every queued request to `transport`. Answers come back through `complete_fetch`.
    pub fn dispatch_fetches(&mut self, transport: &mut dyn FetchTransport) {
        for request in self.fetches.drain(..) {
            transport.send(request);
        }
    }

    /// Folds a fetch answer in, replicates the result, and schedules the next poll. Answers for
    /// a stopped or restarted loop are dropped.
    pub fn complete_fetch(&mut self, request: &FetchRequest, result: FetchResult) -> bool {
        let handler = request.handler;
        let Some(poller) = self.pollers.get_mut(&handler) else {
            return false;
        };
        let status = match &result {
            FetchResult::Error(status) => Some(*status),
            FetchResult::Success(_) => None,
        };
        let Some(delay) = poller.complete(request.id, request.generation, result, &mut self.rng) else {
            self.stale(LoopId::Poll(handler), request.generation);
            return false;
        };
        let state = poller.state().clone();
        let next = poller.reschedule();

        let object = ObjectId::Metrics(handler);
        self.core.ensure_local_authority(object);
        self.core.push_state(object, StatePayload::Metrics(state));
        let next_delay_secs = delay.as_secs_f32();
        match status {
            None => self.core.events.push(PanelEvent::PollSucceeded { handler, next_delay_secs }),
            Some(status) => {
                log::warn!("[metrics] folder #{} fetch failed with status {status}", handler.0);
                self.core.events.push(PanelEvent::PollFailed { handler, status, next_delay_secs });
            }
        }
        if let Some(next) = next {
            self.queue.schedule(delay.max(MIN_LOOP_DELAY), next);
        }
        self.apply_metrics(handler);
        true
    }

    fn apply_metrics(&mut self, handler: HandlerId) {
        let (Some(poller), Some(target)) = (self.pollers.get(&handler), self.handlers.get_mut(handler.index())) else {
            return;
        };
        target.set_metric_values(&poller.state().values);
        for entry in &target.folder().entries {
            if let (Some(resource), Some(_)) = (&entry.resource, &entry.metric) {
                self.sink.show_text(resource, &target.entry_label(entry.local_index));
            }
        }
        self.core.request_display_refresh();
    }

    // ----- replication --------------------------------------------------------------------

    /// Messages produced since the last drain, in order.
    pub fn drain_outgoing(&mut self) -> Vec<ReplicationMessage> {
        self.core.outbox.drain()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.core.outbox.is_empty()
    }

    pub fn receive_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let message = ReplicationMessage::decode(bytes)?;
        self.receive(message);
        Ok(())
    }

    pub fn receive(&mut self, message: ReplicationMessage) {
        match message {
            ReplicationMessage::Ownership { object, owner, term } => {
                if !self.core.authority.apply_remote(object, owner, term) {
                    log::debug!("[replication] claim by {owner} on {object} (term {term}) superseded");
                }
            }
            ReplicationMessage::State(snapshot) => self.receive_snapshot(snapshot),
        }
        self.flush_effects();
    }

    fn receive_snapshot(&mut self, snapshot: StateSnapshot) {
        let StateSnapshot { object, revision, writer, payload } = snapshot;
        if !self.core.ledger.accept(object, revision, writer) {
            self.core.events.push(PanelEvent::StaleSnapshot { object, revision });
            return;
        }
        match (object, payload) {
            (ObjectId::Handler(id), StatePayload::Handler(state)) => {
                if let Some(target) = self.handlers.get_mut(id.index()) {
                    target.receive_state(state);
                    target.on_deserialize(&mut self.core);
                }
            }
            (ObjectId::Slider(id), StatePayload::Slider(state)) => {
                if let Some(slider) = self.sliders.iter_mut().find(|slider| slider.id() == id) {
                    slider.receive_state(state);
                    slider.apply(&mut self.sink);
                }
            }
            (ObjectId::Metrics(id), StatePayload::Metrics(state)) => {
                if let Some(poller) = self.pollers.get_mut(&id) {
                    poller.receive_state(state);
                }
                self.apply_metrics(id);
            }
            (object, _) => log::warn!("[replication] payload kind does not match {object}; dropped"),
        }
    }

    /// Everything a late joiner needs: known owners plus the latest snapshot of each object this
    /// participant holds authority over. Objects never written since start are left out since
    /// every participant derives the same initial state from the layout.
    pub fn full_sync(&self) -> Vec<ReplicationMessage> {
        let mut messages: Vec<ReplicationMessage> = self
            .core
            .authority
            .explicit_owners()
            .map(|(object, claim)| ReplicationMessage::Ownership { object, owner: claim.owner, term: claim.term })
            .collect();
        let handlers =
            self.handlers.iter().map(|handler| (handler.object(), StatePayload::Handler(handler.state().clone())));
        let sliders = self.sliders.iter().map(|slider| {
            (slider.object(), StatePayload::Slider(SliderState { value: slider.value() }))
        });
        let metrics = self
            .pollers
            .values()
            .map(|poller| (ObjectId::Metrics(poller.handler()), StatePayload::Metrics(poller.state().clone())));
        for (object, payload) in handlers.chain(sliders).chain(metrics) {
            if !self.core.authority.is_local_owner(object) {
                continue;
            }
            if let Some((revision, writer)) = self.core.ledger.latest(object) {
                messages.push(ReplicationMessage::State(StateSnapshot { object, revision, writer, payload }));
            }
        }
        messages
    }

    /// Hands everything `left` owned to `successor`. The successor also picks up any auto-cycle
    /// that was meant to run from the outset.
    pub fn participant_left(&mut self, left: ParticipantId, successor: ParticipantId) {
        self.core.authority.participant_left(left, successor);
        if successor == self.local() {
            let handlers: Vec<HandlerId> = self.cycles.keys().copied().collect();
            for handler in handlers {
                self.maybe_start_cycle(handler);
            }
        }
    }

    // ----- presets ------------------------------------------------------------------------

    pub fn capture_preset(&self, name: &str) -> PanelPreset {
        let mut preset = PanelPreset::new(name);
        for handler in &self.handlers {
            preset.folders.insert(handler.folder().name.clone(), handler.activation().to_vec());
        }
        for slider in &self.sliders {
            preset.sliders.insert(slider.name().to_string(), slider.value());
        }
        preset
    }

    /// Applies a preset through the normal authority path. Folders and sliders the preset does
    /// not name are left alone, except for pair members the preset's owner activation clears.
    /// Returns how many entries and sliders changed.
    pub fn apply_preset(&mut self, preset: &PanelPreset) -> usize {
        let mut desired: BTreeMap<HandlerId, Vec<bool>> = BTreeMap::new();
        for handler in &self.handlers {
            let Some(bits) = preset.folders.get(&handler.folder().name) else {
                continue;
            };
            let exclusive = handler.folder().exclusive;
            let mut selected = false;
            let wanted = (0..handler.entry_count())
                .map(|local| {
                    let mut on = bits.get(local).copied().unwrap_or(false);
                    if exclusive {
                        on &= !selected;
                        selected |= on;
                    }
                    on
                })
                .collect();
            desired.insert(handler.id(), wanted);
        }
        self.settle_preset_pairs(&preset.name, &mut desired);

        let mut changed = 0;
        for (id, bits) in &desired {
            let Some(handler) = self.handlers.get_mut(id.index()) else {
                continue;
            };
            for (local, on) in bits.iter().copied().enumerate() {
                if handler.set_entry_state(local, on, &mut self.core) {
                    changed += 1;
                }
            }
        }
        for (name, value) in &preset.sliders {
            let Some(slider) = self.sliders.iter_mut().find(|slider| slider.name() == name) else {
                log::warn!("[preset] '{}' names unknown slider '{name}'", preset.name);
                continue;
            };
            if slider.set_value(*value, &mut self.core) {
                slider.apply(&mut self.sink);
                changed += 1;
            }
        }
        self.flush_effects();
        changed
    }

    /// Applies the pair rules to a preset's wanted activations: an owner switched on clears the
    /// other members, and a non-owner may not be switched on.
    fn settle_preset_pairs(&self, name: &str, desired: &mut BTreeMap<HandlerId, Vec<bool>>) {
        for pair in self.core.layout.pairs() {
            let owner_on = desired.get(&pair.owner.handler).and_then(|bits| bits.get(pair.owner.local)).copied();
            for member in pair.members.iter().copied().filter(|member| *member != pair.owner) {
                let Some(handler) = self.handlers.get(member.handler.index()) else {
                    continue;
                };
                if owner_on == Some(true) {
                    let bits = desired.entry(member.handler).or_insert_with(|| handler.activation().to_vec());
                    if let Some(bit) = bits.get_mut(member.local) {
                        *bit = false;
                    }
                    continue;
                }
                let Some(bit) = desired.get_mut(&member.handler).and_then(|bits| bits.get_mut(member.local)) else {
                    continue;
                };
                if *bit && !handler.get_entry_state(member.local) {
                    log::debug!("[preset] '{name}' cannot switch on a non-owner member of pair #{}", pair.id.0);
                    *bit = false;
                }
            }
        }
    }

    // ----- projection ---------------------------------------------------------------------

    /// Re-projects every handler marked dirty since the last flush, composing each affected
    /// surface exactly once.
    fn flush_effects(&mut self) {
        let dirty = std::mem::take(&mut self.core.dirty);
        if dirty.is_empty() {
            return;
        }
        let mut surfaces = BTreeSet::new();
        for handler in dirty {
            if let Some(surface) =
                compose::project_handler(&self.core.layout, handler, self.handlers.as_slice(), &mut self.sink)
            {
                surfaces.insert(surface);
            }
        }
        for surface in surfaces {
            let applied = compose::apply_surface(&self.core.layout, surface, self.handlers.as_slice(), &mut self.sink);
            let resources = applied.map(|list| list.iter().map(|resource| resource.key().to_string()).collect());
            self.core.events.push(PanelEvent::SurfaceComposed { surface, resources });
        }
    }
}

/// Leaves at most one member of every pair switched on after authored defaults are read: the
/// owner if it is on, otherwise the first active member.
fn settle_authored_pairs(layout: &PanelLayout, handlers: &mut [Handler]) {
    for pair in layout.pairs() {
        let active: Vec<EntryKey> = pair
            .members
            .iter()
            .copied()
            .filter(|key| handlers.get(key.handler.index()).is_some_and(|handler| handler.get_entry_state(key.local)))
            .collect();
        if active.len() < 2 {
            continue;
        }
        let keep = if active.contains(&pair.owner) { pair.owner } else { active[0] };
        log::warn!("[panel] pair #{} is authored with {} active members; keeping one", pair.id.0, active.len());
        for key in active.into_iter().filter(|key| *key != keep) {
            if let Some(handler) = handlers.get_mut(key.handler.index()) {
                handler.clear_authored_default(key.local);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PanelConfig;
    use crate::layout::SurfaceId;

    fn layout(json: &str) -> Arc<PanelLayout> {
        Arc::new(PanelLayout::from_config(&PanelConfig::from_json_slice(json.as_bytes()).expect("parse")))
    }

    fn panel(json: &str) -> Panel {
        Panel::new(layout(json), ParticipantId(1), ParticipantId(1), SceneMirror::new())
    }

    const OBJECTS: &str = r#"{
        "panel": {"items_per_page": 2, "seed": 5},
        "folders": [{"name":"props","kind":"objects","entries":[
            {"label":"lamp","resource":"lamp"},
            {"label":"chair","resource":"chair"},
            {"label":"rug","resource":"rug"}
        ]}]
    }"#;

    #[test]
    fn display_pads_the_last_page_and_shows_navigation() {
        let mut panel = panel(OBJECTS);
        assert!(panel.press(4), "indicator advances the page");
        let view = panel.display();
        assert_eq!(view.len(), 6);
        assert_eq!(view[0].label, "rug");
        assert_eq!(view[1].label, "");
        assert!(!view[1].interactable);
        assert_eq!(view[2].label, "Back");
        assert_eq!(view[4].label, "2/2");
    }

    #[test]
    fn press_toggles_visibility_and_requests_refresh() {
        let mut panel = panel(OBJECTS);
        panel.take_refresh_request();
        assert!(panel.press(1));
        assert_eq!(panel.scene().is_visible("chair"), Some(true));
        assert!(panel.take_refresh_request());
        assert!(!panel.take_refresh_request(), "refresh is reported once");
        assert_eq!(panel.drain_outgoing().len(), 1, "master already owns the folder");
    }

    #[test]
    fn reset_restores_and_reapplies() {
        let mut panel = panel(OBJECTS);
        panel.press(0);
        panel.drain_events();
        panel.reset_all();
        assert_eq!(panel.scene().is_visible("lamp"), Some(false));
        assert!(panel.drain_events().contains(&PanelEvent::PanelReset));
    }

    #[test]
    fn surface_is_composed_once_per_batch() {
        let mut panel = panel(
            r#"{
            "surfaces": [{"name":"floor","defaults":["base"]}],
            "folders": [{"kind":"materials","surface":0,"entries":[{"label":"wet","resource":"wet"}]}]
        }"#,
        );
        panel.drain_events();
        panel.press(0);
        let composed = panel
            .drain_events()
            .into_iter()
            .filter(|event| matches!(event, PanelEvent::SurfaceComposed { .. }))
            .count();
        assert_eq!(composed, 1);
        assert_eq!(panel.scene().surface_resources(SurfaceId(0)), Some(vec!["base", "wet"]));
    }
}
