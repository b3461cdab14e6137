use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::authority::ObjectId;
use crate::compose::ActivationSource;
use crate::config::FolderKind;
use crate::events::PanelEvent;
use crate::layout::{EntryKey, FolderDef, HandlerId, PanelLayout};
use crate::replication::StatePayload;
use crate::resources::ResourceSink;

/// Placeholder shown for a metric that has no value yet.
pub const METRIC_PLACEHOLDER: &str = "--";

/// The only per-folder state that crosses the network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerState {
    pub activation: Vec<bool>,
    pub current_page: usize,
}

/// What a grid button does inside a folder: the first `items_per_page` buttons map to entries,
/// the trailing ones navigate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonRole {
    Entry(usize),
    Back,
    PagePrev,
    PageIndicator,
    PageNext,
}

pub const NAVIGATION_BUTTONS: usize = 4;

impl ButtonRole {
    pub fn resolve(button: usize, items_per_page: usize) -> Option<Self> {
        if button < items_per_page {
            return Some(ButtonRole::Entry(button));
        }
        match button - items_per_page {
            0 => Some(ButtonRole::Back),
            1 => Some(ButtonRole::PagePrev),
            2 => Some(ButtonRole::PageIndicator),
            3 => Some(ButtonRole::PageNext),
            _ => None,
        }
    }

    pub fn is_navigation(self) -> bool {
        !matches!(self, ButtonRole::Entry(_))
    }
}

/// Everything a handler needs from the coordinating panel.
pub trait PanelServices {
    fn layout(&self) -> &PanelLayout;

    fn items_per_page(&self) -> usize {
        self.layout().items_per_page()
    }

    fn is_folder_exclusive(&self, folder: HandlerId) -> bool {
        self.layout().is_folder_exclusive(folder)
    }

    fn folder_kind(&self, folder: HandlerId) -> Option<FolderKind> {
        self.layout().folder_kind(folder)
    }

    fn current_default_folder(&self) -> HandlerId {
        self.layout().default_folder()
    }

    fn request_display_refresh(&mut self);

    fn ensure_local_authority(&mut self, object: ObjectId);

    /// Queues `payload` for broadcast under the next revision of `object`.
    fn push_state(&mut self, object: ObjectId, payload: StatePayload);

    /// Marks the handler's effects for re-projection at the end of the current batch.
    fn mark_dirty(&mut self, handler: HandlerId);

    fn emit(&mut self, event: PanelEvent);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectOutcome {
    pub changed: bool,
    /// Pair members living in other handlers that the caller must clear.
    pub pair_clears: SmallVec<[EntryKey; 4]>,
}

impl SelectOutcome {
    fn unchanged() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct Handler {
    id: HandlerId,
    folder: FolderDef,
    state: HandlerState,
    initial: HandlerState,
    metric_values: Vec<Option<i64>>,
}

impl Handler {
    /// Seeds the initial snapshot from authored defaults, falling back to what the scene shows
    /// for plain visibility toggles.
    pub fn new(folder: &FolderDef, scene: &dyn ResourceSink) -> Self {
        let mut activation: Vec<bool> = folder
            .entries
            .iter()
            .map(|entry| {
                entry.default_on.unwrap_or_else(|| match (&entry.resource, folder.surface) {
                    (Some(resource), None) => scene.authored_visibility(resource).unwrap_or(false),
                    _ => false,
                })
            })
            .collect();
        if folder.exclusive {
            let mut seen = false;
            for bit in activation.iter_mut() {
                if *bit && seen {
                    *bit = false;
                }
                seen |= *bit;
            }
        }
        let initial = HandlerState { activation, current_page: 0 };
        Self {
            id: folder.id,
            folder: folder.clone(),
            state: initial.clone(),
            initial,
            metric_values: vec![None; folder.entries.len()],
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn object(&self) -> ObjectId {
        ObjectId::Handler(self.id)
    }

    pub fn folder(&self) -> &FolderDef {
        &self.folder
    }

    pub fn state(&self) -> &HandlerState {
        &self.state
    }

    pub fn activation(&self) -> &[bool] {
        &self.state.activation
    }

    pub fn current_page(&self) -> usize {
        self.state.current_page
    }

    pub fn page_count(&self) -> usize {
        self.folder.page_count()
    }

    pub fn entry_count(&self) -> usize {
        self.folder.entries.len()
    }

    pub fn get_entry_state(&self, local: usize) -> bool {
        self.state.activation.get(local).copied().unwrap_or(false)
    }

    fn is_configured(&self) -> bool {
        self.folder.is_configured()
    }

    fn role(&self, button: usize) -> Option<ButtonRole> {
        ButtonRole::resolve(button, self.folder.items_per_page)
    }

    /// Local entry index shown on `button` for the current page, if any.
    pub fn local_index(&self, button: usize) -> Option<usize> {
        match self.role(button)? {
            ButtonRole::Entry(slot) => {
                let local = self.state.current_page * self.folder.items_per_page + slot;
                (local < self.entry_count()).then_some(local)
            }
            _ => None,
        }
    }

    pub fn label(&self, button: usize) -> String {
        if !self.is_configured() {
            return String::new();
        }
        match self.role(button) {
            Some(ButtonRole::Entry(_)) => {
                self.local_index(button).map(|local| self.entry_label(local)).unwrap_or_default()
            }
            Some(ButtonRole::Back) => "Back".to_string(),
            Some(ButtonRole::PagePrev) => "Prev".to_string(),
            Some(ButtonRole::PageIndicator) => format!("{}/{}", self.state.current_page + 1, self.page_count()),
            Some(ButtonRole::PageNext) => "Next".to_string(),
            None => String::new(),
        }
    }

    /// Entry text, with the latest value appended for metric entries.
    pub fn entry_label(&self, local: usize) -> String {
        let Some(entry) = self.folder.entry(local) else {
            return String::new();
        };
        if self.folder.kind == FolderKind::ExternalMetrics && entry.metric.is_some() {
            match self.metric_value(local) {
                Some(value) => format!("{}: {value}", entry.label),
                None => format!("{}: {METRIC_PLACEHOLDER}", entry.label),
            }
        } else {
            entry.label.clone()
        }
    }

    pub fn is_interactable(&self, button: usize) -> bool {
        if !self.is_configured() {
            return false;
        }
        match self.role(button) {
            Some(ButtonRole::Entry(_)) => self
                .local_index(button)
                .and_then(|local| self.folder.entry(local))
                .is_some_and(|entry| entry.is_configured()),
            Some(ButtonRole::Back) => true,
            Some(ButtonRole::PagePrev | ButtonRole::PageIndicator | ButtonRole::PageNext) => self.page_count() > 1,
            None => false,
        }
    }

    pub fn is_active(&self, button: usize) -> bool {
        match self.role(button) {
            Some(ButtonRole::Entry(_)) => self.local_index(button).is_some_and(|local| self.get_entry_state(local)),
            Some(_) => self.is_configured(),
            None => false,
        }
    }

    /// Toggles the entry under `button`. Pair members that are not the owner cannot switch the
    /// pair on; such presses change nothing and replicate nothing.
    pub fn on_select(&mut self, button: usize, services: &mut dyn PanelServices) -> SelectOutcome {
        match self.local_index(button) {
            Some(local) => self.toggle_entry(local, services),
            None => SelectOutcome::unchanged(),
        }
    }

    pub fn toggle_entry(&mut self, local: usize, services: &mut dyn PanelServices) -> SelectOutcome {
        let Some(entry) = self.folder.entry(local) else {
            return SelectOutcome::unchanged();
        };
        let key = EntryKey::new(self.id, local);
        let new_state = !self.get_entry_state(local);

        let pair = entry.pair.and_then(|pair| services.layout().pair(pair)).cloned();
        if let Some(pair) = &pair {
            if new_state && !pair.is_owner(key) {
                services.emit(PanelEvent::PairActivationRejected { entry: key, owner: pair.owner });
                return SelectOutcome::unchanged();
            }
        }

        services.ensure_local_authority(self.object());
        self.normalize();
        let mut outcome = SelectOutcome::unchanged();

        if new_state && self.folder.exclusive {
            for (other, bit) in self.state.activation.iter_mut().enumerate() {
                if other != local && *bit {
                    *bit = false;
                    services.emit(PanelEvent::entry_toggled(EntryKey::new(self.id, other), false));
                }
            }
        }

        if let (Some(pair), true) = (&pair, new_state) {
            for member in pair.members.iter().copied().filter(|member| *member != key) {
                if member.handler == self.id {
                    if let Some(bit) = self.state.activation.get_mut(member.local) {
                        if *bit {
                            *bit = false;
                            services.emit(PanelEvent::entry_toggled(member, false));
                        }
                    }
                } else {
                    outcome.pair_clears.push(member);
                }
            }
        }

        if self.state.activation[local] != new_state {
            self.state.activation[local] = new_state;
            services.emit(PanelEvent::entry_toggled(key, new_state));
            outcome.changed = true;
        }
        if outcome.changed {
            self.commit(services);
        }
        outcome
    }

    /// Switches an entry off on behalf of another handler's pair activation.
    pub fn clear_entry(&mut self, local: usize, services: &mut dyn PanelServices) -> bool {
        if !self.get_entry_state(local) {
            return false;
        }
        services.ensure_local_authority(self.object());
        self.state.activation[local] = false;
        services.emit(PanelEvent::entry_toggled(EntryKey::new(self.id, local), false));
        self.commit(services);
        true
    }

    /// Raw assignment used by preset restore. Exclusivity and pair rules are settled by the
    /// caller before any entry is written.
    pub fn set_entry_state(&mut self, local: usize, value: bool, services: &mut dyn PanelServices) -> bool {
        if local >= self.entry_count() || self.get_entry_state(local) == value {
            return false;
        }
        services.ensure_local_authority(self.object());
        self.normalize();
        self.state.activation[local] = value;
        services.emit(PanelEvent::entry_toggled(EntryKey::new(self.id, local), value));
        self.commit(services);
        true
    }

    pub fn on_page_change(&mut self, direction: i32, services: &mut dyn PanelServices) -> bool {
        if !self.is_configured() {
            return false;
        }
        let pages = self.page_count() as i64;
        let next = (self.state.current_page as i64 + direction as i64).rem_euclid(pages) as usize;
        if next == self.state.current_page {
            return false;
        }
        services.ensure_local_authority(self.object());
        self.state.current_page = next;
        services.emit(PanelEvent::PageChanged { handler: self.id, page: next });
        self.push(services);
        services.request_display_refresh();
        true
    }

    /// Installs a snapshot received from the authority holder. The snapshot is normalised to this
    /// participant's layout so a malformed payload can never index out of range.
    pub fn receive_state(&mut self, state: HandlerState) {
        self.state = state;
        self.normalize();
    }

    /// Re-applies every entry and asks for a display refresh. Safe to call any number of times.
    pub fn on_deserialize(&mut self, services: &mut dyn PanelServices) {
        services.mark_dirty(self.id);
        services.request_display_refresh();
    }

    pub fn restore_initial_state(&mut self, services: &mut dyn PanelServices) -> bool {
        let changed = self.state != self.initial;
        if changed {
            services.ensure_local_authority(self.object());
            self.state = self.initial.clone();
            self.push(services);
        }
        services.mark_dirty(self.id);
        services.request_display_refresh();
        changed
    }

    pub fn initial_state(&self) -> &HandlerState {
        &self.initial
    }

    /// Drops an authored default while the panel is being built. The initial snapshot changes
    /// too, so a later reset cannot bring the entry back.
    pub fn clear_authored_default(&mut self, local: usize) {
        if let Some(bit) = self.state.activation.get_mut(local) {
            *bit = false;
        }
        if let Some(bit) = self.initial.activation.get_mut(local) {
            *bit = false;
        }
    }

    /// Display-only values for metric entries, indexed like the entries.
    pub fn set_metric_values(&mut self, values: &[Option<i64>]) {
        self.metric_values = values.to_vec();
        self.metric_values.resize(self.entry_count(), None);
    }

    pub fn metric_value(&self, local: usize) -> Option<i64> {
        self.metric_values.get(local).copied().flatten()
    }

    /// Inactive entries with a resource, in entry order; the auto-cycle candidates. Pair members
    /// other than the owner are left out since selecting them is always rejected.
    pub fn inactive_entries<'a>(&'a self, layout: &'a PanelLayout) -> impl Iterator<Item = usize> + 'a {
        self.folder
            .entries
            .iter()
            .filter(|entry| entry.resource.is_some())
            .filter(move |entry| match entry.pair.and_then(|pair| layout.pair(pair)) {
                Some(pair) => pair.is_owner(EntryKey::new(self.id, entry.local_index)),
                None => true,
            })
            .map(|entry| entry.local_index)
            .filter(|local| !self.get_entry_state(*local))
    }

    fn normalize(&mut self) {
        let count = self.entry_count();
        self.state.activation.resize(count, false);
        let last_page = self.page_count().saturating_sub(1);
        if self.state.current_page > last_page {
            self.state.current_page = last_page;
        }
    }

    fn commit(&mut self, services: &mut dyn PanelServices) {
        services.mark_dirty(self.id);
        self.push(services);
        services.request_display_refresh();
    }

    fn push(&self, services: &mut dyn PanelServices) {
        services.push_state(self.object(), StatePayload::Handler(self.state.clone()));
    }
}

impl ActivationSource for [Handler] {
    fn activation(&self, handler: HandlerId) -> &[bool] {
        self.get(handler.index()).map(|handler| handler.activation()).unwrap_or(&[])
    }
}
