use std::fmt;

use crate::authority::{ObjectId, ParticipantId};
use crate::layout::{EntryKey, HandlerId, SurfaceId};
use crate::scheduler::LoopId;

#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    EntryToggled { entry: EntryKey, active: bool },
    PairActivationRejected { entry: EntryKey, owner: EntryKey },
    PageChanged { handler: HandlerId, page: usize },
    SurfaceComposed { surface: SurfaceId, resources: Option<Vec<String>> },
    OwnershipTaken { object: ObjectId, previous: ParticipantId },
    StaleContinuation { target: LoopId, generation: u64 },
    StaleSnapshot { object: ObjectId, revision: u64 },
    PollSucceeded { handler: HandlerId, next_delay_secs: f32 },
    PollFailed { handler: HandlerId, status: i32, next_delay_secs: f32 },
    AutoCycled { handler: HandlerId, entry: usize },
    PanelReset,
}

impl PanelEvent {
    pub fn entry_toggled(entry: EntryKey, active: bool) -> Self {
        PanelEvent::EntryToggled { entry, active }
    }
}

impl fmt::Display for PanelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanelEvent::EntryToggled { entry, active } => {
                write!(f, "EntryToggled handler={} entry={} active={}", entry.handler.0, entry.local, active)
            }
            PanelEvent::PairActivationRejected { entry, owner } => write!(
                f,
                "PairActivationRejected handler={} entry={} owner={}:{}",
                entry.handler.0, entry.local, owner.handler.0, owner.local
            ),
            PanelEvent::PageChanged { handler, page } => {
                write!(f, "PageChanged handler={} page={}", handler.0, page)
            }
            PanelEvent::SurfaceComposed { surface, resources } => match resources {
                Some(list) => write!(f, "SurfaceComposed surface={} [{}]", surface.0, list.join(", ")),
                None => write!(f, "SurfaceComposed surface={} disabled", surface.0),
            },
            PanelEvent::OwnershipTaken { object, previous } => {
                write!(f, "OwnershipTaken object={object} previous={previous}")
            }
            PanelEvent::StaleContinuation { target, generation } => {
                write!(f, "StaleContinuation target={target:?} generation={generation}")
            }
            PanelEvent::StaleSnapshot { object, revision } => {
                write!(f, "StaleSnapshot object={object} revision={revision}")
            }
            PanelEvent::PollSucceeded { handler, next_delay_secs } => {
                write!(f, "PollSucceeded handler={} next={:.1}s", handler.0, next_delay_secs)
            }
            PanelEvent::PollFailed { handler, status, next_delay_secs } => {
                write!(f, "PollFailed handler={} status={} next={:.1}s", handler.0, status, next_delay_secs)
            }
            PanelEvent::AutoCycled { handler, entry } => {
                write!(f, "AutoCycled handler={} entry={}", handler.0, entry)
            }
            PanelEvent::PanelReset => write!(f, "PanelReset"),
        }
    }
}

#[derive(Default, Debug)]
pub struct EventBus {
    events: Vec<PanelEvent>,
}

impl EventBus {
    pub fn push(&mut self, event: PanelEvent) {
        log::debug!("[panel] {event}");
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<PanelEvent> {
        self.events.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PanelEvent> {
        self.events.iter()
    }
}
