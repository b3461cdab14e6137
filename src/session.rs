use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::authority::ParticipantId;
use crate::layout::PanelLayout;
use crate::metrics::{FetchRequest, FetchResult};
use crate::panel::Panel;
use crate::resources::SceneMirror;

/// Upper bound on delivery rounds per pump; receiving never produces new traffic, so one round
/// normally drains everything.
const MAX_PUMP_ROUNDS: usize = 8;

/// In-process session that wires several panels together over the binary wire format. Every
/// message goes through encode/decode exactly as it would on a real network.
pub struct LocalSession {
    layout: Arc<PanelLayout>,
    scene: SceneMirror,
    master: Option<ParticipantId>,
    panels: BTreeMap<ParticipantId, Panel>,
    next_id: u32,
    delivered: u64,
}

impl LocalSession {
    /// `scene` is the authored scene every joiner starts from.
    pub fn new(layout: Arc<PanelLayout>, scene: SceneMirror) -> Self {
        Self { layout, scene, master: None, panels: BTreeMap::new(), next_id: 1, delivered: 0 }
    }

    pub fn master(&self) -> Option<ParticipantId> {
        self.master
    }

    pub fn participants(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.panels.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn panel(&self, id: ParticipantId) -> Option<&Panel> {
        self.panels.get(&id)
    }

    pub fn panel_mut(&mut self, id: ParticipantId) -> Option<&mut Panel> {
        self.panels.get_mut(&id)
    }

    fn expect_panel(&mut self, id: ParticipantId) -> Result<&mut Panel> {
        self.panels.get_mut(&id).ok_or_else(|| anyhow!("Participant {id} is not in the session"))
    }

    /// Adds a participant. The first one becomes master; later ones receive a full sync from
    /// everyone already present.
    pub fn join(&mut self) -> Result<ParticipantId> {
        let id = ParticipantId(self.next_id);
        self.next_id += 1;
        let master = *self.master.get_or_insert(id);
        self.pump()?;

        let mut panel = Panel::new(Arc::clone(&self.layout), id, master, self.scene.clone());
        for existing in self.panels.values() {
            for message in existing.full_sync() {
                panel.receive_bytes(&message.encode()?)?;
                self.delivered += 1;
            }
        }
        log::info!("[session] {id} joined (master {master}, {} present)", self.panels.len());
        self.panels.insert(id, panel);
        Ok(id)
    }

    /// Removes a participant after flushing what it already produced. Everything it owned goes
    /// to the lowest remaining id, which also becomes master if the leaver was master.
    pub fn leave(&mut self, id: ParticipantId) -> Result<()> {
        self.pump()?;
        if self.panels.remove(&id).is_none() {
            return Err(anyhow!("Participant {id} is not in the session"));
        }
        let Some(successor) = self.panels.keys().next().copied() else {
            self.master = None;
            log::info!("[session] {id} left; session is empty");
            return Ok(());
        };
        if self.master == Some(id) {
            self.master = Some(successor);
        }
        for panel in self.panels.values_mut() {
            panel.participant_left(id, successor);
        }
        log::info!("[session] {id} left; {successor} inherits its objects");
        Ok(())
    }

    /// Delivers every queued message to every other participant. Returns how many deliveries
    /// were made.
    pub fn pump(&mut self) -> Result<usize> {
        let mut total = 0;
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut batches: Vec<(ParticipantId, Vec<Vec<u8>>)> = Vec::new();
            for (id, panel) in self.panels.iter_mut() {
                let messages = panel.drain_outgoing();
                if messages.is_empty() {
                    continue;
                }
                let encoded = messages.iter().map(|message| message.encode()).collect::<Result<Vec<_>>>()?;
                batches.push((*id, encoded));
            }
            if batches.is_empty() {
                break;
            }
            for (sender, messages) in batches {
                for (id, panel) in self.panels.iter_mut() {
                    if *id == sender {
                        continue;
                    }
                    for bytes in &messages {
                        if let Err(err) = panel.receive_bytes(bytes) {
                            log::warn!("[replication] {id} dropped a message from {sender}: {err:?}");
                            continue;
                        }
                        total += 1;
                    }
                }
            }
        }
        self.delivered += total as u64;
        Ok(total)
    }

    /// Advances every participant's clock by `dt` and delivers what that produced.
    pub fn advance(&mut self, dt: Duration) -> Result<()> {
        for panel in self.panels.values_mut() {
            panel.advance(dt);
        }
        self.pump()?;
        Ok(())
    }

    pub fn press(&mut self, id: ParticipantId, button: usize) -> Result<bool> {
        let changed = self.expect_panel(id)?.press(button);
        self.pump()?;
        Ok(changed)
    }

    /// Fetch requests waiting on any participant, tagged with who issued them.
    pub fn take_fetch_requests(&mut self) -> Vec<(ParticipantId, FetchRequest)> {
        self.panels
            .iter_mut()
            .flat_map(|(id, panel)| panel.take_fetch_requests().into_iter().map(move |request| (*id, request)))
            .collect()
    }

    pub fn complete_fetch(&mut self, id: ParticipantId, request: &FetchRequest, result: FetchResult) -> Result<bool> {
        let accepted = self.expect_panel(id)?.complete_fetch(request, result);
        self.pump()?;
        Ok(accepted)
    }

    /// True when every participant holds identical folder state and applied the same scene.
    pub fn converged(&self) -> bool {
        let mut panels = self.panels.values();
        let Some(first) = panels.next() else {
            return true;
        };
        let states = first.handler_states();
        panels.all(|panel| panel.handler_states() == states && panel.scene().same_applied_state(first.scene()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PanelConfig;

    fn session() -> LocalSession {
        let json = r#"{"folders":[{"kind":"objects","entries":[{"label":"a","resource":"a"},{"label":"b","resource":"b"}]}]}"#;
        let layout = PanelLayout::from_config(&PanelConfig::from_json_slice(json.as_bytes()).expect("parse"));
        LocalSession::new(Arc::new(layout), SceneMirror::new())
    }

    #[test]
    fn first_joiner_is_master() {
        let mut session = session();
        let first = session.join().expect("join");
        let second = session.join().expect("join");
        assert_eq!(session.master(), Some(first));
        assert_ne!(first, second);
    }

    #[test]
    fn leaving_master_promotes_lowest_remaining() {
        let mut session = session();
        let first = session.join().expect("join");
        let second = session.join().expect("join");
        let third = session.join().expect("join");
        session.leave(first).expect("leave");
        assert_eq!(session.master(), Some(second));
        assert_eq!(session.panel(third).expect("panel").authority().master(), second);
        assert!(session.leave(first).is_err(), "second leave is an error");
    }
}
