use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::authority::{ObjectId, ParticipantId};
use crate::handler::HandlerState;
use crate::metrics::MetricsState;
use crate::slider::SliderState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatePayload {
    Handler(HandlerState),
    Slider(SliderState),
    Metrics(MetricsState),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub object: ObjectId,
    pub revision: u64,
    pub writer: ParticipantId,
    pub payload: StatePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplicationMessage {
    /// An authority claim; `term` orders competing claims on the same object.
    Ownership { object: ObjectId, owner: ParticipantId, term: u64 },
    State(StateSnapshot),
}

impl ReplicationMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("Encoding replication message")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("Decoding replication message")
    }

    pub fn object(&self) -> ObjectId {
        match self {
            ReplicationMessage::Ownership { object, .. } => *object,
            ReplicationMessage::State(snapshot) => snapshot.object,
        }
    }
}

/// Messages waiting to be broadcast, in the order they were produced.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Vec<ReplicationMessage>,
}

impl Outbox {
    pub fn push(&mut self, message: ReplicationMessage) {
        self.messages.push(message);
    }

    pub fn drain(&mut self) -> Vec<ReplicationMessage> {
        self.messages.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

/// Last-writer-wins bookkeeping. A snapshot is newer when `(revision, writer)` is strictly
/// greater than the last one applied for that object, which breaks ties identically everywhere.
#[derive(Debug, Default, Clone)]
pub struct RevisionLedger {
    latest: BTreeMap<ObjectId, (u64, ParticipantId)>,
}

impl RevisionLedger {
    pub fn next_revision(&mut self, object: ObjectId, writer: ParticipantId) -> u64 {
        let revision = self.latest.get(&object).map(|(revision, _)| revision + 1).unwrap_or(1);
        self.latest.insert(object, (revision, writer));
        revision
    }

    pub fn accept(&mut self, object: ObjectId, revision: u64, writer: ParticipantId) -> bool {
        let incoming = (revision, writer);
        match self.latest.get(&object) {
            Some(current) if incoming <= *current => false,
            _ => {
                self.latest.insert(object, incoming);
                true
            }
        }
    }

    /// Last applied `(revision, writer)` for `object`, if anything was written yet.
    pub fn latest(&self, object: ObjectId) -> Option<(u64, ParticipantId)> {
        self.latest.get(&object).copied()
    }

    pub fn revision(&self, object: ObjectId) -> u64 {
        self.latest.get(&object).map(|(revision, _)| *revision).unwrap_or(0)
    }
}
