use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::layout::{HandlerId, SliderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Every replicated object on the panel. Authority is tracked per object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectId {
    Handler(HandlerId),
    Slider(SliderId),
    Metrics(HandlerId),
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Handler(id) => write!(f, "handler#{}", id.0),
            ObjectId::Slider(id) => write!(f, "slider#{}", id.0),
            ObjectId::Metrics(id) => write!(f, "metrics#{}", id.0),
        }
    }
}

/// One accepted ownership claim. Claims order by `(term, owner)`, so two participants claiming
/// the same object in the same round settle on the same winner everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Claim {
    pub term: u64,
    pub owner: ParticipantId,
}

/// Local view of who may write each object. Objects nobody claimed yet belong to the session
/// master, which is also who inherits everything when an owner leaves.
#[derive(Debug, Clone)]
pub struct AuthorityTable {
    local: ParticipantId,
    master: ParticipantId,
    owners: BTreeMap<ObjectId, Claim>,
}

/// A transfer the local participant made and must announce to everyone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipChange {
    pub object: ObjectId,
    pub previous: ParticipantId,
    pub owner: ParticipantId,
    pub term: u64,
}

impl AuthorityTable {
    pub fn new(local: ParticipantId, master: ParticipantId) -> Self {
        Self { local, master, owners: BTreeMap::new() }
    }

    pub fn local(&self) -> ParticipantId {
        self.local
    }

    pub fn master(&self) -> ParticipantId {
        self.master
    }

    pub fn owner(&self, object: ObjectId) -> ParticipantId {
        self.owners.get(&object).map(|claim| claim.owner).unwrap_or(self.master)
    }

    /// Term of the last accepted claim on `object`; 0 while the master holds it implicitly.
    pub fn term(&self, object: ObjectId) -> u64 {
        self.owners.get(&object).map(|claim| claim.term).unwrap_or(0)
    }

    pub fn is_local_owner(&self, object: ObjectId) -> bool {
        self.owner(object) == self.local
    }

    /// Claims `object` for the local participant. Returns the change to broadcast, or `None` when
    /// authority was already held.
    pub fn ensure_local(&mut self, object: ObjectId) -> Option<OwnershipChange> {
        let previous = self.owner(object);
        if previous == self.local {
            return None;
        }
        let term = self.term(object) + 1;
        self.owners.insert(object, Claim { term, owner: self.local });
        Some(OwnershipChange { object, previous, owner: self.local, term })
    }

    /// Applies a claim announced by another participant. Returns `false` when an equal or newer
    /// claim was already accepted here.
    pub fn apply_remote(&mut self, object: ObjectId, owner: ParticipantId, term: u64) -> bool {
        let incoming = Claim { term, owner };
        match self.owners.get(&object) {
            Some(current) if incoming <= *current => false,
            _ => {
                self.owners.insert(object, incoming);
                true
            }
        }
    }

    /// Reassigns everything `left` owned (and mastership, if it was master) to `successor`.
    pub fn participant_left(&mut self, left: ParticipantId, successor: ParticipantId) {
        if self.master == left {
            self.master = successor;
        }
        for claim in self.owners.values_mut() {
            if claim.owner == left {
                claim.owner = successor;
            }
        }
    }

    pub fn explicit_owners(&self) -> impl Iterator<Item = (ObjectId, Claim)> + '_ {
        self.owners.iter().map(|(object, claim)| (*object, *claim))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HANDLER: ObjectId = ObjectId::Handler(HandlerId(0));

    #[test]
    fn unclaimed_objects_belong_to_master() {
        let table = AuthorityTable::new(ParticipantId(2), ParticipantId(1));
        assert_eq!(table.owner(HANDLER), ParticipantId(1));
        assert!(!table.is_local_owner(HANDLER));
    }

    #[test]
    fn ensure_local_reports_transfer_once() {
        let mut table = AuthorityTable::new(ParticipantId(2), ParticipantId(1));
        let change = table.ensure_local(HANDLER).expect("transfer needed");
        assert_eq!(change.previous, ParticipantId(1));
        assert_eq!(change.owner, ParticipantId(2));
        assert_eq!(change.term, 1);
        assert!(table.ensure_local(HANDLER).is_none(), "already held");
    }

    #[test]
    fn competing_claims_settle_on_the_same_owner_in_any_order() {
        let mut second = AuthorityTable::new(ParticipantId(2), ParticipantId(1));
        let mut third = AuthorityTable::new(ParticipantId(3), ParticipantId(1));
        let mut observer = AuthorityTable::new(ParticipantId(1), ParticipantId(1));
        let from_second = second.ensure_local(HANDLER).expect("claim");
        let from_third = third.ensure_local(HANDLER).expect("claim");

        assert!(second.apply_remote(HANDLER, from_third.owner, from_third.term));
        assert!(!third.apply_remote(HANDLER, from_second.owner, from_second.term), "lower claim loses");
        observer.apply_remote(HANDLER, from_third.owner, from_third.term);
        observer.apply_remote(HANDLER, from_second.owner, from_second.term);
        for table in [&second, &third, &observer] {
            assert_eq!(table.owner(HANDLER), ParticipantId(3));
        }

        let reclaim = second.ensure_local(HANDLER).expect("newer term");
        assert_eq!(reclaim.term, 2);
        assert!(third.apply_remote(HANDLER, reclaim.owner, reclaim.term), "a newer term beats a higher id");
    }

    #[test]
    fn leaving_owner_hands_objects_to_successor() {
        let mut table = AuthorityTable::new(ParticipantId(3), ParticipantId(1));
        table.apply_remote(HANDLER, ParticipantId(2), 1);
        table.participant_left(ParticipantId(2), ParticipantId(1));
        assert_eq!(table.owner(HANDLER), ParticipantId(1));
        table.participant_left(ParticipantId(1), ParticipantId(3));
        assert_eq!(table.master(), ParticipantId(3));
        assert!(table.is_local_owner(HANDLER));
    }
}
