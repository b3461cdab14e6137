use kestrel_panel::authority::{ObjectId, ParticipantId};
use kestrel_panel::config::PanelConfig;
use kestrel_panel::events::PanelEvent;
use kestrel_panel::handler::HandlerState;
use kestrel_panel::layout::{EntryKey, HandlerId, PanelLayout, SliderId, SurfaceId};
use kestrel_panel::replication::{ReplicationMessage, StatePayload, StateSnapshot};
use kestrel_panel::resources::SceneMirror;
use kestrel_panel::{LocalSession, Panel};
use std::sync::Arc;

const ROOM: &str = r#"{
    "panel": {"items_per_page": 4, "seed": 9},
    "surfaces": [{"name":"floor","defaults":["concrete"]}],
    "folders": [
        {"name":"props","kind":"objects","entries":[
            {"label":"lamp","resource":"lamp","default_on":true},
            {"label":"rug","resource":"rug"},
            {"label":"plant","resource":"plant"}
        ]},
        {"name":"floor","kind":"materials","surface":0,"entries":[{"label":"wet","resource":"wet"}]},
        {"name":"shader","kind":"shaders","surface":0,"exclusive":true,"entries":[
            {"label":"neon","resource":"neon"},{"label":"glass","resource":"glass"}
        ]}
    ],
    "sliders": [{"name":"fog","resource":"fog","range":{"mode":"scalar","min":0.0,"max":1.0},"default":0.5}]
}"#;

#[test]
fn participants_converge_after_independent_changes() {
    let mut session = session();
    let first = session.join().expect("join");
    let second = session.join().expect("join");
    let third = session.join().expect("join");

    session.panel_mut(second).expect("second").toggle(EntryKey::new(HandlerId(1), 0));
    session.panel_mut(third).expect("third").toggle(EntryKey::new(HandlerId(2), 1));
    session.panel_mut(first).expect("first").toggle(EntryKey::new(HandlerId(0), 2));
    session.panel_mut(third).expect("third").set_slider(SliderId(0), 0.8);
    session.pump().expect("pump");

    assert!(session.converged(), "every participant must apply the same scene");
    let panel = session.panel(first).expect("first");
    assert_eq!(panel.scene().surface_resources(SurfaceId(0)), Some(vec!["glass"]));
    assert_eq!(panel.scene().scalar("fog"), Some(0.8));
    assert_eq!(panel.authority().owner(ObjectId::Handler(HandlerId(1))), second);
    assert_eq!(panel.authority().owner(ObjectId::Handler(HandlerId(2))), third);
}

#[test]
fn late_joiner_receives_a_full_sync() {
    let mut session = session();
    let first = session.join().expect("join");
    let second = session.join().expect("join");
    session.panel_mut(second).expect("second").toggle(EntryKey::new(HandlerId(0), 1));
    session.panel_mut(first).expect("first").toggle(EntryKey::new(HandlerId(1), 0));
    session.pump().expect("pump");

    let late = session.join().expect("join");
    assert!(session.converged());
    let panel = session.panel(late).expect("late");
    assert_eq!(panel.scene().is_visible("rug"), Some(true));
    assert_eq!(panel.scene().surface_resources(SurfaceId(0)), Some(vec!["concrete", "wet"]));
    assert_eq!(panel.authority().owner(ObjectId::Handler(HandlerId(0))), second);
}

#[test]
fn concurrent_writers_resolve_by_revision_then_writer() {
    let mut session = session();
    let first = session.join().expect("join");
    let second = session.join().expect("join");
    session.panel_mut(first).expect("first").toggle(EntryKey::new(HandlerId(0), 1));
    session.panel_mut(second).expect("second").toggle(EntryKey::new(HandlerId(0), 2));
    session.pump().expect("pump");

    assert!(session.converged(), "both sides settle on one snapshot");
    let state = session.panel(first).expect("first").handler(HandlerId(0)).expect("props").state().clone();
    assert_eq!(state.activation, vec![true, false, true], "the higher writer id wins the tie");
    assert!(
        session.panel(second).expect("second").events().any(|event| matches!(event, PanelEvent::StaleSnapshot { .. })),
        "the losing snapshot is reported as stale"
    );
}

#[test]
fn rival_claims_settle_on_one_owner_and_late_joiners_still_converge() {
    let mut session = session();
    let first = session.join().expect("join");
    let second = session.join().expect("join");
    let third = session.join().expect("join");
    session.panel_mut(second).expect("second").toggle(EntryKey::new(HandlerId(0), 0));
    session.panel_mut(third).expect("third").toggle(EntryKey::new(HandlerId(0), 1));
    session.pump().expect("pump");

    for id in [first, second, third] {
        let owner = session.panel(id).expect("participant").authority().owner(ObjectId::Handler(HandlerId(0)));
        assert_eq!(owner, third, "{id} must agree on the winning claim");
    }
    assert!(session.converged());

    let late = session.join().expect("join");
    assert!(session.converged(), "the agreed owner syncs the late joiner");
    let panel = session.panel(late).expect("late");
    assert_eq!(panel.handler(HandlerId(0)).expect("props").activation(), &[true, true, false]);
    assert_eq!(panel.authority().owner(ObjectId::Handler(HandlerId(0))), third);
}

#[test]
fn leaving_owner_hands_objects_to_the_lowest_remaining_participant() {
    let mut session = session();
    let first = session.join().expect("join");
    let second = session.join().expect("join");
    let third = session.join().expect("join");
    session.press(third, 1).expect("press");
    session.leave(third).expect("leave");
    session.leave(first).expect("leave");

    let panel = session.panel_mut(second).expect("second");
    assert_eq!(panel.authority().owner(ObjectId::Handler(HandlerId(0))), second);
    panel.drain_outgoing();
    panel.toggle(EntryKey::new(HandlerId(0), 1));
    assert!(
        panel.drain_outgoing().iter().all(|message| !matches!(message, ReplicationMessage::Ownership { .. })),
        "inherited authority needs no transfer"
    );
}

#[test]
fn older_snapshots_are_ignored() {
    let mut panel = panel();
    panel.receive(snapshot(3, vec![false, true, false]));
    panel.receive(snapshot(2, vec![false, false, true]));
    assert_eq!(panel.handler(HandlerId(0)).expect("props").activation(), &[false, true, false]);
    assert!(panel.events().any(|event| matches!(event, PanelEvent::StaleSnapshot { revision: 2, .. })));
}

#[test]
fn malformed_snapshots_are_normalised_to_the_layout() {
    let mut panel = panel();
    panel.receive(ReplicationMessage::State(StateSnapshot {
        object: ObjectId::Handler(HandlerId(0)),
        revision: 1,
        writer: ParticipantId(2),
        payload: StatePayload::Handler(HandlerState { activation: vec![true; 9], current_page: 40 }),
    }));
    let handler = panel.handler(HandlerId(0)).expect("props");
    assert_eq!(handler.activation().len(), 3);
    assert_eq!(handler.current_page(), 0);
}

#[test]
fn garbage_bytes_are_rejected_with_context() {
    let mut panel = panel();
    let err = panel.receive_bytes(&[9, 9, 9]).unwrap_err();
    assert!(format!("{err:?}").contains("Decoding replication message"));
}

#[test]
fn taking_authority_announces_the_transfer_first() {
    let mut panel = Panel::new(layout(), ParticipantId(2), ParticipantId(1), SceneMirror::new());
    panel.toggle(EntryKey::new(HandlerId(0), 1));
    let outgoing = panel.drain_outgoing();
    assert!(matches!(
        outgoing.first(),
        Some(ReplicationMessage::Ownership { owner, .. }) if *owner == ParticipantId(2)
    ));
    assert!(matches!(outgoing.get(1), Some(ReplicationMessage::State(snapshot)) if snapshot.revision == 1));
}

fn layout() -> Arc<PanelLayout> {
    Arc::new(PanelLayout::from_config(&PanelConfig::from_json_slice(ROOM.as_bytes()).expect("parse config")))
}

fn session() -> LocalSession {
    LocalSession::new(layout(), SceneMirror::new())
}

fn panel() -> Panel {
    Panel::new(layout(), ParticipantId(1), ParticipantId(1), SceneMirror::new())
}

fn snapshot(revision: u64, activation: Vec<bool>) -> ReplicationMessage {
    ReplicationMessage::State(StateSnapshot {
        object: ObjectId::Handler(HandlerId(0)),
        revision,
        writer: ParticipantId(2),
        payload: StatePayload::Handler(HandlerState { activation, current_page: 0 }),
    })
}
