use kestrel_panel::authority::{ObjectId, ParticipantId};
use kestrel_panel::compose::compose_surface;
use kestrel_panel::config::PanelConfig;
use kestrel_panel::handler::HandlerState;
use kestrel_panel::layout::{EntryKey, HandlerId, PanelLayout, SurfaceId};
use kestrel_panel::replication::{ReplicationMessage, StatePayload, StateSnapshot};
use kestrel_panel::resources::{SceneMirror, SurfaceState};
use kestrel_panel::Panel;
use std::collections::BTreeMap;
use std::sync::Arc;

const FLOOR: &str = r#"{
    "surfaces": [{"name":"floor","defaults":["D"]}],
    "folders": [
        {"name":"layers","kind":"materials","surface":0,"entries":[
            {"label":"r1","resource":"R1"},
            {"label":"dust","resource":"Dust"}
        ]},
        {"name":"shader","kind":"shaders","surface":0,"exclusive":true,"entries":[
            {"label":"r2","resource":"R2"},
            {"label":"r3","resource":"R3"}
        ]},
        {"name":"decals","kind":"materials","surface":0,"entries":[
            {"label":"moss","resource":"Moss"}
        ]}
    ]
}"#;

#[test]
fn exclusive_selection_supersedes_defaults_and_additive_layers() {
    let mut panel = panel(FLOOR);
    assert_eq!(panel.scene().surface_resources(SurfaceId(0)), Some(vec!["D"]));

    panel.toggle(EntryKey::new(HandlerId(0), 0));
    assert_eq!(panel.scene().surface_resources(SurfaceId(0)), Some(vec!["D", "R1"]));

    panel.toggle(EntryKey::new(HandlerId(1), 0));
    assert_eq!(panel.scene().surface_resources(SurfaceId(0)), Some(vec!["R2"]), "defaults suppressed");

    panel.toggle(EntryKey::new(HandlerId(1), 0));
    assert_eq!(
        panel.scene().surface_resources(SurfaceId(0)),
        Some(vec!["D", "R1"]),
        "clearing the exclusive selection restores the additive composition"
    );
}

#[test]
fn composition_is_independent_of_change_order() {
    let steps = [EntryKey::new(HandlerId(0), 1), EntryKey::new(HandlerId(2), 0), EntryKey::new(HandlerId(0), 0)];
    let mut forward = panel(FLOOR);
    for key in steps {
        forward.toggle(key);
    }
    let mut backward = panel(FLOOR);
    for key in steps.iter().rev() {
        backward.toggle(*key);
    }
    assert_eq!(forward.handler_states(), backward.handler_states());
    assert_eq!(
        forward.scene().surface_resources(SurfaceId(0)),
        backward.scene().surface_resources(SurfaceId(0)),
        "surface output must only depend on the snapshots"
    );
    assert_eq!(forward.scene().surface_resources(SurfaceId(0)), Some(vec!["D", "R1", "Dust", "Moss"]));
}

#[test]
fn remote_snapshots_in_any_arrival_order_compose_identically() {
    let layers = state_message(0, 1, vec![true, false]);
    let decals = state_message(2, 1, vec![true]);

    let mut first = panel(FLOOR);
    first.receive(layers.clone());
    first.receive(decals.clone());
    let mut second = panel(FLOOR);
    second.receive(decals);
    second.receive(layers);
    assert!(first.scene().same_applied_state(second.scene()));
}

#[test]
fn redelivering_unchanged_state_reapplies_identically() {
    let mut panel = panel(FLOOR);
    panel.receive(state_message(0, 1, vec![true, true]));
    let applied = panel.scene().clone();
    let writes = panel.scene().write_count();

    panel.receive(state_message(0, 2, vec![true, true]));
    assert!(panel.scene().same_applied_state(&applied), "re-application must be idempotent");
    assert!(panel.scene().write_count() > writes, "effects were re-applied, not skipped");
}

#[test]
fn surface_without_defaults_or_selection_is_disabled() {
    let layout = layout(
        r#"{"surfaces":[{"name":"sky"}],
            "folders":[{"kind":"skybox","surface":0,"exclusive":true,"entries":[{"label":"dawn","resource":"dawn"}]}]}"#,
    );
    let surface = layout.surface(SurfaceId(0)).expect("surface");
    let states: BTreeMap<HandlerId, Vec<bool>> = BTreeMap::from([(HandlerId(0), vec![false])]);
    assert_eq!(compose_surface(&layout, surface, &states), None);

    let panel = Panel::new(Arc::new(layout), ParticipantId(1), ParticipantId(1), SceneMirror::new());
    assert_eq!(panel.scene().surface(SurfaceId(0)), Some(&SurfaceState::Disabled));
}

#[test]
fn inactive_toggle_hides_the_default_it_stands_for() {
    let layout = layout(
        r#"{"surfaces":[{"name":"floor","defaults":["Base","Gloss"]}],
            "folders":[{"kind":"materials","surface":0,"entries":[{"label":"gloss","resource":"Gloss"}]}]}"#,
    );
    let surface = layout.surface(SurfaceId(0)).expect("surface");
    let off: BTreeMap<HandlerId, Vec<bool>> = BTreeMap::from([(HandlerId(0), vec![false])]);
    let on: BTreeMap<HandlerId, Vec<bool>> = BTreeMap::from([(HandlerId(0), vec![true])]);
    let keys = |list: Option<Vec<kestrel_panel::resources::ResourceRef>>| {
        list.map(|list| list.iter().map(|resource| resource.key().to_string()).collect::<Vec<_>>())
    };
    assert_eq!(keys(compose_surface(&layout, surface, &off)), Some(vec!["Base".to_string()]));
    assert_eq!(keys(compose_surface(&layout, surface, &on)), Some(vec!["Base".to_string(), "Gloss".to_string()]));
}

fn layout(json: &str) -> PanelLayout {
    PanelLayout::from_config(&PanelConfig::from_json_slice(json.as_bytes()).expect("parse config"))
}

fn panel(json: &str) -> Panel {
    Panel::new(Arc::new(layout(json)), ParticipantId(1), ParticipantId(1), SceneMirror::new())
}

fn state_message(folder: u16, revision: u64, activation: Vec<bool>) -> ReplicationMessage {
    ReplicationMessage::State(StateSnapshot {
        object: ObjectId::Handler(HandlerId(folder)),
        revision,
        writer: ParticipantId(2),
        payload: StatePayload::Handler(HandlerState { activation, current_page: 0 }),
    })
}
