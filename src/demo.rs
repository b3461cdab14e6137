use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::authority::ParticipantId;
use crate::cli::CliOverrides;
use crate::config::PanelConfig;
use crate::layout::{HandlerId, PanelLayout, SliderId};
use crate::metrics::FetchResult;
use crate::resources::SceneMirror;
use crate::session::LocalSession;

pub const DEFAULT_CONFIG_PATH: &str = "config/panel.json";
const DEFAULT_PARTICIPANTS: usize = 3;
const DEFAULT_STEPS: u32 = 24;
const STEP: Duration = Duration::from_secs(5);

/// Final per-participant view printed by the binary.
#[derive(Debug, Clone)]
pub struct ParticipantReport {
    pub id: ParticipantId,
    pub display: Vec<String>,
    pub scene: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DemoReport {
    pub participants: Vec<ParticipantReport>,
    pub converged: bool,
    pub delivered: u64,
}

pub fn load_config(cli: &CliOverrides) -> PanelConfig {
    let path = cli.config_path().map(|path| path.as_path()).unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    let mut config = PanelConfig::load_or_default(path);
    let overrides = cli.config_overrides();
    if !overrides.is_empty() {
        log::info!("[config] CLI overrides applied: {}", overrides.applied_fields().join(", "));
        config.apply_overrides(&overrides);
    }
    config
}

/// Runs a deterministic script against a loopback session: participants take turns pressing
/// buttons across folders, moving sliders, and answering metric fetches, while time advances.
pub fn run(cli: &CliOverrides) -> Result<DemoReport> {
    let config = load_config(cli);
    let layout = Arc::new(PanelLayout::from_config(&config));
    let mut session = LocalSession::new(Arc::clone(&layout), SceneMirror::new());
    let participants = cli.participants().unwrap_or(DEFAULT_PARTICIPANTS);
    let steps = cli.steps().unwrap_or(DEFAULT_STEPS);

    let mut ids = Vec::with_capacity(participants);
    for _ in 0..participants {
        ids.push(session.join()?);
    }
    let folder_count = layout.folders().len().max(1);

    for step in 0..steps {
        let actor = ids[step as usize % ids.len()];
        let folder = HandlerId((step as usize % folder_count) as u16);
        let panel = session.panel_mut(actor).ok_or_else(|| anyhow!("Participant {actor} vanished"))?;
        panel.open_folder(folder);
        let buttons = panel.handler(folder).map(|handler| handler.folder().items_per_page).unwrap_or(0);
        if buttons > 0 {
            panel.press((step as usize * 3 + 1) % buttons);
        }
        if step % 4 == 0 && !layout.sliders().is_empty() {
            let slider = SliderId((step as usize / 4 % layout.sliders().len()) as u16);
            panel.set_slider(slider, (step as f32 * 0.13).fract());
        }
        session.pump()?;

        for (owner, request) in session.take_fetch_requests() {
            let payload = format!(r#"{{"visits": {}, "favorites": {}}}"#, 1000 + step * 17, 40 + step);
            let result = if step % 7 == 6 { FetchResult::Error(503) } else { FetchResult::Success(payload) };
            log::debug!("[demo] answering request #{} from {owner}", request.id);
            session.complete_fetch(owner, &request, result)?;
        }
        session.advance(STEP)?;
    }

    let participants = ids
        .iter()
        .filter_map(|id| session.panel(*id).map(|panel| (*id, panel)))
        .map(|(id, panel)| ParticipantReport {
            id,
            display: panel
                .display()
                .into_iter()
                .map(|button| {
                    let marker = if button.active { "*" } else { " " };
                    format!("[{marker}] {}", button.label)
                })
                .collect(),
            scene: panel.scene().describe(),
        })
        .collect();
    Ok(DemoReport { participants, converged: session.converged(), delivered: session.delivered() })
}
