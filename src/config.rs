use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderKind {
    Objects,
    Materials,
    Shaders,
    ToggleGroup,
    Skybox,
    ExternalMetrics,
}

impl FolderKind {
    pub fn label(self) -> &'static str {
        match self {
            FolderKind::Objects => "Objects",
            FolderKind::Materials => "Materials",
            FolderKind::Shaders => "Shaders",
            FolderKind::ToggleGroup => "Toggles",
            FolderKind::Skybox => "Skybox",
            FolderKind::ExternalMetrics => "Metrics",
        }
    }

    /// Folder kinds whose entries only make sense when composed onto a surface.
    pub fn requires_surface(self) -> bool {
        matches!(self, FolderKind::Materials | FolderKind::Shaders | FolderKind::Skybox)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PanelSettings {
    #[serde(default = "PanelSettings::default_items_per_page")]
    pub items_per_page: usize,
    #[serde(default)]
    pub default_folder: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryConfig {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub pair: Option<u32>,
    #[serde(default)]
    pub default_on: Option<bool>,
    #[serde(default)]
    pub metric: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoCycleConfig {
    #[serde(default = "AutoCycleConfig::default_interval_secs")]
    pub interval_secs: f32,
    #[serde(default = "AutoCycleConfig::default_history")]
    pub history: usize,
    #[serde(default)]
    pub start_enabled: bool,
}

/// Status classes a failed fetch can fall into; see `metrics::StatusClasses`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClassConfig {
    Transport,
    RateLimited,
    ClientError,
    ServerError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    pub target: String,
    #[serde(default = "PollingConfig::default_base_interval_secs")]
    pub base_interval_secs: f32,
    #[serde(default = "PollingConfig::default_jitter_fraction")]
    pub jitter_fraction: f32,
    #[serde(default = "PollingConfig::default_min_interval_secs")]
    pub min_interval_secs: f32,
    #[serde(default = "PollingConfig::default_max_interval_secs")]
    pub max_interval_secs: f32,
    #[serde(default = "PollingConfig::default_initial_backoff_secs")]
    pub initial_backoff_secs: f32,
    #[serde(default = "PollingConfig::default_growth_factor")]
    pub growth_factor: f32,
    #[serde(default = "PollingConfig::default_max_backoff_secs")]
    pub max_backoff_secs: f32,
    #[serde(default = "PollingConfig::default_backoff_on")]
    pub backoff_on: Vec<StatusClassConfig>,
    #[serde(default = "PollingConfig::default_preserve_last_good")]
    pub preserve_last_good: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderConfig {
    #[serde(default)]
    pub name: String,
    pub kind: FolderKind,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub items_per_page: Option<usize>,
    #[serde(default)]
    pub surface: Option<usize>,
    #[serde(default)]
    pub entries: Vec<EntryConfig>,
    #[serde(default)]
    pub auto_cycle: Option<AutoCycleConfig>,
    #[serde(default)]
    pub polling: Option<PollingConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EntryAddress {
    pub folder: usize,
    pub entry: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairConfig {
    pub id: u32,
    pub owner: EntryAddress,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SurfaceConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub defaults: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SliderRangeConfig {
    Scalar { min: f32, max: f32 },
    Color { from: [f32; 4], to: [f32; 4] },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SliderConfig {
    #[serde(default)]
    pub name: String,
    pub resource: String,
    pub range: SliderRangeConfig,
    #[serde(default)]
    pub default: f32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PanelConfig {
    #[serde(default)]
    pub panel: PanelSettings,
    #[serde(default)]
    pub folders: Vec<FolderConfig>,
    #[serde(default)]
    pub pairs: Vec<PairConfig>,
    #[serde(default)]
    pub surfaces: Vec<SurfaceConfig>,
    #[serde(default)]
    pub sliders: Vec<SliderConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct PanelConfigOverrides {
    pub items_per_page: Option<usize>,
    pub seed: Option<u64>,
}

impl PanelSettings {
    const fn default_items_per_page() -> usize {
        8
    }
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self { items_per_page: Self::default_items_per_page(), default_folder: 0, seed: None }
    }
}

impl AutoCycleConfig {
    fn default_interval_secs() -> f32 {
        30.0
    }

    const fn default_history() -> usize {
        3
    }
}

impl PollingConfig {
    fn default_base_interval_secs() -> f32 {
        60.0
    }

    fn default_jitter_fraction() -> f32 {
        0.1
    }

    fn default_min_interval_secs() -> f32 {
        15.0
    }

    fn default_max_interval_secs() -> f32 {
        600.0
    }

    fn default_initial_backoff_secs() -> f32 {
        30.0
    }

    fn default_growth_factor() -> f32 {
        2.0
    }

    fn default_max_backoff_secs() -> f32 {
        600.0
    }

    fn default_backoff_on() -> Vec<StatusClassConfig> {
        vec![StatusClassConfig::RateLimited, StatusClassConfig::ServerError]
    }

    const fn default_preserve_last_good() -> bool {
        true
    }
}

impl PanelConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read panel config {}", path.display()))?;
        Self::from_json_slice(&bytes).with_context(|| format!("Failed to parse panel config {}", path.display()))
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let cfg = serde_json::from_slice(bytes)?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("[config] Panel config load error: {err:?}. Falling back to an empty panel.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &PanelConfigOverrides) {
        if let Some(items) = overrides.items_per_page {
            self.panel.items_per_page = items;
        }
        if let Some(seed) = overrides.seed {
            self.panel.seed = Some(seed);
        }
    }
}

impl PanelConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.items_per_page.is_none() && self.seed.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.items_per_page.is_some() {
            fields.push("items_per_page");
        }
        if self.seed.is_some() {
            fields.push("seed");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg = PanelConfig::from_json_slice(br#"{"folders":[{"kind":"objects"}]}"#).expect("parse");
        assert_eq!(cfg.panel.items_per_page, 8);
        assert_eq!(cfg.folders.len(), 1);
        assert!(cfg.folders[0].entries.is_empty());
        assert!(!cfg.folders[0].exclusive);
    }

    #[test]
    fn polling_defaults_back_off_on_rate_limit_and_server_errors() {
        let cfg = PanelConfig::from_json_slice(
            br#"{"folders":[{"kind":"external_metrics","polling":{"target":"https://example.invalid/stats"}}]}"#,
        )
        .expect("parse");
        let polling = cfg.folders[0].polling.as_ref().expect("polling block");
        assert_eq!(polling.backoff_on, vec![StatusClassConfig::RateLimited, StatusClassConfig::ServerError]);
        assert!(polling.preserve_last_good);
        assert_eq!(polling.initial_backoff_secs, 30.0);
    }

    #[test]
    fn slider_ranges_are_tagged_by_mode() {
        let cfg = PanelConfig::from_json_slice(
            br#"{"sliders":[
                {"resource":"fog","range":{"mode":"scalar","min":0.0,"max":2.0}},
                {"resource":"tint","range":{"mode":"color","from":[0,0,0,1],"to":[1,1,1,1]},"default":0.5}
            ]}"#,
        )
        .expect("parse");
        assert!(matches!(cfg.sliders[0].range, SliderRangeConfig::Scalar { .. }));
        assert!(matches!(cfg.sliders[1].range, SliderRangeConfig::Color { .. }));
        assert_eq!(cfg.sliders[1].default, 0.5);
    }

    #[test]
    fn overrides_replace_items_per_page_and_seed() {
        let mut cfg = PanelConfig::default();
        let overrides = PanelConfigOverrides { items_per_page: Some(4), seed: Some(7) };
        cfg.apply_overrides(&overrides);
        assert_eq!(cfg.panel.items_per_page, 4);
        assert_eq!(cfg.panel.seed, Some(7));
        assert_eq!(overrides.applied_fields(), vec!["items_per_page", "seed"]);
    }
}
