use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const PRESET_EXTENSION: &str = "json";

/// Snapshot of every folder's activation and every slider, keyed by name so presets survive
/// reordering of the layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelPreset {
    pub name: String,
    #[serde(default)]
    pub folders: BTreeMap<String, Vec<bool>>,
    #[serde(default)]
    pub sliders: BTreeMap<String, f32>,
}

impl PanelPreset {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).with_context(|| format!("Serializing preset '{}'", self.name))
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Parsing panel preset JSON")
    }
}

#[derive(Debug, Clone)]
pub struct PresetDescriptor {
    pub name: String,
    pub path: PathBuf,
}

/// Directory of `*.json` presets.
pub struct PresetLibrary {
    root: PathBuf,
    entries: Vec<PresetDescriptor>,
    revision: u64,
}

impl PresetLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), entries: Vec::new(), revision: 0 }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[PresetDescriptor] {
        &self.entries
    }

    pub fn ensure_root(&self) -> Result<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)
                .with_context(|| format!("Creating preset directory {}", self.root.display()))?;
        }
        Ok(())
    }

    pub fn refresh(&mut self) -> Result<()> {
        self.ensure_root()?;
        let mut grouped: BTreeMap<String, PresetDescriptor> = BTreeMap::new();
        for entry in
            fs::read_dir(&self.root).with_context(|| format!("Scanning presets under {}", self.root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PRESET_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            grouped.insert(name.to_lowercase(), PresetDescriptor { name: name.to_string(), path: path.clone() });
        }
        self.entries = grouped.into_values().collect();
        self.revision = self.revision.wrapping_add(1);
        Ok(())
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        let mut file_name = name.trim().to_string();
        if file_name.is_empty() {
            file_name.push_str("preset");
        }
        let sanitized = file_name
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' { ch } else { '_' })
            .collect::<String>();
        self.root.join(format!("{sanitized}.{PRESET_EXTENSION}"))
    }

    pub fn save(&mut self, preset: &PanelPreset) -> Result<PathBuf> {
        self.ensure_root()?;
        let path = self.path_for(&preset.name);
        fs::write(&path, preset.to_json()?).with_context(|| format!("Writing preset {}", path.display()))?;
        log::info!("[preset] saved '{}' to {}", preset.name, path.display());
        self.refresh()?;
        Ok(path)
    }

    /// Loads by display name (case-insensitive) or by the sanitised file name.
    pub fn load(&self, name: &str) -> Result<PanelPreset> {
        let wanted = self.path_for(name);
        let wanted_stem = wanted.file_stem().and_then(|stem| stem.to_str()).unwrap_or_default();
        let path = self
            .entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name) || entry.name.eq_ignore_ascii_case(wanted_stem))
            .map(|entry| entry.path.clone())
            .unwrap_or_else(|| wanted.clone());
        let bytes = fs::read(&path).with_context(|| format!("Reading preset {}", path.display()))?;
        PanelPreset::from_json_slice(&bytes).with_context(|| format!("Loading preset {}", path.display()))
    }

    pub fn version(&self) -> u64 {
        self.revision
    }
}
