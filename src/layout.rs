use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};

use crate::config::{AutoCycleConfig, FolderKind, PanelConfig, PollingConfig, SliderRangeConfig};
use crate::resources::ResourceRef;

/// One handler per folder; the id doubles as the folder index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerId(pub u16);

impl HandlerId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SliderId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairId(pub u32);

/// Stable address of an entry across the whole panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    pub handler: HandlerId,
    pub local: usize,
}

impl EntryKey {
    pub fn new(handler: HandlerId, local: usize) -> Self {
        Self { handler, local }
    }
}

#[derive(Debug, Clone)]
pub struct EntryDef {
    pub local_index: usize,
    pub label: String,
    pub resource: Option<ResourceRef>,
    pub pair: Option<PairId>,
    pub default_on: Option<bool>,
    pub metric: Option<String>,
}

impl EntryDef {
    /// An entry is usable when it can be shown and has something to drive.
    pub fn is_configured(&self) -> bool {
        !self.label.is_empty() && self.resource.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct FolderDef {
    pub id: HandlerId,
    pub name: String,
    pub kind: FolderKind,
    pub exclusive: bool,
    pub items_per_page: usize,
    pub surface: Option<SurfaceId>,
    pub entries: Vec<EntryDef>,
    pub auto_cycle: Option<AutoCycleConfig>,
    pub polling: Option<PollingConfig>,
}

impl FolderDef {
    pub fn entry(&self, local: usize) -> Option<&EntryDef> {
        self.entries.get(local)
    }

    pub fn is_configured(&self) -> bool {
        !self.entries.is_empty() && self.items_per_page > 0
    }

    pub fn page_count(&self) -> usize {
        if self.items_per_page == 0 {
            return 1;
        }
        self.entries.len().div_ceil(self.items_per_page).max(1)
    }
}

#[derive(Debug, Clone)]
pub struct PairDef {
    pub id: PairId,
    pub owner: EntryKey,
    pub members: SmallVec<[EntryKey; 4]>,
}

impl PairDef {
    pub fn is_owner(&self, key: EntryKey) -> bool {
        self.owner == key
    }
}

#[derive(Debug, Clone)]
pub struct SurfaceDef {
    pub id: SurfaceId,
    pub name: String,
    pub defaults: Vec<ResourceRef>,
    /// Sorted ascending so every participant scans in the same order.
    pub feeding: Vec<HandlerId>,
}

#[derive(Debug, Clone)]
pub enum SliderRange {
    Scalar { min: f32, max: f32 },
    Color { from: glam::Vec4, to: glam::Vec4 },
}

#[derive(Debug, Clone)]
pub struct SliderDef {
    pub id: SliderId,
    pub name: String,
    pub resource: ResourceRef,
    pub range: SliderRange,
    pub default: f32,
}

/// Immutable arena of everything authored for the panel. Bad references in the config are
/// warned about and dropped so the affected folders simply stay inert.
#[derive(Debug, Clone, Default)]
pub struct PanelLayout {
    folders: Vec<FolderDef>,
    pairs: BTreeMap<PairId, PairDef>,
    surfaces: Vec<SurfaceDef>,
    sliders: Vec<SliderDef>,
    items_per_page: usize,
    default_folder: HandlerId,
    seed: Option<u64>,
    visibility_index: HashMap<ResourceRef, SmallVec<[EntryKey; 4]>>,
}

impl PanelLayout {
    pub fn from_config(config: &PanelConfig) -> Self {
        let items_per_page = config.panel.items_per_page;
        if items_per_page == 0 {
            log::warn!("[config] items_per_page is 0; every folder will be inert.");
        }

        let mut surfaces: Vec<SurfaceDef> = config
            .surfaces
            .iter()
            .enumerate()
            .map(|(index, surface)| SurfaceDef {
                id: SurfaceId(index as u16),
                name: surface.name.clone(),
                defaults: surface.defaults.iter().map(ResourceRef::new).collect(),
                feeding: Vec::new(),
            })
            .collect();

        let mut folders = Vec::with_capacity(config.folders.len());
        for (index, folder) in config.folders.iter().enumerate() {
            let id = HandlerId(index as u16);
            let surface = match folder.surface {
                Some(surface_index) if surface_index < surfaces.len() => {
                    let surface_id = SurfaceId(surface_index as u16);
                    surfaces[surface_index].feeding.push(id);
                    Some(surface_id)
                }
                Some(surface_index) => {
                    log::warn!("[config] folder {index} references unknown surface {surface_index}; ignoring.");
                    None
                }
                None => None,
            };
            if surface.is_none() && folder.kind.requires_surface() {
                log::warn!(
                    "[config] folder {index} ({}) has no surface; its entries will not drive anything.",
                    folder.kind.label()
                );
            }
            let entries = folder
                .entries
                .iter()
                .enumerate()
                .map(|(local_index, entry)| EntryDef {
                    local_index,
                    label: entry.label.clone(),
                    resource: entry.resource.as_deref().filter(|key| !key.is_empty()).map(ResourceRef::new),
                    pair: entry.pair.map(PairId),
                    default_on: entry.default_on,
                    metric: entry.metric.clone(),
                })
                .collect();
            let auto_cycle = match &folder.auto_cycle {
                Some(_) if !folder.exclusive => {
                    log::warn!("[config] folder {index} declares auto_cycle but is not exclusive; ignoring.");
                    None
                }
                other => other.clone(),
            };
            let polling = match &folder.polling {
                Some(_) if folder.kind != FolderKind::ExternalMetrics => {
                    log::warn!("[config] folder {index} declares polling but is not an external_metrics folder.");
                    None
                }
                other => other.clone(),
            };
            folders.push(FolderDef {
                id,
                name: if folder.name.is_empty() { folder.kind.label().to_string() } else { folder.name.clone() },
                kind: folder.kind,
                exclusive: folder.exclusive,
                items_per_page: folder.items_per_page.unwrap_or(items_per_page),
                surface,
                entries,
                auto_cycle,
                polling,
            });
        }
        for surface in &mut surfaces {
            surface.feeding.sort();
        }

        let pairs = Self::build_pairs(config, &mut folders);

        let sliders = config
            .sliders
            .iter()
            .enumerate()
            .map(|(index, slider)| SliderDef {
                id: SliderId(index as u16),
                name: slider.name.clone(),
                resource: ResourceRef::new(&slider.resource),
                range: match slider.range {
                    SliderRangeConfig::Scalar { min, max } => SliderRange::Scalar { min, max },
                    SliderRangeConfig::Color { from, to } => {
                        SliderRange::Color { from: glam::Vec4::from_array(from), to: glam::Vec4::from_array(to) }
                    }
                },
                default: slider.default.clamp(0.0, 1.0),
            })
            .collect();

        let default_folder = if config.panel.default_folder < folders.len() {
            HandlerId(config.panel.default_folder as u16)
        } else {
            if !folders.is_empty() {
                log::warn!("[config] default_folder {} out of range; using 0.", config.panel.default_folder);
            }
            HandlerId(0)
        };

        let mut visibility_index: HashMap<ResourceRef, SmallVec<[EntryKey; 4]>> = HashMap::new();
        for folder in &folders {
            if folder.surface.is_some() {
                continue;
            }
            for entry in &folder.entries {
                if let Some(resource) = &entry.resource {
                    visibility_index
                        .entry(resource.clone())
                        .or_default()
                        .push(EntryKey::new(folder.id, entry.local_index));
                }
            }
        }

        Self {
            folders,
            pairs,
            surfaces,
            sliders,
            items_per_page,
            default_folder,
            seed: config.panel.seed,
            visibility_index,
        }
    }

    fn build_pairs(config: &PanelConfig, folders: &mut [FolderDef]) -> BTreeMap<PairId, PairDef> {
        let mut members: BTreeMap<PairId, SmallVec<[EntryKey; 4]>> = BTreeMap::new();
        for folder in folders.iter() {
            for entry in &folder.entries {
                if let Some(pair) = entry.pair {
                    members.entry(pair).or_default().push(EntryKey::new(folder.id, entry.local_index));
                }
            }
        }

        let mut pairs = BTreeMap::new();
        for (pair_id, pair_members) in members {
            let declared = config.pairs.iter().find(|pair| PairId(pair.id) == pair_id).map(|pair| {
                EntryKey::new(HandlerId(pair.owner.folder as u16), pair.owner.entry)
            });
            let owner = match declared {
                Some(owner) if pair_members.contains(&owner) => owner,
                Some(owner) => {
                    log::warn!(
                        "[config] pair {} owner {:?} is not a member; using first member instead.",
                        pair_id.0,
                        owner
                    );
                    pair_members[0]
                }
                None => pair_members[0],
            };
            pairs.insert(pair_id, PairDef { id: pair_id, owner, members: pair_members });
        }

        for declared in &config.pairs {
            if !pairs.contains_key(&PairId(declared.id)) {
                log::warn!("[config] pair {} has no member entries; ignoring.", declared.id);
            }
        }
        // Entries pointing at a pair that never materialised behave as plain toggles.
        for folder in folders.iter_mut() {
            for entry in &mut folder.entries {
                if entry.pair.is_some_and(|pair| !pairs.contains_key(&pair)) {
                    entry.pair = None;
                }
            }
        }
        pairs
    }

    pub fn folder(&self, id: HandlerId) -> Option<&FolderDef> {
        self.folders.get(id.index())
    }

    pub fn folders(&self) -> &[FolderDef] {
        &self.folders
    }

    pub fn entry(&self, key: EntryKey) -> Option<&EntryDef> {
        self.folder(key.handler).and_then(|folder| folder.entry(key.local))
    }

    pub fn pair(&self, id: PairId) -> Option<&PairDef> {
        self.pairs.get(&id)
    }

    pub fn pairs(&self) -> impl Iterator<Item = &PairDef> {
        self.pairs.values()
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&SurfaceDef> {
        self.surfaces.get(id.0 as usize)
    }

    pub fn surfaces(&self) -> &[SurfaceDef] {
        &self.surfaces
    }

    pub fn slider(&self, id: SliderId) -> Option<&SliderDef> {
        self.sliders.get(id.0 as usize)
    }

    pub fn sliders(&self) -> &[SliderDef] {
        &self.sliders
    }

    pub fn items_per_page(&self) -> usize {
        self.items_per_page
    }

    pub fn default_folder(&self) -> HandlerId {
        self.default_folder
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn is_folder_exclusive(&self, id: HandlerId) -> bool {
        self.folder(id).is_some_and(|folder| folder.exclusive)
    }

    pub fn folder_kind(&self, id: HandlerId) -> Option<FolderKind> {
        self.folder(id).map(|folder| folder.kind)
    }

    /// Entries outside any surface that bind `resource`; visibility is the OR over them.
    pub fn visibility_members(&self, resource: &ResourceRef) -> &[EntryKey] {
        self.visibility_index.get(resource).map(|keys| keys.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(json: &str) -> PanelLayout {
        PanelLayout::from_config(&PanelConfig::from_json_slice(json.as_bytes()).expect("parse"))
    }

    #[test]
    fn pair_owner_falls_back_to_first_member() {
        let layout = layout(
            r#"{
                "folders": [
                    {"kind":"objects","entries":[{"label":"a","resource":"lamp","pair":1}]},
                    {"kind":"toggle_group","entries":[{"label":"b","resource":"lamp","pair":1}]}
                ],
                "pairs": [{"id":1,"owner":{"folder":3,"entry":0}}]
            }"#,
        );
        let pair = layout.pair(PairId(1)).expect("pair built");
        assert_eq!(pair.owner, EntryKey::new(HandlerId(0), 0));
        assert_eq!(pair.members.len(), 2);
    }

    #[test]
    fn unknown_surface_leaves_folder_unbound() {
        let layout = layout(r#"{"folders":[{"kind":"materials","surface":4,"entries":[{"label":"m","resource":"r"}]}]}"#);
        assert_eq!(layout.folder(HandlerId(0)).expect("folder").surface, None);
    }

    #[test]
    fn page_count_rounds_up_and_never_drops_to_zero() {
        let layout = layout(
            r#"{"panel":{"items_per_page":2},"folders":[
                {"kind":"objects","entries":[{"label":"a"},{"label":"b"},{"label":"c"}]},
                {"kind":"objects"}
            ]}"#,
        );
        assert_eq!(layout.folder(HandlerId(0)).expect("folder").page_count(), 2);
        assert_eq!(layout.folder(HandlerId(1)).expect("folder").page_count(), 1);
        assert!(!layout.folder(HandlerId(1)).expect("folder").is_configured());
    }

    #[test]
    fn surface_feeders_are_sorted() {
        let layout = layout(
            r#"{"surfaces":[{"defaults":["base"]}],"folders":[
                {"kind":"objects"},
                {"kind":"shaders","surface":0},
                {"kind":"materials","surface":0}
            ]}"#,
        );
        assert_eq!(layout.surface(SurfaceId(0)).expect("surface").feeding, vec![HandlerId(1), HandlerId(2)]);
    }
}
