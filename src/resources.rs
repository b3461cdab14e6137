use glam::Vec4;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::layout::SurfaceId;

/// Reference to an externally owned visual resource (object, material, skybox, display text).
/// Cloning is cheap; the panel never owns the resource itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef(Arc<str>);

impl ResourceRef {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn key(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Narrow interface to the scene the panel drives. Every call is a full assignment, so
/// re-applying the same state is always safe.
pub trait ResourceSink {
    fn set_visible(&mut self, resource: &ResourceRef, visible: bool);

    /// `None` disables the surface (hidden/muted).
    fn apply_surface(&mut self, surface: SurfaceId, resources: Option<&[ResourceRef]>);

    fn set_scalar(&mut self, resource: &ResourceRef, value: f32);

    fn set_color(&mut self, resource: &ResourceRef, color: Vec4);

    fn show_text(&mut self, resource: &ResourceRef, text: &str);

    /// Current visibility as authored in the scene, used to seed handlers without explicit defaults.
    fn authored_visibility(&self, _resource: &ResourceRef) -> Option<bool> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceState {
    Disabled,
    Enabled(Vec<ResourceRef>),
}

/// In-memory scene that records the last value applied to every resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneMirror {
    visibility: HashMap<ResourceRef, bool>,
    surfaces: HashMap<SurfaceId, SurfaceState>,
    scalars: HashMap<ResourceRef, f32>,
    colors: HashMap<ResourceRef, Vec4>,
    texts: HashMap<ResourceRef, String>,
    authored: HashMap<ResourceRef, bool>,
    writes: u64,
}

impl SceneMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds authored visibility, e.g. objects that start enabled in the scene.
    pub fn with_authored_visibility<I, S>(mut self, visible: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: AsRef<str>,
    {
        for (key, flag) in visible {
            let resource = ResourceRef::new(key);
            self.authored.insert(resource.clone(), flag);
            self.visibility.insert(resource, flag);
        }
        self
    }

    pub fn is_visible(&self, key: &str) -> Option<bool> {
        self.visibility.get(&ResourceRef::new(key)).copied()
    }

    pub fn surface(&self, surface: SurfaceId) -> Option<&SurfaceState> {
        self.surfaces.get(&surface)
    }

    /// Convenience for assertions: the applied list, or `None` when disabled or never applied.
    pub fn surface_resources(&self, surface: SurfaceId) -> Option<Vec<&str>> {
        match self.surfaces.get(&surface)? {
            SurfaceState::Disabled => None,
            SurfaceState::Enabled(list) => Some(list.iter().map(|r| r.key()).collect()),
        }
    }

    pub fn scalar(&self, key: &str) -> Option<f32> {
        self.scalars.get(&ResourceRef::new(key)).copied()
    }

    pub fn color(&self, key: &str) -> Option<Vec4> {
        self.colors.get(&ResourceRef::new(key)).copied()
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.texts.get(&ResourceRef::new(key)).map(|s| s.as_str())
    }

    /// Number of assignments received; idempotent re-application still counts.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    /// Compares applied state only, ignoring how many writes it took to get there.
    pub fn same_applied_state(&self, other: &SceneMirror) -> bool {
        self.visibility == other.visibility
            && self.surfaces == other.surfaces
            && self.scalars == other.scalars
            && self.colors == other.colors
            && self.texts == other.texts
    }

    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut visibility: Vec<_> = self.visibility.iter().collect();
        visibility.sort();
        for (resource, visible) in visibility {
            lines.push(format!("visible {resource} = {visible}"));
        }
        let mut surfaces: Vec<_> = self.surfaces.iter().collect();
        surfaces.sort_by_key(|(id, _)| **id);
        for (id, state) in surfaces {
            match state {
                SurfaceState::Disabled => lines.push(format!("surface {} disabled", id.0)),
                SurfaceState::Enabled(list) => {
                    let keys: Vec<&str> = list.iter().map(|r| r.key()).collect();
                    lines.push(format!("surface {} = [{}]", id.0, keys.join(", ")));
                }
            }
        }
        let mut scalars: Vec<_> = self.scalars.iter().collect();
        scalars.sort_by(|a, b| a.0.cmp(b.0));
        for (resource, value) in scalars {
            lines.push(format!("scalar {resource} = {value:.3}"));
        }
        let mut colors: Vec<_> = self.colors.iter().collect();
        colors.sort_by(|a, b| a.0.cmp(b.0));
        for (resource, color) in colors {
            lines.push(format!("color {resource} = [{:.2}, {:.2}, {:.2}, {:.2}]", color.x, color.y, color.z, color.w));
        }
        let mut texts: Vec<_> = self.texts.iter().collect();
        texts.sort();
        for (resource, text) in texts {
            lines.push(format!("text {resource} = {text}"));
        }
        lines
    }
}

impl ResourceSink for SceneMirror {
    fn set_visible(&mut self, resource: &ResourceRef, visible: bool) {
        self.writes += 1;
        self.visibility.insert(resource.clone(), visible);
    }

    fn apply_surface(&mut self, surface: SurfaceId, resources: Option<&[ResourceRef]>) {
        self.writes += 1;
        let state = match resources {
            Some(list) => SurfaceState::Enabled(list.to_vec()),
            None => SurfaceState::Disabled,
        };
        self.surfaces.insert(surface, state);
    }

    fn set_scalar(&mut self, resource: &ResourceRef, value: f32) {
        self.writes += 1;
        self.scalars.insert(resource.clone(), value);
    }

    fn set_color(&mut self, resource: &ResourceRef, color: Vec4) {
        self.writes += 1;
        self.colors.insert(resource.clone(), color);
    }

    fn show_text(&mut self, resource: &ResourceRef, text: &str) {
        self.writes += 1;
        self.texts.insert(resource.clone(), text.to_string());
    }

    fn authored_visibility(&self, resource: &ResourceRef) -> Option<bool> {
        self.authored.get(resource).copied()
    }
}
