//! Derives what every shared resource should look like from the current activation snapshots.
//! Nothing here remembers previous output: the result depends only on the layout and the
//! snapshots passed in, which is what lets participants converge without sharing history.

use std::collections::BTreeMap;

use crate::layout::{HandlerId, PanelLayout, SurfaceDef, SurfaceId};
use crate::resources::{ResourceRef, ResourceSink};

/// Read-only view of every handler's activation bitset.
pub trait ActivationSource {
    /// Unknown handlers report an empty slice.
    fn activation(&self, handler: HandlerId) -> &[bool];
}

impl ActivationSource for BTreeMap<HandlerId, Vec<bool>> {
    fn activation(&self, handler: HandlerId) -> &[bool] {
        self.get(&handler).map(|bits| bits.as_slice()).unwrap_or(&[])
    }
}

fn push_unique(list: &mut Vec<ResourceRef>, resource: &ResourceRef) {
    if !list.contains(resource) {
        list.push(resource.clone());
    }
}

/// Applied resource list for `surface`, or `None` when the surface should be disabled.
///
/// Defaults lead, minus any default an inactive toggle stands in for; additive toggles follow in
/// feeder order. Once an exclusive folder has a selection, that selection replaces both the
/// defaults and the additive toggles.
pub fn compose_surface<A: ActivationSource + ?Sized>(
    layout: &PanelLayout,
    surface: &SurfaceDef,
    source: &A,
) -> Option<Vec<ResourceRef>> {
    let mut active: Vec<ResourceRef> = Vec::new();
    let mut exclusive_active: Vec<ResourceRef> = Vec::new();
    let mut suppressed: Vec<&ResourceRef> = Vec::new();

    for handler in &surface.feeding {
        let Some(folder) = layout.folder(*handler) else {
            continue;
        };
        let activation = source.activation(*handler);
        for entry in &folder.entries {
            let Some(resource) = entry.resource.as_ref() else {
                continue;
            };
            match activation.get(entry.local_index) {
                Some(true) => {
                    push_unique(&mut active, resource);
                    if folder.exclusive {
                        push_unique(&mut exclusive_active, resource);
                    }
                }
                Some(false) => suppressed.push(resource),
                None => {}
            }
        }
    }

    let mut filtered_defaults: Vec<ResourceRef> = Vec::with_capacity(surface.defaults.len());
    for resource in &surface.defaults {
        if !suppressed.contains(&resource) {
            push_unique(&mut filtered_defaults, resource);
        }
    }

    let mut combined = if exclusive_active.is_empty() {
        let mut combined = filtered_defaults.clone();
        for resource in &active {
            push_unique(&mut combined, resource);
        }
        combined
    } else {
        exclusive_active
    };
    if combined.is_empty() {
        combined = filtered_defaults;
    }
    if combined.is_empty() {
        None
    } else {
        Some(combined)
    }
}

/// Visibility of a resource driven by plain toggles: visible while any entry bound to it is active.
pub fn resolve_visibility<A: ActivationSource + ?Sized>(
    layout: &PanelLayout,
    resource: &ResourceRef,
    source: &A,
) -> bool {
    layout
        .visibility_members(resource)
        .iter()
        .any(|key| source.activation(key.handler).get(key.local).copied().unwrap_or(false))
}

/// Re-applies everything `handler` drives. Visibility is written straight to the sink; the
/// surfaces it feeds are returned so the caller can compose each of them once per batch.
pub fn project_handler<A: ActivationSource + ?Sized>(
    layout: &PanelLayout,
    handler: HandlerId,
    source: &A,
    sink: &mut dyn ResourceSink,
) -> Option<SurfaceId> {
    let folder = layout.folder(handler)?;
    if let Some(surface) = folder.surface {
        return Some(surface);
    }
    for entry in &folder.entries {
        if let Some(resource) = &entry.resource {
            sink.set_visible(resource, resolve_visibility(layout, resource, source));
        }
    }
    None
}

/// Composes and applies one surface. Returns what was applied for diagnostics.
pub fn apply_surface<A: ActivationSource + ?Sized>(
    layout: &PanelLayout,
    surface: SurfaceId,
    source: &A,
    sink: &mut dyn ResourceSink,
) -> Option<Vec<ResourceRef>> {
    let def = layout.surface(surface)?;
    let composed = compose_surface(layout, def, source);
    sink.apply_surface(surface, composed.as_deref());
    composed
}
