use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::authority::ObjectId;
use crate::handler::PanelServices;
use crate::layout::{SliderDef, SliderId, SliderRange};
use crate::replication::StatePayload;
use crate::resources::ResourceSink;

const VALUE_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SliderState {
    /// Normalised position in `[0, 1]`.
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SliderOutput {
    Scalar(f32),
    Color(Vec4),
}

#[derive(Debug, Clone)]
pub struct Slider {
    def: SliderDef,
    state: SliderState,
    initial: SliderState,
}

impl Slider {
    pub fn new(def: &SliderDef) -> Self {
        let initial = SliderState { value: def.default };
        Self { def: def.clone(), state: initial, initial }
    }

    pub fn id(&self) -> SliderId {
        self.def.id
    }

    pub fn object(&self) -> ObjectId {
        ObjectId::Slider(self.def.id)
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn value(&self) -> f32 {
        self.state.value
    }

    pub fn output(&self) -> SliderOutput {
        let t = self.state.value;
        match self.def.range {
            SliderRange::Scalar { min, max } => SliderOutput::Scalar(min + (max - min) * t),
            SliderRange::Color { from, to } => SliderOutput::Color(from.lerp(to, t)),
        }
    }

    /// Accepts a normalised value from the input-mapping collaborator. Non-finite input is ignored.
    pub fn set_value(&mut self, value: f32, services: &mut dyn PanelServices) -> bool {
        if !value.is_finite() {
            log::warn!("[slider] ignoring non-finite value for '{}'", self.def.name);
            return false;
        }
        let value = value.clamp(0.0, 1.0);
        if (value - self.state.value).abs() < VALUE_EPSILON {
            return false;
        }
        services.ensure_local_authority(self.object());
        self.state.value = value;
        services.push_state(self.object(), StatePayload::Slider(self.state));
        true
    }

    pub fn receive_state(&mut self, state: SliderState) {
        let value = if state.value.is_finite() { state.value.clamp(0.0, 1.0) } else { self.initial.value };
        self.state = SliderState { value };
    }

    pub fn restore_initial_state(&mut self, services: &mut dyn PanelServices) -> bool {
        if self.state == self.initial {
            return false;
        }
        services.ensure_local_authority(self.object());
        self.state = self.initial;
        services.push_state(self.object(), StatePayload::Slider(self.state));
        true
    }

    pub fn apply(&self, sink: &mut dyn ResourceSink) {
        match self.output() {
            SliderOutput::Scalar(value) => sink.set_scalar(&self.def.resource, value),
            SliderOutput::Color(color) => sink.set_color(&self.def.resource, color),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceRef;

    fn def(range: SliderRange) -> SliderDef {
        SliderDef { id: SliderId(0), name: "fog".into(), resource: ResourceRef::new("fog"), range, default: 0.25 }
    }

    #[test]
    fn scalar_output_maps_into_range() {
        let slider = Slider::new(&def(SliderRange::Scalar { min: 10.0, max: 20.0 }));
        assert_eq!(slider.output(), SliderOutput::Scalar(12.5));
    }

    #[test]
    fn color_output_interpolates() {
        let mut slider = Slider::new(&def(SliderRange::Color { from: Vec4::ZERO, to: Vec4::ONE }));
        slider.receive_state(SliderState { value: 0.5 });
        assert_eq!(slider.output(), SliderOutput::Color(Vec4::splat(0.5)));
    }

    #[test]
    fn received_garbage_is_clamped_or_reset() {
        let mut slider = Slider::new(&def(SliderRange::Scalar { min: 0.0, max: 1.0 }));
        slider.receive_state(SliderState { value: 3.0 });
        assert_eq!(slider.value(), 1.0);
        slider.receive_state(SliderState { value: f32::NAN });
        assert_eq!(slider.value(), 0.25);
    }
}
