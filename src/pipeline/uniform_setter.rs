// src/pipeline/uniform_setter.rs
//! Per-draw uniform overrides.
//!
//! Passes fill the uniforms they know about, then hand the set to a
//! [`UniformSetter`] together with a [`DrawInfo`] describing the draw. The
//! setter may overwrite or add values by name without the pass knowing
//! what they are.

use glam::{Vec2, Vec4};

use crate::camera::Camera;
use crate::gpu::UniformSet;
use crate::instances::Instance;
use crate::materials::Material;

pub struct DrawInfo<'a> {
    /// Name of the pass issuing the draw.
    pub pass: &'a str,
    pub material: &'a Material,
    /// `None` for particle batches.
    pub instance: Option<&'a Instance>,
}

pub trait UniformSetter {
    fn apply(&self, info: &DrawInfo<'_>, uniforms: &mut UniformSet);
}

impl<F> UniformSetter for F
where
    F: Fn(&DrawInfo<'_>, &mut UniformSet),
{
    fn apply(&self, info: &DrawInfo<'_>, uniforms: &mut UniformSet) {
        self(info, uniforms)
    }
}

/// Leaves every uniform as the pass set it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverrides;

impl UniformSetter for NoOverrides {
    fn apply(&self, _info: &DrawInfo<'_>, _uniforms: &mut UniformSet) {}
}

/// Values shared by every material draw of a frame.
pub fn frame_uniforms(camera: &Camera, screen_size: Vec2, time: f32) -> UniformSet {
    let mut uniforms = UniformSet::new();
    uniforms
        .set("view_proj", camera.view_proj_matrix())
        .set("view", camera.view_matrix())
        .set("projection", camera.proj_matrix())
        .set("camera_position", camera.position.extend(1.0))
        .set("screen_size", screen_size)
        .set("time", time)
        .set("billboard", 0.0f32)
        .set("picking_color", Vec4::ZERO);
    uniforms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Assets;
    use crate::config::RendererSettings;
    use crate::gpu::headless::HeadlessDevice;
    use crate::gpu::UniformValue;
    use crate::materials::{MaterialBuilder, Property};
    use glam::UVec2;

    #[test]
    fn test_closure_overrides_by_pass() {
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let assets = Assets::new(&RendererSettings::default());
        let material = MaterialBuilder::new(&assets)
            .name("tint")
            .add(Property::Color, Vec4::ONE)
            .build(&mut device)
            .unwrap();

        let setter = |info: &DrawInfo<'_>, uniforms: &mut UniformSet| {
            if info.pass == "color" {
                uniforms.set("time", 42.0f32);
            }
        };
        let mut uniforms = frame_uniforms(&Camera::default(), Vec2::new(4.0, 4.0), 1.0);
        let info = DrawInfo {
            pass: "depth",
            material: &material,
            instance: None,
        };
        setter.apply(&info, &mut uniforms);
        assert_eq!(uniforms.get("time"), Some(UniformValue::Float(1.0)));

        let info = DrawInfo { pass: "color", ..info };
        setter.apply(&info, &mut uniforms);
        assert_eq!(uniforms.get("time"), Some(UniformValue::Float(42.0)));
        NoOverrides.apply(&info, &mut uniforms);
        assert_eq!(uniforms.get("time"), Some(UniformValue::Float(42.0)));
    }
}
