// src/lighting.rs
//! Dynamic lights.
//!
//! One [`LightContainer`] per light type. [`Lighting::update`] is the once-per-frame
//! flush; [`Lighting::bind`] hands the counts and buffers to a draw.

pub mod light_container;
pub mod lights;

use glam::Vec3;

use crate::gpu::{Bindings, RenderDevice, UniformSet};

pub use light_container::{LightContainer, LightId};
pub use lights::{DirectionalLight, GpuLight, PointLight, SpotLight};

#[derive(Debug)]
pub struct Lighting {
    pub ambient: Vec3,
    pub point_lights: LightContainer<PointLight>,
    pub directional_lights: LightContainer<DirectionalLight>,
    pub spot_lights: LightContainer<SpotLight>,
}

impl Lighting {
    /// Containers sized for `reserve` lights each. Buffers are allocated
    /// right away so programs that declare the light arrays always have
    /// something bound.
    pub fn new(device: &mut dyn RenderDevice, reserve: usize) -> Self {
        let mut lighting = Self {
            ambient: Vec3::splat(0.03),
            point_lights: LightContainer::new(reserve),
            directional_lights: LightContainer::new(reserve),
            spot_lights: LightContainer::new(reserve),
        };
        lighting.update(device);
        lighting
    }

    /// Flush dirty containers. Returns how many uploaded.
    pub fn update(&mut self, device: &mut dyn RenderDevice) -> usize {
        [
            self.point_lights.update(device),
            self.directional_lights.update(device),
            self.spot_lights.update(device),
        ]
        .into_iter()
        .filter(|uploaded| *uploaded)
        .count()
    }

    pub fn light_count(&self) -> usize {
        self.point_lights.len() + self.directional_lights.len() + self.spot_lights.len()
    }

    pub fn bind(&self, uniforms: &mut UniformSet, bindings: &mut Bindings) {
        uniforms
            .set("ambient_color", self.ambient.extend(1.0))
            .set(PointLight::COUNT_UNIFORM, self.point_lights.len() as u32)
            .set(DirectionalLight::COUNT_UNIFORM, self.directional_lights.len() as u32)
            .set(SpotLight::COUNT_UNIFORM, self.spot_lights.len() as u32)
            .set("light_padding", 0u32);
        bind_container(&self.point_lights, bindings);
        bind_container(&self.directional_lights, bindings);
        bind_container(&self.spot_lights, bindings);
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        self.point_lights.release(device);
        self.directional_lights.release(device);
        self.spot_lights.release(device);
    }
}

fn bind_container<T: GpuLight>(container: &LightContainer<T>, bindings: &mut Bindings) {
    if let Some(buffer) = container.buffer() {
        bindings.buffer(T::BINDING, buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::HeadlessDevice;
    use crate::gpu::UniformValue;
    use glam::UVec2;

    #[test]
    fn test_bind_reports_counts_and_buffers() {
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let mut lighting = Lighting::new(&mut device, 2);
        assert_eq!(device.live_buffer_count(), 3);

        lighting.point_lights.add(PointLight::new(Vec3::Y, Vec3::ONE, 2.0, 5.0));
        lighting.point_lights.add(PointLight::new(Vec3::X, Vec3::ONE, 1.0, 5.0));
        lighting
            .directional_lights
            .add(DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE, 1.0));
        assert_eq!(lighting.update(&mut device), 2);
        assert_eq!(lighting.update(&mut device), 0);

        let mut uniforms = UniformSet::new();
        let mut bindings = Bindings::default();
        lighting.bind(&mut uniforms, &mut bindings);
        assert_eq!(uniforms.get("point_light_count"), Some(UniformValue::UInt(2)));
        assert_eq!(uniforms.get("spot_light_count"), Some(UniformValue::UInt(0)));
        assert_eq!(bindings.find_buffer("point_lights"), lighting.point_lights.buffer());
        assert!(bindings.find_buffer("spot_lights").is_some());
    }
}
