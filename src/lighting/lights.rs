// src/lighting/lights.rs
//! GPU light records. Layouts match the structs in `lighting/lights.wgsl`.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// A light record stored in a [`super::LightContainer`].
pub trait GpuLight: Pod + std::fmt::Debug + Send + Sync + 'static {
    /// Storage binding the array is exposed under.
    const BINDING: &'static str;
    /// Uniform holding the number of live lights.
    const COUNT_UNIFORM: &'static str;
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct PointLight {
    /// xyz position, w radius.
    pub position: [f32; 4],
    /// rgb colour, w intensity.
    pub color: [f32; 4],
    /// Constant, linear and quadratic attenuation.
    pub falloff: [f32; 4],
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            position: position.extend(radius).to_array(),
            color: color.extend(intensity).to_array(),
            falloff: [1.0, 0.09, 0.032, 0.0],
        }
    }

    pub fn with_falloff(mut self, constant: f32, linear: f32, quadratic: f32) -> Self {
        self.falloff = [constant, linear, quadratic, 0.0];
        self
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position[..3].copy_from_slice(&position.to_array());
    }
}

impl GpuLight for PointLight {
    const BINDING: &'static str = "point_lights";
    const COUNT_UNIFORM: &'static str = "point_light_count";
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct DirectionalLight {
    pub direction: [f32; 4],
    /// rgb colour, w intensity.
    pub color: [f32; 4],
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize_or_zero().extend(0.0).to_array(),
            color: color.extend(intensity).to_array(),
        }
    }
}

impl GpuLight for DirectionalLight {
    const BINDING: &'static str = "directional_lights";
    const COUNT_UNIFORM: &'static str = "directional_light_count";
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct SpotLight {
    pub position: [f32; 4],
    /// xyz direction, w cosine of the inner cutoff.
    pub direction: [f32; 4],
    pub color: [f32; 4],
    /// x cosine of the outer cutoff.
    pub cone: [f32; 4],
}

impl SpotLight {
    /// Cutoff angles in radians.
    pub fn new(position: Vec3, direction: Vec3, color: Vec3, intensity: f32, inner: f32, outer: f32) -> Self {
        Self {
            position: position.extend(1.0).to_array(),
            direction: direction.normalize_or_zero().extend(inner.cos()).to_array(),
            color: color.extend(intensity).to_array(),
            cone: [outer.max(inner).cos(), 0.0, 0.0, 0.0],
        }
    }
}

impl GpuLight for SpotLight {
    const BINDING: &'static str = "spot_lights";
    const COUNT_UNIFORM: &'static str = "spot_light_count";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_are_whole_vec4s() {
        assert_eq!(std::mem::size_of::<PointLight>(), 48);
        assert_eq!(std::mem::size_of::<DirectionalLight>(), 32);
        assert_eq!(std::mem::size_of::<SpotLight>(), 64);
    }

    #[test]
    fn test_spot_cone_stores_cosines() {
        let spot = SpotLight::new(Vec3::ZERO, -Vec3::Y, Vec3::ONE, 2.0, 0.0, std::f32::consts::FRAC_PI_2);
        assert_eq!(spot.direction[3], 1.0);
        assert!(spot.cone[0].abs() < 1e-6);
        assert_eq!(spot.color[3], 2.0);
    }
}
