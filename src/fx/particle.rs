// src/fx/particle.rs
//! Particle types and their GPU representation.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use super::distribution::Sample;

/// State shared by sprite and mesh particles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleCore {
    pub position: Vec3,
    pub velocity: Vec3,
    pub color: Vec4,
    /// Euler angles in radians.
    pub rotation: Vec3,
    /// Seconds left to live.
    pub lifetime: f32,
    /// Lifetime at birth.
    pub birth_lifetime: f32,
}

impl Default for ParticleCore {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            color: Vec4::ONE,
            rotation: Vec3::ZERO,
            lifetime: 1.0,
            birth_lifetime: 1.0,
        }
    }
}

impl ParticleCore {
    /// 0 at birth, 1 at death.
    pub fn age(&self) -> f32 {
        if self.birth_lifetime <= 0.0 {
            return 1.0;
        }
        (1.0 - self.lifetime / self.birth_lifetime).clamp(0.0, 1.0)
    }

    pub fn is_alive(&self) -> bool {
        self.lifetime > 0.0
    }
}

/// Per-particle record read by the effect vertex stage (`ParticleData` in WGSL).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ParticleData {
    /// xyz position, w sprite size.
    pub position: [f32; 4],
    /// xyz mesh scale.
    pub scale: [f32; 4],
    pub color: [f32; 4],
    pub rotation: [f32; 4],
}

pub trait Particle: Clone + Default + std::fmt::Debug + Send + Sync + 'static {
    type Size: Sample;

    fn core(&self) -> &ParticleCore;
    fn core_mut(&mut self) -> &mut ParticleCore;
    fn size(&self) -> Self::Size;
    fn size_mut(&mut self) -> &mut Self::Size;
    fn to_gpu(&self) -> ParticleData;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpriteParticle {
    pub core: ParticleCore,
    pub size: f32,
}

impl Default for SpriteParticle {
    fn default() -> Self {
        Self {
            core: ParticleCore::default(),
            size: 1.0,
        }
    }
}

impl Particle for SpriteParticle {
    type Size = f32;

    fn core(&self) -> &ParticleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ParticleCore {
        &mut self.core
    }

    fn size(&self) -> f32 {
        self.size
    }

    fn size_mut(&mut self) -> &mut f32 {
        &mut self.size
    }

    fn to_gpu(&self) -> ParticleData {
        let c = &self.core;
        ParticleData {
            position: c.position.extend(self.size).to_array(),
            scale: [self.size, self.size, self.size, 0.0],
            color: c.color.to_array(),
            rotation: c.rotation.extend(c.age()).to_array(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshParticle {
    pub core: ParticleCore,
    pub size: Vec3,
}

impl Default for MeshParticle {
    fn default() -> Self {
        Self {
            core: ParticleCore::default(),
            size: Vec3::ONE,
        }
    }
}

impl Particle for MeshParticle {
    type Size = Vec3;

    fn core(&self) -> &ParticleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ParticleCore {
        &mut self.core
    }

    fn size(&self) -> Vec3 {
        self.size
    }

    fn size_mut(&mut self) -> &mut Vec3 {
        &mut self.size
    }

    fn to_gpu(&self) -> ParticleData {
        let c = &self.core;
        ParticleData {
            position: c.position.extend(1.0).to_array(),
            scale: self.size.extend(0.0).to_array(),
            color: c.color.to_array(),
            rotation: c.rotation.extend(c.age()).to_array(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_record_is_four_vec4s() {
        assert_eq!(std::mem::size_of::<ParticleData>(), 64);
        let mut sprite = SpriteParticle::default();
        sprite.size = 0.25;
        sprite.core.position = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(sprite.to_gpu().position, [1.0, 2.0, 3.0, 0.25]);
    }

    #[test]
    fn test_age_runs_from_zero_to_one() {
        let mut core = ParticleCore {
            lifetime: 2.0,
            birth_lifetime: 2.0,
            ..Default::default()
        };
        assert_eq!(core.age(), 0.0);
        core.lifetime = 0.5;
        assert_eq!(core.age(), 0.75);
        core.lifetime = -1.0;
        assert_eq!(core.age(), 1.0);
        assert!(!core.is_alive());
    }
}
