// src/fx/modules.rs
//! Per-emitter particle behaviours.
//!
//! A module may set up a newly born particle ([`Module::initialize`]) and
//! advance every live particle once per tick ([`Module::update`]). Modules
//! run in the order they were attached, each seeing the previous one's
//! writes. Updates get a slice, so births and deaths stay with the emitter.

use std::fmt::Debug;

use glam::{Vec3, Vec4};
use rand::rngs::StdRng;

use crate::camera::Camera;

use super::distribution::{Distribution, Sample};
use super::emitter::EmitterState;
use super::particle::{MeshParticle, Particle, SpriteParticle};

pub trait Module<P: Particle>: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn initialize(&mut self, _emitter: &EmitterState, _particle: &mut P, _rng: &mut StdRng) {}

    fn update(
        &mut self,
        _emitter: &EmitterState,
        _particles: &mut [P],
        _dt: f32,
        _rng: &mut StdRng,
        _camera: &Camera,
    ) {
    }

    fn clone_box(&self) -> Box<dyn Module<P>>;
}

impl<P: Particle> Clone for Box<dyn Module<P>> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// One tick of the linear approach toward `target`:
/// `current + (target - current) / (lifetime / dt)`.
/// Particles without lifetime left, or a non-positive step, are left alone.
pub fn approach<T: Sample>(current: T, target: T, lifetime: f32, dt: f32) -> T {
    if lifetime <= 0.0 || dt <= 0.0 {
        return current;
    }
    let ticks = lifetime / dt;
    current + (target - current) / ticks
}

// ── Birth modules ────────────────────────────────────────────────────────

/// Spawn offset relative to the emitter, in emitter space.
#[derive(Debug, Clone)]
pub struct InitialLocation(pub Distribution<Vec3>);

impl<P: Particle> Module<P> for InitialLocation {
    fn name(&self) -> &'static str {
        "initial_location"
    }

    fn initialize(&mut self, emitter: &EmitterState, particle: &mut P, rng: &mut StdRng) {
        let offset = self.0.sample(rng, 0.0).unwrap_or(Vec3::ZERO);
        particle.core_mut().position = emitter.position + emitter.rotation * offset;
    }

    fn clone_box(&self) -> Box<dyn Module<P>> {
        Box::new(self.clone())
    }
}

/// Launch velocity in emitter space.
#[derive(Debug, Clone)]
pub struct InitialVelocity(pub Distribution<Vec3>);

impl<P: Particle> Module<P> for InitialVelocity {
    fn name(&self) -> &'static str {
        "initial_velocity"
    }

    fn initialize(&mut self, emitter: &EmitterState, particle: &mut P, rng: &mut StdRng) {
        let velocity = self.0.sample(rng, 0.0).unwrap_or(Vec3::ZERO);
        particle.core_mut().velocity = emitter.rotation * velocity;
    }

    fn clone_box(&self) -> Box<dyn Module<P>> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone)]
pub struct InitialColor(pub Distribution<Vec4>);

impl<P: Particle> Module<P> for InitialColor {
    fn name(&self) -> &'static str {
        "initial_color"
    }

    fn initialize(&mut self, _emitter: &EmitterState, particle: &mut P, rng: &mut StdRng) {
        if let Some(color) = self.0.sample(rng, 0.0) {
            particle.core_mut().color = color;
        }
    }

    fn clone_box(&self) -> Box<dyn Module<P>> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone)]
pub struct InitialRotation(pub Distribution<Vec3>);

impl<P: Particle> Module<P> for InitialRotation {
    fn name(&self) -> &'static str {
        "initial_rotation"
    }

    fn initialize(&mut self, _emitter: &EmitterState, particle: &mut P, rng: &mut StdRng) {
        if let Some(rotation) = self.0.sample(rng, 0.0) {
            particle.core_mut().rotation = rotation;
        }
    }

    fn clone_box(&self) -> Box<dyn Module<P>> {
        Box::new(self.clone())
    }
}

/// Lifetime in seconds.
#[derive(Debug, Clone)]
pub struct Lifetime(pub Distribution<f32>);

impl<P: Particle> Module<P> for Lifetime {
    fn name(&self) -> &'static str {
        "lifetime"
    }

    fn initialize(&mut self, _emitter: &EmitterState, particle: &mut P, rng: &mut StdRng) {
        if let Some(lifetime) = self.0.sample(rng, 0.0) {
            let core = particle.core_mut();
            core.lifetime = lifetime;
            core.birth_lifetime = lifetime;
        }
    }

    fn clone_box(&self) -> Box<dyn Module<P>> {
        Box::new(self.clone())
    }
}

// ── Tick modules ─────────────────────────────────────────────────────────

/// Integrates velocity into position.
#[derive(Debug, Clone, Default)]
pub struct Movement;

impl<P: Particle> Module<P> for Movement {
    fn name(&self) -> &'static str {
        "movement"
    }

    fn update(&mut self, _: &EmitterState, particles: &mut [P], dt: f32, _: &mut StdRng, _: &Camera) {
        for particle in particles {
            let core = particle.core_mut();
            core.position += core.velocity * dt;
        }
    }

    fn clone_box(&self) -> Box<dyn Module<P>> {
        Box::new(self.clone())
    }
}

/// Constant or random acceleration, e.g. gravity.
#[derive(Debug, Clone)]
pub struct Acceleration(pub Distribution<Vec3>);

impl<P: Particle> Module<P> for Acceleration {
    fn name(&self) -> &'static str {
        "acceleration"
    }

    fn update(&mut self, _: &EmitterState, particles: &mut [P], dt: f32, rng: &mut StdRng, _: &Camera) {
        for particle in particles {
            let age = particle.core().age();
            if let Some(acceleration) = self.0.sample(rng, age) {
                particle.core_mut().velocity += acceleration * dt;
            }
        }
    }

    fn clone_box(&self) -> Box<dyn Module<P>> {
        Box::new(self.clone())
    }
}

/// Angular velocity in radians per second.
#[derive(Debug, Clone)]
pub struct RotationRate(pub Distribution<Vec3>);

impl<P: Particle> Module<P> for RotationRate {
    fn name(&self) -> &'static str {
        "rotation_rate"
    }

    fn update(&mut self, _: &EmitterState, particles: &mut [P], dt: f32, rng: &mut StdRng, _: &Camera) {
        for particle in particles {
            let age = particle.core().age();
            if let Some(rate) = self.0.sample(rng, age) {
                particle.core_mut().rotation += rate * dt;
            }
        }
    }

    fn clone_box(&self) -> Box<dyn Module<P>> {
        Box::new(self.clone())
    }
}

/// Moves colour toward the sampled target as the particle ages.
#[derive(Debug, Clone)]
pub struct ColorByLife(pub Distribution<Vec4>);

impl<P: Particle> Module<P> for ColorByLife {
    fn name(&self) -> &'static str {
        "color_by_life"
    }

    fn update(&mut self, _: &EmitterState, particles: &mut [P], dt: f32, rng: &mut StdRng, _: &Camera) {
        for particle in particles {
            let core = particle.core_mut();
            if let Some(target) = self.0.sample(rng, core.age()) {
                core.color = approach(core.color, target, core.lifetime, dt);
            }
        }
    }

    fn clone_box(&self) -> Box<dyn Module<P>> {
        Box::new(self.clone())
    }
}

// ── Size modules ─────────────────────────────────────────────────────────
//
// Sprites have a scalar size, mesh particles a per-axis one, so these two
// are implemented once per particle type.

#[derive(Debug, Clone)]
pub struct InitialSize<S: Sample>(pub Distribution<S>);

/// Moves size toward the sampled target as the particle ages.
#[derive(Debug, Clone)]
pub struct SizeByLife<S: Sample>(pub Distribution<S>);

fn initialize_size<P: Particle>(distribution: &Distribution<P::Size>, particle: &mut P, rng: &mut StdRng) {
    if let Some(size) = distribution.sample(rng, 0.0) {
        *particle.size_mut() = size;
    }
}

fn size_by_life<P: Particle>(distribution: &Distribution<P::Size>, particles: &mut [P], dt: f32, rng: &mut StdRng) {
    for particle in particles {
        let (age, lifetime) = (particle.core().age(), particle.core().lifetime);
        if let Some(target) = distribution.sample(rng, age) {
            let size = approach(particle.size(), target, lifetime, dt);
            *particle.size_mut() = size;
        }
    }
}

macro_rules! size_modules {
    ($particle:ty, $size:ty) => {
        impl Module<$particle> for InitialSize<$size> {
            fn name(&self) -> &'static str {
                "initial_size"
            }

            fn initialize(&mut self, _: &EmitterState, particle: &mut $particle, rng: &mut StdRng) {
                initialize_size(&self.0, particle, rng);
            }

            fn clone_box(&self) -> Box<dyn Module<$particle>> {
                Box::new(self.clone())
            }
        }

        impl Module<$particle> for SizeByLife<$size> {
            fn name(&self) -> &'static str {
                "size_by_life"
            }

            fn update(&mut self, _: &EmitterState, particles: &mut [$particle], dt: f32, rng: &mut StdRng, _: &Camera) {
                size_by_life(&self.0, particles, dt, rng);
            }

            fn clone_box(&self) -> Box<dyn Module<$particle>> {
                Box::new(self.clone())
            }
        }
    };
}

size_modules!(SpriteParticle, f32);
size_modules!(MeshParticle, Vec3);

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn sprite(size: f32, lifetime: f32) -> SpriteParticle {
        let mut particle = SpriteParticle::default();
        particle.size = size;
        particle.core.lifetime = lifetime;
        particle.core.birth_lifetime = lifetime;
        particle
    }

    #[test]
    fn test_size_by_life_single_tick() {
        let (s0, s1, lifetime, dt) = (1.0f32, 3.0f32, 2.0f32, 0.1f32);
        let mut particles = [sprite(s0, lifetime)];
        let mut module = SizeByLife(Distribution::Const(s1));
        let mut rng = StdRng::seed_from_u64(1);
        Module::<SpriteParticle>::update(
            &mut module,
            &EmitterState::default(),
            &mut particles,
            dt,
            &mut rng,
            &Camera::default(),
        );
        let expected = s0 + (s1 - s0) / (lifetime / dt);
        assert!((particles[0].size - expected).abs() < 1e-6);
    }

    #[test]
    fn test_approach_never_overshoots_when_ticks_at_least_one() {
        let (target, dt) = (Vec4::ONE, 0.05);
        let mut color = Vec4::ZERO;
        let mut lifetime = 1.0f32;
        while lifetime >= dt {
            color = approach(color, target, lifetime, dt);
            assert!(color.cmple(target + Vec4::splat(1e-5)).all(), "{color}");
            lifetime -= dt;
        }
        assert!(color.x > 0.9);
    }

    #[test]
    fn test_approach_is_signed() {
        assert!(approach(1.0f32, 0.0, 1.0, 0.5) < 1.0);
        assert_eq!(approach(1.0f32, 0.0, 0.0, 0.5), 1.0);
        assert_eq!(approach(1.0f32, 0.0, 1.0, 0.0), 1.0);
    }

    #[test]
    fn test_mesh_size_by_life_is_per_axis() {
        let mut particle = MeshParticle::default();
        particle.core.lifetime = 1.0;
        let mut particles = [particle];
        let mut module = SizeByLife(Distribution::Const(Vec3::new(2.0, 1.0, 0.0)));
        let mut rng = StdRng::seed_from_u64(1);
        Module::<MeshParticle>::update(
            &mut module,
            &EmitterState::default(),
            &mut particles,
            0.5,
            &mut rng,
            &Camera::default(),
        );
        assert_eq!(particles[0].size, Vec3::new(1.5, 1.0, 0.5));
    }
}
