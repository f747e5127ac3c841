// src/fx/emitter.rs
//! Emitters: particle pools with spawn rules and attached modules.
//!
//! One tick is: spawn (every module initializes each newborn), run every
//! module's update in attachment order, age everything by `dt`, drop what
//! reached zero lifetime. Only the first and last step change the pool size.

use std::sync::Arc;

use glam::{Quat, Vec3};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::camera::Camera;
use crate::materials::Material;
use crate::model::Mesh;

use super::modules::Module;
use super::particle::{MeshParticle, Particle, ParticleData, SpriteParticle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EmitterKind {
    Sprite,
    Mesh,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpawnMode {
    /// Continuous emission, particles per second.
    Spray { rate: f32 },
    /// `count` particles every `interval` seconds, `loops` times (`None` forever).
    Burst {
        count: u32,
        interval: f32,
        loops: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnSettings {
    pub mode: SpawnMode,
    pub max_count: usize,
    /// Stop spawning after this many seconds.
    pub duration: Option<f32>,
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            mode: SpawnMode::Spray { rate: 10.0 },
            max_count: 1000,
            duration: None,
        }
    }
}

/// What modules may read about their emitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterState {
    /// World position.
    pub position: Vec3,
    pub rotation: Quat,
    /// Offset inside the owning effect.
    pub local_position: Vec3,
    /// Seconds since the emitter started.
    pub time: f32,
    pub spawned: u64,
}

impl Default for EmitterState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            local_position: Vec3::ZERO,
            time: 0.0,
            spawned: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Emitter<P: Particle> {
    pub material: Arc<Material>,
    /// Geometry of mesh particles; sprites use the built-in quad.
    pub mesh: Option<Arc<Mesh>>,
    pub spawn: SpawnSettings,
    modules: Vec<Box<dyn Module<P>>>,
    particles: Vec<P>,
    state: EmitterState,
    rng: StdRng,
    spawn_accumulator: f32,
    burst_timer: f32,
    bursts: u32,
}

impl<P: Particle> Emitter<P> {
    pub fn new(material: Arc<Material>, mesh: Option<Arc<Mesh>>, spawn: SpawnSettings, seed: u64) -> Self {
        Self {
            material,
            mesh,
            spawn,
            modules: Vec::new(),
            particles: Vec::new(),
            state: EmitterState::default(),
            rng: StdRng::seed_from_u64(seed),
            spawn_accumulator: 0.0,
            burst_timer: 0.0,
            bursts: 0,
        }
    }

    pub fn add_module(&mut self, module: Box<dyn Module<P>>) -> &mut Self {
        self.modules.push(module);
        self
    }

    pub fn module_names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    pub fn particles(&self) -> &[P] {
        &self.particles
    }

    pub fn state(&self) -> &EmitterState {
        &self.state
    }

    pub fn set_local_position(&mut self, position: Vec3) {
        self.state.local_position = position;
    }

    /// Place the emitter relative to its effect's world transform.
    pub fn set_transform(&mut self, origin: Vec3, rotation: Quat) {
        self.state.rotation = rotation;
        self.state.position = origin + rotation * self.state.local_position;
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// No more particles will be spawned.
    pub fn spawning_finished(&self) -> bool {
        if matches!(self.spawn.duration, Some(d) if self.state.time >= d) {
            return true;
        }
        matches!(self.spawn.mode, SpawnMode::Burst { loops: Some(loops), .. } if self.bursts >= loops)
    }

    pub fn is_done(&self) -> bool {
        self.spawning_finished() && self.particles.is_empty()
    }

    fn spawn_count(&mut self, dt: f32) -> usize {
        if self.spawning_finished() {
            return 0;
        }
        let wanted = match self.spawn.mode {
            SpawnMode::Spray { rate } => {
                self.spawn_accumulator += rate.max(0.0) * dt;
                let whole = self.spawn_accumulator.floor();
                self.spawn_accumulator -= whole;
                whole as usize
            }
            SpawnMode::Burst { count, interval, loops } => {
                self.burst_timer -= dt;
                let interval = interval.max(f32::EPSILON);
                let mut fired = 0;
                while self.burst_timer <= 0.0 && loops.map_or(true, |l| self.bursts < l) {
                    self.burst_timer += interval;
                    self.bursts += 1;
                    fired += 1;
                }
                count as usize * fired
            }
        };
        wanted.min(self.spawn.max_count.saturating_sub(self.particles.len()))
    }

    /// Advance by `dt` seconds.
    pub fn update(&mut self, dt: f32, camera: &Camera) {
        if dt < 0.0 {
            return;
        }

        for _ in 0..self.spawn_count(dt) {
            let mut particle = P::default();
            particle.core_mut().position = self.state.position;
            for module in &mut self.modules {
                module.initialize(&self.state, &mut particle, &mut self.rng);
            }
            self.particles.push(particle);
            self.state.spawned += 1;
        }

        for module in &mut self.modules {
            module.update(&self.state, &mut self.particles, dt, &mut self.rng, camera);
        }

        for particle in &mut self.particles {
            particle.core_mut().lifetime -= dt;
        }
        self.particles.retain(|p| p.core().is_alive());
        self.state.time += dt;
    }

    pub fn write_gpu(&self, out: &mut Vec<ParticleData>) {
        out.extend(self.particles.iter().map(Particle::to_gpu));
    }
}

/// An emitter of either particle type.
#[derive(Debug, Clone)]
pub enum AnyEmitter {
    Sprite(Emitter<SpriteParticle>),
    Mesh(Emitter<MeshParticle>),
}

macro_rules! each_emitter {
    ($self:expr, $e:ident => $body:expr) => {
        match $self {
            AnyEmitter::Sprite($e) => $body,
            AnyEmitter::Mesh($e) => $body,
        }
    };
}

impl AnyEmitter {
    pub fn kind(&self) -> EmitterKind {
        match self {
            AnyEmitter::Sprite(_) => EmitterKind::Sprite,
            AnyEmitter::Mesh(_) => EmitterKind::Mesh,
        }
    }

    pub fn material(&self) -> &Arc<Material> {
        each_emitter!(self, e => &e.material)
    }

    pub fn mesh(&self) -> Option<&Arc<Mesh>> {
        each_emitter!(self, e => e.mesh.as_ref())
    }

    pub fn particle_count(&self) -> usize {
        each_emitter!(self, e => e.particles().len())
    }

    pub fn is_done(&self) -> bool {
        each_emitter!(self, e => e.is_done())
    }

    pub fn set_transform(&mut self, origin: Vec3, rotation: Quat) {
        each_emitter!(self, e => e.set_transform(origin, rotation))
    }

    pub fn reseed(&mut self, seed: u64) {
        each_emitter!(self, e => e.reseed(seed))
    }

    pub fn update(&mut self, dt: f32, camera: &Camera) {
        each_emitter!(self, e => e.update(dt, camera))
    }

    pub fn write_gpu(&self, out: &mut Vec<ParticleData>) {
        each_emitter!(self, e => e.write_gpu(out))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::asset::Assets;
    use crate::config::RendererSettings;
    use crate::fx::distribution::Distribution;
    use crate::fx::modules::{InitialVelocity, Lifetime, Movement};
    use crate::gpu::headless::HeadlessDevice;
    use crate::materials::{MaterialBuilder, Property};
    use crate::shader::ModelShader;
    use glam::{UVec2, Vec4};
    use std::sync::Mutex;

    pub(crate) fn effect_material(device: &mut HeadlessDevice, assets: &Assets, name: &str) -> Arc<Material> {
        MaterialBuilder::new(assets)
            .name(name)
            .add(Property::Color, Vec4::ONE)
            .model_shaders([ModelShader::Effect])
            .build(device)
            .unwrap()
    }

    fn sprite_emitter(spawn: SpawnSettings) -> Emitter<SpriteParticle> {
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let assets = Assets::new(&RendererSettings::default());
        Emitter::new(effect_material(&mut device, &assets, "spark"), None, spawn, 42)
    }

    /// Records the x position each particle has when the module runs.
    #[derive(Debug, Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<f32>>>);

    impl Module<SpriteParticle> for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn update(&mut self, _: &EmitterState, particles: &mut [SpriteParticle], _: f32, _: &mut StdRng, _: &Camera) {
            let mut seen = self.0.lock().unwrap();
            seen.extend(particles.iter().map(|p| p.core.position.x));
        }

        fn clone_box(&self) -> Box<dyn Module<SpriteParticle>> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn test_modules_see_earlier_modules_writes() {
        let mut emitter = sprite_emitter(SpawnSettings {
            mode: SpawnMode::Burst {
                count: 1,
                interval: 100.0,
                loops: Some(1),
            },
            ..Default::default()
        });
        let recorder = Recorder::default();
        emitter
            .add_module(Box::new(InitialVelocity(Distribution::Const(Vec3::X * 2.0))))
            .add_module(Box::new(Lifetime(Distribution::Const(10.0))))
            .add_module(Box::new(Movement))
            .add_module(Box::new(recorder.clone()));
        emitter.update(0.5, &Camera::default());
        assert_eq!(*recorder.0.lock().unwrap(), vec![1.0]);
        assert_eq!(emitter.module_names(), vec!["initial_velocity", "lifetime", "movement", "recorder"]);
    }

    #[test]
    fn test_lifetime_decreases_until_removal() {
        let mut emitter = sprite_emitter(SpawnSettings {
            mode: SpawnMode::Burst {
                count: 3,
                interval: 100.0,
                loops: Some(1),
            },
            ..Default::default()
        });
        emitter.add_module(Box::new(Lifetime(Distribution::Const(0.35))));
        let camera = Camera::default();

        emitter.update(0.1, &camera);
        assert_eq!(emitter.particles().len(), 3);
        let mut last = emitter.particles()[0].core.lifetime;
        while !emitter.particles().is_empty() {
            emitter.update(0.1, &camera);
            if let Some(p) = emitter.particles().first() {
                assert!(p.core.lifetime < last);
                assert!(p.core.lifetime > 0.0);
                last = p.core.lifetime;
            }
        }
        assert!(emitter.is_done());
        assert_eq!(emitter.state().spawned, 3);
    }

    #[test]
    fn test_spray_respects_rate_and_cap() {
        let mut emitter = sprite_emitter(SpawnSettings {
            mode: SpawnMode::Spray { rate: 10.0 },
            max_count: 4,
            duration: None,
        });
        emitter.add_module(Box::new(Lifetime(Distribution::Const(100.0))));
        let camera = Camera::default();
        emitter.update(0.25, &camera);
        assert_eq!(emitter.particles().len(), 2);
        emitter.update(1.0, &camera);
        assert_eq!(emitter.particles().len(), 4);
        assert!(!emitter.is_done());
    }

    #[test]
    fn test_long_tick_fires_every_elapsed_burst() {
        let mut emitter = sprite_emitter(SpawnSettings {
            mode: SpawnMode::Burst {
                count: 2,
                interval: 0.25,
                loops: None,
            },
            ..Default::default()
        });
        emitter.add_module(Box::new(Lifetime(Distribution::Const(100.0))));
        let camera = Camera::default();
        // Bursts at t = 0, 0.25, 0.5, 0.75 and 1.0.
        emitter.update(1.0, &camera);
        assert_eq!(emitter.particles().len(), 10);
        emitter.update(1.0, &camera);
        assert_eq!(emitter.particles().len(), 18);
    }

    #[test]
    fn test_burst_loops_and_cap_limit_a_long_tick() {
        let mut looped = sprite_emitter(SpawnSettings {
            mode: SpawnMode::Burst {
                count: 2,
                interval: 0.1,
                loops: Some(3),
            },
            ..Default::default()
        });
        looped.add_module(Box::new(Lifetime(Distribution::Const(100.0))));
        looped.update(1.0, &Camera::default());
        assert_eq!(looped.particles().len(), 6);
        assert!(looped.spawning_finished());

        let mut capped = sprite_emitter(SpawnSettings {
            mode: SpawnMode::Burst {
                count: 3,
                interval: 0.1,
                loops: None,
            },
            max_count: 7,
            duration: None,
        });
        capped.add_module(Box::new(Lifetime(Distribution::Const(100.0))));
        capped.update(1.0, &Camera::default());
        assert_eq!(capped.particles().len(), 7);
    }

    #[test]
    fn test_transform_places_newborns() {
        let mut emitter = sprite_emitter(SpawnSettings {
            mode: SpawnMode::Burst {
                count: 1,
                interval: 1.0,
                loops: None,
            },
            ..Default::default()
        });
        emitter.set_local_position(Vec3::Y);
        emitter.set_transform(Vec3::new(5.0, 0.0, 0.0), Quat::IDENTITY);
        emitter.update(0.01, &Camera::default());
        assert_eq!(emitter.particles()[0].core.position, Vec3::new(5.0, 1.0, 0.0));
    }
}
