// src/fx/effect.rs
//! Effects: named groups of emitters, built once as templates and
//! instantiated per use.

use std::sync::Arc;

use glam::{Quat, Vec3};

use crate::asset::Assets;
use crate::context::{bail, ensure};
use crate::error::Result;
use crate::materials::Material;
use crate::model::Mesh;
use crate::shader::ModelShader;

use super::emitter::{AnyEmitter, Emitter, SpawnSettings};
use super::modules::Module;
use super::particle::{MeshParticle, SpriteParticle};

#[derive(Debug, Clone)]
pub struct EffectInstance {
    name: String,
    /// In creation order.
    emitters: Vec<(String, AnyEmitter)>,
    position: Vec3,
    rotation: Quat,
}

impl EffectInstance {
    /// Fresh copy of a template placed at `position`.
    pub fn instantiate(template: &EffectInstance, position: Vec3) -> EffectInstance {
        let mut instance = template.clone();
        instance.set_position(position);
        instance
    }

    /// Instantiate the template registered under `name`.
    pub fn from_assets(assets: &Assets, name: &str, position: Vec3) -> Result<EffectInstance> {
        let template = assets.effects.get(name)?;
        Ok(Self::instantiate(&template, position))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.place_emitters();
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
        self.place_emitters();
    }

    fn place_emitters(&mut self) {
        let (position, rotation) = (self.position, self.rotation);
        for (_, emitter) in &mut self.emitters {
            emitter.set_transform(position, rotation);
        }
    }

    pub fn emitters(&self) -> impl Iterator<Item = (&str, &AnyEmitter)> {
        self.emitters.iter().map(|(name, e)| (name.as_str(), e))
    }

    pub fn emitters_mut(&mut self) -> impl Iterator<Item = &mut AnyEmitter> {
        self.emitters.iter_mut().map(|(_, e)| e)
    }

    pub fn emitter(&self, name: &str) -> Option<&AnyEmitter> {
        self.emitters.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    pub fn emitter_mut(&mut self, name: &str) -> Option<&mut AnyEmitter> {
        self.emitters.iter_mut().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    pub fn particle_count(&self) -> usize {
        self.emitters.iter().map(|(_, e)| e.particle_count()).sum()
    }

    /// Every emitter stopped spawning and has no live particles.
    pub fn is_done(&self) -> bool {
        self.emitters.iter().all(|(_, e)| e.is_done())
    }

    /// Give every emitter a distinct RNG stream derived from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        for (i, (_, emitter)) in self.emitters.iter_mut().enumerate() {
            emitter.reseed(seed.wrapping_add(i as u64));
        }
    }
}

/// Builds effect templates into `Assets::effects`.
///
/// Emitter settings and modules apply to the most recently created emitter.
pub struct EffectBuilder<'a> {
    assets: &'a Assets,
    name: String,
    emitters: Vec<(String, AnyEmitter)>,
    error: Option<String>,
    built: bool,
}

impl<'a> EffectBuilder<'a> {
    pub fn new(assets: &'a Assets) -> Self {
        Self {
            assets,
            name: String::new(),
            emitters: Vec::new(),
            error: None,
            built: false,
        }
    }

    fn fail(&mut self, reason: String) {
        if self.error.is_none() {
            self.error = Some(reason);
        }
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    fn push(&mut self, name: String, emitter: AnyEmitter) {
        if self.emitters.iter().any(|(n, _)| *n == name) {
            self.fail(format!("emitter {name} is already defined"));
            return;
        }
        if !emitter.material().model_shaders().contains(&ModelShader::Effect) {
            log::warn!(
                "Emitter {} uses material {} which was not built for effects",
                name,
                emitter.material().name()
            );
        }
        self.emitters.push((name, emitter));
    }

    fn seed(&self) -> u64 {
        self.emitters.len() as u64 + 1
    }

    pub fn sprite_emitter(&mut self, name: impl Into<String>, material: Arc<Material>) -> &mut Self {
        let emitter = Emitter::<SpriteParticle>::new(material, None, SpawnSettings::default(), self.seed());
        self.push(name.into(), AnyEmitter::Sprite(emitter));
        self
    }

    pub fn mesh_emitter(&mut self, name: impl Into<String>, material: Arc<Material>, mesh: Arc<Mesh>) -> &mut Self {
        let emitter = Emitter::<MeshParticle>::new(material, Some(mesh), SpawnSettings::default(), self.seed());
        self.push(name.into(), AnyEmitter::Mesh(emitter));
        self
    }

    fn current(&mut self, what: &str) -> Option<&mut AnyEmitter> {
        if self.emitters.is_empty() {
            self.fail(format!("{what} set before any emitter was created"));
            return None;
        }
        self.emitters.last_mut().map(|(_, e)| e)
    }

    pub fn spawn(&mut self, spawn: SpawnSettings) -> &mut Self {
        match self.current("spawn settings") {
            Some(AnyEmitter::Sprite(e)) => e.spawn = spawn,
            Some(AnyEmitter::Mesh(e)) => e.spawn = spawn,
            None => {}
        }
        self
    }

    pub fn local_position(&mut self, position: Vec3) -> &mut Self {
        match self.current("local position") {
            Some(AnyEmitter::Sprite(e)) => e.set_local_position(position),
            Some(AnyEmitter::Mesh(e)) => e.set_local_position(position),
            None => {}
        }
        self
    }

    /// Attach a module that works on either particle type.
    pub fn module<M>(&mut self, module: M) -> &mut Self
    where
        M: Module<SpriteParticle> + Module<MeshParticle> + 'static,
    {
        match self.current("module") {
            Some(AnyEmitter::Sprite(e)) => {
                e.add_module(Box::new(module));
            }
            Some(AnyEmitter::Mesh(e)) => {
                e.add_module(Box::new(module));
            }
            None => {}
        }
        self
    }

    /// Attach a sprite-only module (e.g. a scalar `SizeByLife`).
    pub fn sprite_module(&mut self, module: impl Module<SpriteParticle> + 'static) -> &mut Self {
        let reason = match self.current("module") {
            Some(AnyEmitter::Sprite(e)) => {
                e.add_module(Box::new(module));
                return self;
            }
            Some(AnyEmitter::Mesh(_)) => format!("sprite module {} added to a mesh emitter", module.name()),
            None => return self,
        };
        self.fail(reason);
        self
    }

    /// Attach a mesh-only module (e.g. a per-axis `SizeByLife`).
    pub fn mesh_module(&mut self, module: impl Module<MeshParticle> + 'static) -> &mut Self {
        let reason = match self.current("module") {
            Some(AnyEmitter::Mesh(e)) => {
                e.add_module(Box::new(module));
                return self;
            }
            Some(AnyEmitter::Sprite(_)) => format!("mesh module {} added to a sprite emitter", module.name()),
            None => return self,
        };
        self.fail(reason);
        self
    }

    /// Register the template. Callable once.
    pub fn build(&mut self) -> Result<Arc<EffectInstance>> {
        let name = self.name.clone();
        ensure!(!self.built, "failed to build effect {name}: build() was already called on this builder");
        self.built = true;
        if let Some(reason) = self.error.take() {
            bail!("failed to build effect {name}: {reason}");
        }
        ensure!(!name.is_empty(), "failed to build effect: effect has no name");
        ensure!(!self.emitters.is_empty(), "failed to build effect {name}: effect has no emitters");

        let mut effect = EffectInstance {
            name: name.clone(),
            emitters: std::mem::take(&mut self.emitters),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        };
        effect.place_emitters();
        log::info!("Built effect {} ({} emitters)", name, effect.emitters.len());
        self.assets.effects.add(name, Arc::new(effect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::config::RendererSettings;
    use crate::fx::distribution::Distribution;
    use crate::fx::emitter::tests::effect_material;
    use crate::fx::emitter::{EmitterKind, SpawnMode};
    use crate::fx::modules::{Lifetime, Movement, SizeByLife};
    use crate::gpu::headless::HeadlessDevice;
    use glam::UVec2;

    #[test]
    fn test_build_registers_template_and_instances_are_independent() {
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let assets = Assets::new(&RendererSettings::default());
        let fire = effect_material(&mut device, &assets, "fire");
        let cube = assets.cube(&mut device).unwrap();

        EffectBuilder::new(&assets)
            .name("campfire")
            .sprite_emitter("flames", fire.clone())
            .spawn(SpawnSettings {
                mode: SpawnMode::Spray { rate: 100.0 },
                ..Default::default()
            })
            .module(Lifetime(Distribution::Const(1.0)))
            .sprite_module(SizeByLife(Distribution::Const(0.0f32)))
            .mesh_emitter("embers", fire, cube)
            .local_position(Vec3::Y)
            .module(Movement)
            .build()
            .unwrap();

        let mut a = EffectInstance::from_assets(&assets, "campfire", Vec3::X).unwrap();
        let b = EffectInstance::from_assets(&assets, "campfire", Vec3::Z).unwrap();
        for emitter in a.emitters_mut() {
            emitter.update(0.1, &Camera::default());
        }
        assert_eq!(a.emitter("flames").unwrap().particle_count(), 10);
        assert_eq!(b.particle_count(), 0);
        assert_eq!(a.emitter("embers").unwrap().kind(), EmitterKind::Mesh);
        let names: Vec<&str> = a.emitters().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["flames", "embers"]);
    }

    #[test]
    fn test_builder_errors() {
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let assets = Assets::new(&RendererSettings::default());
        let smoke = effect_material(&mut device, &assets, "smoke");

        let err = EffectBuilder::new(&assets)
            .name("orphan")
            .module(Movement)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("before any emitter"));

        let cube = assets.cube(&mut device).unwrap();
        let err = EffectBuilder::new(&assets)
            .name("mixed")
            .mesh_emitter("debris", smoke.clone(), cube)
            .sprite_module(SizeByLife(Distribution::Const(1.0f32)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("mesh emitter"));

        let mut builder = EffectBuilder::new(&assets);
        builder.name("puff").sprite_emitter("s", smoke);
        builder.build().unwrap();
        assert!(builder.build().is_err());
        assert!(EffectBuilder::new(&assets).name("empty").build().is_err());
        assert_eq!(assets.effects.len(), 1);
    }
}
