// src/fx/mod.rs
//! Particle effects.
//!
//! - [`distribution`]: constant / ranged / curve value sources
//! - [`particle`]: sprite and mesh particles, GPU records
//! - [`modules`]: per-emitter behaviours
//! - [`emitter`]: particle pools and spawning
//! - [`effect`]: effect templates and instances
//! - [`effect_renderer`]: per-frame update and batched drawing

pub mod distribution;
pub mod effect;
pub mod effect_renderer;
pub mod emitter;
pub mod modules;
pub mod particle;

use crate::instances::Instance;

pub use distribution::Distribution;
pub use effect::{EffectBuilder, EffectInstance};
pub use effect_renderer::{EffectRenderer, EmitterBatchKey, ParticleBatch};
pub use emitter::{AnyEmitter, Emitter, EmitterKind, EmitterState, SpawnMode, SpawnSettings};
pub use modules::Module;
pub use particle::{MeshParticle, Particle, ParticleData, SpriteParticle};

/// Every emitter in `instances`: effects attached to instances first, then
/// free-standing effect instances.
pub fn visit_emitters<'a>(instances: &'a [Instance], mut f: impl FnMut(&'a AnyEmitter)) {
    for instance in instances {
        for attachment in instance.attachments() {
            attachment.effect.emitters().for_each(|(_, e)| f(e));
        }
    }
    for effect in instances.iter().filter_map(Instance::effect_instance) {
        effect.emitters().for_each(|(_, e)| f(e));
    }
}

/// Mutable counterpart of [`visit_emitters`], same order.
pub fn visit_emitters_mut(instances: &mut [Instance], mut f: impl FnMut(&mut AnyEmitter)) {
    for instance in instances.iter_mut() {
        for attachment in instance.attachments_mut() {
            attachment.effect.emitters_mut().for_each(&mut f);
        }
    }
    for effect in instances.iter_mut().filter_map(Instance::effect_instance_mut) {
        effect.emitters_mut().for_each(&mut f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Assets;
    use crate::config::RendererSettings;
    use crate::gpu::headless::HeadlessDevice;
    use crate::model::{AbstractModel, Model};
    use glam::{UVec2, Vec3};
    use std::sync::Arc;

    #[test]
    fn test_visit_order_attachments_then_free_effects() {
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let assets = Assets::new(&RendererSettings::default());
        let glow = emitter::tests::effect_material(&mut device, &assets, "glow");
        let smoke = emitter::tests::effect_material(&mut device, &assets, "smoke");
        EffectBuilder::new(&assets).name("glow").sprite_emitter("g", glow).build().unwrap();
        EffectBuilder::new(&assets).name("smoke").sprite_emitter("s", smoke).build().unwrap();

        let free = Instance::effect(EffectInstance::from_assets(&assets, "glow", Vec3::ZERO).unwrap());
        let mut torch = Instance::model(Arc::new(AbstractModel::Plain(Model::new("torch", Vec::new(), Vec::new()))));
        torch.attach_effect(Vec3::Y, EffectInstance::from_assets(&assets, "smoke", Vec3::ZERO).unwrap());
        let mut instances = vec![free, torch];

        let mut seen = Vec::new();
        visit_emitters(&instances, |e| seen.push(e.material().name().to_string()));
        assert_eq!(seen, vec!["smoke", "glow"]);

        let mut count = 0;
        visit_emitters_mut(&mut instances, |_| count += 1);
        assert_eq!(count, 2);
    }
}
