// src/fx/effect_renderer.rs
//! Advances every emitter once per frame and batches the survivors for the
//! particle pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Mat4;

use crate::asset::Assets;
use crate::camera::Camera;
use crate::error::Result;
use crate::gpu::{Bindings, Capability, DrawCall, Geometry, RenderDevice, UniformSet};
use crate::instances::Instance;
use crate::lighting::Lighting;
use crate::materials::{Blending, Material};
use crate::model::Mesh;
use crate::pipeline::uniform_setter::{DrawInfo, UniformSetter};
use crate::shader::{ModelShader, ShaderPass};

use super::emitter::{AnyEmitter, EmitterKind};
use super::particle::ParticleData;
use super::visit_emitters_mut;

/// Emitters sharing a key are drawn with one instanced call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EmitterBatchKey {
    pub kind: EmitterKind,
    pub material: String,
    pub mesh: Option<String>,
}

impl EmitterBatchKey {
    fn of(emitter: &AnyEmitter) -> Self {
        Self {
            kind: emitter.kind(),
            material: emitter.material().name().to_string(),
            mesh: emitter.mesh().map(|m| m.name.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParticleBatch {
    pub key: EmitterBatchKey,
    pub material: Arc<Material>,
    pub mesh: Option<Arc<Mesh>>,
    pub particles: Vec<ParticleData>,
}

#[derive(Debug, Default)]
pub struct EffectRenderer {
    batches: BTreeMap<EmitterBatchKey, ParticleBatch>,
    emitter_count: usize,
}

impl EffectRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick every emitter (attachments first, then free-standing effects)
    /// and regroup the surviving particles.
    pub fn update(&mut self, instances: &mut [Instance], dt: f32, camera: &Camera) {
        self.batches.clear();
        let batches = &mut self.batches;
        let mut visited = 0;
        visit_emitters_mut(instances, |emitter| {
            visited += 1;
            emitter.update(dt, camera);
            if emitter.particle_count() == 0 {
                return;
            }
            let key = EmitterBatchKey::of(emitter);
            let batch = batches.entry(key.clone()).or_insert_with(|| ParticleBatch {
                key,
                material: emitter.material().clone(),
                mesh: emitter.mesh().cloned(),
                particles: Vec::new(),
            });
            emitter.write_gpu(&mut batch.particles);
        });
        self.emitter_count = visited;
    }

    /// Batches in key order.
    pub fn batches(&self) -> impl Iterator<Item = &ParticleBatch> {
        self.batches.values()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn particle_count(&self) -> usize {
        self.batches.values().map(|b| b.particles.len()).sum()
    }

    /// Emitters visited by the last update.
    pub fn emitter_count(&self) -> usize {
        self.emitter_count
    }

    /// Issue one instanced draw per batch into the current pass, opaque
    /// batches first. Returns the number of draws.
    pub fn draw(
        &self,
        device: &mut dyn RenderDevice,
        assets: &Assets,
        lighting: &Lighting,
        frame_uniforms: &UniformSet,
        setter: &dyn UniformSetter,
    ) -> Result<usize> {
        if self.batches.is_empty() {
            return Ok(0);
        }
        device.enable(Capability::ProgramPointSize);
        device.disable(Capability::DepthWrite);

        let (opaque, translucent): (Vec<&ParticleBatch>, Vec<&ParticleBatch>) = self
            .batches
            .values()
            .partition(|b| b.material.blending() == Blending::Opaque);

        let mut draws = 0;
        for batch in opaque.into_iter().chain(translucent) {
            let program = assets
                .shaders
                .get_or_compile(device, &batch.material, ModelShader::Effect, ShaderPass::Forward)?;
            let (mesh, billboard) = match (&batch.key.kind, &batch.mesh) {
                (EmitterKind::Mesh, Some(mesh)) => (mesh.clone(), 0.0),
                _ => (assets.quad(device)?, 1.0),
            };

            let mut uniforms = frame_uniforms.clone();
            uniforms.set("model", Mat4::IDENTITY).set("billboard", billboard);
            let mut bindings = Bindings::default();
            lighting.bind(&mut uniforms, &mut bindings);
            batch.material.bind(device, &program, &mut bindings)?;
            bindings.storage("particles", bytemuck::cast_slice(&batch.particles).to_vec());
            setter.apply(
                &DrawInfo {
                    pass: "particle",
                    material: &batch.material,
                    instance: None,
                },
                &mut uniforms,
            );

            let blending = batch.material.blending();
            if blending == Blending::Opaque {
                device.disable(Capability::Blending);
            } else {
                device.enable(Capability::Blending);
            }
            device.draw(&DrawCall {
                program: program.id,
                geometry: Geometry::Mesh {
                    mesh: mesh.id,
                    instances: batch.particles.len() as u32,
                },
                uniforms: &uniforms,
                bindings: &bindings,
                blending,
                two_sided: true,
            })?;
            draws += 1;
        }

        device.disable(Capability::Blending);
        device.enable(Capability::DepthWrite);
        device.disable(Capability::ProgramPointSize);
        Ok(draws)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererSettings;
    use crate::fx::distribution::Distribution;
    use crate::fx::emitter::tests::effect_material;
    use crate::fx::emitter::{SpawnMode, SpawnSettings};
    use crate::fx::modules::Lifetime;
    use crate::fx::{EffectBuilder, EffectInstance};
    use crate::gpu::headless::HeadlessDevice;
    use crate::gpu::{ColorTarget, PassDesc, TextureDesc, TextureFormat};
    use crate::pipeline::uniform_setter::NoOverrides;
    use glam::{UVec2, Vec3};

    fn burst(count: u32) -> SpawnSettings {
        SpawnSettings {
            mode: SpawnMode::Burst {
                count,
                interval: 100.0,
                loops: Some(1),
            },
            ..Default::default()
        }
    }

    fn setup(device: &mut HeadlessDevice) -> Assets {
        let assets = Assets::new(&RendererSettings::default());
        let spark = effect_material(device, &assets, "spark");
        let cube = assets.cube(device).unwrap();
        EffectBuilder::new(&assets)
            .name("sparks")
            .sprite_emitter("a", spark.clone())
            .spawn(burst(3))
            .module(Lifetime(Distribution::Const(1.0)))
            .sprite_emitter("b", spark.clone())
            .spawn(burst(2))
            .module(Lifetime(Distribution::Const(1.0)))
            .mesh_emitter("chunks", spark, cube)
            .spawn(burst(4))
            .module(Lifetime(Distribution::Const(1.0)))
            .build()
            .unwrap();
        assets
    }

    #[test]
    fn test_update_visits_free_and_attached_effects_and_batches() {
        let mut device = HeadlessDevice::new(UVec2::splat(4));
        let assets = setup(&mut device);
        let effect = EffectInstance::from_assets(&assets, "sparks", Vec3::ZERO).unwrap();

        let mut carrier = Instance::model(Arc::new(crate::model::AbstractModel::Plain(
            crate::model::Model::new("cart", Vec::new(), Vec::new()),
        )));
        carrier.attach_effect(Vec3::Y, effect.clone());
        let mut instances = vec![Instance::effect(effect), carrier];

        let mut renderer = EffectRenderer::new();
        renderer.update(&mut instances, 0.1, &Camera::default());
        assert_eq!(renderer.emitter_count(), 6);
        // Both sprite emitters share material and kind, so two batches remain.
        assert_eq!(renderer.batch_count(), 2);
        assert_eq!(renderer.particle_count(), 18);
        let sprite = renderer.batches().next().unwrap();
        assert_eq!(sprite.key.kind, EmitterKind::Sprite);
        assert_eq!(sprite.particles.len(), 10);
    }

    #[test]
    fn test_draw_issues_one_instanced_call_per_batch() {
        let mut device = HeadlessDevice::new(UVec2::splat(4));
        let assets = setup(&mut device);
        let mut instances = vec![Instance::effect(
            EffectInstance::from_assets(&assets, "sparks", Vec3::ZERO).unwrap(),
        )];
        let mut renderer = EffectRenderer::new();
        renderer.update(&mut instances, 0.1, &Camera::default());

        let target = device.create_texture(&TextureDesc {
            label: "particles".into(),
            size: UVec2::splat(4),
            format: TextureFormat::Rgba16Float,
            render_target: true,
        });
        device
            .begin_pass(&PassDesc {
                label: "particle".into(),
                colors: vec![ColorTarget {
                    texture: target,
                    clear: Some([0.0; 4]),
                }],
                depth: None,
            })
            .unwrap();
        let lighting = Lighting::new(&mut device, 1);
        let draws = renderer
            .draw(&mut device, &assets, &lighting, &UniformSet::new(), &NoOverrides)
            .unwrap();
        device.end_pass().unwrap();
        device.present(target).unwrap();

        assert_eq!(draws, 2);
        let pass = device.last_frame().unwrap().pass("particle").unwrap();
        let instances: Vec<u32> = pass
            .draws
            .iter()
            .map(|d| match d.geometry {
                Geometry::Mesh { instances, .. } => instances,
                Geometry::Fullscreen => 0,
            })
            .collect();
        assert_eq!(instances, vec![5, 4]);
        assert!(pass.draws[0].storage.iter().any(|(name, len)| name == "particles" && *len == 5 * 64));
    }
}
