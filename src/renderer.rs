// src/renderer.rs
//! Per-frame orchestration.
//!
//! [`Renderer::render`] is one frame:
//!
//! 1. flush dirty light containers,
//! 2. advance every particle emitter and rebuild the particle batches,
//! 3. collect the visible instances into blending buckets,
//! 4. run the pass chain,
//! 5. present the last pass's output.

use glam::UVec2;

use crate::asset::Assets;
use crate::config::RendererSettings;
use crate::error::Result;
use crate::fx::EffectRenderer;
use crate::gpu::RenderDevice;
use crate::pipeline::{frame_uniforms, Frame, InstanceBuckets, NoOverrides, Pipeline, UniformSetter};
use crate::scene::Scene;

/// What one call to [`Renderer::render`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub instances: usize,
    pub particles: usize,
    pub particle_batches: usize,
    pub light_uploads: usize,
}

pub struct Renderer {
    settings: RendererSettings,
    pipeline: Pipeline,
    effects: EffectRenderer,
    time: f32,
    frame_index: u64,
}

impl Renderer {
    pub fn new(device: &mut dyn RenderDevice, settings: RendererSettings) -> Result<Self> {
        let size = device.framebuffer_size();
        let pipeline = Pipeline::from_settings(device, &settings, size)?;
        Ok(Self {
            settings,
            pipeline,
            effects: EffectRenderer::new(),
            time: 0.0,
            frame_index: 0,
        })
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn effects(&self) -> &EffectRenderer {
        &self.effects
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Resize every framebuffer and the camera aspect before the next frame.
    pub fn on_framebuffer_change(&mut self, device: &mut dyn RenderDevice, scene: &mut Scene, size: UVec2) -> Result<()> {
        if size.x == 0 || size.y == 0 {
            return Ok(());
        }
        scene.camera.set_aspect(size.x as f32 / size.y as f32);
        self.pipeline.on_framebuffer_change(device, size)
    }

    pub fn render(&mut self, device: &mut dyn RenderDevice, assets: &Assets, scene: &mut Scene, dt: f32) -> Result<FrameStats> {
        self.render_with(device, assets, scene, dt, &NoOverrides)
    }

    /// [`Renderer::render`] with per-draw uniform overrides.
    pub fn render_with(
        &mut self,
        device: &mut dyn RenderDevice,
        assets: &Assets,
        scene: &mut Scene,
        dt: f32,
        setter: &dyn UniformSetter,
    ) -> Result<FrameStats> {
        self.time += dt;
        let light_uploads = scene.lighting.update(device);

        let camera = scene.camera.clone();
        self.effects.update(scene.instances_mut(), dt, &camera);

        let buckets = InstanceBuckets::collect(scene.instances(), &camera);
        let uniforms = frame_uniforms(&camera, self.pipeline.size().as_vec2(), self.time);
        let frame = Frame {
            assets,
            camera: &camera,
            buckets: &buckets,
            lighting: &scene.lighting,
            effects: &self.effects,
            uniforms: &uniforms,
            setter,
        };
        self.pipeline.draw(device, &frame)?;
        device.present(self.pipeline.result()?)?;

        self.frame_index += 1;
        Ok(FrameStats {
            instances: buckets.len(),
            particles: self.effects.particle_count(),
            particle_batches: self.effects.batch_count(),
            light_uploads,
        })
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        self.pipeline.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::distribution::Distribution;
    use crate::fx::emitter::tests::effect_material;
    use crate::fx::modules::Lifetime;
    use crate::fx::{EffectBuilder, EffectInstance, SpawnMode, SpawnSettings};
    use crate::gpu::headless::HeadlessDevice;
    use crate::instances::Instance;
    use crate::lighting::PointLight;
    use glam::Vec3;

    #[test]
    fn test_frame_flushes_lights_once_and_presents() {
        let mut device = HeadlessDevice::new(UVec2::new(32, 16));
        let settings = RendererSettings::default();
        let assets = Assets::new(&settings);
        let mut scene = Scene::new(&mut device, settings.light_reserve);
        let mut renderer = Renderer::new(&mut device, settings).unwrap();

        scene.lighting.point_lights.add(PointLight::new(Vec3::Y, Vec3::ONE, 1.0, 4.0));
        let stats = renderer.render(&mut device, &assets, &mut scene, 0.016).unwrap();
        assert_eq!(stats.light_uploads, 1);
        let stats = renderer.render(&mut device, &assets, &mut scene, 0.016).unwrap();
        assert_eq!(stats.light_uploads, 0);

        let frame = device.last_frame().unwrap();
        assert_eq!(frame.presented, renderer.pipeline().result().unwrap());
        assert_eq!(renderer.frame_index(), 2);
    }

    #[test]
    fn test_finished_effect_is_removed_after_its_particles_die() {
        let mut device = HeadlessDevice::new(UVec2::splat(8));
        let settings = RendererSettings::default();
        let assets = Assets::new(&settings);
        let spark = effect_material(&mut device, &assets, "spark");
        EffectBuilder::new(&assets)
            .name("pop")
            .sprite_emitter("burst", spark)
            .spawn(SpawnSettings {
                mode: SpawnMode::Burst {
                    count: 4,
                    interval: 10.0,
                    loops: Some(1),
                },
                ..Default::default()
            })
            .module(Lifetime(Distribution::Const(0.05)))
            .build()
            .unwrap();

        let mut scene = Scene::new(&mut device, 1);
        scene.add(Instance::effect(EffectInstance::from_assets(&assets, "pop", Vec3::ZERO).unwrap()));
        let mut renderer = Renderer::new(&mut device, settings).unwrap();

        let stats = renderer.render(&mut device, &assets, &mut scene, 0.01).unwrap();
        assert_eq!(stats.particles, 4);
        let particle_pass = device.last_frame().unwrap().pass("particle").unwrap();
        assert_eq!(particle_pass.draws.len(), 1);

        for _ in 0..10 {
            scene.update(0.01);
            renderer.render(&mut device, &assets, &mut scene, 0.01).unwrap();
        }
        scene.update(0.01);
        assert!(scene.is_empty());
    }

    #[test]
    fn test_resize_updates_camera_aspect() {
        let mut device = HeadlessDevice::new(UVec2::new(1080, 720));
        let settings = RendererSettings::default();
        let assets = Assets::new(&settings);
        let mut scene = Scene::new(&mut device, 1);
        let mut renderer = Renderer::new(&mut device, settings).unwrap();

        device.set_framebuffer_size(UVec2::new(800, 600));
        renderer
            .on_framebuffer_change(&mut device, &mut scene, UVec2::new(800, 600))
            .unwrap();
        assert!((scene.camera.aspect - 800.0 / 600.0).abs() < 1e-6);
        assert_eq!(renderer.pipeline().size(), UVec2::new(800, 600));
        renderer.render(&mut device, &assets, &mut scene, 0.016).unwrap();
        assert!(device.last_frame().unwrap().passes.iter().all(|p| p.size == UVec2::new(800, 600)));
    }
}
