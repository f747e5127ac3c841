// src/pipeline/passes/composite.rs
//! Merges scene colour and the particle overlay, then tone-maps.

use glam::UVec2;

use crate::error::Result;
use crate::gpu::{Bindings, RenderDevice, TextureFormat};
use crate::pipeline::framebuffer::{Attachment, AttachmentRef, FramebufferId, Framebuffers};
use crate::pipeline::pass::{Frame, RenderPass};

pub const COMPOSITE_PROGRAM: &str = "pipeline/composite";

pub struct CompositePass {
    framebuffer: FramebufferId,
    scene: AttachmentRef,
    particles: AttachmentRef,
    pub exposure: f32,
}

impl CompositePass {
    pub const NAME: &'static str = "composite";

    pub fn new(
        device: &mut dyn RenderDevice,
        framebuffers: &mut Framebuffers,
        size: UVec2,
        scene: AttachmentRef,
        particles: AttachmentRef,
        exposure: f32,
    ) -> Self {
        let framebuffer = framebuffers.create(
            device,
            Self::NAME,
            "composite",
            size,
            &[(Attachment::Color0, TextureFormat::Rgba8)],
        );
        Self {
            framebuffer,
            scene,
            particles,
            exposure,
        }
    }
}

impl RenderPass for CompositePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn draw(&mut self, device: &mut dyn RenderDevice, frame: &Frame<'_>, framebuffers: &Framebuffers) -> Result<()> {
        let program = frame.assets.shaders.get_or_compile_named(device, COMPOSITE_PROGRAM)?;
        let mut uniforms = frame.uniforms.clone();
        uniforms.set("exposure", self.exposure);
        let mut bindings = Bindings::default();
        bindings
            .texture("scene_color", framebuffers.texture(self.scene)?)
            .texture("particle_color", framebuffers.texture(self.particles)?);
        let target = framebuffers.texture(AttachmentRef::new(self.framebuffer, Attachment::Color0))?;
        super::fullscreen(device, Self::NAME, target, &program, &uniforms, &bindings)
    }

    fn reads(&self) -> Vec<AttachmentRef> {
        vec![self.scene, self.particles]
    }

    fn writes(&self) -> Vec<FramebufferId> {
        vec![self.framebuffer]
    }

    fn result(&self) -> Option<AttachmentRef> {
        Some(AttachmentRef::new(self.framebuffer, Attachment::Color0))
    }
}
