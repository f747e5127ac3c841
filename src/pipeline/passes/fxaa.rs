// src/pipeline/passes/fxaa.rs
//! Luma-based anti-aliasing, the last pass of both chains.

use glam::UVec2;

use crate::error::Result;
use crate::gpu::{Bindings, RenderDevice, TextureFormat};
use crate::pipeline::framebuffer::{Attachment, AttachmentRef, FramebufferId, Framebuffers};
use crate::pipeline::pass::{Frame, RenderPass};

pub const FXAA_PROGRAM: &str = "pipeline/fxaa";

pub struct FxaaPass {
    framebuffer: FramebufferId,
    color: AttachmentRef,
    pub edge_threshold: f32,
    pub edge_threshold_min: f32,
    pub subpixel: f32,
}

impl FxaaPass {
    pub const NAME: &'static str = "fxaa";

    pub fn new(device: &mut dyn RenderDevice, framebuffers: &mut Framebuffers, size: UVec2, color: AttachmentRef) -> Self {
        let framebuffer = framebuffers.create(
            device,
            Self::NAME,
            "fxaa",
            size,
            &[(Attachment::Color0, TextureFormat::Rgba8)],
        );
        Self {
            framebuffer,
            color,
            edge_threshold: 0.166,
            edge_threshold_min: 0.0833,
            subpixel: 0.75,
        }
    }
}

impl RenderPass for FxaaPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn draw(&mut self, device: &mut dyn RenderDevice, frame: &Frame<'_>, framebuffers: &Framebuffers) -> Result<()> {
        let program = frame.assets.shaders.get_or_compile_named(device, FXAA_PROGRAM)?;
        let mut uniforms = frame.uniforms.clone();
        uniforms
            .set("edge_threshold", self.edge_threshold)
            .set("edge_threshold_min", self.edge_threshold_min)
            .set("subpixel", self.subpixel);
        let mut bindings = Bindings::default();
        bindings.texture("fxaa_color", framebuffers.texture(self.color)?);
        let target = framebuffers.texture(AttachmentRef::new(self.framebuffer, Attachment::Color0))?;
        super::fullscreen(device, Self::NAME, target, &program, &uniforms, &bindings)
    }

    fn reads(&self) -> Vec<AttachmentRef> {
        vec![self.color]
    }

    fn writes(&self) -> Vec<FramebufferId> {
        vec![self.framebuffer]
    }

    fn result(&self) -> Option<AttachmentRef> {
        Some(AttachmentRef::new(self.framebuffer, Attachment::Color0))
    }
}
