// src/pipeline/passes/dof.rs
//! Depth of field.

use glam::{UVec2, Vec2};

use crate::config::DepthOfFieldSettings;
use crate::error::Result;
use crate::gpu::{Bindings, RenderDevice, TextureFormat};
use crate::pipeline::framebuffer::{Attachment, AttachmentRef, FramebufferId, Framebuffers};
use crate::pipeline::pass::{Frame, RenderPass};

pub const DOF_PROGRAM: &str = "pipeline/dof";

pub struct DepthOfFieldPass {
    framebuffer: FramebufferId,
    color: AttachmentRef,
    depth: AttachmentRef,
    /// Focus point in normalised screen coordinates.
    pub focus: Vec2,
    pub distance: Vec2,
    pub blur: f32,
}

impl DepthOfFieldPass {
    pub const NAME: &'static str = "dof";

    pub fn new(
        device: &mut dyn RenderDevice,
        framebuffers: &mut Framebuffers,
        size: UVec2,
        color: AttachmentRef,
        depth: AttachmentRef,
        settings: &DepthOfFieldSettings,
    ) -> Self {
        let framebuffer = framebuffers.create(
            device,
            Self::NAME,
            "dof",
            size,
            &[(Attachment::Color0, TextureFormat::Rgba8)],
        );
        Self {
            framebuffer,
            color,
            depth,
            focus: Vec2::from_array(settings.focus),
            distance: Vec2::from_array(settings.distance),
            blur: settings.blur,
        }
    }
}

impl RenderPass for DepthOfFieldPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn draw(&mut self, device: &mut dyn RenderDevice, frame: &Frame<'_>, framebuffers: &Framebuffers) -> Result<()> {
        let program = frame.assets.shaders.get_or_compile_named(device, DOF_PROGRAM)?;
        let mut uniforms = frame.uniforms.clone();
        uniforms
            .set("focus", self.focus)
            .set("distance", self.distance)
            .set("blur", self.blur);
        let mut bindings = Bindings::default();
        bindings
            .texture("dof_color", framebuffers.texture(self.color)?)
            .texture("dof_depth", framebuffers.texture(self.depth)?);
        let target = framebuffers.texture(AttachmentRef::new(self.framebuffer, Attachment::Color0))?;
        super::fullscreen(device, Self::NAME, target, &program, &uniforms, &bindings)
    }

    fn reads(&self) -> Vec<AttachmentRef> {
        vec![self.color, self.depth]
    }

    fn writes(&self) -> Vec<FramebufferId> {
        vec![self.framebuffer]
    }

    fn result(&self) -> Option<AttachmentRef> {
        Some(AttachmentRef::new(self.framebuffer, Attachment::Color0))
    }
}
