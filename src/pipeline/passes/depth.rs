// src/pipeline/passes/depth.rs
//! Depth pre-pass: opaque geometry into a cleared depth buffer.

use glam::UVec2;

use crate::error::Result;
use crate::gpu::{Capability, DepthTarget, PassDesc, RenderDevice, TextureFormat};
use crate::pipeline::framebuffer::{Attachment, AttachmentRef, FramebufferId, Framebuffers};
use crate::pipeline::instance_renderer::InstanceRenderer;
use crate::pipeline::pass::{Frame, RenderPass};
use crate::shader::ShaderPass;

pub struct DepthPass {
    framebuffer: FramebufferId,
    renderer: InstanceRenderer,
}

impl DepthPass {
    pub const NAME: &'static str = "depth";

    pub fn new(device: &mut dyn RenderDevice, framebuffers: &mut Framebuffers, size: UVec2) -> Self {
        let framebuffer = framebuffers.create(
            device,
            Self::NAME,
            "depth",
            size,
            &[(Attachment::Depth, TextureFormat::Depth32Float)],
        );
        Self {
            framebuffer,
            renderer: InstanceRenderer::new(ShaderPass::Depth, Self::NAME),
        }
    }

    pub fn depth(&self) -> AttachmentRef {
        AttachmentRef::new(self.framebuffer, Attachment::Depth)
    }
}

impl RenderPass for DepthPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn draw(&mut self, device: &mut dyn RenderDevice, frame: &Frame<'_>, framebuffers: &Framebuffers) -> Result<()> {
        let depth = framebuffers.texture(self.depth())?;
        device.begin_pass(&PassDesc {
            label: Self::NAME.to_string(),
            colors: Vec::new(),
            depth: Some(DepthTarget {
                texture: depth,
                clear: Some(1.0),
                read_only: false,
            }),
        })?;
        device.enable(Capability::DepthTest);
        device.enable(Capability::DepthWrite);
        // Translucent surfaces never occlude, so only the opaque bucket lands here.
        self.renderer.draw(
            device,
            frame.assets,
            frame.lighting,
            frame.uniforms,
            frame.setter,
            frame.buckets.opaque(),
        )?;
        device.end_pass()
    }

    fn writes(&self) -> Vec<FramebufferId> {
        vec![self.framebuffer]
    }

    fn result(&self) -> Option<AttachmentRef> {
        Some(self.depth())
    }
}
