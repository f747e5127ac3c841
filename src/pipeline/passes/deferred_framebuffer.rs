// src/pipeline/passes/deferred_framebuffer.rs
//! G-buffer fill.
//!
//! Attachments: `Color0` albedo + occlusion, `Color1` normal + shading
//! detail, `Color2` metallic / roughness / shading / coverage, `Color3`
//! emission. Depth is the pre-pass buffer, bound read-only.

use glam::UVec2;

use crate::error::Result;
use crate::gpu::{Capability, ColorTarget, DepthTarget, PassDesc, RenderDevice, TextureFormat};
use crate::pipeline::framebuffer::{Attachment, AttachmentRef, FramebufferId, Framebuffers};
use crate::pipeline::instance_renderer::InstanceRenderer;
use crate::pipeline::pass::{Frame, RenderPass};
use crate::shader::ShaderPass;

pub struct DeferredFramebufferPass {
    gbuffer: FramebufferId,
    depth: AttachmentRef,
    renderer: InstanceRenderer,
}

impl DeferredFramebufferPass {
    pub const NAME: &'static str = "gbuffer";

    pub const LAYOUT: [(Attachment, TextureFormat); 4] = [
        (Attachment::Color0, TextureFormat::Rgba8),
        (Attachment::Color1, TextureFormat::Rgba16Float),
        (Attachment::Color2, TextureFormat::Rgba8),
        (Attachment::Color3, TextureFormat::Rgba16Float),
    ];

    pub fn new(
        device: &mut dyn RenderDevice,
        framebuffers: &mut Framebuffers,
        size: UVec2,
        depth: AttachmentRef,
    ) -> Self {
        let gbuffer = framebuffers.create(device, Self::NAME, "gbuffer", size, &Self::LAYOUT);
        Self {
            gbuffer,
            depth,
            renderer: InstanceRenderer::new(ShaderPass::Deferred, Self::NAME),
        }
    }

    pub fn gbuffer(&self) -> FramebufferId {
        self.gbuffer
    }
}

impl RenderPass for DeferredFramebufferPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn draw(&mut self, device: &mut dyn RenderDevice, frame: &Frame<'_>, framebuffers: &Framebuffers) -> Result<()> {
        let colors = framebuffers
            .get(self.gbuffer)?
            .colors()
            .map(|texture| ColorTarget {
                texture,
                clear: Some([0.0; 4]),
            })
            .collect();
        device.begin_pass(&PassDesc {
            label: Self::NAME.to_string(),
            colors,
            depth: Some(DepthTarget {
                texture: framebuffers.texture(self.depth)?,
                clear: None,
                read_only: true,
            }),
        })?;
        device.enable(Capability::DepthTest);
        device.disable(Capability::DepthWrite);
        self.renderer.draw(
            device,
            frame.assets,
            frame.lighting,
            frame.uniforms,
            frame.setter,
            frame.buckets.opaque(),
        )?;
        device.enable(Capability::DepthWrite);
        device.end_pass()
    }

    fn reads(&self) -> Vec<AttachmentRef> {
        vec![self.depth]
    }

    fn writes(&self) -> Vec<FramebufferId> {
        vec![self.gbuffer]
    }

    fn result(&self) -> Option<AttachmentRef> {
        Some(AttachmentRef::new(self.gbuffer, Attachment::Color0))
    }
}
