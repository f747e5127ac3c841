// src/pipeline/passes/particle.rs
//! Particle overlay: every batch of the effect renderer into a transparent
//! target, depth-tested against the opaque scene.

use glam::UVec2;

use crate::error::Result;
use crate::gpu::{Capability, ColorTarget, DepthTarget, PassDesc, RenderDevice, TextureFormat};
use crate::pipeline::framebuffer::{Attachment, AttachmentRef, FramebufferId, Framebuffers};
use crate::pipeline::pass::{Frame, RenderPass};

pub struct ParticlePass {
    framebuffer: FramebufferId,
    depth: AttachmentRef,
}

impl ParticlePass {
    pub const NAME: &'static str = "particle";

    pub fn new(
        device: &mut dyn RenderDevice,
        framebuffers: &mut Framebuffers,
        size: UVec2,
        depth: AttachmentRef,
    ) -> Self {
        let framebuffer = framebuffers.create(
            device,
            Self::NAME,
            "particles",
            size,
            &[(Attachment::Color0, TextureFormat::Rgba16Float)],
        );
        Self { framebuffer, depth }
    }
}

impl RenderPass for ParticlePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn draw(&mut self, device: &mut dyn RenderDevice, frame: &Frame<'_>, framebuffers: &Framebuffers) -> Result<()> {
        let target = framebuffers.texture(AttachmentRef::new(self.framebuffer, Attachment::Color0))?;
        device.begin_pass(&PassDesc {
            label: Self::NAME.to_string(),
            colors: vec![ColorTarget {
                texture: target,
                clear: Some([0.0; 4]),
            }],
            depth: Some(DepthTarget {
                texture: framebuffers.texture(self.depth)?,
                clear: None,
                read_only: true,
            }),
        })?;
        device.enable(Capability::DepthTest);
        let draws = frame
            .effects
            .draw(device, frame.assets, frame.lighting, frame.uniforms, frame.setter)?;
        log::trace!("Particle pass: {draws} batches");
        device.end_pass()
    }

    fn reads(&self) -> Vec<AttachmentRef> {
        vec![self.depth]
    }

    fn writes(&self) -> Vec<FramebufferId> {
        vec![self.framebuffer]
    }

    fn result(&self) -> Option<AttachmentRef> {
        Some(AttachmentRef::new(self.framebuffer, Attachment::Color0))
    }
}
