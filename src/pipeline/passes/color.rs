// src/pipeline/passes/color.rs
//! Lit scene colour.
//!
//! Deferred mode resolves the G-buffer with one full-screen draw, then
//! draws translucent parts (and opaque parts whose material has no deferred
//! variant) forward on top. Forward mode shades every part directly.

use glam::{UVec2, Vec4};

use crate::error::Result;
use crate::gpu::{Bindings, Capability, ColorTarget, DepthTarget, PassDesc, RenderDevice, TextureFormat, TextureId};
use crate::pipeline::framebuffer::{Attachment, AttachmentRef, FramebufferId, Framebuffers};
use crate::pipeline::instance_renderer::{DrawItem, InstanceRenderer};
use crate::pipeline::pass::{Frame, RenderPass};
use crate::shader::ShaderPass;

pub const DEFERRED_LIGHTING_PROGRAM: &str = "pipeline/deferred_lighting";

/// G-buffer binding names, in attachment order.
const GBUFFER_TEXTURES: [&str; 4] = ["gbuffer_albedo", "gbuffer_normal", "gbuffer_properties", "gbuffer_emissive"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Forward,
    Deferred { gbuffer: FramebufferId },
}

pub struct ColorPass {
    mode: ColorMode,
    scene: FramebufferId,
    depth: AttachmentRef,
    clear_color: [f32; 4],
    renderer: InstanceRenderer,
}

impl ColorPass {
    pub const NAME: &'static str = "color";
    /// Label of the forward overlay pass drawn after the deferred resolve.
    pub const FORWARD_LABEL: &'static str = "color_forward";

    pub fn new(
        device: &mut dyn RenderDevice,
        framebuffers: &mut Framebuffers,
        size: UVec2,
        mode: ColorMode,
        depth: AttachmentRef,
        clear_color: [f32; 4],
    ) -> Self {
        let scene = framebuffers.create(
            device,
            Self::NAME,
            "scene",
            size,
            &[(Attachment::Color0, TextureFormat::Rgba16Float)],
        );
        Self {
            mode,
            scene,
            depth,
            clear_color,
            renderer: InstanceRenderer::new(ShaderPass::Forward, Self::NAME).lit(),
        }
    }

    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    fn scene(&self) -> AttachmentRef {
        AttachmentRef::new(self.scene, Attachment::Color0)
    }

    fn resolve_gbuffer(
        &self,
        device: &mut dyn RenderDevice,
        frame: &Frame<'_>,
        framebuffers: &Framebuffers,
        gbuffer: FramebufferId,
        target: TextureId,
    ) -> Result<()> {
        let program = frame
            .assets
            .shaders
            .get_or_compile_named(device, DEFERRED_LIGHTING_PROGRAM)?;
        let mut uniforms = frame.uniforms.clone();
        uniforms
            .set("inverse_view_proj", frame.camera.view_proj_matrix().inverse())
            .set("clear_color", Vec4::from_array(self.clear_color));
        let mut bindings = Bindings::default();
        frame.lighting.bind(&mut uniforms, &mut bindings);
        for (name, texture) in GBUFFER_TEXTURES.iter().zip(framebuffers.get(gbuffer)?.colors()) {
            bindings.texture(*name, texture);
        }
        bindings.texture("gbuffer_depth", framebuffers.texture(self.depth)?);
        super::fullscreen(device, Self::NAME, target, &program, &uniforms, &bindings)
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_forward<'i, 'a: 'i>(
        &self,
        device: &mut dyn RenderDevice,
        frame: &Frame<'_>,
        label: &str,
        target: TextureId,
        clear: Option<[f32; 4]>,
        depth: TextureId,
        items: impl IntoIterator<Item = &'i DrawItem<'a>>,
    ) -> Result<()> {
        device.begin_pass(&PassDesc {
            label: label.to_string(),
            colors: vec![ColorTarget { texture: target, clear }],
            depth: Some(DepthTarget {
                texture: depth,
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
            items,
        )?;
        device.enable(Capability::DepthWrite);
        device.end_pass()
    }
}

impl RenderPass for ColorPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn draw(&mut self, device: &mut dyn RenderDevice, frame: &Frame<'_>, framebuffers: &Framebuffers) -> Result<()> {
        let target = framebuffers.texture(self.scene())?;
        let depth = framebuffers.texture(self.depth)?;
        let buckets = frame.buckets;
        match self.mode {
            ColorMode::Forward => self.draw_forward(
                device,
                frame,
                Self::NAME,
                target,
                Some(self.clear_color),
                depth,
                buckets.iter(),
            ),
            ColorMode::Deferred { gbuffer } => {
                self.resolve_gbuffer(device, frame, framebuffers, gbuffer, target)?;
                let overlay: Vec<&DrawItem<'_>> = buckets
                    .opaque()
                    .iter()
                    .filter(|item| !item.material.supports_pass(ShaderPass::Deferred))
                    .chain(buckets.translucent())
                    .collect();
                if overlay.is_empty() {
                    return Ok(());
                }
                self.draw_forward(device, frame, Self::FORWARD_LABEL, target, None, depth, overlay)
            }
        }
    }

    fn reads(&self) -> Vec<AttachmentRef> {
        let mut reads = vec![self.depth];
        if let ColorMode::Deferred { gbuffer } = self.mode {
            reads.extend(
                [Attachment::Color0, Attachment::Color1, Attachment::Color2, Attachment::Color3]
                    .into_iter()
                    .map(|attachment| AttachmentRef::new(gbuffer, attachment)),
            );
        }
        reads
    }

    fn writes(&self) -> Vec<FramebufferId> {
        vec![self.scene]
    }

    fn result(&self) -> Option<AttachmentRef> {
        Some(self.scene())
    }
}
