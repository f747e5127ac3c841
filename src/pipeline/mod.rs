// src/pipeline/mod.rs
//! The render pass chain.
//!
//! A [`Pipeline`] is a fixed, linear list of [`RenderPass`]es plus the
//! registry of the framebuffers they own. Passes are built in chain order and
//! receive the [`AttachmentRef`]s of the upstream outputs they consume;
//! [`Pipeline::push`] rejects a pass that reads anything not produced
//! earlier in the chain.
//!
//! ```text
//! deferred: depth → gbuffer → color → particle → composite → [dof] → [fxaa]
//! forward:  depth → color → particle → composite → [dof] → [fxaa]
//! ```

pub mod framebuffer;
pub mod instance_renderer;
pub mod pass;
pub mod passes;
pub mod uniform_setter;

use glam::UVec2;

use crate::config::{PipelineKind, RendererSettings};
use crate::context::{bail, ensure, Context, OptionContext};
use crate::error::{Error, Result};
use crate::gpu::{RenderDevice, TextureId};

pub use framebuffer::{Attachment, AttachmentRef, Framebuffer, FramebufferId, Framebuffers};
pub use instance_renderer::{DrawItem, InstanceBuckets, InstanceRenderer};
pub use pass::{Frame, RenderPass};
pub use uniform_setter::{frame_uniforms, DrawInfo, NoOverrides, UniformSetter};

use passes::{
    ColorMode, ColorPass, CompositePass, DeferredFramebufferPass, DepthOfFieldPass, DepthPass, FxaaPass,
    ParticlePass,
};

pub struct Pipeline {
    passes: Vec<Box<dyn RenderPass>>,
    framebuffers: Framebuffers,
    size: UVec2,
}

impl Pipeline {
    /// An empty chain whose framebuffers are created at `size`.
    pub fn new(size: UVec2) -> Self {
        Self {
            passes: Vec::new(),
            framebuffers: Framebuffers::new(),
            size: size.max(UVec2::ONE),
        }
    }

    /// The chain selected by `settings.pipeline`.
    pub fn from_settings(device: &mut dyn RenderDevice, settings: &RendererSettings, size: UVec2) -> Result<Self> {
        let mut pipeline = Self::new(size);
        let size = pipeline.size;
        let fbs = &mut pipeline.framebuffers;

        let depth = DepthPass::new(device, fbs, size);
        let depth_ref = depth.depth();
        let mut chain: Vec<Box<dyn RenderPass>> = vec![Box::new(depth)];

        let mode = match settings.pipeline {
            PipelineKind::Deferred => {
                let gbuffer = DeferredFramebufferPass::new(device, fbs, size, depth_ref);
                let mode = ColorMode::Deferred {
                    gbuffer: gbuffer.gbuffer(),
                };
                chain.push(Box::new(gbuffer));
                mode
            }
            PipelineKind::Forward => ColorMode::Forward,
        };
        let color = ColorPass::new(device, fbs, size, mode, depth_ref, settings.clear_color);
        let scene_ref = color.result().context("colour pass has no output")?;
        chain.push(Box::new(color));

        let particles = ParticlePass::new(device, fbs, size, depth_ref);
        let particle_ref = particles.result().context("particle pass has no output")?;
        chain.push(Box::new(particles));

        let composite = CompositePass::new(device, fbs, size, scene_ref, particle_ref, settings.exposure);
        let mut last = composite.result().context("composite pass has no output")?;
        chain.push(Box::new(composite));

        if settings.depth_of_field.enabled {
            let dof = DepthOfFieldPass::new(device, fbs, size, last, depth_ref, &settings.depth_of_field);
            last = dof.result().context("depth of field pass has no output")?;
            chain.push(Box::new(dof));
        }
        if settings.fxaa {
            chain.push(Box::new(FxaaPass::new(device, fbs, size, last)));
        }

        for pass in chain {
            pipeline.push(pass)?;
        }
        log::info!(
            "Built {:?} pipeline: {} ({}x{})",
            settings.pipeline,
            pipeline.pass_names().join(" -> "),
            size.x,
            size.y
        );
        Ok(pipeline)
    }

    pub fn framebuffers(&self) -> &Framebuffers {
        &self.framebuffers
    }

    /// Registry new passes allocate their framebuffers from.
    pub fn framebuffers_mut(&mut self) -> &mut Framebuffers {
        &mut self.framebuffers
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    /// Append a pass. Every framebuffer it reads must be owned by a pass
    /// already in the chain, and every framebuffer it writes by itself.
    pub fn push(&mut self, pass: Box<dyn RenderPass>) -> Result<()> {
        let name = pass.name();
        if self.passes.iter().any(|p| p.name() == name) {
            return Err(Error::already_exists("render pass", name));
        }
        for read in pass.reads() {
            let owner = self
                .framebuffers
                .owner(read.framebuffer)
                .ok_or_else(|| Error::not_found("framebuffer", read.to_string()))?;
            ensure!(
                self.passes.iter().any(|p| p.name() == owner),
                "pass {name} reads {read} written by {owner}, which does not run before it"
            );
        }
        for write in pass.writes() {
            match self.framebuffers.owner(write) {
                Some(owner) if owner == name => {}
                owner => bail!(
                    "pass {name} writes framebuffer #{} owned by {}",
                    write.0,
                    owner.unwrap_or("nobody")
                ),
            }
        }
        self.passes.push(pass);
        Ok(())
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Run every pass in chain order.
    pub fn draw(&mut self, device: &mut dyn RenderDevice, frame: &Frame<'_>) -> Result<()> {
        for pass in &mut self.passes {
            pass.draw(device, frame, &self.framebuffers)
                .with_context(|| format!("render pass {}", pass.name()))?;
        }
        Ok(())
    }

    /// Texture produced by the last pass that has an output.
    pub fn result(&self) -> Result<TextureId> {
        let output = self
            .passes
            .iter()
            .rev()
            .find_map(|p| p.result())
            .context("pipeline has no output attachment")?;
        self.framebuffers.texture(output)
    }

    /// Resize every sized pass. Returns once all attachments match `size`.
    pub fn on_framebuffer_change(&mut self, device: &mut dyn RenderDevice, size: UVec2) -> Result<()> {
        let size = size.max(UVec2::ONE);
        if size == self.size {
            return Ok(());
        }
        for pass in &mut self.passes {
            pass.on_framebuffer_change(device, &mut self.framebuffers, size)?;
        }
        log::info!("Pipeline resized {}x{} -> {}x{}", self.size.x, self.size.y, size.x, size.y);
        self.size = size;
        Ok(())
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        self.framebuffers.release(device);
        self.passes.clear();
    }
}
