// src/pipeline/pass.rs
//! The render pass interface.

use glam::UVec2;

use crate::asset::Assets;
use crate::camera::Camera;
use crate::error::Result;
use crate::fx::EffectRenderer;
use crate::gpu::{RenderDevice, UniformSet};
use crate::lighting::Lighting;

use super::framebuffer::{AttachmentRef, FramebufferId, Framebuffers};
use super::instance_renderer::InstanceBuckets;
use super::uniform_setter::UniformSetter;

/// Everything a pass may read while drawing one frame.
pub struct Frame<'a> {
    pub assets: &'a Assets,
    pub camera: &'a Camera,
    pub buckets: &'a InstanceBuckets<'a>,
    pub lighting: &'a Lighting,
    pub effects: &'a EffectRenderer,
    /// Camera and timing values shared by every material draw.
    pub uniforms: &'a UniformSet,
    pub setter: &'a dyn UniformSetter,
}

/// One node of the pass chain.
///
/// A pass owns the framebuffers it [`writes`](RenderPass::writes) and only
/// references the ones it [`reads`](RenderPass::reads). The pipeline checks
/// once, when the pass is pushed, that every read framebuffer belongs to a
/// pass that runs earlier.
pub trait RenderPass {
    fn name(&self) -> &'static str;

    fn draw(&mut self, device: &mut dyn RenderDevice, frame: &Frame<'_>, framebuffers: &Framebuffers) -> Result<()>;

    /// Resize owned framebuffers. Runs before the next frame is drawn.
    fn on_framebuffer_change(
        &mut self,
        device: &mut dyn RenderDevice,
        framebuffers: &mut Framebuffers,
        size: UVec2,
    ) -> Result<()> {
        for id in self.writes() {
            framebuffers.resize(device, id, size)?;
        }
        Ok(())
    }

    /// Upstream attachments this pass samples or binds.
    fn reads(&self) -> Vec<AttachmentRef> {
        Vec::new()
    }

    /// Framebuffers this pass owns and clears.
    fn writes(&self) -> Vec<FramebufferId> {
        Vec::new()
    }

    /// The attachment handed to the next stage, if any.
    fn result(&self) -> Option<AttachmentRef>;
}
