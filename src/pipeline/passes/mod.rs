// src/pipeline/passes/mod.rs
//! The passes the engine chains together.
//!
//! | pass | owns | reads |
//! |---|---|---|
//! | [`DepthPass`] | depth | |
//! | [`DeferredFramebufferPass`] | G-buffer (4 colours) | depth |
//! | [`ColorPass`] | scene colour | depth, G-buffer (deferred) |
//! | [`ParticlePass`] | particle colour | depth |
//! | [`CompositePass`] | tone-mapped colour | scene, particles |
//! | [`DepthOfFieldPass`] | blurred colour | colour, depth |
//! | [`FxaaPass`] | anti-aliased colour | colour |

pub mod color;
pub mod composite;
pub mod deferred_framebuffer;
pub mod depth;
pub mod dof;
pub mod fxaa;
pub mod particle;

pub use color::{ColorMode, ColorPass};
pub use composite::CompositePass;
pub use deferred_framebuffer::DeferredFramebufferPass;
pub use depth::DepthPass;
pub use dof::DepthOfFieldPass;
pub use fxaa::FxaaPass;
pub use particle::ParticlePass;

use crate::error::Result;
use crate::gpu::{Bindings, Capability, ColorTarget, DrawCall, Geometry, PassDesc, RenderDevice, TextureId, UniformSet};
use crate::materials::Blending;
use crate::shader::Program;

/// Clear a single colour target and draw one full-screen triangle into it.
pub(crate) fn fullscreen(
    device: &mut dyn RenderDevice,
    label: &str,
    target: TextureId,
    program: &Program,
    uniforms: &UniformSet,
    bindings: &Bindings,
) -> Result<()> {
    device.begin_pass(&PassDesc {
        label: label.to_string(),
        colors: vec![ColorTarget {
            texture: target,
            clear: Some([0.0, 0.0, 0.0, 1.0]),
        }],
        depth: None,
    })?;
    device.disable(Capability::DepthTest);
    device.disable(Capability::Blending);
    device.draw(&DrawCall {
        program: program.id,
        geometry: Geometry::Fullscreen,
        uniforms,
        bindings,
        blending: Blending::Opaque,
        two_sided: true,
    })?;
    device.enable(Capability::DepthTest);
    device.end_pass()
}
