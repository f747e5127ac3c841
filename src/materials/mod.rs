// src/materials/mod.rs
//! Material definition and property store.
//!
//! A [`MaterialBuilder`] accumulates typed properties, custom uniforms and
//! samplers plus shading/blending flags, then `build()` assigns a shader index
//! from the asset set's [`MaterialCompileContext`], pre-compiles the
//! requested shader variants and sizes the GPU uniform buffer from the
//! reflected `material` block. [`definer`] turns a material into the define
//! set the shader sources are specialised with.

pub mod builder;
pub mod compile_context;
pub mod definer;
pub mod material;
pub mod property;

pub use builder::MaterialBuilder;
pub use compile_context::MaterialCompileContext;
pub use material::{Material, MaterialType, Snippets};
pub use property::{Blending, Property, PropertyKind, PropertyValue, Shading};
