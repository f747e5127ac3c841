// src/shader/mod.rs
//! Shader variants: tags, keys and compiled programs.
//!
//! A program is identified by the material's shader index, the model topology
//! and the render pass it targets. [`cache::ShaderVariantCache`] compiles each
//! key once; [`compiler::ShaderCompiler`] turns a key into preprocessed,
//! reflected WGSL; [`library::ShaderLibrary`] owns the embedded sources.

pub mod cache;
pub mod compiler;
pub mod library;
pub mod preprocessor;
pub mod reflect;

use std::fmt;

use crate::gpu::ProgramId;
use reflect::ProgramReflection;

pub use cache::ShaderVariantCache;
pub use compiler::ShaderCompiler;
pub use library::ShaderLibrary;
pub use preprocessor::Defines;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// Define injected while preprocessing this stage.
    pub fn define(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "ENGINE_VERTEX_STAGE",
            ShaderStage::Fragment => "ENGINE_FRAGMENT_STAGE",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Which rendering stage a material variant targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderPass {
    Forward,
    Deferred,
    ForwardPlus,
    DirectionalShadow,
    PointShadow,
    ColorPicker,
    Text,
    /// Depth-only pre-pass.
    Depth,
}

impl ShaderPass {
    pub const ALL: [ShaderPass; 8] = [
        ShaderPass::Forward,
        ShaderPass::Deferred,
        ShaderPass::ForwardPlus,
        ShaderPass::DirectionalShadow,
        ShaderPass::PointShadow,
        ShaderPass::ColorPicker,
        ShaderPass::Text,
        ShaderPass::Depth,
    ];

    /// Library source the pass is built from.
    pub fn source_name(self) -> &'static str {
        match self {
            ShaderPass::Forward | ShaderPass::ForwardPlus => "material/forward",
            ShaderPass::Deferred => "material/deferred",
            ShaderPass::DirectionalShadow | ShaderPass::PointShadow | ShaderPass::Depth => {
                "material/depth"
            }
            ShaderPass::ColorPicker => "material/color_picker",
            ShaderPass::Text => "material/text",
        }
    }

    /// Define distinguishing passes that share a source.
    pub fn define(self) -> &'static str {
        match self {
            ShaderPass::Forward => "ENGINE_PASS_FORWARD",
            ShaderPass::Deferred => "ENGINE_PASS_DEFERRED",
            ShaderPass::ForwardPlus => "ENGINE_PASS_FORWARD_PLUS",
            ShaderPass::DirectionalShadow => "ENGINE_PASS_DIRECTIONAL_SHADOW",
            ShaderPass::PointShadow => "ENGINE_PASS_POINT_SHADOW",
            ShaderPass::ColorPicker => "ENGINE_PASS_COLOR_PICKER",
            ShaderPass::Text => "ENGINE_PASS_TEXT",
            ShaderPass::Depth => "ENGINE_PASS_DEPTH",
        }
    }
}

/// How an instance's vertex and transform data is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelShader {
    Plain,
    Skeletal,
    Instanced,
    SkeletalInstanced,
    Effect,
    Text,
}

impl ModelShader {
    pub fn define(self) -> &'static str {
        match self {
            ModelShader::Plain => "ENGINE_MATERIAL_REGULAR_MODEL",
            ModelShader::Skeletal => "ENGINE_MATERIAL_SKELETAL_MODEL",
            ModelShader::Instanced => "ENGINE_MATERIAL_INSTANCED_MODEL",
            ModelShader::SkeletalInstanced => "ENGINE_MATERIAL_SKELETAL_INSTANCED_MODEL",
            ModelShader::Effect => "ENGINE_MATERIAL_EFFECT_MODEL",
            ModelShader::Text => "ENGINE_MATERIAL_TEXT_MODEL",
        }
    }

    pub fn is_skinned(self) -> bool {
        matches!(self, ModelShader::Skeletal | ModelShader::SkeletalInstanced)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProgramKey {
    Material {
        shader_index: u64,
        model: ModelShader,
        pass: ShaderPass,
    },
    /// Pass-owned full-screen programs ("fxaa", "composite", ...).
    Named(String),
}

impl fmt::Display for ProgramKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramKey::Material {
                shader_index,
                model,
                pass,
            } => write!(f, "material#{shader_index}/{model:?}/{pass:?}"),
            ProgramKey::Named(name) => f.write_str(name),
        }
    }
}

/// A compiled, reflected program.
#[derive(Debug)]
pub struct Program {
    pub key: ProgramKey,
    pub id: ProgramId,
    pub reflection: ProgramReflection,
    /// xxh3 of the preprocessed stage sources.
    pub fingerprint: u64,
}
