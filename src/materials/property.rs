// src/materials/property.rs
//! Material property keys, values, shading and blending modes.
//!
//! Every property maps to exactly one preprocessor define; the names are the
//! contract with the `#ifdef` guards in `shaders/material/prelude.wgsl`.

use std::fmt;
use std::sync::Arc;

use glam::{Vec2, Vec4};

use crate::gpu::UniformValue;
use crate::texture::Texture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Property {
    Color,
    EmissiveColor,
    Diffuse,
    Normal,
    EmissiveMask,
    BlendMask,
    MetallicTexture,
    RoughnessTexture,
    AmbientOcclusionTexture,
    ORM,
    TessellationFactor,
    Metallic,
    Roughness,
    IoR,
    Absorption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Scalar,
    Vec2,
    Vec4,
    Texture,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PropertyKind::Scalar => "scalar",
            PropertyKind::Vec2 => "vec2",
            PropertyKind::Vec4 => "vec4",
            PropertyKind::Texture => "texture",
        })
    }
}

impl Property {
    pub const ALL: [Property; 15] = [
        Property::Color,
        Property::EmissiveColor,
        Property::Diffuse,
        Property::Normal,
        Property::EmissiveMask,
        Property::BlendMask,
        Property::MetallicTexture,
        Property::RoughnessTexture,
        Property::AmbientOcclusionTexture,
        Property::ORM,
        Property::TessellationFactor,
        Property::Metallic,
        Property::Roughness,
        Property::IoR,
        Property::Absorption,
    ];

    pub fn define(self) -> &'static str {
        match self {
            Property::Color => "ENGINE_MATERIAL_COLOR",
            Property::EmissiveColor => "ENGINE_MATERIAL_EMISSIVE_COLOR",
            Property::Diffuse => "ENGINE_MATERIAL_DIFFUSE_TEXTURE",
            Property::Normal => "ENGINE_MATERIAL_NORMAL_TEXTURE",
            Property::EmissiveMask => "ENGINE_MATERIAL_EMISSIVEMASK_TEXTURE",
            Property::BlendMask => "ENGINE_MATERIAL_BLENDMASK_TEXTURE",
            Property::MetallicTexture => "ENGINE_MATERIAL_METALLIC_TEXTURE",
            Property::RoughnessTexture => "ENGINE_MATERIAL_ROUGHNESS_TEXTURE",
            Property::AmbientOcclusionTexture => "ENGINE_MATERIAL_AMBIENT_OCCLUSION_TEXTURE",
            Property::ORM => "ENGINE_MATERIAL_ORM_TEXTURE",
            Property::TessellationFactor => "ENGINE_MATERIAL_TESSELLATION_FACTOR",
            Property::Metallic => "ENGINE_MATERIAL_METALLIC",
            Property::Roughness => "ENGINE_MATERIAL_ROUGHNESS",
            Property::IoR => "ENGINE_MATERIAL_IOR",
            Property::Absorption => "ENGINE_MATERIAL_ABSORPTION",
        }
    }

    pub fn kind(self) -> PropertyKind {
        match self {
            Property::Color | Property::EmissiveColor => PropertyKind::Vec4,
            Property::TessellationFactor => PropertyKind::Vec2,
            Property::Metallic | Property::Roughness | Property::IoR | Property::Absorption => {
                PropertyKind::Scalar
            }
            _ => PropertyKind::Texture,
        }
    }

    /// Uniform field or texture binding name in the material shaders.
    pub fn uniform_name(self) -> &'static str {
        match self {
            Property::Color => "color",
            Property::EmissiveColor => "emissive_color",
            Property::Diffuse => "material_diffuse",
            Property::Normal => "material_normal",
            Property::EmissiveMask => "material_emissive_mask",
            Property::BlendMask => "material_blend_mask",
            Property::MetallicTexture => "material_metallic_texture",
            Property::RoughnessTexture => "material_roughness_texture",
            Property::AmbientOcclusionTexture => "material_ambient_occlusion_texture",
            Property::ORM => "material_orm",
            Property::TessellationFactor => "tessellation_factor",
            Property::Metallic => "metallic",
            Property::Roughness => "roughness",
            Property::IoR => "ior",
            Property::Absorption => "absorption",
        }
    }
}

#[derive(Debug, Clone)]
pub enum PropertyValue {
    Scalar(f32),
    Vec2(Vec2),
    Vec4(Vec4),
    Texture(Arc<Texture>),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Scalar(_) => PropertyKind::Scalar,
            PropertyValue::Vec2(_) => PropertyKind::Vec2,
            PropertyValue::Vec4(_) => PropertyKind::Vec4,
            PropertyValue::Texture(_) => PropertyKind::Texture,
        }
    }

    /// Value written into the material uniform block; `None` for textures.
    pub fn uniform(&self) -> Option<UniformValue> {
        match self {
            PropertyValue::Scalar(v) => Some(UniformValue::Float(*v)),
            PropertyValue::Vec2(v) => Some(UniformValue::Vec2(*v)),
            PropertyValue::Vec4(v) => Some(UniformValue::Vec4(*v)),
            PropertyValue::Texture(_) => None,
        }
    }

    pub fn texture(&self) -> Option<&Arc<Texture>> {
        match self {
            PropertyValue::Texture(texture) => Some(texture),
            _ => None,
        }
    }
}

impl From<f32> for PropertyValue {
    fn from(v: f32) -> Self {
        PropertyValue::Scalar(v)
    }
}

impl From<Vec2> for PropertyValue {
    fn from(v: Vec2) -> Self {
        PropertyValue::Vec2(v)
    }
}

impl From<Vec4> for PropertyValue {
    fn from(v: Vec4) -> Self {
        PropertyValue::Vec4(v)
    }
}

impl From<Arc<Texture>> for PropertyValue {
    fn from(v: Arc<Texture>) -> Self {
        PropertyValue::Texture(v)
    }
}

/// Intrinsic surface response; selects the lighting computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Shading {
    /// No lighting: pre-lit meshes, emissive geometry, most particles.
    Unlit,
    #[default]
    Lit,
    Cloth,
    Subsurface,
    Custom,
}

impl Shading {
    pub fn define(self) -> &'static str {
        match self {
            Shading::Unlit => "ENGINE_MATERIAL_SHADING_UNLIT_MODEL",
            Shading::Lit => "ENGINE_MATERIAL_SHADING_REGULAR_MODEL",
            Shading::Cloth => "ENGINE_MATERIAL_SHADING_CLOTH_MODEL",
            Shading::Subsurface => "ENGINE_MATERIAL_SHADING_SUBSURFACE_MODEL",
            Shading::Custom => "ENGINE_MATERIAL_SHADING_CUSTOM_MODEL",
        }
    }
}

/// Transparency mode; also the bucket a draw lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Blending {
    #[default]
    Opaque,
    Translucent,
    Additive,
    Modulate,
    Text,
}

impl Blending {
    pub const ALL: [Blending; 5] = [
        Blending::Opaque,
        Blending::Translucent,
        Blending::Additive,
        Blending::Modulate,
        Blending::Text,
    ];

    /// Drawn after opaque geometry, without writing depth.
    pub fn is_translucent(self) -> bool {
        !matches!(self, Blending::Opaque)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_defines_and_names_are_unique() {
        let defines: HashSet<_> = Property::ALL.iter().map(|p| p.define()).collect();
        let names: HashSet<_> = Property::ALL.iter().map(|p| p.uniform_name()).collect();
        assert_eq!(defines.len(), Property::ALL.len());
        assert_eq!(names.len(), Property::ALL.len());
    }

    #[test]
    fn test_define_table() {
        assert_eq!(Property::Color.define(), "ENGINE_MATERIAL_COLOR");
        assert_eq!(Property::Diffuse.define(), "ENGINE_MATERIAL_DIFFUSE_TEXTURE");
        assert_eq!(Property::EmissiveMask.define(), "ENGINE_MATERIAL_EMISSIVEMASK_TEXTURE");
        assert_eq!(Property::ORM.define(), "ENGINE_MATERIAL_ORM_TEXTURE");
        assert_eq!(Shading::Lit.define(), "ENGINE_MATERIAL_SHADING_REGULAR_MODEL");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Property::Color.kind(), PropertyKind::Vec4);
        assert_eq!(Property::TessellationFactor.kind(), PropertyKind::Vec2);
        assert_eq!(Property::IoR.kind(), PropertyKind::Scalar);
        assert_eq!(Property::Normal.kind(), PropertyKind::Texture);
        assert_eq!(PropertyValue::from(0.5).kind(), PropertyKind::Scalar);
        assert!(PropertyValue::from(Vec4::ONE).uniform().is_some());
    }

    #[test]
    fn test_only_opaque_is_not_translucent() {
        let translucent: Vec<_> = Blending::ALL.iter().filter(|b| b.is_translucent()).collect();
        assert_eq!(translucent.len(), 4);
        assert!(Blending::Opaque < Blending::Translucent);
    }
}
