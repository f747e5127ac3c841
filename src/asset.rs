// src/asset.rs
//! The asset registry.
//!
//! [`Assets`] is the root owner of everything shared between instances:
//! materials, textures, meshes, models and effect templates, plus the shader
//! variant cache and the material compilation context. Each family lives in
//! its own [`ResourceContainer`], so lookups by name report which family a
//! missing or duplicate name belongs to.

use std::sync::Arc;

use crate::config::RendererSettings;
use crate::error::Result;
use crate::fx::EffectInstance;
use crate::gpu::RenderDevice;
use crate::materials::{Material, MaterialCompileContext};
use crate::model::{mesh, AbstractModel, Mesh};
use crate::resource_manager::ResourceContainer;
use crate::shader::{ShaderCompiler, ShaderPass, ShaderVariantCache};
use crate::texture::Texture;

pub const QUAD_MESH: &str = "quad";
pub const CUBE_MESH: &str = "cube";

pub struct Assets {
    pub materials: ResourceContainer<Material>,
    pub textures: ResourceContainer<Texture>,
    pub meshes: ResourceContainer<Mesh>,
    pub models: ResourceContainer<AbstractModel>,
    pub effects: ResourceContainer<EffectInstance>,
    pub shaders: ShaderVariantCache,
    pub compile_context: MaterialCompileContext,
    default_passes: Vec<ShaderPass>,
}

impl Assets {
    pub fn new(settings: &RendererSettings) -> Self {
        Self::with_compiler(settings, ShaderCompiler::default())
    }

    /// Registry whose shader cache compiles with `compiler` (custom library sources).
    pub fn with_compiler(settings: &RendererSettings, compiler: ShaderCompiler) -> Self {
        Self {
            materials: ResourceContainer::new("material"),
            textures: ResourceContainer::new("texture"),
            meshes: ResourceContainer::new("mesh"),
            models: ResourceContainer::new("model"),
            effects: ResourceContainer::new("effect"),
            shaders: ShaderVariantCache::new(compiler),
            compile_context: MaterialCompileContext::new(),
            default_passes: settings.default_material_passes(),
        }
    }

    /// Passes a material is compiled for when its builder names none.
    pub fn default_passes(&self) -> &[ShaderPass] {
        &self.default_passes
    }

    /// Upload the built-in quad and cube meshes if they are not registered yet.
    pub fn ensure_builtin_meshes(&self, device: &mut dyn RenderDevice) -> Result<()> {
        self.meshes
            .get_or_try_insert_with(QUAD_MESH, || Mesh::upload(device, QUAD_MESH, &mesh::quad()))?;
        self.meshes
            .get_or_try_insert_with(CUBE_MESH, || Mesh::upload(device, CUBE_MESH, &mesh::cube()))?;
        Ok(())
    }

    pub fn quad(&self, device: &mut dyn RenderDevice) -> Result<Arc<Mesh>> {
        self.meshes
            .get_or_try_insert_with(QUAD_MESH, || Mesh::upload(device, QUAD_MESH, &mesh::quad()))
    }

    pub fn cube(&self, device: &mut dyn RenderDevice) -> Result<Arc<Mesh>> {
        self.meshes
            .get_or_try_insert_with(CUBE_MESH, || Mesh::upload(device, CUBE_MESH, &mesh::cube()))
    }

    /// Drop every registry entry and release material uniform buffers.
    pub fn clear(&self, device: &mut dyn RenderDevice) {
        for material in self.materials.values() {
            material.release(device);
        }
        for texture in self.textures.values() {
            device.destroy_texture(texture.id);
        }
        self.materials.clear();
        self.textures.clear();
        self.meshes.clear();
        self.models.clear();
        self.effects.clear();
        log::info!("Cleared asset registry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineKind;
    use crate::gpu::headless::HeadlessDevice;
    use glam::UVec2;

    #[test]
    fn test_builtin_meshes_upload_once() {
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let assets = Assets::new(&RendererSettings::default());
        assets.ensure_builtin_meshes(&mut device).unwrap();
        assets.ensure_builtin_meshes(&mut device).unwrap();
        assert_eq!(device.meshes().len(), 2);
        assert_eq!(assets.quad(&mut device).unwrap().index_count, 6);
    }

    #[test]
    fn test_default_passes_follow_pipeline() {
        let settings = RendererSettings {
            pipeline: PipelineKind::Forward,
            ..Default::default()
        };
        let assets = Assets::new(&settings);
        assert_eq!(assets.default_passes(), &[ShaderPass::Depth, ShaderPass::Forward]);
    }

    #[test]
    fn test_unknown_name_names_the_family() {
        let assets = Assets::new(&RendererSettings::default());
        let err = assets.models.get("bob").unwrap_err();
        assert!(err.is_resource());
        assert!(err.to_string().contains("model"));
    }
}
