// src/materials/builder.rs
//! Builder for [`Material`]s.
//!
//! ```ignore
//! let brick = MaterialBuilder::new(&assets)
//!     .name("brick")
//!     .add(Property::Diffuse, albedo)
//!     .add(Property::Roughness, 0.7f32)
//!     .shading(Shading::Lit)
//!     .build(&mut device)?;
//! ```
//!
//! Setter errors (a value of the wrong kind, a duplicate uniform) are kept
//! and reported by [`MaterialBuilder::build`], so the chain stays fluent.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::asset::Assets;
use crate::error::{Error, Result};
use crate::gpu::{RenderDevice, UniformValue};
use crate::shader::{ModelShader, ShaderPass};
use crate::texture::Texture;

use super::material::{Material, MaterialValues, Snippets};
use super::property::{Blending, Property, PropertyValue, Shading};

#[derive(Default)]
struct Pending {
    name: String,
    properties: BTreeMap<Property, PropertyValue>,
    uniforms: BTreeMap<String, UniformValue>,
    samplers: BTreeMap<String, Arc<Texture>>,
    shading: Shading,
    blending: Blending,
    two_sided: bool,
    snippets: Snippets,
    model_shaders: Option<Vec<ModelShader>>,
    material_shaders: Option<Vec<ShaderPass>>,
}

pub struct MaterialBuilder<'a> {
    assets: &'a Assets,
    pending: Pending,
    error: Option<String>,
    built: bool,
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl<'a> MaterialBuilder<'a> {
    pub fn new(assets: &'a Assets) -> Self {
        Self {
            assets,
            pending: Pending::default(),
            error: None,
            built: false,
        }
    }

    fn fail(&mut self, reason: String) {
        if self.error.is_none() {
            self.error = Some(reason);
        }
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.pending.name = name.into();
        self
    }

    /// Add a property. The value kind must match the property (colour → vec4,
    /// maps → texture, metallic → scalar, ...).
    pub fn add(&mut self, property: Property, value: impl Into<PropertyValue>) -> &mut Self {
        let value = value.into();
        if value.kind() != property.kind() {
            self.fail(format!(
                "{property:?} expects a {} value, got a {}",
                property.kind(),
                value.kind()
            ));
            return self;
        }
        self.pending.properties.insert(property, value);
        self
    }

    /// Add a custom scalar/vector uniform to the material block.
    pub fn add_uniform(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> &mut Self {
        let name = name.into();
        if !is_identifier(&name) {
            self.fail(format!("uniform name {name:?} is not a valid identifier"));
        } else if Property::ALL.iter().any(|p| p.uniform_name() == name)
            || self.pending.uniforms.contains_key(&name)
            || self.pending.samplers.contains_key(&name)
        {
            self.fail(format!("uniform {name} is already defined"));
        } else {
            self.pending.uniforms.insert(name, value.into());
        }
        self
    }

    /// Add a custom texture binding.
    pub fn add_sampler(&mut self, name: impl Into<String>, texture: Arc<Texture>) -> &mut Self {
        let name = name.into();
        if !is_identifier(&name) {
            self.fail(format!("sampler name {name:?} is not a valid identifier"));
        } else if self.pending.samplers.contains_key(&name) || self.pending.uniforms.contains_key(&name) {
            self.fail(format!("sampler {name} is already defined"));
        } else {
            self.pending.samplers.insert(name, texture);
        }
        self
    }

    pub fn shading(&mut self, shading: Shading) -> &mut Self {
        self.pending.shading = shading;
        self
    }

    pub fn blending(&mut self, blending: Blending) -> &mut Self {
        self.pending.blending = blending;
        self
    }

    pub fn two_sided(&mut self, two_sided: bool) -> &mut Self {
        self.pending.two_sided = two_sided;
        self
    }

    pub fn vertex_snippet(&mut self, code: impl Into<String>) -> &mut Self {
        self.pending.snippets.vertex = code.into();
        self
    }

    pub fn fragment_snippet(&mut self, code: impl Into<String>) -> &mut Self {
        self.pending.snippets.fragment = code.into();
        self
    }

    pub fn global_snippet(&mut self, code: impl Into<String>) -> &mut Self {
        self.pending.snippets.global = code.into();
        self
    }

    /// Topologies to pre-compile for. Defaults to `[Plain]`.
    pub fn model_shaders(&mut self, models: impl Into<Vec<ModelShader>>) -> &mut Self {
        self.pending.model_shaders = Some(models.into());
        self
    }

    /// Passes to pre-compile for. Defaults to the pipeline's material passes.
    pub fn material_shaders(&mut self, passes: impl Into<Vec<ShaderPass>>) -> &mut Self {
        self.pending.material_shaders = Some(passes.into());
        self
    }

    /// Finalize: assign the shader index, pre-compile every (pass × model)
    /// variant except effects, allocate the uniform buffer from the reflected
    /// material block and register the material. Callable once.
    pub fn build(&mut self, device: &mut dyn RenderDevice) -> Result<Arc<Material>> {
        let material = self.prepare(device)?;
        register(self.assets, device, material)
    }

    /// Everything `build` does short of registering the material.
    fn prepare(&mut self, device: &mut dyn RenderDevice) -> Result<Material> {
        let name = self.pending.name.clone();
        if self.built {
            return Err(Error::material(name, "build() was already called on this builder"));
        }
        self.built = true;

        if let Some(reason) = self.error.take() {
            return Err(Error::material(name, reason));
        }
        if name.is_empty() {
            return Err(Error::material(name, "material has no name"));
        }
        let pending = std::mem::take(&mut self.pending);
        if pending.properties.is_empty() && pending.uniforms.is_empty() && pending.samplers.is_empty() {
            return Err(Error::material(name, "properties and uniforms cannot both be empty"));
        }
        if self.assets.materials.contains(&name) {
            return Err(Error::already_exists(self.assets.materials.kind(), name));
        }

        let model_shaders = match pending.model_shaders {
            Some(models) if !models.is_empty() => models,
            _ => vec![ModelShader::Plain],
        };
        let material_shaders = match pending.material_shaders {
            Some(passes) if !passes.is_empty() => passes,
            _ => self.assets.default_passes().to_vec(),
        };

        let mut material = Material::new(
            name.clone(),
            0,
            pending.shading,
            pending.blending,
            pending.two_sided,
            pending.snippets,
            model_shaders,
            material_shaders,
            pending.samplers,
            MaterialValues {
                properties: pending.properties,
                uniforms: pending.uniforms,
            },
        );
        let material_type = material.snippets().is_empty().then(|| material.material_type());
        material.shader_index = self.assets.compile_context.assign(material_type);

        let mut first_program = None;
        for &pass in material.material_shaders() {
            for &model in material.model_shaders() {
                // Effect variants depend on the emitter they end up in; compiled on first draw.
                if model == ModelShader::Effect {
                    continue;
                }
                let program = self.assets.shaders.get_or_compile(device, &material, model, pass)?;
                first_program.get_or_insert(program);
            }
        }
        if let Some(program) = &first_program {
            if let Err(err) = material.upload(device, program) {
                material.release(device);
                return Err(err);
            }
        }
        Ok(material)
    }
}

/// Register a built material. Another builder may have taken the name since
/// the duplicate check in `prepare`; the uniform buffer is released if so.
fn register(assets: &Assets, device: &mut dyn RenderDevice, material: Material) -> Result<Arc<Material>> {
    let material = Arc::new(material);
    match assets.materials.add(material.name(), material.clone()) {
        Ok(material) => {
            log::info!(
                "Built material {} (shader index {}, {} properties)",
                material.name(),
                material.shader_index(),
                material.properties().len()
            );
            Ok(material)
        }
        Err(err) => {
            material.release(device);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererSettings;
    use crate::gpu::headless::HeadlessDevice;
    use crate::materials::definer;
    use crate::shader::ProgramKey;
    use crate::texture::TextureLoader;
    use glam::{UVec2, Vec4};

    fn setup() -> (HeadlessDevice, Assets) {
        (
            HeadlessDevice::new(UVec2::new(320, 240)),
            Assets::new(&RendererSettings::default()),
        )
    }

    #[test]
    fn test_build_compiles_all_pairs_and_fills_buffer() {
        let (mut device, assets) = setup();
        let material = MaterialBuilder::new(&assets)
            .name("red")
            .add(Property::Color, Vec4::new(1.0, 0.0, 0.0, 1.0))
            .add(Property::Metallic, 0.25f32)
            .model_shaders([ModelShader::Plain, ModelShader::Skeletal, ModelShader::Effect])
            .material_shaders([ShaderPass::Forward, ShaderPass::Depth])
            .build(&mut device)
            .unwrap();

        // 2 passes × 2 non-effect models.
        assert_eq!(assets.shaders.len(), 4);
        assert!(!assets.shaders.contains(&ProgramKey::Material {
            shader_index: material.shader_index(),
            model: ModelShader::Effect,
            pass: ShaderPass::Forward,
        }));
        assert!(Arc::ptr_eq(&assets.materials.get("red").unwrap(), &material));

        let buffer = material.uniform_buffer().unwrap();
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(device.buffer_data(buffer).unwrap());
        assert_eq!(&floats[..5], &[1.0, 0.0, 0.0, 1.0, 0.25]);
        assert!(!material.is_dirty());
    }

    #[test]
    fn test_build_twice_is_error() {
        let (mut device, assets) = setup();
        let mut builder = MaterialBuilder::new(&assets);
        builder.name("once").add(Property::Color, Vec4::ONE);
        builder.build(&mut device).unwrap();
        let err = builder.build(&mut device).unwrap_err();
        assert!(err.is_material_build());
        assert!(err.to_string().contains("already called"));
    }

    #[test]
    fn test_empty_material_is_error() {
        let (mut device, assets) = setup();
        let err = MaterialBuilder::new(&assets)
            .name("empty")
            .shading(Shading::Unlit)
            .build(&mut device)
            .unwrap_err();
        assert!(err.is_material_build());
        assert!(assets.materials.is_empty());
        assert_eq!(device.compile_count(), 0);
    }

    #[test]
    fn test_wrong_value_kind_is_error() {
        let (mut device, assets) = setup();
        let err = MaterialBuilder::new(&assets)
            .name("bad")
            .add(Property::Diffuse, Vec4::ONE)
            .add(Property::Color, Vec4::ONE)
            .build(&mut device)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to build material bad: Diffuse expects a texture value, got a vec4"
        );
    }

    #[test]
    fn test_duplicate_name_is_resource_error() {
        let (mut device, assets) = setup();
        MaterialBuilder::new(&assets)
            .name("dup")
            .add(Property::Color, Vec4::ONE)
            .build(&mut device)
            .unwrap();
        let err = MaterialBuilder::new(&assets)
            .name("dup")
            .add(Property::Roughness, 0.3f32)
            .build(&mut device)
            .unwrap_err();
        assert!(err.is_resource());
    }

    #[test]
    fn test_losing_the_name_race_releases_the_uniform_buffer() {
        let (mut device, assets) = setup();
        let mut late = MaterialBuilder::new(&assets);
        late.name("lamp").add(Property::Color, Vec4::ONE);
        let material = late.prepare(&mut device).unwrap();
        let buffer = material.uniform_buffer().unwrap();
        assert!(device.buffer_desc(buffer).is_some());
        let live = device.live_buffer_count();

        MaterialBuilder::new(&assets)
            .name("lamp")
            .add(Property::Roughness, 0.5f32)
            .build(&mut device)
            .unwrap();
        let registered = device.live_buffer_count();
        assert_eq!(registered, live + 1);

        let err = register(&assets, &mut device, material).unwrap_err();
        assert!(err.is_resource());
        assert!(device.buffer_desc(buffer).is_none());
        assert_eq!(device.live_buffer_count(), registered - 1);
        assert_eq!(assets.materials.get("lamp").unwrap().properties().len(), 1);
    }

    #[test]
    fn test_same_type_shares_programs_snippets_do_not() {
        let (mut device, assets) = setup();
        let a = MaterialBuilder::new(&assets)
            .name("a")
            .add(Property::Color, Vec4::ONE)
            .build(&mut device)
            .unwrap();
        let compiled = device.compile_count();
        let b = MaterialBuilder::new(&assets)
            .name("b")
            .add(Property::Color, Vec4::ZERO)
            .build(&mut device)
            .unwrap();
        assert_eq!(a.shader_index(), b.shader_index());
        assert_eq!(device.compile_count(), compiled);

        let c = MaterialBuilder::new(&assets)
            .name("c")
            .add(Property::Color, Vec4::ONE)
            .fragment_snippet("result.color = vec4<f32>(1.0, 0.0, 1.0, 1.0);")
            .build(&mut device)
            .unwrap();
        assert_ne!(a.shader_index(), c.shader_index());
        assert!(device.compile_count() > compiled);
    }

    #[test]
    fn test_defines_follow_properties() {
        let (mut device, assets) = setup();
        let albedo =
            TextureLoader::solid_color(&mut device, &assets, "white", Vec4::ONE).unwrap();
        let noise = TextureLoader::solid_color(&mut device, &assets, "noise", Vec4::ZERO).unwrap();
        let material = MaterialBuilder::new(&assets)
            .name("textured")
            .add(Property::Diffuse, albedo.clone())
            .add(Property::Roughness, 0.5f32)
            .add_uniform("wave_speed", 2.0f32)
            .add_sampler("noise_map", noise)
            .shading(Shading::Cloth)
            .build(&mut device)
            .unwrap();

        let defines = definer::define(&material, ModelShader::Skeletal);
        assert!(defines.is_defined("ENGINE_MATERIAL_DIFFUSE_TEXTURE"));
        assert!(defines.is_defined("ENGINE_MATERIAL_ROUGHNESS"));
        assert!(!defines.is_defined("ENGINE_MATERIAL_COLOR"));
        assert!(defines.is_defined("ENGINE_MATERIAL_SHADING_CLOTH_MODEL"));
        assert!(defines.is_defined("ENGINE_MATERIAL_SKELETAL_MODEL"));
        assert_eq!(defines.get(definer::CUSTOM_SCALARS), Some("wave_speed: f32,"));
        assert_eq!(
            defines.get(definer::CUSTOM_SAMPLERS),
            Some("@group(1) @binding(16) var noise_map: texture_2d<f32>;")
        );
        assert_eq!(defines.get(definer::VERTEX_SNIPPET), Some(""));

        let names: Vec<String> = material.texture_bindings().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["material_diffuse".to_string(), "noise_map".to_string()]);
    }

    #[test]
    fn test_value_edits_mark_buffer_dirty() {
        let (mut device, assets) = setup();
        let material = MaterialBuilder::new(&assets)
            .name("glow")
            .add(Property::EmissiveColor, Vec4::ZERO)
            .add_uniform("pulse", 0.0f32)
            .build(&mut device)
            .unwrap();
        let buffer = material.uniform_buffer().unwrap();
        let writes = device.buffer_write_count(buffer);

        material.set_vector(Property::EmissiveColor, Vec4::splat(2.0)).unwrap();
        material.set_uniform("pulse", 0.5f32).unwrap();
        assert!(material.is_dirty());
        assert!(material.set_scalar(Property::Roughness, 1.0).is_err());
        assert!(material.set_uniform("pulse", 1u32).is_err());

        let program = assets
            .shaders
            .get_or_compile(&mut device, &material, ModelShader::Plain, ShaderPass::Forward)
            .unwrap();
        material.upload(&mut device, &program).unwrap();
        material.upload(&mut device, &program).unwrap();
        assert_eq!(device.buffer_write_count(buffer), writes + 1);
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(device.buffer_data(buffer).unwrap());
        assert_eq!(&floats[..5], &[2.0, 2.0, 2.0, 2.0, 0.5]);
    }
}
