// src/materials/material.rs
//! The built material.
//!
//! Everything that shapes shader code (property keys, custom uniform names,
//! sampler names, shading, snippets) is fixed at build time. Property and
//! uniform *values* stay editable; editing one flags the GPU uniform buffer
//! for rewrite on the next bind.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::{Vec2, Vec4};
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::gpu::{Bindings, BufferDesc, BufferId, BufferKind, RenderDevice, UniformValue};
use crate::shader::reflect::BlockLayout;
use crate::shader::{ModelShader, Program, ShaderPass};
use crate::texture::Texture;

use super::property::{Blending, Property, PropertyKind, PropertyValue, Shading};

/// Name of the material uniform block in every material program.
pub const MATERIAL_BLOCK: &str = "material";

/// Custom shader code spliced into the material sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Snippets {
    pub vertex: String,
    pub fragment: String,
    pub global: String,
}

impl Snippets {
    pub fn is_empty(&self) -> bool {
        self.vertex.is_empty() && self.fragment.is_empty() && self.global.is_empty()
    }
}

/// Everything that determines a material's generated shader code.
/// Materials of equal type share one shader index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaterialType {
    pub properties: Vec<Property>,
    pub uniforms: Vec<(String, &'static str)>,
    pub samplers: Vec<String>,
    pub shading: Shading,
    pub blending: Blending,
    pub two_sided: bool,
}

/// WGSL type of a custom uniform value.
pub fn wgsl_type(value: &UniformValue) -> &'static str {
    match value {
        UniformValue::Float(_) => "f32",
        UniformValue::Int(_) => "i32",
        UniformValue::UInt(_) => "u32",
        UniformValue::Vec2(_) => "vec2<f32>",
        UniformValue::Vec3(_) => "vec3<f32>",
        UniformValue::Vec4(_) => "vec4<f32>",
        UniformValue::Mat4(_) => "mat4x4<f32>",
    }
}

#[derive(Debug, Default)]
pub(crate) struct MaterialValues {
    pub properties: BTreeMap<Property, PropertyValue>,
    pub uniforms: BTreeMap<String, UniformValue>,
}

#[derive(Debug)]
struct MaterialBuffer {
    id: BufferId,
    layout: BlockLayout,
}

#[derive(Debug)]
pub struct Material {
    pub(crate) name: String,
    pub(crate) shader_index: u64,
    pub(crate) shading: Shading,
    pub(crate) blending: Blending,
    pub(crate) two_sided: bool,
    pub(crate) snippets: Snippets,
    pub(crate) model_shaders: Vec<ModelShader>,
    pub(crate) material_shaders: Vec<ShaderPass>,
    pub(crate) samplers: BTreeMap<String, Arc<Texture>>,
    values: RwLock<MaterialValues>,
    buffer: Mutex<Option<MaterialBuffer>>,
    dirty: AtomicBool,
}

impl Material {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        shader_index: u64,
        shading: Shading,
        blending: Blending,
        two_sided: bool,
        snippets: Snippets,
        model_shaders: Vec<ModelShader>,
        material_shaders: Vec<ShaderPass>,
        samplers: BTreeMap<String, Arc<Texture>>,
        values: MaterialValues,
    ) -> Self {
        Self {
            name,
            shader_index,
            shading,
            blending,
            two_sided,
            snippets,
            model_shaders,
            material_shaders,
            samplers,
            values: RwLock::new(values),
            buffer: Mutex::new(None),
            dirty: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shader_index(&self) -> u64 {
        self.shader_index
    }

    pub fn shading(&self) -> Shading {
        self.shading
    }

    pub fn blending(&self) -> Blending {
        self.blending
    }

    pub fn two_sided(&self) -> bool {
        self.two_sided
    }

    pub fn snippets(&self) -> &Snippets {
        &self.snippets
    }

    pub fn model_shaders(&self) -> &[ModelShader] {
        &self.model_shaders
    }

    pub fn material_shaders(&self) -> &[ShaderPass] {
        &self.material_shaders
    }

    /// Whether the material was built for drawing in `pass`.
    pub fn supports_pass(&self, pass: ShaderPass) -> bool {
        self.material_shaders.contains(&pass)
    }

    pub fn samplers(&self) -> &BTreeMap<String, Arc<Texture>> {
        &self.samplers
    }

    pub fn has_property(&self, property: Property) -> bool {
        self.values.read().properties.contains_key(&property)
    }

    pub fn property(&self, property: Property) -> Option<PropertyValue> {
        self.values.read().properties.get(&property).cloned()
    }

    /// Property keys in define order.
    pub fn properties(&self) -> Vec<Property> {
        self.values.read().properties.keys().copied().collect()
    }

    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.values.read().uniforms.get(name).copied()
    }

    /// Custom uniforms sorted by name.
    pub fn uniforms(&self) -> Vec<(String, UniformValue)> {
        self.values
            .read()
            .uniforms
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect()
    }

    pub fn material_type(&self) -> MaterialType {
        let values = self.values.read();
        MaterialType {
            properties: values.properties.keys().copied().collect(),
            uniforms: values
                .uniforms
                .iter()
                .map(|(name, value)| (name.clone(), wgsl_type(value)))
                .collect(),
            samplers: self.samplers.keys().cloned().collect(),
            shading: self.shading,
            blending: self.blending,
            two_sided: self.two_sided,
        }
    }

    // ── Value edits ──────────────────────────────────────────────────────

    fn set_property(&self, property: Property, value: PropertyValue) -> Result<()> {
        let mut values = self.values.write();
        let slot = values.properties.get_mut(&property).ok_or_else(|| {
            Error::material(&self.name, format!("material has no {property:?} property"))
        })?;
        if slot.kind() != value.kind() {
            return Err(Error::material(
                &self.name,
                format!("{property:?} holds a {} value, not a {}", slot.kind(), value.kind()),
            ));
        }
        *slot = value;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    pub fn set_scalar(&self, property: Property, value: f32) -> Result<()> {
        self.set_property(property, PropertyValue::Scalar(value))
    }

    pub fn set_vec2(&self, property: Property, value: Vec2) -> Result<()> {
        self.set_property(property, PropertyValue::Vec2(value))
    }

    pub fn set_vector(&self, property: Property, value: Vec4) -> Result<()> {
        self.set_property(property, PropertyValue::Vec4(value))
    }

    /// Swap a texture binding. Texture changes do not touch the uniform buffer.
    pub fn set_texture(&self, property: Property, texture: Arc<Texture>) -> Result<()> {
        if property.kind() != PropertyKind::Texture {
            return Err(Error::material(&self.name, format!("{property:?} is not a texture property")));
        }
        self.set_property(property, PropertyValue::Texture(texture))
    }

    /// Change a custom uniform; its type is fixed at build time.
    pub fn set_uniform(&self, name: &str, value: impl Into<UniformValue>) -> Result<()> {
        let value = value.into();
        let mut values = self.values.write();
        let slot = values
            .uniforms
            .get_mut(name)
            .ok_or_else(|| Error::material(&self.name, format!("material has no uniform {name}")))?;
        if wgsl_type(slot) != wgsl_type(&value) {
            return Err(Error::material(
                &self.name,
                format!("uniform {name} is {}, not {}", wgsl_type(slot), wgsl_type(&value)),
            ));
        }
        *slot = value;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    // ── GPU side ─────────────────────────────────────────────────────────

    fn lookup(values: &MaterialValues, field: &str) -> Option<UniformValue> {
        values
            .properties
            .iter()
            .find(|(property, _)| property.uniform_name() == field)
            .and_then(|(_, value)| value.uniform())
            .or_else(|| values.uniforms.get(field).copied())
    }

    /// Create the uniform buffer on first use and rewrite it when values changed.
    /// Returns `None` when `program` declares no material block.
    pub fn upload(&self, device: &mut dyn RenderDevice, program: &Program) -> Result<Option<BufferId>> {
        let mut buffer = self.buffer.lock();
        if buffer.is_none() {
            let Some(layout) = program.reflection.block(MATERIAL_BLOCK) else {
                return Ok(None);
            };
            let id = device.create_buffer(&BufferDesc {
                label: format!("material {}", self.name),
                size: layout.size as u64,
                kind: BufferKind::Uniform,
            });
            log::debug!("Material {} uniform buffer: {} bytes", self.name, layout.size);
            *buffer = Some(MaterialBuffer {
                id,
                layout: layout.clone(),
            });
            self.dirty.store(true, Ordering::Release);
        }
        let Some(buffer) = buffer.as_ref() else {
            return Ok(None);
        };
        if self.dirty.swap(false, Ordering::AcqRel) {
            let values = self.values.read();
            let bytes = buffer.layout.pack(|field| Self::lookup(&values, field));
            device.write_buffer(buffer.id, 0, &bytes);
        }
        Ok(Some(buffer.id))
    }

    /// Uniform buffer (if created) and every texture the material samples.
    pub fn bind(&self, device: &mut dyn RenderDevice, program: &Program, bindings: &mut Bindings) -> Result<()> {
        if let Some(buffer) = self.upload(device, program)? {
            bindings.buffer(MATERIAL_BLOCK, buffer);
        }
        for (name, texture) in self.texture_bindings() {
            bindings.texture(name, texture.id);
        }
        Ok(())
    }

    /// Binding name → texture for property textures and custom samplers.
    pub fn texture_bindings(&self) -> Vec<(String, Arc<Texture>)> {
        let values = self.values.read();
        let mut textures: Vec<(String, Arc<Texture>)> = values
            .properties
            .iter()
            .filter_map(|(property, value)| {
                value
                    .texture()
                    .map(|texture| (property.uniform_name().to_string(), texture.clone()))
            })
            .collect();
        textures.extend(
            self.samplers
                .iter()
                .map(|(name, texture)| (name.clone(), texture.clone())),
        );
        textures
    }

    pub fn uniform_buffer(&self) -> Option<BufferId> {
        self.buffer.lock().as_ref().map(|buffer| buffer.id)
    }

    /// Release the uniform buffer; it is recreated on the next bind.
    pub fn release(&self, device: &mut dyn RenderDevice) {
        if let Some(buffer) = self.buffer.lock().take() {
            device.destroy_buffer(buffer.id);
        }
    }
}
