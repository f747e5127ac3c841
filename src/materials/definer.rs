// src/materials/definer.rs
//! Material → preprocessor defines.

use crate::shader::{Defines, ModelShader};

use super::material::{wgsl_type, Material};

pub const VERTEX_SNIPPET: &str = "ENGINE_MATERIAL_VERTEX_SNIPPET";
pub const FRAGMENT_SNIPPET: &str = "ENGINE_MATERIAL_FRAGMENT_SNIPPET";
pub const GLOBAL_DEFINITIONS: &str = "ENGINE_MATERIAL_GLOBAL_DEFINITIONS";
pub const CUSTOM_SCALARS: &str = "ENGINE_MATERIAL_CUSTOM_SCALARS";
pub const CUSTOM_SAMPLERS: &str = "ENGINE_MATERIAL_CUSTOM_SAMPLERS";

/// First binding slot of custom samplers in the material group.
pub const CUSTOM_SAMPLER_BINDING: u32 = 16;

/// One define per property, one for shading, one for the model topology,
/// plus the snippet placeholders (always defined, possibly empty).
pub fn define(material: &Material, model: ModelShader) -> Defines {
    let mut defines = Defines::new();
    for property in material.properties() {
        defines.define(property.define());
    }
    defines.define(material.shading().define());
    defines.define(model.define());

    let snippets = material.snippets();
    defines.define_value(VERTEX_SNIPPET, snippets.vertex.clone());
    defines.define_value(FRAGMENT_SNIPPET, snippets.fragment.clone());
    defines.define_value(GLOBAL_DEFINITIONS, snippets.global.clone());
    defines.define_value(CUSTOM_SCALARS, custom_scalars(material));
    defines.define_value(CUSTOM_SAMPLERS, custom_samplers(material));
    defines
}

fn custom_scalars(material: &Material) -> String {
    material
        .uniforms()
        .iter()
        .map(|(name, value)| format!("{name}: {},", wgsl_type(value)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn custom_samplers(material: &Material) -> String {
    material
        .samplers()
        .keys()
        .enumerate()
        .map(|(i, name)| {
            format!(
                "@group(1) @binding({}) var {name}: texture_2d<f32>;",
                CUSTOM_SAMPLER_BINDING + i as u32
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}
