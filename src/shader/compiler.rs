// src/shader/compiler.rs
//! Turns a variant key into preprocessed, reflected WGSL.
//!
//! Each program is preprocessed twice, once per stage, with the stage define
//! set. A failure names the program and the stage it happened in.

use crate::error::{Error, Result};
use crate::gpu::ProgramSource;
use crate::materials::{definer, Material};

use super::library::ShaderLibrary;
use super::preprocessor::{preprocess, Defines};
use super::reflect::{reflect, ProgramReflection};
use super::{ModelShader, ShaderPass, ShaderStage};

#[derive(Debug, Clone, Default)]
pub struct ShaderCompiler {
    library: ShaderLibrary,
}

impl ShaderCompiler {
    pub fn new(library: ShaderLibrary) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &ShaderLibrary {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut ShaderLibrary {
        &mut self.library
    }

    /// Source for one (material, model, pass) variant.
    pub fn material_source(
        &self,
        material: &Material,
        model: ModelShader,
        pass: ShaderPass,
    ) -> Result<ProgramSource> {
        let mut defines = definer::define(material, model);
        defines.define(pass.define());
        let label = format!("{}/{:?}/{:?}", material.name(), model, pass);
        self.build(label, material.name(), pass.source_name(), &defines)
    }

    /// Source for a library program compiled without material defines,
    /// e.g. `pipeline/fxaa`.
    pub fn named_source(&self, name: &str) -> Result<ProgramSource> {
        self.build(name.to_string(), name, name, &Defines::new())
    }

    fn build(
        &self,
        label: String,
        program: &str,
        source_name: &str,
        defines: &Defines,
    ) -> Result<ProgramSource> {
        let source = self.library.source(source_name).ok_or_else(|| Error::ShaderCompile {
            program: program.to_string(),
            stage: ShaderStage::Vertex,
            message: format!("no shader source named \"{source_name}\""),
        })?;

        let (vertex, vertex_reflection) = self.stage(program, source, defines, ShaderStage::Vertex)?;
        let (fragment, fragment_reflection) =
            self.stage(program, source, defines, ShaderStage::Fragment)?;

        Ok(ProgramSource {
            label,
            vertex,
            fragment,
            reflection: vertex_reflection.merge(fragment_reflection),
        })
    }

    fn stage(
        &self,
        program: &str,
        source: &str,
        defines: &Defines,
        stage: ShaderStage,
    ) -> Result<(String, ProgramReflection)> {
        let fail = |message: String| Error::ShaderCompile {
            program: program.to_string(),
            stage,
            message,
        };
        let mut stage_defines = defines.clone();
        stage_defines.define(stage.define());
        let text = preprocess(source, &stage_defines, &self.library).map_err(|e| fail(e.to_string()))?;
        let reflection = reflect(&text, stage).map_err(|e| fail(e.to_string()))?;
        Ok((text, reflection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::reflect::BindingKind;

    #[test]
    fn test_named_program_stages_are_split() {
        let compiler = ShaderCompiler::default();
        let source = compiler.named_source("pipeline/fxaa").unwrap();
        assert!(source.vertex.contains("fn vs_main"));
        assert!(!source.vertex.contains("fn fs_main"));
        assert!(source.fragment.contains("fn fs_main"));
        assert!(!source.fragment.contains("fn vs_main"));
        assert!(!source.vertex.lines().any(|l| l.trim_start().starts_with('#')));

        let params = source.reflection.block("params").unwrap();
        assert_eq!(params.size, 16);
        assert_eq!(
            source.reflection.binding("fxaa_color").unwrap().kind,
            BindingKind::Texture
        );
    }

    #[test]
    fn test_deferred_lighting_reflects_light_arrays() {
        let compiler = ShaderCompiler::default();
        let source = compiler.named_source("pipeline/deferred_lighting").unwrap();
        let reflection = &source.reflection;
        assert!(reflection.block("lighting").is_some());
        assert_eq!(reflection.binding("point_lights").unwrap().group, 2);
        assert_eq!(
            reflection.binding("gbuffer_depth").unwrap().kind,
            BindingKind::DepthTexture
        );
    }

    #[test]
    fn test_missing_source_names_program() {
        let compiler = ShaderCompiler::default();
        let err = compiler.named_source("pipeline/bloom").unwrap_err();
        assert!(err.is_shader_compile());
        assert!(err.to_string().contains("pipeline/bloom"));
    }

    #[test]
    fn test_preprocess_failure_names_stage() {
        let mut library = ShaderLibrary::new();
        library.register(
            "broken",
            "#ifdef ENGINE_FRAGMENT_STAGE\n#include \"nowhere\"\n#endif\n",
        );
        let compiler = ShaderCompiler::new(library);
        match compiler.named_source("broken").unwrap_err() {
            Error::ShaderCompile { program, stage, message } => {
                assert_eq!(program, "broken");
                // Includes are expanded before conditionals, so the vertex stage fails first.
                assert_eq!(stage, ShaderStage::Vertex);
                assert!(message.contains("nowhere"));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
