// src/shader/cache.rs
//! The shader variant cache.
//!
//! Maps a [`ProgramKey`] to a compiled [`Program`]. A key is compiled at
//! most once; later lookups return the same `Arc`. Identical preprocessed
//! sources reached through different keys (two materials of the same type,
//! or the depth and shadow passes of one material) share one device
//! program, found by an xxh3 fingerprint of both stages.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use xxhash_rust::xxh3::Xxh3;

use crate::error::{Error, Result};
use crate::gpu::{ProgramId, ProgramSource, RenderDevice};
use crate::materials::Material;

use super::compiler::ShaderCompiler;
use super::{ModelShader, Program, ProgramKey, ShaderPass};

#[derive(Default)]
struct CacheState {
    programs: HashMap<ProgramKey, Arc<Program>>,
    modules: HashMap<u64, ProgramId>,
    compilations: usize,
}

#[derive(Default)]
pub struct ShaderVariantCache {
    compiler: ShaderCompiler,
    state: Mutex<CacheState>,
}

impl ShaderVariantCache {
    pub fn new(compiler: ShaderCompiler) -> Self {
        Self {
            compiler,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn compiler(&self) -> &ShaderCompiler {
        &self.compiler
    }

    /// Program for `material` drawn as `model` in `pass`, compiling on a miss.
    pub fn get_or_compile(
        &self,
        device: &mut dyn RenderDevice,
        material: &Material,
        model: ModelShader,
        pass: ShaderPass,
    ) -> Result<Arc<Program>> {
        let key = ProgramKey::Material {
            shader_index: material.shader_index(),
            model,
            pass,
        };
        let mut state = self.state.lock();
        if let Some(program) = state.programs.get(&key) {
            log::trace!("Shader cache hit for {key}");
            return Ok(program.clone());
        }
        let source = self.compiler.material_source(material, model, pass)?;
        Self::insert(&mut state, device, key, material.name(), source)
    }

    /// Program for a library source compiled without material defines.
    pub fn get_or_compile_named(&self, device: &mut dyn RenderDevice, name: &str) -> Result<Arc<Program>> {
        let key = ProgramKey::Named(name.to_string());
        let mut state = self.state.lock();
        if let Some(program) = state.programs.get(&key) {
            return Ok(program.clone());
        }
        let source = self.compiler.named_source(name)?;
        Self::insert(&mut state, device, key, name, source)
    }

    fn insert(
        state: &mut CacheState,
        device: &mut dyn RenderDevice,
        key: ProgramKey,
        program_name: &str,
        source: ProgramSource,
    ) -> Result<Arc<Program>> {
        let mut hasher = Xxh3::new();
        hasher.update(source.vertex.as_bytes());
        hasher.update(&[0]);
        hasher.update(source.fragment.as_bytes());
        let fingerprint = hasher.digest();

        let id = match state.modules.get(&fingerprint) {
            Some(id) => {
                log::debug!("Program {key} reuses an identical compiled module");
                *id
            }
            None => {
                let id = device.compile_program(&source).map_err(|e| Error::ShaderCompile {
                    program: program_name.to_string(),
                    stage: e.stage,
                    message: e.message,
                })?;
                state.modules.insert(fingerprint, id);
                state.compilations += 1;
                log::info!("Compiled shader program {key} ({})", source.label);
                id
            }
        };

        let program = Arc::new(Program {
            key: key.clone(),
            id,
            reflection: source.reflection,
            fingerprint,
        });
        state.programs.insert(key, program.clone());
        Ok(program)
    }

    pub fn get(&self, key: &ProgramKey) -> Option<Arc<Program>> {
        self.state.lock().programs.get(key).cloned()
    }

    pub fn contains(&self, key: &ProgramKey) -> bool {
        self.state.lock().programs.contains_key(key)
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.state.lock().programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().programs.is_empty()
    }

    /// Number of times the device compiler was invoked.
    pub fn compilation_count(&self) -> usize {
        self.state.lock().compilations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Assets;
    use crate::config::RendererSettings;
    use crate::gpu::headless::HeadlessDevice;
    use crate::materials::{MaterialBuilder, Property};
    use glam::{UVec2, Vec4};

    fn setup() -> (HeadlessDevice, Assets) {
        (HeadlessDevice::new(UVec2::ONE), Assets::new(&RendererSettings::default()))
    }

    #[test]
    fn test_repeated_lookup_returns_same_program() {
        let (mut device, assets) = setup();
        let material = MaterialBuilder::new(&assets)
            .name("plain")
            .add(Property::Color, Vec4::ONE)
            .material_shaders([ShaderPass::Forward])
            .build(&mut device)
            .unwrap();
        let compiled = device.compile_count();

        let first = assets
            .shaders
            .get_or_compile(&mut device, &material, ModelShader::Plain, ShaderPass::Forward)
            .unwrap();
        let second = assets
            .shaders
            .get_or_compile(&mut device, &material, ModelShader::Plain, ShaderPass::Forward)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(device.compile_count(), compiled);
    }

    #[test]
    fn test_named_program_compiles_once() {
        let (mut device, assets) = setup();
        let fxaa = assets.shaders.get_or_compile_named(&mut device, "pipeline/fxaa").unwrap();
        let again = assets.shaders.get_or_compile_named(&mut device, "pipeline/fxaa").unwrap();
        assert!(Arc::ptr_eq(&fxaa, &again));
        assert_eq!(assets.shaders.compilation_count(), 1);
        assert!(assets.shaders.contains(&ProgramKey::Named("pipeline/fxaa".into())));
        assert_eq!(device.program_label(fxaa.id), Some("pipeline/fxaa"));
    }

    #[test]
    fn test_failed_compile_is_not_cached() {
        let (mut device, assets) = setup();
        device.fail_compilation_on("dof_depth");
        let err = assets.shaders.get_or_compile_named(&mut device, "pipeline/dof").unwrap_err();
        assert!(err.is_shader_compile());
        assert!(assets.shaders.is_empty());
    }
}
