// src/shader/library.rs
//! Named WGSL sources embedded in the binary.

use std::collections::BTreeMap;

use super::preprocessor::IncludeResolver;

const BUILTIN_SOURCES: &[(&str, &str)] = &[
    ("material/prelude", include_str!("../shaders/material/prelude.wgsl")),
    ("material/forward", include_str!("../shaders/material/forward.wgsl")),
    ("material/deferred", include_str!("../shaders/material/deferred.wgsl")),
    ("material/depth", include_str!("../shaders/material/depth.wgsl")),
    ("material/color_picker", include_str!("../shaders/material/color_picker.wgsl")),
    ("material/text", include_str!("../shaders/material/text.wgsl")),
    ("lighting/lights", include_str!("../shaders/lighting/lights.wgsl")),
    ("pipeline/fullscreen", include_str!("../shaders/pipeline/fullscreen.wgsl")),
    ("pipeline/deferred_lighting", include_str!("../shaders/pipeline/deferred_lighting.wgsl")),
    ("pipeline/composite", include_str!("../shaders/pipeline/composite.wgsl")),
    ("pipeline/dof", include_str!("../shaders/pipeline/dof.wgsl")),
    ("pipeline/fxaa", include_str!("../shaders/pipeline/fxaa.wgsl")),
];

/// Source lookup for the compiler and for `#include` resolution.
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    sources: BTreeMap<String, String>,
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderLibrary {
    /// A library holding the engine's built-in sources.
    pub fn new() -> Self {
        let sources = BUILTIN_SOURCES
            .iter()
            .map(|(name, source)| (name.to_string(), source.to_string()))
            .collect();
        Self { sources }
    }

    /// Add or replace a source. Replacing only affects programs compiled afterwards.
    pub fn register(&mut self, name: impl Into<String>, source: impl Into<String>) {
        let name = name.into();
        if self.sources.insert(name.clone(), source.into()).is_some() {
            log::debug!("Replaced shader source {name}");
        }
    }

    pub fn source(&self, name: &str) -> Option<&str> {
        self.sources.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

impl IncludeResolver for ShaderLibrary {
    fn resolve(&self, name: &str) -> Option<&str> {
        self.source(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ShaderPass;

    #[test]
    fn test_every_pass_source_is_embedded() {
        let library = ShaderLibrary::new();
        for pass in ShaderPass::ALL {
            assert!(library.contains(pass.source_name()), "{pass:?}");
        }
        assert!(library.source("pipeline/fxaa").unwrap().contains("fs_main"));
    }

    #[test]
    fn test_register_overrides_source() {
        let mut library = ShaderLibrary::new();
        library.register("pipeline/fxaa", "// replaced");
        assert_eq!(library.resolve("pipeline/fxaa"), Some("// replaced"));
        library.register("user/extra", "fn extra() {}");
        assert!(library.names().any(|n| n == "user/extra"));
    }
}
