// src/error.rs
//! Error handling for the entire crate.
//!
//! Every fallible engine entry point (asset loading, material builds, shader
//! compilation, registry access, configuration) returns [`Result`]. The
//! variants follow the engine's error taxonomy:
//!
//! - **Load**: malformed or unsupported input files. The whole load fails.
//! - **MaterialBuild / ShaderCompile**: fatal to the asset under construction.
//! - **Resource**: registry misuse, always carrying the resource name.

use std::fmt;
use thiserror::Error;

use crate::shader::ShaderStage;

/// Why a registry operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceErrorKind {
    AlreadyExists,
    NotFound,
}

impl fmt::Display for ResourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceErrorKind::AlreadyExists => f.write_str("already exists"),
            ResourceErrorKind::NotFound => f.write_str("no such resource"),
        }
    }
}

/// Main error type. `Send + Sync + 'static`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings files that fail to (de)serialize.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Image decoding failures from the texture loader.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// glTF container or buffer failures.
    #[error("glTF error: {0}")]
    Gltf(#[from] gltf::Error),

    /// Malformed or unsupported model/texture input.
    #[error("load error: {0}")]
    Load(String),

    /// A material could not be built.
    #[error("failed to build material {material}: {reason}")]
    MaterialBuild { material: String, reason: String },

    /// A shader stage failed to preprocess or compile.
    #[error("failed to compile {program} ({stage} stage): {message}")]
    ShaderCompile {
        program: String,
        stage: ShaderStage,
        message: String,
    },

    /// Registry insertion or lookup failure.
    #[error("{kind} resource {name}: {reason}")]
    Resource {
        kind: &'static str,
        name: String,
        reason: ResourceErrorKind,
    },

    /// The render device rejected an operation.
    #[error("device error: {0}")]
    Device(String),

    /// Simple custom message.
    #[error("{0}")]
    Custom(String),

    /// Context chaining.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a custom error message.
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    /// Create a formatted custom error (like `format!` but returns `Error`).
    #[inline]
    pub fn format(args: fmt::Arguments) -> Self {
        Self::Custom(fmt::format(args))
    }

    /// Add context to any error.
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    #[inline]
    pub fn load<S: Into<String>>(msg: S) -> Self {
        Self::Load(msg.into())
    }

    #[inline]
    pub fn material<M: Into<String>, R: Into<String>>(material: M, reason: R) -> Self {
        Self::MaterialBuild {
            material: material.into(),
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn already_exists<S: Into<String>>(kind: &'static str, name: S) -> Self {
        let name = name.into();
        Self::Resource {
            kind,
            reason: ResourceErrorKind::AlreadyExists,
            name,
        }
    }

    #[inline]
    pub fn not_found<S: Into<String>>(kind: &'static str, name: S) -> Self {
        Self::Resource {
            kind,
            name: name.into(),
            reason: ResourceErrorKind::NotFound,
        }
    }

    // === Kind checks. Context wrappers are looked through. ===

    /// The innermost error, skipping `WithContext` layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self.root(), Error::Io(_))
    }

    #[inline]
    pub fn is_load(&self) -> bool {
        matches!(self.root(), Error::Load(_) | Error::Gltf(_) | Error::Image(_))
    }

    #[inline]
    pub fn is_material_build(&self) -> bool {
        matches!(self.root(), Error::MaterialBuild { .. })
    }

    #[inline]
    pub fn is_shader_compile(&self) -> bool {
        matches!(self.root(), Error::ShaderCompile { .. })
    }

    #[inline]
    pub fn is_resource(&self) -> bool {
        matches!(self.root(), Error::Resource { .. })
    }

    #[inline]
    pub fn is_custom(&self) -> bool {
        matches!(self.root(), Error::Custom(_))
    }
}

/// Convenient `Result` alias: use `crate::Result<T>` everywhere.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_error_names_resource() {
        let err = Error::already_exists("material", "brick");
        assert_eq!(err.to_string(), "material resource brick: already exists");
        assert!(err.is_resource());
    }

    #[test]
    fn test_context_is_transparent_to_kind_checks() {
        let err = Error::load("no indices in model").context("loading crate.glb");
        assert!(err.is_load());
        assert!(!err.is_resource());
        assert_eq!(
            err.to_string(),
            "loading crate.glb: load error: no indices in model"
        );
    }

    #[test]
    fn test_shader_compile_names_stage() {
        let err = Error::ShaderCompile {
            program: "brick".into(),
            stage: ShaderStage::Fragment,
            message: "unknown identifier".into(),
        };
        assert!(err.to_string().contains("fragment stage"));
    }
}
