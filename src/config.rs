// src/config.rs
//! Renderer settings, loadable from JSON.
//!
//! Every field has a default, so a settings file only needs to name what it
//! changes:
//!
//! ```json
//! { "pipeline": "forward", "fxaa": false, "window": { "width": 1280 } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::shader::ShaderPass;

/// Which pass chain the renderer builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Forward,
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthOfFieldSettings {
    pub enabled: bool,
    /// Focus point in normalized screen coordinates.
    pub focus: [f32; 2],
    /// Near/far falloff distances in normalized depth.
    pub distance: [f32; 2],
    pub blur: f32,
}

impl Default for DepthOfFieldSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            focus: [0.7, 0.5],
            distance: [0.3, 0.55],
            blur: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title: "Lumen Engine".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    pub pipeline: PipelineKind,
    pub fxaa: bool,
    pub depth_of_field: DepthOfFieldSettings,
    /// Exposure applied by the composite tone-mapper.
    pub exposure: f32,
    pub clear_color: [f32; 4],
    /// Initial capacity of each light container.
    pub light_reserve: usize,
    pub window: WindowSettings,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            pipeline: PipelineKind::Deferred,
            fxaa: true,
            depth_of_field: DepthOfFieldSettings::default(),
            exposure: 1.0,
            clear_color: [0.08, 0.12, 0.18, 1.0],
            light_reserve: 16,
            window: WindowSettings::default(),
        }
    }
}

impl RendererSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let settings = Self::from_json_str(&text)?;
        log::info!("Loaded renderer settings from {}", path.as_ref().display());
        Ok(settings)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Passes every material is compiled for unless its builder says otherwise.
    pub fn default_material_passes(&self) -> Vec<ShaderPass> {
        match self.pipeline {
            PipelineKind::Deferred => vec![ShaderPass::Depth, ShaderPass::Deferred, ShaderPass::Forward],
            PipelineKind::Forward => vec![ShaderPass::Depth, ShaderPass::Forward],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings =
            RendererSettings::from_json_str(r#"{ "pipeline": "forward", "window": { "width": 800 } }"#)
                .unwrap();
        assert_eq!(settings.pipeline, PipelineKind::Forward);
        assert_eq!(settings.window.width, 800);
        assert_eq!(settings.window.height, 720);
        assert!(settings.fxaa);
        assert_eq!(settings.depth_of_field.focus, [0.7, 0.5]);
    }

    #[test]
    fn test_round_trip_through_json() {
        let mut settings = RendererSettings::default();
        settings.depth_of_field.enabled = true;
        settings.exposure = 1.5;
        let text = settings.to_json_string().unwrap();
        assert_eq!(RendererSettings::from_json_str(&text).unwrap(), settings);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = RendererSettings::from_json_str("{ pipeline: ").unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));
    }

    #[test]
    fn test_forward_pipeline_skips_deferred_pass() {
        let settings = RendererSettings {
            pipeline: PipelineKind::Forward,
            ..Default::default()
        };
        assert!(!settings.default_material_passes().contains(&ShaderPass::Deferred));
    }
}
