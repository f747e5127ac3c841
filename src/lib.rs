// src/lib.rs
//! Lumen: a real-time 3D rendering engine.
//!
//! Materials compile into shader variants on demand ([`shader::ShaderVariantCache`]),
//! instances of loaded models are bucketed and drawn by a configurable chain
//! of render passes ([`pipeline::Pipeline`]), and particle effects
//! ([`fx`]) are simulated on the CPU and drawn in instanced batches. All GPU
//! work goes through the [`gpu::RenderDevice`] seam, implemented by wgpu for
//! real windows and by a recording device for tests.

#[cfg(not(target_arch = "wasm32"))]
pub mod app;
pub mod asset;
pub mod camera;
pub mod config;
pub mod context;
pub mod error;
pub mod fx;
pub mod gltf_loader;
pub mod gpu;
pub mod instances;
pub mod lighting;
pub mod materials;
pub mod model;
pub mod pipeline;
pub mod renderer;
pub mod resource_manager;
pub mod scene;
pub mod shader;
pub mod texture;

pub use error::{Error, Result};

/// Install the `env_logger` backend. `RUST_LOG` overrides the default level.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging() {
    use log::LevelFilter;

    let _ = env_logger::Builder::new()
        .filter_level(if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .filter_module("wgpu_core", LevelFilter::Warn)
        .filter_module("wgpu_hal", LevelFilter::Warn)
        .filter_module("naga", LevelFilter::Warn)
        .format_timestamp_millis()
        .format_target(false)
        .parse_default_env()
        .try_init();
}
