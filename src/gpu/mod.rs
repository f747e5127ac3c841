// src/gpu/mod.rs
//! The render-device seam.
//!
//! Everything above this module talks to the GPU through [`RenderDevice`]:
//! opaque handles for textures, buffers, meshes and programs, capability
//! toggles, render passes and draws. Two implementations ship with the
//! engine:
//!
//! - [`wgpu_backend::WgpuDevice`]: the real renderer (wgpu 22).
//! - [`headless::HeadlessDevice`]: records every call; used by tests and
//!   offline tooling.
//!
//! Programs are compiled from preprocessed WGSL plus the reflection computed
//! by [`crate::shader::reflect`]. Draws bind resources *by name*: uniform
//! blocks, storage buffers and textures declared by the program are matched
//! against the names supplied in [`Bindings`] and [`UniformSet`].

pub mod headless;
#[cfg(not(target_arch = "wasm32"))]
pub mod wgpu_backend;

use std::collections::BTreeMap;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec2, Vec3, Vec4};

use crate::error::Result;
use crate::materials::Blending;
use crate::shader::reflect::ProgramReflection;
use crate::shader::ShaderStage;

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

macro_rules! handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

handle!(TextureId);
handle!(BufferId);
handle!(MeshId);
handle!(ProgramId);

// ----------------------------------------------------------------------------
// Descriptors
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    Rgba8Srgb,
    Rgba16Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8 | TextureFormat::Rgba8Srgb | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub label: String,
    pub size: UVec2,
    pub format: TextureFormat,
    /// Usable as a render-pass attachment.
    pub render_target: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Uniform,
    Storage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub kind: BufferKind,
}

/// Device-independent toggles mirrored from the classic GL state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    DepthTest,
    DepthWrite,
    Blending,
    ProgramPointSize,
    CullFace,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub blending: bool,
    pub program_point_size: bool,
    pub cull_face: bool,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            blending: false,
            program_point_size: false,
            cull_face: true,
        }
    }
}

impl RenderState {
    pub fn set(&mut self, capability: Capability, enabled: bool) {
        match capability {
            Capability::DepthTest => self.depth_test = enabled,
            Capability::DepthWrite => self.depth_write = enabled,
            Capability::Blending => self.blending = enabled,
            Capability::ProgramPointSize => self.program_point_size = enabled,
            Capability::CullFace => self.cull_face = enabled,
        }
    }
}

// ----------------------------------------------------------------------------
// Geometry
// ----------------------------------------------------------------------------

/// Interleaved vertex shared by every mesh.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct VertexNormalTangent {
    pub position: Vec3,
    pub normal: Vec3,
    pub tangent: Vec3,
    pub uv: Vec2,
}

/// Skinning data, uploaded as a second vertex stream.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct VertexBoneWeight {
    pub joints: [u32; 4],
    pub weights: [f32; 4],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<VertexNormalTangent>,
    pub indices: Vec<u32>,
    pub bone_weights: Option<Vec<VertexBoneWeight>>,
}

impl MeshData {
    pub fn is_skinned(&self) -> bool {
        self.bone_weights.is_some()
    }
}

/// What a draw call rasterizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Geometry {
    Mesh { mesh: MeshId, instances: u32 },
    /// One full-screen triangle generated in the vertex stage.
    Fullscreen,
}

// ----------------------------------------------------------------------------
// Programs
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProgramSource {
    pub label: String,
    pub vertex: String,
    pub fragment: String,
    pub reflection: ProgramReflection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderError {
    pub stage: ShaderStage,
    pub message: String,
}

// ----------------------------------------------------------------------------
// Per-draw values
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        UniformValue::UInt(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        UniformValue::Mat4(v)
    }
}

/// Name → value bag that fills every uniform block a draw does not bind
/// to an explicit buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformSet {
    values: BTreeMap<String, UniformValue>,
}

impl UniformSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<UniformValue> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Named buffers, transient storage data and textures for one draw.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    pub buffers: Vec<(String, BufferId)>,
    pub storage: Vec<(String, Vec<u8>)>,
    pub textures: Vec<(String, TextureId)>,
}

impl Bindings {
    pub fn buffer(&mut self, name: impl Into<String>, buffer: BufferId) -> &mut Self {
        self.buffers.push((name.into(), buffer));
        self
    }

    pub fn storage(&mut self, name: impl Into<String>, data: Vec<u8>) -> &mut Self {
        self.storage.push((name.into(), data));
        self
    }

    pub fn texture(&mut self, name: impl Into<String>, texture: TextureId) -> &mut Self {
        self.textures.push((name.into(), texture));
        self
    }

    pub fn find_buffer(&self, name: &str) -> Option<BufferId> {
        self.buffers.iter().find(|(n, _)| n == name).map(|(_, b)| *b)
    }

    pub fn find_storage(&self, name: &str) -> Option<&[u8]> {
        self.storage
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_slice())
    }

    pub fn find_texture(&self, name: &str) -> Option<TextureId> {
        self.textures.iter().find(|(n, _)| n == name).map(|(_, t)| *t)
    }
}

pub struct DrawCall<'a> {
    pub program: ProgramId,
    pub geometry: Geometry,
    pub uniforms: &'a UniformSet,
    pub bindings: &'a Bindings,
    pub blending: Blending,
    pub two_sided: bool,
}

// ----------------------------------------------------------------------------
// Passes
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ColorTarget {
    pub texture: TextureId,
    /// `Some` clears to this color, `None` keeps the previous contents.
    pub clear: Option<[f32; 4]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepthTarget {
    pub texture: TextureId,
    pub clear: Option<f32>,
    /// Bound for testing only; the pass never writes it.
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassDesc {
    pub label: String,
    pub colors: Vec<ColorTarget>,
    pub depth: Option<DepthTarget>,
}

// ----------------------------------------------------------------------------
// The device
// ----------------------------------------------------------------------------

pub trait RenderDevice {
    fn backend_name(&self) -> &'static str;

    /// Current size of the presentation surface.
    fn framebuffer_size(&self) -> UVec2;

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId;
    fn write_texture(&mut self, texture: TextureId, data: &[u8]) -> Result<()>;
    fn destroy_texture(&mut self, texture: TextureId);
    /// `None` once the texture has been destroyed.
    fn texture_size(&self, texture: TextureId) -> Option<UVec2>;

    fn create_buffer(&mut self, desc: &BufferDesc) -> BufferId;
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]);
    fn destroy_buffer(&mut self, buffer: BufferId);

    fn create_mesh(&mut self, label: &str, data: &MeshData) -> Result<MeshId>;

    fn compile_program(&mut self, source: &ProgramSource) -> std::result::Result<ProgramId, ShaderError>;

    fn enable(&mut self, capability: Capability);
    fn disable(&mut self, capability: Capability);

    fn begin_pass(&mut self, pass: &PassDesc) -> Result<()>;
    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()>;
    fn end_pass(&mut self) -> Result<()>;

    /// Show `texture` on screen and finish the frame.
    fn present(&mut self, texture: TextureId) -> Result<()>;
}
