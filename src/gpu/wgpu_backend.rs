// src/gpu/wgpu_backend.rs
//! [`RenderDevice`] on top of wgpu 22.
//!
//! Passes are recorded lazily: `begin_pass` and `draw` resolve pipelines and
//! bind groups immediately (so binding errors surface at the call site) and
//! `end_pass` encodes the whole pass into the frame's command encoder.
//! `present` blits the chosen texture onto the surface and submits.
//!
//! Render pipelines are cached per program, blend mode, depth mode, cull mode
//! and attachment formats. Bind group layouts come from the program's
//! reflection; uniform blocks without an explicit buffer are packed from the
//! draw's [`UniformSet`](crate::gpu::UniformSet) into transient buffers.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use glam::UVec2;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::error::{Error, Result};
use crate::gpu::{
    BufferDesc, BufferId, BufferKind, Capability, DrawCall, Geometry, MeshData, MeshId, PassDesc, ProgramId,
    ProgramSource, RenderDevice, RenderState, ShaderError, TextureDesc, TextureFormat, TextureId, VertexBoneWeight,
    VertexNormalTangent,
};
use crate::materials::Blending;
use crate::shader::reflect::{BindingKind, ProgramReflection, ResourceBinding};
use crate::shader::ShaderStage;

const MESH_ATTRIBUTES: [wgpu::VertexAttribute; 4] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x3, 3 => Float32x2];
const SKIN_ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![4 => Uint32x4, 5 => Float32x4];

/// Smallest transient storage buffer; runtime-sized arrays must hold one element.
const MIN_STORAGE_SIZE: usize = 64;

const BLIT_SHADER: &str = r#"
struct BlitOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var blit_source: texture_2d<f32>;
@group(0) @binding(1) var blit_sampler: sampler;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> BlitOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: BlitOutput;
    out.clip_position = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(frag: BlitOutput) -> @location(0) vec4<f32> {
    return textureSample(blit_source, blit_sampler, frag.uv);
}
"#;

fn device_error(what: impl std::fmt::Display) -> Error {
    Error::Device(what.to_string())
}

// ----------------------------------------------------------------------------
// Conversions
// ----------------------------------------------------------------------------

fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn blend_state(blending: Blending) -> Option<wgpu::BlendState> {
    let additive = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::SrcAlpha,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    };
    let modulate = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Dst,
        dst_factor: wgpu::BlendFactor::Zero,
        operation: wgpu::BlendOperation::Add,
    };
    match blending {
        Blending::Opaque => None,
        Blending::Translucent => Some(wgpu::BlendState::ALPHA_BLENDING),
        Blending::Additive => Some(wgpu::BlendState {
            color: additive,
            alpha: additive,
        }),
        Blending::Modulate => Some(wgpu::BlendState {
            color: modulate,
            alpha: modulate,
        }),
        Blending::Text => Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
    }
}

fn visibility(binding: &ResourceBinding) -> wgpu::ShaderStages {
    match (binding.vertex, binding.fragment) {
        (true, false) => wgpu::ShaderStages::VERTEX,
        (false, true) => wgpu::ShaderStages::FRAGMENT,
        _ => wgpu::ShaderStages::VERTEX_FRAGMENT,
    }
}

fn binding_type(kind: &BindingKind) -> wgpu::BindingType {
    match kind {
        BindingKind::Uniform { .. } => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingKind::Storage { read_only } => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: *read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingKind::Texture => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        BindingKind::DepthTexture => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Depth,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        BindingKind::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        BindingKind::ComparisonSampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
    }
}

/// Zero-pad transient storage data to a legal binding size.
fn pad_storage(data: &[u8]) -> Vec<u8> {
    let len = data.len().max(MIN_STORAGE_SIZE).next_multiple_of(16);
    let mut padded = vec![0u8; len];
    padded[..data.len()].copy_from_slice(data);
    padded
}

// ----------------------------------------------------------------------------
// Resources
// ----------------------------------------------------------------------------

struct TextureEntry {
    desc: TextureDesc,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct BufferEntry {
    desc: BufferDesc,
    buffer: wgpu::Buffer,
}

struct MeshEntry {
    vertices: wgpu::Buffer,
    vertex_count: u32,
    indices: Option<(wgpu::Buffer, u32)>,
    bone_weights: Option<wgpu::Buffer>,
}

struct ProgramEntry {
    label: String,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    reflection: ProgramReflection,
    group_layouts: Vec<wgpu::BindGroupLayout>,
    layout: wgpu::PipelineLayout,
    skinned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DepthMode {
    Test { write: bool },
    Always,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    blending: Option<Blending>,
    depth: Option<(TextureFormat, DepthMode)>,
    colors: Vec<TextureFormat>,
    cull: bool,
    fullscreen: bool,
}

struct PreparedDraw {
    pipeline: usize,
    bind_groups: Vec<wgpu::BindGroup>,
    geometry: Geometry,
}

struct PendingPass {
    desc: PassDesc,
    colors: Vec<TextureFormat>,
    depth: Option<TextureFormat>,
    draws: Vec<PreparedDraw>,
}

struct Blit {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
}

impl Blit {
    fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(BLIT_SHADER)),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: binding_type(&BindingKind::Texture),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: binding_type(&BindingKind::Sampler),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: "vs_main",
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: "fs_main",
                compilation_options: Default::default(),
                targets: &[Some(format.into())],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        Self { layout, pipeline }
    }
}

struct SurfaceState {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    blit: Blit,
}

// ----------------------------------------------------------------------------
// Device
// ----------------------------------------------------------------------------

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<SurfaceState>,
    size: UVec2,

    textures: Vec<Option<TextureEntry>>,
    buffers: Vec<Option<BufferEntry>>,
    meshes: Vec<MeshEntry>,
    programs: Vec<ProgramEntry>,
    pipelines: Vec<wgpu::RenderPipeline>,
    pipeline_index: HashMap<PipelineKey, usize>,

    linear_sampler: wgpu::Sampler,
    comparison_sampler: wgpu::Sampler,
    state: RenderState,
    current: Option<PendingPass>,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuDevice {
    /// Device presenting to `window`.
    pub async fn new(window: Arc<Window>, vsync: bool) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone()).map_err(device_error)?;
        let (adapter, device, queue) = Self::request(&instance, Some(&surface)).await?;

        let size = window.inner_size();
        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| device_error("surface reports no formats"))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        let blit = Blit::new(&device, format);
        log::info!(
            "Surface configured: {}x{} {:?} (vsync {})",
            config.width,
            config.height,
            format,
            vsync
        );

        let mut this = Self::with_device(device, queue, UVec2::new(config.width, config.height));
        this.surface = Some(SurfaceState { surface, config, blit });
        Ok(this)
    }

    /// Device without a surface; `present` only submits.
    pub async fn offscreen(size: UVec2) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let (_, device, queue) = Self::request(&instance, None).await?;
        Ok(Self::with_device(device, queue, size.max(UVec2::ONE)))
    }

    async fn request(
        instance: &wgpu::Instance,
        surface: Option<&wgpu::Surface<'static>>,
    ) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| device_error("no suitable GPU adapter"))?;
        let info = adapter.get_info();
        log::info!("Using adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("lumen_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(device_error)?;
        device.on_uncaptured_error(Box::new(|error| log::error!("wgpu: {error}")));
        Ok((adapter, device, queue))
    }

    fn with_device(device: wgpu::Device, queue: wgpu::Queue, size: UVec2) -> Self {
        let sampler = |label, compare| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                compare,
                ..Default::default()
            })
        };
        let linear_sampler = sampler("linear", None);
        let comparison_sampler = sampler("comparison", Some(wgpu::CompareFunction::LessEqual));
        Self {
            device,
            queue,
            surface: None,
            size,
            textures: Vec::new(),
            buffers: Vec::new(),
            meshes: Vec::new(),
            programs: Vec::new(),
            pipelines: Vec::new(),
            pipeline_index: HashMap::new(),
            linear_sampler,
            comparison_sampler,
            state: RenderState::default(),
            current: None,
            encoder: None,
        }
    }

    /// Reconfigure the surface after the window was resized.
    pub fn resize(&mut self, size: UVec2) {
        if size.x == 0 || size.y == 0 {
            return;
        }
        self.size = size;
        if let Some(state) = self.surface.as_mut() {
            state.config.width = size.x;
            state.config.height = size.y;
            state.surface.configure(&self.device, &state.config);
        }
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    fn texture_entry(&self, texture: TextureId) -> Result<&TextureEntry> {
        self.textures
            .get(texture.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| device_error(format!("unknown or destroyed texture {texture:?}")))
    }

    fn buffer_entry(&self, buffer: BufferId) -> Result<&BufferEntry> {
        self.buffers
            .get(buffer.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| device_error(format!("unknown or destroyed buffer {buffer:?}")))
    }

    fn compile_stage(&self, label: &str, stage: ShaderStage, source: &str) -> std::result::Result<wgpu::ShaderModule, ShaderError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
        });
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(ShaderError {
                stage,
                message: error.to_string(),
            }),
            None => Ok(module),
        }
    }

    fn pipeline_key(&self, pass: &PendingPass, call: &DrawCall<'_>) -> PipelineKey {
        let state = self.state;
        let depth = pass.depth.map(|format| {
            let read_only = pass.desc.depth.as_ref().is_some_and(|d| d.read_only);
            let mode = if state.depth_test {
                DepthMode::Test {
                    write: state.depth_write && !read_only,
                }
            } else {
                DepthMode::Always
            };
            (format, mode)
        });
        PipelineKey {
            program: call.program,
            blending: state.blending.then_some(call.blending),
            depth,
            colors: pass.colors.clone(),
            cull: state.cull_face && !call.two_sided,
            fullscreen: matches!(call.geometry, Geometry::Fullscreen),
        }
    }

    fn pipeline(&mut self, key: PipelineKey) -> Result<usize> {
        if let Some(&index) = self.pipeline_index.get(&key) {
            return Ok(index);
        }
        let program = self
            .programs
            .get(key.program.0 as usize)
            .ok_or_else(|| device_error(format!("unknown program {:?}", key.program)))?;

        let mut vertex_buffers = Vec::new();
        if !key.fullscreen {
            vertex_buffers.push(wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<VertexNormalTangent>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &MESH_ATTRIBUTES,
            });
            if program.skinned {
                vertex_buffers.push(wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<VertexBoneWeight>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &SKIN_ATTRIBUTES,
                });
            }
        }
        let blend = key.blending.and_then(blend_state);
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .colors
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: texture_format(*format),
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        let depth_stencil = key.depth.map(|(format, mode)| {
            let (depth_write_enabled, depth_compare) = match mode {
                DepthMode::Test { write } => (write, wgpu::CompareFunction::LessEqual),
                DepthMode::Always => (false, wgpu::CompareFunction::Always),
            };
            wgpu::DepthStencilState {
                format: texture_format(format),
                depth_write_enabled,
                depth_compare,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }
        });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&program.label),
            layout: Some(&program.layout),
            vertex: wgpu::VertexState {
                module: &program.vertex,
                entry_point: "vs_main",
                compilation_options: Default::default(),
                buffers: &vertex_buffers,
            },
            fragment: Some(wgpu::FragmentState {
                module: &program.fragment,
                entry_point: "fs_main",
                compilation_options: Default::default(),
                targets: &targets,
            }),
            primitive: wgpu::PrimitiveState {
                cull_mode: key.cull.then_some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(device_error(format!("pipeline for {}: {error}", program.label)));
        }
        log::debug!("Created pipeline #{} for {}", self.pipelines.len(), program.label);

        let index = self.pipelines.len();
        self.pipelines.push(pipeline);
        self.pipeline_index.insert(key, index);
        Ok(index)
    }

    fn bind_groups(&self, program: &ProgramEntry, call: &DrawCall<'_>) -> Result<Vec<wgpu::BindGroup>> {
        enum Source {
            Transient(usize),
            Buffer(BufferId),
            Texture(TextureId),
            Sampler,
            Comparison,
        }

        let mut transient = Vec::new();
        let mut sources = Vec::with_capacity(program.reflection.bindings.len());
        for binding in &program.reflection.bindings {
            let missing = || device_error(format!("{}: {} is not bound", program.label, binding.name));
            let source = match &binding.kind {
                BindingKind::Uniform { .. } => match call.bindings.find_buffer(&binding.name) {
                    Some(buffer) => Source::Buffer(buffer),
                    None => {
                        let block = program.reflection.block(&binding.name).ok_or_else(missing)?;
                        let mut bytes = block.pack(|field| call.uniforms.get(field));
                        bytes.resize(bytes.len().next_multiple_of(16), 0);
                        transient.push(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some(&binding.name),
                            contents: &bytes,
                            usage: wgpu::BufferUsages::UNIFORM,
                        }));
                        Source::Transient(transient.len() - 1)
                    }
                },
                BindingKind::Storage { .. } => {
                    if let Some(buffer) = call.bindings.find_buffer(&binding.name) {
                        Source::Buffer(buffer)
                    } else {
                        let data = call.bindings.find_storage(&binding.name).ok_or_else(missing)?;
                        transient.push(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some(&binding.name),
                            contents: &pad_storage(data),
                            usage: wgpu::BufferUsages::STORAGE,
                        }));
                        Source::Transient(transient.len() - 1)
                    }
                }
                BindingKind::Texture | BindingKind::DepthTexture => {
                    Source::Texture(call.bindings.find_texture(&binding.name).ok_or_else(missing)?)
                }
                BindingKind::Sampler => Source::Sampler,
                BindingKind::ComparisonSampler => Source::Comparison,
            };
            sources.push(source);
        }

        let mut groups = Vec::with_capacity(program.group_layouts.len());
        for (group, layout) in program.group_layouts.iter().enumerate() {
            let mut entries = Vec::new();
            for (binding, source) in program.reflection.bindings.iter().zip(&sources) {
                if binding.group as usize != group {
                    continue;
                }
                let resource = match source {
                    Source::Transient(i) => transient[*i].as_entire_binding(),
                    Source::Buffer(id) => self.buffer_entry(*id)?.buffer.as_entire_binding(),
                    Source::Texture(id) => wgpu::BindingResource::TextureView(&self.texture_entry(*id)?.view),
                    Source::Sampler => wgpu::BindingResource::Sampler(&self.linear_sampler),
                    Source::Comparison => wgpu::BindingResource::Sampler(&self.comparison_sampler),
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: binding.binding,
                    resource,
                });
            }
            groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&program.label),
                layout,
                entries: &entries,
            }));
        }
        Ok(groups)
    }

    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        match self.encoder.take() {
            Some(encoder) => encoder,
            None => self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") }),
        }
    }

    fn encode_pass(&self, encoder: &mut wgpu::CommandEncoder, pass: &PendingPass) -> Result<()> {
        let mut color_views = Vec::with_capacity(pass.desc.colors.len());
        for color in &pass.desc.colors {
            color_views.push((&self.texture_entry(color.texture)?.view, color.clear));
        }
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = color_views
            .iter()
            .map(|(view, clear)| {
                let load = match clear {
                    Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                        r: *r as f64,
                        g: *g as f64,
                        b: *b as f64,
                        a: *a as f64,
                    }),
                    None => wgpu::LoadOp::Load,
                };
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_stencil_attachment = match &pass.desc.depth {
            Some(depth) => {
                let view = &self.texture_entry(depth.texture)?.view;
                let depth_ops = match (depth.clear, depth.read_only) {
                    (None, true) => None,
                    (clear, _) => Some(wgpu::Operations {
                        load: clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                        store: wgpu::StoreOp::Store,
                    }),
                };
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops,
                    stencil_ops: None,
                })
            }
            None => None,
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&pass.desc.label),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        for draw in &pass.draws {
            render_pass.set_pipeline(&self.pipelines[draw.pipeline]);
            for (index, group) in draw.bind_groups.iter().enumerate() {
                render_pass.set_bind_group(index as u32, group, &[]);
            }
            match draw.geometry {
                Geometry::Fullscreen => render_pass.draw(0..3, 0..1),
                Geometry::Mesh { mesh, instances } => {
                    let entry = self
                        .meshes
                        .get(mesh.0 as usize)
                        .ok_or_else(|| device_error(format!("unknown mesh {mesh:?}")))?;
                    render_pass.set_vertex_buffer(0, entry.vertices.slice(..));
                    if let Some(weights) = &entry.bone_weights {
                        render_pass.set_vertex_buffer(1, weights.slice(..));
                    }
                    match &entry.indices {
                        Some((indices, count)) => {
                            render_pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                            render_pass.draw_indexed(0..*count, 0, 0..instances);
                        }
                        None => render_pass.draw(0..entry.vertex_count, 0..instances),
                    }
                }
            }
        }
        Ok(())
    }

    fn blit_to_surface(&self, encoder: &mut wgpu::CommandEncoder, texture: TextureId) -> Result<Option<wgpu::SurfaceTexture>> {
        let Some(state) = self.surface.as_ref() else {
            return Ok(None);
        };
        let frame = match state.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("Surface lost or outdated, reconfiguring");
                state.surface.configure(&self.device, &state.config);
                return Ok(None);
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Timed out acquiring the next surface texture");
                return Ok(None);
            }
            Err(error) => return Err(device_error(format!("surface: {error}"))),
        };
        let source = &self.texture_entry(texture)?.view;
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit"),
            layout: &state.blit.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                },
            ],
        });
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&state.blit.pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
        Ok(Some(frame))
    }
}

impl RenderDevice for WgpuDevice {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn framebuffer_size(&self) -> UVec2 {
        self.size
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId {
        let mut usage =
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC;
        if desc.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let size = desc.size.max(UVec2::ONE);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = TextureId(self.textures.len() as u32);
        self.textures.push(Some(TextureEntry {
            desc: desc.clone(),
            texture,
            view,
        }));
        id
    }

    fn write_texture(&mut self, texture: TextureId, data: &[u8]) -> Result<()> {
        let entry = self.texture_entry(texture)?;
        let size = entry.desc.size;
        let bytes_per_row = size.x * entry.desc.format.bytes_per_pixel();
        let expected = bytes_per_row as usize * size.y as usize;
        if data.len() != expected {
            return Err(device_error(format!(
                "texture {}: expected {expected} bytes, got {}",
                entry.desc.label,
                data.len()
            )));
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(size.y),
            },
            wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(entry) = self.textures.get_mut(texture.0 as usize).and_then(Option::take) {
            entry.texture.destroy();
        }
    }

    fn texture_size(&self, texture: TextureId) -> Option<UVec2> {
        self.texture_entry(texture).ok().map(|e| e.desc.size)
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> BufferId {
        let usage = match desc.kind {
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM,
            BufferKind::Storage => wgpu::BufferUsages::STORAGE,
        } | wgpu::BufferUsages::COPY_DST;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: desc.size.max(MIN_STORAGE_SIZE as u64).next_multiple_of(16),
            usage,
            mapped_at_creation: false,
        });
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(Some(BufferEntry {
            desc: desc.clone(),
            buffer,
        }));
        id
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        let entry = match self.buffer_entry(buffer) {
            Ok(entry) => entry,
            Err(error) => {
                log::error!("write_buffer: {error}");
                return;
            }
        };
        if offset + data.len() as u64 > entry.buffer.size() {
            log::error!(
                "write_buffer: {} bytes at {offset} overflow {} ({} bytes)",
                data.len(),
                entry.desc.label,
                entry.buffer.size()
            );
            return;
        }
        self.queue.write_buffer(&entry.buffer, offset, data);
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(entry) = self.buffers.get_mut(buffer.0 as usize).and_then(Option::take) {
            entry.buffer.destroy();
        }
    }

    fn create_mesh(&mut self, label: &str, data: &MeshData) -> Result<MeshId> {
        if data.vertices.is_empty() {
            return Err(device_error(format!("mesh {label} has no vertices")));
        }
        let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&data.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = (!data.indices.is_empty()).then(|| {
            let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(&data.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
            (buffer, data.indices.len() as u32)
        });
        let bone_weights = data.bone_weights.as_ref().map(|weights| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(weights),
                usage: wgpu::BufferUsages::VERTEX,
            })
        });
        let id = MeshId(self.meshes.len() as u32);
        self.meshes.push(MeshEntry {
            vertices,
            vertex_count: data.vertices.len() as u32,
            indices,
            bone_weights,
        });
        Ok(id)
    }

    fn compile_program(&mut self, source: &ProgramSource) -> std::result::Result<ProgramId, ShaderError> {
        let vertex = self.compile_stage(&source.label, ShaderStage::Vertex, &source.vertex)?;
        let fragment = self.compile_stage(&source.label, ShaderStage::Fragment, &source.fragment)?;

        let reflection = source.reflection.clone();
        let group_count = reflection.max_group().map_or(0, |g| g as usize + 1);
        let group_layouts: Vec<wgpu::BindGroupLayout> = (0..group_count)
            .map(|group| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = reflection
                    .bindings
                    .iter()
                    .filter(|b| b.group as usize == group)
                    .map(|b| wgpu::BindGroupLayoutEntry {
                        binding: b.binding,
                        visibility: visibility(b),
                        ty: binding_type(&b.kind),
                        count: None,
                    })
                    .collect();
                self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&source.label),
                    entries: &entries,
                })
            })
            .collect();
        let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&source.label),
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });

        let id = ProgramId(self.programs.len() as u32);
        self.programs.push(ProgramEntry {
            label: source.label.clone(),
            vertex,
            fragment,
            skinned: reflection.binding("bones").is_some(),
            reflection,
            group_layouts,
            layout,
        });
        log::debug!("Compiled program {} as {:?}", source.label, id);
        Ok(id)
    }

    fn enable(&mut self, capability: Capability) {
        self.state.set(capability, true);
    }

    fn disable(&mut self, capability: Capability) {
        self.state.set(capability, false);
    }

    fn begin_pass(&mut self, pass: &PassDesc) -> Result<()> {
        if let Some(open) = &self.current {
            return Err(device_error(format!(
                "pass {} begun while {} is still open",
                pass.label, open.desc.label
            )));
        }
        let mut colors = Vec::with_capacity(pass.colors.len());
        for color in &pass.colors {
            colors.push(self.texture_entry(color.texture)?.desc.format);
        }
        let depth = match &pass.depth {
            Some(depth) => Some(self.texture_entry(depth.texture)?.desc.format),
            None => None,
        };
        if colors.is_empty() && depth.is_none() {
            return Err(device_error(format!("pass {} has no attachments", pass.label)));
        }
        self.current = Some(PendingPass {
            desc: pass.clone(),
            colors,
            depth,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()> {
        let pass = self
            .current
            .take()
            .ok_or_else(|| device_error("draw outside of a render pass"))?;
        let key = self.pipeline_key(&pass, call);
        let prepared = self.pipeline(key).and_then(|pipeline| {
            let program = &self.programs[call.program.0 as usize];
            if let Geometry::Mesh { mesh, .. } = call.geometry {
                let entry = self
                    .meshes
                    .get(mesh.0 as usize)
                    .ok_or_else(|| device_error(format!("unknown mesh {mesh:?}")))?;
                if program.skinned && entry.bone_weights.is_none() {
                    return Err(device_error(format!("{}: mesh {mesh:?} has no bone weights", program.label)));
                }
            }
            let bind_groups = self.bind_groups(program, call)?;
            Ok(PreparedDraw {
                pipeline,
                bind_groups,
                geometry: call.geometry,
            })
        });
        let mut pass = pass;
        let result = prepared.map(|draw| pass.draws.push(draw));
        self.current = Some(pass);
        result
    }

    fn end_pass(&mut self) -> Result<()> {
        let pass = self
            .current
            .take()
            .ok_or_else(|| device_error("end_pass without begin_pass"))?;
        let mut encoder = self.take_encoder();
        let result = self.encode_pass(&mut encoder, &pass);
        self.encoder = Some(encoder);
        result
    }

    fn present(&mut self, texture: TextureId) -> Result<()> {
        if let Some(open) = &self.current {
            return Err(device_error(format!("present while pass {} is open", open.desc.label)));
        }
        self.texture_entry(texture)?;
        let mut encoder = self.take_encoder();
        let frame = self.blit_to_surface(&mut encoder, texture);
        self.queue.submit(Some(encoder.finish()));
        if let Some(frame) = frame? {
            frame.present();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_disables_blending() {
        assert!(blend_state(Blending::Opaque).is_none());
        assert_eq!(blend_state(Blending::Translucent), Some(wgpu::BlendState::ALPHA_BLENDING));
        let additive = blend_state(Blending::Additive).unwrap();
        assert_eq!(additive.color.dst_factor, wgpu::BlendFactor::One);
    }

    #[test]
    fn test_storage_padding_keeps_data_and_aligns() {
        let padded = pad_storage(&[1, 2, 3]);
        assert_eq!(padded.len(), MIN_STORAGE_SIZE);
        assert_eq!(&padded[..3], &[1, 2, 3]);
        assert_eq!(pad_storage(&[0; 200]).len(), 208);
    }

    #[test]
    fn test_depth_textures_bind_as_depth_samples() {
        match binding_type(&BindingKind::DepthTexture) {
            wgpu::BindingType::Texture { sample_type, .. } => {
                assert_eq!(sample_type, wgpu::TextureSampleType::Depth)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(texture_format(TextureFormat::Rgba16Float), wgpu::TextureFormat::Rgba16Float);
    }

    #[test]
    fn test_visibility_follows_stage_usage() {
        let binding = ResourceBinding {
            group: 0,
            binding: 0,
            name: "per_draw".into(),
            kind: BindingKind::Uniform {
                type_name: "DrawUniforms".into(),
            },
            vertex: true,
            fragment: true,
        };
        assert_eq!(visibility(&binding), wgpu::ShaderStages::VERTEX_FRAGMENT);
        let fragment_only = ResourceBinding {
            vertex: false,
            ..binding
        };
        assert_eq!(visibility(&fragment_only), wgpu::ShaderStages::FRAGMENT);
    }
}
