// src/gpu/headless.rs
//! A recording, validating [`RenderDevice`] with no GPU behind it.
//!
//! Every resource lives in CPU memory and every pass and draw is recorded
//! per frame, so tests can assert on what the pipeline would have asked a
//! real GPU to do. Misuse a real backend would reject (nested passes,
//! mismatched attachment sizes, sampling a destroyed texture or the pass's
//! own attachment, unprocessed `#` directives in shader text) is reported as
//! `Error::Device`.

use glam::UVec2;

use crate::error::{Error, Result};
use crate::materials::Blending;
use crate::shader::ShaderStage;

use super::{
    BufferDesc, BufferId, Capability, ColorTarget, DepthTarget, DrawCall, Geometry, MeshData,
    MeshId, PassDesc, ProgramId, ProgramSource, RenderDevice, RenderState, ShaderError,
    TextureDesc, TextureId, UniformSet,
};

#[derive(Debug)]
struct TextureRecord {
    desc: TextureDesc,
    data: Option<Vec<u8>>,
    alive: bool,
    /// Cleared, uploaded or drawn into at least once.
    defined: bool,
}

#[derive(Debug)]
struct BufferRecord {
    desc: BufferDesc,
    data: Vec<u8>,
    writes: usize,
    alive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshRecord {
    pub label: String,
    pub vertex_count: usize,
    pub index_count: usize,
    pub skinned: bool,
}

#[derive(Debug, Clone)]
struct ProgramRecord {
    label: String,
}

/// One recorded draw.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub program: ProgramId,
    pub program_label: String,
    pub geometry: Geometry,
    pub blending: Blending,
    pub two_sided: bool,
    pub state: RenderState,
    pub uniforms: UniformSet,
    pub buffers: Vec<(String, BufferId)>,
    /// Name and byte length of each transient storage binding.
    pub storage: Vec<(String, usize)>,
    pub textures: Vec<(String, TextureId)>,
}

/// One recorded render pass.
#[derive(Debug, Clone)]
pub struct PassRecord {
    pub label: String,
    pub colors: Vec<ColorTarget>,
    pub depth: Option<DepthTarget>,
    pub size: UVec2,
    pub draws: Vec<DrawRecord>,
}

impl PassRecord {
    pub fn attachments(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.colors
            .iter()
            .map(|c| c.texture)
            .chain(self.depth.iter().map(|d| d.texture))
    }
}

#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub passes: Vec<PassRecord>,
    pub presented: TextureId,
}

impl FrameRecord {
    pub fn pass(&self, label: &str) -> Option<&PassRecord> {
        self.passes.iter().find(|p| p.label == label)
    }

    pub fn pass_labels(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.label.as_str()).collect()
    }

    pub fn draw_count(&self) -> usize {
        self.passes.iter().map(|p| p.draws.len()).sum()
    }
}

pub struct HeadlessDevice {
    size: UVec2,
    textures: Vec<TextureRecord>,
    buffers: Vec<BufferRecord>,
    meshes: Vec<MeshRecord>,
    programs: Vec<ProgramRecord>,
    compile_count: usize,
    fail_patterns: Vec<String>,
    state: RenderState,
    current_pass: Option<PassRecord>,
    pending_passes: Vec<PassRecord>,
    frames: Vec<FrameRecord>,
}

impl HeadlessDevice {
    pub fn new(size: UVec2) -> Self {
        Self {
            size,
            textures: Vec::new(),
            buffers: Vec::new(),
            meshes: Vec::new(),
            programs: Vec::new(),
            compile_count: 0,
            fail_patterns: Vec::new(),
            state: RenderState::default(),
            current_pass: None,
            pending_passes: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Simulate a window resize.
    pub fn set_framebuffer_size(&mut self, size: UVec2) {
        self.size = size;
    }

    /// Make compilation fail for any stage whose text contains `pattern`.
    pub fn fail_compilation_on(&mut self, pattern: impl Into<String>) {
        self.fail_patterns.push(pattern.into());
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub fn compile_count(&self) -> usize {
        self.compile_count
    }

    pub fn program_label(&self, program: ProgramId) -> Option<&str> {
        self.programs.get(program.0 as usize).map(|p| p.label.as_str())
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc> {
        self.textures.get(texture.0 as usize).map(|t| &t.desc)
    }

    pub fn texture_alive(&self, texture: TextureId) -> bool {
        self.texture(texture).is_some()
    }

    pub fn texture_defined(&self, texture: TextureId) -> bool {
        self.texture(texture).map_or(false, |t| t.defined)
    }

    pub fn texture_data(&self, texture: TextureId) -> Option<&[u8]> {
        self.texture(texture).and_then(|t| t.data.as_deref())
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.iter().filter(|t| t.alive).count()
    }

    pub fn buffer_data(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffer(buffer).map(|b| b.data.as_slice())
    }

    pub fn buffer_write_count(&self, buffer: BufferId) -> usize {
        self.buffer(buffer).map_or(0, |b| b.writes)
    }

    pub fn buffer_desc(&self, buffer: BufferId) -> Option<&BufferDesc> {
        self.buffer(buffer).map(|b| &b.desc)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.iter().filter(|b| b.alive).count()
    }

    pub fn meshes(&self) -> &[MeshRecord] {
        &self.meshes
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&FrameRecord> {
        self.frames.last()
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn texture(&self, texture: TextureId) -> Option<&TextureRecord> {
        self.textures.get(texture.0 as usize).filter(|t| t.alive)
    }

    fn buffer(&self, buffer: BufferId) -> Option<&BufferRecord> {
        self.buffers.get(buffer.0 as usize).filter(|b| b.alive)
    }

    fn attachment(&self, texture: TextureId, pass: &str) -> Result<&TextureRecord> {
        let record = self
            .texture(texture)
            .ok_or_else(|| Error::Device(format!("pass {pass}: attachment {texture:?} was destroyed")))?;
        if !record.desc.render_target {
            return Err(Error::Device(format!(
                "pass {pass}: texture {} is not a render target",
                record.desc.label
            )));
        }
        Ok(record)
    }

    fn check_stage(&self, stage: ShaderStage, text: &str, entry: &str) -> std::result::Result<(), ShaderError> {
        let fail = |message: String| ShaderError { stage, message };
        if let Some(line) = text.lines().find(|l| l.trim_start().starts_with('#')) {
            return Err(fail(format!("unprocessed directive: {}", line.trim())));
        }
        if !text.contains(&format!("fn {entry}(")) {
            return Err(fail(format!("missing entry point {entry}")));
        }
        if let Some(pattern) = self.fail_patterns.iter().find(|p| text.contains(p.as_str())) {
            return Err(fail(format!("rejected source containing {pattern:?}")));
        }
        Ok(())
    }
}

impl RenderDevice for HeadlessDevice {
    fn backend_name(&self) -> &'static str {
        "headless"
    }

    fn framebuffer_size(&self) -> UVec2 {
        self.size
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId {
        self.textures.push(TextureRecord {
            desc: desc.clone(),
            data: None,
            alive: true,
            defined: false,
        });
        TextureId(self.textures.len() as u32 - 1)
    }

    fn write_texture(&mut self, texture: TextureId, data: &[u8]) -> Result<()> {
        let record = self
            .textures
            .get_mut(texture.0 as usize)
            .filter(|t| t.alive)
            .ok_or_else(|| Error::Device(format!("write to destroyed texture {texture:?}")))?;
        let expected = (record.desc.size.x * record.desc.size.y * record.desc.format.bytes_per_pixel()) as usize;
        if data.len() != expected {
            return Err(Error::Device(format!(
                "texture {}: expected {expected} bytes, got {}",
                record.desc.label,
                data.len()
            )));
        }
        record.data = Some(data.to_vec());
        record.defined = true;
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(record) = self.textures.get_mut(texture.0 as usize) {
            record.alive = false;
            record.data = None;
        }
    }

    fn texture_size(&self, texture: TextureId) -> Option<UVec2> {
        self.texture(texture).map(|t| t.desc.size)
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> BufferId {
        self.buffers.push(BufferRecord {
            desc: desc.clone(),
            data: vec![0; desc.size as usize],
            writes: 0,
            alive: true,
        });
        BufferId(self.buffers.len() as u32 - 1)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        let Some(record) = self.buffers.get_mut(buffer.0 as usize).filter(|b| b.alive) else {
            log::warn!("write to destroyed buffer {buffer:?} ignored");
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > record.data.len() {
            record.data.resize(end, 0);
        }
        record.data[start..end].copy_from_slice(data);
        record.writes += 1;
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(record) = self.buffers.get_mut(buffer.0 as usize) {
            record.alive = false;
        }
    }

    fn create_mesh(&mut self, label: &str, data: &MeshData) -> Result<MeshId> {
        let vertex_count = data.vertices.len();
        if let Some(index) = data.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(Error::Device(format!(
                "mesh {label}: index {index} out of range for {vertex_count} vertices"
            )));
        }
        if let Some(weights) = &data.bone_weights {
            if weights.len() != vertex_count {
                return Err(Error::Device(format!(
                    "mesh {label}: {} bone weights for {vertex_count} vertices",
                    weights.len()
                )));
            }
        }
        self.meshes.push(MeshRecord {
            label: label.to_string(),
            vertex_count,
            index_count: data.indices.len(),
            skinned: data.is_skinned(),
        });
        Ok(MeshId(self.meshes.len() as u32 - 1))
    }

    fn compile_program(&mut self, source: &ProgramSource) -> std::result::Result<ProgramId, ShaderError> {
        self.check_stage(ShaderStage::Vertex, &source.vertex, "vs_main")?;
        self.check_stage(ShaderStage::Fragment, &source.fragment, "fs_main")?;
        self.compile_count += 1;
        self.programs.push(ProgramRecord {
            label: source.label.clone(),
        });
        Ok(ProgramId(self.programs.len() as u32 - 1))
    }

    fn enable(&mut self, capability: Capability) {
        self.state.set(capability, true);
    }

    fn disable(&mut self, capability: Capability) {
        self.state.set(capability, false);
    }

    fn begin_pass(&mut self, pass: &PassDesc) -> Result<()> {
        if let Some(open) = &self.current_pass {
            return Err(Error::Device(format!(
                "pass {} begun while {} is still open",
                pass.label, open.label
            )));
        }
        let mut size = None;
        for color in &pass.colors {
            let record = self.attachment(color.texture, &pass.label)?;
            if record.desc.format.is_depth() {
                return Err(Error::Device(format!(
                    "pass {}: depth texture {} bound as colour",
                    pass.label, record.desc.label
                )));
            }
            if *size.get_or_insert(record.desc.size) != record.desc.size {
                return Err(Error::Device(format!("pass {}: attachment sizes differ", pass.label)));
            }
        }
        if let Some(depth) = &pass.depth {
            let record = self.attachment(depth.texture, &pass.label)?;
            if !record.desc.format.is_depth() {
                return Err(Error::Device(format!(
                    "pass {}: {} is not a depth texture",
                    pass.label, record.desc.label
                )));
            }
            if *size.get_or_insert(record.desc.size) != record.desc.size {
                return Err(Error::Device(format!("pass {}: attachment sizes differ", pass.label)));
            }
        }
        let size = size.ok_or_else(|| Error::Device(format!("pass {} has no attachments", pass.label)))?;

        for color in &pass.colors {
            if let Some(record) = self.textures.get_mut(color.texture.0 as usize) {
                record.defined |= color.clear.is_some();
            }
        }
        if let Some(depth) = &pass.depth {
            if let Some(record) = self.textures.get_mut(depth.texture.0 as usize) {
                record.defined |= depth.clear.is_some();
            }
        }

        self.current_pass = Some(PassRecord {
            label: pass.label.clone(),
            colors: pass.colors.clone(),
            depth: pass.depth.clone(),
            size,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()> {
        let pass = self
            .current_pass
            .as_ref()
            .ok_or_else(|| Error::Device("draw outside of a render pass".into()))?;
        let program = self
            .programs
            .get(call.program.0 as usize)
            .ok_or_else(|| Error::Device(format!("unknown program {:?}", call.program)))?;
        if let Geometry::Mesh { mesh, .. } = call.geometry {
            if mesh.0 as usize >= self.meshes.len() {
                return Err(Error::Device(format!("unknown mesh {mesh:?}")));
            }
        }
        for (name, texture) in &call.bindings.textures {
            if self.texture(*texture).is_none() {
                return Err(Error::Device(format!(
                    "{}: {name} samples destroyed texture {texture:?}",
                    program.label
                )));
            }
            if pass.attachments().any(|a| a == *texture) {
                return Err(Error::Device(format!(
                    "{}: {name} samples an attachment of pass {}",
                    program.label, pass.label
                )));
            }
        }
        for (name, buffer) in &call.bindings.buffers {
            if self.buffer(*buffer).is_none() {
                return Err(Error::Device(format!("{}: {name} uses destroyed buffer", program.label)));
            }
        }

        let record = DrawRecord {
            program: call.program,
            program_label: program.label.clone(),
            geometry: call.geometry,
            blending: call.blending,
            two_sided: call.two_sided,
            state: self.state,
            uniforms: call.uniforms.clone(),
            buffers: call.bindings.buffers.clone(),
            storage: call
                .bindings
                .storage
                .iter()
                .map(|(name, data)| (name.clone(), data.len()))
                .collect(),
            textures: call.bindings.textures.clone(),
        };
        let attachments: Vec<TextureId> = pass.attachments().collect();
        for texture in attachments {
            if let Some(target) = self.textures.get_mut(texture.0 as usize) {
                target.defined = true;
            }
        }
        if let Some(pass) = self.current_pass.as_mut() {
            pass.draws.push(record);
        }
        Ok(())
    }

    fn end_pass(&mut self) -> Result<()> {
        let pass = self
            .current_pass
            .take()
            .ok_or_else(|| Error::Device("end_pass without begin_pass".into()))?;
        self.pending_passes.push(pass);
        Ok(())
    }

    fn present(&mut self, texture: TextureId) -> Result<()> {
        if let Some(open) = &self.current_pass {
            return Err(Error::Device(format!("present while pass {} is open", open.label)));
        }
        if self.texture(texture).is_none() {
            return Err(Error::Device(format!("present of destroyed texture {texture:?}")));
        }
        self.frames.push(FrameRecord {
            passes: std::mem::take(&mut self.pending_passes),
            presented: texture,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Bindings, TextureFormat};
    use crate::shader::reflect::ProgramReflection;

    fn target(device: &mut HeadlessDevice, label: &str, size: UVec2, format: TextureFormat) -> TextureId {
        device.create_texture(&TextureDesc {
            label: label.into(),
            size,
            format,
            render_target: true,
        })
    }

    fn program(device: &mut HeadlessDevice) -> ProgramId {
        device
            .compile_program(&ProgramSource {
                label: "test".into(),
                vertex: "fn vs_main() {}".into(),
                fragment: "fn fs_main() {}".into(),
                reflection: ProgramReflection::default(),
            })
            .unwrap()
    }

    #[test]
    fn test_rejects_unprocessed_directives_and_missing_entry() {
        let mut device = HeadlessDevice::new(UVec2::new(4, 4));
        let err = device
            .compile_program(&ProgramSource {
                label: "bad".into(),
                vertex: "#ifdef X\nfn vs_main() {}".into(),
                fragment: "fn fs_main() {}".into(),
                reflection: ProgramReflection::default(),
            })
            .unwrap_err();
        assert_eq!(err.stage, ShaderStage::Vertex);

        let err = device
            .compile_program(&ProgramSource {
                label: "bad".into(),
                vertex: "fn vs_main() {}".into(),
                fragment: "fn main() {}".into(),
                reflection: ProgramReflection::default(),
            })
            .unwrap_err();
        assert_eq!(err.stage, ShaderStage::Fragment);
        assert_eq!(device.compile_count(), 0);
    }

    #[test]
    fn test_pass_validation() {
        let mut device = HeadlessDevice::new(UVec2::new(8, 8));
        let color = target(&mut device, "color", UVec2::new(8, 8), TextureFormat::Rgba8);
        let small = target(&mut device, "depth", UVec2::new(4, 4), TextureFormat::Depth32Float);

        let mismatched = PassDesc {
            label: "mismatched".into(),
            colors: vec![ColorTarget { texture: color, clear: Some([0.0; 4]) }],
            depth: Some(DepthTarget { texture: small, clear: Some(1.0), read_only: false }),
        };
        assert!(device.begin_pass(&mismatched).is_err());

        let pass = PassDesc {
            label: "ok".into(),
            colors: vec![ColorTarget { texture: color, clear: Some([0.0; 4]) }],
            depth: None,
        };
        device.begin_pass(&pass).unwrap();
        assert!(device.begin_pass(&pass).is_err());

        // Sampling the pass's own attachment is a feedback loop.
        let program = program(&mut device);
        let uniforms = UniformSet::new();
        let mut bindings = Bindings::default();
        bindings.texture("source", color);
        let call = DrawCall {
            program,
            geometry: Geometry::Fullscreen,
            uniforms: &uniforms,
            bindings: &bindings,
            blending: Blending::Opaque,
            two_sided: false,
        };
        assert!(device.draw(&call).is_err());
        device.end_pass().unwrap();
        device.present(color).unwrap();

        let frame = device.last_frame().unwrap();
        assert_eq!(frame.pass_labels(), vec!["ok"]);
        assert!(device.texture_defined(color));
        assert!(!device.texture_defined(small));
    }

    #[test]
    fn test_destroyed_texture_cannot_be_sampled() {
        let mut device = HeadlessDevice::new(UVec2::new(8, 8));
        let color = target(&mut device, "color", UVec2::new(8, 8), TextureFormat::Rgba8);
        let old = target(&mut device, "old", UVec2::new(8, 8), TextureFormat::Rgba8);
        device.destroy_texture(old);
        assert_eq!(device.texture_size(old), None);

        let program = program(&mut device);
        device
            .begin_pass(&PassDesc {
                label: "p".into(),
                colors: vec![ColorTarget { texture: color, clear: None }],
                depth: None,
            })
            .unwrap();
        let uniforms = UniformSet::new();
        let mut bindings = Bindings::default();
        bindings.texture("stale", old);
        let err = device
            .draw(&DrawCall {
                program,
                geometry: Geometry::Fullscreen,
                uniforms: &uniforms,
                bindings: &bindings,
                blending: Blending::Opaque,
                two_sided: false,
            })
            .unwrap_err();
        assert!(err.to_string().contains("destroyed"));
    }

    #[test]
    fn test_buffer_writes_are_tracked() {
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let buffer = device.create_buffer(&BufferDesc {
            label: "b".into(),
            size: 8,
            kind: crate::gpu::BufferKind::Uniform,
        });
        device.write_buffer(buffer, 4, &[1, 2, 3, 4]);
        assert_eq!(device.buffer_data(buffer).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(device.buffer_write_count(buffer), 1);
    }
}
