// src/gltf_loader.rs
//! glTF 2.0 model loader.
//!
//! Loading runs in two phases. The first decodes and validates every
//! primitive, skin and animation without touching the device; any malformed
//! input fails the whole load there. The second loads textures, builds
//! materials and uploads meshes, removing whatever it registered if a later
//! step fails. A file with a skin yields a [`SkeletalModel`], anything else a
//! plain [`Model`] whose vertices are pre-transformed into model space.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use gltf::accessor::DataType;
use gltf::animation::util::ReadOutputs;
use gltf::animation::{Interpolation, Property as Channel};
use gltf::material::AlphaMode;
use gltf::mesh::Mode;
use gltf::Semantic;

use crate::asset::Assets;
use crate::context::{load_ensure, Context};
use crate::error::{Error, Result};
use crate::gpu::{MeshData, RenderDevice, VertexBoneWeight, VertexNormalTangent};
use crate::materials::{Blending, Material, MaterialBuilder, Property, Shading};
use crate::model::{AbstractModel, Animation, AnimationNode, Bone, BoneTree, KeyFrame, Mesh, Model, SkeletalModel};
use crate::shader::{ModelShader, ShaderPass};
use crate::texture::{Texture, TextureLoader, TextureLoaderFlags};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelLoaderFlags {
    pub flip_texture_y: bool,
    pub max_texture_dimension: Option<u32>,
    /// Passes the model's materials are compiled for; registry default when `None`.
    pub material_passes: Option<Vec<ShaderPass>>,
}

pub struct GltfModelLoader;

impl GltfModelLoader {
    /// Load `path`, named after its file stem. A model already registered
    /// under that name is returned as-is.
    pub fn load(
        device: &mut dyn RenderDevice,
        assets: &Assets,
        path: impl AsRef<Path>,
        flags: &ModelLoaderFlags,
    ) -> Result<Arc<AbstractModel>> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| Error::load(format!("{} has no file name", path.display())))?;
        if let Some(model) = assets.models.try_get(&name) {
            return Ok(model);
        }
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Self::load_slice(device, assets, &name, &bytes, path.parent(), flags)
            .with_context(|| format!("loading model {}", path.display()))
    }

    /// Load a `.glb` or `.gltf` held in memory. External buffers and images
    /// are resolved against `base`.
    pub fn load_slice(
        device: &mut dyn RenderDevice,
        assets: &Assets,
        name: &str,
        bytes: &[u8],
        base: Option<&Path>,
        flags: &ModelLoaderFlags,
    ) -> Result<Arc<AbstractModel>> {
        let gltf::Gltf { document, blob } = gltf::Gltf::from_slice(bytes)?;
        let buffers = gltf::import_buffers(&document, base, blob)?;
        let decoded = Decoded::read(&document, &buffers, name)?;

        let mut upload = Upload {
            device,
            assets,
            model: name,
            flags,
            base,
            buffers: &buffers,
            meshes: Vec::new(),
            materials: HashMap::new(),
            registered_materials: Vec::new(),
        };
        match upload.run(&document, decoded) {
            Ok(model) => {
                log::info!(
                    "Loaded model {} ({} meshes, {})",
                    name,
                    model.model().meshes.len(),
                    if model.is_skeletal() { "skeletal" } else { "static" }
                );
                assets.models.add(name, Arc::new(model))
            }
            Err(err) => {
                upload.roll_back();
                Err(err)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Phase 1: decode and validate
// ─────────────────────────────────────────────────────────────────────────────

struct PrimitiveData {
    name: String,
    data: MeshData,
    material: Option<usize>,
}

struct SkeletonData {
    bones: Vec<Bone>,
    trees: Vec<BoneTree>,
    animations: Vec<Animation>,
}

struct Decoded {
    primitives: Vec<PrimitiveData>,
    skeleton: Option<SkeletonData>,
}

type Buffers = [gltf::buffer::Data];

fn buffer_data<'a>(buffers: &'a Buffers) -> impl Clone + Fn(gltf::Buffer<'_>) -> Option<&'a [u8]> {
    move |buffer| buffers.get(buffer.index()).map(|data| &data[..])
}

fn node_matrix(node: &gltf::Node<'_>) -> Mat4 {
    Mat4::from_cols_array_2d(&node.transform().matrix())
}

/// Parent of every node, `None` for roots.
fn parents(document: &gltf::Document) -> Vec<Option<usize>> {
    let mut parents = vec![None; document.nodes().count()];
    for node in document.nodes() {
        for child in node.children() {
            parents[child.index()] = Some(node.index());
        }
    }
    parents
}

impl Decoded {
    fn read(document: &gltf::Document, buffers: &Buffers, model: &str) -> Result<Self> {
        let skinned = document.skins().next().is_some();
        let parents = parents(document);

        let mut globals = vec![Mat4::IDENTITY; parents.len()];
        let roots: Vec<gltf::Node<'_>> = document.nodes().filter(|n| parents[n.index()].is_none()).collect();
        let mut stack: Vec<(gltf::Node<'_>, Mat4)> = roots.into_iter().rev().map(|n| (n, Mat4::IDENTITY)).collect();
        let mut order = Vec::with_capacity(parents.len());
        while let Some((node, parent)) = stack.pop() {
            let global = parent * node_matrix(&node);
            globals[node.index()] = global;
            order.push(node.index());
            stack.extend(node.children().collect::<Vec<_>>().into_iter().rev().map(|c| (c, global)));
        }

        let nodes: Vec<gltf::Node<'_>> = document.nodes().collect();
        let mut primitives = Vec::new();
        let mut used_names = HashSet::new();
        for &index in &order {
            let node = &nodes[index];
            let Some(mesh) = node.mesh() else {
                continue;
            };
            let base = mesh
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{model}_mesh{}", mesh.index()));
            let primitive_count = mesh.primitives().count();
            for primitive in mesh.primitives() {
                let mut name = if primitive_count > 1 {
                    format!("{base}{}", primitive.index())
                } else {
                    base.clone()
                };
                if !used_names.insert(name.clone()) {
                    name = format!("{name}_node{index}");
                    used_names.insert(name.clone());
                }
                let transform = (!skinned).then_some(globals[index]);
                let data = read_primitive(&primitive, buffers, transform, skinned).with_context(|| format!("mesh {name}"))?;
                primitives.push(PrimitiveData {
                    name,
                    data,
                    material: primitive.material().index(),
                });
            }
        }
        load_ensure!(!primitives.is_empty(), "model {} contains no meshes", model);

        let skeleton = if skinned {
            Some(read_skeleton(document, buffers, &parents, model)?)
        } else {
            None
        };
        Ok(Self { primitives, skeleton })
    }
}

fn check_accessor(accessor: &gltf::Accessor<'_>, what: &str) -> Result<()> {
    load_ensure!(accessor.sparse().is_none(), "sparse accessors are not supported ({what})");
    Ok(())
}

fn read_primitive(
    primitive: &gltf::Primitive<'_>,
    buffers: &Buffers,
    transform: Option<Mat4>,
    skinned: bool,
) -> Result<MeshData> {
    load_ensure!(
        primitive.mode() == Mode::Triangles,
        "only triangle primitives are supported, found {:?}",
        primitive.mode()
    );

    let positions_accessor = primitive
        .get(&Semantic::Positions)
        .ok_or_else(|| Error::load("primitive has no positions"))?;
    let vertex_count = positions_accessor.count();
    for (semantic, accessor) in primitive.attributes() {
        check_accessor(&accessor, &format!("{semantic:?}"))?;
        load_ensure!(
            accessor.count() == vertex_count,
            "attribute {:?} has {} elements, positions have {}",
            semantic,
            accessor.count(),
            vertex_count
        );
        if let Semantic::TexCoords(set) = semantic {
            if set > 0 {
                log::warn!("Ignoring extra UV set {set}");
            }
        }
    }

    let indices_accessor = primitive.indices().ok_or_else(|| Error::load("no indices in model"))?;
    check_accessor(&indices_accessor, "indices")?;
    load_ensure!(
        matches!(indices_accessor.data_type(), DataType::U8 | DataType::U16 | DataType::U32),
        "index component type must be u8, u16 or u32, found {:?}",
        indices_accessor.data_type()
    );
    load_ensure!(
        indices_accessor.count() % 3 == 0,
        "triangle indices count {} is not divisible by 3",
        indices_accessor.count()
    );

    let reader = primitive.reader(buffer_data(buffers));
    let positions: Vec<Vec3> = reader
        .read_positions()
        .ok_or_else(|| Error::load("position data is missing"))?
        .map(Vec3::from)
        .collect();
    let normals: Vec<Vec3> = match reader.read_normals() {
        Some(iter) => iter.map(Vec3::from).collect(),
        None => vec![Vec3::Y; vertex_count],
    };
    let tangents: Vec<Vec3> = match reader.read_tangents() {
        Some(iter) => iter.map(|t| Vec3::new(t[0], t[1], t[2])).collect(),
        None => vec![Vec3::Y; vertex_count],
    };
    let uvs: Vec<Vec2> = match reader.read_tex_coords(0) {
        Some(iter) => iter.into_f32().map(Vec2::from).collect(),
        None => vec![Vec2::ZERO; vertex_count],
    };
    let indices: Vec<u32> = reader
        .read_indices()
        .ok_or_else(|| Error::load("no indices in model"))?
        .into_u32()
        .collect();
    load_ensure!(
        indices.iter().all(|&i| (i as usize) < vertex_count),
        "index out of range for {} vertices",
        vertex_count
    );

    let (position_matrix, normal_matrix) = match transform {
        Some(m) => (m, Mat3::from_mat4(m).inverse().transpose()),
        None => (Mat4::IDENTITY, Mat3::IDENTITY),
    };
    let vertices = (0..vertex_count)
        .map(|i| VertexNormalTangent {
            position: position_matrix.transform_point3(positions[i]),
            normal: (normal_matrix * normals[i]).normalize_or_zero(),
            tangent: position_matrix.transform_vector3(tangents[i]),
            uv: uvs[i],
        })
        .collect();

    let bone_weights = if skinned {
        let joints = reader.read_joints(0).map(|j| j.into_u16().collect::<Vec<_>>());
        let weights = reader.read_weights(0).map(|w| w.into_f32().collect::<Vec<_>>());
        match (joints, weights) {
            (Some(joints), Some(weights)) if joints.len() == vertex_count && weights.len() == vertex_count => Some(
                joints
                    .iter()
                    .zip(&weights)
                    .map(|(j, w)| VertexBoneWeight {
                        joints: j.map(u32::from),
                        weights: *w,
                    })
                    .collect(),
            ),
            _ => {
                return Err(Error::load(
                    "skin vertex bone attributes do not match the vertex count",
                ))
            }
        }
    } else {
        None
    };

    Ok(MeshData {
        vertices,
        indices,
        bone_weights,
    })
}

fn read_skeleton(
    document: &gltf::Document,
    buffers: &Buffers,
    parents: &[Option<usize>],
    model: &str,
) -> Result<SkeletonData> {
    if document.skins().count() > 1 {
        log::warn!("Model {model} has {} skins, only the first is used", document.skins().count());
    }
    let skin = document.skins().next().ok_or_else(|| Error::load("model has no skin"))?;

    let mut bones: Vec<Bone> = document
        .nodes()
        .map(|node| {
            let name = node
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{model}_bone{}", node.index()));
            Bone::new(node.index(), name, node_matrix(&node))
        })
        .collect();

    let joints: Vec<usize> = skin.joints().map(|n| n.index()).collect();
    let inverse_binds: Vec<Mat4> = match skin.inverse_bind_matrices() {
        Some(accessor) => {
            check_accessor(&accessor, "inverse bind matrices")?;
            skin.reader(buffer_data(buffers))
                .read_inverse_bind_matrices()
                .ok_or_else(|| Error::load("inverse bind matrix data is missing"))?
                .map(|m| Mat4::from_cols_array_2d(&m))
                .collect()
        }
        None => vec![Mat4::IDENTITY; joints.len()],
    };
    load_ensure!(
        inverse_binds.len() == joints.len(),
        "skin has {} joints but {} inverse bind matrices",
        joints.len(),
        inverse_binds.len()
    );
    for (joint, (&node, offset)) in joints.iter().zip(&inverse_binds).enumerate() {
        let bone = &mut bones[node];
        bone.offset_matrix = *offset;
        bone.joint_index = Some(joint);
    }

    let children: Vec<Vec<usize>> = document
        .nodes()
        .map(|node| node.children().map(|c| c.index()).collect())
        .collect();
    fn build(tree: &mut BoneTree, children: &[Vec<usize>]) {
        for &child in &children[tree.bone] {
            build(tree.add(child), children);
        }
    }
    let trees = (0..parents.len())
        .filter(|&i| parents[i].is_none())
        .map(|root| {
            let mut tree = BoneTree::new(root);
            build(&mut tree, &children);
            tree
        })
        .collect();

    let animations = document
        .animations()
        .map(|animation| read_animation(&animation, buffers, model))
        .collect::<Result<Vec<_>>>()?;

    Ok(SkeletonData {
        bones,
        trees,
        animations,
    })
}

fn read_animation(animation: &gltf::Animation<'_>, buffers: &Buffers, model: &str) -> Result<Animation> {
    let name = animation
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("anim{}", animation.index()));
    let mut nodes: Vec<AnimationNode> = Vec::new();
    let mut duration = 0.0f32;

    for channel in animation.channels() {
        let interpolation = channel.sampler().interpolation();
        load_ensure!(
            interpolation == Interpolation::Linear,
            "animation {} of {}: {:?} interpolation is not supported",
            name,
            model,
            interpolation
        );
        let target = channel.target();
        load_ensure!(
            target.property() != Channel::MorphTargetWeights,
            "animation {} of {}: morph target weights are not supported",
            name,
            model
        );

        let reader = channel.reader(buffer_data(buffers));
        let times: Vec<f32> = reader
            .read_inputs()
            .ok_or_else(|| Error::load(format!("animation {name}: keyframe times are missing")))?
            .collect();
        duration = times.iter().copied().fold(duration, f32::max);

        let bone = target.node().index();
        let slot = match nodes.iter().position(|n| n.bone == bone) {
            Some(slot) => slot,
            None => {
                nodes.push(AnimationNode::new(bone));
                nodes.len() - 1
            }
        };
        let node = &mut nodes[slot];
        let duplicate = || Error::load(format!("animation {name}: bone {bone} has two {:?} tracks", target.property()));

        match reader.read_outputs() {
            Some(ReadOutputs::Translations(values)) => {
                if !node.positions.is_empty() {
                    return Err(duplicate());
                }
                node.positions = values.zip(&times).map(|(v, &t)| KeyFrame::new(Vec3::from(v), t)).collect();
            }
            Some(ReadOutputs::Rotations(values)) => {
                if !node.rotations.is_empty() {
                    return Err(duplicate());
                }
                node.rotations = values
                    .into_f32()
                    .zip(&times)
                    .map(|(v, &t)| KeyFrame::new(Quat::from_array(v), t))
                    .collect();
            }
            Some(ReadOutputs::Scales(values)) => {
                if !node.scales.is_empty() {
                    return Err(duplicate());
                }
                node.scales = values.zip(&times).map(|(v, &t)| KeyFrame::new(Vec3::from(v), t)).collect();
            }
            Some(ReadOutputs::MorphTargetWeights(_)) => {
                return Err(Error::load(format!("animation {name}: morph target weights are not supported")));
            }
            None => return Err(Error::load(format!("animation {name}: keyframe values are missing"))),
        }
    }

    Ok(Animation {
        name,
        duration,
        ticks_per_second: 1.0,
        nodes,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Phase 2: textures, materials, meshes
// ─────────────────────────────────────────────────────────────────────────────

struct Upload<'a> {
    device: &'a mut dyn RenderDevice,
    assets: &'a Assets,
    model: &'a str,
    flags: &'a ModelLoaderFlags,
    base: Option<&'a Path>,
    buffers: &'a Buffers,
    meshes: Vec<String>,
    materials: HashMap<Option<usize>, Arc<Material>>,
    registered_materials: Vec<String>,
}

impl Upload<'_> {
    fn run(&mut self, document: &gltf::Document, decoded: Decoded) -> Result<AbstractModel> {
        let model_shader = if decoded.skeleton.is_some() {
            ModelShader::Skeletal
        } else {
            ModelShader::Plain
        };

        let mut meshes = Vec::with_capacity(decoded.primitives.len());
        let mut materials = Vec::with_capacity(decoded.primitives.len());
        for primitive in &decoded.primitives {
            let material = self.material(document, primitive.material, model_shader)?;
            let name = if self.assets.meshes.contains(&primitive.name) {
                format!("{}/{}", self.model, primitive.name)
            } else {
                primitive.name.clone()
            };
            let mesh = Mesh::upload(self.device, name.clone(), &primitive.data)?;
            let mesh = self.assets.meshes.add(name.clone(), Arc::new(mesh))?;
            self.meshes.push(name);
            meshes.push(mesh);
            materials.push(material);
        }

        let model = Model::new(self.model, meshes, materials);
        Ok(match decoded.skeleton {
            Some(skeleton) => {
                let bone_indices = skeleton
                    .bones
                    .iter()
                    .map(|b| (b.name.clone(), b.index))
                    .collect();
                AbstractModel::Skeletal(SkeletalModel {
                    model,
                    bones: skeleton.bones,
                    bone_indices,
                    bone_trees: skeleton.trees,
                    animations: skeleton.animations,
                })
            }
            None => AbstractModel::Plain(model),
        })
    }

    fn roll_back(&mut self) {
        for name in self.meshes.drain(..) {
            self.assets.meshes.remove(&name);
        }
        for name in self.registered_materials.drain(..) {
            if let Some(material) = self.assets.materials.remove(&name) {
                material.release(self.device);
            }
        }
    }

    fn texture(&mut self, texture: gltf::Texture<'_>, flags: TextureLoaderFlags) -> Result<Arc<Texture>> {
        let image = texture.source();
        let flags = match self.flags.max_texture_dimension {
            Some(max) => flags.with_max_dimension(max),
            None => flags,
        }
        .with_flip_y(self.flags.flip_texture_y);
        let name = format!("{}/image{}", self.model, image.index());

        let bytes = match image.source() {
            gltf::image::Source::View { view, .. } => {
                let buffer = self
                    .buffers
                    .get(view.buffer().index())
                    .ok_or_else(|| Error::load(format!("{name}: buffer is missing")))?;
                let end = view.offset() + view.length();
                load_ensure!(end <= buffer.len(), "{}: buffer view exceeds its buffer", name);
                buffer[view.offset()..end].to_vec()
            }
            gltf::image::Source::Uri { uri, .. } => {
                load_ensure!(!uri.starts_with("data:"), "{}: embedded image data URIs are not supported", name);
                let path = self.base.map_or_else(|| Path::new(uri).to_path_buf(), |base| base.join(uri));
                std::fs::read(&path).with_context(|| format!("reading image {}", path.display()))?
            }
        };
        TextureLoader::load_from_memory(self.device, self.assets, &name, &bytes, &flags)
    }

    fn material(
        &mut self,
        document: &gltf::Document,
        index: Option<usize>,
        model_shader: ModelShader,
    ) -> Result<Arc<Material>> {
        if let Some(material) = self.materials.get(&index) {
            return Ok(material.clone());
        }
        let mut builder = MaterialBuilder::new(self.assets);
        builder.model_shaders([model_shader]);
        if let Some(passes) = &self.flags.material_passes {
            builder.material_shaders(passes.clone());
        }

        let gltf_material = index.and_then(|i| document.materials().nth(i));
        let name = match &gltf_material {
            Some(material) => {
                let name = material
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}_material{}", self.model, material.index().unwrap_or(0)));
                if self.assets.materials.contains(&name) {
                    format!("{}_{name}", self.model)
                } else {
                    name
                }
            }
            None => format!("{}_material_default", self.model),
        };
        builder.name(name.clone());

        match gltf_material {
            Some(material) => self.describe(&mut builder, &material, &name)?,
            None => {
                builder
                    .two_sided(true)
                    .shading(Shading::Unlit)
                    .add(Property::Color, Vec4::new(1.0, 0.0, 1.0, 1.0));
            }
        }

        let material = builder.build(self.device)?;
        self.registered_materials.push(name);
        self.materials.insert(index, material.clone());
        Ok(material)
    }

    fn describe(&mut self, builder: &mut MaterialBuilder<'_>, material: &gltf::Material<'_>, name: &str) -> Result<()> {
        match material.alpha_mode() {
            AlphaMode::Opaque => {}
            AlphaMode::Blend => {
                builder.blending(Blending::Translucent);
            }
            AlphaMode::Mask => {
                return Err(Error::load(format!("material {name}: alpha mode Mask is not supported")));
            }
        }
        if material.unlit() {
            builder.shading(Shading::Unlit);
        }
        builder.two_sided(material.double_sided());

        let pbr = material.pbr_metallic_roughness();
        builder.add(Property::Color, Vec4::from(pbr.base_color_factor()));
        if let Some(info) = pbr.base_color_texture() {
            let texture = self.texture(info.texture(), TextureLoaderFlags::srgb())?;
            builder.add(Property::Diffuse, texture);
        }
        if let Some(info) = pbr.metallic_roughness_texture() {
            let texture = self.texture(info.texture(), TextureLoaderFlags::linear())?;
            builder
                .add(Property::ORM, texture)
                .add(Property::Metallic, pbr.metallic_factor())
                .add(Property::Roughness, pbr.roughness_factor());
        }
        if let Some(normal) = material.normal_texture() {
            let texture = self.texture(normal.texture(), TextureLoaderFlags::linear())?;
            builder.add(Property::Normal, texture);
        }
        if let Some(ior) = material.ior() {
            builder.add(Property::IoR, ior);
        }
        if let Some(info) = material.emissive_texture() {
            let texture = self.texture(info.texture(), TextureLoaderFlags::srgb())?;
            builder.add(Property::EmissiveMask, texture);
        }
        let emissive = Vec3::from(material.emissive_factor());
        if emissive != Vec3::ZERO {
            let strength = material.emissive_strength().unwrap_or(1.0);
            builder.add(Property::EmissiveColor, emissive.extend(strength));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererSettings;
    use crate::gpu::headless::HeadlessDevice;
    use glam::UVec2;
    use serde_json::{json, Value};

    /// Assembles a binary glTF in memory.
    #[derive(Default)]
    struct GlbBuilder {
        bin: Vec<u8>,
        views: Vec<Value>,
        accessors: Vec<Value>,
    }

    impl GlbBuilder {
        fn accessor(&mut self, bytes: &[u8], component_type: u32, count: usize, ty: &str, extra: Value) -> usize {
            while self.bin.len() % 4 != 0 {
                self.bin.push(0);
            }
            self.views.push(json!({
                "buffer": 0,
                "byteOffset": self.bin.len(),
                "byteLength": bytes.len(),
            }));
            self.bin.extend_from_slice(bytes);
            let mut accessor = json!({
                "bufferView": self.views.len() - 1,
                "componentType": component_type,
                "count": count,
                "type": ty,
            });
            if let (Some(target), Value::Object(extra)) = (accessor.as_object_mut(), extra) {
                target.extend(extra);
            }
            self.accessors.push(accessor);
            self.accessors.len() - 1
        }

        fn positions(&mut self, positions: &[[f32; 3]]) -> usize {
            let bytes: Vec<u8> = bytemuck::cast_slice(positions).to_vec();
            self.accessor(
                &bytes,
                5126,
                positions.len(),
                "VEC3",
                json!({ "min": [-1.0, -1.0, -1.0], "max": [1.0, 1.0, 1.0] }),
            )
        }

        fn finish(mut self, mut document: Value) -> Vec<u8> {
            while self.bin.len() % 4 != 0 {
                self.bin.push(0);
            }
            document["asset"] = json!({ "version": "2.0" });
            document["buffers"] = json!([{ "byteLength": self.bin.len() }]);
            document["bufferViews"] = Value::Array(self.views);
            document["accessors"] = Value::Array(self.accessors);

            let mut json_chunk = serde_json::to_vec(&document).unwrap();
            while json_chunk.len() % 4 != 0 {
                json_chunk.push(b' ');
            }
            let total = 12 + 8 + json_chunk.len() + 8 + self.bin.len();
            let mut out = Vec::with_capacity(total);
            out.extend_from_slice(b"glTF");
            out.extend_from_slice(&2u32.to_le_bytes());
            out.extend_from_slice(&(total as u32).to_le_bytes());
            out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
            out.extend_from_slice(&0x4E4F_534Au32.to_le_bytes());
            out.extend_from_slice(&json_chunk);
            out.extend_from_slice(&(self.bin.len() as u32).to_le_bytes());
            out.extend_from_slice(&0x004E_4942u32.to_le_bytes());
            out.extend_from_slice(&self.bin);
            out
        }
    }

    const TRIANGLE: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

    fn u16_bytes(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_u16_indices_not_divisible_by_three_fail_without_meshes() {
        let mut glb = GlbBuilder::default();
        let position = glb.positions(&TRIANGLE);
        let indices = glb.accessor(&u16_bytes(&[0, 1, 2, 0]), 5123, 4, "SCALAR", json!({}));
        let bytes = glb.finish(json!({
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": position }, "indices": indices }] }],
            "nodes": [{ "mesh": 0 }],
            "scenes": [{ "nodes": [0] }],
        }));

        let mut device = HeadlessDevice::new(UVec2::ONE);
        let assets = Assets::new(&RendererSettings::default());
        let err = GltfModelLoader::load_slice(&mut device, &assets, "broken", &bytes, None, &Default::default())
            .unwrap_err();
        assert!(err.is_load(), "{err}");
        assert!(err.to_string().contains("not divisible by 3"));
        assert!(assets.meshes.is_empty());
        assert!(assets.models.is_empty());
        assert!(device.meshes().is_empty());
    }

    #[test]
    fn test_missing_indices_and_non_triangles_are_rejected() {
        let mut glb = GlbBuilder::default();
        let position = glb.positions(&TRIANGLE);
        let bytes = glb.finish(json!({
            "meshes": [{ "primitives": [
                { "attributes": { "POSITION": position } },
            ] }],
            "nodes": [{ "mesh": 0 }],
        }));
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let assets = Assets::new(&RendererSettings::default());
        let err = GltfModelLoader::load_slice(&mut device, &assets, "soup", &bytes, None, &Default::default())
            .unwrap_err();
        assert!(err.to_string().contains("no indices in model"));

        let mut glb = GlbBuilder::default();
        let position = glb.positions(&TRIANGLE);
        let indices = glb.accessor(&u16_bytes(&[0, 1, 2]), 5123, 3, "SCALAR", json!({}));
        let bytes = glb.finish(json!({
            "meshes": [{ "primitives": [
                { "attributes": { "POSITION": position }, "indices": indices, "mode": 1 },
            ] }],
            "nodes": [{ "mesh": 0 }],
        }));
        let err = GltfModelLoader::load_slice(&mut device, &assets, "lines", &bytes, None, &Default::default())
            .unwrap_err();
        assert!(err.is_load());
        assert!(err.to_string().contains("triangle"));
    }

    #[test]
    fn test_plain_model_gets_dummy_material_and_node_transform() {
        let mut glb = GlbBuilder::default();
        let position = glb.positions(&TRIANGLE);
        let indices = glb.accessor(&[0u8, 1, 2], 5121, 3, "SCALAR", json!({}));
        let bytes = glb.finish(json!({
            "meshes": [{ "name": "tri", "primitives": [{ "attributes": { "POSITION": position }, "indices": indices }] }],
            "nodes": [{ "mesh": 0, "translation": [0.0, 0.0, 5.0] }],
            "scenes": [{ "nodes": [0] }],
        }));

        let mut device = HeadlessDevice::new(UVec2::ONE);
        let assets = Assets::new(&RendererSettings::default());
        let model = GltfModelLoader::load_slice(&mut device, &assets, "prop", &bytes, None, &Default::default())
            .unwrap();
        assert!(!model.is_skeletal());
        let mesh = &model.model().meshes[0];
        assert_eq!(mesh.name, "tri");
        assert_eq!(mesh.bounds_min.z, 5.0);
        let material = &model.model().materials[0];
        assert_eq!(material.name(), "prop_material_default");
        assert!(material.two_sided());
        assert_eq!(material.shading(), Shading::Unlit);
        assert!(assets.models.contains("prop"));
    }

    #[test]
    fn test_skin_hierarchy_and_inverse_bind_matrices_are_exact() {
        let binds: [[f32; 16]; 2] = [
            [
                0.1, 1e-7, 0.0, 0.0, 3.333_333_3, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, -0.25, 7.0e-3, 1.0e12, 1.0,
            ],
            [
                1.0, 0.0, 0.0, 0.0, 0.0, 0.999_999_9, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, -1.5, 0.0, 1.0,
            ],
        ];

        let mut glb = GlbBuilder::default();
        let position = glb.positions(&TRIANGLE);
        let joints = glb.accessor(&[0u8, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0], 5121, 3, "VEC4", json!({}));
        let weights: [[f32; 4]; 3] = [[1.0, 0.0, 0.0, 0.0]; 3];
        let weights = glb.accessor(bytemuck::cast_slice(&weights), 5126, 3, "VEC4", json!({}));
        let indices = glb.accessor(&u16_bytes(&[0, 1, 2]), 5123, 3, "SCALAR", json!({}));
        let inverse_binds = glb.accessor(bytemuck::cast_slice(&binds), 5126, 2, "MAT4", json!({}));
        let times = glb.accessor(bytemuck::cast_slice(&[0.0f32, 2.5]), 5126, 2, "SCALAR", json!({ "min": [0.0], "max": [2.5] }));
        let moves = glb.accessor(bytemuck::cast_slice(&[[0.0f32; 3], [0.0, 1.0, 0.0]]), 5126, 2, "VEC3", json!({}));
        let bytes = glb.finish(json!({
            "meshes": [{ "primitives": [{
                "attributes": { "POSITION": position, "JOINTS_0": joints, "WEIGHTS_0": weights },
                "indices": indices,
            }] }],
            "nodes": [
                { "name": "hip", "children": [1] },
                { "name": "knee", "translation": [0.0, -1.0, 0.0] },
                { "name": "body", "mesh": 0, "skin": 0 },
            ],
            "skins": [{ "joints": [0, 1], "inverseBindMatrices": inverse_binds }],
            "animations": [{
                "channels": [{ "sampler": 0, "target": { "node": 1, "path": "translation" } }],
                "samplers": [{ "input": times, "output": moves }],
            }],
            "scenes": [{ "nodes": [0, 2] }],
        }));

        let mut device = HeadlessDevice::new(UVec2::ONE);
        let assets = Assets::new(&RendererSettings::default());
        let model = GltfModelLoader::load_slice(&mut device, &assets, "walker", &bytes, None, &Default::default())
            .unwrap();
        let skeletal = model.as_skeletal().unwrap();

        assert_eq!(skeletal.bones.len(), 3);
        assert_eq!(skeletal.hierarchy_size(), 3);
        for (joint, bind) in binds.iter().enumerate() {
            let bone = &skeletal.bones[joint];
            assert_eq!(bone.joint_index, Some(joint));
            let copied = bone.offset_matrix.to_cols_array();
            assert!(copied.iter().zip(bind).all(|(a, b)| a.to_bits() == b.to_bits()));
        }
        assert_eq!(skeletal.bone("knee").unwrap().index, 1);
        assert_eq!(skeletal.bone_trees[0].children[0].bone, 1);

        let animation = skeletal.animation("anim0").unwrap();
        assert_eq!(animation.duration, 2.5);
        assert_eq!(animation.nodes[0].bone, 1);
        assert!(device.meshes()[0].skinned);
        assert_eq!(model.model().materials[0].model_shaders(), &[ModelShader::Skeletal]);
    }

    #[test]
    fn test_step_interpolation_is_rejected() {
        let mut glb = GlbBuilder::default();
        let position = glb.positions(&TRIANGLE);
        let joints = glb.accessor(&[0u8; 12], 5121, 3, "VEC4", json!({}));
        let weights = glb.accessor(bytemuck::cast_slice(&[[1.0f32, 0.0, 0.0, 0.0]; 3]), 5126, 3, "VEC4", json!({}));
        let indices = glb.accessor(&u16_bytes(&[0, 1, 2]), 5123, 3, "SCALAR", json!({}));
        let times = glb.accessor(bytemuck::cast_slice(&[0.0f32]), 5126, 1, "SCALAR", json!({ "min": [0.0], "max": [0.0] }));
        let scales = glb.accessor(bytemuck::cast_slice(&[[1.0f32; 3]]), 5126, 1, "VEC3", json!({}));
        let bytes = glb.finish(json!({
            "meshes": [{ "primitives": [{
                "attributes": { "POSITION": position, "JOINTS_0": joints, "WEIGHTS_0": weights },
                "indices": indices,
            }] }],
            "nodes": [{ "name": "root" }, { "mesh": 0, "skin": 0 }],
            "skins": [{ "joints": [0] }],
            "animations": [{
                "channels": [{ "sampler": 0, "target": { "node": 0, "path": "scale" } }],
                "samplers": [{ "input": times, "output": scales, "interpolation": "STEP" }],
            }],
        }));
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let assets = Assets::new(&RendererSettings::default());
        let err = GltfModelLoader::load_slice(&mut device, &assets, "stepper", &bytes, None, &Default::default())
            .unwrap_err();
        assert!(err.is_load());
        assert!(err.to_string().contains("Step"));
        assert!(assets.meshes.is_empty());
    }
}
