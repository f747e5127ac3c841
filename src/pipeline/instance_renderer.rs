// src/pipeline/instance_renderer.rs
//! Scene collection and instance draws.
//!
//! [`InstanceBuckets::collect`] runs once per frame and splits every visible
//! (instance, mesh, material) part into blending buckets. Every pass of the
//! frame reads the same buckets. [`InstanceRenderer`] issues the draws of a
//! bucket for one shader pass.

use std::sync::Arc;

use crate::asset::Assets;
use crate::camera::Camera;
use crate::error::Result;
use crate::gpu::{Bindings, Capability, DrawCall, Geometry, RenderDevice, UniformSet};
use crate::instances::Instance;
use crate::lighting::Lighting;
use crate::materials::{Blending, Material};
use crate::model::Mesh;
use crate::shader::ShaderPass;

use super::uniform_setter::{DrawInfo, UniformSetter};

/// One mesh of one instance, with the material it is drawn with.
#[derive(Debug, Clone, Copy)]
pub struct DrawItem<'a> {
    pub instance: &'a Instance,
    pub mesh: &'a Arc<Mesh>,
    pub material: &'a Arc<Material>,
    /// View-space depth of the mesh centre.
    pub depth: f32,
}

#[derive(Debug, Default)]
pub struct InstanceBuckets<'a> {
    opaque: Vec<DrawItem<'a>>,
    translucent: Vec<DrawItem<'a>>,
}

impl<'a> InstanceBuckets<'a> {
    /// Opaque parts keep scene order; everything else is sorted back to front.
    pub fn collect(instances: &'a [Instance], camera: &Camera) -> Self {
        let mut buckets = Self::default();
        for instance in instances.iter().filter(|i| i.visible) {
            let transform = instance.model_matrix();
            for (mesh, material) in instance.parts() {
                let depth = camera.view_depth(transform.transform_point3(mesh.center()));
                let item = DrawItem {
                    instance,
                    mesh,
                    material,
                    depth,
                };
                if material.blending() == Blending::Opaque {
                    buckets.opaque.push(item);
                } else {
                    buckets.translucent.push(item);
                }
            }
        }
        buckets
            .translucent
            .sort_by(|a, b| b.depth.total_cmp(&a.depth));
        buckets
    }

    pub fn opaque(&self) -> &[DrawItem<'a>] {
        &self.opaque
    }

    pub fn translucent(&self) -> &[DrawItem<'a>] {
        &self.translucent
    }

    /// Opaque items first, then translucent ones.
    pub fn iter(&self) -> impl Iterator<Item = &DrawItem<'a>> {
        self.opaque.iter().chain(&self.translucent)
    }

    pub fn len(&self) -> usize {
        self.opaque.len() + self.translucent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.translucent.is_empty()
    }
}

/// Draws instance parts with the variants of one shader pass.
#[derive(Debug, Clone, Copy)]
pub struct InstanceRenderer {
    pub pass: ShaderPass,
    /// Pass name reported to the uniform setter.
    pub label: &'static str,
    /// Bind the light arrays (forward shading).
    pub lit: bool,
}

impl InstanceRenderer {
    pub fn new(pass: ShaderPass, label: &'static str) -> Self {
        Self {
            pass,
            label,
            lit: false,
        }
    }

    pub fn lit(mut self) -> Self {
        self.lit = true;
        self
    }

    /// Draw every item whose material was built for this pass. Blending is
    /// toggled per item and left disabled. Returns the number of draws.
    #[allow(clippy::too_many_arguments)]
    pub fn draw<'i, 'a: 'i>(
        &self,
        device: &mut dyn RenderDevice,
        assets: &Assets,
        lighting: &Lighting,
        frame_uniforms: &UniformSet,
        setter: &dyn UniformSetter,
        items: impl IntoIterator<Item = &'i DrawItem<'a>>,
    ) -> Result<usize> {
        let mut draws = 0;
        for item in items {
            if !item.material.supports_pass(self.pass) {
                continue;
            }
            self.draw_item(device, assets, lighting, frame_uniforms, setter, item)?;
            draws += 1;
        }
        device.disable(Capability::Blending);
        Ok(draws)
    }

    fn draw_item(
        &self,
        device: &mut dyn RenderDevice,
        assets: &Assets,
        lighting: &Lighting,
        frame_uniforms: &UniformSet,
        setter: &dyn UniformSetter,
        item: &DrawItem<'_>,
    ) -> Result<()> {
        let instance = item.instance;
        let material = item.material;
        let program = assets
            .shaders
            .get_or_compile(device, material, instance.shader_type(), self.pass)?;

        let mut uniforms = frame_uniforms.clone();
        uniforms
            .set("model", instance.model_matrix())
            .set("picking_color", instance.picking_color)
            .set("billboard", 0.0f32);
        let mut bindings = Bindings::default();
        if self.lit {
            lighting.bind(&mut uniforms, &mut bindings);
        }
        material.bind(device, &program, &mut bindings)?;
        if let Some(bones) = instance.bone_transforms() {
            bindings.storage("bones", bytemuck::cast_slice(bones).to_vec());
        }
        if let Some(transforms) = instance.instance_transforms() {
            bindings.storage("instance_transforms", bytemuck::cast_slice(&transforms).to_vec());
        }
        setter.apply(
            &DrawInfo {
                pass: self.label,
                material,
                instance: Some(instance),
            },
            &mut uniforms,
        );

        let blending = material.blending();
        if blending == Blending::Opaque {
            device.disable(Capability::Blending);
        } else {
            device.enable(Capability::Blending);
        }
        device.draw(&DrawCall {
            program: program.id,
            geometry: Geometry::Mesh {
                mesh: item.mesh.id,
                instances: instance.instance_count(),
            },
            uniforms: &uniforms,
            bindings: &bindings,
            blending,
            two_sided: material.two_sided(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::RendererSettings;
    use crate::materials::{MaterialBuilder, Property};
    use crate::model::{AbstractModel, Model};
    use crate::gpu::headless::HeadlessDevice;
    use glam::{Vec3, Vec4};

    /// A one-cube model drawn with a flat colour material.
    pub(crate) fn cube_model(
        device: &mut HeadlessDevice,
        assets: &Assets,
        name: &str,
        blending: Blending,
    ) -> Arc<AbstractModel> {
        let material = MaterialBuilder::new(assets)
            .name(format!("{name}_material"))
            .add(Property::Color, Vec4::ONE)
            .blending(blending)
            .build(device)
            .unwrap();
        let cube = assets.cube(device).unwrap();
        Arc::new(AbstractModel::Plain(Model::new(name, vec![cube], vec![material])))
    }

    fn camera() -> Camera {
        let mut camera = Camera::default();
        camera.set_position(Vec3::ZERO);
        camera.look_at(Vec3::Z);
        camera
    }

    #[test]
    fn test_collect_splits_by_blending_and_sorts_translucent_back_to_front() {
        let mut device = HeadlessDevice::new(glam::UVec2::ONE);
        let assets = Assets::new(&RendererSettings::default());
        let wall = cube_model(&mut device, &assets, "wall", Blending::Opaque);
        let glass = cube_model(&mut device, &assets, "glass", Blending::Translucent);

        let mut hidden = Instance::model(wall.clone());
        hidden.visible = false;
        let instances = vec![
            Instance::model(glass.clone()).with_position(Vec3::new(0.0, 0.0, 2.0)),
            Instance::model(wall).with_position(Vec3::new(0.0, 0.0, 3.0)),
            Instance::model(glass).with_position(Vec3::new(0.0, 0.0, 9.0)),
            hidden,
        ];
        let buckets = InstanceBuckets::collect(&instances, &camera());
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets.opaque().len(), 1);
        let depths: Vec<f32> = buckets.translucent().iter().map(|i| i.depth).collect();
        assert_eq!(depths, vec![9.0, 2.0]);
        assert_eq!(buckets.iter().next().unwrap().material.name(), "wall_material");
    }

    #[test]
    fn test_instanced_draw_binds_world_transforms() {
        let mut device = HeadlessDevice::new(glam::UVec2::splat(2));
        let assets = Assets::new(&RendererSettings::default());
        let post = cube_model(&mut device, &assets, "post", Blending::Opaque);
        let instances = vec![Instance::instanced(post, vec![glam::Mat4::IDENTITY; 3])];
        let buckets = InstanceBuckets::collect(&instances, &camera());

        let depth = device.create_texture(&crate::gpu::TextureDesc {
            label: "depth".into(),
            size: glam::UVec2::splat(2),
            format: crate::gpu::TextureFormat::Depth32Float,
            render_target: true,
        });
        device
            .begin_pass(&crate::gpu::PassDesc {
                label: "depth".into(),
                colors: Vec::new(),
                depth: Some(crate::gpu::DepthTarget {
                    texture: depth,
                    clear: Some(1.0),
                    read_only: false,
                }),
            })
            .unwrap();
        let lighting = Lighting::new(&mut device, 1);
        let renderer = InstanceRenderer::new(ShaderPass::Depth, "depth");
        let draws = renderer
            .draw(
                &mut device,
                &assets,
                &lighting,
                &UniformSet::new(),
                &super::super::uniform_setter::NoOverrides,
                buckets.opaque(),
            )
            .unwrap();
        device.end_pass().unwrap();
        device.present(depth).unwrap();

        assert_eq!(draws, 1);
        let draw = &device.last_frame().unwrap().pass("depth").unwrap().draws[0];
        assert_eq!(draw.geometry, Geometry::Mesh { mesh: instances[0].parts()[0].0.id, instances: 3 });
        assert!(draw.storage.iter().any(|(name, len)| name == "instance_transforms" && *len == 3 * 64));
        assert!(device.program_label(draw.program).unwrap().contains("Instanced"));
    }
}
