// src/model/mesh.rs
//! GPU meshes and the built-in primitive shapes.

use glam::{Vec2, Vec3};

use crate::error::Result;
use crate::gpu::{MeshData, MeshId, RenderDevice, VertexNormalTangent};

/// An uploaded, immutable mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub name: String,
    pub id: MeshId,
    pub vertex_count: usize,
    pub index_count: usize,
    pub skinned: bool,
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
}

impl Mesh {
    pub fn upload(device: &mut dyn RenderDevice, name: impl Into<String>, data: &MeshData) -> Result<Mesh> {
        let name = name.into();
        let id = device.create_mesh(&name, data)?;
        let (bounds_min, bounds_max) = bounds(&data.vertices);
        log::debug!(
            "Uploaded mesh {} ({} vertices, {} indices{})",
            name,
            data.vertices.len(),
            data.indices.len(),
            if data.is_skinned() { ", skinned" } else { "" }
        );
        Ok(Mesh {
            name,
            id,
            vertex_count: data.vertices.len(),
            index_count: data.indices.len(),
            skinned: data.is_skinned(),
            bounds_min,
            bounds_max,
        })
    }

    pub fn triangle_count(&self) -> usize {
        self.index_count / 3
    }

    pub fn center(&self) -> Vec3 {
        (self.bounds_min + self.bounds_max) * 0.5
    }
}

fn bounds(vertices: &[VertexNormalTangent]) -> (Vec3, Vec3) {
    if vertices.is_empty() {
        return (Vec3::ZERO, Vec3::ZERO);
    }
    vertices.iter().fold(
        (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
        |(min, max), v| (min.min(v.position), max.max(v.position)),
    )
}

fn vertex(position: Vec3, normal: Vec3, tangent: Vec3, uv: Vec2) -> VertexNormalTangent {
    VertexNormalTangent {
        position,
        normal,
        tangent,
        uv,
    }
}

/// Unit quad in the XY plane facing +Z, used for sprite particles.
pub fn quad() -> MeshData {
    let n = Vec3::Z;
    let t = Vec3::X;
    MeshData {
        vertices: vec![
            vertex(Vec3::new(-0.5, -0.5, 0.0), n, t, Vec2::new(0.0, 1.0)),
            vertex(Vec3::new(0.5, -0.5, 0.0), n, t, Vec2::new(1.0, 1.0)),
            vertex(Vec3::new(0.5, 0.5, 0.0), n, t, Vec2::new(1.0, 0.0)),
            vertex(Vec3::new(-0.5, 0.5, 0.0), n, t, Vec2::new(0.0, 0.0)),
        ],
        indices: vec![0, 1, 2, 2, 3, 0],
        bone_weights: None,
    }
}

/// Unit cube centred on the origin, four vertices per face.
pub fn cube() -> MeshData {
    // (normal, tangent) per face
    let faces = [
        (Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_X, Vec3::Z),
        (Vec3::Y, Vec3::X),
        (Vec3::NEG_Y, Vec3::X),
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::NEG_X),
    ];
    let mut data = MeshData::default();
    for (normal, tangent) in faces {
        let bitangent = normal.cross(tangent);
        let base = data.vertices.len() as u32;
        for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            let position = normal * 0.5 + tangent * (u - 0.5) + bitangent * (v - 0.5);
            data.vertices
                .push(vertex(position, normal, tangent, Vec2::new(u, 1.0 - v)));
        }
        data.indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::HeadlessDevice;
    use glam::UVec2;

    #[test]
    fn test_cube_faces_point_outwards() {
        let cube = cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        for tri in cube.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| cube.vertices[tri[i] as usize].position);
            let face_normal = (b - a).cross(c - a).normalize();
            let expected = cube.vertices[tri[0] as usize].normal;
            assert!(face_normal.dot(expected) > 0.99, "{face_normal} vs {expected}");
        }
    }

    #[test]
    fn test_upload_records_bounds() {
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let mesh = Mesh::upload(&mut device, "cube", &cube()).unwrap();
        assert_eq!(mesh.bounds_min, Vec3::splat(-0.5));
        assert_eq!(mesh.bounds_max, Vec3::splat(0.5));
        assert_eq!(mesh.triangle_count(), 12);
        assert_eq!(device.meshes()[0].label, "cube");
    }
}
