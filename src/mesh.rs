//! Emission mesh capture.
//!
//! Mesh emission samples a random point on a random triangle of a source
//! mesh inside the Spawn kernel. The kernel cannot read the host's mesh, so
//! [`MeshSampler::capture`] flattens it into two linear buffers:
//!
//! - vertices: `(position, normal, color)` per vertex, 9 floats each
//! - triangles: the flat index list, three indices per triangle
//!
//! Normals default to up and colours to white when the source has none (or
//! has a different number of them than positions). The buffers are immutable
//! until the next capture, which releases them before allocating new ones.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use log::{debug, info};

use crate::error::DustError;
use crate::kernel::{Backend, Handle};
use crate::params::MeshUniforms;

/// Normal substituted when the source mesh has none.
pub const DEFAULT_NORMAL: Vec3 = Vec3::Y;

/// Colour substituted when the source mesh has none.
pub const DEFAULT_COLOR: Vec3 = Vec3::ONE;

/// A renderable's geometry as handed to the sampler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMesh {
    pub positions: Vec<Vec3>,
    /// Per-vertex normals. Ignored unless there is one per position.
    pub normals: Vec<Vec3>,
    /// Per-vertex colours. Ignored unless there is one per position.
    pub colors: Vec<Vec4>,
    /// Triangle list.
    pub indices: Vec<u32>,
}

impl SourceMesh {
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            indices,
            ..Default::default()
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_colors(mut self, colors: Vec<Vec4>) -> Self {
        self.colors = colors;
        self
    }

    /// Axis-aligned cube centred on the origin, 24 vertices with face normals.
    pub fn cube(half_extent: f32) -> Self {
        let faces = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::NEG_X, Vec3::Y, Vec3::NEG_Z),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (Vec3::NEG_Y, Vec3::NEG_Z, Vec3::X),
            (Vec3::Z, Vec3::Y, Vec3::NEG_X),
            (Vec3::NEG_Z, Vec3::Y, Vec3::X),
        ];

        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, up, right) in faces {
            let base = positions.len() as u32;
            for (u, v) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                positions.push((normal + right * u + up * v) * half_extent);
                normals.push(normal);
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new(positions, indices).with_normals(normals)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// One packed vertex as read by the Spawn kernel (9 consecutive floats).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
}

impl MeshVertex {
    /// Floats per vertex in the vertex buffer.
    pub const FLOATS: usize = 9;
}

/// Host-side result of flattening a [`SourceMesh`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionMeshData {
    pub vertices: Vec<MeshVertex>,
    pub triangles: Vec<u32>,
}

impl EmissionMeshData {
    /// Validate and flatten a source mesh.
    pub fn pack(source: &SourceMesh) -> Result<Self, DustError> {
        let vertex_count = source.positions.len();
        if vertex_count == 0 {
            return Err(DustError::InvalidMesh("mesh has no vertices".into()));
        }
        if source.indices.is_empty() {
            return Err(DustError::InvalidMesh("mesh has no triangles".into()));
        }
        if source.indices.len() % 3 != 0 {
            return Err(DustError::InvalidMesh(format!(
                "index count {} is not a multiple of 3",
                source.indices.len()
            )));
        }
        if let Some(bad) = source.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(DustError::InvalidMesh(format!(
                "index {} out of range for {} vertices",
                bad, vertex_count
            )));
        }

        let has_normals = source.normals.len() == vertex_count;
        let has_colors = source.colors.len() == vertex_count;
        if !has_normals && !source.normals.is_empty() {
            debug!(
                "ignoring {} normals for {} vertices",
                source.normals.len(),
                vertex_count
            );
        }

        let vertices = (0..vertex_count)
            .map(|i| {
                let normal = if has_normals { source.normals[i] } else { DEFAULT_NORMAL };
                let color = if has_colors { source.colors[i].truncate() } else { DEFAULT_COLOR };
                MeshVertex {
                    position: source.positions[i].to_array(),
                    normal: normal.to_array(),
                    color: color.to_array(),
                }
            })
            .collect();

        Ok(Self {
            vertices,
            triangles: source.indices.clone(),
        })
    }

    /// The vertex buffer viewed as `(position, normal, color)` triples.
    pub fn vertex_attributes(&self) -> Vec<Vec3> {
        self.vertices
            .iter()
            .flat_map(|v| {
                [
                    Vec3::from_array(v.position),
                    Vec3::from_array(v.normal),
                    Vec3::from_array(v.color),
                ]
            })
            .collect()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn triangle_count(&self) -> u32 {
        (self.triangles.len() / 3) as u32
    }
}

/// Owner of the emission mesh buffers and the emitting transform.
pub struct MeshSampler<B: Backend> {
    buffers: Handle<B::Mesh>,
    vertex_count: u32,
    triangle_count: u32,
    transform: Mat4,
    normal_matrix: Mat4,
}

impl<B: Backend> Default for MeshSampler<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> MeshSampler<B> {
    pub fn new() -> Self {
        Self {
            buffers: Handle::Empty,
            vertex_count: 0,
            triangle_count: 0,
            transform: Mat4::IDENTITY,
            normal_matrix: Mat4::IDENTITY,
        }
    }

    /// Flatten `source` and upload it, replacing any previous capture.
    ///
    /// An invalid mesh leaves the previous capture untouched.
    pub fn capture(&mut self, backend: &mut B, source: &SourceMesh) -> Result<(), DustError> {
        let data = EmissionMeshData::pack(source)?;

        if let Handle::Live(_) = self.buffers {
            let old = self.buffers.take("emission mesh")?;
            backend.release_mesh(old);
        }

        let mesh = match backend.create_mesh(&data.vertices, &data.triangles) {
            Ok(mesh) => mesh,
            Err(e) => {
                self.vertex_count = 0;
                self.triangle_count = 0;
                return Err(e);
            }
        };
        self.buffers.replace(mesh);
        self.vertex_count = data.vertex_count();
        self.triangle_count = data.triangle_count();

        info!(
            "Captured emission mesh: {} vertices, {} triangles",
            self.vertex_count, self.triangle_count
        );
        Ok(())
    }

    /// Set the local-to-world transform applied to sampled points.
    pub fn set_transform(&mut self, local_to_world: Mat4) {
        self.transform = local_to_world;
        self.normal_matrix = if local_to_world.determinant().abs() > f32::EPSILON {
            local_to_world.inverse().transpose()
        } else {
            Mat4::IDENTITY
        };
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// Inverse-transpose of the transform, for normals.
    pub fn normal_matrix(&self) -> Mat4 {
        self.normal_matrix
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangle_count
    }

    pub fn index_count(&self) -> u32 {
        self.triangle_count * 3
    }

    pub fn is_captured(&self) -> bool {
        self.buffers.is_live()
    }

    /// The buffers for binding, if a mesh is captured.
    pub fn buffers(&self) -> Option<&B::Mesh> {
        match &self.buffers {
            Handle::Live(mesh) => Some(mesh),
            _ => None,
        }
    }

    /// Values pushed with the per-tick uniforms. `None` without a capture.
    pub fn uniforms(&self) -> Option<MeshUniforms> {
        self.is_captured().then(|| MeshUniforms {
            matrix: self.transform,
            normal_matrix: self.normal_matrix,
            vertex_count: self.vertex_count,
            triangle_count: self.triangle_count,
        })
    }

    pub fn release(&mut self, backend: &mut B) -> Result<(), DustError> {
        let mesh = self.buffers.take("emission mesh")?;
        backend.release_mesh(mesh);
        self.vertex_count = 0;
        self.triangle_count = 0;
        debug!("Released emission mesh buffers");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GpuError;
    use crate::host::HostBackend;
    use rand::{Rng, SeedableRng};

    fn triangle() -> SourceMesh {
        SourceMesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Z], vec![0, 1, 2])
    }

    #[test]
    fn test_pack_defaults_normal_and_color() {
        let data = EmissionMeshData::pack(&triangle()).unwrap();
        for v in &data.vertices {
            assert_eq!(v.normal, [0.0, 1.0, 0.0]);
            assert_eq!(v.color, [1.0, 1.0, 1.0]);
        }
    }

    #[test]
    fn test_pack_ignores_mismatched_normals() {
        let mesh = triangle().with_normals(vec![Vec3::X]);
        let data = EmissionMeshData::pack(&mesh).unwrap();
        assert_eq!(data.vertices[0].normal, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_pack_keeps_matching_colors() {
        let mesh = triangle().with_colors(vec![Vec4::new(1.0, 0.0, 0.0, 0.5); 3]);
        let data = EmissionMeshData::pack(&mesh).unwrap();
        assert_eq!(data.vertices[2].color, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_random_mesh_buffer_lengths() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..10 {
            let v = rng.gen_range(3..200);
            let t = rng.gen_range(1..300);
            let positions = (0..v)
                .map(|_| Vec3::new(rng.gen(), rng.gen(), rng.gen()))
                .collect();
            let indices = (0..t * 3).map(|_| rng.gen_range(0..v as u32)).collect();

            let data = EmissionMeshData::pack(&SourceMesh::new(positions, indices)).unwrap();
            assert_eq!(data.vertex_attributes().len(), 3 * v);
            assert_eq!(data.triangles.len(), 3 * t);
            assert_eq!(data.triangle_count() as usize, t);
            assert!(data.vertex_attributes().iter().skip(1).step_by(3).all(|n| *n == Vec3::Y));
        }
    }

    #[test]
    fn test_invalid_meshes() {
        let empty = SourceMesh::default();
        assert!(matches!(EmissionMeshData::pack(&empty), Err(DustError::InvalidMesh(_))));

        let ragged = SourceMesh::new(vec![Vec3::ZERO; 3], vec![0, 1]);
        assert!(matches!(EmissionMeshData::pack(&ragged), Err(DustError::InvalidMesh(_))));

        let out_of_range = SourceMesh::new(vec![Vec3::ZERO; 3], vec![0, 1, 3]);
        assert!(matches!(EmissionMeshData::pack(&out_of_range), Err(DustError::InvalidMesh(_))));
    }

    #[test]
    fn test_cube() {
        let cube = SourceMesh::cube(0.5);
        let data = EmissionMeshData::pack(&cube).unwrap();
        assert_eq!(data.vertex_count(), 24);
        assert_eq!(data.triangle_count(), 12);
        assert!(cube.positions.iter().all(|p| p.abs().max_element() <= 0.5 + 1e-6));
    }

    #[test]
    fn test_recapture_releases_previous_buffers() {
        let mut backend = HostBackend::new();
        let mut sampler = MeshSampler::new();

        sampler.capture(&mut backend, &triangle()).unwrap();
        sampler.capture(&mut backend, &SourceMesh::cube(1.0)).unwrap();
        assert_eq!(backend.live_resources(), 1);
        assert_eq!(sampler.triangle_count(), 12);
        assert_eq!(sampler.index_count(), 36);

        sampler.release(&mut backend).unwrap();
        assert_eq!(backend.live_resources(), 0);
        assert!(matches!(sampler.release(&mut backend), Err(DustError::Released(_))));
    }

    #[test]
    fn test_invalid_capture_keeps_previous() {
        let mut backend = HostBackend::new();
        let mut sampler = MeshSampler::new();
        sampler.capture(&mut backend, &triangle()).unwrap();

        assert!(sampler.capture(&mut backend, &SourceMesh::default()).is_err());
        assert!(sampler.is_captured());
        assert_eq!(sampler.vertex_count(), 3);
    }

    #[test]
    fn test_failed_upload_clears_counts() {
        // Room for the triangle (3 × 36 bytes) but not the cube.
        let mut backend = HostBackend::new().with_storage_limit(256);
        let mut sampler = MeshSampler::new();
        sampler.capture(&mut backend, &triangle()).unwrap();

        let result = sampler.capture(&mut backend, &SourceMesh::cube(1.0));
        assert!(matches!(
            result,
            Err(DustError::Gpu(GpuError::BufferTooLarge { limit: 256, .. }))
        ));
        assert!(!sampler.is_captured());
        assert_eq!(sampler.vertex_count(), 0);
        assert_eq!(sampler.triangle_count(), 0);
        assert!(sampler.uniforms().is_none());
        assert_eq!(backend.live_resources(), 0);

        sampler.capture(&mut backend, &triangle()).unwrap();
        assert_eq!(sampler.vertex_count(), 3);
    }

    #[test]
    fn test_normal_matrix_is_inverse_transpose() {
        let mut sampler = MeshSampler::<HostBackend>::new();
        let m = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        sampler.set_transform(m);

        let n = sampler.normal_matrix().transform_vector3(Vec3::X);
        assert!((n - Vec3::new(0.5, 0.0, 0.0)).length() < 1e-6);
    }
}
