//! CPU-side mesh data structures.

use crate::math::Vec3;

/// Interleaved vertex: position, normal, texture coordinate and tangent.
///
/// The tangent's `w` lane carries the bitangent sign.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 4],
}

impl Vertex {
    /// Size of one vertex in bytes.
    pub const STRIDE: usize = std::mem::size_of::<Vertex>();

    pub fn new(position: Vec3, normal: Vec3, uv: [f32; 2], tangent: Vec3) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            uv,
            tangent: [tangent.x, tangent.y, tangent.z, 1.0],
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }
}

/// A CPU-side triangle-list mesh with 32-bit indices.
///
/// Created by the [`generators`](super::generators) or by model importers,
/// then uploaded to the GPU by the graphics crate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuMesh {
    label: Option<String>,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl CpuMesh {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            label: None,
            vertices,
            indices,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Raw vertex bytes for buffer upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Raw index bytes for buffer upload.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Bounds of all vertex positions, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<Aabb> {
        let first = self.vertices.first()?.position();
        let (min, max) = self
            .vertices
            .iter()
            .fold((first, first), |(min, max), v| {
                (min.min(v.position()), max.max(v.position()))
            });
        Some(Aabb { min, max })
    }

    /// Returns false if any index points past the vertex array.
    pub fn validate(&self) -> bool {
        self.indices.len() % 3 == 0 && self.indices.iter().all(|&i| (i as usize) < self.vertices.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_stride_is_48_bytes() {
        assert_eq!(Vertex::STRIDE, 48);
    }

    #[test]
    fn bounds_cover_all_vertices() {
        let mesh = CpuMesh::new(
            vec![
                Vertex::new(Vec3::new(-1.0, 0.0, 2.0), Vec3::Y, [0.0, 0.0], Vec3::X),
                Vertex::new(Vec3::new(3.0, -2.0, 0.0), Vec3::Y, [0.0, 0.0], Vec3::X),
            ],
            vec![],
        );
        let bounds = mesh.bounds().unwrap();
        assert_eq!(bounds.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(3.0, 0.0, 2.0));
    }

    #[test]
    fn validate_rejects_out_of_range_index() {
        let v = Vertex::new(Vec3::ZERO, Vec3::Y, [0.0, 0.0], Vec3::X);
        assert!(CpuMesh::new(vec![v; 3], vec![0, 1, 2]).validate());
        assert!(!CpuMesh::new(vec![v; 3], vec![0, 1, 3]).validate());
    }

    #[test]
    fn empty_mesh_has_no_bounds() {
        assert!(CpuMesh::default().bounds().is_none());
    }
}
