//! Mesh generators for common shapes.
//!
//! All generated triangles wind counter-clockwise when seen from outside.

use std::f32::consts::PI;

use crate::math::Vec3;

use super::data::{CpuMesh, Vertex};

/// Generate an axis-aligned cube centered at the origin.
///
/// Each face has its own four vertices so normals stay flat (24 vertices,
/// 36 indices).
pub fn generate_cube(half_extent: f32) -> CpuMesh {
    // (normal, u axis, v axis) with u x v == normal.
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];

    let h = half_extent;
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u, v) in faces {
        let base = vertices.len() as u32;
        let center = normal * h;
        let corners = [
            (center - u * h - v * h, [0.0, 1.0]),
            (center + u * h - v * h, [1.0, 1.0]),
            (center + u * h + v * h, [1.0, 0.0]),
            (center - u * h + v * h, [0.0, 0.0]),
        ];
        for (position, uv) in corners {
            vertices.push(Vertex::new(position, normal, uv, u));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    CpuMesh::new(vertices, indices).with_label("cube")
}

/// Generate a square plane on the XZ plane facing +Y.
pub fn generate_plane(half_size: f32) -> CpuMesh {
    let h = half_size;
    let u = Vec3::X;
    let v = Vec3::NEG_Z;
    let vertices = vec![
        Vertex::new(-u * h - v * h, Vec3::Y, [0.0, 1.0], u),
        Vertex::new(u * h - v * h, Vec3::Y, [1.0, 1.0], u),
        Vertex::new(u * h + v * h, Vec3::Y, [1.0, 0.0], u),
        Vertex::new(-u * h + v * h, Vec3::Y, [0.0, 0.0], u),
    ];
    CpuMesh::new(vertices, vec![0, 1, 2, 2, 3, 0]).with_label("plane")
}

/// Generate a UV sphere.
///
/// `segments` runs around the equator and `rings` from pole to pole.
pub fn generate_sphere(radius: f32, segments: u32, rings: u32) -> CpuMesh {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let mut vertices = Vec::with_capacity(((rings + 1) * (segments + 1)) as usize);
    let mut indices = Vec::with_capacity((rings * segments * 6) as usize);

    for ring in 0..=rings {
        let theta = ring as f32 * PI / rings as f32;
        let (sin_theta, cos_theta) = theta.sin_cos();

        for segment in 0..=segments {
            let phi = segment as f32 * 2.0 * PI / segments as f32;
            let (sin_phi, cos_phi) = phi.sin_cos();

            let normal = Vec3::new(sin_theta * cos_phi, cos_theta, sin_theta * sin_phi);
            let tangent = Vec3::new(-sin_phi, 0.0, cos_phi);
            vertices.push(Vertex::new(
                normal * radius,
                normal,
                [segment as f32 / segments as f32, ring as f32 / rings as f32],
                tangent,
            ));
        }
    }

    for ring in 0..rings {
        for segment in 0..segments {
            let current = ring * (segments + 1) + segment;
            let next = current + segments + 1;

            indices.extend_from_slice(&[current, current + 1, next]);
            indices.extend_from_slice(&[current + 1, next + 1, next]);
        }
    }

    CpuMesh::new(vertices, indices).with_label("sphere")
}

/// Generate a screen-covering quad in normalized device coordinates.
///
/// UV (0, 0) is the top-left corner of the screen.
pub fn generate_fullscreen_quad() -> CpuMesh {
    let vertices = vec![
        Vertex::new(Vec3::new(-1.0, -1.0, 0.0), Vec3::Z, [0.0, 1.0], Vec3::X),
        Vertex::new(Vec3::new(1.0, -1.0, 0.0), Vec3::Z, [1.0, 1.0], Vec3::X),
        Vertex::new(Vec3::new(1.0, 1.0, 0.0), Vec3::Z, [1.0, 0.0], Vec3::X),
        Vertex::new(Vec3::new(-1.0, 1.0, 0.0), Vec3::Z, [0.0, 0.0], Vec3::X),
    ];
    CpuMesh::new(vertices, vec![0, 1, 2, 2, 3, 0]).with_label("fullscreen_quad")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_outward_winding(mesh: &CpuMesh) {
        let vertices = mesh.vertices();
        let center = mesh.bounds().unwrap().center();
        for tri in mesh.indices().chunks(3) {
            let a = vertices[tri[0] as usize].position();
            let b = vertices[tri[1] as usize].position();
            let c = vertices[tri[2] as usize].position();
            let face_normal = (b - a).cross(c - a);
            if face_normal.length_squared() < 1e-12 {
                continue; // degenerate pole triangle
            }
            let outward = (a + b + c) / 3.0 - center;
            assert!(face_normal.dot(outward) > 0.0);
        }
    }

    #[test]
    fn cube_counts_and_winding() {
        let mesh = generate_cube(0.5);
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.index_count(), 36);
        assert!(mesh.validate());
        assert_outward_winding(&mesh);
        let bounds = mesh.bounds().unwrap();
        assert_eq!(bounds.min, Vec3::splat(-0.5));
        assert_eq!(bounds.max, Vec3::splat(0.5));
    }

    #[test]
    fn sphere_counts_and_winding() {
        let mesh = generate_sphere(1.0, 8, 4);
        // (rings+1) * (segments+1) = 5 * 9 = 45 vertices
        assert_eq!(mesh.vertex_count(), 45);
        // rings * segments * 6 = 4 * 8 * 6 = 192 indices
        assert_eq!(mesh.index_count(), 192);
        assert!(mesh.validate());
        assert_outward_winding(&mesh);
    }

    #[test]
    fn plane_faces_up() {
        let mesh = generate_plane(1.0);
        let v = mesh.vertices();
        let n = (v[1].position() - v[0].position()).cross(v[2].position() - v[0].position());
        assert!(n.normalize().abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn fullscreen_quad_spans_ndc() {
        let bounds = generate_fullscreen_quad().bounds().unwrap();
        assert_eq!(bounds.min, Vec3::new(-1.0, -1.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 1.0, 0.0));
    }
}
