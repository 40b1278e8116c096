//! Wavefront OBJ import.
//!
//! Supports `v`, `vt`, `vn` and polygonal `f` records (fan-triangulated,
//! negative indices allowed). Every `o`, `g` or `usemtl` record starts a new
//! sub-mesh, so a model with several materials comes out as one [`CpuMesh`]
//! per material slot. Missing normals are generated from face winding.

use std::collections::HashMap;

use umbra_core::math::{Vec2, Vec3};
use umbra_core::mesh::{CpuMesh, Vertex};

use crate::error::AssetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Corner {
    position: usize,
    uv: Option<usize>,
    normal: Option<usize>,
}

#[derive(Default)]
struct Group {
    label: Option<String>,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    lookup: HashMap<Corner, u32>,
    generated_normals: bool,
}

impl Group {
    fn labelled(label: Option<String>) -> Self {
        Self {
            label,
            ..Self::default()
        }
    }

    fn finish(mut self) -> Option<CpuMesh> {
        if self.indices.is_empty() {
            return None;
        }
        if self.generated_normals {
            for vertex in &mut self.vertices {
                vertex.normal = vertex.normal().normalize_or_zero().to_array();
            }
        }
        compute_tangents(&mut self.vertices, &self.indices);
        let mesh = CpuMesh::new(self.vertices, self.indices);
        Some(match self.label {
            Some(label) => mesh.with_label(label),
            None => mesh,
        })
    }
}

/// Parses OBJ text into one mesh per group. `path` is only used in errors.
pub fn parse_obj(path: &str, text: &str) -> Result<Vec<CpuMesh>, AssetError> {
    let mut positions = Vec::new();
    let mut uvs = Vec::new();
    let mut normals = Vec::new();
    let mut meshes = Vec::new();
    let mut group = Group::default();

    for (number, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        let mut fields = line.split_whitespace();
        let Some(tag) = fields.next() else { continue };
        let err = |reason: &str| AssetError::decode(path, format!("line {}: {reason}", number + 1));

        match tag {
            "v" => positions.push(parse_floats::<3>(&mut fields).map(Vec3::from).ok_or_else(|| err("bad vertex"))?),
            "vt" => {
                let uv = parse_floats::<2>(&mut fields).ok_or_else(|| err("bad texture coordinate"))?;
                // OBJ puts v = 0 at the bottom; textures are stored top row first.
                uvs.push(Vec2::new(uv[0], 1.0 - uv[1]));
            }
            "vn" => normals.push(parse_floats::<3>(&mut fields).map(Vec3::from).ok_or_else(|| err("bad normal"))?),
            "f" => {
                let corners = fields
                    .map(|field| parse_corner(field, positions.len(), uvs.len(), normals.len()))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| err("bad face index"))?;
                if corners.len() < 3 {
                    return Err(err("face with fewer than three corners"));
                }
                let ids: Vec<u32> = corners
                    .iter()
                    .map(|corner| corner_index(&mut group, *corner, &positions, &uvs, &normals))
                    .collect();
                for i in 1..ids.len() - 1 {
                    let triangle = [ids[0], ids[i], ids[i + 1]];
                    group.indices.extend_from_slice(&triangle);
                    if corners.iter().any(|c| c.normal.is_none()) {
                        accumulate_face_normal(&mut group, triangle);
                    }
                }
            }
            "o" | "g" | "usemtl" => {
                let label = fields.next().map(str::to_string);
                let previous = std::mem::replace(&mut group, Group::labelled(label));
                meshes.extend(previous.finish());
            }
            // Materials are assigned per entity, smoothing groups are ignored.
            "mtllib" | "s" | "l" | "p" => {}
            other => log::trace!("OBJ {path}: skipping `{other}` record"),
        }
    }
    meshes.extend(group.finish());

    if meshes.is_empty() {
        return Err(AssetError::decode(path, "no faces"));
    }
    log::debug!("OBJ {path}: {} sub-meshes, {} positions", meshes.len(), positions.len());
    Ok(meshes)
}

fn parse_floats<'a, const N: usize>(fields: &mut impl Iterator<Item = &'a str>) -> Option<[f32; N]> {
    let mut out = [0.0; N];
    for value in &mut out {
        *value = fields.next()?.parse().ok()?;
    }
    Some(out)
}

/// Resolves a 1-based (or negative, relative) OBJ index.
fn resolve_index(field: &str, len: usize) -> Option<usize> {
    let index: i64 = field.parse().ok()?;
    let resolved = if index < 0 { len as i64 + index } else { index - 1 };
    (0..len as i64).contains(&resolved).then_some(resolved as usize)
}

fn parse_corner(field: &str, positions: usize, uvs: usize, normals: usize) -> Option<Corner> {
    let mut parts = field.split('/');
    let position = resolve_index(parts.next()?, positions)?;
    let uv = match parts.next() {
        Some("") | None => None,
        Some(index) => Some(resolve_index(index, uvs)?),
    };
    let normal = match parts.next() {
        Some("") | None => None,
        Some(index) => Some(resolve_index(index, normals)?),
    };
    Some(Corner { position, uv, normal })
}

fn corner_index(group: &mut Group, corner: Corner, positions: &[Vec3], uvs: &[Vec2], normals: &[Vec3]) -> u32 {
    if let Some(&index) = group.lookup.get(&corner) {
        return index;
    }
    let normal = match corner.normal {
        Some(n) => normals[n],
        None => {
            group.generated_normals = true;
            Vec3::ZERO
        }
    };
    let uv = corner.uv.map_or([0.0, 0.0], |t| uvs[t].to_array());
    let index = group.vertices.len() as u32;
    group
        .vertices
        .push(Vertex::new(positions[corner.position], normal, uv, Vec3::X));
    group.lookup.insert(corner, index);
    index
}

fn accumulate_face_normal(group: &mut Group, [a, b, c]: [u32; 3]) {
    let p = |i: u32| group.vertices[i as usize].position();
    let face = (p(b) - p(a)).cross(p(c) - p(a));
    for index in [a, b, c] {
        let vertex = &mut group.vertices[index as usize];
        vertex.normal = (vertex.normal() + face).to_array();
    }
}

/// Per-vertex tangents from UV gradients, orthogonalised against the normal.
fn compute_tangents(vertices: &mut [Vertex], indices: &[u32]) {
    let mut sums = vec![Vec3::ZERO; vertices.len()];
    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [triangle[0] as usize, triangle[1] as usize, triangle[2] as usize];
        let (p0, p1, p2) = (vertices[a].position(), vertices[b].position(), vertices[c].position());
        let (t0, t1, t2) = (
            Vec2::from(vertices[a].uv),
            Vec2::from(vertices[b].uv),
            Vec2::from(vertices[c].uv),
        );
        let (e1, e2) = (p1 - p0, p2 - p0);
        let (d1, d2) = (t1 - t0, t2 - t0);
        let det = d1.x * d2.y - d2.x * d1.y;
        if det.abs() < 1e-8 {
            continue;
        }
        let tangent = (e1 * d2.y - e2 * d1.y) / det;
        for index in [a, b, c] {
            sums[index] += tangent;
        }
    }
    for (vertex, sum) in vertices.iter_mut().zip(sums) {
        let normal = vertex.normal();
        let tangent = (sum - normal * normal.dot(sum)).normalize_or_zero();
        let tangent = if tangent == Vec3::ZERO {
            normal.any_orthonormal_vector()
        } else {
            tangent
        };
        vertex.tangent = [tangent.x, tangent.y, tangent.z, 1.0];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = "\
# a unit quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
f 1/1/1 2/2/1 3/3/1 4/4/1
";

    #[test]
    fn quad_is_fan_triangulated() {
        let meshes = parse_obj("quad.obj", QUAD).unwrap();
        assert_eq!(meshes.len(), 1);
        let mesh = &meshes[0];
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.indices(), &[0, 1, 2, 0, 2, 3]);
        assert!(mesh.validate());
        assert_eq!(mesh.vertices()[0].uv, [0.0, 1.0]);
        assert!((mesh.vertices()[0].tangent[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn groups_split_sub_meshes() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 0 0 1\n\
                    o first\nf 1 2 3\n\
                    usemtl second\nf 1 3 4\nf -4 -3 -1\n";
        let meshes = parse_obj("two.obj", text).unwrap();
        assert_eq!(meshes.len(), 2);
        assert_eq!(meshes[0].label(), Some("first"));
        assert_eq!(meshes[1].label(), Some("second"));
        assert_eq!(meshes[1].index_count(), 6);
    }

    #[test]
    fn missing_normals_follow_winding() {
        let meshes = parse_obj("tri.obj", "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        for vertex in meshes[0].vertices() {
            assert!((vertex.normal() - Vec3::Z).length() < 1e-5);
        }
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let err = parse_obj("bad.obj", "v 0 0 0\nf 1 2 3\n").unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
        assert!(parse_obj("empty.obj", "v 0 0 0\n").is_err());
    }
}
