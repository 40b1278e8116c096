//! Triangle setup and scan conversion.
//!
//! Clip space follows the wgpu conventions: visible depth is `0 <= z <= w`,
//! NDC y points up and framebuffer y points down. Triangles are clipped
//! against the near plane only; the viewport bounds take care of the rest.

use glam::{Vec2, Vec4};

use crate::types::{CullMode, Viewport};

/// Interpolated per-vertex attributes.
pub(crate) const VARYINGS: usize = 8;

#[derive(Debug, Clone, Copy)]
pub(crate) struct ClipVertex {
    pub clip: Vec4,
    pub varyings: [f32; VARYINGS],
}

impl ClipVertex {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        let mut varyings = [0.0; VARYINGS];
        for (i, out) in varyings.iter_mut().enumerate() {
            *out = self.varyings[i] + (other.varyings[i] - self.varyings[i]) * t;
        }
        Self {
            clip: self.clip.lerp(other.clip, t),
            varyings,
        }
    }
}

/// A covered pixel.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fragment {
    pub x: u32,
    pub y: u32,
    pub depth: f32,
    pub varyings: [f32; VARYINGS],
}

/// Sutherland-Hodgman against `z >= 0`.
fn clip_near(triangle: [ClipVertex; 3]) -> Vec<ClipVertex> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let current = triangle[i];
        let next = triangle[(i + 1) % 3];
        let current_inside = current.clip.z >= 0.0;
        let next_inside = next.clip.z >= 0.0;
        if current_inside {
            out.push(current);
        }
        if current_inside != next_inside {
            let t = current.clip.z / (current.clip.z - next.clip.z);
            out.push(current.lerp(&next, t));
        }
    }
    out
}

struct ScreenVertex {
    pos: Vec2,
    ndc: Vec2,
    depth: f32,
    inv_w: f32,
    varyings: [f32; VARYINGS],
}

impl ScreenVertex {
    fn project(vertex: &ClipVertex, viewport: Viewport) -> Option<Self> {
        let w = vertex.clip.w;
        if w <= f32::EPSILON {
            return None;
        }
        let ndc = vertex.clip.truncate() / w;
        let pos = Vec2::new(
            viewport.x as f32 + (ndc.x * 0.5 + 0.5) * viewport.width as f32,
            viewport.y as f32 + (0.5 - ndc.y * 0.5) * viewport.height as f32,
        );
        Some(Self {
            pos,
            ndc: ndc.truncate(),
            depth: ndc.z,
            inv_w: 1.0 / w,
            varyings: vertex.varyings,
        })
    }
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Rasterizes one triangle, calling `emit` for every covered pixel center.
pub(crate) fn rasterize_triangle(
    triangle: [ClipVertex; 3],
    cull: CullMode,
    viewport: Viewport,
    emit: &mut impl FnMut(Fragment),
) {
    let polygon = clip_near(triangle);
    if polygon.len() < 3 {
        return;
    }
    let Some(screen) = polygon
        .iter()
        .map(|v| ScreenVertex::project(v, viewport))
        .collect::<Option<Vec<_>>>()
    else {
        return;
    };

    for i in 1..screen.len() - 1 {
        rasterize_projected([&screen[0], &screen[i], &screen[i + 1]], cull, viewport, emit);
    }
}

fn rasterize_projected(
    [a, b, c]: [&ScreenVertex; 3],
    cull: CullMode,
    viewport: Viewport,
    emit: &mut impl FnMut(Fragment),
) {
    // Counter-clockwise in NDC is the front face.
    let ndc_area = (b.ndc - a.ndc).perp_dot(c.ndc - a.ndc);
    if ndc_area == 0.0 {
        return;
    }
    let front = ndc_area > 0.0;
    match cull {
        CullMode::Back if !front => return,
        CullMode::Front if front => return,
        _ => {}
    }

    let area = edge(a.pos, b.pos, c.pos);
    if area.abs() <= f32::EPSILON {
        return;
    }

    let min = a.pos.min(b.pos).min(c.pos);
    let max = a.pos.max(b.pos).max(c.pos);
    let x0 = min.x.floor().max(viewport.x as f32) as u32;
    let y0 = min.y.floor().max(viewport.y as f32) as u32;
    let x1 = (max.x.ceil() as i64).min((viewport.x + viewport.width) as i64);
    let y1 = (max.y.ceil() as i64).min((viewport.y + viewport.height) as i64);
    if x1 <= 0 || y1 <= 0 {
        return;
    }

    for y in y0..y1 as u32 {
        for x in x0..x1 as u32 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(b.pos, c.pos, p) / area;
            let w1 = edge(c.pos, a.pos, p) / area;
            let w2 = edge(a.pos, b.pos, p) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }

            let depth = w0 * a.depth + w1 * b.depth + w2 * c.depth;
            if !(0.0..=1.0).contains(&depth) {
                continue;
            }

            let (p0, p1, p2) = (w0 * a.inv_w, w1 * b.inv_w, w2 * c.inv_w);
            let sum = p0 + p1 + p2;
            let mut varyings = [0.0; VARYINGS];
            for (i, out) in varyings.iter_mut().enumerate() {
                *out = (p0 * a.varyings[i] + p1 * b.varyings[i] + p2 * c.varyings[i]) / sum;
            }

            emit(Fragment {
                x,
                y,
                depth,
                varyings,
            });
        }
    }
}
