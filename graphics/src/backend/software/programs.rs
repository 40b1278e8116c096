//! Native CPU versions of the built-in shader programs.

use glam::{Mat3, Mat4, Vec3, Vec4};
use umbra_core::mesh::Vertex;
use umbra_core::texture::TextureFormat;
use umbra_core::MatricesBinding;

use crate::postprocess::tonemap::TonemapOperator;
use crate::shaders;
use crate::types::{BlendMode, CompareFunction, PipelineOptions, Viewport};
use crate::uniforms::{
    GpuLightKind, LightsUniform, MaterialUniform, ShadowsUniform, TonemapUniform, MAX_SHADOWS,
};

use super::raster::{rasterize_triangle, ClipVertex, Fragment, VARYINGS};
use super::{Attachment, Image, Inputs};

const AMBIENT: f32 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Program {
    Geometry,
    ShadowDepth,
    Lighting,
    Tonemap,
    Copy,
    /// No native equivalent: draws are counted but do not write.
    Recorded,
}

impl Program {
    pub fn resolve(vertex: &str, fragment: &str) -> Self {
        if fragment == shaders::SHADOW_FS.name {
            return Self::ShadowDepth;
        }
        if vertex == shaders::GEOMETRY_VS.name && fragment == shaders::GEOMETRY_FS.name {
            return Self::Geometry;
        }
        if vertex == shaders::FULLSCREEN_VS.name {
            if fragment == shaders::LIGHTING_FS.name {
                return Self::Lighting;
            }
            if fragment == shaders::TONEMAP_FS.name {
                return Self::Tonemap;
            }
            if fragment == shaders::COPY_FS.name {
                return Self::Copy;
            }
        }
        Self::Recorded
    }
}

/// True if some native program executes the shader with this name.
pub(crate) fn is_native(name: &str) -> bool {
    [
        shaders::GEOMETRY_VS,
        shaders::GEOMETRY_FS,
        shaders::SHADOW_VS,
        shaders::SHADOW_FS,
        shaders::FULLSCREEN_VS,
        shaders::LIGHTING_FS,
        shaders::TONEMAP_FS,
        shaders::COPY_FS,
    ]
    .iter()
    .any(|shader| shader.name == name)
}

fn identity_matrices() -> MatricesBinding {
    MatricesBinding {
        model: Mat4::IDENTITY.to_cols_array_2d(),
        view: Mat4::IDENTITY.to_cols_array_2d(),
        projection: Mat4::IDENTITY.to_cols_array_2d(),
        camera_position: [0.0; 4],
    }
}

fn store(format: TextureFormat, value: [f32; 4]) -> [f32; 4] {
    match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => value.map(|c| c.clamp(0.0, 1.0)),
        _ => value,
    }
}

fn blend(mode: BlendMode, dst: [f32; 4], src: [f32; 4]) -> [f32; 4] {
    match mode {
        BlendMode::Replace => src,
        BlendMode::Alpha => {
            let a = src[3];
            [
                src[0] * a + dst[0] * (1.0 - a),
                src[1] * a + dst[1] * (1.0 - a),
                src[2] * a + dst[2] * (1.0 - a),
                a + dst[3] * (1.0 - a),
            ]
        }
        BlendMode::Additive => [dst[0] + src[0], dst[1] + src[1], dst[2] + src[2], dst[3] + src[3]],
    }
}

fn depth_passes(compare: CompareFunction, incoming: f32, stored: f32) -> bool {
    match compare {
        CompareFunction::Less => incoming < stored,
        CompareFunction::LessEqual => incoming <= stored,
        CompareFunction::Always => true,
    }
}

/// Runs the geometry or shadow program over an indexed triangle list.
#[allow(clippy::too_many_arguments)]
pub(crate) fn rasterize_mesh(
    program: Program,
    inputs: &Inputs<'_>,
    vertex_bytes: &[u8],
    indices: &[u32],
    options: &PipelineOptions,
    viewport: Viewport,
    colors: &mut [Attachment],
    depth: Option<&mut Attachment>,
) {
    let vertices: Vec<Vertex> = vertex_bytes
        .chunks_exact(Vertex::STRIDE)
        .map(bytemuck::pod_read_unaligned)
        .collect();
    let matrices = inputs.uniform::<MatricesBinding>(0).unwrap_or_else(identity_matrices);
    let model = matrices.model();
    let view_projection = matrices.projection() * matrices.view();
    let normal_matrix = Mat3::from_mat4(model);

    let material = inputs.uniform::<MaterialUniform>(1).unwrap_or_default();
    let albedo_map = material
        .uses_map(MaterialUniform::ALBEDO_MAP)
        .then(|| inputs.texture(2))
        .flatten();
    let emission_map = material
        .uses_map(MaterialUniform::EMISSION_MAP)
        .then(|| inputs.texture(7))
        .flatten();

    let formats: Vec<TextureFormat> = colors.iter().map(|a| a.texture.desc.format).collect();
    let mut color_images: Vec<&mut Image> = colors.iter_mut().filter_map(Attachment::image_mut).collect();
    let mut depth_image = depth.and_then(Attachment::image_mut);

    let transform = |vertex: &Vertex| {
        let world = model * Vec4::from((vertex.position(), 1.0));
        let normal = (normal_matrix * vertex.normal()).normalize_or_zero();
        let mut varyings = [0.0; VARYINGS];
        varyings[0..3].copy_from_slice(&world.truncate().to_array());
        varyings[3..6].copy_from_slice(&normal.to_array());
        varyings[6..8].copy_from_slice(&vertex.uv);
        ClipVertex {
            clip: view_projection * world,
            varyings,
        }
    };

    let mut shade = |fragment: Fragment| {
        let z = fragment.depth + options.depth_bias;
        if let Some(depth) = depth_image.as_deref_mut() {
            if options.depth_test && !depth_passes(options.depth_compare, z, depth.get(fragment.x, fragment.y)[0]) {
                return;
            }
            if options.depth_write {
                depth.set(fragment.x, fragment.y, [z, 0.0, 0.0, 1.0]);
            }
        }
        if program != Program::Geometry {
            return;
        }

        let v = fragment.varyings;
        let (u, tv) = (v[6], v[7]);
        let mut albedo = material.albedo;
        if let Some(map) = albedo_map {
            let texel = map.sample(u, tv, true);
            for (a, t) in albedo.iter_mut().zip(texel) {
                *a *= t;
            }
        }
        let strength = material.emission[3];
        let emission = match emission_map {
            Some(map) => {
                let t = map.sample(u, tv, true);
                [t[0] * strength, t[1] * strength, t[2] * strength, 1.0]
            }
            None => [
                material.emission[0] * strength,
                material.emission[1] * strength,
                material.emission[2] * strength,
                1.0,
            ],
        };
        let normal = Vec3::new(v[3], v[4], v[5]).normalize_or_zero();
        let outputs = [
            [v[0], v[1], v[2], 1.0],
            albedo,
            normal.extend(1.0).to_array(),
            [material.params[0], material.params[1], material.params[2], 1.0],
            emission,
        ];
        for ((image, format), value) in color_images.iter_mut().zip(&formats).zip(outputs) {
            let dst = image.get(fragment.x, fragment.y);
            image.set(fragment.x, fragment.y, store(*format, blend(options.blend, dst, value)));
        }
    };

    for triangle in indices.chunks_exact(3) {
        let Some(corners) = triangle
            .iter()
            .map(|&i| vertices.get(i as usize).map(transform))
            .collect::<Option<Vec<_>>>()
        else {
            log::warn!("SoftwareBackend: index out of range, triangle skipped");
            continue;
        };
        rasterize_triangle([corners[0], corners[1], corners[2]], options.cull_mode, viewport, &mut shade);
    }
}

/// Runs a full-screen program over every pixel of the viewport.
pub(crate) fn shade_fullscreen(program: Program, inputs: &Inputs<'_>, viewport: Viewport, output: &mut Attachment) {
    let format = output.texture.desc.format;
    let Some(image) = output.image_mut() else {
        return;
    };
    let context = FullscreenContext::new(inputs);
    let (width, height) = (viewport.width.max(1) as f32, viewport.height.max(1) as f32);

    for y in viewport.y..viewport.y + viewport.height {
        for x in viewport.x..viewport.x + viewport.width {
            let u = (x - viewport.x) as f32 / width + 0.5 / width;
            let v = (y - viewport.y) as f32 / height + 0.5 / height;
            let value = match program {
                Program::Lighting => context.lighting(u, v),
                Program::Tonemap => context.tonemap(u, v),
                Program::Copy => context.copy(u, v),
                _ => None,
            };
            if let Some(value) = value {
                image.set(x, y, store(format, value));
            }
        }
    }
}

/// Uniforms are read once per draw, textures per pixel.
struct FullscreenContext<'a> {
    inputs: &'a Inputs<'a>,
    lights: Box<LightsUniform>,
    shadows: ShadowsUniform,
    tonemap: TonemapUniform,
}

impl<'a> FullscreenContext<'a> {
    fn new(inputs: &'a Inputs<'a>) -> Self {
        Self {
            inputs,
            lights: Box::new(inputs.uniform::<LightsUniform>(7).unwrap_or_default()),
            shadows: inputs.uniform::<ShadowsUniform>(8).unwrap_or_default(),
            tonemap: inputs.uniform::<TonemapUniform>(7).unwrap_or_default(),
        }
    }

    fn sample(&self, slot: u32, u: f32, v: f32) -> Option<[f32; 4]> {
        self.inputs.texture(slot).map(|image| image.sample(u, v, false))
    }

    fn copy(&self, u: f32, v: f32) -> Option<[f32; 4]> {
        self.sample(1, u, v)
    }

    fn lighting(&self, u: f32, v: f32) -> Option<[f32; 4]> {
        let depth = self.sample(6, u, v)?[0];
        if depth >= 1.0 {
            return None;
        }
        let position = Vec4::from(self.sample(1, u, v)?).truncate();
        let albedo = Vec4::from(self.sample(2, u, v)?).truncate();
        let normal = Vec4::from(self.sample(3, u, v)?).truncate().normalize_or_zero();
        let combined = self.sample(4, u, v).unwrap_or([0.0, 0.5, 1.0, 1.0]);
        let emission = self.sample(5, u, v).map_or(Vec3::ZERO, |e| Vec4::from(e).truncate());
        let ao = combined[2] * self.sample(16, u, v).map_or(1.0, |t| t[0]);

        let mut direct = Vec3::ZERO;
        for light in self.lights.as_slice() {
            let (l, attenuation) = if light.kind() == GpuLightKind::Directional as u32 {
                (-Vec3::from_slice(&light.direction[..3]).normalize_or_zero(), 1.0)
            } else {
                let to_light = Vec3::from_slice(&light.position[..3]) - position;
                let dist = to_light.length().max(1e-4);
                let l = to_light / dist;
                let mut attenuation = 1.0 / (1.0 + dist * dist);
                if light.kind() == GpuLightKind::Spot as u32 {
                    let theta = l.dot(-Vec3::from_slice(&light.direction[..3]).normalize_or_zero());
                    let epsilon = (light.cutoff[0] - light.cutoff[1]).max(1e-4);
                    attenuation *= ((theta - light.cutoff[1]) / epsilon).clamp(0.0, 1.0);
                }
                (l, attenuation)
            };
            let n_dot_l = normal.dot(l).max(0.0);
            if n_dot_l <= 0.0 {
                continue;
            }
            let visibility = light
                .shadow_index()
                .map_or(1.0, |index| self.shadow_factor(index, position));
            let radiance = Vec3::from_slice(&light.color[..3]) * light.color[3] * attenuation * visibility;
            direct += albedo * radiance * n_dot_l;
        }

        let color = direct + albedo * AMBIENT * ao + emission;
        Some(color.extend(1.0).to_array())
    }

    fn shadow_factor(&self, index: usize, world: Vec3) -> f32 {
        if index >= self.shadows.len() || index >= MAX_SHADOWS {
            return 1.0;
        }
        let shadow = &self.shadows.shadows[index];
        let clip = Mat4::from_cols_array_2d(&shadow.light_space) * world.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        let (u, v) = (ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) || ndc.z > 1.0 {
            return 1.0;
        }
        let Some(closest) = self.sample(9 + index as u32, u, v) else {
            return 1.0;
        };
        if ndc.z - shadow.params[0] > closest[0] {
            0.0
        } else {
            1.0
        }
    }

    fn tonemap(&self, u: f32, v: f32) -> Option<[f32; 4]> {
        let frame = self.sample(1, u, v)?;
        let settings = &self.tonemap;
        let [exposure, gamma, bloom_strength, _] = settings.exposure;
        let [contrast, saturation, brightness, _] = settings.grade;

        let mut color = Vec4::from(frame).truncate();
        if let Some(bloom) = self.sample(2, u, v) {
            color += Vec4::from(bloom).truncate() * bloom_strength;
        }
        color *= exposure;
        color = TonemapOperator::from_index(settings.settings[0]).apply(color);

        color = (color - Vec3::splat(0.5)) * contrast + Vec3::splat(0.5) + Vec3::splat(brightness);
        let luma = color.dot(Vec3::new(0.2126, 0.7152, 0.0722));
        color = Vec3::splat(luma).lerp(color, saturation);
        color *= Vec4::from(settings.tint).truncate();

        let [vignette, radius, _, _] = settings.effects;
        if vignette > 0.0 {
            let d = ((u - 0.5).powi(2) + (v - 0.5).powi(2)).sqrt();
            let falloff = ((d - radius) / (1.0 - radius).max(1e-4)).clamp(0.0, 1.0);
            color *= 1.0 - vignette * falloff;
        }

        let color = color.max(Vec3::ZERO).powf(1.0 / gamma.max(1e-4));
        Some(color.extend(1.0).to_array())
    }
}
