//! GPU uniform layouts shared with the built-in shaders.
//!
//! Every struct here is `#[repr(C)]`, `Pod` and built from 16-byte lanes so
//! that it can be uploaded verbatim into a WGSL `var<uniform>`.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use umbra_core::math::{Mat4, Vec3};

/// Capacity of the lights uniform.
pub const MAX_LIGHTS: usize = 128;
/// Capacity of the shadows uniform (and number of shadow map slots).
pub const MAX_SHADOWS: usize = 4;

/// Light kind encoded in [`GpuLight::position`]`.w`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GpuLightKind {
    Directional = 0,
    Point = 1,
    Spot = 2,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    /// xyz world position, w kind.
    pub position: [f32; 4],
    /// xyz direction the light points at, w range.
    pub direction: [f32; 4],
    /// rgb color, w intensity.
    pub color: [f32; 4],
    /// cos(inner), cos(outer), shadow index or -1, unused.
    pub cutoff: [f32; 4],
}

impl GpuLight {
    pub fn kind(&self) -> u32 {
        self.position[3] as u32
    }

    pub fn shadow_index(&self) -> Option<usize> {
        (self.cutoff[2] >= 0.0).then_some(self.cutoff[2] as usize)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightsUniform {
    /// x = number of valid entries.
    pub count: [u32; 4],
    pub lights: [GpuLight; MAX_LIGHTS],
}

impl LightsUniform {
    pub fn new() -> Self {
        Self::zeroed()
    }

    /// Appends a light. Returns false once the buffer is full.
    pub fn push(&mut self, light: GpuLight) -> bool {
        let index = self.count[0] as usize;
        if index >= MAX_LIGHTS {
            return false;
        }
        self.lights[index] = light;
        self.count[0] += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.count[0] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count[0] == 0
    }

    pub fn as_slice(&self) -> &[GpuLight] {
        &self.lights[..self.len()]
    }
}

impl Default for LightsUniform {
    fn default() -> Self {
        Self::new()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuShadow {
    pub light_space: [[f32; 4]; 4],
    /// x = depth bias.
    pub params: [f32; 4],
}

impl GpuShadow {
    pub fn new(light_space: Mat4, bias: f32) -> Self {
        Self {
            light_space: light_space.to_cols_array_2d(),
            params: [bias, 0.0, 0.0, 0.0],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowsUniform {
    pub count: [u32; 4],
    pub shadows: [GpuShadow; MAX_SHADOWS],
}

impl ShadowsUniform {
    pub fn new() -> Self {
        Self::zeroed()
    }

    /// Appends a shadow entry and returns its index, or `None` when full.
    pub fn push(&mut self, shadow: GpuShadow) -> Option<usize> {
        let index = self.count[0] as usize;
        if index >= MAX_SHADOWS {
            return None;
        }
        self.shadows[index] = shadow;
        self.count[0] += 1;
        Some(index)
    }

    pub fn len(&self) -> usize {
        self.count[0] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count[0] == 0
    }
}

impl Default for ShadowsUniform {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-draw material constants for the geometry pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub albedo: [f32; 4],
    /// rgb color, w strength.
    pub emission: [f32; 4],
    /// metallic, roughness, ao, normal strength.
    pub params: [f32; 4],
    /// Map toggles: albedo, normal, metallic, roughness, ao, emission, unused x2.
    pub maps: [u32; 8],
}

impl MaterialUniform {
    pub const ALBEDO_MAP: usize = 0;
    pub const NORMAL_MAP: usize = 1;
    pub const METALLIC_MAP: usize = 2;
    pub const ROUGHNESS_MAP: usize = 3;
    pub const AO_MAP: usize = 4;
    pub const EMISSION_MAP: usize = 5;

    pub fn uses_map(&self, map: usize) -> bool {
        self.maps.get(map).is_some_and(|flag| *flag != 0)
    }
}

impl Default for MaterialUniform {
    fn default() -> Self {
        Self {
            albedo: [1.0, 1.0, 1.0, 1.0],
            emission: [0.0, 0.0, 0.0, 0.0],
            params: [0.0, 0.5, 1.0, 1.0],
            maps: [0; 8],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GtaoUniform {
    /// near, far, radius, falloff.
    pub params: [f32; 4],
    /// thickness mix, max stride, sample count, unused.
    pub limits: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SsrUniform {
    /// max steps, step size, thickness, max distance.
    pub params: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BloomUniform {
    /// threshold, knee, horizontal flag, unused.
    pub params: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TonemapUniform {
    /// operator, lut enabled, unused x2.
    pub settings: [u32; 4],
    /// exposure, gamma, bloom strength, ssr strength.
    pub exposure: [f32; 4],
    /// contrast, saturation, brightness, time.
    pub grade: [f32; 4],
    /// vignette strength, vignette radius, grain strength, lut strength.
    pub effects: [f32; 4],
    /// rgb tint, unused.
    pub tint: [f32; 4],
}

impl Default for TonemapUniform {
    /// ACES, unit exposure, gamma 2.2 and a neutral grade.
    fn default() -> Self {
        Self {
            settings: [0; 4],
            exposure: [1.0, 2.2, 0.0, 0.0],
            grade: [1.0, 1.0, 0.0, 0.0],
            effects: [0.0; 4],
            tint: [1.0, 1.0, 1.0, 0.0],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PrefilterUniform {
    /// roughness, source resolution, unused x2.
    pub params: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SkyUniform {
    /// xyz direction towards the sun, w sun intensity.
    pub sun: [f32; 4],
    pub zenith: [f32; 4],
    pub horizon: [f32; 4],
    pub ground: [f32; 4],
}

impl SkyUniform {
    pub fn new(sun_direction: Vec3, sun_intensity: f32, zenith: Vec3, horizon: Vec3, ground: Vec3) -> Self {
        Self {
            sun: sun_direction.normalize_or_zero().extend(sun_intensity).to_array(),
            zenith: zenith.extend(1.0).to_array(),
            horizon: horizon.extend(1.0).to_array(),
            ground: ground.extend(1.0).to_array(),
        }
    }
}

impl Default for SkyUniform {
    /// Late-morning sun over a blue sky.
    fn default() -> Self {
        Self::new(
            Vec3::new(0.3, 0.8, 0.2),
            20.0,
            Vec3::new(0.15, 0.3, 0.65),
            Vec3::new(0.7, 0.75, 0.8),
            Vec3::new(0.2, 0.18, 0.15),
        )
    }
}

const_assert_eq!(std::mem::size_of::<GpuLight>(), 64);
const_assert_eq!(std::mem::size_of::<LightsUniform>(), 16 + 64 * MAX_LIGHTS);
const_assert_eq!(std::mem::size_of::<GpuShadow>(), 80);
const_assert_eq!(std::mem::size_of::<ShadowsUniform>(), 16 + 80 * MAX_SHADOWS);
const_assert_eq!(std::mem::size_of::<MaterialUniform>(), 80);
const_assert_eq!(std::mem::size_of::<TonemapUniform>(), 80);
const_assert_eq!(std::mem::size_of::<umbra_core::MatricesBinding>(), 208);

#[cfg(test)]
mod tests {
    use super::*;

    fn light(i: usize) -> GpuLight {
        GpuLight {
            position: [i as f32, 0.0, 0.0, GpuLightKind::Point as u32 as f32],
            direction: [0.0, -1.0, 0.0, 10.0],
            color: [1.0, 1.0, 1.0, 1.0],
            cutoff: [1.0, 1.0, -1.0, 0.0],
        }
    }

    #[test]
    fn lights_truncate_at_capacity() {
        let mut lights = LightsUniform::new();
        let accepted = (0..200).filter(|&i| lights.push(light(i))).count();
        assert_eq!(accepted, MAX_LIGHTS);
        assert_eq!(lights.len(), MAX_LIGHTS);
        assert_eq!(lights.as_slice()[127].position[0], 127.0);
    }

    #[test]
    fn shadows_truncate_at_capacity() {
        let mut shadows = ShadowsUniform::new();
        let indices: Vec<_> = (0..10)
            .map(|_| shadows.push(GpuShadow::new(Mat4::IDENTITY, 0.005)))
            .collect();
        assert_eq!(shadows.len(), MAX_SHADOWS);
        assert_eq!(indices[3], Some(3));
        assert!(indices[4..].iter().all(Option::is_none));
    }

    #[test]
    fn material_default_is_constant_white() {
        let material = MaterialUniform::default();
        assert_eq!(material.albedo, [1.0; 4]);
        assert!(!material.uses_map(MaterialUniform::ALBEDO_MAP));
    }

    #[test]
    fn shadow_index_decoding() {
        let mut l = light(0);
        assert_eq!(l.shadow_index(), None);
        l.cutoff[2] = 2.0;
        assert_eq!(l.shadow_index(), Some(2));
        assert_eq!(l.kind(), GpuLightKind::Point as u32);
    }
}
