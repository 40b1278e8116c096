//! Final composite: reflections, bloom, exposure, tonemap operator and color
//! grading, written into the presentation target.

use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};
use umbra_core::events::EventBus;

use super::{EffectDescriptor, PostEffect};
use crate::error::GraphicsError;
use crate::renderer::Renderer;
use crate::resources::{Buffer, RenderTarget};
use crate::shaders::{self, ShaderProvider};
use crate::types::{Binding, TextureHandle};
use crate::uniforms::TonemapUniform;

/// Binding slots of the tonemap program.
pub mod slots {
    pub const FRAME: u32 = 1;
    pub const BLOOM: u32 = 2;
    pub const SSR: u32 = 3;
    pub const ALBEDO: u32 = 4;
    pub const COMBINED: u32 = 5;
    pub const LUT: u32 = 6;
    pub const SETTINGS: u32 = 7;
    pub const SAMPLER: u32 = 8;
}

/// Tonemap curve, selected by index in the shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TonemapOperator {
    #[default]
    Aces,
    AcesFilm,
    Reinhard,
    Uncharted2,
    Filmic,
    Lottes,
}

impl TonemapOperator {
    pub const ALL: [Self; 6] = [
        Self::Aces,
        Self::AcesFilm,
        Self::Reinhard,
        Self::Uncharted2,
        Self::Filmic,
        Self::Lottes,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    /// Out-of-range indices select ACES.
    pub fn from_index(index: u32) -> Self {
        Self::ALL.get(index as usize).copied().unwrap_or_default()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Aces => "ACES",
            Self::AcesFilm => "ACES Film",
            Self::Reinhard => "Reinhard",
            Self::Uncharted2 => "Uncharted 2",
            Self::Filmic => "Filmic",
            Self::Lottes => "Lottes",
        }
    }

    /// Maps linear HDR color to linear [0, 1].
    pub fn apply(self, color: Vec3) -> Vec3 {
        match self {
            Self::Aces => {
                let x = color;
                ((x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14)).clamp(Vec3::ZERO, Vec3::ONE)
            }
            Self::AcesFilm => {
                let to_rrt = Mat3::from_cols(
                    Vec3::new(0.59719, 0.07600, 0.02840),
                    Vec3::new(0.35458, 0.90834, 0.13383),
                    Vec3::new(0.04823, 0.01566, 0.83777),
                );
                let from_odt = Mat3::from_cols(
                    Vec3::new(1.60475, -0.10208, -0.00327),
                    Vec3::new(-0.53108, 1.10813, -0.07276),
                    Vec3::new(-0.07367, -0.00605, 1.07602),
                );
                let v = to_rrt * color;
                let a = v * (v + 0.0245786) - 0.000090537;
                let b = v * (0.983729 * v + 0.4329510) + 0.238081;
                (from_odt * (a / b)).clamp(Vec3::ZERO, Vec3::ONE)
            }
            Self::Reinhard => color / (Vec3::ONE + color),
            Self::Uncharted2 => {
                fn partial(x: Vec3) -> Vec3 {
                    let (a, b, c, d, e, f) = (0.15, 0.50, 0.10, 0.20, 0.02, 0.30);
                    (x * (a * x + c * b) + d * e) / (x * (a * x + b) + d * f) - e / f
                }
                partial(color * 2.0) / partial(Vec3::splat(11.2))
            }
            Self::Filmic => {
                let c = (color - 0.004).max(Vec3::ZERO);
                let mapped = (c * (6.2 * c + 0.5)) / (c * (6.2 * c + 1.7) + 0.06);
                // The curve bakes in gamma; undo it for the shared gamma step.
                mapped.powf(2.2)
            }
            Self::Lottes => {
                let (a, d) = (1.6f32, 0.977f32);
                let (hdr_max, mid_in, mid_out) = (8.0f32, 0.18f32, 0.267f32);
                let denom = (hdr_max.powf(a * d) - mid_in.powf(a * d)) * mid_out;
                let b = (-mid_in.powf(a) + hdr_max.powf(a) * mid_out) / denom;
                let c = (hdr_max.powf(a * d) * mid_in.powf(a) - hdr_max.powf(a) * mid_in.powf(a * d) * mid_out) / denom;
                let x = color.max(Vec3::ZERO);
                x.powf(a) / (x.powf(a * d) * b + c)
            }
        }
    }
}

/// Grading parameters of the final composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TonemapSettings {
    pub operator: TonemapOperator,
    pub exposure: f32,
    pub gamma: f32,
    pub ssr_strength: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub brightness: f32,
    pub vignette_strength: f32,
    pub vignette_radius: f32,
    pub grain_strength: f32,
    pub lut_strength: f32,
    pub tint: [f32; 3],
}

impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            operator: TonemapOperator::Aces,
            exposure: 1.0,
            gamma: 2.2,
            ssr_strength: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            brightness: 0.0,
            vignette_strength: 0.0,
            vignette_radius: 0.75,
            grain_strength: 0.0,
            lut_strength: 1.0,
            tint: [1.0; 3],
        }
    }
}

impl TonemapSettings {
    /// Packs the settings; `time` animates the film grain.
    pub fn uniform(&self, time: f32, lut_enabled: bool, bloom_strength: f32) -> TonemapUniform {
        TonemapUniform {
            settings: [self.operator.index(), u32::from(lut_enabled), 0, 0],
            exposure: [self.exposure, self.gamma, bloom_strength, self.ssr_strength],
            grade: [self.contrast, self.saturation, self.brightness, time],
            effects: [
                self.vignette_strength,
                self.vignette_radius,
                self.grain_strength,
                self.lut_strength,
            ],
            tint: [self.tint[0], self.tint[1], self.tint[2], 0.0],
        }
    }
}

/// Textures consumed by the composite. Missing optional inputs are replaced
/// by the renderer's black fallback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonemapInputs {
    pub frame: TextureHandle,
    pub bloom: Option<TextureHandle>,
    /// Weight of `bloom` in the composite, taken from the bloom settings.
    pub bloom_strength: f32,
    pub ssr: Option<TextureHandle>,
    pub albedo: TextureHandle,
    pub combined: TextureHandle,
    pub lut: Option<TextureHandle>,
}

/// The tonemap stage. Writes only into caller-supplied targets.
pub struct Tonemap {
    effect: PostEffect,
    uniform: Buffer,
}

impl Tonemap {
    pub fn new(
        renderer: &mut Renderer,
        shaders: &mut dyn ShaderProvider,
        events: &EventBus,
    ) -> Result<Self, GraphicsError> {
        let effect = PostEffect::new(
            renderer,
            shaders,
            events,
            EffectDescriptor::new("tonemap", shaders::FULLSCREEN_VS.name, shaders::TONEMAP_FS.name).external(),
        )?;
        let uniform = renderer.create_uniform("tonemap/settings", &TonemapUniform::default())?;
        Ok(Self { effect, uniform })
    }

    pub fn effect(&self) -> &PostEffect {
        &self.effect
    }

    /// Composites `inputs` into `target`.
    pub fn apply(
        &mut self,
        renderer: &mut Renderer,
        settings: &TonemapSettings,
        time: f32,
        inputs: &TonemapInputs,
        target: &RenderTarget,
    ) -> Result<Option<TextureHandle>, GraphicsError> {
        let fallbacks = renderer.fallbacks()?;
        let black = fallbacks.black.handle();
        let white = fallbacks.white.handle();
        let sampler = fallbacks.linear_sampler.handle();

        let resources = [
            Binding::texture(slots::FRAME, inputs.frame),
            Binding::texture(slots::BLOOM, inputs.bloom.unwrap_or(black)),
            Binding::texture(slots::SSR, inputs.ssr.unwrap_or(black)),
            Binding::texture(slots::ALBEDO, inputs.albedo),
            Binding::texture(slots::COMBINED, inputs.combined),
            Binding::texture(slots::LUT, inputs.lut.unwrap_or(white)),
            Binding::buffer(slots::SETTINGS, self.uniform.handle()),
            Binding::sampler(slots::SAMPLER, sampler),
        ];
        let bloom_strength = if inputs.bloom.is_some() { inputs.bloom_strength } else { 0.0 };
        let values = settings.uniform(time, inputs.lut.is_some(), bloom_strength);
        let uniform = &self.uniform;
        self.effect.apply(
            renderer,
            &resources,
            |setup| setup.write_uniform(uniform, &values),
            Some(target),
        )
    }

    pub fn process_events(&mut self, renderer: &mut Renderer) -> Result<(), GraphicsError> {
        self.effect.process_events(renderer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, TonemapOperator::Aces)]
    #[case(1, TonemapOperator::AcesFilm)]
    #[case(2, TonemapOperator::Reinhard)]
    #[case(3, TonemapOperator::Uncharted2)]
    #[case(4, TonemapOperator::Filmic)]
    #[case(5, TonemapOperator::Lottes)]
    fn operator_index_round_trip(#[case] index: u32, #[case] operator: TonemapOperator) {
        assert_eq!(TonemapOperator::from_index(index), operator);
        assert_eq!(operator.index(), index);
    }

    #[test]
    fn unknown_index_falls_back_to_aces() {
        assert_eq!(TonemapOperator::from_index(42), TonemapOperator::Aces);
    }

    #[rstest]
    #[case(TonemapOperator::Aces)]
    #[case(TonemapOperator::AcesFilm)]
    #[case(TonemapOperator::Reinhard)]
    #[case(TonemapOperator::Uncharted2)]
    #[case(TonemapOperator::Filmic)]
    #[case(TonemapOperator::Lottes)]
    fn operators_are_monotonic_and_bounded(#[case] operator: TonemapOperator) {
        let dark = operator.apply(Vec3::splat(0.05));
        let mid = operator.apply(Vec3::splat(0.5));
        let bright = operator.apply(Vec3::splat(4.0));
        assert!(dark.x < mid.x && mid.x < bright.x, "{}", operator.name());
        assert!(bright.x <= 1.05, "{} overshoots: {}", operator.name(), bright.x);
        assert!(operator.apply(Vec3::ZERO).x.abs() < 0.01);
    }

    #[test]
    fn reinhard_is_x_over_one_plus_x() {
        let mapped = TonemapOperator::Reinhard.apply(Vec3::new(1.0, 3.0, 0.0));
        assert!((mapped - Vec3::new(0.5, 0.75, 0.0)).length() < 1e-6);
    }

    #[test]
    fn settings_pack_into_uniform() {
        let settings = TonemapSettings {
            operator: TonemapOperator::Lottes,
            exposure: 2.0,
            ..TonemapSettings::default()
        };
        let uniform = settings.uniform(3.5, true, 0.25);
        assert_eq!(uniform.settings[..2], [5, 1]);
        assert_eq!(uniform.exposure[0], 2.0);
        assert_eq!(uniform.exposure[2], 0.25);
        assert_eq!(uniform.grade[3], 3.5);
    }

    fn composite(bloom_strength: f32) -> [f32; 4] {
        use crate::backend::SoftwareBackend;
        use crate::shaders::BuiltinShaders;
        use crate::resources::RenderTargetConfig;
        use crate::types::TextureFormat;
        use umbra_core::texture::CpuTexture;

        let mut renderer = Renderer::with_backend(Box::new(SoftwareBackend::new()), 8, 8);
        let events = EventBus::new();
        let mut tonemap = Tonemap::new(&mut renderer, &mut BuiltinShaders::new(), &events).unwrap();
        let frame = renderer
            .create_texture_from_cpu(&CpuTexture::solid(8, 8, [64, 64, 64, 255]), "frame")
            .unwrap();
        let bloom = renderer
            .create_texture_from_cpu(&CpuTexture::solid(8, 8, [255, 255, 255, 255]), "bloom")
            .unwrap();
        let target = renderer
            .create_render_target(&RenderTargetConfig::new(8, 8).with_color(TextureFormat::Rgba16Float))
            .unwrap();
        let inputs = TonemapInputs {
            frame: frame.handle(),
            bloom: Some(bloom.handle()),
            bloom_strength,
            ssr: None,
            albedo: frame.handle(),
            combined: frame.handle(),
            lut: None,
        };

        renderer.begin();
        tonemap
            .apply(&mut renderer, &TonemapSettings::default(), 0.0, &inputs, &target)
            .unwrap();
        renderer.end();
        renderer.submit().unwrap();
        let readback = renderer.read_texture(target.color_texture(0).unwrap(), 0, 0).unwrap();
        readback.pixel(4, 4).unwrap()
    }

    #[test]
    fn bloom_strength_brightens_the_composite() {
        let none = composite(0.0);
        let weak = composite(0.1);
        let strong = composite(1.0);
        assert!(none[0] < weak[0], "{none:?} vs {weak:?}");
        assert!(weak[0] < strong[0], "{weak:?} vs {strong:?}");
    }
}
