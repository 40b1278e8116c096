//! Bloom: bright-pass extraction followed by a ping-pong separable blur.

use serde::{Deserialize, Serialize};
use umbra_core::events::EventBus;

use super::{EffectDescriptor, PostEffect};
use crate::error::GraphicsError;
use crate::renderer::Renderer;
use crate::resources::Buffer;
use crate::shaders::{self, ShaderProvider};
use crate::types::{Binding, SamplerHandle, TextureHandle};
use crate::uniforms::BloomUniform;

pub mod slots {
    pub const SOURCE: u32 = 1;
    pub const SAMPLER: u32 = 2;
    pub const SETTINGS: u32 = 3;
}

/// Bloom targets are allocated at half the surface resolution.
pub const BLOOM_SCALE: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomSettings {
    pub threshold: f32,
    pub knee: f32,
    /// Blur passes after the threshold, alternating horizontal and vertical.
    pub iterations: u32,
    /// Weight of the bloom term in the tonemap composite.
    pub strength: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            knee: 0.5,
            iterations: 9,
            strength: 0.04,
        }
    }
}

impl BloomSettings {
    fn uniform(&self, horizontal: bool) -> BloomUniform {
        BloomUniform {
            params: [self.threshold, self.knee, if horizontal { 1.0 } else { 0.0 }, 0.0],
        }
    }
}

pub struct Bloom {
    threshold: PostEffect,
    horizontal: PostEffect,
    vertical: PostEffect,
    threshold_uniform: Buffer,
    horizontal_uniform: Buffer,
    vertical_uniform: Buffer,
    last: Option<TextureHandle>,
}

impl Bloom {
    pub fn new(
        renderer: &mut Renderer,
        shaders: &mut dyn ShaderProvider,
        events: &EventBus,
    ) -> Result<Self, GraphicsError> {
        let defaults = BloomSettings::default();
        let mut effect = |label: &str, fragment: &str| {
            PostEffect::new(
                renderer,
                shaders,
                events,
                EffectDescriptor::new(label, shaders::FULLSCREEN_VS.name, fragment).with_scale(BLOOM_SCALE),
            )
        };
        let threshold = effect("bloom/threshold", shaders::BLOOM_THRESHOLD_FS.name)?;
        let horizontal = effect("bloom/horizontal", shaders::BLOOM_BLUR_FS.name)?;
        let vertical = effect("bloom/vertical", shaders::BLOOM_BLUR_FS.name)?;

        Ok(Self {
            threshold,
            horizontal,
            vertical,
            threshold_uniform: renderer.create_uniform("bloom/threshold", &defaults.uniform(false))?,
            horizontal_uniform: renderer.create_uniform("bloom/horizontal", &defaults.uniform(true))?,
            vertical_uniform: renderer.create_uniform("bloom/vertical", &defaults.uniform(false))?,
            last: None,
        })
    }

    /// Result of the last blur, or of the threshold when no blur ran.
    pub fn output(&self) -> Option<TextureHandle> {
        self.last
    }

    pub fn effects(&self) -> [&PostEffect; 3] {
        [&self.threshold, &self.horizontal, &self.vertical]
    }

    /// Extracts the bright part of `frame` and blurs it `iterations` times.
    pub fn apply(
        &mut self,
        renderer: &mut Renderer,
        settings: &BloomSettings,
        frame: TextureHandle,
    ) -> Result<Option<TextureHandle>, GraphicsError> {
        let sampler = renderer.fallbacks()?.linear_sampler.handle();

        let uniform = &self.threshold_uniform;
        let values = settings.uniform(false);
        let mut source = self.threshold.apply(
            renderer,
            &bindings(frame, sampler, uniform),
            |setup| setup.write_uniform(uniform, &values),
            None,
        )?;

        for pass in 0..settings.iterations {
            let Some(input) = source else { break };
            let horizontal = pass % 2 == 0;
            let (effect, uniform) = if horizontal {
                (&mut self.horizontal, &self.horizontal_uniform)
            } else {
                (&mut self.vertical, &self.vertical_uniform)
            };
            let values = settings.uniform(horizontal);
            source = effect.apply(
                renderer,
                &bindings(input, sampler, uniform),
                |setup| setup.write_uniform(uniform, &values),
                None,
            )?;
        }
        self.last = source;
        Ok(source)
    }

    pub fn process_events(&mut self, renderer: &mut Renderer) -> Result<(), GraphicsError> {
        self.threshold.process_events(renderer)?;
        self.horizontal.process_events(renderer)?;
        self.vertical.process_events(renderer)
    }
}

fn bindings(source: TextureHandle, sampler: SamplerHandle, uniform: &Buffer) -> [Binding; 3] {
    [
        Binding::texture(slots::SOURCE, source),
        Binding::sampler(slots::SAMPLER, sampler),
        Binding::buffer(slots::SETTINGS, uniform.handle()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::shaders::BuiltinShaders;
    use crate::types::TextureFormat;
    use rstest::rstest;
    use umbra_core::texture::CpuTexture;

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(9)]
    fn threshold_plus_exact_blur_count(#[case] iterations: u32) {
        let mut renderer = Renderer::with_backend(Box::new(SoftwareBackend::new()), 32, 32);
        let events = EventBus::new();
        let mut bloom = Bloom::new(&mut renderer, &mut BuiltinShaders::new(), &events).unwrap();
        let frame = renderer
            .create_texture_from_cpu(&CpuTexture::solid(32, 32, [255; 4]), "frame")
            .unwrap();

        renderer.begin();
        let out = bloom
            .apply(&mut renderer, &BloomSettings { iterations, ..BloomSettings::default() }, frame.handle())
            .unwrap();
        assert_eq!(renderer.frame_stats().passes, 1 + iterations);

        let [threshold, horizontal, vertical] = bloom.effects();
        let expected = match iterations {
            0 => threshold.output(),
            n if n % 2 == 1 => horizontal.output(),
            _ => vertical.output(),
        };
        assert_eq!(out, expected);
        assert_eq!(bloom.output(), out);
        assert_eq!(
            threshold.target().unwrap().config().unwrap().color_formats,
            vec![TextureFormat::Rgba16Float]
        );
    }

    #[test]
    fn targets_are_half_resolution() {
        let mut renderer = Renderer::with_backend(Box::new(SoftwareBackend::new()), 64, 48);
        let bloom = Bloom::new(&mut renderer, &mut BuiltinShaders::new(), &EventBus::new()).unwrap();
        for effect in bloom.effects() {
            assert_eq!(effect.target().unwrap().size(), (32, 24));
        }
    }
}
