//! Ground-truth ambient occlusion from the depth buffer, then a box-blur
//! denoise.

use serde::{Deserialize, Serialize};
use umbra_core::events::EventBus;

use super::{EffectDescriptor, PostEffect};
use crate::error::GraphicsError;
use crate::renderer::Renderer;
use crate::resources::Buffer;
use crate::shaders::{self, ShaderProvider};
use crate::types::{Binding, TextureFormat, TextureHandle};
use crate::uniforms::GtaoUniform;

pub mod slots {
    pub const DEPTH: u32 = 1;
    pub const SETTINGS: u32 = 2;
    /// Input of the blur pass.
    pub const AO: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GtaoSettings {
    pub samples: u32,
    pub radius: f32,
    pub falloff: f32,
    pub thickness_mix: f32,
    pub max_stride: u32,
}

impl Default for GtaoSettings {
    fn default() -> Self {
        Self {
            samples: 8,
            radius: 0.5,
            falloff: 0.6,
            thickness_mix: 0.2,
            max_stride: 16,
        }
    }
}

impl GtaoSettings {
    pub fn uniform(&self, near: f32, far: f32) -> GtaoUniform {
        GtaoUniform {
            params: [near, far, self.radius, self.falloff],
            limits: [self.thickness_mix, self.max_stride as f32, self.samples as f32, 0.0],
        }
    }
}

pub struct Gtao {
    estimate: PostEffect,
    blur: PostEffect,
    uniform: Buffer,
}

impl Gtao {
    pub fn new(
        renderer: &mut Renderer,
        shaders: &mut dyn ShaderProvider,
        events: &EventBus,
    ) -> Result<Self, GraphicsError> {
        let estimate = PostEffect::new(
            renderer,
            shaders,
            events,
            EffectDescriptor::new("gtao", shaders::FULLSCREEN_VS.name, shaders::GTAO_FS.name)
                .with_format(TextureFormat::Rgba8Unorm),
        )?;
        let blur = PostEffect::new(
            renderer,
            shaders,
            events,
            EffectDescriptor::new("gtao/blur", shaders::FULLSCREEN_VS.name, shaders::GTAO_BLUR_FS.name)
                .with_format(TextureFormat::Rgba8Unorm),
        )?;
        let uniform = renderer.create_uniform("gtao/settings", &GtaoSettings::default().uniform(0.1, 100.0))?;
        Ok(Self { estimate, blur, uniform })
    }

    /// The denoised occlusion from the last run.
    pub fn output(&self) -> Option<TextureHandle> {
        self.blur.output()
    }

    pub fn effects(&self) -> [&PostEffect; 2] {
        [&self.estimate, &self.blur]
    }

    /// Estimates occlusion from `depth` seen through a camera with the given
    /// clip planes.
    pub fn apply(
        &mut self,
        renderer: &mut Renderer,
        settings: &GtaoSettings,
        (near, far): (f32, f32),
        depth: TextureHandle,
    ) -> Result<Option<TextureHandle>, GraphicsError> {
        let uniform = &self.uniform;
        let values = settings.uniform(near, far);
        let raw = self.estimate.apply(
            renderer,
            &[
                Binding::texture(slots::DEPTH, depth),
                Binding::buffer(slots::SETTINGS, uniform.handle()),
            ],
            |setup| setup.write_uniform(uniform, &values),
            None,
        )?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        self.blur
            .apply(renderer, &[Binding::texture(slots::AO, raw)], |_| {}, None)
    }

    pub fn process_events(&mut self, renderer: &mut Renderer) -> Result<(), GraphicsError> {
        self.estimate.process_events(renderer)?;
        self.blur.process_events(renderer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::shaders::BuiltinShaders;

    #[test]
    fn estimate_then_blur() {
        let mut renderer = Renderer::with_backend(Box::new(SoftwareBackend::new()), 16, 16);
        let mut gtao = Gtao::new(&mut renderer, &mut BuiltinShaders::new(), &EventBus::new()).unwrap();
        let depth = renderer.fallbacks().unwrap().depth.handle();

        renderer.begin();
        let out = gtao
            .apply(&mut renderer, &GtaoSettings::default(), (0.1, 50.0), depth)
            .unwrap();
        assert_eq!(renderer.frame_stats().passes, 2);
        assert_eq!(out, gtao.output());
        assert_eq!(out, Some(gtao.effects()[1].target().unwrap().color_views()[0].texture));
    }

    #[test]
    fn uniform_layout() {
        let settings = GtaoSettings {
            samples: 12,
            max_stride: 4,
            ..GtaoSettings::default()
        };
        let uniform = settings.uniform(0.5, 80.0);
        assert_eq!(uniform.params[..2], [0.5, 80.0]);
        assert_eq!(uniform.limits[1..3], [4.0, 12.0]);
    }
}
