//! Screen-space reflections.
//!
//! The ray march writes into a reflection target with a mip chain; the chain
//! is rebuilt after every run so the composite can pick a blurrier level for
//! rougher surfaces instead of running a separate blur.

use serde::{Deserialize, Serialize};
use umbra_core::events::{EventBus, Listener, WindowResize};

use super::{EffectDescriptor, PostEffect};
use crate::error::GraphicsError;
use crate::renderer::Renderer;
use crate::resources::{Buffer, RenderTarget, RenderTargetConfig};
use crate::shaders::{self, ShaderProvider};
use crate::types::{Binding, TextureFormat, TextureHandle};
use crate::uniforms::SsrUniform;

pub mod slots {
    pub const FRAME: u32 = 1;
    pub const POSITION: u32 = 2;
    pub const NORMAL: u32 = 3;
    pub const COMBINED: u32 = 4;
    pub const DEPTH: u32 = 5;
    pub const SETTINGS: u32 = 6;
}

/// Mips of the reflection target. The composite samples up to
/// `roughness * (SSR_MIPS - 1)`.
pub const SSR_MIPS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsrSettings {
    pub max_steps: u32,
    pub step_size: f32,
    pub thickness: f32,
    pub max_distance: f32,
}

impl Default for SsrSettings {
    fn default() -> Self {
        Self {
            max_steps: 64,
            step_size: 0.1,
            thickness: 0.2,
            max_distance: 20.0,
        }
    }
}

impl SsrSettings {
    pub fn uniform(&self) -> SsrUniform {
        SsrUniform {
            params: [self.max_steps as f32, self.step_size, self.thickness, self.max_distance],
        }
    }
}

/// G-buffer views and the lit frame consumed by the ray march.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsrInputs {
    pub frame: TextureHandle,
    pub position: TextureHandle,
    pub normal: TextureHandle,
    pub combined: TextureHandle,
    pub depth: TextureHandle,
}

pub struct Ssr {
    effect: PostEffect,
    target: RenderTarget,
    uniform: Buffer,
    resize: Listener<WindowResize>,
}

impl Ssr {
    pub fn new(
        renderer: &mut Renderer,
        shaders: &mut dyn ShaderProvider,
        events: &EventBus,
    ) -> Result<Self, GraphicsError> {
        let effect = PostEffect::new(
            renderer,
            shaders,
            events,
            EffectDescriptor::new("ssr", shaders::FULLSCREEN_VS.name, shaders::SSR_FS.name).external(),
        )?;
        let (width, height) = renderer.surface_size();
        let target = renderer.create_render_target(&target_config(width, height))?;
        let uniform = renderer.create_uniform("ssr/settings", &SsrSettings::default().uniform())?;
        Ok(Self {
            effect,
            target,
            uniform,
            resize: events.listen(),
        })
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn effect(&self) -> &PostEffect {
        &self.effect
    }

    pub fn output(&self) -> Option<TextureHandle> {
        self.effect.output()
    }

    /// Marches reflections into the reflection target and rebuilds its mips.
    pub fn apply(
        &mut self,
        renderer: &mut Renderer,
        settings: &SsrSettings,
        inputs: &SsrInputs,
    ) -> Result<Option<TextureHandle>, GraphicsError> {
        let uniform = &self.uniform;
        let values = settings.uniform();
        let resources = [
            Binding::texture(slots::FRAME, inputs.frame),
            Binding::texture(slots::POSITION, inputs.position),
            Binding::texture(slots::NORMAL, inputs.normal),
            Binding::texture(slots::COMBINED, inputs.combined),
            Binding::texture(slots::DEPTH, inputs.depth),
            Binding::buffer(slots::SETTINGS, uniform.handle()),
        ];
        let output = self.effect.apply(
            renderer,
            &resources,
            |setup| setup.write_uniform(uniform, &values),
            Some(&self.target),
        )?;
        if let Some(texture) = self.target.color_texture(0) {
            renderer.generate_mipmaps(texture)?;
        }
        Ok(output)
    }

    pub fn process_events(&mut self, renderer: &mut Renderer) -> Result<(), GraphicsError> {
        if let Some(resize) = self.resize.latest() {
            renderer.resize_render_target(&mut self.target, resize.width, resize.height)?;
            log::debug!("Ssr: resized to {}x{}", resize.width, resize.height);
        }
        self.effect.process_events(renderer)
    }
}

fn target_config(width: u32, height: u32) -> RenderTargetConfig {
    RenderTargetConfig::new(width, height)
        .with_color(TextureFormat::Rgba16Float)
        .with_mips(SSR_MIPS)
        .with_label("ssr")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::shaders::BuiltinShaders;

    #[test]
    fn writes_reflection_target_with_mips() {
        let mut renderer = Renderer::with_backend(Box::new(SoftwareBackend::new()), 32, 32);
        let events = EventBus::new();
        let mut ssr = Ssr::new(&mut renderer, &mut BuiltinShaders::new(), &events).unwrap();
        let fallbacks = renderer.fallbacks().unwrap();
        let (black, depth) = (fallbacks.black.handle(), fallbacks.depth.handle());
        let inputs = SsrInputs {
            frame: black,
            position: black,
            normal: black,
            combined: black,
            depth,
        };

        renderer.begin();
        let out = ssr.apply(&mut renderer, &SsrSettings::default(), &inputs).unwrap();
        assert_eq!(out, Some(ssr.target().color_views()[0].texture));
        assert_eq!(ssr.target().color_texture(0).unwrap().mip_levels(), SSR_MIPS);
        assert!(ssr.effect().target().is_none());
    }

    #[test]
    fn resize_keeps_mip_count() {
        let mut renderer = Renderer::with_backend(Box::new(SoftwareBackend::new()), 32, 32);
        let events = EventBus::new();
        let mut ssr = Ssr::new(&mut renderer, &mut BuiltinShaders::new(), &events).unwrap();
        let old = ssr.target().handle();

        events.dispatch(WindowResize { width: 800, height: 600 });
        ssr.process_events(&mut renderer).unwrap();
        renderer.collect_garbage();

        assert_eq!(ssr.target().size(), (800, 600));
        assert_eq!(ssr.target().color_texture(0).unwrap().mip_levels(), SSR_MIPS);
        assert_eq!(renderer.release_count(old), 1);
    }
}
