//! Full-screen post-processing passes.
//!
//! Every effect in the chain is built on [`PostEffect`]: a pipeline made from
//! a vertex + fragment shader pair, a screen quad and, optionally, an owned
//! output target. Effects listen on the event bus for window resizes (owned
//! outputs are reallocated at the new size divided by the effect's scale)
//! and for fragment shader reloads (the pipeline is rebuilt). The mailboxes
//! are drained by [`PostEffect::process_events`] between frames.
//!
//! The concrete stages live in the submodules and run in this order:
//! [`gtao`], [`ssr`], [`bloom`], [`tonemap`].

pub mod bloom;
pub mod gtao;
pub mod ssr;
pub mod tonemap;

pub use bloom::{Bloom, BloomSettings};
pub use gtao::{Gtao, GtaoSettings};
pub use ssr::{Ssr, SsrInputs, SsrSettings};
pub use tonemap::{Tonemap, TonemapInputs, TonemapOperator, TonemapSettings};

use umbra_core::asset::{AssetKind, Handle};
use umbra_core::events::{AssetLoaded, EventBus, Listener, WindowResize};

use crate::error::GraphicsError;
use crate::mesh::Mesh;
use crate::renderer::{PassSetup, Renderer};
use crate::resources::{RenderTarget, RenderTargetConfig, Shader};
use crate::shaders::ShaderProvider;
use crate::types::{Binding, PipelineHandle, PipelineOptions, TextureFormat, TextureHandle};

/// Where an effect writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectOutput {
    /// The effect owns a target sized `surface / scale` (at least 1x1).
    Owned { scale: u32 },
    /// The effect only ever writes into targets supplied by the caller.
    External,
}

/// Construction parameters of a [`PostEffect`].
#[derive(Debug, Clone)]
pub struct EffectDescriptor {
    pub label: String,
    pub vertex: String,
    pub fragment: String,
    pub format: TextureFormat,
    pub output: EffectOutput,
    pub mip_levels: u32,
}

impl EffectDescriptor {
    pub fn new(label: impl Into<String>, vertex: &str, fragment: &str) -> Self {
        Self {
            label: label.into(),
            vertex: vertex.to_string(),
            fragment: fragment.to_string(),
            format: TextureFormat::Rgba16Float,
            output: EffectOutput::Owned { scale: 1 },
            mip_levels: 1,
        }
    }

    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_scale(mut self, scale: u32) -> Self {
        self.output = EffectOutput::Owned { scale: scale.max(1) };
        self
    }

    pub fn external(mut self) -> Self {
        self.output = EffectOutput::External;
        self
    }
}

/// Scales a surface size down by `scale`, never below one texel.
pub(crate) fn scaled_size((width, height): (u32, u32), scale: u32) -> (u32, u32) {
    let scale = scale.max(1);
    ((width / scale).max(1), (height / scale).max(1))
}

/// One full-screen draw with its own pipeline and optional output.
pub struct PostEffect {
    label: String,
    vertex: Handle<Shader>,
    fragment: Handle<Shader>,
    pipeline: Option<PipelineHandle>,
    quad: Mesh,
    output: EffectOutput,
    format: TextureFormat,
    mip_levels: u32,
    target: Option<RenderTarget>,
    cached: Option<TextureHandle>,
    resize: Listener<WindowResize>,
    reload: Listener<AssetLoaded>,
}

impl PostEffect {
    /// Builds the effect and, for owned outputs, allocates its target at the
    /// current surface size.
    ///
    /// A shader that fails to compile does not fail construction: the effect
    /// runs without a pipeline until the shader is fixed and reloaded.
    pub fn new(
        renderer: &mut Renderer,
        shaders: &mut dyn ShaderProvider,
        events: &EventBus,
        descriptor: EffectDescriptor,
    ) -> Result<Self, GraphicsError> {
        let vertex = shaders.shader(renderer, &descriptor.vertex);
        let fragment = shaders.shader(renderer, &descriptor.fragment);
        let quad = Mesh::fullscreen_quad(renderer)?;

        let mut effect = Self {
            label: descriptor.label,
            vertex,
            fragment,
            pipeline: None,
            quad,
            output: descriptor.output,
            format: descriptor.format,
            mip_levels: descriptor.mip_levels.max(1),
            target: None,
            cached: None,
            resize: events.listen(),
            reload: events.listen(),
        };
        effect.rebuild_pipeline(renderer);
        if let EffectOutput::Owned { scale } = effect.output {
            let (width, height) = scaled_size(renderer.surface_size(), scale);
            effect.target = Some(renderer.create_render_target(&effect.target_config(width, height))?);
        }
        Ok(effect)
    }

    fn target_config(&self, width: u32, height: u32) -> RenderTargetConfig {
        RenderTargetConfig::new(width, height)
            .with_color(self.format)
            .with_mips(self.mip_levels)
            .with_label(self.label.clone())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn output_mode(&self) -> EffectOutput {
        self.output
    }

    pub fn pipeline(&self) -> Option<PipelineHandle> {
        self.pipeline
    }

    pub fn fragment_shader(&self) -> &Handle<Shader> {
        &self.fragment
    }

    /// The owned output target, if any.
    pub fn target(&self) -> Option<&RenderTarget> {
        self.target.as_ref()
    }

    /// The texture written by the last successful [`apply`](Self::apply).
    pub fn output(&self) -> Option<TextureHandle> {
        self.cached
    }

    /// Runs the effect once.
    ///
    /// Writes into `target` when given, otherwise into the owned target.
    /// With neither, nothing is drawn and the cached output of the previous
    /// run is returned. `set_uniforms` runs in the pass setup, after the quad
    /// buffers are selected.
    pub fn apply<S>(
        &mut self,
        renderer: &mut Renderer,
        resources: &[Binding],
        set_uniforms: S,
        target: Option<&RenderTarget>,
    ) -> Result<Option<TextureHandle>, GraphicsError>
    where
        S: FnOnce(&mut PassSetup<'_>),
    {
        let Some(target) = target.or(self.target.as_ref()) else {
            return Ok(self.cached);
        };
        let output = target.color_views().first().map(|view| view.texture);
        let quad = &self.quad;
        renderer.render_pass(
            target,
            self.pipeline,
            resources,
            |setup| {
                quad.setup_buffers(setup);
                set_uniforms(setup);
            },
            |pass| quad.draw(pass),
        )?;
        self.cached = output;
        Ok(output)
    }

    /// Requests the pipeline again from the renderer's cache.
    ///
    /// After a shader reload the cache sees a new shader handle and rebuilds.
    pub fn rebuild_pipeline(&mut self, renderer: &mut Renderer) {
        let result = {
            let vertex = self.vertex.read();
            let fragment = self.fragment.read();
            renderer.create_pipeline_state_with(&vertex, &fragment, PipelineOptions::fullscreen())
        };
        self.pipeline = match result {
            Ok(pipeline) => Some(pipeline),
            Err(err) => {
                log::warn!("PostEffect {}: no pipeline: {err}", self.label);
                None
            }
        };
    }

    /// Reallocates the owned target for a surface of `width` x `height`.
    pub fn resize(&mut self, renderer: &mut Renderer, width: u32, height: u32) -> Result<(), GraphicsError> {
        let EffectOutput::Owned { scale } = self.output else {
            return Ok(());
        };
        let (width, height) = scaled_size((width, height), scale);
        match self.target.as_mut() {
            Some(target) => renderer.resize_render_target(target, width, height)?,
            None => self.target = Some(renderer.create_render_target(&self.target_config(width, height))?),
        }
        self.cached = None;
        log::debug!("PostEffect {}: resized to {width}x{height}", self.label);
        Ok(())
    }

    /// Applies queued resize and shader reload events.
    pub fn process_events(&mut self, renderer: &mut Renderer) -> Result<(), GraphicsError> {
        if let Some(resize) = self.resize.latest() {
            self.resize(renderer, resize.width, resize.height)?;
        }
        let reloaded = self.reload.drain().into_iter().any(|event| {
            event.kind == AssetKind::FragmentShader && event.id == self.fragment.id()
        });
        if reloaded {
            log::debug!("PostEffect {}: fragment shader reloaded", self.label);
            self.rebuild_pipeline(renderer);
        }
        Ok(())
    }
}

impl std::fmt::Debug for PostEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostEffect")
            .field("label", &self.label)
            .field("output", &self.output)
            .field("pipeline", &self.pipeline)
            .field("size", &self.target.as_ref().map(RenderTarget::size))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::shaders::{self, BuiltinShaders};

    fn setup() -> (Renderer, BuiltinShaders, EventBus) {
        (
            Renderer::with_backend(Box::new(SoftwareBackend::new()), 64, 32),
            BuiltinShaders::new(),
            EventBus::new(),
        )
    }

    fn copy(scale: u32) -> EffectDescriptor {
        EffectDescriptor::new("copy", shaders::FULLSCREEN_VS.name, shaders::COPY_FS.name).with_scale(scale)
    }

    #[test]
    fn owned_output_is_scaled() {
        let (mut renderer, mut shaders, events) = setup();
        let effect = PostEffect::new(&mut renderer, &mut shaders, &events, copy(2)).unwrap();
        assert_eq!(effect.target().unwrap().size(), (32, 16));
        assert!(effect.pipeline().is_some());
    }

    #[test]
    fn apply_writes_owned_target() {
        let (mut renderer, mut shaders, events) = setup();
        let mut effect = PostEffect::new(&mut renderer, &mut shaders, &events, copy(1)).unwrap();
        renderer.begin();
        let out = effect.apply(&mut renderer, &[], |_| {}, None).unwrap();
        assert_eq!(out, Some(effect.target().unwrap().color_views()[0].texture));
        assert_eq!(renderer.frame_stats().passes, 1);
        assert_eq!(renderer.frame_stats().draws, 1);
    }

    #[test]
    fn external_without_target_is_noop() {
        let (mut renderer, mut shaders, events) = setup();
        let mut effect = PostEffect::new(&mut renderer, &mut shaders, &events, copy(1).external()).unwrap();
        assert!(effect.target().is_none());

        renderer.begin();
        assert_eq!(effect.apply(&mut renderer, &[], |_| {}, None).unwrap(), None);
        assert_eq!(renderer.frame_stats().passes, 0);

        let surface_texture = renderer.surface().unwrap().color_views()[0].texture;
        let written = renderer
            .with_surface(|renderer, surface| effect.apply(renderer, &[], |_| {}, Some(surface)))
            .unwrap()
            .unwrap();
        assert_eq!(written, Some(surface_texture));

        // Still no target of its own: returns the stale output.
        assert_eq!(effect.apply(&mut renderer, &[], |_| {}, None).unwrap(), Some(surface_texture));
        assert_eq!(renderer.frame_stats().passes, 1);
    }

    #[test]
    fn resize_event_reallocates_and_releases_old_target() {
        let (mut renderer, mut shaders, events) = setup();
        let mut effect = PostEffect::new(&mut renderer, &mut shaders, &events, copy(2)).unwrap();
        let old = effect.target().unwrap().handle();
        let old_color = effect.target().unwrap().color_views()[0].texture;

        events.dispatch(WindowResize { width: 800, height: 600 });
        effect.process_events(&mut renderer).unwrap();
        renderer.collect_garbage();

        assert_eq!(effect.target().unwrap().size(), (400, 300));
        assert_eq!(renderer.release_count(old), 1);
        assert_eq!(renderer.release_count(old_color), 1);
    }

    #[test]
    fn reload_of_own_fragment_rebuilds_pipeline() {
        let (mut renderer, mut shaders, events) = setup();
        let mut effect = PostEffect::new(&mut renderer, &mut shaders, &events, copy(1)).unwrap();
        let before = effect.pipeline().unwrap();

        let fragment = effect.fragment_shader().clone();
        let recompiled = renderer.create_shader(&shaders::COPY_FS.descriptor());
        drop(fragment.replace(recompiled));

        // An unrelated reload changes nothing.
        events.dispatch(AssetLoaded {
            id: effect.vertex.id(),
            kind: AssetKind::VertexShader,
            path: shaders::FULLSCREEN_VS.name.to_string(),
        });
        effect.process_events(&mut renderer).unwrap();
        assert_eq!(effect.pipeline(), Some(before));

        events.dispatch(AssetLoaded {
            id: fragment.id(),
            kind: AssetKind::FragmentShader,
            path: fragment.path().to_string(),
        });
        effect.process_events(&mut renderer).unwrap();
        assert_ne!(effect.pipeline(), Some(before));

        renderer.collect_garbage();
        assert_eq!(renderer.release_count(before), 1);
    }

    #[test]
    fn dropping_effect_unsubscribes() {
        let (mut renderer, mut shaders, events) = setup();
        let effect = PostEffect::new(&mut renderer, &mut shaders, &events, copy(1)).unwrap();
        assert_eq!(events.subscriber_count::<WindowResize>(), 1);
        drop(effect);
        assert_eq!(events.subscriber_count::<WindowResize>(), 0);
        assert_eq!(events.subscriber_count::<AssetLoaded>(), 0);
    }
}
