//! Deferred shading.
//!
//! The [`DeferredRenderer`] owns the G-buffer and the lighting resolve. The
//! geometry pass is not issued here: the scene renders its meshes straight
//! into [`DeferredRenderer::primary_render_target`] with the built-in
//! geometry program, then calls [`DeferredRenderer::draw`] to resolve the
//! attachments into a lit frame.
//!
//! | attachment | format        | contents                        |
//! |------------|---------------|---------------------------------|
//! | 0          | `Rgba16Float` | world position                  |
//! | 1          | `Rgba8Unorm`  | albedo                          |
//! | 2          | `Rgba16Float` | world normal                    |
//! | 3          | `Rgba8Unorm`  | metallic, roughness, ao         |
//! | 4          | `Rgba16Float` | emission                        |
//! | depth      | `Depth32Float`| depth                           |

use umbra_core::asset::{AssetKind, Handle};
use umbra_core::events::{AssetLoaded, EventBus, Listener, WindowResize};

use crate::error::GraphicsError;
use crate::mesh::Mesh;
use crate::renderer::{PassSetup, Renderer};
use crate::resources::{Buffer, RenderTarget, RenderTargetConfig, Shader};
use crate::shaders::{self, ShaderProvider};
use crate::types::{Binding, PipelineHandle, PipelineOptions, TextureFormat, TextureHandle};
use crate::uniforms::{LightsUniform, ShadowsUniform, MAX_SHADOWS};

/// Color formats of the G-buffer, in attachment order.
pub const GBUFFER_FORMATS: [TextureFormat; 5] = [
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba16Float,
];

/// Binding slots of the built-in geometry program.
pub mod geometry_slots {
    pub const MATRICES: u32 = 0;
    pub const MATERIAL: u32 = 1;
    pub const ALBEDO: u32 = 2;
    pub const NORMAL: u32 = 3;
    pub const METALLIC: u32 = 4;
    pub const ROUGHNESS: u32 = 5;
    pub const AO: u32 = 6;
    pub const EMISSION: u32 = 7;
    pub const SAMPLER: u32 = 8;
}

/// Binding slots of the lighting resolve.
pub mod lighting_slots {
    pub const POSITION: u32 = 1;
    pub const ALBEDO: u32 = 2;
    pub const NORMAL: u32 = 3;
    pub const COMBINED: u32 = 4;
    pub const EMISSION: u32 = 5;
    pub const DEPTH: u32 = 6;
    pub const LIGHTS: u32 = 7;
    pub const SHADOWS: u32 = 8;
    /// First of [`MAX_SHADOWS`](crate::uniforms::MAX_SHADOWS) consecutive
    /// shadow map slots.
    pub const SHADOW_MAPS: u32 = 9;
    pub const IRRADIANCE: u32 = 13;
    pub const PREFILTER: u32 = 14;
    pub const BRDF_LUT: u32 = 15;
    pub const AO: u32 = 16;
    pub const SAMPLER: u32 = 17;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    /// The G-buffer or the lighting pipeline is missing.
    NotReady,
    Ready,
}

pub struct DeferredRenderer {
    state: DeferredState,
    gbuffer: Option<RenderTarget>,
    vertex: Handle<Shader>,
    fragment: Handle<Shader>,
    pipeline: Option<PipelineHandle>,
    quad: Mesh,
    no_lights: Buffer,
    no_shadows: Buffer,
    resize: Listener<WindowResize>,
    reload: Listener<AssetLoaded>,
}

impl DeferredRenderer {
    pub fn new(
        renderer: &mut Renderer,
        shaders: &mut dyn ShaderProvider,
        events: &EventBus,
    ) -> Result<Self, GraphicsError> {
        let vertex = shaders.shader(renderer, shaders::FULLSCREEN_VS.name);
        let fragment = shaders.shader(renderer, shaders::LIGHTING_FS.name);
        let quad = Mesh::fullscreen_quad(renderer)?;
        let no_lights = renderer.create_uniform("deferred/no_lights", &LightsUniform::new())?;
        let no_shadows = renderer.create_uniform("deferred/no_shadows", &ShadowsUniform::new())?;

        let (width, height) = renderer.surface_size();
        let mut deferred = Self {
            state: DeferredState::NotReady,
            gbuffer: None,
            vertex,
            fragment,
            pipeline: None,
            quad,
            no_lights,
            no_shadows,
            resize: events.listen(),
            reload: events.listen(),
        };
        deferred.gbuffer = Some(renderer.create_render_target(&gbuffer_config(width, height))?);
        deferred.rebuild_pipeline(renderer);
        Ok(deferred)
    }

    pub fn state(&self) -> DeferredState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == DeferredState::Ready
    }

    fn update_state(&mut self) {
        self.state = if self.gbuffer.is_some() && self.pipeline.is_some() {
            DeferredState::Ready
        } else {
            DeferredState::NotReady
        };
    }

    /// The G-buffer. Geometry is rendered into it directly.
    pub fn primary_render_target(&self) -> Option<&RenderTarget> {
        self.gbuffer.as_ref()
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.gbuffer.as_ref().map(RenderTarget::size)
    }

    fn attachment(&self, index: usize) -> Option<TextureHandle> {
        self.gbuffer
            .as_ref()
            .and_then(|target| target.color_views().get(index))
            .map(|view| view.texture)
    }

    pub fn position(&self) -> Option<TextureHandle> {
        self.attachment(0)
    }

    pub fn albedo(&self) -> Option<TextureHandle> {
        self.attachment(1)
    }

    pub fn normal(&self) -> Option<TextureHandle> {
        self.attachment(2)
    }

    pub fn combined(&self) -> Option<TextureHandle> {
        self.attachment(3)
    }

    pub fn emission(&self) -> Option<TextureHandle> {
        self.attachment(4)
    }

    pub fn depth(&self) -> Option<TextureHandle> {
        self.gbuffer
            .as_ref()
            .and_then(RenderTarget::depth_view)
            .map(|view| view.texture)
    }

    pub fn lighting_shader(&self) -> &Handle<Shader> {
        &self.fragment
    }

    pub fn pipeline(&self) -> Option<PipelineHandle> {
        self.pipeline
    }

    pub fn rebuild_pipeline(&mut self, renderer: &mut Renderer) {
        let result = {
            let vertex = self.vertex.read();
            let fragment = self.fragment.read();
            renderer.create_pipeline_state_with(&vertex, &fragment, PipelineOptions::fullscreen())
        };
        self.pipeline = result
            .map_err(|err| log::warn!("DeferredRenderer: lighting pipeline unavailable: {err}"))
            .ok();
        self.update_state();
    }

    /// Clears every G-buffer attachment.
    ///
    /// Must be the first pass of a [`Renderer::begin`] scope to have effect.
    pub fn clear(&self, renderer: &mut Renderer) -> Result<(), GraphicsError> {
        match &self.gbuffer {
            Some(gbuffer) => renderer.render_pass(gbuffer, None, &[], |_| {}, |_| {}),
            None => Ok(()),
        }
    }

    /// Resolves the G-buffer into `target`, or into the surface when `None`.
    ///
    /// `resources` supply the lights and shadows buffers, shadow maps, IBL
    /// textures and the AO term at their [`lighting_slots`]; whatever is not
    /// supplied is bound to an empty or neutral fallback.
    pub fn draw<S>(
        &mut self,
        renderer: &mut Renderer,
        resources: &[Binding],
        set_uniforms: S,
        target: Option<&RenderTarget>,
    ) -> Result<(), GraphicsError>
    where
        S: FnOnce(&mut PassSetup<'_>),
    {
        if !self.is_ready() {
            log::warn!("DeferredRenderer: draw skipped, not ready");
            return Ok(());
        }
        let bindings = self.bindings(renderer, resources)?;
        match target {
            Some(target) => self.resolve(renderer, &bindings, set_uniforms, target),
            None => renderer.with_surface(|renderer, surface| self.resolve(renderer, &bindings, set_uniforms, surface))?,
        }
    }

    fn bindings(&self, renderer: &Renderer, resources: &[Binding]) -> Result<Vec<Binding>, GraphicsError> {
        let fallbacks = renderer.fallbacks()?;
        let mut bindings = Vec::with_capacity(18 + resources.len());

        let gbuffer = [
            (lighting_slots::POSITION, self.position()),
            (lighting_slots::ALBEDO, self.albedo()),
            (lighting_slots::NORMAL, self.normal()),
            (lighting_slots::COMBINED, self.combined()),
            (lighting_slots::EMISSION, self.emission()),
            (lighting_slots::DEPTH, self.depth()),
        ];
        for (slot, texture) in gbuffer {
            if let Some(texture) = texture {
                bindings.push(Binding::texture(slot, texture));
            }
        }

        bindings.push(Binding::buffer(lighting_slots::LIGHTS, self.no_lights.handle()));
        bindings.push(Binding::buffer(lighting_slots::SHADOWS, self.no_shadows.handle()));
        for i in 0..MAX_SHADOWS as u32 {
            bindings.push(Binding::texture(lighting_slots::SHADOW_MAPS + i, fallbacks.depth.handle()));
        }
        bindings.push(Binding::texture(lighting_slots::IRRADIANCE, fallbacks.black_cube.handle()));
        bindings.push(Binding::texture(lighting_slots::PREFILTER, fallbacks.black_cube.handle()));
        bindings.push(Binding::texture(lighting_slots::BRDF_LUT, fallbacks.black.handle()));
        bindings.push(Binding::texture(lighting_slots::AO, fallbacks.white.handle()));
        bindings.push(Binding::sampler(lighting_slots::SAMPLER, fallbacks.linear_sampler.handle()));

        // Caller resources are bound last and win over the fallbacks.
        bindings.extend_from_slice(resources);
        Ok(bindings)
    }

    fn resolve<S>(
        &self,
        renderer: &mut Renderer,
        bindings: &[Binding],
        set_uniforms: S,
        target: &RenderTarget,
    ) -> Result<(), GraphicsError>
    where
        S: FnOnce(&mut PassSetup<'_>),
    {
        let quad = &self.quad;
        renderer.render_pass(
            target,
            self.pipeline,
            bindings,
            |setup| {
                quad.setup_buffers(setup);
                set_uniforms(setup);
            },
            |pass| quad.draw(pass),
        )
    }

    /// Recreates every G-buffer attachment at the new size.
    pub fn resize(&mut self, renderer: &mut Renderer, width: u32, height: u32) -> Result<(), GraphicsError> {
        match self.gbuffer.as_mut() {
            Some(gbuffer) => renderer.resize_render_target(gbuffer, width, height)?,
            None => self.gbuffer = Some(renderer.create_render_target(&gbuffer_config(width, height))?),
        }
        self.update_state();
        log::debug!("DeferredRenderer: G-buffer resized to {width}x{height}");
        Ok(())
    }

    /// Applies queued resize and lighting shader reload events.
    pub fn process_events(&mut self, renderer: &mut Renderer) -> Result<(), GraphicsError> {
        if let Some(resize) = self.resize.latest() {
            self.resize(renderer, resize.width, resize.height)?;
        }
        let reloaded = self
            .reload
            .drain()
            .into_iter()
            .any(|event| event.kind == AssetKind::FragmentShader && event.id == self.fragment.id());
        if reloaded {
            log::debug!("DeferredRenderer: lighting shader reloaded");
            self.rebuild_pipeline(renderer);
        }
        Ok(())
    }
}

fn gbuffer_config(width: u32, height: u32) -> RenderTargetConfig {
    GBUFFER_FORMATS
        .iter()
        .fold(RenderTargetConfig::new(width, height), |config, format| config.with_color(*format))
        .with_depth(TextureFormat::Depth32Float)
        .with_label("gbuffer")
}

impl std::fmt::Debug for DeferredRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredRenderer")
            .field("state", &self.state)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::shaders::BuiltinShaders;
    use crate::types::{ShaderDescriptor, ShaderStage};

    fn setup() -> (Renderer, BuiltinShaders, EventBus) {
        (
            Renderer::with_backend(Box::new(SoftwareBackend::new()), 24, 16),
            BuiltinShaders::new(),
            EventBus::new(),
        )
    }

    #[test]
    fn becomes_ready_with_full_gbuffer() {
        let (mut renderer, mut shaders, events) = setup();
        let deferred = DeferredRenderer::new(&mut renderer, &mut shaders, &events).unwrap();
        assert_eq!(deferred.state(), DeferredState::Ready);

        let gbuffer = deferred.primary_render_target().unwrap();
        assert_eq!(gbuffer.size(), (24, 16));
        assert_eq!(gbuffer.color_views().len(), 5);
        assert!(deferred.depth().is_some());
        assert_eq!(gbuffer.config().unwrap().color_formats, GBUFFER_FORMATS.to_vec());
    }

    #[test]
    fn broken_lighting_shader_is_not_ready() {
        let (mut renderer, mut shaders, events) = setup();
        let mut deferred = DeferredRenderer::new(&mut renderer, &mut shaders, &events).unwrap();

        let lighting = deferred.lighting_shader().clone();
        drop(lighting.replace(renderer.create_shader(&ShaderDescriptor::new(
            lighting.path(),
            ShaderStage::Fragment,
            "not wgsl",
        ))));
        events.dispatch(AssetLoaded {
            id: lighting.id(),
            kind: AssetKind::FragmentShader,
            path: lighting.path().to_string(),
        });
        deferred.process_events(&mut renderer).unwrap();
        assert_eq!(deferred.state(), DeferredState::NotReady);

        renderer.begin();
        deferred.draw(&mut renderer, &[], |_| {}, None).unwrap();
        assert_eq!(renderer.frame_stats().passes, 0);

        drop(lighting.replace(renderer.create_shader(&shaders::LIGHTING_FS.descriptor())));
        events.dispatch(AssetLoaded {
            id: lighting.id(),
            kind: AssetKind::FragmentShader,
            path: lighting.path().to_string(),
        });
        deferred.process_events(&mut renderer).unwrap();
        assert!(deferred.is_ready());
    }

    #[test]
    fn resize_replaces_every_attachment_once() {
        let (mut renderer, mut shaders, events) = setup();
        let mut deferred = DeferredRenderer::new(&mut renderer, &mut shaders, &events).unwrap();
        let gbuffer = deferred.primary_render_target().unwrap();
        let mut old: Vec<_> = gbuffer.color_views().iter().map(|view| view.texture).collect();
        old.extend(deferred.depth());
        let old_target = gbuffer.handle();

        events.dispatch(WindowResize { width: 800, height: 600 });
        deferred.process_events(&mut renderer).unwrap();
        renderer.collect_garbage();

        assert_eq!(deferred.size(), Some((800, 600)));
        assert_eq!(renderer.release_count(old_target), 1);
        for texture in old {
            assert_eq!(renderer.release_count(texture), 1);
            assert!(!renderer.is_live(texture));
        }
    }

    #[test]
    fn draw_resolves_into_surface_by_default() {
        let (mut renderer, mut shaders, events) = setup();
        let mut deferred = DeferredRenderer::new(&mut renderer, &mut shaders, &events).unwrap();
        renderer.begin();
        deferred.clear(&mut renderer).unwrap();
        deferred.draw(&mut renderer, &[], |_| {}, None).unwrap();
        let stats = renderer.frame_stats();
        assert_eq!(stats.passes, 2);
        assert_eq!(stats.draws, 1);
    }

    #[test]
    fn one_listener_per_event_type() {
        let (mut renderer, mut shaders, events) = setup();
        let _deferred = DeferredRenderer::new(&mut renderer, &mut shaders, &events).unwrap();
        assert_eq!(events.subscriber_count::<WindowResize>(), 1);
        assert_eq!(events.subscriber_count::<AssetLoaded>(), 1);
    }
}
