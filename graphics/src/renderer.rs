//! Render resource manager.
//!
//! The [`Renderer`] owns the graphics backend and is the only path to it.
//! It creates RAII resources, memoizes pipeline state per shader pair, keeps
//! the global [`MatricesStack`] and issues every draw through
//! [`Renderer::render_pass`].
//!
//! # Frame structure
//!
//! ```text
//! begin()                      // scope 1: pass counter = 0
//!   render_pass(..)            // first pass in scope: clears
//!   render_pass(..)            // accumulates
//! end()
//! begin()                      // scope 2: pass counter = 0 again
//!   render_pass(..)            // clears
//! end()
//! submit()                     // flush, then release dropped resources
//! ```
//!
//! # Example
//!
//! ```
//! use umbra_graphics::{Renderer, RendererConfig};
//!
//! let mut renderer = Renderer::new(&RendererConfig::default());
//! assert!(renderer.is_init());
//! renderer.begin();
//! renderer.end();
//! renderer.submit().unwrap();
//! ```

use std::collections::{HashMap, HashSet};

use glam::Mat4;
use serde::{Deserialize, Serialize};
use umbra_core::texture::CpuTexture;
use umbra_core::MatricesStack;

use crate::backend::{BackendKind, GraphicsBackend};
use crate::error::GraphicsError;
use crate::resources::{
    Buffer, OwnedAttachments, ReleaseQueue, RenderTarget, RenderTargetConfig, Sampler, Shader,
    Texture,
};
use crate::types::{
    Binding, BufferDescriptor, BufferHandle, BufferUsage, ClearValues, CompiledShader, FrameStats,
    PipelineDescriptor, PipelineHandle, PipelineOptions, RenderTargetDescriptor, ResourceHandle,
    SamplerDescriptor, ShaderDescriptor, ShaderDiagnostics, ShaderHandle, TextureDescriptor, TextureFormat,
    TextureHandle, TextureReadback, TextureView, Viewport,
};

/// Renderer settings, usually read from the `[renderer]` config table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub backend: BackendKind,
    /// Initial surface size.
    pub width: u32,
    pub height: u32,
    /// Color written by the first pass of every scope.
    pub clear_color: [f32; 4],
    pub surface_format: TextureFormat,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Software,
            width: 1280,
            height: 720,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            surface_format: TextureFormat::Rgba8Unorm,
        }
    }
}

/// One-texel textures bound wherever an optional input is missing.
#[derive(Debug)]
pub struct Fallbacks {
    pub white: Texture,
    pub black: Texture,
    /// Tangent-space +Z.
    pub flat_normal: Texture,
    /// Depth cleared to 1.0.
    pub depth: Texture,
    pub black_cube: Texture,
    pub linear_sampler: Sampler,
    pub repeat_sampler: Sampler,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    vertex: String,
    fragment: String,
    options: PipelineOptions,
}

#[derive(Debug, Clone, Copy)]
struct PipelineEntry {
    vertex: ShaderHandle,
    fragment: ShaderHandle,
    pipeline: PipelineHandle,
}

#[derive(Debug, Default)]
struct Ledger {
    live: HashSet<ResourceHandle>,
    releases: HashMap<ResourceHandle, u32>,
}

impl Ledger {
    fn track(&mut self, handle: impl Into<ResourceHandle>) {
        self.live.insert(handle.into());
    }
}

/// Recording state handed to the setup closure of a pass.
///
/// Runs before the pass begins, so buffer writes land before any draw reads
/// them. The first failed write aborts the pass.
pub struct PassSetup<'a> {
    backend: &'a mut dyn GraphicsBackend,
    vertex_buffer: Option<BufferHandle>,
    index_buffer: Option<BufferHandle>,
    error: Option<GraphicsError>,
}

impl PassSetup<'_> {
    pub fn set_vertex_buffer(&mut self, buffer: &Buffer) {
        self.vertex_buffer = Some(buffer.handle());
    }

    pub fn set_index_buffer(&mut self, buffer: &Buffer) {
        self.index_buffer = Some(buffer.handle());
    }

    pub fn write_buffer(&mut self, buffer: &Buffer, offset: u64, data: &[u8]) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.backend.write_buffer(buffer.handle(), offset, data) {
            self.error = Some(err);
        }
    }

    /// Writes a uniform struct at offset zero.
    pub fn write_uniform<T: bytemuck::Pod>(&mut self, buffer: &Buffer, value: &T) {
        self.write_buffer(buffer, 0, bytemuck::bytes_of(value));
    }
}

/// Draw-time command access inside a pass.
pub struct PassEncoder<'a> {
    backend: &'a mut dyn GraphicsBackend,
    draws: u32,
}

impl PassEncoder<'_> {
    pub fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.backend.set_pipeline(pipeline);
    }

    pub fn bind(&mut self, binding: Binding) {
        self.backend.bind(&binding);
    }

    pub fn set_vertex_buffer(&mut self, buffer: &Buffer) {
        self.backend.set_vertex_buffer(buffer.handle());
    }

    pub fn set_index_buffer(&mut self, buffer: &Buffer) {
        self.backend.set_index_buffer(buffer.handle());
    }

    pub fn draw(&mut self, vertex_count: u32) {
        self.backend.draw(vertex_count);
        self.draws += 1;
    }

    pub fn draw_indexed(&mut self, first_index: u32, index_count: u32) {
        self.backend.draw_indexed(first_index, index_count);
        self.draws += 1;
    }

    /// Draws issued so far in this pass.
    pub fn draw_count(&self) -> u32 {
        self.draws
    }
}

/// Render resource manager. See the [module docs](self).
pub struct Renderer {
    backend: Option<Box<dyn GraphicsBackend>>,
    config: RendererConfig,
    queue: ReleaseQueue,
    ledger: Ledger,
    matrices: MatricesStack,
    matrices_buffer: Option<Buffer>,
    pipelines: HashMap<PipelineKey, PipelineEntry>,
    clear: ClearValues,
    frame_open: bool,
    pass_counter: u32,
    stats: FrameStats,
    last_stats: FrameStats,
    surface: Option<RenderTarget>,
    fallbacks: Option<Fallbacks>,
}

impl Renderer {
    /// Creates a renderer and loads the configured backend.
    ///
    /// Never fails: if the backend cannot be loaded the error is logged and
    /// the renderer stays uninitialised. Check [`is_init`](Self::is_init).
    pub fn new(config: &RendererConfig) -> Self {
        let mut renderer = Self::uninit(config.clone());
        renderer.init();
        renderer
    }

    /// Creates a renderer over an already constructed backend.
    pub fn with_backend(backend: Box<dyn GraphicsBackend>, width: u32, height: u32) -> Self {
        let config = RendererConfig {
            width,
            height,
            ..RendererConfig::default()
        };
        let mut renderer = Self::uninit(config);
        renderer.attach(backend);
        renderer
    }

    fn uninit(config: RendererConfig) -> Self {
        let clear = ClearValues {
            color: config.clear_color,
            depth: 1.0,
        };
        Self {
            backend: None,
            config,
            queue: ReleaseQueue::new(),
            ledger: Ledger::default(),
            matrices: MatricesStack::new(),
            matrices_buffer: None,
            pipelines: HashMap::new(),
            clear,
            frame_open: false,
            pass_counter: 0,
            stats: FrameStats::default(),
            last_stats: FrameStats::default(),
            surface: None,
            fallbacks: None,
        }
    }

    /// Loads the backend named in the config.
    ///
    /// Returns the resulting [`is_init`](Self::is_init) state.
    pub fn init(&mut self) -> bool {
        if self.is_init() {
            return true;
        }
        match self.config.backend.load() {
            Ok(backend) => self.attach(backend),
            Err(err) => {
                log::error!("Renderer: failed to load {:?} backend: {err}", self.config.backend);
            }
        }
        self.is_init()
    }

    fn attach(&mut self, backend: Box<dyn GraphicsBackend>) {
        log::info!("Renderer: using {}", backend.name());
        self.backend = Some(backend);
        if let Err(err) = self.create_defaults() {
            log::error!("Renderer: failed to create default resources: {err}");
            self.fallbacks = None;
            self.surface = None;
            self.matrices_buffer = None;
            self.collect_garbage();
            self.backend = None;
        }
    }

    fn create_defaults(&mut self) -> Result<(), GraphicsError> {
        let matrices = self.create_buffer(
            &BufferDescriptor::uniform(std::mem::size_of::<umbra_core::MatricesBinding>() as u64)
                .with_label("matrices"),
        )?;
        self.matrices_buffer = Some(matrices);

        let surface = self.create_render_target(
            &RenderTargetConfig::new(self.config.width.max(1), self.config.height.max(1))
                .with_color(self.config.surface_format)
                .with_depth(TextureFormat::Depth32Float)
                .with_label("surface"),
        )?;
        self.surface = Some(surface);

        let fallbacks = self.create_fallbacks()?;
        self.fallbacks = Some(fallbacks);
        Ok(())
    }

    fn create_fallbacks(&mut self) -> Result<Fallbacks, GraphicsError> {
        let white = self.create_texture_from_cpu(&CpuTexture::solid(1, 1, [255; 4]), "fallback/white")?;
        let black = self.create_texture_from_cpu(&CpuTexture::solid(1, 1, [0, 0, 0, 255]), "fallback/black")?;
        let flat_normal =
            self.create_texture_from_cpu(&CpuTexture::solid(1, 1, [128, 128, 255, 255]), "fallback/normal")?;

        let depth = self.create_texture(
            &TextureDescriptor::new_2d(1, 1, TextureFormat::Depth32Float)
                .attachment()
                .with_label("fallback/depth"),
        )?;
        let depth_target = self.create_render_target_from_views(
            "fallback/depth",
            (1, 1),
            Vec::new(),
            Some(depth.view()),
        )?;
        let black_cube = self.create_texture(
            &TextureDescriptor::new_cube(1, TextureFormat::Rgba16Float)
                .attachment()
                .with_label("fallback/black_cube"),
        )?;
        let cube_faces = (0..6)
            .map(|face| {
                self.create_render_target_from_views(
                    "fallback/black_cube",
                    (1, 1),
                    vec![black_cube.layer_view(face, 0)],
                    None,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Clear the depth and cube fallbacks once.
        let clear = ClearValues {
            color: [0.0, 0.0, 0.0, 1.0],
            depth: 1.0,
        };
        let backend = self.backend_mut()?;
        backend.begin_frame();
        for target in std::iter::once(&depth_target).chain(&cube_faces) {
            backend.begin_pass(target.handle(), Some(clear), Viewport::full(1, 1))?;
            backend.end_pass();
        }
        backend.end_frame();
        backend.submit()?;

        Ok(Fallbacks {
            white,
            black,
            flat_normal,
            depth,
            black_cube,
            linear_sampler: self.create_sampler(&SamplerDescriptor::linear().with_label("linear"))?,
            repeat_sampler: self.create_sampler(&SamplerDescriptor::repeat().with_label("repeat"))?,
        })
    }

    /// True once a backend is loaded and the default resources exist.
    pub fn is_init(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|backend| backend.name())
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    fn backend_mut(&mut self) -> Result<&mut dyn GraphicsBackend, GraphicsError> {
        match self.backend.as_mut() {
            Some(backend) => Ok(backend.as_mut()),
            None => Err(GraphicsError::NotInitialized),
        }
    }

    // ---------------------------------------------------------------------
    // Resource creation
    // ---------------------------------------------------------------------

    /// Creates a GPU buffer.
    ///
    /// # Errors
    ///
    /// Fails if the renderer is not initialised, the size is zero or the
    /// backend rejects the allocation.
    pub fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<Buffer, GraphicsError> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }
        let handle = self.backend_mut()?.create_buffer(descriptor)?;
        self.ledger.track(handle);
        log::trace!(
            "Renderer: created buffer {:?}, size={}",
            descriptor.label,
            descriptor.size
        );
        Ok(Buffer::new(handle, descriptor.clone(), self.queue.clone()))
    }

    /// Creates a buffer and fills it with `data`.
    pub fn create_buffer_init(
        &mut self,
        label: &str,
        usage: BufferUsage,
        data: &[u8],
    ) -> Result<Buffer, GraphicsError> {
        let size = (data.len() as u64).max(4);
        let buffer = self.create_buffer(
            &BufferDescriptor::new(size, usage | BufferUsage::COPY_DST).with_label(label),
        )?;
        if !data.is_empty() {
            self.write_buffer(&buffer, 0, data)?;
        }
        Ok(buffer)
    }

    /// Creates a uniform buffer holding `value`.
    pub fn create_uniform<T: bytemuck::Pod>(&mut self, label: &str, value: &T) -> Result<Buffer, GraphicsError> {
        self.create_buffer_init(label, BufferUsage::UNIFORM, bytemuck::bytes_of(value))
    }

    pub fn write_buffer(&mut self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        self.backend_mut()?.write_buffer(buffer.handle(), offset, data)
    }

    pub fn write_uniform<T: bytemuck::Pod>(&mut self, buffer: &Buffer, value: &T) -> Result<(), GraphicsError> {
        self.write_buffer(buffer, 0, bytemuck::bytes_of(value))
    }

    /// Creates a texture.
    ///
    /// # Errors
    ///
    /// Fails if the renderer is not initialised or a dimension is zero.
    pub fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<Texture, GraphicsError> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {:?} has zero size",
                descriptor.label
            )));
        }
        let handle = self.backend_mut()?.create_texture(descriptor)?;
        self.ledger.track(handle);
        log::trace!(
            "Renderer: created texture {:?} {}x{} {:?}",
            descriptor.label,
            descriptor.width,
            descriptor.height,
            descriptor.format
        );
        Ok(Texture::new(handle, descriptor.clone(), self.queue.clone()))
    }

    /// Creates a sampled 2D texture from CPU pixels.
    pub fn create_texture_from_cpu(&mut self, data: &CpuTexture, label: &str) -> Result<Texture, GraphicsError> {
        let texture =
            self.create_texture(&TextureDescriptor::new_2d(data.width, data.height, data.format).with_label(label))?;
        self.write_texture(&texture, 0, data)?;
        Ok(texture)
    }

    /// Uploads mip 0 of `layer`.
    pub fn write_texture(&mut self, texture: &Texture, layer: u32, data: &CpuTexture) -> Result<(), GraphicsError> {
        self.backend_mut()?.write_texture(texture.handle(), layer, data)
    }

    pub fn read_texture(&mut self, texture: &Texture, layer: u32, mip: u32) -> Result<TextureReadback, GraphicsError> {
        self.read_texture_handle(texture.handle(), layer, mip)
    }

    /// Reads back a texture by handle, e.g. a color attachment view.
    pub fn read_texture_handle(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        mip: u32,
    ) -> Result<TextureReadback, GraphicsError> {
        self.backend_mut()?.read_texture(texture, layer, mip)
    }

    /// Rebuilds mips 1.. of every layer from mip 0.
    pub fn generate_mipmaps(&mut self, texture: &Texture) -> Result<(), GraphicsError> {
        self.backend_mut()?.generate_mipmaps(texture.handle())
    }

    pub fn create_sampler(&mut self, descriptor: &SamplerDescriptor) -> Result<Sampler, GraphicsError> {
        let handle = self.backend_mut()?.create_sampler(descriptor)?;
        self.ledger.track(handle);
        Ok(Sampler::new(handle, descriptor.clone(), self.queue.clone()))
    }

    /// Compiles a shader stage.
    ///
    /// Never fails as a call: diagnostics are logged with the shader path and
    /// returned on the [`Shader`]. A shader with errors has no handle.
    pub fn create_shader(&mut self, descriptor: &ShaderDescriptor) -> Shader {
        let compiled = match self.backend.as_mut() {
            Some(backend) => backend.create_shader(descriptor),
            None => {
                log::error!("Renderer: cannot compile {} before init", descriptor.name);
                CompiledShader {
                    handle: None,
                    diagnostics: ShaderDiagnostics {
                        errors: vec![GraphicsError::NotInitialized.to_string()],
                        warnings: Vec::new(),
                    },
                }
            }
        };

        for error in &compiled.diagnostics.errors {
            log::warn!("Shader {} error: {error}", descriptor.name);
        }
        for warning in &compiled.diagnostics.warnings {
            log::warn!("Shader {} warning: {warning}", descriptor.name);
        }
        if let Some(handle) = compiled.handle {
            self.ledger.track(handle);
            log::trace!("Renderer: compiled shader {}", descriptor.name);
        }

        Shader::new(
            descriptor.name.clone(),
            descriptor.stage,
            compiled.handle,
            compiled.diagnostics,
            self.queue.clone(),
        )
    }

    /// Creates a render target that owns one texture per attachment.
    ///
    /// Color textures get `config.mip_levels` mips so effects can build a
    /// chain on their output.
    pub fn create_render_target(&mut self, config: &RenderTargetConfig) -> Result<RenderTarget, GraphicsError> {
        let label = config.label.clone().unwrap_or_else(|| "render_target".to_string());
        let colors = config
            .color_formats
            .iter()
            .enumerate()
            .map(|(i, format)| {
                self.create_texture(
                    &TextureDescriptor::new_2d(config.width, config.height, *format)
                        .attachment()
                        .with_mips(config.mip_levels)
                        .with_label(format!("{label}/color{i}")),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let depth = config
            .depth_format
            .map(|format| {
                self.create_texture(
                    &TextureDescriptor::new_2d(config.width, config.height, format)
                        .attachment()
                        .with_label(format!("{label}/depth")),
                )
            })
            .transpose()?;

        let descriptor = RenderTargetDescriptor {
            label: config.label.clone(),
            width: config.width,
            height: config.height,
            color: colors.iter().map(Texture::view).collect(),
            depth: depth.as_ref().map(Texture::view),
        };
        let handle = self.backend_mut()?.create_render_target(&descriptor)?;
        self.ledger.track(handle);
        log::trace!(
            "Renderer: created render target {:?} {}x{}",
            config.label,
            config.width,
            config.height
        );

        Ok(RenderTarget::new(
            handle,
            config.label.clone(),
            (config.width, config.height),
            descriptor.color,
            descriptor.depth,
            Some(OwnedAttachments {
                config: config.clone(),
                colors,
                depth,
            }),
            self.queue.clone(),
        ))
    }

    /// Creates a render target over views of textures owned elsewhere.
    ///
    /// The caller keeps the textures alive for as long as the target.
    pub fn create_render_target_from_views(
        &mut self,
        label: &str,
        (width, height): (u32, u32),
        color: Vec<TextureView>,
        depth: Option<TextureView>,
    ) -> Result<RenderTarget, GraphicsError> {
        let descriptor = RenderTargetDescriptor {
            label: Some(label.to_string()),
            width,
            height,
            color,
            depth,
        };
        let handle = self.backend_mut()?.create_render_target(&descriptor)?;
        self.ledger.track(handle);
        Ok(RenderTarget::new(
            handle,
            descriptor.label,
            (width, height),
            descriptor.color,
            descriptor.depth,
            None,
            self.queue.clone(),
        ))
    }

    /// Rebuilds an owned target at a new size with the same formats.
    ///
    /// The old target and its textures are queued for release.
    pub fn resize_render_target(
        &mut self,
        target: &mut RenderTarget,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsError> {
        let Some(config) = target.config() else {
            return Err(GraphicsError::InvalidParameter(format!(
                "render target {:?} does not own its attachments",
                target.label()
            )));
        };
        let config = config.resized(width, height);
        *target = self.create_render_target(&config)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Pipelines
    // ---------------------------------------------------------------------

    /// Pipeline for `vertex` + `fragment` with default fixed-function state.
    pub fn create_pipeline_state(&mut self, vertex: &Shader, fragment: &Shader) -> Result<PipelineHandle, GraphicsError> {
        self.create_pipeline_state_with(vertex, fragment, PipelineOptions::default())
    }

    /// Returns the cached pipeline for this (vertex, fragment, options)
    /// combination, building it on first use.
    ///
    /// The cache is keyed by shader names in order, so swapping the stages
    /// is a different pipeline. When a shader has been recompiled under the
    /// same name, the cached pipeline is rebuilt and the stale one released.
    pub fn create_pipeline_state_with(
        &mut self,
        vertex: &Shader,
        fragment: &Shader,
        options: PipelineOptions,
    ) -> Result<PipelineHandle, GraphicsError> {
        if !self.is_init() {
            return Err(GraphicsError::NotInitialized);
        }
        let vertex_handle = vertex
            .handle()
            .ok_or_else(|| GraphicsError::InvalidShader(vertex.name().to_string()))?;
        let fragment_handle = fragment
            .handle()
            .ok_or_else(|| GraphicsError::InvalidShader(fragment.name().to_string()))?;

        let key = PipelineKey {
            vertex: vertex.name().to_string(),
            fragment: fragment.name().to_string(),
            options,
        };
        if let Some(entry) = self.pipelines.get(&key) {
            if entry.vertex == vertex_handle && entry.fragment == fragment_handle {
                return Ok(entry.pipeline);
            }
            log::debug!(
                "Renderer: rebuilding pipeline {} + {} after shader reload",
                key.vertex,
                key.fragment
            );
        }

        let descriptor = PipelineDescriptor {
            label: Some(format!("{} + {}", key.vertex, key.fragment)),
            vertex: vertex_handle,
            fragment: fragment_handle,
            options,
        };
        let pipeline = self.backend_mut()?.create_pipeline(&descriptor)?;
        self.ledger.track(pipeline);
        log::trace!("Renderer: created pipeline {:?}", descriptor.label);

        let entry = PipelineEntry {
            vertex: vertex_handle,
            fragment: fragment_handle,
            pipeline,
        };
        if let Some(stale) = self.pipelines.insert(key, entry) {
            self.queue.push(stale.pipeline.into());
        }
        Ok(pipeline)
    }

    /// Number of cached pipelines.
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    // ---------------------------------------------------------------------
    // Frame recording
    // ---------------------------------------------------------------------

    /// Opens a recording scope and resets the pass counter.
    ///
    /// The first call after a [`submit`](Self::submit) also starts a new
    /// backend frame.
    pub fn begin(&mut self) {
        if !self.frame_open {
            self.collect_garbage();
            if let Some(backend) = self.backend.as_mut() {
                backend.begin_frame();
            }
            self.frame_open = true;
            self.stats = FrameStats::default();
        }
        self.pass_counter = 0;
    }

    /// Closes the current recording scope.
    pub fn end(&mut self) {
        log::trace!("Renderer: scope closed after {} passes", self.pass_counter);
    }

    /// Flushes the frame and releases resources dropped during it.
    pub fn submit(&mut self) -> Result<(), GraphicsError> {
        let backend = self.backend_mut()?;
        backend.end_frame();
        backend.submit()?;
        self.frame_open = false;
        self.last_stats = self.stats;
        self.collect_garbage();
        Ok(())
    }

    /// Issues one pass into `target`.
    ///
    /// Order of operations:
    /// 1. `setup` runs (buffer writes, vertex/index buffer selection);
    /// 2. the current matrices are uploaded to the binding at slot 0;
    /// 3. the pass begins, clearing only if it is the first pass since
    ///    [`begin`](Self::begin);
    /// 4. buffers, `resources` and `pipeline` (if any) are bound and the
    ///    viewport covers the whole target;
    /// 5. `draw` runs.
    ///
    /// A pass without a pipeline still runs both closures.
    pub fn render_pass<S, D>(
        &mut self,
        target: &RenderTarget,
        pipeline: Option<PipelineHandle>,
        resources: &[Binding],
        setup: S,
        draw: D,
    ) -> Result<(), GraphicsError>
    where
        S: FnOnce(&mut PassSetup<'_>),
        D: FnOnce(&mut PassEncoder<'_>),
    {
        if !self.is_init() {
            return Err(GraphicsError::NotInitialized);
        }
        if !self.frame_open {
            self.begin();
        }

        let binding = self.matrices.binding();
        let matrices = self.matrices_buffer.as_ref().map(Buffer::handle);
        let clear = (self.pass_counter == 0).then_some(self.clear);
        let backend = match self.backend.as_mut() {
            Some(backend) => backend.as_mut(),
            None => return Err(GraphicsError::NotInitialized),
        };

        let mut pass_setup = PassSetup {
            backend: &mut *backend,
            vertex_buffer: None,
            index_buffer: None,
            error: None,
        };
        setup(&mut pass_setup);
        let PassSetup {
            vertex_buffer,
            index_buffer,
            error,
            ..
        } = pass_setup;
        if let Some(err) = error {
            return Err(err);
        }

        if let Some(matrices) = matrices {
            backend.write_buffer(matrices, 0, bytemuck::bytes_of(&binding))?;
        }

        backend.begin_pass(
            target.handle(),
            clear,
            Viewport::full(target.width(), target.height()),
        )?;
        if let Some(buffer) = vertex_buffer {
            backend.set_vertex_buffer(buffer);
        }
        if let Some(buffer) = index_buffer {
            backend.set_index_buffer(buffer);
        }
        if let Some(matrices) = matrices {
            backend.bind(&Binding::buffer(0, matrices));
        }
        for resource in resources {
            backend.bind(resource);
        }
        if let Some(pipeline) = pipeline {
            backend.set_pipeline(pipeline);
        }

        let mut encoder = PassEncoder { backend, draws: 0 };
        draw(&mut encoder);
        let draws = encoder.draws;
        encoder.backend.end_pass();

        log::trace!(
            "Renderer: pass #{} into {:?} ({} draws, clear={})",
            self.pass_counter,
            target.label(),
            draws,
            clear.is_some()
        );
        self.pass_counter += 1;
        self.stats.passes += 1;
        self.stats.draws += draws;
        if clear.is_some() {
            self.stats.clears += 1;
        }
        Ok(())
    }

    /// Passes issued since the last [`begin`](Self::begin).
    pub fn pass_count(&self) -> u32 {
        self.pass_counter
    }

    /// Statistics of the frame being recorded.
    pub fn frame_stats(&self) -> FrameStats {
        self.stats
    }

    /// Statistics of the last submitted frame.
    pub fn last_frame_stats(&self) -> FrameStats {
        self.last_stats
    }

    pub fn clear_values(&self) -> ClearValues {
        self.clear
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear.color = color;
    }

    pub fn matrices(&self) -> &MatricesStack {
        &self.matrices
    }

    pub fn matrices_mut(&mut self) -> &mut MatricesStack {
        &mut self.matrices
    }

    /// Runs `f` with `model` pushed on the matrices stack. The stack is
    /// popped again whatever `f` returns.
    pub fn with_model<R>(&mut self, model: Mat4, f: impl FnOnce(&mut Self) -> R) -> R {
        self.matrices.push_matrix();
        self.matrices.set_model(model);
        let result = f(self);
        self.matrices.pop_matrix();
        result
    }

    /// The uniform buffer that backs slot 0 of every pass.
    pub fn matrices_buffer(&self) -> Option<&Buffer> {
        self.matrices_buffer.as_ref()
    }

    // ---------------------------------------------------------------------
    // Surface, fallbacks, lifetime
    // ---------------------------------------------------------------------

    /// The offscreen presentation surface.
    pub fn surface(&self) -> Option<&RenderTarget> {
        self.surface.as_ref()
    }

    /// Runs `f` with the surface lent out, so it can be the target of a pass
    /// issued through the same renderer.
    pub fn with_surface<R>(&mut self, f: impl FnOnce(&mut Self, &RenderTarget) -> R) -> Result<R, GraphicsError> {
        let surface = self.surface.take().ok_or(GraphicsError::NotInitialized)?;
        let result = f(self, &surface);
        self.surface = Some(surface);
        Ok(result)
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.surface
            .as_ref()
            .map_or((self.config.width, self.config.height), RenderTarget::size)
    }

    pub fn resize_surface(&mut self, width: u32, height: u32) -> Result<(), GraphicsError> {
        let Some(mut surface) = self.surface.take() else {
            return Err(GraphicsError::NotInitialized);
        };
        let result = self.resize_render_target(&mut surface, width, height);
        self.surface = Some(surface);
        if result.is_ok() {
            self.config.width = width.max(1);
            self.config.height = height.max(1);
            log::debug!("Renderer: surface resized to {width}x{height}");
        }
        result
    }

    pub fn fallbacks(&self) -> Result<&Fallbacks, GraphicsError> {
        self.fallbacks.as_ref().ok_or(GraphicsError::NotInitialized)
    }

    /// Releases every handle whose owner has been dropped.
    ///
    /// Each handle is released exactly once; a second release request for
    /// the same handle is ignored with a warning. Returns the number of
    /// handles released.
    pub fn collect_garbage(&mut self) -> usize {
        let pending = self.queue.drain();
        let mut released = 0;
        for handle in pending {
            if !self.ledger.live.remove(&handle) {
                log::warn!("Renderer: ignoring release of {handle}, not live");
                continue;
            }
            *self.ledger.releases.entry(handle).or_insert(0) += 1;
            if let Some(backend) = self.backend.as_mut() {
                backend.release(handle);
            }
            released += 1;
        }
        if released > 0 {
            log::trace!("Renderer: released {released} resources");
        }
        released
    }

    /// How many times `handle` has been released to the backend.
    pub fn release_count(&self, handle: impl Into<ResourceHandle>) -> u32 {
        self.ledger.releases.get(&handle.into()).copied().unwrap_or(0)
    }

    /// True while `handle` is allocated in the backend.
    pub fn is_live(&self, handle: impl Into<ResourceHandle>) -> bool {
        self.ledger.live.contains(&handle.into())
    }

    /// Number of live backend resources.
    pub fn live_count(&self) -> usize {
        self.ledger.live.len()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.fallbacks = None;
        self.surface = None;
        self.matrices_buffer = None;
        for (_, entry) in self.pipelines.drain() {
            self.queue.push(entry.pipeline.into());
        }
        self.collect_garbage();
        if self.backend.is_some() {
            log::info!("Renderer: shut down with {} live resources", self.ledger.live.len());
        }
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backend", &self.backend_name())
            .field("pipelines", &self.pipelines.len())
            .field("live", &self.ledger.live.len())
            .field("pass_counter", &self.pass_counter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::shaders;
    use crate::types::ShaderStage;

    fn renderer() -> Renderer {
        Renderer::with_backend(Box::new(SoftwareBackend::new()), 16, 16)
    }

    fn target(renderer: &mut Renderer) -> RenderTarget {
        renderer
            .create_render_target(
                &RenderTargetConfig::new(8, 8)
                    .with_color(TextureFormat::Rgba16Float)
                    .with_depth(TextureFormat::Depth32Float),
            )
            .unwrap()
    }

    #[test]
    fn init_creates_defaults() {
        let renderer = renderer();
        assert!(renderer.is_init());
        assert_eq!(renderer.surface_size(), (16, 16));
        assert!(renderer.fallbacks().is_ok());
        assert!(renderer.matrices_buffer().is_some());
    }

    #[test]
    fn wgpu_without_feature_is_not_init() {
        if cfg!(feature = "wgpu-backend") {
            return;
        }
        let renderer = Renderer::new(&RendererConfig {
            backend: BackendKind::Wgpu,
            ..RendererConfig::default()
        });
        assert!(!renderer.is_init());
        assert!(renderer.fallbacks().is_err());
    }

    #[test]
    fn creation_before_init_fails() {
        let mut renderer = Renderer::uninit(RendererConfig::default());
        assert!(matches!(
            renderer.create_buffer(&BufferDescriptor::uniform(16)),
            Err(GraphicsError::NotInitialized)
        ));
        let shader = renderer.create_shader(&shaders::COPY_FS.descriptor());
        assert!(!shader.is_valid());
        assert!(shader.diagnostics().has_errors());
    }

    #[test]
    fn zero_sized_buffer_is_rejected() {
        let mut renderer = renderer();
        assert!(matches!(
            renderer.create_buffer(&BufferDescriptor::uniform(0)),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn first_pass_in_scope_clears() {
        let mut renderer = renderer();
        let target = target(&mut renderer);

        renderer.begin();
        for _ in 0..3 {
            renderer.render_pass(&target, None, &[], |_| {}, |_| {}).unwrap();
        }
        renderer.end();
        assert_eq!(renderer.frame_stats().clears, 1);

        renderer.begin();
        renderer.render_pass(&target, None, &[], |_| {}, |_| {}).unwrap();
        renderer.end();
        renderer.submit().unwrap();

        let stats = renderer.last_frame_stats();
        assert_eq!(stats.passes, 4);
        assert_eq!(stats.clears, 2);
    }

    #[test]
    fn with_model_pops_after_a_failed_pass() {
        let mut renderer = renderer();
        let target = target(&mut renderer);
        let buffer = renderer.create_buffer(&BufferDescriptor::uniform(4)).unwrap();
        let before = (renderer.matrices().depth(), renderer.matrices().model());
        let model = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));

        renderer.begin();
        let result = renderer.with_model(model, |renderer| {
            assert_eq!(renderer.matrices().depth(), before.0 + 1);
            assert_eq!(renderer.matrices().model(), model);
            renderer.render_pass(&target, None, &[], |setup| setup.write_buffer(&buffer, 0, &[0; 16]), |_| {})
        });

        assert!(result.is_err());
        assert_eq!((renderer.matrices().depth(), renderer.matrices().model()), before);
    }

    #[test]
    fn pass_without_pipeline_runs_closures() {
        let mut renderer = renderer();
        let target = target(&mut renderer);
        let mut setup_ran = false;
        let mut draw_ran = false;
        renderer.begin();
        renderer
            .render_pass(&target, None, &[], |_| setup_ran = true, |_| draw_ran = true)
            .unwrap();
        assert!(setup_ran && draw_ran);
    }

    #[test]
    fn failed_setup_write_aborts_pass() {
        let mut renderer = renderer();
        let target = target(&mut renderer);
        let buffer = renderer.create_buffer(&BufferDescriptor::uniform(4)).unwrap();
        renderer.begin();
        let result = renderer.render_pass(
            &target,
            None,
            &[],
            |setup| setup.write_buffer(&buffer, 0, &[0; 16]),
            |_| panic!("draw must not run"),
        );
        assert!(result.is_err());
        assert_eq!(renderer.pass_count(), 0);
    }

    #[test]
    fn pipeline_cache_is_ordered_and_idempotent() {
        let mut renderer = renderer();
        let vs = renderer.create_shader(&shaders::FULLSCREEN_VS.descriptor());
        let fs = renderer.create_shader(&shaders::COPY_FS.descriptor());
        let tonemap = renderer.create_shader(&shaders::TONEMAP_FS.descriptor());

        let a = renderer.create_pipeline_state(&vs, &fs).unwrap();
        let b = renderer.create_pipeline_state(&vs, &fs).unwrap();
        assert_eq!(a, b);
        assert_eq!(renderer.pipeline_count(), 1);

        let c = renderer.create_pipeline_state(&vs, &tonemap).unwrap();
        assert_ne!(a, c);
        let d = renderer
            .create_pipeline_state_with(&vs, &fs, PipelineOptions::fullscreen())
            .unwrap();
        assert_ne!(a, d);
    }

    #[test]
    fn swapped_stages_are_a_distinct_key() {
        let mut renderer = renderer();
        let vs = renderer.create_shader(&ShaderDescriptor::new(
            "a.wgsl",
            ShaderStage::Vertex,
            "@vertex fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }\n\
             @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }",
        ));
        let fs = renderer.create_shader(&ShaderDescriptor::new(
            "b.wgsl",
            ShaderStage::Fragment,
            "@vertex fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }\n\
             @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }",
        ));
        let ab = renderer.create_pipeline_state(&vs, &fs).unwrap();
        let ba = renderer.create_pipeline_state(&fs, &vs).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn recompiled_shader_rebuilds_cached_pipeline() {
        let mut renderer = renderer();
        let vs = renderer.create_shader(&shaders::FULLSCREEN_VS.descriptor());
        let fs = renderer.create_shader(&shaders::COPY_FS.descriptor());
        let old = renderer.create_pipeline_state(&vs, &fs).unwrap();

        let reloaded = renderer.create_shader(&shaders::COPY_FS.descriptor());
        drop(fs);
        let new = renderer.create_pipeline_state(&vs, &reloaded).unwrap();
        assert_ne!(old, new);
        assert_eq!(renderer.pipeline_count(), 1);

        renderer.collect_garbage();
        assert_eq!(renderer.release_count(old), 1);
        assert!(!renderer.is_live(old));
    }

    #[test]
    fn invalid_shader_fails_pipeline() {
        let mut renderer = renderer();
        let vs = renderer.create_shader(&shaders::FULLSCREEN_VS.descriptor());
        let broken = renderer.create_shader(&ShaderDescriptor::new("broken.wgsl", ShaderStage::Fragment, "fn"));
        assert!(matches!(
            renderer.create_pipeline_state(&vs, &broken),
            Err(GraphicsError::InvalidShader(name)) if name == "broken.wgsl"
        ));
    }

    #[test]
    fn dropped_resources_release_exactly_once() {
        let mut renderer = renderer();
        let buffer = renderer.create_buffer(&BufferDescriptor::uniform(64)).unwrap();
        let handle = buffer.handle();
        assert!(renderer.is_live(handle));
        drop(buffer);
        assert_eq!(renderer.collect_garbage(), 1);
        assert_eq!(renderer.collect_garbage(), 0);
        assert_eq!(renderer.release_count(handle), 1);
        assert!(!renderer.is_live(handle));
    }

    #[test]
    fn resize_replaces_owned_target() {
        let mut renderer = renderer();
        let mut target = target(&mut renderer);
        let old_target = target.handle();
        let old_color = target.color_views()[0].texture;

        renderer.resize_render_target(&mut target, 32, 24).unwrap();
        renderer.collect_garbage();
        assert_eq!(target.size(), (32, 24));
        assert_eq!(renderer.release_count(old_target), 1);
        assert_eq!(renderer.release_count(old_color), 1);
        assert_eq!(target.config().unwrap().color_formats, vec![TextureFormat::Rgba16Float]);
    }

    #[test]
    fn view_targets_cannot_resize() {
        let mut renderer = renderer();
        let texture = renderer
            .create_texture(&TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm).attachment())
            .unwrap();
        let mut target = renderer
            .create_render_target_from_views("view", (4, 4), vec![texture.view()], None)
            .unwrap();
        assert!(renderer.resize_render_target(&mut target, 8, 8).is_err());
    }

    #[test]
    fn resize_surface() {
        let mut renderer = renderer();
        renderer.resize_surface(40, 30).unwrap();
        assert_eq!(renderer.surface_size(), (40, 30));
    }
}
