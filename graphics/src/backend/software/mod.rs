//! CPU reference backend.
//!
//! Resources live in host memory: buffers as bytes, textures as linear RGBA
//! floats per layer and mip. Pipelines are matched by shader name against a
//! small set of native programs (see [`programs`]) that reproduce the
//! built-in shaders on the CPU; any other pipeline is accepted, bound and
//! counted, but its draws leave the attachments untouched.
//!
//! The backend is deterministic and needs no device, which makes it the
//! default for tests and headless tools.

mod programs;
mod raster;

use std::collections::HashMap;

use umbra_core::texture::CpuTexture;

use crate::error::GraphicsError;
use crate::types::{
    Binding, BindingResource, BufferDescriptor, BufferHandle, ClearValues, CompiledShader,
    FrameStats, PipelineDescriptor, PipelineHandle, PipelineOptions, RenderTargetDescriptor,
    RenderTargetHandle, ResourceHandle, SamplerDescriptor, SamplerHandle, ShaderDescriptor,
    ShaderHandle, TextureDescriptor, TextureHandle, TextureReadback, TextureView, Viewport,
};
use crate::validation::check_wgsl;

use super::texels::decode_texels;
use super::GraphicsBackend;
use programs::Program;

/// One layer/mip worth of texels.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Image {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<[f32; 4]>,
}

impl Image {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            texels: vec![[0.0; 4]; width as usize * height as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        if x >= self.width || y >= self.height {
            return [0.0; 4];
        }
        self.texels[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: [f32; 4]) {
        if x < self.width && y < self.height {
            self.texels[(y * self.width + x) as usize] = value;
        }
    }

    /// Nearest-texel lookup with `uv` in `[0, 1]`, (0, 0) at the top left.
    pub fn sample(&self, u: f32, v: f32, repeat: bool) -> [f32; 4] {
        let (u, v) = if repeat {
            (u.rem_euclid(1.0), v.rem_euclid(1.0))
        } else {
            (u.clamp(0.0, 1.0), v.clamp(0.0, 1.0))
        };
        let x = ((u * self.width as f32) as u32).min(self.width.saturating_sub(1));
        let y = ((v * self.height as f32) as u32).min(self.height.saturating_sub(1));
        self.get(x, y)
    }

    fn fill(&mut self, value: [f32; 4]) {
        self.texels.fill(value);
    }

    fn downsample(&self, width: u32, height: u32) -> Self {
        let mut out = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let mut sum = [0.0f32; 4];
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let texel = self.get(
                        (x * 2 + dx).min(self.width - 1),
                        (y * 2 + dy).min(self.height - 1),
                    );
                    for (acc, value) in sum.iter_mut().zip(texel) {
                        *acc += value * 0.25;
                    }
                }
                out.set(x, y, sum);
            }
        }
        out
    }
}

#[derive(Debug)]
pub(crate) struct SoftTexture {
    pub desc: TextureDescriptor,
    /// Indexed `[layer][mip]`.
    pub layers: Vec<Vec<Image>>,
}

impl SoftTexture {
    fn new(desc: TextureDescriptor) -> Self {
        let layers = (0..desc.layers())
            .map(|_| {
                (0..desc.mip_levels)
                    .map(|mip| {
                        let (w, h) = desc.mip_size(mip);
                        Image::new(w, h)
                    })
                    .collect()
            })
            .collect();
        Self { desc, layers }
    }

    pub fn image(&self, layer: u32, mip: u32) -> Option<&Image> {
        self.layers.get(layer as usize)?.get(mip as usize)
    }

    pub fn image_mut(&mut self, layer: u32, mip: u32) -> Option<&mut Image> {
        self.layers.get_mut(layer as usize)?.get_mut(mip as usize)
    }
}

#[derive(Debug)]
struct SoftBuffer {
    desc: BufferDescriptor,
    data: Vec<u8>,
}

#[derive(Debug)]
struct SoftShader {
    name: String,
}

#[derive(Debug)]
struct SoftPipeline {
    label: Option<String>,
    program: Program,
    options: PipelineOptions,
}

#[derive(Debug)]
struct PassState {
    target: RenderTargetHandle,
    viewport: Viewport,
    pipeline: Option<PipelineHandle>,
    vertex_buffer: Option<BufferHandle>,
    index_buffer: Option<BufferHandle>,
    bindings: HashMap<u32, BindingResource>,
}

/// A color or depth attachment checked out of the texture table for a draw.
pub(crate) struct Attachment {
    view: TextureView,
    texture: SoftTexture,
}

impl Attachment {
    pub fn image_mut(&mut self) -> Option<&mut Image> {
        self.texture.image_mut(self.view.layer, self.view.mip)
    }
}

/// Read-only view of the resources bound to the current pass.
pub(crate) struct Inputs<'a> {
    bindings: &'a HashMap<u32, BindingResource>,
    buffers: &'a HashMap<BufferHandle, SoftBuffer>,
    textures: &'a HashMap<TextureHandle, SoftTexture>,
}

impl<'a> Inputs<'a> {
    /// Reads a uniform of type `T` from the buffer bound at `slot`.
    pub fn uniform<T: bytemuck::Pod>(&self, slot: u32) -> Option<T> {
        let BindingResource::Buffer(handle) = self.bindings.get(&slot)? else {
            return None;
        };
        let data = &self.buffers.get(handle)?.data;
        let bytes = data.get(..std::mem::size_of::<T>())?;
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }

    /// Mip 0, layer 0 of the texture bound at `slot`.
    pub fn texture(&self, slot: u32) -> Option<&'a Image> {
        let BindingResource::Texture(handle) = self.bindings.get(&slot)? else {
            return None;
        };
        self.textures.get(handle)?.image(0, 0)
    }

    fn buffer_bytes(&self, handle: Option<BufferHandle>) -> Option<&'a [u8]> {
        handle
            .and_then(|h| self.buffers.get(&h))
            .map(|b| b.data.as_slice())
    }
}

/// Counters kept by the software backend since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareStats {
    pub frames: u64,
    pub passes: u64,
    pub clears: u64,
    pub draws: u64,
    /// Draws executed by a native program.
    pub shaded_draws: u64,
}

/// CPU reference backend.
#[derive(Debug, Default)]
pub struct SoftwareBackend {
    next_id: u64,
    buffers: HashMap<BufferHandle, SoftBuffer>,
    textures: HashMap<TextureHandle, SoftTexture>,
    shaders: HashMap<ShaderHandle, SoftShader>,
    samplers: HashMap<SamplerHandle, SamplerDescriptor>,
    targets: HashMap<RenderTargetHandle, RenderTargetDescriptor>,
    pipelines: HashMap<PipelineHandle, SoftPipeline>,
    frame_open: bool,
    pass: Option<PassState>,
    frame: FrameStats,
    stats: SoftwareStats,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        log::info!("SoftwareBackend: initialized");
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn stats(&self) -> SoftwareStats {
        self.stats
    }

    /// Number of live resources of every kind.
    pub fn live_resources(&self) -> usize {
        self.buffers.len()
            + self.textures.len()
            + self.shaders.len()
            + self.samplers.len()
            + self.targets.len()
            + self.pipelines.len()
    }

    fn execute_draw(&mut self, indices: Option<(u32, u32)>, vertex_count: u32) {
        let Some(pass) = self.pass.as_ref() else {
            log::warn!("SoftwareBackend: draw outside of a pass ignored");
            return;
        };
        self.stats.draws += 1;
        self.frame.draws += 1;

        let Some(pipeline) = pass.pipeline.and_then(|p| self.pipelines.get(&p)) else {
            return;
        };
        let program = pipeline.program;
        if program == Program::Recorded {
            log::trace!(
                "SoftwareBackend: recorded draw for {:?} (no native program)",
                pipeline.label
            );
            return;
        }
        let options = pipeline.options;
        let viewport = pass.viewport;
        let Some(target) = self.targets.get(&pass.target).cloned() else {
            return;
        };

        // Check the attachments out so inputs can be borrowed alongside them.
        let mut colors: Vec<Attachment> = target
            .color
            .iter()
            .filter_map(|view| {
                self.textures.remove(&view.texture).map(|texture| Attachment {
                    view: *view,
                    texture,
                })
            })
            .collect();
        let mut depth = target.depth.and_then(|view| {
            self.textures.remove(&view.texture).map(|texture| Attachment {
                view,
                texture,
            })
        });

        let Some(pass) = self.pass.as_ref() else {
            return;
        };
        let inputs = Inputs {
            bindings: &pass.bindings,
            buffers: &self.buffers,
            textures: &self.textures,
        };

        match program {
            Program::Geometry | Program::ShadowDepth => {
                let vertices = inputs.buffer_bytes(pass.vertex_buffer).unwrap_or_default();
                let index_data = inputs.buffer_bytes(pass.index_buffer).unwrap_or_default();
                let index_list: Vec<u32> = match indices {
                    Some((first, count)) => index_data
                        .chunks_exact(4)
                        .skip(first as usize)
                        .take(count as usize)
                        .map(bytemuck::pod_read_unaligned::<u32>)
                        .collect(),
                    None => (0..vertex_count).collect(),
                };
                programs::rasterize_mesh(
                    program,
                    &inputs,
                    vertices,
                    &index_list,
                    &options,
                    viewport,
                    &mut colors,
                    depth.as_mut(),
                );
            }
            Program::Lighting | Program::Tonemap | Program::Copy => {
                if let Some(output) = colors.first_mut() {
                    programs::shade_fullscreen(program, &inputs, viewport, output);
                }
            }
            Program::Recorded => {}
        }
        self.stats.shaded_draws += 1;

        for attachment in colors.into_iter().chain(depth) {
            self.textures.insert(attachment.view.texture, attachment.texture);
        }
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "Software Backend"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferHandle, GraphicsError> {
        let handle = BufferHandle::from_raw(self.next_id());
        log::trace!(
            "SoftwareBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        self.buffers.insert(
            handle,
            SoftBuffer {
                desc: desc.clone(),
                data: vec![0; desc.size as usize],
            },
        );
        Ok(handle)
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let entry = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| GraphicsError::UnknownResource(format!("{buffer:?}")))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > entry.data.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at {offset} overflows buffer {:?} of {} bytes",
                data.len(),
                entry.desc.label,
                entry.data.len()
            )));
        }
        entry.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle, GraphicsError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {:?} has zero size",
                desc.label
            )));
        }
        let handle = TextureHandle::from_raw(self.next_id());
        log::trace!(
            "SoftwareBackend: creating texture {:?} ({}x{}, {} mips, {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels,
            desc.format
        );
        self.textures.insert(handle, SoftTexture::new(desc.clone()));
        Ok(handle)
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        data: &CpuTexture,
    ) -> Result<(), GraphicsError> {
        let texels = decode_texels(data)?;
        let entry = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| GraphicsError::UnknownResource(format!("{texture:?}")))?;
        let image = entry.image_mut(layer, 0).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("layer {layer} out of range"))
        })?;
        if image.width != data.width || image.height != data.height {
            return Err(GraphicsError::InvalidParameter(format!(
                "upload of {}x{} into {}x{} texture",
                data.width, data.height, image.width, image.height
            )));
        }
        image.texels = texels;
        Ok(())
    }

    fn read_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        mip: u32,
    ) -> Result<TextureReadback, GraphicsError> {
        let image = self
            .textures
            .get(&texture)
            .ok_or_else(|| GraphicsError::UnknownResource(format!("{texture:?}")))?
            .image(layer, mip)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("layer {layer} mip {mip} out of range"))
            })?;
        Ok(TextureReadback {
            width: image.width,
            height: image.height,
            pixels: image.texels.clone(),
        })
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> Result<(), GraphicsError> {
        let entry = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| GraphicsError::UnknownResource(format!("{texture:?}")))?;
        for mips in &mut entry.layers {
            for mip in 1..mips.len() {
                let (w, h) = (mips[mip].width, mips[mip].height);
                mips[mip] = mips[mip - 1].downsample(w, h);
            }
        }
        Ok(())
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> Result<SamplerHandle, GraphicsError> {
        let handle = SamplerHandle::from_raw(self.next_id());
        log::trace!("SoftwareBackend: creating sampler {:?}", desc.label);
        self.samplers.insert(handle, desc.clone());
        Ok(handle)
    }

    fn create_shader(&mut self, desc: &ShaderDescriptor) -> CompiledShader {
        let (mut diagnostics, reflection) = check_wgsl(desc);
        if reflection.is_none() {
            return CompiledShader {
                handle: None,
                diagnostics,
            };
        }

        if !programs::is_native(&desc.name) {
            diagnostics.warnings.push(format!(
                "{}: no native software program; passes using it are recorded without shading",
                desc.name
            ));
        }

        let handle = ShaderHandle::from_raw(self.next_id());
        log::trace!("SoftwareBackend: compiled shader {}", desc.name);
        self.shaders.insert(
            handle,
            SoftShader {
                name: desc.name.clone(),
            },
        );
        CompiledShader {
            handle: Some(handle),
            diagnostics,
        }
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> Result<RenderTargetHandle, GraphicsError> {
        for view in desc.color.iter().chain(desc.depth.iter()) {
            let texture = self
                .textures
                .get(&view.texture)
                .ok_or_else(|| GraphicsError::UnknownResource(format!("{:?}", view.texture)))?;
            if texture.image(view.layer, view.mip).is_none() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "view layer {} mip {} out of range for {:?}",
                    view.layer, view.mip, texture.desc.label
                )));
            }
        }
        let handle = RenderTargetHandle::from_raw(self.next_id());
        log::trace!(
            "SoftwareBackend: creating render target {:?} ({}x{}, {} color)",
            desc.label,
            desc.width,
            desc.height,
            desc.color.len()
        );
        self.targets.insert(handle, desc.clone());
        Ok(handle)
    }

    fn create_pipeline(
        &mut self,
        desc: &PipelineDescriptor,
    ) -> Result<PipelineHandle, GraphicsError> {
        let vertex = self
            .shaders
            .get(&desc.vertex)
            .ok_or_else(|| GraphicsError::UnknownResource(format!("{:?}", desc.vertex)))?;
        let fragment = self
            .shaders
            .get(&desc.fragment)
            .ok_or_else(|| GraphicsError::UnknownResource(format!("{:?}", desc.fragment)))?;
        let program = Program::resolve(&vertex.name, &fragment.name);
        let (vertex_name, fragment_name) = (vertex.name.clone(), fragment.name.clone());
        let handle = PipelineHandle::from_raw(self.next_id());
        log::trace!(
            "SoftwareBackend: creating pipeline {:?} ({} + {} -> {program:?})",
            desc.label,
            vertex_name,
            fragment_name
        );
        self.pipelines.insert(
            handle,
            SoftPipeline {
                label: desc.label.clone(),
                program,
                options: desc.options,
            },
        );
        Ok(handle)
    }

    fn release(&mut self, resource: ResourceHandle) {
        log::trace!("SoftwareBackend: releasing {resource}");
        let known = match resource {
            ResourceHandle::Buffer(h) => self.buffers.remove(&h).is_some(),
            ResourceHandle::Texture(h) => self.textures.remove(&h).is_some(),
            ResourceHandle::Shader(h) => self.shaders.remove(&h).is_some(),
            ResourceHandle::Sampler(h) => self.samplers.remove(&h).is_some(),
            ResourceHandle::RenderTarget(h) => self.targets.remove(&h).is_some(),
            ResourceHandle::Pipeline(h) => self.pipelines.remove(&h).is_some(),
        };
        if !known {
            log::warn!("SoftwareBackend: release of unknown {resource}");
        }
    }

    fn begin_frame(&mut self) {
        if self.frame_open {
            return;
        }
        self.frame_open = true;
        self.frame = FrameStats::default();
    }

    fn begin_pass(
        &mut self,
        target: RenderTargetHandle,
        clear: Option<ClearValues>,
        viewport: Viewport,
    ) -> Result<(), GraphicsError> {
        if self.pass.is_some() {
            log::warn!("SoftwareBackend: begin_pass while a pass is open; closing it");
            self.end_pass();
        }
        let desc = self
            .targets
            .get(&target)
            .ok_or_else(|| GraphicsError::UnknownResource(format!("{target:?}")))?
            .clone();

        if let Some(clear) = clear {
            for view in &desc.color {
                if let Some(image) = self
                    .textures
                    .get_mut(&view.texture)
                    .and_then(|t| t.image_mut(view.layer, view.mip))
                {
                    image.fill(clear.color);
                }
            }
            if let Some(view) = desc.depth {
                if let Some(image) = self
                    .textures
                    .get_mut(&view.texture)
                    .and_then(|t| t.image_mut(view.layer, view.mip))
                {
                    image.fill([clear.depth, 0.0, 0.0, 1.0]);
                }
            }
            self.stats.clears += 1;
            self.frame.clears += 1;
        }

        self.stats.passes += 1;
        self.frame.passes += 1;
        self.pass = Some(PassState {
            target,
            viewport,
            pipeline: None,
            vertex_buffer: None,
            index_buffer: None,
            bindings: HashMap::new(),
        });
        Ok(())
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        if let Some(pass) = self.pass.as_mut() {
            pass.pipeline = Some(pipeline);
        }
    }

    fn set_vertex_buffer(&mut self, buffer: BufferHandle) {
        if let Some(pass) = self.pass.as_mut() {
            pass.vertex_buffer = Some(buffer);
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle) {
        if let Some(pass) = self.pass.as_mut() {
            pass.index_buffer = Some(buffer);
        }
    }

    fn bind(&mut self, binding: &Binding) {
        if let Some(pass) = self.pass.as_mut() {
            pass.bindings.insert(binding.slot, binding.resource);
        }
    }

    fn draw(&mut self, vertex_count: u32) {
        self.execute_draw(None, vertex_count);
    }

    fn draw_indexed(&mut self, first_index: u32, index_count: u32) {
        self.execute_draw(Some((first_index, index_count)), 0);
    }

    fn end_pass(&mut self) {
        self.pass = None;
    }

    fn end_frame(&mut self) {
        self.pass = None;
    }

    fn submit(&mut self) -> Result<(), GraphicsError> {
        self.pass = None;
        if self.frame_open {
            self.stats.frames += 1;
            log::trace!(
                "SoftwareBackend: submitted frame ({} passes, {} clears, {} draws)",
                self.frame.passes,
                self.frame.clears,
                self.frame.draws
            );
        }
        self.frame_open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TextureUsage, TextureView};
    use umbra_core::texture::TextureFormat;

    fn target(backend: &mut SoftwareBackend, w: u32, h: u32) -> (TextureHandle, RenderTargetHandle) {
        let texture = backend
            .create_texture(&TextureDescriptor::new_2d(w, h, TextureFormat::Rgba16Float).attachment())
            .unwrap();
        let target = backend
            .create_render_target(&RenderTargetDescriptor {
                label: None,
                width: w,
                height: h,
                color: vec![TextureView::whole(texture)],
                depth: None,
            })
            .unwrap();
        (texture, target)
    }

    #[test]
    fn clear_fills_attachments() {
        let mut backend = SoftwareBackend::new();
        let (texture, rt) = target(&mut backend, 4, 4);
        backend.begin_frame();
        let clear = ClearValues {
            color: [0.25, 0.5, 0.75, 1.0],
            depth: 1.0,
        };
        backend.begin_pass(rt, Some(clear), Viewport::full(4, 4)).unwrap();
        backend.end_pass();
        backend.submit().unwrap();

        let readback = backend.read_texture(texture, 0, 0).unwrap();
        assert!(readback.pixels.iter().all(|p| *p == clear.color));
        assert_eq!(backend.stats().clears, 1);
        assert_eq!(backend.stats().frames, 1);
    }

    #[test]
    fn buffer_write_bounds_checked() {
        let mut backend = SoftwareBackend::new();
        let buffer = backend
            .create_buffer(&BufferDescriptor::uniform(8))
            .unwrap();
        assert!(backend.write_buffer(buffer, 4, &[1, 2, 3, 4]).is_ok());
        assert!(matches!(
            backend.write_buffer(buffer, 6, &[1, 2, 3, 4]),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn texture_upload_and_mips() {
        let mut backend = SoftwareBackend::new();
        let mut desc = TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm).with_mips(3);
        desc.usage |= TextureUsage::COPY_SRC;
        let texture = backend.create_texture(&desc).unwrap();
        backend
            .write_texture(texture, 0, &CpuTexture::solid(4, 4, [255, 0, 0, 255]))
            .unwrap();
        backend.generate_mipmaps(texture).unwrap();

        let mip2 = backend.read_texture(texture, 0, 2).unwrap();
        assert_eq!((mip2.width, mip2.height), (1, 1));
        assert_eq!(mip2.pixels[0], [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn upload_size_mismatch_is_rejected() {
        let mut backend = SoftwareBackend::new();
        let texture = backend
            .create_texture(&TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        assert!(backend
            .write_texture(texture, 0, &CpuTexture::solid(2, 2, [0; 4]))
            .is_err());
    }

    #[test]
    fn invalid_shader_has_no_handle() {
        let mut backend = SoftwareBackend::new();
        let compiled = backend.create_shader(&ShaderDescriptor::new(
            "broken.frag.wgsl",
            crate::types::ShaderStage::Fragment,
            "this is not wgsl",
        ));
        assert!(compiled.handle.is_none());
        assert!(compiled.diagnostics.has_errors());
    }

    #[test]
    fn custom_shader_compiles_with_warning() {
        let mut backend = SoftwareBackend::new();
        let compiled = backend.create_shader(&ShaderDescriptor::new(
            "custom.frag.wgsl",
            crate::types::ShaderStage::Fragment,
            "@fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }",
        ));
        assert!(compiled.handle.is_some());
        assert!(!compiled.diagnostics.has_errors());
        assert_eq!(compiled.diagnostics.warnings.len(), 1);
    }

    #[test]
    fn release_removes_resources() {
        let mut backend = SoftwareBackend::new();
        let buffer = backend.create_buffer(&BufferDescriptor::uniform(16)).unwrap();
        assert_eq!(backend.live_resources(), 1);
        backend.release(buffer.into());
        assert_eq!(backend.live_resources(), 0);
        backend.release(buffer.into());
    }
}
