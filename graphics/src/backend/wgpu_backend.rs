//! wgpu GPU backend implementation.
//!
//! Renders offscreen on any adapter wgpu can open (Vulkan, Metal, DX12,
//! GL). Passes are recorded as they arrive and encoded when they end; each
//! pass is submitted on its own so that buffer writes issued between two
//! passes land in order, matching the immediate model of the trait.
//!
//! Pipelines use automatic layouts and are specialized lazily for the
//! attachment formats of the target they are first drawn into.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use umbra_core::mesh::Vertex;
use umbra_core::texture::CpuTexture;

use super::texels::{decode_texel, decode_texels, encode_texels};
use super::GraphicsBackend;
use crate::error::GraphicsError;
use crate::types::{
    AddressMode, Binding, BindingResource, BlendMode, BufferDescriptor, BufferHandle, BufferUsage,
    ClearValues, CompareFunction, CompiledShader, CullMode, FilterMode, PipelineDescriptor,
    PipelineHandle, PipelineOptions, RenderTargetDescriptor, RenderTargetHandle, ResourceHandle,
    SamplerDescriptor, SamplerHandle, ShaderDescriptor, ShaderHandle, ShaderStage,
    TextureDescriptor, TextureDimension, TextureFormat, TextureHandle, TextureReadback,
    TextureUsage, Viewport,
};
use crate::validation::{check_wgsl, ShaderReflection};

const MIPMAP_SHADER: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let limit = vec2<i32>(textureDimensions(source)) - vec2<i32>(1, 1);
    let base = vec2<i32>(position.xy) * 2;
    var sum = vec4<f32>(0.0);
    for (var i = 0; i < 4; i = i + 1) {
        let texel = min(base + vec2<i32>(i & 1, i >> 1u), limit);
        sum = sum + textureLoad(source, texel, 0);
    }
    return sum * 0.25;
}
"#;

struct WgpuBuffer {
    buffer: wgpu::Buffer,
}

struct WgpuTexture {
    desc: TextureDescriptor,
    texture: wgpu::Texture,
    /// View used when the texture is bound for sampling.
    sampled: wgpu::TextureView,
}

struct WgpuShader {
    module: Arc<wgpu::ShaderModule>,
    reflection: ShaderReflection,
}

struct WgpuTarget {
    color: Vec<(wgpu::TextureView, wgpu::TextureFormat)>,
    depth: Option<(wgpu::TextureView, wgpu::TextureFormat)>,
}

impl WgpuTarget {
    fn formats(&self) -> FormatKey {
        FormatKey {
            color: self.color.iter().map(|(_, format)| *format).collect(),
            depth: self.depth.as_ref().map(|(_, format)| *format),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FormatKey {
    color: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
}

struct WgpuPipeline {
    label: Option<String>,
    vertex: Arc<wgpu::ShaderModule>,
    fragment: Arc<wgpu::ShaderModule>,
    vertex_inputs: BTreeSet<u32>,
    bindings: BTreeSet<u32>,
    options: PipelineOptions,
    variants: HashMap<FormatKey, wgpu::RenderPipeline>,
}

enum Command {
    Pipeline(PipelineHandle),
    VertexBuffer(BufferHandle),
    IndexBuffer(BufferHandle),
    Bind(Binding),
    Draw(u32),
    DrawIndexed(u32, u32),
}

struct PendingPass {
    target: RenderTargetHandle,
    clear: Option<ClearValues>,
    viewport: Viewport,
    commands: Vec<Command>,
}

/// A draw whose pipeline variant and bind group have been resolved.
struct ResolvedDraw {
    pipeline: PipelineHandle,
    bind_group: Option<wgpu::BindGroup>,
    vertex: Option<BufferHandle>,
    index: Option<BufferHandle>,
    call: DrawCall,
}

enum DrawCall {
    Vertices(u32),
    Indexed(u32, u32),
}

/// wgpu-based GPU backend.
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_id: u64,
    buffers: HashMap<BufferHandle, WgpuBuffer>,
    textures: HashMap<TextureHandle, WgpuTexture>,
    samplers: HashMap<SamplerHandle, wgpu::Sampler>,
    shaders: HashMap<ShaderHandle, WgpuShader>,
    targets: HashMap<RenderTargetHandle, WgpuTarget>,
    pipelines: HashMap<PipelineHandle, WgpuPipeline>,
    mipmap_layout: wgpu::BindGroupLayout,
    mipmap_module: wgpu::ShaderModule,
    mipmap_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    pass: Option<PendingPass>,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.adapter.get_info().name)
            .finish()
    }
}

impl WgpuBackend {
    /// Opens the first high-performance adapter without a surface.
    pub fn new() -> Result<Self, GraphicsError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| GraphicsError::InitializationFailed("no compatible GPU adapter".into()))?;

        log::info!("wgpu adapter: {:?}", adapter.get_info());

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Umbra Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .map_err(|e| GraphicsError::InitializationFailed(format!("device creation failed: {e}")))?;

        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            log::error!("wgpu: {err}");
        }));

        let mipmap_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mipmap"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let mipmap_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mipmap"),
            source: wgpu::ShaderSource::Wgsl(MIPMAP_SHADER.into()),
        });

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            next_id: 0,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            shaders: HashMap::new(),
            targets: HashMap::new(),
            pipelines: HashMap::new(),
            mipmap_layout,
            mipmap_module,
            mipmap_pipelines: HashMap::new(),
            pass: None,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn texture(&self, handle: TextureHandle) -> Result<&WgpuTexture, GraphicsError> {
        self.textures
            .get(&handle)
            .ok_or_else(|| GraphicsError::UnknownResource(format!("{handle:?}")))
    }

    fn attachment_view(
        texture: &WgpuTexture,
        layer: u32,
        mip: u32,
    ) -> Result<wgpu::TextureView, GraphicsError> {
        if layer >= texture.desc.layers() || mip >= texture.desc.mip_levels {
            return Err(GraphicsError::InvalidParameter(format!(
                "view layer {layer} mip {mip} out of range for {:?}",
                texture.desc.label
            )));
        }
        Ok(texture.texture.create_view(&wgpu::TextureViewDescriptor {
            label: texture.desc.label.as_deref(),
            dimension: Some(wgpu::TextureViewDimension::D2),
            aspect: aspect_of(texture.desc.format),
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: layer,
            array_layer_count: Some(1),
            ..Default::default()
        }))
    }

    /// Depth textures cannot be copy destinations, so uploads clear them to
    /// the first texel instead.
    fn clear_depth(&self, texture: TextureHandle, layer: u32, depth: f32) -> Result<(), GraphicsError> {
        let view = Self::attachment_view(self.texture(texture)?, layer, 0)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("depth upload") });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("depth upload"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(depth),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn mipmap_pipeline(&mut self, format: wgpu::TextureFormat) -> &wgpu::RenderPipeline {
        let device = &self.device;
        let layout = &self.mipmap_layout;
        let module = &self.mipmap_module;
        self.mipmap_pipelines.entry(format).or_insert_with(|| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("mipmap"),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("mipmap"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(format.into())],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })
    }

    fn ensure_variant(&mut self, pipeline: PipelineHandle, key: &FormatKey) -> Result<(), GraphicsError> {
        let device = &self.device;
        let entry = self
            .pipelines
            .get_mut(&pipeline)
            .ok_or_else(|| GraphicsError::UnknownResource(format!("{pipeline:?}")))?;
        if entry.variants.contains_key(key) {
            return Ok(());
        }
        log::debug!(
            "WgpuBackend: specializing pipeline {:?} for {:?}",
            entry.label,
            key
        );

        let attributes: Vec<wgpu::VertexAttribute> = VERTEX_ATTRIBUTES
            .iter()
            .filter(|attr| entry.vertex_inputs.contains(&attr.shader_location))
            .copied()
            .collect();
        let buffers = if attributes.is_empty() {
            Vec::new()
        } else {
            vec![wgpu::VertexBufferLayout {
                array_stride: Vertex::STRIDE as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            }]
        };

        let blend = convert_blend(entry.options.blend);
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend: if is_blendable(format) { blend } else { None },
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let options = entry.options;
        let depth_stencil = key.depth.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: options.depth_test && options.depth_write,
            depth_compare: if options.depth_test {
                convert_compare_function(options.depth_compare)
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState {
                constant: (options.depth_bias * (1 << 24) as f32) as i32,
                slope_scale: if options.depth_bias > 0.0 { 1.0 } else { 0.0 },
                clamp: 0.0,
            },
        });

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: entry.label.as_deref(),
            layout: None,
            vertex: wgpu::VertexState {
                module: &entry.vertex,
                entry_point: Some(ShaderStage::Vertex.entry_point()),
                compilation_options: Default::default(),
                buffers: &buffers,
            },
            fragment: Some(wgpu::FragmentState {
                module: &entry.fragment,
                entry_point: Some(ShaderStage::Fragment.entry_point()),
                compilation_options: Default::default(),
                targets: &targets,
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: convert_cull_mode(options.cull_mode),
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        entry.variants.insert(key.clone(), render_pipeline);
        Ok(())
    }

    /// Builds the bind group for a draw from the pass bindings.
    ///
    /// Returns `None` for the draw when a slot the pipeline reads is unbound.
    fn bind_group(
        &self,
        pipeline: &WgpuPipeline,
        variant: &wgpu::RenderPipeline,
        bound: &HashMap<u32, BindingResource>,
    ) -> Option<Option<wgpu::BindGroup>> {
        if pipeline.bindings.is_empty() {
            return Some(None);
        }
        let mut entries = Vec::with_capacity(pipeline.bindings.len());
        for &slot in &pipeline.bindings {
            let resource = match bound.get(&slot) {
                Some(BindingResource::Buffer(h)) => {
                    self.buffers.get(h).map(|b| b.buffer.as_entire_binding())
                }
                Some(BindingResource::Texture(h)) => self
                    .textures
                    .get(h)
                    .map(|t| wgpu::BindingResource::TextureView(&t.sampled)),
                Some(BindingResource::Sampler(h)) => {
                    self.samplers.get(h).map(wgpu::BindingResource::Sampler)
                }
                None => None,
            };
            let Some(resource) = resource else {
                log::warn!(
                    "WgpuBackend: pipeline {:?} slot {slot} has no live binding; skipping draw",
                    pipeline.label
                );
                return None;
            };
            entries.push(wgpu::BindGroupEntry { binding: slot, resource });
        }
        Some(Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: pipeline.label.as_deref(),
            layout: &variant.get_bind_group_layout(0),
            entries: &entries,
        })))
    }

    fn encode_pass(&mut self, pass: PendingPass) -> Result<(), GraphicsError> {
        let key = self
            .targets
            .get(&pass.target)
            .ok_or_else(|| GraphicsError::UnknownResource(format!("{:?}", pass.target)))?
            .formats();

        for command in &pass.commands {
            if let Command::Pipeline(pipeline) = command {
                self.ensure_variant(*pipeline, &key)?;
            }
        }

        let mut draws = Vec::new();
        let mut pipeline = None;
        let mut vertex = None;
        let mut index = None;
        let mut bound = HashMap::new();
        for command in &pass.commands {
            match command {
                Command::Pipeline(p) => pipeline = Some(*p),
                Command::VertexBuffer(b) => vertex = Some(*b),
                Command::IndexBuffer(b) => index = Some(*b),
                Command::Bind(binding) => {
                    bound.insert(binding.slot, binding.resource);
                }
                Command::Draw(_) | Command::DrawIndexed(..) => {
                    let Some(handle) = pipeline else {
                        log::trace!("WgpuBackend: draw without pipeline ignored");
                        continue;
                    };
                    let Some(entry) = self.pipelines.get(&handle) else {
                        continue;
                    };
                    let Some(variant) = entry.variants.get(&key) else {
                        continue;
                    };
                    let Some(bind_group) = self.bind_group(entry, variant, &bound) else {
                        continue;
                    };
                    if !entry.vertex_inputs.is_empty() && vertex.is_none() {
                        log::warn!("WgpuBackend: pipeline {:?} needs a vertex buffer", entry.label);
                        continue;
                    }
                    let call = match command {
                        Command::DrawIndexed(first, count) => {
                            if index.is_none() {
                                log::warn!("WgpuBackend: indexed draw without an index buffer");
                                continue;
                            }
                            DrawCall::Indexed(*first, *count)
                        }
                        Command::Draw(count) => DrawCall::Vertices(*count),
                        _ => continue,
                    };
                    draws.push(ResolvedDraw {
                        pipeline: handle,
                        bind_group,
                        vertex,
                        index,
                        call,
                    });
                }
            }
        }

        let target = self
            .targets
            .get(&pass.target)
            .ok_or_else(|| GraphicsError::UnknownResource(format!("{:?}", pass.target)))?;
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = target
            .color
            .iter()
            .map(|(view, _)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match pass.clear {
                            Some(clear) => wgpu::LoadOp::Clear(wgpu::Color {
                                r: clear.color[0] as f64,
                                g: clear.color[1] as f64,
                                b: clear.color[2] as f64,
                                a: clear.color[3] as f64,
                            }),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_stencil_attachment =
            target
                .depth
                .as_ref()
                .map(|(view, _)| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: match pass.clear {
                            Some(clear) => wgpu::LoadOp::Clear(clear.depth),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("pass") });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: None,
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let viewport = pass.viewport;
            render_pass.set_viewport(
                viewport.x as f32,
                viewport.y as f32,
                viewport.width as f32,
                viewport.height as f32,
                0.0,
                1.0,
            );

            for draw in &draws {
                let Some(pipeline) = self
                    .pipelines
                    .get(&draw.pipeline)
                    .and_then(|p| p.variants.get(&key))
                else {
                    continue;
                };
                render_pass.set_pipeline(pipeline);
                if let Some(bind_group) = &draw.bind_group {
                    render_pass.set_bind_group(0, bind_group, &[]);
                }
                if let Some(buffer) = draw.vertex.and_then(|b| self.buffers.get(&b)) {
                    render_pass.set_vertex_buffer(0, buffer.buffer.slice(..));
                }
                match draw.call {
                    DrawCall::Vertices(count) => render_pass.draw(0..count, 0..1),
                    DrawCall::Indexed(first, count) => {
                        if let Some(buffer) = draw.index.and_then(|b| self.buffers.get(&b)) {
                            render_pass.set_index_buffer(buffer.buffer.slice(..), wgpu::IndexFormat::Uint32);
                            render_pass.draw_indexed(first..first + count, 0, 0..1);
                        }
                    }
                }
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn record(&mut self, command: Command) {
        match self.pass.as_mut() {
            Some(pass) => pass.commands.push(command),
            None => log::trace!("WgpuBackend: command outside a pass ignored"),
        }
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu Backend"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferHandle, GraphicsError> {
        let size = desc.size.max(4).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size,
            usage: convert_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });
        let handle = BufferHandle::from_raw(self.next_id());
        self.buffers.insert(handle, WgpuBuffer { buffer });
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
            .get(&buffer)
            .ok_or_else(|| GraphicsError::UnknownResource(format!("{buffer:?}")))?;
        let padded = (data.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        if offset + padded > entry.buffer.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at {offset} overflows buffer of {} bytes",
                data.len(),
                entry.buffer.size()
            )));
        }
        if padded == data.len() as u64 {
            self.queue.write_buffer(&entry.buffer, offset, data);
        } else {
            let mut bytes = data.to_vec();
            bytes.resize(padded as usize, 0);
            self.queue.write_buffer(&entry.buffer, offset, &bytes);
        }
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle, GraphicsError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {:?} has zero size",
                desc.label
            )));
        }
        let format = convert_texture_format(desc.format);
        let mut usage = convert_texture_usage(desc.usage) | wgpu::TextureUsages::COPY_SRC;
        if desc.mip_levels > 1 && !desc.format.is_depth() {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        if !desc.format.is_depth() {
            usage |= wgpu::TextureUsages::COPY_DST;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.layers(),
            },
            mip_level_count: desc.mip_levels.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let sampled = texture.create_view(&wgpu::TextureViewDescriptor {
            label: desc.label.as_deref(),
            dimension: Some(match desc.dimension {
                TextureDimension::D2 => wgpu::TextureViewDimension::D2,
                TextureDimension::Cube => wgpu::TextureViewDimension::Cube,
            }),
            aspect: aspect_of(desc.format),
            ..Default::default()
        });
        let handle = TextureHandle::from_raw(self.next_id());
        log::trace!(
            "WgpuBackend: creating texture {:?} ({}x{}, {} mips, {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels,
            desc.format
        );
        self.textures.insert(
            handle,
            WgpuTexture {
                desc: desc.clone(),
                texture,
                sampled,
            },
        );
        Ok(handle)
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        data: &CpuTexture,
    ) -> Result<(), GraphicsError> {
        let entry = self.texture(texture)?;
        if layer >= entry.desc.layers() {
            return Err(GraphicsError::InvalidParameter(format!("layer {layer} out of range")));
        }
        if entry.desc.width != data.width || entry.desc.height != data.height {
            return Err(GraphicsError::InvalidParameter(format!(
                "upload of {}x{} into {}x{} texture",
                data.width, data.height, entry.desc.width, entry.desc.height
            )));
        }
        let format = entry.desc.format;
        let texels = decode_texels(data)?;
        if format.is_depth() {
            let depth = texels.first().map_or(1.0, |t| t[0]);
            return self.clear_depth(texture, layer, depth);
        }

        let bytes = if data.format == format {
            data.data.clone()
        } else {
            encode_texels(&texels, format)
        };
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            &bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(data.width * format.bytes_per_pixel() as u32),
                rows_per_image: Some(data.height),
            },
            wgpu::Extent3d {
                width: data.width,
                height: data.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        mip: u32,
    ) -> Result<TextureReadback, GraphicsError> {
        let entry = self.texture(texture)?;
        if layer >= entry.desc.layers() || mip >= entry.desc.mip_levels {
            return Err(GraphicsError::InvalidParameter(format!(
                "layer {layer} mip {mip} out of range"
            )));
        }
        let (width, height) = entry.desc.mip_size(mip);
        let format = entry.desc.format;
        let bpp = format.bytes_per_pixel() as u32;
        let row = width * bpp;
        let padded_row = row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: mip,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: if format.is_depth() {
                    wgpu::TextureAspect::DepthOnly
                } else {
                    wgpu::TextureAspect::All
                },
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(GraphicsError::Internal(format!("readback map failed: {err}"))),
            Err(_) => return Err(GraphicsError::DeviceLost),
        }

        let pixels = {
            let mapped = slice.get_mapped_range();
            mapped
                .chunks_exact(padded_row as usize)
                .flat_map(|line| line[..row as usize].chunks_exact(bpp as usize))
                .map(|px| decode_texel(format, px))
                .collect()
        };
        staging.unmap();
        Ok(TextureReadback { width, height, pixels })
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> Result<(), GraphicsError> {
        let entry = self.texture(texture)?;
        if entry.desc.mip_levels <= 1 {
            return Ok(());
        }
        if entry.desc.format.is_depth() {
            log::warn!("WgpuBackend: mip generation skipped for depth texture {:?}", entry.desc.label);
            return Ok(());
        }
        let format = convert_texture_format(entry.desc.format);
        let (layers, mips) = (entry.desc.layers(), entry.desc.mip_levels);

        let mut views = Vec::with_capacity((layers * mips) as usize);
        for layer in 0..layers {
            for mip in 0..mips {
                views.push(Self::attachment_view(entry, layer, mip)?);
            }
        }
        self.mipmap_pipeline(format);
        let Some(pipeline) = self.mipmap_pipelines.get(&format) else {
            return Ok(());
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("mipmaps") });
        for layer in 0..layers {
            for mip in 1..mips {
                let source = &views[(layer * mips + mip - 1) as usize];
                let destination = &views[(layer * mips + mip) as usize];
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("mipmap"),
                    layout: &self.mipmap_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(source),
                    }],
                });
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("mipmap"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: destination,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> Result<SamplerHandle, GraphicsError> {
        let address_mode = convert_address_mode(desc.address_mode);
        let filter = convert_filter_mode(desc.filter);
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            ..Default::default()
        });
        let handle = SamplerHandle::from_raw(self.next_id());
        self.samplers.insert(handle, sampler);
        Ok(handle)
    }

    fn create_shader(&mut self, desc: &ShaderDescriptor) -> CompiledShader {
        let (mut diagnostics, reflection) = check_wgsl(desc);
        let Some(reflection) = reflection else {
            return CompiledShader {
                handle: None,
                diagnostics,
            };
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.name.as_str()),
            source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            diagnostics.errors.push(format!("{}: {err}", desc.name));
            return CompiledShader {
                handle: None,
                diagnostics,
            };
        }

        let handle = ShaderHandle::from_raw(self.next_id());
        log::trace!("WgpuBackend: compiled shader {}", desc.name);
        self.shaders.insert(
            handle,
            WgpuShader {
                module: Arc::new(module),
                reflection,
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
        let mut color = Vec::with_capacity(desc.color.len());
        for view in &desc.color {
            let texture = self.texture(view.texture)?;
            color.push((
                Self::attachment_view(texture, view.layer, view.mip)?,
                convert_texture_format(texture.desc.format),
            ));
        }
        let depth = match desc.depth {
            Some(view) => {
                let texture = self.texture(view.texture)?;
                Some((
                    Self::attachment_view(texture, view.layer, view.mip)?,
                    convert_texture_format(texture.desc.format),
                ))
            }
            None => None,
        };
        let handle = RenderTargetHandle::from_raw(self.next_id());
        self.targets.insert(handle, WgpuTarget { color, depth });
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
        let pipeline = WgpuPipeline {
            label: desc.label.clone(),
            vertex: Arc::clone(&vertex.module),
            fragment: Arc::clone(&fragment.module),
            vertex_inputs: vertex.reflection.vertex_inputs.clone(),
            bindings: vertex
                .reflection
                .bindings
                .union(&fragment.reflection.bindings)
                .copied()
                .collect(),
            options: desc.options,
            variants: HashMap::new(),
        };
        let handle = PipelineHandle::from_raw(self.next_id());
        self.pipelines.insert(handle, pipeline);
        Ok(handle)
    }

    fn release(&mut self, resource: ResourceHandle) {
        log::trace!("WgpuBackend: releasing {resource}");
        let known = match resource {
            ResourceHandle::Buffer(h) => self.buffers.remove(&h).map(|b| b.buffer.destroy()).is_some(),
            ResourceHandle::Texture(h) => self.textures.remove(&h).map(|t| t.texture.destroy()).is_some(),
            ResourceHandle::Shader(h) => self.shaders.remove(&h).is_some(),
            ResourceHandle::Sampler(h) => self.samplers.remove(&h).is_some(),
            ResourceHandle::RenderTarget(h) => self.targets.remove(&h).is_some(),
            ResourceHandle::Pipeline(h) => self.pipelines.remove(&h).is_some(),
        };
        if !known {
            log::warn!("WgpuBackend: release of unknown {resource}");
        }
    }

    fn begin_frame(&mut self) {}

    fn begin_pass(
        &mut self,
        target: RenderTargetHandle,
        clear: Option<ClearValues>,
        viewport: Viewport,
    ) -> Result<(), GraphicsError> {
        if self.pass.is_some() {
            log::warn!("WgpuBackend: begin_pass while a pass is open; closing it");
            self.end_pass();
        }
        if !self.targets.contains_key(&target) {
            return Err(GraphicsError::UnknownResource(format!("{target:?}")));
        }
        self.pass = Some(PendingPass {
            target,
            clear,
            viewport,
            commands: Vec::new(),
        });
        Ok(())
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.record(Command::Pipeline(pipeline));
    }

    fn set_vertex_buffer(&mut self, buffer: BufferHandle) {
        self.record(Command::VertexBuffer(buffer));
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle) {
        self.record(Command::IndexBuffer(buffer));
    }

    fn bind(&mut self, binding: &Binding) {
        self.record(Command::Bind(*binding));
    }

    fn draw(&mut self, vertex_count: u32) {
        self.record(Command::Draw(vertex_count));
    }

    fn draw_indexed(&mut self, first_index: u32, index_count: u32) {
        self.record(Command::DrawIndexed(first_index, index_count));
    }

    fn end_pass(&mut self) {
        if let Some(pass) = self.pass.take() {
            if let Err(err) = self.encode_pass(pass) {
                log::error!("WgpuBackend: pass dropped: {err}");
            }
        }
    }

    fn end_frame(&mut self) {
        self.end_pass();
    }

    fn submit(&mut self) -> Result<(), GraphicsError> {
        self.end_pass();
        let _ = self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }
}

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x2,
    3 => Float32x4
];

fn aspect_of(format: TextureFormat) -> wgpu::TextureAspect {
    if format.is_depth() {
        wgpu::TextureAspect::DepthOnly
    } else {
        wgpu::TextureAspect::All
    }
}

fn is_blendable(format: wgpu::TextureFormat) -> bool {
    !matches!(
        format,
        wgpu::TextureFormat::Rgba32Float | wgpu::TextureFormat::R32Float
    )
}

fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut result = wgpu::BufferUsages::COPY_DST;
    if usage.contains(BufferUsage::VERTEX) {
        result |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= wgpu::BufferUsages::COPY_SRC;
    }
    result
}

fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut result = wgpu::TextureUsages::empty();
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        result |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.contains(TextureUsage::COPY_SRC) {
        result |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= wgpu::TextureUsages::COPY_DST;
    }
    result
}

fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
    }
}

fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
    match func {
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn convert_cull_mode(mode: CullMode) -> Option<wgpu::Face> {
    match mode {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    }
}

fn convert_blend(mode: BlendMode) -> Option<wgpu::BlendState> {
    match mode {
        BlendMode::Replace => None,
        BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
        BlendMode::Additive => Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent::OVER,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_attributes_match_vertex_layout() {
        assert_eq!(VERTEX_ATTRIBUTES[3].offset, 32);
        assert_eq!(Vertex::STRIDE, 48);
    }

    #[test]
    fn float32_targets_never_blend() {
        assert!(!is_blendable(wgpu::TextureFormat::Rgba32Float));
        assert!(is_blendable(wgpu::TextureFormat::Rgba16Float));
    }

    #[test]
    fn buffers_are_always_writable() {
        assert!(convert_buffer_usage(BufferUsage::VERTEX).contains(wgpu::BufferUsages::COPY_DST));
    }
}
