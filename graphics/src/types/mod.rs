//! Common types and descriptors for graphics resources.
//!
//! This module contains backend handles, usage flags, and the descriptor
//! structs passed to [`GraphicsBackend`](crate::backend::GraphicsBackend).

mod buffer;
mod handles;
mod pass;
mod pipeline;
mod sampler;
mod shader;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage};
pub use handles::{
    BufferHandle, PipelineHandle, RenderTargetHandle, ResourceHandle, SamplerHandle, ShaderHandle,
    TextureHandle,
};
pub use pass::{Binding, BindingResource, ClearValues, FrameStats, Viewport};
pub use pipeline::{BlendMode, CompareFunction, CullMode, PipelineDescriptor, PipelineOptions};
pub use sampler::{AddressMode, FilterMode, SamplerDescriptor};
pub use shader::{CompiledShader, ShaderDescriptor, ShaderDiagnostics, ShaderStage};
pub use texture::{
    RenderTargetDescriptor, TextureDescriptor, TextureDimension, TextureReadback, TextureUsage,
    TextureView,
};
pub use umbra_core::texture::TextureFormat;
