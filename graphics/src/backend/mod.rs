//! GPU backend abstraction layer.
//!
//! The [`Renderer`](crate::Renderer) talks to the device exclusively through
//! the [`GraphicsBackend`] trait, so the same resource and pass model runs on
//! real hardware and in headless tests.
//!
//! # Available Backends
//!
//! - `software` (always built): CPU reference backend. It rasterizes the
//!   built-in geometry, shadow, lighting, tonemap and copy programs and
//!   records every other pass without shading it.
//! - `wgpu-backend` (feature): cross-platform GPU backend using wgpu.
//!
//! # Command model
//!
//! Recording is immediate and strictly ordered: `begin_frame`, then any
//! number of `begin_pass` .. `end_pass` blocks with draws in between, then
//! `end_frame` and `submit`. Buffer and texture writes issued between passes
//! are ordered before the next pass.

pub mod software;
mod texels;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

use serde::{Deserialize, Serialize};

use crate::error::GraphicsError;
use crate::types::{
    Binding, BufferDescriptor, BufferHandle, ClearValues, CompiledShader, PipelineDescriptor,
    PipelineHandle, RenderTargetDescriptor, RenderTargetHandle, ResourceHandle, SamplerDescriptor,
    SamplerHandle, ShaderDescriptor, TextureDescriptor, TextureHandle, TextureReadback, Viewport,
};
use umbra_core::texture::CpuTexture;

pub use software::SoftwareBackend;

#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::WgpuBackend;

/// Which backend [`Renderer::init`](crate::Renderer::init) should load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Software,
    Wgpu,
}

impl BackendKind {
    /// Loads the backend.
    ///
    /// Fails when the backend is not compiled in or no device is available.
    pub fn load(self) -> Result<Box<dyn GraphicsBackend>, GraphicsError> {
        match self {
            Self::Software => Ok(Box::new(SoftwareBackend::new())),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu => Ok(Box::new(WgpuBackend::new()?)),
            #[cfg(not(feature = "wgpu-backend"))]
            Self::Wgpu => Err(GraphicsError::InitializationFailed(
                "wgpu backend is not compiled in (enable the `wgpu-backend` feature)".into(),
            )),
        }
    }
}

/// The device-facing half of the renderer.
pub trait GraphicsBackend: Send {
    fn name(&self) -> &'static str;

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferHandle, GraphicsError>;

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError>;

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureHandle, GraphicsError>;

    /// Uploads `data` into mip 0 of `layer`. Dimensions must match.
    fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        data: &CpuTexture,
    ) -> Result<(), GraphicsError>;

    /// Reads one layer and mip back to the CPU.
    fn read_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        mip: u32,
    ) -> Result<TextureReadback, GraphicsError>;

    /// Regenerates mips 1.. of every layer from mip 0.
    fn generate_mipmaps(&mut self, texture: TextureHandle) -> Result<(), GraphicsError>;

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> Result<SamplerHandle, GraphicsError>;

    /// Compiles a shader stage. Never fails as a call; see [`CompiledShader`].
    fn create_shader(&mut self, desc: &ShaderDescriptor) -> CompiledShader;

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> Result<RenderTargetHandle, GraphicsError>;

    fn create_pipeline(&mut self, desc: &PipelineDescriptor)
        -> Result<PipelineHandle, GraphicsError>;

    /// Destroys a resource. Unknown handles are ignored.
    fn release(&mut self, resource: ResourceHandle);

    fn begin_frame(&mut self);

    /// Opens a pass on `target`, clearing every attachment if `clear` is set.
    fn begin_pass(
        &mut self,
        target: RenderTargetHandle,
        clear: Option<ClearValues>,
        viewport: Viewport,
    ) -> Result<(), GraphicsError>;

    fn set_pipeline(&mut self, pipeline: PipelineHandle);

    fn set_vertex_buffer(&mut self, buffer: BufferHandle);

    fn set_index_buffer(&mut self, buffer: BufferHandle);

    fn bind(&mut self, binding: &Binding);

    fn draw(&mut self, vertex_count: u32);

    fn draw_indexed(&mut self, first_index: u32, index_count: u32);

    fn end_pass(&mut self);

    fn end_frame(&mut self);

    fn submit(&mut self) -> Result<(), GraphicsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_always_loads() {
        let backend = BackendKind::Software.load().unwrap();
        assert_eq!(backend.name(), "Software Backend");
    }

    #[cfg(not(feature = "wgpu-backend"))]
    #[test]
    fn wgpu_without_feature_fails_to_load() {
        assert!(matches!(
            BackendKind::Wgpu.load(),
            Err(GraphicsError::InitializationFailed(_))
        ));
    }
}
