//! # Umbra Graphics
//!
//! Render resource management and the built-in rendering stages of the
//! Umbra engine.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Renderer`] - Owns the backend, hands out RAII resources, caches
//!   pipelines and scopes passes inside a frame
//! - [`GraphicsBackend`](backend::GraphicsBackend) - Device abstraction with
//!   a software reference backend and an optional wgpu backend
//! - [`DeferredRenderer`] - G-buffer and lighting resolve
//! - [`PbrManager`] - BRDF lookup table and image based lighting
//! - [`postprocess`] - Bloom, GTAO, SSR and the final tonemap composite
//!
//! ## Example
//!
//! ```
//! use umbra_graphics::{Renderer, RendererConfig};
//!
//! let mut renderer = Renderer::new(&RendererConfig::default());
//! assert!(renderer.init());
//! renderer.begin();
//! renderer.end();
//! renderer.submit().unwrap();
//! ```

pub mod backend;
pub mod deferred;
pub mod error;
pub mod mesh;
pub mod pbr;
pub mod postprocess;
pub mod renderer;
pub mod resources;
pub mod shaders;
pub mod sky;
pub mod types;
pub mod uniforms;
pub mod validation;

pub use backend::{BackendKind, GraphicsBackend, SoftwareBackend};
pub use deferred::{DeferredRenderer, DeferredState};
pub use error::GraphicsError;
pub use mesh::Mesh;
pub use pbr::{Environment, EnvironmentSource, PbrManager};
pub use postprocess::{
    Bloom, BloomSettings, Gtao, GtaoSettings, PostEffect, Ssr, SsrInputs, SsrSettings, Tonemap,
    TonemapInputs, TonemapOperator, TonemapSettings,
};
pub use renderer::{Fallbacks, PassEncoder, PassSetup, Renderer, RendererConfig};
pub use resources::{Buffer, RenderTarget, RenderTargetConfig, Sampler, Shader, Texture};
pub use shaders::{BuiltinShaders, ShaderProvider};
pub use sky::{ProceduralSky, SkyRenderer};
pub use types::{
    Binding, BufferUsage, ClearValues, FrameStats, PipelineHandle, PipelineOptions,
    TextureDescriptor, TextureFormat, TextureHandle, TextureView,
};

#[cfg(feature = "wgpu-backend")]
pub use backend::WgpuBackend;

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn default_config_uses_software_backend() {
        let mut renderer = Renderer::new(&RendererConfig::default());
        assert!(renderer.init());
        assert_eq!(renderer.backend_name(), Some("Software Backend"));
    }
}
