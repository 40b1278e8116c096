//! RAII GPU resources.
//!
//! This module contains the owning wrappers handed out by the
//! [`Renderer`](crate::Renderer):
//! - [`Buffer`] - GPU memory buffer
//! - [`Texture`] - GPU texture or cubemap
//! - [`Sampler`] - Texture sampler
//! - [`RenderTarget`] - Color and depth attachments drawn into by passes
//! - [`Shader`] - Compiled shader stage plus its diagnostics
//!
//! Dropping a wrapper never talks to the backend directly. The handle is
//! pushed onto the shared [`ReleaseQueue`] and released by
//! [`Renderer::collect_garbage`](crate::Renderer::collect_garbage) at the
//! next frame boundary, after any commands that still reference it.

mod buffer;
mod release;
mod render_target;
mod sampler;
mod shader;
mod texture;

pub use buffer::Buffer;
pub use release::ReleaseQueue;
pub use render_target::{RenderTarget, RenderTargetConfig};
pub(crate) use render_target::OwnedAttachments;
pub use sampler::Sampler;
pub use shader::Shader;
pub use texture::Texture;
