//! Opaque backend resource handles.

use std::fmt;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $variant:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a backend-assigned id.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl From<$name> for ResourceHandle {
            fn from(handle: $name) -> Self {
                ResourceHandle::$variant(handle)
            }
        }
    };
}

define_handle!(
    /// Handle to a GPU buffer.
    BufferHandle,
    Buffer
);
define_handle!(
    /// Handle to a GPU texture (all layers and mips).
    TextureHandle,
    Texture
);
define_handle!(
    /// Handle to a compiled shader stage.
    ShaderHandle,
    Shader
);
define_handle!(
    /// Handle to a texture sampler.
    SamplerHandle,
    Sampler
);
define_handle!(
    /// Handle to a set of color and depth attachments.
    RenderTargetHandle,
    RenderTarget
);
define_handle!(
    /// Handle to a vertex + fragment pipeline.
    PipelineHandle,
    Pipeline
);

/// Any backend resource, used by the release queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    Shader(ShaderHandle),
    Sampler(SamplerHandle),
    RenderTarget(RenderTargetHandle),
    Pipeline(PipelineHandle),
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(h) => write!(f, "buffer#{}", h.raw()),
            Self::Texture(h) => write!(f, "texture#{}", h.raw()),
            Self::Shader(h) => write!(f, "shader#{}", h.raw()),
            Self::Sampler(h) => write!(f, "sampler#{}", h.raw()),
            Self::RenderTarget(h) => write!(f, "target#{}", h.raw()),
            Self::Pipeline(h) => write!(f, "pipeline#{}", h.raw()),
        }
    }
}
