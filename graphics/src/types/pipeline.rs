//! Pipeline state descriptors.

use std::hash::{Hash, Hasher};

use super::ShaderHandle;

/// Which triangle faces are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Depth comparison function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    Less,
    #[default]
    LessEqual,
    Always,
}

/// How fragment output is combined with the attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Replace,
    Alpha,
    Additive,
}

/// Fixed-function state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    pub cull_mode: CullMode,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
    /// Constant depth bias in depth units.
    pub depth_bias: f32,
    pub blend: BlendMode,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            depth_test: true,
            depth_write: true,
            depth_compare: CompareFunction::LessEqual,
            depth_bias: 0.0,
            blend: BlendMode::Replace,
        }
    }
}

impl PipelineOptions {
    /// Full-screen passes: no culling, no depth.
    pub fn fullscreen() -> Self {
        Self {
            cull_mode: CullMode::None,
            depth_test: false,
            depth_write: false,
            depth_compare: CompareFunction::Always,
            ..Self::default()
        }
    }

    /// Shadow map rendering: front-face culling plus a small bias.
    pub fn shadow() -> Self {
        Self {
            cull_mode: CullMode::Front,
            depth_bias: 0.0005,
            ..Self::default()
        }
    }
}

impl Eq for PipelineOptions {}

impl Hash for PipelineOptions {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cull_mode.hash(state);
        self.depth_test.hash(state);
        self.depth_write.hash(state);
        self.depth_compare.hash(state);
        self.depth_bias.to_bits().hash(state);
        self.blend.hash(state);
    }
}

/// Descriptor for creating a pipeline.
///
/// Pipelines are independent of the attachment formats they are used with;
/// backends that need format-specific state specialize lazily.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDescriptor {
    pub label: Option<String>,
    pub vertex: ShaderHandle,
    pub fragment: ShaderHandle,
    pub options: PipelineOptions,
}
