//! Shader stage descriptors and compile diagnostics.

use super::ShaderHandle;

/// Pipeline stage a shader is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// WGSL entry point name used by every engine shader of this stage.
    pub fn entry_point(self) -> &'static str {
        match self {
            Self::Vertex => "vs_main",
            Self::Fragment => "fs_main",
        }
    }
}

/// Source and identity of a shader stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderDescriptor {
    /// Asset path or built-in name, e.g. `builtin/lighting.frag.wgsl`.
    pub name: String,
    pub stage: ShaderStage,
    /// WGSL source text.
    pub source: String,
}

impl ShaderDescriptor {
    pub fn new(name: impl Into<String>, stage: ShaderStage, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage,
            source: source.into(),
        }
    }
}

/// Errors and warnings reported while compiling a shader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderDiagnostics {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ShaderDiagnostics {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// Result of a compile request.
///
/// Compilation never fails as a call: the backend always reports its
/// diagnostics, and `handle` is `None` when it could not produce a usable
/// shader object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShader {
    pub handle: Option<ShaderHandle>,
    pub diagnostics: ShaderDiagnostics,
}
