//! Compiled shader stage.

use crate::types::{ShaderDiagnostics, ShaderHandle, ShaderStage};

use super::ReleaseQueue;

/// A shader stage as returned by [`Renderer::create_shader`](crate::Renderer::create_shader).
///
/// Compilation never fails as a call. A shader with errors has no handle;
/// pipelines requested with it fail with
/// [`GraphicsError::InvalidShader`](crate::GraphicsError::InvalidShader).
pub struct Shader {
    name: String,
    stage: ShaderStage,
    handle: Option<ShaderHandle>,
    diagnostics: ShaderDiagnostics,
    queue: Option<ReleaseQueue>,
}

impl Shader {
    pub(crate) fn new(
        name: String,
        stage: ShaderStage,
        handle: Option<ShaderHandle>,
        diagnostics: ShaderDiagnostics,
        queue: ReleaseQueue,
    ) -> Self {
        Self {
            name,
            stage,
            handle,
            diagnostics,
            queue: Some(queue),
        }
    }

    /// A shader with no backend object, used as the content of unloaded or
    /// broken shader assets.
    pub fn invalid(name: impl Into<String>, stage: ShaderStage) -> Self {
        Self {
            name: name.into(),
            stage,
            handle: None,
            diagnostics: ShaderDiagnostics::default(),
            queue: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn handle(&self) -> Option<ShaderHandle> {
        self.handle
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    pub fn diagnostics(&self) -> &ShaderDiagnostics {
        &self.diagnostics
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        if let (Some(handle), Some(queue)) = (self.handle, self.queue.as_ref()) {
            queue.push(handle.into());
        }
    }
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("handle", &self.handle)
            .field("errors", &self.diagnostics.errors.len())
            .field("warnings", &self.diagnostics.warnings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_shader_releases_nothing() {
        let shader = Shader::invalid("missing.frag.wgsl", ShaderStage::Fragment);
        assert!(!shader.is_valid());
        assert_eq!(shader.name(), "missing.frag.wgsl");
    }

    #[test]
    fn valid_shader_queues_release() {
        let queue = ReleaseQueue::new();
        let shader = Shader::new(
            "a.vert.wgsl".into(),
            ShaderStage::Vertex,
            Some(ShaderHandle::from_raw(1)),
            ShaderDiagnostics::default(),
            queue.clone(),
        );
        drop(shader);
        assert_eq!(queue.len(), 1);
    }
}
