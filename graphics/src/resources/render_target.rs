//! Render targets: attachments grouped for drawing.

use crate::types::{RenderTargetHandle, TextureFormat, TextureView};

use super::{ReleaseQueue, Texture};

/// Shape of a render target whose textures the target owns.
///
/// Kept on the target so it can be rebuilt at a new size with identical
/// formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTargetConfig {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub mip_levels: u32,
}

impl RenderTargetConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            label: None,
            width,
            height,
            color_formats: Vec::new(),
            depth_format: None,
            mip_levels: 1,
        }
    }

    pub fn with_color(mut self, format: TextureFormat) -> Self {
        self.color_formats.push(format);
        self
    }

    pub fn with_depth(mut self, format: TextureFormat) -> Self {
        self.depth_format = Some(format);
        self
    }

    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Same formats at a new size; both dimensions are clamped to one.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            ..self.clone()
        }
    }
}

pub(crate) struct OwnedAttachments {
    pub config: RenderTargetConfig,
    pub colors: Vec<Texture>,
    pub depth: Option<Texture>,
}

/// A set of color attachments plus an optional depth attachment.
///
/// Targets built from a [`RenderTargetConfig`] own their textures and can be
/// resized; targets built from views borrow textures owned elsewhere (cube
/// faces, mip levels, another effect's output).
pub struct RenderTarget {
    handle: RenderTargetHandle,
    label: Option<String>,
    width: u32,
    height: u32,
    color: Vec<TextureView>,
    depth: Option<TextureView>,
    owned: Option<OwnedAttachments>,
    queue: ReleaseQueue,
}

impl RenderTarget {
    pub(crate) fn new(
        handle: RenderTargetHandle,
        label: Option<String>,
        (width, height): (u32, u32),
        color: Vec<TextureView>,
        depth: Option<TextureView>,
        owned: Option<OwnedAttachments>,
        queue: ReleaseQueue,
    ) -> Self {
        Self {
            handle,
            label,
            width,
            height,
            color,
            depth,
            owned,
            queue,
        }
    }

    pub fn handle(&self) -> RenderTargetHandle {
        self.handle
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn color_views(&self) -> &[TextureView] {
        &self.color
    }

    pub fn depth_view(&self) -> Option<TextureView> {
        self.depth
    }

    /// Owned color texture `index`, `None` for view-built targets.
    pub fn color_texture(&self, index: usize) -> Option<&Texture> {
        self.owned.as_ref()?.colors.get(index)
    }

    pub fn depth_texture(&self) -> Option<&Texture> {
        self.owned.as_ref()?.depth.as_ref()
    }

    pub fn is_owned(&self) -> bool {
        self.owned.is_some()
    }

    pub fn config(&self) -> Option<&RenderTargetConfig> {
        self.owned.as_ref().map(|owned| &owned.config)
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        // The target goes first; owned textures follow as fields drop.
        self.queue.push(self.handle.into());
    }
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("handle", &self.handle)
            .field("label", &self.label)
            .field("size", &self.size())
            .field("color", &self.color.len())
            .field("depth", &self.depth.is_some())
            .field("owned", &self.is_owned())
            .finish()
    }
}

static_assertions::assert_impl_all!(RenderTarget: Send, Sync);
