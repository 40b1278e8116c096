//! Texture types and descriptors.

use bitflags::bitflags;

use super::{TextureFormat, TextureHandle};

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be sampled in shaders.
        const TEXTURE_BINDING = 1 << 0;
        /// Texture can be used as a color or depth attachment.
        const RENDER_ATTACHMENT = 1 << 1;
        /// Texture can be copied from (readback).
        const COPY_SRC = 1 << 2;
        /// Texture can be copied to (uploads).
        const COPY_DST = 1 << 3;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::TEXTURE_BINDING | Self::COPY_DST
    }
}

/// 2D texture or six-layer cubemap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    #[default]
    D2,
    Cube,
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub dimension: TextureDimension,
}

impl TextureDescriptor {
    /// A sampled 2D texture with a single mip.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: None,
            width,
            height,
            mip_levels: 1,
            format,
            usage: TextureUsage::default(),
            dimension: TextureDimension::D2,
        }
    }

    /// A square cubemap.
    pub fn new_cube(size: u32, format: TextureFormat) -> Self {
        Self {
            dimension: TextureDimension::Cube,
            ..Self::new_2d(size, size, format)
        }
    }

    /// A texture usable as an attachment and as a shader input.
    pub fn attachment(mut self) -> Self {
        self.usage |= TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC;
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

    pub fn layers(&self) -> u32 {
        match self.dimension {
            TextureDimension::D2 => 1,
            TextureDimension::Cube => 6,
        }
    }

    /// Size of `mip`, never below one texel.
    pub fn mip_size(&self, mip: u32) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }

    /// Number of mips in a full chain for a `size` x `size` texture.
    pub fn full_mip_count(size: u32) -> u32 {
        32 - size.max(1).leading_zeros()
    }
}

/// One layer and mip of a texture, used as an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureView {
    pub texture: TextureHandle,
    pub layer: u32,
    pub mip: u32,
}

impl TextureView {
    pub fn whole(texture: TextureHandle) -> Self {
        Self {
            texture,
            layer: 0,
            mip: 0,
        }
    }
}

/// Descriptor for grouping attachments into a render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTargetDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub color: Vec<TextureView>,
    pub depth: Option<TextureView>,
}

/// Texels read back from one layer and mip, as linear RGBA floats.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureReadback {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[f32; 4]>,
}

impl TextureReadback {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1)]
    #[case(2, 2)]
    #[case(256, 9)]
    #[case(300, 9)]
    fn full_mip_count(#[case] size: u32, #[case] expected: u32) {
        assert_eq!(TextureDescriptor::full_mip_count(size), expected);
    }

    #[test]
    fn mip_size_never_zero() {
        let desc = TextureDescriptor::new_2d(8, 2, TextureFormat::Rgba8Unorm).with_mips(4);
        assert_eq!(desc.mip_size(0), (8, 2));
        assert_eq!(desc.mip_size(2), (2, 1));
        assert_eq!(desc.mip_size(3), (1, 1));
    }

    #[test]
    fn cube_has_six_layers() {
        assert_eq!(TextureDescriptor::new_cube(16, TextureFormat::Rgba16Float).layers(), 6);
    }
}
