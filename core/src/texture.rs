//! CPU-side texture data.
//!
//! Provides [`CpuTexture`] for holding raw pixel data, along with the
//! [`TextureFormat`] enum shared between CPU and GPU code.

use serde::{Deserialize, Serialize};

/// Pixel format of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureFormat {
    /// 8-bit RGBA, linear.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB encoded.
    Rgba8UnormSrgb,
    /// 16-bit float RGBA (HDR targets).
    Rgba16Float,
    /// 32-bit float RGBA (HDR source images, G-buffer positions).
    Rgba32Float,
    /// Two 16-bit float channels (BRDF LUT).
    Rg16Float,
    /// Single 32-bit float channel.
    R32Float,
    /// 32-bit float depth.
    Depth32Float,
}

impl TextureFormat {
    /// Size of one texel in bytes.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8Unorm | Self::Rgba8UnormSrgb => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
            Self::Rg16Float => 4,
            Self::R32Float | Self::Depth32Float => 4,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float)
    }

    pub fn is_hdr(self) -> bool {
        matches!(
            self,
            Self::Rgba16Float | Self::Rgba32Float | Self::Rg16Float | Self::R32Float
        )
    }
}

/// Raw pixel data of a single 2D image (mip 0).
#[derive(Debug, Clone, PartialEq)]
pub struct CpuTexture {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
}

impl CpuTexture {
    /// Creates a texture from tightly packed RGBA8 pixels.
    ///
    /// Returns `None` if `data` does not hold `width * height` pixels.
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == width as usize * height as usize * 4).then_some(Self {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            data,
        })
    }

    /// Creates a texture from tightly packed RGBA32F pixels.
    pub fn from_rgba32f(width: u32, height: u32, pixels: &[f32]) -> Option<Self> {
        (pixels.len() == width as usize * height as usize * 4).then(|| Self {
            width,
            height,
            format: TextureFormat::Rgba32Float,
            data: bytemuck::cast_slice(pixels).to_vec(),
        })
    }

    /// A texture filled with one RGBA8 color.
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        let data = color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            data,
        }
    }

    /// A two-color checkerboard with `cell` sized squares.
    pub fn checkerboard(size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = cell.max(1);
        let mut data = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let color = if ((x / cell) + (y / cell)) % 2 == 0 { a } else { b };
                data.extend_from_slice(&color);
            }
        }
        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8Unorm,
            data,
        }
    }

    /// The magenta/black checkerboard substituted for textures that failed to load.
    pub fn placeholder() -> Self {
        Self::checkerboard(8, 4, [255, 0, 255, 255], [0, 0, 0, 255])
    }

    /// Reads one texel as linear RGBA floats, `None` if out of range.
    pub fn texel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let offset = (y as usize * self.width as usize + x as usize) * bpp;
        let bytes = self.data.get(offset..offset + bpp)?;
        match self.format {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => Some([
                bytes[0] as f32 / 255.0,
                bytes[1] as f32 / 255.0,
                bytes[2] as f32 / 255.0,
                bytes[3] as f32 / 255.0,
            ]),
            TextureFormat::Rgba32Float => {
                let mut out = [0.0f32; 4];
                for (i, chunk) in bytes.chunks_exact(4).enumerate() {
                    out[i] = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
                Some(out)
            }
            TextureFormat::R32Float | TextureFormat::Depth32Float => {
                let v = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                Some([v, v, v, 1.0])
            }
            TextureFormat::Rgba16Float | TextureFormat::Rg16Float => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_fills_every_pixel() {
        let tex = CpuTexture::solid(3, 2, [1, 2, 3, 4]);
        assert_eq!(tex.data.len(), 24);
        assert_eq!(&tex.data[20..24], &[1, 2, 3, 4]);
    }

    #[test]
    fn from_rgba8_checks_length() {
        assert!(CpuTexture::from_rgba8(2, 2, vec![0; 16]).is_some());
        assert!(CpuTexture::from_rgba8(2, 2, vec![0; 15]).is_none());
    }

    #[test]
    fn placeholder_is_magenta_checker() {
        let tex = CpuTexture::placeholder();
        assert_eq!(tex.texel(0, 0), Some([1.0, 0.0, 1.0, 1.0]));
        assert_eq!(tex.texel(4, 0), Some([0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn texel_reads_float_data() {
        let tex = CpuTexture::from_rgba32f(1, 1, &[0.5, 2.0, 0.0, 1.0]).unwrap();
        assert_eq!(tex.texel(0, 0), Some([0.5, 2.0, 0.0, 1.0]));
        assert_eq!(tex.texel(1, 0), None);
    }
}
