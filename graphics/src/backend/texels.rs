//! Conversion between packed texel bytes and RGBA `f32` texels.

use half::f16;
use umbra_core::texture::{CpuTexture, TextureFormat};

use crate::error::GraphicsError;

/// Decodes one packed texel. `px` must be `format.bytes_per_pixel()` long.
pub(crate) fn decode_texel(format: TextureFormat, px: &[u8]) -> [f32; 4] {
    let half = |bytes: &[u8]| f16::from_le_bytes([bytes[0], bytes[1]]).to_f32();
    match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => [
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
            px[3] as f32 / 255.0,
        ],
        TextureFormat::Rgba16Float => [half(&px[0..2]), half(&px[2..4]), half(&px[4..6]), half(&px[6..8])],
        TextureFormat::Rg16Float => [half(&px[0..2]), half(&px[2..4]), 0.0, 1.0],
        TextureFormat::Rgba32Float => bytemuck::pod_read_unaligned(px),
        TextureFormat::R32Float | TextureFormat::Depth32Float => {
            let v: f32 = bytemuck::pod_read_unaligned(px);
            [v, 0.0, 0.0, 1.0]
        }
    }
}

/// Decodes a whole image, checking its byte length first.
pub(crate) fn decode_texels(data: &CpuTexture) -> Result<Vec<[f32; 4]>, GraphicsError> {
    let expected = data.width as usize * data.height as usize * data.format.bytes_per_pixel();
    if data.data.len() != expected {
        return Err(GraphicsError::InvalidParameter(format!(
            "texture data is {} bytes, expected {expected}",
            data.data.len()
        )));
    }
    Ok(data
        .data
        .chunks_exact(data.format.bytes_per_pixel())
        .map(|px| decode_texel(data.format, px))
        .collect())
}

/// Packs texels into `format`. 8-bit channels are clamped and rounded.
#[cfg_attr(not(feature = "wgpu-backend"), allow(dead_code))]
pub(crate) fn encode_texels(texels: &[[f32; 4]], format: TextureFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(texels.len() * format.bytes_per_pixel());
    let half = |out: &mut Vec<u8>, v: f32| out.extend_from_slice(&f16::from_f32(v).to_le_bytes());
    for texel in texels {
        match format {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => {
                out.extend(texel.iter().map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8));
            }
            TextureFormat::Rgba16Float => texel.iter().for_each(|&c| half(&mut out, c)),
            TextureFormat::Rg16Float => texel[..2].iter().for_each(|&c| half(&mut out, c)),
            TextureFormat::Rgba32Float => out.extend_from_slice(bytemuck::cast_slice(texel)),
            TextureFormat::R32Float | TextureFormat::Depth32Float => {
                out.extend_from_slice(&texel[0].to_le_bytes());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba8_decodes_to_unit_range() {
        let data = CpuTexture::solid(2, 1, [255, 0, 51, 255]);
        let texels = decode_texels(&data).unwrap();
        assert_eq!(texels.len(), 2);
        assert!((texels[0][2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut data = CpuTexture::solid(2, 2, [0; 4]);
        data.data.pop();
        assert!(decode_texels(&data).is_err());
    }

    #[test]
    fn half_float_encoding_survives_decode() {
        let bytes = encode_texels(&[[1.5, -2.0, 0.25, 1.0]], TextureFormat::Rgba16Float);
        assert_eq!(bytes.len(), 8);
        assert_eq!(decode_texel(TextureFormat::Rgba16Float, &bytes), [1.5, -2.0, 0.25, 1.0]);
    }

    #[test]
    fn rgba8_encoding_clamps() {
        let bytes = encode_texels(&[[2.0, -1.0, 0.5, 1.0]], TextureFormat::Rgba8Unorm);
        assert_eq!(bytes, vec![255, 0, 128, 255]);
    }
}
