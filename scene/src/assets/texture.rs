use std::io::Cursor;

use umbra_core::asset::{AssetKind, Handle};
use umbra_core::texture::CpuTexture;
use umbra_graphics::{Renderer, Texture, TextureHandle};

use super::{extension, Asset, AssetManager, CachedAsset, DEFAULT, PLACEHOLDER};
use crate::engine::Services;
use crate::error::AssetError;

/// A sampled 2D texture. Empty while loading.
#[derive(Debug, Default)]
pub struct TextureAsset {
    texture: Option<Texture>,
}

impl TextureAsset {
    pub fn new(texture: Texture) -> Self {
        Self { texture: Some(texture) }
    }

    pub fn texture(&self) -> Option<&Texture> {
        self.texture.as_ref()
    }

    /// The GPU handle, or `fallback` while nothing is uploaded.
    pub fn handle_or(&self, fallback: TextureHandle) -> TextureHandle {
        self.texture.as_ref().map_or(fallback, Texture::handle)
    }

    fn upload(renderer: &mut Renderer, data: &CpuTexture, label: &str) -> Result<Self, AssetError> {
        Ok(Self::new(renderer.create_texture_from_cpu(data, label)?))
    }

    fn placeholder(renderer: &mut Renderer, label: &str) -> Self {
        match Self::upload(renderer, &CpuTexture::placeholder(), label) {
            Ok(texture) => texture,
            Err(err) => {
                log::error!("AssetManager: cannot create placeholder texture: {err}");
                Self::default()
            }
        }
    }
}

/// Decodes PNG/JPEG/HDR bytes into CPU pixels. Radiance HDR stays float.
pub fn decode_image(path: &str, bytes: &[u8]) -> Result<CpuTexture, AssetError> {
    let image = image::load_from_memory(bytes).map_err(|err| AssetError::decode(path, err))?;
    let (width, height) = (image.width(), image.height());
    let texture = if extension(path).as_deref() == Some("hdr") {
        CpuTexture::from_rgba32f(width, height, image.to_rgba32f().as_raw())
    } else {
        CpuTexture::from_rgba8(width, height, image.to_rgba8().into_raw())
    };
    texture.ok_or_else(|| AssetError::decode(path, "pixel buffer size mismatch"))
}

impl Asset for TextureAsset {
    fn kind(_: &str) -> AssetKind {
        AssetKind::Texture
    }

    fn pending(_: &str) -> Self {
        Self::default()
    }

    fn into_cached(handle: Handle<Self>) -> CachedAsset {
        CachedAsset::Texture(handle)
    }

    fn from_cached(entry: &CachedAsset) -> Option<Handle<Self>> {
        match entry {
            CachedAsset::Texture(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    fn start(assets: &mut AssetManager, renderer: &mut Renderer, handle: &Handle<Self>) {
        let path = handle.path().to_string();
        let builtin = match path.as_str() {
            DEFAULT => Some(CpuTexture::solid(1, 1, [255, 255, 255, 255])),
            PLACEHOLDER => Some(CpuTexture::placeholder()),
            _ => None,
        };
        if let Some(data) = builtin {
            match Self::upload(renderer, &data, &path) {
                Ok(value) => assets.complete(handle, value),
                Err(err) => assets.fail(handle, &err, Self::default()),
            }
            return;
        }

        let source = assets.source().clone();
        let handle = handle.clone();
        assets.jobs().execute(
            move || source.read(&path).and_then(|bytes| decode_image(&path, &bytes)),
            move |decoded, services: &mut Services| {
                let label = handle.path().to_string();
                match decoded.and_then(|data| Self::upload(&mut services.renderer, &data, &label)) {
                    Ok(value) => services.assets.complete(&handle, value),
                    Err(err) => {
                        let fallback = Self::placeholder(&mut services.renderer, &label);
                        services.assets.fail(&handle, &err, fallback);
                    }
                }
            },
        );
    }

    fn encode(&self, renderer: &mut Renderer, path: &str) -> Result<Vec<u8>, AssetError> {
        let texture = self
            .texture
            .as_ref()
            .ok_or_else(|| AssetError::Unsupported(path.to_string()))?;
        let readback = renderer.read_texture(texture, 0, 0)?;
        let bytes: Vec<u8> = readback
            .pixels
            .iter()
            .flat_map(|texel| texel.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect();
        let image = image::RgbaImage::from_raw(readback.width, readback.height, bytes)
            .ok_or_else(|| AssetError::decode(path, "readback size mismatch"))?;
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageOutputFormat::Png)
            .map_err(|err| AssetError::decode(path, err))?;
        Ok(out.into_inner())
    }
}
