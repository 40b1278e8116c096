use umbra_core::asset::{AssetKind, Handle};
use umbra_graphics::Renderer;

use super::{Asset, AssetManager, CachedAsset};
use crate::error::AssetError;

/// Script source text. The script engine decides what it means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub source: String,
}

/// Undecoded audio bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sound {
    pub bytes: Vec<u8>,
}

impl Asset for Script {
    fn kind(_: &str) -> AssetKind {
        AssetKind::Script
    }

    fn pending(_: &str) -> Self {
        Self::default()
    }

    fn into_cached(handle: Handle<Self>) -> CachedAsset {
        CachedAsset::Script(handle)
    }

    fn from_cached(entry: &CachedAsset) -> Option<Handle<Self>> {
        match entry {
            CachedAsset::Script(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    fn start(assets: &mut AssetManager, _: &mut Renderer, handle: &Handle<Self>) {
        let path = handle.path();
        let source = assets
            .read(path)
            .and_then(|bytes| String::from_utf8(bytes).map_err(|err| AssetError::decode(path, err)));
        match source {
            Ok(source) => assets.complete(handle, Self { source }),
            Err(err) => assets.fail(handle, &err, Self::default()),
        }
    }

    fn encode(&self, _: &mut Renderer, _: &str) -> Result<Vec<u8>, AssetError> {
        Ok(self.source.clone().into_bytes())
    }
}

impl Asset for Sound {
    fn kind(_: &str) -> AssetKind {
        AssetKind::Sound
    }

    fn pending(_: &str) -> Self {
        Self::default()
    }

    fn into_cached(handle: Handle<Self>) -> CachedAsset {
        CachedAsset::Sound(handle)
    }

    fn from_cached(entry: &CachedAsset) -> Option<Handle<Self>> {
        match entry {
            CachedAsset::Sound(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    fn start(assets: &mut AssetManager, _: &mut Renderer, handle: &Handle<Self>) {
        match assets.read(handle.path()) {
            Ok(bytes) => assets.complete(handle, Self { bytes }),
            Err(err) => assets.fail(handle, &err, Self::default()),
        }
    }

    fn encode(&self, _: &mut Renderer, _: &str) -> Result<Vec<u8>, AssetError> {
        Ok(self.bytes.clone())
    }
}
