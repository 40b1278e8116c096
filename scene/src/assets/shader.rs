use umbra_core::asset::{AssetKind, Handle};
use umbra_graphics::shaders;
use umbra_graphics::types::{ShaderDescriptor, ShaderStage};
use umbra_graphics::{Renderer, Shader};

use super::{Asset, AssetManager, CachedAsset};
use crate::error::AssetError;

/// Stage implied by a shader path: built-ins know their stage, files use
/// a `.vert`/`.vs` marker, anything else is a fragment shader.
pub fn stage_of(path: &str) -> ShaderStage {
    if let Some(builtin) = shaders::find(path) {
        return builtin.stage;
    }
    let name = path.rsplit('/').next().unwrap_or(path);
    if name.contains(".vert") || name.contains(".vs") {
        ShaderStage::Vertex
    } else {
        ShaderStage::Fragment
    }
}

impl Asset for Shader {
    fn kind(path: &str) -> AssetKind {
        match stage_of(path) {
            ShaderStage::Vertex => AssetKind::VertexShader,
            ShaderStage::Fragment => AssetKind::FragmentShader,
        }
    }

    fn pending(path: &str) -> Self {
        Shader::invalid(path, stage_of(path))
    }

    fn into_cached(handle: Handle<Self>) -> CachedAsset {
        CachedAsset::Shader(handle)
    }

    fn from_cached(entry: &CachedAsset) -> Option<Handle<Self>> {
        match entry {
            CachedAsset::Shader(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Compiles on the calling thread. A file under the source root wins
    /// over the embedded built-in of the same path.
    fn start(assets: &mut AssetManager, renderer: &mut Renderer, handle: &Handle<Self>) {
        let path = handle.path();
        let stage = stage_of(path);
        let source = match assets.read(path) {
            Ok(bytes) => String::from_utf8(bytes).map_err(|err| AssetError::decode(path, err)),
            Err(AssetError::NotFound(missing)) => shaders::find(path)
                .map(|builtin| builtin.source.to_string())
                .ok_or(AssetError::NotFound(missing)),
            Err(err) => Err(err),
        };
        match source {
            Ok(source) => {
                let shader = renderer.create_shader(&ShaderDescriptor::new(path, stage, source));
                assets.complete(handle, shader);
            }
            Err(err) => assets.fail(handle, &err, Shader::invalid(path, stage)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("builtin/geometry.vert.wgsl", ShaderStage::Vertex)]
    #[case("builtin/lighting.frag.wgsl", ShaderStage::Fragment)]
    #[case("shaders/water.vs.wgsl", ShaderStage::Vertex)]
    #[case("shaders/water.wgsl", ShaderStage::Fragment)]
    fn stage_from_path(#[case] path: &str, #[case] stage: ShaderStage) {
        assert_eq!(stage_of(path), stage);
    }
}
