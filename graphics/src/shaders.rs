//! Built-in shader library.
//!
//! The engine's own shaders are WGSL files stored in `graphics/shaders/` and
//! embedded at compile time. Each is addressable by an asset-style path under
//! `builtin/`, which is also the name the asset manager serves them under, so
//! user projects can override one by shipping a file with the same path.
//!
//! All shaders share one binding convention: group 0, binding 0 is the
//! matrices uniform uploaded by the [`Renderer`](crate::Renderer) before
//! every pass; the remaining slots are listed in the `slots` constants of
//! the module that drives each program.

use std::collections::HashMap;

use umbra_core::asset::{AssetKind, Handle};

use crate::renderer::Renderer;
use crate::resources::Shader;
use crate::types::{ShaderDescriptor, ShaderStage};

/// One embedded shader stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinShader {
    pub name: &'static str,
    pub stage: ShaderStage,
    pub source: &'static str,
}

impl BuiltinShader {
    pub fn descriptor(&self) -> ShaderDescriptor {
        ShaderDescriptor::new(self.name, self.stage, self.source)
    }

    pub fn asset_kind(&self) -> AssetKind {
        match self.stage {
            ShaderStage::Vertex => AssetKind::VertexShader,
            ShaderStage::Fragment => AssetKind::FragmentShader,
        }
    }
}

macro_rules! builtin {
    ($ident:ident, $file:literal, $stage:ident) => {
        pub const $ident: BuiltinShader = BuiltinShader {
            name: concat!("builtin/", $file),
            stage: ShaderStage::$stage,
            source: include_str!(concat!("../shaders/", $file)),
        };
    };
}

builtin!(GEOMETRY_VS, "geometry.vert.wgsl", Vertex);
builtin!(GEOMETRY_FS, "geometry.frag.wgsl", Fragment);
builtin!(SHADOW_VS, "shadow.vert.wgsl", Vertex);
builtin!(SHADOW_FS, "shadow.frag.wgsl", Fragment);
builtin!(FULLSCREEN_VS, "fullscreen.vert.wgsl", Vertex);
builtin!(CUBEMAP_VS, "cubemap.vert.wgsl", Vertex);
builtin!(LIGHTING_FS, "lighting.frag.wgsl", Fragment);
builtin!(SKYBOX_FS, "skybox.frag.wgsl", Fragment);
builtin!(EQUIRECT_TO_CUBE_FS, "equirect_to_cube.frag.wgsl", Fragment);
builtin!(PROCEDURAL_SKY_FS, "procedural_sky.frag.wgsl", Fragment);
builtin!(IRRADIANCE_FS, "irradiance.frag.wgsl", Fragment);
builtin!(PREFILTER_FS, "prefilter.frag.wgsl", Fragment);
builtin!(BRDF_LUT_FS, "brdf_lut.frag.wgsl", Fragment);
builtin!(GTAO_FS, "gtao.frag.wgsl", Fragment);
builtin!(GTAO_BLUR_FS, "gtao_blur.frag.wgsl", Fragment);
builtin!(SSR_FS, "ssr.frag.wgsl", Fragment);
builtin!(BLOOM_THRESHOLD_FS, "bloom_threshold.frag.wgsl", Fragment);
builtin!(BLOOM_BLUR_FS, "bloom_blur.frag.wgsl", Fragment);
builtin!(TONEMAP_FS, "tonemap.frag.wgsl", Fragment);
builtin!(COPY_FS, "copy.frag.wgsl", Fragment);

/// Every built-in shader, in no particular order.
pub const ALL: &[BuiltinShader] = &[
    GEOMETRY_VS,
    GEOMETRY_FS,
    SHADOW_VS,
    SHADOW_FS,
    FULLSCREEN_VS,
    CUBEMAP_VS,
    LIGHTING_FS,
    SKYBOX_FS,
    EQUIRECT_TO_CUBE_FS,
    PROCEDURAL_SKY_FS,
    IRRADIANCE_FS,
    PREFILTER_FS,
    BRDF_LUT_FS,
    GTAO_FS,
    GTAO_BLUR_FS,
    SSR_FS,
    BLOOM_THRESHOLD_FS,
    BLOOM_BLUR_FS,
    TONEMAP_FS,
    COPY_FS,
];

/// Looks up a built-in shader by its `builtin/...` path.
pub fn find(name: &str) -> Option<&'static BuiltinShader> {
    ALL.iter().find(|shader| shader.name == name)
}

/// Something that hands out shared shader assets by path.
///
/// Render components request their shaders through this trait so that the
/// same handle (and therefore the same hot-reload identity) is shared by
/// every user of a path.
pub trait ShaderProvider {
    fn shader(&mut self, renderer: &mut Renderer, name: &str) -> Handle<Shader>;
}

/// Provider that compiles embedded shaders on first use and caches them.
///
/// Unknown names produce an invalid shader so callers still get a handle.
#[derive(Default)]
pub struct BuiltinShaders {
    cache: HashMap<String, Handle<Shader>>,
}

impl BuiltinShaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl ShaderProvider for BuiltinShaders {
    fn shader(&mut self, renderer: &mut Renderer, name: &str) -> Handle<Shader> {
        if let Some(handle) = self.cache.get(name) {
            return handle.clone();
        }

        let handle = match find(name) {
            Some(builtin) => Handle::loaded(
                builtin.asset_kind(),
                name,
                renderer.create_shader(&builtin.descriptor()),
            ),
            None => {
                log::warn!("Unknown built-in shader `{name}`");
                let stage = if name.contains(".vert") {
                    ShaderStage::Vertex
                } else {
                    ShaderStage::Fragment
                };
                let kind = match stage {
                    ShaderStage::Vertex => AssetKind::VertexShader,
                    ShaderStage::Fragment => AssetKind::FragmentShader,
                };
                Handle::loaded(kind, name, Shader::invalid(name, stage))
            }
        };
        self.cache.insert(name.to_string(), handle.clone());
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_and_prefixed() {
        let mut names: Vec<_> = ALL.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL.len());
        assert!(ALL.iter().all(|s| s.name.starts_with("builtin/")));
    }

    #[test]
    fn stage_matches_file_suffix() {
        for shader in ALL {
            let expected = if shader.name.contains(".vert.") {
                ShaderStage::Vertex
            } else {
                ShaderStage::Fragment
            };
            assert_eq!(shader.stage, expected, "{}", shader.name);
            assert!(shader.source.contains(shader.stage.entry_point()));
        }
    }

    #[test]
    fn find_by_path() {
        assert_eq!(find("builtin/lighting.frag.wgsl"), Some(&LIGHTING_FS));
        assert!(find("builtin/missing.frag.wgsl").is_none());
    }
}
