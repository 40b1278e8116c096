use serde::{Deserialize, Serialize};
use umbra_core::asset::{AssetKind, Handle};
use umbra_graphics::deferred::geometry_slots;
use umbra_graphics::uniforms::MaterialUniform;
use umbra_graphics::{Binding, Buffer, Fallbacks, Renderer};

use super::{Asset, AssetManager, CachedAsset, TextureAsset, DEFAULT};
use crate::error::AssetError;

/// On-disk material description (JSON).
///
/// Each channel is a constant unless its `*_map` names a texture, in which
/// case the texture is sampled instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialDesc {
    pub albedo: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub ao: f32,
    pub emission: [f32; 3],
    pub emission_strength: f32,
    pub normal_strength: f32,
    pub albedo_map: Option<String>,
    pub normal_map: Option<String>,
    pub metallic_map: Option<String>,
    pub roughness_map: Option<String>,
    pub ao_map: Option<String>,
    pub emission_map: Option<String>,
}

impl Default for MaterialDesc {
    fn default() -> Self {
        let uniform = MaterialUniform::default();
        Self {
            albedo: uniform.albedo,
            metallic: uniform.params[0],
            roughness: uniform.params[1],
            ao: uniform.params[2],
            emission: [0.0; 3],
            emission_strength: 0.0,
            normal_strength: uniform.params[3],
            albedo_map: None,
            normal_map: None,
            metallic_map: None,
            roughness_map: None,
            ao_map: None,
            emission_map: None,
        }
    }
}

impl MaterialDesc {
    /// Map paths in [`MaterialUniform`] toggle order.
    pub fn maps(&self) -> [Option<&str>; 6] {
        [
            self.albedo_map.as_deref(),
            self.normal_map.as_deref(),
            self.metallic_map.as_deref(),
            self.roughness_map.as_deref(),
            self.ao_map.as_deref(),
            self.emission_map.as_deref(),
        ]
    }

    pub fn uniform(&self) -> MaterialUniform {
        let mut maps = [0u32; 8];
        for (flag, map) in maps.iter_mut().zip(self.maps()) {
            *flag = u32::from(map.is_some());
        }
        let [r, g, b] = self.emission;
        MaterialUniform {
            albedo: self.albedo,
            emission: [r, g, b, self.emission_strength],
            params: [self.metallic, self.roughness, self.ao, self.normal_strength],
            maps,
        }
    }
}

/// A material ready for the geometry pass.
#[derive(Debug, Default)]
pub struct Material {
    desc: MaterialDesc,
    maps: [Option<Handle<TextureAsset>>; 6],
    uniform: Option<Buffer>,
}

impl Material {
    /// Builds a material, loading its maps through `assets`.
    pub fn from_desc(assets: &mut AssetManager, renderer: &mut Renderer, desc: MaterialDesc) -> Self {
        let maps = desc
            .maps()
            .map(|path| path.map(|path| assets.load::<TextureAsset>(renderer, path, true, true)));
        let uniform = match renderer.create_uniform("material", &desc.uniform()) {
            Ok(buffer) => Some(buffer),
            Err(err) => {
                log::warn!("Material: cannot create uniform buffer: {err}");
                None
            }
        };
        Self { desc, maps, uniform }
    }

    pub fn desc(&self) -> &MaterialDesc {
        &self.desc
    }

    pub fn map(&self, index: usize) -> Option<&Handle<TextureAsset>> {
        self.maps.get(index).and_then(Option::as_ref)
    }

    /// Geometry-pass bindings: uniform, one texture per channel, sampler.
    ///
    /// Channels without a map (or whose map is still loading) bind a
    /// neutral fallback texture.
    pub fn bindings(&self, fallbacks: &Fallbacks) -> Vec<Binding> {
        let neutral = [
            fallbacks.white.handle(),
            fallbacks.flat_normal.handle(),
            fallbacks.white.handle(),
            fallbacks.white.handle(),
            fallbacks.white.handle(),
            fallbacks.black.handle(),
        ];
        let mut bindings = Vec::with_capacity(8);
        if let Some(uniform) = &self.uniform {
            bindings.push(Binding::buffer(geometry_slots::MATERIAL, uniform.handle()));
        }
        for (i, fallback) in neutral.into_iter().enumerate() {
            let texture = self.maps[i]
                .as_ref()
                .map_or(fallback, |map| map.read().handle_or(fallback));
            bindings.push(Binding::texture(geometry_slots::ALBEDO + i as u32, texture));
        }
        bindings.push(Binding::sampler(geometry_slots::SAMPLER, fallbacks.repeat_sampler.handle()));
        bindings
    }
}

impl Asset for Material {
    fn kind(_: &str) -> AssetKind {
        AssetKind::Material
    }

    fn pending(_: &str) -> Self {
        Self::default()
    }

    fn into_cached(handle: Handle<Self>) -> CachedAsset {
        CachedAsset::Material(handle)
    }

    fn from_cached(entry: &CachedAsset) -> Option<Handle<Self>> {
        match entry {
            CachedAsset::Material(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    fn start(assets: &mut AssetManager, renderer: &mut Renderer, handle: &Handle<Self>) {
        let path = handle.path().to_string();
        if path == DEFAULT {
            let value = Self::from_desc(assets, renderer, MaterialDesc::default());
            assets.complete(handle, value);
            return;
        }
        let desc = assets.read(&path).and_then(|bytes| {
            serde_json::from_slice::<MaterialDesc>(&bytes).map_err(|err| AssetError::decode(&path, err))
        });
        match desc {
            Ok(desc) => {
                let value = Self::from_desc(assets, renderer, desc);
                assets.complete(handle, value);
            }
            Err(err) => {
                let fallback = Self::from_desc(assets, renderer, MaterialDesc::default());
                assets.fail(handle, &err, fallback);
            }
        }
    }

    fn encode(&self, _: &mut Renderer, path: &str) -> Result<Vec<u8>, AssetError> {
        serde_json::to_vec_pretty(&self.desc).map_err(|err| AssetError::decode(path, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_desc_matches_default_uniform() {
        assert_eq!(MaterialDesc::default().uniform(), MaterialUniform::default());
    }

    #[test]
    fn maps_toggle_uniform_flags() {
        let desc: MaterialDesc =
            serde_json::from_str(r#"{ "albedo": [1, 0, 0, 1], "normal_map": "textures/n.png", "emission_strength": 2 }"#)
                .unwrap();
        let uniform = desc.uniform();
        assert_eq!(uniform.albedo, [1.0, 0.0, 0.0, 1.0]);
        assert!(uniform.uses_map(MaterialUniform::NORMAL_MAP));
        assert!(!uniform.uses_map(MaterialUniform::ALBEDO_MAP));
        assert_eq!(uniform.emission[3], 2.0);
        assert_eq!(uniform.params[1], 0.5);
    }
}
