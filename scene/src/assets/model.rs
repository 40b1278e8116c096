use umbra_core::asset::{AssetKind, Handle};
use umbra_core::mesh::{generate_cube, generate_fullscreen_quad, generate_plane, generate_sphere, CpuMesh};
use umbra_graphics::{Mesh, Renderer};

use super::obj::parse_obj;
use super::{extension, Asset, AssetManager, CachedAsset, CUBE, PLANE, QUAD, SPHERE};
use crate::engine::Services;
use crate::error::AssetError;

/// A list of GPU meshes, one per material slot.
#[derive(Debug, Default)]
pub struct Model {
    meshes: Vec<Mesh>,
}

impl Model {
    pub fn new(meshes: Vec<Mesh>) -> Self {
        Self { meshes }
    }

    pub fn from_cpu(renderer: &mut Renderer, meshes: &[CpuMesh]) -> Result<Self, AssetError> {
        let meshes = meshes
            .iter()
            .map(|mesh| Mesh::from_cpu(renderer, mesh))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { meshes })
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    fn unit_cube(renderer: &mut Renderer) -> Self {
        Self::from_cpu(renderer, &[generate_cube(0.5)]).unwrap_or_else(|err| {
            log::error!("AssetManager: cannot create placeholder cube: {err}");
            Self::default()
        })
    }
}

fn builtin_mesh(path: &str) -> Option<CpuMesh> {
    match path {
        CUBE => Some(generate_cube(0.5)),
        SPHERE => Some(generate_sphere(0.5, 32, 16)),
        PLANE => Some(generate_plane(0.5)),
        QUAD => Some(generate_fullscreen_quad()),
        _ => None,
    }
}

fn parse_model(path: &str, bytes: &[u8]) -> Result<Vec<CpuMesh>, AssetError> {
    match extension(path).as_deref() {
        Some("obj") => {
            let text = std::str::from_utf8(bytes).map_err(|err| AssetError::decode(path, err))?;
            parse_obj(path, text)
        }
        _ => Err(AssetError::UnknownFormat(path.to_string())),
    }
}

impl Asset for Model {
    fn kind(_: &str) -> AssetKind {
        AssetKind::Model
    }

    fn pending(_: &str) -> Self {
        Self::default()
    }

    fn into_cached(handle: Handle<Self>) -> CachedAsset {
        CachedAsset::Model(handle)
    }

    fn from_cached(entry: &CachedAsset) -> Option<Handle<Self>> {
        match entry {
            CachedAsset::Model(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    fn start(assets: &mut AssetManager, renderer: &mut Renderer, handle: &Handle<Self>) {
        let path = handle.path().to_string();
        if let Some(mesh) = builtin_mesh(&path) {
            match Self::from_cpu(renderer, &[mesh.with_label(path.as_str())]) {
                Ok(value) => assets.complete(handle, value),
                Err(err) => assets.fail(handle, &err, Self::default()),
            }
            return;
        }

        let source = assets.source().clone();
        let handle = handle.clone();
        assets.jobs().execute(
            move || source.read(&path).and_then(|bytes| parse_model(&path, &bytes)),
            move |parsed, services: &mut Services| {
                match parsed.and_then(|meshes| Self::from_cpu(&mut services.renderer, &meshes)) {
                    Ok(value) => services.assets.complete(&handle, value),
                    Err(err) => {
                        let fallback = Self::unit_cube(&mut services.renderer);
                        services.assets.fail(&handle, &err, fallback);
                    }
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_meshes_are_valid() {
        for path in [CUBE, SPHERE, PLANE, QUAD] {
            let mesh = builtin_mesh(path).unwrap();
            assert!(mesh.validate(), "{path}");
        }
        assert!(builtin_mesh("builtin/teapot").is_none());
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            parse_model("models/a.fbx", b""),
            Err(AssetError::UnknownFormat(_))
        ));
    }
}
