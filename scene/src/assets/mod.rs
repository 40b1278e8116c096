//! Asset loading, caching and hot reload.
//!
//! [`AssetManager::load`] always returns a [`Handle`] immediately. GPU-backed
//! kinds (textures, models) decode on a worker thread and upload in the
//! job's main-thread completion; the others are produced before `load`
//! returns. Either way the handle's content is replaced in place and an
//! [`AssetLoaded`] event is dispatched once the content is final.
//!
//! A load that fails is logged and served with the placeholder for its kind
//! (magenta texture, unit cube, default material, empty script), so nothing
//! downstream ever waits on an asset that will not arrive.
//!
//! # Built-in paths
//!
//! | path | kind |
//! |---|---|
//! | `builtin/default` | white texture, default material |
//! | `builtin/placeholder` | magenta checker texture |
//! | `builtin/cube`, `builtin/sphere`, `builtin/plane`, `builtin/quad` | models |
//! | `builtin/*.wgsl` | engine shaders, overridable by a file of the same path |

mod material;
mod model;
pub mod obj;
mod shader;
mod source;
mod text;
mod texture;
mod watcher;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use umbra_core::asset::{AssetKind, Handle};
use umbra_core::events::{AssetLoaded, EventBus};
use umbra_core::jobs::JobSender;
use umbra_graphics::{Renderer, Shader, ShaderProvider};

use crate::engine::Services;
use crate::error::AssetError;

pub use material::{Material, MaterialDesc};
pub use model::Model;
pub use source::{AssetSource, FileSystemSource, MemorySource};
pub use text::{Script, Sound};
pub use texture::TextureAsset;
pub use watcher::AssetWatcher;

pub const BUILTIN_PREFIX: &str = "builtin/";
pub const DEFAULT: &str = "builtin/default";
pub const PLACEHOLDER: &str = "builtin/placeholder";
pub const CUBE: &str = "builtin/cube";
pub const SPHERE: &str = "builtin/sphere";
pub const PLANE: &str = "builtin/plane";
pub const QUAD: &str = "builtin/quad";

/// A cache entry. One variant per loadable type.
#[derive(Debug, Clone)]
pub enum CachedAsset {
    Texture(Handle<TextureAsset>),
    Material(Handle<Material>),
    Model(Handle<Model>),
    Script(Handle<Script>),
    Shader(Handle<Shader>),
    Sound(Handle<Sound>),
}

/// A type the [`AssetManager`] knows how to produce.
pub trait Asset: Send + Sync + Sized + 'static {
    fn kind(path: &str) -> AssetKind;

    /// Content served while the real asset is loading.
    fn pending(path: &str) -> Self;

    fn into_cached(handle: Handle<Self>) -> CachedAsset;

    fn from_cached(entry: &CachedAsset) -> Option<Handle<Self>>;

    /// Starts (or restarts, on reload) producing the content of `handle`.
    fn start(assets: &mut AssetManager, renderer: &mut Renderer, handle: &Handle<Self>);

    /// Serialized form written by [`AssetManager::write`].
    fn encode(&self, renderer: &mut Renderer, path: &str) -> Result<Vec<u8>, AssetError> {
        let _ = renderer;
        Err(AssetError::Unsupported(path.to_string()))
    }
}

pub fn is_builtin(path: &str) -> bool {
    path.starts_with(BUILTIN_PREFIX)
}

fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Loads, caches and reloads assets.
pub struct AssetManager {
    source: Arc<dyn AssetSource>,
    cache_enabled: bool,
    cache: HashMap<(AssetKind, String), CachedAsset>,
    jobs: JobSender<Services>,
    events: EventBus,
}

impl AssetManager {
    pub fn new(source: Arc<dyn AssetSource>, cache_enabled: bool, jobs: JobSender<Services>, events: EventBus) -> Self {
        Self {
            source,
            cache_enabled,
            cache: HashMap::new(),
            jobs,
            events,
        }
    }

    pub fn source(&self) -> &Arc<dyn AssetSource> {
        &self.source
    }

    pub(crate) fn jobs(&self) -> &JobSender<Services> {
        &self.jobs
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Returns a handle to the asset at `path`.
    ///
    /// With `relative_to_root` the path is resolved against the source root,
    /// otherwise it is taken as a filesystem path (relative paths against the
    /// working directory). With `use_cache` a second load of the same path
    /// and type returns the same handle.
    pub fn load<T: Asset>(
        &mut self,
        renderer: &mut Renderer,
        path: &str,
        relative_to_root: bool,
        use_cache: bool,
    ) -> Handle<T> {
        let path = Self::normalize(path, relative_to_root);
        let kind = T::kind(&path);
        let key = (kind, path.clone());
        let use_cache = use_cache && self.cache_enabled;

        if use_cache {
            if let Some(handle) = self.cache.get(&key).and_then(T::from_cached) {
                return handle;
            }
        }

        log::debug!("AssetManager: loading {kind:?} {path}");
        let handle = Handle::pending(kind, path.as_str(), T::pending(&path));
        if use_cache {
            self.cache.insert(key, T::into_cached(handle.clone()));
        }
        T::start(self, renderer, &handle);
        handle
    }

    /// Re-runs the loader of every cached asset stored under `path`.
    ///
    /// Returns the number of assets restarted.
    pub fn reload(&mut self, renderer: &mut Renderer, path: &str) -> usize {
        let entries: Vec<CachedAsset> = self
            .cache
            .iter()
            .filter(|((_, cached), _)| cached == path)
            .map(|(_, entry)| entry.clone())
            .collect();
        for entry in &entries {
            log::info!("AssetManager: reloading {path}");
            match entry {
                CachedAsset::Texture(handle) => TextureAsset::start(self, renderer, handle),
                CachedAsset::Material(handle) => Material::start(self, renderer, handle),
                CachedAsset::Model(handle) => Model::start(self, renderer, handle),
                CachedAsset::Script(handle) => Script::start(self, renderer, handle),
                CachedAsset::Shader(handle) => Shader::start(self, renderer, handle),
                CachedAsset::Sound(handle) => Sound::start(self, renderer, handle),
            }
        }
        entries.len()
    }

    /// Serializes `asset` and writes it to `path` through the source.
    pub fn write<T: Asset>(&self, renderer: &mut Renderer, asset: &Handle<T>, path: &str) -> Result<(), AssetError> {
        let bytes = asset.read().encode(renderer, path)?;
        self.source.write(path, &bytes)?;
        log::info!("AssetManager: wrote {path} ({} bytes)", bytes.len());
        Ok(())
    }

    /// Installs final content, then announces it.
    pub(crate) fn complete<T: Asset>(&self, handle: &Handle<T>, value: T) {
        // The old content is dropped here, which queues its GPU resources
        // for release at the next frame boundary.
        drop(handle.replace(value));
        self.events.dispatch(AssetLoaded {
            id: handle.id(),
            kind: handle.kind(),
            path: handle.path().to_string(),
        });
    }

    pub(crate) fn fail<T: Asset>(&self, handle: &Handle<T>, error: &AssetError, fallback: T) {
        log::warn!("AssetManager: {error}; using placeholder for {}", handle.path());
        self.complete(handle, fallback);
    }

    /// Reads bytes on the calling thread.
    pub(crate) fn read(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        self.source.read(path)
    }

    fn normalize(path: &str, relative_to_root: bool) -> String {
        let path = path.replace('\\', "/");
        if relative_to_root || is_builtin(&path) {
            return path.trim_start_matches("./").to_string();
        }
        let file = Path::new(&path);
        if file.is_absolute() {
            return path;
        }
        match std::env::current_dir() {
            Ok(dir) => dir.join(file).to_string_lossy().replace('\\', "/"),
            Err(_) => path,
        }
    }
}

impl ShaderProvider for AssetManager {
    fn shader(&mut self, renderer: &mut Renderer, name: &str) -> Handle<Shader> {
        self.load::<Shader>(renderer, name, true, true)
    }
}

impl std::fmt::Debug for AssetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetManager")
            .field("cache_enabled", &self.cache_enabled)
            .field("cached", &self.cache.len())
            .finish()
    }
}
