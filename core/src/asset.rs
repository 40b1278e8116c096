//! Shared asset handles.
//!
//! A [`Handle<T>`] is a cheap, reference-counted pointer to an asset cell.
//! Every clone refers to the same cell, so content replaced by a hot reload
//! is observed by all holders. The `loaded` flag is monotonic: it flips from
//! false to true exactly once and never back.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

static NEXT_ASSET_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique asset identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(u64);

impl AssetId {
    fn next() -> Self {
        Self(NEXT_ASSET_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "asset#{}", self.0)
    }
}

/// The closed set of asset kinds known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    Texture,
    Material,
    Model,
    Script,
    VertexShader,
    FragmentShader,
    Sound,
    Scene,
}

impl AssetKind {
    pub fn is_shader(self) -> bool {
        matches!(self, Self::VertexShader | Self::FragmentShader)
    }
}

struct AssetCell<T> {
    id: AssetId,
    kind: AssetKind,
    path: String,
    loaded: AtomicBool,
    version: AtomicU64,
    value: RwLock<T>,
}

/// Reference-counted handle to an asset of type `T`.
pub struct Handle<T> {
    cell: Arc<AssetCell<T>>,
}

impl<T> Handle<T> {
    /// Creates a handle whose content is not loaded yet.
    ///
    /// `initial` is served to readers until the real content arrives.
    pub fn pending(kind: AssetKind, path: impl Into<String>, initial: T) -> Self {
        Self {
            cell: Arc::new(AssetCell {
                id: AssetId::next(),
                kind,
                path: path.into(),
                loaded: AtomicBool::new(false),
                version: AtomicU64::new(0),
                value: RwLock::new(initial),
            }),
        }
    }

    /// Creates a handle with content that is already loaded.
    pub fn loaded(kind: AssetKind, path: impl Into<String>, value: T) -> Self {
        let handle = Self::pending(kind, path, value);
        handle.cell.loaded.store(true, Ordering::Release);
        handle
    }

    pub fn id(&self) -> AssetId {
        self.cell.id
    }

    pub fn kind(&self) -> AssetKind {
        self.cell.kind
    }

    pub fn path(&self) -> &str {
        &self.cell.path
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.loaded.load(Ordering::Acquire)
    }

    /// Number of times the content has been replaced.
    pub fn version(&self) -> u64 {
        self.cell.version.load(Ordering::Acquire)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.cell.value.read()
    }

    /// Replaces the content and marks the asset loaded.
    ///
    /// Returns the previous content so the caller controls when it is dropped.
    pub fn replace(&self, value: T) -> T {
        let old = std::mem::replace(&mut *self.cell.value.write(), value);
        self.cell.version.fetch_add(1, Ordering::AcqRel);
        self.mark_loaded();
        old
    }

    /// Sets the loaded flag. Returns true only for the call that flipped it.
    pub fn mark_loaded(&self) -> bool {
        !self.cell.loaded.swap(true, Ordering::AcqRel)
    }

    /// True if both handles point to the same asset cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Number of live handles to this asset.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.cell)
    }
}

impl<T: Clone> Handle<T> {
    /// Clones the current content out of the cell.
    pub fn get(&self) -> T {
        self.cell.value.read().clone()
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.cell.id)
            .field("kind", &self.cell.kind)
            .field("path", &self.cell.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_content() {
        let a = Handle::pending(AssetKind::Texture, "a.png", 1u32);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        a.replace(7);
        assert_eq!(*b.read(), 7);
        assert_eq!(b.version(), 1);
    }

    #[test]
    fn loaded_flag_flips_once() {
        let h = Handle::pending(AssetKind::Model, "cube.obj", ());
        assert!(!h.is_loaded());
        assert!(h.mark_loaded());
        assert!(!h.mark_loaded());
        assert!(h.is_loaded());
    }

    #[test]
    fn ids_are_unique() {
        let a = Handle::loaded(AssetKind::Sound, "x", ());
        let b = Handle::loaded(AssetKind::Sound, "x", ());
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
    }
}
