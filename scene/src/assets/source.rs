//! Where asset bytes come from.
//!
//! The [`AssetManager`](super::AssetManager) reads through an
//! [`AssetSource`] from worker threads, so sources are `Send + Sync` and
//! take `&self`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::AssetError;

/// Byte storage addressed by asset paths.
///
/// Paths use `/` separators. A relative path is resolved against the
/// source's root; an absolute path is used as is.
pub trait AssetSource: Send + Sync {
    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError>;

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), AssetError>;

    fn exists(&self, path: &str) -> bool;

    /// Directory to watch for hot reload, if the source lives on disk.
    fn watch_root(&self) -> Option<&Path> {
        None
    }
}

/// Reads assets from a directory tree.
#[derive(Debug, Clone)]
pub struct FileSystemSource {
    root: PathBuf,
}

impl FileSystemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }

    /// Asset path of a file below the root, with `/` separators.
    pub fn asset_path(&self, file: &Path) -> Option<String> {
        let relative = file.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    }
}

impl AssetSource for FileSystemSource {
    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        let file = self.resolve(path);
        std::fs::read(&file).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => AssetError::NotFound(path.to_string()),
            _ => AssetError::Io {
                path: path.to_string(),
                source,
            },
        })
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), AssetError> {
        let file = self.resolve(path);
        let io = |source| AssetError::Io {
            path: path.to_string(),
            source,
        };
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        std::fs::write(&file, bytes).map_err(io)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn watch_root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

/// In-memory source, mostly for tests and generated content.
#[derive(Debug, Default)]
pub struct MemorySource {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.write().insert(path.into(), bytes.into());
    }

    pub fn remove(&self, path: &str) -> Option<Vec<u8>> {
        self.files.write().remove(path)
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl AssetSource for MemorySource {
    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), AssetError> {
        self.insert(path, bytes);
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.read().contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_system_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSystemSource::new(dir.path());

        source.write("materials/red.json", b"{}").unwrap();
        assert!(source.exists("materials/red.json"));
        assert_eq!(source.read("materials/red.json").unwrap(), b"{}");
        assert!(matches!(source.read("missing.png"), Err(AssetError::NotFound(p)) if p == "missing.png"));
    }

    #[test]
    fn asset_path_is_relative_with_forward_slashes() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSystemSource::new(dir.path());
        let file = dir.path().join("textures").join("wall.png");
        assert_eq!(source.asset_path(&file).as_deref(), Some("textures/wall.png"));
        assert_eq!(source.asset_path(Path::new("/elsewhere/x.png")), None);
    }

    #[test]
    fn memory_source_overwrites() {
        let source = MemorySource::new();
        source.insert("a.txt", "one");
        source.write("a.txt", b"two").unwrap();
        assert_eq!(source.read("a.txt").unwrap(), b"two");
        assert_eq!(source.len(), 1);
    }
}
