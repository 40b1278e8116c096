//! Error types of the scene layer.

use std::path::PathBuf;

use thiserror::Error;
use umbra_ecs::{EcsError, HierarchyError};
use umbra_graphics::GraphicsError;

/// Failure to read, decode or write an asset.
///
/// Loads never surface these to the caller: the manager logs them and
/// substitutes a fallback. They are returned by sources, decoders and
/// [`AssetManager::write`](crate::assets::AssetManager::write).
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset `{0}` not found")]
    NotFound(String),
    #[error("i/o error on `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode `{path}`: {reason}")]
    Decode { path: String, reason: String },
    #[error("unknown asset format for `{0}`")]
    UnknownFormat(String),
    #[error("`{0}` cannot be written")]
    Unsupported(String),
    #[error(transparent)]
    Graphics(#[from] GraphicsError),
    #[error("file watcher: {0}")]
    Watch(#[from] notify::Error),
}

impl AssetError {
    pub(crate) fn decode(path: &str, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failure to save or load a scene snapshot.
#[derive(Debug, Error)]
pub enum SceneIoError {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary: {0}")]
    Binary(#[from] bincode::Error),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error("snapshot references entity #{0} which it does not contain")]
    DanglingReference(usize),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhysicsError {
    #[error("unknown body {0}")]
    UnknownBody(u64),
    #[error("invalid body settings: {0}")]
    InvalidSettings(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("no script behaviour registered for `{0}`")]
    UnknownScript(String),
    #[error("module {module} of `{script}` is not loaded")]
    ModuleNotLoaded { script: String, module: u32 },
    #[error("`{script}` has no function `{signature}`")]
    UnknownFunction { script: String, signature: String },
    #[error("`{script}` has no global `{name}`")]
    UnknownGlobal { script: String, name: String },
    #[error("script `{script}` failed: {reason}")]
    Runtime { script: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Errors surfaced by [`Scene`](crate::Scene) and [`Engine`](crate::Engine).
#[derive(Debug, Error)]
pub enum SceneError {
    #[error(transparent)]
    Graphics(#[from] GraphicsError),
    #[error(transparent)]
    Ecs(#[from] EcsError),
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error(transparent)]
    Io(#[from] SceneIoError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Physics(#[from] PhysicsError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("renderer is not initialized")]
    RendererUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_asset() {
        let err = AssetError::decode("textures/a.png", "truncated");
        assert_eq!(err.to_string(), "failed to decode `textures/a.png`: truncated");
        assert_eq!(AssetError::NotFound("x".into()).to_string(), "asset `x` not found");
    }

    #[test]
    fn graphics_errors_convert() {
        let err: SceneError = GraphicsError::NotInitialized.into();
        assert!(matches!(err, SceneError::Graphics(GraphicsError::NotInitialized)));
    }
}
