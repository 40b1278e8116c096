//! # Umbra Core
//!
//! Engine-wide building blocks shared by the graphics, ECS and scene crates:
//! math helpers, the matrices stack, CPU mesh and texture data, shared asset
//! handles, the typed event bus and the two-phase job system.

pub mod asset;
pub mod events;
pub mod input;
pub mod jobs;
pub mod math;
pub mod matrices;
pub mod mesh;
pub mod texture;

pub use asset::{AssetId, AssetKind, Handle};
pub use events::{AssetLoaded, Event, EventBus, Listener, Subscription, WindowFocus, WindowResize};
pub use jobs::{JobSender, JobSystem};
pub use matrices::{MatricesBinding, MatricesStack};
pub use mesh::{Aabb, CpuMesh, Vertex};
pub use texture::{CpuTexture, TextureFormat};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
