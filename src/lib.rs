//! Umbra - a deferred rendering and scene simulation core.
//!
//! The engine is split into crates that this facade re-exports:
//! - [`core`] - Asset handles, event bus, job system, matrices stack, input
//! - [`graphics`] - Renderer, software and wgpu backends, G-buffer, PBR/IBL
//!   and the post-processing chain
//! - [`ecs`] - Entity registry, transforms and hierarchy
//! - [`scene`] - Engine services, assets, components, physics, scripting,
//!   the per-frame scene loop and persistence
//!
//! # Features
//! - `wgpu-backend`: GPU rendering through wgpu (the software backend is
//!   always available)
//! - `physics-rapier`: rapier3d as the default physics engine

pub use umbra_core as core;
pub use umbra_ecs as ecs;
pub use umbra_graphics as graphics;
pub use umbra_scene as scene;

pub use umbra_graphics::{BackendKind, Renderer, RendererConfig};
pub use umbra_scene::{Engine, EngineConfig, Scene, SceneError};

/// Commonly used types.
pub mod prelude {
    pub use umbra_core::math::{Mat4, Quat, Vec3};
    pub use umbra_core::{AssetId, EventBus, Handle, JobSystem, WindowResize};
    pub use umbra_ecs::{Entity, NameComponent, Registry, TransformComponent};
    pub use umbra_graphics::{RenderTarget, RenderTargetConfig, Renderer, RendererConfig, TextureFormat};
    pub use umbra_scene::components::{
        BloomComponent, Camera, CameraComponent, CameraMode, GtaoComponent, LightComponent, MeshComponent,
        MeshRendererComponent, PipelineComponent, PrefabComponent, RigidBodyComponent, ScriptComponent,
        SkyComponent, SsrComponent, TonemapComponent,
    };
    pub use umbra_scene::{Engine, EngineConfig, Scene, SceneError};
}

/// Engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
