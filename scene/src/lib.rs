//! # Umbra Scene
//!
//! Everything between the renderer and a running game.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Engine`] - Owns the event bus, job system, renderer, asset manager,
//!   physics engine, script engine and input state
//! - [`Scene`] - Entity registry plus the per-frame update and draw
//! - [`assets`] - Cached, asynchronously loaded assets with hot reload
//! - [`components`] - Mesh, camera, light, physics, script and
//!   post-processing components
//! - [`physics`] and [`scripting`] - Contracts for the simulation and
//!   script backends, with built-in implementations
//! - [`persistence`] - JSON and binary scene snapshots
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use umbra_scene::assets::{MemorySource, CUBE};
//! use umbra_scene::{Engine, EngineConfig, Scene};
//!
//! let mut config = EngineConfig::default();
//! config.window.width = 32;
//! config.window.height = 32;
//! let mut engine = Engine::headless(&config, Arc::new(MemorySource::new()));
//!
//! let mut scene = Scene::new(&mut engine, "demo").unwrap();
//! let cube = scene.spawn("cube");
//! scene.add_mesh(&mut engine, cube, CUBE, &[]).unwrap();
//!
//! scene.update(&mut engine, 1.0 / 60.0).unwrap();
//! scene.draw(&mut engine, None).unwrap();
//! engine.renderer_mut().submit().unwrap();
//! ```

pub mod assets;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod physics;
pub mod scene;
pub mod scripting;

pub use assets::{Asset, AssetManager, AssetSource, FileSystemSource, MemorySource};
pub use components::register_components;
pub use config::EngineConfig;
pub use engine::{Engine, Services};
pub use error::{AssetError, ConfigError, PhysicsError, SceneError, SceneIoError, ScriptError};
pub use persistence::{SceneFormat, SceneSnapshot};
pub use physics::{BodyId, BodySettings, CollisionEvent, PhysicsEngine, SimplePhysics};
pub use scene::Scene;
pub use scripting::{NativeScript, NativeScriptEngine, ScriptEngine, ScriptValue};
