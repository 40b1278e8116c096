//! # Umbra ECS
//!
//! Sparse-set entity store used by Umbra scenes.
//!
//! ## Core Types
//!
//! - [`Entity`] - Lightweight generational entity identifier
//! - [`Registry`] - Owns entities and one sparse set per component type
//! - [`SparseSet`] - Dense component storage with O(1) lookup
//! - [`Query`] - Tuple of components fetched together by [`Registry::query`]
//!
//! ## Built-in Components
//!
//! - [`NameComponent`] - Display name
//! - [`TransformComponent`] - Position, Euler rotation in degrees, scale
//! - [`HierarchyComponent`] - Parent link and ordered children, managed by
//!   the [`hierarchy`] functions

pub mod component;
pub mod components;
mod entity;
mod error;
pub mod hierarchy;
mod query;
mod registry;
mod sparse_set;

pub use component::Component;
pub use components::{HierarchyComponent, NameComponent, TransformComponent};
pub use entity::Entity;
pub use error::{EcsError, HierarchyError};
pub use hierarchy::Reparented;
pub use query::Query;
pub use registry::Registry;
pub use sparse_set::SparseSet;
