//! Registry and hierarchy errors.

use thiserror::Error;

use crate::Entity;

/// Errors returned by [`Registry`](crate::Registry) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    /// The entity was despawned or never existed.
    #[error("entity {0} is not alive")]
    DeadEntity(Entity),
    /// The component type was never registered.
    #[error("component type `{0}` has never been registered")]
    Unregistered(&'static str),
}

/// Reasons a reparent request is rejected.
///
/// A rejected request leaves the hierarchy untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyError {
    #[error("cannot parent {0} to itself")]
    SelfParent(Entity),
    #[error("cannot parent {child} to its descendant {parent}")]
    Cycle { child: Entity, parent: Entity },
    #[error("entity {0} is not alive")]
    DeadEntity(Entity),
}
