//! Parent-child hierarchy operations.
//!
//! All operations keep [`HierarchyComponent::parent`] and the parent's
//! [`HierarchyComponent::children`] consistent. World transforms are not
//! cached; [`world_transform`] walks the parent chain on every call.
//!
//! # Usage
//!
//! ```
//! use umbra_ecs::hierarchy::{self, Reparented};
//! use umbra_ecs::{Registry, TransformComponent};
//!
//! let mut registry = Registry::new();
//! let parent = registry.spawn();
//! let child = registry.spawn();
//! registry.insert(parent, TransformComponent::default()).unwrap();
//! registry.insert(child, TransformComponent::default()).unwrap();
//!
//! assert_eq!(hierarchy::reparent(&mut registry, child, parent), Ok(Reparented::Attached));
//! assert!(hierarchy::is_child_of(&registry, child, parent));
//!
//! // Requesting the same parent again detaches.
//! assert_eq!(hierarchy::reparent(&mut registry, child, parent), Ok(Reparented::Detached));
//! assert_eq!(hierarchy::parent_of(&registry, child), None);
//! ```

use umbra_core::math::Mat4;

use crate::components::{HierarchyComponent, TransformComponent};
use crate::error::{EcsError, HierarchyError};
use crate::{Entity, Registry};

/// Outcome of a successful [`reparent`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reparented {
    /// The child now hangs under the requested parent.
    Attached,
    /// The child was already under the requested parent and became a root.
    Detached,
}

pub fn parent_of(registry: &Registry, entity: Entity) -> Option<Entity> {
    registry.get::<HierarchyComponent>(entity)?.parent
}

pub fn children_of(registry: &Registry, entity: Entity) -> &[Entity] {
    registry
        .get::<HierarchyComponent>(entity)
        .map(|h| h.children.as_slice())
        .unwrap_or(&[])
}

/// Returns `true` if `ancestor` appears anywhere on the parent chain of `entity`.
///
/// An entity is not a child of itself.
pub fn is_child_of(registry: &Registry, entity: Entity, ancestor: Entity) -> bool {
    // The bound guards against a corrupted chain.
    let mut remaining = registry.len();
    let mut current = parent_of(registry, entity);
    while let Some(parent) = current {
        if parent == ancestor {
            return true;
        }
        if remaining == 0 {
            log::warn!("Hierarchy: parent chain of {entity} does not terminate");
            return false;
        }
        remaining -= 1;
        current = parent_of(registry, parent);
    }
    false
}

/// Local matrix of `entity`, identity when it has no transform.
pub fn local_transform(registry: &Registry, entity: Entity) -> Mat4 {
    registry
        .get::<TransformComponent>(entity)
        .map(TransformComponent::transform)
        .unwrap_or(Mat4::IDENTITY)
}

/// World matrix of `entity`: the product of local matrices from the root
/// down to `entity`.
pub fn world_transform(registry: &Registry, entity: Entity) -> Mat4 {
    let mut world = local_transform(registry, entity);
    let mut remaining = registry.len();
    let mut current = parent_of(registry, entity);
    while let Some(parent) = current {
        if remaining == 0 {
            break;
        }
        remaining -= 1;
        world = local_transform(registry, parent) * world;
        current = parent_of(registry, parent);
    }
    world
}

/// Moves `child` under `parent`, keeping its world pose.
///
/// The child's local transform becomes `inverse(parent_world) * child_world`.
/// If `child` is already directly under `parent` it is detached instead.
/// Self-parenting, cycles and dead entities are rejected with the hierarchy
/// left untouched.
pub fn reparent(
    registry: &mut Registry,
    child: Entity,
    parent: Entity,
) -> Result<Reparented, HierarchyError> {
    for entity in [child, parent] {
        if !registry.is_alive(entity) {
            return Err(HierarchyError::DeadEntity(entity));
        }
    }
    if child == parent {
        log::warn!("Hierarchy: rejected parenting {child} to itself");
        return Err(HierarchyError::SelfParent(child));
    }
    if is_child_of(registry, parent, child) {
        log::warn!("Hierarchy: rejected parenting {child} to its descendant {parent}");
        return Err(HierarchyError::Cycle { child, parent });
    }

    if parent_of(registry, child) == Some(parent) {
        detach(registry, child)?;
        return Ok(Reparented::Detached);
    }

    let child_world = world_transform(registry, child);
    let parent_world = world_transform(registry, parent);
    unlink_from_parent(registry, child);

    set_local(registry, child, parent_world.inverse() * child_world);
    ensure_hierarchy(registry, child);
    ensure_hierarchy(registry, parent);
    if let Some(hierarchy) = registry.get_mut::<HierarchyComponent>(child) {
        hierarchy.parent = Some(parent);
    }
    if let Some(hierarchy) = registry.get_mut::<HierarchyComponent>(parent) {
        if !hierarchy.children.contains(&child) {
            hierarchy.children.push(child);
        }
    }
    log::debug!("Hierarchy: {child} attached to {parent}");
    Ok(Reparented::Attached)
}

/// Makes `child` a root, keeping its world pose. Does nothing for roots.
pub fn detach(registry: &mut Registry, child: Entity) -> Result<(), HierarchyError> {
    if !registry.is_alive(child) {
        return Err(HierarchyError::DeadEntity(child));
    }
    if parent_of(registry, child).is_none() {
        return Ok(());
    }
    let child_world = world_transform(registry, child);
    unlink_from_parent(registry, child);
    set_local(registry, child, child_world);
    log::debug!("Hierarchy: {child} detached");
    Ok(())
}

/// Despawns `entity` and all its descendants, depth first.
///
/// `entity` is first removed from its parent's children list.
pub fn despawn_recursive(registry: &mut Registry, entity: Entity) {
    if !registry.is_alive(entity) {
        return;
    }
    unlink_from_parent(registry, entity);
    despawn_subtree(registry, entity);
}

fn despawn_subtree(registry: &mut Registry, entity: Entity) {
    let children = children_of(registry, entity).to_vec();
    for child in children {
        despawn_subtree(registry, child);
    }
    registry.despawn(entity);
}

/// Clones `source` and links the copy under the same parent.
///
/// The copy starts without children.
pub fn clone_entity(registry: &mut Registry, source: Entity) -> Result<Entity, EcsError> {
    let copy = registry.clone_entity(source)?;
    if let Some(hierarchy) = registry.get_mut::<HierarchyComponent>(copy) {
        hierarchy.children.clear();
        if let Some(parent) = hierarchy.parent {
            if let Some(parent_hierarchy) = registry.get_mut::<HierarchyComponent>(parent) {
                parent_hierarchy.children.push(copy);
            }
        }
    }
    Ok(copy)
}

/// Entities without a parent, in slot order.
pub fn roots(registry: &Registry) -> Vec<Entity> {
    registry
        .entities()
        .filter(|&entity| parent_of(registry, entity).is_none())
        .collect()
}

fn unlink_from_parent(registry: &mut Registry, child: Entity) {
    let Some(old_parent) = parent_of(registry, child) else {
        return;
    };
    if let Some(parent_hierarchy) = registry.get_mut::<HierarchyComponent>(old_parent) {
        parent_hierarchy.children.retain(|&e| e != child);
    }
    if let Some(hierarchy) = registry.get_mut::<HierarchyComponent>(child) {
        hierarchy.parent = None;
    }
}

fn set_local(registry: &mut Registry, entity: Entity, matrix: Mat4) {
    match registry.get_mut::<TransformComponent>(entity) {
        Some(transform) => transform.set_transform(matrix),
        None if matrix != Mat4::IDENTITY => {
            let inserted = registry.insert(entity, TransformComponent::from_matrix(matrix));
            debug_assert!(inserted.is_ok(), "{entity} is alive with transforms registered");
        }
        None => {}
    }
}

/// Gives an alive entity an empty hierarchy component if it has none.
fn ensure_hierarchy(registry: &mut Registry, entity: Entity) {
    if !registry.has::<HierarchyComponent>(entity) {
        let inserted = registry.insert(entity, HierarchyComponent::default());
        debug_assert!(inserted.is_ok(), "{entity} is alive with hierarchies registered");
    }
}
