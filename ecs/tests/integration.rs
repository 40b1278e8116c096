use glam::{Mat4, Vec3};
use rstest::rstest;
use umbra_core::math::mat4_approx_eq;
use umbra_ecs::hierarchy::{self, Reparented};
use umbra_ecs::{Entity, HierarchyComponent, HierarchyError, NameComponent, Registry, TransformComponent};

fn spawn_at(registry: &mut Registry, name: &str, transform: TransformComponent) -> Entity {
    let entity = registry.spawn();
    registry.insert(entity, NameComponent::new(name)).unwrap();
    registry.insert(entity, transform).unwrap();
    entity
}

/// root -> mid -> leaf, each with a distinct local transform.
fn chain(registry: &mut Registry) -> (Entity, Entity, Entity) {
    let root = spawn_at(
        registry,
        "root",
        TransformComponent::from_position(Vec3::new(1.0, 0.0, 0.0)).with_rotation(Vec3::new(0.0, 45.0, 0.0)),
    );
    let mid = spawn_at(
        registry,
        "mid",
        TransformComponent::from_position(Vec3::new(0.0, 2.0, 0.0)).with_scale(Vec3::splat(2.0)),
    );
    let leaf = spawn_at(
        registry,
        "leaf",
        TransformComponent::from_position(Vec3::new(0.0, 0.0, -3.0)).with_rotation(Vec3::new(30.0, 0.0, 10.0)),
    );
    hierarchy::reparent(registry, mid, root).unwrap();
    hierarchy::reparent(registry, leaf, mid).unwrap();
    // Reset locals so the chain has known values after the pose-preserving attach.
    *registry.get_mut::<TransformComponent>(mid).unwrap() =
        TransformComponent::from_position(Vec3::new(0.0, 2.0, 0.0)).with_scale(Vec3::splat(2.0));
    *registry.get_mut::<TransformComponent>(leaf).unwrap() =
        TransformComponent::from_position(Vec3::new(0.0, 0.0, -3.0)).with_rotation(Vec3::new(30.0, 0.0, 10.0));
    (root, mid, leaf)
}

fn local(registry: &Registry, entity: Entity) -> Mat4 {
    registry.get::<TransformComponent>(entity).unwrap().transform()
}

// ---------------------------------------------------------------------------
// World transform
// ---------------------------------------------------------------------------

#[test]
fn world_transform_multiplies_root_to_leaf() {
    let mut registry = Registry::new();
    let (root, mid, leaf) = chain(&mut registry);

    let expected = local(&registry, root) * local(&registry, mid) * local(&registry, leaf);
    assert!(mat4_approx_eq(&hierarchy::world_transform(&registry, leaf), &expected, 1e-5));
    assert!(mat4_approx_eq(
        &hierarchy::world_transform(&registry, root),
        &local(&registry, root),
        1e-6
    ));
}

#[test]
fn entity_without_transform_contributes_identity() {
    let mut registry = Registry::new();
    let group = registry.spawn();
    let child = spawn_at(&mut registry, "child", TransformComponent::from_position(Vec3::X));
    hierarchy::reparent(&mut registry, child, group).unwrap();

    let world = hierarchy::world_transform(&registry, child);
    assert!((world.w_axis.truncate() - Vec3::X).length() < 1e-6);
}

// ---------------------------------------------------------------------------
// Reparenting
// ---------------------------------------------------------------------------

#[rstest]
#[case::under_root(0)]
#[case::under_mid(1)]
#[case::under_leaf(2)]
fn reparent_preserves_world_pose(#[case] target: usize) {
    let mut registry = Registry::new();
    let (root, mid, leaf) = chain(&mut registry);
    let parents = [root, mid, leaf];
    let mover = spawn_at(
        &mut registry,
        "mover",
        TransformComponent::from_position(Vec3::new(-4.0, 1.0, 2.0)).with_rotation(Vec3::new(0.0, -20.0, 5.0)),
    );

    let before = hierarchy::world_transform(&registry, mover);
    let local_before = local(&registry, mover);
    assert_eq!(
        hierarchy::reparent(&mut registry, mover, parents[target]),
        Ok(Reparented::Attached)
    );

    let after = hierarchy::world_transform(&registry, mover);
    assert!(mat4_approx_eq(&before, &after, 1e-3), "{before:?} != {after:?}");
    assert!(!mat4_approx_eq(&local_before, &local(&registry, mover), 1e-3));
    assert!(hierarchy::is_child_of(&registry, mover, root));
}

#[test]
fn bare_child_gains_transform_and_hierarchy() {
    let mut registry = Registry::new();
    let parent = spawn_at(&mut registry, "parent", TransformComponent::from_position(Vec3::new(0.0, 5.0, 0.0)));
    let child = registry.spawn();
    assert!(!registry.has::<TransformComponent>(child));

    hierarchy::reparent(&mut registry, child, parent).unwrap();

    assert!(registry.has::<HierarchyComponent>(child));
    assert!(registry.has::<HierarchyComponent>(parent));
    let offset = local(&registry, child).w_axis.truncate();
    assert!((offset - Vec3::new(0.0, -5.0, 0.0)).length() < 1e-6);
    assert!(mat4_approx_eq(&hierarchy::world_transform(&registry, child), &Mat4::IDENTITY, 1e-6));
}

#[test]
fn moving_between_parents_updates_both_children_lists() {
    let mut registry = Registry::new();
    let (root, mid, leaf) = chain(&mut registry);

    let before = hierarchy::world_transform(&registry, leaf);
    hierarchy::reparent(&mut registry, leaf, root).unwrap();

    assert_eq!(hierarchy::children_of(&registry, mid), &[] as &[Entity]);
    assert_eq!(hierarchy::children_of(&registry, root), &[mid, leaf]);
    assert_eq!(hierarchy::parent_of(&registry, leaf), Some(root));
    assert!(mat4_approx_eq(&before, &hierarchy::world_transform(&registry, leaf), 1e-4));
}

#[test]
fn self_parenting_is_rejected() {
    let mut registry = Registry::new();
    let (root, _, _) = chain(&mut registry);
    assert_eq!(
        hierarchy::reparent(&mut registry, root, root),
        Err(HierarchyError::SelfParent(root))
    );
}

#[test]
fn cycle_is_rejected_and_hierarchy_untouched() {
    let mut registry = Registry::new();
    let (root, mid, leaf) = chain(&mut registry);
    let snapshot: Vec<_> = [root, mid, leaf]
        .iter()
        .map(|&e| {
            (
                registry.get::<HierarchyComponent>(e).cloned(),
                *registry.get::<TransformComponent>(e).unwrap(),
            )
        })
        .collect();

    assert_eq!(
        hierarchy::reparent(&mut registry, root, leaf),
        Err(HierarchyError::Cycle { child: root, parent: leaf })
    );

    for (entity, (hierarchy_before, transform_before)) in [root, mid, leaf].into_iter().zip(snapshot) {
        assert_eq!(registry.get::<HierarchyComponent>(entity).cloned(), hierarchy_before);
        assert_eq!(*registry.get::<TransformComponent>(entity).unwrap(), transform_before);
    }
}

#[test]
fn same_parent_twice_detaches() {
    let mut registry = Registry::new();
    let (root, mid, _) = chain(&mut registry);
    let world_before = hierarchy::world_transform(&registry, mid);

    assert_eq!(hierarchy::reparent(&mut registry, mid, root), Ok(Reparented::Detached));
    assert_eq!(hierarchy::parent_of(&registry, mid), None);
    assert!(!hierarchy::children_of(&registry, root).contains(&mid));
    assert!(mat4_approx_eq(&world_before, &local(&registry, mid), 1e-4));

    assert_eq!(hierarchy::reparent(&mut registry, mid, root), Ok(Reparented::Attached));
    assert_eq!(hierarchy::parent_of(&registry, mid), Some(root));
}

#[test]
fn dead_entities_are_rejected() {
    let mut registry = Registry::new();
    let (root, mid, _) = chain(&mut registry);
    let ghost = registry.spawn();
    registry.despawn(ghost);

    assert_eq!(
        hierarchy::reparent(&mut registry, mid, ghost),
        Err(HierarchyError::DeadEntity(ghost))
    );
    assert_eq!(hierarchy::parent_of(&registry, mid), Some(root));
}

// ---------------------------------------------------------------------------
// Despawn and clone
// ---------------------------------------------------------------------------

#[test]
fn despawn_recursive_removes_subtree() {
    let mut registry = Registry::new();
    let (root, mid, leaf) = chain(&mut registry);
    let sibling = spawn_at(&mut registry, "sibling", TransformComponent::default());
    hierarchy::reparent(&mut registry, sibling, root).unwrap();

    hierarchy::despawn_recursive(&mut registry, mid);

    assert!(!registry.is_alive(mid));
    assert!(!registry.is_alive(leaf));
    assert!(registry.is_alive(sibling));
    assert_eq!(hierarchy::children_of(&registry, root), &[sibling]);
}

#[test]
fn hierarchy_clone_links_copy_under_same_parent() {
    let mut registry = Registry::new();
    let (root, mid, _) = chain(&mut registry);

    let copy = hierarchy::clone_entity(&mut registry, mid).unwrap();

    assert_eq!(hierarchy::parent_of(&registry, copy), Some(root));
    assert!(hierarchy::children_of(&registry, copy).is_empty());
    assert_eq!(hierarchy::children_of(&registry, root), &[mid, copy]);
    assert_eq!(registry.get::<NameComponent>(copy).unwrap().as_str(), "mid");
}

#[test]
fn roots_lists_parentless_entities() {
    let mut registry = Registry::new();
    let (root, _, _) = chain(&mut registry);
    let loose = registry.spawn();
    assert_eq!(hierarchy::roots(&registry), vec![root, loose]);
}
