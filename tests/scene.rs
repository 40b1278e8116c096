//! Scene graph and asset cache behaviour through the public facade.

use std::sync::Arc;

use rstest::rstest;
use umbra::core::math::mat4_approx_eq;
use umbra::ecs::hierarchy::{self, world_transform};
use umbra::ecs::{HierarchyError, Reparented};
use umbra::prelude::*;
use umbra::scene::assets::{MemorySource, TextureAsset, DEFAULT};

fn engine() -> Engine {
    let mut config = EngineConfig::default();
    config.window.width = 16;
    config.window.height = 16;
    Engine::headless(&config, Arc::new(MemorySource::new()))
}

#[test]
fn cached_assets_share_identity() {
    let mut engine = engine();
    let a = engine.load::<TextureAsset>(DEFAULT);
    let b = engine.load::<TextureAsset>(DEFAULT);
    assert!(a.ptr_eq(&b));
    assert_eq!(a.id(), b.id());

    let fresh = engine.load_with::<TextureAsset>(DEFAULT, true, false);
    assert!(!fresh.ptr_eq(&a));
}

#[rstest]
#[case(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0))]
#[case(Vec3::new(3.0, -2.0, 1.0), Vec3::new(0.0, 4.0, 0.0))]
#[case(Vec3::new(-1.0, 5.0, 2.0), Vec3::new(-7.0, 0.5, 3.0))]
fn reparenting_keeps_world_pose(#[case] parent_at: Vec3, #[case] child_at: Vec3) {
    let mut engine = engine();
    let mut scene = Scene::new(&mut engine, "graph").unwrap();
    let parent = scene.spawn_with(
        "parent",
        TransformComponent::from_position(parent_at).with_rotation(Vec3::new(0.0, 45.0, 0.0)),
    );
    let child = scene.spawn_with("child", TransformComponent::from_position(child_at));
    let before = world_transform(scene.registry(), child);

    assert_eq!(scene.reparent_entity(child, parent).unwrap(), Reparented::Attached);
    assert!(hierarchy::is_child_of(scene.registry(), child, parent));
    assert!(mat4_approx_eq(&world_transform(scene.registry(), child), &before, 1e-4));

    assert_eq!(scene.reparent_entity(child, parent).unwrap(), Reparented::Detached);
    assert_eq!(hierarchy::parent_of(scene.registry(), child), None);
    assert!(mat4_approx_eq(&world_transform(scene.registry(), child), &before, 1e-4));
}

#[test]
fn invalid_parenting_is_rejected() {
    let mut engine = engine();
    let mut scene = Scene::new(&mut engine, "graph").unwrap();
    let root = scene.spawn("root");
    let child = scene.spawn("child");
    scene.reparent_entity(child, root).unwrap();

    let err = scene.reparent_entity(root, root).unwrap_err();
    assert!(matches!(err, SceneError::Hierarchy(HierarchyError::SelfParent(_))));
    let err = scene.reparent_entity(root, child).unwrap_err();
    assert!(matches!(err, SceneError::Hierarchy(HierarchyError::Cycle { .. })));
    assert_eq!(hierarchy::parent_of(scene.registry(), child), Some(root));
}

#[test]
fn despawning_a_parent_removes_the_subtree() {
    let mut engine = engine();
    let mut scene = Scene::new(&mut engine, "graph").unwrap();
    let root = scene.spawn("root");
    let child = scene.spawn("child");
    let grandchild = scene.spawn("grandchild");
    scene.reparent_entity(child, root).unwrap();
    scene.reparent_entity(grandchild, child).unwrap();

    scene.despawn(&mut engine, root);
    for entity in [root, child, grandchild] {
        assert!(!scene.registry().is_alive(entity));
    }
}
