//! End-to-end frames rendered with the software backend.

use std::sync::Arc;

use umbra::prelude::*;
use umbra::scene::assets::{MemorySource, CUBE};
use umbra::graphics::uniforms::{MAX_LIGHTS, MAX_SHADOWS};

const CLEAR: [f32; 4] = [0.2, 0.3, 0.4, 1.0];

fn engine(width: u32, height: u32) -> Engine {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = EngineConfig::default();
    config.window.width = width;
    config.window.height = height;
    config.renderer.clear_color = CLEAR;
    config.renderer.shadow_map_resolution = 16;
    Engine::headless(&config, Arc::new(MemorySource::new()))
}

fn approx(a: [f32; 4], b: [f32; 4]) -> bool {
    a.iter().zip(b).all(|(x, y)| (x - y).abs() < 2.0 / 255.0)
}

#[test]
fn cube_fills_the_center_of_the_albedo_buffer() {
    let mut engine = engine(64, 64);
    let mut scene = Scene::new(&mut engine, "cube").unwrap();
    let cube = scene.spawn("cube");
    scene.add_mesh(&mut engine, cube, CUBE, &[]).unwrap();
    let camera = scene.spawn_with("camera", TransformComponent::from_position(Vec3::new(0.0, 0.0, 5.0)));
    let lens = Camera {
        fov: 90.0,
        ..Camera::default()
    };
    scene.insert(camera, CameraComponent::new(lens)).unwrap();

    scene.draw(&mut engine, None).unwrap();
    engine.renderer_mut().submit().unwrap();

    let albedo = scene.deferred().albedo().unwrap();
    let readback = engine.renderer_mut().read_texture_handle(albedo, 0, 0).unwrap();
    let center = readback.pixel(32, 32).unwrap();
    assert!(!approx(center, CLEAR), "center is background: {center:?}");
    for (x, y) in [(0, 0), (63, 0), (0, 63), (63, 63)] {
        let corner = readback.pixel(x, y).unwrap();
        assert!(approx(corner, CLEAR), "corner ({x}, {y}) is {corner:?}");
    }
}

#[test]
fn window_resize_reallocates_scene_targets() {
    let mut engine = engine(32, 32);
    let mut scene = Scene::new(&mut engine, "resize").unwrap();
    let post = scene.spawn("post");
    scene.insert(post, GtaoComponent::default()).unwrap();
    scene.insert(post, SsrComponent::default()).unwrap();
    scene.insert(post, BloomComponent::default()).unwrap();
    let sun = scene.spawn("sun");
    scene
        .insert(sun, LightComponent::directional(Vec3::ONE, 2.0).with_shadow_map(true))
        .unwrap();
    scene.draw(&mut engine, None).unwrap();
    engine.renderer_mut().submit().unwrap();

    // (label, target, color texture, size) of every post-processing target.
    let post_targets = |scene: &Scene| {
        let mut targets = Vec::new();
        let gtao = scene.gtao().expect("gtao allocated");
        let bloom = scene.bloom().expect("bloom allocated");
        let ssr = scene.ssr().expect("ssr allocated");
        let owned = gtao.effects().into_iter().chain(bloom.effects());
        for effect in owned {
            let target = effect.target().expect("owned target");
            targets.push((effect.label().to_string(), target.handle(), target.color_views()[0].texture, target.size()));
        }
        let ssr = ssr.target();
        targets.push(("ssr".to_string(), ssr.handle(), ssr.color_views()[0].texture, ssr.size()));
        targets
    };
    let shadow_map = |scene: &Scene| {
        let shadow = scene
            .registry()
            .get::<LightComponent>(sun)
            .and_then(LightComponent::shadow)
            .expect("shadow map allocated");
        (shadow.target().handle(), shadow.resolution())
    };

    let old_gbuffer = scene.deferred().primary_render_target().unwrap().handle();
    let old_attachments = [
        scene.deferred().position().unwrap(),
        scene.deferred().albedo().unwrap(),
        scene.deferred().normal().unwrap(),
        scene.deferred().combined().unwrap(),
        scene.deferred().emission().unwrap(),
        scene.deferred().depth().unwrap(),
    ];
    let old_frame = scene.frame().color_texture(0).unwrap().handle();
    let old_post = post_targets(&scene);
    let old_shadow = shadow_map(&scene);
    assert_eq!(old_post.len(), 6);

    engine.dispatch_window_resize(800, 600).unwrap();
    scene.draw(&mut engine, None).unwrap();
    engine.renderer_mut().submit().unwrap();

    assert_eq!(scene.deferred().size(), Some((800, 600)));
    assert_eq!((scene.frame().width(), scene.frame().height()), (800, 600));
    let renderer = engine.renderer();
    assert_eq!(renderer.release_count(old_gbuffer), 1);
    for attachment in old_attachments {
        assert_eq!(renderer.release_count(attachment), 1);
        assert!(!renderer.is_live(attachment));
    }
    assert_eq!(renderer.release_count(old_frame), 1);

    let new_post = post_targets(&scene);
    for ((label, target, color, (width, _)), (_, _, _, size)) in old_post.iter().zip(&new_post) {
        let scale = 32 / width;
        assert_eq!(*size, (800 / scale, 600 / scale), "{label}");
        assert_eq!(renderer.release_count(*target), 1, "{label}");
        assert_eq!(renderer.release_count(*color), 1, "{label}");
    }

    let new_shadow = shadow_map(&scene);
    assert_eq!(new_shadow, old_shadow);
    assert_eq!(new_shadow.1, 16);
    assert!(renderer.is_live(new_shadow.0));
    assert_eq!(renderer.release_count(new_shadow.0), 0);
}

#[test]
fn lights_and_shadows_are_capped() {
    let mut engine = engine(16, 16);
    let mut scene = Scene::new(&mut engine, "lights").unwrap();
    for i in 0..10 {
        let sun = scene.spawn(&format!("sun{i}"));
        scene
            .insert(sun, LightComponent::directional(Vec3::ONE, 1.0).with_shadow_map(true))
            .unwrap();
    }
    for i in 0..190 {
        let lamp = scene.spawn(&format!("lamp{i}"));
        scene.insert(lamp, LightComponent::point(Vec3::ONE, 1.0, 4.0)).unwrap();
    }

    scene.draw(&mut engine, None).unwrap();
    engine.renderer_mut().submit().unwrap();

    assert_eq!(scene.lights().len(), MAX_LIGHTS);
    assert_eq!(scene.shadows().len(), MAX_SHADOWS);
    let with_shadow = scene
        .lights()
        .as_slice()
        .iter()
        .filter(|light| light.shadow_index().is_some())
        .count();
    assert_eq!(with_shadow, MAX_SHADOWS);
}
