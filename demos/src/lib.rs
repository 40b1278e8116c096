//! # Umbra Demos
//!
//! Demo scenes for the Umbra engine.
//!
//! ## Available Demos
//!
//! - `render_scene` - Renders the showcase scene offline and writes a PNG

use glam::Vec3;
use umbra_ecs::{Entity, TransformComponent};
use umbra_graphics::{ProceduralSky, RenderTarget, RenderTargetConfig, TextureFormat};
use umbra_scene::assets::{CUBE, PLANE, SPHERE};
use umbra_scene::components::{
    BloomComponent, Camera, CameraComponent, CameraMode, GtaoComponent, LightComponent, RigidBodyComponent,
    SkyComponent, TonemapComponent,
};
use umbra_scene::physics::{BodySettings, MotionType};
use umbra_scene::{Engine, Scene, SceneError};

/// Demos library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Entities of interest in the showcase scene.
#[derive(Debug, Clone, Copy)]
pub struct Showcase {
    pub camera: Entity,
    pub sun: Entity,
    pub ball: Entity,
}

/// Fills `scene` with a ground plane, a cube, a falling sphere, a
/// shadow-casting sun, a procedural sky and the post-processing stack.
pub fn build_showcase(engine: &mut Engine, scene: &mut Scene) -> Result<Showcase, SceneError> {
    let ground = scene.spawn_with(
        "ground",
        TransformComponent::IDENTITY.with_scale(Vec3::new(10.0, 1.0, 10.0)),
    );
    scene.add_mesh(engine, ground, PLANE, &[])?;
    scene.insert(
        ground,
        RigidBodyComponent::new(
            BodySettings::cuboid(Vec3::new(10.0, 0.05, 10.0)).with_motion(MotionType::Static),
        ),
    )?;

    let cube = scene.spawn_with(
        "cube",
        TransformComponent::from_position(Vec3::new(-1.0, 0.5, 0.0)).with_rotation(Vec3::new(0.0, 30.0, 0.0)),
    );
    scene.add_mesh(engine, cube, CUBE, &[])?;

    let ball = scene.spawn_with("ball", TransformComponent::from_position(Vec3::new(1.0, 3.0, 0.0)));
    scene.add_mesh(engine, ball, SPHERE, &[])?;
    scene.insert(ball, RigidBodyComponent::new(BodySettings::ball(0.5).with_restitution(0.4)))?;

    let sun = scene.spawn_with(
        "sun",
        TransformComponent::from_position(Vec3::new(0.0, 10.0, 0.0)).with_rotation(Vec3::new(-60.0, 30.0, 0.0)),
    );
    scene.insert(sun, LightComponent::directional(Vec3::new(1.0, 0.95, 0.9), 3.0).with_shadow_map(true))?;

    let fill = scene.spawn_with("fill", TransformComponent::from_position(Vec3::new(-3.0, 2.0, 3.0)));
    scene.insert(fill, LightComponent::point(Vec3::new(0.4, 0.6, 1.0), 5.0, 8.0))?;

    let camera = scene.spawn_with("camera", TransformComponent::from_position(Vec3::new(0.0, 2.5, 6.0)));
    let lens = Camera {
        fov: 55.0,
        mode: CameraMode::LookAt { target: Vec3::new(0.0, 0.5, 0.0) },
        ..Camera::default()
    };
    scene.insert(camera, CameraComponent::new(lens))?;

    let post = scene.spawn("post");
    scene.insert(post, SkyComponent::procedural(ProceduralSky::default()))?;
    scene.insert(post, TonemapComponent::default())?;
    scene.insert(post, BloomComponent::default())?;
    scene.insert(post, GtaoComponent::default())?;

    log::info!("Showcase built with {} entities", scene.registry().len());
    Ok(Showcase { camera, sun, ball })
}

/// An 8-bit color target for offline output.
pub fn output_target(engine: &mut Engine, width: u32, height: u32) -> Result<RenderTarget, SceneError> {
    let config = RenderTargetConfig::new(width, height)
        .with_color(TextureFormat::Rgba8Unorm)
        .with_label("demo/output");
    Ok(engine.renderer_mut().create_render_target(&config)?)
}

/// Converts linear float pixels to 8-bit RGBA.
pub fn to_rgba8(pixels: &[[f32; 4]]) -> Vec<u8> {
    pixels
        .iter()
        .flat_map(|pixel| pixel.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use umbra_scene::assets::MemorySource;
    use umbra_scene::EngineConfig;

    #[test]
    fn rgba8_conversion_clamps() {
        assert_eq!(to_rgba8(&[[0.0, 0.5, 1.0, 2.0], [-1.0, 1.0, 0.0, 1.0]]), vec![0, 128, 255, 255, 0, 255, 0, 255]);
    }

    #[test]
    fn showcase_renders_a_frame() {
        let mut config = EngineConfig::default();
        config.window.width = 32;
        config.window.height = 32;
        config.renderer.shadow_map_resolution = 32;
        config.renderer.environment_resolution = 8;
        let mut engine = Engine::headless(&config, Arc::new(MemorySource::new()));
        let mut scene = Scene::new(&mut engine, "showcase").unwrap();
        let showcase = build_showcase(&mut engine, &mut scene).unwrap();
        let target = output_target(&mut engine, 32, 32).unwrap();

        scene.start(&mut engine);
        scene.update(&mut engine, 0.1).unwrap();
        scene.draw(&mut engine, Some(&target)).unwrap();
        engine.renderer_mut().submit().unwrap();

        assert_eq!(scene.shadows().len(), 1);
        assert!(scene.environment().is_some());
        let ball = scene.registry().get::<TransformComponent>(showcase.ball).unwrap();
        assert!(ball.position.y < 3.0);
    }
}
