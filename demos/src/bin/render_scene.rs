//! Renders the showcase scene offline and writes the result as a PNG.
//!
//! ```text
//! render_scene --width 640 --height 360 --frames 30 --output showcase.png
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use umbra_demos::{build_showcase, output_target, to_rgba8};
use umbra_graphics::BackendKind;
use umbra_scene::{Engine, EngineConfig, Scene, SceneError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// CPU reference rasterizer, always available.
    #[default]
    Software,
    /// GPU rendering, requires the `wgpu-backend` feature.
    Wgpu,
}

impl From<CliBackend> for BackendKind {
    fn from(backend: CliBackend) -> Self {
        match backend {
            CliBackend::Software => BackendKind::Software,
            CliBackend::Wgpu => BackendKind::Wgpu,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "render_scene", about = "Render the Umbra showcase scene to a PNG")]
struct Args {
    /// Engine configuration (TOML). Command line options override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "software", value_enum)]
    backend: CliBackend,

    #[arg(long, default_value = "640")]
    width: u32,

    #[arg(long, default_value = "360")]
    height: u32,

    /// Simulated frames before the capture.
    #[arg(long, default_value = "1")]
    frames: u32,

    /// Seconds per simulated frame.
    #[arg(long, default_value = "0.016666")]
    dt: f32,

    #[arg(long, default_value = "showcase.png")]
    output: PathBuf,

    /// Also write the scene (`.json` or binary by extension).
    #[arg(long)]
    save_scene: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),
    #[error("output target has no color attachment")]
    Readback,
}

fn config(args: &Args) -> Result<EngineConfig, SceneError> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.renderer.backend = args.backend.into();
    config.window.width = args.width;
    config.window.height = args.height;
    Ok(config)
}

fn run(args: &Args) -> Result<(), DemoError> {
    let config = config(args)?;
    let mut engine = Engine::new(&config);
    engine.ensure_init()?;

    let mut scene = Scene::new(&mut engine, "showcase")?;
    let showcase = build_showcase(&mut engine, &mut scene)?;
    let target = output_target(&mut engine, args.width, args.height)?;
    engine.wait_idle(Duration::from_secs(5));

    scene.start(&mut engine);
    for _ in 0..args.frames.max(1) {
        engine.update();
        scene.update(&mut engine, args.dt)?;
        scene.draw(&mut engine, Some(&target))?;
        engine.renderer_mut().submit().map_err(SceneError::from)?;
    }
    log::info!(
        "Rendered {} frames, ball at {:?}",
        args.frames.max(1),
        scene
            .registry()
            .get::<umbra_ecs::TransformComponent>(showcase.ball)
            .map(|transform| transform.position)
    );

    let color = target.color_texture(0).ok_or(DemoError::Readback)?.handle();
    let readback = engine
        .renderer_mut()
        .read_texture_handle(color, 0, 0)
        .map_err(SceneError::from)?;
    image::save_buffer(
        &args.output,
        &to_rgba8(&readback.pixels),
        readback.width,
        readback.height,
        image::ColorType::Rgba8,
    )?;
    log::info!("Wrote {}", args.output.display());

    if let Some(path) = &args.save_scene {
        scene.save(path)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("render_scene: {err}");
            ExitCode::FAILURE
        }
    }
}
