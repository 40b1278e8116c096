//! Explicitly constructed engine services.
//!
//! [`Engine`] builds every service in dependency order (event bus, jobs,
//! renderer, assets, physics, scripts, input) and tears them down in
//! reverse. Main-thread job completions receive the [`Services`] bundle,
//! which is how asset uploads and collision events reach the renderer and
//! the event bus without any global state.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;
use umbra_core::asset::Handle;
use umbra_core::events::{EventBus, WindowFocus, WindowResize};
use umbra_core::input::InputState;
use umbra_core::jobs::{JobSender, JobSystem};
use umbra_graphics::{BackendKind, Renderer};

use crate::assets::{Asset, AssetManager, AssetSource, AssetWatcher, FileSystemSource};
use crate::config::EngineConfig;
use crate::error::SceneError;
use crate::physics::{self, PhysicsEngine};
use crate::scripting::{NativeScriptEngine, ScriptEngine};

/// Main-thread state handed to job completions.
///
/// Fields are declared in teardown order.
pub struct Services {
    pub input: InputState,
    pub scripts: Box<dyn ScriptEngine>,
    pub physics: Box<dyn PhysicsEngine>,
    pub assets: AssetManager,
    pub renderer: Renderer,
    pub events: EventBus,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("scripts", &self.scripts.name())
            .field("physics", &self.physics.name())
            .field("assets", &self.assets)
            .field("renderer", &self.renderer.backend_name())
            .finish()
    }
}

/// Owner of every engine service.
pub struct Engine {
    watcher: Option<AssetWatcher>,
    services: Services,
    jobs: JobSystem<Services>,
    config: EngineConfig,
}

impl Engine {
    /// Builds the engine described by `config`, reading assets from
    /// `config.assets.root`.
    ///
    /// Never fails: a renderer whose backend cannot load is kept
    /// uninitialised. Check [`is_init`](Self::is_init).
    pub fn new(config: &EngineConfig) -> Self {
        let source = Arc::new(FileSystemSource::new(config.assets.root.clone()));
        Self::with_source(config, source)
    }

    /// Builds the engine over a custom asset source.
    pub fn with_source(config: &EngineConfig, source: Arc<dyn AssetSource>) -> Self {
        let jobs = match config.jobs.workers {
            0 => JobSystem::with_available_parallelism(),
            workers => JobSystem::new(workers),
        };
        let renderer = Renderer::new(&config.renderer_config());
        Self::build(config, source, jobs, renderer)
    }

    /// Software-rendered engine running background work on the calling
    /// thread. Used by tests and offline rendering.
    pub fn headless(config: &EngineConfig, source: Arc<dyn AssetSource>) -> Self {
        let mut renderer_config = config.renderer_config();
        renderer_config.backend = BackendKind::Software;
        let renderer = Renderer::new(&renderer_config);
        Self::build(config, source, JobSystem::inline(), renderer)
    }

    fn build(config: &EngineConfig, source: Arc<dyn AssetSource>, jobs: JobSystem<Services>, renderer: Renderer) -> Self {
        let events = EventBus::new();
        let watcher = if config.assets.hot_reload {
            source.watch_root().and_then(|root| Self::watch(config, root))
        } else {
            None
        };
        let assets = AssetManager::new(source, config.assets.cache, jobs.sender(), events.clone());
        let gravity = Vec3::from_array(config.physics.gravity);

        let services = Services {
            input: InputState::new(),
            scripts: Box::new(NativeScriptEngine::new()),
            physics: physics::default_engine(gravity),
            assets,
            renderer,
            events,
        };
        log::info!(
            "Engine: started ({} backend, {} physics, {} job workers)",
            services.renderer.backend_name().unwrap_or("no"),
            services.physics.name(),
            jobs.worker_count()
        );

        Self {
            watcher,
            services,
            jobs,
            config: config.clone(),
        }
    }

    fn watch(config: &EngineConfig, root: &Path) -> Option<AssetWatcher> {
        AssetWatcher::new(root, config.assets.poll_interval(), config.assets.settle_delay())
            .map_err(|err| log::warn!("Engine: hot reload disabled: {err}"))
            .ok()
    }

    pub fn is_init(&self) -> bool {
        self.services.renderer.is_init()
    }

    /// Fails with [`SceneError::RendererUnavailable`] unless the renderer
    /// loaded its backend.
    pub fn ensure_init(&self) -> Result<(), SceneError> {
        if self.is_init() {
            Ok(())
        } else {
            Err(SceneError::RendererUnavailable)
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replaces the script engine. Loaded modules of the old one are lost.
    pub fn set_script_engine(&mut self, scripts: Box<dyn ScriptEngine>) {
        log::debug!("Engine: script engine set to {}", scripts.name());
        self.services.scripts = scripts;
    }

    /// Replaces the physics engine. Bodies of the old one are lost.
    pub fn set_physics_engine(&mut self, physics: Box<dyn PhysicsEngine>) {
        log::debug!("Engine: physics engine set to {}", physics.name());
        self.services.physics = physics;
    }

    /// Applies settled hot-reload changes, then runs finished job
    /// completions. Call once between frames.
    ///
    /// Returns the number of completions executed.
    pub fn update(&mut self) -> usize {
        if let Some(watcher) = self.watcher.as_mut() {
            let Services { assets, renderer, .. } = &mut self.services;
            for path in watcher.poll(Instant::now()) {
                assets.reload(renderer, &path);
            }
        }
        self.jobs.update(&mut self.services)
    }

    /// Pumps jobs until no background work remains or `timeout` elapses.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        self.jobs.wait_idle(&mut self.services, timeout)
    }

    /// Resizes the surface, then announces the new size.
    pub fn dispatch_window_resize(&mut self, width: u32, height: u32) -> Result<(), SceneError> {
        self.services.renderer.resize_surface(width, height)?;
        let listeners = self.services.events.dispatch(WindowResize { width, height });
        log::debug!("Engine: window resized to {width}x{height} ({listeners} listeners)");
        Ok(())
    }

    pub fn dispatch_window_focus(&mut self, focused: bool) {
        self.services.events.dispatch(WindowFocus { focused });
    }

    /// Loads `path` relative to the asset root through the cache.
    pub fn load<T: Asset>(&mut self, path: &str) -> Handle<T> {
        self.load_with(path, true, true)
    }

    pub fn load_with<T: Asset>(&mut self, path: &str, relative_to_root: bool, use_cache: bool) -> Handle<T> {
        let Services { assets, renderer, .. } = &mut self.services;
        assets.load(renderer, path, relative_to_root, use_cache)
    }

    pub fn renderer(&self) -> &Renderer {
        &self.services.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.services.renderer
    }

    pub fn assets(&self) -> &AssetManager {
        &self.services.assets
    }

    pub fn assets_mut(&mut self) -> &mut AssetManager {
        &mut self.services.assets
    }

    pub fn events(&self) -> &EventBus {
        &self.services.events
    }

    pub fn jobs(&self) -> &JobSystem<Services> {
        &self.jobs
    }

    pub fn job_sender(&self) -> JobSender<Services> {
        self.jobs.sender()
    }

    pub fn input(&self) -> &InputState {
        &self.services.input
    }

    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.services.input
    }

    pub fn physics_mut(&mut self) -> &mut dyn PhysicsEngine {
        self.services.physics.as_mut()
    }

    pub fn scripts_mut(&mut self) -> &mut dyn ScriptEngine {
        self.services.scripts.as_mut()
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut Services {
        &mut self.services
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        log::info!("Engine: shutting down");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("services", &self.services)
            .field("hot_reload", &self.watcher.is_some())
            .field("in_flight", &self.jobs.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_core::events::AssetLoaded;

    use crate::assets::{MemorySource, TextureAsset, DEFAULT};

    fn engine() -> Engine {
        Engine::headless(&EngineConfig::default(), Arc::new(MemorySource::new()))
    }

    #[test]
    fn headless_engine_is_initialised() {
        let engine = engine();
        assert!(engine.is_init());
        assert!(engine.ensure_init().is_ok());
        assert_eq!(engine.jobs().worker_count(), 0);
    }

    #[test]
    fn cached_loads_share_one_handle() {
        let mut engine = engine();
        let first = engine.load::<TextureAsset>(DEFAULT);
        let second = engine.load::<TextureAsset>(DEFAULT);
        assert!(first.ptr_eq(&second));

        let uncached = engine.load_with::<TextureAsset>(DEFAULT, true, false);
        assert!(!uncached.ptr_eq(&first));
    }

    #[test]
    fn resize_updates_surface_and_notifies() {
        let mut engine = engine();
        let listener = engine.events().listen::<WindowResize>();
        engine.dispatch_window_resize(800, 600).unwrap();
        assert_eq!(engine.renderer().surface_size(), (800, 600));
        assert_eq!(listener.latest(), Some(WindowResize { width: 800, height: 600 }));
    }

    #[test]
    fn posted_jobs_run_on_update() {
        let mut engine = engine();
        engine.job_sender().post(|services: &mut Services| {
            services.events.dispatch(WindowFocus { focused: false });
        });
        let listener = engine.events().listen::<WindowFocus>();
        assert_eq!(engine.update(), 1);
        assert_eq!(listener.drain(), vec![WindowFocus { focused: false }]);
    }

    fn png(color: [u8; 4]) -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(2, 2, image::Rgba(color));
        let mut out = std::io::Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    fn first_texel(engine: &mut Engine, handle: &Handle<TextureAsset>) -> [f32; 4] {
        let asset = handle.read();
        let texture = asset.texture().expect("texture uploaded");
        engine.services.renderer.read_texture(texture, 0, 0).unwrap().pixels[0]
    }

    #[test]
    fn missing_texture_falls_back_to_placeholder() {
        let mut engine = engine();
        let listener = engine.events().listen::<AssetLoaded>();
        let handle = engine.load::<TextureAsset>("textures/missing.png");
        assert!(!handle.is_loaded());

        engine.update();
        assert!(handle.is_loaded());
        assert_eq!(first_texel(&mut engine, &handle), [1.0, 0.0, 1.0, 1.0]);

        let loaded = listener.drain();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, handle.id());
    }

    #[test]
    fn reload_replaces_content_and_announces() {
        let source = Arc::new(MemorySource::new());
        source.insert("textures/red.png", png([255, 0, 0, 255]));
        let mut engine = Engine::headless(&EngineConfig::default(), source.clone());
        let listener = engine.events().listen::<AssetLoaded>();

        let handle = engine.load::<TextureAsset>("textures/red.png");
        engine.update();
        assert_eq!(first_texel(&mut engine, &handle), [1.0, 0.0, 0.0, 1.0]);
        let version = handle.version();

        source.insert("textures/red.png", png([0, 0, 255, 255]));
        let Services { assets, renderer, .. } = &mut engine.services;
        assert_eq!(assets.reload(renderer, "textures/red.png"), 1);
        engine.update();

        assert!(handle.version() > version);
        assert_eq!(first_texel(&mut engine, &handle), [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(listener.drain().len(), 2);
    }
}
