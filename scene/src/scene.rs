//! Per-frame scene orchestration.
//!
//! A [`Scene`] owns the entity registry and the render stages it drives.
//! [`Scene::update`] runs input actions, scripts and the physics step;
//! [`Scene::draw`] always runs, paused or not, in a fixed order:
//!
//! 1. environment capture, when the sky changed;
//! 2. one depth pass per shadow-casting light;
//! 3. camera of record (last active camera wins);
//! 4. lights and shadows uniforms, truncated to their capacity;
//! 5. geometry into the G-buffer, or a plain clear when nothing is drawable;
//! 6. sky, then the lighting resolve into the HDR frame;
//! 7. GTAO, SSR and bloom, for whichever components are present;
//! 8. tonemap into the caller's target or the surface.
//!
//! Every stage that must start from cleared attachments opens its own
//! [`Renderer::begin`] scope. The lighting resolve samples the ambient
//! occlusion computed by the previous frame.

use std::collections::HashMap;

use crossbeam_channel::{Receiver, Sender};
use glam::Mat4;
use umbra_core::asset::{AssetId, Handle};
use umbra_core::events::{AssetLoaded, Listener, WindowResize};
use umbra_ecs::hierarchy::{self, parent_of, world_transform};
use umbra_ecs::{Component, Entity, NameComponent, Registry, Reparented, TransformComponent};
use umbra_graphics::deferred::lighting_slots;
use umbra_graphics::uniforms::{GpuShadow, LightsUniform, ShadowsUniform, MAX_LIGHTS};
use umbra_graphics::{
    Binding, Bloom, BloomSettings, Buffer, DeferredRenderer, Environment, EnvironmentSource, GraphicsError, Gtao,
    GtaoSettings, PbrManager, PipelineHandle, ProceduralSky, RenderTarget, RenderTargetConfig, Renderer,
    ShaderProvider, SkyRenderer, Ssr, SsrInputs, SsrSettings, Texture, TextureFormat, TextureHandle, Tonemap,
    TonemapInputs, TonemapSettings,
};

use crate::assets::{Model, Script, TextureAsset};
use crate::components::{
    register_components, BloomComponent, Camera, CameraComponent, GtaoComponent, LightComponent,
    MeshComponent, MeshRendererComponent, PipelineComponent, PrefabComponent, RigidBodyComponent,
    ScriptComponent, ShadowMap, SkyComponent, SkySource, SsrComponent, TonemapComponent,
};
use crate::engine::{Engine, Services};
use crate::error::{ScriptError, SceneError};
use crate::scripting::{ScriptContext, ScriptValue, SCENE_GLOBAL, SELF_GLOBAL, START_SIGNATURE, UPDATE_SIGNATURE};

/// A mesh ready to be drawn this frame.
struct Drawable {
    world: Mat4,
    model: Handle<Model>,
    materials: MeshRendererComponent,
    pipeline: Option<PipelineHandle>,
}

/// What the current environment was captured from.
#[derive(Debug, Clone, PartialEq)]
enum EnvironmentKey {
    Procedural(ProceduralSky, u32),
    Hdri { id: AssetId, version: u64, resolution: u32 },
}

/// Post-processing settings of the frame, from the last component of each
/// kind.
#[derive(Default)]
struct PostSettings {
    tonemap: Option<TonemapSettings>,
    lut: Option<Handle<TextureAsset>>,
    bloom: Option<BloomSettings>,
    gtao: Option<GtaoSettings>,
    ssr: Option<SsrSettings>,
}

pub struct Scene {
    name: String,
    registry: Registry,

    deferred: DeferredRenderer,
    pbr: PbrManager,
    sky: SkyRenderer,
    environment: Option<Environment>,
    environment_key: Option<EnvironmentKey>,
    environment_resolution: u32,

    /// Lit HDR frame the resolve and the sky write into.
    frame: RenderTarget,
    resize: Listener<WindowResize>,
    reload: Listener<AssetLoaded>,

    gtao: Option<Gtao>,
    ssr: Option<Ssr>,
    bloom: Option<Bloom>,
    tonemap: Tonemap,

    lights: LightsUniform,
    shadows: ShadowsUniform,
    lights_buffer: Buffer,
    shadows_buffer: Buffer,
    shadow_resolution: u32,
    truncated: (usize, usize),

    running: bool,
    update_physics: bool,
    time: f32,
    next_module: HashMap<String, u32>,
    start_tx: Sender<Entity>,
    start_rx: Receiver<Entity>,
}

impl Scene {
    pub fn new(engine: &mut Engine, name: impl Into<String>) -> Result<Self, SceneError> {
        engine.ensure_init()?;
        let name = name.into();
        let config = engine.config().clone();
        let Services {
            renderer,
            assets,
            events,
            ..
        } = engine.services_mut();

        let mut registry = Registry::new();
        register_components(&mut registry);

        let deferred = DeferredRenderer::new(renderer, assets, events)?;
        let pbr = PbrManager::new(renderer, assets)?;
        let sky = SkyRenderer::new(renderer, assets)?;
        let tonemap = Tonemap::new(renderer, assets, events)?;

        let (width, height) = renderer.surface_size();
        let frame = renderer.create_render_target(&frame_config(width, height))?;
        let lights = LightsUniform::new();
        let shadows = ShadowsUniform::new();
        let lights_buffer = renderer.create_uniform("scene/lights", &lights)?;
        let shadows_buffer = renderer.create_uniform("scene/shadows", &shadows)?;
        let (start_tx, start_rx) = crossbeam_channel::unbounded();

        log::info!("Scene '{name}': created at {width}x{height}");
        Ok(Self {
            name,
            registry,
            deferred,
            pbr,
            sky,
            environment: None,
            environment_key: None,
            environment_resolution: config.renderer.environment_resolution,
            frame,
            resize: events.listen(),
            reload: events.listen(),
            gtao: None,
            ssr: None,
            bloom: None,
            tonemap,
            lights,
            shadows,
            lights_buffer,
            shadows_buffer,
            shadow_resolution: config.renderer.shadow_map_resolution,
            truncated: (0, 0),
            running: false,
            update_physics: config.physics.enabled,
            time: 0.0,
            next_module: HashMap::new(),
            start_tx,
            start_rx,
        })
    }

    // ---- Accessors ----

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn deferred(&self) -> &DeferredRenderer {
        &self.deferred
    }

    pub fn pbr(&self) -> &PbrManager {
        &self.pbr
    }

    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }

    /// The lit HDR frame of the last draw, before post-processing.
    pub fn frame(&self) -> &RenderTarget {
        &self.frame
    }

    pub fn gtao(&self) -> Option<&Gtao> {
        self.gtao.as_ref()
    }

    pub fn ssr(&self) -> Option<&Ssr> {
        self.ssr.as_ref()
    }

    pub fn bloom(&self) -> Option<&Bloom> {
        self.bloom.as_ref()
    }

    pub fn tonemap(&self) -> &Tonemap {
        &self.tonemap
    }

    /// Lights uploaded by the last draw.
    pub fn lights(&self) -> &LightsUniform {
        &self.lights
    }

    /// Shadows uploaded by the last draw.
    pub fn shadows(&self) -> &ShadowsUniform {
        &self.shadows
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Pauses or resumes scripts and physics. Drawing is unaffected.
    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn updates_physics(&self) -> bool {
        self.update_physics
    }

    pub fn set_update_physics(&mut self, enabled: bool) {
        self.update_physics = enabled;
    }

    /// Seconds of scene time accumulated by [`update`](Self::update).
    pub fn time(&self) -> f32 {
        self.time
    }

    // ---- Entities ----

    /// Spawns a named entity at the origin.
    pub fn spawn(&mut self, name: &str) -> Entity {
        self.spawn_with(name, TransformComponent::default())
    }

    pub fn spawn_with(&mut self, name: &str, transform: TransformComponent) -> Entity {
        let entity = self.registry.spawn();
        // Both types are registered by `Registry::new`.
        let named = self.registry.insert(entity, NameComponent::new(name));
        let placed = self.registry.insert(entity, transform);
        debug_assert!(named.is_ok() && placed.is_ok(), "fresh {entity} rejected a built-in component");
        log::trace!("Scene '{}': spawned {entity} ({name})", self.name);
        entity
    }

    /// First entity carrying `name`.
    pub fn find(&self, name: &str) -> Option<Entity> {
        self.registry
            .query::<(NameComponent,)>()
            .find(|(_, (component,))| component.as_str() == name)
            .map(|(entity, _)| entity)
    }

    pub fn insert<T: Component>(&mut self, entity: Entity, component: T) -> Result<(), SceneError> {
        self.registry.insert(entity, component)?;
        Ok(())
    }

    /// Gives `entity` a model, its materials and the built-in geometry
    /// pipeline.
    pub fn add_mesh(
        &mut self,
        engine: &mut Engine,
        entity: Entity,
        model: &str,
        materials: &[&str],
    ) -> Result<(), SceneError> {
        let mesh = MeshComponent::load(engine, model);
        let renderer = MeshRendererComponent::load(engine, materials);
        let pipeline = PipelineComponent::geometry(engine);
        self.registry.insert(entity, mesh)?;
        self.registry.insert(entity, renderer)?;
        self.registry.insert(entity, pipeline)?;
        Ok(())
    }

    /// Attaches a new module instance of the script at `path`.
    ///
    /// In a running scene its `Start` runs at the next update after the
    /// following job pump.
    pub fn add_script(&mut self, engine: &mut Engine, entity: Entity, path: &str) -> Result<(), SceneError> {
        let script = engine.load::<Script>(path);
        let module = self.allocate_module(path);
        self.registry.insert(entity, ScriptComponent::new(script, module))?;
        if self.running {
            self.schedule_start(engine, entity);
        }
        Ok(())
    }

    /// Despawns `entity` and its descendants, removing their physics
    /// bodies and script modules.
    pub fn despawn(&mut self, engine: &mut Engine, entity: Entity) {
        for doomed in self.subtree(entity) {
            if let Some(body) = self.registry.get::<RigidBodyComponent>(doomed).and_then(RigidBodyComponent::body) {
                engine.physics_mut().remove_body(body);
            }
            if let Some(script) = self.registry.get::<ScriptComponent>(doomed) {
                engine.scripts_mut().unload_module(script.script.path(), script.module);
            }
        }
        hierarchy::despawn_recursive(&mut self.registry, entity);
    }

    /// Moves `child` under `parent`, keeping its world pose. Calling it again
    /// with the same parent detaches the child.
    pub fn reparent_entity(&mut self, child: Entity, parent: Entity) -> Result<Reparented, SceneError> {
        Ok(hierarchy::reparent(&mut self.registry, child, parent)?)
    }

    /// Copies every cloneable component of `source` into a new entity under
    /// the same parent.
    ///
    /// A copied script gets its own module. In a running scene its `Start`
    /// is deferred through the job queue instead of running here.
    pub fn clone_entity(&mut self, engine: &mut Engine, source: Entity) -> Result<Entity, SceneError> {
        let copy = hierarchy::clone_entity(&mut self.registry, source)?;
        let script = self
            .registry
            .get::<ScriptComponent>(copy)
            .map(|component| component.script.path().to_string());
        if let Some(path) = script {
            let module = self.allocate_module(&path);
            if let Some(component) = self.registry.get_mut::<ScriptComponent>(copy) {
                component.module = module;
            }
            if self.running {
                self.schedule_start(engine, copy);
            }
        }
        Ok(copy)
    }

    fn is_prefab(&self, entity: Entity) -> bool {
        self.registry.has::<PrefabComponent>(entity)
    }

    fn subtree(&self, root: Entity) -> Vec<Entity> {
        let mut entities = vec![root];
        let mut index = 0;
        while index < entities.len() {
            entities.extend_from_slice(hierarchy::children_of(&self.registry, entities[index]));
            index += 1;
        }
        entities
    }

    // ---- Scripts ----

    pub(crate) fn allocate_module(&mut self, path: &str) -> u32 {
        let next = self.next_module.entry(path.to_string()).or_insert(0);
        let module = *next;
        *next += 1;
        module
    }

    /// Keeps future allocations for `path` above `module`.
    pub(crate) fn reserve_module(&mut self, path: &str, module: u32) {
        let next = self.next_module.entry(path.to_string()).or_insert(0);
        *next = (*next).max(module + 1);
    }

    fn schedule_start(&self, engine: &Engine, entity: Entity) {
        let starts = self.start_tx.clone();
        engine.job_sender().post(move |_: &mut Services| {
            let _ = starts.send(entity);
        });
    }

    /// Runs `Start` of every script that has not started and marks the
    /// scene running.
    pub fn start(&mut self, engine: &mut Engine) {
        self.running = true;
        let mut started = 0;
        for entity in self.registry.query_entities::<(ScriptComponent,)>() {
            let pending = self
                .registry
                .get::<ScriptComponent>(entity)
                .is_some_and(|script| !script.is_started());
            if pending && !self.is_prefab(entity) && self.start_script(engine, entity) {
                started += 1;
            }
        }
        log::info!("Scene '{}': started ({started} scripts)", self.name);
    }

    fn start_script(&mut self, engine: &mut Engine, entity: Entity) -> bool {
        let Some(component) = self.registry.get::<ScriptComponent>(entity) else {
            return false;
        };
        let script = component.script.clone();
        let module = component.module;
        let path = script.path().to_string();
        let Services {
            input,
            scripts,
            physics,
            ..
        } = engine.services_mut();

        if !scripts.is_loaded(&path, module) {
            let source = script.read().source.clone();
            if let Err(err) = scripts.load_module(&path, &source, module) {
                log::warn!("Scene '{}': {err}", self.name);
                return false;
            }
        }
        let globals = [
            (SELF_GLOBAL, ScriptValue::Entity(entity)),
            (SCENE_GLOBAL, ScriptValue::Scene(self.name.clone())),
        ];
        for (name, value) in globals {
            match scripts.set_global(&path, module, name, value) {
                Ok(()) | Err(ScriptError::UnknownGlobal { .. }) => {}
                Err(err) => {
                    log::warn!("Scene '{}': {err}", self.name);
                    return false;
                }
            }
        }

        let mut context = ScriptContext {
            registry: &mut self.registry,
            input: &*input,
            physics: physics.as_mut(),
        };
        if let Err(err) = scripts.execute_function(&mut context, &path, START_SIGNATURE, &|_| {}, module) {
            log::warn!("Scene '{}': {err}", self.name);
            return false;
        }
        if let Some(component) = self.registry.get_mut::<ScriptComponent>(entity) {
            component.set_started(true);
        }
        true
    }

    fn run_deferred_starts(&mut self, engine: &mut Engine) {
        let pending: Vec<Entity> = self.start_rx.try_iter().collect();
        for entity in pending {
            let waiting = self
                .registry
                .get::<ScriptComponent>(entity)
                .is_some_and(|script| !script.is_started());
            if waiting && !self.is_prefab(entity) {
                self.start_script(engine, entity);
            }
        }
    }

    fn update_scripts(&mut self, engine: &mut Engine, dt: f32) {
        let Services {
            input,
            scripts,
            physics,
            ..
        } = engine.services_mut();
        for entity in self.registry.query_entities::<(ScriptComponent,)>() {
            if self.registry.has::<PrefabComponent>(entity) {
                continue;
            }
            let Some(component) = self.registry.get::<ScriptComponent>(entity) else {
                continue;
            };
            if !component.is_started() {
                continue;
            }
            let path = component.script.path().to_string();
            let module = component.module;
            let mut context = ScriptContext {
                registry: &mut self.registry,
                input: &*input,
                physics: physics.as_mut(),
            };
            let binder = |args: &mut crate::scripting::ScriptArgs| {
                args.push(ScriptValue::Float(f64::from(dt)));
            };
            if let Err(err) = scripts.execute_function(&mut context, &path, UPDATE_SIGNATURE, &binder, module) {
                log::warn!("Scene '{}': {err}", self.name);
            }
        }
    }

    // ---- Update ----

    /// Advances the scene by `dt` seconds.
    ///
    /// Input actions are always refreshed. Scripts run while the scene is
    /// running; physics steps while it is running and physics is enabled.
    pub fn update(&mut self, engine: &mut Engine, dt: f32) -> Result<(), SceneError> {
        self.time += dt;
        engine.input_mut().update_actions();
        if !self.running {
            return Ok(());
        }
        self.run_deferred_starts(engine);
        self.update_scripts(engine, dt);
        if self.update_physics {
            self.step_physics(engine, dt)?;
        }
        Ok(())
    }

    fn step_physics(&mut self, engine: &mut Engine, dt: f32) -> Result<(), SceneError> {
        let jobs = engine.job_sender();
        let physics = engine.physics_mut();
        let bodies = self.registry.query_entities::<(RigidBodyComponent, TransformComponent)>();

        // Transform to body: creation and overridden bodies.
        for &entity in &bodies {
            if self.is_prefab(entity) {
                continue;
            }
            let world = world_transform(&self.registry, entity);
            let (_, rotation, position) = world.to_scale_rotation_translation();
            let Some(component) = self.registry.get::<RigidBodyComponent>(entity) else {
                continue;
            };
            match component.body() {
                None => {
                    let settings = component.settings.clone().with_position(position).with_rotation(rotation);
                    match physics.create_body(&settings) {
                        Ok(body) => {
                            if let Some(component) = self.registry.get_mut::<RigidBodyComponent>(entity) {
                                component.set_body(Some(body));
                            }
                        }
                        Err(err) => log::warn!("Scene '{}': {entity} has no body: {err}", self.name),
                    }
                }
                Some(body) if component.override_physics => {
                    physics.set_position(body, position)?;
                    physics.set_rotation(body, rotation)?;
                }
                Some(_) => {}
            }
        }

        physics.update(dt);

        // Body to transform.
        for &entity in &bodies {
            let Some(component) = self.registry.get::<RigidBodyComponent>(entity) else {
                continue;
            };
            let Some(body) = component.body() else {
                continue;
            };
            if component.override_physics || self.is_prefab(entity) {
                continue;
            }
            let position = physics.position(body)?;
            let rotation = physics.rotation(body)?;
            let (scale, _, _) = world_transform(&self.registry, entity).to_scale_rotation_translation();
            let parent_world = parent_of(&self.registry, entity)
                .map_or(Mat4::IDENTITY, |parent| world_transform(&self.registry, parent));
            let world = Mat4::from_scale_rotation_translation(scale, rotation, position);
            if let Some(transform) = self.registry.get_mut::<TransformComponent>(entity) {
                transform.set_transform(parent_world.inverse() * world);
            }
        }

        for contact in physics.drain_contacts() {
            jobs.post(move |services: &mut Services| {
                services.events.dispatch(contact);
            });
        }
        Ok(())
    }

    // ---- Draw ----

    /// Applies queued resize and reload events to every render stage.
    pub fn process_events(&mut self, renderer: &mut Renderer) -> Result<(), GraphicsError> {
        if let Some(resize) = self.resize.latest() {
            renderer.resize_render_target(&mut self.frame, resize.width, resize.height)?;
        }
        self.deferred.process_events(renderer)?;
        if let Some(gtao) = self.gtao.as_mut() {
            gtao.process_events(renderer)?;
        }
        if let Some(ssr) = self.ssr.as_mut() {
            ssr.process_events(renderer)?;
        }
        if let Some(bloom) = self.bloom.as_mut() {
            bloom.process_events(renderer)?;
        }
        self.tonemap.process_events(renderer)?;

        let reloaded: Vec<AssetId> = self
            .reload
            .drain()
            .into_iter()
            .filter(|event| event.kind.is_shader())
            .map(|event| event.id)
            .collect();
        if !reloaded.is_empty() {
            for entity in self.registry.query_entities::<(PipelineComponent,)>() {
                if let Some(pipeline) = self.registry.get_mut::<PipelineComponent>(entity) {
                    if reloaded.iter().any(|id| pipeline.uses_shader(*id)) {
                        pipeline.build(renderer);
                    }
                }
            }
        }
        Ok(())
    }

    /// Renders the scene into `target`, or into the surface when `None`.
    ///
    /// Records the frame without submitting it; call
    /// [`Renderer::submit`] afterwards.
    pub fn draw(&mut self, engine: &mut Engine, target: Option<&RenderTarget>) -> Result<(), SceneError> {
        engine.ensure_init()?;
        let Services {
            renderer,
            assets,
            events,
            ..
        } = engine.services_mut();

        self.process_events(renderer)?;
        let post = self.post_settings();
        self.ensure_effects(renderer, assets, events, &post)?;
        self.update_environment(renderer)?;
        self.allocate_shadow_maps(renderer, assets);

        let drawables = self.drawables();
        self.draw_shadows(renderer, &drawables)?;
        let camera = self.setup_camera(renderer);
        let shadow_maps = self.upload_lights(renderer)?;
        self.draw_geometry(renderer, &drawables)?;
        self.resolve(renderer, &shadow_maps)?;
        self.post_process(renderer, camera, &post, target)?;
        Ok(())
    }

    fn drawables(&self) -> Vec<Drawable> {
        self.registry
            .query::<(MeshComponent, MeshRendererComponent, PipelineComponent, TransformComponent)>()
            .filter(|(entity, _)| !self.is_prefab(*entity))
            .map(|(entity, (mesh, materials, pipeline, _))| Drawable {
                world: world_transform(&self.registry, entity),
                model: mesh.model.clone(),
                materials: materials.clone(),
                pipeline: pipeline.pipeline(),
            })
            .collect()
    }

    fn post_settings(&self) -> PostSettings {
        let mut post = PostSettings::default();
        for (entity, (tonemap,)) in self.registry.query::<(TonemapComponent,)>() {
            if !self.is_prefab(entity) {
                post.tonemap = Some(tonemap.settings.clone());
                post.lut = tonemap.lut.clone();
            }
        }
        for (entity, (bloom,)) in self.registry.query::<(BloomComponent,)>() {
            if !self.is_prefab(entity) {
                post.bloom = Some(bloom.settings.clone());
            }
        }
        for (entity, (gtao,)) in self.registry.query::<(GtaoComponent,)>() {
            if !self.is_prefab(entity) {
                post.gtao = Some(gtao.settings.clone());
            }
        }
        for (entity, (ssr,)) in self.registry.query::<(SsrComponent,)>() {
            if !self.is_prefab(entity) {
                post.ssr = Some(ssr.settings.clone());
            }
        }
        post
    }

    /// Creates the effects whose component appeared and drops those whose
    /// component went away.
    fn ensure_effects(
        &mut self,
        renderer: &mut Renderer,
        shaders: &mut dyn ShaderProvider,
        events: &umbra_core::events::EventBus,
        post: &PostSettings,
    ) -> Result<(), GraphicsError> {
        match (post.gtao.is_some(), self.gtao.is_some()) {
            (true, false) => self.gtao = Some(Gtao::new(renderer, shaders, events)?),
            (false, true) => self.gtao = None,
            _ => {}
        }
        match (post.ssr.is_some(), self.ssr.is_some()) {
            (true, false) => self.ssr = Some(Ssr::new(renderer, shaders, events)?),
            (false, true) => self.ssr = None,
            _ => {}
        }
        match (post.bloom.is_some(), self.bloom.is_some()) {
            (true, false) => self.bloom = Some(Bloom::new(renderer, shaders, events)?),
            (false, true) => self.bloom = None,
            _ => {}
        }
        Ok(())
    }

    fn active_sky(&self) -> Option<SkyComponent> {
        self.registry
            .query::<(SkyComponent,)>()
            .filter(|(entity, _)| !self.is_prefab(*entity))
            .map(|(_, (sky,))| sky.clone())
            .last()
    }

    /// Recaptures the environment when the sky source or resolution changed.
    fn update_environment(&mut self, renderer: &mut Renderer) -> Result<(), GraphicsError> {
        let Some(sky) = self.active_sky() else {
            if self.environment.take().is_some() {
                log::debug!("Scene '{}': environment released", self.name);
            }
            self.environment_key = None;
            return Ok(());
        };
        let resolution = match sky.resolution {
            0 => self.environment_resolution,
            resolution => resolution,
        };
        let (key, source) = match &sky.source {
            SkySource::Procedural(procedural) => (
                EnvironmentKey::Procedural(procedural.clone(), resolution),
                EnvironmentSource::Procedural(procedural.uniform()),
            ),
            SkySource::Hdri(texture) => {
                if !texture.is_loaded() {
                    return Ok(());
                }
                let Some(handle) = texture.read().texture().map(Texture::handle) else {
                    return Ok(());
                };
                (
                    EnvironmentKey::Hdri {
                        id: texture.id(),
                        version: texture.version(),
                        resolution,
                    },
                    EnvironmentSource::Equirect(handle),
                )
            }
        };
        if self.environment_key.as_ref() == Some(&key) {
            return Ok(());
        }
        self.pbr
            .update_environment(renderer, &mut self.environment, source, resolution)?;
        log::debug!("Scene '{}': environment captured at {resolution}", self.name);
        self.environment_key = Some(key);
        Ok(())
    }

    fn allocate_shadow_maps(&mut self, renderer: &mut Renderer, shaders: &mut dyn ShaderProvider) {
        let resolution = self.shadow_resolution.max(1);
        for entity in self.registry.query_entities::<(LightComponent,)>() {
            let Some(light) = self.registry.get_mut::<LightComponent>(entity) else {
                continue;
            };
            match (light.shadow_map, light.shadow().map(ShadowMap::resolution)) {
                (true, Some(current)) if current == resolution => {}
                (true, _) => match ShadowMap::new(renderer, shaders, resolution) {
                    Ok(map) => light.set_shadow(Some(map)),
                    Err(err) => log::warn!("Scene '{}': no shadow map for {entity}: {err}", self.name),
                },
                (false, Some(_)) => light.set_shadow(None),
                (false, None) => {}
            }
        }
    }

    fn draw_shadows(&self, renderer: &mut Renderer, drawables: &[Drawable]) -> Result<(), GraphicsError> {
        for (entity, (light, _)) in self.registry.query::<(LightComponent, TransformComponent)>() {
            if !light.shadow_map || self.is_prefab(entity) {
                continue;
            }
            let Some(shadow) = light.shadow() else {
                continue;
            };
            let world = world_transform(&self.registry, entity);

            renderer.begin();
            let matrices = renderer.matrices_mut();
            matrices.push_matrix();
            matrices.set_view(LightComponent::view_matrix(&world));
            matrices.set_projection(light.projection_matrix());
            let result = draw_depth(renderer, shadow, drawables);
            renderer.matrices_mut().pop_matrix();
            renderer.end();
            result?;
        }
        Ok(())
    }

    /// Loads the camera of record into the matrices stack.
    fn setup_camera(&self, renderer: &mut Renderer) -> Option<Camera> {
        let active = self
            .registry
            .query::<(CameraComponent, TransformComponent)>()
            .filter(|(entity, (camera, _))| camera.active && !self.is_prefab(*entity))
            .map(|(entity, (camera, _))| (entity, camera.camera))
            .last();
        let Some((entity, camera)) = active else {
            log::trace!("Scene '{}': no active camera", self.name);
            return None;
        };

        let world = world_transform(&self.registry, entity);
        let (width, height) = self.deferred.size().unwrap_or_else(|| renderer.surface_size());
        let aspect = width as f32 / height.max(1) as f32;
        let matrices = renderer.matrices_mut();
        matrices.set_view(camera.view(&world));
        matrices.set_projection(camera.projection(aspect));
        Some(camera)
    }

    /// Fills and uploads the lights and shadows uniforms.
    ///
    /// Returns the depth textures of the shadow-casting lights kept, in
    /// shadow index order.
    fn upload_lights(&mut self, renderer: &mut Renderer) -> Result<Vec<TextureHandle>, GraphicsError> {
        let mut lights = LightsUniform::new();
        let mut shadows = ShadowsUniform::new();
        let mut shadow_maps = Vec::new();
        let mut dropped = (0, 0);

        for (entity, (light, _)) in self.registry.query::<(LightComponent, TransformComponent)>() {
            if self.is_prefab(entity) {
                continue;
            }
            if lights.len() >= MAX_LIGHTS {
                dropped.0 += 1;
                continue;
            }
            let world = world_transform(&self.registry, entity);
            let depth = light
                .shadow()
                .filter(|_| light.shadow_map)
                .and_then(|map| map.target().depth_texture())
                .map(Texture::handle);
            let shadow_index = match depth {
                Some(depth) => match shadows.push(GpuShadow::new(light.light_space(&world), light.bias)) {
                    Some(index) => {
                        shadow_maps.push(depth);
                        Some(index)
                    }
                    None => {
                        dropped.1 += 1;
                        None
                    }
                },
                None => None,
            };
            lights.push(light.gpu(&world, shadow_index));
        }

        if dropped != self.truncated && dropped != (0, 0) {
            log::warn!(
                "Scene '{}': {} lights and {} shadow maps over capacity were skipped",
                self.name,
                dropped.0,
                dropped.1
            );
        }
        self.truncated = dropped;

        renderer.write_uniform(&self.lights_buffer, &lights)?;
        renderer.write_uniform(&self.shadows_buffer, &shadows)?;
        self.lights = lights;
        self.shadows = shadows;
        Ok(shadow_maps)
    }

    /// Fills the G-buffer, one pass per sub-mesh.
    fn draw_geometry(&self, renderer: &mut Renderer, drawables: &[Drawable]) -> Result<(), GraphicsError> {
        let Some(gbuffer) = self.deferred.primary_render_target() else {
            return Ok(());
        };
        renderer.begin();
        let mut drawn = 0;
        let mut result = Ok(());
        for item in drawables {
            let Some(pipeline) = item.pipeline else {
                continue;
            };
            match renderer.with_model(item.world, |renderer| draw_gbuffer(renderer, gbuffer, pipeline, item)) {
                Ok(passes) => drawn += passes,
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        if result.is_ok() && drawn == 0 {
            result = self.deferred.clear(renderer);
        }
        renderer.end();
        result
    }

    /// Sky first, then the lighting resolve over it.
    fn resolve(&mut self, renderer: &mut Renderer, shadow_maps: &[TextureHandle]) -> Result<(), GraphicsError> {
        let sky = self.active_sky();
        renderer.begin();

        let drew_sky = match sky.as_ref().map(|sky| &sky.source) {
            Some(SkySource::Procedural(procedural)) => {
                self.sky.draw_procedural(renderer, procedural, &self.frame)?;
                true
            }
            Some(SkySource::Hdri(_)) => match &self.environment {
                Some(environment) => {
                    self.sky
                        .draw_skybox(renderer, environment.cubemap().handle(), &self.frame)?;
                    true
                }
                None => false,
            },
            None => false,
        };
        if !drew_sky {
            renderer.render_pass(&self.frame, None, &[], |_| {}, |_| {})?;
        }

        let mut resources = vec![
            Binding::buffer(lighting_slots::LIGHTS, self.lights_buffer.handle()),
            Binding::buffer(lighting_slots::SHADOWS, self.shadows_buffer.handle()),
        ];
        for (index, depth) in shadow_maps.iter().enumerate() {
            resources.push(Binding::texture(lighting_slots::SHADOW_MAPS + index as u32, *depth));
        }
        let ibl = sky.as_ref().is_some_and(|sky| sky.ibl);
        if let (true, Some(environment)) = (ibl, self.environment.as_ref()) {
            resources.push(Binding::texture(lighting_slots::IRRADIANCE, environment.irradiance().handle()));
            resources.push(Binding::texture(lighting_slots::PREFILTER, environment.prefilter().handle()));
            resources.push(Binding::texture(lighting_slots::BRDF_LUT, self.pbr.brdf_lut().handle()));
        }
        if let Some(ao) = self.gtao.as_ref().and_then(Gtao::output) {
            resources.push(Binding::texture(lighting_slots::AO, ao));
        }

        self.deferred.draw(renderer, &resources, |_| {}, Some(&self.frame))?;
        renderer.end();
        Ok(())
    }

    fn post_process(
        &mut self,
        renderer: &mut Renderer,
        camera: Option<Camera>,
        post: &PostSettings,
        target: Option<&RenderTarget>,
    ) -> Result<(), GraphicsError> {
        let (Some(frame), Some(albedo), Some(combined)) = (
            self.frame.color_texture(0).map(Texture::handle),
            self.deferred.albedo(),
            self.deferred.combined(),
        ) else {
            return Ok(());
        };

        if let (Some(gtao), Some(settings), Some(depth)) = (self.gtao.as_mut(), &post.gtao, self.deferred.depth()) {
            let planes = camera.map_or((0.1, 1000.0), |camera| (camera.near, camera.far));
            renderer.begin();
            gtao.apply(renderer, settings, planes, depth)?;
            renderer.end();
        }

        let mut reflections = None;
        if let (Some(ssr), Some(settings)) = (self.ssr.as_mut(), &post.ssr) {
            if let (Some(position), Some(normal), Some(depth)) =
                (self.deferred.position(), self.deferred.normal(), self.deferred.depth())
            {
                let inputs = SsrInputs {
                    frame,
                    position,
                    normal,
                    combined,
                    depth,
                };
                renderer.begin();
                reflections = ssr.apply(renderer, settings, &inputs)?;
                renderer.end();
            }
        }

        let mut bloom = None;
        let mut bloom_strength = 0.0;
        if let (Some(effect), Some(settings)) = (self.bloom.as_mut(), &post.bloom) {
            renderer.begin();
            bloom = effect.apply(renderer, settings, frame)?;
            renderer.end();
            bloom_strength = settings.strength;
        }

        let lut = post
            .lut
            .as_ref()
            .and_then(|lut| lut.read().texture().map(Texture::handle));
        let inputs = TonemapInputs {
            frame,
            bloom,
            bloom_strength,
            ssr: reflections,
            albedo,
            combined,
            lut,
        };
        let settings = post.tonemap.clone().unwrap_or_default();
        let time = self.time;
        let tonemap = &mut self.tonemap;

        renderer.begin();
        match target {
            Some(target) => {
                tonemap.apply(renderer, &settings, time, &inputs, target)?;
            }
            None => {
                renderer.with_surface(|renderer, surface| tonemap.apply(renderer, &settings, time, &inputs, surface))??;
            }
        }
        renderer.end();
        Ok(())
    }
}

fn frame_config(width: u32, height: u32) -> RenderTargetConfig {
    RenderTargetConfig::new(width, height)
        .with_color(TextureFormat::Rgba16Float)
        .with_label("scene/frame")
}

/// Renders every drawable into a shadow map with the current matrices.
/// The first pass clears the map even when nothing casts.
/// One G-buffer pass per sub-mesh of `item`. Returns the passes issued.
fn draw_gbuffer(
    renderer: &mut Renderer,
    gbuffer: &RenderTarget,
    pipeline: PipelineHandle,
    item: &Drawable,
) -> Result<usize, GraphicsError> {
    let model = item.model.read();
    for (index, mesh) in model.meshes().iter().enumerate() {
        let bindings = {
            let fallbacks = renderer.fallbacks()?;
            match item.materials.material_for(index) {
                Some(material) => material.read().bindings(fallbacks),
                None => crate::assets::Material::default().bindings(fallbacks),
            }
        };
        renderer.render_pass(
            gbuffer,
            Some(pipeline),
            &bindings,
            |setup| mesh.setup_buffers(setup),
            |pass| mesh.draw(pass),
        )?;
    }
    Ok(model.meshes().len())
}

fn draw_depth(renderer: &mut Renderer, shadow: &ShadowMap, drawables: &[Drawable]) -> Result<(), GraphicsError> {
    renderer.render_pass(shadow.target(), None, &[], |_| {}, |_| {})?;
    for item in drawables {
        let model = item.model.read();
        renderer.matrices_mut().set_model(item.world);
        for mesh in model.meshes() {
            renderer.render_pass(
                shadow.target(),
                shadow.pipeline(),
                &[],
                |setup| mesh.setup_buffers(setup),
                |pass| mesh.draw(pass),
            )?;
        }
    }
    Ok(())
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.name)
            .field("entities", &self.registry.len())
            .field("running", &self.running)
            .field("update_physics", &self.update_physics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use glam::Vec3;

    use super::*;
    use crate::assets::{MemorySource, CUBE};
    use crate::config::EngineConfig;
    use crate::physics::BodySettings;
    use crate::scripting::{NativeScript, NativeScriptEngine, ScriptGlobals};

    const COUNTER: &str = "scripts/counter.as";

    #[derive(Default)]
    struct Calls {
        starts: AtomicUsize,
        updates: AtomicUsize,
    }

    struct Counter(Arc<Calls>);

    impl NativeScript for Counter {
        fn start(&mut self, _: &mut ScriptContext<'_>, globals: &mut ScriptGlobals) -> Result<(), String> {
            globals.entity().ok_or("self is unbound")?;
            self.0.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn update(&mut self, _: &mut ScriptContext<'_>, _: &mut ScriptGlobals, _: f32) -> Result<(), String> {
            self.0.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.window.width = 32;
        config.window.height = 32;
        config.renderer.shadow_map_resolution = 16;
        config.renderer.environment_resolution = 8;
        config
    }

    fn engine() -> Engine {
        Engine::headless(&config(), Arc::new(MemorySource::new()))
    }

    fn engine_with_counter() -> (Engine, Arc<Calls>) {
        let mut engine = engine();
        let calls = Arc::new(Calls::default());
        let mut scripts = NativeScriptEngine::new();
        let shared = Arc::clone(&calls);
        scripts.register(COUNTER, move |_| Box::new(Counter(Arc::clone(&shared))));
        engine.set_script_engine(Box::new(scripts));
        (engine, calls)
    }

    #[test]
    fn spawned_entities_are_found_by_name() {
        let mut engine = engine();
        let mut scene = Scene::new(&mut engine, "main").unwrap();
        let player = scene.spawn("player");
        scene.spawn("camera");
        assert_eq!(scene.find("player"), Some(player));
        assert_eq!(scene.find("nobody"), None);
        assert!(scene.registry().has::<TransformComponent>(player));
    }

    #[test]
    fn empty_scene_draws_into_a_target() {
        let mut engine = engine();
        let mut scene = Scene::new(&mut engine, "empty").unwrap();
        let target = engine
            .renderer_mut()
            .create_render_target(&RenderTargetConfig::new(32, 32).with_color(TextureFormat::Rgba8Unorm))
            .unwrap();
        scene.draw(&mut engine, Some(&target)).unwrap();
        engine.renderer_mut().submit().unwrap();
        assert!(scene.lights().is_empty());
    }

    #[test]
    fn mesh_entity_draws_into_the_surface() {
        let mut engine = engine();
        let mut scene = Scene::new(&mut engine, "cube").unwrap();
        let cube = scene.spawn("cube");
        scene.add_mesh(&mut engine, cube, CUBE, &[]).unwrap();
        let camera = scene.spawn_with("camera", TransformComponent::from_position(Vec3::new(0.0, 0.0, 5.0)));
        scene.insert(camera, CameraComponent::new(Camera::default())).unwrap();
        engine.update();

        scene.draw(&mut engine, None).unwrap();
        engine.renderer_mut().submit().unwrap();
        assert!(engine.renderer().last_frame_stats().passes > 0);
        assert_eq!(engine.renderer().matrices().depth(), 1);
    }

    #[test]
    fn lights_over_capacity_are_skipped() {
        let mut engine = engine();
        let mut scene = Scene::new(&mut engine, "lights").unwrap();
        for i in 0..10 {
            let light = scene.spawn(&format!("sun{i}"));
            scene
                .insert(light, LightComponent::directional(Vec3::ONE, 1.0).with_shadow_map(true))
                .unwrap();
        }
        for i in 0..190 {
            let light = scene.spawn(&format!("lamp{i}"));
            scene.insert(light, LightComponent::point(Vec3::ONE, 1.0, 5.0)).unwrap();
        }

        scene.draw(&mut engine, None).unwrap();
        engine.renderer_mut().submit().unwrap();
        assert_eq!(scene.lights().len(), MAX_LIGHTS);
        assert_eq!(scene.shadows().len(), umbra_graphics::uniforms::MAX_SHADOWS);
    }

    #[test]
    fn scripts_start_once_and_update_while_running() {
        let (mut engine, calls) = engine_with_counter();
        let mut scene = Scene::new(&mut engine, "scripts").unwrap();
        let entity = scene.spawn("actor");
        scene.add_script(&mut engine, entity, COUNTER).unwrap();

        scene.update(&mut engine, 0.1).unwrap();
        assert_eq!(calls.starts.load(Ordering::SeqCst), 0);

        scene.start(&mut engine);
        scene.update(&mut engine, 0.1).unwrap();
        scene.update(&mut engine, 0.1).unwrap();
        assert_eq!(calls.starts.load(Ordering::SeqCst), 1);
        assert_eq!(calls.updates.load(Ordering::SeqCst), 2);

        scene.set_running(false);
        scene.update(&mut engine, 0.1).unwrap();
        assert_eq!(calls.updates.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clone_in_running_scene_defers_start_through_jobs() {
        let (mut engine, calls) = engine_with_counter();
        let mut scene = Scene::new(&mut engine, "clones").unwrap();
        let entity = scene.spawn("actor");
        scene.add_script(&mut engine, entity, COUNTER).unwrap();
        scene.start(&mut engine);

        let copy = scene.clone_entity(&mut engine, entity).unwrap();
        let module = |e| scene.registry().get::<ScriptComponent>(e).unwrap().module;
        assert_ne!(module(entity), module(copy));
        assert_eq!(calls.starts.load(Ordering::SeqCst), 1);

        scene.update(&mut engine, 0.0).unwrap();
        assert_eq!(calls.starts.load(Ordering::SeqCst), 1);

        assert_eq!(engine.update(), 1);
        scene.update(&mut engine, 0.0).unwrap();
        assert_eq!(calls.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn prefabs_are_neither_started_nor_updated() {
        let (mut engine, calls) = engine_with_counter();
        let mut scene = Scene::new(&mut engine, "prefabs").unwrap();
        let entity = scene.spawn("template");
        scene.add_script(&mut engine, entity, COUNTER).unwrap();
        scene.insert(entity, PrefabComponent).unwrap();

        scene.start(&mut engine);
        scene.update(&mut engine, 0.1).unwrap();
        assert_eq!(calls.starts.load(Ordering::SeqCst), 0);
        assert_eq!(calls.updates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn physics_moves_bodies_and_despawn_removes_them() {
        let mut engine = engine();
        let mut scene = Scene::new(&mut engine, "physics").unwrap();
        let ball = scene.spawn_with("ball", TransformComponent::from_position(Vec3::new(0.0, 10.0, 0.0)));
        scene.insert(ball, RigidBodyComponent::new(BodySettings::ball(0.5))).unwrap();
        let pinned = scene.spawn_with("pinned", TransformComponent::from_position(Vec3::new(5.0, 10.0, 0.0)));
        scene
            .insert(pinned, RigidBodyComponent::new(BodySettings::ball(0.5)).with_override(true))
            .unwrap();

        scene.start(&mut engine);
        for _ in 0..5 {
            scene.update(&mut engine, 0.1).unwrap();
        }
        assert!(scene.registry().get::<TransformComponent>(ball).unwrap().position.y < 10.0);
        assert_eq!(scene.registry().get::<TransformComponent>(pinned).unwrap().position.y, 10.0);
        assert_eq!(engine.physics_mut().body_count(), 2);

        scene.despawn(&mut engine, ball);
        assert_eq!(engine.physics_mut().body_count(), 1);
        assert!(!scene.registry().is_alive(ball));
    }

    #[test]
    fn physics_is_skipped_when_disabled() {
        let mut engine = engine();
        let mut scene = Scene::new(&mut engine, "still").unwrap();
        let ball = scene.spawn_with("ball", TransformComponent::from_position(Vec3::new(0.0, 10.0, 0.0)));
        scene.insert(ball, RigidBodyComponent::new(BodySettings::ball(0.5))).unwrap();
        scene.set_update_physics(false);
        scene.start(&mut engine);
        scene.update(&mut engine, 0.1).unwrap();
        assert_eq!(engine.physics_mut().body_count(), 0);
    }
}
