//! Scene components.
//!
//! Components are data: they hold settings, asset handles and at most a few
//! GPU handles. Behaviour lives in [`Scene`](crate::Scene), which walks the
//! registry every frame. Components owning GPU state or a physics body
//! ([`LightComponent`], [`RigidBodyComponent`], [`ScriptComponent`]) drop
//! that state when cloned; the scene recreates it on demand.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use umbra_core::asset::{AssetId, Handle};
use umbra_core::math::{look_at, perspective, FORWARD, WORLD_UP};
use umbra_ecs::{Component, Registry};
use umbra_graphics::shaders::{self, ShaderProvider};
use umbra_graphics::uniforms::{GpuLight, GpuLightKind};
use umbra_graphics::{
    BloomSettings, GraphicsError, GtaoSettings, PipelineHandle, PipelineOptions, ProceduralSky, RenderTarget,
    RenderTargetConfig, Renderer, Shader, SsrSettings, TextureFormat, TonemapSettings,
};

use crate::assets::{Material, Model, Script, TextureAsset};
use crate::engine::Engine;
use crate::physics::{BodyId, BodySettings};

/// Registers every scene component with `registry`.
pub fn register_components(registry: &mut Registry) {
    registry.register_cloneable::<MeshComponent>();
    registry.register_cloneable::<MeshRendererComponent>();
    registry.register_cloneable::<PipelineComponent>();
    registry.register_cloneable::<CameraComponent>();
    registry.register_cloneable::<LightComponent>();
    registry.register_cloneable::<RigidBodyComponent>();
    registry.register_cloneable::<ScriptComponent>();
    registry.register_cloneable::<TonemapComponent>();
    registry.register_cloneable::<BloomComponent>();
    registry.register_cloneable::<GtaoComponent>();
    registry.register_cloneable::<SsrComponent>();
    registry.register_cloneable::<SkyComponent>();
    registry.register_cloneable::<PrefabComponent>();
}

// ---- Geometry ----

/// The model drawn for an entity.
#[derive(Debug, Clone)]
pub struct MeshComponent {
    pub model: Handle<Model>,
}

impl Component for MeshComponent {
    const NAME: &'static str = "Mesh";
}

impl MeshComponent {
    pub fn load(engine: &mut Engine, path: &str) -> Self {
        Self {
            model: engine.load(path),
        }
    }
}

/// Materials of the sub-meshes, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct MeshRendererComponent {
    pub materials: Vec<Handle<Material>>,
}

impl Component for MeshRendererComponent {
    const NAME: &'static str = "MeshRenderer";
}

impl MeshRendererComponent {
    pub fn load(engine: &mut Engine, paths: &[&str]) -> Self {
        Self {
            materials: paths.iter().map(|path| engine.load(path)).collect(),
        }
    }

    /// Material of sub-mesh `index`; the last material covers any
    /// sub-meshes past the end of the list.
    pub fn material_for(&self, index: usize) -> Option<&Handle<Material>> {
        self.materials.get(index).or_else(|| self.materials.last())
    }
}

/// A vertex and fragment shader pair and the pipeline built from them.
///
/// The pipeline is rebuilt when either shader reloads.
#[derive(Debug, Clone)]
pub struct PipelineComponent {
    pub vertex: Handle<Shader>,
    pub fragment: Handle<Shader>,
    pub options: PipelineOptions,
    pipeline: Option<PipelineHandle>,
}

impl Component for PipelineComponent {
    const NAME: &'static str = "Pipeline";
}

impl PipelineComponent {
    pub fn new(renderer: &mut Renderer, vertex: Handle<Shader>, fragment: Handle<Shader>) -> Self {
        let mut component = Self {
            vertex,
            fragment,
            options: PipelineOptions::default(),
            pipeline: None,
        };
        component.build(renderer);
        component
    }

    pub fn load(engine: &mut Engine, vertex: &str, fragment: &str) -> Self {
        let vertex = engine.load::<Shader>(vertex);
        let fragment = engine.load::<Shader>(fragment);
        Self::new(engine.renderer_mut(), vertex, fragment)
    }

    /// The built-in geometry program.
    pub fn geometry(engine: &mut Engine) -> Self {
        Self::load(engine, shaders::GEOMETRY_VS.name, shaders::GEOMETRY_FS.name)
    }

    pub fn pipeline(&self) -> Option<PipelineHandle> {
        self.pipeline
    }

    pub fn uses_shader(&self, id: AssetId) -> bool {
        self.vertex.id() == id || self.fragment.id() == id
    }

    /// Requests the pipeline from the renderer's cache.
    pub fn build(&mut self, renderer: &mut Renderer) {
        let result = {
            let vertex = self.vertex.read();
            let fragment = self.fragment.read();
            renderer.create_pipeline_state_with(&vertex, &fragment, self.options)
        };
        self.pipeline = match result {
            Ok(pipeline) => Some(pipeline),
            Err(err) => {
                log::warn!(
                    "PipelineComponent: {} + {} unavailable: {err}",
                    self.vertex.path(),
                    self.fragment.path()
                );
                None
            }
        };
    }
}

// ---- Camera ----

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CameraMode {
    /// Looks along the entity's forward axis.
    FirstPerson,
    /// Looks at a fixed world-space point.
    LookAt { target: Vec3 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Camera {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub mode: CameraMode,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov: 60.0,
            near: 0.1,
            far: 1000.0,
            mode: CameraMode::FirstPerson,
        }
    }
}

impl Camera {
    pub fn projection(&self, aspect: f32) -> Mat4 {
        perspective(self.fov, aspect, self.near, self.far)
    }

    /// View matrix for a camera placed by `world`.
    pub fn view(&self, world: &Mat4) -> Mat4 {
        let (_, rotation, position) = world.to_scale_rotation_translation();
        match self.mode {
            CameraMode::FirstPerson => look_at(position, position + rotation * FORWARD, WORLD_UP),
            CameraMode::LookAt { target } => look_at(position, target, WORLD_UP),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraComponent {
    pub camera: Camera,
    /// The last active camera found while drawing is used.
    pub active: bool,
}

impl CameraComponent {
    /// An active camera.
    pub fn new(camera: Camera) -> Self {
        Self { camera, active: true }
    }
}

impl Component for CameraComponent {
    const NAME: &'static str = "Camera";
}

// ---- Lights ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LightKind {
    #[default]
    Directional,
    Point,
    Spot,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ShadowProjection {
    /// Box of `half_size` around the light axis, for directional lights.
    Orthographic { half_size: f32 },
    /// Frustum with a field of view in degrees, for spot lights.
    Perspective { fov: f32 },
}

/// Depth target and pipeline a shadow-casting light renders into.
#[derive(Debug)]
pub struct ShadowMap {
    target: RenderTarget,
    pipeline: Option<PipelineHandle>,
}

impl ShadowMap {
    pub fn new(renderer: &mut Renderer, shaders: &mut dyn ShaderProvider, resolution: u32) -> Result<Self, GraphicsError> {
        let resolution = resolution.max(1);
        let target = renderer.create_render_target(
            &RenderTargetConfig::new(resolution, resolution)
                .with_depth(TextureFormat::Depth32Float)
                .with_label("shadow_map"),
        )?;
        let vertex = shaders.shader(renderer, shaders::SHADOW_VS.name);
        let fragment = shaders.shader(renderer, shaders::SHADOW_FS.name);
        let pipeline = {
            let vertex = vertex.read();
            let fragment = fragment.read();
            renderer.create_pipeline_state_with(&vertex, &fragment, PipelineOptions::shadow())
        };
        let pipeline = pipeline
            .map_err(|err| log::warn!("ShadowMap: no shadow pipeline: {err}"))
            .ok();
        Ok(Self { target, pipeline })
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn pipeline(&self) -> Option<PipelineHandle> {
        self.pipeline
    }

    pub fn resolution(&self) -> u32 {
        self.target.width()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LightComponent {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    /// Reach of point and spot lights.
    pub range: f32,
    /// Spot cone angles in degrees.
    pub inner_cutoff: f32,
    pub outer_cutoff: f32,
    /// Renders a shadow map when set.
    pub shadow_map: bool,
    pub projection: ShadowProjection,
    pub near: f32,
    pub far: f32,
    pub bias: f32,
    #[serde(skip)]
    shadow: Option<ShadowMap>,
}

impl Component for LightComponent {
    const NAME: &'static str = "Light";
}

impl Default for LightComponent {
    fn default() -> Self {
        Self {
            kind: LightKind::Directional,
            color: Vec3::ONE,
            intensity: 1.0,
            range: 10.0,
            inner_cutoff: 12.5,
            outer_cutoff: 17.5,
            shadow_map: false,
            projection: ShadowProjection::Orthographic { half_size: 10.0 },
            near: 0.1,
            far: 50.0,
            bias: 0.005,
            shadow: None,
        }
    }
}

impl Clone for LightComponent {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            color: self.color,
            intensity: self.intensity,
            range: self.range,
            inner_cutoff: self.inner_cutoff,
            outer_cutoff: self.outer_cutoff,
            shadow_map: self.shadow_map,
            projection: self.projection,
            near: self.near,
            far: self.far,
            bias: self.bias,
            shadow: None,
        }
    }
}

impl LightComponent {
    pub fn directional(color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            intensity,
            ..Self::default()
        }
    }

    pub fn point(color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            kind: LightKind::Point,
            color,
            intensity,
            range,
            ..Self::default()
        }
    }

    pub fn spot(color: Vec3, intensity: f32, inner_cutoff: f32, outer_cutoff: f32) -> Self {
        Self {
            kind: LightKind::Spot,
            color,
            intensity,
            inner_cutoff,
            outer_cutoff,
            projection: ShadowProjection::Perspective {
                fov: outer_cutoff * 2.0,
            },
            ..Self::default()
        }
    }

    pub fn with_shadow_map(mut self, enabled: bool) -> Self {
        self.shadow_map = enabled;
        self
    }

    pub fn shadow(&self) -> Option<&ShadowMap> {
        self.shadow.as_ref()
    }

    pub fn set_shadow(&mut self, shadow: Option<ShadowMap>) {
        self.shadow = shadow;
    }

    /// Projection of the shadow camera.
    pub fn projection_matrix(&self) -> Mat4 {
        match self.projection {
            ShadowProjection::Orthographic { half_size } => {
                Mat4::orthographic_rh(-half_size, half_size, -half_size, half_size, self.near, self.far)
            }
            ShadowProjection::Perspective { fov } => perspective(fov, 1.0, self.near, self.far),
        }
    }

    /// View of the shadow camera for a light placed by `world`.
    pub fn view_matrix(world: &Mat4) -> Mat4 {
        let (_, rotation, position) = world.to_scale_rotation_translation();
        look_at(position, position + rotation * FORWARD, WORLD_UP)
    }

    pub fn light_space(&self, world: &Mat4) -> Mat4 {
        self.projection_matrix() * Self::view_matrix(world)
    }

    /// GPU layout of this light placed by `world`.
    pub fn gpu(&self, world: &Mat4, shadow_index: Option<usize>) -> GpuLight {
        let (_, rotation, position) = world.to_scale_rotation_translation();
        let direction = (rotation * FORWARD).normalize_or_zero();
        let kind = match self.kind {
            LightKind::Directional => GpuLightKind::Directional,
            LightKind::Point => GpuLightKind::Point,
            LightKind::Spot => GpuLightKind::Spot,
        };
        GpuLight {
            position: [position.x, position.y, position.z, kind as u32 as f32],
            direction: [direction.x, direction.y, direction.z, self.range],
            color: [self.color.x, self.color.y, self.color.z, self.intensity],
            cutoff: [
                self.inner_cutoff.to_radians().cos(),
                self.outer_cutoff.to_radians().cos(),
                shadow_index.map_or(-1.0, |index| index as f32),
                0.0,
            ],
        }
    }
}

// ---- Physics ----

/// A physics body mirrored onto the entity's transform.
///
/// With `override_physics` the transform drives the body; otherwise the
/// body drives the transform.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidBodyComponent {
    pub settings: BodySettings,
    pub override_physics: bool,
    #[serde(skip)]
    body: Option<BodyId>,
}

impl Component for RigidBodyComponent {
    const NAME: &'static str = "RigidBody";
}

impl Clone for RigidBodyComponent {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            override_physics: self.override_physics,
            body: None,
        }
    }
}

impl RigidBodyComponent {
    pub fn new(settings: BodySettings) -> Self {
        Self {
            settings,
            override_physics: false,
            body: None,
        }
    }

    pub fn with_override(mut self, override_physics: bool) -> Self {
        self.override_physics = override_physics;
        self
    }

    pub fn body(&self) -> Option<BodyId> {
        self.body
    }

    pub(crate) fn set_body(&mut self, body: Option<BodyId>) {
        self.body = body;
    }
}

// ---- Scripting ----

/// One module instance of a script.
#[derive(Debug)]
pub struct ScriptComponent {
    pub script: Handle<Script>,
    pub module: u32,
    started: bool,
}

impl Component for ScriptComponent {
    const NAME: &'static str = "Script";
}

impl Clone for ScriptComponent {
    fn clone(&self) -> Self {
        Self {
            script: self.script.clone(),
            module: self.module,
            started: false,
        }
    }
}

impl ScriptComponent {
    pub fn new(script: Handle<Script>, module: u32) -> Self {
        Self {
            script,
            module,
            started: false,
        }
    }

    /// True once `Start` has run for this instance.
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub(crate) fn set_started(&mut self, started: bool) {
        self.started = started;
    }
}

// ---- Post-processing and sky ----

#[derive(Debug, Clone, Default)]
pub struct TonemapComponent {
    pub settings: TonemapSettings,
    /// Color grading lookup texture.
    pub lut: Option<Handle<TextureAsset>>,
}

impl Component for TonemapComponent {
    const NAME: &'static str = "Tonemap";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomComponent {
    pub settings: BloomSettings,
}

impl Component for BloomComponent {
    const NAME: &'static str = "Bloom";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GtaoComponent {
    pub settings: GtaoSettings,
}

impl Component for GtaoComponent {
    const NAME: &'static str = "GTAO";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsrComponent {
    pub settings: SsrSettings,
}

impl Component for SsrComponent {
    const NAME: &'static str = "SSR";
}

#[derive(Debug, Clone)]
pub enum SkySource {
    Procedural(ProceduralSky),
    /// Equirectangular HDR image.
    Hdri(Handle<TextureAsset>),
}

#[derive(Debug, Clone)]
pub struct SkyComponent {
    pub source: SkySource,
    /// Captures the sky into IBL textures for the lighting resolve.
    pub ibl: bool,
    /// Cubemap edge length of the capture; 0 uses the engine default.
    pub resolution: u32,
}

impl Component for SkyComponent {
    const NAME: &'static str = "Sky";
}

impl SkyComponent {
    pub fn procedural(sky: ProceduralSky) -> Self {
        Self {
            source: SkySource::Procedural(sky),
            ibl: true,
            resolution: 0,
        }
    }

    pub fn hdri(texture: Handle<TextureAsset>) -> Self {
        Self {
            source: SkySource::Hdri(texture),
            ibl: true,
            resolution: 0,
        }
    }
}

/// Template entity: skipped by update and draw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefabComponent;

impl Component for PrefabComponent {
    const NAME: &'static str = "Prefab";
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_core::math::mat4_approx_eq;

    #[test]
    fn last_material_covers_extra_submeshes() {
        let first = Handle::loaded(umbra_core::AssetKind::Material, "a.mat", Material::default());
        let second = Handle::loaded(umbra_core::AssetKind::Material, "b.mat", Material::default());
        let renderer = MeshRendererComponent {
            materials: vec![first.clone(), second.clone()],
        };
        assert!(renderer.material_for(0).unwrap().ptr_eq(&first));
        assert!(renderer.material_for(1).unwrap().ptr_eq(&second));
        assert!(renderer.material_for(7).unwrap().ptr_eq(&second));
        assert!(MeshRendererComponent::default().material_for(0).is_none());
    }

    #[test]
    fn first_person_camera_looks_down_negative_z() {
        let camera = Camera::default();
        let world = Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0));
        let expected = look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, WORLD_UP);
        assert!(mat4_approx_eq(&camera.view(&world), &expected, 1e-5));
    }

    #[test]
    fn look_at_camera_ignores_rotation() {
        let camera = Camera {
            mode: CameraMode::LookAt { target: Vec3::ZERO },
            ..Camera::default()
        };
        let world = Mat4::from_rotation_translation(
            glam::Quat::from_rotation_y(1.0),
            Vec3::new(3.0, 0.0, 0.0),
        );
        let expected = look_at(Vec3::new(3.0, 0.0, 0.0), Vec3::ZERO, WORLD_UP);
        assert!(mat4_approx_eq(&camera.view(&world), &expected, 1e-5));
    }

    #[test]
    fn spot_light_cutoffs_are_cosines() {
        let light = LightComponent::spot(Vec3::ONE, 2.0, 60.0, 90.0);
        let gpu = light.gpu(&Mat4::IDENTITY, Some(2));
        assert_eq!(gpu.kind(), GpuLightKind::Spot as u32);
        assert!((gpu.cutoff[0] - 0.5).abs() < 1e-6);
        assert!(gpu.cutoff[1].abs() < 1e-6);
        assert_eq!(gpu.shadow_index(), Some(2));
        assert_eq!(&gpu.direction[..3], &[0.0, 0.0, -1.0]);
        assert_eq!(gpu.color[3], 2.0);
    }

    #[test]
    fn cloning_drops_runtime_state() {
        let mut body = RigidBodyComponent::new(BodySettings::default()).with_override(true);
        body.set_body(Some(BodyId(3)));
        let copy = body.clone();
        assert_eq!(copy.body(), None);
        assert!(copy.override_physics);

        let script = Handle::loaded(umbra_core::AssetKind::Script, "s.as", Script::default());
        let mut component = ScriptComponent::new(script, 4);
        component.set_started(true);
        let copy = component.clone();
        assert!(!copy.is_started());
        assert_eq!(copy.module, 4);
    }

    #[test]
    fn light_settings_survive_serialization_without_shadow_state() {
        let light = LightComponent::point(Vec3::new(1.0, 0.5, 0.25), 3.0, 7.0).with_shadow_map(true);
        let json = serde_json::to_string(&light).unwrap();
        let back: LightComponent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, LightKind::Point);
        assert_eq!(back.range, 7.0);
        assert!(back.shadow_map);
        assert!(back.shadow().is_none());
    }
}
