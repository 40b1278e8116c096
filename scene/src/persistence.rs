//! Scene snapshots on disk.
//!
//! A [`SceneSnapshot`] holds the serializable components of every live
//! entity. Asset-backed components are stored by path and reloaded through
//! the engine; runtime state (physics bodies, shadow maps, started scripts)
//! is never written. Entity references are indices into the snapshot's
//! entity list.
//!
//! The file extension picks the encoding: `.json` is written with
//! `serde_json`, anything else with `bincode`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use umbra_ecs::hierarchy::{children_of, parent_of};
use umbra_ecs::{Entity, HierarchyComponent, NameComponent, TransformComponent};
use umbra_graphics::{BloomSettings, GtaoSettings, ProceduralSky, SsrSettings, TonemapSettings};

use crate::assets::{Script, TextureAsset};
use crate::components::{
    BloomComponent, CameraComponent, GtaoComponent, LightComponent, MeshComponent, MeshRendererComponent,
    PipelineComponent, PrefabComponent, RigidBodyComponent, ScriptComponent, SkyComponent, SkySource,
    SsrComponent, TonemapComponent,
};
use crate::engine::Engine;
use crate::error::{SceneError, SceneIoError};
use crate::scene::Scene;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneFormat {
    Json,
    Binary,
}

impl SceneFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Binary,
        }
    }

    pub fn encode(self, snapshot: &SceneSnapshot) -> Result<Vec<u8>, SceneIoError> {
        Ok(match self {
            Self::Json => serde_json::to_vec_pretty(snapshot)?,
            Self::Binary => bincode::serialize(snapshot)?,
        })
    }

    pub fn decode(self, bytes: &[u8]) -> Result<SceneSnapshot, SceneIoError> {
        Ok(match self {
            Self::Json => serde_json::from_slice(bytes)?,
            Self::Binary => bincode::deserialize(bytes)?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub name: String,
    pub entities: Vec<EntitySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSnapshot {
    pub path: String,
    pub module: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub vertex: String,
    pub fragment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TonemapSnapshot {
    pub settings: TonemapSettings,
    pub lut: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkySourceSnapshot {
    Procedural(ProceduralSky),
    Hdri(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkySnapshot {
    pub source: SkySourceSnapshot,
    pub ibl: bool,
    pub resolution: u32,
}

/// Everything persisted for one entity. Absent components are `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub name: Option<String>,
    pub transform: Option<TransformComponent>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub camera: Option<CameraComponent>,
    pub light: Option<LightComponent>,
    pub mesh: Option<String>,
    pub materials: Option<Vec<String>>,
    pub pipeline: Option<PipelineSnapshot>,
    pub rigid_body: Option<RigidBodyComponent>,
    pub script: Option<ScriptSnapshot>,
    pub tonemap: Option<TonemapSnapshot>,
    pub bloom: Option<BloomSettings>,
    pub gtao: Option<GtaoSettings>,
    pub ssr: Option<SsrSettings>,
    pub sky: Option<SkySnapshot>,
    pub prefab: bool,
}

impl Scene {
    /// Captures every live entity.
    pub fn snapshot(&self) -> SceneSnapshot {
        let registry = self.registry();
        let entities: Vec<Entity> = registry.entities().collect();
        let index: HashMap<Entity, usize> = entities.iter().enumerate().map(|(i, e)| (*e, i)).collect();

        let entities = entities
            .iter()
            .map(|&entity| EntitySnapshot {
                name: registry.get::<NameComponent>(entity).map(|name| name.as_str().to_string()),
                transform: registry.get::<TransformComponent>(entity).copied(),
                parent: parent_of(registry, entity).and_then(|parent| index.get(&parent).copied()),
                children: children_of(registry, entity)
                    .iter()
                    .filter_map(|child| index.get(child).copied())
                    .collect(),
                camera: registry.get::<CameraComponent>(entity).copied(),
                light: registry.get::<LightComponent>(entity).cloned(),
                mesh: registry
                    .get::<MeshComponent>(entity)
                    .map(|mesh| mesh.model.path().to_string()),
                materials: registry.get::<MeshRendererComponent>(entity).map(|renderer| {
                    renderer
                        .materials
                        .iter()
                        .map(|material| material.path().to_string())
                        .collect()
                }),
                pipeline: registry.get::<PipelineComponent>(entity).map(|pipeline| PipelineSnapshot {
                    vertex: pipeline.vertex.path().to_string(),
                    fragment: pipeline.fragment.path().to_string(),
                }),
                rigid_body: registry.get::<RigidBodyComponent>(entity).cloned(),
                script: registry.get::<ScriptComponent>(entity).map(|script| ScriptSnapshot {
                    path: script.script.path().to_string(),
                    module: script.module,
                }),
                tonemap: registry.get::<TonemapComponent>(entity).map(|tonemap| TonemapSnapshot {
                    settings: tonemap.settings.clone(),
                    lut: tonemap.lut.as_ref().map(|lut| lut.path().to_string()),
                }),
                bloom: registry.get::<BloomComponent>(entity).map(|bloom| bloom.settings.clone()),
                gtao: registry.get::<GtaoComponent>(entity).map(|gtao| gtao.settings.clone()),
                ssr: registry.get::<SsrComponent>(entity).map(|ssr| ssr.settings.clone()),
                sky: registry.get::<SkyComponent>(entity).map(|sky| SkySnapshot {
                    source: match &sky.source {
                        SkySource::Procedural(procedural) => SkySourceSnapshot::Procedural(procedural.clone()),
                        SkySource::Hdri(texture) => SkySourceSnapshot::Hdri(texture.path().to_string()),
                    },
                    ibl: sky.ibl,
                    resolution: sky.resolution,
                }),
                prefab: registry.has::<PrefabComponent>(entity),
            })
            .collect();

        SceneSnapshot {
            name: self.name().to_string(),
            entities,
        }
    }

    /// Builds a stopped scene from `snapshot`, loading its assets through
    /// `engine`.
    pub fn from_snapshot(engine: &mut Engine, snapshot: SceneSnapshot) -> Result<Self, SceneError> {
        let count = snapshot.entities.len();
        for entity in &snapshot.entities {
            let references = entity.parent.iter().chain(entity.children.iter());
            if let Some(&dangling) = references.into_iter().find(|&&index| index >= count) {
                return Err(SceneIoError::DanglingReference(dangling).into());
            }
        }

        let mut scene = Scene::new(engine, snapshot.name)?;
        let entities: Vec<Entity> = (0..count).map(|_| scene.registry_mut().spawn()).collect();

        for (&entity, data) in entities.iter().zip(snapshot.entities) {
            if let Some(name) = data.name {
                scene.insert(entity, NameComponent::new(name.as_str()))?;
            }
            if let Some(transform) = data.transform {
                scene.insert(entity, transform)?;
            }
            if data.parent.is_some() || !data.children.is_empty() {
                let hierarchy = HierarchyComponent {
                    parent: data.parent.map(|index| entities[index]),
                    children: data.children.iter().map(|&index| entities[index]).collect(),
                };
                scene.insert(entity, hierarchy)?;
            }
            if let Some(camera) = data.camera {
                scene.insert(entity, camera)?;
            }
            if let Some(light) = data.light {
                scene.insert(entity, light)?;
            }
            if let Some(model) = data.mesh {
                scene.insert(entity, MeshComponent::load(engine, &model))?;
            }
            if let Some(materials) = data.materials {
                let paths: Vec<&str> = materials.iter().map(String::as_str).collect();
                scene.insert(entity, MeshRendererComponent::load(engine, &paths))?;
            }
            if let Some(pipeline) = data.pipeline {
                scene.insert(entity, PipelineComponent::load(engine, &pipeline.vertex, &pipeline.fragment))?;
            }
            if let Some(body) = data.rigid_body {
                scene.insert(entity, body)?;
            }
            if let Some(script) = data.script {
                let handle = engine.load::<Script>(&script.path);
                scene.reserve_module(&script.path, script.module);
                scene.insert(entity, ScriptComponent::new(handle, script.module))?;
            }
            if let Some(tonemap) = data.tonemap {
                let lut = tonemap.lut.map(|path| engine.load::<TextureAsset>(&path));
                scene.insert(
                    entity,
                    TonemapComponent {
                        settings: tonemap.settings,
                        lut,
                    },
                )?;
            }
            if let Some(settings) = data.bloom {
                scene.insert(entity, BloomComponent { settings })?;
            }
            if let Some(settings) = data.gtao {
                scene.insert(entity, GtaoComponent { settings })?;
            }
            if let Some(settings) = data.ssr {
                scene.insert(entity, SsrComponent { settings })?;
            }
            if let Some(sky) = data.sky {
                let source = match sky.source {
                    SkySourceSnapshot::Procedural(procedural) => SkySource::Procedural(procedural),
                    SkySourceSnapshot::Hdri(path) => SkySource::Hdri(engine.load::<TextureAsset>(&path)),
                };
                scene.insert(
                    entity,
                    SkyComponent {
                        source,
                        ibl: sky.ibl,
                        resolution: sky.resolution,
                    },
                )?;
            }
            if data.prefab {
                scene.insert(entity, PrefabComponent)?;
            }
        }

        log::info!("Scene '{}': restored {count} entities", scene.name());
        Ok(scene)
    }

    /// Writes the scene to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        let path = path.as_ref();
        let bytes = SceneFormat::from_path(path).encode(&self.snapshot())?;
        std::fs::write(path, &bytes).map_err(|source| io_error(path, source))?;
        log::info!("Scene '{}': saved to {} ({} bytes)", self.name(), path.display(), bytes.len());
        Ok(())
    }

    /// Reads a scene written by [`save`](Self::save).
    pub fn load(engine: &mut Engine, path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| io_error(path, source))?;
        let snapshot = SceneFormat::from_path(path).decode(&bytes)?;
        Self::from_snapshot(engine, snapshot)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> SceneIoError {
    SceneIoError::Io {
        path: PathBuf::from(path),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec3;
    use rstest::rstest;
    use umbra_ecs::hierarchy;

    use super::*;
    use crate::assets::{MemorySource, CUBE};
    use crate::components::Camera;
    use crate::config::EngineConfig;
    use crate::physics::BodySettings;

    fn engine() -> Engine {
        let mut config = EngineConfig::default();
        config.window.width = 16;
        config.window.height = 16;
        Engine::headless(&config, Arc::new(MemorySource::new()))
    }

    #[rstest]
    #[case("level.json", SceneFormat::Json)]
    #[case("level.JSON", SceneFormat::Json)]
    #[case("level.scene", SceneFormat::Binary)]
    #[case("level", SceneFormat::Binary)]
    fn format_follows_extension(#[case] path: &str, #[case] format: SceneFormat) {
        assert_eq!(SceneFormat::from_path(Path::new(path)), format);
    }

    #[rstest]
    #[case("level.json")]
    #[case("level.scene")]
    fn save_and_load_keep_components_and_hierarchy(#[case] file: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(file);
        let mut engine = engine();

        let mut scene = Scene::new(&mut engine, "level").unwrap();
        let root = scene.spawn_with("root", TransformComponent::from_position(Vec3::new(1.0, 2.0, 3.0)));
        let child = scene.spawn("child");
        scene.reparent_entity(child, root).unwrap();
        scene.add_mesh(&mut engine, child, CUBE, &[]).unwrap();
        scene
            .insert(child, LightComponent::spot(Vec3::X, 2.0, 10.0, 20.0).with_shadow_map(true))
            .unwrap();
        scene.insert(root, CameraComponent::new(Camera::default())).unwrap();
        scene
            .insert(root, RigidBodyComponent::new(BodySettings::ball(0.25)).with_override(true))
            .unwrap();
        scene.insert(root, BloomComponent::default()).unwrap();
        scene.insert(child, PrefabComponent).unwrap();
        scene.save(&path).unwrap();

        let loaded = Scene::load(&mut engine, &path).unwrap();
        assert_eq!(loaded.name(), "level");
        let registry = loaded.registry();
        let root = loaded.find("root").unwrap();
        let child = loaded.find("child").unwrap();

        assert_eq!(hierarchy::parent_of(registry, child), Some(root));
        assert_eq!(hierarchy::children_of(registry, root), &[child]);
        assert_eq!(
            registry.get::<TransformComponent>(root).unwrap().position,
            Vec3::new(1.0, 2.0, 3.0)
        );
        assert!(registry.get::<CameraComponent>(root).unwrap().active);
        assert!(registry.get::<RigidBodyComponent>(root).unwrap().override_physics);
        assert!(registry.has::<BloomComponent>(root));
        assert_eq!(registry.get::<MeshComponent>(child).unwrap().model.path(), CUBE);
        assert!(registry.has::<PipelineComponent>(child));
        assert!(registry.has::<PrefabComponent>(child));

        let light = registry.get::<LightComponent>(child).unwrap();
        assert!(light.shadow_map);
        assert!(light.shadow().is_none());
    }

    #[test]
    fn script_modules_are_reserved_on_load() {
        let mut engine = engine();
        let mut scene = Scene::new(&mut engine, "scripts").unwrap();
        let actor = scene.spawn("actor");
        scene.add_script(&mut engine, actor, "scripts/a.as").unwrap();
        let twin = scene.spawn("twin");
        scene.add_script(&mut engine, twin, "scripts/a.as").unwrap();

        let mut loaded = Scene::from_snapshot(&mut engine, scene.snapshot()).unwrap();
        let fresh = loaded.spawn("fresh");
        loaded.add_script(&mut engine, fresh, "scripts/a.as").unwrap();
        assert_eq!(loaded.registry().get::<ScriptComponent>(fresh).unwrap().module, 2);
    }

    #[test]
    fn dangling_references_are_rejected() {
        let mut engine = engine();
        let snapshot = SceneSnapshot {
            name: "broken".into(),
            entities: vec![EntitySnapshot {
                parent: Some(3),
                ..EntitySnapshot::default()
            }],
        };
        let err = Scene::from_snapshot(&mut engine, snapshot).unwrap_err();
        assert!(matches!(err, SceneError::Io(SceneIoError::DanglingReference(3))));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let mut engine = engine();
        let err = Scene::load(&mut engine, "/nonexistent/level.json").unwrap_err();
        assert!(matches!(err, SceneError::Io(SceneIoError::Io { ref path, .. }) if path.ends_with("level.json")));
    }
}
