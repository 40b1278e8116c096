//! Script execution contract.
//!
//! The scene drives scripts through a [`ScriptEngine`]: every
//! [`ScriptComponent`](crate::components::ScriptComponent) is one module
//! instance `(script path, module index)`, so several entities can share a
//! source file while keeping separate globals. Before `Start` the scene
//! binds the reserved globals [`SELF_GLOBAL`] and [`SCENE_GLOBAL`] when the
//! script declares them.
//!
//! [`NativeScriptEngine`] runs Rust behaviours registered per script path.

use std::collections::HashMap;

use umbra_core::input::InputState;
use umbra_ecs::{Entity, Registry};

use crate::error::ScriptError;
use crate::physics::PhysicsEngine;

pub const START_SIGNATURE: &str = "void Start()";
pub const UPDATE_SIGNATURE: &str = "void Update(float)";

/// Global bound to the entity owning the script.
pub const SELF_GLOBAL: &str = "self";
/// Global bound to the owning scene.
pub const SCENE_GLOBAL: &str = "scene";

/// A value crossing the script boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScriptValue {
    #[default]
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Entity(Entity),
    /// Back-reference to a scene, by name.
    Scene(String),
}

impl ScriptValue {
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Self::Float(value) => Some(value as f32),
            Self::Int(value) => Some(value as f32),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<Entity> {
        match *self {
            Self::Entity(entity) => Some(entity),
            _ => None,
        }
    }
}

/// Arguments collected by a call's binder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptArgs(Vec<ScriptValue>);

impl ScriptArgs {
    pub fn push(&mut self, value: ScriptValue) -> &mut Self {
        self.0.push(value);
        self
    }

    pub fn get(&self, index: usize) -> Option<&ScriptValue> {
        self.0.get(index)
    }

    pub fn as_slice(&self) -> &[ScriptValue] {
        &self.0
    }
}

/// What a running script may touch.
pub struct ScriptContext<'a> {
    pub registry: &'a mut Registry,
    pub input: &'a InputState,
    pub physics: &'a mut dyn PhysicsEngine,
}

pub trait ScriptEngine: Send {
    fn name(&self) -> &'static str;

    /// Instantiates module `module` of `script` from `source`.
    ///
    /// Loading an already loaded module replaces it and resets its globals.
    fn load_module(&mut self, script: &str, source: &str, module: u32) -> Result<(), ScriptError>;

    /// Returns false if the module was not loaded.
    fn unload_module(&mut self, script: &str, module: u32) -> bool;

    fn is_loaded(&self, script: &str, module: u32) -> bool;

    /// Calls `signature` in a module. `binder` pushes the arguments.
    fn execute_function(
        &mut self,
        context: &mut ScriptContext<'_>,
        script: &str,
        signature: &str,
        binder: &dyn Fn(&mut ScriptArgs),
        module: u32,
    ) -> Result<ScriptValue, ScriptError>;

    /// Reads a declared global.
    fn global_variable(&self, script: &str, module: u32, name: &str) -> Result<ScriptValue, ScriptError>;

    /// Writes a declared global.
    fn set_global(&mut self, script: &str, module: u32, name: &str, value: ScriptValue) -> Result<(), ScriptError>;
}

/// Declared globals of one module instance.
#[derive(Debug, Clone, Default)]
pub struct ScriptGlobals {
    values: HashMap<String, ScriptValue>,
}

impl ScriptGlobals {
    fn declare(names: &[&str]) -> Self {
        Self {
            values: names
                .iter()
                .map(|name| (name.to_string(), ScriptValue::Void))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ScriptValue> {
        self.values.get(name)
    }

    /// The entity bound to [`SELF_GLOBAL`].
    pub fn entity(&self) -> Option<Entity> {
        self.get(SELF_GLOBAL).and_then(ScriptValue::as_entity)
    }

    /// Only declared names can be set.
    pub fn set(&mut self, name: &str, value: ScriptValue) -> bool {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// Behaviour of a native script.
pub trait NativeScript: Send {
    /// Names of the globals this script declares.
    fn globals(&self) -> &[&'static str] {
        &[SELF_GLOBAL, SCENE_GLOBAL]
    }

    fn start(&mut self, context: &mut ScriptContext<'_>, globals: &mut ScriptGlobals) -> Result<(), String> {
        let _ = (context, globals);
        Ok(())
    }

    fn update(&mut self, context: &mut ScriptContext<'_>, globals: &mut ScriptGlobals, dt: f32) -> Result<(), String> {
        let _ = (context, globals, dt);
        Ok(())
    }
}

type Factory = Box<dyn Fn(&str) -> Box<dyn NativeScript> + Send>;

struct Instance {
    behaviour: Box<dyn NativeScript>,
    globals: ScriptGlobals,
}

/// Runs Rust behaviours registered per script path.
///
/// The script source is handed to the factory, which may use it as
/// configuration or ignore it. Each module index gets its own instance.
#[derive(Default)]
pub struct NativeScriptEngine {
    factories: HashMap<String, Factory>,
    instances: HashMap<(String, u32), Instance>,
}

impl NativeScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the behaviour created for `script`.
    pub fn register(
        &mut self,
        script: impl Into<String>,
        factory: impl Fn(&str) -> Box<dyn NativeScript> + Send + 'static,
    ) {
        self.factories.insert(script.into(), Box::new(factory));
    }

    pub fn module_count(&self) -> usize {
        self.instances.len()
    }

    fn instance(&self, script: &str, module: u32) -> Result<&Instance, ScriptError> {
        self.instances
            .get(&(script.to_string(), module))
            .ok_or_else(|| ScriptError::ModuleNotLoaded {
                script: script.to_string(),
                module,
            })
    }
}

impl ScriptEngine for NativeScriptEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    fn load_module(&mut self, script: &str, source: &str, module: u32) -> Result<(), ScriptError> {
        let factory = self
            .factories
            .get(script)
            .ok_or_else(|| ScriptError::UnknownScript(script.to_string()))?;
        let behaviour = factory(source);
        let globals = ScriptGlobals::declare(behaviour.globals());
        self.instances
            .insert((script.to_string(), module), Instance { behaviour, globals });
        log::debug!("NativeScriptEngine: loaded {script} module {module}");
        Ok(())
    }

    fn unload_module(&mut self, script: &str, module: u32) -> bool {
        self.instances.remove(&(script.to_string(), module)).is_some()
    }

    fn is_loaded(&self, script: &str, module: u32) -> bool {
        self.instances.contains_key(&(script.to_string(), module))
    }

    fn execute_function(
        &mut self,
        context: &mut ScriptContext<'_>,
        script: &str,
        signature: &str,
        binder: &dyn Fn(&mut ScriptArgs),
        module: u32,
    ) -> Result<ScriptValue, ScriptError> {
        let mut args = ScriptArgs::default();
        binder(&mut args);

        let instance = self
            .instances
            .get_mut(&(script.to_string(), module))
            .ok_or_else(|| ScriptError::ModuleNotLoaded {
                script: script.to_string(),
                module,
            })?;
        let Instance { behaviour, globals } = instance;
        let result = match signature {
            START_SIGNATURE => behaviour.start(context, globals),
            UPDATE_SIGNATURE => {
                let dt = args.get(0).and_then(ScriptValue::as_f32).unwrap_or(0.0);
                behaviour.update(context, globals, dt)
            }
            _ => {
                return Err(ScriptError::UnknownFunction {
                    script: script.to_string(),
                    signature: signature.to_string(),
                })
            }
        };
        result.map(|()| ScriptValue::Void).map_err(|reason| ScriptError::Runtime {
            script: script.to_string(),
            reason,
        })
    }

    fn global_variable(&self, script: &str, module: u32, name: &str) -> Result<ScriptValue, ScriptError> {
        self.instance(script, module)?
            .globals
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::UnknownGlobal {
                script: script.to_string(),
                name: name.to_string(),
            })
    }

    fn set_global(&mut self, script: &str, module: u32, name: &str, value: ScriptValue) -> Result<(), ScriptError> {
        let instance = self
            .instances
            .get_mut(&(script.to_string(), module))
            .ok_or_else(|| ScriptError::ModuleNotLoaded {
                script: script.to_string(),
                module,
            })?;
        if instance.globals.set(name, value) {
            Ok(())
        } else {
            Err(ScriptError::UnknownGlobal {
                script: script.to_string(),
                name: name.to_string(),
            })
        }
    }
}

impl std::fmt::Debug for NativeScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut scripts: Vec<_> = self.factories.keys().collect();
        scripts.sort();
        f.debug_struct("NativeScriptEngine")
            .field("scripts", &scripts)
            .field("modules", &self.instances.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::SimplePhysics;
    use umbra_ecs::TransformComponent;

    /// Moves its entity up by one unit per second.
    struct Rise;

    impl NativeScript for Rise {
        fn update(&mut self, context: &mut ScriptContext<'_>, globals: &mut ScriptGlobals, dt: f32) -> Result<(), String> {
            let entity = globals.entity().ok_or("self is unbound")?;
            let transform = context
                .registry
                .get_mut::<TransformComponent>(entity)
                .ok_or("no transform")?;
            transform.position.y += dt;
            Ok(())
        }
    }

    /// Declares no globals.
    struct Silent;

    impl NativeScript for Silent {
        fn globals(&self) -> &[&'static str] {
            &[]
        }
    }

    fn engine() -> NativeScriptEngine {
        let mut engine = NativeScriptEngine::new();
        engine.register("scripts/rise.as", |_| Box::new(Rise));
        engine.register("scripts/silent.as", |_| Box::new(Silent));
        engine
    }

    #[test]
    fn modules_keep_separate_globals() {
        let mut scripts = engine();
        scripts.load_module("scripts/rise.as", "", 0).unwrap();
        scripts.load_module("scripts/rise.as", "", 1).unwrap();

        let mut registry = Registry::new();
        let a = registry.spawn();
        let b = registry.spawn();
        scripts.set_global("scripts/rise.as", 0, SELF_GLOBAL, ScriptValue::Entity(a)).unwrap();
        scripts.set_global("scripts/rise.as", 1, SELF_GLOBAL, ScriptValue::Entity(b)).unwrap();

        assert_eq!(
            scripts.global_variable("scripts/rise.as", 1, SELF_GLOBAL).unwrap(),
            ScriptValue::Entity(b)
        );
        assert_eq!(
            scripts.global_variable("scripts/rise.as", 0, SCENE_GLOBAL).unwrap(),
            ScriptValue::Void
        );
    }

    #[test]
    fn update_receives_delta_time() {
        let mut scripts = engine();
        scripts.load_module("scripts/rise.as", "", 0).unwrap();

        let mut registry = Registry::new();
        let entity = registry.spawn();
        registry.insert(entity, TransformComponent::default()).unwrap();
        scripts
            .set_global("scripts/rise.as", 0, SELF_GLOBAL, ScriptValue::Entity(entity))
            .unwrap();

        let input = InputState::new();
        let mut physics = SimplePhysics::default();
        let mut context = ScriptContext {
            registry: &mut registry,
            input: &input,
            physics: &mut physics,
        };
        scripts
            .execute_function(
                &mut context,
                "scripts/rise.as",
                UPDATE_SIGNATURE,
                &|args| {
                    args.push(ScriptValue::Float(0.5));
                },
                0,
            )
            .unwrap();
        assert_eq!(registry.get::<TransformComponent>(entity).unwrap().position.y, 0.5);
    }

    #[test]
    fn errors_name_what_is_missing() {
        let mut scripts = engine();
        assert!(matches!(
            scripts.load_module("scripts/unknown.as", "", 0),
            Err(ScriptError::UnknownScript(_))
        ));
        assert!(matches!(
            scripts.global_variable("scripts/rise.as", 3, SELF_GLOBAL),
            Err(ScriptError::ModuleNotLoaded { module: 3, .. })
        ));

        scripts.load_module("scripts/silent.as", "", 0).unwrap();
        assert!(matches!(
            scripts.set_global("scripts/silent.as", 0, SELF_GLOBAL, ScriptValue::Void),
            Err(ScriptError::UnknownGlobal { .. })
        ));

        let mut registry = Registry::new();
        let input = InputState::new();
        let mut physics = SimplePhysics::default();
        let mut context = ScriptContext {
            registry: &mut registry,
            input: &input,
            physics: &mut physics,
        };
        assert!(matches!(
            scripts.execute_function(&mut context, "scripts/silent.as", "int Main()", &|_| {}, 0),
            Err(ScriptError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn runtime_failure_is_reported() {
        let mut scripts = engine();
        scripts.load_module("scripts/rise.as", "", 0).unwrap();
        let mut registry = Registry::new();
        let input = InputState::new();
        let mut physics = SimplePhysics::default();
        let mut context = ScriptContext {
            registry: &mut registry,
            input: &input,
            physics: &mut physics,
        };
        let err = scripts
            .execute_function(&mut context, "scripts/rise.as", UPDATE_SIGNATURE, &|_| {}, 0)
            .unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { ref reason, .. } if reason == "self is unbound"));
    }
}
