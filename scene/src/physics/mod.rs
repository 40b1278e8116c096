//! Rigid body simulation contract.
//!
//! The scene only talks to a [`PhysicsEngine`]: it creates one body per
//! [`RigidBodyComponent`](crate::components::RigidBodyComponent), steps the
//! simulation, reads and writes body poses, and forwards contacts as
//! [`CollisionEvent`]s through the job queue.
//!
//! [`SimplePhysics`] is a small built-in integrator that is always
//! available. With the `physics-rapier` feature, [`RapierPhysics`] runs the
//! same contract on rapier3d.

mod simple;

#[cfg(feature = "physics-rapier")]
mod rapier;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::PhysicsError;

pub use simple::SimplePhysics;

#[cfg(feature = "physics-rapier")]
pub use self::rapier::RapierPhysics;

/// Identifier of a body inside one physics engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub u64);

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Body({})", self.0)
    }
}

/// Collision shape, centered on the body origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ColliderShape {
    Ball { radius: f32 },
    Cuboid { half_extents: Vec3 },
    /// Capsule along the Y axis.
    CapsuleY { half_height: f32, radius: f32 },
}

impl ColliderShape {
    fn is_valid(&self) -> bool {
        match *self {
            Self::Ball { radius } => radius > 0.0,
            Self::Cuboid { half_extents } => half_extents.min_element() > 0.0,
            Self::CapsuleY { half_height, radius } => half_height >= 0.0 && radius > 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MotionType {
    /// Never moves.
    Static,
    /// Moved by its velocity only; unaffected by gravity and contacts.
    Kinematic,
    #[default]
    Dynamic,
}

/// Everything needed to create a body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodySettings {
    pub shape: ColliderShape,
    pub motion: MotionType,
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub mass: f32,
    pub friction: f32,
    pub restitution: f32,
    pub gravity_scale: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// Reports contacts but is never pushed.
    pub is_sensor: bool,
}

impl Default for BodySettings {
    fn default() -> Self {
        Self {
            shape: ColliderShape::Ball { radius: 0.5 },
            motion: MotionType::Dynamic,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            mass: 1.0,
            friction: 0.5,
            restitution: 0.0,
            gravity_scale: 1.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            is_sensor: false,
        }
    }
}

impl BodySettings {
    pub fn ball(radius: f32) -> Self {
        Self {
            shape: ColliderShape::Ball { radius },
            ..Self::default()
        }
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        Self {
            shape: ColliderShape::Cuboid { half_extents },
            ..Self::default()
        }
    }

    pub fn capsule_y(half_height: f32, radius: f32) -> Self {
        Self {
            shape: ColliderShape::CapsuleY { half_height, radius },
            ..Self::default()
        }
    }

    pub fn with_motion(mut self, motion: MotionType) -> Self {
        self.motion = motion;
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_linear_velocity(mut self, velocity: Vec3) -> Self {
        self.linear_velocity = velocity;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn with_gravity_scale(mut self, scale: f32) -> Self {
        self.gravity_scale = scale;
        self
    }

    pub fn with_sensor(mut self, is_sensor: bool) -> Self {
        self.is_sensor = is_sensor;
        self
    }

    /// Rejects shapes without volume and dynamic bodies without mass.
    pub fn validate(&self) -> Result<(), PhysicsError> {
        if !self.shape.is_valid() {
            return Err(PhysicsError::InvalidSettings(format!("degenerate shape {:?}", self.shape)));
        }
        if self.motion == MotionType::Dynamic && !(self.mass > 0.0) {
            return Err(PhysicsError::InvalidSettings(format!("dynamic body with mass {}", self.mass)));
        }
        Ok(())
    }
}

/// Two bodies started touching.
///
/// `normal` points from `body_a` towards `body_b`.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionEvent {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub contact_points: Vec<Vec3>,
    pub normal: Vec3,
    pub penetration_depth: f32,
}

/// A rigid body simulation the scene can drive.
///
/// Every accessor taking a [`BodyId`] fails with
/// [`PhysicsError::UnknownBody`] for removed or foreign ids.
pub trait PhysicsEngine: Send {
    fn name(&self) -> &'static str;

    /// Adds a body to the simulation, awake.
    fn create_body(&mut self, settings: &BodySettings) -> Result<BodyId, PhysicsError>;

    /// Returns false if the body did not exist.
    fn remove_body(&mut self, body: BodyId) -> bool;

    fn body_count(&self) -> usize;

    fn set_gravity(&mut self, gravity: Vec3);

    /// Advances the simulation by `dt` seconds.
    fn update(&mut self, dt: f32);

    fn position(&self, body: BodyId) -> Result<Vec3, PhysicsError>;
    fn rotation(&self, body: BodyId) -> Result<Quat, PhysicsError>;
    fn linear_velocity(&self, body: BodyId) -> Result<Vec3, PhysicsError>;
    fn angular_velocity(&self, body: BodyId) -> Result<Vec3, PhysicsError>;

    fn set_position(&mut self, body: BodyId, position: Vec3) -> Result<(), PhysicsError>;
    fn set_rotation(&mut self, body: BodyId, rotation: Quat) -> Result<(), PhysicsError>;
    fn set_linear_velocity(&mut self, body: BodyId, velocity: Vec3) -> Result<(), PhysicsError>;
    fn set_angular_velocity(&mut self, body: BodyId, velocity: Vec3) -> Result<(), PhysicsError>;

    /// Accumulates a force applied during the next step.
    fn add_force(&mut self, body: BodyId, force: Vec3) -> Result<(), PhysicsError>;

    /// Changes the velocity immediately by `impulse / mass`.
    fn add_impulse(&mut self, body: BodyId, impulse: Vec3) -> Result<(), PhysicsError>;

    /// Takes the contacts that started since the last call.
    fn drain_contacts(&mut self) -> Vec<CollisionEvent>;
}

/// The engine selected by the enabled features.
pub fn default_engine(gravity: Vec3) -> Box<dyn PhysicsEngine> {
    #[cfg(feature = "physics-rapier")]
    {
        Box::new(RapierPhysics::new(gravity))
    }
    #[cfg(not(feature = "physics-rapier"))]
    {
        Box::new(SimplePhysics::new(gravity))
    }
}
