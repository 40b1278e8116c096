//! rapier3d adapter.
//!
//! Contacts are produced by rapier's event handler, possibly from its own
//! worker threads, and travel through a channel until
//! [`drain_contacts`](PhysicsEngine::drain_contacts) collects them on the
//! main thread.

use std::collections::HashMap;

use crossbeam_channel::{Receiver, Sender};
use glam::{Quat, Vec3};
use rapier3d::na::{Quaternion, UnitQuaternion};
use rapier3d::prelude::*;

use super::{BodyId, BodySettings, ColliderShape, MotionType, PhysicsEngine};
use crate::error::PhysicsError;

type Contact = super::CollisionEvent;

fn to_vector(v: Vec3) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

fn from_vector(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

fn to_rotation(q: Quat) -> UnitQuaternion<Real> {
    UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z))
}

fn from_rotation(q: &UnitQuaternion<Real>) -> Quat {
    Quat::from_xyzw(q.i, q.j, q.k, q.w)
}

/// Forwards started collisions, with their manifolds, into a channel.
struct ContactCollector {
    sender: Sender<Contact>,
}

impl ContactCollector {
    fn body_id(bodies: &RigidBodySet, colliders: &ColliderSet, collider: ColliderHandle) -> Option<BodyId> {
        let parent = colliders.get(collider)?.parent()?;
        bodies.get(parent).map(|body| BodyId(body.user_data as u64))
    }
}

impl EventHandler for ContactCollector {
    fn handle_collision_event(
        &self,
        bodies: &RigidBodySet,
        colliders: &ColliderSet,
        event: CollisionEvent,
        contact_pair: Option<&ContactPair>,
    ) {
        if !event.started() {
            return;
        }
        let (Some(body_a), Some(body_b)) = (
            Self::body_id(bodies, colliders, event.collider1()),
            Self::body_id(bodies, colliders, event.collider2()),
        ) else {
            return;
        };

        let mut contact = Contact {
            body_a,
            body_b,
            contact_points: Vec::new(),
            normal: Vec3::ZERO,
            penetration_depth: 0.0,
        };
        if let Some(pair) = contact_pair {
            let origin = colliders.get(pair.collider1).map(|collider| *collider.position());
            for manifold in &pair.manifolds {
                contact.normal = from_vector(&manifold.data.normal);
                for point in &manifold.points {
                    if let Some(origin) = origin {
                        let world = origin * point.local_p1;
                        contact.contact_points.push(Vec3::new(world.x, world.y, world.z));
                    }
                    contact.penetration_depth = contact.penetration_depth.max(-point.dist);
                }
            }
        }
        let _ = self.sender.send(contact);
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

pub struct RapierPhysics {
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    handles: HashMap<BodyId, RigidBodyHandle>,
    next_id: u64,
    collector: ContactCollector,
    contacts: Receiver<Contact>,
}

impl RapierPhysics {
    pub fn new(gravity: Vec3) -> Self {
        let (sender, contacts) = crossbeam_channel::unbounded();
        Self {
            gravity: to_vector(gravity),
            integration_parameters: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            handles: HashMap::new(),
            next_id: 0,
            collector: ContactCollector { sender },
            contacts,
        }
    }

    fn body(&self, id: BodyId) -> Result<&RigidBody, PhysicsError> {
        self.handles
            .get(&id)
            .and_then(|handle| self.bodies.get(*handle))
            .ok_or(PhysicsError::UnknownBody(id.0))
    }

    fn body_mut(&mut self, id: BodyId) -> Result<&mut RigidBody, PhysicsError> {
        self.handles
            .get(&id)
            .and_then(|handle| self.bodies.get_mut(*handle))
            .ok_or(PhysicsError::UnknownBody(id.0))
    }

    fn collider(settings: &BodySettings) -> Collider {
        let builder = match settings.shape {
            ColliderShape::Ball { radius } => ColliderBuilder::ball(radius),
            ColliderShape::Cuboid { half_extents } => {
                ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            }
            ColliderShape::CapsuleY { half_height, radius } => ColliderBuilder::capsule_y(half_height, radius),
        };
        let builder = builder
            .friction(settings.friction)
            .restitution(settings.restitution)
            .sensor(settings.is_sensor)
            .active_events(ActiveEvents::COLLISION_EVENTS);
        if settings.motion == MotionType::Dynamic {
            builder.mass(settings.mass).build()
        } else {
            builder.build()
        }
    }
}

impl Default for RapierPhysics {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, -9.81, 0.0))
    }
}

impl PhysicsEngine for RapierPhysics {
    fn name(&self) -> &'static str {
        "rapier3d"
    }

    fn create_body(&mut self, settings: &BodySettings) -> Result<BodyId, PhysicsError> {
        settings.validate()?;
        self.next_id += 1;
        let id = BodyId(self.next_id);

        let body_type = match settings.motion {
            MotionType::Static => RigidBodyType::Fixed,
            MotionType::Kinematic => RigidBodyType::KinematicVelocityBased,
            MotionType::Dynamic => RigidBodyType::Dynamic,
        };
        let body = RigidBodyBuilder::new(body_type)
            .position(Isometry::from_parts(
                Translation::from(to_vector(settings.position)),
                to_rotation(settings.rotation),
            ))
            .linvel(to_vector(settings.linear_velocity))
            .angvel(to_vector(settings.angular_velocity))
            .gravity_scale(settings.gravity_scale)
            .linear_damping(settings.linear_damping)
            .angular_damping(settings.angular_damping)
            .user_data(u128::from(id.0))
            .build();
        let handle = self.bodies.insert(body);
        self.colliders
            .insert_with_parent(Self::collider(settings), handle, &mut self.bodies);
        self.handles.insert(id, handle);
        log::trace!("RapierPhysics: created {id} ({:?})", settings.motion);
        Ok(id)
    }

    fn remove_body(&mut self, body: BodyId) -> bool {
        let Some(handle) = self.handles.remove(&body) else {
            return false;
        };
        self.bodies
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .is_some()
    }

    fn body_count(&self) -> usize {
        self.handles.len()
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = to_vector(gravity);
    }

    fn update(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        self.integration_parameters.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &self.collector,
        );
    }

    fn position(&self, body: BodyId) -> Result<Vec3, PhysicsError> {
        Ok(from_vector(self.body(body)?.translation()))
    }

    fn rotation(&self, body: BodyId) -> Result<Quat, PhysicsError> {
        Ok(from_rotation(self.body(body)?.rotation()))
    }

    fn linear_velocity(&self, body: BodyId) -> Result<Vec3, PhysicsError> {
        Ok(from_vector(self.body(body)?.linvel()))
    }

    fn angular_velocity(&self, body: BodyId) -> Result<Vec3, PhysicsError> {
        Ok(from_vector(self.body(body)?.angvel()))
    }

    fn set_position(&mut self, body: BodyId, position: Vec3) -> Result<(), PhysicsError> {
        self.body_mut(body)?.set_translation(to_vector(position), true);
        Ok(())
    }

    fn set_rotation(&mut self, body: BodyId, rotation: Quat) -> Result<(), PhysicsError> {
        self.body_mut(body)?.set_rotation(to_rotation(rotation), true);
        Ok(())
    }

    fn set_linear_velocity(&mut self, body: BodyId, velocity: Vec3) -> Result<(), PhysicsError> {
        self.body_mut(body)?.set_linvel(to_vector(velocity), true);
        Ok(())
    }

    fn set_angular_velocity(&mut self, body: BodyId, velocity: Vec3) -> Result<(), PhysicsError> {
        self.body_mut(body)?.set_angvel(to_vector(velocity), true);
        Ok(())
    }

    fn add_force(&mut self, body: BodyId, force: Vec3) -> Result<(), PhysicsError> {
        self.body_mut(body)?.add_force(to_vector(force), true);
        Ok(())
    }

    fn add_impulse(&mut self, body: BodyId, impulse: Vec3) -> Result<(), PhysicsError> {
        self.body_mut(body)?.apply_impulse(to_vector(impulse), true);
        Ok(())
    }

    fn drain_contacts(&mut self) -> Vec<Contact> {
        self.contacts.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_moves_dynamic_body() {
        let mut physics = RapierPhysics::default();
        let ball = physics
            .create_body(&BodySettings::ball(0.5).with_position(Vec3::new(0.0, 10.0, 0.0)))
            .unwrap();
        for _ in 0..10 {
            physics.update(1.0 / 60.0);
        }
        assert!(physics.position(ball).unwrap().y < 10.0);
    }

    #[test]
    fn falling_ball_reports_contact_with_ground() {
        let mut physics = RapierPhysics::default();
        let ground = physics
            .create_body(&BodySettings::cuboid(Vec3::new(10.0, 0.5, 10.0)).with_motion(MotionType::Static))
            .unwrap();
        let ball = physics
            .create_body(&BodySettings::ball(0.5).with_position(Vec3::new(0.0, 2.0, 0.0)))
            .unwrap();

        let mut contacts = Vec::new();
        for _ in 0..120 {
            physics.update(1.0 / 60.0);
            contacts.extend(physics.drain_contacts());
        }
        assert!(contacts
            .iter()
            .any(|c| (c.body_a == ground && c.body_b == ball) || (c.body_a == ball && c.body_b == ground)));
    }

    #[test]
    fn removed_body_is_unknown() {
        let mut physics = RapierPhysics::default();
        let body = physics.create_body(&BodySettings::default()).unwrap();
        assert!(physics.remove_body(body));
        assert!(physics.position(body).is_err());
    }
}
