//! Built-in rigid body integrator.
//!
//! Semi-implicit Euler integration with gravity, damping and forces, plus
//! overlap tests between balls and axis-aligned boxes (capsules are treated
//! as their bounding box, rotations are ignored for contacts). Overlapping
//! dynamic bodies are pushed apart and lose the approaching part of their
//! velocity. This is enough for falling objects to rest on the ground.

use std::collections::{BTreeMap, HashSet};

use glam::{Quat, Vec3};

use super::{BodyId, BodySettings, ColliderShape, CollisionEvent, MotionType, PhysicsEngine};
use crate::error::PhysicsError;

#[derive(Debug, Clone)]
struct SimpleBody {
    settings: BodySettings,
    position: Vec3,
    rotation: Quat,
    linear_velocity: Vec3,
    angular_velocity: Vec3,
    force: Vec3,
}

impl SimpleBody {
    fn inverse_mass(&self) -> f32 {
        match self.settings.motion {
            MotionType::Dynamic if self.settings.mass > 0.0 => 1.0 / self.settings.mass,
            _ => 0.0,
        }
    }
}

/// Contact between two shapes, `normal` pointing from the first to the
/// second.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Contact {
    point: Vec3,
    normal: Vec3,
    depth: f32,
}

#[derive(Debug)]
pub struct SimplePhysics {
    gravity: Vec3,
    bodies: BTreeMap<BodyId, SimpleBody>,
    next_id: u64,
    touching: HashSet<(BodyId, BodyId)>,
    contacts: Vec<CollisionEvent>,
}

impl SimplePhysics {
    pub fn new(gravity: Vec3) -> Self {
        Self {
            gravity,
            bodies: BTreeMap::new(),
            next_id: 0,
            touching: HashSet::new(),
            contacts: Vec::new(),
        }
    }

    fn body(&self, id: BodyId) -> Result<&SimpleBody, PhysicsError> {
        self.bodies.get(&id).ok_or(PhysicsError::UnknownBody(id.0))
    }

    fn body_mut(&mut self, id: BodyId) -> Result<&mut SimpleBody, PhysicsError> {
        self.bodies.get_mut(&id).ok_or(PhysicsError::UnknownBody(id.0))
    }

    fn integrate(&mut self, dt: f32) {
        let gravity = self.gravity;
        for body in self.bodies.values_mut() {
            match body.settings.motion {
                MotionType::Static => {}
                MotionType::Kinematic => {
                    body.position += body.linear_velocity * dt;
                    body.rotation = integrate_rotation(body.rotation, body.angular_velocity, dt);
                }
                MotionType::Dynamic => {
                    let acceleration = gravity * body.settings.gravity_scale + body.force * body.inverse_mass();
                    body.linear_velocity += acceleration * dt;
                    body.linear_velocity *= 1.0 / (1.0 + dt * body.settings.linear_damping);
                    body.angular_velocity *= 1.0 / (1.0 + dt * body.settings.angular_damping);
                    body.position += body.linear_velocity * dt;
                    body.rotation = integrate_rotation(body.rotation, body.angular_velocity, dt);
                }
            }
            body.force = Vec3::ZERO;
        }
    }

    fn collide(&mut self) {
        let ids: Vec<BodyId> = self.bodies.keys().copied().collect();
        let mut touching = HashSet::new();

        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                let (Some(first), Some(second)) = (self.bodies.get(&a), self.bodies.get(&b)) else {
                    continue;
                };
                if first.settings.motion == MotionType::Static && second.settings.motion == MotionType::Static {
                    continue;
                }
                let Some(contact) = contact(first, second) else {
                    continue;
                };

                touching.insert((a, b));
                if !self.touching.contains(&(a, b)) {
                    log::trace!("SimplePhysics: {a} touches {b} (depth {:.4})", contact.depth);
                    self.contacts.push(CollisionEvent {
                        body_a: a,
                        body_b: b,
                        contact_points: vec![contact.point],
                        normal: contact.normal,
                        penetration_depth: contact.depth,
                    });
                }
                if !first.settings.is_sensor && !second.settings.is_sensor {
                    self.resolve(a, b, contact);
                }
            }
        }
        self.touching = touching;
    }

    /// Separates the pair and removes their approaching velocity.
    fn resolve(&mut self, a: BodyId, b: BodyId, contact: Contact) {
        let (Some(first), Some(second)) = (self.bodies.get(&a), self.bodies.get(&b)) else {
            return;
        };
        let (inv_a, inv_b) = (first.inverse_mass(), second.inverse_mass());
        let total = inv_a + inv_b;
        if total <= 0.0 {
            return;
        }
        let restitution = first.settings.restitution.max(second.settings.restitution);
        let relative = second.linear_velocity - first.linear_velocity;
        let approaching = relative.dot(contact.normal);
        let impulse = if approaching < 0.0 {
            -(1.0 + restitution) * approaching / total
        } else {
            0.0
        };
        let correction = contact.normal * (contact.depth / total);

        if let Some(body) = self.bodies.get_mut(&a) {
            body.position -= correction * inv_a;
            body.linear_velocity -= contact.normal * impulse * inv_a;
        }
        if let Some(body) = self.bodies.get_mut(&b) {
            body.position += correction * inv_b;
            body.linear_velocity += contact.normal * impulse * inv_b;
        }
    }
}

impl Default for SimplePhysics {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, -9.81, 0.0))
    }
}

fn integrate_rotation(rotation: Quat, angular_velocity: Vec3, dt: f32) -> Quat {
    if angular_velocity == Vec3::ZERO {
        return rotation;
    }
    (Quat::from_scaled_axis(angular_velocity * dt) * rotation).normalize()
}

fn half_extents(shape: ColliderShape) -> Vec3 {
    match shape {
        ColliderShape::Ball { radius } => Vec3::splat(radius),
        ColliderShape::Cuboid { half_extents } => half_extents,
        ColliderShape::CapsuleY { half_height, radius } => Vec3::new(radius, half_height + radius, radius),
    }
}

fn contact(a: &SimpleBody, b: &SimpleBody) -> Option<Contact> {
    match (a.settings.shape, b.settings.shape) {
        (ColliderShape::Ball { radius: ra }, ColliderShape::Ball { radius: rb }) => {
            ball_ball(a.position, ra, b.position, rb)
        }
        (ColliderShape::Ball { radius }, other) => {
            ball_box(a.position, radius, b.position, half_extents(other)).map(flip)
        }
        (other, ColliderShape::Ball { radius }) => ball_box(b.position, radius, a.position, half_extents(other)),
        (first, second) => box_box(a.position, half_extents(first), b.position, half_extents(second)),
    }
}

fn flip(contact: Contact) -> Contact {
    Contact {
        normal: -contact.normal,
        ..contact
    }
}

fn ball_ball(a: Vec3, ra: f32, b: Vec3, rb: f32) -> Option<Contact> {
    let delta = b - a;
    let distance = delta.length();
    let depth = ra + rb - distance;
    if depth <= 0.0 {
        return None;
    }
    let normal = if distance > 1e-6 { delta / distance } else { Vec3::Y };
    Some(Contact {
        point: a + normal * (ra - depth * 0.5),
        normal,
        depth,
    })
}

/// Contact with the normal pointing from the box towards the ball.
fn ball_box(center: Vec3, radius: f32, box_center: Vec3, half: Vec3) -> Option<Contact> {
    let local = center - box_center;
    let closest = local.clamp(-half, half);
    let delta = local - closest;
    let distance = delta.length();

    if distance > 1e-6 {
        let depth = radius - distance;
        return (depth > 0.0).then(|| Contact {
            point: box_center + closest,
            normal: delta / distance,
            depth,
        });
    }

    // Center inside the box: push out through the nearest face.
    let gaps = half - local.abs();
    let axis = if gaps.x <= gaps.y && gaps.x <= gaps.z {
        Vec3::X
    } else if gaps.y <= gaps.z {
        Vec3::Y
    } else {
        Vec3::Z
    };
    let sign = if local.dot(axis) >= 0.0 { 1.0 } else { -1.0 };
    Some(Contact {
        point: center,
        normal: axis * sign,
        depth: gaps.dot(axis) + radius,
    })
}

fn box_box(a: Vec3, ha: Vec3, b: Vec3, hb: Vec3) -> Option<Contact> {
    let delta = b - a;
    let overlap = ha + hb - delta.abs();
    if overlap.min_element() <= 0.0 {
        return None;
    }
    let axis = if overlap.x <= overlap.y && overlap.x <= overlap.z {
        Vec3::X
    } else if overlap.y <= overlap.z {
        Vec3::Y
    } else {
        Vec3::Z
    };
    let sign = if delta.dot(axis) >= 0.0 { 1.0 } else { -1.0 };
    let low = (a - ha).max(b - hb);
    let high = (a + ha).min(b + hb);
    Some(Contact {
        point: (low + high) * 0.5,
        normal: axis * sign,
        depth: overlap.dot(axis),
    })
}

impl PhysicsEngine for SimplePhysics {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn create_body(&mut self, settings: &BodySettings) -> Result<BodyId, PhysicsError> {
        settings.validate()?;
        self.next_id += 1;
        let id = BodyId(self.next_id);
        self.bodies.insert(
            id,
            SimpleBody {
                settings: settings.clone(),
                position: settings.position,
                rotation: settings.rotation,
                linear_velocity: settings.linear_velocity,
                angular_velocity: settings.angular_velocity,
                force: Vec3::ZERO,
            },
        );
        log::trace!("SimplePhysics: created {id} ({:?})", settings.motion);
        Ok(id)
    }

    fn remove_body(&mut self, body: BodyId) -> bool {
        self.touching.retain(|(a, b)| *a != body && *b != body);
        self.bodies.remove(&body).is_some()
    }

    fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    fn update(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        self.integrate(dt);
        self.collide();
    }

    fn position(&self, body: BodyId) -> Result<Vec3, PhysicsError> {
        Ok(self.body(body)?.position)
    }

    fn rotation(&self, body: BodyId) -> Result<Quat, PhysicsError> {
        Ok(self.body(body)?.rotation)
    }

    fn linear_velocity(&self, body: BodyId) -> Result<Vec3, PhysicsError> {
        Ok(self.body(body)?.linear_velocity)
    }

    fn angular_velocity(&self, body: BodyId) -> Result<Vec3, PhysicsError> {
        Ok(self.body(body)?.angular_velocity)
    }

    fn set_position(&mut self, body: BodyId, position: Vec3) -> Result<(), PhysicsError> {
        self.body_mut(body)?.position = position;
        Ok(())
    }

    fn set_rotation(&mut self, body: BodyId, rotation: Quat) -> Result<(), PhysicsError> {
        self.body_mut(body)?.rotation = rotation.normalize();
        Ok(())
    }

    fn set_linear_velocity(&mut self, body: BodyId, velocity: Vec3) -> Result<(), PhysicsError> {
        self.body_mut(body)?.linear_velocity = velocity;
        Ok(())
    }

    fn set_angular_velocity(&mut self, body: BodyId, velocity: Vec3) -> Result<(), PhysicsError> {
        self.body_mut(body)?.angular_velocity = velocity;
        Ok(())
    }

    fn add_force(&mut self, body: BodyId, force: Vec3) -> Result<(), PhysicsError> {
        self.body_mut(body)?.force += force;
        Ok(())
    }

    fn add_impulse(&mut self, body: BodyId, impulse: Vec3) -> Result<(), PhysicsError> {
        let body = self.body_mut(body)?;
        let inverse_mass = body.inverse_mass();
        body.linear_velocity += impulse * inverse_mass;
        Ok(())
    }

    fn drain_contacts(&mut self) -> Vec<CollisionEvent> {
        std::mem::take(&mut self.contacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn ground(physics: &mut SimplePhysics) -> BodyId {
        physics
            .create_body(&BodySettings::cuboid(Vec3::new(10.0, 0.5, 10.0)).with_motion(MotionType::Static))
            .unwrap()
    }

    #[test]
    fn dynamic_body_falls() {
        let mut physics = SimplePhysics::default();
        let ball = physics
            .create_body(&BodySettings::ball(0.5).with_position(Vec3::new(0.0, 10.0, 0.0)))
            .unwrap();
        for _ in 0..10 {
            physics.update(DT);
        }
        assert!(physics.position(ball).unwrap().y < 10.0);
        assert!(physics.linear_velocity(ball).unwrap().y < 0.0);
    }

    #[test]
    fn static_and_kinematic_ignore_gravity() {
        let mut physics = SimplePhysics::default();
        let fixed = physics
            .create_body(&BodySettings::ball(0.5).with_motion(MotionType::Static))
            .unwrap();
        let kinematic = physics
            .create_body(
                &BodySettings::ball(0.5)
                    .with_motion(MotionType::Kinematic)
                    .with_position(Vec3::new(5.0, 0.0, 0.0))
                    .with_linear_velocity(Vec3::X),
            )
            .unwrap();
        physics.update(1.0);
        assert_eq!(physics.position(fixed).unwrap(), Vec3::ZERO);
        assert_eq!(physics.position(kinematic).unwrap(), Vec3::new(6.0, 0.0, 0.0));
    }

    #[test]
    fn ball_comes_to_rest_on_ground_and_reports_one_contact() {
        let mut physics = SimplePhysics::default();
        let floor = ground(&mut physics);
        let ball = physics
            .create_body(&BodySettings::ball(0.5).with_position(Vec3::new(0.0, 2.0, 0.0)))
            .unwrap();

        let mut contacts = Vec::new();
        for _ in 0..240 {
            physics.update(DT);
            contacts.extend(physics.drain_contacts());
        }

        let y = physics.position(ball).unwrap().y;
        assert!((y - 1.0).abs() < 0.05, "ball rests at {y}");
        assert_eq!(contacts.len(), 1);
        let contact = &contacts[0];
        assert_eq!((contact.body_a, contact.body_b), (floor, ball));
        assert!(contact.normal.abs_diff_eq(Vec3::Y, 1e-5));
        assert!(contact.penetration_depth > 0.0);
    }

    #[test]
    fn impulse_scales_with_mass() {
        let mut physics = SimplePhysics::new(Vec3::ZERO);
        let heavy = physics.create_body(&BodySettings::ball(0.5).with_mass(4.0)).unwrap();
        physics.add_impulse(heavy, Vec3::new(8.0, 0.0, 0.0)).unwrap();
        assert_eq!(physics.linear_velocity(heavy).unwrap(), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn force_is_consumed_by_one_step() {
        let mut physics = SimplePhysics::new(Vec3::ZERO);
        let body = physics.create_body(&BodySettings::ball(0.5)).unwrap();
        physics.add_force(body, Vec3::new(0.0, 0.0, 60.0)).unwrap();
        physics.update(DT);
        physics.update(DT);
        let velocity = physics.linear_velocity(body).unwrap();
        assert!((velocity.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn removed_bodies_are_unknown() {
        let mut physics = SimplePhysics::default();
        let body = physics.create_body(&BodySettings::default()).unwrap();
        assert!(physics.remove_body(body));
        assert!(!physics.remove_body(body));
        assert!(matches!(physics.position(body), Err(PhysicsError::UnknownBody(_))));
        assert_eq!(physics.body_count(), 0);
    }

    #[test]
    fn box_overlap_picks_shallowest_axis() {
        let contact = box_box(Vec3::ZERO, Vec3::ONE, Vec3::new(1.5, 0.2, 0.0), Vec3::ONE).unwrap();
        assert_eq!(contact.normal, Vec3::X);
        assert!((contact.depth - 0.5).abs() < 1e-6);
        assert!(box_box(Vec3::ZERO, Vec3::ONE, Vec3::new(3.0, 0.0, 0.0), Vec3::ONE).is_none());
    }
}
