//! Local transform component.
//!
//! Rotation is stored as Euler angles in degrees so it can be edited and
//! serialized directly. The matrix is always derived from the three fields.

use serde::{Deserialize, Serialize};
use umbra_core::math::{euler_degrees_to_quat, quat_to_euler_degrees, Mat4, Quat, Vec3, FORWARD};

use crate::Component;

/// Position, rotation and scale relative to the parent entity (or the world
/// origin for roots).
///
/// # Example
///
/// ```
/// use glam::Vec3;
/// use umbra_ecs::TransformComponent;
///
/// let transform = TransformComponent::from_position(Vec3::new(1.0, 2.0, 3.0))
///     .with_rotation(Vec3::new(0.0, 90.0, 0.0))
///     .with_scale(Vec3::splat(2.0));
/// let matrix = transform.transform();
/// assert!((matrix.w_axis.truncate() - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformComponent {
    pub position: Vec3,
    /// Euler angles in degrees, applied X then Y then Z.
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Component for TransformComponent {
    const NAME: &'static str = "Transform";
}

impl Default for TransformComponent {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl TransformComponent {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Vec3::ZERO,
        scale: Vec3::ONE,
    };

    #[inline]
    pub const fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }

    /// Decomposes a matrix into position, rotation and scale.
    pub fn from_matrix(matrix: Mat4) -> Self {
        let mut transform = Self::IDENTITY;
        transform.set_transform(matrix);
        transform
    }

    #[inline]
    #[must_use]
    pub const fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    #[inline]
    #[must_use]
    pub const fn with_rotation(mut self, degrees: Vec3) -> Self {
        self.rotation = degrees;
        self
    }

    #[inline]
    #[must_use]
    pub const fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// The rotation as a quaternion.
    #[inline]
    pub fn quat(&self) -> Quat {
        euler_degrees_to_quat(self.rotation)
    }

    /// Local matrix `T * R * S`.
    #[inline]
    pub fn transform(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.quat(), self.position)
    }

    /// Overwrites the fields with the decomposition of `matrix`.
    ///
    /// Shear is discarded.
    pub fn set_transform(&mut self, matrix: Mat4) {
        let (scale, rotation, position) = matrix.to_scale_rotation_translation();
        self.position = position;
        self.rotation = quat_to_euler_degrees(rotation);
        self.scale = scale;
    }

    /// Local forward direction (-Z rotated).
    #[inline]
    pub fn forward(&self) -> Vec3 {
        self.quat() * FORWARD
    }

    #[inline]
    pub fn right(&self) -> Vec3 {
        self.quat() * Vec3::X
    }

    #[inline]
    pub fn up(&self) -> Vec3 {
        self.quat() * Vec3::Y
    }

    /// Moves along the local axes.
    pub fn translate_local(&mut self, delta: Vec3) {
        self.position += self.quat() * delta;
    }

    /// Adds `degrees` to the Euler angles.
    pub fn rotate(&mut self, degrees: Vec3) {
        self.rotation += degrees;
    }
}
