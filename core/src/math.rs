//! Math type re-exports and helper functions.
//!
//! All rendering math is `f32` and right-handed, with clip-space depth in
//! `[0, 1]` (the wgpu/Vulkan convention). Euler angles exposed to users are
//! in degrees and applied in X, then Y, then Z order.

pub use glam::{EulerRot, Mat3, Mat4, Quat, Vec2, Vec3, Vec4};

/// World-space up axis.
pub const WORLD_UP: Vec3 = Vec3::Y;

/// Local forward axis for cameras and lights.
pub const FORWARD: Vec3 = Vec3::NEG_Z;

/// Convert Euler angles in degrees (x, y, z) to a quaternion.
///
/// The rotation is applied around X first, then Y, then Z, which matches the
/// matrix product `Rz * Ry * Rx`.
pub fn euler_degrees_to_quat(degrees: Vec3) -> Quat {
    Quat::from_euler(
        EulerRot::ZYX,
        degrees.z.to_radians(),
        degrees.y.to_radians(),
        degrees.x.to_radians(),
    )
}

/// Below this `cos(pitch)` the X and Z axes are treated as aligned.
const GIMBAL_EPSILON: f32 = 1e-4;

/// Convert a quaternion to Euler angles in degrees (x, y, z).
///
/// Inverse of [`euler_degrees_to_quat`] up to angle aliasing. At a pitch of
/// +-90 degrees only the combined X/Z roll is defined; it is reported on X
/// with Z set to zero.
pub fn quat_to_euler_degrees(rotation: Quat) -> Vec3 {
    let m = Mat3::from_quat(rotation.normalize());
    // Column-major: `m.y_axis.z` is row 2, column 1.
    let cos_y = m.x_axis.x.hypot(m.x_axis.y);
    let y = (-m.x_axis.z).atan2(cos_y);
    let (x, z) = if cos_y > GIMBAL_EPSILON {
        (m.y_axis.z.atan2(m.z_axis.z), m.x_axis.y.atan2(m.x_axis.x))
    } else {
        ((-m.z_axis.y).atan2(m.y_axis.y), 0.0)
    };
    Vec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees())
}

/// Right-handed perspective projection with a vertical field of view in degrees.
pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    Mat4::perspective_rh(fov_y_degrees.to_radians(), aspect.max(f32::EPSILON), near, far)
}

/// Right-handed look-at view matrix.
///
/// If `up` is parallel to the viewing direction a perpendicular fallback axis
/// is used so the result never contains NaNs.
pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
    let forward = (target - eye).normalize_or_zero();
    if forward == Vec3::ZERO {
        return Mat4::from_translation(-eye);
    }
    let up = if forward.cross(up).length_squared() < 1e-8 {
        if forward.y.abs() > 0.5 {
            Vec3::Z
        } else {
            Vec3::Y
        }
    } else {
        up
    };
    Mat4::look_at_rh(eye, target, up)
}

/// Extract the world-space position encoded in an affine transform.
pub fn translation_of(transform: &Mat4) -> Vec3 {
    transform.w_axis.truncate()
}

/// Projection used when rendering into a cube face (90 degree FOV, square).
pub fn cube_face_projection() -> Mat4 {
    perspective(90.0, 1.0, 0.1, 10.0)
}

/// View matrices for the six cube faces in `+X, -X, +Y, -Y, +Z, -Z` order.
pub fn cube_face_views() -> [Mat4; 6] {
    let eye = Vec3::ZERO;
    [
        Mat4::look_at_rh(eye, Vec3::X, Vec3::NEG_Y),
        Mat4::look_at_rh(eye, Vec3::NEG_X, Vec3::NEG_Y),
        Mat4::look_at_rh(eye, Vec3::Y, Vec3::Z),
        Mat4::look_at_rh(eye, Vec3::NEG_Y, Vec3::NEG_Z),
        Mat4::look_at_rh(eye, Vec3::Z, Vec3::NEG_Y),
        Mat4::look_at_rh(eye, Vec3::NEG_Z, Vec3::NEG_Y),
    ]
}

/// Returns true if both matrices are element-wise within `epsilon`.
pub fn mat4_approx_eq(a: &Mat4, b: &Mat4, epsilon: f32) -> bool {
    a.abs_diff_eq(*b, epsilon)
}
