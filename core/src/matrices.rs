//! Model/view/projection matrix stack.
//!
//! The stack scopes per-draw transform state: callers push before applying a
//! local transform and pop after the draw. Model and view are stacked;
//! projection is set directly per use.

use crate::math::{euler_degrees_to_quat, Mat4, Quat, Vec3, Vec4};

/// GPU-facing snapshot of the current matrices.
///
/// Uploaded into the constant buffer that backs every shader's matrix
/// uniforms. Layout matches the `Matrices` struct in the built-in shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MatricesBinding {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    /// Camera world position (xyz) and a padding lane.
    pub camera_position: [f32; 4],
}

impl MatricesBinding {
    pub fn model(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.model)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.projection)
    }

    /// Combined `projection * view * model`.
    pub fn model_view_projection(&self) -> Mat4 {
        self.projection() * self.view() * self.model()
    }
}

/// Stack of model and view matrices plus the current projection.
///
/// The stack never becomes empty: popping at depth one is a no-op so that an
/// unbalanced pop cannot corrupt later passes.
#[derive(Debug, Clone)]
pub struct MatricesStack {
    models: Vec<Mat4>,
    views: Vec<Mat4>,
    projection: Mat4,
}

impl MatricesStack {
    pub fn new() -> Self {
        Self {
            models: vec![Mat4::IDENTITY],
            views: vec![Mat4::IDENTITY],
            projection: Mat4::IDENTITY,
        }
    }

    /// Duplicates the top of the model and view stacks.
    pub fn push_matrix(&mut self) {
        let model = self.model();
        let view = self.view();
        self.models.push(model);
        self.views.push(view);
    }

    /// Discards the top of the model and view stacks.
    ///
    /// Does nothing when only the base entry remains.
    pub fn pop_matrix(&mut self) {
        if self.models.len() > 1 {
            self.models.pop();
        } else {
            log::trace!("MatricesStack: ignoring pop on base model matrix");
        }
        if self.views.len() > 1 {
            self.views.pop();
        }
    }

    /// Current stack depth (1 when nothing is pushed).
    pub fn depth(&self) -> usize {
        self.models.len()
    }

    pub fn model(&self) -> Mat4 {
        self.models.last().copied().unwrap_or(Mat4::IDENTITY)
    }

    pub fn view(&self) -> Mat4 {
        self.views.last().copied().unwrap_or(Mat4::IDENTITY)
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn set_model(&mut self, model: Mat4) {
        if let Some(top) = self.models.last_mut() {
            *top = model;
        }
    }

    pub fn set_view(&mut self, view: Mat4) {
        if let Some(top) = self.views.last_mut() {
            *top = view;
        }
    }

    pub fn set_projection(&mut self, projection: Mat4) {
        self.projection = projection;
    }

    /// Composes `transform` onto the top model matrix (`model = model * transform`).
    pub fn multiply(&mut self, transform: Mat4) {
        if let Some(top) = self.models.last_mut() {
            *top = *top * transform;
        }
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.multiply(Mat4::from_translation(offset));
    }

    pub fn scale(&mut self, factors: Vec3) {
        self.multiply(Mat4::from_scale(factors));
    }

    /// Rotates by `angle_degrees` around `axis`.
    pub fn rotate(&mut self, angle_degrees: f32, axis: Vec3) {
        let axis = axis.normalize_or_zero();
        if axis == Vec3::ZERO {
            return;
        }
        self.multiply(Mat4::from_quat(Quat::from_axis_angle(
            axis,
            angle_degrees.to_radians(),
        )));
    }

    /// Rotates by Euler angles in degrees.
    pub fn rotate_euler(&mut self, degrees: Vec3) {
        self.multiply(Mat4::from_quat(euler_degrees_to_quat(degrees)));
    }

    /// Snapshot of the current model, view and projection for GPU upload.
    pub fn binding(&self) -> MatricesBinding {
        let view = self.view();
        let camera_position = view.inverse().w_axis;
        MatricesBinding {
            model: self.model().to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            projection: self.projection.to_cols_array_2d(),
            camera_position: Vec4::new(camera_position.x, camera_position.y, camera_position.z, 1.0)
                .to_array(),
        }
    }
}

impl Default for MatricesStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(16)]
    fn balanced_push_pop_restores_state(#[case] depth: usize) {
        let mut stack = MatricesStack::new();
        stack.set_model(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        stack.set_view(Mat4::from_rotation_y(0.5));
        let model = stack.model();
        let view = stack.view();

        for i in 0..depth {
            stack.push_matrix();
            stack.translate(Vec3::splat(i as f32 + 1.0));
            stack.rotate(15.0, Vec3::Y);
            stack.set_view(Mat4::IDENTITY);
        }
        for _ in 0..depth {
            stack.pop_matrix();
        }

        assert_eq!(stack.model(), model);
        assert_eq!(stack.view(), view);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn pop_at_base_is_noop() {
        let mut stack = MatricesStack::new();
        stack.translate(Vec3::X);
        let model = stack.model();
        stack.pop_matrix();
        stack.pop_matrix();
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.model(), model);
    }

    #[test]
    fn operations_compose_onto_existing_model() {
        let mut stack = MatricesStack::new();
        stack.translate(Vec3::new(5.0, 0.0, 0.0));
        stack.scale(Vec3::splat(2.0));
        let p = stack.model().transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!((p - Vec3::new(7.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn projection_is_not_stacked() {
        let mut stack = MatricesStack::new();
        let projection = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
        stack.push_matrix();
        stack.set_projection(projection);
        stack.pop_matrix();
        assert_eq!(stack.projection(), projection);
    }

    #[test]
    fn binding_snapshots_matrices() {
        let mut stack = MatricesStack::new();
        stack.set_view(Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)));
        stack.translate(Vec3::Y);
        let binding = stack.binding();
        assert_eq!(binding.model(), stack.model());
        assert_eq!(binding.view(), stack.view());
        assert!((binding.camera_position[2] - 5.0).abs() < 1e-5);
    }
}
