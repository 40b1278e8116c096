//! GPU mesh.
//!
//! A [`Mesh`] holds one interleaved vertex buffer (see
//! [`Vertex`](umbra_core::Vertex) for the layout) and one `u32` index buffer,
//! uploaded from a [`CpuMesh`]. Inside a pass the mesh is wired up in two
//! steps: [`Mesh::setup_buffers`] selects its buffers in the setup closure,
//! [`Mesh::draw`] issues the indexed draw.
//!
//! # Example
//!
//! ```
//! use umbra_core::mesh::generate_cube;
//! use umbra_graphics::{Mesh, Renderer, RendererConfig};
//!
//! let mut renderer = Renderer::new(&RendererConfig::default());
//! let cube = Mesh::from_cpu(&mut renderer, &generate_cube(0.5)).unwrap();
//! assert_eq!(cube.index_count(), 36);
//! ```

use umbra_core::mesh::{generate_fullscreen_quad, Aabb, CpuMesh};

use crate::error::GraphicsError;
use crate::renderer::{PassEncoder, PassSetup, Renderer};
use crate::resources::Buffer;
use crate::types::BufferUsage;

/// An uploaded triangle-list mesh.
pub struct Mesh {
    label: Option<String>,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    vertex_count: u32,
    index_count: u32,
    bounds: Option<Aabb>,
}

impl Mesh {
    /// Uploads `mesh` into new vertex and index buffers.
    ///
    /// # Errors
    ///
    /// Fails if the renderer is not initialised or an index points past the
    /// vertex array.
    pub fn from_cpu(renderer: &mut Renderer, mesh: &CpuMesh) -> Result<Self, GraphicsError> {
        if !mesh.validate() {
            return Err(GraphicsError::InvalidParameter(format!(
                "mesh {:?} has out-of-range indices",
                mesh.label()
            )));
        }
        let label = mesh.label().unwrap_or("mesh");
        let vertex_buffer =
            renderer.create_buffer_init(&format!("{label}/vertices"), BufferUsage::VERTEX, mesh.vertex_bytes())?;
        let index_buffer =
            renderer.create_buffer_init(&format!("{label}/indices"), BufferUsage::INDEX, mesh.index_bytes())?;

        Ok(Self {
            label: mesh.label().map(str::to_string),
            vertex_buffer,
            index_buffer,
            vertex_count: mesh.vertex_count(),
            index_count: mesh.index_count(),
            bounds: mesh.bounds(),
        })
    }

    /// The screen-covering quad used by every full-screen pass.
    pub fn fullscreen_quad(renderer: &mut Renderer) -> Result<Self, GraphicsError> {
        Self::from_cpu(renderer, &generate_fullscreen_quad())
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    pub fn vertex_buffer(&self) -> &Buffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &Buffer {
        &self.index_buffer
    }

    /// Selects this mesh's buffers for the pass being set up.
    pub fn setup_buffers(&self, setup: &mut PassSetup<'_>) {
        setup.set_vertex_buffer(&self.vertex_buffer);
        setup.set_index_buffer(&self.index_buffer);
    }

    /// Draws every triangle. Does nothing for an empty mesh.
    pub fn draw(&self, pass: &mut PassEncoder<'_>) {
        if self.index_count > 0 {
            pass.draw_indexed(0, self.index_count);
        }
    }

    /// Rebinds this mesh's buffers mid-pass and draws, for passes that draw
    /// several meshes.
    pub fn bind_and_draw(&self, pass: &mut PassEncoder<'_>) {
        pass.set_vertex_buffer(&self.vertex_buffer);
        pass.set_index_buffer(&self.index_buffer);
        self.draw(pass);
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("label", &self.label)
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.index_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use umbra_core::mesh::{generate_cube, Vertex};
    use umbra_core::math::Vec3;

    fn renderer() -> Renderer {
        Renderer::with_backend(Box::new(SoftwareBackend::new()), 8, 8)
    }

    #[test]
    fn upload_keeps_counts_and_bounds() {
        let mut renderer = renderer();
        let mesh = Mesh::from_cpu(&mut renderer, &generate_cube(0.5)).unwrap();
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.index_count(), 36);
        assert_eq!(mesh.vertex_buffer().size(), 24 * Vertex::STRIDE as u64);
        assert_eq!(mesh.bounds().unwrap().max, Vec3::splat(0.5));
        assert_eq!(mesh.label(), Some("cube"));
    }

    #[test]
    fn bad_indices_are_rejected() {
        let mut renderer = renderer();
        let broken = CpuMesh::new(vec![Vertex::new(Vec3::ZERO, Vec3::Y, [0.0; 2], Vec3::X)], vec![0, 1, 2]);
        assert!(Mesh::from_cpu(&mut renderer, &broken).is_err());
    }

    #[test]
    fn dropping_mesh_releases_both_buffers() {
        let mut renderer = renderer();
        let mesh = Mesh::fullscreen_quad(&mut renderer).unwrap();
        let (vb, ib) = (mesh.vertex_buffer().handle(), mesh.index_buffer().handle());
        drop(mesh);
        renderer.collect_garbage();
        assert_eq!(renderer.release_count(vb), 1);
        assert_eq!(renderer.release_count(ib), 1);
    }
}
