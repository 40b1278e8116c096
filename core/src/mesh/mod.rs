//! CPU-side mesh types and generators.
//!
//! - [`Vertex`] - the single interleaved vertex format used by every mesh
//! - [`CpuMesh`] - vertex and index data ready to be uploaded
//! - [`Aabb`] - axis-aligned bounds
//! - [`generators`] - cube, plane, sphere and full-screen quad
//!
//! These types are re-exported by `umbra-graphics` for convenience.

mod data;
pub mod generators;

pub use data::{Aabb, CpuMesh, Vertex};
pub use generators::{generate_cube, generate_fullscreen_quad, generate_plane, generate_sphere};
