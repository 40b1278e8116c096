mod hierarchy;
mod name;
mod transform;

pub use hierarchy::HierarchyComponent;
pub use name::NameComponent;
pub use transform::TransformComponent;
