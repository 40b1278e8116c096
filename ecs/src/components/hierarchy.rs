use serde::{Deserialize, Serialize};

use crate::{Component, Entity};

/// Parent link plus the ordered list of children.
///
/// Managed by the functions in [`hierarchy`](crate::hierarchy); editing the
/// fields directly can break the parent/children symmetry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyComponent {
    pub parent: Option<Entity>,
    pub children: Vec<Entity>,
}

impl Component for HierarchyComponent {
    const NAME: &'static str = "Hierarchy";
}

impl HierarchyComponent {
    pub fn with_parent(parent: Entity) -> Self {
        Self {
            parent: Some(parent),
            children: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}
