use std::any::Any;

/// Typed sparse set storing components of type T.
///
/// Uses a sparse array (entity index → dense index) and a dense array
/// (contiguous component data + entity mapping) for O(1) insert/remove/get
/// and cache-friendly iteration. Dense order is insertion order until a
/// removal swaps the last element into the hole.
pub struct SparseSet<T: 'static> {
    /// `entity_index -> dense_index`. `None` means the entity does not have
    /// this component.
    sparse: Vec<Option<u32>>,
    dense: Vec<T>,
    /// Entity indices corresponding to each dense element.
    entities: Vec<u32>,
}

impl<T: 'static> SparseSet<T> {
    pub fn new() -> Self {
        Self {
            sparse: Vec::new(),
            dense: Vec::new(),
            entities: Vec::new(),
        }
    }

    /// Inserts a component for the given entity index.
    ///
    /// Returns the previous value if the entity already had one.
    pub fn insert(&mut self, entity_index: u32, value: T) -> Option<T> {
        let idx = entity_index as usize;
        if idx >= self.sparse.len() {
            self.sparse.resize(idx + 1, None);
        }

        if let Some(dense_idx) = self.sparse[idx] {
            Some(std::mem::replace(&mut self.dense[dense_idx as usize], value))
        } else {
            self.sparse[idx] = Some(self.dense.len() as u32);
            self.dense.push(value);
            self.entities.push(entity_index);
            None
        }
    }

    /// Removes the component for the given entity index.
    pub fn remove(&mut self, entity_index: u32) -> Option<T> {
        let idx = entity_index as usize;
        let dense_idx = (*self.sparse.get(idx)?)? as usize;
        self.sparse[idx] = None;

        let last_dense = self.dense.len() - 1;
        if dense_idx != last_dense {
            // Swap-remove: move last element into the removed slot
            let swapped_entity = self.entities[last_dense];
            self.sparse[swapped_entity as usize] = Some(dense_idx as u32);
            self.entities[dense_idx] = swapped_entity;
        }

        self.entities.pop();
        Some(self.dense.swap_remove(dense_idx))
    }

    pub fn get(&self, entity_index: u32) -> Option<&T> {
        let dense_idx = (*self.sparse.get(entity_index as usize)?)? as usize;
        Some(&self.dense[dense_idx])
    }

    pub fn get_mut(&mut self, entity_index: u32) -> Option<&mut T> {
        let dense_idx = (*self.sparse.get(entity_index as usize)?)? as usize;
        Some(&mut self.dense[dense_idx])
    }

    pub fn contains(&self, entity_index: u32) -> bool {
        matches!(self.sparse.get(entity_index as usize), Some(Some(_)))
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Iterates over `(entity_index, &component)` pairs in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.entities.iter().copied().zip(self.dense.iter())
    }

    /// Iterates over `(entity_index, &mut component)` pairs in dense order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.entities.iter().copied().zip(self.dense.iter_mut())
    }

    /// Entity indices in dense order.
    pub fn entities(&self) -> &[u32] {
        &self.entities
    }
}

impl<T: 'static> Default for SparseSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A sparse set plus the type-erased operations the registry needs.
pub(crate) struct ComponentStorage<T: 'static> {
    pub set: SparseSet<T>,
    /// Present for components registered as cloneable.
    cloner: Option<fn(&T) -> T>,
}

impl<T: 'static> ComponentStorage<T> {
    pub fn new(cloner: Option<fn(&T) -> T>) -> Self {
        Self {
            set: SparseSet::new(),
            cloner,
        }
    }
}

/// Type-erased view of a [`ComponentStorage`].
pub(crate) trait ErasedStorage: Send + Sync {
    fn name(&self) -> &'static str;
    fn remove_entity(&mut self, entity_index: u32) -> bool;
    fn contains(&self, entity_index: u32) -> bool;
    fn len(&self) -> usize;
    /// Copies the component of `src` onto `dst`.
    ///
    /// Returns false when the entity has none or the type is not cloneable.
    fn clone_entry(&mut self, src: u32, dst: u32) -> bool;
    fn entities(&self) -> &[u32];
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + Sync + 'static> ErasedStorage for ComponentStorage<T> {
    fn name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn remove_entity(&mut self, entity_index: u32) -> bool {
        self.set.remove(entity_index).is_some()
    }

    fn contains(&self, entity_index: u32) -> bool {
        self.set.contains(entity_index)
    }

    fn len(&self) -> usize {
        self.set.len()
    }

    fn clone_entry(&mut self, src: u32, dst: u32) -> bool {
        let Some(cloner) = self.cloner else {
            return false;
        };
        let Some(value) = self.set.get(src).map(cloner) else {
            return false;
        };
        self.set.insert(dst, value);
        true
    }

    fn entities(&self) -> &[u32] {
        self.set.entities()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_replace() {
        let mut set = SparseSet::new();
        assert_eq!(set.insert(3, "a"), None);
        assert_eq!(set.insert(3, "b"), Some("a"));
        assert_eq!(set.get(3), Some(&"b"));
        assert_eq!(set.get(2), None);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn swap_remove_keeps_mapping() {
        let mut set = SparseSet::new();
        set.insert(0, 10);
        set.insert(1, 11);
        set.insert(2, 12);

        assert_eq!(set.remove(0), Some(10));
        assert_eq!(set.entities(), &[2, 1]);
        assert_eq!(set.get(2), Some(&12));
        assert_eq!(set.get(1), Some(&11));
        assert!(!set.contains(0));
        assert_eq!(set.remove(0), None);
    }

    #[test]
    fn erased_clone_requires_cloner() {
        let mut plain = ComponentStorage::<u32>::new(None);
        plain.set.insert(0, 5);
        assert!(!plain.clone_entry(0, 1));

        let mut cloneable = ComponentStorage::<u32>::new(Some(|v| *v));
        cloneable.set.insert(0, 5);
        assert!(cloneable.clone_entry(0, 1));
        assert_eq!(cloneable.set.get(1), Some(&5));
        assert!(!cloneable.clone_entry(7, 8));
    }
}
