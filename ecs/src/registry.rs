use std::any::TypeId;
use std::collections::HashMap;

use crate::component::Component;
use crate::components::{HierarchyComponent, NameComponent, TransformComponent};
use crate::entity::{Entity, EntityAllocator};
use crate::error::EcsError;
use crate::query::Query;
use crate::sparse_set::{ComponentStorage, ErasedStorage, SparseSet};

/// Owner of every entity and component.
///
/// Components are stored per type in sparse sets and must be registered
/// before use. The built-in [`NameComponent`], [`TransformComponent`] and
/// [`HierarchyComponent`] are registered by [`Registry::new`].
///
/// # Example
///
/// ```
/// use umbra_ecs::{Component, Registry, TransformComponent};
///
/// #[derive(Clone)]
/// struct Health(f32);
/// impl Component for Health {
///     const NAME: &'static str = "Health";
/// }
///
/// let mut registry = Registry::new();
/// registry.register_cloneable::<Health>();
///
/// let entity = registry.spawn();
/// registry.insert(entity, TransformComponent::default()).unwrap();
/// registry.insert(entity, Health(100.0)).unwrap();
///
/// for (entity, (_transform, health)) in registry.query::<(TransformComponent, Health)>() {
///     println!("{entity}: {}", health.0);
/// }
/// ```
pub struct Registry {
    entities: EntityAllocator,
    storages: HashMap<TypeId, Box<dyn ErasedStorage>>,
}

impl Registry {
    pub fn new() -> Self {
        let mut registry = Self {
            entities: EntityAllocator::new(),
            storages: HashMap::new(),
        };
        registry.register_cloneable::<NameComponent>();
        registry.register_cloneable::<TransformComponent>();
        registry.register_cloneable::<HierarchyComponent>();
        registry
    }

    // ---- Registration ----

    /// Registers a component type that is skipped by [`clone_entity`](Self::clone_entity).
    pub fn register<T: Component>(&mut self) {
        self.register_storage::<T>(None);
    }

    /// Registers a component type that is copied by [`clone_entity`](Self::clone_entity).
    pub fn register_cloneable<T: Component + Clone>(&mut self) {
        self.register_storage::<T>(Some(T::clone));
    }

    fn register_storage<T: Component>(&mut self, cloner: Option<fn(&T) -> T>) {
        self.storages.entry(TypeId::of::<T>()).or_insert_with(|| {
            log::trace!("Registry: registered component {}", T::NAME);
            Box::new(ComponentStorage::<T>::new(cloner))
        });
    }

    pub fn is_registered<T: Component>(&self) -> bool {
        self.storages.contains_key(&TypeId::of::<T>())
    }

    // ---- Entity management ----

    pub fn spawn(&mut self) -> Entity {
        self.entities.allocate()
    }

    /// Despawns an entity, removing all its components.
    ///
    /// Returns `false` if the entity was already dead. Hierarchy links are not
    /// touched; use [`hierarchy::despawn_recursive`](crate::hierarchy::despawn_recursive)
    /// for that.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.entities.deallocate(entity) {
            return false;
        }
        for storage in self.storages.values_mut() {
            storage.remove_entity(entity.index());
        }
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of alive entities.
    pub fn len(&self) -> usize {
        self.entities.count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.entities.count() == 0
    }

    /// Iterates over all alive entities in slot order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter_alive()
    }

    /// Despawns every entity. Registrations are kept.
    pub fn clear(&mut self) {
        let alive: Vec<Entity> = self.entities.iter_alive().collect();
        for entity in alive {
            self.despawn(entity);
        }
    }

    // ---- Components ----

    /// Adds or replaces a component, returning the previous value.
    pub fn insert<T: Component>(&mut self, entity: Entity, value: T) -> Result<Option<T>, EcsError> {
        if !self.is_alive(entity) {
            return Err(EcsError::DeadEntity(entity));
        }
        let storage = self
            .storage_mut::<T>()
            .ok_or(EcsError::Unregistered(T::NAME))?;
        Ok(storage.insert(entity.index(), value))
    }

    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.storage_mut::<T>()?.remove(entity.index())
    }

    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.storage::<T>()?.get(entity.index())
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.storage_mut::<T>()?.get_mut(entity.index())
    }

    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.is_alive(entity)
            && self
                .storage::<T>()
                .is_some_and(|storage| storage.contains(entity.index()))
    }

    /// Read access to all components of type T.
    pub fn storage<T: Component>(&self) -> Option<&SparseSet<T>> {
        self.storages
            .get(&TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<ComponentStorage<T>>()
            .map(|storage| &storage.set)
    }

    /// Write access to all components of type T.
    pub fn storage_mut<T: Component>(&mut self) -> Option<&mut SparseSet<T>> {
        self.storages
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<ComponentStorage<T>>()
            .map(|storage| &mut storage.set)
    }

    /// Number of component types `entity` has.
    pub fn component_count(&self, entity: Entity) -> usize {
        if !self.is_alive(entity) {
            return 0;
        }
        self.storages
            .values()
            .filter(|storage| storage.contains(entity.index()))
            .count()
    }

    /// Type names of the components `entity` has, for diagnostics.
    pub fn component_names(&self, entity: Entity) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .storages
            .values()
            .filter(|storage| self.is_alive(entity) && storage.contains(entity.index()))
            .map(|storage| storage.name())
            .collect();
        names.sort_unstable();
        names
    }

    /// Copies every cloneable component of `source` onto a new entity.
    ///
    /// Hierarchy links are copied verbatim; see
    /// [`hierarchy::clone_entity`](crate::hierarchy::clone_entity) for a copy
    /// that is also linked into the parent.
    pub fn clone_entity(&mut self, source: Entity) -> Result<Entity, EcsError> {
        if !self.is_alive(source) {
            return Err(EcsError::DeadEntity(source));
        }
        let copy = self.spawn();
        let mut skipped = 0;
        for storage in self.storages.values_mut() {
            if storage.contains(source.index()) && !storage.clone_entry(source.index(), copy.index()) {
                skipped += 1;
                log::trace!("Registry: {} is not cloneable; skipped", storage.name());
            }
        }
        log::debug!("Registry: cloned {source} into {copy} ({skipped} components skipped)");
        Ok(copy)
    }

    // ---- Queries ----

    /// Iterates over entities that have every component in `Q`.
    ///
    /// Iteration follows the dense order of the first component of `Q`.
    pub fn query<Q: Query>(&self) -> impl Iterator<Item = (Entity, Q::Item<'_>)> + '_ {
        Q::driver(self).unwrap_or(&[]).iter().filter_map(move |&index| {
            let entity = self.entities.entity_at_index(index)?;
            Q::fetch(self, index).map(|item| (entity, item))
        })
    }

    /// Entities matching `Q`, collected so the registry can be mutated
    /// while walking them.
    pub fn query_entities<Q: Query>(&self) -> Vec<Entity> {
        self.query::<Q>().map(|(entity, _)| entity).collect()
    }

    /// Looks up the alive entity in slot `index`.
    pub(crate) fn entity_at_index(&self, index: u32) -> Option<Entity> {
        self.entities.entity_at_index(index)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entities", &self.len())
            .field("component_types", &self.storages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Position(f32);
    impl Component for Position {
        const NAME: &'static str = "Position";
    }

    #[derive(Debug, PartialEq)]
    struct Gpu(u32);
    impl Component for Gpu {
        const NAME: &'static str = "Gpu";
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_cloneable::<Position>();
        registry.register::<Gpu>();
        registry
    }

    #[test]
    fn insert_requires_registration() {
        let mut registry = Registry::new();
        let entity = registry.spawn();
        assert_eq!(
            registry.insert(entity, Position(1.0)),
            Err(EcsError::Unregistered("Position"))
        );
    }

    #[test]
    fn insert_into_dead_entity_fails() {
        let mut registry = registry();
        let entity = registry.spawn();
        registry.despawn(entity);
        assert_eq!(registry.insert(entity, Position(1.0)), Err(EcsError::DeadEntity(entity)));
    }

    #[test]
    fn despawn_removes_components() {
        let mut registry = registry();
        let entity = registry.spawn();
        registry.insert(entity, Position(1.0)).unwrap();
        assert!(registry.despawn(entity));
        assert!(!registry.despawn(entity));

        let reused = registry.spawn();
        assert_eq!(reused.index(), entity.index());
        assert!(registry.get::<Position>(reused).is_none());
        assert!(registry.get::<Position>(entity).is_none());
    }

    #[test]
    fn clone_copies_only_cloneable_components() {
        let mut registry = registry();
        let source = registry.spawn();
        registry.insert(source, Position(3.0)).unwrap();
        registry.insert(source, Gpu(7)).unwrap();

        let copy = registry.clone_entity(source).unwrap();
        assert_ne!(copy, source);
        assert_eq!(registry.get::<Position>(copy), Some(&Position(3.0)));
        assert!(!registry.has::<Gpu>(copy));
        assert_eq!(registry.component_count(copy), 1);
    }

    #[test]
    fn query_requires_every_component() {
        let mut registry = registry();
        let a = registry.spawn();
        let b = registry.spawn();
        registry.insert(a, Position(1.0)).unwrap();
        registry.insert(a, Gpu(1)).unwrap();
        registry.insert(b, Position(2.0)).unwrap();

        let both: Vec<_> = registry.query::<(Position, Gpu)>().map(|(e, _)| e).collect();
        assert_eq!(both, vec![a]);
        assert_eq!(registry.query_entities::<(Position,)>(), vec![a, b]);
    }

    #[test]
    fn clear_keeps_registrations() {
        let mut registry = registry();
        let entity = registry.spawn();
        registry.insert(entity, Position(1.0)).unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.is_registered::<Position>());
    }
}
