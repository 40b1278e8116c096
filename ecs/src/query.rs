use crate::component::Component;
use crate::registry::Registry;
use crate::sparse_set::SparseSet;

/// A tuple of component types fetched together by [`Registry::query`].
///
/// The first component drives iteration: entities are visited in the dense
/// order of its storage and skipped when any other component is missing.
/// Put the rarest component first for the shortest walk.
pub trait Query {
    type Item<'w>;

    /// Entity indices to visit, or `None` when the driving type was never
    /// registered.
    fn driver(registry: &Registry) -> Option<&[u32]>;

    /// Borrows the components of the entity in slot `index`.
    fn fetch(registry: &Registry, index: u32) -> Option<Self::Item<'_>>;
}

macro_rules! impl_query {
    ($first:ident $(, $rest:ident)*) => {
        impl<$first: Component, $($rest: Component),*> Query for ($first, $($rest,)*) {
            type Item<'w> = (&'w $first, $(&'w $rest,)*);

            fn driver(registry: &Registry) -> Option<&[u32]> {
                registry.storage::<$first>().map(SparseSet::entities)
            }

            fn fetch(registry: &Registry, index: u32) -> Option<Self::Item<'_>> {
                Some((
                    registry.storage::<$first>()?.get(index)?,
                    $(registry.storage::<$rest>()?.get(index)?,)*
                ))
            }
        }
    };
}

impl_query!(A);
impl_query!(A, B);
impl_query!(A, B, C);
impl_query!(A, B, C, D);
impl_query!(A, B, C, D, E);

#[cfg(test)]
mod tests {
    use crate::{Component, Registry};

    #[derive(Debug, PartialEq)]
    struct Light(u32);
    impl Component for Light {
        const NAME: &'static str = "Light";
    }

    #[derive(Debug, PartialEq)]
    struct Active;
    impl Component for Active {
        const NAME: &'static str = "Active";
    }

    #[derive(Debug, PartialEq)]
    struct Unused;
    impl Component for Unused {
        const NAME: &'static str = "Unused";
    }

    #[test]
    fn iteration_follows_first_component_order() {
        let mut registry = Registry::new();
        registry.register::<Light>();
        registry.register::<Active>();

        let entities: Vec<_> = (0..4).map(|_| registry.spawn()).collect();
        for (i, &entity) in entities.iter().enumerate().rev() {
            registry.insert(entity, Light(i as u32)).unwrap();
            registry.insert(entity, Active).unwrap();
        }

        let order: Vec<u32> = registry
            .query::<(Light, Active)>()
            .map(|(_, (light, _))| light.0)
            .collect();
        assert_eq!(order, vec![3, 2, 1, 0]);
    }

    #[test]
    fn unregistered_driver_yields_nothing() {
        let registry = Registry::new();
        assert_eq!(registry.query::<(Unused,)>().count(), 0);
    }

    #[test]
    fn dead_entities_are_skipped() {
        let mut registry = Registry::new();
        registry.register::<Light>();
        let a = registry.spawn();
        let b = registry.spawn();
        registry.insert(a, Light(0)).unwrap();
        registry.insert(b, Light(1)).unwrap();
        registry.despawn(a);

        let found: Vec<_> = registry.query::<(Light,)>().map(|(e, _)| e).collect();
        assert_eq!(found, vec![b]);
    }
}
