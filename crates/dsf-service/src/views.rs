use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Type-indexed set of `Arc` handles onto one underlying value.
///
/// Each entry stores an `Arc<T>` for some (possibly unsized) `T`, so a service
/// can be found through `dyn RunControl` as well as through its concrete type,
/// and an event can be delivered to handlers of every trait it exposes.
#[derive(Default)]
pub(crate) struct ArcMap {
    entries: HashMap<TypeId, (&'static str, Box<dyn Any + Send + Sync>)>,
}

impl ArcMap {
    pub(crate) fn insert<T>(&mut self, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries.insert(
            TypeId::of::<T>(),
            (std::any::type_name::<T>(), Box::new(value)),
        );
    }

    pub(crate) fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|(_, value)| value.downcast_ref::<Arc<T>>())
            .cloned()
    }

    pub(crate) fn contains(&self, type_id: TypeId) -> bool {
        self.entries.contains_key(&type_id)
    }

    pub(crate) fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.values().map(|(name, _)| *name)
    }
}
