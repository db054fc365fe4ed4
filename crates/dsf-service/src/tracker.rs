use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::properties::PropertyFilter;
use crate::registry::ServiceId;
use crate::session::DsfSession;

type CachedService = (ServiceId, Box<dyn Any + Send + Sync>);

/// Caches service lookups for one session.
///
/// Like the registry it wraps, a tracker must only be used on the session
/// executor. A cached handle is dropped as soon as its service is
/// unregistered, and every lookup fails once the session has ended.
pub struct ServicesTracker {
    session: DsfSession,
    cache: Mutex<HashMap<(TypeId, PropertyFilter), CachedService>>,
}

impl ServicesTracker {
    pub fn new(session: &DsfSession) -> Self {
        Self {
            session: session.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn session(&self) -> &DsfSession {
        &self.session
    }

    pub fn get_service<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get_service_with::<T>(&PropertyFilter::any())
    }

    pub fn get_service_with<T>(&self, filter: &PropertyFilter) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if !self.session.is_active() {
            return None;
        }

        let key = (TypeId::of::<T>(), filter.clone());
        let registry = self.session.registry();
        {
            let mut cache = self.cache.lock();
            if let Some((id, service)) = cache.get(&key) {
                if registry.is_registered(*id) {
                    return service.downcast_ref::<Arc<T>>().cloned();
                }
                cache.remove(&key);
            }
        }

        match registry.lookup::<T>(filter) {
            Ok(Some((id, service))) => {
                self.cache
                    .lock()
                    .insert(key, (id, Box::new(service.clone())));
                Some(service)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::debug!(
                    target: "dsf.registry",
                    session = %self.session.id(),
                    service = std::any::type_name::<T>(),
                    error = %err,
                    "tracked service lookup failed"
                );
                None
            }
        }
    }

    /// Releases every cached handle.
    pub fn dispose(&self) {
        self.cache.lock().clear();
    }
}
