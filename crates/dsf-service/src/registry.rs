use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use dsf_concurrent::DsfExecutor;
use dsf_core::{DsfError, DsfResult, SessionId};

use crate::events::EventHandlers;
use crate::properties::{Properties, PropertyFilter};
use crate::service::Service;
use crate::views::ArcMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(u64);

impl ServiceId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service-{}", self.0)
    }
}

/// Describes how a service is published in a session's registry.
///
/// The service is always reachable through its concrete type. Additional
/// capabilities (usually trait objects) are added with
/// [`capability`](Self::capability):
///
/// ```ignore
/// Registration::new(self.clone())
///     .capability::<dyn RunControl>(self.clone())
///     .property("instance-id", "1")
/// ```
pub struct Registration {
    name: String,
    capabilities: ArcMap,
    properties: Properties,
    handlers: EventHandlers,
}

impl Registration {
    pub fn new<S: Service>(service: Arc<S>) -> Self {
        let mut capabilities = ArcMap::default();
        capabilities.insert::<S>(service.clone());
        capabilities.insert::<dyn Service>(service.clone());
        Self {
            name: service.name().to_owned(),
            capabilities,
            properties: Properties::new(),
            handlers: service.event_handlers(),
        }
    }

    pub fn capability<T>(mut self, capability: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.capabilities.insert(capability);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("properties", &self.properties)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

struct Entry {
    id: ServiceId,
    name: String,
    capabilities: ArcMap,
    properties: Properties,
}

/// Per-session service directory.
///
/// Lookups are synchronous and only valid on the session executor thread;
/// calls from any other thread fail with [`DsfError::WrongThread`].
/// Registration order is preserved and decides which service a single-result
/// lookup returns when several match.
pub struct ServiceRegistry {
    session_id: SessionId,
    executor: DsfExecutor,
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl ServiceRegistry {
    pub(crate) fn new(session_id: SessionId, executor: DsfExecutor) -> Self {
        Self {
            session_id,
            executor,
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn check_thread(&self, operation: &'static str) -> DsfResult<()> {
        if self.executor.is_in_executor_thread() {
            return Ok(());
        }
        tracing::error!(
            target: "dsf.registry",
            session = %self.session_id,
            operation,
            "service registry used outside of its session executor"
        );
        Err(DsfError::WrongThread)
    }

    /// Adds the registration and hands back its event handlers so the caller
    /// can subscribe them.
    pub(crate) fn insert(&self, registration: Registration) -> (ServiceId, EventHandlers) {
        let id = ServiceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            target: "dsf.registry",
            session = %self.session_id,
            service = %registration.name,
            %id,
            properties = ?registration.properties,
            "service registered"
        );
        self.entries.lock().push(Entry {
            id,
            name: registration.name,
            capabilities: registration.capabilities,
            properties: registration.properties,
        });
        (id, registration.handlers)
    }

    pub(crate) fn remove(&self, id: ServiceId) -> bool {
        let mut entries = self.entries.lock();
        let Some(index) = entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        let entry = entries.remove(index);
        tracing::debug!(
            target: "dsf.registry",
            session = %self.session_id,
            service = %entry.name,
            %id,
            "service unregistered"
        );
        true
    }

    pub(crate) fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// The first service registered for capability `T`.
    pub fn get_service<T>(&self) -> DsfResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get_service_with::<T>(&PropertyFilter::any())
    }

    /// The first service registered for `T` whose properties match `filter`.
    ///
    /// A missing service is reported as [`DsfError::ServiceNotFound`]; callers
    /// should treat it as an unavailable feature.
    pub fn get_service_with<T>(&self, filter: &PropertyFilter) -> DsfResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup::<T>(filter)?
            .map(|(_, service)| service)
            .ok_or(DsfError::ServiceNotFound(std::any::type_name::<T>()))
    }

    /// Every service registered for `T` whose properties match `filter`, in
    /// registration order.
    pub fn get_services<T>(&self, filter: &PropertyFilter) -> DsfResult<Vec<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.check_thread("get_services")?;
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|entry| filter.matches(&entry.properties))
            .filter_map(|entry| entry.capabilities.get::<T>())
            .collect())
    }

    pub(crate) fn lookup<T>(
        &self,
        filter: &PropertyFilter,
    ) -> DsfResult<Option<(ServiceId, Arc<T>)>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.check_thread("get_service")?;
        Ok(self.entries.lock().iter().find_map(|entry| {
            if !filter.matches(&entry.properties) {
                return None;
            }
            entry.capabilities.get::<T>().map(|service| (entry.id, service))
        }))
    }

    pub fn is_registered(&self, id: ServiceId) -> bool {
        self.entries.lock().iter().any(|entry| entry.id == id)
    }

    /// Properties of a registered service, e.g. to tag events it publishes.
    pub fn properties_of(&self, id: ServiceId) -> Option<Properties> {
        self.entries
            .lock()
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.properties.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("ServiceRegistry")
            .field("session", &self.session_id)
            .field(
                "services",
                &entries.iter().map(|entry| entry.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
