use std::any::{Any, TypeId};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use dsf_concurrent::DsfExecutor;
use dsf_core::{panic_payload_to_str, DsfError, DsfResult};

use crate::properties::{Properties, PropertyFilter};
use crate::registry::ServiceId;
use crate::views::ArcMap;

/// An event published on a session's [`EventBus`].
///
/// Handlers subscribe either to the concrete event type or to any view the
/// event exposes through [`views`](DsfEvent::views). Every event is also
/// visible as `dyn DsfEvent`.
pub trait DsfEvent: Any + Send + Sync + fmt::Debug {
    /// Adds the trait-object views under which handlers can receive this
    /// event, e.g. `views.add::<dyn DmEvent>(self)`.
    fn views(self: Arc<Self>, views: &mut EventViews) {
        let _ = views;
    }
}

/// The set of types an event being dispatched can be received as.
#[derive(Default)]
pub struct EventViews {
    map: ArcMap,
}

impl EventViews {
    pub fn add<T>(&mut self, view: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.map.insert(view);
    }

    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.map.get::<T>()
    }

    fn for_event<E: DsfEvent>(event: E) -> Self {
        let event = Arc::new(event);
        let mut views = Self::default();
        views.add::<E>(event.clone());
        views.add::<dyn DsfEvent>(event.clone());
        event.views(&mut views);
        views
    }
}

impl fmt::Debug for EventViews {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.map.type_names()).finish()
    }
}

type ErasedHandler = Arc<dyn Fn(&EventViews) + Send + Sync>;

struct HandlerSpec {
    event_type: TypeId,
    event_name: &'static str,
    filter: PropertyFilter,
    handler: ErasedHandler,
}

impl HandlerSpec {
    fn new<E, F>(filter: PropertyFilter, handler: F) -> Self
    where
        E: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<E>) + Send + Sync + 'static,
    {
        Self {
            event_type: TypeId::of::<E>(),
            event_name: std::any::type_name::<E>(),
            filter,
            handler: Arc::new(move |views: &EventViews| {
                if let Some(event) = views.get::<E>() {
                    handler(event);
                }
            }),
        }
    }
}

/// The event handlers a service declares; subscribed when the service is
/// registered and removed when it is unregistered.
#[derive(Default)]
pub struct EventHandlers {
    specs: Vec<HandlerSpec>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles every event that can be viewed as `E`.
    pub fn on<E, F>(self, handler: F) -> Self
    where
        E: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<E>) + Send + Sync + 'static,
    {
        self.on_filtered(PropertyFilter::any(), handler)
    }

    /// Handles events viewable as `E` whose source properties match `filter`.
    pub fn on_filtered<E, F>(mut self, filter: PropertyFilter, handler: F) -> Self
    where
        E: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<E>) + Send + Sync + 'static,
    {
        self.specs.push(HandlerSpec::new::<E, F>(filter, handler));
        self
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.specs.iter().map(|spec| spec.event_name))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    owner: Option<ServiceId>,
    spec: HandlerSpec,
}

/// Per-session typed publish/subscribe dispatcher.
///
/// Subscriptions and dispatch are confined to the session's executor thread.
/// Handlers run synchronously in registration order and must not block. The
/// subscriber list is snapshotted when a dispatch starts, so subscribing or
/// unsubscribing from inside a handler only affects later dispatches.
pub struct EventBus {
    executor: DsfExecutor,
    subscriptions: Mutex<Vec<Arc<Subscription>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub(crate) fn new(executor: DsfExecutor) -> Self {
        Self {
            executor,
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn check_thread(&self, operation: &'static str) -> DsfResult<()> {
        if self.executor.is_in_executor_thread() {
            return Ok(());
        }
        tracing::error!(
            target: "dsf.events",
            operation,
            executor = %self.executor.name(),
            "event bus used outside of its session executor"
        );
        Err(DsfError::WrongThread)
    }

    pub fn subscribe<E, F>(&self, handler: F) -> DsfResult<SubscriptionId>
    where
        E: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<E>) + Send + Sync + 'static,
    {
        self.subscribe_filtered(PropertyFilter::any(), handler)
    }

    /// Subscribes to events viewable as `E` that were dispatched with source
    /// properties matching `filter`.
    pub fn subscribe_filtered<E, F>(
        &self,
        filter: PropertyFilter,
        handler: F,
    ) -> DsfResult<SubscriptionId>
    where
        E: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<E>) + Send + Sync + 'static,
    {
        self.check_thread("subscribe")?;
        Ok(self.push(None, HandlerSpec::new::<E, F>(filter, handler)))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> DsfResult<bool> {
        self.check_thread("unsubscribe")?;
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != id);
        Ok(subscriptions.len() != before)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, owner: Option<ServiceId>, spec: HandlerSpec) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .lock()
            .push(Arc::new(Subscription { id, owner, spec }));
        id
    }

    pub(crate) fn add_service_handlers(&self, owner: ServiceId, handlers: EventHandlers) {
        for spec in handlers.specs {
            self.push(Some(owner), spec);
        }
    }

    pub(crate) fn remove_service_handlers(&self, owner: ServiceId) {
        self.subscriptions
            .lock()
            .retain(|subscription| subscription.owner != Some(owner));
    }

    pub(crate) fn clear(&self) {
        self.subscriptions.lock().clear();
    }

    /// Delivers `event` to every matching handler, in registration order.
    ///
    /// `source` are the properties of the service that published the event;
    /// they are matched against each subscription's filter. Returns the
    /// number of handlers invoked.
    pub fn dispatch<E: DsfEvent>(&self, event: E, source: &Properties) -> DsfResult<usize> {
        self.check_thread("dispatch")?;

        let snapshot: Vec<Arc<Subscription>> = self.subscriptions.lock().clone();
        let views = EventViews::for_event(event);
        tracing::trace!(
            target: "dsf.events",
            event = std::any::type_name::<E>(),
            subscribers = snapshot.len(),
            "dispatching event"
        );

        let mut delivered = 0;
        for subscription in snapshot {
            let spec = &subscription.spec;
            if !views.map.contains(spec.event_type) || !spec.filter.matches(source) {
                continue;
            }
            delivered += 1;
            let result = catch_unwind(AssertUnwindSafe(|| (spec.handler)(&views)));
            if let Err(panic) = result {
                tracing::error!(
                    target: "dsf.events",
                    event = std::any::type_name::<E>(),
                    handler = spec.event_name,
                    panic = %panic_payload_to_str(panic.as_ref()),
                    "event handler panicked"
                );
            }
        }
        Ok(delivered)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("executor", &self.executor.name())
            .field("subscriptions", &self.len())
            .finish()
    }
}
