use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use dsf_concurrent::{DataRequestMonitor, DsfExecutor, Query};
use dsf_core::{DsfError, DsfResult, SessionId};

use crate::events::{DsfEvent, EventBus};
use crate::properties::Properties;
use crate::registry::{Registration, ServiceId, ServiceRegistry};

const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Ended,
}

struct SessionInner {
    id: SessionId,
    name: String,
    executor: DsfExecutor,
    registry: ServiceRegistry,
    events: EventBus,
    state: RwLock<SessionState>,
}

/// The isolation boundary of one debug connection: one executor, one
/// service registry and one event bus.
///
/// Handles are cheap to clone. Code running outside the executor should hold
/// on to the [`SessionId`] and resolve the session through the
/// [`SessionTable`] when it needs it.
#[derive(Clone)]
pub struct DsfSession {
    inner: Arc<SessionInner>,
}

impl DsfSession {
    fn new(id: SessionId, name: String, executor: DsfExecutor) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                name,
                registry: ServiceRegistry::new(id, executor.clone()),
                events: EventBus::new(executor.clone()),
                executor,
                state: RwLock::new(SessionState::Active),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn executor(&self) -> &DsfExecutor {
        &self.inner.executor
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    fn ensure_active(&self) -> DsfResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DsfError::SessionEnded(self.inner.id))
        }
    }

    pub fn execute<F>(&self, task: F) -> DsfResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_active()?;
        self.inner.executor.execute(task)
    }

    pub fn schedule<F>(&self, delay: Duration, task: F) -> DsfResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_active()?;
        self.inner.executor.schedule(delay, task)
    }

    /// Submits `work` to the session executor and returns a [`Query`] the
    /// calling (non-executor) thread can block on.
    pub fn query<T, F>(&self, work: F) -> DsfResult<Query<T>>
    where
        T: Send + 'static,
        F: FnOnce(DataRequestMonitor<T>) + Send + 'static,
    {
        self.ensure_active()?;
        Ok(Query::new(&self.inner.executor, work))
    }

    /// Publishes a service in this session and subscribes its event handlers.
    ///
    /// Must be called on the session executor.
    pub fn register_service(&self, registration: Registration) -> DsfResult<ServiceId> {
        self.ensure_active()?;
        self.inner.registry.check_thread("register")?;
        let (id, handlers) = self.inner.registry.insert(registration);
        self.inner.events.add_service_handlers(id, handlers);
        Ok(id)
    }

    /// Removes a service and its event subscriptions. Returns `false` if the
    /// service was not registered.
    pub fn unregister_service(&self, id: ServiceId) -> DsfResult<bool> {
        self.inner.registry.check_thread("unregister")?;
        self.inner.events.remove_service_handlers(id);
        Ok(self.inner.registry.remove(id))
    }

    /// Schedules delivery of `event` on the session executor.
    ///
    /// `source` are the publishing service's properties; filtered
    /// subscriptions only see events whose source matches.
    pub fn dispatch_event<E: DsfEvent>(&self, event: E, source: Properties) -> DsfResult<()> {
        let session = self.clone();
        self.execute(move || {
            if !session.is_active() {
                return;
            }
            if let Err(err) = session.inner.events.dispatch(event, &source) {
                tracing::error!(
                    target: "dsf.events",
                    session = %session.inner.id,
                    error = %err,
                    "event dispatch failed"
                );
            }
        })
    }

    fn end(&self) {
        *self.inner.state.write() = SessionState::Ended;
        let services = self.inner.registry.clear();
        self.inner.events.clear();
        tracing::debug!(
            target: "dsf.session",
            session = %self.inner.id,
            services,
            "session services released"
        );
        self.inner.executor.shutdown();
    }
}

impl PartialEq for DsfSession {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for DsfSession {}

impl fmt::Debug for DsfSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DsfSession")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("executor", &self.inner.executor.name())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycleEvent {
    Started(SessionId),
    Ended(SessionId),
}

/// Maps session ids to live sessions.
///
/// This is the only structure shared across arbitrary threads; it is guarded
/// by a short-held lock. Most code uses the process-wide table through
/// [`SessionTable::global`] (or the free functions in the crate root).
pub struct SessionTable {
    sessions: Mutex<HashMap<SessionId, DsfSession>>,
    next_id: AtomicU64,
    lifecycle: broadcast::Sender<SessionLifecycleEvent>,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTable {
    pub fn new() -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            lifecycle,
        }
    }

    pub fn global() -> &'static SessionTable {
        static GLOBAL: OnceLock<SessionTable> = OnceLock::new();
        GLOBAL.get_or_init(SessionTable::new)
    }

    /// Creates a session bound to `executor`.
    ///
    /// An executor backs at most one live session; a second start fails with
    /// [`DsfError::ExecutorInUse`]. A shut down executor is rejected.
    pub fn start_session(
        &self,
        executor: &DsfExecutor,
        name: impl Into<String>,
    ) -> DsfResult<DsfSession> {
        if executor.is_shutdown() {
            return Err(DsfError::Rejected);
        }

        let session = {
            let mut sessions = self.sessions.lock();
            if let Some(existing) = sessions
                .values()
                .find(|session| session.executor().id() == executor.id())
            {
                return Err(DsfError::ExecutorInUse(existing.id()));
            }
            let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            let session = DsfSession::new(id, name.into(), executor.clone());
            sessions.insert(id, session.clone());
            session
        };

        tracing::info!(
            target: "dsf.session",
            session = %session.id(),
            name = %session.name(),
            executor = %executor.name(),
            "session started"
        );
        let _ = self
            .lifecycle
            .send(SessionLifecycleEvent::Started(session.id()));
        Ok(session)
    }

    /// Ends a session: it is removed from the table, its services and event
    /// subscriptions are dropped, and its executor is shut down so that no
    /// further work can be scheduled.
    pub fn end_session(&self, id: SessionId) -> DsfResult<()> {
        let session = self
            .sessions
            .lock()
            .remove(&id)
            .ok_or(DsfError::SessionNotFound(id))?;

        session.end();
        tracing::info!(target: "dsf.session", session = %id, "session ended");
        let _ = self.lifecycle.send(SessionLifecycleEvent::Ended(id));
        Ok(())
    }

    pub fn get_session(&self, id: SessionId) -> Option<DsfSession> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn is_session_active(&self, id: SessionId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    /// Live sessions ordered by id.
    pub fn sessions(&self) -> Vec<DsfSession> {
        let mut sessions: Vec<_> = self.sessions.lock().values().cloned().collect();
        sessions.sort_by_key(|session| session.id().as_u64());
        sessions
    }

    /// Notifications for sessions started or ended after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionLifecycleEvent> {
        self.lifecycle.subscribe()
    }
}

impl fmt::Debug for SessionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTable")
            .field("sessions", &self.sessions.lock().len())
            .finish()
    }
}
