use std::sync::Arc;

use dsf_concurrent::RequestMonitor;

use crate::events::EventHandlers;
use crate::session::DsfSession;

/// A component that lives inside a [`DsfSession`].
///
/// `initialize` typically registers the service through
/// [`DsfSession::register_service`] and `shutdown` unregisters it. Both are
/// invoked on the session executor and must complete `rm` exactly once.
pub trait Service: Send + Sync + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn initialize(self: Arc<Self>, session: &DsfSession, rm: RequestMonitor);

    fn shutdown(self: Arc<Self>, session: &DsfSession, rm: RequestMonitor);

    /// Event handlers subscribed on the session's bus for as long as the
    /// service stays registered.
    fn event_handlers(self: Arc<Self>) -> EventHandlers {
        EventHandlers::new()
    }
}
