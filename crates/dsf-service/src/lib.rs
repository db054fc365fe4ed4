//! Sessions, services and events.
//!
//! A [`DsfSession`] ties together one executor, one [`ServiceRegistry`] and
//! one [`EventBus`]. Services implement [`Service`], publish themselves with a
//! [`Registration`] (capabilities plus string properties) and find each other
//! through registry lookups on the session executor. Live sessions are kept
//! in a process-wide [`SessionTable`].

mod events;
mod properties;
mod registry;
mod service;
mod session;
mod startup;
mod tracker;
mod views;

pub use events::{DsfEvent, EventBus, EventHandlers, EventViews, SubscriptionId};
pub use properties::{properties, Properties, PropertyFilter};
pub use registry::{Registration, ServiceId, ServiceRegistry};
pub use service::Service;
pub use session::{DsfSession, SessionLifecycleEvent, SessionState, SessionTable};
pub use startup::{shutdown_sequence, startup_sequence};
pub use tracker::ServicesTracker;

use dsf_concurrent::DsfExecutor;
use dsf_core::{DsfResult, SessionId};

/// Starts a session in the process-wide [`SessionTable`].
pub fn start_session(executor: &DsfExecutor, name: impl Into<String>) -> DsfResult<DsfSession> {
    SessionTable::global().start_session(executor, name)
}

/// Ends a session in the process-wide [`SessionTable`].
pub fn end_session(id: SessionId) -> DsfResult<()> {
    SessionTable::global().end_session(id)
}

pub fn get_session(id: SessionId) -> Option<DsfSession> {
    SessionTable::global().get_session(id)
}

pub fn is_session_active(id: SessionId) -> bool {
    SessionTable::global().is_session_active(id)
}
