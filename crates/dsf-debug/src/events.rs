use std::sync::Arc;

use dsf_core::DmContext;
use dsf_service::{DsfEvent, EventViews};

/// Why an execution context stopped or started running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StateChangeReason {
    #[default]
    Unknown,
    User,
    Step,
    Breakpoint,
    Watchpoint,
    Signal,
    Exception,
    Container,
    Error,
}

/// An event about a specific debug entity.
pub trait DmEvent: Send + Sync {
    fn dm_context(&self) -> &DmContext;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumedEvent {
    pub context: DmContext,
    pub reason: StateChangeReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendedEvent {
    pub context: DmContext,
    pub reason: StateChangeReason,
}

impl ResumedEvent {
    pub fn new(context: DmContext, reason: StateChangeReason) -> Self {
        Self { context, reason }
    }
}

impl SuspendedEvent {
    pub fn new(context: DmContext, reason: StateChangeReason) -> Self {
        Self { context, reason }
    }
}

impl DmEvent for ResumedEvent {
    fn dm_context(&self) -> &DmContext {
        &self.context
    }
}

impl DmEvent for SuspendedEvent {
    fn dm_context(&self) -> &DmContext {
        &self.context
    }
}

impl DsfEvent for ResumedEvent {
    fn views(self: Arc<Self>, views: &mut EventViews) {
        views.add::<dyn DmEvent>(self);
    }
}

impl DsfEvent for SuspendedEvent {
    fn views(self: Arc<Self>, views: &mut EventViews) {
        views.add::<dyn DmEvent>(self);
    }
}
