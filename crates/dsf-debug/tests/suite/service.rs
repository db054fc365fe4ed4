use std::sync::Arc;

use parking_lot::Mutex;

use dsf_concurrent::{DataRequestMonitor, DsfExecutor, ExecutorConfig, RequestMonitor};
use dsf_core::{DsfError, DsfResult, StatusCode};
use dsf_debug::{
    CachingService, CommandCache, DmEvent, MockCommand, MockCommandControl, ResumedEvent,
    StateChangeReason, SuspendedEvent,
};
use dsf_service::{
    DsfSession, EventHandlers, Properties, Registration, Service, ServiceId, SessionTable,
};

use super::{Fixture, WAIT};

/// A stack service: caches frame queries and invalidates them on run-control
/// events, the way real data-model services do.
struct StackService {
    cache: CommandCache<Arc<MockCommandControl>>,
    id: Mutex<Option<ServiceId>>,
    contexts_seen: Mutex<Vec<String>>,
}

trait Stack: Send + Sync {
    fn frames(&self, command: MockCommand, rm: DataRequestMonitor<String>);
}

impl Stack for StackService {
    fn frames(&self, command: MockCommand, rm: DataRequestMonitor<String>) {
        self.cache.execute(command, rm);
    }
}

impl Service for StackService {
    fn initialize(self: Arc<Self>, session: &DsfSession, rm: RequestMonitor) {
        let registration = Registration::new(self.clone())
            .capability::<dyn Stack>(self.clone())
            .capability::<dyn CachingService>(Arc::new(self.cache.clone()));
        match session.register_service(registration) {
            Ok(id) => {
                *self.id.lock() = Some(id);
                rm.done();
            }
            Err(err) => rm.done_with_status(err.to_status()),
        }
    }

    fn shutdown(self: Arc<Self>, session: &DsfSession, rm: RequestMonitor) {
        if let Some(id) = self.id.lock().take() {
            let _ = session.unregister_service(id);
        }
        rm.done();
    }

    fn event_handlers(self: Arc<Self>) -> EventHandlers {
        let resumed = self.clone();
        let suspended = self.clone();
        EventHandlers::new()
            .on::<ResumedEvent, _>(move |event| {
                resumed.cache.on_resumed(&event.context, event.reason)
            })
            .on::<SuspendedEvent, _>(move |event| {
                suspended.cache.on_suspended(&event.context, event.reason)
            })
            .on::<dyn DmEvent, _>(move |event| {
                self.contexts_seen.lock().push(event.dm_context().to_string())
            })
    }
}

fn frames(session: &DsfSession, command: MockCommand) -> DsfResult<String> {
    let s = session.clone();
    session
        .query(move |rm: DataRequestMonitor<String>| {
            match s.registry().get_service::<dyn Stack>() {
                Ok(stack) => stack.frames(command, rm),
                Err(err) => rm.done_with_status(err.to_status()),
            }
        })
        .unwrap()
        .get_timeout(WAIT)
}

#[test]
fn run_control_events_drive_cache_invalidation() {
    let table = SessionTable::new();
    let executor = DsfExecutor::new(ExecutorConfig::default()).unwrap();
    let session = table.start_session(&executor, "stack").unwrap();
    let fx = Fixture::with_executor(executor.clone(), session.id());

    let service = Arc::new(StackService {
        cache: fx.cache.clone(),
        id: Mutex::new(None),
        contexts_seen: Mutex::new(Vec::new()),
    });
    let svc = service.clone();
    let s = session.clone();
    let status = session
        .query(move |rm: DataRequestMonitor<()>| svc.initialize(&s, rm))
        .unwrap()
        .get_timeout(WAIT);
    assert_eq!(status, Ok(()));

    let command = fx.command(&fx.thread1, "frames");
    assert_eq!(frames(&session, command.clone()), Ok("frames #1".to_owned()));
    assert_eq!(frames(&session, command.clone()), Ok("frames #1".to_owned()));

    session
        .dispatch_event(
            ResumedEvent::new(fx.thread1.clone(), StateChangeReason::User),
            Properties::new(),
        )
        .unwrap();
    match frames(&session, command.clone()) {
        Err(DsfError::Failed(status)) => assert_eq!(status.code(), StatusCode::TargetBusy),
        other => panic!("expected TargetBusy, got {other:?}"),
    }

    session
        .dispatch_event(
            SuspendedEvent::new(fx.thread1.clone(), StateChangeReason::Breakpoint),
            Properties::new(),
        )
        .unwrap();
    assert_eq!(frames(&session, command), Ok("frames #2".to_owned()));
    assert_eq!(fx.control.issued_count(), 2);
    assert_eq!(
        *service.contexts_seen.lock(),
        vec![fx.thread1.to_string(), fx.thread1.to_string()]
    );

    let flushed = {
        let s = session.clone();
        session
            .query(move |rm: DataRequestMonitor<bool>| {
                let flushed = s
                    .registry()
                    .get_service::<dyn CachingService>()
                    .map(|caching| caching.flush_cache(None))
                    .is_ok();
                rm.done_with_data(flushed)
            })
            .unwrap()
            .get_timeout(WAIT)
    };
    assert_eq!(flushed, Ok(true));
    assert!(fx.cache.is_empty());

    table.end_session(session.id()).unwrap();
}
