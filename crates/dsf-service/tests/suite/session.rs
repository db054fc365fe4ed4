use std::sync::Arc;

use parking_lot::Mutex;

use dsf_concurrent::{DsfExecutor, ExecutorConfig};
use dsf_core::{DsfError, SessionId};
use dsf_service::{
    end_session, get_session, is_session_active, start_session, Properties, Service,
    SessionLifecycleEvent, SessionState, SessionTable,
};

use super::{new_session, on_executor, run_async, Counter, CounterService, Ping};

#[test]
fn one_session_per_executor() {
    let table = SessionTable::new();
    let executor = DsfExecutor::new(ExecutorConfig::default()).unwrap();
    let session = table.start_session(&executor, "first").unwrap();

    assert_eq!(
        table.start_session(&executor, "second").unwrap_err(),
        DsfError::ExecutorInUse(session.id())
    );
    table.end_session(session.id()).unwrap();
}

#[test]
fn sessions_are_listed_and_found_by_id() {
    let table = SessionTable::new();
    let a = new_session(&table, "a");
    let b = new_session(&table, "b");

    assert_ne!(a.id(), b.id());
    assert_eq!(table.get_session(b.id()), Some(b.clone()));
    assert_eq!(
        table.sessions().iter().map(|s| s.name().to_owned()).collect::<Vec<_>>(),
        vec!["a", "b"]
    );

    table.end_session(a.id()).unwrap();
    table.end_session(b.id()).unwrap();
    assert!(table.sessions().is_empty());
}

#[test]
fn ended_session_rejects_work_and_drops_services() {
    let table = SessionTable::new();
    let session = new_session(&table, "ending");
    let log = Arc::new(Mutex::new(Vec::new()));
    let service = CounterService::new("1", &log);

    let svc = service.clone();
    assert!(run_async(&session, move |s, rm| svc.initialize(s, rm)).is_ok());
    assert!(on_executor(&session, |s| s.registry().get_service::<dyn Counter>().is_ok()));

    let id = session.id();
    table.end_session(id).unwrap();

    assert_eq!(session.state(), SessionState::Ended);
    assert!(!table.is_session_active(id));
    assert!(table.get_session(id).is_none());
    assert!(session.registry().is_empty());
    assert!(session.events().is_empty());
    assert_eq!(session.execute(|| {}), Err(DsfError::SessionEnded(id)));
    assert_eq!(
        session.dispatch_event(Ping(1), Properties::new()),
        Err(DsfError::SessionEnded(id))
    );
    assert!(session.executor().is_shutdown());
    assert_eq!(table.end_session(id), Err(DsfError::SessionNotFound(id)));
}

#[test]
fn ending_an_unknown_session_fails() {
    let table = SessionTable::new();
    let id = SessionId::new(4242);
    assert_eq!(table.end_session(id), Err(DsfError::SessionNotFound(id)));
}

#[test]
fn shut_down_executor_cannot_back_a_session() {
    let table = SessionTable::new();
    let executor = DsfExecutor::new(ExecutorConfig::default()).unwrap();
    executor.shutdown();
    assert_eq!(
        table.start_session(&executor, "late").unwrap_err(),
        DsfError::Rejected
    );
}

#[test]
fn lifecycle_notifications_are_broadcast() {
    let table = SessionTable::new();
    let mut events = table.subscribe();

    let session = new_session(&table, "observed");
    let id = session.id();
    table.end_session(id).unwrap();

    assert_eq!(events.try_recv().unwrap(), SessionLifecycleEvent::Started(id));
    assert_eq!(events.try_recv().unwrap(), SessionLifecycleEvent::Ended(id));
    assert!(events.try_recv().is_err());
}

#[test]
fn sessions_can_be_ended_from_their_own_executor() {
    let table = Arc::new(SessionTable::new());
    let session = new_session(&table, "self-ending");
    let id = session.id();

    let t = table.clone();
    let (tx, rx) = std::sync::mpsc::channel();
    session
        .execute(move || tx.send(t.end_session(id)).unwrap())
        .unwrap();

    assert_eq!(rx.recv_timeout(super::WAIT).unwrap(), Ok(()));
    assert_eq!(session.state(), SessionState::Ended);
}

#[test]
fn process_wide_table() {
    let executor = DsfExecutor::new(ExecutorConfig::default()).unwrap();
    let session = start_session(&executor, "global").unwrap();
    let id = session.id();

    assert!(is_session_active(id));
    assert_eq!(get_session(id).map(|s| s.id()), Some(id));

    end_session(id).unwrap();
    assert!(!is_session_active(id));
    assert_eq!(end_session(id), Err(DsfError::SessionNotFound(id)));
}
