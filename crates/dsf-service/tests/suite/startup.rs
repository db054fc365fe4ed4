use std::sync::Arc;

use parking_lot::Mutex;

use dsf_concurrent::RequestMonitor;
use dsf_core::StatusCode;
use dsf_service::{shutdown_sequence, startup_sequence, DsfSession, Service, SessionTable};

use super::{new_session, on_executor, run_async, Counter, CounterService};

fn services(list: &[Arc<CounterService>]) -> Vec<Arc<dyn Service>> {
    list.iter()
        .map(|service| service.clone() as Arc<dyn Service>)
        .collect()
}

fn start(session: &DsfSession, list: Vec<Arc<dyn Service>>) -> dsf_core::Status {
    run_async(session, move |s, rm: RequestMonitor| {
        startup_sequence(s, list, rm).start().unwrap();
    })
}

#[test]
fn services_start_in_order_and_stop_in_reverse() {
    let table = SessionTable::new();
    let session = new_session(&table, "startup");
    let log = Arc::new(Mutex::new(Vec::new()));
    let all = [
        CounterService::new("a", &log),
        CounterService::new("b", &log),
        CounterService::new("c", &log),
    ];

    assert!(start(&session, services(&all)).is_ok());
    assert_eq!(on_executor(&session, |s| s.registry().len()), 3);

    let list = services(&all);
    let status = run_async(&session, move |s, rm| {
        shutdown_sequence(s, list, rm).start().unwrap();
    });
    assert!(status.is_ok());
    assert_eq!(
        *log.lock(),
        vec![
            "initialize a",
            "initialize b",
            "initialize c",
            "shutdown c",
            "shutdown b",
            "shutdown a"
        ]
    );
    assert!(on_executor(&session, |s| s.registry().is_empty()));
    table.end_session(session.id()).unwrap();
}

#[test]
fn failed_startup_shuts_down_what_was_started() {
    let table = SessionTable::new();
    let session = new_session(&table, "rollback");
    let log = Arc::new(Mutex::new(Vec::new()));
    let all = [
        CounterService::new("a", &log),
        CounterService::failing("b", &log),
        CounterService::new("c", &log),
    ];

    let status = start(&session, services(&all));
    assert_eq!(status.code(), StatusCode::RequestFailed);
    assert_eq!(
        *log.lock(),
        vec!["initialize a", "initialize b", "shutdown b", "shutdown a"]
    );
    assert!(on_executor(&session, |s| s
        .registry()
        .get_service::<dyn Counter>()
        .is_err()));
    table.end_session(session.id()).unwrap();
}
