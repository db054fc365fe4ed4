use std::sync::Arc;

use parking_lot::Mutex;

use dsf_core::DsfError;
use dsf_service::{PropertyFilter, Service, ServicesTracker, SessionTable};

use super::{new_session, on_executor, run_async, Counter, CounterService};

#[test]
fn lookup_by_capability_and_concrete_type() {
    let table = SessionTable::new();
    let session = new_session(&table, "lookup");
    let log = Arc::new(Mutex::new(Vec::new()));
    let service = CounterService::new("1", &log);

    let svc = service.clone();
    assert!(run_async(&session, move |s, rm| svc.initialize(s, rm)).is_ok());

    let (by_trait, by_type, as_service) = on_executor(&session, |s| {
        let registry = s.registry();
        (
            registry.get_service::<dyn Counter>().map(|c| c.instance().to_owned()),
            registry.get_service::<CounterService>().is_ok(),
            registry.get_service::<dyn Service>().map(|svc| svc.name().to_owned()),
        )
    });
    assert_eq!(by_trait, Ok("1".to_owned()));
    assert!(by_type);
    assert_eq!(as_service, Ok("1".to_owned()));

    table.end_session(session.id()).unwrap();
}

#[test]
fn unregistered_service_is_not_found() {
    let table = SessionTable::new();
    let session = new_session(&table, "unregister");
    let log = Arc::new(Mutex::new(Vec::new()));
    let service = CounterService::new("1", &log);

    let svc = service.clone();
    assert!(run_async(&session, move |s, rm| svc.initialize(s, rm)).is_ok());
    let svc = service.clone();
    assert!(run_async(&session, move |s, rm| svc.shutdown(s, rm)).is_ok());

    let result = on_executor(&session, |s| s.registry().get_service::<dyn Counter>().err());
    assert!(matches!(result, Some(DsfError::ServiceNotFound(name)) if name.contains("Counter")));

    table.end_session(session.id()).unwrap();
}

#[test]
fn property_filter_distinguishes_instances() {
    let table = SessionTable::new();
    let session = new_session(&table, "instances");
    let log = Arc::new(Mutex::new(Vec::new()));
    let first = CounterService::new("1", &log);
    let second = CounterService::new("2", &log);

    for service in [first.clone(), second.clone()] {
        assert!(run_async(&session, move |s, rm| service.initialize(s, rm)).is_ok());
    }

    let (all, one, two, missing) = on_executor(&session, |s| {
        let registry = s.registry();
        let instances = |filter: PropertyFilter| {
            registry
                .get_services::<dyn Counter>(&filter)
                .unwrap()
                .iter()
                .map(|c| c.instance().to_owned())
                .collect::<Vec<_>>()
        };
        (
            instances(PropertyFilter::any().present("instance-id")),
            instances(PropertyFilter::any().eq("instance-id", "1")),
            registry
                .get_service_with::<dyn Counter>(&PropertyFilter::any().eq("instance-id", "2"))
                .map(|c| c.instance().to_owned()),
            registry
                .get_service_with::<dyn Counter>(&PropertyFilter::any().eq("instance-id", "3"))
                .is_err(),
        )
    });

    assert_eq!(all, vec!["1", "2"]);
    assert_eq!(one, vec!["1"]);
    assert_eq!(two, Ok("2".to_owned()));
    assert!(missing);

    table.end_session(session.id()).unwrap();
}

#[test]
fn lookups_off_the_executor_thread_are_rejected() {
    let table = SessionTable::new();
    let session = new_session(&table, "wrong-thread");
    assert_eq!(
        session.registry().get_service::<dyn Counter>().err(),
        Some(DsfError::WrongThread)
    );
    table.end_session(session.id()).unwrap();
}

#[test]
fn tracker_caches_until_the_service_goes_away() {
    let table = SessionTable::new();
    let session = new_session(&table, "tracker");
    let log = Arc::new(Mutex::new(Vec::new()));
    let service = CounterService::new("1", &log);

    let svc = service.clone();
    assert!(run_async(&session, move |s, rm| svc.initialize(s, rm)).is_ok());

    let tracker = Arc::new(ServicesTracker::new(&session));
    let t = tracker.clone();
    let (first, second) = on_executor(&session, move |_| {
        let first = t.get_service::<dyn Counter>().map(|c| c.instance().to_owned());
        let second = t.get_service::<dyn Counter>().map(|c| c.instance().to_owned());
        (first, second)
    });
    assert_eq!(first.as_deref(), Some("1"));
    assert_eq!(second.as_deref(), Some("1"));

    let svc = service.clone();
    assert!(run_async(&session, move |s, rm| svc.shutdown(s, rm)).is_ok());
    let t = tracker.clone();
    assert!(on_executor(&session, move |_| t.get_service::<dyn Counter>().is_none()));

    table.end_session(session.id()).unwrap();
    assert!(tracker.get_service::<dyn Counter>().is_none());
}
