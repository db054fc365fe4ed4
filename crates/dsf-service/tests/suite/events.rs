use std::sync::Arc;

use parking_lot::Mutex;

use dsf_service::{properties, DsfEvent, Properties, PropertyFilter, Service, SessionTable};

use super::{new_session, on_executor, run_async, CounterService, Ping};

#[derive(Debug)]
struct Tick;

impl DsfEvent for Tick {}

#[test]
fn service_handlers_follow_registration() {
    let table = SessionTable::new();
    let session = new_session(&table, "handlers");
    let log = Arc::new(Mutex::new(Vec::new()));
    let service = CounterService::new("1", &log);

    let svc = service.clone();
    assert!(run_async(&session, move |s, rm| svc.initialize(s, rm)).is_ok());
    session.dispatch_event(Ping(1), Properties::new()).unwrap();
    session.dispatch_event(Tick, Properties::new()).unwrap();

    let svc = service.clone();
    assert!(run_async(&session, move |s, rm| svc.shutdown(s, rm)).is_ok());
    session.dispatch_event(Ping(2), Properties::new()).unwrap();
    // Flush the executor queue.
    on_executor(&session, |_| ());

    assert_eq!(*service.seen.lock(), vec![1]);
    table.end_session(session.id()).unwrap();
}

#[test]
fn handlers_run_in_registration_order() {
    let table = SessionTable::new();
    let session = new_session(&table, "order");
    let order = Arc::new(Mutex::new(Vec::new()));

    let o = order.clone();
    on_executor(&session, move |s| {
        for label in ["first", "second", "third"] {
            let o = o.clone();
            s.events()
                .subscribe::<Ping, _>(move |_| o.lock().push(label))
                .unwrap();
        }
    });
    session.dispatch_event(Ping(0), Properties::new()).unwrap();
    on_executor(&session, |_| ());

    assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    table.end_session(session.id()).unwrap();
}

#[test]
fn handler_added_during_dispatch_misses_the_current_event() {
    let table = SessionTable::new();
    let session = new_session(&table, "snapshot");
    let late = Arc::new(Mutex::new(Vec::new()));

    let l = late.clone();
    on_executor(&session, move |s| {
        let bus_session = s.clone();
        s.events()
            .subscribe::<Ping, _>(move |_| {
                let l = l.clone();
                bus_session
                    .events()
                    .subscribe::<Ping, _>(move |ping| l.lock().push(ping.0))
                    .unwrap();
            })
            .unwrap();
    });

    session.dispatch_event(Ping(1), Properties::new()).unwrap();
    on_executor(&session, |_| ());
    assert!(late.lock().is_empty());

    session.dispatch_event(Ping(2), Properties::new()).unwrap();
    on_executor(&session, |_| ());
    assert_eq!(*late.lock(), vec![2]);

    table.end_session(session.id()).unwrap();
}

#[test]
fn handler_removed_during_dispatch_still_sees_the_current_event() {
    let table = SessionTable::new();
    let session = new_session(&table, "removal");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let victim = Arc::new(Mutex::new(None));

    let (s2, v) = (seen.clone(), victim.clone());
    on_executor(&session, move |s| {
        let bus_session = s.clone();
        let v_remove = v.clone();
        s.events()
            .subscribe::<Ping, _>(move |_| {
                if let Some(id) = v_remove.lock().take() {
                    bus_session.events().unsubscribe(id).unwrap();
                }
            })
            .unwrap();
        let id = s
            .events()
            .subscribe::<Ping, _>(move |ping| s2.lock().push(ping.0))
            .unwrap();
        *v.lock() = Some(id);
    });

    session.dispatch_event(Ping(1), Properties::new()).unwrap();
    session.dispatch_event(Ping(2), Properties::new()).unwrap();
    on_executor(&session, |_| ());

    assert_eq!(*seen.lock(), vec![1]);
    table.end_session(session.id()).unwrap();
}

#[test]
fn filtered_subscription_only_sees_matching_sources() {
    let table = SessionTable::new();
    let session = new_session(&table, "filtered");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s2 = seen.clone();
    on_executor(&session, move |s| {
        s.events()
            .subscribe_filtered::<Ping, _>(
                PropertyFilter::any().eq("instance-id", "2"),
                move |ping| s2.lock().push(ping.0),
            )
            .unwrap();
    });

    session
        .dispatch_event(Ping(1), properties([("instance-id", "1")]))
        .unwrap();
    session
        .dispatch_event(Ping(2), properties([("instance-id", "2")]))
        .unwrap();
    session.dispatch_event(Ping(3), Properties::new()).unwrap();
    on_executor(&session, |_| ());

    assert_eq!(*seen.lock(), vec![2]);
    table.end_session(session.id()).unwrap();
}

#[test]
fn registered_service_events_can_be_tagged_with_its_properties() {
    let table = SessionTable::new();
    let session = new_session(&table, "tagged");
    let log = Arc::new(Mutex::new(Vec::new()));
    let service = CounterService::new("7", &log);
    let svc = service.clone();
    assert!(run_async(&session, move |s, rm| svc.initialize(s, rm)).is_ok());

    let id = (*service.id.lock()).expect("service registered");
    let props = on_executor(&session, move |s| s.registry().properties_of(id));
    assert_eq!(props, Some(properties([("instance-id", "7")])));

    table.end_session(session.id()).unwrap();
}
