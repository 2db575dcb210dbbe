//! End-to-End tests for event dispatch.
//!
//! These tests drive the public bus API the way collaborators do and verify
//! delivery order, request outcomes, owner binding, filters and queueing.
//!
//! Handlers record into a shared journal so each test can assert exactly
//! which handlers ran and in which order.

use automation_events::{
    handler_fn, Descriptors, Event, EventBus, EventError, EventHandler, HandlerError, Outcome,
    Owner, SubscribeOptions,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Shared record of handler activity.
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Handler that records its start and end around a yield, then answers `outcome`.
fn recorder(journal: &Journal, label: &'static str, outcome: Outcome) -> impl EventHandler + 'static {
    let journal = journal.clone();
    handler_fn(move |_, _| {
        let journal = journal.clone();
        let outcome = outcome.clone();
        async move {
            journal.record(format!("{label}:start"));
            tokio::task::yield_now().await;
            journal.record(format!("{label}:end"));
            Ok(outcome)
        }
    })
}

/// Handler that records only that it ran.
fn marker(journal: &Journal, label: &'static str) -> impl EventHandler + 'static {
    let journal = journal.clone();
    handler_fn(move |_, _| {
        let journal = journal.clone();
        async move {
            journal.record(label);
            Ok(Outcome::Continue)
        }
    })
}

#[tokio::test]
async fn test_sync_handlers_run_newest_first_one_at_a_time() {
    let bus = EventBus::new();
    let journal = Journal::default();
    bus.on("await step", recorder(&journal, "a", Outcome::Continue)).unwrap();
    bus.on("await step", recorder(&journal, "b", Outcome::Continue)).unwrap();
    bus.on("await step", recorder(&journal, "c", Outcome::Continue)).unwrap();

    bus.notify_now("step", ()).await.unwrap();

    assert_eq!(
        journal.entries(),
        vec!["c:start", "c:end", "b:start", "b:end", "a:start", "a:end"]
    );
}

#[tokio::test]
async fn test_all_continue_resolves_continue() {
    let bus = EventBus::new();
    let journal = Journal::default();
    bus.on("await check", recorder(&journal, "sync", Outcome::Continue)).unwrap();
    bus.on("check", recorder(&journal, "async", Outcome::Continue)).unwrap();

    assert_eq!(bus.emit("check", ()).await.unwrap(), Outcome::Continue);
    assert_eq!(journal.entries().len(), 4);
}

#[tokio::test]
async fn test_cancel_stops_later_handlers() {
    let bus = EventBus::new();
    let journal = Journal::default();
    bus.on("await x", marker(&journal, "older")).unwrap();
    bus.on("x", marker(&journal, "async")).unwrap();
    bus.on("await x", recorder(&journal, "veto", Outcome::Cancelled)).unwrap();

    assert_eq!(bus.emit("x", ()).await.unwrap(), Outcome::Cancelled);
    bus.idle().await;
    tokio::task::yield_now().await;

    assert_eq!(journal.entries(), vec!["veto:start", "veto:end"]);
}

#[tokio::test]
async fn test_older_canceller_runs_after_newer_handlers() {
    let bus = EventBus::new();
    let journal = Journal::default();
    bus.on("await x", recorder(&journal, "h1", Outcome::Cancelled)).unwrap();
    bus.on("await x", marker(&journal, "h2")).unwrap();

    assert_eq!(bus.emit("x", ()).await.unwrap(), Outcome::Cancelled);
    assert_eq!(journal.entries(), vec!["h2", "h1:start", "h1:end"]);
}

#[tokio::test]
async fn test_bound_subscriber_requires_identical_source() {
    let bus = EventBus::new();
    let journal = Journal::default();
    let mine = Arc::new("mine");
    let other = Arc::new("mine");
    let owner = Owner::of(&mine);

    bus.on_bound("this await ping", marker(&journal, "bound"), &owner)
        .unwrap();

    bus.emit_now("ping", ()).await.unwrap();
    bus.emit_now("ping", Owner::of(&other)).await.unwrap();
    assert!(journal.entries().is_empty());

    bus.emit_now("ping", (&owner, "hello")).await.unwrap();
    assert_eq!(journal.entries(), vec!["bound"]);
}

#[tokio::test]
async fn test_unsubscribed_handler_receives_nothing() {
    let bus = EventBus::new();
    let journal = Journal::default();
    let subscription = bus.on("await tick", marker(&journal, "tick")).unwrap();

    bus.notify_now("tick", ()).await.unwrap();
    subscription.unsubscribe();
    subscription.unsubscribe();
    bus.notify_now("tick", ()).await.unwrap();
    bus.notify("tick", ()).unwrap();
    bus.idle().await;

    assert_eq!(journal.entries(), vec!["tick"]);
}

#[tokio::test]
async fn test_regex_filter_on_descriptor_captures_match() {
    let bus = EventBus::new();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    bus.on(
        "await scan/d[/foo/i]",
        handler_fn(move |_, captures| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(captures);
                Ok(Outcome::Continue)
            }
        }),
    )
    .unwrap();

    bus.notify_now("scan", Descriptors::single("d", "xFooY"))
        .await
        .unwrap();
    bus.notify_now("scan", Descriptors::single("e", "xFooY"))
        .await
        .unwrap();
    bus.notify_now("scan", "xFooY").await.unwrap();

    assert_eq!(*captured.lock().unwrap(), vec![vec!["Foo".to_string()]]);
}

#[tokio::test]
async fn test_payload_filter() {
    let bus = EventBus::new();
    let journal = Journal::default();
    bus.on("await exited[code != 0]", marker(&journal, "failed"))
        .unwrap();

    bus.notify_now("exited", json!({ "code": 0 })).await.unwrap();
    bus.notify_now("exited", json!({ "code": 3 })).await.unwrap();
    // Names the payload does not define never match
    bus.notify_now("exited", ()).await.unwrap();
    bus.notify_now("exited", json!({ "signal": 9 })).await.unwrap();

    assert_eq!(journal.entries(), vec!["failed"]);
}

#[tokio::test]
async fn test_queued_requests_are_fifo() {
    let bus = EventBus::new();
    let journal = Journal::default();
    bus.on("first", recorder(&journal, "a1", Outcome::Continue)).unwrap();
    bus.on("first", recorder(&journal, "a2", Outcome::Continue)).unwrap();
    bus.on("second", recorder(&journal, "b", Outcome::Continue)).unwrap();

    let (first, second) = tokio::join!(bus.emit("first", ()), bus.emit("second", ()));
    first.unwrap();
    second.unwrap();

    let entries = journal.entries();
    let last_a = entries.iter().rposition(|e| e.starts_with('a')).unwrap();
    let first_b = entries.iter().position(|e| e.starts_with('b')).unwrap();
    assert!(last_a < first_b, "{entries:?}");
    assert_eq!(entries.len(), 6);
}

#[tokio::test]
async fn test_failing_handlers_do_not_stop_siblings() {
    let bus = EventBus::new();
    let journal = Journal::default();
    bus.on("await job", recorder(&journal, "survivor", Outcome::value("done")))
        .unwrap();
    bus.on(
        "await job",
        handler_fn(|event, _| async move {
            if event.name == "job" {
                panic!("handler exploded");
            }
            Ok(Outcome::Continue)
        }),
    )
    .unwrap();
    bus.on(
        "await job",
        handler_fn(|_, _| async { Err::<Outcome, HandlerError>("handler failed".into()) }),
    )
    .unwrap();

    let outcome = bus.emit("job", ()).await.unwrap();
    assert_eq!(outcome, Outcome::value("done"));
    assert_eq!(journal.entries(), vec!["survivor:start", "survivor:end"]);

    let stats = bus.stats();
    assert_eq!(stats.handler_failures, 2);
    assert_eq!(stats.handlers_invoked, 3);
}

#[tokio::test]
async fn test_sync_answer_seeds_async_pool() {
    let bus = EventBus::new();
    let journal = Journal::default();
    bus.on("await q", recorder(&journal, "sync", Outcome::value(1)))
        .unwrap();
    bus.on("q", recorder(&journal, "async", Outcome::value(2)))
        .unwrap();

    // The synchronous answer does not skip asynchronous handlers
    assert_eq!(bus.emit_now("q", ()).await.unwrap(), Outcome::value(1));
    assert_eq!(journal.entries().len(), 4);

    let bus = EventBus::new();
    bus.on("await q", recorder(&journal, "sync", Outcome::Continue))
        .unwrap();
    bus.on("q", recorder(&journal, "async", Outcome::value(2)))
        .unwrap();
    assert_eq!(bus.emit_now("q", ()).await.unwrap(), Outcome::value(2));
}

#[tokio::test]
async fn test_handler_not_reentered_by_nested_emit() {
    let bus = EventBus::new();
    let journal = Journal::default();
    let inner_bus = bus.clone();
    let inner_journal = journal.clone();
    bus.on(
        "await loop",
        handler_fn(move |_, _| {
            let bus = inner_bus.clone();
            let journal = inner_journal.clone();
            async move {
                journal.record("loop");
                bus.emit_now("loop", ()).await.map_err(HandlerError::from)
            }
        }),
    )
    .unwrap();
    bus.on("await loop", marker(&journal, "other")).unwrap();

    assert_eq!(bus.emit_now("loop", ()).await.unwrap(), Outcome::Continue);
    // The nested emit reaches the other handler but never the emitting one
    assert_eq!(journal.entries(), vec!["other", "loop", "other"]);
}

#[tokio::test]
async fn test_shared_handler_not_reentered_through_other_trigger() {
    let bus = EventBus::new();
    let journal = Journal::default();
    let inner_bus = bus.clone();
    let inner_journal = journal.clone();
    let handler: Arc<dyn EventHandler> = Arc::new(handler_fn(move |event: Arc<Event>, _| {
        let bus = inner_bus.clone();
        let journal = inner_journal.clone();
        async move {
            journal.record(format!("h:{}", event.name));
            if event.name == "a" {
                return bus.emit_now("b", ()).await.map_err(HandlerError::from);
            }
            Ok(Outcome::Continue)
        }
    }));
    bus.subscribe_all(
        vec![
            ("await a".to_string(), Arc::clone(&handler)),
            ("await b".to_string(), Arc::clone(&handler)),
        ],
        SubscribeOptions::default(),
    )
    .unwrap();

    assert_eq!(bus.emit_now("a", ()).await.unwrap(), Outcome::Continue);
    assert_eq!(journal.entries(), vec!["h:a"]);

    // Outside the chain the second trigger still delivers
    bus.notify_now("b", ()).await.unwrap();
    assert_eq!(journal.entries(), vec!["h:a", "h:b"]);
}

#[tokio::test]
async fn test_queued_notifications_keep_order_across_classes() {
    let bus = EventBus::new();
    let journal = Journal::default();
    bus.on("a", marker(&journal, "a-async")).unwrap();
    bus.on("await b", marker(&journal, "b-sync")).unwrap();
    bus.on("c", recorder(&journal, "c-async", Outcome::Continue)).unwrap();
    bus.on("await d", marker(&journal, "d-sync")).unwrap();

    bus.notify("a", ()).unwrap();
    bus.notify("b", ()).unwrap();
    bus.notify("c", ()).unwrap();
    bus.notify("d", ()).unwrap();
    bus.idle().await;

    let entries = journal.entries();
    assert_eq!(entries[..3], ["a-async", "b-sync", "c-async:start"]);
    let d = entries.iter().position(|e| e == "d-sync").unwrap();
    assert!(d > 2, "{entries:?}");
}

#[tokio::test]
async fn test_handler_failures_are_reported_on_error_channel() {
    let bus = EventBus::new();
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    bus.on(
        "await error",
        handler_fn(move |event: Arc<Event>, _| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push((event.text.clone(), event.data.clone()));
                Err::<Outcome, HandlerError>("reporter failed too".into())
            }
        }),
    )
    .unwrap();
    bus.on(
        "await job",
        handler_fn(|_, _| async { Err::<Outcome, HandlerError>("disk full".into()) }),
    )
    .unwrap();

    bus.notify_now("job", ()).await.unwrap();
    bus.idle().await;

    let reports = reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 1, "{reports:?}");
    assert!(reports[0].0.contains("disk full"));
    assert_eq!(
        reports[0].1,
        Some(json!({ "event": "job", "trigger": "await job" }))
    );
    // The failing error handler is not reported again
    assert_eq!(bus.stats().handler_failures, 2);
}

#[tokio::test]
async fn test_once_subscription_fires_once() {
    let bus = EventBus::new();
    let journal = Journal::default();
    let subscription = bus.once("await ready", marker(&journal, "ready")).unwrap();

    bus.notify_now("ready", ()).await.unwrap();
    bus.notify_now("ready", ()).await.unwrap();

    assert_eq!(journal.entries(), vec!["ready"]);
    assert!(!subscription.is_active());
}

#[tokio::test]
async fn test_remove_all_listeners_and_dead_owner_pruning() {
    let bus = EventBus::new();
    let journal = Journal::default();
    let service = Arc::new(());
    let owner = Owner::of(&service);

    bus.on_bound("this await started", marker(&journal, "a"), &owner)
        .unwrap();
    bus.on_bound("this await stopped", marker(&journal, "b"), &owner)
        .unwrap();
    assert_eq!(bus.remove_all_listeners(&owner), 2);
    assert_eq!(bus.stats().active_subscriptions, 0);

    bus.on_bound("this await started", marker(&journal, "c"), &owner)
        .unwrap();
    drop(service);
    bus.notify_now("started", ()).await.unwrap();
    assert_eq!(bus.stats().active_subscriptions, 0);
    assert!(journal.entries().is_empty());
}

#[tokio::test]
async fn test_event_names_are_normalized() {
    let bus = EventBus::new();
    let journal = Journal::default();
    bus.on("await ready-to-capture-ports", marker(&journal, "ready"))
        .unwrap();

    bus.notify_now("ReadyToCapturePorts", ()).await.unwrap();
    assert_eq!(journal.entries(), vec!["ready"]);
}

#[tokio::test]
async fn test_invalid_argument_shape() {
    let bus = EventBus::new();
    let journal = Journal::default();
    bus.on("ping", marker(&journal, "ping")).unwrap();

    let result = bus.emit_now("ping", ("a", "b", "c", "d")).await;
    assert!(matches!(result, Err(EventError::InvalidArguments(_))));
}

#[tokio::test]
async fn scenario_ping_returns_handler_answer() {
    let bus = EventBus::new();
    bus.on(
        "ping",
        handler_fn(|_, _| async { Ok(Outcome::value(json!({ "pong": true }))) }),
    )
    .unwrap();
    assert_eq!(
        bus.emit("ping", ()).await.unwrap(),
        Outcome::value(json!({ "pong": true }))
    );

    let quiet = EventBus::new();
    quiet
        .on("ping", handler_fn(|_, _| async { Ok(Outcome::Continue) }))
        .unwrap();
    assert_eq!(quiet.emit("ping", ()).await.unwrap(), Outcome::Continue);
}

#[tokio::test]
async fn scenario_cancelling_sync_handler_hides_the_other() {
    let bus = EventBus::new();
    let journal = Journal::default();
    bus.on("await x", marker(&journal, "h2")).unwrap();
    bus.on("await x", recorder(&journal, "h1", Outcome::Cancelled)).unwrap();

    assert_eq!(bus.emit("x", ()).await.unwrap(), Outcome::Cancelled);
    assert!(!journal.entries().contains(&"h2".to_string()));
}

#[tokio::test]
async fn scenario_notify_without_subscribers_is_free() {
    let bus = EventBus::new();
    let journal = Journal::default();
    bus.on("other", marker(&journal, "other")).unwrap();

    bus.notify("y", "ignored").unwrap();

    assert_eq!(bus.pending(), 0);
    assert!(!bus.is_draining());
    let stats = bus.stats();
    assert_eq!(stats.events_short_circuited, 1);
    assert_eq!(stats.events_queued, 0);
    assert_eq!(stats.events_dispatched, 0);
}
