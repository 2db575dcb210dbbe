//! Dispatch loop
//!
//! Delivers one event to the matching subscribers. Synchronous-class
//! handlers run first, one at a time. Asynchronous-class handlers run after
//! them: joined for requests, and for notifications started in place up to
//! their first suspension, then spawned.
//!
//! A handler never receives an event raised while it is itself running in
//! the same causal chain. The chain travels with the handler future as a
//! task-local, so spawned handlers carry it too.
//!
//! Handler failures are logged and reported as `error` channel notifications.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use automation_trigger::Discriminator;
use futures::future::{join_all, FutureExt};
use serde_json::json;
use tokio::runtime::Handle;

use crate::bus::{EventBus, Shared};
use crate::channels::Channel;
use crate::handler::EventHandler;
use crate::registry::{Class, Subscriber, SubscriptionId};
use crate::types::{Event, Outcome};

/// A handler in the running chain.
///
/// Handlers are known by identity, so one handler subscribed under several
/// triggers is excluded through all of them. `once` subscriptions are known
/// by subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainKey {
    Handler(usize),
    Once(SubscriptionId),
}

impl ChainKey {
    fn of(subscriber: &Subscriber) -> Self {
        if subscriber.once {
            ChainKey::Once(subscriber.id)
        } else {
            ChainKey::Handler(subscriber.handler.identity())
        }
    }
}

tokio::task_local! {
    static RUNNING: Arc<Vec<ChainKey>>;
}

/// Handlers running in the current causal chain.
fn running() -> Arc<Vec<ChainKey>> {
    RUNNING.try_with(Arc::clone).unwrap_or_default()
}

/// Deliver an event and combine the answers.
///
/// Notifications always resolve to `Continue`.
pub(crate) async fn dispatch(shared: &Arc<Shared>, event: Arc<Event>) -> Outcome {
    shared.counters.events_dispatched.fetch_add(1, Ordering::Relaxed);
    let running = running();
    let request = event.is_request();

    let mut result = Outcome::Continue;
    let synchronous = shared.registry().candidates(&event.name, Class::Sync);
    for subscriber in synchronous {
        let Some(captures) = admit(shared, &subscriber, &event, &running) else {
            continue;
        };
        let outcome = invoke(
            Arc::clone(shared),
            subscriber,
            Arc::clone(&event),
            captures,
            Arc::clone(&running),
        )
        .await;

        if let (true, Some(outcome)) = (request, outcome) {
            result = outcome;
            if result.is_cancelled() {
                return Outcome::Cancelled;
            }
        }
    }

    let asynchronous = shared.registry().candidates(&event.name, Class::Async);
    let admitted: Vec<(Arc<Subscriber>, Vec<String>)> = asynchronous
        .into_iter()
        .filter_map(|subscriber| {
            let captures = admit(shared, &subscriber, &event, &running)?;
            Some((subscriber, captures))
        })
        .collect();

    if !request {
        for (subscriber, captures) in admitted {
            let mut task = Box::pin(invoke(
                Arc::clone(shared),
                subscriber,
                Arc::clone(&event),
                captures,
                Arc::clone(&running),
            ));
            // Queued events stay in order: each handler starts before the next event.
            if futures::poll!(task.as_mut()).is_ready() {
                continue;
            }
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(task);
                }
                Err(e) => {
                    tracing::error!(event = %event.name, error = %e, "Cannot spawn event handler");
                }
            }
        }
        return Outcome::Continue;
    }

    let answers = join_all(admitted.into_iter().map(|(subscriber, captures)| {
        invoke(
            Arc::clone(shared),
            subscriber,
            Arc::clone(&event),
            captures,
            Arc::clone(&running),
        )
    }))
    .await;

    std::iter::once(Some(result))
        .chain(answers)
        .flatten()
        .find(|outcome| !outcome.is_continue())
        .unwrap_or_default()
}

/// Decide whether `subscriber` receives `event`, collecting filter captures.
fn admit(
    shared: &Shared,
    subscriber: &Subscriber,
    event: &Event,
    running: &[ChainKey],
) -> Option<Vec<String>> {
    if running.contains(&ChainKey::of(subscriber)) || !shared.registry().contains(subscriber.id) {
        return None;
    }

    if let Some(owner) = &subscriber.owner {
        if !owner.is_alive() {
            tracing::debug!(
                subscription = %subscriber.id,
                trigger = %subscriber.expression,
                "Pruning subscription of a dropped owner"
            );
            shared.unsubscribe(subscriber.id);
            return None;
        }
        if event.source.as_ref() != Some(owner) {
            return None;
        }
    }

    let mut captures = Vec::new();
    for (name, discriminator) in &subscriber.filters {
        let strings = event.context_strings(name)?;
        if let Discriminator::Filter(filter) = discriminator {
            if !filter.matches(event.data.as_ref(), &strings, &mut captures) {
                return None;
            }
        }
    }

    if !subscriber.claim() {
        return None;
    }
    if subscriber.once {
        shared.unsubscribe(subscriber.id);
    }
    Some(captures)
}

/// Run one handler inside the causal chain, containing failures.
///
/// Returns `None` when the handler failed.
async fn invoke(
    shared: Arc<Shared>,
    subscriber: Arc<Subscriber>,
    event: Arc<Event>,
    captures: Vec<String>,
    running: Arc<Vec<ChainKey>>,
) -> Option<Outcome> {
    shared.counters.handlers_invoked.fetch_add(1, Ordering::Relaxed);

    let mut chain = Vec::with_capacity(running.len() + 1);
    chain.extend_from_slice(&running);
    chain.push(ChainKey::of(&subscriber));

    let name = event.name.clone();
    let handler = Arc::clone(&subscriber.handler);
    let call = RUNNING.scope(Arc::new(chain), async move {
        handler.handle(event, captures).await
    });

    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(e)) => {
            shared.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                event = %name,
                subscription = %subscriber.id,
                trigger = %subscriber.expression,
                error = %e,
                "Event handler failed"
            );
            report(&shared, &name, &subscriber, format!("Handler for '{name}' failed: {e}"));
            None
        }
        Err(panic) => {
            if !shared.config.catch_panics {
                std::panic::resume_unwind(panic);
            }
            shared.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
            let message = panic_message(panic.as_ref());
            tracing::error!(
                event = %name,
                subscription = %subscriber.id,
                trigger = %subscriber.expression,
                panic = %message,
                "Event handler panicked"
            );
            report(&shared, &name, &subscriber, format!("Handler for '{name}' panicked: {message}"));
            None
        }
    }
}

/// Queue an `error` notification describing a failed handler.
///
/// Failures while handling `error` itself are only logged.
fn report(shared: &Arc<Shared>, name: &str, subscriber: &Subscriber, message: String) {
    let channel = Channel::Error.name();
    if name == channel {
        return;
    }
    let data = json!({
        "event": name,
        "trigger": subscriber.expression,
    });
    let bus = EventBus::from_shared(Arc::clone(shared));
    if let Err(e) = bus.notify(channel, (message, data)) {
        tracing::debug!(event = %name, error = %e, "Cannot report handler failure");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
