//! Owner-bound emitters
//!
//! An [`Emitter`] gives an object an identity on a bus. Events it raises
//! carry that identity as their source, subscriptions it makes are bound to
//! it with `this`, and disposing it removes every such subscription.
//!
//! ```rust
//! use std::sync::Arc;
//! use automation_events::{handler_fn, Emitter, EventBus, NotificationOptions, Outcome};
//!
//! # async fn example() -> automation_events::EventResult<()> {
//! struct Process;
//!
//! let bus = EventBus::new();
//! let process = Arc::new(Process);
//! let emitter = Emitter::new(&bus, &process);
//!
//! let started = emitter.notification("started", NotificationOptions { now: true, once: true, ..Default::default() });
//! emitter.on("started", handler_fn(|_, _| async { Ok(Outcome::Continue) }))?;
//! started.fire(()).await?;
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use automation_trigger::{parse, smash, Descriptors};

use crate::bus::{EventBus, Subscription};
use crate::error::EventResult;
use crate::handler::EventHandler;
use crate::types::{Arg, IntoArgs, Outcome, Owner};

/// Options for [`Emitter::notification`].
#[derive(Debug, Clone, Default)]
pub struct NotificationOptions {
    /// Deliver immediately instead of queueing
    pub now: bool,
    /// Fire at most once
    pub once: bool,
    /// Descriptors attached to every notification
    pub descriptors: Descriptors,
}

/// Options for [`Emitter::request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Deliver immediately instead of queueing
    pub now: bool,
    /// Descriptors attached to every request
    pub descriptors: Descriptors,
}

/// Identity of an object on a bus.
pub struct Emitter {
    bus: EventBus,
    owner: Owner,
    known: Mutex<HashSet<String>>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("owner", &self.owner)
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Emitter {
    /// Create an emitter for `object` on `bus`.
    pub fn new<T: Any + Send + Sync>(bus: &EventBus, object: &Arc<T>) -> Self {
        Self {
            bus: bus.clone(),
            owner: Owner::of(object),
            known: Mutex::new(HashSet::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// The owner identity used as event source.
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// The bus this emitter publishes on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn learn(&self, name: &str) -> String {
        let name = smash(name);
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone());
        name
    }

    /// Check whether this emitter declared an event named `name`.
    pub fn is_known_event(&self, name: &str) -> bool {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&smash(name))
    }

    /// Declare a notification this emitter raises.
    pub fn notification(&self, name: &str, options: NotificationOptions) -> Notifier {
        Notifier {
            bus: self.bus.clone(),
            source: self.owner.clone(),
            name: self.learn(name),
            now: options.now,
            once: options.once,
            descriptors: options.descriptors,
            fired: AtomicBool::new(false),
        }
    }

    /// Declare a request this emitter raises.
    pub fn request(&self, name: &str, options: RequestOptions) -> Requester {
        Requester {
            bus: self.bus.clone(),
            source: self.owner.clone(),
            name: self.learn(name),
            now: options.now,
            descriptors: options.descriptors,
        }
    }

    /// Subscribe a handler bound to this emitter.
    ///
    /// The handler only receives events raised by this emitter.
    pub fn on(&self, trigger: &str, handler: impl EventHandler + 'static) -> EventResult<Subscription> {
        let expression = format!("this {trigger}");
        if self.bus.config().dev_mode {
            if let Ok(parsed) = parse::<()>(&expression, None) {
                if !parsed.names().any(|name| self.is_known_event(name)) {
                    tracing::debug!(
                        trigger,
                        "Bound handler names none of the emitter's events"
                    );
                }
            }
        }
        self.bus.on_bound(&expression, handler, &self.owner)
    }

    /// Remove every subscription bound to this emitter.
    ///
    /// Returns the number removed; later calls return 0.
    pub fn dispose(&self) -> usize {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return 0;
        }
        self.bus.remove_all_listeners(&self.owner)
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Prefix user arguments with the emitter's descriptors and source.
fn compose(descriptors: &Descriptors, source: &Owner, args: Vec<Arg>) -> Vec<Arg> {
    let mut args = args.into_iter().peekable();
    let mut merged = descriptors.clone();
    if let Some(Arg::Descriptors(extra)) = args.next_if(|arg| matches!(arg, Arg::Descriptors(_))) {
        for name in extra.names() {
            for value in extra.get(name).unwrap_or_default() {
                merged = merged.with(name, value.clone());
            }
        }
    }

    let mut composed = Vec::with_capacity(args.len() + 2);
    composed.push(Arg::Descriptors(merged));
    composed.push(Arg::Source(source.clone()));
    composed.extend(args);
    composed
}

/// A declared notification. See [`Emitter::notification`].
#[derive(Debug)]
pub struct Notifier {
    bus: EventBus,
    source: Owner,
    name: String,
    now: bool,
    once: bool,
    descriptors: Descriptors,
    fired: AtomicBool,
}

impl Notifier {
    /// Event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raise the notification with the emitter as source.
    ///
    /// `args` may be a leading descriptor set followed by text and/or data.
    /// A once-only notification counts as fired only when raising it succeeded.
    pub async fn fire(&self, args: impl IntoArgs) -> EventResult<()> {
        if self.once && self.fired.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let args = compose(&self.descriptors, &self.source, args.into_args());
        let result = if self.now {
            self.bus.notify_now(&self.name, args).await
        } else {
            self.bus.notify(&self.name, args)
        };
        if self.once && result.is_err() {
            // Not delivered, so it may fire again.
            self.fired.store(false, Ordering::Release);
        }
        result
    }

    /// Check whether a once-only notification already fired.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// A declared request. See [`Emitter::request`].
#[derive(Debug, Clone)]
pub struct Requester {
    bus: EventBus,
    source: Owner,
    name: String,
    now: bool,
    descriptors: Descriptors,
}

impl Requester {
    /// Event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raise the request with the emitter as source and return the outcome.
    pub async fn ask(&self, args: impl IntoArgs) -> EventResult<Outcome> {
        let args = compose(&self.descriptors, &self.source, args.into_args());
        if self.now {
            self.bus.emit_now(&self.name, args).await
        } else {
            self.bus.emit(&self.name, args).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::types::Event;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct Process;

    #[tokio::test]
    async fn test_bound_handler_only_sees_own_events() {
        let bus = EventBus::new();
        let first = Arc::new(Process);
        let second = Arc::new(Process);
        let a = Emitter::new(&bus, &first);
        let b = Emitter::new(&bus, &second);

        let exited_a = a.notification("exited", NotificationOptions { now: true, ..Default::default() });
        let exited_b = b.notification("exited", NotificationOptions { now: true, ..Default::default() });

        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        a.on(
            "await exited",
            handler_fn(move |event: Arc<Event>, _| {
                let seen = Arc::clone(&seen);
                async move {
                    assert!(event.source_as::<Process>().is_some());
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(Outcome::Continue)
                }
            }),
        )
        .unwrap();

        exited_b.fire(json!(1)).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        exited_a.fire(json!(0)).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_once_notifier() {
        let bus = EventBus::new();
        let process = Arc::new(Process);
        let emitter = Emitter::new(&bus, &process);
        let started = emitter.notification(
            "started",
            NotificationOptions {
                now: true,
                once: true,
                ..Default::default()
            },
        );

        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        bus.on(
            "await started",
            handler_fn(move |_, _| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(Outcome::Continue)
                }
            }),
        )
        .unwrap();

        started.fire(()).await.unwrap();
        started.fire(()).await.unwrap();
        assert!(started.has_fired());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_once_notifier_can_fire_again() {
        let bus = EventBus::new();
        let process = Arc::new(Process);
        let emitter = Emitter::new(&bus, &process);
        let started = emitter.notification(
            "started",
            NotificationOptions {
                once: true,
                ..Default::default()
            },
        );

        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        bus.on(
            "await started",
            handler_fn(move |_, _| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(Outcome::Continue)
                }
            }),
        )
        .unwrap();

        // Queueing needs a runtime
        let result = futures::executor::block_on(started.fire(()));
        assert!(matches!(result, Err(crate::error::EventError::NoRuntime)));
        assert!(!started.has_fired());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            started.fire(()).await.unwrap();
            started.fire(()).await.unwrap();
            bus.idle().await;
        });
        assert!(started.has_fired());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_request_carries_descriptors() {
        let bus = EventBus::new();
        let process = Arc::new(Process);
        let emitter = Emitter::new(&bus, &process);
        let reading = emitter.request(
            "reading",
            RequestOptions {
                now: true,
                descriptors: Descriptors::single("console", "node"),
            },
        );

        bus.on(
            "await reading/console['node']",
            handler_fn(|event: Arc<Event>, _| async move {
                Ok(Outcome::value(event.text.to_uppercase()))
            }),
        )
        .unwrap();

        let outcome = reading.ask("hello").await.unwrap();
        assert_eq!(outcome, Outcome::value("HELLO"));
    }

    #[tokio::test]
    async fn test_dispose_removes_bound_subscriptions() {
        let bus = EventBus::new();
        let process = Arc::new(Process);
        let emitter = Emitter::new(&bus, &process);
        emitter.notification("exited", NotificationOptions::default());
        assert!(emitter.is_known_event("Exited"));
        assert!(!emitter.is_known_event("started"));

        emitter
            .on("exited", handler_fn(|_, _| async { Ok(Outcome::Continue) }))
            .unwrap();
        emitter
            .on("started", handler_fn(|_, _| async { Ok(Outcome::Continue) }))
            .unwrap();
        assert_eq!(bus.stats().active_subscriptions, 2);

        drop(emitter);
        assert_eq!(bus.stats().active_subscriptions, 0);
    }
}
