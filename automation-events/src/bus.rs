//! Event bus implementation
//!
//! This module provides the in-process event bus: subscription management,
//! immediate and queued delivery of notifications and requests, and the
//! lifecycle of the pending queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use automation_trigger::{parse, smash};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};

use crate::config::BusConfig;
use crate::dispatcher::dispatch;
use crate::error::{EventError, EventResult};
use crate::handler::EventHandler;
use crate::registry::{Registry, Subscriber, SubscriptionId};
use crate::types::{Delivery, Event, EventArgs, IntoArgs, Outcome, Owner};

/// Event bus statistics.
#[derive(Debug, Clone, Default)]
pub struct BusStats {
    /// Events accepted into the pending queue
    pub events_queued: u64,
    /// Events delivered to the dispatcher
    pub events_dispatched: u64,
    /// Events skipped because nobody could receive them
    pub events_short_circuited: u64,
    /// Handler invocations
    pub handlers_invoked: u64,
    /// Handler invocations that returned an error or panicked
    pub handler_failures: u64,
    /// Active subscriptions
    pub active_subscriptions: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) events_queued: AtomicU64,
    pub(crate) events_dispatched: AtomicU64,
    pub(crate) events_short_circuited: AtomicU64,
    pub(crate) handlers_invoked: AtomicU64,
    pub(crate) handler_failures: AtomicU64,
}

/// A queued event and the slot its result is delivered to.
struct Pending {
    event: Arc<Event>,
    completion: Option<oneshot::Sender<Outcome>>,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Pending>,
    draining: bool,
}

/// State shared by every handle of one bus.
pub(crate) struct Shared {
    pub(crate) config: BusConfig,
    pub(crate) counters: Counters,
    registry: RwLock<Registry>,
    queue: Mutex<Queue>,
    busy: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry_mut().remove(id)
    }

    /// Take the next queued event, or mark the drain finished.
    fn next_pending(&self) -> Option<Pending> {
        let mut queue = self.queue();
        let next = queue.pending.pop_front();
        if next.is_none() {
            queue.draining = false;
            self.busy.send_replace(false);
        }
        next
    }
}

/// Releases the drain flag if the drain task unwinds.
struct DrainGuard(Arc<Shared>);

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut queue = self.0.queue();
            queue.draining = false;
            self.0.busy.send_replace(false);
        }
    }
}

async fn drain(shared: Arc<Shared>) {
    let _guard = DrainGuard(Arc::clone(&shared));
    while let Some(Pending { event, completion }) = shared.next_pending() {
        let outcome = dispatch(&shared, event).await;
        if let Some(completion) = completion {
            // The caller may have stopped waiting.
            let _ = completion.send(outcome);
        }
    }
}

/// Options for [`EventBus::subscribe_all`].
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Remove each subscription after its first delivery
    pub once: bool,
    /// Owner bound by triggers that use `this`
    pub owner: Option<Owner>,
}

/// Handle to one or more registered subscriptions.
///
/// Dropping the handle does not unsubscribe.
#[derive(Debug, Clone)]
pub struct Subscription {
    ids: Vec<SubscriptionId>,
    shared: Weak<Shared>,
}

impl Subscription {
    /// ID of the first subscription in this handle.
    pub fn id(&self) -> SubscriptionId {
        self.ids[0]
    }

    /// IDs of every subscription in this handle.
    pub fn ids(&self) -> &[SubscriptionId] {
        &self.ids
    }

    /// Remove the subscriptions. Safe to call more than once.
    ///
    /// Returns `true` if anything was removed.
    pub fn unsubscribe(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut registry = shared.registry_mut();
        self.ids
            .iter()
            .fold(false, |removed, id| registry.remove(*id) || removed)
    }

    /// Check whether any of the subscriptions is still registered.
    pub fn is_active(&self) -> bool {
        self.shared.upgrade().is_some_and(|shared| {
            let registry = shared.registry();
            self.ids.iter().any(|id| registry.contains(*id))
        })
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("config", &self.config)
            .field("subscriptions", &self.registry().len())
            .finish()
    }
}

/// In-process event bus.
///
/// Cloning the bus yields another handle to the same registries and queue.
/// Independent buses share nothing.
#[derive(Debug, Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus with default configuration.
    pub fn new() -> Self {
        Self::build(BusConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(config: BusConfig) -> EventResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    fn build(config: BusConfig) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                counters: Counters::default(),
                registry: RwLock::new(Registry::default()),
                queue: Mutex::new(Queue::default()),
                busy,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe a handler to a trigger expression.
    pub fn on(&self, trigger: &str, handler: impl EventHandler + 'static) -> EventResult<Subscription> {
        let subscriber = self.register(trigger, Arc::new(handler), None)?;
        Ok(self.handle(vec![subscriber.id]))
    }

    /// Subscribe a handler bound to `owner`.
    ///
    /// The binding takes effect when the trigger uses `this`: the handler
    /// then only receives events whose source is `owner`.
    pub fn on_bound(
        &self,
        trigger: &str,
        handler: impl EventHandler + 'static,
        owner: &Owner,
    ) -> EventResult<Subscription> {
        let subscriber = self.register(trigger, Arc::new(handler), Some(owner))?;
        Ok(self.handle(vec![subscriber.id]))
    }

    /// Subscribe a handler that is removed after its first delivery.
    pub fn once(&self, trigger: &str, handler: impl EventHandler + 'static) -> EventResult<Subscription> {
        self.on(&format!("once {trigger}"), handler)
    }

    /// Subscribe several handlers at once.
    ///
    /// Every expression is parsed before anything is registered, so a
    /// malformed entry leaves the bus unchanged.
    pub fn subscribe_all(
        &self,
        entries: Vec<(String, Arc<dyn EventHandler>)>,
        options: SubscribeOptions,
    ) -> EventResult<Subscription> {
        if entries.is_empty() {
            return Err(EventError::InvalidArguments(
                "no subscriptions given".to_string(),
            ));
        }
        self.ensure_open()?;

        let subscribers = entries
            .into_iter()
            .map(|(trigger, handler)| {
                let expression = if options.once {
                    format!("once {trigger}")
                } else {
                    trigger
                };
                self.prepare_subscriber(&expression, handler, options.owner.as_ref())
            })
            .collect::<EventResult<Vec<_>>>()?;

        let ids = subscribers.iter().map(|s| s.id).collect();
        let mut registry = self.shared.registry_mut();
        for subscriber in subscribers {
            registry.insert(subscriber);
        }
        drop(registry);
        Ok(self.handle(ids))
    }

    /// Remove every subscription bound to `owner`.
    pub fn remove_all_listeners(&self, owner: &Owner) -> usize {
        let removed = self.shared.registry_mut().remove_owner(owner);
        if removed > 0 {
            tracing::debug!(owner = ?owner, removed, "Removed owner subscriptions");
        }
        removed
    }

    /// Check whether any subscription could receive an event named `name`.
    pub fn is_subscribed(&self, name: &str) -> bool {
        self.shared.registry().has_interest(&smash(name))
    }

    fn register(
        &self,
        trigger: &str,
        handler: Arc<dyn EventHandler>,
        owner: Option<&Owner>,
    ) -> EventResult<Arc<Subscriber>> {
        self.ensure_open()?;
        let subscriber = self.prepare_subscriber(trigger, handler, owner)?;
        self.shared.registry_mut().insert(Arc::clone(&subscriber));
        Ok(subscriber)
    }

    fn prepare_subscriber(
        &self,
        trigger: &str,
        handler: Arc<dyn EventHandler>,
        owner: Option<&Owner>,
    ) -> EventResult<Arc<Subscriber>> {
        let parsed = parse(trigger, owner.cloned())?;
        if parsed.unbound_this() {
            tracing::debug!(trigger, "Trigger uses 'this' but no owner was supplied");
        } else if self.shared.config.dev_mode && owner.is_some() && !parsed.binds_this {
            tracing::debug!(trigger, "Owner supplied but trigger does not use 'this'");
        }
        Ok(Arc::new(Subscriber::new(trigger, parsed, handler)))
    }

    fn handle(&self, ids: Vec<SubscriptionId>) -> Subscription {
        Subscription {
            ids,
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn ensure_open(&self) -> EventResult<()> {
        if self.is_closed() {
            return Err(EventError::Shutdown);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    /// Queue a notification.
    ///
    /// Returns once the notification is queued; it is delivered after every
    /// event queued before it.
    pub fn notify(&self, name: &str, args: impl IntoArgs) -> EventResult<()> {
        if let Some(event) = self.prepare(name, Delivery::Notification, args)? {
            self.enqueue(event, None)?;
        }
        Ok(())
    }

    /// Deliver a notification immediately.
    ///
    /// Returns after the synchronous-class handlers finished; asynchronous
    /// handlers keep running in the background.
    pub async fn notify_now(&self, name: &str, args: impl IntoArgs) -> EventResult<()> {
        if let Some(event) = self.prepare(name, Delivery::Notification, args)? {
            dispatch(&self.shared, event).await;
        }
        Ok(())
    }

    /// Queue a request and wait for its outcome.
    pub async fn emit(&self, name: &str, args: impl IntoArgs) -> EventResult<Outcome> {
        let Some(event) = self.prepare(name, Delivery::Request, args)? else {
            return Ok(Outcome::Continue);
        };
        let (completion, outcome) = oneshot::channel();
        self.enqueue(event, Some(completion))?;
        outcome.await.map_err(|_| EventError::Shutdown)
    }

    /// Deliver a request immediately and return its outcome.
    pub async fn emit_now(&self, name: &str, args: impl IntoArgs) -> EventResult<Outcome> {
        match self.prepare(name, Delivery::Request, args)? {
            Some(event) => Ok(dispatch(&self.shared, event).await),
            None => Ok(Outcome::Continue),
        }
    }

    /// Build the event, or `None` when nobody could receive it.
    fn prepare(
        &self,
        name: &str,
        delivery: Delivery,
        args: impl IntoArgs,
    ) -> EventResult<Option<Arc<Event>>> {
        let name = smash(name);
        if self.is_closed() || !self.shared.registry().has_interest(&name) {
            self.shared
                .counters
                .events_short_circuited
                .fetch_add(1, Ordering::Relaxed);
            tracing::trace!(event = %name, "No subscribers, skipping event");
            return Ok(None);
        }
        let args = EventArgs::resolve(args.into_args())?;
        Ok(Some(Arc::new(Event::new(name, delivery, args))))
    }

    fn enqueue(&self, event: Arc<Event>, completion: Option<oneshot::Sender<Outcome>>) -> EventResult<()> {
        let mut queue = self.shared.queue();
        let runtime = if queue.draining {
            None
        } else {
            Some(Handle::try_current().map_err(|_| EventError::NoRuntime)?)
        };

        queue.pending.push_back(Pending { event, completion });
        self.shared.counters.events_queued.fetch_add(1, Ordering::Relaxed);
        let depth = queue.pending.len();
        if depth > self.shared.config.queue_high_water {
            tracing::warn!(
                depth,
                high_water = self.shared.config.queue_high_water,
                "Event queue above high-water mark"
            );
        }

        if let Some(runtime) = runtime {
            queue.draining = true;
            self.shared.busy.send_replace(true);
            runtime.spawn(drain(Arc::clone(&self.shared)));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Drop every subscription and every queued event.
    ///
    /// Callers awaiting a dropped request receive [`EventError::Shutdown`].
    pub fn reset(&self) {
        self.shared.registry_mut().clear();
        let dropped = std::mem::take(&mut self.shared.queue().pending);
        tracing::debug!(dropped = dropped.len(), "Event bus reset");
    }

    /// Reset the bus and refuse further subscriptions.
    ///
    /// Later events short-circuit to `Continue`.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.reset();
    }

    /// Check whether the bus was shut down.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Wait until no queued events are being drained.
    pub async fn idle(&self) {
        let mut busy = self.shared.busy.subscribe();
        // The sender lives as long as `self`.
        let _ = busy.wait_for(|busy| !*busy).await;
    }

    /// Check whether a drain is in progress.
    pub fn is_draining(&self) -> bool {
        self.shared.queue().draining
    }

    /// Number of queued events not yet dispatched.
    pub fn pending(&self) -> usize {
        self.shared.queue().pending.len()
    }

    /// Get event bus stats.
    pub fn stats(&self) -> BusStats {
        let counters = &self.shared.counters;
        BusStats {
            events_queued: counters.events_queued.load(Ordering::Relaxed),
            events_dispatched: counters.events_dispatched.load(Ordering::Relaxed),
            events_short_circuited: counters.events_short_circuited.load(Ordering::Relaxed),
            handlers_invoked: counters.handlers_invoked.load(Ordering::Relaxed),
            handler_failures: counters.handler_failures.load(Ordering::Relaxed),
            active_subscriptions: self.shared.registry().len(),
        }
    }
}
