//! Subscription registry
//!
//! Two tables, one per delivery class, map a discriminator name (or `*`) to
//! the subscribers that mention it. A subscriber is listed under every name
//! in its trigger. Lists are kept newest first.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use automation_trigger::{Discriminator, Trigger};
use uuid::Uuid;

use crate::handler::EventHandler;
use crate::types::{Owner, OwnerKey};

/// Unique subscription ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Delivery class of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// Runs one at a time, may cancel requests
    Sync,
    /// Runs concurrently after the synchronous class
    Async,
}

/// A registered handler and its parsed trigger.
pub struct Subscriber {
    pub(crate) id: SubscriptionId,
    pub(crate) expression: String,
    pub(crate) class: Class,
    pub(crate) once: bool,
    pub(crate) filters: Vec<(String, Discriminator)>,
    pub(crate) owner: Option<Owner>,
    pub(crate) handler: Arc<dyn EventHandler>,
    fired: AtomicBool,
}

impl Subscriber {
    pub(crate) fn new(
        expression: &str,
        trigger: Trigger<Owner>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            expression: expression.to_string(),
            class: if trigger.is_synchronous {
                Class::Sync
            } else {
                Class::Async
            },
            once: trigger.once,
            filters: trigger.filters,
            owner: trigger.owner,
            handler,
            fired: AtomicBool::new(false),
        }
    }

    /// Claim the single delivery of a `once` subscriber.
    ///
    /// Always succeeds for ordinary subscribers.
    pub(crate) fn claim(&self) -> bool {
        !self.once || !self.fired.swap(true, Ordering::AcqRel)
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(|(name, _)| name.as_str())
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("expression", &self.expression)
            .field("class", &self.class)
            .field("once", &self.once)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Registry of active subscriptions.
#[derive(Debug, Default)]
pub struct Registry {
    synchronous: HashMap<String, Vec<Arc<Subscriber>>>,
    asynchronous: HashMap<String, Vec<Arc<Subscriber>>>,
    by_id: HashMap<SubscriptionId, Arc<Subscriber>>,
    owners: HashMap<OwnerKey, Vec<SubscriptionId>>,
}

impl Registry {
    fn table(&self, class: Class) -> &HashMap<String, Vec<Arc<Subscriber>>> {
        match class {
            Class::Sync => &self.synchronous,
            Class::Async => &self.asynchronous,
        }
    }

    fn table_mut(&mut self, class: Class) -> &mut HashMap<String, Vec<Arc<Subscriber>>> {
        match class {
            Class::Sync => &mut self.synchronous,
            Class::Async => &mut self.asynchronous,
        }
    }

    /// Register a subscriber under every name it mentions.
    pub fn insert(&mut self, subscriber: Arc<Subscriber>) {
        let names: Vec<String> = subscriber.names().map(str::to_string).collect();
        let table = self.table_mut(subscriber.class);
        for name in names {
            table
                .entry(name)
                .or_default()
                .insert(0, Arc::clone(&subscriber));
        }
        if let Some(owner) = &subscriber.owner {
            self.owners.entry(owner.key()).or_default().push(subscriber.id);
        }
        self.by_id.insert(subscriber.id, subscriber);
    }

    /// Remove a subscriber from every list it appears in.
    ///
    /// Returns `false` if it was already gone.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let Some(subscriber) = self.by_id.remove(&id) else {
            return false;
        };
        let names: Vec<String> = subscriber.names().map(str::to_string).collect();
        let table = self.table_mut(subscriber.class);
        for name in names {
            if let Some(list) = table.get_mut(&name) {
                list.retain(|s| s.id != id);
                if list.is_empty() {
                    table.remove(&name);
                }
            }
        }
        if let Some(owner) = &subscriber.owner {
            let key = owner.key();
            if let Some(ids) = self.owners.get_mut(&key) {
                ids.retain(|existing| *existing != id);
                if ids.is_empty() {
                    self.owners.remove(&key);
                }
            }
        }
        true
    }

    /// Remove every subscription bound to `owner`.
    pub fn remove_owner(&mut self, owner: &Owner) -> usize {
        let ids = self.owners.remove(&owner.key()).unwrap_or_default();
        ids.into_iter().filter(|id| self.remove(*id)).count()
    }

    /// Subscribers of `class` listed under `name` followed by those under
    /// `*`, each at most once.
    pub fn candidates(&self, name: &str, class: Class) -> Vec<Arc<Subscriber>> {
        let table = self.table(class);
        let named = table.get(name).into_iter().flatten();
        let wildcard = if name == "*" {
            None
        } else {
            table.get("*")
        };

        let mut out: Vec<Arc<Subscriber>> = Vec::new();
        for subscriber in named.chain(wildcard.into_iter().flatten()) {
            if !out.iter().any(|s| s.id == subscriber.id) {
                out.push(Arc::clone(subscriber));
            }
        }
        out
    }

    /// Check whether any subscriber of either class could receive `name`.
    pub fn has_interest(&self, name: &str) -> bool {
        [&self.synchronous, &self.asynchronous]
            .iter()
            .any(|table| table.contains_key(name) || table.contains_key("*"))
    }

    /// Check whether a subscription is still registered.
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Drop every subscription.
    pub fn clear(&mut self) {
        self.synchronous.clear();
        self.asynchronous.clear();
        self.by_id.clear();
        self.owners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::types::Outcome;

    fn subscriber(expression: &str, owner: Option<Owner>) -> Arc<Subscriber> {
        let trigger = automation_trigger::parse(expression, owner).unwrap();
        let handler: Arc<dyn EventHandler> =
            Arc::new(handler_fn(|_, _| async { Ok(Outcome::Continue) }));
        Arc::new(Subscriber::new(expression, trigger, handler))
    }

    fn ids(list: &[Arc<Subscriber>]) -> Vec<SubscriptionId> {
        list.iter().map(|s| s.id).collect()
    }

    #[test]
    fn test_newest_first() {
        let mut registry = Registry::default();
        let first = subscriber("await ping", None);
        let second = subscriber("await ping", None);
        registry.insert(Arc::clone(&first));
        registry.insert(Arc::clone(&second));

        assert_eq!(
            ids(&registry.candidates("ping", Class::Sync)),
            vec![second.id, first.id]
        );
        assert!(registry.candidates("ping", Class::Async).is_empty());
    }

    #[test]
    fn test_wildcard_candidates_are_deduplicated() {
        let mut registry = Registry::default();
        let both = subscriber("ping/*", None);
        let any = subscriber("*", None);
        registry.insert(Arc::clone(&both));
        registry.insert(Arc::clone(&any));

        assert_eq!(
            ids(&registry.candidates("ping", Class::Async)),
            vec![both.id, any.id]
        );
        assert!(registry.has_interest("anything"));
    }

    #[test]
    fn test_remove_from_all_lists() {
        let mut registry = Registry::default();
        let sub = subscriber("read/console", None);
        registry.insert(Arc::clone(&sub));
        assert!(registry.has_interest("console"));

        assert!(registry.remove(sub.id));
        assert!(!registry.remove(sub.id));
        assert!(!registry.has_interest("read"));
        assert!(!registry.has_interest("console"));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_remove_owner() {
        let object = Arc::new(());
        let owner = Owner::of(&object);
        let mut registry = Registry::default();
        registry.insert(subscriber("this a", Some(owner.clone())));
        registry.insert(subscriber("this await b", Some(owner.clone())));
        registry.insert(subscriber("c", None));

        assert_eq!(registry.remove_owner(&owner), 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.remove_owner(&owner), 0);
    }

    #[test]
    fn test_once_claim() {
        let once = subscriber("once ping", None);
        assert!(once.claim());
        assert!(!once.claim());

        let always = subscriber("ping", None);
        assert!(always.claim());
        assert!(always.claim());
    }
}
