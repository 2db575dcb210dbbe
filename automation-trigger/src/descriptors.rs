//! Descriptor sets attached to events.
//!
//! A descriptor set is an immutable bag of named string lists that gives
//! filters extra context about an event, e.g. `{console: "node"}` on a line
//! read from a child process. Keys are normalized with [`smash`] so that a
//! trigger discriminator `console` matches a descriptor named `Console`.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::identifiers::smash;

/// Immutable, cheaply cloneable set of named string lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptors {
    entries: Arc<BTreeMap<String, Vec<String>>>,
}

static NONE: OnceLock<Descriptors> = OnceLock::new();

impl Descriptors {
    /// The shared empty set used when an event carries no descriptors.
    pub fn none() -> Self {
        NONE.get_or_init(Descriptors::default).clone()
    }

    /// Create a set with a single descriptor value.
    pub fn single(name: impl AsRef<str>, value: impl Into<String>) -> Self {
        Self::default().with(name, value)
    }

    /// Add a value under `name`, returning the extended set.
    ///
    /// Values under one name keep their insertion order; duplicates are ignored.
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        let value = value.into();
        let values = Arc::make_mut(&mut self.entries)
            .entry(smash(name.as_ref()))
            .or_default();
        if !values.contains(&value) {
            values.push(value);
        }
        self
    }

    /// Get the values recorded under `name`, or `None` when the descriptor is absent.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries.get(&smash(name)).map(Vec::as_slice)
    }

    /// Check whether a descriptor is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&smash(name))
    }

    /// Names of all descriptors, in normalized form.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Check whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of descriptors in the set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K, V> FromIterator<(K, V)> for Descriptors
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Descriptors::default(), |set, (name, value)| set.with(name, value))
    }
}
