//! Event types for in-process dispatch
//!
//! This module defines the event envelope handed to handlers, the outcome
//! of a request, owner identities, and the positional argument shapes
//! accepted by `emit`/`notify`.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use automation_trigger::Descriptors;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EventError, EventResult};

// ============================================================================
// Owners
// ============================================================================

/// Identity of an object that owns subscriptions or emits events.
///
/// An `Owner` never keeps its object alive. Two owners are equal when they
/// refer to the same allocation.
#[derive(Clone)]
pub struct Owner {
    object: Weak<dyn Any + Send + Sync>,
}

/// Hashable identity key of an [`Owner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerKey(usize);

impl Owner {
    /// Create an owner identity for a shared object.
    pub fn of<T: Any + Send + Sync>(object: &Arc<T>) -> Self {
        let weak = Arc::downgrade(object);
        let object: Weak<dyn Any + Send + Sync> = weak;
        Self { object }
    }

    /// Identity key.
    pub fn key(&self) -> OwnerKey {
        OwnerKey(self.object.as_ptr().cast::<()>() as usize)
    }

    /// Check whether the object is still reachable.
    pub fn is_alive(&self) -> bool {
        self.object.strong_count() > 0
    }

    /// Check whether two owners refer to the same live object.
    pub fn same_as(&self, other: &Owner) -> bool {
        self.key() == other.key() && self.is_alive()
    }

    /// Recover the object, if it is still alive and of type `T`.
    pub fn upgrade<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.object.upgrade()?.downcast::<T>().ok()
    }
}

impl PartialEq for Owner {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Owner {}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("key", &format_args!("{:#x}", self.key().0))
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ============================================================================
// Events
// ============================================================================

/// Delivery class of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Fire-and-forget, no result
    Notification,
    /// Answerable and cancellable
    Request,
}

/// Event envelope delivered to handlers.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique event ID
    pub id: Uuid,

    /// Normalized event name
    pub name: String,

    /// Context descriptors used by filters
    pub descriptors: Descriptors,

    /// Object that raised the event (identity only)
    pub source: Option<Owner>,

    /// Event text, empty when none was given
    pub text: String,

    /// Structured payload
    pub data: Option<serde_json::Value>,

    /// Notification or request
    pub delivery: Delivery,

    /// Timestamp when the event was created
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event from resolved arguments.
    pub(crate) fn new(name: String, delivery: Delivery, args: EventArgs) -> Self {
        Self {
            id: Uuid::now_v7(),
            name,
            descriptors: args.descriptors,
            source: args.source,
            text: args.text,
            data: args.data,
            delivery,
            timestamp: Utc::now(),
        }
    }

    /// Check whether the event expects a result.
    pub fn is_request(&self) -> bool {
        self.delivery == Delivery::Request
    }

    /// Recover the source object, if it is alive and of type `T`.
    pub fn source_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.source.as_ref()?.upgrade()
    }

    /// Parse the payload into a specific type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone().unwrap_or(serde_json::Value::Null))
    }

    /// Strings a filter on `discriminator` is evaluated against.
    ///
    /// Returns `None` when the discriminator is neither the event name, the
    /// wildcard, nor a descriptor of this event.
    pub fn context_strings(&self, discriminator: &str) -> Option<Vec<String>> {
        let mut strings = if discriminator == self.name || discriminator == "*" {
            Vec::new()
        } else {
            self.descriptors.get(discriminator)?.to_vec()
        };
        strings.push(self.text.clone());
        Some(strings)
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    /// No opinion, ask someone else
    #[default]
    Continue,
    /// The event is vetoed; dispatch stops
    Cancelled,
    /// An answer
    Value(serde_json::Value),
}

impl Outcome {
    /// Wrap a serializable answer.
    pub fn value(value: impl Into<serde_json::Value>) -> Self {
        Outcome::Value(value.into())
    }

    /// Check for `Continue`.
    pub fn is_continue(&self) -> bool {
        matches!(self, Outcome::Continue)
    }

    /// Check for `Cancelled`.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// Borrow the answer, if any.
    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Outcome::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Take the answer, if any.
    pub fn into_value(self) -> Option<serde_json::Value> {
        match self {
            Outcome::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Take the answer, or compute one when nobody answered.
    ///
    /// Cancellation is reported as `None`.
    pub fn or_else(self, default: impl FnOnce() -> serde_json::Value) -> Option<serde_json::Value> {
        match self {
            Outcome::Value(value) => Some(value),
            Outcome::Continue => Some(default()),
            Outcome::Cancelled => None,
        }
    }
}

impl From<()> for Outcome {
    fn from(_: ()) -> Self {
        Outcome::Continue
    }
}

// ============================================================================
// Arguments
// ============================================================================

/// One positional argument of `emit`/`notify`.
#[derive(Debug, Clone)]
pub enum Arg {
    /// Leading descriptor set
    Descriptors(Descriptors),
    /// Event text
    Text(String),
    /// Structured payload
    Data(serde_json::Value),
    /// Source object
    Source(Owner),
}

impl From<&str> for Arg {
    fn from(text: &str) -> Self {
        Arg::Text(text.to_string())
    }
}

impl From<String> for Arg {
    fn from(text: String) -> Self {
        Arg::Text(text)
    }
}

impl From<serde_json::Value> for Arg {
    fn from(data: serde_json::Value) -> Self {
        Arg::Data(data)
    }
}

impl From<Owner> for Arg {
    fn from(source: Owner) -> Self {
        Arg::Source(source)
    }
}

impl From<&Owner> for Arg {
    fn from(source: &Owner) -> Self {
        Arg::Source(source.clone())
    }
}

impl From<Descriptors> for Arg {
    fn from(descriptors: Descriptors) -> Self {
        Arg::Descriptors(descriptors)
    }
}

impl From<&Descriptors> for Arg {
    fn from(descriptors: &Descriptors) -> Self {
        Arg::Descriptors(descriptors.clone())
    }
}

/// Conversion into positional arguments.
///
/// Implemented for `()`, single arguments, tuples of up to four arguments
/// and `Vec<Arg>`.
pub trait IntoArgs {
    /// Produce the positional argument list.
    fn into_args(self) -> Vec<Arg>;
}

impl IntoArgs for () {
    fn into_args(self) -> Vec<Arg> {
        Vec::new()
    }
}

impl IntoArgs for Vec<Arg> {
    fn into_args(self) -> Vec<Arg> {
        self
    }
}

macro_rules! single_arg {
    ($($ty:ty),*) => {
        $(
            impl IntoArgs for $ty {
                fn into_args(self) -> Vec<Arg> {
                    vec![Arg::from(self)]
                }
            }
        )*
    };
}

single_arg!(&str, String, serde_json::Value, Owner, &Owner, Descriptors, &Descriptors, Arg);

impl<A: Into<Arg>, B: Into<Arg>> IntoArgs for (A, B) {
    fn into_args(self) -> Vec<Arg> {
        vec![self.0.into(), self.1.into()]
    }
}

impl<A: Into<Arg>, B: Into<Arg>, C: Into<Arg>> IntoArgs for (A, B, C) {
    fn into_args(self) -> Vec<Arg> {
        vec![self.0.into(), self.1.into(), self.2.into()]
    }
}

impl<A: Into<Arg>, B: Into<Arg>, C: Into<Arg>, D: Into<Arg>> IntoArgs for (A, B, C, D) {
    fn into_args(self) -> Vec<Arg> {
        vec![self.0.into(), self.1.into(), self.2.into(), self.3.into()]
    }
}

/// Positional arguments resolved into event fields.
#[derive(Debug, Clone, Default)]
pub struct EventArgs {
    /// Descriptor set (shared empty set when absent)
    pub descriptors: Descriptors,
    /// Source object
    pub source: Option<Owner>,
    /// Event text
    pub text: String,
    /// Payload
    pub data: Option<serde_json::Value>,
}

impl EventArgs {
    /// Resolve positional arguments by count and kind.
    ///
    /// An optional leading descriptor set is taken first. The rest map as:
    /// nothing; one text, payload or source; text and payload; source and
    /// text; source and payload; or source, text and payload in that order.
    ///
    /// A lone [`Arg::Source`] sets the source rather than the payload; a
    /// payload is always passed as [`Arg::Data`].
    pub fn resolve(args: Vec<Arg>) -> EventResult<Self> {
        let mut args = args.into_iter().peekable();
        let descriptors = match args.next_if(|arg| matches!(arg, Arg::Descriptors(_))) {
            Some(Arg::Descriptors(descriptors)) => descriptors,
            _ => Descriptors::none(),
        };
        let rest: Vec<Arg> = args.collect();

        if rest.len() > 3 {
            return Err(EventError::InvalidArguments(format!(
                "expected at most 3 arguments after descriptors, got {}",
                rest.len()
            )));
        }

        let supported = matches!(
            rest.as_slice(),
            []
                | [Arg::Text(_)]
                | [Arg::Data(_)]
                | [Arg::Source(_)]
                | [Arg::Text(_), Arg::Data(_)]
                | [Arg::Source(_), Arg::Text(_)]
                | [Arg::Source(_), Arg::Data(_)]
                | [Arg::Source(_), Arg::Text(_), Arg::Data(_)]
        );
        if !supported {
            return Err(EventError::InvalidArguments(format!(
                "unsupported argument shape ({})",
                describe(&rest)
            )));
        }

        let mut resolved = EventArgs {
            descriptors,
            ..EventArgs::default()
        };
        for arg in rest {
            match arg {
                Arg::Text(text) => resolved.text = text,
                Arg::Data(data) => resolved.data = Some(data),
                Arg::Source(source) => resolved.source = Some(source),
                Arg::Descriptors(_) => {}
            }
        }
        Ok(resolved)
    }
}

fn describe(args: &[Arg]) -> String {
    args.iter()
        .map(|arg| match arg {
            Arg::Descriptors(_) => "descriptors",
            Arg::Text(_) => "text",
            Arg::Data(_) => "data",
            Arg::Source(_) => "source",
        })
        .collect::<Vec<_>>()
        .join(", ")
}
