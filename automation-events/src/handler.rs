//! Event handlers
//!
//! A handler receives the event and the captures collected while its
//! filters matched. It answers requests with an [`Outcome`]; the answer is
//! ignored for notifications.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{Event, Outcome};

/// Error returned by a failing handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a handler invocation.
pub type HandlerResult = Result<Outcome, HandlerError>;

/// Event handler trait for processing events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    ///
    /// `captures` holds the regex matches and groups collected by the
    /// subscription's filters, in evaluation order.
    async fn handle(&self, event: Arc<Event>, captures: Vec<String>) -> HandlerResult;

    /// Identity of the handler object.
    ///
    /// Subscriptions sharing one handler share its identity, and a running
    /// handler is not re-entered through any of them.
    fn identity(&self) -> usize {
        (self as *const Self).cast::<()>() as usize
    }
}

#[async_trait]
impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    async fn handle(&self, event: Arc<Event>, captures: Vec<String>) -> HandlerResult {
        (**self).handle(event, captures).await
    }

    fn identity(&self) -> usize {
        (**self).identity()
    }
}

/// Handler backed by an async closure. See [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> std::fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

/// Wrap an async closure as an [`EventHandler`].
///
/// ```rust
/// use automation_events::{handler_fn, Outcome};
///
/// let handler = handler_fn(|event, _captures| async move {
///     Ok(Outcome::value(event.text.len()))
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Arc<Event>, Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(Arc<Event>, Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, event: Arc<Event>, captures: Vec<String>) -> HandlerResult {
        (self.f)(event, captures).await
    }
}
