//! # Automation Events
//!
//! This crate provides the in-process event bus of the automation engine,
//! connecting processes, services and sockets that react to each other's
//! lifecycle events.
//!
//! ## Overview
//!
//! The automation-events crate handles:
//! - **Notifications**: Fire-and-forget events, no result
//! - **Requests**: Events that handlers may answer or cancel
//! - **Trigger Expressions**: Declarative subscriptions with filters
//! - **Owner Binding**: Subscriptions scoped to one event source
//! - **Queued Delivery**: FIFO dispatch in a background task
//!
//! ## Delivery Classes
//!
//! A trigger starting with `await` puts its handler in the synchronous
//! class. Synchronous handlers run one at a time, newest subscription
//! first, and may cancel a request. Asynchronous handlers run afterwards:
//! joined for requests, and for notifications started in place and left to
//! finish in the background.
//!
//! A failing handler is reported as a notification on the `error` channel.
//!
//! The outcome of a request is the first answer that is not
//! [`Outcome::Continue`], taking the last synchronous answer first.
//!
//! ## Usage
//!
//! ### Subscribing
//!
//! ```rust
//! use std::sync::Arc;
//! use automation_events::{handler_fn, Descriptors, EventBus, Outcome};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> automation_events::EventResult<()> {
//! let bus = EventBus::new();
//!
//! // Answer `port` requests from a console that reports its listening port
//! bus.on(
//!     "await port/console[/listening on (\\d+)/]",
//!     handler_fn(|_event, captures| async move {
//!         Ok(Outcome::value(captures[1].clone()))
//!     }),
//! )?;
//!
//! let port = bus
//!     .emit_now("port", (Descriptors::single("console", "listening on 8080"), "node"))
//!     .await?;
//! assert_eq!(port, Outcome::value("8080"));
//! # Ok(())
//! # }
//! ```
//!
//! ### Raising Events
//!
//! - [`EventBus::notify`] queues a notification and returns immediately
//! - [`EventBus::notify_now`] delivers a notification before returning
//! - [`EventBus::emit`] queues a request and waits for its outcome
//! - [`EventBus::emit_now`] delivers a request immediately
//!
//! Events nobody could receive are skipped without allocating anything.
//!
//! ### Emitters
//!
//! An [`Emitter`] ties an object to the bus: its events carry the object
//! as source and its subscriptions are removed when it is disposed.

pub mod bus;
pub mod channels;
pub mod config;
mod dispatcher;
pub mod emitter;
pub mod error;
pub mod handler;
mod registry;
pub mod types;

// Re-export main types
pub use automation_trigger::Descriptors;
pub use bus::{BusStats, EventBus, SubscribeOptions, Subscription};
pub use channels::Channel;
pub use config::{BusConfig, ConfigError};
pub use emitter::{Emitter, NotificationOptions, Notifier, RequestOptions, Requester};
pub use error::{EventError, EventResult};
pub use handler::{handler_fn, EventHandler, HandlerError, HandlerFn, HandlerResult};
pub use registry::SubscriptionId;
pub use types::{Arg, Delivery, Event, EventArgs, IntoArgs, Outcome, Owner, OwnerKey};
