//! # Automation Trigger
//!
//! Trigger expressions are the small language subscribers use to describe
//! which events they react to. This crate turns an expression into a
//! [`Trigger`]: the delivery class, the one-shot flag, the optional owner
//! binding and an ordered list of discriminators with compiled filters.
//!
//! ## Syntax
//!
//! ```text
//! [once] [this] [await] name[filter] / descriptor[filter] / *[filter] ...
//! ```
//!
//! - `once` removes the subscription after the first delivery
//! - `this` binds the subscription to the owner passed alongside it
//! - `await` puts the handler in the synchronous class
//! - `*` matches any event name; a bare `[filter]` applies to `*`
//!
//! ## Filters
//!
//! Filters combine regex literals, string memberships and comparisons over
//! the event payload with `&&`, `||`, `!` and parentheses:
//!
//! ```rust
//! use automation_trigger::{parse, Descriptors, Discriminator};
//!
//! let trigger = parse::<()>("await read/console[/error (\\w+)/i]", None).unwrap();
//! assert!(trigger.is_synchronous);
//!
//! let descriptors = Descriptors::single("console", "fatal error E42");
//! let (name, discriminator) = &trigger.filters[1];
//! let strings = descriptors.get(name).unwrap().to_vec();
//!
//! let mut captures = Vec::new();
//! if let Discriminator::Filter(filter) = discriminator {
//!     assert!(filter.matches(None, &strings, &mut captures));
//! }
//! assert_eq!(captures, vec!["error E42".to_string(), "E42".to_string()]);
//! ```
//!
//! Filter evaluation never panics: evaluation errors are reported by
//! [`Filter::evaluate`] and treated as "no match" by [`Filter::matches`].

pub mod descriptors;
pub mod error;
pub mod filter;
pub mod identifiers;
pub mod parser;
pub mod scanner;

// Re-export main types
pub use descriptors::Descriptors;
pub use error::{EvalError, ParseError, ParseResult};
pub use filter::Filter;
pub use identifiers::smash;
pub use parser::{parse, Discriminator, Trigger};
pub use scanner::{Kind, Scanner, Token};
