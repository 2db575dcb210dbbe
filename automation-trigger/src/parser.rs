//! Trigger expression parser.
//!
//! A trigger expression describes when a subscriber fires:
//!
//! ```text
//! [modifiers] discriminator[filter] / discriminator[filter] / ...
//! ```
//!
//! Modifiers are `once` (remove after the first delivery), `this` (bind to the
//! owner supplied with the subscription) and `await` (synchronous class:
//! handlers run one at a time and may cancel requests). A discriminator is an
//! event name, a descriptor name, or `*` for any event. A bracketed filter with
//! no name in front of it applies to `*`.

use std::sync::Arc;

use crate::error::{ParseError, ParseResult};
use crate::filter::Filter;
use crate::identifiers::smash;
use crate::scanner::{Kind, Scanner, Token};

/// The test applied for one discriminator.
#[derive(Debug, Clone)]
pub enum Discriminator {
    /// Presence of the name is enough
    Always,
    /// A compiled filter must also match
    Filter(Arc<Filter>),
}

impl Discriminator {
    /// Check whether this discriminator carries a filter.
    pub fn is_always(&self) -> bool {
        matches!(self, Discriminator::Always)
    }
}

/// A parsed trigger expression.
///
/// `O` is the owner type of the bus; the parser only carries it through.
#[derive(Debug, Clone)]
pub struct Trigger<O> {
    /// Handlers run one at a time, before asynchronous handlers
    pub is_synchronous: bool,
    /// Remove the subscription after its first delivery
    pub once: bool,
    /// Ordered discriminator name to test
    pub filters: Vec<(String, Discriminator)>,
    /// `this` appeared in the modifiers
    pub binds_this: bool,
    /// The owner this subscription is bound to
    pub owner: Option<O>,
}

impl<O> Trigger<O> {
    /// Discriminator names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(|(name, _)| name.as_str())
    }

    /// `this` was requested but no owner was supplied.
    pub fn unbound_this(&self) -> bool {
        self.binds_this && self.owner.is_none()
    }

    fn set(&mut self, name: String, discriminator: Discriminator) {
        match self.filters.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = discriminator,
            None => self.filters.push((name, discriminator)),
        }
    }
}

/// Parse a trigger expression.
///
/// `owner` is bound only when the expression uses the `this` modifier.
pub fn parse<O>(expression: &str, owner: Option<O>) -> ParseResult<Trigger<O>> {
    let mut scanner = Scanner::new(expression);
    let mut trigger = Trigger {
        is_synchronous: false,
        once: false,
        filters: Vec::new(),
        binds_this: false,
        owner: None,
    };

    scanner.skip_whitespace();
    loop {
        let token = scanner.peek()?;
        if !token.is(Kind::Identifier) {
            break;
        }
        match token.text {
            "once" => trigger.once = true,
            "this" => trigger.binds_this = true,
            "await" => trigger.is_synchronous = true,
            _ => break,
        }
        scanner.take()?;
        let separator = scanner.peek()?;
        if !matches!(separator.kind, Kind::Whitespace | Kind::EndOfFile) {
            return Err(unexpected(separator));
        }
        scanner.skip_whitespace();
    }

    loop {
        scanner.skip_whitespace();
        let token = scanner.take()?;
        let name = match token.kind {
            Kind::EndOfFile => break,
            Kind::Slash => continue,
            Kind::Asterisk => "*".to_string(),
            Kind::Identifier => take_name(&mut scanner, token)?,
            Kind::OpenBracket => {
                let filter = Filter::compile_bracketed(&mut scanner, token.offset)?;
                trigger.set("*".to_string(), Discriminator::Filter(Arc::new(filter)));
                expect_separator(&scanner)?;
                continue;
            }
            _ => return Err(unexpected(token)),
        };

        scanner.skip_whitespace();
        let next = scanner.peek()?;
        if next.is(Kind::OpenBracket) {
            scanner.take()?;
            let filter = Filter::compile_bracketed(&mut scanner, next.offset)?;
            trigger.set(name, Discriminator::Filter(Arc::new(filter)));
        } else {
            trigger.set(name, Discriminator::Always);
        }
        expect_separator(&scanner)?;
    }

    if trigger.filters.is_empty() {
        return Err(ParseError::NoDiscriminators {
            expression: expression.to_string(),
        });
    }

    if trigger.binds_this {
        trigger.owner = owner;
    }
    Ok(trigger)
}

/// Collect a possibly hyphenated name starting at `first` and normalize it.
fn take_name(scanner: &mut Scanner<'_>, first: Token<'_>) -> ParseResult<String> {
    let start = first.offset;
    let mut end = first.offset + first.text.len();
    loop {
        let mut ahead = scanner.clone();
        if !ahead.take()?.is(Kind::Minus) {
            break;
        }
        let part = ahead.take()?;
        if !matches!(part.kind, Kind::Identifier | Kind::NumericLiteral) {
            return Err(unexpected(part));
        }
        end = part.offset + part.text.len();
        *scanner = ahead;
    }

    let name = smash(&scanner.source()[start..end]);
    if name.is_empty() {
        return Err(unexpected(first));
    }
    Ok(name)
}

fn expect_separator(scanner: &Scanner<'_>) -> ParseResult<()> {
    let next = scanner.peek_significant()?;
    match next.kind {
        Kind::Slash | Kind::EndOfFile => Ok(()),
        _ => Err(unexpected(next)),
    }
}

fn unexpected(token: Token<'_>) -> ParseError {
    ParseError::UnexpectedToken {
        text: token.text.to_string(),
        offset: token.offset,
    }
}
