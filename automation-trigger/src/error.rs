//! Error types for trigger expressions
//!
//! Parse errors are raised while a subscription is being created and are
//! always reported to the subscriber. Evaluation errors happen while an
//! event is being matched and never leave the dispatcher.

use thiserror::Error;

/// Errors raised while parsing a trigger expression or compiling a filter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A token that is not valid at this position
    #[error("Unexpected token '{text}' at offset {offset}")]
    UnexpectedToken {
        /// Source text of the token
        text: String,
        /// Byte offset into the expression
        offset: usize,
    },

    /// The expression ended while more input was required
    #[error("Unexpected end of expression: expected {expected}")]
    UnexpectedEnd {
        /// What the parser was looking for
        expected: String,
    },

    /// A bracket, string or regex literal was never closed
    #[error("Unterminated {what} starting at offset {offset}")]
    Unterminated {
        /// Kind of construct left open
        what: &'static str,
        /// Byte offset of the opening character
        offset: usize,
    },

    /// The body of a regex literal did not compile
    #[error("Invalid regular expression /{pattern}/: {message}")]
    InvalidRegex {
        /// Regex body as written
        pattern: String,
        /// Compiler message
        message: String,
    },

    /// A regex literal used a flag that is not supported
    #[error("Unknown regular expression flag '{flag}'")]
    InvalidRegexFlag {
        /// The offending flag
        flag: char,
    },

    /// A filter bracket with nothing inside
    #[error("Empty filter at offset {offset}")]
    EmptyFilter {
        /// Byte offset of the opening bracket
        offset: usize,
    },

    /// The trigger expression did not name any event or discriminator
    #[error("Trigger expression '{expression}' does not name an event")]
    NoDiscriminators {
        /// The full expression
        expression: String,
    },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors raised while evaluating a compiled filter against an event.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    /// Property access on a null or undefined value
    #[error("Cannot read property '{property}' of {target}")]
    PropertyOfNothing {
        /// Property being read
        property: String,
        /// `null` or `undefined`
        target: &'static str,
    },

    /// A name that the event payload does not define
    #[error("'{name}' is not defined")]
    NotDefined {
        /// The unresolved name
        name: String,
    },

    /// Ordering comparison between values of different kinds
    #[error("Cannot compare {left} with {right}")]
    Incomparable {
        /// Kind of the left operand
        left: &'static str,
        /// Kind of the right operand
        right: &'static str,
    },
}
