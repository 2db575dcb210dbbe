//! On-demand scanner for trigger expressions.
//!
//! The scanner hands out one token at a time so that the parser can switch
//! to raw character scanning where the token grammar does not apply, namely
//! the body of a regex literal inside a filter.

use crate::error::{ParseError, ParseResult};

/// Token kinds produced by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    EndOfFile,
    Whitespace,
    Identifier,
    StringLiteral,
    NumericLiteral,
    Slash,
    Backslash,
    Asterisk,
    Dot,
    Minus,
    OpenBracket,
    CloseBracket,
    OpenParen,
    CloseParen,
    AmpersandAmpersand,
    BarBar,
    Exclamation,
    EqualsEquals,
    EqualsEqualsEquals,
    ExclamationEquals,
    ExclamationEqualsEquals,
    LessThan,
    LessThanEquals,
    GreaterThan,
    GreaterThanEquals,
    /// Any character the grammar does not use
    Unknown,
}

/// A scanned token, borrowing its text from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// Token kind
    pub kind: Kind,
    /// Exact source text, including quotes for string literals
    pub text: &'a str,
    /// Byte offset of the first character
    pub offset: usize,
}

impl<'a> Token<'a> {
    /// Check the token kind.
    pub fn is(&self, kind: Kind) -> bool {
        self.kind == kind
    }

    /// Decode the value of a string literal token.
    pub fn string_value(&self) -> String {
        let inner = &self.text[1..self.text.len().saturating_sub(1)];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some(other) => out.push(other),
                None => {}
            }
        }
        out
    }
}

/// A regex literal scanned from raw characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexLiteral<'a> {
    /// Text between the slashes
    pub body: &'a str,
    /// Flag characters following the closing slash
    pub flags: &'a str,
    /// Byte offset of the opening slash
    pub offset: usize,
}

/// Scanner over a trigger expression.
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    /// Create a scanner positioned at the start of `source`.
    pub fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    /// Current byte offset.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// The full source text.
    pub fn source(&self) -> &'a str {
        self.source
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Skip whitespace and newlines.
    pub fn skip_whitespace(&mut self) {
        let skipped = self.rest().len() - self.rest().trim_start().len();
        self.pos += skipped;
    }

    /// Look at the next token without consuming it.
    pub fn peek(&self) -> ParseResult<Token<'a>> {
        self.clone().take()
    }

    /// Look at the next token that is not whitespace, without consuming anything.
    pub fn peek_significant(&self) -> ParseResult<Token<'a>> {
        let mut ahead = self.clone();
        ahead.skip_whitespace();
        ahead.take()
    }

    /// Consume and return the next token.
    pub fn take(&mut self) -> ParseResult<Token<'a>> {
        let start = self.pos;
        let Some(c) = self.peek_char() else {
            return Ok(Token {
                kind: Kind::EndOfFile,
                text: "",
                offset: start,
            });
        };

        let kind = match c {
            c if c.is_whitespace() => {
                self.skip_whitespace();
                Kind::Whitespace
            }
            c if is_identifier_start(c) => {
                self.advance_while(is_identifier_part);
                Kind::Identifier
            }
            c if c.is_ascii_digit() => {
                self.advance_while(|c| c.is_ascii_digit());
                if self.rest().starts_with('.')
                    && self.rest()[1..].starts_with(|c: char| c.is_ascii_digit())
                {
                    self.pos += 1;
                    self.advance_while(|c| c.is_ascii_digit());
                }
                Kind::NumericLiteral
            }
            '"' | '\'' => {
                self.scan_string(c)?;
                Kind::StringLiteral
            }
            _ => self.scan_punctuation(c),
        };

        Ok(Token {
            kind,
            text: &self.source[start..self.pos],
            offset: start,
        })
    }

    /// Scan a regex literal whose opening slash has already been consumed.
    ///
    /// `open` is the offset of that slash. Slashes inside a character class or
    /// after a backslash do not terminate the body.
    pub fn take_regex(&mut self, open: usize) -> ParseResult<RegexLiteral<'a>> {
        let start = self.pos;
        let mut in_class = false;
        let mut escaped = false;

        loop {
            let Some(c) = self.peek_char() else {
                return Err(ParseError::Unterminated {
                    what: "regular expression",
                    offset: open,
                });
            };
            if c == '\n' {
                return Err(ParseError::Unterminated {
                    what: "regular expression",
                    offset: open,
                });
            }
            self.pos += c.len_utf8();

            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' => escaped = true,
                '[' => in_class = true,
                ']' => in_class = false,
                '/' if !in_class => break,
                _ => {}
            }
        }

        let body = &self.source[start..self.pos - 1];
        let flags_start = self.pos;
        self.advance_while(|c| c.is_ascii_alphabetic());
        Ok(RegexLiteral {
            body,
            flags: &self.source[flags_start..self.pos],
            offset: open,
        })
    }

    fn advance_while(&mut self, pred: impl Fn(char) -> bool) {
        let len: usize = self
            .rest()
            .chars()
            .take_while(|c| pred(*c))
            .map(char::len_utf8)
            .sum();
        self.pos += len;
    }

    fn scan_string(&mut self, quote: char) -> ParseResult<()> {
        let open = self.pos;
        self.pos += quote.len_utf8();
        let mut escaped = false;
        while let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                return Ok(());
            }
        }
        Err(ParseError::Unterminated {
            what: "string literal",
            offset: open,
        })
    }

    fn scan_punctuation(&mut self, c: char) -> Kind {
        let rest = self.rest();
        let (kind, len) = if rest.starts_with("===") {
            (Kind::EqualsEqualsEquals, 3)
        } else if rest.starts_with("!==") {
            (Kind::ExclamationEqualsEquals, 3)
        } else if rest.starts_with("==") {
            (Kind::EqualsEquals, 2)
        } else if rest.starts_with("!=") {
            (Kind::ExclamationEquals, 2)
        } else if rest.starts_with("&&") {
            (Kind::AmpersandAmpersand, 2)
        } else if rest.starts_with("||") {
            (Kind::BarBar, 2)
        } else if rest.starts_with("<=") {
            (Kind::LessThanEquals, 2)
        } else if rest.starts_with(">=") {
            (Kind::GreaterThanEquals, 2)
        } else {
            let kind = match c {
                '/' => Kind::Slash,
                '\\' => Kind::Backslash,
                '*' => Kind::Asterisk,
                '.' => Kind::Dot,
                '-' => Kind::Minus,
                '[' => Kind::OpenBracket,
                ']' => Kind::CloseBracket,
                '(' => Kind::OpenParen,
                ')' => Kind::CloseParen,
                '!' => Kind::Exclamation,
                '<' => Kind::LessThan,
                '>' => Kind::GreaterThan,
                _ => Kind::Unknown,
            };
            (kind, c.len_utf8())
        };
        self.pos += len;
        kind
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
