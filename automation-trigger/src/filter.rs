//! Filter compiler.
//!
//! A filter is the bracketed part of a trigger expression, e.g.
//! `exited[exitCode != 0]` or `read/console[/error (\w+)/i]`. The grammar is a
//! small boolean language:
//!
//! ```text
//! filter     := or
//! or         := and ( "||" and )*
//! and        := unary ( "&&" unary )*
//! unary      := "!" unary | primary
//! primary    := "(" or ")" | regex | membership | comparison
//! regex      := "/" body "/" flags?
//! membership := string            (followed by &&, ||, ")" or "]")
//! comparison := operand ( op operand )?
//! operand    := string | number | true | false | null | undefined | path
//! path       := ident ( "." ident | "[" (number | string) "]" )*
//! ```
//!
//! Regex literals and string memberships test the context strings (descriptor
//! values plus the event text). Paths read the event payload; `$strings` and
//! `$captures` name the context and capture lists. Regex matches append their
//! whole match and capture groups to the capture list. A name the payload does
//! not define is an evaluation error, so the filter does not match.

use std::cmp::Ordering;
use std::fmt;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::error::{EvalError, ParseError, ParseResult};
use crate::scanner::{Kind, Scanner, Token};

/// A compiled filter predicate.
#[derive(Debug, Clone)]
pub struct Filter {
    source: String,
    root: Node,
}

#[derive(Debug, Clone)]
enum Node {
    Or(Vec<Node>),
    And(Vec<Node>),
    Not(Box<Node>),
    Regex(Regex),
    Contains(String),
    Compare(Operand, CompareOp, Operand),
    Truthy(Operand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    LooseEq,
    StrictEq,
    LooseNe,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
enum Operand {
    Literal(Value),
    Undefined,
    Path(Root, Vec<Segment>),
}

#[derive(Debug, Clone)]
enum Root {
    Payload(String),
    Strings,
    Captures,
}

#[derive(Debug, Clone)]
enum Segment {
    Field(String),
    Index(usize),
}

impl Filter {
    /// Compile a filter from a standalone string, without the surrounding brackets.
    pub fn compile(text: &str) -> ParseResult<Self> {
        let wrapped = format!("{text}]");
        let mut scanner = Scanner::new(&wrapped);
        let filter = Self::compile_bracketed(&mut scanner, 0)?;
        let trailing = scanner.peek_significant()?;
        if !trailing.is(Kind::EndOfFile) {
            return Err(unexpected(trailing));
        }
        Ok(filter)
    }

    /// Compile the filter starting just after an opening `[`.
    ///
    /// Consumes the closing `]`. `open` is the offset of the opening bracket.
    pub fn compile_bracketed(scanner: &mut Scanner<'_>, open: usize) -> ParseResult<Self> {
        let start = scanner.offset();
        scanner.skip_whitespace();
        let first = scanner.peek()?;
        match first.kind {
            Kind::CloseBracket => return Err(ParseError::EmptyFilter { offset: open }),
            Kind::EndOfFile => {
                return Err(ParseError::Unterminated {
                    what: "filter",
                    offset: open,
                })
            }
            _ => {}
        }

        let root = parse_or(scanner, open)?;

        scanner.skip_whitespace();
        let close = scanner.take()?;
        match close.kind {
            Kind::CloseBracket => {}
            Kind::EndOfFile => {
                return Err(ParseError::Unterminated {
                    what: "filter",
                    offset: open,
                })
            }
            _ => return Err(unexpected(close)),
        }

        let source = scanner.source()[start..close.offset].trim().to_string();
        Ok(Self { source, root })
    }

    /// The filter text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the filter.
    ///
    /// `payload` is the event data, `strings` the context strings for the
    /// discriminator, and `captures` collects regex captures.
    pub fn evaluate(
        &self,
        payload: Option<&Value>,
        strings: &[String],
        captures: &mut Vec<String>,
    ) -> Result<bool, EvalError> {
        let mut scope = Scope {
            payload,
            strings,
            captures,
        };
        eval(&self.root, &mut scope)
    }

    /// Evaluate the filter, treating evaluation errors as "no match".
    pub fn matches(
        &self,
        payload: Option<&Value>,
        strings: &[String],
        captures: &mut Vec<String>,
    ) -> bool {
        match self.evaluate(payload, strings, captures) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::debug!(filter = %self.source, error = %e, "Filter evaluation failed");
                false
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.source)
    }
}

fn unexpected(token: Token<'_>) -> ParseError {
    if token.is(Kind::EndOfFile) {
        ParseError::UnexpectedEnd {
            expected: "filter expression".to_string(),
        }
    } else {
        ParseError::UnexpectedToken {
            text: token.text.to_string(),
            offset: token.offset,
        }
    }
}

fn unterminated_or(token: Token<'_>, open: usize) -> ParseError {
    if token.is(Kind::EndOfFile) {
        ParseError::Unterminated {
            what: "filter",
            offset: open,
        }
    } else {
        unexpected(token)
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn parse_or(scanner: &mut Scanner<'_>, open: usize) -> ParseResult<Node> {
    let mut terms = vec![parse_and(scanner, open)?];
    while scanner.peek_significant()?.is(Kind::BarBar) {
        scanner.skip_whitespace();
        scanner.take()?;
        terms.push(parse_and(scanner, open)?);
    }
    Ok(if terms.len() == 1 {
        terms.remove(0)
    } else {
        Node::Or(terms)
    })
}

fn parse_and(scanner: &mut Scanner<'_>, open: usize) -> ParseResult<Node> {
    let mut terms = vec![parse_unary(scanner, open)?];
    while scanner.peek_significant()?.is(Kind::AmpersandAmpersand) {
        scanner.skip_whitespace();
        scanner.take()?;
        terms.push(parse_unary(scanner, open)?);
    }
    Ok(if terms.len() == 1 {
        terms.remove(0)
    } else {
        Node::And(terms)
    })
}

fn parse_unary(scanner: &mut Scanner<'_>, open: usize) -> ParseResult<Node> {
    scanner.skip_whitespace();
    if scanner.peek()?.is(Kind::Exclamation) {
        scanner.take()?;
        return Ok(Node::Not(Box::new(parse_unary(scanner, open)?)));
    }
    parse_primary(scanner, open)
}

fn parse_primary(scanner: &mut Scanner<'_>, open: usize) -> ParseResult<Node> {
    scanner.skip_whitespace();
    let token = scanner.peek()?;
    match token.kind {
        Kind::OpenParen => {
            scanner.take()?;
            let inner = parse_or(scanner, open)?;
            scanner.skip_whitespace();
            let close = scanner.take()?;
            if !close.is(Kind::CloseParen) {
                return Err(unterminated_or(close, open));
            }
            Ok(inner)
        }
        Kind::Slash => {
            scanner.take()?;
            let literal = scanner.take_regex(token.offset)?;
            Ok(Node::Regex(build_regex(literal.body, literal.flags)?))
        }
        Kind::StringLiteral => {
            let mut ahead = scanner.clone();
            ahead.take()?;
            let next = ahead.peek_significant()?;
            if matches!(
                next.kind,
                Kind::AmpersandAmpersand | Kind::BarBar | Kind::CloseBracket | Kind::CloseParen
            ) {
                scanner.take()?;
                return Ok(Node::Contains(token.string_value()));
            }
            parse_comparison(scanner, open)
        }
        _ => parse_comparison(scanner, open),
    }
}

fn parse_comparison(scanner: &mut Scanner<'_>, open: usize) -> ParseResult<Node> {
    let left = parse_operand(scanner, open)?;
    let op = match scanner.peek_significant()?.kind {
        Kind::EqualsEquals => CompareOp::LooseEq,
        Kind::EqualsEqualsEquals => CompareOp::StrictEq,
        Kind::ExclamationEquals => CompareOp::LooseNe,
        Kind::ExclamationEqualsEquals => CompareOp::StrictNe,
        Kind::LessThan => CompareOp::Lt,
        Kind::LessThanEquals => CompareOp::Le,
        Kind::GreaterThan => CompareOp::Gt,
        Kind::GreaterThanEquals => CompareOp::Ge,
        _ => return Ok(Node::Truthy(left)),
    };
    scanner.skip_whitespace();
    scanner.take()?;
    let right = parse_operand(scanner, open)?;
    Ok(Node::Compare(left, op, right))
}

fn parse_operand(scanner: &mut Scanner<'_>, open: usize) -> ParseResult<Operand> {
    scanner.skip_whitespace();
    let token = scanner.take()?;
    match token.kind {
        Kind::StringLiteral => Ok(Operand::Literal(Value::String(token.string_value()))),
        Kind::NumericLiteral => Ok(Operand::Literal(number(token)?)),
        Kind::Minus => {
            let digits = scanner.take()?;
            if !digits.is(Kind::NumericLiteral) {
                return Err(unterminated_or(digits, open));
            }
            match number(digits)? {
                Value::Number(n) => Ok(Operand::Literal(
                    serde_json::Number::from_f64(-n.as_f64().unwrap_or_default())
                        .map_or(Value::Null, Value::Number),
                )),
                other => Ok(Operand::Literal(other)),
            }
        }
        Kind::Identifier => {
            let operand = match token.text {
                "true" => return Ok(Operand::Literal(Value::Bool(true))),
                "false" => return Ok(Operand::Literal(Value::Bool(false))),
                "null" => return Ok(Operand::Literal(Value::Null)),
                "undefined" => return Ok(Operand::Undefined),
                "$strings" => Root::Strings,
                "$captures" => Root::Captures,
                name => Root::Payload(name.to_string()),
            };
            let segments = parse_segments(scanner, open)?;
            Ok(Operand::Path(operand, segments))
        }
        _ => Err(unterminated_or(token, open)),
    }
}

fn parse_segments(scanner: &mut Scanner<'_>, open: usize) -> ParseResult<Vec<Segment>> {
    let mut segments = Vec::new();
    loop {
        let next = scanner.peek()?;
        match next.kind {
            Kind::Dot => {
                scanner.take()?;
                let field = scanner.take()?;
                if !field.is(Kind::Identifier) {
                    return Err(unterminated_or(field, open));
                }
                segments.push(Segment::Field(field.text.to_string()));
            }
            Kind::OpenBracket => {
                scanner.take()?;
                scanner.skip_whitespace();
                let key = scanner.take()?;
                let segment = match key.kind {
                    Kind::NumericLiteral => key
                        .text
                        .parse::<usize>()
                        .map(Segment::Index)
                        .map_err(|_| unexpected(key))?,
                    Kind::StringLiteral => Segment::Field(key.string_value()),
                    _ => return Err(unterminated_or(key, open)),
                };
                scanner.skip_whitespace();
                let close = scanner.take()?;
                if !close.is(Kind::CloseBracket) {
                    return Err(unterminated_or(close, open));
                }
                segments.push(segment);
            }
            _ => return Ok(segments),
        }
    }
}

fn number(token: Token<'_>) -> ParseResult<Value> {
    token
        .text
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| unexpected(token))
}

fn build_regex(body: &str, flags: &str) -> ParseResult<Regex> {
    let mut builder = RegexBuilder::new(body);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            // global, unicode and sticky have no meaning for a single test
            'g' | 'u' | 'y' => {}
            other => return Err(ParseError::InvalidRegexFlag { flag: other }),
        }
    }
    builder.build().map_err(|e| ParseError::InvalidRegex {
        pattern: body.to_string(),
        message: e.to_string(),
    })
}

// ============================================================================
// Evaluation
// ============================================================================

struct Scope<'a> {
    payload: Option<&'a Value>,
    strings: &'a [String],
    captures: &'a mut Vec<String>,
}

/// A resolved operand: `None` stands for JavaScript `undefined`.
type Resolved = Option<Value>;

fn eval(node: &Node, scope: &mut Scope<'_>) -> Result<bool, EvalError> {
    match node {
        Node::Or(terms) => {
            for term in terms {
                if eval(term, scope)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Node::And(terms) => {
            for term in terms {
                if !eval(term, scope)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Node::Not(inner) => Ok(!eval(inner, scope)?),
        Node::Regex(regex) => {
            for text in scope.strings {
                if let Some(caps) = regex.captures(text) {
                    scope.captures.extend(
                        caps.iter()
                            .map(|group| group.map_or_else(String::new, |m| m.as_str().to_string())),
                    );
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Node::Contains(needle) => Ok(scope.strings.iter().any(|s| s == needle)),
        Node::Truthy(operand) => Ok(truthy(&resolve(operand, scope)?)),
        Node::Compare(left, op, right) => {
            let left = resolve(left, scope)?;
            let right = resolve(right, scope)?;
            compare(&left, *op, &right)
        }
    }
}

fn resolve(operand: &Operand, scope: &Scope<'_>) -> Result<Resolved, EvalError> {
    let (root, segments) = match operand {
        Operand::Literal(value) => return Ok(Some(value.clone())),
        Operand::Undefined => return Ok(None),
        Operand::Path(root, segments) => (root, segments),
    };

    let mut current: Resolved = match root {
        Root::Strings => Some(string_array(scope.strings)),
        Root::Captures => Some(string_array(&scope.captures[..])),
        Root::Payload(name) => match scope.payload {
            Some(Value::Object(map)) if map.contains_key(name) => map.get(name).cloned(),
            _ => return Err(EvalError::NotDefined { name: name.clone() }),
        },
    };

    for segment in segments {
        let property = match segment {
            Segment::Field(name) => name.clone(),
            Segment::Index(i) => i.to_string(),
        };
        current = match current {
            None => {
                return Err(EvalError::PropertyOfNothing {
                    property,
                    target: "undefined",
                })
            }
            Some(Value::Null) => {
                return Err(EvalError::PropertyOfNothing {
                    property,
                    target: "null",
                })
            }
            Some(value) => property_of(&value, segment),
        };
    }
    Ok(current)
}

fn property_of(value: &Value, segment: &Segment) -> Resolved {
    match (value, segment) {
        (Value::Array(items), Segment::Field(name)) if name == "length" => {
            Some(Value::from(items.len()))
        }
        (Value::String(s), Segment::Field(name)) if name == "length" => {
            Some(Value::from(s.chars().count()))
        }
        (Value::Array(items), Segment::Index(i)) => items.get(*i).cloned(),
        (Value::Object(map), Segment::Field(name)) => map.get(name).cloned(),
        (Value::Object(map), Segment::Index(i)) => map.get(&i.to_string()).cloned(),
        _ => None,
    }
}

fn string_array(strings: &[String]) -> Value {
    Value::Array(strings.iter().cloned().map(Value::String).collect())
}

fn truthy(value: &Resolved) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn kind_of(value: &Resolved) -> &'static str {
    match value {
        None => "undefined",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

fn as_number(value: &Resolved) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn strict_equals(left: &Resolved, right: &Resolved) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn loose_equals(left: &Resolved, right: &Resolved) -> bool {
    match (left, right) {
        (None | Some(Value::Null), None | Some(Value::Null)) => true,
        (None | Some(Value::Null), _) | (_, None | Some(Value::Null)) => false,
        (Some(Value::String(_)), Some(Value::String(_))) => strict_equals(left, right),
        (Some(Value::Array(_) | Value::Object(_)), _)
        | (_, Some(Value::Array(_) | Value::Object(_))) => strict_equals(left, right),
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn compare(left: &Resolved, op: CompareOp, right: &Resolved) -> Result<bool, EvalError> {
    let ordering = match op {
        CompareOp::LooseEq => return Ok(loose_equals(left, right)),
        CompareOp::LooseNe => return Ok(!loose_equals(left, right)),
        CompareOp::StrictEq => return Ok(strict_equals(left, right)),
        CompareOp::StrictNe => return Ok(!strict_equals(left, right)),
        _ => order(left, right)?,
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

/// Order two values. `Ok(None)` means the comparison is always false
/// (an undefined or null side, or NaN).
fn order(left: &Resolved, right: &Resolved) -> Result<Option<Ordering>, EvalError> {
    match (left, right) {
        (None | Some(Value::Null), _) | (_, None | Some(Value::Null)) => Ok(None),
        (Some(Value::String(a)), Some(Value::String(b))) => Ok(Some(a.cmp(b))),
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            Ok(a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)))
        }
        _ => Err(EvalError::Incomparable {
            left: kind_of(left),
            right: kind_of(right),
        }),
    }
}
