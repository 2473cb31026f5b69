//! ConsLisp - a small Scheme-like S-expression interpreter
//!
//! This crate reads parenthesized text into cons-cell data and evaluates it against a
//! chain of lexical scopes. Syntax and data share one representation ([`ast::Value`]),
//! so a program is just a sequence of values handed to the evaluator one at a time.
//!
//! ```scheme
//! (define (fact n) (if (= n 1) 1 (* n (fact (- n 1)))))
//! (fact 5)                                  ; => 120
//! (let ([x 1] [y 10]) (+ x y))              ; => 11
//! (cond [#f 1] [else 2])                    ; => 2
//! (define v (make-vector 3)) (~ v 1 50)     ; vectors are shared and mutable
//! ```
//!
//! ## Language
//!
//! - Special forms: `lambda`, `define`, `let`, `letrec`, `if`, `cond`
//! - Two numeric kinds (integer and float); arithmetic never mixes them
//! - Truthiness: only `()` and `#f` are false
//! - Named functions whose only self-calls are in tail position run as loops,
//!   so `(define (count n) (if (= n 0) 0 (count (- n 1))))` handles any `n`
//!
//! ## Modules
//!
//! - `ast`: the value model (pairs, vectors, closures, printing, equality)
//! - `scheme`: the reader (tokenizer + stack parser)
//! - `evaluator`: evaluation, environments, special forms and tail-call analysis
//! - `builtinops`: the primitive function registry

use std::fmt;

use crate::builtinops::Arity;

/// Maximum nesting depth accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 256;

/// Maximum number of nested closure applications. Deeper non-tail recursion is an
/// evaluation error. Self tail calls of named functions run as loops and do not count.
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ParseErrorKind {
    /// A closing parenthesis with no matching opening one
    UnexpectedCloseParen,
    /// Input ended while at least one list was still open
    UnclosedParen,
    /// Input ended inside a string literal
    UnterminatedString,
    /// Expression nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
    /// More than one expression where exactly one was expected
    TrailingContent,
    /// No expression where exactly one was expected
    Empty,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let context_start = error_offset.saturating_sub(20);
        let context_str: String = input
            .get(context_start..)
            .unwrap_or_default()
            .chars()
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

/// Error types for the interpreter
///
/// Every evaluation error aborts the current top-level evaluation; only the
/// reader's [`ParseError`] is meant to be inspected and recovered from by callers.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(ParseError),
    /// Malformed special forms, calls of non-callable values, depth limit
    EvalError(String),
    /// Operand of the wrong kind for a primitive, or a value of the wrong shape
    TypeError(String),
    UnboundVariable(String),
    ArityError {
        expected: Arity,
        got: usize,
        expression: Option<String>,
    },
    IndexOutOfBounds {
        index: i64,
        len: usize,
    },
    /// Raised by the `exit` primitive; drivers terminate with this status
    Exit(i32),
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: Arity, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }
}

impl From<ParseError> for Error {
    fn from(error: ParseError) -> Self {
        Error::ParseError(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "ParseError: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::UnboundVariable(var) => write!(f, "Unbound variable: {var}"),
            Error::ArityError {
                expected,
                got,
                expression,
            } => match expression {
                Some(expr) => write!(
                    f,
                    "ArityError: expression {expr}: expected {expected} arguments, got {got}"
                ),
                None => write!(
                    f,
                    "ArityError: function expected {expected} arguments but got {got}"
                ),
            },
            Error::IndexOutOfBounds { index, len } => {
                write!(f, "Index out of bounds: {index} (length {len})")
            }
            Error::Exit(code) => write!(f, "Exit requested with status {code}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtinops;
pub mod evaluator;

#[cfg(feature = "scheme")]
pub mod scheme;

/// Parse `source` as a program and evaluate its expressions top to bottom.
///
/// Returns the value of the last expression (null for an empty program). Global
/// `define`s made along the way stay in `env`.
#[cfg(feature = "scheme")]
pub fn eval_source(source: &str, env: &mut evaluator::Environment) -> Result<ast::Value, Error> {
    let program = scheme::parse_program(source)?;
    evaluator::eval_program(&program, env)
}
