//! lispkit - a small Lisp runtime
//!
//! This crate provides a reader and an evaluator for a compact Lisp dialect with
//! closures, optional/rest/keyword parameters and user-visible special forms.
//!
//! ```scheme
//! (define (greet name (greeting "hello") #:punct (p "!"))
//!   (string-append greeting ", " name p))
//! (greet "world")                 ; "hello, world!"
//! (greet "you" "hi" #:punct "?")  ; "hi, you?"
//! ```
//!
//! ## Calling conventions
//!
//! Every callable value is one of two kinds:
//! - **Special forms** receive the calling environment and their argument forms
//!   unevaluated. `if`, `define`, `quote` and every procedure built by `lambda`
//!   are special forms; a procedure evaluates its own arguments while binding them.
//! - **Host functions** receive already-evaluated arguments (`+`, `car`, `display`).
//!
//! ## Deferred results
//!
//! Evaluation returns an [`Outcome`]: either a ready value or a pending future.
//! Programs that never touch a deferred host primitive (`sleep`, `set-timeout`)
//! are evaluated synchronously and never start an async runtime.
//!
//! ## Modules
//!
//! - `scheme`: S-expression reader
//! - `ast`: value model shared by the reader and the evaluator
//! - `outcome`: ready/pending evaluation results and their combinators
//! - `evaluator`: evaluation core, environments and the parameter binder
//! - `builtinops`: the builtin catalog installed in the root environment
//! - `bridge`: invoking language procedures from host code
//! - `host`: interpreter facade and the runtime driving deferred results

use thiserror::Error;

/// Maximum nesting depth accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 128;

/// Maximum number of nested combinations being evaluated at once. The native
/// stack grows on demand, so this bounds runaway recursion rather than stack
/// size. Continuations resumed by the host runtime start counting from zero again.
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (stray closing bracket, bad escape)
    InvalidSyntax,
    /// Input ended before the form was complete (unclosed list or string)
    Incomplete,
    /// Form nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
    /// Extra input found after a complete form where exactly one was expected
    TrailingContent,
    /// Integer literal does not fit the integer type
    ImplementationLimit,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 60 chars)
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

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn at(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 60;

        let start = floor_char_boundary(input, offset.saturating_sub(15));
        let snippet: String = input[start..].chars().take(MAX_CONTEXT).collect();

        let mut context = String::new();
        if start > 0 {
            context.push_str("[...]");
        }
        context.push_str(&snippet);
        if start + snippet.len() < input.len() {
            context.push_str("[...]");
        }

        Self::new(
            kind,
            message,
            Some(context.replace('\n', "\\n").replace('\r', "")),
            found,
        )
    }

    /// True when more input could complete the form (used by the REPL for continuation lines)
    pub fn is_incomplete(&self) -> bool {
        self.kind == ParseErrorKind::Incomplete
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ParseError: {}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

/// Error taxonomy of the reader and the evaluator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("{0}")]
    Parse(ParseError),
    #[error("Undefined symbol: {0}")]
    UnboundSymbol(String),
    #[error("Keyword misuse: {0}")]
    KeywordMisuse(String),
    #[error("Cannot evaluate an empty combination")]
    EmptyCombination,
    #[error("Not callable: {0}")]
    NotCallable(String),
    #[error("Too few arguments: expected at least {expected}, got {got}")]
    TooFewArguments { expected: usize, got: usize },
    #[error("Too many arguments: expected at most {expected}, got {got}")]
    TooManyArguments { expected: usize, got: usize },
    #[error("Duplicated keyword argument: {0}")]
    DuplicateKeyword(String),
    #[error("Unknown keyword argument: {0}")]
    UnknownKeyword(String),
    #[error("Keyword argument undefined: {0}")]
    UndefinedKeywordArgument(String),
    #[error("Malformed parameter list: {0}")]
    MalformedParameterSpec(String),
    #[error("Dictionary key error: {0}")]
    DictKeyError(String),
    #[error("Path type error: {0}")]
    PathTypeError(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("EvaluationError: {0}")]
    EvalError(String),
    #[error("ArityError: expected {expected} arguments, got {got}{}", expression.as_ref().map(|e| format!(" in {e}")).unwrap_or_default())]
    ArityError {
        expected: usize,
        got: usize,
        expression: Option<String>,
    },
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: usize, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::Parse(err)
    }
}

pub mod ast;
pub mod bridge;
pub mod builtinops;
pub mod evaluator;
pub mod host;
pub mod outcome;
pub mod scheme;

pub use ast::{Callable, Symbol, Value};
pub use evaluator::{AssignPolicy, Environment, InterpreterConfig};
pub use host::{HostRuntime, Interpreter};
pub use outcome::{EvalResult, Outcome};
