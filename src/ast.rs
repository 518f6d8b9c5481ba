//! This module defines the value model shared by the reader and the evaluator. The
//! main enum, [`Value`], covers both syntax (integers, strings, symbols and nested
//! forms produced by the reader) and runtime data (floats, booleans, dictionaries,
//! callables and the unspecified value). Helper functions such as [`val`], [`sym`]
//! and [`nil`] keep AST construction terse in code and tests. Display output of
//! reader-produced values reads back to an equal value.

use crate::Error;
use crate::evaluator::Environment;
use crate::outcome::EvalResult;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

/// Type alias for integer values in the interpreter
pub(crate) type IntegerType = i64;

/// Prefix marking a symbol as a keyword argument token
pub const KEYWORD_PREFIX: &str = "#:";

/// Identifier with name-based identity: two symbols with equal names are the same symbol.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Rc<str>);

impl Symbol {
    pub fn new(name: impl AsRef<str>) -> Self {
        Symbol(Rc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// True for keyword argument tokens such as `#:color`
    pub fn is_keyword(&self) -> bool {
        self.0.starts_with(KEYWORD_PREFIX)
    }

    /// The keyword's name without its prefix, if this is a keyword token
    pub fn keyword_name(&self) -> Option<&str> {
        self.0.strip_prefix(KEYWORD_PREFIX)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

/// Numeric view of a value after coercion
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(IntegerType),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(x) => x,
        }
    }

    pub fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_add(b)
                .map_or_else(|| Number::Float(a as f64 + b as f64), Number::Int),
            (a, b) => Number::Float(a.as_f64() + b.as_f64()),
        }
    }

    pub fn sub(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_sub(b)
                .map_or_else(|| Number::Float(a as f64 - b as f64), Number::Int),
            (a, b) => Number::Float(a.as_f64() - b.as_f64()),
        }
    }

    pub fn mul(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_mul(b)
                .map_or_else(|| Number::Float(a as f64 * b as f64), Number::Int),
            (a, b) => Number::Float(a.as_f64() * b.as_f64()),
        }
    }

    /// Division stays integral when exact; a zero divisor is an error.
    pub fn div(self, other: Number) -> Result<Number, Error> {
        if other.as_f64() == 0.0 {
            return Err(Error::EvalError("Division by zero".into()));
        }
        Ok(match (self, other) {
            (Number::Int(a), Number::Int(b)) if a.checked_rem(b) == Some(0) => {
                a.checked_div(b)
                    .map_or_else(|| Number::Float(a as f64 / b as f64), Number::Int)
            }
            (a, b) => Number::Float(a.as_f64() / b.as_f64()),
        })
    }

    pub fn compare(self, other: Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

/// Shared, mutable, insertion-ordered string-keyed map
pub type Dict = Rc<RefCell<IndexMap<String, Value>>>;

/// Special-form calling convention: calling environment plus unevaluated argument forms
pub type SpecialFormFn = Rc<dyn Fn(&Environment, Forms) -> EvalResult>;

/// Host calling convention: already-evaluated arguments
pub type HostFn = Rc<dyn Fn(Vec<Value>) -> EvalResult>;

/// A callable value. The variant is the calling-convention tag.
#[derive(Clone)]
pub enum Callable {
    /// Receives the caller's environment and its argument forms unevaluated.
    /// Builtin control forms and every `lambda`/`define` procedure use this convention.
    SpecialForm { name: Rc<str>, func: SpecialFormFn },
    /// Receives evaluated arguments. `procedure` is set when this host function
    /// is a bridge around a language procedure, so the evaluator can still call
    /// the procedure directly.
    Host {
        name: Rc<str>,
        func: HostFn,
        procedure: Option<SpecialFormFn>,
    },
}

impl Callable {
    pub fn special_form<F>(name: &str, func: F) -> Self
    where
        F: Fn(&Environment, Forms) -> EvalResult + 'static,
    {
        Callable::SpecialForm {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }

    pub fn host<F>(name: &str, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> EvalResult + 'static,
    {
        Callable::Host {
            name: Rc::from(name),
            func: Rc::new(func),
            procedure: None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Callable::SpecialForm { name, .. } | Callable::Host { name, .. } => name,
        }
    }

    pub fn is_special_form(&self) -> bool {
        matches!(self, Callable::SpecialForm { .. })
    }

    /// Address identifying the underlying callable; bridged procedures share
    /// the identity of the procedure they wrap.
    fn identity(&self) -> *const () {
        match self {
            Callable::SpecialForm { func, .. }
            | Callable::Host {
                procedure: Some(func),
                ..
            } => Rc::as_ptr(func) as *const (),
            Callable::Host { func, .. } => Rc::as_ptr(func) as *const (),
        }
    }

    pub fn same(&self, other: &Callable) -> bool {
        std::ptr::eq(self.identity(), other.identity())
    }
}

/// Remaining argument forms of a combination: a shared list plus an offset.
#[derive(Clone)]
pub struct Forms {
    list: Rc<[Value]>,
    start: usize,
}

impl Forms {
    pub fn new(list: Rc<[Value]>) -> Self {
        Forms { list, start: 0 }
    }

    /// Drop the first `n` forms
    pub fn tail(&self, n: usize) -> Forms {
        Forms {
            list: Rc::clone(&self.list),
            start: (self.start + n).min(self.list.len()),
        }
    }
}

impl Deref for Forms {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.list[self.start..]
    }
}

impl From<Vec<Value>> for Forms {
    fn from(values: Vec<Value>) -> Self {
        Forms::new(values.into())
    }
}

impl fmt::Debug for Forms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Core value type: the reader's AST and the evaluator's runtime values
///
/// The reader only produces `Integer`, `String`, `Symbol` and `List`.
///
/// To build an AST, use the helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for empty lists
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Value {
    Integer(IntegerType),
    Float(f64),
    String(String),
    Symbol(Symbol),
    Bool(bool),
    /// Immutable shared sequence; forms and runtime lists alike
    List(Rc<[Value]>),
    Dict(Dict),
    Callable(Callable),
    /// Result of forms that produce no value (`define`, `display`, missing keys)
    Unspecified,
}

impl Value {
    pub fn dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::Dict(Rc::new(RefCell::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        )))
    }

    /// Only `#f` is false; the empty list, zero and the empty string are true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    /// Check if a value represents nil (empty list)
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::List(list) if list.is_empty())
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_keyword(&self) -> bool {
        matches!(self, Value::Symbol(s) if s.is_keyword())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Bool(_) => "boolean",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Callable(_) => "callable",
            Value::Unspecified => "unspecified",
        }
    }

    /// Numeric coercion used by arithmetic and ordering:
    /// booleans become 0/1, numeric strings are parsed (blank is 0), the empty list is 0.
    pub fn to_number(&self) -> Result<Number, Error> {
        match self {
            Value::Integer(n) => Ok(Number::Int(*n)),
            Value::Float(x) => Ok(Number::Float(*x)),
            Value::Bool(b) => Ok(Number::Int(IntegerType::from(*b))),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    Ok(Number::Int(0))
                } else if let Ok(n) = s.parse::<IntegerType>() {
                    Ok(Number::Int(n))
                } else if let Ok(x) = s.parse::<f64>() {
                    Ok(Number::Float(x))
                } else {
                    Err(Error::TypeError(format!("cannot convert {self} to a number")))
                }
            }
            Value::List(list) if list.is_empty() => Ok(Number::Int(0)),
            _ => Err(Error::TypeError(format!(
                "cannot convert {} {self} to a number",
                self.type_name()
            ))),
        }
    }

    /// Text used by `display`, `string-append` and error messages: strings unquoted
    pub fn to_display_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Strict identity used by `=`: atoms by value, lists/dicts/callables by reference
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::List(_) | Value::Dict(_), _) | (_, Value::List(_) | Value::Dict(_)) => false,
            _ => self == other,
        }
    }
}

impl PartialEq for Value {
    /// Deep structural equality (`equal?`)
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                matches!(
                    (self.to_number(), other.to_number()),
                    (Ok(a), Ok(b)) if a.compare(b) == Some(Ordering::Equal)
                )
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Callable(a), Value::Callable(b)) => a.same(b),
            (Value::Unspecified, Value::Unspecified) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::List(list) => {
                write!(f, "List")?;
                f.debug_list().entries(list.iter()).finish()
            }
            Value::Dict(d) => {
                write!(f, "Dict")?;
                f.debug_map().entries(d.borrow().iter()).finish()
            }
            Value::Callable(c) => write!(f, "Callable({})", c.name()),
            Value::Unspecified => write!(f, "Unspecified"),
        }
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for ch in s.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write_escaped(f, s),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::List(elements) => {
                write!(f, "(")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ")")
            }
            Value::Dict(entries) => {
                write!(f, "(dict")?;
                for (key, value) in entries.borrow().iter() {
                    write!(f, " ")?;
                    write_escaped(f, key)?;
                    write!(f, " {value}")?;
                }
                write!(f, ")")
            }
            Value::Callable(Callable::SpecialForm { name, .. }) => {
                write!(f, "#<special-form:{name}>")
            }
            Value::Callable(Callable::Host { name, .. }) => write!(f, "#<host-function:{name}>"),
            Value::Unspecified => write!(f, "#<unspecified>"),
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(n) => Value::Integer(n),
            Number::Float(x) => Value::Float(x),
        }
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

impl From<Callable> for Value {
    fn from(c: Callable) -> Self {
        Value::Callable(c)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Integer(IntegerType::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(IntegerType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::List(arr.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::List(slice.iter().cloned().map(Into::into).collect())
    }
}

/// Helper for creating symbols in mixed lists
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(Symbol::new(name))
}

/// Helper for creating values from any convertible Rust type
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// The empty list
pub fn nil() -> Value {
    Value::List(Rc::from(Vec::new()))
}
