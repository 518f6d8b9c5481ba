//! Builtin catalog installed in every root environment.
//!
//! ## Functions vs Special Forms
//!
//! - **Functions** receive evaluated arguments (`+`, `car`, `display`). They are
//!   written as ordinary typed Rust functions and wired through the adapters in
//!   `evaluator::intooperation`.
//! - **Special forms** receive their argument forms unevaluated (`if`, `define`,
//!   `quote`). They live in the evaluator and are registered here under their
//!   language names.
//!
//! Both kinds are ordinary bindings: a program may rebind `if`, pass `quote`
//! around or shadow `+` inside a procedure.
//!
//! ## Coercions
//!
//! Arithmetic and ordering coerce their operands (`(+ "2" #t)` is 3). Equality
//! comes in two flavors: `=` is strict identity (atoms by value, lists and
//! dicts by reference) while `equal?` compares structure.
//!
//! ## Adding New Operations
//!
//! 1. Write the function against typed parameters (`Value`, `Number`, `&str`,
//!    `ValueIter`, `NumIter`)
//! 2. Add a [`BuiltinOp`] entry to [`builtin_ops`] with its arity
//! 3. Cover it in the tests below and, for control forms, in the evaluator tests

use crate::Error;
use crate::ast::{Callable, Forms, HostFn, IntegerType, Number, Value, nil};
use crate::bridge;
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation};
use crate::evaluator::{
    Environment, NumIter, ValueIter, eval_and, eval_begin, eval_cond, eval_define, eval_dict,
    eval_eval, eval_if, eval_lambda, eval_or, eval_quote, eval_set, eval_unless, eval_when,
    eval_while,
};
use crate::outcome::EvalResult;
use std::cmp::Ordering;
use std::rc::Rc;

/// Accepted argument counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive bounds
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn validate(self, got: usize) -> Result<(), Error> {
        match self {
            Arity::Exact(n) if got != n => Err(Error::arity_error(n, got)),
            Arity::AtLeast(n) if got < n => Err(Error::arity_error(n, got)),
            Arity::Range(min, _) if got < min => Err(Error::arity_error(min, got)),
            Arity::Range(_, max) if got > max => Err(Error::arity_error(max, got)),
            _ => Ok(()),
        }
    }
}

/// Implementation of a builtin, tagged with its calling convention
#[derive(Clone)]
pub enum OpKind {
    /// Receives evaluated arguments
    Function(HostFn),
    /// Receives the calling environment and the unevaluated argument forms
    SpecialForm(fn(&Environment, Forms) -> EvalResult),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
        }
    }
}

/// Definition of a builtin operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// Name the operation is bound to
    pub id: &'static str,
    /// Additional names bound to the same operation
    pub aliases: &'static [&'static str],
    pub op_kind: OpKind,
    pub arity: Arity,
}

impl BuiltinOp {
    pub fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::SpecialForm(_))
    }

    /// Build the callable bound under `name`, checking the argument count
    /// before every call
    pub(crate) fn to_callable(&self, name: &str) -> Callable {
        let arity = self.arity;
        match &self.op_kind {
            OpKind::Function(func) => {
                let func = Rc::clone(func);
                Callable::host(name, move |args| {
                    arity.validate(args.len())?;
                    func(args)
                })
            }
            OpKind::SpecialForm(form) => {
                let form = *form;
                Callable::special_form(name, move |env, forms| {
                    arity.validate(forms.len())?;
                    form(env, forms)
                })
            }
        }
    }
}

/// Values bound in every root environment besides the operations
pub fn builtin_constants() -> Vec<(&'static str, Value)> {
    vec![
        ("#t", Value::Bool(true)),
        ("#f", Value::Bool(false)),
        ("null", nil()),
    ]
}

//
// Builtin Function Implementations
//

fn builtin_add(args: NumIter<'_>) -> Number {
    args.fold(Number::Int(0), Number::add)
}

fn builtin_sub(first: Number, rest: NumIter<'_>) -> Number {
    if rest.len() == 0 {
        return Number::Int(0).sub(first);
    }
    rest.fold(first, Number::sub)
}

fn builtin_mul(args: NumIter<'_>) -> Number {
    args.fold(Number::Int(1), Number::mul)
}

fn builtin_div(first: Number, rest: NumIter<'_>) -> Result<Number, Error> {
    if rest.len() == 0 {
        return Number::Int(1).div(first);
    }
    rest.into_iter().try_fold(first, Number::div)
}

fn builtin_max(first: Number, rest: NumIter<'_>) -> Number {
    rest.fold(first, |best, n| {
        if n.compare(best) == Some(Ordering::Greater) {
            n
        } else {
            best
        }
    })
}

fn builtin_min(first: Number, rest: NumIter<'_>) -> Number {
    rest.fold(first, |best, n| {
        if n.compare(best) == Some(Ordering::Less) {
            n
        } else {
            best
        }
    })
}

// Chained numeric comparisons: every adjacent pair must satisfy the ordering.
// Comparisons involving NaN are false.
macro_rules! numeric_comparison {
    ($name:ident, $holds:path) => {
        fn $name(first: Number, rest: NumIter<'_>) -> bool {
            let mut prev = first;
            for current in rest {
                if !prev.compare(current).is_some_and($holds) {
                    return false;
                }
                prev = current;
            }
            true
        }
    };
}

numeric_comparison!(builtin_lt, Ordering::is_lt);
numeric_comparison!(builtin_gt, Ordering::is_gt);
numeric_comparison!(builtin_le, Ordering::is_le);
numeric_comparison!(builtin_ge, Ordering::is_ge);

fn builtin_eq(first: Value, rest: ValueIter<'_>) -> bool {
    let mut prev = &first;
    for current in rest {
        if !prev.strict_eq(current) {
            return false;
        }
        prev = current;
    }
    true
}

fn builtin_equal(first: Value, second: Value) -> bool {
    first == second
}

fn builtin_not(value: Value) -> bool {
    !value.is_truthy()
}

fn builtin_car(mut list: ValueIter<'_>) -> Result<Value, Error> {
    match list.next() {
        Some(first) => Ok(first.clone()),
        None => Err(Error::EvalError("car of empty list".into())),
    }
}

fn builtin_cdr(mut list: ValueIter<'_>) -> Result<Value, Error> {
    let Some(_) = list.next() else {
        return Err(Error::EvalError("cdr of empty list".into()));
    };
    Ok(Value::List(list.cloned().collect()))
}

fn builtin_cons(first: Value, rest: Value) -> Result<Value, Error> {
    match rest {
        Value::List(tail) => Ok(Value::List(
            std::iter::once(first).chain(tail.iter().cloned()).collect(),
        )),
        other => Err(Error::TypeError(format!(
            "cons requires a list as second argument, got {other}"
        ))),
    }
}

fn builtin_list(args: ValueIter<'_>) -> Value {
    Value::List(args.cloned().collect())
}

fn builtin_null(value: Value) -> bool {
    value.is_nil()
}

fn builtin_length(value: Value) -> Result<IntegerType, Error> {
    let len = match &value {
        Value::List(items) => items.len(),
        Value::String(s) => s.chars().count(),
        Value::Dict(entries) => entries.borrow().len(),
        other => {
            return Err(Error::TypeError(format!(
                "length expects a list, string or dict, got {other}"
            )));
        }
    };
    IntegerType::try_from(len).map_err(|_| Error::EvalError("length out of range".into()))
}

fn builtin_append(lists: ValueIter<'_>) -> Result<Value, Error> {
    let mut result = Vec::new();
    for list in lists {
        match list {
            Value::List(items) => result.extend(items.iter().cloned()),
            other => {
                return Err(Error::TypeError(format!(
                    "append expects lists, got {other}"
                )));
            }
        }
    }
    Ok(Value::from(result))
}

fn builtin_string_append(args: ValueIter<'_>) -> String {
    args.map(Value::to_display_string).collect()
}

fn builtin_get(container: Value, path: ValueIter<'_>) -> Result<Value, Error> {
    let path: Vec<Value> = path.cloned().collect();
    get_in(&container, &path)
}

fn builtin_set(container: Value, rest: ValueIter<'_>) -> Result<Value, Error> {
    let mut rest: Vec<Value> = rest.cloned().collect();
    let Some(value) = rest.pop() else {
        return Err(Error::arity_error(2, 1));
    };
    assoc_in(&container, &rest, value)
}

fn builtin_keys(value: Value) -> Result<Value, Error> {
    match &value {
        Value::Dict(entries) => Ok(Value::List(
            entries.borrow().keys().map(|k| Value::from(k.as_str())).collect(),
        )),
        other => Err(Error::TypeError(format!("keys expects a dict, got {other}"))),
    }
}

fn builtin_display(args: ValueIter<'_>) -> Value {
    let line: Vec<String> = args.map(Value::to_display_string).collect();
    println!("{}", line.join(" "));
    Value::Unspecified
}

/// Invoke a callable from host code; a failing procedure yields unspecified
fn builtin_call(callable: Value, args: ValueIter<'_>) -> EvalResult {
    match callable {
        Value::Callable(callable) => bridge::invoke(&callable, args.cloned().collect()),
        other => Err(Error::NotCallable(format!("{other}"))),
    }
}

/// Call with a list of already-evaluated arguments; failures propagate
fn builtin_apply(callable: Value, args: Value) -> EvalResult {
    match (callable, args) {
        (Value::Callable(callable), Value::List(args)) => {
            bridge::apply_values(&callable, args.to_vec())
        }
        (Value::Callable(_), other) => Err(Error::TypeError(format!(
            "apply expects an argument list, got {other}"
        ))),
        (other, _) => Err(Error::NotCallable(format!("{other}"))),
    }
}

fn builtin_error(args: ValueIter<'_>) -> Result<Value, Error> {
    let parts: Vec<String> = args.map(Value::to_display_string).collect();
    let message = if parts.is_empty() {
        "Error".to_owned()
    } else {
        parts.join(" ")
    };
    Err(Error::EvalError(message))
}

//
// Nested access shared by `get`, `set` and `(set! (name path...) value)`
//

fn path_key(key: &Value) -> Result<String, Error> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Integer(n) => Ok(n.to_string()),
        Value::Symbol(s) => Ok(s.keyword_name().unwrap_or(s.name()).to_owned()),
        other => Err(Error::PathTypeError(format!(
            "cannot use {} {other} as a dict key",
            other.type_name()
        ))),
    }
}

fn path_index(key: &Value) -> Result<usize, Error> {
    let index = match key {
        Value::Integer(n) => usize::try_from(*n).ok(),
        Value::String(s) => s.parse::<usize>().ok(),
        _ => None,
    };
    index.ok_or_else(|| Error::PathTypeError(format!("cannot use {key} as a list index")))
}

/// Follow `path` through nested dicts and lists. Missing keys and
/// out-of-range indexes yield unspecified.
pub(crate) fn get_in(container: &Value, path: &[Value]) -> Result<Value, Error> {
    let mut current = container.clone();
    for key in path {
        let next = match &current {
            Value::Dict(entries) => {
                let key = path_key(key)?;
                let found = entries.borrow().get(&key).cloned();
                found.unwrap_or(Value::Unspecified)
            }
            Value::List(items) => items
                .get(path_index(key)?)
                .cloned()
                .unwrap_or(Value::Unspecified),
            other => {
                return Err(Error::PathTypeError(format!(
                    "cannot look up {key} in {} {other}",
                    other.type_name()
                )));
            }
        };
        current = next;
    }
    Ok(current)
}

/// Store `value` at `path` below `container` and return the updated container.
///
/// Dicts are updated in place and missing intermediate keys get fresh dicts.
/// Lists are copied; an index equal to the length appends.
pub(crate) fn assoc_in(container: &Value, path: &[Value], value: Value) -> Result<Value, Error> {
    let Some((key, rest)) = path.split_first() else {
        return Ok(value);
    };

    match container {
        Value::Dict(entries) => {
            let key = path_key(key)?;
            let child = entries.borrow().get(&key).cloned();
            let updated = match child {
                _ if rest.is_empty() => value,
                Some(child) => assoc_in(&child, rest, value)?,
                None => assoc_in(&Value::dict(Vec::<(String, Value)>::new()), rest, value)?,
            };
            entries.borrow_mut().insert(key, updated);
            Ok(container.clone())
        }
        Value::List(items) => {
            let index = path_index(key)?;
            if index > items.len() {
                return Err(Error::PathTypeError(format!(
                    "index {index} out of range for list of length {}",
                    items.len()
                )));
            }
            let updated = match items.get(index) {
                _ if rest.is_empty() => value,
                Some(child) => assoc_in(child, rest, value)?,
                None => assoc_in(&Value::dict(Vec::<(String, Value)>::new()), rest, value)?,
            };
            let mut copy = items.to_vec();
            if index == copy.len() {
                copy.push(updated);
            } else {
                copy[index] = updated;
            }
            Ok(Value::from(copy))
        }
        other => Err(Error::PathTypeError(format!(
            "cannot set {key} on {} {other}",
            other.type_name()
        ))),
    }
}

/// The builtin catalog. Host functions are wired through the same typed
/// adapter layer that embedders use for their own registrations.
#[expect(clippy::too_many_lines)] // flat table, one entry per builtin
pub fn builtin_ops() -> Vec<BuiltinOp> {
    fn builtin_fixed<Args, F>(f: F) -> HostFn
    where
        F: IntoOperation<Args>,
    {
        <F as IntoOperation<Args>>::into_operation(f)
    }

    fn builtin_variadic<Args, F>(f: F) -> HostFn
    where
        F: IntoVariadicOperation<Args>,
    {
        <F as IntoVariadicOperation<Args>>::into_variadic_operation(f)
    }

    fn special(
        id: &'static str,
        aliases: &'static [&'static str],
        form: fn(&Environment, Forms) -> EvalResult,
        arity: Arity,
    ) -> BuiltinOp {
        BuiltinOp {
            id,
            aliases,
            op_kind: OpKind::SpecialForm(form),
            arity,
        }
    }

    fn function(id: &'static str, aliases: &'static [&'static str], func: HostFn, arity: Arity) -> BuiltinOp {
        BuiltinOp {
            id,
            aliases,
            op_kind: OpKind::Function(func),
            arity,
        }
    }

    vec![
        // Special forms
        special("quote", &[], eval_quote, Arity::Exact(1)),
        special("if", &[], eval_if, Arity::Range(2, 3)),
        special("when", &[], eval_when, Arity::AtLeast(1)),
        special("unless", &[], eval_unless, Arity::AtLeast(1)),
        special("cond", &[], eval_cond, Arity::Any),
        special("begin", &[], eval_begin, Arity::Any),
        special("while", &[], eval_while, Arity::AtLeast(1)),
        special("define", &[], eval_define, Arity::AtLeast(1)),
        special("lambda", &["λ"], eval_lambda, Arity::AtLeast(1)),
        special("set!", &[], eval_set, Arity::Exact(2)),
        special("dict", &["object"], eval_dict, Arity::Any),
        special("and", &[], eval_and, Arity::Any),
        special("or", &[], eval_or, Arity::Any),
        special("eval", &[], eval_eval, Arity::Exact(1)),
        // Arithmetic
        function(
            "+",
            &[],
            builtin_variadic::<(NumIter<'static>,), _>(builtin_add),
            Arity::Any,
        ),
        function(
            "-",
            &[],
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_sub),
            Arity::AtLeast(1),
        ),
        function(
            "*",
            &[],
            builtin_variadic::<(NumIter<'static>,), _>(builtin_mul),
            Arity::Any,
        ),
        function(
            "/",
            &[],
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_div),
            Arity::AtLeast(1),
        ),
        function(
            "max",
            &[],
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_max),
            Arity::AtLeast(1),
        ),
        function(
            "min",
            &[],
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_min),
            Arity::AtLeast(1),
        ),
        // Comparison
        function(
            "=",
            &[],
            builtin_variadic::<(Value, ValueIter<'static>), _>(builtin_eq),
            Arity::AtLeast(2),
        ),
        function(
            "equal?",
            &[],
            builtin_fixed::<(Value, Value), _>(builtin_equal),
            Arity::Exact(2),
        ),
        function(
            "<",
            &[],
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_lt),
            Arity::AtLeast(2),
        ),
        function(
            ">",
            &[],
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_gt),
            Arity::AtLeast(2),
        ),
        function(
            "<=",
            &[],
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_le),
            Arity::AtLeast(2),
        ),
        function(
            ">=",
            &[],
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_ge),
            Arity::AtLeast(2),
        ),
        function(
            "not",
            &[],
            builtin_fixed::<(Value,), _>(builtin_not),
            Arity::Exact(1),
        ),
        // Lists
        function(
            "car",
            &[],
            builtin_fixed::<(ValueIter<'static>,), _>(builtin_car),
            Arity::Exact(1),
        ),
        function(
            "cdr",
            &[],
            builtin_fixed::<(ValueIter<'static>,), _>(builtin_cdr),
            Arity::Exact(1),
        ),
        function(
            "cons",
            &[],
            builtin_fixed::<(Value, Value), _>(builtin_cons),
            Arity::Exact(2),
        ),
        function(
            "list",
            &[],
            builtin_variadic::<(ValueIter<'static>,), _>(builtin_list),
            Arity::Any,
        ),
        function(
            "null?",
            &[],
            builtin_fixed::<(Value,), _>(builtin_null),
            Arity::Exact(1),
        ),
        function(
            "length",
            &[],
            builtin_fixed::<(Value,), _>(builtin_length),
            Arity::Exact(1),
        ),
        function(
            "append",
            &[],
            builtin_variadic::<(ValueIter<'static>,), _>(builtin_append),
            Arity::Any,
        ),
        function(
            "string-append",
            &[],
            builtin_variadic::<(ValueIter<'static>,), _>(builtin_string_append),
            Arity::Any,
        ),
        // Dicts and nested paths
        function(
            "get",
            &["object-ref"],
            builtin_variadic::<(Value, ValueIter<'static>), _>(builtin_get),
            Arity::AtLeast(1),
        ),
        function(
            "set",
            &[],
            builtin_variadic::<(Value, ValueIter<'static>), _>(builtin_set),
            Arity::AtLeast(2),
        ),
        function(
            "keys",
            &[],
            builtin_fixed::<(Value,), _>(builtin_keys),
            Arity::Exact(1),
        ),
        // Host interaction
        function(
            "display",
            &[],
            builtin_variadic::<(ValueIter<'static>,), _>(builtin_display),
            Arity::Any,
        ),
        function(
            "call",
            &[],
            builtin_variadic::<(Value, ValueIter<'static>), _>(builtin_call),
            Arity::AtLeast(1),
        ),
        function(
            "apply",
            &[],
            builtin_fixed::<(Value, Value), _>(builtin_apply),
            Arity::Exact(2),
        ),
        function(
            "error",
            &[],
            builtin_variadic::<(ValueIter<'static>,), _>(builtin_error),
            Arity::Any,
        ),
    ]
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{sym, val};

    fn success<T: Into<Value>>(value: T) -> Option<Value> {
        Some(val(value))
    }

    fn find_op(name: &str) -> BuiltinOp {
        builtin_ops()
            .into_iter()
            .find(|op| op.id == name || op.aliases.contains(&name))
            .unwrap_or_else(|| panic!("builtin not found: {name}"))
    }

    /// Invoke a host builtin through the same callable the root environment binds
    fn call_builtin(name: &str, args: &[Value]) -> Result<Value, Error> {
        match find_op(name).to_callable(name) {
            Callable::Host { func, .. } => func(args.to_vec())
                .map(|outcome| outcome.ready().unwrap()),
            Callable::SpecialForm { .. } => {
                panic!("expected function builtin in tests, got special form: {name}")
            }
        }
    }

    #[test]
    fn test_builtin_ops_registry() {
        let ops = builtin_ops();
        let mut names: Vec<&str> = ops
            .iter()
            .flat_map(|op| std::iter::once(op.id).chain(op.aliases.iter().copied()))
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total, "duplicate builtin names");

        let not_op = find_op("not");
        assert_eq!(not_op.arity, Arity::Exact(1));
        assert!(!not_op.is_special_form());

        let if_op = find_op("if");
        assert!(if_op.is_special_form());
        assert_eq!(if_op.arity, Arity::Range(2, 3));

        assert_eq!(find_op("λ").id, "lambda");
        assert_eq!(find_op("object").id, "dict");
        assert_eq!(find_op("object-ref").id, "get");

        for form in ["quote", "define", "set!", "cond", "while", "and", "or", "eval"] {
            assert!(find_op(form).is_special_form(), "{form} should be a special form");
        }
        for func in ["+", "car", "display", "call", "apply", "error"] {
            assert!(!find_op(func).is_special_form(), "{func} should be a function");
        }
    }

    macro_rules! test {
        ($name:expr, $args:expr, $expected:expr) => {
            ($name, call_builtin($name, $args), $expected)
        };
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_builtin_function_implementations() {
        type TestCase = (&'static str, Result<Value, Error>, Option<Value>);

        let shared = val([1, 2]);
        let many_ones: Vec<Value> = (0..100).map(|_| val(1)).collect();
        let nested = val([val([val([1])])]);

        let test_cases: Vec<TestCase> = vec![
            // Arithmetic
            test!("+", &[], success(0)),
            test!("+", &many_ones, success(100)),
            test!("+", &[val(1), val(2.5)], success(3.5)),
            test!("+", &[val("4"), val(true), nil()], success(5)),
            test!("+", &[val(" 2 "), val("")], success(2)),
            test!("+", &[val("x")], None),
            test!("+", &[val([1])], None),
            test!("+", &[val(i64::MAX), val(1)], success(9_223_372_036_854_775_808.0)),
            test!("-", &[val(5)], success(-5)),
            test!("-", &[val(10), val(1), val(2)], success(7)),
            test!("-", &[], None),
            test!("*", &[], success(1)),
            test!("*", &[val(2), val(3), val(4)], success(24)),
            test!("*", &[val(i64::MAX), val(2)], success(1.844_674_407_370_955_2e19)),
            test!("/", &[val(9), val(3)], success(3)),
            test!("/", &[val(1), val(4)], success(0.25)),
            test!("/", &[val(4)], success(0.25)),
            test!("/", &[val(4), val(0)], None),
            test!("max", &[val(1), val(7), val(3)], success(7)),
            test!("min", &[val(1), val(-7), val(3)], success(-7)),
            test!("max", &[val(1), val(1.5)], success(1.5)),
            // Comparison
            test!("<", &[val(1), val(2), val(3)], success(true)),
            test!("<", &[val(1), val(1)], success(false)),
            test!("<=", &[val(1), val(1), val(2)], success(true)),
            test!(">", &[val(3), val(2), val(2)], success(false)),
            test!(">=", &[val(3), val(2), val(2)], success(true)),
            test!("<", &[val(1)], None),
            test!("<", &[val(1), val(f64::NAN)], success(false)),
            test!("=", &[val(1), val(1)], success(true)),
            test!("=", &[val(1), val(1.0)], success(true)),
            test!("=", &[val("a"), val("b")], success(false)),
            test!("=", &[val(1), val("1")], success(false)),
            test!("=", &[shared.clone(), shared.clone()], success(true)),
            test!("=", &[val([1, 2]), val([1, 2])], success(false)),
            test!("equal?", &[val([1, 2]), val([1, 2])], success(true)),
            test!("equal?", &[val([1, 2]), val([1, 3])], success(false)),
            test!("equal?", &[sym("a"), sym("a")], success(true)),
            test!("equal?", &[val(1), val("1")], success(false)),
            test!("not", &[val(false)], success(true)),
            test!("not", &[nil()], success(false)),
            test!("not", &[], None),
            // Lists
            test!("car", &[val([1, 2, 3])], success(1)),
            test!("car", &[nested.clone()], success([val([1])])),
            test!("car", &[nil()], None),
            test!("car", &[val(1)], None),
            test!("cdr", &[val([1, 2, 3])], success([2, 3])),
            test!("cdr", &[val([1])], Some(nil())),
            test!("cdr", &[nil()], None),
            test!("cons", &[val(0), val([1])], success([0, 1])),
            test!("cons", &[val(0), val(1)], None),
            test!("list", &[], Some(nil())),
            test!("list", &[val(1), val("a")], success(vec![val(1), val("a")])),
            test!("null?", &[nil()], success(true)),
            test!("null?", &[val(0)], success(false)),
            test!("length", &[val([1, 2, 3])], success(3)),
            test!("length", &[val("héllo")], success(5)),
            test!("length", &[val(5)], None),
            test!("append", &[val([1]), nil(), val([2, 3])], success([1, 2, 3])),
            test!("append", &[], Some(nil())),
            test!("append", &[val([1]), val(2)], None),
            test!("string-append", &[val("a"), val(1), val(true)], success("a1#t")),
            test!("string-append", &[], success("")),
            // Paths
            test!("get", &[val([10, 20]), val(1)], success(20)),
            test!("get", &[val([10, 20]), val(5)], Some(Value::Unspecified)),
            test!("get", &[val([10, 20]), val("0")], success(10)),
            test!("get", &[val([10, 20])], success([10, 20])),
            test!("get", &[val(1), val(0)], None),
            test!("get", &[val([10, 20]), val(-1)], None),
            test!("object-ref", &[Value::dict([("a", val(1))]), val("a")], success(1)),
            test!("keys", &[Value::dict([("x", val(1)), ("y", val(2))])], success(["x", "y"])),
            test!("keys", &[val([1])], None),
            test!("set", &[val([1, 2]), val(0), val(9)], success([9, 2])),
            test!("set", &[val([1, 2]), val(5), val(9)], None),
            test!("set", &[val(1), val(0), val(9)], None),
            // Errors
            test!("error", &[], None),
            test!("call", &[val(1)], None),
            test!("apply", &[val(1), nil()], None),
        ];

        for (name, result, expected) in test_cases {
            match (result, expected) {
                (Ok(actual), Some(expected)) => {
                    assert_eq!(actual, expected, "builtin {name}");
                }
                (Err(_), None) => {}
                (Ok(actual), None) => panic!("builtin {name}: expected error, got {actual:?}"),
                (Err(err), Some(expected)) => {
                    panic!("builtin {name}: expected {expected:?}, got error {err:?}")
                }
            }
        }
    }

    #[test]
    fn test_dict_paths_mutate_in_place() {
        let config = Value::dict([("server", Value::dict([("port", val(80))]))]);

        let updated = call_builtin("set", &[config.clone(), val("server"), val("port"), val(8080)]).unwrap();
        assert!(updated.strict_eq(&config));
        assert_eq!(
            get_in(&config, &[val("server"), val("port")]).unwrap(),
            val(8080)
        );

        assoc_in(&config, &[val("a"), val("b"), val("c")], val(1)).unwrap();
        assert_eq!(
            get_in(&config, &[val("a"), val("b"), val("c")]).unwrap(),
            val(1)
        );
        assert!(matches!(
            assoc_in(&config, &[val("server"), val("port"), val("x")], val(1)),
            Err(Error::PathTypeError(_))
        ));
        assert!(matches!(
            get_in(&config, &[val([1])]),
            Err(Error::PathTypeError(_))
        ));
    }

    #[test]
    fn test_list_paths_copy() {
        let original = val([val([1, 2]), val(3)]);
        let updated = assoc_in(&original, &[val(0), val(2)], val(9)).unwrap();
        assert_eq!(updated, val([val([1, 2, 9]), val(3)]));
        assert_eq!(original, val([val([1, 2]), val(3)]));
    }

    #[test]
    fn test_error_message_construction() {
        type ErrorTest = (Vec<Value>, &'static str);
        let test_cases: Vec<ErrorTest> = vec![
            (vec![val("Simple message")], "Simple message"),
            (
                vec![val("Code:"), val(404), val("Not Found")],
                "Code: 404 Not Found",
            ),
            (vec![val(true), val(42), val("mixed"), nil()], "#t 42 mixed ()"),
            (vec![], "Error"),
        ];

        for (args, expected_msg) in test_cases {
            match call_builtin("error", &args).unwrap_err() {
                Error::EvalError(msg) => {
                    assert_eq!(msg, expected_msg, "Failed for args: {args:?}");
                }
                other => panic!("Expected EvalError for args: {args:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_arity_validation() {
        use Arity::*;

        Exact(2).validate(2).unwrap();
        Exact(2).validate(1).unwrap_err();
        Exact(2).validate(3).unwrap_err();

        AtLeast(1).validate(1).unwrap();
        AtLeast(1).validate(2).unwrap();
        AtLeast(1).validate(0).unwrap_err();

        Range(1, 3).validate(1).unwrap();
        Range(1, 3).validate(3).unwrap();
        Range(1, 3).validate(0).unwrap_err();
        Range(1, 3).validate(4).unwrap_err();

        Any.validate(0).unwrap();
        Any.validate(100).unwrap();

        match Range(1, 3).validate(4).unwrap_err() {
            Error::ArityError { expected, got, .. } => {
                assert_eq!(expected, 3);
                assert_eq!(got, 4);
            }
            other => panic!("Expected ArityError, got {other:?}"),
        }
    }
}
