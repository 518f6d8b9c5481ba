use crate::ast::{Callable, Forms, Symbol, Value};
use crate::builtinops::{assoc_in, builtin_constants, builtin_ops};
use crate::outcome::{EvalResult, Outcome, traverse};
use crate::{Error, MAX_EVAL_DEPTH, bridge};
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub mod environment;
pub(crate) mod intooperation;
pub mod params;

pub use environment::{AssignPolicy, Environment, InterpreterConfig};
pub use intooperation::{IntoOperation, IntoVariadicOperation, NumIter, ValueIter};
use params::{ParamSpec, make_procedure};

/// Remaining stack below which evaluation moves to a freshly allocated segment
const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROW_SIZE: usize = 2 * 1024 * 1024;

thread_local! {
    static EVAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts nested combinations on the native stack for as long as it lives
struct DepthGuard;

impl DepthGuard {
    fn enter() -> Result<Self, Error> {
        EVAL_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= MAX_EVAL_DEPTH {
                return Err(Error::EvalError(format!(
                    "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
                )));
            }
            depth.set(current + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        EVAL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Evaluate an S-expression.
///
/// Symbols resolve through `env`, non-empty lists are combinations and every
/// other value evaluates to itself. In a host-callback frame every form is
/// already a value and is returned unchanged.
pub fn eval(expr: &Value, env: &Environment) -> EvalResult {
    if env.is_callback() {
        return Ok(Outcome::Ready(expr.clone()));
    }

    match expr {
        Value::Symbol(sym) if sym.is_keyword() => Err(Error::KeywordMisuse(format!(
            "keyword {sym} cannot be evaluated"
        ))),
        Value::Symbol(sym) => env.lookup(sym).map(Outcome::Ready),
        Value::List(elements) => {
            let _guard = DepthGuard::enter()?;
            stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
                eval_combination(elements, env).map_err(|err| add_context(err, expr))
            })
        }
        _ => Ok(Outcome::Ready(expr.clone())),
    }
}

/// Attach the innermost failing expression to evaluation and type errors
fn add_context(error: Error, expr: &Value) -> Error {
    const MARKER: &str = "\n  Context: ";
    let context = format!("while evaluating: {expr}");
    match error {
        Error::EvalError(msg) if !msg.contains(MARKER) => {
            Error::EvalError(format!("{msg}{MARKER}{context}"))
        }
        Error::TypeError(msg) if !msg.contains(MARKER) => {
            Error::TypeError(format!("{msg}{MARKER}{context}"))
        }
        other => other,
    }
}

fn eval_combination(elements: &Rc<[Value]>, env: &Environment) -> EvalResult {
    let Some(head) = elements.first() else {
        return Err(Error::EmptyCombination);
    };
    let forms = Forms::new(Rc::clone(elements)).tail(1);
    let env = env.clone();
    eval(head, &env)?.chain(move |operator| apply(&operator, &env, forms))
}

/// Dispatch on the operator's calling convention
pub fn apply(operator: &Value, env: &Environment, forms: Forms) -> EvalResult {
    match operator {
        Value::Callable(
            Callable::SpecialForm { func, .. }
            | Callable::Host {
                procedure: Some(func),
                ..
            },
        ) => func(env, forms),
        Value::Callable(Callable::Host { func, .. }) => {
            let func = Rc::clone(func);
            eval_args(&forms, env)?.chain(move |args| func(args))
        }
        other => Err(Error::NotCallable(format!(
            "{other} is a {}, not a procedure",
            other.type_name()
        ))),
    }
}

/// Evaluate argument forms left to right for a host function. Procedures
/// passed as arguments are wrapped so host code can call them with values.
fn eval_args(forms: &[Value], env: &Environment) -> EvalResult<Vec<Value>> {
    let env = env.clone();
    traverse(forms.to_vec(), move |form| {
        Ok(eval(&form, &env)?.map(bridge::host_value))
    })
}

/// Evaluate forms in order and yield the last value; an empty body is unspecified
pub fn eval_body(body: Forms, env: &Environment) -> EvalResult {
    let mut last = Value::Unspecified;
    for (i, form) in body.iter().enumerate() {
        match eval(form, env)? {
            Outcome::Ready(value) => last = value,
            pending => {
                let rest = body.tail(i + 1);
                let env = env.clone();
                return Ok(Outcome::pending(async move {
                    let value = pending.resolve().await?;
                    if rest.is_empty() {
                        Ok(value)
                    } else {
                        eval_body(rest, &env)?.resolve().await
                    }
                }));
            }
        }
    }
    Ok(Outcome::Ready(last))
}

fn ready(value: Value) -> EvalResult {
    Ok(Outcome::Ready(value))
}

/// `(quote datum)`
pub(crate) fn eval_quote(_env: &Environment, forms: Forms) -> EvalResult {
    match &forms[..] {
        [datum] => ready(datum.clone()),
        _ => Err(Error::arity_error(1, forms.len())),
    }
}

/// `(if test consequent [alternative])`; a missing alternative yields unspecified
pub(crate) fn eval_if(env: &Environment, forms: Forms) -> EvalResult {
    let [test, ..] = &forms[..] else {
        return Err(Error::arity_error(3, forms.len()));
    };
    let env = env.clone();
    eval(test, &env)?.chain(move |flag| {
        let branch = if flag.is_truthy() { 1 } else { 2 };
        match forms.get(branch) {
            Some(form) => eval(form, &env),
            None => ready(Value::Unspecified),
        }
    })
}

macro_rules! conditional_body {
    ($name:ident, $run_when:literal) => {
        pub(crate) fn $name(env: &Environment, forms: Forms) -> EvalResult {
            let Some(test) = forms.first() else {
                return Err(Error::arity_error(1, 0));
            };
            let env = env.clone();
            eval(test, &env)?.chain(move |flag| {
                if flag.is_truthy() == $run_when {
                    eval_body(forms.tail(1), &env)
                } else {
                    ready(Value::Unspecified)
                }
            })
        }
    };
}

conditional_body!(eval_when, true);
conditional_body!(eval_unless, false);

/// `(cond (test body...) ... (else body...))`
pub(crate) fn eval_cond(env: &Environment, forms: Forms) -> EvalResult {
    let mut clauses = forms;
    loop {
        let Some(clause) = clauses.first() else {
            return ready(Value::Unspecified);
        };
        let Value::List(parts) = clause else {
            return Err(Error::TypeError(format!(
                "cond clause must be a list, got {clause}"
            )));
        };
        let Some(test) = parts.first() else {
            return Err(Error::EvalError("empty cond clause".into()));
        };
        let body = Forms::new(Rc::clone(parts)).tail(1);

        if matches!(test, Value::Symbol(s) if s.name() == "else") {
            return eval_body(body, env);
        }

        match eval(test, env)? {
            Outcome::Ready(flag) if flag.is_truthy() => return clause_result(flag, body, env),
            Outcome::Ready(_) => clauses = clauses.tail(1),
            pending => {
                let rest = clauses.tail(1);
                let env = env.clone();
                return Ok(Outcome::pending(async move {
                    let flag = pending.resolve().await?;
                    if flag.is_truthy() {
                        clause_result(flag, body, &env)?.resolve().await
                    } else {
                        eval_cond(&env, rest)?.resolve().await
                    }
                }));
            }
        }
    }
}

/// A clause without a body yields its test value
fn clause_result(flag: Value, body: Forms, env: &Environment) -> EvalResult {
    if body.is_empty() {
        ready(flag)
    } else {
        eval_body(body, env)
    }
}

/// `(begin form...)`, evaluated in a fresh child frame
pub(crate) fn eval_begin(env: &Environment, forms: Forms) -> EvalResult {
    eval_body(forms, &env.child())
}

/// `(while test body...)` yields the last body value, or unspecified when the
/// body never ran
pub(crate) fn eval_while(env: &Environment, forms: Forms) -> EvalResult {
    let Some(test) = forms.first().cloned() else {
        return Err(Error::arity_error(1, 0));
    };
    let body = forms.tail(1);
    let env = env.clone();
    let mut last = Value::Unspecified;

    loop {
        match eval(&test, &env)? {
            Outcome::Ready(flag) if !flag.is_truthy() => return ready(last),
            Outcome::Ready(_) => {}
            pending => {
                return Ok(Outcome::pending(async move {
                    let flag = pending.resolve().await?;
                    while_async(env, test, body, last, Some(flag)).await
                }));
            }
        }
        match eval_body(body.clone(), &env)? {
            Outcome::Ready(value) => last = value,
            pending => {
                return Ok(Outcome::pending(async move {
                    let value = pending.resolve().await?;
                    while_async(env, test, body, value, None).await
                }));
            }
        }
    }
}

async fn while_async(
    env: Environment,
    test: Value,
    body: Forms,
    mut last: Value,
    mut flag: Option<Value>,
) -> Result<Value, Error> {
    loop {
        let current = match flag.take() {
            Some(flag) => flag,
            None => eval(&test, &env)?.resolve().await?,
        };
        if !current.is_truthy() {
            return Ok(last);
        }
        last = eval_body(body.clone(), &env)?.resolve().await?;
    }
}

/// `(define name expr)` or `(define (name . params) body...)`
pub(crate) fn eval_define(env: &Environment, forms: Forms) -> EvalResult {
    match &forms[..] {
        [Value::Symbol(name), expr] if !name.is_keyword() => {
            let name = name.clone();
            let target = env.clone();
            eval(expr, env)?.chain(move |value| {
                target.define(name, value);
                ready(Value::Unspecified)
            })
        }
        [Value::List(signature), ..] => {
            let Some(Value::Symbol(name)) = signature.first().filter(|v| !v.is_keyword()) else {
                return Err(Error::MalformedParameterSpec(format!(
                    "procedure name must be a symbol in {}",
                    forms[0]
                )));
            };
            let spec = ParamSpec::parse(&signature[1..])?;
            let procedure = make_procedure(name.name(), spec, env, forms.tail(1));
            env.define(name.clone(), Value::Callable(procedure));
            ready(Value::Unspecified)
        }
        [Value::Symbol(_), ..] => Err(Error::arity_error(2, forms.len())),
        [other, ..] => Err(Error::TypeError(format!(
            "define requires a symbol or a signature list, got {other}"
        ))),
        [] => Err(Error::arity_error(2, 0)),
    }
}

/// `(lambda params body...)`
pub(crate) fn eval_lambda(env: &Environment, forms: Forms) -> EvalResult {
    match forms.first() {
        Some(Value::List(params)) => {
            let spec = ParamSpec::parse(params)?;
            ready(Value::Callable(make_procedure(
                "lambda",
                spec,
                env,
                forms.tail(1),
            )))
        }
        Some(other) => Err(Error::MalformedParameterSpec(format!(
            "lambda parameters must be a list, got {other}"
        ))),
        None => Err(Error::arity_error(1, 0)),
    }
}

/// `(set! name expr)` or `(set! (name segment...) expr)`.
///
/// The path form updates a nested dict/list value bound to `name`; keyword
/// segments (`#:field`) stand for the literal key `field`.
pub(crate) fn eval_set(env: &Environment, forms: Forms) -> EvalResult {
    let [target, value_form] = &forms[..] else {
        return Err(Error::arity_error(2, forms.len()));
    };
    let env = env.clone();

    match target {
        Value::Symbol(name) if !name.is_keyword() => {
            let name = name.clone();
            eval(value_form, &env)?.chain(move |value| {
                env.assign(&name, value)?;
                ready(Value::Unspecified)
            })
        }
        Value::List(path) => {
            let Some(Value::Symbol(root)) = path.first() else {
                return Err(Error::PathTypeError(format!(
                    "set! path must start with a symbol, got {target}"
                )));
            };
            let root = root.clone();
            let value_form = value_form.clone();
            let segment_env = env.clone();

            traverse(path[1..].to_vec(), move |segment| {
                path_segment(&segment, &segment_env)
            })?
            .chain(move |segments| {
                eval(&value_form, &env)?.chain(move |value| {
                    let current = env.lookup(&root)?;
                    let updated = assoc_in(&current, &segments, value)?;
                    env.assign(&root, updated)?;
                    ready(Value::Unspecified)
                })
            })
        }
        other => Err(Error::TypeError(format!(
            "set! target must be a symbol or a path, got {other}"
        ))),
    }
}

fn path_segment(form: &Value, env: &Environment) -> EvalResult {
    match form.as_symbol().and_then(Symbol::keyword_name) {
        Some(name) => ready(Value::from(name)),
        None => eval(form, env),
    }
}

/// `(dict key value ...)`; keys are keyword tokens or forms evaluating to a
/// string, integer or symbol
pub(crate) fn eval_dict(env: &Environment, forms: Forms) -> EvalResult {
    if forms.len() % 2 != 0 {
        return Err(Error::DictKeyError(format!(
            "dict requires key/value pairs, got {} forms",
            forms.len()
        )));
    }

    let pairs: Vec<(Value, Value)> = forms
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    let env = env.clone();

    traverse(pairs, move |(key_form, value_form)| {
        let value_env = env.clone();
        dict_key(&key_form, &env)?.chain(move |key| {
            Ok(eval(&value_form, &value_env)?.map(move |value| (key, value)))
        })
    })?
    .chain(|entries| {
        let mut map = IndexMap::with_capacity(entries.len());
        for (key, value) in entries {
            if map.contains_key(&key) {
                return Err(Error::DictKeyError(format!("duplicate key \"{key}\"")));
            }
            map.insert(key, value);
        }
        ready(Value::Dict(Rc::new(RefCell::new(map))))
    })
}

fn dict_key(form: &Value, env: &Environment) -> EvalResult<String> {
    if let Some(name) = form.as_symbol().and_then(Symbol::keyword_name) {
        return Ok(Outcome::Ready(name.to_owned()));
    }
    eval(form, env)?.chain(|key| match key {
        Value::String(s) => Ok(Outcome::Ready(s)),
        Value::Integer(n) => Ok(Outcome::Ready(n.to_string())),
        Value::Symbol(s) => Ok(Outcome::Ready(s.name().to_owned())),
        other => Err(Error::DictKeyError(format!(
            "keys must be strings, integers or symbols, got {} {other}",
            other.type_name()
        ))),
    })
}

fn short_circuit(env: Environment, forms: Forms, stop_on: bool) -> EvalResult {
    for (i, form) in forms.iter().enumerate() {
        match eval(form, &env)? {
            Outcome::Ready(value) if value.is_truthy() == stop_on => {
                return ready(Value::Bool(stop_on));
            }
            Outcome::Ready(_) => {}
            pending => {
                let rest = forms.tail(i + 1);
                return Ok(Outcome::pending(async move {
                    if pending.resolve().await?.is_truthy() == stop_on {
                        return Ok(Value::Bool(stop_on));
                    }
                    short_circuit(env, rest, stop_on)?.resolve().await
                }));
            }
        }
    }
    ready(Value::Bool(!stop_on))
}

macro_rules! boolean_logic_op {
    ($name:ident, $stop_on:literal) => {
        pub(crate) fn $name(env: &Environment, forms: Forms) -> EvalResult {
            short_circuit(env.clone(), forms, $stop_on)
        }
    };
}

boolean_logic_op!(eval_and, false);
boolean_logic_op!(eval_or, true);

/// `(eval form)`: evaluate `form`, then evaluate the resulting datum
pub(crate) fn eval_eval(env: &Environment, forms: Forms) -> EvalResult {
    let [form] = &forms[..] else {
        return Err(Error::arity_error(1, forms.len()));
    };
    let env = env.clone();
    eval(form, &env)?.chain(move |datum| eval(&datum, &env))
}

/// Create a root environment holding the builtin catalog
pub fn create_global_env(config: InterpreterConfig) -> Environment {
    let env = Environment::new_root(config);

    for (name, value) in builtin_constants() {
        env.define(Symbol::new(name), value);
    }
    for op in builtin_ops() {
        for name in std::iter::once(op.id).chain(op.aliases.iter().copied()) {
            env.define(Symbol::new(name), Value::Callable(op.to_callable(name)));
        }
    }

    env
}

/// Build a top-level frame below the builtins holding `extra` bindings
pub fn create_evaluation_env<I, K>(config: InterpreterConfig, extra: I) -> Environment
where
    I: IntoIterator<Item = (K, Value)>,
    K: AsRef<str>,
{
    let env = create_global_env(config).child();
    for (name, value) in extra {
        env.define(Symbol::new(name), value);
    }
    env
}

/// Convenience closure evaluating forms in one persistent environment
pub fn create_evaluator<I, K>(config: InterpreterConfig, extra: I) -> impl Fn(&Value) -> EvalResult
where
    I: IntoIterator<Item = (K, Value)>,
    K: AsRef<str>,
{
    let env = create_evaluation_env(config, extra);
    move |expr| eval(expr, &env)
}
