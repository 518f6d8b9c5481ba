//! Calling language procedures from host code.
//!
//! Host functions receive evaluated arguments and may call back into any
//! callable they were given. Procedures, however, use the special-form
//! convention. When a procedure flows into a host function as an argument it
//! is wrapped by [`host_value`] into a host function that
//!
//! - binds the given values positionally in a host-callback frame (no keyword
//!   detection; parameters without a value or default stay unbound),
//! - logs a failure and returns unspecified instead of raising it into the
//!   host caller.
//!
//! The wrapper keeps the procedure itself, so when language code later calls
//! the wrapped value the evaluator invokes the procedure directly with its
//! ordinary argument forms.

use crate::Error;
use crate::ast::{Callable, Forms, SpecialFormFn, Value};
use crate::evaluator::Environment;
use crate::outcome::{EvalResult, Outcome};
use std::rc::Rc;
use tracing::error;

/// Wrap procedures so host code can call them; other values pass through
pub fn host_value(value: Value) -> Value {
    match value {
        Value::Callable(Callable::SpecialForm { name, func }) => {
            Value::Callable(host_callback(name, func))
        }
        other => other,
    }
}

fn host_callback(name: Rc<str>, procedure: SpecialFormFn) -> Callable {
    let label = Rc::clone(&name);
    let target = Rc::clone(&procedure);
    Callable::Host {
        name,
        func: Rc::new(move |args| Ok(invoke_procedure(&label, &target, args))),
        procedure: Some(procedure),
    }
}

/// Run a procedure with already-evaluated arguments, suppressing failures
fn invoke_procedure(name: &str, procedure: &SpecialFormFn, args: Vec<Value>) -> Outcome {
    match procedure(&Environment::callback(), Forms::from(args)) {
        Ok(Outcome::Ready(value)) => Outcome::Ready(value),
        Ok(Outcome::Pending(future)) => {
            let name = name.to_owned();
            Outcome::pending(async move {
                Ok(future.await.unwrap_or_else(|err| suppressed(&name, &err)))
            })
        }
        Err(err) => Outcome::Ready(suppressed(name, &err)),
    }
}

fn suppressed(name: &str, err: &Error) -> Value {
    error!(callback = name, error = %err, "callback failed");
    Value::Unspecified
}

/// Call any callable the way a host function would: with evaluated
/// arguments. Procedure failures are logged and yield unspecified; host
/// function failures propagate.
pub fn invoke(callable: &Callable, args: Vec<Value>) -> EvalResult {
    match callable {
        Callable::SpecialForm { name, func } => Ok(invoke_procedure(name, func, args)),
        Callable::Host { func, .. } => func(args),
    }
}

/// Call any callable with evaluated arguments, propagating failures
pub fn apply_values(callable: &Callable, args: Vec<Value>) -> EvalResult {
    match callable {
        Callable::SpecialForm { func, .. }
        | Callable::Host {
            procedure: Some(func),
            ..
        } => func(&Environment::callback(), Forms::from(args)),
        Callable::Host { func, .. } => func(args),
    }
}
