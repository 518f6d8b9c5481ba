//! Interpreter facade and the runtime that drives deferred results.
//!
//! ```
//! use lispkit::{Interpreter, InterpreterConfig, Value};
//!
//! let interp = Interpreter::new(InterpreterConfig::default());
//! let value = interp.run("(define (sq x) (* x x)) (sq 12)").unwrap();
//! assert_eq!(value, Value::from(144));
//! // nothing suspended, so no async runtime was ever started
//! assert!(!interp.runtime().runtime_started());
//! ```

use crate::ast::{Forms, Number, Symbol, Value};
use crate::builtinops::Arity;
use crate::evaluator::{Environment, InterpreterConfig, ValueIter, create_global_env, eval, eval_body};
use crate::outcome::{EvalResult, Outcome};
use crate::scheme::parse;
use crate::{Error, bridge};
use futures::FutureExt;
use futures::future::{LocalBoxFuture, poll_fn};
use futures::stream::{FuturesUnordered, StreamExt};
use std::cell::{OnceCell, RefCell};
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, trace, warn};

type Timer = LocalBoxFuture<'static, ()>;

/// Drives pending outcomes and timer tasks on a single-threaded tokio
/// runtime that is only started the first time something actually suspends.
#[derive(Default)]
pub struct HostRuntime {
    /// Timers scheduled since the last poll
    queued: RefCell<Vec<Timer>>,
    /// Timers being driven; only touched by the polling loop
    active: RefCell<FuturesUnordered<Timer>>,
    // declared last so pending timers are dropped before their driver
    tokio: OnceCell<Runtime>,
}

impl HostRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runtime_started(&self) -> bool {
        self.tokio.get().is_some()
    }

    fn runtime(&self) -> Result<&Runtime, Error> {
        if let Some(runtime) = self.tokio.get() {
            return Ok(runtime);
        }
        let runtime = Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| Error::EvalError(format!("failed to start host runtime: {e}")))?;
        debug!("host runtime started");
        Ok(self.tokio.get_or_init(|| runtime))
    }

    /// Queue a background task; it runs whenever the runtime is driven
    pub fn schedule(&self, timer: impl Future<Output = ()> + 'static) {
        self.queued.borrow_mut().push(timer.boxed_local());
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.queued.borrow().is_empty() || !self.active.borrow().is_empty()
    }

    fn poll_timers(&self, cx: &mut Context<'_>) {
        let mut active = self.active.borrow_mut();
        loop {
            active.extend(self.queued.borrow_mut().drain(..));
            match active.poll_next_unpin(cx) {
                Poll::Ready(Some(())) => {}
                Poll::Ready(None) | Poll::Pending if self.queued.borrow().is_empty() => break,
                Poll::Ready(None) | Poll::Pending => {}
            }
        }
    }

    /// Await an outcome inside an already running tokio runtime, driving
    /// queued timers alongside it
    pub async fn drive(&self, outcome: Outcome) -> Result<Value, Error> {
        let mut main = match outcome {
            Outcome::Ready(value) => return Ok(value),
            Outcome::Pending(future) => future,
        };
        poll_fn(|cx| {
            self.poll_timers(cx);
            main.as_mut().poll(cx)
        })
        .await
    }

    /// Resolve once every queued timer has fired
    pub async fn idle(&self) {
        poll_fn(|cx| {
            self.poll_timers(cx);
            if self.has_pending_timers() {
                Poll::Pending
            } else {
                Poll::Ready(())
            }
        })
        .await;
    }

    /// Synchronously resolve an outcome. Ready values are returned without
    /// touching the async runtime.
    pub fn block_on(&self, outcome: Outcome) -> Result<Value, Error> {
        match outcome {
            Outcome::Ready(value) => Ok(value),
            pending => self.runtime()?.block_on(self.drive(pending)),
        }
    }

    /// Fire timers that are already due without waiting for later ones
    pub fn run_due_timers(&self) -> Result<(), Error> {
        if !self.has_pending_timers() {
            return Ok(());
        }
        self.runtime()?.block_on(async {
            poll_fn(|cx| {
                self.poll_timers(cx);
                Poll::Ready(())
            })
            .await;
            // let the time driver observe elapsed deadlines
            tokio::task::yield_now().await;
            poll_fn(|cx| {
                self.poll_timers(cx);
                Poll::Ready(())
            })
            .await;
        });
        Ok(())
    }

    /// Run remaining timers to completion
    pub fn run_until_idle(&self) -> Result<(), Error> {
        if !self.has_pending_timers() {
            return Ok(());
        }
        self.runtime()?.block_on(self.idle());
        Ok(())
    }
}

impl Drop for HostRuntime {
    fn drop(&mut self) {
        let dropped = self.queued.get_mut().len() + self.active.get_mut().len();
        if dropped > 0 {
            warn!(dropped, "host runtime dropped with pending timers");
        }
    }
}

/// Deadline `ms` milliseconds from now. Negative delays fire immediately;
/// delays that do not fit a duration or an instant are rejected.
fn deadline_after(ms: Number) -> Result<Instant, Error> {
    let ms = ms.as_f64();
    if ms.is_nan() {
        return Err(Error::TypeError("invalid delay: NaN".into()));
    }
    let delay = Duration::try_from_secs_f64(ms.max(0.0) / 1000.0)
        .map_err(|_| Error::TypeError(format!("invalid delay: {ms}")))?;
    Instant::now()
        .checked_add(delay)
        .ok_or_else(|| Error::TypeError(format!("delay too large: {ms}")))
}

/// `(sleep ms)`: a deferred unspecified value
fn host_sleep(ms: Number) -> EvalResult {
    let deadline = deadline_after(ms)?;
    Ok(Outcome::pending(async move {
        sleep_until(deadline).await;
        Ok(Value::Unspecified)
    }))
}

/// `(set-timeout f ms arg...)`: call `f` with `arg...` once `ms` elapsed
fn host_set_timeout(
    runtime: &HostRuntime,
    callback: Value,
    ms: Number,
    args: ValueIter<'_>,
) -> Result<Value, Error> {
    let Value::Callable(callback) = callback else {
        return Err(Error::NotCallable(format!("{callback}")));
    };
    let deadline = deadline_after(ms)?;
    let args: Vec<Value> = args.cloned().collect();
    trace!(callback = callback.name(), "timer scheduled");

    runtime.schedule(async move {
        sleep_until(deadline).await;
        let result = match bridge::invoke(&callback, args) {
            Ok(outcome) => outcome.resolve().await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            error!(callback = callback.name(), error = %err, "timer callback failed");
        }
    });
    Ok(Value::Unspecified)
}

fn install_runtime_primitives(env: &Environment, runtime: &Rc<HostRuntime>) {
    env.register_builtin_operation::<_, (Number,)>("sleep", host_sleep);

    let runtime = Rc::downgrade(runtime);
    env.register_variadic_builtin_operation::<_, (Value, Number, ValueIter<'static>)>(
        "set-timeout",
        Arity::AtLeast(2),
        move |callback: Value, ms: Number, args: ValueIter<'_>| -> Result<Value, Error> {
            let runtime = runtime
                .upgrade()
                .ok_or_else(|| Error::EvalError("host runtime is gone".into()))?;
            host_set_timeout(&runtime, callback, ms, args)
        },
    );
}

/// An evaluation session: a top-level frame below a fresh root environment,
/// plus the runtime that resolves deferred results.
pub struct Interpreter {
    env: Environment,
    runtime: Rc<HostRuntime>,
}

impl Interpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self::with_bindings(config, Vec::<(String, Value)>::new())
    }

    /// Create a session whose top-level frame holds `extra` bindings
    pub fn with_bindings<I, K>(config: InterpreterConfig, extra: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let runtime = Rc::new(HostRuntime::new());
        let global = create_global_env(config);
        install_runtime_primitives(&global, &runtime);

        let env = global.child();
        for (name, value) in extra {
            env.define(Symbol::new(name), value);
        }
        debug!(policy = ?config.assign_policy, "interpreter created");
        Interpreter { env, runtime }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn runtime(&self) -> &HostRuntime {
        &self.runtime
    }

    /// Evaluate one form in the top-level frame
    pub fn eval(&self, expr: &Value) -> EvalResult {
        eval(expr, &self.env)
    }

    /// Parse `source` and evaluate its forms in order, yielding the last value
    pub fn eval_source(&self, source: &str) -> EvalResult {
        let forms = parse(source)?;
        debug!(forms = forms.len(), "evaluating source");
        eval_body(Forms::from(forms), &self.env)
    }

    pub fn block_on(&self, outcome: Outcome) -> Result<Value, Error> {
        self.runtime.block_on(outcome)
    }

    /// Evaluate `source`, wait for its value and for every timer it scheduled
    pub fn run(&self, source: &str) -> Result<Value, Error> {
        let value = self.block_on(self.eval_source(source)?)?;
        self.runtime.run_until_idle()?;
        Ok(value)
    }

    /// Evaluate the top-level forms of `source` one at a time, reporting each
    /// form's result. A failing form does not stop the ones after it, and
    /// timers are left running in the background.
    pub fn run_each(&self, source: &str) -> Result<Vec<Result<Value, Error>>, Error> {
        let forms = parse(source)?;
        self.runtime.run_due_timers()?;
        Ok(forms
            .iter()
            .map(|form| self.eval(form).and_then(|outcome| self.block_on(outcome)))
            .collect())
    }

    /// [`Interpreter::run`] for callers already inside a tokio runtime
    pub async fn run_async(&self, source: &str) -> Result<Value, Error> {
        let value = self.runtime.drive(self.eval_source(source)?).await?;
        self.runtime.idle().await;
        Ok(value)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(InterpreterConfig::default())
    }
}
