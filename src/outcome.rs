//! Ready/pending evaluation results.
//!
//! Every evaluation step yields an [`Outcome`]. Most steps complete immediately
//! and return [`Outcome::Ready`]; only host primitives that genuinely suspend
//! (timers) produce [`Outcome::Pending`]. The combinators here apply
//! continuations in place for ready values and only allocate a future once a
//! pending value is actually encountered, so fully synchronous programs never
//! touch an executor.

use crate::Error;
use crate::ast::Value;
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use std::fmt;

/// Result of one evaluation step: an immediate value or a deferred computation.
pub enum Outcome<T = Value> {
    Ready(T),
    Pending(LocalBoxFuture<'static, Result<T, Error>>),
}

/// Canonical result of evaluation: failure, or a ready/pending value.
pub type EvalResult<T = Value> = Result<Outcome<T>, Error>;

impl<T: 'static> Outcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }

    /// Wrap an arbitrary future as a pending outcome
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, Error>> + 'static,
    {
        Outcome::Pending(future.boxed_local())
    }

    /// Sequence a continuation after this outcome (monadic bind).
    ///
    /// Ready values run `next` immediately; pending values register it to run
    /// on resolution.
    pub fn chain<U, F>(self, next: F) -> EvalResult<U>
    where
        U: 'static,
        F: FnOnce(T) -> EvalResult<U> + 'static,
    {
        match self {
            Outcome::Ready(value) => next(value),
            Outcome::Pending(future) => Ok(Outcome::pending(async move {
                let value = future.await?;
                next(value)?.resolve().await
            })),
        }
    }

    pub fn map<U, F>(self, f: F) -> Outcome<U>
    where
        U: 'static,
        F: FnOnce(T) -> U + 'static,
    {
        match self {
            Outcome::Ready(value) => Outcome::Ready(f(value)),
            Outcome::Pending(future) => Outcome::pending(future.map(|r| r.map(f))),
        }
    }

    /// Await the value regardless of variant
    pub async fn resolve(self) -> Result<T, Error> {
        match self {
            Outcome::Ready(value) => Ok(value),
            Outcome::Pending(future) => future.await,
        }
    }

    /// The value if it is already available
    pub fn ready(self) -> Option<T> {
        match self {
            Outcome::Ready(value) => Some(value),
            Outcome::Pending(_) => None,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Outcome::Pending(_) => write!(f, "Pending(<future>)"),
        }
    }
}

impl<T> From<T> for Outcome<T> {
    fn from(value: T) -> Self {
        Outcome::Ready(value)
    }
}

/// Apply `step` to each item in order, collecting the results (`chainAll`).
///
/// Items are processed synchronously until a step returns a pending outcome;
/// the remaining items then continue inside a single future, still strictly
/// in order.
pub fn traverse<I, T, F>(items: I, mut step: F) -> EvalResult<Vec<T>>
where
    I: IntoIterator,
    I::IntoIter: 'static,
    T: 'static,
    F: FnMut(I::Item) -> EvalResult<T> + 'static,
{
    let mut items = items.into_iter();
    let mut done = Vec::with_capacity(items.size_hint().0);

    while let Some(item) = items.next() {
        match step(item)? {
            Outcome::Ready(value) => done.push(value),
            Outcome::Pending(future) => {
                return Ok(Outcome::pending(async move {
                    done.push(future.await?);
                    for item in items {
                        done.push(step(item)?.resolve().await?);
                    }
                    Ok(done)
                }));
            }
        }
    }

    Ok(Outcome::Ready(done))
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::val;
    use futures::executor::block_on;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn deferred(v: i64) -> EvalResult {
        Ok(Outcome::pending(async move { Ok(val(v)) }))
    }

    #[test]
    fn test_chain_ready_runs_immediately() {
        let result = Outcome::Ready(val(1))
            .chain(|v| Ok(Outcome::Ready(val([v, val(2)]))))
            .unwrap();
        assert!(result.is_ready());
        assert_eq!(result.ready().unwrap(), val([1, 2]));
    }

    #[test]
    fn test_chain_pending_defers_continuation() {
        let ran = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&ran);
        let outcome = deferred(5)
            .unwrap()
            .chain(move |v| {
                *flag.borrow_mut() = true;
                Ok(Outcome::Ready(v))
            })
            .unwrap();

        assert!(!outcome.is_ready());
        assert!(!*ran.borrow());
        assert_eq!(block_on(outcome.resolve()).unwrap(), val(5));
        assert!(*ran.borrow());
    }

    #[test]
    fn test_traverse_keeps_order_across_suspension() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&log);
        let outcome = traverse(vec![1, 2, 3, 4], move |n| {
            seen.borrow_mut().push(n);
            if n == 2 {
                deferred(n)
            } else {
                Ok(Outcome::Ready(val(n)))
            }
        })
        .unwrap();

        assert!(!outcome.is_ready());
        assert_eq!(*log.borrow(), vec![1, 2]);

        let values = block_on(outcome.resolve()).unwrap();
        assert_eq!(values, vec![val(1), val(2), val(3), val(4)]);
        assert_eq!(*log.borrow(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_traverse_all_ready_stays_ready() {
        let outcome = traverse(0..3, |n| Ok(Outcome::Ready(n * 2))).unwrap();
        assert_eq!(outcome.ready().unwrap(), vec![0, 2, 4]);
    }

    #[test]
    fn test_traverse_stops_at_first_error() {
        let result = traverse(vec![1, 2, 3], |n| {
            if n == 2 {
                Err(Error::EvalError("boom".into()))
            } else {
                Ok(Outcome::Ready(n))
            }
        });
        assert!(matches!(result, Err(Error::EvalError(msg)) if msg == "boom"));
    }
}
