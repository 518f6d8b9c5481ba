//! Deferred host primitives driven from an existing tokio runtime
#![expect(clippy::unwrap_used)] // test code OK

use lispkit::ast::{sym, val};
use lispkit::{Interpreter, Outcome, Value};
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};

#[tokio::test]
async fn synchronous_programs_complete_without_suspending() {
    let interp = Interpreter::default();
    let outcome = interp.eval_source("(define (sq x) (* x x)) (sq 9)").unwrap();
    assert!(matches!(outcome, Outcome::Ready(_)));
    assert_eq!(interp.run_async("(sq 9)").await.unwrap(), val(81));
}

#[tokio::test]
async fn later_forms_observe_effects_in_program_order() {
    let interp = Interpreter::default();
    let value = interp
        .run_async(
            "(define trace (list))
             (define (note x) (set! trace (append trace (list x))))
             (note 1)
             (sleep 5)
             (note 2)
             (sleep 1)
             (note 3)
             trace",
        )
        .await
        .unwrap();
    assert_eq!(value, val([1, 2, 3]));
}

#[tokio::test]
async fn sleep_waits_for_its_delay() {
    let interp = Interpreter::default();
    let started = Instant::now();
    interp.run_async("(sleep 20)").await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[tokio::test]
async fn deferred_arguments_keep_their_order() {
    let interp = Interpreter::default();
    let value = interp
        .run_async(
            "(define (later x ms) (sleep ms) x)
             (list (later 'a 10) (later 'b 1) 'c)",
        )
        .await
        .unwrap();
    assert_eq!(value, val(vec![sym("a"), sym("b"), sym("c")]));
}

#[tokio::test]
async fn timers_call_back_into_the_session() {
    let interp = Interpreter::default();
    interp
        .run_async(
            "(define hits 0)
             (define (hit (n 1)) (set! hits (+ hits n)))
             (set-timeout hit 5)
             (set-timeout hit 1 10)",
        )
        .await
        .unwrap();
    // run_async returns only after every timer has fired
    assert_eq!(interp.run_async("hits").await.unwrap(), val(11));
}

#[tokio::test]
async fn timers_can_schedule_more_timers() {
    let interp = Interpreter::default();
    interp
        .run_async(
            "(define ticks 0)
             (define (tick)
               (set! ticks (+ ticks 1))
               (when (< ticks 3) (set-timeout tick 1)))
             (set-timeout tick 1)",
        )
        .await
        .unwrap();
    assert_eq!(interp.run_async("ticks").await.unwrap(), val(3));
}

#[tokio::test]
async fn failures_after_a_suspension_surface_to_the_caller() {
    let interp = Interpreter::default();
    let err = interp
        .run_async("(sleep 1) (undefined-name)")
        .await
        .unwrap_err();
    assert!(matches!(err, lispkit::Error::UnboundSymbol(_)));

    let suppressed = interp
        .run_async("(call (lambda () (sleep 1) (car '())))")
        .await
        .unwrap();
    assert_eq!(suppressed, Value::Unspecified);
}
