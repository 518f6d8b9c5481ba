use crate::Error;
use crate::ast::{HostFn, Number, Value};
use crate::outcome::{EvalResult, Outcome};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::rc::Rc;

// Adapter layer turning strongly-typed Rust functions into the erased
// `HostFn` stored in `Callable::Host`. Builtins are written against
// these adapters; embedders reach them through the `Environment`
// registration methods.

// =====================================================================
// Parameter conversion
// =====================================================================

/// Turns one evaluated argument into a typed parameter. `Param<'a>`
/// may borrow from the argument slot (strings, list iterators) or take
/// it by value.
pub(crate) trait FromParam {
    type Param<'a>;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error>;
}

impl FromParam for Value {
    type Param<'a> = Value;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        Ok(std::mem::replace(value, Value::Unspecified))
    }
}

impl FromParam for Number {
    type Param<'a> = Number;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        value.to_number()
    }
}

impl FromParam for &str {
    type Param<'a> = &'a str;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        if let Value::String(s) = value {
            Ok(s.as_str())
        } else {
            Err(Error::TypeError(format!("expected string, got {value}")))
        }
    }
}

impl<K> FromParam for TypedValueIter<'_, K>
where
    K: ValueElementKind,
{
    type Param<'a> = TypedValueIter<'a, K>;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        match &*value {
            Value::List(items) => TypedValueIter::<K>::new(items),
            other => Err(Error::TypeError(format!("expected list, got {other}"))),
        }
    }
}

// =====================================================================
// Typed iterators over argument tails and list arguments
// =====================================================================

/// Describes how to view a `Value` slice as a typed iterator: upfront
/// validation plus a per-element projection.
#[doc(hidden)]
pub trait ValueElementKind {
    type Item<'a>;

    fn precheck(slice: &[Value]) -> Result<(), Error>;
    fn project<'a>(v: &'a Value) -> Self::Item<'a>;
}

#[doc(hidden)]
pub struct TypedValueIter<'a, K: ValueElementKind> {
    inner: std::slice::Iter<'a, Value>,
    _marker: PhantomData<K>,
}

impl<'a, K> TypedValueIter<'a, K>
where
    K: ValueElementKind,
{
    pub(crate) fn new(values: &'a [Value]) -> Result<Self, Error> {
        K::precheck(values)?;
        Ok(TypedValueIter {
            inner: values.iter(),
            _marker: PhantomData,
        })
    }
}

impl<'a, K> Iterator for TypedValueIter<'a, K>
where
    K: ValueElementKind,
{
    type Item = K::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(K::project)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K> ExactSizeIterator for TypedValueIter<'_, K> where K: ValueElementKind {}
impl<K> FusedIterator for TypedValueIter<'_, K> where K: ValueElementKind {}

#[doc(hidden)]
pub struct ValueKind;

impl ValueElementKind for ValueKind {
    type Item<'a> = &'a Value;

    fn precheck(_slice: &[Value]) -> Result<(), Error> {
        Ok(())
    }

    fn project<'a>(v: &'a Value) -> Self::Item<'a> {
        v
    }
}

/// Elements coerced with [`Value::to_number`]
#[doc(hidden)]
pub struct NumberKind;

impl ValueElementKind for NumberKind {
    type Item<'a> = Number;

    fn precheck(slice: &[Value]) -> Result<(), Error> {
        slice.iter().try_for_each(|v| v.to_number().map(drop))
    }

    fn project<'a>(v: &'a Value) -> Self::Item<'a> {
        match v.to_number() {
            Ok(n) => n,
            Err(_) => {
                debug_assert!(false, "NumberKind::project saw non-number after precheck");
                unreachable!("NumberKind invariant violated")
            }
        }
    }
}

/// Borrowed iterator over argument values
pub type ValueIter<'a> = TypedValueIter<'a, ValueKind>;

/// Iterator over numerically coerced arguments; every element was
/// checked to be coercible before the builtin runs.
pub type NumIter<'a> = TypedValueIter<'a, NumberKind>;

// =====================================================================
// Rest parameters
// =====================================================================

pub(crate) trait FromRest {
    type Param<'a>;

    fn from_rest<'a>(slice: &'a [Value]) -> Result<Self::Param<'a>, Error>;
}

impl<K> FromRest for TypedValueIter<'static, K>
where
    K: ValueElementKind,
{
    type Param<'a> = TypedValueIter<'a, K>;

    fn from_rest<'a>(slice: &'a [Value]) -> Result<Self::Param<'a>, Error> {
        TypedValueIter::<K>::new(slice)
    }
}

// =====================================================================
// Return-type normalization
// =====================================================================

/// Normalizes builtin return types to [`EvalResult`]. Plain values become
/// ready outcomes; builtins that may suspend return an `EvalResult` directly.
pub(crate) trait IntoEvalResult {
    fn into_eval_result(self) -> EvalResult;
}

macro_rules! impl_into_eval_result {
    ($($t:ty),+) => {
        $(
            impl IntoEvalResult for $t {
                fn into_eval_result(self) -> EvalResult {
                    Ok(Outcome::Ready(self.into()))
                }
            }

            impl IntoEvalResult for Result<$t, Error> {
                fn into_eval_result(self) -> EvalResult {
                    self.map(|v| Outcome::Ready(v.into()))
                }
            }
        )+
    };
}

impl_into_eval_result!(Value, Number, bool, String, i64, f64);

impl IntoEvalResult for Outcome {
    fn into_eval_result(self) -> EvalResult {
        Ok(self)
    }
}

impl IntoEvalResult for EvalResult {
    fn into_eval_result(self) -> EvalResult {
        self
    }
}

/// Converts a typed Rust function into a fixed-arity [`HostFn`].
pub trait IntoOperation<Args> {
    fn into_operation(self) -> HostFn;
}

/// Converts a typed Rust function whose last parameter is a rest
/// iterator ([`ValueIter`] or [`NumIter`]) into a [`HostFn`].
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self) -> HostFn;
}

// =====================================================================
// Variadic adapters
// =====================================================================

impl<F, I, R> IntoVariadicOperation<(I,)> for F
where
    I: FromRest,
    F: for<'a> Fn(<I as FromRest>::Param<'a>) -> R + 'static,
    R: IntoEvalResult,
{
    fn into_variadic_operation(self) -> HostFn {
        Rc::new(move |args: Vec<Value>| {
            let rest_param: <I as FromRest>::Param<'_> = <I as FromRest>::from_rest(&args[..])?;
            (self)(rest_param).into_eval_result()
        })
    }
}

macro_rules! impl_into_variadic_operation_for_prefix_and_rest {
    ($prefix:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, I, R, $( $A ),+> IntoVariadicOperation<( $( $A, )+ I, )> for F
        where
            I: FromRest,
            $( $A: FromParam, )+
            F: for<'a> Fn(
                    $( <$A as FromParam>::Param<'a> ),+,
                    <I as FromRest>::Param<'a>,
                ) -> R
                + 'static,
            R: IntoEvalResult,
        {
            fn into_variadic_operation(self) -> HostFn {
                Rc::new(move |mut args: Vec<Value>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        &mut [ $( ref mut $v ),+, ref mut rest @ .. ] => {
                            $(
                                let $p: <$A as FromParam>::Param<'_> =
                                    <$A as FromParam>::from_arg($v)?;
                            )+

                            let rest_param: <I as FromRest>::Param<'_> =
                                <I as FromRest>::from_rest(&*rest)?;

                            (self)( $( $p ),+, rest_param ).into_eval_result()
                        }
                        _ => Err(Error::arity_error($prefix, len)),
                    }
                })
            }
        }
    };
}

impl_into_variadic_operation_for_prefix_and_rest!(1, v0, p0: A1);
impl_into_variadic_operation_for_prefix_and_rest!(2, v0, p0: A1, v1, p1: A2);

// =====================================================================
// Fixed-arity adapters
// =====================================================================

macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            F: for<'a> Fn( $( <$A as FromParam>::Param<'a> ),+ ) -> R + 'static,
            $( $A: FromParam, )+
            R: IntoEvalResult,
        {
            fn into_operation(self) -> HostFn {
                Rc::new(move |mut args: Vec<Value>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        &mut [ $( ref mut $v ),+ ] => {
                            $(
                                let $p: <$A as FromParam>::Param<'_> =
                                    <$A as FromParam>::from_arg($v)?;
                            )+

                            (self)( $( $p ),+ ).into_eval_result()
                        }
                        _ => Err(Error::arity_error($arity, len)),
                    }
                })
            }
        }
    };
}

impl<F, R> IntoOperation<()> for F
where
    F: Fn() -> R + 'static,
    R: IntoEvalResult,
{
    fn into_operation(self) -> HostFn {
        Rc::new(move |args: Vec<Value>| {
            if !args.is_empty() {
                return Err(Error::arity_error(0, args.len()));
            }
            (self)().into_eval_result()
        })
    }
}

impl_into_operation_for_arity!(1, v0, p0: A1);
impl_into_operation_for_arity!(2, v0, p0: A1, v1, p1: A2);
impl_into_operation_for_arity!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);
impl_into_operation_for_arity!(4, v0, p0: A1, v1, p1: A2, v2, p2: A3, v3, p3: A4);

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, val};

    fn call(f: &HostFn, args: Vec<Value>) -> Result<Value, Error> {
        f(args).map(|outcome| outcome.ready().unwrap())
    }

    #[test]
    fn test_fixed_arity_adapter() {
        fn describe(name: &str, n: Number) -> String {
            format!("{name}:{}", n.as_f64())
        }
        let op = <_ as IntoOperation<(&str, Number)>>::into_operation(describe);

        assert_eq!(call(&op, vec![val("x"), val("2")]).unwrap(), val("x:2"));
        assert!(matches!(
            call(&op, vec![val("x")]),
            Err(Error::ArityError { expected: 2, got: 1, .. })
        ));
        assert!(matches!(
            call(&op, vec![val(1), val(2)]),
            Err(Error::TypeError(_))
        ));
    }

    #[test]
    fn test_variadic_adapter_with_prefix() {
        fn scaled_sum(scale: Number, rest: NumIter<'_>) -> Number {
            rest.fold(Number::Int(0), Number::add).mul(scale)
        }
        let op = <_ as IntoVariadicOperation<(Number, NumIter<'static>)>>::into_variadic_operation(
            scaled_sum,
        );

        assert_eq!(call(&op, vec![val(2), val(1), val(true), nil()]).unwrap(), val(4));
        assert!(matches!(call(&op, vec![]), Err(Error::ArityError { .. })));
        assert!(matches!(
            call(&op, vec![val(2), val("nope")]),
            Err(Error::TypeError(_))
        ));
    }

    #[test]
    fn test_list_parameter() {
        fn count(items: ValueIter<'_>) -> i64 {
            items.len() as i64
        }
        let op = <_ as IntoOperation<(ValueIter<'static>,)>>::into_operation(count);

        assert_eq!(call(&op, vec![val([1, 2, 3])]).unwrap(), val(3));
        assert!(call(&op, vec![val(1)]).is_err());
    }

    #[test]
    fn test_outcome_returning_operation() {
        fn deferred(v: Value) -> EvalResult {
            Ok(Outcome::pending(async move { Ok(v) }))
        }
        let op = <_ as IntoOperation<(Value,)>>::into_operation(deferred);
        let outcome = op(vec![val(1)]).unwrap();
        assert!(!outcome.is_ready());
        assert_eq!(futures::executor::block_on(outcome.resolve()).unwrap(), val(1));
    }
}
