//! Parameter lists for `lambda` and `define`.
//!
//! A parameter list mixes four kinds of descriptors:
//!
//! ```scheme
//! (a              ; required positional
//!  (b 10)         ; optional positional with a default form
//!  . rest         ; rest parameter collecting remaining positionals
//!  #:key k        ; required keyword argument bound to `k`
//!  #:color (c 1)) ; optional keyword argument bound to `c`
//! ```
//!
//! Lists are parsed once when the procedure is built ([`ParamSpec::parse`]) and
//! matched against the actual argument forms on every call ([`ParamSpec::bind`]).
//! Defaults are evaluated in the definition environment, actual arguments in
//! the caller's environment.

use crate::Error;
use crate::ast::{Callable, Forms, Symbol, Value, nil};
use crate::evaluator::{Environment, eval, eval_body};
use crate::outcome::{EvalResult, Outcome, traverse};
use indexmap::IndexMap;
use std::collections::HashSet;

const REST_MARKER: &str = ".";

/// One named parameter with an optional default form
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Symbol,
    pub default: Option<Value>,
}

/// A parsed parameter list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSpec {
    positional: Vec<Param>,
    rest: Option<Symbol>,
    /// keyword token (`#:color`) -> bound parameter
    keywords: IndexMap<Symbol, Param>,
}

/// Where a parameter's value comes from on a particular call
enum Source {
    /// Argument form evaluated in the caller's environment
    Caller(Value),
    /// Default form evaluated in the definition environment
    Definition(Value),
    /// Argument forms for the rest parameter, evaluated in the caller's environment
    CallerRest(Vec<Value>),
    /// Value supplied as-is (host callback arguments)
    Given(Value),
}

impl ParamSpec {
    pub fn parse(forms: &[Value]) -> Result<ParamSpec, Error> {
        let mut spec = ParamSpec::default();
        let mut names = HashSet::new();
        let mut claim = |name: &Symbol| {
            if names.insert(name.clone()) {
                Ok(name.clone())
            } else {
                Err(Error::MalformedParameterSpec(format!(
                    "duplicate parameter name {name}"
                )))
            }
        };

        let mut iter = forms.iter();
        while let Some(form) = iter.next() {
            match form {
                Value::Symbol(s) if s.name() == REST_MARKER => {
                    if spec.rest.is_some() {
                        return Err(Error::MalformedParameterSpec(
                            "multiple rest parameters".into(),
                        ));
                    }
                    match iter.next() {
                        Some(Value::Symbol(rest)) if is_plain_name(rest) => {
                            spec.rest = Some(claim(rest)?);
                        }
                        _ => {
                            return Err(Error::MalformedParameterSpec(
                                "rest marker must be followed by exactly one symbol".into(),
                            ));
                        }
                    }
                }
                Value::Symbol(keyword) if keyword.is_keyword() => {
                    if spec.keywords.contains_key(keyword) {
                        return Err(Error::MalformedParameterSpec(format!(
                            "duplicated keyword parameter {keyword}"
                        )));
                    }
                    let Some(descriptor) = iter.next() else {
                        return Err(Error::MalformedParameterSpec(format!(
                            "keyword {keyword} is missing its parameter"
                        )));
                    };
                    let mut param = parse_param(descriptor)?;
                    param.name = claim(&param.name)?;
                    spec.keywords.insert(keyword.clone(), param);
                }
                other => {
                    if spec.rest.is_some() {
                        return Err(Error::MalformedParameterSpec(format!(
                            "positional parameter {other} after rest parameter"
                        )));
                    }
                    let mut param = parse_param(other)?;
                    param.name = claim(&param.name)?;
                    spec.positional.push(param);
                }
            }
        }

        Ok(spec)
    }

    pub fn positional(&self) -> &[Param] {
        &self.positional
    }

    pub fn rest(&self) -> Option<&Symbol> {
        self.rest.as_ref()
    }

    pub fn keyword(&self, keyword: &Symbol) -> Option<&Param> {
        self.keywords.get(keyword)
    }

    fn required_count(&self) -> usize {
        self.positional
            .iter()
            .filter(|p| p.default.is_none())
            .count()
    }

    /// Match actual arguments against this list and produce the new call frame,
    /// a child of `def_env`.
    ///
    /// When `caller` is a host-callback frame the arguments are values, matched
    /// positionally; unsupplied parameters without defaults stay unbound.
    pub fn bind(
        &self,
        def_env: &Environment,
        caller: &Environment,
        args: &[Value],
    ) -> EvalResult<Environment> {
        let sources = if caller.is_callback() {
            self.callback_sources(args)?
        } else {
            self.call_sources(args)?
        };

        let frame = def_env.child();
        let caller = caller.clone();
        let def_env = def_env.clone();
        traverse(sources, move |(name, source)| {
            Ok(resolve(source, &caller, &def_env)?.map(move |value| (name, value)))
        })?
        .chain(move |bound| {
            for (name, value) in bound {
                frame.define(name, value);
            }
            Ok(Outcome::Ready(frame))
        })
    }

    fn call_sources(&self, args: &[Value]) -> Result<Vec<(Symbol, Source)>, Error> {
        let split = args.iter().position(Value::is_keyword).unwrap_or(args.len());
        let (positional, keyword_forms) = args.split_at(split);
        let mut supplied = self.collect_keywords(keyword_forms)?;

        let mut keyword_sources = Vec::with_capacity(self.keywords.len());
        for (keyword, param) in &self.keywords {
            let source = match (supplied.swap_remove(keyword), &param.default) {
                (Some(form), _) => Source::Caller(form),
                (None, Some(default)) => Source::Definition(default.clone()),
                (None, None) => {
                    return Err(Error::UndefinedKeywordArgument(keyword.name().to_owned()));
                }
            };
            keyword_sources.push((param.name.clone(), source));
        }

        let mut sources = Vec::with_capacity(self.positional.len() + keyword_sources.len() + 1);
        for (i, param) in self.positional.iter().enumerate() {
            let source = match (positional.get(i), &param.default) {
                (Some(form), _) => Source::Caller(form.clone()),
                (None, Some(default)) => Source::Definition(default.clone()),
                (None, None) => {
                    return Err(Error::TooFewArguments {
                        expected: self.required_count(),
                        got: positional.len(),
                    });
                }
            };
            sources.push((param.name.clone(), source));
        }

        let extra = positional.get(self.positional.len()..).unwrap_or_default();
        match &self.rest {
            Some(rest) => sources.push((rest.clone(), Source::CallerRest(extra.to_vec()))),
            None if !extra.is_empty() => {
                return Err(Error::TooManyArguments {
                    expected: self.positional.len(),
                    got: positional.len(),
                });
            }
            None => {}
        }

        sources.extend(keyword_sources);
        Ok(sources)
    }

    /// Pair up `#:keyword form` arguments. Once the first keyword appears,
    /// every remaining argument must belong to such a pair.
    fn collect_keywords(&self, forms: &[Value]) -> Result<IndexMap<Symbol, Value>, Error> {
        let mut supplied = IndexMap::new();
        let mut iter = forms.iter();
        while let Some(form) = iter.next() {
            let Some(keyword) = form.as_symbol().filter(|s| s.is_keyword()) else {
                return Err(Error::KeywordMisuse(format!(
                    "positional argument {form} after keyword arguments"
                )));
            };
            let Some(value) = iter.next() else {
                return Err(Error::KeywordMisuse(format!(
                    "missing value after keyword argument {keyword}"
                )));
            };
            if supplied.contains_key(keyword) {
                return Err(Error::DuplicateKeyword(keyword.name().to_owned()));
            }
            if !self.keywords.contains_key(keyword) {
                return Err(Error::UnknownKeyword(keyword.name().to_owned()));
            }
            supplied.insert(keyword.clone(), value.clone());
        }
        Ok(supplied)
    }

    fn callback_sources(&self, args: &[Value]) -> Result<Vec<(Symbol, Source)>, Error> {
        let mut sources = Vec::with_capacity(self.positional.len() + self.keywords.len() + 1);
        for (i, param) in self.positional.iter().enumerate() {
            match (args.get(i), &param.default) {
                (Some(value), _) => sources.push((param.name.clone(), Source::Given(value.clone()))),
                (None, Some(default)) => {
                    sources.push((param.name.clone(), Source::Definition(default.clone())));
                }
                (None, None) => {}
            }
        }

        let extra = args.get(self.positional.len()..).unwrap_or_default();
        match &self.rest {
            Some(rest) => sources.push((rest.clone(), Source::Given(Value::from(extra)))),
            None if !extra.is_empty() => {
                return Err(Error::TooManyArguments {
                    expected: self.positional.len(),
                    got: args.len(),
                });
            }
            None => {}
        }

        for param in self.keywords.values() {
            if let Some(default) = &param.default {
                sources.push((param.name.clone(), Source::Definition(default.clone())));
            }
        }
        Ok(sources)
    }
}

fn is_plain_name(sym: &Symbol) -> bool {
    !sym.is_keyword() && sym.name() != REST_MARKER
}

/// `name` or `(name default)`
fn parse_param(form: &Value) -> Result<Param, Error> {
    match form {
        Value::Symbol(name) if is_plain_name(name) => Ok(Param {
            name: name.clone(),
            default: None,
        }),
        Value::List(parts) => match &parts[..] {
            [Value::Symbol(name), default] if is_plain_name(name) => Ok(Param {
                name: name.clone(),
                default: Some(default.clone()),
            }),
            _ => Err(Error::MalformedParameterSpec(format!(
                "unexpected optional parameter {form}"
            ))),
        },
        other => Err(Error::MalformedParameterSpec(format!(
            "parameter names must be symbols, got {other}"
        ))),
    }
}

fn resolve(source: Source, caller: &Environment, def_env: &Environment) -> EvalResult {
    match source {
        Source::Caller(form) => eval(&form, caller),
        Source::Definition(form) => eval(&form, def_env),
        Source::Given(value) => Ok(Outcome::Ready(value)),
        Source::CallerRest(forms) if forms.is_empty() => Ok(Outcome::Ready(nil())),
        Source::CallerRest(forms) => {
            let caller = caller.clone();
            Ok(traverse(forms, move |form| eval(&form, &caller))?.map(Value::from))
        }
    }
}

/// Build a procedure: a special form that binds its arguments per `spec`
/// and evaluates `body` in the new frame.
pub fn make_procedure(name: &str, spec: ParamSpec, def_env: &Environment, body: Forms) -> Callable {
    let def_env = def_env.clone();
    Callable::special_form(name, move |caller, args| {
        let body = body.clone();
        spec.bind(&def_env, caller, &args)?
            .chain(move |frame| eval_body(body, &frame))
    })
}
