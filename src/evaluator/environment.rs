use crate::Error;
use crate::ast::{Callable, Forms, Symbol, Value};
use crate::builtinops::Arity;
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation};
use crate::outcome::{EvalResult, Outcome};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// What `set!` does when no frame in the chain owns the target name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignPolicy {
    /// Create the binding in the outermost (global) frame
    #[default]
    CreateGlobal,
    /// Create the binding in the frame where the assignment ran
    CreateLocal,
    /// Reject the assignment as an unbound symbol
    DeclareFirst,
}

/// Interpreter-wide settings fixed when the root environment is built
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpreterConfig {
    pub assign_policy: AssignPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FrameKind {
    Root(AssignPolicy),
    Local,
    /// Synthetic caller frame for procedures invoked from host code
    Callback,
}

struct Frame {
    bindings: RefCell<HashMap<Symbol, Value>>,
    parent: Option<Environment>,
    kind: FrameKind,
}

/// A scope frame with an optional parent. Cloning shares the frame; closures
/// keep their definition frame alive for as long as they live.
#[derive(Clone)]
pub struct Environment(Rc<Frame>);

impl Environment {
    fn with_kind(parent: Option<Environment>, kind: FrameKind) -> Self {
        Environment(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent,
            kind,
        }))
    }

    /// A parentless root frame. The builtin catalog is installed by
    /// [`crate::evaluator::create_global_env`].
    pub fn new_root(config: InterpreterConfig) -> Self {
        Self::with_kind(None, FrameKind::Root(config.assign_policy))
    }

    pub fn child(&self) -> Self {
        Self::with_kind(Some(self.clone()), FrameKind::Local)
    }

    /// Caller frame used when host code invokes a language procedure.
    /// Forms "evaluated" in it are returned unchanged: they are already values.
    pub fn callback() -> Self {
        Self::with_kind(None, FrameKind::Callback)
    }

    pub fn is_callback(&self) -> bool {
        self.0.kind == FrameKind::Callback
    }

    pub fn parent(&self) -> Option<&Environment> {
        self.0.parent.as_ref()
    }

    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Resolve a symbol through the delegation chain
    pub fn lookup(&self, sym: &Symbol) -> Result<Value, Error> {
        self.find(sym)
            .ok_or_else(|| Error::UnboundSymbol(sym.name().to_owned()))
    }

    /// Look a name up from host code; `None` when no frame binds it
    pub fn get(&self, name: &str) -> Option<Value> {
        self.find(&Symbol::new(name))
    }

    fn find(&self, sym: &Symbol) -> Option<Value> {
        let mut frame = Some(self);
        while let Some(env) = frame {
            if let Some(value) = env.0.bindings.borrow().get(sym) {
                return Some(value.clone());
            }
            frame = env.parent();
        }
        None
    }

    /// Create or overwrite a binding in this frame only
    pub fn define(&self, sym: Symbol, value: Value) {
        self.0.bindings.borrow_mut().insert(sym, value);
    }

    pub fn owns(&self, sym: &Symbol) -> bool {
        self.0.bindings.borrow().contains_key(sym)
    }

    /// Update the nearest enclosing frame that owns `sym`. When no frame owns
    /// it, the root frame's [`AssignPolicy`] decides.
    pub fn assign(&self, sym: &Symbol, value: Value) -> Result<(), Error> {
        let mut frame = self;
        loop {
            if frame.owns(sym) {
                frame.define(sym.clone(), value);
                return Ok(());
            }
            match frame.parent() {
                Some(parent) => frame = parent,
                None => break,
            }
        }

        match frame.0.kind {
            FrameKind::Root(AssignPolicy::CreateGlobal) => {
                frame.define(sym.clone(), value);
                Ok(())
            }
            FrameKind::Root(AssignPolicy::CreateLocal) => {
                self.define(sym.clone(), value);
                Ok(())
            }
            _ => Err(Error::UnboundSymbol(sym.name().to_owned())),
        }
    }

    /// Register a host function working directly on evaluated arguments.
    ///
    /// ```
    /// use lispkit::{Environment, InterpreterConfig, Value, Error};
    /// use lispkit::evaluator::create_global_env;
    ///
    /// fn arg_count(args: &[Value]) -> Result<Value, Error> {
    ///     Ok(Value::from(args.len() as i64))
    /// }
    ///
    /// let env = create_global_env(InterpreterConfig::default());
    /// env.register_builtin_function("arg-count", arg_count);
    /// ```
    pub fn register_builtin_function(&self, name: &str, func: fn(&[Value]) -> Result<Value, Error>) {
        self.define(
            Symbol::new(name),
            Value::Callable(Callable::host(name, move |args| {
                func(&args).map(Outcome::Ready)
            })),
        );
    }

    /// Register a strongly-typed Rust function as a host function, with
    /// argument conversion and arity checking derived from its signature.
    ///
    /// Supported parameter types are `Value`, `Number` (coerced), `&str` and
    /// the list iterators in [`crate::evaluator`]. Return types may be any
    /// plain value type, `Result<_, Error>` of one, or an [`EvalResult`] for
    /// functions that can suspend.
    pub fn register_builtin_operation<F, Args>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args> + 'static,
    {
        let func = func.into_operation();
        self.define(
            Symbol::new(name),
            Value::Callable(Callable::Host {
                name: Rc::from(name),
                func,
                procedure: None,
            }),
        );
    }

    /// Register a host function whose last Rust parameter takes all remaining
    /// arguments. `arity` validates the total argument count.
    pub fn register_variadic_builtin_operation<F, Args>(&self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args> + 'static,
    {
        let inner = func.into_variadic_operation();
        self.define(
            Symbol::new(name),
            Value::Callable(Callable::host(name, move |args: Vec<Value>| {
                arity.validate(args.len())?;
                inner(args)
            })),
        );
    }

    /// Register a user-defined control form receiving unevaluated arguments
    pub fn register_special_form<F>(&self, name: &str, func: F)
    where
        F: Fn(&Environment, Forms) -> EvalResult + 'static,
    {
        self.define(Symbol::new(name), Value::Callable(Callable::special_form(name, func)));
    }

    /// All bindings visible from this frame, inner frames shadowing outer ones,
    /// sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut chain = Vec::new();
        let mut frame = Some(self);
        while let Some(env) = frame {
            chain.push(env);
            frame = env.parent();
        }

        let mut bindings = HashMap::new();
        for env in chain.into_iter().rev() {
            for (sym, value) in env.0.bindings.borrow().iter() {
                bindings.insert(sym.name().to_owned(), value.clone());
            }
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .0
            .bindings
            .borrow()
            .keys()
            .map(|s| s.name().to_owned())
            .collect();
        names.sort();
        f.debug_struct("Environment")
            .field("kind", &self.0.kind)
            .field("bindings", &names)
            .field("has_parent", &self.0.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::val;

    fn root(policy: AssignPolicy) -> Environment {
        Environment::new_root(InterpreterConfig {
            assign_policy: policy,
        })
    }

    #[test]
    fn test_lookup_walks_parents() {
        let global = root(AssignPolicy::default());
        global.define(Symbol::new("x"), val(1));
        let inner = global.child().child();
        assert_eq!(inner.lookup(&Symbol::new("x")).unwrap(), val(1));

        inner.define(Symbol::new("x"), val(2));
        assert_eq!(inner.lookup(&Symbol::new("x")).unwrap(), val(2));
        assert_eq!(global.lookup(&Symbol::new("x")).unwrap(), val(1));

        assert_eq!(
            inner.lookup(&Symbol::new("missing")),
            Err(Error::UnboundSymbol("missing".into()))
        );
    }

    #[test]
    fn test_assign_updates_nearest_owner() {
        let global = root(AssignPolicy::default());
        global.define(Symbol::new("x"), val(1));
        let middle = global.child();
        middle.define(Symbol::new("x"), val(10));
        let inner = middle.child();

        inner.assign(&Symbol::new("x"), val(11)).unwrap();
        assert_eq!(middle.lookup(&Symbol::new("x")).unwrap(), val(11));
        assert_eq!(global.lookup(&Symbol::new("x")).unwrap(), val(1));
        assert!(!inner.owns(&Symbol::new("x")));
    }

    #[test]
    fn test_assign_fallback_policies() {
        let y = Symbol::new("y");

        let global = root(AssignPolicy::CreateGlobal);
        let inner = global.child().child();
        inner.assign(&y, val(5)).unwrap();
        assert!(global.owns(&y));
        assert!(!inner.owns(&y));

        let global = root(AssignPolicy::CreateLocal);
        let inner = global.child().child();
        inner.assign(&y, val(5)).unwrap();
        assert!(inner.owns(&y));
        assert!(!global.owns(&y));

        let global = root(AssignPolicy::DeclareFirst);
        let inner = global.child();
        assert_eq!(
            inner.assign(&y, val(5)),
            Err(Error::UnboundSymbol("y".into()))
        );
    }

    #[test]
    fn test_callback_frame_is_detached() {
        let frame = Environment::callback();
        assert!(frame.is_callback());
        assert!(frame.parent().is_none());
        assert!(frame.assign(&Symbol::new("z"), val(1)).is_err());
        assert!(!root(AssignPolicy::default()).is_callback());
    }

    #[test]
    fn test_get_all_bindings_shadowing() {
        let global = root(AssignPolicy::default());
        global.define(Symbol::new("a"), val(1));
        global.define(Symbol::new("b"), val(2));
        let inner = global.child();
        inner.define(Symbol::new("a"), val(3));

        assert_eq!(
            inner.get_all_bindings(),
            vec![("a".to_owned(), val(3)), ("b".to_owned(), val(2))]
        );
    }
}
