use std::{fmt, rc::Rc};

use crate::common::data::Value;
use crate::common::span::Spanned;
use crate::construct::env::{Env, Ref};
use crate::construct::tree::Expr;
use crate::vm::error::RuntimeError;

/// A single formal parameter: a name, and whether the argument is
/// bound by reference (`&name`) rather than by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub by_ref: bool,
}

/// An argument as prepared by the evaluator at a call site: either an
/// already-evaluated value, or — for a `&`-parameter slot — the
/// caller's own `Ref`, so the callee aliases the caller's slot rather
/// than a copy of it.
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Ref(Ref),
}

/// A native function is any host-provided or builtin implementation;
/// it receives the call's environment (for builtins that need to
/// allocate, such as `import`), its evaluated arguments, and the call
/// site's span for error reporting.
pub type NativeFn = dyn Fn(&Env, &[Arg], &crate::common::span::Span) -> Result<Value, RuntimeError>;

/// The body of a parameterized value: either source code, or a
/// builtin implemented directly in the host language.
#[derive(Clone)]
pub enum Body {
    Ast(Rc<Vec<Spanned<Expr>>>),
    Native(Rc<NativeFn>),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Ast(_) => write!(f, "Body::Ast(..)"),
            Body::Native(_) => write!(f, "Body::Native(..)"),
        }
    }
}

/// A parameterized value — Lark's only callable, covering both
/// user-written closures and builtins. Every `Pval` closes over the
/// environment it was defined in and holds a `Ref` to each name it
/// captures from enclosing scopes, so those slots stay alive for as
/// long as the closure does.
///
/// Deliberately not `Clone`: a `Pval` is always shared as `Rc<Pval>`
/// (see [`Value::Pval`](crate::common::data::Value::Pval)), since
/// duplicating the struct itself would duplicate its `Drop`-time
/// decrement of every captured ref without a matching increment.
#[derive(Debug)]
pub struct Pval {
    pub params: Vec<Param>,
    pub defining_env: Env,
    pub captured: Vec<Ref>,
    pub body: Body,
}

impl Pval {
    /// Builds a new closure, incrementing the refcount of everything
    /// it captures. The matching decrement happens in `Drop`, not per
    /// call — a closure's captures stay alive for its whole lifetime,
    /// independent of how many times it's invoked.
    pub fn new(params: Vec<Param>, defining_env: Env, captured: Vec<Ref>, body: Body) -> Pval {
        for r in &captured {
            defining_env.incref(r);
        }
        Pval { params, defining_env, captured, body }
    }

    /// Mirrors `core.py`'s `ParamVal.as_str`: `pval[a, b]` names its
    /// parameters positionally since closures carry no name of their
    /// own — only the variable (if any) they happen to be bound to.
    pub fn as_str(&self) -> String {
        let names: Vec<&str> = self.params.iter().map(|p| p.name.as_str()).collect();
        format!("pval[{}]", names.join(", "))
    }
}

impl Drop for Pval {
    fn drop(&mut self) {
        for r in &self.captured {
            self.defining_env.decref(r);
        }
    }
}

impl PartialEq for Pval {
    /// Closures compare by identity: two separately-constructed
    /// closures are never equal, even if they'd behave identically.
    /// Equality on a `Pval` is really only meaningful when both sides
    /// are clones of the same `Rc`.
    fn eq(&self, other: &Pval) -> bool {
        std::ptr::eq(self, other)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::source::Source;

    fn span() -> Span {
        let source = Source::source("x");
        crate::common::span::Span::new(&source, 0, 1)
    }

    fn noop_body() -> Body {
        Body::Native(Rc::new(|_: &Env, _: &[Arg], _: &crate::common::span::Span| Ok(Value::Nil)))
    }

    #[test]
    fn construction_increments_captured_refcount() {
        let env = Env::root();
        let r = env.new_assign("x", Value::Int(1), &span()).unwrap();
        assert_eq!(env.live_slots(), 1);

        let pval = Pval::new(vec![], env.clone(), vec![r.clone()], noop_body());
        // one for the local binding, one for the closure's capture
        env.decref(&r);
        assert_eq!(env.live_slots(), 1);

        drop(pval);
    }

    #[test]
    fn drop_decrements_captured_refcount_back_down() {
        let env = Env::root();
        let r = env.new_assign("x", Value::Int(1), &span()).unwrap();

        let pval = Pval::new(vec![], env.clone(), vec![r.clone()], noop_body());
        drop(pval);

        // only the original local binding's increment remains
        env.decref(&r);
        assert_eq!(env.live_slots(), 0);
    }

    #[test]
    fn multiple_calls_dont_further_change_captured_refcount() {
        let env = Env::root();
        let r = env.new_assign("x", Value::Int(1), &span()).unwrap();

        let pval = Rc::new(Pval::new(vec![], env.clone(), vec![r.clone()], noop_body()));
        for _ in 0..5 {
            crate::vm::eval::call_pval(&pval, &[], &span()).unwrap();
        }

        drop(pval);
        env.decref(&r);
        assert_eq!(env.live_slots(), 0);
    }
}
