use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::common::closure::{Arg, Body, Param, Pval};
use crate::common::data::{Tuple, Value};
use crate::common::source::Source;
use crate::common::span::{Span, Spanned};
use crate::compiler::lex::Lexer;
use crate::compiler::parse::Parser;
use crate::construct::env::Env;
use crate::construct::tree::{AssignTarget, BinOp, CallArg, DotKey, Expr, ExternKind, LabelExpr, TupleElem, UnOp};
use crate::vm::error::{RuntimeError, RuntimeErrorKind};
use crate::vm::exit::Exit;

/// Everything that can unwind out of evaluating an expression: either
/// a genuine error, or a structured non-local exit waiting to be
/// caught by an enclosing loop or closure call.
enum Signal {
    Error(RuntimeError),
    Exit(Exit),
}

impl From<RuntimeError> for Signal {
    fn from(e: RuntimeError) -> Signal {
        Signal::Error(e)
    }
}

impl From<Exit> for Signal {
    fn from(e: Exit) -> Signal {
        Signal::Exit(e)
    }
}

type Flow = Result<Value, Signal>;

/// Evaluates a whole program (or REPL line) to completion, converting
/// any `break`/`continue`/`return` that escapes every binder into a
/// runtime error — at the top level there is no loop or closure left
/// to catch it.
pub fn run(expr: &Spanned<Expr>, env: &Env) -> Result<Value, RuntimeError> {
    // The top-level program runs directly in `env` rather than
    // through a spawned-and-cleaned-up child scope, the way every
    // other statement list does — a REPL evaluates one line per call
    // to `run` and relies on bindings surviving from one line to the
    // next.
    match eval_stmts(block_stmts(expr), env) {
        Ok(v) => Ok(v),
        Err(Signal::Error(e)) => Err(e),
        Err(Signal::Exit(Exit::Return(_))) => {
            Err(RuntimeError::new(RuntimeErrorKind::Internal("'return' outside of a closure".to_string()), expr.span.clone()))
        },
        Err(Signal::Exit(Exit::Break)) => {
            Err(RuntimeError::new(RuntimeErrorKind::Internal("'break' outside of a loop".to_string()), expr.span.clone()))
        },
        Err(Signal::Exit(Exit::Continue)) => {
            Err(RuntimeError::new(RuntimeErrorKind::Internal("'continue' outside of a loop".to_string()), expr.span.clone()))
        },
    }
}

/// Invokes a closure: binds arguments into a fresh frame off the
/// closure's defining environment (not the caller's), runs the body,
/// and catches a `return` there. A `break`/`continue` that escapes the
/// whole body without passing through a `loop` is a bug in the calling
/// convention's assumptions about structured control flow, reported
/// as an error rather than silently swallowed.
pub fn call_pval(pval: &Rc<Pval>, args: &[Arg], span: &Span) -> Result<Value, RuntimeError> {
    if args.len() != pval.params.len() {
        return Err(RuntimeError::new(
            RuntimeErrorKind::Arity { expected: pval.params.len(), got: args.len() },
            span.clone(),
        ));
    }

    let call_env = pval.defining_env.child();
    for (param, arg) in pval.params.iter().zip(args.iter()) {
        match (param.by_ref, arg) {
            (true, Arg::Ref(r)) => call_env.bind_ref(&param.name, r.clone()),
            (false, Arg::Value(v)) => {
                call_env.new_assign(&param.name, v.clone(), span)?;
            },
            (true, Arg::Value(_)) | (false, Arg::Ref(_)) => {
                return Err(RuntimeError::new(RuntimeErrorKind::RefTypeMismatch, span.clone()));
            },
        }
    }

    let result = match &pval.body {
        Body::Ast(body) => eval_stmts(body, &call_env),
        Body::Native(f) => f(&call_env, args, span).map_err(Signal::from),
    };
    call_env.cleanup();

    match result {
        Ok(v) => Ok(v),
        Err(Signal::Exit(Exit::Return(v))) => Ok(v),
        Err(Signal::Exit(Exit::Break)) => {
            Err(RuntimeError::new(RuntimeErrorKind::Internal("'break' outside of a loop".to_string()), span.clone()))
        },
        Err(Signal::Exit(Exit::Continue)) => {
            Err(RuntimeError::new(RuntimeErrorKind::Internal("'continue' outside of a loop".to_string()), span.clone()))
        },
        Err(Signal::Error(e)) => Err(e.push_frame(span.clone())),
    }
}

fn block_stmts(expr: &Spanned<Expr>) -> &[Spanned<Expr>] {
    match &expr.item {
        Expr::Block(stmts) | Expr::Group(stmts) => stmts,
        _ => std::slice::from_ref(expr),
    }
}

/// Evaluates a statement list directly in `env`, without spawning a
/// child scope of its own — used for closure bodies, `if`/`loop`
/// bodies, namespace bodies, and parenthesized groups, all of which
/// land their bindings in the frame the caller already prepared.
fn eval_stmts(stmts: &[Spanned<Expr>], env: &Env) -> Flow {
    let mut last = Value::Nil;
    for stmt in stmts {
        last = eval(stmt, env)?;
    }
    Ok(last)
}

/// `if`/`elif` branch conditions use strict equality with `true`: a
/// truthy-but-not-literally-`true` value (e.g. a nonzero int) does not
/// fire the branch. This is deliberately stricter than `!`'s general
/// falsy check and `loop`'s not-quite-`false` check — three distinct
/// truthiness rules coexist in the language.
fn is_strictly_true(v: &Value) -> bool {
    matches!(v, Value::Bool(true))
}

fn eval(expr: &Spanned<Expr>, env: &Env) -> Flow {
    let span = &expr.span;
    match &expr.item {
        Expr::Nil => Ok(Value::Nil),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Float(n) => Ok(Value::Float(*n)),
        Expr::String(s) => Ok(Value::String(Rc::from(s.as_str()))),

        // A bare identifier is an *evaluation*: read the ref, then
        // invoke the value with zero arguments. Invocation is a no-op
        // for anything but a zero-parameter closure, so this amounts
        // to a plain read except when `name` holds a thunk. The one
        // place this auto-invoke is skipped is when this same node is
        // the callee of `Expr::Call`, handled there directly.
        Expr::Ident(name) => {
            let r = env.get_ref(name, span)?;
            let v = env.read(&r, span)?;
            Ok(v.invoke(&[], span)?)
        },

        Expr::Tuple(elems) => eval_tuple(elems, env, span),

        // The top-level program and closure bodies run directly in
        // the enclosing scope — no fresh `Env` is spawned for a block.
        Expr::Block(stmts) => eval_stmts(stmts, env),

        // A parenthesized sub-program, identical in evaluation to
        // `Block`: it runs in the *current* scope, not a child one.
        // Only a closure call introduces a fresh, torn-down-on-exit
        // frame.
        Expr::Group(stmts) => eval_stmts(stmts, env),

        Expr::Cond { arms, else_body } => {
            for arm in arms {
                if is_strictly_true(&eval(&arm.cond, env)?) {
                    return eval_stmts(&arm.body, env);
                }
            }
            match else_body {
                Some(body) => eval_stmts(body, env),
                None => Ok(Value::Nil),
            }
        },

        // A true while-loop: the condition is re-evaluated before
        // every iteration, and continues for as long as it isn't
        // exactly `false` — looser than `if`'s strict-`true` check.
        Expr::Loop { cond, body } => {
            while eval(cond, env)? != Value::Bool(false) {
                match eval_stmts(body, env) {
                    Ok(_) => continue,
                    Err(Signal::Exit(Exit::Break)) => break,
                    Err(Signal::Exit(Exit::Continue)) => continue,
                    Err(other) => return Err(other),
                }
            }
            Ok(Value::Nil)
        },

        Expr::Break => Err(Signal::from(Exit::Break)),
        Expr::Continue => Err(Signal::from(Exit::Continue)),
        Expr::Return(value) => {
            let v = match value {
                Some(e) => eval(e, env)?,
                None => Value::Nil,
            };
            Err(Signal::from(Exit::Return(v)))
        },

        // For a plain `name = ...` target, the local slot is reserved
        // *before* the right-hand side is evaluated. This is what
        // lets a closure assigned to a name refer to that same name
        // recursively: the closure expression captures a `Ref` to the
        // (momentarily nil) slot, and by the time the closure is
        // actually called, the slot holds the closure itself.
        Expr::Assign { target: AssignTarget::Ident(name), value } => {
            let r = env.get_or_make_local(name, span)?;
            let v = eval(value, env)?;
            env.assign(&r, v.clone(), span)?;
            Ok(v)
        },

        Expr::Assign { target, value } => {
            let v = eval(value, env)?;
            assign_target(target, v.clone(), env, span)?;
            Ok(v)
        },

        Expr::UpvalAssign { name, value } => {
            let v = eval(value, env)?;
            let parent = env.parent().ok_or_else(|| RuntimeError::new(RuntimeErrorKind::NoParent, span.clone()))?;
            let r = parent.get_ref(name, span)?;
            env.assign(&r, v.clone(), span)?;
            Ok(v)
        },

        Expr::OpAssign { op, target, value } => {
            let rhs = eval(value, env)?;
            let current = read_assign_target(target, env, span)?;
            let updated = apply_binop(*op, &current, &rhs, span)?;
            assign_target(target, updated.clone(), env, span)?;
            Ok(updated)
        },

        Expr::BinOp { op, lhs, rhs } => {
            let l = eval(lhs, env)?;
            let r = eval(rhs, env)?;
            Ok(apply_binop(*op, &l, &r, span)?)
        },

        Expr::UnOp { op, operand } => {
            let v = eval(operand, env)?;
            match op {
                UnOp::Not => Ok(Value::Bool(v.is_falsy())),
                UnOp::Neg => match v {
                    Value::Int(i) => Ok(Value::Int(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(RuntimeError::new(
                        RuntimeErrorKind::UndefinedOp { op: "-".to_string(), ty: other.type_tag() },
                        span.clone(),
                    )
                    .into()),
                },
            }
        },

        // A call whose callee is syntactically a bare identifier
        // skips that identifier's usual zero-argument auto-invoke: the
        // ref is read once and the explicit argument list applied
        // directly, so `f[x]` calls `f` with `x`, not `f()[x]`.
        Expr::Call { callee, args } => {
            let callee_val = match &callee.item {
                Expr::Ident(name) => {
                    let r = env.get_ref(name, span)?;
                    env.read(&r, span)?
                },
                _ => eval(callee, env)?,
            };
            let mut evaluated = Vec::with_capacity(args.len());
            for arg in args {
                match arg {
                    CallArg::Value(e) => evaluated.push(Arg::Value(eval(e, env)?)),
                    CallArg::Ref(name) => {
                        let r = env.get_ref(name, span)?;
                        evaluated.push(Arg::Ref(r));
                    },
                }
            }
            Ok(callee_val.invoke(&evaluated, span)?)
        },

        Expr::Closure { params, body, captures } => {
            let mut captured_refs = Vec::with_capacity(captures.len());
            for name in captures {
                captured_refs.push(env.get_ref(name, span)?);
            }
            let params: Vec<Param> = params.iter().map(|p| Param { name: p.name.clone(), by_ref: p.by_ref }).collect();
            let pval = Pval::new(params, env.clone(), captured_refs, Body::Ast(Rc::new(body.clone())));
            Ok(Value::Pval(Rc::new(pval)))
        },

        Expr::DotAccess { target, key } => {
            let v = eval(target, env)?;
            Ok(resolve_dot(&v, key, env, span)?)
        },

        Expr::Namespace { name, body } => {
            let ns = env.get_or_create_ns(name);
            eval_stmts(body, &ns)?;
            Ok(Value::Nil)
        },

        Expr::Import { path } => import_module(path, env, span),

        Expr::Extern(ExternKind::Expr(source)) => {
            let host = env
                .host()
                .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::Internal("no host adapter is attached to this program".to_string()), span.clone()))?;
            Ok(host.eval_expression(source, span)?)
        },

        Expr::Extern(ExternKind::Block(source)) => {
            let host = env
                .host()
                .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::Internal("no host adapter is attached to this program".to_string()), span.clone()))?;
            Ok(host.exec_block(source, span)?)
        },
    }
}

fn assign_target(target: &AssignTarget, value: Value, env: &Env, span: &Span) -> Result<(), RuntimeError> {
    match target {
        AssignTarget::Ident(name) => {
            let r = env.get_or_make_local(name, span)?;
            env.assign(&r, value, span)
        },
        AssignTarget::Member { target, key } => {
            let base = eval(target, env).map_err(flatten_error)?;
            match key {
                DotKey::Index(i) => base.set_index(*i, value, span),
                DotKey::Name(name) => base.set_member(name, value, span),
                DotKey::Computed(inner) => {
                    let k = eval(inner, env).map_err(flatten_error)?;
                    set_computed(&base, &k, value, span)
                },
            }
        },
    }
}

/// Reads the current value of an assignment target, for `+=`/`-=`/
/// `*=`/`/=`'s read-modify-write.
fn read_assign_target(target: &AssignTarget, env: &Env, span: &Span) -> Result<Value, RuntimeError> {
    match target {
        AssignTarget::Ident(name) => {
            let r = env.get_ref(name, span)?;
            env.read(&r, span)
        },
        AssignTarget::Member { target, key } => {
            let base = eval(target, env).map_err(flatten_error)?;
            resolve_dot(&base, key, env, span)
        },
    }
}

/// `eval` inside a setter needs to surface a plain `RuntimeError`, but
/// an evaluated sub-expression could in principle carry a stray exit
/// signal (e.g. a `break` buried in a dot-access target) — treat that
/// as the same "escaped a binder" error the top level would raise.
fn flatten_error(signal: Signal) -> RuntimeError {
    match signal {
        Signal::Error(e) => e,
        Signal::Exit(_) => RuntimeError::new(RuntimeErrorKind::Internal("control flow escaped an expression".to_string()), Span::empty()),
    }
}

fn resolve_dot(base: &Value, key: &DotKey, env: &Env, span: &Span) -> Result<Value, RuntimeError> {
    match key {
        DotKey::Index(i) => base.get_index(*i, span),
        DotKey::Name(name) => base.get_member(name, span),
        DotKey::Computed(inner) => {
            let k = eval(inner, env).map_err(flatten_error)?;
            match k {
                Value::Int(i) => base.get_index(i, span),
                other => base.get_member(&other.string_form(), span),
            }
        },
    }
}

fn set_computed(base: &Value, key: &Value, value: Value, span: &Span) -> Result<(), RuntimeError> {
    match key {
        Value::Int(i) => base.set_index(*i, value, span),
        other => base.set_member(&other.string_form(), value, span),
    }
}

fn eval_tuple(elems: &[TupleElem], env: &Env, span: &Span) -> Flow {
    let mut tuple = Tuple::new();
    for elem in elems {
        match elem {
            TupleElem::Positional(e) => tuple.positional.push(eval(e, env)?),
            TupleElem::Named { label, value } => {
                let key = match label {
                    LabelExpr::Ident(name) => name.clone(),
                    LabelExpr::Computed(e) => eval(e, env)?.string_form(),
                };
                let v = eval(value, env)?;
                if tuple.named.insert(key.clone(), v).is_some() {
                    return Err(RuntimeError::new(RuntimeErrorKind::DuplicateLabel(key), span.clone()).into());
                }
            },
        }
    }
    Ok(Value::tuple(tuple))
}

fn apply_binop(op: BinOp, l: &Value, r: &Value, span: &Span) -> Result<Value, RuntimeError> {
    Ok(match op {
        BinOp::Add => l.add(r, span)?,
        BinOp::Sub => l.sub(r, span)?,
        BinOp::Mul => l.mul(r, span)?,
        BinOp::Div => l.div(r, span)?,
        BinOp::Mod => l.modulo(r, span)?,
        BinOp::Eq => Value::Bool(l.equals(r)),
        BinOp::NotEq => Value::Bool(!l.equals(r)),
        BinOp::Lt => Value::Bool(l.compare(r, span)?.is_lt()),
        BinOp::LtEq => Value::Bool(l.compare(r, span)?.is_le()),
        BinOp::Gt => Value::Bool(l.compare(r, span)?.is_gt()),
        BinOp::GtEq => Value::Bool(l.compare(r, span)?.is_ge()),
    })
}

/// Resolves a `ns1::ns2::name` import path to a file on disk, trying
/// each of Lark's three recognized source extensions, then the bare
/// path itself.
fn resolve_import_path(path: &str) -> Option<PathBuf> {
    let relative = path.replace("::", "/");
    for ext in ["lk", "lrk", "lark"] {
        let candidate = PathBuf::from(format!("{}.{}", relative, ext));
        if candidate.exists() {
            return Some(candidate);
        }
    }
    let bare = PathBuf::from(&relative);
    if bare.exists() {
        return Some(bare);
    }
    None
}

fn import_module(path: &str, env: &Env, span: &Span) -> Flow {
    let file = resolve_import_path(path).ok_or_else(|| RuntimeError::new(RuntimeErrorKind::ImportNotFound(path.to_string()), span.clone()))?;
    let source = Source::path(Path::new(&file))
        .map_err(|e| RuntimeError::new(RuntimeErrorKind::Internal(format!("could not read '{}': {}", file.display(), e)), span.clone()))?;

    let tokens = Lexer::lex(source).map_err(|e| RuntimeError::new(RuntimeErrorKind::Internal(e.to_string()), span.clone()))?;
    let ast = Parser::parse(tokens).map_err(|e| RuntimeError::new(RuntimeErrorKind::Internal(e.to_string()), span.clone()))?;

    let module_name = path.rsplit("::").next().unwrap_or(path);
    let ns = env.get_or_create_ns(module_name);
    eval_stmts(block_stmts(&ast), &ns)?;
    Ok(Value::Nil)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::builtins;

    fn eval_source(src: &str) -> Result<Value, RuntimeError> {
        let source = Source::source(src);
        let tokens = Lexer::lex(source).unwrap();
        let ast = Parser::parse(tokens).unwrap();
        let env = Env::root();
        builtins::install(&env);
        run(&ast, &env)
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval_source("1 + 2 * 3").unwrap(), Value::Int(7));
    }

    #[test]
    fn if_else() {
        assert_eq!(eval_source("if false 1 else 2 end").unwrap(), Value::Int(2));
    }

    #[test]
    fn elif_chain() {
        assert_eq!(
            eval_source(
                r#"
                n = 2
                if n == 1 10
                elif n == 2 20
                elif n == 3 30
                else 40
                end
                "#
            )
            .unwrap(),
            Value::Int(20)
        );
    }

    #[test]
    fn if_condition_requires_strict_true() {
        // 1 is truthy for `!` but an `if` only fires on exactly `true`.
        assert_eq!(eval_source("if 1 10 else 20 end").unwrap(), Value::Int(20));
    }

    #[test]
    fn closures_are_values_not_named_bindings() {
        let result = eval_source(
            r#"
            make_adder = [n]{
                [x]{x + n}
            }
            add5 = make_adder[5]
            add5[10]
            "#,
        )
        .unwrap();
        assert_eq!(result, Value::Int(15));
    }

    #[test]
    fn recursive_closure_self_reference() {
        let result = eval_source(
            r#"
            fact = [n]{
                if n <= 1 then 1
                else n * fact[n - 1]
                end
            }
            fact[5]
            "#,
        )
        .unwrap();
        assert_eq!(result, Value::Int(120));
    }

    #[test]
    fn loop_break_returns_value_from_enclosing_expr() {
        let result = eval_source(
            r#"
            i = 0
            loop true
                i = i + 1
                if i == 3 then break end
            end
            i
            "#,
        )
        .unwrap();
        assert_eq!(result, Value::Int(3));
    }

    #[test]
    fn loop_continues_while_not_exactly_false() {
        // the condition only needs to avoid `false`, unlike `if`'s
        // strict-`true` requirement
        let result = eval_source(
            r#"
            i = 0
            loop 1
                i = i + 1
                if i >= 3 then break end
            end
            i
            "#,
        )
        .unwrap();
        assert_eq!(result, Value::Int(3));
    }

    #[test]
    fn upvalue_assignment_writes_through() {
        let result = eval_source(
            r#"
            counter = 0
            incr = {^counter = counter + 1}
            incr[]
            incr[]
            counter
            "#,
        )
        .unwrap();
        assert_eq!(result, Value::Int(2));
    }

    #[test]
    fn compound_assignment() {
        let result = eval_source("x = 10; x += 5; x -= 2; x *= 2; x /= 3; x").unwrap();
        assert_eq!(result, Value::Int(8));
    }

    #[test]
    fn tuple_equality_and_dot_access() {
        let result = eval_source("t = (1, 2, x: 3); t.0 + t.x").unwrap();
        assert_eq!(result, Value::Int(4));
    }

    #[test]
    fn bare_identifier_auto_invokes_zero_arg_closure() {
        // a bare reference to a zero-parameter closure calls it
        let result = eval_source("thunk = {5}; thunk").unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn division_by_zero_reports_error() {
        assert!(eval_source("1 / 0").is_err());
    }

    #[test]
    fn no_heap_leak_after_scope_exit() {
        let env = Env::root();
        let source = Source::source("(x = 1; y = 2)");
        let tokens = Lexer::lex(source).unwrap();
        let ast = Parser::parse(tokens).unwrap();
        run(&ast, &env).unwrap();
        assert_eq!(env.live_slots(), 0);
    }
}
