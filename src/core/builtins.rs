use std::io::Write;
use std::rc::Rc;

use log::debug;

use crate::common::closure::{Arg, Body, Param, Pval};
use crate::common::data::Value;
use crate::common::span::Span;
use crate::construct::env::Env;
use crate::vm::error::{RuntimeError, RuntimeErrorKind};

/// Writes one line of program output. Goes to the environment's
/// installed sink when one is present (how tests capture stdout
/// without a subprocess), falling back to the process's real stdout
/// for a normal script run or REPL session.
fn write_line(env: &Env, text: &str) {
    match env.output() {
        Some(sink) => {
            let _ = writeln!(sink.borrow_mut(), "{}", text);
        },
        None => println!("{}", text),
    }
}

fn arg_values(env: &Env, args: &[Arg], span: &Span) -> Result<Vec<Value>, RuntimeError> {
    args.iter()
        .map(|a| match a {
            Arg::Value(v) => Ok(v.clone()),
            Arg::Ref(r) => env.read(r, span),
        })
        .collect()
}

fn native(env: &Env, name: &str, params: &[&str], f: impl Fn(&Env, &[Value], &Span) -> Result<Value, RuntimeError> + 'static) {
    let params: Vec<Param> = params.iter().map(|p| Param { name: p.to_string(), by_ref: false }).collect();
    let body = Body::Native(Rc::new(move |env: &Env, args: &[Arg], span: &Span| {
        let values = arg_values(env, args, span)?;
        f(env, &values, span)
    }));
    let pval = Pval::new(params, env.clone(), vec![], body);
    env.new_assign(name, Value::Pval(Rc::new(pval)), &Span::empty())
        .expect("builtin names must not collide with each other");
}

/// Installs the builtin function table into the root environment.
/// Mirrors the host-function registration Passerine does for `print`
/// and `println`, extended with the small set of builtins Lark
/// programs rely on for introspection (`type`, `len`) and explicit
/// output flushing.
pub fn install(env: &Env) {
    native(env, "print", &["value"], |env, args, _| {
        write_line(env, &args[0].string_form());
        Ok(Value::Nil)
    });

    native(env, "println", &["value"], |env, args, _| {
        write_line(env, &args[0].string_form());
        Ok(Value::Nil)
    });

    native(env, "copy", &["value"], |_, args, _| Ok(args[0].deep_copy()));

    native(env, "type", &["value"], |_, args, _| Ok(Value::String(Rc::from(args[0].type_tag()))));

    native(env, "len", &["value"], |_, args, span| Ok(Value::Int(args[0].length(span)? as i64)));

    native(env, "string", &["value"], |_, args, _| Ok(Value::String(Rc::from(args[0].string_form()))));

    native(env, "int", &["value"], |_, args, span| match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => Ok(Value::Int(*f as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| RuntimeError::new(RuntimeErrorKind::UndefinedOp { op: "int".to_string(), ty: "string" }, span.clone())),
        other => Err(RuntimeError::new(RuntimeErrorKind::UndefinedOp { op: "int".to_string(), ty: other.type_tag() }, span.clone())),
    });

    native(env, "float", &["value"], |_, args, span| match &args[0] {
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| RuntimeError::new(RuntimeErrorKind::UndefinedOp { op: "float".to_string(), ty: "string" }, span.clone())),
        other => Err(RuntimeError::new(RuntimeErrorKind::UndefinedOp { op: "float".to_string(), ty: other.type_tag() }, span.clone())),
    });

    debug!("installed builtins into root environment");
}
