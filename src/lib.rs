//! Lark is a small dynamically-typed expression-oriented scripting
//! language with first-class closures, tuples, and a
//! reference-counted object model.
//!
//! The pipeline, mirroring the compiler/vm split of larger language
//! implementations even though Lark has no bytecode stage of its own:
//!
//! 1. [`compiler::lex`] turns source text into a token stream.
//! 2. [`compiler::parse`] turns tokens into an AST, running capture
//!    analysis for closures as it goes.
//! 3. [`vm::eval`] walks the AST directly against a
//!    [`construct::env::Env`], Lark's reference-counted environment.
//!
//! A [`compiler::Syntax`] error can come from step 1 or 2; a
//! [`vm::RuntimeError`] only from step 3.

pub mod common;
pub mod compiler;
pub mod construct;
pub mod core;
pub mod vm;

use std::rc::Rc;

use common::source::Source;
use compiler::{lex::Lexer, parse::Parser};
use construct::env::Env;
use vm::error::RuntimeError;

/// Either half of the pipeline can fail; this is the error type
/// `run_source` and the REPL report to the user.
#[derive(Debug)]
pub enum LarkError {
    Syntax(compiler::Syntax),
    Runtime(RuntimeError),
}

impl std::fmt::Display for LarkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LarkError::Syntax(e) => write!(f, "{}", e),
            LarkError::Runtime(e) => write!(f, "{}", e),
        }
    }
}

impl From<compiler::Syntax> for LarkError {
    fn from(e: compiler::Syntax) -> LarkError {
        LarkError::Syntax(e)
    }
}

impl From<RuntimeError> for LarkError {
    fn from(e: RuntimeError) -> LarkError {
        LarkError::Runtime(e)
    }
}

/// Builds a fresh root environment with the builtin function table
/// installed — the environment every standalone script or REPL
/// session starts from.
pub fn root_env() -> Env {
    let env = Env::root();
    core::builtins::install(&env);
    env
}

/// Lexes, parses, and evaluates `source` against `env` in one shot.
/// Intended for one-off scripts; a REPL instead keeps `env` around
/// and calls this (or its piece parts) once per line.
pub fn run_source(source: Rc<Source>, env: &Env) -> Result<common::Value, LarkError> {
    let tokens = Lexer::lex(source)?;
    let ast = Parser::parse(tokens)?;
    Ok(vm::run(&ast, env)?)
}
