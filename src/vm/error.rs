use std::fmt;

use crate::common::span::Span;

/// The kinds of runtime failure the evaluator can raise, per the
/// error table in the language specification. `Return`/`Break`/
/// `Continue` are not represented here — they are structured
/// non-local exits, see [`crate::vm::exit::Exit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    NameUnbound(String),
    NameRedefined(String),
    Arity { expected: usize, got: usize },
    RefTypeMismatch,
    UndefinedOp { op: String, ty: &'static str },
    DotAccessRange(i64),
    DotAccessMissing(String),
    NoDotAccess(&'static str),
    ImmutableString,
    DuplicateLabel(String),
    NoParent,
    ImportNotFound(String),
    DivisionByZero,
    Internal(String),
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeErrorKind::NameUnbound(name) => write!(f, "could not find variable '{}'", name),
            RuntimeErrorKind::NameRedefined(name) => write!(f, "variable '{}' already defined in this scope", name),
            RuntimeErrorKind::Arity { expected, got } => {
                write!(f, "wrong number of parameters: expected {}, got {}", expected, got)
            },
            RuntimeErrorKind::RefTypeMismatch => write!(f, "expected a reference parameter to be passed a reference"),
            RuntimeErrorKind::UndefinedOp { op, ty } => write!(f, "operator '{}' is not defined for {}", op, ty),
            RuntimeErrorKind::DotAccessRange(i) => write!(f, "dot-access index {} is out of range", i),
            RuntimeErrorKind::DotAccessMissing(key) => write!(f, "dot-access member '{}' not in tuple", key),
            RuntimeErrorKind::NoDotAccess(ty) => write!(f, "no dot-access for value of type '{}'", ty),
            RuntimeErrorKind::ImmutableString => write!(f, "strings are immutable"),
            RuntimeErrorKind::DuplicateLabel(label) => write!(f, "member '{}' redefined in tuple literal", label),
            RuntimeErrorKind::NoParent => write!(f, "cannot set upvalue from root scope"),
            RuntimeErrorKind::ImportNotFound(path) => write!(f, "no file found matching import path '{}'", path),
            RuntimeErrorKind::DivisionByZero => write!(f, "division by zero"),
            RuntimeErrorKind::Internal(msg) => write!(f, "internal interpreter error: {}", msg),
        }
    }
}

/// A runtime error with a traceback, mirroring Passerine's `vm::trace`
/// but with a strongly-typed `kind` rather than a bare string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub spans: Vec<Span>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, span: Span) -> RuntimeError {
        RuntimeError { kind, spans: vec![span] }
    }

    /// Adds a call-site span as the error propagates out through
    /// invocation boundaries, building a traceback top to bottom.
    pub fn push_frame(mut self, span: Span) -> Self {
        self.spans.push(span);
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.spans.len() > 1 {
            writeln!(f, "Traceback, most recent call last:")?;
        }
        for span in &self.spans {
            write!(f, "{}", span)?;
        }
        write!(f, "Runtime Error: {}", self.kind)
    }
}
