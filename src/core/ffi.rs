use std::rc::Rc;

use crate::common::closure::Arg;
use crate::common::data::Value;
use crate::common::span::Span;
use crate::vm::error::RuntimeError;

/// An object owned by the embedding host rather than the interpreter
/// itself — a file handle, a socket, a wrapped host-language value.
/// Lark only ever sees it as an opaque, callable `Value::Host`.
pub trait HostObject {
    fn string_form(&self) -> String;

    /// Host objects are invoked the same way a `Pval` is; most will
    /// simply reject unsupported argument shapes with an error.
    fn invoke(&self, args: &[Arg], span: &Span) -> Result<Value, RuntimeError>;
}

/// The embedding boundary an `extern` expression crosses. A program
/// with no host attached (the bare CLI, the REPL) simply has no
/// `HostRegistry` installed, and every `extern` fails with a plain
/// runtime error rather than silently doing nothing.
pub trait HostRegistry {
    /// `extern "expr"` — evaluates a host-language expression and
    /// translates its result into a Lark `Value`.
    fn eval_expression(&self, source: &str, span: &Span) -> Result<Value, RuntimeError>;

    /// `extern """block"""` — executes a host-language statement
    /// block; its locals come back as the named members of a tuple.
    fn exec_block(&self, source: &str, span: &Span) -> Result<Value, RuntimeError>;

    /// Wraps a host-owned object as an opaque, callable `Value::Host`.
    fn adapt(&self, host_object: Rc<dyn HostObject>) -> Value {
        Value::Host(host_object)
    }
}
