use crate::common::data::Value;

/// A structured non-local exit. These are not failures — they thread
/// back up through the evaluator's `Result` channel only because Rust
/// gives us `?` for free that way, but they're caught deliberately at
/// a binding construct rather than reported to the user.
///
/// `Return` is caught at the nearest enclosing closure call boundary.
/// `Break`/`Continue` are caught at the nearest enclosing `loop`. An
/// exit that reaches the top of a program without a matching binder
/// (e.g. a bare `break` outside any loop) is a runtime error, raised
/// by the evaluator rather than represented here.
#[derive(Debug, Clone)]
pub enum Exit {
    Return(Value),
    Break,
    Continue,
}
