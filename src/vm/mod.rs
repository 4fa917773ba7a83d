//! The tree-walking evaluator: runtime errors with tracebacks, the
//! structured non-local exits `return`/`break`/`continue` unwind
//! through, and the evaluator itself.

pub mod error;
pub mod eval;
pub mod exit;

pub use error::{RuntimeError, RuntimeErrorKind};
pub use eval::run;
