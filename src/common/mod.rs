//! Data structures and utilities shared by the compiler and the
//! evaluator: values, closures, source/span tracking.

pub mod closure;
pub mod data;
pub mod source;
pub mod span;

pub use data::Value;
pub use source::Source;
pub use span::{Span, Spanned};
