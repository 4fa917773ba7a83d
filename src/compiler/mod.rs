//! Turns source text into an AST: lexing, parsing (with capture
//! analysis for closures), and the compile-time `Syntax` error type.

pub mod lex;
pub mod parse;
pub mod syntax;

pub use syntax::Syntax;
