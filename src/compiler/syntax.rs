use std::fmt;

use crate::common::span::Span;

/// An annotation attached to a span within a `Syntax` error: a short
/// hint rendered alongside the excerpt it refers to.
#[derive(Debug, Clone)]
pub struct Note {
    pub span: Span,
    pub hint: String,
}

impl Note {
    pub fn new(span: Span, hint: &str) -> Note {
        Note { span, hint: hint.to_string() }
    }
}

/// A compile-time error — raised by the lexer or parser — with a
/// one-line reason and zero or more annotated spans giving context.
#[derive(Debug, Clone)]
pub struct Syntax {
    pub reason: String,
    pub notes: Vec<Note>,
}

impl Syntax {
    pub fn error(reason: &str, span: Span) -> Syntax {
        Syntax { reason: reason.to_string(), notes: vec![Note::new(span, "here")] }
    }

    pub fn with_note(mut self, span: Span, hint: &str) -> Syntax {
        self.notes.push(Note::new(span, hint));
        self
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Syntax Error: {}", self.reason)?;
        for note in &self.notes {
            write!(f, "{}", note.span)?;
            writeln!(f, "{}", note.hint)?;
        }
        Ok(())
    }
}
