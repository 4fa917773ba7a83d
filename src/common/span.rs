use std::{
    fmt::{self, Display, Formatter},
    rc::Rc,
};

use crate::common::source::Source;

/// A `Span` refers to a section of a `Source`, with enough information
/// to render a caret-underlined excerpt for diagnostics. Spans are
/// cheap to clone (an `Rc` to the source plus two `usize`s).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Span {
    source: Option<Rc<Source>>,
    offset: usize,
    length: usize,
}

impl Span {
    pub fn new(source: &Rc<Source>, offset: usize, length: usize) -> Span {
        Span { source: Some(Rc::clone(source)), offset, length }
    }

    /// A zero-width span pointing at a single byte offset.
    pub fn point(source: &Rc<Source>, offset: usize) -> Span {
        Span { source: Some(Rc::clone(source)), offset, length: 1 }
    }

    /// An empty span with no source. Combining it with any other span
    /// yields the other span unchanged.
    pub fn empty() -> Span {
        Span { source: None, offset: 0, length: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_none()
    }

    /// Spans the space covered by both `a` and `b`.
    pub fn combine(a: &Span, b: &Span) -> Span {
        if a.is_empty() {
            return b.clone();
        }
        if b.is_empty() {
            return a.clone();
        }
        if a.source != b.source {
            panic!("can't combine two spans with different sources");
        }

        let offset = a.offset.min(b.offset);
        let end = (a.offset + a.length).max(b.offset + b.length);
        Span::new(a.source.as_ref().unwrap(), offset, end - offset)
    }

    /// Left-folds `Span::combine` over a sequence of spans.
    pub fn join(spans: &[Span]) -> Span {
        spans.iter().fold(Span::empty(), |acc, s| Span::combine(&acc, s))
    }

    pub fn contents(&self) -> &str {
        let source = self.source.as_ref().expect("an empty span has no contents");
        &source.contents[self.offset..self.offset + self.length]
    }

    fn line_indices(&self) -> ((usize, usize), (usize, usize)) {
        let source = self.source.as_ref().expect("an empty span has no contents");
        let start = self.offset;
        let end = (self.offset + self.length).max(self.offset);

        let start_lines: Vec<&str> = source.contents[..=start.min(source.contents.len() - 1)].lines().collect();
        let end_idx = end.saturating_sub(1).min(source.contents.len().saturating_sub(1));
        let end_lines: Vec<&str> = source.contents[..=end_idx].lines().collect();

        let start_line = start_lines.len().saturating_sub(1);
        let end_line = end_lines.len().saturating_sub(1);
        let start_col = start_lines.last().map(|l| l.len()).unwrap_or(0).saturating_sub(1);
        let end_col = end_lines.last().map(|l| l.len()).unwrap_or(0).saturating_sub(1);

        ((start_line, start_col), (end_line, end_col))
    }
}

impl Display for Span {
    /// Renders a `Line N:M` header followed by the offending source
    /// line(s) with carets underlining the span, e.g.:
    /// ```plain
    /// Line 1:5
    ///   |
    /// 1 | x = blatant { error }
    ///   |     ^^^^^^^^^^^^^^^^
    /// ```
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }

        let source = self.source.as_ref().unwrap();
        let lines: Vec<&str> = source.contents.lines().collect();
        let ((start_line, start_col), (end_line, _end_col)) = self.line_indices();

        let readable_start = (start_line + 1).to_string();
        let readable_end = (end_line + 1).to_string();
        let padding = readable_end.len();

        writeln!(f, "Line {}:{}", readable_start, start_col + 1)?;
        writeln!(f, "{} |", " ".repeat(padding))?;

        if start_line == end_line {
            let line = lines.get(end_line).copied().unwrap_or("");
            writeln!(f, "{} | {}", readable_end, line)?;
            writeln!(
                f,
                "{} | {}{}",
                " ".repeat(padding),
                " ".repeat(start_col),
                "^".repeat(self.length.max(1)),
            )
        } else {
            for (i, line) in lines[start_line..=end_line.min(lines.len().saturating_sub(1))].iter().enumerate() {
                let no = (start_line + i + 1).to_string();
                writeln!(f, "{}{} > {}", " ".repeat(padding - no.len()), no, line)?;
            }
            Ok(())
        }
    }
}

/// Pairs a value with the span it was parsed from.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Spanned<T> {
    pub item: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(item: T, span: Span) -> Spanned<T> {
        Spanned { item, span }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned { item: f(self.item), span: self.span }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn combination() {
        let source = Source::source("heck, that's awesome");
        let a = Span::new(&source, 0, 5);
        let b = Span::new(&source, 11, 2);
        assert_eq!(Span::combine(&a, &b), Span::new(&source, 0, 13));
    }

    #[test]
    fn span_and_contents() {
        let source = Source::source("hello, this is some text!");
        let spans = vec![Span::new(&source, 0, 8), Span::new(&source, 7, 5), Span::new(&source, 12, 4)];
        let result = Span::new(&source, 0, 16);
        assert_eq!(Span::join(&spans).contents(), result.contents());
    }

    #[test]
    fn display_single_line() {
        let source = Source::source("x = 1 + y");
        let span = Span::new(&source, 8, 1);
        let rendered = format!("{}", span);
        assert!(rendered.contains("Line 1:9"));
        assert!(rendered.contains("x = 1 + y"));
    }
}
