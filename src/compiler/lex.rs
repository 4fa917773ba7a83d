use std::{iter::Peekable, rc::Rc, str::Chars};

use crate::common::source::Source;
use crate::common::span::{Span, Spanned};
use crate::compiler::syntax::Syntax;
use crate::construct::token::{Keyword, Token};

#[derive(Debug)]
pub struct Lexer {
    source: Rc<Source>,
    index: usize,
}

impl Lexer {
    /// Lexes a whole source file into a stream of spanned tokens,
    /// ending with a trailing `Token::Eof`.
    pub fn lex(source: Rc<Source>) -> Result<Vec<Spanned<Token>>, Syntax> {
        let mut lexer = Lexer { source: Rc::clone(&source), index: 0 };
        let mut tokens = vec![];

        lexer.strip();
        while lexer.index < lexer.source.contents.len() {
            let token = lexer.next_token()?;
            tokens.push(token);
            lexer.strip();
        }

        let eof_span = Span::point(&source, lexer.source.contents.len().saturating_sub(1));
        tokens.push(Spanned::new(Token::Eof, eof_span));
        Ok(tokens)
    }

    fn grab_from_index(&self, len: usize) -> &str {
        &self.source.contents[self.index..self.index + len]
    }

    fn remaining(&self) -> Chars {
        self.source.contents[self.index..].chars()
    }

    /// Strips whitespace (except newlines, which are significant as
    /// statement separators) and `#`-prefixed line comments.
    fn strip(&mut self) {
        loop {
            let mut remaining = self.remaining().peekable();
            let old_index = self.index;

            while let Some(c) = remaining.peek() {
                if *c == '\n' || !c.is_whitespace() {
                    break;
                }
                self.index += c.len_utf8();
                remaining.next();
            }

            let mut remaining = self.remaining().peekable();
            if let Some('#') = remaining.peek() {
                for c in remaining {
                    if c == '\n' {
                        break;
                    }
                    self.index += c.len_utf8();
                }
            }

            if self.index == old_index {
                break;
            }
        }
    }

    fn take_while<'a, T>(
        &self,
        remaining: &mut Peekable<Chars<'a>>,
        pred: impl Fn(&char) -> bool,
        wrap: impl Fn(&str) -> T,
    ) -> (T, usize) {
        let mut len = 0;
        while let Some(c) = remaining.peek() {
            if !pred(c) {
                break;
            }
            len += c.len_utf8();
            remaining.next();
        }
        (wrap(self.grab_from_index(len)), len)
    }

    fn error(&self, reason: &str, len: usize) -> Syntax {
        Syntax::error(reason, Span::new(&self.source, self.index, len.max(1)))
    }

    fn next_token(&mut self) -> Result<Spanned<Token>, Syntax> {
        let start = self.index;
        let mut remaining = self.remaining().peekable();
        let c = *remaining.peek().expect("next_token called at end of source");

        let (token, len) = match c {
            '\n' => (Token::Newline, 1),
            '(' => (Token::OpenParen, 1),
            ')' => (Token::CloseParen, 1),
            '{' => (Token::OpenBrace, 1),
            '}' => (Token::CloseBrace, 1),
            '[' => (Token::OpenBracket, 1),
            ']' => (Token::CloseBracket, 1),
            ',' => (Token::Comma, 1),
            ';' => (Token::Semicolon, 1),
            '^' => (Token::Caret, 1),
            '%' => (Token::Percent, 1),
            '+' => {
                if self.peek_two() == Some('=') {
                    (Token::PlusEq, 2)
                } else {
                    (Token::Plus, 1)
                }
            },
            '-' => {
                if self.peek_two() == Some('=') {
                    (Token::MinusEq, 2)
                } else {
                    (Token::Minus, 1)
                }
            },
            '*' => {
                if self.peek_two() == Some('=') {
                    (Token::StarEq, 2)
                } else {
                    (Token::Star, 1)
                }
            },
            '.' => (Token::Dot, 1),
            ':' => {
                if self.peek_two() == Some(':') {
                    (Token::ColonColon, 2)
                } else {
                    (Token::Colon, 1)
                }
            },
            '/' => {
                if self.peek_two() == Some('=') {
                    (Token::SlashEq, 2)
                } else {
                    (Token::Slash, 1)
                }
            },
            '=' => {
                if self.peek_two() == Some('=') {
                    (Token::EqEq, 2)
                } else {
                    (Token::Eq, 1)
                }
            },
            '!' => {
                if self.peek_two() == Some('=') {
                    (Token::NotEq, 2)
                } else {
                    (Token::Bang, 1)
                }
            },
            '<' => {
                if self.peek_two() == Some('=') {
                    (Token::LtEq, 2)
                } else {
                    (Token::Lt, 1)
                }
            },
            '>' => {
                if self.peek_two() == Some('=') {
                    (Token::GtEq, 2)
                } else {
                    (Token::Gt, 1)
                }
            },
            '"' => return self.lex_string('"'),
            '\'' => return self.lex_string('\''),
            d if d.is_ascii_digit() => return self.lex_number(),
            a if a.is_alphabetic() || a == '_' => return self.lex_ident_or_keyword(),
            other => return Err(self.error(&format!("unexpected character '{}'", other), 1)),
        };

        self.index += len;
        Ok(Spanned::new(token, Span::new(&self.source, start, len)))
    }

    fn peek_two(&self) -> Option<char> {
        self.remaining().nth(1)
    }

    /// A quoted literal, dispatching to the triple-quoted docstring
    /// form when the quote character repeats three times. Deliberately
    /// non-greedy (stops at the first matching close) and does not
    /// interpret `\`-escapes — a backslash is ordinary string content,
    /// matching the source lexer this is templated on.
    fn lex_string(&mut self, quote: char) -> Result<Spanned<Token>, Syntax> {
        if self.peek_two() == Some(quote) && self.remaining().nth(2) == Some(quote) {
            return self.lex_docstring(quote);
        }

        let start = self.index;
        let mut remaining = self.remaining().peekable();
        remaining.next();

        let mut value = String::new();
        let mut len = 1;
        loop {
            match remaining.next() {
                None => return Err(self.error("unterminated string literal", len)),
                Some(c) if c == quote => {
                    len += 1;
                    break;
                },
                Some(c) => {
                    len += c.len_utf8();
                    value.push(c);
                },
            }
        }

        self.index += len;
        Ok(Spanned::new(Token::String(value), Span::new(&self.source, start, len)))
    }

    fn lex_docstring(&mut self, quote: char) -> Result<Spanned<Token>, Syntax> {
        let start = self.index;
        let mut remaining = self.remaining().peekable();
        remaining.next();
        remaining.next();
        remaining.next();

        let mut value = String::new();
        let mut len = 3;
        loop {
            let a = remaining.next().ok_or_else(|| self.error("unterminated docstring", len))?;
            if a == quote {
                let rest_is_close = self.source.contents[self.index + len..].starts_with(&format!("{}{}", quote, quote));
                if rest_is_close {
                    len += 3;
                    break;
                }
            }
            len += a.len_utf8();
            value.push(a);
        }

        self.index += len;
        Ok(Spanned::new(Token::Docstring(value), Span::new(&self.source, start, len)))
    }

    /// Counts a run of ASCII digits starting `offset` bytes past the
    /// current index, without consuming anything.
    fn digit_run(&self, offset: usize) -> usize {
        self.source.contents[self.index + offset..].bytes().take_while(u8::is_ascii_digit).count()
    }

    /// Recognizes a `E[+-]?\d+` exponent suffix starting `offset` bytes
    /// past the current index. Returns its length, or zero if no
    /// well-formed exponent is present (an `E` with no digits after it
    /// is left alone, e.g. so `2E` lexes as `2` followed by an `E`
    /// identifier rather than a broken float).
    fn exponent_len(&self, offset: usize) -> usize {
        let rest = &self.source.contents[self.index + offset..];
        if !rest.starts_with('E') && !rest.starts_with('e') {
            return 0;
        }
        let sign_len = if rest[1..].starts_with(|c| c == '+' || c == '-') { 1 } else { 0 };
        let digits = self.digit_run(offset + 1 + sign_len);
        if digits == 0 {
            return 0;
        }
        1 + sign_len + digits
    }

    /// Two float forms: `\d+\.\d+` with an optional exponent, or a
    /// bare `\d+E[+-]?\d+` with no decimal point at all.
    fn lex_number(&mut self) -> Result<Spanned<Token>, Syntax> {
        let start = self.index;
        let int_len = self.digit_run(0);
        let has_frac = self.source.contents[self.index + int_len..].starts_with('.')
            && self.digit_run(int_len + 1) > 0;

        let len = if has_frac {
            let frac_len = self.digit_run(int_len + 1);
            int_len + 1 + frac_len + self.exponent_len(int_len + 1 + frac_len)
        } else {
            int_len + self.exponent_len(int_len)
        };

        let text = self.grab_from_index(len);
        let span = Span::new(&self.source, start, len);
        let token = if has_frac || len > int_len {
            let value: f64 = text.parse().map_err(|_| self.error("invalid float literal", len))?;
            Token::Float(value)
        } else {
            let value: i64 = text.parse().map_err(|_| self.error("invalid integer literal", len))?;
            Token::Int(value)
        };

        self.index += len;
        Ok(Spanned::new(token, span))
    }

    fn lex_ident_or_keyword(&mut self) -> Result<Spanned<Token>, Syntax> {
        let start = self.index;
        let mut remaining = self.remaining().peekable();
        let (mut word, mut len) =
            self.take_while(&mut remaining, |c| c.is_alphanumeric() || *c == '_', |s| s.to_string());

        // An identifier may carry one trailing `?` or `!`, e.g. `empty?`.
        let mut after = self.remaining().skip(len).peekable();
        if matches!(after.peek(), Some('?') | Some('!')) {
            let suffix = after.next().unwrap();
            word.push(suffix);
            len += suffix.len_utf8();
        }

        self.index += len;
        let span = Span::new(&self.source, start, len);
        let token = match Keyword::from_str(&word) {
            Some(k) => Token::Keyword(k),
            None => Token::Ident(word),
        };
        Ok(Spanned::new(token, span))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lex(src: &str) -> Vec<Token> {
        let source = Source::source(src);
        Lexer::lex(source).unwrap().into_iter().map(|s| s.item).collect()
    }

    #[test]
    fn lexes_arithmetic() {
        assert_eq!(lex("1 + 2 * 3"), vec![Token::Int(1), Token::Plus, Token::Int(2), Token::Star, Token::Int(3), Token::Eof]);
    }

    #[test]
    fn lexes_float() {
        assert_eq!(lex("3.14"), vec![Token::Float(3.14), Token::Eof]);
    }

    #[test]
    fn lexes_exponent_only_float() {
        assert_eq!(lex("2E3"), vec![Token::Float(2000.0), Token::Eof]);
    }

    #[test]
    fn lexes_keywords_and_idents() {
        assert_eq!(lex("if x"), vec![Token::Keyword(Keyword::If), Token::Ident("x".to_string()), Token::Eof]);
    }

    #[test]
    fn lexes_identifier_with_question_mark() {
        assert_eq!(lex("empty?"), vec![Token::Ident("empty?".to_string()), Token::Eof]);
    }

    #[test]
    fn strings_do_not_interpret_escapes() {
        assert_eq!(lex(r#""a\nb""#), vec![Token::String("a\\nb".to_string()), Token::Eof]);
    }

    #[test]
    fn single_quoted_strings() {
        assert_eq!(lex("'hi'"), vec![Token::String("hi".to_string()), Token::Eof]);
    }

    #[test]
    fn lexes_docstring() {
        assert_eq!(lex(r#""""hello world""""#), vec![Token::Docstring("hello world".to_string()), Token::Eof]);
    }

    #[test]
    fn lexes_compound_assignment() {
        assert_eq!(lex("x += 1"), vec![Token::Ident("x".to_string()), Token::PlusEq, Token::Int(1), Token::Eof]);
    }

    #[test]
    fn lexes_namespace_separator() {
        assert_eq!(
            lex("a::b"),
            vec![Token::Ident("a".to_string()), Token::ColonColon, Token::Ident("b".to_string()), Token::Eof]
        );
    }

    #[test]
    fn strips_comments() {
        assert_eq!(lex("1 # a comment\n+ 2"), vec![Token::Int(1), Token::Newline, Token::Plus, Token::Int(2), Token::Eof]);
    }

    #[test]
    fn rejects_unterminated_string() {
        let source = Source::source("\"oops");
        assert!(Lexer::lex(source).is_err());
    }

    mod fuzz {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn doesnt_crash(s in "\\PC*") {
                let result = Lexer::lex(Source::source(&s));
                format!("{:?}", result);
            }

            #[test]
            fn integers_roundtrip(n in 0i64..1_000_000_000) {
                let tokens = lex(&n.to_string());
                prop_assert_eq!(&tokens[..tokens.len() - 1], &[Token::Int(n)]);
            }
        }
    }
}
