use std::collections::BTreeSet;

use crate::common::span::{Span, Spanned};
use crate::compiler::syntax::Syntax;
use crate::construct::token::{Keyword, Token};
use crate::construct::tree::{
    AssignTarget, BinOp, CallArg, CondArm, DotKey, Expr, ExternKind, LabelExpr, ParamDecl, TupleElem, UnOp,
};

/// A recursive-descent parser with a two-stack capture analysis: one
/// stack tracks which names are locally declared at each enclosing
/// closure scope, the other accumulates the free names each closure
/// references from its enclosing scopes. A name referenced but not
/// (yet) declared in the innermost closure is recorded as captured
/// there; on leaving that closure, anything it captured that isn't
/// local to the next scope out is propagated upward, so a capture
/// several closures deep still reaches the top.
pub struct Parser {
    tokens: Vec<Spanned<Token>>,
    pos: usize,
    declared: Vec<BTreeSet<String>>,
    captured: Vec<BTreeSet<String>>,
}

impl Parser {
    pub fn parse(tokens: Vec<Spanned<Token>>) -> Result<Spanned<Expr>, Syntax> {
        let mut parser = Parser { tokens, pos: 0, declared: vec![BTreeSet::new()], captured: vec![] };
        let start_span = parser.peek().span.clone();
        let block = parser.block_until_keywords(&[Token::Eof])?;
        let end_span = parser.peek().span.clone();
        parser.expect(&Token::Eof, "expected end of input")?;
        Ok(Spanned::new(Expr::Block(block), Span::combine(&start_span, &end_span)))
    }

    // --- token stream helpers ---

    fn peek(&self) -> &Spanned<Token> {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> &Token {
        &self.peek().item
    }

    fn advance(&mut self) -> Spanned<Token> {
        let tok = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, token: &Token) -> bool {
        self.peek_kind() == token
    }

    fn matches(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, message: &str) -> Result<Spanned<Token>, Syntax> {
        if self.check(token) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn error(&self, message: &str) -> Syntax {
        Syntax::error(&format!("{}, found '{}'", message, self.peek_kind()), self.peek().span.clone())
    }

    /// Consumes any run of newlines/semicolons separating statements.
    fn skip_terminators(&mut self) {
        while matches!(self.peek_kind(), Token::Newline | Token::Semicolon) {
            self.advance();
        }
    }

    /// Consumes newlines only, used inside expressions where a
    /// trailing operator implies the expression continues on the next
    /// line.
    fn skip_newlines(&mut self) {
        while self.check(&Token::Newline) {
            self.advance();
        }
    }

    // --- capture analysis ---

    fn mark_declared(&mut self, name: &str) {
        self.declared.last_mut().unwrap().insert(name.to_string());
    }

    fn mark_reference(&mut self, name: &str) {
        if self.declared.last().unwrap().contains(name) {
            return;
        }
        if let Some(top) = self.captured.last_mut() {
            top.insert(name.to_string());
        }
    }

    fn push_fn_scope(&mut self, params: &[ParamDecl]) {
        let mut declared = BTreeSet::new();
        for p in params {
            declared.insert(p.name.clone());
        }
        self.declared.push(declared);
        self.captured.push(BTreeSet::new());
    }

    fn pop_fn_scope(&mut self) -> Vec<String> {
        let captured = self.captured.pop().expect("pop_fn_scope without matching push");
        self.declared.pop();
        for name in &captured {
            if !self.declared.last().unwrap().contains(name) {
                if let Some(outer) = self.captured.last_mut() {
                    outer.insert(name.clone());
                }
            }
        }
        captured.into_iter().collect()
    }

    // --- grammar ---

    /// A statement list terminated by any of `ends` (left unconsumed).
    /// Used both for the program root (`Token::Eof`) and for bodies
    /// delimited by keywords (`elif`/`else`/`end`) rather than braces.
    fn block_until_keywords(&mut self, ends: &[Token]) -> Result<Vec<Spanned<Expr>>, Syntax> {
        let mut stmts = vec![];
        self.skip_terminators();
        while !ends.iter().any(|t| self.check(t)) {
            stmts.push(self.statement()?);
            if !ends.iter().any(|t| self.check(t)) {
                if !matches!(self.peek_kind(), Token::Newline | Token::Semicolon) {
                    return Err(self.error("expected a statement separator"));
                }
                self.skip_terminators();
            }
        }
        Ok(stmts)
    }

    fn block_until(&mut self, end: &Token) -> Result<Vec<Spanned<Expr>>, Syntax> {
        self.block_until_keywords(std::slice::from_ref(end))
    }

    fn statement(&mut self) -> Result<Spanned<Expr>, Syntax> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Spanned<Expr>, Syntax> {
        if self.check(&Token::Caret) {
            let start = self.advance().span;
            let name_tok = self.expect_ident("expected a name after '^'")?;
            self.skip_newlines();
            self.expect(&Token::Eq, "expected '=' after upvalue target")?;
            self.skip_newlines();
            let value = self.assignment()?;
            let span = Span::combine(&start, &value.span);
            self.mark_reference(&name_tok);
            return Ok(Spanned::new(
                Expr::UpvalAssign { name: name_tok, value: Box::new(value) },
                span,
            ));
        }

        let target = self.equality()?;

        let compound = match self.peek_kind() {
            Token::PlusEq => Some(BinOp::Add),
            Token::MinusEq => Some(BinOp::Sub),
            Token::StarEq => Some(BinOp::Mul),
            Token::SlashEq => Some(BinOp::Div),
            _ => None,
        };
        if let Some(op) = compound {
            self.advance();
            self.skip_newlines();
            let value = self.assignment()?;
            let span = Span::combine(&target.span, &value.span);
            let assign_target = self.to_assign_target(target)?;
            return Ok(Spanned::new(Expr::OpAssign { op, target: assign_target, value: Box::new(value) }, span));
        }

        if self.check(&Token::Eq) {
            self.advance();
            self.skip_newlines();
            // A plain `name = ...` declares `name` fresh in the
            // current scope. `target` was parsed through `primary()`,
            // which — not yet knowing it was about to become an
            // assignment target — already recorded it as a reference
            // to an *enclosing* binding; undo that before the closure
            // on the right (if any) captures it, and before the
            // right-hand side is parsed, so self-referential closures
            // (`fact = [n]{ ... fact[n - 1] ... }`) capture this slot
            // rather than bubbling the reference past their own definition.
            if let Expr::Ident(name) = &target.item {
                if let Some(top) = self.captured.last_mut() {
                    top.remove(name);
                }
                self.mark_declared(name);
            }
            let value = self.assignment()?;
            let span = Span::combine(&target.span, &value.span);
            let assign_target = self.to_assign_target(target)?;
            return Ok(Spanned::new(Expr::Assign { target: assign_target, value: Box::new(value) }, span));
        }

        Ok(target)
    }

    fn to_assign_target(&self, expr: Spanned<Expr>) -> Result<AssignTarget, Syntax> {
        match expr.item {
            Expr::Ident(name) => Ok(AssignTarget::Ident(name)),
            Expr::DotAccess { target, key } => Ok(AssignTarget::Member { target, key }),
            _ => Err(Syntax::error("invalid assignment target", expr.span)),
        }
    }

    fn binary_level(
        &mut self,
        next: impl Fn(&mut Self) -> Result<Spanned<Expr>, Syntax>,
        ops: &[(Token, BinOp)],
    ) -> Result<Spanned<Expr>, Syntax> {
        let mut lhs = next(self)?;
        loop {
            let matched = ops.iter().find(|(tok, _)| self.check(tok));
            let Some((_, op)) = matched else { break };
            let op = *op;
            self.advance();
            self.skip_newlines();
            let rhs = next(self)?;
            let span = Span::combine(&lhs.span, &rhs.span);
            lhs = Spanned::new(Expr::BinOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, span);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Spanned<Expr>, Syntax> {
        self.binary_level(Self::comparison, &[(Token::EqEq, BinOp::Eq), (Token::NotEq, BinOp::NotEq)])
    }

    fn comparison(&mut self) -> Result<Spanned<Expr>, Syntax> {
        self.binary_level(
            Self::additive,
            &[(Token::Lt, BinOp::Lt), (Token::LtEq, BinOp::LtEq), (Token::Gt, BinOp::Gt), (Token::GtEq, BinOp::GtEq)],
        )
    }

    fn additive(&mut self) -> Result<Spanned<Expr>, Syntax> {
        self.binary_level(Self::multiplicative, &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)])
    }

    fn multiplicative(&mut self) -> Result<Spanned<Expr>, Syntax> {
        self.binary_level(
            Self::unary,
            &[(Token::Star, BinOp::Mul), (Token::Slash, BinOp::Div), (Token::Percent, BinOp::Mod)],
        )
    }

    fn unary(&mut self) -> Result<Spanned<Expr>, Syntax> {
        if self.check(&Token::Minus) || self.check(&Token::Bang) {
            let tok = self.advance();
            let op = if tok.item == Token::Minus { UnOp::Neg } else { UnOp::Not };
            let operand = self.unary()?;
            let span = Span::combine(&tok.span, &operand.span);
            return Ok(Spanned::new(Expr::UnOp { op, operand: Box::new(operand) }, span));
        }
        self.postfix()
    }

    /// Handles `.key` member access and `[args]` invocation, chained.
    /// A call whose callee is syntactically a bare identifier is left
    /// as an ordinary `Expr::Ident` callee — the evaluator, not the
    /// parser, is responsible for skipping that identifier's usual
    /// zero-argument auto-invoke in that one position.
    fn postfix(&mut self) -> Result<Spanned<Expr>, Syntax> {
        let mut expr = self.primary()?;
        loop {
            if self.check(&Token::Dot) {
                self.advance();
                let key = self.dot_key()?;
                let span = Span::combine(&expr.span, &self.tokens[self.pos.saturating_sub(1)].span);
                expr = Spanned::new(Expr::DotAccess { target: Box::new(expr), key }, span);
            } else if self.check(&Token::OpenBracket) {
                let (args, end_span) = self.call_args()?;
                let span = Span::combine(&expr.span, &end_span);
                expr = Spanned::new(Expr::Call { callee: Box::new(expr), args }, span);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn dot_key(&mut self) -> Result<DotKey, Syntax> {
        match self.peek_kind().clone() {
            Token::Int(i) => {
                self.advance();
                Ok(DotKey::Index(i))
            },
            Token::Ident(name) => {
                self.advance();
                Ok(DotKey::Name(name))
            },
            // A quoted key lets a dot-access name member keys that
            // aren't valid identifiers, e.g. operator-overload slots
            // like `t."+"`.
            Token::String(name) => {
                self.advance();
                Ok(DotKey::Name(name))
            },
            Token::OpenParen => {
                self.advance();
                let inner = self.assignment()?;
                self.expect(&Token::CloseParen, "expected ')' to close computed dot-access")?;
                Ok(DotKey::Computed(Box::new(inner)))
            },
            _ => Err(self.error("expected an index, name, or '(' after '.'")),
        }
    }

    /// `f[arg, arg, ^name]` — invocation arguments. `^name` passes a
    /// live reference to the caller's `name` rather than its value.
    fn call_args(&mut self) -> Result<(Vec<CallArg>, Span), Syntax> {
        let open = self.expect(&Token::OpenBracket, "expected '['")?.span;
        self.skip_newlines();
        let mut args = vec![];
        while !self.check(&Token::CloseBracket) {
            if self.check(&Token::Caret) {
                self.advance();
                let name = self.expect_ident("expected a name after '^' in call argument")?;
                self.mark_reference(&name);
                args.push(CallArg::Ref(name));
            } else {
                args.push(CallArg::Value(self.assignment()?));
            }
            self.skip_newlines();
            if !self.matches(&Token::Comma) {
                break;
            }
            self.skip_newlines();
        }
        let close = self.expect(&Token::CloseBracket, "expected ']' to close call arguments")?.span;
        Ok((args, Span::combine(&open, &close)))
    }

    fn expect_ident(&mut self, message: &str) -> Result<String, Syntax> {
        match self.peek_kind().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            },
            _ => Err(self.error(message)),
        }
    }

    fn primary(&mut self) -> Result<Spanned<Expr>, Syntax> {
        let tok = self.peek().clone();
        match tok.item {
            Token::Int(i) => {
                self.advance();
                Ok(Spanned::new(Expr::Int(i), tok.span))
            },
            Token::Float(n) => {
                self.advance();
                Ok(Spanned::new(Expr::Float(n), tok.span))
            },
            Token::String(s) => {
                self.advance();
                Ok(Spanned::new(Expr::String(s), tok.span))
            },
            Token::Keyword(Keyword::True) => {
                self.advance();
                Ok(Spanned::new(Expr::Bool(true), tok.span))
            },
            Token::Keyword(Keyword::False) => {
                self.advance();
                Ok(Spanned::new(Expr::Bool(false), tok.span))
            },
            Token::Keyword(Keyword::Nil) => {
                self.advance();
                Ok(Spanned::new(Expr::Nil, tok.span))
            },
            Token::Ident(name) => {
                self.advance();
                let mut full = name;
                let mut end_span = tok.span.clone();
                while self.check(&Token::ColonColon) {
                    self.advance();
                    let next_span = self.peek().span.clone();
                    let segment = self.expect_ident("expected a name after '::'")?;
                    full.push_str("::");
                    full.push_str(&segment);
                    end_span = next_span;
                }
                self.mark_reference(&full);
                Ok(Spanned::new(Expr::Ident(full), Span::combine(&tok.span, &end_span)))
            },
            Token::Keyword(Keyword::If) => self.if_expr(),
            Token::Keyword(Keyword::Loop) => self.loop_expr(),
            Token::Keyword(Keyword::Break) => {
                self.advance();
                Ok(Spanned::new(Expr::Break, tok.span))
            },
            Token::Keyword(Keyword::Continue) => {
                self.advance();
                Ok(Spanned::new(Expr::Continue, tok.span))
            },
            Token::Keyword(Keyword::Return) => self.return_expr(),
            Token::Keyword(Keyword::Namespace) => self.namespace_expr(),
            Token::Keyword(Keyword::Import) => self.import_expr(),
            Token::Keyword(Keyword::Extern) => self.extern_expr(),
            Token::OpenBrace | Token::OpenBracket => self.closure_expr(),
            Token::OpenParen => self.tuple_or_group(),
            _ => Err(self.error("expected an expression")),
        }
    }

    fn if_expr(&mut self) -> Result<Spanned<Expr>, Syntax> {
        let start = self.expect(&Token::Keyword(Keyword::If), "expected 'if'")?.span;
        let mut arms = vec![self.cond_arm()?];
        while self.check(&Token::Keyword(Keyword::Elif)) {
            self.advance();
            arms.push(self.cond_arm()?);
        }
        let else_body = if self.matches(&Token::Keyword(Keyword::Else)) {
            Some(self.block_until_keywords(&[Token::Keyword(Keyword::End)])?)
        } else {
            None
        };
        let end = self.expect(&Token::Keyword(Keyword::End), "expected 'end' to close 'if'")?.span;
        Ok(Spanned::new(Expr::Cond { arms, else_body }, Span::combine(&start, &end)))
    }

    /// `cond [then]? stmt* `, stopping before the next `elif`/`else`/
    /// `end`. `then` is a purely cosmetic filler word.
    fn cond_arm(&mut self) -> Result<CondArm, Syntax> {
        let cond = self.equality()?;
        self.matches(&Token::Keyword(Keyword::Then));
        let body = self.block_until_keywords(&[
            Token::Keyword(Keyword::Elif),
            Token::Keyword(Keyword::Else),
            Token::Keyword(Keyword::End),
        ])?;
        Ok(CondArm { cond, body })
    }

    fn loop_expr(&mut self) -> Result<Spanned<Expr>, Syntax> {
        let start = self.expect(&Token::Keyword(Keyword::Loop), "expected 'loop'")?.span;
        let cond = self.equality()?;
        self.matches(&Token::Keyword(Keyword::Then));
        let body = self.block_until_keywords(&[Token::Keyword(Keyword::End)])?;
        let end = self.expect(&Token::Keyword(Keyword::End), "expected 'end' to close 'loop'")?.span;
        Ok(Spanned::new(Expr::Loop { cond: Box::new(cond), body }, Span::combine(&start, &end)))
    }

    fn return_expr(&mut self) -> Result<Spanned<Expr>, Syntax> {
        let start = self.expect(&Token::Keyword(Keyword::Return), "expected 'return'")?.span;
        if matches!(
            self.peek_kind(),
            Token::Newline
                | Token::Semicolon
                | Token::CloseBrace
                | Token::CloseParen
                | Token::Eof
                | Token::Keyword(Keyword::Elif)
                | Token::Keyword(Keyword::Else)
                | Token::Keyword(Keyword::End)
        ) {
            return Ok(Spanned::new(Expr::Return(None), start));
        }
        let value = self.assignment()?;
        let span = Span::combine(&start, &value.span);
        Ok(Spanned::new(Expr::Return(Some(Box::new(value))), span))
    }

    fn namespace_expr(&mut self) -> Result<Spanned<Expr>, Syntax> {
        let start = self.expect(&Token::Keyword(Keyword::Namespace), "expected 'namespace'")?.span;
        let name = self.expect_ident("expected a namespace name")?;
        self.expect(&Token::OpenBrace, "expected '{' to begin namespace body")?;
        let body = self.block_until(&Token::CloseBrace)?;
        let close = self.expect(&Token::CloseBrace, "expected '}' to close namespace")?.span;
        Ok(Spanned::new(Expr::Namespace { name, body }, Span::combine(&start, &close)))
    }

    fn import_expr(&mut self) -> Result<Spanned<Expr>, Syntax> {
        let start = self.expect(&Token::Keyword(Keyword::Import), "expected 'import'")?.span;
        let path_tok = self.advance();
        let path = match path_tok.item {
            Token::String(s) => s,
            Token::Ident(s) => s,
            _ => return Err(Syntax::error("expected a module path after 'import'", path_tok.span)),
        };
        let span = Span::combine(&start, &path_tok.span);
        Ok(Spanned::new(Expr::Import { path }, span))
    }

    /// `extern "expr"` evaluates a host expression; `extern """block"""`
    /// executes a host statement block.
    fn extern_expr(&mut self) -> Result<Spanned<Expr>, Syntax> {
        let start = self.expect(&Token::Keyword(Keyword::Extern), "expected 'extern'")?.span;
        let tok = self.advance();
        let (kind, end_span) = match tok.item {
            Token::String(s) => (ExternKind::Expr(s), tok.span.clone()),
            Token::Docstring(s) => (ExternKind::Block(s), tok.span.clone()),
            _ => {
                return Err(Syntax::error(
                    "expected a quoted expression or a triple-quoted block after 'extern'",
                    tok.span,
                ))
            },
        };
        Ok(Spanned::new(Expr::Extern(kind), Span::combine(&start, &end_span)))
    }

    /// A closure literal: `{body}` with no parameters, or
    /// `[p1, ^p2]{body}` with an explicit parameter list. `^name`
    /// marks a parameter bound by reference.
    fn closure_expr(&mut self) -> Result<Spanned<Expr>, Syntax> {
        let mut params = vec![];
        let start = if self.check(&Token::OpenBracket) {
            let open = self.advance().span;
            self.skip_newlines();
            while !self.check(&Token::CloseBracket) {
                let by_ref = self.matches(&Token::Caret);
                let name = self.expect_ident("expected a parameter name")?;
                params.push(ParamDecl { name, by_ref });
                self.skip_newlines();
                if !self.matches(&Token::Comma) {
                    break;
                }
                self.skip_newlines();
            }
            self.expect(&Token::CloseBracket, "expected ']' to close parameter list")?;
            open
        } else {
            self.peek().span.clone()
        };

        self.push_fn_scope(&params);
        self.expect(&Token::OpenBrace, "expected '{' to begin closure body")?;
        let body = self.block_until(&Token::CloseBrace)?;
        let close = self.expect(&Token::CloseBrace, "expected '}' to close closure body")?.span;
        let captures = self.pop_fn_scope();

        Ok(Spanned::new(Expr::Closure { params, body, captures }, Span::combine(&start, &close)))
    }

    /// `(` has already been peeked. Disambiguates a tuple literal
    /// (`(a, b)` / `(a: 1)` / the empty tuple `()`) from a bare
    /// parenthesized sub-program (`(a = 1; a + 1)`), which runs
    /// directly in the current scope rather than spawning one of its
    /// own. A single positional element with no trailing comma or
    /// statement separator is just that expression, parenthesized.
    fn tuple_or_group(&mut self) -> Result<Spanned<Expr>, Syntax> {
        let open = self.expect(&Token::OpenParen, "expected '('")?.span;
        self.skip_newlines();

        if self.check(&Token::CloseParen) {
            let close = self.advance().span;
            return Ok(Spanned::new(Expr::Tuple(vec![]), Span::combine(&open, &close)));
        }

        let first = self.tuple_elem()?;

        if self.check(&Token::CloseParen) {
            let close = self.advance().span;
            let span = Span::combine(&open, &close);
            return Ok(match first {
                TupleElem::Positional(expr) => Spanned::new(expr.item, span),
                named => Spanned::new(Expr::Tuple(vec![named]), span),
            });
        }

        if self.check(&Token::Comma) {
            let mut elems = vec![first];
            while self.matches(&Token::Comma) {
                self.skip_newlines();
                if self.check(&Token::CloseParen) {
                    break;
                }
                elems.push(self.tuple_elem()?);
            }
            let close = self.expect(&Token::CloseParen, "expected ')' to close tuple")?.span;
            return Ok(Spanned::new(Expr::Tuple(elems), Span::combine(&open, &close)));
        }

        if matches!(self.peek_kind(), Token::Newline | Token::Semicolon) {
            let first_stmt = match first {
                TupleElem::Positional(expr) => expr,
                TupleElem::Named { .. } => {
                    return Err(self.error("a labeled element isn't a valid statement in a parenthesized group"))
                },
            };
            let mut stmts = vec![first_stmt];
            self.skip_terminators();
            while !self.check(&Token::CloseParen) {
                stmts.push(self.statement()?);
                if !self.check(&Token::CloseParen) {
                    if !matches!(self.peek_kind(), Token::Newline | Token::Semicolon) {
                        return Err(self.error("expected a statement separator"));
                    }
                    self.skip_terminators();
                }
            }
            let close = self.expect(&Token::CloseParen, "expected ')' to close group")?.span;
            return Ok(Spanned::new(Expr::Group(stmts), Span::combine(&open, &close)));
        }

        Err(self.error("expected ',', a statement separator, or ')'"))
    }

    fn tuple_elem(&mut self) -> Result<TupleElem, Syntax> {
        let checkpoint = self.pos;
        if let Token::Ident(name) = self.peek_kind().clone() {
            self.advance();
            if self.check(&Token::Colon) {
                self.advance();
                self.skip_newlines();
                let value = self.assignment()?;
                return Ok(TupleElem::Named { label: LabelExpr::Ident(name), value });
            }
            self.pos = checkpoint;
        } else if let Token::String(_) | Token::Int(_) = self.peek_kind().clone() {
            // a computed/literal label, e.g. `("x": 1)`
            let label_start = self.pos;
            let label_expr = self.unary()?;
            if self.check(&Token::Colon) {
                self.advance();
                self.skip_newlines();
                let value = self.assignment()?;
                return Ok(TupleElem::Named { label: LabelExpr::Computed(Box::new(label_expr)), value });
            }
            self.pos = label_start;
        }

        Ok(TupleElem::Positional(self.assignment()?))
    }
}
