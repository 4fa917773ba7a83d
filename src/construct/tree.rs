use crate::common::span::Spanned;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// A single element of a tuple literal: either a bare positional
/// expression, or a `label: expr` named member. `label` is itself an
/// expression so that `(x: 1)` and `("x": 1)` both name the same
/// member once evaluated and stringified.
#[derive(Debug, Clone)]
pub enum TupleElem {
    Positional(Spanned<Expr>),
    Named { label: LabelExpr, value: Spanned<Expr> },
}

#[derive(Debug, Clone)]
pub enum LabelExpr {
    Ident(String),
    Computed(Box<Spanned<Expr>>),
}

/// The key half of a dot-access: `.0` indexes positionally, `.name`
/// or `.(expr)` accesses a named member.
#[derive(Debug, Clone)]
pub enum DotKey {
    Index(i64),
    Name(String),
    Computed(Box<Spanned<Expr>>),
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    Ident(String),
    Member { target: Box<Spanned<Expr>>, key: DotKey },
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    pub by_ref: bool,
}

/// An argument at a call site `f[...]`: `^name` passes the callee a
/// live reference rather than an evaluated copy.
#[derive(Debug, Clone)]
pub enum CallArg {
    Value(Spanned<Expr>),
    Ref(String),
}

#[derive(Debug, Clone)]
pub enum ExternKind {
    /// `extern "expr"` evaluates a host expression.
    Expr(String),
    /// `extern """block"""` executes a host statement block and
    /// exposes its locals as a tuple of named members.
    Block(String),
}

/// A branch of a `cond`/`cond-else` chain: the `if`/`elif` condition
/// paired with its body statements.
#[derive(Debug, Clone)]
pub struct CondArm {
    pub cond: Spanned<Expr>,
    pub body: Vec<Spanned<Expr>>,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),

    /// A bare identifier reference — the *evaluation* form. Reading it
    /// resolves the Ref and invokes the value with zero arguments
    /// (a no-op for anything but a zero-parameter closure). The one
    /// exception is a `Call` whose callee is syntactically this node:
    /// there, the evaluator reads the Ref without invoking it first.
    Ident(String),

    Tuple(Vec<TupleElem>),

    /// A sequence of statements evaluated in order in the *current*
    /// scope — no fresh `Env` is spawned. Used for closure bodies and
    /// the top-level program; the value is the last statement's value
    /// (`nil` if empty).
    Block(Vec<Spanned<Expr>>),

    /// A parenthesized sub-program: `(a = 1; a + 1)`. Identical in
    /// evaluation to `Block` — kept as a distinct node only to mirror
    /// where the grammar produced it (bare parenthesization, as
    /// opposed to a closure body or the program root).
    Group(Vec<Spanned<Expr>>),

    /// `if cond [then]? body (elif cond [then]? body)* (else body)? end`.
    /// `arms[0]` is the `if` arm; any further arms are `elif`s. A
    /// branch fires only when its condition is exactly `true`.
    Cond { arms: Vec<CondArm>, else_body: Option<Vec<Spanned<Expr>>> },

    /// `loop cond ... end` — a true while-loop: the condition is
    /// re-evaluated before every iteration, and the loop continues
    /// until it is exactly `false`.
    Loop { cond: Box<Spanned<Expr>>, body: Vec<Spanned<Expr>> },

    Break,
    Continue,
    Return(Option<Box<Spanned<Expr>>>),

    Assign {
        target: AssignTarget,
        value: Box<Spanned<Expr>>,
    },

    /// `^name = expr` — writes through to `name` in the defining
    /// scope of the enclosing closure rather than binding a new local.
    UpvalAssign {
        name: String,
        value: Box<Spanned<Expr>>,
    },

    /// `target += expr` and friends: reads `target`, applies the
    /// binary op against the evaluated right-hand side, writes back.
    OpAssign {
        op: BinOp,
        target: AssignTarget,
        value: Box<Spanned<Expr>>,
    },

    BinOp {
        op: BinOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },

    UnOp {
        op: UnOp,
        operand: Box<Spanned<Expr>>,
    },

    /// `f[a, b]` — invocation. When `callee` is itself `Expr::Ident`,
    /// the evaluator reads that name's Ref without the usual
    /// zero-argument auto-invoke, then applies `args`.
    Call {
        callee: Box<Spanned<Expr>>,
        args: Vec<CallArg>,
    },

    /// A closure literal: `{body}` (no params) or `[p1, p2]{body}`.
    Closure {
        params: Vec<ParamDecl>,
        body: Vec<Spanned<Expr>>,
        /// Names captured from enclosing scopes, computed by the
        /// parser's capture analysis so the evaluator doesn't need to
        /// walk the body looking for free variables at call time.
        captures: Vec<String>,
    },

    DotAccess {
        target: Box<Spanned<Expr>>,
        key: DotKey,
    },

    Namespace {
        name: String,
        body: Vec<Spanned<Expr>>,
    },

    Import {
        path: String,
    },

    Extern(ExternKind),
}
