//! Statement nodes.
//!
//! Statement forms mirror the surface language after type checking
//! and desugaring. Multi-value forms are explicit: a call feeding
//! several destinations is [`StmtKind::AssignCall`], a comma-ok
//! operation is [`StmtKind::AssignOk`], and everything else uses the
//! parallel-assignment form [`StmtKind::AssignMulti`].

use serde::{Deserialize, Serialize};
use tern_intern::Symbol;
use tern_span::Span;
use tern_types::Ty;

use crate::{CallExpr, Expr, VarId};

/// A statement with its source span.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stmt {
    /// The statement form.
    pub kind: StmtKind,
    /// Source position.
    pub span: Span,
}

/// One arm of a `switch`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwitchCase {
    /// Case values; empty for `default`.
    pub values: Vec<Expr>,
    /// The arm body.
    pub body: Vec<Stmt>,
}

/// One arm of a type switch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeSwitchCase {
    /// The per-arm binding of the scrutinee, if the switch declares
    /// one.
    pub binding: Option<VarId>,
    /// The matched type; `None` for `default` and interface-typed
    /// arms keep the scrutinee's dynamic type.
    pub ty: Option<Ty>,
    /// The arm body.
    pub body: Vec<Stmt>,
}

/// One arm of a `select`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectCase {
    /// The communication clause; `None` for `default`.
    pub comm: Option<Box<Stmt>>,
    /// The arm body.
    pub body: Vec<Stmt>,
}

/// The statement forms.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StmtKind {
    /// A variable declaration without initializer. Declarations with
    /// initializers desugar to a declaration plus [`StmtKind::Assign`].
    Decl(VarId),
    /// A braced block.
    Block(Vec<Stmt>),
    /// An `if` with optional `else`.
    If {
        /// The condition.
        cond: Expr,
        /// The then branch.
        then: Vec<Stmt>,
        /// The else branch.
        els: Vec<Stmt>,
    },
    /// A `for` loop. The init clause is desugared into the enclosing
    /// block before the loop.
    For {
        /// The condition; `None` for `for {}`.
        cond: Option<Expr>,
        /// The post statement.
        post: Option<Box<Stmt>>,
        /// The loop body.
        body: Vec<Stmt>,
    },
    /// A `for range` loop.
    Range {
        /// The ranged expression.
        expr: Expr,
        /// The key (or index) binding target, if any. [`Expr`] rather
        /// than [`VarId`] so that `for m[k] = range ...` forms fit.
        key: Option<Expr>,
        /// The value binding target, if any.
        value: Option<Expr>,
        /// The loop body.
        body: Vec<Stmt>,
    },
    /// A statement label.
    Label(Symbol),
    /// `goto L`.
    Goto(Symbol),
    /// `break`, with optional label.
    Break(Option<Symbol>),
    /// `continue`, with optional label.
    Continue(Option<Symbol>),
    /// An expression `switch`.
    Switch {
        /// The tag expression; `None` for `switch { ... }`.
        tag: Option<Expr>,
        /// The arms.
        cases: Vec<SwitchCase>,
    },
    /// A type switch.
    TypeSwitch {
        /// The interface scrutinee.
        scrut: Expr,
        /// The arms.
        cases: Vec<TypeSwitchCase>,
    },
    /// A `select`.
    Select {
        /// The arms.
        cases: Vec<SelectCase>,
    },
    /// A channel send `ch <- v`.
    Send {
        /// The channel.
        chan: Expr,
        /// The sent value.
        value: Expr,
    },
    /// A single assignment `dst = src`.
    Assign {
        /// The destination.
        dst: Expr,
        /// The source.
        src: Expr,
    },
    /// A parallel assignment `a, b = x, y`. Destination and source
    /// lists have equal length.
    AssignMulti {
        /// The destinations.
        dsts: Vec<Expr>,
        /// The sources.
        srcs: Vec<Expr>,
    },
    /// A comma-ok assignment: map index, channel receive, or type
    /// assertion in two-value form.
    AssignOk {
        /// The value destination.
        dst: Expr,
        /// The boolean destination.
        ok: Expr,
        /// The source operation.
        src: Expr,
    },
    /// A multi-result call feeding several destinations,
    /// `a, b = f()`.
    AssignCall {
        /// The destinations, one per result.
        dsts: Vec<Expr>,
        /// The call.
        call: CallExpr,
    },
    /// `return`, with the result values. Bare returns of named
    /// results desugar to explicit values.
    Return(Vec<Expr>),
    /// An expression evaluated for effect, usually a call.
    ExprStmt(Expr),
    /// `go f(...)`.
    Spawn(CallExpr),
    /// `defer f(...)`.
    Defer(CallExpr),
}

impl Stmt {
    /// Wrap a kind with a span.
    #[must_use]
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Wrap a kind with a dummy span, for synthesized nodes and
    /// tests.
    #[must_use]
    pub fn synth(kind: StmtKind) -> Self {
        Self::new(kind, Span::DUMMY)
    }

    /// `dst = src`.
    #[must_use]
    pub fn assign(dst: Expr, src: Expr) -> Self {
        Self::synth(StmtKind::Assign { dst, src })
    }

    /// `return e, ...`.
    #[must_use]
    pub fn ret(values: Vec<Expr>) -> Self {
        Self::synth(StmtKind::Return(values))
    }

    /// An expression statement.
    #[must_use]
    pub fn expr(e: Expr) -> Self {
        Self::synth(StmtKind::ExprStmt(e))
    }
}
