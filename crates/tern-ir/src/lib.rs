//! # Tern middle-end IR
//!
//! This crate defines the type-checked intermediate representation
//! consumed by the middle-end analyses, most importantly escape
//! analysis. The IR is a closed sum: statements and expressions are
//! tagged variants ([`StmtKind`], [`ExprKind`]) so that analyses can
//! match exhaustively and the compiler catches a missing case at
//! build time rather than at runtime.
//!
//! ## Shape
//!
//! A [`Module`] owns every function ([`Func`]) and every declared
//! variable ([`VarDecl`]) in the compilation unit, keyed by stable
//! integer IDs. Function bodies are statement lists; expressions
//! reference variables by [`VarId`] and nested functions (closures)
//! by [`FuncId`]. Allocation sites (e.g. `new`, composite literals,
//! closures) carry a [`NodeId`] so that analysis results can be
//! recorded in side tables without mutating the IR.
//!
//! ## Closures
//!
//! A closure is an ordinary [`Func`] with `parent` set. Captured
//! variables appear inside the closure body as capture aliases:
//! variables whose [`VarDecl::captured_from`] points at the defining
//! declaration in an enclosing function. Analyses canonicalize
//! aliases to that outer declaration, so a variable has exactly one
//! identity no matter how many nested closures reference it.

#![warn(missing_docs)]

pub mod build;
pub mod expr;
pub mod stmt;

pub use build::{BuildError, ModuleBuilder};
pub use expr::{BinOp, Builtin, Callee, CallExpr, Capture, Expr, ExprKind, StrConvKind, UnOp};
pub use stmt::{SelectCase, Stmt, StmtKind, SwitchCase, TypeSwitchCase};

use serde::{Deserialize, Serialize};
use tern_index::{newtype_index, IndexVec};
use tern_intern::Symbol;
use tern_span::Span;
use tern_types::{FnSig, Ty};

newtype_index! {
    /// A function in the module.
    pub struct FuncId
}

newtype_index! {
    /// A declared variable (parameter, result, or local).
    pub struct VarId
}

newtype_index! {
    /// An expression node with analysis-relevant identity, e.g. an
    /// allocation site. Side tables key on this.
    pub struct NodeId
}

bitflags::bitflags! {
    /// Function-level pragmas affecting escape analysis.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Pragma: u8 {
        /// The function is externally implemented and promises not to
        /// retain any pointer passed to it. Only meaningful on
        /// body-less functions.
        const NOESCAPE = 1 << 0;
        /// `uintptr` arguments are really pointers and must be
        /// treated as escaping raw pointers at call sites.
        const UINTPTR_ESCAPES = 1 << 1;
    }
}

/// The storage class of a declared variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Class {
    /// A function parameter, with its position in the signature.
    Param(u16),
    /// A named result, with its position in the result list.
    Result(u16),
    /// A function-local variable.
    Local,
}

impl Class {
    /// Is this a parameter?
    #[must_use]
    pub fn is_param(self) -> bool {
        matches!(self, Self::Param(_))
    }

    /// Is this a named result?
    #[must_use]
    pub fn is_result(self) -> bool {
        matches!(self, Self::Result(_))
    }
}

/// A declared variable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VarDecl {
    /// The variable name.
    pub name: Symbol,
    /// The declared type.
    pub ty: Ty,
    /// Parameter, result, or local.
    pub class: Class,
    /// The function that declares this variable.
    pub owner: FuncId,
    /// For capture aliases inside closures: the defining declaration
    /// in an enclosing function. `None` for ordinary variables.
    pub captured_from: Option<VarId>,
    /// Declaration position.
    pub span: Span,
}

/// A function declaration.
///
/// `body` is `None` for externally implemented (e.g. assembly)
/// functions; those are never analyzed, only tagged.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Func {
    /// The function name.
    pub name: Symbol,
    /// The signature. For methods the receiver is parameter zero.
    pub sig: FnSig,
    /// Parameter variables, in signature order.
    pub params: Vec<VarId>,
    /// Result variables, in signature order.
    pub results: Vec<VarId>,
    /// All declared variables: params, results, then locals in
    /// declaration order. Capture aliases are not listed here.
    pub dcl: Vec<VarId>,
    /// The body, or `None` for external functions.
    pub body: Option<Vec<Stmt>>,
    /// Pragmas attached to the declaration.
    pub pragma: Pragma,
    /// The enclosing function, for closures.
    pub parent: Option<FuncId>,
    /// True if some closure literal for this function appears
    /// directly in call position (`f := func() {...}()` style).
    pub called_directly: bool,
    /// Declaration position.
    pub span: Span,
}

impl Func {
    /// Is this function externally implemented (no body)?
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.body.is_none()
    }

    /// Is this function a closure?
    #[must_use]
    pub fn is_closure(&self) -> bool {
        self.parent.is_some()
    }
}

/// A compilation unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Module {
    /// All functions, closures included.
    pub funcs: IndexVec<FuncId, Func>,
    /// All declared variables, across all functions.
    pub vars: IndexVec<VarId, VarDecl>,
    /// Number of [`NodeId`]s handed out; IDs at or above this value
    /// are free for passes to synthesize.
    pub num_nodes: u32,
}

impl Module {
    /// The canonical declaration a variable logically refers to:
    /// capture aliases resolve to their defining outer declaration.
    ///
    /// # Panics
    ///
    /// Panics if an alias points at another alias; the builder
    /// rejects such chains, so this indicates a malformed module.
    #[must_use]
    pub fn canonical_var(&self, v: VarId) -> VarId {
        match self.vars[v].captured_from {
            None => v,
            Some(outer) => {
                assert!(
                    self.vars[outer].captured_from.is_none(),
                    "capture alias {v:?} resolves to another alias {outer:?}"
                );
                outer
            }
        }
    }

    /// Does function `f` transitively enclose function `c`?
    ///
    /// Returns false when `f == c`.
    #[must_use]
    pub fn contains_closure(&self, f: FuncId, c: FuncId) -> bool {
        if f == c {
            return false;
        }
        let mut cur = self.funcs[c].parent;
        while let Some(p) = cur {
            if p == f {
                return true;
            }
            cur = self.funcs[p].parent;
        }
        false
    }

    /// The name of result `i` of `f`, for diagnostics. Unnamed
    /// results render as `~rI`.
    #[must_use]
    pub fn result_name(&self, f: FuncId, i: usize) -> String {
        match self.funcs[f].sig.results.get(i).and_then(|r| r.name) {
            Some(name) => name.as_str().to_owned(),
            None => format!("~r{i}"),
        }
    }
}
