//! Expression nodes.
//!
//! Every expression form that can appear in a type-checked Tern
//! function body has a variant here. Escape analysis matches on
//! [`ExprKind`] exhaustively, so adding a variant forces every
//! analysis to decide how to handle it.

use serde::{Deserialize, Serialize};
use tern_intern::Symbol;
use tern_span::Span;
use tern_types::{FnSig, Ty};

use crate::{FuncId, Module, NodeId, VarId};

/// A unary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    /// `+x`.
    Plus,
    /// `-x`.
    Neg,
    /// `^x` (bitwise complement).
    BitNot,
    /// `!x`.
    Not,
}

/// A binary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    /// `+` on numeric operands. String concatenation is
    /// [`ExprKind::ConcatStr`], not this.
    Add,
    /// `-`.
    Sub,
    /// `*`.
    Mul,
    /// `/`.
    Div,
    /// `%`.
    Rem,
    /// `&`.
    And,
    /// `|`.
    Or,
    /// `^`.
    Xor,
    /// `&^`.
    AndNot,
    /// `<<`.
    Shl,
    /// `>>`.
    Shr,
    /// `==`.
    Eq,
    /// `!=`.
    Ne,
    /// `<`.
    Lt,
    /// `<=`.
    Le,
    /// `>`.
    Gt,
    /// `>=`.
    Ge,
    /// `&&`.
    LogAnd,
    /// `||`.
    LogOr,
}

impl BinOp {
    /// Does this operator yield a boolean regardless of operand type?
    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }
}

/// A string conversion form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrConvKind {
    /// `string(b)` for a byte slice.
    BytesToStr,
    /// `[]byte(s)`.
    StrToBytes,
    /// `string(rs)` for a rune slice.
    RunesToStr,
    /// `[]rune(s)`.
    StrToRunes,
    /// `string(r)` for a single rune.
    RuneToStr,
}

impl StrConvKind {
    /// The result type of the conversion.
    #[must_use]
    pub fn result_ty(self) -> Ty {
        match self {
            Self::BytesToStr | Self::RunesToStr | Self::RuneToStr => Ty::String,
            Self::StrToBytes | Self::StrToRunes => Ty::slice(Ty::Int),
        }
    }
}

/// A compiler builtin with bespoke call semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Builtin {
    /// `append(s, xs...)`.
    Append,
    /// `copy(dst, src)`.
    Copy,
    /// `delete(m, k)`.
    Delete,
    /// `panic(v)`.
    Panic,
    /// `recover()`.
    Recover,
    /// `print(args...)`.
    Print,
    /// `println(args...)`.
    Println,
    /// `close(ch)`.
    Close,
    /// `len(x)`.
    Len,
    /// `cap(x)`.
    Cap,
}

/// How a call resolves its callee.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Callee {
    /// Direct call to a statically known function. Method calls
    /// resolve here too, with the receiver as argument zero.
    Fn(FuncId),
    /// Direct call of a closure literal appearing in call position.
    /// The expression's kind must be [`ExprKind::Closure`].
    Closure(Box<Expr>),
    /// Indirect call through a function value or interface method;
    /// the concrete callee is unknowable at compile time.
    Indirect(Box<Expr>),
    /// A compiler builtin.
    Builtin(Builtin),
}

/// A call expression.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallExpr {
    /// Node identity, used to key synthesized variadic allocations.
    pub id: NodeId,
    /// The callee.
    pub callee: Callee,
    /// The arguments, receiver first for method calls.
    pub args: Vec<Expr>,
    /// True if the final argument is spread (`xs...`) into a
    /// variadic parameter.
    pub spread: bool,
}

impl CallExpr {
    /// The callee signature, when statically known. Builtins have
    /// none.
    #[must_use]
    pub fn sig<'m>(&self, module: &'m Module) -> Option<FnSig> {
        match &self.callee {
            Callee::Fn(f) => Some(module.funcs[*f].sig.clone()),
            Callee::Closure(e) => match &e.kind {
                ExprKind::Closure { func, .. } => Some(module.funcs[*func].sig.clone()),
                _ => panic!("Callee::Closure without closure literal"),
            },
            Callee::Indirect(e) => match e.ty(module) {
                Ty::Func(sig) => Some(*sig),
                ty => panic!("indirect call through non-function type {ty:?}"),
            },
            Callee::Builtin(_) => {
                let _ = module;
                None
            }
        }
    }

    /// The single result type of this call, if it has exactly one
    /// result (or is a value-producing builtin).
    #[must_use]
    pub fn result_ty(&self, module: &Module) -> Option<Ty> {
        match &self.callee {
            Callee::Builtin(b) => match b {
                Builtin::Append => Some(self.args[0].ty(module)),
                Builtin::Copy | Builtin::Len | Builtin::Cap => Some(Ty::Int),
                Builtin::Recover => Some(Ty::Interface),
                Builtin::Delete
                | Builtin::Panic
                | Builtin::Print
                | Builtin::Println
                | Builtin::Close => None,
            },
            _ => {
                let sig = self.sig(module)?;
                if sig.results.len() == 1 {
                    Some(sig.results[0].ty.clone())
                } else {
                    None
                }
            }
        }
    }
}

/// A captured variable in a closure literal.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Capture {
    /// The capture alias declared in the closure function
    /// ([`crate::VarDecl::captured_from`] points at the outer
    /// declaration).
    pub alias: VarId,
    /// True if captured by value; false if captured by reference.
    pub by_value: bool,
}

/// An expression with its source span.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Expr {
    /// The expression form.
    pub kind: ExprKind,
    /// Source position.
    pub span: Span,
}

/// The expression forms.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ExprKind {
    /// The blank identifier `_`, valid only as an assignment target.
    Blank,
    /// A reference to a declared variable (or capture alias).
    Var(VarId),
    /// A package-level variable; its storage outlives every frame.
    Global {
        /// The global's name.
        name: Symbol,
        /// The global's type.
        ty: Ty,
    },
    /// A reference to a top-level function by name.
    FuncRef(FuncId),
    /// A literal constant of scalar or string type.
    Const(Ty),
    /// A unary operation.
    Unary {
        /// The operator.
        op: UnOp,
        /// The operand.
        operand: Box<Expr>,
    },
    /// A binary operation.
    Binary {
        /// The operator.
        op: BinOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// `&x`.
    Addr(Box<Expr>),
    /// `*p`.
    Deref(Box<Expr>),
    /// Field selection `x.f`, or `p.f` through a pointer.
    Field {
        /// The base expression.
        base: Box<Expr>,
        /// The field name.
        name: Symbol,
        /// True if the base is a pointer and the access dereferences.
        through_ptr: bool,
    },
    /// Type assertion `x.(T)`.
    TypeAssert {
        /// Node identity.
        id: NodeId,
        /// The interface operand.
        base: Box<Expr>,
        /// The asserted type.
        ty: Ty,
    },
    /// Indexing an array or slice.
    Index {
        /// The base expression.
        base: Box<Expr>,
        /// The index expression.
        index: Box<Expr>,
    },
    /// Indexing a map.
    IndexMap {
        /// The map expression.
        base: Box<Expr>,
        /// The key expression.
        index: Box<Expr>,
    },
    /// Slicing `a[lo:hi]` / `a[lo:hi:max]`, on arrays, slices,
    /// pointers-to-array, or strings.
    SliceExpr {
        /// The base expression.
        base: Box<Expr>,
        /// The low bound, if present.
        lo: Option<Box<Expr>>,
        /// The high bound, if present.
        hi: Option<Box<Expr>>,
        /// The capacity bound for the 3-index form.
        max: Option<Box<Expr>>,
    },
    /// A value conversion that does not allocate.
    Conv {
        /// The operand.
        operand: Box<Expr>,
        /// The target type.
        ty: Ty,
    },
    /// Conversion of a concrete value into an interface, possibly
    /// boxing it.
    ConvIface {
        /// Node identity for the box allocation.
        id: NodeId,
        /// The concrete operand.
        operand: Box<Expr>,
    },
    /// Channel receive `<-ch`.
    Recv(Box<Expr>),
    /// A function or builtin call.
    Call(CallExpr),
    /// `new(T)`.
    New {
        /// Node identity for the allocation.
        id: NodeId,
        /// The pointee type.
        elem: Ty,
    },
    /// `make([]T, len[, cap])`.
    MakeSlice {
        /// Node identity for the backing array allocation.
        id: NodeId,
        /// The element type.
        elem: Ty,
        /// The length expression.
        len: Box<Expr>,
        /// The capacity expression, if given.
        cap: Option<Box<Expr>>,
        /// The length when it is a compile-time constant.
        const_len: Option<u64>,
    },
    /// `make(map[K]V)`.
    MakeMap {
        /// Node identity for the map header allocation.
        id: NodeId,
        /// Key type.
        key: Ty,
        /// Value type.
        value: Ty,
    },
    /// `make(chan T[, n])`. Channel storage is always heap-managed
    /// by the runtime, so there is no allocation site to track.
    MakeChan {
        /// Element type.
        elem: Ty,
        /// Buffer size expression, if given.
        size: Option<Box<Expr>>,
    },
    /// An array literal `[N]T{...}`; storage is inline.
    ArrayLit {
        /// Element expressions.
        elems: Vec<Expr>,
        /// The element type.
        elem: Ty,
        /// The array length.
        len: u64,
    },
    /// A slice literal `[]T{...}`; allocates a backing array.
    SliceLit {
        /// Node identity for the backing array.
        id: NodeId,
        /// Element expressions.
        elems: Vec<Expr>,
        /// The element type.
        elem: Ty,
    },
    /// A struct literal `T{...}`; storage is inline.
    StructLit {
        /// Field name/value pairs.
        fields: Vec<(Symbol, Expr)>,
        /// The struct type.
        ty: Ty,
    },
    /// A map literal; keys and values land in heap bucket storage.
    MapLit {
        /// Node identity for the map allocation.
        id: NodeId,
        /// Key/value entry pairs.
        entries: Vec<(Expr, Expr)>,
        /// Key type.
        key: Ty,
        /// Value type.
        value: Ty,
    },
    /// A pointer literal `&T{...}`; allocates storage for the inner
    /// literal.
    PtrLit {
        /// Node identity for the allocation.
        id: NodeId,
        /// The inner composite literal.
        inner: Box<Expr>,
    },
    /// A closure literal.
    Closure {
        /// Node identity for the closure object.
        id: NodeId,
        /// The closure's function.
        func: FuncId,
        /// Captured variables.
        captures: Vec<Capture>,
    },
    /// A string/byte/rune conversion that copies its data.
    StrConv {
        /// Node identity for the copied backing storage.
        id: NodeId,
        /// The operand.
        operand: Box<Expr>,
        /// The conversion form.
        kind: StrConvKind,
    },
    /// String concatenation; allocates the result.
    ConcatStr {
        /// Node identity for the result storage.
        id: NodeId,
        /// The operand strings.
        operands: Vec<Expr>,
    },
    /// A method value `x.M`, closing over the receiver.
    MethodValue {
        /// Node identity for the bound-method object.
        id: NodeId,
        /// The receiver expression.
        base: Box<Expr>,
        /// The method name.
        method: Symbol,
        /// The resulting function signature.
        sig: Box<FnSig>,
    },
}

impl Expr {
    /// Wrap a kind with a span.
    #[must_use]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Wrap a kind with a dummy span, for synthesized nodes and
    /// tests.
    #[must_use]
    pub fn synth(kind: ExprKind) -> Self {
        Self::new(kind, Span::DUMMY)
    }

    /// A variable reference.
    #[must_use]
    pub fn var(id: VarId) -> Self {
        Self::synth(ExprKind::Var(id))
    }

    /// The blank identifier.
    #[must_use]
    pub fn blank() -> Self {
        Self::synth(ExprKind::Blank)
    }

    /// A literal of the given type.
    #[must_use]
    pub fn lit(ty: Ty) -> Self {
        Self::synth(ExprKind::Const(ty))
    }

    /// `&e`.
    #[must_use]
    pub fn addr(e: Expr) -> Self {
        Self::synth(ExprKind::Addr(Box::new(e)))
    }

    /// `*e`.
    #[must_use]
    pub fn deref(e: Expr) -> Self {
        Self::synth(ExprKind::Deref(Box::new(e)))
    }

    /// `e.name` on a struct value.
    #[must_use]
    pub fn field(base: Expr, name: &str) -> Self {
        Self::synth(ExprKind::Field {
            base: Box::new(base),
            name: Symbol::intern(name),
            through_ptr: false,
        })
    }

    /// `p.name` through a pointer.
    #[must_use]
    pub fn field_ptr(base: Expr, name: &str) -> Self {
        Self::synth(ExprKind::Field {
            base: Box::new(base),
            name: Symbol::intern(name),
            through_ptr: true,
        })
    }

    /// `base[index]` on an array or slice.
    #[must_use]
    pub fn index(base: Expr, index: Expr) -> Self {
        Self::synth(ExprKind::Index {
            base: Box::new(base),
            index: Box::new(index),
        })
    }

    /// The type of this expression.
    ///
    /// The IR is explicitly typed, so this is a structural
    /// computation.
    ///
    /// # Panics
    ///
    /// Panics on malformed IR (e.g. a field access naming a missing
    /// field), which indicates a bug in an earlier pass.
    #[must_use]
    pub fn ty(&self, m: &Module) -> Ty {
        match &self.kind {
            ExprKind::Blank => panic!("blank identifier has no type"),
            ExprKind::Var(v) => m.vars[*v].ty.clone(),
            ExprKind::Global { ty, .. } => ty.clone(),
            ExprKind::FuncRef(f) => Ty::Func(Box::new(m.funcs[*f].sig.clone())),
            ExprKind::Const(ty) => ty.clone(),
            ExprKind::Unary { operand, .. } => operand.ty(m),
            ExprKind::Binary { op, lhs, .. } => {
                if op.is_comparison() || matches!(op, BinOp::LogAnd | BinOp::LogOr) {
                    Ty::Bool
                } else {
                    lhs.ty(m)
                }
            }
            ExprKind::Addr(e) => Ty::ptr(e.ty(m)),
            ExprKind::Deref(e) => e.ty(m).elem().clone(),
            ExprKind::Field {
                base,
                name,
                through_ptr,
            } => {
                let base_ty = base.ty(m);
                let struct_ty = if *through_ptr { base_ty.elem().clone() } else { base_ty };
                match struct_ty {
                    Ty::Struct(fields) => fields
                        .into_iter()
                        .find(|f| f.name == *name)
                        .map(|f| f.ty)
                        .unwrap_or_else(|| panic!("no field {name} on struct")),
                    ty => panic!("field access on non-struct type {ty:?}"),
                }
            }
            ExprKind::TypeAssert { ty, .. } => ty.clone(),
            ExprKind::Index { base, .. } => match base.ty(m) {
                Ty::Array(e, _) | Ty::Slice(e) => *e,
                Ty::String => Ty::Int,
                ty => panic!("index on non-indexable type {ty:?}"),
            },
            ExprKind::IndexMap { base, .. } => match base.ty(m) {
                Ty::Map(_, v) => *v,
                ty => panic!("map index on non-map type {ty:?}"),
            },
            ExprKind::SliceExpr { base, .. } => match base.ty(m) {
                Ty::Slice(e) => Ty::Slice(e),
                Ty::Array(e, _) => Ty::Slice(e),
                Ty::Ptr(inner) => match *inner {
                    Ty::Array(e, _) => Ty::Slice(e),
                    ty => panic!("slice of pointer to non-array {ty:?}"),
                },
                Ty::String => Ty::String,
                ty => panic!("slice of non-sliceable type {ty:?}"),
            },
            ExprKind::Conv { ty, .. } => ty.clone(),
            ExprKind::ConvIface { .. } => Ty::Interface,
            ExprKind::Recv(ch) => match ch.ty(m) {
                Ty::Chan(e) => *e,
                ty => panic!("receive from non-channel type {ty:?}"),
            },
            ExprKind::Call(call) => call
                .result_ty(m)
                .unwrap_or_else(|| Ty::Struct(Vec::new())),
            ExprKind::New { elem, .. } => Ty::ptr(elem.clone()),
            ExprKind::MakeSlice { elem, .. } => Ty::slice(elem.clone()),
            ExprKind::MakeMap { key, value, .. } => {
                Ty::Map(Box::new(key.clone()), Box::new(value.clone()))
            }
            ExprKind::MakeChan { elem, .. } => Ty::Chan(Box::new(elem.clone())),
            ExprKind::ArrayLit { elem, len, .. } => Ty::array(elem.clone(), *len),
            ExprKind::SliceLit { elem, .. } => Ty::slice(elem.clone()),
            ExprKind::StructLit { ty, .. } => ty.clone(),
            ExprKind::MapLit { key, value, .. } => {
                Ty::Map(Box::new(key.clone()), Box::new(value.clone()))
            }
            ExprKind::PtrLit { inner, .. } => Ty::ptr(inner.ty(m)),
            ExprKind::Closure { func, .. } => Ty::Func(Box::new(m.funcs[*func].sig.clone())),
            ExprKind::StrConv { kind, .. } => kind.result_ty(),
            ExprKind::ConcatStr { .. } => Ty::String,
            ExprKind::MethodValue { sig, .. } => Ty::Func(sig.clone()),
        }
    }
}
