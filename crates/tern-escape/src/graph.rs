//! Locations, holes, and the data-flow graph.
//!
//! The analysis abstracts every variable and allocation site into a
//! [`Location`]. Assignments become weighted edges between locations:
//! the weight counts dereferences on the source path, with -1 meaning
//! the address of the source was taken. A [`Hole`] is the evaluation
//! context of an expression, i.e. the destination location plus the
//! dereference count accumulated so far.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tern_index::{newtype_index, IndexVec};
use tern_intern::Symbol;
use tern_ir::{Class, FuncId, Module, NodeId, VarId};
use tern_session::Session;
use tern_span::Span;
use tern_types::Ty;
use tracing::trace;

use crate::finish::EscapeResults;
use crate::leaks::{Leaks, ParamTag};

newtype_index! {
    /// An abstract storage location in the per-batch flow graph.
    pub struct LocId
}

/// What a location stands for.
#[derive(Clone, Debug)]
pub enum LocNode {
    /// A declared variable, canonicalized across closure captures.
    Var(VarId),
    /// An allocation site.
    Alloc {
        /// The site's IR identity.
        id: NodeId,
        /// What kind of storage the site allocates.
        kind: AllocKind,
        /// Source position, for diagnostics.
        span: Span,
    },
}

/// The allocation forms a location can represent.
#[derive(Clone, Debug)]
pub enum AllocKind {
    /// `new(T)`.
    New(Ty),
    /// The backing array of a `make([]T, ...)`.
    MakeSlice {
        /// Element type.
        elem: Ty,
        /// The length when it is a compile-time constant.
        const_len: Option<u64>,
    },
    /// A `make(map...)` header.
    MakeMap,
    /// The backing array of a slice literal.
    SliceLit(Ty),
    /// A map literal.
    MapLit,
    /// The storage behind `&T{...}`.
    PtrLit(Ty),
    /// A closure object.
    Closure,
    /// A bound method value.
    MethodValue,
    /// Copied storage of a string conversion.
    StrConv,
    /// The result of string concatenation.
    ConcatStr,
    /// The box allocated when a non-pointer-shaped value is converted
    /// to an interface.
    IfaceBox(Ty),
    /// The synthesized array collecting variadic arguments.
    Variadic,
}

impl std::fmt::Display for AllocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocKind::New(t) => write!(f, "new({t})"),
            AllocKind::MakeSlice { elem, .. } => write!(f, "make([]{elem})"),
            AllocKind::MakeMap => f.write_str("make(map)"),
            AllocKind::SliceLit(t) => write!(f, "[]{t} literal"),
            AllocKind::MapLit => f.write_str("map literal"),
            AllocKind::PtrLit(t) => write!(f, "&{t} literal"),
            AllocKind::Closure => f.write_str("func literal"),
            AllocKind::MethodValue => f.write_str("bound method value"),
            AllocKind::StrConv => f.write_str("string conversion"),
            AllocKind::ConcatStr => f.write_str("string concatenation"),
            AllocKind::IfaceBox(t) => write!(f, "{t} value in interface"),
            AllocKind::Variadic => f.write_str("... argument"),
        }
    }
}

/// An incoming flow edge: values of `src`, behind `derefs`
/// dereferences, are stored into the owning location.
#[derive(Clone, Copy, Debug)]
pub struct Edge {
    /// The source location.
    pub src: LocId,
    /// Dereference count; -1 means address-of.
    pub derefs: i32,
}

/// An abstract storage location.
#[derive(Debug)]
pub struct Location {
    /// What this location stands for, if anything user-visible.
    pub node: Option<LocNode>,
    /// The function whose frame would hold this location.
    pub curfn: Option<FuncId>,
    /// Loop nesting depth at the point of declaration.
    pub loop_depth: u32,
    /// Incoming flow edges.
    pub edges: SmallVec<[Edge; 4]>,

    // Solver state, reset per walk via the generation counter.
    pub(crate) walkgen: u32,
    pub(crate) derefs: i32,

    /// The location's storage must outlive its frame.
    pub escapes: bool,
    /// The location only needs to live until the enclosing statement
    /// completes, e.g. a closure that is immediately called.
    pub transient: bool,
    /// Leak summary, populated for parameter locations.
    pub param_esc: Leaks,
}

impl Location {
    fn new(node: Option<LocNode>, curfn: Option<FuncId>, loop_depth: u32, transient: bool) -> Self {
        Location {
            node,
            curfn,
            loop_depth,
            edges: SmallVec::new(),
            walkgen: 0,
            derefs: 0,
            escapes: false,
            transient,
            param_esc: Leaks::NONE,
        }
    }

    /// True if the location is the given variable with the matching
    /// storage class predicate.
    pub fn is_var_where(&self, module: &Module, pred: impl Fn(Class) -> bool) -> Option<VarId> {
        match self.node {
            Some(LocNode::Var(v)) if pred(module.vars[v].class) => Some(v),
            _ => None,
        }
    }
}

/// The evaluation context for an expression: evaluating `x` in
/// `l = **x` uses a hole with `dst = l` and `derefs = 2`.
#[derive(Clone, Copy, Debug)]
pub struct Hole {
    /// The destination location.
    pub dst: LocId,
    /// Accumulated dereference count; -1 after an address-of.
    pub derefs: i32,
}

impl Hole {
    /// Shift the dereference count.
    ///
    /// # Panics
    ///
    /// Panics if the count would drop below -1; a second address-of
    /// is not expressible and indicates malformed IR.
    #[must_use]
    pub fn shift(mut self, delta: i32) -> Hole {
        self.derefs += delta;
        assert!(self.derefs >= -1, "derefs underflow: {}", self.derefs);
        self
    }

    /// The context one dereference deeper, as in `l = *x`.
    #[must_use]
    pub fn deref(self) -> Hole {
        self.shift(1)
    }

    /// The address-of context, as in `l = &x`.
    #[must_use]
    pub fn addr(self) -> Hole {
        self.shift(-1)
    }

    /// The context after a type assertion to `ty`: asserting to a
    /// concrete type that is not pointer-shaped copies the value out
    /// of the interface box, which costs a dereference.
    #[must_use]
    pub fn dottype(self, ty: &Ty) -> Hole {
        if !ty.is_interface() && !ty.is_direct_iface() {
            self.shift(1)
        } else {
            self
        }
    }
}

/// How far along the analysis of a function has gotten. Call
/// modeling uses this to decide between wiring a callee directly into
/// the graph (same batch) and consulting its tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnState {
    /// Not yet scheduled.
    Unknown,
    /// Locations allocated for this batch.
    Planned,
    /// Body walk in progress or done, flood pending.
    Started,
    /// Analysis complete; parameter tags are valid.
    Tagged,
}

/// Label classification from the pre-scan of a function body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelState {
    /// No backward goto targets this label.
    NonLooping,
    /// A goto after the label jumps back to it, forming a loop.
    Looping,
}

/// Analysis state. The flow graph and per-function walk state are
/// rebuilt for every bottom-up batch; function states, tags, and
/// accumulated results span the whole module.
pub struct Escape<'a> {
    pub(crate) module: &'a Module,
    pub(crate) sess: &'a Session,

    // Per-batch graph. Slots 0 and 1 are the heap and blank
    // singletons.
    pub(crate) locs: IndexVec<LocId, Location>,
    pub(crate) var_locs: FxHashMap<VarId, LocId>,
    pub(crate) node_locs: FxHashMap<NodeId, LocId>,
    heap: LocId,
    blank: LocId,

    // Walk state for the function currently being traversed.
    pub(crate) curfn: Option<FuncId>,
    pub(crate) loop_depth: u32,
    pub(crate) labels: FxHashMap<Symbol, LabelState>,

    // Module-wide state.
    pub(crate) fn_state: IndexVec<FuncId, FnState>,
    pub(crate) tags: IndexVec<FuncId, Vec<ParamTag>>,
    pub(crate) results: EscapeResults,
}

impl<'a> Escape<'a> {
    pub(crate) fn new(module: &'a Module, sess: &'a Session) -> Self {
        let mut e = Escape {
            module,
            sess,
            locs: IndexVec::new(),
            var_locs: FxHashMap::default(),
            node_locs: FxHashMap::default(),
            heap: LocId::from_u32(0),
            blank: LocId::from_u32(1),
            curfn: None,
            loop_depth: 0,
            labels: FxHashMap::default(),
            fn_state: module.funcs.iter().map(|_| FnState::Unknown).collect(),
            tags: module.funcs.iter().map(|_| Vec::new()).collect(),
            results: EscapeResults::default(),
        };
        e.reset_batch();
        e
    }

    /// Throw away the previous batch's graph.
    pub(crate) fn reset_batch(&mut self) {
        self.locs = IndexVec::new();
        self.var_locs.clear();
        self.node_locs.clear();
        self.heap = self.locs.push(Location::new(None, None, 0, false));
        self.blank = self.locs.push(Location::new(None, None, 0, false));
        self.locs[self.heap].escapes = true;
        self.curfn = None;
    }

    pub(crate) fn heap_loc(&self) -> LocId {
        self.heap
    }

    pub(crate) fn blank_loc(&self) -> LocId {
        self.blank
    }

    /// The context that stores into the heap.
    pub(crate) fn heap_hole(&self) -> Hole {
        Hole {
            dst: self.heap,
            derefs: 0,
        }
    }

    /// The context that discards its value.
    pub(crate) fn discard_hole(&self) -> Hole {
        Hole {
            dst: self.blank,
            derefs: 0,
        }
    }

    pub(crate) fn as_hole(&self, loc: LocId) -> Hole {
        Hole {
            dst: loc,
            derefs: 0,
        }
    }

    /// Allocate a fresh location in the current function.
    pub(crate) fn new_loc(&mut self, node: Option<LocNode>, transient: bool) -> LocId {
        let curfn = self.curfn;
        assert!(curfn.is_some(), "location allocated outside a function");

        let loc = self.locs.push(Location::new(
            node.clone(),
            curfn,
            self.loop_depth,
            transient,
        ));

        if let Some(node) = node {
            match &node {
                LocNode::Var(v) => {
                    let prev = self.var_locs.insert(*v, loc);
                    assert!(prev.is_none(), "variable {v:?} already has a location");
                }
                LocNode::Alloc { id, .. } => {
                    let prev = self.node_locs.insert(*id, loc);
                    assert!(prev.is_none(), "node {id:?} already has a location");
                }
            }
            if let Some(reason) = self.heap_alloc_reason(&node) {
                trace!(?node, reason, "forcing heap allocation");
                let k = self.heap_hole().addr();
                self.flow(k, loc);
            }
        }
        loc
    }

    /// The existing location of a declared variable, resolving
    /// capture aliases to the defining declaration.
    pub(crate) fn old_loc(&self, v: VarId) -> LocId {
        let v = self.module.canonical_var(v);
        self.var_locs[&v]
    }

    /// Why storage represented by `node` cannot live on the stack at
    /// all, independent of flow.
    fn heap_alloc_reason(&self, node: &LocNode) -> Option<&'static str> {
        let opts = &self.sess.opts;
        match node {
            LocNode::Var(v) => {
                let decl = &self.module.vars[*v];
                // Parameters and results are always passed on the stack.
                if decl.class.is_param() || decl.class.is_result() {
                    return None;
                }
                if decl.ty.width() > opts.max_stack_var_size {
                    return Some("too large for stack");
                }
                None
            }
            LocNode::Alloc { kind, .. } => match kind {
                AllocKind::New(elem) | AllocKind::PtrLit(elem) => {
                    if elem.width() >= opts.max_implicit_stack_var_size {
                        Some("too large for stack")
                    } else {
                        None
                    }
                }
                AllocKind::MakeSlice { elem, const_len } => match const_len {
                    None => Some("non-constant size"),
                    Some(len) => {
                        let ew = elem.width();
                        if ew != 0 && *len >= opts.max_implicit_stack_var_size / ew {
                            Some("too large for stack")
                        } else {
                            None
                        }
                    }
                },
                _ => None,
            },
        }
    }

    /// Record that `src` flows into the context `k`.
    pub(crate) fn flow(&mut self, k: Hole, src: LocId) {
        let dst = k.dst;
        if dst == self.blank_loc() {
            return;
        }
        if dst == src && k.derefs >= 0 {
            return;
        }
        trace!(?dst, ?src, derefs = k.derefs, "flow");
        self.locs[dst].edges.push(Edge {
            src,
            derefs: k.derefs,
        });
    }

    /// A hole that flows into each of `ks`, like tee(1).
    ///
    /// # Panics
    ///
    /// Panics on an address-of hole: `l = _` and `l = &_` cannot be
    /// combined through one temporary.
    pub(crate) fn tee_hole(&mut self, ks: &[Hole]) -> Hole {
        match ks {
            [] => self.discard_hole(),
            [k] => *k,
            _ => {
                let loc = self.new_loc(None, true);
                for &k in ks {
                    assert!(k.derefs >= 0, "cannot tee an address-of hole");
                    self.flow(k, loc);
                }
                self.as_hole(loc)
            }
        }
    }

    /// Allocation sites spill through a fresh location so the
    /// allocation's fate can be reported independently of where the
    /// resulting pointer is stored.
    pub(crate) fn spill(&mut self, k: Hole, id: NodeId, kind: AllocKind, span: Span) -> Hole {
        let loc = self.new_loc(Some(LocNode::Alloc { id, kind, span }), true);
        self.flow(k.addr(), loc);
        self.as_hole(loc)
    }

    /// Re-pin a declared variable's location to the current loop
    /// depth.
    pub(crate) fn dcl(&mut self, v: VarId) -> Hole {
        let loc = self.old_loc(v);
        self.locs[loc].loop_depth = self.loop_depth;
        self.as_hole(loc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_ir::ModuleBuilder;
    use tern_session::Session;
    use tern_types::FnSig;

    fn sig0() -> FnSig {
        FnSig {
            params: vec![],
            results: vec![],
            variadic: false,
        }
    }

    #[test]
    fn test_hole_shifts() {
        let k = Hole {
            dst: LocId::from_u32(0),
            derefs: 0,
        };
        assert_eq!(k.deref().derefs, 1);
        assert_eq!(k.addr().derefs, -1);
        assert_eq!(k.addr().deref().derefs, 0);
    }

    #[test]
    fn test_dottype_shift() {
        let k = Hole {
            dst: LocId::from_u32(0),
            derefs: 0,
        };
        assert_eq!(k.dottype(&Ty::ptr(Ty::Int)).derefs, 0);
        assert_eq!(k.dottype(&Ty::Interface).derefs, 0);
        assert_eq!(k.dottype(&Ty::String).derefs, 1);
    }

    #[test]
    #[should_panic(expected = "derefs underflow")]
    fn test_double_addr_panics() {
        let k = Hole {
            dst: LocId::from_u32(0),
            derefs: -1,
        };
        let _ = k.addr();
    }

    #[test]
    fn test_flow_skips_blank_and_self() {
        let mut b = ModuleBuilder::new();
        let f = b.declare_func("f", sig0());
        let x = b.local(f, "x", Ty::ptr(Ty::Int));
        b.set_body(f, vec![]);
        let m = b.finish().unwrap();
        let sess = Session::default();

        let mut e = Escape::new(&m, &sess);
        e.curfn = Some(f);
        e.loop_depth = 1;
        let loc = e.new_loc(Some(LocNode::Var(x)), false);

        let blank = e.discard_hole();
        e.flow(blank, loc);
        assert!(e.locs[e.blank_loc()].edges.is_empty());

        let own = e.as_hole(loc);
        e.flow(own, loc);
        assert!(e.locs[loc].edges.is_empty());

        // dst = &dst is a real cycle and must be kept.
        e.flow(own.addr(), loc);
        assert_eq!(e.locs[loc].edges.len(), 1);
    }

    #[test]
    fn test_oversized_local_flows_to_heap() {
        let mut b = ModuleBuilder::new();
        let f = b.declare_func("f", sig0());
        let huge = b.local(f, "huge", Ty::array(Ty::Int, 4 << 20));
        b.set_body(f, vec![]);
        let m = b.finish().unwrap();
        let sess = Session::default();

        let mut e = Escape::new(&m, &sess);
        e.curfn = Some(f);
        e.loop_depth = 1;
        let loc = e.new_loc(Some(LocNode::Var(huge)), false);
        let heap = e.heap_loc();
        assert_eq!(e.locs[heap].edges.len(), 1);
        assert_eq!(e.locs[heap].edges[0].src, loc);
        assert_eq!(e.locs[heap].edges[0].derefs, -1);
    }
}
