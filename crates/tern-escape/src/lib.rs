//! # Escape analysis
//!
//! Decides, for every variable and allocation site in a
//! [`Module`](tern_ir::Module), whether its storage can live in the
//! owning function's frame or must be heap allocated. The IR is
//! never rewritten; decisions land in side tables
//! ([`EscapeResults`]) that later lowering passes consume.
//!
//! ## Algorithm
//!
//! Functions are processed in bottom-up batches over the static call
//! graph, one strongly connected component at a time, with closures
//! always batched alongside the function that encloses them. Within
//! a batch:
//!
//! 1. Every variable and allocation site becomes an abstract
//!    location, and walking the bodies turns each assignment into a
//!    directed edge weighted by the number of dereferences on the
//!    source path (-1 for address-of).
//! 2. A shortest-path flood (Bellman-Ford, path lengths clamped at
//!    zero) finds, for each location, everything its address can
//!    reach. If the address of `x` reaches a location that outlives
//!    `x`'s frame slot, `x` escapes.
//! 3. Flows out of parameters are folded into compact per-parameter
//!    tags. Later batches replay those tags at call sites instead of
//!    re-walking the callee, and external functions get worst-case
//!    tags unless a pragma promises otherwise.
//!
//! Calls to functions inside the current batch skip the tags and wire
//! the callee's parameter and result locations straight into the
//! graph, which is what makes the analysis precise for mutual
//! recursion.

#![warn(missing_docs)]

mod call;
mod graph;
mod solve;
mod walk;

pub mod finish;
pub mod leaks;

pub use finish::{EscapeResults, HeapRelocation, Placement};
pub use leaks::{Leaks, ParamTag};

use tern_index::IndexVec;
use tern_ir::{Callee, Expr, ExprKind, FuncId, Module, Pragma, Stmt, StmtKind};
use tern_session::Session;
use tracing::debug;

use crate::graph::Escape;

/// Analyze a whole module.
///
/// Diagnostic notes (gated on the session's verbosity) and pragma
/// misuse errors are reported through `sess`.
#[must_use]
pub fn analyze(module: &Module, sess: &Session) -> EscapeResults {
    let mut e = Escape::new(module, sess);

    for (f, func) in module.funcs.iter_enumerated() {
        if func.is_external() {
            e.tag_external(f);
        } else if func.pragma.contains(Pragma::NOESCAPE) {
            sess.error(
                func.span,
                "noescape pragma is only valid for functions without a body",
            );
        }
    }

    for group in bottom_up_groups(module) {
        e.analyze_group(&group);
    }

    e.into_results()
}

impl Escape<'_> {
    fn analyze_group(&mut self, group: &[FuncId]) {
        debug!(?group, "escape analysis batch");
        self.reset_batch();

        for &f in group {
            self.init_func(f);
        }
        for &f in group {
            self.walk_func(f);
        }
        self.curfn = None;

        self.flood();
        self.finish_group(group);
    }
}

/// Order the functions that have bodies into strongly connected
/// batches, callees before callers. Closures and their enclosing
/// function are tied together so that captured variables share one
/// flow graph with their defining frame.
fn bottom_up_groups(module: &Module) -> Vec<Vec<FuncId>> {
    let mut succs: IndexVec<FuncId, Vec<FuncId>> = module
        .funcs
        .iter_enumerated()
        .map(|(_, func)| {
            let mut out = Vec::new();
            if let Some(body) = &func.body {
                collect_callees_stmts(module, body, &mut out);
            }
            if let Some(p) = func.parent {
                out.push(p);
            }
            out
        })
        .collect();
    for (c, func) in module.funcs.iter_enumerated() {
        if let Some(p) = func.parent {
            succs[p].push(c);
        }
    }

    let mut scc = SccState {
        module,
        succs: &succs,
        index: module.funcs.iter().map(|_| 0).collect(),
        low: module.funcs.iter().map(|_| 0).collect(),
        on_stack: module.funcs.iter().map(|_| false).collect(),
        stack: Vec::new(),
        next: 0,
        groups: Vec::new(),
    };
    for (f, func) in module.funcs.iter_enumerated() {
        if func.body.is_some() && scc.index[f] == 0 {
            scc.connect(f);
        }
    }
    scc.groups
}

struct SccState<'m> {
    module: &'m Module,
    succs: &'m IndexVec<FuncId, Vec<FuncId>>,
    // Discovery order, offset by one so zero means unvisited.
    index: IndexVec<FuncId, u32>,
    low: IndexVec<FuncId, u32>,
    on_stack: IndexVec<FuncId, bool>,
    stack: Vec<FuncId>,
    next: u32,
    groups: Vec<Vec<FuncId>>,
}

impl SccState<'_> {
    fn connect(&mut self, v: FuncId) {
        self.next += 1;
        self.index[v] = self.next;
        self.low[v] = self.next;
        self.stack.push(v);
        self.on_stack[v] = true;

        for i in 0..self.succs[v].len() {
            let w = self.succs[v][i];
            if self.module.funcs[w].body.is_none() {
                continue;
            }
            if self.index[w] == 0 {
                self.connect(w);
                self.low[v] = self.low[v].min(self.low[w]);
            } else if self.on_stack[w] {
                self.low[v] = self.low[v].min(self.index[w]);
            }
        }

        if self.low[v] == self.index[v] {
            let mut group = Vec::new();
            loop {
                let w = self.stack.pop().unwrap_or_else(|| panic!("scc stack underflow"));
                self.on_stack[w] = false;
                group.push(w);
                if w == v {
                    break;
                }
            }
            self.groups.push(group);
        }
    }
}

fn collect_callees_stmts(module: &Module, stmts: &[Stmt], out: &mut Vec<FuncId>) {
    for s in stmts {
        collect_callees_stmt(module, s, out);
    }
}

fn collect_callees_stmt(module: &Module, s: &Stmt, out: &mut Vec<FuncId>) {
    match &s.kind {
        StmtKind::Decl(_)
        | StmtKind::Label(_)
        | StmtKind::Goto(_)
        | StmtKind::Break(_)
        | StmtKind::Continue(_) => {}
        StmtKind::Block(body) => collect_callees_stmts(module, body, out),
        StmtKind::If { cond, then, els } => {
            collect_callees_expr(module, cond, out);
            collect_callees_stmts(module, then, out);
            collect_callees_stmts(module, els, out);
        }
        StmtKind::For { cond, post, body } => {
            if let Some(cond) = cond {
                collect_callees_expr(module, cond, out);
            }
            if let Some(post) = post {
                collect_callees_stmt(module, post, out);
            }
            collect_callees_stmts(module, body, out);
        }
        StmtKind::Range {
            expr,
            key,
            value,
            body,
        } => {
            collect_callees_expr(module, expr, out);
            for e in [key, value].into_iter().flatten() {
                collect_callees_expr(module, e, out);
            }
            collect_callees_stmts(module, body, out);
        }
        StmtKind::Switch { tag, cases } => {
            if let Some(tag) = tag {
                collect_callees_expr(module, tag, out);
            }
            for c in cases {
                for v in &c.values {
                    collect_callees_expr(module, v, out);
                }
                collect_callees_stmts(module, &c.body, out);
            }
        }
        StmtKind::TypeSwitch { scrut, cases } => {
            collect_callees_expr(module, scrut, out);
            for c in cases {
                collect_callees_stmts(module, &c.body, out);
            }
        }
        StmtKind::Select { cases } => {
            for c in cases {
                if let Some(comm) = &c.comm {
                    collect_callees_stmt(module, comm, out);
                }
                collect_callees_stmts(module, &c.body, out);
            }
        }
        StmtKind::Send { chan, value } => {
            collect_callees_expr(module, chan, out);
            collect_callees_expr(module, value, out);
        }
        StmtKind::Assign { dst, src } => {
            collect_callees_expr(module, dst, out);
            collect_callees_expr(module, src, out);
        }
        StmtKind::AssignMulti { dsts, srcs } => {
            for e in dsts.iter().chain(srcs) {
                collect_callees_expr(module, e, out);
            }
        }
        StmtKind::AssignOk { dst, ok, src } => {
            for e in [dst, ok, src] {
                collect_callees_expr(module, e, out);
            }
        }
        StmtKind::AssignCall { dsts, call } => {
            for e in dsts {
                collect_callees_expr(module, e, out);
            }
            collect_callees_call(module, call, out);
        }
        StmtKind::Return(values) => {
            for e in values {
                collect_callees_expr(module, e, out);
            }
        }
        StmtKind::ExprStmt(e) => collect_callees_expr(module, e, out),
        StmtKind::Spawn(call) | StmtKind::Defer(call) => {
            collect_callees_call(module, call, out);
        }
    }
}

fn collect_callees_call(module: &Module, call: &tern_ir::CallExpr, out: &mut Vec<FuncId>) {
    match &call.callee {
        Callee::Fn(f) => {
            if module.funcs[*f].body.is_some() {
                out.push(*f);
            }
        }
        Callee::Closure(e) | Callee::Indirect(e) => collect_callees_expr(module, e, out),
        Callee::Builtin(_) => {}
    }
    for arg in &call.args {
        collect_callees_expr(module, arg, out);
    }
}

fn collect_callees_expr(module: &Module, e: &Expr, out: &mut Vec<FuncId>) {
    match &e.kind {
        ExprKind::Blank
        | ExprKind::Var(_)
        | ExprKind::Global { .. }
        | ExprKind::Const(_)
        | ExprKind::New { .. }
        | ExprKind::MakeMap { .. } => {}
        // A function reference alone is not a call edge; if it is
        // ever invoked it goes through an indirect call and tags.
        ExprKind::FuncRef(_) => {}
        ExprKind::Unary { operand, .. }
        | ExprKind::Addr(operand)
        | ExprKind::Deref(operand)
        | ExprKind::Field { base: operand, .. }
        | ExprKind::TypeAssert { base: operand, .. }
        | ExprKind::Conv { operand, .. }
        | ExprKind::ConvIface { operand, .. }
        | ExprKind::Recv(operand)
        | ExprKind::PtrLit { inner: operand, .. }
        | ExprKind::StrConv { operand, .. }
        | ExprKind::MethodValue { base: operand, .. } => {
            collect_callees_expr(module, operand, out);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_callees_expr(module, lhs, out);
            collect_callees_expr(module, rhs, out);
        }
        ExprKind::Index { base, index } | ExprKind::IndexMap { base, index } => {
            collect_callees_expr(module, base, out);
            collect_callees_expr(module, index, out);
        }
        ExprKind::SliceExpr { base, lo, hi, max } => {
            collect_callees_expr(module, base, out);
            for b in [lo, hi, max].into_iter().flatten() {
                collect_callees_expr(module, b, out);
            }
        }
        ExprKind::Call(call) => collect_callees_call(module, call, out),
        ExprKind::MakeSlice { len, cap, .. } => {
            collect_callees_expr(module, len, out);
            if let Some(cap) = cap {
                collect_callees_expr(module, cap, out);
            }
        }
        ExprKind::MakeChan { size, .. } => {
            if let Some(size) = size {
                collect_callees_expr(module, size, out);
            }
        }
        ExprKind::ArrayLit { elems, .. } | ExprKind::SliceLit { elems, .. } => {
            for elt in elems {
                collect_callees_expr(module, elt, out);
            }
        }
        ExprKind::StructLit { fields, .. } => {
            for (_, elt) in fields {
                collect_callees_expr(module, elt, out);
            }
        }
        ExprKind::MapLit { entries, .. } => {
            for (k, v) in entries {
                collect_callees_expr(module, k, out);
                collect_callees_expr(module, v, out);
            }
        }
        ExprKind::ConcatStr { operands, .. } => {
            for o in operands {
                collect_callees_expr(module, o, out);
            }
        }
        // The parent edge added separately keeps closures in their
        // enclosing function's batch; the literal itself contributes
        // no extra edge.
        ExprKind::Closure { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_ir::{CallExpr, ModuleBuilder};
    use tern_types::{FnSig, SigParam, Ty};

    fn sig0() -> FnSig {
        FnSig {
            params: vec![],
            results: vec![],
            variadic: false,
        }
    }

    fn call_stmt(b: &mut ModuleBuilder, callee: FuncId) -> Stmt {
        let id = b.node();
        Stmt::expr(Expr::synth(ExprKind::Call(CallExpr {
            id,
            callee: Callee::Fn(callee),
            args: vec![],
            spread: false,
        })))
    }

    #[test]
    fn test_callees_before_callers() {
        let mut b = ModuleBuilder::new();
        let leaf = b.declare_func("leaf", sig0());
        let mid = b.declare_func("mid", sig0());
        let top = b.declare_func("top", sig0());
        b.set_body(leaf, vec![]);
        let s = call_stmt(&mut b, leaf);
        b.set_body(mid, vec![s]);
        let s = call_stmt(&mut b, mid);
        b.set_body(top, vec![s]);
        let m = b.finish().unwrap();

        let groups = bottom_up_groups(&m);
        assert_eq!(groups, vec![vec![leaf], vec![mid], vec![top]]);
    }

    #[test]
    fn test_mutual_recursion_forms_one_group() {
        let mut b = ModuleBuilder::new();
        let even = b.declare_func(
            "even",
            FnSig {
                params: vec![SigParam::named("n", Ty::Int)],
                results: vec![SigParam::anon(Ty::Bool)],
                variadic: false,
            },
        );
        let odd = b.declare_func(
            "odd",
            FnSig {
                params: vec![SigParam::named("n", Ty::Int)],
                results: vec![SigParam::anon(Ty::Bool)],
                variadic: false,
            },
        );
        b.param(even, "n", Ty::Int);
        b.result(even, "~r0", Ty::Bool);
        b.param(odd, "n", Ty::Int);
        b.result(odd, "~r0", Ty::Bool);
        let s = call_stmt(&mut b, odd);
        b.set_body(even, vec![s]);
        let s = call_stmt(&mut b, even);
        b.set_body(odd, vec![s]);
        let m = b.finish().unwrap();

        let groups = bottom_up_groups(&m);
        assert_eq!(groups.len(), 1);
        let mut g = groups[0].clone();
        g.sort();
        assert_eq!(g, vec![even, odd]);
    }

    #[test]
    fn test_closure_batched_with_parent() {
        let mut b = ModuleBuilder::new();
        let f = b.declare_func("f", sig0());
        let clo = b.declare_closure("f.func1", sig0(), f);
        b.set_body(f, vec![]);
        b.set_body(clo, vec![]);
        let m = b.finish().unwrap();

        let groups = bottom_up_groups(&m);
        assert_eq!(groups.len(), 1);
        let mut g = groups[0].clone();
        g.sort();
        assert_eq!(g, vec![f, clo]);
    }

    #[test]
    fn test_external_callee_not_grouped() {
        let mut b = ModuleBuilder::new();
        let ext = b.declare_external("memmove", sig0());
        let f = b.declare_func("f", sig0());
        let s = call_stmt(&mut b, ext);
        b.set_body(f, vec![s]);
        let m = b.finish().unwrap();

        let groups = bottom_up_groups(&m);
        assert_eq!(groups, vec![vec![f]]);
    }
}
