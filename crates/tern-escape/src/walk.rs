//! Body traversal: turning statements and expressions into flow
//! edges.
//!
//! Every sub-expression is visited exactly once even when its value
//! is irrelevant, because evaluation can have side effects (calls,
//! allocations). Contexts where the value is dropped use the discard
//! hole rather than skipping the visit.

use tracing::trace;

use tern_ir::{BinOp, Capture, Expr, ExprKind, FuncId, Module, Stmt, StmtKind, UnOp, VarId};

use crate::call::CallCtx;
use crate::graph::{AllocKind, Escape, FnState, Hole, LabelState, LocNode};

impl Escape<'_> {
    /// Allocate locations for every variable a function declares.
    pub(crate) fn init_func(&mut self, f: FuncId) {
        assert_eq!(self.fn_state[f], FnState::Unknown, "function scheduled twice");
        self.fn_state[f] = FnState::Planned;

        self.curfn = Some(f);
        self.loop_depth = 1;
        let dcl = self.module.funcs[f].dcl.clone();
        for v in dcl {
            self.new_loc(Some(LocNode::Var(v)), false);
        }
    }

    /// Walk a function body, recording flow edges.
    pub(crate) fn walk_func(&mut self, f: FuncId) {
        self.fn_state[f] = FnState::Started;

        self.labels.clear();
        let body = self.module.funcs[f]
            .body
            .clone()
            .unwrap_or_else(|| panic!("walking body-less function {f:?}"));
        prescan_labels(&body, self);

        self.curfn = Some(f);
        self.loop_depth = 1;
        self.stmts(&body);
    }

    pub(crate) fn stmts(&mut self, l: &[Stmt]) {
        for s in l {
            self.stmt(s);
        }
    }

    pub(crate) fn stmt(&mut self, s: &Stmt) {
        trace!(depth = self.loop_depth, kind = ?std::mem::discriminant(&s.kind), "stmt");

        match &s.kind {
            StmtKind::Goto(_) | StmtKind::Break(_) | StmtKind::Continue(_) => {}

            StmtKind::Decl(v) => {
                self.dcl(*v);
            }

            StmtKind::Block(body) => self.stmts(body),

            StmtKind::If { cond, then, els } => {
                self.discard(cond);
                self.stmts(then);
                self.stmts(els);
            }

            StmtKind::For { cond, post, body } => {
                self.loop_depth += 1;
                if let Some(cond) = cond {
                    self.discard(cond);
                }
                if let Some(post) = post {
                    self.stmt(post);
                }
                self.stmts(body);
                self.loop_depth -= 1;
            }

            StmtKind::Range {
                expr,
                key,
                value,
                body,
            } => {
                // The ranged expression is evaluated once, before the
                // loop.
                let tv = self.new_loc(None, false);
                let tvk = self.as_hole(tv);
                self.value(tvk, expr);

                self.loop_depth += 1;
                if let Some(key) = key {
                    let _ = self.addr(key);
                }
                if let Some(value) = value {
                    let kv = self.addr(value);
                    if expr.ty(self.module).is_array() {
                        self.flow(kv, tv);
                    } else {
                        self.flow(kv.deref(), tv);
                    }
                }
                self.stmts(body);
                self.loop_depth -= 1;
            }

            StmtKind::Label(sym) => {
                if self.labels.remove(sym) == Some(LabelState::Looping) {
                    self.loop_depth += 1;
                }
            }

            StmtKind::Switch { tag, cases } => {
                if let Some(tag) = tag {
                    self.discard(tag);
                }
                for case in cases {
                    self.discards(&case.values);
                    self.stmts(&case.body);
                }
            }

            StmtKind::TypeSwitch { scrut, cases } => {
                let tv = if cases.iter().any(|c| c.binding.is_some()) {
                    let tv = self.new_loc(None, false);
                    let k = self.as_hole(tv);
                    self.value(k, scrut);
                    Some(tv)
                } else {
                    self.discard(scrut);
                    None
                };

                for case in cases {
                    if let (Some(tv), Some(binding)) = (tv, case.binding) {
                        let k = self.dcl(binding);
                        let bty = self.module.vars[binding].ty.clone();
                        if bty.has_pointers() {
                            self.flow(k.dottype(&bty), tv);
                        }
                    }
                    self.stmts(&case.body);
                }
            }

            StmtKind::Select { cases } => {
                for case in cases {
                    if let Some(comm) = &case.comm {
                        self.stmt(comm);
                    }
                    self.stmts(&case.body);
                }
            }

            StmtKind::Send { chan, value } => {
                self.discard(chan);
                // Values sent on a channel are observable by other
                // goroutines.
                self.assign_heap(value);
            }

            StmtKind::Assign { dst, src } => self.assign(dst, Some(src)),

            StmtKind::AssignMulti { dsts, srcs } => {
                for (dst, src) in dsts.iter().zip(srcs) {
                    self.assign(dst, Some(src));
                }
            }

            StmtKind::AssignOk { dst, ok, src } => {
                self.assign(dst, Some(src));
                self.assign(ok, None);
            }

            StmtKind::AssignCall { dsts, call } => {
                let ks = self.addrs(dsts);
                self.call(Some(&ks), call, None, s.span);
            }

            StmtKind::Return(values) => {
                let ks = self.result_holes();
                for (k, v) in ks.into_iter().zip(values) {
                    self.value(k, v);
                }
            }

            StmtKind::ExprStmt(e) => match &e.kind {
                ExprKind::Call(call) => self.call(None, call, None, e.span),
                _ => self.discard(e),
            },

            StmtKind::Spawn(call) => self.call(None, call, Some(CallCtx::Spawn), s.span),
            StmtKind::Defer(call) => self.call(None, call, Some(CallCtx::Defer), s.span),
        }
    }

    /// Evaluate `e` in context `k`.
    pub(crate) fn value(&mut self, mut k: Hole, e: &Expr) {
        if matches!(e.kind, ExprKind::Blank) {
            return;
        }
        if k.derefs >= 0 && !e.ty(self.module).has_pointers() {
            k = self.discard_hole();
        }

        match &e.kind {
            ExprKind::Blank => unreachable!(),

            ExprKind::Const(_) | ExprKind::Global { .. } | ExprKind::FuncRef(_) => {}

            ExprKind::Var(v) => {
                let loc = self.old_loc(*v);
                self.flow(k, loc);
            }

            ExprKind::Unary { operand, .. } => self.discard(operand),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.discard(lhs);
                self.discard(rhs);
            }

            ExprKind::Addr(inner) => self.value(k.addr(), inner),
            ExprKind::Deref(inner) => self.value(k.deref(), inner),

            ExprKind::Field {
                base, through_ptr, ..
            } => {
                if *through_ptr {
                    self.value(k.deref(), base);
                } else {
                    self.value(k, base);
                }
            }

            ExprKind::TypeAssert { base, ty, .. } => self.value(k.dottype(ty), base),

            ExprKind::Index { base, index } => {
                if base.ty(self.module).is_array() {
                    self.value(k, base);
                } else {
                    self.value(k.deref(), base);
                }
                self.discard(index);
            }

            ExprKind::IndexMap { base, index } => {
                self.discard(base);
                self.discard(index);
            }

            ExprKind::SliceExpr { base, lo, hi, max } => {
                self.value(k, base);
                for bound in [lo, hi, max].into_iter().flatten() {
                    self.discard(bound);
                }
            }

            ExprKind::Conv { operand, ty } => {
                if ty.is_unsafe_ptr() && operand.ty(self.module).is_uintptr() {
                    self.unsafe_value(k, operand);
                } else {
                    self.value(k, operand);
                }
            }

            ExprKind::ConvIface { id, operand } => {
                let oty = operand.ty(self.module);
                let boxed = self.spill(k, *id, AllocKind::IfaceBox(oty.clone()), e.span);
                if !oty.is_interface() && !oty.is_direct_iface() {
                    k = boxed;
                }
                self.value(k, operand);
            }

            ExprKind::Recv(chan) => self.discard(chan),

            ExprKind::Call(call) => {
                let ks = [k];
                self.call(Some(&ks), call, None, e.span);
            }

            ExprKind::New { id, elem } => {
                self.spill(k, *id, AllocKind::New(elem.clone()), e.span);
            }

            ExprKind::MakeSlice {
                id,
                elem,
                len,
                cap,
                const_len,
            } => {
                self.spill(
                    k,
                    *id,
                    AllocKind::MakeSlice {
                        elem: elem.clone(),
                        const_len: *const_len,
                    },
                    e.span,
                );
                self.discard(len);
                if let Some(cap) = cap {
                    self.discard(cap);
                }
            }

            ExprKind::MakeMap { id, .. } => {
                self.spill(k, *id, AllocKind::MakeMap, e.span);
            }

            ExprKind::MakeChan { size, .. } => {
                if let Some(size) = size {
                    self.discard(size);
                }
            }

            ExprKind::ArrayLit { elems, .. } => {
                for elt in elems {
                    self.value(k, elt);
                }
            }

            ExprKind::SliceLit { id, elems, elem } => {
                let k = self.spill(k, *id, AllocKind::SliceLit(elem.clone()), e.span);
                for elt in elems {
                    self.value(k, elt);
                }
            }

            ExprKind::StructLit { fields, .. } => {
                for (_, elt) in fields {
                    self.value(k, elt);
                }
            }

            ExprKind::MapLit { id, entries, .. } => {
                self.spill(k, *id, AllocKind::MapLit, e.span);
                // Map keys and values are stored in heap buckets.
                for (key, value) in entries {
                    self.assign_heap(key);
                    self.assign_heap(value);
                }
            }

            ExprKind::PtrLit { id, inner } => {
                let ity = inner.ty(self.module);
                let k = self.spill(k, *id, AllocKind::PtrLit(ity), e.span);
                self.value(k, inner);
            }

            ExprKind::Closure { id, captures, .. } => {
                let k = self.spill(k, *id, AllocKind::Closure, e.span);
                self.flow_captures(k, captures);
            }

            ExprKind::StrConv { id, operand, .. } => {
                self.spill(k, *id, AllocKind::StrConv, e.span);
                self.discard(operand);
            }

            ExprKind::ConcatStr { id, operands } => {
                self.spill(k, *id, AllocKind::ConcatStr, e.span);
                // Operand strings are only read while building the
                // result; the runtime does not retain them.
                self.discards(operands);
            }

            ExprKind::MethodValue { id, base, .. } => {
                self.spill(k, *id, AllocKind::MethodValue, e.span);
                // The receiver is copied into the bound-method
                // object; treat that storage as lost.
                self.assign_heap(base);
            }
        }
    }

    /// Wire a closure literal's captures to the closure object.
    fn flow_captures(&mut self, k: Hole, captures: &[Capture]) {
        for cap in captures {
            let outer = self.module.canonical_var(cap.alias);
            let kk = if cap.by_value {
                if !self.module.vars[outer].ty.has_pointers() {
                    continue;
                }
                k
            } else {
                // The closure stores the variable's address.
                k.addr()
            };
            let loc = self.old_loc(outer);
            self.flow(kk, loc);
        }
    }

    /// Evaluate a uintptr-typed arithmetic expression, looking for
    /// raw pointer values being laundered through integers.
    pub(crate) fn unsafe_value(&mut self, k: Hole, e: &Expr) {
        assert!(
            e.ty(self.module).is_uintptr(),
            "unsafe_value on non-uintptr expression"
        );

        match &e.kind {
            ExprKind::Conv { operand, .. } => {
                if operand.ty(self.module).is_unsafe_ptr() {
                    self.value(k, operand);
                } else {
                    self.discard(operand);
                }
            }
            ExprKind::Unary {
                op: UnOp::Plus | UnOp::Neg | UnOp::BitNot,
                operand,
            } => self.unsafe_value(k, operand),
            ExprKind::Binary { op, lhs, rhs } if is_arith(*op) => {
                self.unsafe_value(k, lhs);
                self.unsafe_value(k, rhs);
            }
            _ => self.discard(e),
        }
    }

    /// Evaluate `e` for side effects only.
    pub(crate) fn discard(&mut self, e: &Expr) {
        let k = self.discard_hole();
        self.value(k, e);
    }

    pub(crate) fn discards(&mut self, l: &[Expr]) {
        for e in l {
            self.discard(e);
        }
    }

    /// Evaluate an addressable expression and return the context that
    /// stores into it.
    pub(crate) fn addr(&mut self, e: &Expr) -> Hole {
        if matches!(e.kind, ExprKind::Blank) {
            return self.discard_hole();
        }

        let mut k = self.heap_hole();
        match &e.kind {
            ExprKind::Var(v) => {
                let loc = self.old_loc(*v);
                k = self.as_hole(loc);
            }
            ExprKind::Global { .. } => {}
            ExprKind::Field {
                base,
                through_ptr: false,
                ..
            } => {
                k = self.addr(base);
            }
            ExprKind::Field {
                through_ptr: true, ..
            }
            | ExprKind::Deref(_) => {
                // Storing through a pointer; the pointee's location
                // is whatever the pointer's flow already says.
                self.discard(e);
            }
            ExprKind::Index { base, index } => {
                self.discard(index);
                if base.ty(self.module).is_array() {
                    k = self.addr(base);
                } else {
                    self.discard(base);
                }
            }
            ExprKind::IndexMap { base, index } => {
                self.discard(base);
                // Map keys are copied into heap bucket storage.
                self.assign_heap(index);
            }
            _ => unreachable!("non-addressable expression in store position"),
        }

        if !e.ty(self.module).has_pointers() {
            k = self.discard_hole();
        }
        k
    }

    pub(crate) fn addrs(&mut self, l: &[Expr]) -> Vec<Hole> {
        l.iter().map(|e| self.addr(e)).collect()
    }

    /// Model `dst = src`. `src` is `None` for the synthesized
    /// boolean of comma-ok forms.
    pub(crate) fn assign(&mut self, dst: &Expr, src: Option<&Expr>) {
        let ignore = match src {
            Some(src) => is_self_assign(self.module, dst, src),
            None => false,
        };
        if ignore {
            self.sess.note(dst.span, "ignoring self-assignment");
        }

        let mut k = self.addr(dst);
        if ignore {
            k = self.discard_hole();
        }
        if let Some(src) = src {
            self.value(k, src);
        }
    }

    /// Model a store whose destination is unknowable heap storage.
    pub(crate) fn assign_heap(&mut self, src: &Expr) {
        let k = self.heap_hole();
        self.value(k, src);
    }

    /// Contexts that store into the current function's results.
    pub(crate) fn result_holes(&mut self) -> Vec<Hole> {
        let f = self.curfn.unwrap_or_else(|| panic!("no current function"));
        let results = self.module.funcs[f].results.clone();
        results.into_iter().map(|r| self.var_hole(r)).collect()
    }

    /// The store context of a declared variable, with pointer-free
    /// variables discarded.
    pub(crate) fn var_hole(&mut self, v: VarId) -> Hole {
        let loc = self.old_loc(v);
        if self.module.vars[self.module.canonical_var(v)].ty.has_pointers() {
            self.as_hole(loc)
        } else {
            self.discard_hole()
        }
    }
}

fn is_arith(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Add
            | BinOp::Sub
            | BinOp::Mul
            | BinOp::Div
            | BinOp::Rem
            | BinOp::And
            | BinOp::Or
            | BinOp::Xor
            | BinOp::AndNot
            | BinOp::Shl
            | BinOp::Shr
    )
}

/// Classify labels before walking: a label already seen when a goto
/// to it appears is the head of an unstructured loop.
fn prescan_labels(body: &[Stmt], e: &mut Escape<'_>) {
    for s in body {
        match &s.kind {
            StmtKind::Label(sym) => {
                e.labels.insert(*sym, LabelState::NonLooping);
            }
            StmtKind::Goto(sym) => {
                if e.labels.get(sym) == Some(&LabelState::NonLooping) {
                    e.labels.insert(*sym, LabelState::Looping);
                }
            }
            StmtKind::Block(inner) => prescan_labels(inner, e),
            StmtKind::If { then, els, .. } => {
                prescan_labels(then, e);
                prescan_labels(els, e);
            }
            StmtKind::For { post, body, .. } => {
                if let Some(post) = post {
                    prescan_labels(std::slice::from_ref(post), e);
                }
                prescan_labels(body, e);
            }
            StmtKind::Range { body, .. } => prescan_labels(body, e),
            StmtKind::Switch { cases, .. } => {
                for c in cases {
                    prescan_labels(&c.body, e);
                }
            }
            StmtKind::TypeSwitch { cases, .. } => {
                for c in cases {
                    prescan_labels(&c.body, e);
                }
            }
            StmtKind::Select { cases } => {
                for c in cases {
                    if let Some(comm) = &c.comm {
                        prescan_labels(std::slice::from_ref(comm), e);
                    }
                    prescan_labels(&c.body, e);
                }
            }
            _ => {}
        }
    }
}

/// Does assigning `src` to `dst` introduce no pointers that `dst`'s
/// base object did not already contain?
pub(crate) fn is_self_assign(m: &Module, dst: &Expr, src: &Expr) -> bool {
    if is_slice_self_assign(m, dst, src) {
        return true;
    }

    // Trivial assignments within one object, e.g. val.x = val.y or
    // val.a[i] = val.a[j]. These do not change the object's lifetime.
    match (&dst.kind, &src.kind) {
        (
            ExprKind::Field {
                base: db,
                through_ptr: dp,
                ..
            },
            ExprKind::Field {
                base: sb,
                through_ptr: sp,
                ..
            },
        ) if dp == sp => same_safe_expr(m, db, sb),
        (
            ExprKind::Index {
                base: db,
                index: di,
            },
            ExprKind::Index {
                base: sb,
                index: si,
            },
        ) => {
            if may_affect_memory(di) || may_affect_memory(si) {
                return false;
            }
            same_safe_expr(m, db, sb)
        }
        _ => false,
    }
}

/// Detects `b.buf = b.buf[lo:hi]` style narrowing, which stores no
/// pointer into `b`'s referent that was not already there.
fn is_slice_self_assign(m: &Module, dst: &Expr, src: &Expr) -> bool {
    let Some(dvar) = deref_base_var(dst) else {
        return false;
    };

    let ExprKind::SliceExpr { base, .. } = &src.kind else {
        return false;
    };
    // Slicing an inline array takes the address of the containing
    // object, which is a brand-new pointer into it.
    if base.ty(m).is_array() {
        return false;
    }
    match deref_base_var(base) {
        Some(svar) => m.canonical_var(dvar) == m.canonical_var(svar),
        None => false,
    }
}

/// The variable under a single pointer indirection, for `*p` and
/// `p.f` shapes.
fn deref_base_var(e: &Expr) -> Option<VarId> {
    let inner = match &e.kind {
        ExprKind::Deref(inner) => inner,
        ExprKind::Field {
            base,
            through_ptr: true,
            ..
        } => base,
        _ => return None,
    };
    match inner.kind {
        ExprKind::Var(v) => Some(v),
        _ => None,
    }
}

/// Structural equality for expressions whose re-evaluation is
/// side-effect free.
fn same_safe_expr(m: &Module, a: &Expr, b: &Expr) -> bool {
    match (&a.kind, &b.kind) {
        (ExprKind::Var(x), ExprKind::Var(y)) => m.canonical_var(*x) == m.canonical_var(*y),
        (ExprKind::Const(tx), ExprKind::Const(ty)) => tx == ty,
        (ExprKind::Deref(x), ExprKind::Deref(y)) => same_safe_expr(m, x, y),
        (
            ExprKind::Field {
                base: xb,
                name: xn,
                through_ptr: xp,
            },
            ExprKind::Field {
                base: yb,
                name: yn,
                through_ptr: yp,
            },
        ) => xn == yn && xp == yp && same_safe_expr(m, xb, yb),
        (
            ExprKind::Conv {
                operand: xo,
                ty: xt,
            },
            ExprKind::Conv {
                operand: yo,
                ty: yt,
            },
        ) => xt == yt && same_safe_expr(m, xo, yo),
        (
            ExprKind::Index {
                base: xb,
                index: xi,
            },
            ExprKind::Index {
                base: yb,
                index: yi,
            },
        ) => same_safe_expr(m, xb, yb) && same_safe_expr(m, xi, yi),
        _ => false,
    }
}

/// Can evaluating `e` change program memory? Anything that might is
/// disqualified from self-assignment elision.
fn may_affect_memory(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Var(_) | ExprKind::Const(_) | ExprKind::Global { .. } | ExprKind::FuncRef(_) => {
            false
        }
        ExprKind::Index { base, index } => may_affect_memory(base) || may_affect_memory(index),
        ExprKind::Binary { op, lhs, rhs } if is_arith(*op) => {
            may_affect_memory(lhs) || may_affect_memory(rhs)
        }
        ExprKind::Field { base, .. } => may_affect_memory(base),
        ExprKind::Deref(inner) => may_affect_memory(inner),
        ExprKind::Conv { operand, .. } => may_affect_memory(operand),
        ExprKind::Unary { operand, .. } => may_affect_memory(operand),
        _ => true,
    }
}
