//! Call-site modeling.
//!
//! A call either wires the callee's parameter and result locations
//! directly into the graph (callee in the same bottom-up batch) or
//! replays the callee's parameter tags ([`crate::leaks::ParamTag`]).
//! Spawned and deferred calls additionally force their arguments to
//! outlive the caller's frame, except for defers that provably run
//! before the frame is torn down.

use tern_ir::{Builtin, CallExpr, Callee, Expr, ExprKind, FuncId, Pragma};
use tern_span::Span;
use tern_types::FnSig;

use crate::graph::{AllocKind, Escape, FnState, Hole};
use crate::leaks::ParamTag;

/// Whether a call is spawned on a new goroutine or deferred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CallCtx {
    /// `go f(...)`: arguments outlive the current frame
    /// unconditionally.
    Spawn,
    /// `defer f(...)`: arguments outlive the current frame unless
    /// the defer provably runs exactly once at function exit.
    Defer,
}

impl Escape<'_> {
    /// Model a call. `ks` are the contexts for the callee's results,
    /// if the results are used; `ctx` is set for spawned and deferred
    /// calls.
    pub(crate) fn call(
        &mut self,
        ks: Option<&[Hole]>,
        call: &CallExpr,
        ctx: Option<CallCtx>,
        span: Span,
    ) {
        // A defer at depth 1 runs exactly once when the function
        // returns, so its arguments only need to survive as long as
        // the frame anyway.
        let defer_at_exit = ctx == Some(CallCtx::Defer) && self.loop_depth == 1;
        let forced = ctx.is_some() && !defer_at_exit;

        let direct_fn = self.direct_callee(&call.callee);
        let fntype = self.callee_sig(call);

        let mut param_ks: Vec<Hole> = Vec::new();

        if forced {
            let k = self.heap_hole();
            for _ in &call.args {
                param_ks.push(k);
            }
        } else if let Some(fn_id) = direct_fn.filter(|&f| self.in_mutual_batch(f)) {
            // Callee is in the same recursive batch; incorporate its
            // parameter and result locations into the flow graph.
            let callee = &self.module.funcs[fn_id];
            let (params, results) = (callee.params.clone(), callee.results.clone());
            let nparams = callee.sig.params.len();

            if let Some(ks) = ks {
                for (i, &r) in results.iter().enumerate() {
                    let loc = self.old_loc(r);
                    self.flow(ks[i], loc);
                }
            }

            for i in 0..nparams {
                let k = match params.get(i) {
                    Some(&p) => self.var_hole(p),
                    // Unnamed parameters are unused.
                    None => self.discard_hole(),
                };
                param_ks.push(k);
            }
        } else if !matches!(call.callee, Callee::Builtin(_)) {
            // Indirect call, or call to an already-tagged function;
            // replay the tags.
            let sig = fntype
                .as_ref()
                .unwrap_or_else(|| panic!("call without signature"));
            for i in 0..sig.params.len() {
                let tag = match direct_fn {
                    Some(f) => self
                        .tags[f]
                        .get(i)
                        .copied()
                        .unwrap_or(ParamTag::Unknown),
                    None => ParamTag::Unknown,
                };
                let k = self.tag_hole(ks, tag, direct_fn.is_some(), defer_at_exit);
                param_ks.push(k);
            }
        } else {
            // Builtins discard their arguments by default. Inside a
            // go or defer-at-exit we still must pin transient values
            // until the call actually runs.
            let mut k = self.discard_hole();
            if ctx.is_some() {
                let loc = self.new_loc(None, false);
                k = self.as_hole(loc);
            }
            for _ in &call.args {
                param_ks.push(k);
            }

            let Callee::Builtin(b) = call.callee else {
                unreachable!()
            };
            match b {
                Builtin::Append => {
                    // The appendee may flow to the result when there
                    // is capacity, or be copied into a fresh heap
                    // array, leaking every element.
                    let mut tees = vec![param_ks[0]];
                    if let Some(ks) = ks {
                        tees.push(ks[0]);
                    }
                    let elem = call.args[0].ty(self.module).elem().clone();
                    if elem.has_pointers() {
                        tees.push(self.heap_hole().deref());
                    }
                    param_ks[0] = self.tee_hole(&tees);

                    if call.spread {
                        let sty = call.args[1].ty(self.module);
                        if sty.is_slice() && sty.elem().has_pointers() {
                            let tees = [param_ks[1], self.heap_hole().deref()];
                            param_ks[1] = self.tee_hole(&tees);
                        }
                    } else {
                        for pk in param_ks.iter_mut().skip(1) {
                            *pk = self.heap_hole();
                        }
                    }
                }
                Builtin::Copy => {
                    let sty = call.args[1].ty(self.module);
                    if sty.is_slice() && sty.elem().has_pointers() {
                        let tees = [param_ks[1], self.heap_hole().deref()];
                        param_ks[1] = self.tee_hole(&tees);
                    }
                }
                Builtin::Panic => {
                    param_ks[0] = self.heap_hole();
                }
                Builtin::Delete
                | Builtin::Recover
                | Builtin::Print
                | Builtin::Println
                | Builtin::Close
                | Builtin::Len
                | Builtin::Cap => {}
            }
        }

        // Collapse extra arguments of a non-spread variadic call into
        // one synthesized backing array.
        if let Some(sig) = &fntype {
            if sig.variadic && !call.spread {
                let vi = sig.params.len() - 1;
                let nva = call.args.len() - vi;
                while param_ks.len() <= vi {
                    param_ks.push(self.heap_hole());
                }
                let ddd = self.spill(param_ks[vi], call.id, AllocKind::Variadic, span);
                param_ks.truncate(vi);
                for _ in 0..nva {
                    param_ks.push(ddd);
                }
            }
        }

        // Evaluate the callee expression itself when it is a value.
        match &call.callee {
            Callee::Closure(f) | Callee::Indirect(f) => {
                let mut k = self.discard_hole();
                if ctx.is_some() {
                    if defer_at_exit {
                        let loc = self.new_loc(None, false);
                        k = self.as_hole(loc);
                    } else {
                        k = self.heap_hole();
                    }
                }
                self.value(k, f);
            }
            Callee::Fn(_) | Callee::Builtin(_) => {}
        }

        for (i, arg) in call.args.iter().enumerate() {
            let arg = self.peel_uintptr_escapes(direct_fn, fntype.as_ref(), i, arg);
            if let Some(k) = param_ks.get(i) {
                self.value(*k, arg);
            } else {
                self.discard(arg);
            }
        }
    }

    /// The statically known callee, when the call is direct.
    fn direct_callee(&self, callee: &Callee) -> Option<FuncId> {
        match callee {
            Callee::Fn(f) => Some(*f),
            Callee::Closure(e) => match &e.kind {
                ExprKind::Closure { func, .. } => Some(*func),
                _ => unreachable!("Callee::Closure without closure literal"),
            },
            Callee::Indirect(_) | Callee::Builtin(_) => None,
        }
    }

    fn callee_sig(&self, call: &CallExpr) -> Option<FnSig> {
        match call.callee {
            Callee::Builtin(_) => None,
            _ => call.sig(self.module),
        }
    }

    /// Is the callee part of the batch currently being analyzed?
    fn in_mutual_batch(&self, f: FuncId) -> bool {
        match self.fn_state[f] {
            FnState::Planned | FnState::Started => true,
            FnState::Tagged => false,
            FnState::Unknown => panic!("call into unscheduled function; batch order is broken"),
        }
    }

    /// The evaluation context for an argument, derived from the
    /// callee's tag for that parameter.
    pub(crate) fn tag_hole(
        &mut self,
        ks: Option<&[Hole]>,
        tag: ParamTag,
        direct: bool,
        defer_at_exit: bool,
    ) -> Hole {
        // Tags of a function value's declared signature mean nothing;
        // any function with a matching signature could be called.
        if !direct {
            return self.heap_hole();
        }

        let leaks = match tag {
            ParamTag::Leaks(l) => l,
            // Unknown tags and the uintptr sentinels assume the
            // worst. For genuine uintptr arguments the heap hole is
            // vacuous (no pointers); for peeled uintptr-escapes
            // arguments it is exactly the point.
            ParamTag::Unknown | ParamTag::UnsafeUintptr | ParamTag::UintptrEscapes => {
                return self.heap_hole()
            }
        };

        if leaks.heap() == Some(0) {
            return self.heap_hole();
        }

        let mut tag_ks = Vec::new();
        if defer_at_exit {
            // The value must stay live until the deferred call runs.
            let loc = self.new_loc(None, false);
            tag_ks.push(self.as_hole(loc));
        }

        if leaks.heap() == Some(1) {
            tag_ks.push(self.heap_hole().shift(1));
        }

        if let Some(ks) = ks {
            for (i, &k) in ks.iter().enumerate() {
                if let Some(x) = leaks.result(i) {
                    tag_ks.push(k.shift(x));
                }
            }
        }

        self.tee_hole(&tag_ks)
    }

    /// For arguments to uintptr-escapes functions, peel away a
    /// pointer-to-uintptr conversion so the raw pointer itself flows
    /// to the heap.
    fn peel_uintptr_escapes<'e>(
        &self,
        direct_fn: Option<FuncId>,
        sig: Option<&FnSig>,
        i: usize,
        arg: &'e Expr,
    ) -> &'e Expr {
        let Some(f) = direct_fn else { return arg };
        let Some(sig) = sig else { return arg };
        if !self.module.funcs[f].pragma.contains(Pragma::UINTPTR_ESCAPES) {
            return arg;
        }
        let ExprKind::Conv { operand, ty } = &arg.kind else {
            return arg;
        };
        if !ty.is_uintptr() || !operand.ty(self.module).is_unsafe_ptr() {
            return arg;
        }
        let mut x = i;
        if sig.variadic && x >= sig.params.len() {
            x = sig.params.len() - 1;
        }
        let param_is_uintptr = {
            let pty = &sig.params[x].ty;
            pty.is_uintptr() || (sig.variadic && x == sig.params.len() - 1 && pty.is_slice() && pty.elem().is_uintptr())
        };
        if param_is_uintptr {
            operand
        } else {
            arg
        }
    }
}
