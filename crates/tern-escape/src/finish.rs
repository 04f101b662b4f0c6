//! Projecting solved batches into side tables and diagnostics.
//!
//! The IR is never mutated; callers read allocation decisions out of
//! [`EscapeResults`]. Diagnostic notes mirror the compiler's
//! traditional phrasing ("moved to heap: x", "leaking param: p to
//! result ~r0 level=0") so the regression corpus can assert on them.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tern_ir::{FuncId, NodeId, Pragma, VarId};

use crate::graph::{Escape, FnState, LocNode};
use crate::leaks::{Leaks, ParamTag, NUM_TAGGED_RESULTS};

/// Where a variable or allocation site ends up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// Frame-allocated. `transient` marks storage that only needs to
    /// live until its enclosing statement completes.
    Stack {
        /// Statement-scoped lifetime.
        transient: bool,
    },
    /// Heap-allocated.
    Heap,
}

impl Placement {
    /// Is this heap placement?
    #[must_use]
    pub fn is_heap(self) -> bool {
        matches!(self, Placement::Heap)
    }
}

/// A variable that must be rewritten to live on the heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapRelocation {
    /// The escaping variable.
    pub var: VarId,
    /// Parameters and results keep a stack copy: values arrive and
    /// leave on the stack and are shuttled to and from the heap cell
    /// at function entry and exit.
    pub needs_stack_shadow: bool,
}

/// Everything escape analysis decides about a module.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EscapeResults {
    /// Placement of every analyzed variable.
    pub vars: FxHashMap<VarId, Placement>,
    /// Placement of every allocation site.
    pub allocs: FxHashMap<NodeId, Placement>,
    /// Variables to rewrite as heap cells, in discovery order.
    pub heap_vars: Vec<HeapRelocation>,
    /// Parameter tags per function, in analysis order.
    pub tags: IndexMap<FuncId, Vec<ParamTag>>,
}

impl EscapeResults {
    /// The placement of a variable. Variables of external functions
    /// are unknown to the analysis.
    #[must_use]
    pub fn var_placement(&self, v: VarId) -> Option<Placement> {
        self.vars.get(&v).copied()
    }

    /// The placement of an allocation site.
    #[must_use]
    pub fn alloc_placement(&self, id: NodeId) -> Option<Placement> {
        self.allocs.get(&id).copied()
    }
}

impl Escape<'_> {
    /// Record placements and emit flow diagnostics for a solved
    /// batch, then tag every function in it.
    pub(crate) fn finish_group(&mut self, group: &[FuncId]) {
        for loc in self.locs.indices().skip(2).collect::<Vec<_>>() {
            let Some(node) = self.locs[loc].node.clone() else {
                continue;
            };
            let escapes = self.locs[loc].escapes;
            let transient = self.locs[loc].transient;

            match node {
                LocNode::Alloc { id, kind, span } => {
                    if escapes {
                        self.sess.note(span, format!("{kind} escapes to heap"));
                        self.results.allocs.insert(id, Placement::Heap);
                    } else {
                        self.sess.note(span, format!("{kind} does not escape"));
                        self.results
                            .allocs
                            .insert(id, Placement::Stack { transient });
                    }
                }
                LocNode::Var(v) => {
                    let decl = &self.module.vars[v];
                    if escapes {
                        self.sess
                            .note(decl.span, format!("moved to heap: {}", decl.name));
                        self.results.vars.insert(v, Placement::Heap);
                        self.results.heap_vars.push(HeapRelocation {
                            var: v,
                            needs_stack_shadow: decl.class.is_param() || decl.class.is_result(),
                        });
                    } else {
                        self.results
                            .vars
                            .insert(v, Placement::Stack { transient });
                    }
                }
            }
        }

        for &f in group {
            self.tag_func(f);
        }
    }

    fn tag_func(&mut self, f: FuncId) {
        assert_eq!(self.fn_state[f], FnState::Started, "tagging unwalked function");
        self.fn_state[f] = FnState::Tagged;

        let nparams = self.module.funcs[f].sig.params.len();
        let tags: Vec<ParamTag> = (0..nparams).map(|i| self.param_tag(f, i)).collect();
        self.tags[f] = tags.clone();
        self.results.tags.insert(f, tags);
    }

    /// Compute the tag for parameter `i` of an analyzed function, and
    /// emit its leak diagnostics.
    fn param_tag(&mut self, f: FuncId, i: usize) -> ParamTag {
        let func = &self.module.funcs[f];
        let sig_param = &func.sig.params[i];
        let pty = sig_param.ty.clone();
        let name = match sig_param.name {
            Some(sym) => sym.to_string(),
            None => format!("arg#{i}"),
        };
        let span = func.span;

        if func.pragma.contains(Pragma::UINTPTR_ESCAPES) {
            if pty.is_uintptr() {
                self.sess
                    .note(span, format!("marking {name} as escaping uintptr"));
                return ParamTag::UintptrEscapes;
            }
            if func.sig.variadic
                && i == func.sig.params.len() - 1
                && pty.is_slice()
                && pty.elem().is_uintptr()
            {
                self.sess
                    .note(span, format!("marking {name} as escaping ...uintptr"));
                return ParamTag::UintptrEscapes;
            }
        }

        if !pty.has_pointers() {
            // Scalar parameters cannot leak anything.
            return ParamTag::Unknown;
        }

        // Parameters without a declared variable are unused.
        let Some(&v) = self.module.funcs[f].params.get(i) else {
            return ParamTag::Leaks(Leaks::NONE);
        };
        if sig_param.name.is_none() {
            return ParamTag::Leaks(Leaks::NONE);
        }

        let loc = self.old_loc(v);
        let mut esc = self.locs[loc].param_esc;
        esc.optimize();

        if !self.locs[loc].escapes {
            let span = self.module.vars[v].span;
            if esc.is_empty() {
                self.sess.note(span, format!("{name} does not escape"));
            }
            match esc.heap() {
                Some(0) => self.sess.note(span, format!("leaking param: {name}")),
                Some(_) => self
                    .sess
                    .note(span, format!("leaking param content: {name}")),
                None => {}
            }
            for ri in 0..NUM_TAGGED_RESULTS {
                if let Some(x) = esc.result(ri) {
                    let res = self.module.result_name(f, ri);
                    self.sess.note(
                        span,
                        format!("leaking param: {name} to result {res} level={x}"),
                    );
                }
            }
        }

        ParamTag::Leaks(esc)
    }

    /// Tag an external (body-less) function. Nothing is known about
    /// what it does with its arguments, so the tags assume retention
    /// unless a pragma promises otherwise.
    pub(crate) fn tag_external(&mut self, f: FuncId) {
        assert_eq!(self.fn_state[f], FnState::Unknown);
        self.fn_state[f] = FnState::Tagged;

        let func = &self.module.funcs[f];
        let span = func.span;
        let noescape = func.pragma.contains(Pragma::NOESCAPE);
        let mut tags = Vec::with_capacity(func.sig.params.len());

        for (i, p) in func.sig.params.iter().enumerate() {
            let name = match p.name {
                Some(sym) => sym.to_string(),
                None => format!("arg#{i}"),
            };

            // Uintptr arguments of external functions may hold
            // laundered pointers that must stay live across the call.
            if p.ty.is_uintptr() {
                self.sess
                    .note(span, format!("assuming {name} is unsafe uintptr"));
                tags.push(ParamTag::UnsafeUintptr);
                continue;
            }

            if !p.ty.has_pointers() {
                tags.push(ParamTag::Unknown);
                continue;
            }

            if noescape {
                self.sess.note(span, format!("{name} does not escape"));
                tags.push(ParamTag::Leaks(Leaks::NONE));
            } else {
                self.sess.note(span, format!("leaking param: {name}"));
                tags.push(ParamTag::Leaks(Leaks::full()));
            }
        }

        self.tags[f] = tags.clone();
        self.results.tags.insert(f, tags);
    }

    pub(crate) fn into_results(self) -> EscapeResults {
        self.results
    }
}
