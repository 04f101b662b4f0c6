//! Shortest-path flood over the flow graph.
//!
//! For every location we find the minimal dereference count along
//! any path from it to every other location. Address-of edges count
//! -1, so this is Bellman-Ford; path lengths are clamped at zero, so
//! negative cycles terminate. A location whose address (count below
//! zero) reaches somewhere that outlives it must be heap allocated,
//! and flows out of parameters are folded into their leak summaries.

use tern_ir::Class;
use tracing::debug;

use crate::graph::{Escape, LocId};
use crate::leaks::NUM_TAGGED_RESULTS;

impl Escape<'_> {
    /// Solve the current batch's graph.
    pub(crate) fn flood(&mut self) {
        let mut walkgen = 0u32;

        // Singleton slots 0 and 1 are the heap and blank locations.
        for root in self.locs.indices().skip(2).collect::<Vec<_>>() {
            walkgen += 1;
            self.walk_one(root, walkgen);
        }

        walkgen += 1;
        let heap = self.heap_loc();
        self.walk_one(heap, walkgen);
    }

    fn walk_one(&mut self, root: LocId, walkgen: u32) {
        self.locs[root].walkgen = walkgen;
        self.locs[root].derefs = 0;

        let mut todo = vec![root];
        while let Some(p) = todo.pop() {
            let mut base = self.locs[p].derefs;
            let addr_of = base < 0;
            if addr_of {
                base = 0;
                // The root holds a direct pointer to p, so p must
                // stay live as long as the root does, not just until
                // the enclosing statement finishes.
                if !self.locs[root].transient {
                    self.locs[p].transient = false;
                }
            }

            if self.outlives(root, p) {
                if addr_of && !self.locs[p].escapes {
                    debug!(?p, ?root, "address reaches an outliving location");
                    self.locs[p].escapes = true;
                    if root != self.heap_loc() {
                        let k = self.heap_hole();
                        self.flow(k, p);
                    }
                }

                let param = self.locs[p].is_var_where(self.module, Class::is_param);
                if param.is_some() {
                    self.record_leak(p, root, base);
                }
            }

            for i in 0..self.locs[p].edges.len() {
                let edge = self.locs[p].edges[i];
                let dist = base + edge.derefs;
                let src = &mut self.locs[edge.src];
                if src.walkgen != walkgen || src.derefs > dist {
                    src.walkgen = walkgen;
                    src.derefs = dist;
                    todo.push(edge.src);
                }
            }
        }
    }

    /// May values stored in `l` survive past `other`'s lifetime if
    /// `other` were stack allocated?
    fn outlives(&self, l: LocId, other: LocId) -> bool {
        if l == self.heap_loc() {
            return true;
        }
        let (Some(lf), Some(of)) = (self.locs[l].curfn, self.locs[other].curfn) else {
            return false;
        };

        // Callers can do anything with returned values, so results
        // outlive everything. The exception is a closure in call
        // position: its results flow straight to the enclosing
        // frame, e.g.
        //
        //    var u int
        //    *(func() *int { return &u }()) = 42
        //
        // which never lets &u outlive u.
        if self.locs[l]
            .is_var_where(self.module, Class::is_result)
            .is_some()
        {
            if self.module.contains_closure(of, lf) && self.module.funcs[lf].called_directly {
                return false;
            }
            return true;
        }

        // Within one function, anything declared outside a loop
        // outlives each iteration's locals:
        //
        //    var l *int
        //    for { l = new(int) }
        if lf == of && self.locs[l].loop_depth < self.locs[other].loop_depth {
            return true;
        }

        // A variable of the enclosing function outlives every frame
        // of a nested closure:
        //
        //    var l *int
        //    func() { l = new(int) }
        if self.module.contains_closure(lf, of) {
            return true;
        }

        false
    }

    /// Fold the flow `p -> sink` (at `derefs` dereferences) into
    /// parameter p's leak summary.
    fn record_leak(&mut self, p: LocId, sink: LocId, derefs: i32) {
        if self.locs[p].param_esc.heap() == Some(0) {
            return;
        }

        // A flow to one of the function's own leading results can be
        // replayed precisely by callers; everything else coarsens to
        // a heap leak.
        if let Some(r) = self.locs[sink].is_var_where(self.module, Class::is_result) {
            if self.locs[sink].curfn == self.locs[p].curfn {
                if let Class::Result(ri) = self.module.vars[r].class {
                    if (ri as usize) < NUM_TAGGED_RESULTS {
                        self.locs[p].param_esc.add_result(ri as usize, derefs);
                        return;
                    }
                }
            }
        }

        self.locs[p].param_esc.add_heap(derefs);
    }
}
