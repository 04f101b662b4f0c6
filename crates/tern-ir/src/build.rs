//! Module construction.
//!
//! [`ModuleBuilder`] is how front ends (and tests) assemble a
//! [`Module`]. It hands out IDs eagerly so bodies can reference
//! functions and variables declared later, and validates the
//! cross-references once at [`ModuleBuilder::finish`].

use thiserror::Error;
use tern_index::IndexVec;
use tern_intern::Symbol;
use tern_span::Span;
use tern_types::{FnSig, Ty};

use crate::{Class, Func, FuncId, Module, NodeId, Pragma, Stmt, VarDecl, VarId};

/// A structural defect detected while finishing a module.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// A non-external function never received a body.
    #[error("function {0} declared without a body; use declare_external for body-less functions")]
    MissingBody(String),
    /// A capture alias names a variable owned by a function that does
    /// not enclose the closure.
    #[error("capture in {closure} refers to variable {var} of non-enclosing function")]
    CaptureNotEnclosing {
        /// The closure's name.
        closure: String,
        /// The captured variable's name.
        var: String,
    },
    /// Parameter variables disagree with the signature's arity.
    #[error("function {0} declares {1} parameter variables for a {2}-parameter signature")]
    ParamArity(String, usize, usize),
}

/// Incremental [`Module`] builder.
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    funcs: IndexVec<FuncId, Func>,
    vars: IndexVec<VarId, VarDecl>,
    has_body: Vec<bool>,
    external: Vec<bool>,
    num_nodes: u32,
}

impl ModuleBuilder {
    /// A fresh, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push_func(&mut self, name: &str, sig: FnSig, parent: Option<FuncId>, external: bool) -> FuncId {
        self.has_body.push(false);
        self.external.push(external);
        self.funcs.push(Func {
            name: Symbol::intern(name),
            sig,
            params: Vec::new(),
            results: Vec::new(),
            dcl: Vec::new(),
            body: None,
            pragma: Pragma::empty(),
            parent,
            called_directly: false,
            span: Span::DUMMY,
        })
    }

    /// Declare a top-level function. A body must follow via
    /// [`Self::set_body`].
    pub fn declare_func(&mut self, name: &str, sig: FnSig) -> FuncId {
        self.push_func(name, sig, None, false)
    }

    /// Declare a closure nested in `parent`.
    pub fn declare_closure(&mut self, name: &str, sig: FnSig, parent: FuncId) -> FuncId {
        self.push_func(name, sig, Some(parent), false)
    }

    /// Declare an externally implemented function. It takes no body
    /// and is only ever tagged, never analyzed.
    pub fn declare_external(&mut self, name: &str, sig: FnSig) -> FuncId {
        self.push_func(name, sig, None, true)
    }

    /// Attach pragmas to a function declaration.
    pub fn set_pragma(&mut self, f: FuncId, pragma: Pragma) {
        self.funcs[f].pragma = pragma;
    }

    /// Record that a closure literal for `f` appears directly in call
    /// position somewhere.
    pub fn mark_called_directly(&mut self, f: FuncId) {
        self.funcs[f].called_directly = true;
    }

    fn push_var(&mut self, owner: FuncId, name: &str, ty: Ty, class: Class) -> VarId {
        let v = self.vars.push(VarDecl {
            name: Symbol::intern(name),
            ty,
            class,
            owner,
            captured_from: None,
            span: Span::DUMMY,
        });
        self.funcs[owner].dcl.push(v);
        v
    }

    /// Declare the next parameter of `f`, in signature order.
    pub fn param(&mut self, f: FuncId, name: &str, ty: Ty) -> VarId {
        let idx = self.funcs[f].params.len() as u16;
        let v = self.push_var(f, name, ty, Class::Param(idx));
        self.funcs[f].params.push(v);
        v
    }

    /// Declare the next result of `f`, in signature order.
    pub fn result(&mut self, f: FuncId, name: &str, ty: Ty) -> VarId {
        let idx = self.funcs[f].results.len() as u16;
        let v = self.push_var(f, name, ty, Class::Result(idx));
        self.funcs[f].results.push(v);
        v
    }

    /// Declare a local variable of `f`.
    pub fn local(&mut self, f: FuncId, name: &str, ty: Ty) -> VarId {
        self.push_var(f, name, ty, Class::Local)
    }

    /// Declare a capture alias: the variable `outer` as seen from
    /// inside closure `clo`. If `outer` is itself an alias it is
    /// resolved to its defining declaration first, so aliases never
    /// chain.
    ///
    /// The alias is deliberately kept out of `clo`'s `dcl` list;
    /// analyses resolve it through [`Module::canonical_var`] instead
    /// of treating it as a fresh declaration.
    pub fn capture(&mut self, clo: FuncId, outer: VarId) -> VarId {
        let root = self.vars[outer].captured_from.unwrap_or(outer);
        let decl = &self.vars[root];
        let (name, ty, span) = (decl.name, decl.ty.clone(), decl.span);
        self.vars.push(VarDecl {
            name,
            ty,
            class: Class::Local,
            owner: clo,
            captured_from: Some(root),
            span,
        })
    }

    /// Set the body of a declared (non-external) function.
    pub fn set_body(&mut self, f: FuncId, body: Vec<Stmt>) {
        self.funcs[f].body = Some(body);
        self.has_body[f.as_u32() as usize] = true;
    }

    /// Allocate a fresh [`NodeId`] for an allocation site or call.
    pub fn node(&mut self) -> NodeId {
        let id = NodeId::from_u32(self.num_nodes);
        self.num_nodes += 1;
        id
    }

    /// Validate cross-references and produce the module.
    pub fn finish(self) -> Result<Module, BuildError> {
        for (f, func) in self.funcs.iter_enumerated() {
            let i = f.as_u32() as usize;
            if !self.external[i] && !self.has_body[i] {
                return Err(BuildError::MissingBody(func.name.as_str().to_owned()));
            }
            let want = func.sig.params.len();
            let got = func.params.len();
            if got != 0 && got != want {
                return Err(BuildError::ParamArity(
                    func.name.as_str().to_owned(),
                    got,
                    want,
                ));
            }
        }
        for decl in self.vars.iter() {
            let Some(root) = decl.captured_from else { continue };
            let def_owner = self.vars[root].owner;
            let mut cur = self.funcs[decl.owner].parent;
            let mut ok = false;
            while let Some(p) = cur {
                if p == def_owner {
                    ok = true;
                    break;
                }
                cur = self.funcs[p].parent;
            }
            if !ok {
                return Err(BuildError::CaptureNotEnclosing {
                    closure: self.funcs[decl.owner].name.as_str().to_owned(),
                    var: decl.name.as_str().to_owned(),
                });
            }
        }
        Ok(Module {
            funcs: self.funcs,
            vars: self.vars,
            num_nodes: self.num_nodes,
        })
    }
}
