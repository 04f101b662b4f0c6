//! End-to-end escape analysis scenarios.
//!
//! Each test assembles a small module through [`ModuleBuilder`], runs
//! the full analysis, and checks placements, parameter tags, and the
//! diagnostic notes.

use tern_escape::{analyze, EscapeResults, ParamTag, Placement};
use tern_intern::Symbol;
use tern_ir::{
    Builtin, CallExpr, Callee, Capture, Expr, ExprKind, FuncId, Module, ModuleBuilder, Pragma,
    Stmt, StmtKind, VarId,
};
use tern_session::Session;
use tern_types::{Field, FnSig, SigParam, Ty};

fn fnsig(params: Vec<SigParam>, results: Vec<SigParam>) -> FnSig {
    FnSig {
        params,
        results,
        variadic: false,
    }
}

fn ptr_int() -> Ty {
    Ty::ptr(Ty::Int)
}

fn sink(ty: Ty) -> Expr {
    Expr::synth(ExprKind::Global {
        name: Symbol::intern("sink"),
        ty,
    })
}

fn direct_call(b: &mut ModuleBuilder, f: FuncId, args: Vec<Expr>) -> CallExpr {
    CallExpr {
        id: b.node(),
        callee: Callee::Fn(f),
        args,
        spread: false,
    }
}

fn run(m: &Module) -> (EscapeResults, Vec<String>) {
    let sess = Session::with_verbosity(1);
    let res = analyze(m, &sess);
    assert!(!sess.has_errors(), "unexpected errors: {:?}", sess.diagnostics());
    (res, sess.notes())
}

fn has_note(notes: &[String], want: &str) -> bool {
    notes.iter().any(|n| n == want)
}

fn assert_stack(res: &EscapeResults, v: VarId) {
    match res.var_placement(v) {
        Some(p) => assert!(!p.is_heap(), "expected stack placement, got {p:?}"),
        None => panic!("variable was not analyzed"),
    }
}

fn assert_heap(res: &EscapeResults, v: VarId) {
    assert_eq!(res.var_placement(v), Some(Placement::Heap));
}

/// `func id(p *int) *int { return p }`
fn build_id(b: &mut ModuleBuilder) -> FuncId {
    let id = b.declare_func(
        "id",
        fnsig(
            vec![SigParam::named("p", ptr_int())],
            vec![SigParam::anon(ptr_int())],
        ),
    );
    let p = b.param(id, "p", ptr_int());
    b.result(id, "~r0", ptr_int());
    b.set_body(id, vec![Stmt::ret(vec![Expr::var(p)])]);
    id
}

#[test]
fn test_passthrough_param_leaks_to_result() {
    let mut b = ModuleBuilder::new();
    let id = build_id(&mut b);
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert!(has_note(&notes, "leaking param: p to result ~r0 level=0"));

    let tag = res.tags[&id][0];
    match tag {
        ParamTag::Leaks(l) => {
            assert_eq!(l.result(0), Some(0));
            assert_eq!(l.heap(), None);
        }
        other => panic!("unexpected tag {other:?}"),
    }
}

#[test]
fn test_result_leak_replayed_to_local_stays_on_stack() {
    let mut b = ModuleBuilder::new();
    let id = build_id(&mut b);
    let g = b.declare_func("g", fnsig(vec![], vec![]));
    let x = b.local(g, "x", Ty::Int);
    let y = b.local(g, "y", ptr_int());
    let call = direct_call(&mut b, id, vec![Expr::addr(Expr::var(x))]);
    b.set_body(
        g,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::synth(StmtKind::Decl(y)),
            Stmt::assign(Expr::var(y), Expr::synth(ExprKind::Call(call))),
        ],
    );
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert_stack(&res, x);
    assert!(!has_note(&notes, "moved to heap: x"));
}

#[test]
fn test_result_leak_replayed_to_global_escapes() {
    let mut b = ModuleBuilder::new();
    let id = build_id(&mut b);
    let g = b.declare_func("g", fnsig(vec![], vec![]));
    let x = b.local(g, "x", Ty::Int);
    let call = direct_call(&mut b, id, vec![Expr::addr(Expr::var(x))]);
    b.set_body(
        g,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::assign(sink(ptr_int()), Expr::synth(ExprKind::Call(call))),
        ],
    );
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert_heap(&res, x);
    assert!(has_note(&notes, "moved to heap: x"));
}

#[test]
fn test_address_of_local_returned_moves_to_heap() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func("f", fnsig(vec![], vec![SigParam::anon(ptr_int())]));
    b.result(f, "~r0", ptr_int());
    let x = b.local(f, "x", Ty::Int);
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::ret(vec![Expr::addr(Expr::var(x))]),
        ],
    );
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert_heap(&res, x);
    assert!(has_note(&notes, "moved to heap: x"));

    let reloc = res
        .heap_vars
        .iter()
        .find(|r| r.var == x)
        .expect("missing relocation");
    assert!(!reloc.needs_stack_shadow);
}

#[test]
fn test_escaping_param_keeps_stack_shadow() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func(
        "f",
        fnsig(vec![SigParam::named("p", ptr_int())], vec![]),
    );
    let p = b.param(f, "p", ptr_int());
    b.set_body(
        f,
        vec![Stmt::assign(
            sink(Ty::ptr(ptr_int())),
            Expr::addr(Expr::var(p)),
        )],
    );
    let m = b.finish().unwrap();

    let (res, _) = run(&m);
    assert_heap(&res, p);
    let reloc = res
        .heap_vars
        .iter()
        .find(|r| r.var == p)
        .expect("missing relocation");
    assert!(reloc.needs_stack_shadow);
}

#[test]
fn test_interface_boxing_escapes_through_global() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let i = b.local(f, "i", Ty::Int);
    let box_id = b.node();
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(i)),
            Stmt::assign(
                sink(Ty::Interface),
                Expr::synth(ExprKind::ConvIface {
                    id: box_id,
                    operand: Box::new(Expr::var(i)),
                }),
            ),
        ],
    );
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert_eq!(res.alloc_placement(box_id), Some(Placement::Heap));
    assert!(has_note(&notes, "int value in interface escapes to heap"));
}

#[test]
fn test_interface_boxing_into_local_stays() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let i = b.local(f, "i", Ty::Int);
    let a = b.local(f, "a", Ty::Interface);
    let box_id = b.node();
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(i)),
            Stmt::synth(StmtKind::Decl(a)),
            Stmt::assign(
                Expr::var(a),
                Expr::synth(ExprKind::ConvIface {
                    id: box_id,
                    operand: Box::new(Expr::var(i)),
                }),
            ),
        ],
    );
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert!(!res.alloc_placement(box_id).unwrap().is_heap());
    assert!(has_note(&notes, "int value in interface does not escape"));
}

/// The closure and its body for `func() *int { return &x }`.
fn build_addr_closure(b: &mut ModuleBuilder, parent: FuncId, x: VarId) -> (FuncId, Expr) {
    let clo = b.declare_closure(
        "f.func1",
        fnsig(vec![], vec![SigParam::anon(ptr_int())]),
        parent,
    );
    b.result(clo, "~r0", ptr_int());
    let alias = b.capture(clo, x);
    b.set_body(clo, vec![Stmt::ret(vec![Expr::addr(Expr::var(alias))])]);
    let lit = Expr::synth(ExprKind::Closure {
        id: b.node(),
        func: clo,
        captures: vec![Capture {
            alias,
            by_value: false,
        }],
    });
    (clo, lit)
}

#[test]
fn test_directly_called_closure_result_does_not_escape() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let x = b.local(f, "x", Ty::Int);
    let p = b.local(f, "p", ptr_int());
    let (clo, lit) = build_addr_closure(&mut b, f, x);
    b.mark_called_directly(clo);
    let call = CallExpr {
        id: b.node(),
        callee: Callee::Closure(Box::new(lit)),
        args: vec![],
        spread: false,
    };
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::synth(StmtKind::Decl(p)),
            Stmt::assign(Expr::var(p), Expr::synth(ExprKind::Call(call))),
        ],
    );
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert_stack(&res, x);
    assert!(!has_note(&notes, "moved to heap: x"));
}

#[test]
fn test_closure_called_through_variable_escapes_capture() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let x = b.local(f, "x", Ty::Int);
    let clo_ty = Ty::Func(Box::new(fnsig(vec![], vec![SigParam::anon(ptr_int())])));
    let g = b.local(f, "g", clo_ty);
    let p = b.local(f, "p", ptr_int());
    let (_, lit) = build_addr_closure(&mut b, f, x);
    let call = CallExpr {
        id: b.node(),
        callee: Callee::Indirect(Box::new(Expr::var(g))),
        args: vec![],
        spread: false,
    };
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::synth(StmtKind::Decl(g)),
            Stmt::synth(StmtKind::Decl(p)),
            Stmt::assign(Expr::var(g), lit),
            Stmt::assign(Expr::var(p), Expr::synth(ExprKind::Call(call))),
        ],
    );
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert_heap(&res, x);
    assert!(has_note(&notes, "moved to heap: x"));
}

#[test]
fn test_loop_carried_address_escapes() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let l = b.local(f, "l", ptr_int());
    let x = b.local(f, "x", Ty::Int);
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(l)),
            Stmt::synth(StmtKind::For {
                cond: None,
                post: None,
                body: vec![
                    Stmt::synth(StmtKind::Decl(x)),
                    Stmt::assign(Expr::var(l), Expr::addr(Expr::var(x))),
                ],
            }),
        ],
    );
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert_heap(&res, x);
    assert_stack(&res, l);
    assert!(has_note(&notes, "moved to heap: x"));
}

fn build_capture_to_global(by_value: bool) -> (Module, VarId) {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let x = b.local(f, "x", ptr_int());
    let clo = b.declare_closure("f.func1", fnsig(vec![], vec![]), f);
    let alias = b.capture(clo, x);
    b.set_body(
        clo,
        vec![Stmt::expr(Expr::synth(ExprKind::Deref(Box::new(Expr::var(
            alias,
        )))))],
    );
    let lit = Expr::synth(ExprKind::Closure {
        id: b.node(),
        func: clo,
        captures: vec![Capture { alias, by_value }],
    });
    let clo_ty = Ty::Func(Box::new(fnsig(vec![], vec![])));
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::assign(sink(clo_ty), lit),
        ],
    );
    (b.finish().unwrap(), x)
}

#[test]
fn test_by_value_capture_keeps_var_on_stack() {
    let (m, x) = build_capture_to_global(true);
    let (res, _) = run(&m);
    assert_stack(&res, x);
}

#[test]
fn test_by_reference_capture_in_escaping_closure() {
    let (m, x) = build_capture_to_global(false);
    let (res, notes) = run(&m);
    assert_heap(&res, x);
    assert!(has_note(&notes, "moved to heap: x"));
}

#[test]
fn test_slice_self_assignment_is_ignored() {
    let buf_ty = Ty::Struct(vec![Field {
        name: Symbol::intern("buf"),
        ty: Ty::slice(Ty::Int),
    }]);
    let mut b = ModuleBuilder::new();
    let f = b.declare_func(
        "trim",
        fnsig(vec![SigParam::named("b", Ty::ptr(buf_ty.clone()))], vec![]),
    );
    let p = b.param(f, "b", Ty::ptr(buf_ty));
    let field = |b: Expr| Expr::field_ptr(b, "buf");
    let src = Expr::synth(ExprKind::SliceExpr {
        base: Box::new(field(Expr::var(p))),
        lo: Some(Box::new(Expr::lit(Ty::Int))),
        hi: Some(Box::new(Expr::lit(Ty::Int))),
        max: None,
    });
    b.set_body(f, vec![Stmt::assign(field(Expr::var(p)), src)]);
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert!(has_note(&notes, "ignoring self-assignment"));
    assert!(has_note(&notes, "b does not escape"));
    assert_eq!(res.tags[&f][0], ParamTag::Leaks(tern_escape::Leaks::NONE));
}

#[test]
fn test_noescape_external_keeps_arg_on_stack() {
    let mut b = ModuleBuilder::new();
    let ext = b.declare_external(
        "borrow",
        fnsig(vec![SigParam::named("p", ptr_int())], vec![]),
    );
    b.set_pragma(ext, Pragma::NOESCAPE);
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let x = b.local(f, "x", Ty::Int);
    let call = direct_call(&mut b, ext, vec![Expr::addr(Expr::var(x))]);
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::expr(Expr::synth(ExprKind::Call(call))),
        ],
    );
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert_stack(&res, x);
    assert!(has_note(&notes, "p does not escape"));
}

#[test]
fn test_untagged_external_leaks_arg() {
    let mut b = ModuleBuilder::new();
    let ext = b.declare_external(
        "keep",
        fnsig(vec![SigParam::named("p", ptr_int())], vec![]),
    );
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let x = b.local(f, "x", Ty::Int);
    let call = direct_call(&mut b, ext, vec![Expr::addr(Expr::var(x))]);
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::expr(Expr::synth(ExprKind::Call(call))),
        ],
    );
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert_heap(&res, x);
    assert!(has_note(&notes, "leaking param: p"));
}

#[test]
fn test_noescape_pragma_on_bodied_function_is_an_error() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    b.set_pragma(f, Pragma::NOESCAPE);
    b.set_body(f, vec![]);
    let m = b.finish().unwrap();

    let sess = Session::with_verbosity(1);
    let _ = analyze(&m, &sess);
    assert!(sess.has_errors());
}

/// `func use(p *int) {}` with a declared but unleaked parameter.
fn build_inert_callee(b: &mut ModuleBuilder) -> FuncId {
    let f = b.declare_func(
        "use",
        fnsig(vec![SigParam::named("p", ptr_int())], vec![]),
    );
    b.param(f, "p", ptr_int());
    b.set_body(f, vec![]);
    f
}

#[test]
fn test_spawned_call_forces_args_to_heap() {
    let mut b = ModuleBuilder::new();
    let callee = build_inert_callee(&mut b);
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let x = b.local(f, "x", Ty::Int);
    let call = direct_call(&mut b, callee, vec![Expr::addr(Expr::var(x))]);
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::synth(StmtKind::Spawn(call)),
        ],
    );
    let m = b.finish().unwrap();

    let (res, _) = run(&m);
    assert_heap(&res, x);
}

#[test]
fn test_defer_at_function_exit_respects_tags() {
    let mut b = ModuleBuilder::new();
    let callee = build_inert_callee(&mut b);
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let x = b.local(f, "x", Ty::Int);
    let call = direct_call(&mut b, callee, vec![Expr::addr(Expr::var(x))]);
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::synth(StmtKind::Defer(call)),
        ],
    );
    let m = b.finish().unwrap();

    let (res, _) = run(&m);
    assert_stack(&res, x);
}

#[test]
fn test_defer_inside_loop_forces_args_to_heap() {
    let mut b = ModuleBuilder::new();
    let callee = build_inert_callee(&mut b);
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let x = b.local(f, "x", Ty::Int);
    let call = direct_call(&mut b, callee, vec![Expr::addr(Expr::var(x))]);
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::synth(StmtKind::For {
                cond: None,
                post: None,
                body: vec![Stmt::synth(StmtKind::Defer(call))],
            }),
        ],
    );
    let m = b.finish().unwrap();

    let (res, _) = run(&m);
    assert_heap(&res, x);
}

#[test]
fn test_variadic_backing_array_of_tagged_callee_stays() {
    let mut b = ModuleBuilder::new();
    let callee = b.declare_func(
        "log",
        FnSig {
            params: vec![SigParam::named("ps", Ty::slice(ptr_int()))],
            results: vec![],
            variadic: true,
        },
    );
    b.param(callee, "ps", Ty::slice(ptr_int()));
    b.set_body(callee, vec![]);

    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let x = b.local(f, "x", Ty::Int);
    let call = direct_call(&mut b, callee, vec![Expr::addr(Expr::var(x))]);
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::expr(Expr::synth(ExprKind::Call(call))),
        ],
    );
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert_stack(&res, x);
    assert!(has_note(&notes, "... argument does not escape"));
}

#[test]
fn test_variadic_args_to_untagged_external_escape() {
    let mut b = ModuleBuilder::new();
    let ext = b.declare_external(
        "printf",
        FnSig {
            params: vec![SigParam::named("ps", Ty::slice(ptr_int()))],
            results: vec![],
            variadic: true,
        },
    );
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let x = b.local(f, "x", Ty::Int);
    let call = direct_call(&mut b, ext, vec![Expr::addr(Expr::var(x))]);
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::expr(Expr::synth(ExprKind::Call(call))),
        ],
    );
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert_heap(&res, x);
    assert!(has_note(&notes, "... argument escapes to heap"));
}

#[test]
fn test_append_leaks_new_elements() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let s = b.local(f, "s", Ty::slice(ptr_int()));
    let x = b.local(f, "x", Ty::Int);
    let call = CallExpr {
        id: b.node(),
        callee: Callee::Builtin(Builtin::Append),
        args: vec![Expr::var(s), Expr::addr(Expr::var(x))],
        spread: false,
    };
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(s)),
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::assign(Expr::var(s), Expr::synth(ExprKind::Call(call))),
        ],
    );
    let m = b.finish().unwrap();

    let (res, _) = run(&m);
    assert_heap(&res, x);
    assert_stack(&res, s);
}

#[test]
fn test_panic_value_escapes() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let i = b.local(f, "i", Ty::Int);
    let box_id = b.node();
    let call = CallExpr {
        id: b.node(),
        callee: Callee::Builtin(Builtin::Panic),
        args: vec![Expr::synth(ExprKind::ConvIface {
            id: box_id,
            operand: Box::new(Expr::var(i)),
        })],
        spread: false,
    };
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(i)),
            Stmt::expr(Expr::synth(ExprKind::Call(call))),
        ],
    );
    let m = b.finish().unwrap();

    let (res, _) = run(&m);
    assert_eq!(res.alloc_placement(box_id), Some(Placement::Heap));
}

#[test]
fn test_map_store_escapes_value() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let map = b.local(f, "m", Ty::Map(Box::new(Ty::Int), Box::new(ptr_int())));
    let x = b.local(f, "x", Ty::Int);
    let dst = Expr::synth(ExprKind::IndexMap {
        base: Box::new(Expr::var(map)),
        index: Box::new(Expr::lit(Ty::Int)),
    });
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(map)),
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::assign(dst, Expr::addr(Expr::var(x))),
        ],
    );
    let m = b.finish().unwrap();

    let (res, _) = run(&m);
    assert_heap(&res, x);
}

#[test]
fn test_channel_send_escapes_value() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let ch = b.local(f, "ch", Ty::Chan(Box::new(ptr_int())));
    let x = b.local(f, "x", Ty::Int);
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(ch)),
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::synth(StmtKind::Send {
                chan: Expr::var(ch),
                value: Expr::addr(Expr::var(x)),
            }),
        ],
    );
    let m = b.finish().unwrap();

    let (res, _) = run(&m);
    assert_heap(&res, x);
}

#[test]
fn test_range_value_leaks_param_content() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func(
        "f",
        fnsig(vec![SigParam::named("ps", Ty::slice(ptr_int()))], vec![]),
    );
    let ps = b.param(f, "ps", Ty::slice(ptr_int()));
    let v = b.local(f, "v", ptr_int());
    b.set_body(
        f,
        vec![Stmt::synth(StmtKind::Range {
            expr: Expr::var(ps),
            key: None,
            value: Some(Expr::var(v)),
            body: vec![Stmt::assign(sink(ptr_int()), Expr::var(v))],
        })],
    );
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert!(has_note(&notes, "leaking param content: ps"));
    match res.tags[&f][0] {
        ParamTag::Leaks(l) => assert_eq!(l.heap(), Some(1)),
        other => panic!("unexpected tag {other:?}"),
    }
}

#[test]
fn test_mutual_recursion_keeps_params_on_stack() {
    // a(p) { return b(p) } and b(p) { return a(p) }. In-batch wiring
    // flows each argument into the callee's own parameter location
    // and each result into the caller's, so neither param ever
    // reaches a result and both tags stay empty.
    let sig = fnsig(
        vec![SigParam::named("p", ptr_int())],
        vec![SigParam::anon(ptr_int())],
    );
    let mut b = ModuleBuilder::new();
    let fa = b.declare_func("a", sig.clone());
    let fb = b.declare_func("b", sig);
    let pa = b.param(fa, "p", ptr_int());
    b.result(fa, "~r0", ptr_int());
    let pb = b.param(fb, "p", ptr_int());
    b.result(fb, "~r0", ptr_int());
    let call_b = direct_call(&mut b, fb, vec![Expr::var(pa)]);
    b.set_body(fa, vec![Stmt::ret(vec![Expr::synth(ExprKind::Call(call_b))])]);
    let call_a = direct_call(&mut b, fa, vec![Expr::var(pb)]);
    b.set_body(fb, vec![Stmt::ret(vec![Expr::synth(ExprKind::Call(call_a))])]);
    let m = b.finish().unwrap();

    let (res, notes) = run(&m);
    assert!(has_note(&notes, "p does not escape"));
    for (f, p) in [(fa, pa), (fb, pb)] {
        assert_stack(&res, p);
        match res.tags[&f][0] {
            ParamTag::Leaks(l) => assert!(l.is_empty(), "unexpected leaks {l:?}"),
            other => panic!("unexpected tag {other:?}"),
        }
    }
}

#[test]
fn test_uintptr_laundering_through_arithmetic_escapes() {
    let mut b = ModuleBuilder::new();
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let x = b.local(f, "x", Ty::Int);
    let as_unsafe = Expr::synth(ExprKind::Conv {
        operand: Box::new(Expr::addr(Expr::var(x))),
        ty: Ty::UnsafePtr,
    });
    let as_uintptr = Expr::synth(ExprKind::Conv {
        operand: Box::new(as_unsafe),
        ty: Ty::Uintptr,
    });
    let offset = Expr::synth(ExprKind::Binary {
        op: tern_ir::BinOp::Add,
        lhs: Box::new(as_uintptr),
        rhs: Box::new(Expr::lit(Ty::Uintptr)),
    });
    let back = Expr::synth(ExprKind::Conv {
        operand: Box::new(offset),
        ty: Ty::UnsafePtr,
    });
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::assign(sink(Ty::UnsafePtr), back),
        ],
    );
    let m = b.finish().unwrap();

    let (res, _) = run(&m);
    assert_heap(&res, x);
}

fn build_uintptr_call(with_pragma: bool) -> (Module, VarId) {
    let mut b = ModuleBuilder::new();
    let sys = b.declare_external(
        "sys",
        fnsig(vec![SigParam::named("tp", Ty::Uintptr)], vec![]),
    );
    if with_pragma {
        b.set_pragma(sys, Pragma::UINTPTR_ESCAPES);
    }
    let f = b.declare_func("f", fnsig(vec![], vec![]));
    let x = b.local(f, "x", Ty::Int);
    let as_unsafe = Expr::synth(ExprKind::Conv {
        operand: Box::new(Expr::addr(Expr::var(x))),
        ty: Ty::UnsafePtr,
    });
    let as_uintptr = Expr::synth(ExprKind::Conv {
        operand: Box::new(as_unsafe),
        ty: Ty::Uintptr,
    });
    let call = direct_call(&mut b, sys, vec![as_uintptr]);
    b.set_body(
        f,
        vec![
            Stmt::synth(StmtKind::Decl(x)),
            Stmt::expr(Expr::synth(ExprKind::Call(call))),
        ],
    );
    (b.finish().unwrap(), x)
}

#[test]
fn test_uintptr_escapes_pragma_pins_pointer_argument() {
    let (m, x) = build_uintptr_call(true);
    let (res, notes) = run(&m);
    assert_heap(&res, x);
    assert!(has_note(&notes, "assuming tp is unsafe uintptr"));
}

#[test]
fn test_plain_uintptr_conversion_does_not_escape() {
    let (m, x) = build_uintptr_call(false);
    let (res, _) = run(&m);
    assert_stack(&res, x);
}
