//! AST-to-IR lowering scenarios.

use rvcc_ast::{BinOp, Expr, Stmt, StmtKind, Token, Type, VarInfo};
use rvcc_common::Diagnostics;
use rvcc_ir::{BuildConfig, FuncIr, IrBinOp, IrInst, IrBuilder};
use rvcc_sema::Elaborator;

fn tok() -> Token {
    Token::none()
}

fn int(v: i64) -> Expr {
    Expr::fixnum(v, Type::int(), tok())
}

fn lower(elab: Elaborator, name: &str) -> FuncIr {
    let (program, diags) = elab.into_program();
    assert!(!diags.has_errors(), "{:?}", diags.messages);
    let func = program.find_function(name).unwrap();
    let mut diags = Diagnostics::new();
    let ir = IrBuilder::build(&program, func, &mut diags, BuildConfig::default());
    assert!(!diags.has_errors(), "{:?}", diags.messages);
    ir
}

fn all_irs(func: &FuncIr) -> Vec<IrInst> {
    func.order
        .iter()
        .flat_map(|id| func.block(*id).irs.clone())
        .collect()
}

#[test]
fn folded_constant_body_emits_single_result() {
    // int f(void) { return 2*3+4; }
    let mut elab = Elaborator::new();
    let fty = Type::func(Type::int(), Some(vec![]), false);
    elab.begin_function("f", fty, vec![], false, false);
    let mul = elab.new_bin(BinOp::Mul, int(2), int(3), tok());
    let sum = elab.new_bin(BinOp::Add, mul, int(4), tok());
    let ret = elab.new_return(Some(sum), tok());
    elab.end_function(Stmt::block(None, vec![ret], tok()));

    let ir = lower(elab, "f");
    let irs = all_irs(&ir);
    let results: Vec<_> = irs
        .iter()
        .filter_map(|i| match i {
            IrInst::Result { src } => Some(*src),
            _ => None,
        })
        .collect();
    assert_eq!(results.len(), 1);
    assert_eq!(ir.vregs.get(results[0]).konst, 10);
    assert!(
        !irs.iter().any(|i| matches!(i, IrInst::Bin { op: IrBinOp::Mul, .. })),
        "no multiply may survive constant folding"
    );
}

#[test]
fn double_inlining_leaves_no_calls() {
    // static inline int inc(int x) { return x + 1; }
    // int g(void) { return inc(inc(41)); }
    let mut elab = Elaborator::new();
    let inc_ty = Type::func(Type::int(), Some(vec![Type::int()]), false);
    elab.begin_function("inc", inc_ty, vec!["x".into()], true, true);
    let x = elab.new_var_ref("x", tok());
    let sum = elab.new_bin(BinOp::Add, x, int(1), tok());
    let ret = elab.new_return(Some(sum), tok());
    elab.end_function(Stmt::block(None, vec![ret], tok()));

    let g_ty = Type::func(Type::int(), Some(vec![]), false);
    elab.begin_function("g", g_ty, vec![], false, false);
    let callee = elab.new_var_ref("inc", tok());
    let inner = elab.new_funcall(callee.clone(), vec![int(41)], tok());
    let outer = elab.new_funcall(callee, vec![inner], tok());
    let ret = elab.new_return(Some(outer), tok());
    elab.end_function(Stmt::block(None, vec![ret], tok()));

    let ir = lower(elab, "g");
    let irs = all_irs(&ir);
    assert!(
        !irs.iter().any(|i| matches!(i, IrInst::Call { .. })),
        "both call sites must be expanded"
    );
    // Two expansions mean two parameter bindings and two additions.
    let adds = irs
        .iter()
        .filter(|i| matches!(i, IrInst::Bin { op: IrBinOp::Add, .. }))
        .count();
    assert_eq!(adds, 2);
}

#[test]
fn dense_switch_builds_a_complete_table() {
    // switch (n) { case 0..=3: return; } with no default.
    let mut elab = Elaborator::new();
    let fty = Type::func(Type::void(), Some(vec![Type::int()]), false);
    elab.begin_function("s", fty, vec!["n".into()], false, false);
    let n = elab.new_var_ref("n", tok());

    let mut cases = Vec::new();
    let mut stmts = Vec::new();
    for v in 0..4 {
        let idx = elab.add_case(&mut cases, Some(v), &tok());
        stmts.push(Stmt::new(StmtKind::Case { index: idx }, tok()));
        stmts.push(Stmt::new(StmtKind::Break, tok()));
    }
    let body = Stmt::block(None, stmts, tok());
    let case_count = cases.len();
    let sw = Stmt::new(StmtKind::Switch { value: n, body: Box::new(body), cases }, tok());
    elab.end_function(Stmt::block(None, vec![sw], tok()));

    let ir = lower(elab, "s");
    let irs = all_irs(&ir);
    let table = irs
        .iter()
        .find_map(|i| match i {
            IrInst::TJmp { table, .. } => Some(table.clone()),
            _ => None,
        })
        .expect("dense cases dispatch through a table");
    // The jump table length equals the original case count.
    assert_eq!(table.len(), case_count);
    // Bounds check precedes the table jump, branching to the fallthrough.
    assert!(irs.iter().any(|i| matches!(
        i,
        IrInst::Jmp { cc, .. } if cc.unsigned && cc.kind == rvcc_ir::CcKind::Ge
    )));
}

#[test]
fn sparse_switch_uses_compare_chain() {
    let mut elab = Elaborator::new();
    let fty = Type::func(Type::void(), Some(vec![Type::int()]), false);
    elab.begin_function("s", fty, vec!["n".into()], false, false);
    let n = elab.new_var_ref("n", tok());

    let mut cases = Vec::new();
    let i0 = elab.add_case(&mut cases, Some(10), &tok());
    let i1 = elab.add_case(&mut cases, Some(99), &tok());
    let body = Stmt::block(
        None,
        vec![
            Stmt::new(StmtKind::Case { index: i0 }, tok()),
            Stmt::new(StmtKind::Break, tok()),
            Stmt::new(StmtKind::Case { index: i1 }, tok()),
            Stmt::new(StmtKind::Break, tok()),
        ],
        tok(),
    );
    let sw = Stmt::new(StmtKind::Switch { value: n, body: Box::new(body), cases }, tok());
    elab.end_function(Stmt::block(None, vec![sw], tok()));

    let ir = lower(elab, "s");
    let irs = all_irs(&ir);
    assert!(!irs.iter().any(|i| matches!(i, IrInst::TJmp { .. })));
    let eq_branches = irs
        .iter()
        .filter(|i| matches!(i, IrInst::Jmp { cc, .. } if cc.kind == rvcc_ir::CcKind::Eq))
        .count();
    assert_eq!(eq_branches, 2);
}

#[test]
fn short_circuit_and_branches_instead_of_materializing() {
    // if (a && b) return 1; return 0;
    let mut elab = Elaborator::new();
    let fty = Type::func(Type::int(), Some(vec![Type::int(), Type::int()]), false);
    elab.begin_function("f", fty, vec!["a".into(), "b".into()], false, false);
    let a = elab.new_var_ref("a", tok());
    let b = elab.new_var_ref("b", tok());
    let cond = elab.new_bin(BinOp::LogAnd, a, b, tok());
    let then_ret = elab.new_return(Some(int(1)), tok());
    let iff = Stmt::new(
        StmtKind::If { cond, then_stmt: Box::new(then_ret), else_stmt: None },
        tok(),
    );
    let tail_ret = elab.new_return(Some(int(0)), tok());
    elab.end_function(Stmt::block(None, vec![iff, tail_ret], tok()));

    let ir = lower(elab, "f");
    let irs = all_irs(&ir);
    // Two conditional branches, one per operand, and no Cond that would
    // materialize the boolean.
    let cond_jumps = irs
        .iter()
        .filter(|i| {
            matches!(i, IrInst::Jmp { cc, .. } if cc.kind != rvcc_ir::CcKind::Any)
        })
        .count();
    assert_eq!(cond_jumps, 2);
    assert!(!irs.iter().any(|i| matches!(i, IrInst::Cond { .. })));
}

#[test]
fn pointer_add_lowers_to_scaled_ptradd() {
    // int *f(int *p, int i) { return p + i; }
    let mut elab = Elaborator::new();
    let pty = Type::ptr(Type::int());
    let fty = Type::func(pty.clone(), Some(vec![pty.clone(), Type::int()]), false);
    elab.begin_function("f", fty, vec!["p".into(), "i".into()], false, false);
    let p = elab.new_var_ref("p", tok());
    let i = elab.new_var_ref("i", tok());
    let sum = elab.new_bin(BinOp::Add, p, i, tok());
    let ret = elab.new_return(Some(sum), tok());
    elab.end_function(Stmt::block(None, vec![ret], tok()));

    let ir = lower(elab, "f");
    let irs = all_irs(&ir);
    let ptradd = irs.iter().find_map(|i| match i {
        IrInst::PtrAdd { scale, index, .. } => Some((*scale, index.is_some())),
        _ => None,
    });
    assert_eq!(ptradd, Some((4, true)), "index scaled by the pointee size");
}

#[test]
fn call_pushes_register_args_and_captures_site() {
    // int f(int a) { return ext(a, 1); } with int ext(int, int);
    let mut elab = Elaborator::new();
    let ext_ty = Type::func(Type::int(), Some(vec![Type::int(), Type::int()]), false);
    elab.define_global(VarInfo::new("ext", ext_ty), &tok());
    let fty = Type::func(Type::int(), Some(vec![Type::int()]), false);
    elab.begin_function("f", fty, vec!["a".into()], false, false);
    let callee = elab.new_var_ref("ext", tok());
    let a = elab.new_var_ref("a", tok());
    let call = elab.new_funcall(callee, vec![a, int(1)], tok());
    let ret = elab.new_return(Some(call), tok());
    elab.end_function(Stmt::block(None, vec![ret], tok()));

    let ir = lower(elab, "f");
    let irs = all_irs(&ir);
    assert!(irs.iter().any(|i| matches!(i, IrInst::Precall { .. })));
    let pushargs: Vec<usize> = irs
        .iter()
        .filter_map(|i| match i {
            IrInst::Pusharg { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(pushargs.len(), 2);
    assert!(pushargs.contains(&0) && pushargs.contains(&1));
    assert!(irs.iter().any(
        |i| matches!(i, IrInst::Call { target: rvcc_ir::CallTarget::Label(l), .. } if l == "ext")
    ));
    assert_eq!(ir.call_sites.len(), 1);
}
