//! Full-pipeline emission checks: elaborate, lower, tweak, allocate, emit.

use rvcc_ast::{BinOp, Expr, Stmt, Token, Type, VarInfo};
use rvcc_backend::{AsmStream, Riscv64, TargetIsa};
use rvcc_common::Diagnostics;
use rvcc_ir::{alloc_registers, IrBuilder};
use rvcc_sema::Elaborator;

fn tok() -> Token {
    Token::none()
}

fn int(v: i64) -> Expr {
    Expr::fixnum(v, Type::int(), tok())
}

fn emit(elab: Elaborator, name: &str) -> String {
    let (program, diags) = elab.into_program();
    assert!(!diags.has_errors(), "{:?}", diags.messages);
    let func = program.find_function(name).unwrap();
    let isa = Riscv64::new();
    let mut diags = Diagnostics::new();
    let mut ir = IrBuilder::build(&program, func, &mut diags, isa.build_config());
    assert!(!diags.has_errors(), "{:?}", diags.messages);
    isa.tweak(&mut ir);
    let extra = isa.extra_occupied(&ir);
    alloc_registers(&mut ir, &isa.alloc_settings(), extra);
    let mut asm = AsmStream::new();
    isa.emit_function(&mut ir, &mut asm);
    asm.to_string()
}

#[test]
fn constant_return_is_a_li_and_ret() {
    // int f(void) { return 2*3+4; }
    let mut elab = Elaborator::new();
    let fty = Type::func(Type::int(), Some(vec![]), false);
    elab.begin_function("f", fty, vec![], false, false);
    let mul = elab.new_bin(BinOp::Mul, int(2), int(3), tok());
    let sum = elab.new_bin(BinOp::Add, mul, int(4), tok());
    let ret = elab.new_return(Some(sum), tok());
    elab.end_function(Stmt::block(None, vec![ret], tok()));

    let asm = emit(elab, "f");
    assert!(asm.contains(".global f"), "{}", asm);
    assert!(asm.contains("li a0, 10"), "{}", asm);
    assert!(asm.contains("\tret"), "{}", asm);
    assert!(!asm.contains("mul"), "folded body must not multiply:\n{}", asm);
    // Leaf with no locals needs no frame.
    assert!(!asm.contains("sd ra"), "{}", asm);
}

#[test]
fn addition_uses_word_form_on_int() {
    // int add(int a, int b) { return a + b; }
    let mut elab = Elaborator::new();
    let fty = Type::func(Type::int(), Some(vec![Type::int(), Type::int()]), false);
    elab.begin_function("add", fty, vec!["a".into(), "b".into()], false, false);
    let a = elab.new_var_ref("a", tok());
    let b = elab.new_var_ref("b", tok());
    let sum = elab.new_bin(BinOp::Add, a, b, tok());
    let ret = elab.new_return(Some(sum), tok());
    elab.end_function(Stmt::block(None, vec![ret], tok()));

    let asm = emit(elab, "add");
    assert!(asm.contains("addw"), "{}", asm);
}

#[test]
fn calls_get_a_frame_and_a_call_instruction() {
    // int f(void) { return ext(7); }
    let mut elab = Elaborator::new();
    let ext_ty = Type::func(Type::int(), Some(vec![Type::int()]), false);
    elab.define_global(VarInfo::new("ext", ext_ty), &tok());
    let fty = Type::func(Type::int(), Some(vec![]), false);
    elab.begin_function("f", fty, vec![], false, false);
    let callee = elab.new_var_ref("ext", tok());
    let call = elab.new_funcall(callee, vec![int(7)], tok());
    let ret = elab.new_return(Some(call), tok());
    elab.end_function(Stmt::block(None, vec![ret], tok()));

    let asm = emit(elab, "f");
    assert!(asm.contains("call ext"), "{}", asm);
    assert!(asm.contains("li a0, 7"), "argument lands in a0:\n{}", asm);
    // Non-leaf functions save the return address pair.
    assert!(asm.contains("sd ra, 8(sp)"), "{}", asm);
    assert!(asm.contains("ld ra, 8(sp)"), "{}", asm);
}

#[test]
fn dense_switch_emits_rodata_table() {
    use rvcc_ast::StmtKind;
    let mut elab = Elaborator::new();
    let fty = Type::func(Type::void(), Some(vec![Type::int()]), false);
    elab.begin_function("s", fty, vec!["n".into()], false, false);
    let n = elab.new_var_ref("n", tok());
    let mut cases = Vec::new();
    let mut stmts = Vec::new();
    for v in 0..5 {
        let idx = elab.add_case(&mut cases, Some(v), &tok());
        stmts.push(Stmt::new(StmtKind::Case { index: idx }, tok()));
        stmts.push(Stmt::new(StmtKind::Break, tok()));
    }
    let body = Stmt::block(None, stmts, tok());
    let sw = Stmt::new(StmtKind::Switch { value: n, body: Box::new(body), cases }, tok());
    elab.end_function(Stmt::block(None, vec![sw], tok()));

    let asm = emit(elab, "s");
    // Table dispatch: shift by the word size, indirect jump, rodata table.
    assert!(asm.contains("slli"), "{}", asm);
    assert!(asm.contains("jr "), "{}", asm);
    assert!(asm.contains(".rodata"), "{}", asm);
    let quads = asm.matches("\t.quad .L").count();
    assert_eq!(quads, 5, "one table entry per case:\n{}", asm);
    assert!(asm.contains("bgeu"), "bounds check guards the table:\n{}", asm);
}

#[test]
fn float_compare_sets_then_branches() {
    // int f(double a, double b) { if (a < b) return 1; return 0; }
    use rvcc_ast::StmtKind;
    let mut elab = Elaborator::new();
    let fty = Type::func(Type::int(), Some(vec![Type::double(), Type::double()]), false);
    elab.begin_function("f", fty, vec!["a".into(), "b".into()], false, false);
    let a = elab.new_var_ref("a", tok());
    let b = elab.new_var_ref("b", tok());
    let cond = elab.new_bin(BinOp::Lt, a, b, tok());
    let then_ret = elab.new_return(Some(int(1)), tok());
    let iff = Stmt::new(
        StmtKind::If { cond, then_stmt: Box::new(then_ret), else_stmt: None },
        tok(),
    );
    let tail = elab.new_return(Some(int(0)), tok());
    elab.end_function(Stmt::block(None, vec![iff, tail], tok()));

    let asm = emit(elab, "f");
    assert!(asm.contains("flt.d"), "comparison materializes a boolean:\n{}", asm);
    assert!(asm.contains("bne"), "then branches on it:\n{}", asm);
}

#[test]
fn narrowing_cast_uses_shift_pair() {
    // char f(int x) { return (char)x; }
    let mut elab = Elaborator::new();
    let fty = Type::func(Type::char_type(), Some(vec![Type::int()]), false);
    elab.begin_function("f", fty, vec!["x".into()], false, false);
    let x = elab.new_var_ref("x", tok());
    let cast = elab.make_cast(x, &Type::char_type(), true);
    let ret = elab.new_return(Some(cast), tok());
    elab.end_function(Stmt::block(None, vec![ret], tok()));

    let asm = emit(elab, "f");
    assert!(asm.contains("slli"), "{}", asm);
    assert!(asm.contains("srai"), "signed source refills arithmetically:\n{}", asm);
}

#[test]
fn widening_signed_int_uses_sext_w() {
    // long f(int x) { return (long)x; }
    let mut elab = Elaborator::new();
    let fty = Type::func(Type::long(), Some(vec![Type::int()]), false);
    elab.begin_function("f", fty, vec!["x".into()], false, false);
    let x = elab.new_var_ref("x", tok());
    let cast = elab.make_cast(x, &Type::long(), true);
    let ret = elab.new_return(Some(cast), tok());
    elab.end_function(Stmt::block(None, vec![ret], tok()));

    let asm = emit(elab, "f");
    assert!(asm.contains("sext.w"), "{}", asm);
}
