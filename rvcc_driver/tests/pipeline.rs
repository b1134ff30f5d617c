//! Whole-pipeline driver checks.

use rvcc_ast::{BinOp, Expr, Initializer, Stmt, Token, Type, VarInfo};
use rvcc_backend::Riscv64;
use rvcc_driver::{compile_program, CompileOptions, Session};
use rvcc_sema::Elaborator;

fn tok() -> Token {
    Token::none()
}

#[test]
fn program_compiles_to_text_and_data() {
    // int answer = 42;
    // int f(void) { return answer + 1; }
    let mut elab = Elaborator::new();
    let g = VarInfo::new("answer", Type::int())
        .with_init(Initializer::Single(Expr::fixnum(42, Type::int(), tok())));
    elab.define_global(g, &tok());

    let fty = Type::func(Type::int(), Some(vec![]), false);
    elab.begin_function("f", fty, vec![], false, false);
    let answer = elab.new_var_ref("answer", tok());
    let one = Expr::fixnum(1, Type::int(), tok());
    let sum = elab.new_bin(BinOp::Add, answer, one, tok());
    let ret = elab.new_return(Some(sum), tok());
    elab.end_function(Stmt::block(None, vec![ret], tok()));

    let (program, diags) = elab.into_program();
    let mut session = Session::new();
    session.diags.extend(diags);

    let isa = Riscv64::new();
    let asm =
        compile_program(&program, &mut session, &isa, &CompileOptions::default()).unwrap();

    assert!(asm.contains(".text"));
    assert!(asm.contains(".global f"));
    assert!(asm.contains("la "), "global access goes through its label:\n{}", asm);
    assert!(asm.contains(".data"));
    assert!(asm.contains("answer:"));
    assert!(asm.contains(".word 42"));
    assert_eq!(session.exit_code(), 0);
}

#[test]
fn semantic_errors_fail_the_compilation() {
    let mut elab = Elaborator::new();
    let fty = Type::func(Type::int(), Some(vec![]), false);
    elab.begin_function("f", fty, vec![], false, false);
    // Undeclared variable records an error and produces a dummy.
    let bad = elab.new_var_ref("missing", tok());
    let ret = elab.new_return(Some(bad), tok());
    elab.end_function(Stmt::block(None, vec![ret], tok()));

    let (program, diags) = elab.into_program();
    let mut session = Session::new();
    session.diags.extend(diags);

    let isa = Riscv64::new();
    let result = compile_program(&program, &mut session, &isa, &CompileOptions::default());
    assert!(result.is_err());
    assert_eq!(session.exit_code(), 1);
}

#[test]
fn static_local_twin_is_emitted_as_a_global() {
    // int f(void) { static int counter; return counter; }
    let mut elab = Elaborator::new();
    let fty = Type::func(Type::int(), Some(vec![]), false);
    elab.begin_function("f", fty, vec![], false, false);
    elab.enter_scope();
    let var = VarInfo::new("counter", Type::int())
        .with_storage(rvcc_ast::VarStorage::STATIC);
    elab.define_var(var, &tok());
    let read = elab.new_var_ref("counter", tok());
    let ret = elab.new_return(Some(read), tok());
    elab.exit_scope();
    elab.end_function(Stmt::block(None, vec![ret], tok()));

    let (program, diags) = elab.into_program();
    let mut session = Session::new();
    session.diags.extend(diags);
    let isa = Riscv64::new();
    let asm =
        compile_program(&program, &mut session, &isa, &CompileOptions::default()).unwrap();
    // The twin is named after the enclosing function and stays local.
    assert!(asm.contains("f.counter."), "{}", asm);
    assert!(asm.contains(".bss"), "{}", asm);
}
