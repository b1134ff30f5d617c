//! Reachability analysis and the function-end return mark.

use rvcc_ast::{Reach, Stmt, StmtKind};
use rvcc_common::Diagnostics;

/// Does `stmt` contain a `break` that escapes it? Nested loops and
/// switches capture their own breaks.
fn has_escaping_break(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Break => true,
        StmtKind::While { .. }
        | StmtKind::DoWhile { .. }
        | StmtKind::For { .. }
        | StmtKind::Switch { .. } => false,
        StmtKind::Block { stmts, .. } => stmts.iter().any(has_escaping_break),
        StmtKind::If { then_stmt, else_stmt, .. } => {
            has_escaping_break(then_stmt)
                || else_stmt.as_deref().map_or(false, has_escaping_break)
        }
        StmtKind::Label { stmt, .. } => has_escaping_break(stmt),
        _ => false,
    }
}

/// Does `stmt` contain a `continue` for the enclosing loop? Switches do
/// not capture `continue`.
fn has_escaping_continue(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Continue => true,
        StmtKind::While { .. } | StmtKind::DoWhile { .. } | StmtKind::For { .. } => false,
        StmtKind::Switch { body, .. } => has_escaping_continue(body),
        StmtKind::Block { stmts, .. } => stmts.iter().any(has_escaping_continue),
        StmtKind::If { then_stmt, else_stmt, .. } => {
            has_escaping_continue(then_stmt)
                || else_stmt.as_deref().map_or(false, has_escaping_continue)
        }
        StmtKind::Label { stmt, .. } => has_escaping_continue(stmt),
        _ => false,
    }
}

/// A statement control might jump into even when the preceding statement
/// stopped: labels, cases and loops (via goto), and `for` with a
/// side-effect pre-expression.
fn is_flow_exempt(stmt: &Stmt) -> bool {
    matches!(
        stmt.kind,
        StmtKind::Label { .. }
            | StmtKind::Case { .. }
            | StmtKind::While { .. }
            | StmtKind::DoWhile { .. }
            | StmtKind::For { .. }
    )
}

/// Compute and record the [`Reach`] bitset of `stmt`, warning on
/// unreachable statements.
pub fn check_reach(stmt: &mut Stmt, diags: &mut Diagnostics) -> Reach {
    let reach = match &mut stmt.kind {
        StmtKind::Return { .. } => Reach::STOP | Reach::RETURN,
        StmtKind::Break | StmtKind::Continue | StmtKind::Goto { .. } => Reach::STOP,
        StmtKind::Empty
        | StmtKind::Expr(_)
        | StmtKind::VarDecl { .. }
        | StmtKind::Asm { .. } => Reach::empty(),
        StmtKind::Label { stmt, .. } => check_reach(stmt, diags),
        StmtKind::Case { .. } => Reach::empty(),

        StmtKind::If { cond, then_stmt, else_stmt } => {
            let then_reach = check_reach(then_stmt, diags);
            let else_reach = match else_stmt {
                Some(els) => check_reach(els, diags),
                None => Reach::empty(),
            };
            match cond.fixnum_value() {
                Some(0) => else_reach,
                Some(_) => then_reach,
                None => then_reach & else_reach,
            }
        }

        StmtKind::While { cond, body } => {
            check_reach(body, diags);
            let always = cond.fixnum_value().map_or(false, |v| v != 0);
            if always && !has_escaping_break(body) {
                Reach::STOP
            } else {
                Reach::empty()
            }
        }

        StmtKind::DoWhile { body, cond } => {
            let body_reach = check_reach(body, diags);
            let always = cond.fixnum_value().map_or(false, |v| v != 0);
            if body_reach.contains(Reach::STOP)
                && !has_escaping_break(body)
                && !has_escaping_continue(body)
            {
                body_reach
            } else if always && !has_escaping_break(body) {
                Reach::STOP
            } else {
                Reach::empty()
            }
        }

        StmtKind::For { cond, body, .. } => {
            check_reach(body, diags);
            let always = cond.as_ref().map_or(true, |c| {
                c.fixnum_value().map_or(false, |v| v != 0)
            });
            if always && !has_escaping_break(body) {
                Reach::STOP
            } else {
                Reach::empty()
            }
        }

        StmtKind::Switch { body, cases, .. } => {
            let body_reach = check_reach(body, diags);
            let has_default = cases.iter().any(|c| c.is_none());
            if has_default
                && body_reach.contains(Reach::STOP)
                && !has_escaping_break(body)
            {
                body_reach
            } else {
                Reach::empty()
            }
        }

        StmtKind::Block { stmts, .. } => {
            let mut reach = Reach::empty();
            let mut warned = false;
            for s in stmts.iter_mut() {
                // Labels and cases are jump targets; control resumes there.
                if matches!(s.kind, StmtKind::Label { .. } | StmtKind::Case { .. }) {
                    reach.remove(Reach::STOP);
                }
                if reach.contains(Reach::STOP) {
                    if is_flow_exempt(s) {
                        // Possibly entered sideways; treat as a fresh entry.
                        reach = check_reach(s, diags);
                        continue;
                    }
                    if !warned {
                        diags.warning("unreachable statement", s.token.span);
                        warned = true;
                    }
                    check_reach(s, diags);
                    continue;
                }
                reach = check_reach(s, diags);
            }
            reach
        }
    };
    stmt.reach = reach;
    reach
}

/// Mark the last statement of a function body as the function-end return
/// so the emitter can skip the jump to the epilogue.
pub fn check_funcend_return(body: &mut Stmt, _returns_value: bool) {
    if let Some(last) = last_stmt_mut(body) {
        if let StmtKind::Return { func_end, .. } = &mut last.kind {
            *func_end = true;
        }
    }
}

fn last_stmt_mut(mut stmt: &mut Stmt) -> Option<&mut Stmt> {
    loop {
        match &stmt.kind {
            StmtKind::Block { .. } | StmtKind::Label { .. } => {}
            _ => return Some(stmt),
        }
        stmt = match &mut stmt.kind {
            StmtKind::Block { stmts, .. } => stmts.last_mut()?,
            StmtKind::Label { stmt: inner, .. } => inner,
            _ => unreachable!(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvcc_ast::{Expr, Token, Type};

    fn tok() -> Token {
        Token::none()
    }

    fn ret() -> Stmt {
        Stmt::ret(Some(Expr::fixnum(0, Type::int(), tok())), tok())
    }

    fn expr_stmt() -> Stmt {
        Stmt::expr(Expr::fixnum(1, Type::int(), tok()))
    }

    #[test]
    fn return_stops_and_returns() {
        let mut diags = Diagnostics::new();
        let mut s = ret();
        let r = check_reach(&mut s, &mut diags);
        assert!(r.contains(Reach::STOP));
        assert!(r.contains(Reach::RETURN));
    }

    #[test]
    fn if_reach_is_the_intersection_of_arms() {
        let mut diags = Diagnostics::new();
        let cond = Expr::var("c", rvcc_ast::GLOBAL_SCOPE, Type::int(), tok());

        let mut both = Stmt::new(
            StmtKind::If {
                cond: cond.clone(),
                then_stmt: Box::new(ret()),
                else_stmt: Some(Box::new(ret())),
            },
            tok(),
        );
        assert!(check_reach(&mut both, &mut diags).contains(Reach::STOP));

        let mut one_arm = Stmt::new(
            StmtKind::If { cond, then_stmt: Box::new(ret()), else_stmt: None },
            tok(),
        );
        assert!(!check_reach(&mut one_arm, &mut diags).contains(Reach::STOP));
    }

    #[test]
    fn folded_condition_keeps_surviving_arm() {
        let mut diags = Diagnostics::new();
        let mut s = Stmt::new(
            StmtKind::If {
                cond: Expr::fixnum(1, Type::int(), tok()),
                then_stmt: Box::new(ret()),
                else_stmt: Some(Box::new(expr_stmt())),
            },
            tok(),
        );
        assert!(check_reach(&mut s, &mut diags).contains(Reach::STOP));
    }

    #[test]
    fn endless_loop_stops_unless_broken() {
        let mut diags = Diagnostics::new();
        let one = Expr::fixnum(1, Type::int(), tok());

        let mut endless = Stmt::new(
            StmtKind::While { cond: one.clone(), body: Box::new(expr_stmt()) },
            tok(),
        );
        assert!(check_reach(&mut endless, &mut diags).contains(Reach::STOP));

        let body = Stmt::block(None, vec![Stmt::new(StmtKind::Break, tok())], tok());
        let mut breaking = Stmt::new(
            StmtKind::While { cond: one, body: Box::new(body) },
            tok(),
        );
        assert!(!check_reach(&mut breaking, &mut diags).contains(Reach::STOP));
    }

    #[test]
    fn inner_loop_break_does_not_escape() {
        let mut diags = Diagnostics::new();
        let one = Expr::fixnum(1, Type::int(), tok());
        let inner = Stmt::new(
            StmtKind::While {
                cond: one.clone(),
                body: Box::new(Stmt::new(StmtKind::Break, tok())),
            },
            tok(),
        );
        let mut outer = Stmt::new(
            StmtKind::While { cond: one, body: Box::new(inner) },
            tok(),
        );
        assert!(check_reach(&mut outer, &mut diags).contains(Reach::STOP));
    }

    #[test]
    fn switch_with_all_stopping_cases_stops() {
        let mut diags = Diagnostics::new();
        // switch (n) { case 1: return 10; default: return 20; }
        let body = Stmt::block(
            None,
            vec![
                Stmt::new(StmtKind::Case { index: 0 }, tok()),
                ret(),
                Stmt::new(StmtKind::Case { index: 1 }, tok()),
                ret(),
            ],
            tok(),
        );
        let mut sw = Stmt::new(
            StmtKind::Switch {
                value: Expr::var("n", rvcc_ast::GLOBAL_SCOPE, Type::int(), tok()),
                body: Box::new(body),
                cases: vec![Some(1), None],
            },
            tok(),
        );
        let r = check_reach(&mut sw, &mut diags);
        assert!(r.contains(Reach::STOP));
        assert!(r.contains(Reach::RETURN));
    }

    #[test]
    fn switch_without_default_falls_through() {
        let mut diags = Diagnostics::new();
        let body = Stmt::block(
            None,
            vec![Stmt::new(StmtKind::Case { index: 0 }, tok()), ret()],
            tok(),
        );
        let mut sw = Stmt::new(
            StmtKind::Switch {
                value: Expr::var("n", rvcc_ast::GLOBAL_SCOPE, Type::int(), tok()),
                body: Box::new(body),
                cases: vec![Some(1)],
            },
            tok(),
        );
        assert!(!check_reach(&mut sw, &mut diags).contains(Reach::STOP));
    }

    #[test]
    fn statement_after_stop_warns_once() {
        let mut diags = Diagnostics::new();
        let mut block = Stmt::block(None, vec![ret(), expr_stmt(), expr_stmt()], tok());
        check_reach(&mut block, &mut diags);
        assert_eq!(diags.warning_count(), 1);
    }

    #[test]
    fn label_after_stop_does_not_warn() {
        let mut diags = Diagnostics::new();
        let labeled = Stmt::new(
            StmtKind::Label { name: "out".into(), stmt: Box::new(expr_stmt()), used: true },
            tok(),
        );
        let mut block = Stmt::block(None, vec![ret(), labeled], tok());
        let r = check_reach(&mut block, &mut diags);
        assert_eq!(diags.warning_count(), 0);
        // Control can fall out through the label.
        assert!(!r.contains(Reach::STOP));
    }

    #[test]
    fn funcend_return_marks_trailing_return() {
        let mut body = Stmt::block(None, vec![expr_stmt(), ret()], tok());
        check_funcend_return(&mut body, true);
        let StmtKind::Block { stmts, .. } = &body.kind else { unreachable!() };
        let StmtKind::Return { func_end, .. } = &stmts[1].kind else { unreachable!() };
        assert!(*func_end);
    }
}
