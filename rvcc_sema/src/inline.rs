//! Inline function expansion.
//!
//! A qualifying call site is replaced by a renamed deep clone of the
//! callee's body. Every expansion gets fresh parameter and local names, so
//! inlining the same function twice yields disjoint variable identities,
//! and inlined calls found inside a clone are themselves re-expanded from
//! their target's original body.

use hashbrown::HashMap;
use log::debug;

use rvcc_ast::{
    Expr, ExprKind, Function, Stmt, StmtKind, Token, Type, VarDeclItem, VarInfo, VarRef,
};

use crate::elaborate::Elaborator;

/// A function may be inlined iff it is `inline`, non-variadic, returns a
/// primitive or void, has a body, and contains no labels or gotos.
pub fn can_inline(func: &Function) -> bool {
    func.is_inline
        && !func.is_vaargs()
        && func.ret_type().is_prim()
        && func.body.is_some()
        && func.labels.is_empty()
        && func.gotos.is_empty()
}

/// Renaming map from `(original scope, name)` to the fresh variable.
type RenameMap = HashMap<(u32, String), VarRef>;

/// Expand a call to `callee` at the current elaboration point.
pub fn expand(elab: &mut Elaborator, callee: &Function, args: Vec<Expr>, token: Token) -> Expr {
    debug!("inlining `{}` into the current function", callee.name);
    let mut map = RenameMap::new();

    // Fresh top scope holding the renamed parameters.
    let top = elab.enter_scope();
    let mut params = Vec::with_capacity(callee.params.len());
    if let Some(callee_top) = callee.top_scope() {
        for pname in &callee.params {
            let pty = elab
                .scopes
                .var_in(callee_top, pname)
                .map(|v| v.ty.clone())
                .unwrap_or_else(Type::int);
            let fresh = elab.fresh_name(&format!("{}.{}", callee.name, pname));
            elab.scopes.add_var(top, VarInfo::new(fresh.clone(), pty));
            let vref = VarRef::new(fresh, top);
            map.insert((callee_top.0, pname.clone()), vref.clone());
            params.push(vref);
        }
    }

    let body = callee
        .body
        .as_ref()
        .map(|b| clone_stmt(elab, &mut map, b))
        .unwrap_or_else(Stmt::empty);
    elab.exit_scope();

    Expr::new(
        ExprKind::InlinedCall {
            name: callee.name.clone(),
            args,
            params,
            body: Box::new(body),
        },
        callee.ret_type().clone(),
        token,
    )
}

fn clone_stmt(elab: &mut Elaborator, map: &mut RenameMap, stmt: &Stmt) -> Stmt {
    let kind = match &stmt.kind {
        StmtKind::Empty => StmtKind::Empty,
        StmtKind::Expr(e) => StmtKind::Expr(clone_expr(elab, map, e)),

        StmtKind::Block { scope, stmts } => {
            let new_scope = match scope {
                Some(orig) => {
                    let new = elab.enter_scope();
                    // Locals get fresh storage; statics are redirected to
                    // their global twin by name.
                    let vars = elab.scopes.get(*orig).vars.clone();
                    for var in vars {
                        if let Some(alias) = &var.static_alias {
                            map.insert(
                                (orig.0, var.name.clone()),
                                VarRef::new(alias.clone(), rvcc_ast::GLOBAL_SCOPE),
                            );
                            continue;
                        }
                        let fresh = elab.fresh_name(&var.name);
                        let mut renamed = var.clone();
                        renamed.name = fresh.clone();
                        elab.scopes.add_var(new, renamed);
                        map.insert((orig.0, var.name.clone()), VarRef::new(fresh, new));
                    }
                    Some(new)
                }
                None => None,
            };
            let stmts = stmts.iter().map(|s| clone_stmt(elab, map, s)).collect();
            if new_scope.is_some() {
                elab.exit_scope();
            }
            StmtKind::Block { scope: new_scope, stmts }
        }

        StmtKind::If { cond, then_stmt, else_stmt } => StmtKind::If {
            cond: clone_expr(elab, map, cond),
            then_stmt: Box::new(clone_stmt(elab, map, then_stmt)),
            else_stmt: else_stmt.as_ref().map(|s| Box::new(clone_stmt(elab, map, s))),
        },

        StmtKind::Switch { value, body, cases } => StmtKind::Switch {
            value: clone_expr(elab, map, value),
            body: Box::new(clone_stmt(elab, map, body)),
            // Case vectors keep their original indices.
            cases: cases.clone(),
        },
        StmtKind::Case { index } => StmtKind::Case { index: *index },

        StmtKind::While { cond, body } => StmtKind::While {
            cond: clone_expr(elab, map, cond),
            body: Box::new(clone_stmt(elab, map, body)),
        },
        StmtKind::DoWhile { body, cond } => StmtKind::DoWhile {
            body: Box::new(clone_stmt(elab, map, body)),
            cond: clone_expr(elab, map, cond),
        },
        StmtKind::For { pre, cond, post, body } => StmtKind::For {
            pre: pre.as_ref().map(|e| clone_expr(elab, map, e)),
            cond: cond.as_ref().map(|e| clone_expr(elab, map, e)),
            post: post.as_ref().map(|e| clone_expr(elab, map, e)),
            body: Box::new(clone_stmt(elab, map, body)),
        },

        StmtKind::Break => StmtKind::Break,
        StmtKind::Continue => StmtKind::Continue,

        // Labels and gotos are excluded by the inlining qualification.
        StmtKind::Goto { label } => StmtKind::Goto { label: label.clone() },
        StmtKind::Label { name, stmt, used } => StmtKind::Label {
            name: name.clone(),
            stmt: Box::new(clone_stmt(elab, map, stmt)),
            used: *used,
        },

        StmtKind::Return { value, .. } => StmtKind::Return {
            value: value.as_ref().map(|e| clone_expr(elab, map, e)),
            // The clone's return feeds the inline result, not the epilogue.
            func_end: false,
        },

        StmtKind::VarDecl { decls } => StmtKind::VarDecl {
            decls: decls
                .iter()
                .map(|d| VarDeclItem {
                    var: map
                        .get(&(d.var.scope.0, d.var.name.clone()))
                        .cloned()
                        .unwrap_or_else(|| d.var.clone()),
                    init: d.init.as_ref().map(|s| Box::new(clone_stmt(elab, map, s))),
                })
                .collect(),
        },

        StmtKind::Asm { template } => StmtKind::Asm { template: template.clone() },
    };
    Stmt::new(kind, stmt.token.clone())
}

fn clone_expr(elab: &mut Elaborator, map: &mut RenameMap, expr: &Expr) -> Expr {
    let kind = match &expr.kind {
        ExprKind::FixNum(v) => ExprKind::FixNum(*v),
        ExprKind::FloNum(v) => ExprKind::FloNum(*v),
        ExprKind::Str(s) => ExprKind::Str(s.clone()),

        ExprKind::Var(vref) => {
            let mapped = map
                .get(&(vref.scope.0, vref.name.clone()))
                .cloned()
                .unwrap_or_else(|| vref.clone());
            ExprKind::Var(mapped)
        }

        ExprKind::Bin { op, lhs, rhs } => ExprKind::Bin {
            op: *op,
            lhs: Box::new(clone_expr(elab, map, lhs)),
            rhs: Box::new(clone_expr(elab, map, rhs)),
        },
        ExprKind::Unary { op, sub } => ExprKind::Unary {
            op: *op,
            sub: Box::new(clone_expr(elab, map, sub)),
        },
        ExprKind::Ternary { cond, then_val, else_val } => ExprKind::Ternary {
            cond: Box::new(clone_expr(elab, map, cond)),
            then_val: Box::new(clone_expr(elab, map, then_val)),
            else_val: Box::new(clone_expr(elab, map, else_val)),
        },
        ExprKind::Member { target, index } => ExprKind::Member {
            target: Box::new(clone_expr(elab, map, target)),
            index: *index,
        },
        ExprKind::Funcall { func, args } => ExprKind::Funcall {
            func: Box::new(clone_expr(elab, map, func)),
            args: args.iter().map(|a| clone_expr(elab, map, a)).collect(),
        },

        // Re-expand from the original target so every instantiation gets
        // fresh names.
        ExprKind::InlinedCall { name, args, .. } => {
            let args = args.iter().map(|a| clone_expr(elab, map, a)).collect::<Vec<_>>();
            match elab.inline_func(name).cloned() {
                Some(target) => {
                    return expand(elab, &target, args, expr.token.clone());
                }
                None => {
                    let e = expr.clone();
                    let ExprKind::InlinedCall { params, body, .. } = e.kind else {
                        unreachable!()
                    };
                    ExprKind::InlinedCall { name: name.clone(), args, params, body }
                }
            }
        }

        ExprKind::CompoundLit { var, inits } => ExprKind::CompoundLit {
            var: map
                .get(&(var.scope.0, var.name.clone()))
                .cloned()
                .unwrap_or_else(|| var.clone()),
            inits: inits.iter().map(|s| clone_stmt(elab, map, s)).collect(),
        },
        ExprKind::StmtExpr(stmt) => {
            ExprKind::StmtExpr(Box::new(clone_stmt(elab, map, stmt)))
        }
    };
    Expr::new(kind, expr.ty.clone(), expr.token.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvcc_ast::{BinOp, Type};

    fn tok() -> Token {
        Token::none()
    }

    /// static inline int inc(int x) { return x + 1; }
    fn define_inc(elab: &mut Elaborator) {
        let fty = Type::func(Type::int(), Some(vec![Type::int()]), false);
        elab.begin_function("inc", fty, vec!["x".into()], true, true);
        let x = elab.new_var_ref("x", tok());
        let one = Expr::fixnum(1, Type::int(), tok());
        let sum = elab.new_bin(BinOp::Add, x, one, tok());
        let body = Stmt::block(None, vec![Stmt::ret(Some(sum), tok())], tok());
        elab.end_function(body);
    }

    fn collect_var_names(stmt: &Stmt, out: &mut Vec<String>) {
        fn walk_expr(e: &Expr, out: &mut Vec<String>) {
            match &e.kind {
                ExprKind::Var(v) => out.push(v.name.clone()),
                ExprKind::Bin { lhs, rhs, .. } => {
                    walk_expr(lhs, out);
                    walk_expr(rhs, out);
                }
                ExprKind::Unary { sub, .. } => walk_expr(sub, out),
                ExprKind::InlinedCall { args, body, .. } => {
                    args.iter().for_each(|a| walk_expr(a, out));
                    collect_var_names(body, out);
                }
                _ => {}
            }
        }
        match &stmt.kind {
            StmtKind::Block { stmts, .. } => {
                stmts.iter().for_each(|s| collect_var_names(s, out))
            }
            StmtKind::Expr(e) => walk_expr(e, out),
            StmtKind::Return { value: Some(e), .. } => walk_expr(e, out),
            _ => {}
        }
    }

    #[test]
    fn inline_call_replaces_funcall() {
        let mut elab = Elaborator::new();
        define_inc(&mut elab);

        let fty = Type::func(Type::int(), Some(vec![]), false);
        elab.begin_function("g", fty, vec![], false, false);
        let callee = elab.new_var_ref("inc", tok());
        let call = elab.new_funcall(callee, vec![Expr::fixnum(41, Type::int(), tok())], tok());
        assert!(matches!(call.kind, ExprKind::InlinedCall { .. }));
        assert_eq!(call.ty, Type::int());
    }

    #[test]
    fn nested_inlining_gets_disjoint_parameter_names() {
        let mut elab = Elaborator::new();
        define_inc(&mut elab);

        let fty = Type::func(Type::int(), Some(vec![]), false);
        elab.begin_function("g", fty, vec![], false, false);

        // inc(inc(41)): both bodies present, no call nodes remain.
        let callee = elab.new_var_ref("inc", tok());
        let inner =
            elab.new_funcall(callee.clone(), vec![Expr::fixnum(41, Type::int(), tok())], tok());
        let outer = elab.new_funcall(callee, vec![inner], tok());

        let ExprKind::InlinedCall { params: outer_params, args, body, .. } = &outer.kind else {
            panic!("expected an inlined call");
        };
        let ExprKind::InlinedCall { params: inner_params, .. } = &args[0].kind else {
            panic!("inner call must be inlined too");
        };
        assert_ne!(outer_params[0].name, inner_params[0].name);

        // Each clone's body references its own parameter.
        let mut names = Vec::new();
        collect_var_names(body, &mut names);
        assert!(names.contains(&outer_params[0].name));
        assert!(!names.contains(&inner_params[0].name));
    }

    #[test]
    fn variadic_and_labeled_functions_do_not_qualify() {
        let mut f = Function::new("f", Type::func(Type::int(), Some(vec![]), true));
        f.is_inline = true;
        f.body = Some(Stmt::empty());
        assert!(!can_inline(&f), "variadic functions must not inline");

        let mut g = Function::new("g", Type::func(Type::int(), Some(vec![]), false));
        g.is_inline = true;
        g.body = Some(Stmt::empty());
        assert!(can_inline(&g));
        g.labels.insert("out".into(), false);
        assert!(!can_inline(&g), "labels would collide on repeated expansion");
    }
}
