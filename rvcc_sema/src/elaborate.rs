//! Typed expression construction: conversions, folding and rewriting.

use hashbrown::HashMap;
use log::debug;

use rvcc_ast::types::{
    array_to_ptr, can_cast, ptrof, same_type, same_type_without_qualifier, wrap_value,
};
use rvcc_ast::{
    BinOp, Declaration, Expr, ExprKind, FixnumKind, Function, Initializer, Program, Qualifiers,
    ScopeId, Scopes, Stmt, StmtKind, Token, Type, TypeKind, UnOp, VarDeclItem, VarInfo, VarRef,
    VarStorage, GLOBAL_SCOPE,
};
use rvcc_common::{CompileError, CompileResult, Diagnostics};

use crate::bitfield;
use crate::inline;
use crate::reach;

/// Elaboration state for one translation unit.
///
/// Owns the scope arena, the accumulated declarations and the diagnostic
/// sink; the parser mutably borrows it for the duration of the parse.
pub struct Elaborator {
    pub scopes: Scopes,
    pub diags: Diagnostics,
    pub decls: Vec<Declaration>,
    cur_scope: ScopeId,
    cur_func: Option<Function>,
    counter: u32,
    /// Bodies available for inline expansion, keyed by function name.
    inline_funcs: HashMap<String, Function>,
}

impl Elaborator {
    pub fn new() -> Self {
        Self {
            scopes: Scopes::new(),
            diags: Diagnostics::new(),
            decls: Vec::new(),
            cur_scope: GLOBAL_SCOPE,
            cur_func: None,
            counter: 0,
            inline_funcs: HashMap::new(),
        }
    }

    pub fn with_warnings_as_errors(mut self, enabled: bool) -> Self {
        self.diags.warnings_as_errors = enabled;
        self
    }

    /// Finish the unit, yielding the program and everything diagnosed.
    pub fn into_program(self) -> (Program, Diagnostics) {
        let program = Program { scopes: self.scopes, decls: self.decls };
        (program, self.diags)
    }

    /// Err once the error threshold is reached; the parser stops.
    pub fn check_error_limit(&self) -> CompileResult<()> {
        if self.diags.has_fatal() {
            return Err(CompileError::Failed);
        }
        if self.diags.at_limit() {
            return Err(CompileError::TooManyErrors);
        }
        Ok(())
    }

    // ---- scopes and declarations ----

    pub fn cur_scope(&self) -> ScopeId {
        self.cur_scope
    }

    pub fn enter_scope(&mut self) -> ScopeId {
        let id = self.scopes.push(self.cur_scope);
        self.cur_scope = id;
        if let Some(func) = &mut self.cur_func {
            func.scopes.push(id);
        }
        id
    }

    pub fn exit_scope(&mut self) {
        if let Some(parent) = self.scopes.get(self.cur_scope).parent {
            self.cur_scope = parent;
        }
    }

    pub fn inline_func(&self, name: &str) -> Option<&Function> {
        self.inline_funcs.get(name)
    }

    /// Declare a variable in the current scope. Function-local statics get
    /// a synthesized global twin holding the actual storage.
    pub fn define_var(&mut self, mut var: VarInfo, token: &Token) -> VarRef {
        if self.scopes.var_in(self.cur_scope, &var.name).is_some() {
            self.diags.error(format!("`{}` already defined", var.name), token.span);
        }
        if var.is_static() && !self.cur_scope.is_global() {
            let func_name =
                self.cur_func.as_ref().map(|f| f.name.clone()).unwrap_or_default();
            let alias = format!("{}.{}.{}", func_name, var.name, self.counter);
            self.counter += 1;
            let mut twin = VarInfo::new(alias.clone(), var.ty.clone())
                .with_storage(VarStorage::STATIC);
            twin.init = var.init.take();
            self.scopes.add_var(GLOBAL_SCOPE, twin);
            self.decls.push(Declaration::Var(VarRef::new(alias.clone(), GLOBAL_SCOPE)));
            var.static_alias = Some(alias);
        }
        let name = var.name.clone();
        let scope = self.cur_scope;
        self.scopes.add_var(scope, var);
        VarRef::new(name, scope)
    }

    pub fn define_global(&mut self, var: VarInfo, token: &Token) -> VarRef {
        let name = var.name.clone();
        if let Some(existing) = self.scopes.var_in(GLOBAL_SCOPE, &name) {
            if !same_type_without_qualifier(&existing.ty, &var.ty) {
                self.diags.error(format!("`{}` redefined with a different type", name), token.span);
            }
        } else {
            self.scopes.add_var(GLOBAL_SCOPE, var);
            self.decls.push(Declaration::Var(VarRef::new(name.clone(), GLOBAL_SCOPE)));
        }
        VarRef::new(name, GLOBAL_SCOPE)
    }

    /// A fresh unique name derived from `prefix`.
    pub fn fresh_name(&mut self, prefix: &str) -> String {
        let name = format!("{}.{}", prefix, self.counter);
        self.counter += 1;
        name
    }

    /// A fresh compiler temporary in the current scope.
    pub fn alloc_tmp(&mut self, ty: Type) -> VarRef {
        let name = format!(".tmp.{}", self.counter);
        self.counter += 1;
        let var = VarInfo::new(name.clone(), ty);
        let scope = self.cur_scope;
        self.scopes.add_var(scope, var);
        VarRef::new(name, scope)
    }

    // ---- functions ----

    pub fn begin_function(
        &mut self,
        name: impl Into<String>,
        ty: Type,
        param_names: Vec<String>,
        is_static: bool,
        is_inline: bool,
    ) {
        let name = name.into();
        debug!("elaborating function `{}`", name);
        let mut func = Function::new(name.clone(), ty.clone());
        func.is_static = is_static;
        func.is_inline = is_inline;
        func.params = param_names.clone();

        let mut global = VarInfo::new(name, ty.clone());
        let mut storage = VarStorage::empty();
        if is_static {
            storage |= VarStorage::STATIC;
        }
        if is_inline {
            storage |= VarStorage::INLINE;
        }
        global.storage = storage;
        if self.scopes.var_in(GLOBAL_SCOPE, &global.name).is_none() {
            self.scopes.add_var(GLOBAL_SCOPE, global);
        }

        self.cur_func = Some(func);
        let top = self.enter_scope();
        let param_types = ty
            .func_type()
            .and_then(|ft| ft.params.clone())
            .unwrap_or_default();
        for (name, pty) in param_names.iter().zip(param_types) {
            self.scopes.add_var(
                top,
                VarInfo::new(name.clone(), pty).with_storage(VarStorage::PARAM),
            );
        }
    }

    /// Attach the body, run the finishing passes and record the function.
    pub fn end_function(&mut self, body: Stmt) {
        self.exit_scope();
        let mut func = match self.cur_func.take() {
            Some(f) => f,
            None => return,
        };
        func.body = Some(body);

        for (label, span) in &func.gotos {
            match func.labels.get_mut(label) {
                Some(used) => *used = true,
                None => self.diags.error(format!("label `{}` not found", label), *span),
            }
        }

        if let Some(body) = &mut func.body {
            reach::check_reach(body, &mut self.diags);
            reach::check_funcend_return(body, func.ty.func_type().map_or(false, |ft| !ft.ret.is_void()));
        }

        if func.is_inline && inline::can_inline(&func) {
            self.inline_funcs.insert(func.name.clone(), func.clone());
        }
        self.decls.push(Declaration::Func(func));
    }

    pub fn cur_func_mut(&mut self) -> Option<&mut Function> {
        self.cur_func.as_mut()
    }

    // ---- statements ----

    /// `return [value]`, casting the value to the function's return type.
    pub fn new_return(&mut self, value: Option<Expr>, token: Token) -> Stmt {
        let ret_ty = self
            .cur_func
            .as_ref()
            .and_then(|f| f.ty.func_type())
            .map(|ft| ft.ret.clone())
            .unwrap_or_else(Type::void);
        let value = match value {
            Some(v) if ret_ty.is_void() => {
                self.diags.error("void function cannot return a value", token.span);
                let _ = v;
                None
            }
            Some(v) => {
                let v = self.str_to_char_array_var(v);
                let v = self.decay(v);
                Some(self.make_cast(v, &ret_ty, false))
            }
            None if !ret_ty.is_void() => {
                self.diags.error("`return` requires a value", token.span);
                let token2 = token.clone();
                Some(self.dummy_expr(ret_ty, token2))
            }
            None => None,
        };
        Stmt::ret(value, token)
    }

    /// Register a case value (or the default for `None`) into a switch's
    /// case vector, returning the marker index.
    pub fn add_case(
        &mut self,
        cases: &mut Vec<Option<i64>>,
        value: Option<i64>,
        token: &Token,
    ) -> usize {
        if cases.iter().any(|c| *c == value) {
            match value {
                Some(v) => self.diags.error(format!("duplicate case value ({})", v), token.span),
                None => self.diags.error("duplicate `default`", token.span),
            }
        }
        cases.push(value);
        cases.len() - 1
    }

    /// Declare a local variable with an optional initial value, producing
    /// the `vardecl` statement carrying its init assignment.
    pub fn new_vardecl(
        &mut self,
        var: VarInfo,
        init_value: Option<Expr>,
        token: Token,
    ) -> Stmt {
        let ty = var.ty.clone();
        let vref = self.define_var(var, &token);
        let init = init_value.map(|value| {
            let target = Expr::var(vref.name.clone(), vref.scope, ty, token.clone());
            let assign = self.new_assign(target, value, token.clone());
            Box::new(Stmt::expr(assign))
        });
        Stmt::new(StmtKind::VarDecl { decls: vec![VarDeclItem { var: vref, init }] }, token)
    }

    // ---- leaf expressions ----

    /// Resolve an identifier. Enum members elaborate to their constant.
    pub fn new_var_ref(&mut self, name: &str, token: Token) -> Expr {
        match self.scopes.find_var(self.cur_scope, name) {
            Some((scope, var)) => {
                if var.storage.contains(VarStorage::ENUM_MEMBER) {
                    let value = var.enum_value.unwrap_or(0);
                    return Expr::fixnum(value, var.ty.clone(), token);
                }
                Expr::var(name, scope, var.ty.clone(), token)
            }
            None => {
                self.diags.error(format!("`{}` undeclared", name), token.span);
                self.dummy_expr(Type::int(), token)
            }
        }
    }

    /// A well-typed placeholder emitted after an error so the walk continues.
    pub fn dummy_expr(&self, ty: Type, token: Token) -> Expr {
        Expr::fixnum(0, ty, token)
    }

    /// Turn a string literal into an anonymous const char-array variable.
    pub fn str_to_char_array_var(&mut self, expr: Expr) -> Expr {
        let ExprKind::Str(lit) = &expr.kind else { return expr };
        let len = lit.bytes.len();
        let ty = Type::array(
            Type::char_type().with_qualifiers(Qualifiers::CONST),
            Some(len),
        )
        .with_qualifiers(Qualifiers::CONST);
        let name = format!(".str.{}", self.counter);
        self.counter += 1;
        let var = VarInfo::new(name.clone(), ty.clone())
            .with_storage(VarStorage::STATIC)
            .with_init(Initializer::Single(expr.clone()));
        self.scopes.add_var(GLOBAL_SCOPE, var);
        self.decls.push(Declaration::Var(VarRef::new(name.clone(), GLOBAL_SCOPE)));
        Expr::var(name, GLOBAL_SCOPE, ty, expr.token)
    }

    // ---- casts and conversions ----

    /// Convert `expr` to `to`, folding constants. Diagnoses illegal casts
    /// and suspicious pointer conversions.
    pub fn make_cast(&mut self, expr: Expr, to: &Type, is_explicit: bool) -> Expr {
        if same_type(&expr.ty, to) {
            return expr;
        }
        let zero = expr.is_zero();
        if !can_cast(to, &expr.ty, zero, is_explicit) {
            self.diags.error(
                format!("cannot convert value from type `{}` to `{}`", expr.ty, to),
                expr.token.span,
            );
            let token = expr.token.clone();
            return self.dummy_expr(to.clone(), token);
        }
        if let (TypeKind::Ptr(dp), TypeKind::Ptr(sp)) = (&to.kind, &expr.ty.kind) {
            if !is_explicit
                && !zero
                && !dp.is_void()
                && !sp.is_void()
                && !same_type_without_qualifier(dp, sp)
            {
                self.diags.warning(
                    format!("conversion from incompatible pointer type `{}` to `{}`", expr.ty, to),
                    expr.token.span,
                );
            }
        }

        // Fold constant conversions immediately.
        match (&expr.kind, &to.kind) {
            (ExprKind::FixNum(v), TypeKind::Fixnum { kind, unsigned }) => {
                let wrapped = wrap_value(*v, kind.size(), *unsigned);
                return Expr::fixnum(wrapped, to.clone(), expr.token);
            }
            (ExprKind::FixNum(v), TypeKind::Flonum(_)) => {
                return Expr::flonum(*v as f64, to.clone(), expr.token);
            }
            (ExprKind::FloNum(v), TypeKind::Fixnum { kind, unsigned }) => {
                let wrapped = wrap_value(*v as i64, kind.size(), *unsigned);
                return Expr::fixnum(wrapped, to.clone(), expr.token);
            }
            (ExprKind::FloNum(v), TypeKind::Flonum(_)) => {
                let token = expr.token.clone();
                return Expr::flonum(*v, to.clone(), token);
            }
            (ExprKind::FixNum(v), TypeKind::Ptr(_)) if is_explicit || zero => {
                return Expr::fixnum(*v, to.clone(), expr.token);
            }
            _ => {}
        }
        let token = expr.token.clone();
        Expr::cast(expr, to.clone(), token)
    }

    /// The usual arithmetic conversions. With `make_int`, integer operands
    /// narrower than `int` are first promoted to `int`.
    pub fn cast_numbers(&mut self, lhs: Expr, rhs: Expr, make_int: bool) -> (Expr, Expr) {
        let (lf, rf) = (lhs.ty.is_flonum(), rhs.ty.is_flonum());
        if lf || rf {
            // The wider flonum dominates.
            let target = match (&lhs.ty.kind, &rhs.ty.kind) {
                (TypeKind::Flonum(a), TypeKind::Flonum(b)) => {
                    if a.size() >= b.size() { lhs.ty.clone() } else { rhs.ty.clone() }
                }
                (TypeKind::Flonum(_), _) => lhs.ty.clone(),
                _ => rhs.ty.clone(),
            };
            let lhs = self.make_cast(lhs, &target, false);
            let rhs = self.make_cast(rhs, &target, false);
            return (lhs, rhs);
        }

        let promote = |e: Expr, this: &mut Self| -> Expr {
            match &e.ty.kind {
                TypeKind::Fixnum { kind, .. } if make_int && kind.rank() < FixnumKind::Int.rank() => {
                    this.make_cast(e, &Type::int(), false)
                }
                _ => e,
            }
        };
        let lhs = promote(lhs, self);
        let rhs = promote(rhs, self);

        let order = |ty: &Type| -> u8 {
            match ty.kind {
                TypeKind::Fixnum { kind, unsigned } => (kind.rank() << 1) | unsigned as u8,
                _ => 0,
            }
        };
        let target = if order(&lhs.ty) >= order(&rhs.ty) { lhs.ty.clone() } else { rhs.ty.clone() };
        let lhs = self.make_cast(lhs, &target, false);
        let rhs = self.make_cast(rhs, &target, false);
        (lhs, rhs)
    }

    // ---- binary operators ----

    /// Build a typed binary expression, folding and canonicalizing.
    pub fn new_bin(&mut self, op: BinOp, lhs: Expr, rhs: Expr, token: Token) -> Expr {
        match op {
            BinOp::Mul | BinOp::Div => self.numeric_bin(op, lhs, rhs, token, true),
            BinOp::Mod | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                self.numeric_bin(op, lhs, rhs, token, false)
            }
            BinOp::LShift | BinOp::RShift => self.shift_bin(op, lhs, rhs, token),
            BinOp::Add => self.new_add(lhs, rhs, token, false),
            BinOp::Sub => self.new_add(lhs, rhs, token, true),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                self.new_cmp(op, lhs, rhs, token)
            }
            BinOp::LogAnd | BinOp::LogOr => self.logical_bin(op, lhs, rhs, token),
            BinOp::Assign => self.new_assign(lhs, rhs, token),
            BinOp::Comma => {
                let ty = rhs.ty.clone();
                Expr::bin(BinOp::Comma, lhs, rhs, ty, token)
            }
        }
    }

    fn numeric_bin(
        &mut self,
        op: BinOp,
        lhs: Expr,
        rhs: Expr,
        token: Token,
        allow_flonum: bool,
    ) -> Expr {
        let ok = if allow_flonum {
            lhs.ty.is_number() && rhs.ty.is_number()
        } else {
            lhs.ty.is_fixnum() && rhs.ty.is_fixnum()
        };
        if !ok {
            self.diags.error("illegal operand types for arithmetic", token.span);
            return self.dummy_expr(Type::int(), token);
        }

        if matches!(op, BinOp::Div | BinOp::Mod) {
            if let Some(0) = rhs.fixnum_value() {
                if lhs.is_const() {
                    self.diags.fatal("division by zero", token.span);
                    return self.dummy_expr(lhs.ty.clone(), token);
                }
                self.diags.warning("division by zero", token.span);
            }
        }

        let (lhs, rhs) = self.cast_numbers(lhs, rhs, true);
        let ty = lhs.ty.clone();

        if let (Some(a), Some(b)) = (lhs.fixnum_value(), rhs.fixnum_value()) {
            if !(matches!(op, BinOp::Div | BinOp::Mod) && b == 0) {
                return Expr::fixnum(fold_fixnum(op, a, b, &ty), ty, token);
            }
        }
        if let (ExprKind::FloNum(a), ExprKind::FloNum(b)) = (&lhs.kind, &rhs.kind) {
            let v = match op {
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                _ => unreachable!("flonum fold restricted to mul/div here"),
            };
            return Expr::flonum(v, ty, token);
        }
        Expr::bin(op, lhs, rhs, ty, token)
    }

    fn shift_bin(&mut self, op: BinOp, lhs: Expr, rhs: Expr, token: Token) -> Expr {
        if !lhs.ty.is_fixnum() || !rhs.ty.is_fixnum() {
            self.diags.error("integer type expected for shift", token.span);
            return self.dummy_expr(Type::int(), token);
        }
        // Only the left operand's type matters for the result.
        let lhs = match &lhs.ty.kind {
            TypeKind::Fixnum { kind, .. } if kind.rank() < FixnumKind::Int.rank() => {
                self.make_cast(lhs, &Type::int(), false)
            }
            _ => lhs,
        };
        let ty = lhs.ty.clone();
        if let (Some(a), Some(b)) = (lhs.fixnum_value(), rhs.fixnum_value()) {
            return Expr::fixnum(fold_fixnum(op, a, b, &ty), ty, token);
        }
        Expr::bin(op, lhs, rhs, ty, token)
    }

    /// `+` and `-`, including pointer arithmetic.
    fn new_add(&mut self, lhs: Expr, rhs: Expr, token: Token, is_sub: bool) -> Expr {
        let lhs = self.str_to_char_array_var(lhs);
        let rhs = self.str_to_char_array_var(rhs);
        let op = if is_sub { BinOp::Sub } else { BinOp::Add };

        if lhs.ty.is_number() && rhs.ty.is_number() {
            let (lhs, rhs) = self.cast_numbers(lhs, rhs, true);
            let ty = lhs.ty.clone();
            if let (Some(a), Some(b)) = (lhs.fixnum_value(), rhs.fixnum_value()) {
                return Expr::fixnum(fold_fixnum(op, a, b, &ty), ty, token);
            }
            if let (ExprKind::FloNum(a), ExprKind::FloNum(b)) = (&lhs.kind, &rhs.kind) {
                let v = if is_sub { a - b } else { a + b };
                return Expr::flonum(v, ty, token);
            }
            return Expr::bin(op, lhs, rhs, ty, token);
        }

        if lhs.ty.ptr_or_array() && rhs.ty.ptr_or_array() {
            if !is_sub {
                self.diags.error("cannot add two pointers", token.span);
                return self.dummy_expr(Type::ssize(), token);
            }
            let (lb, rb) = (lhs.ty.base().unwrap(), rhs.ty.base().unwrap());
            if !same_type_without_qualifier(lb, rb) {
                self.diags.error("pointer types must match for subtraction", token.span);
            }
            // Difference of element counts, signed.
            return Expr::bin(BinOp::Sub, lhs, rhs, Type::ssize(), token);
        }

        if lhs.ty.ptr_or_array() && rhs.ty.is_fixnum() {
            let ty = array_to_ptr(&lhs.ty);
            return Expr::bin(op, lhs, rhs, ty, token);
        }
        if lhs.ty.is_fixnum() && rhs.ty.ptr_or_array() {
            if is_sub {
                self.diags.error("cannot subtract pointer from integer", token.span);
                return self.dummy_expr(Type::ssize(), token);
            }
            // Canonicalize integer + pointer by swapping.
            let ty = array_to_ptr(&rhs.ty);
            return Expr::bin(BinOp::Add, rhs, lhs, ty, token);
        }

        self.diags.error("illegal operand types for addition", token.span);
        self.dummy_expr(Type::int(), token)
    }

    fn new_cmp(&mut self, op: BinOp, lhs: Expr, rhs: Expr, token: Token) -> Expr {
        let lhs = self.str_to_char_array_var(lhs);
        let rhs = self.str_to_char_array_var(rhs);
        let lhs = self.decay(lhs);
        let rhs = self.decay(rhs);

        if lhs.ty.is_ptr() || rhs.ty.is_ptr() {
            let (mut lhs, mut rhs, op) = if !lhs.ty.is_ptr() {
                (rhs, lhs, op.swap_cmp())
            } else {
                (lhs, rhs, op)
            };
            if rhs.ty.is_ptr() {
                let lb = lhs.ty.base().unwrap();
                let rb = rhs.ty.base().unwrap();
                if !same_type_without_qualifier(lb, rb) && !lb.is_void() && !rb.is_void() {
                    self.diags.warning("comparison of distinct pointer types", token.span);
                }
            } else if rhs.is_zero() {
                let pty = lhs.ty.clone();
                rhs = self.make_cast(rhs, &pty, false);
            } else if rhs.ty.is_fixnum() {
                self.diags.warning("comparison between pointer and integer", token.span);
                let pty = lhs.ty.clone();
                rhs = self.make_cast(rhs, &pty, true);
            } else {
                self.diags.error("cannot compare pointer with this operand", token.span);
                let token2 = token.clone();
                lhs = self.dummy_expr(Type::int(), token2);
                let ty = lhs.ty.clone();
                let token3 = token.clone();
                rhs = self.dummy_expr(ty, token3);
            }
            return Expr::bin(op, lhs, rhs, Type::bool_type(), token);
        }

        if !lhs.ty.is_number() || !rhs.ty.is_number() {
            self.diags.error("illegal operand types for comparison", token.span);
            return self.dummy_expr(Type::bool_type(), token);
        }

        let (lhs, rhs) = self.cast_numbers(lhs, rhs, true);
        if let (Some(a), Some(b)) = (lhs.fixnum_value(), rhs.fixnum_value()) {
            let v = fold_compare(op, a, b, lhs.ty.is_unsigned());
            return Expr::fixnum(v as i64, Type::bool_type(), token);
        }
        if let (ExprKind::FloNum(a), ExprKind::FloNum(b)) = (&lhs.kind, &rhs.kind) {
            let v = match op {
                BinOp::Eq => a == b,
                BinOp::Ne => a != b,
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                BinOp::Ge => a >= b,
                _ => unreachable!(),
            };
            return Expr::fixnum(v as i64, Type::bool_type(), token);
        }
        // Keep a lone constant on the right.
        let (lhs, rhs, op) = if lhs.is_const() && !rhs.is_const() {
            (rhs, lhs, op.swap_cmp())
        } else {
            (lhs, rhs, op)
        };
        Expr::bin(op, lhs, rhs, Type::bool_type(), token)
    }

    fn logical_bin(&mut self, op: BinOp, lhs: Expr, rhs: Expr, token: Token) -> Expr {
        let lhs = self.make_cond(lhs);
        let rhs = self.make_cond(rhs);
        if let Some(a) = lhs.fixnum_value() {
            let short_circuit = match op {
                BinOp::LogAnd => a == 0,
                _ => a != 0,
            };
            if short_circuit {
                return Expr::fixnum((a != 0) as i64, Type::bool_type(), token);
            }
            // The left side decides nothing; the value is the right side.
            return self.make_cond_value(rhs, token);
        }
        Expr::bin(op, lhs, rhs, Type::bool_type(), token)
    }

    fn make_cond_value(&mut self, expr: Expr, token: Token) -> Expr {
        if let Some(v) = expr.fixnum_value() {
            return Expr::fixnum((v != 0) as i64, Type::bool_type(), token);
        }
        expr
    }

    // ---- logical normalization ----

    /// Rewrite `expr` into a boolean-producing node.
    pub fn make_cond(&mut self, expr: Expr) -> Expr {
        match &expr.kind {
            ExprKind::FixNum(v) => {
                let token = expr.token.clone();
                Expr::fixnum((*v != 0) as i64, Type::bool_type(), token)
            }
            ExprKind::FloNum(v) => {
                let token = expr.token.clone();
                Expr::fixnum((*v != 0.0) as i64, Type::bool_type(), token)
            }
            ExprKind::Str(_) => {
                let token = expr.token.clone();
                Expr::fixnum(1, Type::bool_type(), token)
            }
            ExprKind::Bin { op, .. } if op.is_comparison() => expr,
            ExprKind::Bin { op: BinOp::LogAnd | BinOp::LogOr, .. } => expr,
            ExprKind::Bin { op: BinOp::Comma, .. } => {
                let ExprKind::Bin { lhs, rhs, .. } = expr.kind else { unreachable!() };
                let rhs = self.make_cond(*rhs);
                let ty = rhs.ty.clone();
                Expr::bin(BinOp::Comma, *lhs, rhs, ty, expr.token)
            }
            _ => {
                let expr = self.decay(expr);
                if !expr.ty.is_number() && !expr.ty.is_ptr() {
                    self.diags.error("value cannot be used as a condition", expr.token.span);
                    let token = expr.token.clone();
                    return self.dummy_expr(Type::bool_type(), token);
                }
                let token = expr.token.clone();
                let zero_ty = expr.ty.clone();
                let zero = if zero_ty.is_flonum() {
                    Expr::flonum(0.0, zero_ty, token.clone())
                } else {
                    Expr::fixnum(0, zero_ty, token.clone())
                };
                Expr::bin(BinOp::Ne, expr, zero, Type::bool_type(), token)
            }
        }
    }

    /// Build `!expr`, pushing the negation inward algebraically.
    pub fn make_not_expr(&mut self, expr: Expr) -> Expr {
        match &expr.kind {
            ExprKind::FixNum(v) => {
                let token = expr.token.clone();
                Expr::fixnum((*v == 0) as i64, Type::bool_type(), token)
            }
            ExprKind::Bin { op, .. } if op.is_comparison() => {
                let ExprKind::Bin { op, lhs, rhs } = expr.kind else { unreachable!() };
                Expr::bin(op.negate_cmp(), *lhs, *rhs, Type::bool_type(), expr.token)
            }
            ExprKind::Bin { op: BinOp::LogAnd | BinOp::LogOr, .. } => {
                let ExprKind::Bin { op, lhs, rhs } = expr.kind else { unreachable!() };
                let not_l = self.make_not_expr(*lhs);
                let not_r = self.make_not_expr(*rhs);
                let flipped = if op == BinOp::LogAnd { BinOp::LogOr } else { BinOp::LogAnd };
                Expr::bin(flipped, not_l, not_r, Type::bool_type(), expr.token)
            }
            ExprKind::Bin { op: BinOp::Comma, .. } => {
                let ExprKind::Bin { lhs, rhs, .. } = expr.kind else { unreachable!() };
                let not_r = self.make_not_expr(*rhs);
                let ty = not_r.ty.clone();
                Expr::bin(BinOp::Comma, *lhs, not_r, ty, expr.token)
            }
            _ => {
                let cond = self.make_cond(expr);
                // make_cond yielded a comparison or a constant; negate it.
                match &cond.kind {
                    ExprKind::FixNum(_)
                    | ExprKind::Bin { .. } => self.make_not_expr_terminal(cond),
                    _ => {
                        let token = cond.token.clone();
                        let ty = cond.ty.clone();
                        let zero = Expr::fixnum(0, ty, token.clone());
                        Expr::bin(BinOp::Eq, cond, zero, Type::bool_type(), token)
                    }
                }
            }
        }
    }

    fn make_not_expr_terminal(&mut self, cond: Expr) -> Expr {
        match &cond.kind {
            ExprKind::FixNum(v) => {
                let token = cond.token.clone();
                Expr::fixnum((*v == 0) as i64, Type::bool_type(), token)
            }
            ExprKind::Bin { op, .. } if op.is_comparison() => {
                let ExprKind::Bin { op, lhs, rhs } = cond.kind else { unreachable!() };
                Expr::bin(op.negate_cmp(), *lhs, *rhs, Type::bool_type(), cond.token)
            }
            _ => self.make_not_expr(cond),
        }
    }

    // ---- lvalues, address-of, member access ----

    /// Array-of-T decays to pointer, function values to pointer-to-function.
    pub fn decay(&mut self, expr: Expr) -> Expr {
        if expr.ty.is_array() {
            let to = array_to_ptr(&expr.ty);
            return self.make_cast(expr, &to, false);
        }
        if expr.ty.is_func() {
            let token = expr.token.clone();
            return self.make_refer(expr, token);
        }
        expr
    }

    /// `&expr`.
    pub fn make_refer(&mut self, expr: Expr, token: Token) -> Expr {
        // `&*p` collapses to `p`.
        if let ExprKind::Unary { op: UnOp::Deref, .. } = &expr.kind {
            let ExprKind::Unary { sub, .. } = expr.kind else { unreachable!() };
            return *sub;
        }

        if let Some(addr) = self.fold_const_address(&expr) {
            return Expr::fixnum(addr, ptrof(&expr.ty), token);
        }

        if !expr.is_lval() && !expr.ty.is_func() {
            self.diags.error("cannot take the address of this value", token.span);
            let ty = ptrof(&expr.ty);
            return self.dummy_expr(ty, token);
        }

        if let Some(vref) = base_var(&expr) {
            let vref = vref.clone();
            self.mark_ref_taken(&vref);
        }

        let ty = ptrof(&expr.ty);
        Expr::unary(UnOp::Ref, expr, ty, token)
    }

    fn mark_ref_taken(&mut self, vref: &VarRef) {
        let alias = match self.scopes.var_in_mut(vref.scope, &vref.name) {
            Some(var) => {
                var.storage |= VarStorage::REF_TAKEN;
                var.static_alias.clone()
            }
            None => None,
        };
        // A function-local static propagates the mark to its global twin.
        if let Some(alias) = alias {
            if let Some(twin) = self.scopes.var_in_mut(GLOBAL_SCOPE, &alias) {
                twin.storage |= VarStorage::REF_TAKEN;
            }
        }
    }

    /// Address of a member chain over a constant integer base, if foldable.
    fn fold_const_address(&self, expr: &Expr) -> Option<i64> {
        match &expr.kind {
            ExprKind::Unary { op: UnOp::Deref, sub } => sub.fixnum_value(),
            ExprKind::Member { target, index } => {
                let base = self.fold_const_address(target)?;
                let info = target.ty.struct_info()?;
                let offset = info.members.get(*index)?.offset;
                Some(base + offset as i64)
            }
            _ => None,
        }
    }

    /// `*expr`.
    pub fn new_deref(&mut self, expr: Expr, token: Token) -> Expr {
        // `*&e` collapses to `e`.
        if let ExprKind::Unary { op: UnOp::Ref, .. } = &expr.kind {
            let ExprKind::Unary { sub, .. } = expr.kind else { unreachable!() };
            return *sub;
        }
        match expr.ty.base() {
            Some(base) => {
                let ty = base.clone();
                Expr::unary(UnOp::Deref, expr, ty, token)
            }
            None => {
                self.diags.error("cannot dereference a non-pointer", token.span);
                self.dummy_expr(Type::int(), token)
            }
        }
    }

    /// Member access. `is_arrow` selects `->`; the target struct type must
    /// be complete by now.
    pub fn new_member(&mut self, target: Expr, member: &str, is_arrow: bool, token: Token) -> Expr {
        let target = if is_arrow {
            let token2 = token.clone();
            self.new_deref(target, token2)
        } else {
            target
        };
        let mut sty = target.ty.clone();
        if !rvcc_ast::ensure_struct(&mut sty, self.cur_scope, &self.scopes) {
            self.diags.error(format!("incomplete type `{}`", sty), token.span);
            return self.dummy_expr(Type::int(), token);
        }
        let Some(info) = sty.struct_info() else {
            self.diags.error("member access into a non-struct value", token.span);
            return self.dummy_expr(Type::int(), token);
        };
        let Some(index) = info.member_index(member) else {
            self.diags.error(format!("no member named `{}`", member), token.span);
            return self.dummy_expr(Type::int(), token);
        };
        let mty = info.members[index].ty.clone();
        let mut target = target;
        target.ty = sty;
        Expr::new(ExprKind::Member { target: Box::new(target), index }, mty, token)
    }

    // ---- assignment and modification ----

    fn check_assignable(&mut self, lhs: &Expr, token: &Token) -> bool {
        if !lhs.is_lval() {
            self.diags.error("cannot assign: not an lvalue", token.span);
            return false;
        }
        if lhs.ty.qualifiers.contains(Qualifiers::CONST) || lhs.ty.is_array() {
            self.diags.error("cannot assign to this value", token.span);
            return false;
        }
        true
    }

    /// Simple assignment, with the bit-field store expansion.
    pub fn new_assign(&mut self, lhs: Expr, rhs: Expr, token: Token) -> Expr {
        if !self.check_assignable(&lhs, &token) {
            let ty = lhs.ty.clone();
            return self.dummy_expr(ty, token);
        }
        if let Some(bf) = member_bitfield(&lhs) {
            return bitfield::assign(self, lhs, rhs, bf, token);
        }
        let rhs = self.str_to_char_array_var(rhs);
        let rhs = self.decay(rhs);
        let rhs = self.make_cast(rhs, &lhs.ty.clone(), false);
        let ty = lhs.ty.clone();
        Expr::bin(BinOp::Assign, lhs, rhs, ty, token)
    }

    /// Compound assignment `lhs op= rhs`, rewritten so `lhs` is evaluated
    /// exactly once.
    pub fn new_assign_with(&mut self, op: BinOp, lhs: Expr, rhs: Expr, token: Token) -> Expr {
        if !self.check_assignable(&lhs, &token) {
            let ty = lhs.ty.clone();
            return self.dummy_expr(ty, token);
        }
        if let Some(bf) = member_bitfield(&lhs) {
            return bitfield::assign_with(self, op, lhs, rhs, bf, token);
        }
        if matches!(lhs.kind, ExprKind::Var(_)) {
            // A plain variable has no side effects; reread it.
            let read = lhs.clone();
            let value = self.new_bin(op, read, rhs, token.clone());
            return self.new_assign(lhs, value, token);
        }

        // (tmp = &lhs, *tmp = *tmp op rhs)
        let ptr_ty = ptrof(&lhs.ty);
        let tmp = self.alloc_tmp(ptr_ty.clone());
        let token2 = token.clone();
        let addr = self.make_refer(lhs, token2);
        let tmp_var = Expr::var(tmp.name.clone(), tmp.scope, ptr_ty.clone(), token.clone());
        let bind = Expr::bin(BinOp::Assign, tmp_var.clone(), addr, ptr_ty, token.clone());
        let read = self.new_deref(tmp_var.clone(), token.clone());
        let write_target = self.new_deref(tmp_var, token.clone());
        let value = self.new_bin(op, read, rhs, token.clone());
        let store = self.new_assign(write_target, value, token.clone());
        let ty = store.ty.clone();
        Expr::bin(BinOp::Comma, bind, store, ty, token)
    }

    /// `++`/`--`, pre and post.
    pub fn incdec_of(&mut self, op: UnOp, target: Expr, token: Token) -> Expr {
        debug_assert!(matches!(
            op,
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec
        ));
        if !self.check_assignable(&target, &token) {
            let ty = target.ty.clone();
            return self.dummy_expr(ty, token);
        }
        if !target.ty.is_number() && !target.ty.is_ptr() {
            self.diags.error("number or pointer expected", token.span);
            let ty = target.ty.clone();
            return self.dummy_expr(ty, token);
        }
        if let Some(bf) = member_bitfield(&target) {
            return bitfield::incdec(self, op, target, bf, token);
        }
        let ty = target.ty.clone();
        Expr::unary(op, target, ty, token)
    }

    // ---- calls ----

    /// Build a function call, checking arguments against the signature and
    /// expanding inline callees.
    pub fn new_funcall(&mut self, func: Expr, args: Vec<Expr>, token: Token) -> Expr {
        let functype = match &func.ty.kind {
            TypeKind::Func(ft) => Some((**ft).clone()),
            TypeKind::Ptr(p) => p.func_type().cloned(),
            _ => None,
        };
        let Some(functype) = functype else {
            self.diags.error("cannot call a non-function value", token.span);
            return self.dummy_expr(Type::int(), token);
        };

        let args = self.check_funcall_args(&functype.params, functype.vaargs, args, &token);

        // A qualifying inline callee is expanded in place of the call.
        if let ExprKind::Var(vref) = &func.kind {
            if vref.scope.is_global() && self.inline_funcs.contains_key(&vref.name) {
                let callee = self.inline_funcs.get(&vref.name).cloned().unwrap();
                return inline::expand(self, &callee, args, token);
            }
        }

        Expr::new(
            ExprKind::Funcall { func: Box::new(func), args },
            functype.ret.clone(),
            token,
        )
    }

    fn check_funcall_args(
        &mut self,
        params: &Option<Vec<Type>>,
        vaargs: bool,
        args: Vec<Expr>,
        token: &Token,
    ) -> Vec<Expr> {
        if let Some(params) = params {
            if args.len() < params.len() {
                self.diags.error("too few arguments", token.span);
            } else if args.len() > params.len() && !vaargs {
                self.diags.error("too many arguments", token.span);
            }
        }

        let mut out = Vec::with_capacity(args.len());
        for (i, arg) in args.into_iter().enumerate() {
            let arg = self.str_to_char_array_var(arg);
            let arg = self.decay(arg);
            if arg.ty.struct_info().map_or(false, |info| info.is_flexible) {
                self.diags.error(
                    "cannot pass a struct with a flexible array member",
                    arg.token.span,
                );
            }
            let arg = match params.as_ref().and_then(|p| p.get(i)) {
                Some(pty) => self.make_cast(arg, &pty.clone(), false),
                None => self.promote_vaarg(arg),
            };
            out.push(arg);
        }
        out
    }

    /// Default argument promotions for variadic positions.
    fn promote_vaarg(&mut self, arg: Expr) -> Expr {
        match &arg.ty.kind {
            TypeKind::Fixnum { kind, .. } if kind.rank() < FixnumKind::Int.rank() => {
                self.make_cast(arg, &Type::int(), false)
            }
            TypeKind::Flonum(k) if k.size() < 8 => self.make_cast(arg, &Type::double(), false),
            _ => arg,
        }
    }

    // ---- ternary ----

    pub fn new_ternary(&mut self, cond: Expr, tval: Expr, fval: Expr, token: Token) -> Expr {
        let cond = self.make_cond(cond);
        let tval = self.str_to_char_array_var(tval);
        let fval = self.str_to_char_array_var(fval);
        let tval = self.decay(tval);
        let fval = self.decay(fval);
        let ty = self.ternary_type(&tval, &fval, &token);

        let tval2 = if ty.is_void() { tval } else { self.make_cast(tval, &ty, false) };
        let fval2 = if ty.is_void() { fval } else { self.make_cast(fval, &ty, false) };

        if let Some(v) = cond.fixnum_value() {
            return if v != 0 { tval2 } else { fval2 };
        }
        Expr::new(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then_val: Box::new(tval2),
                else_val: Box::new(fval2),
            },
            ty,
            token,
        )
    }

    fn ternary_type(&mut self, tval: &Expr, fval: &Expr, token: &Token) -> Type {
        let (t, f) = (&tval.ty, &fval.ty);
        if t.is_void() || f.is_void() {
            return Type::void();
        }
        if t.is_ptr() && f.is_ptr() {
            let (tb, fb) = (t.base().unwrap(), f.base().unwrap());
            if same_type_without_qualifier(tb, fb) {
                return t.clone();
            }
            // void* defers to the concrete pointer.
            if tb.is_void() {
                return f.clone();
            }
            if fb.is_void() {
                return t.clone();
            }
            self.diags.warning("ternary arms have incompatible pointer types", token.span);
            return t.clone();
        }
        if t.is_ptr() || f.is_ptr() {
            let (ptr, other) = if t.is_ptr() { (t, fval) } else { (f, tval) };
            if other.is_zero() || can_cast(ptr, &other.ty, other.is_zero(), false) {
                return ptr.clone();
            }
            self.diags.error("ternary arms are incompatible", token.span);
            return ptr.clone();
        }
        if t.is_number() && f.is_number() {
            let order = |ty: &Type| match ty.kind {
                TypeKind::Flonum(k) => 100 + k.size() as u8,
                TypeKind::Fixnum { kind, unsigned } => (kind.rank() << 1) | unsigned as u8,
                _ => 0,
            };
            return if order(t) >= order(f) { t.clone() } else { f.clone() };
        }
        if same_type_without_qualifier(t, f) {
            return t.clone();
        }
        self.diags.error("ternary arms are incompatible", token.span);
        t.clone()
    }
}

impl Default for Elaborator {
    fn default() -> Self {
        Self::new()
    }
}

/// The variable at the root of a member-access chain, if any.
fn base_var(expr: &Expr) -> Option<&VarRef> {
    match &expr.kind {
        ExprKind::Var(vref) => Some(vref),
        ExprKind::Member { target, .. } => base_var(target),
        _ => None,
    }
}

/// The bit-field info of a member access, if any.
pub(crate) fn member_bitfield(expr: &Expr) -> Option<rvcc_ast::BitFieldInfo> {
    match &expr.kind {
        ExprKind::Member { target, index } => {
            target.ty.struct_info().and_then(|info| info.members.get(*index)?.bitfield)
        }
        _ => None,
    }
}

/// Fold an integer binary operation with wrap-around semantics.
fn fold_fixnum(op: BinOp, a: i64, b: i64, ty: &Type) -> i64 {
    let size = ty.size();
    let unsigned = ty.is_unsigned();
    let raw = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if unsigned {
                ((a as u64) / (b as u64)) as i64
            } else {
                a.wrapping_div(b)
            }
        }
        BinOp::Mod => {
            if unsigned {
                ((a as u64) % (b as u64)) as i64
            } else {
                a.wrapping_rem(b)
            }
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::LShift => a.wrapping_shl(b as u32),
        BinOp::RShift => {
            if unsigned {
                ((a as u64).wrapping_shr(b as u32)) as i64
            } else {
                a.wrapping_shr(b as u32)
            }
        }
        _ => unreachable!("not a foldable arithmetic operator"),
    };
    wrap_value(raw, size, unsigned)
}

fn fold_compare(op: BinOp, a: i64, b: i64, unsigned: bool) -> bool {
    if unsigned {
        let (a, b) = (a as u64, b as u64);
        match op {
            BinOp::Eq => a == b,
            BinOp::Ne => a != b,
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            BinOp::Ge => a >= b,
            _ => unreachable!(),
        }
    } else {
        match op {
            BinOp::Eq => a == b,
            BinOp::Ne => a != b,
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            BinOp::Ge => a >= b,
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rvcc_ast::{FlonumKind, StrLit};

    fn tok() -> Token {
        Token::none()
    }

    fn int(v: i64) -> Expr {
        Expr::fixnum(v, Type::int(), tok())
    }

    #[test]
    fn folds_pure_integer_arithmetic() {
        let mut elab = Elaborator::new();
        // 2 * 3 + 4
        let mul = elab.new_bin(BinOp::Mul, int(2), int(3), tok());
        let sum = elab.new_bin(BinOp::Add, mul, int(4), tok());
        assert_eq!(sum.fixnum_value(), Some(10));
        assert_eq!(sum.ty, Type::int());
    }

    #[test]
    fn promotion_prevents_narrow_wrap() {
        let mut elab = Elaborator::new();
        // unsigned char 200 + 100 folds to 300, not 44.
        let c = Expr::fixnum(200, Type::fixnum(FixnumKind::Char, true), tok());
        let sum = elab.new_bin(BinOp::Add, c, int(100), tok());
        assert_eq!(sum.fixnum_value(), Some(300));
        assert_eq!(sum.ty, Type::int());
    }

    #[test]
    fn folding_wraps_at_declared_width() {
        let mut elab = Elaborator::new();
        let a = int(0x7fff_ffff);
        let sum = elab.new_bin(BinOp::Add, a, int(1), tok());
        assert_eq!(sum.fixnum_value(), Some(-0x8000_0000));
    }

    #[test]
    fn division_by_constant_zero_is_fatal_when_both_const() {
        let mut elab = Elaborator::new();
        elab.new_bin(BinOp::Div, int(1), int(0), tok());
        assert!(elab.diags.has_fatal());

        let mut elab = Elaborator::new();
        let var = {
            elab.define_var(VarInfo::new("x", Type::int()), &tok());
            elab.new_var_ref("x", tok())
        };
        elab.new_bin(BinOp::Div, var, int(0), tok());
        assert!(!elab.diags.has_fatal());
        assert_eq!(elab.diags.warning_count(), 1);
    }

    #[test]
    fn usual_conversions_pick_the_higher_type() {
        let mut elab = Elaborator::new();
        let l = Expr::fixnum(1, Type::long(), tok());
        let sum = elab.new_bin(BinOp::Add, l, int(2), tok());
        assert_eq!(sum.ty, Type::long());

        let d = Expr::flonum(1.5, Type::double(), tok());
        let sum = elab.new_bin(BinOp::Add, d, int(2), tok());
        assert!(sum.ty.is_flonum());
        assert!(matches!(sum.kind, ExprKind::FloNum(v) if v == 3.5));
    }

    #[test]
    fn pointer_minus_pointer_is_ssize() {
        let mut elab = Elaborator::new();
        let pty = Type::ptr(Type::int());
        elab.define_var(VarInfo::new("p", pty.clone()), &tok());
        elab.define_var(VarInfo::new("q", pty), &tok());
        let p = elab.new_var_ref("p", tok());
        let q = elab.new_var_ref("q", tok());
        let diff = elab.new_bin(BinOp::Sub, q, p, tok());
        assert_eq!(diff.ty, Type::ssize());
    }

    #[test]
    fn int_plus_pointer_swaps() {
        let mut elab = Elaborator::new();
        elab.define_var(VarInfo::new("p", Type::ptr(Type::int())), &tok());
        let p = elab.new_var_ref("p", tok());
        let sum = elab.new_bin(BinOp::Add, int(3), p, tok());
        assert_eq!(sum.ty, Type::ptr(Type::int()));
        let ExprKind::Bin { op: BinOp::Add, lhs, .. } = &sum.kind else {
            panic!("expected add node");
        };
        assert!(lhs.ty.is_ptr(), "pointer operand must come first");
    }

    #[test]
    fn constant_comparisons_fold_to_bool() {
        let mut elab = Elaborator::new();
        let cmp = elab.new_bin(BinOp::Lt, int(3), int(5), tok());
        assert_eq!(cmp.fixnum_value(), Some(1));
        let cmp = elab.new_bin(BinOp::Ge, int(3), int(5), tok());
        assert_eq!(cmp.fixnum_value(), Some(0));
    }

    #[test]
    fn unsigned_comparison_folds_unsigned() {
        let mut elab = Elaborator::new();
        let ty = Type::fixnum(FixnumKind::Int, true);
        let a = Expr::fixnum(wrap_value(-1, 4, true), ty.clone(), tok());
        let b = Expr::fixnum(1, ty, tok());
        // 0xFFFFFFFF > 1 unsigned.
        let cmp = elab.new_bin(BinOp::Gt, a, b, tok());
        assert_eq!(cmp.fixnum_value(), Some(1));
    }

    #[test]
    fn double_negation_is_boolean_value() {
        let mut elab = Elaborator::new();
        elab.define_var(VarInfo::new("x", Type::int()), &tok());
        let x = elab.new_var_ref("x", tok());
        let not1 = elab.make_not_expr(x);
        let not2 = elab.make_not_expr(not1);
        // not(not(x)) == (x != 0)
        let ExprKind::Bin { op, rhs, .. } = &not2.kind else { panic!("expected binop") };
        assert_eq!(*op, BinOp::Ne);
        assert!(rhs.is_zero());
    }

    #[test]
    fn demorgan_pushes_negation_inward() {
        let mut elab = Elaborator::new();
        elab.define_var(VarInfo::new("a", Type::int()), &tok());
        elab.define_var(VarInfo::new("b", Type::int()), &tok());
        let a = elab.new_var_ref("a", tok());
        let b = elab.new_var_ref("b", tok());
        let and = elab.new_bin(BinOp::LogAnd, a, b, tok());
        let not = elab.make_not_expr(and);
        let ExprKind::Bin { op, lhs, rhs } = &not.kind else { panic!("expected binop") };
        assert_eq!(*op, BinOp::LogOr);
        // Both children became (v == 0).
        for child in [lhs, rhs] {
            let ExprKind::Bin { op, .. } = &child.kind else { panic!("expected comparison") };
            assert_eq!(*op, BinOp::Eq);
        }
    }

    #[test]
    fn deref_of_ref_collapses() {
        let mut elab = Elaborator::new();
        elab.define_var(VarInfo::new("v", Type::int()), &tok());
        let v = elab.new_var_ref("v", tok());
        let addr = elab.make_refer(v.clone(), tok());
        let back = elab.new_deref(addr, tok());
        assert_eq!(back, v);

        elab.define_var(VarInfo::new("p", Type::ptr(Type::int())), &tok());
        let p = elab.new_var_ref("p", tok());
        let deref = elab.new_deref(p.clone(), tok());
        let addr = elab.make_refer(deref, tok());
        assert_eq!(addr, p);
    }

    #[test]
    fn address_of_marks_variable() {
        let mut elab = Elaborator::new();
        let vref = elab.define_var(VarInfo::new("v", Type::int()), &tok());
        let v = elab.new_var_ref("v", tok());
        elab.make_refer(v, tok());
        let var = elab.scopes.var_in(vref.scope, "v").unwrap();
        assert!(var.is_ref_taken());
    }

    #[test]
    fn compound_assign_through_pointer_uses_temp() {
        let mut elab = Elaborator::new();
        elab.define_var(VarInfo::new("p", Type::ptr(Type::int())), &tok());
        let p = elab.new_var_ref("p", tok());
        let lhs = elab.new_deref(p, tok());
        let expr = elab.new_assign_with(BinOp::Add, lhs, int(1), tok());
        // (tmp = &*p, *tmp = *tmp + 1)
        let ExprKind::Bin { op: BinOp::Comma, lhs: bind, rhs: store } = &expr.kind else {
            panic!("expected comma sequence");
        };
        let ExprKind::Bin { op: BinOp::Assign, lhs: tmp, .. } = &bind.kind else {
            panic!("expected temp binding");
        };
        assert!(matches!(&tmp.kind, ExprKind::Var(v) if v.name.starts_with(".tmp.")));
        let ExprKind::Bin { op: BinOp::Assign, .. } = &store.kind else {
            panic!("expected store");
        };
    }

    #[test]
    fn funcall_checks_arity_and_promotes_vaargs() {
        let mut elab = Elaborator::new();
        let fty = Type::func(Type::int(), Some(vec![Type::ptr(Type::char_type())]), true);
        elab.define_var(VarInfo::new("printf", fty), &tok());
        let callee = elab.new_var_ref("printf", tok());

        let fval = Expr::flonum(1.0, Type::flonum(FlonumKind::Float), tok());
        let s = Expr::new(ExprKind::Str(StrLit::new("%f")), Type::void(), tok());
        let call = elab.new_funcall(callee.clone(), vec![s, fval], tok());
        let ExprKind::Funcall { args, .. } = &call.kind else { panic!("expected call") };
        // float vaarg promoted to double.
        assert_eq!(args[1].ty, Type::double());

        elab.new_funcall(callee, vec![], tok());
        assert!(elab.diags.messages.iter().any(|d| d.message.contains("too few")));
    }

    #[test]
    fn ternary_type_rules() {
        let mut elab = Elaborator::new();
        elab.define_var(VarInfo::new("c", Type::int()), &tok());
        let c = elab.new_var_ref("c", tok());

        // Numeric arms pick the higher type.
        let t = elab.new_ternary(c.clone(), int(1), Expr::fixnum(2, Type::long(), tok()), tok());
        assert_eq!(t.ty, Type::long());

        // void* defers to the typed pointer.
        elab.define_var(VarInfo::new("vp", Type::ptr(Type::void())), &tok());
        elab.define_var(VarInfo::new("ip", Type::ptr(Type::int())), &tok());
        let vp = elab.new_var_ref("vp", tok());
        let ip = elab.new_var_ref("ip", tok());
        let t = elab.new_ternary(c, vp, ip, tok());
        assert_eq!(t.ty, Type::ptr(Type::int()));
    }

    #[test]
    fn constant_condition_selects_arm() {
        let mut elab = Elaborator::new();
        let t = elab.new_ternary(int(1), int(10), int(20), tok());
        assert_eq!(t.fixnum_value(), Some(10));
    }
}
