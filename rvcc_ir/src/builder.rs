//! Lowering of elaborated functions to three-address IR.
//!
//! Expressions produce virtual registers; statements produce control-flow
//! edges. Short-circuit operators and comparisons feeding branches are
//! compiled into conditional jumps instead of materialized booleans.

use hashbrown::HashMap;
use log::debug;

use rvcc_ast::{
    BinOp, Expr, ExprKind, Function, Program, Reach, Stmt, StmtKind, Type, TypeKind, UnOp,
    VarStorage,
};
use rvcc_common::Diagnostics;
use rvcc_sema::bitfield::MIN_REG_BITS;

use crate::inst::{
    BBId, BasicBlock, CallSite, CallTarget, CcKind, CondCode, FloatConst, FrameSlot, FuncIr,
    IrBinOp, IrInst, IrUnOp, ParamInfo, ParamStorage,
};
use crate::vreg::{VRegFlags, VRegId, VRegPool};

/// Target-dependent lowering knobs.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Integer registers available for arguments.
    pub max_reg_args: usize,
    /// Floating registers available for arguments.
    pub max_freg_args: usize,
    /// Pass variadic floating arguments in integer registers.
    pub vaarg_fp_as_int: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { max_reg_args: 8, max_freg_args: 8, vaarg_fp_as_int: true }
    }
}

/// Where a local variable lives during execution.
#[derive(Debug, Clone)]
enum VarSlot {
    Reg(VRegId),
    Frame(usize),
    Global(String),
}

pub struct IrBuilder<'a> {
    program: &'a Program,
    diags: &'a mut Diagnostics,
    config: BuildConfig,
    func: FuncIr,
    cur: BBId,
    vars: HashMap<(u32, String), VarSlot>,
    break_stack: Vec<BBId>,
    continue_stack: Vec<BBId>,
    /// Case blocks of the enclosing switches, indexed by case position.
    switch_stack: Vec<Vec<BBId>>,
    /// `(result vreg, exit block)` of the inline expansions in progress.
    inline_stack: Vec<(Option<VRegId>, BBId)>,
    bb_counter: u32,
    label_bbs: HashMap<String, BBId>,
}

fn size_class(ty: &Type) -> u8 {
    match ty.size() {
        1 => 1,
        2 => 2,
        4 => 4,
        _ => 8,
    }
}

fn vreg_flags(ty: &Type) -> VRegFlags {
    let mut flags = VRegFlags::empty();
    if ty.is_flonum() {
        flags |= VRegFlags::FLONUM;
    }
    if ty.is_unsigned() || ty.is_ptr() {
        flags |= VRegFlags::UNSIGNED;
    }
    flags
}

fn is_aggregate(ty: &Type) -> bool {
    ty.is_struct() || ty.is_array()
}

fn contains_label(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Label { .. } => true,
        StmtKind::Block { stmts, .. } => stmts.iter().any(contains_label),
        StmtKind::If { then_stmt, else_stmt, .. } => {
            contains_label(then_stmt)
                || else_stmt.as_deref().map_or(false, contains_label)
        }
        StmtKind::While { body, .. }
        | StmtKind::DoWhile { body, .. }
        | StmtKind::For { body, .. }
        | StmtKind::Switch { body, .. } => contains_label(body),
        _ => false,
    }
}

/// A dead statement is skipped unless control can still enter it sideways.
fn must_emit_when_dead(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Label { .. } | StmtKind::Case { .. } => true,
        StmtKind::For { pre: Some(pre), .. } if !pre.is_const() => true,
        _ => contains_label(stmt),
    }
}

impl<'a> IrBuilder<'a> {
    /// Lower one elaborated function to IR.
    pub fn build(
        program: &'a Program,
        func: &Function,
        diags: &'a mut Diagnostics,
        config: BuildConfig,
    ) -> FuncIr {
        debug!("lowering function `{}` to IR", func.name);
        let ret = func.ret_type();
        let ret_flonum = if ret.is_void() { None } else { Some(ret.is_flonum()) };
        let mut builder = IrBuilder {
            program,
            diags,
            config,
            func: FuncIr {
                name: func.name.clone(),
                is_static: func.is_static,
                bbs: Vec::new(),
                order: Vec::new(),
                vregs: VRegPool::new(),
                slots: Vec::new(),
                params: Vec::new(),
                call_sites: Vec::new(),
                float_consts: Vec::new(),
                ret_flonum,
                exit_bb: BBId(0),
                frame_size: 0,
            },
            cur: BBId(0),
            vars: HashMap::new(),
            break_stack: Vec::new(),
            continue_stack: Vec::new(),
            switch_stack: Vec::new(),
            inline_stack: Vec::new(),
            bb_counter: 0,
            label_bbs: HashMap::new(),
        };

        let entry = builder.new_bb();
        builder.set_curbb(entry);
        builder.func.exit_bb = builder.new_bb();

        builder.assign_param_storage(func);
        builder.assign_local_storage(func);

        if let Some(body) = &func.body {
            builder.gen_stmt(body);
        }

        let exit = builder.func.exit_bb;
        builder.set_curbb(exit);
        builder.func.compute_succs();
        builder.func
    }

    // ---- storage assignment ----

    fn assign_param_storage(&mut self, func: &Function) {
        let Some(top) = func.top_scope() else { return };
        let mut int_idx = 0usize;
        let mut flo_idx = 0usize;
        let mut incoming = 0i64;
        for name in &func.params {
            let Some(var) = self.program.scopes.var_in(top, name) else { continue };
            let ty = var.ty.clone();
            let flonum = ty.is_flonum();
            let aggregate = is_aggregate(&ty);
            let reg_index = if flonum { flo_idx } else { int_idx };
            let in_regs = !aggregate
                && if flonum {
                    flo_idx < self.config.max_freg_args
                } else {
                    int_idx < self.config.max_reg_args
                };
            // Aggregates go to the stack and consume no register index.
            if !aggregate {
                if flonum {
                    flo_idx += 1;
                } else {
                    int_idx += 1;
                }
            }

            let key = (top.0, name.clone());
            let size = size_class(&ty);
            if in_regs {
                if var.is_ref_taken() {
                    // Address taken: the prologue stores the register away.
                    let slot = self.new_slot(ty.size().max(1), ty.align().max(1));
                    self.vars.insert(key, VarSlot::Frame(slot));
                    self.func.params.push(ParamInfo {
                        reg_index,
                        flonum,
                        size,
                        storage: ParamStorage::Frame(slot),
                    });
                } else {
                    let vreg = self.func.vregs.add(size, vreg_flags(&ty));
                    self.vars.insert(key, VarSlot::Reg(vreg));
                    self.func.params.push(ParamInfo {
                        reg_index,
                        flonum,
                        size,
                        storage: ParamStorage::Reg(vreg),
                    });
                }
            } else {
                let bytes = (ty.size().max(1) + 7) & !7;
                let slot = self.new_incoming_slot(ty.size().max(1), ty.align().max(8), incoming);
                incoming += bytes as i64;
                self.vars.insert(key, VarSlot::Frame(slot));
                self.func.params.push(ParamInfo {
                    reg_index,
                    flonum,
                    size,
                    storage: ParamStorage::StackIncoming(slot),
                });
            }
        }
    }

    fn assign_local_storage(&mut self, func: &Function) {
        for scope in &func.scopes {
            let vars: Vec<_> = self
                .program
                .scopes
                .get(*scope)
                .vars
                .iter()
                .filter(|v| !v.storage.contains(VarStorage::PARAM))
                .map(|v| (v.name.clone(), v.ty.clone(), v.storage, v.static_alias.clone()))
                .collect();
            for (name, ty, storage, alias) in vars {
                let key = (scope.0, name);
                if let Some(alias) = alias {
                    self.vars.insert(key, VarSlot::Global(alias));
                    continue;
                }
                if storage.contains(VarStorage::ENUM_MEMBER)
                    || storage.contains(VarStorage::EXTERN)
                {
                    continue;
                }
                if ty.is_prim() && !storage.contains(VarStorage::REF_TAKEN) {
                    let vreg = self.func.vregs.add(size_class(&ty), vreg_flags(&ty));
                    self.vars.insert(key, VarSlot::Reg(vreg));
                } else {
                    let slot = self.new_slot(ty.size().max(1), ty.align().max(1));
                    self.vars.insert(key, VarSlot::Frame(slot));
                }
            }
        }
    }

    fn new_slot(&mut self, size: usize, align: usize) -> usize {
        self.func.slots.push(FrameSlot { size, align, offset: 0, incoming_offset: None });
        self.func.slots.len() - 1
    }

    fn new_incoming_slot(&mut self, size: usize, align: usize, offset: i64) -> usize {
        self.func.slots.push(FrameSlot {
            size,
            align,
            offset: 0,
            incoming_offset: Some(offset),
        });
        self.func.slots.len() - 1
    }

    // ---- blocks and emission ----

    fn new_bb(&mut self) -> BBId {
        let label = format!(".L{}.{}", self.func.name, self.bb_counter);
        self.bb_counter += 1;
        self.func.bbs.push(BasicBlock::new(label));
        BBId(self.func.bbs.len() as u32 - 1)
    }

    fn set_curbb(&mut self, bb: BBId) {
        self.func.order.push(bb);
        self.cur = bb;
    }

    fn emit(&mut self, ir: IrInst) {
        self.func.bbs[self.cur.0 as usize].irs.push(ir);
    }

    fn new_vreg(&mut self, ty: &Type) -> VRegId {
        self.func.vregs.add(size_class(ty), vreg_flags(ty))
    }

    fn new_const(&mut self, value: i64, ty: &Type) -> VRegId {
        self.func.vregs.add_const(value, size_class(ty), ty.is_unsigned() || ty.is_ptr())
    }

    fn jmp(&mut self, bb: BBId) {
        // A block with a terminator never reaches a second jump.
        if self.func.bbs[self.cur.0 as usize].ends_flow() {
            return;
        }
        self.emit(IrInst::Jmp { cc: CondCode::ANY, lhs: None, rhs: None, bb });
    }

    // ---- statements ----

    fn gen_stmt(&mut self, stmt: &Stmt) -> Option<VRegId> {
        match &stmt.kind {
            StmtKind::Empty => None,
            StmtKind::Expr(expr) => self.gen_expr(expr),
            StmtKind::Block { stmts, .. } => self.gen_block(stmts),
            StmtKind::If { cond, then_stmt, else_stmt } => {
                self.gen_if(cond, then_stmt, else_stmt.as_deref());
                None
            }
            StmtKind::Switch { value, body, cases } => {
                self.gen_switch(value, body, cases);
                None
            }
            StmtKind::Case { index } => {
                let bb = self
                    .switch_stack
                    .last()
                    .and_then(|cases| cases.get(*index))
                    .copied();
                if let Some(bb) = bb {
                    self.set_curbb(bb);
                }
                None
            }
            StmtKind::While { cond, body } => {
                self.gen_while(cond, body);
                None
            }
            StmtKind::DoWhile { body, cond } => {
                self.gen_do_while(body, cond);
                None
            }
            StmtKind::For { pre, cond, post, body } => {
                self.gen_for(pre.as_ref(), cond.as_ref(), post.as_ref(), body);
                None
            }
            StmtKind::Break => {
                if let Some(bb) = self.break_stack.last().copied() {
                    self.jmp(bb);
                }
                None
            }
            StmtKind::Continue => {
                if let Some(bb) = self.continue_stack.last().copied() {
                    self.jmp(bb);
                }
                None
            }
            StmtKind::Goto { label } => {
                let bb = self.label_bb(label);
                self.jmp(bb);
                None
            }
            StmtKind::Label { name, stmt, .. } => {
                let bb = self.label_bb(name);
                self.set_curbb(bb);
                self.gen_stmt(stmt)
            }
            StmtKind::Return { value, func_end } => {
                self.gen_return(value.as_ref(), *func_end);
                None
            }
            StmtKind::VarDecl { decls } => {
                for decl in decls {
                    if let Some(init) = &decl.init {
                        self.gen_stmt(init);
                    }
                }
                None
            }
            StmtKind::Asm { template } => {
                self.emit(IrInst::Asm { template: template.clone() });
                None
            }
        }
    }

    fn label_bb(&mut self, name: &str) -> BBId {
        if let Some(bb) = self.label_bbs.get(name) {
            return *bb;
        }
        let bb = self.new_bb();
        self.label_bbs.insert(name.to_string(), bb);
        bb
    }

    fn gen_block(&mut self, stmts: &[Stmt]) -> Option<VRegId> {
        let mut last = None;
        let mut stopped = false;
        for stmt in stmts {
            if stopped && !must_emit_when_dead(stmt) {
                continue;
            }
            last = self.gen_stmt(stmt);
            stopped = stmt.reach.contains(Reach::STOP);
            if matches!(stmt.kind, StmtKind::Label { .. } | StmtKind::Case { .. }) {
                stopped = false;
            }
        }
        last
    }

    fn gen_if(&mut self, cond: &Expr, then_stmt: &Stmt, else_stmt: Option<&Stmt>) {
        let then_bb = self.new_bb();
        let next_bb = self.new_bb();
        let else_bb = else_stmt.map(|_| self.new_bb());

        self.gen_cond_jmp(cond, then_bb, else_bb.unwrap_or(next_bb));
        self.set_curbb(then_bb);
        self.gen_stmt(then_stmt);
        if let Some(else_bb) = else_bb {
            self.jmp(next_bb);
            self.set_curbb(else_bb);
            self.gen_stmt(else_stmt.unwrap());
        }
        self.set_curbb(next_bb);
    }

    fn gen_while(&mut self, cond: &Expr, body: &Stmt) {
        let cond_bb = self.new_bb();
        let body_bb = self.new_bb();
        let next_bb = self.new_bb();

        self.jmp(cond_bb);
        self.set_curbb(body_bb);
        self.break_stack.push(next_bb);
        self.continue_stack.push(cond_bb);
        self.gen_stmt(body);
        self.break_stack.pop();
        self.continue_stack.pop();

        self.set_curbb(cond_bb);
        self.gen_cond_jmp(cond, body_bb, next_bb);
        self.set_curbb(next_bb);
    }

    fn gen_do_while(&mut self, body: &Stmt, cond: &Expr) {
        let body_bb = self.new_bb();
        let cond_bb = self.new_bb();
        let next_bb = self.new_bb();

        self.set_curbb(body_bb);
        self.break_stack.push(next_bb);
        self.continue_stack.push(cond_bb);
        self.gen_stmt(body);
        self.break_stack.pop();
        self.continue_stack.pop();

        self.set_curbb(cond_bb);
        self.gen_cond_jmp(cond, body_bb, next_bb);
        self.set_curbb(next_bb);
    }

    fn gen_for(
        &mut self,
        pre: Option<&Expr>,
        cond: Option<&Expr>,
        post: Option<&Expr>,
        body: &Stmt,
    ) {
        if let Some(pre) = pre {
            self.gen_expr(pre);
        }
        let cond_bb = self.new_bb();
        let body_bb = self.new_bb();
        let post_bb = self.new_bb();
        let next_bb = self.new_bb();

        self.jmp(cond_bb);
        self.set_curbb(cond_bb);
        match cond {
            Some(cond) => self.gen_cond_jmp(cond, body_bb, next_bb),
            None => self.jmp(body_bb),
        }

        self.set_curbb(body_bb);
        self.break_stack.push(next_bb);
        self.continue_stack.push(post_bb);
        self.gen_stmt(body);
        self.break_stack.pop();
        self.continue_stack.pop();

        self.set_curbb(post_bb);
        if let Some(post) = post {
            self.gen_expr(post);
        }
        self.jmp(cond_bb);
        self.set_curbb(next_bb);
    }

    fn gen_return(&mut self, value: Option<&Expr>, func_end: bool) {
        // Inside an inline expansion, return feeds the expansion result.
        if let Some((result, exit)) = self.inline_stack.last().copied() {
            if let (Some(result), Some(value)) = (result, value) {
                if let Some(src) = self.gen_expr(value) {
                    self.emit(IrInst::Mov { dst: result, src });
                }
            } else if let Some(value) = value {
                self.gen_expr(value);
            }
            self.jmp(exit);
            return;
        }

        if let Some(value) = value {
            if let Some(src) = self.gen_expr(value) {
                self.emit(IrInst::Result { src });
            }
        }
        if !func_end {
            let exit = self.func.exit_bb;
            self.jmp(exit);
        }
    }

    fn gen_switch(&mut self, value: &Expr, body: &Stmt, cases: &[Option<i64>]) {
        let Some(val) = self.gen_expr(value) else { return };
        let next_bb = self.new_bb();
        let case_bbs: Vec<BBId> = cases.iter().map(|_| self.new_bb()).collect();
        let default_bb = cases
            .iter()
            .position(|c| c.is_none())
            .map(|i| case_bbs[i])
            .unwrap_or(next_bb);

        let mut pairs: Vec<(i64, usize)> = cases
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|v| (v, i)))
            .collect();
        pairs.sort_by_key(|(v, _)| *v);
        let contiguous = pairs.len() >= 4
            && pairs.windows(2).all(|w| w[1].0 == w[0].0 + 1);

        if contiguous {
            // Dense values dispatch through a case-indexed rodata table.
            let min = pairs[0].0;
            let vty = value.ty.clone();
            let idx = if min != 0 {
                let base = self.new_const(min, &vty);
                let idx = self.func.vregs.add(8, VRegFlags::empty());
                self.emit(IrInst::Bin { op: IrBinOp::Sub, dst: idx, lhs: val, rhs: base });
                idx
            } else {
                val
            };
            let bound = self.func.vregs.add_const(pairs.len() as i64, 8, true);
            self.emit(IrInst::Jmp {
                cc: CondCode::new(CcKind::Ge, true, false),
                lhs: Some(idx),
                rhs: Some(bound),
                bb: default_bb,
            });
            let table = pairs.iter().map(|(_, i)| case_bbs[*i]).collect();
            self.emit(IrInst::TJmp { value: idx, table });
        } else {
            for (v, i) in &pairs {
                let konst = self.new_const(*v, &value.ty);
                self.emit(IrInst::Jmp {
                    cc: CondCode::new(CcKind::Eq, false, false),
                    lhs: Some(val),
                    rhs: Some(konst),
                    bb: case_bbs[*i],
                });
            }
            self.jmp(default_bb);
        }

        self.break_stack.push(next_bb);
        self.switch_stack.push(case_bbs);
        self.gen_stmt(body);
        self.switch_stack.pop();
        self.break_stack.pop();
        self.set_curbb(next_bb);
    }

    // ---- condition jumps ----

    fn gen_cond_jmp(&mut self, cond: &Expr, tbb: BBId, fbb: BBId) {
        match &cond.kind {
            ExprKind::FixNum(v) => {
                self.jmp(if *v != 0 { tbb } else { fbb });
            }
            ExprKind::Bin { op, lhs, rhs } if op.is_comparison() => {
                let cc = CondCode::from_binop(
                    *op,
                    lhs.ty.is_unsigned() || lhs.ty.is_ptr(),
                    lhs.ty.is_flonum(),
                );
                let l = self.gen_expr(lhs);
                let r = self.gen_expr(rhs);
                self.emit(IrInst::Jmp { cc, lhs: l, rhs: r, bb: tbb });
                self.jmp(fbb);
            }
            ExprKind::Bin { op: BinOp::LogAnd, lhs, rhs } => {
                let mid = self.new_bb();
                self.gen_cond_jmp(lhs, mid, fbb);
                self.set_curbb(mid);
                self.gen_cond_jmp(rhs, tbb, fbb);
            }
            ExprKind::Bin { op: BinOp::LogOr, lhs, rhs } => {
                let mid = self.new_bb();
                self.gen_cond_jmp(lhs, tbb, mid);
                self.set_curbb(mid);
                self.gen_cond_jmp(rhs, tbb, fbb);
            }
            _ => {
                let Some(v) = self.gen_expr(cond) else {
                    self.jmp(fbb);
                    return;
                };
                let flonum = cond.ty.is_flonum();
                let zero = if flonum {
                    self.gen_float_const(0.0, &cond.ty)
                } else {
                    self.new_const(0, &cond.ty)
                };
                let cc = CondCode::new(CcKind::Ne, false, flonum);
                self.emit(IrInst::Jmp { cc, lhs: Some(v), rhs: Some(zero), bb: tbb });
                self.jmp(fbb);
            }
        }
    }

    // ---- expressions ----

    fn gen_expr(&mut self, expr: &Expr) -> Option<VRegId> {
        match &expr.kind {
            ExprKind::FixNum(v) => Some(self.new_const(*v, &expr.ty)),
            ExprKind::FloNum(v) => Some(self.gen_float_const(*v, &expr.ty)),
            ExprKind::Str(_) => {
                // String literals become named arrays during elaboration.
                debug_assert!(false, "raw string literal reached the IR builder");
                Some(self.new_const(0, &Type::int()))
            }
            ExprKind::Var(vref) => self.gen_var_read(expr, &vref.name, vref.scope.0),
            ExprKind::Bin { op, lhs, rhs } => self.gen_bin(expr, *op, lhs, rhs),
            ExprKind::Unary { op, sub } => self.gen_unary(expr, *op, sub),
            ExprKind::Ternary { cond, then_val, else_val } => {
                self.gen_ternary(expr, cond, then_val, else_val)
            }
            ExprKind::Member { .. } => self.gen_member_read(expr),
            ExprKind::Funcall { func, args } => self.gen_funcall(expr, func, args),
            ExprKind::InlinedCall { args, params, body, .. } => {
                self.gen_inlined_call(expr, args, params, body)
            }
            ExprKind::CompoundLit { var, inits } => {
                for init in inits {
                    self.gen_stmt(init);
                }
                self.gen_var_read(expr, &var.name, var.scope.0)
            }
            ExprKind::StmtExpr(stmt) => match &stmt.kind {
                StmtKind::Block { stmts, .. } => self.gen_block(stmts),
                _ => self.gen_stmt(stmt),
            },
        }
    }

    fn gen_float_const(&mut self, value: f64, ty: &Type) -> VRegId {
        let size = size_class(ty);
        let bits = if size == 4 {
            (value as f32).to_bits() as u64
        } else {
            value.to_bits()
        };
        let label = format!(".LC{}.{}", self.func.name, self.func.float_consts.len());
        self.func.float_consts.push(FloatConst { label: label.clone(), bits, size });
        let addr = self.func.vregs.add(8, VRegFlags::UNSIGNED);
        self.emit(IrInst::Iofs { dst: addr, label, offset: 0 });
        let dst = self.new_vreg(ty);
        self.emit(IrInst::Load { dst, addr });
        dst
    }

    fn gen_var_read(&mut self, expr: &Expr, name: &str, scope: u32) -> Option<VRegId> {
        let aggregate = is_aggregate(&expr.ty) || expr.ty.is_func();
        match self.vars.get(&(scope, name.to_string())).cloned() {
            Some(VarSlot::Reg(vreg)) => Some(vreg),
            Some(VarSlot::Frame(slot)) => {
                let addr = self.func.vregs.add(8, VRegFlags::UNSIGNED);
                self.emit(IrInst::Bofs { dst: addr, slot });
                if aggregate {
                    Some(addr)
                } else {
                    let dst = self.new_vreg(&expr.ty);
                    self.emit(IrInst::Load { dst, addr });
                    Some(dst)
                }
            }
            Some(VarSlot::Global(label)) => self.gen_global_read(expr, &label, aggregate),
            None => {
                // Not function-local: a global in the outer scopes.
                let label = name.to_string();
                self.gen_global_read(expr, &label, aggregate)
            }
        }
    }

    fn gen_global_read(&mut self, expr: &Expr, label: &str, aggregate: bool) -> Option<VRegId> {
        let addr = self.func.vregs.add(8, VRegFlags::UNSIGNED);
        self.emit(IrInst::Iofs { dst: addr, label: label.to_string(), offset: 0 });
        if aggregate {
            Some(addr)
        } else {
            let dst = self.new_vreg(&expr.ty);
            self.emit(IrInst::Load { dst, addr });
            Some(dst)
        }
    }

    /// Address of an lvalue.
    fn gen_lval(&mut self, expr: &Expr) -> Option<VRegId> {
        match &expr.kind {
            ExprKind::Var(vref) => {
                match self.vars.get(&(vref.scope.0, vref.name.clone())).cloned() {
                    Some(VarSlot::Frame(slot)) => {
                        let addr = self.func.vregs.add(8, VRegFlags::UNSIGNED);
                        self.emit(IrInst::Bofs { dst: addr, slot });
                        Some(addr)
                    }
                    Some(VarSlot::Global(label)) => {
                        let addr = self.func.vregs.add(8, VRegFlags::UNSIGNED);
                        self.emit(IrInst::Iofs { dst: addr, label, offset: 0 });
                        Some(addr)
                    }
                    Some(VarSlot::Reg(_)) => {
                        self.diags.error(
                            "internal: address of register variable",
                            expr.token.span,
                        );
                        None
                    }
                    None => {
                        let addr = self.func.vregs.add(8, VRegFlags::UNSIGNED);
                        self.emit(IrInst::Iofs {
                            dst: addr,
                            label: vref.name.clone(),
                            offset: 0,
                        });
                        Some(addr)
                    }
                }
            }
            ExprKind::Unary { op: UnOp::Deref, sub } => self.gen_expr(sub),
            ExprKind::Member { target, index } => {
                let base = self.gen_lval_or_value(target)?;
                let offset = target
                    .ty
                    .struct_info()
                    .and_then(|info| info.members.get(*index))
                    .map_or(0, |m| m.offset);
                if offset == 0 {
                    return Some(base);
                }
                let dst = self.func.vregs.add(8, VRegFlags::UNSIGNED);
                self.emit(IrInst::PtrAdd {
                    dst,
                    base,
                    index: None,
                    scale: 1,
                    offset: offset as i64,
                });
                Some(dst)
            }
            ExprKind::CompoundLit { var, inits } => {
                for init in inits {
                    self.gen_stmt(init);
                }
                let var_expr = Expr::var(
                    var.name.clone(),
                    var.scope,
                    expr.ty.clone(),
                    expr.token.clone(),
                );
                self.gen_lval(&var_expr)
            }
            _ => {
                self.diags.error("expression is not an lvalue", expr.token.span);
                None
            }
        }
    }

    /// For member bases: aggregates read as their address already.
    fn gen_lval_or_value(&mut self, expr: &Expr) -> Option<VRegId> {
        if is_aggregate(&expr.ty) {
            match &expr.kind {
                ExprKind::Unary { op: UnOp::Deref, sub } => self.gen_expr(sub),
                _ => self.gen_lval(expr),
            }
        } else {
            self.gen_expr(expr)
        }
    }

    fn gen_member_read(&mut self, expr: &Expr) -> Option<VRegId> {
        let ExprKind::Member { target, index } = &expr.kind else { unreachable!() };
        let bitfield = target
            .ty
            .struct_info()
            .and_then(|info| info.members.get(*index))
            .and_then(|m| m.bitfield);
        let addr = self.gen_lval(expr)?;
        if is_aggregate(&expr.ty) {
            return Some(addr);
        }
        match bitfield {
            None => {
                let dst = self.new_vreg(&expr.ty);
                self.emit(IrInst::Load { dst, addr });
                Some(dst)
            }
            Some(bf) => {
                // Shift and mask the backing integer; a shift pair
                // sign-extends signed fields.
                let unit_size = bf.base_kind.size();
                let unit = self.func.vregs.add(unit_size as u8, VRegFlags::UNSIGNED);
                self.emit(IrInst::Load { dst: unit, addr });
                let signed = !expr.ty.is_unsigned();
                let dst = self.new_vreg(&expr.ty);
                if signed {
                    let bits = ((unit_size * 8) as u32).max(MIN_REG_BITS);
                    let wide: u8 = if bits > 32 { 8 } else { 4 };
                    let up_amount =
                        self.func.vregs.add_const((bits - bf.position - bf.width) as i64, 4, false);
                    let down_amount = self.func.vregs.add_const((bits - bf.width) as i64, 4, false);
                    let up = self.func.vregs.add(wide, VRegFlags::empty());
                    self.emit(IrInst::Bin { op: IrBinOp::LShift, dst: up, lhs: unit, rhs: up_amount });
                    self.emit(IrInst::Bin {
                        op: IrBinOp::RShift,
                        dst,
                        lhs: up,
                        rhs: down_amount,
                    });
                } else {
                    let pos = self.func.vregs.add_const(bf.position as i64, 4, false);
                    let mask = self.func.vregs.add_const(bf.mask(), unit_size as u8, true);
                    let shifted = self.func.vregs.add(unit_size as u8, VRegFlags::UNSIGNED);
                    self.emit(IrInst::Bin { op: IrBinOp::RShift, dst: shifted, lhs: unit, rhs: pos });
                    self.emit(IrInst::Bin { op: IrBinOp::BitAnd, dst, lhs: shifted, rhs: mask });
                }
                Some(dst)
            }
        }
    }

    fn gen_bin(&mut self, expr: &Expr, op: BinOp, lhs: &Expr, rhs: &Expr) -> Option<VRegId> {
        match op {
            BinOp::Assign => self.gen_assign(lhs, rhs),
            BinOp::Comma => {
                self.gen_expr(lhs);
                self.gen_expr(rhs)
            }
            BinOp::LogAnd | BinOp::LogOr => self.gen_logical_value(expr),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let cc = CondCode::from_binop(
                    op,
                    lhs.ty.is_unsigned() || lhs.ty.is_ptr(),
                    lhs.ty.is_flonum(),
                );
                let l = self.gen_expr(lhs)?;
                let r = self.gen_expr(rhs)?;
                let dst = self.new_vreg(&expr.ty);
                self.emit(IrInst::Cond { dst, cc, lhs: l, rhs: r });
                Some(dst)
            }
            BinOp::Add | BinOp::Sub if expr.ty.is_ptr() => {
                self.gen_ptr_arith(expr, op, lhs, rhs)
            }
            BinOp::Sub if lhs.ty.ptr_or_array() && rhs.ty.ptr_or_array() => {
                self.gen_ptr_diff(expr, lhs, rhs)
            }
            _ => {
                let ir_op = match op {
                    BinOp::Add => IrBinOp::Add,
                    BinOp::Sub => IrBinOp::Sub,
                    BinOp::Mul => IrBinOp::Mul,
                    BinOp::Div => IrBinOp::Div,
                    BinOp::Mod => IrBinOp::Mod,
                    BinOp::BitAnd => IrBinOp::BitAnd,
                    BinOp::BitOr => IrBinOp::BitOr,
                    BinOp::BitXor => IrBinOp::BitXor,
                    BinOp::LShift => IrBinOp::LShift,
                    BinOp::RShift => IrBinOp::RShift,
                    _ => unreachable!("binary operator already handled"),
                };
                let l = self.gen_expr(lhs)?;
                let r = self.gen_expr(rhs)?;
                let dst = self.new_vreg(&expr.ty);
                self.emit(IrInst::Bin { op: ir_op, dst, lhs: l, rhs: r });
                Some(dst)
            }
        }
    }

    fn gen_ptr_arith(&mut self, expr: &Expr, op: BinOp, lhs: &Expr, rhs: &Expr) -> Option<VRegId> {
        let scale = expr.ty.base().map_or(1, |b| b.size()).max(1);
        let base = self.gen_expr(lhs)?;
        let dst = self.new_vreg(&expr.ty);
        let negative = op == BinOp::Sub;

        if let Some(c) = rhs.fixnum_value() {
            let offset = c.wrapping_mul(scale as i64);
            let offset = if negative { -offset } else { offset };
            self.emit(IrInst::PtrAdd { dst, base, index: None, scale: 1, offset });
            return Some(dst);
        }

        let mut index = self.gen_expr(rhs)?;
        if negative {
            let neg = self.func.vregs.add(8, VRegFlags::empty());
            self.emit(IrInst::Un { op: IrUnOp::Neg, dst: neg, src: index });
            index = neg;
        }
        if scale.is_power_of_two() && scale <= 8 {
            self.emit(IrInst::PtrAdd { dst, base, index: Some(index), scale, offset: 0 });
        } else {
            // Non-encodable scale: materialize the multiply.
            let sc = self.func.vregs.add_const(scale as i64, 8, false);
            let scaled = self.func.vregs.add(8, VRegFlags::empty());
            self.emit(IrInst::Bin { op: IrBinOp::Mul, dst: scaled, lhs: index, rhs: sc });
            self.emit(IrInst::PtrAdd { dst, base, index: Some(scaled), scale: 1, offset: 0 });
        }
        Some(dst)
    }

    fn gen_ptr_diff(&mut self, expr: &Expr, lhs: &Expr, rhs: &Expr) -> Option<VRegId> {
        let elem_size = lhs.ty.base().map_or(1, |b| b.size()).max(1);
        let l = self.gen_expr(lhs)?;
        let r = self.gen_expr(rhs)?;
        let diff = self.func.vregs.add(8, VRegFlags::empty());
        self.emit(IrInst::Bin { op: IrBinOp::Sub, dst: diff, lhs: l, rhs: r });
        if elem_size == 1 {
            return Some(diff);
        }
        let size = self.func.vregs.add_const(elem_size as i64, 8, false);
        let dst = self.new_vreg(&expr.ty);
        self.emit(IrInst::Bin { op: IrBinOp::Div, dst, lhs: diff, rhs: size });
        Some(dst)
    }

    fn gen_assign(&mut self, lhs: &Expr, rhs: &Expr) -> Option<VRegId> {
        if let ExprKind::Var(vref) = &lhs.kind {
            if let Some(VarSlot::Reg(dst)) = self.vars.get(&(vref.scope.0, vref.name.clone())) {
                let dst = *dst;
                let src = self.gen_expr(rhs)?;
                self.emit(IrInst::Mov { dst, src });
                return Some(dst);
            }
        }
        let addr = self.gen_lval(lhs)?;
        let src = self.gen_expr(rhs)?;
        if is_aggregate(&lhs.ty) {
            self.gen_memcopy(addr, src, lhs.ty.size());
            return Some(src);
        }
        self.emit(IrInst::Store { addr, src });
        Some(src)
    }

    /// Word-by-word copy of `size` bytes from `[src]` to `[dst]`.
    fn gen_memcopy(&mut self, dst: VRegId, src: VRegId, size: usize) {
        let mut offset = 0usize;
        let mut remaining = size;
        for chunk in [8usize, 4, 2, 1] {
            while remaining >= chunk {
                let from = self.offset_addr(src, offset as i64);
                let tmp = self.func.vregs.add(chunk as u8, VRegFlags::UNSIGNED);
                self.emit(IrInst::Load { dst: tmp, addr: from });
                let to = self.offset_addr(dst, offset as i64);
                self.emit(IrInst::Store { addr: to, src: tmp });
                offset += chunk;
                remaining -= chunk;
            }
        }
    }

    fn offset_addr(&mut self, base: VRegId, offset: i64) -> VRegId {
        if offset == 0 {
            return base;
        }
        let dst = self.func.vregs.add(8, VRegFlags::UNSIGNED);
        self.emit(IrInst::PtrAdd { dst, base, index: None, scale: 1, offset });
        dst
    }

    fn gen_logical_value(&mut self, expr: &Expr) -> Option<VRegId> {
        let dst = self.new_vreg(&expr.ty);
        let tbb = self.new_bb();
        let fbb = self.new_bb();
        let next = self.new_bb();
        self.gen_cond_jmp(expr, tbb, fbb);
        self.set_curbb(tbb);
        let one = self.new_const(1, &expr.ty);
        self.emit(IrInst::Mov { dst, src: one });
        self.jmp(next);
        self.set_curbb(fbb);
        let zero = self.new_const(0, &expr.ty);
        self.emit(IrInst::Mov { dst, src: zero });
        self.set_curbb(next);
        Some(dst)
    }

    fn gen_unary(&mut self, expr: &Expr, op: UnOp, sub: &Expr) -> Option<VRegId> {
        match op {
            UnOp::Ref => self.gen_lval(sub),
            UnOp::Deref => {
                let addr = self.gen_expr(sub)?;
                if is_aggregate(&expr.ty) || expr.ty.is_func() {
                    return Some(addr);
                }
                let dst = self.new_vreg(&expr.ty);
                self.emit(IrInst::Load { dst, addr });
                Some(dst)
            }
            UnOp::Neg => {
                let src = self.gen_expr(sub)?;
                let dst = self.new_vreg(&expr.ty);
                self.emit(IrInst::Un { op: IrUnOp::Neg, dst, src });
                Some(dst)
            }
            UnOp::BitNot => {
                let src = self.gen_expr(sub)?;
                let dst = self.new_vreg(&expr.ty);
                self.emit(IrInst::Un { op: IrUnOp::BitNot, dst, src });
                Some(dst)
            }
            UnOp::Cast => self.gen_cast(expr, sub),
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => {
                self.gen_incdec(expr, op, sub)
            }
        }
    }

    fn gen_cast(&mut self, expr: &Expr, sub: &Expr) -> Option<VRegId> {
        if expr.ty.is_void() {
            self.gen_expr(sub);
            return None;
        }
        let src = self.gen_expr(sub)?;
        let src_size = size_class(&sub.ty);
        let dst_size = size_class(&expr.ty);
        let class_change = sub.ty.is_flonum() != expr.ty.is_flonum();
        if !class_change && src_size == dst_size {
            // Same register class and width: a plain move re-tags flags.
            let sf = self.func.vregs.get(src).flags;
            if sf.contains(VRegFlags::CONST) || sf == vreg_flags(&expr.ty) {
                return Some(src);
            }
            let dst = self.new_vreg(&expr.ty);
            self.emit(IrInst::Mov { dst, src });
            return Some(dst);
        }
        let dst = self.new_vreg(&expr.ty);
        self.emit(IrInst::Cast {
            dst,
            src,
            src_size,
            src_unsigned: sub.ty.is_unsigned() || sub.ty.is_ptr(),
        });
        Some(dst)
    }

    fn gen_incdec(&mut self, expr: &Expr, op: UnOp, target: &Expr) -> Option<VRegId> {
        let is_inc = matches!(op, UnOp::PreInc | UnOp::PostInc);
        let is_post = matches!(op, UnOp::PostInc | UnOp::PostDec);
        let delta_value: i64 = if expr.ty.is_ptr() {
            expr.ty.base().map_or(1, |b| b.size()).max(1) as i64
        } else {
            1
        };
        let bin_op = if is_inc { IrBinOp::Add } else { IrBinOp::Sub };

        if let ExprKind::Var(vref) = &target.kind {
            if let Some(VarSlot::Reg(reg)) = self.vars.get(&(vref.scope.0, vref.name.clone())) {
                let reg = *reg;
                let delta = self.new_const(delta_value, &Type::int());
                if is_post {
                    let old = self.new_vreg(&expr.ty);
                    self.emit(IrInst::Mov { dst: old, src: reg });
                    self.emit(IrInst::Bin { op: bin_op, dst: reg, lhs: reg, rhs: delta });
                    return Some(old);
                }
                self.emit(IrInst::Bin { op: bin_op, dst: reg, lhs: reg, rhs: delta });
                return Some(reg);
            }
        }

        let addr = self.gen_lval(target)?;
        let old = self.new_vreg(&expr.ty);
        self.emit(IrInst::Load { dst: old, addr });
        let delta = self.new_const(delta_value, &Type::int());
        let neu = self.new_vreg(&expr.ty);
        self.emit(IrInst::Bin { op: bin_op, dst: neu, lhs: old, rhs: delta });
        self.emit(IrInst::Store { addr, src: neu });
        Some(if is_post { old } else { neu })
    }

    fn gen_ternary(
        &mut self,
        expr: &Expr,
        cond: &Expr,
        then_val: &Expr,
        else_val: &Expr,
    ) -> Option<VRegId> {
        let dst = if expr.ty.is_void() { None } else { Some(self.new_vreg(&expr.ty)) };
        let tbb = self.new_bb();
        let fbb = self.new_bb();
        let next = self.new_bb();
        self.gen_cond_jmp(cond, tbb, fbb);

        self.set_curbb(tbb);
        if let Some(src) = self.gen_expr(then_val) {
            if let Some(dst) = dst {
                self.emit(IrInst::Mov { dst, src });
            }
        }
        self.jmp(next);

        self.set_curbb(fbb);
        if let Some(src) = self.gen_expr(else_val) {
            if let Some(dst) = dst {
                self.emit(IrInst::Mov { dst, src });
            }
        }
        self.set_curbb(next);
        dst
    }

    fn gen_funcall(&mut self, expr: &Expr, func: &Expr, args: &[Expr]) -> Option<VRegId> {
        let functype = match &func.ty.kind {
            TypeKind::Func(ft) => Some((**ft).clone()),
            TypeKind::Ptr(p) => p.func_type().cloned(),
            _ => None,
        }?;
        if expr.ty.is_struct() {
            self.diags.error("struct return values are not supported", expr.token.span);
            return Some(self.new_const(0, &Type::int()));
        }
        let named_count = functype.params.as_ref().map_or(args.len(), |p| p.len());

        // Classify arguments into registers and stack.
        #[derive(Clone, Copy)]
        enum ArgClass {
            Reg { index: usize, flonum: bool },
            Stack { offset: usize },
        }
        let mut classes = Vec::with_capacity(args.len());
        let (mut int_idx, mut flo_idx, mut stack_offset) = (0usize, 0usize, 0usize);
        for (i, arg) in args.iter().enumerate() {
            let vaarg_pos = functype.vaargs && i >= named_count;
            let as_flonum =
                arg.ty.is_flonum() && !(vaarg_pos && self.config.vaarg_fp_as_int);
            let class = if arg.ty.is_struct() {
                let align = arg.ty.align().max(8);
                stack_offset = (stack_offset + align - 1) & !(align - 1);
                let c = ArgClass::Stack { offset: stack_offset };
                stack_offset += (arg.ty.size() + 7) & !7;
                c
            } else if as_flonum && flo_idx < self.config.max_freg_args {
                let c = ArgClass::Reg { index: flo_idx, flonum: true };
                flo_idx += 1;
                c
            } else if !as_flonum && int_idx < self.config.max_reg_args {
                let c = ArgClass::Reg { index: int_idx, flonum: false };
                int_idx += 1;
                c
            } else {
                stack_offset = (stack_offset + 7) & !7;
                let c = ArgClass::Stack { offset: stack_offset };
                stack_offset += 8;
                c
            };
            classes.push(class);
        }
        let stack_size = (stack_offset + 15) & !15;

        let site = self.func.call_sites.len();
        self.func.call_sites.push(CallSite { stack_args_size: stack_size, caller_saved: Vec::new() });
        self.emit(IrInst::Precall { site });
        if stack_size > 0 {
            self.emit(IrInst::Subsp { value: -(stack_size as i64) });
        }

        // Arguments are evaluated right-to-left.
        let mut reg_args: Vec<(VRegId, usize, bool)> = Vec::new();
        for (i, arg) in args.iter().enumerate().rev() {
            let Some(v) = self.gen_expr(arg) else { continue };
            match classes[i] {
                ArgClass::Reg { index, flonum } => reg_args.push((v, index, flonum)),
                ArgClass::Stack { offset } => {
                    if arg.ty.is_struct() {
                        let dst = self.func.vregs.add(8, VRegFlags::UNSIGNED);
                        self.emit(IrInst::Sofs { dst, offset: offset as i64 });
                        self.gen_memcopy(dst, v, arg.ty.size());
                    } else {
                        let dst = self.func.vregs.add(8, VRegFlags::UNSIGNED);
                        self.emit(IrInst::Sofs { dst, offset: offset as i64 });
                        self.emit(IrInst::Store { addr: dst, src: v });
                    }
                }
            }
        }
        let reg_arg_count = reg_args.len();
        for (src, index, flonum) in reg_args {
            self.emit(IrInst::Pusharg { src, index, flonum });
        }

        let target = match &func.kind {
            ExprKind::Var(vref) if func.ty.is_func() => CallTarget::Label(vref.name.clone()),
            _ => {
                let v = self.gen_expr(func)?;
                CallTarget::Reg(v)
            }
        };
        let dst = if expr.ty.is_void() { None } else { Some(self.new_vreg(&expr.ty)) };
        self.emit(IrInst::Call {
            dst,
            target,
            total_args: args.len(),
            reg_args: reg_arg_count,
            vaargs: functype.vaargs,
            site,
        });
        if stack_size > 0 {
            self.emit(IrInst::Subsp { value: stack_size as i64 });
        }
        dst
    }

    fn gen_inlined_call(
        &mut self,
        expr: &Expr,
        args: &[Expr],
        params: &[rvcc_ast::VarRef],
        body: &Stmt,
    ) -> Option<VRegId> {
        // Evaluate arguments right-to-left, then bind them to the renamed
        // parameters in order.
        let mut values: Vec<Option<VRegId>> = Vec::with_capacity(args.len());
        for arg in args.iter().rev() {
            values.push(self.gen_expr(arg));
        }
        values.reverse();

        for (param, value) in params.iter().zip(values) {
            let Some(src) = value else { continue };
            match self.vars.get(&(param.scope.0, param.name.clone())).cloned() {
                Some(VarSlot::Reg(dst)) => self.emit(IrInst::Mov { dst, src }),
                Some(VarSlot::Frame(slot)) => {
                    let addr = self.func.vregs.add(8, VRegFlags::UNSIGNED);
                    self.emit(IrInst::Bofs { dst: addr, slot });
                    self.emit(IrInst::Store { addr, src });
                }
                _ => {}
            }
        }

        let result = if expr.ty.is_void() { None } else { Some(self.new_vreg(&expr.ty)) };
        let exit = self.new_bb();
        self.inline_stack.push((result, exit));
        self.gen_stmt(body);
        self.inline_stack.pop();
        self.set_curbb(exit);
        result
    }
}
