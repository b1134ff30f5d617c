//! Liveness analysis and linear-scan register allocation.
//!
//! Virtual registers get live intervals from a worklist liveness pass,
//! then physical registers from two pools (integer and floating). Spilled
//! vregs receive a frame slot, and their uses are rewritten to go through
//! the target's reserved spill temporaries.

use hashbrown::HashMap;
use log::debug;

use crate::inst::{FrameSlot, FuncIr, IrInst};
use crate::vreg::{VRegFlags, VRegId};

/// Per-class allocation settings supplied by the target.
#[derive(Debug, Clone)]
pub struct RegClassSettings {
    /// Number of allocatable physical registers.
    pub phys_count: usize,
    /// The first `temp_count` of them are caller-saved temporaries; the
    /// rest are callee-saved.
    pub temp_count: usize,
    /// Class indices of the registers holding incoming arguments.
    pub arg_regs: Vec<usize>,
    /// Reserved scratch registers used to reload spilled operands.
    pub spill_regs: [usize; 2],
}

#[derive(Debug, Clone)]
pub struct RegAllocSettings {
    pub int: RegClassSettings,
    pub float: RegClassSettings,
}

#[derive(Debug, Clone)]
struct Interval {
    vreg: VRegId,
    start: usize,
    end: usize,
    flonum: bool,
    phys: Option<usize>,
}

/// Compute per-block `in`/`out` sets with a worklist until fixed point.
fn compute_liveness(func: &mut FuncIr) {
    let order = func.order.clone();
    // Per-block use/def.
    let mut uses: HashMap<u32, Vec<VRegId>> = HashMap::new();
    let mut defs: HashMap<u32, Vec<VRegId>> = HashMap::new();
    for id in &order {
        let bb = func.block(*id);
        let mut u = Vec::new();
        let mut d = Vec::new();
        for ir in &bb.irs {
            for src in ir.srcs() {
                if func.vregs.get(src).is_const() {
                    continue;
                }
                if !d.contains(&src) && !u.contains(&src) {
                    u.push(src);
                }
            }
            if let Some(dst) = ir.dst() {
                if !d.contains(&dst) {
                    d.push(dst);
                }
            }
        }
        uses.insert(id.0, u);
        defs.insert(id.0, d);
    }

    for id in &order {
        let bb = func.block_mut(*id);
        bb.in_regs.clear();
        bb.out_regs.clear();
    }

    let mut changed = true;
    while changed {
        changed = false;
        for id in order.iter().rev() {
            let succs = func.block(*id).succs.clone();
            let mut out = indexmap::IndexSet::new();
            for succ in succs {
                for v in func.block(succ).in_regs.iter() {
                    out.insert(*v);
                }
            }
            let mut inn = indexmap::IndexSet::new();
            for v in &uses[&id.0] {
                inn.insert(*v);
            }
            for v in out.iter() {
                if !defs[&id.0].contains(v) {
                    inn.insert(*v);
                }
            }
            let bb = func.block_mut(*id);
            if inn != bb.in_regs || out != bb.out_regs {
                bb.in_regs = inn;
                bb.out_regs = out;
                changed = true;
            }
        }
    }
}

fn build_intervals(func: &FuncIr) -> (Vec<Interval>, Vec<usize>) {
    let mut ranges: HashMap<VRegId, (usize, usize)> = HashMap::new();
    let mut call_positions = Vec::new();
    let mut extend = |ranges: &mut HashMap<VRegId, (usize, usize)>, v: VRegId, pos: usize| {
        let entry = ranges.entry(v).or_insert((pos, pos));
        entry.0 = entry.0.min(pos);
        entry.1 = entry.1.max(pos);
    };

    let mut pos = 0usize;
    for id in &func.order {
        let bb = func.block(*id);
        let bb_start = pos;
        let bb_end = pos + bb.irs.len();
        for v in bb.in_regs.iter() {
            extend(&mut ranges, *v, bb_start);
        }
        for ir in &bb.irs {
            for src in ir.srcs() {
                if !func.vregs.get(src).is_const() {
                    extend(&mut ranges, src, pos);
                }
            }
            if let Some(dst) = ir.dst() {
                extend(&mut ranges, dst, pos);
            }
            if matches!(ir, IrInst::Call { .. }) {
                call_positions.push(pos);
            }
            pos += 1;
        }
        for v in bb.out_regs.iter() {
            extend(&mut ranges, *v, bb_end);
        }
        pos = bb_end;
    }

    let mut intervals: Vec<Interval> = ranges
        .into_iter()
        .map(|(vreg, (start, end))| Interval {
            vreg,
            start,
            end,
            flonum: func.vregs.get(vreg).is_flonum(),
            phys: None,
        })
        .collect();
    intervals.sort_by_key(|iv| (iv.start, iv.end));
    (intervals, call_positions)
}

fn crosses_call(iv: &Interval, calls: &[usize]) -> bool {
    calls.iter().any(|c| iv.start < *c && *c < iv.end)
}

/// Assign physical registers, spill slots and caller-save lists.
/// `extra_occupied` are per-class masks of registers the target reserves
/// for this function (e.g. the frame pointer).
pub fn alloc_registers(
    func: &mut FuncIr,
    settings: &RegAllocSettings,
    extra_occupied: (u64, u64),
) {
    func.compute_succs();
    compute_liveness(func);
    let (mut intervals, calls) = build_intervals(func);
    debug!(
        "allocating {} intervals in `{}` ({} call sites)",
        intervals.len(),
        func.name,
        calls.len()
    );

    // Preferred registers: incoming parameters want their own arg register.
    let mut prefs: HashMap<VRegId, usize> = HashMap::new();
    for param in &func.params {
        if let crate::inst::ParamStorage::Reg(vreg) = param.storage {
            let class = if param.flonum { &settings.float } else { &settings.int };
            if let Some(phys) = class.arg_regs.get(param.reg_index) {
                prefs.insert(vreg, *phys);
            }
        }
    }

    let mut active: Vec<Interval> = Vec::new();
    let mut spilled: Vec<VRegId> = Vec::new();

    for i in 0..intervals.len() {
        let (start, end, flonum, vreg) = {
            let iv = &intervals[i];
            (iv.start, iv.end, iv.flonum, iv.vreg)
        };
        active.retain(|a| a.end > start);

        let class = if flonum { &settings.float } else { &settings.int };
        let mask = if flonum { extra_occupied.1 } else { extra_occupied.0 };
        let mut occupied = vec![false; class.phys_count];
        for (bit, slot) in occupied.iter_mut().enumerate() {
            if mask & (1u64 << bit) != 0 {
                *slot = true;
            }
        }
        for a in &active {
            if a.flonum == flonum {
                if let Some(p) = a.phys {
                    occupied[p] = true;
                }
            }
        }

        // Candidate order: preferred register, then the pool matching the
        // interval's call-crossing behavior, then the other pool.
        let temporaries = 0..class.temp_count;
        let callee_saved = class.temp_count..class.phys_count;
        let ordered: Vec<usize> = if crosses_call(&intervals[i], &calls) {
            callee_saved.chain(temporaries).collect()
        } else {
            temporaries.chain(callee_saved).collect()
        };
        let chosen = prefs
            .get(&vreg)
            .copied()
            .filter(|p| *p < occupied.len() && !occupied[*p])
            .or_else(|| ordered.into_iter().find(|p| !occupied[*p]));

        match chosen {
            Some(phys) => {
                intervals[i].phys = Some(phys);
                func.vregs.get_mut(vreg).phys = Some(phys as u8);
                active.push(intervals[i].clone());
            }
            None => {
                // Spill the same-class interval with the furthest end.
                let furthest = active
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| a.flonum == flonum)
                    .max_by_key(|(_, a)| a.end)
                    .map(|(idx, _)| idx);
                match furthest {
                    Some(idx) if active[idx].end > end => {
                        let victim = active.remove(idx);
                        spilled.push(victim.vreg);
                        let phys = victim.phys.expect("active interval has a register");
                        func.vregs.get_mut(victim.vreg).phys = None;
                        intervals[i].phys = Some(phys);
                        func.vregs.get_mut(vreg).phys = Some(phys as u8);
                        active.push(intervals[i].clone());
                    }
                    _ => {
                        spilled.push(vreg);
                    }
                }
            }
        }
    }

    // Spill slots.
    for v in &spilled {
        let slot = func.slots.len();
        func.slots.push(FrameSlot { size: 8, align: 8, offset: 0, incoming_offset: None });
        let vr = func.vregs.get_mut(*v);
        vr.flags |= VRegFlags::SPILLED;
        vr.spill_slot = Some(slot);
    }

    record_caller_saves(func, &intervals, &calls, settings);
    rewrite_spills(func, settings);
}

/// For each call site, remember which caller-saved registers hold values
/// that live across it.
fn record_caller_saves(
    func: &mut FuncIr,
    intervals: &[Interval],
    calls: &[usize],
    settings: &RegAllocSettings,
) {
    // Map call position -> site index, in order of appearance.
    let mut pos = 0usize;
    let mut call_sites_at: HashMap<usize, usize> = HashMap::new();
    for id in &func.order {
        for ir in &func.block(*id).irs {
            if let IrInst::Call { site, .. } = ir {
                call_sites_at.insert(pos, *site);
            }
            pos += 1;
        }
    }

    for cpos in calls {
        let Some(site) = call_sites_at.get(cpos) else { continue };
        for iv in intervals {
            let Some(phys) = iv.phys else { continue };
            let class = if iv.flonum { &settings.float } else { &settings.int };
            if phys >= class.temp_count {
                continue;
            }
            if iv.start < *cpos && *cpos < iv.end {
                let entry = &mut func.call_sites[*site];
                if !entry.caller_saved.contains(&(phys as u8, iv.flonum)) {
                    entry.caller_saved.push((phys as u8, iv.flonum));
                }
            }
        }
    }
    for site in &mut func.call_sites {
        site.caller_saved.sort();
    }
}

/// Route spilled operands through the reserved scratch registers: each use
/// reloads with `load_s`, each def writes back with `store_s`.
fn rewrite_spills(func: &mut FuncIr, settings: &RegAllocSettings) {
    let spill_info: Vec<(VRegId, usize)> = func
        .vregs
        .iter()
        .filter(|(_, v)| v.is_spilled())
        .map(|(id, v)| (id, v.spill_slot.expect("spilled vreg has a slot")))
        .collect();
    if spill_info.is_empty() {
        return;
    }
    let slot_of: HashMap<VRegId, usize> = spill_info.into_iter().collect();

    for bi in 0..func.bbs.len() {
        let irs = std::mem::take(&mut func.bbs[bi].irs);
        let mut out = Vec::with_capacity(irs.len());
        for mut ir in irs {
            let mut scratch_used = 0usize;
            for src in ir.srcs() {
                let Some(slot) = slot_of.get(&src) else { continue };
                let (size, flags, flonum) = {
                    let v = func.vregs.get(src);
                    (v.size, v.flags, v.is_flonum())
                };
                let class = if flonum { &settings.float } else { &settings.int };
                let phys = class.spill_regs[scratch_used.min(1)];
                scratch_used += 1;
                let tmp = func.vregs.add(size, flags & !VRegFlags::SPILLED);
                func.vregs.get_mut(tmp).phys = Some(phys as u8);
                out.push(IrInst::LoadS { dst: tmp, slot: *slot });
                ir.replace_src(src, tmp);
            }
            let dst_spill = ir.dst().and_then(|d| slot_of.get(&d).map(|s| (d, *s)));
            match dst_spill {
                Some((dst, slot)) => {
                    let (size, flags, flonum) = {
                        let v = func.vregs.get(dst);
                        (v.size, v.flags, v.is_flonum())
                    };
                    let class = if flonum { &settings.float } else { &settings.int };
                    let tmp = func.vregs.add(size, flags & !VRegFlags::SPILLED);
                    func.vregs.get_mut(tmp).phys = Some(class.spill_regs[0] as u8);
                    ir.replace_dst(tmp);
                    out.push(ir);
                    out.push(IrInst::StoreS { slot, src: tmp });
                }
                None => out.push(ir),
            }
        }
        func.bbs[bi].irs = out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{BBId, BasicBlock, CcKind, CondCode, IrBinOp};
    use crate::vreg::VRegPool;

    fn settings() -> RegAllocSettings {
        let class = RegClassSettings {
            phys_count: 4,
            temp_count: 2,
            arg_regs: vec![0, 1],
            spill_regs: [4, 5],
        };
        RegAllocSettings { int: class.clone(), float: class }
    }

    fn one_block_func(irs: Vec<IrInst>, vregs: VRegPool) -> FuncIr {
        let mut bb = BasicBlock::new(".L0".into());
        bb.irs = irs;
        FuncIr {
            name: "t".into(),
            is_static: false,
            bbs: vec![bb, BasicBlock::new(".Lexit".into())],
            order: vec![BBId(0), BBId(1)],
            vregs,
            slots: Vec::new(),
            params: Vec::new(),
            call_sites: Vec::new(),
            float_consts: Vec::new(),
            ret_flonum: Some(false),
            exit_bb: BBId(1),
            frame_size: 0,
        }
    }

    #[test]
    fn disjoint_intervals_share_a_register() {
        let mut pool = VRegPool::new();
        let a = pool.add(8, VRegFlags::empty());
        let b = pool.add(8, VRegFlags::empty());
        let c = pool.add(8, VRegFlags::empty());
        let d = pool.add(8, VRegFlags::empty());
        // a and c die immediately; b and d can reuse.
        let irs = vec![
            IrInst::Bin { op: IrBinOp::Add, dst: b, lhs: a, rhs: a },
            IrInst::Bin { op: IrBinOp::Add, dst: d, lhs: c, rhs: c },
            IrInst::Result { src: d },
        ];
        let mut func = one_block_func(irs, pool);
        alloc_registers(&mut func, &settings(), (0, 0));
        assert!(func.vregs.get(b).phys.is_some());
        assert!(func.vregs.get(d).phys.is_some());
        // Nothing spilled with four registers available.
        assert!(func.vregs.iter().all(|(_, v)| !v.is_spilled()));
    }

    #[test]
    fn pressure_forces_a_spill() {
        let mut pool = VRegPool::new();
        // Five simultaneously-live values, four registers.
        let vals: Vec<_> = (0..5).map(|_| pool.add(8, VRegFlags::empty())).collect();
        let sum = pool.add(8, VRegFlags::empty());
        let mut irs = Vec::new();
        for chunk in vals.chunks(1) {
            let v = chunk[0];
            irs.push(IrInst::Bin { op: IrBinOp::Add, dst: v, lhs: v, rhs: v });
        }
        // Keep all five alive to the end.
        for v in &vals {
            irs.push(IrInst::Bin { op: IrBinOp::Add, dst: sum, lhs: sum, rhs: *v });
        }
        irs.push(IrInst::Result { src: sum });
        let mut func = one_block_func(irs, pool);
        alloc_registers(&mut func, &settings(), (0, 0));
        let spilled = func.vregs.iter().filter(|(_, v)| v.is_spilled()).count();
        assert!(spilled >= 1, "five live values cannot fit four registers");
        // Spilled uses were rewritten through load_s.
        let has_loads = func
            .bbs
            .iter()
            .any(|bb| bb.irs.iter().any(|ir| matches!(ir, IrInst::LoadS { .. })));
        assert!(has_loads);
    }

    #[test]
    fn liveness_flows_through_branches() {
        let mut pool = VRegPool::new();
        let a = pool.add(8, VRegFlags::empty());
        let zero = pool.add_const(0, 8, false);
        let mut bb0 = BasicBlock::new(".L0".into());
        bb0.irs = vec![
            IrInst::Bin { op: IrBinOp::Add, dst: a, lhs: a, rhs: a },
            IrInst::Jmp {
                cc: CondCode::new(CcKind::Eq, false, false),
                lhs: Some(a),
                rhs: Some(zero),
                bb: BBId(2),
            },
        ];
        let bb1 = BasicBlock::new(".L1".into());
        let mut bb2 = BasicBlock::new(".L2".into());
        bb2.irs = vec![IrInst::Result { src: a }];
        let mut func = FuncIr {
            name: "t".into(),
            is_static: false,
            bbs: vec![bb0, bb1, bb2],
            order: vec![BBId(0), BBId(1), BBId(2)],
            vregs: pool,
            slots: Vec::new(),
            params: Vec::new(),
            call_sites: Vec::new(),
            float_consts: Vec::new(),
            ret_flonum: Some(false),
            exit_bb: BBId(2),
            frame_size: 0,
        };
        func.compute_succs();
        compute_liveness(&mut func);
        // `a` is live into the middle block even though it never uses it.
        assert!(func.block(BBId(1)).in_regs.contains(&a));
        assert!(func.block(BBId(0)).out_regs.contains(&a));
    }
}
