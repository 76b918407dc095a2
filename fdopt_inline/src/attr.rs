//! Per-function attribute cache: sizes, call counts, inlinability, and
//! lazily-computed per-argument impact estimates.
//!
//! Size accounting mirrors what a backend would actually emit: phi nodes,
//! free casts, all-constant-index GEPs, and value copies cost nothing.
//! Argument impact asks "how many instructions disappear if this formal is
//! a constant (or a caller alloca)?" by chasing constant propagation and
//! pointer aliases through the callee body.

use rustc_hash::{FxHashMap, FxHashSet};

use fdopt_ir::{Block, CallTarget, FuncId, Inst, Module, Terminator, Value};

/// Instruction-savings weights applied to argument impact counts when
/// scoring a call site.
pub mod inline_weights {
    /// Saved call/return overhead.
    pub const CALL_RETURN: u32 = 3;
    /// Per instruction removed by constant propagation.
    pub const INSTR: u32 = 1;
    /// Per branch resolved by a constant argument.
    pub const BRANCH: u32 = 2;
    /// Per indirect call resolved to a direct call.
    pub const ICALL: u32 = 8;
    /// Per load/store removed when a pointer argument is a caller alloca.
    pub const ALLOCA: u32 = 1;
    /// Size discount for straight-line callees.
    pub const ONE_BLOCK: u32 = 2;
}

// =============================================================================
// Attribute records
// =============================================================================

/// Instructions removable if one formal argument is constant or an alloca.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArgImpact {
    pub instr_rem_if_const: u32,
    pub branch_rem_if_const: u32,
    pub icall_rem_if_const: u32,
    pub instr_rem_if_alloca: u32,
}

impl ArgImpact {
    pub fn accumulate_const(&mut self, other: &ArgImpact) {
        self.instr_rem_if_const += other.instr_rem_if_const;
        self.branch_rem_if_const += other.branch_rem_if_const;
        self.icall_rem_if_const += other.icall_rem_if_const;
    }
}

/// Cached facts about one function.
#[derive(Debug, Clone, Default)]
pub struct FunctionAttr {
    pub size: u32,
    /// Size when first observed, before any inlining.
    pub start_size: u32,
    /// Multi-successor terminators.
    pub branches: u32,
    pub extern_calls: u32,
    pub direct_calls: u32,
    pub indirect_calls: u32,
    /// Bodies inlined into this function so far.
    pub inline_count: u32,
    pub cannot_inline: bool,
    pub address_taken: bool,
    pub args: u32,
    arg_impact: Vec<Option<ArgImpact>>,
}

// =============================================================================
// Size accounting
// =============================================================================

/// Count a block's instructions the way codegen would, optionally
/// classifying calls and inlinability into `attr`. Call counts go stale if
/// `cannot_inline` trips mid-block, which is fine: the function is out of
/// the game at that point.
pub fn calc_block_size(
    module: &Module,
    owner: FuncId,
    block: &Block,
    mut attr: Option<&mut FunctionAttr>,
) -> u32 {
    let mut size = 0u32;

    for inst in &block.insts {
        match inst {
            Inst::Phi { .. } | Inst::Copy { .. } => continue,
            Inst::Cast { kind, .. } if kind.is_free() => continue,
            Inst::Gep { const_indices: true, .. } => continue,
            _ => {}
        }
        size += 1;

        let attr = match attr.as_deref_mut() {
            Some(a) if !a.cannot_inline => a,
            _ => continue,
        };
        let call = match inst.as_call() {
            Some(c) => c,
            None => continue,
        };

        match call.target.callee() {
            None => attr.indirect_calls += 1,
            Some(callee) => {
                let f = module.func(callee);
                // setjmp-style callees poison the whole function
                if f.is_declaration && (f.name == "setjmp" || f.name == "_setjmp") {
                    attr.cannot_inline = true;
                    continue;
                }
                if callee == owner {
                    attr.cannot_inline = true;
                    continue;
                }
                if f.is_declaration {
                    attr.extern_calls += 1;
                } else {
                    attr.direct_calls += 1;
                }
            }
        }
    }

    if let Some(attr) = attr {
        attr.size += size;
        if block.term.successors().len() > 1 {
            attr.branches += 1;
        }
    }
    size
}

// =============================================================================
// Cache
// =============================================================================

/// Instance-owned attribute cache; one per driver run.
#[derive(Default)]
pub struct AttrCache {
    map: FxHashMap<FuncId, FunctionAttr>,
}

impl AttrCache {
    pub fn new() -> Self {
        AttrCache::default()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn get(&self, f: FuncId) -> Option<&FunctionAttr> {
        self.map.get(&f)
    }

    pub fn attr_mut(&mut self, f: FuncId) -> Option<&mut FunctionAttr> {
        self.map.get_mut(&f)
    }

    pub fn get_or_create(&mut self, module: &Module, f: FuncId) -> &FunctionAttr {
        if !self.map.contains_key(&f) {
            self.recalc(module, f);
        }
        self.map.entry(f).or_default()
    }

    /// Recompute a function's attributes; returns the size change against
    /// the cached value. Inlining into a function invalidates its argument
    /// impacts, so they reset here.
    pub fn recalc(&mut self, module: &Module, f: FuncId) -> i64 {
        let func = module.func(f);
        if func.is_declaration {
            return 0;
        }

        let is_new = !self.map.contains_key(&f);
        let attr = self.map.entry(f).or_default();
        attr.address_taken = func.address_taken;
        attr.args = func.params.len() as u32;
        attr.arg_impact = vec![None; func.params.len()];

        let mut fresh = FunctionAttr::default();
        for block in &func.blocks {
            if matches!(block.term, Terminator::IndirectBr { .. }) {
                fresh.cannot_inline = true;
            }
            calc_block_size(module, f, block, Some(&mut fresh));
        }

        let attr = self.map.get_mut(&f).unwrap();
        let growth = i64::from(fresh.size) - i64::from(attr.size);
        attr.size = fresh.size;
        if is_new {
            attr.start_size = fresh.size;
        }
        attr.branches = fresh.branches;
        attr.extern_calls = fresh.extern_calls;
        attr.direct_calls = fresh.direct_calls;
        attr.indirect_calls = fresh.indirect_calls;
        attr.cannot_inline = fresh.cannot_inline;
        growth
    }

    /// The impact of formal `arg` of `f` being constant or alloca-typed,
    /// computed on first request and cached until the next `recalc`.
    pub fn arg_impact(&mut self, module: &Module, f: FuncId, arg: usize) -> ArgImpact {
        self.get_or_create(module, f);
        let attr = self.map.get(&f).unwrap();
        if arg >= attr.arg_impact.len() {
            tracing::warn!(
                function = %module.func(f).name,
                arg,
                args = attr.arg_impact.len(),
                "argument impact request out of range"
            );
            return ArgImpact::default();
        }
        if let Some(cached) = attr.arg_impact[arg] {
            return cached;
        }

        let mut impact = ArgImpact::default();
        calc_constant_impact(module, f, arg, &mut impact);
        calc_alloca_impact(module, f, arg, &mut impact);
        self.map.get_mut(&f).unwrap().arg_impact[arg] = Some(impact);
        impact
    }
}

// =============================================================================
// Impact analysis
// =============================================================================

/// Estimate the code removed if formal `arg` is a compile-time constant:
/// instructions that fold away (transitively), branches that resolve, and
/// indirect calls that become direct.
fn calc_constant_impact(module: &Module, f: FuncId, arg: usize, impact: &mut ArgImpact) {
    let func = module.func(f);
    let seed = Value::Param(arg as u32);

    // transitive closure of values that become constants
    let mut known: FxHashSet<Value> = FxHashSet::default();
    known.insert(seed);
    let mut changed = true;
    while changed {
        changed = false;
        for block in &func.blocks {
            for inst in &block.insts {
                let dest = match inst.dest() {
                    Some(d) if !known.contains(&Value::Local(d)) => d,
                    _ => continue,
                };
                if inst.touches_memory() {
                    continue;
                }
                let ops = inst.operands();
                if ops.is_empty() {
                    continue;
                }
                if ops.iter().all(|v| v.is_const() || known.contains(v)) {
                    known.insert(Value::Local(dest));
                    impact.instr_rem_if_const += 1;
                    changed = true;
                }
            }
        }
    }

    for block in &func.blocks {
        // a branch on a now-constant value keeps one successor; estimate
        // the others' instructions as removed
        if let Some(cond) = block.term.branch_operand() {
            if known.contains(&cond) {
                impact.branch_rem_if_const += 1;
                let succ = block.term.successors();
                let n = succ.len() as u32;
                if n > 1 {
                    let total: u32 = succ
                        .iter()
                        .map(|&s| calc_block_size(module, f, func.block(s), None))
                        .sum();
                    impact.instr_rem_if_const += total * (n - 1) / n;
                }
            }
        }
        // indirect calls through the argument resolve to direct calls
        for inst in &block.insts {
            if let Inst::Call(c) = inst {
                if let CallTarget::Indirect(v) = c.target {
                    if known.contains(&v) {
                        impact.icall_rem_if_const += 1;
                    }
                }
            }
        }
    }
}

/// Estimate the loads/stores removed if pointer formal `arg` is a caller
/// alloca that can merge away. Aliases propagate through constant-index
/// GEPs and bitcasts.
fn calc_alloca_impact(module: &Module, f: FuncId, arg: usize, impact: &mut ArgImpact) {
    let func = module.func(f);
    let param = match func.params.get(arg) {
        Some(p) if p.pointer => Value::Param(arg as u32),
        _ => return,
    };

    let mut aliases: FxHashSet<Value> = FxHashSet::default();
    aliases.insert(param);
    let mut changed = true;
    while changed {
        changed = false;
        for block in &func.blocks {
            for inst in &block.insts {
                let derived = match inst {
                    Inst::Gep {
                        dest,
                        base,
                        const_indices: true,
                    } if aliases.contains(base) => Some(*dest),
                    Inst::Cast { dest, value, kind } if kind.is_free() && aliases.contains(value) => {
                        Some(*dest)
                    }
                    _ => None,
                };
                if let Some(d) = derived {
                    if aliases.insert(Value::Local(d)) {
                        changed = true;
                    }
                }
            }
        }
    }

    for block in &func.blocks {
        for inst in &block.insts {
            match inst {
                Inst::Load { addr, .. } if aliases.contains(addr) => {
                    impact.instr_rem_if_alloca += 1;
                }
                Inst::Store { addr, .. } if aliases.contains(addr) => {
                    impact.instr_rem_if_alloca += 1;
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdopt_ir::{BinOp, CastKind, ModuleBuilder};

    #[test]
    fn test_size_skips_free_instructions() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", 1);
        {
            let mut fb = mb.define_declared(f);
            let e = fb.entry_block();
            let x = fb.binary(e, BinOp::Add, Value::Param(0), Value::Const(1)); // counts
            fb.cast(e, CastKind::Bitcast, Value::Local(x)); // free
            fb.gep(e, Value::Param(0), true); // free
            fb.gep(e, Value::Param(0), false); // counts
            fb.phi(e, vec![]); // free
            fb.ret(e, None);
            fb.finish();
        }
        let m = mb.finish();

        let mut cache = AttrCache::new();
        cache.recalc(&m, f);
        let attr = cache.get(f).unwrap();
        assert_eq!(attr.size, 2);
        assert_eq!(attr.branches, 0);
        assert!(!attr.cannot_inline);
    }

    #[test]
    fn test_call_classification() {
        let mut mb = ModuleBuilder::new();
        let ext = mb.declare_external("ext", 0);
        let leaf = mb.declare("leaf", 0);
        {
            let mut fb = mb.define_declared(leaf);
            let e = fb.entry_block();
            fb.ret(e, None);
            fb.finish();
        }
        let f = mb.declare("f", 1);
        {
            let mut fb = mb.define_declared(f);
            let e = fb.entry_block();
            fb.call(e, fdopt_ir::CallTarget::Direct(leaf), vec![], true);
            fb.call(e, fdopt_ir::CallTarget::Direct(ext), vec![], true);
            fb.call(e, fdopt_ir::CallTarget::Indirect(Value::Param(0)), vec![], true);
            fb.ret(e, None);
            fb.finish();
        }
        let m = mb.finish();

        let mut cache = AttrCache::new();
        cache.recalc(&m, f);
        let attr = cache.get(f).unwrap();
        assert_eq!(attr.direct_calls, 1);
        assert_eq!(attr.extern_calls, 1);
        assert_eq!(attr.indirect_calls, 1);
    }

    #[test]
    fn test_recursion_marks_cannot_inline() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", 0);
        {
            let mut fb = mb.define_declared(f);
            let e = fb.entry_block();
            fb.call(e, fdopt_ir::CallTarget::Direct(f), vec![], true);
            fb.ret(e, None);
            fb.finish();
        }
        let m = mb.finish();

        let mut cache = AttrCache::new();
        cache.recalc(&m, f);
        assert!(cache.get(f).unwrap().cannot_inline);
    }

    #[test]
    fn test_recalc_reports_growth() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", 0);
        {
            let mut fb = mb.define_declared(f);
            let e = fb.entry_block();
            fb.binary(e, BinOp::Add, Value::Const(1), Value::Const(2));
            fb.ret(e, None);
            fb.finish();
        }
        let mut m = mb.finish();

        let mut cache = AttrCache::new();
        let initial = cache.recalc(&m, f);
        assert_eq!(initial, 1);
        assert_eq!(cache.get(f).unwrap().start_size, 1);

        // grow the function and recalc
        let func = m.func_mut(f);
        func.blocks[0].insts.push(Inst::Binary {
            dest: 9,
            op: BinOp::Mul,
            lhs: Value::Const(2),
            rhs: Value::Const(3),
        });
        let growth = cache.recalc(&m, f);
        assert_eq!(growth, 1);
        assert_eq!(cache.get(f).unwrap().size, 2);
        assert_eq!(cache.get(f).unwrap().start_size, 1);
    }

    #[test]
    fn test_constant_impact_chases_uses() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", 1);
        {
            let mut fb = mb.define_declared(f);
            let e = fb.entry_block();
            let t = fb.block("t");
            let z = fb.block("z");
            // a = p0 + 1; b = a * 2  -- both fold if p0 is constant
            let a = fb.binary(e, BinOp::Add, Value::Param(0), Value::Const(1));
            let b = fb.binary(e, BinOp::Mul, Value::Local(a), Value::Const(2));
            fb.cond_br(e, Value::Local(b), t, z);
            // three instructions split across the successors
            fb.binary(t, BinOp::Add, Value::Const(1), Value::Const(2));
            fb.binary(t, BinOp::Add, Value::Const(3), Value::Const(4));
            fb.ret(t, None);
            fb.binary(z, BinOp::Add, Value::Const(5), Value::Const(6));
            fb.ret(z, None);
            fb.finish();
        }
        let m = mb.finish();

        let mut cache = AttrCache::new();
        let impact = cache.arg_impact(&m, f, 0);
        assert_eq!(impact.branch_rem_if_const, 1);
        // a, b fold; the branch estimate removes (2+1)*(2-1)/2 = 1 more
        assert_eq!(impact.instr_rem_if_const, 3);
        // second request hits the cache
        assert_eq!(cache.arg_impact(&m, f, 0), impact);
    }

    #[test]
    fn test_alloca_impact_counts_memory_ops() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", 1);
        mb.set_param_pointer(f, 0);
        {
            let mut fb = mb.define_declared(f);
            let e = fb.entry_block();
            let p = Value::Param(0);
            fb.load(e, p);
            fb.store(e, p, Value::Const(0));
            let g = fb.gep(e, p, true);
            fb.load(e, Value::Local(g));
            // variable-index GEPs don't propagate the alias
            let vg = fb.gep(e, p, false);
            fb.load(e, Value::Local(vg));
            fb.ret(e, None);
            fb.finish();
        }
        let m = mb.finish();

        let mut cache = AttrCache::new();
        let impact = cache.arg_impact(&m, f, 0);
        assert_eq!(impact.instr_rem_if_alloca, 3);
    }

    #[test]
    fn test_icall_resolution_impact() {
        let mut mb = ModuleBuilder::new();
        let f = mb.declare("f", 1);
        {
            let mut fb = mb.define_declared(f);
            let e = fb.entry_block();
            fb.call(e, fdopt_ir::CallTarget::Indirect(Value::Param(0)), vec![], true);
            fb.ret(e, None);
            fb.finish();
        }
        let m = mb.finish();

        let mut cache = AttrCache::new();
        let impact = cache.arg_impact(&m, f, 0);
        assert_eq!(impact.icall_rem_if_const, 1);
    }
}
