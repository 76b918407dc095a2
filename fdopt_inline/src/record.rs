//! Call-site candidate records.
//!
//! A [`CallRecord`] owns everything the driver needs to rank one call site:
//! the site identity, a histogram predicting per-invocation frequency
//! relative to the caller's entry, the evaluated metric value, and the
//! inlining history accumulated along synthesized call chains. Records
//! order ascending by `mval`; the driver always consumes the largest.

use rustc_hash::FxHashSet;

use fdopt_ir::{BlockRef, CallSiteId, FuncId, Module, Value};
use fdopt_profile::Histogram;

use crate::attr::{inline_weights, ArgImpact, AttrCache};
use crate::metric::{MetricConfig, MetricFn};

/// Sequential record-id allocator; one per driver run.
#[derive(Debug, Default)]
pub struct RecordIds {
    next: u32,
}

impl RecordIds {
    pub fn new() -> Self {
        RecordIds::default()
    }

    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

// =============================================================================
// CallRecord
// =============================================================================

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub site: CallSiteId,
    pub caller: FuncId,
    pub callee: FuncId,
    pub block: BlockRef,
    /// Predicted per-invocation frequency of the call-bearing block.
    pub hist: Histogram,
    /// Metric value; `-1` means "do not inline". Higher is better.
    pub mval: f64,
    pub ignored: bool,
    /// Callees already inlined along this record's synthetic call chain.
    pub history: FxHashSet<FuncId>,
    /// Display names parallel to the history, in inlining order.
    pub history_names: Vec<String>,
    /// Monotonically increasing identity.
    pub id: u32,
    /// Random summary id; inlined copies fold their ancestry by xor.
    pub z_id: u32,

    total_impact: ArgImpact,
    cached_inline_size: i64,
}

impl CallRecord {
    pub fn new(
        ids: &mut RecordIds,
        site: CallSiteId,
        caller: FuncId,
        callee: FuncId,
        block: BlockRef,
        hist: Option<&Histogram>,
    ) -> CallRecord {
        CallRecord {
            site,
            caller,
            callee,
            block,
            hist: hist.cloned().unwrap_or_default(),
            mval: -1.0,
            ignored: false,
            history: FxHashSet::default(),
            history_names: Vec::new(),
            id: ids.next_id(),
            z_id: rand::random::<u32>(),
            total_impact: ArgImpact::default(),
            cached_inline_size: 0,
        }
    }

    /// Record for a call site synthesized by inlining: the new histogram is
    /// the cross of the inlined call's histogram with the originating
    /// site's, the history is their union plus the just-inlined callee, and
    /// the summary id folds both ancestries.
    #[allow(clippy::too_many_arguments)]
    pub fn from_inlined(
        ids: &mut RecordIds,
        call_rec: &CallRecord,
        origin_rec: &CallRecord,
        inlined_func: FuncId,
        inlined_name: &str,
        site: CallSiteId,
        caller: FuncId,
        callee: FuncId,
        block: BlockRef,
    ) -> CallRecord {
        let mut history = call_rec.history.clone();
        history.extend(origin_rec.history.iter().copied());
        history.insert(inlined_func);

        let mut history_names = call_rec.history_names.clone();
        history_names.extend(origin_rec.history_names.iter().cloned());
        history_names.push(inlined_name.to_string());

        CallRecord {
            site,
            caller,
            callee,
            block,
            hist: call_rec.hist.cross(&origin_rec.hist),
            mval: -1.0,
            ignored: false,
            history,
            history_names,
            id: ids.next_id(),
            z_id: call_rec.z_id ^ origin_rec.z_id,
            total_impact: ArgImpact::default(),
            cached_inline_size: 0,
        }
    }

    /// Whether the callee can never be inlined (cached verdict, or a
    /// no-return callee discovered now and cached).
    pub fn never_inline(&self, module: &Module, attrs: &mut AttrCache) -> bool {
        let attr = attrs.get_or_create(module, self.callee);
        if attr.cannot_inline {
            return true;
        }
        if module.func(self.callee).no_return {
            if let Some(a) = attrs.attr_mut(self.callee) {
                a.cannot_inline = true;
            }
            return true;
        }
        false
    }

    /// Estimated size of the inlined body after argument-triggered
    /// removals, with a discount for straight-line callees. Valid after
    /// [`Self::eval_metric`].
    pub fn inline_size(&self, module: &Module, attrs: &mut AttrCache) -> i64 {
        let attr = attrs.get_or_create(module, self.callee);
        let mut less =
            self.total_impact.instr_rem_if_const + self.total_impact.instr_rem_if_alloca;
        if attr.branches == 0 {
            less += inline_weights::ONE_BLOCK;
        }
        i64::from(attr.size) - i64::from(less)
    }

    pub fn inline_size_cached(&self) -> i64 {
        self.cached_inline_size
    }

    /// Per-invocation benefit of inlining this site, independent of
    /// frequency: call overhead, argument-triggered removals, and a small
    /// bonus per callee indirect call (later inlining may resolve them).
    fn inline_benefit(&self, module: &Module, attrs: &mut AttrCache, argc: usize) -> f64 {
        let mut benefit = inline_weights::CALL_RETURN;
        benefit += self.total_impact.instr_rem_if_const * inline_weights::INSTR;
        benefit += self.total_impact.branch_rem_if_const * inline_weights::BRANCH;
        benefit += self.total_impact.icall_rem_if_const * inline_weights::ICALL;
        benefit += self.total_impact.instr_rem_if_alloca * inline_weights::ALLOCA;
        benefit += argc as u32;
        benefit += attrs.get_or_create(module, self.callee).indirect_calls;
        f64::from(benefit)
    }

    /// Re-evaluate this record's metric value. Aggregates the impact of the
    /// actual arguments (constants and caller allocas), scores the selected
    /// metric, and normalizes by cost: `M / cost` for positive cost,
    /// `M · (−cost)` for negative, and `-1` whenever a nonnegative cost
    /// meets a nonpositive benefit.
    pub fn eval_metric(
        &mut self,
        module: &Module,
        attrs: &mut AttrCache,
        metric: MetricFn,
        cfg: &MetricConfig,
    ) -> f64 {
        let call = match module.find_call(self.site).and_then(|loc| {
            module.call_at(loc).cloned()
        }) {
            Some(c) => c,
            None => {
                tracing::warn!(site = %self.site, "record's call site vanished");
                self.mval = -1.0;
                return self.mval;
            }
        };

        let callee_args = module.func(self.callee).params.len();
        if call.args.len() != callee_args {
            tracing::warn!(
                call = call.args.len(),
                callee = callee_args,
                "argument count mismatch"
            );
        }

        // aggregate actual-argument impacts; multiple constant arguments
        // interact unpredictably, so counts simply add
        self.total_impact = ArgImpact::default();
        let caller_allocas: FxHashSet<u32> =
            module.func(self.caller).alloca_locals().into_iter().collect();
        for (arg_num, arg) in call.args.iter().enumerate() {
            if arg_num >= callee_args {
                break;
            }
            let is_alloca = matches!(arg, Value::Local(l) if caller_allocas.contains(l));
            if !arg.is_const() && !is_alloca {
                continue;
            }
            let impact = attrs.arg_impact(module, self.callee, arg_num);
            if arg.is_const() {
                self.total_impact.accumulate_const(&impact);
            }
            if is_alloca {
                self.total_impact.instr_rem_if_alloca += impact.instr_rem_if_alloca;
            }
        }

        let benefit = self.inline_benefit(module, attrs, call.args.len());
        let cost = self.inline_size(module, attrs);
        self.cached_inline_size = cost;

        if cost >= 0 && benefit <= 0.0 {
            self.mval = -1.0;
        } else {
            let m = metric(self, benefit, cfg);
            self.mval = if cost > 0 {
                m / cost as f64
            } else if cost < 0 {
                m * (-cost) as f64
            } else {
                m
            };
        }
        tracing::trace!(id = self.id, benefit, cost, mval = self.mval, "metric evaluated");
        self.mval
    }

    /// `N[a,b,c]` rendering of the inlining history.
    pub fn history_string(&self, sep: &str) -> String {
        format!("{}[{}]", self.history_names.len(), self.history_names.join(sep))
    }

    /// One-line rendering for the evaluation and debug logs.
    pub fn describe(&self, module: &Module) -> String {
        let caller = &module.func(self.caller).name;
        let callee = &module.func(self.callee).name;
        let block = &module.block(self.block).name;
        format!(
            "{} {{{:X}}}: [{:.4} {:.0}%] {}{}[{}] --> {} {}",
            self.id,
            self.z_id,
            self.mval,
            100.0 * self.hist.coverage(),
            if self.ignored { "(i) " } else { "" },
            caller,
            block,
            callee,
            self.history_string(","),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::select_metric;
    use fdopt_ir::{BinOp, CallTarget, ModuleBuilder};

    fn point_hist(v: f64) -> Histogram {
        let mut h = Histogram::new();
        h.add_to_list(v, 1.0);
        h.build_from_list(4, 1.0, None);
        h
    }

    /// main calls a straight-line callee of ten countable instructions.
    fn fixture() -> (Module, CallSiteId, FuncId, FuncId) {
        let mut mb = ModuleBuilder::new();
        let foo = mb.declare("foo", 0);
        {
            let mut fb = mb.define_declared(foo);
            let e = fb.entry_block();
            for _ in 0..10 {
                fb.binary(e, BinOp::Add, Value::Const(1), Value::Const(2));
            }
            fb.ret(e, None);
            fb.finish();
        }
        let main = mb.declare("main", 0);
        let site;
        {
            let mut fb = mb.define_declared(main);
            let e = fb.entry_block();
            site = fb.call(e, CallTarget::Direct(foo), vec![], true);
            fb.ret(e, None);
            fb.finish();
        }
        mb.set_entry(main);
        (mb.finish(), site, main, foo)
    }

    #[test]
    fn test_eval_metric_mean() {
        let (m, site, main, foo) = fixture();
        let mut attrs = AttrCache::new();
        let mut ids = RecordIds::new();
        let mut cfg = MetricConfig::default();
        let metric = select_metric("mean", &mut cfg).unwrap();

        let hist = point_hist(1.0);
        let mut rec = CallRecord::new(
            &mut ids,
            site,
            main,
            foo,
            BlockRef::new(main, fdopt_ir::BlockId(0)),
            Some(&hist),
        );
        let mval = rec.eval_metric(&m, &mut attrs, metric, &cfg);

        // benefit = call/return only (no args); cost = 10 - ONE_BLOCK
        let expected_cost = 10 - inline_weights::ONE_BLOCK as i64;
        assert_eq!(rec.inline_size_cached(), expected_cost);
        let expected = f64::from(inline_weights::CALL_RETURN) / expected_cost as f64;
        assert!((mval - expected).abs() < 1e-9);
        assert!(mval > 0.0);
    }

    #[test]
    fn test_never_metric_blocks_inlining() {
        let (m, site, main, foo) = fixture();
        let mut attrs = AttrCache::new();
        let mut ids = RecordIds::new();
        let mut cfg = MetricConfig::default();
        let metric = select_metric("never", &mut cfg).unwrap();

        let hist = point_hist(1.0);
        let mut rec = CallRecord::new(
            &mut ids,
            site,
            main,
            foo,
            BlockRef::new(main, fdopt_ir::BlockId(0)),
            Some(&hist),
        );
        let mval = rec.eval_metric(&m, &mut attrs, metric, &cfg);
        assert!(mval < 0.0);
    }

    #[test]
    fn test_from_inlined_crosses_histograms() {
        let (m, site, main, foo) = fixture();
        let _ = m;
        let mut ids = RecordIds::new();

        let mut a = CallRecord::new(
            &mut ids,
            site,
            main,
            foo,
            BlockRef::new(main, fdopt_ir::BlockId(0)),
            Some(&point_hist(0.5)),
        );
        a.history_names.push("earlier".to_string());
        a.history.insert(FuncId(7));
        let b = CallRecord::new(
            &mut ids,
            site,
            main,
            foo,
            BlockRef::new(main, fdopt_ir::BlockId(0)),
            Some(&point_hist(0.4)),
        );

        let rec = CallRecord::from_inlined(
            &mut ids,
            &a,
            &b,
            foo,
            "foo",
            CallSiteId(99),
            main,
            foo,
            BlockRef::new(main, fdopt_ir::BlockId(0)),
        );
        assert!((rec.hist.mean(false) - 0.2).abs() < 1e-9);
        assert_eq!(rec.z_id, a.z_id ^ b.z_id);
        assert!(rec.history.contains(&foo));
        assert!(rec.history.contains(&FuncId(7)));
        assert_eq!(rec.history_names.last().map(String::as_str), Some("foo"));
        assert_eq!(rec.history_string(","), "2[earlier,foo]");
    }

    #[test]
    fn test_never_inline_caches_no_return() {
        let mut mb = ModuleBuilder::new();
        let die = mb.declare("die", 0);
        {
            let mut fb = mb.define_declared(die);
            let e = fb.entry_block();
            fb.ret(e, None);
            fb.finish();
        }
        mb.set_no_return(die);
        let main = mb.declare("main", 0);
        let site;
        {
            let mut fb = mb.define_declared(main);
            let e = fb.entry_block();
            site = fb.call(e, CallTarget::Direct(die), vec![], true);
            fb.ret(e, None);
            fb.finish();
        }
        let m = mb.finish();

        let mut attrs = AttrCache::new();
        let mut ids = RecordIds::new();
        let rec = CallRecord::new(
            &mut ids,
            site,
            main,
            die,
            BlockRef::new(main, fdopt_ir::BlockId(0)),
            None,
        );
        assert!(rec.never_inline(&m, &mut attrs));
        // the verdict is cached on the attribute
        assert!(attrs.get(die).unwrap().cannot_inline);
    }
}
