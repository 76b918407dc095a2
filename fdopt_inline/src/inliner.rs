//! The greedy, profile-ranked inlining driver.
//!
//! The driver keeps a frontier of candidate call sites sorted ascending by
//! metric value and repeatedly consumes the best one:
//!
//! 1. Pop the back. Stop when its metric value is nonpositive.
//! 2. Reject over-budget, never-inlinable, and too-deep candidates onto
//!    the ignore list (tracked for history propagation, never chosen).
//! 3. Snapshot the record, drop it from the frontier, and ask the host to
//!    inline the site. Refusals land back on the ignore list.
//! 4. On success: recompute the caller's attributes, charge the observed
//!    growth to the budget, and fold every synthesized call site into the
//!    frontier. Non-candidates are skipped, indirect-to-direct
//!    resolutions are ignored (no histogram exists for them), and
//!    everything else gets a histogram crossed from its ancestors plus an
//!    extended inlining history.
//! 5. Retire dead callees recursively and re-score callers of the grown
//!    function.
//!
//! Records live in a slab arena; the frontier and ignore list hold arena
//! indices and the site map resolves stable call-site ids to slots, so
//! nothing dangles while the IR mutates underneath.

use std::collections::BTreeSet;
use std::fmt;
use std::io;

use rustc_hash::{FxHashMap, FxHashSet};

use fdopt_ir::{inline_call, CallSiteId, FuncId, Module};
use fdopt_profile::CombinedCallProfile;

use crate::attr::AttrCache;
use crate::metric::{select_metric, MetricConfig, MetricError, MetricFn};
use crate::record::{CallRecord, RecordIds};
use crate::tee::{vl, LogSet};
use crate::teeln;

// =============================================================================
// Configuration
// =============================================================================

/// Code-growth budget selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Unlimited,
    /// Size-scaled growth factor (see [`Inliner::compute_budget`]).
    Auto,
    /// Literal instruction count.
    Limit(u32),
}

impl Budget {
    /// The conventional flag encoding: 0 unlimited, 1 auto, else literal.
    pub fn from_flag(v: u32) -> Budget {
        match v {
            0 => Budget::Unlimited,
            1 => Budget::Auto,
            n => Budget::Limit(n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InlinerConfig {
    pub metric: String,
    pub quantiles: Vec<f64>,
    pub budget: Budget,
    /// Maximum inlining-history length; 0 = unlimited.
    pub max_depth: u32,
    /// Basename for the report files; `-` routes everything to stdout.
    pub log_base: String,
    pub verbosity: u8,
}

impl Default for InlinerConfig {
    fn default() -> Self {
        InlinerConfig {
            metric: "mean".to_string(),
            quantiles: Vec::new(),
            budget: Budget::Auto,
            max_depth: 0,
            log_base: "fdilog".to_string(),
            verbosity: vl::INFO,
        }
    }
}

// =============================================================================
// Statistics and errors
// =============================================================================

/// Counters reported in the final summary.
#[derive(Debug, Clone, Default)]
pub struct InlineStats {
    pub inline_count: u32,
    pub inline_fail: u32,
    pub never_inline: u32,
    pub cand_convert: u32,
    pub missing_record: u32,
    pub too_deep: u32,
    pub too_big: u32,
    pub new_cand: u32,
    pub new_ignore: u32,
    pub new_not_cand: u32,
    pub end_skip: u32,
    pub dead_calls: u32,
    pub initial_candidates: usize,
    pub candidates_left: usize,
    pub ignored_total: usize,
    pub removed_total: usize,
    pub zero_mval_left: usize,
    pub total_size: u64,
    pub initial_budget: i64,
    pub final_budget: i64,
    pub global_hash: u32,
}

#[derive(Debug)]
pub enum InlinerError {
    /// No combined call profile was available.
    NoCallProfile,
    Metric(MetricError),
    Log(io::Error),
    /// A frontier invariant broke; the loop terminated early with prior
    /// inlinings preserved.
    Invariant(String),
}

impl fmt::Display for InlinerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InlinerError::NoCallProfile => write!(f, "no combined call profile"),
            InlinerError::Metric(e) => write!(f, "metric selection failed: {e}"),
            InlinerError::Log(e) => write!(f, "cannot open log: {e}"),
            InlinerError::Invariant(m) => write!(f, "inliner invariant violated: {m}"),
        }
    }
}

impl std::error::Error for InlinerError {}

impl From<MetricError> for InlinerError {
    fn from(e: MetricError) -> Self {
        InlinerError::Metric(e)
    }
}

// =============================================================================
// Driver
// =============================================================================

pub struct Inliner {
    config: InlinerConfig,
    logs: LogSet,
    attrs: AttrCache,
    metric: MetricFn,
    mcfg: MetricConfig,
    ids: RecordIds,

    /// Slab of records; a slot is `None` once its record is removed.
    arena: Vec<Option<CallRecord>>,
    /// Arena slots sorted ascending by `mval`; the back is the best.
    candidates: Vec<usize>,
    /// Tracked but never chosen.
    ignore: Vec<usize>,
    /// Stable site id to arena slot, for candidates and ignored alike.
    records: FxHashMap<CallSiteId, usize>,
    /// Call sites currently calling each function.
    callers: FxHashMap<FuncId, BTreeSet<CallSiteId>>,
    removed: FxHashSet<CallSiteId>,

    stats: InlineStats,
}

impl Inliner {
    pub fn new(config: InlinerConfig) -> Result<Inliner, InlinerError> {
        let logs = LogSet::open(&config.log_base, config.verbosity).map_err(InlinerError::Log)?;
        Inliner::with_logs(config, logs)
    }

    /// Construct with caller-provided log streams (tests, embedding).
    pub fn with_logs(config: InlinerConfig, logs: LogSet) -> Result<Inliner, InlinerError> {
        let mut mcfg = MetricConfig {
            quantiles: config.quantiles.iter().copied().collect(),
        };
        let metric = select_metric(&config.metric, &mut mcfg)?;
        Ok(Inliner {
            config,
            logs,
            attrs: AttrCache::new(),
            metric,
            mcfg,
            ids: RecordIds::new(),
            arena: Vec::new(),
            candidates: Vec::new(),
            ignore: Vec::new(),
            records: FxHashMap::default(),
            callers: FxHashMap::default(),
            removed: FxHashSet::default(),
            stats: InlineStats::default(),
        })
    }

    pub fn stats(&self) -> &InlineStats {
        &self.stats
    }

    // -------------------------------------------------------------------------
    // Frontier maintenance
    // -------------------------------------------------------------------------

    fn rec(&self, slot: usize) -> &CallRecord {
        self.arena[slot].as_ref().expect("live record")
    }

    /// Insert a record into the sorted frontier (before the first
    /// equal-or-greater entry, so equal metric values pop in insertion
    /// order).
    fn insert_candidate(&mut self, mut rec: CallRecord) -> usize {
        if rec.ignored {
            teeln!(
                self.logs.debug,
                vl::WARN,
                "ignored record inserted as candidate; clearing flag: {}",
                rec.id
            );
            rec.ignored = false;
        }
        let mval = rec.mval;
        let pos = self
            .candidates
            .partition_point(|&i| self.arena[i].as_ref().unwrap().mval < mval);
        let slot = self.arena.len();
        self.records.insert(rec.site, slot);
        self.arena.push(Some(rec));
        self.candidates.insert(pos, slot);
        slot
    }

    /// Park a record on the ignore list.
    fn insert_ignored(&mut self, mut rec: CallRecord) -> usize {
        rec.ignored = true;
        let slot = self.arena.len();
        self.records.insert(rec.site, slot);
        self.arena.push(Some(rec));
        self.ignore.push(slot);
        slot
    }

    /// Move the frontier's best candidate to the ignore list.
    fn ignore_back(&mut self) {
        if let Some(slot) = self.candidates.pop() {
            self.arena[slot].as_mut().unwrap().ignored = true;
            self.ignore.push(slot);
        }
    }

    /// Ignore a site: demote its candidate record if one exists, otherwise
    /// create a fresh histogram-less ignored record for it.
    fn ignore_site(&mut self, module: &Module, site: CallSiteId) {
        if let Some(&slot) = self.records.get(&site) {
            if !self.rec(slot).ignored {
                if let Some(pos) = self.candidates.iter().position(|&s| s == slot) {
                    self.candidates.remove(pos);
                }
                self.arena[slot].as_mut().unwrap().ignored = true;
                self.ignore.push(slot);
            }
            return;
        }

        let loc = match module.find_call(site) {
            Some(l) => l,
            None => {
                teeln!(self.logs.debug, vl::WARN, "cannot ignore vanished site {site}");
                return;
            }
        };
        let callee = match module.call_at(loc).and_then(|c| c.target.callee()) {
            Some(f) => f,
            None => return, // indirect with no known target: nothing to track
        };
        let mut rec = CallRecord::new(
            &mut self.ids,
            site,
            loc.func,
            callee,
            loc.block_ref(),
            None,
        );
        rec.ignored = true;
        self.insert_ignored(rec);
    }

    /// Remove the frontier's best record entirely, returning it as the
    /// snapshot for the inlining attempt (the mutation invalidates the
    /// stored call site).
    fn remove_back(&mut self) -> CallRecord {
        let slot = self.candidates.pop().expect("nonempty frontier");
        let rec = self.arena[slot].take().expect("live record");
        self.records.remove(&rec.site);
        if let Some(set) = self.callers.get_mut(&rec.callee) {
            set.remove(&rec.site);
        }
        self.removed.insert(rec.site);
        rec
    }

    /// Remove a site from whichever list holds it.
    fn remove_site(&mut self, site: CallSiteId) -> bool {
        if self.removed.contains(&site) {
            teeln!(self.logs.debug, vl::ERROR, "already removed call site {site}");
            return false;
        }
        let slot = match self.records.remove(&site) {
            Some(s) => s,
            None => {
                teeln!(self.logs.debug, vl::ERROR, "no record of call site {site}");
                return false;
            }
        };
        let rec = self.arena[slot].take().expect("live record");
        let list = if rec.ignored {
            &mut self.ignore
        } else {
            &mut self.candidates
        };
        if let Some(pos) = list.iter().position(|&s| s == slot) {
            list.remove(pos);
        }
        if let Some(set) = self.callers.get_mut(&rec.callee) {
            set.remove(&site);
        }
        self.removed.insert(site);
        true
    }

    /// Recursively retire a function with no remaining callers; every
    /// candidate inside it is removed and its callees cascade.
    fn remove_dead_callee(&mut self, module: &Module, func: FuncId) -> u32 {
        let address_taken = self
            .attrs
            .get(func)
            .map(|a| a.address_taken)
            .unwrap_or_else(|| module.func(func).address_taken);
        let no_callers = self
            .callers
            .get(&func)
            .map(|s| s.is_empty())
            .unwrap_or(true);
        if !no_callers || address_taken || module.entry == Some(func) {
            return 0;
        }

        teeln!(
            self.logs.debug,
            vl::INFO,
            "callee is dead: {}",
            module.func(func).name
        );

        let mut sites = Vec::new();
        let mut callees: BTreeSet<FuncId> = BTreeSet::new();
        for (_, block) in module.func(func).iter_blocks() {
            for inst in &block.insts {
                if module.is_inline_candidate(func, inst) {
                    let call = inst.as_call().unwrap();
                    sites.push(call.site);
                    if let Some(f) = call.target.callee() {
                        callees.insert(f);
                    }
                }
            }
        }

        let mut removed = 0;
        for site in sites {
            if self.remove_site(site) {
                removed += 1;
            }
        }
        for callee in callees {
            removed += self.remove_dead_callee(module, callee);
        }
        removed
    }

    /// Re-score every record calling `caller` (its size just changed) and
    /// restore frontier order.
    fn update_callers(&mut self, module: &Module, caller: FuncId) -> Result<(), InlinerError> {
        let sites: Vec<CallSiteId> = self
            .callers
            .get(&caller)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();

        for site in sites {
            let slot = match self.records.get(&site) {
                Some(&s) => s,
                None => {
                    return Err(InlinerError::Invariant(format!(
                        "no record for caller site {site} of {}",
                        module.func(caller).name
                    )))
                }
            };
            let arena = &mut self.arena;
            let attrs = &mut self.attrs;
            let rec = arena[slot].as_mut().expect("live record");
            if !rec.ignored {
                rec.eval_metric(module, attrs, self.metric, &self.mcfg);
            }
        }

        self.resort();
        Ok(())
    }

    fn resort(&mut self) {
        let arena = &self.arena;
        self.candidates.sort_by(|&a, &b| {
            arena[a]
                .as_ref()
                .unwrap()
                .mval
                .partial_cmp(&arena[b].as_ref().unwrap().mval)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Every frontier record must be live and not ignored; every ignore
    /// record must be flagged ignored.
    fn sanity_check(&mut self) -> Result<(), InlinerError> {
        for &slot in &self.candidates {
            match &self.arena[slot] {
                Some(r) if !r.ignored => {}
                Some(r) => {
                    return Err(InlinerError::Invariant(format!(
                        "ignored record {} on candidate list",
                        r.id
                    )))
                }
                None => {
                    return Err(InlinerError::Invariant(
                        "dead slot on candidate list".to_string(),
                    ))
                }
            }
        }
        for &slot in &self.ignore {
            match &self.arena[slot] {
                Some(r) if r.ignored => {}
                Some(r) => {
                    return Err(InlinerError::Invariant(format!(
                        "not-ignored record {} on ignore list",
                        r.id
                    )))
                }
                None => {} // removed while ignored; harmless
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Budget
    // -------------------------------------------------------------------------

    /// Resolve the configured budget against the program size. Auto scales
    /// a growth factor between 5% for huge programs and maximal growth for
    /// small ones along an inverse-sqrt curve.
    pub fn compute_budget(&self, size: i64) -> i64 {
        match self.config.budget {
            Budget::Unlimited => i64::MAX,
            Budget::Limit(n) => i64::from(n),
            Budget::Auto => {
                const MIN_PCT: f64 = 0.05;
                const MAX_PCT: f64 = 10.0;
                const MAX_SIZE: f64 = 425_000.0;
                const MIN_SIZE: f64 = 5_000.0;
                let scale = MAX_PCT / (1.0 / MIN_SIZE.sqrt() - 1.0 / MAX_SIZE.sqrt());

                let sz = size as f64;
                let mut growth = if sz >= MAX_SIZE {
                    MIN_PCT
                } else if sz <= MIN_SIZE {
                    MAX_PCT
                } else {
                    scale * (1.0 / sz.sqrt() - 1.0 / MAX_SIZE.sqrt()) + MIN_PCT
                };
                growth = growth.clamp(MIN_PCT, MAX_PCT);
                (growth * sz).floor() as i64
            }
        }
    }

    // -------------------------------------------------------------------------
    // Initialization
    // -------------------------------------------------------------------------

    /// Fill the attribute cache, scan for candidates, score and sort them.
    /// Returns total program size in instructions.
    fn initialize(&mut self, module: &Module, call_cp: &CombinedCallProfile) -> u64 {
        let fids: Vec<FuncId> = module.iter_defined().map(|(f, _)| f).collect();
        let mut total: u64 = 0;
        for f in fids {
            total += self.attrs.recalc(module, f).max(0) as u64;
        }

        let mut found: Vec<(CallSiteId, FuncId, FuncId, fdopt_ir::BlockRef)> = Vec::new();
        for (fid, func) in module.iter_defined() {
            for (bid, block) in func.iter_blocks() {
                for inst in &block.insts {
                    if module.is_inline_candidate(fid, inst) {
                        let call = inst.as_call().unwrap();
                        found.push((
                            call.site,
                            fid,
                            call.target.callee().unwrap(),
                            fdopt_ir::BlockRef::new(fid, bid),
                        ));
                    }
                }
            }
        }

        for (site, caller, callee, block) in found {
            let hist = call_cp.histogram_for_block(block);
            let rec = CallRecord::new(&mut self.ids, site, caller, callee, block, hist);
            self.callers.entry(callee).or_default().insert(site);
            let slot = self.arena.len();
            self.records.insert(site, slot);
            self.arena.push(Some(rec));
            self.candidates.push(slot);
        }

        // evaluate once every function's attributes exist, then sort
        let slots = self.candidates.clone();
        for slot in slots {
            let arena = &mut self.arena;
            let attrs = &mut self.attrs;
            let rec = arena[slot].as_mut().unwrap();
            rec.eval_metric(module, attrs, self.metric, &self.mcfg);
        }
        self.resort();

        for slot in self.candidates.clone() {
            let line = self.rec(slot).describe(module);
            teeln!(self.logs.cseval, vl::LOG, "{}", line);
        }

        self.stats.initial_candidates = self.candidates.len();
        total
    }

    // -------------------------------------------------------------------------
    // Main loop
    // -------------------------------------------------------------------------

    /// Run the inliner over the module. The module is mutated in place;
    /// already-performed inlinings survive even an invariant failure.
    pub fn run(
        &mut self,
        module: &mut Module,
        call_cp: &CombinedCallProfile,
    ) -> Result<InlineStats, InlinerError> {
        let total_size = self.initialize(module, call_cp);
        self.stats.total_size = total_size;
        self.sanity_check()?;

        let initial_budget = self.compute_budget(total_size as i64);
        let mut budget = initial_budget;
        self.stats.initial_budget = initial_budget;
        teeln!(
            self.logs.debug,
            vl::TRACE,
            "starting inlining, initial budget {initial_budget}"
        );

        let mut did_try = true;
        let result = loop {
            if budget <= 0 || self.candidates.is_empty() {
                break Ok(());
            }

            let slot = *self.candidates.last().unwrap();
            let (mval, expected_size, depth) = {
                let r = self.rec(slot);
                (r.mval, r.inline_size_cached(), r.history.len() as u32)
            };
            {
                let line = self.rec(slot).describe(module);
                teeln!(self.logs.debug, vl::INFO, "candidate ({mval:.2}): {line}");
            }

            if !did_try {
                self.stats.end_skip += 1;
            }
            did_try = false;

            if mval <= 0.0 {
                teeln!(self.logs.debug, vl::INFO, "    no benefit");
                break Ok(());
            }
            if expected_size > budget {
                self.stats.too_big += 1;
                teeln!(self.logs.debug, vl::INFO, "    too big ({expected_size}/{budget})");
                self.ignore_back();
                continue;
            }

            did_try = true;
            self.stats.end_skip = 0;

            let never = {
                let arena = &self.arena;
                let attrs = &mut self.attrs;
                arena[slot].as_ref().unwrap().never_inline(module, attrs)
            };
            if never {
                self.stats.never_inline += 1;
                teeln!(self.logs.debug, vl::INFO, "    never inline");
                self.ignore_back();
                continue;
            }

            if self.config.max_depth > 0 && depth >= self.config.max_depth {
                self.stats.too_deep += 1;
                teeln!(self.logs.debug, vl::INFO, "    too deep ({depth})");
                self.ignore_back();
                continue;
            }

            // bookkeeping happens before the attempt: success invalidates
            // the stored call site
            let snapshot = self.remove_back();
            let caller = snapshot.caller;
            let callee = snapshot.callee;

            match inline_call(module, snapshot.site) {
                Err(e) => {
                    self.stats.inline_fail += 1;
                    teeln!(self.logs.debug, vl::INFO, "    inline failed: {e}");
                    self.removed.remove(&snapshot.site);
                    self.insert_ignored(snapshot);
                    continue;
                }
                Ok(outcome) => {
                    self.stats.inline_count += 1;
                    let callee_inlines =
                        self.attrs.get(callee).map(|a| a.inline_count).unwrap_or(0);
                    if let Some(a) = self.attrs.attr_mut(caller) {
                        a.inline_count += callee_inlines + 1;
                    }
                    let growth = self.attrs.recalc(module, caller);
                    budget -= growth;
                    {
                        let left = self
                            .callers
                            .get(&callee)
                            .map(|s| s.len())
                            .unwrap_or(0);
                        teeln!(
                            self.logs.debug,
                            vl::LOG,
                            "  {} inlined ({budget}), ({left} callers left)",
                            snapshot.describe(module)
                        );
                        teeln!(
                            self.logs.debug,
                            vl::VERBOSE,
                            "    expected growth: {expected_size}, real growth: {growth}"
                        );
                    }

                    if let Err(e) = self.absorb_inlined_calls(module, &snapshot, &outcome) {
                        break Err(e);
                    }

                    let callee_dead = self
                        .callers
                        .get(&callee)
                        .map(|s| s.is_empty())
                        .unwrap_or(true);
                    if callee_dead {
                        let removed = self.remove_dead_callee(module, callee);
                        teeln!(self.logs.debug, vl::INFO, "    {removed} calls removed");
                        self.stats.dead_calls += removed;
                    }

                    if let Err(e) = self.update_callers(module, caller) {
                        break Err(e);
                    }
                    if let Err(e) = self.sanity_check() {
                        break Err(e);
                    }
                }
            }
        };

        self.stats.final_budget = budget;
        if let Err(e) = result {
            teeln!(self.logs.debug, vl::ERROR, "inlining finished with errors: {e}");
            self.logs.flush();
            return Err(e);
        }

        teeln!(self.logs.debug, vl::INFO, "inlining finished");
        self.final_report(module);
        self.count_report(initial_budget, budget, total_size);
        self.logs.flush();
        Ok(self.stats.clone())
    }

    /// Fold the call sites synthesized by one successful inline into the
    /// frontier.
    fn absorb_inlined_calls(
        &mut self,
        module: &Module,
        snapshot: &CallRecord,
        outcome: &fdopt_ir::InlineOutcome,
    ) -> Result<(), InlinerError> {
        if outcome.inlined_calls.is_empty() {
            return Ok(());
        }
        teeln!(
            self.logs.debug,
            vl::INFO,
            "    inlined {} call sites:",
            outcome.inlined_calls.len()
        );

        for ic in &outcome.inlined_calls {
            let loc = match module.find_call(ic.site) {
                Some(l) => l,
                None => {
                    self.stats.new_not_cand += 1;
                    continue;
                }
            };
            let is_candidate = {
                let inst = &module.func(loc.func).block(loc.block).insts[loc.inst];
                module.is_inline_candidate(loc.func, inst)
            };
            if !is_candidate {
                self.stats.new_not_cand += 1;
                teeln!(self.logs.debug, vl::INFO, "      {} (not candidate)", ic.site);
                continue;
            }

            let new_callee = module
                .call_at(loc)
                .and_then(|c| c.target.callee())
                .expect("candidate has a known callee");
            self.callers.entry(new_callee).or_default().insert(ic.site);

            // indirect call resolved to a direct one: no histogram exists
            // for it, so track it without ranking it
            if ic.origin_indirect {
                self.stats.cand_convert += 1;
                teeln!(self.logs.debug, vl::INFO, "      {} (newly resolved)", ic.site);
                self.ignore_site(module, ic.site);
                continue;
            }

            let origin_slot = match self.records.get(&ic.origin) {
                Some(&s) => s,
                None => {
                    self.stats.missing_record += 1;
                    return Err(InlinerError::Invariant(format!(
                        "missing record for inlined call origin {}",
                        ic.origin
                    )));
                }
            };

            if self.rec(origin_slot).ignored {
                self.stats.new_ignore += 1;
                teeln!(self.logs.debug, vl::INFO, "      {} (i)", ic.site);
                self.ignore_site(module, ic.site);
                continue;
            }

            let origin = self.rec(origin_slot).clone();
            let callee_name = module.func(snapshot.callee).name.clone();
            let mut rec = CallRecord::from_inlined(
                &mut self.ids,
                snapshot,
                &origin,
                snapshot.callee,
                &callee_name,
                ic.site,
                loc.func,
                new_callee,
                loc.block_ref(),
            );
            {
                let attrs = &mut self.attrs;
                rec.eval_metric(module, attrs, self.metric, &self.mcfg);
            }
            self.stats.new_cand += 1;
            {
                let line = rec.describe(module);
                teeln!(self.logs.cseval, vl::LOG, "{line}");
                teeln!(self.logs.debug, vl::INFO, "      {line}");
            }
            self.insert_candidate(rec);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reports
    // -------------------------------------------------------------------------

    /// Sum of the zIDs of every recorded candidate call inside `f`.
    fn function_zid(&self, module: &Module, f: FuncId) -> u32 {
        let mut zid: u32 = 0;
        for (_, block) in module.func(f).iter_blocks() {
            for inst in &block.insts {
                if module.is_inline_candidate(f, inst) {
                    let site = inst.as_call().unwrap().site;
                    if let Some(&slot) = self.records.get(&site) {
                        if let Some(rec) = &self.arena[slot] {
                            zid = zid.wrapping_add(rec.z_id);
                        }
                    }
                }
            }
        }
        zid
    }

    /// The hash log: one status line per function
    /// (`N` new, `D` dead, `0` untouched, `I` inlined-into, `X`
    /// inlined-into but uninlinable), inline histories for surviving call
    /// sites, the dead-function list, and the global hash (xor of live
    /// functions' zID sums).
    fn final_report(&mut self, module: &Module) {
        let mut global_hash: u32 = 0;

        for (fid, func) in module.iter_funcs() {
            if func.is_declaration {
                continue;
            }
            let (start_size, size, inline_count, cannot_inline, address_taken) =
                match self.attrs.get(fid) {
                    None => {
                        teeln!(self.logs.hash, vl::LOG, "N 00000000 {}", func.name);
                        continue;
                    }
                    Some(a) => (
                        a.start_size,
                        a.size,
                        a.inline_count,
                        a.cannot_inline,
                        a.address_taken,
                    ),
                };

            let zid = self.function_zid(module, fid);

            let no_callers = self
                .callers
                .get(&fid)
                .map(|s| s.is_empty())
                .unwrap_or(true);
            if no_callers && !address_taken && module.entry != Some(fid) {
                teeln!(self.logs.dead, vl::LOG, "{} {zid:08X}", func.name);
                teeln!(self.logs.hash, vl::LOG, "D 00000000 {}", func.name);
                continue;
            }

            if inline_count == 0 {
                teeln!(self.logs.hash, vl::LOG, "0 00000000 {}", func.name);
                continue;
            }

            let status = if cannot_inline { 'X' } else { 'I' };
            teeln!(
                self.logs.hash,
                vl::LOG,
                "{status} {zid:08X} {} {start_size} {size} {inline_count}",
                func.name
            );
            global_hash ^= zid;

            // surviving call sites with nonempty inline histories
            for (bid, block) in func.iter_blocks() {
                for inst in &block.insts {
                    if !module.is_inline_candidate(fid, inst) {
                        continue;
                    }
                    let call = inst.as_call().unwrap();
                    let slot = match self.records.get(&call.site) {
                        Some(&s) => s,
                        None => {
                            teeln!(
                                self.logs.debug,
                                vl::ERROR,
                                "no record for call in {}[{}]",
                                func.name,
                                func.block(bid).name
                            );
                            continue;
                        }
                    };
                    let rec = match &self.arena[slot] {
                        Some(r) => r,
                        None => continue,
                    };
                    if rec.history.is_empty() {
                        continue;
                    }
                    let callee_name = &module.func(rec.callee).name;
                    let history = rec.history_string(",");
                    let block_name = &func.block(bid).name;
                    let z = rec.z_id;
                    teeln!(
                        self.logs.hash,
                        vl::LOG,
                        " [{block_name}] {callee_name}{{{z:08X}}}  {history}"
                    );
                }
            }
        }

        teeln!(self.logs.hash, vl::LOG, "Global Hash: {global_hash:08X}");
        teeln!(self.logs.debug, vl::INFO, "Global Hash: {global_hash:08X}");
        self.stats.global_hash = global_hash;
    }

    /// The one-screen summary on the count stream.
    fn count_report(&mut self, initial_budget: i64, budget: i64, total_size: u64) {
        let zero_cand = self
            .candidates
            .iter()
            .filter(|&&s| self.rec(s).mval <= 0.0)
            .count();
        self.stats.candidates_left = self.candidates.len() + self.stats.end_skip as usize;
        self.stats.ignored_total = self.ignore.len();
        self.stats.removed_total = self.removed.len();
        self.stats.zero_mval_left = zero_cand;

        let s = &self.stats;
        let budget_pct = if total_size > 0 {
            100.0 * initial_budget as f64 / total_size as f64
        } else {
            0.0
        };
        teeln!(self.logs.count, vl::LOG, "  Calls inlined:   {}", s.inline_count);
        teeln!(self.logs.count, vl::LOG, "  Failures:        {}", s.inline_fail);
        teeln!(self.logs.count, vl::LOG, "  Initial cands.:  {}", s.initial_candidates);
        teeln!(self.logs.count, vl::LOG, "  New Candidates:  {}", s.new_cand);
        teeln!(self.logs.count, vl::LOG, "  Never Inline:    {}", s.never_inline);
        teeln!(
            self.logs.count,
            vl::LOG,
            "  New ignored:     {} ({} total)",
            s.new_ignore,
            s.ignored_total
        );
        teeln!(self.logs.count, vl::LOG, "  New non-cand:    {}", s.new_not_cand);
        teeln!(self.logs.count, vl::LOG, "  Resolve/Convert: {}", s.cand_convert);
        teeln!(self.logs.count, vl::LOG, "  Missing records: {}", s.missing_record);
        teeln!(self.logs.count, vl::LOG, "  Rejected (deep): {}", s.too_deep);
        teeln!(
            self.logs.count,
            vl::LOG,
            "  Rejected (big):  {}",
            s.too_big.saturating_sub(s.end_skip)
        );
        teeln!(
            self.logs.count,
            vl::LOG,
            "  Calls made dead: {} ({} removed)",
            s.dead_calls,
            s.removed_total
        );
        teeln!(
            self.logs.count,
            vl::LOG,
            "  Candidates left: {} ({} w/ 0 mval)",
            s.candidates_left,
            s.zero_mval_left
        );
        teeln!(
            self.logs.count,
            vl::LOG,
            "  Budget left:     {budget} of {initial_budget} (+{budget_pct:.1}% of {total_size})"
        );
    }
}
