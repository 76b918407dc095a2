//! The combined call profile: one histogram per call-bearing basic block,
//! holding the block's per-invocation execution frequency relative to its
//! function's entry.

use std::io::{Read, Write};
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use fdopt_ir::{BlockRef, FuncId, Module};

use crate::histogram::{Histogram, EPS};
use crate::io::{ProfileError, ProfileReader, ProfileResult, ProfileWriter, RecordTag};
use crate::profile::{CombinedProfile, ProfileCore, ProfileKind};

// =============================================================================
// Static program structure
// =============================================================================

/// The instrumented-block maps, computed once per module and shared by
/// every call profile in a run. Slots cover each defined function's
/// call-bearing blocks plus its entry block (so every instrumented function
/// has an entry counter to normalize against), in program order.
#[derive(Debug, Default)]
pub struct CallStructure {
    block_slot: FxHashMap<BlockRef, usize>,
    slot_block: Vec<BlockRef>,
    slot_func: Vec<FuncId>,
    slot_has_call: Vec<bool>,
    entry_slot: FxHashMap<FuncId, usize>,
    entry_with_calls: FxHashSet<BlockRef>,
}

impl CallStructure {
    pub fn build(module: &Module) -> Rc<CallStructure> {
        let mut s = CallStructure::default();
        for (fid, func) in module.iter_defined() {
            if !func.blocks.iter().any(|b| b.has_call()) {
                continue;
            }
            for (bid, block) in func.iter_blocks() {
                let is_entry = bid == func.entry();
                let has_call = block.has_call();
                if !has_call && !is_entry {
                    continue;
                }
                let r = BlockRef::new(fid, bid);
                let slot = s.slot_block.len();
                s.block_slot.insert(r, slot);
                s.slot_block.push(r);
                s.slot_func.push(fid);
                s.slot_has_call.push(has_call);
                if is_entry {
                    s.entry_slot.insert(fid, slot);
                    if has_call {
                        s.entry_with_calls.insert(r);
                    }
                }
            }
        }
        Rc::new(s)
    }

    pub fn slot_count(&self) -> usize {
        self.slot_block.len()
    }

    pub fn slot_of(&self, block: BlockRef) -> Option<usize> {
        self.block_slot.get(&block).copied()
    }

    pub fn func_of(&self, slot: usize) -> FuncId {
        self.slot_func[slot]
    }

    pub fn block_of(&self, slot: usize) -> BlockRef {
        self.slot_block[slot]
    }

    /// Whether the block owns a counter slot.
    pub fn has_call(&self, block: BlockRef) -> bool {
        self.block_slot.contains_key(&block)
    }

    /// Whether the block is the entry-with-calls slot of its function.
    pub fn is_entry(&self, block: BlockRef) -> bool {
        self.entry_with_calls.contains(&block)
    }
}

// =============================================================================
// Combined call profile
// =============================================================================

/// Call-kind combined profile: dense histogram vector indexed by structure
/// slot.
#[derive(Debug)]
pub struct CombinedCallProfile {
    core: ProfileCore,
    structure: Rc<CallStructure>,
}

impl CombinedCallProfile {
    pub fn new(structure: Rc<CallStructure>) -> Self {
        let mut core = ProfileCore::new();
        core.histograms
            .resize_with(structure.slot_count(), Histogram::new);
        CombinedCallProfile { core, structure }
    }

    pub fn core(&self) -> &ProfileCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut ProfileCore {
        &mut self.core
    }

    pub fn structure(&self) -> &CallStructure {
        &self.structure
    }

    pub fn histogram(&self, slot: usize) -> Option<&Histogram> {
        self.core.histogram(slot)
    }

    /// The histogram predicting a block's per-invocation frequency.
    pub fn histogram_for_block(&self, block: BlockRef) -> Option<&Histogram> {
        self.core.histogram(self.structure.slot_of(block)?)
    }

    pub fn has_call(&self, block: BlockRef) -> bool {
        self.structure.has_call(block)
    }

    pub fn is_entry(&self, block: BlockRef) -> bool {
        self.structure.is_entry(block)
    }

    /// The inliner's candidate filter, surfaced for hosts that only hold a
    /// profile.
    pub fn is_call_candidate(&self, module: &Module, block: BlockRef) -> bool {
        module.block_has_candidate(block)
    }

    /// Ingest one trial's raw block counters. Each call-bearing block's
    /// frequency is its counter over the function entry's counter (`1` for
    /// the entry block itself, `0` when the function never ran).
    pub fn add_profile<R: Read>(&mut self, r: &mut ProfileReader<R>) -> ProfileResult<()> {
        let count = r.read_u32()? as usize;
        if count != self.structure.slot_count() {
            return Err(ProfileError::Format(format!(
                "call trial has {count} counters, program structure has {}",
                self.structure.slot_count()
            )));
        }
        let counters = r.read_u32_vec(count)?;
        self.core.add_weight(1.0);

        for slot in 0..count {
            if !self.structure.slot_has_call[slot] {
                continue;
            }
            let func = self.structure.slot_func[slot];
            let entry = self.structure.entry_slot[&func];
            let freq = if slot == entry {
                1.0
            } else {
                let entry_count = counters[entry];
                if entry_count == 0 {
                    0.0
                } else {
                    f64::from(counters[slot]) / f64::from(entry_count)
                }
            };
            self.core.histograms[slot].add_to_list(freq, 1.0);
        }
        Ok(())
    }

    /// Write the profile; only histograms carrying weight are stored.
    pub fn serialize<W: Write>(&self, w: &mut ProfileWriter<W>) -> ProfileResult<usize> {
        let live = self
            .core
            .histograms
            .iter()
            .filter(|h| h.non_zero_weight() > EPS)
            .count();

        w.write_tag(RecordTag::CombinedCall)?;
        w.write_f64(self.core.weight)?;
        w.write_u32(live as u32)?;
        w.write_u32(self.core.bincount)?;

        let mut written = 0;
        for (i, h) in self.core.histograms.iter().enumerate() {
            if h.non_zero_weight() <= EPS {
                continue;
            }
            h.serialize(i as u32, w)?;
            written += 1;
        }
        Ok(written)
    }

    /// Inverse of [`Self::serialize`]; the kind tag has already been
    /// consumed.
    pub fn deserialize<R: Read>(
        r: &mut ProfileReader<R>,
        structure: Rc<CallStructure>,
    ) -> ProfileResult<CombinedCallProfile> {
        let mut cp = CombinedCallProfile::new(structure);
        cp.core.weight = r.read_f64()?;
        let count = r.read_u32()?;
        cp.core.bincount = r.read_u32()?;

        for _ in 0..count {
            let (id, hist) = Histogram::deserialize(cp.core.weight, r)?;
            let idx = id as usize;
            if idx >= cp.core.histograms.len() {
                cp.core.histograms.resize_with(idx + 1, Histogram::new);
            }
            cp.core.histograms[idx] = hist;
        }
        Ok(cp)
    }

    /// Merge same-kind profiles slot by slot.
    pub fn build_from_list(&mut self, list: &[CombinedProfile], bincount: u32) {
        let refs: Vec<&CombinedProfile> = list.iter().collect();
        self.core.bincount = if bincount == 0 {
            ProfileCore::calc_bin_count(&refs, ProfileKind::Call, crate::profile::DEFAULT_BINS)
        } else {
            bincount
        };
        self.core.weight = 0.0;
        if list.is_empty() {
            return;
        }

        let mut slots = self.structure.slot_count();
        for cp in list {
            match cp {
                CombinedProfile::Call(p) => {
                    self.core.add_weight(p.core.weight);
                    slots = slots.max(p.core.size());
                }
                other => {
                    tracing::warn!(kind = other.name(), "non-call profile in call merge list");
                }
            }
        }

        let weight = self.core.weight;
        let bc = self.core.bincount;
        self.core.histograms.clear();
        self.core.histograms.reserve(slots);
        for i in 0..slots {
            let parts: Vec<&Histogram> = list
                .iter()
                .filter_map(|cp| cp.as_call())
                .filter_map(|p| p.histogram(i))
                .filter(|h| h.non_zero())
                .collect();
            self.core
                .histograms
                .push(Histogram::from_constituents(bc, weight, &parts));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdopt_ir::{CallTarget, ModuleBuilder, Value};

    /// main: entry calls foo, a second block calls foo again; foo has no
    /// calls (and so owns no slots).
    fn call_module() -> Module {
        let mut mb = ModuleBuilder::new();
        let foo = mb.declare("foo", 0);
        {
            let mut fb = mb.define_declared(foo);
            let e = fb.entry_block();
            fb.ret(e, None);
            fb.finish();
        }
        let main = mb.declare("main", 1);
        {
            let mut fb = mb.define_declared(main);
            let e = fb.entry_block();
            let hot = fb.block("hot");
            fb.call(e, CallTarget::Direct(foo), vec![], true);
            fb.cond_br(e, Value::Param(0), hot, e);
            fb.call(hot, CallTarget::Direct(foo), vec![], true);
            fb.ret(hot, None);
            fb.finish();
        }
        mb.set_entry(main);
        mb.finish()
    }

    fn raw_call_trial(counters: &[u32]) -> Vec<u8> {
        let mut w = ProfileWriter::new(Vec::new());
        w.write_u32(counters.len() as u32).unwrap();
        for &c in counters {
            w.write_u32(c).unwrap();
        }
        w.into_inner()
    }

    #[test]
    fn test_structure_slots() {
        let m = call_module();
        let s = CallStructure::build(&m);
        // main's entry (with a call) and "hot"; foo contributes nothing
        assert_eq!(s.slot_count(), 2);
        let main = m.func_by_name("main").unwrap();
        let entry = BlockRef::new(main, fdopt_ir::BlockId(0));
        let hot = BlockRef::new(main, fdopt_ir::BlockId(1));
        assert!(s.has_call(entry));
        assert!(s.has_call(hot));
        assert!(s.is_entry(entry));
        assert!(!s.is_entry(hot));

        let foo = m.func_by_name("foo").unwrap();
        assert!(!s.has_call(BlockRef::new(foo, fdopt_ir::BlockId(0))));
    }

    #[test]
    fn test_normalization_against_entry() {
        let m = call_module();
        let s = CallStructure::build(&m);
        let mut cp = CombinedCallProfile::new(Rc::clone(&s));

        let raw = raw_call_trial(&[10, 30]);
        let mut r = ProfileReader::new(raw.as_slice());
        cp.add_profile(&mut r).unwrap();
        cp.core_mut().build_histograms(4);

        let main = m.func_by_name("main").unwrap();
        let entry = BlockRef::new(main, fdopt_ir::BlockId(0));
        let hot = BlockRef::new(main, fdopt_ir::BlockId(1));
        // entry is pinned at 1; the hot block ran three times per call
        assert!((cp.histogram_for_block(entry).unwrap().mean(false) - 1.0).abs() < 1e-12);
        assert!((cp.histogram_for_block(hot).unwrap().mean(false) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_counter_mismatch_is_format_error() {
        let m = call_module();
        let s = CallStructure::build(&m);
        let mut cp = CombinedCallProfile::new(s);
        let raw = raw_call_trial(&[1, 2, 3]);
        let mut r = ProfileReader::new(raw.as_slice());
        assert!(matches!(
            cp.add_profile(&mut r),
            Err(ProfileError::Format(_))
        ));
    }

    #[test]
    fn test_serialize_round_trip() {
        let m = call_module();
        let s = CallStructure::build(&m);
        let mut cp = CombinedCallProfile::new(Rc::clone(&s));
        for counters in [[10u32, 30], [4, 2]] {
            let raw = raw_call_trial(&counters);
            let mut r = ProfileReader::new(raw.as_slice());
            cp.add_profile(&mut r).unwrap();
        }
        cp.core_mut().build_histograms(6);

        let mut w = ProfileWriter::new(Vec::new());
        let written = cp.serialize(&mut w).unwrap();
        assert_eq!(written, 2);
        let buf = w.into_inner();

        let mut r = ProfileReader::new(buf.as_slice());
        assert_eq!(r.read_tag().unwrap(), Some(RecordTag::CombinedCall as u32));
        let cp2 = CombinedCallProfile::deserialize(&mut r, s).unwrap();
        assert_eq!(cp2.core().total_weight(), 2.0);
        for i in 0..2 {
            let a = cp.histogram(i).unwrap();
            let b = cp2.histogram(i).unwrap();
            assert!((a.mean(false) - b.mean(false)).abs() < 1e-9);
        }
    }
}
