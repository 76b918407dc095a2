//! The combined edge profile: one histogram per CFG edge, fed with
//! hierarchically-normalized execution frequencies.

use std::io::{Read, Write};

use crate::edt::EdgeDominatorTree;
use crate::histogram::{Histogram, EPS};
use crate::io::{ProfileReader, ProfileResult, ProfileWriter, RecordTag};
use crate::profile::{CombinedProfile, ProfileCore, ProfileKind};

/// Edge-kind combined profile. The histogram vector is dense over the
/// module's global edge indices, sized to the EDT's edge count.
#[derive(Debug, Default)]
pub struct CombinedEdgeProfile {
    core: ProfileCore,
}

impl CombinedEdgeProfile {
    /// An empty profile sized for `edge_count` locations.
    pub fn new(edge_count: usize) -> Self {
        let mut core = ProfileCore::new();
        core.histograms.resize_with(edge_count, Histogram::new);
        CombinedEdgeProfile { core }
    }

    pub fn core(&self) -> &ProfileCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut ProfileCore {
        &mut self.core
    }

    pub fn histogram(&self, edge: u32) -> Option<&Histogram> {
        self.core.histogram(edge as usize)
    }

    /// Ingest one trial's raw edge counters. Each counter normalizes
    /// against its immediate dominator's counter: a root edge is `1`, a
    /// zero dominator count yields `0`, anything else is the plain ratio.
    /// The sample lands on the edge's add list; total weight grows by one
    /// trial.
    pub fn add_profile<R: Read>(
        &mut self,
        r: &mut ProfileReader<R>,
        edt: &EdgeDominatorTree,
    ) -> ProfileResult<()> {
        let edge_count = r.read_u32()? as usize;
        if self.core.histograms.len() != edge_count {
            if !self.core.histograms.is_empty() {
                tracing::warn!(
                    old = self.core.histograms.len(),
                    new = edge_count,
                    "edge count has changed"
                );
            }
            self.core.histograms.resize_with(edge_count, Histogram::new);
        }
        if edt.edge_count() != edge_count {
            tracing::warn!(
                profile = edge_count,
                edt = edt.edge_count(),
                "edge profile does not match the dominator tree"
            );
        }

        let counters = r.read_u32_vec(edge_count)?;
        self.core.add_weight(1.0);

        for (i, &count) in counters.iter().enumerate() {
            let edge = i as u32;
            let norm_freq = if (edge as usize) < edt.edge_count() {
                let dom = edt.dominator_index(edge);
                if dom == edge {
                    // root normalizes to 1, even when its counter is 0
                    1.0
                } else {
                    let dom_count = counters[dom as usize];
                    if dom_count == 0 {
                        0.0
                    } else {
                        f64::from(count) / f64::from(dom_count)
                    }
                }
            } else {
                0.0
            };
            self.core.histograms[i].add_to_list(norm_freq, 1.0);
        }
        Ok(())
    }

    /// Write the profile; only histograms carrying weight are stored.
    /// Returns the number written.
    pub fn serialize<W: Write>(&self, w: &mut ProfileWriter<W>) -> ProfileResult<usize> {
        let live = self
            .core
            .histograms
            .iter()
            .filter(|h| h.non_zero_weight() > EPS)
            .count();

        w.write_tag(RecordTag::CombinedEdge)?;
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
    /// consumed. Locations absent from the stream materialize as empty
    /// histograms at their dense positions.
    pub fn deserialize<R: Read>(
        r: &mut ProfileReader<R>,
        expected_edges: usize,
    ) -> ProfileResult<CombinedEdgeProfile> {
        let mut cp = CombinedEdgeProfile::new(expected_edges);
        cp.core.weight = r.read_f64()?;
        let count = r.read_u32()?;
        cp.core.bincount = r.read_u32()?;

        if count == 0 {
            tracing::warn!("no edges in combined edge profile");
        }

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

    /// Merge same-kind profiles: weights sum, and each location's histogram
    /// is rebuilt over the nonzero constituents.
    pub fn build_from_list(&mut self, list: &[CombinedProfile], bincount: u32) {
        let refs: Vec<&CombinedProfile> = list.iter().collect();
        self.core.bincount = if bincount == 0 {
            ProfileCore::calc_bin_count(&refs, ProfileKind::Edge, crate::profile::DEFAULT_BINS)
        } else {
            bincount
        };
        self.core.weight = 0.0;
        if list.is_empty() {
            return;
        }

        let mut edge_count = 0;
        for cp in list {
            if let CombinedProfile::Edge(p) = cp {
                edge_count = p.core.size();
                break;
            }
        }

        for cp in list {
            match cp {
                CombinedProfile::Edge(p) => {
                    self.core.add_weight(p.core.weight);
                    if p.core.size() != edge_count {
                        tracing::warn!(
                            have = p.core.size(),
                            expect = edge_count,
                            "edge count mismatch in merge list"
                        );
                    }
                }
                other => {
                    tracing::warn!(kind = other.name(), "non-edge profile in edge merge list");
                }
            }
        }

        let weight = self.core.weight;
        let bc = self.core.bincount;
        self.core.histograms.clear();
        self.core.histograms.reserve(edge_count);
        for i in 0..edge_count {
            let parts: Vec<&Histogram> = list
                .iter()
                .filter_map(|cp| cp.as_edge())
                .filter_map(|p| p.histogram(i as u32))
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
    use fdopt_ir::{ModuleBuilder, Value};

    /// A function with counters `[entry=10, A→B=7, A→C=3]` where the entry
    /// edge dominates both branch edges.
    fn branch_module() -> fdopt_ir::Module {
        let mut mb = ModuleBuilder::new();
        {
            let mut fb = mb.define("f", 1);
            let a = fb.entry_block();
            let b = fb.block("b");
            let c = fb.block("c");
            fb.cond_br(a, Value::Param(0), b, c);
            fb.ret(b, None);
            fb.ret(c, None);
            fb.finish();
        }
        mb.finish()
    }

    fn raw_edge_trial(counters: &[u32]) -> Vec<u8> {
        let mut w = ProfileWriter::new(Vec::new());
        w.write_u32(counters.len() as u32).unwrap();
        for &c in counters {
            w.write_u32(c).unwrap();
        }
        w.into_inner()
    }

    #[test]
    fn test_normalization_against_dominators() {
        let m = branch_module();
        let edt = EdgeDominatorTree::new(&m);
        assert_eq!(edt.edge_count(), 3);

        let mut cp = CombinedEdgeProfile::new(edt.edge_count());
        let raw = raw_edge_trial(&[10, 7, 3]);
        let mut r = ProfileReader::new(raw.as_slice());
        cp.add_profile(&mut r, &edt).unwrap();

        assert_eq!(cp.core().total_weight(), 1.0);
        cp.core_mut().build_histograms(4);

        let h0 = cp.histogram(0).unwrap();
        let h1 = cp.histogram(1).unwrap();
        let h2 = cp.histogram(2).unwrap();
        assert!((h0.mean(false) - 1.0).abs() < 1e-12);
        assert!((h1.mean(false) - 0.7).abs() < 1e-12);
        assert!((h2.mean(false) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_zero_dominator_count_normalizes_to_zero() {
        let m = branch_module();
        let edt = EdgeDominatorTree::new(&m);
        let mut cp = CombinedEdgeProfile::new(edt.edge_count());

        // both branch counters zero; entry still normalizes to 1
        let raw = raw_edge_trial(&[0, 0, 0]);
        let mut r = ProfileReader::new(raw.as_slice());
        cp.add_profile(&mut r, &edt).unwrap();
        cp.core_mut().build_histograms(4);

        assert!((cp.histogram(0).unwrap().mean(false) - 1.0).abs() < 1e-12);
        assert!(!cp.histogram(1).unwrap().non_zero());
    }

    #[test]
    fn test_serialize_round_trip() {
        let m = branch_module();
        let edt = EdgeDominatorTree::new(&m);
        let mut cp = CombinedEdgeProfile::new(edt.edge_count());
        for counters in [[10u32, 7, 3], [20, 5, 15]] {
            let raw = raw_edge_trial(&counters);
            let mut r = ProfileReader::new(raw.as_slice());
            cp.add_profile(&mut r, &edt).unwrap();
        }
        cp.core_mut().build_histograms(5);

        let mut w = ProfileWriter::new(Vec::new());
        let written = cp.serialize(&mut w).unwrap();
        assert_eq!(written, 3);
        let buf = w.into_inner();

        let mut r = ProfileReader::new(buf.as_slice());
        let tag = r.read_tag().unwrap();
        assert_eq!(tag, Some(RecordTag::CombinedEdge as u32));
        let cp2 = CombinedEdgeProfile::deserialize(&mut r, edt.edge_count()).unwrap();

        assert_eq!(cp2.core().total_weight(), 2.0);
        assert_eq!(cp2.core().size(), 3);
        for i in 0..3 {
            let a = cp.histogram(i).unwrap();
            let b = cp2.histogram(i).unwrap();
            assert_eq!(a.bins(), b.bins());
            assert!((a.non_zero_weight() - b.non_zero_weight()).abs() < 1e-9);
            assert!((a.min() - b.min()).abs() < 1e-12);
            assert!((a.max() - b.max()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_build_from_list_merges_weight() {
        let m = branch_module();
        let edt = EdgeDominatorTree::new(&m);

        let mut mk = |counters: [u32; 3]| {
            let mut cp = CombinedEdgeProfile::new(edt.edge_count());
            let raw = raw_edge_trial(&counters);
            let mut r = ProfileReader::new(raw.as_slice());
            cp.add_profile(&mut r, &edt).unwrap();
            cp.core_mut().build_histograms(4);
            CombinedProfile::Edge(cp)
        };
        let list = vec![mk([10, 7, 3]), mk([10, 2, 8])];

        let mut merged = CombinedEdgeProfile::new(0);
        merged.build_from_list(&list, 0);

        assert_eq!(merged.core().total_weight(), 2.0);
        assert_eq!(merged.core().bin_count(), 4);
        assert_eq!(merged.core().size(), 3);
        // branch ratios from both inputs are present
        let h1 = merged.histogram(1).unwrap();
        assert!((h1.min() - 0.2).abs() < 1e-9);
        assert!((h1.max() - 0.7).abs() < 1e-9);
        assert!((h1.non_zero_weight() - 2.0).abs() < 1e-9);
    }
}
