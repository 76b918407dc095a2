//! Common behavior shared by the three combined-profile variants.
//!
//! A combined profile is a collection of per-location histograms plus a
//! total weight (the trial count) and a bin count. The edge, path, and call
//! variants differ in how locations map onto histogram slots; the weight
//! bookkeeping, histogram building, printing, and drift reporting live
//! here on [`ProfileCore`], with the variants wrapped in the
//! [`CombinedProfile`] sum type.

use std::io::{self, Write};

use crate::call::CombinedCallProfile;
use crate::edge::CombinedEdgeProfile;
use crate::histogram::{Histogram, EPS};
use crate::io::{ProfileResult, ProfileWriter, RecordTag};
use crate::path::CombinedPathProfile;

/// Bin count used when nothing else is specified.
pub const DEFAULT_BINS: u32 = 20;

/// The three profile kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    Edge,
    Path,
    Call,
}

impl ProfileKind {
    pub fn name(self) -> &'static str {
        match self {
            ProfileKind::Edge => "edge",
            ProfileKind::Path => "path",
            ProfileKind::Call => "call",
        }
    }

    pub fn tag(self) -> RecordTag {
        match self {
            ProfileKind::Edge => RecordTag::CombinedEdge,
            ProfileKind::Path => RecordTag::CombinedPath,
            ProfileKind::Call => RecordTag::CombinedCall,
        }
    }
}

// =============================================================================
// Shared core
// =============================================================================

/// Weight, bin count, and the histogram vector every variant embeds.
#[derive(Debug, Clone, Default)]
pub struct ProfileCore {
    pub(crate) weight: f64,
    pub(crate) bincount: u32,
    pub(crate) histograms: Vec<Histogram>,
}

impl ProfileCore {
    pub fn new() -> Self {
        ProfileCore::default()
    }

    pub fn total_weight(&self) -> f64 {
        self.weight
    }

    pub fn bin_count(&self) -> u32 {
        self.bincount
    }

    pub fn add_weight(&mut self, w: f64) {
        self.weight += w;
    }

    pub fn size(&self) -> usize {
        self.histograms.len()
    }

    pub fn histogram(&self, i: usize) -> Option<&Histogram> {
        self.histograms.get(i)
    }

    pub fn histogram_mut(&mut self, i: usize) -> Option<&mut Histogram> {
        self.histograms.get_mut(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Histogram> {
        self.histograms.iter()
    }

    /// Build every histogram from its accumulated sample list.
    pub fn build_histograms(&mut self, bincount: u32) {
        self.bincount = bincount;
        let weight = self.weight;
        for h in &mut self.histograms {
            h.build_from_list(bincount, weight, None);
        }
    }

    /// The largest bin count among same-kind profiles in `list`, else the
    /// fallback.
    pub fn calc_bin_count(list: &[&CombinedProfile], kind: ProfileKind, fallback: u32) -> u32 {
        let mut bins = 1;
        let mut valid = false;
        for cp in list {
            if cp.kind() == kind && cp.core().bincount > bins {
                bins = cp.core().bincount;
                valid = true;
            }
        }
        if valid {
            bins
        } else {
            fallback
        }
    }

    // -------------------------------------------------------------------------
    // Printing
    // -------------------------------------------------------------------------

    /// Full dump: profile header plus every histogram.
    pub fn print<W: Write>(&self, name: &str, w: &mut W) -> io::Result<()> {
        writeln!(w, "Profile Type: {name}")?;
        writeln!(w, "Total Weight: {}", self.weight)?;
        writeln!(w, "Bin Count:    {}", self.bincount)?;
        let mut bins_used = 0;
        for (i, h) in self.histograms.iter().enumerate() {
            writeln!(w, "\nIndex {i}:")?;
            h.print(w)?;
            bins_used += h.bins_used();
        }
        writeln!(w, " ** Total Histogram Bins Used: {bins_used}")
    }

    /// TSV of basic per-histogram facts for the nonzero histograms.
    pub fn print_histogram_info<W: Write>(&self, name: &str, w: &mut W) -> io::Result<()> {
        if self.histograms.is_empty() {
            tracing::warn!("no histograms");
        }
        writeln!(w, "#{name}Index\tmin\tmax\tused\tmean\tstdev\tweight\tmaxW")?;
        for (i, h) in self.histograms.iter().enumerate() {
            if !h.non_zero() {
                continue;
            }
            writeln!(
                w,
                "{}\t{:.6}\t{:.6}\t{:.4}\t{:.6}\t{:.6}\t{:.4}\t{:.4}",
                i,
                h.min(),
                h.max(),
                h.bins_used() as f64 / h.bins() as f64,
                h.mean(false),
                h.stdev(false),
                h.non_zero_weight() / h.total_weight(),
                h.max_weight() / h.total_weight(),
            )?;
        }
        Ok(())
    }

    /// TSV of shape statistics for the nonzero histograms.
    pub fn print_histogram_stats<W: Write>(&self, name: &str, w: &mut W) -> io::Result<()> {
        if self.histograms.is_empty() {
            tracing::warn!("no histograms");
        }
        writeln!(w, "#{name}Index\tP/H\tPval\tOcc\tCov\tML\tSpan\temdU\temdN")?;
        for (i, h) in self.histograms.iter().enumerate() {
            if !h.non_zero() {
                continue;
            }
            write!(w, "{i}\t")?;
            h.print_stats(w)?;
            writeln!(w)?;
        }
        Ok(())
    }

    /// One-line shape summary: how many locations are zero, points, or real
    /// histograms, split by full coverage.
    pub fn print_summary<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut items = 0;
        let mut zero = 0;
        let mut peq1cov1 = 0; // point == 1, 100% coverage
        let mut pneq1cov1 = 0; // point != 1, 100% coverage
        let mut peq1 = 0; // point == 1, <100% coverage
        let mut pneq1 = 0; // point != 1, <100% coverage
        let mut histcov1 = 0; // histogram, 100% coverage
        let mut hist = 0; // histogram, <100% coverage

        for h in &self.histograms {
            if !h.non_zero() {
                zero += 1;
                continue;
            }
            items += 1;
            let full_cov = h.coverage() > 1.0 - 1.0e-10;
            if h.is_point() {
                if (h.min() - 1.0).abs() < EPS {
                    if full_cov {
                        peq1cov1 += 1;
                    } else {
                        peq1 += 1;
                    }
                } else if full_cov {
                    pneq1cov1 += 1;
                } else {
                    pneq1 += 1;
                }
            } else if full_cov {
                histcov1 += 1;
            } else {
                hist += 1;
            }
        }

        if items == 0 {
            return writeln!(w, "0 (no live histograms, {zero} zero)");
        }
        writeln!(
            w,
            "{} & {} & {} & {} && {} & {}",
            items,
            (hist + histcov1) * 100 / items,
            hist,
            histcov1,
            (pneq1 + pneq1cov1) * 100 / items,
            (peq1 + peq1cov1) * 100 / items,
        )
    }

    /// Report `1 − overlap` (excluding and including zero mass) for every
    /// location present in either profile. Used by the edge and call
    /// variants, whose slot indices are comparable across profiles.
    pub fn print_drift<W: Write>(&self, other: &ProfileCore, name: &str, w: &mut W) -> io::Result<()> {
        let mut union: Vec<usize> = Vec::new();
        for i in 0..self.size().max(other.size()) {
            let a = self.histogram(i).map(|h| h.non_zero()).unwrap_or(false);
            let b = other.histogram(i).map(|h| h.non_zero()).unwrap_or(false);
            if a || b {
                union.push(i);
            }
        }
        if union.is_empty() {
            tracing::warn!("no histograms");
        }

        writeln!(w, "#{name}Index\t0-out\t0-in")?;
        for i in union {
            let (a, b) = (self.histogram(i), other.histogram(i));
            let (a, b) = match (a, b) {
                (Some(a), Some(b)) if a.non_zero() && b.non_zero() => (a, b),
                _ => {
                    tracing::warn!(index = i, "histogram only exists in one profile");
                    writeln!(w, "{i}\t1.0\t1.0")?;
                    continue;
                }
            };
            if a.is_point() && b.is_point() && (a.min() - b.min()).abs() > EPS {
                tracing::warn!(index = i, "histograms have different point values");
                writeln!(w, "{i}\t1.0\t1.0")?;
                continue;
            }
            writeln!(
                w,
                "{}\t{:.6}\t{:.6}",
                i,
                1.0 - a.overlap(b, false),
                1.0 - a.overlap(b, true)
            )?;
        }
        Ok(())
    }
}

// =============================================================================
// Sum type
// =============================================================================

/// A combined profile of any kind; the factory and merge lists operate on
/// this.
#[derive(Debug)]
pub enum CombinedProfile {
    Edge(CombinedEdgeProfile),
    Path(CombinedPathProfile),
    Call(CombinedCallProfile),
}

impl CombinedProfile {
    pub fn kind(&self) -> ProfileKind {
        match self {
            CombinedProfile::Edge(_) => ProfileKind::Edge,
            CombinedProfile::Path(_) => ProfileKind::Path,
            CombinedProfile::Call(_) => ProfileKind::Call,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn core(&self) -> &ProfileCore {
        match self {
            CombinedProfile::Edge(p) => p.core(),
            CombinedProfile::Path(p) => p.core(),
            CombinedProfile::Call(p) => p.core(),
        }
    }

    pub fn core_mut(&mut self) -> &mut ProfileCore {
        match self {
            CombinedProfile::Edge(p) => p.core_mut(),
            CombinedProfile::Path(p) => p.core_mut(),
            CombinedProfile::Call(p) => p.core_mut(),
        }
    }

    /// Serialize with the kind tag; returns the number of histograms
    /// written.
    pub fn serialize<W: Write>(&self, w: &mut ProfileWriter<W>) -> ProfileResult<usize> {
        match self {
            CombinedProfile::Edge(p) => p.serialize(w),
            CombinedProfile::Path(p) => p.serialize(w),
            CombinedProfile::Call(p) => p.serialize(w),
        }
    }

    pub fn as_edge(&self) -> Option<&CombinedEdgeProfile> {
        match self {
            CombinedProfile::Edge(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&CombinedPathProfile> {
        match self {
            CombinedProfile::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&CombinedCallProfile> {
        match self {
            CombinedProfile::Call(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_with_point(v: f64) -> ProfileCore {
        let mut core = ProfileCore::new();
        core.add_weight(1.0);
        let mut h = Histogram::new();
        h.add_to_list(v, 1.0);
        h.build_from_list(4, 1.0, None);
        core.histograms.push(h);
        core.bincount = 4;
        core
    }

    #[test]
    fn test_drift_identical_is_zero() {
        let a = core_with_point(0.5);
        let b = core_with_point(0.5);
        let mut out = Vec::new();
        a.print_drift(&b, "edge", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let row = text.lines().nth(1).unwrap();
        let cols: Vec<&str> = row.split('\t').collect();
        assert_eq!(cols[0], "0");
        assert!(cols[1].parse::<f64>().unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_drift_disjoint_is_one() {
        let a = core_with_point(0.5);
        let mut b = ProfileCore::new();
        b.add_weight(1.0);
        b.histograms.push(Histogram::new()); // never built
        let mut out = Vec::new();
        a.print_drift(&b, "edge", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().nth(1).unwrap().contains("1.0"));
    }

    #[test]
    fn test_summary_counts_points() {
        let core = core_with_point(1.0);
        let mut out = Vec::new();
        core.print_summary(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with('1'));
    }

    #[test]
    fn test_calc_bin_count_fallback() {
        assert_eq!(
            ProfileCore::calc_bin_count(&[], ProfileKind::Edge, DEFAULT_BINS),
            DEFAULT_BINS
        );
    }
}
