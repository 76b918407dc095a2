//! The combined path profile: per-function, per-path frequency histograms.
//!
//! Path numbering itself is a host service (Ball-Larus style numbering of
//! the acyclic CFG); this module only consumes it through the
//! [`PathNumbering`] trait to decide which recorded paths count toward a
//! trial's "normal" execution total.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::histogram::Histogram;
use crate::io::{ProfileReader, ProfileResult, ProfileWriter, RecordTag};
use crate::profile::{CombinedProfile, ProfileCore, ProfileKind};

/// `(function number, path number)`; function numbers are 1-based in the
/// profile format.
pub type PathId = (u32, u32);

// =============================================================================
// Path numbering seam
// =============================================================================

/// Opaque path-numbering service. A path that is not "normal" (a back-edge
/// or split-phony path) is excluded from the per-trial execution total that
/// normalizes path frequencies.
pub trait PathNumbering {
    fn is_normal_path(&self, function_number: u32, path_number: u32) -> bool;
}

/// Numbering that treats every recorded path as normal. Adequate for
/// acyclic functions and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformNumbering;

impl PathNumbering for UniformNumbering {
    fn is_normal_path(&self, _function_number: u32, _path_number: u32) -> bool {
        true
    }
}

// =============================================================================
// Combined path profile
// =============================================================================

/// Path-kind combined profile. Histogram slots are contiguous in the
/// vector but not position-significant; the nested map carries
/// `function → path → slot`.
#[derive(Debug, Default)]
pub struct CombinedPathProfile {
    core: ProfileCore,
    functions: BTreeMap<u32, BTreeMap<u32, usize>>,
}

impl CombinedPathProfile {
    pub fn new() -> Self {
        CombinedPathProfile::default()
    }

    pub fn core(&self) -> &ProfileCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut ProfileCore {
        &mut self.core
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Whether the `(function, path)` pair already owns a slot.
    pub fn valid(&self, path: PathId) -> bool {
        self.functions
            .get(&path.0)
            .map(|paths| paths.contains_key(&path.1))
            .unwrap_or(false)
    }

    pub fn histogram(&self, path: PathId) -> Option<&Histogram> {
        let slot = *self.functions.get(&path.0)?.get(&path.1)?;
        self.core.histogram(slot)
    }

    /// The slot histogram for a path, allocated on demand.
    pub fn histogram_mut(&mut self, path: PathId) -> &mut Histogram {
        let next_slot = self.core.histograms.len();
        let slot = *self
            .functions
            .entry(path.0)
            .or_default()
            .entry(path.1)
            .or_insert(next_slot);
        if slot == next_slot {
            self.core.histograms.push(Histogram::new());
        }
        &mut self.core.histograms[slot]
    }

    /// Every `(function, path)` pair holding a slot.
    pub fn path_set(&self) -> Vec<PathId> {
        self.functions
            .iter()
            .flat_map(|(&f, paths)| paths.keys().map(move |&p| (f, p)))
            .collect()
    }

    /// Ingest one trial's raw path counters. Each recorded path's frequency
    /// is its counter over the function's total normal-path executions.
    pub fn add_profile<R: Read>(
        &mut self,
        r: &mut ProfileReader<R>,
        numbering: &dyn PathNumbering,
    ) -> ProfileResult<()> {
        let function_count = r.read_u32()?;
        self.core.add_weight(1.0);

        for _ in 0..function_count {
            let fn_number = r.read_u32()?;
            let entries = r.read_u32()?;

            let mut paths: Vec<(u32, u32)> = Vec::with_capacity(entries as usize);
            let mut total: u64 = 0;
            for _ in 0..entries {
                let path_number = r.read_u32()?;
                let counter = r.read_u32()?;
                paths.push((path_number, counter));
                if numbering.is_normal_path(fn_number, path_number) {
                    total = total.saturating_add(u64::from(counter));
                }
            }

            if total == 0 {
                if paths.iter().any(|&(_, c)| c > 0) {
                    tracing::warn!(
                        function = fn_number,
                        "path trial has counts but no normal-path executions; skipped"
                    );
                }
                continue;
            }

            for (path_number, counter) in paths {
                if counter > 0 {
                    let freq = f64::from(counter) / total as f64;
                    self.histogram_mut((fn_number, path_number))
                        .add_to_list(freq, 1.0);
                }
            }
        }
        Ok(())
    }

    /// Write the profile: the common header counts functions, and each
    /// function's histograms follow a `{function number, entry count}`
    /// header, keyed by path number.
    pub fn serialize<W: Write>(&self, w: &mut ProfileWriter<W>) -> ProfileResult<usize> {
        w.write_tag(RecordTag::CombinedPath)?;
        w.write_f64(self.core.weight)?;
        w.write_u32(self.functions.len() as u32)?;
        w.write_u32(self.core.bincount)?;

        let mut written = 0;
        for (&fn_number, paths) in &self.functions {
            w.write_u32(fn_number)?;
            w.write_u32(paths.len() as u32)?;
            for (&path_number, &slot) in paths {
                self.core.histograms[slot].serialize(path_number, w)?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Inverse of [`Self::serialize`]; the kind tag has already been
    /// consumed.
    pub fn deserialize<R: Read>(r: &mut ProfileReader<R>) -> ProfileResult<CombinedPathProfile> {
        let mut cp = CombinedPathProfile::new();
        cp.core.weight = r.read_f64()?;
        let function_count = r.read_u32()?;
        cp.core.bincount = r.read_u32()?;

        for _ in 0..function_count {
            let fn_number = r.read_u32()?;
            let entries = r.read_u32()?;
            for _ in 0..entries {
                let (path_number, hist) = Histogram::deserialize(cp.core.weight, r)?;
                let slot = cp.core.histograms.len();
                cp.core.histograms.push(hist);
                cp.functions
                    .entry(fn_number)
                    .or_default()
                    .insert(path_number, slot);
            }
        }
        Ok(cp)
    }

    /// Merge same-kind profiles keyed by `(function, path)`.
    pub fn build_from_list(&mut self, list: &[CombinedProfile], bincount: u32) {
        if list.is_empty() {
            return;
        }
        let refs: Vec<&CombinedProfile> = list.iter().collect();
        self.core.bincount = if bincount == 0 {
            ProfileCore::calc_bin_count(&refs, ProfileKind::Path, crate::profile::DEFAULT_BINS)
        } else {
            bincount
        };
        self.core.weight = 0.0;

        let mut keys: Vec<PathId> = Vec::new();
        for cp in list {
            match cp {
                CombinedProfile::Path(p) => {
                    self.core.add_weight(p.core.weight);
                    keys.extend(p.path_set());
                }
                other => {
                    tracing::warn!(kind = other.name(), "non-path profile in path merge list");
                }
            }
        }
        keys.sort_unstable();
        keys.dedup();

        let weight = self.core.weight;
        let bc = self.core.bincount;
        self.core.histograms.clear();
        self.functions.clear();
        for key in keys {
            let parts: Vec<&Histogram> = list
                .iter()
                .filter_map(|cp| cp.as_path())
                .filter_map(|p| p.histogram(key))
                .filter(|h| h.non_zero())
                .collect();
            let merged = Histogram::from_constituents(bc, weight, &parts);
            let slot = self.core.histograms.len();
            self.core.histograms.push(merged);
            self.functions.entry(key.0).or_default().insert(key.1, slot);
        }
    }

    /// Drift keyed by path id; slot indices are not comparable across path
    /// profiles, so the common index-based report does not apply.
    pub fn print_drift<W: Write>(&self, other: &CombinedPathProfile, w: &mut W) -> std::io::Result<()> {
        let mut paths = self.path_set();
        paths.extend(other.path_set());
        paths.sort_unstable();
        paths.dedup();

        writeln!(w, "#pathID\t0-out\t0-in")?;
        for p in paths {
            let (a, b) = match (self.histogram(p), other.histogram(p)) {
                (Some(a), Some(b)) if a.non_zero() && b.non_zero() => (a, b),
                _ => {
                    tracing::warn!(function = p.0, path = p.1, "path exists in only one profile");
                    continue;
                }
            };
            if a.is_point() && b.is_point() {
                continue;
            }
            writeln!(
                w,
                "{}-{}\t{:.6}\t{:.6}",
                p.0,
                p.1,
                1.0 - a.overlap(b, false),
                1.0 - a.overlap(b, true)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One trial: function 1 ran path 0 thirty times and path 2 ten times.
    fn raw_path_trial() -> Vec<u8> {
        let mut w = ProfileWriter::new(Vec::new());
        w.write_u32(1).unwrap(); // one function block
        w.write_u32(1).unwrap(); // function number
        w.write_u32(2).unwrap(); // entries
        w.write_u32(0).unwrap(); // path 0
        w.write_u32(30).unwrap();
        w.write_u32(2).unwrap(); // path 2
        w.write_u32(10).unwrap();
        w.into_inner()
    }

    #[test]
    fn test_path_frequencies() {
        let mut cp = CombinedPathProfile::new();
        let raw = raw_path_trial();
        let mut r = ProfileReader::new(raw.as_slice());
        cp.add_profile(&mut r, &UniformNumbering).unwrap();
        cp.core_mut().build_histograms(4);

        assert_eq!(cp.core().total_weight(), 1.0);
        assert_eq!(cp.function_count(), 1);
        assert!(cp.valid((1, 0)));
        assert!(cp.valid((1, 2)));
        assert!(!cp.valid((1, 1)));

        let h0 = cp.histogram((1, 0)).unwrap();
        let h2 = cp.histogram((1, 2)).unwrap();
        assert!((h0.mean(false) - 0.75).abs() < 1e-12);
        assert!((h2.mean(false) - 0.25).abs() < 1e-12);
    }

    /// Excluding a path from the normal set changes the denominator.
    struct OnlyPathZero;
    impl PathNumbering for OnlyPathZero {
        fn is_normal_path(&self, _f: u32, p: u32) -> bool {
            p == 0
        }
    }

    #[test]
    fn test_non_normal_paths_excluded_from_total() {
        let mut cp = CombinedPathProfile::new();
        let raw = raw_path_trial();
        let mut r = ProfileReader::new(raw.as_slice());
        cp.add_profile(&mut r, &OnlyPathZero).unwrap();
        cp.core_mut().build_histograms(4);

        // total is 30, so path 0 is at frequency 1.0 and path 2 at 1/3
        let h0 = cp.histogram((1, 0)).unwrap();
        let h2 = cp.histogram((1, 2)).unwrap();
        assert!((h0.mean(false) - 1.0).abs() < 1e-12);
        assert!((h2.mean(false) - 10.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut cp = CombinedPathProfile::new();
        let raw = raw_path_trial();
        let mut r = ProfileReader::new(raw.as_slice());
        cp.add_profile(&mut r, &UniformNumbering).unwrap();
        cp.core_mut().build_histograms(4);

        let mut w = ProfileWriter::new(Vec::new());
        let written = cp.serialize(&mut w).unwrap();
        assert_eq!(written, 2);
        let buf = w.into_inner();

        let mut r = ProfileReader::new(buf.as_slice());
        assert_eq!(r.read_tag().unwrap(), Some(RecordTag::CombinedPath as u32));
        let cp2 = CombinedPathProfile::deserialize(&mut r).unwrap();

        assert_eq!(cp2.function_count(), 1);
        assert_eq!(cp2.path_set(), cp.path_set());
        let a = cp.histogram((1, 0)).unwrap();
        let b = cp2.histogram((1, 0)).unwrap();
        assert!((a.min() - b.min()).abs() < 1e-12);
        assert!((a.non_zero_weight() - b.non_zero_weight()).abs() < 1e-9);
    }

    #[test]
    fn test_build_from_list_unions_paths() {
        let mk = |path: u32, count: u32| {
            let mut w = ProfileWriter::new(Vec::new());
            w.write_u32(1).unwrap();
            w.write_u32(1).unwrap();
            w.write_u32(1).unwrap();
            w.write_u32(path).unwrap();
            w.write_u32(count).unwrap();
            let raw = w.into_inner();
            let mut cp = CombinedPathProfile::new();
            let mut r = ProfileReader::new(raw.as_slice());
            cp.add_profile(&mut r, &UniformNumbering).unwrap();
            cp.core_mut().build_histograms(4);
            CombinedProfile::Path(cp)
        };
        let list = vec![mk(0, 5), mk(3, 7)];

        let mut merged = CombinedPathProfile::new();
        merged.build_from_list(&list, 0);

        assert_eq!(merged.core().total_weight(), 2.0);
        assert_eq!(merged.path_set(), vec![(1, 0), (1, 3)]);
        assert!(merged.histogram((1, 0)).unwrap().non_zero());
        assert!(merged.histogram((1, 3)).unwrap().non_zero());
    }
}
