//! The weighted histogram at the core of combined profiling.
//!
//! A histogram is a fixed-bin distribution over a closed interval
//! `[min, max]` plus a running statistics record and a transient add list of
//! weighted samples. The lifecycle is: construct empty, append samples,
//! `build_from_list` (discretizes and clears the list), query. Values at or
//! below [`EPS`] are exact zeros: they never enter a bin but still count
//! toward the total weight, so `coverage` is well defined.
//!
//! FP imprecision usually shows up as nearly-zero values around 1e-312;
//! meaningful frequencies bottom out around 1e-10. The epsilon is
//! conservative for both.

use std::io::{self, Write};

use crate::io::{ProfileError, ProfileReader, ProfileResult, ProfileWriter};

/// Threshold below which a value is an exact zero.
pub const EPS: f64 = 1.0e-100;

/// A weighted sample: `(value, weight)`, `weight > 0`.
pub type WeightedValue = (f64, f64);

const POINT_FLAG: u32 = 0x8000_0000;

// =============================================================================
// Running statistics
// =============================================================================

/// Incremental moments over the nonzero samples, plus the total weight
/// including implicit zeros.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Stats {
    pub sum_of_values: f64,
    pub sum_of_squares: f64,
    /// Weight of nonzero samples only.
    pub sum_of_weights: f64,
    /// Weight including implicit zeros.
    pub total_weight: f64,
}

impl Stats {
    fn clear(&mut self) {
        *self = Stats::default();
    }

    /// Merge another record into this one; total weight is managed by the
    /// caller (it is a trial count, not a sum of sample weights).
    fn combine(&mut self, other: &Stats) {
        self.sum_of_values += other.sum_of_values;
        self.sum_of_squares += other.sum_of_squares;
        self.sum_of_weights += other.sum_of_weights;
    }

    fn mean(&self, incl_zeros: bool) -> f64 {
        let denom = if incl_zeros {
            self.total_weight
        } else {
            self.sum_of_weights
        };
        if denom <= EPS {
            0.0
        } else {
            self.sum_of_values / denom
        }
    }

    fn stdev(&self, incl_zeros: bool) -> f64 {
        let denom = if incl_zeros {
            self.total_weight
        } else {
            self.sum_of_weights
        };
        if denom <= EPS {
            return 0.0;
        }
        let mean = self.mean(incl_zeros);
        (self.sum_of_squares / denom - mean * mean).max(0.0).sqrt()
    }

    /// Normal CDF at `x` using this record's mean and stdev.
    fn phi(&self, x: f64) -> f64 {
        let mean = self.mean(false);
        let sd = self.stdev(false);
        if sd <= EPS {
            return if x < mean { 0.0 } else { 1.0 };
        }
        0.5 * (1.0 + erf((x - mean) / (sd * std::f64::consts::SQRT_2)))
    }
}

/// Abramowitz & Stegun 7.1.26 rational approximation (|err| < 1.5e-7).
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = ((((1.061_405_429 * t - 1.453_152_027) * t) + 1.421_413_741) * t
        - 0.284_496_736)
        * t
        + 0.254_829_592;
    sign * (1.0 - poly * t * (-x * x).exp())
}

// =============================================================================
// Histogram
// =============================================================================

/// Weighted binned distribution with a sample buffer. See the module docs
/// for the lifecycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    stats: Stats,
    min: f64,
    max: f64,
    bins: Vec<f64>,
    add_list: Vec<WeightedValue>,
}

impl Histogram {
    /// A zero-bin, zero-value histogram.
    pub fn new() -> Self {
        Histogram::default()
    }

    // -------------------------------------------------------------------------
    // Sample buffer
    // -------------------------------------------------------------------------

    pub fn add_to_list(&mut self, value: f64, weight: f64) {
        self.add_list.push((value, weight));
    }

    pub fn add_weighted(&mut self, wv: WeightedValue) {
        self.add_list.push(wv);
    }

    pub fn list_len(&self) -> usize {
        self.add_list.len()
    }

    pub fn clear_list(&mut self) {
        self.add_list.clear();
    }

    pub fn clear(&mut self) {
        *self = Histogram::default();
    }

    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Discretize the buffered samples into `bincount` bins and clear the
    /// buffer. Caller-supplied `bounds` are expanded, never contracted, to
    /// cover the observed sample range. `total_weight` is the weight
    /// including implicit zeros (typically the trial count).
    pub fn build_from_list(&mut self, bincount: u32, total_weight: f64, bounds: Option<(f64, f64)>) {
        let samples = std::mem::take(&mut self.add_list);
        self.stats.clear();
        self.stats.total_weight = total_weight;
        self.bins.clear();

        let mut obs_min = f64::MAX;
        let mut obs_max = f64::MIN;
        let mut any = false;
        for &(v, w) in &samples {
            if v > EPS {
                any = true;
                obs_min = obs_min.min(v);
                obs_max = obs_max.max(v);
                self.stats.sum_of_values += v * w;
                self.stats.sum_of_squares += v * v * w;
                self.stats.sum_of_weights += w;
            }
        }

        let (lo, hi) = match (any, bounds) {
            (true, Some((blo, bhi))) => (blo.min(obs_min), bhi.max(obs_max)),
            (true, None) => (obs_min, obs_max),
            (false, Some((blo, bhi))) => (blo, bhi.max(blo)),
            (false, None) => (0.0, 0.0),
        };
        self.min = lo;
        self.max = hi;

        if bincount == 0 {
            // never-built: queries answer defaults
            return;
        }

        // a point distribution collapses to one zero-width bin
        let nbins = if hi - lo <= EPS { 1 } else { bincount as usize };
        self.bins = vec![0.0; nbins];
        for &(v, w) in &samples {
            if v > EPS {
                let b = self.which_bin(v);
                self.bins[b] += w;
            }
        }
    }

    /// Merge-construct: one histogram over the union of the given nonzero
    /// constituents, preserving their exact moments.
    pub fn from_constituents(bincount: u32, total_weight: f64, parts: &[&Histogram]) -> Histogram {
        let mut h = Histogram::new();
        let mut lo = f64::MAX;
        let mut hi = f64::MIN;
        let mut any = false;
        let mut merged = Stats::default();

        for p in parts {
            if !p.non_zero() {
                continue;
            }
            any = true;
            lo = lo.min(p.min);
            hi = hi.max(p.max);
            merged.combine(&p.stats);
            for (v, w) in p.impulses() {
                h.add_to_list(v, w);
            }
        }

        let bounds = if any { Some((lo, hi)) } else { None };
        h.build_from_list(bincount, total_weight, bounds);

        // re-binning moved mass to bin centers; restore the exact moments
        if any {
            h.stats.sum_of_values = merged.sum_of_values;
            h.stats.sum_of_squares = merged.sum_of_squares;
            h.stats.sum_of_weights = merged.sum_of_weights;
        }
        h
    }

    /// The product distribution of two independent distributions. The result
    /// keeps this histogram's total weight; its support contains the product
    /// of the supports.
    pub fn cross(&self, other: &Histogram) -> Histogram {
        let total = if self.total_weight() > EPS {
            self.total_weight()
        } else {
            other.total_weight()
        };
        let mut h = Histogram::new();
        if !self.non_zero() || !other.non_zero() {
            h.build_from_list(0, total, None);
            return h;
        }

        let bincount = (self.bins() as u32).max(other.bins() as u32).max(1);
        let scale = total / (self.total_weight() * other.total_weight());
        for (va, wa) in self.impulses() {
            for (vb, wb) in other.impulses() {
                h.add_to_list(va * vb, wa * wb * scale);
            }
        }
        h.build_from_list(
            bincount,
            total,
            Some((self.min * other.min, self.max * other.max)),
        );
        h
    }

    /// Same range, bins, and weights totals, with the nonzero mass spread
    /// evenly.
    pub fn as_uniform(&self) -> Histogram {
        let mut h = self.clone();
        h.add_list.clear();
        if !self.non_zero() {
            return h;
        }
        let per_bin = self.non_zero_weight() / h.bins.len() as f64;
        for b in &mut h.bins {
            *b = per_bin;
        }
        let nz = self.non_zero_weight();
        h.stats.sum_of_values = nz * (self.min + self.max) / 2.0;
        h.stats.sum_of_squares =
            nz * (self.min * self.min + self.min * self.max + self.max * self.max) / 3.0;
        h
    }

    /// Same range, bins, and weight totals, with bin weights following the
    /// normal distribution implied by this histogram's mean and stdev
    /// (truncated to the range).
    pub fn as_normal(&self) -> Histogram {
        let mut h = self.clone();
        h.add_list.clear();
        if !self.non_zero() {
            return h;
        }
        let raw: Vec<f64> = (0..h.bins.len())
            .map(|b| self.stats.phi(self.bin_upper(b)) - self.stats.phi(self.bin_lower(b)))
            .collect();
        let sum: f64 = raw.iter().sum();
        let nz = self.non_zero_weight();
        if sum <= EPS {
            return self.as_uniform();
        }
        for (b, r) in h.bins.iter_mut().zip(raw) {
            *b = nz * r / sum;
        }
        h
    }

    // -------------------------------------------------------------------------
    // Bin geometry
    // -------------------------------------------------------------------------

    pub fn bins(&self) -> usize {
        self.bins.len()
    }

    pub fn bin_width(&self) -> f64 {
        if self.bins.len() <= 1 {
            0.0
        } else {
            (self.max - self.min) / self.bins.len() as f64
        }
    }

    pub fn bin_lower(&self, b: usize) -> f64 {
        self.min + self.bin_width() * b as f64
    }

    pub fn bin_upper(&self, b: usize) -> f64 {
        if b + 1 == self.bins.len() {
            self.max
        } else {
            self.min + self.bin_width() * (b + 1) as f64
        }
    }

    pub fn bin_center(&self, b: usize) -> f64 {
        if self.is_point() {
            self.min
        } else {
            (self.bin_lower(b) + self.bin_upper(b)) / 2.0
        }
    }

    pub fn bin_weight(&self, b: usize) -> f64 {
        self.bins.get(b).copied().unwrap_or(0.0)
    }

    /// The bin covering `v`; the last bin is closed on the right.
    pub fn which_bin(&self, v: f64) -> usize {
        let n = self.bins.len();
        if n <= 1 {
            return 0;
        }
        let w = self.bin_width();
        if w <= 0.0 {
            return 0;
        }
        (((v - self.min) / w).floor() as i64).clamp(0, n as i64 - 1) as usize
    }

    /// Impulse representation: `(bin center, weight)` for every used bin; a
    /// point histogram is a single impulse.
    pub(crate) fn impulses(&self) -> Vec<WeightedValue> {
        if !self.non_zero() {
            return Vec::new();
        }
        if self.is_point() {
            return vec![(self.min, self.non_zero_weight())];
        }
        (0..self.bins.len())
            .filter(|&b| self.bins[b] > 0.0)
            .map(|b| (self.bin_center(b), self.bins[b]))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Basic queries
    // -------------------------------------------------------------------------

    /// Whether the histogram has been built with any nonzero mass.
    pub fn non_zero(&self) -> bool {
        !self.bins.is_empty() && self.stats.sum_of_weights > EPS
    }

    pub fn is_point(&self) -> bool {
        self.non_zero() && (self.max - self.min) <= EPS
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn non_zero_weight(&self) -> f64 {
        self.stats.sum_of_weights
    }

    pub fn zero_weight(&self) -> f64 {
        (self.stats.total_weight - self.stats.sum_of_weights).max(0.0)
    }

    pub fn total_weight(&self) -> f64 {
        self.stats.total_weight
    }

    pub fn max_weight(&self) -> f64 {
        self.bins.iter().copied().fold(0.0, f64::max)
    }

    pub fn bins_used(&self) -> usize {
        self.bins.iter().filter(|&&w| w > 0.0).count()
    }

    /// Fraction of bins holding weight.
    pub fn occupancy(&self) -> f64 {
        if self.bins.is_empty() {
            0.0
        } else {
            self.bins_used() as f64 / self.bins.len() as f64
        }
    }

    /// Fraction of total weight assigned to nonzero samples.
    pub fn coverage(&self) -> f64 {
        if self.stats.total_weight <= EPS {
            0.0
        } else {
            self.stats.sum_of_weights / self.stats.total_weight
        }
    }

    /// Center of the heaviest bin (mode estimate).
    pub fn max_likelihood(&self) -> f64 {
        if !self.non_zero() {
            return 0.0;
        }
        let best = (0..self.bins.len())
            .max_by(|&a, &b| self.bins[a].partial_cmp(&self.bins[b]).unwrap())
            .unwrap_or(0);
        self.bin_center(best)
    }

    pub fn mean(&self, incl_zeros: bool) -> f64 {
        self.stats.mean(incl_zeros)
    }

    pub fn stdev(&self, incl_zeros: bool) -> f64 {
        self.stats.stdev(incl_zeros)
    }

    // -------------------------------------------------------------------------
    // Distribution queries
    // -------------------------------------------------------------------------

    /// The q-th weighted percentile with linear interpolation inside the
    /// containing bin. `quantile(0) == min`, `quantile(1) == max`.
    pub fn quantile(&self, q: f64) -> f64 {
        if !self.non_zero() {
            return 0.0;
        }
        let q = q.clamp(0.0, 1.0);
        if q <= 0.0 {
            return self.min;
        }
        if q >= 1.0 || self.is_point() {
            return if q >= 1.0 { self.max } else { self.min };
        }
        let target = q * self.non_zero_weight();
        let mut cum = 0.0;
        for b in 0..self.bins.len() {
            let w = self.bins[b];
            if w <= 0.0 {
                continue;
            }
            if cum + w >= target {
                let frac = (target - cum) / w;
                return self.bin_lower(b) + frac * (self.bin_upper(b) - self.bin_lower(b));
            }
            cum += w;
        }
        self.max
    }

    pub fn quantile_range(&self, lo: f64, hi: f64) -> (f64, f64) {
        (self.quantile(lo), self.quantile(hi))
    }

    /// `P(X < v)` relative to the total weight, counting the implicit zero
    /// mass at value 0 and using a per-bin uniform approximation.
    pub fn prob_less_than(&self, v: f64) -> f64 {
        if self.total_weight() <= EPS || self.bins.is_empty() {
            return 0.0;
        }
        let mut mass = 0.0;
        if v > EPS {
            mass += self.zero_weight();
        }
        if self.is_point() {
            if self.min < v {
                mass += self.non_zero_weight();
            }
        } else {
            for b in 0..self.bins.len() {
                let w = self.bins[b];
                if w <= 0.0 {
                    continue;
                }
                let (l, u) = (self.bin_lower(b), self.bin_upper(b));
                if u <= v {
                    mass += w;
                } else if l < v {
                    mass += w * (v - l) / (u - l);
                }
            }
        }
        mass / self.total_weight()
    }

    pub fn prob_between(&self, l: f64, u: f64) -> f64 {
        (self.prob_less_than(u) - self.prob_less_than(l)).max(0.0)
    }

    /// Estimate of `P(self < Y)` against the impulses of `Y`.
    pub fn est_prob_less_than(&self, y: &Histogram) -> f64 {
        if !self.non_zero() || !y.non_zero() {
            return 0.0;
        }
        let ynz = y.non_zero_weight();
        y.impulses()
            .iter()
            .map(|&(v, w)| (w / ynz) * self.prob_less_than(v))
            .sum()
    }

    /// Total weight falling inside `[lb, ub]`, end bins weighted by the
    /// covered fraction of their range.
    pub fn range_weight(&self, lb: f64, ub: f64) -> f64 {
        if !self.non_zero() || ub < lb {
            return 0.0;
        }
        if self.is_point() {
            return if self.min >= lb && self.min <= ub {
                self.non_zero_weight()
            } else {
                0.0
            };
        }
        let mut acc = 0.0;
        for b in 0..self.bins.len() {
            let w = self.bins[b];
            if w <= 0.0 {
                continue;
            }
            let (l, u) = (self.bin_lower(b), self.bin_upper(b));
            let ov = (u.min(ub) - l.max(lb)).max(0.0);
            if u > l {
                acc += w * ov / (u - l);
            }
        }
        acc
    }

    /// Sum `f(center, weight)` over impulses inside `[lb, ub]`; partially
    /// covered end bins contribute the covered fraction of their weight.
    pub fn apply_on_range<F: Fn(f64, f64) -> f64>(&self, lb: f64, ub: f64, f: F) -> f64 {
        if !self.non_zero() || ub < lb {
            return 0.0;
        }
        if self.is_point() {
            return if self.min >= lb && self.min <= ub {
                f(self.min, self.non_zero_weight())
            } else {
                0.0
            };
        }
        let mut acc = 0.0;
        for b in 0..self.bins.len() {
            let w = self.bins[b];
            if w <= 0.0 {
                continue;
            }
            let (l, u) = (self.bin_lower(b), self.bin_upper(b));
            let ov = (u.min(ub) - l.max(lb)).max(0.0);
            if ov > 0.0 && u > l {
                acc += f(self.bin_center(b), w * ov / (u - l));
            }
        }
        acc
    }

    /// [`Self::apply_on_range`] with the range given by quantile points.
    pub fn apply_on_quantile<F: Fn(f64, f64) -> f64>(&self, ql: f64, qh: f64, f: F) -> f64 {
        self.apply_on_range(self.quantile(ql), self.quantile(qh), f)
    }

    /// The dead-simple function to apply.
    pub fn product(v: f64, w: f64) -> f64 {
        v * w
    }

    // -------------------------------------------------------------------------
    // Pairwise comparisons
    // -------------------------------------------------------------------------

    fn common_grid(&self, other: &Histogram) -> (f64, f64, usize) {
        let lo = self.min.min(other.min);
        let hi = self.max.max(other.max);
        let mut n = self.bins.len().max(other.bins.len()).max(1);
        // when the supports differ, the coarser side's bins cannot resolve
        // the union range; refine so re-binning stays meaningful
        if (self.min - other.min).abs() > EPS || (self.max - other.max).abs() > EPS {
            n = n.max(20);
        }
        (lo, hi, n)
    }

    /// Distribute this histogram's mass onto a common grid, proportional to
    /// range overlap.
    fn grid_weights(&self, glo: f64, ghi: f64, n: usize) -> Vec<f64> {
        let mut out = vec![0.0; n];
        if !self.non_zero() {
            return out;
        }
        let gw = (ghi - glo) / n as f64;
        let slot = |v: f64| -> usize {
            if gw <= 0.0 {
                0
            } else {
                (((v - glo) / gw).floor() as i64).clamp(0, n as i64 - 1) as usize
            }
        };
        if self.is_point() {
            out[slot(self.min)] += self.non_zero_weight();
            return out;
        }
        for b in 0..self.bins.len() {
            let w = self.bins[b];
            if w <= 0.0 {
                continue;
            }
            let (l, u) = (self.bin_lower(b), self.bin_upper(b));
            if u <= l || gw <= 0.0 {
                out[slot(self.bin_center(b))] += w;
                continue;
            }
            let g0 = slot(l);
            let g1 = slot(u - gw * 1e-12);
            for g in g0..=g1 {
                let gl = glo + gw * g as f64;
                let gu = gl + gw;
                let ov = (u.min(gu) - l.max(gl)).max(0.0);
                out[g] += w * ov / (u - l);
            }
        }
        out
    }

    /// Sum over a common grid of `min(w_self, w_other)` on normalized
    /// weights; symmetric, in `[0, 1]`, and `1` iff the distributions agree
    /// on the grid. `include_zero` adds the overlap of the zero masses.
    pub fn overlap(&self, other: &Histogram, include_zero: bool) -> f64 {
        let a_live = self.non_zero();
        let b_live = other.non_zero();
        if !a_live && !b_live {
            return 1.0;
        }
        if !a_live || !b_live {
            return 0.0;
        }

        let (ta, tb) = if include_zero {
            (self.total_weight(), other.total_weight())
        } else {
            (self.non_zero_weight(), other.non_zero_weight())
        };
        if ta <= EPS || tb <= EPS {
            return 0.0;
        }

        // two point masses agree exactly or not at all
        if self.is_point() && other.is_point() {
            let mut ov = if (self.min - other.min).abs() <= EPS {
                (self.non_zero_weight() / ta).min(other.non_zero_weight() / tb)
            } else {
                0.0
            };
            if include_zero {
                ov += (self.zero_weight() / ta).min(other.zero_weight() / tb);
            }
            return ov.min(1.0);
        }

        let (glo, ghi, n) = self.common_grid(other);
        let wa = self.grid_weights(glo, ghi, n);
        let wb = other.grid_weights(glo, ghi, n);
        let mut ov: f64 = wa
            .iter()
            .zip(&wb)
            .map(|(&a, &b)| (a / ta).min(b / tb))
            .sum();
        if include_zero {
            ov += (self.zero_weight() / ta).min(other.zero_weight() / tb);
        }
        ov.min(1.0)
    }

    /// Earth mover's distance on the common grid:
    /// `Σ |CDF_self − CDF_other| · bin_width`. Nonnegative, symmetric, zero
    /// iff identical on the grid.
    pub fn earth_mover(&self, other: &Histogram) -> f64 {
        if !self.non_zero() && !other.non_zero() {
            return 0.0;
        }
        let (glo, ghi, n) = self.common_grid(other);
        let gw = ((ghi - glo) / n as f64).max(0.0);
        let wa = self.grid_weights(glo, ghi, n);
        let wb = other.grid_weights(glo, ghi, n);
        let na = self.non_zero_weight();
        let nb = other.non_zero_weight();
        let mut cdf_a = 0.0;
        let mut cdf_b = 0.0;
        let mut dist = 0.0;
        for g in 0..n {
            if na > EPS {
                cdf_a += wa[g] / na;
            }
            if nb > EPS {
                cdf_b += wb[g] / nb;
            }
            dist += (cdf_a - cdf_b).abs() * gw;
        }
        dist
    }

    // -------------------------------------------------------------------------
    // Serialization
    // -------------------------------------------------------------------------

    /// Write this histogram under the given location id. Layout:
    /// `{u32 id, u32 bincount|point, f64 min, f64 max, f64 nonzero weight,
    /// bincount × f64 bin weights}`.
    pub fn serialize<W: Write>(&self, id: u32, w: &mut ProfileWriter<W>) -> ProfileResult<()> {
        let mut word = self.bins.len() as u32;
        if self.is_point() {
            word |= POINT_FLAG;
        }
        w.write_u32(id)?;
        w.write_u32(word)?;
        w.write_f64(self.min)?;
        w.write_f64(self.max)?;
        w.write_f64(self.stats.sum_of_weights)?;
        for &b in &self.bins {
            w.write_f64(b)?;
        }
        Ok(())
    }

    /// Read one histogram; returns its location id. A bin-weight/header
    /// mismatch is a format error and yields no histogram.
    pub fn deserialize<R: io::Read>(
        total_weight: f64,
        r: &mut ProfileReader<R>,
    ) -> ProfileResult<(u32, Histogram)> {
        let id = r.read_u32()?;
        let word = r.read_u32()?;
        let bincount = (word & !POINT_FLAG) as usize;
        let min = r.read_f64()?;
        let max = r.read_f64()?;
        let nz_weight = r.read_f64()?;
        let mut bins = Vec::with_capacity(bincount);
        for _ in 0..bincount {
            bins.push(r.read_f64()?);
        }

        let sum: f64 = bins.iter().sum();
        if (sum - nz_weight).abs() > 1e-9 * nz_weight.abs().max(1.0) {
            return Err(ProfileError::Format(format!(
                "histogram {id}: bin weights sum to {sum}, header says {nz_weight}"
            )));
        }

        let mut h = Histogram {
            stats: Stats {
                total_weight,
                sum_of_weights: nz_weight,
                ..Stats::default()
            },
            min,
            max,
            bins,
            add_list: Vec::new(),
        };
        // moments re-estimated from the impulses
        for (v, w) in h.impulses() {
            h.stats.sum_of_values += v * w;
            h.stats.sum_of_squares += v * v * w;
        }
        Ok((id, h))
    }

    // -------------------------------------------------------------------------
    // Printing
    // -------------------------------------------------------------------------

    pub fn print<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(
            w,
            "range [{:.6}, {:.6}], weight {:.3}/{:.3}, {} bins",
            self.min,
            self.max,
            self.non_zero_weight(),
            self.total_weight(),
            self.bins.len()
        )?;
        for b in 0..self.bins.len() {
            if self.bins[b] > 0.0 {
                writeln!(
                    w,
                    "  [{:.6}, {:.6}) {:.4}",
                    self.bin_lower(b),
                    self.bin_upper(b),
                    self.bins[b]
                )?;
            }
        }
        Ok(())
    }

    /// One stats row: `P/H  Pval  Occ  Cov  ML  Span  emdU  emdN`
    /// (no trailing newline).
    pub fn print_stats<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let kind = if self.is_point() { "P" } else { "H" };
        let pval = if self.is_point() { self.min } else { 0.0 };
        write!(
            w,
            "{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}\t{:.4}\t{:.4}\t{:.4}",
            kind,
            pval,
            self.occupancy(),
            self.coverage(),
            self.max_likelihood(),
            self.span(),
            self.earth_mover(&self.as_uniform()),
            self.earth_mover(&self.as_normal()),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
