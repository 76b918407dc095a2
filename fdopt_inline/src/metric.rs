//! The named metric registry.
//!
//! A metric maps `(call record, benefit)` to a raw score over the record's
//! frequency histogram; the driver then normalizes by inlining cost. The
//! quantile-driven metrics (`QP*`, `QR*`) read their probe points from the
//! [`MetricConfig`], validated and percent-normalized at selection time.

use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::record::CallRecord;
use fdopt_profile::Histogram;

/// Quantile points for the `Q*` metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricConfig {
    pub quantiles: SmallVec<[f64; 8]>,
}

/// A scoring function over `(record, benefit)`.
pub type MetricFn = fn(&CallRecord, f64, &MetricConfig) -> f64;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum MetricError {
    Unknown(String),
    /// A point metric needs at least one quantile.
    MissingPoints,
    /// A range metric needs at least one pair of quantiles.
    MissingRanges,
    /// Range metrics take quantiles in pairs.
    OddQuantileCount(usize),
    QuantileOutOfRange(f64),
}

impl fmt::Display for MetricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricError::Unknown(name) => write!(f, "unknown metric: {name}"),
            MetricError::MissingPoints => write!(f, "no quantile points given for a point metric"),
            MetricError::MissingRanges => write!(f, "need two quantiles for a range metric"),
            MetricError::OddQuantileCount(n) => {
                write!(f, "odd number of quantiles ({n}) for a range metric")
            }
            MetricError::QuantileOutOfRange(q) => {
                write!(f, "quantile out of range [0,1]: {q}")
            }
        }
    }
}

impl std::error::Error for MetricError {}

// =============================================================================
// Selection
// =============================================================================

fn registry() -> FxHashMap<&'static str, MetricFn> {
    let mut map: FxHashMap<&'static str, MetricFn> = FxHashMap::default();
    // static metrics
    map.insert("null", null_metric as MetricFn);
    map.insert("never", never_metric);
    map.insert("anti", anti_metric);
    map.insert("benefit", benefit_metric);
    // simple point metrics
    map.insert("mean", mean_metric);
    map.insert("min", min_metric);
    map.insert("max", max_metric);
    // distribution point metrics
    map.insert("QPoint", qp_linear_metric);
    map.insert("QPLinear", qp_linear_metric);
    map.insert("QPSqrt", qp_sqrt_metric);
    // distribution range metrics
    map.insert("QRange", qr_linear_metric);
    map.insert("QRLinear", qr_linear_metric);
    map.insert("QRSqrt", qr_sqrt_metric);
    map
}

/// Every registered metric name, for CLI help.
pub fn metric_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = registry().keys().copied().collect();
    names.sort_unstable();
    names
}

/// Resolve a metric by name. For `Q*` metrics the config's quantile list is
/// validated and normalized in place: values in (1, 100] are percents.
pub fn select_metric(name: &str, cfg: &mut MetricConfig) -> Result<MetricFn, MetricError> {
    let metric = *registry()
        .get(name)
        .ok_or_else(|| MetricError::Unknown(name.to_string()))?;

    if name.starts_with('Q') {
        let n = cfg.quantiles.len();
        match name.as_bytes().get(1).copied() {
            Some(b'P') => {
                if n < 1 {
                    return Err(MetricError::MissingPoints);
                }
            }
            Some(b'R') => {
                if n < 2 {
                    return Err(MetricError::MissingRanges);
                }
                if n % 2 != 0 {
                    return Err(MetricError::OddQuantileCount(n));
                }
            }
            _ => return Err(MetricError::Unknown(name.to_string())),
        }
        for q in cfg.quantiles.iter_mut() {
            if *q > 1.0 && *q <= 100.0 {
                *q /= 100.0;
            }
            if !(0.0..=1.0).contains(q) {
                return Err(MetricError::QuantileOutOfRange(*q));
            }
        }
    }

    tracing::debug!(metric = name, quantiles = ?cfg.quantiles, "metric selected");
    Ok(metric)
}

// =============================================================================
// Metric functions
// =============================================================================

fn null_metric(_rec: &CallRecord, _benefit: f64, _cfg: &MetricConfig) -> f64 {
    0.0
}

fn never_metric(_rec: &CallRecord, _benefit: f64, _cfg: &MetricConfig) -> f64 {
    -1.0
}

fn benefit_metric(_rec: &CallRecord, benefit: f64, _cfg: &MetricConfig) -> f64 {
    benefit
}

/// Deliberately pessimal ordering, for experiments: least benefit with the
/// largest body first.
fn anti_metric(rec: &CallRecord, benefit: f64, _cfg: &MetricConfig) -> f64 {
    let size = rec.inline_size_cached() as f64;
    (1.0e6 - benefit) * size * size
}

fn mean_metric(rec: &CallRecord, benefit: f64, _cfg: &MetricConfig) -> f64 {
    rec.hist.mean(false) * benefit * rec.hist.coverage()
}

fn max_metric(rec: &CallRecord, benefit: f64, _cfg: &MetricConfig) -> f64 {
    rec.hist.max() * benefit
}

fn min_metric(rec: &CallRecord, benefit: f64, _cfg: &MetricConfig) -> f64 {
    rec.hist.min() * benefit * rec.hist.coverage()
}

fn qp_linear_metric(rec: &CallRecord, benefit: f64, cfg: &MetricConfig) -> f64 {
    cfg.quantiles
        .iter()
        .map(|&q| rec.hist.quantile(q) * benefit)
        .sum()
}

fn qp_sqrt_metric(rec: &CallRecord, benefit: f64, cfg: &MetricConfig) -> f64 {
    cfg.quantiles
        .iter()
        .map(|&q| (rec.hist.quantile(q) * benefit).max(0.0).sqrt())
        .sum()
}

fn qr_linear_metric(rec: &CallRecord, benefit: f64, cfg: &MetricConfig) -> f64 {
    cfg.quantiles
        .chunks_exact(2)
        .map(|pair| rec.hist.apply_on_quantile(pair[0], pair[1], Histogram::product) * benefit)
        .sum()
}

fn qr_sqrt_metric(rec: &CallRecord, benefit: f64, cfg: &MetricConfig) -> f64 {
    cfg.quantiles
        .chunks_exact(2)
        .map(|pair| {
            (rec.hist.apply_on_quantile(pair[0], pair[1], Histogram::product) * benefit)
                .max(0.0)
                .sqrt()
        })
        .sum()
}
