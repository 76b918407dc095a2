//! Feedback-directed function inlining.
//!
//! The driver consumes a combined call profile (per-block frequency
//! *distributions*, not averages) and greedily inlines the best-scoring
//! call sites under a code-growth budget:
//!
//! - [`attr`]: per-function size/call/inlinability cache and per-argument
//!   impact estimates.
//! - [`record`]: call-site candidate records with owned histograms and
//!   inlining histories.
//! - [`metric`]: the named scoring-function registry (`mean`, quantile
//!   point/range families, and test metrics).
//! - [`inliner`]: the greedy driver, frontier maintenance, budget, and
//!   reporting.
//! - [`tee`]: priority-filtered multi-sink report streams.

pub mod attr;
pub mod inliner;
pub mod metric;
pub mod record;
pub mod tee;

pub use attr::{inline_weights, ArgImpact, AttrCache, FunctionAttr};
pub use inliner::{Budget, InlineStats, Inliner, InlinerConfig, InlinerError};
pub use metric::{metric_names, select_metric, MetricConfig, MetricError, MetricFn};
pub use record::{CallRecord, RecordIds};
pub use tee::{sink, vl, LogBuffers, LogSet, SharedSink, TeeStream};
