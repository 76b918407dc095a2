//! Combined (distribution-preserving) execution profiles.
//!
//! Classic profile merging averages counters across runs and keeps only the
//! mean. This crate keeps the *distribution*: every program location owns a
//! weighted histogram of its per-run normalized frequency, so downstream
//! consumers can ask for quantiles, coverage, overlap, or earth-mover
//! distance instead of a single number.
//!
//! # Components
//!
//! - [`histogram`]: the weighted binned distribution with its sample-buffer
//!   lifecycle and statistical queries.
//! - [`edt`]: edge-level dominance over function CFGs, used to normalize
//!   raw edge counts hierarchically (each edge as a ratio of its immediate
//!   dominator).
//! - [`profile`], [`edge`], [`path`], [`call`]: the combined-profile sum
//!   type and its three variants.
//! - [`factory`]: multi-file ingest producing one final profile per kind.
//! - [`io`]: the little-endian record formats shared by the instrumented
//!   runtime and the combined files.

pub mod call;
pub mod edge;
pub mod edt;
pub mod factory;
pub mod histogram;
pub mod io;
pub mod path;
pub mod profile;

pub use call::{CallStructure, CombinedCallProfile};
pub use edge::CombinedEdgeProfile;
pub use edt::{CfgEdgeDomTree, EdgeDominatorTree, EdgeIndex, EdgeNode, EdtError, EdtResult};
pub use factory::ProfileFactory;
pub use histogram::{Histogram, WeightedValue, EPS};
pub use io::{ProfileError, ProfileReader, ProfileResult, ProfileWriter, RecordTag};
pub use path::{CombinedPathProfile, PathId, PathNumbering, UniformNumbering};
pub use profile::{CombinedProfile, ProfileCore, ProfileKind, DEFAULT_BINS};
