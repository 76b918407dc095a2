//! Whole-program IR model for the fdopt pipeline.
//!
//! This crate is the "host compiler" collaborator that the profiling and
//! inlining crates operate against:
//!
//! - **Module model** (`module.rs`): functions, basic blocks, instructions,
//!   terminators with explicit successor lists.
//! - **Stable call-site identity** (`CallSiteId`): every call instruction
//!   carries a module-unique id that survives block splitting and cloning,
//!   so analyses can key state by call site without pointer invalidation.
//! - **Builder** (`builder.rs`): programmatic construction for tests and
//!   fixtures.
//! - **Inline transform** (`inline.rs`): the mechanical splice of a callee
//!   body into a caller, reporting every synthesized call site together
//!   with its originating site.
//!
//! Modules serialize to a JSON description (serde) so the CLI can load
//! whole programs from disk.

pub mod builder;
pub mod inline;
pub mod inst;
pub mod module;

pub use builder::{FunctionBuilder, ModuleBuilder};
pub use inline::{inline_call, InlineError, InlineOutcome, InlineResult, InlinedCall};
pub use inst::{BinOp, CallInst, CallTarget, CastKind, Inst, Terminator, Value};
pub use module::{Block, BlockId, BlockRef, CallSiteId, FuncId, Function, Module, Param};
