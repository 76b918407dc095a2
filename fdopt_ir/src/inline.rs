//! The mechanical inline transform.
//!
//! Splices a callee body into a caller at a call site:
//!
//! 1. The caller block is split at the call; the head branches into the
//!    cloned callee entry, and a continuation block receives the remainder.
//! 2. Callee blocks are cloned with locals offset past the caller's and
//!    formal parameters substituted by the actual arguments.
//! 3. Every cloned return becomes a branch to the continuation (with a copy
//!    into the call's destination when both sides carry a value).
//! 4. Every cloned call is minted a fresh [`CallSiteId`] and reported in the
//!    [`InlineOutcome`] together with the site it originated from, so the
//!    driver can propagate per-site state.
//!
//! The transform refuses indirect, intrinsic, recursive, and declaration
//! targets; the caller decides what to do with a refusal.

use crate::inst::{CallTarget, Inst, Terminator, Value};
use crate::module::{BlockId, CallSiteId, Module};

// =============================================================================
// Errors
// =============================================================================

/// Reasons the host refuses to inline a call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineError {
    /// No call with the given site id exists in the module.
    InvalidCallSite,
    /// The call target is not statically known.
    IndirectCall,
    /// Intrinsics have no body to inline.
    Intrinsic,
    /// Direct self-recursion.
    RecursiveCall,
    /// The callee is a declaration.
    NoDefinition,
}

impl std::fmt::Display for InlineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InlineError::InvalidCallSite => write!(f, "invalid call site"),
            InlineError::IndirectCall => write!(f, "cannot inline indirect call"),
            InlineError::Intrinsic => write!(f, "cannot inline intrinsic"),
            InlineError::RecursiveCall => write!(f, "cannot inline recursive call"),
            InlineError::NoDefinition => write!(f, "callee has no definition"),
        }
    }
}

impl std::error::Error for InlineError {}

pub type InlineResult<T> = Result<T, InlineError>;

// =============================================================================
// Outcome
// =============================================================================

/// One call site synthesized by cloning the callee body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlinedCall {
    /// The fresh site now living in the caller.
    pub site: CallSiteId,
    /// The callee-side site it was cloned from.
    pub origin: CallSiteId,
    /// Whether the originating call was indirect before argument
    /// substitution (an indirect-to-direct resolution when the new site has
    /// a known callee).
    pub origin_indirect: bool,
}

/// Result of a successful inline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineOutcome {
    pub inlined_calls: Vec<InlinedCall>,
}

// =============================================================================
// Transform
// =============================================================================

/// Inline the call identified by `site` into its caller.
pub fn inline_call(module: &mut Module, site: CallSiteId) -> InlineResult<InlineOutcome> {
    let loc = module.find_call(site).ok_or(InlineError::InvalidCallSite)?;
    let call = module
        .call_at(loc)
        .cloned()
        .ok_or(InlineError::InvalidCallSite)?;

    if call.intrinsic {
        return Err(InlineError::Intrinsic);
    }
    if call.target.is_indirect() && call.target.callee().is_none() {
        return Err(InlineError::IndirectCall);
    }
    let callee_id = call.target.callee().ok_or(InlineError::IndirectCall)?;
    if callee_id == loc.func {
        return Err(InlineError::RecursiveCall);
    }
    if module.func(callee_id).is_declaration {
        return Err(InlineError::NoDefinition);
    }

    let callee = module.func(callee_id).clone();
    let caller = module.func(loc.func);

    let local_offset = caller.max_local().map(|m| m + 1).unwrap_or(0);
    let block_offset = caller.blocks.len() as u32;
    let cont_id = BlockId(block_offset + callee.blocks.len() as u32);
    let inline_entry = BlockId(block_offset);

    // Remap a callee-side operand into the caller's namespace.
    let map_value = |v: Value| -> Value {
        match v {
            Value::Param(i) => call.args.get(i as usize).copied().unwrap_or(v),
            Value::Local(l) => Value::Local(l + local_offset),
            other => other,
        }
    };
    let map_block = |b: BlockId| -> BlockId { BlockId(b.0 + block_offset) };

    // Clone the callee body, minting fresh sites for its calls.
    let mut outcome = InlineOutcome::default();
    let mut cloned: Vec<crate::module::Block> = Vec::with_capacity(callee.blocks.len());
    let mut minted: Vec<(usize, usize)> = Vec::new();

    for (bidx, blk) in callee.blocks.iter().enumerate() {
        let mut insts = Vec::with_capacity(blk.insts.len() + 1);
        for inst in &blk.insts {
            let new_inst = match inst {
                Inst::Binary { dest, op, lhs, rhs } => Inst::Binary {
                    dest: dest + local_offset,
                    op: *op,
                    lhs: map_value(*lhs),
                    rhs: map_value(*rhs),
                },
                Inst::Load { dest, addr } => Inst::Load {
                    dest: dest + local_offset,
                    addr: map_value(*addr),
                },
                Inst::Store { addr, value } => Inst::Store {
                    addr: map_value(*addr),
                    value: map_value(*value),
                },
                Inst::Gep {
                    dest,
                    base,
                    const_indices,
                } => Inst::Gep {
                    dest: dest + local_offset,
                    base: map_value(*base),
                    const_indices: *const_indices,
                },
                Inst::Cast { dest, kind, value } => Inst::Cast {
                    dest: dest + local_offset,
                    kind: *kind,
                    value: map_value(*value),
                },
                Inst::Phi { dest, incoming } => Inst::Phi {
                    dest: dest + local_offset,
                    incoming: incoming
                        .iter()
                        .map(|(b, v)| (map_block(*b), map_value(*v)))
                        .collect(),
                },
                Inst::Alloca { dest, array } => Inst::Alloca {
                    dest: dest + local_offset,
                    array: *array,
                },
                Inst::Copy { dest, value } => Inst::Copy {
                    dest: dest + local_offset,
                    value: map_value(*value),
                },
                Inst::Call(c) => {
                    let origin_indirect = c.target.is_indirect();
                    let target = match c.target {
                        CallTarget::Direct(f) => CallTarget::Direct(f),
                        CallTarget::Indirect(v) => CallTarget::Indirect(map_value(v)),
                    };
                    let mut nc = c.clone();
                    nc.target = target;
                    nc.dest = c.dest.map(|d| d + local_offset);
                    nc.args = c.args.iter().map(|v| map_value(*v)).collect();
                    // fresh site ids are minted in a second pass; minting
                    // needs the module mutably
                    minted.push((bidx, insts.len()));
                    outcome.inlined_calls.push(InlinedCall {
                        site: CallSiteId(u64::MAX), // patched below
                        origin: c.site,
                        origin_indirect,
                    });
                    Inst::Call(nc)
                }
            };
            insts.push(new_inst);
        }

        // Returns become branches to the continuation.
        let term = match &blk.term {
            Terminator::Ret { value } => {
                if let (Some(dest), Some(v)) = (call.dest, value) {
                    insts.push(Inst::Copy {
                        dest,
                        value: map_value(*v),
                    });
                }
                Terminator::Br { target: cont_id }
            }
            Terminator::Br { target } => Terminator::Br {
                target: map_block(*target),
            },
            Terminator::CondBr {
                cond,
                then_blk,
                else_blk,
            } => Terminator::CondBr {
                cond: map_value(*cond),
                then_blk: map_block(*then_blk),
                else_blk: map_block(*else_blk),
            },
            Terminator::Switch {
                value,
                default,
                cases,
            } => Terminator::Switch {
                value: map_value(*value),
                default: map_block(*default),
                cases: cases.iter().map(|(c, b)| (*c, map_block(*b))).collect(),
            },
            Terminator::IndirectBr { targets } => Terminator::IndirectBr {
                targets: targets.iter().map(|b| map_block(*b)).collect(),
            },
            Terminator::Unreachable => Terminator::Unreachable,
        };

        cloned.push(crate::module::Block {
            name: format!("{}.{}", callee.name, blk.name),
            insts,
            term,
        });
    }

    // Mint the fresh site ids now that no borrow of the module is live.
    for (k, (bidx, iidx)) in minted.iter().enumerate() {
        let fresh = module.new_call_site();
        if let Inst::Call(c) = &mut cloned[*bidx].insts[*iidx] {
            c.site = fresh;
        }
        outcome.inlined_calls[k].site = fresh;
    }

    // Split the caller block and splice everything in.
    let caller = module.func_mut(loc.func);
    let call_block = &mut caller.blocks[loc.block.0 as usize];

    let tail_insts: Vec<Inst> = call_block.insts.split_off(loc.inst + 1);
    call_block.insts.pop(); // drop the call itself
    let original_term = std::mem::replace(&mut call_block.term, Terminator::Br { target: inline_entry });
    let cont_name = format!("{}.cont", call_block.name);

    caller.blocks.extend(cloned);
    caller.blocks.push(crate::module::Block {
        name: cont_name,
        insts: tail_insts,
        term: original_term,
    });

    // Successor phis naming the split block now receive control from the
    // continuation.
    for (bidx, blk) in caller.blocks.iter_mut().enumerate() {
        if bidx == loc.block.0 as usize {
            continue;
        }
        for inst in &mut blk.insts {
            if let Inst::Phi { incoming, .. } = inst {
                for (b, _) in incoming.iter_mut() {
                    if *b == loc.block {
                        *b = cont_id;
                    }
                }
            }
        }
    }

    tracing::debug!(
        caller = %module.func(loc.func).name,
        callee = %callee.name,
        new_sites = outcome.inlined_calls.len(),
        "inlined call"
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;
    use crate::inst::BinOp;
    use crate::module::FuncId;

    /// caller: x = call foo(7); ret x
    /// foo(a): ret a*2
    fn two_funcs() -> (Module, CallSiteId, FuncId, FuncId) {
        let mut mb = ModuleBuilder::new();
        let foo = mb.declare("foo", 1);
        {
            let mut fb = mb.define_declared(foo);
            let e = fb.entry_block();
            let d = fb.binary(e, BinOp::Mul, Value::Param(0), Value::Const(2));
            fb.ret(e, Some(Value::Local(d)));
            fb.finish();
        }
        let main = mb.declare("main", 0);
        let site;
        {
            let mut fb = mb.define_declared(main);
            let e = fb.entry_block();
            let (s, d) = fb.call_val(e, CallTarget::Direct(foo), vec![Value::Const(7)]);
            site = s;
            fb.ret(e, Some(Value::Local(d)));
            fb.finish();
        }
        mb.set_entry(main);
        (mb.finish(), site, main, foo)
    }

    #[test]
    fn test_basic_inline_splices_body() {
        let (mut m, site, main, _foo) = two_funcs();
        let out = inline_call(&mut m, site).expect("inline should succeed");
        assert!(out.inlined_calls.is_empty());

        let f = m.func(main);
        // entry + cloned foo entry + continuation
        assert_eq!(f.blocks.len(), 3);
        // the call is gone
        assert!(m.find_call(site).is_none());
        // cloned multiply has params substituted
        let cloned = &f.blocks[1];
        assert!(matches!(
            cloned.insts[0],
            Inst::Binary {
                lhs: Value::Const(7),
                ..
            }
        ));
        // return became a copy + branch to the continuation
        assert!(matches!(cloned.insts[1], Inst::Copy { .. }));
        assert!(matches!(cloned.term, Terminator::Br { .. }));
    }

    #[test]
    fn test_inline_reports_synthesized_sites() {
        let mut mb = ModuleBuilder::new();
        let leaf = mb.declare("leaf", 0);
        {
            let mut fb = mb.define_declared(leaf);
            let e = fb.entry_block();
            fb.ret(e, None);
            fb.finish();
        }
        let mid = mb.declare("mid", 0);
        let inner_site;
        {
            let mut fb = mb.define_declared(mid);
            let e = fb.entry_block();
            inner_site = fb.call(e, CallTarget::Direct(leaf), vec![], true);
            fb.ret(e, None);
            fb.finish();
        }
        let main = mb.declare("main", 0);
        let outer_site;
        {
            let mut fb = mb.define_declared(main);
            let e = fb.entry_block();
            outer_site = fb.call(e, CallTarget::Direct(mid), vec![], true);
            fb.ret(e, None);
            fb.finish();
        }
        let mut m = mb.finish();

        let out = inline_call(&mut m, outer_site).unwrap();
        assert_eq!(out.inlined_calls.len(), 1);
        let ic = out.inlined_calls[0];
        assert_eq!(ic.origin, inner_site);
        assert!(!ic.origin_indirect);
        // the fresh site is findable and distinct from the origin
        assert_ne!(ic.site, inner_site);
        let loc = m.find_call(ic.site).expect("fresh site exists");
        assert_eq!(loc.func, main);
        // the origin still exists inside `mid`
        assert!(m.find_call(inner_site).is_some());
    }

    #[test]
    fn test_indirect_resolution_through_argument() {
        let mut mb = ModuleBuilder::new();
        let g = mb.declare("g", 0);
        {
            let mut fb = mb.define_declared(g);
            let e = fb.entry_block();
            fb.ret(e, None);
            fb.finish();
        }
        // wrapper(fp): call fp()
        let wrapper = mb.declare("wrapper", 1);
        {
            let mut fb = mb.define_declared(wrapper);
            let e = fb.entry_block();
            fb.call(e, CallTarget::Indirect(Value::Param(0)), vec![], true);
            fb.ret(e, None);
            fb.finish();
        }
        let main = mb.declare("main", 0);
        let site;
        {
            let mut fb = mb.define_declared(main);
            let e = fb.entry_block();
            site = fb.call(e, CallTarget::Direct(wrapper), vec![Value::Func(g)], true);
            fb.ret(e, None);
            fb.finish();
        }
        let mut m = mb.finish();

        let out = inline_call(&mut m, site).unwrap();
        assert_eq!(out.inlined_calls.len(), 1);
        let ic = out.inlined_calls[0];
        assert!(ic.origin_indirect);
        let loc = m.find_call(ic.site).unwrap();
        let call = m.call_at(loc).unwrap();
        assert_eq!(call.target.callee(), Some(g));
    }

    #[test]
    fn test_inline_refusals() {
        let (mut m, _site, main, foo) = two_funcs();
        assert_eq!(
            inline_call(&mut m, CallSiteId(12345)),
            Err(InlineError::InvalidCallSite)
        );

        // recursive call
        let rec_site = {
            let mut mb = ModuleBuilder::new();
            let f = mb.declare("f", 0);
            let mut fb = mb.define_declared(f);
            let e = fb.entry_block();
            let s = fb.call(e, CallTarget::Direct(f), vec![], true);
            fb.ret(e, None);
            fb.finish();
            m = mb.finish();
            s
        };
        assert_eq!(
            inline_call(&mut m, rec_site),
            Err(InlineError::RecursiveCall)
        );
        let _ = (main, foo);
    }
}
