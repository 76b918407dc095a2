//! Module, function, and basic-block containers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::inst::{CallInst, Inst, Terminator};

// =============================================================================
// Identifiers
// =============================================================================

/// Index of a function within its module.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct FuncId(pub u32);

/// Index of a basic block within its function.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct BlockId(pub u32);

/// Module-wide reference to a basic block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct BlockRef {
    pub func: FuncId,
    pub block: BlockId,
}

impl BlockRef {
    pub fn new(func: FuncId, block: BlockId) -> Self {
        BlockRef { func, block }
    }
}

/// Stable, module-unique identity of a call site. Ids are never reused, so
/// analyses can key persistent state by call site across IR mutation; the
/// inline transform mints fresh ids for every cloned call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct CallSiteId(pub u64);

impl fmt::Display for CallSiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cs{}", self.0)
    }
}

// =============================================================================
// Function pieces
// =============================================================================

/// Formal parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    /// Pointer-typed parameters participate in alloca impact analysis.
    #[serde(default)]
    pub pointer: bool,
}

/// A basic block: straight-line instructions plus one terminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub insts: Vec<Inst>,
    pub term: Terminator,
}

impl Block {
    /// Whether the block contains at least one call instruction.
    pub fn has_call(&self) -> bool {
        self.insts.iter().any(|i| matches!(i, Inst::Call(_)))
    }
}

/// A function definition or declaration. Declarations have no blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub is_declaration: bool,
    #[serde(default)]
    pub address_taken: bool,
    #[serde(default)]
    pub no_return: bool,
}

impl Function {
    /// Entry block id; blocks[0] by convention.
    #[inline]
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    /// Iterate `(BlockId, &Block)` in layout order.
    pub fn iter_blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockId(i as u32), b))
    }

    /// Largest local number defined anywhere in the body, if any.
    pub fn max_local(&self) -> Option<u32> {
        self.blocks
            .iter()
            .flat_map(|b| b.insts.iter())
            .filter_map(|i| i.dest())
            .max()
    }

    /// Locals defined by alloca instructions.
    pub fn alloca_locals(&self) -> Vec<u32> {
        self.blocks
            .iter()
            .flat_map(|b| b.insts.iter())
            .filter_map(|i| match i {
                Inst::Alloca { dest, .. } => Some(*dest),
                _ => None,
            })
            .collect()
    }
}

// =============================================================================
// Module
// =============================================================================

/// Location of a call instruction within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallLoc {
    pub func: FuncId,
    pub block: BlockId,
    pub inst: usize,
}

impl CallLoc {
    pub fn block_ref(&self) -> BlockRef {
        BlockRef::new(self.func, self.block)
    }
}

/// A whole program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub functions: Vec<Function>,
    /// The program entry function (never dead-stripped).
    pub entry: Option<FuncId>,
    /// Next call-site id to mint.
    #[serde(default)]
    next_site: u64,
}

impl Module {
    pub fn new() -> Self {
        Module {
            functions: Vec::new(),
            entry: None,
            next_site: 0,
        }
    }

    #[inline]
    pub fn func(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    #[inline]
    pub fn func_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    pub fn func_by_name(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    /// Iterate `(FuncId, &Function)` in module order.
    pub fn iter_funcs(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FuncId(i as u32), f))
    }

    /// Iterate defined (non-declaration) functions.
    pub fn iter_defined(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.iter_funcs().filter(|(_, f)| !f.is_declaration)
    }

    #[inline]
    pub fn block(&self, r: BlockRef) -> &Block {
        self.func(r.func).block(r.block)
    }

    /// Mint a fresh call-site id.
    pub fn new_call_site(&mut self) -> CallSiteId {
        let id = CallSiteId(self.next_site);
        self.next_site += 1;
        id
    }

    /// Assign fresh ids to any call sites left at the default id, and bump
    /// the mint counter past every id present. Run this after loading a
    /// module description from disk.
    pub fn freshen_call_sites(&mut self) {
        let mut max_seen = 0u64;
        for f in &self.functions {
            for b in &f.blocks {
                for i in &b.insts {
                    if let Inst::Call(c) = i {
                        max_seen = max_seen.max(c.site.0);
                    }
                }
            }
        }
        self.next_site = self.next_site.max(max_seen + 1);

        let mut next = self.next_site;
        let mut seen: rustc_hash::FxHashSet<u64> = rustc_hash::FxHashSet::default();
        for f in &mut self.functions {
            for b in &mut f.blocks {
                for i in &mut b.insts {
                    if let Inst::Call(c) = i {
                        if !seen.insert(c.site.0) {
                            c.site = CallSiteId(next);
                            seen.insert(next);
                            next += 1;
                        }
                    }
                }
            }
        }
        self.next_site = next;
    }

    /// Locate a call by its stable id.
    pub fn find_call(&self, site: CallSiteId) -> Option<CallLoc> {
        for (fid, f) in self.iter_funcs() {
            for (bid, b) in f.iter_blocks() {
                for (idx, inst) in b.insts.iter().enumerate() {
                    if let Inst::Call(c) = inst {
                        if c.site == site {
                            return Some(CallLoc {
                                func: fid,
                                block: bid,
                                inst: idx,
                            });
                        }
                    }
                }
            }
        }
        None
    }

    /// Fetch the call instruction at a location.
    pub fn call_at(&self, loc: CallLoc) -> Option<&CallInst> {
        self.func(loc.func)
            .blocks
            .get(loc.block.0 as usize)?
            .insts
            .get(loc.inst)?
            .as_call()
    }

    /// Whether an instruction is a candidate for profile-directed inlining:
    /// a direct, non-intrinsic, non-recursive call to a defined function.
    pub fn is_inline_candidate(&self, caller: FuncId, inst: &Inst) -> bool {
        let call = match inst.as_call() {
            Some(c) => c,
            None => return false,
        };
        if call.intrinsic {
            return false;
        }
        let callee = match call.target.callee() {
            Some(f) => f,
            None => return false,
        };
        if callee == caller {
            return false;
        }
        !self.func(callee).is_declaration
    }

    /// Whether a block contains at least one inlining candidate.
    pub fn block_has_candidate(&self, r: BlockRef) -> bool {
        self.block(r)
            .insts
            .iter()
            .any(|i| self.is_inline_candidate(r.func, i))
    }

    /// Load a module description from JSON and freshen site ids.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let mut m: Module = serde_json::from_str(text)?;
        m.freshen_call_sites();
        Ok(m)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;
    use crate::inst::{BinOp, CallTarget, Value};

    #[test]
    fn test_find_call_by_site() {
        let mut mb = ModuleBuilder::new();
        let callee = mb.declare("leaf", 0);
        let mut fb = mb.define("root", 0);
        let b = fb.entry_block();
        fb.binary(b, BinOp::Add, Value::Const(1), Value::Const(2));
        let site = fb.call(b, CallTarget::Direct(callee), vec![], true);
        fb.ret(b, None);
        fb.finish();
        let m = mb.finish();

        let loc = m.find_call(site).expect("site should exist");
        assert_eq!(loc.inst, 1);
        assert!(m.call_at(loc).is_some());
        assert!(m.find_call(CallSiteId(9999)).is_none());
    }

    #[test]
    fn test_inline_candidate_filter() {
        let mut mb = ModuleBuilder::new();
        let decl = mb.declare_external("ext", 1);
        let leaf = mb.declare("leaf", 0);
        {
            let mut fb = mb.define_declared(leaf);
            let b = fb.entry_block();
            fb.ret(b, None);
            fb.finish();
        }
        let root = mb.declare("root", 0);
        {
            let mut fb = mb.define_declared(root);
            let b = fb.entry_block();
            fb.call(b, CallTarget::Direct(leaf), vec![], true);
            fb.call(b, CallTarget::Direct(decl), vec![], true);
            fb.call(b, CallTarget::Direct(root), vec![], true);
            fb.call(b, CallTarget::Indirect(Value::Param(0)), vec![], true);
            fb.ret(b, None);
            fb.finish();
        }
        let m = mb.finish();

        let blk = m.func(root).block(BlockId(0));
        let cand: Vec<bool> = blk
            .insts
            .iter()
            .map(|i| m.is_inline_candidate(root, i))
            .collect();
        assert_eq!(cand, vec![true, false, false, false]);
        assert!(m.block_has_candidate(BlockRef::new(root, BlockId(0))));
    }

    #[test]
    fn test_json_round_trip() {
        let mut mb = ModuleBuilder::new();
        let leaf = mb.declare("leaf", 1);
        {
            let mut fb = mb.define_declared(leaf);
            let b = fb.entry_block();
            fb.binary(b, BinOp::Mul, Value::Param(0), Value::Const(3));
            fb.ret(b, Some(Value::Local(0)));
            fb.finish();
        }
        let m = mb.finish();

        let text = m.to_json().unwrap();
        let m2 = Module::from_json(&text).unwrap();
        assert_eq!(m2.functions.len(), m.functions.len());
        assert_eq!(m2.func(leaf).blocks.len(), 1);
    }
}
