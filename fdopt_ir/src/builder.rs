//! Programmatic module construction for tests, fixtures, and tools.

use crate::inst::{BinOp, CallInst, CallTarget, CastKind, Inst, Terminator, Value};
use crate::module::{Block, BlockId, CallSiteId, FuncId, Function, Module, Param};

// =============================================================================
// Module builder
// =============================================================================

/// Builds a [`Module`] incrementally. Functions are declared first (so
/// forward references resolve), then defined one at a time through a
/// [`FunctionBuilder`].
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        ModuleBuilder {
            module: Module::new(),
        }
    }

    fn push_func(&mut self, name: &str, argc: usize, is_declaration: bool) -> FuncId {
        let id = FuncId(self.module.functions.len() as u32);
        self.module.functions.push(Function {
            name: name.to_string(),
            params: (0..argc)
                .map(|i| Param {
                    name: format!("a{i}"),
                    pointer: false,
                })
                .collect(),
            blocks: Vec::new(),
            is_declaration,
            address_taken: false,
            no_return: false,
        });
        id
    }

    /// Declare a function that will be defined later.
    pub fn declare(&mut self, name: &str, argc: usize) -> FuncId {
        self.push_func(name, argc, false)
    }

    /// Declare an external function (no body will ever be attached).
    pub fn declare_external(&mut self, name: &str, argc: usize) -> FuncId {
        self.push_func(name, argc, true)
    }

    /// Declare and immediately start defining a function.
    pub fn define(&mut self, name: &str, argc: usize) -> FunctionBuilder<'_> {
        let id = self.declare(name, argc);
        self.define_declared(id)
    }

    /// Start defining a previously declared function.
    pub fn define_declared(&mut self, id: FuncId) -> FunctionBuilder<'_> {
        FunctionBuilder {
            mb: self,
            func: id,
            blocks: Vec::new(),
            next_local: 0,
        }
    }

    pub fn set_entry(&mut self, id: FuncId) {
        self.module.entry = Some(id);
    }

    pub fn set_address_taken(&mut self, id: FuncId) {
        self.module.func_mut(id).address_taken = true;
    }

    pub fn set_no_return(&mut self, id: FuncId) {
        self.module.func_mut(id).no_return = true;
    }

    pub fn set_param_pointer(&mut self, id: FuncId, arg: usize) {
        self.module.func_mut(id).params[arg].pointer = true;
    }

    pub fn finish(self) -> Module {
        self.module
    }
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Function builder
// =============================================================================

/// Builds the body of one function. Blocks are created up front (or on the
/// fly) and filled with instructions; each block's terminator defaults to
/// `Unreachable` until set.
pub struct FunctionBuilder<'a> {
    mb: &'a mut ModuleBuilder,
    func: FuncId,
    blocks: Vec<Block>,
    next_local: u32,
}

impl<'a> FunctionBuilder<'a> {
    /// Create (or return) the entry block.
    pub fn entry_block(&mut self) -> BlockId {
        if self.blocks.is_empty() {
            self.block("entry")
        } else {
            BlockId(0)
        }
    }

    /// Create a new block.
    pub fn block(&mut self, name: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            name: name.to_string(),
            insts: Vec::new(),
            term: Terminator::Unreachable,
        });
        id
    }

    fn fresh_local(&mut self) -> u32 {
        let l = self.next_local;
        self.next_local += 1;
        l
    }

    fn push(&mut self, blk: BlockId, inst: Inst) {
        self.blocks[blk.0 as usize].insts.push(inst);
    }

    pub fn binary(&mut self, blk: BlockId, op: BinOp, lhs: Value, rhs: Value) -> u32 {
        let dest = self.fresh_local();
        self.push(blk, Inst::Binary { dest, op, lhs, rhs });
        dest
    }

    pub fn load(&mut self, blk: BlockId, addr: Value) -> u32 {
        let dest = self.fresh_local();
        self.push(blk, Inst::Load { dest, addr });
        dest
    }

    pub fn store(&mut self, blk: BlockId, addr: Value, value: Value) {
        self.push(blk, Inst::Store { addr, value });
    }

    pub fn gep(&mut self, blk: BlockId, base: Value, const_indices: bool) -> u32 {
        let dest = self.fresh_local();
        self.push(
            blk,
            Inst::Gep {
                dest,
                base,
                const_indices,
            },
        );
        dest
    }

    pub fn cast(&mut self, blk: BlockId, kind: CastKind, value: Value) -> u32 {
        let dest = self.fresh_local();
        self.push(blk, Inst::Cast { dest, kind, value });
        dest
    }

    pub fn alloca(&mut self, blk: BlockId, array: bool) -> u32 {
        let dest = self.fresh_local();
        self.push(blk, Inst::Alloca { dest, array });
        dest
    }

    pub fn phi(&mut self, blk: BlockId, incoming: Vec<(BlockId, Value)>) -> u32 {
        let dest = self.fresh_local();
        self.push(blk, Inst::Phi { dest, incoming });
        dest
    }

    /// Emit a call whose result is unused when `void` is true. Returns the
    /// minted call-site id.
    pub fn call(&mut self, blk: BlockId, target: CallTarget, args: Vec<Value>, void: bool) -> CallSiteId {
        let dest = if void { None } else { Some(self.fresh_local()) };
        let site = self.mb.module.new_call_site();
        self.push(
            blk,
            Inst::Call(CallInst {
                site,
                dest,
                target,
                args,
                intrinsic: false,
            }),
        );
        site
    }

    /// Emit a value-producing call; returns `(site, dest local)`.
    pub fn call_val(
        &mut self,
        blk: BlockId,
        target: CallTarget,
        args: Vec<Value>,
    ) -> (CallSiteId, u32) {
        let dest = self.fresh_local();
        let site = self.mb.module.new_call_site();
        self.push(
            blk,
            Inst::Call(CallInst {
                site,
                dest: Some(dest),
                target,
                args,
                intrinsic: false,
            }),
        );
        (site, dest)
    }

    /// Emit an intrinsic call (never an inlining candidate).
    pub fn intrinsic(&mut self, blk: BlockId, target: CallTarget, args: Vec<Value>) -> CallSiteId {
        let site = self.mb.module.new_call_site();
        self.push(
            blk,
            Inst::Call(CallInst {
                site,
                dest: None,
                target,
                args,
                intrinsic: true,
            }),
        );
        site
    }

    pub fn ret(&mut self, blk: BlockId, value: Option<Value>) {
        self.blocks[blk.0 as usize].term = Terminator::Ret { value };
    }

    pub fn br(&mut self, blk: BlockId, target: BlockId) {
        self.blocks[blk.0 as usize].term = Terminator::Br { target };
    }

    pub fn cond_br(&mut self, blk: BlockId, cond: Value, then_blk: BlockId, else_blk: BlockId) {
        self.blocks[blk.0 as usize].term = Terminator::CondBr {
            cond,
            then_blk,
            else_blk,
        };
    }

    pub fn switch(&mut self, blk: BlockId, value: Value, default: BlockId, cases: Vec<(i64, BlockId)>) {
        self.blocks[blk.0 as usize].term = Terminator::Switch {
            value,
            default,
            cases,
        };
    }

    pub fn indirect_br(&mut self, blk: BlockId, targets: Vec<BlockId>) {
        self.blocks[blk.0 as usize].term = Terminator::IndirectBr { targets };
    }

    /// Attach the built body to the function.
    pub fn finish(self) {
        let f = self.mb.module.func_mut(self.func);
        f.blocks = self.blocks;
        f.is_declaration = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_basic() {
        let mut mb = ModuleBuilder::new();
        let f = {
            let mut fb = mb.define("f", 1);
            let e = fb.entry_block();
            let t = fb.block("then");
            let x = fb.binary(e, BinOp::Add, Value::Param(0), Value::Const(1));
            fb.cond_br(e, Value::Local(x), t, e);
            fb.ret(t, Some(Value::Local(x)));
            fb.finish();
            FuncId(0)
        };
        mb.set_entry(f);
        let m = mb.finish();

        assert_eq!(m.entry, Some(f));
        let func = m.func(f);
        assert_eq!(func.blocks.len(), 2);
        assert_eq!(func.max_local(), Some(0));
        assert!(matches!(
            func.block(BlockId(0)).term,
            Terminator::CondBr { .. }
        ));
    }

    #[test]
    fn test_fresh_sites_are_unique() {
        let mut mb = ModuleBuilder::new();
        let leaf = mb.declare("leaf", 0);
        let mut fb = mb.define("f", 0);
        let e = fb.entry_block();
        let s1 = fb.call(e, CallTarget::Direct(leaf), vec![], true);
        let s2 = fb.call(e, CallTarget::Direct(leaf), vec![], true);
        fb.ret(e, None);
        fb.finish();
        assert_ne!(s1, s2);
    }
}
