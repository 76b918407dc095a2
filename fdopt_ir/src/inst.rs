//! Instructions, operands, and block terminators.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::module::{BlockId, CallSiteId, FuncId};

// =============================================================================
// Operands
// =============================================================================

/// An operand of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Integer constant.
    Const(i64),
    /// Reference to a function (a constant of function type).
    Func(FuncId),
    /// Formal parameter of the enclosing function, by position.
    Param(u32),
    /// Result of another instruction in the enclosing function.
    Local(u32),
}

impl Value {
    /// Whether this operand is a compile-time constant.
    #[inline]
    pub fn is_const(self) -> bool {
        matches!(self, Value::Const(_) | Value::Func(_))
    }
}

// =============================================================================
// Instructions
// =============================================================================

/// Binary arithmetic/comparison operators. The exact operator identity only
/// matters to constant-propagation impact estimates, so the set is small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Cmp,
}

/// Cast kinds. Lossless casts and ptr/int reinterpretation are free at
/// codegen time and are excluded from size accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastKind {
    Noop,
    Bitcast,
    IntToPtr,
    PtrToInt,
    Ext,
    Trunc,
}

impl CastKind {
    /// Casts that lower to nothing on sane targets.
    #[inline]
    pub fn is_free(self) -> bool {
        matches!(self, CastKind::Noop | CastKind::Bitcast | CastKind::IntToPtr | CastKind::PtrToInt)
    }
}

/// The target of a call instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallTarget {
    /// Direct call to a known function.
    Direct(FuncId),
    /// Indirect call through a value.
    Indirect(Value),
}

impl CallTarget {
    /// The callee, if statically known.
    #[inline]
    pub fn callee(self) -> Option<FuncId> {
        match self {
            CallTarget::Direct(f) => Some(f),
            CallTarget::Indirect(Value::Func(f)) => Some(f),
            CallTarget::Indirect(_) => None,
        }
    }

    #[inline]
    pub fn is_indirect(self) -> bool {
        matches!(self, CallTarget::Indirect(_))
    }
}

/// A call instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInst {
    /// Module-unique stable identity of this call site.
    #[serde(default)]
    pub site: CallSiteId,
    /// Local defined by the call's return value, if any.
    pub dest: Option<u32>,
    pub target: CallTarget,
    pub args: Vec<Value>,
    /// Intrinsics are opaque to the inliner.
    #[serde(default)]
    pub intrinsic: bool,
}

/// An instruction inside a basic block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Inst {
    Binary {
        dest: u32,
        op: BinOp,
        lhs: Value,
        rhs: Value,
    },
    Load {
        dest: u32,
        addr: Value,
    },
    Store {
        addr: Value,
        value: Value,
    },
    /// Address computation; all-constant-index GEPs fold into their users.
    Gep {
        dest: u32,
        base: Value,
        const_indices: bool,
    },
    Cast {
        dest: u32,
        kind: CastKind,
        value: Value,
    },
    Phi {
        dest: u32,
        incoming: Vec<(BlockId, Value)>,
    },
    /// Stack allocation. `array` allocations never merge during inlining.
    Alloca {
        dest: u32,
        array: bool,
    },
    /// Value copy introduced by the inline transform when replacing returns.
    Copy {
        dest: u32,
        value: Value,
    },
    Call(CallInst),
}

impl Inst {
    /// Local defined by this instruction, if any.
    pub fn dest(&self) -> Option<u32> {
        match self {
            Inst::Binary { dest, .. }
            | Inst::Load { dest, .. }
            | Inst::Gep { dest, .. }
            | Inst::Cast { dest, .. }
            | Inst::Phi { dest, .. }
            | Inst::Alloca { dest, .. }
            | Inst::Copy { dest, .. } => Some(*dest),
            Inst::Call(c) => c.dest,
            Inst::Store { .. } => None,
        }
    }

    /// Operands read by this instruction.
    pub fn operands(&self) -> SmallVec<[Value; 4]> {
        match self {
            Inst::Binary { lhs, rhs, .. } => SmallVec::from_slice(&[*lhs, *rhs]),
            Inst::Load { addr, .. } => SmallVec::from_slice(&[*addr]),
            Inst::Store { addr, value } => SmallVec::from_slice(&[*addr, *value]),
            Inst::Gep { base, .. } => SmallVec::from_slice(&[*base]),
            Inst::Cast { value, .. } | Inst::Copy { value, .. } => SmallVec::from_slice(&[*value]),
            Inst::Phi { incoming, .. } => incoming.iter().map(|(_, v)| *v).collect(),
            Inst::Alloca { .. } => SmallVec::new(),
            Inst::Call(c) => {
                let mut ops: SmallVec<[Value; 4]> = c.args.iter().copied().collect();
                if let CallTarget::Indirect(v) = c.target {
                    ops.push(v);
                }
                ops
            }
        }
    }

    /// Whether this instruction may read or write memory (and thus cannot be
    /// removed by constant propagation).
    pub fn touches_memory(&self) -> bool {
        matches!(
            self,
            Inst::Load { .. } | Inst::Store { .. } | Inst::Alloca { .. } | Inst::Call(_)
        )
    }

    pub fn as_call(&self) -> Option<&CallInst> {
        match self {
            Inst::Call(c) => Some(c),
            _ => None,
        }
    }
}

// =============================================================================
// Terminators
// =============================================================================

/// Block terminator with explicit successor list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    Ret {
        value: Option<Value>,
    },
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Value,
        then_blk: BlockId,
        else_blk: BlockId,
    },
    Switch {
        value: Value,
        default: BlockId,
        cases: Vec<(i64, BlockId)>,
    },
    /// Computed goto. Functions containing one can never be inlined.
    IndirectBr {
        targets: Vec<BlockId>,
    },
    Unreachable,
}

impl Terminator {
    /// Successor blocks, in declaration order.
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            Terminator::Ret { .. } | Terminator::Unreachable => SmallVec::new(),
            Terminator::Br { target } => SmallVec::from_slice(&[*target]),
            Terminator::CondBr {
                then_blk, else_blk, ..
            } => SmallVec::from_slice(&[*then_blk, *else_blk]),
            Terminator::Switch { default, cases, .. } => {
                let mut succ = SmallVec::from_slice(&[*default]);
                succ.extend(cases.iter().map(|(_, b)| *b));
                succ
            }
            Terminator::IndirectBr { targets } => targets.iter().copied().collect(),
        }
    }

    /// The value this terminator branches on, if it is a multi-way branch.
    pub fn branch_operand(&self) -> Option<Value> {
        match self {
            Terminator::CondBr { cond, .. } => Some(*cond),
            Terminator::Switch { value, .. } => Some(*value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminator_successors() {
        let ret = Terminator::Ret { value: None };
        assert!(ret.successors().is_empty());

        let cond = Terminator::CondBr {
            cond: Value::Param(0),
            then_blk: BlockId(1),
            else_blk: BlockId(2),
        };
        assert_eq!(cond.successors().as_slice(), &[BlockId(1), BlockId(2)]);

        let sw = Terminator::Switch {
            value: Value::Param(0),
            default: BlockId(3),
            cases: vec![(0, BlockId(1)), (1, BlockId(2))],
        };
        assert_eq!(sw.successors().len(), 3);
    }

    #[test]
    fn test_call_target_callee() {
        assert_eq!(CallTarget::Direct(FuncId(2)).callee(), Some(FuncId(2)));
        assert_eq!(
            CallTarget::Indirect(Value::Func(FuncId(3))).callee(),
            Some(FuncId(3))
        );
        assert_eq!(CallTarget::Indirect(Value::Param(0)).callee(), None);
        assert!(CallTarget::Indirect(Value::Param(0)).is_indirect());
    }

    #[test]
    fn test_inst_dest_and_operands() {
        let add = Inst::Binary {
            dest: 4,
            op: BinOp::Add,
            lhs: Value::Const(1),
            rhs: Value::Param(0),
        };
        assert_eq!(add.dest(), Some(4));
        assert_eq!(add.operands().len(), 2);

        let store = Inst::Store {
            addr: Value::Local(1),
            value: Value::Const(0),
        };
        assert_eq!(store.dest(), None);
        assert!(store.touches_memory());
    }
}
