//! A minimal typed SSA intermediate representation.
//!
//! This is the surface the analyses consume: a [`Function`] is an ordered
//! sequence of [`BasicBlock`]s, each an ordered sequence of instructions
//! ending in a terminator, with an explicit successor graph on the
//! terminators. Instructions live in an arena owned by the function and are
//! identified by the lightweight [`InstId`] handle; an instruction *is* the
//! SSA value it defines (stores and terminators define none, but keep their
//! identity for program-point bookkeeping).
//!
//! The front-end, type checker, and code generator that would produce this
//! IR are external collaborators; tests and the demo binary build functions
//! directly through [`Function::add_block`] and [`Function::push`].

use std::fmt;

/// Identity of an instruction and of the SSA value it defines.
///
/// Ids are dense indices into the owning function's instruction arena, so
/// analysis state can be keyed by small integers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct InstId(u32);

impl InstId {
    pub fn new(index: usize) -> Self {
        InstId(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Identity of a basic block within its function.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockId(u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// An instruction operand: a literal integer constant or a reference to the
/// value defined by another instruction.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Operand {
    Const(i64),
    Inst(InstId),
}

impl Operand {
    pub fn as_inst(self) -> Option<InstId> {
        match self {
            Operand::Inst(id) => Some(id),
            Operand::Const(_) => None,
        }
    }

    pub fn as_const(self) -> Option<i64> {
        match self {
            Operand::Const(c) => Some(c),
            Operand::Inst(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Const(c) => write!(f, "{c}"),
            Operand::Inst(id) => write!(f, "{id}"),
        }
    }
}

/// Integer binary opcodes. The range analysis supports `Add`, `Sub`, `Mul`
/// and `SDiv`; the rest exist so that malformed dispatch is a reportable
/// condition rather than an unrepresentable one.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BinOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::SDiv => "sdiv",
            BinOp::UDiv => "udiv",
            BinOp::SRem => "srem",
            BinOp::URem => "urem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
        }
    }
}

/// Integer comparison predicates. The range analysis supports `Eq`, `Ne`,
/// `Slt` and `Sgt`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Predicate {
    Eq,
    Ne,
    Slt,
    Sgt,
    Sle,
    Sge,
    Ult,
    Ugt,
}

impl Predicate {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Predicate::Eq => "eq",
            Predicate::Ne => "ne",
            Predicate::Slt => "slt",
            Predicate::Sgt => "sgt",
            Predicate::Sle => "sle",
            Predicate::Sge => "sge",
            Predicate::Ult => "ult",
            Predicate::Ugt => "ugt",
        }
    }
}

/// An instruction, tagged by variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// SSA merge of the incoming values, one per predecessor edge.
    Phi { incoming: Vec<Operand> },
    BinOp { op: BinOp, lhs: Operand, rhs: Operand },
    ICmp { pred: Predicate, lhs: Operand, rhs: Operand },
    Select { cond: Operand, on_true: Operand, on_false: Operand },
    /// Stack allocation; the defined value is the address of the slot.
    Alloca,
    Load { ptr: Operand },
    /// Defines no value.
    Store { src: Operand, ptr: Operand },
    Call { callee: String, args: Vec<Operand> },
    /// Pointer-to-pointer cast (bitcast).
    Cast { src: Operand },
    IntToPtr { src: Operand },
    PtrToInt { src: Operand },
    /// Terminator: unconditional with one target, conditional with several.
    Branch { targets: Vec<BlockId> },
    /// Terminator with no successors.
    Ret { value: Option<Operand> },
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instruction::Branch { .. } | Instruction::Ret { .. })
    }

    /// Successor blocks; empty for non-terminators and for `Ret`.
    pub fn successors(&self) -> &[BlockId] {
        match self {
            Instruction::Branch { targets } => targets,
            _ => &[],
        }
    }

    /// All value operands of this instruction, in syntactic order.
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Instruction::Phi { incoming } => incoming.clone(),
            Instruction::BinOp { lhs, rhs, .. } | Instruction::ICmp { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            Instruction::Select { cond, on_true, on_false } => vec![*cond, *on_true, *on_false],
            Instruction::Alloca => Vec::new(),
            Instruction::Load { ptr } => vec![*ptr],
            Instruction::Store { src, ptr } => vec![*src, *ptr],
            Instruction::Call { args, .. } => args.clone(),
            Instruction::Cast { src } | Instruction::IntToPtr { src } | Instruction::PtrToInt { src } => {
                vec![*src]
            }
            Instruction::Branch { .. } => Vec::new(),
            Instruction::Ret { value } => value.iter().copied().collect(),
        }
    }
}

/// An ordered list of instructions; the last one is the block terminator.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub insts: Vec<InstId>,
}

/// A function: an instruction arena plus the blocks that order it.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    insts: Vec<Instruction>,
    blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Function {
            name: name.into(),
            insts: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Appends an empty block and returns its id.
    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::default());
        BlockId(self.blocks.len() as u32 - 1)
    }

    /// Appends an instruction to `block` and returns the id naming its
    /// result.
    pub fn push(&mut self, block: BlockId, inst: Instruction) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(inst);
        self.blocks[block.index()].insts.push(id);
        id
    }

    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.index()]
    }

    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks.iter().enumerate().map(|(i, b)| (BlockId(i as u32), b))
    }

    /// Instruction ids in program order (blocks in order, instructions in
    /// block order).
    pub fn inst_ids(&self) -> impl Iterator<Item = InstId> + '_ {
        self.blocks.iter().flat_map(|b| b.insts.iter().copied())
    }

    /// Def-use chains: for every instruction, the instructions that consume
    /// its result as an operand. Indexed by [`InstId::index`].
    pub fn users(&self) -> Vec<Vec<InstId>> {
        let mut users = vec![Vec::new(); self.insts.len()];
        for id in self.inst_ids() {
            for op in self.inst(id).operands() {
                if let Some(src) = op.as_inst() {
                    users[src.index()].push(id);
                }
            }
        }
        users
    }

    /// Renders one instruction, e.g. `%2 = add %0, 1`.
    pub fn display_inst(&self, id: InstId) -> String {
        let inst = self.inst(id);
        match inst {
            Instruction::Phi { incoming } => format!("{id} = phi {}", join(incoming)),
            Instruction::BinOp { op, lhs, rhs } => {
                format!("{id} = {} {lhs}, {rhs}", op.mnemonic())
            }
            Instruction::ICmp { pred, lhs, rhs } => {
                format!("{id} = icmp {} {lhs}, {rhs}", pred.mnemonic())
            }
            Instruction::Select { cond, on_true, on_false } => {
                format!("{id} = select {cond}, {on_true}, {on_false}")
            }
            Instruction::Alloca => format!("{id} = alloca"),
            Instruction::Load { ptr } => format!("{id} = load {ptr}"),
            Instruction::Store { src, ptr } => format!("store {src}, {ptr}"),
            Instruction::Call { callee, args } => {
                format!("{id} = call {callee}({})", join(args))
            }
            Instruction::Cast { src } => format!("{id} = bitcast {src}"),
            Instruction::IntToPtr { src } => format!("{id} = inttoptr {src}"),
            Instruction::PtrToInt { src } => format!("{id} = ptrtoint {src}"),
            Instruction::Branch { targets } => {
                let t: Vec<String> = targets.iter().map(|b| b.to_string()).collect();
                format!("br {}", t.join(", "))
            }
            Instruction::Ret { value: Some(v) } => format!("ret {v}"),
            Instruction::Ret { value: None } => "ret".to_string(),
        }
    }
}

fn join(ops: &[Operand]) -> String {
    let parts: Vec<String> = ops.iter().map(|o| o.to_string()).collect();
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_dense_ids_in_order() {
        let mut f = Function::new("t");
        let bb = f.add_block();
        let a = f.push(bb, Instruction::Alloca);
        let b = f.push(bb, Instruction::Load { ptr: Operand::Inst(a) });
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(f.inst_ids().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn users_follow_operands() {
        let mut f = Function::new("t");
        let bb = f.add_block();
        let a = f.push(bb, Instruction::Alloca);
        let l = f.push(bb, Instruction::Load { ptr: Operand::Inst(a) });
        let s = f.push(
            bb,
            Instruction::Store { src: Operand::Inst(l), ptr: Operand::Inst(a) },
        );
        let users = f.users();
        assert_eq!(users[a.index()], vec![l, s]);
        assert_eq!(users[l.index()], vec![s]);
        assert!(users[s.index()].is_empty());
    }

    #[test]
    fn terminator_successors() {
        let mut f = Function::new("t");
        let entry = f.add_block();
        let exit = f.add_block();
        let br = f.push(entry, Instruction::Branch { targets: vec![exit] });
        let ret = f.push(exit, Instruction::Ret { value: None });
        assert!(f.inst(br).is_terminator());
        assert_eq!(f.inst(br).successors(), &[exit]);
        assert!(f.inst(ret).successors().is_empty());
    }

    #[test]
    fn display_renders_instructions() {
        let mut f = Function::new("t");
        let bb = f.add_block();
        let x = f.push(
            bb,
            Instruction::BinOp { op: BinOp::Add, lhs: Operand::Const(1), rhs: Operand::Const(2) },
        );
        let c = f.push(
            bb,
            Instruction::ICmp { pred: Predicate::Slt, lhs: Operand::Inst(x), rhs: Operand::Const(10) },
        );
        assert_eq!(f.display_inst(x), "%0 = add 1, 2");
        assert_eq!(f.display_inst(c), "%1 = icmp slt %0, 10");
    }
}
