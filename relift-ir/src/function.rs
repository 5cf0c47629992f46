//! Intermediate representation of a function.
//!
//! The `Function` struct owns all of its basic blocks and instructions.

use crate::dfg::DataFlowGraph;
use crate::entities::{Block, Inst, MdKind, Value};
use crate::entity::{PrimaryMap, SecondaryMap};
use crate::write::write_function;
use crate::types::Type;
use core::fmt;
use smallvec::SmallVec;

/// One parameter of a function signature.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AbiParam {
    /// The type of the parameter value.
    pub ty: Type,
}

impl AbiParam {
    /// Create a parameter of the given type.
    pub fn new(ty: Type) -> Self {
        Self { ty }
    }
}

/// A function signature: parameter types and a return type.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Signature {
    /// The parameters, in declaration order.
    pub params: Vec<AbiParam>,
    /// The return type; `Type::Void` for no return value.
    pub ret: Type,
}

impl Signature {
    /// Create a signature with no parameters and the given return type.
    pub fn new(ret: Type) -> Self {
        Self {
            params: Vec::new(),
            ret,
        }
    }

    /// Append a parameter of type `ty`.
    pub fn param(mut self, ty: Type) -> Self {
        self.params.push(AbiParam::new(ty));
        self
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p.ty)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// A string-keyed annotation attached to an instruction.
#[derive(Clone, PartialEq, Debug)]
pub struct Annotation {
    /// The interned kind, e.g. `asm.instr`.
    pub kind: MdKind,
    /// Optional payload text.
    pub text: Option<String>,
}

/// Annotations of one instruction.
pub type AnnotationList = SmallVec<[Annotation; 2]>;

#[derive(Clone, Default)]
struct BlockNode {
    insts: Vec<Inst>,
}

/// Layout of blocks and instructions: which instructions belong to which
/// block, and the order of blocks in the function body.
#[derive(Clone)]
pub struct Layout {
    blocks: PrimaryMap<Block, BlockNode>,
    order: Vec<Block>,
}

impl Layout {
    /// Create an empty layout.
    pub fn new() -> Self {
        Self {
            blocks: PrimaryMap::new(),
            order: Vec::new(),
        }
    }

    /// Create a new block, appended to the block order.
    pub fn make_block(&mut self) -> Block {
        let block = self.blocks.push(BlockNode::default());
        self.order.push(block);
        block
    }

    /// The first block in the layout, which is the function entry.
    pub fn entry_block(&self) -> Option<Block> {
        self.order.first().copied()
    }

    /// Iterate over the blocks in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.order.iter().copied()
    }

    /// The instructions of `block` in order.
    pub fn block_insts(&self, block: Block) -> &[Inst] {
        &self.blocks[block].insts
    }

    /// Append `inst` to the end of `block`.
    pub fn append_inst(&mut self, inst: Inst, block: Block) {
        self.blocks[block].insts.push(inst);
    }

    /// Insert `inst` into `block` directly before `before`.
    pub fn insert_inst_before(&mut self, inst: Inst, before: Inst, block: Block) {
        let insts = &mut self.blocks[block].insts;
        let at = insts
            .iter()
            .position(|&i| i == before)
            .expect("insertion point not in block");
        insts.insert(at, inst);
    }

    /// The last instruction of `block`, if any.
    pub fn last_inst(&self, block: Block) -> Option<Inst> {
        self.blocks[block].insts.last().copied()
    }

    /// Remove `block` from the layout. Its instructions are abandoned.
    pub fn remove_block(&mut self, block: Block) {
        self.order.retain(|&b| b != block);
    }

    /// True if `block` is still part of the layout.
    pub fn is_block_inserted(&self, block: Block) -> bool {
        self.order.contains(&block)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new()
    }
}

/// A function.
///
/// The function holds the data flow graph defining all instructions and
/// values, the layout assigning instructions to blocks, the parameter
/// values, and the instruction annotations.
#[derive(Clone)]
pub struct Function {
    /// Name of this function, used by the textual format.
    pub name: String,

    /// Signature of this function.
    pub signature: Signature,

    /// Data flow graph containing the primary definition of all
    /// instructions and values.
    pub dfg: DataFlowGraph,

    /// Layout of blocks and instructions in the function body.
    pub layout: Layout,

    /// The parameter values, one per signature parameter.
    pub params: Vec<Value>,

    /// String-keyed annotations attached to instructions.
    pub annotations: SecondaryMap<Inst, AnnotationList>,
}

impl Function {
    /// Create a function with the given name and signature. The parameter
    /// values are created eagerly.
    pub fn with_signature(name: impl Into<String>, signature: Signature) -> Self {
        let mut dfg = DataFlowGraph::new();
        let params = signature
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| dfg.make_param(p.ty, i as u16))
            .collect();
        Self {
            name: name.into(),
            signature,
            dfg,
            layout: Layout::new(),
            params,
            annotations: SecondaryMap::new(),
        }
    }

    /// Attach an annotation to an instruction.
    pub fn annotate(&mut self, inst: Inst, kind: MdKind, text: Option<String>) {
        self.annotations[inst].push(Annotation { kind, text });
    }

    /// The terminator of `block`: its last instruction, provided that
    /// instruction actually terminates the block.
    pub fn terminator(&self, block: Block) -> Option<Inst> {
        let last = self.layout.last_inst(block)?;
        if self.dfg.insts[last].opcode().is_terminator() {
            Some(last)
        } else {
            None
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write_function(fmt, self, None)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write_function(fmt, self, None)
    }
}
