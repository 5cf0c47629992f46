//! Instruction formats and opcodes.
//!
//! Every instruction is one variant of the `InstructionData` enum. The
//! variants group instructions by their operand shape, not by semantics;
//! the `Opcode` stored inside distinguishes, say, `iadd` from `bxor`.

use crate::entities::{Block, FuncId, Value};
use crate::entity::PackedOption;

/// An integer comparison condition code.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntCC {
    /// `==`.
    Equal,
    /// `!=`.
    NotEqual,
    /// Signed `<`.
    SignedLessThan,
    /// Signed `>=`.
    SignedGreaterThanOrEqual,
    /// Signed `>`.
    SignedGreaterThan,
    /// Signed `<=`.
    SignedLessThanOrEqual,
    /// Unsigned `<`.
    UnsignedLessThan,
    /// Unsigned `>=`.
    UnsignedGreaterThanOrEqual,
    /// Unsigned `>`.
    UnsignedGreaterThan,
    /// Unsigned `<=`.
    UnsignedLessThanOrEqual,
}

impl IntCC {
    /// The inverse condition: same operands, negated outcome.
    pub fn inverse(self) -> Self {
        use IntCC::*;
        match self {
            Equal => NotEqual,
            NotEqual => Equal,
            SignedLessThan => SignedGreaterThanOrEqual,
            SignedGreaterThanOrEqual => SignedLessThan,
            SignedGreaterThan => SignedLessThanOrEqual,
            SignedLessThanOrEqual => SignedGreaterThan,
            UnsignedLessThan => UnsignedGreaterThanOrEqual,
            UnsignedGreaterThanOrEqual => UnsignedLessThan,
            UnsignedGreaterThan => UnsignedLessThanOrEqual,
            UnsignedLessThanOrEqual => UnsignedGreaterThan,
        }
    }
}

impl core::fmt::Display for IntCC {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        use IntCC::*;
        f.write_str(match self {
            Equal => "eq",
            NotEqual => "ne",
            SignedLessThan => "slt",
            SignedGreaterThanOrEqual => "sge",
            SignedGreaterThan => "sgt",
            SignedLessThanOrEqual => "sle",
            UnsignedLessThan => "ult",
            UnsignedGreaterThanOrEqual => "uge",
            UnsignedGreaterThan => "ugt",
            UnsignedLessThanOrEqual => "ule",
        })
    }
}

/// An instruction opcode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    /// Integer constant.
    Iconst,
    /// 32-bit float constant.
    F32const,
    /// 64-bit float constant.
    F64const,
    /// Do-nothing marker instruction; carrier for annotations.
    Nop,
    /// Bitwise complement.
    Bnot,
    /// Two's complement negation.
    Ineg,
    /// Population count.
    Popcnt,
    /// Integer truncation to a narrower type.
    Trunc,
    /// Sign extension to a wider type.
    Sext,
    /// Zero extension to a wider type.
    Zext,
    /// Same-width reinterpretation.
    Bitcast,
    /// Integer to pointer conversion.
    IntToPtr,
    /// Pointer to integer conversion.
    PtrToInt,
    /// Wrapping integer addition.
    Iadd,
    /// Wrapping integer subtraction.
    Isub,
    /// Wrapping integer multiplication.
    Imul,
    /// Bitwise and.
    Band,
    /// Bitwise or.
    Bor,
    /// Bitwise xor.
    Bxor,
    /// Shift left.
    Ishl,
    /// Logical shift right.
    Ushr,
    /// Arithmetic shift right.
    Sshr,
    /// Floating-point addition.
    Fadd,
    /// Floating-point subtraction.
    Fsub,
    /// Floating-point multiplication.
    Fmul,
    /// Integer comparison producing an `i1`.
    Icmp,
    /// Conditional value selection.
    Select,
    /// Typed memory load.
    Load,
    /// Typed memory store.
    Store,
    /// Byte-addressed pointer offset; preserves provenance.
    Gep,
    /// Extract one lane of a vector.
    Extractlane,
    /// Insert a scalar into one lane of a vector.
    Insertlane,
    /// Lane shuffle of two vectors with a constant mask.
    Shuffle,
    /// Join node selecting one incoming value per predecessor edge.
    Phi,
    /// Direct call of a declared function.
    Call,
    /// Return from the function.
    Return,
    /// Unconditional branch.
    Jump,
    /// Two-way conditional branch.
    Br,
    /// Marks an unreachable program point.
    Unreachable,
}

impl Opcode {
    /// True if the instruction ends a block.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Return | Opcode::Jump | Opcode::Br | Opcode::Unreachable
        )
    }

    /// True if the instruction transfers control to another block.
    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::Br)
    }
}

impl core::fmt::Display for Opcode {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        use Opcode::*;
        f.write_str(match self {
            Iconst => "iconst",
            F32const => "f32const",
            F64const => "f64const",
            Nop => "nop",
            Bnot => "bnot",
            Ineg => "ineg",
            Popcnt => "popcnt",
            Trunc => "trunc",
            Sext => "sext",
            Zext => "zext",
            Bitcast => "bitcast",
            IntToPtr => "inttoptr",
            PtrToInt => "ptrtoint",
            Iadd => "iadd",
            Isub => "isub",
            Imul => "imul",
            Band => "band",
            Bor => "bor",
            Bxor => "bxor",
            Ishl => "ishl",
            Ushr => "ushr",
            Sshr => "sshr",
            Fadd => "fadd",
            Fsub => "fsub",
            Fmul => "fmul",
            Icmp => "icmp",
            Select => "select",
            Load => "load",
            Store => "store",
            Gep => "gep",
            Extractlane => "extractlane",
            Insertlane => "insertlane",
            Shuffle => "shuffle",
            Phi => "phi",
            Call => "call",
            Return => "return",
            Jump => "jump",
            Br => "br",
            Unreachable => "unreachable",
        })
    }
}

/// The contents of an instruction.
#[derive(Clone, PartialEq, Debug)]
pub enum InstructionData {
    /// An instruction with no operands.
    Nullary {
        /// `nop` or `unreachable`.
        opcode: Opcode,
    },
    /// An integer immediate; the result type gives the width.
    UnaryImm {
        /// Always `iconst`.
        opcode: Opcode,
        /// The immediate, sign-extended to 64 bits.
        imm: i64,
    },
    /// A 32-bit float immediate kept as raw bits.
    UnaryIeee32 {
        /// Always `f32const`.
        opcode: Opcode,
        /// Raw IEEE-754 bits.
        imm: u32,
    },
    /// A 64-bit float immediate kept as raw bits.
    UnaryIeee64 {
        /// Always `f64const`.
        opcode: Opcode,
        /// Raw IEEE-754 bits.
        imm: u64,
    },
    /// A single-operand instruction, including the casts.
    Unary {
        /// The opcode.
        opcode: Opcode,
        /// The operand.
        arg: Value,
    },
    /// A two-operand integer instruction.
    Binary {
        /// The opcode.
        opcode: Opcode,
        /// The operands.
        args: [Value; 2],
    },
    /// A two-operand floating-point instruction with a fast-math flag.
    FloatBinary {
        /// The opcode.
        opcode: Opcode,
        /// The operands.
        args: [Value; 2],
        /// Whether unsafe-algebra optimizations are permitted.
        fast: bool,
    },
    /// An integer comparison.
    IntCompare {
        /// Always `icmp`.
        opcode: Opcode,
        /// The condition code.
        cond: IntCC,
        /// The operands.
        args: [Value; 2],
    },
    /// A three-operand instruction (`select`).
    Ternary {
        /// The opcode.
        opcode: Opcode,
        /// The operands; for `select`: condition, if-true, if-false.
        args: [Value; 3],
    },
    /// A typed load; the result type gives the loaded type.
    Load {
        /// Always `load`.
        opcode: Opcode,
        /// The address.
        arg: Value,
        /// Alignment in bytes; 0 means natural alignment.
        align: u8,
    },
    /// A typed store.
    Store {
        /// Always `store`.
        opcode: Opcode,
        /// The stored value and the address.
        args: [Value; 2],
        /// Alignment in bytes; 0 means natural alignment.
        align: u8,
    },
    /// Lane extraction.
    ExtractLane {
        /// Always `extractlane`.
        opcode: Opcode,
        /// The vector operand.
        arg: Value,
        /// The lane index.
        lane: u8,
    },
    /// Lane insertion.
    InsertLane {
        /// Always `insertlane`.
        opcode: Opcode,
        /// The vector and the scalar operands.
        args: [Value; 2],
        /// The lane index.
        lane: u8,
    },
    /// A vector shuffle with a compile-time mask. Mask entries index the
    /// concatenated lanes of both operands.
    Shuffle {
        /// Always `shuffle`.
        opcode: Opcode,
        /// The two vector operands.
        args: [Value; 2],
        /// The lane selection mask.
        mask: Box<[u8]>,
    },
    /// A join node. Edges are appended after creation, one per predecessor.
    Phi {
        /// Always `phi`.
        opcode: Opcode,
        /// The incoming (predecessor block, value) pairs.
        edges: Vec<(Block, Value)>,
    },
    /// A direct call.
    Call {
        /// Always `call`.
        opcode: Opcode,
        /// The callee.
        func: FuncId,
        /// The arguments.
        args: Vec<Value>,
    },
    /// Function return.
    Return {
        /// Always `return`.
        opcode: Opcode,
        /// The returned value, if the function returns one.
        arg: PackedOption<Value>,
    },
    /// Unconditional branch.
    Jump {
        /// Always `jump`.
        opcode: Opcode,
        /// The target block.
        dest: Block,
    },
    /// Conditional branch.
    Branch {
        /// Always `br`.
        opcode: Opcode,
        /// The `i1` condition.
        cond: Value,
        /// Target when the condition is true.
        then_dest: Block,
        /// Target when the condition is false.
        else_dest: Block,
    },
}

impl InstructionData {
    /// The opcode of this instruction.
    pub fn opcode(&self) -> Opcode {
        match *self {
            InstructionData::Nullary { opcode }
            | InstructionData::UnaryImm { opcode, .. }
            | InstructionData::UnaryIeee32 { opcode, .. }
            | InstructionData::UnaryIeee64 { opcode, .. }
            | InstructionData::Unary { opcode, .. }
            | InstructionData::Binary { opcode, .. }
            | InstructionData::FloatBinary { opcode, .. }
            | InstructionData::IntCompare { opcode, .. }
            | InstructionData::Ternary { opcode, .. }
            | InstructionData::Load { opcode, .. }
            | InstructionData::Store { opcode, .. }
            | InstructionData::ExtractLane { opcode, .. }
            | InstructionData::InsertLane { opcode, .. }
            | InstructionData::Shuffle { opcode, .. }
            | InstructionData::Phi { opcode, .. }
            | InstructionData::Call { opcode, .. }
            | InstructionData::Return { opcode, .. }
            | InstructionData::Jump { opcode, .. }
            | InstructionData::Branch { opcode, .. } => opcode,
        }
    }

    /// True if this instruction is a constant producer.
    pub fn is_const(&self) -> bool {
        matches!(
            self.opcode(),
            Opcode::Iconst | Opcode::F32const | Opcode::F64const
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_inverses() {
        use IntCC::*;
        for cc in [
            Equal,
            NotEqual,
            SignedLessThan,
            SignedGreaterThanOrEqual,
            SignedGreaterThan,
            SignedLessThanOrEqual,
            UnsignedLessThan,
            UnsignedGreaterThanOrEqual,
            UnsignedGreaterThan,
            UnsignedLessThanOrEqual,
        ] {
            assert_eq!(cc.inverse().inverse(), cc);
            assert_ne!(cc.inverse(), cc);
        }
    }

    #[test]
    fn terminators() {
        assert!(Opcode::Return.is_terminator());
        assert!(Opcode::Br.is_terminator());
        assert!(Opcode::Unreachable.is_terminator());
        assert!(!Opcode::Iadd.is_terminator());
        assert!(Opcode::Jump.is_branch());
        assert!(!Opcode::Return.is_branch());
    }
}
