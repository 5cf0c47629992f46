//! Data flow graph tracking instructions and values.

use crate::entities::{Block, Inst, Value};
use crate::entity::{PackedOption, PrimaryMap, SecondaryMap};
use crate::instructions::InstructionData;
use crate::types::Type;
use hashbrown::HashMap;

/// Where a value comes from.
#[derive(Clone, Debug)]
enum ValueData {
    /// The result of an instruction.
    Inst {
        ty: Type,
        inst: Inst,
    },
    /// A function parameter.
    Param {
        ty: Type,
        num: u16,
    },
    /// An undefined value of the given type. Interned.
    Undef {
        ty: Type,
    },
    /// The typed all-zeros constant. Interned.
    Zero {
        ty: Type,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum PoolKind {
    Undef,
    Zero,
}

/// A data flow graph defines all instructions and values in a function, and
/// associates every instruction with its (at most one) result value.
#[derive(Clone)]
pub struct DataFlowGraph {
    /// Data about all of the instructions in the function.
    pub insts: PrimaryMap<Inst, InstructionData>,

    /// The result value of each instruction, if it has one.
    results: SecondaryMap<Inst, PackedOption<Value>>,

    /// Definition and type of every value.
    values: PrimaryMap<Value, ValueData>,

    /// Interned `undef`/`zero` values, one per type.
    pool: HashMap<(PoolKind, Type), Value>,
}

impl DataFlowGraph {
    /// Create a new empty data flow graph.
    pub fn new() -> Self {
        Self {
            insts: PrimaryMap::new(),
            results: SecondaryMap::new(),
            values: PrimaryMap::new(),
            pool: HashMap::new(),
        }
    }

    /// Number of instructions created.
    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    /// Create a new instruction from `data`. The instruction is not inserted
    /// into any block layout.
    pub fn make_inst(&mut self, data: InstructionData) -> Inst {
        self.insts.push(data)
    }

    /// Attach a result value of type `ty` to `inst`.
    pub fn attach_result(&mut self, inst: Inst, ty: Type) -> Value {
        debug_assert!(ty != Type::Void);
        debug_assert!(self.results[inst].is_none(), "instruction already has a result");
        let value = self.values.push(ValueData::Inst { ty, inst });
        self.results[inst] = value.into();
        value
    }

    /// The result value of `inst`, if it has one.
    pub fn first_result(&self, inst: Inst) -> Option<Value> {
        self.results[inst].expand()
    }

    /// Create a function parameter value.
    pub fn make_param(&mut self, ty: Type, num: u16) -> Value {
        self.values.push(ValueData::Param { ty, num })
    }

    /// The interned undefined value of type `ty`.
    pub fn undef(&mut self, ty: Type) -> Value {
        debug_assert!(ty != Type::Void);
        match self.pool.get(&(PoolKind::Undef, ty)) {
            Some(&v) => v,
            None => {
                let v = self.values.push(ValueData::Undef { ty });
                self.pool.insert((PoolKind::Undef, ty), v);
                v
            }
        }
    }

    /// The interned all-zeros constant of type `ty`.
    pub fn zero(&mut self, ty: Type) -> Value {
        debug_assert!(ty != Type::Void);
        match self.pool.get(&(PoolKind::Zero, ty)) {
            Some(&v) => v,
            None => {
                let v = self.values.push(ValueData::Zero { ty });
                self.pool.insert((PoolKind::Zero, ty), v);
                v
            }
        }
    }

    /// The type of a value.
    pub fn value_type(&self, v: Value) -> Type {
        match self.values[v] {
            ValueData::Inst { ty, .. }
            | ValueData::Param { ty, .. }
            | ValueData::Undef { ty }
            | ValueData::Zero { ty } => ty,
        }
    }

    /// The instruction defining `v`, if it is an instruction result.
    pub fn value_def(&self, v: Value) -> Option<Inst> {
        match self.values[v] {
            ValueData::Inst { inst, .. } => Some(inst),
            _ => None,
        }
    }

    /// True if `v` is a compile-time constant (interned or a `*const`
    /// instruction result).
    pub fn value_is_const(&self, v: Value) -> bool {
        match self.values[v] {
            ValueData::Undef { .. } | ValueData::Zero { .. } => true,
            ValueData::Param { .. } => false,
            ValueData::Inst { inst, .. } => self.insts[inst].is_const(),
        }
    }

    /// True if `v` is the typed all-zeros constant.
    pub fn value_is_zero(&self, v: Value) -> bool {
        match self.values[v] {
            ValueData::Zero { .. } => true,
            ValueData::Inst { inst, .. } => {
                matches!(self.insts[inst], InstructionData::UnaryImm { imm: 0, .. })
            }
            _ => false,
        }
    }

    /// Append an incoming edge to a phi instruction.
    pub fn append_phi_edge(&mut self, phi: Inst, block: Block, value: Value) {
        match &mut self.insts[phi] {
            InstructionData::Phi { edges, .. } => edges.push((block, value)),
            _ => panic!("{phi} is not a phi instruction"),
        }
    }

    /// The incoming edges of a phi instruction.
    pub fn phi_edges(&self, phi: Inst) -> &[(Block, Value)] {
        match &self.insts[phi] {
            InstructionData::Phi { edges, .. } => edges,
            _ => panic!("{phi} is not a phi instruction"),
        }
    }

    /// Render a value for the textual format. Interned constants print
    /// inline since they have no defining instruction to look at.
    pub fn display_value(&self, v: Value) -> String {
        match self.values[v] {
            ValueData::Undef { ty } => format!("undef.{ty}"),
            ValueData::Zero { ty } => format!("zero.{ty}"),
            _ => v.to_string(),
        }
    }
}

impl Default for DataFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::Opcode;

    #[test]
    fn results_and_types() {
        let mut dfg = DataFlowGraph::new();
        let inst = dfg.make_inst(InstructionData::UnaryImm {
            opcode: Opcode::Iconst,
            imm: 12,
        });
        assert_eq!(dfg.first_result(inst), None);
        let v = dfg.attach_result(inst, Type::I32);
        assert_eq!(dfg.first_result(inst), Some(v));
        assert_eq!(dfg.value_type(v), Type::I32);
        assert_eq!(dfg.value_def(v), Some(inst));
        assert!(dfg.value_is_const(v));
        assert!(!dfg.value_is_zero(v));
    }

    #[test]
    fn interned_constants() {
        let mut dfg = DataFlowGraph::new();
        let u1 = dfg.undef(Type::I64);
        let u2 = dfg.undef(Type::I64);
        let u3 = dfg.undef(Type::I32);
        assert_eq!(u1, u2);
        assert_ne!(u1, u3);

        let z = dfg.zero(Type::I64);
        assert!(dfg.value_is_zero(z));
        assert_eq!(dfg.display_value(z), "zero.i64");
        assert_eq!(dfg.display_value(u3), "undef.i32");
    }
}
