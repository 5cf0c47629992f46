//! Typed intermediate representation for the relift binary rewriter.
//!
//! This crate provides the IR that the lifter targets: entity-indexed
//! values, instructions and blocks, a small type system covering machine
//! integers, IEEE floats, an opaque byte pointer and packed vectors, and a
//! builder with an explicit insertion cursor. A `Module` owns function
//! declarations and completed bodies; a `Function` owns its blocks,
//! instructions and values.
//!
//! Consumers are expected to depend on the capabilities exposed here
//! (constants, casts, arithmetic, shuffles, memory access, phi nodes,
//! branches, calls, annotations), not on any particular backing library.

#![warn(missing_docs)]

pub mod builder;
pub mod dfg;
pub mod entities;
pub mod entity;
pub mod function;
pub mod instructions;
pub mod module;
pub mod types;
pub mod write;

pub use crate::builder::{FuncBuilder, Position};
pub use crate::dfg::DataFlowGraph;
pub use crate::entities::{Block, FuncId, Inst, MdKind, Value};
pub use crate::function::{AbiParam, Annotation, Function, Layout, Signature};
pub use crate::instructions::{InstructionData, IntCC, Opcode};
pub use crate::module::{FuncDecl, Module};
pub use crate::types::{LaneType, Type};
