//! Lifter from decoded x86-64 machine code to relift IR.
//!
//! This crate is the back end of a dynamic binary rewriter: a client
//! supplies a function description (entry address, decoded basic blocks,
//! successor edges) and receives an IR function whose semantics reproduce
//! the original machine code, ready for optimization and re-emission.
//!
//! The interesting machinery is the multi-facet register file
//! ([`regfile`]), the per-block phi placement and filling ([`block`]) and
//! the per-instruction lowering ([`lower`], internal). Instruction
//! decoding, CFG discovery, optimization and code emission are external
//! collaborators reached only through the data types in [`inst`] and the
//! [`relift_ir`] module handed back to the caller.
//!
//! ```no_run
//! use relift_ir::{Module, Signature, Type};
//! use relift_x64::{Config, DeclaredFunctions, FunctionLifter};
//!
//! let mut module = Module::new();
//! let mut decls = DeclaredFunctions::new();
//! let sig = Signature::new(Type::I64).param(Type::I64);
//! let id = decls.declare(&mut module, "f", sig, 0x1000);
//!
//! let mut lifter = FunctionLifter::new(id, 0x1000, Config::default());
//! let body = lifter.add_block(0x1000, vec![/* decoded instructions */]);
//! let _ = body;
//! lifter.lift(&mut module, &decls).unwrap();
//! ```

#![warn(missing_docs)]

pub mod block;
pub mod error;
pub mod flags;
pub mod func;
pub mod inst;
mod lower;
pub mod operand;
pub mod regfile;

pub use crate::block::{Bb, LiftBlock};
pub use crate::error::{LiftError, LiftResult};
pub use crate::flags::{Flag, FlagCache};
pub use crate::func::{Config, DeclaredFunctions, FunctionLifter, LiftContext, VectorSize};
pub use crate::inst::{Cond, Inst, MemOperand, Opcode, Operand, Reg, RegKind, Segment, regs};
pub use crate::operand::{ALIGN_MAXIMUM, DataType, PartialRegisterHandling};
pub use crate::regfile::{Facet, RegisterFile};
