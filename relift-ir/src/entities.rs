//! IR entity references.
//!
//! Every entity reference wraps a `u32` index into a table owned by the
//! `Function` or `Module`; see the `entity` module for the rationale. The
//! `Display` implementations match the textual IR format.

use crate::entity_impl;

/// An opaque reference to an SSA value.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// An opaque reference to an instruction in a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An opaque reference to a basic block in a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// A reference to a function declared in a module.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct FuncId(u32);
entity_impl!(FuncId, "fn");

/// A reference to an interned metadata kind string.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct MdKind(u32);
entity_impl!(MdKind, "md");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Value::from_u32(3).to_string(), "v3");
        assert_eq!(Block::from_u32(0).to_string(), "block0");
        assert_eq!(FuncId::from_u32(7).to_string(), "fn7");
    }
}
