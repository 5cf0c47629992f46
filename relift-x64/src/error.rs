//! Lift error taxonomy.
//!
//! Every error aborts the function being lifted; the partially built IR is
//! dropped and the module is left untouched. Opcodes whose flag effects
//! are not modeled are handled by invalidating the flags, never by an
//! error.

use crate::inst::Inst;
use thiserror::Error;

/// A lifting failure. The rendered instruction text is captured eagerly so
/// errors can outlive the function description they came from.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LiftError {
    /// The opcode is not in the supported set.
    #[error("unsupported instruction: {0}")]
    Unsupported(String),

    /// A register-file or lifecycle invariant was violated by the caller.
    #[error("lifting invariant violated: {0}")]
    Invariant(String),

    /// A CALL target does not match any declared function.
    #[error("call target {0:#x} does not match any declared function")]
    UnresolvedCall(u64),

    /// Operand kinds or widths are inconsistent with the opcode.
    #[error("malformed operand in `{inst}`: {what}")]
    MalformedOperand {
        /// The rendered instruction.
        inst: String,
        /// What was wrong with it.
        what: &'static str,
    },
}

impl LiftError {
    /// An `Unsupported` error for the given instruction.
    pub fn unsupported(inst: &Inst) -> Self {
        log::error!("unsupported instruction at {:#x}: {inst}", inst.addr);
        LiftError::Unsupported(inst.to_string())
    }

    /// A `MalformedOperand` error for the given instruction.
    pub fn malformed(inst: &Inst, what: &'static str) -> Self {
        log::error!("malformed operand at {:#x}: {inst}: {what}", inst.addr);
        LiftError::MalformedOperand {
            inst: inst.to_string(),
            what,
        }
    }

    /// An `Invariant` error with a formatted description.
    pub fn invariant(what: impl Into<String>) -> Self {
        let what = what.into();
        log::error!("lifting invariant violated: {what}");
        LiftError::Invariant(what)
    }
}

/// The result type used by all fallible lifting operations.
pub type LiftResult<T> = Result<T, LiftError>;
