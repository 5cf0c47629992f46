//! Converting functions to text.
//!
//! The format is stable enough for tests to match on, one instruction per
//! line:
//!
//! ```text
//! function %sum(v0: i64, v1: ptr) -> f32 {
//! block0:
//!     v2 = iconst.i64 0
//!     v3 = iadd.i64 v2, v2
//!     jump block1
//! }
//! ```

use crate::entities::Inst;
use crate::function::Function;
use crate::instructions::InstructionData;
use crate::module::Module;
use core::fmt;

/// Write `func` to `w`. When `module` is given, metadata kinds resolve to
/// their interned strings; otherwise they print as `mdN`.
pub fn write_function(
    w: &mut dyn fmt::Write,
    func: &Function,
    module: Option<&Module>,
) -> fmt::Result {
    write!(w, "function %{}(", func.name)?;
    for (i, (value, param)) in func.params.iter().zip(&func.signature.params).enumerate() {
        if i != 0 {
            write!(w, ", ")?;
        }
        write!(w, "{value}: {}", param.ty)?;
    }
    writeln!(w, ") -> {} {{", func.signature.ret)?;

    for block in func.layout.blocks() {
        writeln!(w, "{block}:")?;
        for &inst in func.layout.block_insts(block) {
            write!(w, "    ")?;
            write_instruction(w, func, module, inst)?;
            writeln!(w)?;
        }
    }
    writeln!(w, "}}")
}

fn write_instruction(
    w: &mut dyn fmt::Write,
    func: &Function,
    module: Option<&Module>,
    inst: Inst,
) -> fmt::Result {
    if let Some(result) = func.dfg.first_result(inst) {
        write!(w, "{result} = ")?;
    }

    let opcode = func.dfg.insts[inst].opcode();
    match func.dfg.first_result(inst) {
        Some(result) => write!(w, "{opcode}.{}", func.dfg.value_type(result))?,
        None => write!(w, "{opcode}")?,
    }

    let val = |v| func.dfg.display_value(v);
    match &func.dfg.insts[inst] {
        InstructionData::Nullary { .. } => {}
        InstructionData::UnaryImm { imm, .. } => write!(w, " {imm}")?,
        InstructionData::UnaryIeee32 { imm, .. } => write!(w, " {}", f32::from_bits(*imm))?,
        InstructionData::UnaryIeee64 { imm, .. } => write!(w, " {}", f64::from_bits(*imm))?,
        InstructionData::Unary { arg, .. } => write!(w, " {}", val(*arg))?,
        InstructionData::Binary { args, .. } => write!(w, " {}, {}", val(args[0]), val(args[1]))?,
        InstructionData::FloatBinary { args, fast, .. } => {
            if *fast {
                write!(w, " fast")?;
            }
            write!(w, " {}, {}", val(args[0]), val(args[1]))?;
        }
        InstructionData::IntCompare { cond, args, .. } => {
            write!(w, " {cond} {}, {}", val(args[0]), val(args[1]))?;
        }
        InstructionData::Ternary { args, .. } => {
            write!(w, " {}, {}, {}", val(args[0]), val(args[1]), val(args[2]))?;
        }
        InstructionData::Load { arg, align, .. } => {
            write!(w, " {}", val(*arg))?;
            if *align != 0 {
                write!(w, ", align {align}")?;
            }
        }
        InstructionData::Store { args, align, .. } => {
            write!(w, " {}, {}", val(args[0]), val(args[1]))?;
            if *align != 0 {
                write!(w, ", align {align}")?;
            }
        }
        InstructionData::ExtractLane { arg, lane, .. } => write!(w, " {}, {lane}", val(*arg))?,
        InstructionData::InsertLane { args, lane, .. } => {
            write!(w, " {}, {}, {lane}", val(args[0]), val(args[1]))?;
        }
        InstructionData::Shuffle { args, mask, .. } => {
            write!(w, " {}, {}, [", val(args[0]), val(args[1]))?;
            for (i, lane) in mask.iter().enumerate() {
                if i != 0 {
                    write!(w, ", ")?;
                }
                write!(w, "{lane}")?;
            }
            write!(w, "]")?;
        }
        InstructionData::Phi { edges, .. } => {
            for (i, (block, value)) in edges.iter().enumerate() {
                if i != 0 {
                    write!(w, ",")?;
                }
                write!(w, " [{}, {block}]", val(*value))?;
            }
        }
        InstructionData::Call { func: callee, args, .. } => {
            write!(w, " {callee}(")?;
            for (i, arg) in args.iter().enumerate() {
                if i != 0 {
                    write!(w, ", ")?;
                }
                write!(w, "{}", val(*arg))?;
            }
            write!(w, ")")?;
        }
        InstructionData::Return { arg, .. } => {
            if let Some(arg) = arg.expand() {
                write!(w, " {}", val(arg))?;
            }
        }
        InstructionData::Jump { dest, .. } => write!(w, " {dest}")?,
        InstructionData::Branch {
            cond,
            then_dest,
            else_dest,
            ..
        } => write!(w, " {}, {then_dest}, {else_dest}", val(*cond))?,
    }

    for ann in func.annotations[inst].iter() {
        match module {
            Some(m) => write!(w, " !{}", m.metadata_name(ann.kind))?,
            None => write!(w, " !{}", ann.kind)?,
        }
        if let Some(text) = &ann.text {
            write!(w, " \"{text}\"")?;
        }
    }

    Ok(())
}

/// Render one instruction to a `String`, mostly for logging.
pub fn inst_to_string(func: &Function, inst: Inst) -> String {
    let mut s = String::new();
    write_instruction(&mut s, func, None, inst).unwrap();
    s
}
