//! Per-instruction semantic lowering.
//!
//! One dispatch site maps every supported opcode to its handler. The
//! conditional families (Jcc, SETcc, CMOVcc) arrive as single opcodes
//! carrying their condition, so each family is one arm. Before dispatch
//! every instruction advances the architectural instruction pointer and
//! plants a do-nothing marker annotated with the instruction text, which
//! downstream stages use to correlate IR with machine code.

mod gp;
mod sse;

use crate::error::{LiftError, LiftResult};
use crate::func::LiftContext;
use crate::inst::{regs, Inst, Opcode, Operand, Reg};
use crate::operand::{self, DataType, PartialRegisterHandling, ALIGN_MAXIMUM};
use crate::regfile::{Facet, RegisterFile};
use relift_ir::{FuncBuilder, Type, Value};

/// Sign-extend `value` to `ty` unless it is already that wide.
pub(crate) fn sign_extend_to(b: &mut FuncBuilder, ty: Type, value: Value) -> Value {
    if b.value_type(value) == ty {
        value
    } else {
        b.sext(ty, value)
    }
}

/// Lower one instruction into the current block.
pub(crate) fn lower_instruction(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    inst: &Inst,
) -> LiftResult<()> {
    log::trace!("lowering {:#x}: {inst}", inst.addr);

    // The instruction pointer always points at the next instruction.
    {
        let mut b = ctx.ins();
        let rip = b.iconst(Type::I64, (inst.addr + u64::from(inst.len)) as i64);
        rf.set(Facet::I64, Reg::rip(), rip, true, &mut b)?;
    }

    // Instruction-boundary marker.
    {
        let mut b = ctx.ins();
        let marker = b.nop();
        let kind = b.metadata_kind("asm.instr");
        b.annotate(marker, kind, Some(inst.to_string()));
    }

    match inst.opcode {
        Opcode::Nop | Opcode::HintCall | Opcode::HintRet => Ok(()),

        Opcode::Mov | Opcode::Movsx | Opcode::Movzx => gp::mov(ctx, rf, inst),
        Opcode::Cmovcc(cc) => gp::cmov(ctx, rf, inst, cc),
        Opcode::Setcc(cc) => gp::setcc(ctx, rf, inst, cc),

        Opcode::Add => gp::add(ctx, rf, inst),
        Opcode::Adc => gp::adc(ctx, rf, inst),
        Opcode::Sub => gp::sub(ctx, rf, inst),
        Opcode::Inc | Opcode::Dec => gp::incdec(ctx, rf, inst),
        Opcode::Cmp => gp::cmp(ctx, rf, inst),
        Opcode::Test => gp::test(ctx, rf, inst),
        Opcode::And | Opcode::Or | Opcode::Xor => gp::bitwise(ctx, rf, inst),
        Opcode::Not | Opcode::Neg => gp::notneg(ctx, rf, inst),
        Opcode::Imul | Opcode::Mul => gp::mul(ctx, rf, inst),
        Opcode::Shl | Opcode::Shr | Opcode::Sar => gp::shift(ctx, rf, inst),
        Opcode::Lea => gp::lea(ctx, rf, inst),
        Opcode::Cdqe => gp::cdqe(ctx, rf, inst),

        Opcode::Push | Opcode::Pop | Opcode::Leave => stack(ctx, rf, inst),
        Opcode::Call => call(ctx, rf, inst),
        Opcode::Ret => ret(ctx, rf),

        Opcode::Movd | Opcode::Movq => sse::movq(ctx, rf, inst),
        Opcode::Movss | Opcode::Movsd => sse::movs(ctx, rf, inst),
        Opcode::Movups | Opcode::Movupd | Opcode::Movaps | Opcode::Movapd => {
            sse::movp(ctx, rf, inst)
        }
        Opcode::Movdqa | Opcode::Movdqu => sse::movdq(ctx, rf, inst),
        Opcode::Movlps | Opcode::Movlpd => sse::movlp(ctx, rf, inst),
        Opcode::Movhps => sse::movhps(ctx, rf, inst),
        Opcode::Movhpd => sse::movhpd(ctx, rf, inst),
        Opcode::Unpcklps | Opcode::Unpcklpd => sse::unpckl(ctx, rf, inst),
        Opcode::Xorps | Opcode::Xorpd | Opcode::Pxor => sse::vxor(ctx, rf, inst),
        Opcode::Addss
        | Opcode::Addsd
        | Opcode::Addps
        | Opcode::Addpd
        | Opcode::Subss
        | Opcode::Subsd
        | Opcode::Subps
        | Opcode::Subpd
        | Opcode::Mulss
        | Opcode::Mulsd
        | Opcode::Mulps
        | Opcode::Mulpd => sse::arith(ctx, rf, inst),

        // Branches only advance the instruction pointer here; the block
        // emitter places the actual terminator.
        Opcode::Jmp | Opcode::Jcc(_) => Ok(()),

        Opcode::Invalid => {
            ctx.ins().unreachable();
            Ok(())
        }

        Opcode::Div
        | Opcode::Idiv
        | Opcode::Sbb
        | Opcode::Bsf
        | Opcode::Cqo
        | Opcode::Divss
        | Opcode::Divsd
        | Opcode::Sqrtss
        | Opcode::Sqrtsd
        | Opcode::Ucomiss
        | Opcode::Ucomisd => Err(LiftError::unsupported(inst)),
    }
}

/// PUSH, POP and LEAVE. The stack pointer is maintained as a pointer
/// offset on the `rsp` pointer facet; stack slots are 8 bytes.
fn stack(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    // LEAVE pops the saved frame pointer through `rbp`.
    let sp_src = if inst.opcode == Opcode::Leave {
        regs::RBP
    } else {
        regs::RSP
    };
    let sp = {
        let mut b = ctx.ins();
        rf.get(Facet::Ptr, sp_src, &mut b)?
    };

    let new_sp = match inst.opcode {
        Opcode::Push => {
            let value = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &inst.dst()?)?;
            let mut b = ctx.ins();
            let value = sign_extend_to(&mut b, Type::I64, value);
            let down = b.iconst(Type::I64, -8);
            let slot = b.gep(sp, down);
            b.store(8, value, slot);
            slot
        }
        Opcode::Pop | Opcode::Leave => {
            let value = {
                let mut b = ctx.ins();
                b.load(Type::I64, 8, sp)
            };
            let dst = if inst.opcode == Opcode::Leave {
                Operand::reg(regs::RBP)
            } else {
                inst.dst()?
            };
            operand::store(
                ctx,
                rf,
                DataType::Si,
                ALIGN_MAXIMUM,
                &dst,
                PartialRegisterHandling::Default,
                value,
            )?;
            let mut b = ctx.ins();
            let up = b.iconst(Type::I64, 8);
            b.gep(sp, up)
        }
        _ => return Err(LiftError::unsupported(inst)),
    };

    let mut b = ctx.ins();
    rf.set(Facet::Ptr, regs::RSP, new_sp, true, &mut b)
}

/// CALL to a declared function: marshal arguments per the machine ABI,
/// write the return value to the conventional register, and forget the
/// caller-saved registers.
fn call(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let target = match inst.dst()? {
        Operand::Imm { value, .. } => value as u64,
        _ => return Err(LiftError::malformed(inst, "call target must be an immediate address")),
    };
    let callee = ctx
        .decls
        .lookup(target)
        .ok_or(LiftError::UnresolvedCall(target))?;

    let args = operand::collect_args(ctx, rf, callee)?;
    let (_, result) = ctx.ins().call(callee, &args);

    let ret_ty = ctx.module.decl(callee).signature.ret;
    match (ret_ty, result) {
        (Type::Void, None) => {}
        (Type::Ptr, Some(value)) => {
            let mut b = ctx.ins();
            rf.set(Facet::Ptr, regs::RAX, value, true, &mut b)?;
        }
        (Type::I8 | Type::I16 | Type::I32 | Type::I64, Some(value)) => {
            let dst = Operand::reg(Reg::gp(ret_ty.bits() as u16, 0));
            operand::store(
                ctx,
                rf,
                DataType::Si,
                ALIGN_MAXIMUM,
                &dst,
                PartialRegisterHandling::Default,
                value,
            )?;
        }
        (Type::F32, Some(value)) => {
            let dst = Operand::reg(regs::XMM0);
            operand::store(
                ctx,
                rf,
                DataType::Sf32,
                ALIGN_MAXIMUM,
                &dst,
                PartialRegisterHandling::ZeroUpper,
                value,
            )?;
        }
        (Type::F64, Some(value)) => {
            let dst = Operand::reg(regs::XMM0);
            operand::store(
                ctx,
                rf,
                DataType::Sf64,
                ALIGN_MAXIMUM,
                &dst,
                PartialRegisterHandling::ZeroUpper,
                value,
            )?;
        }
        _ => {
            return Err(LiftError::invariant(format!(
                "unsupported call return type {ret_ty}"
            )));
        }
    }

    let mut b = ctx.ins();
    for reg in [
        regs::RCX,
        regs::RDX,
        regs::RSI,
        regs::RDI,
        regs::R8,
        regs::R9,
        regs::R10,
        regs::R11,
    ] {
        rf.clear(reg, &mut b);
    }
    Ok(())
}

/// RET: read the return value from the conventional register dictated by
/// the function's signature and emit a typed return.
fn ret(ctx: &mut LiftContext, rf: &mut RegisterFile) -> LiftResult<()> {
    let ret_ty = ctx.func.signature.ret;
    let value = match ret_ty {
        Type::Void => None,
        Type::Ptr => {
            let mut b = ctx.ins();
            Some(rf.get(Facet::Ptr, regs::RAX, &mut b)?)
        }
        Type::I8 | Type::I16 | Type::I32 | Type::I64 => {
            let src = Operand::reg(Reg::gp(ret_ty.bits() as u16, 0));
            Some(operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &src)?)
        }
        Type::F32 => {
            let src = Operand::reg(regs::XMM0);
            Some(operand::load(ctx, rf, DataType::Sf32, ALIGN_MAXIMUM, &src)?)
        }
        Type::F64 => {
            let src = Operand::reg(regs::XMM0);
            Some(operand::load(ctx, rf, DataType::Sf64, ALIGN_MAXIMUM, &src)?)
        }
        _ => {
            return Err(LiftError::invariant(format!(
                "unsupported return type {ret_ty}"
            )));
        }
    };
    ctx.ins().ret(value);
    Ok(())
}
