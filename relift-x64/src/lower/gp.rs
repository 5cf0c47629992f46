//! General-purpose instruction handlers.

use super::sign_extend_to;
use crate::error::{LiftError, LiftResult};
use crate::flags::{self, Flag};
use crate::func::LiftContext;
use crate::inst::{Cond, Inst, Opcode, Operand, Reg, RegKind};
use crate::operand::{self, DataType, PartialRegisterHandling, ALIGN_MAXIMUM};
use crate::regfile::{Facet, RegisterFile};
use relift_ir::{IntCC, Type, Value};

fn store_default(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    dst: &Operand,
    value: Value,
) -> LiftResult<()> {
    operand::store(
        ctx,
        rf,
        DataType::Si,
        ALIGN_MAXIMUM,
        dst,
        PartialRegisterHandling::Default,
        value,
    )
}

/// MOV, MOVSX and MOVZX. A 64-bit register-to-register move renames the
/// whole facet bundle so pointer provenance survives.
pub(super) fn mov(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let src = inst.src()?;

    if dst.is_gp_reg() && src.is_gp_reg() && dst.width() == 64 && src.width() == 64 {
        if let (Some(d), Some(s)) = (dst.get_reg(), src.get_reg()) {
            rf.rename(d, s);
            return Ok(());
        }
    }

    let target = Type::int(u32::from(dst.width()))
        .ok_or_else(|| LiftError::malformed(inst, "unsupported move width"))?;
    let mut value = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &src)?;
    {
        let mut b = ctx.ins();
        if b.value_type(value).bits() < target.bits() {
            value = match inst.opcode {
                Opcode::Movzx => b.zext(target, value),
                // MOV with a narrow immediate sign-extends, like MOVSX.
                _ => b.sext(target, value),
            };
        }
    }
    store_default(ctx, rf, &dst, value)
}

/// CMOVcc: select between the source and the current destination value.
pub(super) fn cmov(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    inst: &Inst,
    cc: Cond,
) -> LiftResult<()> {
    let cond = flags::condition(ctx, rf, cc)?;
    let dst = inst.dst()?;
    let if_true = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &inst.src()?)?;
    let if_false = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &dst)?;
    let result = ctx.ins().select(cond, if_true, if_false);
    store_default(ctx, rf, &dst, result)
}

/// SETcc: zero-extend the condition to one byte.
pub(super) fn setcc(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    inst: &Inst,
    cc: Cond,
) -> LiftResult<()> {
    let cond = flags::condition(ctx, rf, cc)?;
    let result = ctx.ins().zext(Type::I8, cond);
    store_default(ctx, rf, &inst.dst()?, result)
}

/// ADD. A 64-bit register destination also gets a pointer-offset update of
/// its pointer facet so that pointer arithmetic survives lifting.
pub(super) fn add(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let op1 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &dst)?;
    let op2 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &inst.src()?)?;

    let mut stored = false;
    let (result, op2) = {
        let mut b = ctx.ins();
        let ty = b.value_type(op1);
        let op2 = sign_extend_to(&mut b, ty, op2);
        let result = b.iadd(op1, op2);
        if ty == Type::I64 {
            if let Some(reg) = dst.get_reg().filter(|r| r.is_gp()) {
                let ptr = rf.get(Facet::Ptr, reg, &mut b)?;
                let moved = b.gep(ptr, op2);
                rf.set(Facet::I64, reg, result, true, &mut b)?;
                rf.set(Facet::Ptr, reg, moved, false, &mut b)?;
                stored = true;
            }
        }
        (result, op2)
    };
    if !stored {
        store_default(ctx, rf, &dst, result)?;
    }
    flags::set_add(ctx, rf, result, op1, op2);
    Ok(())
}

/// ADC: two additions folding in the carry bit. The flag effects are not
/// modeled, so the flags are invalidated.
pub(super) fn adc(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let op1 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &dst)?;
    let op2 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &inst.src()?)?;
    let result = {
        let mut b = ctx.ins();
        let ty = b.value_type(op1);
        let op2 = sign_extend_to(&mut b, ty, op2);
        let sum = b.iadd(op1, op2);
        let cf = rf.get_flag(Flag::Cf)?;
        let carry = b.zext(ty, cf);
        b.iadd(sum, carry)
    };
    flags::invalidate(ctx, rf);
    store_default(ctx, rf, &dst, result)
}

/// SUB, with the same pointer-facet treatment as ADD.
pub(super) fn sub(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let op1 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &dst)?;
    let op2 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &inst.src()?)?;

    let mut stored = false;
    let (result, op2) = {
        let mut b = ctx.ins();
        let ty = b.value_type(op1);
        let op2 = sign_extend_to(&mut b, ty, op2);
        let result = b.isub(op1, op2);
        if ty == Type::I64 {
            if let Some(reg) = dst.get_reg().filter(|r| r.is_gp()) {
                let back = b.ineg(op2);
                let ptr = rf.get(Facet::Ptr, reg, &mut b)?;
                let moved = b.gep(ptr, back);
                rf.set(Facet::I64, reg, result, true, &mut b)?;
                rf.set(Facet::Ptr, reg, moved, false, &mut b)?;
                stored = true;
            }
        }
        (result, op2)
    };
    if !stored {
        store_default(ctx, rf, &dst, result)?;
    }
    flags::set_sub(ctx, rf, result, op1, op2);
    Ok(())
}

/// INC and DEC: add or subtract one, preserving CF.
pub(super) fn incdec(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let op1 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &dst)?;
    let result = {
        let mut b = ctx.ins();
        let ty = b.value_type(op1);
        let one = b.iconst(ty, 1);
        if inst.opcode == Opcode::Inc {
            b.iadd(op1, one)
        } else {
            b.isub(op1, one)
        }
    };
    if inst.opcode == Opcode::Inc {
        flags::set_inc(ctx, rf, result, op1);
    } else {
        flags::set_dec(ctx, rf, result, op1);
    }
    store_default(ctx, rf, &dst, result)
}

/// CMP: subtract without storing, flags only.
pub(super) fn cmp(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let op1 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &inst.dst()?)?;
    let op2 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &inst.src()?)?;
    let (result, op2) = {
        let mut b = ctx.ins();
        let ty = b.value_type(op1);
        let op2 = sign_extend_to(&mut b, ty, op2);
        (b.isub(op1, op2), op2)
    };
    flags::set_sub(ctx, rf, result, op1, op2);
    Ok(())
}

/// TEST: bitwise and without storing, flags only.
pub(super) fn test(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let op1 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &inst.dst()?)?;
    let op2 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &inst.src()?)?;
    let result = {
        let mut b = ctx.ins();
        let ty = b.value_type(op1);
        let op2 = sign_extend_to(&mut b, ty, op2);
        b.band(op1, op2)
    };
    flags::set_bit(ctx, rf, result);
    Ok(())
}

/// AND, OR and XOR. `xor r, r` is the canonical zero idiom and produces a
/// compile-time zero; for a full 64-bit register every facet is zeroed.
pub(super) fn bitwise(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let src = inst.src()?;

    if inst.opcode == Opcode::Xor && dst == src {
        let ty = Type::int(u32::from(dst.width()))
            .ok_or_else(|| LiftError::malformed(inst, "unsupported operand width"))?;
        let zero = ctx.ins().zero(ty);
        if let Some(reg) = dst.get_reg().filter(|r| r.is_gp() && r.width() == 64) {
            let mut b = ctx.ins();
            rf.zero(reg, &mut b);
        } else {
            store_default(ctx, rf, &dst, zero)?;
        }
        flags::set_bit(ctx, rf, zero);
        return Ok(());
    }

    let op1 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &dst)?;
    let op2 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &src)?;
    let result = {
        let mut b = ctx.ins();
        let ty = b.value_type(op1);
        let op2 = sign_extend_to(&mut b, ty, op2);
        match inst.opcode {
            Opcode::And => b.band(op1, op2),
            Opcode::Or => b.bor(op1, op2),
            _ => b.bxor(op1, op2),
        }
    };
    flags::set_bit(ctx, rf, result);
    store_default(ctx, rf, &dst, result)
}

/// NOT (flags untouched are invalidated anyway by the original) and NEG
/// (CF set when the operand is nonzero, the rest derived from a
/// subtraction from zero).
pub(super) fn notneg(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let op1 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &dst)?;

    if inst.opcode == Opcode::Neg {
        let (result, zero, cf) = {
            let mut b = ctx.ins();
            let ty = b.value_type(op1);
            let result = b.ineg(op1);
            let zero = b.zero(ty);
            let cf = b.icmp(IntCC::NotEqual, op1, zero);
            (result, zero, cf)
        };
        flags::invalidate(ctx, rf);
        rf.set_flag(Flag::Cf, cf);
        flags::set_pf(ctx, rf, result);
        flags::set_zf(ctx, rf, result);
        flags::set_sf(ctx, rf, result);
        flags::set_af(ctx, rf, result, zero, op1);
        flags::set_of_sub(ctx, rf, result, zero, op1);
        store_default(ctx, rf, &dst, result)
    } else {
        let result = ctx.ins().bnot(op1);
        flags::invalidate(ctx, rf);
        store_default(ctx, rf, &dst, result)
    }
}

/// IMUL (all three forms) and one-operand MUL.
pub(super) fn mul(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    flags::invalidate(ctx, rf);

    if inst.src.is_none() {
        return mul_one_operand(ctx, rf, inst);
    }

    let (dst, lhs, rhs) = if inst.src2.is_some() {
        (inst.dst()?, inst.src()?, inst.src2()?)
    } else {
        (inst.dst()?, inst.dst()?, inst.src()?)
    };
    let op1 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &lhs)?;
    let op2 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &rhs)?;
    let (result, op2) = {
        let mut b = ctx.ins();
        let ty = b.value_type(op1);
        let op2 = sign_extend_to(&mut b, ty, op2);
        (b.imul(op1, op2), op2)
    };
    store_default(ctx, rf, &dst, result)?;
    flags::set_sf(ctx, rf, result);
    flags::set_of_imul(ctx, rf, result, op1, op2);
    Ok(())
}

// One-operand forms compute the double-width product of the operand and
// the accumulator into the A:D register pair. An 8-bit multiply stores the
// whole 16-bit product into AX and leaves the D register alone.
fn mul_one_operand(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let width = dst.width();
    let ty = Type::int(u32::from(width))
        .ok_or_else(|| LiftError::malformed(inst, "unsupported multiply width"))?;
    let wide_ty = Type::int(u32::from(width) * 2)
        .ok_or_else(|| LiftError::malformed(inst, "unsupported multiply width"))?;
    let signed = inst.opcode == Opcode::Imul;

    let acc = Operand::reg(Reg::gp(width, 0));
    let op1 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &dst)?;
    let op2 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &acc)?;

    let (full, lo, hi) = {
        let mut b = ctx.ins();
        let (wa, wb) = if signed {
            (b.sext(wide_ty, op1), b.sext(wide_ty, op2))
        } else {
            (b.zext(wide_ty, op1), b.zext(wide_ty, op2))
        };
        let full = b.imul(wa, wb);
        let lo = b.trunc(ty, full);
        let amount = b.iconst(wide_ty, i64::from(width));
        let shifted = if signed {
            b.sshr(full, amount)
        } else {
            b.ushr(full, amount)
        };
        let hi = b.trunc(ty, shifted);
        (full, lo, hi)
    };

    if width == 8 {
        // The 16-bit product lands in AX; DL is not written.
        let ax = Operand::reg(Reg::gp(16, 0));
        operand::store(
            ctx,
            rf,
            DataType::Si,
            ALIGN_MAXIMUM,
            &ax,
            PartialRegisterHandling::Default,
            full,
        )?;
    } else {
        let a = Operand::reg(Reg::gp(width, 0));
        let d = Operand::reg(Reg::gp(width, 2));
        store_default(ctx, rf, &a, lo)?;
        store_default(ctx, rf, &d, hi)?;
    }

    let of = {
        let mut b = ctx.ins();
        if signed {
            // Overflow when the full product is not the sign extension of
            // its low half.
            let widened = b.sext(wide_ty, lo);
            b.icmp(IntCC::NotEqual, full, widened)
        } else {
            let zero = b.zero(ty);
            b.icmp(IntCC::NotEqual, hi, zero)
        }
    };
    if signed {
        flags::set_sf(ctx, rf, lo);
    }
    rf.set_flag(Flag::Of, of);
    rf.set_flag(Flag::Cf, of);
    Ok(())
}

/// SHL, SHR, SAR. Shift flag semantics are not modeled; the flags are
/// invalidated.
pub(super) fn shift(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let op1 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &dst)?;
    let op2 = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &inst.src()?)?;
    let result = {
        let mut b = ctx.ins();
        let ty = b.value_type(op1);
        let op2 = sign_extend_to(&mut b, ty, op2);
        match inst.opcode {
            Opcode::Shl => b.ishl(op1, op2),
            Opcode::Shr => b.ushr(op1, op2),
            _ => b.sshr(op1, op2),
        }
    };
    flags::invalidate(ctx, rf);
    store_default(ctx, rf, &dst, result)
}

/// LEA: the indirect source is evaluated both as a provenance-preserving
/// pointer and as a plain integer sum; the integer lands in the
/// destination and the pointer becomes its pointer facet.
pub(super) fn lea(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let src = inst.src()?;
    let m = match src {
        Operand::Mem(m) => m,
        _ => return Err(LiftError::malformed(inst, "lea source must be a memory operand")),
    };
    let dst_reg = dst
        .get_reg()
        .filter(|r| r.is_gp())
        .ok_or_else(|| LiftError::malformed(inst, "lea destination must be a register"))?;

    let addr = operand::address(ctx, rf, &src)?;

    let value = {
        let mut b = ctx.ins();
        let mut sum = b.iconst(Type::I64, m.disp);
        if let Some(base) = m.base {
            let base_val = rf.get(Facet::I64, base, &mut b)?;
            sum = b.iadd(sum, base_val);
        }
        if let (Some(index), true) = (m.index, m.scale != 0) {
            let idx = rf.get(Facet::I64, index, &mut b)?;
            let scale = b.iconst(Type::I64, i64::from(m.scale));
            let scaled = b.imul(idx, scale);
            sum = b.iadd(sum, scaled);
        }
        if dst.width() < 64 {
            let target = Type::int(u32::from(dst.width()))
                .ok_or_else(|| LiftError::malformed(inst, "unsupported lea width"))?;
            b.trunc(target, sum)
        } else {
            sum
        }
    };
    store_default(ctx, rf, &dst, value)?;

    if dst_reg.kind == RegKind::Gp64 {
        let mut b = ctx.ins();
        rf.set(Facet::Ptr, dst_reg, addr, false, &mut b)?;
    }
    Ok(())
}

/// CDQE: sign-extend EAX into RAX.
pub(super) fn cdqe(ctx: &mut LiftContext, rf: &mut RegisterFile, _inst: &Inst) -> LiftResult<()> {
    let src = Operand::reg(Reg::gp(32, 0));
    let value = operand::load(ctx, rf, DataType::Si, ALIGN_MAXIMUM, &src)?;
    let dst = Operand::reg(Reg::gp(64, 0));
    store_default(ctx, rf, &dst, value)
}
