//! SSE and SSE2 instruction handlers.
//!
//! Some handlers access an operand at a width other than the one the
//! decoder reported (the hardware moves 64 bits into the upper half, or is
//! allowed to fetch a full 16 bytes for a 64-bit memory form). Those call
//! sites use `Operand::with_width` to request the width they mean.

use crate::error::LiftResult;
use crate::func::LiftContext;
use crate::inst::{Inst, Opcode, Operand};
use crate::operand::{self, DataType, PartialRegisterHandling, ALIGN_MAXIMUM};
use crate::regfile::RegisterFile;
use relift_ir::Type;

fn store_keep_upper(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    dtype: DataType,
    align: u8,
    dst: &Operand,
    value: relift_ir::Value,
) -> LiftResult<()> {
    operand::store(
        ctx,
        rf,
        dtype,
        align,
        dst,
        PartialRegisterHandling::KeepUpper,
        value,
    )
}

/// MOVD and MOVQ: scalar integer moves. Into a vector register the upper
/// lanes are zeroed.
pub(super) fn movq(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dtype = if inst.opcode == Opcode::Movq {
        DataType::Si64
    } else {
        DataType::Si32
    };
    let dst = inst.dst()?;
    let value = operand::load(ctx, rf, dtype, ALIGN_MAXIMUM, &inst.src()?)?;
    let partial = if dst.is_vec_reg() {
        PartialRegisterHandling::ZeroUpper
    } else {
        PartialRegisterHandling::Default
    };
    operand::store(ctx, rf, dtype, ALIGN_MAXIMUM, &dst, partial, value)
}

/// MOVSS and MOVSD. A load from memory clears the upper lanes; a move
/// between registers only replaces lane 0.
pub(super) fn movs(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dtype = if inst.opcode == Opcode::Movss {
        DataType::Sf32
    } else {
        DataType::Sf64
    };
    let src = inst.src()?;
    let dst = inst.dst()?;
    let value = operand::load(ctx, rf, dtype, ALIGN_MAXIMUM, &src)?;
    let partial = if src.is_mem() {
        PartialRegisterHandling::ZeroUpper
    } else {
        PartialRegisterHandling::KeepUpper
    };
    operand::store(ctx, rf, dtype, ALIGN_MAXIMUM, &dst, partial, value)
}

/// MOVAPS/MOVAPD/MOVUPS/MOVUPD: packed moves, aligned or not.
pub(super) fn movp(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let aligned = matches!(inst.opcode, Opcode::Movaps | Opcode::Movapd);
    let align = if aligned { ALIGN_MAXIMUM } else { 8 };
    let dtype = if matches!(inst.opcode, Opcode::Movaps | Opcode::Movups) {
        DataType::Vf32
    } else {
        DataType::Vf64
    };
    let value = operand::load(ctx, rf, dtype, align, &inst.src()?)?;
    store_keep_upper(ctx, rf, dtype, align, &inst.dst()?, value)
}

/// MOVDQA/MOVDQU: packed integer moves.
pub(super) fn movdq(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let align = if inst.opcode == Opcode::Movdqa {
        ALIGN_MAXIMUM
    } else {
        8
    };
    let value = operand::load(ctx, rf, DataType::Vi64, align, &inst.src()?)?;
    store_keep_upper(ctx, rf, DataType::Vi64, align, &inst.dst()?, value)
}

/// MOVLPS/MOVLPD: move the low 64 bits.
pub(super) fn movlp(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let mut src = inst.src()?;
    let dtype = if inst.opcode == Opcode::Movlps {
        // A register source still only contributes its low two lanes.
        if src.is_vec_reg() {
            src = src.with_width(64);
        }
        DataType::Vf32
    } else {
        DataType::Sf64
    };
    let value = operand::load(ctx, rf, dtype, ALIGN_MAXIMUM, &src)?;
    store_keep_upper(ctx, rf, dtype, ALIGN_MAXIMUM, &dst, value)
}

/// MOVHPS: move 64 bits into or out of the upper half, as shuffles.
pub(super) fn movhps(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let src = inst.src()?;

    if dst.is_vec_reg() {
        // Only 64 bits are moved, but they land in the upper half, so the
        // destination is treated at full width. The source is widened the
        // same way; fetching a full 16 bytes for the 64-bit memory form is
        // permitted by the architecture.
        let dst = dst.with_width(128);
        let src = src.with_width(128);
        let op1 = operand::load(ctx, rf, DataType::Vf32, ALIGN_MAXIMUM, &dst)?;
        let op2 = operand::load(ctx, rf, DataType::Vf32, ALIGN_MAXIMUM, &src)?;
        let result = ctx.ins().shuffle(op1, op2, &[0, 1, 4, 5]);
        store_keep_upper(ctx, rf, DataType::Vf32, ALIGN_MAXIMUM, &dst, result)
    } else {
        let dst = dst.with_width(64);
        let op1 = operand::load(ctx, rf, DataType::Vf32, ALIGN_MAXIMUM, &src)?;
        let result = {
            let mut b = ctx.ins();
            let undef = b.undef(b.value_type(op1));
            b.shuffle(op1, undef, &[2, 3])
        };
        store_keep_upper(ctx, rf, DataType::Vf32, ALIGN_MAXIMUM, &dst, result)
    }
}

/// MOVHPD: move one double into or out of lane 1.
pub(super) fn movhpd(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let src = inst.src()?;

    if dst.is_vec_reg() {
        let dst = dst.with_width(128);
        let op1 = operand::load(ctx, rf, DataType::Vf64, ALIGN_MAXIMUM, &dst)?;
        let op2 = operand::load(ctx, rf, DataType::Sf64, ALIGN_MAXIMUM, &src)?;
        let result = ctx.ins().insertlane(op1, op2, 1);
        store_keep_upper(ctx, rf, DataType::Vf64, ALIGN_MAXIMUM, &dst, result)
    } else {
        let src = src.with_width(128);
        let op1 = operand::load(ctx, rf, DataType::Vf64, ALIGN_MAXIMUM, &src)?;
        let result = ctx.ins().extractlane(op1, 1);
        store_keep_upper(ctx, rf, DataType::Sf64, ALIGN_MAXIMUM, &dst, result)
    }
}

/// UNPCKLPS/UNPCKLPD: interleave the low lanes of both operands.
pub(super) fn unpckl(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    // An implementation may fetch the full 16 bytes even for the memory
    // form (Intel SDM Vol. 2B, UNPCKLPS).
    let src = inst.src()?.with_width(128);
    let (dtype, mask): (_, &[u8]) = if inst.opcode == Opcode::Unpcklps {
        (DataType::Vf32, &[0, 4, 1, 5])
    } else {
        (DataType::Vf64, &[0, 2])
    };
    let op1 = operand::load(ctx, rf, dtype, ALIGN_MAXIMUM, &dst)?;
    let op2 = operand::load(ctx, rf, dtype, ALIGN_MAXIMUM, &src)?;
    let result = ctx.ins().shuffle(op1, op2, mask);
    store_keep_upper(ctx, rf, dtype, ALIGN_MAXIMUM, &dst, result)
}

/// XORPS/XORPD/PXOR: bitwise xor at vector integer width; xor of a
/// register with itself is the typed zero vector.
pub(super) fn vxor(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    let dst = inst.dst()?;
    let src = inst.src()?;

    if dst == src {
        use relift_ir::LaneType;
        let (dtype, zero_ty) = match inst.opcode {
            Opcode::Xorps => (DataType::Vf32, Type::vector(LaneType::F32, 4)),
            Opcode::Xorpd => (DataType::Vf64, Type::vector(LaneType::F64, 2)),
            _ => (DataType::Vi64, Type::vector(LaneType::I64, 2)),
        };
        let zero = ctx.ins().zero(zero_ty);
        return store_keep_upper(ctx, rf, dtype, ALIGN_MAXIMUM, &dst, zero);
    }

    let int_dtype = if inst.opcode == Opcode::Xorps {
        DataType::Vi32
    } else {
        DataType::Vi64
    };
    let op1 = operand::load(ctx, rf, int_dtype, ALIGN_MAXIMUM, &dst)?;
    let op2 = operand::load(ctx, rf, int_dtype, ALIGN_MAXIMUM, &src)?;
    let result = ctx.ins().bxor(op1, op2);
    let store_dtype = match inst.opcode {
        Opcode::Xorps => DataType::Vf32,
        Opcode::Xorpd => DataType::Vf64,
        _ => DataType::Vi64,
    };
    store_keep_upper(ctx, rf, store_dtype, ALIGN_MAXIMUM, &dst, result)
}

enum FloatOp {
    Add,
    Sub,
    Mul,
}

/// The scalar and packed float arithmetic group. With fast math enabled
/// every result carries the unsafe-algebra flag.
pub(super) fn arith(ctx: &mut LiftContext, rf: &mut RegisterFile, inst: &Inst) -> LiftResult<()> {
    use Opcode::*;
    let (dtype, op) = match inst.opcode {
        Addss => (DataType::Sf32, FloatOp::Add),
        Addsd => (DataType::Sf64, FloatOp::Add),
        Addps => (DataType::Vf32, FloatOp::Add),
        Addpd => (DataType::Vf64, FloatOp::Add),
        Subss => (DataType::Sf32, FloatOp::Sub),
        Subsd => (DataType::Sf64, FloatOp::Sub),
        Subps => (DataType::Vf32, FloatOp::Sub),
        Subpd => (DataType::Vf64, FloatOp::Sub),
        Mulss => (DataType::Sf32, FloatOp::Mul),
        Mulsd => (DataType::Sf64, FloatOp::Mul),
        Mulps => (DataType::Vf32, FloatOp::Mul),
        _ => (DataType::Vf64, FloatOp::Mul),
    };

    let dst = inst.dst()?;
    let fast = ctx.config.fast_math;
    let op1 = operand::load(ctx, rf, dtype, ALIGN_MAXIMUM, &dst)?;
    let op2 = operand::load(ctx, rf, dtype, ALIGN_MAXIMUM, &inst.src()?)?;
    let result = {
        let mut b = ctx.ins();
        let result = match op {
            FloatOp::Add => b.fadd(op1, op2),
            FloatOp::Sub => b.fsub(op1, op2),
            FloatOp::Mul => b.fmul(op1, op2),
        };
        if fast {
            b.set_fast_math(result);
        }
        result
    };
    store_keep_upper(ctx, rf, dtype, ALIGN_MAXIMUM, &dst, result)
}
