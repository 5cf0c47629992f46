//! Loading and storing logical operands.
//!
//! Operands are accessed at a requested semantic type: a plain integer of
//! the operand's width, an explicit 32/64-bit integer, a scalar float or
//! double, or a packed vector. Register operands go through the register
//! file at the facet corresponding to the type; memory operands become
//! typed loads and stores of the computed address.
//!
//! This module also implements the System-V AMD64 argument marshalling in
//! both directions: unpacking machine arguments into the register file at
//! function entry, and collecting call arguments back out of it.

use crate::error::{LiftError, LiftResult};
use crate::func::LiftContext;
use crate::inst::{regs, Operand, Reg, RegKind};
use crate::regfile::{Facet, RegisterFile};
use relift_ir::{FuncBuilder, FuncId, LaneType, Type, Value};
use smallvec::SmallVec;

/// The semantic type at which an operand is accessed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DataType {
    /// Integer of the operand's width.
    Si,
    /// 32-bit integer regardless of the operand width tag.
    Si32,
    /// 64-bit integer regardless of the operand width tag.
    Si64,
    /// Scalar float.
    Sf32,
    /// Scalar double.
    Sf64,
    /// Packed 32-bit integers filling the operand width.
    Vi32,
    /// Packed 64-bit integers filling the operand width.
    Vi64,
    /// Packed floats filling the operand width.
    Vf32,
    /// Packed doubles filling the operand width.
    Vf64,
}

/// Natural alignment for the accessed type.
pub const ALIGN_MAXIMUM: u8 = 0;

/// What happens to the bits of a general-purpose register that a narrow
/// store does not cover.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PartialRegisterHandling {
    /// The architectural rule: a 32-bit write zero-extends to 64 bits,
    /// narrower writes preserve the upper bits.
    #[default]
    Default,
    /// Force zero-extension to the full register.
    ZeroUpper,
    /// Preserve all uncovered bits.
    KeepUpper,
}

/// The IR type of an access of `dtype` at `width` bits.
pub(crate) fn access_type(dtype: DataType, width: u16) -> LiftResult<Type> {
    let vector = |lane: LaneType| -> LiftResult<Type> {
        let lane_bits = lane.bits();
        let lanes = u32::from(width) / lane_bits;
        if lanes < 2 || u32::from(width) % lane_bits != 0 || !lanes.is_power_of_two() {
            return Err(LiftError::invariant(format!(
                "no {lanes}-lane vector of {lane} covers {width} bits"
            )));
        }
        Ok(Type::vector(lane, lanes as u8))
    };
    match dtype {
        DataType::Si => Type::int(u32::from(width)).ok_or_else(|| {
            LiftError::invariant(format!("no integer type is {width} bits wide"))
        }),
        DataType::Si32 => Ok(Type::I32),
        DataType::Si64 => Ok(Type::I64),
        DataType::Sf32 => Ok(Type::F32),
        DataType::Sf64 => Ok(Type::F64),
        DataType::Vi32 => vector(LaneType::I32),
        DataType::Vi64 => vector(LaneType::I64),
        DataType::Vf32 => vector(LaneType::F32),
        DataType::Vf64 => vector(LaneType::F64),
    }
}

/// The register-file facet corresponding to an access of `dtype` at
/// `width` bits of `reg`.
pub(crate) fn register_facet(dtype: DataType, width: u16, reg: Reg) -> LiftResult<Facet> {
    if reg.is_gp() || reg.kind == RegKind::Ip {
        let width = match dtype {
            DataType::Si => width,
            DataType::Si32 => 32,
            DataType::Si64 => 64,
            _ => {
                return Err(LiftError::invariant(format!(
                    "{dtype:?} access of general-purpose register {}",
                    reg.name()
                )));
            }
        };
        return Ok(match width {
            8 if reg.kind == RegKind::Gp8High => Facet::I8H,
            8 => Facet::I8,
            16 => Facet::I16,
            32 => Facet::I32,
            64 => Facet::I64,
            _ => {
                return Err(LiftError::invariant(format!(
                    "no {width}-bit facet of general-purpose register {}",
                    reg.name()
                )));
            }
        });
    }

    let facet = match (dtype, width) {
        (DataType::Si32, _) | (DataType::Si, 32) => Some(Facet::I32),
        (DataType::Si64, _) | (DataType::Si, 64) => Some(Facet::I64),
        (DataType::Sf32, _) => Some(Facet::F32),
        (DataType::Sf64, _) => Some(Facet::F64),
        (DataType::Vi32, 128) => Some(Facet::V4I32),
        (DataType::Vi32, 256) => Some(Facet::V8I32),
        (DataType::Vi64, 128) => Some(Facet::V2I64),
        (DataType::Vi64, 256) => Some(Facet::V4I64),
        (DataType::Vf32, 64) => Some(Facet::V2F32),
        (DataType::Vf32, 128) => Some(Facet::V4F32),
        (DataType::Vf32, 256) => Some(Facet::V8F32),
        (DataType::Vf64, 128) => Some(Facet::V2F64),
        (DataType::Vf64, 256) => Some(Facet::V4F64),
        _ => None,
    };
    facet.ok_or_else(|| {
        LiftError::invariant(format!(
            "no facet for a {dtype:?} access of {width} bits of {}",
            reg.name()
        ))
    })
}

/// The native full-width packed facet with the given lane type.
fn native_vector_facet(lane: LaneType, vec_bits: u16) -> Facet {
    match (lane, vec_bits) {
        (LaneType::I8, 128) => Facet::V16I8,
        (LaneType::I16, 128) => Facet::V8I16,
        (LaneType::I32, 128) => Facet::V4I32,
        (LaneType::I64, 128) => Facet::V2I64,
        (LaneType::F32, 128) => Facet::V4F32,
        (LaneType::F64, 128) => Facet::V2F64,
        (LaneType::I8, _) => Facet::V32I8,
        (LaneType::I16, _) => Facet::V16I16,
        (LaneType::I32, _) => Facet::V8I32,
        (LaneType::I64, _) => Facet::V4I64,
        (LaneType::F32, _) => Facet::V8F32,
        (LaneType::F64, _) => Facet::V4F64,
    }
}

fn coerce(b: &mut FuncBuilder, ty: Type, value: Value) -> LiftResult<Value> {
    let from = b.value_type(value);
    if from == ty {
        return Ok(value);
    }
    if from.is_int() && ty.is_int() {
        return Ok(if ty.bits() > from.bits() {
            b.sext(ty, value)
        } else {
            b.trunc(ty, value)
        });
    }
    if from.bits() == ty.bits() {
        return Ok(b.bitcast(ty, value));
    }
    Err(LiftError::invariant(format!(
        "cannot coerce a {from} value to {ty}"
    )))
}

/// Compute the address of a memory operand as a byte pointer.
///
/// When the base register carries a live pointer facet the address is a
/// pointer offset from it, preserving provenance; otherwise the classical
/// `disp + base + index * scale` integer sum is converted to a pointer.
pub(crate) fn address(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    op: &Operand,
) -> LiftResult<Value> {
    let m = match op {
        Operand::Mem(m) => *m,
        _ => return Err(LiftError::invariant("address of a non-memory operand")),
    };
    if m.scale != 0 && !matches!(m.scale, 1 | 2 | 4 | 8) {
        return Err(LiftError::invariant(format!(
            "invalid index scale {}",
            m.scale
        )));
    }

    let mut b = ctx.ins();

    if let Some(base) = m.base {
        if base.is_gp() && rf.cached(Facet::Ptr, base).is_some() {
            let ptr = rf.get(Facet::Ptr, base, &mut b)?;
            let mut offset = b.iconst(Type::I64, m.disp);
            if let (Some(index), true) = (m.index, m.scale != 0) {
                let idx = rf.get(Facet::I64, index, &mut b)?;
                let scale = b.iconst(Type::I64, i64::from(m.scale));
                let scaled = b.imul(idx, scale);
                offset = b.iadd(offset, scaled);
            }
            return Ok(b.gep(ptr, offset));
        }
    }

    let mut addr = b.iconst(Type::I64, m.disp);
    if let Some(base) = m.base {
        let base_val = rf.get(Facet::I64, base, &mut b)?;
        addr = b.iadd(addr, base_val);
    }
    if let (Some(index), true) = (m.index, m.scale != 0) {
        let idx = rf.get(Facet::I64, index, &mut b)?;
        let scale = b.iconst(Type::I64, i64::from(m.scale));
        let scaled = b.imul(idx, scale);
        addr = b.iadd(addr, scaled);
    }
    Ok(b.inttoptr(addr))
}

/// Load an operand at the requested semantic type.
pub(crate) fn load(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    dtype: DataType,
    align: u8,
    op: &Operand,
) -> LiftResult<Value> {
    match *op {
        Operand::Reg { reg, width } => {
            let facet = register_facet(dtype, width, reg)?;
            let mut b = ctx.ins();
            rf.get(facet, reg, &mut b)
        }
        Operand::Imm { value, width } => {
            let ty = access_type(dtype, width)?;
            if !ty.is_int() {
                return Err(LiftError::invariant(format!(
                    "immediate operand accessed as {ty}"
                )));
            }
            Ok(ctx.ins().iconst(ty, value))
        }
        Operand::Mem(ref m) => {
            let ty = access_type(dtype, m.width)?;
            let addr = address(ctx, rf, op)?;
            let align = if align == ALIGN_MAXIMUM {
                ty.bytes() as u8
            } else {
                align
            };
            Ok(ctx.ins().load(ty, align, addr))
        }
    }
}

/// Store a value to an operand at the requested semantic type, applying
/// the partial-register policy for register destinations.
pub(crate) fn store(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    dtype: DataType,
    align: u8,
    op: &Operand,
    partial: PartialRegisterHandling,
    value: Value,
) -> LiftResult<()> {
    match *op {
        Operand::Reg { reg, width } if reg.is_gp() => {
            store_gp(ctx, rf, reg, width, partial, value)
        }
        Operand::Reg { reg, .. } if reg.is_vec() => {
            store_vec(ctx, rf, reg, dtype, partial, value)
        }
        Operand::Reg { .. } => Err(LiftError::invariant("store to the instruction pointer")),
        Operand::Imm { .. } => Err(LiftError::invariant("store to an immediate operand")),
        Operand::Mem(ref m) => {
            let ty = access_type(dtype, m.width)?;
            let addr = address(ctx, rf, op)?;
            let mut b = ctx.ins();
            let value = coerce(&mut b, ty, value)?;
            let align = if align == ALIGN_MAXIMUM {
                ty.bytes() as u8
            } else {
                align
            };
            b.store(align, value, addr);
            Ok(())
        }
    }
}

fn store_gp(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    reg: Reg,
    width: u16,
    partial: PartialRegisterHandling,
    value: Value,
) -> LiftResult<()> {
    let policy = if partial == PartialRegisterHandling::Default {
        ctx.config.partial_default
    } else {
        partial
    };

    let ty = Type::int(u32::from(width)).ok_or_else(|| {
        LiftError::invariant(format!("no {width}-bit general-purpose store"))
    })?;
    let mut b = ctx.ins();
    let value = coerce(&mut b, ty, value)?;

    match (width, policy) {
        (64, _) => rf.set(Facet::I64, reg, value, true, &mut b),
        (32, PartialRegisterHandling::Default | PartialRegisterHandling::ZeroUpper)
        | (8 | 16, PartialRegisterHandling::ZeroUpper) => {
            let facet = register_facet(DataType::Si, width, reg)?;
            let wide = b.zext(Type::I64, value);
            rf.set(Facet::I64, reg, wide, true, &mut b)?;
            rf.set(facet, reg, value, false, &mut b)
        }
        (8 | 16 | 32, _) => {
            // Merge into the preserved upper bits of the 64-bit backing.
            let facet = register_facet(DataType::Si, width, reg)?;
            let shift = if facet == Facet::I8H { 8u32 } else { 0 };
            let keep = !((((1u128 << width) - 1) as u64) << shift);
            let old = rf.get(Facet::I64, reg, &mut b)?;
            let mask = b.iconst(Type::I64, keep as i64);
            let masked = b.band(old, mask);
            let wide = b.zext(Type::I64, value);
            let shifted = if shift != 0 {
                let amount = b.iconst(Type::I64, i64::from(shift));
                b.ishl(wide, amount)
            } else {
                wide
            };
            let merged = b.bor(masked, shifted);
            rf.set(Facet::I64, reg, merged, true, &mut b)?;
            rf.set(facet, reg, value, false, &mut b)
        }
        _ => Err(LiftError::invariant(format!(
            "no {width}-bit general-purpose store"
        ))),
    }
}

/// The facet matching a value type exactly.
fn facet_for_type(ty: Type) -> LiftResult<Facet> {
    let facet = match ty {
        Type::F32 => Some(Facet::F32),
        Type::F64 => Some(Facet::F64),
        Type::I32 => Some(Facet::I32),
        Type::I64 => Some(Facet::I64),
        Type::Vector(lane, lanes) => match (lane, lanes) {
            (LaneType::I8, 16) => Some(Facet::V16I8),
            (LaneType::I16, 8) => Some(Facet::V8I16),
            (LaneType::I32, 4) => Some(Facet::V4I32),
            (LaneType::I64, 2) => Some(Facet::V2I64),
            (LaneType::F32, 2) => Some(Facet::V2F32),
            (LaneType::F32, 4) => Some(Facet::V4F32),
            (LaneType::F64, 2) => Some(Facet::V2F64),
            (LaneType::I8, 32) => Some(Facet::V32I8),
            (LaneType::I16, 16) => Some(Facet::V16I16),
            (LaneType::I32, 8) => Some(Facet::V8I32),
            (LaneType::I64, 4) => Some(Facet::V4I64),
            (LaneType::F32, 8) => Some(Facet::V8F32),
            (LaneType::F64, 4) => Some(Facet::V4F64),
            _ => None,
        },
        _ => None,
    };
    facet.ok_or_else(|| LiftError::invariant(format!("no register facet holds a {ty}")))
}

fn store_vec(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    reg: Reg,
    dtype: DataType,
    partial: PartialRegisterHandling,
    value: Value,
) -> LiftResult<()> {
    let policy = if partial == PartialRegisterHandling::Default {
        ctx.config.partial_default
    } else {
        partial
    };
    if policy == PartialRegisterHandling::Default {
        return Err(LiftError::invariant(format!(
            "a partial-register policy is required to store to {}",
            reg.name()
        )));
    }

    let vec_bits = rf.vec_bits();
    let mut b = ctx.ins();

    // Reinterpret the value with the lane type the access asks for; the
    // stored width is whatever the value actually covers.
    let lane = match dtype {
        DataType::Si32 | DataType::Vi32 => LaneType::I32,
        DataType::Si64 | DataType::Vi64 => LaneType::I64,
        DataType::Sf32 | DataType::Vf32 => LaneType::F32,
        DataType::Sf64 | DataType::Vf64 => LaneType::F64,
        DataType::Si => {
            return Err(LiftError::invariant(format!(
                "untyped integer store to vector register {}",
                reg.name()
            )));
        }
    };
    let bits = b.value_type(value).bits();
    let facet_ty = if bits == lane.bits() {
        lane.scalar()
    } else {
        Type::vector(lane, (bits / lane.bits()) as u8)
    };
    let value = coerce(&mut b, facet_ty, value)?;
    let facet = facet_for_type(facet_ty)?;

    let full = if facet_ty.bits() == u32::from(vec_bits) {
        value
    } else {
        match policy {
            PartialRegisterHandling::ZeroUpper => {
                let native_ty = Type::vector(lane, (u32::from(vec_bits) / lane.bits()) as u8);
                let mut full = b.zero(native_ty);
                if facet_ty.is_vector() {
                    for i in 0..facet_ty.lane_count() {
                        let scalar = b.extractlane(value, i);
                        full = b.insertlane(full, scalar, i);
                    }
                } else {
                    full = b.insertlane(full, value, 0);
                }
                full
            }
            PartialRegisterHandling::KeepUpper => {
                let native = native_vector_facet(lane, vec_bits);
                let mut full = rf.get(native, reg, &mut b)?;
                if facet_ty.is_vector() {
                    for i in 0..facet_ty.lane_count() {
                        let scalar = b.extractlane(value, i);
                        full = b.insertlane(full, scalar, i);
                    }
                } else {
                    full = b.insertlane(full, value, 0);
                }
                full
            }
            PartialRegisterHandling::Default => unreachable!(),
        }
    };

    // Canonicalize through the full-width integer backing, then re-record
    // the views we already have values for.
    let ivec_ty = Type::int(u32::from(vec_bits)).expect("vector width");
    let ivec = b.bitcast(ivec_ty, full);
    rf.set(Facet::ivec(vec_bits), reg, ivec, true, &mut b)?;
    let native = native_vector_facet(lane, vec_bits);
    rf.set(native, reg, full, false, &mut b)?;
    if facet != native {
        rf.set(facet, reg, value, false, &mut b)?;
    }
    Ok(())
}

/// The integer/pointer argument registers of the System-V AMD64 ABI.
pub(crate) const INT_ARG_REGS: [Reg; 6] = [
    regs::RDI,
    regs::RSI,
    regs::RDX,
    regs::RCX,
    regs::R8,
    regs::R9,
];

fn int_arg_reg(used: &mut usize) -> LiftResult<Reg> {
    let reg = INT_ARG_REGS.get(*used).copied().ok_or_else(|| {
        LiftError::invariant("more than six integer arguments are not supported")
    })?;
    *used += 1;
    Ok(reg)
}

fn float_arg_reg(used: &mut usize) -> LiftResult<Reg> {
    if *used >= 8 {
        return Err(LiftError::invariant(
            "more than eight floating-point arguments are not supported",
        ));
    }
    let reg = Reg::xmm(*used as u8);
    *used += 1;
    Ok(reg)
}

/// At function entry, write the machine-ABI argument values into the
/// register file.
pub(crate) fn construct_args(ctx: &mut LiftContext, rf: &mut RegisterFile) -> LiftResult<()> {
    let params: Vec<(Value, Type)> = ctx
        .func
        .params
        .iter()
        .copied()
        .zip(ctx.func.signature.params.iter().map(|p| p.ty))
        .collect();

    let vec_bits = rf.vec_bits();
    let mut ints = 0;
    let mut floats = 0;
    for (value, ty) in params {
        match ty {
            Type::Ptr => {
                let reg = int_arg_reg(&mut ints)?;
                let mut b = ctx.ins();
                rf.set(Facet::Ptr, reg, value, true, &mut b)?;
            }
            Type::I64 => {
                let reg = int_arg_reg(&mut ints)?;
                let mut b = ctx.ins();
                rf.set(Facet::I64, reg, value, true, &mut b)?;
            }
            Type::I8 | Type::I16 | Type::I32 => {
                let reg = int_arg_reg(&mut ints)?;
                let facet = register_facet(DataType::Si, ty.bits() as u16, reg)?;
                let mut b = ctx.ins();
                let wide = b.zext(Type::I64, value);
                rf.set(Facet::I64, reg, wide, true, &mut b)?;
                rf.set(facet, reg, value, false, &mut b)?;
            }
            Type::F32 | Type::F64 => {
                let reg = float_arg_reg(&mut floats)?;
                let lane = ty.lane_type().expect("scalar float");
                let scalar_facet = if ty == Type::F32 { Facet::F32 } else { Facet::F64 };
                let mut b = ctx.ins();
                let native_ty = Type::vector(lane, (u32::from(vec_bits) / lane.bits()) as u8);
                let zero = b.zero(native_ty);
                let full = b.insertlane(zero, value, 0);
                let ivec_ty = Type::int(u32::from(vec_bits)).expect("vector width");
                let ivec = b.bitcast(ivec_ty, full);
                rf.set(Facet::ivec(vec_bits), reg, ivec, true, &mut b)?;
                rf.set(native_vector_facet(lane, vec_bits), reg, full, false, &mut b)?;
                rf.set(scalar_facet, reg, value, false, &mut b)?;
            }
            _ => {
                return Err(LiftError::invariant(format!(
                    "unsupported ABI parameter type {ty}"
                )));
            }
        }
    }
    Ok(())
}

/// At a call site, collect the callee's arguments from the register file
/// following the machine ABI.
pub(crate) fn collect_args(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    callee: FuncId,
) -> LiftResult<SmallVec<[Value; 8]>> {
    let param_tys: SmallVec<[Type; 8]> = ctx
        .module
        .decl(callee)
        .signature
        .params
        .iter()
        .map(|p| p.ty)
        .collect();

    let mut args = SmallVec::new();
    let mut ints = 0;
    let mut floats = 0;
    for ty in param_tys {
        let value = match ty {
            Type::Ptr => {
                let reg = int_arg_reg(&mut ints)?;
                rf.get(Facet::Ptr, reg, &mut ctx.ins())?
            }
            Type::I8 | Type::I16 | Type::I32 | Type::I64 => {
                let reg = int_arg_reg(&mut ints)?;
                let facet = register_facet(DataType::Si, ty.bits() as u16, reg)?;
                rf.get(facet, reg, &mut ctx.ins())?
            }
            Type::F32 => {
                let reg = float_arg_reg(&mut floats)?;
                rf.get(Facet::F32, reg, &mut ctx.ins())?
            }
            Type::F64 => {
                let reg = float_arg_reg(&mut floats)?;
                rf.get(Facet::F64, reg, &mut ctx.ins())?
            }
            _ => {
                return Err(LiftError::invariant(format!(
                    "unsupported ABI argument type {ty}"
                )));
            }
        };
        args.push(value);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::{Config, DeclaredFunctions, LiftContext};
    use relift_ir::{Function, Module, Opcode, Signature};

    fn ctx_fixture<'a>(
        module: &'a mut Module,
        decls: &'a DeclaredFunctions,
    ) -> (LiftContext<'a>, RegisterFile) {
        let mut func = Function::with_signature("t", Signature::new(Type::Void));
        let block = func.layout.make_block();
        let mut ctx = LiftContext::new(module, decls, Config::default(), func);
        ctx.ins().switch_to_block(block);
        let mut rf = RegisterFile::new(128);
        rf.set_block(block);
        (ctx, rf)
    }

    #[test]
    fn address_without_pointer_base_is_an_integer_sum() {
        let mut module = Module::new();
        let decls = DeclaredFunctions::new();
        let (mut ctx, mut rf) = ctx_fixture(&mut module, &decls);

        let mut b = ctx.ins();
        let base = b.iconst(Type::I64, 0x1000);
        rf.set(Facet::I64, regs::RSI, base, true, &mut b).unwrap();
        let idx = b.iconst(Type::I64, 3);
        rf.set(Facet::I64, regs::RAX, idx, true, &mut b).unwrap();

        let op = Operand::mem_bisd(regs::RSI, regs::RAX, 4, 8, 32);
        let addr = address(&mut ctx, &mut rf, &op).unwrap();
        let def = ctx.func.dfg.value_def(addr).unwrap();
        assert_eq!(ctx.func.dfg.insts[def].opcode(), Opcode::IntToPtr);
    }

    #[test]
    fn address_with_pointer_base_preserves_provenance() {
        let mut module = Module::new();
        let decls = DeclaredFunctions::new();
        let (mut ctx, mut rf) = ctx_fixture(&mut module, &decls);

        let mut b = ctx.ins();
        let int = b.iconst(Type::I64, 0x2000);
        let ptr = b.inttoptr(int);
        rf.set(Facet::Ptr, regs::RSI, ptr, true, &mut b).unwrap();

        let op = Operand::mem_bd(regs::RSI, 16, 64);
        let addr = address(&mut ctx, &mut rf, &op).unwrap();
        let def = ctx.func.dfg.value_def(addr).unwrap();
        assert_eq!(ctx.func.dfg.insts[def].opcode(), Opcode::Gep);
    }

    #[test]
    fn default_policy_zero_extends_32_bit_stores() {
        let mut module = Module::new();
        let decls = DeclaredFunctions::new();
        let (mut ctx, mut rf) = ctx_fixture(&mut module, &decls);

        let mut b = ctx.ins();
        let v = b.iconst(Type::I32, 5);
        drop(b);
        let op = Operand::reg(Reg::gp(32, 0));
        store(
            &mut ctx,
            &mut rf,
            DataType::Si,
            ALIGN_MAXIMUM,
            &op,
            PartialRegisterHandling::Default,
            v,
        )
        .unwrap();

        let i64v = rf.cached(Facet::I64, regs::RAX).unwrap();
        let def = ctx.func.dfg.value_def(i64v).unwrap();
        assert_eq!(ctx.func.dfg.insts[def].opcode(), Opcode::Zext);
        // The narrow view is the stored value itself.
        assert_eq!(rf.cached(Facet::I32, regs::RAX), Some(v));
    }

    #[test]
    fn narrow_stores_preserve_upper_bits() {
        let mut module = Module::new();
        let decls = DeclaredFunctions::new();
        let (mut ctx, mut rf) = ctx_fixture(&mut module, &decls);

        let mut b = ctx.ins();
        let old = b.iconst(Type::I64, 0x11223344);
        rf.set(Facet::I64, regs::RAX, old, true, &mut b).unwrap();
        let v = b.iconst(Type::I8, 0x7f);
        drop(b);

        let op = Operand::reg(Reg::gp(8, 0));
        store(
            &mut ctx,
            &mut rf,
            DataType::Si,
            ALIGN_MAXIMUM,
            &op,
            PartialRegisterHandling::Default,
            v,
        )
        .unwrap();

        let merged = rf.cached(Facet::I64, regs::RAX).unwrap();
        let def = ctx.func.dfg.value_def(merged).unwrap();
        assert_eq!(ctx.func.dfg.insts[def].opcode(), Opcode::Bor);
    }

    #[test]
    fn vector_store_canonicalizes_through_ivec() {
        let mut module = Module::new();
        let decls = DeclaredFunctions::new();
        let (mut ctx, mut rf) = ctx_fixture(&mut module, &decls);

        let mut b = ctx.ins();
        let f = b.f32const(1.5);
        drop(b);
        let op = Operand::reg(regs::XMM0);
        store(
            &mut ctx,
            &mut rf,
            DataType::Sf32,
            ALIGN_MAXIMUM,
            &op,
            PartialRegisterHandling::ZeroUpper,
            f,
        )
        .unwrap();

        assert!(rf.cached(Facet::I128, regs::XMM0).is_some());
        assert!(rf.cached(Facet::V4F32, regs::XMM0).is_some());
        assert_eq!(rf.cached(Facet::F32, regs::XMM0), Some(f));
    }

    #[test]
    fn imm_loads_are_typed_constants() {
        let mut module = Module::new();
        let decls = DeclaredFunctions::new();
        let (mut ctx, mut rf) = ctx_fixture(&mut module, &decls);

        let op = Operand::imm(-3, 32);
        let v = load(&mut ctx, &mut rf, DataType::Si, ALIGN_MAXIMUM, &op).unwrap();
        assert_eq!(ctx.func.dfg.value_type(v), Type::I32);
    }
}
