//! The flag engine.
//!
//! Six status bits are kept as `i1` values in the register file. Setters
//! are parameterized by the arithmetic kind that defined them; the
//! condition builder turns a conditional-opcode family member into a
//! Boolean over the current bits.
//!
//! A small per-block cache remembers the operands of the most recent
//! comparison so that a following conditional can fuse into a single
//! `icmp` instead of recombining flag bits. The cache is an optimization
//! only; every flag bit is always set as well.

use crate::error::LiftResult;
use crate::func::LiftContext;
use crate::inst::Cond;
use crate::regfile::RegisterFile;
use relift_ir::{FuncBuilder, IntCC, Type, Value};

/// One of the modeled status flags.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Flag {
    /// Carry.
    Cf,
    /// Parity (of the low result byte).
    Pf,
    /// Auxiliary carry (nibble carry).
    Af,
    /// Zero.
    Zf,
    /// Sign.
    Sf,
    /// Overflow.
    Of,
}

impl Flag {
    /// Number of modeled flags.
    pub const COUNT: usize = 6;

    /// All modeled flags.
    pub const ALL: [Flag; Flag::COUNT] =
        [Flag::Cf, Flag::Pf, Flag::Af, Flag::Zf, Flag::Sf, Flag::Of];

    /// Index of this flag in the register-file flag bank.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Symbolic record of the most recent flag-defining comparison.
#[derive(Clone, Copy, Default)]
pub struct FlagCache {
    cmp: Option<(Value, Value)>,
}

impl FlagCache {
    /// Record the operands of a subtraction/comparison.
    pub fn record_cmp(&mut self, a: Value, b: Value) {
        self.cmp = Some((a, b));
    }

    /// Forget the recorded comparison.
    pub fn invalidate(&mut self) {
        self.cmp = None;
    }

    /// The recorded comparison operands, if still coherent.
    pub fn cmp_operands(&self) -> Option<(Value, Value)> {
        self.cmp
    }
}

fn sign_bit(b: &mut FuncBuilder, v: Value) -> Value {
    let ty = b.value_type(v);
    let zero = b.zero(ty);
    b.icmp(IntCC::SignedLessThan, v, zero)
}

fn parity(b: &mut FuncBuilder, result: Value) -> Value {
    let ty = b.value_type(result);
    let byte = if ty == Type::I8 {
        result
    } else {
        b.trunc(Type::I8, result)
    };
    let pop = b.popcnt(byte);
    let one = b.iconst(Type::I8, 1);
    let bit = b.band(pop, one);
    let zero = b.iconst(Type::I8, 0);
    b.icmp(IntCC::Equal, bit, zero)
}

// AF is bit 4 of a ^ b ^ result.
fn adjust(b: &mut FuncBuilder, result: Value, a: Value, rhs: Value) -> Value {
    let ty = b.value_type(result);
    let x = b.bxor(a, rhs);
    let x = b.bxor(x, result);
    let four = b.iconst(ty, 4);
    let nibble = b.ushr(x, four);
    b.trunc(Type::I1, nibble)
}

// OF after addition: operands agree in sign, result does not.
fn overflow_add(b: &mut FuncBuilder, result: Value, a: Value, rhs: Value) -> Value {
    let sa = sign_bit(b, a);
    let sb = sign_bit(b, rhs);
    let sr = sign_bit(b, result);
    let same = b.icmp(IntCC::Equal, sa, sb);
    let flipped = b.icmp(IntCC::NotEqual, sr, sa);
    b.band(same, flipped)
}

// OF after subtraction: operands differ in sign, result leaves the
// minuend's.
fn overflow_sub(b: &mut FuncBuilder, result: Value, a: Value, rhs: Value) -> Value {
    let sa = sign_bit(b, a);
    let sb = sign_bit(b, rhs);
    let sr = sign_bit(b, result);
    let differ = b.icmp(IntCC::NotEqual, sa, sb);
    let flipped = b.icmp(IntCC::NotEqual, sr, sa);
    b.band(differ, flipped)
}

/// Set all six flags after `result = a + rhs`.
pub(crate) fn set_add(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    result: Value,
    a: Value,
    rhs: Value,
) {
    rf.flag_cache.invalidate();
    let mut b = ctx.ins();
    let ty = b.value_type(result);
    let zero = b.zero(ty);
    let zf = b.icmp(IntCC::Equal, result, zero);
    let sf = b.icmp(IntCC::SignedLessThan, result, zero);
    let pf = parity(&mut b, result);
    let cf = b.icmp(IntCC::UnsignedLessThan, result, a);
    let af = adjust(&mut b, result, a, rhs);
    let of = overflow_add(&mut b, result, a, rhs);
    rf.set_flag(Flag::Zf, zf);
    rf.set_flag(Flag::Sf, sf);
    rf.set_flag(Flag::Pf, pf);
    rf.set_flag(Flag::Cf, cf);
    rf.set_flag(Flag::Af, af);
    rf.set_flag(Flag::Of, of);
}

/// Set all six flags after `result = a - rhs`, and record the operands so
/// a following conditional can fuse into a single comparison.
pub(crate) fn set_sub(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    result: Value,
    a: Value,
    rhs: Value,
) {
    let mut b = ctx.ins();
    let ty = b.value_type(result);
    let zero = b.zero(ty);
    let zf = b.icmp(IntCC::Equal, result, zero);
    let sf = b.icmp(IntCC::SignedLessThan, result, zero);
    let pf = parity(&mut b, result);
    let cf = b.icmp(IntCC::UnsignedLessThan, a, rhs);
    let af = adjust(&mut b, result, a, rhs);
    let of = overflow_sub(&mut b, result, a, rhs);
    rf.set_flag(Flag::Zf, zf);
    rf.set_flag(Flag::Sf, sf);
    rf.set_flag(Flag::Pf, pf);
    rf.set_flag(Flag::Cf, cf);
    rf.set_flag(Flag::Af, af);
    rf.set_flag(Flag::Of, of);
    rf.flag_cache.record_cmp(a, rhs);
}

/// Flags after `result = a + 1`; CF is architecturally preserved.
pub(crate) fn set_inc(ctx: &mut LiftContext, rf: &mut RegisterFile, result: Value, a: Value) {
    rf.flag_cache.invalidate();
    let mut b = ctx.ins();
    let ty = b.value_type(result);
    let zero = b.zero(ty);
    let one = b.iconst(ty, 1);
    let zf = b.icmp(IntCC::Equal, result, zero);
    let sf = b.icmp(IntCC::SignedLessThan, result, zero);
    let pf = parity(&mut b, result);
    let af = adjust(&mut b, result, a, one);
    let of = overflow_add(&mut b, result, a, one);
    rf.set_flag(Flag::Zf, zf);
    rf.set_flag(Flag::Sf, sf);
    rf.set_flag(Flag::Pf, pf);
    rf.set_flag(Flag::Af, af);
    rf.set_flag(Flag::Of, of);
}

/// Flags after `result = a - 1`; CF is architecturally preserved.
pub(crate) fn set_dec(ctx: &mut LiftContext, rf: &mut RegisterFile, result: Value, a: Value) {
    rf.flag_cache.invalidate();
    let mut b = ctx.ins();
    let ty = b.value_type(result);
    let zero = b.zero(ty);
    let one = b.iconst(ty, 1);
    let zf = b.icmp(IntCC::Equal, result, zero);
    let sf = b.icmp(IntCC::SignedLessThan, result, zero);
    let pf = parity(&mut b, result);
    let af = adjust(&mut b, result, a, one);
    let of = overflow_sub(&mut b, result, a, one);
    rf.set_flag(Flag::Zf, zf);
    rf.set_flag(Flag::Sf, sf);
    rf.set_flag(Flag::Pf, pf);
    rf.set_flag(Flag::Af, af);
    rf.set_flag(Flag::Of, of);
}

/// Flags after a bitwise operation: ZF/SF/PF from the result, CF and OF
/// cleared, AF undefined.
pub(crate) fn set_bit(ctx: &mut LiftContext, rf: &mut RegisterFile, result: Value) {
    rf.flag_cache.invalidate();
    let mut b = ctx.ins();
    let ty = b.value_type(result);
    let zero = b.zero(ty);
    let zf = b.icmp(IntCC::Equal, result, zero);
    let sf = b.icmp(IntCC::SignedLessThan, result, zero);
    let pf = parity(&mut b, result);
    let false_ = b.zero(Type::I1);
    let undef = b.undef(Type::I1);
    rf.set_flag(Flag::Zf, zf);
    rf.set_flag(Flag::Sf, sf);
    rf.set_flag(Flag::Pf, pf);
    rf.set_flag(Flag::Cf, false_);
    rf.set_flag(Flag::Of, false_);
    rf.set_flag(Flag::Af, undef);
}

/// ZF from a result.
pub(crate) fn set_zf(ctx: &mut LiftContext, rf: &mut RegisterFile, result: Value) {
    let mut b = ctx.ins();
    let ty = b.value_type(result);
    let zero = b.zero(ty);
    let zf = b.icmp(IntCC::Equal, result, zero);
    rf.set_flag(Flag::Zf, zf);
}

/// SF from a result.
pub(crate) fn set_sf(ctx: &mut LiftContext, rf: &mut RegisterFile, result: Value) {
    let mut b = ctx.ins();
    let sf = sign_bit(&mut b, result);
    rf.set_flag(Flag::Sf, sf);
}

/// PF from a result.
pub(crate) fn set_pf(ctx: &mut LiftContext, rf: &mut RegisterFile, result: Value) {
    let mut b = ctx.ins();
    let pf = parity(&mut b, result);
    rf.set_flag(Flag::Pf, pf);
}

/// AF from a result and its operands.
pub(crate) fn set_af(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    result: Value,
    a: Value,
    rhs: Value,
) {
    let mut b = ctx.ins();
    let af = adjust(&mut b, result, a, rhs);
    rf.set_flag(Flag::Af, af);
}

/// OF for a subtraction result.
pub(crate) fn set_of_sub(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    result: Value,
    a: Value,
    rhs: Value,
) {
    let mut b = ctx.ins();
    let of = overflow_sub(&mut b, result, a, rhs);
    rf.set_flag(Flag::Of, of);
}

/// OF and CF for a width-preserving signed multiply: set when the
/// double-width product does not fit the result width.
pub(crate) fn set_of_imul(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    result: Value,
    a: Value,
    rhs: Value,
) {
    let mut b = ctx.ins();
    let ty = b.value_type(result);
    let wide_ty = Type::int(ty.bits() * 2).expect("no double-width type");
    let wa = b.sext(wide_ty, a);
    let wb = b.sext(wide_ty, rhs);
    let wide = b.imul(wa, wb);
    let wide_result = b.sext(wide_ty, result);
    let of = b.icmp(IntCC::NotEqual, wide, wide_result);
    rf.set_flag(Flag::Of, of);
    rf.set_flag(Flag::Cf, of);
}

/// Mark every flag as undefined; used for opcodes whose flag effects are
/// not modeled. Never an error.
pub(crate) fn invalidate(ctx: &mut LiftContext, rf: &mut RegisterFile) {
    rf.flag_cache.invalidate();
    let mut b = ctx.ins();
    let undef = b.undef(Type::I1);
    for flag in Flag::ALL {
        rf.set_flag(flag, undef);
    }
}

/// Build the Boolean for a conditional-opcode family member over the
/// current flags. When the flag cache still holds the operands of the
/// defining comparison, compare-shaped conditions fuse into one `icmp`.
pub(crate) fn condition(
    ctx: &mut LiftContext,
    rf: &mut RegisterFile,
    cc: Cond,
) -> LiftResult<Value> {
    use Cond::*;

    if let Some((a, rhs)) = rf.flag_cache.cmp_operands() {
        let fused = match cc {
            Z | Nz => Some(IntCC::Equal),
            C | Nc => Some(IntCC::UnsignedLessThan),
            Be | A => Some(IntCC::UnsignedLessThanOrEqual),
            L | Ge => Some(IntCC::SignedLessThan),
            Le | G => Some(IntCC::SignedLessThanOrEqual),
            _ => None,
        };
        if let Some(mut cond) = fused {
            if cc.is_negated() {
                cond = cond.inverse();
            }
            return Ok(ctx.ins().icmp(cond, a, rhs));
        }
    }

    let base = match cc {
        O | No => rf.get_flag(Flag::Of)?,
        C | Nc => rf.get_flag(Flag::Cf)?,
        Z | Nz => rf.get_flag(Flag::Zf)?,
        S | Ns => rf.get_flag(Flag::Sf)?,
        P | Np => rf.get_flag(Flag::Pf)?,
        Be | A => {
            let cf = rf.get_flag(Flag::Cf)?;
            let zf = rf.get_flag(Flag::Zf)?;
            ctx.ins().bor(cf, zf)
        }
        L | Ge => {
            let sf = rf.get_flag(Flag::Sf)?;
            let of = rf.get_flag(Flag::Of)?;
            ctx.ins().bxor(sf, of)
        }
        Le | G => {
            let sf = rf.get_flag(Flag::Sf)?;
            let of = rf.get_flag(Flag::Of)?;
            let zf = rf.get_flag(Flag::Zf)?;
            let mut b = ctx.ins();
            let lt = b.bxor(sf, of);
            b.bor(zf, lt)
        }
    };

    Ok(if cc.is_negated() {
        ctx.ins().bnot(base)
    } else {
        base
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::{Config, DeclaredFunctions, LiftContext};
    use relift_ir::{Function, InstructionData, Module, Opcode, Signature};

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
    fn sub_flags_and_fusion() {
        let mut module = Module::new();
        let decls = DeclaredFunctions::new();
        let (mut ctx, mut rf) = ctx_fixture(&mut module, &decls);

        let mut b = ctx.ins();
        let a = b.iconst(Type::I64, 7);
        let c = b.iconst(Type::I64, 9);
        let r = b.isub(a, c);
        set_sub(&mut ctx, &mut rf, r, a, c);

        // All six flags have values now.
        for flag in Flag::ALL {
            assert!(rf.get_flag(flag).is_ok());
        }

        // A signed-less-than condition fuses into a single icmp of the
        // original operands.
        let cond = condition(&mut ctx, &mut rf, Cond::L).unwrap();
        let inst = ctx.func.dfg.value_def(cond).unwrap();
        match &ctx.func.dfg.insts[inst] {
            InstructionData::IntCompare { cond, args, .. } => {
                assert_eq!(*cond, IntCC::SignedLessThan);
                assert_eq!(*args, [a, c]);
            }
            other => panic!("expected fused icmp, got {other:?}"),
        }

        // The three conditional families share the anchor, so the same
        // condition input must produce the same expression.
        let again = condition(&mut ctx, &mut rf, Cond::L).unwrap();
        let inst2 = ctx.func.dfg.value_def(again).unwrap();
        assert_eq!(ctx.func.dfg.insts[inst], ctx.func.dfg.insts[inst2]);
    }

    #[test]
    fn add_flag_shapes() {
        let mut module = Module::new();
        let decls = DeclaredFunctions::new();
        let (mut ctx, mut rf) = ctx_fixture(&mut module, &decls);

        let mut b = ctx.ins();
        let a = b.iconst(Type::I64, 5);
        let c = b.iconst(Type::I64, 6);
        let r = b.iadd(a, c);
        set_add(&mut ctx, &mut rf, r, a, c);

        let shape = |v: Value| match &ctx.func.dfg.insts[ctx.func.dfg.value_def(v).unwrap()] {
            InstructionData::IntCompare { cond, args, .. } => (*cond, *args),
            other => panic!("expected an icmp, got {other:?}"),
        };

        // ZF = (r == 0), CF = (r <u a), SF = msb(r).
        let (cond, args) = shape(rf.get_flag(Flag::Zf).unwrap());
        assert_eq!(cond, IntCC::Equal);
        assert_eq!(args[0], r);
        assert!(ctx.func.dfg.value_is_zero(args[1]));

        let (cond, args) = shape(rf.get_flag(Flag::Cf).unwrap());
        assert_eq!(cond, IntCC::UnsignedLessThan);
        assert_eq!(args, [r, a]);

        let (cond, args) = shape(rf.get_flag(Flag::Sf).unwrap());
        assert_eq!(cond, IntCC::SignedLessThan);
        assert_eq!(args[0], r);

        // An addition does not leave a fusable comparison behind.
        assert!(rf.flag_cache.cmp_operands().is_none());
    }

    #[test]
    fn bit_flags_clear_carry_and_overflow() {
        let mut module = Module::new();
        let decls = DeclaredFunctions::new();
        let (mut ctx, mut rf) = ctx_fixture(&mut module, &decls);

        let mut b = ctx.ins();
        let a = b.iconst(Type::I32, 0);
        set_bit(&mut ctx, &mut rf, a);

        let cf = rf.get_flag(Flag::Cf).unwrap();
        assert!(ctx.func.dfg.value_is_zero(cf));
        let of = rf.get_flag(Flag::Of).unwrap();
        assert!(ctx.func.dfg.value_is_zero(of));
        // The cache is gone, so conditions go through the flag bits.
        let cond = condition(&mut ctx, &mut rf, Cond::Nz).unwrap();
        let inst = ctx.func.dfg.value_def(cond).unwrap();
        assert_eq!(ctx.func.dfg.insts[inst].opcode(), Opcode::Bnot);
    }

    #[test]
    fn invalidate_leaves_undefined_flags() {
        let mut module = Module::new();
        let decls = DeclaredFunctions::new();
        let (mut ctx, mut rf) = ctx_fixture(&mut module, &decls);

        invalidate(&mut ctx, &mut rf);
        let zf = rf.get_flag(Flag::Zf).unwrap();
        assert!(ctx.func.dfg.value_is_const(zf));
        assert!(rf.flag_cache.cmp_operands().is_none());
    }

    #[test]
    fn negated_conditions_complement_the_base() {
        let mut module = Module::new();
        let decls = DeclaredFunctions::new();
        let (mut ctx, mut rf) = ctx_fixture(&mut module, &decls);

        let mut b = ctx.ins();
        let t = b.iconst(Type::I1, 1);
        for flag in Flag::ALL {
            rf.set_flag(flag, t);
        }
        let s = condition(&mut ctx, &mut rf, Cond::S).unwrap();
        assert_eq!(s, t);
        let ns = condition(&mut ctx, &mut rf, Cond::Ns).unwrap();
        let inst = ctx.func.dfg.value_def(ns).unwrap();
        assert_eq!(ctx.func.dfg.insts[inst].opcode(), Opcode::Bnot);
    }
}
