//! A builder for appending instructions to a function under construction.
//!
//! The builder holds an insertion position which is a stateful cursor: it is
//! repositioned explicitly at the end of a block before instructions are
//! appended, and `with_insertion_before_terminator` provides the scoped
//! repositioning used when values must be synthesized in an already
//! terminated block.
//!
//! Misusing the builder (type mismatches, inserting with no position set) is
//! a programmer error and panics in debug builds; it is not a recoverable
//! condition.

use crate::entities::{Block, FuncId, Inst, MdKind, Value};
use crate::function::Function;
use crate::instructions::{InstructionData, IntCC, Opcode};
use crate::module::Module;
use crate::types::{LaneType, Type};

/// The insertion position of a `FuncBuilder`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Position {
    /// Not pointing anywhere; no instructions can be inserted.
    Nowhere,
    /// New instructions are appended at the end of the block.
    End(Block),
    /// New instructions are inserted before the given instruction.
    Before(Block, Inst),
}

/// Builder appending instructions to a `Function` inside a `Module`.
///
/// The position outlives the builder so that a caller owning the module and
/// function can create builders on demand without losing the cursor.
pub struct FuncBuilder<'a> {
    /// The module, for callee signatures and metadata kinds.
    pub module: &'a mut Module,
    /// The function under construction.
    pub func: &'a mut Function,
    pos: &'a mut Position,
}

impl<'a> FuncBuilder<'a> {
    /// Create a builder over `func` with the given cursor.
    pub fn new(module: &'a mut Module, func: &'a mut Function, pos: &'a mut Position) -> Self {
        Self { module, func, pos }
    }

    /// Append subsequent instructions at the end of `block`.
    pub fn switch_to_block(&mut self, block: Block) {
        *self.pos = Position::End(block);
    }

    /// The current insertion position.
    pub fn position(&self) -> Position {
        *self.pos
    }

    /// Set the insertion position.
    pub fn set_position(&mut self, pos: Position) {
        *self.pos = pos;
    }

    /// The block the cursor currently points into.
    pub fn current_block(&self) -> Option<Block> {
        match *self.pos {
            Position::Nowhere => None,
            Position::End(block) | Position::Before(block, _) => Some(block),
        }
    }

    /// Run `f` with the cursor moved to just before the terminator of
    /// `block` (or its end, when it has none), restoring the previous
    /// position on every exit path.
    pub fn with_insertion_before_terminator<R>(
        &mut self,
        block: Block,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let saved = *self.pos;
        *self.pos = match self.func.terminator(block) {
            Some(term) => Position::Before(block, term),
            None => Position::End(block),
        };
        let result = f(self);
        *self.pos = saved;
        result
    }

    /// The type of `v`.
    pub fn value_type(&self, v: Value) -> Type {
        self.func.dfg.value_type(v)
    }

    fn build(&mut self, data: InstructionData, ty: Type) -> (Inst, Option<Value>) {
        let inst = self.func.dfg.make_inst(data);
        let result = if ty == Type::Void {
            None
        } else {
            Some(self.func.dfg.attach_result(inst, ty))
        };
        match *self.pos {
            Position::End(block) => self.func.layout.append_inst(inst, block),
            Position::Before(block, before) => {
                self.func.layout.insert_inst_before(inst, before, block)
            }
            Position::Nowhere => panic!("no insertion position set"),
        }
        (inst, result)
    }

    fn unary(&mut self, opcode: Opcode, ty: Type, arg: Value) -> Value {
        self.build(InstructionData::Unary { opcode, arg }, ty).1.unwrap()
    }

    fn binary(&mut self, opcode: Opcode, a: Value, b: Value) -> Value {
        debug_assert_eq!(self.value_type(a), self.value_type(b), "{opcode} operands differ");
        let ty = self.value_type(a);
        self.build(InstructionData::Binary { opcode, args: [a, b] }, ty)
            .1
            .unwrap()
    }

    // Constants.

    /// An integer constant of type `ty`.
    pub fn iconst(&mut self, ty: Type, imm: i64) -> Value {
        debug_assert!(ty.is_int());
        self.build(
            InstructionData::UnaryImm {
                opcode: Opcode::Iconst,
                imm,
            },
            ty,
        )
        .1
        .unwrap()
    }

    /// A 32-bit float constant.
    pub fn f32const(&mut self, imm: f32) -> Value {
        self.build(
            InstructionData::UnaryIeee32 {
                opcode: Opcode::F32const,
                imm: imm.to_bits(),
            },
            Type::F32,
        )
        .1
        .unwrap()
    }

    /// A 64-bit float constant.
    pub fn f64const(&mut self, imm: f64) -> Value {
        self.build(
            InstructionData::UnaryIeee64 {
                opcode: Opcode::F64const,
                imm: imm.to_bits(),
            },
            Type::F64,
        )
        .1
        .unwrap()
    }

    /// The undefined value of type `ty`. Not an instruction; interned.
    pub fn undef(&mut self, ty: Type) -> Value {
        self.func.dfg.undef(ty)
    }

    /// The all-zeros constant of type `ty`. Not an instruction; interned.
    pub fn zero(&mut self, ty: Type) -> Value {
        self.func.dfg.zero(ty)
    }

    /// A do-nothing marker instruction, used as an annotation carrier.
    pub fn nop(&mut self) -> Inst {
        self.build(InstructionData::Nullary { opcode: Opcode::Nop }, Type::Void)
            .0
    }

    // Integer and bitwise operations.

    /// Bitwise complement.
    pub fn bnot(&mut self, x: Value) -> Value {
        let ty = self.value_type(x);
        self.unary(Opcode::Bnot, ty, x)
    }

    /// Two's complement negation.
    pub fn ineg(&mut self, x: Value) -> Value {
        let ty = self.value_type(x);
        self.unary(Opcode::Ineg, ty, x)
    }

    /// Population count.
    pub fn popcnt(&mut self, x: Value) -> Value {
        let ty = self.value_type(x);
        self.unary(Opcode::Popcnt, ty, x)
    }

    /// Wrapping addition.
    pub fn iadd(&mut self, a: Value, b: Value) -> Value {
        self.binary(Opcode::Iadd, a, b)
    }

    /// Wrapping subtraction.
    pub fn isub(&mut self, a: Value, b: Value) -> Value {
        self.binary(Opcode::Isub, a, b)
    }

    /// Wrapping multiplication.
    pub fn imul(&mut self, a: Value, b: Value) -> Value {
        self.binary(Opcode::Imul, a, b)
    }

    /// Bitwise and.
    pub fn band(&mut self, a: Value, b: Value) -> Value {
        self.binary(Opcode::Band, a, b)
    }

    /// Bitwise or.
    pub fn bor(&mut self, a: Value, b: Value) -> Value {
        self.binary(Opcode::Bor, a, b)
    }

    /// Bitwise xor.
    pub fn bxor(&mut self, a: Value, b: Value) -> Value {
        self.binary(Opcode::Bxor, a, b)
    }

    /// Shift left.
    pub fn ishl(&mut self, a: Value, b: Value) -> Value {
        self.binary(Opcode::Ishl, a, b)
    }

    /// Logical shift right.
    pub fn ushr(&mut self, a: Value, b: Value) -> Value {
        self.binary(Opcode::Ushr, a, b)
    }

    /// Arithmetic shift right.
    pub fn sshr(&mut self, a: Value, b: Value) -> Value {
        self.binary(Opcode::Sshr, a, b)
    }

    // Floating-point operations.

    fn float_binary(&mut self, opcode: Opcode, a: Value, b: Value) -> Value {
        debug_assert_eq!(self.value_type(a), self.value_type(b));
        let ty = self.value_type(a);
        self.build(
            InstructionData::FloatBinary {
                opcode,
                args: [a, b],
                fast: false,
            },
            ty,
        )
        .1
        .unwrap()
    }

    /// Floating-point addition.
    pub fn fadd(&mut self, a: Value, b: Value) -> Value {
        self.float_binary(Opcode::Fadd, a, b)
    }

    /// Floating-point subtraction.
    pub fn fsub(&mut self, a: Value, b: Value) -> Value {
        self.float_binary(Opcode::Fsub, a, b)
    }

    /// Floating-point multiplication.
    pub fn fmul(&mut self, a: Value, b: Value) -> Value {
        self.float_binary(Opcode::Fmul, a, b)
    }

    /// Enable unsafe-algebra optimizations on a floating-point result.
    pub fn set_fast_math(&mut self, v: Value) {
        let inst = self
            .func
            .dfg
            .value_def(v)
            .expect("fast-math flag on a non-instruction value");
        match &mut self.func.dfg.insts[inst] {
            InstructionData::FloatBinary { fast, .. } => *fast = true,
            data => panic!("fast-math flag on non-float {}", data.opcode()),
        }
    }

    // Comparisons and selection.

    /// Integer comparison producing an `i1`.
    pub fn icmp(&mut self, cond: IntCC, a: Value, b: Value) -> Value {
        debug_assert_eq!(self.value_type(a), self.value_type(b));
        self.build(
            InstructionData::IntCompare {
                opcode: Opcode::Icmp,
                cond,
                args: [a, b],
            },
            Type::I1,
        )
        .1
        .unwrap()
    }

    /// Select between two values based on an `i1` condition.
    pub fn select(&mut self, cond: Value, if_true: Value, if_false: Value) -> Value {
        debug_assert_eq!(self.value_type(cond), Type::I1);
        debug_assert_eq!(self.value_type(if_true), self.value_type(if_false));
        let ty = self.value_type(if_true);
        self.build(
            InstructionData::Ternary {
                opcode: Opcode::Select,
                args: [cond, if_true, if_false],
            },
            ty,
        )
        .1
        .unwrap()
    }

    // Casts.

    /// Truncate to a narrower integer type.
    pub fn trunc(&mut self, ty: Type, x: Value) -> Value {
        debug_assert!(ty.is_int() && ty.bits() < self.value_type(x).bits());
        self.unary(Opcode::Trunc, ty, x)
    }

    /// Sign-extend to a wider integer type.
    pub fn sext(&mut self, ty: Type, x: Value) -> Value {
        debug_assert!(ty.is_int() && ty.bits() > self.value_type(x).bits());
        self.unary(Opcode::Sext, ty, x)
    }

    /// Zero-extend to a wider integer type.
    pub fn zext(&mut self, ty: Type, x: Value) -> Value {
        debug_assert!(ty.is_int() && ty.bits() > self.value_type(x).bits());
        self.unary(Opcode::Zext, ty, x)
    }

    /// Reinterpret as a same-width type.
    pub fn bitcast(&mut self, ty: Type, x: Value) -> Value {
        let from = self.value_type(x);
        if from == ty {
            return x;
        }
        debug_assert_eq!(ty.bits(), from.bits(), "bitcast changes width");
        self.unary(Opcode::Bitcast, ty, x)
    }

    /// Convert an `i64` into a byte pointer.
    pub fn inttoptr(&mut self, x: Value) -> Value {
        debug_assert_eq!(self.value_type(x), Type::I64);
        self.unary(Opcode::IntToPtr, Type::Ptr, x)
    }

    /// Convert a pointer into an integer.
    pub fn ptrtoint(&mut self, ty: Type, x: Value) -> Value {
        debug_assert_eq!(self.value_type(x), Type::Ptr);
        debug_assert!(ty.is_int());
        self.unary(Opcode::PtrToInt, ty, x)
    }

    // Memory.

    /// Typed load from `ptr`; `align` in bytes, 0 for natural alignment.
    pub fn load(&mut self, ty: Type, align: u8, ptr: Value) -> Value {
        debug_assert_eq!(self.value_type(ptr), Type::Ptr);
        self.build(
            InstructionData::Load {
                opcode: Opcode::Load,
                arg: ptr,
                align,
            },
            ty,
        )
        .1
        .unwrap()
    }

    /// Typed store of `value` to `ptr`; `align` in bytes, 0 for natural.
    pub fn store(&mut self, align: u8, value: Value, ptr: Value) -> Inst {
        debug_assert_eq!(self.value_type(ptr), Type::Ptr);
        self.build(
            InstructionData::Store {
                opcode: Opcode::Store,
                args: [value, ptr],
                align,
            },
            Type::Void,
        )
        .0
    }

    /// Byte-addressed pointer offset, preserving provenance.
    pub fn gep(&mut self, ptr: Value, offset: Value) -> Value {
        debug_assert_eq!(self.value_type(ptr), Type::Ptr);
        debug_assert_eq!(self.value_type(offset), Type::I64);
        self.build(
            InstructionData::Binary {
                opcode: Opcode::Gep,
                args: [ptr, offset],
            },
            Type::Ptr,
        )
        .1
        .unwrap()
    }

    // Vectors.

    /// Extract lane `lane` from a vector.
    pub fn extractlane(&mut self, vec: Value, lane: u8) -> Value {
        let ty = self.value_type(vec);
        debug_assert!(lane < ty.lane_count());
        let lane_ty = ty.lane_type().expect("extractlane on non-vector").scalar();
        self.build(
            InstructionData::ExtractLane {
                opcode: Opcode::Extractlane,
                arg: vec,
                lane,
            },
            lane_ty,
        )
        .1
        .unwrap()
    }

    /// Insert `scalar` into lane `lane` of a vector.
    pub fn insertlane(&mut self, vec: Value, scalar: Value, lane: u8) -> Value {
        let ty = self.value_type(vec);
        debug_assert!(lane < ty.lane_count());
        debug_assert_eq!(
            Some(self.value_type(scalar)),
            ty.lane_type().map(LaneType::scalar)
        );
        self.build(
            InstructionData::InsertLane {
                opcode: Opcode::Insertlane,
                args: [vec, scalar],
                lane,
            },
            ty,
        )
        .1
        .unwrap()
    }

    /// Shuffle the concatenated lanes of `a` and `b` by a constant mask.
    /// The result has `mask.len()` lanes of the common lane type.
    pub fn shuffle(&mut self, a: Value, b: Value, mask: &[u8]) -> Value {
        let ty = self.value_type(a);
        debug_assert_eq!(ty, self.value_type(b));
        let lane = ty.lane_type().expect("shuffle on non-vector");
        let result_ty = Type::vector(lane, mask.len() as u8);
        self.build(
            InstructionData::Shuffle {
                opcode: Opcode::Shuffle,
                args: [a, b],
                mask: mask.into(),
            },
            result_ty,
        )
        .1
        .unwrap()
    }

    // Control flow and joins.

    /// Create an empty phi of type `ty`; edges are appended during the
    /// phi-filling pass.
    pub fn phi(&mut self, ty: Type) -> Value {
        self.build(
            InstructionData::Phi {
                opcode: Opcode::Phi,
                edges: Vec::new(),
            },
            ty,
        )
        .1
        .unwrap()
    }

    /// Append an incoming edge to a phi created with [`FuncBuilder::phi`].
    pub fn append_phi_edge(&mut self, phi: Value, block: Block, value: Value) {
        debug_assert_eq!(self.value_type(phi), self.value_type(value));
        let inst = self.func.dfg.value_def(phi).expect("not a phi value");
        self.func.dfg.append_phi_edge(inst, block, value);
    }

    /// Call a declared function. Returns the result value unless the callee
    /// returns void.
    pub fn call(&mut self, callee: FuncId, args: &[Value]) -> (Inst, Option<Value>) {
        let ret = self.module.decl(callee).signature.ret;
        self.build(
            InstructionData::Call {
                opcode: Opcode::Call,
                func: callee,
                args: args.to_vec(),
            },
            ret,
        )
    }

    /// Return from the function, optionally with a value.
    pub fn ret(&mut self, arg: Option<Value>) -> Inst {
        self.build(
            InstructionData::Return {
                opcode: Opcode::Return,
                arg: arg.into(),
            },
            Type::Void,
        )
        .0
    }

    /// Unconditional branch to `dest`.
    pub fn jump(&mut self, dest: Block) -> Inst {
        self.build(
            InstructionData::Jump {
                opcode: Opcode::Jump,
                dest,
            },
            Type::Void,
        )
        .0
    }

    /// Conditional branch on an `i1`.
    pub fn br(&mut self, cond: Value, then_dest: Block, else_dest: Block) -> Inst {
        debug_assert_eq!(self.value_type(cond), Type::I1);
        self.build(
            InstructionData::Branch {
                opcode: Opcode::Br,
                cond,
                then_dest,
                else_dest,
            },
            Type::Void,
        )
        .0
    }

    /// Mark the current point unreachable.
    pub fn unreachable(&mut self) -> Inst {
        self.build(
            InstructionData::Nullary {
                opcode: Opcode::Unreachable,
            },
            Type::Void,
        )
        .0
    }

    // With-overflow conveniences, expanded into primitive operations.

    /// Signed addition with overflow bit.
    pub fn sadd_overflow(&mut self, a: Value, b: Value) -> (Value, Value) {
        let ty = self.value_type(a);
        let zero = self.zero(ty);
        let sum = self.iadd(a, b);
        let sa = self.icmp(IntCC::SignedLessThan, a, zero);
        let sb = self.icmp(IntCC::SignedLessThan, b, zero);
        let ss = self.icmp(IntCC::SignedLessThan, sum, zero);
        let same_sign = self.icmp(IntCC::Equal, sa, sb);
        let flipped = self.icmp(IntCC::NotEqual, ss, sa);
        let ovf = self.band(same_sign, flipped);
        (sum, ovf)
    }

    /// Signed subtraction with overflow bit.
    pub fn ssub_overflow(&mut self, a: Value, b: Value) -> (Value, Value) {
        let ty = self.value_type(a);
        let zero = self.zero(ty);
        let diff = self.isub(a, b);
        let sa = self.icmp(IntCC::SignedLessThan, a, zero);
        let sb = self.icmp(IntCC::SignedLessThan, b, zero);
        let sd = self.icmp(IntCC::SignedLessThan, diff, zero);
        let diff_sign = self.icmp(IntCC::NotEqual, sa, sb);
        let flipped = self.icmp(IntCC::NotEqual, sd, sa);
        let ovf = self.band(diff_sign, flipped);
        (diff, ovf)
    }

    /// Signed multiplication with overflow bit, via the double-width
    /// product.
    pub fn smul_overflow(&mut self, a: Value, b: Value) -> (Value, Value) {
        let ty = self.value_type(a);
        let wide_ty = Type::int(ty.bits() * 2).expect("no double-width type");
        let prod = self.imul(a, b);
        let wa = self.sext(wide_ty, a);
        let wb = self.sext(wide_ty, b);
        let wide = self.imul(wa, wb);
        let wide_prod = self.sext(wide_ty, prod);
        let ovf = self.icmp(IntCC::NotEqual, wide, wide_prod);
        (prod, ovf)
    }

    // Annotations.

    /// Intern a metadata kind string in the module.
    pub fn metadata_kind(&mut self, name: &str) -> MdKind {
        self.module.metadata_kind(name)
    }

    /// Attach an annotation to an instruction.
    pub fn annotate(&mut self, inst: Inst, kind: MdKind, text: Option<String>) {
        self.func.annotate(inst, kind, text);
    }

    /// Attach an annotation to the instruction defining `v`. Constants and
    /// parameters are silently skipped, matching the convention that only
    /// computed values carry register annotations.
    pub fn annotate_value(&mut self, v: Value, kind: MdKind, text: Option<String>) {
        if self.func.dfg.value_is_const(v) {
            return;
        }
        if let Some(inst) = self.func.dfg.value_def(v) {
            self.func.annotate(inst, kind, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Signature;

    fn setup() -> (Module, Function) {
        let module = Module::new();
        let sig = Signature::new(Type::I64).param(Type::I64).param(Type::I64);
        let func = Function::with_signature("test", sig);
        (module, func)
    }

    #[test]
    fn build_and_display() {
        let (mut module, mut func) = setup();
        let mut pos = Position::Nowhere;
        let mut b = FuncBuilder::new(&mut module, &mut func, &mut pos);

        let block = b.func.layout.make_block();
        b.switch_to_block(block);
        let p0 = b.func.params[0];
        let p1 = b.func.params[1];
        let sum = b.iadd(p0, p1);
        b.ret(Some(sum));

        let text = func.to_string();
        assert!(text.contains("function %test(v0: i64, v1: i64) -> i64 {"), "{text}");
        assert!(text.contains("v2 = iadd.i64 v0, v1"), "{text}");
        assert!(text.contains("return v2"), "{text}");
    }

    #[test]
    fn insertion_guard_restores_position() {
        let (mut module, mut func) = setup();
        let mut pos = Position::Nowhere;
        let mut b = FuncBuilder::new(&mut module, &mut func, &mut pos);

        let b0 = b.func.layout.make_block();
        let b1 = b.func.layout.make_block();
        b.switch_to_block(b0);
        b.jump(b1);
        b.switch_to_block(b1);

        b.with_insertion_before_terminator(b0, |b| {
            assert!(matches!(b.position(), Position::Before(..)));
            b.iconst(Type::I64, 1);
        });
        assert_eq!(b.position(), Position::End(b1));

        // The constant went in before the jump.
        let insts = func.layout.block_insts(b0);
        assert_eq!(insts.len(), 2);
        assert_eq!(func.dfg.insts[insts[1]].opcode(), Opcode::Jump);
        assert_eq!(func.dfg.insts[insts[0]].opcode(), Opcode::Iconst);
    }

    #[test]
    fn phi_edges() {
        let (mut module, mut func) = setup();
        let mut pos = Position::Nowhere;
        let mut b = FuncBuilder::new(&mut module, &mut func, &mut pos);

        let b0 = b.func.layout.make_block();
        b.switch_to_block(b0);
        let phi = b.phi(Type::I64);
        let c = b.iconst(Type::I64, 3);
        b.append_phi_edge(phi, b0, c);
        b.append_phi_edge(phi, b0, phi);

        let inst = func.dfg.value_def(phi).unwrap();
        assert_eq!(func.dfg.phi_edges(inst).len(), 2);
    }

    #[test]
    fn overflow_expansion() {
        let (mut module, mut func) = setup();
        let mut pos = Position::Nowhere;
        let mut b = FuncBuilder::new(&mut module, &mut func, &mut pos);

        let b0 = b.func.layout.make_block();
        b.switch_to_block(b0);
        let p0 = b.func.params[0];
        let p1 = b.func.params[1];
        let (prod, ovf) = b.smul_overflow(p0, p1);
        assert_eq!(b.value_type(prod), Type::I64);
        assert_eq!(b.value_type(ovf), Type::I1);
    }
}
