//! The multi-facet register file.
//!
//! Each architectural register is a bundle of typed views called facets.
//! The 64-bit integer facet is the authoritative backing of a
//! general-purpose register; the full-width integer facet (`i128` or
//! `i256`, depending on the configured vector size) plays that role for a
//! vector register. Any other facet can be synthesized on demand from the
//! backing value using only truncation, bitcasts, lane extraction, shuffles
//! and pointer casts, and the synthesized value is memoized back into its
//! slot.
//!
//! A register file belongs to exactly one basic block. Synthesis positions
//! the builder before the block's terminator (the block may already be
//! complete when a successor's phi filling reads from it), restoring the
//! cursor afterwards.

use crate::error::{LiftError, LiftResult};
use crate::flags::{Flag, FlagCache};
use crate::inst::{Reg, RegKind};
use relift_ir::entity::PackedOption;
use relift_ir::{Block, FuncBuilder, Type, Value};
use smallvec::SmallVec;

/// A typed view of a register's current value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Facet {
    /// Low byte.
    I8,
    /// Legacy high byte of the AX family.
    I8H,
    /// Low 16 bits.
    I16,
    /// Low 32 bits.
    I32,
    /// The canonical 64-bit integer view of a GP register.
    I64,
    /// Full 128-bit integer view of a vector register.
    I128,
    /// Full 256-bit integer view of a vector register.
    I256,
    /// Scalar float in lane 0.
    F32,
    /// Scalar double in lane 0.
    F64,
    /// 16 packed bytes.
    V16I8,
    /// 8 packed 16-bit integers.
    V8I16,
    /// 4 packed 32-bit integers.
    V4I32,
    /// 2 packed 64-bit integers.
    V2I64,
    /// 2 packed floats (the low 64 bits).
    V2F32,
    /// 4 packed floats.
    V4F32,
    /// 2 packed doubles.
    V2F64,
    /// 32 packed bytes.
    V32I8,
    /// 16 packed 16-bit integers.
    V16I16,
    /// 8 packed 32-bit integers.
    V8I32,
    /// 4 packed 64-bit integers.
    V4I64,
    /// 8 packed floats.
    V8F32,
    /// 4 packed doubles.
    V4F64,
    /// Opaque byte pointer view of a GP register.
    Ptr,
}

impl Facet {
    /// Number of facets.
    pub const COUNT: usize = 23;

    /// Index of this facet in a per-register facet table.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The IR type of a value stored at this facet.
    pub fn ty(self) -> Type {
        use relift_ir::LaneType::*;
        match self {
            Facet::I8 | Facet::I8H => Type::I8,
            Facet::I16 => Type::I16,
            Facet::I32 => Type::I32,
            Facet::I64 => Type::I64,
            Facet::I128 => Type::I128,
            Facet::I256 => Type::I256,
            Facet::F32 => Type::F32,
            Facet::F64 => Type::F64,
            Facet::V16I8 => Type::vector(I8, 16),
            Facet::V8I16 => Type::vector(I16, 8),
            Facet::V4I32 => Type::vector(I32, 4),
            Facet::V2I64 => Type::vector(I64, 2),
            Facet::V2F32 => Type::vector(F32, 2),
            Facet::V4F32 => Type::vector(F32, 4),
            Facet::V2F64 => Type::vector(F64, 2),
            Facet::V32I8 => Type::vector(I8, 32),
            Facet::V16I16 => Type::vector(I16, 16),
            Facet::V8I32 => Type::vector(I32, 8),
            Facet::V4I64 => Type::vector(I64, 4),
            Facet::V8F32 => Type::vector(F32, 8),
            Facet::V4F64 => Type::vector(F64, 4),
            Facet::Ptr => Type::Ptr,
        }
    }

    /// The canonical full-width integer facet of a vector register.
    pub fn ivec(vec_bits: u16) -> Facet {
        match vec_bits {
            128 => Facet::I128,
            256 => Facet::I256,
            _ => panic!("unsupported vector register size {vec_bits}"),
        }
    }

    /// The facets a general-purpose register can hold.
    pub fn gp_set() -> &'static [Facet] {
        const SET: [Facet; 6] = [
            Facet::I64,
            Facet::I32,
            Facet::I16,
            Facet::I8,
            Facet::I8H,
            Facet::Ptr,
        ];
        &SET
    }

    /// The facets the instruction pointer can hold.
    pub fn ip_set() -> &'static [Facet] {
        const SET: [Facet; 2] = [Facet::I64, Facet::Ptr];
        &SET
    }

    /// The facets a vector register can hold at the given register size.
    pub fn vec_set(vec_bits: u16) -> &'static [Facet] {
        const SET_128: [Facet; 10] = [
            Facet::I128,
            Facet::F32,
            Facet::F64,
            Facet::V16I8,
            Facet::V8I16,
            Facet::V4I32,
            Facet::V2I64,
            Facet::V2F32,
            Facet::V4F32,
            Facet::V2F64,
        ];
        const SET_256: [Facet; 17] = [
            Facet::I128,
            Facet::I256,
            Facet::F32,
            Facet::F64,
            Facet::V16I8,
            Facet::V8I16,
            Facet::V4I32,
            Facet::V2I64,
            Facet::V2F32,
            Facet::V4F32,
            Facet::V2F64,
            Facet::V32I8,
            Facet::V16I16,
            Facet::V8I32,
            Facet::V4I64,
            Facet::V8F32,
            Facet::V4F64,
        ];
        match vec_bits {
            128 => &SET_128,
            256 => &SET_256,
            _ => panic!("unsupported vector register size {vec_bits}"),
        }
    }
}

/// The register name a facet of `reg` corresponds to, used for the
/// `asm.reg.<name>` value annotations.
pub(crate) fn facet_register_name(facet: Facet, reg: Reg) -> &'static str {
    if reg.kind == RegKind::Ip {
        return "rip";
    }
    if reg.is_gp() {
        return match facet {
            Facet::I8 => Reg::gp(8, reg.index).name(),
            Facet::I8H if reg.index < 4 => Reg::new(RegKind::Gp8High, reg.index).name(),
            Facet::I16 => Reg::gp(16, reg.index).name(),
            Facet::I32 => Reg::gp(32, reg.index).name(),
            _ => Reg::gp(64, reg.index).name(),
        };
    }
    match facet {
        Facet::I256 | Facet::V32I8 | Facet::V16I16 | Facet::V8I32 | Facet::V4I64
        | Facet::V8F32 | Facet::V4F64 => Reg::new(RegKind::Ymm, reg.index).name(),
        _ => Reg::new(RegKind::Xmm, reg.index).name(),
    }
}

/// One register's facet table.
#[derive(Clone, Copy)]
struct RegEntry {
    facets: [PackedOption<Value>; Facet::COUNT],
}

impl RegEntry {
    fn new() -> Self {
        Self {
            facets: [PackedOption::default(); Facet::COUNT],
        }
    }
}

/// Per-block bundle of the architectural register state: 16 general
/// purpose registers, 16 vector registers, the instruction pointer, six
/// flag bits and the flag-expression cache.
pub struct RegisterFile {
    block: PackedOption<Block>,
    gp: [RegEntry; 16],
    vec: [RegEntry; 16],
    ip: RegEntry,
    flags: [PackedOption<Value>; Flag::COUNT],
    /// Symbolic record of the most recent flag-defining comparison.
    pub flag_cache: FlagCache,
    vec_bits: u16,
}

impl RegisterFile {
    /// Create an empty register file for the given vector register size.
    pub fn new(vec_bits: u16) -> Self {
        debug_assert!(vec_bits == 128 || vec_bits == 256);
        Self {
            block: PackedOption::default(),
            gp: [RegEntry::new(); 16],
            vec: [RegEntry::new(); 16],
            ip: RegEntry::new(),
            flags: [PackedOption::default(); Flag::COUNT],
            flag_cache: FlagCache::default(),
            vec_bits,
        }
    }

    /// Bind this register file to the IR block it describes.
    pub fn set_block(&mut self, block: Block) {
        self.block = block.into();
    }

    /// The configured vector register width in bits.
    pub fn vec_bits(&self) -> u16 {
        self.vec_bits
    }

    fn entry(&self, reg: Reg) -> &RegEntry {
        match reg.kind {
            RegKind::Gp8 | RegKind::Gp8High | RegKind::Gp16 | RegKind::Gp32 | RegKind::Gp64 => {
                &self.gp[reg.index as usize]
            }
            RegKind::Xmm | RegKind::Ymm => &self.vec[reg.index as usize],
            RegKind::Ip => &self.ip,
        }
    }

    fn entry_mut(&mut self, reg: Reg) -> &mut RegEntry {
        match reg.kind {
            RegKind::Gp8 | RegKind::Gp8High | RegKind::Gp16 | RegKind::Gp32 | RegKind::Gp64 => {
                &mut self.gp[reg.index as usize]
            }
            RegKind::Xmm | RegKind::Ymm => &mut self.vec[reg.index as usize],
            RegKind::Ip => &mut self.ip,
        }
    }

    fn class_facets(reg: Reg, vec_bits: u16) -> &'static [Facet] {
        if reg.is_vec() {
            Facet::vec_set(vec_bits)
        } else if reg.kind == RegKind::Ip {
            Facet::ip_set()
        } else {
            Facet::gp_set()
        }
    }

    /// The value cached at `facet`, without synthesizing.
    pub fn cached(&self, facet: Facet, reg: Reg) -> Option<Value> {
        self.entry(reg).facets[facet.index()].expand()
    }

    /// The value of `reg` in `facet`, synthesizing and memoizing it from
    /// the canonical backing if it is not yet present. Synthesis inserts
    /// before the block's terminator.
    pub fn get(&mut self, facet: Facet, reg: Reg, b: &mut FuncBuilder) -> LiftResult<Value> {
        if let Some(value) = self.cached(facet, reg) {
            debug_assert_eq!(b.value_type(value), facet.ty());
            return Ok(value);
        }

        let block = self
            .block
            .expand()
            .ok_or_else(|| LiftError::invariant("register file is not bound to a block"))?;
        log::trace!("synthesizing {facet:?} of {}", reg.name());
        let value =
            b.with_insertion_before_terminator(block, |b| self.synthesize(facet, reg, b))?;

        debug_assert_eq!(b.value_type(value), facet.ty());
        self.entry_mut(reg).facets[facet.index()] = value.into();
        Ok(value)
    }

    fn synthesize(&mut self, facet: Facet, reg: Reg, b: &mut FuncBuilder) -> LiftResult<Value> {
        if reg.is_vec() {
            return self.synthesize_vec(facet, reg, b);
        }

        // GP registers and the instruction pointer derive from i64.
        let native = self.entry(reg).facets[Facet::I64.index()]
            .expand()
            .ok_or_else(|| {
                LiftError::invariant(format!("no 64-bit backing value for {}", reg.name()))
            })?;
        match facet {
            Facet::I64 => Ok(native),
            Facet::Ptr => Ok(b.inttoptr(native)),
            Facet::I8 | Facet::I16 | Facet::I32 => Ok(b.trunc(facet.ty(), native)),
            Facet::I8H => {
                let eight = b.iconst(Type::I64, 8);
                let high = b.ushr(native, eight);
                Ok(b.trunc(Type::I8, high))
            }
            _ => Err(LiftError::invariant(format!(
                "facet {facet:?} requested of general-purpose register {}",
                reg.name()
            ))),
        }
    }

    fn synthesize_vec(&mut self, facet: Facet, reg: Reg, b: &mut FuncBuilder) -> LiftResult<Value> {
        // Scalars come out of lane 0 of the corresponding packed facet.
        let packed = match facet {
            Facet::I8 => Some(Facet::V16I8),
            Facet::I16 => Some(Facet::V8I16),
            Facet::I32 => Some(Facet::V4I32),
            Facet::I64 => Some(Facet::V2I64),
            Facet::F32 => Some(Facet::V4F32),
            Facet::F64 => Some(Facet::V2F64),
            _ => None,
        };
        if let Some(packed) = packed {
            let vec = self.get(packed, reg, b)?;
            return Ok(b.extractlane(vec, 0));
        }

        match facet {
            Facet::I8H | Facet::Ptr => {
                return Err(LiftError::invariant(format!(
                    "facet {facet:?} requested of vector register {}",
                    reg.name()
                )));
            }
            Facet::I128 if self.vec_bits == 256 => {
                let ivec = self.require_ivec(reg)?;
                return Ok(b.trunc(Type::I128, ivec));
            }
            Facet::I256 if self.vec_bits == 128 => {
                return Err(LiftError::invariant(format!(
                    "facet I256 requested of 128-bit register {}",
                    reg.name()
                )));
            }
            // The canonical facet itself; reaching here means it was
            // never written.
            Facet::I128 | Facet::I256 => {
                return Err(LiftError::invariant(format!(
                    "no canonical vector backing value for {}",
                    reg.name()
                )));
            }
            _ => {}
        }

        let target_ty = facet.ty();
        let target_bits = target_ty.bits();
        if target_bits > u32::from(self.vec_bits) {
            return Err(LiftError::invariant(format!(
                "facet {facet:?} requested of {}-bit register {}",
                self.vec_bits,
                reg.name()
            )));
        }

        // In 256-bit mode, 128-bit facets can come from a cached 128-bit
        // view without touching the full-width backing.
        if self.vec_bits == 256 && target_bits == 128 {
            if let Some(i128v) = self.entry(reg).facets[Facet::I128.index()].expand() {
                return Ok(b.bitcast(target_ty, i128v));
            }
        }

        let ivec = self.require_ivec(reg)?;
        let lane = target_ty.lane_type().expect("vector facet");
        let target_count = u32::from(target_ty.lane_count());
        let native_count = target_count * u32::from(self.vec_bits) / target_bits;
        let native_ty = Type::vector(lane, native_count as u8);

        let mut value = b.bitcast(native_ty, ivec);
        if native_count > target_count {
            let mask: SmallVec<[u8; 16]> = (0..target_count as u8).collect();
            let undef = b.undef(native_ty);
            value = b.shuffle(value, undef, &mask);
        }
        Ok(value)
    }

    fn require_ivec(&self, reg: Reg) -> LiftResult<Value> {
        self.entry(reg).facets[Facet::ivec(self.vec_bits).index()]
            .expand()
            .ok_or_else(|| {
                LiftError::invariant(format!(
                    "no canonical vector backing value for {}",
                    reg.name()
                ))
            })
    }

    /// Store `value` at `facet` of `reg`. With `clear_others`, every other
    /// facet is invalidated first; in that case only the canonical facet
    /// may be written, except that a GP register accepts its pointer facet
    /// and simultaneously records `i64 := ptrtoint(value)`.
    pub fn set(
        &mut self,
        facet: Facet,
        reg: Reg,
        value: Value,
        clear_others: bool,
        b: &mut FuncBuilder,
    ) -> LiftResult<()> {
        let expected = facet.ty();
        let actual = b.value_type(value);
        if actual != expected {
            return Err(LiftError::invariant(format!(
                "{facet:?} facet of {} expects {expected}, got {actual}",
                reg.name()
            )));
        }

        let kind = b.metadata_kind(&format!("asm.reg.{}", facet_register_name(facet, reg)));
        b.annotate_value(value, kind, None);

        if clear_others {
            *self.entry_mut(reg) = RegEntry::new();
            if reg.is_vec() {
                if facet != Facet::ivec(self.vec_bits) {
                    return Err(LiftError::invariant(format!(
                        "only the canonical {}-bit facet of {} may clear other facets",
                        self.vec_bits,
                        reg.name()
                    )));
                }
            } else if facet != Facet::I64 {
                if facet != Facet::Ptr {
                    return Err(LiftError::invariant(format!(
                        "only the i64 or pointer facet of {} may clear other facets",
                        reg.name()
                    )));
                }
                let int = b.ptrtoint(Type::I64, value);
                self.entry_mut(reg).facets[Facet::I64.index()] = int.into();
            }
        }

        self.entry_mut(reg).facets[facet.index()] = value.into();
        Ok(())
    }

    /// Set every facet of `reg` to an undefined value of the facet's type.
    pub fn clear(&mut self, reg: Reg, b: &mut FuncBuilder) {
        *self.entry_mut(reg) = RegEntry::new();
        for &facet in Self::class_facets(reg, self.vec_bits) {
            let undef = b.undef(facet.ty());
            self.entry_mut(reg).facets[facet.index()] = undef.into();
        }
    }

    /// Set every facet of `reg` to the typed zero of the facet's type.
    pub fn zero(&mut self, reg: Reg, b: &mut FuncBuilder) {
        *self.entry_mut(reg) = RegEntry::new();
        for &facet in Self::class_facets(reg, self.vec_bits) {
            let zero = b.zero(facet.ty());
            self.entry_mut(reg).facets[facet.index()] = zero.into();
        }
    }

    /// Copy the whole facet bundle of `src` into `dst`, preserving pointer
    /// provenance facets across register-to-register moves.
    pub fn rename(&mut self, dst: Reg, src: Reg) {
        *self.entry_mut(dst) = *self.entry(src);
    }

    /// Current value of a flag bit.
    pub fn get_flag(&self, flag: Flag) -> LiftResult<Value> {
        self.flags[flag.index()]
            .expand()
            .ok_or_else(|| LiftError::invariant(format!("flag {flag:?} has no value")))
    }

    /// Set a flag bit.
    pub fn set_flag(&mut self, flag: Flag, value: Value) {
        self.flags[flag.index()] = value.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relift_ir::{Function, Module, Opcode, Position, Signature};

    struct Fixture {
        module: Module,
        func: Function,
        pos: Position,
        block: Block,
    }

    fn fixture() -> Fixture {
        let module = Module::new();
        let mut func = Function::with_signature("t", Signature::new(Type::Void));
        let block = func.layout.make_block();
        Fixture {
            module,
            func,
            pos: Position::End(block),
            block,
        }
    }

    impl Fixture {
        fn builder(&mut self) -> FuncBuilder<'_> {
            FuncBuilder::new(&mut self.module, &mut self.func, &mut self.pos)
        }
    }

    #[test]
    fn gp_facets_derive_from_i64() {
        let mut fx = fixture();
        let block = fx.block;
        let mut rf = RegisterFile::new(128);
        rf.set_block(block);

        let mut b = fx.builder();
        let v = b.iconst(Type::I64, 0x1234);
        rf.set(Facet::I64, crate::inst::regs::RAX, v, true, &mut b).unwrap();

        let low32 = rf.get(Facet::I32, crate::inst::regs::RAX, &mut b).unwrap();
        assert_eq!(b.value_type(low32), Type::I32);
        let ptr = rf.get(Facet::Ptr, crate::inst::regs::RAX, &mut b).unwrap();
        assert_eq!(b.value_type(ptr), Type::Ptr);
        let high = rf.get(Facet::I8H, crate::inst::regs::RAX, &mut b).unwrap();
        assert_eq!(b.value_type(high), Type::I8);

        // Memoized: a second read emits nothing new.
        let before = b.func.dfg.num_insts();
        let again = rf.get(Facet::I32, crate::inst::regs::RAX, &mut b).unwrap();
        assert_eq!(again, low32);
        assert_eq!(b.func.dfg.num_insts(), before);
    }

    #[test]
    fn wide_facet_of_gp_is_an_error() {
        let mut fx = fixture();
        let block = fx.block;
        let mut rf = RegisterFile::new(128);
        rf.set_block(block);

        let mut b = fx.builder();
        let v = b.iconst(Type::I64, 1);
        rf.set(Facet::I64, crate::inst::regs::RAX, v, true, &mut b).unwrap();
        assert!(matches!(
            rf.get(Facet::V4F32, crate::inst::regs::RAX, &mut b),
            Err(LiftError::Invariant(_))
        ));
    }

    #[test]
    fn vector_facets_derive_from_ivec() {
        let mut fx = fixture();
        let block = fx.block;
        let mut rf = RegisterFile::new(128);
        rf.set_block(block);

        let mut b = fx.builder();
        let undef = b.undef(Type::I128);
        rf.set(Facet::I128, crate::inst::regs::XMM0, undef, true, &mut b).unwrap();

        // Full-width packed view is one bitcast of the backing.
        let v4 = rf.get(Facet::V4F32, crate::inst::regs::XMM0, &mut b).unwrap();
        let def = b.func.dfg.value_def(v4).unwrap();
        assert_eq!(b.func.dfg.insts[def].opcode(), Opcode::Bitcast);

        // A scalar read extracts lane 0 of the packed view.
        let f = rf.get(Facet::F32, crate::inst::regs::XMM0, &mut b).unwrap();
        let def = b.func.dfg.value_def(f).unwrap();
        assert_eq!(b.func.dfg.insts[def].opcode(), Opcode::Extractlane);

        // The half-width float pair shuffles down the low lanes.
        let v2 = rf.get(Facet::V2F32, crate::inst::regs::XMM0, &mut b).unwrap();
        let def = b.func.dfg.value_def(v2).unwrap();
        assert_eq!(b.func.dfg.insts[def].opcode(), Opcode::Shuffle);
        assert_eq!(b.value_type(v2).lane_count(), 2);
    }

    #[test]
    fn non_canonical_clear_is_an_error() {
        let mut fx = fixture();
        let block = fx.block;
        let mut rf = RegisterFile::new(128);
        rf.set_block(block);

        let mut b = fx.builder();
        let v = b.iconst(Type::I32, 5);
        assert!(rf.set(Facet::I32, crate::inst::regs::RAX, v, true, &mut b).is_err());

        let vec = b.undef(Facet::V4F32.ty());
        assert!(rf
            .set(Facet::V4F32, crate::inst::regs::XMM0, vec, true, &mut b)
            .is_err());
    }

    #[test]
    fn pointer_clear_records_integer_backing() {
        let mut fx = fixture();
        let block = fx.block;
        let mut rf = RegisterFile::new(128);
        rf.set_block(block);

        let mut b = fx.builder();
        let int = b.iconst(Type::I64, 0x4000);
        let ptr = b.inttoptr(int);
        rf.set(Facet::Ptr, crate::inst::regs::RSP, ptr, true, &mut b).unwrap();

        let i64v = rf.get(Facet::I64, crate::inst::regs::RSP, &mut b).unwrap();
        let def = b.func.dfg.value_def(i64v).unwrap();
        assert_eq!(b.func.dfg.insts[def].opcode(), Opcode::PtrToInt);
    }

    #[test]
    fn rename_copies_the_whole_bundle() {
        let mut fx = fixture();
        let block = fx.block;
        let mut rf = RegisterFile::new(128);
        rf.set_block(block);

        let mut b = fx.builder();
        let int = b.iconst(Type::I64, 0x4000);
        let ptr = b.inttoptr(int);
        rf.set(Facet::Ptr, crate::inst::regs::RBX, ptr, true, &mut b).unwrap();
        let ptr_before = rf.get(Facet::Ptr, crate::inst::regs::RBX, &mut b).unwrap();

        rf.rename(crate::inst::regs::RAX, crate::inst::regs::RBX);
        for &facet in Facet::gp_set() {
            assert_eq!(
                rf.cached(facet, crate::inst::regs::RAX),
                rf.cached(facet, crate::inst::regs::RBX)
            );
        }
        assert_eq!(
            rf.get(Facet::Ptr, crate::inst::regs::RAX, &mut b).unwrap(),
            ptr_before
        );
    }

    #[test]
    fn missing_backing_is_an_invariant_error() {
        let mut fx = fixture();
        let block = fx.block;
        let mut rf = RegisterFile::new(128);
        rf.set_block(block);

        let mut b = fx.builder();
        assert!(matches!(
            rf.get(Facet::I32, crate::inst::regs::RAX, &mut b),
            Err(LiftError::Invariant(_))
        ));
        assert!(matches!(
            rf.get(Facet::V4F32, crate::inst::regs::XMM0, &mut b),
            Err(LiftError::Invariant(_))
        ));
    }
}
