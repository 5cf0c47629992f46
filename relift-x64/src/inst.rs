//! Decoded x86-64 instructions.
//!
//! This is the named interface through which a client hands the lifter its
//! decoded basic blocks. Decoding itself is out of scope; any decoder that
//! can produce these structures will do. The shapes deliberately stay close
//! to what hardware decoders report: a register is a kind plus an index, an
//! operand carries its access width, and an instruction has an address, a
//! length and up to three operands.

use crate::error::{LiftError, LiftResult};
use core::fmt;

/// The class a register name refers to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RegKind {
    /// Low byte of a general-purpose register (`al`, `r8b`, ...).
    Gp8,
    /// Legacy high byte (`ah`..`bh`); the index is that of the full register.
    Gp8High,
    /// 16-bit general-purpose register.
    Gp16,
    /// 32-bit general-purpose register.
    Gp32,
    /// 64-bit general-purpose register.
    Gp64,
    /// 128-bit vector register.
    Xmm,
    /// 256-bit vector register.
    Ymm,
    /// The instruction pointer.
    Ip,
}

/// An architectural register.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Reg {
    /// The register class.
    pub kind: RegKind,
    /// Index within the class, 0..16 in the conventional A, C, D, B, SP,
    /// BP, SI, DI, 8..15 ordering.
    pub index: u8,
}

const GP64_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];
const GP32_NAMES: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d", "r12d",
    "r13d", "r14d", "r15d",
];
const GP16_NAMES: [&str; 16] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w",
    "r14w", "r15w",
];
const GP8_NAMES: [&str; 16] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b",
    "r13b", "r14b", "r15b",
];
const GP8HIGH_NAMES: [&str; 4] = ["ah", "ch", "dh", "bh"];
const XMM_NAMES: [&str; 16] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9", "xmm10",
    "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
];
const YMM_NAMES: [&str; 16] = [
    "ymm0", "ymm1", "ymm2", "ymm3", "ymm4", "ymm5", "ymm6", "ymm7", "ymm8", "ymm9", "ymm10",
    "ymm11", "ymm12", "ymm13", "ymm14", "ymm15",
];

impl Reg {
    /// Create a register from its class and index.
    pub const fn new(kind: RegKind, index: u8) -> Self {
        Self { kind, index }
    }

    /// The general-purpose register of the given width and index.
    pub fn gp(width: u16, index: u8) -> Self {
        let kind = match width {
            8 => RegKind::Gp8,
            16 => RegKind::Gp16,
            32 => RegKind::Gp32,
            64 => RegKind::Gp64,
            _ => panic!("no general purpose register is {width} bits wide"),
        };
        Self { kind, index }
    }

    /// The 128-bit vector register of the given index.
    pub const fn xmm(index: u8) -> Self {
        Self::new(RegKind::Xmm, index)
    }

    /// The instruction pointer pseudo-register.
    pub const fn rip() -> Self {
        Self::new(RegKind::Ip, 0)
    }

    /// True for general-purpose registers of any width.
    pub fn is_gp(self) -> bool {
        matches!(
            self.kind,
            RegKind::Gp8 | RegKind::Gp8High | RegKind::Gp16 | RegKind::Gp32 | RegKind::Gp64
        )
    }

    /// True for vector registers.
    pub fn is_vec(self) -> bool {
        matches!(self.kind, RegKind::Xmm | RegKind::Ymm)
    }

    /// The access width of this register name in bits.
    pub fn width(self) -> u16 {
        match self.kind {
            RegKind::Gp8 | RegKind::Gp8High => 8,
            RegKind::Gp16 => 16,
            RegKind::Gp32 => 32,
            RegKind::Gp64 | RegKind::Ip => 64,
            RegKind::Xmm => 128,
            RegKind::Ymm => 256,
        }
    }

    /// The assembler name of this register.
    pub fn name(self) -> &'static str {
        let i = self.index as usize;
        match self.kind {
            RegKind::Gp8 => GP8_NAMES[i],
            RegKind::Gp8High => GP8HIGH_NAMES.get(i).copied().unwrap_or("??"),
            RegKind::Gp16 => GP16_NAMES[i],
            RegKind::Gp32 => GP32_NAMES[i],
            RegKind::Gp64 => GP64_NAMES[i],
            RegKind::Xmm => XMM_NAMES[i],
            RegKind::Ymm => YMM_NAMES[i],
            RegKind::Ip => "rip",
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Well-known registers, named for the 64-bit view.
pub mod regs {
    use super::{Reg, RegKind};

    /// `rax`.
    pub const RAX: Reg = Reg::new(RegKind::Gp64, 0);
    /// `rcx`.
    pub const RCX: Reg = Reg::new(RegKind::Gp64, 1);
    /// `rdx`.
    pub const RDX: Reg = Reg::new(RegKind::Gp64, 2);
    /// `rbx`.
    pub const RBX: Reg = Reg::new(RegKind::Gp64, 3);
    /// `rsp`.
    pub const RSP: Reg = Reg::new(RegKind::Gp64, 4);
    /// `rbp`.
    pub const RBP: Reg = Reg::new(RegKind::Gp64, 5);
    /// `rsi`.
    pub const RSI: Reg = Reg::new(RegKind::Gp64, 6);
    /// `rdi`.
    pub const RDI: Reg = Reg::new(RegKind::Gp64, 7);
    /// `r8`.
    pub const R8: Reg = Reg::new(RegKind::Gp64, 8);
    /// `r9`.
    pub const R9: Reg = Reg::new(RegKind::Gp64, 9);
    /// `r10`.
    pub const R10: Reg = Reg::new(RegKind::Gp64, 10);
    /// `r11`.
    pub const R11: Reg = Reg::new(RegKind::Gp64, 11);
    /// `xmm0`.
    pub const XMM0: Reg = Reg::xmm(0);
    /// `xmm1`.
    pub const XMM1: Reg = Reg::xmm(1);
}

/// A condition family anchor. The Jcc, SETcc and CMOVcc families all carry
/// one of these, so a single condition builder serves all three.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cond {
    /// Overflow.
    O,
    /// No overflow.
    No,
    /// Carry (below).
    C,
    /// No carry (above or equal).
    Nc,
    /// Zero (equal).
    Z,
    /// Not zero (not equal).
    Nz,
    /// Below or equal.
    Be,
    /// Above.
    A,
    /// Sign.
    S,
    /// No sign.
    Ns,
    /// Parity even.
    P,
    /// Parity odd.
    Np,
    /// Less (signed).
    L,
    /// Greater or equal (signed).
    Ge,
    /// Less or equal (signed).
    Le,
    /// Greater (signed).
    G,
}

impl Cond {
    /// The mnemonic suffix, e.g. `z` in `jz`.
    pub fn suffix(self) -> &'static str {
        use Cond::*;
        match self {
            O => "o",
            No => "no",
            C => "c",
            Nc => "nc",
            Z => "z",
            Nz => "nz",
            Be => "be",
            A => "a",
            S => "s",
            Ns => "ns",
            P => "p",
            Np => "np",
            L => "l",
            Ge => "ge",
            Le => "le",
            G => "g",
        }
    }

    /// Whether this is the negated member of its anchor pair.
    pub fn is_negated(self) -> bool {
        use Cond::*;
        matches!(self, No | Nc | Nz | A | Ns | Np | Ge | G)
    }
}

/// An instruction opcode. Conditional families carry their condition so the
/// dispatch has exactly one arm per family.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[allow(missing_docs)] // the variants are the x86 mnemonics
pub enum Opcode {
    Nop,
    Mov,
    Movsx,
    Movzx,
    Movd,
    Movq,
    Cmovcc(Cond),
    Setcc(Cond),
    Add,
    Adc,
    Sub,
    Inc,
    Dec,
    Cmp,
    Test,
    And,
    Or,
    Xor,
    Not,
    Neg,
    Imul,
    Mul,
    Shl,
    Shr,
    Sar,
    Lea,
    Cdqe,
    Push,
    Pop,
    Leave,
    Call,
    Ret,
    Movss,
    Movsd,
    Movups,
    Movupd,
    Movaps,
    Movapd,
    Movdqa,
    Movdqu,
    Movlps,
    Movlpd,
    Movhps,
    Movhpd,
    Unpcklps,
    Unpcklpd,
    Xorps,
    Xorpd,
    Pxor,
    Addss,
    Addsd,
    Addps,
    Addpd,
    Subss,
    Subsd,
    Subps,
    Subpd,
    Mulss,
    Mulsd,
    Mulps,
    Mulpd,
    Jmp,
    Jcc(Cond),
    HintCall,
    HintRet,
    Invalid,
    // Decodable but not lifted; these surface as `LiftError::Unsupported`.
    Div,
    Idiv,
    Sbb,
    Bsf,
    Cqo,
    Divss,
    Divsd,
    Sqrtss,
    Sqrtsd,
    Ucomiss,
    Ucomisd,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Opcode::*;
        match self {
            Cmovcc(cc) => return write!(f, "cmov{}", cc.suffix()),
            Setcc(cc) => return write!(f, "set{}", cc.suffix()),
            Jcc(cc) => return write!(f, "j{}", cc.suffix()),
            _ => {}
        }
        f.write_str(match self {
            Nop => "nop",
            Mov => "mov",
            Movsx => "movsx",
            Movzx => "movzx",
            Movd => "movd",
            Movq => "movq",
            Add => "add",
            Adc => "adc",
            Sub => "sub",
            Inc => "inc",
            Dec => "dec",
            Cmp => "cmp",
            Test => "test",
            And => "and",
            Or => "or",
            Xor => "xor",
            Not => "not",
            Neg => "neg",
            Imul => "imul",
            Mul => "mul",
            Shl => "shl",
            Shr => "shr",
            Sar => "sar",
            Lea => "lea",
            Cdqe => "cdqe",
            Push => "push",
            Pop => "pop",
            Leave => "leave",
            Call => "call",
            Ret => "ret",
            Movss => "movss",
            Movsd => "movsd",
            Movups => "movups",
            Movupd => "movupd",
            Movaps => "movaps",
            Movapd => "movapd",
            Movdqa => "movdqa",
            Movdqu => "movdqu",
            Movlps => "movlps",
            Movlpd => "movlpd",
            Movhps => "movhps",
            Movhpd => "movhpd",
            Unpcklps => "unpcklps",
            Unpcklpd => "unpcklpd",
            Xorps => "xorps",
            Xorpd => "xorpd",
            Pxor => "pxor",
            Addss => "addss",
            Addsd => "addsd",
            Addps => "addps",
            Addpd => "addpd",
            Subss => "subss",
            Subsd => "subsd",
            Subps => "subps",
            Subpd => "subpd",
            Mulss => "mulss",
            Mulsd => "mulsd",
            Mulps => "mulps",
            Mulpd => "mulpd",
            Jmp => "jmp",
            HintCall => "hint-call",
            HintRet => "hint-ret",
            Invalid => "(invalid)",
            Div => "div",
            Idiv => "idiv",
            Sbb => "sbb",
            Bsf => "bsf",
            Cqo => "cqo",
            Divss => "divss",
            Divsd => "divsd",
            Sqrtss => "sqrtss",
            Sqrtsd => "sqrtsd",
            Ucomiss => "ucomiss",
            Ucomisd => "ucomisd",
            Cmovcc(_) | Setcc(_) | Jcc(_) => unreachable!(),
        })
    }
}

/// A segment override on a memory operand. Recorded by decoders; the lifter
/// assumes flat user-space segmentation and does not fold it into
/// addresses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Segment {
    /// `fs:`.
    Fs,
    /// `gs:`.
    Gs,
}

/// A memory-indirect operand: `disp + base + index * scale`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MemOperand {
    /// Segment override, if any.
    pub seg: Option<Segment>,
    /// The base register, if any.
    pub base: Option<Reg>,
    /// The index register, if any. Ignored when `scale` is 0.
    pub index: Option<Reg>,
    /// The index scale: 0 (no index), 1, 2, 4 or 8.
    pub scale: u8,
    /// The displacement.
    pub disp: i64,
    /// Access width in bits.
    pub width: u16,
}

/// A logical operand of a decoded instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operand {
    /// A register, with an access width that call sites may override.
    Reg {
        /// The register.
        reg: Reg,
        /// Access width in bits; defaults to the register's width.
        width: u16,
    },
    /// An immediate.
    Imm {
        /// The value, sign-extended to 64 bits.
        value: i64,
        /// Width of the encoded immediate in bits.
        width: u16,
    },
    /// A memory reference.
    Mem(MemOperand),
}

impl Operand {
    /// A register operand at the register's natural width.
    pub fn reg(reg: Reg) -> Self {
        Operand::Reg {
            reg,
            width: reg.width(),
        }
    }

    /// An immediate operand.
    pub fn imm(value: i64, width: u16) -> Self {
        Operand::Imm { value, width }
    }

    /// A `[base + disp]` memory operand.
    pub fn mem_bd(base: Reg, disp: i64, width: u16) -> Self {
        Operand::Mem(MemOperand {
            seg: None,
            base: Some(base),
            index: None,
            scale: 0,
            disp,
            width,
        })
    }

    /// A `[base + index * scale + disp]` memory operand.
    pub fn mem_bisd(base: Reg, index: Reg, scale: u8, disp: i64, width: u16) -> Self {
        Operand::Mem(MemOperand {
            seg: None,
            base: Some(base),
            index: Some(index),
            scale,
            disp,
            width,
        })
    }

    /// The access width of this operand in bits.
    pub fn width(&self) -> u16 {
        match *self {
            Operand::Reg { width, .. } => width,
            Operand::Imm { width, .. } => width,
            Operand::Mem(m) => m.width,
        }
    }

    /// The same operand with its access width overridden. This is how
    /// lowering models instructions whose encoded operand width disagrees
    /// with the bits they actually touch, instead of mutating the operand.
    pub fn with_width(self, width: u16) -> Self {
        match self {
            Operand::Reg { reg, .. } => Operand::Reg { reg, width },
            Operand::Imm { value, .. } => Operand::Imm { value, width },
            Operand::Mem(m) => Operand::Mem(MemOperand { width, ..m }),
        }
    }

    /// The register of a register operand.
    pub fn get_reg(&self) -> Option<Reg> {
        match *self {
            Operand::Reg { reg, .. } => Some(reg),
            _ => None,
        }
    }

    /// True for general-purpose register operands.
    pub fn is_gp_reg(&self) -> bool {
        self.get_reg().is_some_and(Reg::is_gp)
    }

    /// True for vector register operands.
    pub fn is_vec_reg(&self) -> bool {
        self.get_reg().is_some_and(Reg::is_vec)
    }

    /// True for memory operands.
    pub fn is_mem(&self) -> bool {
        matches!(self, Operand::Mem(_))
    }
}

fn width_tag(width: u16) -> &'static str {
    match width {
        8 => "byte ptr ",
        16 => "word ptr ",
        32 => "dword ptr ",
        64 => "qword ptr ",
        128 => "xmmword ptr ",
        256 => "ymmword ptr ",
        _ => "",
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Reg { reg, .. } => write!(f, "{reg}"),
            Operand::Imm { value, .. } => write!(f, "{value:#x}"),
            Operand::Mem(m) => {
                write!(f, "{}", width_tag(m.width))?;
                if let Some(seg) = m.seg {
                    write!(f, "{}:", if seg == Segment::Fs { "fs" } else { "gs" })?;
                }
                write!(f, "[")?;
                let mut have_term = false;
                if let Some(base) = m.base {
                    write!(f, "{base}")?;
                    have_term = true;
                }
                if let (Some(index), true) = (m.index, m.scale != 0) {
                    if have_term {
                        write!(f, "+")?;
                    }
                    write!(f, "{index}*{}", m.scale)?;
                    have_term = true;
                }
                if m.disp != 0 || !have_term {
                    if m.disp < 0 {
                        write!(f, "-{:#x}", m.disp.wrapping_neg())?;
                    } else {
                        if have_term {
                            write!(f, "+")?;
                        }
                        write!(f, "{:#x}", m.disp)?;
                    }
                }
                write!(f, "]")
            }
        }
    }
}

/// One decoded instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Inst {
    /// The opcode.
    pub opcode: Opcode,
    /// Address of the first instruction byte.
    pub addr: u64,
    /// Encoded length in bytes.
    pub len: u8,
    /// The destination operand, if any.
    pub dst: Option<Operand>,
    /// The source operand, if any.
    pub src: Option<Operand>,
    /// The second source operand (three-operand IMUL), if any.
    pub src2: Option<Operand>,
}

impl Inst {
    /// Create an instruction with no operands.
    pub fn new(opcode: Opcode, addr: u64, len: u8) -> Self {
        Self {
            opcode,
            addr,
            len,
            dst: None,
            src: None,
            src2: None,
        }
    }

    /// Attach the destination operand.
    pub fn with_dst(mut self, op: Operand) -> Self {
        self.dst = Some(op);
        self
    }

    /// Attach the source operand.
    pub fn with_src(mut self, op: Operand) -> Self {
        self.src = Some(op);
        self
    }

    /// Attach the second source operand.
    pub fn with_src2(mut self, op: Operand) -> Self {
        self.src2 = Some(op);
        self
    }

    /// The destination operand, or a malformed-operand error.
    pub fn dst(&self) -> LiftResult<Operand> {
        self.dst.ok_or_else(|| LiftError::malformed(self, "missing destination operand"))
    }

    /// The source operand, or a malformed-operand error.
    pub fn src(&self) -> LiftResult<Operand> {
        self.src.ok_or_else(|| LiftError::malformed(self, "missing source operand"))
    }

    /// The second source operand, or a malformed-operand error.
    pub fn src2(&self) -> LiftResult<Operand> {
        self.src2.ok_or_else(|| LiftError::malformed(self, "missing second source operand"))
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, op) in [self.dst, self.src, self.src2].iter().flatten().enumerate() {
            if i == 0 {
                write!(f, " {op}")?;
            } else {
                write!(f, ", {op}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_names() {
        assert_eq!(regs::RAX.name(), "rax");
        assert_eq!(Reg::gp(32, 0).name(), "eax");
        assert_eq!(Reg::gp(8, 10).name(), "r10b");
        assert_eq!(Reg::new(RegKind::Gp8High, 3).name(), "bh");
        assert_eq!(Reg::xmm(13).name(), "xmm13");
    }

    #[test]
    fn instruction_display() {
        let inst = Inst::new(Opcode::Mov, 0x1000, 3)
            .with_dst(Operand::reg(regs::RAX))
            .with_src(Operand::reg(regs::RBX));
        assert_eq!(inst.to_string(), "mov rax, rbx");

        let inst = Inst::new(Opcode::Addss, 0x1003, 5)
            .with_dst(Operand::reg(regs::XMM0))
            .with_src(Operand::mem_bisd(regs::RSI, regs::RAX, 4, 8, 32));
        assert_eq!(inst.to_string(), "addss xmm0, dword ptr [rsi+rax*4+0x8]");

        let inst = Inst::new(Opcode::Jcc(Cond::Nz), 0x1008, 2);
        assert_eq!(inst.to_string(), "jnz");

        let inst = Inst::new(Opcode::Push, 0x100a, 1)
            .with_dst(Operand::mem_bd(regs::RBP, -8, 64));
        assert_eq!(inst.to_string(), "push qword ptr [rbp-0x8]");
    }

    #[test]
    fn width_override() {
        let op = Operand::reg(regs::XMM0);
        assert_eq!(op.width(), 128);
        let narrowed = op.with_width(64);
        assert_eq!(narrowed.width(), 64);
        assert_eq!(narrowed.get_reg(), Some(regs::XMM0));
        // The original is unchanged; operands are immutable values.
        assert_eq!(op.width(), 128);
    }
}
