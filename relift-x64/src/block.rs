//! Basic-block lifecycle.
//!
//! A block moves through three states: declared (its IR label exists),
//! emitted (its instructions are lowered and a terminator appended) and
//! linked (its entry phis carry one incoming value per predecessor).
//!
//! On entry every block receives one phi per facet of every general
//! purpose and vector register plus one per flag bit; these phis become the
//! initial contents of the block's register file. They are filled only
//! after the IR for every block has been generated, reading the final
//! register state of each predecessor.

use crate::error::{LiftError, LiftResult};
use crate::flags::{self, Flag};
use crate::func::LiftContext;
use crate::inst::{Inst, Opcode, Reg};
use crate::lower;
use crate::regfile::{Facet, RegisterFile};
use relift_ir::entity::{PackedOption, PrimaryMap};
use relift_ir::{Block, Type};

/// An opaque reference to a block being lifted. Blocks are owned by an
/// arena in the function lifter; back-references are handles, never
/// pointers.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Bb(u32);
relift_ir::entity_impl!(Bb, "bb");

type PhiTable = [[PackedOption<relift_ir::Inst>; Facet::COUNT]; 16];

/// One basic block of the function being lifted.
pub struct LiftBlock {
    /// Address of the first instruction.
    pub addr: u64,
    /// The decoded instructions.
    pub insts: Vec<Inst>,
    /// The branch-target successor, if any.
    pub branch: PackedOption<Bb>,
    /// The fall-through successor, if any.
    pub fall_through: PackedOption<Bb>,
    /// Predecessors; a multiset whose order defines phi incoming order.
    pub preds: Vec<Bb>,
    /// The IR label, once declared.
    pub ir_block: PackedOption<Block>,
    /// The architectural register state of this block.
    pub regfile: RegisterFile,
    pub(crate) is_entry: bool,
    phis_gp: PhiTable,
    phis_vec: PhiTable,
    phis_flags: [PackedOption<relift_ir::Inst>; Flag::COUNT],
}

impl LiftBlock {
    pub(crate) fn new(addr: u64, insts: Vec<Inst>, vec_bits: u16) -> Self {
        Self {
            addr,
            insts,
            branch: PackedOption::default(),
            fall_through: PackedOption::default(),
            preds: Vec::new(),
            ir_block: PackedOption::default(),
            regfile: RegisterFile::new(vec_bits),
            is_entry: false,
            phis_gp: [[PackedOption::default(); Facet::COUNT]; 16],
            phis_vec: [[PackedOption::default(); Facet::COUNT]; 16],
            phis_flags: [PackedOption::default(); Flag::COUNT],
        }
    }

    /// Index of the instruction with the given address, if this block
    /// contains one.
    pub fn find_address(&self, addr: u64) -> Option<usize> {
        self.insts.iter().position(|i| i.addr == addr)
    }
}

/// Emit the IR for one block: entry phis, lowered instructions and the
/// terminator. A block without predecessors is unreachable and is removed
/// from the layout instead.
pub(crate) fn build_ir(
    blocks: &mut PrimaryMap<Bb, LiftBlock>,
    bb: Bb,
    ctx: &mut LiftContext,
) -> LiftResult<()> {
    let ir_block = blocks[bb]
        .ir_block
        .expand()
        .ok_or_else(|| LiftError::invariant(format!("{bb} has not been declared")))?;

    if blocks[bb].preds.is_empty() && !blocks[bb].is_entry {
        log::trace!("removing unreachable {bb} at {:#x}", blocks[bb].addr);
        ctx.func.layout.remove_block(ir_block);
        return Ok(());
    }

    ctx.ins().switch_to_block(ir_block);
    if !blocks[bb].is_entry {
        place_phis(&mut blocks[bb], ctx)?;
    }

    let insts = core::mem::take(&mut blocks[bb].insts);
    let mut lowered = Ok(());
    for inst in &insts {
        lowered = lower::lower_instruction(ctx, &mut blocks[bb].regfile, inst);
        if lowered.is_err() {
            break;
        }
    }
    blocks[bb].insts = insts;
    lowered?;

    emit_terminator(blocks, bb, ctx)
}

fn place_phis(block: &mut LiftBlock, ctx: &mut LiftContext) -> LiftResult<()> {
    let vec_bits = block.regfile.vec_bits();
    let mut b = ctx.ins();

    for i in 0..16u8 {
        let reg = Reg::gp(64, i);
        for &facet in Facet::gp_set() {
            let phi = b.phi(facet.ty());
            block.regfile.set(facet, reg, phi, false, &mut b)?;
            let inst = b.func.dfg.value_def(phi).expect("phi is an instruction");
            block.phis_gp[i as usize][facet.index()] = inst.into();
        }
    }

    for i in 0..16u8 {
        let reg = Reg::xmm(i);
        for &facet in Facet::vec_set(vec_bits) {
            let phi = b.phi(facet.ty());
            block.regfile.set(facet, reg, phi, false, &mut b)?;
            let inst = b.func.dfg.value_def(phi).expect("phi is an instruction");
            block.phis_vec[i as usize][facet.index()] = inst.into();
        }
    }

    for flag in Flag::ALL {
        let phi = b.phi(Type::I1);
        block.regfile.set_flag(flag, phi);
        let inst = b.func.dfg.value_def(phi).expect("phi is an instruction");
        block.phis_flags[flag.index()] = inst.into();
    }

    Ok(())
}

fn successor_label(
    blocks: &PrimaryMap<Bb, LiftBlock>,
    bb: Bb,
    succ: PackedOption<Bb>,
    what: &str,
) -> LiftResult<Block> {
    let succ = succ
        .expand()
        .ok_or_else(|| LiftError::invariant(format!("{bb} has no {what} successor")))?;
    blocks[succ]
        .ir_block
        .expand()
        .ok_or_else(|| LiftError::invariant(format!("{succ} has not been declared")))
}

fn emit_terminator(
    blocks: &mut PrimaryMap<Bb, LiftBlock>,
    bb: Bb,
    ctx: &mut LiftContext,
) -> LiftResult<()> {
    let end = blocks[bb].insts.last().map(|i| i.opcode);

    let term = match end {
        Some(Opcode::Jcc(cc)) => {
            let then_label = successor_label(blocks, bb, blocks[bb].branch, "branch")?;
            let else_label = successor_label(blocks, bb, blocks[bb].fall_through, "fall-through")?;
            let cond = flags::condition(ctx, &mut blocks[bb].regfile, cc)?;
            Some(ctx.ins().br(cond, then_label, else_label))
        }
        Some(Opcode::Jmp) => {
            let dest = successor_label(blocks, bb, blocks[bb].branch, "branch")?;
            Some(ctx.ins().jump(dest))
        }
        // RET is lowered by its instruction handler; an invalid
        // instruction already emitted `unreachable`.
        Some(Opcode::Ret) | Some(Opcode::Invalid) => None,
        _ => {
            let dest = successor_label(blocks, bb, blocks[bb].fall_through, "fall-through")?;
            Some(ctx.ins().jump(dest))
        }
    };

    if let Some(term) = term {
        if ctx.config.full_loop_unroll {
            let mut b = ctx.ins();
            let kind = b.metadata_kind("llvm.loop");
            b.annotate(term, kind, Some("llvm.loop.unroll.full".to_string()));
        }
    }
    Ok(())
}

/// Install the incoming values of every phi of `bb`, reading each
/// predecessor's final register state in predecessor-list order. Facets a
/// predecessor never materialized are synthesized into it, before its
/// terminator.
pub(crate) fn fill_phis(
    blocks: &mut PrimaryMap<Bb, LiftBlock>,
    bb: Bb,
    ctx: &mut LiftContext,
) -> LiftResult<()> {
    if blocks[bb].preds.is_empty() || blocks[bb].ir_block.is_none() {
        return Ok(());
    }

    let preds = blocks[bb].preds.clone();
    let phis_gp = blocks[bb].phis_gp;
    let phis_vec = blocks[bb].phis_vec;
    let phis_flags = blocks[bb].phis_flags;
    let vec_bits = blocks[bb].regfile.vec_bits();

    let require = |phi: PackedOption<relift_ir::Inst>| -> LiftResult<relift_ir::Inst> {
        phi.expand()
            .ok_or_else(|| LiftError::invariant(format!("{bb} has an unplaced phi")))
    };

    for i in 0..16u8 {
        let reg = Reg::gp(64, i);
        for &facet in Facet::gp_set() {
            let phi = require(phis_gp[i as usize][facet.index()])?;
            for &p in &preds {
                let label = blocks[p].ir_block.expand().ok_or_else(|| {
                    LiftError::invariant(format!("{p} has not been declared"))
                })?;
                let value = blocks[p].regfile.get(facet, reg, &mut ctx.ins())?;
                ctx.func.dfg.append_phi_edge(phi, label, value);
            }
        }
    }

    for i in 0..16u8 {
        let reg = Reg::xmm(i);
        for &facet in Facet::vec_set(vec_bits) {
            let phi = require(phis_vec[i as usize][facet.index()])?;
            for &p in &preds {
                let label = blocks[p].ir_block.expand().ok_or_else(|| {
                    LiftError::invariant(format!("{p} has not been declared"))
                })?;
                let value = blocks[p].regfile.get(facet, reg, &mut ctx.ins())?;
                ctx.func.dfg.append_phi_edge(phi, label, value);
            }
        }
    }

    for flag in Flag::ALL {
        let phi = require(phis_flags[flag.index()])?;
        for &p in &preds {
            let label = blocks[p].ir_block.expand().ok_or_else(|| {
                LiftError::invariant(format!("{p} has not been declared"))
            })?;
            let value = blocks[p].regfile.get_flag(flag)?;
            ctx.func.dfg.append_phi_edge(phi, label, value);
        }
    }

    Ok(())
}

/// Split `bb` before the instruction at `index`. The tail inherits both
/// successors; the head falls through into the tail. Predecessor entries
/// naming `bb` anywhere in the function are rewritten to the tail, since
/// the edges they describe now originate from it.
pub(crate) fn split(blocks: &mut PrimaryMap<Bb, LiftBlock>, bb: Bb, index: usize) -> Bb {
    debug_assert!(index > 0 && index < blocks[bb].insts.len());
    let vec_bits = blocks[bb].regfile.vec_bits();

    let tail_insts = blocks[bb].insts.split_off(index);
    let addr = tail_insts[0].addr;
    let branch = blocks[bb].branch.take();
    let fall_through = blocks[bb].fall_through.take();

    let tail = blocks.push(LiftBlock::new(addr, tail_insts, vec_bits));
    blocks[tail].branch = branch.into();
    blocks[tail].fall_through = fall_through.into();
    blocks[bb].fall_through = tail.into();

    let keys: Vec<Bb> = blocks.keys().collect();
    for k in keys {
        for pred in blocks[k].preds.iter_mut() {
            if *pred == bb {
                *pred = tail;
            }
        }
    }
    blocks[tail].preds.push(bb);

    log::debug!("split {bb} at {addr:#x} into {tail}");
    tail
}
