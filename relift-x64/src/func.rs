//! Function assembly.
//!
//! A client describes a function as an entry address plus a set of decoded
//! basic blocks with their successor edges, then calls
//! [`FunctionLifter::lift`]. The lifter declares one IR block per basic
//! block (plus a synthetic entry block that unpacks the machine-ABI
//! arguments into a register file), emits the IR for every block, and
//! finally fills all entry phis. The finished body is committed into the
//! module only on success; a failed lift leaves the module untouched.

use crate::block::{self, Bb, LiftBlock};
use crate::error::{LiftError, LiftResult};
use crate::flags::Flag;
use crate::inst::{Inst, Reg};
use crate::operand::{self, PartialRegisterHandling};
use hashbrown::HashMap;
use relift_ir::entity::PrimaryMap;
use relift_ir::{FuncBuilder, FuncId, Function, Module, Position, Signature, Type};

/// Width of the modeled vector registers.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum VectorSize {
    /// 128-bit XMM registers.
    #[default]
    V128,
    /// 256-bit YMM registers.
    V256,
}

impl VectorSize {
    /// The width in bits.
    pub fn bits(self) -> u16 {
        match self {
            VectorSize::V128 => 128,
            VectorSize::V256 => 256,
        }
    }
}

/// Lifting configuration, fixed at state construction.
#[derive(Clone, Copy, Default)]
pub struct Config {
    /// Attach the unsafe-algebra flag to every floating-point result.
    pub fast_math: bool,
    /// Tag every block terminator with a full-unroll loop annotation.
    pub full_loop_unroll: bool,
    /// Which vector facets exist in the register file.
    pub vector_size: VectorSize,
    /// Policy for partial GP writes when the instruction does not force
    /// one.
    pub partial_default: PartialRegisterHandling,
}

/// The functions the lifted code may call, keyed by entry address.
///
/// CALL instructions look their target up by exact address; an address
/// with no entry here is a [`LiftError::UnresolvedCall`].
pub struct DeclaredFunctions {
    by_addr: HashMap<u64, FuncId>,
}

impl DeclaredFunctions {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            by_addr: HashMap::new(),
        }
    }

    /// Declare a function in `module` and record its entry address.
    pub fn declare(
        &mut self,
        module: &mut Module,
        name: &str,
        signature: Signature,
        addr: u64,
    ) -> FuncId {
        let id = module.declare_function(name, signature);
        self.by_addr.insert(addr, id);
        id
    }

    /// The function declared at `addr`, if any.
    pub fn lookup(&self, addr: u64) -> Option<FuncId> {
        self.by_addr.get(&addr).copied()
    }
}

impl Default for DeclaredFunctions {
    fn default() -> Self {
        Self::new()
    }
}

/// The mutable state threaded through every core lowering operation: the
/// module being extended, the known functions, the configuration, the
/// function under construction and the builder's insertion cursor.
pub struct LiftContext<'a> {
    /// The module receiving declarations and, on success, the body.
    pub module: &'a mut Module,
    /// Callable functions, for CALL resolution.
    pub decls: &'a DeclaredFunctions,
    /// The lifting configuration.
    pub config: Config,
    /// The IR function being built.
    pub func: Function,
    pos: Position,
}

impl<'a> LiftContext<'a> {
    /// Create a context for building `func` into `module`.
    pub fn new(
        module: &'a mut Module,
        decls: &'a DeclaredFunctions,
        config: Config,
        func: Function,
    ) -> Self {
        Self {
            module,
            decls,
            config,
            func,
            pos: Position::Nowhere,
        }
    }

    /// A builder over the function under construction. The insertion
    /// cursor persists across calls.
    pub fn ins(&mut self) -> FuncBuilder<'_> {
        FuncBuilder::new(self.module, &mut self.func, &mut self.pos)
    }
}

/// Builds the IR for one machine-code function.
pub struct FunctionLifter {
    func_id: FuncId,
    entry_addr: u64,
    config: Config,
    blocks: PrimaryMap<Bb, LiftBlock>,
    entry_bb: Bb,
}

impl FunctionLifter {
    /// Create a lifter for the function declared as `func_id` with its
    /// machine entry point at `entry_addr`.
    pub fn new(func_id: FuncId, entry_addr: u64, config: Config) -> Self {
        let mut blocks = PrimaryMap::new();
        let mut entry = LiftBlock::new(entry_addr, Vec::new(), config.vector_size.bits());
        entry.is_entry = true;
        let entry_bb = blocks.push(entry);
        Self {
            func_id,
            entry_addr,
            config,
            blocks,
            entry_bb,
        }
    }

    /// Add a decoded basic block starting at `addr`.
    pub fn add_block(&mut self, addr: u64, insts: Vec<Inst>) -> Bb {
        self.blocks
            .push(LiftBlock::new(addr, insts, self.config.vector_size.bits()))
    }

    /// Record the successors of `bb` and register it as their predecessor.
    pub fn set_successors(&mut self, bb: Bb, branch: Option<Bb>, fall_through: Option<Bb>) {
        if let Some(branch) = branch {
            self.blocks[branch].preds.push(bb);
            self.blocks[bb].branch = branch.into();
        }
        if let Some(fall_through) = fall_through {
            self.blocks[fall_through].preds.push(bb);
            self.blocks[bb].fall_through = fall_through.into();
        }
    }

    /// The block whose first instruction is at `addr`, if any.
    pub fn block_at(&self, addr: u64) -> Option<Bb> {
        self.blocks
            .iter()
            .find(|(_, blk)| !blk.is_entry && blk.addr == addr)
            .map(|(bb, _)| bb)
    }

    /// The block containing an instruction at `addr`, with its index.
    pub fn block_containing(&self, addr: u64) -> Option<(Bb, usize)> {
        self.blocks.iter().find_map(|(bb, blk)| {
            if blk.is_entry {
                return None;
            }
            blk.find_address(addr).map(|index| (bb, index))
        })
    }

    /// Number of decoded blocks (excluding the synthetic entry block).
    pub fn num_blocks(&self) -> usize {
        self.blocks.len() - 1
    }

    /// The predecessors of `bb`, in phi incoming order.
    pub fn preds(&self, bb: Bb) -> &[Bb] {
        &self.blocks[bb].preds
    }

    /// The successors of `bb` as (branch, fall-through).
    pub fn successors(&self, bb: Bb) -> (Option<Bb>, Option<Bb>) {
        (
            self.blocks[bb].branch.expand(),
            self.blocks[bb].fall_through.expand(),
        )
    }

    /// Split the block containing the instruction at `addr` so that a new
    /// block starts there. Used when a jump target is discovered inside an
    /// already registered block.
    pub fn split_block(&mut self, bb: Bb, addr: u64) -> LiftResult<Bb> {
        if self.blocks[bb].ir_block.is_some() {
            return Err(LiftError::invariant(format!(
                "{bb} has already been emitted and cannot be split"
            )));
        }
        let index = self.blocks[bb].find_address(addr).ok_or_else(|| {
            LiftError::invariant(format!("no instruction at {addr:#x} in {bb}"))
        })?;
        if index == 0 {
            return Err(LiftError::invariant(format!(
                "{addr:#x} is already the start of {bb}"
            )));
        }
        Ok(block::split(&mut self.blocks, bb, index))
    }

    /// Build the function and commit it into `module`.
    pub fn lift(mut self, module: &mut Module, decls: &DeclaredFunctions) -> LiftResult<FuncId> {
        let decl = module.decl(self.func_id);
        let name = decl.name.clone();
        let signature = decl.signature.clone();
        log::debug!("lifting {name}{signature} at {:#x}", self.entry_addr);

        // The entry block falls through into the block at the entry
        // address.
        let first = self.block_at(self.entry_addr).ok_or_else(|| {
            LiftError::invariant(format!(
                "no basic block at the entry address {:#x}",
                self.entry_addr
            ))
        })?;
        let entry_bb = self.entry_bb;
        self.blocks[entry_bb].fall_through = first.into();
        self.blocks[first].preds.push(entry_bb);

        let func = Function::with_signature(name, signature);
        let mut ctx = LiftContext::new(module, decls, self.config, func);

        // Declare every block; the synthetic entry comes first in the
        // layout and is therefore the IR entry block.
        let keys: Vec<Bb> = self.blocks.keys().collect();
        for &bb in &keys {
            let ir_block = ctx.func.layout.make_block();
            self.blocks[bb].ir_block = ir_block.into();
            self.blocks[bb].regfile.set_block(ir_block);
        }

        // Seed the entry register file: everything is undefined until the
        // ABI arguments overwrite their slots.
        {
            let entry_ir = self.blocks[entry_bb].ir_block.unwrap();
            let rf = &mut self.blocks[entry_bb].regfile;
            let mut b = ctx.ins();
            b.switch_to_block(entry_ir);
            for i in 0..16u8 {
                rf.clear(Reg::gp(64, i), &mut b);
                rf.clear(Reg::xmm(i), &mut b);
            }
            rf.clear(Reg::rip(), &mut b);
            let undef = b.undef(Type::I1);
            for flag in Flag::ALL {
                rf.set_flag(flag, undef);
            }
            drop(b);
            operand::construct_args(&mut ctx, rf)?;
        }

        for &bb in &keys {
            block::build_ir(&mut self.blocks, bb, &mut ctx)?;
        }
        for &bb in &keys {
            block::fill_phis(&mut self.blocks, bb, &mut ctx)?;
        }

        let LiftContext { func, .. } = ctx;
        module.define_function(self.func_id, func);
        Ok(self.func_id)
    }
}
