//! End-to-end lifts of small decoded functions.

use relift_ir::{Function, InstructionData, IntCC, Module, Opcode as Ir, Signature, Type};
use relift_x64::{
    regs, Cond, Config, DeclaredFunctions, FunctionLifter, Inst, LiftError, Opcode, Operand, Reg,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Phis placed at a block head: one per GP facet per GP register, one per
/// vector facet per vector register, one per flag.
const PHIS_PER_BLOCK_128: usize = 6 * 16 + 10 * 16 + 6;

fn block_phis(func: &Function, block: relift_ir::Block) -> Vec<relift_ir::Inst> {
    func.layout
        .block_insts(block)
        .iter()
        .copied()
        .filter(|&inst| func.dfg.insts[inst].opcode() == Ir::Phi)
        .collect()
}

fn nth_block(func: &Function, n: usize) -> relift_ir::Block {
    func.layout.blocks().nth(n).expect("block exists")
}

#[test]
fn sum_of_an_array() {
    init_logging();
    let mut module = Module::new();
    let mut decls = DeclaredFunctions::new();
    let sig = Signature::new(Type::F32).param(Type::I64).param(Type::Ptr);
    let id = decls.declare(&mut module, "sum", sig, 0x1000);

    let mut lifter = FunctionLifter::new(id, 0x1000, Config::default());
    let head = lifter.add_block(
        0x1000,
        vec![
            Inst::new(Opcode::Xorps, 0x1000, 3)
                .with_dst(Operand::reg(regs::XMM0))
                .with_src(Operand::reg(regs::XMM0)),
            Inst::new(Opcode::Xor, 0x1003, 3)
                .with_dst(Operand::reg(regs::RAX))
                .with_src(Operand::reg(regs::RAX)),
            Inst::new(Opcode::Test, 0x1006, 3)
                .with_dst(Operand::reg(regs::RDI))
                .with_src(Operand::reg(regs::RDI)),
            Inst::new(Opcode::Jcc(Cond::Z), 0x1009, 2),
        ],
    );
    let body = lifter.add_block(
        0x100b,
        vec![
            Inst::new(Opcode::Addss, 0x100b, 5)
                .with_dst(Operand::reg(regs::XMM0))
                .with_src(Operand::mem_bisd(regs::RSI, regs::RAX, 4, 0, 32)),
            Inst::new(Opcode::Add, 0x1010, 4)
                .with_dst(Operand::reg(regs::RAX))
                .with_src(Operand::imm(1, 32)),
            Inst::new(Opcode::Cmp, 0x1014, 3)
                .with_dst(Operand::reg(regs::RAX))
                .with_src(Operand::reg(regs::RDI)),
            Inst::new(Opcode::Jcc(Cond::Nz), 0x1017, 2),
        ],
    );
    let exit = lifter.add_block(0x1019, vec![Inst::new(Opcode::Ret, 0x1019, 1)]);

    lifter.set_successors(head, Some(exit), Some(body));
    lifter.set_successors(body, Some(body), Some(exit));
    lifter.lift(&mut module, &decls).unwrap();

    let func = module.function(id).unwrap();
    let text = module.display_function(id).to_string();

    // Layout: entry, head, body, exit.
    let body_block = nth_block(func, 2);
    let phis = block_phis(func, body_block);
    assert_eq!(phis.len(), PHIS_PER_BLOCK_128, "{text}");
    for phi in phis {
        match &func.dfg.insts[phi] {
            InstructionData::Phi { edges, .. } => {
                assert_eq!(edges.len(), 2, "body block has two predecessors");
                // Incoming order matches the predecessor list: the
                // fall-through edge from the head, then the back edge.
                assert_eq!(edges[0].0, nth_block(func, 1));
                assert_eq!(edges[1].0, body_block);
            }
            _ => unreachable!(),
        }
    }

    // The accumulation is a float add of the loaded element.
    assert!(text.contains("fadd.f32"), "{text}");
    // The element address is a provenance-preserving pointer offset.
    assert!(text.contains("gep.ptr"), "{text}");

    // The head ends in a conditional branch to (exit, body).
    let head_term = func.terminator(nth_block(func, 1)).unwrap();
    match &func.dfg.insts[head_term] {
        InstructionData::Branch {
            then_dest,
            else_dest,
            ..
        } => {
            assert_eq!(*then_dest, nth_block(func, 3));
            assert_eq!(*else_dest, body_block);
        }
        other => panic!("expected conditional branch, got {other:?}"),
    }

    // The exit returns a f32 read out of xmm0.
    let exit_term = func.terminator(nth_block(func, 3)).unwrap();
    match &func.dfg.insts[exit_term] {
        InstructionData::Return { arg, .. } => {
            let arg = arg.expand().unwrap();
            assert_eq!(func.dfg.value_type(arg), Type::F32);
        }
        other => panic!("expected return, got {other:?}"),
    }
}

#[test]
fn power_loop_with_fast_math() {
    init_logging();
    let mut module = Module::new();
    let mut decls = DeclaredFunctions::new();
    let sig = Signature::new(Type::F32).param(Type::I32);
    let id = decls.declare(&mut module, "n_power", sig, 0x2000);

    let config = Config {
        fast_math: true,
        ..Config::default()
    };
    let mut lifter = FunctionLifter::new(id, 0x2000, config);
    let head = lifter.add_block(
        0x2000,
        vec![
            // 3.4f as raw bits via an integer register.
            Inst::new(Opcode::Mov, 0x2000, 5)
                .with_dst(Operand::reg(Reg::gp(32, 0)))
                .with_src(Operand::imm(0x4059999a, 32)),
            Inst::new(Opcode::Movd, 0x2005, 4)
                .with_dst(Operand::reg(regs::XMM1))
                .with_src(Operand::reg(Reg::gp(32, 0))),
            Inst::new(Opcode::Movaps, 0x2009, 3)
                .with_dst(Operand::reg(regs::XMM0))
                .with_src(Operand::reg(regs::XMM1)),
            Inst::new(Opcode::Cmp, 0x200c, 3)
                .with_dst(Operand::reg(Reg::gp(32, 7)))
                .with_src(Operand::imm(1, 8)),
            Inst::new(Opcode::Jcc(Cond::Le), 0x200f, 2),
        ],
    );
    let body = lifter.add_block(
        0x2011,
        vec![
            Inst::new(Opcode::Mulss, 0x2011, 4)
                .with_dst(Operand::reg(regs::XMM0))
                .with_src(Operand::reg(regs::XMM1)),
            Inst::new(Opcode::Sub, 0x2015, 3)
                .with_dst(Operand::reg(Reg::gp(32, 7)))
                .with_src(Operand::imm(1, 8)),
            Inst::new(Opcode::Cmp, 0x2018, 3)
                .with_dst(Operand::reg(Reg::gp(32, 7)))
                .with_src(Operand::imm(1, 8)),
            Inst::new(Opcode::Jcc(Cond::G), 0x201b, 2),
        ],
    );
    let exit = lifter.add_block(0x201d, vec![Inst::new(Opcode::Ret, 0x201d, 1)]);

    lifter.set_successors(head, Some(exit), Some(body));
    lifter.set_successors(body, Some(body), Some(exit));
    lifter.lift(&mut module, &decls).unwrap();

    let text = module.display_function(id).to_string();
    assert!(text.contains("fmul.f32 fast"), "{text}");
    // The float constant is reinterpreted through the integer move, not
    // invented.
    assert!(text.contains("bitcast.f32x4"), "{text}");
}

#[test]
fn compound_add_keeps_the_aliased_accumulator_in_a_phi() {
    init_logging();
    let mut module = Module::new();
    let mut decls = DeclaredFunctions::new();
    let sig = Signature::new(Type::I32).param(Type::I32);
    let id = decls.declare(&mut module, "compound_add", sig, 0x3000);

    let mut lifter = FunctionLifter::new(id, 0x3000, Config::default());
    let head = lifter.add_block(
        0x3000,
        vec![
            Inst::new(Opcode::Mov, 0x3000, 2)
                .with_dst(Operand::reg(Reg::gp(32, 0)))
                .with_src(Operand::reg(Reg::gp(32, 7))),
            Inst::new(Opcode::Mov, 0x3002, 2)
                .with_dst(Operand::reg(Reg::gp(32, 1)))
                .with_src(Operand::reg(Reg::gp(32, 7))),
            Inst::new(Opcode::Test, 0x3004, 2)
                .with_dst(Operand::reg(Reg::gp(32, 1)))
                .with_src(Operand::reg(Reg::gp(32, 1))),
            Inst::new(Opcode::Jcc(Cond::Le), 0x3006, 2),
        ],
    );
    let body = lifter.add_block(
        0x3008,
        vec![
            // n += n through the aliased register.
            Inst::new(Opcode::Add, 0x3008, 2)
                .with_dst(Operand::reg(Reg::gp(32, 0)))
                .with_src(Operand::reg(Reg::gp(32, 0))),
            Inst::new(Opcode::Sub, 0x300a, 3)
                .with_dst(Operand::reg(Reg::gp(32, 1)))
                .with_src(Operand::imm(1, 8)),
            Inst::new(Opcode::Jcc(Cond::G), 0x300d, 2),
        ],
    );
    let exit = lifter.add_block(0x300f, vec![Inst::new(Opcode::Ret, 0x300f, 1)]);

    lifter.set_successors(head, Some(exit), Some(body));
    lifter.set_successors(body, Some(body), Some(exit));
    lifter.lift(&mut module, &decls).unwrap();

    let func = module.function(id).unwrap();
    let body_block = nth_block(func, 2);

    // Find the doubling add: both operands are the same value, and that
    // value is the eax phi at the loop head.
    let mut found = false;
    for &inst in func.layout.block_insts(body_block) {
        if let InstructionData::Binary {
            opcode: Ir::Iadd,
            args,
        } = &func.dfg.insts[inst]
        {
            if args[0] == args[1] && func.dfg.value_type(args[0]) == Type::I32 {
                let def = func.dfg.value_def(args[0]).unwrap();
                assert_eq!(func.dfg.insts[def].opcode(), Ir::Phi);
                assert!(func.layout.block_insts(body_block).contains(&def));
                found = true;
            }
        }
    }
    assert!(found, "{}", module.display_function(id));
}

#[test]
fn call_marshalling() {
    init_logging();
    let mut module = Module::new();
    let mut decls = DeclaredFunctions::new();
    let callee_sig = Signature::new(Type::I64).param(Type::I64).param(Type::I64);
    let callee = decls.declare(&mut module, "other_fn", callee_sig, 0x5000);
    let caller_sig = Signature::new(Type::I64).param(Type::I64).param(Type::I64);
    let id = decls.declare(&mut module, "caller", caller_sig, 0x4000);

    let mut lifter = FunctionLifter::new(id, 0x4000, Config::default());
    lifter.add_block(
        0x4000,
        vec![
            Inst::new(Opcode::Call, 0x4000, 5).with_dst(Operand::imm(0x5000, 64)),
            // rcx was clobbered by the call; reading it now sees an
            // undefined value.
            Inst::new(Opcode::Add, 0x4005, 3)
                .with_dst(Operand::reg(regs::RAX))
                .with_src(Operand::reg(regs::RCX)),
            Inst::new(Opcode::Ret, 0x4008, 1),
        ],
    );
    lifter.lift(&mut module, &decls).unwrap();

    let func = module.function(id).unwrap();
    let text = module.display_function(id).to_string();

    // One call, two integer arguments.
    let mut call_result = None;
    for block in func.layout.blocks() {
        for &inst in func.layout.block_insts(block) {
            if let InstructionData::Call { func: f, args, .. } = &func.dfg.insts[inst] {
                assert_eq!(*f, callee);
                assert_eq!(args.len(), 2);
                call_result = func.dfg.first_result(inst);
            }
        }
    }
    let call_result = call_result.expect("call emitted");
    assert_eq!(func.dfg.value_type(call_result), Type::I64);

    // The post-call add consumes the clobbered rcx as undef.
    assert!(text.contains("undef.i64"), "{text}");

    // The return value flows out of rax, which the call wrote.
    let ret = func
        .layout
        .blocks()
        .filter_map(|b| func.terminator(b))
        .find(|&t| func.dfg.insts[t].opcode() == Ir::Return)
        .unwrap();
    match &func.dfg.insts[ret] {
        InstructionData::Return { arg, .. } => {
            let arg = arg.expand().unwrap();
            let def = func.dfg.value_def(arg).unwrap();
            // rax = call result + undef rcx.
            match &func.dfg.insts[def] {
                InstructionData::Binary { opcode: Ir::Iadd, args } => {
                    assert_eq!(args[0], call_result);
                }
                other => panic!("expected the add of the call result, got {other:?}"),
            }
        }
        _ => unreachable!(),
    }
}

#[test]
fn unresolved_call_aborts_the_function() {
    init_logging();
    let mut module = Module::new();
    let mut decls = DeclaredFunctions::new();
    let sig = Signature::new(Type::Void);
    let id = decls.declare(&mut module, "bad", sig, 0x4000);

    let mut lifter = FunctionLifter::new(id, 0x4000, Config::default());
    lifter.add_block(
        0x4000,
        vec![
            Inst::new(Opcode::Call, 0x4000, 5).with_dst(Operand::imm(0xdead, 64)),
            Inst::new(Opcode::Ret, 0x4005, 1),
        ],
    );
    let err = lifter.lift(&mut module, &decls).unwrap_err();
    assert_eq!(err, LiftError::UnresolvedCall(0xdead));
    // The failed lift did not pollute the module.
    assert!(module.function(id).is_none());
}

#[test]
fn unsupported_opcode_aborts_the_function() {
    init_logging();
    let mut module = Module::new();
    let mut decls = DeclaredFunctions::new();
    let sig = Signature::new(Type::Void);
    let id = decls.declare(&mut module, "divides", sig, 0x4000);

    let mut lifter = FunctionLifter::new(id, 0x4000, Config::default());
    lifter.add_block(
        0x4000,
        vec![
            Inst::new(Opcode::Div, 0x4000, 3).with_dst(Operand::reg(regs::RCX)),
            Inst::new(Opcode::Ret, 0x4003, 1),
        ],
    );
    match lifter.lift(&mut module, &decls) {
        Err(LiftError::Unsupported(text)) => assert!(text.contains("div"), "{text}"),
        other => panic!("expected an unsupported-instruction error, got {other:?}"),
    }
    assert!(module.function(id).is_none());
}

#[test]
fn block_split_rewrites_predecessors() {
    init_logging();
    let mut module = Module::new();
    let mut decls = DeclaredFunctions::new();
    let sig = Signature::new(Type::Void);
    let id = decls.declare(&mut module, "split_me", sig, 0x6000);

    let mut lifter = FunctionLifter::new(id, 0x6000, Config::default());
    let b0 = lifter.add_block(
        0x6000,
        vec![
            Inst::new(Opcode::Mov, 0x6000, 3)
                .with_dst(Operand::reg(regs::RAX))
                .with_src(Operand::reg(regs::RDI)),
            Inst::new(Opcode::Add, 0x6003, 3)
                .with_dst(Operand::reg(regs::RAX))
                .with_src(Operand::imm(1, 8)),
            Inst::new(Opcode::Jmp, 0x6006, 2),
        ],
    );
    let b2 = lifter.add_block(
        0x7000,
        vec![
            Inst::new(Opcode::Cmp, 0x7000, 3)
                .with_dst(Operand::reg(regs::RAX))
                .with_src(Operand::reg(regs::RDI)),
            Inst::new(Opcode::Jcc(Cond::Nz), 0x7003, 2),
        ],
    );
    lifter.set_successors(b0, Some(b2), None);

    // b2's conditional branch turns out to target 0x6003, which lives in
    // the middle of b0: split it there.
    let (containing, index) = lifter.block_containing(0x6003).unwrap();
    assert_eq!((containing, index), (b0, 1));
    let tail = lifter.split_block(b0, 0x6003).unwrap();

    // The head now falls through into the tail, which inherited the jump.
    assert_eq!(lifter.successors(b0), (None, Some(tail)));
    assert_eq!(lifter.successors(tail), (Some(b2), None));
    // b2's incoming edge originates from the jump, which moved into the
    // tail; its predecessor list was rewritten.
    assert_eq!(lifter.preds(b2), &[tail]);

    let exit = lifter.add_block(0x7005, vec![Inst::new(Opcode::Ret, 0x7005, 1)]);
    lifter.set_successors(b2, Some(tail), Some(exit));
    assert_eq!(lifter.num_blocks(), 4);

    lifter.lift(&mut module, &decls).unwrap();
    let func = module.function(id).unwrap();

    // The tail has two predecessors (head fall-through, b2 branch), so
    // each of its phis carries two incoming values.
    let tail_block = nth_block(func, 3);
    let phis = block_phis(func, tail_block);
    assert_eq!(phis.len(), PHIS_PER_BLOCK_128);
    for phi in phis {
        match &func.dfg.insts[phi] {
            InstructionData::Phi { edges, .. } => assert_eq!(edges.len(), 2),
            _ => unreachable!(),
        }
    }
}

#[test]
fn xor_self_reads_back_as_constant_zero() {
    init_logging();
    let mut module = Module::new();
    let mut decls = DeclaredFunctions::new();
    let sig = Signature::new(Type::I64);
    let id = decls.declare(&mut module, "zero", sig, 0x1000);

    let mut lifter = FunctionLifter::new(id, 0x1000, Config::default());
    lifter.add_block(
        0x1000,
        vec![
            Inst::new(Opcode::Xor, 0x1000, 3)
                .with_dst(Operand::reg(regs::RAX))
                .with_src(Operand::reg(regs::RAX)),
            Inst::new(Opcode::Ret, 0x1003, 1),
        ],
    );
    lifter.lift(&mut module, &decls).unwrap();

    let func = module.function(id).unwrap();
    let ret = func
        .layout
        .blocks()
        .filter_map(|b| func.terminator(b))
        .find(|&t| func.dfg.insts[t].opcode() == Ir::Return)
        .unwrap();
    match &func.dfg.insts[ret] {
        InstructionData::Return { arg, .. } => {
            assert!(func.dfg.value_is_zero(arg.expand().unwrap()));
        }
        _ => unreachable!(),
    }
}

#[test]
fn cmp_jcc_fuses_into_one_comparison() {
    init_logging();
    let mut module = Module::new();
    let mut decls = DeclaredFunctions::new();
    let sig = Signature::new(Type::Void).param(Type::I64).param(Type::I64);
    let id = decls.declare(&mut module, "compare", sig, 0x1000);

    let mut lifter = FunctionLifter::new(id, 0x1000, Config::default());
    let head = lifter.add_block(
        0x1000,
        vec![
            Inst::new(Opcode::Cmp, 0x1000, 3)
                .with_dst(Operand::reg(regs::RDI))
                .with_src(Operand::reg(regs::RSI)),
            Inst::new(Opcode::Jcc(Cond::L), 0x1003, 2),
        ],
    );
    let less = lifter.add_block(0x1005, vec![Inst::new(Opcode::Ret, 0x1005, 1)]);
    let other = lifter.add_block(0x1006, vec![Inst::new(Opcode::Ret, 0x1006, 1)]);
    lifter.set_successors(head, Some(less), Some(other));
    lifter.lift(&mut module, &decls).unwrap();

    let func = module.function(id).unwrap();
    let head_term = func.terminator(nth_block(func, 1)).unwrap();
    match &func.dfg.insts[head_term] {
        InstructionData::Branch { cond, .. } => {
            let def = func.dfg.value_def(*cond).unwrap();
            match &func.dfg.insts[def] {
                InstructionData::IntCompare { cond, args, .. } => {
                    assert_eq!(*cond, IntCC::SignedLessThan);
                    // Both operands are the rdi/rsi values the cmp read.
                    assert_eq!(func.dfg.value_type(args[0]), Type::I64);
                    assert_eq!(func.dfg.value_type(args[1]), Type::I64);
                }
                other => panic!("expected a fused icmp, got {other:?}"),
            }
        }
        _ => unreachable!(),
    }
}

#[test]
fn mov_between_registers_preserves_pointer_provenance() {
    init_logging();
    let mut module = Module::new();
    let mut decls = DeclaredFunctions::new();
    let sig = Signature::new(Type::Ptr).param(Type::Ptr);
    let id = decls.declare(&mut module, "identity", sig, 0x1000);

    let mut lifter = FunctionLifter::new(id, 0x1000, Config::default());
    lifter.add_block(
        0x1000,
        vec![
            Inst::new(Opcode::Mov, 0x1000, 3)
                .with_dst(Operand::reg(regs::RAX))
                .with_src(Operand::reg(regs::RDI)),
            Inst::new(Opcode::Ret, 0x1003, 1),
        ],
    );
    lifter.lift(&mut module, &decls).unwrap();

    let func = module.function(id).unwrap();
    let ret = func
        .layout
        .blocks()
        .filter_map(|b| func.terminator(b))
        .find(|&t| func.dfg.insts[t].opcode() == Ir::Return)
        .unwrap();
    match &func.dfg.insts[ret] {
        InstructionData::Return { arg, .. } => {
            let arg = arg.expand().unwrap();
            assert_eq!(func.dfg.value_type(arg), Type::Ptr);
            // The pointer facet came through the rename untouched: it is
            // the rdi pointer phi, not a fresh inttoptr.
            let def = func.dfg.value_def(arg).unwrap();
            assert_eq!(func.dfg.insts[def].opcode(), Ir::Phi);
        }
        _ => unreachable!(),
    }
}

#[test]
fn one_operand_multiply_widths() {
    init_logging();

    // Width 8: the whole 16-bit product goes into AX.
    let mut module = Module::new();
    let mut decls = DeclaredFunctions::new();
    let sig = Signature::new(Type::I32).param(Type::I32).param(Type::I32);
    let id = decls.declare(&mut module, "mul8", sig, 0x1000);

    let mut lifter = FunctionLifter::new(id, 0x1000, Config::default());
    lifter.add_block(
        0x1000,
        vec![
            Inst::new(Opcode::Mul, 0x1000, 3).with_dst(Operand::reg(Reg::gp(8, 6))),
            Inst::new(Opcode::Ret, 0x1003, 1),
        ],
    );
    lifter.lift(&mut module, &decls).unwrap();
    let text = module.display_function(id).to_string();
    assert!(text.contains("imul.i16"), "{text}");

    // Width 32: the product is split across EAX and EDX.
    let mut module = Module::new();
    let mut decls = DeclaredFunctions::new();
    let sig = Signature::new(Type::I32).param(Type::I32).param(Type::I32);
    let id = decls.declare(&mut module, "mul32", sig, 0x1000);

    let mut lifter = FunctionLifter::new(id, 0x1000, Config::default());
    lifter.add_block(
        0x1000,
        vec![
            Inst::new(Opcode::Mul, 0x1000, 2).with_dst(Operand::reg(Reg::gp(32, 6))),
            Inst::new(Opcode::Ret, 0x1002, 1),
        ],
    );
    lifter.lift(&mut module, &decls).unwrap();
    let text = module.display_function(id).to_string();
    assert!(text.contains("imul.i64"), "{text}");
    // Both halves are truncated out of the wide product.
    assert!(text.matches("trunc.i32").count() >= 2, "{text}");
}
