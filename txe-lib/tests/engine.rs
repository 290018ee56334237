// BSD 2-Clause License
//
// Copyright (c) 2023, 2024 The txe developers
//
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
// 1. Redistributions of source code must retain the above copyright
// notice, this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright
// notice, this list of conditions and the following disclaimer in the
// documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! End-to-end tests driving whole programs through the engine:
//! exploration, seeding, interpolation-based subsumption, speculation,
//! and the memory error taxonomy.

use std::fs;
use std::sync::{Mutex, MutexGuard};

use txe_lib::bits::Bits;
use txe_lib::config::Config;
use txe_lib::executor::Executor;
use txe_lib::ir::{Callee, CastOp, CmpOp, Instr, IrBinOp, Module, ModuleBuilder, Operand, Reg};
use txe_lib::seeds::{KTest, KTestObject};
use txe_lib::solver::enumerate::EnumCore;
use txe_lib::speculation::{SpecStrategy, SpecType};
use txe_lib::stats;
use txe_lib::testcase::CollectingSink;

/// Engine statistics are process-global, so engine runs in this suite
/// take turns.
static ENGINE: Mutex<()> = Mutex::new(());

fn lock() -> MutexGuard<'static, ()> {
    ENGINE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn konst(value: u64, width: u32) -> Operand {
    Operand::Const(Bits::new(value, width))
}

fn run(module: &Module, config: Config, seeds: Vec<KTest>) -> CollectingSink {
    let mut executor = Executor::new(module, config, Box::new(EnumCore::new()));
    let mut sink = CollectingSink::new();
    executor.run_function_as_main("main", &[], seeds, &mut sink).expect("engine run failed");
    sink
}

fn seed(name: &str, bytes: &[u8]) -> KTest {
    KTest {
        args: Vec::new(),
        sym_argvs: 0,
        sym_argv_len: 0,
        objects: vec![KTestObject { name: name.to_string(), bytes: bytes.to_vec() }],
    }
}

/// A module whose main makes `size` bytes symbolic under `label` and
/// leaves the buffer pointer in `ptr_reg` and the first byte loaded in
/// `byte_reg` before handing over to `build_rest`.
fn byte_program(
    label: &str,
    size: u32,
    build_rest: impl FnOnce(&mut txe_lib::ir::FunctionBuilder<'_>, txe_lib::ir::BlockId, Reg, Reg),
) -> Module {
    let mut builder = ModuleBuilder::new();
    let mut name_bytes = label.as_bytes().to_vec();
    name_bytes.push(0);
    let name_len = name_bytes.len() as u32;
    let name_global = format!("{}_name", label);
    builder.global(&name_global, name_len, true, name_bytes);
    let name_sym = builder.intern(&name_global);

    let mut f = builder.function("main");
    let entry = f.block();
    let ptr = f.fresh_reg();
    let byte = f.fresh_reg();
    f.push(entry, Instr::Alloca { dest: ptr, size: konst(size as u64, 64) });
    let make_symbolic = f.module_mut().intern("se_make_symbolic");
    f.push(
        entry,
        Instr::Call {
            dest: None,
            target: Callee::Direct(make_symbolic),
            args: vec![Operand::Reg(ptr), konst(size as u64, 64), Operand::Global(name_sym)],
        },
    );
    f.push(entry, Instr::Load { dest: byte, addr: Operand::Reg(ptr), width: 8 });
    build_rest(&mut f, entry, ptr, byte);
    f.finish();
    builder.finish()
}

fn intern(f: &mut txe_lib::ir::FunctionBuilder<'_>, name: &str) -> txe_lib::ir::Name {
    f.module_mut().intern(name)
}

#[test]
fn explores_both_sides_of_symbolic_branch() {
    let _guard = lock();
    let module = byte_program("x", 1, |f, entry, _ptr, byte| {
        let cond = f.fresh_reg();
        let taken = f.block();
        let skipped = f.block();
        f.push(entry, Instr::ICmp { dest: cond, op: CmpOp::Ne, lhs: Operand::Reg(byte), rhs: konst(0, 8), width: 8 });
        f.push(entry, Instr::CondBr { cond: Operand::Reg(cond), on_true: taken, on_false: skipped });
        f.push(taken, Instr::Ret { value: None });
        f.push(skipped, Instr::Ret { value: None });
    });

    let sink = run(&module, Config::default(), Vec::new());
    let completed: Vec<_> = sink.completed().collect();
    assert_eq!(completed.len(), 2);
    // Each test's bytes drive its own path: one zero, one non-zero.
    let values: Vec<u8> = completed.iter().map(|case| case.solution[0].1[0]).collect();
    assert!(values.iter().any(|v| *v == 0));
    assert!(values.iter().any(|v| *v != 0));
    // Both solutions name the array we created.
    assert!(completed.iter().all(|case| case.solution[0].0 == "x"));
}

#[test]
fn seeded_error_path_reproduces_seed_bytes() {
    let _guard = lock();
    // assume(x[0] == 'A'); if (x[1] > x[0]) abort();
    let module = byte_program("x", 2, |f, entry, ptr, byte0| {
        let assume_cond = f.fresh_reg();
        let idx = f.fresh_reg();
        let byte1 = f.fresh_reg();
        let cmp = f.fresh_reg();
        let bad = f.block();
        let good = f.block();

        f.push(
            entry,
            Instr::ICmp { dest: assume_cond, op: CmpOp::Eq, lhs: Operand::Reg(byte0), rhs: konst(0x41, 8), width: 8 },
        );
        let assume = intern(f, "se_assume");
        f.push(entry, Instr::Call { dest: None, target: Callee::Direct(assume), args: vec![Operand::Reg(assume_cond)] });
        f.push(entry, Instr::Gep { dest: idx, base: Operand::Reg(ptr), offset: 1, indices: vec![] });
        f.push(entry, Instr::Load { dest: byte1, addr: Operand::Reg(idx), width: 8 });
        f.push(
            entry,
            Instr::ICmp { dest: cmp, op: CmpOp::Ugt, lhs: Operand::Reg(byte1), rhs: Operand::Reg(byte0), width: 8 },
        );
        f.push(entry, Instr::CondBr { cond: Operand::Reg(cmp), on_true: bad, on_false: good });
        let abort = intern(f, "abort");
        f.push(bad, Instr::Call { dest: None, target: Callee::Direct(abort), args: vec![] });
        f.push(bad, Instr::Unreachable);
        f.push(good, Instr::Ret { value: None });
    });

    let sink = run(&module, Config::default(), vec![seed("x", &[0x41, 0x42])]);
    let aborts: Vec<_> = sink.with_suffix("abort").collect();
    assert_eq!(aborts.len(), 1);
    // The seeded state drove the error path, so the test carries the
    // seed bytes and they satisfy the path condition.
    assert_eq!(aborts[0].solution[0].1, vec![0x41, 0x42]);
    // The other side completes normally too.
    assert!(sink.completed().count() >= 1);
}

#[test]
fn two_seeds_complete_two_paths_with_only_seed() {
    let _guard = lock();
    let module = byte_program("x", 1, |f, entry, _ptr, byte| {
        let cond = f.fresh_reg();
        let taken = f.block();
        let skipped = f.block();
        f.push(entry, Instr::ICmp { dest: cond, op: CmpOp::Ne, lhs: Operand::Reg(byte), rhs: konst(0, 8), width: 8 });
        f.push(entry, Instr::CondBr { cond: Operand::Reg(cond), on_true: taken, on_false: skipped });
        f.push(taken, Instr::Ret { value: None });
        f.push(skipped, Instr::Ret { value: None });
    });

    let config = Config { only_seed: true, ..Config::default() };
    let sink = run(&module, config, vec![seed("x", &[0]), seed("x", &[1])]);
    let completed: Vec<_> = sink.completed().collect();
    assert_eq!(completed.len(), 2);
    let values: Vec<u8> = completed.iter().map(|case| case.solution[0].1[0]).collect();
    assert!(values.contains(&0));
    assert!(values.contains(&1));
}

/// Diamond re-forking on the same condition at the join: once the
/// first side's subtree is fully explored and summarized, the second
/// side's states are subsumed at the re-fork points.
#[test]
fn subsumption_prunes_redundant_region() {
    let _guard = lock();
    let module = byte_program("x", 1, |f, entry, _ptr, byte| {
        let parity = f.fresh_reg();
        let parity_cond = f.fresh_reg();
        let range_cond = f.fresh_reg();
        let left = f.block();
        let right = f.block();
        let join = f.block();
        let low = f.block();
        let high = f.block();
        let done = f.block();

        f.push(entry, Instr::Binary {
            dest: parity,
            op: IrBinOp::And,
            lhs: Operand::Reg(byte),
            rhs: konst(1, 8),
            width: 8,
            overflow_trap: false,
        });
        f.push(
            entry,
            Instr::ICmp { dest: parity_cond, op: CmpOp::Ne, lhs: Operand::Reg(parity), rhs: konst(0, 8), width: 8 },
        );
        f.push(entry, Instr::CondBr { cond: Operand::Reg(parity_cond), on_true: left, on_false: right });
        f.push(left, Instr::Br { target: join });
        f.push(right, Instr::Br { target: join });
        f.push(
            join,
            Instr::ICmp { dest: range_cond, op: CmpOp::Ult, lhs: Operand::Reg(byte), rhs: konst(100, 8), width: 8 },
        );
        f.push(join, Instr::CondBr { cond: Operand::Reg(range_cond), on_true: low, on_false: high });
        f.push(low, Instr::Br { target: done });
        f.push(high, Instr::Br { target: done });
        f.push(done, Instr::Ret { value: None });
    });

    let sink = run(&module, Config::default(), Vec::new());
    // The first diamond side explores both range outcomes; the second
    // side is subsumed at both re-fork points and emits nothing.
    assert_eq!(sink.completed().count(), 2);
    assert!(stats::subsumption_hits() >= 2, "hits = {}", stats::subsumption_hits());
}

#[test]
fn no_interpolation_explores_all_paths() {
    let _guard = lock();
    let module = byte_program("x", 1, |f, entry, _ptr, byte| {
        let parity = f.fresh_reg();
        let parity_cond = f.fresh_reg();
        let range_cond = f.fresh_reg();
        let left = f.block();
        let right = f.block();
        let join = f.block();
        let low = f.block();
        let high = f.block();
        let done = f.block();

        f.push(entry, Instr::Binary {
            dest: parity,
            op: IrBinOp::And,
            lhs: Operand::Reg(byte),
            rhs: konst(1, 8),
            width: 8,
            overflow_trap: false,
        });
        f.push(
            entry,
            Instr::ICmp { dest: parity_cond, op: CmpOp::Ne, lhs: Operand::Reg(parity), rhs: konst(0, 8), width: 8 },
        );
        f.push(entry, Instr::CondBr { cond: Operand::Reg(parity_cond), on_true: left, on_false: right });
        f.push(left, Instr::Br { target: join });
        f.push(right, Instr::Br { target: join });
        f.push(
            join,
            Instr::ICmp { dest: range_cond, op: CmpOp::Ult, lhs: Operand::Reg(byte), rhs: konst(100, 8), width: 8 },
        );
        f.push(join, Instr::CondBr { cond: Operand::Reg(range_cond), on_true: low, on_false: high });
        f.push(low, Instr::Br { target: done });
        f.push(high, Instr::Br { target: done });
        f.push(done, Instr::Ret { value: None });
    });

    let config = Config { no_interpolation: true, ..Config::default() };
    let sink = run(&module, config, Vec::new());
    // Without subsumption all four path combinations complete.
    assert_eq!(sink.completed().count(), 4);
}

#[test]
fn timid_speculation_skips_independent_branch() {
    let _guard = lock();
    // The avoid set marks `x` relevant; the branch is over
    // `unused_flag`, so it is independent and TIMID takes one side
    // without forking.
    let dir = std::env::temp_dir().join(format!("txe-avoid-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("SpecAvoid_1.txt"), "1\nx\n").unwrap();

    let module = byte_program("unused_flag", 1, |f, entry, _ptr, byte| {
        let cond = f.fresh_reg();
        let dead = f.block();
        let useful = f.block();
        f.push(entry, Instr::ICmp { dest: cond, op: CmpOp::Ne, lhs: Operand::Reg(byte), rhs: konst(0, 8), width: 8 });
        f.push(entry, Instr::CondBr { cond: Operand::Reg(cond), on_true: dead, on_false: useful });
        let abort = intern(f, "abort");
        f.push(dead, Instr::Call { dest: None, target: Callee::Direct(abort), args: vec![] });
        f.push(dead, Instr::Unreachable);
        f.push(useful, Instr::Ret { value: None });
    });

    let config = Config {
        spec_type: SpecType::Coverage,
        spec_strategy: SpecStrategy::Timid,
        dependency_folder: Some(dir.clone()),
        ..Config::default()
    };
    let mut executor = Executor::new(&module, config, Box::new(EnumCore::new()));
    let mut sink = CollectingSink::new();
    executor.run_function_as_main("main", &[], Vec::new(), &mut sink).unwrap();

    // Only the else branch ran: no abort test, one completed path.
    assert_eq!(sink.with_suffix("abort").count(), 0);
    assert_eq!(sink.completed().count(), 1);
    assert!(executor.spec_stats.independence_yes >= 1);
    assert_eq!(executor.spec_stats.spec_fail, 0);
    let report = executor.spec_stats.report(SpecStrategy::Timid);
    assert!(report.contains("Total Independence Yes: 1"));
    assert!(report.contains("specFail = 0"));

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn aggressive_speculation_rolls_back_on_bug() {
    let _guard = lock();
    // Under SAFETY + AGGRESSIVE every two-sided branch opens a
    // speculation node; the speculated side hits abort, which must
    // roll back silently instead of reporting.
    let module = byte_program("flag", 1, |f, entry, _ptr, byte| {
        let cond = f.fresh_reg();
        let buggy = f.block();
        let fine = f.block();
        f.push(entry, Instr::ICmp { dest: cond, op: CmpOp::Ne, lhs: Operand::Reg(byte), rhs: konst(0, 8), width: 8 });
        f.push(entry, Instr::CondBr { cond: Operand::Reg(cond), on_true: buggy, on_false: fine });
        let abort = intern(f, "abort");
        f.push(buggy, Instr::Call { dest: None, target: Callee::Direct(abort), args: vec![] });
        f.push(buggy, Instr::Unreachable);
        f.push(fine, Instr::Ret { value: None });
    });

    let config = Config {
        spec_type: SpecType::Safety,
        spec_strategy: SpecStrategy::Aggressive,
        ..Config::default()
    };
    let mut executor = Executor::new(&module, config, Box::new(EnumCore::new()));
    let mut sink = CollectingSink::new();
    executor.run_function_as_main("main", &[], Vec::new(), &mut sink).unwrap();

    // The speculation failed but produced no error report; the kept
    // side completed.
    assert_eq!(sink.with_suffix("abort").count(), 0);
    assert_eq!(sink.completed().count(), 1);
    assert_eq!(executor.spec_stats.spec_fail, 1);
    assert!(executor.num_live_states() == 0);
}

#[test]
fn overflow_trap_emits_single_test() {
    let _guard = lock();
    // x + 1 with an unsigned wrap trap: exactly one overflow witness
    // (x = 255).
    let module = byte_program("x", 1, |f, entry, _ptr, byte| {
        let sum = f.fresh_reg();
        f.push(entry, Instr::Binary {
            dest: sum,
            op: IrBinOp::Add,
            lhs: Operand::Reg(byte),
            rhs: konst(1, 8),
            width: 8,
            overflow_trap: true,
        });
        f.push(entry, Instr::Ret { value: None });
    });

    let sink = run(&module, Config::default(), Vec::new());
    let overflows: Vec<_> = sink.with_suffix("overflow").collect();
    assert_eq!(overflows.len(), 1);
    assert_eq!(overflows[0].solution[0].1, vec![0xFF]);
    assert_eq!(sink.completed().count(), 1);
}

#[test]
fn symbolic_malloc_size_forks_and_reports_ptr() {
    let _guard = lock();
    // n in {3, 8}; p = malloc(n); p[5] = 1  -- out of bounds when n=3.
    let module = byte_program("n", 1, |f, entry, _ptr, byte| {
        let is3 = f.fresh_reg();
        let is8 = f.fresh_reg();
        let either = f.fresh_reg();
        let wide = f.fresh_reg();
        let buf = f.fresh_reg();
        let slot = f.fresh_reg();

        f.push(entry, Instr::ICmp { dest: is3, op: CmpOp::Eq, lhs: Operand::Reg(byte), rhs: konst(3, 8), width: 8 });
        f.push(entry, Instr::ICmp { dest: is8, op: CmpOp::Eq, lhs: Operand::Reg(byte), rhs: konst(8, 8), width: 8 });
        f.push(entry, Instr::Binary {
            dest: either,
            op: IrBinOp::Or,
            lhs: Operand::Reg(is3),
            rhs: Operand::Reg(is8),
            width: 1,
            overflow_trap: false,
        });
        let assume = intern(f, "se_assume");
        f.push(entry, Instr::Call { dest: None, target: Callee::Direct(assume), args: vec![Operand::Reg(either)] });
        f.push(entry, Instr::Cast { dest: wide, op: CastOp::ZExt, arg: Operand::Reg(byte), to: 64 });
        let malloc = intern(f, "malloc");
        f.push(
            entry,
            Instr::Call { dest: Some((buf, 64)), target: Callee::Direct(malloc), args: vec![Operand::Reg(wide)] },
        );
        f.push(entry, Instr::Gep { dest: slot, base: Operand::Reg(buf), offset: 5, indices: vec![] });
        f.push(entry, Instr::Store { value: konst(1, 8), addr: Operand::Reg(slot), width: 8 });
        f.push(entry, Instr::Ret { value: None });
    });

    let sink = run(&module, Config::default(), Vec::new());
    let ptrs: Vec<_> = sink.with_suffix("ptr").collect();
    assert_eq!(ptrs.len(), 1);
    assert_eq!(ptrs[0].solution[0].1, vec![3]);
    let completed: Vec<_> = sink.completed().collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].solution[0].1, vec![8]);
}

#[test]
fn zero_size_allocation_rejects_access() {
    let _guard = lock();
    let mut builder = ModuleBuilder::new();
    let mut f = builder.function("main");
    let entry = f.block();
    let buf = f.fresh_reg();
    let loaded = f.fresh_reg();
    let malloc = f.module_mut().intern("malloc");
    f.push(entry, Instr::Call { dest: Some((buf, 64)), target: Callee::Direct(malloc), args: vec![konst(0, 64)] });
    f.push(entry, Instr::Load { dest: loaded, addr: Operand::Reg(buf), width: 8 });
    f.push(entry, Instr::Ret { value: None });
    f.finish();
    let module = builder.finish();

    let sink = run(&module, Config::default(), Vec::new());
    assert_eq!(sink.with_suffix("ptr").count(), 1);
    assert_eq!(sink.completed().count(), 0);
}

#[test]
fn write_to_read_only_global_errors() {
    let _guard = lock();
    let mut builder = ModuleBuilder::new();
    let table = builder.global("table", 4, true, vec![1, 2, 3, 4]);
    let mut f = builder.function("main");
    let entry = f.block();
    f.push(entry, Instr::Store { value: konst(9, 8), addr: Operand::Global(table), width: 8 });
    f.push(entry, Instr::Ret { value: None });
    f.finish();
    let module = builder.finish();

    let sink = run(&module, Config::default(), Vec::new());
    assert_eq!(sink.with_suffix("readonly").count(), 1);
}

#[test]
fn free_of_alloca_errors() {
    let _guard = lock();
    let mut builder = ModuleBuilder::new();
    let mut f = builder.function("main");
    let entry = f.block();
    let slot = f.fresh_reg();
    f.push(entry, Instr::Alloca { dest: slot, size: konst(4, 64) });
    let free = f.module_mut().intern("free");
    f.push(entry, Instr::Call { dest: None, target: Callee::Direct(free), args: vec![Operand::Reg(slot)] });
    f.push(entry, Instr::Ret { value: None });
    f.finish();
    let module = builder.finish();

    let sink = run(&module, Config::default(), Vec::new());
    assert_eq!(sink.with_suffix("free").count(), 1);
}

#[test]
fn max_forks_caps_exploration() {
    let _guard = lock();
    // Two sequential symbolic branches would explore four paths;
    // max_forks = 1 collapses the second fork to a coin flip.
    let module = byte_program("x", 1, |f, entry, _ptr, byte| {
        let c1 = f.fresh_reg();
        let c2 = f.fresh_reg();
        let mid_t = f.block();
        let mid_f = f.block();
        let join = f.block();
        let end_t = f.block();
        let end_f = f.block();

        f.push(entry, Instr::ICmp { dest: c1, op: CmpOp::Ult, lhs: Operand::Reg(byte), rhs: konst(128, 8), width: 8 });
        f.push(entry, Instr::CondBr { cond: Operand::Reg(c1), on_true: mid_t, on_false: mid_f });
        f.push(mid_t, Instr::Br { target: join });
        f.push(mid_f, Instr::Br { target: join });
        f.push(join, Instr::Binary {
            dest: c2,
            op: IrBinOp::And,
            lhs: Operand::Reg(byte),
            rhs: konst(1, 8),
            width: 8,
            overflow_trap: false,
        });
        f.push(join, Instr::CondBr { cond: Operand::Reg(c2), on_true: end_t, on_false: end_f });
        f.push(end_t, Instr::Ret { value: None });
        f.push(end_f, Instr::Ret { value: None });
    });

    let config = Config { max_forks: Some(1), no_interpolation: true, ..Config::default() };
    let sink = run(&module, config, Vec::new());
    assert_eq!(sink.completed().count(), 2);
}

#[test]
fn switch_enumerates_feasible_cases() {
    let _guard = lock();
    let module = byte_program("x", 1, |f, entry, _ptr, byte| {
        let one = f.block();
        let two = f.block();
        let other = f.block();
        f.push(
            entry,
            Instr::Switch {
                value: Operand::Reg(byte),
                width: 8,
                default: other,
                cases: vec![(Bits::new(1, 8), one), (Bits::new(2, 8), two)],
            },
        );
        f.push(one, Instr::Ret { value: None });
        f.push(two, Instr::Ret { value: None });
        f.push(other, Instr::Ret { value: None });
    });

    let sink = run(&module, Config::default(), Vec::new());
    let completed: Vec<_> = sink.completed().collect();
    assert_eq!(completed.len(), 3);
    let mut values: Vec<u8> = completed.iter().map(|case| case.solution[0].1[0]).collect();
    values.sort_unstable();
    assert!(values.contains(&1));
    assert!(values.contains(&2));
    assert!(values.iter().any(|v| *v != 1 && *v != 2));
}

#[test]
fn phi_joins_carry_the_right_value() {
    let _guard = lock();
    // r = phi(left: 10, right: 20); assert r == 10 on the left path
    // means the false side of the assert only exists on the right
    // path.
    let module = byte_program("x", 1, |f, entry, _ptr, byte| {
        let cond = f.fresh_reg();
        let merged = f.fresh_reg();
        let check = f.fresh_reg();
        let left = f.block();
        let right = f.block();
        let join = f.block();

        f.push(entry, Instr::ICmp { dest: cond, op: CmpOp::Ne, lhs: Operand::Reg(byte), rhs: konst(0, 8), width: 8 });
        f.push(entry, Instr::CondBr { cond: Operand::Reg(cond), on_true: left, on_false: right });
        f.push(left, Instr::Br { target: join });
        f.push(right, Instr::Br { target: join });
        f.push(
            join,
            Instr::Phi { dest: merged, width: 8, incoming: vec![(left, konst(10, 8)), (right, konst(20, 8))] },
        );
        f.push(join, Instr::ICmp { dest: check, op: CmpOp::Eq, lhs: Operand::Reg(merged), rhs: konst(10, 8), width: 8 });
        let assert_fn = intern(f, "se_assert");
        f.push(join, Instr::Call { dest: None, target: Callee::Direct(assert_fn), args: vec![Operand::Reg(check)] });
        f.push(join, Instr::Ret { value: None });
    });

    let sink = run(&module, Config::default(), Vec::new());
    // The left path satisfies the assertion; the right path fails it.
    assert_eq!(sink.with_suffix("assert").count(), 1);
    assert_eq!(sink.completed().count(), 1);
}

#[test]
fn calls_push_frames_and_return_values() {
    let _guard = lock();
    let mut builder = ModuleBuilder::new();

    let mut double = builder.function("double");
    let arg = double.arg("n", 8);
    let body = double.block();
    let sum = double.fresh_reg();
    double.push(body, Instr::Binary {
        dest: sum,
        op: IrBinOp::Add,
        lhs: Operand::Reg(arg),
        rhs: Operand::Reg(arg),
        width: 8,
        overflow_trap: false,
    });
    double.push(body, Instr::Ret { value: Some(Operand::Reg(sum)) });
    double.finish();

    let mut f = builder.function("main");
    let entry = f.block();
    let result = f.fresh_reg();
    let check = f.fresh_reg();
    let double_name = f.module_mut().intern("double");
    f.push(
        entry,
        Instr::Call { dest: Some((result, 8)), target: Callee::Direct(double_name), args: vec![konst(21, 8)] },
    );
    f.push(entry, Instr::ICmp { dest: check, op: CmpOp::Eq, lhs: Operand::Reg(result), rhs: konst(42, 8), width: 8 });
    let assert_fn = f.module_mut().intern("se_assert");
    f.push(entry, Instr::Call { dest: None, target: Callee::Direct(assert_fn), args: vec![Operand::Reg(check)] });
    f.push(entry, Instr::Ret { value: None });
    f.finish();
    let module = builder.finish();

    let sink = run(&module, Config::default(), Vec::new());
    assert_eq!(sink.with_suffix("assert").count(), 0);
    assert_eq!(sink.completed().count(), 1);
}

#[test]
fn replaying_a_branch_trace_reproduces_the_test() {
    let _guard = lock();
    let build = || {
        byte_program("x", 1, |f, entry, _ptr, byte| {
            let cond = f.fresh_reg();
            let taken = f.block();
            let skipped = f.block();
            f.push(
                entry,
                Instr::ICmp { dest: cond, op: CmpOp::Ult, lhs: Operand::Reg(byte), rhs: konst(7, 8), width: 8 },
            );
            f.push(entry, Instr::CondBr { cond: Operand::Reg(cond), on_true: taken, on_false: skipped });
            f.push(taken, Instr::Ret { value: None });
            f.push(skipped, Instr::Ret { value: None });
        })
    };

    let module = build();
    let sink = run(&module, Config::default(), Vec::new());
    let original: Vec<_> = sink.completed().map(|case| (case.path.clone(), case.solution.clone())).collect();
    assert_eq!(original.len(), 2);

    for (path, solution) in original {
        let module = build();
        let mut executor = Executor::new(&module, Config::default(), Box::new(EnumCore::new()));
        executor.set_replay_path(path.clone());
        let mut sink = CollectingSink::new();
        executor.run_function_as_main("main", &[], Vec::new(), &mut sink).unwrap();
        let replayed: Vec<_> = sink.completed().collect();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].path, path);
        assert_eq!(replayed[0].solution, solution);
    }
}

#[test]
fn runs_are_deterministic() {
    let _guard = lock();
    let build = || {
        byte_program("x", 1, |f, entry, _ptr, byte| {
            let c1 = f.fresh_reg();
            let taken = f.block();
            let skipped = f.block();
            f.push(
                entry,
                Instr::ICmp { dest: c1, op: CmpOp::Ult, lhs: Operand::Reg(byte), rhs: konst(77, 8), width: 8 },
            );
            f.push(entry, Instr::CondBr { cond: Operand::Reg(c1), on_true: taken, on_false: skipped });
            f.push(taken, Instr::Ret { value: None });
            f.push(skipped, Instr::Ret { value: None });
        })
    };

    let module_a = build();
    let sink_a = run(&module_a, Config::default(), Vec::new());
    let module_b = build();
    let sink_b = run(&module_b, Config::default(), Vec::new());

    let a: Vec<_> = sink_a.cases.iter().map(|c| (c.solution.clone(), c.path.clone(), c.suffix.clone())).collect();
    let b: Vec<_> = sink_b.cases.iter().map(|c| (c.solution.clone(), c.path.clone(), c.suffix.clone())).collect();
    assert_eq!(a, b);
}

#[test]
fn trees_drain_when_the_run_finishes() {
    let _guard = lock();
    let module = byte_program("x", 1, |f, entry, _ptr, byte| {
        let cond = f.fresh_reg();
        let taken = f.block();
        let skipped = f.block();
        f.push(entry, Instr::ICmp { dest: cond, op: CmpOp::Ne, lhs: Operand::Reg(byte), rhs: konst(0, 8), width: 8 });
        f.push(entry, Instr::CondBr { cond: Operand::Reg(cond), on_true: taken, on_false: skipped });
        f.push(taken, Instr::Ret { value: None });
        f.push(skipped, Instr::Ret { value: None });
    });

    let mut executor = Executor::new(&module, Config::default(), Box::new(EnumCore::new()));
    let mut sink = CollectingSink::new();
    executor.run_function_as_main("main", &[], Vec::new(), &mut sink).unwrap();
    assert_eq!(executor.num_live_states(), 0);
    assert_eq!(executor.search_tree.num_nodes(), 0);
    assert!(executor.search_tree.root.is_none());
    assert_eq!(executor.tx_tree.num_nodes(), 0);
}
