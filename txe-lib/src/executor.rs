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

//! The symbolic interpreter: fetch, decode and dispatch over the IR,
//! driving the memory model, the fork engine, both trees, and the
//! searcher. Exactly one state is current at any time; all state
//! transitions flow through [Executor::update_states] so the searcher
//! always sees a consistent picture.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use crate::bits::Bits;
use crate::config::Config;
use crate::coverage::Coverage;
use crate::error::{EarlyTerminateReason, ExecError, TerminateReason};
use crate::expr::{ArrayId, BinOp, ExprArena, ExprRef};
use crate::ir::{
    Block, BlockId, BlockRef, Callee, CastOp, CmpOp, FBinOp, FCmpOp, FunId, Instr, IrBinOp, Module, Name, Operand,
    Reg,
};
use crate::log;
use crate::memory::{Address, MemoryManager, MemoryObject, ObjectState, Resolution};
use crate::searcher::Searcher;
use crate::seeds::{KTest, SeedInfo};
use crate::solver::{Solver, SolverCore};
use crate::speculation::{AvoidSets, SpecStats, SpecStrategy, SpecType};
use crate::state::{ExecutionState, Frame, InstrRef, StateId};
use crate::stats;
use crate::testcase::{TestCase, TestCaseSink};
use crate::tree::SearchTree;
use crate::txtree::TxTree;

mod fork;

pub use fork::StatePair;

/// Executes an external function concretely. `buffers` holds, for each
/// argument, the pointed-to object's concrete bytes when the argument
/// resolved to an object; the bridge may mutate them and the engine
/// copies the mutation back into the (concrete shadow of) memory.
pub trait ExternalDispatcher {
    fn call(
        &mut self,
        name: &str,
        args: &[Bits],
        buffers: &mut [Option<Vec<u8>>],
        ret_width: Option<u32>,
    ) -> Result<Option<Bits>, String>;
}

/// The default bridge: a small allowlist of harmless externals;
/// everything else fails the call.
pub struct DefaultExternals;

impl ExternalDispatcher for DefaultExternals {
    fn call(
        &mut self,
        name: &str,
        _args: &[Bits],
        _buffers: &mut [Option<Vec<u8>>],
        ret_width: Option<u32>,
    ) -> Result<Option<Bits>, String> {
        match name {
            "printf" | "fprintf" | "puts" => Ok(ret_width.map(|w| Bits::zeros(w))),
            "getpid" => Ok(ret_width.map(|w| Bits::new(4242, w))),
            _ => Err(format!("calling disallowed external function: {}", name)),
        }
    }
}

/// Base of the function pseudo-address range, below the heap.
const FUNCTION_ADDR_BASE: u64 = 0x1000;

/// Cap on how many targets an indirect call will materialize.
const MAX_INDIRECT_TARGETS: usize = 16;

pub struct Executor<'m> {
    pub module: &'m Module,
    pub config: Config,
    pub arena: ExprArena,
    pub solver: Solver,
    memory: MemoryManager,
    externals: Box<dyn ExternalDispatcher>,

    states: Vec<Option<ExecutionState>>,
    live: HashSet<StateId>,
    added: Vec<StateId>,
    removed: Vec<StateId>,
    /// States already torn down by a speculation back-jump; the
    /// searcher still needs to hear about them.
    spec_removed: Vec<StateId>,

    pub search_tree: SearchTree,
    pub tx_tree: TxTree,

    seed_map: BTreeMap<StateId, Vec<SeedInfo>>,
    using_seeds: bool,

    rng: StdRng,
    pub coverage: Coverage,
    pub spec_stats: SpecStats,
    avoid_sets: AvoidSets,

    /// Global variable name -> object base.
    global_addresses: HashMap<Name, Address>,
    /// Function pseudo-addresses for indirect calls, both directions.
    fn_addrs: HashMap<u64, FunId>,
    fn_addr_of: HashMap<Name, u64>,

    replay_path: Option<Vec<bool>>,
    replay_position: usize,
    replay_ktest: Option<KTest>,
    replay_ktest_position: usize,

    emitted_errors: HashSet<(InstrRef, String)>,
    pending_cases: Vec<TestCase>,

    halt: bool,
    at_memory_limit: bool,
    inhibit_forking: bool,
    start_time: Instant,
}

impl<'m> Executor<'m> {
    pub fn new(module: &'m Module, config: Config, core: Box<dyn SolverCore>) -> Self {
        stats::reset();
        let solver = if config.fork_solver { Solver::forked(core) } else { Solver::new(core) };
        let rng = StdRng::seed_from_u64(config.rng_seed);
        Executor {
            module,
            config,
            arena: ExprArena::new(),
            solver,
            memory: MemoryManager::new(),
            externals: Box::new(DefaultExternals),
            states: Vec::new(),
            live: HashSet::new(),
            added: Vec::new(),
            removed: Vec::new(),
            spec_removed: Vec::new(),
            search_tree: SearchTree::new(),
            tx_tree: TxTree::new(),
            seed_map: BTreeMap::new(),
            using_seeds: false,
            rng,
            coverage: Coverage::new(),
            spec_stats: SpecStats::new(),
            avoid_sets: AvoidSets::new(),
            global_addresses: HashMap::new(),
            fn_addrs: HashMap::new(),
            fn_addr_of: HashMap::new(),
            replay_path: None,
            replay_position: 0,
            replay_ktest: None,
            replay_ktest_position: 0,
            emitted_errors: HashSet::new(),
            pending_cases: Vec::new(),
            halt: false,
            at_memory_limit: false,
            inhibit_forking: false,
            start_time: Instant::now(),
        }
    }

    pub fn set_externals(&mut self, externals: Box<dyn ExternalDispatcher>) {
        self.externals = externals;
    }

    /// Replay a recorded branch trace; `Unknown` fork results must
    /// then agree with the recording.
    pub fn set_replay_path(&mut self, path: Vec<bool>) {
        self.replay_path = Some(path);
        self.replay_position = 0;
    }

    /// Replay a concrete test record: symbolic allocations bind the
    /// record's bytes instead of fresh arrays.
    pub fn set_replay_ktest(&mut self, ktest: KTest) {
        self.replay_ktest = Some(ktest);
        self.replay_ktest_position = 0;
    }

    pub fn num_live_states(&self) -> usize {
        self.live.len()
    }

    // ----- state table --------------------------------------------------

    fn alloc_state(&mut self, state: ExecutionState) -> StateId {
        let id = state.id;
        let slot = id.0 as usize;
        if self.states.len() <= slot {
            self.states.resize_with(slot + 1, || None);
        }
        assert!(self.states[slot].is_none());
        self.states[slot] = Some(state);
        id
    }

    fn fresh_state_id(&mut self) -> StateId {
        StateId(self.states.len() as u32)
    }

    pub fn state(&self, id: StateId) -> &ExecutionState {
        self.states[id.0 as usize].as_ref().expect("dead state")
    }

    fn state_mut(&mut self, id: StateId) -> &mut ExecutionState {
        self.states[id.0 as usize].as_mut().expect("dead state")
    }

    fn free_state(&mut self, id: StateId) {
        self.states[id.0 as usize] = None;
    }

    fn is_live(&self, id: StateId) -> bool {
        self.states.get(id.0 as usize).map(|slot| slot.is_some()).unwrap_or(false)
    }

    // ----- setup --------------------------------------------------------

    fn initialize_globals(&mut self, state: StateId) {
        for (i, _) in self.module.functions.iter().enumerate() {
            let addr = FUNCTION_ADDR_BASE + 16 * i as u64;
            let fun = FunId(i as u32);
            self.fn_addrs.insert(addr, fun);
            self.fn_addr_of.insert(self.module.functions[i].name, addr);
        }
        for global in &self.module.globals {
            let object = self.memory.allocate(global.size, false, true, Some(global.name));
            let base = object.base;
            let mut contents = ObjectState::zeroed(&mut self.arena, global.size);
            contents.overwrite_concrete(&mut self.arena, &global.init);
            contents.read_only = global.read_only;
            self.global_addresses.insert(global.name, base);
            let state = self.states[state.0 as usize].as_mut().expect("dead state");
            state.address_space.bind(object, contents);
        }
    }

    /// Create the initial state for `entry`, bind its arguments (an
    /// optional `(argc, argv)` pair), link both tree roots, and run to
    /// completion.
    pub fn run_function_as_main(
        &mut self,
        entry: &str,
        args: &[&str],
        seeds: Vec<KTest>,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        let entry_name =
            self.module.symtab.lookup(entry).ok_or_else(|| ExecError::Unbound(entry.to_string()))?;
        let fun_id =
            self.module.lookup_function(entry_name).ok_or_else(|| ExecError::Unbound(entry.to_string()))?;
        let fun = self.module.function(fun_id);
        if fun.args.len() > 2 {
            return Err(ExecError::BadIr("entry function takes at most (argc, argv)".into()));
        }

        if self.config.speculation_enabled() {
            if self.config.spec_type == SpecType::Safety && self.config.spec_strategy == SpecStrategy::Timid {
                return Err(ExecError::BadIr("timid speculation is not supported with safety".into()));
            }
            if let Some(folder) = self.config.dependency_folder.clone() {
                self.avoid_sets = crate::speculation::read_avoid_sets(&folder)?;
                let initial = crate::speculation::read_initial_visited(&folder)?;
                let blocks = initial.iter().filter_map(|order| self.module.block_for_order(*order));
                self.coverage = Coverage::with_initial(blocks);
            }
        }

        let id = self.fresh_state_id();
        let state = ExecutionState::new(id, fun_id, fun);
        self.alloc_state(state);
        self.initialize_globals(id);

        // Bind (argc, argv) when the entry expects them.
        let arg_regs: Vec<(Reg, u32)> = self.module.function(fun_id).args.clone();
        if let Some((argc_reg, argc_width)) = arg_regs.first().copied() {
            let argc = self.arena.mk_u64(args.len() as u64, argc_width);
            self.state_mut(id).frame_mut().write(argc_reg, argc);
        }
        if let Some((argv_reg, argv_width)) = arg_regs.get(1).copied() {
            let argv_base = self.build_argv(id, args);
            let argv = self.arena.mk_u64(argv_base, argv_width);
            self.state_mut(id).frame_mut().write(argv_reg, argv);
        }

        let search_root = self.search_tree.set_root(id);
        self.state_mut(id).search_node = Some(search_root);
        if self.config.interpolation_enabled() {
            let tx_root = self.tx_tree.set_root(id);
            self.state_mut(id).tx_node = Some(tx_root);
        }

        self.run(id, seeds, sink)
    }

    fn build_argv(&mut self, state: StateId, args: &[&str]) -> Address {
        let ptr_bytes = self.module.layout.pointer_width / 8;
        let argv_object = self.memory.allocate((args.len() as u32 + 1) * ptr_bytes, false, true, None);
        let argv_base = argv_object.base;
        let mut argv_contents = ObjectState::zeroed(&mut self.arena, argv_object.size);
        for (i, arg) in args.iter().enumerate() {
            let buf = self.memory.allocate(arg.len() as u32 + 1, false, true, None);
            let mut buf_contents = ObjectState::zeroed(&mut self.arena, buf.size);
            buf_contents.overwrite_concrete(&mut self.arena, arg.as_bytes());
            let base = buf.base;
            self.states[state.0 as usize]
                .as_mut()
                .expect("dead state")
                .address_space
                .bind(buf, buf_contents);
            let offset = self.arena.mk_u64((i as u32 * ptr_bytes) as u64, 64);
            let pointer = self.arena.mk_u64(base, self.module.layout.pointer_width);
            argv_contents.write(&mut self.arena, offset, pointer, self.module.layout.pointer_width);
        }
        self.states[state.0 as usize]
            .as_mut()
            .expect("dead state")
            .address_space
            .bind(argv_object, argv_contents);
        argv_base
    }

    // ----- main loop ----------------------------------------------------

    fn run(&mut self, initial: StateId, seeds: Vec<KTest>, sink: &mut dyn TestCaseSink) -> Result<(), ExecError> {
        self.live.insert(initial);
        self.start_time = Instant::now();

        if !seeds.is_empty() {
            self.using_seeds = true;
            self.seed_map.insert(initial, seeds.into_iter().map(SeedInfo::new).collect());
            self.seeding_loop(sink)?;
            if self.halt {
                self.dump_states(sink)?;
                return Ok(());
            }
            for id in self.live.clone() {
                self.state_mut(id).weight = 1.0;
            }
            if self.config.only_seed {
                self.dump_states(sink)?;
                return Ok(());
            }
        }

        let mut searcher: Box<dyn Searcher> =
            Box::new(crate::searcher::DfsSearcher::new());
        let mut initial_states: Vec<StateId> = self.live.iter().copied().collect();
        initial_states.sort();
        searcher.update(None, &initial_states, &[]);

        while !self.live.is_empty() && !self.halt {
            let current = searcher.select_state();
            self.step(current, sink)?;
            let announced = if self.is_live(current) { Some(current) } else { None };
            self.update_states(announced, &mut *searcher, sink)?;
        }
        self.dump_states_with_searcher(&mut *searcher, sink)?;
        Ok(())
    }

    /// The seeding phase: round-robin over seed-holding states until
    /// every seed has been consumed or the seed-time budget expires.
    fn seeding_loop(&mut self, sink: &mut dyn TestCaseSink) -> Result<(), ExecError> {
        let mut searcher: Box<dyn Searcher> = Box::new(crate::searcher::DfsSearcher::new());
        let initial: Vec<StateId> = self.live.iter().copied().collect();
        searcher.update(None, &initial, &[]);

        let start = Instant::now();
        let mut cursor: Option<StateId> = None;
        while !self.seed_map.is_empty() && !self.halt {
            let current = match next_seeded_state(&self.seed_map, cursor) {
                Some(id) => id,
                None => break,
            };
            cursor = Some(current);
            self.step(current, sink)?;
            let announced = if self.is_live(current) { Some(current) } else { None };
            self.update_states(announced, &mut *searcher, sink)?;

            if self.config.seed_time > 0.0 && start.elapsed().as_secs_f64() > self.config.seed_time {
                log!(log::VERBOSE, "seed time expired, continuing with partial seeding");
                break;
            }
        }
        Ok(())
    }

    /// Execute one step of `current`: block-entry bookkeeping
    /// (speculation cycle checks, coverage, subsumption), then one
    /// instruction.
    fn step(&mut self, current: StateId, sink: &mut dyn TestCaseSink) -> Result<(), ExecError> {
        let interp = self.config.interpolation_enabled();
        if self.state(current).pc.index == 0 {
            let block = self.state(current).pc.at;

            // The node's program point pins at the first basic-block
            // boundary it executes; subsumption entries anchor there.
            if interp {
                let node = self.state(current).tx_node();
                self.tx_tree.set_current(node, block);
            }

            if interp && self.config.speculation_enabled() {
                let node = self.state(current).tx_node();
                if self.tx_tree.is_speculation(node) {
                    let revisit = self.tx_tree.speculation_visit(node, block);
                    let new_block =
                        self.config.spec_type == SpecType::Coverage && !self.coverage.is_visited(block);
                    if revisit || new_block {
                        let root = self.tx_tree.speculation_root(node);
                        let root_point = self.tx_tree.program_point(root).unwrap_or(block);
                        if revisit {
                            *self.spec_stats.fail_revisited.entry(root_point).or_insert(0) += 1;
                        } else {
                            *self.spec_stats.fail_new.entry(root_point).or_insert(0) += 1;
                        }
                        self.spec_stats.spec_fail += 1;
                        self.speculative_back_jump(current);
                        return Ok(());
                    }
                }
            }

            if self.coverage.record_visit(self.module, block) {
                self.state_mut(current).covered_new = true;
            }

            if interp && !self.seed_map.contains_key(&current) {
                let node = self.state(current).tx_node();
                let constraints = self.state(current).constraints.clone();
                if self.tx_tree.subsumption_check(&mut self.arena, &mut self.solver, &constraints, node, block) {
                    log!(log::ITP, format!("state {} subsumed at {}", current.0, block));
                    self.terminate_on_subsumption(current, sink)?;
                    return Ok(());
                }
            }
        }

        let instr = self.fetch(current)?;
        let started = Instant::now();
        self.step_instruction(current);
        self.execute_instruction(current, instr, sink)?;
        if interp && self.is_live(current) {
            if let Some(node) = self.state(current).tx_node {
                self.tx_tree.execute(node, &[]);
            }
        }
        if self.config.max_instruction_time > 0.0
            && started.elapsed().as_secs_f64() > self.config.max_instruction_time
            && self.is_live(current)
        {
            self.terminate_early(current, EarlyTerminateReason::Halt, "max instruction time exceeded", sink)?;
        }
        if self.is_live(current) {
            self.check_memory_usage(sink)?;
        }
        Ok(())
    }

    fn fetch(&self, current: StateId) -> Result<Instr, ExecError> {
        let pc = self.state(current).pc;
        let block: &Block = self.module.block(pc.at);
        block
            .instrs
            .get(pc.index)
            .cloned()
            .ok_or_else(|| ExecError::BadIr(format!("pc past end of block {}", pc.at)))
    }

    fn step_instruction(&mut self, current: StateId) {
        stats::bump(&stats::INSTRUCTIONS);
        let state = self.state_mut(current);
        state.prev_pc = state.pc;
        state.pc.index += 1;
    }

    // ----- operand and value plumbing -----------------------------------

    fn eval_operand(&mut self, current: StateId, operand: Operand) -> Result<ExprRef, ExecError> {
        match operand {
            Operand::Const(bits) => Ok(self.arena.mk_const(bits)),
            Operand::Reg(reg) => self
                .state(current)
                .frame()
                .read(reg)
                .ok_or_else(|| ExecError::BadIr(format!("read of unassigned register r{}", reg.0))),
            Operand::Global(name) => {
                let base = self
                    .global_addresses
                    .get(&name)
                    .copied()
                    .ok_or_else(|| ExecError::Unbound(self.module.symtab.to_str(name).to_string()))?;
                Ok(self.arena.mk_u64(base, self.module.layout.pointer_width))
            }
            Operand::Fun(name) => {
                let addr = self
                    .fn_addr_of
                    .get(&name)
                    .copied()
                    .ok_or_else(|| ExecError::Unbound(self.module.symtab.to_str(name).to_string()))?;
                Ok(self.arena.mk_u64(addr, self.module.layout.pointer_width))
            }
        }
    }

    fn bind_local(&mut self, current: StateId, reg: Reg, value: ExprRef) {
        self.state_mut(current).frame_mut().write(reg, value);
    }

    /// A 1-bit branch condition from an operand of any width.
    fn truthy(&mut self, e: ExprRef) -> ExprRef {
        if self.arena.width(e) == 1 {
            e
        } else {
            let is_zero = self.arena.mk_is_zero(e);
            self.arena.mk_not_bool(is_zero)
        }
    }

    /// Concretize `e` under the path condition, binding the choice
    /// with a constraint so the path stays consistent.
    fn to_constant(&mut self, current: StateId, e: ExprRef, reason: &str) -> Result<Bits, ExecError> {
        if let Some(bits) = self.arena.as_const(e) {
            return Ok(bits);
        }
        let constraints = self.state(current).constraints.clone();
        let value = self.solver.get_value(&self.arena, &constraints, e)?;
        log!(
            log::VERBOSE,
            format!("silently concretizing expression to {} ({})", value, reason)
        );
        let value_expr = self.arena.mk_const(value);
        let eq = self.arena.mk_binary(BinOp::Eq, value_expr, e);
        self.add_constraint(current, eq)?;
        Ok(value)
    }

    /// Reduce `e` to a unique value if the path condition pins it,
    /// without adding constraints.
    fn to_unique(&mut self, current: StateId, e: ExprRef) -> Result<ExprRef, ExecError> {
        if self.arena.as_const(e).is_some() {
            return Ok(e);
        }
        let constraints = self.state(current).constraints.clone();
        let value = self.solver.get_value(&self.arena, &constraints, e)?;
        let value_expr = self.arena.mk_const(value);
        let eq = self.arena.mk_binary(BinOp::Eq, value_expr, e);
        if self.solver.must_be_true(&self.arena, &constraints, eq)? {
            Ok(value_expr)
        } else {
            Ok(e)
        }
    }

    // ----- instruction dispatch -----------------------------------------

    fn execute_instruction(
        &mut self,
        current: StateId,
        instr: Instr,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        match instr {
            Instr::Binary { dest, op, lhs, rhs, width, overflow_trap } => {
                self.execute_binary(current, dest, op, lhs, rhs, width, overflow_trap, sink)
            }
            Instr::ICmp { dest, op, lhs, rhs, .. } => {
                if self.config.bb_coverage >= 4 {
                    let prev = self.state(current).prev_pc;
                    self.coverage.record_icmp(prev.at, prev.index);
                }
                let lhs = self.eval_operand(current, lhs)?;
                let rhs = self.eval_operand(current, rhs)?;
                let (op, lhs, rhs) = match op {
                    CmpOp::Eq => (BinOp::Eq, lhs, rhs),
                    CmpOp::Ne => (BinOp::Ne, lhs, rhs),
                    CmpOp::Ult => (BinOp::Ult, lhs, rhs),
                    CmpOp::Ule => (BinOp::Ule, lhs, rhs),
                    CmpOp::Ugt => (BinOp::Ult, rhs, lhs),
                    CmpOp::Uge => (BinOp::Ule, rhs, lhs),
                    CmpOp::Slt => (BinOp::Slt, lhs, rhs),
                    CmpOp::Sle => (BinOp::Sle, lhs, rhs),
                    CmpOp::Sgt => (BinOp::Slt, rhs, lhs),
                    CmpOp::Sge => (BinOp::Sle, rhs, lhs),
                };
                let result = self.arena.mk_binary(op, lhs, rhs);
                self.bind_local(current, dest, result);
                self.notify_tx(current, &[result]);
                Ok(())
            }
            Instr::FBinary { dest, op, lhs, rhs, width } => {
                self.execute_fbinary(current, dest, op, lhs, rhs, width)
            }
            Instr::FCmp { dest, op, lhs, rhs, width } => self.execute_fcmp(current, dest, op, lhs, rhs, width),
            Instr::Cast { dest, op, arg, to } => {
                let arg = self.eval_operand(current, arg)?;
                let width = self.arena.width(arg);
                let result = match op {
                    CastOp::Trunc => self.arena.mk_extract(to - 1, 0, arg),
                    CastOp::ZExt => self.arena.mk_zext(arg, to),
                    CastOp::SExt => self.arena.mk_sext(arg, to),
                    CastOp::Bitcast => {
                        if width != to {
                            return Err(ExecError::BadIr("bitcast changes width".into()));
                        }
                        arg
                    }
                };
                self.bind_local(current, dest, result);
                Ok(())
            }
            Instr::Select { dest, cond, on_true, on_false, .. } => {
                let cond = self.eval_operand(current, cond)?;
                let cond = self.truthy(cond);
                let on_true = self.eval_operand(current, on_true)?;
                let on_false = self.eval_operand(current, on_false)?;
                let result = self.arena.mk_select(cond, on_true, on_false);
                self.bind_local(current, dest, result);
                self.notify_tx(current, &[result]);
                Ok(())
            }
            // Phi values were bound on block transfer.
            Instr::Phi { .. } => Ok(()),
            Instr::Alloca { dest, size } => {
                let size = self.eval_operand(current, size)?;
                self.execute_alloc(current, size, true, Some((dest, self.module.layout.pointer_width)), false, sink)
            }
            Instr::Load { dest, addr, width } => {
                let addr = self.eval_operand(current, addr)?;
                self.execute_memory_operation(current, false, addr, None, width, Some(dest), sink)
            }
            Instr::Store { value, addr, width } => {
                let value = self.eval_operand(current, value)?;
                let addr = self.eval_operand(current, addr)?;
                self.execute_memory_operation(current, true, addr, Some(value), width, None, sink)
            }
            Instr::Gep { dest, base, offset, indices } => {
                let ptr_width = self.module.layout.pointer_width;
                let mut address = self.eval_operand(current, base)?;
                if offset != 0 {
                    let offset = self.arena.mk_u64(offset, ptr_width);
                    address = self.arena.mk_binary(BinOp::Add, address, offset);
                }
                for (index, elem_size) in indices {
                    let index = self.eval_operand(current, index)?;
                    let index = if self.arena.width(index) < ptr_width {
                        self.arena.mk_sext(index, ptr_width)
                    } else {
                        index
                    };
                    let elem_size = self.arena.mk_u64(elem_size, ptr_width);
                    let scaled = self.arena.mk_binary(BinOp::Mul, index, elem_size);
                    address = self.arena.mk_binary(BinOp::Add, address, scaled);
                }
                self.bind_local(current, dest, address);
                self.notify_tx(current, &[address]);
                Ok(())
            }
            Instr::Call { dest, target, args } => self.execute_call(current, dest, target, args, sink),
            Instr::Ret { value } => self.execute_ret(current, value, sink),
            Instr::Br { target } => {
                self.transfer_to_block(current, target)?;
                Ok(())
            }
            Instr::CondBr { cond, on_true, on_false } => {
                let cond = self.eval_operand(current, cond)?;
                let cond = self.truthy(cond);
                let StatePair { on_true: true_state, on_false: false_state } =
                    self.branch_fork(current, cond, sink)?;
                if let Some(id) = true_state {
                    self.transfer_to_block(id, on_true)?;
                }
                if let Some(id) = false_state {
                    self.transfer_to_block(id, on_false)?;
                }
                Ok(())
            }
            Instr::Switch { value, width, default, cases } => {
                self.execute_switch(current, value, width, default, cases, sink)
            }
            Instr::Unreachable => {
                self.terminate_on_error(
                    current,
                    TerminateReason::Exec,
                    "reached \"unreachable\" instruction",
                    None,
                    sink,
                )?;
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_binary(
        &mut self,
        current: StateId,
        dest: Reg,
        op: IrBinOp,
        lhs: Operand,
        rhs: Operand,
        width: u32,
        overflow_trap: bool,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        let lhs = self.eval_operand(current, lhs)?;
        let rhs = self.eval_operand(current, rhs)?;

        // Division and remainder trap on a zero divisor; the state
        // forks so the zero case is reported with a witness.
        if matches!(op, IrBinOp::UDiv | IrBinOp::SDiv | IrBinOp::URem | IrBinOp::SRem) {
            let zero_divisor = self.arena.mk_is_zero(rhs);
            let StatePair { on_true: zero_state, on_false: ok_state } =
                self.fork_internal(current, zero_divisor, sink)?;
            if let Some(id) = zero_state {
                self.terminate_on_error(id, TerminateReason::Overflow, "divide by zero", None, sink)?;
            }
            let current = match ok_state {
                Some(id) => id,
                None => return Ok(()),
            };
            let result = self.arena.mk_binary(bin_op(op), lhs, rhs);
            self.bind_local(current, dest, result);
            self.notify_tx(current, &[result]);
            return Ok(());
        }

        if overflow_trap {
            if let Some(trap_cond) = self.overflow_predicate(op, lhs, rhs, width) {
                let StatePair { on_true: trap_state, on_false: ok_state } =
                    self.fork_internal(current, trap_cond, sink)?;
                if let Some(id) = trap_state {
                    self.terminate_on_error(
                        id,
                        TerminateReason::Overflow,
                        "arithmetic overflow",
                        None,
                        sink,
                    )?;
                }
                let current = match ok_state {
                    Some(id) => id,
                    None => return Ok(()),
                };
                let result = self.arena.mk_binary(bin_op(op), lhs, rhs);
                self.bind_local(current, dest, result);
                self.notify_tx(current, &[result]);
                return Ok(());
            }
        }

        let result = self.arena.mk_binary(bin_op(op), lhs, rhs);
        self.bind_local(current, dest, result);
        self.notify_tx(current, &[result]);
        Ok(())
    }

    /// The unsigned wrap predicate for trapping arithmetic: `a + b <
    /// a` for addition, `a - b > a` for subtraction, and a widening
    /// check for multiplication.
    fn overflow_predicate(&mut self, op: IrBinOp, lhs: ExprRef, rhs: ExprRef, width: u32) -> Option<ExprRef> {
        match op {
            IrBinOp::Add => {
                let sum = self.arena.mk_binary(BinOp::Add, lhs, rhs);
                Some(self.arena.mk_binary(BinOp::Ult, sum, lhs))
            }
            IrBinOp::Sub => {
                let difference = self.arena.mk_binary(BinOp::Sub, lhs, rhs);
                Some(self.arena.mk_binary(BinOp::Ult, lhs, difference))
            }
            IrBinOp::Mul if 2 * width <= 64 => {
                let wide_l = self.arena.mk_zext(lhs, 2 * width);
                let wide_r = self.arena.mk_zext(rhs, 2 * width);
                let wide = self.arena.mk_binary(BinOp::Mul, wide_l, wide_r);
                let limit = self.arena.mk_const(Bits::ones(width).zero_extend(2 * width));
                Some(self.arena.mk_binary(BinOp::Ult, limit, wide))
            }
            _ => None,
        }
    }

    fn execute_fbinary(
        &mut self,
        current: StateId,
        dest: Reg,
        op: FBinOp,
        lhs: Operand,
        rhs: Operand,
        width: u32,
    ) -> Result<(), ExecError> {
        let lhs = self.eval_operand(current, lhs)?;
        let rhs = self.eval_operand(current, rhs)?;
        let lhs = self.to_constant(current, lhs, "floating point")?;
        let rhs = self.to_constant(current, rhs, "floating point")?;
        let result = match width {
            32 => {
                let (a, b) = (f32::from_bits(lhs.lower_u64() as u32), f32::from_bits(rhs.lower_u64() as u32));
                let r = match op {
                    FBinOp::FAdd => a + b,
                    FBinOp::FSub => a - b,
                    FBinOp::FMul => a * b,
                    FBinOp::FDiv => a / b,
                };
                Bits::new(r.to_bits() as u64, 32)
            }
            64 => {
                let (a, b) = (f64::from_bits(lhs.lower_u64()), f64::from_bits(rhs.lower_u64()));
                let r = match op {
                    FBinOp::FAdd => a + b,
                    FBinOp::FSub => a - b,
                    FBinOp::FMul => a * b,
                    FBinOp::FDiv => a / b,
                };
                Bits::new(r.to_bits(), 64)
            }
            _ => return Err(ExecError::Unsupported("floating point width")),
        };
        let result = self.arena.mk_const(result);
        self.bind_local(current, dest, result);
        Ok(())
    }

    fn execute_fcmp(
        &mut self,
        current: StateId,
        dest: Reg,
        op: FCmpOp,
        lhs: Operand,
        rhs: Operand,
        width: u32,
    ) -> Result<(), ExecError> {
        let lhs = self.eval_operand(current, lhs)?;
        let rhs = self.eval_operand(current, rhs)?;
        let lhs = self.to_constant(current, lhs, "floating point")?;
        let rhs = self.to_constant(current, rhs, "floating point")?;
        let (a, b) = match width {
            32 => (f32::from_bits(lhs.lower_u64() as u32) as f64, f32::from_bits(rhs.lower_u64() as u32) as f64),
            64 => (f64::from_bits(lhs.lower_u64()), f64::from_bits(rhs.lower_u64())),
            _ => return Err(ExecError::Unsupported("floating point width")),
        };
        let result = match op {
            FCmpOp::OEq => a == b,
            FCmpOp::ONe => a != b,
            FCmpOp::OLt => a < b,
            FCmpOp::OLe => a <= b,
            FCmpOp::OGt => a > b,
            FCmpOp::OGe => a >= b,
        };
        let result = self.arena.mk_bool(result);
        self.bind_local(current, dest, result);
        Ok(())
    }

    fn execute_switch(
        &mut self,
        current: StateId,
        value: Operand,
        width: u32,
        default: BlockId,
        cases: Vec<(Bits, BlockId)>,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        let value = self.eval_operand(current, value)?;
        if let Some(concrete) = self.arena.as_const(value) {
            let target =
                cases.iter().find(|(bits, _)| *bits == concrete).map(|(_, b)| *b).unwrap_or(default);
            return self.transfer_to_block(current, target);
        }

        // Enumerate feasible cases; the default's predicate is the
        // negated disjunction of all case values. Infeasible cases
        // feed their unsat core to the interpolant.
        let constraints = self.state(current).constraints.clone();
        let mut conditions = Vec::new();
        let mut targets = Vec::new();
        let mut default_cond = self.arena.mk_bool(true);
        for (bits, target) in &cases {
            debug_assert_eq!(bits.len(), width);
            let case_value = self.arena.mk_const(*bits);
            let cond = self.arena.mk_binary(BinOp::Eq, value, case_value);
            let not_cond = self.arena.mk_not_bool(cond);
            default_cond = self.arena.mk_and_bool(default_cond, not_cond);
            let (possible, unsat_core) = self.solver.may_be_true(&self.arena, &constraints, cond)?;
            if possible {
                conditions.push(cond);
                targets.push(*target);
            } else if self.config.interpolation_enabled() {
                let node = self.state(current).tx_node();
                self.tx_tree.mark_path_condition(node, &unsat_core);
            }
        }
        let (default_possible, default_core) =
            self.solver.may_be_true(&self.arena, &constraints, default_cond)?;
        if default_possible {
            conditions.push(default_cond);
            targets.push(default);
        } else if self.config.interpolation_enabled() {
            let node = self.state(current).tx_node();
            self.tx_tree.mark_path_condition(node, &default_core);
        }

        let successors = self.branch(current, &conditions, sink)?;
        for (state, target) in successors.into_iter().zip(targets) {
            if let Some(id) = state {
                self.transfer_to_block(id, target)?;
            }
        }
        Ok(())
    }

    fn transfer_to_block(&mut self, current: StateId, target: BlockId) -> Result<(), ExecError> {
        let from = self.state(current).pc.at.block;
        let fun = self.state(current).pc.at.fun;
        let target_ref = BlockRef { fun, block: target };

        // Phi nodes evaluate in parallel against the pre-transfer
        // register file.
        let module: &'m Module = self.module;
        let block = module.block(target_ref);
        let mut pending: Vec<(Reg, ExprRef)> = Vec::new();
        for instr in &block.instrs {
            if let Instr::Phi { dest, incoming, .. } = instr {
                let operand = incoming
                    .iter()
                    .find(|(pred, _)| *pred == from)
                    .map(|(_, op)| *op)
                    .ok_or_else(|| ExecError::BadIr(format!("phi has no incoming edge from b{}", from.0)))?;
                let value = self.eval_operand(current, operand)?;
                pending.push((*dest, value));
            } else {
                break;
            }
        }
        for (reg, value) in pending {
            self.bind_local(current, reg, value);
        }

        let state = self.state_mut(current);
        state.incoming_block = Some(from);
        state.pc = InstrRef { at: target_ref, index: 0 };
        Ok(())
    }

    fn execute_ret(
        &mut self,
        current: StateId,
        value: Option<Operand>,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        let result = match value {
            Some(operand) => Some(self.eval_operand(current, operand)?),
            None => None,
        };

        // Reclaim this frame's allocas.
        let allocas = self.state(current).frame().allocas.clone();
        let varargs = self.state(current).frame().varargs;
        for base in allocas.into_iter().chain(varargs) {
            self.state_mut(current).address_space.unbind(base);
        }

        if self.state(current).stack.len() == 1 {
            self.terminate_on_exit(current, sink)?;
            return Ok(());
        }

        let frame = self.state_mut(current).stack.pop().expect("checked above");
        let caller = frame.caller.expect("non-entry frame has a caller");
        let module: &'m Module = self.module;
        let caller_block = module.block(caller.at);
        if let Instr::Call { dest: Some((reg, width)), .. } = &caller_block.instrs[caller.index] {
            let result = result.ok_or_else(|| ExecError::BadIr("void return into a value call".into()))?;
            if self.arena.width(result) != *width {
                return Err(ExecError::BadIr("return width mismatch".into()));
            }
            self.bind_local(current, *reg, result);
        }
        let state = self.state_mut(current);
        state.pc = InstrRef { at: caller.at, index: caller.index + 1 };
        state.incoming_block = None;
        Ok(())
    }

    // ----- calls --------------------------------------------------------

    fn execute_call(
        &mut self,
        current: StateId,
        dest: Option<(Reg, u32)>,
        target: Callee,
        args: Vec<Operand>,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        let mut arg_values = Vec::with_capacity(args.len());
        for arg in &args {
            arg_values.push(self.eval_operand(current, *arg)?);
        }

        match target {
            Callee::Direct(name) => self.call_function(current, dest, name, arg_values, sink),
            Callee::Indirect(operand) => {
                let addr = self.eval_operand(current, operand)?;
                self.call_indirect(current, dest, addr, arg_values, sink)
            }
        }
    }

    /// Calls through symbolic function pointers materialize one
    /// concrete target per fork until the pointer is exhausted.
    fn call_indirect(
        &mut self,
        current: StateId,
        dest: Option<(Reg, u32)>,
        addr: ExprRef,
        args: Vec<ExprRef>,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        let mut unbound = current;
        for _ in 0..MAX_INDIRECT_TARGETS {
            let constraints = self.state(unbound).constraints.clone();
            let value = match self.solver.get_value(&self.arena, &constraints, addr) {
                Ok(value) => value,
                Err(_) => {
                    self.terminate_on_error(
                        unbound,
                        TerminateReason::Exec,
                        "unable to resolve symbolic function pointer",
                        None,
                        sink,
                    )?;
                    return Ok(());
                }
            };
            let value_expr = self.arena.mk_const(value);
            let hit = self.arena.mk_binary(BinOp::Eq, addr, value_expr);
            let StatePair { on_true: bound, on_false: next_unbound } = self.fork_internal(unbound, hit, sink)?;
            if let Some(bound) = bound {
                match self.fn_addrs.get(&value.lower_u64()).copied() {
                    Some(fun) => {
                        let name = self.module.function(fun).name;
                        self.call_function(bound, dest, name, args.clone(), sink)?;
                    }
                    None => {
                        self.terminate_on_error(
                            bound,
                            TerminateReason::Exec,
                            "indirect call to invalid function pointer",
                            None,
                            sink,
                        )?;
                    }
                }
            }
            unbound = match next_unbound {
                Some(id) => id,
                None => return Ok(()),
            };
        }
        self.terminate_on_error(
            unbound,
            TerminateReason::Exec,
            "too many targets for symbolic function pointer",
            None,
            sink,
        )?;
        Ok(())
    }

    fn call_function(
        &mut self,
        current: StateId,
        dest: Option<(Reg, u32)>,
        name: Name,
        args: Vec<ExprRef>,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        if self.execute_intrinsic(current, dest, name, &args, sink)? {
            return Ok(());
        }

        let module: &'m Module = self.module;
        let fun_id = match module.lookup_function(name) {
            Some(fun_id) => fun_id,
            None => {
                return self.call_external(current, dest, name, args, sink);
            }
        };
        let fun = module.function(fun_id);
        if fun.is_declaration {
            return self.call_external(current, dest, name, args, sink);
        }
        if args.len() < fun.args.len() {
            self.terminate_on_error(
                current,
                TerminateReason::User,
                "calling function with too few arguments",
                None,
                sink,
            )?;
            return Ok(());
        }

        let caller = self.state(current).prev_pc;
        let mut frame = Frame::new(fun_id, fun, Some(caller));
        for ((reg, width), value) in fun.args.iter().zip(&args) {
            if self.arena.width(*value) != *width {
                return Err(ExecError::BadIr("argument width mismatch".into()));
            }
            frame.regs[reg.0 as usize] = Some(*value);
        }
        let fixed = fun.args.len();
        let is_vararg = fun.is_vararg;
        self.state_mut(current).stack.push(frame);

        // Extra arguments pack into a fresh varargs object, 8-byte
        // slots in argument order.
        if is_vararg && args.len() > fixed {
            let extras = &args[fixed..];
            let object = self.memory.allocate(extras.len() as u32 * 8, true, false, None);
            let base = object.base;
            let mut contents = ObjectState::zeroed(&mut self.arena, object.size);
            for (i, value) in extras.iter().enumerate() {
                let padded = if self.arena.width(*value) < 64 { self.arena.mk_zext(*value, 64) } else { *value };
                let offset = self.arena.mk_u64(i as u64 * 8, 64);
                contents.write(&mut self.arena, offset, padded, 64);
            }
            let state = self.state_mut(current);
            state.address_space.bind(object, contents);
            state.frame_mut().varargs = Some(base);
        }

        let state = self.state_mut(current);
        state.pc = InstrRef::entry_of(fun_id);
        state.incoming_block = None;
        Ok(())
    }

    fn call_external(
        &mut self,
        current: StateId,
        dest: Option<(Reg, u32)>,
        name: Name,
        args: Vec<ExprRef>,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        // External functions execute concretely: symbolic arguments
        // are pinned to a model value first.
        let mut concrete_args = Vec::with_capacity(args.len());
        for arg in &args {
            concrete_args.push(self.to_constant(current, *arg, "external call")?);
        }

        // Marshal pointed-to objects in and out of the call.
        let mut buffers: Vec<Option<Vec<u8>>> = Vec::with_capacity(args.len());
        let mut buffer_objects: Vec<Option<Address>> = Vec::with_capacity(args.len());
        for value in &concrete_args {
            let base = self.state(current).address_space.resolve_concrete(value.lower_u64());
            match base {
                Some(base) => {
                    let (_, contents) = self.state(current).address_space.get(base).expect("resolved object");
                    buffers.push(contents.concrete_bytes(&self.arena));
                    buffer_objects.push(Some(base));
                }
                None => {
                    buffers.push(None);
                    buffer_objects.push(None);
                }
            }
        }
        let before = buffers.clone();

        let name_str = self.module.symtab.to_str(name).to_string();
        let result = self.externals.call(&name_str, &concrete_args, &mut buffers, dest.map(|(_, w)| w));
        match result {
            Ok(result) => {
                for ((mutated, original), base) in buffers.iter().zip(before.iter()).zip(buffer_objects.iter()) {
                    let (Some(mutated), Some(base)) = (mutated, base) else { continue };
                    if Some(mutated) == original.as_ref() {
                        continue;
                    }
                    let read_only =
                        self.state(current).address_space.get(*base).map(|(mo, os)| os.read_only || mo.is_fixed);
                    if read_only == Some(true) {
                        self.terminate_on_error(
                            current,
                            TerminateReason::External,
                            "external modified read-only object",
                            None,
                            sink,
                        )?;
                        return Ok(());
                    }
                    let mutated = mutated.clone();
                    let arena = &mut self.arena;
                    let state = self.states[current.0 as usize].as_mut().expect("dead state");
                    if let Some(contents) = state.address_space.get_writeable(*base) {
                        contents.overwrite_concrete(arena, &mutated);
                    }
                }
                if let Some((reg, width)) = dest {
                    let value = result.ok_or_else(|| ExecError::BadIr("external returned no value".into()))?;
                    if value.len() != width {
                        return Err(ExecError::BadIr("external return width mismatch".into()));
                    }
                    let value = self.arena.mk_const(value);
                    self.bind_local(current, reg, value);
                }
                Ok(())
            }
            Err(message) => {
                self.terminate_on_error(current, TerminateReason::External, &message, None, sink)?;
                Ok(())
            }
        }
    }

    /// The instrumentation API and the memory intrinsics. Returns true
    /// when `name` was handled.
    fn execute_intrinsic(
        &mut self,
        current: StateId,
        dest: Option<(Reg, u32)>,
        name: Name,
        args: &[ExprRef],
        sink: &mut dyn TestCaseSink,
    ) -> Result<bool, ExecError> {
        let name_str = self.module.symtab.to_str(name);
        let wants = |n: usize| args.len() >= n;
        match name_str {
            name if matches!(name, "se_assume" | "se_assert" | "free" | "se_va_arg" | "malloc") && !wants(1) => {
                self.terminate_on_error(
                    current,
                    TerminateReason::User,
                    "missing argument to instrumentation call",
                    None,
                    sink,
                )?;
                Ok(true)
            }
            "calloc" if !wants(2) => {
                self.terminate_on_error(
                    current,
                    TerminateReason::User,
                    "missing argument to instrumentation call",
                    None,
                    sink,
                )?;
                Ok(true)
            }
            "se_make_symbolic" => {
                if args.len() != 3 {
                    self.terminate_on_error(
                        current,
                        TerminateReason::User,
                        "se_make_symbolic expects (ptr, size, name)",
                        None,
                        sink,
                    )?;
                    return Ok(true);
                }
                let ptr = self.to_constant(current, args[0], "make_symbolic pointer")?;
                let size = self.to_constant(current, args[1], "make_symbolic size")?;
                let name_ptr = self.to_constant(current, args[2], "make_symbolic name")?;
                let label = self.read_string(current, name_ptr.lower_u64())?;
                let base = match self.state(current).address_space.resolve_concrete(ptr.lower_u64()) {
                    Some(base) => base,
                    None => {
                        self.terminate_on_error(
                            current,
                            TerminateReason::User,
                            "se_make_symbolic on invalid pointer",
                            None,
                            sink,
                        )?;
                        return Ok(true);
                    }
                };
                let object_size = self.state(current).address_space.get(base).map(|(mo, _)| mo.size).unwrap();
                if size.lower_u64() != object_size as u64 {
                    self.terminate_on_error(
                        current,
                        TerminateReason::User,
                        "wrong size given to se_make_symbolic",
                        None,
                        sink,
                    )?;
                    return Ok(true);
                }
                self.execute_make_symbolic(current, base, &label, sink)?;
                Ok(true)
            }
            "se_assume" => {
                let cond = self.truthy(args[0]);
                let constraints = self.state(current).constraints.clone();
                let negated = self.arena.mk_not_bool(cond);
                if self.solver.must_be_true(&self.arena, &constraints, negated)? {
                    self.terminate_on_error(
                        current,
                        TerminateReason::User,
                        "invalid se_assume call (provably false)",
                        None,
                        sink,
                    )?;
                } else {
                    self.add_constraint(current, cond)?;
                }
                Ok(true)
            }
            "se_assert" => {
                let cond = self.truthy(args[0]);
                let StatePair { on_true: ok, on_false: failing } = self.fork_internal(current, cond, sink)?;
                if let Some(id) = failing {
                    self.terminate_on_error(id, TerminateReason::Assert, "assertion failed", None, sink)?;
                }
                let _ = ok;
                Ok(true)
            }
            "abort" => {
                self.terminate_on_error(current, TerminateReason::Abort, "abort failure", None, sink)?;
                Ok(true)
            }
            "se_report_error" => {
                self.terminate_on_error(current, TerminateReason::ReportError, "error reported", None, sink)?;
                Ok(true)
            }
            "exit" | "se_silent_exit" => {
                if name_str == "exit" {
                    self.terminate_on_exit(current, sink)?;
                } else {
                    self.terminate_state(current, sink)?;
                }
                Ok(true)
            }
            "malloc" | "calloc" => {
                let zero_memory = name_str == "calloc";
                let size = if zero_memory {
                    let count = args[0];
                    self.arena.mk_binary(BinOp::Mul, count, args[1])
                } else {
                    args[0]
                };
                self.execute_alloc(current, size, false, dest, zero_memory, sink)?;
                Ok(true)
            }
            "free" => {
                self.execute_free(current, args[0], sink)?;
                Ok(true)
            }
            "se_va_arg" => {
                let (reg, width) = dest.ok_or_else(|| ExecError::BadIr("se_va_arg needs a destination".into()))?;
                let index = self.to_constant(current, args[0], "va_arg index")?;
                let base = self
                    .state(current)
                    .frame()
                    .varargs
                    .ok_or_else(|| ExecError::BadIr("se_va_arg outside a varargs frame".into()))?;
                let addr = self.arena.mk_u64(base + index.lower_u64() * 8, 64);
                self.execute_memory_operation(current, false, addr, None, width, Some(reg), sink)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Read a NUL-terminated concrete string out of memory.
    fn read_string(&mut self, current: StateId, addr: u64) -> Result<String, ExecError> {
        let base = self
            .state(current)
            .address_space
            .resolve_concrete(addr)
            .ok_or_else(|| ExecError::BadIr("string pointer outside any object".into()))?;
        let (object, contents) = self.state(current).address_space.get(base).expect("resolved object");
        let start = (addr - object.base) as u32;
        let mut bytes = Vec::new();
        for i in start..object.size {
            let byte = self
                .arena
                .as_const(contents.read8(i))
                .ok_or_else(|| ExecError::BadIr("symbolic byte in string".into()))?;
            if byte.is_zero() {
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.push(byte.lower_u8());
        }
        Err(ExecError::BadIr("unterminated string in memory".into()))
    }

    // ----- memory operations --------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn execute_alloc(
        &mut self,
        current: StateId,
        size: ExprRef,
        is_local: bool,
        dest: Option<(Reg, u32)>,
        zero_memory: bool,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        let size = self.to_unique(current, size)?;
        if let Some(concrete) = self.arena.as_const(size) {
            let var = self.alloc_site_var(current);
            let object = self.memory.allocate(concrete.lower_u64() as u32, is_local, false, var);
            let base = object.base;
            let contents = if zero_memory {
                ObjectState::zeroed(&mut self.arena, object.size)
            } else {
                ObjectState::uninitialized(&mut self.arena, object.size)
            };
            let state = self.state_mut(current);
            state.address_space.bind(object, contents);
            if is_local {
                state.frame_mut().allocas.push(base);
            }
            if let Some((reg, width)) = dest {
                let pointer = self.arena.mk_u64(base, width);
                self.bind_local(current, reg, pointer);
                self.notify_tx(current, &[pointer, size]);
            }
            return Ok(());
        }

        // Symbolic size: concretize to a small example; if the size
        // can only take that one value, allocate it, otherwise also
        // consider the "huge allocation fails" side.
        let constraints = self.state(current).constraints.clone();
        let mut example = self.solver.get_value(&self.arena, &constraints, size)?;
        let width = example.len();
        // Try to start with a small example.
        while example.lower_u64() > 128 {
            let smaller = example.lshr(Bits::new(1, width));
            let smaller_expr = self.arena.mk_const(smaller);
            let eq = self.arena.mk_binary(BinOp::Eq, smaller_expr, size);
            let (possible, _) = self.solver.may_be_true(&self.arena, &constraints, eq)?;
            if !possible {
                break;
            }
            example = smaller;
        }

        let example_expr = self.arena.mk_const(example);
        let fixed = self.arena.mk_binary(BinOp::Eq, example_expr, size);
        let StatePair { on_true: fixed_state, on_false: unbound_state } =
            self.fork_internal(current, fixed, sink)?;

        if let Some(unbound) = unbound_state {
            let constraints = self.state(unbound).constraints.clone();
            let other = self.solver.get_value(&self.arena, &constraints, size)?;
            let other_expr = self.arena.mk_const(other);
            let pinned = self.arena.mk_binary(BinOp::Eq, other_expr, size);
            if self.solver.must_be_true(&self.arena, &constraints, pinned)? {
                // Exactly two values; allocate the second directly.
                self.execute_alloc(unbound, other_expr, is_local, dest, zero_memory, sink)?;
            } else {
                let huge_value = if width >= 32 { 1u64 << 31 } else { 1u64 << (width - 1) };
                let huge = self.arena.mk_u64(huge_value, width);
                let huge_cond = self.arena.mk_binary(BinOp::Ult, huge, size);
                let StatePair { on_true: huge_state, on_false: residual } =
                    self.fork_internal(unbound, huge_cond, sink)?;
                if let Some(huge_state) = huge_state {
                    log!(log::MEMORY, "found huge malloc, returning null");
                    if let Some((reg, width)) = dest {
                        let null = self.arena.mk_u64(0, width);
                        self.bind_local(huge_state, reg, null);
                        self.notify_tx(huge_state, &[null]);
                    }
                }
                if let Some(residual) = residual {
                    self.terminate_on_error(
                        residual,
                        TerminateReason::Model,
                        "concretized symbolic size",
                        Some(&format!("size concretization: {}", example)),
                        sink,
                    )?;
                }
            }
        }

        if let Some(fixed_state) = fixed_state {
            let example_expr = self.arena.mk_const(example);
            self.execute_alloc(fixed_state, example_expr, is_local, dest, zero_memory, sink)?;
        }
        Ok(())
    }

    fn alloc_site_var(&self, current: StateId) -> Option<Name> {
        // An alloca in the entry block of a function names the
        // source variable of the corresponding argument position,
        // mirroring how front ends lower parameters.
        let state = self.state(current);
        let fun = self.module.function(state.pc.at.fun);
        let index = state.frame().allocas.len();
        fun.arg_vars.get(index).copied()
    }

    fn execute_free(
        &mut self,
        current: StateId,
        address: ExprRef,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        let is_null = self.arena.mk_is_zero(address);
        let StatePair { on_true: null_state, on_false: nonnull } = self.fork_internal(current, is_null, sink)?;
        let _ = null_state; // free(NULL) is a no-op
        let Some(current) = nonnull else { return Ok(()) };

        let constraints = self.state(current).constraints.clone();
        let space = self.state(current).address_space.clone();
        let candidates = space.resolve(&mut self.arena, &mut self.solver, &constraints, address)?;
        let mut unbound = current;
        for base in candidates {
            let base_expr = self.arena.mk_u64(base, self.arena.width(address));
            let exact = self.arena.mk_binary(BinOp::Eq, address, base_expr);
            let StatePair { on_true: bound, on_false: next_unbound } = self.fork_internal(unbound, exact, sink)?;
            if let Some(bound) = bound {
                let (is_local, is_global) = {
                    let (object, _) = self.state(bound).address_space.get(base).expect("resolved object");
                    (object.is_local, object.is_global)
                };
                if is_local {
                    self.terminate_on_error(bound, TerminateReason::Free, "free of alloca", None, sink)?;
                } else if is_global {
                    self.terminate_on_error(bound, TerminateReason::Free, "free of global", None, sink)?;
                } else {
                    self.state_mut(bound).address_space.unbind(base);
                }
            }
            unbound = match next_unbound {
                Some(id) => id,
                None => return Ok(()),
            };
        }
        self.terminate_on_error(
            unbound,
            TerminateReason::Ptr,
            "memory error: invalid pointer: free",
            None,
            sink,
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_memory_operation(
        &mut self,
        current: StateId,
        is_write: bool,
        address: ExprRef,
        value: Option<ExprRef>,
        width: u32,
        dest: Option<Reg>,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        let bytes = width / 8;
        let address = {
            let constraints = self.state(current).constraints.clone();
            constraints.simplify_expr(&mut self.arena, address)
        };

        // Fast path: unique resolution plus a provable bounds check.
        let constraints = self.state(current).constraints.clone();
        let space = self.state(current).address_space.clone();
        let resolution =
            space.resolve_one(&mut self.arena, &mut self.solver, &constraints, address, bytes);
        let resolution = match resolution {
            Ok(resolution) => resolution,
            Err(ExecError::Timeout) | Err(ExecError::SolverFailure(_)) => {
                self.roll_back_pc(current);
                self.terminate_early(current, EarlyTerminateReason::QueryTimeout, "query timed out (resolve)", sink)?;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        if let Resolution::One(base) = resolution {
            let object = self.state(current).address_space.get(base).map(|(mo, _)| mo.clone()).unwrap();
            let offset = object.offset_expr(&mut self.arena, address);
            let bounds = object.bounds_check_offset(&mut self.arena, offset, bytes);
            let in_bounds = match self.solver.must_be_true(&self.arena, &constraints, bounds) {
                Ok(in_bounds) => in_bounds,
                Err(ExecError::Timeout) | Err(ExecError::SolverFailure(_)) => {
                    self.roll_back_pc(current);
                    self.terminate_early(
                        current,
                        EarlyTerminateReason::QueryTimeout,
                        "query timed out (bounds check)",
                        sink,
                    )?;
                    return Ok(());
                }
                Err(err) => return Err(err),
            };
            if in_bounds {
                self.finish_memory_access(current, base, offset, is_write, value, width, dest, sink)?;
                return Ok(());
            }
        }

        // Error path: enumerate candidates, forking one successor per
        // object; the residual state holds an out-of-bounds pointer.
        let candidates = space.resolve(&mut self.arena, &mut self.solver, &constraints, address)?;
        let mut unbound = current;
        for base in candidates {
            let object = self.state(unbound).address_space.get(base).map(|(mo, _)| mo.clone());
            let Some(object) = object else { continue };
            let in_bounds = object.bounds_check_pointer(&mut self.arena, address, bytes);
            let StatePair { on_true: bound, on_false: next_unbound } =
                self.fork_internal(unbound, in_bounds, sink)?;
            if let Some(bound) = bound {
                let offset = object.offset_expr(&mut self.arena, address);
                self.finish_memory_access(bound, base, offset, is_write, value, width, dest, sink)?;
            }
            unbound = match next_unbound {
                Some(id) => id,
                None => return Ok(()),
            };
        }

        if self.config.interpolation_enabled() {
            let node = self.state(unbound).tx_node();
            let constraints = self.state(unbound).constraints.clone();
            self.tx_tree.memory_bound_violation_interpolation(
                &self.arena,
                node,
                &constraints,
                address,
                self.config.exact_address_interpolant,
            );
        }
        self.terminate_on_error(
            unbound,
            TerminateReason::Ptr,
            "memory error: out of bound pointer",
            Some(&format!("address: {}", self.arena.pretty(address))),
            sink,
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_memory_access(
        &mut self,
        current: StateId,
        base: Address,
        offset: ExprRef,
        is_write: bool,
        value: Option<ExprRef>,
        width: u32,
        dest: Option<Reg>,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        if is_write {
            let value = value.expect("write carries a value");
            let read_only = self.state(current).address_space.get(base).map(|(_, os)| os.read_only);
            if read_only == Some(true) {
                self.terminate_on_error(
                    current,
                    TerminateReason::ReadOnly,
                    "memory error: object read only",
                    None,
                    sink,
                )?;
                return Ok(());
            }
            let arena = &mut self.arena;
            let state = self.states[current.0 as usize].as_mut().expect("dead state");
            let contents = state.address_space.get_writeable(base).expect("bound object");
            contents.write(arena, offset, value, width);
            self.notify_tx(current, &[value, offset]);
        } else {
            let contents = self.state(current).address_space.get(base).map(|(_, os)| os.clone()).unwrap();
            let result = contents.read(&mut self.arena, offset, width);
            if let Some(reg) = dest {
                self.bind_local(current, reg, result);
            }
            self.notify_tx(current, &[result, offset]);
        }
        Ok(())
    }

    fn notify_tx(&mut self, current: StateId, values: &[ExprRef]) {
        if !self.config.interpolation_enabled() || !self.is_live(current) {
            return;
        }
        let Some(node) = self.state(current).tx_node else { return };
        let mut arrays: Vec<ArrayId> = Vec::new();
        for value in values {
            self.arena.collect_arrays(*value, &mut arrays);
        }
        self.tx_tree.execute(node, &arrays);
    }

    // ----- make_symbolic ------------------------------------------------

    pub fn execute_make_symbolic(
        &mut self,
        current: StateId,
        base: Address,
        label: &str,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        let size = self.state(current).address_space.get(base).map(|(mo, _)| mo.size).expect("bound object");

        if let Some(ktest) = self.replay_ktest.clone() {
            // Replay: write the recorded bytes concretely.
            if self.replay_ktest_position >= ktest.objects.len() {
                self.terminate_on_error(current, TerminateReason::User, "replay count mismatch", None, sink)?;
                return Ok(());
            }
            let object = &ktest.objects[self.replay_ktest_position];
            self.replay_ktest_position += 1;
            if object.bytes.len() != size as usize {
                self.terminate_on_error(current, TerminateReason::User, "replay size mismatch", None, sink)?;
                return Ok(());
            }
            let bytes = object.bytes.clone();
            let arena = &mut self.arena;
            let state = self.states[current.0 as usize].as_mut().expect("dead state");
            let contents = state.address_space.get_writeable(base).expect("bound object");
            contents.overwrite_concrete(arena, &bytes);
            return Ok(());
        }

        let unique = self.state_mut(current).unique_array_name(label);
        let array = self.arena.mk_array(&unique, size);
        {
            let arena = &mut self.arena;
            let state = self.states[current.0 as usize].as_mut().expect("dead state");
            let contents = state.address_space.get_writeable(base).expect("bound object");
            contents.make_symbolic(arena, array);
            state.symbolics.push((base, array));
        }

        // In seed mode every seed must produce a binding for the new
        // array.
        let named = self.config.named_seed_matching;
        if let Some(mut seeds) = self.seed_map.remove(&current) {
            let mut failed: Option<&'static str> = None;
            for seed in seeds.iter_mut() {
                match seed.next_input(&unique, named) {
                    None => {
                        if self.config.zero_seed_extension {
                            seed.bind(array, vec![0; size as usize]);
                        } else if !self.config.allow_seed_extension {
                            failed = Some("ran out of inputs during seeding");
                            break;
                        } else {
                            seed.bind(array, Vec::new());
                        }
                    }
                    Some(object) => {
                        let given = object.bytes.len();
                        let wanted = size as usize;
                        let extension_ok =
                            self.config.allow_seed_extension || self.config.zero_seed_extension;
                        if given != wanted
                            && ((given < wanted && !extension_ok)
                                || (given > wanted && !self.config.allow_seed_truncation))
                        {
                            failed = Some("seed size mismatch");
                            break;
                        }
                        let mut bytes = object.bytes.clone();
                        bytes.truncate(wanted);
                        if self.config.zero_seed_extension {
                            bytes.resize(wanted, 0);
                        }
                        seed.bind(array, bytes);
                    }
                }
            }
            self.seed_map.insert(current, seeds);
            if let Some(message) = failed {
                self.terminate_on_error(current, TerminateReason::User, message, None, sink)?;
            }
        }
        Ok(())
    }

    // ----- termination --------------------------------------------------

    fn roll_back_pc(&mut self, current: StateId) {
        let state = self.state_mut(current);
        state.pc = state.prev_pc;
    }

    /// The concrete input assignment for a state: one byte vector per
    /// symbolic object, in creation order.
    pub fn get_symbolic_solution(&mut self, current: StateId) -> Result<Vec<(String, Vec<u8>)>, ExecError> {
        let symbolics = self.state(current).symbolics.clone();
        let arrays: Vec<ArrayId> = symbolics.iter().map(|(_, array)| *array).collect();
        let constraints = self.state(current).constraints.clone();

        // Seeded states prefer their seed's patched assignment.
        if let Some(seeds) = self.seed_map.get(&current) {
            if let Some(seed) = seeds.first() {
                let mut solution = Vec::new();
                for (_, array) in &symbolics {
                    let info = self.arena.array_info(*array);
                    let bytes = seed
                        .binding(*array)
                        .map(|b| b.to_vec())
                        .unwrap_or_else(|| vec![0; info.size as usize]);
                    solution.push((info.name.clone(), bytes));
                }
                return Ok(solution);
            }
        }

        let values = self.solver.get_initial_values(&self.arena, &constraints, &arrays)?;
        Ok(arrays
            .iter()
            .zip(values)
            .map(|(array, bytes)| (self.arena.array_info(*array).name.clone(), bytes))
            .collect())
    }

    fn emit_test_case(
        &mut self,
        current: StateId,
        message: Option<String>,
        suffix: Option<String>,
    ) -> Result<(), ExecError> {
        let solution = match self.get_symbolic_solution(current) {
            Ok(solution) => solution,
            Err(err) => {
                log!(log::VERBOSE, format!("unable to get symbolic solution: {}", err));
                Vec::new()
            }
        };
        let path = self.state(current).path.clone();
        self.pending_cases.push(TestCase { solution, path, message, suffix });
        Ok(())
    }

    /// Remove a state from the engine. States that never reached the
    /// searcher are deleted immediately; the rest go through the
    /// removed queue so the searcher hears about them.
    fn terminate_state(&mut self, current: StateId, _sink: &mut dyn TestCaseSink) -> Result<(), ExecError> {
        if let Some(ktest) = &self.replay_ktest {
            if self.replay_ktest_position != ktest.objects.len() {
                log!(log::VERBOSE, "replay did not consume all objects in test input");
            }
        }
        if let Some(position) = self.added.iter().position(|id| *id == current) {
            self.added.remove(position);
            self.seed_map.remove(&current);
            let search_node = self.state(current).search_node();
            self.search_tree.remove(search_node);
            if self.config.interpolation_enabled() {
                let tx_node = self.state(current).tx_node();
                self.tx_tree.remove(&mut self.arena, tx_node);
            }
            self.live.remove(&current);
            self.free_state(current);
        } else {
            self.roll_back_pc(current);
            self.removed.push(current);
        }
        Ok(())
    }

    fn terminate_on_subsumption(&mut self, current: StateId, sink: &mut dyn TestCaseSink) -> Result<(), ExecError> {
        assert!(self.config.interpolation_enabled());
        if self.config.subsumed_test {
            self.emit_test_case(current, None, Some("early".to_string()))?;
        }
        self.terminate_state(current, sink)
    }

    fn terminate_early(
        &mut self,
        current: StateId,
        reason: EarlyTerminateReason,
        message: &str,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        if self.config.interpolation_enabled() {
            let node = self.state(current).tx_node();
            self.tx_tree.set_generic_early_termination(node);
        }
        self.emit_test_case(current, Some(format!("{} ({})", message, reason)), Some("early".to_string()))?;
        self.terminate_state(current, sink)
    }

    fn terminate_on_exit(&mut self, current: StateId, sink: &mut dyn TestCaseSink) -> Result<(), ExecError> {
        self.emit_test_case(current, None, None)?;
        self.terminate_state(current, sink)
    }

    pub(crate) fn terminate_on_error(
        &mut self,
        current: StateId,
        reason: TerminateReason,
        message: &str,
        info: Option<&str>,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        // A bug inside a speculation subtree is not an error of the
        // program: the speculation was unsound, roll it back.
        if self.config.speculation_enabled() && self.config.spec_strategy != SpecStrategy::Timid {
            let node = self.state(current).tx_node();
            if self.tx_tree.is_speculation(node) {
                self.spec_stats.spec_fail += 1;
                log!(log::SPEC, format!("speculation failed: {}", message));
                self.speculative_back_jump(current);
                return Ok(());
            }
        }

        if self.config.interpolation_enabled() {
            let node = self.state(current).tx_node();
            // Assertion failures and pointer errors carry usable
            // interpolants; other errors leave the subtree incomplete.
            if !matches!(reason, TerminateReason::Assert | TerminateReason::Ptr) {
                self.tx_tree.set_generic_early_termination(node);
            } else if self.config.wp_interpolant {
                let constraints: Vec<ExprRef> = self.state(current).constraints.iter().collect();
                self.tx_tree.mark_path_condition(node, &constraints);
            }
        }

        let error_site = self.state(current).prev_pc;
        let first_occurrence = self.emitted_errors.insert((error_site, message.to_string()));
        if self.config.emit_all_errors || first_occurrence {
            let mut body = format!("Error: {}\n", message);
            if let Some(info) = info {
                body.push_str(&format!("Info: {}\n", info));
            }
            self.emit_test_case(current, Some(body), Some(reason.suffix().to_string()))?;
        } else {
            log!(log::VERBOSE, "now ignoring this error at this location");
        }
        self.terminate_state(current, sink)
    }

    // ----- bookkeeping --------------------------------------------------

    fn update_states(
        &mut self,
        current: Option<StateId>,
        searcher: &mut dyn Searcher,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        let added = std::mem::take(&mut self.added);
        let removed = std::mem::take(&mut self.removed);
        let spec_removed = std::mem::take(&mut self.spec_removed);
        let mut announce_removed = removed.clone();
        announce_removed.extend(spec_removed);
        searcher.update(current, &added, &announce_removed);
        self.live.extend(added.iter().copied());
        for id in removed {
            assert!(self.live.remove(&id), "removing unknown state");
            self.seed_map.remove(&id);
            let search_node = self.state(id).search_node();
            self.search_tree.remove(search_node);
            if self.config.interpolation_enabled() {
                let tx_node = self.state(id).tx_node();
                self.tx_tree.remove(&mut self.arena, tx_node);
            }
            self.free_state(id);
        }
        for case in std::mem::take(&mut self.pending_cases) {
            sink.process_test_case(case)?;
        }
        Ok(())
    }

    fn check_memory_usage(&mut self, sink: &mut dyn TestCaseSink) -> Result<(), ExecError> {
        if self.config.max_memory == 0 || stats::instructions() & 0xFFF != 0 {
            return Ok(());
        }
        let mbs = self.estimated_memory_mb();
        if mbs > self.config.max_memory {
            if mbs > self.config.max_memory + 100 {
                let live: Vec<StateId> = {
                    let mut ids: Vec<StateId> = self.live.iter().copied().collect();
                    ids.sort();
                    ids
                };
                let count = live.len();
                let target = count.saturating_sub(count * self.config.max_memory as usize / mbs as usize).max(1);
                log!(log::MEMORY, format!("killing {} states (over memory cap)", target));
                let mut arr = live;
                let mut killed = 0;
                while killed < target && !arr.is_empty() {
                    let mut index = self.rng.gen_range(0..arr.len());
                    // Two pulls, trying not to hit a state that
                    // covered new code.
                    if self.state(arr[index]).covered_new {
                        index = self.rng.gen_range(0..arr.len());
                    }
                    let victim = arr.swap_remove(index);
                    self.terminate_early(victim, EarlyTerminateReason::MemoryCap, "memory limit exceeded", sink)?;
                    killed += 1;
                }
            }
            self.at_memory_limit = true;
        } else {
            self.at_memory_limit = false;
        }
        Ok(())
    }

    /// A coarse but deterministic stand-in for process memory usage:
    /// object bytes plus expression nodes.
    fn estimated_memory_mb(&self) -> u64 {
        let mut bytes: u64 = 0;
        for id in &self.live {
            let state = self.state(*id);
            bytes += state.address_space.iter().map(|(mo, _)| mo.size as u64 + 64).sum::<u64>();
            bytes += state.constraints.len() as u64 * 32;
        }
        bytes >> 20
    }

    fn dump_states(&mut self, sink: &mut dyn TestCaseSink) -> Result<(), ExecError> {
        if !self.config.dump_states_on_halt || self.live.is_empty() {
            return Ok(());
        }
        log!(log::VERBOSE, "halting execution, dumping remaining states");
        for id in {
            let mut ids: Vec<StateId> = self.live.iter().copied().collect();
            ids.sort();
            ids
        } {
            if self.is_live(id) {
                self.step_instruction(id);
                self.terminate_early(id, EarlyTerminateReason::Halt, "execution halting", sink)?;
            }
        }
        // Flush terminations that went through the removed queue.
        let mut noop = crate::searcher::DfsSearcher::new();
        self.update_states(None, &mut noop, sink)?;
        Ok(())
    }

    fn dump_states_with_searcher(
        &mut self,
        searcher: &mut dyn Searcher,
        sink: &mut dyn TestCaseSink,
    ) -> Result<(), ExecError> {
        if !self.config.dump_states_on_halt || self.live.is_empty() {
            return Ok(());
        }
        for id in {
            let mut ids: Vec<StateId> = self.live.iter().copied().collect();
            ids.sort();
            ids
        } {
            if self.is_live(id) {
                self.step_instruction(id);
                self.terminate_early(id, EarlyTerminateReason::Halt, "execution halting", sink)?;
            }
        }
        self.update_states(None, searcher, sink)?;
        Ok(())
    }
}

fn bin_op(op: IrBinOp) -> BinOp {
    match op {
        IrBinOp::Add => BinOp::Add,
        IrBinOp::Sub => BinOp::Sub,
        IrBinOp::Mul => BinOp::Mul,
        IrBinOp::UDiv => BinOp::UDiv,
        IrBinOp::SDiv => BinOp::SDiv,
        IrBinOp::URem => BinOp::URem,
        IrBinOp::SRem => BinOp::SRem,
        IrBinOp::Shl => BinOp::Shl,
        IrBinOp::LShr => BinOp::LShr,
        IrBinOp::AShr => BinOp::AShr,
        IrBinOp::And => BinOp::And,
        IrBinOp::Or => BinOp::Or,
        IrBinOp::Xor => BinOp::Xor,
    }
}

/// The next state holding seeds after `cursor`, wrapping around.
fn next_seeded_state(seed_map: &BTreeMap<StateId, Vec<SeedInfo>>, cursor: Option<StateId>) -> Option<StateId> {
    if seed_map.is_empty() {
        return None;
    }
    match cursor {
        Some(last) => seed_map
            .range((std::ops::Bound::Excluded(last), std::ops::Bound::Unbounded))
            .next()
            .map(|(id, _)| *id)
            .or_else(|| seed_map.keys().next().copied()),
        None => seed_map.keys().next().copied(),
    }
}
