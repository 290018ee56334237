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

//! The fork engine: one canonical pipeline for every way a state can
//! split on a boolean condition, parameterized by whether the fork
//! came from a guest branch (which records path bits, participates in
//! replay, and is eligible for speculation) or from engine internals
//! (memory resolution, guards, size concretization).
//!
//! The speculation decision follows one table over `(SpecType,
//! SpecStrategy)`: TIMID only consults the avoid-set independence
//! test; AGGRESSIVE opens a speculation node whenever the test fails
//! (or unconditionally under SAFETY); CUSTOM re-checks per-branch
//! whether the visited-block count changed since the last attempt.
//! Branches whose condition is a literal constant never speculate:
//! speculating over a side the algebra already discharged only costs
//! time.

use super::*;
use crate::speculation;
use crate::solver::Validity;
use crate::txtree::SpecBranchId;

/// Result of a fork: the successor following the true side and the
/// successor following the false side, either of which may be gone.
#[derive(Copy, Clone, Debug, Default)]
pub struct StatePair {
    pub on_true: Option<StateId>,
    pub on_false: Option<StateId>,
}

impl StatePair {
    fn one_sided(taken: bool, id: StateId) -> Self {
        if taken {
            StatePair { on_true: Some(id), on_false: None }
        } else {
            StatePair { on_true: None, on_false: Some(id) }
        }
    }

    fn neither() -> Self {
        StatePair::default()
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum ForkKind {
    /// A guest conditional branch.
    Branch,
    /// An engine-internal case split.
    Internal,
}

/// What the speculation table decided for a conclusive fork result.
enum SpecDecision {
    /// No speculation; take the one-sided result.
    Proceed { mark: bool },
    /// Open a speculation node for the infeasible side.
    Open { store_core: bool },
}

/// What the table decided for an unknown (two-sided) result.
enum UnknownSpecDecision {
    /// Fork both sides as usual.
    Split,
    /// Skip the true side outright; no recovery possible (TIMID).
    Skip,
    /// Keep the false side, parking the true side under a speculation
    /// node so a back-jump can recover it.
    Open,
}

impl<'m> Executor<'m> {
    pub(crate) fn fork_internal(
        &mut self,
        current: StateId,
        condition: ExprRef,
        sink: &mut dyn TestCaseSink,
    ) -> Result<StatePair, ExecError> {
        self.fork_pipeline(current, condition, ForkKind::Internal, sink)
    }

    /// Fork on a guest branch condition. Inside a speculation subtree
    /// (under AGGRESSIVE or CUSTOM) the reduced speculation pipeline
    /// runs instead, and its cost is accounted to the subtree.
    pub(crate) fn branch_fork(
        &mut self,
        current: StateId,
        condition: ExprRef,
        sink: &mut dyn TestCaseSink,
    ) -> Result<StatePair, ExecError> {
        if self.config.speculation_enabled() && self.config.spec_strategy != SpecStrategy::Timid {
            let node = self.state(current).tx_node();
            if self.tx_tree.is_speculation(node) {
                let started = Instant::now();
                let result = self.speculation_fork(current, condition, sink);
                self.tx_tree.add_spec_time(node, started.elapsed());
                return result;
            }
        }
        self.fork_pipeline(current, condition, ForkKind::Branch, sink)
    }

    fn fork_pipeline(
        &mut self,
        current: StateId,
        condition: ExprRef,
        kind: ForkKind,
        sink: &mut dyn TestCaseSink,
    ) -> Result<StatePair, ExecError> {
        let mut condition = condition;
        let seeding = self.seed_map.contains_key(&current);

        // Seeding can blow up on pathological fan-out; once the static
        // fork/solve budgets are exceeded the condition is pinned to a
        // concrete model value instead of forking.
        let budgets_active = self.config.max_static_fork_pct < 1.0
            || self.config.max_static_solve_pct < 1.0
            || self.config.max_static_cpfork_pct < 1.0
            || self.config.max_static_cpsolve_pct < 1.0;
        if seeding
            && self.arena.as_const(condition).is_none()
            && budgets_active
            && self.start_time.elapsed().as_secs() > 60
        {
            let value = self.to_constant(current, condition, "static fork budget")?;
            condition = self.arena.mk_const(value);
        }

        // Query the solver, scaling the timeout by the number of seeds
        // carried.
        let timeout = self.config.solver_timeout().map(|t| {
            if seeding {
                t * self.seed_map.get(&current).map(|s| s.len().max(1) as u32).unwrap_or(1)
            } else {
                t
            }
        });
        self.solver.set_timeout(timeout);
        let constraints = self.state(current).constraints.clone();
        let outcome = self.solver.evaluate(&self.arena, &constraints, condition);
        self.solver.set_timeout(self.config.solver_timeout());

        let (mut res, unsat_core) = match outcome {
            Ok(result) => result,
            Err(ExecError::Timeout) | Err(ExecError::SolverFailure(_)) => {
                self.roll_back_pc(current);
                self.terminate_early(current, EarlyTerminateReason::QueryTimeout, "query timed out (fork)", sink)?;
                return Ok(StatePair::neither());
            }
            Err(err) => return Err(err),
        };

        if !seeding {
            if self.replay_path.is_some() && kind == ForkKind::Branch {
                res = self.replay_direction(current, condition, res)?;
            } else if res == Validity::Unknown && self.forking_inhibited(current) {
                log!(log::FORK, "skipping fork (forking inhibited)");
                let started = Instant::now();
                let taken = self.rng.gen::<bool>();
                let constraint =
                    if taken { condition } else { self.arena.mk_not_bool(condition) };
                self.add_constraint(current, constraint)?;
                res = if taken { Validity::True } else { Validity::False };
                stats::add_micros(&stats::FORK_TIME_MICROS, started.elapsed().as_micros() as u64);
            }
        }

        // With OnlyReplaySeeds (or forking disabled) an unknown result
        // is fixed to whichever side the seeds actually cover.
        if seeding
            && (self.state(current).fork_disabled || self.config.only_replay_seeds)
            && res == Validity::Unknown
        {
            let (mut true_seed, mut false_seed) = (false, false);
            if let Some(seeds) = self.seed_map.get(&current) {
                for seed in seeds {
                    if seed.evaluate(&self.arena, condition).map(|b| b.is_true()).unwrap_or(false) {
                        true_seed = true;
                    } else {
                        false_seed = true;
                    }
                    if true_seed && false_seed {
                        break;
                    }
                }
            }
            if !(true_seed && false_seed) {
                assert!(true_seed || false_seed);
                let constraint =
                    if true_seed { condition } else { self.arena.mk_not_bool(condition) };
                self.add_constraint(current, constraint)?;
                res = if true_seed { Validity::True } else { Validity::False };
            }
        }

        // Conclusive results on guest branches consult the speculation
        // table before committing to the one-sided answer.
        if kind == ForkKind::Branch
            && self.config.speculation_enabled()
            && !seeding
            && self.replay_path.is_none()
            && self.arena.as_const(condition).is_none()
        {
            match res {
                Validity::True | Validity::False => {
                    let taken = res == Validity::True;
                    let branch = SpecBranchId {
                        at: self.state(current).prev_pc.at,
                        instr: self.state(current).prev_pc.index,
                    };
                    let point = self.state(current).prev_pc.at;
                    match self.speculation_decision(current, condition, branch, point)? {
                        SpecDecision::Proceed { mark } => {
                            if mark && self.config.interpolation_enabled() {
                                let node = self.state(current).tx_node();
                                self.tx_tree.mark_path_condition(node, &unsat_core);
                            }
                            self.record_path_bit(current, kind, taken);
                            let constraint =
                                if taken { condition } else { self.arena.mk_not_bool(condition) };
                            self.add_constraint(current, constraint)?;
                            return Ok(StatePair::one_sided(taken, current));
                        }
                        SpecDecision::Open { store_core } => {
                            let node = self.state(current).tx_node();
                            if store_core {
                                self.tx_tree.store_speculation_unsat_core(node, &unsat_core, branch);
                            } else {
                                self.tx_tree.set_second_check(node, branch);
                            }
                            return self.add_speculation_node(current, condition, taken, sink);
                        }
                    }
                }
                Validity::Unknown => {
                    let branch = SpecBranchId {
                        at: self.state(current).prev_pc.at,
                        instr: self.state(current).prev_pc.index,
                    };
                    let point = self.state(current).prev_pc.at;
                    match self.unknown_speculation_decision(condition, branch, point)? {
                        UnknownSpecDecision::Split => (),
                        UnknownSpecDecision::Skip => {
                            self.record_path_bit(current, kind, false);
                            let negated = self.arena.mk_not_bool(condition);
                            self.add_constraint(current, negated)?;
                            return Ok(StatePair::one_sided(false, current));
                        }
                        UnknownSpecDecision::Open => {
                            let node = self.state(current).tx_node();
                            self.tx_tree.set_second_check(node, branch);
                            return self.add_speculation_node(current, condition, false, sink);
                        }
                    }
                }
            }
        }

        match res {
            Validity::True => {
                self.record_path_bit(current, kind, true);
                if self.config.interpolation_enabled() {
                    // The unsat core of the falsity proof of the other
                    // branch becomes part of the interpolant here.
                    let node = self.state(current).tx_node();
                    self.tx_tree.mark_path_condition(node, &unsat_core);
                }
                self.add_constraint(current, condition)?;
                Ok(StatePair::one_sided(true, current))
            }
            Validity::False => {
                self.record_path_bit(current, kind, false);
                if self.config.interpolation_enabled() {
                    let node = self.state(current).tx_node();
                    self.tx_tree.mark_path_condition(node, &unsat_core);
                }
                let negated = self.arena.mk_not_bool(condition);
                self.add_constraint(current, negated)?;
                Ok(StatePair::one_sided(false, current))
            }
            Validity::Unknown => self.split_state(current, condition, kind, sink),
        }
    }

    fn replay_direction(
        &mut self,
        current: StateId,
        condition: ExprRef,
        res: Validity,
    ) -> Result<Validity, ExecError> {
        let path = self.replay_path.as_ref().expect("checked by caller");
        if self.replay_position >= path.len() {
            return Err(ExecError::Unreachable("ran out of branches in replay path mode".into()));
        }
        let recorded = path[self.replay_position];
        self.replay_position += 1;
        match res {
            Validity::True if !recorded => {
                Err(ExecError::Unreachable("hit invalid branch in replay path mode".into()))
            }
            Validity::False if recorded => {
                Err(ExecError::Unreachable("hit invalid branch in replay path mode".into()))
            }
            Validity::Unknown => {
                let constraint =
                    if recorded { condition } else { self.arena.mk_not_bool(condition) };
                self.add_constraint(current, constraint)?;
                Ok(if recorded { Validity::True } else { Validity::False })
            }
            conclusive => Ok(conclusive),
        }
    }

    fn forking_inhibited(&self, current: StateId) -> bool {
        (self.config.max_memory_inhibit && self.at_memory_limit)
            || self.state(current).fork_disabled
            || self.inhibit_forking
            || self.config.max_forks.map(|max| stats::forks() >= max).unwrap_or(false)
    }

    fn record_path_bit(&mut self, current: StateId, kind: ForkKind, taken: bool) {
        if kind == ForkKind::Branch {
            self.state_mut(current).path.push(taken);
        }
    }

    /// An unknown result splits the state: the clone takes the false
    /// side while `current` continues as the true side (swapped under
    /// `randomize_fork`), the two trees split in lockstep, and the
    /// parent's seeds are re-routed to whichever side they satisfy.
    fn split_state(
        &mut self,
        current: StateId,
        condition: ExprRef,
        kind: ForkKind,
        sink: &mut dyn TestCaseSink,
    ) -> Result<StatePair, ExecError> {
        let started = Instant::now();
        stats::bump(&stats::FORKS);

        {
            let state = self.state_mut(current);
            state.depth += 1;
            state.weight *= 0.5;
            state.forks += 1;
        }
        let clone_id = self.fresh_state_id();
        let clone = self.state(current).branch(clone_id);
        self.alloc_state(clone);
        self.added.push(clone_id);

        let (true_id, false_id) = if self.config.randomize_fork && self.rng.gen::<bool>() {
            (clone_id, current)
        } else {
            (current, clone_id)
        };

        // Seed re-routing: each seed follows the branch it satisfies;
        // a seed satisfying neither is patched toward a random side.
        if let Some(seeds) = self.seed_map.remove(&current) {
            let mut true_seeds = Vec::new();
            let mut false_seeds = Vec::new();
            for seed in seeds {
                let holds = seed.evaluate(&self.arena, condition).map(|b| b.is_true()).unwrap_or(false);
                if holds {
                    true_seeds.push(seed);
                } else {
                    false_seeds.push(seed);
                }
            }
            let mut swap_covered = false;
            if true_seeds.is_empty() && true_id == current {
                swap_covered = true;
            }
            if false_seeds.is_empty() && false_id == current {
                swap_covered = true;
            }
            if swap_covered {
                let covered_true = self.state(true_id).covered_new;
                let covered_false = self.state(false_id).covered_new;
                self.state_mut(true_id).covered_new = covered_false;
                self.state_mut(false_id).covered_new = covered_true;
            }
            if !true_seeds.is_empty() {
                self.seed_map.insert(true_id, true_seeds);
            }
            if !false_seeds.is_empty() {
                self.seed_map.insert(false_id, false_seeds);
            }
        }

        // Lockstep split of the search tree and the interpolation
        // tree: the old leaf's payload clears and the two fresh leaves
        // adopt the successors.
        let search_node = self.state(current).search_node();
        let (left, right) = self.search_tree.split(search_node, false_id, true_id);
        self.state_mut(false_id).search_node = Some(left);
        self.state_mut(true_id).search_node = Some(right);

        if self.config.interpolation_enabled() {
            let tx_node = self.state(current).tx_node();
            let snapshot: Vec<ExprRef> = self.state(current).constraints.iter().collect();
            let (tx_left, tx_right) = self.tx_tree.split(tx_node, false_id, true_id, &snapshot);
            self.state_mut(false_id).tx_node = Some(tx_left);
            self.state_mut(true_id).tx_node = Some(tx_right);
        }

        self.record_path_bit(true_id, kind, true);
        self.record_path_bit(false_id, kind, false);

        self.add_constraint(true_id, condition)?;
        let negated = self.arena.mk_not_bool(condition);
        self.add_constraint(false_id, negated)?;

        // Kill seed-less successors when seeds are mandatory.
        let mut pair = StatePair { on_true: Some(true_id), on_false: Some(false_id) };
        if self.using_seeds && self.config.only_replay_seeds {
            if !self.seed_map.contains_key(&true_id) {
                self.terminate_state(true_id, sink)?;
                pair.on_true = None;
            }
            if pair.on_false.is_some() && !self.seed_map.contains_key(&false_id) {
                self.terminate_state(false_id, sink)?;
                pair.on_false = None;
            }
        }

        if let Some(max_depth) = self.config.max_depth {
            if self.state_exceeds_depth(pair.on_true, max_depth) || self.state_exceeds_depth(pair.on_false, max_depth)
            {
                if let Some(id) = pair.on_true {
                    self.terminate_early(id, EarlyTerminateReason::MaxDepth, "max-depth exceeded", sink)?;
                }
                if let Some(id) = pair.on_false {
                    self.terminate_early(id, EarlyTerminateReason::MaxDepth, "max-depth exceeded", sink)?;
                }
                stats::add_micros(&stats::FORK_TIME_MICROS, started.elapsed().as_micros() as u64);
                return Ok(StatePair::neither());
            }
        }

        stats::add_micros(&stats::FORK_TIME_MICROS, started.elapsed().as_micros() as u64);
        Ok(pair)
    }

    fn state_exceeds_depth(&self, id: Option<StateId>, max_depth: u32) -> bool {
        id.map(|id| self.state(id).depth >= max_depth).unwrap_or(false)
    }

    /// The n-ary fork used for switch dispatch and symbolic-address
    /// resolution. The disjunction of `conditions` is implied by the
    /// path condition by construction.
    pub(crate) fn branch(
        &mut self,
        current: StateId,
        conditions: &[ExprRef],
        sink: &mut dyn TestCaseSink,
    ) -> Result<Vec<Option<StateId>>, ExecError> {
        let started = Instant::now();
        let n = conditions.len();
        assert!(n > 0);
        let mut result: Vec<Option<StateId>> = Vec::with_capacity(n);

        if self.config.max_forks.map(|max| stats::forks() >= max).unwrap_or(false) {
            let chosen = self.rng.gen_range(0..n);
            for i in 0..n {
                result.push(if i == chosen { Some(current) } else { None });
            }
        } else {
            for _ in 0..(n as u64 - 1) {
                stats::bump(&stats::FORKS);
            }
            result.push(Some(current));
            for i in 1..n {
                let parent = result[self.rng.gen_range(0..i)].expect("parents are live");
                let clone_id = self.fresh_state_id();
                let clone = self.state(parent).branch(clone_id);
                self.alloc_state(clone);
                self.added.push(clone_id);
                result.push(Some(clone_id));

                let search_node = self.state(parent).search_node();
                let (left, right) = self.search_tree.split(search_node, clone_id, parent);
                self.state_mut(clone_id).search_node = Some(left);
                self.state_mut(parent).search_node = Some(right);

                if self.config.interpolation_enabled() {
                    let tx_node = self.state(parent).tx_node();
                    let snapshot: Vec<ExprRef> = self.state(parent).constraints.iter().collect();
                    let (tx_left, tx_right) = self.tx_tree.split(tx_node, clone_id, parent, &snapshot);
                    self.state_mut(clone_id).tx_node = Some(tx_left);
                    self.state_mut(parent).tx_node = Some(tx_right);
                }
            }
        }

        // Redistribute seeds to matching conditions, killing states if
        // necessary under OnlyReplaySeeds.
        if let Some(seeds) = self.seed_map.remove(&current) {
            for seed in seeds {
                let mut matched = None;
                for (i, condition) in conditions.iter().enumerate() {
                    if seed.evaluate(&self.arena, *condition).map(|b| b.is_true()).unwrap_or(false) {
                        matched = Some(i);
                        break;
                    }
                }
                // A seed satisfying no condition is attached to a
                // random successor (and patched later).
                let target = matched.unwrap_or_else(|| self.rng.gen_range(0..n));
                if let Some(id) = result[target] {
                    self.seed_map.entry(id).or_default().push(seed);
                }
            }
            if self.config.only_replay_seeds {
                for slot in result.iter_mut() {
                    if let Some(id) = *slot {
                        if !self.seed_map.contains_key(&id) {
                            self.terminate_state(id, sink)?;
                            *slot = None;
                        }
                    }
                }
            }
        }

        for (i, slot) in result.iter().enumerate() {
            if let Some(id) = *slot {
                self.add_constraint(id, conditions[i])?;
            }
        }
        stats::add_micros(&stats::FORK_TIME_MICROS, started.elapsed().as_micros() as u64);
        Ok(result)
    }

    /// Add `condition` to a state's path condition. Seeds that violate
    /// the new constraint are patched to a satisfying model first.
    pub(crate) fn add_constraint(&mut self, current: StateId, condition: ExprRef) -> Result<(), ExecError> {
        if let Some(bits) = self.arena.as_const(condition) {
            if !bits.is_true() {
                return Err(ExecError::InvalidConstraint);
            }
            return Ok(());
        }

        if let Some(mut seeds) = self.seed_map.remove(&current) {
            let mut warn = false;
            for seed in seeds.iter_mut() {
                let holds = seed.evaluate(&self.arena, condition).map(|b| b.is_true()).unwrap_or(false);
                if !holds {
                    let mut constraints = self.state(current).constraints.clone();
                    constraints.add(&mut self.arena, condition)?;
                    seed.patch(&self.arena, &mut self.solver, &constraints)?;
                    warn = true;
                }
            }
            self.seed_map.insert(current, seeds);
            if warn {
                log!(log::VERBOSE, "seeds patched for violating constraint");
            }
        }

        let arena = &mut self.arena;
        let state = self.states[current.0 as usize].as_mut().expect("dead state");
        state.constraints.add(arena, condition)
    }

    // ----- speculation --------------------------------------------------

    /// The `(SpecType, SpecStrategy)` decision table for a conclusive
    /// branch result outside any speculation subtree.
    fn speculation_decision(
        &mut self,
        _current: StateId,
        condition: ExprRef,
        branch: SpecBranchId,
        point: BlockRef,
    ) -> Result<SpecDecision, ExecError> {
        let strategy = self.config.spec_strategy;
        let spec_type = self.config.spec_type;
        debug_assert!(spec_type != SpecType::None);

        let independent = if spec_type == SpecType::Coverage {
            let vars = speculation::extract_var_names(&self.arena, condition);
            Some(speculation::is_independent(&vars, &self.avoid_sets))
        } else {
            None
        };

        match (spec_type, strategy) {
            (SpecType::Safety, SpecStrategy::Timid) => {
                unreachable!("rejected at startup")
            }
            (SpecType::Safety, SpecStrategy::Aggressive) => {
                self.spec_stats.count_block(point, 0);
                Ok(SpecDecision::Open { store_core: true })
            }
            (SpecType::Safety, SpecStrategy::Custom) => {
                if self.custom_recheck(branch) {
                    self.spec_stats.dynamic_yes += 1;
                    self.spec_stats.count_block(point, 0);
                    Ok(SpecDecision::Open { store_core: true })
                } else {
                    self.spec_stats.dynamic_no += 1;
                    Ok(SpecDecision::Proceed { mark: true })
                }
            }
            (SpecType::Coverage, SpecStrategy::Timid) => {
                if independent == Some(true) {
                    self.spec_stats.independence_yes += 1;
                    self.spec_stats.count_block(point, 0);
                    self.spec_stats.count_block(point, 2);
                    Ok(SpecDecision::Proceed { mark: false })
                } else {
                    self.spec_stats.independence_no += 1;
                    self.spec_stats.count_block(point, 1);
                    Ok(SpecDecision::Proceed { mark: true })
                }
            }
            (SpecType::Coverage, SpecStrategy::Aggressive) => {
                if independent == Some(true) {
                    self.spec_stats.independence_yes += 1;
                    self.spec_stats.count_block(point, 0);
                    self.spec_stats.count_block(point, 2);
                    Ok(SpecDecision::Proceed { mark: false })
                } else {
                    self.spec_stats.independence_no += 1;
                    self.spec_stats.count_block(point, 0);
                    Ok(SpecDecision::Open { store_core: true })
                }
            }
            (SpecType::Coverage, SpecStrategy::Custom) => {
                if independent == Some(true) {
                    self.spec_stats.independence_yes += 1;
                    Ok(SpecDecision::Proceed { mark: false })
                } else {
                    self.spec_stats.independence_no += 1;
                    if self.custom_recheck(branch) {
                        self.spec_stats.dynamic_yes += 1;
                        self.spec_stats.count_block(point, 0);
                        Ok(SpecDecision::Open { store_core: true })
                    } else {
                        self.spec_stats.dynamic_no += 1;
                        Ok(SpecDecision::Proceed { mark: true })
                    }
                }
            }
            (SpecType::None, _) => unreachable!("caller checks speculation_enabled"),
        }
    }

    /// The `(SpecType, SpecStrategy)` table for a genuinely two-sided
    /// branch: this is where a feasible side actually gets skipped.
    fn unknown_speculation_decision(
        &mut self,
        condition: ExprRef,
        branch: SpecBranchId,
        point: BlockRef,
    ) -> Result<UnknownSpecDecision, ExecError> {
        let strategy = self.config.spec_strategy;
        let spec_type = self.config.spec_type;

        let independent = if spec_type == SpecType::Coverage {
            let vars = speculation::extract_var_names(&self.arena, condition);
            Some(speculation::is_independent(&vars, &self.avoid_sets))
        } else {
            None
        };

        match (spec_type, strategy) {
            (SpecType::Safety, SpecStrategy::Timid) => unreachable!("rejected at startup"),
            (SpecType::Safety, SpecStrategy::Aggressive) => {
                self.spec_stats.count_block(point, 0);
                Ok(UnknownSpecDecision::Open)
            }
            (SpecType::Safety, SpecStrategy::Custom) => {
                if self.custom_recheck(branch) {
                    self.spec_stats.dynamic_yes += 1;
                    self.spec_stats.count_block(point, 0);
                    Ok(UnknownSpecDecision::Open)
                } else {
                    self.spec_stats.dynamic_no += 1;
                    Ok(UnknownSpecDecision::Split)
                }
            }
            (SpecType::Coverage, SpecStrategy::Timid) => {
                if independent == Some(true) {
                    self.spec_stats.independence_yes += 1;
                    self.spec_stats.count_block(point, 0);
                    self.spec_stats.count_block(point, 2);
                    Ok(UnknownSpecDecision::Skip)
                } else {
                    self.spec_stats.independence_no += 1;
                    self.spec_stats.count_block(point, 1);
                    Ok(UnknownSpecDecision::Split)
                }
            }
            (SpecType::Coverage, SpecStrategy::Aggressive) => {
                if independent == Some(true) {
                    self.spec_stats.independence_yes += 1;
                    self.spec_stats.count_block(point, 0);
                    self.spec_stats.count_block(point, 2);
                    Ok(UnknownSpecDecision::Skip)
                } else {
                    self.spec_stats.independence_no += 1;
                    self.spec_stats.count_block(point, 0);
                    Ok(UnknownSpecDecision::Open)
                }
            }
            (SpecType::Coverage, SpecStrategy::Custom) => {
                if independent == Some(true) {
                    self.spec_stats.independence_yes += 1;
                    Ok(UnknownSpecDecision::Skip)
                } else {
                    self.spec_stats.independence_no += 1;
                    if self.custom_recheck(branch) {
                        self.spec_stats.dynamic_yes += 1;
                        self.spec_stats.count_block(point, 0);
                        Ok(UnknownSpecDecision::Open)
                    } else {
                        self.spec_stats.dynamic_no += 1;
                        Ok(UnknownSpecDecision::Split)
                    }
                }
            }
            (SpecType::None, _) => unreachable!("caller checks speculation_enabled"),
        }
    }

    /// CUSTOM re-speculates on a branch only when the visited-block
    /// count moved since the last speculation on it.
    fn custom_recheck(&self, branch: SpecBranchId) -> bool {
        self.spec_stats.spec_snap.get(&branch).copied().unwrap_or(0) != self.coverage.num_visited()
    }

    /// Open a speculation node: `current` stays on the *skipped*
    /// (infeasible-looking) side with its path condition untouched,
    /// while a clone continues down the kept side under the branch
    /// constraint. The kept side is returned first so a depth-first
    /// searcher explores it before the speculation.
    fn add_speculation_node(
        &mut self,
        current: StateId,
        condition: ExprRef,
        keep_true: bool,
        _sink: &mut dyn TestCaseSink,
    ) -> Result<StatePair, ExecError> {
        let started = Instant::now();
        stats::bump(&stats::FORKS);

        {
            let state = self.state_mut(current);
            state.depth += 1;
            state.weight *= 0.5;
            state.forks += 1;
        }
        let kept_id = self.fresh_state_id();
        let kept = self.state(current).branch(kept_id);
        self.alloc_state(kept);
        self.added.push(kept_id);

        let spec_id = current;

        let search_node = self.state(current).search_node();
        let (left, right) = self.search_tree.split(search_node, spec_id, kept_id);
        self.state_mut(spec_id).search_node = Some(left);
        self.state_mut(kept_id).search_node = Some(right);

        let tx_node = self.state(current).tx_node();
        let opens_subtree = !self.tx_tree.is_speculation(tx_node);
        let snapshot: Vec<ExprRef> = self.state(current).constraints.iter().collect();
        let (tx_left, tx_right) = self.tx_tree.split(tx_node, spec_id, kept_id, &snapshot);
        self.state_mut(spec_id).tx_node = Some(tx_left);
        self.state_mut(kept_id).tx_node = Some(tx_right);
        self.tx_tree.set_speculation_flag(tx_left, opens_subtree);

        if self.arena.as_const(condition).is_none() {
            let constraint = if keep_true {
                condition
            } else {
                self.arena.mk_not_bool(condition)
            };
            self.add_constraint(kept_id, constraint)?;
        }
        self.record_path_bit(kept_id, ForkKind::Branch, keep_true);

        stats::add_micros(&stats::FORK_TIME_MICROS, started.elapsed().as_micros() as u64);
        if keep_true {
            Ok(StatePair { on_true: Some(kept_id), on_false: Some(spec_id) })
        } else {
            Ok(StatePair { on_true: Some(spec_id), on_false: Some(kept_id) })
        }
    }

    /// The reduced pipeline for branches inside a speculation subtree:
    /// no seeding, no budgets, no replay. Conclusive results may open
    /// nested speculation per the same decision table.
    fn speculation_fork(
        &mut self,
        current: StateId,
        condition: ExprRef,
        sink: &mut dyn TestCaseSink,
    ) -> Result<StatePair, ExecError> {
        self.solver.set_timeout(self.config.solver_timeout());
        let constraints = self.state(current).constraints.clone();
        let outcome = self.solver.evaluate(&self.arena, &constraints, condition);

        let (res, unsat_core) = match outcome {
            Ok(result) => result,
            Err(ExecError::Timeout) | Err(ExecError::SolverFailure(_)) => {
                self.roll_back_pc(current);
                self.terminate_early(current, EarlyTerminateReason::QueryTimeout, "query timed out (fork)", sink)?;
                return Ok(StatePair::neither());
            }
            Err(err) => return Err(err),
        };

        match res {
            Validity::True | Validity::False => {
                let taken = res == Validity::True;
                if self.arena.as_const(condition).is_none() {
                    let branch = SpecBranchId {
                        at: self.state(current).prev_pc.at,
                        instr: self.state(current).prev_pc.index,
                    };
                    let point = self.state(current).prev_pc.at;
                    match self.nested_speculation_decision(current, condition, branch, point)? {
                        SpecDecision::Proceed { mark } => {
                            if mark {
                                let node = self.state(current).tx_node();
                                self.tx_tree.mark_path_condition(node, &unsat_core);
                            }
                        }
                        SpecDecision::Open { store_core } => {
                            let node = self.state(current).tx_node();
                            if store_core {
                                self.tx_tree.store_speculation_unsat_core(node, &unsat_core, branch);
                            } else {
                                self.tx_tree.set_second_check(node, branch);
                            }
                            return self.add_speculation_node(current, condition, taken, sink);
                        }
                    }
                }
                self.record_path_bit(current, ForkKind::Branch, taken);
                let constraint = if taken { condition } else { self.arena.mk_not_bool(condition) };
                self.add_constraint(current, constraint)?;
                Ok(StatePair::one_sided(taken, current))
            }
            Validity::Unknown => self.split_state(current, condition, ForkKind::Branch, sink),
        }
    }

    /// Inside a speculation subtree the table loses its block-counter
    /// side effects (the subtree may be rolled back wholesale) but
    /// keeps the same shape.
    fn nested_speculation_decision(
        &mut self,
        _current: StateId,
        condition: ExprRef,
        branch: SpecBranchId,
        _point: BlockRef,
    ) -> Result<SpecDecision, ExecError> {
        let strategy = self.config.spec_strategy;
        let spec_type = self.config.spec_type;
        debug_assert!(strategy != SpecStrategy::Timid);

        let independent = if spec_type == SpecType::Coverage && strategy == SpecStrategy::Custom {
            let vars = speculation::extract_var_names(&self.arena, condition);
            Some(speculation::is_independent(&vars, &self.avoid_sets))
        } else {
            None
        };

        match strategy {
            SpecStrategy::Aggressive => Ok(SpecDecision::Open { store_core: true }),
            SpecStrategy::Custom => {
                if independent == Some(true) {
                    Ok(SpecDecision::Proceed { mark: false })
                } else if self.custom_recheck(branch) {
                    Ok(SpecDecision::Open { store_core: true })
                } else {
                    Ok(SpecDecision::Proceed { mark: true })
                }
            }
            SpecStrategy::Timid => unreachable!("timid never runs the speculation fork"),
        }
    }

    /// Repair after a failed speculation: walk to the speculation
    /// root, leave the stored unsat core as a learned interpolant on
    /// the root's parent, stamp the CUSTOM snapshot, and delete the
    /// whole subtree (states and nodes) in a single searcher update.
    pub(crate) fn speculative_back_jump(&mut self, current: StateId) {
        let node = self.state(current).tx_node();
        let subtree_time = self.tx_tree.spec_time(node);
        let root = self.tx_tree.speculation_root(node);

        if let Some(parent) = self.tx_tree.parent(root) {
            if let Some(parent_point) = self.tx_tree.program_point(parent) {
                self.spec_stats.count_block(parent_point, 1);
            }
            self.tx_tree.mark_speculation_core(parent);
            if let Some(branch) = self.tx_tree.second_check(parent) {
                self.spec_stats.spec_snap.insert(branch, self.coverage.num_visited());
            }
        }

        let failed_nodes = self.tx_tree.collect_speculation_nodes(root);

        // States terminated earlier in this very step may still sit in
        // the removed queue; pull the ones under the subtree out so
        // they are not torn down twice.
        let removed_queue = std::mem::take(&mut self.removed);
        for id in removed_queue {
            let flagged =
                self.state(id).tx_node.map(|n| self.tx_tree.is_speculation_failed(n)).unwrap_or(false);
            if flagged {
                let search_node = self.state(id).search_node();
                self.search_tree.remove(search_node);
                self.live.remove(&id);
                self.seed_map.remove(&id);
                self.free_state(id);
                self.spec_removed.push(id);
            } else {
                self.removed.push(id);
            }
        }

        // Every state living under the subtree dies: those already
        // announced to the searcher go through the spec-removed queue,
        // the rest disappear silently.
        let mut doomed: Vec<StateId> = Vec::new();
        for id in self.live.iter().copied() {
            if let Some(node) = self.state(id).tx_node {
                if self.tx_tree.is_speculation_failed(node) {
                    doomed.push(id);
                }
            }
        }
        doomed.sort();
        for id in doomed {
            let search_node = self.state(id).search_node();
            self.search_tree.remove(search_node);
            self.live.remove(&id);
            self.seed_map.remove(&id);
            self.free_state(id);
            self.spec_removed.push(id);
        }
        let added = std::mem::take(&mut self.added);
        for id in added {
            let tx_node = self.state(id).tx_node;
            if tx_node.map(|n| self.tx_tree.is_speculation_failed(n)).unwrap_or(false) {
                let search_node = self.state(id).search_node();
                self.search_tree.remove(search_node);
                self.seed_map.remove(&id);
                self.free_state(id);
            } else {
                self.added.push(id);
            }
        }

        for node in failed_nodes {
            self.tx_tree.remove_speculation_failed(node);
        }

        self.spec_stats.total_spec_fail_time += subtree_time;
    }
}
