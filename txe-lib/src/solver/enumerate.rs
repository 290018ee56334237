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

//! The in-tree reference solver core: exact bounded model enumeration
//! over the symbolic input arrays. Queries whose combined input space
//! exceeds the enumeration budget are refused with a solver failure,
//! which the engine absorbs by terminating the offending state. This
//! core exists so the engine runs and is testable without an external
//! SMT backend; production deployments plug a real core in through the
//! [SolverCore](crate::solver::SolverCore) trait.
//!
//! Enumeration counts assignments up from the all-zeros vector, so the
//! first model found (used by `get_value` and `get_initial_values`) is
//! deterministic. Unsat cores are minimized greedily by dropping one
//! assumption at a time.

use std::time::{Duration, Instant};

use crate::bits::Bits;
use crate::error::ExecError;
use crate::expr::{ArrayId, ExprArena, ExprRef};
use crate::solver::{SolverCore, Validity};

/// Refuse queries over more than this many symbolic input bytes: the
/// model space stops enumerating in reasonable time beyond that.
const MAX_INPUT_BYTES: u32 = 3;

const TIMEOUT_CHECK_INTERVAL: u64 = 4096;

pub struct EnumCore {
    timeout: Option<Duration>,
}

impl Default for EnumCore {
    fn default() -> Self {
        Self::new()
    }
}

impl EnumCore {
    pub fn new() -> Self {
        EnumCore { timeout: None }
    }
}

/// The concrete input arrays a query ranges over, in [ArrayId] order.
struct InputSpace {
    arrays: Vec<(ArrayId, u32)>,
    total_bytes: u32,
}

impl InputSpace {
    fn of(arena: &ExprArena, exprs: impl Iterator<Item = ExprRef>) -> Result<Self, ExecError> {
        let mut ids = Vec::new();
        for e in exprs {
            arena.collect_arrays(e, &mut ids);
        }
        ids.sort();
        ids.dedup();
        let arrays: Vec<(ArrayId, u32)> = ids.into_iter().map(|a| (a, arena.array_info(a).size)).collect();
        let total_bytes = arrays.iter().map(|(_, size)| *size).sum();
        if total_bytes > MAX_INPUT_BYTES {
            return Err(ExecError::SolverFailure(format!(
                "enumeration budget exceeded: {} symbolic input bytes",
                total_bytes
            )));
        }
        Ok(InputSpace { arrays, total_bytes })
    }

    fn assignment<'a>(&'a self, flat: &'a [u8]) -> impl Fn(ArrayId, u32) -> u8 + 'a {
        move |wanted, index| {
            let mut offset = 0u32;
            for (array, size) in &self.arrays {
                if *array == wanted {
                    if index < *size {
                        return flat[(offset + index) as usize];
                    }
                    return 0;
                }
                offset += size;
            }
            0
        }
    }
}

/// Iterate every assignment of the input space, calling `visit` until
/// it returns `false` (stop early) or the space is exhausted. Returns
/// true when the visitor stopped the iteration.
fn for_each_assignment(
    space: &InputSpace,
    timeout: Option<Duration>,
    mut visit: impl FnMut(&[u8]) -> bool,
) -> Result<bool, ExecError> {
    let start = Instant::now();
    let mut flat = vec![0u8; space.total_bytes as usize];
    let mut count: u64 = 0;
    loop {
        count += 1;
        if count % TIMEOUT_CHECK_INTERVAL == 0 {
            if let Some(limit) = timeout {
                if start.elapsed() > limit {
                    return Err(ExecError::Timeout);
                }
            }
        }
        if !visit(&flat) {
            return Ok(true);
        }
        // Odometer increment; wrap-around to all zeros means done.
        let mut i = 0;
        loop {
            if i == flat.len() {
                return Ok(false);
            }
            flat[i] = flat[i].wrapping_add(1);
            if flat[i] != 0 {
                break;
            }
            i += 1;
        }
    }
}

/// Whether every assumption evaluates to true under `flat`. An
/// assumption that fails to evaluate (division by zero under that
/// model) is unsatisfied.
fn holds(arena: &ExprArena, space: &InputSpace, assumptions: &[ExprRef], flat: &[u8]) -> bool {
    let assignment = space.assignment(flat);
    assumptions.iter().all(|a| matches!(arena.eval(*a, &assignment), Ok(bits) if bits.is_true()))
}

/// Is there a model of the assumptions under which `query` evaluates
/// to `wanted`?
fn query_satisfiable(
    arena: &ExprArena,
    space: &InputSpace,
    assumptions: &[ExprRef],
    query: ExprRef,
    wanted: bool,
    timeout: Option<Duration>,
) -> Result<bool, ExecError> {
    for_each_assignment(space, timeout, |flat| {
        if !holds(arena, space, assumptions, flat) {
            return true;
        }
        let assignment = space.assignment(flat);
        match arena.eval(query, &assignment) {
            Ok(bits) if bits.is_true() == wanted => false,
            _ => true,
        }
    })
}

/// Greedily shrink the assumption set keeping `assumptions ∧ (query ==
/// wanted)` unsatisfiable. The result is the unsat core reported to
/// the interpolation tree, so smaller is better but minimality is not
/// required for soundness.
fn minimize_core(
    arena: &ExprArena,
    space: &InputSpace,
    assumptions: &[ExprRef],
    query: ExprRef,
    wanted: bool,
    timeout: Option<Duration>,
) -> Result<Vec<ExprRef>, ExecError> {
    let mut core: Vec<ExprRef> = assumptions.to_vec();
    let mut i = 0;
    while i < core.len() {
        let mut candidate = core.clone();
        candidate.remove(i);
        if query_satisfiable(arena, space, &candidate, query, wanted, timeout)? {
            i += 1;
        } else {
            core = candidate;
        }
    }
    Ok(core)
}

impl SolverCore for EnumCore {
    fn evaluate(
        &mut self,
        arena: &ExprArena,
        assumptions: &[ExprRef],
        query: ExprRef,
    ) -> Result<(Validity, Vec<ExprRef>), ExecError> {
        let space = InputSpace::of(arena, assumptions.iter().copied().chain(std::iter::once(query)))?;
        let can_be_true = query_satisfiable(arena, &space, assumptions, query, true, self.timeout)?;
        let can_be_false = query_satisfiable(arena, &space, assumptions, query, false, self.timeout)?;
        match (can_be_true, can_be_false) {
            (true, true) => Ok((Validity::Unknown, Vec::new())),
            (false, true) => {
                let core = minimize_core(arena, &space, assumptions, query, true, self.timeout)?;
                Ok((Validity::False, core))
            }
            // Valid, or vacuously valid on an unsatisfiable path.
            _ => {
                let core = minimize_core(arena, &space, assumptions, query, false, self.timeout)?;
                Ok((Validity::True, core))
            }
        }
    }

    fn get_value(&mut self, arena: &ExprArena, assumptions: &[ExprRef], query: ExprRef) -> Result<Bits, ExecError> {
        let space = InputSpace::of(arena, assumptions.iter().copied().chain(std::iter::once(query)))?;
        let mut value = None;
        for_each_assignment(&space, self.timeout, |flat| {
            if holds(arena, &space, assumptions, flat) {
                let assignment = space.assignment(flat);
                if let Ok(bits) = arena.eval(query, &assignment) {
                    value = Some(bits);
                    return false;
                }
            }
            true
        })?;
        value.ok_or(ExecError::NoModel)
    }

    fn must_be_true(
        &mut self,
        arena: &ExprArena,
        assumptions: &[ExprRef],
        query: ExprRef,
    ) -> Result<bool, ExecError> {
        let space = InputSpace::of(arena, assumptions.iter().copied().chain(std::iter::once(query)))?;
        Ok(!query_satisfiable(arena, &space, assumptions, query, false, self.timeout)?)
    }

    fn may_be_true(
        &mut self,
        arena: &ExprArena,
        assumptions: &[ExprRef],
        query: ExprRef,
    ) -> Result<(bool, Vec<ExprRef>), ExecError> {
        let space = InputSpace::of(arena, assumptions.iter().copied().chain(std::iter::once(query)))?;
        if query_satisfiable(arena, &space, assumptions, query, true, self.timeout)? {
            Ok((true, Vec::new()))
        } else {
            let core = minimize_core(arena, &space, assumptions, query, true, self.timeout)?;
            Ok((false, core))
        }
    }

    fn get_initial_values(
        &mut self,
        arena: &ExprArena,
        assumptions: &[ExprRef],
        arrays: &[ArrayId],
    ) -> Result<Vec<Vec<u8>>, ExecError> {
        let space = InputSpace::of(arena, assumptions.iter().copied())?;
        let mut model: Option<Vec<u8>> = None;
        for_each_assignment(&space, self.timeout, |flat| {
            if holds(arena, &space, assumptions, flat) {
                model = Some(flat.to_vec());
                false
            } else {
                true
            }
        })?;
        let flat = model.ok_or(ExecError::NoModel)?;
        let assignment = space.assignment(&flat);
        Ok(arrays
            .iter()
            .map(|array| {
                let size = arena.array_info(*array).size;
                (0..size).map(|i| assignment(*array, i)).collect()
            })
            .collect())
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn constraint_log(&self, arena: &ExprArena, assumptions: &[ExprRef], query: ExprRef) -> String {
        let mut out = String::new();
        for a in assumptions {
            out.push_str("(assert ");
            out.push_str(&arena.pretty(*a));
            out.push_str(")\n");
        }
        out.push_str("(query ");
        out.push_str(&arena.pretty(query));
        out.push_str(")\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, INDEX_WIDTH};

    fn byte(arena: &mut ExprArena, name: &str) -> (ArrayId, ExprRef) {
        let array = arena.mk_array(name, 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let read = arena.mk_read(array, zero);
        (array, read)
    }

    #[test]
    fn validity_of_tautology() {
        let mut arena = ExprArena::new();
        let (_, x) = byte(&mut arena, "x");
        let ff = arena.mk_u64(0xFF, 8);
        let le = arena.mk_binary(BinOp::Ule, x, ff);
        let mut core = EnumCore::new();
        let (validity, _) = core.evaluate(&arena, &[], le).unwrap();
        assert_eq!(validity, Validity::True);
    }

    #[test]
    fn unknown_when_both_possible() {
        let mut arena = ExprArena::new();
        let (_, x) = byte(&mut arena, "x");
        let ten = arena.mk_u64(10, 8);
        let lt = arena.mk_binary(BinOp::Ult, x, ten);
        let mut core = EnumCore::new();
        let (validity, _) = core.evaluate(&arena, &[], lt).unwrap();
        assert_eq!(validity, Validity::Unknown);
    }

    #[test]
    fn assumption_makes_query_valid() {
        let mut arena = ExprArena::new();
        let (_, x) = byte(&mut arena, "x");
        let five = arena.mk_u64(5, 8);
        let ten = arena.mk_u64(10, 8);
        let lt5 = arena.mk_binary(BinOp::Ult, x, five);
        let lt10 = arena.mk_binary(BinOp::Ult, x, ten);
        let mut core = EnumCore::new();
        let (validity, unsat_core) = core.evaluate(&arena, &[lt5], lt10).unwrap();
        assert_eq!(validity, Validity::True);
        assert_eq!(unsat_core, vec![lt5]);
    }

    #[test]
    fn core_is_minimized() {
        let mut arena = ExprArena::new();
        let (_, x) = byte(&mut arena, "x");
        let (_, y) = byte(&mut arena, "y");
        let five = arena.mk_u64(5, 8);
        let ten = arena.mk_u64(10, 8);
        let x_lt5 = arena.mk_binary(BinOp::Ult, x, five);
        let y_lt5 = arena.mk_binary(BinOp::Ult, y, five);
        let x_lt10 = arena.mk_binary(BinOp::Ult, x, ten);
        let mut core = EnumCore::new();
        // y < 5 is irrelevant to x < 10 and must not appear in the core.
        let (validity, unsat_core) = core.evaluate(&arena, &[y_lt5, x_lt5], x_lt10).unwrap();
        assert_eq!(validity, Validity::True);
        assert_eq!(unsat_core, vec![x_lt5]);
    }

    #[test]
    fn may_be_true_finds_model() {
        let mut arena = ExprArena::new();
        let (_, x) = byte(&mut arena, "x");
        let five = arena.mk_u64(5, 8);
        let eq = arena.mk_binary(BinOp::Eq, x, five);
        let mut core = EnumCore::new();
        let (possible, _) = core.may_be_true(&arena, &[], eq).unwrap();
        assert!(possible);
        let lt = arena.mk_binary(BinOp::Ult, x, five);
        let (possible, unsat_core) = core.may_be_true(&arena, &[eq], lt).unwrap();
        assert!(!possible);
        assert_eq!(unsat_core, vec![eq]);
    }

    #[test]
    fn must_be_true_under_assumptions() {
        let mut arena = ExprArena::new();
        let (_, x) = byte(&mut arena, "x");
        let five = arena.mk_u64(5, 8);
        let ten = arena.mk_u64(10, 8);
        let eq = arena.mk_binary(BinOp::Eq, x, five);
        let lt = arena.mk_binary(BinOp::Ult, x, ten);
        let mut core = EnumCore::new();
        assert!(core.must_be_true(&arena, &[eq], lt).unwrap());
        assert!(!core.must_be_true(&arena, &[], lt).unwrap());
    }

    #[test]
    fn first_model_is_smallest() {
        let mut arena = ExprArena::new();
        let (array, x) = byte(&mut arena, "x");
        let three = arena.mk_u64(3, 8);
        let gt = arena.mk_binary(BinOp::Ult, three, x);
        let mut core = EnumCore::new();
        let model = core.get_initial_values(&arena, &[gt], &[array]).unwrap();
        assert_eq!(model, vec![vec![4]]);
        assert_eq!(core.get_value(&arena, &[gt], x).unwrap(), Bits::new(4, 8));
    }

    #[test]
    fn budget_is_enforced() {
        let mut arena = ExprArena::new();
        let big = arena.mk_array("big", 16);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let read = arena.mk_read(big, zero);
        let five = arena.mk_u64(5, 8);
        let eq = arena.mk_binary(BinOp::Eq, read, five);
        let mut core = EnumCore::new();
        assert!(matches!(core.evaluate(&arena, &[], eq), Err(ExecError::SolverFailure(_))));
    }

    #[test]
    fn unsat_assumptions_yield_no_model() {
        let mut arena = ExprArena::new();
        let (array, x) = byte(&mut arena, "x");
        let five = arena.mk_u64(5, 8);
        let six = arena.mk_u64(6, 8);
        let eq5 = arena.mk_binary(BinOp::Eq, x, five);
        let eq6 = arena.mk_binary(BinOp::Eq, x, six);
        let mut core = EnumCore::new();
        assert!(matches!(core.get_initial_values(&arena, &[eq5, eq6], &[array]), Err(ExecError::NoModel)));
    }

    #[test]
    fn get_value_on_two_byte_input() {
        let mut arena = ExprArena::new();
        let array = arena.mk_array("x", 2);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let word = arena.mk_read_bytes(array, zero, 2);
        let limit = arena.mk_u64(0x0100, 16);
        let ge = arena.mk_binary(BinOp::Ule, limit, word);
        let mut core = EnumCore::new();
        let value = core.get_value(&arena, &[ge], word).unwrap();
        assert_eq!(value, Bits::new(0x0100, 16));
    }
}
