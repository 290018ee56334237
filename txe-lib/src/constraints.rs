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

//! The path condition of a state: an ordered sequence of boolean
//! expressions. Additions are simplified against the existing set, and
//! a newly-learned equality `x == k` rewrites the older constraints by
//! substitution, iterated to a fixpoint over the constraints modified
//! in each round.

use ahash::RandomState;
use std::collections::HashMap;

use crate::error::ExecError;
use crate::expr::{BinOp, ExprArena, ExprKind, ExprRef};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConstraintSet {
    constraints: Vec<ExprRef>,
}

/// If `e` is an equality pinning a non-constant sub-expression to a
/// constant, the substitution it induces. Smart constructors keep
/// constants on the left of commutative operators.
fn induced_substitution(arena: &ExprArena, e: ExprRef) -> Option<HashMap<ExprRef, ExprRef, RandomState>> {
    if let ExprKind::Binary { op: BinOp::Eq, lhs, rhs } = arena.kind(e) {
        if arena.as_const(lhs).is_some() && arena.as_const(rhs).is_none() {
            let mut map: HashMap<ExprRef, ExprRef, RandomState> = HashMap::default();
            map.insert(rhs, lhs);
            return Some(map);
        }
    }
    None
}

impl ConstraintSet {
    pub fn new() -> Self {
        ConstraintSet { constraints: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ExprRef> + '_ {
        self.constraints.iter().copied()
    }

    pub fn as_slice(&self) -> &[ExprRef] {
        &self.constraints
    }

    pub fn contains(&self, e: ExprRef) -> bool {
        self.constraints.contains(&e)
    }

    /// Add a constraint known to hold on this path. Proved-true
    /// constants are dropped; a proved-false constant means the caller
    /// tried to make the path condition unsatisfiable, which is a bug.
    pub fn add(&mut self, arena: &mut ExprArena, e: ExprRef) -> Result<(), ExecError> {
        let e = self.simplify_expr(arena, e);
        self.add_internal(arena, e)
    }

    fn add_internal(&mut self, arena: &mut ExprArena, e: ExprRef) -> Result<(), ExecError> {
        if arena.is_true(e) {
            return Ok(());
        }
        if arena.is_false(e) {
            return Err(ExecError::InvalidConstraint);
        }
        if let ExprKind::Binary { op: BinOp::And, lhs, rhs } = arena.kind(e) {
            if arena.width(e) == 1 {
                self.add_internal(arena, lhs)?;
                return self.add_internal(arena, rhs);
            }
        }
        if let Some(map) = induced_substitution(arena, e) {
            self.rewrite_constraints(arena, &map)?;
        }
        if !self.constraints.contains(&e) {
            self.constraints.push(e);
        }
        Ok(())
    }

    /// Re-derive each existing constraint under a newly-known equality.
    /// Constraints modified in this round are re-inserted through
    /// [ConstraintSet::add_internal], so a rewritten constraint that
    /// itself becomes an equality triggers another round. Each round
    /// only revisits modified constraints, so the pass terminates.
    fn rewrite_constraints(
        &mut self,
        arena: &mut ExprArena,
        map: &HashMap<ExprRef, ExprRef, RandomState>,
    ) -> Result<(), ExecError> {
        let old = std::mem::take(&mut self.constraints);
        for c in old {
            let rewritten = arena.substitute(c, map);
            if rewritten == c {
                if !self.constraints.contains(&c) {
                    self.constraints.push(c);
                }
            } else {
                self.add_internal(arena, rewritten)?;
            }
        }
        Ok(())
    }

    /// Simplify `e` by substituting the equalities implied by the
    /// current set. Never calls the solver.
    pub fn simplify_expr(&self, arena: &mut ExprArena, e: ExprRef) -> ExprRef {
        if arena.as_const(e).is_some() {
            return e;
        }
        let mut map: HashMap<ExprRef, ExprRef, RandomState> = HashMap::default();
        for c in &self.constraints {
            if let Some(eq) = induced_substitution(arena, *c) {
                map.extend(eq);
            } else {
                // A non-equality constraint is itself known true.
                map.insert(*c, arena.mk_bool(true));
            }
        }
        if map.is_empty() {
            e
        } else {
            arena.substitute(e, &map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::Bits;
    use crate::expr::INDEX_WIDTH;

    fn read_byte(arena: &mut ExprArena, name: &str) -> ExprRef {
        let array = arena.mk_array(name, 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        arena.mk_read(array, zero)
    }

    #[test]
    fn true_constraints_are_dropped() {
        let mut arena = ExprArena::new();
        let mut cs = ConstraintSet::new();
        let t = arena.mk_bool(true);
        cs.add(&mut arena, t).unwrap();
        assert!(cs.is_empty());
    }

    #[test]
    fn false_constraint_fails() {
        let mut arena = ExprArena::new();
        let mut cs = ConstraintSet::new();
        let f = arena.mk_bool(false);
        assert!(matches!(cs.add(&mut arena, f), Err(ExecError::InvalidConstraint)));
    }

    #[test]
    fn conjunctions_are_split() {
        let mut arena = ExprArena::new();
        let mut cs = ConstraintSet::new();
        let x = read_byte(&mut arena, "x");
        let y = read_byte(&mut arena, "y");
        let zero = arena.mk_u64(0, 8);
        let cx = arena.mk_binary(BinOp::Ne, x, zero);
        let cy = arena.mk_binary(BinOp::Ne, y, zero);
        let both = arena.mk_and_bool(cx, cy);
        cs.add(&mut arena, both).unwrap();
        assert_eq!(cs.len(), 2);
        assert!(cs.contains(cx) && cs.contains(cy));
    }

    #[test]
    fn equality_rewrites_existing_constraints() {
        let mut arena = ExprArena::new();
        let mut cs = ConstraintSet::new();
        let x = read_byte(&mut arena, "x");
        let ten = arena.mk_u64(10, 8);
        let lt = arena.mk_binary(BinOp::Ult, x, ten);
        cs.add(&mut arena, lt).unwrap();

        let five = arena.mk_u64(5, 8);
        let eq = arena.mk_binary(BinOp::Eq, x, five);
        cs.add(&mut arena, eq).unwrap();

        // x < 10 folded away under x == 5; only the equality remains.
        assert_eq!(cs.len(), 1);
        assert!(cs.contains(eq));
    }

    #[test]
    fn contradictory_rewrite_is_rejected() {
        let mut arena = ExprArena::new();
        let mut cs = ConstraintSet::new();
        let x = read_byte(&mut arena, "x");
        let ten = arena.mk_u64(10, 8);
        let gt = arena.mk_binary(BinOp::Ult, ten, x);
        cs.add(&mut arena, gt).unwrap();

        let five = arena.mk_u64(5, 8);
        let eq = arena.mk_binary(BinOp::Eq, x, five);
        assert!(matches!(cs.add(&mut arena, eq), Err(ExecError::InvalidConstraint)));
    }

    #[test]
    fn simplify_is_idempotent() {
        let mut arena = ExprArena::new();
        let mut cs = ConstraintSet::new();
        let x = read_byte(&mut arena, "x");
        let y = read_byte(&mut arena, "y");
        let five = arena.mk_u64(5, 8);
        let eq = arena.mk_binary(BinOp::Eq, x, five);
        cs.add(&mut arena, eq).unwrap();

        let sum = arena.mk_binary(BinOp::Add, x, y);
        let s1 = cs.simplify_expr(&mut arena, sum);
        let s2 = cs.simplify_expr(&mut arena, s1);
        assert_eq!(s1, s2);
        // x was substituted by 5
        let expected = arena.mk_binary(BinOp::Add, five, y);
        assert_eq!(s1, expected);
    }

    #[test]
    fn adding_implied_constraint_is_no_op() {
        let mut arena = ExprArena::new();
        let mut cs = ConstraintSet::new();
        let x = read_byte(&mut arena, "x");
        let five = arena.mk_u64(5, 8);
        let eq = arena.mk_binary(BinOp::Eq, x, five);
        cs.add(&mut arena, eq).unwrap();
        let before = cs.clone();
        // x == 5 implies x < 6; after substitution this is constant true.
        let six = arena.mk_u64(6, 8);
        let lt = arena.mk_binary(BinOp::Ult, x, six);
        cs.add(&mut arena, lt).unwrap();
        assert_eq!(cs, before);
    }

    #[test]
    fn zero_bits_equality() {
        let mut arena = ExprArena::new();
        let mut cs = ConstraintSet::new();
        let x = read_byte(&mut arena, "x");
        let is_zero = arena.mk_is_zero(x);
        cs.add(&mut arena, is_zero).unwrap();
        // `x == 0` pins x; x + 1 simplifies to 1.
        let one = arena.mk_u64(1, 8);
        let sum = arena.mk_binary(BinOp::Add, x, one);
        let simplified = cs.simplify_expr(&mut arena, sum);
        assert_eq!(arena.as_const(simplified), Some(Bits::new(1, 8)));
    }
}
