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

//! The searcher decides which state runs next. The engine announces
//! every state change through [Searcher::update] and asks for the next
//! state with [Searcher::select_state]; a searcher must only ever
//! serve states that were announced and not yet removed.

use rand::rngs::StdRng;
use rand::Rng;
use std::collections::VecDeque;

use crate::state::StateId;

pub trait Searcher {
    fn update(&mut self, current: Option<StateId>, added: &[StateId], removed: &[StateId]);
    fn select_state(&mut self) -> StateId;
    fn empty(&self) -> bool;
}

/// Depth-first: always runs the most recently added state.
#[derive(Default)]
pub struct DfsSearcher {
    stack: Vec<StateId>,
}

impl DfsSearcher {
    pub fn new() -> Self {
        DfsSearcher::default()
    }
}

impl Searcher for DfsSearcher {
    fn update(&mut self, _current: Option<StateId>, added: &[StateId], removed: &[StateId]) {
        self.stack.extend_from_slice(added);
        self.stack.retain(|s| !removed.contains(s));
    }

    fn select_state(&mut self) -> StateId {
        *self.stack.last().expect("select_state called on empty searcher")
    }

    fn empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// Breadth-first: runs states in arrival order.
#[derive(Default)]
pub struct BfsSearcher {
    queue: VecDeque<StateId>,
}

impl BfsSearcher {
    pub fn new() -> Self {
        BfsSearcher::default()
    }
}

impl Searcher for BfsSearcher {
    fn update(&mut self, current: Option<StateId>, added: &[StateId], removed: &[StateId]) {
        self.queue.extend(added.iter().copied());
        self.queue.retain(|s| !removed.contains(s));
        // Rotate the current state to the back once it has had a turn,
        // so siblings progress in lockstep.
        if let Some(current) = current {
            if self.queue.front() == Some(&current) && self.queue.len() > 1 {
                self.queue.rotate_left(1);
            }
        }
    }

    fn select_state(&mut self) -> StateId {
        *self.queue.front().expect("select_state called on empty searcher")
    }

    fn empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Uniformly random selection, driven by the engine's seeded RNG so
/// runs stay reproducible.
pub struct RandomSearcher {
    states: Vec<StateId>,
    rng: StdRng,
}

impl RandomSearcher {
    pub fn new(rng: StdRng) -> Self {
        RandomSearcher { states: Vec::new(), rng }
    }
}

impl Searcher for RandomSearcher {
    fn update(&mut self, _current: Option<StateId>, added: &[StateId], removed: &[StateId]) {
        self.states.extend_from_slice(added);
        self.states.retain(|s| !removed.contains(s));
    }

    fn select_state(&mut self) -> StateId {
        assert!(!self.states.is_empty(), "select_state called on empty searcher");
        let index = self.rng.gen_range(0..self.states.len());
        self.states[index]
    }

    fn empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn dfs_runs_newest_first() {
        let mut searcher = DfsSearcher::new();
        searcher.update(None, &[StateId(0)], &[]);
        searcher.update(Some(StateId(0)), &[StateId(1), StateId(2)], &[]);
        assert_eq!(searcher.select_state(), StateId(2));
        searcher.update(Some(StateId(2)), &[], &[StateId(2)]);
        assert_eq!(searcher.select_state(), StateId(1));
        searcher.update(None, &[], &[StateId(1), StateId(0)]);
        assert!(searcher.empty());
    }

    #[test]
    fn bfs_round_robins() {
        let mut searcher = BfsSearcher::new();
        searcher.update(None, &[StateId(0), StateId(1)], &[]);
        let first = searcher.select_state();
        assert_eq!(first, StateId(0));
        searcher.update(Some(first), &[], &[]);
        assert_eq!(searcher.select_state(), StateId(1));
    }

    #[test]
    fn random_serves_known_states() {
        let mut searcher = RandomSearcher::new(StdRng::seed_from_u64(1));
        searcher.update(None, &[StateId(4), StateId(7), StateId(9)], &[]);
        for _ in 0..20 {
            let s = searcher.select_state();
            assert!([StateId(4), StateId(7), StateId(9)].contains(&s));
        }
        searcher.update(None, &[], &[StateId(7)]);
        for _ in 0..20 {
            assert_ne!(searcher.select_state(), StateId(7));
        }
    }

    #[test]
    fn random_is_reproducible() {
        let mut a = RandomSearcher::new(StdRng::seed_from_u64(42));
        let mut b = RandomSearcher::new(StdRng::seed_from_u64(42));
        let states: Vec<StateId> = (0..10).map(StateId).collect();
        a.update(None, &states, &[]);
        b.update(None, &states, &[]);
        for _ in 0..50 {
            assert_eq!(a.select_state(), b.select_state());
        }
    }
}
