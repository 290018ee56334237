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

//! Process-global statistics counters. These are updated only from the
//! single execution thread (plus the solver façade), so relaxed atomics
//! are sufficient. [reset] must be called before a second engine run in
//! the same process.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

pub static INSTRUCTIONS: AtomicU64 = AtomicU64::new(0);
pub static FORKS: AtomicU64 = AtomicU64::new(0);
pub static QUERIES: AtomicU64 = AtomicU64::new(0);
pub static SOLVER_TIME_MICROS: AtomicU64 = AtomicU64::new(0);
pub static FORK_TIME_MICROS: AtomicU64 = AtomicU64::new(0);
pub static SUBSUMPTION_HITS: AtomicU64 = AtomicU64::new(0);
pub static SUBSUMPTION_MISSES: AtomicU64 = AtomicU64::new(0);

pub fn instructions() -> u64 {
    INSTRUCTIONS.load(Relaxed)
}

pub fn forks() -> u64 {
    FORKS.load(Relaxed)
}

pub fn queries() -> u64 {
    QUERIES.load(Relaxed)
}

pub fn subsumption_hits() -> u64 {
    SUBSUMPTION_HITS.load(Relaxed)
}

pub fn subsumption_misses() -> u64 {
    SUBSUMPTION_MISSES.load(Relaxed)
}

pub fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Relaxed);
}

pub fn add_micros(counter: &AtomicU64, micros: u64) {
    counter.fetch_add(micros, Relaxed);
}

/// Reset every counter. A second engine run in the same process starts
/// from a clean slate, so runs are comparable.
pub fn reset() {
    for counter in [
        &INSTRUCTIONS,
        &FORKS,
        &QUERIES,
        &SOLVER_TIME_MICROS,
        &FORK_TIME_MICROS,
        &SUBSUMPTION_HITS,
        &SUBSUMPTION_MISSES,
    ] {
        counter.store(0, Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_counters() {
        bump(&FORKS);
        add_micros(&FORK_TIME_MICROS, 10);
        reset();
        assert_eq!(forks(), 0);
        assert_eq!(FORK_TIME_MICROS.load(Relaxed), 0);
    }
}
