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

//! txe is a symbolic execution engine for programs in a typed,
//! SSA-form low-level IR. It explores program paths over symbolic
//! inputs, emits a concrete test case for every explored path, and
//! prunes redundant exploration through path-condition interpolation
//! (subsumption), optionally skipping likely-irrelevant branches
//! speculatively with a back-jump repair when a speculation proves
//! unsound.
//!
//! The crate layers bottom-up: concrete bitvectors ([bits]), the
//! hash-consed expression algebra ([expr]), path conditions
//! ([constraints]), the symbolic memory model ([memory]), the solver
//! façade over an opaque SMT core ([solver]), the search and
//! interpolation trees ([tree], [txtree]), and on top of those the
//! interpreter and fork engine ([executor]) driven by a pluggable
//! [searcher].

#[macro_use]
pub mod log;

pub mod bits;
pub mod config;
pub mod constraints;
pub mod coverage;
pub mod error;
pub mod executor;
pub mod expr;
pub mod graph;
pub mod ir;
pub mod memory;
pub mod searcher;
pub mod seeds;
pub mod solver;
pub mod speculation;
pub mod state;
pub mod stats;
pub mod testcase;
pub mod tree;
pub mod txtree;
