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

//! A single path through the program under execution: program counter,
//! call stack, address space, path condition, and the links into the
//! search and interpolation trees. States are created at program start
//! and on forks, mutated only by the interpreter while current, and
//! destroyed on termination.

use std::collections::HashSet;

use crate::constraints::ConstraintSet;
use crate::expr::{ArrayId, ExprRef};
use crate::ir::{BlockId, BlockRef, FunId, Function, Reg};
use crate::memory::{Address, AddressSpace};
use crate::tree::NodeId;
use crate::txtree::TxNodeId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

/// A program counter: an instruction within a block within a function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstrRef {
    pub at: BlockRef,
    pub index: usize,
}

impl InstrRef {
    pub fn entry_of(fun: FunId) -> Self {
        InstrRef { at: BlockRef { fun, block: BlockId(0) }, index: 0 }
    }
}

/// One call-stack frame: the register file of the called function,
/// where to resume in the caller, the allocas to reclaim on return,
/// and the varargs object when the callee is variadic.
#[derive(Clone, Debug)]
pub struct Frame {
    pub fun: FunId,
    pub regs: Vec<Option<ExprRef>>,
    /// The call instruction to resume after; None for the entry frame.
    pub caller: Option<InstrRef>,
    pub allocas: Vec<Address>,
    pub varargs: Option<Address>,
}

impl Frame {
    pub fn new(id: FunId, fun: &Function, caller: Option<InstrRef>) -> Self {
        Frame { fun: id, regs: vec![None; fun.num_regs as usize], caller, allocas: Vec::new(), varargs: None }
    }

    pub fn write(&mut self, reg: Reg, value: ExprRef) {
        self.regs[reg.0 as usize] = Some(value);
    }

    pub fn read(&self, reg: Reg) -> Option<ExprRef> {
        self.regs[reg.0 as usize]
    }
}

#[derive(Clone)]
pub struct ExecutionState {
    pub id: StateId,
    pub pc: InstrRef,
    pub prev_pc: InstrRef,
    /// Block we arrived from, for phi resolution.
    pub incoming_block: Option<BlockId>,
    pub stack: Vec<Frame>,
    pub address_space: AddressSpace,
    pub constraints: ConstraintSet,
    /// Objects made symbolic on this path, in creation order. The
    /// test-case sink reads the solution for exactly these.
    pub symbolics: Vec<(Address, ArrayId)>,
    /// Array names used on this path, for suffix uniquing.
    pub array_names: HashSet<String>,
    pub depth: u32,
    pub weight: f64,
    pub forks: u32,
    /// Whether this state covered a previously-unvisited block; the
    /// memory-cap killer prefers sparing such states.
    pub covered_new: bool,
    pub fork_disabled: bool,
    pub search_node: Option<NodeId>,
    pub tx_node: Option<TxNodeId>,
    /// Recorded branch directions for trace output and replay.
    pub path: Vec<bool>,
}

impl ExecutionState {
    pub fn new(id: StateId, fun_id: FunId, fun: &Function) -> Self {
        let pc = InstrRef::entry_of(fun_id);
        ExecutionState {
            id,
            pc,
            prev_pc: pc,
            incoming_block: None,
            stack: vec![Frame::new(fun_id, fun, None)],
            address_space: AddressSpace::new(),
            constraints: ConstraintSet::new(),
            symbolics: Vec::new(),
            array_names: HashSet::new(),
            depth: 0,
            weight: 1.0,
            forks: 0,
            covered_new: false,
            fork_disabled: false,
            search_node: None,
            tx_node: None,
            path: Vec::new(),
        }
    }

    /// Clone this state for a fork successor. Stack frames and the
    /// constraint set are deep-copied; memory shares object contents
    /// copy-on-write through the address space. The fork engine bumps
    /// depth and weight on the original before cloning, so both sides
    /// carry the updated values.
    pub fn branch(&self, id: StateId) -> Self {
        let mut other = self.clone();
        other.id = id;
        other
    }

    pub fn frame(&self) -> &Frame {
        self.stack.last().expect("state has no stack frame")
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        self.stack.last_mut().expect("state has no stack frame")
    }

    /// Find a unique array name on this path: `name`, then `name_1`,
    /// `name_2`, ...
    pub fn unique_array_name(&mut self, name: &str) -> String {
        let mut unique = name.to_string();
        let mut id = 0;
        while !self.array_names.insert(unique.clone()) {
            id += 1;
            unique = format!("{}_{}", name, id);
        }
        unique
    }

    pub fn search_node(&self) -> NodeId {
        self.search_node.expect("state not linked to the search tree")
    }

    pub fn tx_node(&self) -> TxNodeId {
        self.tx_node.expect("state not linked to the interpolation tree")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Instr, ModuleBuilder};

    #[test]
    fn branch_clones_under_fresh_id() {
        let mut builder = ModuleBuilder::new();
        let mut f = builder.function("main");
        let b = f.block();
        f.push(b, Instr::Ret { value: None });
        let id = f.finish();
        let module = builder.finish();

        let state = ExecutionState::new(StateId(0), id, module.function(id));
        let child = state.branch(StateId(1));
        assert_eq!(child.id, StateId(1));
        assert_eq!(child.depth, state.depth);
        assert_eq!(child.pc, state.pc);
        assert_eq!(child.constraints, state.constraints);
    }

    #[test]
    fn array_name_uniquing() {
        let mut builder = ModuleBuilder::new();
        let mut f = builder.function("main");
        let b = f.block();
        f.push(b, Instr::Ret { value: None });
        let id = f.finish();
        let module = builder.finish();

        let mut state = ExecutionState::new(StateId(0), id, module.function(id));
        assert_eq!(state.unique_array_name("x"), "x");
        assert_eq!(state.unique_array_name("x"), "x_1");
        assert_eq!(state.unique_array_name("x"), "x_2");
        assert_eq!(state.unique_array_name("y"), "y");
    }
}
