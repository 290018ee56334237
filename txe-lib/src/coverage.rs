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

//! Basic-block coverage bookkeeping and the coverage report files.
//! Blocks are identified by their deterministic order id (see
//! [Module::block_order](crate::ir::Module::block_order)); the
//! `bb_coverage` knob selects how much gets written.

use ahash::RandomState;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::ExecError;
use crate::ir::{BlockRef, Instr, Module};
use crate::stats;

#[derive(Default)]
pub struct Coverage {
    visited: HashSet<BlockRef, RandomState>,
    /// (block order, instruction count at first visit), in visit order.
    timeline: Vec<(u32, u64)>,
    covered_icmp: HashSet<(BlockRef, usize), RandomState>,
}

impl Coverage {
    pub fn new() -> Self {
        Coverage::default()
    }

    pub fn with_initial(visited: impl IntoIterator<Item = BlockRef>) -> Self {
        let mut coverage = Coverage::new();
        coverage.visited.extend(visited);
        coverage
    }

    /// Record a block visit; true when the block is new.
    pub fn record_visit(&mut self, module: &Module, block: BlockRef) -> bool {
        if self.visited.insert(block) {
            self.timeline.push((module.block_order(block), stats::instructions()));
            true
        } else {
            false
        }
    }

    pub fn is_visited(&self, block: BlockRef) -> bool {
        self.visited.contains(&block)
    }

    pub fn num_visited(&self) -> usize {
        self.visited.len()
    }

    pub fn record_icmp(&mut self, block: BlockRef, instr: usize) {
        self.covered_icmp.insert((block, instr));
    }

    /// Write the coverage report files selected by `level` into `dir`.
    pub fn write_reports(&self, dir: &Path, module: &Module, level: u8) -> Result<(), ExecError> {
        if level == 0 {
            return Ok(());
        }
        let total = module.num_blocks();
        let visited = self.visited.len();
        let percent = if total == 0 { 0.0 } else { 100.0 * visited as f64 / total as f64 };
        fs::write(
            dir.join("LivePercentCov.txt"),
            format!("Visited: {}\nTotal: {}\nPercent: {:.2}\n", visited, total, percent),
        )?;
        if level >= 2 {
            let mut orders: Vec<u32> = self.visited.iter().map(|b| module.block_order(*b)).collect();
            orders.sort_unstable();
            let body: String = orders.iter().map(|o| format!("{}\n", o)).collect();
            fs::write(dir.join("VisitedBB.txt"), &body)?;

            let mut live = String::new();
            for order in 1..=total as u32 {
                let mark = if orders.binary_search(&order).is_ok() { 1 } else { 0 };
                live.push_str(&format!("{} {}\n", order, mark));
            }
            fs::write(dir.join("LiveBB.txt"), live)?;
        }
        if level >= 3 {
            let body: String =
                self.timeline.iter().map(|(order, instrs)| format!("{} {}\n", order, instrs)).collect();
            fs::write(dir.join("BBPlotting.txt"), body)?;
        }
        if level >= 4 {
            let mut all = String::new();
            let mut covered = String::new();
            for (fun_index, fun) in module.functions.iter().enumerate() {
                for (block_index, block) in fun.blocks.iter().enumerate() {
                    let at = BlockRef {
                        fun: crate::ir::FunId(fun_index as u32),
                        block: crate::ir::BlockId(block_index as u32),
                    };
                    for (i, instr) in block.instrs.iter().enumerate() {
                        if let Instr::ICmp { op, .. } = instr {
                            all.push_str(&format!(
                                "Function: {} Block Order: {} {:?}\n",
                                module.symtab.to_str(fun.name),
                                module.block_order(at),
                                op
                            ));
                            if self.covered_icmp.contains(&(at, i)) {
                                covered.push_str(&format!(
                                    "Function: {} Block Order: {} {:?}\n",
                                    module.symtab.to_str(fun.name),
                                    module.block_order(at),
                                    op
                                ));
                            }
                        }
                    }
                }
            }
            fs::write(dir.join("coveredAICMP.txt"), all)?;
            fs::write(dir.join("coveredICMP.txt"), covered)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockId, FunId, Instr, ModuleBuilder};

    fn two_block_module() -> (Module, FunId) {
        let mut builder = ModuleBuilder::new();
        let mut f = builder.function("main");
        let b0 = f.block();
        let b1 = f.block();
        f.push(b0, Instr::Br { target: b1 });
        f.push(b1, Instr::Ret { value: None });
        let id = f.finish();
        (builder.finish(), id)
    }

    #[test]
    fn visits_count_once() {
        let (module, fun) = two_block_module();
        let mut coverage = Coverage::new();
        let b0 = BlockRef { fun, block: BlockId(0) };
        assert!(coverage.record_visit(&module, b0));
        assert!(!coverage.record_visit(&module, b0));
        assert_eq!(coverage.num_visited(), 1);
    }

    #[test]
    fn reports_are_written() {
        let (module, fun) = two_block_module();
        let mut coverage = Coverage::new();
        coverage.record_visit(&module, BlockRef { fun, block: BlockId(0) });

        let dir = std::env::temp_dir().join(format!("txe-cov-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        coverage.write_reports(&dir, &module, 2).unwrap();
        let percent = fs::read_to_string(dir.join("LivePercentCov.txt")).unwrap();
        assert!(percent.contains("Percent: 50.00"));
        let visited = fs::read_to_string(dir.join("VisitedBB.txt")).unwrap();
        assert_eq!(visited.trim(), "1");
        let live = fs::read_to_string(dir.join("LiveBB.txt")).unwrap();
        assert!(live.contains("1 1") && live.contains("2 0"));
        fs::remove_dir_all(&dir).unwrap();
    }
}
