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

//! Speculation support: the per-basic-block avoid sets loaded from the
//! dependency folder, the variable-independence test, and the counters
//! that end up in `spec.txt`. The decision pipeline itself lives in
//! the fork engine; the back-jump lives in the executor.

use ahash::RandomState;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use crate::error::ExecError;
use crate::expr::{ExprArena, ExprRef};
use crate::ir::BlockRef;
use crate::txtree::SpecBranchId;

/// What speculation is trying to preserve. Mirrors the `spec-type`
/// knob.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecType {
    None,
    Safety,
    Coverage,
}

/// How eagerly branches are skipped. Mirrors the `spec-strategy` knob.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecStrategy {
    Timid,
    Aggressive,
    Custom,
}

/// Avoid sets keyed by basic-block order id: the variables considered
/// *relevant* at each block. A branch over none of them is independent
/// and safe to skip under TIMID.
pub type AvoidSets = HashMap<u32, HashSet<String>>;

/// Read every `SpecAvoid_*` file in the dependency folder. Each file
/// holds the block order id on its first line and one variable name
/// per subsequent line.
pub fn read_avoid_sets(folder: &Path) -> Result<AvoidSets, ExecError> {
    let mut result = AvoidSets::new();
    if !folder.is_dir() {
        return Ok(result);
    }
    let mut names: Vec<_> = fs::read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name().and_then(|n| n.to_str()).map(|n| n.starts_with("SpecAvoid_")).unwrap_or(false)
        })
        .collect();
    names.sort();
    for path in names {
        let (order, avoid) = read_avoid_file(&path)?;
        result.insert(order, avoid);
    }
    Ok(result)
}

fn read_avoid_file(path: &Path) -> Result<(u32, HashSet<String>), ExecError> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut order = 0;
    let mut avoid = HashSet::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if i == 0 {
            order = line.parse::<u32>().unwrap_or(0);
        } else if !line.is_empty() {
            avoid.insert(line.to_string());
        }
    }
    Ok((order, avoid))
}

/// Read `InitialVisitedBB.txt`: one block order id per line. Missing
/// file means an empty initial set.
pub fn read_initial_visited(folder: &Path) -> Result<HashSet<u32>, ExecError> {
    let path = folder.join("InitialVisitedBB.txt");
    let mut result = HashSet::new();
    if !path.is_file() {
        return Ok(result);
    }
    let reader = BufReader::new(fs::File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            if let Ok(order) = line.parse::<u32>() {
                result.insert(order);
            }
        }
    }
    Ok(result)
}

/// The source-level variables a branch condition depends on: the names
/// of the symbolic arrays (and through them the objects) mentioned by
/// the condition expression.
pub fn extract_var_names(arena: &ExprArena, condition: ExprRef) -> HashSet<String> {
    let mut arrays = Vec::new();
    arena.collect_arrays(condition, &mut arrays);
    arrays.into_iter().map(|a| base_name(&arena.array_info(a).name)).collect()
}

/// Strip the uniquing suffix so `x_1` matches an avoid entry `x`.
fn base_name(name: &str) -> String {
    match name.rfind('_') {
        Some(at) if name[at + 1..].chars().all(|c| c.is_ascii_digit()) && at > 0 => name[..at].to_string(),
        _ => name.to_string(),
    }
}

/// A branch is independent when none of its variables appears in any
/// avoid set.
pub fn is_independent(vars: &HashSet<String>, avoid: &AvoidSets) -> bool {
    avoid.values().all(|set| vars.is_disjoint(set))
}

/// Per-block speculation outcome counters: opened / failed /
/// succeeded, reported in `spec.txt`.
#[derive(Default)]
pub struct SpecStats {
    pub independence_yes: u64,
    pub independence_no: u64,
    pub dynamic_yes: u64,
    pub dynamic_no: u64,
    pub spec_fail: u64,
    pub total_spec_fail_time: Duration,
    /// Basic-block count snapshot at the last speculation per branch;
    /// CUSTOM re-speculates only after this changes.
    pub spec_snap: HashMap<SpecBranchId, usize, RandomState>,
    /// Failures caused by reaching a new block, per speculation root.
    pub fail_new: HashMap<BlockRef, u32, RandomState>,
    /// Failures caused by revisiting a block (a cycle), per root.
    pub fail_revisited: HashMap<BlockRef, u32, RandomState>,
    /// Per-block [opened, failed, succeeded] counters.
    pub block_counts: HashMap<BlockRef, [u32; 3], RandomState>,
}

impl SpecStats {
    pub fn new() -> Self {
        SpecStats::default()
    }

    pub fn reset(&mut self) {
        *self = SpecStats::default();
    }

    pub fn count_block(&mut self, block: BlockRef, slot: usize) {
        self.block_counts.entry(block).or_insert([0; 3])[slot] += 1;
    }

    /// Render the `spec.txt` report.
    pub fn report(&self, strategy: SpecStrategy) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "Total Independence Yes: {}", self.independence_yes);
        let _ = writeln!(out, "Total Independence No: {}", self.independence_no);
        match strategy {
            SpecStrategy::Aggressive => {
                let _ = writeln!(
                    out,
                    "Total Independence No & Success: {}",
                    self.independence_no.saturating_sub(self.spec_fail)
                );
                let _ = writeln!(out, "Total Independence No & Fail: {}", self.spec_fail);
            }
            SpecStrategy::Custom => {
                let _ = writeln!(out, "Total Dynamic Yes: {}", self.dynamic_yes);
                let _ = writeln!(out, "Total Dynamic No: {}", self.dynamic_no);
                let _ = writeln!(
                    out,
                    "Total Independence No, Dynamic Yes & Success: {}",
                    self.dynamic_yes.saturating_sub(self.spec_fail)
                );
                let _ = writeln!(out, "Total Independence No, Dynamic Yes & Fail: {}", self.spec_fail);
            }
            SpecStrategy::Timid => (),
        }
        let (mut opened, mut failed, mut succeeded) = (0u64, 0u64, 0u64);
        for counts in self.block_counts.values() {
            opened += counts[0] as u64;
            failed += counts[1] as u64;
            succeeded += counts[2] as u64;
        }
        let _ = writeln!(out, "Block Total: {}", opened);
        let _ = writeln!(out, "Block Fail: {}", failed);
        let _ = writeln!(out, "Block Success: {}", succeeded);
        let fail_new: u32 = self.fail_new.values().sum();
        let fail_revisited: u32 = self.fail_revisited.values().sum();
        let _ = writeln!(out, "Total speculation failures because of New BB: {}", fail_new);
        let _ = writeln!(out, "Total speculation failures because of Revisited: {}", fail_revisited);
        let _ = writeln!(
            out,
            "Total speculation failures because of Bug Hit: {}",
            self.spec_fail.saturating_sub(fail_new as u64 + fail_revisited as u64)
        );
        let _ = writeln!(out, "Total speculation fail time: {:.6}", self.total_spec_fail_time.as_secs_f64());
        let _ = writeln!(out, "specFail = {}", self.spec_fail);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, INDEX_WIDTH};

    #[test]
    fn base_name_strips_uniquing_suffix() {
        assert_eq!(base_name("x"), "x");
        assert_eq!(base_name("x_1"), "x");
        assert_eq!(base_name("flag_12"), "flag");
        assert_eq!(base_name("snake_case"), "snake_case");
        assert_eq!(base_name("_1"), "_1");
    }

    #[test]
    fn independence_test() {
        let mut arena = ExprArena::new();
        let flag = arena.mk_array("unused_flag", 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let read = arena.mk_read(flag, zero);
        let cond = arena.mk_is_zero(read);
        let vars = extract_var_names(&arena, cond);
        assert!(vars.contains("unused_flag"));

        let mut avoid = AvoidSets::new();
        avoid.insert(1, ["x".to_string()].into_iter().collect());
        assert!(is_independent(&vars, &avoid));
        avoid.insert(2, ["unused_flag".to_string()].into_iter().collect());
        assert!(!is_independent(&vars, &avoid));
    }

    #[test]
    fn avoid_files_round_trip() {
        let dir = std::env::temp_dir().join(format!("txe-spec-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("SpecAvoid_1.txt"), "3\nx\ny\n").unwrap();
        fs::write(dir.join("SpecAvoid_2.txt"), "7\nflag\n\n").unwrap();
        fs::write(dir.join("InitialVisitedBB.txt"), "1\n2\n").unwrap();
        fs::write(dir.join("unrelated.txt"), "ignored").unwrap();

        let avoid = read_avoid_sets(&dir).unwrap();
        assert_eq!(avoid.len(), 2);
        assert!(avoid[&3].contains("x") && avoid[&3].contains("y"));
        assert!(avoid[&7].contains("flag"));
        let visited = read_initial_visited(&dir).unwrap();
        assert_eq!(visited, [1, 2].into_iter().collect());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn report_mentions_totals() {
        let mut stats = SpecStats::new();
        stats.independence_yes = 3;
        stats.independence_no = 1;
        let report = stats.report(SpecStrategy::Timid);
        assert!(report.contains("Total Independence Yes: 3"));
        assert!(report.contains("specFail = 0"));
    }
}
