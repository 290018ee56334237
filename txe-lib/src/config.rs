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

//! Engine configuration: every runtime knob with its default. The
//! struct deserializes from a TOML file and the command-line front end
//! overrides individual fields on top.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ExecError;
use crate::speculation::{SpecStrategy, SpecType};

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Stop forking past this many forks; `None` is unlimited.
    pub max_forks: Option<u64>,
    /// Kill both successors of a fork past this depth.
    pub max_depth: Option<u32>,
    /// Memory cap in megabytes.
    pub max_memory: u64,
    /// While over the cap, inhibit forking instead of only killing.
    pub max_memory_inhibit: bool,
    /// Seconds per instruction before the state is killed; 0 is off.
    pub max_instruction_time: f64,
    /// Seconds per solver query; 0 is off.
    pub max_core_solver_time: f64,
    pub max_static_fork_pct: f64,
    pub max_static_solve_pct: f64,
    pub max_static_cpfork_pct: f64,
    pub max_static_cpsolve_pct: f64,
    /// Seconds to spend seeding before giving up on remaining seeds.
    pub seed_time: f64,
    pub only_replay_seeds: bool,
    pub only_seed: bool,
    pub allow_seed_extension: bool,
    pub zero_seed_extension: bool,
    pub allow_seed_truncation: bool,
    pub named_seed_matching: bool,
    pub randomize_fork: bool,
    pub emit_all_errors: bool,
    pub dump_states_on_halt: bool,
    pub spec_type: SpecType,
    pub spec_strategy: SpecStrategy,
    pub no_interpolation: bool,
    /// Emit a test case even for subsumed states.
    pub subsumed_test: bool,
    pub wp_interpolant: bool,
    pub exact_address_interpolant: bool,
    /// Basic-block coverage reporting level, 0..=5.
    pub bb_coverage: u8,
    /// Folder holding `SpecAvoid_*` files and `InitialVisitedBB.txt`.
    pub dependency_folder: Option<PathBuf>,
    /// Run each solver query in a forked child process.
    pub fork_solver: bool,
    /// Seed for every engine RNG; fixed by default so runs reproduce.
    pub rng_seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_forks: None,
            max_depth: None,
            max_memory: 2000,
            max_memory_inhibit: true,
            max_instruction_time: 0.0,
            max_core_solver_time: 0.0,
            max_static_fork_pct: 1.0,
            max_static_solve_pct: 1.0,
            max_static_cpfork_pct: 1.0,
            max_static_cpsolve_pct: 1.0,
            seed_time: 0.0,
            only_replay_seeds: false,
            only_seed: false,
            allow_seed_extension: false,
            zero_seed_extension: false,
            allow_seed_truncation: false,
            named_seed_matching: false,
            randomize_fork: false,
            emit_all_errors: false,
            dump_states_on_halt: true,
            spec_type: SpecType::None,
            spec_strategy: SpecStrategy::Timid,
            no_interpolation: false,
            subsumed_test: false,
            wp_interpolant: false,
            exact_address_interpolant: false,
            bb_coverage: 0,
            dependency_folder: None,
            fork_solver: false,
            rng_seed: 1,
        }
    }
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self, ExecError> {
        toml::from_str(contents).map_err(|e| ExecError::BadIr(format!("bad config: {}", e)))
    }

    pub fn interpolation_enabled(&self) -> bool {
        !self.no_interpolation
    }

    pub fn speculation_enabled(&self) -> bool {
        self.interpolation_enabled() && self.spec_type != SpecType::None
    }

    pub fn solver_timeout(&self) -> Option<Duration> {
        if self.max_core_solver_time > 0.0 {
            Some(Duration::from_secs_f64(self.max_core_solver_time))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.max_memory, 2000);
        assert!(config.max_memory_inhibit);
        assert!(config.dump_states_on_halt);
        assert!(!config.emit_all_errors);
        assert_eq!(config.spec_type, SpecType::None);
        assert_eq!(config.rng_seed, 1);
        assert!(config.interpolation_enabled());
        assert!(!config.speculation_enabled());
        assert!(config.solver_timeout().is_none());
    }

    #[test]
    fn toml_round_trip() {
        let config = Config::from_toml(
            r#"
            max_forks = 32
            spec_type = "coverage"
            spec_strategy = "timid"
            bb_coverage = 2
            max_core_solver_time = 1.5
            "#,
        )
        .unwrap();
        assert_eq!(config.max_forks, Some(32));
        assert_eq!(config.spec_type, SpecType::Coverage);
        assert_eq!(config.spec_strategy, SpecStrategy::Timid);
        assert_eq!(config.bb_coverage, 2);
        assert_eq!(config.solver_timeout(), Some(Duration::from_secs_f64(1.5)));
        assert!(config.speculation_enabled());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml("no_such_knob = true").is_err());
    }
}
