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

use getopts::{Matches, Options};
use std::path::PathBuf;
use std::process::exit;

use txe_lib::config::Config;
use txe_lib::log;

fn tool_name() -> Option<String> {
    match std::env::current_exe() {
        Ok(path) => Some(path.components().last()?.as_os_str().to_str()?.to_string()),
        Err(_) => None,
    }
}

pub fn print_usage(opts: &Options, code: i32) -> ! {
    let tool = match tool_name() {
        Some(name) => name,
        None => "[tool]".to_string(),
    };
    let brief = format!("Usage: {} [options] <program.txe> [-- guest args]", tool);
    eprint!("{}", opts.usage(&brief));
    exit(code)
}

pub fn common_opts() -> Options {
    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help message");
    opts.optopt("o", "output-dir", "write test cases and reports here", "<dir>");
    opts.optopt("C", "config", "load engine configuration", "<file.toml>");
    opts.optopt("e", "entry", "entry function (default: main)", "<name>");
    opts.optopt("s", "seed-dir", "replay every .ktest file in this directory as a seed", "<dir>");
    opts.optopt("", "replay-path", "replay a recorded branch trace", "<file.path>");
    opts.optopt("", "replay-ktest", "replay one concrete test record", "<file.ktest>");
    opts.optopt("D", "debug", "set debugging flags (comma separated)", "<flags>");
    opts.optopt("", "max-forks", "stop forking past this many forks", "<n>");
    opts.optopt("", "max-depth", "kill states past this branching depth", "<n>");
    opts.optopt("", "max-memory", "memory cap in megabytes", "<mb>");
    opts.optopt("", "max-core-solver-time", "seconds per solver query", "<s>");
    opts.optopt("", "max-instruction-time", "seconds per instruction", "<s>");
    opts.optopt("", "seed-time", "seconds to spend seeding", "<s>");
    opts.optopt("", "spec-type", "speculation type: none|safety|coverage", "<type>");
    opts.optopt("", "spec-strategy", "speculation strategy: timid|aggressive|custom", "<strategy>");
    opts.optopt("", "dependency-folder", "SpecAvoid_* files live here", "<dir>");
    opts.optopt("", "bb-coverage", "basic block coverage report level 0..5", "<n>");
    opts.optopt("", "rng-seed", "seed for the engine RNG", "<n>");
    opts.optflag("", "no-interpolation", "disable the interpolation subsystem");
    opts.optflag("", "subsumed-test", "emit a test case for subsumed states");
    opts.optflag("", "wp-interpolant", "use weakest-precondition style marking on errors");
    opts.optflag("", "exact-address-interpolant", "exact address predicates for pointer errors");
    opts.optflag("", "emit-all-errors", "emit duplicate (location, message) errors");
    opts.optflag("", "only-replay-seeds", "kill states that drop all seeds");
    opts.optflag("", "only-seed", "stop after the seeding phase");
    opts.optflag("", "allow-seed-extension", "permit seeds shorter than the object");
    opts.optflag("", "zero-seed-extension", "pad short seeds with zero bytes");
    opts.optflag("", "allow-seed-truncation", "permit seeds longer than the object");
    opts.optflag("", "named-seed-matching", "match seed objects by name, not order");
    opts.optflag("", "randomize-fork", "randomly swap fork successors");
    opts.optflag("", "no-dump-states-on-halt", "discard live states when halting");
    opts.optflag("", "fork-solver", "run each solver query in a forked child");
    opts
}

pub fn parse_debug_flags(matches: &Matches) -> u32 {
    let mut flags = 0;
    if let Some(spec) = matches.opt_str("debug") {
        for flag in spec.split(',') {
            flags |= match flag.trim() {
                "verbose" => log::VERBOSE,
                "memory" => log::MEMORY,
                "fork" => log::FORK,
                "spec" => log::SPEC,
                "itp" => log::ITP,
                "solver" => log::SOLVER,
                "" => 0,
                other => {
                    eprintln!("unknown debug flag: {}", other);
                    0
                }
            };
        }
    }
    flags
}

/// Fold the command-line overrides over the configuration file.
pub fn apply_overrides(config: &mut Config, matches: &Matches) -> Result<(), String> {
    if let Some(n) = matches.opt_str("max-forks") {
        config.max_forks = Some(n.parse().map_err(|_| "bad --max-forks")?);
    }
    if let Some(n) = matches.opt_str("max-depth") {
        config.max_depth = Some(n.parse().map_err(|_| "bad --max-depth")?);
    }
    if let Some(n) = matches.opt_str("max-memory") {
        config.max_memory = n.parse().map_err(|_| "bad --max-memory")?;
    }
    if let Some(n) = matches.opt_str("max-core-solver-time") {
        config.max_core_solver_time = n.parse().map_err(|_| "bad --max-core-solver-time")?;
    }
    if let Some(n) = matches.opt_str("max-instruction-time") {
        config.max_instruction_time = n.parse().map_err(|_| "bad --max-instruction-time")?;
    }
    if let Some(n) = matches.opt_str("seed-time") {
        config.seed_time = n.parse().map_err(|_| "bad --seed-time")?;
    }
    if let Some(kind) = matches.opt_str("spec-type") {
        config.spec_type = match kind.as_str() {
            "none" => txe_lib::speculation::SpecType::None,
            "safety" => txe_lib::speculation::SpecType::Safety,
            "coverage" => txe_lib::speculation::SpecType::Coverage,
            _ => return Err("bad --spec-type".to_string()),
        };
    }
    if let Some(strategy) = matches.opt_str("spec-strategy") {
        config.spec_strategy = match strategy.as_str() {
            "timid" => txe_lib::speculation::SpecStrategy::Timid,
            "aggressive" => txe_lib::speculation::SpecStrategy::Aggressive,
            "custom" => txe_lib::speculation::SpecStrategy::Custom,
            _ => return Err("bad --spec-strategy".to_string()),
        };
    }
    if let Some(dir) = matches.opt_str("dependency-folder") {
        config.dependency_folder = Some(PathBuf::from(dir));
    }
    if let Some(n) = matches.opt_str("bb-coverage") {
        config.bb_coverage = n.parse().map_err(|_| "bad --bb-coverage")?;
    }
    if let Some(n) = matches.opt_str("rng-seed") {
        config.rng_seed = n.parse().map_err(|_| "bad --rng-seed")?;
    }
    config.no_interpolation |= matches.opt_present("no-interpolation");
    config.subsumed_test |= matches.opt_present("subsumed-test");
    config.wp_interpolant |= matches.opt_present("wp-interpolant");
    config.exact_address_interpolant |= matches.opt_present("exact-address-interpolant");
    config.emit_all_errors |= matches.opt_present("emit-all-errors");
    config.only_replay_seeds |= matches.opt_present("only-replay-seeds");
    config.only_seed |= matches.opt_present("only-seed");
    config.allow_seed_extension |= matches.opt_present("allow-seed-extension");
    config.zero_seed_extension |= matches.opt_present("zero-seed-extension");
    config.allow_seed_truncation |= matches.opt_present("allow-seed-truncation");
    config.named_seed_matching |= matches.opt_present("named-seed-matching");
    config.randomize_fork |= matches.opt_present("randomize-fork");
    config.fork_solver |= matches.opt_present("fork-solver");
    if matches.opt_present("no-dump-states-on-halt") {
        config.dump_states_on_halt = false;
    }
    Ok(())
}
