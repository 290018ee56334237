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

mod loader;
mod opts;

use std::fs;
use std::path::PathBuf;
use std::process::exit;

use txe_lib::config::Config;
use txe_lib::executor::Executor;
use txe_lib::graph;
use txe_lib::log;
use txe_lib::seeds::{self, KTest};
use txe_lib::solver::enumerate::EnumCore;
use txe_lib::stats;
use txe_lib::testcase::FileSink;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = opts::common_opts();
    let matches = match opts.parse(&args) {
        Ok(matches) => matches,
        Err(err) => {
            eprintln!("error: {}", err);
            opts::print_usage(&opts, 1)
        }
    };
    if matches.opt_present("help") {
        opts::print_usage(&opts, 0)
    }
    log::set_flags(opts::parse_debug_flags(&matches));

    let program = match matches.free.first() {
        Some(path) => path.clone(),
        None => opts::print_usage(&opts, 1),
    };
    let guest_args: Vec<&str> = matches.free.iter().skip(1).map(|s| s.as_str()).collect();

    let mut config = match matches.opt_str("config") {
        Some(path) => match fs::read_to_string(&path).map_err(|e| e.to_string()).and_then(|text| {
            Config::from_toml(&text).map_err(|e| e.to_string())
        }) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error loading config {}: {}", path, err);
                exit(1)
            }
        },
        None => Config::default(),
    };
    if let Err(err) = opts::apply_overrides(&mut config, &matches) {
        eprintln!("error: {}", err);
        exit(1)
    }

    let source = match fs::read_to_string(&program) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error reading {}: {}", program, err);
            exit(1)
        }
    };
    let module = match loader::parse_module(&source) {
        Ok(module) => module,
        Err(err) => {
            eprintln!("error parsing {}: {}", program, err);
            exit(1)
        }
    };

    let output_dir = PathBuf::from(matches.opt_str("output-dir").unwrap_or_else(|| "txe-out".to_string()));
    let mut sink = match FileSink::new(output_dir.clone()) {
        Ok(sink) => sink,
        Err(err) => {
            eprintln!("error creating output directory: {}", err);
            exit(1)
        }
    };
    if let Err(err) = fs::write(output_dir.join("assembly.ll"), loader::dump_module(&module)) {
        eprintln!("error writing assembly.ll: {}", err);
        exit(1)
    }

    let seeds: Vec<KTest> = match matches.opt_str("seed-dir") {
        Some(dir) => match seeds::load_seed_dir(&PathBuf::from(&dir)) {
            Ok(seeds) => seeds,
            Err(err) => {
                eprintln!("error loading seeds from {}: {}", dir, err);
                exit(1)
            }
        },
        None => Vec::new(),
    };

    let entry = matches.opt_str("entry").unwrap_or_else(|| "main".to_string());
    let spec_enabled = config.speculation_enabled();
    let spec_strategy = config.spec_strategy;
    let interpolation = config.interpolation_enabled();
    let bb_coverage = config.bb_coverage;

    let mut executor = Executor::new(&module, config, Box::new(EnumCore::new()));

    if let Some(path) = matches.opt_str("replay-path") {
        match fs::read_to_string(&path) {
            Ok(trace) => {
                let bits = trace.trim().chars().filter_map(|c| match c {
                    '1' => Some(true),
                    '0' => Some(false),
                    _ => None,
                });
                executor.set_replay_path(bits.collect());
            }
            Err(err) => {
                eprintln!("error reading replay path {}: {}", path, err);
                exit(1)
            }
        }
    }
    if let Some(path) = matches.opt_str("replay-ktest") {
        match KTest::from_file(&PathBuf::from(&path)) {
            Ok(ktest) => executor.set_replay_ktest(ktest),
            Err(err) => {
                eprintln!("error reading replay ktest {}: {}", path, err);
                exit(1)
            }
        }
    }

    let result = executor.run_function_as_main(&entry, &guest_args, seeds, &mut sink);
    if let Err(err) = result {
        eprintln!("txe: fatal: {}", err);
        exit(1)
    }

    // Reports.
    let instructions_report = format!(
        "instructions: {}\nforks: {}\nqueries: {}\nsubsumption hits: {}\nsubsumption misses: {}\n",
        stats::instructions(),
        stats::forks(),
        stats::queries(),
        stats::subsumption_hits(),
        stats::subsumption_misses(),
    );
    if let Err(err) = fs::write(output_dir.join("instructions.txt"), instructions_report) {
        eprintln!("error writing instructions.txt: {}", err);
    }
    if interpolation {
        if let Err(err) = graph::save_tx_tree(&executor.tx_tree, &output_dir.join("tree.dot")) {
            eprintln!("error writing tree.dot: {}", err);
        }
    }
    if spec_enabled {
        let report = executor.spec_stats.report(spec_strategy);
        if let Err(err) = fs::write(output_dir.join("spec.txt"), report) {
            eprintln!("error writing spec.txt: {}", err);
        }
    }
    if let Err(err) = executor.coverage.write_reports(&output_dir, &module, bb_coverage) {
        eprintln!("error writing coverage reports: {}", err);
    }

    eprintln!(
        "txe: done: instructions = {}, forks = {}, queries = {}",
        stats::instructions(),
        stats::forks(),
        stats::queries()
    );
    eprintln!("txe: done: test cases in {}", output_dir.display());
}
