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

//! The test-case sink: where terminated states become artifacts. The
//! engine resolves a concrete input assignment for each terminated
//! state (its *symbolic solution*) and hands it to the sink together
//! with the optional error message and file suffix.

use std::fs;
use std::path::PathBuf;

use crate::error::ExecError;
use crate::seeds::{KTest, KTestObject};

/// One finished path: the concrete inputs driving it, the recorded
/// branch directions, and the error classification if any.
#[derive(Clone, Debug)]
pub struct TestCase {
    pub solution: Vec<(String, Vec<u8>)>,
    pub path: Vec<bool>,
    pub message: Option<String>,
    pub suffix: Option<String>,
}

pub trait TestCaseSink {
    fn process_test_case(&mut self, case: TestCase) -> Result<(), ExecError>;
}

/// Writes `testNNNNNN.ktest` files (plus `.path` branch traces and
/// `.<suffix>.err` message files) into an output directory.
pub struct FileSink {
    dir: PathBuf,
    next_id: u32,
}

impl FileSink {
    pub fn new(dir: PathBuf) -> Result<Self, ExecError> {
        fs::create_dir_all(&dir)?;
        Ok(FileSink { dir, next_id: 0 })
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

impl TestCaseSink for FileSink {
    fn process_test_case(&mut self, case: TestCase) -> Result<(), ExecError> {
        self.next_id += 1;
        let stem = format!("test{:06}", self.next_id);
        let ktest = KTest {
            args: Vec::new(),
            sym_argvs: 0,
            sym_argv_len: 0,
            objects: case.solution.into_iter().map(|(name, bytes)| KTestObject { name, bytes }).collect(),
        };
        ktest.to_file(&self.dir.join(format!("{}.ktest", stem)))?;
        let trace: String = case.path.iter().map(|taken| if *taken { '1' } else { '0' }).collect();
        fs::write(self.dir.join(format!("{}.path", stem)), trace)?;
        if let Some(message) = case.message {
            let suffix = case.suffix.as_deref().unwrap_or("early");
            fs::write(self.dir.join(format!("{}.{}.err", stem, suffix)), message)?;
        }
        Ok(())
    }
}

/// Keeps every test case in memory; the test suite inspects it.
#[derive(Default)]
pub struct CollectingSink {
    pub cases: Vec<TestCase>,
}

impl CollectingSink {
    pub fn new() -> Self {
        CollectingSink::default()
    }

    pub fn with_suffix<'a>(&'a self, suffix: &'a str) -> impl Iterator<Item = &'a TestCase> + 'a {
        self.cases.iter().filter(move |case| case.suffix.as_deref() == Some(suffix))
    }

    pub fn completed(&self) -> impl Iterator<Item = &TestCase> {
        self.cases.iter().filter(|case| case.suffix.is_none())
    }
}

impl TestCaseSink for CollectingSink {
    fn process_test_case(&mut self, case: TestCase) -> Result<(), ExecError> {
        self.cases.push(case);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_writes_ktest_and_err() {
        let dir = std::env::temp_dir().join(format!("txe-sink-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let mut sink = FileSink::new(dir.clone()).unwrap();
        sink.process_test_case(TestCase {
            solution: vec![("x".to_string(), vec![1, 2])],
            path: vec![true, false],
            message: Some("memory error".to_string()),
            suffix: Some("ptr".to_string()),
        })
        .unwrap();

        let ktest = KTest::from_file(&dir.join("test000001.ktest")).unwrap();
        assert_eq!(ktest.objects[0].name, "x");
        assert_eq!(ktest.objects[0].bytes, vec![1, 2]);
        assert_eq!(fs::read_to_string(dir.join("test000001.path")).unwrap(), "10");
        assert!(dir.join("test000001.ptr.err").is_file());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn collecting_sink_filters_by_suffix() {
        let mut sink = CollectingSink::new();
        sink.process_test_case(TestCase { solution: vec![], path: vec![], message: None, suffix: None }).unwrap();
        sink.process_test_case(TestCase {
            solution: vec![],
            path: vec![],
            message: Some("oops".into()),
            suffix: Some("assert".into()),
        })
        .unwrap();
        assert_eq!(sink.completed().count(), 1);
        assert_eq!(sink.with_suffix("assert").count(), 1);
        assert_eq!(sink.with_suffix("ptr").count(), 0);
    }
}
