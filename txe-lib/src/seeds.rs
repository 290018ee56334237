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

//! Concrete test records in the KTest binary format (magic, versioned
//! header, argv strings, then a sequence of named byte objects; all
//! integers big-endian), used both for input seeds and for the test
//! cases the engine emits. [SeedInfo] tracks one seed during the
//! seeding phase: its cursor into the object stream and the concrete
//! bindings it induces for the arrays created so far.

use ahash::RandomState;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::ExecError;
use crate::expr::{ArrayId, ExprArena, ExprRef};

const KTEST_MAGIC: &[u8; 5] = b"KTEST";
const KTEST_VERSION: u32 = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KTestObject {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KTest {
    pub args: Vec<String>,
    pub sym_argvs: u32,
    pub sym_argv_len: u32,
    pub objects: Vec<KTestObject>,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, len: usize) -> Result<&'a [u8], ExecError> {
        let bytes =
            self.buf.get(self.pos..self.pos + len).ok_or_else(|| ExecError::BadIr("truncated ktest file".into()))?;
        self.pos += len;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32, ExecError> {
        Ok(u32::from_be_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String, ExecError> {
        let len = self.u32()? as usize;
        Ok(String::from_utf8_lossy(self.bytes(len)?).into_owned())
    }
}

impl KTest {
    pub fn parse(buf: &[u8]) -> Result<Self, ExecError> {
        let mut reader = Reader { buf, pos: 0 };
        if reader.bytes(5)? != KTEST_MAGIC {
            return Err(ExecError::BadIr("bad ktest magic".into()));
        }
        let version = reader.u32()?;
        if version > KTEST_VERSION {
            return Err(ExecError::BadIr(format!("unsupported ktest version {}", version)));
        }
        let num_args = reader.u32()? as usize;
        let mut args = Vec::with_capacity(num_args);
        for _ in 0..num_args {
            args.push(reader.string()?);
        }
        let (sym_argvs, sym_argv_len) = if version >= 2 { (reader.u32()?, reader.u32()?) } else { (0, 0) };
        let num_objects = reader.u32()? as usize;
        let mut objects = Vec::with_capacity(num_objects);
        for _ in 0..num_objects {
            let name = reader.string()?;
            let len = reader.u32()? as usize;
            objects.push(KTestObject { name, bytes: reader.bytes(len)?.to_vec() });
        }
        Ok(KTest { args, sym_argvs, sym_argv_len, objects })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(KTEST_MAGIC);
        buf.extend_from_slice(&KTEST_VERSION.to_be_bytes());
        buf.extend_from_slice(&(self.args.len() as u32).to_be_bytes());
        for arg in &self.args {
            buf.extend_from_slice(&(arg.len() as u32).to_be_bytes());
            buf.extend_from_slice(arg.as_bytes());
        }
        buf.extend_from_slice(&self.sym_argvs.to_be_bytes());
        buf.extend_from_slice(&self.sym_argv_len.to_be_bytes());
        buf.extend_from_slice(&(self.objects.len() as u32).to_be_bytes());
        for object in &self.objects {
            buf.extend_from_slice(&(object.name.len() as u32).to_be_bytes());
            buf.extend_from_slice(object.name.as_bytes());
            buf.extend_from_slice(&(object.bytes.len() as u32).to_be_bytes());
            buf.extend_from_slice(&object.bytes);
        }
        buf
    }

    pub fn from_file(path: &Path) -> Result<Self, ExecError> {
        Self::parse(&fs::read(path)?)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ExecError> {
        fs::write(path, self.serialize())?;
        Ok(())
    }
}

/// One seed being replayed: the record, a cursor over its objects for
/// positional matching, and the array bindings accumulated as the
/// seeded state makes memory symbolic.
#[derive(Clone, Debug)]
pub struct SeedInfo {
    pub ktest: KTest,
    position: usize,
    bindings: HashMap<ArrayId, Vec<u8>, RandomState>,
}

impl SeedInfo {
    pub fn new(ktest: KTest) -> Self {
        SeedInfo { ktest, position: 0, bindings: HashMap::default() }
    }

    /// The next seed object for a fresh symbolic allocation: matched
    /// by object name when `named` is set, by stream position
    /// otherwise.
    pub fn next_input(&mut self, name: &str, named: bool) -> Option<KTestObject> {
        if named {
            self.ktest.objects.iter().find(|obj| obj.name == name).cloned()
        } else {
            let object = self.ktest.objects.get(self.position).cloned();
            if object.is_some() {
                self.position += 1;
            }
            object
        }
    }

    pub fn fully_consumed(&self) -> bool {
        self.position >= self.ktest.objects.len()
    }

    pub fn bind(&mut self, array: ArrayId, bytes: Vec<u8>) {
        self.bindings.insert(array, bytes);
    }

    pub fn binding(&self, array: ArrayId) -> Option<&[u8]> {
        self.bindings.get(&array).map(|b| b.as_slice())
    }

    /// Evaluate an expression under this seed's bindings. Unbound
    /// arrays and out-of-range indices read as zero.
    pub fn evaluate(&self, arena: &ExprArena, e: ExprRef) -> Result<crate::bits::Bits, ExecError> {
        arena.eval(e, &|array, index| {
            self.bindings.get(&array).and_then(|bytes| bytes.get(index as usize)).copied().unwrap_or(0)
        })
    }

    /// Repair the seed after it violated a newly added constraint:
    /// re-solve for the bound arrays under the state's constraints and
    /// replace the bindings with the model.
    pub fn patch(
        &mut self,
        arena: &ExprArena,
        solver: &mut crate::solver::Solver,
        constraints: &crate::constraints::ConstraintSet,
    ) -> Result<(), ExecError> {
        let arrays: Vec<ArrayId> = {
            let mut keys: Vec<ArrayId> = self.bindings.keys().copied().collect();
            keys.sort();
            keys
        };
        let values = solver.get_initial_values(arena, constraints, &arrays)?;
        for (array, bytes) in arrays.into_iter().zip(values) {
            self.bindings.insert(array, bytes);
        }
        Ok(())
    }
}

/// Load every `.ktest` file in a directory, sorted by file name.
pub fn load_seed_dir(dir: &Path) -> Result<Vec<KTest>, ExecError> {
    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|e| e == "ktest").unwrap_or(false))
        .collect();
    paths.sort();
    paths.iter().map(|path| KTest::from_file(path)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, INDEX_WIDTH};
    use crate::solver::enumerate::EnumCore;
    use crate::solver::Solver;

    fn sample() -> KTest {
        KTest {
            args: vec!["prog".to_string(), "--sym".to_string()],
            sym_argvs: 0,
            sym_argv_len: 0,
            objects: vec![
                KTestObject { name: "x".to_string(), bytes: vec![0x41, 0x42] },
                KTestObject { name: "y".to_string(), bytes: vec![7] },
            ],
        }
    }

    #[test]
    fn serialize_parse_round_trip() {
        let ktest = sample();
        let parsed = KTest::parse(&ktest.serialize()).unwrap();
        assert_eq!(parsed, ktest);
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(KTest::parse(b"NOTKT\x00\x00\x00\x03").is_err());
    }

    #[test]
    fn positional_and_named_matching() {
        let mut seed = SeedInfo::new(sample());
        let first = seed.next_input("whatever", false).unwrap();
        assert_eq!(first.name, "x");
        let second = seed.next_input("whatever", false).unwrap();
        assert_eq!(second.name, "y");
        assert!(seed.next_input("whatever", false).is_none());
        assert!(seed.fully_consumed());

        let mut seed = SeedInfo::new(sample());
        let named = seed.next_input("y", true).unwrap();
        assert_eq!(named.bytes, vec![7]);
    }

    #[test]
    fn evaluate_under_bindings() {
        let mut arena = ExprArena::new();
        let array = arena.mk_array("x", 2);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let word = arena.mk_read_bytes(array, zero, 2);
        let mut seed = SeedInfo::new(sample());
        seed.bind(array, vec![0x41, 0x42]);
        let value = seed.evaluate(&arena, word).unwrap();
        assert_eq!(value, crate::bits::Bits::new(0x4241, 16));
    }

    #[test]
    fn patch_repairs_violated_seed() {
        let mut arena = ExprArena::new();
        let mut constraints = crate::constraints::ConstraintSet::new();
        let mut solver = Solver::new(Box::new(EnumCore::new()));
        let array = arena.mk_array("x", 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let x = arena.mk_read(array, zero);
        let ten = arena.mk_u64(10, 8);
        let lt = arena.mk_binary(BinOp::Ult, ten, x);
        constraints.add(&mut arena, lt).unwrap();

        let mut seed = SeedInfo::new(sample());
        seed.bind(array, vec![3]);
        assert!(!seed.evaluate(&arena, lt).unwrap().is_true());
        seed.patch(&arena, &mut solver, &constraints).unwrap();
        assert!(seed.evaluate(&arena, lt).unwrap().is_true());
    }
}
