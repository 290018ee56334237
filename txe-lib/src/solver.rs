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

//! The solver façade. The SMT core behind it is opaque: anything
//! implementing [SolverCore] can answer the five query forms the
//! engine needs. The façade adds per-query timing statistics, the
//! per-state timeout, and an optional *forked* mode in which every
//! query runs in a forked child process so that runaway queries are
//! isolated from the engine (the parent always waits for the child, so
//! this is resource isolation rather than concurrency).

use std::time::{Duration, Instant};

use crate::bits::Bits;
use crate::constraints::ConstraintSet;
use crate::error::ExecError;
use crate::expr::{ArrayId, ExprArena, ExprRef};
use crate::stats;

pub mod enumerate;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Validity {
    True,
    False,
    Unknown,
}

/// The black-box SMT core. Assumptions are the state's path condition;
/// unsat cores are returned as subsets of the assumption slice.
pub trait SolverCore {
    /// Validity of `query` under the assumptions. On a conclusive
    /// answer the returned core is an unsat core of the implication
    /// proof that made it conclusive.
    fn evaluate(
        &mut self,
        arena: &ExprArena,
        assumptions: &[ExprRef],
        query: ExprRef,
    ) -> Result<(Validity, Vec<ExprRef>), ExecError>;

    /// Any model value of `query`. Fails with [ExecError::NoModel]
    /// only if the assumptions themselves are unsatisfiable, which on
    /// a live path is a bug.
    fn get_value(&mut self, arena: &ExprArena, assumptions: &[ExprRef], query: ExprRef) -> Result<Bits, ExecError>;

    fn must_be_true(&mut self, arena: &ExprArena, assumptions: &[ExprRef], query: ExprRef)
        -> Result<bool, ExecError>;

    /// Whether some model satisfies `query`; when the answer is no,
    /// also the unsat core of `assumptions ∧ query`.
    fn may_be_true(
        &mut self,
        arena: &ExprArena,
        assumptions: &[ExprRef],
        query: ExprRef,
    ) -> Result<(bool, Vec<ExprRef>), ExecError>;

    /// A concrete model for the listed arrays.
    fn get_initial_values(
        &mut self,
        arena: &ExprArena,
        assumptions: &[ExprRef],
        arrays: &[ArrayId],
    ) -> Result<Vec<Vec<u8>>, ExecError>;

    fn set_timeout(&mut self, timeout: Option<Duration>);

    /// Diagnostic rendering of a query.
    fn constraint_log(&self, arena: &ExprArena, assumptions: &[ExprRef], query: ExprRef) -> String;
}

pub struct Solver {
    core: Box<dyn SolverCore>,
    timeout: Option<Duration>,
    fork_queries: bool,
}

impl Solver {
    pub fn new(core: Box<dyn SolverCore>) -> Self {
        Solver { core, timeout: None, fork_queries: false }
    }

    pub fn forked(core: Box<dyn SolverCore>) -> Self {
        Solver { core, timeout: None, fork_queries: true }
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
        self.core.set_timeout(timeout);
    }

    fn timed<T>(
        &mut self,
        run: impl FnOnce(&mut dyn SolverCore) -> Result<T, ExecError>,
    ) -> Result<T, ExecError> {
        stats::bump(&stats::QUERIES);
        let start = Instant::now();
        let result = run(self.core.as_mut());
        stats::add_micros(&stats::SOLVER_TIME_MICROS, start.elapsed().as_micros() as u64);
        result
    }

    pub fn evaluate(
        &mut self,
        arena: &ExprArena,
        constraints: &ConstraintSet,
        query: ExprRef,
    ) -> Result<(Validity, Vec<ExprRef>), ExecError> {
        if self.fork_queries {
            let response = self.forked_query(arena, constraints, &forked::Request::Evaluate(query))?;
            return match response {
                forked::Response::Validity(v, core) => Ok((v, core)),
                other => Err(other.unexpected()),
            };
        }
        self.timed(|core| core.evaluate(arena, constraints.as_slice(), query))
    }

    pub fn get_value(
        &mut self,
        arena: &ExprArena,
        constraints: &ConstraintSet,
        query: ExprRef,
    ) -> Result<Bits, ExecError> {
        if let Some(bits) = arena.as_const(query) {
            return Ok(bits);
        }
        if self.fork_queries {
            let response = self.forked_query(arena, constraints, &forked::Request::GetValue(query))?;
            return match response {
                forked::Response::Value(bits) => Ok(bits),
                other => Err(other.unexpected()),
            };
        }
        self.timed(|core| core.get_value(arena, constraints.as_slice(), query))
    }

    pub fn must_be_true(
        &mut self,
        arena: &ExprArena,
        constraints: &ConstraintSet,
        query: ExprRef,
    ) -> Result<bool, ExecError> {
        if self.fork_queries {
            let response = self.forked_query(arena, constraints, &forked::Request::MustBeTrue(query))?;
            return match response {
                forked::Response::Bool(b, _) => Ok(b),
                other => Err(other.unexpected()),
            };
        }
        self.timed(|core| core.must_be_true(arena, constraints.as_slice(), query))
    }

    pub fn must_be_false(
        &mut self,
        arena: &mut ExprArena,
        constraints: &ConstraintSet,
        query: ExprRef,
    ) -> Result<bool, ExecError> {
        let negated = arena.mk_not_bool(query);
        self.must_be_true(arena, constraints, negated)
    }

    pub fn may_be_true(
        &mut self,
        arena: &ExprArena,
        constraints: &ConstraintSet,
        query: ExprRef,
    ) -> Result<(bool, Vec<ExprRef>), ExecError> {
        if self.fork_queries {
            let response = self.forked_query(arena, constraints, &forked::Request::MayBeTrue(query))?;
            return match response {
                forked::Response::Bool(b, core) => Ok((b, core)),
                other => Err(other.unexpected()),
            };
        }
        self.timed(|core| core.may_be_true(arena, constraints.as_slice(), query))
    }

    pub fn get_initial_values(
        &mut self,
        arena: &ExprArena,
        constraints: &ConstraintSet,
        arrays: &[ArrayId],
    ) -> Result<Vec<Vec<u8>>, ExecError> {
        if self.fork_queries {
            let response = self.forked_query(arena, constraints, &forked::Request::InitialValues(arrays.to_vec()))?;
            return match response {
                forked::Response::Model(values) => Ok(values),
                other => Err(other.unexpected()),
            };
        }
        self.timed(|core| core.get_initial_values(arena, constraints.as_slice(), arrays))
    }

    pub fn constraint_log(&self, arena: &ExprArena, constraints: &ConstraintSet, query: ExprRef) -> String {
        self.core.constraint_log(arena, constraints.as_slice(), query)
    }

    fn forked_query(
        &mut self,
        arena: &ExprArena,
        constraints: &ConstraintSet,
        request: &forked::Request,
    ) -> Result<forked::Response, ExecError> {
        stats::bump(&stats::QUERIES);
        let start = Instant::now();
        let result = forked::run_in_child(self.core.as_mut(), arena, constraints.as_slice(), request);
        stats::add_micros(&stats::SOLVER_TIME_MICROS, start.elapsed().as_micros() as u64);
        result
    }
}

/// Running a query in a forked child. The child inherits the engine's
/// whole address space copy-on-write, runs the query against its own
/// copy of the core, and writes a length-framed response on a pipe.
/// The parent blocks until the child exits; a child that dies without
/// producing a response surfaces as a solver failure, never as engine
/// death.
mod forked {
    use super::{SolverCore, Validity};
    use crate::bits::Bits;
    use crate::error::ExecError;
    use crate::expr::{ArrayId, ExprArena, ExprRef};
    use std::io::{Read, Write};

    pub enum Request {
        Evaluate(ExprRef),
        GetValue(ExprRef),
        MustBeTrue(ExprRef),
        MayBeTrue(ExprRef),
        InitialValues(Vec<ArrayId>),
    }

    #[derive(Debug)]
    pub enum Response {
        Validity(Validity, Vec<ExprRef>),
        Bool(bool, Vec<ExprRef>),
        Value(Bits),
        Model(Vec<Vec<u8>>),
        Failed(String),
        TimedOut,
    }

    impl Response {
        pub fn unexpected(self) -> ExecError {
            match self {
                Response::Failed(msg) => ExecError::SolverFailure(msg),
                Response::TimedOut => ExecError::Timeout,
                other => ExecError::SolverFailure(format!("unexpected forked solver response: {:?}", other)),
            }
        }
    }

    fn push_u32(buf: &mut Vec<u8>, value: u32) {
        buf.extend_from_slice(&value.to_le_bytes());
    }

    fn push_refs(buf: &mut Vec<u8>, refs: &[ExprRef]) {
        push_u32(buf, refs.len() as u32);
        for e in refs {
            push_u32(buf, e.0);
        }
    }

    fn encode(response: &Response) -> Vec<u8> {
        let mut buf = Vec::new();
        match response {
            Response::Validity(v, core) => {
                buf.push(0);
                buf.push(match v {
                    Validity::True => 0,
                    Validity::False => 1,
                    Validity::Unknown => 2,
                });
                push_refs(&mut buf, core);
            }
            Response::Bool(b, core) => {
                buf.push(1);
                buf.push(*b as u8);
                push_refs(&mut buf, core);
            }
            Response::Value(bits) => {
                buf.push(2);
                buf.extend_from_slice(&bits.lower_u64().to_le_bytes());
                push_u32(&mut buf, bits.len());
            }
            Response::Model(values) => {
                buf.push(3);
                push_u32(&mut buf, values.len() as u32);
                for bytes in values {
                    push_u32(&mut buf, bytes.len() as u32);
                    buf.extend_from_slice(bytes);
                }
            }
            Response::Failed(msg) => {
                buf.push(4);
                push_u32(&mut buf, msg.len() as u32);
                buf.extend_from_slice(msg.as_bytes());
            }
            Response::TimedOut => buf.push(5),
        }
        buf
    }

    struct Cursor<'a> {
        buf: &'a [u8],
        pos: usize,
    }

    impl<'a> Cursor<'a> {
        fn u8(&mut self) -> Result<u8, ExecError> {
            let b = *self.buf.get(self.pos).ok_or_else(short)?;
            self.pos += 1;
            Ok(b)
        }

        fn u32(&mut self) -> Result<u32, ExecError> {
            let bytes = self.buf.get(self.pos..self.pos + 4).ok_or_else(short)?;
            self.pos += 4;
            Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
        }

        fn u64(&mut self) -> Result<u64, ExecError> {
            let bytes = self.buf.get(self.pos..self.pos + 8).ok_or_else(short)?;
            self.pos += 8;
            Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
        }

        fn bytes(&mut self, len: usize) -> Result<&'a [u8], ExecError> {
            let bytes = self.buf.get(self.pos..self.pos + len).ok_or_else(short)?;
            self.pos += len;
            Ok(bytes)
        }

        fn refs(&mut self) -> Result<Vec<ExprRef>, ExecError> {
            let len = self.u32()? as usize;
            (0..len).map(|_| Ok(ExprRef(self.u32()?))).collect()
        }
    }

    fn short() -> ExecError {
        ExecError::SolverFailure("truncated forked solver response".to_string())
    }

    fn decode(buf: &[u8]) -> Result<Response, ExecError> {
        let mut cursor = Cursor { buf, pos: 0 };
        match cursor.u8()? {
            0 => {
                let v = match cursor.u8()? {
                    0 => Validity::True,
                    1 => Validity::False,
                    _ => Validity::Unknown,
                };
                Ok(Response::Validity(v, cursor.refs()?))
            }
            1 => {
                let b = cursor.u8()? != 0;
                Ok(Response::Bool(b, cursor.refs()?))
            }
            2 => {
                let bits = cursor.u64()?;
                let len = cursor.u32()?;
                Ok(Response::Value(Bits::new(bits, len)))
            }
            3 => {
                let count = cursor.u32()? as usize;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    let len = cursor.u32()? as usize;
                    values.push(cursor.bytes(len)?.to_vec());
                }
                Ok(Response::Model(values))
            }
            4 => {
                let len = cursor.u32()? as usize;
                let msg = String::from_utf8_lossy(cursor.bytes(len)?).into_owned();
                Ok(Response::Failed(msg))
            }
            5 => Ok(Response::TimedOut),
            _ => Err(ExecError::SolverFailure("bad forked solver response tag".to_string())),
        }
    }

    fn answer(
        core: &mut dyn SolverCore,
        arena: &ExprArena,
        assumptions: &[ExprRef],
        request: &Request,
    ) -> Response {
        let result = match request {
            Request::Evaluate(query) => {
                core.evaluate(arena, assumptions, *query).map(|(v, core)| Response::Validity(v, core))
            }
            Request::GetValue(query) => core.get_value(arena, assumptions, *query).map(Response::Value),
            Request::MustBeTrue(query) => {
                core.must_be_true(arena, assumptions, *query).map(|b| Response::Bool(b, Vec::new()))
            }
            Request::MayBeTrue(query) => {
                core.may_be_true(arena, assumptions, *query).map(|(b, core)| Response::Bool(b, core))
            }
            Request::InitialValues(arrays) => {
                core.get_initial_values(arena, assumptions, arrays).map(Response::Model)
            }
        };
        match result {
            Ok(response) => response,
            Err(ExecError::Timeout) => Response::TimedOut,
            Err(err) => Response::Failed(err.to_string()),
        }
    }

    pub fn run_in_child(
        core: &mut dyn SolverCore,
        arena: &ExprArena,
        assumptions: &[ExprRef],
        request: &Request,
    ) -> Result<Response, ExecError> {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(ExecError::SolverFailure("pipe failed".to_string()));
        }
        let (read_fd, write_fd) = (fds[0], fds[1]);

        match unsafe { libc::fork() } {
            -1 => {
                unsafe {
                    libc::close(read_fd);
                    libc::close(write_fd);
                }
                Err(ExecError::SolverFailure("fork failed".to_string()))
            }
            0 => {
                // Child: answer the query and exit without running any
                // of the parent's destructors.
                unsafe { libc::close(read_fd) };
                let response = answer(core, arena, assumptions, request);
                let buf = encode(&response);
                let mut file = unsafe { <std::fs::File as std::os::unix::io::FromRawFd>::from_raw_fd(write_fd) };
                let _ = file.write_all(&(buf.len() as u32).to_le_bytes());
                let _ = file.write_all(&buf);
                let _ = file.flush();
                drop(file);
                unsafe { libc::_exit(0) }
            }
            pid => {
                unsafe { libc::close(write_fd) };
                let mut file = unsafe { <std::fs::File as std::os::unix::io::FromRawFd>::from_raw_fd(read_fd) };
                let mut len_bytes = [0u8; 4];
                let read_result = file.read_exact(&mut len_bytes).and_then(|_| {
                    let mut buf = vec![0u8; u32::from_le_bytes(len_bytes) as usize];
                    file.read_exact(&mut buf).map(|_| buf)
                });
                let mut status = 0i32;
                unsafe { libc::waitpid(pid, &mut status, 0) };
                match read_result {
                    Ok(buf) => match decode(&buf)? {
                        Response::TimedOut => Err(ExecError::Timeout),
                        Response::Failed(msg) => Err(ExecError::SolverFailure(msg)),
                        response => Ok(response),
                    },
                    Err(_) => Err(ExecError::SolverFailure("forked solver died without responding".to_string())),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::enumerate::EnumCore;
    use super::*;
    use crate::expr::INDEX_WIDTH;

    fn setup() -> (ExprArena, ConstraintSet, Solver) {
        (ExprArena::new(), ConstraintSet::new(), Solver::new(Box::new(EnumCore::new())))
    }

    #[test]
    fn constant_get_value_skips_core() {
        let (mut arena, constraints, mut solver) = setup();
        let five = arena.mk_u64(5, 8);
        assert_eq!(solver.get_value(&arena, &constraints, five).unwrap(), Bits::new(5, 8));
    }

    #[test]
    fn forked_query_round_trip() {
        let mut arena = ExprArena::new();
        let mut constraints = ConstraintSet::new();
        let mut solver = Solver::forked(Box::new(EnumCore::new()));
        let x = arena.mk_array("x", 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let read = arena.mk_read(x, zero);
        let ten = arena.mk_u64(10, 8);
        let lt = arena.mk_binary(crate::expr::BinOp::Ult, read, ten);
        constraints.add(&mut arena, lt).unwrap();

        let (validity, _) = solver.evaluate(&arena, &constraints, lt).unwrap();
        assert_eq!(validity, Validity::True);

        let five = arena.mk_u64(5, 8);
        let eq = arena.mk_binary(crate::expr::BinOp::Eq, read, five);
        let (validity, _) = solver.evaluate(&arena, &constraints, eq).unwrap();
        assert_eq!(validity, Validity::Unknown);

        let model = solver.get_initial_values(&arena, &constraints, &[x]).unwrap();
        assert_eq!(model.len(), 1);
        assert!(Bits::from_u8(model[0][0]).ult(Bits::new(10, 8)));
    }
}
