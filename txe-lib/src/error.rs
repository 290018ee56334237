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

use std::error::Error;
use std::fmt;

/// Internal engine errors. These are distinct from guest-level
/// terminations ([TerminateReason]): an `ExecError` either aborts the
/// current state with a reason derived from it, or indicates an engine
/// bug (propagated out of the run loop).
#[derive(Debug)]
pub enum ExecError {
    Type(&'static str),
    /// Attempt to add a constraint already known to be false.
    InvalidConstraint,
    /// The solver could not answer within the per-query timeout.
    Timeout,
    /// The solver failed for a reason other than a timeout.
    SolverFailure(String),
    /// A model was requested on an unsatisfiable path condition.
    NoModel,
    /// Divergence from a recorded branch trace during replay.
    Unreachable(String),
    /// Reference to an unbound register, block, or function.
    Unbound(String),
    /// Structurally invalid IR reached the interpreter.
    BadIr(String),
    /// An unimplemented instruction form.
    Unsupported(&'static str),
    Io(std::io::Error),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::Type(msg) => write!(f, "type error: {}", msg),
            ExecError::InvalidConstraint => write!(f, "attempt to add invalid constraint"),
            ExecError::Timeout => write!(f, "solver timeout"),
            ExecError::SolverFailure(msg) => write!(f, "solver failure: {}", msg),
            ExecError::NoModel => write!(f, "no model for satisfiable path condition"),
            ExecError::Unreachable(msg) => write!(f, "replay divergence: {}", msg),
            ExecError::Unbound(name) => write!(f, "unbound name: {}", name),
            ExecError::BadIr(msg) => write!(f, "malformed IR: {}", msg),
            ExecError::Unsupported(msg) => write!(f, "unsupported: {}", msg),
            ExecError::Io(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl Error for ExecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExecError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Io(err)
    }
}

/// Why a state stopped executing. Error reasons produce a test case
/// with the corresponding file suffix; none of them is fatal to the
/// engine as a whole.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TerminateReason {
    Abort,
    Assert,
    Exec,
    External,
    Free,
    Model,
    Overflow,
    Ptr,
    ReadOnly,
    ReportError,
    User,
    Unhandled,
}

impl TerminateReason {
    /// The suffix used for the test-case file of an error of this kind.
    pub fn suffix(self) -> &'static str {
        match self {
            TerminateReason::Abort => "abort",
            TerminateReason::Assert => "assert",
            TerminateReason::Exec => "exec",
            TerminateReason::External => "external",
            TerminateReason::Free => "free",
            TerminateReason::Model => "model",
            TerminateReason::Overflow => "overflow",
            TerminateReason::Ptr => "ptr",
            TerminateReason::ReadOnly => "readonly",
            TerminateReason::ReportError => "reporterror",
            TerminateReason::User => "user",
            TerminateReason::Unhandled => "xxx",
        }
    }
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Non-error ways a state can stop early.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EarlyTerminateReason {
    /// A solver query timed out.
    QueryTimeout,
    /// The interpolation tree proved the state redundant.
    Subsumed,
    MaxDepth,
    MemoryCap,
    /// Execution halting (interrupt or instruction budget).
    Halt,
}

impl fmt::Display for EarlyTerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EarlyTerminateReason::QueryTimeout => write!(f, "query timed out"),
            EarlyTerminateReason::Subsumed => write!(f, "subsumed"),
            EarlyTerminateReason::MaxDepth => write!(f, "max-depth exceeded"),
            EarlyTerminateReason::MemoryCap => write!(f, "memory limit exceeded"),
            EarlyTerminateReason::Halt => write!(f, "execution halting"),
        }
    }
}
