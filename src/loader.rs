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

//! The reference loader for a small line-oriented textual IR, so the
//! engine is drivable end-to-end from the command line. One
//! instruction per line; tokens are whitespace-separated. Constants
//! are written `value:width`, registers `rN`, blocks `bN`, globals and
//! functions `@name`.
//!
//! ```text
//! global @input 2
//! func @main () {
//! b0:
//!   r0 = alloca 2:64
//!   call @se_make_symbolic r0 2:64 @input_name
//!   ...
//!   ret
//! }
//! ```

use txe_lib::bits::Bits;
use txe_lib::error::ExecError;
use txe_lib::ir::{
    BlockId, Callee, CastOp, CmpOp, FBinOp, FCmpOp, FunctionBuilder, Instr, IrBinOp, Module, ModuleBuilder,
    Operand, Reg,
};

fn bad(line_no: usize, message: &str) -> ExecError {
    ExecError::BadIr(format!("line {}: {}", line_no + 1, message))
}

fn parse_reg(token: &str, line_no: usize) -> Result<Reg, ExecError> {
    token
        .strip_prefix('r')
        .and_then(|n| n.parse::<u32>().ok())
        .map(Reg)
        .ok_or_else(|| bad(line_no, "expected register"))
}

fn parse_block(token: &str, line_no: usize) -> Result<BlockId, ExecError> {
    token
        .strip_prefix('b')
        .and_then(|n| n.parse::<u32>().ok())
        .map(BlockId)
        .ok_or_else(|| bad(line_no, "expected block"))
}

fn parse_width(token: &str, line_no: usize) -> Result<u32, ExecError> {
    token.parse::<u32>().map_err(|_| bad(line_no, "expected width"))
}

fn parse_const(token: &str, line_no: usize) -> Result<Bits, ExecError> {
    let (value, width) = token.split_once(':').ok_or_else(|| bad(line_no, "expected value:width"))?;
    let width = parse_width(width, line_no)?;
    let value = if let Some(hex) = value.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).map_err(|_| bad(line_no, "bad hex constant"))?
    } else if let Some(negative) = value.strip_prefix('-') {
        let magnitude = negative.parse::<i64>().map_err(|_| bad(line_no, "bad constant"))?;
        (-magnitude) as u64
    } else {
        value.parse::<u64>().map_err(|_| bad(line_no, "bad constant"))?
    };
    Ok(Bits::new(value, width))
}

struct OperandParser<'b> {
    builder: &'b mut ModuleBuilder,
}

impl<'b> OperandParser<'b> {
    fn parse(&mut self, token: &str, line_no: usize) -> Result<Operand, ExecError> {
        if token.starts_with('r') && token[1..].chars().all(|c| c.is_ascii_digit()) {
            return Ok(Operand::Reg(parse_reg(token, line_no)?));
        }
        if let Some(name) = token.strip_prefix('@') {
            let name = self.builder.intern(name);
            return Ok(Operand::Global(name));
        }
        if let Some(name) = token.strip_prefix('&') {
            let name = self.builder.intern(name);
            return Ok(Operand::Fun(name));
        }
        Ok(Operand::Const(parse_const(token, line_no)?))
    }
}

fn bin_op(token: &str) -> Option<IrBinOp> {
    Some(match token {
        "add" => IrBinOp::Add,
        "sub" => IrBinOp::Sub,
        "mul" => IrBinOp::Mul,
        "udiv" => IrBinOp::UDiv,
        "sdiv" => IrBinOp::SDiv,
        "urem" => IrBinOp::URem,
        "srem" => IrBinOp::SRem,
        "shl" => IrBinOp::Shl,
        "lshr" => IrBinOp::LShr,
        "ashr" => IrBinOp::AShr,
        "and" => IrBinOp::And,
        "or" => IrBinOp::Or,
        "xor" => IrBinOp::Xor,
        _ => return None,
    })
}

fn cmp_op(token: &str) -> Option<CmpOp> {
    Some(match token {
        "eq" => CmpOp::Eq,
        "ne" => CmpOp::Ne,
        "ult" => CmpOp::Ult,
        "ule" => CmpOp::Ule,
        "ugt" => CmpOp::Ugt,
        "uge" => CmpOp::Uge,
        "slt" => CmpOp::Slt,
        "sle" => CmpOp::Sle,
        "sgt" => CmpOp::Sgt,
        "sge" => CmpOp::Sge,
        _ => None?,
    })
}

pub fn parse_module(source: &str) -> Result<Module, ExecError> {
    let mut builder = ModuleBuilder::new();

    // First pass: declarations and globals, so operand resolution in
    // function bodies can tell globals from functions.
    let mut lines = source.lines().enumerate().peekable();
    let mut body: Vec<(usize, String)> = Vec::new();
    while let Some((line_no, raw)) = lines.next() {
        let line = strip_comment(raw);
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        match tokens[0] {
            "global" => {
                let name = tokens
                    .get(1)
                    .and_then(|t| t.strip_prefix('@'))
                    .ok_or_else(|| bad(line_no, "global needs a @name"))?;
                let size = tokens
                    .get(2)
                    .and_then(|t| t.parse::<u32>().ok())
                    .ok_or_else(|| bad(line_no, "global needs a size"))?;
                let read_only = tokens.get(3) == Some(&"ro");
                let init_token = if read_only { tokens.get(4) } else { tokens.get(3) };
                let init = match init_token {
                    Some(text) => parse_bytes(text, size, line_no)?,
                    None => vec![0; size as usize],
                };
                builder.global(name, size, read_only, init);
            }
            "declare" => {
                let name = tokens
                    .get(1)
                    .and_then(|t| t.strip_prefix('@'))
                    .ok_or_else(|| bad(line_no, "declare needs a @name"))?;
                builder.declare(name);
            }
            _ => body.push((line_no, line.to_string())),
        }
    }

    // Second pass: function bodies.
    let mut iter = body.into_iter().peekable();
    while let Some((line_no, line)) = iter.next() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        if tokens[0] != "func" {
            return Err(bad(line_no, "expected func"));
        }
        let name = tokens
            .get(1)
            .and_then(|t| t.strip_prefix('@'))
            .ok_or_else(|| bad(line_no, "func needs a @name"))?
            .to_string();
        let vararg = tokens.contains(&"vararg");

        // Argument list: tokens like r0:32:argc between ( and ).
        let mut arg_specs: Vec<(u32, String)> = Vec::new();
        for token in &tokens[2..] {
            let token = token.trim_matches(|c| c == '(' || c == ')' || c == ',' || c == '{');
            if token.is_empty() || token == "vararg" {
                continue;
            }
            let mut parts = token.split(':');
            let reg = parts.next().unwrap_or("");
            let width = parts.next().and_then(|w| w.parse::<u32>().ok());
            let var = parts.next().unwrap_or("").to_string();
            if let (Ok(reg_id), Some(width)) = (parse_reg(reg, line_no), width) {
                let _ = reg_id;
                arg_specs.push((width, var));
            }
        }

        let mut fun = builder.function(&name);
        for (width, var) in &arg_specs {
            fun.arg(var, *width);
        }
        if vararg {
            fun.vararg();
        }
        parse_function_body(&mut fun, &mut iter)?;
        fun.finish();
    }

    Ok(builder.finish())
}

fn parse_function_body(
    fun: &mut FunctionBuilder<'_>,
    iter: &mut std::iter::Peekable<std::vec::IntoIter<(usize, String)>>,
) -> Result<(), ExecError> {
    let mut current_block: Option<BlockId> = None;
    let mut max_reg: u32 = 0;
    let mut pending: Vec<(usize, Vec<String>, Option<BlockId>)> = Vec::new();

    // Collect the body first so every block exists before its uses.
    let mut block_count = 0u32;
    let mut raw_body: Vec<(usize, String)> = Vec::new();
    for (line_no, line) in iter.by_ref() {
        if line.trim() == "}" {
            break;
        }
        if line.trim().ends_with(':') {
            block_count += 1;
        }
        raw_body.push((line_no, line));
    }
    for _ in 0..block_count {
        fun.block();
    }

    for (line_no, line) in raw_body {
        let trimmed = line.trim();
        if let Some(label) = trimmed.strip_suffix(':') {
            current_block = Some(parse_block(label, line_no)?);
            continue;
        }
        let tokens: Vec<String> = trimmed.split_whitespace().map(|t| t.trim_matches(',').to_string()).collect();
        if tokens.is_empty() {
            continue;
        }
        for token in &tokens {
            if let Some(n) = token.strip_prefix('r').and_then(|n| n.parse::<u32>().ok()) {
                max_reg = max_reg.max(n + 1);
            }
        }
        pending.push((line_no, tokens, current_block));
    }

    while fun_next_reg(fun) < max_reg {
        fun.fresh_reg();
    }

    for (line_no, tokens, block) in pending {
        let block = block.ok_or_else(|| bad(line_no, "instruction outside a block"))?;
        let instr = parse_instr(fun, &tokens, line_no)?;
        fun.push(block, instr);
    }
    Ok(())
}

fn fun_next_reg(fun: &mut FunctionBuilder<'_>) -> u32 {
    // fresh_reg both reads and bumps; peek by allocating only in the
    // caller's loop.
    fun.peek_next_reg()
}

fn parse_instr(fun: &mut FunctionBuilder<'_>, tokens: &[String], line_no: usize) -> Result<Instr, ExecError> {
    let tokens: Vec<&str> = tokens.iter().map(|t| t.as_str()).collect();

    // Destination form: rN = <op> ...
    if tokens.len() >= 3 && tokens[1] == "=" {
        let dest = parse_reg(tokens[0], line_no)?;
        let op = tokens[2];
        let rest = &tokens[3..];
        let mut operands = OperandParser { builder: fun.module_mut() };

        if let Some(bin) = bin_op(op.trim_end_matches(".trap")) {
            let overflow_trap = op.ends_with(".trap");
            let width = parse_width(rest.first().copied().unwrap_or(""), line_no)?;
            let lhs = operands.parse(rest.get(1).copied().unwrap_or(""), line_no)?;
            let rhs = operands.parse(rest.get(2).copied().unwrap_or(""), line_no)?;
            return Ok(Instr::Binary { dest, op: bin, lhs, rhs, width, overflow_trap });
        }
        if op == "icmp" {
            let pred = cmp_op(rest.first().copied().unwrap_or(""))
                .ok_or_else(|| bad(line_no, "bad icmp predicate"))?;
            let width = parse_width(rest.get(1).copied().unwrap_or(""), line_no)?;
            let lhs = operands.parse(rest.get(2).copied().unwrap_or(""), line_no)?;
            let rhs = operands.parse(rest.get(3).copied().unwrap_or(""), line_no)?;
            return Ok(Instr::ICmp { dest, op: pred, lhs, rhs, width });
        }
        if let Some(fop) = fbin_op(op) {
            let width = parse_width(rest.first().copied().unwrap_or(""), line_no)?;
            let lhs = operands.parse(rest.get(1).copied().unwrap_or(""), line_no)?;
            let rhs = operands.parse(rest.get(2).copied().unwrap_or(""), line_no)?;
            return Ok(Instr::FBinary { dest, op: fop, lhs, rhs, width });
        }
        if op == "fcmp" {
            let pred = fcmp_op(rest.first().copied().unwrap_or(""))
                .ok_or_else(|| bad(line_no, "bad fcmp predicate"))?;
            let width = parse_width(rest.get(1).copied().unwrap_or(""), line_no)?;
            let lhs = operands.parse(rest.get(2).copied().unwrap_or(""), line_no)?;
            let rhs = operands.parse(rest.get(3).copied().unwrap_or(""), line_no)?;
            return Ok(Instr::FCmp { dest, op: pred, lhs, rhs, width });
        }
        if let Some(cast) = cast_op(op) {
            let to = parse_width(rest.first().copied().unwrap_or(""), line_no)?;
            let arg = operands.parse(rest.get(1).copied().unwrap_or(""), line_no)?;
            return Ok(Instr::Cast { dest, op: cast, arg, to });
        }
        if op == "select" {
            let width = parse_width(rest.first().copied().unwrap_or(""), line_no)?;
            let cond = operands.parse(rest.get(1).copied().unwrap_or(""), line_no)?;
            let on_true = operands.parse(rest.get(2).copied().unwrap_or(""), line_no)?;
            let on_false = operands.parse(rest.get(3).copied().unwrap_or(""), line_no)?;
            return Ok(Instr::Select { dest, cond, on_true, on_false, width });
        }
        if op == "phi" {
            let width = parse_width(rest.first().copied().unwrap_or(""), line_no)?;
            let mut incoming = Vec::new();
            let mut i = 1;
            while i + 1 < rest.len() {
                let block = parse_block(rest[i], line_no)?;
                let value = operands.parse(rest[i + 1], line_no)?;
                incoming.push((block, value));
                i += 2;
            }
            return Ok(Instr::Phi { dest, width, incoming });
        }
        if op == "alloca" {
            let size = operands.parse(rest.first().copied().unwrap_or(""), line_no)?;
            return Ok(Instr::Alloca { dest, size });
        }
        if op == "load" {
            let width = parse_width(rest.first().copied().unwrap_or(""), line_no)?;
            let addr = operands.parse(rest.get(1).copied().unwrap_or(""), line_no)?;
            return Ok(Instr::Load { dest, addr, width });
        }
        if op == "gep" {
            let base = operands.parse(rest.first().copied().unwrap_or(""), line_no)?;
            let offset =
                rest.get(1).and_then(|t| t.parse::<u64>().ok()).ok_or_else(|| bad(line_no, "gep offset"))?;
            let mut indices = Vec::new();
            let mut i = 2;
            while i + 1 < rest.len() {
                let index = operands.parse(rest[i], line_no)?;
                let elem = rest[i + 1].parse::<u64>().map_err(|_| bad(line_no, "gep element size"))?;
                indices.push((index, elem));
                i += 2;
            }
            return Ok(Instr::Gep { dest, base, offset, indices });
        }
        if op == "call" {
            let width = parse_width(rest.first().copied().unwrap_or(""), line_no)?;
            let (target, args) = parse_call_target(&mut operands, &rest[1..], line_no)?;
            return Ok(Instr::Call { dest: Some((dest, width)), target, args });
        }
        return Err(bad(line_no, "unknown instruction"));
    }

    // Value-less forms.
    let op = tokens[0];
    let rest = &tokens[1..];
    let mut operands = OperandParser { builder: fun.module_mut() };
    match op {
        "store" => {
            let width = parse_width(rest.first().copied().unwrap_or(""), line_no)?;
            let value = operands.parse(rest.get(1).copied().unwrap_or(""), line_no)?;
            let addr = operands.parse(rest.get(2).copied().unwrap_or(""), line_no)?;
            Ok(Instr::Store { value, addr, width })
        }
        "call" => {
            let (target, args) = parse_call_target(&mut operands, rest, line_no)?;
            Ok(Instr::Call { dest: None, target, args })
        }
        "ret" => {
            let value = match rest.first() {
                Some(token) => Some(operands.parse(token, line_no)?),
                None => None,
            };
            Ok(Instr::Ret { value })
        }
        "br" => Ok(Instr::Br { target: parse_block(rest.first().copied().unwrap_or(""), line_no)? }),
        "condbr" => {
            let cond = operands.parse(rest.first().copied().unwrap_or(""), line_no)?;
            let on_true = parse_block(rest.get(1).copied().unwrap_or(""), line_no)?;
            let on_false = parse_block(rest.get(2).copied().unwrap_or(""), line_no)?;
            Ok(Instr::CondBr { cond, on_true, on_false })
        }
        "switch" => {
            let width = parse_width(rest.first().copied().unwrap_or(""), line_no)?;
            let value = operands.parse(rest.get(1).copied().unwrap_or(""), line_no)?;
            let default = parse_block(rest.get(2).copied().unwrap_or(""), line_no)?;
            let mut cases = Vec::new();
            let mut i = 3;
            while i + 1 < rest.len() {
                let case = parse_const(&format!("{}:{}", rest[i], width), line_no)?;
                let target = parse_block(rest[i + 1], line_no)?;
                cases.push((case, target));
                i += 2;
            }
            Ok(Instr::Switch { value, width, default, cases })
        }
        "unreachable" => Ok(Instr::Unreachable),
        _ => Err(bad(line_no, "unknown instruction")),
    }
}

fn parse_call_target(
    operands: &mut OperandParser<'_>,
    tokens: &[&str],
    line_no: usize,
) -> Result<(Callee, Vec<Operand>), ExecError> {
    let head = tokens.first().copied().ok_or_else(|| bad(line_no, "call needs a target"))?;
    let target = if let Some(name) = head.strip_prefix('@') {
        Callee::Direct(operands.builder.intern(name))
    } else {
        Callee::Indirect(operands.parse(head, line_no)?)
    };
    let mut args = Vec::new();
    for token in &tokens[1..] {
        args.push(operands.parse(token, line_no)?);
    }
    Ok((target, args))
}

fn fbin_op(token: &str) -> Option<FBinOp> {
    Some(match token {
        "fadd" => FBinOp::FAdd,
        "fsub" => FBinOp::FSub,
        "fmul" => FBinOp::FMul,
        "fdiv" => FBinOp::FDiv,
        _ => return None,
    })
}

fn fcmp_op(token: &str) -> Option<FCmpOp> {
    Some(match token {
        "oeq" => FCmpOp::OEq,
        "one" => FCmpOp::ONe,
        "olt" => FCmpOp::OLt,
        "ole" => FCmpOp::OLe,
        "ogt" => FCmpOp::OGt,
        "oge" => FCmpOp::OGe,
        _ => return None,
    })
}

fn cast_op(token: &str) -> Option<CastOp> {
    Some(match token {
        "trunc" => CastOp::Trunc,
        "zext" => CastOp::ZExt,
        "sext" => CastOp::SExt,
        "bitcast" => CastOp::Bitcast,
        _ => return None,
    })
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(at) => &line[..at],
        None => line,
    }
}

/// Byte literal: hex pairs (`68656c6c6f00`) or `z<N>` for N zeros.
fn parse_bytes(token: &str, size: u32, line_no: usize) -> Result<Vec<u8>, ExecError> {
    if let Some(zeros) = token.strip_prefix('z') {
        let n = zeros.parse::<usize>().map_err(|_| bad(line_no, "bad zero run"))?;
        return Ok(vec![0; n.max(size as usize)]);
    }
    if token.len() % 2 != 0 {
        return Err(bad(line_no, "odd hex byte literal"));
    }
    let mut bytes = Vec::with_capacity(token.len() / 2);
    for i in (0..token.len()).step_by(2) {
        let byte = u8::from_str_radix(&token[i..i + 2], 16).map_err(|_| bad(line_no, "bad hex byte"))?;
        bytes.push(byte);
    }
    bytes.resize(size as usize, 0);
    Ok(bytes)
}

/// Render the module back in loader syntax; this is the `assembly.ll`
/// the output directory carries for reference.
pub fn dump_module(module: &Module) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    for global in &module.globals {
        let _ = write!(out, "global @{} {}", module.symtab.to_str(global.name), global.size);
        if global.read_only {
            out.push_str(" ro");
        }
        if global.init.iter().any(|b| *b != 0) {
            out.push(' ');
            for byte in &global.init {
                let _ = write!(out, "{:02x}", byte);
            }
        }
        out.push('\n');
    }
    for fun in &module.functions {
        if fun.is_declaration {
            let _ = writeln!(out, "declare @{}", module.symtab.to_str(fun.name));
            continue;
        }
        let _ = write!(out, "func @{} (", module.symtab.to_str(fun.name));
        for (i, ((reg, width), var)) in fun.args.iter().zip(&fun.arg_vars).enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "r{}:{}:{}", reg.0, width, module.symtab.to_str(*var));
        }
        out.push(')');
        if fun.is_vararg {
            out.push_str(" vararg");
        }
        out.push_str(" {\n");
        for (i, block) in fun.blocks.iter().enumerate() {
            let _ = writeln!(out, "b{}:", i);
            for instr in &block.instrs {
                let _ = writeln!(out, "  {}", instr.opcode_name());
            }
        }
        out.push_str("}\n");
    }
    out
}
