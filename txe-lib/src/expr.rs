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

//! The symbolic expression algebra: an immutable, hash-consed DAG over
//! fixed-width bitvectors and byte arrays. Expressions are built
//! through the smart constructors on [ExprArena], which fold constants,
//! canonicalize commutative operators, and deduplicate structurally
//! equal sub-DAGs so that equality of [ExprRef] handles implies
//! equality of expressions. Booleans are 1-bit vectors.

use ahash::RandomState;
use std::collections::HashMap;
use std::fmt::Write;

use crate::bits::Bits;
use crate::error::ExecError;

/// Index of an interned symbolic array.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayId(pub(crate) u32);

/// Handle of a hash-consed expression node. Two handles are equal iff
/// the expressions are structurally equal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprRef(pub(crate) u32);

/// Width of array read indices.
pub const INDEX_WIDTH: u32 = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    Concat,
    // Comparisons, all of width 1
    Eq,
    Ne,
    Ult,
    Ule,
    Slt,
    Sle,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        use BinOp::*;
        matches!(self, Eq | Ne | Ult | Ule | Slt | Sle)
    }

    fn is_commutative(self) -> bool {
        use BinOp::*;
        matches!(self, Add | Mul | And | Or | Xor | Eq | Ne)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExprKind {
    Const(Bits),
    /// A byte read from a symbolic array at a (possibly symbolic)
    /// index of width [INDEX_WIDTH]. Always 8 bits wide.
    Read { array: ArrayId, index: ExprRef },
    Unary { op: UnOp, arg: ExprRef },
    Binary { op: BinOp, lhs: ExprRef, rhs: ExprRef },
    Extract { hi: u32, lo: u32, arg: ExprRef },
    ZExt { arg: ExprRef, to: u32 },
    SExt { arg: ExprRef, to: u32 },
    /// If-then-else over two expressions of equal width.
    Select { cond: ExprRef, tt: ExprRef, ff: ExprRef },
}

#[derive(Clone, Debug)]
struct Node {
    kind: ExprKind,
    width: u32,
}

/// A named byte-indexed symbolic source. `shadow` links an array to its
/// existentially-quantified twin used when interpolants are stored.
#[derive(Clone, Debug)]
pub struct ArrayInfo {
    pub name: String,
    pub size: u32,
    pub shadow: Option<ArrayId>,
    /// Set on shadow arrays, pointing back at the original.
    pub shadow_of: Option<ArrayId>,
}

pub struct ExprArena {
    nodes: Vec<Node>,
    dedup: HashMap<ExprKind, ExprRef, RandomState>,
    arrays: Vec<ArrayInfo>,
}

impl Default for ExprArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprArena {
    pub fn new() -> Self {
        ExprArena { nodes: Vec::new(), dedup: HashMap::default(), arrays: Vec::new() }
    }

    pub fn mk_array(&mut self, name: &str, size: u32) -> ArrayId {
        let id = ArrayId(self.arrays.len() as u32);
        self.arrays.push(ArrayInfo { name: name.to_string(), size, shadow: None, shadow_of: None });
        id
    }

    /// The shadow twin of `array`, created on first use. Shadows of
    /// shadows are not allowed.
    pub fn shadow_array(&mut self, array: ArrayId) -> ArrayId {
        assert!(self.arrays[array.0 as usize].shadow_of.is_none());
        if let Some(shadow) = self.arrays[array.0 as usize].shadow {
            return shadow;
        }
        let info = &self.arrays[array.0 as usize];
        let name = format!("{}#shadow", info.name);
        let size = info.size;
        let shadow = ArrayId(self.arrays.len() as u32);
        self.arrays.push(ArrayInfo { name, size, shadow: None, shadow_of: Some(array) });
        self.arrays[array.0 as usize].shadow = Some(shadow);
        shadow
    }

    pub fn array_info(&self, array: ArrayId) -> &ArrayInfo {
        &self.arrays[array.0 as usize]
    }

    pub fn num_arrays(&self) -> usize {
        self.arrays.len()
    }

    pub fn kind(&self, e: ExprRef) -> ExprKind {
        self.nodes[e.0 as usize].kind
    }

    pub fn width(&self, e: ExprRef) -> u32 {
        self.nodes[e.0 as usize].width
    }

    pub fn as_const(&self, e: ExprRef) -> Option<Bits> {
        match self.kind(e) {
            ExprKind::Const(bits) => Some(bits),
            _ => None,
        }
    }

    pub fn is_true(&self, e: ExprRef) -> bool {
        self.as_const(e).map(|b| b.len() == 1 && b.is_true()).unwrap_or(false)
    }

    pub fn is_false(&self, e: ExprRef) -> bool {
        self.as_const(e).map(|b| b.len() == 1 && !b.is_true()).unwrap_or(false)
    }

    fn intern(&mut self, kind: ExprKind, width: u32) -> ExprRef {
        if let Some(e) = self.dedup.get(&kind) {
            return *e;
        }
        let e = ExprRef(self.nodes.len() as u32);
        self.nodes.push(Node { kind, width });
        self.dedup.insert(kind, e);
        e
    }

    pub fn mk_const(&mut self, bits: Bits) -> ExprRef {
        let width = bits.len();
        self.intern(ExprKind::Const(bits), width)
    }

    pub fn mk_bool(&mut self, b: bool) -> ExprRef {
        self.mk_const(Bits::bool(b))
    }

    pub fn mk_u64(&mut self, value: u64, width: u32) -> ExprRef {
        self.mk_const(Bits::new(value, width))
    }

    pub fn mk_read(&mut self, array: ArrayId, index: ExprRef) -> ExprRef {
        assert_eq!(self.width(index), INDEX_WIDTH);
        self.intern(ExprKind::Read { array, index }, 8)
    }

    pub fn mk_unary(&mut self, op: UnOp, arg: ExprRef) -> ExprRef {
        let width = self.width(arg);
        if let Some(bits) = self.as_const(arg) {
            let folded = match op {
                UnOp::Not => !bits,
                UnOp::Neg => -bits,
            };
            return self.mk_const(folded);
        }
        // Involution: not (not x) = x, neg (neg x) = x
        if let ExprKind::Unary { op: inner_op, arg: inner } = self.kind(arg) {
            if inner_op == op {
                return inner;
            }
        }
        self.intern(ExprKind::Unary { op, arg }, width)
    }

    pub fn mk_binary(&mut self, op: BinOp, mut lhs: ExprRef, mut rhs: ExprRef) -> ExprRef {
        if op != BinOp::Concat {
            assert_eq!(self.width(lhs), self.width(rhs), "operand width mismatch");
        }
        if let (Some(a), Some(b)) = (self.as_const(lhs), self.as_const(rhs)) {
            if let Some(folded) = fold_binary(op, a, b) {
                return self.mk_const(folded);
            }
        }
        // Canonical order for commutative operators: constants first,
        // otherwise ordered by handle.
        if op.is_commutative() {
            let swap = match (self.as_const(lhs), self.as_const(rhs)) {
                (None, Some(_)) => true,
                (None, None) => rhs < lhs,
                _ => false,
            };
            if swap {
                std::mem::swap(&mut lhs, &mut rhs);
            }
        }
        // Structural identities on shared handles.
        if lhs == rhs {
            match op {
                BinOp::Eq | BinOp::Ule | BinOp::Sle => return self.mk_bool(true),
                BinOp::Ne | BinOp::Ult | BinOp::Slt => return self.mk_bool(false),
                BinOp::Sub | BinOp::Xor => return self.mk_const(Bits::zeros(self.width(lhs))),
                BinOp::And | BinOp::Or => return lhs,
                _ => (),
            }
        }
        // Identity elements.
        if let Some(a) = self.as_const(lhs) {
            match op {
                BinOp::Add | BinOp::Or | BinOp::Xor if a.is_zero() => return rhs,
                BinOp::And if a.is_zero() => return lhs,
                BinOp::And if a == Bits::ones(a.len()) => return rhs,
                BinOp::Mul if a == Bits::new(1, a.len()) => return rhs,
                BinOp::Mul if a.is_zero() => return lhs,
                _ => (),
            }
        }
        let width = match op {
            _ if op.is_comparison() => 1,
            BinOp::Concat => self.width(lhs) + self.width(rhs),
            _ => self.width(lhs),
        };
        assert!(width <= 64, "expression width out of range");
        self.intern(ExprKind::Binary { op, lhs, rhs }, width)
    }

    pub fn mk_extract(&mut self, hi: u32, lo: u32, arg: ExprRef) -> ExprRef {
        assert!(lo <= hi && hi < self.width(arg));
        if let Some(bits) = self.as_const(arg) {
            return self.mk_const(bits.extract(hi, lo).unwrap());
        }
        if lo == 0 && hi + 1 == self.width(arg) {
            return arg;
        }
        // Coalesce extract-of-concat when the slice lands entirely in
        // one side.
        if let ExprKind::Binary { op: BinOp::Concat, lhs, rhs } = self.kind(arg) {
            let lo_width = self.width(rhs);
            if hi < lo_width {
                return self.mk_extract(hi, lo, rhs);
            }
            if lo >= lo_width {
                return self.mk_extract(hi - lo_width, lo - lo_width, lhs);
            }
        }
        // extract (extract x) folds into a single extract
        if let ExprKind::Extract { lo: inner_lo, arg: inner, .. } = self.kind(arg) {
            return self.mk_extract(inner_lo + hi, inner_lo + lo, inner);
        }
        self.intern(ExprKind::Extract { hi, lo, arg }, (hi - lo) + 1)
    }

    pub fn mk_zext(&mut self, arg: ExprRef, to: u32) -> ExprRef {
        let width = self.width(arg);
        assert!(to >= width && to <= 64);
        if to == width {
            return arg;
        }
        if let Some(bits) = self.as_const(arg) {
            return self.mk_const(bits.zero_extend(to));
        }
        self.intern(ExprKind::ZExt { arg, to }, to)
    }

    pub fn mk_sext(&mut self, arg: ExprRef, to: u32) -> ExprRef {
        let width = self.width(arg);
        assert!(to >= width && to <= 64);
        if to == width {
            return arg;
        }
        if let Some(bits) = self.as_const(arg) {
            return self.mk_const(bits.sign_extend(to));
        }
        self.intern(ExprKind::SExt { arg, to }, to)
    }

    pub fn mk_select(&mut self, cond: ExprRef, tt: ExprRef, ff: ExprRef) -> ExprRef {
        assert_eq!(self.width(cond), 1);
        assert_eq!(self.width(tt), self.width(ff));
        if self.is_true(cond) {
            return tt;
        }
        if self.is_false(cond) {
            return ff;
        }
        if tt == ff {
            return tt;
        }
        let width = self.width(tt);
        self.intern(ExprKind::Select { cond, tt, ff }, width)
    }

    /// `e == 0`, as a 1-bit expression. For 1-bit operands this is
    /// boolean negation.
    pub fn mk_is_zero(&mut self, e: ExprRef) -> ExprRef {
        let zero = self.mk_const(Bits::zeros(self.width(e)));
        self.mk_binary(BinOp::Eq, e, zero)
    }

    pub fn mk_not_bool(&mut self, e: ExprRef) -> ExprRef {
        assert_eq!(self.width(e), 1);
        self.mk_is_zero(e)
    }

    pub fn mk_and_bool(&mut self, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        self.mk_binary(BinOp::And, lhs, rhs)
    }

    pub fn mk_or_bool(&mut self, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        self.mk_binary(BinOp::Or, lhs, rhs)
    }

    /// Read `bytes` consecutive bytes from `array` starting at `index`,
    /// little-endian, as one `8 * bytes` wide expression.
    pub fn mk_read_bytes(&mut self, array: ArrayId, index: ExprRef, bytes: u32) -> ExprRef {
        assert!(bytes >= 1 && bytes <= 8);
        let mut result = self.mk_read(array, index);
        for i in 1..bytes {
            let offset = self.mk_u64(i as u64, INDEX_WIDTH);
            let byte_index = self.mk_binary(BinOp::Add, index, offset);
            let byte = self.mk_read(array, byte_index);
            result = self.mk_binary(BinOp::Concat, byte, result);
        }
        result
    }

    /// Collect every array mentioned by `e` into `out`.
    pub fn collect_arrays(&self, e: ExprRef, out: &mut Vec<ArrayId>) {
        let mut seen: HashMap<ExprRef, (), RandomState> = HashMap::default();
        let mut stack = vec![e];
        while let Some(e) = stack.pop() {
            if seen.insert(e, ()).is_some() {
                continue;
            }
            match self.kind(e) {
                ExprKind::Const(_) => (),
                ExprKind::Read { array, index } => {
                    if !out.contains(&array) {
                        out.push(array);
                    }
                    stack.push(index);
                }
                ExprKind::Unary { arg, .. } | ExprKind::Extract { arg, .. } => stack.push(arg),
                ExprKind::ZExt { arg, .. } | ExprKind::SExt { arg, .. } => stack.push(arg),
                ExprKind::Binary { lhs, rhs, .. } => {
                    stack.push(lhs);
                    stack.push(rhs);
                }
                ExprKind::Select { cond, tt, ff } => {
                    stack.push(cond);
                    stack.push(tt);
                    stack.push(ff);
                }
            }
        }
    }

    /// Rebuild `e` with every node that appears as a key in `map`
    /// replaced by its image. Substitution is bottom-up, so replaced
    /// sub-expressions are re-simplified by the smart constructors.
    pub fn substitute(&mut self, e: ExprRef, map: &HashMap<ExprRef, ExprRef, RandomState>) -> ExprRef {
        let mut memo: HashMap<ExprRef, ExprRef, RandomState> = HashMap::default();
        self.substitute_memo(e, map, &mut memo)
    }

    fn substitute_memo(
        &mut self,
        e: ExprRef,
        map: &HashMap<ExprRef, ExprRef, RandomState>,
        memo: &mut HashMap<ExprRef, ExprRef, RandomState>,
    ) -> ExprRef {
        if let Some(image) = map.get(&e) {
            return *image;
        }
        if let Some(done) = memo.get(&e) {
            return *done;
        }
        let result = match self.kind(e) {
            ExprKind::Const(_) => e,
            ExprKind::Read { array, index } => {
                let index = self.substitute_memo(index, map, memo);
                self.mk_read(array, index)
            }
            ExprKind::Unary { op, arg } => {
                let arg = self.substitute_memo(arg, map, memo);
                self.mk_unary(op, arg)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.substitute_memo(lhs, map, memo);
                let rhs = self.substitute_memo(rhs, map, memo);
                self.mk_binary(op, lhs, rhs)
            }
            ExprKind::Extract { hi, lo, arg } => {
                let arg = self.substitute_memo(arg, map, memo);
                self.mk_extract(hi, lo, arg)
            }
            ExprKind::ZExt { arg, to } => {
                let arg = self.substitute_memo(arg, map, memo);
                self.mk_zext(arg, to)
            }
            ExprKind::SExt { arg, to } => {
                let arg = self.substitute_memo(arg, map, memo);
                self.mk_sext(arg, to)
            }
            ExprKind::Select { cond, tt, ff } => {
                let cond = self.substitute_memo(cond, map, memo);
                let tt = self.substitute_memo(tt, map, memo);
                let ff = self.substitute_memo(ff, map, memo);
                self.mk_select(cond, tt, ff)
            }
        };
        memo.insert(e, result);
        result
    }

    /// Rebuild `e` with each array replaced through `rename`.
    pub fn rename_arrays(&mut self, e: ExprRef, rename: &HashMap<ArrayId, ArrayId, RandomState>) -> ExprRef {
        match self.kind(e) {
            ExprKind::Const(_) => e,
            ExprKind::Read { array, index } => {
                let index = self.rename_arrays(index, rename);
                let array = rename.get(&array).copied().unwrap_or(array);
                self.mk_read(array, index)
            }
            ExprKind::Unary { op, arg } => {
                let arg = self.rename_arrays(arg, rename);
                self.mk_unary(op, arg)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.rename_arrays(lhs, rename);
                let rhs = self.rename_arrays(rhs, rename);
                self.mk_binary(op, lhs, rhs)
            }
            ExprKind::Extract { hi, lo, arg } => {
                let arg = self.rename_arrays(arg, rename);
                self.mk_extract(hi, lo, arg)
            }
            ExprKind::ZExt { arg, to } => {
                let arg = self.rename_arrays(arg, rename);
                self.mk_zext(arg, to)
            }
            ExprKind::SExt { arg, to } => {
                let arg = self.rename_arrays(arg, rename);
                self.mk_sext(arg, to)
            }
            ExprKind::Select { cond, tt, ff } => {
                let cond = self.rename_arrays(cond, rename);
                let tt = self.rename_arrays(tt, rename);
                let ff = self.rename_arrays(ff, rename);
                self.mk_select(cond, tt, ff)
            }
        }
    }

    /// Evaluate `e` to a concrete value under an assignment of array
    /// contents. Arrays missing from the assignment read as zero, and
    /// out-of-range indices read as zero, matching seed-extension
    /// semantics.
    pub fn eval(&self, e: ExprRef, assignment: &dyn Fn(ArrayId, u32) -> u8) -> Result<Bits, ExecError> {
        match self.kind(e) {
            ExprKind::Const(bits) => Ok(bits),
            ExprKind::Read { array, index } => {
                let index = self.eval(index, assignment)?;
                Ok(Bits::from_u8(assignment(array, index.lower_u64() as u32)))
            }
            ExprKind::Unary { op, arg } => {
                let arg = self.eval(arg, assignment)?;
                Ok(match op {
                    UnOp::Not => !arg,
                    UnOp::Neg => -arg,
                })
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let a = self.eval(lhs, assignment)?;
                let b = self.eval(rhs, assignment)?;
                fold_binary(op, a, b).ok_or(ExecError::Type("division by zero in concrete evaluation"))
            }
            ExprKind::Extract { hi, lo, arg } => {
                let arg = self.eval(arg, assignment)?;
                arg.extract(hi, lo).ok_or(ExecError::Type("bad extract"))
            }
            ExprKind::ZExt { arg, to } => Ok(self.eval(arg, assignment)?.zero_extend(to)),
            ExprKind::SExt { arg, to } => Ok(self.eval(arg, assignment)?.sign_extend(to)),
            ExprKind::Select { cond, tt, ff } => {
                if self.eval(cond, assignment)?.is_true() {
                    self.eval(tt, assignment)
                } else {
                    self.eval(ff, assignment)
                }
            }
        }
    }

    pub fn pretty(&self, e: ExprRef) -> String {
        let mut out = String::new();
        self.pretty_into(e, &mut out);
        out
    }

    fn pretty_into(&self, e: ExprRef, out: &mut String) {
        match self.kind(e) {
            ExprKind::Const(bits) => {
                let _ = write!(out, "{}", bits);
            }
            ExprKind::Read { array, index } => {
                let _ = write!(out, "{}[", self.array_info(array).name);
                self.pretty_into(index, out);
                out.push(']');
            }
            ExprKind::Unary { op, arg } => {
                let _ = write!(out, "({:?} ", op);
                self.pretty_into(arg, out);
                out.push(')');
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let _ = write!(out, "({:?} ", op);
                self.pretty_into(lhs, out);
                out.push(' ');
                self.pretty_into(rhs, out);
                out.push(')');
            }
            ExprKind::Extract { hi, lo, arg } => {
                let _ = write!(out, "(extract {} {} ", hi, lo);
                self.pretty_into(arg, out);
                out.push(')');
            }
            ExprKind::ZExt { arg, to } => {
                let _ = write!(out, "(zext {} ", to);
                self.pretty_into(arg, out);
                out.push(')');
            }
            ExprKind::SExt { arg, to } => {
                let _ = write!(out, "(sext {} ", to);
                self.pretty_into(arg, out);
                out.push(')');
            }
            ExprKind::Select { cond, tt, ff } => {
                out.push_str("(ite ");
                self.pretty_into(cond, out);
                out.push(' ');
                self.pretty_into(tt, out);
                out.push(' ');
                self.pretty_into(ff, out);
                out.push(')');
            }
        }
    }
}

fn fold_binary(op: BinOp, a: Bits, b: Bits) -> Option<Bits> {
    use BinOp::*;
    Some(match op {
        Add => a + b,
        Sub => a - b,
        Mul => a * b,
        UDiv => {
            if b.is_zero() {
                return None;
            }
            a.udiv(b)
        }
        SDiv => {
            if b.is_zero() {
                return None;
            }
            a.sdiv(b)
        }
        URem => {
            if b.is_zero() {
                return None;
            }
            a.urem(b)
        }
        SRem => {
            if b.is_zero() {
                return None;
            }
            a.srem(b)
        }
        And => a & b,
        Or => a | b,
        Xor => a ^ b,
        Shl => a.shl(b),
        LShr => a.lshr(b),
        AShr => a.ashr(b),
        Concat => a.concat(b)?,
        Eq => Bits::bool(a == b),
        Ne => Bits::bool(a != b),
        Ult => Bits::bool(a.ult(b)),
        Ule => Bits::bool(a.ule(b)),
        Slt => Bits::bool(a.slt(b)),
        Sle => Bits::bool(a.sle(b)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_consing_shares_nodes() {
        let mut arena = ExprArena::new();
        let a = arena.mk_array("x", 4);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let r1 = arena.mk_read(a, zero);
        let r2 = arena.mk_read(a, zero);
        assert_eq!(r1, r2);
        let e1 = arena.mk_binary(BinOp::Add, r1, r2);
        let e2 = arena.mk_binary(BinOp::Add, r2, r1);
        assert_eq!(e1, e2);
    }

    #[test]
    fn constant_folding() {
        let mut arena = ExprArena::new();
        let two = arena.mk_u64(2, 8);
        let three = arena.mk_u64(3, 8);
        let sum = arena.mk_binary(BinOp::Add, two, three);
        assert_eq!(arena.as_const(sum), Some(Bits::new(5, 8)));
        let cmp = arena.mk_binary(BinOp::Ult, two, three);
        assert!(arena.is_true(cmp));
    }

    #[test]
    fn commutative_canonicalization() {
        let mut arena = ExprArena::new();
        let a = arena.mk_array("x", 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let read = arena.mk_read(a, zero);
        let byte = arena.mk_u64(7, 8);
        let e1 = arena.mk_binary(BinOp::Add, read, byte);
        let e2 = arena.mk_binary(BinOp::Add, byte, read);
        assert_eq!(e1, e2);
        // Constant ends up on the left
        match arena.kind(e1) {
            ExprKind::Binary { lhs, .. } => assert!(arena.as_const(lhs).is_some()),
            _ => panic!("expected binary node"),
        }
    }

    #[test]
    fn extract_of_concat_coalesces() {
        let mut arena = ExprArena::new();
        let a = arena.mk_array("x", 2);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let one = arena.mk_u64(1, INDEX_WIDTH);
        let lo = arena.mk_read(a, zero);
        let hi = arena.mk_read(a, one);
        let word = arena.mk_binary(BinOp::Concat, hi, lo);
        assert_eq!(arena.width(word), 16);
        assert_eq!(arena.mk_extract(7, 0, word), lo);
        assert_eq!(arena.mk_extract(15, 8, word), hi);
    }

    #[test]
    fn select_simplification() {
        let mut arena = ExprArena::new();
        let t = arena.mk_bool(true);
        let x = arena.mk_u64(1, 8);
        let y = arena.mk_u64(2, 8);
        assert_eq!(arena.mk_select(t, x, y), x);
        let a = arena.mk_array("c", 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let read = arena.mk_read(a, zero);
        let cond = arena.mk_is_zero(read);
        assert_eq!(arena.mk_select(cond, x, x), x);
    }

    #[test]
    fn structural_identities() {
        let mut arena = ExprArena::new();
        let a = arena.mk_array("x", 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let read = arena.mk_read(a, zero);
        let eq = arena.mk_binary(BinOp::Eq, read, read);
        assert!(arena.is_true(eq));
        let sub = arena.mk_binary(BinOp::Sub, read, read);
        assert_eq!(arena.as_const(sub), Some(Bits::zeros(8)));
    }

    #[test]
    fn double_negation() {
        let mut arena = ExprArena::new();
        let a = arena.mk_array("x", 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let read = arena.mk_read(a, zero);
        let not = arena.mk_unary(UnOp::Not, read);
        assert_eq!(arena.mk_unary(UnOp::Not, not), read);
    }

    #[test]
    fn eval_under_assignment() {
        let mut arena = ExprArena::new();
        let a = arena.mk_array("x", 2);
        let word = {
            let zero = arena.mk_u64(0, INDEX_WIDTH);
            arena.mk_read_bytes(a, zero, 2)
        };
        let value = arena.eval(word, &|_, i| if i == 0 { 0x34 } else { 0x12 }).unwrap();
        assert_eq!(value, Bits::new(0x1234, 16));
    }

    #[test]
    fn substitution_resimplifies() {
        let mut arena = ExprArena::new();
        let a = arena.mk_array("x", 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let read = arena.mk_read(a, zero);
        let extended = arena.mk_zext(read, 32);
        let five32 = arena.mk_u64(5, 32);
        let sum = arena.mk_binary(BinOp::Add, extended, five32);
        let five8 = arena.mk_u64(5, 8);
        let mut map: HashMap<ExprRef, ExprRef, RandomState> = HashMap::default();
        map.insert(read, five8);
        let result = arena.substitute(sum, &map);
        assert_eq!(arena.as_const(result), Some(Bits::new(10, 32)));
    }

    #[test]
    fn shadow_arrays() {
        let mut arena = ExprArena::new();
        let a = arena.mk_array("input", 4);
        let s1 = arena.shadow_array(a);
        let s2 = arena.shadow_array(a);
        assert_eq!(s1, s2);
        assert_eq!(arena.array_info(s1).shadow_of, Some(a));
        assert!(arena.array_info(s1).name.contains("input"));
    }

    #[test]
    fn collect_arrays_deduplicates() {
        let mut arena = ExprArena::new();
        let a = arena.mk_array("x", 1);
        let b = arena.mk_array("y", 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let ra = arena.mk_read(a, zero);
        let rb = arena.mk_read(b, zero);
        let sum = arena.mk_binary(BinOp::Add, ra, rb);
        let twice = arena.mk_binary(BinOp::Mul, sum, ra);
        let mut arrays = Vec::new();
        arena.collect_arrays(twice, &mut arrays);
        arrays.sort();
        assert_eq!(arrays, vec![a, b]);
    }
}
