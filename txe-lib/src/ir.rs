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

//! The typed, SSA-form intermediate representation consumed by the
//! engine. The loader (or the in-crate builder, used by the tests)
//! produces a [Module]; the engine only reads it. Identifiers are
//! interned in a [Symtab] so instructions carry compact [Name] values.

use ahash::RandomState;
use std::collections::HashMap;
use std::fmt;

use crate::bits::Bits;

/// An interned identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(u32);

#[derive(Clone, Debug, Default)]
pub struct Symtab {
    symbols: Vec<String>,
    table: HashMap<String, Name, RandomState>,
}

impl Symtab {
    pub fn new() -> Self {
        Symtab::default()
    }

    pub fn intern(&mut self, sym: &str) -> Name {
        if let Some(name) = self.table.get(sym) {
            return *name;
        }
        let name = Name(self.symbols.len() as u32);
        self.symbols.push(sym.to_string());
        self.table.insert(sym.to_string(), name);
        name
    }

    pub fn lookup(&self, sym: &str) -> Option<Name> {
        self.table.get(sym).copied()
    }

    pub fn to_str(&self, name: Name) -> &str {
        &self.symbols[name.0 as usize]
    }
}

/// A virtual register within a function. Each instruction that
/// produces a value writes exactly one register.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reg(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunId(pub u32);

/// Block index within its function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// A program point: a basic block within a function, unique across the
/// module.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef {
    pub fun: FunId,
    pub block: BlockId,
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}.b{}", self.fun.0, self.block.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Const(Bits),
    Reg(Reg),
    /// Address of a global variable.
    Global(Name),
    /// Address of a function, for indirect calls.
    Fun(Name),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IrBinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    /// Width-preserving reinterpretation; also covers ptr<->int casts
    /// since pointers are 64-bit integers here.
    Bitcast,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FBinOp {
    FAdd,
    FSub,
    FMul,
    FDiv,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FCmpOp {
    OEq,
    ONe,
    OLt,
    OLe,
    OGt,
    OGe,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callee {
    Direct(Name),
    Indirect(Operand),
}

#[derive(Clone, Debug)]
pub enum Instr {
    Binary {
        dest: Reg,
        op: IrBinOp,
        lhs: Operand,
        rhs: Operand,
        width: u32,
        /// Trap with an overflow error instead of wrapping.
        overflow_trap: bool,
    },
    ICmp {
        dest: Reg,
        op: CmpOp,
        lhs: Operand,
        rhs: Operand,
        width: u32,
    },
    FBinary {
        dest: Reg,
        op: FBinOp,
        lhs: Operand,
        rhs: Operand,
        width: u32,
    },
    FCmp {
        dest: Reg,
        op: FCmpOp,
        lhs: Operand,
        rhs: Operand,
        width: u32,
    },
    Cast {
        dest: Reg,
        op: CastOp,
        arg: Operand,
        to: u32,
    },
    Select {
        dest: Reg,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
        width: u32,
    },
    Phi {
        dest: Reg,
        width: u32,
        incoming: Vec<(BlockId, Operand)>,
    },
    /// Stack allocation of `size` bytes (possibly symbolic size).
    Alloca {
        dest: Reg,
        size: Operand,
    },
    Load {
        dest: Reg,
        addr: Operand,
        width: u32,
    },
    Store {
        value: Operand,
        addr: Operand,
        width: u32,
    },
    /// Address arithmetic: `base + offset + Σ index_i * elem_size_i`.
    /// The constant part is precomputed by the loader from the struct
    /// layout of the data-layout.
    Gep {
        dest: Reg,
        base: Operand,
        offset: u64,
        indices: Vec<(Operand, u64)>,
    },
    Call {
        dest: Option<(Reg, u32)>,
        target: Callee,
        args: Vec<Operand>,
    },
    Ret {
        value: Option<Operand>,
    },
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Operand,
        on_true: BlockId,
        on_false: BlockId,
    },
    Switch {
        value: Operand,
        width: u32,
        default: BlockId,
        cases: Vec<(Bits, BlockId)>,
    },
    Unreachable,
}

impl Instr {
    pub fn opcode_name(&self) -> &'static str {
        match self {
            Instr::Binary { .. } => "binary",
            Instr::ICmp { .. } => "icmp",
            Instr::FBinary { .. } => "fbinary",
            Instr::FCmp { .. } => "fcmp",
            Instr::Cast { .. } => "cast",
            Instr::Select { .. } => "select",
            Instr::Phi { .. } => "phi",
            Instr::Alloca { .. } => "alloca",
            Instr::Load { .. } => "load",
            Instr::Store { .. } => "store",
            Instr::Gep { .. } => "gep",
            Instr::Call { .. } => "call",
            Instr::Ret { .. } => "ret",
            Instr::Br { .. } => "br",
            Instr::CondBr { .. } => "condbr",
            Instr::Switch { .. } => "switch",
            Instr::Unreachable => "unreachable",
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instr::Ret { .. } | Instr::Br { .. } | Instr::CondBr { .. } | Instr::Switch { .. } | Instr::Unreachable
        )
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub instrs: Vec<Instr>,
    pub preds: Vec<BlockId>,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: Name,
    /// Argument registers with widths; arguments occupy the first
    /// registers of the frame.
    pub args: Vec<(Reg, u32)>,
    /// Names of the source-level variables the arguments correspond
    /// to, for speculation-avoidance matching. Indexed like `args`.
    pub arg_vars: Vec<Name>,
    pub is_vararg: bool,
    pub num_regs: u32,
    pub blocks: Vec<Block>,
    /// True for declarations handled by the external bridge or the
    /// intrinsic table.
    pub is_declaration: bool,
}

impl Function {
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }
}

/// Data-layout facts the engine needs from the IR producer.
#[derive(Copy, Clone, Debug)]
pub struct DataLayout {
    pub pointer_width: u32,
    pub big_endian: bool,
}

impl Default for DataLayout {
    fn default() -> Self {
        DataLayout { pointer_width: 64, big_endian: false }
    }
}

#[derive(Clone, Debug)]
pub struct GlobalVar {
    pub name: Name,
    pub size: u32,
    pub read_only: bool,
    pub init: Vec<u8>,
}

pub struct Module {
    pub symtab: Symtab,
    pub functions: Vec<Function>,
    pub function_map: HashMap<Name, FunId, RandomState>,
    pub globals: Vec<GlobalVar>,
    pub layout: DataLayout,
    /// Deterministic basic-block numbering used by the coverage files
    /// and the speculation avoid-sets: blocks are numbered from 1 in
    /// (function, block) order.
    block_orders: HashMap<BlockRef, u32, RandomState>,
}

impl Module {
    pub fn new(symtab: Symtab, functions: Vec<Function>, globals: Vec<GlobalVar>, layout: DataLayout) -> Self {
        let mut function_map = HashMap::default();
        for (i, f) in functions.iter().enumerate() {
            function_map.insert(f.name, FunId(i as u32));
        }
        let mut block_orders = HashMap::default();
        let mut next = 0u32;
        for (i, f) in functions.iter().enumerate() {
            for b in 0..f.blocks.len() {
                next += 1;
                block_orders.insert(BlockRef { fun: FunId(i as u32), block: BlockId(b as u32) }, next);
            }
        }
        Module { symtab, functions, function_map, globals, layout, block_orders }
    }

    pub fn function(&self, id: FunId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn lookup_function(&self, name: Name) -> Option<FunId> {
        self.function_map.get(&name).copied()
    }

    pub fn block(&self, at: BlockRef) -> &Block {
        self.function(at.fun).block(at.block)
    }

    pub fn block_order(&self, at: BlockRef) -> u32 {
        self.block_orders[&at]
    }

    pub fn block_for_order(&self, order: u32) -> Option<BlockRef> {
        self.block_orders.iter().find(|(_, o)| **o == order).map(|(b, _)| *b)
    }

    pub fn num_blocks(&self) -> usize {
        self.block_orders.len()
    }

    pub fn global(&self, name: Name) -> Option<&GlobalVar> {
        self.globals.iter().find(|g| g.name == name)
    }
}

/// Fluent construction of modules, used by the reference loader and
/// throughout the test suite.
pub struct ModuleBuilder {
    symtab: Symtab,
    functions: Vec<Function>,
    globals: Vec<GlobalVar>,
    layout: DataLayout,
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleBuilder {
    pub fn new() -> Self {
        ModuleBuilder { symtab: Symtab::new(), functions: Vec::new(), globals: Vec::new(), layout: DataLayout::default() }
    }

    pub fn intern(&mut self, sym: &str) -> Name {
        self.symtab.intern(sym)
    }

    pub fn global(&mut self, name: &str, size: u32, read_only: bool, init: Vec<u8>) -> Name {
        let name = self.symtab.intern(name);
        self.globals.push(GlobalVar { name, size, read_only, init });
        name
    }

    /// Declare an external function (no body).
    pub fn declare(&mut self, name: &str) -> Name {
        let name = self.symtab.intern(name);
        self.functions.push(Function {
            name,
            args: Vec::new(),
            arg_vars: Vec::new(),
            is_vararg: true,
            num_regs: 0,
            blocks: Vec::new(),
            is_declaration: true,
        });
        name
    }

    pub fn function(&mut self, name: &str) -> FunctionBuilder<'_> {
        let name = self.symtab.intern(name);
        FunctionBuilder {
            module: self,
            name,
            args: Vec::new(),
            arg_vars: Vec::new(),
            is_vararg: false,
            next_reg: 0,
            blocks: Vec::new(),
        }
    }

    pub fn finish(self) -> Module {
        Module::new(self.symtab, self.functions, self.globals, self.layout)
    }
}

pub struct FunctionBuilder<'m> {
    module: &'m mut ModuleBuilder,
    name: Name,
    args: Vec<(Reg, u32)>,
    arg_vars: Vec<Name>,
    is_vararg: bool,
    next_reg: u32,
    blocks: Vec<Block>,
}

impl<'m> FunctionBuilder<'m> {
    pub fn module_mut(&mut self) -> &mut ModuleBuilder {
        self.module
    }

    /// The register the next [FunctionBuilder::fresh_reg] call will
    /// hand out.
    pub fn peek_next_reg(&self) -> u32 {
        self.next_reg
    }

    pub fn arg(&mut self, var: &str, width: u32) -> Reg {
        let reg = self.fresh_reg();
        let var = self.module.symtab.intern(var);
        self.args.push((reg, width));
        self.arg_vars.push(var);
        reg
    }

    pub fn vararg(&mut self) -> &mut Self {
        self.is_vararg = true;
        self
    }

    pub fn fresh_reg(&mut self) -> Reg {
        let reg = Reg(self.next_reg);
        self.next_reg += 1;
        reg
    }

    pub fn block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block { instrs: Vec::new(), preds: Vec::new() });
        id
    }

    pub fn push(&mut self, block: BlockId, instr: Instr) {
        match &instr {
            Instr::Br { target } => self.add_pred(*target, block),
            Instr::CondBr { on_true, on_false, .. } => {
                self.add_pred(*on_true, block);
                self.add_pred(*on_false, block);
            }
            Instr::Switch { default, cases, .. } => {
                self.add_pred(*default, block);
                for (_, target) in cases {
                    self.add_pred(*target, block);
                }
            }
            _ => (),
        }
        self.blocks[block.0 as usize].instrs.push(instr);
    }

    fn add_pred(&mut self, block: BlockId, pred: BlockId) {
        let preds = &mut self.blocks[block.0 as usize].preds;
        if !preds.contains(&pred) {
            preds.push(pred);
        }
    }

    pub fn finish(self) -> FunId {
        let id = FunId(self.module.functions.len() as u32);
        self.module.functions.push(Function {
            name: self.name,
            args: self.args,
            arg_vars: self.arg_vars,
            is_vararg: self.is_vararg,
            num_regs: self.next_reg,
            blocks: self.blocks,
            is_declaration: false,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symtab_interning() {
        let mut symtab = Symtab::new();
        let a = symtab.intern("foo");
        let b = symtab.intern("bar");
        let c = symtab.intern("foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(symtab.to_str(a), "foo");
    }

    #[test]
    fn builder_tracks_predecessors() {
        let mut module = ModuleBuilder::new();
        let mut f = module.function("main");
        let entry = f.block();
        let left = f.block();
        let right = f.block();
        let join = f.block();
        let cond = f.fresh_reg();
        f.push(entry, Instr::CondBr { cond: Operand::Reg(cond), on_true: left, on_false: right });
        f.push(left, Instr::Br { target: join });
        f.push(right, Instr::Br { target: join });
        f.push(join, Instr::Ret { value: None });
        let id = f.finish();
        let module = module.finish();
        let f = module.function(id);
        assert_eq!(f.block(join).preds, vec![left, right]);
        assert_eq!(f.block(left).preds, vec![entry]);
    }

    #[test]
    fn block_orders_are_dense_and_stable() {
        let mut module = ModuleBuilder::new();
        let mut f = module.function("main");
        let b0 = f.block();
        let b1 = f.block();
        f.push(b0, Instr::Br { target: b1 });
        f.push(b1, Instr::Ret { value: None });
        let id = f.finish();
        let module = module.finish();
        assert_eq!(module.block_order(BlockRef { fun: id, block: b0 }), 1);
        assert_eq!(module.block_order(BlockRef { fun: id, block: b1 }), 2);
        assert_eq!(module.block_for_order(2), Some(BlockRef { fun: id, block: b1 }));
        assert_eq!(module.num_blocks(), 2);
    }
}
