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

//! The symbolic memory model. The heap is a set of non-overlapping
//! [MemoryObject]s identified by their concrete base address; each
//! state's [AddressSpace] maps bases to per-state [ObjectState]
//! contents through a persistent ordered map, so forked states share
//! contents copy-on-write and a write materializes a private clone.
//!
//! Addresses are handed out by a deterministic bump allocator: two
//! runs over identical input allocate identical addresses, which test
//! case reproduction relies on.

use im::OrdMap;
use std::sync::Arc;

use crate::bits::Bits;
use crate::constraints::ConstraintSet;
use crate::error::ExecError;
use crate::expr::{ArrayId, BinOp, ExprArena, ExprRef};
use crate::ir::Name;
use crate::solver::Solver;

pub type Address = u64;

/// Where allocations start. Leaving page zero unmapped means null
/// pointers never resolve.
const HEAP_BASE: Address = 0x10000;

const ALIGNMENT: u64 = 16;

#[derive(Clone, Debug)]
pub struct MemoryObject {
    pub base: Address,
    pub size: u32,
    pub is_local: bool,
    pub is_global: bool,
    pub is_fixed: bool,
    /// Source-level variable this object corresponds to, when known.
    /// Speculation independence matches avoid-set entries against it.
    pub var: Option<Name>,
}

impl MemoryObject {
    /// `addr - base` as a pointer-width expression.
    pub fn offset_expr(&self, arena: &mut ExprArena, addr: ExprRef) -> ExprRef {
        let base = arena.mk_u64(self.base, 64);
        arena.mk_binary(BinOp::Sub, addr, base)
    }

    /// `0 <= offset && offset + bytes <= size`. With unsigned offsets
    /// the lower bound is free, leaving `offset <= size - bytes`.
    pub fn bounds_check_offset(&self, arena: &mut ExprArena, offset: ExprRef, bytes: u32) -> ExprRef {
        if bytes > self.size {
            return arena.mk_bool(false);
        }
        let limit = arena.mk_u64((self.size - bytes) as u64, 64);
        arena.mk_binary(BinOp::Ule, offset, limit)
    }

    pub fn bounds_check_pointer(&self, arena: &mut ExprArena, addr: ExprRef, bytes: u32) -> ExprRef {
        let offset = self.offset_expr(arena, addr);
        self.bounds_check_offset(arena, offset, bytes)
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.base && (addr < self.base + self.size as u64 || (self.size == 0 && addr == self.base))
    }
}

/// Per-state contents of a [MemoryObject]: one 8-bit expression per
/// byte. Concrete contents are constant expressions; an object made
/// symbolic is backed by reads of its [ArrayId].
#[derive(Clone, Debug)]
pub struct ObjectState {
    pub read_only: bool,
    bytes: Vec<ExprRef>,
    array: Option<ArrayId>,
}

impl ObjectState {
    /// Fresh contents initialized to a fixed fill pattern. Alloca'd
    /// memory is deliberately not zeroed so reads of uninitialized
    /// stack memory produce a recognizable value, but the pattern is
    /// fixed to keep runs reproducible.
    pub fn uninitialized(arena: &mut ExprArena, size: u32) -> Self {
        let fill = arena.mk_const(Bits::from_u8(0xAB));
        ObjectState { read_only: false, bytes: vec![fill; size as usize], array: None }
    }

    pub fn zeroed(arena: &mut ExprArena, size: u32) -> Self {
        let zero = arena.mk_const(Bits::from_u8(0));
        ObjectState { read_only: false, bytes: vec![zero; size as usize], array: None }
    }

    pub fn from_concrete(arena: &mut ExprArena, contents: &[u8]) -> Self {
        let bytes = contents.iter().map(|b| arena.mk_const(Bits::from_u8(*b))).collect();
        ObjectState { read_only: false, bytes, array: None }
    }

    /// Replace the contents with reads of `array`.
    pub fn make_symbolic(&mut self, arena: &mut ExprArena, array: ArrayId) {
        for (i, byte) in self.bytes.iter_mut().enumerate() {
            let index = arena.mk_u64(i as u64, crate::expr::INDEX_WIDTH);
            *byte = arena.mk_read(array, index);
        }
        self.array = Some(array);
    }

    pub fn array(&self) -> Option<ArrayId> {
        self.array
    }

    pub fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn read8(&self, index: u32) -> ExprRef {
        self.bytes[index as usize]
    }

    pub fn write8(&mut self, index: u32, value: ExprRef) {
        self.bytes[index as usize] = value;
    }

    /// Read `width` bits at `offset` (little-endian). A symbolic
    /// offset produces a select chain over every byte of the object;
    /// the caller has already established that the access is in
    /// bounds, so the out-of-range default never materializes in a
    /// model.
    pub fn read(&self, arena: &mut ExprArena, offset: ExprRef, width: u32) -> ExprRef {
        let bytes = width / 8;
        debug_assert!(width % 8 == 0 && bytes >= 1);
        if let Some(concrete) = arena.as_const(offset) {
            let at = concrete.lower_u64() as u32;
            let mut result = self.read8(at);
            for j in 1..bytes {
                let byte = self.read8(at + j);
                result = arena.mk_binary(BinOp::Concat, byte, result);
            }
            return result;
        }
        let mut result = self.read_byte_symbolic(arena, offset);
        for j in 1..bytes {
            let index = {
                let j = arena.mk_u64(j as u64, 64);
                arena.mk_binary(BinOp::Add, offset, j)
            };
            let byte = self.read_byte_symbolic(arena, index);
            result = arena.mk_binary(BinOp::Concat, byte, result);
        }
        result
    }

    fn read_byte_symbolic(&self, arena: &mut ExprArena, index: ExprRef) -> ExprRef {
        let mut result = arena.mk_const(Bits::from_u8(0));
        for (i, byte) in self.bytes.iter().enumerate() {
            let here = arena.mk_u64(i as u64, 64);
            let hit = arena.mk_binary(BinOp::Eq, index, here);
            result = arena.mk_select(hit, *byte, result);
        }
        result
    }

    /// Write a `width`-bit value at `offset` (little-endian). The
    /// caller performs the copy-on-write and read-only checks.
    pub fn write(&mut self, arena: &mut ExprArena, offset: ExprRef, value: ExprRef, width: u32) {
        let bytes = width / 8;
        debug_assert!(width % 8 == 0 && bytes >= 1);
        if let Some(concrete) = arena.as_const(offset) {
            let at = concrete.lower_u64() as u32;
            for j in 0..bytes {
                let byte = arena.mk_extract(8 * j + 7, 8 * j, value);
                self.write8(at + j, byte);
            }
            return;
        }
        for j in 0..bytes {
            let byte = arena.mk_extract(8 * j + 7, 8 * j, value);
            let index = {
                let j = arena.mk_u64(j as u64, 64);
                arena.mk_binary(BinOp::Add, offset, j)
            };
            for i in 0..self.bytes.len() {
                let here = arena.mk_u64(i as u64, 64);
                let hit = arena.mk_binary(BinOp::Eq, index, here);
                self.bytes[i] = arena.mk_select(hit, byte, self.bytes[i]);
            }
        }
    }

    /// The contents as concrete bytes, if nothing symbolic has been
    /// written. This is the view external functions execute against.
    pub fn concrete_bytes(&self, arena: &ExprArena) -> Option<Vec<u8>> {
        self.bytes.iter().map(|b| arena.as_const(*b).map(|bits| bits.lower_u8())).collect()
    }

    pub fn overwrite_concrete(&mut self, arena: &mut ExprArena, contents: &[u8]) {
        for (i, b) in contents.iter().enumerate() {
            self.bytes[i] = arena.mk_const(Bits::from_u8(*b));
        }
    }
}

/// Deterministic address allocator, shared by every state.
#[derive(Clone, Debug)]
pub struct MemoryManager {
    next_base: Address,
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager {
    pub fn new() -> Self {
        MemoryManager { next_base: HEAP_BASE }
    }

    pub fn allocate(&mut self, size: u32, is_local: bool, is_global: bool, var: Option<Name>) -> MemoryObject {
        let base = self.next_base;
        let reserved = (size as u64).max(1);
        self.next_base += (reserved + ALIGNMENT - 1) / ALIGNMENT * ALIGNMENT;
        MemoryObject { base, size, is_local, is_global, is_fixed: false, var }
    }

    /// Bind a caller-supplied address, mirroring process-wide data.
    pub fn allocate_fixed(&mut self, base: Address, size: u32, var: Option<Name>) -> MemoryObject {
        MemoryObject { base, size, is_local: false, is_global: true, is_fixed: true, var }
    }
}

#[derive(Clone, Default)]
pub struct AddressSpace {
    objects: OrdMap<Address, (Arc<MemoryObject>, Arc<ObjectState>)>,
}

/// Outcome of a single-object resolution attempt.
pub enum Resolution {
    /// Uniquely resolved to the object with this base.
    One(Address),
    /// No fast answer; the caller must enumerate candidates.
    Ambiguous,
    /// The address cannot point into any object.
    None,
}

impl AddressSpace {
    pub fn new() -> Self {
        AddressSpace::default()
    }

    pub fn bind(&mut self, object: MemoryObject, contents: ObjectState) {
        self.objects.insert(object.base, (Arc::new(object), Arc::new(contents)));
    }

    pub fn unbind(&mut self, base: Address) {
        self.objects.remove(&base);
    }

    pub fn get(&self, base: Address) -> Option<(&MemoryObject, &ObjectState)> {
        self.objects.get(&base).map(|(mo, os)| (mo.as_ref(), os.as_ref()))
    }

    /// The object contents for writing; clones if shared with another
    /// state (copy-on-write).
    pub fn get_writeable(&mut self, base: Address) -> Option<&mut ObjectState> {
        self.objects.get_mut(&base).map(|(_, os)| Arc::make_mut(os))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemoryObject, &ObjectState)> {
        self.objects.iter().map(|(_, (mo, os))| (mo.as_ref(), os.as_ref()))
    }

    pub fn num_objects(&self) -> usize {
        self.objects.len()
    }

    /// Which object a concrete address falls into.
    pub fn resolve_concrete(&self, addr: Address) -> Option<Address> {
        let (base, (mo, _)) = self.objects.range(..=addr).next_back()?;
        if mo.contains(addr) {
            Some(*base)
        } else {
            None
        }
    }

    /// Fast-path resolution: a concrete address resolves directly; a
    /// symbolic one resolves if its concretization under some model
    /// lands in an object that provably contains every model of the
    /// address.
    pub fn resolve_one(
        &self,
        arena: &mut ExprArena,
        solver: &mut Solver,
        constraints: &ConstraintSet,
        addr: ExprRef,
        bytes: u32,
    ) -> Result<Resolution, ExecError> {
        if let Some(concrete) = arena.as_const(addr) {
            return Ok(match self.resolve_concrete(concrete.lower_u64()) {
                Some(base) => Resolution::One(base),
                None => Resolution::None,
            });
        }
        let example = solver.get_value(arena, constraints, addr)?;
        if let Some(base) = self.resolve_concrete(example.lower_u64()) {
            let (mo, _) = self.get(base).unwrap();
            let mo = mo.clone();
            let in_bounds = mo.bounds_check_pointer(arena, addr, bytes.max(1));
            if solver.must_be_true(arena, constraints, in_bounds)? {
                return Ok(Resolution::One(base));
            }
        }
        Ok(Resolution::Ambiguous)
    }

    /// Enumerate every object the address may point into under the
    /// path condition, in base-address order.
    pub fn resolve(
        &self,
        arena: &mut ExprArena,
        solver: &mut Solver,
        constraints: &ConstraintSet,
        addr: ExprRef,
    ) -> Result<Vec<Address>, ExecError> {
        let mut candidates = Vec::new();
        let bases: Vec<Address> = self.objects.keys().copied().collect();
        for base in bases {
            let (mo, _) = self.get(base).unwrap();
            let mo = mo.clone();
            let in_bounds = mo.bounds_check_pointer(arena, addr, 1);
            let (possible, _) = solver.may_be_true(arena, constraints, in_bounds)?;
            if possible {
                candidates.push(base);
            }
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::enumerate::EnumCore;

    fn solver() -> Solver {
        Solver::new(Box::new(EnumCore::new()))
    }

    #[test]
    fn allocator_is_deterministic() {
        let mut a = MemoryManager::new();
        let mut b = MemoryManager::new();
        for _ in 0..10 {
            let x = a.allocate(24, true, false, None);
            let y = b.allocate(24, true, false, None);
            assert_eq!(x.base, y.base);
        }
        let x = a.allocate(0, false, false, None);
        assert!(x.base > HEAP_BASE);
    }

    #[test]
    fn zero_size_allocation() {
        let mut mm = MemoryManager::new();
        let mut arena = ExprArena::new();
        let mo = mm.allocate(0, false, false, None);
        let os = ObjectState::zeroed(&mut arena, 0);
        assert_eq!(os.size(), 0);
        let offset = arena.mk_u64(0, 64);
        let check = mo.bounds_check_offset(&mut arena, offset, 1);
        assert!(arena.is_false(check));
    }

    #[test]
    fn concrete_read_write_round_trip() {
        let mut arena = ExprArena::new();
        let mut os = ObjectState::zeroed(&mut arena, 8);
        let offset = arena.mk_u64(2, 64);
        let value = arena.mk_u64(0xBEEF, 16);
        os.write(&mut arena, offset, value, 16);
        let back = os.read(&mut arena, offset, 16);
        assert_eq!(arena.as_const(back), Some(Bits::new(0xBEEF, 16)));
        // Little-endian layout
        assert_eq!(arena.as_const(os.read8(2)), Some(Bits::from_u8(0xEF)));
        assert_eq!(arena.as_const(os.read8(3)), Some(Bits::from_u8(0xBE)));
    }

    #[test]
    fn symbolic_offset_read() {
        let mut arena = ExprArena::new();
        let mut constraints = ConstraintSet::new();
        let mut solver = solver();
        let mut os = ObjectState::zeroed(&mut arena, 4);
        for i in 0..4 {
            let v = arena.mk_const(Bits::from_u8(10 * (i as u8 + 1)));
            os.write8(i, v);
        }
        // offset = zext(idx, 64) where idx is a symbolic byte pinned to 2
        let idx_array = arena.mk_array("idx", 1);
        let zero = arena.mk_u64(0, crate::expr::INDEX_WIDTH);
        let idx = arena.mk_read(idx_array, zero);
        let offset = arena.mk_zext(idx, 64);
        let two = arena.mk_u64(2, 8);
        let pin = arena.mk_binary(BinOp::Eq, idx, two);
        constraints.add(&mut arena, pin).unwrap();
        let read = os.read(&mut arena, offset, 8);
        let value = solver.get_value(&arena, &constraints, read).unwrap();
        assert_eq!(value, Bits::from_u8(30));
    }

    #[test]
    fn copy_on_write_isolates_states() {
        let mut arena = ExprArena::new();
        let mut mm = MemoryManager::new();
        let mo = mm.allocate(4, false, false, None);
        let base = mo.base;
        let mut space_a = AddressSpace::new();
        space_a.bind(mo, ObjectState::zeroed(&mut arena, 4));
        let mut space_b = space_a.clone();

        let value = arena.mk_const(Bits::from_u8(7));
        space_b.get_writeable(base).unwrap().write8(0, value);

        let (_, os_a) = space_a.get(base).unwrap();
        let (_, os_b) = space_b.get(base).unwrap();
        assert_eq!(arena.as_const(os_a.read8(0)), Some(Bits::from_u8(0)));
        assert_eq!(arena.as_const(os_b.read8(0)), Some(Bits::from_u8(7)));
    }

    #[test]
    fn resolve_concrete_respects_bounds() {
        let mut arena = ExprArena::new();
        let mut mm = MemoryManager::new();
        let mut space = AddressSpace::new();
        let mo = mm.allocate(4, false, false, None);
        let base = mo.base;
        space.bind(mo, ObjectState::zeroed(&mut arena, 4));
        assert_eq!(space.resolve_concrete(base), Some(base));
        assert_eq!(space.resolve_concrete(base + 3), Some(base));
        assert_eq!(space.resolve_concrete(base + 4), None);
        assert_eq!(space.resolve_concrete(base - 1), None);
    }

    #[test]
    fn resolve_enumerates_candidates() {
        let mut arena = ExprArena::new();
        let mut constraints = ConstraintSet::new();
        let mut solver = solver();
        let mut mm = MemoryManager::new();
        let mut space = AddressSpace::new();
        let a = mm.allocate(4, false, false, None);
        let b = mm.allocate(4, false, false, None);
        let (base_a, base_b) = (a.base, b.base);
        space.bind(a, ObjectState::zeroed(&mut arena, 4));
        space.bind(b, ObjectState::zeroed(&mut arena, 4));

        // A symbolic address constrained to one of the two bases.
        let sel_array = arena.mk_array("sel", 1);
        let zero = arena.mk_u64(0, crate::expr::INDEX_WIDTH);
        let sel = arena.mk_read(sel_array, zero);
        let sel_is_zero = arena.mk_is_zero(sel);
        let addr_a = arena.mk_u64(base_a, 64);
        let addr_b = arena.mk_u64(base_b, 64);
        let addr = arena.mk_select(sel_is_zero, addr_a, addr_b);
        let candidates = space.resolve(&mut arena, &mut solver, &constraints, addr).unwrap();
        assert_eq!(candidates, vec![base_a, base_b]);

        // Pinning the selector narrows resolution to one object.
        constraints.add(&mut arena, sel_is_zero).unwrap();
        match space.resolve_one(&mut arena, &mut solver, &constraints, addr, 1).unwrap() {
            Resolution::One(base) => assert_eq!(base, base_a),
            _ => panic!("expected unique resolution"),
        }
    }
}
