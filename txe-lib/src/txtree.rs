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

//! The interpolation tree: a shadow of the search tree that learns why
//! branches were infeasible and turns that knowledge into per-program-
//! point *interpolants* used to subsume redundant states.
//!
//! Each node carries the subset of the path condition *marked* by the
//! unsat cores observed at or below it. When a node's subtree is fully
//! explored the marked constraints present at the node's creation
//! become a subsumption entry at the node's program point, with input
//! arrays replaced by their shadow twins; marks then propagate to the
//! parent. A later state reaching the same program point whose path
//! condition implies a stored entry cannot reach any outcome the
//! recorded subtree did not, and is terminated as subsumed.
//!
//! Nodes early-terminated for engine reasons (timeouts, caps, halts)
//! taint their ancestry: an incompletely explored subtree must not
//! produce an entry.

use ahash::RandomState;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::constraints::ConstraintSet;
use crate::expr::{ArrayId, ExprArena, ExprRef};
use crate::ir::BlockRef;
use crate::solver::Solver;
use crate::state::StateId;
use crate::stats;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TxNodeId(u32);

/// Identity of a branch instruction, used by the CUSTOM speculation
/// strategy to remember when it last speculated on a branch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpecBranchId {
    pub at: BlockRef,
    pub instr: usize,
}

#[derive(Clone, Debug)]
struct TxNode {
    parent: Option<TxNodeId>,
    left: Option<TxNodeId>,
    right: Option<TxNodeId>,
    state: Option<StateId>,
    sequence: u64,
    /// Set when the node executes the first instruction of a block.
    program_point: Option<BlockRef>,
    /// Path condition at node creation; the entry an explored node
    /// stores may only use these constraints.
    pc_snapshot: Vec<ExprRef>,
    marked: HashSet<ExprRef, RandomState>,
    touched_arrays: HashSet<ArrayId, RandomState>,
    instructions_depth: u64,
    /// Incompletely explored (early termination somewhere below);
    /// stores no entry.
    incomplete: bool,
    speculation: bool,
    speculation_failed: bool,
    /// Owned by speculation roots only.
    visited_points: Option<HashSet<BlockRef, RandomState>>,
    spec_time: Option<Duration>,
    speculation_unsat_core: Vec<ExprRef>,
    second_check: Option<SpecBranchId>,
}

impl TxNode {
    fn fresh(sequence: u64, parent: Option<TxNodeId>, state: Option<StateId>, pc_snapshot: Vec<ExprRef>) -> Self {
        TxNode {
            parent,
            left: None,
            right: None,
            state,
            sequence,
            program_point: None,
            pc_snapshot,
            marked: HashSet::default(),
            touched_arrays: HashSet::default(),
            instructions_depth: 0,
            incomplete: false,
            speculation: false,
            speculation_failed: false,
            visited_points: None,
            spec_time: None,
            speculation_unsat_core: Vec::new(),
            second_check: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SubsumptionEntry {
    /// Conjunction over shadow arrays.
    pub interpolant: Vec<ExprRef>,
    /// Sequence number of the node that produced the entry.
    pub origin: u64,
}

#[derive(Default)]
pub struct TxTree {
    nodes: Vec<Option<TxNode>>,
    free: Vec<u32>,
    pub root: Option<TxNodeId>,
    entries: HashMap<BlockRef, Vec<SubsumptionEntry>, RandomState>,
    next_sequence: u64,
}

impl TxTree {
    pub fn new() -> Self {
        TxTree::default()
    }

    fn alloc(&mut self, node: TxNode) -> TxNodeId {
        if let Some(slot) = self.free.pop() {
            self.nodes[slot as usize] = Some(node);
            TxNodeId(slot)
        } else {
            self.nodes.push(Some(node));
            TxNodeId(self.nodes.len() as u32 - 1)
        }
    }

    fn node(&self, id: TxNodeId) -> &TxNode {
        self.nodes[id.0 as usize].as_ref().expect("stale interpolation tree node")
    }

    fn node_mut(&mut self, id: TxNodeId) -> &mut TxNode {
        self.nodes[id.0 as usize].as_mut().expect("stale interpolation tree node")
    }

    fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    pub fn set_root(&mut self, state: StateId) -> TxNodeId {
        assert!(self.root.is_none());
        let sequence = self.next_sequence();
        let id = self.alloc(TxNode::fresh(sequence, None, Some(state), Vec::new()));
        self.root = Some(id);
        id
    }

    pub fn sequence(&self, id: TxNodeId) -> u64 {
        self.node(id).sequence
    }

    pub fn state_of(&self, id: TxNodeId) -> Option<StateId> {
        self.node(id).state
    }

    pub fn parent(&self, id: TxNodeId) -> Option<TxNodeId> {
        self.node(id).parent
    }

    pub fn is_leaf(&self, id: TxNodeId) -> bool {
        let node = self.node(id);
        node.left.is_none() && node.right.is_none()
    }

    pub fn program_point(&self, id: TxNodeId) -> Option<BlockRef> {
        self.node(id).program_point
    }

    /// Synchronize the node to the state's position. The program point
    /// is only pinned when the node reaches the first instruction of a
    /// basic block and keeps its first value afterwards.
    pub fn set_current(&mut self, id: TxNodeId, point: BlockRef) {
        let node = self.node_mut(id);
        if node.program_point.is_none() {
            node.program_point = Some(point);
        }
    }

    /// Split in lockstep with the search tree. Both children inherit
    /// the parent's speculation flag and start from the given path
    /// condition snapshot.
    pub fn split(
        &mut self,
        id: TxNodeId,
        left_state: StateId,
        right_state: StateId,
        pc_snapshot: &[ExprRef],
    ) -> (TxNodeId, TxNodeId) {
        assert!(self.is_leaf(id), "can only split leaves");
        let speculation = self.node(id).speculation;
        let left_seq = self.next_sequence();
        let mut left_node = TxNode::fresh(left_seq, Some(id), Some(left_state), pc_snapshot.to_vec());
        left_node.speculation = speculation;
        let right_seq = self.next_sequence();
        let mut right_node = TxNode::fresh(right_seq, Some(id), Some(right_state), pc_snapshot.to_vec());
        right_node.speculation = speculation;
        let left = self.alloc(left_node);
        let right = self.alloc(right_node);
        let node = self.node_mut(id);
        node.state = None;
        node.left = Some(left);
        node.right = Some(right);
        (left, right)
    }

    pub fn set_state(&mut self, id: TxNodeId, state: Option<StateId>) {
        self.node_mut(id).state = state;
    }

    // ----- interpolant marking ------------------------------------------

    /// Record the unsat core of a one-sided fork (or an infeasible
    /// switch case): the listed path-condition elements explain why
    /// the other side was impossible, so they become part of this
    /// node's interpolant.
    pub fn mark_path_condition(&mut self, id: TxNodeId, unsat_core: &[ExprRef]) {
        self.node_mut(id).marked.extend(unsat_core.iter().copied());
    }

    /// Dataflow notification from the interpreter: `arrays` flowed
    /// through the instruction just executed on this node.
    pub fn execute(&mut self, id: TxNodeId, arrays: &[ArrayId]) {
        let node = self.node_mut(id);
        node.touched_arrays.extend(arrays.iter().copied());
        node.instructions_depth += 1;
    }

    pub fn instructions_depth(&self, id: TxNodeId) -> u64 {
        self.node(id).instructions_depth
    }

    /// Record the minimal address predicate behind an out-of-bounds
    /// access: every path-condition element sharing an array with the
    /// faulting address is marked, so later states steering the same
    /// address pattern into the same instruction can be subsumed. With
    /// `exact_address` the whole path condition over those arrays is
    /// kept even when unrelated to the address value.
    pub fn memory_bound_violation_interpolation(
        &mut self,
        arena: &ExprArena,
        id: TxNodeId,
        constraints: &ConstraintSet,
        addr: ExprRef,
        exact_address: bool,
    ) {
        let mut addr_arrays = Vec::new();
        arena.collect_arrays(addr, &mut addr_arrays);
        let mut marked = Vec::new();
        for c in constraints.iter() {
            let mut c_arrays = Vec::new();
            arena.collect_arrays(c, &mut c_arrays);
            let related = c_arrays.iter().any(|a| addr_arrays.contains(a));
            if related || exact_address {
                marked.push(c);
            }
        }
        self.mark_path_condition(id, &marked);
    }

    /// Set this node incompletely explored: neither it nor its
    /// ancestors may store a subsumption entry.
    pub fn set_generic_early_termination(&mut self, id: TxNodeId) {
        self.node_mut(id).incomplete = true;
    }

    // ----- subsumption --------------------------------------------------

    /// Is the state's path condition stronger than a recorded
    /// interpolant at its program point? Solver failures make the
    /// check a miss, never an error: subsumption is only ever an
    /// optimization.
    pub fn subsumption_check(
        &mut self,
        arena: &mut ExprArena,
        solver: &mut Solver,
        constraints: &ConstraintSet,
        id: TxNodeId,
        point: BlockRef,
    ) -> bool {
        let candidates = match self.entries.get(&point) {
            Some(entries) => entries.clone(),
            None => {
                return false;
            }
        };
        for entry in &candidates {
            let mut implied = true;
            let mut witness = Vec::new();
            for shadowed in &entry.interpolant {
                let concrete = unshadow(arena, *shadowed);
                match solver.must_be_true(arena, constraints, concrete) {
                    Ok(true) => witness.push(concrete),
                    _ => {
                        implied = false;
                        break;
                    }
                }
            }
            if implied {
                stats::bump(&stats::SUBSUMPTION_HITS);
                // The interpolant that subsumed us becomes our own
                // summary, so the pruning composes upwards.
                self.mark_path_condition(id, &witness);
                return true;
            }
        }
        stats::bump(&stats::SUBSUMPTION_MISSES);
        false
    }

    pub fn entries_at(&self, point: BlockRef) -> usize {
        self.entries.get(&point).map(Vec::len).unwrap_or(0)
    }

    pub fn num_entries(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    // ----- removal ------------------------------------------------------

    /// Remove the leaf node of a terminated state. A fully explored
    /// node stores its interpolant as a subsumption entry at its
    /// program point; marks and incompleteness propagate to the
    /// parent, and childless ancestors are folded up the same way.
    pub fn remove(&mut self, arena: &mut ExprArena, id: TxNodeId) {
        let mut cursor = Some(id);
        while let Some(id) = cursor {
            let node = self.node(id);
            assert!(node.left.is_none() && node.right.is_none(), "can only remove leaves");
            let parent = node.parent;
            let incomplete = node.incomplete;
            let speculation = node.speculation;

            if !incomplete && !speculation {
                self.store_entry(arena, id);
            }

            // Marks that exist in the parent's path condition prefix
            // propagate; constraints added below stay below.
            if let Some(parent_id) = parent {
                let node = self.node(id);
                let inherited: Vec<ExprRef> = node.marked.iter().copied().collect();
                let parent_node = self.node_mut(parent_id);
                parent_node.marked.extend(inherited);
                if incomplete {
                    parent_node.incomplete = true;
                }
            }

            let node = self.node(id);
            let parent = node.parent;
            self.nodes[id.0 as usize] = None;
            self.free.push(id.0);
            match parent {
                Some(parent_id) => {
                    let parent_node = self.node_mut(parent_id);
                    if parent_node.left == Some(id) {
                        parent_node.left = None;
                    }
                    if parent_node.right == Some(id) {
                        parent_node.right = None;
                    }
                    if parent_node.left.is_none() && parent_node.right.is_none() && parent_node.state.is_none() {
                        cursor = Some(parent_id);
                    } else {
                        cursor = None;
                    }
                }
                None => {
                    self.root = None;
                    cursor = None;
                }
            }
        }
    }

    fn store_entry(&mut self, arena: &mut ExprArena, id: TxNodeId) {
        let node = self.node(id);
        let point = match node.program_point {
            Some(point) => point,
            None => return,
        };
        let origin = node.sequence;
        let interpolant_src: Vec<ExprRef> =
            node.pc_snapshot.iter().copied().filter(|c| node.marked.contains(c)).collect();
        let interpolant: Vec<ExprRef> = interpolant_src.iter().map(|c| shadow(arena, *c)).collect();
        self.entries.entry(point).or_default().push(SubsumptionEntry { interpolant, origin });
    }

    // ----- speculation --------------------------------------------------

    pub fn is_speculation(&self, id: TxNodeId) -> bool {
        self.node(id).speculation
    }

    pub fn is_speculation_failed(&self, id: TxNodeId) -> bool {
        self.node(id).speculation_failed
    }

    /// Flag a fresh speculation node. When it opens a new speculation
    /// subtree (its parent is not speculative) it owns the visited-
    /// point set and the time accumulator for the whole subtree.
    pub fn set_speculation_flag(&mut self, id: TxNodeId, opens_subtree: bool) {
        let node = self.node_mut(id);
        node.speculation = true;
        if opens_subtree {
            node.visited_points = Some(HashSet::default());
            node.spec_time = Some(Duration::ZERO);
        }
    }

    /// The root of the speculation subtree containing `id`: the
    /// highest ancestor still marked speculative.
    pub fn speculation_root(&self, id: TxNodeId) -> TxNodeId {
        let mut current = id;
        while let Some(parent) = self.node(current).parent {
            if self.node(parent).speculation {
                current = parent;
            } else {
                break;
            }
        }
        current
    }

    /// Record a visit of `point` inside the speculation subtree of
    /// `id`. Returns true when the point was already visited, which
    /// means the speculated path cycled.
    pub fn speculation_visit(&mut self, id: TxNodeId, point: BlockRef) -> bool {
        let root = self.speculation_root(id);
        let owner = match self.owner_of_visited(root) {
            Some(owner) => owner,
            None => root,
        };
        let node = self.node_mut(owner);
        match node.visited_points.as_mut() {
            Some(set) => !set.insert(point),
            None => false,
        }
    }

    fn owner_of_visited(&self, root: TxNodeId) -> Option<TxNodeId> {
        let mut current = Some(root);
        while let Some(id) = current {
            if self.node(id).visited_points.is_some() {
                return Some(id);
            }
            current = self.node(id).parent.filter(|p| self.node(*p).speculation);
        }
        None
    }

    pub fn add_spec_time(&mut self, id: TxNodeId, elapsed: Duration) {
        let root = self.speculation_root(id);
        let owner = self.owner_of_visited(root).unwrap_or(root);
        if let Some(total) = self.node_mut(owner).spec_time.as_mut() {
            *total += elapsed;
        }
    }

    pub fn spec_time(&self, id: TxNodeId) -> Duration {
        let root = self.speculation_root(id);
        let owner = self.owner_of_visited(root).unwrap_or(root);
        self.node(owner).spec_time.unwrap_or(Duration::ZERO)
    }

    pub fn store_speculation_unsat_core(&mut self, id: TxNodeId, core: &[ExprRef], branch: SpecBranchId) {
        let node = self.node_mut(id);
        node.speculation_unsat_core = core.to_vec();
        node.second_check = Some(branch);
    }

    pub fn set_second_check(&mut self, id: TxNodeId, branch: SpecBranchId) {
        self.node_mut(id).second_check = Some(branch);
    }

    pub fn second_check(&self, id: TxNodeId) -> Option<SpecBranchId> {
        self.node(id).second_check
    }

    /// Apply the stored speculation unsat core as marks, used on the
    /// speculation root's parent during a back-jump so a rerun can
    /// subsume what the failed speculation learned.
    pub fn mark_speculation_core(&mut self, id: TxNodeId) {
        let core = self.node(id).speculation_unsat_core.clone();
        if !core.is_empty() {
            self.mark_path_condition(id, &core);
        }
    }

    /// Collect the speculation subtree rooted at `root` bottom-up,
    /// flagging every node speculation-failed.
    pub fn collect_speculation_nodes(&mut self, root: TxNodeId) -> Vec<TxNodeId> {
        let mut result = Vec::new();
        self.collect_speculation_nodes_rec(root, &mut result);
        result
    }

    fn collect_speculation_nodes_rec(&mut self, id: TxNodeId, out: &mut Vec<TxNodeId>) {
        let (left, right) = {
            let node = self.node(id);
            (node.left, node.right)
        };
        if let Some(left) = left {
            self.collect_speculation_nodes_rec(left, out);
        }
        if let Some(right) = right {
            self.collect_speculation_nodes_rec(right, out);
        }
        self.node_mut(id).speculation_failed = true;
        out.push(id);
    }

    /// Unlink a speculation-failed node without storing entries.
    pub fn remove_speculation_failed(&mut self, id: TxNodeId) {
        let node = self.node(id);
        assert!(node.speculation_failed);
        let parent = node.parent;
        self.nodes[id.0 as usize] = None;
        self.free.push(id.0);
        if let Some(parent_id) = parent {
            if let Some(parent_node) = self.nodes[parent_id.0 as usize].as_mut() {
                if parent_node.left == Some(id) {
                    parent_node.left = None;
                }
                if parent_node.right == Some(id) {
                    parent_node.right = None;
                }
            }
        } else {
            self.root = None;
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// All live nodes with their parents, for the dot rendering.
    pub fn live_nodes(&self) -> Vec<(TxNodeId, Option<TxNodeId>, u64, bool, Option<StateId>)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let node = slot.as_ref()?;
                Some((TxNodeId(i as u32), node.parent, node.sequence, node.speculation, node.state))
            })
            .collect()
    }
}

/// Replace every input array in `e` by its shadow twin.
fn shadow(arena: &mut ExprArena, e: ExprRef) -> ExprRef {
    let mut arrays = Vec::new();
    arena.collect_arrays(e, &mut arrays);
    let mut rename: HashMap<ArrayId, ArrayId, RandomState> = HashMap::default();
    for array in arrays {
        if arena.array_info(array).shadow_of.is_none() {
            let twin = arena.shadow_array(array);
            rename.insert(array, twin);
        }
    }
    arena.rename_arrays(e, &rename)
}

/// Bind shadow arrays back to the inputs they abstract. This realizes
/// the existential binding for the subsumption query: the shadowed
/// interpolant holds of the current state's inputs exactly when the
/// original arrays can stand in for their twins.
fn unshadow(arena: &mut ExprArena, e: ExprRef) -> ExprRef {
    let mut arrays = Vec::new();
    arena.collect_arrays(e, &mut arrays);
    let mut rename: HashMap<ArrayId, ArrayId, RandomState> = HashMap::default();
    for array in arrays {
        if let Some(original) = arena.array_info(array).shadow_of {
            rename.insert(array, original);
        }
    }
    arena.rename_arrays(e, &rename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, INDEX_WIDTH};
    use crate::ir::{BlockId, FunId};
    use crate::solver::enumerate::EnumCore;

    fn point(fun: u32, block: u32) -> BlockRef {
        BlockRef { fun: FunId(fun), block: BlockId(block) }
    }

    fn setup() -> (ExprArena, Solver) {
        (ExprArena::new(), Solver::new(Box::new(EnumCore::new())))
    }

    #[test]
    fn split_mirrors_search_tree() {
        let mut tree = TxTree::new();
        let root = tree.set_root(StateId(0));
        let (left, right) = tree.split(root, StateId(1), StateId(2), &[]);
        assert_eq!(tree.state_of(root), None);
        assert_eq!(tree.state_of(left), Some(StateId(1)));
        assert_eq!(tree.state_of(right), Some(StateId(2)));
        assert!(tree.sequence(left) < tree.sequence(right));
    }

    #[test]
    fn explored_node_stores_entry_and_subsumes() {
        let (mut arena, mut solver) = setup();
        let mut tree = TxTree::new();

        let x_array = arena.mk_array("x", 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let x = arena.mk_read(x_array, zero);
        let ten = arena.mk_u64(10, 8);
        let lt10 = arena.mk_binary(BinOp::Ult, x, ten);

        let root = tree.set_root(StateId(0));
        let (left, right) = tree.split(root, StateId(1), StateId(2), &[lt10]);
        tree.set_current(left, point(0, 3));
        tree.mark_path_condition(left, &[lt10]);
        tree.remove(&mut arena, left);
        assert_eq!(tree.entries_at(point(0, 3)), 1);

        // A state whose path condition is x < 5 (stronger) is subsumed
        // at the same program point.
        let five = arena.mk_u64(5, 8);
        let lt5 = arena.mk_binary(BinOp::Ult, x, five);
        let mut constraints = ConstraintSet::new();
        constraints.add(&mut arena, lt5).unwrap();
        let (l2, _r2) = tree.split(right, StateId(3), StateId(4), &[lt5]);
        tree.set_current(l2, point(0, 3));
        assert!(tree.subsumption_check(&mut arena, &mut solver, &constraints, l2, point(0, 3)));

        // A state with x < 20 (weaker) is not.
        let twenty = arena.mk_u64(20, 8);
        let lt20 = arena.mk_binary(BinOp::Ult, x, twenty);
        let mut weak = ConstraintSet::new();
        weak.add(&mut arena, lt20).unwrap();
        assert!(!tree.subsumption_check(&mut arena, &mut solver, &weak, l2, point(0, 3)));
    }

    #[test]
    fn incomplete_nodes_store_nothing() {
        let (mut arena, _solver) = setup();
        let mut tree = TxTree::new();
        let root = tree.set_root(StateId(0));
        let (left, _right) = tree.split(root, StateId(1), StateId(2), &[]);
        tree.set_current(left, point(0, 1));
        tree.set_generic_early_termination(left);
        tree.remove(&mut arena, left);
        assert_eq!(tree.entries_at(point(0, 1)), 0);
    }

    #[test]
    fn entries_use_shadow_arrays() {
        let (mut arena, _solver) = setup();
        let mut tree = TxTree::new();
        let x_array = arena.mk_array("x", 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let x = arena.mk_read(x_array, zero);
        let five = arena.mk_u64(5, 8);
        let lt5 = arena.mk_binary(BinOp::Ult, x, five);

        let root = tree.set_root(StateId(0));
        let (left, _right) = tree.split(root, StateId(1), StateId(2), &[lt5]);
        tree.set_current(left, point(0, 1));
        tree.mark_path_condition(left, &[lt5]);
        tree.remove(&mut arena, left);

        // The stored interpolant mentions only the shadow twin.
        let shadow = arena.array_info(x_array).shadow.expect("shadow was created");
        assert_eq!(arena.array_info(shadow).shadow_of, Some(x_array));
    }

    #[test]
    fn marks_propagate_to_parent() {
        let (mut arena, _solver) = setup();
        let mut tree = TxTree::new();
        let x_array = arena.mk_array("x", 1);
        let zero = arena.mk_u64(0, INDEX_WIDTH);
        let x = arena.mk_read(x_array, zero);
        let five = arena.mk_u64(5, 8);
        let lt5 = arena.mk_binary(BinOp::Ult, x, five);

        let root = tree.set_root(StateId(0));
        tree.set_current(root, point(0, 0));
        let (left, right) = tree.split(root, StateId(1), StateId(2), &[lt5]);
        tree.set_current(left, point(0, 1));
        tree.set_current(right, point(0, 2));
        tree.mark_path_condition(left, &[lt5]);
        tree.remove(&mut arena, left);
        // Parent still has the right child; removing the right child
        // folds the parent, whose entry carries the inherited mark.
        tree.remove(&mut arena, right);
        assert_eq!(tree.entries_at(point(0, 0)), 1);
        assert_eq!(tree.num_nodes(), 0);
    }

    #[test]
    fn speculation_subtree_collection() {
        let (_arena, _solver) = setup();
        let mut tree = TxTree::new();
        let root = tree.set_root(StateId(0));
        let (spec, _keep) = tree.split(root, StateId(1), StateId(2), &[]);
        tree.set_speculation_flag(spec, true);
        let (a, b) = tree.split(spec, StateId(3), StateId(4), &[]);
        assert!(tree.is_speculation(a) && tree.is_speculation(b));
        assert_eq!(tree.speculation_root(a), spec);

        let collected = tree.collect_speculation_nodes(spec);
        assert_eq!(collected.len(), 3);
        assert!(collected.iter().all(|id| tree.is_speculation_failed(*id)));
        for id in collected {
            tree.remove_speculation_failed(id);
        }
        assert_eq!(tree.num_nodes(), 2);
    }

    #[test]
    fn speculation_cycle_detection() {
        let mut tree = TxTree::new();
        let root = tree.set_root(StateId(0));
        let (spec, _keep) = tree.split(root, StateId(1), StateId(2), &[]);
        tree.set_speculation_flag(spec, true);
        assert!(!tree.speculation_visit(spec, point(0, 1)));
        assert!(!tree.speculation_visit(spec, point(0, 2)));
        assert!(tree.speculation_visit(spec, point(0, 1)));
        // Children share the root's visited set.
        let (a, _b) = tree.split(spec, StateId(3), StateId(4), &[]);
        assert!(tree.speculation_visit(a, point(0, 2)));
        assert!(!tree.speculation_visit(a, point(0, 7)));
    }
}
