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

//! The search tree: a binary tree recording every fork since program
//! start. Nodes live in a slab arena addressed by [NodeId], so states
//! and nodes can reference each other by index without ownership
//! cycles, and removal is O(1). Every live state is the payload of
//! exactly one leaf.

use crate::state::StateId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

#[derive(Clone, Debug)]
struct Node {
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    state: Option<StateId>,
}

#[derive(Clone, Debug, Default)]
pub struct SearchTree {
    nodes: Vec<Option<Node>>,
    free: Vec<u32>,
    pub root: Option<NodeId>,
}

impl SearchTree {
    pub fn new() -> Self {
        SearchTree::default()
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(slot) = self.free.pop() {
            self.nodes[slot as usize] = Some(node);
            NodeId(slot)
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() as u32 - 1)
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0 as usize].as_ref().expect("stale search tree node")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0 as usize].as_mut().expect("stale search tree node")
    }

    pub fn set_root(&mut self, state: StateId) -> NodeId {
        assert!(self.root.is_none());
        let id = self.alloc(Node { parent: None, left: None, right: None, state: Some(state) });
        self.root = Some(id);
        id
    }

    pub fn state_of(&self, id: NodeId) -> Option<StateId> {
        self.node(id).state
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        let node = self.node(id);
        node.left.is_none() && node.right.is_none()
    }

    /// Split a leaf on a fork: its payload clears and two fresh leaves
    /// carry the successor states. Returns `(left, right)`.
    pub fn split(&mut self, id: NodeId, left_state: StateId, right_state: StateId) -> (NodeId, NodeId) {
        assert!(self.is_leaf(id), "can only split leaves");
        let left = self.alloc(Node { parent: Some(id), left: None, right: None, state: Some(left_state) });
        let right = self.alloc(Node { parent: Some(id), left: None, right: None, state: Some(right_state) });
        let node = self.node_mut(id);
        node.state = None;
        node.left = Some(left);
        node.right = Some(right);
        (left, right)
    }

    /// Remove a leaf, pruning any chain of now-childless ancestors.
    pub fn remove(&mut self, id: NodeId) {
        let mut cursor = Some(id);
        while let Some(id) = cursor {
            let node = self.node(id);
            assert!(node.left.is_none() && node.right.is_none(), "can only remove leaves");
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

    /// Every leaf that carries a state, in allocation order.
    pub fn live_leaves(&self) -> Vec<(NodeId, StateId)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let node = slot.as_ref()?;
                if node.left.is_none() && node.right.is_none() {
                    node.state.map(|s| (NodeId(i as u32), s))
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_remove() {
        let mut tree = SearchTree::new();
        let root = tree.set_root(StateId(0));
        let (left, right) = tree.split(root, StateId(1), StateId(2));
        assert_eq!(tree.state_of(root), None);
        assert_eq!(tree.state_of(left), Some(StateId(1)));
        assert_eq!(tree.state_of(right), Some(StateId(2)));
        assert_eq!(tree.live_leaves().len(), 2);

        tree.remove(left);
        // Root still has the right child, so it stays.
        assert_eq!(tree.num_nodes(), 2);
        tree.remove(right);
        assert_eq!(tree.num_nodes(), 0);
        assert!(tree.root.is_none());
    }

    #[test]
    fn node_slots_are_reused() {
        let mut tree = SearchTree::new();
        let root = tree.set_root(StateId(0));
        let (left, right) = tree.split(root, StateId(1), StateId(2));
        tree.remove(left);
        let (a, b) = tree.split(right, StateId(3), StateId(4));
        assert!(tree.num_nodes() <= 4);
        assert_eq!(tree.state_of(a), Some(StateId(3)));
        assert_eq!(tree.state_of(b), Some(StateId(4)));
    }
}
