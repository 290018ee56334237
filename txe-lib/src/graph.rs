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

//! Graphviz rendering of the interpolation tree (`tree.dot`).

use ahash::RandomState;
use petgraph::dot::{Config, Dot};
use petgraph::Graph;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::ExecError;
use crate::txtree::{TxNodeId, TxTree};

pub fn render_tx_tree(tree: &TxTree) -> String {
    let mut graph: Graph<String, ()> = Graph::new();
    let mut indices: HashMap<TxNodeId, petgraph::graph::NodeIndex, RandomState> = HashMap::default();
    let nodes = tree.live_nodes();
    for (id, _, sequence, speculation, state) in &nodes {
        let mut label = format!("n{}", sequence);
        if *speculation {
            label.push_str(" [spec]");
        }
        if let Some(state) = state {
            label.push_str(&format!(" s{}", state.0));
        }
        indices.insert(*id, graph.add_node(label));
    }
    for (id, parent, _, _, _) in &nodes {
        if let Some(parent) = parent {
            if let (Some(from), Some(to)) = (indices.get(parent), indices.get(id)) {
                graph.add_edge(*from, *to, ());
            }
        }
    }
    format!("{:?}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
}

pub fn save_tx_tree(tree: &TxTree, path: &Path) -> Result<(), ExecError> {
    fs::write(path, render_tx_tree(tree))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateId;

    #[test]
    fn renders_nodes_and_edges() {
        let mut tree = TxTree::new();
        let root = tree.set_root(StateId(0));
        let (left, _right) = tree.split(root, StateId(1), StateId(2), &[]);
        tree.set_speculation_flag(left, true);
        let dot = render_tx_tree(&tree);
        assert!(dot.contains("digraph"));
        assert!(dot.contains("n1"));
        assert!(dot.contains("[spec]"));
        // Two edges from the root to its children.
        assert_eq!(dot.matches("->").count(), 2);
    }
}
