//! DAG structure backing a pipeline
//!
//! Nodes are interned to indices in declaration order. Edges come from the
//! configuration's `digraph` list of `"A -> B"` strings (dot-style chains
//! `"A -> B -> C"` are accepted). Construction validates name uniqueness,
//! edge endpoints, and acyclicity via a Kahn topological sort.
//!
//! Predecessor lists are kept in edge-declaration order; that order defines
//! the fan-in list a multi-predecessor node receives, so it must be stable
//! across runs.

use crate::error::{FlowError, Result};
use std::collections::HashMap;

/// Directed acyclic graph over named nodes
#[derive(Debug, Clone)]
pub struct Dag {
    names: Vec<String>,
    index: HashMap<String, usize>,
    preds: Vec<Vec<usize>>,
    succs: Vec<Vec<usize>>,
    topo: Vec<usize>,
}

impl Dag {
    /// Build a DAG from node names and `"A -> B"` edge strings
    pub fn new(nodes: &[String], digraph: &[String]) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, name) in nodes.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(FlowError::validation(format!(
                    "duplicate node name: {}",
                    name
                )));
            }
        }

        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut succs: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

        for line in digraph {
            let hops: Vec<&str> = line.split("->").map(str::trim).collect();
            if hops.len() < 2 || hops.iter().any(|h| h.is_empty()) {
                return Err(FlowError::validation(format!(
                    "malformed edge '{}', expected 'A -> B'",
                    line
                )));
            }
            for pair in hops.windows(2) {
                let from = Self::resolve(&index, pair[0])?;
                let to = Self::resolve(&index, pair[1])?;
                if !succs[from].contains(&to) {
                    succs[from].push(to);
                    preds[to].push(from);
                }
            }
        }

        let topo = Self::toposort(nodes.len(), &preds, &succs)?;

        Ok(Self {
            names: nodes.to_vec(),
            index,
            preds,
            succs,
            topo,
        })
    }

    fn resolve(index: &HashMap<String, usize>, name: &str) -> Result<usize> {
        index.get(name).copied().ok_or_else(|| {
            FlowError::validation(format!("edge endpoint '{}' is not a declared node", name))
        })
    }

    /// Kahn's algorithm; an incomplete visit means a cycle.
    fn toposort(n: usize, preds: &[Vec<usize>], succs: &[Vec<usize>]) -> Result<Vec<usize>> {
        let mut remaining: Vec<usize> = preds.iter().map(Vec::len).collect();
        let mut queue: Vec<usize> = (0..n).filter(|&v| remaining[v] == 0).collect();
        let mut order = Vec::with_capacity(n);

        let mut head = 0;
        while head < queue.len() {
            let v = queue[head];
            head += 1;
            order.push(v);
            for &w in &succs[v] {
                remaining[w] -= 1;
                if remaining[w] == 0 {
                    queue.push(w);
                }
            }
        }

        if order.len() != n {
            return Err(FlowError::validation(
                "pipeline graph contains a cycle".to_string(),
            ));
        }
        Ok(order)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Node name by index
    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    /// Node index by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Predecessors of a node, in edge-declaration order
    pub fn preds(&self, idx: usize) -> &[usize] {
        &self.preds[idx]
    }

    /// Successors of a node, in edge-declaration order
    pub fn succs(&self, idx: usize) -> &[usize] {
        &self.succs[idx]
    }

    /// In-degree per node
    pub fn in_degrees(&self) -> Vec<usize> {
        self.preds.iter().map(Vec::len).collect()
    }

    /// A topological ordering of the node indices
    pub fn topo_order(&self) -> &[usize] {
        &self.topo
    }
}
