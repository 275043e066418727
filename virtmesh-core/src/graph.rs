//! Weighted adjacency graph in compressed sparse row form (METIS layout)

use crate::{Error, Result};

/// Undirected weighted graph stored as CSR arrays with zero based numbering.
///
/// The neighbours of node `n` are `adjncy[xadj[n]..xadj[n + 1]]` with matching
/// weights in `adjwgt`. Every edge appears once in each direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsrGraph {
    pub xadj: Vec<i32>,
    pub adjncy: Vec<i32>,
    pub adjwgt: Vec<i32>,
}

impl CsrGraph {
    /// Builds the CSR arrays from per-node `(neighbour, weight)` lists
    pub fn from_weighted_adjacency(adjacency: &[Vec<(usize, i32)>]) -> Result<Self> {
        let mut xadj = Vec::with_capacity(adjacency.len() + 1);
        let mut adjncy = Vec::new();
        let mut adjwgt = Vec::new();

        for (node, neighbours) in adjacency.iter().enumerate() {
            xadj.push(adjncy.len() as i32);
            for &(neighbour, weight) in neighbours {
                if neighbour >= adjacency.len() || neighbour == node {
                    return Err(Error::InvalidData(format!(
                        "invalid adjacency {} -> {} in graph of {} nodes",
                        node,
                        neighbour,
                        adjacency.len()
                    )));
                }
                adjncy.push(neighbour as i32);
                adjwgt.push(weight);
            }
        }
        xadj.push(adjncy.len() as i32);

        Ok(Self {
            xadj,
            adjncy,
            adjwgt,
        })
    }

    pub fn node_count(&self) -> usize {
        self.xadj.len().saturating_sub(1)
    }

    /// Number of undirected edges
    pub fn edge_count(&self) -> usize {
        self.adjncy.len() / 2
    }

    /// `(neighbour, weight)` pairs of `node`
    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = (usize, i32)> + '_ {
        let range = self.xadj[node] as usize..self.xadj[node + 1] as usize;
        self.adjncy[range.clone()]
            .iter()
            .zip(&self.adjwgt[range])
            .map(|(&n, &w)| (n as usize, w))
    }

    /// Sum of the weights of edges whose endpoints sit in different parts
    pub fn edge_cut(&self, partition: &[usize]) -> i64 {
        let mut cut = 0i64;
        for node in 0..self.node_count() {
            for (neighbour, weight) in self.neighbors(node) {
                if partition[node] != partition[neighbour] {
                    cut += weight as i64;
                }
            }
        }
        cut / 2
    }
}
