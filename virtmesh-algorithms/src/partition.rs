//! Graph partitioners used to group meshlets
//!
//! [`MetisPartitioner`] is the production implementation. METIS keeps global
//! state and is not re-entrant unless built with thread-local storage, so every
//! call from every instance serializes on one process-wide lock.
//! [`DeterministicPartitioner`] is a pure Rust region-growing partitioner with
//! fully reproducible output, meant to be injected in tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use virtmesh_core::{CsrGraph, Error, GraphPartitioner, Result};

static METIS_LOCK: Mutex<()> = Mutex::new(());

/// K-way edge-cut partitioning through METIS
#[derive(Debug, Clone, Copy)]
pub struct MetisPartitioner {
    /// Seed for METIS' internal random number generator
    pub seed: i32,
}

impl Default for MetisPartitioner {
    fn default() -> Self {
        Self { seed: 17 }
    }
}

impl MetisPartitioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the METIS random seed
    pub fn with_seed(mut self, seed: i32) -> Self {
        self.seed = seed;
        self
    }
}

impl GraphPartitioner for MetisPartitioner {
    fn partition(&self, graph: &CsrGraph, part_count: usize) -> Result<Vec<usize>> {
        let node_count = graph.node_count();
        if let Some(trivial) = trivial_partition(graph, part_count) {
            return Ok(trivial);
        }

        let xadj: Vec<metis::Idx> = graph.xadj.iter().map(|&v| v as metis::Idx).collect();
        let adjncy: Vec<metis::Idx> = graph.adjncy.iter().map(|&v| v as metis::Idx).collect();
        let adjwgt: Vec<metis::Idx> = graph.adjwgt.iter().map(|&v| v as metis::Idx).collect();
        let mut part: Vec<metis::Idx> = vec![0; node_count];
        let part_count = part_count.min(node_count);

        let edge_cut = {
            let _guard = METIS_LOCK
                .lock()
                .map_err(|_| Error::Partition("METIS lock poisoned".to_string()))?;

            metis::Graph::new(1, part_count as metis::Idx, &xadj, &adjncy)
                .map_err(|e| Error::Partition(format!("invalid METIS graph: {:?}", e)))?
                .set_option(metis::option::Seed(self.seed))
                .set_adjwgt(&adjwgt)
                .part_kway(&mut part)
                .map_err(|e| Error::Partition(format!("METIS_PartGraphKway failed: {:?}", e)))?
        };

        log::trace!(
            "METIS split {} nodes into {} parts, edge cut {}",
            node_count,
            part_count,
            edge_cut
        );

        part.into_iter()
            .map(|p| {
                usize::try_from(p)
                    .ok()
                    .filter(|&p| p < part_count)
                    .ok_or_else(|| Error::Partition(format!("METIS returned part {}", p)))
            })
            .collect()
    }
}

/// Greedy region growing: parts are filled one at a time, always adding the
/// frontier node with the heaviest connection to the part (ties go to the
/// lowest node index). Parts hold `ceil(nodes / part_count)` nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicPartitioner;

impl GraphPartitioner for DeterministicPartitioner {
    fn partition(&self, graph: &CsrGraph, part_count: usize) -> Result<Vec<usize>> {
        if let Some(trivial) = trivial_partition(graph, part_count) {
            return Ok(trivial);
        }

        let node_count = graph.node_count();
        let part_count = part_count.min(node_count);
        let part_size = node_count.div_ceil(part_count);
        let mut assignment: Vec<Option<usize>> = vec![None; node_count];
        let mut current_part = 0;
        let mut next_seed = 0;

        while let Some(seed) = (next_seed..node_count).find(|&n| assignment[n].is_none()) {
            next_seed = seed;
            let mut frontier: BTreeMap<usize, i64> = BTreeMap::new();
            let mut size = 0;
            let mut candidate = Some(seed);

            while let Some(node) = candidate {
                assignment[node] = Some(current_part);
                frontier.remove(&node);
                size += 1;
                if size == part_size {
                    break;
                }
                for (neighbour, weight) in graph.neighbors(node) {
                    if assignment[neighbour].is_none() {
                        *frontier.entry(neighbour).or_insert(0) += weight as i64;
                    }
                }
                candidate = frontier
                    .iter()
                    .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                    .map(|(&n, _)| n)
                    .or_else(|| (next_seed..node_count).find(|&n| assignment[n].is_none()));
            }

            current_part = (current_part + 1).min(part_count - 1);
        }

        Ok(assignment.into_iter().map(|p| p.unwrap_or(0)).collect())
    }
}

/// Single-part answer for graphs that cannot or need not be split
fn trivial_partition(graph: &CsrGraph, part_count: usize) -> Option<Vec<usize>> {
    let node_count = graph.node_count();
    if part_count <= 1 || node_count <= 1 || graph.adjncy.is_empty() {
        Some(vec![0; node_count])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two 4-cliques joined by one light edge
    fn make_two_clusters() -> CsrGraph {
        let mut adjacency = vec![Vec::new(); 8];
        for block in [0usize, 4] {
            for a in block..block + 4 {
                for b in block..block + 4 {
                    if a != b {
                        adjacency[a].push((b, 5));
                    }
                }
            }
        }
        adjacency[3].push((4, 1));
        adjacency[4].push((3, 1));
        CsrGraph::from_weighted_adjacency(&adjacency).unwrap()
    }

    #[test]
    fn test_deterministic_separates_clusters() {
        let graph = make_two_clusters();
        let parts = DeterministicPartitioner.partition(&graph, 2).unwrap();

        assert_eq!(parts, vec![0, 0, 0, 0, 1, 1, 1, 1]);
        assert_eq!(graph.edge_cut(&parts), 1);
    }

    #[test]
    fn test_deterministic_is_reproducible() {
        let graph = make_two_clusters();
        let a = DeterministicPartitioner.partition(&graph, 3).unwrap();
        let b = DeterministicPartitioner.partition(&graph, 3).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|&p| p < 3));
    }

    #[test]
    fn test_trivial_partitions() {
        let graph = make_two_clusters();
        assert_eq!(DeterministicPartitioner.partition(&graph, 1).unwrap(), vec![0; 8]);

        let empty = CsrGraph::from_weighted_adjacency(&vec![Vec::new(); 5]).unwrap();
        assert_eq!(MetisPartitioner::new().partition(&empty, 2).unwrap(), vec![0; 5]);
    }

    #[test]
    fn test_metis_splits_clusters() {
        let graph = make_two_clusters();
        let parts = MetisPartitioner::new().partition(&graph, 2).unwrap();

        assert_eq!(parts.len(), 8);
        assert!(parts.iter().all(|&p| p < 2));
        assert_eq!(graph.edge_cut(&parts), 1, "METIS should cut only the bridge edge");

        let reseeded = MetisPartitioner::new().with_seed(3).partition(&graph, 2).unwrap();
        assert_eq!(graph.edge_cut(&reseeded), 1);
    }
}
