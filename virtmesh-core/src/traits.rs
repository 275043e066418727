//! Core traits for virtmesh

use crate::{graph::CsrGraph, point::*, Result};

/// Trait for nearest neighbor search functionality
pub trait NearestNeighborSearch {
    /// Find the k nearest neighbors to a query point
    fn find_k_nearest(&self, query: &Point3f, k: usize) -> Vec<(usize, f32)>;

    /// Find all neighbors within a given radius
    fn find_radius_neighbors(&self, query: &Point3f, radius: f32) -> Vec<(usize, f32)>;
}

/// Balanced k-way graph partitioner minimizing the weighted edge cut
pub trait GraphPartitioner: Send + Sync {
    /// Assigns every node of `graph` a part in `0..part_count`
    fn partition(&self, graph: &CsrGraph, part_count: usize) -> Result<Vec<usize>>;
}
