//! # virtmesh algorithms
//!
//! Spatial search and graph partitioning used by the cluster-graph builder:
//! a KD-tree over tagged vertex positions and the meshlet-graph partitioners.

pub mod kd_tree;
pub mod partition;

pub use kd_tree::*;
pub use partition::*;
