//! Cluster graph (LOD-DAG) construction
//!
//! This crate turns a triangle mesh into a hierarchy of meshlet generations:
//! - Open boundary detection over the current meshlet generation
//! - Distance and UV bounded vertex welding
//! - Meshlet grouping through an injected graph partitioner
//! - Per-group simplification with monotone error propagation

pub mod builder;
pub mod edge_map;
pub mod grouping;
pub mod welder;

pub use builder::*;
pub use edge_map::*;
pub use grouping::*;
pub use welder::*;

/// Linear interpolation between `a` (t = 0) and `b` (t = 1)
pub(crate) fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}
