//! Mesh preprocessing for the clusterization pipeline
//!
//! This crate provides stateless transforms over interleaved vertex buffers
//! and triangle-list index buffers:
//! - Meshlet generation with visibility cull bounds
//! - Vertex deduplication and cache/overdraw/fetch optimization
//! - Border-preserving simplification behind the [`MeshSimplifier`] seam
//! - Shadow (position-only) index buffers, vertex splitting and bounds

pub mod preprocessor;
pub mod simplifier;

pub use preprocessor::*;
pub use simplifier::*;

use virtmesh_core::{Result, VertexView};

/// Index buffer produced by a simplifier together with the error it reached
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimplifiedIndices {
    pub indices: Vec<u32>,
    /// Achieved error relative to the mesh extents; may exceed the requested target
    pub error: f32,
}

/// Reduces the triangle count of an indexed mesh
pub trait MeshSimplifier: Send + Sync {
    /// Simplify towards `target_index_count` indices without exceeding `target_error`
    /// (relative to the mesh extents) when possible. With `lock_borders` set, edges on
    /// the open boundary of the input are never collapsed.
    fn simplify(
        &self,
        vertices: &VertexView<'_>,
        indices: &[u32],
        target_index_count: usize,
        target_error: f32,
        lock_borders: bool,
    ) -> Result<SimplifiedIndices>;
}
