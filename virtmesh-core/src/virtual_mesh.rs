//! Final artifact of the cluster-graph build

use crate::meshlet::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A DAG edge: a group of child meshlets that was simplified into `parents`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterGroupRecord {
    /// LOD pass that produced the parents (1 for the first simplified level)
    pub lod_level: u32,
    pub children: MeshClusterGroup,
    pub parents: Range<u32>,
    /// Accumulated mesh-space error assigned to the parents
    pub error: f32,
}

/// Counters collected during one LOD generation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LodPassStatistics {
    pub lod_level: u32,
    pub input_meshlet_count: usize,
    pub output_meshlet_count: usize,
    pub group_count: usize,
    pub input_vertex_count: usize,
    pub welded_vertex_count: usize,
    pub locked_vertex_count: usize,
    pub group_simplification_failure_count: usize,
    pub skipped_group_count: usize,
    pub degenerate_triangles_erased: usize,
    pub min_welder_vertex_distance: f32,
    pub mesh_scale: f32,
}

/// Every LOD level's meshlets concatenated into flat arrays
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualMesh {
    pub vertices: Vec<u8>,
    pub indices: Vec<u32>,
    pub local_indices: Vec<u8>,
    pub meshlets: Vec<Meshlet>,
    pub meshlet_groups: Vec<ClusterGroupRecord>,
    pub cull_bounds: Vec<MeshletCullBounds>,
    pub vertex_stride: usize,
    /// Number of LOD passes that ran, including LOD 0
    pub lod_count: u32,
    pub pass_statistics: Vec<LodPassStatistics>,
}

impl VirtualMesh {
    pub fn meshlet_count(&self) -> usize {
        self.meshlets.len()
    }

    /// Triangles across all LOD levels
    pub fn triangle_count(&self) -> usize {
        self.meshlets.iter().map(|m| m.triangle_count as usize).sum()
    }

    pub fn triangle(&self, meshlet: usize, triangle: usize) -> [u32; 3] {
        meshlet_triangle(
            &self.meshlets[meshlet],
            &self.indices,
            &self.local_indices,
            triangle,
        )
    }

    /// Meshlets that no group consumed, i.e. the roots of the DAG
    pub fn root_meshlets(&self) -> Vec<u32> {
        let mut consumed = vec![false; self.meshlets.len()];
        for group in &self.meshlet_groups {
            for &child in &group.children {
                consumed[child as usize] = true;
            }
        }
        (0..self.meshlets.len() as u32)
            .filter(|&m| !consumed[m as usize])
            .collect()
    }
}
