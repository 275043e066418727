//! Meshlet data model
//!
//! Meshlets reference two shared arrays: `indices`, holding each meshlet's list
//! of mesh-space vertex indices, and `local_indices`, holding 8-bit triangle
//! indices into that list (micro-indices).

use crate::bounds::Sphere;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Hardware limit on vertices per meshlet for mesh-shading pipelines
pub const MAX_MESHLET_VERTICES: usize = 64;

/// Hardware limit on triangles per meshlet for mesh-shading pipelines
pub const MAX_MESHLET_TRIANGLES: usize = 124;

/// A bounded cluster of triangles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct Meshlet {
    /// First entry of this meshlet's vertex list in `indices`
    pub vertex_offset: u32,
    /// First micro-index of this meshlet in `local_indices`
    pub triangle_offset: u32,
    pub vertex_count: u32,
    pub triangle_count: u32,
    /// Bit position of the first quantized vertex in the geometry bitstream
    pub vertex_bit_offset: u32,
    /// Bits per quantized position channel
    pub bitrate: u32,
}

/// Runtime LOD selection record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct MeshletLodCullingData {
    pub sphere: Sphere,
    pub parent_sphere: Sphere,
    pub error: f32,
    pub parent_error: f32,
}

impl Default for MeshletLodCullingData {
    /// No parent yet: infinite parent sphere and error, zero own error
    fn default() -> Self {
        Self {
            sphere: Sphere::default(),
            parent_sphere: Sphere::unbounded(),
            error: 0.0,
            parent_error: f32::INFINITY,
        }
    }
}

/// Visibility and LOD culling data of a single meshlet
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct MeshletCullBounds {
    pub vis_culling_sphere: Sphere,
    pub cone_apex: [f32; 3],
    pub cone_axis: [i8; 3],
    pub cone_cutoff: i8,
    pub lod_culling: MeshletLodCullingData,
}

/// Undirected edge between two vertices, stored with the smaller index first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshletEdge {
    pub first: u32,
    pub second: u32,
}

impl MeshletEdge {
    pub fn new(a: u32, b: u32) -> Self {
        Self {
            first: a.min(b),
            second: a.max(b),
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.first == self.second
    }
}

/// Ordered list of meshlet indices that are merged and simplified together
pub type MeshClusterGroup = Vec<u32>;

/// Output of meshlet generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterizedMesh {
    pub meshlets: Vec<Meshlet>,
    pub indices: Vec<u32>,
    pub local_indices: Vec<u8>,
    pub cull_bounds: Vec<MeshletCullBounds>,
}

impl ClusterizedMesh {
    pub fn len(&self) -> usize {
        self.meshlets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshlets.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.meshlets.iter().map(|m| m.triangle_count as usize).sum()
    }

    /// Mesh-space vertex indices of triangle `triangle` of meshlet `meshlet`
    pub fn triangle(&self, meshlet: usize, triangle: usize) -> [u32; 3] {
        meshlet_triangle(
            &self.meshlets[meshlet],
            &self.indices,
            &self.local_indices,
            triangle,
        )
    }

    /// Appends `other`, rebasing its offsets onto the cumulative arrays.
    /// Returns the indices the appended meshlets received.
    pub fn append(&mut self, other: ClusterizedMesh) -> Range<u32> {
        let first = self.meshlets.len() as u32;
        let vertex_base = self.indices.len() as u32;
        let triangle_base = self.local_indices.len() as u32;

        self.meshlets.extend(other.meshlets.into_iter().map(|mut m| {
            m.vertex_offset += vertex_base;
            m.triangle_offset += triangle_base;
            m
        }));
        self.indices.extend(other.indices);
        self.local_indices.extend(other.local_indices);
        self.cull_bounds.extend(other.cull_bounds);

        first..self.meshlets.len() as u32
    }

    /// Flattens every meshlet back into a mesh-space triangle list
    pub fn to_triangle_list(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.triangle_count() * 3);
        for (m, meshlet) in self.meshlets.iter().enumerate() {
            for t in 0..meshlet.triangle_count as usize {
                out.extend_from_slice(&self.triangle(m, t));
            }
        }
        out
    }
}

/// Resolves a meshlet triangle through the micro-index and vertex-list arrays
pub fn meshlet_triangle(
    meshlet: &Meshlet,
    indices: &[u32],
    local_indices: &[u8],
    triangle: usize,
) -> [u32; 3] {
    let base = meshlet.triangle_offset as usize + triangle * 3;
    let vertex = |corner: usize| {
        indices[meshlet.vertex_offset as usize + local_indices[base + corner] as usize]
    };
    [vertex(0), vertex(1), vertex(2)]
}
