//! Immutable mesh asset produced by the importer

use crate::{AssetHandle, BitStream, DeviceAddress};
use std::collections::{BTreeMap, HashMap};
use virtmesh_core::{
    Bounds, ClusterGroupRecord, CsrGraph, LodPassStatistics, Meshlet, MeshletCullBounds,
};

/// GPU-ready clusters of one mesh representation.
///
/// Vertex `i` of a meshlet is vertex `vertex_offset + i` of both the
/// geometry bitstream and the attribute stream.
#[derive(Debug, Clone, Default)]
pub struct ClusterGeometry {
    pub meshlets: Vec<Meshlet>,
    /// 8-bit triangle indices into each meshlet's vertex list
    pub local_indices: Vec<u8>,
    pub cull_bounds: Vec<MeshletCullBounds>,
    /// Quantized positions, see [`crate::VertexDataQuantizer::quantize_meshlets`]
    pub geometry: BitStream,
    /// Encoded attributes, `MeshData::attribute_stride` bytes per vertex
    pub attributes: Vec<u8>,
    pub vertex_count: usize,
    pub bounds: Bounds,
}

impl ClusterGeometry {
    pub fn meshlet_count(&self) -> usize {
        self.meshlets.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.meshlets.iter().map(|m| m.triangle_count as usize).sum()
    }
}

/// One level of the discrete LOD chain
#[derive(Debug, Clone, Default)]
pub struct MeshLod {
    pub clusters: ClusterGeometry,
    /// Simplification error relative to the mesh extents, 0 for LOD 0
    pub error: f32,
}

/// The meshlet LOD-DAG in its GPU-ready form
#[derive(Debug, Clone, Default)]
pub struct VirtualGeometry {
    pub clusters: ClusterGeometry,
    pub meshlet_groups: Vec<ClusterGroupRecord>,
    pub lod_count: u32,
    pub pass_statistics: Vec<LodPassStatistics>,
}

/// Authoring-time view of how LOD 0 meshlets connect and would be grouped
#[derive(Debug, Clone, Default)]
pub struct MeshletAdjacency {
    pub graph: CsrGraph,
    /// Group of every LOD 0 meshlet
    pub partition: Vec<usize>,
    pub edge_cut: i64,
}

#[derive(Debug, Clone, Default)]
pub struct MeshData {
    /// Discrete LOD chain, LOD 0 first
    pub lods: Vec<MeshLod>,
    pub virtual_geometry: Option<VirtualGeometry>,
    pub meshlet_adjacency: Option<MeshletAdjacency>,
    /// Attribute name to byte offset within one encoded attribute record
    pub layout_table: BTreeMap<String, usize>,
    pub attribute_stride: usize,
    pub quantization_grid_bits: u32,
    pub bounds: Bounds,
}

impl MeshData {
    /// Clusters that are uploaded and rendered: the virtual geometry when
    /// present, LOD 0 otherwise
    pub fn primary_clusters(&self) -> Option<&ClusterGeometry> {
        self.virtual_geometry
            .as_ref()
            .map(|v| &v.clusters)
            .or_else(|| self.lods.first().map(|lod| &lod.clusters))
    }
}

/// Device buffers of a mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MeshBufferKey {
    Geometry,
    Attributes,
    Meshlets,
    MicroIndices,
    MeshletsCullData,
}

impl MeshBufferKey {
    pub const ALL: [MeshBufferKey; 5] = [
        MeshBufferKey::Geometry,
        MeshBufferKey::Attributes,
        MeshBufferKey::Meshlets,
        MeshBufferKey::MicroIndices,
        MeshBufferKey::MeshletsCullData,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MeshBufferKey::Geometry => "GEOMETRY",
            MeshBufferKey::Attributes => "ATTRIBUTES",
            MeshBufferKey::Meshlets => "MESHLETS",
            MeshBufferKey::MicroIndices => "MICRO_INDICES",
            MeshBufferKey::MeshletsCullData => "MESHLETS_CULL_DATA",
        }
    }
}

/// Imported mesh, shared between the scene and the renderer
#[derive(Debug)]
pub struct Mesh {
    pub handle: AssetHandle,
    pub data: MeshData,
    pub buffers: HashMap<MeshBufferKey, DeviceAddress>,
}

impl Mesh {
    pub fn buffer(&self, key: MeshBufferKey) -> Option<DeviceAddress> {
        self.buffers.get(&key).copied()
    }
}
