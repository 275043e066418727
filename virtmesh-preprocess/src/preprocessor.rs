//! Stateless transforms over vertex and index buffers

use crate::simplifier::{vertex_adapter, MeshoptSimplifier};
use crate::{MeshSimplifier, SimplifiedIndices};
use itertools::Itertools;
use meshopt::VertexStream;
use serde::{Deserialize, Serialize};
use virtmesh_core::{
    Aabb, Bounds, ClusterizedMesh, Error, Meshlet, MeshletCullBounds, MeshletEdge,
    MeshletLodCullingData, Point3f, Result, Sphere, VertexView, MAX_MESHLET_TRIANGLES,
    MAX_MESHLET_VERTICES, POSITION_SIZE,
};

/// Overdraw optimization may degrade vertex cache efficiency by at most this factor
pub const OVERDRAW_THRESHOLD: f32 = 1.05;

// ============================================================
// Configuration
// ============================================================

/// Meshlet size limits and clustering heuristics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshletConfig {
    /// Maximum vertices per meshlet (at most 64)
    pub max_vertices: usize,
    /// Maximum triangles per meshlet (at most 124, divisible by 4)
    pub max_triangles: usize,
    /// Weight of normal-cone compactness against cluster fill, 0.0 disables cone awareness
    pub cone_weight: f32,
}

impl Default for MeshletConfig {
    fn default() -> Self {
        Self {
            max_vertices: MAX_MESHLET_VERTICES,
            max_triangles: MAX_MESHLET_TRIANGLES,
            cone_weight: 0.0,
        }
    }
}

impl MeshletConfig {
    /// Set meshlet vertex and triangle limits
    pub fn with_limits(mut self, max_vertices: usize, max_triangles: usize) -> Self {
        self.max_vertices = max_vertices;
        self.max_triangles = max_triangles;
        self
    }

    /// Set the cone culling weight passed to meshopt
    pub fn with_cone_weight(mut self, cone_weight: f32) -> Self {
        self.cone_weight = cone_weight;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_vertices == 0 || self.max_vertices > MAX_MESHLET_VERTICES {
            return Err(Error::InvalidData(format!(
                "max_vertices must be in 1..={}, got {}",
                MAX_MESHLET_VERTICES, self.max_vertices
            )));
        }
        if self.max_triangles == 0
            || self.max_triangles > MAX_MESHLET_TRIANGLES
            || self.max_triangles % 4 != 0
        {
            return Err(Error::InvalidData(format!(
                "max_triangles must be a multiple of 4 in 4..={}, got {}",
                MAX_MESHLET_TRIANGLES, self.max_triangles
            )));
        }
        Ok(())
    }
}

// ============================================================
// Output types
// ============================================================

/// Deduplicated and reordered mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizedMesh {
    pub vertices: Vec<u8>,
    pub indices: Vec<u32>,
}

/// Deinterleaved vertex streams
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitVertexData {
    pub positions: Vec<Point3f>,
    /// Everything after the position, `stride - 12` bytes per vertex
    pub attributes: Vec<u8>,
}

// ============================================================
// Preprocessor
// ============================================================

/// Stateless mesh transforms, parameterized by the simplifier used for LOD generation
#[derive(Debug, Clone, Default)]
pub struct MeshPreprocessor<S: MeshSimplifier = MeshoptSimplifier> {
    pub meshlet_config: MeshletConfig,
    simplifier: S,
}

impl MeshPreprocessor<MeshoptSimplifier> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: MeshSimplifier> MeshPreprocessor<S> {
    /// Preprocessor using a custom simplifier
    pub fn with_simplifier(meshlet_config: MeshletConfig, simplifier: S) -> Self {
        Self {
            meshlet_config,
            simplifier,
        }
    }

    /// Set meshlet configuration
    pub fn with_meshlet_config(mut self, meshlet_config: MeshletConfig) -> Self {
        self.meshlet_config = meshlet_config;
        self
    }

    pub fn simplifier(&self) -> &S {
        &self.simplifier
    }

    /// Splits a triangle list into meshlets and computes their cull bounds.
    ///
    /// The LOD culling record of every meshlet starts with its own bounding
    /// sphere, zero error and no parent (infinite parent sphere and error).
    pub fn generate_meshlets(
        &self,
        vertices: &VertexView<'_>,
        indices: &[u32],
    ) -> Result<ClusterizedMesh> {
        self.meshlet_config.validate()?;
        vertices.validate_indices(indices)?;
        if indices.is_empty() {
            return Err(Error::InvalidData(
                "cannot build meshlets from an empty index buffer".to_string(),
            ));
        }

        let adapter = vertex_adapter(vertices)?;
        let built = meshopt::build_meshlets(
            indices,
            &adapter,
            self.meshlet_config.max_vertices,
            self.meshlet_config.max_triangles,
            self.meshlet_config.cone_weight,
        );

        if built.is_empty() {
            return Err(Error::Algorithm(format!(
                "meshlet builder produced no meshlets for {} triangles",
                indices.len() / 3
            )));
        }

        let mut out = ClusterizedMesh {
            meshlets: Vec::with_capacity(built.len()),
            indices: Vec::with_capacity(indices.len()),
            local_indices: Vec::with_capacity(indices.len()),
            cull_bounds: Vec::with_capacity(built.len()),
        };

        for meshlet in built.iter() {
            out.meshlets.push(Meshlet {
                vertex_offset: out.indices.len() as u32,
                triangle_offset: out.local_indices.len() as u32,
                vertex_count: meshlet.vertices.len() as u32,
                triangle_count: (meshlet.triangles.len() / 3) as u32,
                vertex_bit_offset: 0,
                bitrate: 0,
            });
            out.indices.extend_from_slice(meshlet.vertices);
            out.local_indices.extend_from_slice(meshlet.triangles);

            let bounds = meshopt::compute_meshlet_bounds(meshlet, &adapter);
            let sphere = Sphere {
                center: bounds.center,
                radius: bounds.radius,
            };
            out.cull_bounds.push(MeshletCullBounds {
                vis_culling_sphere: sphere,
                cone_apex: bounds.cone_apex,
                cone_axis: bounds.cone_axis_s8.map(|c| c as i8),
                cone_cutoff: bounds.cone_cutoff_s8 as i8,
                lod_culling: MeshletLodCullingData {
                    sphere,
                    ..Default::default()
                },
            });
        }

        Ok(out)
    }

    /// Removes duplicate vertices, then reorders indices for the post-transform
    /// cache, for overdraw and finally reorders vertices for fetch locality.
    pub fn optimize_mesh(&self, vertices: &VertexView<'_>, indices: &[u32]) -> Result<OptimizedMesh> {
        vertices.validate_indices(indices)?;
        if indices.is_empty() {
            return Ok(OptimizedMesh::default());
        }
        let stride = vertices.stride();

        let streams = record_streams(vertices, stride)?;
        let (unique_count, remap) =
            meshopt::generate_vertex_remap_multi(vertices.len(), &streams, Some(indices));
        let remapped = meshopt::remap_index_buffer(Some(indices), vertices.len(), &remap);
        let unique_vertices = scatter_vertices(vertices, &remap, unique_count)?;

        let mut optimized = meshopt::optimize_vertex_cache(&remapped, unique_count);

        let unique_view = VertexView::new(&unique_vertices, stride)?;
        let adapter = vertex_adapter(&unique_view)?;
        meshopt::optimize_overdraw_in_place(&mut optimized, &adapter, OVERDRAW_THRESHOLD);

        let fetch_remap = meshopt::optimize_vertex_fetch_remap(&optimized, unique_count);
        let indices = meshopt::remap_index_buffer(Some(&optimized), unique_count, &fetch_remap);
        let vertices_out = scatter_vertices(&unique_view, &fetch_remap, fetch_remap.len())?;

        log::trace!(
            "optimized mesh: {} -> {} vertices, {} indices",
            vertices.len(),
            fetch_remap.len(),
            indices.len()
        );

        Ok(OptimizedMesh {
            vertices: vertices_out,
            indices,
        })
    }

    /// Simplified index buffer and the error the simplifier achieved
    pub fn generate_mesh_lod(
        &self,
        vertices: &VertexView<'_>,
        indices: &[u32],
        target_index_count: usize,
        target_error: f32,
        lock_borders: bool,
    ) -> Result<SimplifiedIndices> {
        self.simplifier.simplify(
            vertices,
            indices,
            target_index_count,
            target_error,
            lock_borders,
        )
    }

    /// Maps every index to the first index whose leading `key_size` bytes are equal,
    /// so that vertices differing only in attributes share one index.
    /// Used for topology analysis only, never for rendering.
    pub fn generate_shadow_index_buffer(
        &self,
        vertices: &VertexView<'_>,
        indices: &[u32],
        key_size: usize,
    ) -> Result<Vec<u32>> {
        if key_size == 0 || key_size > vertices.stride() {
            return Err(Error::InvalidData(format!(
                "shadow key size {} must be in 1..={}",
                key_size,
                vertices.stride()
            )));
        }

        vertices.validate_indices(indices)?;
        if indices.is_empty() {
            return Ok(Vec::new());
        }

        let streams = record_streams(vertices, key_size)?;
        Ok(meshopt::generate_shadow_indices_multi(
            indices,
            vertices.len(),
            &streams,
        ))
    }

    /// Deinterleaves positions from the remaining attributes
    pub fn split_vertex_data(&self, vertices: &VertexView<'_>) -> SplitVertexData {
        let attribute_size = vertices.stride() - POSITION_SIZE;
        let mut attributes = Vec::with_capacity(vertices.len() * attribute_size);
        for record in vertices.bytes().chunks_exact(vertices.stride()) {
            attributes.extend_from_slice(&record[POSITION_SIZE..]);
        }
        SplitVertexData {
            positions: vertices.positions().collect(),
            attributes,
        }
    }

    /// AABB and its conservative sphere (AABB center, half diagonal)
    pub fn generate_mesh_bounds(&self, points: &[Point3f]) -> Bounds {
        Bounds::from_aabb(Aabb::from_points(points))
    }

    /// Gathers vertex records through `remap`: output vertex `i` is input vertex `remap[i]`
    pub fn remap_vertices(&self, vertices: &VertexView<'_>, remap: &[u32]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(remap.len() * vertices.stride());
        for &index in remap {
            out.extend_from_slice(vertices.record(index as usize)?);
        }
        Ok(out)
    }

    /// Unique edges of a triangle list as a line list, for wireframe debugging
    pub fn convert_to_line_topology(&self, indices: &[u32]) -> Vec<u32> {
        indices
            .chunks_exact(3)
            .flat_map(|t| {
                [
                    MeshletEdge::new(t[0], t[1]),
                    MeshletEdge::new(t[1], t[2]),
                    MeshletEdge::new(t[2], t[0]),
                ]
            })
            .filter(|e| !e.is_degenerate())
            .unique()
            .flat_map(|e| [e.first, e.second])
            .collect()
    }

    /// Scale factor converting relative simplification error to mesh units
    pub fn simplify_scale(&self, vertices: &VertexView<'_>) -> Result<f32> {
        let adapter = vertex_adapter(vertices)?;
        Ok(meshopt::simplify_scale(&adapter))
    }
}

/// meshoptimizer accepts at most this many streams per call
const MAX_VERTEX_STREAMS: usize = 16;

/// Covers the leading `key_size` bytes of every record with fixed-width byte
/// streams, so records of any stride can be compared by meshopt
fn record_streams<'a>(vertices: &'a VertexView<'_>, key_size: usize) -> Result<Vec<VertexStream<'a>>> {
    let stride = vertices.stride();
    let bytes = vertices.bytes();
    let mut streams = Vec::new();
    let mut offset = 0;
    while offset < key_size {
        let data = bytes[offset..].as_ptr();
        let (stream, width) = match key_size - offset {
            64.. => (VertexStream::new_with_stride::<[u8; 64], u8>(data, stride), 64),
            16.. => (VertexStream::new_with_stride::<[u8; 16], u8>(data, stride), 16),
            4.. => (VertexStream::new_with_stride::<[u8; 4], u8>(data, stride), 4),
            _ => (VertexStream::new_with_stride::<u8, u8>(data, stride), 1),
        };
        streams.push(stream);
        offset += width;
    }

    if streams.len() > MAX_VERTEX_STREAMS {
        return Err(Error::Unsupported(format!(
            "vertex key of {} bytes needs {} streams, at most {} are supported",
            key_size,
            streams.len(),
            MAX_VERTEX_STREAMS
        )));
    }
    Ok(streams)
}

/// Writes record `i` to slot `remap[i]` of a buffer holding `vertex_count` records.
/// Records mapped to `u32::MAX` are unused and dropped.
fn scatter_vertices(vertices: &VertexView<'_>, remap: &[u32], vertex_count: usize) -> Result<Vec<u8>> {
    let stride = vertices.stride();
    let mut out = vec![0u8; vertex_count * stride];
    for (source, &target) in remap.iter().enumerate() {
        if target == u32::MAX {
            continue;
        }
        let start = target as usize * stride;
        let slot = out.get_mut(start..start + stride).ok_or_else(|| {
            Error::Algorithm(format!(
                "vertex remap target {} out of range for {} vertices",
                target, vertex_count
            ))
        })?;
        slot.copy_from_slice(vertices.record(source)?);
    }
    Ok(out)
}
