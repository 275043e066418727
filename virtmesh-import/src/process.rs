//! Per-mesh import driver
//!
//! Builds the discrete LOD chain and the meshlet LOD-DAG of one mesh,
//! quantizes them, uploads the primary representation and registers the
//! resulting [`Mesh`] asset.

use crate::{
    AssetHandle, ClusterGeometry, DeviceAddress, ImportContext, Mesh, MeshBufferKey, MeshData, MeshLod,
    MeshletAdjacency, QuantizationConfig, ThreadPoolConfig, VertexDataQuantizer, VirtualGeometry,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use virtmesh_builder::{build_meshlet_graph, BuilderConfig, VirtualMeshBuilder};
use virtmesh_core::{
    ClusterizedMesh, Error, GraphPartitioner, Result, VertexLayout, VertexView, POSITION_SIZE,
};
use virtmesh_preprocess::{MeshPreprocessor, MeshletConfig};

/// Import pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub meshlets: MeshletConfig,
    pub builder: BuilderConfig,
    pub quantization: QuantizationConfig,
    /// Levels of the discrete LOD chain, LOD 0 included
    pub max_lod_count: usize,
    pub build_virtual_geometry: bool,
    /// Build levels past LOD 0
    pub build_lod_chain: bool,
    /// Partition LOD 0 meshlets for inspection
    pub build_meshlet_adjacency: bool,
    /// Target index count growth per retry when a LOD comes back empty
    pub lod_retry_growth: f32,
    /// Retries stop once the target exceeds the initial target by this factor
    pub lod_retry_limit: f32,
    /// Error bound for LOD chain simplification, relative to the mesh extents
    pub lod_target_error: f32,
    /// Convert attributes to their runtime encodings instead of copying them
    pub encode_attributes: bool,
    pub threads: ThreadPoolConfig,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            meshlets: MeshletConfig::default(),
            builder: BuilderConfig::default(),
            quantization: QuantizationConfig::default(),
            max_lod_count: 4,
            build_virtual_geometry: true,
            build_lod_chain: true,
            build_meshlet_adjacency: true,
            lod_retry_growth: 1.05,
            lod_retry_limit: 1.2,
            lod_target_error: 0.05,
            encode_attributes: true,
            threads: ThreadPoolConfig::default(),
        }
    }
}

impl ImportConfig {
    /// Set virtual mesh builder configuration
    pub fn with_builder(mut self, builder: BuilderConfig) -> Self {
        self.builder = builder;
        self
    }

    /// Set the number of discrete LOD levels
    pub fn with_max_lod_count(mut self, max_lod_count: usize) -> Self {
        self.max_lod_count = max_lod_count;
        self
    }

    /// Enable or disable the virtual geometry build
    pub fn with_virtual_geometry(mut self, enabled: bool) -> Self {
        self.build_virtual_geometry = enabled;
        self
    }

    /// Enable or disable the discrete LOD chain
    pub fn with_lod_chain(mut self, enabled: bool) -> Self {
        self.build_lod_chain = enabled;
        self
    }

    /// Enable or disable LOD 0 meshlet adjacency
    pub fn with_meshlet_adjacency(mut self, enabled: bool) -> Self {
        self.build_meshlet_adjacency = enabled;
        self
    }

    /// Set thread pool configuration
    pub fn with_threads(mut self, threads: ThreadPoolConfig) -> Self {
        self.threads = threads;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_lod_count == 0 {
            return Err(Error::InvalidData("max_lod_count must be at least 1".to_string()));
        }
        if self.lod_retry_growth.is_nan() || self.lod_retry_growth <= 1.0 {
            return Err(Error::InvalidData(format!(
                "lod_retry_growth {} must be greater than 1",
                self.lod_retry_growth
            )));
        }
        if self.lod_retry_limit.is_nan() || self.lod_retry_limit < 1.0 {
            return Err(Error::InvalidData(format!(
                "lod_retry_limit {} must be at least 1",
                self.lod_retry_limit
            )));
        }
        if self.quantization.grid_bits > 24 {
            return Err(Error::InvalidData(format!(
                "quantization grid of {} bits is too fine",
                self.quantization.grid_bits
            )));
        }
        Ok(())
    }
}

/// Imports one mesh and registers it in `ctx.registry`.
///
/// `vertices` is interleaved with the position first and `layout.stride()`
/// bytes per vertex; `indices` is a triangle list. Nothing is uploaded or
/// registered when any stage fails.
pub fn process_mesh_data(
    ctx: &ImportContext,
    vertices: &[u8],
    indices: &[u32],
    layout: &VertexLayout,
) -> Result<Arc<Mesh>> {
    let config = &ctx.config;
    config.validate()?;

    let view = VertexView::new(vertices, layout.stride())?;
    view.validate_indices(indices)?;
    if indices.is_empty() {
        return Err(Error::InvalidData("cannot import a mesh without triangles".to_string()));
    }

    log::info!(
        "Importing mesh: {} vertices, {} triangles",
        view.len(),
        indices.len() / 3
    );

    let preprocessor = MeshPreprocessor::new().with_meshlet_config(config.meshlets);
    let quantizer = VertexDataQuantizer::new(config.quantization);
    let positions: Vec<_> = view.positions().collect();
    let bounds = preprocessor.generate_mesh_bounds(&positions);

    // Discrete LOD chain
    let level_count = if config.build_lod_chain { config.max_lod_count } else { 1 };
    let mut lods = Vec::with_capacity(level_count);
    let mut meshlet_adjacency = None;
    let mut previous_len = indices.len();

    for level in 0..level_count {
        let (lod_indices, error) = if level == 0 {
            (indices.to_vec(), 0.0)
        } else {
            match generate_lod_indices(&preprocessor, &view, indices, previous_len, config)? {
                Some(lod) => lod,
                None => {
                    log::debug!("LOD {} does not reduce {} indices, chain ends", level, previous_len);
                    break;
                }
            }
        };
        previous_len = lod_indices.len();

        let optimized = preprocessor.optimize_mesh(&view, &lod_indices)?;
        let optimized_view = VertexView::new(&optimized.vertices, view.stride())?;
        let clusterized = preprocessor.generate_meshlets(&optimized_view, &optimized.indices)?;

        if level == 0 && config.build_meshlet_adjacency {
            meshlet_adjacency = build_meshlet_adjacency(
                &preprocessor,
                &optimized_view,
                &clusterized,
                ctx.partitioner.as_ref(),
                config.builder.meshlets_per_group,
            )?;
        }

        let clusters = finalize_clusters(
            &preprocessor,
            &quantizer,
            &optimized_view,
            clusterized,
            layout,
            config.encode_attributes,
        )?;
        log::debug!(
            "LOD {}: {} triangles in {} meshlets, {} geometry bytes",
            level,
            clusters.triangle_count(),
            clusters.meshlet_count(),
            clusters.geometry.num_storage_bytes_used()
        );
        lods.push(MeshLod { clusters, error });
    }

    // Meshlet LOD-DAG
    let virtual_geometry = if config.build_virtual_geometry {
        let optimized = preprocessor.optimize_mesh(&view, indices)?;
        let optimized_view = VertexView::new(&optimized.vertices, view.stride())?;
        let builder = VirtualMeshBuilder::with_preprocessor(preprocessor.clone(), ctx.partitioner.clone())
            .with_config(config.builder);
        let vmesh = builder.build_cluster_graph(&optimized_view, &optimized.indices, layout)?;

        let vmesh_view = VertexView::new(&vmesh.vertices, vmesh.vertex_stride)?;
        let clusterized = ClusterizedMesh {
            meshlets: vmesh.meshlets,
            indices: vmesh.indices,
            local_indices: vmesh.local_indices,
            cull_bounds: vmesh.cull_bounds,
        };
        let clusters = finalize_clusters(
            &preprocessor,
            &quantizer,
            &vmesh_view,
            clusterized,
            layout,
            config.encode_attributes,
        )?;
        Some(VirtualGeometry {
            clusters,
            meshlet_groups: vmesh.meshlet_groups,
            lod_count: vmesh.lod_count,
            pass_statistics: vmesh.pass_statistics,
        })
    } else {
        None
    };

    let (layout_table, attribute_stride) = if config.encode_attributes {
        VertexDataQuantizer::runtime_layout(layout)?
    } else {
        (layout.runtime_layout_table(), layout.stride() - POSITION_SIZE)
    };

    let data = MeshData {
        lods,
        virtual_geometry,
        meshlet_adjacency,
        layout_table,
        attribute_stride,
        quantization_grid_bits: quantizer.grid_bits(),
        bounds,
    };

    let handle = AssetHandle::generate();
    let buffers = upload_buffers(ctx, handle, &data)?;
    let mesh = Arc::new(Mesh {
        handle,
        data,
        buffers,
    });
    ctx.registry.register(mesh.clone())?;

    log::info!(
        "Imported mesh {}: {} LOD levels, {} virtual geometry meshlets",
        handle,
        mesh.data.lods.len(),
        mesh.data
            .virtual_geometry
            .as_ref()
            .map_or(0, |v| v.clusters.meshlet_count())
    );

    Ok(mesh)
}

/// Simplifies the source mesh towards half of the previous level.
///
/// An empty result grows the target by `lod_retry_growth` until it passes
/// `lod_retry_limit` times the initial target, which is an error. `None`
/// means the simplifier could not go below `previous_len`.
fn generate_lod_indices(
    preprocessor: &MeshPreprocessor,
    view: &VertexView<'_>,
    indices: &[u32],
    previous_len: usize,
    config: &ImportConfig,
) -> Result<Option<(Vec<u32>, f32)>> {
    let initial_target = (previous_len / 2 / 3 * 3).max(3);
    let limit = (initial_target as f32 * config.lod_retry_limit) as usize;
    let mut target = initial_target;

    loop {
        let lod = preprocessor.generate_mesh_lod(view, indices, target, config.lod_target_error, false)?;
        if !lod.indices.is_empty() {
            if lod.indices.len() >= previous_len {
                return Ok(None);
            }
            return Ok(Some((lod.indices, lod.error)));
        }

        let grown = ((target as f32 * config.lod_retry_growth) as usize / 3 * 3).max(target + 3);
        if grown > limit {
            return Err(Error::Simplification(format!(
                "simplifying {} indices towards {} produced no triangles",
                indices.len(),
                initial_target
            )));
        }
        log::trace!("empty LOD at target {}, retrying with {}", target, grown);
        target = grown;
    }
}

/// Partitions LOD 0 meshlets the way the first LOD pass would
fn build_meshlet_adjacency(
    preprocessor: &MeshPreprocessor,
    vertices: &VertexView<'_>,
    mesh: &ClusterizedMesh,
    partitioner: &dyn GraphPartitioner,
    meshlets_per_group: usize,
) -> Result<Option<MeshletAdjacency>> {
    let all_vertices: Vec<u32> = (0..vertices.len() as u32).collect();
    let shadow = preprocessor.generate_shadow_index_buffer(vertices, &all_vertices, POSITION_SIZE)?;
    let current: Vec<u32> = (0..mesh.len() as u32).collect();

    let Some(graph) = build_meshlet_graph(mesh, &current, |v| shadow[v as usize])? else {
        return Ok(None);
    };
    let part_count = (mesh.len() / meshlets_per_group.max(1)).max(1);
    let partition = partitioner.partition(&graph, part_count)?;
    if partition.len() != mesh.len() {
        return Err(Error::Partition(format!(
            "partitioner returned {} parts for {} meshlets",
            partition.len(),
            mesh.len()
        )));
    }
    let edge_cut = graph.edge_cut(&partition);

    Ok(Some(MeshletAdjacency {
        graph,
        partition,
        edge_cut,
    }))
}

/// Lays vertices out per meshlet, then quantizes positions and encodes
/// attributes
fn finalize_clusters(
    preprocessor: &MeshPreprocessor,
    quantizer: &VertexDataQuantizer,
    vertices: &VertexView<'_>,
    mesh: ClusterizedMesh,
    layout: &VertexLayout,
    encode_attributes: bool,
) -> Result<ClusterGeometry> {
    let ClusterizedMesh {
        mut meshlets,
        indices,
        local_indices,
        mut cull_bounds,
    } = mesh;

    // meshlet vertex i becomes vertex vertex_offset + i
    let remapped = preprocessor.remap_vertices(vertices, &indices)?;
    let remapped_view = VertexView::new(&remapped, vertices.stride())?;
    let split = preprocessor.split_vertex_data(&remapped_view);
    let bounds = preprocessor.generate_mesh_bounds(&split.positions);

    let attributes = if encode_attributes {
        quantizer.encode_runtime_attributes(&remapped_view, layout)?
    } else {
        split.attributes
    };
    let geometry = quantizer.quantize_meshlets(&mut meshlets, &mut cull_bounds, &split.positions)?;

    Ok(ClusterGeometry {
        meshlets,
        local_indices,
        cull_bounds,
        geometry,
        attributes,
        vertex_count: split.positions.len(),
        bounds,
    })
}

fn upload_buffers(
    ctx: &ImportContext,
    handle: AssetHandle,
    data: &MeshData,
) -> Result<HashMap<MeshBufferKey, DeviceAddress>> {
    let Some(clusters) = data.primary_clusters() else {
        return Ok(HashMap::new());
    };

    let mut buffers = HashMap::new();
    for key in MeshBufferKey::ALL {
        let bytes: &[u8] = match key {
            MeshBufferKey::Geometry => clusters.geometry.as_bytes(),
            MeshBufferKey::Attributes => &clusters.attributes,
            MeshBufferKey::Meshlets => bytemuck::cast_slice(&clusters.meshlets),
            MeshBufferKey::MicroIndices => &clusters.local_indices,
            MeshBufferKey::MeshletsCullData => bytemuck::cast_slice(&clusters.cull_bounds),
        };
        let label = format!("{}/{}", handle, key.label());
        let address = ctx
            .uploader
            .upload(&label, bytes)
            .map_err(|e| Error::Upload(format!("{}: {}", label, e)))?;
        buffers.insert(key, address);
    }
    Ok(buffers)
}
