//! LOD-DAG construction over meshlet generations

use crate::{
    generate_edge_map, generate_vertex_welder_remap_table, group_mesh_clusters, lerp,
    GroupingParameters, WeldThresholds,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use virtmesh_algorithms::KdTree;
use virtmesh_core::{
    Aabb, ClusterGroupRecord, ClusterizedMesh, Error, GraphPartitioner, LodPassStatistics,
    MeshClusterGroup, Result, Sphere, VertexLayout, VertexView, VirtualMesh, POSITION_SIZE,
};
use virtmesh_preprocess::{MeshPreprocessor, MeshSimplifier, MeshoptSimplifier};

/// Tuning of the cluster graph build
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Meshlet generations smaller than this are grouped as a whole
    pub min_partition_size: usize,
    pub meshlets_per_group: usize,
    /// Fraction of a group's indices kept by the first simplification attempt
    pub simplification_rate: f32,
    /// Relative target error at the first LOD pass
    pub min_target_error: f32,
    /// Relative target error at the last LOD pass
    pub max_target_error: f32,
    /// Added to both rate and target error after a failed attempt
    pub relaxation_step: f32,
    /// Weld distance at the first LOD pass, relative to the mesh scale
    pub min_weld_distance: f32,
    /// Weld distance at the last LOD pass, relative to the mesh scale
    pub max_weld_distance: f32,
    /// UV weld tolerance at the first and last LOD pass, `None` ignores UVs
    pub uv_weld_tolerance: Option<(f32, f32)>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            min_partition_size: 8,
            meshlets_per_group: 4,
            simplification_rate: 0.5,
            min_target_error: 0.01,
            max_target_error: 0.9,
            relaxation_step: 0.05,
            min_weld_distance: 0.01,
            max_weld_distance: 0.10,
            uv_weld_tolerance: Some((1.0 / 256.0, 0.5)),
        }
    }
}

impl BuilderConfig {
    /// Set the smallest pass that is still partitioned and the target group size
    pub fn with_grouping(mut self, min_partition_size: usize, meshlets_per_group: usize) -> Self {
        self.min_partition_size = min_partition_size;
        self.meshlets_per_group = meshlets_per_group;
        self
    }

    /// Set the simplification error bounds for the first and last LOD
    pub fn with_target_error(mut self, min: f32, max: f32) -> Self {
        self.min_target_error = min;
        self.max_target_error = max;
        self
    }

    /// Set the vertex weld distance bounds for the first and last LOD
    pub fn with_weld_distance(mut self, min: f32, max: f32) -> Self {
        self.min_weld_distance = min;
        self.max_weld_distance = max;
        self
    }

    /// Set the UV tolerance for welding, `None` welds regardless of UVs
    pub fn with_uv_weld_tolerance(mut self, tolerance: Option<(f32, f32)>) -> Self {
        self.uv_weld_tolerance = tolerance;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.meshlets_per_group == 0 {
            return Err(Error::InvalidData("meshlets_per_group must be positive".to_string()));
        }
        if self.simplification_rate.is_nan()
            || self.simplification_rate <= 0.0
            || self.simplification_rate >= 1.0
        {
            return Err(Error::InvalidData(format!(
                "simplification rate {} must be in (0, 1)",
                self.simplification_rate
            )));
        }
        if self.relaxation_step.is_nan() || self.relaxation_step <= 0.0 {
            return Err(Error::InvalidData(format!(
                "relaxation step {} must be positive",
                self.relaxation_step
            )));
        }
        Ok(())
    }
}

/// Builds the meshlet LOD-DAG of a mesh
pub struct VirtualMeshBuilder<S: MeshSimplifier = MeshoptSimplifier> {
    pub config: BuilderConfig,
    preprocessor: MeshPreprocessor<S>,
    partitioner: Arc<dyn GraphPartitioner>,
}

impl VirtualMeshBuilder<MeshoptSimplifier> {
    pub fn new(partitioner: Arc<dyn GraphPartitioner>) -> Self {
        Self::with_preprocessor(MeshPreprocessor::new(), partitioner)
    }
}

impl<S: MeshSimplifier> VirtualMeshBuilder<S> {
    /// Create a builder around a custom preprocessor and partitioner
    pub fn with_preprocessor(
        preprocessor: MeshPreprocessor<S>,
        partitioner: Arc<dyn GraphPartitioner>,
    ) -> Self {
        Self {
            config: BuilderConfig::default(),
            preprocessor,
            partitioner,
        }
    }

    /// Set builder configuration
    pub fn with_config(mut self, config: BuilderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn preprocessor(&self) -> &MeshPreprocessor<S> {
        &self.preprocessor
    }

    /// Clusterizes the mesh into LOD 0 and keeps simplifying groups of
    /// meshlets into coarser generations until a pass yields a single new
    /// meshlet or `ceil(log2(index_count))` levels exist.
    pub fn build_cluster_graph(
        &self,
        vertices: &VertexView<'_>,
        indices: &[u32],
        layout: &VertexLayout,
    ) -> Result<VirtualMesh> {
        self.config.validate()?;
        if layout.stride() != vertices.stride() {
            return Err(Error::InvalidData(format!(
                "layout stride {} does not match vertex stride {}",
                layout.stride(),
                vertices.stride()
            )));
        }

        let mut mesh = self.preprocessor.generate_meshlets(vertices, indices)?;
        let mut groups: Vec<ClusterGroupRecord> = Vec::new();
        let mut pass_statistics = Vec::new();

        let simplify_scale = self.preprocessor.simplify_scale(vertices)?;
        let max_lod = ((indices.len() as f32).log2().ceil() as u32).max(1);
        let all_vertices: Vec<u32> = (0..vertices.len() as u32).collect();
        let shadow =
            self.preprocessor
                .generate_shadow_index_buffer(vertices, &all_vertices, POSITION_SIZE)?;

        let mut current: Vec<u32> = (0..mesh.len() as u32).collect();
        let mut lod_idx = 1;

        log::info!(
            "Virtual mesh generation started: {} triangles, {} LOD 0 meshlets, max LOD count {}",
            indices.len() / 3,
            mesh.len(),
            max_lod
        );

        while lod_idx < max_lod && !current.is_empty() {
            let t_lod = lod_idx as f32 / max_lod as f32;
            let mut stats = LodPassStatistics {
                lod_level: lod_idx,
                input_meshlet_count: current.len(),
                mesh_scale: simplify_scale,
                ..Default::default()
            };

            // 1. lock open boundaries
            let edge_vertices = generate_edge_map(&mesh, &current, &shadow);

            // 2. weld vertices referenced by the current generation
            let lod_indices: BTreeSet<u32> = current
                .iter()
                .flat_map(|&m| {
                    let meshlet = &mesh.meshlets[m as usize];
                    let start = meshlet.vertex_offset as usize;
                    mesh.indices[start..start + meshlet.vertex_count as usize].iter().copied()
                })
                .collect();
            stats.input_vertex_count = lod_indices.len();

            let kd_tree = KdTree::from_tagged_points(
                lod_indices
                    .iter()
                    .map(|&i| Ok((vertices.position(i as usize)?, i)))
                    .collect::<Result<Vec<_>>>()?,
            )?;

            let thresholds = WeldThresholds {
                max_distance: lerp(self.config.min_weld_distance, self.config.max_weld_distance, t_lod)
                    * simplify_scale,
                uv_tolerance: self.config.uv_weld_tolerance.map(|(lo, hi)| lerp(lo, hi, t_lod)),
            };
            stats.min_welder_vertex_distance = thresholds.max_distance;

            let weld_remap = generate_vertex_welder_remap_table(
                vertices,
                layout,
                &kd_tree,
                &lod_indices,
                &edge_vertices,
                thresholds,
                &mut stats,
            )?;

            // 3. group
            let lod_groups = group_mesh_clusters(
                &mesh,
                &current,
                &shadow,
                &weld_remap,
                self.partitioner.as_ref(),
                GroupingParameters {
                    min_partition_size: self.config.min_partition_size,
                    meshlets_per_group: self.config.meshlets_per_group,
                },
            )?;
            stats.group_count = lod_groups.len();

            // 4. simplify every group and register its meshlets for the next pass
            let mut next: Vec<u32> = Vec::new();
            let mut newly_created = 0;
            let target_error = lerp(self.config.min_target_error, self.config.max_target_error, t_lod);

            for group in lod_groups {
                match self.simplify_group(
                    vertices,
                    &mesh,
                    &group,
                    &weld_remap,
                    target_error,
                    simplify_scale,
                    &mut stats,
                )? {
                    GroupOutcome::Skipped => {
                        log::warn!(
                            "LOD {}: group of {} meshlets welded down to nothing, skipping it",
                            lod_idx,
                            group.len()
                        );
                        stats.skipped_group_count += 1;
                    }
                    GroupOutcome::Stalled => {
                        log::warn!(
                            "LOD {}: group of {} meshlets could not be simplified, carrying it over",
                            lod_idx,
                            group.len()
                        );
                        stats.group_simplification_failure_count += 1;
                        next.extend_from_slice(&group);
                    }
                    GroupOutcome::Simplified {
                        meshlets,
                        sphere,
                        error,
                    } => {
                        for &child in &group {
                            let lod = &mut mesh.cull_bounds[child as usize].lod_culling;
                            lod.parent_sphere = sphere;
                            lod.parent_error = error;
                        }

                        let parents = mesh.append(meshlets);
                        newly_created += parents.len();
                        next.extend(parents.clone());
                        groups.push(ClusterGroupRecord {
                            lod_level: lod_idx,
                            children: group,
                            parents,
                            error,
                        });
                    }
                }
            }

            stats.output_meshlet_count = newly_created;
            log::debug!("Virtual mesh generation pass #{} finished: {:?}", lod_idx, stats);
            pass_statistics.push(stats);

            // groups partition `current`, so equal length means every group stalled
            let stalled = newly_created == 0 && next.len() == current.len();

            current = next;
            lod_idx += 1;

            if newly_created == 1 {
                break;
            }
            if stalled {
                log::debug!("LOD {}: no group could be simplified, stopping", lod_idx - 1);
                break;
            }
        }

        log::debug!(
            "Mesh building finished: {} meshlets over {} LOD levels, {} triangles in total",
            mesh.len(),
            lod_idx,
            mesh.triangle_count()
        );

        let ClusterizedMesh {
            meshlets,
            indices,
            local_indices,
            cull_bounds,
        } = mesh;

        Ok(VirtualMesh {
            vertices: vertices.bytes().to_vec(),
            indices,
            local_indices,
            meshlets,
            meshlet_groups: groups,
            cull_bounds,
            vertex_stride: vertices.stride(),
            lod_count: lod_idx,
            pass_statistics,
        })
    }

    /// Merges, simplifies and re-clusterizes one group
    #[allow(clippy::too_many_arguments)]
    fn simplify_group(
        &self,
        vertices: &VertexView<'_>,
        mesh: &ClusterizedMesh,
        group: &MeshClusterGroup,
        weld_remap: &[u32],
        target_error: f32,
        simplify_scale: f32,
        stats: &mut LodPassStatistics,
    ) -> Result<GroupOutcome> {
        // Merge into a compact group-local vertex buffer
        let mut mesh_to_group: HashMap<u32, u32> = HashMap::new();
        let mut group_to_mesh: Vec<u32> = Vec::new();
        let mut merged: Vec<u32> = Vec::new();

        for &meshlet_idx in group {
            let triangle_count = mesh.meshlets[meshlet_idx as usize].triangle_count as usize;
            for t in 0..triangle_count {
                let tri = mesh
                    .triangle(meshlet_idx as usize, t)
                    .map(|v| weld_remap[v as usize]);
                if tri[0] == tri[1] || tri[0] == tri[2] || tri[1] == tri[2] {
                    stats.degenerate_triangles_erased += 1;
                    continue;
                }
                for v in tri {
                    let local = *mesh_to_group.entry(v).or_insert_with(|| {
                        group_to_mesh.push(v);
                        (group_to_mesh.len() - 1) as u32
                    });
                    merged.push(local);
                }
            }
        }

        if merged.is_empty() {
            return Ok(GroupOutcome::Skipped);
        }

        let group_vertices = self.preprocessor.remap_vertices(vertices, &group_to_mesh)?;
        let group_view = VertexView::new(&group_vertices, vertices.stride())?;

        // Relax rate and error until the simplifier makes progress
        let mut rate = self.config.simplification_rate;
        let mut error = target_error;
        let simplified = loop {
            let target_index_count = (merged.len() as f32 * rate) as usize / 3 * 3;
            let result = self.preprocessor.generate_mesh_lod(
                &group_view,
                &merged,
                target_index_count,
                error,
                true,
            )?;
            if !result.indices.is_empty() && result.indices.len() < merged.len() {
                break Some(result);
            }
            rate += self.config.relaxation_step;
            error += self.config.relaxation_step;
            if rate >= 1.0 - 1e-4 {
                break None;
            }
        };

        let Some(simplified) = simplified else {
            return Ok(GroupOutcome::Stalled);
        };

        let mesh_indices: Vec<u32> = simplified
            .indices
            .iter()
            .map(|&i| group_to_mesh[i as usize])
            .collect();

        let aabb = Aabb::from_points(
            &mesh_indices
                .iter()
                .map(|&i| vertices.position(i as usize))
                .collect::<Result<Vec<_>>>()?,
        );
        let sphere = aabb.bounding_sphere();

        let max_child_error = group
            .iter()
            .map(|&m| mesh.cull_bounds[m as usize].lod_culling.error)
            .fold(0.0f32, f32::max);
        let mesh_space_error = simplified.error * simplify_scale + max_child_error;

        let mut meshlets = self.preprocessor.generate_meshlets(vertices, &mesh_indices)?;
        for bounds in &mut meshlets.cull_bounds {
            bounds.lod_culling.error = mesh_space_error;
            bounds.lod_culling.sphere = sphere;
        }

        Ok(GroupOutcome::Simplified {
            meshlets,
            sphere,
            error: mesh_space_error,
        })
    }
}

enum GroupOutcome {
    /// Every merged triangle was degenerate
    Skipped,
    /// No reduction even at the most relaxed settings
    Stalled,
    Simplified {
        meshlets: ClusterizedMesh,
        sphere: Sphere,
        error: f32,
    },
}
