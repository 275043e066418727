//! Meshlet grouping through graph partitioning

use std::collections::{BTreeMap, HashMap, HashSet};
use virtmesh_core::{
    ClusterizedMesh, CsrGraph, Error, GraphPartitioner, MeshClusterGroup, MeshletEdge, Result,
};

/// Grouping thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupingParameters {
    /// Below this many meshlets everything forms one group
    pub min_partition_size: usize,
    /// Target meshlets per group; the part count is `meshlets / meshlets_per_group`
    pub meshlets_per_group: usize,
}

impl Default for GroupingParameters {
    fn default() -> Self {
        Self {
            min_partition_size: 8,
            meshlets_per_group: 4,
        }
    }
}

/// Partitions the meshlets in `current` into groups that share many edges.
///
/// Edge endpoints are keyed through `weld_remap[shadow[v]]` so welded and
/// attribute-split vertices connect their meshlets. Edges used by a single
/// meshlet carry no adjacency and are dropped; the remaining ones weight the
/// meshlet graph by shared edge count. Small inputs and inputs without any
/// shared edge return a single group holding every meshlet of `current`.
pub fn group_mesh_clusters(
    mesh: &ClusterizedMesh,
    current: &[u32],
    shadow: &[u32],
    weld_remap: &[u32],
    partitioner: &dyn GraphPartitioner,
    params: GroupingParameters,
) -> Result<Vec<MeshClusterGroup>> {
    if current.len() < params.min_partition_size {
        return Ok(vec![current.to_vec()]);
    }

    let key = |v: u32| weld_remap[shadow[v as usize] as usize];
    let Some(graph) = build_meshlet_graph(mesh, current, key)? else {
        return Ok(vec![current.to_vec()]);
    };

    let part_count = (current.len() / params.meshlets_per_group.max(1)).max(1);
    let partition = partitioner.partition(&graph, part_count)?;
    if partition.len() != current.len() {
        return Err(Error::Partition(format!(
            "partitioner returned {} parts for {} meshlets",
            partition.len(),
            current.len()
        )));
    }

    let mut groups: Vec<MeshClusterGroup> = vec![Vec::new(); part_count];
    for (local, &part) in partition.iter().enumerate() {
        let group = groups.get_mut(part).ok_or_else(|| {
            Error::Partition(format!("part {} out of range ({} parts)", part, part_count))
        })?;
        group.push(current[local]);
    }
    groups.retain(|group| !group.is_empty());

    log::trace!(
        "grouped {} meshlets into {} groups over {} adjacencies (edge cut {})",
        current.len(),
        groups.len(),
        graph.edge_count(),
        graph.edge_cut(&partition)
    );

    Ok(groups)
}

/// Meshlet adjacency graph over `current`, node `i` being `current[i]`.
///
/// Two meshlets are adjacent when they share an edge after mapping vertices
/// through `key`; the weight is the number of shared edges. Returns `None`
/// when no edge is shared by more than one meshlet.
pub fn build_meshlet_graph(
    mesh: &ClusterizedMesh,
    current: &[u32],
    key: impl Fn(u32) -> u32,
) -> Result<Option<CsrGraph>> {
    // local meshlet index per edge, and the edges of each local meshlet
    let mut edge_meshlets: HashMap<MeshletEdge, Vec<usize>> = HashMap::new();
    let mut meshlet_edges: Vec<HashSet<MeshletEdge>> = vec![HashSet::new(); current.len()];

    for (local, &meshlet_idx) in current.iter().enumerate() {
        let triangle_count = mesh.meshlets[meshlet_idx as usize].triangle_count as usize;
        for t in 0..triangle_count {
            let tri = mesh.triangle(meshlet_idx as usize, t).map(&key);
            for i in 0..3 {
                let edge = MeshletEdge::new(tri[i], tri[(i + 1) % 3]);
                if edge.is_degenerate() || !meshlet_edges[local].insert(edge) {
                    continue;
                }
                edge_meshlets.entry(edge).or_default().push(local);
            }
        }
    }

    edge_meshlets.retain(|_, meshlets| meshlets.len() > 1);
    if edge_meshlets.is_empty() {
        return Ok(None);
    }

    let mut adjacency: Vec<BTreeMap<usize, i32>> = vec![BTreeMap::new(); current.len()];
    for meshlets in edge_meshlets.values() {
        for &a in meshlets {
            for &b in meshlets {
                if a != b {
                    *adjacency[a].entry(b).or_insert(0) += 1;
                }
            }
        }
    }
    let adjacency: Vec<Vec<(usize, i32)>> = adjacency
        .into_iter()
        .map(|neighbours| neighbours.into_iter().collect())
        .collect();
    CsrGraph::from_weighted_adjacency(&adjacency).map(Some)
}
