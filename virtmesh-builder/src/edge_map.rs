//! Open boundary detection for a meshlet generation

use std::collections::HashMap;
use virtmesh_core::{ClusterizedMesh, MeshletEdge};

#[derive(Debug, Clone, Copy)]
struct EdgeUse {
    meshlet: u32,
    shared: bool,
    triangles: u32,
}

/// Marks vertices that lie on an open boundary of the meshlets in `current`.
///
/// Edges are keyed by `shadow[vertex]`, the first vertex with an identical
/// position, so attribute seams do not count as boundaries. An edge is open
/// when a single triangle of a single meshlet uses it; both of its endpoints
/// are locked. The returned map covers every vertex of the buffer (`shadow.len()`),
/// so every attribute variant of a locked position is locked as well.
pub fn generate_edge_map(mesh: &ClusterizedMesh, current: &[u32], shadow: &[u32]) -> Vec<bool> {
    let mut edges: HashMap<MeshletEdge, EdgeUse> = HashMap::new();

    for &meshlet_idx in current {
        let meshlet = &mesh.meshlets[meshlet_idx as usize];
        for t in 0..meshlet.triangle_count as usize {
            let tri = mesh.triangle(meshlet_idx as usize, t).map(|v| shadow[v as usize]);
            for i in 0..3 {
                let edge = MeshletEdge::new(tri[i], tri[(i + 1) % 3]);
                if edge.is_degenerate() {
                    continue;
                }
                edges
                    .entry(edge)
                    .and_modify(|e| {
                        e.triangles += 1;
                        e.shared |= e.meshlet != meshlet_idx;
                    })
                    .or_insert(EdgeUse {
                        meshlet: meshlet_idx,
                        shared: false,
                        triangles: 1,
                    });
            }
        }
    }

    let mut locked_positions = vec![false; shadow.len()];
    for (edge, usage) in &edges {
        if !usage.shared && usage.triangles == 1 {
            locked_positions[edge.first as usize] = true;
            locked_positions[edge.second as usize] = true;
        }
    }

    shadow
        .iter()
        .map(|&canonical| locked_positions[canonical as usize])
        .collect()
}
