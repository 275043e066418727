//! Vertex welding ahead of group simplification

use std::collections::BTreeSet;
use virtmesh_algorithms::KdTree;
use virtmesh_core::{LodPassStatistics, Result, VertexAttribute, VertexLayout, VertexView};

/// Thresholds for a single welding pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeldThresholds {
    /// Neighbours must be strictly closer than this (mesh units)
    pub max_distance: f32,
    /// Per-channel UV distance limit, `None` ignores UVs
    pub uv_tolerance: Option<f32>,
}

/// Builds a remap table that redirects vertices to a nearby canonical vertex.
///
/// Only vertices in `lod_indices` are considered, in ascending order. A
/// vertex is skipped when it is locked by `edge_vertices`, when an earlier
/// vertex was already welded onto it, or when it was welded itself. The
/// replacement is the closest neighbour from `kd_tree` that is still its own
/// representative and passes the UV check on every `TEXCOORD` channel. Once
/// chosen, a replacement never moves, so `remap[remap[i]] == remap[i]`.
pub fn generate_vertex_welder_remap_table(
    vertices: &VertexView<'_>,
    layout: &VertexLayout,
    kd_tree: &KdTree,
    lod_indices: &BTreeSet<u32>,
    edge_vertices: &[bool],
    thresholds: WeldThresholds,
    stats: &mut LodPassStatistics,
) -> Result<Vec<u32>> {
    let mut remap: Vec<u32> = (0..vertices.len() as u32).collect();
    let mut anchored = vec![false; vertices.len()];

    let uv_channels: Vec<&VertexAttribute> = match thresholds.uv_tolerance {
        Some(_) => layout.texcoord_channels().collect(),
        None => Vec::new(),
    };
    let uv_tolerance_sq = thresholds.uv_tolerance.map_or(0.0, |t| t * t);

    for &index in lod_indices {
        let i = index as usize;
        if edge_vertices[i] {
            stats.locked_vertex_count += 1;
            continue;
        }
        if anchored[i] || remap[i] != index {
            continue;
        }

        let position = vertices.position(i)?;
        let uvs = uv_channels
            .iter()
            .map(|channel| vertices.read_f32x2(i, channel))
            .collect::<Result<Vec<_>>>()?;

        for (neighbour, _) in kd_tree.closest_point_set(&position, thresholds.max_distance, Some(index)) {
            let n = neighbour as usize;
            if remap[n] != neighbour {
                continue;
            }

            let mut uv_match = true;
            for (channel, uv) in uv_channels.iter().zip(&uvs) {
                let other = vertices.read_f32x2(n, channel)?;
                let du = other[0] - uv[0];
                let dv = other[1] - uv[1];
                if du * du + dv * dv > uv_tolerance_sq {
                    uv_match = false;
                    break;
                }
            }
            if !uv_match {
                continue;
            }

            remap[i] = neighbour;
            anchored[n] = true;
            stats.welded_vertex_count += 1;
            break;
        }
    }

    debug_assert!(remap.iter().all(|&r| remap[r as usize] == r));
    Ok(remap)
}
