//! meshoptimizer backed simplification

use crate::{MeshSimplifier, SimplifiedIndices};
use meshopt::{SimplifyOptions, VertexDataAdapter};
use virtmesh_core::{Error, Result, VertexView};

/// Edge-collapse simplifier from meshoptimizer
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshoptSimplifier;

impl MeshoptSimplifier {
    pub fn new() -> Self {
        Self
    }
}

impl MeshSimplifier for MeshoptSimplifier {
    fn simplify(
        &self,
        vertices: &VertexView<'_>,
        indices: &[u32],
        target_index_count: usize,
        target_error: f32,
        lock_borders: bool,
    ) -> Result<SimplifiedIndices> {
        vertices.validate_indices(indices)?;
        let adapter = vertex_adapter(vertices)?;

        let options = if lock_borders {
            SimplifyOptions::LockBorder
        } else {
            SimplifyOptions::empty()
        };

        let mut error = 0.0f32;
        let simplified = meshopt::simplify(
            indices,
            &adapter,
            target_index_count,
            target_error,
            options,
            Some(&mut error),
        );

        if simplified.len() % 3 != 0 {
            return Err(Error::Simplification(format!(
                "simplifier returned {} indices, not a triangle list",
                simplified.len()
            )));
        }

        Ok(SimplifiedIndices {
            indices: simplified,
            error,
        })
    }
}

/// Wraps a vertex view for meshoptimizer, which reads the position at offset 0
pub(crate) fn vertex_adapter<'a>(vertices: &VertexView<'a>) -> Result<VertexDataAdapter<'a>> {
    let stride = vertices.stride();
    if stride % 4 != 0 || stride > 256 {
        return Err(Error::InvalidData(format!(
            "vertex stride {} must be a multiple of 4 and at most 256",
            stride
        )));
    }
    VertexDataAdapter::new(vertices.bytes(), stride, 0)
        .map_err(|e| Error::InvalidData(format!("invalid vertex data: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtmesh_core::primitives::generate_plane_grid;

    #[test]
    fn test_simplify_reduces_grid() {
        let grid = generate_plane_grid(17);
        let (bytes, layout) = grid.to_vertex_buffer();
        let view = VertexView::new(&bytes, layout.stride()).unwrap();

        let result = MeshoptSimplifier
            .simplify(&view, &grid.indices, grid.indices.len() / 2, 0.1, false)
            .unwrap();

        assert!(!result.indices.is_empty());
        assert!(result.indices.len() < grid.indices.len(), "grid should simplify");
        assert_eq!(result.indices.len() % 3, 0);
        assert!(result.error >= 0.0);
    }

    #[test]
    fn test_locked_border_keeps_boundary_vertices() {
        let size = 9;
        let grid = generate_plane_grid(size);
        let (bytes, layout) = grid.to_vertex_buffer();
        let view = VertexView::new(&bytes, layout.stride()).unwrap();

        let result = MeshoptSimplifier
            .simplify(&view, &grid.indices, 0, 1.0, true)
            .unwrap();

        // every corner of the grid lies on the border and must survive
        for corner in [0, size - 1, size * (size - 1), size * size - 1] {
            assert!(
                result.indices.contains(&(corner as u32)),
                "corner {} was collapsed",
                corner
            );
        }
    }

    #[test]
    fn test_rejects_misaligned_stride() {
        let bytes = vec![0u8; 14 * 3];
        let view = VertexView::new(&bytes, 14).unwrap();
        assert!(MeshoptSimplifier.simplify(&view, &[0, 1, 2], 3, 0.1, false).is_err());
    }
}
