//! Procedural meshes used by demos, tests and benchmarks

use crate::{bounds::Aabb, point::*, vertex::*};
use std::collections::HashMap;

/// Indexed triangle list of bare positions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimitiveMesh {
    pub positions: Vec<Point3f>,
    pub indices: Vec<u32>,
}

impl PrimitiveMesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn translated(mut self, offset: Vector3f) -> Self {
        for p in &mut self.positions {
            *p += offset;
        }
        self
    }

    /// Appends `other` as a disconnected island
    pub fn merge(mut self, other: PrimitiveMesh) -> Self {
        let base = self.positions.len() as u32;
        self.positions.extend(other.positions);
        self.indices.extend(other.indices.into_iter().map(|i| i + base));
        self
    }

    /// Interleaved buffer holding only positions
    pub fn to_vertex_buffer(&self) -> (Vec<u8>, VertexLayout) {
        let bytes = bytemuck::cast_slice::<f32, u8>(
            &self
                .positions
                .iter()
                .flat_map(|p| [p.x, p.y, p.z])
                .collect::<Vec<f32>>(),
        )
        .to_vec();
        (bytes, VertexLayout::position_only())
    }

    /// Interleaved buffer with a planar-projected `TEXCOORD_0` channel
    pub fn to_vertex_buffer_with_uvs(&self) -> (Vec<u8>, VertexLayout) {
        let layout = VertexLayout::from_attributes([("TEXCOORD_0", VertexFormat::Float32x2)]);
        let aabb = Aabb::from_points(&self.positions);
        let extent = aabb.extent();
        let inv = |e: f32| if e > f32::EPSILON { 1.0 / e } else { 0.0 };

        let mut floats = Vec::with_capacity(self.positions.len() * 5);
        for p in &self.positions {
            let u = (p.x - aabb.min.x) * inv(extent.x);
            let v = (p.z - aabb.min.z) * inv(extent.z);
            floats.extend_from_slice(&[p.x, p.y, p.z, u, v]);
        }
        (bytemuck::cast_slice::<f32, u8>(&floats).to_vec(), layout)
    }
}

/// Regular grid of `size x size` vertices in the XZ plane with a gentle height field
pub fn generate_plane_grid(size: usize) -> PrimitiveMesh {
    let size = size.max(2);
    let mut positions = Vec::with_capacity(size * size);
    for z in 0..size {
        for x in 0..size {
            let fx = x as f32 / (size - 1) as f32;
            let fz = z as f32 / (size - 1) as f32;
            let height = (fx * std::f32::consts::PI).sin() * (fz * std::f32::consts::PI).sin() * 0.1;
            positions.push(Point3f::new(fx, height, fz));
        }
    }

    let mut indices = Vec::with_capacity((size - 1) * (size - 1) * 6);
    for z in 0..(size - 1) {
        for x in 0..(size - 1) {
            let tl = (z * size + x) as u32;
            let tr = tl + 1;
            let bl = tl + size as u32;
            let br = bl + 1;
            indices.extend_from_slice(&[tl, bl, tr, tr, bl, br]);
        }
    }

    PrimitiveMesh { positions, indices }
}

/// Unit cube centered at the origin, 8 shared corners
pub fn generate_cube() -> PrimitiveMesh {
    let positions = [
        [-0.5, -0.5, -0.5],
        [0.5, -0.5, -0.5],
        [0.5, 0.5, -0.5],
        [-0.5, 0.5, -0.5],
        [-0.5, -0.5, 0.5],
        [0.5, -0.5, 0.5],
        [0.5, 0.5, 0.5],
        [-0.5, 0.5, 0.5],
    ]
    .iter()
    .map(|p| Point3f::new(p[0], p[1], p[2]))
    .collect();

    let indices = vec![
        0, 2, 1, 0, 3, 2, // -z
        4, 5, 6, 4, 6, 7, // +z
        0, 1, 5, 0, 5, 4, // -y
        3, 6, 2, 3, 7, 6, // +y
        0, 4, 7, 0, 7, 3, // -x
        1, 2, 6, 1, 6, 5, // +x
    ];

    PrimitiveMesh { positions, indices }
}

/// Unit icosphere; every subdivision splits each triangle into four.
/// Edge midpoints are shared, so the result is a closed manifold.
pub fn generate_icosphere(subdivisions: u32) -> PrimitiveMesh {
    let t = (1.0 + 5.0_f32.sqrt()) / 2.0;
    let mut positions: Vec<Point3f> = [
        [-1.0, t, 0.0],
        [1.0, t, 0.0],
        [-1.0, -t, 0.0],
        [1.0, -t, 0.0],
        [0.0, -1.0, t],
        [0.0, 1.0, t],
        [0.0, -1.0, -t],
        [0.0, 1.0, -t],
        [t, 0.0, -1.0],
        [t, 0.0, 1.0],
        [-t, 0.0, -1.0],
        [-t, 0.0, 1.0],
    ]
    .iter()
    .map(|p| Point3f::from(Vector3f::new(p[0], p[1], p[2]).normalize()))
    .collect();

    let mut indices: Vec<u32> = vec![
        0, 11, 5, 0, 5, 1, 0, 1, 7, 0, 7, 10, 0, 10, 11, //
        1, 5, 9, 5, 11, 4, 11, 10, 2, 10, 7, 6, 7, 1, 8, //
        3, 9, 4, 3, 4, 2, 3, 2, 6, 3, 6, 8, 3, 8, 9, //
        4, 9, 5, 2, 4, 11, 6, 2, 10, 8, 6, 7, 9, 8, 1,
    ];

    for _ in 0..subdivisions {
        let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
        let mut midpoint = |a: u32, b: u32, positions: &mut Vec<Point3f>| -> u32 {
            let key = (a.min(b), a.max(b));
            *midpoints.entry(key).or_insert_with(|| {
                let m = nalgebra::center(&positions[a as usize], &positions[b as usize]);
                positions.push(Point3f::from(m.coords.normalize()));
                (positions.len() - 1) as u32
            })
        };

        let mut next = Vec::with_capacity(indices.len() * 4);
        for tri in indices.chunks_exact(3) {
            let (v0, v1, v2) = (tri[0], tri[1], tri[2]);
            let a = midpoint(v0, v1, &mut positions);
            let b = midpoint(v1, v2, &mut positions);
            let c = midpoint(v2, v0, &mut positions);
            next.extend_from_slice(&[v0, a, c, v1, b, a, v2, c, b, a, b, c]);
        }
        indices = next;
    }

    PrimitiveMesh { positions, indices }
}
