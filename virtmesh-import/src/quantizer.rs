//! Vertex data quantization
//!
//! Positions are stored per meshlet as signed integer offsets from the
//! meshlet's bounding sphere center, on a grid of `1 << grid_bits` cells
//! per unit, packed into a [`BitStream`]. Attributes are converted to their
//! compact runtime encodings (octahedral normals, half precision UVs).

use crate::BitStream;
use half::f16;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use virtmesh_core::{
    Error, Meshlet, MeshletCullBounds, Point3f, Result, VertexFormat, VertexLayout, VertexView,
};

/// Quantization grid resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizationConfig {
    /// The grid has `1 << grid_bits` cells per unit
    pub grid_bits: u32,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self { grid_bits: 8 }
    }
}

impl QuantizationConfig {
    /// Set grid resolution in bits per unit
    pub fn with_grid_bits(mut self, grid_bits: u32) -> Self {
        self.grid_bits = grid_bits;
        self
    }
}

/// Encodes positions and attributes into their runtime representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexDataQuantizer {
    grid_bits: u32,
}

impl Default for VertexDataQuantizer {
    fn default() -> Self {
        Self::new(QuantizationConfig::default())
    }
}

impl VertexDataQuantizer {
    pub fn new(config: QuantizationConfig) -> Self {
        Self {
            grid_bits: config.grid_bits,
        }
    }

    pub fn grid_bits(&self) -> u32 {
        self.grid_bits
    }

    pub fn grid_size(&self) -> f32 {
        (1u64 << self.grid_bits) as f32
    }

    /// `ceil(log2(diameter * grid_size))` clamped to `[1, 32]`
    pub fn compute_meshlet_bitrate(&self, diameter: f32) -> u32 {
        let bits = (diameter * self.grid_size()).log2().ceil();
        if bits.is_nan() {
            return 1;
        }
        (bits as i64).clamp(1, BitStream::STORAGE_TYPE_BIT_SIZE as i64) as u32
    }

    /// Rounds every channel to the nearest grid vertex
    pub fn snap_to_grid(&self, value: [f32; 3]) -> [f32; 3] {
        let grid = self.grid_size();
        value.map(|v| (v * grid).round() / grid)
    }

    /// Encodes a center-relative channel value at `bitrate` bits, or `None`
    /// if the value does not fit. `bitrate` is clamped to `[1, 32]`.
    pub fn quantize_vertex_channel(&self, value: f32, bitrate: u32) -> Option<u32> {
        let offset = self.grid_offset(value);
        let bias = 1i64 << (clamp_bitrate(bitrate) - 1);
        let stored = offset + bias;
        (0..(bias << 1)).contains(&stored).then_some(stored as u32)
    }

    /// Inverse of [`Self::quantize_vertex_channel`], relative to the meshlet center
    pub fn dequantize_vertex_channel(&self, stored: u32, bitrate: u32) -> f32 {
        let bias = 1i64 << (clamp_bitrate(bitrate) - 1);
        (stored as i64 - bias) as f32 / self.grid_size()
    }

    fn grid_offset(&self, value: f32) -> i64 {
        (value * self.grid_size()).round() as i64
    }

    /// Packs the positions of every meshlet into one bitstream.
    ///
    /// `positions` holds the meshlet vertices back to back, so vertex `i` of a
    /// meshlet is `positions[vertex_offset + i]`. Sphere centers are snapped
    /// to the grid in place, radii grow by one grid cell diagonal so the
    /// spheres still bound the decoded vertices, and each meshlet receives its
    /// bit offset and bitrate. A bitrate is widened when snapping pushes a vertex past the
    /// representable range, so decoding is exact to the grid.
    pub fn quantize_meshlets(
        &self,
        meshlets: &mut [Meshlet],
        cull_bounds: &mut [MeshletCullBounds],
        positions: &[Point3f],
    ) -> Result<BitStream> {
        let estimated_bits = positions.len() * 3 * (self.grid_bits as usize + 4);
        let mut stream = BitStream::with_capacity_bytes(estimated_bits.div_ceil(8));

        for (meshlet, bounds) in meshlets.iter_mut().zip(cull_bounds.iter_mut()) {
            let center = self.snap_to_grid(bounds.vis_culling_sphere.center);
            bounds.vis_culling_sphere.center = center;

            let start = meshlet.vertex_offset as usize;
            let vertices = positions
                .get(start..start + meshlet.vertex_count as usize)
                .ok_or_else(|| {
                    Error::InvalidData(format!(
                        "meshlet vertices {}..{} exceed {} positions",
                        start,
                        start + meshlet.vertex_count as usize,
                        positions.len()
                    ))
                })?;

            let offsets: Vec<i64> = vertices
                .iter()
                .flat_map(|p| (0..3).map(move |c| p[c] - center[c]))
                .map(|v| self.grid_offset(v))
                .collect();
            let (min, max) = offsets
                .iter()
                .fold((0i64, 0i64), |(lo, hi), &o| (lo.min(o), hi.max(o)));

            let mut bitrate = self.compute_meshlet_bitrate(bounds.vis_culling_sphere.diameter());
            while min < -(1i64 << (bitrate - 1)) || max >= (1i64 << (bitrate - 1)) {
                bitrate += 1;
                if bitrate > BitStream::STORAGE_TYPE_BIT_SIZE {
                    return Err(Error::InvalidData(format!(
                        "meshlet spans {}..{} grid cells, more than 32 bits can hold",
                        min, max
                    )));
                }
            }

            meshlet.vertex_bit_offset = stream.num_bits_used() as u32;
            meshlet.bitrate = bitrate;
            // snapped center and rounded vertex each drift by up to half a cell diagonal
            bounds.vis_culling_sphere.radius += 3f32.sqrt() / self.grid_size();
            let bias = 1i64 << (bitrate - 1);
            for offset in offsets {
                stream.append(bitrate, (offset + bias) as u32);
            }
        }

        Ok(stream)
    }

    /// Reconstructs the grid-snapped positions of one meshlet
    pub fn decode_meshlet_positions(
        &self,
        stream: &BitStream,
        meshlet: &Meshlet,
        bounds: &MeshletCullBounds,
    ) -> Result<Vec<Point3f>> {
        let center = bounds.vis_culling_sphere.center;
        let bits = meshlet.bitrate;
        (0..meshlet.vertex_count as usize)
            .map(|v| {
                let mut p = [0.0f32; 3];
                for (c, value) in p.iter_mut().enumerate() {
                    let offset = meshlet.vertex_bit_offset as usize + (v * 3 + c) * bits as usize;
                    let stored = stream.read(offset, bits).ok_or_else(|| {
                        Error::InvalidData(format!("bit offset {} outside the geometry stream", offset))
                    })?;
                    *value = self.dequantize_vertex_channel(stored, bits) + center[c];
                }
                Ok(Point3f::new(p[0], p[1], p[2]))
            })
            .collect()
    }

    /// Octahedral encoding into two half floats
    pub fn quantize_normal(&self, n: Vector3<f32>) -> [u16; 2] {
        let l1 = n.x.abs() + n.y.abs() + n.z.abs();
        let n = if l1 > f32::EPSILON { n / l1 } else { Vector3::z() };
        let (x, y) = if n.z >= 0.0 {
            (n.x, n.y)
        } else {
            oct_wrap(n.x, n.y)
        };
        [
            f16::from_f32(x * 0.5 + 0.5).to_bits(),
            f16::from_f32(y * 0.5 + 0.5).to_bits(),
        ]
    }

    pub fn dequantize_normal(&self, q: [u16; 2]) -> Vector3<f32> {
        let x = f16::from_bits(q[0]).to_f32() * 2.0 - 1.0;
        let y = f16::from_bits(q[1]).to_f32() * 2.0 - 1.0;
        let mut n = Vector3::new(x, y, 1.0 - x.abs() - y.abs());
        let t = (-n.z).max(0.0);
        n.x += if n.x >= 0.0 { -t } else { t };
        n.y += if n.y >= 0.0 { -t } else { t };
        n.normalize()
    }

    /// Octahedral normal with the bitangent sign in the lowest bit of `y`
    pub fn quantize_tangent(&self, t: [f32; 4]) -> [u16; 2] {
        let mut q = self.quantize_normal(Vector3::new(t[0], t[1], t[2]));
        q[1] = if t[3] >= 0.0 { q[1] | 1 } else { q[1] & !1 };
        q
    }

    pub fn dequantize_tangent(&self, q: [u16; 2]) -> [f32; 4] {
        let n = self.dequantize_normal(q);
        let sign = if q[1] & 1 == 1 { 1.0 } else { -1.0 };
        [n.x, n.y, n.z, sign]
    }

    pub fn quantize_uv(&self, uv: [f32; 2]) -> [u16; 2] {
        uv.map(|c| f16::from_f32(c).to_bits())
    }

    /// Runtime size in bytes of an attribute, by its name
    pub fn runtime_attribute_size(name: &str) -> Result<usize> {
        if name == "NORMAL" || name == "TANGENT" || name.contains("TEXCOORD") || name.contains("COLOR") {
            Ok(4)
        } else if name.contains("JOINTS") || name.contains("WEIGHTS") {
            Ok(8)
        } else {
            Err(Error::Unsupported(format!("unknown vertex attribute {}", name)))
        }
    }

    /// Runtime attribute offsets relative to the attribute stream, in name
    /// order, and the resulting attribute stride
    pub fn runtime_layout(layout: &VertexLayout) -> Result<(BTreeMap<String, usize>, usize)> {
        let mut names: Vec<&str> = layout.attributes().iter().map(|a| a.name.as_str()).collect();
        names.sort_unstable();

        let mut table = BTreeMap::new();
        let mut stride = 0;
        for name in names {
            table.insert(name.to_string(), stride);
            stride += Self::runtime_attribute_size(name)?;
        }
        Ok((table, stride))
    }

    /// Converts the attributes of every vertex into the runtime layout
    /// returned by [`Self::runtime_layout`]
    pub fn encode_runtime_attributes(
        &self,
        vertices: &VertexView<'_>,
        layout: &VertexLayout,
    ) -> Result<Vec<u8>> {
        let mut attributes: Vec<_> = layout.attributes().iter().collect();
        attributes.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        let (_, stride) = Self::runtime_layout(layout)?;

        let mut out = Vec::with_capacity(vertices.len() * stride);
        for v in 0..vertices.len() {
            let record = vertices.record(v)?;
            for attribute in &attributes {
                let bytes = record
                    .get(attribute.offset..attribute.offset + attribute.format.size())
                    .ok_or_else(|| {
                        Error::InvalidData(format!(
                            "attribute {} exceeds vertex stride {}",
                            attribute.name,
                            vertices.stride()
                        ))
                    })?;
                self.encode_attribute(&attribute.name, attribute.format, bytes, &mut out)?;
            }
        }
        Ok(out)
    }

    fn encode_attribute(
        &self,
        name: &str,
        format: VertexFormat,
        bytes: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let encoded: Vec<u8> = match (format, Self::runtime_attribute_size(name)?) {
            (VertexFormat::Float16x2, 4) | (VertexFormat::Unorm8x4, 4) => bytes.to_vec(),
            (VertexFormat::Float32x3, 4) if name == "NORMAL" => {
                let n: [f32; 3] = bytemuck::pod_read_unaligned(bytes);
                bytemuck::cast_slice(&self.quantize_normal(Vector3::from(n))).to_vec()
            }
            (VertexFormat::Float32x4, 4) if name == "TANGENT" => {
                let t: [f32; 4] = bytemuck::pod_read_unaligned(bytes);
                bytemuck::cast_slice(&self.quantize_tangent(t)).to_vec()
            }
            (VertexFormat::Float32x2, 4) if name.contains("TEXCOORD") => {
                let uv: [f32; 2] = bytemuck::pod_read_unaligned(bytes);
                bytemuck::cast_slice(&self.quantize_uv(uv)).to_vec()
            }
            (VertexFormat::Float32x4, 4) if name.contains("COLOR") => {
                let c: [f32; 4] = bytemuck::pod_read_unaligned(bytes);
                c.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8).to_vec()
            }
            (VertexFormat::Float32x4, 8) if name.contains("WEIGHTS") => {
                let w: [f32; 4] = bytemuck::pod_read_unaligned(bytes);
                let unorm = w.map(|v| (v.clamp(0.0, 1.0) * 65535.0).round() as u16);
                bytemuck::cast_slice(&unorm).to_vec()
            }
            (format, _) => {
                return Err(Error::Unsupported(format!(
                    "attribute {} cannot be encoded from {:?}",
                    name, format
                )))
            }
        };
        out.extend_from_slice(&encoded);
        Ok(())
    }
}

fn oct_wrap(x: f32, y: f32) -> (f32, f32) {
    let sign = |v: f32| if v >= 0.0 { 1.0 } else { -1.0 };
    ((1.0 - y.abs()) * sign(x), (1.0 - x.abs()) * sign(y))
}

fn clamp_bitrate(bitrate: u32) -> u32 {
    bitrate.clamp(1, BitStream::STORAGE_TYPE_BIT_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use virtmesh_core::Sphere;

    #[test]
    fn test_bitrate_from_diameter() {
        let quantizer = VertexDataQuantizer::default();

        assert_eq!(quantizer.compute_meshlet_bitrate(2.0), 9);
        assert_eq!(quantizer.compute_meshlet_bitrate(1.0), 8);
        assert_eq!(quantizer.compute_meshlet_bitrate(0.0), 1);
        assert_eq!(quantizer.compute_meshlet_bitrate(1e-6), 1);
        assert_eq!(quantizer.compute_meshlet_bitrate(1e12), 32);
    }

    #[test]
    fn test_channel_round_trip_within_grid() {
        let quantizer = VertexDataQuantizer::default();
        for value in [-0.99f32, -0.5, -0.0031, 0.0, 0.25, 0.7071, 0.99] {
            let stored = quantizer.quantize_vertex_channel(value, 9).unwrap();
            let decoded = quantizer.dequantize_vertex_channel(stored, 9);
            assert!((decoded - value).abs() <= 0.5 / 256.0 + 1e-6, "{} -> {}", value, decoded);
        }
        assert!(quantizer.quantize_vertex_channel(1.0, 9).is_none());
        assert!(quantizer.quantize_vertex_channel(-1.0, 9).is_some());
    }

    #[test]
    fn test_channel_bitrate_is_clamped() {
        let quantizer = VertexDataQuantizer::default();

        assert_eq!(
            quantizer.quantize_vertex_channel(0.0, 0),
            quantizer.quantize_vertex_channel(0.0, 1)
        );
        assert_eq!(
            quantizer.quantize_vertex_channel(-3.0, 40),
            quantizer.quantize_vertex_channel(-3.0, 32)
        );
        assert_eq!(
            quantizer.dequantize_vertex_channel(1, 0),
            quantizer.dequantize_vertex_channel(1, 1)
        );
        assert_eq!(
            quantizer.dequantize_vertex_channel(7, 64),
            quantizer.dequantize_vertex_channel(7, 32)
        );
    }

    #[test]
    fn test_meshlet_positions_round_trip() {
        let quantizer = VertexDataQuantizer::default();
        let positions = vec![
            Point3f::new(10.3, -2.0, 0.5),
            Point3f::new(11.3, -2.0, 0.5),
            Point3f::new(10.8, -1.0, 0.1),
            Point3f::new(10.8, -1.5, 0.9),
        ];
        let mut meshlets = vec![Meshlet {
            vertex_offset: 0,
            vertex_count: 4,
            ..Default::default()
        }];
        let mut bounds = vec![MeshletCullBounds {
            vis_culling_sphere: Sphere::new(Point3f::new(10.8, -1.5, 0.5), 0.71),
            ..Default::default()
        }];

        let stream = quantizer
            .quantize_meshlets(&mut meshlets, &mut bounds, &positions)
            .unwrap();

        assert!(meshlets[0].bitrate >= quantizer.compute_meshlet_bitrate(1.42));
        assert_eq!(stream.num_bits_used(), 12 * meshlets[0].bitrate as usize);
        let center = bounds[0].vis_culling_sphere.center;
        assert_eq!(center, quantizer.snap_to_grid(center), "center is on the grid");

        let decoded = quantizer
            .decode_meshlet_positions(&stream, &meshlets[0], &bounds[0])
            .unwrap();
        for (p, d) in positions.iter().zip(&decoded) {
            for c in 0..3 {
                assert!((p[c] - d[c]).abs() <= 1.0 / 256.0, "{:?} decoded as {:?}", p, d);
            }
        }
    }

    #[test]
    fn test_snapped_sphere_bounds_decoded_vertices() {
        let quantizer = VertexDataQuantizer::default();
        // the sphere touches both vertices and its center sits half a cell off the grid
        let half_cell = 0.5 / 256.0;
        let center = Point3f::new(half_cell * 0.99, half_cell * 0.99, half_cell * 0.99);
        let positions = vec![
            Point3f::from(center.coords - Vector3::new(0.3, 0.0, 0.0)),
            Point3f::from(center.coords + Vector3::new(0.3, 0.0, 0.0)),
        ];
        let mut meshlets = vec![Meshlet {
            vertex_count: 2,
            ..Default::default()
        }];
        let mut bounds = vec![MeshletCullBounds {
            vis_culling_sphere: Sphere::new(center, 0.3),
            ..Default::default()
        }];

        let stream = quantizer
            .quantize_meshlets(&mut meshlets, &mut bounds, &positions)
            .unwrap();
        let sphere = &bounds[0].vis_culling_sphere;
        assert_relative_eq!(sphere.radius, 0.3 + 3f32.sqrt() / 256.0, epsilon = 1e-6);

        let decoded = quantizer
            .decode_meshlet_positions(&stream, &meshlets[0], &bounds[0])
            .unwrap();
        for p in positions.iter().chain(&decoded) {
            assert!(sphere.contains(p, 1e-6), "{:?} outside {:?}", p, sphere);
        }
    }

    #[test]
    fn test_bitrate_widens_when_center_snaps() {
        let quantizer = VertexDataQuantizer::default();
        // the formula gives 1 bit, but snapping the center to 0 leaves the
        // first vertex one grid step outside that range
        let positions = vec![Point3f::new(0.5 / 256.0 + 1.0 / 512.0, 0.0, 0.0), Point3f::new(-0.5 / 256.0, 0.0, 0.0)];
        let mut meshlets = vec![Meshlet {
            vertex_count: 2,
            ..Default::default()
        }];
        let mut bounds = vec![MeshletCullBounds {
            vis_culling_sphere: Sphere::new(Point3f::new(0.0019, 0.0, 0.0), 0.5 / 256.0 + 0.001),
            ..Default::default()
        }];

        assert_eq!(quantizer.compute_meshlet_bitrate(bounds[0].vis_culling_sphere.diameter()), 1);
        let stream = quantizer
            .quantize_meshlets(&mut meshlets, &mut bounds, &positions)
            .unwrap();
        assert_eq!(meshlets[0].bitrate, 2);
        let decoded = quantizer
            .decode_meshlet_positions(&stream, &meshlets[0], &bounds[0])
            .unwrap();

        for (p, d) in positions.iter().zip(&decoded) {
            assert!((p.x - d.x).abs() <= 0.5 / 256.0 + 1e-6);
        }
    }

    #[test]
    fn test_octahedral_normals() {
        let quantizer = VertexDataQuantizer::default();
        for n in [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(1.0, 2.0, -3.0).normalize(),
            Vector3::new(-0.3, 0.9, 0.1).normalize(),
        ] {
            let decoded = quantizer.dequantize_normal(quantizer.quantize_normal(n));
            assert!(decoded.dot(&n) > 0.999, "{:?} decoded as {:?}", n, decoded);
        }
    }

    #[test]
    fn test_tangent_sign_bit() {
        let quantizer = VertexDataQuantizer::default();
        let positive = quantizer.dequantize_tangent(quantizer.quantize_tangent([1.0, 0.0, 0.0, 1.0]));
        let negative = quantizer.dequantize_tangent(quantizer.quantize_tangent([1.0, 0.0, 0.0, -1.0]));

        assert_eq!(positive[3], 1.0);
        assert_eq!(negative[3], -1.0);
        assert_relative_eq!(positive[0], 1.0, epsilon = 1e-2);
    }

    #[test]
    fn test_runtime_layout() {
        let layout = VertexLayout::from_attributes([
            ("TEXCOORD_0", VertexFormat::Float32x2),
            ("NORMAL", VertexFormat::Float32x3),
            ("TANGENT", VertexFormat::Float32x4),
        ]);
        let (table, stride) = VertexDataQuantizer::runtime_layout(&layout).unwrap();

        assert_eq!(stride, 12);
        assert_eq!(table["NORMAL"], 0);
        assert_eq!(table["TANGENT"], 4);
        assert_eq!(table["TEXCOORD_0"], 8);
        assert!(VertexDataQuantizer::runtime_attribute_size("FOO").is_err());
        assert_eq!(VertexDataQuantizer::runtime_attribute_size("JOINTS_0").unwrap(), 8);
    }

    #[test]
    fn test_encode_runtime_attributes() {
        let layout = VertexLayout::from_attributes([
            ("NORMAL", VertexFormat::Float32x3),
            ("TEXCOORD_0", VertexFormat::Float32x2),
        ]);
        let floats: [f32; 8] = [1.0, 2.0, 3.0, 0.0, 0.0, 1.0, 0.25, 0.75];
        let bytes: Vec<u8> = bytemuck::cast_slice(&floats).to_vec();
        let view = VertexView::new(&bytes, layout.stride()).unwrap();
        let quantizer = VertexDataQuantizer::default();

        let encoded = quantizer.encode_runtime_attributes(&view, &layout).unwrap();

        assert_eq!(encoded.len(), 8);
        let words: [u16; 4] = bytemuck::pod_read_unaligned(&encoded);
        let normal = quantizer.dequantize_normal([words[0], words[1]]);
        assert_relative_eq!(normal.z, 1.0, epsilon = 1e-3);
        assert_eq!(f16::from_bits(words[2]).to_f32(), 0.25);
        assert_eq!(f16::from_bits(words[3]).to_f32(), 0.75);
    }
}
