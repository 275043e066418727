//! Typed access to interleaved vertex buffers
//!
//! Vertex buffers are opaque byte sequences with a constant stride. The first
//! 12 bytes of every record are always a `3 x f32` position; the remaining
//! bytes hold attributes whose placement is described by a [`VertexLayout`].

use crate::{Error, Point3f, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Size in bytes of the position that starts every vertex record
pub const POSITION_SIZE: usize = 12;

/// Storage format of a single vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    Float16x2,
    Unorm8x4,
}

impl VertexFormat {
    pub fn size(self) -> usize {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
            VertexFormat::Float16x2 | VertexFormat::Unorm8x4 => 4,
        }
    }
}

/// Named attribute at a fixed byte offset inside a vertex record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexAttribute {
    pub name: String,
    pub offset: usize,
    pub format: VertexFormat,
}

/// Attribute metadata table of an interleaved vertex buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
    stride: usize,
}

impl Default for VertexLayout {
    fn default() -> Self {
        Self::position_only()
    }
}

impl VertexLayout {
    /// Layout with nothing but the position
    pub fn position_only() -> Self {
        Self {
            attributes: Vec::new(),
            stride: POSITION_SIZE,
        }
    }

    /// Packs the given attributes right after the position, sorted by name.
    pub fn from_attributes<S, I>(attributes: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, VertexFormat)>,
    {
        let mut sorted: Vec<(String, VertexFormat)> = attributes
            .into_iter()
            .map(|(name, format)| (name.into(), format))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut offset = POSITION_SIZE;
        let mut packed = Vec::with_capacity(sorted.len());
        for (name, format) in sorted {
            packed.push(VertexAttribute {
                name,
                offset,
                format,
            });
            offset += format.size();
        }

        Self {
            attributes: packed,
            stride: offset,
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// UV channels (`TEXCOORD_n`) in layout order
    pub fn texcoord_channels(&self) -> impl Iterator<Item = &VertexAttribute> {
        self.attributes
            .iter()
            .filter(|a| a.name.contains("TEXCOORD"))
    }

    /// Attribute offsets relative to the attribute stream, i.e. with the position stripped
    pub fn runtime_layout_table(&self) -> BTreeMap<String, usize> {
        self.attributes
            .iter()
            .map(|a| (a.name.clone(), a.offset - POSITION_SIZE))
            .collect()
    }
}

/// Bounds-checked view over an interleaved vertex buffer
#[derive(Debug, Clone, Copy)]
pub struct VertexView<'a> {
    bytes: &'a [u8],
    stride: usize,
}

impl<'a> VertexView<'a> {
    pub fn new(bytes: &'a [u8], stride: usize) -> Result<Self> {
        if stride < POSITION_SIZE {
            return Err(Error::InvalidData(format!(
                "vertex stride {} is smaller than the {} byte position",
                stride, POSITION_SIZE
            )));
        }
        if bytes.len() % stride != 0 {
            return Err(Error::InvalidData(format!(
                "vertex buffer of {} bytes is not a multiple of stride {}",
                bytes.len(),
                stride
            )));
        }
        Ok(Self { bytes, stride })
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw bytes of a single vertex record
    pub fn record(&self, index: usize) -> Result<&'a [u8]> {
        let start = index * self.stride;
        self.bytes.get(start..start + self.stride).ok_or_else(|| {
            Error::InvalidData(format!(
                "vertex index {} out of range ({} vertices)",
                index,
                self.len()
            ))
        })
    }

    pub fn position(&self, index: usize) -> Result<Point3f> {
        let record = self.record(index)?;
        let xyz: [f32; 3] = bytemuck::pod_read_unaligned(&record[..POSITION_SIZE]);
        Ok(Point3f::new(xyz[0], xyz[1], xyz[2]))
    }

    /// Reads a two component attribute (UV) as floats
    pub fn read_f32x2(&self, index: usize, attribute: &VertexAttribute) -> Result<[f32; 2]> {
        let record = self.record(index)?;
        let end = attribute.offset + attribute.format.size();
        let bytes = record.get(attribute.offset..end).ok_or_else(|| {
            Error::InvalidData(format!(
                "attribute {} exceeds vertex stride {}",
                attribute.name, self.stride
            ))
        })?;
        match attribute.format {
            VertexFormat::Float32x2 => Ok(bytemuck::pod_read_unaligned(bytes)),
            VertexFormat::Float16x2 => {
                let h: [u16; 2] = bytemuck::pod_read_unaligned(bytes);
                Ok([
                    half::f16::from_bits(h[0]).to_f32(),
                    half::f16::from_bits(h[1]).to_f32(),
                ])
            }
            other => Err(Error::Unsupported(format!(
                "attribute {} has format {:?}, expected a two component float",
                attribute.name, other
            ))),
        }
    }

    pub fn positions(&self) -> impl Iterator<Item = Point3f> + 'a {
        self.bytes.chunks_exact(self.stride).map(|record| {
            let xyz: [f32; 3] = bytemuck::pod_read_unaligned(&record[..POSITION_SIZE]);
            Point3f::new(xyz[0], xyz[1], xyz[2])
        })
    }

    /// Checks that `indices` is a triangle list referencing only vertices of this view
    pub fn validate_indices(&self, indices: &[u32]) -> Result<()> {
        if indices.len() % 3 != 0 {
            return Err(Error::InvalidData(format!(
                "index count {} is not a multiple of 3",
                indices.len()
            )));
        }
        let vertex_count = self.len();
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(Error::InvalidData(format!(
                "index {} out of range ({} vertices)",
                bad, vertex_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interleave(positions: &[[f32; 3]], uvs: &[[f32; 2]]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (p, uv) in positions.iter().zip(uvs) {
            bytes.extend_from_slice(bytemuck::cast_slice(p));
            bytes.extend_from_slice(bytemuck::cast_slice(uv));
        }
        bytes
    }

    #[test]
    fn test_layout_sorted_after_position() {
        let layout = VertexLayout::from_attributes([
            ("TEXCOORD_0", VertexFormat::Float32x2),
            ("NORMAL", VertexFormat::Float32x3),
        ]);

        assert_eq!(layout.stride(), 12 + 12 + 8);
        assert_eq!(layout.attribute("NORMAL").map(|a| a.offset), Some(12));
        assert_eq!(layout.attribute("TEXCOORD_0").map(|a| a.offset), Some(24));

        let table = layout.runtime_layout_table();
        assert_eq!(table["NORMAL"], 0);
        assert_eq!(table["TEXCOORD_0"], 12);
        assert_eq!(layout.texcoord_channels().count(), 1);
    }

    #[test]
    fn test_view_rejects_bad_stride() {
        let bytes = vec![0u8; 24];
        assert!(VertexView::new(&bytes, 8).is_err());
        assert!(VertexView::new(&bytes, 20).is_err());
        assert!(VertexView::new(&bytes, 12).is_ok());
    }

    #[test]
    fn test_view_reads_positions_and_uvs() {
        let layout = VertexLayout::from_attributes([("TEXCOORD_0", VertexFormat::Float32x2)]);
        let bytes = interleave(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], &[[0.25, 0.5], [0.75, 1.0]]);
        let view = VertexView::new(&bytes, layout.stride()).unwrap();

        assert_eq!(view.len(), 2);
        assert_eq!(view.position(1).unwrap(), Point3f::new(4.0, 5.0, 6.0));
        let uv = layout.attribute("TEXCOORD_0").unwrap();
        assert_eq!(view.read_f32x2(0, uv).unwrap(), [0.25, 0.5]);
        assert!(view.position(2).is_err(), "out of range read must fail");
        assert_eq!(view.positions().count(), 2);
    }

    #[test]
    fn test_validate_indices() {
        let bytes = vec![0u8; 36];
        let view = VertexView::new(&bytes, 12).unwrap();
        assert!(view.validate_indices(&[0, 1, 2]).is_ok());
        assert!(view.validate_indices(&[0, 1]).is_err());
        assert!(view.validate_indices(&[0, 1, 3]).is_err());
    }
}
