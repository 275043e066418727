//! Mesh import for virtualized geometry
//!
//! This crate drives the clusterization pipeline for whole assets:
//! - Discrete LOD chain and meshlet LOD-DAG construction per mesh
//! - Position quantization into per-meshlet bitstreams
//! - Runtime attribute encoding (octahedral normals, half precision UVs)
//! - Device upload and asset registration through an explicit [`ImportContext`]
//! - Parallel import of many meshes

pub mod bitstream;
pub mod context;
pub mod mesh;
pub mod parallel;
pub mod process;
pub mod quantizer;

pub use bitstream::*;
pub use context::*;
pub use mesh::*;
pub use parallel::*;
pub use process::*;
pub use quantizer::*;
