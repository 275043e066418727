//! Core data structures and traits for virtmesh
//!
//! This crate provides the data model shared by every stage of the meshlet
//! clusterization pipeline: bounding volumes, meshlets and their cull bounds,
//! the virtual mesh artifact, typed vertex buffer access, and the seams
//! (spatial search, graph partitioning) the pipeline is built around.

pub mod bounds;
pub mod error;
pub mod graph;
pub mod meshlet;
pub mod point;
pub mod primitives;
pub mod traits;
pub mod vertex;
pub mod virtual_mesh;

pub use bounds::*;
pub use error::*;
pub use graph::*;
pub use meshlet::*;
pub use point::*;
pub use traits::*;
pub use vertex::*;
pub use virtual_mesh::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Point3, Vector3};
