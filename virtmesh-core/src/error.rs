//! Error types for virtmesh

use thiserror::Error;

/// Main error type for virtmesh operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("Graph partitioning failed: {0}")]
    Partition(String),

    #[error("Simplification failed: {0}")]
    Simplification(String),

    #[error("Device upload failed: {0}")]
    Upload(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Result type alias for virtmesh operations
pub type Result<T> = std::result::Result<T, Error>;
