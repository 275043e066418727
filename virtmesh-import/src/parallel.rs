//! Parallel multi-mesh import
//!
//! Each mesh runs the whole single-threaded pipeline on one worker; meshes
//! share nothing but the import context.

use crate::{process_mesh_data, ImportContext, Mesh};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use virtmesh_core::{Error, Result, VertexLayout};

/// Worker pool configuration for [`import_meshes`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    /// Number of threads to use (None = one per logical core)
    pub num_threads: Option<usize>,
    /// Thread stack size in bytes
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
    /// Import sequentially on the calling thread when disabled
    pub enabled: bool,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            stack_size: Some(8 * 1024 * 1024),
            thread_name_prefix: "virtmesh-import".to_string(),
            enabled: true,
        }
    }
}

impl ThreadPoolConfig {
    /// Set number of threads
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Set stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Enable or disable parallel import
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Build a rayon thread pool from this configuration
    pub fn build_pool(&self) -> Result<ThreadPool> {
        let mut builder = ThreadPoolBuilder::new();

        if let Some(num_threads) = self.num_threads {
            builder = builder.num_threads(num_threads);
        }

        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        if !self.thread_name_prefix.is_empty() {
            let prefix = self.thread_name_prefix.clone();
            builder = builder.thread_name(move |index| format!("{}-{}", prefix, index));
        }

        builder
            .build()
            .map_err(|e| Error::Algorithm(format!("Failed to create thread pool: {}", e)))
    }
}

/// Interleaved vertices, triangle list and layout of one mesh to import
#[derive(Debug, Clone, Copy)]
pub struct MeshSource<'a> {
    pub vertices: &'a [u8],
    pub indices: &'a [u32],
    pub layout: &'a VertexLayout,
}

/// Imports every source, in parallel unless disabled in `ctx.config.threads`.
///
/// Results keep the order of `sources`. The first failure is returned;
/// meshes imported before it stay registered.
pub fn import_meshes(ctx: &ImportContext, sources: &[MeshSource<'_>]) -> Result<Vec<Arc<Mesh>>> {
    let import = |source: &MeshSource<'_>| {
        process_mesh_data(ctx, source.vertices, source.indices, source.layout)
    };

    if !ctx.config.threads.enabled || sources.len() < 2 {
        return sources.iter().map(import).collect();
    }

    let pool = ctx.thread_pool()?;
    log::debug!(
        "importing {} meshes on {} threads",
        sources.len(),
        pool.current_num_threads()
    );
    pool.install(|| sources.par_iter().map(import).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_uses_configured_threads() {
        let pool = ThreadPoolConfig::default().with_threads(2).build_pool().unwrap();
        assert_eq!(pool.current_num_threads(), 2);

        let name = pool.install(|| std::thread::current().name().map(str::to_string));
        assert!(name.unwrap().starts_with("virtmesh-import-"));
    }

    #[test]
    fn test_config_defaults() {
        let config = ThreadPoolConfig::default();
        assert!(config.enabled);
        assert_eq!(config.num_threads, None);
        assert_eq!(config.stack_size, Some(8 * 1024 * 1024));
    }
}
