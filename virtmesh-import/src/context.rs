//! Explicit import context: asset registry, device upload seam and the
//! shared graph partitioner

use crate::{ImportConfig, Mesh};
use rayon::ThreadPool;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use virtmesh_algorithms::MetisPartitioner;
use virtmesh_core::{Error, GraphPartitioner, Result};

/// Opaque GPU virtual address of an uploaded buffer
pub type DeviceAddress = u64;

/// Uploads byte buffers into device-resident storage
pub trait DeviceUploader: Send + Sync {
    /// Submits `bytes` for upload and returns the address the buffer will live at
    fn upload(&self, label: &str, bytes: &[u8]) -> Result<DeviceAddress>;

    /// Waits for every submitted upload
    fn flush(&self) -> Result<()>;
}

/// Keeps "uploaded" buffers in host memory
#[derive(Debug, Default)]
pub struct HostMemoryUploader {
    heap: Mutex<HostHeap>,
}

#[derive(Debug, Default)]
struct HostHeap {
    buffers: Vec<HostBuffer>,
    next_address: DeviceAddress,
}

#[derive(Debug, Clone)]
struct HostBuffer {
    label: String,
    address: DeviceAddress,
    bytes: Vec<u8>,
}

impl HostMemoryUploader {
    /// First address handed out, null stays invalid
    pub const BASE_ADDRESS: DeviceAddress = 0x1000;
    pub const ALIGNMENT: DeviceAddress = 256;

    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes stored at `address`, if a buffer starts there
    pub fn read(&self, address: DeviceAddress) -> Option<Vec<u8>> {
        self.heap()
            .buffers
            .iter()
            .find(|b| b.address == address)
            .map(|b| b.bytes.clone())
    }

    pub fn label(&self, address: DeviceAddress) -> Option<String> {
        self.heap()
            .buffers
            .iter()
            .find(|b| b.address == address)
            .map(|b| b.label.clone())
    }

    pub fn buffer_count(&self) -> usize {
        self.heap().buffers.len()
    }

    /// Total bytes uploaded so far
    pub fn allocated_bytes(&self) -> usize {
        self.heap().buffers.iter().map(|b| b.bytes.len()).sum()
    }

    fn heap(&self) -> std::sync::MutexGuard<'_, HostHeap> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceUploader for HostMemoryUploader {
    fn upload(&self, label: &str, bytes: &[u8]) -> Result<DeviceAddress> {
        let mut heap = self.heap();
        let address = heap.next_address.max(Self::BASE_ADDRESS);
        let size = (bytes.len() as DeviceAddress).max(1);
        heap.next_address = (address + size).next_multiple_of(Self::ALIGNMENT);
        heap.buffers.push(HostBuffer {
            label: label.to_string(),
            address,
            bytes: bytes.to_vec(),
        });
        log::trace!("uploaded {} ({} bytes) to {:#x}", label, bytes.len(), address);
        Ok(address)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Randomly generated asset identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetHandle(u64);

impl AssetHandle {
    /// Random non-zero handle
    pub fn generate() -> Self {
        loop {
            let value = rand::random::<u64>();
            if value != 0 {
                return Self(value);
            }
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Registered mesh assets, shared between importer threads
#[derive(Debug, Default)]
pub struct AssetRegistry {
    meshes: RwLock<HashMap<AssetHandle, Arc<Mesh>>>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mesh under its own handle. Registering the same handle
    /// twice is an error.
    pub fn register(&self, mesh: Arc<Mesh>) -> Result<AssetHandle> {
        let handle = mesh.handle;
        let mut meshes = self.meshes.write().unwrap_or_else(PoisonError::into_inner);
        if meshes.contains_key(&handle) {
            return Err(Error::InvalidData(format!(
                "asset {} is already registered",
                handle
            )));
        }
        meshes.insert(handle, mesh);
        Ok(handle)
    }

    pub fn get(&self, handle: AssetHandle) -> Option<Arc<Mesh>> {
        self.meshes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
    }

    pub fn contains(&self, handle: AssetHandle) -> bool {
        self.meshes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&handle)
    }

    pub fn remove(&self, handle: AssetHandle) -> Option<Arc<Mesh>> {
        self.meshes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.meshes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything an import needs that outlives a single mesh
pub struct ImportContext {
    pub registry: Arc<AssetRegistry>,
    pub uploader: Arc<dyn DeviceUploader>,
    pub partitioner: Arc<dyn GraphPartitioner>,
    pub config: ImportConfig,
    thread_pool: OnceLock<Arc<ThreadPool>>,
}

impl ImportContext {
    pub fn new(
        registry: Arc<AssetRegistry>,
        uploader: Arc<dyn DeviceUploader>,
        partitioner: Arc<dyn GraphPartitioner>,
        config: ImportConfig,
    ) -> Self {
        Self {
            registry,
            uploader,
            partitioner,
            config,
            thread_pool: OnceLock::new(),
        }
    }

    /// Fresh registry, host memory uploads and METIS partitioning
    pub fn in_memory(config: ImportConfig) -> Self {
        Self::new(
            Arc::new(AssetRegistry::new()),
            Arc::new(HostMemoryUploader::new()),
            Arc::new(MetisPartitioner::new()),
            config,
        )
    }

    /// Set the graph partitioner
    pub fn with_partitioner(mut self, partitioner: Arc<dyn GraphPartitioner>) -> Self {
        self.partitioner = partitioner;
        self
    }

    /// Thread pool built from `config.threads` on first use
    pub fn thread_pool(&self) -> Result<Arc<ThreadPool>> {
        if let Some(pool) = self.thread_pool.get() {
            return Ok(pool.clone());
        }
        let pool = Arc::new(self.config.threads.build_pool()?);
        Ok(self.thread_pool.get_or_init(|| pool).clone())
    }
}

impl fmt::Debug for ImportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportContext")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
