//! Capture storage: persists observed requests and responses for later inspection

pub mod disk;
pub mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

use crate::config::settings::{StorageBackend, StorageSettings};
use crate::error::{Error, Result};
use crate::models::{CapturedExchange, CapturedRequest, CapturedResponse};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Capture storage backend trait.
///
/// Shared by every connection task of a server instance, so implementations
/// synchronize internally. `cleanup` releases the storage; it is called once
/// by the owning server during shutdown.
pub trait CaptureStorage: Send + Sync {
    fn save_request(&self, request: &CapturedRequest) -> Result<()>;
    fn save_response(&self, request_id: &str, response: &CapturedResponse) -> Result<()>;
    /// Captured exchanges in capture order
    fn requests(&self) -> Result<Vec<CapturedExchange>>;
    fn clear(&self) -> Result<()>;
    fn cleanup(&self) -> Result<()>;
    fn storage_info(&self) -> String;
}

/// Creates one capture storage per server instance
pub trait StorageFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn CaptureStorage>>;
}

impl<F> StorageFactory for F
where
    F: Fn() -> Result<Arc<dyn CaptureStorage>> + Send + Sync,
{
    fn create(&self) -> Result<Arc<dyn CaptureStorage>> {
        self()
    }
}

/// Creates a [`DiskStorage`] under `base_dir`, or the system temp dir
#[derive(Debug, Clone, Default)]
pub struct DiskStorageFactory {
    base_dir: Option<PathBuf>,
}

impl DiskStorageFactory {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self { base_dir }
    }
}

impl StorageFactory for DiskStorageFactory {
    fn create(&self) -> Result<Arc<dyn CaptureStorage>> {
        let storage = DiskStorage::new(self.base_dir.as_deref()).map_err(|e| {
            Error::ResourceAcquisition(format!("failed to create capture directory: {}", e))
        })?;
        Ok(Arc::new(storage))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStorageFactory;

impl StorageFactory for MemoryStorageFactory {
    fn create(&self) -> Result<Arc<dyn CaptureStorage>> {
        Ok(Arc::new(MemoryStorage::new()))
    }
}

/// Pick the storage factory named by the settings
pub fn factory_from_settings(settings: &StorageSettings) -> Box<dyn StorageFactory> {
    match settings.backend {
        StorageBackend::Disk => {
            info!("Using disk capture storage");
            Box::new(DiskStorageFactory::new(settings.base_dir.clone()))
        }
        StorageBackend::Memory => {
            info!("Using in-memory capture storage");
            Box::new(MemoryStorageFactory)
        }
    }
}
