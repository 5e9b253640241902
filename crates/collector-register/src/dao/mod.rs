//! Storage contracts used by the allocation workers.
//!
//! Only the contracts live here; the collector's storage layer supplies the
//! real backends. [`MemoryDao`] keeps everything in process and backs tests and
//! single-node deployments.

mod memory;

pub use memory::*;

use crate::{Application, Instance, Registrable, ServiceName, StorageError};
use std::sync::Arc;

/// Persistence of one allocated entity kind.
#[async_trait::async_trait]
pub trait RegisterDao<E: Registrable>: Send + Sync + 'static {
    /// Identifier stored for `key`, or `0` when absent.
    async fn find_id(&self, key: &E::Key) -> Result<i32, StorageError>;

    /// Smallest and largest stored identifiers; `(0, 0)` for an empty store.
    async fn min_max(&self) -> Result<(i32, i32), StorageError>;

    /// Stores a new record.
    ///
    /// # Errors
    ///
    /// - [`StorageError::KeyExists`] if the natural key is already stored.
    /// - [`StorageError::IdConflict`] if the identifier is already taken.
    async fn insert(&self, entity: &E) -> Result<(), StorageError>;

    /// Stores `entity` under its identifier, replacing whatever was there.
    async fn upsert(&self, entity: &E) -> Result<(), StorageError>;

    async fn get(&self, id: i32) -> Result<Option<E>, StorageError>;
}

/// Instance-specific updates beyond allocation.
#[async_trait::async_trait]
pub trait InstanceDao: Send + Sync + 'static {
    /// # Errors
    ///
    /// [`StorageError::NotFound`] for an unknown instance.
    async fn heartbeat(&self, instance_id: i32, heartbeat_time: i64) -> Result<(), StorageError>;
}

/// Every DAO the register services need.
#[derive(Clone)]
pub struct Storage {
    pub applications: Arc<dyn RegisterDao<Application>>,
    pub instances: Arc<dyn RegisterDao<Instance>>,
    pub heartbeats: Arc<dyn InstanceDao>,
    pub service_names: Arc<dyn RegisterDao<ServiceName>>,
}

impl Storage {
    /// In-memory storage shared by everything holding a clone.
    pub fn memory() -> Self {
        let instances = Arc::new(MemoryDao::<Instance>::new());
        Self {
            applications: Arc::new(MemoryDao::<Application>::new()),
            instances: Arc::clone(&instances) as Arc<dyn RegisterDao<Instance>>,
            heartbeats: instances,
            service_names: Arc::new(MemoryDao::<ServiceName>::new()),
        }
    }
}

impl core::fmt::Debug for Storage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}
