//! Allocation workers.
//!
//! Every entity kind gets two roles:
//!
//! - a **remote** role, hash selected on the natural key across the cluster,
//!   which only forwards to the serial role of the node it landed on;
//! - a **serial** role, queued and hash selected, which performs the
//!   allocation. A given key always reaches the same serial instance, so
//!   allocations for one key never race each other.
//!
//! Distinct keys can still be allocated concurrently by different serial
//! instances or nodes; storage rejects duplicated identifiers and the loser
//! rescans and retries.

use crate::{IdCache, RegisterConfig, RegisterDao, RegisterError, Registrable, Result, StorageError};
use collector_worker::{BoxError, Worker, WorkerProvider, WorkerRefs, WorkerRegistry};
use std::sync::Arc;

/// Rescans allowed when concurrent writers keep taking the chosen identifier.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 16;

/// Queued worker assigning identifiers for one entity kind.
pub struct RegisterSerialWorker<E: Registrable> {
    cache: Arc<IdCache<E::Key>>,
    dao: Arc<dyn RegisterDao<E>>,
}

impl<E: Registrable> RegisterSerialWorker<E> {
    pub fn new(cache: Arc<IdCache<E::Key>>, dao: Arc<dyn RegisterDao<E>>) -> Self {
        Self { cache, dao }
    }

    /// Provider deploying `config.serial_instances` queued instances sharing
    /// `cache` and `dao`.
    pub fn provider(
        cache: Arc<IdCache<E::Key>>,
        dao: Arc<dyn RegisterDao<E>>,
        config: &RegisterConfig,
    ) -> WorkerProvider<Self> {
        WorkerProvider::new(E::SERIAL_ROLE, move || {
            Self::new(Arc::clone(&cache), Arc::clone(&dao))
        })
        .queued(config.queue)
        .instances(config.serial_instances)
    }

    /// Returns the identifier of `entity`'s key, allocating and storing one
    /// if needed.
    ///
    /// # Errors
    ///
    /// - [`RegisterError::Storage`] for backend failures. Nothing is cached.
    /// - [`RegisterError::IdSpaceExhausted`] when no identifier is left.
    /// - [`RegisterError::Contended`] after [`MAX_ALLOCATION_ATTEMPTS`]
    ///   identifier conflicts in a row.
    pub async fn allocate(&self, mut entity: E) -> Result<i32> {
        let key = entity.key();
        if let Some(id) = self.cache.get(&key) {
            return Ok(id);
        }

        let stored = self.dao.find_id(&key).await?;
        if stored != 0 {
            self.cache.put(key, stored);
            return Ok(stored);
        }

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let id = match self.dao.min_max().await? {
                (0, 0) => {
                    self.write_reserved().await?;
                    E::FIRST_ID
                }
                (min, max) => E::next_id(min, max)?,
            };

            entity.set_id(id);
            match self.dao.insert(&entity).await {
                Ok(()) => {
                    tracing::info!(kind = E::KIND, key = ?key, id, "allocated identifier");
                    self.cache.put(key, id);
                    return Ok(id);
                }
                Err(StorageError::KeyExists { id, .. }) => {
                    self.cache.put(key, id);
                    return Ok(id);
                }
                Err(StorageError::IdConflict { id, .. }) => {
                    tracing::debug!(kind = E::KIND, id, "identifier taken concurrently, rescanning");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RegisterError::Contended {
            kind: E::KIND,
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }

    async fn write_reserved(&self) -> Result<()> {
        let Some(reserved) = E::reserved() else {
            return Ok(());
        };
        match self.dao.insert(&reserved).await {
            Ok(()) => {
                tracing::info!(kind = E::KIND, id = reserved.id(), "wrote reserved record");
                Ok(())
            }
            Err(StorageError::KeyExists { .. } | StorageError::IdConflict { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl<E: Registrable> Worker for RegisterSerialWorker<E> {
    type Message = E;
    type Output = i32;

    async fn on_work(&self, entity: E) -> core::result::Result<i32, BoxError> {
        let key = entity.key();
        self.allocate(entity).await.map_err(|error| {
            tracing::warn!(kind = E::KIND, key = ?key, %error, "identifier allocation failed");
            error.into()
        })
    }
}

/// Cluster-facing worker forwarding to the local serial role.
///
/// Kinds registered inline wait for the serial worker and return the
/// identifier. The others enqueue and return `0`; callers re-poll.
pub struct RegisterRemoteWorker<E: Registrable> {
    serial: Option<WorkerRefs<E, i32>>,
}

impl<E: Registrable> RegisterRemoteWorker<E> {
    pub fn provider() -> WorkerProvider<Self> {
        WorkerProvider::new(E::REMOTE_ROLE, || Self { serial: None })
            .remote()
            .with_dependency(E::SERIAL_ROLE.name())
    }
}

#[async_trait::async_trait]
impl<E: Registrable> Worker for RegisterRemoteWorker<E> {
    type Message = E;
    type Output = i32;

    fn pre_start(&mut self, registry: &WorkerRegistry) -> collector_worker::Result<()> {
        self.serial = Some(registry.lookup(&E::SERIAL_ROLE)?);
        Ok(())
    }

    async fn on_work(&self, entity: E) -> core::result::Result<i32, BoxError> {
        let serial = self
            .serial
            .as_ref()
            .ok_or("serial register role not resolved")?;

        if E::INLINE {
            Ok(serial.ask(entity).await?)
        } else {
            serial.tell(entity).await?;
            Ok(0)
        }
    }
}
