//! Get-or-create entry points used by the receivers.
//!
//! Every lookup first consults the process-local [`IdCache`], then storage.
//! Only a miss on both dispatches the record to the cluster through the
//! kind's remote register role, so steady-state traffic never leaves the
//! process.

use crate::{
    Application, IdCache, Instance, InstanceDao, OsInfo, RegisterConfig, RegisterDao,
    RegisterError, RegisterRemoteWorker, RegisterSerialWorker, Registrable, Result, RetryPolicy,
    ServiceName, Storage,
};
use collector_worker::{Peer, WorkerRegistry};
use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}

/// Get-or-create protocol shared by every entity kind.
pub struct RegisterService<E: Registrable> {
    registry: Arc<WorkerRegistry>,
    cache: Arc<IdCache<E::Key>>,
    dao: Arc<dyn RegisterDao<E>>,
    retry: RetryPolicy,
    dispatched: AtomicU64,
}

impl<E: Registrable> RegisterService<E> {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        cache: Arc<IdCache<E::Key>>,
        dao: Arc<dyn RegisterDao<E>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            cache,
            dao,
            retry,
            dispatched: AtomicU64::new(0),
        }
    }

    /// Returns the identifier of `entity`'s key.
    ///
    /// `0` means the allocation was dispatched but is not known yet; only
    /// kinds that are not registered inline ever return it.
    ///
    /// # Errors
    ///
    /// - [`RegisterError::Storage`] when the read-through lookup fails.
    /// - [`RegisterError::Dispatch`] when the remote role cannot be reached,
    ///   or, for inline kinds, when the allocation itself fails.
    pub async fn get_or_create(&self, entity: E) -> Result<i32> {
        let key = entity.key();
        if let Some(id) = self.cache.get(&key) {
            return Ok(id);
        }

        let stored = self.dao.find_id(&key).await?;
        if stored != 0 {
            self.cache.put(key, stored);
            return Ok(stored);
        }

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let remote = self.registry.lookup(&E::REMOTE_ROLE)?;
        if E::INLINE {
            let id = remote.ask(entity).await?;
            self.cache.put(key, id);
            Ok(id)
        } else {
            remote.execute(entity).await;
            Ok(0)
        }
    }

    /// Polls [`RegisterService::get_or_create`] until the identifier is
    /// assigned.
    ///
    /// # Errors
    ///
    /// [`RegisterError::NotAssigned`] once the retry policy is exhausted, or
    /// the first error returned by `get_or_create`.
    pub async fn resolve(&self, entity: E) -> Result<i32> {
        let attempts = self.retry.attempts();
        for attempt in 1..=attempts {
            let id = self.get_or_create(entity.clone()).await?;
            if id != 0 {
                return Ok(id);
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry.interval()).await;
            }
        }

        Err(RegisterError::NotAssigned {
            kind: E::KIND,
            attempts,
        })
    }

    /// Number of lookups that missed cache and storage and went to the
    /// cluster.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn cached(&self, key: &E::Key) -> Option<i32> {
        self.cache.get(key)
    }

    /// Appends one wire reference per peer to the kind's remote role.
    ///
    /// # Errors
    ///
    /// [`RegisterError::Dispatch`] if the remote role was never started.
    pub fn connect_peers(&self, peers: &[Peer], timeout: Option<Duration>) -> Result<()> {
        self.registry.connect_peers(&E::REMOTE_ROLE, peers, timeout)?;
        Ok(())
    }

    fn reassign(&self, key: E::Key, id: i32) {
        self.cache.reassign(key, id);
    }
}

/// Application code to identifier.
pub struct ApplicationIdService {
    inner: RegisterService<Application>,
}

impl ApplicationIdService {
    /// Returns the identifier of `application_code`, or `0` while it is being
    /// allocated.
    ///
    /// # Errors
    ///
    /// See [`RegisterService::get_or_create`].
    pub async fn get_or_create_application_id(&self, application_code: &str) -> Result<i32> {
        self.inner
            .get_or_create(Application::new(application_code, now_millis()))
            .await
    }

    /// Waits until `application_code` has an identifier.
    ///
    /// # Errors
    ///
    /// See [`RegisterService::resolve`].
    pub async fn resolve_application_id(&self, application_code: &str) -> Result<i32> {
        self.inner
            .resolve(Application::new(application_code, now_millis()))
            .await
    }

    pub fn service(&self) -> &RegisterService<Application> {
        &self.inner
    }
}

/// Agent instance to identifier, plus instance liveness updates.
pub struct InstanceIdService {
    inner: RegisterService<Instance>,
    instances: Arc<dyn RegisterDao<Instance>>,
    heartbeats: Arc<dyn InstanceDao>,
}

impl InstanceIdService {
    /// Returns the identifier of the `(application_id, agent_uuid)` instance,
    /// allocating it if needed. Never returns `0` on success.
    ///
    /// # Errors
    ///
    /// - [`RegisterError::OsInfo`] if `os_info` cannot be encoded.
    /// - See [`RegisterService::get_or_create`].
    pub async fn get_or_create_instance_id(
        &self,
        application_id: i32,
        agent_uuid: &str,
        register_time: i64,
        os_info: &OsInfo,
    ) -> Result<i32> {
        let instance = Instance::new(application_id, agent_uuid, register_time, os_info.to_json()?);
        self.inner.get_or_create(instance).await
    }

    /// Writes an identifier held by an agent back into storage and cache,
    /// e.g. after the backing store was wiped.
    ///
    /// # Errors
    ///
    /// [`RegisterError::OsInfo`] or [`RegisterError::Storage`].
    pub async fn recover(
        &self,
        instance_id: i32,
        application_id: i32,
        agent_uuid: &str,
        register_time: i64,
        os_info: &OsInfo,
    ) -> Result<()> {
        let mut instance =
            Instance::new(application_id, agent_uuid, register_time, os_info.to_json()?);
        instance.instance_id = instance_id;
        instance.heartbeat_time = now_millis();

        self.instances.upsert(&instance).await?;
        self.inner.reassign(instance.key(), instance_id);
        tracing::info!(instance_id, application_id, agent_uuid, "recovered instance");
        Ok(())
    }

    /// # Errors
    ///
    /// [`RegisterError::Storage`] with [`StorageError::NotFound`](crate::StorageError::NotFound)
    /// for unknown instances.
    pub async fn heartbeat(&self, instance_id: i32, heartbeat_time: i64) -> Result<()> {
        self.heartbeats.heartbeat(instance_id, heartbeat_time).await?;
        Ok(())
    }

    pub fn service(&self) -> &RegisterService<Instance> {
        &self.inner
    }
}

/// `(application_id, service name)` to identifier.
pub struct ServiceNameService {
    inner: RegisterService<ServiceName>,
}

impl ServiceNameService {
    /// Returns the identifier of the service name, or `0` while it is being
    /// allocated.
    ///
    /// # Errors
    ///
    /// See [`RegisterService::get_or_create`].
    pub async fn get_or_create_service_id(&self, application_id: i32, service_name: &str) -> Result<i32> {
        self.inner
            .get_or_create(ServiceName::new(application_id, service_name, now_millis()))
            .await
    }

    /// Waits until the service name has an identifier.
    ///
    /// # Errors
    ///
    /// See [`RegisterService::resolve`].
    pub async fn resolve_service_id(&self, application_id: i32, service_name: &str) -> Result<i32> {
        self.inner
            .resolve(ServiceName::new(application_id, service_name, now_millis()))
            .await
    }

    pub fn service(&self) -> &RegisterService<ServiceName> {
        &self.inner
    }
}

/// The three register services of a node.
pub struct RegisterServices {
    pub applications: ApplicationIdService,
    pub instances: InstanceIdService,
    pub service_names: ServiceNameService,
}

impl RegisterServices {
    /// Registers the six register providers with `registry` and builds the
    /// services on top of it.
    ///
    /// Only providers are registered; the caller starts the registry once
    /// every other component has registered its own.
    ///
    /// # Errors
    ///
    /// [`RegisterError::Dispatch`] if one of the register roles was already
    /// claimed.
    pub fn install(
        registry: &Arc<WorkerRegistry>,
        storage: &Storage,
        config: &RegisterConfig,
    ) -> Result<Self> {
        let applications = install_kind(registry, &storage.applications, config)?;
        let instances = install_kind(registry, &storage.instances, config)?;
        let service_names = install_kind(registry, &storage.service_names, config)?;

        Ok(Self {
            applications: ApplicationIdService {
                inner: applications,
            },
            instances: InstanceIdService {
                inner: instances,
                instances: Arc::clone(&storage.instances),
                heartbeats: Arc::clone(&storage.heartbeats),
            },
            service_names: ServiceNameService {
                inner: service_names,
            },
        })
    }

    /// Connects the three remote register roles to `peers`.
    ///
    /// `peers` may include the local node; it is recognized by address and
    /// served in process.
    ///
    /// # Errors
    ///
    /// [`RegisterError::Dispatch`] if the registry was not started.
    pub fn connect_peers(&self, peers: &[Peer], timeout: Option<Duration>) -> Result<()> {
        self.applications.inner.connect_peers(peers, timeout)?;
        self.instances.inner.connect_peers(peers, timeout)?;
        self.service_names.inner.connect_peers(peers, timeout)?;
        Ok(())
    }
}

fn install_kind<E: Registrable>(
    registry: &Arc<WorkerRegistry>,
    dao: &Arc<dyn RegisterDao<E>>,
    config: &RegisterConfig,
) -> Result<RegisterService<E>> {
    let cache = Arc::new(IdCache::new());
    registry.register_provider(RegisterSerialWorker::<E>::provider(
        Arc::clone(&cache),
        Arc::clone(dao),
        config,
    ))?;
    registry.register_provider(RegisterRemoteWorker::<E>::provider())?;

    Ok(RegisterService::new(
        Arc::clone(registry),
        cache,
        Arc::clone(dao),
        config.retry,
    ))
}
