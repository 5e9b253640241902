//! Worker factories.
//!
//! A [`Provider`] is registered with the [`WorkerRegistry`] during the first
//! boot phase and asked to [`create`](Provider::create) its workers during the
//! second, after every role it [`depends_on`](Provider::depends_on) has been
//! created. [`WorkerProvider`] is the provider used for every worker type; it
//! is configured with a builder and picks the deployment, the number of
//! instances and the queue of each instance.

use crate::{
    Deployment, QueueConfig, Result, Role, RoleName, Worker, WorkerRef, WorkerRegistry,
    consumer::worker_loop, queue, remote::expose_worker,
};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;

/// Type-erased provider record stored by the registry.
pub trait Provider: Send + Sync + 'static {
    /// Role served by the workers this provider creates.
    fn role_name(&self) -> RoleName;

    /// Roles that must be created before this one.
    fn depends_on(&self) -> &[RoleName] {
        &[]
    }

    /// Constructs every worker instance, runs its `pre_start` hook, and puts
    /// the resulting references into `registry`.
    ///
    /// # Errors
    ///
    /// Fails if a `pre_start` hook fails or the registry rejects a reference.
    fn create(&self, registry: &WorkerRegistry) -> Result<()>;
}

type ExposeFn<W> = fn(&WorkerRegistry, RoleName, Arc<W>);

/// Provider constructing workers of type `W`.
///
/// # Example
///
/// ```
/// use collector_worker::{BoxError, QueueConfig, Role, SelectorKind, Worker, WorkerProvider};
///
/// const PERSIST: Role<String> = Role::new("PersistenceWorker", SelectorKind::Rolling);
///
/// struct Persist;
///
/// #[async_trait::async_trait]
/// impl Worker for Persist {
///     type Message = String;
///     type Output = ();
///
///     async fn on_work(&self, _message: String) -> Result<(), BoxError> {
///         Ok(())
///     }
/// }
///
/// let provider = WorkerProvider::new(PERSIST, || Persist)
///     .queued(QueueConfig::block(256))
///     .instances(2);
/// assert_eq!(provider.role().name(), "PersistenceWorker");
/// ```
pub struct WorkerProvider<W: Worker> {
    role: Role<W::Message, W::Output>,
    deployment: Deployment,
    instances: usize,
    depends_on: Vec<RoleName>,
    factory: Box<dyn Fn() -> W + Send + Sync>,
    expose: Option<ExposeFn<W>>,
}

impl<W: Worker> WorkerProvider<W> {
    /// Creates a provider deploying one synchronous instance built by
    /// `factory`.
    pub fn new<F>(role: Role<W::Message, W::Output>, factory: F) -> Self
    where
        F: Fn() -> W + Send + Sync + 'static,
    {
        Self {
            role,
            deployment: Deployment::Sync,
            instances: 1,
            depends_on: Vec::new(),
            factory: Box::new(factory),
            expose: None,
        }
    }

    /// Deploys each instance behind its own bounded queue and consumer task.
    pub fn queued(mut self, config: QueueConfig) -> Self {
        self.deployment = Deployment::Queued(config);
        self
    }

    /// Deploys the worker as remote-capable: called in process locally and
    /// reachable by role name from peers.
    pub fn remote(mut self) -> Self
    where
        W::Message: DeserializeOwned,
        W::Output: Serialize,
    {
        self.deployment = Deployment::Remote;
        self.expose = Some(expose_worker::<W>);
        self
    }

    /// Number of instances to create. Zero is raised to one.
    pub fn instances(mut self, instances: usize) -> Self {
        self.instances = instances.max(1);
        self
    }

    /// Declares that `role` must be created before this provider's workers.
    pub fn with_dependency(mut self, role: RoleName) -> Self {
        if !self.depends_on.contains(&role) {
            self.depends_on.push(role);
        }
        self
    }

    pub fn role(&self) -> &Role<W::Message, W::Output> {
        &self.role
    }

    pub fn deployment(&self) -> Deployment {
        self.deployment
    }

    fn build_ref(&self, registry: &WorkerRegistry, instance: usize) -> Result<WorkerRef<W::Message, W::Output>> {
        let name = self.role.name();
        let mut worker = (self.factory)();
        worker.pre_start(registry)?;
        let worker = Arc::new(worker);

        let worker_ref = match self.deployment {
            Deployment::Sync => WorkerRef::sync(name, worker),
            Deployment::Queued(config) => {
                let (tx, rx) = queue::channel(config);
                let shutdown = registry.shutdown_token();
                registry.track_consumer(tokio::spawn(worker_loop(
                    name,
                    instance,
                    worker,
                    rx,
                    shutdown.clone(),
                )));
                WorkerRef::queued(name, tx, shutdown)
            }
            Deployment::Remote => {
                if let Some(expose) = self.expose {
                    expose(registry, name, Arc::clone(&worker));
                }
                WorkerRef::in_process(name, worker)
            }
        };

        Ok(worker_ref)
    }
}

impl<W: Worker> Provider for WorkerProvider<W> {
    fn role_name(&self) -> RoleName {
        self.role.name()
    }

    fn depends_on(&self) -> &[RoleName] {
        &self.depends_on
    }

    /// # Panics
    ///
    /// Queued deployments spawn their consumers with [`tokio::spawn`] and must
    /// be created from within a Tokio runtime.
    fn create(&self, registry: &WorkerRegistry) -> Result<()> {
        for instance in 0..self.instances {
            let worker_ref = self.build_ref(registry, instance)?;
            registry.put(&self.role, worker_ref)?;
        }

        tracing::debug!(
            role = self.role.name(),
            instances = self.instances,
            deployment = ?self.deployment,
            "created workers"
        );
        Ok(())
    }
}
