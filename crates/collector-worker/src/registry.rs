//! Process-wide worker registry.
//!
//! One [`WorkerRegistry`] is created at process boot and threaded through
//! every component that registers or looks up workers. It replaces ambient
//! global state with an explicit object whose lifecycle is visible:
//!
//! 1. **Register**: [`WorkerRegistry::register_provider`] records providers
//!    without constructing anything. A second provider for the same role name
//!    is rejected.
//! 2. **Start**: [`WorkerRegistry::start`] orders providers by their declared
//!    dependencies and creates leaves first, so every `pre_start` hook can
//!    look up the roles it depends on.
//! 3. **Serve**: [`WorkerRegistry::lookup`] hands out [`WorkerRefs`], and
//!    [`WorkerRegistry::dispatch_remote`] serves calls arriving from peers.
//! 4. **Shutdown**: [`WorkerRegistry::shutdown`] refuses new queued work and
//!    stops every consumer task.

use crate::{
    Error, Peer, Provider, Result, Role, RoleName, Selector, SelectorKind, WorkerRef, WorkerRefs,
    remote::RemoteHandler,
};
use bytes::Bytes;
use core::time::Duration;
use parking_lot::{Mutex, RwLock};
use serde::{Serialize, de::DeserializeOwned};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Address used to order local references when no address was configured.
pub const DEFAULT_LOCAL_ADDRESS: &str = "local";

#[derive(Default)]
struct ProviderTable {
    by_role: HashMap<RoleName, Arc<dyn Provider>>,
    order: Vec<RoleName>,
}

struct RoleSlot<M, R> {
    selector: Arc<Selector>,
    refs: Arc<[WorkerRef<M, R>]>,
}

enum BootState {
    Idle,
    Started,
    /// Creation failed partway; the reason is replayed to later `start` calls.
    Failed(String),
}

struct InProcessEntry {
    selector: Selector,
    handlers: Vec<Arc<dyn RemoteHandler>>,
}

/// Registry mapping role names to providers and worker references.
pub struct WorkerRegistry {
    local_address: String,
    providers: RwLock<ProviderTable>,
    roles: RwLock<HashMap<RoleName, Box<dyn Any + Send + Sync>>>,
    in_process: RwLock<HashMap<RoleName, InProcessEntry>>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    boot: Mutex<BootState>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::with_local_address(DEFAULT_LOCAL_ADDRESS)
    }

    /// Creates a registry for the node advertised as `address`.
    ///
    /// The address must match the one peers use for this node, since remote
    /// role candidates are ordered by address on every node.
    pub fn with_local_address(address: impl Into<String>) -> Self {
        Self {
            local_address: address.into(),
            providers: RwLock::new(ProviderTable::default()),
            roles: RwLock::new(HashMap::new()),
            in_process: RwLock::new(HashMap::new()),
            consumers: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            boot: Mutex::new(BootState::Idle),
        }
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Registers `provider` under its role name.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateRole`] if a provider already claimed the role. The
    /// first registration is kept.
    pub fn register_provider<P: Provider>(&self, provider: P) -> Result<()> {
        let role = provider.role_name();
        let mut table = self.providers.write();
        if table.by_role.contains_key(role) {
            return Err(Error::DuplicateRole {
                role: role.to_string(),
            });
        }
        table.by_role.insert(role, Arc::new(provider));
        table.order.push(role);
        tracing::trace!(role, "registered provider");
        Ok(())
    }

    /// Returns the provider registered for `role`.
    ///
    /// # Errors
    ///
    /// [`Error::ProviderNotFound`] if nothing was registered.
    pub fn find_provider(&self, role: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .read()
            .by_role
            .get(role)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound {
                role: role.to_string(),
            })
    }

    /// Creates every registered provider's workers in dependency order.
    ///
    /// Calling `start` again after a successful start is a no-op. A failed
    /// ordering (missing dependency, cycle) creates nothing and may be retried
    /// once the providers are fixed. A failure while creating workers is
    /// final: the registry shuts down what was already created and every
    /// later call reports [`Error::BootFailed`].
    ///
    /// # Errors
    ///
    /// - [`Error::ProviderNotFound`] for a dependency nobody provides.
    /// - [`Error::DependencyCycle`] when dependencies form a cycle.
    /// - Any error returned by a provider's `create`.
    /// - [`Error::BootFailed`] after an earlier `create` failure.
    pub fn start(&self) -> Result<()> {
        let mut boot = self.boot.lock();
        match &*boot {
            BootState::Started => {
                tracing::warn!("worker registry already started");
                return Ok(());
            }
            BootState::Failed(reason) => {
                return Err(Error::BootFailed {
                    reason: reason.clone(),
                });
            }
            BootState::Idle => {}
        }

        for provider in self.boot_order()? {
            if let Err(e) = provider.create(self) {
                tracing::error!(role = provider.role_name(), error = %e, "worker creation failed");
                self.shutdown.cancel();
                *boot = BootState::Failed(format!("`{}`: {e}", provider.role_name()));
                return Err(e);
            }
        }
        *boot = BootState::Started;

        tracing::info!(
            roles = self.roles.read().len(),
            remote_roles = self.in_process.read().len(),
            "worker registry started"
        );
        Ok(())
    }

    /// Topological order over `depends_on` edges, leaves first. Providers with
    /// no ordering constraint between them keep their registration order.
    fn boot_order(&self) -> Result<Vec<Arc<dyn Provider>>> {
        let table = self.providers.read();
        let mut pending: HashMap<RoleName, usize> = HashMap::with_capacity(table.order.len());
        let mut dependents: HashMap<RoleName, Vec<RoleName>> = HashMap::new();

        for role in &table.order {
            let provider = &table.by_role[role];
            pending.insert(*role, provider.depends_on().len());
            for dependency in provider.depends_on() {
                if !table.by_role.contains_key(dependency) {
                    return Err(Error::ProviderNotFound {
                        role: (*dependency).to_string(),
                    });
                }
                dependents.entry(*dependency).or_default().push(*role);
            }
        }

        let mut ready: VecDeque<RoleName> = table
            .order
            .iter()
            .filter(|role| pending[*role] == 0)
            .copied()
            .collect();
        let mut sorted = Vec::with_capacity(table.order.len());

        while let Some(role) = ready.pop_front() {
            sorted.push(Arc::clone(&table.by_role[role]));
            for dependent in dependents.get(role).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(*dependent);
                    }
                }
            }
        }

        if sorted.len() < table.order.len() {
            let roles = table
                .order
                .iter()
                .filter(|role| pending[*role] > 0)
                .map(|role| (*role).to_string())
                .collect();
            return Err(Error::DependencyCycle { roles });
        }

        Ok(sorted)
    }

    /// Appends `worker_ref` to the references of `role`.
    ///
    /// # Errors
    ///
    /// [`Error::RoleTypeMismatch`] if the role name was registered with other
    /// message or reply types.
    pub fn put<M, R>(&self, role: &Role<M, R>, worker_ref: WorkerRef<M, R>) -> Result<()>
    where
        M: crate::Message,
        R: Send + 'static,
    {
        let mut roles = self.roles.write();
        let slot = roles.entry(role.name()).or_insert_with(|| {
            let slot = RoleSlot::<M, R> {
                selector: Arc::new(Selector::new(role.selector())),
                refs: Arc::from(Vec::new()),
            };
            Box::new(slot) as Box<dyn Any + Send + Sync>
        });
        let slot = slot
            .downcast_mut::<RoleSlot<M, R>>()
            .ok_or_else(|| Error::RoleTypeMismatch {
                role: role.name().to_string(),
            })?;

        let mut refs = slot.refs.to_vec();
        refs.push(worker_ref);
        slot.refs = Arc::from(refs);
        Ok(())
    }

    /// Returns every reference registered under `role`, with its selector.
    ///
    /// # Errors
    ///
    /// - [`Error::WorkerNotFound`] if no reference was ever registered.
    /// - [`Error::RoleTypeMismatch`] if the role name carries other types.
    pub fn lookup<M, R>(&self, role: &Role<M, R>) -> Result<WorkerRefs<M, R>>
    where
        M: crate::Message,
        R: Send + 'static,
    {
        let roles = self.roles.read();
        let slot = roles.get(role.name()).ok_or_else(|| Error::WorkerNotFound {
            role: role.name().to_string(),
        })?;
        let slot = slot
            .downcast_ref::<RoleSlot<M, R>>()
            .ok_or_else(|| Error::RoleTypeMismatch {
                role: role.name().to_string(),
            })?;

        if slot.refs.is_empty() {
            return Err(Error::WorkerNotFound {
                role: role.name().to_string(),
            });
        }

        Ok(WorkerRefs::new(
            role.name(),
            Arc::clone(&slot.refs),
            Arc::clone(&slot.selector),
        ))
    }

    /// Adds one wire reference per peer to a remote role and orders all of the
    /// role's candidates by node address.
    ///
    /// The local references sort under [`WorkerRegistry::local_address`]. Every
    /// node must be connected to the same peer set for hash selection to agree
    /// across the cluster; the topology is assumed fixed once traffic flows.
    ///
    /// # Errors
    ///
    /// - [`Error::WorkerNotFound`] if the role has no local reference.
    /// - [`Error::RoleTypeMismatch`] if the role name carries other types.
    pub fn connect_peers<M, R>(
        &self,
        role: &Role<M, R>,
        peers: &[Peer],
        call_timeout: Option<Duration>,
    ) -> Result<()>
    where
        M: crate::Message + Serialize,
        R: DeserializeOwned + Send + 'static,
    {
        let mut roles = self.roles.write();
        let slot = roles
            .get_mut(role.name())
            .ok_or_else(|| Error::WorkerNotFound {
                role: role.name().to_string(),
            })?
            .downcast_mut::<RoleSlot<M, R>>()
            .ok_or_else(|| Error::RoleTypeMismatch {
                role: role.name().to_string(),
            })?;

        let mut refs = slot.refs.to_vec();
        refs.extend(
            peers
                .iter()
                .filter(|peer| peer.address() != self.local_address)
                .map(|peer| WorkerRef::wire(role.name(), peer.clone(), call_timeout)),
        );
        refs.sort_by(|a, b| {
            let a = a.peer_address().unwrap_or(&self.local_address);
            let b = b.peer_address().unwrap_or(&self.local_address);
            a.cmp(b)
        });

        tracing::info!(
            role = role.name(),
            candidates = refs.len(),
            "connected remote role to peers"
        );
        slot.refs = Arc::from(refs);
        Ok(())
    }

    pub(crate) fn expose(&self, role: RoleName, handler: Arc<dyn RemoteHandler>) {
        self.in_process
            .write()
            .entry(role)
            .or_insert_with(|| InProcessEntry {
                selector: Selector::new(SelectorKind::Rolling),
                handlers: Vec::new(),
            })
            .handlers
            .push(handler);
    }

    /// Names of the roles reachable from peers.
    pub fn remote_roles(&self) -> Vec<RoleName> {
        let mut roles: Vec<_> = self.in_process.read().keys().copied().collect();
        roles.sort_unstable();
        roles
    }

    /// Serves a call that arrived from a peer: resolves `role` among the
    /// remote-deployed workers of this process and hands it the payload.
    ///
    /// # Errors
    ///
    /// - [`Error::WorkerNotFound`] if no remote-deployed worker serves `role`.
    /// - Codec and invocation errors raised while handling the payload.
    pub async fn dispatch_remote(&self, role: &str, payload: Bytes) -> Result<Bytes> {
        let handler = {
            let in_process = self.in_process.read();
            let entry = in_process.get(role).ok_or_else(|| Error::WorkerNotFound {
                role: role.to_string(),
            })?;
            Arc::clone(entry.selector.select(role, &entry.handlers, None)?)
        };
        handler.handle(payload).await
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn track_consumer(&self, handle: JoinHandle<()>) {
        self.consumers.lock().push(handle);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops every queued worker.
    ///
    /// - Refuses new queued messages ([`Error::ServiceShutdown`]).
    /// - Cancels every consumer; each finishes the message it is running.
    /// - Waits up to `grace` per consumer for it to exit.
    pub async fn shutdown(&self, grace: Duration) {
        tracing::info!("shutting down worker registry");
        self.shutdown.cancel();

        let consumers = core::mem::take(&mut *self.consumers.lock());
        let count = consumers.len();
        let waits = consumers.into_iter().enumerate().map(|(i, handle)| async move {
            match timeout(grace, handle).await {
                Ok(Ok(())) => tracing::trace!("consumer {i} stopped"),
                Ok(Err(e)) => tracing::error!("consumer {i} panicked: {e}"),
                Err(_) => tracing::warn!("consumer {i} shutdown timed out"),
            }
        });
        futures::future::join_all(waits).await;

        tracing::info!(consumers = count, "worker registry shut down");
    }
}

impl core::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("local_address", &self.local_address)
            .field("providers", &self.providers.read().order)
            .field("remote_roles", &self.remote_roles())
            .finish()
    }
}
