//! Cross-node dispatch.
//!
//! The only message that ever crosses a node boundary is
//! `{target role name, opaque payload}`. The sending side encodes the role's
//! message with [`encode`]; the receiving node resolves the role name in its
//! own registry (see [`WorkerRegistry::dispatch_remote`]) and hands the
//! decoded message to the local worker. Payloads are JSON, which keeps the
//! dispatch core independent of every role-specific schema.
//!
//! The transport itself is pluggable through [`RemoteChannel`]. The gRPC
//! server crate provides the networked implementation; [`LoopbackChannel`]
//! connects registries living in the same process, which is how multi-node
//! behavior is exercised in tests.

use crate::{Error, Result, RoleName, Worker, WorkerRegistry};
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::{Arc, Weak};

/// Transport used by wire references to reach a worker on another node.
#[async_trait::async_trait]
pub trait RemoteChannel: Send + Sync + 'static {
    /// Delivers `payload` to `role` on the peer and returns the encoded reply.
    ///
    /// # Errors
    ///
    /// Transport failures and remote execution failures are both reported as
    /// [`Error::Remote`] (or a more specific variant when the peer supplies
    /// one).
    async fn dispatch(&self, role: &str, payload: Bytes) -> Result<Bytes>;
}

/// A node reachable over a [`RemoteChannel`].
///
/// The address doubles as the ordering key of the node's references: every
/// node sorts the candidates of a remote role by address, so a hash selector
/// resolves a given key to the same node everywhere.
#[derive(Clone)]
pub struct Peer {
    address: String,
    channel: Arc<dyn RemoteChannel>,
}

impl Peer {
    pub fn new(address: impl Into<String>, channel: Arc<dyn RemoteChannel>) -> Self {
        Self {
            address: address.into(),
            channel,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn channel(&self) -> &Arc<dyn RemoteChannel> {
        &self.channel
    }
}

impl core::fmt::Debug for Peer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Peer").field("address", &self.address).finish()
    }
}

/// Encodes a message or reply for the wire.
///
/// # Errors
///
/// Propagates `serde_json` serialization failures.
pub fn encode<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

/// Decodes a message or reply received from the wire.
///
/// # Errors
///
/// Propagates `serde_json` deserialization failures.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> serde_json::Result<T> {
    serde_json::from_slice(bytes)
}

/// Type-erased receiving end of a remote-deployed worker.
#[async_trait::async_trait]
pub(crate) trait RemoteHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Bytes) -> Result<Bytes>;
}

pub(crate) struct WorkerHandler<W> {
    role: RoleName,
    worker: Arc<W>,
}

#[async_trait::async_trait]
impl<W> RemoteHandler for WorkerHandler<W>
where
    W: Worker,
    W::Message: DeserializeOwned,
    W::Output: Serialize,
{
    async fn handle(&self, payload: Bytes) -> Result<Bytes> {
        let message: W::Message = decode(&payload).map_err(|source| Error::Codec {
            role: self.role.to_string(),
            source,
        })?;
        let output = self
            .worker
            .on_work(message)
            .await
            .map_err(|source| Error::Invocation {
                role: self.role.to_string(),
                source,
            })?;
        let reply = encode(&output).map_err(|source| Error::Codec {
            role: self.role.to_string(),
            source,
        })?;
        Ok(Bytes::from(reply))
    }
}

/// Records a remote-deployed worker in the registry's in-process index.
///
/// Monomorphized per worker type by
/// [`WorkerProvider::remote`](crate::WorkerProvider::remote), which is the
/// only place the serde bounds are known to hold.
pub(crate) fn expose_worker<W>(registry: &WorkerRegistry, role: RoleName, worker: Arc<W>)
where
    W: Worker,
    W::Message: DeserializeOwned,
    W::Output: Serialize,
{
    registry.expose(role, Arc::new(WorkerHandler { role, worker }));
}

/// In-process [`RemoteChannel`] that dispatches straight into another
/// registry.
///
/// Holds a weak reference so that two registries pointing at each other do not
/// keep each other alive.
pub struct LoopbackChannel {
    registry: Weak<WorkerRegistry>,
}

impl LoopbackChannel {
    pub fn new(registry: &Arc<WorkerRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }
}

#[async_trait::async_trait]
impl RemoteChannel for LoopbackChannel {
    async fn dispatch(&self, role: &str, payload: Bytes) -> Result<Bytes> {
        let registry = self.registry.upgrade().ok_or_else(|| Error::Remote {
            role: role.to_string(),
            reason: "peer registry has been dropped".to_string(),
        })?;
        registry.dispatch_remote(role, payload).await
    }
}
