//! Opaque handles used to send messages to workers.
//!
//! A [`WorkerRef`] hides where its worker lives. Callers use the same
//! [`tell`](WorkerRef::tell) / [`ask`](WorkerRef::ask) pair whether the target
//! runs on the caller's task, behind a local queue, or on another node. The
//! placement is decided when the reference is built and never changes.
//!
//! [`WorkerRefs`] groups every reference of one role together with the role's
//! selector and is what [`WorkerRegistry::lookup`](crate::WorkerRegistry::lookup)
//! returns.

use crate::{
    Error, Message, Peer, Result, RoleName, Selector, SelectorKind, Worker,
    consumer::Envelope,
    queue::{QueueSender, SendError},
    remote::{decode, encode},
};
use bytes::Bytes;
use core::time::Duration;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

type DynWorker<M, R> = Arc<dyn Worker<Message = M, Output = R>>;

/// Handle to one worker instance of a role.
pub struct WorkerRef<M, R = ()> {
    role: RoleName,
    target: Target<M, R>,
}

enum Target<M, R> {
    Sync(DynWorker<M, R>),
    Queued {
        queue: QueueSender<Envelope<M, R>>,
        shutdown: CancellationToken,
    },
    InProcess(DynWorker<M, R>),
    Wire(Wire<M, R>),
}

struct Wire<M, R> {
    peer: Peer,
    timeout: Option<Duration>,
    encode: fn(&M) -> serde_json::Result<Vec<u8>>,
    decode: fn(&[u8]) -> serde_json::Result<R>,
}

impl<M, R> WorkerRef<M, R>
where
    M: Message,
    R: Send + 'static,
{
    /// Reference that calls the worker directly on the caller's task.
    pub fn sync<W>(role: RoleName, worker: Arc<W>) -> Self
    where
        W: Worker<Message = M, Output = R>,
    {
        Self {
            role,
            target: Target::Sync(worker),
        }
    }

    /// Reference to a remote-deployed worker that happens to live in this
    /// process; calls skip the wire entirely.
    pub fn in_process<W>(role: RoleName, worker: Arc<W>) -> Self
    where
        W: Worker<Message = M, Output = R>,
    {
        Self {
            role,
            target: Target::InProcess(worker),
        }
    }

    /// Reference to `role` on another node.
    ///
    /// When `timeout` is set, every call through the reference fails with
    /// [`Error::Timeout`] once it elapses; otherwise calls wait for the peer
    /// indefinitely.
    pub fn wire(role: RoleName, peer: Peer, timeout: Option<Duration>) -> Self
    where
        M: Serialize,
        R: DeserializeOwned,
    {
        Self {
            role,
            target: Target::Wire(Wire {
                peer,
                timeout,
                encode: encode::<M>,
                decode: decode::<R>,
            }),
        }
    }

    pub(crate) fn queued(
        role: RoleName,
        queue: QueueSender<Envelope<M, R>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            role,
            target: Target::Queued { queue, shutdown },
        }
    }

    pub fn role(&self) -> RoleName {
        self.role
    }

    /// Address of the peer behind a wire reference; `None` for local ones.
    pub fn peer_address(&self) -> Option<&str> {
        match &self.target {
            Target::Wire(wire) => Some(wire.peer.address()),
            _ => None,
        }
    }

    /// Whether the target is reachable by role name from other nodes.
    pub fn is_remote(&self) -> bool {
        matches!(self.target, Target::InProcess(_) | Target::Wire(_))
    }

    /// Sends a message without waiting for a reply.
    ///
    /// - Sync / in-process: runs the worker and waits for it to finish.
    /// - Queued: returns once the message is enqueued; worker failures are
    ///   only logged by the consumer.
    /// - Wire: returns once the peer has accepted and handled the call.
    ///
    /// # Errors
    ///
    /// - [`Error::Invocation`] when a sync or in-process worker fails.
    /// - [`Error::QueueFull`] / [`Error::QueueClosed`] /
    ///   [`Error::ServiceShutdown`] on queue admission failures.
    /// - [`Error::Remote`], [`Error::Timeout`] or [`Error::Codec`] on wire
    ///   failures.
    pub async fn tell(&self, message: M) -> Result<()> {
        match &self.target {
            Target::Sync(worker) | Target::InProcess(worker) => {
                self.invoke(worker, message).await.map(drop)
            }
            Target::Queued { queue, shutdown } => {
                self.enqueue(
                    queue,
                    shutdown,
                    Envelope {
                        message,
                        reply: None,
                    },
                )
                .await
            }
            Target::Wire(wire) => {
                let payload = self.encode(wire, &message)?;
                self.call(wire, payload).await.map(drop)
            }
        }
    }

    /// Sends a message and waits for the worker's reply.
    ///
    /// # Errors
    ///
    /// Everything [`WorkerRef::tell`] reports, plus [`Error::MessageDropped`]
    /// when a drop-oldest queue evicted the message before it ran.
    pub async fn ask(&self, message: M) -> Result<R> {
        match &self.target {
            Target::Sync(worker) | Target::InProcess(worker) => self.invoke(worker, message).await,
            Target::Queued { queue, shutdown } => {
                let (reply, rx) = oneshot::channel();
                self.enqueue(
                    queue,
                    shutdown,
                    Envelope {
                        message,
                        reply: Some(reply),
                    },
                )
                .await?;
                rx.await.map_err(|_| Error::MessageDropped {
                    role: self.role.to_string(),
                })?
            }
            Target::Wire(wire) => {
                let payload = self.encode(wire, &message)?;
                let bytes = self.call(wire, payload).await?;
                (wire.decode)(&bytes).map_err(|source| Error::Codec {
                    role: self.role.to_string(),
                    source,
                })
            }
        }
    }

    async fn invoke(&self, worker: &DynWorker<M, R>, message: M) -> Result<R> {
        worker
            .on_work(message)
            .await
            .map_err(|source| Error::Invocation {
                role: self.role.to_string(),
                source,
            })
    }

    async fn enqueue(
        &self,
        queue: &QueueSender<Envelope<M, R>>,
        shutdown: &CancellationToken,
        envelope: Envelope<M, R>,
    ) -> Result<()> {
        if shutdown.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        match queue.send(envelope).await {
            Ok(None) => Ok(()),
            Ok(Some(_evicted)) => {
                tracing::debug!(role = self.role, "queue full, evicted oldest message");
                Ok(())
            }
            Err(SendError::Full) => Err(Error::QueueFull {
                role: self.role.to_string(),
            }),
            Err(SendError::Closed) => Err(Error::QueueClosed {
                role: self.role.to_string(),
            }),
        }
    }

    fn encode(&self, wire: &Wire<M, R>, message: &M) -> Result<Bytes> {
        (wire.encode)(message)
            .map(Bytes::from)
            .map_err(|source| Error::Codec {
                role: self.role.to_string(),
                source,
            })
    }

    async fn call(&self, wire: &Wire<M, R>, payload: Bytes) -> Result<Bytes> {
        let dispatch = wire.peer.channel().dispatch(self.role, payload);

        match wire.timeout {
            Some(timeout) => tokio::time::timeout(timeout, dispatch)
                .await
                .map_err(|_| Error::Timeout {
                    role: self.role.to_string(),
                    timeout,
                })?,
            None => dispatch.await,
        }
    }
}

impl<M, R> Clone for WorkerRef<M, R> {
    fn clone(&self) -> Self {
        let target = match &self.target {
            Target::Sync(worker) => Target::Sync(Arc::clone(worker)),
            Target::Queued { queue, shutdown } => Target::Queued {
                queue: queue.clone(),
                shutdown: shutdown.clone(),
            },
            Target::InProcess(worker) => Target::InProcess(Arc::clone(worker)),
            Target::Wire(wire) => Target::Wire(Wire {
                peer: wire.peer.clone(),
                timeout: wire.timeout,
                encode: wire.encode,
                decode: wire.decode,
            }),
        };
        Self {
            role: self.role,
            target,
        }
    }
}

impl<M, R> core::fmt::Debug for WorkerRef<M, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let placement = match &self.target {
            Target::Sync(_) => "sync",
            Target::Queued { .. } => "queued",
            Target::InProcess(_) => "in-process",
            Target::Wire(_) => "wire",
        };
        f.debug_struct("WorkerRef")
            .field("role", &self.role)
            .field("placement", &placement)
            .finish()
    }
}

/// All references registered under one role, plus the role's selector.
pub struct WorkerRefs<M, R = ()> {
    role: RoleName,
    refs: Arc<[WorkerRef<M, R>]>,
    selector: Arc<Selector>,
}

impl<M, R> WorkerRefs<M, R>
where
    M: Message,
    R: Send + 'static,
{
    pub(crate) fn new(role: RoleName, refs: Arc<[WorkerRef<M, R>]>, selector: Arc<Selector>) -> Self {
        Self {
            role,
            refs,
            selector,
        }
    }

    pub fn role(&self) -> RoleName {
        self.role
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerRef<M, R>> {
        self.refs.iter()
    }

    /// Picks the reference that should receive `message`.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyCandidates`] or [`Error::MissingPartitionKey`].
    pub fn select(&self, message: &M) -> Result<&WorkerRef<M, R>> {
        let key = match self.selector.kind() {
            SelectorKind::Rolling => None,
            SelectorKind::HashCode => message.partition_key(),
        };
        self.selector.select(self.role, &self.refs, key)
    }

    /// Selects a reference and [`tell`](WorkerRef::tell)s it.
    ///
    /// # Errors
    ///
    /// Selection errors and everything [`WorkerRef::tell`] reports.
    pub async fn tell(&self, message: M) -> Result<()> {
        self.select(&message)?.tell(message).await
    }

    /// Selects a reference and [`ask`](WorkerRef::ask)s it.
    ///
    /// # Errors
    ///
    /// Selection errors and everything [`WorkerRef::ask`] reports.
    pub async fn ask(&self, message: M) -> Result<R> {
        self.select(&message)?.ask(message).await
    }

    /// Fire-and-forget dispatch: selection and delivery errors are logged,
    /// never returned.
    pub async fn execute(&self, message: M) {
        if let Err(error) = self.tell(message).await {
            tracing::error!(role = self.role, %error, "dispatch failed");
        }
    }
}

impl<M, R> Clone for WorkerRefs<M, R> {
    fn clone(&self) -> Self {
        Self {
            role: self.role,
            refs: Arc::clone(&self.refs),
            selector: Arc::clone(&self.selector),
        }
    }
}

impl<M, R> core::fmt::Debug for WorkerRefs<M, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerRefs")
            .field("role", &self.role)
            .field("refs", &self.refs)
            .field("selector", &self.selector.kind())
            .finish()
    }
}
