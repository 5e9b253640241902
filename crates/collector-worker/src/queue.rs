//! Bounded FIFO queues feeding queued workers.
//!
//! Every queued worker instance owns exactly one receiver. Producers only ever
//! enqueue. What happens when the queue is full is decided by the
//! [`QueuePolicy`] chosen at provider construction:
//!
//! - [`QueuePolicy::Block`] waits for space (persistence and allocation
//!   workers, where nothing may be lost).
//! - [`QueuePolicy::Reject`] fails the enqueue immediately.
//! - [`QueuePolicy::DropOldest`] evicts the oldest queued message and accepts
//!   the new one (best-effort metric channels).
//!
//! `Block` and `Reject` sit on a Tokio [`mpsc`] channel. `DropOldest` needs to
//! reach into the queue head, which `mpsc` does not allow, so it uses a small
//! ring guarded by a mutex and woken through a [`Notify`].

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Notify, mpsc};

/// Behavior of a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Wait until the consumer frees a slot.
    #[default]
    Block,
    /// Fail the enqueue with [`Error::QueueFull`](crate::Error::QueueFull).
    Reject,
    /// Evict the oldest queued message to make room.
    DropOldest,
}

/// Capacity and overflow policy of a worker queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    capacity: usize,
    policy: QueuePolicy,
}

impl QueueConfig {
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Creates a queue configuration. A capacity of zero is raised to one.
    pub const fn new(capacity: usize, policy: QueuePolicy) -> Self {
        Self {
            capacity: if capacity == 0 { 1 } else { capacity },
            policy,
        }
    }

    pub const fn block(capacity: usize) -> Self {
        Self::new(capacity, QueuePolicy::Block)
    }

    pub const fn reject(capacity: usize) -> Self {
        Self::new(capacity, QueuePolicy::Reject)
    }

    pub const fn drop_oldest(capacity: usize) -> Self {
        Self::new(capacity, QueuePolicy::DropOldest)
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub const fn policy(&self) -> QueuePolicy {
        self.policy
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::block(Self::DEFAULT_CAPACITY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendError {
    Full,
    Closed,
}

pub(crate) fn channel<T: Send>(config: QueueConfig) -> (QueueSender<T>, QueueReceiver<T>) {
    match config.policy {
        QueuePolicy::Block | QueuePolicy::Reject => {
            let (tx, rx) = mpsc::channel(config.capacity);
            (
                QueueSender::Bounded {
                    tx,
                    policy: config.policy,
                },
                QueueReceiver::Bounded(rx),
            )
        }
        QueuePolicy::DropOldest => {
            let ring = Arc::new(Ring {
                items: Mutex::new(VecDeque::with_capacity(config.capacity)),
                capacity: config.capacity,
                closed: AtomicBool::new(false),
                senders: AtomicUsize::new(1),
                notify: Notify::new(),
            });
            (
                QueueSender::Ring(RingSender(Arc::clone(&ring))),
                QueueReceiver::Ring(RingReceiver(ring)),
            )
        }
    }
}

pub(crate) enum QueueSender<T> {
    Bounded {
        tx: mpsc::Sender<T>,
        policy: QueuePolicy,
    },
    Ring(RingSender<T>),
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Bounded { tx, policy } => Self::Bounded {
                tx: tx.clone(),
                policy: *policy,
            },
            Self::Ring(ring) => Self::Ring(ring.clone()),
        }
    }
}

impl<T: Send> QueueSender<T> {
    /// Enqueues `item`, returning the message evicted to make room, if any.
    pub(crate) async fn send(&self, item: T) -> Result<Option<T>, SendError> {
        match self {
            Self::Bounded {
                tx,
                policy: QueuePolicy::Reject,
            } => match tx.try_send(item) {
                Ok(()) => Ok(None),
                Err(mpsc::error::TrySendError::Full(_)) => Err(SendError::Full),
                Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
            },
            Self::Bounded { tx, .. } => tx
                .send(item)
                .await
                .map(|()| None)
                .map_err(|_| SendError::Closed),
            Self::Ring(ring) => ring.push(item),
        }
    }
}

pub(crate) enum QueueReceiver<T> {
    Bounded(mpsc::Receiver<T>),
    Ring(RingReceiver<T>),
}

impl<T> QueueReceiver<T> {
    /// Waits for the next message. `None` once every sender is gone and the
    /// queue is drained.
    pub(crate) async fn recv(&mut self) -> Option<T> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Ring(ring) => ring.recv().await,
        }
    }
}

struct Ring<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    closed: AtomicBool,
    senders: AtomicUsize,
    notify: Notify,
}

pub(crate) struct RingSender<T>(Arc<Ring<T>>);

impl<T> RingSender<T> {
    fn push(&self, item: T) -> Result<Option<T>, SendError> {
        if self.0.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }

        let evicted = {
            let mut items = self.0.items.lock();
            let evicted = if items.len() >= self.0.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(item);
            evicted
        };

        // A stored permit covers a consumer that checked the ring just before
        // this push.
        self.0.notify.notify_one();
        Ok(evicted)
    }
}

impl<T> Clone for RingSender<T> {
    fn clone(&self) -> Self {
        self.0.senders.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(&self.0))
    }
}

impl<T> Drop for RingSender<T> {
    fn drop(&mut self) {
        if self.0.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.closed.store(true, Ordering::Release);
            self.0.notify.notify_one();
        }
    }
}

pub(crate) struct RingReceiver<T>(Arc<Ring<T>>);

impl<T> RingReceiver<T> {
    async fn recv(&mut self) -> Option<T> {
        loop {
            if let Some(item) = self.0.items.lock().pop_front() {
                return Some(item);
            }
            if self.0.closed.load(Ordering::Acquire) {
                return None;
            }
            self.0.notify.notified().await;
        }
    }
}

impl<T> Drop for RingReceiver<T> {
    fn drop(&mut self) {
        self.0.closed.store(true, Ordering::Release);
    }
}
