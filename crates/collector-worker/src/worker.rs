use crate::{BoxError, Message, QueueConfig, Result, WorkerRegistry};

/// The unit of execution behind a role.
///
/// A worker handles one message at a time through [`Worker::on_work`]. How it
/// is driven depends on the [`Deployment`] its provider picks:
///
/// - [`Deployment::Sync`]: `on_work` runs on the caller's task.
/// - [`Deployment::Queued`]: messages go through a bounded FIFO queue drained
///   by a single consumer task, so one instance never runs two messages
///   concurrently.
/// - [`Deployment::Remote`]: the worker runs on the caller's task when called
///   in process, and is also reachable by role name from other nodes.
#[async_trait::async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Message accepted by the worker.
    type Message: Message;
    /// Reply produced for each message; `()` for fire-and-forget workers.
    type Output: Send + 'static;

    /// Boot hook run once after construction and before the worker is
    /// registered. Dependencies are resolved here, leaf roles having already
    /// been started by the registry.
    ///
    /// # Errors
    ///
    /// Any error aborts the registry boot.
    fn pre_start(&mut self, _registry: &WorkerRegistry) -> Result<()> {
        Ok(())
    }

    /// Handles a single message.
    async fn on_work(&self, message: Self::Message) -> core::result::Result<Self::Output, BoxError>;
}

/// How a provider deploys the workers it constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    /// Call-and-return on the caller's task.
    Sync,
    /// Bounded queue with one dedicated consumer task per instance.
    Queued(QueueConfig),
    /// In-process call, additionally exposed to peers by role name.
    Remote,
}
