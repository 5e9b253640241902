//! Error types for worker wiring, routing, and execution.
//!
//! Errors fall into three tiers:
//!
//! - **Boot**: [`Error::DuplicateRole`], [`Error::ProviderNotFound`] and
//!   [`Error::DependencyCycle`] and [`Error::BootFailed`]. These are fatal; a node must not serve traffic
//!   with an incomplete worker graph.
//! - **Routing**: [`Error::WorkerNotFound`], [`Error::EmptyCandidates`],
//!   [`Error::MissingPartitionKey`] and the queue admission errors. They are
//!   surfaced synchronously to the caller and never retried here.
//! - **Execution**: [`Error::Invocation`], [`Error::Remote`] and
//!   [`Error::Timeout`], raised when a worker (local or remote) fails while
//!   handling a message.

use core::time::Duration;

/// Boxed error returned by [`Worker::on_work`](crate::Worker::on_work).
///
/// Worker bodies are free to fail with any error type; the dispatch layer wraps
/// it into [`Error::Invocation`] together with the role that produced it.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used across the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors the dispatch framework can produce.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A provider was already registered under this role name.
    #[error("duplicate role: a provider is already registered for `{role}`")]
    DuplicateRole { role: String },

    /// No provider is registered for a role that was looked up or declared as
    /// a dependency.
    #[error("provider not found for role `{role}`")]
    ProviderNotFound { role: String },

    /// The declared provider dependencies form a cycle.
    #[error("dependency cycle between roles: {roles:?}")]
    DependencyCycle { roles: Vec<String> },

    /// An earlier `start` failed while creating workers.
    #[error("worker registry failed to start: {reason}")]
    BootFailed { reason: String },

    /// No worker instance was ever registered for the role.
    #[error("worker not found for role `{role}`")]
    WorkerNotFound { role: String },

    /// The role name is registered with a different message or reply type.
    #[error("role `{role}` is registered with a different message type")]
    RoleTypeMismatch { role: String },

    /// A selector was asked to choose from an empty candidate list.
    #[error("no candidates to select from for role `{role}`")]
    EmptyCandidates { role: String },

    /// A message without a partition key was routed to a hash-selected role.
    #[error("message routed to hash-selected role `{role}` has no partition key")]
    MissingPartitionKey { role: String },

    /// The target queue is full and its policy rejects new messages.
    #[error("queue for role `{role}` is full")]
    QueueFull { role: String },

    /// The target queue's consumer has stopped.
    #[error("queue for role `{role}` is closed")]
    QueueClosed { role: String },

    /// The message was evicted from a drop-oldest queue before processing.
    #[error("message for role `{role}` was evicted before it was processed")]
    MessageDropped { role: String },

    /// The worker failed while handling the message.
    #[error("worker `{role}` failed: {source}")]
    Invocation {
        role: String,
        #[source]
        source: BoxError,
    },

    /// The remote peer could not be reached or reported a failure.
    #[error("remote dispatch to `{role}` failed: {reason}")]
    Remote { role: String, reason: String },

    /// The remote call exceeded the deadline attached to the reference.
    #[error("remote dispatch to `{role}` timed out after {timeout:?}")]
    Timeout { role: String, timeout: Duration },

    /// A payload could not be encoded or decoded for the wire.
    #[error("payload codec error for role `{role}`: {source}")]
    Codec {
        role: String,
        #[source]
        source: serde_json::Error,
    },

    /// The registry is shutting down and refuses new work.
    #[error("worker registry is shutting down")]
    ServiceShutdown,
}
