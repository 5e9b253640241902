//! Error type shared by the gRPC services of a collector node.
//!
//! [`Error`] wraps the worker and register errors and adds the request-level
//! cases. `From<Error> for tonic::Status` picks the status code callers should
//! react to:
//!
//! - `invalid_argument`: malformed requests and undecodable payloads.
//! - `not_found`: unknown roles or records.
//! - `unavailable`: shutdown, closed queues, unreachable peers, identifiers
//!   still being allocated. Callers may retry.
//! - `resource_exhausted`: full queues, exhausted identifier space.
//! - `deadline_exceeded`: remote calls that timed out.
//! - `internal`: everything else, including failed worker invocations.

use collector_register::{RegisterError, StorageError};
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Worker(#[from] collector_worker::Error),

    #[error(transparent)]
    Register(#[from] RegisterError),

    /// The client request was malformed.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The node is shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Worker(e) => worker_status(e),
            Error::Register(e) => register_status(e),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

fn worker_status(err: collector_worker::Error) -> Status {
    use collector_worker::Error as E;

    let message = err.to_string();
    match err {
        E::WorkerNotFound { .. } | E::ProviderNotFound { .. } => Status::not_found(message),
        E::Codec { .. } | E::MissingPartitionKey { .. } => Status::invalid_argument(message),
        E::QueueFull { .. } => Status::resource_exhausted(message),
        E::QueueClosed { .. } | E::ServiceShutdown | E::Remote { .. } => {
            Status::unavailable(message)
        }
        E::Timeout { .. } => Status::deadline_exceeded(message),
        _ => Status::internal(message),
    }
}

fn register_status(err: RegisterError) -> Status {
    let message = err.to_string();
    match err {
        RegisterError::Dispatch(e) => worker_status(e),
        RegisterError::Storage(StorageError::NotFound { .. }) => Status::not_found(message),
        RegisterError::Storage(StorageError::Unavailable(_)) | RegisterError::NotAssigned { .. } => {
            Status::unavailable(message)
        }
        RegisterError::OsInfo(_) => Status::invalid_argument(message),
        RegisterError::IdSpaceExhausted { .. } => Status::resource_exhausted(message),
        RegisterError::Contended { .. } => Status::aborted(message),
        _ => Status::internal(message),
    }
}
