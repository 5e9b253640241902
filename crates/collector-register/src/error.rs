//! Errors raised while allocating or maintaining identifiers.

/// Result alias used across the crate.
pub type Result<T, E = RegisterError> = core::result::Result<T, E>;

/// Failures reported by a storage backend.
///
/// `IdConflict` and `KeyExists` are part of the allocation protocol rather
/// than hard failures: the first makes the allocator rescan and retry, the
/// second makes it adopt the identifier another writer already stored.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    /// Another record already holds this identifier.
    #[error("{kind} id {id} is already taken")]
    IdConflict { kind: &'static str, id: i32 },
    /// A record with the same natural key already exists under `id`.
    #[error("{kind} already registered with id {id}")]
    KeyExists { kind: &'static str, id: i32 },
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i32 },
    /// The backend could not be reached or refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the register services.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum RegisterError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Dispatch(#[from] collector_worker::Error),

    /// The increment helper would overflow the 32-bit identifier space.
    #[error("{kind} identifier space exhausted (min {min}, max {max})")]
    IdSpaceExhausted { kind: &'static str, min: i32, max: i32 },

    /// Every allocation attempt collided with a concurrent writer.
    #[error("{kind} allocation still conflicting after {attempts} attempts")]
    Contended { kind: &'static str, attempts: usize },

    /// The identifier was not assigned within the retry budget.
    #[error("{kind} identifier not assigned after {attempts} attempts")]
    NotAssigned { kind: &'static str, attempts: usize },

    #[error("invalid os info: {0}")]
    OsInfo(#[from] serde_json::Error),
}
