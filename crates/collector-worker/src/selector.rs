//! Instance selection strategies.
//!
//! A [`Selector`] picks one candidate out of the worker references registered
//! under a role:
//!
//! - [`SelectorKind::Rolling`] spreads load round-robin using a per-role
//!   counter.
//! - [`SelectorKind::HashCode`] maps a message's partition key onto a fixed
//!   candidate index, so every message with the same key lands on the same
//!   instance.
//!
//! Hash selection is only stable while the candidate count stays fixed. The
//! registry does not rebalance in-flight work when the topology changes.

use crate::{Error, Result};
use core::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Selection strategy declared by a [`Role`](crate::Role).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorKind {
    /// Round-robin over all candidates.
    Rolling,
    /// `candidates[hash(partition key) % len]`.
    HashCode,
}

/// Selection state shared by every lookup of one role.
#[derive(Debug)]
pub struct Selector {
    kind: SelectorKind,
    next: AtomicUsize,
}

impl Selector {
    pub const fn new(kind: SelectorKind) -> Self {
        Self {
            kind,
            next: AtomicUsize::new(0),
        }
    }

    pub const fn kind(&self) -> SelectorKind {
        self.kind
    }

    /// Returns the index of the candidate that should receive the message.
    ///
    /// Rolling selection ignores `key`; hash selection requires it.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyCandidates`] if `len` is zero.
    /// - [`Error::MissingPartitionKey`] if hash selection gets no key.
    pub fn select_index(&self, role: &str, len: usize, key: Option<u64>) -> Result<usize> {
        if len == 0 {
            return Err(Error::EmptyCandidates {
                role: role.to_string(),
            });
        }

        match self.kind {
            // Relaxed increment; the counter orders nothing but itself.
            SelectorKind::Rolling => Ok(self.next.fetch_add(1, Ordering::Relaxed) % len),
            SelectorKind::HashCode => {
                let key = key.ok_or_else(|| Error::MissingPartitionKey {
                    role: role.to_string(),
                })?;
                Ok((key % len as u64) as usize)
            }
        }
    }

    /// Picks one element of `candidates`.
    ///
    /// # Errors
    ///
    /// See [`Selector::select_index`].
    pub fn select<'a, T>(&self, role: &str, candidates: &'a [T], key: Option<u64>) -> Result<&'a T> {
        let idx = self.select_index(role, candidates.len(), key)?;
        Ok(&candidates[idx])
    }
}

/// Hashes a natural key into a partition key.
///
/// Uses [`DefaultHasher::new`], whose SipHash keys are fixed, so every node
/// running the same build agrees on the value.
pub fn partition_hash<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
