/// A unit of work that can be routed to a worker.
///
/// Messages routed to [`SelectorKind::HashCode`](crate::SelectorKind) roles
/// must return a partition key; use [`partition_hash`](crate::partition_hash)
/// over the message's natural key so related messages always reach the same
/// instance.
pub trait Message: Send + 'static {
    /// Key hashed by hash-based selectors. `None` for load-spread messages.
    fn partition_key(&self) -> Option<u64> {
        None
    }
}

impl Message for () {}

impl Message for String {
    fn partition_key(&self) -> Option<u64> {
        Some(crate::partition_hash(self.as_str()))
    }
}

impl Message for u64 {
    fn partition_key(&self) -> Option<u64> {
        Some(*self)
    }
}
