use crate::SelectorKind;
use core::{fmt, marker::PhantomData};

/// Globally unique name of a worker role.
pub type RoleName = &'static str;

/// Named identity of a worker kind, carrying its selection strategy.
///
/// Roles are declared as constants next to the worker that serves them. The
/// message type `M` and reply type `R` are part of the role, so a lookup
/// through the wrong role constant is caught by the registry instead of
/// producing a silently mistyped reference.
///
/// # Example
///
/// ```
/// use collector_worker::{Role, SelectorKind};
///
/// const SEGMENT_PARSE: Role<String> = Role::new("SegmentParseWorker", SelectorKind::Rolling);
/// assert_eq!(SEGMENT_PARSE.name(), "SegmentParseWorker");
/// ```
pub struct Role<M, R = ()> {
    name: RoleName,
    selector: SelectorKind,
    _marker: PhantomData<fn(M) -> R>,
}

impl<M, R> Role<M, R> {
    /// Declares a role with the given name and selection strategy.
    pub const fn new(name: RoleName, selector: SelectorKind) -> Self {
        Self {
            name,
            selector,
            _marker: PhantomData,
        }
    }

    /// Returns the role's stable name.
    pub const fn name(&self) -> RoleName {
        self.name
    }

    /// Returns the strategy used to pick one of the role's instances.
    pub const fn selector(&self) -> SelectorKind {
        self.selector
    }
}

impl<M, R> Clone for Role<M, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M, R> Copy for Role<M, R> {}

impl<M, R> fmt::Debug for Role<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Role")
            .field("name", &self.name)
            .field("selector", &self.selector)
            .finish()
    }
}

impl<M, R> fmt::Display for Role<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
