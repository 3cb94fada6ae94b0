//! Identifier types for connection slots.

use std::fmt;

/// Index of one connection slot inside the server's fixed pool.
pub type SlotIndex = usize;

/// Number of times one slot has been handed out to a client.
pub type Generation = u64;

/// Identity of one accepted client connection.
///
/// The slot is reused after the connection drains, so the generation tells two tenants of the
/// same slot apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    /// Slot index inside the pool.
    pub slot: SlotIndex,
    /// Acquire count of that slot at the time the connection was accepted.
    pub generation: Generation,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

/// Strongly typed pool capacity to avoid passing raw integers around server APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotCount(pub(crate) u16);

impl SlotCount {
    /// Creates a validated slot-count value.
    ///
    /// Returns `None` for zero because a server always needs at least one connection slot.
    #[must_use]
    pub fn new(value: u16) -> Option<Self> {
        if value == 0 { None } else { Some(Self(value)) }
    }

    /// Returns the inner count.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}
