use std::time::Instant;

pub(crate) type EntryId = u64;

/// `IDLE -> IN_USE -> IDLE | RESERVED_FOR_CLOSE`, transitions serialized by
/// the pool's single critical section. `CLOSED` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    Idle,
    InUse,
    Validating,
    ReservedForClose,
    Closed,
}

/// One underlying connection plus its bookkeeping. Lives in the pool's
/// central entry map, keyed by `id`; leases reference entries by id rather
/// than holding them directly, so there is no cyclic pool<->entry reference.
pub(crate) struct PooledEntry<C> {
    pub id: EntryId,
    pub generation: u32,
    pub state: EntryState,
    /// `None` while the entry is `IN_USE`: the connection value moves out
    /// to the lease (`PoolConnection`) for the whole borrow, not just a
    /// brief window, so no other task ever observes an `IN_USE` entry's
    /// connection. Also `None` transiently during validation or a
    /// lifecycle hook run outside the pool lock.
    pub conn: Option<C>,
    pub created_at: Instant,
    pub last_borrowed_at: Option<Instant>,
    pub last_returned_at: Option<Instant>,
    pub last_validated_at: Instant,
    pub use_count: u64,
    pub lease_token: Option<u64>,
    /// Set when max-lifetime retirement observes this entry while it is
    /// still IN_USE; the next `release` destroys it instead of recycling.
    pub retire_on_release: bool,
}

impl<C> PooledEntry<C> {
    pub fn new(id: EntryId, generation: u32, conn: C, now: Instant) -> Self {
        PooledEntry {
            id,
            generation,
            state: EntryState::InUse,
            conn: Some(conn),
            created_at: now,
            last_borrowed_at: Some(now),
            last_returned_at: None,
            // A freshly created connection is considered already validated,
            // so keepalive/validation does not immediately re-check it.
            last_validated_at: now,
            use_count: 1,
            lease_token: None,
            retire_on_release: false,
        }
    }
}
