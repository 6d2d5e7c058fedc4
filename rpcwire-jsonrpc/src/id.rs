//! Request id allocation.
//!
//! Each client owns its own generator; nothing here is process-wide.
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::types::Id;

/// Produces the ids for outbound requests.
///
/// Ids must not repeat while an earlier request with the same id is still pending.  The registry
/// refuses duplicates, so a generator that breaks this rule gets an error rather than crossed
/// responses.
pub trait IdGenerator: Send + Sync + 'static {
    fn next_id(&self) -> Id;
}

/// Incrementing integer ids starting at 0.  The default.
#[derive(Debug, Default)]
pub struct CounterIdGenerator {
    next: AtomicU64,
}

impl CounterIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl IdGenerator for CounterIdGenerator {
    fn next_id(&self) -> Id {
        Id::from(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Time-ordered UUID v7 strings, for ids that should be unique across processes too.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self) -> Id {
        Id::Str(Uuid::now_v7().to_string())
    }
}

impl<F> IdGenerator for F
where
    F: Fn() -> Id + Send + Sync + 'static,
{
    fn next_id(&self) -> Id {
        self()
    }
}
