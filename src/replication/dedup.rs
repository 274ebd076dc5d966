//! Idempotency Guard
//!
//! Remembers which request ids this node has applied. Each request id owns
//! a slot with its own async lock: a delivery holds the slot for the whole
//! apply, so a concurrent duplicate waits and then sees the id as applied
//! instead of racing it into the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::OwnedMutexGuard;

/// `None` until applied, then the time it was applied
type Slot = Arc<tokio::sync::Mutex<Option<Instant>>>;

/// Outcome of asking the guard whether a delivery may proceed
pub enum Admission {
    /// The request id was already applied on this node
    Duplicate,
    /// Exclusive right to apply the request id
    Claimed(Claim),
}

/// Held while a delivery applies its envelope
///
/// Dropping a claim without calling [`Claim::mark`] leaves the request id
/// unapplied so a later redelivery can try again.
pub struct Claim {
    slot: OwnedMutexGuard<Option<Instant>>,
}

impl Claim {
    /// Record the request id as applied
    pub fn mark(mut self) {
        *self.slot = Some(Instant::now());
    }
}

/// Per-node set of applied request ids
#[derive(Default)]
pub struct DedupGuard {
    slots: Mutex<HashMap<String, Slot>>,
}

impl DedupGuard {
    /// Create an empty guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-then-claim a request id atomically
    pub async fn admit(&self, request_id: &str) -> Admission {
        let slot = {
            let mut slots = self.slots();
            Arc::clone(slots.entry(request_id.to_string()).or_default())
        };

        let guard = slot.lock_owned().await;
        if guard.is_some() {
            Admission::Duplicate
        } else {
            Admission::Claimed(Claim { slot: guard })
        }
    }

    /// Whether a request id has been applied
    ///
    /// An id whose apply is still in flight reports `false`.
    pub fn seen(&self, request_id: &str) -> bool {
        let slots = self.slots();
        slots
            .get(request_id)
            .and_then(|slot| slot.try_lock().ok().map(|applied| applied.is_some()))
            .unwrap_or(false)
    }

    /// Record a request id as applied without going through [`DedupGuard::admit`]
    pub fn mark(&self, request_id: &str) {
        let slot = {
            let mut slots = self.slots();
            Arc::clone(slots.entry(request_id.to_string()).or_default())
        };
        // An in-flight claim marks the id itself when it succeeds.
        if let Ok(mut applied) = slot.try_lock() {
            applied.get_or_insert_with(Instant::now);
        };
    }

    /// Drop ids applied longer than `retention` ago and abandoned claims
    ///
    /// Slots referenced outside the map belong to a delivery in progress and
    /// are never evicted. Returns the number of ids removed.
    pub fn evict_older_than(&self, retention: Duration) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(applied) => match *applied {
                    Some(at) => at.elapsed() < retention,
                    None => false,
                },
                Err(_) => true,
            }
        });
        before - slots.len()
    }

    /// Number of tracked request ids
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
