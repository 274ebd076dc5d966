//! Identifier minting
//!
//! Record identifiers are Snowflake-style 64-bit values so that two nodes
//! inserting at the same moment can never hand out the same identifier:
//!
//! - 41 bits: milliseconds since 2024-01-01 00:00:00 UTC
//! - 10 bits: node number (0-1023, `node.number` in the config)
//! - 12 bits: per-millisecond sequence
//!
//! They travel as decimal strings. Request ids, which tag one logical write
//! across every delivery, are random UUIDs in 32-char hex form.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const EPOCH_MS: u64 = 1704067200000;

const NODE_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Highest node number that fits in a record identifier
pub const MAX_NODE_NUMBER: u16 = (1 << NODE_BITS) - 1;

/// Mints record identifiers for one node
#[derive(Debug)]
pub struct RecordIdGenerator {
    node: u64,
    /// `millis << SEQUENCE_BITS | sequence` of the last id handed out
    last: AtomicU64,
}

impl RecordIdGenerator {
    /// Create a generator; node numbers above `MAX_NODE_NUMBER` are rejected
    pub fn new(node_number: u16) -> crate::Result<Self> {
        if node_number > MAX_NODE_NUMBER {
            return Err(crate::Error::Config(format!(
                "node number must be 0-{}, got {}",
                MAX_NODE_NUMBER, node_number
            )));
        }
        Ok(Self {
            node: node_number as u64,
            last: AtomicU64::new(0),
        })
    }

    /// Next identifier as a raw integer
    pub fn next_raw(&self) -> u64 {
        loop {
            let now = now_millis();
            let prev = self.last.load(Ordering::Acquire);
            let prev_millis = prev >> SEQUENCE_BITS;

            // A clock that steps backwards keeps counting on the last seen millisecond.
            let millis = now.max(prev_millis);
            let sequence = if millis == prev_millis {
                (prev & SEQUENCE_MASK) + 1
            } else {
                0
            };
            if sequence > SEQUENCE_MASK {
                std::thread::yield_now();
                continue;
            }

            let next = (millis << SEQUENCE_BITS) | sequence;
            if self
                .last
                .compare_exchange(prev, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return (millis << (NODE_BITS + SEQUENCE_BITS)) | (self.node << SEQUENCE_BITS) | sequence;
            }
        }
    }

    /// Next identifier rendered for storage and the wire
    pub fn next_id(&self) -> String {
        self.next_raw().to_string()
    }
}

/// Node number encoded in a raw record identifier
pub fn node_of(raw: u64) -> u16 {
    ((raw >> SEQUENCE_BITS) & MAX_NODE_NUMBER as u64) as u16
}

/// Mint a fresh request id for one logical write
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(EPOCH_MS)
        .saturating_sub(EPOCH_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ids_unique_and_increasing() {
        let gen = RecordIdGenerator::new(1).unwrap();
        let mut last = 0u64;
        let mut seen = HashSet::new();

        for _ in 0..10000 {
            let id = gen.next_raw();
            assert!(id > last, "ids should be strictly increasing");
            assert!(seen.insert(id));
            last = id;
        }
    }

    #[test]
    fn test_concurrent_generation() {
        let gen = Arc::new(RecordIdGenerator::new(9).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = Arc::clone(&gen);
                thread::spawn(move || (0..1000).map(|_| gen.next_raw()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "duplicate id across threads");
            }
        }
        assert_eq!(all.len(), 4000);
    }

    #[test]
    fn test_nodes_never_collide() {
        let a = RecordIdGenerator::new(1).unwrap();
        let b = RecordIdGenerator::new(2).unwrap();
        let ida = a.next_raw();
        let idb = b.next_raw();
        assert_ne!(ida, idb);
        assert_eq!(node_of(ida), 1);
        assert_eq!(node_of(idb), 2);
    }

    #[test]
    fn test_rejects_out_of_range_node() {
        assert!(RecordIdGenerator::new(MAX_NODE_NUMBER).is_ok());
        assert!(RecordIdGenerator::new(MAX_NODE_NUMBER + 1).is_err());
    }

    #[test]
    fn test_request_id_shape() {
        let id = new_request_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_request_id());
    }
}
