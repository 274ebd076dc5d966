//! State Management Module
//!
//! Tracks the delivery health of peer nodes.

mod peers;

pub use peers::{PeerRegistry, PeerState, PeerStatus};
