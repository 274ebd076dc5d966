//! HTTP API Module
//!
//! Provides the replication endpoint and the local record API.

mod http;

pub use http::{AppState, HttpServer};
