//! ratelimit-sync - Rate limit configuration control plane
//!
//! This crate turns per-caller, per-endpoint rate limit rules held in a
//! relational store into Envoy rate limit descriptors, and publishes them as
//! atomically versioned snapshots to the proxies subscribed under a node key.

pub mod config;
pub mod error;
pub mod proto;
pub mod ratelimit;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use error::{Result, SyncError};
pub use sync::{RefreshReport, SyncState, Synchronizer};
