//! Database layer for chatlens
//!
//! This module provides the local storage layer using SQLite with:
//! - Schema migrations
//! - Per-scope snapshots of the last good turn set
//! - A log of fetch attempts

pub mod cache;
pub mod schema;

pub use cache::{CacheData, CacheMeta, CacheSnapshot, Database, FetchRecord, SnapshotCache};
