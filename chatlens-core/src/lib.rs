//! # chatlens-core
//!
//! Core library for chatlens, an analytics dashboard for a customer-service
//! chatbot.
//!
//! This library provides:
//! - Domain types for turns, conversations and filters
//! - The normalize → group → filter → metrics pipeline
//! - A dashboard state machine with live/cached/empty fallback
//! - A REST row source and a SQLite snapshot cache
//! - Configuration, logging and CSV export
//!
//! ## Architecture
//!
//! Data flows one way:
//! - **Rows:** heterogeneous JSON objects from the remote events table
//! - **Turns:** one fully resolved exchange per row ([`normalize`])
//! - **Conversations:** turns folded per conversation id ([`group`])
//!
//! Filters narrow the turn set ([`filter`]); metrics and tables are computed
//! from the filtered turns ([`metrics`]), never from conversations.
//!
//! ## Example
//!
//! ```rust
//! use chatlens_core::{group, metrics::MetricsEngine, normalize_rows, LatencyMode, RawRow};
//! use chrono::Utc;
//! use serde_json::json;
//!
//! let rows = vec![RawRow::from(json!({
//!     "conversation_id": "c1",
//!     "created_at": "2025-03-01T10:00:00Z",
//!     "user_message": "Welke maat?",
//!     "ai_output": "Bekijk https://shop.example/p/1",
//!     "metrics": { "latency_ms": 900 }
//! }))];
//!
//! let turns = normalize_rows(&rows);
//! let conversations = group(&turns);
//! assert_eq!(conversations.len(), 1);
//!
//! let metrics = MetricsEngine::with_timezone(Utc).compute(&turns, LatencyMode::P95, Utc::now());
//! assert_eq!(metrics.kpis.format_success_rate(), "100%");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use dashboard::{Dashboard, DashboardView};
pub use db::{Database, SnapshotCache};
pub use error::{Error, Result};
pub use group::group;
pub use normalize::{normalize, normalize_rows, RowNormalizer};
pub use source::{RestRowSource, RowQuery, RowSource};
pub use types::*;

// Public modules
pub mod config;
pub mod dashboard;
pub mod db;
pub mod demo;
pub mod error;
pub mod export;
pub mod filter;
pub mod format;
pub mod group;
pub mod logging;
pub mod metrics;
pub mod normalize;
pub mod source;
pub mod types;
