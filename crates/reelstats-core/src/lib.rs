//! reelstats-core library.
//!
//! Snapshot history for short-video posts, bucketed by creator identity and
//! persisted in two tiers (a small hot record plus per-creator cold shards).
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums with an [`error::ErrorCode`];
//!   `anyhow::Result` for configuration loading.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).
//! - **Time**: epoch milliseconds as `i64` everywhere; inputs in seconds are
//!   normalized on the way in.

pub mod comb;
pub mod config;
pub mod error;
pub mod export;
pub mod identity;
pub mod ingest;
pub mod kv;
pub mod lock;
pub mod merge;
pub mod model;
pub mod reconcile;
pub mod refresh;
pub mod store;

pub use config::StoreConfig;
pub use error::ErrorCode;
pub use model::{IdentityKey, MetricsTable, Post, Snapshot, User};
pub use store::{MetricsStore, StoreError, now_ms};
