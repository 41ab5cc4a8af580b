//! Data model: identity keys, snapshots, posts, user buckets.

pub mod identity;
pub mod snapshot;
pub mod user;

pub use identity::{IdentityKey, ParseIdentityKeyError};
pub use snapshot::{Metric, SNAPSHOT_NUMERIC_FIELDS, SeriesPoint, Snapshot};
pub use user::{MetricsTable, Post, User, UserIndexEntry};
