//! Full-history export and merge-based import.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::kv::KvStore;
use crate::merge::Merge;
use crate::model::{IdentityKey, User};
use crate::store::{MetricsStore, StoreError};

/// Current bundle format version.
pub const EXPORT_VERSION: u32 = 1;

/// Every bucket with its full snapshot history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub version: u32,
    #[serde(rename = "exportedAt")]
    pub exported_at: i64,
    #[serde(default)]
    pub users: BTreeMap<IdentityKey, User>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub users: usize,
    pub posts: usize,
    /// Keys in the bundle that cannot be written (virtual keys).
    pub skipped: Vec<IdentityKey>,
}

impl<K: KvStore> MetricsStore<K> {
    /// Hydrate everything and snapshot the table into a bundle.
    ///
    /// # Errors
    ///
    /// Returns an error if cold history cannot be loaded.
    #[instrument(skip(self))]
    pub fn export(&mut self, now_ms: i64) -> Result<ExportBundle, StoreError> {
        self.hydrate_all()?;
        let users: BTreeMap<IdentityKey, User> = self
            .table
            .users
            .iter()
            .filter(|(key, _)| !key.is_virtual())
            .map(|(key, user)| (key.clone(), user.clone()))
            .collect();
        info!(users = users.len(), "exported metrics");
        Ok(ExportBundle {
            version: EXPORT_VERSION,
            exported_at: now_ms,
            users,
        })
    }

    /// Merge a bundle into the store and persist every imported bucket.
    ///
    /// Importing the same bundle twice leaves the store unchanged the second
    /// time.
    ///
    /// # Errors
    ///
    /// Rejects bundles from a newer format and writes during a live purge
    /// lock; otherwise see [`MetricsStore::save`].
    #[instrument(skip_all, fields(users = bundle.users.len()))]
    pub fn import(&mut self, bundle: ExportBundle, now_ms: i64) -> Result<ImportReport, StoreError> {
        if bundle.version > EXPORT_VERSION {
            return Err(StoreError::UnsupportedExport {
                found: bundle.version,
                supported: EXPORT_VERSION,
            });
        }
        self.ensure_no_purge(now_ms)?;

        let mut report = ImportReport::default();
        let mut touched = Vec::with_capacity(bundle.users.len());
        for (key, user) in bundle.users {
            if key.is_virtual() {
                warn!(%key, "skipping virtual bucket in import");
                report.skipped.push(key);
                continue;
            }
            report.users += 1;
            report.posts += user.posts.len();
            self.table.bucket_mut(&key).merge(user);
            touched.push(key);
        }

        self.dirty.extend(touched.iter().cloned());
        self.save(&touched)?;
        info!(users = report.users, posts = report.posts, "imported metrics");
        Ok(report)
    }
}
