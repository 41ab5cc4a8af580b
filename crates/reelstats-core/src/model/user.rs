use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::identity::IdentityKey;
use super::snapshot::{SeriesPoint, Snapshot, normalize_timestamp};

/// One tracked post and its snapshot history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Bucket the collector believed correct at capture time.
    #[serde(rename = "ownerKey", skip_serializing_if = "Option::is_none")]
    pub owner_key: Option<IdentityKey>,
    #[serde(rename = "ownerHandle", skip_serializing_if = "Option::is_none")]
    pub owner_handle: Option<String>,
    #[serde(rename = "ownerId", skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Publication time, epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_time: Option<i64>,
    /// Last time the collector saw this post, epoch milliseconds.
    #[serde(rename = "lastSeen", skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
    pub snapshots: Vec<Snapshot>,
}

impl Post {
    /// The most recent snapshot, if any.
    #[must_use]
    pub fn latest_snapshot(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// `true` if any snapshot carries at least one metric.
    #[must_use]
    pub fn has_metrics(&self) -> bool {
        self.snapshots.iter().any(Snapshot::has_metrics)
    }

    /// Earliest timestamp known for this post across snapshots, post time
    /// and last-seen.
    #[must_use]
    pub fn earliest_timestamp(&self) -> Option<i64> {
        self.snapshots
            .first()
            .map(|snap| snap.t)
            .into_iter()
            .chain(self.post_time)
            .chain(self.last_seen)
            .filter_map(normalize_timestamp)
            .min()
    }

    /// Copy of this post keeping only the latest snapshot.
    #[must_use]
    pub fn to_hot(&self) -> Self {
        Self {
            snapshots: self.latest_snapshot().copied().into_iter().collect(),
            ..self.clone()
        }
    }
}

/// One identity bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub posts: BTreeMap<String, Post>,
    pub followers: Vec<SeriesPoint>,
    pub cameos: Vec<SeriesPoint>,
}

impl User {
    /// A bucket whose handle/id are seeded from its key.
    #[must_use]
    pub fn for_key(key: &IdentityKey) -> Self {
        Self {
            handle: key.handle().map(ToOwned::to_owned),
            id: key.id().map(ToOwned::to_owned),
            ..Self::default()
        }
    }

    /// `true` if the bucket holds no posts and no follower/cameo history.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty() && self.followers.is_empty() && self.cameos.is_empty()
    }

    /// Copy of this bucket with each post trimmed to its latest snapshot.
    #[must_use]
    pub fn to_hot(&self) -> Self {
        Self {
            posts: self
                .posts
                .iter()
                .map(|(post_id, post)| (post_id.clone(), post.to_hot()))
                .collect(),
            ..self.clone()
        }
    }
}

/// The whole user table, keyed by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsTable {
    #[serde(default)]
    pub users: BTreeMap<IdentityKey, User>,
}

impl MetricsTable {
    #[must_use]
    pub fn get(&self, key: &IdentityKey) -> Option<&User> {
        self.users.get(key)
    }

    pub fn get_mut(&mut self, key: &IdentityKey) -> Option<&mut User> {
        self.users.get_mut(key)
    }

    /// Bucket for `key`, created from the key when absent.
    pub fn bucket_mut(&mut self, key: &IdentityKey) -> &mut User {
        self.users
            .entry(key.clone())
            .or_insert_with(|| User::for_key(key))
    }

    /// Total number of posts across all buckets.
    #[must_use]
    pub fn post_count(&self) -> usize {
        self.users.values().map(|user| user.posts.len()).sum()
    }
}

/// Entry of the lightweight users index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIndexEntry {
    pub key: IdentityKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(rename = "postCount")]
    pub post_count: usize,
}

impl UserIndexEntry {
    #[must_use]
    pub fn from_user(key: &IdentityKey, user: &User) -> Self {
        Self {
            key: key.clone(),
            handle: user.handle.clone(),
            post_count: user.posts.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::snapshot::Metric;

    fn post_with(snapshots: Vec<Snapshot>) -> Post {
        Post {
            snapshots,
            ..Post::default()
        }
    }

    #[test]
    fn hot_copy_keeps_latest_snapshot_only() {
        let post = post_with(vec![
            Snapshot::at(1_000).with(Metric::Likes, 1),
            Snapshot::at(2_000).with(Metric::Likes, 2),
        ]);
        assert_eq!(post.to_hot().snapshots, vec![Snapshot::at(2_000).with(Metric::Likes, 2)]);
    }

    #[test]
    fn earliest_timestamp_considers_metadata() {
        let mut post = post_with(vec![Snapshot::at(5_000)]);
        post.post_time = Some(3);
        post.last_seen = Some(9_000);
        assert_eq!(post.earliest_timestamp(), Some(3_000));
        assert_eq!(Post::default().earliest_timestamp(), None);
    }

    #[test]
    fn table_serializes_with_string_keys() {
        let mut table = MetricsTable::default();
        table.bucket_mut(&IdentityKey::Handle("alice".into()));
        let json = serde_json::to_value(&table).expect("serialize");
        assert!(json["users"]["h:alice"].is_object());
        assert_eq!(json["users"]["h:alice"]["handle"], "alice");

        let back: MetricsTable = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, table);
    }

    #[test]
    fn post_fields_use_wire_names() {
        let post = Post {
            owner_key: Some(IdentityKey::Id("1".into())),
            last_seen: Some(7),
            ..Post::default()
        };
        let json = serde_json::to_value(&post).expect("serialize");
        assert_eq!(json["ownerKey"], "id:1");
        assert_eq!(json["lastSeen"], 7);
    }
}
