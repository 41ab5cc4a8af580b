//! Ownership reconciliation and pruning.
//!
//! Posts are filed under whatever key the collector guessed. These passes
//! correct that after the fact:
//!
//! - [`prune_mismatched_posts_for_user`] moves posts whose owner fields name
//!   a different, non-alias creator into that creator's bucket.
//! - [`reclaim_from_unknown_for_user`] pulls matching posts out of the
//!   `unknown` bucket.
//! - [`prune_empty_posts_for_user`] drops posts that never received a
//!   metric once they are older than the grace window.
//!
//! Moves carry the post's snapshots with it and merge into any copy the
//! target already holds. Nothing moves without a positive mismatch signal:
//! a post whose owner fields are missing or not comparable stays put.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::identity::{UserIdentity, find_alias_keys};
use crate::merge::Merge;
use crate::model::{IdentityKey, MetricsTable, Post, User};

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Posts moved between buckets.
    pub moved: usize,
    /// Posts deleted.
    pub removed: usize,
    /// Buckets whose contents changed (including deleted buckets).
    pub touched: BTreeSet<IdentityKey>,
}

impl ReconcileReport {
    /// `true` if anything was moved or removed.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.moved > 0 || self.removed > 0
    }

    /// Fold another report into this one.
    pub fn absorb(&mut self, other: Self) {
        self.moved += other.moved;
        self.removed += other.removed;
        self.touched.extend(other.touched);
    }
}

/// Identities of `key`'s bucket and every alias of it.
fn group_identities(table: &MetricsTable, key: &IdentityKey) -> Vec<UserIdentity> {
    std::iter::once(key.clone())
        .chain(find_alias_keys(table, key, None))
        .map(|member| UserIdentity::of(&member, table.get(&member)))
        .filter(|identity| !identity.is_empty())
        .collect()
}

/// Move `post_id` from `from` into `to`, merging with any existing copy.
fn move_post(table: &mut MetricsTable, from: &IdentityKey, to: &IdentityKey, post_id: &str) -> bool {
    let Some(mut post) = table
        .get_mut(from)
        .and_then(|bucket| bucket.posts.remove(post_id))
    else {
        return false;
    };
    post.owner_key = Some(to.clone());
    let target = table.bucket_mut(to);
    match target.posts.get_mut(post_id) {
        Some(existing) => {
            existing.merge(post);
            existing.owner_key = Some(to.clone());
        }
        None => {
            target.posts.insert(post_id.to_string(), post);
        }
    }
    true
}

/// Remove `key`'s bucket if nothing is left in it.
fn drop_if_empty(table: &mut MetricsTable, key: &IdentityKey) {
    if table.get(key).is_some_and(User::is_empty) {
        table.users.remove(key);
        debug!(%key, "removed empty bucket");
    }
}

/// Bucket that should own a post claiming `owner`.
///
/// Prefers an existing bucket under the owner's canonical key, then any
/// existing bucket whose identity matches, then a new canonical bucket.
fn owner_bucket(
    table: &mut MetricsTable,
    owner: &UserIdentity,
    post: &Post,
    exclude: &IdentityKey,
) -> Option<IdentityKey> {
    let preferred = owner.preferred_key()?;
    if table.get(&preferred).is_some() {
        return Some(preferred);
    }
    let existing = table
        .users
        .iter()
        .filter(|(key, _)| *key != exclude && key.is_aliasable())
        .find(|(key, user)| UserIdentity::of(key, Some(user)).matches(owner))
        .map(|(key, _)| key.clone());
    if existing.is_some() {
        return existing;
    }
    let bucket = table.bucket_mut(&preferred);
    if bucket.handle.is_none() {
        bucket.handle = post.owner_handle.clone();
    }
    if bucket.id.is_none() {
        bucket.id.clone_from(&owner.id);
    }
    Some(preferred)
}

/// Move posts whose owner fields point to a different, non-alias creator.
///
/// Only `id:` and `h:` buckets are checked; cameo buckets hold other
/// creators' posts by nature and `unknown` is handled by
/// [`reclaim_from_unknown_for_user`].
pub fn prune_mismatched_posts_for_user(
    table: &mut MetricsTable,
    user_key: &IdentityKey,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    if !user_key.is_aliasable() || table.get(user_key).is_none() {
        return report;
    }

    let group = group_identities(table, user_key);
    let candidates: Vec<(String, UserIdentity, Post)> = table
        .get(user_key)
        .map(|bucket| {
            bucket
                .posts
                .iter()
                .map(|(post_id, post)| (post_id.clone(), UserIdentity::of_owner(post), post.clone()))
                .collect()
        })
        .unwrap_or_default();

    for (post_id, owner, post) in candidates {
        if owner.is_empty() || group.iter().any(|member| member.matches(&owner)) {
            continue;
        }
        if !group.iter().any(|member| member.contradicts(&owner)) {
            continue;
        }
        let Some(target) = owner_bucket(table, &owner, &post, user_key) else {
            continue;
        };
        if &target == user_key {
            continue;
        }
        if move_post(table, user_key, &target, &post_id) {
            debug!(%post_id, from = %user_key, to = %target, "moved mis-attributed post");
            report.moved += 1;
            report.touched.insert(target);
        }
    }

    if report.changed() {
        report.touched.insert(user_key.clone());
        drop_if_empty(table, user_key);
    }
    report
}

/// Move posts out of `unknown` whose owner fields match `user_key`'s
/// creator. Posts that do not match are left where they are.
pub fn reclaim_from_unknown_for_user(
    table: &mut MetricsTable,
    user_key: &IdentityKey,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    if !user_key.is_aliasable() {
        return report;
    }

    let group = group_identities(table, user_key);
    let matching: Vec<String> = table
        .get(&IdentityKey::Unknown)
        .map(|bucket| {
            bucket
                .posts
                .iter()
                .filter(|(_, post)| {
                    let owner = UserIdentity::of_owner(post);
                    !owner.is_empty() && group.iter().any(|member| member.matches(&owner))
                })
                .map(|(post_id, _)| post_id.clone())
                .collect()
        })
        .unwrap_or_default();

    for post_id in matching {
        if move_post(table, &IdentityKey::Unknown, user_key, &post_id) {
            report.moved += 1;
        }
    }

    if report.changed() {
        debug!(key = %user_key, moved = report.moved, "reclaimed posts from unknown");
        report.touched.insert(user_key.clone());
        report.touched.insert(IdentityKey::Unknown);
        drop_if_empty(table, &IdentityKey::Unknown);
    }
    report
}

/// Remove posts with no metric-bearing snapshot whose earliest known
/// timestamp is more than `grace_ms` before `now_ms`.
///
/// A post with no known timestamp at all is kept.
pub fn prune_empty_posts_for_user(
    table: &mut MetricsTable,
    user_key: &IdentityKey,
    now_ms: i64,
    grace_ms: i64,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    if user_key.is_virtual() {
        return report;
    }
    let Some(bucket) = table.get_mut(user_key) else {
        return report;
    };

    let before = bucket.posts.len();
    bucket.posts.retain(|_, post| {
        post.has_metrics()
            || post
                .earliest_timestamp()
                .is_none_or(|earliest| now_ms.saturating_sub(earliest) <= grace_ms)
    });
    report.removed = before - bucket.posts.len();

    if report.changed() {
        debug!(key = %user_key, removed = report.removed, "pruned empty posts");
        report.touched.insert(user_key.clone());
        drop_if_empty(table, user_key);
    }
    report
}
